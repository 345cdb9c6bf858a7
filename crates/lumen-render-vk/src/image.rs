use ash::vk;
use tracing::warn;

use crate::context::Context;
use crate::driver::Driver;
use crate::error::{GfxError, GfxResult, VkResultExt};
use crate::memory::allocate_and_bind;

/// Device-local 2D image with its dedicated allocation and a single view.
#[derive(Debug, Default)]
pub struct Image {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

pub(crate) fn view_info<'a>(
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> vk::ImageViewCreateInfo<'a> {
    vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    }
}

impl Image {
    pub fn new_2d(
        ctx: &Context,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> GfxResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GfxError::contract(format!(
                "image extent {}x{} is empty",
                extent.width, extent.height
            )));
        }
        let driver = ctx.driver()?;

        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let handle = driver.create_image(&info).init_err("vkCreateImage")?;

        let memory = match allocate_and_bind(driver, handle, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        {
            Ok(m) => m,
            Err(e) => {
                driver.destroy_image(handle);
                return Err(e);
            }
        };

        let view = match driver.create_image_view(&view_info(handle, format, aspect)) {
            Ok(v) => v,
            Err(e) => {
                release(driver, vk::ImageView::null(), handle, memory);
                return Err(GfxError::init(format!("vkCreateImageView: {e}")));
            }
        };

        Ok(Self {
            handle,
            memory,
            view,
            format,
            extent,
        })
    }

    /// Destroys view, image, then memory. Safe to call twice.
    pub fn shutdown(&mut self, ctx: &Context) {
        if !self.is_bound() {
            return;
        }
        if let Ok(driver) = ctx.driver() {
            release(driver, self.view, self.handle, self.memory);
        }
        self.view = vk::ImageView::null();
        self.handle = vk::Image::null();
        self.memory = vk::DeviceMemory::null();
    }

    pub fn is_bound(&self) -> bool {
        self.handle != vk::Image::null()
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

fn release(
    driver: &dyn Driver,
    view: vk::ImageView,
    image: vk::Image,
    memory: vk::DeviceMemory,
) {
    if view != vk::ImageView::null() {
        driver.destroy_image_view(view);
    }
    driver.destroy_image(image);
    driver.free_memory(memory);
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.is_bound() {
            warn!(
                "image {}x{} dropped without shutdown",
                self.extent.width, self.extent.height
            );
        }
    }
}
