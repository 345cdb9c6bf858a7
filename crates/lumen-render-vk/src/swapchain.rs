use ash::vk;
use lumen_render::{RenderSize, WindowSurface};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::driver::{DeviceQueues, Driver};
use crate::error::{GfxError, GfxResult, VkResultExt};
use crate::image::view_info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    Uninitialized,
    Live,
    Rebuilding,
    Shutdown,
}

/// sRGB BGRA8 when offered, otherwise whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered; FIFO is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let want = if drawable.is_empty() {
        RenderSize::new(1, 1)
    } else {
        drawable
    };
    vk::Extent2D {
        width: want
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: want
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, bounded by the maximum when there is one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count != 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// The presentable image chain and one view per image.
#[derive(Debug)]
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    state: ChainState,
}

struct Built {
    handle: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

fn build(
    driver: &dyn Driver,
    queues: DeviceQueues,
    drawable: RenderSize,
    old: vk::SwapchainKHR,
) -> GfxResult<Built> {
    let caps = driver
        .surface_capabilities()
        .init_err("surface capabilities")?;
    let formats = driver.surface_formats().init_err("surface formats")?;
    let modes = driver
        .surface_present_modes()
        .init_err("surface present modes")?;

    let surface_format = choose_surface_format(&formats)
        .ok_or_else(|| GfxError::init("surface reports no formats"))?;
    let present_mode = choose_present_mode(&modes);
    let extent = choose_extent(&caps, drawable);
    let min_images = choose_image_count(&caps);

    let families = [queues.graphics_family, queues.present_family];
    let mut info = vk::SwapchainCreateInfoKHR::default()
        .min_image_count(min_images)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old);
    info = if queues.shared_family() {
        info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    } else {
        info.image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&families)
    };

    let handle = driver
        .create_swapchain(&info)
        .init_err("vkCreateSwapchainKHR")?;

    let images = match driver.swapchain_images(handle) {
        Ok(images) => images,
        Err(e) => {
            driver.destroy_swapchain(handle);
            return Err(GfxError::init(format!("vkGetSwapchainImagesKHR: {e}")));
        }
    };

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        match driver.create_image_view(&view_info(
            image,
            surface_format.format,
            vk::ImageAspectFlags::COLOR,
        )) {
            Ok(v) => views.push(v),
            Err(e) => {
                for v in views {
                    driver.destroy_image_view(v);
                }
                driver.destroy_swapchain(handle);
                return Err(GfxError::init(format!("swapchain image view: {e}")));
            }
        }
    }

    Ok(Built {
        handle,
        surface_format,
        present_mode,
        extent,
        images,
        views,
    })
}

impl Swapchain {
    pub fn new(ctx: &Context, window: &dyn WindowSurface) -> GfxResult<Self> {
        let built = build(
            ctx.driver()?,
            ctx.queues(),
            window.drawable_size(),
            vk::SwapchainKHR::null(),
        )?;
        let mut sc = Self {
            handle: vk::SwapchainKHR::null(),
            surface_format: built.surface_format,
            present_mode: built.present_mode,
            extent: built.extent,
            images: Vec::new(),
            views: Vec::new(),
            state: ChainState::Uninitialized,
        };
        sc.adopt(built);
        info!(
            "swapchain: {:?}/{:?}, {:?}, {}x{}, {} images",
            sc.surface_format.format,
            sc.surface_format.color_space,
            sc.present_mode,
            sc.extent.width,
            sc.extent.height,
            sc.images.len()
        );
        Ok(sc)
    }

    fn adopt(&mut self, built: Built) {
        self.handle = built.handle;
        self.surface_format = built.surface_format;
        self.present_mode = built.present_mode;
        self.extent = built.extent;
        self.images = built.images;
        self.views = built.views;
        self.state = ChainState::Live;
    }

    // STRICT ORDER (recreate):
    // 1) block while the drawable is empty (minimized)
    // 2) device_wait_idle: nothing may still reference the old views
    // 3) destroy the old views
    // 4) create the new chain with the old one as hint, then its views
    // 5) destroy the old chain
    pub fn recreate(&mut self, ctx: &Context, window: &dyn WindowSurface) -> GfxResult<()> {
        let driver = ctx.driver()?;

        let mut drawable = window.drawable_size();
        while drawable.is_empty() {
            window.wait_events();
            drawable = window.drawable_size();
        }

        driver
            .device_wait_idle()
            .check("device_wait_idle(recreate)")?;
        self.state = ChainState::Rebuilding;

        for view in self.views.drain(..) {
            driver.destroy_image_view(view);
        }
        self.images.clear();

        let old = self.handle;
        let built = build(driver, ctx.queues(), drawable, old);

        // The old chain is retired whether or not the new one came up.
        if old != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(old);
        }
        self.handle = vk::SwapchainKHR::null();

        match built {
            Ok(built) => {
                let old_format = self.surface_format.format;
                self.adopt(built);
                if self.surface_format.format != old_format {
                    warn!(
                        "swapchain format changed {:?} -> {:?}",
                        old_format, self.surface_format.format
                    );
                }
                debug!(
                    "swapchain rebuilt: {}x{}, {} images",
                    self.extent.width,
                    self.extent.height,
                    self.images.len()
                );
                Ok(())
            }
            Err(e) => {
                self.state = ChainState::Uninitialized;
                Err(e)
            }
        }
    }

    /// Views first, then the chain. Safe to call twice.
    pub fn shutdown(&mut self, ctx: &Context) {
        if self.state == ChainState::Shutdown {
            return;
        }
        if let Ok(driver) = ctx.driver() {
            for view in self.views.drain(..) {
                driver.destroy_image_view(view);
            }
            if self.handle != vk::SwapchainKHR::null() {
                driver.destroy_swapchain(self.handle);
            }
        }
        self.views.clear();
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
        self.state = ChainState::Shutdown;
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.surface_format.color_space
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if self.handle != vk::SwapchainKHR::null() {
            warn!("swapchain dropped without shutdown");
        }
    }
}
