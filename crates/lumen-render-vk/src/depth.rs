use ash::vk;
use tracing::debug;

use crate::context::Context;
use crate::driver::Driver;
use crate::error::{GfxError, GfxResult};
use crate::image::Image;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn pick_depth_format(driver: &dyn Driver) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&fmt| {
        driver
            .format_properties(fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Depth attachment sized to the presentable chain.
#[derive(Debug)]
pub struct DepthTarget {
    image: Image,
    format: vk::Format,
}

impl DepthTarget {
    pub fn new(ctx: &Context, extent: vk::Extent2D) -> GfxResult<Self> {
        let format = pick_depth_format(ctx.driver()?)
            .ok_or_else(|| GfxError::init("no supported depth attachment format"))?;
        let image = Self::create_image(ctx, extent, format)?;
        Ok(Self { image, format })
    }

    fn create_image(ctx: &Context, extent: vk::Extent2D, format: vk::Format) -> GfxResult<Image> {
        Image::new_2d(
            ctx,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(format),
        )
    }

    /// Rebuilds the image when `extent` differs. Same format.
    /// Callers must have idled the device.
    pub fn resize(&mut self, ctx: &Context, extent: vk::Extent2D) -> GfxResult<()> {
        if self.image.is_bound() && self.image.extent() == extent {
            return Ok(());
        }
        self.image.shutdown(ctx);
        self.image = Self::create_image(ctx, extent, self.format)?;
        debug!("depth target resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    pub fn shutdown(&mut self, ctx: &Context) {
        self.image.shutdown(ctx);
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}
