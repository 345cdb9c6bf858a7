use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::driver::{DeviceQueues, Driver};
use crate::error::{GfxError, GfxResult, VkResultExt};
use crate::upload::Uploader;
use crate::vulkan::VulkanDriver;

#[derive(Clone, Copy, Debug)]
pub struct ContextOptions {
    /// Enable `VK_LAYER_KHRONOS_validation` when the loader has it.
    pub enable_validation: bool,
    /// Route validation output through a debug messenger.
    pub enable_debug_output: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            enable_debug_output: cfg!(debug_assertions),
        }
    }
}

/// Process-wide device context: driver, queues and the startup uploader.
///
/// Created first and shut down last. Every other component takes it by
/// reference and must be shut down before it.
pub struct Context {
    driver: Option<Box<dyn Driver>>,
    queues: DeviceQueues,
    uploader: Option<Uploader>,
}

impl Context {
    pub fn new<W>(window: &W, options: &ContextOptions) -> GfxResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let driver = VulkanDriver::new(window, options)?;
        Self::from_driver(Box::new(driver))
    }

    /// Wraps an already-created device and creates the uploader on it.
    pub fn from_driver(driver: Box<dyn Driver>) -> GfxResult<Self> {
        let queues = driver.queues();
        info!(
            "device ready: {} (graphics family {}, present family {})",
            driver.adapter_name(),
            queues.graphics_family,
            queues.present_family
        );

        let mut ctx = Self {
            driver: Some(driver),
            queues,
            uploader: None,
        };
        match Uploader::new(&ctx) {
            Ok(up) => ctx.uploader = Some(up),
            Err(e) => {
                ctx.shutdown();
                return Err(e);
            }
        }
        Ok(ctx)
    }

    pub fn driver(&self) -> GfxResult<&dyn Driver> {
        self.driver
            .as_deref()
            .ok_or_else(|| GfxError::contract("device context already shut down"))
    }

    pub fn queues(&self) -> DeviceQueues {
        self.queues
    }

    pub fn uploader(&self) -> GfxResult<&Uploader> {
        self.uploader
            .as_ref()
            .ok_or_else(|| GfxError::contract("uploader is not available"))
    }

    /// Blocks until the device has finished all submitted work.
    pub fn wait_idle(&self) -> GfxResult<()> {
        self.driver()?.device_wait_idle().check("device_wait_idle")
    }

    pub fn is_alive(&self) -> bool {
        self.driver.is_some()
    }

    // STRICT ORDER: uploader → device → surface → debug messenger → instance.
    // The last four happen inside Driver::shutdown.
    pub fn shutdown(&mut self) {
        if let Some(mut up) = self.uploader.take() {
            up.shutdown(self);
        }
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
            info!("device context shut down");
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
