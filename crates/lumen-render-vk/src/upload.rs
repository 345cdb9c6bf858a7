use ash::vk;
use tracing::warn;

use crate::buffer::Buffer;
use crate::context::Context;
use crate::driver::Submission;
use crate::error::{GfxError, GfxResult, VkResultExt};

/// One-shot command recording for startup transfers.
///
/// Every submission drains the graphics queue before returning, so this is
/// only meant for load-time uploads.
#[derive(Debug)]
pub struct Uploader {
    pool: vk::CommandPool,
}

impl Uploader {
    pub fn new(ctx: &Context) -> GfxResult<Self> {
        let pool = ctx
            .driver()?
            .create_command_pool(
                ctx.queues().graphics_family,
                vk::CommandPoolCreateFlags::TRANSIENT,
            )
            .init_err("vkCreateCommandPool(upload)")?;
        Ok(Self { pool })
    }

    /// Allocates a primary command buffer and begins it for one submission.
    pub fn begin(&self, ctx: &Context) -> GfxResult<vk::CommandBuffer> {
        if self.pool == vk::CommandPool::null() {
            return Err(GfxError::contract("uploader used after shutdown"));
        }
        let driver = ctx.driver()?;
        let cmd = driver
            .allocate_command_buffers(self.pool, 1)
            .check("allocate upload command buffer")?
            .into_iter()
            .next()
            .ok_or_else(|| GfxError::contract("driver returned no command buffer"))?;

        if let Err(e) = driver.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        {
            driver.free_command_buffers(self.pool, &[cmd]);
            return Err(GfxError::Driver {
                what: "begin upload command buffer",
                result: e,
            });
        }
        Ok(cmd)
    }

    /// Ends `cmd`, submits it, waits for the graphics queue to go idle and
    /// frees the buffer. The buffer is freed on every path.
    pub fn end_and_submit(&self, ctx: &Context, cmd: vk::CommandBuffer) -> GfxResult<()> {
        if self.pool == vk::CommandPool::null() {
            return Err(GfxError::contract("uploader used after shutdown"));
        }
        let driver = ctx.driver()?;
        let queue = ctx.queues().graphics;

        let result = driver
            .end_command_buffer(cmd)
            .check("end upload command buffer")
            .and_then(|()| {
                driver
                    .queue_submit(queue, &Submission::unsynchronized(cmd))
                    .check("submit upload")
            })
            .and_then(|()| driver.queue_wait_idle(queue).check("wait for upload"));

        driver.free_command_buffers(self.pool, &[cmd]);
        result
    }

    /// Records and runs a full-size `src → dst` copy.
    pub fn copy_buffer(
        &self,
        ctx: &Context,
        src: &Buffer,
        dst: &Buffer,
        size: vk::DeviceSize,
    ) -> GfxResult<()> {
        if size > src.size() || size > dst.size() {
            return Err(GfxError::contract(format!(
                "copy of {size} bytes exceeds src {} / dst {}",
                src.size(),
                dst.size()
            )));
        }
        let cmd = self.begin(ctx)?;
        ctx.driver()?
            .cmd_copy_buffer(cmd, src.handle(), dst.handle(), size);
        self.end_and_submit(ctx, cmd)
    }

    pub fn shutdown(&mut self, ctx: &Context) {
        if self.pool == vk::CommandPool::null() {
            return;
        }
        if let Ok(driver) = ctx.driver() {
            driver.destroy_command_pool(self.pool);
        }
        self.pool = vk::CommandPool::null();
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        if self.pool != vk::CommandPool::null() {
            warn!("uploader dropped without shutdown");
        }
    }
}
