use ash::vk;
use lumen_render::{FrameStatus, ViewProjection, WindowSurface};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::depth::DepthTarget;
use crate::driver::{Driver, Submission};
use crate::error::{GfxError, GfxResult, VkResultExt};
use crate::mesh::Mesh;
use crate::pipeline::Pipeline;
use crate::swapchain::Swapchain;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug)]
struct FrameSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Everything a rebuild may replace. Borrowed for one frame.
pub struct FrameTargets<'a> {
    pub swapchain: &'a mut Swapchain,
    pub depth: &'a mut DepthTarget,
    pub pipeline: &'a mut Pipeline,
}

/// Per-image framebuffers and command buffers plus the frames-in-flight ring.
#[derive(Debug)]
pub struct FrameEngine {
    pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    framebuffers: Vec<vk::Framebuffer>,
    // Slot fence that last submitted work for each chain image.
    image_fences: Vec<vk::Fence>,
    frames: Vec<FrameSync>,
    frame_index: usize,

    clear_color: [f32; 4],
    rebuild_requested: bool,
    rebuilds: u64,
}

impl FrameEngine {
    pub fn new(
        ctx: &Context,
        swapchain: &Swapchain,
        depth: &DepthTarget,
        pipeline: &Pipeline,
    ) -> GfxResult<Self> {
        let mut engine = Self {
            pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            framebuffers: Vec::new(),
            image_fences: Vec::new(),
            frames: Vec::new(),
            frame_index: 0,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            rebuild_requested: false,
            rebuilds: 0,
        };
        if let Err(e) = engine.init(ctx, swapchain, depth, pipeline) {
            engine.shutdown(ctx);
            return Err(e);
        }
        info!(
            "frame engine ready: {} images, {} frames in flight",
            engine.command_buffers.len(),
            MAX_FRAMES_IN_FLIGHT
        );
        Ok(engine)
    }

    fn init(
        &mut self,
        ctx: &Context,
        swapchain: &Swapchain,
        depth: &DepthTarget,
        pipeline: &Pipeline,
    ) -> GfxResult<()> {
        let driver = ctx.driver()?;

        self.pool = driver
            .create_command_pool(
                ctx.queues().graphics_family,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .init_err("vkCreateCommandPool(frame)")?;
        self.allocate_command_buffers(driver, swapchain.image_count())
            .map_err(|e| GfxError::init(e.to_string()))?;
        self.create_framebuffers(driver, swapchain, depth, pipeline)
            .map_err(|e| GfxError::init(e.to_string()))?;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let image_available = driver
                .create_semaphore()
                .init_err("vkCreateSemaphore(image available)")?;
            let render_finished = match driver.create_semaphore() {
                Ok(s) => s,
                Err(e) => {
                    driver.destroy_semaphore(image_available);
                    return Err(GfxError::init(format!("vkCreateSemaphore(render finished): {e}")));
                }
            };
            // Signaled so the first wait on each slot returns immediately.
            let in_flight = match driver.create_fence(true) {
                Ok(f) => f,
                Err(e) => {
                    driver.destroy_semaphore(image_available);
                    driver.destroy_semaphore(render_finished);
                    return Err(GfxError::init(format!("vkCreateFence: {e}")));
                }
            };
            self.frames.push(FrameSync {
                image_available,
                render_finished,
                in_flight,
            });
        }
        Ok(())
    }

    fn allocate_command_buffers(&mut self, driver: &dyn Driver, count: usize) -> GfxResult<()> {
        self.command_buffers = driver
            .allocate_command_buffers(self.pool, count as u32)
            .check("allocate frame command buffers")?;
        self.image_fences = vec![vk::Fence::null(); count];
        Ok(())
    }

    fn create_framebuffers(
        &mut self,
        driver: &dyn Driver,
        swapchain: &Swapchain,
        depth: &DepthTarget,
        pipeline: &Pipeline,
    ) -> GfxResult<()> {
        let extent = swapchain.extent();
        for &view in swapchain.views() {
            let attachments = [view, depth.view()];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(pipeline.render_pass())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let fb = driver
                .create_framebuffer(&info)
                .check("vkCreateFramebuffer")?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    fn destroy_framebuffers(&mut self, driver: &dyn Driver) {
        for fb in self.framebuffers.drain(..) {
            driver.destroy_framebuffer(fb);
        }
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait on this slot's fence (its previous submission is done)
    // 2) acquire, signaling this slot's image_available
    // 3) wait for whichever slot last used the acquired image, then re-record it
    // 4) reset the slot fence and submit (wait image_available, signal render_finished + fence)
    // 5) present, waiting on render_finished
    // 6) advance the slot, on every path that reaches it
    // The fence is only reset once a submit is certain, so a stale acquire
    // never leaves the slot waiting on a fence nothing will signal.
    pub fn draw_frame(
        &mut self,
        ctx: &Context,
        window: &dyn WindowSurface,
        targets: &mut FrameTargets<'_>,
        mesh: &Mesh,
        camera: &dyn ViewProjection,
    ) -> GfxResult<FrameStatus> {
        if self.frames.len() != MAX_FRAMES_IN_FLIGHT {
            return Err(GfxError::contract("frame engine is not initialized"));
        }
        let driver = ctx.driver()?;
        let queues = ctx.queues();
        let slot = self.frames[self.frame_index];

        driver
            .wait_for_fence(slot.in_flight)
            .check("wait for frame fence")?;

        let (image_index, acquire_suboptimal) =
            match driver.acquire_next_image(targets.swapchain.handle(), slot.image_available) {
                Ok(pair) => pair,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("acquire: out of date");
                    self.rebuild(ctx, window, targets)?;
                    self.advance();
                    return Ok(FrameStatus::Skipped);
                }
                Err(result) => {
                    return Err(GfxError::Driver {
                        what: "acquire_next_image",
                        result,
                    })
                }
            };

        let img = image_index as usize;
        if img >= self.command_buffers.len() || img >= self.framebuffers.len() {
            return Err(GfxError::contract(format!(
                "acquired image {img} but only {} are prepared",
                self.command_buffers.len().min(self.framebuffers.len())
            )));
        }

        let previous = self.image_fences[img];
        if previous != vk::Fence::null() && previous != slot.in_flight {
            driver
                .wait_for_fence(previous)
                .check("wait for image fence")?;
        }
        self.image_fences[img] = slot.in_flight;

        let cmd = self.command_buffers[img];
        self.record(driver, cmd, img, targets, mesh, camera)?;

        driver
            .reset_fence(slot.in_flight)
            .check("reset frame fence")?;
        driver
            .queue_submit(
                queues.graphics,
                &Submission {
                    command_buffer: cmd,
                    wait: Some((
                        slot.image_available,
                        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    )),
                    signal: Some(slot.render_finished),
                    fence: slot.in_flight,
                },
            )
            .check("queue_submit")?;

        let stale = match driver.queue_present(
            queues.present,
            targets.swapchain.handle(),
            image_index,
            slot.render_finished,
        ) {
            Ok(suboptimal) => suboptimal || acquire_suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(result) => {
                return Err(GfxError::Driver {
                    what: "queue_present",
                    result,
                })
            }
        };

        let status = if stale {
            debug!("present: swapchain stale");
            self.rebuild(ctx, window, targets)?;
            FrameStatus::Skipped
        } else {
            if self.rebuild_requested {
                self.rebuild(ctx, window, targets)?;
            }
            FrameStatus::Presented
        };
        self.advance();
        Ok(status)
    }

    fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    fn record(
        &self,
        driver: &dyn Driver,
        cmd: vk::CommandBuffer,
        img: usize,
        targets: &FrameTargets<'_>,
        mesh: &Mesh,
        camera: &dyn ViewProjection,
    ) -> GfxResult<()> {
        let extent = targets.swapchain.extent();
        let pipeline = &targets.pipeline;

        driver
            .reset_command_buffer(cmd)
            .check("reset command buffer")?;
        driver
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty())
            .check("begin command buffer")?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        driver.cmd_begin_render_pass(
            cmd,
            pipeline.render_pass(),
            self.framebuffers[img],
            extent,
            &clears,
        );
        driver.cmd_bind_pipeline(cmd, pipeline.handle());
        driver.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        driver.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let view_proj = camera.view_projection(aspect);
        driver.cmd_push_constants(
            cmd,
            pipeline.layout(),
            vk::ShaderStageFlags::VERTEX,
            bytemuck::bytes_of(&view_proj),
        );

        driver.cmd_bind_vertex_buffer(cmd, mesh.vertex_buffer());
        match mesh.index_buffer() {
            Some(ib) => {
                driver.cmd_bind_index_buffer(cmd, ib);
                driver.cmd_draw_indexed(cmd, mesh.index_count());
            }
            None => driver.cmd_draw(cmd, mesh.vertex_count()),
        }

        driver.cmd_end_render_pass(cmd);
        driver.end_command_buffer(cmd).check("end command buffer")
    }

    // STRICT ORDER (rebuild):
    // 1) device_wait_idle
    // 2) drop framebuffers (they reference the chain views)
    // 3) recreate the chain
    // 4) depth follows the new extent, pipeline the new format
    // 5) command buffers follow the new image count
    // 6) framebuffers for the new views
    fn rebuild(
        &mut self,
        ctx: &Context,
        window: &dyn WindowSurface,
        targets: &mut FrameTargets<'_>,
    ) -> GfxResult<()> {
        let driver = ctx.driver()?;
        driver
            .device_wait_idle()
            .check("device_wait_idle(rebuild)")?;

        self.destroy_framebuffers(driver);
        targets.swapchain.recreate(ctx, window)?;
        targets.depth.resize(ctx, targets.swapchain.extent())?;
        targets
            .pipeline
            .recreate(ctx, targets.swapchain.format())?;

        let count = targets.swapchain.image_count();
        if self.command_buffers.len() != count {
            driver.free_command_buffers(self.pool, &self.command_buffers);
            self.command_buffers.clear();
            self.allocate_command_buffers(driver, count)?;
        } else {
            self.image_fences.fill(vk::Fence::null());
        }
        self.create_framebuffers(driver, &*targets.swapchain, &*targets.depth, &*targets.pipeline)?;

        self.rebuild_requested = false;
        self.rebuilds += 1;
        info!(
            "rebuilt presentation: {}x{}, {} images (rebuild #{})",
            targets.swapchain.extent().width,
            targets.swapchain.extent().height,
            count,
            self.rebuilds
        );
        Ok(())
    }

    /// Ask for a rebuild after the next presented frame (window resized).
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn image_count(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn is_live(&self) -> bool {
        self.pool != vk::CommandPool::null()
    }

    // STRICT TEARDOWN ORDER:
    // - device_wait_idle
    // - framebuffers
    // - command buffers, then their pool
    // - per-slot semaphores and fences
    pub fn shutdown(&mut self, ctx: &Context) {
        let Ok(driver) = ctx.driver() else {
            return;
        };
        if !self.is_live() && self.frames.is_empty() {
            return;
        }
        if let Err(e) = driver.device_wait_idle() {
            warn!("device_wait_idle during frame engine shutdown: {e}");
        }

        self.destroy_framebuffers(driver);
        if self.pool != vk::CommandPool::null() {
            driver.free_command_buffers(self.pool, &self.command_buffers);
            driver.destroy_command_pool(self.pool);
        }
        self.command_buffers.clear();
        self.image_fences.clear();
        self.pool = vk::CommandPool::null();

        for f in self.frames.drain(..) {
            driver.destroy_semaphore(f.image_available);
            driver.destroy_semaphore(f.render_finished);
            driver.destroy_fence(f.in_flight);
        }
        self.frame_index = 0;
    }
}

impl Drop for FrameEngine {
    fn drop(&mut self) {
        if self.is_live() {
            warn!("frame engine dropped without shutdown");
        }
    }
}
