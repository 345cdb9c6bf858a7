// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod obj;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Parser;
use lumen_core::init_tracing;
use lumen_math::{glam::Vec3, Camera};
use lumen_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use lumen_platform::WinitSurface;
use lumen_render::FrameStatus;
use lumen_render_vk::{
    Context, ContextOptions, DepthTarget, FrameEngine, FrameTargets, Mesh, Pipeline, ShaderCode,
    Swapchain, Vertex,
};
use tracing::{error, info, warn};

use config::AppCfg;

const BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
const BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// OBJ model to show (overrides `[assets] model`)
    #[arg(long)]
    model: Option<PathBuf>,
    /// Run without the validation layer
    #[arg(long)]
    no_validation: bool,
}

fn shader(path: Option<&Path>, builtin: &[u8]) -> Result<ShaderCode> {
    match path {
        Some(p) => ShaderCode::load(p).with_context(|| format!("shader {}", p.display())),
        None => Ok(ShaderCode::from_bytes(builtin)?),
    }
}

// Pseudo color from position, stable across runs.
fn vertices(mesh: &obj::ObjMesh) -> Vec<Vertex> {
    mesh.positions
        .iter()
        .map(|&[x, y, z]| Vertex {
            pos: [x, y, z],
            color: [0.5 + 0.5 * x, 0.5 + 0.5 * y, 0.5 + 0.5 * z],
        })
        .collect()
}

fn camera(cfg: &config::CameraCfg) -> Camera {
    Camera {
        fovy: cfg.fov_degrees.to_radians(),
        near: cfg.near,
        far: cfg.far,
        eye: Vec3::from_array(cfg.eye),
        center: Vec3::from_array(cfg.target),
        up: Vec3::Y,
    }
}

/// Everything that lives on the device, in creation order.
struct Renderer {
    ctx: Context,
    swapchain: Swapchain,
    depth: DepthTarget,
    pipeline: Pipeline,
    engine: FrameEngine,
    mesh: Mesh,
}

impl Renderer {
    // STRICT INIT ORDER: context → swapchain → depth → pipeline → frame engine → mesh.
    // A failure tears down whatever already exists, newest first.
    fn new(surface: &WinitSurface, cfg: &AppCfg) -> Result<Self> {
        let model = obj::load(&cfg.assets.model)
            .with_context(|| format!("model {}", cfg.assets.model.display()))?;
        let verts = vertices(&model);
        let vert = shader(cfg.assets.vertex_shader.as_deref(), BUILTIN_VERT)?;
        let frag = shader(cfg.assets.fragment_shader.as_deref(), BUILTIN_FRAG)?;

        let options = ContextOptions {
            enable_validation: cfg.render.validation,
            enable_debug_output: cfg.render.debug_output,
        };
        let mut ctx = Context::new(surface.window(), &options).context("device context")?;

        let mut swapchain = Swapchain::new(&ctx, surface)
            .inspect_err(|_| ctx.shutdown())
            .context("swapchain")?;

        let mut depth = DepthTarget::new(&ctx, swapchain.extent())
            .inspect_err(|_| {
                swapchain.shutdown(&ctx);
                ctx.shutdown();
            })
            .context("depth target")?;

        let mut pipeline = Pipeline::new(&ctx, swapchain.format(), depth.format(), &vert, &frag)
            .inspect_err(|_| {
                depth.shutdown(&ctx);
                swapchain.shutdown(&ctx);
                ctx.shutdown();
            })
            .context("pipeline")?;

        let mut engine = FrameEngine::new(&ctx, &swapchain, &depth, &pipeline)
            .inspect_err(|_| {
                pipeline.shutdown(&ctx);
                depth.shutdown(&ctx);
                swapchain.shutdown(&ctx);
                ctx.shutdown();
            })
            .context("frame engine")?;
        engine.set_clear_color(cfg.render.clear_color);

        let mesh = Mesh::new(&ctx, &verts, &model.indices)
            .inspect_err(|_| {
                engine.shutdown(&ctx);
                pipeline.shutdown(&ctx);
                depth.shutdown(&ctx);
                swapchain.shutdown(&ctx);
                ctx.shutdown();
            })
            .context("mesh upload")?;
        info!(
            "mesh: {} vertices, {} indices",
            mesh.vertex_count(),
            mesh.index_count()
        );

        Ok(Self {
            ctx,
            swapchain,
            depth,
            pipeline,
            engine,
            mesh,
        })
    }

    fn draw(&mut self, surface: &WinitSurface, camera: &Camera) -> Result<FrameStatus> {
        let mut targets = FrameTargets {
            swapchain: &mut self.swapchain,
            depth: &mut self.depth,
            pipeline: &mut self.pipeline,
        };
        let status = self
            .engine
            .draw_frame(&self.ctx, surface, &mut targets, &self.mesh, camera)?;
        Ok(status)
    }

    // STRICT TEARDOWN ORDER: idle, then the reverse of creation.
    fn shutdown(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("wait_idle before teardown: {e}");
        }
        self.mesh.shutdown(&self.ctx);
        self.engine.shutdown(&self.ctx);
        self.pipeline.shutdown(&self.ctx);
        self.depth.shutdown(&self.ctx);
        self.swapchain.shutdown(&self.ctx);
        self.ctx.shutdown();
    }
}

struct App {
    cfg: AppCfg,
    camera: Camera,
    surface: Option<WinitSurface>,
    renderer: Option<Renderer>,
    fatal: Option<anyhow::Error>,

    paused: bool,
    occluded: bool,
    frames: u32,
    skipped: u32,
    last_fps_instant: Instant,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.teardown();
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn teardown(&mut self) {
        if let Some(mut r) = self.renderer.take() {
            r.shutdown();
            info!("renderer shut down");
        }
    }

    fn request_redraw(&self) {
        if let Some(s) = &self.surface {
            s.window().request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.surface.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => return self.fail(event_loop, anyhow::Error::new(e).context("create window")),
        };
        let surface = WinitSurface::new(window);

        match Renderer::new(&surface, &self.cfg) {
            Ok(r) => self.renderer = Some(r),
            Err(e) => return self.fail(event_loop, e.context("init failed")),
        }
        let size = surface.window().inner_size();
        self.paused = size.width == 0 || size.height == 0;
        self.surface = Some(surface);
        info!("resumed → paused={}", self.paused);
        self.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(s) = &self.surface {
            if window_id != s.window().id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.teardown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                let now_paused = self.occluded || size.width == 0 || size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Resized → {}x{} (paused={})", size.width, size.height, self.paused);
                }
                if let Some(r) = &mut self.renderer {
                    r.engine.request_rebuild();
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                let size = self
                    .surface
                    .as_ref()
                    .map(|s| s.window().inner_size())
                    .unwrap_or_default();
                let now_paused = occluded || size.width == 0 || size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let (Some(surface), Some(renderer)) = (&self.surface, &mut self.renderer) else {
                    return;
                };
                match renderer.draw(surface, &self.camera) {
                    Ok(FrameStatus::Presented) => self.frames = self.frames.saturating_add(1),
                    Ok(FrameStatus::Skipped) => self.skipped = self.skipped.saturating_add(1),
                    Err(e) => self.fail(event_loop, e.context("draw_frame")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }
        if self.paused {
            // Minimized or occluded: sleep until the window changes.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        self.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {} ({} skipped)", self.frames, self.skipped);
            self.frames = 0;
            self.skipped = 0;
            self.last_fps_instant = now;
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut cfg, cfg_err) = match config::load(&args.config) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppCfg::default(), Some(e)),
    };
    init_tracing(&cfg.log.filter);
    if let Some(e) = cfg_err {
        warn!("{e}; using defaults");
    }

    if let Some(model) = args.model {
        cfg.assets.model = model;
    }
    if args.no_validation {
        cfg.render.validation = false;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        camera: camera(&cfg.camera),
        cfg,
        surface: None,
        renderer: None,
        fatal: None,
        paused: false,
        occluded: false,
        frames: 0,
        skipped: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
