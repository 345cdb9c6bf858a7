// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral types shared by the window layer, the math layer and the
//! Vulkan backend.

pub use raw_window_handle;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized drawable.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// What the presentation layer needs from a window.
pub trait WindowSurface {
    /// Current drawable size in pixels. May be zero while minimized.
    fn drawable_size(&self) -> RenderSize;

    /// Block until the windowing system has delivered more events.
    fn wait_events(&self);
}

/// Produces the per-frame view-projection matrix (column-major).
pub trait ViewProjection {
    fn view_projection(&self, aspect: f32) -> [[f32; 4]; 4];
}

/// Outcome of one frame-loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and queued for presentation.
    Presented,
    /// The presentable chain went stale and has been rebuilt. The frame may
    /// or may not have reached the screen.
    Skipped,
}

impl FrameStatus {
    pub fn presented(self) -> bool {
        matches!(self, FrameStatus::Presented)
    }
}
