// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;
use std::time::Duration;

use lumen_render::{RenderSize, WindowSurface};
use winit::window::Window;

pub use winit;

// winit only delivers events to the running ApplicationHandler, so a blocking
// wait from inside a handler is a short sleep instead.
const EVENT_WAIT: Duration = Duration::from_millis(16);

/// `WindowSurface` over a winit window.
#[derive(Clone)]
pub struct WinitSurface {
    window: Arc<Window>,
}

impl WinitSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl WindowSurface for WinitSurface {
    fn drawable_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }

    fn wait_events(&self) {
        tracing::trace!("drawable is empty, waiting");
        std::thread::sleep(EVENT_WAIT);
    }
}
