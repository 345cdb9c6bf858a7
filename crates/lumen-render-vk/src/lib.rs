//! Vulkan backend: device context, GPU resources and the frame loop.
//!
//! Components are created in dependency order (context, swapchain, depth,
//! pipeline, frame engine, meshes) and must be shut down in reverse. Each one
//! takes the `Context` by reference instead of holding on to it.
#![deny(unsafe_op_in_unsafe_fn)]

mod buffer;
mod context;
mod debug;
mod depth;
mod driver;
mod error;
mod frame;
mod image;
mod memory;
mod mesh;
mod pipeline;
mod shader;
mod swapchain;
mod upload;
mod vulkan;

#[cfg(test)]
mod fake;

pub use ash::vk;

pub use buffer::Buffer;
pub use context::{Context, ContextOptions};
pub use depth::{depth_aspect, has_stencil, pick_depth_format, DepthTarget};
pub use driver::{DeviceQueues, Driver, Submission};
pub use error::{GfxError, GfxResult};
pub use frame::{FrameEngine, FrameTargets, MAX_FRAMES_IN_FLIGHT};
pub use image::Image;
pub use memory::{find_memory_type, BindableResource};
pub use mesh::{Mesh, Vertex};
pub use pipeline::{Pipeline, PUSH_CONSTANT_SIZE};
pub use shader::ShaderCode;
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, ChainState,
    Swapchain,
};
pub use upload::Uploader;
pub use vulkan::VulkanDriver;
