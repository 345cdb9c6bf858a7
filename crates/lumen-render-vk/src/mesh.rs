use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::buffer::Buffer;
use crate::context::Context;
use crate::error::{GfxError, GfxResult};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// Device-local geometry. `indices` may be absent for non-indexed draws.
#[derive(Debug)]
pub struct Mesh {
    vertices: Buffer,
    indices: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn new(ctx: &Context, vertices: &[Vertex], indices: &[u32]) -> GfxResult<Self> {
        if vertices.is_empty() {
            return Err(GfxError::contract("mesh has no vertices"));
        }
        let uploader = ctx.uploader()?;

        let mut vbuf = Buffer::new_device_local(
            ctx,
            uploader,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let ibuf = if indices.is_empty() {
            None
        } else {
            match Buffer::new_device_local(
                ctx,
                uploader,
                bytemuck::cast_slice(indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            ) {
                Ok(b) => Some(b),
                Err(e) => {
                    vbuf.shutdown(ctx);
                    return Err(e);
                }
            }
        };

        Ok(Self {
            vertices: vbuf,
            indices: ibuf,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    pub fn shutdown(&mut self, ctx: &Context) {
        if let Some(mut ib) = self.indices.take() {
            ib.shutdown(ctx);
        }
        self.vertices.shutdown(ctx);
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.handle()
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.indices.as_ref().map(Buffer::handle)
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }
}
