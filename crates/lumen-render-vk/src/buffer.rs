use ash::vk;
use tracing::warn;

use crate::context::Context;
use crate::error::{GfxError, GfxResult, VkResultExt};
use crate::memory::allocate_and_bind;
use crate::upload::Uploader;

/// A buffer with one dedicated allocation. Either fully bound or empty.
#[derive(Debug, Default)]
pub struct Buffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl Buffer {
    pub fn new(
        ctx: &Context,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GfxResult<Self> {
        if size == 0 {
            return Err(GfxError::contract("buffer size must be nonzero"));
        }
        let driver = ctx.driver()?;

        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = driver.create_buffer(&info).init_err("vkCreateBuffer")?;
        let memory = match allocate_and_bind(driver, handle, properties) {
            Ok(m) => m,
            Err(e) => {
                driver.destroy_buffer(handle);
                return Err(e);
            }
        };

        Ok(Self {
            handle,
            memory,
            size,
            properties,
        })
    }

    /// Device-local buffer filled from `data` through a temporary staging
    /// buffer. Blocks until the copy has finished.
    pub fn new_device_local(
        ctx: &Context,
        uploader: &Uploader,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> GfxResult<Self> {
        let size = data.len() as vk::DeviceSize;
        let mut staging = Buffer::new(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let result = staging.upload(ctx, data, 0).and_then(|()| {
            let mut dst = Buffer::new(
                ctx,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            match uploader.copy_buffer(ctx, &staging, &dst, size) {
                Ok(()) => Ok(dst),
                Err(e) => {
                    dst.shutdown(ctx);
                    Err(e)
                }
            }
        });

        staging.shutdown(ctx);
        result
    }

    /// Writes `data` at `offset` into a host-visible buffer.
    pub fn upload(&self, ctx: &Context, data: &[u8], offset: vk::DeviceSize) -> GfxResult<()> {
        self.check_host_range(offset, data.len())?;
        if data.is_empty() {
            return Err(GfxError::contract("upload of empty data"));
        }
        ctx.driver()?
            .write_memory(self.memory, offset, data)
            .check("map/write buffer memory")
    }

    /// Reads `out.len()` bytes at `offset` back from a host-visible buffer.
    pub fn read_back(&self, ctx: &Context, offset: vk::DeviceSize, out: &mut [u8]) -> GfxResult<()> {
        self.check_host_range(offset, out.len())?;
        ctx.driver()?
            .read_memory(self.memory, offset, out)
            .check("map/read buffer memory")
    }

    fn check_host_range(&self, offset: vk::DeviceSize, len: usize) -> GfxResult<()> {
        if !self.is_bound() {
            return Err(GfxError::contract("buffer is not bound"));
        }
        if !self
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(GfxError::contract("buffer memory is not host-visible"));
        }
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(GfxError::contract(format!(
                "range {offset}+{len} exceeds buffer size {}",
                self.size
            )));
        }
        Ok(())
    }

    /// Destroys the buffer, then frees its memory. Safe to call twice.
    pub fn shutdown(&mut self, ctx: &Context) {
        if !self.is_bound() {
            return;
        }
        if let Ok(driver) = ctx.driver() {
            driver.destroy_buffer(self.handle);
            driver.free_memory(self.memory);
        }
        self.handle = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
        self.size = 0;
    }

    pub fn is_bound(&self) -> bool {
        self.handle != vk::Buffer::null()
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.is_bound() {
            warn!("buffer of {} bytes dropped without shutdown", self.size);
        }
    }
}
