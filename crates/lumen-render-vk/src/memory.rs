use ash::prelude::VkResult;
use ash::vk;

use crate::driver::Driver;
use crate::error::{GfxError, GfxResult, VkResultExt};

/// Something that can own one dedicated device-memory allocation.
pub trait BindableResource: Copy {
    fn requirements(&self, driver: &dyn Driver) -> vk::MemoryRequirements;
    fn bind(
        &self,
        driver: &dyn Driver,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
}

impl BindableResource for vk::Buffer {
    fn requirements(&self, driver: &dyn Driver) -> vk::MemoryRequirements {
        driver.buffer_memory_requirements(*self)
    }

    fn bind(
        &self,
        driver: &dyn Driver,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        driver.bind_buffer_memory(*self, memory, offset)
    }
}

impl BindableResource for vk::Image {
    fn requirements(&self, driver: &dyn Driver) -> vk::MemoryRequirements {
        driver.image_memory_requirements(*self)
    }

    fn bind(
        &self,
        driver: &dyn Driver,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        driver.bind_image_memory(*self, memory, offset)
    }
}

/// First memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Allocates a dedicated block for `resource` and binds it at offset 0.
/// On failure nothing stays allocated; the resource itself is left to the caller.
pub(crate) fn allocate_and_bind<R: BindableResource>(
    driver: &dyn Driver,
    resource: R,
    required: vk::MemoryPropertyFlags,
) -> GfxResult<vk::DeviceMemory> {
    let req = resource.requirements(driver);
    let type_index = find_memory_type(&driver.memory_properties(), req.memory_type_bits, required)
        .ok_or_else(|| {
            GfxError::init(format!(
                "no memory type in mask {:#b} with {:?}",
                req.memory_type_bits, required
            ))
        })?;

    let memory = driver
        .allocate_memory(req.size, type_index)
        .init_err("vkAllocateMemory")?;
    if let Err(e) = resource.bind(driver, memory, 0) {
        driver.free_memory(memory);
        return Err(GfxError::init(format!("bind memory: {e}")));
    }
    Ok(memory)
}
