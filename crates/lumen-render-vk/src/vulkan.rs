//! `Driver` backed by a real Vulkan device through `ash`.

use std::ffi::{c_char, CStr};

use ash::ext::debug_utils;
use ash::khr::{portability_enumeration, portability_subset, surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info, warn};

use crate::context::ContextOptions;
use crate::debug;
use crate::driver::{DeviceQueues, Driver, Submission};
use crate::error::{GfxError, GfxResult, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

struct Messenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

pub struct VulkanDriver {
    _entry: Entry,
    instance: Instance,
    messenger: Option<Messenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    adapter_name: String,
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    queues: DeviceQueues,

    alive: bool,
}

fn has_extension(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|p| p.extension_name_as_c_str().is_ok_and(|n| n == name))
}

/// First family doing both graphics and present wins; otherwise the first
/// graphics family paired with the first present family.
pub(crate) fn pick_queue_families(families: &[(vk::QueueFlags, bool)]) -> Option<(u32, u32)> {
    if let Some(i) = families
        .iter()
        .position(|(flags, present)| flags.contains(vk::QueueFlags::GRAPHICS) && *present)
    {
        return Some((i as u32, i as u32));
    }
    let graphics = families
        .iter()
        .position(|(flags, _)| flags.contains(vk::QueueFlags::GRAPHICS))?;
    let present = families.iter().position(|(_, present)| *present)?;
    Some((graphics as u32, present as u32))
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    options: &ContextOptions,
) -> GfxResult<(Instance, bool)> {
    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .init_err("enumerate_instance_extension_properties")?;

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .init_err("enumerate_required_extensions")?
        .to_vec();

    let mut flags = vk::InstanceCreateFlags::empty();
    if has_extension(&available, portability_enumeration::NAME) {
        extensions.push(portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let mut layers: Vec<*const c_char> = Vec::new();
    if options.enable_validation {
        let layer_props = unsafe { entry.enumerate_instance_layer_properties() }
            .init_err("enumerate_instance_layer_properties")?;
        let present = layer_props
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
        if present {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
    }

    let want_messenger = options.enable_validation
        && options.enable_debug_output
        && has_extension(&available, debug_utils::NAME);
    if want_messenger {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"Renderer")
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"Lumen")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_1);

    // Chained so instance creation and destruction are covered too.
    let mut instance_debug = debug::messenger_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers)
        .flags(flags);
    if want_messenger {
        create_info = create_info.push_next(&mut instance_debug);
    }

    let instance =
        unsafe { entry.create_instance(&create_info, None) }.init_err("vkCreateInstance")?;
    Ok((instance, want_messenger))
}

struct Selected {
    phys: vk::PhysicalDevice,
    graphics_family: u32,
    present_family: u32,
    portability_subset: bool,
    name: String,
}

unsafe fn select_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> GfxResult<Selected> {
    let adapters =
        unsafe { instance.enumerate_physical_devices() }.init_err("enumerate_physical_devices")?;
    if adapters.is_empty() {
        return Err(GfxError::init("no Vulkan-capable adapter found"));
    }

    for phys in adapters {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());

        let families: Vec<(vk::QueueFlags, bool)> =
            unsafe { instance.get_physical_device_queue_family_properties(phys) }
                .iter()
                .enumerate()
                .map(|(i, q)| {
                    let present = unsafe {
                        surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
                    }
                    .unwrap_or(false);
                    (q.queue_flags, present)
                })
                .collect();

        let Some((graphics_family, present_family)) = pick_queue_families(&families) else {
            debug!("adapter {name}: no graphics+present queue families");
            continue;
        };

        let exts = match unsafe { instance.enumerate_device_extension_properties(phys) } {
            Ok(e) => e,
            Err(e) => {
                debug!("adapter {name}: cannot list extensions ({e})");
                continue;
            }
        };
        if !has_extension(&exts, swapchain::NAME) {
            debug!("adapter {name}: missing {:?}", swapchain::NAME);
            continue;
        }

        return Ok(Selected {
            phys,
            graphics_family,
            present_family,
            portability_subset: has_extension(&exts, portability_subset::NAME),
            name,
        });
    }

    Err(GfxError::init(
        "no adapter with graphics + present queues and VK_KHR_swapchain",
    ))
}

unsafe fn create_device(instance: &Instance, selected: &Selected) -> GfxResult<ash::Device> {
    let priorities = [1.0f32];
    let mut families = vec![selected.graphics_family];
    if selected.present_family != selected.graphics_family {
        families.push(selected.present_family);
    }
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();

    let mut extensions = vec![swapchain::NAME.as_ptr()];
    if selected.portability_subset {
        extensions.push(portability_subset::NAME.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default();
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(selected.phys, &create_info, None) }.init_err("vkCreateDevice")
}

impl VulkanDriver {
    // STRICT ORDER:
    // 1) instance (+ messenger)
    // 2) surface from THIS instance
    // 3) adapter chosen against the surface (present support)
    // 4) device + queues
    // Any failure unwinds what was already built.
    pub fn new<W>(window: &W, options: &ContextOptions) -> GfxResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let display_raw = window
            .display_handle()
            .map_err(|e| GfxError::init(format!("display handle: {e}")))?
            .as_raw();
        let window_raw = window
            .window_handle()
            .map_err(|e| GfxError::init(format!("window handle: {e}")))?
            .as_raw();

        let entry = unsafe { Entry::load() }
            .map_err(|e| GfxError::init(format!("Vulkan loader: {e}")))?;

        let (instance, want_messenger) = unsafe { create_instance(&entry, display_raw, options)? };

        let messenger = if want_messenger {
            let loader = debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&debug::messenger_info(), None) } {
                Ok(handle) => Some(Messenger { loader, handle }),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let unwind_instance = |messenger: Option<Messenger>| unsafe {
            if let Some(m) = messenger {
                m.loader.destroy_debug_utils_messenger(m.handle, None);
            }
            instance.destroy_instance(None);
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_raw, window_raw, None)
        } {
            Ok(s) => s,
            Err(e) => {
                unwind_instance(messenger);
                return Err(GfxError::init(format!("create_surface: {e}")));
            }
        };

        let built = unsafe { select_adapter(&instance, &surface_loader, surface) }.and_then(
            |selected| {
                let device = unsafe { create_device(&instance, &selected)? };
                Ok((selected, device))
            },
        );
        let (selected, device) = match built {
            Ok(v) => v,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                unwind_instance(messenger);
                return Err(e);
            }
        };

        let queues = unsafe {
            DeviceQueues {
                graphics_family: selected.graphics_family,
                present_family: selected.present_family,
                graphics: device.get_device_queue(selected.graphics_family, 0),
                present: device.get_device_queue(selected.present_family, 0),
            }
        };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        info!("GPU: {}", selected.name);

        Ok(Self {
            _entry: entry,
            instance,
            messenger,
            surface_loader,
            surface,
            phys: selected.phys,
            adapter_name: selected.name,
            device,
            swapchain_loader,
            queues,
            alive: true,
        })
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Driver for VulkanDriver {
    fn queues(&self) -> DeviceQueues {
        self.queues
    }

    fn adapter_name(&self) -> String {
        self.adapter_name.clone()
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.instance.get_physical_device_memory_properties(self.phys) }
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: size,
            memory_type_index,
            ..Default::default()
        };
        unsafe { self.device.allocate_memory(&info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        unsafe {
            let ptr = self.device.map_memory(
                memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()> {
        unsafe {
            let ptr = self.device.map_memory(
                memory,
                offset,
                out.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), out.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        unsafe { self.device.create_image(info, None) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, offset) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_command_pool(
        &self,
        family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: family,
            flags,
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(pool, buffers) }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region))
        }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe {
            self.device
                .cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport))
        }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor))
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        bytes: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, 0, bytes) }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32)
        }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, 1, 0, 0) }
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn queue_submit(&self, queue: vk::Queue, submission: &Submission) -> VkResult<()> {
        let cmds = [submission.command_buffer];
        let (wait_sems, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal_sems: Vec<_> = submission.signal.into_iter().collect();
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_sems)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal_sems);
        unsafe {
            self.device
                .queue_submit(queue, std::slice::from_ref(&info), submission.fence)
        }
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(queue) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        }
        .map_err(|(_, e)| e)?;
        pipelines
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.phys, self.surface)
        }
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.phys, self.surface)
        }
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        // The surface is owned here; callers leave it null.
        let info = vk::SwapchainCreateInfoKHR {
            surface: self.surface,
            ..*info
        };
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let waits = [wait];
        let swapchains = [swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { self.swapchain_loader.queue_present(queue, &info) }
    }

    // STRICT TEARDOWN ORDER: device → surface → debug messenger → instance.
    fn shutdown(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(m) = self.messenger.take() {
                m.loader.destroy_debug_utils_messenger(m.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
