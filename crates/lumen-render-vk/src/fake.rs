//! In-memory `Driver` used by the unit tests.
//!
//! Submitted work completes lazily: a submission only finishes when a fence
//! covering it is waited on or a queue/device idles. That makes recycling a
//! still-executing command buffer or resetting an in-flight fence observable.
//! Misuse is collected in `violations()` instead of panicking, so a test can
//! assert on the whole run.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use lumen_render::{RenderSize, WindowSurface};

use crate::driver::{DeviceQueues, Driver, Submission};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceEvent {
    Wait,
    Reset,
    Submit,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub old: vk::SwapchainKHR,
    pub min_image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_count: u32,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending(usize),
}

struct FakeMemory {
    bytes: Vec<u8>,
    type_index: u32,
}

#[derive(Default)]
struct CmdState {
    pool: u64,
    recording: bool,
    commands: Vec<&'static str>,
    copies: Vec<(u64, u64, u64)>,
    push_constant_len: usize,
    last_submit: Option<usize>,
}

struct State {
    next: u64,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, vk::Result>,
    violations: Vec<String>,
    shutdowns: u32,

    queues: DeviceQueues,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    depth_formats: Vec<vk::Format>,
    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,

    live: HashMap<&'static str, HashSet<u64>>,
    memory: HashMap<u64, FakeMemory>,
    buffer_binding: HashMap<u64, (u64, Option<u64>)>,
    image_binding: HashMap<u64, Option<u64>>,
    views: HashMap<u64, u64>,
    framebuffers: HashMap<u64, Vec<u64>>,

    swapchains: HashMap<u64, Vec<u64>>,
    retired: HashSet<u64>,
    swapchain_images: HashSet<u64>,
    swapchain_records: Vec<SwapchainRecord>,
    next_image: HashMap<u64, u32>,
    acquire_script: VecDeque<vk::Result>,
    acquire_indices: VecDeque<u32>,
    present_script: VecDeque<vk::Result>,
    presents: Vec<(vk::SwapchainKHR, u32)>,

    pools: HashMap<u64, (u32, vk::CommandPoolCreateFlags)>,
    last_pool: (u32, vk::CommandPoolCreateFlags),
    cmds: HashMap<u64, CmdState>,

    fences: HashMap<u64, FenceState>,
    fence_log: Vec<(vk::Fence, FenceEvent)>,
    semaphores: HashMap<u64, bool>,
    submissions: Vec<Submission>,
    completed: usize,
    max_pending_fences: usize,
}

const KINDS: [&str; 14] = [
    "buffer",
    "memory",
    "image",
    "view",
    "swapchain",
    "pool",
    "command_buffer",
    "fence",
    "semaphore",
    "framebuffer",
    "render_pass",
    "layout",
    "pipeline",
    "shader",
];

fn default_memory_props() -> vk::PhysicalDeviceMemoryProperties {
    let mut props = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 2,
        memory_heap_count: 1,
        ..Default::default()
    };
    props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    props.memory_types[1].property_flags =
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    props
}

fn default_caps() -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 3,
        current_extent: vk::Extent2D {
            width: 800,
            height: 600,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        max_image_array_layers: 1,
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        ..Default::default()
    }
}

fn round_up(size: u64) -> u64 {
    size.div_ceil(256) * 256
}

impl State {
    fn new(queues: DeviceQueues) -> Self {
        Self {
            next: 0x1000,
            calls: Vec::new(),
            failures: HashMap::new(),
            violations: Vec::new(),
            shutdowns: 0,
            queues,
            memory_props: default_memory_props(),
            depth_formats: vec![vk::Format::D32_SFLOAT],
            caps: default_caps(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            live: KINDS.iter().map(|k| (*k, HashSet::new())).collect(),
            memory: HashMap::new(),
            buffer_binding: HashMap::new(),
            image_binding: HashMap::new(),
            views: HashMap::new(),
            framebuffers: HashMap::new(),
            swapchains: HashMap::new(),
            retired: HashSet::new(),
            swapchain_images: HashSet::new(),
            swapchain_records: Vec::new(),
            next_image: HashMap::new(),
            acquire_script: VecDeque::new(),
            acquire_indices: VecDeque::new(),
            present_script: VecDeque::new(),
            presents: Vec::new(),
            pools: HashMap::new(),
            last_pool: (u32::MAX, vk::CommandPoolCreateFlags::empty()),
            cmds: HashMap::new(),
            fences: HashMap::new(),
            fence_log: Vec::new(),
            semaphores: HashMap::new(),
            submissions: Vec::new(),
            completed: 0,
            max_pending_fences: 0,
        }
    }

    fn call(&mut self, name: &'static str) -> VkResult<()> {
        self.calls.push(name);
        match self.failures.remove(name) {
            Some(r) => Err(r),
            None => Ok(()),
        }
    }

    fn violation(&mut self, msg: String) {
        self.violations.push(msg);
    }

    fn create(&mut self, kind: &'static str) -> u64 {
        self.next += 1;
        let h = self.next;
        self.live.entry(kind).or_default().insert(h);
        h
    }

    fn is_live(&self, kind: &'static str, h: u64) -> bool {
        self.live.get(kind).is_some_and(|s| s.contains(&h))
    }

    fn destroy(&mut self, kind: &'static str, h: u64) -> bool {
        let removed = self.live.get_mut(kind).is_some_and(|s| s.remove(&h));
        if !removed {
            self.violation(format!("destroy of unknown {kind} {h:#x}"));
        }
        removed
    }

    fn count(&self, kind: &'static str) -> usize {
        self.live.get(kind).map_or(0, HashSet::len)
    }

    fn complete_through(&mut self, index: usize) {
        self.completed = self.completed.max(index + 1);
        let done = self.completed;
        for state in self.fences.values_mut() {
            if let FenceState::Pending(k) = *state {
                if k < done {
                    *state = FenceState::Signaled;
                }
            }
        }
    }

    fn complete_all(&mut self) {
        if !self.submissions.is_empty() {
            self.complete_through(self.submissions.len() - 1);
        }
    }

    fn cmd_pending(&self, cmd: u64) -> bool {
        self.cmds
            .get(&cmd)
            .and_then(|c| c.last_submit)
            .is_some_and(|k| k >= self.completed)
    }

    fn record(&mut self, cmd: vk::CommandBuffer, name: &'static str) {
        self.calls.push(name);
        match self.cmds.get_mut(&cmd.as_raw()) {
            Some(c) if c.recording => c.commands.push(name),
            _ => self.violation(format!("{name} on a command buffer that is not recording")),
        }
    }

    fn memory_of(&self, memory: u64) -> Option<&FakeMemory> {
        self.memory.get(&memory)
    }

    fn host_visible(&self, type_index: u32) -> bool {
        self.memory_props.memory_types[type_index as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    fn map_range(&mut self, memory: u64, offset: u64, len: usize) -> VkResult<()> {
        let Some(m) = self.memory_of(memory) else {
            self.violation(format!("map of unknown memory {memory:#x}"));
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        let visible = self.host_visible(m.type_index);
        let fits = offset as usize + len <= m.bytes.len();
        if !visible {
            self.violation(format!("map of device-local memory {memory:#x}"));
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        if !fits {
            self.violation(format!("map past the end of memory {memory:#x}"));
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        Ok(())
    }

    fn run_copies(&mut self, cmd: u64) {
        let copies = self
            .cmds
            .get(&cmd)
            .map(|c| c.copies.clone())
            .unwrap_or_default();
        for (src, dst, size) in copies {
            let src_mem = self.buffer_binding.get(&src).and_then(|b| b.1);
            let dst_mem = self.buffer_binding.get(&dst).and_then(|b| b.1);
            let (Some(src_mem), Some(dst_mem)) = (src_mem, dst_mem) else {
                self.violation("copy between unbound buffers".into());
                continue;
            };
            let data = self.memory[&src_mem].bytes[..size as usize].to_vec();
            if let Some(m) = self.memory.get_mut(&dst_mem) {
                m.bytes[..size as usize].copy_from_slice(&data);
            }
        }
    }

    fn check_leaks(&mut self) {
        for kind in KINDS {
            let n = self.count(kind);
            if n != 0 {
                self.violation(format!("{n} {kind}(s) alive at device shutdown"));
            }
        }
    }
}

/// Cloneable view into a `FakeDriver` that stays usable after the driver is
/// boxed into a `Context`.
#[derive(Clone)]
pub struct FakeProbe(Rc<RefCell<State>>);

impl FakeProbe {
    pub fn live(&self, kind: &'static str) -> usize {
        self.0.borrow().count(kind)
    }

    pub fn live_command_pools(&self) -> usize {
        self.live("pool")
    }

    pub fn live_swapchain_views(&self) -> usize {
        let s = self.0.borrow();
        s.views
            .values()
            .filter(|img| s.swapchain_images.contains(img))
            .count()
    }

    pub fn driver_shutdowns(&self) -> u32 {
        self.0.borrow().shutdowns
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn fail_next(&self, call: &'static str, result: vk::Result) {
        self.0.borrow_mut().failures.insert(call, result);
    }

    pub fn violations(&self) -> Vec<String> {
        self.0.borrow().violations.clone()
    }

    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.0
            .borrow()
            .memory_of(memory.as_raw())
            .map(|m| m.bytes.clone())
            .unwrap_or_default()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        let s = self.0.borrow();
        s.buffer_binding
            .get(&buffer.as_raw())
            .and_then(|(size, mem)| mem.map(|m| (*size, m)))
            .and_then(|(size, m)| s.memory_of(m).map(|m| m.bytes[..size as usize].to_vec()))
            .unwrap_or_default()
    }

    pub fn last_command_pool(&self) -> (u32, vk::CommandPoolCreateFlags) {
        self.0.borrow().last_pool
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.0.borrow().submissions.clone()
    }

    pub fn swapchain_records(&self) -> Vec<SwapchainRecord> {
        self.0.borrow().swapchain_records.clone()
    }

    pub fn presents(&self) -> Vec<(vk::SwapchainKHR, u32)> {
        self.0.borrow().presents.clone()
    }

    pub fn fence_events(&self, fence: vk::Fence) -> Vec<FenceEvent> {
        self.0
            .borrow()
            .fence_log
            .iter()
            .filter(|(f, _)| *f == fence)
            .map(|(_, e)| *e)
            .collect()
    }

    pub fn max_pending_fences(&self) -> usize {
        self.0.borrow().max_pending_fences
    }

    pub fn recorded(&self, cmd: vk::CommandBuffer) -> Vec<&'static str> {
        self.0
            .borrow()
            .cmds
            .get(&cmd.as_raw())
            .map(|c| c.commands.clone())
            .unwrap_or_default()
    }

    pub fn push_constant_len(&self, cmd: vk::CommandBuffer) -> usize {
        self.0
            .borrow()
            .cmds
            .get(&cmd.as_raw())
            .map_or(0, |c| c.push_constant_len)
    }

    /// Results handed out by the next `acquire_next_image` calls, in order.
    pub fn script_acquire(&self, results: impl IntoIterator<Item = vk::Result>) {
        self.0.borrow_mut().acquire_script.extend(results);
    }

    /// Image indices handed out by the next successful acquires.
    pub fn script_acquire_indices(&self, indices: impl IntoIterator<Item = u32>) {
        self.0.borrow_mut().acquire_indices.extend(indices);
    }

    pub fn script_present(&self, results: impl IntoIterator<Item = vk::Result>) {
        self.0.borrow_mut().present_script.extend(results);
    }

    pub fn set_surface_caps(&self, caps: vk::SurfaceCapabilitiesKHR) {
        self.0.borrow_mut().caps = caps;
    }

    pub fn surface_caps(&self) -> vk::SurfaceCapabilitiesKHR {
        self.0.borrow().caps
    }
}

pub struct FakeDriver {
    state: Rc<RefCell<State>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        let q = vk::Queue::from_raw(0xA0);
        Self::with_queues(DeviceQueues {
            graphics_family: 0,
            present_family: 0,
            graphics: q,
            present: q,
        })
    }

    pub fn with_split_queues() -> Self {
        Self::with_queues(DeviceQueues {
            graphics_family: 0,
            present_family: 1,
            graphics: vk::Queue::from_raw(0xA0),
            present: vk::Queue::from_raw(0xB0),
        })
    }

    fn with_queues(queues: DeviceQueues) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new(queues))),
        }
    }

    /// 2x2 fixed surface that yields exactly two images.
    pub fn tiny_surface() -> Self {
        let fake = Self::new();
        {
            let mut s = fake.state.borrow_mut();
            s.caps.min_image_count = 1;
            s.caps.max_image_count = 2;
            s.caps.current_extent = vk::Extent2D {
                width: 2,
                height: 2,
            };
            s.caps.min_image_extent = s.caps.current_extent;
        }
        fake
    }

    pub fn with_surface_formats(self, formats: Vec<vk::SurfaceFormatKHR>) -> Self {
        self.state.borrow_mut().formats = formats;
        self
    }

    pub fn with_depth_formats(self, formats: Vec<vk::Format>) -> Self {
        self.state.borrow_mut().depth_formats = formats;
        self
    }

    pub fn probe(&self) -> FakeProbe {
        FakeProbe(Rc::clone(&self.state))
    }

    fn s(&self) -> std::cell::RefMut<'_, State> {
        self.state.borrow_mut()
    }
}

impl Driver for FakeDriver {
    fn queues(&self) -> DeviceQueues {
        self.s().queues
    }

    fn adapter_name(&self) -> String {
        "Fake GPU".to_owned()
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.s().memory_props
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let supported = self.s().depth_formats.contains(&format);
        vk::FormatProperties {
            optimal_tiling_features: if supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut s = self.s();
        s.call("allocate_memory")?;
        if memory_type_index >= s.memory_props.memory_type_count {
            s.violation(format!("allocation from memory type {memory_type_index}"));
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let h = s.create("memory");
        s.memory.insert(
            h,
            FakeMemory {
                bytes: vec![0; size as usize],
                type_index: memory_type_index,
            },
        );
        Ok(vk::DeviceMemory::from_raw(h))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.s();
        s.calls.push("free_memory");
        let h = memory.as_raw();
        let still_bound = s
            .buffer_binding
            .iter()
            .any(|(b, (_, m))| *m == Some(h) && s.is_live("buffer", *b))
            || s
                .image_binding
                .iter()
                .any(|(i, m)| *m == Some(h) && s.is_live("image", *i));
        if still_bound {
            s.violation(format!("memory {h:#x} freed while still bound"));
        }
        if s.destroy("memory", h) {
            s.memory.remove(&h);
        }
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        let mut s = self.s();
        s.call("write_memory")?;
        s.map_range(memory.as_raw(), offset, data.len())?;
        if let Some(m) = s.memory.get_mut(&memory.as_raw()) {
            m.bytes[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()> {
        let mut s = self.s();
        s.call("read_memory")?;
        s.map_range(memory.as_raw(), offset, out.len())?;
        if let Some(m) = s.memory_of(memory.as_raw()) {
            out.copy_from_slice(&m.bytes[offset as usize..offset as usize + out.len()]);
        }
        Ok(())
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut s = self.s();
        s.call("create_buffer")?;
        if info.size == 0 {
            s.violation("zero-sized buffer".into());
        }
        let h = s.create("buffer");
        s.buffer_binding.insert(h, (info.size, None));
        Ok(vk::Buffer::from_raw(h))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut s = self.s();
        s.calls.push("destroy_buffer");
        s.destroy("buffer", buffer.as_raw());
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let s = self.s();
        let size = s
            .buffer_binding
            .get(&buffer.as_raw())
            .map_or(0, |(size, _)| *size);
        vk::MemoryRequirements {
            size: round_up(size),
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut s = self.s();
        s.call("bind_buffer_memory")?;
        if offset != 0 {
            s.violation("buffer bound at a nonzero offset".into());
        }
        match s.buffer_binding.get_mut(&buffer.as_raw()) {
            Some(b) if b.1.is_none() => b.1 = Some(memory.as_raw()),
            _ => s.violation(format!("bad buffer bind {:#x}", buffer.as_raw())),
        }
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let mut s = self.s();
        s.call("create_image")?;
        if info.extent.width == 0 || info.extent.height == 0 {
            s.violation("zero-sized image".into());
        }
        let h = s.create("image");
        s.image_binding.insert(h, None);
        Ok(vk::Image::from_raw(h))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut s = self.s();
        s.calls.push("destroy_image");
        let h = image.as_raw();
        if s.views.values().any(|i| *i == h) {
            s.violation(format!("image {h:#x} destroyed with a live view"));
        }
        s.destroy("image", h);
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut s = self.s();
        s.call("bind_image_memory")?;
        match s.image_binding.get_mut(&image.as_raw()) {
            Some(m) if m.is_none() => *m = Some(memory.as_raw()),
            _ => s.violation(format!("bad image bind {:#x}", image.as_raw())),
        }
        Ok(())
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        let mut s = self.s();
        s.call("create_image_view")?;
        let image = info.image.as_raw();
        let known = s.is_live("image", image)
            || s
                .swapchains
                .iter()
                .any(|(sc, imgs)| imgs.contains(&image) && s.is_live("swapchain", *sc));
        if !known {
            s.violation(format!("view of unknown image {image:#x}"));
        }
        let h = s.create("view");
        s.views.insert(h, image);
        Ok(vk::ImageView::from_raw(h))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.s();
        s.calls.push("destroy_image_view");
        let h = view.as_raw();
        if s.framebuffers.values().any(|atts| atts.contains(&h)) {
            s.violation(format!("view {h:#x} destroyed under a live framebuffer"));
        }
        if s.destroy("view", h) {
            s.views.remove(&h);
        }
    }

    fn create_command_pool(
        &self,
        family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let mut s = self.s();
        s.call("create_command_pool")?;
        let h = s.create("pool");
        s.pools.insert(h, (family, flags));
        s.last_pool = (family, flags);
        Ok(vk::CommandPool::from_raw(h))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut s = self.s();
        s.calls.push("destroy_command_pool");
        let h = pool.as_raw();
        let owned: Vec<u64> = s
            .cmds
            .iter()
            .filter(|(_, c)| c.pool == h)
            .map(|(cb, _)| *cb)
            .collect();
        for cb in owned {
            if s.cmd_pending(cb) {
                s.violation(format!("pool destroyed while {cb:#x} executes"));
            }
            s.cmds.remove(&cb);
            s.destroy("command_buffer", cb);
        }
        if s.destroy("pool", h) {
            s.pools.remove(&h);
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.s();
        s.call("allocate_command_buffers")?;
        if !s.is_live("pool", pool.as_raw()) {
            s.violation("allocation from a dead pool".into());
        }
        Ok((0..count)
            .map(|_| {
                let h = s.create("command_buffer");
                s.cmds.insert(
                    h,
                    CmdState {
                        pool: pool.as_raw(),
                        ..Default::default()
                    },
                );
                vk::CommandBuffer::from_raw(h)
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut s = self.s();
        s.calls.push("free_command_buffers");
        for cb in buffers {
            let h = cb.as_raw();
            if s.cmd_pending(h) {
                s.violation(format!("command buffer {h:#x} freed while executing"));
            }
            s.cmds.remove(&h);
            s.destroy("command_buffer", h);
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.s();
        s.call("reset_command_buffer")?;
        let h = cmd.as_raw();
        if s.cmd_pending(h) {
            s.violation(format!("command buffer {h:#x} reset while executing"));
        }
        let resettable = s
            .cmds
            .get(&h)
            .and_then(|c| s.pools.get(&c.pool))
            .is_some_and(|(_, flags)| flags.contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER));
        if !resettable {
            s.violation(format!("command buffer {h:#x} reset without RESET_COMMAND_BUFFER"));
        }
        if let Some(c) = s.cmds.get_mut(&h) {
            c.recording = false;
            c.commands.clear();
            c.copies.clear();
            c.push_constant_len = 0;
        }
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let mut s = self.s();
        s.call("begin_command_buffer")?;
        let h = cmd.as_raw();
        if s.cmd_pending(h) {
            s.violation(format!("command buffer {h:#x} re-recorded while executing"));
        }
        match s.cmds.get_mut(&h) {
            Some(c) => {
                c.recording = true;
                c.commands.clear();
                c.copies.clear();
            }
            None => s.violation(format!("begin on unknown command buffer {h:#x}")),
        }
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.s();
        s.call("end_command_buffer")?;
        match s.cmds.get_mut(&cmd.as_raw()) {
            Some(c) if c.recording => c.recording = false,
            _ => s.violation("end on a command buffer that is not recording".into()),
        }
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let mut s = self.s();
        s.record(cmd, "cmd_copy_buffer");
        if let Some(c) = s.cmds.get_mut(&cmd.as_raw()) {
            c.copies.push((src.as_raw(), dst.as_raw(), size));
        }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let mut s = self.s();
        s.record(cmd, "cmd_begin_render_pass");
        if !s.is_live("render_pass", render_pass.as_raw())
            || !s.is_live("framebuffer", framebuffer.as_raw())
        {
            s.violation("render pass begun with a dead pass or framebuffer".into());
        }
        if clear_values.len() != 2 {
            s.violation(format!("{} clear values for 2 attachments", clear_values.len()));
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.s().record(cmd, "cmd_end_render_pass");
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let mut s = self.s();
        s.record(cmd, "cmd_bind_pipeline");
        if !s.is_live("pipeline", pipeline.as_raw()) {
            s.violation("bind of a dead pipeline".into());
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.s().record(cmd, "cmd_set_viewport");
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.s().record(cmd, "cmd_set_scissor");
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        bytes: &[u8],
    ) {
        let mut s = self.s();
        s.record(cmd, "cmd_push_constants");
        if let Some(c) = s.cmds.get_mut(&cmd.as_raw()) {
            c.push_constant_len = bytes.len();
        }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        let mut s = self.s();
        s.record(cmd, "cmd_bind_vertex_buffer");
        if !s.is_live("buffer", buffer.as_raw()) {
            s.violation("bind of a dead vertex buffer".into());
        }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        let mut s = self.s();
        s.record(cmd, "cmd_bind_index_buffer");
        if !s.is_live("buffer", buffer.as_raw()) {
            s.violation("bind of a dead index buffer".into());
        }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, _vertex_count: u32) {
        self.s().record(cmd, "cmd_draw");
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, _index_count: u32) {
        self.s().record(cmd, "cmd_draw_indexed");
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.s();
        s.call("create_fence")?;
        let h = s.create("fence");
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        s.fences.insert(h, state);
        Ok(vk::Fence::from_raw(h))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.s();
        s.calls.push("destroy_fence");
        let h = fence.as_raw();
        if let Some(FenceState::Pending(k)) = s.fences.get(&h).copied() {
            if k >= s.completed {
                s.violation(format!("fence {h:#x} destroyed while in flight"));
            }
        }
        if s.destroy("fence", h) {
            s.fences.remove(&h);
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.s();
        s.call("wait_for_fence")?;
        s.fence_log.push((fence, FenceEvent::Wait));
        match s.fences.get(&fence.as_raw()).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending(k)) => {
                s.complete_through(k);
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                s.violation(format!(
                    "wait on fence {:#x} that nothing will signal",
                    fence.as_raw()
                ));
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
            None => {
                s.violation("wait on unknown fence".into());
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.s();
        s.call("reset_fence")?;
        s.fence_log.push((fence, FenceEvent::Reset));
        let h = fence.as_raw();
        if let Some(FenceState::Pending(k)) = s.fences.get(&h).copied() {
            if k >= s.completed {
                s.violation(format!("fence {h:#x} reset while in flight"));
            }
        }
        s.fences.insert(h, FenceState::Unsignaled);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.s();
        s.call("create_semaphore")?;
        let h = s.create("semaphore");
        s.semaphores.insert(h, false);
        Ok(vk::Semaphore::from_raw(h))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.s();
        s.calls.push("destroy_semaphore");
        let h = semaphore.as_raw();
        if s.destroy("semaphore", h) {
            s.semaphores.remove(&h);
        }
    }

    fn queue_submit(&self, queue: vk::Queue, submission: &Submission) -> VkResult<()> {
        let mut s = self.s();
        s.call("queue_submit")?;
        if queue != s.queues.graphics {
            s.violation("submit on a non-graphics queue".into());
        }
        let cb = submission.command_buffer.as_raw();
        match s.cmds.get(&cb) {
            Some(c) if c.recording => s.violation("submit of a recording command buffer".into()),
            Some(_) => {}
            None => s.violation("submit of unknown command buffer".into()),
        }
        if s.cmd_pending(cb) {
            s.violation(format!("command buffer {cb:#x} resubmitted while executing"));
        }

        if let Some((sem, _)) = submission.wait {
            match s.semaphores.get_mut(&sem.as_raw()) {
                Some(signaled) if *signaled => *signaled = false,
                _ => s.violation("submit waits on an unsignaled semaphore".into()),
            }
        }
        if let Some(sem) = submission.signal {
            match s.semaphores.get_mut(&sem.as_raw()) {
                Some(signaled) if !*signaled => *signaled = true,
                _ => s.violation("submit signals an already signaled semaphore".into()),
            }
        }

        let index = s.submissions.len();
        if submission.fence != vk::Fence::null() {
            let f = submission.fence.as_raw();
            if s.fences.get(&f) != Some(&FenceState::Unsignaled) {
                s.violation(format!("submit with fence {f:#x} not unsignaled"));
            }
            s.fences.insert(f, FenceState::Pending(index));
            s.fence_log.push((submission.fence, FenceEvent::Submit));
            let completed = s.completed;
            let pending = s
                .fences
                .values()
                .filter(|st| matches!(st, FenceState::Pending(k) if *k >= completed))
                .count();
            s.max_pending_fences = s.max_pending_fences.max(pending);
        }

        s.run_copies(cb);
        if let Some(c) = s.cmds.get_mut(&cb) {
            c.last_submit = Some(index);
        }
        s.submissions.push(*submission);
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        let mut s = self.s();
        s.call("queue_wait_idle")?;
        s.complete_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.s();
        s.call("device_wait_idle")?;
        s.complete_all();
        Ok(())
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.s();
        s.call("create_framebuffer")?;
        let attachments: Vec<u64> = if info.attachment_count == 0 {
            Vec::new()
        } else {
            // SAFETY: the builder set the pointer/count pair from a live slice.
            unsafe {
                std::slice::from_raw_parts(info.p_attachments, info.attachment_count as usize)
            }
            .iter()
            .map(|v| v.as_raw())
            .collect()
        };
        if attachments.iter().any(|v| !s.is_live("view", *v)) {
            s.violation("framebuffer over a dead view".into());
        }
        if !s.is_live("render_pass", info.render_pass.as_raw()) {
            s.violation("framebuffer for a dead render pass".into());
        }
        let h = s.create("framebuffer");
        s.framebuffers.insert(h, attachments);
        Ok(vk::Framebuffer::from_raw(h))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.s();
        s.calls.push("destroy_framebuffer");
        let h = framebuffer.as_raw();
        if s.destroy("framebuffer", h) {
            s.framebuffers.remove(&h);
        }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        let mut s = self.s();
        s.call("create_render_pass")?;
        if info.attachment_count != 2 {
            s.violation("render pass without color + depth".into());
        }
        Ok(vk::RenderPass::from_raw(s.create("render_pass")))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.s();
        s.calls.push("destroy_render_pass");
        s.destroy("render_pass", render_pass.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let mut s = self.s();
        s.call("create_shader_module")?;
        if code.first() != Some(&0x0723_0203) {
            s.violation("shader module without SPIR-V magic".into());
        }
        Ok(vk::ShaderModule::from_raw(s.create("shader")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        let mut s = self.s();
        s.calls.push("destroy_shader_module");
        s.destroy("shader", module.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        let mut s = self.s();
        s.call("create_pipeline_layout")?;
        if info.push_constant_range_count != 1 {
            s.violation("layout without exactly one push constant range".into());
        }
        Ok(vk::PipelineLayout::from_raw(s.create("layout")))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        let mut s = self.s();
        s.calls.push("destroy_pipeline_layout");
        s.destroy("layout", layout.as_raw());
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let mut s = self.s();
        s.call("create_graphics_pipeline")?;
        if !s.is_live("render_pass", info.render_pass.as_raw())
            || !s.is_live("layout", info.layout.as_raw())
        {
            s.violation("pipeline over a dead render pass or layout".into());
        }
        if info.stage_count != 2 {
            s.violation("pipeline without vertex + fragment stages".into());
        }
        Ok(vk::Pipeline::from_raw(s.create("pipeline")))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut s = self.s();
        s.calls.push("destroy_pipeline");
        s.destroy("pipeline", pipeline.as_raw());
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let mut s = self.s();
        s.call("surface_capabilities")?;
        Ok(s.caps)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let mut s = self.s();
        s.call("surface_formats")?;
        Ok(s.formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        let mut s = self.s();
        s.call("surface_present_modes")?;
        Ok(s.present_modes.clone())
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.s();
        s.call("create_swapchain")?;
        let old = info.old_swapchain.as_raw();
        if old != 0 {
            if s.is_live("swapchain", old) {
                s.retired.insert(old);
            } else {
                s.violation("old_swapchain hint is not a live swapchain".into());
            }
        }
        let h = s.create("swapchain");
        let images: Vec<u64> = (0..info.min_image_count)
            .map(|_| {
                s.next += 1;
                s.next
            })
            .collect();
        s.swapchain_images.extend(images.iter().copied());
        s.swapchains.insert(h, images);
        let record = SwapchainRecord {
            handle: vk::SwapchainKHR::from_raw(h),
            old: info.old_swapchain,
            min_image_count: info.min_image_count,
            sharing_mode: info.image_sharing_mode,
            queue_family_count: info.queue_family_index_count,
            extent: info.image_extent,
            format: info.image_format,
            present_mode: info.present_mode,
        };
        s.swapchain_records.push(record);
        Ok(vk::SwapchainKHR::from_raw(h))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.s();
        s.calls.push("destroy_swapchain");
        let h = swapchain.as_raw();
        let images = s.swapchains.get(&h).cloned().unwrap_or_default();
        if s.views.values().any(|img| images.contains(img)) {
            s.violation(format!("swapchain {h:#x} destroyed with live views"));
        }
        if s.destroy("swapchain", h) {
            s.swapchains.remove(&h);
            s.retired.remove(&h);
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.s();
        s.call("swapchain_images")?;
        Ok(s.swapchains
            .get(&swapchain.as_raw())
            .map(|imgs| imgs.iter().map(|h| vk::Image::from_raw(*h)).collect())
            .unwrap_or_default())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.s();
        s.call("acquire_next_image")?;
        let h = swapchain.as_raw();
        if !s.is_live("swapchain", h) || s.retired.contains(&h) {
            s.violation("acquire from a dead or retired swapchain".into());
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let suboptimal = match s.acquire_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err),
        };

        match s.semaphores.get_mut(&signal.as_raw()) {
            Some(signaled) if !*signaled => *signaled = true,
            _ => s.violation("acquire into a signaled or unknown semaphore".into()),
        }

        let count = s.swapchains.get(&h).map_or(1, |v| v.len() as u32).max(1);
        let index = match s.acquire_indices.pop_front() {
            Some(i) => i,
            None => {
                let next = s.next_image.entry(h).or_insert(0);
                let i = *next % count;
                *next = (i + 1) % count;
                i
            }
        };
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.s();
        s.call("queue_present")?;
        if queue != s.queues.present {
            s.violation("present on a non-present queue".into());
        }
        match s.semaphores.get_mut(&wait.as_raw()) {
            Some(signaled) if *signaled => *signaled = false,
            _ => s.violation("present waits on an unsignaled semaphore".into()),
        }
        s.presents.push((swapchain, image_index));
        match s.present_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
        }
    }

    fn shutdown(&mut self) {
        let mut s = self.s();
        if s.shutdowns > 0 {
            return;
        }
        s.calls.push("shutdown");
        s.shutdowns += 1;
        s.check_leaks();
    }
}

/// Window stand-in with a settable drawable size.
pub struct FakeWindow {
    size: Cell<RenderSize>,
    restore: Cell<Option<(u32, RenderSize)>>,
    waits: Cell<u32>,
}

impl FakeWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Cell::new(RenderSize::new(width, height)),
            restore: Cell::new(None),
            waits: Cell::new(0),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.set(RenderSize::new(width, height));
    }

    /// Report 0x0 until `wait_events` has been called `waits` more times.
    pub fn minimize_for(&self, waits: u32, width: u32, height: u32) {
        self.size.set(RenderSize::new(0, 0));
        self.restore
            .set(Some((self.waits.get() + waits, RenderSize::new(width, height))));
    }

    pub fn waits(&self) -> u32 {
        self.waits.get()
    }
}

impl WindowSurface for FakeWindow {
    fn drawable_size(&self) -> RenderSize {
        self.size.get()
    }

    fn wait_events(&self) {
        self.waits.set(self.waits.get() + 1);
        if let Some((at, size)) = self.restore.get() {
            if self.waits.get() >= at {
                self.size.set(size);
                self.restore.set(None);
            }
        }
    }
}

/// Minimal camera for frame tests.
pub struct IdentityCamera;

impl lumen_render::ViewProjection for IdentityCamera {
    fn view_projection(&self, _aspect: f32) -> [[f32; 4]; 4] {
        [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}
