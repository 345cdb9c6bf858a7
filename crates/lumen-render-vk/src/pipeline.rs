use ash::vk;
use tracing::{info, warn};

use crate::context::Context;
use crate::driver::Driver;
use crate::error::{GfxError, GfxResult, VkResultExt};
use crate::mesh::Vertex;
use crate::shader::ShaderCode;

/// Bytes of the vertex-stage push constant (one column-major 4x4 matrix).
pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[[f32; 4]; 4]>() as u32;

/// Single-subpass forward pipeline: color + depth render pass, one push
/// constant, one vertex binding.
#[derive(Debug)]
pub struct Pipeline {
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    color_format: vk::Format,
    depth_format: vk::Format,
    vert: ShaderCode,
    frag: ShaderCode,
}

fn create_render_pass(
    driver: &dyn Driver,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> GfxResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref)];

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    driver
        .create_render_pass(&info)
        .init_err("vkCreateRenderPass")
}

fn create_layout(driver: &dyn Driver) -> GfxResult<vk::PipelineLayout> {
    let ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: PUSH_CONSTANT_SIZE,
    }];
    let info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&ranges);
    driver
        .create_pipeline_layout(&info)
        .init_err("vkCreatePipelineLayout")
}

fn create_pipeline(
    driver: &dyn Driver,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert: &ShaderCode,
    frag: &ShaderCode,
) -> GfxResult<vk::Pipeline> {
    let vs = driver
        .create_shader_module(vert.words())
        .init_err("vertex shader module")?;
    let fs = match driver.create_shader_module(frag.words()) {
        Ok(m) => m,
        Err(e) => {
            driver.destroy_shader_module(vs);
            return Err(GfxError::init(format!("fragment shader module: {e}")));
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vs)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fs)
            .name(c"main"),
    ];

    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    // Real viewport and scissor are set per frame.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let result = driver
        .create_graphics_pipeline(&info)
        .init_err("vkCreateGraphicsPipelines");

    // Modules are only needed during creation.
    driver.destroy_shader_module(vs);
    driver.destroy_shader_module(fs);
    result
}

impl Pipeline {
    pub fn new(
        ctx: &Context,
        color_format: vk::Format,
        depth_format: vk::Format,
        vert: &ShaderCode,
        frag: &ShaderCode,
    ) -> GfxResult<Self> {
        let driver = ctx.driver()?;

        let render_pass = create_render_pass(driver, color_format, depth_format)?;
        let layout = match create_layout(driver) {
            Ok(l) => l,
            Err(e) => {
                driver.destroy_render_pass(render_pass);
                return Err(e);
            }
        };
        let pipeline = match create_pipeline(driver, render_pass, layout, vert, frag) {
            Ok(p) => p,
            Err(e) => {
                driver.destroy_pipeline_layout(layout);
                driver.destroy_render_pass(render_pass);
                return Err(e);
            }
        };

        info!(
            "pipeline ready: color {:?}, depth {:?}",
            color_format, depth_format
        );
        Ok(Self {
            render_pass,
            layout,
            pipeline,
            color_format,
            depth_format,
            vert: vert.clone(),
            frag: frag.clone(),
        })
    }

    /// Rebuilds render pass and pipeline for a new color format. The layout
    /// is format-independent and kept. Callers must have idled the device.
    pub fn recreate(&mut self, ctx: &Context, color_format: vk::Format) -> GfxResult<()> {
        if color_format == self.color_format && self.is_live() {
            return Ok(());
        }
        let driver = ctx.driver()?;

        let render_pass = create_render_pass(driver, color_format, self.depth_format)?;
        let pipeline =
            match create_pipeline(driver, render_pass, self.layout, &self.vert, &self.frag) {
                Ok(p) => p,
                Err(e) => {
                    driver.destroy_render_pass(render_pass);
                    return Err(e);
                }
            };

        if self.pipeline != vk::Pipeline::null() {
            driver.destroy_pipeline(self.pipeline);
        }
        if self.render_pass != vk::RenderPass::null() {
            driver.destroy_render_pass(self.render_pass);
        }
        self.render_pass = render_pass;
        self.pipeline = pipeline;
        self.color_format = color_format;
        info!("pipeline rebuilt for {:?}", color_format);
        Ok(())
    }

    pub fn shutdown(&mut self, ctx: &Context) {
        if !self.is_live() {
            return;
        }
        if let Ok(driver) = ctx.driver() {
            driver.destroy_pipeline(self.pipeline);
            driver.destroy_pipeline_layout(self.layout);
            driver.destroy_render_pass(self.render_pass);
        }
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
    }

    pub fn is_live(&self) -> bool {
        self.pipeline != vk::Pipeline::null()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.is_live() {
            warn!("pipeline dropped without shutdown");
        }
    }
}
