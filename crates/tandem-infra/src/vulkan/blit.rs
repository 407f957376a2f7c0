// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Vulkan executor for a [`BlitPlan`]: a full-screen quad with premultiplied alpha.
//!
//! The pass owns everything that does not depend on the images (pipeline,
//! descriptor set, quad buffers). Image views and the framebuffer are made
//! per [`VulkanBlitPass::execute`] call, which blocks until the GPU is done.

use super::commands::SemaphoreSlot;
use super::conversions::IntoVulkan;
use super::device::{DeviceContext, VulkanDevice};
use super::memory::{VulkanBuffer, VulkanImage};
use super::VkResultExt;
use ash::vk;
use std::sync::Arc;
use tandem_core::blit::{BlitPlan, BlitVariant, ImageLayout, LayoutTransition, QUAD_INDICES, QUAD_VERTICES};
use tandem_core::resource::{BufferDesc, BufferUsage, ImageFormat};
use tandem_core::shader::{ShaderBytecode, ShaderModule, ShaderStages};
use tandem_core::traits::RenderInteropDevice;
use tandem_core::InteropError;
use tandem_shader::ShaderManager;

/// Name of the sampled source image in every blit fragment shader.
pub const INPUT_TEXTURE_BINDING: &str = "inputTexture";

/// Directory holding the shipped `BlitPremulAlpha.glsl`.
pub const BUILTIN_SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders");

/// Semaphores bracketing one blit.
///
/// Both are required when the plan transfers ownership from or to another API.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlitSync {
    /// Waited on before the blit reads the source.
    pub wait: Option<SemaphoreSlot>,
    /// Signalled once the destination is written.
    pub signal: Option<SemaphoreSlot>,
}

/// A compiled blit pipeline for one plan and destination format.
pub struct VulkanBlitPass {
    ctx: Arc<DeviceContext>,
    plan: BlitPlan,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    texture_set: u32,
    texture_binding: u32,
    sampler: vk::Sampler,
    vertex_buffer: VulkanBuffer,
    index_buffer: VulkanBuffer,
    dst_format: ImageFormat,
}

impl VulkanBlitPass {
    /// Compiles the plan's shaders and builds the pipeline.
    ///
    /// ## Arguments
    /// * `shaders` - Resolves `plan.vertex_shader_id` / `plan.fragment_shader_id`.
    /// * `dst_format` - Format of every destination image passed to `execute`.
    ///
    /// ## Errors
    /// * `InteropError::Shader` - If the shaders fail to compile or link.
    /// * `InteropError::Precondition` - If the fragment shader has no
    ///   `inputTexture` binding.
    pub fn new(
        device: &VulkanDevice,
        shaders: &mut ShaderManager,
        plan: &BlitPlan,
        dst_format: ImageFormat,
    ) -> Result<Self, InteropError> {
        let stages = shaders.get_shader_stages(&[plan.vertex_shader_id, plan.fragment_shader_id])?;
        let texture = stages.bindings().get(INPUT_TEXTURE_BINDING).ok_or_else(|| {
            InteropError::precondition(format!(
                "'{}' has no '{INPUT_TEXTURE_BINDING}' binding",
                plan.fragment_shader_id
            ))
        })?;
        let (texture_set, texture_binding) = (texture.set, texture.binding);

        let mut pass = PartialPass::new(Arc::clone(device.context()));
        pass.build_layouts(&stages)?;
        pass.build_render_pass(plan, dst_format)?;
        pass.build_pipeline(&stages, plan)?;
        pass.build_descriptors(texture_set)?;

        let vertex_buffer = quad_buffer(device, bytemuck::cast_slice(&QUAD_VERTICES), BufferUsage::VERTEX)?;
        let index_buffer = quad_buffer(device, bytemuck::cast_slice(&QUAD_INDICES), BufferUsage::INDEX)?;

        log::debug!(
            "Built blit pass {:?} ({} -> {:?})",
            plan.variant,
            plan.fragment_shader_id,
            dst_format
        );
        Ok(pass.finish(plan.clone(), texture_set, texture_binding, vertex_buffer, index_buffer, dst_format))
    }

    /// The plan this pass executes.
    pub fn plan(&self) -> &BlitPlan {
        &self.plan
    }

    /// Blits `src` into `dst` and waits for completion.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If the image extents, formats or
    ///   sample counts disagree with the plan, or an ownership transfer is
    ///   requested without both semaphores.
    pub fn execute(
        &self,
        device: &VulkanDevice,
        src: &VulkanImage,
        dst: &VulkanImage,
        sync: BlitSync,
    ) -> Result<(), InteropError> {
        self.validate(src, dst, &sync)?;
        let raw = device.raw();

        let src_view = create_view(raw, src)?;
        let views = ViewGuard::new(raw, src_view);
        let dst_view = create_view(raw, dst)?;
        let views = views.with(dst_view);

        let attachments = [dst_view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(self.plan.dst_extent.width)
            .height(self.plan.dst_extent.height)
            .layers(1);
        // SAFETY: the view belongs to an image compatible with the render pass.
        let framebuffer = unsafe { raw.create_framebuffer(&framebuffer_info, None) }
            .vk_context("vkCreateFramebuffer")?;

        let image_info = [vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(src_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.descriptor_set)
            .dst_binding(self.texture_binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        // SAFETY: the previous execute waited for its fence, so the set is idle.
        unsafe { raw.update_descriptor_sets(&[write], &[]) };

        let waits: Vec<SemaphoreSlot> = sync.wait.into_iter().collect();
        let signals: Vec<SemaphoreSlot> = sync.signal.into_iter().collect();
        let result = device.command_pools().single_time(
            device.queue(),
            &waits,
            &signals,
            |d, cmd| {
                self.record(d, cmd, device.queue_family(), src, dst, framebuffer);
                Ok(())
            },
        );

        // SAFETY: single_time returned, so nothing uses the framebuffer or views.
        unsafe { raw.destroy_framebuffer(framebuffer, None) };
        drop(views);
        result
    }

    fn validate(&self, src: &VulkanImage, dst: &VulkanImage, sync: &BlitSync) -> Result<(), InteropError> {
        if src.extent() != self.plan.src_extent || dst.extent() != self.plan.dst_extent {
            return Err(InteropError::precondition(format!(
                "blit planned for {:?} -> {:?} but got {:?} -> {:?}",
                self.plan.src_extent,
                self.plan.dst_extent,
                src.extent(),
                dst.extent()
            )));
        }
        if dst.format() != self.dst_format {
            return Err(InteropError::precondition(format!(
                "blit pass renders to {:?}, destination is {:?}",
                self.dst_format,
                dst.format()
            )));
        }
        let expected_samples = if matches!(self.plan.variant, BlitVariant::BlitMs | BlitVariant::DownscaleMs) {
            self.plan.push_constants.num_samples as u32
        } else {
            1
        };
        if src.samples() != expected_samples {
            return Err(InteropError::precondition(format!(
                "{:?} expects a source with {expected_samples} samples, got {}",
                self.plan.variant,
                src.samples()
            )));
        }
        if self.plan.ownership_transfer && (sync.wait.is_none() || sync.signal.is_none()) {
            return Err(InteropError::precondition(
                "an ownership-transferring blit needs both a wait and a signal semaphore",
            ));
        }
        Ok(())
    }

    fn record(
        &self,
        d: &ash::Device,
        cmd: vk::CommandBuffer,
        queue_family: u32,
        src: &VulkanImage,
        dst: &VulkanImage,
        framebuffer: vk::Framebuffer,
    ) {
        let plan = &self.plan;
        let (acquire_from, release_to) = if plan.ownership_transfer {
            (vk::QUEUE_FAMILY_EXTERNAL, vk::QUEUE_FAMILY_EXTERNAL)
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        };
        let acquire_to = if plan.ownership_transfer { queue_family } else { vk::QUEUE_FAMILY_IGNORED };

        // --- 1. Acquire and transition both images ---
        let barriers = [
            image_barrier(src.raw(), plan.src_transition, vk::AccessFlags::MEMORY_WRITE, vk::AccessFlags::SHADER_READ)
                .src_queue_family_index(acquire_from)
                .dst_queue_family_index(acquire_to),
            image_barrier(
                dst.raw(),
                plan.dst_transition,
                vk::AccessFlags::MEMORY_WRITE,
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
        ];
        // SAFETY: all handles are alive for the recording.
        unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }

        // --- 2. Draw the quad ---
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: plan.clear_color.unwrap_or([0.0; 4]),
            },
        }];
        let extent: vk::Extent2D = plan.dst_extent.into_vk();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let push = [plan.push_constants.supersampling_factor, plan.push_constants.num_samples];
        // SAFETY: every object referenced was created on `d` and outlives the submission.
        unsafe {
            d.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[render_area]);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                self.texture_set,
                &[self.descriptor_set],
                &[],
            );
            d.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::cast_slice(&push),
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.raw()], &[0]);
            d.cmd_bind_index_buffer(cmd, self.index_buffer.raw(), 0, vk::IndexType::UINT32);
            d.cmd_draw_indexed(cmd, QUAD_INDICES.len() as u32, 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);
        }

        // --- 3. Release the source ---
        if !plan.src_release.is_noop() || plan.ownership_transfer {
            let release = image_barrier(
                src.raw(),
                plan.src_release,
                vk::AccessFlags::SHADER_READ,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
            .src_queue_family_index(acquire_to)
            .dst_queue_family_index(release_to);
            // SAFETY: as above.
            unsafe {
                d.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[release],
                );
            }
        }
    }
}

impl Drop for VulkanBlitPass {
    fn drop(&mut self) {
        let d = self.ctx.raw();
        // SAFETY: execute waits for completion, so no submission references these.
        unsafe {
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_render_pass(self.render_pass, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            for layout in self.set_layouts.drain(..) {
                d.destroy_descriptor_set_layout(layout, None);
            }
            d.destroy_descriptor_pool(self.descriptor_pool, None);
            d.destroy_sampler(self.sampler, None);
        }
    }
}

/// The pass objects under construction; destroys whatever was built if a step fails.
struct PartialPass {
    ctx: Arc<DeviceContext>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    sampler: vk::Sampler,
}

impl PartialPass {
    fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            ctx,
            set_layouts: Vec::new(),
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            pipeline: vk::Pipeline::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            sampler: vk::Sampler::null(),
        }
    }

    /// One set layout per set index up to the highest reflected set; gaps get empty layouts.
    fn build_layouts(&mut self, stages: &ShaderStages) -> Result<(), InteropError> {
        let d = self.ctx.raw();
        let layout = stages.pipeline_layout()?;
        for set in 0..layout.set_count() {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = layout
                .set(set)
                .map(|desc| {
                    desc.bindings
                        .iter()
                        .map(|b| {
                            vk::DescriptorSetLayoutBinding::default()
                                .binding(b.binding)
                                .descriptor_type(b.kind.into_vk())
                                .descriptor_count(b.count.max(1))
                                .stage_flags(b.stages.into_vk())
                        })
                        .collect()
                })
                .unwrap_or_default();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            // SAFETY: valid create info.
            let set_layout = unsafe { d.create_descriptor_set_layout(&info, None) }
                .vk_context("vkCreateDescriptorSetLayout")?;
            self.set_layouts.push(set_layout);
        }

        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: (2 * std::mem::size_of::<i32>()) as u32,
        }];
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&push_ranges);
        // SAFETY: valid create info.
        self.pipeline_layout = unsafe { d.create_pipeline_layout(&info, None) }
            .vk_context("vkCreatePipelineLayout")?;
        Ok(())
    }

    fn build_render_pass(&mut self, plan: &BlitPlan, dst_format: ImageFormat) -> Result<(), InteropError> {
        let final_layout = match plan.dst_release.new {
            ImageLayout::Undefined => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            other => other.into_vk(),
        };
        let attachments = [vk::AttachmentDescription::default()
            .format(dst_format.into_vk())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(if plan.clear_color.is_some() {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            })
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(final_layout)];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        // SAFETY: valid create info.
        self.render_pass = unsafe { self.ctx.raw().create_render_pass(&info, None) }
            .vk_context("vkCreateRenderPass")?;
        Ok(())
    }

    fn build_pipeline(&mut self, stages: &ShaderStages, plan: &BlitPlan) -> Result<(), InteropError> {
        let d = self.ctx.raw();
        let mut modules = Vec::with_capacity(stages.modules().len());
        for module in stages.modules() {
            match create_shader_module(d, module) {
                Ok(raw) => modules.push((raw, module)),
                Err(e) => {
                    destroy_shader_modules(d, &modules);
                    return Err(e);
                }
            }
        }
        let entry_points: Vec<std::ffi::CString> = modules
            .iter()
            .map(|(_, m)| std::ffi::CString::new(m.entry_point.as_str()).unwrap_or_else(|_| c"main".to_owned()))
            .collect();
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .zip(&entry_points)
            .map(|((raw, m), entry)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(m.stage.into_vk())
                    .module(*raw)
                    .name(entry.as_c_str())
            })
            .collect();

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<[f32; 4]>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes = [vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 0,
        }];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend = plan.blend;
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(blend.src_color.into_vk())
            .dst_color_blend_factor(blend.dst_color.into_vk())
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(blend.src_alpha.into_vk())
            .dst_alpha_blend_factor(blend.dst_alpha.into_vk())
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(self.pipeline_layout)
            .render_pass(self.render_pass)
            .subpass(0);
        // SAFETY: every pointer in `info` refers to locals alive for the call.
        let created = unsafe {
            d.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        destroy_shader_modules(d, &modules);
        let pipelines = created.map_err(|(_, e)| super::vk_error("vkCreateGraphicsPipelines", e))?;
        self.pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| InteropError::precondition("driver returned no pipeline"))?;
        Ok(())
    }

    fn build_descriptors(&mut self, texture_set: u32) -> Result<(), InteropError> {
        let d = self.ctx.raw();
        let set_layout = *self.set_layouts.get(texture_set as usize).ok_or_else(|| {
            InteropError::precondition(format!("descriptor set {texture_set} has no layout"))
        })?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        // SAFETY: valid create info.
        self.descriptor_pool = unsafe { d.create_descriptor_pool(&pool_info, None) }
            .vk_context("vkCreateDescriptorPool")?;

        let layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        // SAFETY: the pool has room for exactly this set.
        let sets = unsafe { d.allocate_descriptor_sets(&alloc_info) }
            .vk_context("vkAllocateDescriptorSets")?;
        self.descriptor_set = sets
            .into_iter()
            .next()
            .ok_or_else(|| InteropError::precondition("driver returned no descriptor set"))?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        // SAFETY: valid create info.
        self.sampler = unsafe { d.create_sampler(&sampler_info, None) }
            .vk_context("vkCreateSampler")?;
        Ok(())
    }

    fn finish(
        mut self,
        plan: BlitPlan,
        texture_set: u32,
        texture_binding: u32,
        vertex_buffer: VulkanBuffer,
        index_buffer: VulkanBuffer,
        dst_format: ImageFormat,
    ) -> VulkanBlitPass {
        VulkanBlitPass {
            ctx: Arc::clone(&self.ctx),
            plan,
            set_layouts: std::mem::take(&mut self.set_layouts),
            pipeline_layout: std::mem::replace(&mut self.pipeline_layout, vk::PipelineLayout::null()),
            render_pass: std::mem::replace(&mut self.render_pass, vk::RenderPass::null()),
            pipeline: std::mem::replace(&mut self.pipeline, vk::Pipeline::null()),
            descriptor_pool: std::mem::replace(&mut self.descriptor_pool, vk::DescriptorPool::null()),
            descriptor_set: self.descriptor_set,
            texture_set,
            texture_binding,
            sampler: std::mem::replace(&mut self.sampler, vk::Sampler::null()),
            vertex_buffer,
            index_buffer,
            dst_format,
        }
    }
}

impl Drop for PartialPass {
    fn drop(&mut self) {
        let d = self.ctx.raw();
        // SAFETY: nothing was submitted with these objects; destroying null handles is a no-op.
        unsafe {
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_render_pass(self.render_pass, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            for layout in self.set_layouts.drain(..) {
                d.destroy_descriptor_set_layout(layout, None);
            }
            d.destroy_descriptor_pool(self.descriptor_pool, None);
            d.destroy_sampler(self.sampler, None);
        }
    }
}

/// Image views created for one execute call, destroyed on scope exit.
struct ViewGuard<'a> {
    device: &'a ash::Device,
    views: Vec<vk::ImageView>,
}

impl<'a> ViewGuard<'a> {
    fn new(device: &'a ash::Device, view: vk::ImageView) -> Self {
        Self {
            device,
            views: vec![view],
        }
    }

    fn with(mut self, view: vk::ImageView) -> Self {
        self.views.push(view);
        self
    }
}

impl Drop for ViewGuard<'_> {
    fn drop(&mut self) {
        for view in self.views.drain(..) {
            // SAFETY: the views are no longer referenced by pending work.
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }
}

fn create_view(device: &ash::Device, image: &VulkanImage) -> Result<vk::ImageView, InteropError> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image.raw())
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(image.format().into_vk())
        .subresource_range(color_range());
    // SAFETY: the image is alive and its format matches the view.
    unsafe { device.create_image_view(&info, None) }.vk_context("vkCreateImageView")
}

fn create_shader_module(device: &ash::Device, module: &ShaderModule) -> Result<vk::ShaderModule, InteropError> {
    let ShaderBytecode::Spirv(words) = &module.bytecode else {
        return Err(InteropError::not_supported(format!(
            "'{}' is not SPIR-V and cannot be used by Vulkan",
            module.id
        )));
    };
    let info = vk::ShaderModuleCreateInfo::default().code(words);
    // SAFETY: the words come from a validated SPIR-V compile.
    unsafe { device.create_shader_module(&info, None) }.vk_context("vkCreateShaderModule")
}

fn destroy_shader_modules(device: &ash::Device, modules: &[(vk::ShaderModule, &Arc<ShaderModule>)]) {
    for (raw, _) in modules {
        // SAFETY: modules are only referenced during pipeline creation.
        unsafe { device.destroy_shader_module(*raw, None) };
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn image_barrier(
    image: vk::Image,
    transition: LayoutTransition,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .image(image)
        .old_layout(transition.old.into_vk())
        .new_layout(transition.new.into_vk())
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(color_range())
}

fn quad_buffer(device: &VulkanDevice, bytes: &[u8], usage: BufferUsage) -> Result<VulkanBuffer, InteropError> {
    let buffer = device.create_buffer(&BufferDesc {
        size: bytes.len() as u64,
        usage,
        exportable: false,
    })?;
    device.upload_buffer(&buffer, 0, bytes)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::blit::BlitSettings;
    use tandem_core::resource::Extent3d;

    #[test]
    fn barrier_carries_plan_layouts() {
        // --- Arrange ---
        let transition = LayoutTransition {
            old: ImageLayout::General,
            new: ImageLayout::ShaderReadOnlyOptimal,
        };

        // --- Act ---
        let barrier = image_barrier(
            vk::Image::null(),
            transition,
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::SHADER_READ,
        );

        // --- Assert ---
        assert_eq!(barrier.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn push_constants_are_two_ints() {
        let plan = BlitPlan::new(
            Extent3d::new_2d(128, 128),
            Extent3d::new_2d(64, 64),
            &BlitSettings {
                supersampling_factor: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let push = [plan.push_constants.supersampling_factor, plan.push_constants.num_samples];
        let bytes: &[u8] = bytemuck::cast_slice(&push);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &2i32.to_ne_bytes());
    }

    #[test]
    fn quad_data_matches_vertex_layout() {
        let vertices: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
        let indices: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);
        assert_eq!(vertices.len(), 4 * std::mem::size_of::<[f32; 4]>());
        assert_eq!(indices.len(), 6 * 4);
    }
}
