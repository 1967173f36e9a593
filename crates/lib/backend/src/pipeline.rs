// Copyright (C) 2023 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::sync::Arc;

use arrayvec::ArrayVec;
use ash::vk;
use log::debug;

use crate::{
    descriptors::{is_dynamic, slot_class},
    translate, vertex_format, BackendError, BackendResult, BindingSlot, BlendAttachment,
    ColorBlendState, DepthBias, DepthStencilState, DescriptorSetLayoutHandle, Device,
    DynamicStates, GlEnum, GlName, InputAssemblyState, MultisampleState, PipelineHandle,
    PipelineLayoutHandle, PushUniform, RasterizationState, Rect, RenderPassHandle, SharedObject,
    ShaderModuleHandle, SlotClass, StencilFace, TessellationState, Viewport,
    MAX_COLOR_ATTACHMENTS,
};

/// Largest push constant block, in bytes.
pub const MAX_PUSH_CONSTANTS_SIZE: u32 = 256;

#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDesc {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutDesc {
    pub fn set_layout(mut self, layout: DescriptorSetLayoutHandle) -> Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn push_constant_range(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }
}

/// Binding point assignment for every set of a pipeline layout.
///
/// Points are handed out per class in set order, then binding order, so two layouts
/// sharing a prefix of sets agree on the binding points of that prefix.
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub(crate) sets: Arc<Vec<Vec<(u32, BindingSlot)>>>,
    pub(crate) dynamic_counts: Vec<u32>,
}

impl PipelineLayout {
    pub fn slot(&self, set: u32, binding: u32) -> Option<BindingSlot> {
        self.sets.get(set as usize).and_then(|slots| {
            slots
                .iter()
                .find(|(index, _)| *index == binding)
                .map(|(_, slot)| *slot)
        })
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_ranges
            .iter()
            .map(|range| range.offset + range.size)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub instanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub size: i32,
    pub ty: GlEnum,
    pub normalized: bool,
    pub integer: bool,
    pub offset: u32,
}

/// Vertex input in attribute pointer terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn binding(&self, binding: u32) -> Option<&VertexBinding> {
        self.bindings.iter().find(|desc| desc.binding == binding)
    }
}

/// Fixed-function blocks of a graphics pipeline, already in GL terms.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsStates {
    pub input_assembly: InputAssemblyState,
    pub tessellation: TessellationState,
    pub rasterization: RasterizationState,
    pub multisample: MultisampleState,
    pub depth_stencil: DepthStencilState,
    pub color_blend: ColorBlendState,
    pub dynamic: DynamicStates,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Rect>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultisampleDesc {
    pub samples: vk::SampleCountFlags,
    pub sample_shading: Option<f32>,
    pub sample_mask: u32,
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
}

impl Default for MultisampleDesc {
    fn default() -> Self {
        Self {
            samples: vk::SampleCountFlags::TYPE_1,
            sample_shading: None,
            sample_mask: !0,
            alpha_to_coverage: false,
            alpha_to_one: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColorBlendDesc {
    pub logic_op: Option<vk::LogicOp>,
    pub attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub constants: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub stages: Vec<ShaderModuleHandle>,
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub patch_control_points: u32,
    pub viewports: Vec<vk::Viewport>,
    pub scissors: Vec<vk::Rect2D>,
    pub rasterization: vk::PipelineRasterizationStateCreateInfo,
    pub multisample: MultisampleDesc,
    pub depth_stencil: vk::PipelineDepthStencilStateCreateInfo,
    pub color_blend: ColorBlendDesc,
    pub dynamic_states: Vec<vk::DynamicState>,
}

const COLOR_WRITE_ALL: vk::ColorComponentFlags = vk::ColorComponentFlags::RGBA;

impl GraphicsPipelineDesc {
    pub fn new(layout: PipelineLayoutHandle, render_pass: RenderPassHandle, subpass: u32) -> Self {
        Self {
            stages: Vec::new(),
            layout,
            render_pass,
            subpass,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            patch_control_points: 0,
            viewports: Vec::new(),
            scissors: Vec::new(),
            rasterization: vk::PipelineRasterizationStateCreateInfo {
                line_width: 1.0,
                ..Default::default()
            },
            multisample: MultisampleDesc::default(),
            depth_stencil: vk::PipelineDepthStencilStateCreateInfo::default(),
            color_blend: ColorBlendDesc::default(),
            dynamic_states: Vec::new(),
        }
    }

    pub fn stage(mut self, module: ShaderModuleHandle) -> Self {
        self.stages.push(module);
        self
    }

    pub fn vertex_binding(mut self, binding: u32, stride: u32, rate: vk::VertexInputRate) -> Self {
        self.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: rate,
        });
        self
    }

    pub fn vertex_attribute(mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        self.vertex_attributes
            .push(vk::VertexInputAttributeDescription {
                location,
                binding,
                format,
                offset,
            });
        self
    }

    pub fn topology(mut self, value: vk::PrimitiveTopology) -> Self {
        self.topology = value;
        self
    }

    pub fn primitive_restart(mut self, value: bool) -> Self {
        self.primitive_restart = value;
        self
    }

    pub fn patch_control_points(mut self, value: u32) -> Self {
        self.patch_control_points = value;
        self
    }

    pub fn viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewports.push(viewport);
        self
    }

    pub fn scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissors.push(scissor);
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags, front: vk::FrontFace) -> Self {
        self.rasterization.cull_mode = mode;
        self.rasterization.front_face = front;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.rasterization.polygon_mode = mode;
        self
    }

    pub fn depth_bias(mut self, constant: f32, clamp: f32, slope: f32) -> Self {
        self.rasterization.depth_bias_enable = vk::TRUE;
        self.rasterization.depth_bias_constant_factor = constant;
        self.rasterization.depth_bias_clamp = clamp;
        self.rasterization.depth_bias_slope_factor = slope;
        self
    }

    pub fn multisample(mut self, value: MultisampleDesc) -> Self {
        self.multisample = value;
        self
    }

    pub fn depth_test(mut self, write: bool, op: vk::CompareOp) -> Self {
        self.depth_stencil.depth_test_enable = vk::TRUE;
        self.depth_stencil.depth_write_enable = write.into();
        self.depth_stencil.depth_compare_op = op;
        self
    }

    pub fn stencil_test(mut self, front: vk::StencilOpState, back: vk::StencilOpState) -> Self {
        self.depth_stencil.stencil_test_enable = vk::TRUE;
        self.depth_stencil.front = front;
        self.depth_stencil.back = back;
        self
    }

    pub fn logic_op(mut self, op: vk::LogicOp) -> Self {
        self.color_blend.logic_op = Some(op);
        self
    }

    /// Attachment that overwrites the target.
    pub fn opaque(mut self) -> Self {
        self.color_blend
            .attachments
            .push(vk::PipelineColorBlendAttachmentState {
                color_write_mask: COLOR_WRITE_ALL,
                ..Default::default()
            });
        self
    }

    /// Attachment with classic `src_alpha, 1 - src_alpha` blending.
    pub fn alpha_blend(self) -> Self {
        self.blend(
            vk::BlendFactor::SRC_ALPHA,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            vk::BlendOp::ADD,
        )
    }

    pub fn blend(mut self, src: vk::BlendFactor, dst: vk::BlendFactor, op: vk::BlendOp) -> Self {
        self.color_blend
            .attachments
            .push(vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::TRUE,
                src_color_blend_factor: src,
                dst_color_blend_factor: dst,
                color_blend_op: op,
                src_alpha_blend_factor: src,
                dst_alpha_blend_factor: dst,
                alpha_blend_op: op,
                color_write_mask: COLOR_WRITE_ALL,
            });
        self
    }

    pub fn blend_constants(mut self, value: [f32; 4]) -> Self {
        self.color_blend.constants = value;
        self
    }

    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        self.dynamic_states.push(state);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub module: ShaderModuleHandle,
    pub layout: PipelineLayoutHandle,
}

#[derive(Debug, Clone)]
pub(crate) enum PipelineKind {
    Graphics {
        states: Arc<GraphicsStates>,
        vertex_layout: Arc<VertexLayout>,
    },
    Compute,
}

#[derive(Debug)]
pub struct Pipeline {
    pub(crate) program: GlName,
    pub(crate) push_constants: Arc<[PushUniform]>,
    pub(crate) kind: PipelineKind,
    pub layout: PipelineLayoutHandle,
}

impl Pipeline {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self.kind {
            PipelineKind::Graphics { .. } => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }

    pub fn push_constants(&self) -> &[PushUniform] {
        &self.push_constants
    }
}

fn stencil_face(state: &vk::StencilOpState) -> StencilFace {
    StencilFace {
        func: translate::compare_op(state.compare_op),
        compare_mask: state.compare_mask,
        reference: state.reference,
        fail: translate::stencil_op(state.fail_op),
        depth_fail: translate::stencil_op(state.depth_fail_op),
        pass: translate::stencil_op(state.pass_op),
        write_mask: state.write_mask,
    }
}

fn blend_attachment(state: &vk::PipelineColorBlendAttachmentState) -> BlendAttachment {
    let mask = state.color_write_mask;
    BlendAttachment {
        enabled: state.blend_enable != vk::FALSE,
        src_color: translate::blend_factor(state.src_color_blend_factor),
        dst_color: translate::blend_factor(state.dst_color_blend_factor),
        color_op: translate::blend_op(state.color_blend_op),
        src_alpha: translate::blend_factor(state.src_alpha_blend_factor),
        dst_alpha: translate::blend_factor(state.dst_alpha_blend_factor),
        alpha_op: translate::blend_op(state.alpha_blend_op),
        write_mask: [
            mask.contains(vk::ColorComponentFlags::R),
            mask.contains(vk::ColorComponentFlags::G),
            mask.contains(vk::ColorComponentFlags::B),
            mask.contains(vk::ColorComponentFlags::A),
        ],
    }
}

impl Device {
    pub fn create_pipeline_layout(&self, desc: PipelineLayoutDesc) -> BackendResult<PipelineLayoutHandle> {
        if let Some(range) = desc
            .push_constant_ranges
            .iter()
            .find(|range| {
                range
                    .offset
                    .checked_add(range.size)
                    .map_or(true, |end| end > MAX_PUSH_CONSTANTS_SIZE)
            })
        {
            return Err(BackendError::NotSupported(format!(
                "push constant range at {} of {} bytes past {} bytes",
                range.offset, range.size, MAX_PUSH_CONSTANTS_SIZE
            )));
        }

        let caps = self.caps();
        let limit = |class| match class {
            SlotClass::Texture => caps.max_texture_units,
            SlotClass::Image => caps.max_image_units,
            SlotClass::UniformBuffer => caps.max_uniform_buffers,
            SlotClass::StorageBuffer => caps.max_storage_buffers,
        };
        let mut next = [0u32; 4];
        let mut sets = Vec::with_capacity(desc.set_layouts.len());
        let mut dynamic_counts = Vec::with_capacity(desc.set_layouts.len());
        let storage = self.set_layout_storage.read();
        for handle in &desc.set_layouts {
            let layout = storage
                .get(*handle)
                .ok_or(BackendError::InvalidHandle("descriptor set layout"))?;
            let mut slots = Vec::with_capacity(layout.bindings.len());
            for binding in &layout.bindings {
                let Some(class) = slot_class(binding.ty) else {
                    continue;
                };
                let counter = &mut next[class as usize];
                let slot = BindingSlot {
                    class,
                    ty: binding.ty,
                    first: *counter,
                    count: binding.count,
                };
                *counter += binding.count;
                if *counter > limit(class) {
                    self.debug.warning(&format!(
                        "{:?} binding points exhausted: {} used, {} available",
                        class,
                        *counter,
                        limit(class)
                    ));
                }
                slots.push((binding.binding, slot));
            }
            dynamic_counts.push(
                layout
                    .bindings
                    .iter()
                    .filter(|binding| is_dynamic(binding.ty))
                    .map(|binding| binding.count)
                    .sum(),
            );
            sets.push(slots);
        }
        drop(storage);
        debug!("Pipeline layout binding points: {:?}", next);

        Ok(self.pipeline_layout_storage.write().push(PipelineLayout {
            set_layouts: desc.set_layouts,
            push_constant_ranges: desc.push_constant_ranges,
            sets: Arc::new(sets),
            dynamic_counts,
        }))
    }

    pub fn destroy_pipeline_layout(&self, handle: PipelineLayoutHandle) {
        self.pipeline_layout_storage.write().remove(handle);
    }

    pub(crate) fn pipeline_layout(&self, handle: PipelineLayoutHandle) -> BackendResult<PipelineLayout> {
        self.pipeline_layout_storage
            .read()
            .get(handle)
            .cloned()
            .ok_or(BackendError::InvalidHandle("pipeline layout"))
    }

    pub fn create_graphics_pipeline(&self, desc: GraphicsPipelineDesc) -> BackendResult<PipelineHandle> {
        puffin::profile_function!();
        let layout = self.pipeline_layout(desc.layout)?;
        let color_count = self
            .render_pass_storage
            .read()
            .get(desc.render_pass)
            .ok_or(BackendError::InvalidHandle("render pass"))?
            .subpasses
            .get(desc.subpass as usize)
            .map(|subpass| subpass.color.len())
            .ok_or(BackendError::InvalidState("subpass index out of range"))?;
        {
            let modules = self.shader_storage.read();
            for handle in &desc.stages {
                let module = modules
                    .get(*handle)
                    .ok_or(BackendError::InvalidHandle("shader module"))?;
                if module.stage == vk::ShaderStageFlags::COMPUTE {
                    return Err(BackendError::InvalidState(
                        "compute stage in a graphics pipeline",
                    ));
                }
            }
        }

        let vertex_layout = self.vertex_layout(&desc);
        let states = self.graphics_states(&desc, color_count);
        let program = self.link_program(&desc.stages, &layout)?;

        Ok(self.pipeline_storage.write().push(Pipeline {
            program: program.name,
            push_constants: program.push_constants.into(),
            kind: PipelineKind::Graphics {
                states: Arc::new(states),
                vertex_layout: Arc::new(vertex_layout),
            },
            layout: desc.layout,
        }))
    }

    pub fn create_compute_pipeline(&self, desc: ComputePipelineDesc) -> BackendResult<PipelineHandle> {
        puffin::profile_function!();
        if !self.caps().compute {
            return Err(BackendError::NotSupported(format!(
                "compute pipelines on GL {}.{}",
                self.caps().version.0,
                self.caps().version.1
            )));
        }
        let layout = self.pipeline_layout(desc.layout)?;
        let stage = self
            .shader_storage
            .read()
            .get(desc.module)
            .map(|module| module.stage)
            .ok_or(BackendError::InvalidHandle("shader module"))?;
        if stage != vk::ShaderStageFlags::COMPUTE {
            return Err(BackendError::InvalidState(
                "compute pipeline needs a compute shader",
            ));
        }
        let program = self.link_program(&[desc.module], &layout)?;

        Ok(self.pipeline_storage.write().push(Pipeline {
            program: program.name,
            push_constants: program.push_constants.into(),
            kind: PipelineKind::Compute,
            layout: desc.layout,
        }))
    }

    pub fn destroy_pipeline(&self, handle: PipelineHandle) {
        let Some(pipeline) = self.pipeline_storage.write().remove(handle) else {
            return;
        };
        self.delete_shared(SharedObject::Program(pipeline.program));
        self.collect_geometry();
    }

    fn vertex_layout(&self, desc: &GraphicsPipelineDesc) -> VertexLayout {
        let bindings = desc
            .vertex_bindings
            .iter()
            .map(|binding| VertexBinding {
                binding: binding.binding,
                stride: binding.stride,
                instanced: binding.input_rate == vk::VertexInputRate::INSTANCE,
            })
            .collect::<Vec<_>>();
        let attributes = desc
            .vertex_attributes
            .iter()
            .filter_map(|attribute| {
                if !bindings.iter().any(|binding| binding.binding == attribute.binding) {
                    self.debug.error(&format!(
                        "Vertex attribute {} reads missing binding {}",
                        attribute.location, attribute.binding
                    ));
                    return None;
                }
                let Some((size, ty, normalized, integer)) = vertex_format(attribute.format) else {
                    self.debug.error(&format!(
                        "Vertex format {:?} isn't supported, attribute {} skipped",
                        attribute.format, attribute.location
                    ));
                    return None;
                };
                Some(VertexAttribute {
                    location: attribute.location,
                    binding: attribute.binding,
                    size,
                    ty,
                    normalized,
                    integer,
                    offset: attribute.offset,
                })
            })
            .collect();

        VertexLayout {
            bindings,
            attributes,
        }
    }

    fn graphics_states(&self, desc: &GraphicsPipelineDesc, color_count: usize) -> GraphicsStates {
        let caps = self.caps();
        let dynamic = DynamicStates::from_vk(&desc.dynamic_states);
        if dynamic.contains(DynamicStates::DepthBounds) || desc.depth_stencil.depth_bounds_test_enable != vk::FALSE {
            self.debug.warning("Depth bounds test has no GL equivalent, ignored");
        }

        let topology = translate::primitive_topology(desc.topology);
        if topology == gl::PATCHES && !caps.tessellation {
            self.debug.error("Patch topology needs GL 4.0");
        }

        let raster = &desc.rasterization;
        let depth_bias = (raster.depth_bias_enable != vk::FALSE).then(|| DepthBias {
            constant: raster.depth_bias_constant_factor,
            clamp: raster.depth_bias_clamp,
            slope: raster.depth_bias_slope_factor,
        });
        if depth_bias.map_or(false, |bias| bias.clamp != 0.0) && !caps.polygon_offset_clamp {
            self.debug.warning("Depth bias clamp needs GL 4.6, ignored");
        }
        let rasterization = RasterizationState {
            depth_clamp: raster.depth_clamp_enable != vk::FALSE,
            rasterizer_discard: raster.rasterizer_discard_enable != vk::FALSE,
            polygon_mode: translate::polygon_mode(raster.polygon_mode),
            cull_face: translate::cull_mode(raster.cull_mode),
            front_face: translate::front_face(raster.front_face),
            depth_bias,
            line_width: raster.line_width,
        };

        let sample_shading = desc.multisample.sample_shading.filter(|_| {
            if !caps.sample_shading {
                self.debug.warning("Sample shading needs GL 4.0, ignored");
            }
            caps.sample_shading
        });
        let multisample = MultisampleState {
            enabled: desc.multisample.samples.as_raw() > 1,
            sample_shading,
            sample_mask: desc.multisample.sample_mask,
            alpha_to_coverage: desc.multisample.alpha_to_coverage,
            alpha_to_one: desc.multisample.alpha_to_one,
        };

        let depth = &desc.depth_stencil;
        let depth_stencil = DepthStencilState {
            depth_test: depth.depth_test_enable != vk::FALSE,
            depth_write: depth.depth_write_enable != vk::FALSE,
            depth_func: translate::compare_op(depth.depth_compare_op),
            stencil_test: depth.stencil_test_enable != vk::FALSE,
            front: stencil_face(&depth.front),
            back: stencil_face(&depth.back),
        };

        if desc.color_blend.attachments.len() != color_count {
            self.debug.warning(&format!(
                "Subpass has {} color attachments, pipeline blends {}",
                color_count,
                desc.color_blend.attachments.len()
            ));
        }
        let mut attachments = ArrayVec::<_, MAX_COLOR_ATTACHMENTS>::new();
        for attachment in &desc.color_blend.attachments {
            if attachments.try_push(blend_attachment(attachment)).is_err() {
                self.debug.error("Too many color attachments, extra blend states dropped");
                break;
            }
        }
        while attachments.len() < color_count.min(MAX_COLOR_ATTACHMENTS) {
            attachments.push(BlendAttachment::default());
        }
        let color_blend = ColorBlendState {
            logic_op: desc.color_blend.logic_op.map(translate::logic_op),
            attachments,
            constants: desc.color_blend.constants,
        };

        let viewport_limit = if caps.multi_viewport {
            caps.max_viewports as usize
        } else {
            1
        };
        if desc.viewports.len().max(desc.scissors.len()) > viewport_limit {
            self.debug.warning(&format!(
                "{} viewports requested, {} supported",
                desc.viewports.len(),
                viewport_limit
            ));
        }

        GraphicsStates {
            input_assembly: InputAssemblyState {
                topology,
                primitive_restart: desc.primitive_restart,
            },
            tessellation: TessellationState {
                patch_control_points: desc.patch_control_points,
            },
            rasterization,
            multisample,
            depth_stencil,
            color_blend,
            dynamic,
            viewports: desc
                .viewports
                .iter()
                .take(viewport_limit)
                .map(|viewport| Viewport::from(*viewport))
                .collect(),
            scissors: desc
                .scissors
                .iter()
                .take(viewport_limit)
                .map(|scissor| Rect::from(*scissor))
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ash::vk;

    use crate::{
        testing::{CallLog, RecordingContext},
        BackendError, ComputePipelineDesc, DescriptorSetLayoutDesc, Device,
        DeviceDesc, GraphicsPipelineDesc, PipelineKind, PipelineLayoutDesc, RenderPassDesc,
        ShaderModuleDesc, SlotClass, SubpassDesc,
    };

    fn device(log: &Arc<CallLog>) -> Arc<Device> {
        Device::new(DeviceDesc::new(Box::new(RecordingContext::with_log(
            log.clone(),
        ))))
        .unwrap()
    }

    #[test]
    fn binding_points_per_class() {
        let log = Arc::new(CallLog::default());
        let device = device(&log);
        let first = device
            .create_descriptor_set_layout(
                DescriptorSetLayoutDesc::default()
                    .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL)
                    .binding(
                        1,
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        2,
                        vk::ShaderStageFlags::FRAGMENT,
                    ),
            )
            .unwrap();
        let second = device
            .create_descriptor_set_layout(
                DescriptorSetLayoutDesc::default()
                    .binding(
                        0,
                        vk::DescriptorType::SAMPLED_IMAGE,
                        1,
                        vk::ShaderStageFlags::FRAGMENT,
                    )
                    .binding(
                        2,
                        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                        1,
                        vk::ShaderStageFlags::VERTEX,
                    ),
            )
            .unwrap();
        let handle = device
            .create_pipeline_layout(
                PipelineLayoutDesc::default()
                    .set_layout(first)
                    .set_layout(second),
            )
            .unwrap();
        let layout = device.pipeline_layout(handle).unwrap();

        let texture = layout.slot(1, 0).unwrap();
        assert_eq!(SlotClass::Texture, texture.class);
        assert_eq!(2, texture.first);
        let uniform = layout.slot(1, 2).unwrap();
        assert_eq!(SlotClass::UniformBuffer, uniform.class);
        assert_eq!(1, uniform.first);
        assert_eq!(vec![0u32, 1], layout.dynamic_counts);
        assert!(layout.slot(2, 0).is_none());
    }

    #[test]
    fn oversized_push_constants_are_rejected() {
        let log = Arc::new(CallLog::default());
        let device = device(&log);
        let result = device.create_pipeline_layout(
            PipelineLayoutDesc::default().push_constant_range(vk::ShaderStageFlags::VERTEX, 128, 256),
        );
        assert!(matches!(result, Err(BackendError::NotSupported(_))));
    }

    #[test]
    fn graphics_pipeline_translates_fixed_function() {
        let log = Arc::new(CallLog::default());
        let device = device(&log);
        let layout = device
            .create_pipeline_layout(PipelineLayoutDesc::default())
            .unwrap();
        let render_pass = device
            .create_render_pass(
                RenderPassDesc::default()
                    .color_attachment(
                        vk::Format::R8G8B8A8_UNORM,
                        vk::AttachmentLoadOp::CLEAR,
                        vk::AttachmentStoreOp::STORE,
                    )
                    .subpass(SubpassDesc::default().color(0)),
            )
            .unwrap();
        let vertex = device
            .create_shader_module(ShaderModuleDesc::vertex("void main() {}"))
            .unwrap();
        let fragment = device
            .create_shader_module(ShaderModuleDesc::fragment("void main() {}"))
            .unwrap();
        let pipeline = device
            .create_graphics_pipeline(
                GraphicsPipelineDesc::new(layout, render_pass, 0)
                    .stage(vertex)
                    .stage(fragment)
                    .vertex_binding(0, 20, vk::VertexInputRate::VERTEX)
                    .vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
                    .vertex_attribute(1, 0, vk::Format::R32G32_SFLOAT, 12)
                    .vertex_attribute(2, 3, vk::Format::R32_SFLOAT, 0)
                    .cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::CLOCKWISE)
                    .alpha_blend()
                    .dynamic_state(vk::DynamicState::VIEWPORT),
            )
            .unwrap();

        let storage = device.pipeline_storage.read();
        let PipelineKind::Graphics {
            states,
            vertex_layout,
        } = &storage.get(pipeline).unwrap().kind
        else {
            panic!("graphics pipeline expected");
        };
        assert_eq!(2, vertex_layout.attributes.len());
        assert_eq!(Some(gl::BACK), states.rasterization.cull_face);
        assert_eq!(gl::CW, states.rasterization.front_face);
        assert!(states.color_blend.attachments[0].enabled);
        assert_eq!(gl::SRC_ALPHA, states.color_blend.attachments[0].src_color);
        assert_eq!(1, log.count("link_program"));
    }

    #[test]
    fn destroy_pipeline_deletes_program() {
        let log = Arc::new(CallLog::default());
        let device = device(&log);
        let layout = device
            .create_pipeline_layout(PipelineLayoutDesc::default())
            .unwrap();
        let module = device
            .create_shader_module(ShaderModuleDesc::compute("void main() {}"))
            .unwrap();
        let pipeline = device
            .create_compute_pipeline(ComputePipelineDesc { module, layout })
            .unwrap();
        device.destroy_pipeline(pipeline);
        assert_eq!(1, log.count("delete_program"));
        assert!(device.pipeline_storage.read().get(pipeline).is_none());
    }
}
