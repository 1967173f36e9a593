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

use std::{cell::Cell, collections::BTreeMap, sync::Arc};

use arrayvec::ArrayVec;
use ash::vk;

use crate::{
    pipeline_barrier_bits, translate, BackendError, BackendResult,
    BufferHandle, ClearColor, Command, CommandList, DepthBias, DescriptorSetHandle, Device,
    FramebufferAttachment, FramebufferHandle, GeometryHandle, GeometryKey, GlEnum, GlName,
    GraphicsStates, Image, ImageHandle, PassAttachment, PipelineHandle, PipelineKind,
    PipelineLayoutHandle, PushUniform, Rect, RenderPassHandle, SubpassDesc, TransferRegion,
    VertexLayout, VertexOffsets, Viewport, MAX_PUSH_CONSTANTS_SIZE, MAX_VERTEX_BINDINGS,
};

const PUSH_WORDS: usize = MAX_PUSH_CONSTANTS_SIZE as usize / 4;
const DRAW_INDIRECT_SIZE: u32 = 16;
const DRAW_INDEXED_INDIRECT_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Invalid,
}

#[derive(Debug, Clone)]
struct BoundGraphics {
    handle: PipelineHandle,
    program: GlName,
    states: Arc<GraphicsStates>,
    vertex_layout: Arc<VertexLayout>,
    push_constants: Arc<[PushUniform]>,
}

#[derive(Debug, Clone)]
struct BoundCompute {
    program: GlName,
    push_constants: Arc<[PushUniform]>,
}

/// Render pass instance being recorded.
#[derive(Debug, Clone)]
struct PassState {
    framebuffer: FramebufferHandle,
    is_default: bool,
    subpass: usize,
    subpasses: Vec<SubpassDesc>,
    attachments: Vec<PassAttachment>,
    targets: Vec<FramebufferAttachment>,
    extent: vk::Extent2D,
    draw_buffers: Vec<Vec<GlEnum>>,
    dependencies: Vec<vk::SubpassDependency>,
}

/// Records Vulkan style commands into a [`CommandList`].
///
/// Everything GL specific is decided here: binding points, vertex arrays, clear entry
/// points, copy paths. Replay only walks the list.
#[derive(Debug)]
pub struct CommandBuffer {
    device: Arc<Device>,
    level: vk::CommandBufferLevel,
    state: Cell<CommandBufferState>,
    one_time: bool,
    continue_pass: bool,
    commands: CommandList,
    graphics: Option<BoundGraphics>,
    compute: Option<BoundCompute>,
    program: Option<GlName>,
    geometry: Option<(GeometryHandle, VertexOffsets)>,
    pass: Option<PassState>,
    vertex_buffers: BTreeMap<u32, (BufferHandle, u64)>,
    index_buffer: Option<(BufferHandle, u64, vk::IndexType)>,
    push_words: [u32; PUSH_WORDS],
    push_written: u64,
    label_depth: u32,
}

fn mask_of(range: std::ops::Range<u32>) -> u64 {
    (range.start / 4..range.end.div_ceil(4))
        .filter(|word| (*word as usize) < PUSH_WORDS)
        .fold(0, |mask, word| mask | 1 << word)
}

fn offset_of(offset: vk::Offset3D) -> [i32; 3] {
    [offset.x, offset.y, offset.z]
}

fn remaining(count: u32, total: u32, base: u32, all: u32) -> u32 {
    if count == all {
        total.saturating_sub(base)
    } else {
        count
    }
}

/// Layers a subresource range touches. Slices of a 3D level count as layers.
fn layers_of(image: &Image, level: u32, base: u32, count: u32) -> std::ops::Range<u32> {
    if image.target == gl::TEXTURE_3D {
        0..image.level_extent(level).depth
    } else {
        let count = remaining(count, image.desc.array_layers, base, vk::REMAINING_ARRAY_LAYERS);
        base..base + count
    }
}

fn region(image: &Image, level: u32, layer: u32, offset: [i32; 3], extent: [i32; 3]) -> TransferRegion {
    TransferRegion {
        location: image.location(level, layer),
        offset,
        extent,
    }
}

impl CommandBuffer {
    pub fn new(device: &Arc<Device>, level: vk::CommandBufferLevel) -> Self {
        Self {
            device: device.clone(),
            level,
            state: Cell::new(CommandBufferState::Initial),
            one_time: false,
            continue_pass: false,
            commands: CommandList::default(),
            graphics: None,
            compute: None,
            program: None,
            geometry: None,
            pass: None,
            vertex_buffers: BTreeMap::new(),
            index_buffer: None,
            push_words: [0; PUSH_WORDS],
            push_written: 0,
            label_depth: 0,
        }
    }

    pub fn primary(device: &Arc<Device>) -> Self {
        Self::new(device, vk::CommandBufferLevel::PRIMARY)
    }

    pub fn secondary(device: &Arc<Device>) -> Self {
        Self::new(device, vk::CommandBufferLevel::SECONDARY)
    }

    pub fn state(&self) -> CommandBufferState {
        self.state.get()
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> BackendResult<()> {
        match self.state.get() {
            CommandBufferState::Initial | CommandBufferState::Executable => {}
            CommandBufferState::Recording => {
                return Err(BackendError::InvalidState("command buffer is already recording"))
            }
            CommandBufferState::Invalid => {
                return Err(BackendError::InvalidState(
                    "invalid command buffer has to be reset first",
                ))
            }
        }
        self.clear_recording();
        self.one_time = flags.contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.continue_pass = self.level == vk::CommandBufferLevel::SECONDARY
            && flags.contains(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE);
        self.state.set(CommandBufferState::Recording);

        Ok(())
    }

    pub fn end(&mut self) -> BackendResult<()> {
        if self.state.get() != CommandBufferState::Recording {
            return Err(BackendError::InvalidState("end without begin"));
        }
        if self.pass.is_some() {
            self.state.set(CommandBufferState::Invalid);
            return Err(BackendError::InvalidState(
                "command buffer ended inside a render pass",
            ));
        }
        if self.label_depth > 0 {
            self.device
                .debug
                .warning(&format!("{} debug labels left open", self.label_depth));
            for _ in 0..self.label_depth {
                self.commands.append(Command::PopDebugGroup);
            }
            self.label_depth = 0;
        }
        self.state.set(CommandBufferState::Executable);

        Ok(())
    }

    pub fn reset(&mut self) {
        self.clear_recording();
        self.state.set(CommandBufferState::Initial);
    }

    pub(crate) fn mark_submitted(&self) {
        if self.one_time {
            self.state.set(CommandBufferState::Invalid);
        }
    }

    fn clear_recording(&mut self) {
        self.commands.clear();
        self.graphics = None;
        self.compute = None;
        self.program = None;
        self.geometry = None;
        self.pass = None;
        self.continue_pass = false;
        self.vertex_buffers.clear();
        self.index_buffer = None;
        self.push_words = [0; PUSH_WORDS];
        self.push_written = 0;
        self.label_depth = 0;
    }

    fn recording(&self, op: &str) -> bool {
        if self.state.get() == CommandBufferState::Recording {
            return true;
        }
        self.device.debug.error(&format!(
            "{} recorded in {:?} state, ignored",
            op,
            self.state.get()
        ));
        false
    }

    fn outside_pass(&self, op: &str) -> bool {
        if !self.recording(op) {
            return false;
        }
        if self.pass.is_some() {
            self.device
                .debug
                .error(&format!("{} inside a render pass, ignored", op));
            return false;
        }
        true
    }

    fn inside_pass(&self, op: &str) -> bool {
        if !self.recording(op) {
            return false;
        }
        if self.pass.is_none() && !self.continue_pass {
            self.device
                .debug
                .error(&format!("{} outside a render pass, ignored", op));
            return false;
        }
        true
    }

    /// Makes `program` current and uploads every push constant it can already see.
    fn activate(&mut self, program: GlName, uniforms: &[PushUniform]) {
        if self.program == Some(program) {
            return;
        }
        self.commands.append(Command::UseProgram(program));
        self.program = Some(program);
        self.emit_uniforms(uniforms, vk::ShaderStageFlags::ALL, 0..MAX_PUSH_CONSTANTS_SIZE);
    }

    /// Uploads the uniforms visible to `stages` that overlap `range`. Members not fully
    /// written yet are left alone.
    fn emit_uniforms(
        &mut self,
        uniforms: &[PushUniform],
        stages: vk::ShaderStageFlags,
        range: std::ops::Range<u32>,
    ) {
        for uniform in uniforms {
            let covered = uniform.range();
            if !uniform.stages.intersects(stages)
                || covered.start >= range.end
                || covered.end <= range.start
            {
                continue;
            }
            let mask = mask_of(covered.clone());
            if self.push_written & mask != mask {
                continue;
            }
            let Some(values) =
                uniform
                    .format
                    .pack(&self.push_words, uniform.offset, uniform.array_size)
            else {
                continue;
            };
            let data = self.commands.push_words(&values);
            self.commands.append(Command::Uniform {
                location: uniform.location,
                format: uniform.format,
                count: uniform.array_size,
                offset: uniform.offset,
                stages: uniform.stages,
                data,
            });
        }
    }

    pub fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: PipelineHandle) {
        if !self.recording("bind_pipeline") {
            return;
        }
        let (program, push_constants, graphics) = {
            let storage = self.device.pipeline_storage.read();
            let Some(bound) = storage.get(pipeline) else {
                self.device.debug.error("Binding a destroyed pipeline");
                return;
            };
            if bound.bind_point() != bind_point {
                self.device.debug.error(&format!(
                    "Pipeline bound at {:?}, created for {:?}",
                    bind_point,
                    bound.bind_point()
                ));
                return;
            }
            let graphics = match &bound.kind {
                PipelineKind::Graphics {
                    states,
                    vertex_layout,
                } => Some((states.clone(), vertex_layout.clone())),
                PipelineKind::Compute => None,
            };
            (bound.program, bound.push_constants.clone(), graphics)
        };
        match graphics {
            Some((states, vertex_layout)) => {
                self.graphics = Some(BoundGraphics {
                    handle: pipeline,
                    program,
                    states: states.clone(),
                    vertex_layout,
                    push_constants: push_constants.clone(),
                });
                self.emit_graphics_states(&states);
            }
            None => {
                self.compute = Some(BoundCompute {
                    program,
                    push_constants: push_constants.clone(),
                });
            }
        }
        self.activate(program, &push_constants);
    }

    fn emit_graphics_states(&mut self, states: &GraphicsStates) {
        let dynamic = states.dynamic;
        self.commands
            .append(Command::InputAssembly(states.input_assembly));
        if states.tessellation.patch_control_points > 0 {
            self.commands
                .append(Command::Tessellation(states.tessellation));
        }
        self.commands.append(Command::Rasterization {
            state: states.rasterization,
            dynamic,
        });
        self.commands
            .append(Command::Multisample(states.multisample));
        self.commands.append(Command::DepthStencil {
            state: states.depth_stencil,
            dynamic,
        });
        let blend = self.commands.push_blend_state(states.color_blend.clone());
        self.commands.append(Command::ColorBlend {
            state: blend,
            dynamic,
        });
        if !dynamic.contains(crate::DynamicStates::Viewport) {
            for (index, viewport) in states.viewports.iter().enumerate() {
                self.commands.append(Command::SetViewport {
                    index: index as u32,
                    viewport: *viewport,
                });
            }
        }
        if !dynamic.contains(crate::DynamicStates::Scissor) {
            for (index, rect) in states.scissors.iter().enumerate() {
                self.commands.append(Command::SetScissor {
                    index: index as u32,
                    rect: *rect,
                });
            }
        }
    }

    /// Resolves every binding of `sets` to bind commands right away. Dynamic offsets are
    /// consumed in set order, then binding order.
    pub fn bind_descriptor_sets(
        &mut self,
        _bind_point: vk::PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        if !self.recording("bind_descriptor_sets") {
            return;
        }
        let device = self.device.clone();
        let Some((slots, dynamic_counts)) = device
            .pipeline_layout_storage
            .read()
            .get(layout)
            .map(|layout| (layout.sets.clone(), layout.dynamic_counts.clone()))
        else {
            device
                .debug
                .error("Binding descriptor sets through a destroyed pipeline layout");
            return;
        };
        let first = first_set as usize;
        if first + sets.len() > slots.len() {
            device.debug.error(&format!(
                "Sets {}..{} bound, layout has {}",
                first,
                first + sets.len(),
                slots.len()
            ));
            return;
        }
        let expected: u32 = dynamic_counts[first..first + sets.len()].iter().sum();
        if expected as usize != dynamic_offsets.len() {
            device.debug.error(&format!(
                "{} dynamic offsets given, bound sets need {}",
                dynamic_offsets.len(),
                expected
            ));
            return;
        }

        let storage = device.descriptor_storage.read();
        let mut offsets = dynamic_offsets.iter().copied();
        for (index, handle) in sets.iter().enumerate() {
            let set_index = first + index;
            let Some(set) = storage.get(*handle) else {
                device
                    .debug
                    .error(&format!("Descriptor set {} was freed", set_index));
                offsets
                    .by_ref()
                    .take(dynamic_counts[set_index] as usize)
                    .for_each(drop);
                continue;
            };
            set.resolve(
                &slots[set_index],
                &mut offsets,
                device.caps(),
                &device.debug,
                &mut self.commands,
            );
        }
    }

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[BufferHandle], offsets: &[u64]) {
        if !self.recording("bind_vertex_buffers") {
            return;
        }
        if buffers.len() != offsets.len() {
            self.device
                .debug
                .error("Vertex buffer and offset counts differ");
            return;
        }
        for (index, (buffer, offset)) in buffers.iter().zip(offsets).enumerate() {
            self.vertex_buffers
                .insert(first_binding + index as u32, (*buffer, *offset));
        }
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, index_type: vk::IndexType) {
        if !self.recording("bind_index_buffer") {
            return;
        }
        if index_type == vk::IndexType::UINT8_EXT {
            self.device
                .debug
                .warning("8-bit indices may be slow on this driver");
        }
        self.index_buffer = Some((buffer, offset, index_type));
    }

    pub fn set_viewport(&mut self, first: u32, viewports: &[vk::Viewport]) {
        if !self.recording("set_viewport") {
            return;
        }
        for (index, viewport) in viewports.iter().enumerate() {
            self.commands.append(Command::SetViewport {
                index: first + index as u32,
                viewport: Viewport::from(*viewport),
            });
        }
    }

    pub fn set_scissor(&mut self, first: u32, scissors: &[vk::Rect2D]) {
        if !self.recording("set_scissor") {
            return;
        }
        for (index, scissor) in scissors.iter().enumerate() {
            self.commands.append(Command::SetScissor {
                index: first + index as u32,
                rect: Rect::from(*scissor),
            });
        }
    }

    pub fn set_line_width(&mut self, width: f32) {
        if self.recording("set_line_width") {
            self.commands.append(Command::SetLineWidth(width));
        }
    }

    pub fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32) {
        if self.recording("set_depth_bias") {
            self.commands.append(Command::SetDepthBias(DepthBias {
                constant,
                clamp,
                slope,
            }));
        }
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) {
        if self.recording("set_blend_constants") {
            self.commands
                .append(Command::SetBlendConstants(constants));
        }
    }

    pub fn set_depth_bounds(&mut self, _min: f32, _max: f32) {
        if self.recording("set_depth_bounds") {
            self.device
                .debug
                .warning("Depth bounds test has no GL equivalent, ignored");
        }
    }

    pub fn set_stencil_compare_mask(&mut self, faces: vk::StencilFaceFlags, mask: u32) {
        if self.recording("set_stencil_compare_mask") {
            self.commands
                .append(Command::SetStencilCompareMask { faces, mask });
        }
    }

    pub fn set_stencil_write_mask(&mut self, faces: vk::StencilFaceFlags, mask: u32) {
        if self.recording("set_stencil_write_mask") {
            self.commands
                .append(Command::SetStencilWriteMask { faces, mask });
        }
    }

    pub fn set_stencil_reference(&mut self, faces: vk::StencilFaceFlags, reference: u32) {
        if self.recording("set_stencil_reference") {
            self.commands
                .append(Command::SetStencilReference { faces, reference });
        }
    }

    /// Updates the push constant block and uploads every member the update touched to
    /// the current program. Programs bound later pick the values up when made current.
    pub fn push_constants(
        &mut self,
        _layout: PipelineLayoutHandle,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        if !self.recording("push_constants") {
            return;
        }
        let end = offset as usize + data.len();
        if offset % 4 != 0 || data.len() % 4 != 0 || end > MAX_PUSH_CONSTANTS_SIZE as usize {
            self.device.debug.error(&format!(
                "Push constant update {}..{} is unaligned or out of range",
                offset, end
            ));
            return;
        }
        let first = offset as usize / 4;
        for (index, chunk) in data.chunks_exact(4).enumerate() {
            self.push_words[first + index] =
                u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.push_written |= mask_of(offset..end as u32);

        let active = match (&self.graphics, &self.compute) {
            (Some(graphics), _) if Some(graphics.program) == self.program => {
                Some(graphics.push_constants.clone())
            }
            (_, Some(compute)) if Some(compute.program) == self.program => {
                Some(compute.push_constants.clone())
            }
            _ => None,
        };
        if let Some(uniforms) = active {
            self.emit_uniforms(&uniforms, stages, offset..end as u32);
        }
    }

    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        if !self.outside_pass("begin_render_pass") {
            return;
        }
        if self.level != vk::CommandBufferLevel::PRIMARY {
            self.device
                .debug
                .error("Render passes begin in primary command buffers only");
            return;
        }
        let device = self.device.clone();
        let (attachments, subpasses, dependencies, draw_buffers, all_draw_buffers) = {
            let passes = device.render_pass_storage.read();
            let Some(pass) = passes.get(render_pass) else {
                device.debug.error("Beginning a destroyed render pass");
                return;
            };
            let is_default = device
                .framebuffer_storage
                .read()
                .get(framebuffer)
                .map(|framebuffer| framebuffer.is_default)
                .unwrap_or(false);
            (
                pass.attachments.clone(),
                pass.subpasses.clone(),
                pass.dependencies.clone(),
                (0..pass.subpasses.len())
                    .map(|index| pass.draw_buffers(index, is_default))
                    .collect::<Vec<_>>(),
                pass.all_draw_buffers(is_default),
            )
        };
        let Some((targets, extent, is_default)) = device
            .framebuffer_storage
            .read()
            .get(framebuffer)
            .map(|framebuffer| {
                (
                    framebuffer.attachments.clone(),
                    framebuffer.extent,
                    framebuffer.is_default,
                )
            })
        else {
            device.debug.error("Beginning a render pass on a destroyed framebuffer");
            return;
        };
        if !is_default && targets.len() != attachments.len() {
            device
                .debug
                .error("Framebuffer doesn't match the render pass attachments");
            return;
        }

        let full = render_area.offset.x <= 0
            && render_area.offset.y <= 0
            && render_area.extent.width >= extent.width
            && render_area.extent.height >= extent.height;
        let area = (!full).then(|| Rect::from(render_area));

        self.commands.append(if is_default {
            Command::BindBackBuffer
        } else {
            Command::BindFramebuffer(framebuffer)
        });
        let buffers = self.commands.push_enums(&all_draw_buffers);
        self.commands.append(Command::DrawBuffers(buffers));

        for (index, attachment) in attachments.iter().enumerate() {
            let load_color = attachment.desc.load_op == vk::AttachmentLoadOp::CLEAR;
            let clear_depth = attachment.format.has_depth() && load_color;
            let clear_stencil = attachment.format.has_stencil()
                && attachment.desc.stencil_load_op == vk::AttachmentLoadOp::CLEAR;
            if !(attachment.is_color() && load_color) && !clear_depth && !clear_stencil {
                continue;
            }
            let Some(value) = clear_values.get(index) else {
                device
                    .debug
                    .error(&format!("No clear value for attachment {}", index));
                continue;
            };
            if attachment.is_color() {
                // SAFETY: a color attachment is cleared from the color member.
                let color = unsafe { value.color };
                self.commands.append(if is_default {
                    // SAFETY: the back buffer is a normalized format.
                    Command::ClearBackColor {
                        value: unsafe { color.float32 },
                        area,
                    }
                } else {
                    Command::ClearColor {
                        draw_buffer: attachment.point - gl::COLOR_ATTACHMENT0,
                        value: ClearColor::from_vk(&color, attachment.format.integer_class()),
                        area,
                    }
                });
            } else {
                // SAFETY: depth and stencil attachments are cleared from the depth/stencil member.
                let value = unsafe { value.depth_stencil };
                let depth = clear_depth.then_some(value.depth);
                let stencil = clear_stencil.then_some(value.stencil);
                self.commands.append(match (is_default, depth, stencil) {
                    (true, depth, stencil) => Command::ClearBackDepthStencil {
                        depth,
                        stencil,
                        area,
                    },
                    (false, Some(depth), Some(stencil)) => Command::ClearDepthStencil {
                        depth,
                        stencil,
                        area,
                    },
                    (false, Some(depth), None) => Command::ClearDepth { depth, area },
                    (false, None, Some(stencil)) => Command::ClearStencil { stencil, area },
                    (false, None, None) => continue,
                });
            }
        }

        let first = self.commands.push_enums(&draw_buffers[0]);
        self.commands.append(Command::DrawBuffers(first));
        self.pass = Some(PassState {
            framebuffer,
            is_default,
            subpass: 0,
            subpasses,
            attachments,
            targets,
            extent,
            draw_buffers,
            dependencies,
        });
    }

    /// Blits every resolve attachment of the current subpass.
    fn resolve_subpass(&mut self) {
        let Some(pass) = &self.pass else {
            return;
        };
        if pass.is_default {
            return;
        }
        let extent = [pass.extent.width as i32, pass.extent.height as i32, 1];
        let blits = pass.subpasses[pass.subpass]
            .resolves()
            .filter_map(|(color, resolve)| {
                let src = pass.targets.get(color as usize)?;
                let dst = pass.targets.get(resolve as usize)?;
                Some(Command::BlitImage {
                    src: TransferRegion {
                        location: src.location,
                        offset: [0; 3],
                        extent,
                    },
                    dst: TransferRegion {
                        location: dst.location,
                        offset: [0; 3],
                        extent,
                    },
                    mask: gl::COLOR_BUFFER_BIT,
                    filter: gl::NEAREST,
                })
            })
            .collect::<Vec<_>>();
        if blits.is_empty() {
            return;
        }
        let framebuffer = pass.framebuffer;
        blits
            .into_iter()
            .for_each(|blit| self.commands.append(blit));
        self.commands
            .append(Command::BindFramebuffer(framebuffer));
    }

    pub fn next_subpass(&mut self) {
        if !self.recording("next_subpass") {
            return;
        }
        let Some(pass) = &self.pass else {
            self.device
                .debug
                .error("next_subpass outside a render pass, ignored");
            return;
        };
        let next = pass.subpass + 1;
        if next >= pass.subpasses.len() {
            self.device
                .debug
                .error("next_subpass past the last subpass, ignored");
            return;
        }
        let current = pass.subpass as u32;
        let bits = pass
            .dependencies
            .iter()
            .filter(|dependency| {
                dependency.src_subpass == current && dependency.dst_subpass == next as u32
            })
            .fold(crate::MemoryBarrierBits::empty(), |bits, dependency| {
                bits | pipeline_barrier_bits(
                    dependency.src_stage_mask,
                    dependency.dst_stage_mask,
                    std::iter::empty(),
                )
            });
        self.resolve_subpass();
        if !bits.is_empty() && self.device.caps().image_load_store {
            self.commands.append(Command::MemoryBarrier(bits));
        }
        let Some(pass) = &mut self.pass else {
            return;
        };
        pass.subpass = next;
        let buffers = self.commands.push_enums(&pass.draw_buffers[next]);
        self.commands.append(Command::DrawBuffers(buffers));
    }

    pub fn end_render_pass(&mut self) {
        if !self.recording("end_render_pass") {
            return;
        }
        if self.pass.is_none() {
            self.device
                .debug
                .error("end_render_pass outside a render pass, ignored");
            return;
        }
        self.resolve_subpass();
        let Some(pass) = self.pass.take() else {
            return;
        };
        if !self.device.caps().invalidate_framebuffer {
            return;
        }
        let discard = |op: vk::AttachmentStoreOp| op == vk::AttachmentStoreOp::DONT_CARE;
        let mut invalidate = Vec::new();
        for attachment in &pass.attachments {
            let desc = &attachment.desc;
            let format = &attachment.format;
            let color = attachment.is_color() && discard(desc.store_op);
            let depth = format.has_depth() && discard(desc.store_op);
            let stencil = format.has_stencil() && discard(desc.stencil_store_op);
            let (color_point, depth_point, stencil_point, both_point) = if pass.is_default {
                (gl::COLOR, gl::DEPTH, gl::STENCIL, None)
            } else {
                (
                    attachment.point,
                    gl::DEPTH_ATTACHMENT,
                    gl::STENCIL_ATTACHMENT,
                    Some(gl::DEPTH_STENCIL_ATTACHMENT),
                )
            };
            if color {
                invalidate.push(color_point);
                continue;
            }
            match (depth, stencil, both_point) {
                (true, true, Some(point)) => invalidate.push(point),
                (depth, stencil, _) => {
                    if depth {
                        invalidate.push(depth_point);
                    }
                    if stencil {
                        invalidate.push(stencil_point);
                    }
                }
            }
        }
        if !invalidate.is_empty() {
            let range = self.commands.push_enums(&invalidate);
            self.commands
                .append(Command::InvalidateFramebuffer(range));
        }
    }

    /// Clears regions of attachments of the current subpass.
    pub fn clear_attachments(&mut self, attachments: &[vk::ClearAttachment], rects: &[vk::ClearRect]) {
        if !self.inside_pass("clear_attachments") {
            return;
        }
        let Some(pass) = &self.pass else {
            self.device
                .debug
                .error("clear_attachments in a secondary buffer needs the render pass, ignored");
            return;
        };
        let subpass = &pass.subpasses[pass.subpass];
        let mut clears = Vec::new();
        for attachment in attachments {
            for rect in rects {
                if rect.layer_count != 1 || rect.base_array_layer != 0 {
                    self.device
                        .debug
                        .warning("Layered attachment clears touch every layer");
                }
                let area = Some(Rect::from(rect.rect));
                if attachment.aspect_mask.contains(vk::ImageAspectFlags::COLOR) {
                    let index = attachment.color_attachment as usize;
                    let Some(format) = subpass
                        .color
                        .get(index)
                        .and_then(|color| pass.attachments.get(*color as usize))
                        .map(|attachment| attachment.format)
                    else {
                        continue;
                    };
                    // SAFETY: color aspect clears read the color member.
                    let color = unsafe { attachment.clear_value.color };
                    clears.push(if pass.is_default {
                        // SAFETY: the back buffer is a normalized format.
                        Command::ClearBackColor {
                            value: unsafe { color.float32 },
                            area,
                        }
                    } else {
                        Command::ClearColor {
                            draw_buffer: index as u32,
                            value: ClearColor::from_vk(&color, format.integer_class()),
                            area,
                        }
                    });
                    continue;
                }
                // SAFETY: depth and stencil aspect clears read the depth/stencil member.
                let value = unsafe { attachment.clear_value.depth_stencil };
                let depth = attachment
                    .aspect_mask
                    .contains(vk::ImageAspectFlags::DEPTH)
                    .then_some(value.depth);
                let stencil = attachment
                    .aspect_mask
                    .contains(vk::ImageAspectFlags::STENCIL)
                    .then_some(value.stencil);
                clears.push(match (pass.is_default, depth, stencil) {
                    (true, depth, stencil) => Command::ClearBackDepthStencil {
                        depth,
                        stencil,
                        area,
                    },
                    (false, Some(depth), Some(stencil)) => Command::ClearDepthStencil {
                        depth,
                        stencil,
                        area,
                    },
                    (false, Some(depth), None) => Command::ClearDepth { depth, area },
                    (false, None, Some(stencil)) => Command::ClearStencil { stencil, area },
                    (false, None, None) => continue,
                });
            }
        }
        clears
            .into_iter()
            .for_each(|clear| self.commands.append(clear));
    }

    /// Shared part of every draw: pipeline, program and vertex array.
    fn prepare_draw(&mut self, op: &str, indexed: bool) -> Option<BoundGraphics> {
        if !self.inside_pass(op) {
            return None;
        }
        let Some(graphics) = self.graphics.clone() else {
            self.device
                .debug
                .error(&format!("{} without a graphics pipeline, ignored", op));
            return None;
        };
        let mut vertex = ArrayVec::<_, MAX_VERTEX_BINDINGS>::new();
        for binding in &graphics.vertex_layout.bindings {
            let Some((buffer, offset)) = self.vertex_buffers.get(&binding.binding) else {
                self.device.debug.error(&format!(
                    "{} with nothing bound at vertex binding {}, ignored",
                    op, binding.binding
                ));
                return None;
            };
            if vertex
                .try_push((binding.binding, *buffer, *offset))
                .is_err()
            {
                self.device
                    .debug
                    .error(&format!("{} uses too many vertex bindings, ignored", op));
                return None;
            }
        }
        vertex.sort_by_key(|(binding, _, _)| *binding);
        let offsets = vertex
            .iter()
            .map(|(_, _, offset)| *offset)
            .collect::<VertexOffsets>();
        let index = match (indexed, self.index_buffer) {
            (false, _) => None,
            (true, Some((buffer, _, _))) => Some(buffer),
            (true, None) => {
                self.device
                    .debug
                    .error(&format!("{} without an index buffer, ignored", op));
                return None;
            }
        };
        let key = GeometryKey {
            pipeline: graphics.handle,
            vertex: vertex
                .iter()
                .map(|(binding, buffer, _)| (*binding, *buffer))
                .collect(),
            index,
        };
        let Some(geometry) = self
            .device
            .geometry_buffers(key, &graphics.vertex_layout)
        else {
            self.device
                .debug
                .error(&format!("{} reads a destroyed buffer, ignored", op));
            return None;
        };

        self.activate(graphics.program, &graphics.push_constants);
        let bound = Some((geometry, offsets));
        if self.geometry != bound {
            if let Some((geometry, offsets)) = &bound {
                let offsets = self.commands.push_offsets(offsets);
                self.commands.append(Command::BindGeometry {
                    geometry: *geometry,
                    offsets,
                });
            }
            self.geometry = bound;
        }

        Some(graphics)
    }

    fn check_first_instance(&self, first_instance: u32) {
        if first_instance != 0 && !self.device.caps().base_instance {
            self.device
                .debug
                .warning("First instance needs GL 4.2, drawing from instance 0");
        }
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        let Some(graphics) = self.prepare_draw("draw", false) else {
            return;
        };
        self.check_first_instance(first_instance);
        self.commands.append(Command::Draw {
            mode: graphics.states.input_assembly.topology,
            first: first_vertex,
            count: vertex_count,
            instances: instance_count,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        let Some(graphics) = self.prepare_draw("draw_indexed", true) else {
            return;
        };
        let Some((_, offset, ty)) = self.index_buffer else {
            return;
        };
        self.check_first_instance(first_instance);
        let (index_type, size) = translate::index_type(ty);
        self.commands.append(Command::DrawIndexed {
            mode: graphics.states.input_assembly.topology,
            index_type,
            offset: offset + first_index as u64 * size,
            count: index_count,
            instances: instance_count,
            vertex_offset,
            first_instance,
            primitive_restart: graphics.states.input_assembly.primitive_restart,
        });
    }

    fn indirect_buffer(&self, op: &str, buffer: BufferHandle) -> Option<GlName> {
        if !self.device.caps().indirect_draw {
            self.device
                .debug
                .error(&format!("{} needs GL 4.0, ignored", op));
            return None;
        }
        let name = self
            .device
            .buffer_storage
            .read()
            .get(buffer)
            .map(|buffer| buffer.name);
        if name.is_none() {
            self.device
                .debug
                .error(&format!("{} reads a destroyed buffer, ignored", op));
        }
        name
    }

    /// Splits multi-draws into single draws when the driver can't take them at once.
    fn indirect_draws(&self, offset: u64, count: u32, stride: u32, tight: u32) -> Vec<(u64, u32, u32)> {
        if !self.device.caps().base_instance {
            self.device
                .debug
                .warning("Indirect draws need a zero base instance before GL 4.2");
        }
        let stride = if stride == 0 { tight } else { stride };
        if count <= 1 || self.device.caps().multi_draw_indirect {
            return vec![(offset, count, stride)];
        }
        (0..count)
            .map(|index| (offset + index as u64 * stride as u64, 1, stride))
            .collect()
    }

    pub fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) {
        if !self.recording("draw_indirect") {
            return;
        }
        let Some(name) = self.indirect_buffer("draw_indirect", buffer) else {
            return;
        };
        let Some(graphics) = self.prepare_draw("draw_indirect", false) else {
            return;
        };
        for (offset, count, stride) in self.indirect_draws(offset, draw_count, stride, DRAW_INDIRECT_SIZE) {
            self.commands.append(Command::DrawIndirect {
                mode: graphics.states.input_assembly.topology,
                buffer: name,
                offset,
                count,
                stride,
            });
        }
    }

    pub fn draw_indexed_indirect(&mut self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) {
        if !self.recording("draw_indexed_indirect") {
            return;
        }
        let Some(name) = self.indirect_buffer("draw_indexed_indirect", buffer) else {
            return;
        };
        let Some(graphics) = self.prepare_draw("draw_indexed_indirect", true) else {
            return;
        };
        let Some((_, index_offset, ty)) = self.index_buffer else {
            return;
        };
        if index_offset != 0 {
            self.device
                .debug
                .warning("Index buffer offset is ignored by indirect draws");
        }
        let (index_type, _) = translate::index_type(ty);
        for (offset, count, stride) in
            self.indirect_draws(offset, draw_count, stride, DRAW_INDEXED_INDIRECT_SIZE)
        {
            self.commands.append(Command::DrawIndexedIndirect {
                mode: graphics.states.input_assembly.topology,
                index_type,
                buffer: name,
                offset,
                count,
                stride,
                primitive_restart: graphics.states.input_assembly.primitive_restart,
            });
        }
    }

    fn prepare_dispatch(&mut self, op: &str) -> bool {
        if !self.outside_pass(op) {
            return false;
        }
        let Some(compute) = self.compute.clone() else {
            self.device
                .debug
                .error(&format!("{} without a compute pipeline, ignored", op));
            return false;
        };
        self.activate(compute.program, &compute.push_constants);
        true
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if self.prepare_dispatch("dispatch") {
            self.commands.append(Command::Dispatch([x, y, z]));
        }
    }

    pub fn dispatch_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        if !self.prepare_dispatch("dispatch_indirect") {
            return;
        }
        let name = self
            .device
            .buffer_storage
            .read()
            .get(buffer)
            .map(|buffer| buffer.name);
        match name {
            Some(buffer) => self
                .commands
                .append(Command::DispatchIndirect { buffer, offset }),
            None => self
                .device
                .debug
                .error("dispatch_indirect reads a destroyed buffer, ignored"),
        }
    }

    pub fn pipeline_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        if !self.recording("pipeline_barrier") {
            return;
        }
        if !self.device.caps().image_load_store {
            return;
        }
        let bits = pipeline_barrier_bits(
            src_stages,
            dst_stages,
            image_barriers.iter().map(|barrier| barrier.new_layout),
        );
        if !bits.is_empty() {
            self.commands.append(Command::MemoryBarrier(bits));
        }
    }

    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, regions: &[vk::BufferCopy]) {
        if !self.outside_pass("copy_buffer") {
            return;
        }
        let device = self.device.clone();
        let buffers = device.buffer_storage.read();
        let (Some(src), Some(dst)) = (buffers.get(src), buffers.get(dst)) else {
            device.debug.error("copy_buffer with a destroyed buffer, ignored");
            return;
        };
        for region in regions {
            if region.src_offset + region.size > src.desc.size
                || region.dst_offset + region.size > dst.desc.size
            {
                device.debug.error("copy_buffer region out of bounds, skipped");
                continue;
            }
            self.commands.append(Command::CopyBuffer {
                src: src.name,
                dst: dst.name,
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            });
        }
    }

    pub fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if !self.outside_pass("update_buffer") {
            return;
        }
        if offset % 4 != 0 || data.len() % 4 != 0 {
            self.device
                .debug
                .error("update_buffer needs 4-byte aligned offset and size, ignored");
            return;
        }
        let Some(name) = self
            .device
            .buffer_storage
            .read()
            .get(buffer)
            .filter(|buffer| offset + data.len() as u64 <= buffer.desc.size)
            .map(|buffer| buffer.name)
        else {
            self.device
                .debug
                .error("update_buffer on a destroyed buffer or out of bounds, ignored");
            return;
        };
        let words = data
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        let data = self.commands.push_words(&words);
        self.commands.append(Command::UpdateBuffer {
            buffer: name,
            offset,
            data,
        });
    }

    pub fn fill_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64, value: u32) {
        if !self.outside_pass("fill_buffer") {
            return;
        }
        let Some((name, total)) = self
            .device
            .buffer_storage
            .read()
            .get(buffer)
            .map(|buffer| (buffer.name, buffer.desc.size))
        else {
            self.device
                .debug
                .error("fill_buffer on a destroyed buffer, ignored");
            return;
        };
        let size = if size == vk::WHOLE_SIZE {
            total.saturating_sub(offset) & !3
        } else {
            size
        };
        if offset + size > total {
            self.device.debug.error("fill_buffer out of bounds, ignored");
            return;
        }
        self.commands.append(Command::FillBuffer {
            buffer: name,
            offset,
            size,
            value,
        });
    }

    pub fn copy_image(
        &mut self,
        src: ImageHandle,
        _src_layout: vk::ImageLayout,
        dst: ImageHandle,
        _dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        if !self.outside_pass("copy_image") {
            return;
        }
        let device = self.device.clone();
        let images = device.image_storage.read();
        let (Some(src), Some(dst)) = (images.get(src), images.get(dst)) else {
            device.debug.error("copy_image with a destroyed image, ignored");
            return;
        };
        let native = device.caps().copy_image;
        if !native && (src.format.is_compressed() || src.desc.samples.as_raw() > 1) {
            device
                .debug
                .error("Copying compressed or multisampled images needs GL 4.3, ignored");
            return;
        }
        if src.format.block_size != dst.format.block_size {
            device
                .debug
                .error("copy_image between formats of different texel size, ignored");
            return;
        }
        for copy in regions {
            let extent = [
                copy.extent.width as i32,
                copy.extent.height as i32,
                copy.extent.depth as i32,
            ];
            let layers = if src.target == gl::TEXTURE_3D {
                1
            } else {
                copy.src_subresource.layer_count
            };
            for layer in 0..layers {
                let src_layer = if src.target == gl::TEXTURE_3D {
                    copy.src_offset.z as u32
                } else {
                    copy.src_subresource.base_array_layer + layer
                };
                let dst_layer = if dst.target == gl::TEXTURE_3D {
                    copy.dst_offset.z as u32
                } else {
                    copy.dst_subresource.base_array_layer + layer
                };
                let src_region = region(
                    src,
                    copy.src_subresource.mip_level,
                    src_layer,
                    offset_of(copy.src_offset),
                    extent,
                );
                let dst_region = region(
                    dst,
                    copy.dst_subresource.mip_level,
                    dst_layer,
                    offset_of(copy.dst_offset),
                    extent,
                );
                if native {
                    self.commands.append(Command::CopyImage {
                        src: src_region,
                        dst: dst_region,
                    });
                    continue;
                }
                // Readback works a slice at a time.
                for slice in 0..extent[2].max(1) {
                    let step = |mut region: TransferRegion, target: GlEnum| {
                        region.extent[2] = 1;
                        if target == gl::TEXTURE_3D {
                            region.offset[2] += slice;
                            region.location.layer += slice as u32;
                        }
                        region
                    };
                    self.commands.append(Command::CopyImageViaHost {
                        src: step(src_region, src.target),
                        dst: step(dst_region, dst.target),
                        upload_target: dst.upload_target(dst_layer),
                    });
                }
            }
        }
    }

    pub fn blit_image(
        &mut self,
        src: ImageHandle,
        _src_layout: vk::ImageLayout,
        dst: ImageHandle,
        _dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        if !self.outside_pass("blit_image") {
            return;
        }
        let device = self.device.clone();
        let images = device.image_storage.read();
        let (Some(src), Some(dst)) = (images.get(src), images.get(dst)) else {
            device.debug.error("blit_image with a destroyed image, ignored");
            return;
        };
        let mask = src.format.buffer_mask() & dst.format.buffer_mask();
        if mask == 0 {
            device
                .debug
                .error("blit_image between images without common aspects, ignored");
            return;
        }
        let filter = if mask == gl::COLOR_BUFFER_BIT {
            translate::filter(filter)
        } else {
            gl::NEAREST
        };
        for blit in regions {
            let extent = |offsets: &[vk::Offset3D; 2]| {
                [
                    offsets[1].x - offsets[0].x,
                    offsets[1].y - offsets[0].y,
                    1,
                ]
            };
            let layers = if src.target == gl::TEXTURE_3D {
                1
            } else {
                blit.src_subresource.layer_count
            };
            for layer in 0..layers {
                let layer_of = |image: &Image, offsets: &[vk::Offset3D; 2], base: u32| {
                    if image.target == gl::TEXTURE_3D {
                        offsets[0].z as u32
                    } else {
                        base + layer
                    }
                };
                self.commands.append(Command::BlitImage {
                    src: region(
                        src,
                        blit.src_subresource.mip_level,
                        layer_of(src, &blit.src_offsets, blit.src_subresource.base_array_layer),
                        offset_of(blit.src_offsets[0]),
                        extent(&blit.src_offsets),
                    ),
                    dst: region(
                        dst,
                        blit.dst_subresource.mip_level,
                        layer_of(dst, &blit.dst_offsets, blit.dst_subresource.base_array_layer),
                        offset_of(blit.dst_offsets[0]),
                        extent(&blit.dst_offsets),
                    ),
                    mask,
                    filter,
                });
            }
        }
    }

    pub fn copy_buffer_to_image(
        &mut self,
        buffer: BufferHandle,
        image: ImageHandle,
        _layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        if !self.outside_pass("copy_buffer_to_image") {
            return;
        }
        let device = self.device.clone();
        let Some(buffer) = device
            .buffer_storage
            .read()
            .get(buffer)
            .map(|buffer| buffer.name)
        else {
            device
                .debug
                .error("copy_buffer_to_image from a destroyed buffer, ignored");
            return;
        };
        let images = device.image_storage.read();
        let Some(image) = images.get(image) else {
            device
                .debug
                .error("copy_buffer_to_image into a destroyed image, ignored");
            return;
        };
        if image.desc.samples.as_raw() > 1 {
            device
                .debug
                .error("Multisampled images can't be uploaded to, ignored");
            return;
        }
        for copy in regions {
            let extent = copy.image_extent;
            let row_length = if copy.buffer_row_length == 0 {
                extent.width
            } else {
                copy.buffer_row_length
            };
            let image_height = if copy.buffer_image_height == 0 {
                extent.height
            } else {
                copy.buffer_image_height
            };
            let layer_size = image
                .format
                .region_size(row_length, image_height, extent.depth);
            let layers = if image.target == gl::TEXTURE_3D {
                1
            } else {
                copy.image_subresource.layer_count
            };
            for index in 0..layers {
                let layer = copy.image_subresource.base_array_layer + index;
                self.commands.append(Command::CopyBufferToImage {
                    buffer,
                    offset: copy.buffer_offset + index as u64 * layer_size,
                    dst: region(
                        image,
                        copy.image_subresource.mip_level,
                        layer,
                        offset_of(copy.image_offset),
                        [
                            extent.width as i32,
                            extent.height as i32,
                            extent.depth as i32,
                        ],
                    ),
                    upload_target: image.upload_target(layer),
                    row_length: copy.buffer_row_length,
                    image_height: copy.buffer_image_height,
                });
            }
        }
    }

    pub fn copy_image_to_buffer(
        &mut self,
        image: ImageHandle,
        _layout: vk::ImageLayout,
        buffer: BufferHandle,
        regions: &[vk::BufferImageCopy],
    ) {
        if !self.outside_pass("copy_image_to_buffer") {
            return;
        }
        let device = self.device.clone();
        let Some(buffer) = device
            .buffer_storage
            .read()
            .get(buffer)
            .map(|buffer| buffer.name)
        else {
            device
                .debug
                .error("copy_image_to_buffer into a destroyed buffer, ignored");
            return;
        };
        let images = device.image_storage.read();
        let Some(image) = images.get(image) else {
            device
                .debug
                .error("copy_image_to_buffer from a destroyed image, ignored");
            return;
        };
        if image.format.is_compressed() || image.desc.samples.as_raw() > 1 {
            device
                .debug
                .error("Compressed and multisampled images can't be read back, ignored");
            return;
        }
        for copy in regions {
            let extent = copy.image_extent;
            let row_length = if copy.buffer_row_length == 0 {
                extent.width
            } else {
                copy.buffer_row_length
            };
            let image_height = if copy.buffer_image_height == 0 {
                extent.height
            } else {
                copy.buffer_image_height
            };
            let slice_size = image.format.region_size(row_length, image_height, 1);
            let slices = if image.target == gl::TEXTURE_3D {
                (copy.image_offset.z as u32..copy.image_offset.z as u32 + extent.depth)
                    .collect::<Vec<_>>()
            } else {
                let base = copy.image_subresource.base_array_layer;
                (base..base + copy.image_subresource.layer_count).collect()
            };
            for (index, layer) in slices.into_iter().enumerate() {
                self.commands.append(Command::CopyImageToBuffer {
                    src: region(
                        image,
                        copy.image_subresource.mip_level,
                        layer,
                        [copy.image_offset.x, copy.image_offset.y, 0],
                        [extent.width as i32, extent.height as i32, 1],
                    ),
                    buffer,
                    offset: copy.buffer_offset + index as u64 * slice_size,
                    row_length: copy.buffer_row_length,
                    image_height: copy.buffer_image_height,
                });
            }
        }
    }

    pub fn clear_color_image(
        &mut self,
        image: ImageHandle,
        _layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        if !self.outside_pass("clear_color_image") {
            return;
        }
        let device = self.device.clone();
        let images = device.image_storage.read();
        let Some(image) = images.get(image) else {
            device
                .debug
                .error("clear_color_image on a destroyed image, ignored");
            return;
        };
        let value = ClearColor::from_vk(color, image.format.integer_class());
        for range in ranges {
            let levels = remaining(
                range.level_count,
                image.desc.mip_levels,
                range.base_mip_level,
                vk::REMAINING_MIP_LEVELS,
            );
            for level in range.base_mip_level..range.base_mip_level + levels {
                for layer in layers_of(image, level, range.base_array_layer, range.layer_count) {
                    self.commands.append(Command::ClearImageColor {
                        image: image.location(level, layer),
                        value,
                    });
                }
            }
        }
    }

    pub fn clear_depth_stencil_image(
        &mut self,
        image: ImageHandle,
        _layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        if !self.outside_pass("clear_depth_stencil_image") {
            return;
        }
        let device = self.device.clone();
        let images = device.image_storage.read();
        let Some(image) = images.get(image) else {
            device
                .debug
                .error("clear_depth_stencil_image on a destroyed image, ignored");
            return;
        };
        for range in ranges {
            let depth = (range.aspect_mask.contains(vk::ImageAspectFlags::DEPTH)
                && image.format.has_depth())
            .then_some(value.depth);
            let stencil = (range.aspect_mask.contains(vk::ImageAspectFlags::STENCIL)
                && image.format.has_stencil())
            .then_some(value.stencil);
            if depth.is_none() && stencil.is_none() {
                continue;
            }
            let levels = remaining(
                range.level_count,
                image.desc.mip_levels,
                range.base_mip_level,
                vk::REMAINING_MIP_LEVELS,
            );
            for level in range.base_mip_level..range.base_mip_level + levels {
                for layer in layers_of(image, level, range.base_array_layer, range.layer_count) {
                    self.commands.append(Command::ClearImageDepthStencil {
                        image: image.location(level, layer),
                        depth,
                        stencil,
                    });
                }
            }
        }
    }

    /// Inlines secondary command buffers. Bound state is unknown afterwards.
    pub fn execute_commands(&mut self, secondaries: &[&CommandBuffer]) {
        if !self.recording("execute_commands") {
            return;
        }
        if self.level != vk::CommandBufferLevel::PRIMARY {
            self.device
                .debug
                .error("execute_commands in a secondary command buffer, ignored");
            return;
        }
        for secondary in secondaries {
            if secondary.level != vk::CommandBufferLevel::SECONDARY
                || secondary.state() != CommandBufferState::Executable
            {
                self.device
                    .debug
                    .error("execute_commands needs executable secondary buffers, skipped");
                continue;
            }
            self.commands.extend_from(&secondary.commands);
            secondary.mark_submitted();
        }
        self.graphics = None;
        self.compute = None;
        self.program = None;
        self.geometry = None;
        self.vertex_buffers.clear();
        self.index_buffer = None;
    }

    pub fn begin_label(&mut self, name: &str) {
        if !self.recording("begin_label") || !self.device.caps().debug_groups {
            return;
        }
        let label = self.commands.push_label(name);
        self.commands.append(Command::PushDebugGroup(label));
        self.label_depth += 1;
    }

    pub fn end_label(&mut self) {
        if !self.recording("end_label") || !self.device.caps().debug_groups {
            return;
        }
        if self.label_depth == 0 {
            self.device.debug.error("end_label without begin_label");
            return;
        }
        self.label_depth -= 1;
        self.commands.append(Command::PopDebugGroup);
    }
}

impl Clone for CommandBuffer {
    /// Deep copy of the recorded commands and the recording state.
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            level: self.level,
            state: Cell::new(self.state.get()),
            one_time: self.one_time,
            continue_pass: self.continue_pass,
            commands: self.commands.clone(),
            graphics: self.graphics.clone(),
            compute: self.compute.clone(),
            program: self.program,
            geometry: self.geometry.clone(),
            pass: self.pass.clone(),
            vertex_buffers: self.vertex_buffers.clone(),
            index_buffer: self.index_buffer,
            push_words: self.push_words,
            push_written: self.push_written,
            label_depth: self.label_depth,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ash::vk;

    use crate::{
        testing::{CallLog, Fixture},
        BackendError, BufferDesc, ClearColor, Command, CommandBuffer, CommandBufferState,
        ConstantFormat, ImageDesc,
    };

    #[test]
    fn state_machine() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let mut cb = CommandBuffer::primary(&fixture.device);
        assert_eq!(CommandBufferState::Initial, cb.state());
        cb.draw(3, 1, 0, 0);
        assert!(cb.commands().is_empty());

        cb.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        assert!(matches!(
            cb.begin(vk::CommandBufferUsageFlags::empty()),
            Err(BackendError::InvalidState(_))
        ));
        cb.end().unwrap();
        assert_eq!(CommandBufferState::Executable, cb.state());
        cb.mark_submitted();
        assert_eq!(CommandBufferState::Invalid, cb.state());
        assert!(cb.begin(vk::CommandBufferUsageFlags::empty()).is_err());
        cb.reset();
        assert_eq!(CommandBufferState::Initial, cb.state());
    }

    #[test]
    fn bind_pipeline_emits_state_blocks() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let pipeline = fixture.pipeline(&[]);
        let mut cb = CommandBuffer::primary(&fixture.device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        cb.end().unwrap();

        assert!(cb
            .commands()
            .iter()
            .any(|command| matches!(command, Command::UseProgram(_))));
        assert!(cb
            .commands()
            .iter()
            .any(|command| matches!(command, Command::ColorBlend { .. })));
        assert!(cb
            .commands()
            .iter()
            .any(|command| matches!(command, Command::DepthStencil { .. })));
    }

    #[test]
    fn render_pass_clears_then_selects_draw_buffers() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let mut cb = CommandBuffer::primary(&fixture.device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        fixture.begin_pass(&mut cb, [1.0, 0.0, 0.0, 1.0]);
        cb.end_render_pass();
        cb.end().unwrap();

        let commands = cb.commands().iter().copied().collect::<Vec<_>>();
        assert!(matches!(commands[0], Command::BindFramebuffer(_)));
        assert!(matches!(commands[1], Command::DrawBuffers(_)));
        assert_eq!(
            Command::ClearColor {
                draw_buffer: 0,
                value: ClearColor::Float([1.0, 0.0, 0.0, 1.0]),
                area: None,
            },
            commands[2]
        );
        assert!(matches!(commands[3], Command::DrawBuffers(_)));
    }

    #[test]
    fn draws_outside_a_pass_are_dropped() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let pipeline = fixture.pipeline(&[]);
        let mut cb = CommandBuffer::primary(&fixture.device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        let before = cb.commands().len();
        cb.draw(3, 1, 0, 0);
        assert_eq!(before, cb.commands().len());
    }

    #[test]
    fn indexed_draw_offsets_and_vertex_array_reuse() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let pipeline = fixture.pipeline(&[]);
        let device = &fixture.device;
        let vertices = device
            .create_buffer(BufferDesc::gpu(1024, vk::BufferUsageFlags::VERTEX_BUFFER))
            .unwrap();
        let indices = device
            .create_buffer(BufferDesc::gpu(1024, vk::BufferUsageFlags::INDEX_BUFFER))
            .unwrap();
        let mut cb = CommandBuffer::primary(device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        fixture.begin_pass(&mut cb, [0.0; 4]);
        cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        cb.bind_vertex_buffers(0, &[vertices], &[0]);
        cb.bind_index_buffer(indices, 64, vk::IndexType::UINT16);
        cb.draw_indexed(6, 1, 3, 0, 0);
        cb.draw_indexed(6, 1, 0, 0, 0);
        cb.end_render_pass();
        cb.end().unwrap();

        let geometry = cb
            .commands()
            .iter()
            .filter(|command| matches!(command, Command::BindGeometry { .. }))
            .count();
        assert_eq!(1, geometry);
        let offsets = cb
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::DrawIndexed { offset, index_type, .. } => Some((*offset, *index_type)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(70, gl::UNSIGNED_SHORT), (64, gl::UNSIGNED_SHORT)], offsets);
        assert_eq!(1, device.geometry.lock().len());
    }

    #[test]
    fn push_constants_follow_stages() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let pipeline = fixture.pipeline(&[
            ("tint", 0, ConstantFormat::Vec4),
            ("transform", 16, ConstantFormat::Mat4),
        ]);
        let mut cb = CommandBuffer::primary(&fixture.device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        let data = [0u8; 80];
        cb.push_constants(fixture.layout, vk::ShaderStageFlags::VERTEX, 0, &data);
        assert!(!cb
            .commands()
            .iter()
            .any(|command| matches!(command, Command::Uniform { .. })));
        cb.push_constants(fixture.layout, vk::ShaderStageFlags::FRAGMENT, 0, &data);
        let uniforms = cb
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::Uniform { format, stages, .. } => Some((*format, *stages)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                (ConstantFormat::Vec4, vk::ShaderStageFlags::FRAGMENT),
                (ConstantFormat::Mat4, vk::ShaderStageFlags::FRAGMENT)
            ],
            uniforms
        );
    }

    #[test]
    fn clone_survives_reset() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let mut cb = CommandBuffer::primary(&fixture.device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        fixture.begin_pass(&mut cb, [0.0, 1.0, 0.0, 1.0]);
        cb.end_render_pass();
        cb.end().unwrap();

        let copy = cb.clone();
        let original = cb.commands().clone();
        cb.reset();
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cb.set_line_width(2.0);
        cb.end().unwrap();

        assert_eq!(&original, copy.commands());
        assert_ne!(&original, cb.commands());
    }

    #[test]
    fn image_copies_pick_a_path() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let device = &fixture.device;
        let src = device
            .create_image(ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 64, 64).array_layers(2))
            .unwrap();
        let dst = device
            .create_image(ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 64, 64).array_layers(2))
            .unwrap();
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 2,
        };
        let mut cb = CommandBuffer::primary(device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cb.copy_image(
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[vk::ImageCopy {
                src_subresource: layers,
                src_offset: vk::Offset3D::default(),
                dst_subresource: layers,
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: 64,
                    height: 64,
                    depth: 1,
                },
            }],
        );
        cb.clear_color_image(
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
            &[vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            }],
        );
        cb.end().unwrap();

        let copies = cb
            .commands()
            .iter()
            .filter(|command| matches!(command, Command::CopyImage { .. }))
            .count();
        let clears = cb
            .commands()
            .iter()
            .filter(|command| matches!(command, Command::ClearImageColor { .. }))
            .count();
        assert_eq!(2, copies);
        assert_eq!(2, clears);
    }
}
