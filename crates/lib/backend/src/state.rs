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

use std::collections::HashMap;

use arrayvec::ArrayVec;
use ash::vk;
use bitflags::bitflags;

use crate::{Gl, GlEnum, GlName};

pub const MAX_COLOR_ATTACHMENTS: usize = 8;
pub const MAX_VIEWPORTS: usize = 16;

const STENCIL_FACES: [GlEnum; 2] = [gl::FRONT, gl::BACK];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl From<vk::Viewport> for Viewport {
    fn from(value: vk::Viewport) -> Self {
        Self {
            x: value.x,
            y: value.y,
            width: value.width,
            height: value.height,
            min_depth: value.min_depth,
            max_depth: value.max_depth,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn as_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width as i32, self.height as i32]
    }
}

impl From<vk::Rect2D> for Rect {
    fn from(value: vk::Rect2D) -> Self {
        Self::new(
            value.offset.x,
            value.offset.y,
            value.extent.width,
            value.extent.height,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputAssemblyState {
    pub topology: GlEnum,
    pub primitive_restart: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    pub depth_clamp: bool,
    pub rasterizer_discard: bool,
    pub polygon_mode: GlEnum,
    pub cull_face: Option<GlEnum>,
    pub front_face: GlEnum,
    pub depth_bias: Option<DepthBias>,
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            depth_clamp: false,
            rasterizer_discard: false,
            polygon_mode: gl::FILL,
            cull_face: None,
            front_face: gl::CCW,
            depth_bias: None,
            line_width: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultisampleState {
    pub enabled: bool,
    pub sample_shading: Option<f32>,
    pub sample_mask: u32,
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_shading: None,
            sample_mask: !0,
            alpha_to_coverage: false,
            alpha_to_one: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilFace {
    pub func: GlEnum,
    pub compare_mask: u32,
    pub reference: u32,
    pub fail: GlEnum,
    pub depth_fail: GlEnum,
    pub pass: GlEnum,
    pub write_mask: u32,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            func: gl::ALWAYS,
            compare_mask: !0,
            reference: 0,
            fail: gl::KEEP,
            depth_fail: gl::KEEP,
            pass: gl::KEEP,
            write_mask: !0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: GlEnum,
    pub stencil_test: bool,
    pub front: StencilFace,
    pub back: StencilFace,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_func: gl::LESS,
            stencil_test: false,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendAttachment {
    pub enabled: bool,
    pub src_color: GlEnum,
    pub dst_color: GlEnum,
    pub color_op: GlEnum,
    pub src_alpha: GlEnum,
    pub dst_alpha: GlEnum,
    pub alpha_op: GlEnum,
    pub write_mask: [bool; 4],
}

impl Default for BlendAttachment {
    fn default() -> Self {
        Self {
            enabled: false,
            src_color: gl::ONE,
            dst_color: gl::ZERO,
            color_op: gl::FUNC_ADD,
            src_alpha: gl::ONE,
            dst_alpha: gl::ZERO,
            alpha_op: gl::FUNC_ADD,
            write_mask: [true; 4],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ColorBlendState {
    pub logic_op: Option<GlEnum>,
    pub attachments: ArrayVec<BlendAttachment, MAX_COLOR_ATTACHMENTS>,
    pub constants: [f32; 4],
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TessellationState {
    pub patch_control_points: u32,
}

bitflags! {
    /// Pipeline state left to `cmd_set_*` calls.
    #[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
    pub struct DynamicStates: u32 {
        const Viewport = 1;
        const Scissor = 2;
        const LineWidth = 4;
        const DepthBias = 8;
        const BlendConstants = 16;
        const DepthBounds = 32;
        const StencilCompareMask = 64;
        const StencilWriteMask = 128;
        const StencilReference = 256;
    }
}

impl DynamicStates {
    pub fn from_vk(states: &[vk::DynamicState]) -> Self {
        states
            .iter()
            .fold(Self::empty(), |result, state| match *state {
                vk::DynamicState::VIEWPORT => result | Self::Viewport,
                vk::DynamicState::SCISSOR => result | Self::Scissor,
                vk::DynamicState::LINE_WIDTH => result | Self::LineWidth,
                vk::DynamicState::DEPTH_BIAS => result | Self::DepthBias,
                vk::DynamicState::BLEND_CONSTANTS => result | Self::BlendConstants,
                vk::DynamicState::DEPTH_BOUNDS => result | Self::DepthBounds,
                vk::DynamicState::STENCIL_COMPARE_MASK => result | Self::StencilCompareMask,
                vk::DynamicState::STENCIL_WRITE_MASK => result | Self::StencilWriteMask,
                vk::DynamicState::STENCIL_REFERENCE => result | Self::StencilReference,
                _ => result,
            })
    }
}

/// Image unit binding for load/store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageUnitBinding {
    pub texture: GlName,
    pub level: u32,
    pub layered: bool,
    pub layer: u32,
    pub access: GlEnum,
    pub format: GlEnum,
}

/// Cached driver value.
///
/// An empty cache means the driver value is unknown and the next set always goes through.
#[derive(Debug, Clone, Copy)]
pub struct Cached<T>(Option<T>);

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: PartialEq + Copy> Cached<T> {
    pub fn get(&self) -> Option<T> {
        self.0
    }

    pub fn invalidate(&mut self) {
        self.0 = None;
    }

    pub fn is_invalid(&self, value: &T) -> bool {
        self.0.as_ref() != Some(value)
    }

    /// Stores the value and runs `f` if the cached one differs. Returns `true` if `f` ran.
    pub fn set_if_invalid(&mut self, value: T, f: impl FnOnce()) -> bool {
        if self.is_invalid(&value) {
            self.0 = Some(value);
            f();
            true
        } else {
            false
        }
    }
}

fn toggle(gl: &dyn Gl, cap: GlEnum, enabled: bool) {
    if enabled {
        gl.enable(cap);
    } else {
        gl.disable(cap);
    }
}

fn stencil_faces(faces: vk::StencilFaceFlags) -> impl Iterator<Item = usize> {
    [
        faces.contains(vk::StencilFaceFlags::FRONT),
        faces.contains(vk::StencilFaceFlags::BACK),
    ]
    .into_iter()
    .enumerate()
    .filter_map(|(index, selected)| selected.then_some(index))
}

/// Values a clear temporarily overrides. Handed back to [`ContextState::end_clear`].
#[derive(Debug, Default)]
pub struct ClearScope {
    color_mask: Option<(usize, [bool; 4])>,
    depth_write: Option<bool>,
    stencil_write_mask: [Option<u32>; 2],
    rasterizer_discard: Option<bool>,
    scissor_test: Option<bool>,
    scissor: Option<Rect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

/// Shadow copy of a context's driver state.
///
/// Only valid while the owning context is locked. Anything that touches the driver behind
/// the cache's back must call [`ContextState::invalidate`].
#[derive(Debug, Default)]
pub struct ContextState {
    primitive_restart: Cached<bool>,
    restart_index: Cached<u32>,
    patch_vertices: Cached<u32>,

    depth_clamp: Cached<bool>,
    rasterizer_discard: Cached<bool>,
    polygon_mode: Cached<GlEnum>,
    cull_enabled: Cached<bool>,
    cull_face: Cached<GlEnum>,
    front_face: Cached<GlEnum>,
    polygon_offset_enabled: Cached<bool>,
    polygon_offset: Cached<DepthBias>,
    line_width: Cached<f32>,

    multisample: Cached<bool>,
    sample_shading_enabled: Cached<bool>,
    min_sample_shading: Cached<f32>,
    sample_mask_enabled: Cached<bool>,
    sample_mask: Cached<u32>,
    alpha_to_coverage: Cached<bool>,
    alpha_to_one: Cached<bool>,

    depth_test: Cached<bool>,
    depth_write: Cached<bool>,
    depth_func: Cached<GlEnum>,
    stencil_test: Cached<bool>,
    stencil_func: [Cached<(GlEnum, u32, u32)>; 2],
    stencil_op: [Cached<(GlEnum, GlEnum, GlEnum)>; 2],
    stencil_write_mask: [Cached<u32>; 2],

    logic_op_enabled: Cached<bool>,
    logic_op: Cached<GlEnum>,
    blend_enabled: [Cached<bool>; MAX_COLOR_ATTACHMENTS],
    blend_equation: [Cached<(GlEnum, GlEnum)>; MAX_COLOR_ATTACHMENTS],
    blend_func: [Cached<[GlEnum; 4]>; MAX_COLOR_ATTACHMENTS],
    color_mask: [Cached<[bool; 4]>; MAX_COLOR_ATTACHMENTS],
    blend_constants: Cached<[f32; 4]>,

    viewports: [Cached<[f32; 4]>; MAX_VIEWPORTS],
    depth_ranges: [Cached<[f32; 2]>; MAX_VIEWPORTS],
    scissor_test: Cached<bool>,
    scissors: [Cached<Rect>; MAX_VIEWPORTS],

    program: Cached<GlName>,
    draw_framebuffer: Cached<GlName>,
    read_framebuffer: Cached<GlName>,
    vertex_array: Cached<GlName>,
    buffers: HashMap<GlEnum, GlName>,
    indexed_buffers: HashMap<(GlEnum, u32), (GlName, u64, u64)>,
    active_texture: Cached<u32>,
    textures: HashMap<u32, (GlEnum, GlName)>,
    samplers: HashMap<u32, GlName>,
    image_units: HashMap<u32, ImageUnitBinding>,
    pixel_store: HashMap<GlEnum, i32>,
}

impl ContextState {
    /// Forgets everything, the next apply of every block reaches the driver.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    pub fn apply_input_assembly(&mut self, gl: &dyn Gl, state: &InputAssemblyState, fixed_index: bool) {
        self.set_primitive_restart(gl, state.primitive_restart, fixed_index);
    }

    /// Without fixed-index restart (GL 4.2 and older) the cut index has to be set per index
    /// type with [`ContextState::set_restart_index`].
    pub fn set_primitive_restart(&mut self, gl: &dyn Gl, enabled: bool, fixed_index: bool) {
        let cap = if fixed_index {
            gl::PRIMITIVE_RESTART_FIXED_INDEX
        } else {
            gl::PRIMITIVE_RESTART
        };
        self.primitive_restart
            .set_if_invalid(enabled, || toggle(gl, cap, enabled));
    }

    /// Sets the cut index to the maximum value of `index_type`.
    pub fn set_restart_index(&mut self, gl: &dyn Gl, index_type: GlEnum) {
        let index = match index_type {
            gl::UNSIGNED_BYTE => 0xFF,
            gl::UNSIGNED_SHORT => 0xFFFF,
            _ => 0xFFFF_FFFF,
        };
        self.restart_index
            .set_if_invalid(index, || gl.primitive_restart_index(index));
    }

    pub fn restart_index(&self) -> Option<u32> {
        self.restart_index.get()
    }

    pub fn primitive_restart(&self) -> Option<bool> {
        self.primitive_restart.get()
    }

    pub fn apply_tessellation(&mut self, gl: &dyn Gl, state: &TessellationState) {
        if state.patch_control_points > 0 {
            self.patch_vertices
                .set_if_invalid(state.patch_control_points, || {
                    gl.patch_vertices(state.patch_control_points)
                });
        }
    }

    pub fn apply_rasterization(
        &mut self,
        gl: &dyn Gl,
        state: &RasterizationState,
        dynamic: DynamicStates,
    ) {
        self.depth_clamp
            .set_if_invalid(state.depth_clamp, || {
                toggle(gl, gl::DEPTH_CLAMP, state.depth_clamp)
            });
        self.set_rasterizer_discard(gl, state.rasterizer_discard);
        self.polygon_mode
            .set_if_invalid(state.polygon_mode, || gl.polygon_mode(state.polygon_mode));
        self.cull_enabled
            .set_if_invalid(state.cull_face.is_some(), || {
                toggle(gl, gl::CULL_FACE, state.cull_face.is_some())
            });
        if let Some(mode) = state.cull_face {
            self.cull_face.set_if_invalid(mode, || gl.cull_face(mode));
        }
        self.front_face
            .set_if_invalid(state.front_face, || gl.front_face(state.front_face));
        let offset = state.depth_bias.is_some();
        self.polygon_offset_enabled.set_if_invalid(offset, || {
            toggle(gl, gl::POLYGON_OFFSET_FILL, offset);
            toggle(gl, gl::POLYGON_OFFSET_LINE, offset);
            toggle(gl, gl::POLYGON_OFFSET_POINT, offset);
        });
        if let Some(bias) = state.depth_bias {
            if !dynamic.contains(DynamicStates::DepthBias) {
                self.set_depth_bias(gl, bias);
            }
        }
        if !dynamic.contains(DynamicStates::LineWidth) {
            self.set_line_width(gl, state.line_width);
        }
    }

    pub fn set_rasterizer_discard(&mut self, gl: &dyn Gl, enabled: bool) {
        self.rasterizer_discard.set_if_invalid(enabled, || {
            toggle(gl, gl::RASTERIZER_DISCARD, enabled)
        });
    }

    pub fn set_depth_bias(&mut self, gl: &dyn Gl, bias: DepthBias) {
        self.polygon_offset.set_if_invalid(bias, || {
            gl.polygon_offset(bias.slope, bias.constant, bias.clamp)
        });
    }

    pub fn set_line_width(&mut self, gl: &dyn Gl, width: f32) {
        self.line_width
            .set_if_invalid(width, || gl.line_width(width));
    }

    pub fn apply_multisample(&mut self, gl: &dyn Gl, state: &MultisampleState) {
        self.multisample
            .set_if_invalid(state.enabled, || {
                toggle(gl, gl::MULTISAMPLE, state.enabled)
            });
        let shading = state.sample_shading.is_some();
        self.sample_shading_enabled
            .set_if_invalid(shading, || toggle(gl, gl::SAMPLE_SHADING, shading));
        if let Some(value) = state.sample_shading {
            self.min_sample_shading
                .set_if_invalid(value, || gl.min_sample_shading(value));
        }
        let masked = state.sample_mask != !0;
        self.sample_mask_enabled
            .set_if_invalid(masked, || toggle(gl, gl::SAMPLE_MASK, masked));
        if masked {
            self.sample_mask
                .set_if_invalid(state.sample_mask, || gl.sample_mask(state.sample_mask));
        }
        self.alpha_to_coverage
            .set_if_invalid(state.alpha_to_coverage, || {
                toggle(gl, gl::SAMPLE_ALPHA_TO_COVERAGE, state.alpha_to_coverage)
            });
        self.alpha_to_one.set_if_invalid(state.alpha_to_one, || {
            toggle(gl, gl::SAMPLE_ALPHA_TO_ONE, state.alpha_to_one)
        });
    }

    pub fn apply_depth_stencil(
        &mut self,
        gl: &dyn Gl,
        state: &DepthStencilState,
        dynamic: DynamicStates,
    ) {
        self.depth_test.set_if_invalid(state.depth_test, || {
            toggle(gl, gl::DEPTH_TEST, state.depth_test)
        });
        if state.depth_test {
            self.depth_func
                .set_if_invalid(state.depth_func, || gl.depth_func(state.depth_func));
        }
        self.set_depth_write(gl, state.depth_write);
        self.stencil_test.set_if_invalid(state.stencil_test, || {
            toggle(gl, gl::STENCIL_TEST, state.stencil_test)
        });
        if !state.stencil_test {
            return;
        }
        for (index, face) in [state.front, state.back].iter().enumerate() {
            let (_, cached_reference, cached_mask) = self.stencil_func[index]
                .get()
                .unwrap_or((gl::ALWAYS, 0, !0));
            let reference = if dynamic.contains(DynamicStates::StencilReference) {
                cached_reference
            } else {
                face.reference
            };
            let mask = if dynamic.contains(DynamicStates::StencilCompareMask) {
                cached_mask
            } else {
                face.compare_mask
            };
            self.set_stencil_func(gl, index, (face.func, reference, mask));
            let ops = (face.fail, face.depth_fail, face.pass);
            self.stencil_op[index].set_if_invalid(ops, || {
                gl.stencil_op_separate(STENCIL_FACES[index], ops.0, ops.1, ops.2)
            });
            if !dynamic.contains(DynamicStates::StencilWriteMask) {
                self.set_stencil_write_mask_face(gl, index, face.write_mask);
            }
        }
    }

    fn set_depth_write(&mut self, gl: &dyn Gl, enabled: bool) {
        self.depth_write
            .set_if_invalid(enabled, || gl.depth_mask(enabled));
    }

    fn set_stencil_func(&mut self, gl: &dyn Gl, index: usize, func: (GlEnum, u32, u32)) {
        self.stencil_func[index].set_if_invalid(func, || {
            gl.stencil_func_separate(STENCIL_FACES[index], func.0, func.1, func.2)
        });
    }

    fn set_stencil_write_mask_face(&mut self, gl: &dyn Gl, index: usize, mask: u32) {
        self.stencil_write_mask[index].set_if_invalid(mask, || {
            gl.stencil_mask_separate(STENCIL_FACES[index], mask)
        });
    }

    pub fn set_stencil_compare_mask(&mut self, gl: &dyn Gl, faces: vk::StencilFaceFlags, mask: u32) {
        for index in stencil_faces(faces) {
            let (func, reference, _) = self.stencil_func[index]
                .get()
                .unwrap_or((gl::ALWAYS, 0, !0));
            self.set_stencil_func(gl, index, (func, reference, mask));
        }
    }

    pub fn set_stencil_reference(
        &mut self,
        gl: &dyn Gl,
        faces: vk::StencilFaceFlags,
        reference: u32,
    ) {
        for index in stencil_faces(faces) {
            let (func, _, mask) = self.stencil_func[index]
                .get()
                .unwrap_or((gl::ALWAYS, 0, !0));
            self.set_stencil_func(gl, index, (func, reference, mask));
        }
    }

    pub fn set_stencil_write_mask(&mut self, gl: &dyn Gl, faces: vk::StencilFaceFlags, mask: u32) {
        for index in stencil_faces(faces) {
            self.set_stencil_write_mask_face(gl, index, mask);
        }
    }

    /// Blend factors and equations of a disabled attachment are left alone.
    pub fn apply_color_blend(
        &mut self,
        gl: &dyn Gl,
        state: &ColorBlendState,
        dynamic: DynamicStates,
    ) {
        let logic = state.logic_op.is_some();
        self.logic_op_enabled
            .set_if_invalid(logic, || toggle(gl, gl::COLOR_LOGIC_OP, logic));
        if let Some(op) = state.logic_op {
            self.logic_op.set_if_invalid(op, || gl.logic_op(op));
        }
        for (index, attachment) in state.attachments.iter().enumerate() {
            let buffer = index as u32;
            self.blend_enabled[index].set_if_invalid(attachment.enabled, || {
                if attachment.enabled {
                    gl.enable_i(gl::BLEND, buffer);
                } else {
                    gl.disable_i(gl::BLEND, buffer);
                }
            });
            if attachment.enabled {
                let equation = (attachment.color_op, attachment.alpha_op);
                self.blend_equation[index].set_if_invalid(equation, || {
                    gl.blend_equation_separate_i(buffer, equation.0, equation.1)
                });
                let func = [
                    attachment.src_color,
                    attachment.dst_color,
                    attachment.src_alpha,
                    attachment.dst_alpha,
                ];
                self.blend_func[index].set_if_invalid(func, || {
                    gl.blend_func_separate_i(buffer, func[0], func[1], func[2], func[3])
                });
            }
            self.set_color_mask(gl, index, attachment.write_mask);
        }
        if !dynamic.contains(DynamicStates::BlendConstants) {
            self.set_blend_constants(gl, state.constants);
        }
    }

    fn set_color_mask(&mut self, gl: &dyn Gl, index: usize, mask: [bool; 4]) {
        self.color_mask[index].set_if_invalid(mask, || gl.color_mask_i(index as u32, mask));
    }

    pub fn blend_enabled(&self, attachment: usize) -> Option<bool> {
        self.blend_enabled.get(attachment).and_then(Cached::get)
    }

    pub fn set_blend_constants(&mut self, gl: &dyn Gl, constants: [f32; 4]) {
        self.blend_constants
            .set_if_invalid(constants, || gl.blend_color(constants));
    }

    pub fn set_viewport(&mut self, gl: &dyn Gl, index: u32, viewport: &Viewport) {
        let Some(slot) = self.viewports.get_mut(index as usize) else {
            return;
        };
        let rect = [viewport.x, viewport.y, viewport.width, viewport.height];
        slot.set_if_invalid(rect, || gl.viewport(index, rect));
        let range = [viewport.min_depth, viewport.max_depth];
        self.depth_ranges[index as usize]
            .set_if_invalid(range, || gl.depth_range(index, range[0], range[1]));
    }

    pub fn set_scissor(&mut self, gl: &dyn Gl, index: u32, rect: &Rect) {
        self.scissor_test
            .set_if_invalid(true, || gl.enable(gl::SCISSOR_TEST));
        if let Some(slot) = self.scissors.get_mut(index as usize) {
            slot.set_if_invalid(*rect, || gl.scissor(index, rect.as_array()));
        }
    }

    /// Blits and full-target clears must not be clipped by a leftover scissor.
    pub fn disable_scissor_test(&mut self, gl: &dyn Gl) {
        self.scissor_test
            .set_if_invalid(false, || gl.disable(gl::SCISSOR_TEST));
    }

    /// Disables the scissor test for a blit. Hand the result to
    /// [`ContextState::resume_scissor_test`] afterwards.
    pub fn suspend_scissor_test(&mut self, gl: &dyn Gl) -> Option<bool> {
        let previous = self.scissor_test.get();
        self.disable_scissor_test(gl);
        previous
    }

    pub fn resume_scissor_test(&mut self, gl: &dyn Gl, previous: Option<bool>) {
        if let Some(enabled) = previous {
            self.scissor_test
                .set_if_invalid(enabled, || toggle(gl, gl::SCISSOR_TEST, enabled));
        }
    }

    pub fn use_program(&mut self, gl: &dyn Gl, program: GlName) {
        self.program
            .set_if_invalid(program, || gl.use_program(program));
    }

    /// Tells the cache a program was bound behind its back.
    pub fn forget_program(&mut self) {
        self.program.invalidate();
    }

    pub fn program(&self) -> Option<GlName> {
        self.program.get()
    }

    pub fn bind_framebuffer(&mut self, gl: &dyn Gl, target: GlEnum, framebuffer: GlName) {
        match target {
            gl::DRAW_FRAMEBUFFER => {
                self.draw_framebuffer
                    .set_if_invalid(framebuffer, || gl.bind_framebuffer(target, framebuffer));
            }
            gl::READ_FRAMEBUFFER => {
                self.read_framebuffer
                    .set_if_invalid(framebuffer, || gl.bind_framebuffer(target, framebuffer));
            }
            _ => {
                if self.draw_framebuffer.is_invalid(&framebuffer)
                    || self.read_framebuffer.is_invalid(&framebuffer)
                {
                    gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer);
                    self.draw_framebuffer.set_if_invalid(framebuffer, || {});
                    self.read_framebuffer.set_if_invalid(framebuffer, || {});
                }
            }
        }
    }

    pub fn draw_framebuffer(&self) -> Option<GlName> {
        self.draw_framebuffer.get()
    }

    /// Forgets a deleted framebuffer, GL rebinds zero in that case.
    pub fn framebuffer_deleted(&mut self, framebuffer: GlName) {
        if self.draw_framebuffer.get() == Some(framebuffer) {
            self.draw_framebuffer.invalidate();
        }
        if self.read_framebuffer.get() == Some(framebuffer) {
            self.read_framebuffer.invalidate();
        }
    }

    pub fn bind_vertex_array(&mut self, gl: &dyn Gl, vertex_array: GlName) {
        self.vertex_array
            .set_if_invalid(vertex_array, || gl.bind_vertex_array(vertex_array));
    }

    pub fn vertex_array_deleted(&mut self, vertex_array: GlName) {
        if self.vertex_array.get() == Some(vertex_array) {
            self.vertex_array.invalidate();
        }
    }

    /// Non-indexed buffer targets. `ELEMENT_ARRAY_BUFFER` belongs to the vertex array and
    /// is never cached here.
    pub fn bind_buffer(&mut self, gl: &dyn Gl, target: GlEnum, buffer: GlName) {
        if target == gl::ELEMENT_ARRAY_BUFFER {
            gl.bind_buffer(target, buffer);
            return;
        }
        if self.buffers.get(&target) != Some(&buffer) {
            gl.bind_buffer(target, buffer);
            self.buffers.insert(target, buffer);
        }
    }

    pub fn bind_buffer_range(
        &mut self,
        gl: &dyn Gl,
        target: GlEnum,
        index: u32,
        buffer: GlName,
        offset: u64,
        size: u64,
    ) {
        let binding = (buffer, offset, size);
        if self.indexed_buffers.get(&(target, index)) != Some(&binding) {
            gl.bind_buffer_range(target, index, buffer, offset, size);
            self.indexed_buffers.insert((target, index), binding);
            // Indexed binds also replace the generic binding point.
            self.buffers.insert(target, buffer);
        }
    }

    /// Drops every binding of a deleted buffer, GL unbinds it silently.
    pub fn buffer_deleted(&mut self, buffer: GlName) {
        self.buffers.retain(|_, bound| *bound != buffer);
        self.indexed_buffers.retain(|_, (bound, _, _)| *bound != buffer);
    }

    pub fn bind_texture(&mut self, gl: &dyn Gl, unit: u32, target: GlEnum, texture: GlName) {
        if self.textures.get(&unit) == Some(&(target, texture)) {
            return;
        }
        self.active_texture
            .set_if_invalid(unit, || gl.active_texture(unit));
        gl.bind_texture(target, texture);
        self.textures.insert(unit, (target, texture));
    }

    /// Binds a texture for setup work on the currently active unit.
    pub fn bind_texture_for_update(&mut self, gl: &dyn Gl, target: GlEnum, texture: GlName) {
        let unit = self.active_texture.get().unwrap_or(0);
        self.bind_texture(gl, unit, target, texture);
    }

    pub fn texture_deleted(&mut self, texture: GlName) {
        self.textures.retain(|_, (_, bound)| *bound != texture);
        self.image_units.retain(|_, binding| binding.texture != texture);
    }

    pub fn bind_sampler(&mut self, gl: &dyn Gl, unit: u32, sampler: GlName) {
        if self.samplers.get(&unit) != Some(&sampler) {
            gl.bind_sampler(unit, sampler);
            self.samplers.insert(unit, sampler);
        }
    }

    pub fn sampler_deleted(&mut self, sampler: GlName) {
        self.samplers.retain(|_, bound| *bound != sampler);
    }

    pub fn bind_image_texture(&mut self, gl: &dyn Gl, unit: u32, binding: ImageUnitBinding) {
        if self.image_units.get(&unit) != Some(&binding) {
            gl.bind_image_texture(
                unit,
                binding.texture,
                binding.level,
                binding.layered,
                binding.layer,
                binding.access,
                binding.format,
            );
            self.image_units.insert(unit, binding);
        }
    }

    pub fn pixel_store(&mut self, gl: &dyn Gl, pname: GlEnum, value: i32) {
        if self.pixel_store.get(&pname) != Some(&value) {
            gl.pixel_store_i(pname, value);
            self.pixel_store.insert(pname, value);
        }
    }

    /// Opens up the write masks a clear needs and restricts it to `area`.
    pub fn begin_clear(&mut self, gl: &dyn Gl, target: ClearTarget, area: Option<Rect>) -> ClearScope {
        let mut scope = ClearScope {
            rasterizer_discard: self.rasterizer_discard.get(),
            ..Default::default()
        };
        self.set_rasterizer_discard(gl, false);
        match target {
            ClearTarget::Color(index) => {
                let index = index as usize;
                if index < MAX_COLOR_ATTACHMENTS {
                    scope.color_mask = self.color_mask[index].get().map(|mask| (index, mask));
                    self.set_color_mask(gl, index, [true; 4]);
                }
            }
            ClearTarget::Depth | ClearTarget::Stencil | ClearTarget::DepthStencil => {
                if target != ClearTarget::Stencil {
                    scope.depth_write = self.depth_write.get();
                    self.set_depth_write(gl, true);
                }
                if target != ClearTarget::Depth {
                    for index in 0..2 {
                        scope.stencil_write_mask[index] = self.stencil_write_mask[index].get();
                        self.set_stencil_write_mask_face(gl, index, !0);
                    }
                }
            }
        }
        scope.scissor_test = self.scissor_test.get();
        scope.scissor = self.scissors[0].get();
        match area {
            Some(area) => self.set_scissor(gl, 0, &area),
            None => self.disable_scissor_test(gl),
        }

        scope
    }

    /// Restores what [`ContextState::begin_clear`] overrode. Values that were unknown
    /// before the clear stay at their clear-time setting.
    pub fn end_clear(&mut self, gl: &dyn Gl, scope: ClearScope) {
        if let Some(discard) = scope.rasterizer_discard {
            self.set_rasterizer_discard(gl, discard);
        }
        if let Some((index, mask)) = scope.color_mask {
            self.set_color_mask(gl, index, mask);
        }
        if let Some(enabled) = scope.depth_write {
            self.set_depth_write(gl, enabled);
        }
        for (index, mask) in scope.stencil_write_mask.into_iter().enumerate() {
            if let Some(mask) = mask {
                self.set_stencil_write_mask_face(gl, index, mask);
            }
        }
        if let Some(rect) = scope.scissor {
            self.scissors[0].set_if_invalid(rect, || gl.scissor(0, rect.as_array()));
        }
        if let Some(enabled) = scope.scissor_test {
            self.scissor_test
                .set_if_invalid(enabled, || toggle(gl, gl::SCISSOR_TEST, enabled));
        }
    }
}

#[cfg(test)]
mod test {
    use ash::vk;

    use crate::testing::RecordingGl;

    use super::*;

    fn opaque() -> ColorBlendState {
        let mut state = ColorBlendState::default();
        state.attachments.push(BlendAttachment::default());
        state
    }

    fn translucent() -> ColorBlendState {
        let mut state = ColorBlendState::default();
        state.attachments.push(BlendAttachment {
            enabled: true,
            src_color: gl::SRC_ALPHA,
            dst_color: gl::ONE_MINUS_SRC_ALPHA,
            src_alpha: gl::SRC_ALPHA,
            dst_alpha: gl::ONE_MINUS_SRC_ALPHA,
            ..Default::default()
        });
        state
    }

    fn stencil() -> DepthStencilState {
        let face = StencilFace {
            func: gl::EQUAL,
            reference: 3,
            pass: gl::REPLACE,
            ..Default::default()
        };
        DepthStencilState {
            depth_test: true,
            depth_write: true,
            depth_func: gl::LEQUAL,
            stencil_test: true,
            front: face,
            back: face,
        }
    }

    #[test]
    fn second_apply_is_free() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        let raster = RasterizationState {
            cull_face: Some(gl::BACK),
            depth_bias: Some(DepthBias {
                constant: 1.0,
                clamp: 0.0,
                slope: 2.0,
            }),
            ..Default::default()
        };
        let multisample = MultisampleState {
            enabled: true,
            sample_shading: Some(0.5),
            sample_mask: 0xF,
            ..Default::default()
        };
        let depth_stencil = stencil();
        let blend = translucent();
        let viewport = Viewport {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 64.0,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let apply = |state: &mut ContextState| {
            state.apply_input_assembly(
                &gl,
                &InputAssemblyState {
                    topology: gl::TRIANGLES,
                    primitive_restart: true,
                },
                true,
            );
            state.apply_rasterization(&gl, &raster, DynamicStates::empty());
            state.apply_multisample(&gl, &multisample);
            state.apply_depth_stencil(&gl, &depth_stencil, DynamicStates::empty());
            state.apply_color_blend(&gl, &blend, DynamicStates::empty());
            state.apply_tessellation(
                &gl,
                &TessellationState {
                    patch_control_points: 3,
                },
            );
            state.set_viewport(&gl, 0, &viewport);
            state.set_scissor(&gl, 0, &Rect::new(0, 0, 64, 64));
            state.use_program(&gl, 7);
            state.bind_framebuffer(&gl, gl::DRAW_FRAMEBUFFER, 3);
        };

        apply(&mut state);
        assert!(!gl.log().is_empty());
        gl.log().clear();
        apply(&mut state);
        assert_eq!(0, gl.log().len());
    }

    #[test]
    fn blend_toggle_leaves_factors() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        let (a, b) = (opaque(), translucent());
        state.apply_color_blend(&gl, &a, DynamicStates::empty());
        gl.log().clear();

        state.apply_color_blend(&gl, &b, DynamicStates::empty());
        assert_eq!(1, gl.log().count("enable_i"));
        assert_eq!(1, gl.log().count("blend_func_separate_i"));
        gl.log().clear();

        state.apply_color_blend(&gl, &a, DynamicStates::empty());
        assert_eq!(1, gl.log().count("disable_i"));
        assert_eq!(0, gl.log().count("blend_func_separate_i"));
        assert_eq!(Some(false), state.blend_enabled(0));
        gl.log().clear();

        // Factors are still in place from the previous enable.
        state.apply_color_blend(&gl, &b, DynamicStates::empty());
        assert_eq!(vec!["enable_i"], gl.log().names());
    }

    #[test]
    fn dynamic_stencil_reference_survives_pipeline() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        state.apply_depth_stencil(&gl, &stencil(), DynamicStates::StencilReference);
        state.set_stencil_reference(&gl, vk::StencilFaceFlags::FRONT_AND_BACK, 9);
        gl.log().clear();

        state.apply_depth_stencil(&gl, &stencil(), DynamicStates::StencilReference);
        assert_eq!(0, gl.log().count("stencil_func_separate"));
    }

    #[test]
    fn dynamic_line_width_is_not_baked() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        state.apply_rasterization(&gl, &RasterizationState::default(), DynamicStates::LineWidth);
        assert_eq!(0, gl.log().count("line_width"));
        state.apply_rasterization(&gl, &RasterizationState::default(), DynamicStates::empty());
        assert_eq!(1, gl.log().count("line_width"));
    }

    #[test]
    fn clear_restores_masks() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        let mut blend = opaque();
        blend.attachments[0].write_mask = [true, false, false, false];
        state.apply_color_blend(&gl, &blend, DynamicStates::empty());
        state.set_scissor(&gl, 0, &Rect::new(4, 4, 8, 8));
        gl.log().clear();

        let scope = state.begin_clear(&gl, ClearTarget::Color(0), Some(Rect::new(0, 0, 32, 32)));
        gl.clear_buffer_fv(gl::COLOR, 0, &[1.0, 0.0, 0.0, 1.0]);
        state.end_clear(&gl, scope);

        let log = gl.log();
        assert_eq!(2, log.count("color_mask_i"));
        assert_eq!(2, log.count("scissor"));
        assert_eq!(
            Some([true, false, false, false]),
            state.color_mask[0].get()
        );
        assert_eq!(Some(Rect::new(4, 4, 8, 8)), state.scissors[0].get());
    }

    #[test]
    fn framebuffer_bind_is_cached_per_target() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        state.bind_framebuffer(&gl, gl::FRAMEBUFFER, 5);
        state.bind_framebuffer(&gl, gl::DRAW_FRAMEBUFFER, 5);
        state.bind_framebuffer(&gl, gl::READ_FRAMEBUFFER, 5);
        assert_eq!(1, gl.log().count("bind_framebuffer"));
        state.framebuffer_deleted(5);
        state.bind_framebuffer(&gl, gl::READ_FRAMEBUFFER, 5);
        assert_eq!(2, gl.log().count("bind_framebuffer"));
    }

    #[test]
    fn indexed_bind_replaces_generic_binding() {
        let gl = RecordingGl::default();
        let mut state = ContextState::default();
        state.bind_buffer(&gl, gl::UNIFORM_BUFFER, 1);
        state.bind_buffer_range(&gl, gl::UNIFORM_BUFFER, 0, 2, 0, 256);
        state.bind_buffer(&gl, gl::UNIFORM_BUFFER, 1);
        assert_eq!(2, gl.log().count("bind_buffer"));
        state.bind_buffer_range(&gl, gl::UNIFORM_BUFFER, 0, 2, 0, 256);
        assert_eq!(1, gl.log().count("bind_buffer_range"));
    }
}
