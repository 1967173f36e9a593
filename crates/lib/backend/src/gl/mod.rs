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

//! Native call surface.
//!
//! Every driver call the engine makes goes through [`Gl`]. Object names are plain `u32`
//! values the way GL hands them out; enums are raw `GLenum` values taken from the `gl`
//! crate constants.

mod native;

pub use native::*;

pub type GlName = u32;
pub type GlEnum = u32;

/// `GL_TEXTURE_MAX_ANISOTROPY`. Core since 4.6, `EXT_texture_filter_anisotropic` before that.
pub const TEXTURE_MAX_ANISOTROPY: GlEnum = 0x84FE;

/// Opaque fence object returned by [`Gl::fence_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncToken(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Signaled,
    Timeout,
    Failed,
}

/// Source of pixel or buffer data: client memory or an offset into the bound
/// unpack buffer.
#[derive(Debug, Clone, Copy)]
pub enum PixelData<'a> {
    Offset(u64),
    Slice(&'a [u8]),
}

/// Destination of a readback: client memory or an offset into the bound pack buffer.
#[derive(Debug)]
pub enum PixelDataMut<'a> {
    Offset(u64),
    Slice(&'a mut [u8]),
}

/// Number of coordinates a texture target is addressed with in sub-image calls.
pub fn texture_dimensions(target: GlEnum) -> u32 {
    match target {
        gl::TEXTURE_1D | gl::TEXTURE_BUFFER => 1,
        gl::TEXTURE_3D
        | gl::TEXTURE_2D_ARRAY
        | gl::TEXTURE_CUBE_MAP_ARRAY
        | gl::TEXTURE_2D_MULTISAMPLE_ARRAY => 3,
        _ => 2,
    }
}

/// Targets which need a layer selected before a single slice can be attached.
pub fn is_layered_target(target: GlEnum) -> bool {
    matches!(
        target,
        gl::TEXTURE_1D_ARRAY
            | gl::TEXTURE_2D_ARRAY
            | gl::TEXTURE_3D
            | gl::TEXTURE_CUBE_MAP
            | gl::TEXTURE_CUBE_MAP_ARRAY
            | gl::TEXTURE_2D_MULTISAMPLE_ARRAY
    )
}

pub trait Gl: Send {
    fn version(&self) -> (u32, u32);
    fn get_integer(&self, pname: GlEnum) -> i32;
    fn get_error(&self) -> GlEnum;
    fn flush(&self);
    fn finish(&self);

    fn create_buffer(&self) -> GlName;
    fn delete_buffer(&self, buffer: GlName);
    fn create_texture(&self) -> GlName;
    fn delete_texture(&self, texture: GlName);
    fn create_sampler(&self) -> GlName;
    fn delete_sampler(&self, sampler: GlName);
    fn create_framebuffer(&self) -> GlName;
    fn delete_framebuffer(&self, framebuffer: GlName);
    fn create_vertex_array(&self) -> GlName;
    fn delete_vertex_array(&self, vertex_array: GlName);

    fn create_shader(&self, ty: GlEnum) -> GlName;
    fn shader_source(&self, shader: GlName, source: &str);
    /// Compiles and returns the info log on failure.
    fn compile_shader(&self, shader: GlName) -> Result<(), String>;
    fn delete_shader(&self, shader: GlName);
    fn create_program(&self) -> GlName;
    fn attach_shader(&self, program: GlName, shader: GlName);
    fn detach_shader(&self, program: GlName, shader: GlName);
    /// Links and returns the info log on failure.
    fn link_program(&self, program: GlName) -> Result<(), String>;
    fn delete_program(&self, program: GlName);
    fn get_uniform_location(&self, program: GlName, name: &str) -> Option<i32>;
    fn get_uniform_block_index(&self, program: GlName, name: &str) -> Option<u32>;
    fn uniform_block_binding(&self, program: GlName, index: u32, binding: u32);
    fn get_shader_storage_block_index(&self, program: GlName, name: &str) -> Option<u32>;
    fn shader_storage_block_binding(&self, program: GlName, index: u32, binding: u32);

    fn enable(&self, cap: GlEnum);
    fn disable(&self, cap: GlEnum);
    fn enable_i(&self, cap: GlEnum, index: u32);
    fn disable_i(&self, cap: GlEnum, index: u32);
    fn cull_face(&self, mode: GlEnum);
    fn front_face(&self, mode: GlEnum);
    fn polygon_mode(&self, mode: GlEnum);
    fn polygon_offset(&self, factor: f32, units: f32, clamp: f32);
    fn primitive_restart_index(&self, index: u32);
    fn line_width(&self, width: f32);
    fn sample_mask(&self, mask: u32);
    fn min_sample_shading(&self, value: f32);
    fn patch_vertices(&self, count: u32);
    fn depth_func(&self, func: GlEnum);
    fn depth_mask(&self, flag: bool);
    fn depth_range(&self, index: u32, near: f32, far: f32);
    fn stencil_func_separate(&self, face: GlEnum, func: GlEnum, reference: u32, mask: u32);
    fn stencil_op_separate(&self, face: GlEnum, fail: GlEnum, depth_fail: GlEnum, pass: GlEnum);
    fn stencil_mask_separate(&self, face: GlEnum, mask: u32);
    fn blend_equation_separate_i(&self, buffer: u32, rgb: GlEnum, alpha: GlEnum);
    fn blend_func_separate_i(
        &self,
        buffer: u32,
        src_rgb: GlEnum,
        dst_rgb: GlEnum,
        src_alpha: GlEnum,
        dst_alpha: GlEnum,
    );
    fn blend_color(&self, color: [f32; 4]);
    fn color_mask_i(&self, buffer: u32, mask: [bool; 4]);
    fn logic_op(&self, op: GlEnum);
    fn viewport(&self, index: u32, rect: [f32; 4]);
    fn scissor(&self, index: u32, rect: [i32; 4]);

    fn use_program(&self, program: GlName);
    fn bind_framebuffer(&self, target: GlEnum, framebuffer: GlName);
    fn bind_vertex_array(&self, vertex_array: GlName);
    fn bind_buffer(&self, target: GlEnum, buffer: GlName);
    fn bind_buffer_range(&self, target: GlEnum, index: u32, buffer: GlName, offset: u64, size: u64);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: GlEnum, texture: GlName);
    fn bind_sampler(&self, unit: u32, sampler: GlName);
    #[allow(clippy::too_many_arguments)]
    fn bind_image_texture(
        &self,
        unit: u32,
        texture: GlName,
        level: u32,
        layered: bool,
        layer: u32,
        access: GlEnum,
        format: GlEnum,
    );

    /// Allocates immutable storage for the texture bound to `target`.
    fn tex_storage(
        &self,
        target: GlEnum,
        levels: u32,
        internal_format: GlEnum,
        format: GlEnum,
        ty: GlEnum,
        extent: [i32; 3],
    );
    fn tex_storage_multisample(
        &self,
        target: GlEnum,
        samples: u32,
        internal_format: GlEnum,
        extent: [i32; 3],
    );
    fn tex_buffer_range(
        &self,
        internal_format: GlEnum,
        buffer: GlName,
        offset: u64,
        size: Option<u64>,
    );
    #[allow(clippy::too_many_arguments)]
    fn texture_view(
        &self,
        view: GlName,
        target: GlEnum,
        original: GlName,
        internal_format: GlEnum,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
    );
    fn tex_parameter_i(&self, target: GlEnum, pname: GlEnum, value: i32);
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image(
        &self,
        target: GlEnum,
        level: u32,
        offset: [i32; 3],
        extent: [i32; 3],
        format: GlEnum,
        ty: GlEnum,
        data: PixelData,
    );
    #[allow(clippy::too_many_arguments)]
    fn compressed_tex_sub_image(
        &self,
        target: GlEnum,
        level: u32,
        offset: [i32; 3],
        extent: [i32; 3],
        format: GlEnum,
        size: u32,
        data: PixelData,
    );
    fn sampler_parameter_i(&self, sampler: GlName, pname: GlEnum, value: i32);
    fn sampler_parameter_f(&self, sampler: GlName, pname: GlEnum, value: f32);
    fn sampler_parameter_fv(&self, sampler: GlName, pname: GlEnum, value: &[f32; 4]);

    fn framebuffer_texture(&self, target: GlEnum, attachment: GlEnum, texture: GlName, level: u32);
    fn framebuffer_texture_2d(
        &self,
        target: GlEnum,
        attachment: GlEnum,
        texture_target: GlEnum,
        texture: GlName,
        level: u32,
    );
    fn framebuffer_texture_layer(
        &self,
        target: GlEnum,
        attachment: GlEnum,
        texture: GlName,
        level: u32,
        layer: u32,
    );
    fn check_framebuffer_status(&self, target: GlEnum) -> GlEnum;
    fn draw_buffers(&self, buffers: &[GlEnum]);
    fn read_buffer(&self, source: GlEnum);
    fn invalidate_framebuffer(&self, target: GlEnum, attachments: &[GlEnum]);
    fn blit_framebuffer(&self, src: [i32; 4], dst: [i32; 4], mask: u32, filter: GlEnum);
    fn clear_buffer_fv(&self, buffer: GlEnum, draw_buffer: u32, value: &[f32; 4]);
    fn clear_buffer_iv(&self, buffer: GlEnum, draw_buffer: u32, value: &[i32; 4]);
    fn clear_buffer_uiv(&self, buffer: GlEnum, draw_buffer: u32, value: &[u32; 4]);
    fn clear_buffer_fi(&self, depth: f32, stencil: i32);

    fn buffer_data(&self, target: GlEnum, size: u64, data: Option<&[u8]>, usage: GlEnum);
    fn buffer_sub_data(&self, target: GlEnum, offset: u64, data: &[u8]);
    fn get_buffer_sub_data(&self, target: GlEnum, offset: u64, data: &mut [u8]);
    fn copy_buffer_sub_data(
        &self,
        read_target: GlEnum,
        write_target: GlEnum,
        read_offset: u64,
        write_offset: u64,
        size: u64,
    );
    fn pixel_store_i(&self, pname: GlEnum, value: i32);
    fn read_pixels(&self, rect: [i32; 4], format: GlEnum, ty: GlEnum, data: PixelDataMut);
    #[allow(clippy::too_many_arguments)]
    fn copy_image_sub_data(
        &self,
        src: GlName,
        src_target: GlEnum,
        src_level: u32,
        src_offset: [i32; 3],
        dst: GlName,
        dst_target: GlEnum,
        dst_level: u32,
        dst_offset: [i32; 3],
        extent: [i32; 3],
    );

    fn enable_vertex_attrib_array(&self, index: u32);
    #[allow(clippy::too_many_arguments)]
    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: GlEnum,
        normalized: bool,
        integer: bool,
        stride: u32,
        offset: u64,
    );
    fn vertex_attrib_divisor(&self, index: u32, divisor: u32);

    fn draw_arrays(
        &self,
        mode: GlEnum,
        first: u32,
        count: u32,
        instance_count: u32,
        base_instance: u32,
    );
    #[allow(clippy::too_many_arguments)]
    fn draw_elements(
        &self,
        mode: GlEnum,
        count: u32,
        ty: GlEnum,
        offset: u64,
        instance_count: u32,
        base_vertex: i32,
        base_instance: u32,
    );
    fn draw_arrays_indirect(&self, mode: GlEnum, offset: u64, count: u32, stride: u32);
    fn draw_elements_indirect(&self, mode: GlEnum, ty: GlEnum, offset: u64, count: u32, stride: u32);
    fn dispatch_compute(&self, x: u32, y: u32, z: u32);
    fn dispatch_compute_indirect(&self, offset: u64);
    fn memory_barrier(&self, bits: u32);

    fn uniform_fv(&self, location: i32, components: u32, data: &[f32]);
    fn uniform_iv(&self, location: i32, components: u32, data: &[i32]);
    fn uniform_uiv(&self, location: i32, components: u32, data: &[u32]);
    fn uniform_matrix_fv(&self, location: i32, dimension: u32, data: &[f32]);

    fn fence_sync(&self) -> SyncToken;
    fn client_wait_sync(&self, sync: SyncToken, timeout: u64) -> SyncStatus;
    fn delete_sync(&self, sync: SyncToken);

    fn push_debug_group(&self, message: &str);
    fn pop_debug_group(&self);
}

/// Feature set detected from the context version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub version: (u32, u32),
    pub base_instance: bool,
    pub image_load_store: bool,
    pub texture_storage: bool,
    pub copy_image: bool,
    pub texture_view: bool,
    pub compute: bool,
    pub storage_buffers: bool,
    pub multi_draw_indirect: bool,
    pub invalidate_framebuffer: bool,
    pub debug_groups: bool,
    pub multi_viewport: bool,
    pub indirect_draw: bool,
    pub tessellation: bool,
    pub sample_shading: bool,
    pub polygon_offset_clamp: bool,
    pub fixed_index_restart: bool,
    pub anisotropy: bool,
    pub max_color_attachments: u32,
    pub max_texture_units: u32,
    pub max_image_units: u32,
    pub max_uniform_buffers: u32,
    pub max_storage_buffers: u32,
    pub max_viewports: u32,
}

impl Capabilities {
    pub const MIN_VERSION: (u32, u32) = (3, 3);

    pub fn from_version(major: u32, minor: u32) -> Self {
        let at_least = |required: (u32, u32)| (major, minor) >= required;
        Self {
            version: (major, minor),
            indirect_draw: at_least((4, 0)),
            tessellation: at_least((4, 0)),
            sample_shading: at_least((4, 0)),
            multi_viewport: at_least((4, 1)),
            base_instance: at_least((4, 2)),
            image_load_store: at_least((4, 2)),
            texture_storage: at_least((4, 2)),
            copy_image: at_least((4, 3)),
            texture_view: at_least((4, 3)),
            compute: at_least((4, 3)),
            storage_buffers: at_least((4, 3)),
            multi_draw_indirect: at_least((4, 3)),
            invalidate_framebuffer: at_least((4, 3)),
            debug_groups: at_least((4, 3)),
            fixed_index_restart: at_least((4, 3)),
            polygon_offset_clamp: at_least((4, 6)),
            anisotropy: at_least((4, 6)),
            max_color_attachments: 8,
            max_texture_units: 16,
            max_image_units: 8,
            max_uniform_buffers: 14,
            max_storage_buffers: 8,
            max_viewports: 1,
        }
    }

    /// Fills in implementation limits reported by the driver.
    pub fn detect(gl: &dyn Gl) -> Self {
        let (major, minor) = gl.version();
        let mut caps = Self::from_version(major, minor);
        let query = |pname, fallback: u32| match gl.get_integer(pname) {
            value if value > 0 => value as u32,
            _ => fallback,
        };
        caps.max_color_attachments = query(gl::MAX_COLOR_ATTACHMENTS, 8).min(8);
        caps.max_texture_units = query(gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS, 16);
        caps.max_uniform_buffers = query(gl::MAX_UNIFORM_BUFFER_BINDINGS, 14);
        if caps.image_load_store {
            caps.max_image_units = query(gl::MAX_IMAGE_UNITS, 8);
        }
        if caps.storage_buffers {
            caps.max_storage_buffers = query(gl::MAX_SHADER_STORAGE_BUFFER_BINDINGS, 8);
        }
        if caps.multi_viewport {
            caps.max_viewports = query(gl::MAX_VIEWPORTS, 1).min(16);
        }

        caps
    }

    pub fn is_supported(&self) -> bool {
        self.version >= Self::MIN_VERSION
    }
}

#[cfg(test)]
mod test {
    use super::{is_layered_target, texture_dimensions, Capabilities};

    #[test]
    fn version_gates_features() {
        let gl33 = Capabilities::from_version(3, 3);
        assert!(gl33.is_supported());
        assert!(!gl33.copy_image);
        assert!(!gl33.texture_view);
        assert!(!gl33.base_instance);
        assert!(!gl33.fixed_index_restart);

        let gl45 = Capabilities::from_version(4, 5);
        assert!(gl45.copy_image);
        assert!(gl45.compute);
        assert!(gl45.fixed_index_restart);
        assert!(!gl45.polygon_offset_clamp);
        assert!(!gl45.anisotropy);

        assert!(!Capabilities::from_version(3, 2).is_supported());
    }

    #[test]
    fn target_shapes() {
        assert_eq!(1, texture_dimensions(gl::TEXTURE_1D));
        assert_eq!(2, texture_dimensions(gl::TEXTURE_1D_ARRAY));
        assert_eq!(3, texture_dimensions(gl::TEXTURE_2D_ARRAY));
        assert!(is_layered_target(gl::TEXTURE_CUBE_MAP));
        assert!(!is_layered_target(gl::TEXTURE_2D));
    }
}
