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

use std::{
    ffi::{c_void, CString},
    ptr,
};

use gl::types::{GLboolean, GLchar, GLint, GLintptr, GLsizei, GLsizeiptr, GLsync};

use super::{
    texture_dimensions, Gl, GlEnum, GlName, PixelData, PixelDataMut, SyncStatus, SyncToken,
};

type PolygonOffsetClampFn = unsafe extern "system" fn(f32, f32, f32);

/// [`Gl`] implementation over the `gl` crate function table.
///
/// The table is process-wide, so every context created with the same loader shares it.
/// Calls are only valid while a context is current on the calling thread. Entry points
/// newer than the generated bindings are resolved here, core name first.
#[derive(Debug, Default)]
pub struct NativeGl {
    polygon_offset_clamp: Option<PolygonOffsetClampFn>,
}

impl NativeGl {
    /// Resolves entry points through the platform loader (`wglGetProcAddress`,
    /// `glXGetProcAddressARB`, `eglGetProcAddress`).
    pub fn load<F>(mut loader: F) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        gl::load_with(|symbol| loader(symbol));
        let polygon_offset_clamp = ["glPolygonOffsetClamp", "glPolygonOffsetClampEXT"]
            .into_iter()
            .map(|symbol| loader(symbol))
            .find(|address| !address.is_null())
            .map(|address| unsafe {
                std::mem::transmute::<*const c_void, PolygonOffsetClampFn>(address)
            });

        Self {
            polygon_offset_clamp,
        }
    }
}

fn boolean(value: bool) -> GLboolean {
    if value {
        gl::TRUE
    } else {
        gl::FALSE
    }
}

fn pixels(data: PixelData) -> *const c_void {
    match data {
        PixelData::Offset(offset) => offset as usize as *const c_void,
        PixelData::Slice(data) => data.as_ptr() as *const c_void,
    }
}

fn offset_ptr(offset: u64) -> *const c_void {
    offset as usize as *const c_void
}

fn gen_name(generator: unsafe fn(GLsizei, *mut u32)) -> GlName {
    let mut name = 0;
    unsafe { generator(1, &mut name) };
    name
}

fn delete_name(deleter: unsafe fn(GLsizei, *const u32), name: GlName) {
    unsafe { deleter(1, &name) };
}

fn info_log(
    object: GlName,
    get_iv: unsafe fn(GlName, GlEnum, *mut GLint),
    get_log: unsafe fn(GlName, GLsizei, *mut GLsizei, *mut GLchar),
) -> String {
    let mut length = 0;
    unsafe { get_iv(object, gl::INFO_LOG_LENGTH, &mut length) };
    let mut buffer = vec![0u8; length.max(1) as usize];
    let mut written = 0;
    unsafe {
        get_log(
            object,
            buffer.len() as _,
            &mut written,
            buffer.as_mut_ptr() as *mut GLchar,
        )
    };
    buffer.truncate(written.max(0) as usize);

    String::from_utf8_lossy(&buffer).into_owned()
}

fn resource_index(name: &str, query: impl FnOnce(*const GLchar) -> u32) -> Option<u32> {
    let name = CString::new(name).ok()?;
    let index = query(name.as_ptr());
    (index != gl::INVALID_INDEX).then_some(index)
}

impl Gl for NativeGl {
    fn version(&self) -> (u32, u32) {
        let (mut major, mut minor) = (0, 0);
        unsafe {
            gl::GetIntegerv(gl::MAJOR_VERSION, &mut major);
            gl::GetIntegerv(gl::MINOR_VERSION, &mut minor);
        }
        (major.max(0) as u32, minor.max(0) as u32)
    }

    fn get_integer(&self, pname: GlEnum) -> i32 {
        let mut value = 0;
        unsafe { gl::GetIntegerv(pname, &mut value) };
        value
    }

    fn get_error(&self) -> GlEnum {
        unsafe { gl::GetError() }
    }

    fn flush(&self) {
        unsafe { gl::Flush() }
    }

    fn finish(&self) {
        unsafe { gl::Finish() }
    }

    fn create_buffer(&self) -> GlName {
        gen_name(gl::GenBuffers)
    }

    fn delete_buffer(&self, buffer: GlName) {
        delete_name(gl::DeleteBuffers, buffer)
    }

    fn create_texture(&self) -> GlName {
        gen_name(gl::GenTextures)
    }

    fn delete_texture(&self, texture: GlName) {
        delete_name(gl::DeleteTextures, texture)
    }

    fn create_sampler(&self) -> GlName {
        gen_name(gl::GenSamplers)
    }

    fn delete_sampler(&self, sampler: GlName) {
        delete_name(gl::DeleteSamplers, sampler)
    }

    fn create_framebuffer(&self) -> GlName {
        gen_name(gl::GenFramebuffers)
    }

    fn delete_framebuffer(&self, framebuffer: GlName) {
        delete_name(gl::DeleteFramebuffers, framebuffer)
    }

    fn create_vertex_array(&self) -> GlName {
        gen_name(gl::GenVertexArrays)
    }

    fn delete_vertex_array(&self, vertex_array: GlName) {
        delete_name(gl::DeleteVertexArrays, vertex_array)
    }

    fn create_shader(&self, ty: GlEnum) -> GlName {
        unsafe { gl::CreateShader(ty) }
    }

    fn shader_source(&self, shader: GlName, source: &str) {
        let string = source.as_ptr() as *const GLchar;
        let length = source.len() as GLint;
        unsafe { gl::ShaderSource(shader, 1, &string, &length) }
    }

    fn compile_shader(&self, shader: GlName) -> Result<(), String> {
        let mut status = 0;
        unsafe {
            gl::CompileShader(shader);
            gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
        }
        if status == gl::TRUE as GLint {
            Ok(())
        } else {
            Err(info_log(shader, gl::GetShaderiv, gl::GetShaderInfoLog))
        }
    }

    fn delete_shader(&self, shader: GlName) {
        unsafe { gl::DeleteShader(shader) }
    }

    fn create_program(&self) -> GlName {
        unsafe { gl::CreateProgram() }
    }

    fn attach_shader(&self, program: GlName, shader: GlName) {
        unsafe { gl::AttachShader(program, shader) }
    }

    fn detach_shader(&self, program: GlName, shader: GlName) {
        unsafe { gl::DetachShader(program, shader) }
    }

    fn link_program(&self, program: GlName) -> Result<(), String> {
        let mut status = 0;
        unsafe {
            gl::LinkProgram(program);
            gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
        }
        if status == gl::TRUE as GLint {
            Ok(())
        } else {
            Err(info_log(program, gl::GetProgramiv, gl::GetProgramInfoLog))
        }
    }

    fn delete_program(&self, program: GlName) {
        unsafe { gl::DeleteProgram(program) }
    }

    fn get_uniform_location(&self, program: GlName, name: &str) -> Option<i32> {
        let name = CString::new(name).ok()?;
        let location = unsafe { gl::GetUniformLocation(program, name.as_ptr()) };
        (location >= 0).then_some(location)
    }

    fn get_uniform_block_index(&self, program: GlName, name: &str) -> Option<u32> {
        resource_index(name, |name| unsafe { gl::GetUniformBlockIndex(program, name) })
    }

    fn uniform_block_binding(&self, program: GlName, index: u32, binding: u32) {
        unsafe { gl::UniformBlockBinding(program, index, binding) }
    }

    fn get_shader_storage_block_index(&self, program: GlName, name: &str) -> Option<u32> {
        resource_index(name, |name| unsafe {
            gl::GetProgramResourceIndex(program, gl::SHADER_STORAGE_BLOCK, name)
        })
    }

    fn shader_storage_block_binding(&self, program: GlName, index: u32, binding: u32) {
        unsafe { gl::ShaderStorageBlockBinding(program, index, binding) }
    }

    fn enable(&self, cap: GlEnum) {
        unsafe { gl::Enable(cap) }
    }

    fn disable(&self, cap: GlEnum) {
        unsafe { gl::Disable(cap) }
    }

    fn enable_i(&self, cap: GlEnum, index: u32) {
        unsafe { gl::Enablei(cap, index) }
    }

    fn disable_i(&self, cap: GlEnum, index: u32) {
        unsafe { gl::Disablei(cap, index) }
    }

    fn cull_face(&self, mode: GlEnum) {
        unsafe { gl::CullFace(mode) }
    }

    fn front_face(&self, mode: GlEnum) {
        unsafe { gl::FrontFace(mode) }
    }

    fn polygon_mode(&self, mode: GlEnum) {
        unsafe { gl::PolygonMode(gl::FRONT_AND_BACK, mode) }
    }

    fn polygon_offset(&self, factor: f32, units: f32, clamp: f32) {
        match self.polygon_offset_clamp {
            Some(offset_clamp) => unsafe { offset_clamp(factor, units, clamp) },
            None => unsafe { gl::PolygonOffset(factor, units) },
        }
    }

    fn primitive_restart_index(&self, index: u32) {
        unsafe { gl::PrimitiveRestartIndex(index) }
    }

    fn line_width(&self, width: f32) {
        unsafe { gl::LineWidth(width) }
    }

    fn sample_mask(&self, mask: u32) {
        unsafe { gl::SampleMaski(0, mask) }
    }

    fn min_sample_shading(&self, value: f32) {
        unsafe { gl::MinSampleShading(value) }
    }

    fn patch_vertices(&self, count: u32) {
        unsafe { gl::PatchParameteri(gl::PATCH_VERTICES, count as GLint) }
    }

    fn depth_func(&self, func: GlEnum) {
        unsafe { gl::DepthFunc(func) }
    }

    fn depth_mask(&self, flag: bool) {
        unsafe { gl::DepthMask(boolean(flag)) }
    }

    fn depth_range(&self, index: u32, near: f32, far: f32) {
        unsafe {
            if gl::DepthRangeIndexed::is_loaded() {
                gl::DepthRangeIndexed(index, near as f64, far as f64);
            } else if index == 0 {
                gl::DepthRange(near as f64, far as f64);
            }
        }
    }

    fn stencil_func_separate(&self, face: GlEnum, func: GlEnum, reference: u32, mask: u32) {
        unsafe { gl::StencilFuncSeparate(face, func, reference as GLint, mask) }
    }

    fn stencil_op_separate(&self, face: GlEnum, fail: GlEnum, depth_fail: GlEnum, pass: GlEnum) {
        unsafe { gl::StencilOpSeparate(face, fail, depth_fail, pass) }
    }

    fn stencil_mask_separate(&self, face: GlEnum, mask: u32) {
        unsafe { gl::StencilMaskSeparate(face, mask) }
    }

    fn blend_equation_separate_i(&self, buffer: u32, rgb: GlEnum, alpha: GlEnum) {
        unsafe {
            if gl::BlendEquationSeparatei::is_loaded() {
                gl::BlendEquationSeparatei(buffer, rgb, alpha);
            } else {
                gl::BlendEquationSeparate(rgb, alpha);
            }
        }
    }

    fn blend_func_separate_i(
        &self,
        buffer: u32,
        src_rgb: GlEnum,
        dst_rgb: GlEnum,
        src_alpha: GlEnum,
        dst_alpha: GlEnum,
    ) {
        unsafe {
            if gl::BlendFuncSeparatei::is_loaded() {
                gl::BlendFuncSeparatei(buffer, src_rgb, dst_rgb, src_alpha, dst_alpha);
            } else {
                gl::BlendFuncSeparate(src_rgb, dst_rgb, src_alpha, dst_alpha);
            }
        }
    }

    fn blend_color(&self, color: [f32; 4]) {
        unsafe { gl::BlendColor(color[0], color[1], color[2], color[3]) }
    }

    fn color_mask_i(&self, buffer: u32, mask: [bool; 4]) {
        unsafe {
            gl::ColorMaski(
                buffer,
                boolean(mask[0]),
                boolean(mask[1]),
                boolean(mask[2]),
                boolean(mask[3]),
            )
        }
    }

    fn logic_op(&self, op: GlEnum) {
        unsafe { gl::LogicOp(op) }
    }

    fn viewport(&self, index: u32, rect: [f32; 4]) {
        unsafe {
            if gl::ViewportIndexedf::is_loaded() {
                gl::ViewportIndexedf(index, rect[0], rect[1], rect[2], rect[3]);
            } else if index == 0 {
                gl::Viewport(
                    rect[0] as GLint,
                    rect[1] as GLint,
                    rect[2] as GLsizei,
                    rect[3] as GLsizei,
                );
            }
        }
    }

    fn scissor(&self, index: u32, rect: [i32; 4]) {
        unsafe {
            if gl::ScissorIndexed::is_loaded() {
                gl::ScissorIndexed(index, rect[0], rect[1], rect[2], rect[3]);
            } else if index == 0 {
                gl::Scissor(rect[0], rect[1], rect[2], rect[3]);
            }
        }
    }

    fn use_program(&self, program: GlName) {
        unsafe { gl::UseProgram(program) }
    }

    fn bind_framebuffer(&self, target: GlEnum, framebuffer: GlName) {
        unsafe { gl::BindFramebuffer(target, framebuffer) }
    }

    fn bind_vertex_array(&self, vertex_array: GlName) {
        unsafe { gl::BindVertexArray(vertex_array) }
    }

    fn bind_buffer(&self, target: GlEnum, buffer: GlName) {
        unsafe { gl::BindBuffer(target, buffer) }
    }

    fn bind_buffer_range(&self, target: GlEnum, index: u32, buffer: GlName, offset: u64, size: u64) {
        unsafe {
            gl::BindBufferRange(
                target,
                index,
                buffer,
                offset as GLintptr,
                size as GLsizeiptr,
            )
        }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { gl::ActiveTexture(gl::TEXTURE0 + unit) }
    }

    fn bind_texture(&self, target: GlEnum, texture: GlName) {
        unsafe { gl::BindTexture(target, texture) }
    }

    fn bind_sampler(&self, unit: u32, sampler: GlName) {
        unsafe { gl::BindSampler(unit, sampler) }
    }

    fn bind_image_texture(
        &self,
        unit: u32,
        texture: GlName,
        level: u32,
        layered: bool,
        layer: u32,
        access: GlEnum,
        format: GlEnum,
    ) {
        unsafe {
            gl::BindImageTexture(
                unit,
                texture,
                level as GLint,
                boolean(layered),
                layer as GLint,
                access,
                format,
            )
        }
    }

    fn tex_storage(
        &self,
        target: GlEnum,
        levels: u32,
        internal_format: GlEnum,
        format: GlEnum,
        ty: GlEnum,
        extent: [i32; 3],
    ) {
        let [width, height, depth] = extent;
        unsafe {
            if gl::TexStorage2D::is_loaded() {
                match texture_dimensions(target) {
                    1 => gl::TexStorage1D(target, levels as _, internal_format, width),
                    2 => gl::TexStorage2D(target, levels as _, internal_format, width, height),
                    _ => gl::TexStorage3D(
                        target,
                        levels as _,
                        internal_format,
                        width,
                        height,
                        depth,
                    ),
                }
                return;
            }
            for level in 0..levels as GLint {
                let mip = |size: i32| (size >> level).max(1);
                match target {
                    gl::TEXTURE_1D => gl::TexImage1D(
                        target,
                        level,
                        internal_format as _,
                        mip(width),
                        0,
                        format,
                        ty,
                        ptr::null(),
                    ),
                    gl::TEXTURE_CUBE_MAP => {
                        for face in 0..6 {
                            gl::TexImage2D(
                                gl::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                                level,
                                internal_format as _,
                                mip(width),
                                mip(height),
                                0,
                                format,
                                ty,
                                ptr::null(),
                            );
                        }
                    }
                    gl::TEXTURE_1D_ARRAY => gl::TexImage2D(
                        target,
                        level,
                        internal_format as _,
                        mip(width),
                        height,
                        0,
                        format,
                        ty,
                        ptr::null(),
                    ),
                    gl::TEXTURE_3D => gl::TexImage3D(
                        target,
                        level,
                        internal_format as _,
                        mip(width),
                        mip(height),
                        mip(depth),
                        0,
                        format,
                        ty,
                        ptr::null(),
                    ),
                    gl::TEXTURE_2D_ARRAY | gl::TEXTURE_CUBE_MAP_ARRAY => gl::TexImage3D(
                        target,
                        level,
                        internal_format as _,
                        mip(width),
                        mip(height),
                        depth,
                        0,
                        format,
                        ty,
                        ptr::null(),
                    ),
                    _ => gl::TexImage2D(
                        target,
                        level,
                        internal_format as _,
                        mip(width),
                        mip(height),
                        0,
                        format,
                        ty,
                        ptr::null(),
                    ),
                }
            }
            gl::TexParameteri(target, gl::TEXTURE_MAX_LEVEL, levels as GLint - 1);
        }
    }

    fn tex_storage_multisample(
        &self,
        target: GlEnum,
        samples: u32,
        internal_format: GlEnum,
        extent: [i32; 3],
    ) {
        let [width, height, depth] = extent;
        unsafe {
            if target == gl::TEXTURE_2D_MULTISAMPLE_ARRAY {
                gl::TexImage3DMultisample(
                    target,
                    samples as _,
                    internal_format,
                    width,
                    height,
                    depth,
                    gl::TRUE,
                );
            } else {
                gl::TexImage2DMultisample(
                    target,
                    samples as _,
                    internal_format,
                    width,
                    height,
                    gl::TRUE,
                );
            }
        }
    }

    fn tex_buffer_range(
        &self,
        internal_format: GlEnum,
        buffer: GlName,
        offset: u64,
        size: Option<u64>,
    ) {
        unsafe {
            match size {
                Some(size) if gl::TexBufferRange::is_loaded() => gl::TexBufferRange(
                    gl::TEXTURE_BUFFER,
                    internal_format,
                    buffer,
                    offset as GLintptr,
                    size as GLsizeiptr,
                ),
                _ => gl::TexBuffer(gl::TEXTURE_BUFFER, internal_format, buffer),
            }
        }
    }

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
    ) {
        unsafe {
            gl::TextureView(
                view,
                target,
                original,
                internal_format,
                base_level,
                level_count,
                base_layer,
                layer_count,
            )
        }
    }

    fn tex_parameter_i(&self, target: GlEnum, pname: GlEnum, value: i32) {
        unsafe { gl::TexParameteri(target, pname, value) }
    }

    fn tex_sub_image(
        &self,
        target: GlEnum,
        level: u32,
        offset: [i32; 3],
        extent: [i32; 3],
        format: GlEnum,
        ty: GlEnum,
        data: PixelData,
    ) {
        let level = level as GLint;
        let data = pixels(data);
        unsafe {
            match texture_dimensions(target) {
                1 => gl::TexSubImage1D(target, level, offset[0], extent[0], format, ty, data),
                2 => gl::TexSubImage2D(
                    target, level, offset[0], offset[1], extent[0], extent[1], format, ty, data,
                ),
                _ => gl::TexSubImage3D(
                    target, level, offset[0], offset[1], offset[2], extent[0], extent[1],
                    extent[2], format, ty, data,
                ),
            }
        }
    }

    fn compressed_tex_sub_image(
        &self,
        target: GlEnum,
        level: u32,
        offset: [i32; 3],
        extent: [i32; 3],
        format: GlEnum,
        size: u32,
        data: PixelData,
    ) {
        let level = level as GLint;
        let size = size as GLsizei;
        let data = pixels(data);
        unsafe {
            match texture_dimensions(target) {
                1 => gl::CompressedTexSubImage1D(
                    target, level, offset[0], extent[0], format, size, data,
                ),
                2 => gl::CompressedTexSubImage2D(
                    target, level, offset[0], offset[1], extent[0], extent[1], format, size, data,
                ),
                _ => gl::CompressedTexSubImage3D(
                    target, level, offset[0], offset[1], offset[2], extent[0], extent[1],
                    extent[2], format, size, data,
                ),
            }
        }
    }

    fn sampler_parameter_i(&self, sampler: GlName, pname: GlEnum, value: i32) {
        unsafe { gl::SamplerParameteri(sampler, pname, value) }
    }

    fn sampler_parameter_f(&self, sampler: GlName, pname: GlEnum, value: f32) {
        unsafe { gl::SamplerParameterf(sampler, pname, value) }
    }

    fn sampler_parameter_fv(&self, sampler: GlName, pname: GlEnum, value: &[f32; 4]) {
        unsafe { gl::SamplerParameterfv(sampler, pname, value.as_ptr()) }
    }

    fn framebuffer_texture(&self, target: GlEnum, attachment: GlEnum, texture: GlName, level: u32) {
        unsafe { gl::FramebufferTexture(target, attachment, texture, level as GLint) }
    }

    fn framebuffer_texture_2d(
        &self,
        target: GlEnum,
        attachment: GlEnum,
        texture_target: GlEnum,
        texture: GlName,
        level: u32,
    ) {
        unsafe {
            gl::FramebufferTexture2D(target, attachment, texture_target, texture, level as GLint)
        }
    }

    fn framebuffer_texture_layer(
        &self,
        target: GlEnum,
        attachment: GlEnum,
        texture: GlName,
        level: u32,
        layer: u32,
    ) {
        unsafe {
            gl::FramebufferTextureLayer(
                target,
                attachment,
                texture,
                level as GLint,
                layer as GLint,
            )
        }
    }

    fn check_framebuffer_status(&self, target: GlEnum) -> GlEnum {
        unsafe { gl::CheckFramebufferStatus(target) }
    }

    fn draw_buffers(&self, buffers: &[GlEnum]) {
        unsafe { gl::DrawBuffers(buffers.len() as GLsizei, buffers.as_ptr()) }
    }

    fn read_buffer(&self, source: GlEnum) {
        unsafe { gl::ReadBuffer(source) }
    }

    fn invalidate_framebuffer(&self, target: GlEnum, attachments: &[GlEnum]) {
        unsafe {
            if gl::InvalidateFramebuffer::is_loaded() {
                gl::InvalidateFramebuffer(
                    target,
                    attachments.len() as GLsizei,
                    attachments.as_ptr(),
                );
            }
        }
    }

    fn blit_framebuffer(&self, src: [i32; 4], dst: [i32; 4], mask: u32, filter: GlEnum) {
        unsafe {
            gl::BlitFramebuffer(
                src[0], src[1], src[2], src[3], dst[0], dst[1], dst[2], dst[3], mask, filter,
            )
        }
    }

    fn clear_buffer_fv(&self, buffer: GlEnum, draw_buffer: u32, value: &[f32; 4]) {
        unsafe { gl::ClearBufferfv(buffer, draw_buffer as GLint, value.as_ptr()) }
    }

    fn clear_buffer_iv(&self, buffer: GlEnum, draw_buffer: u32, value: &[i32; 4]) {
        unsafe { gl::ClearBufferiv(buffer, draw_buffer as GLint, value.as_ptr()) }
    }

    fn clear_buffer_uiv(&self, buffer: GlEnum, draw_buffer: u32, value: &[u32; 4]) {
        unsafe { gl::ClearBufferuiv(buffer, draw_buffer as GLint, value.as_ptr()) }
    }

    fn clear_buffer_fi(&self, depth: f32, stencil: i32) {
        unsafe { gl::ClearBufferfi(gl::DEPTH_STENCIL, 0, depth, stencil) }
    }

    fn buffer_data(&self, target: GlEnum, size: u64, data: Option<&[u8]>, usage: GlEnum) {
        let data = data.map_or(ptr::null(), |data| data.as_ptr() as *const c_void);
        unsafe { gl::BufferData(target, size as GLsizeiptr, data, usage) }
    }

    fn buffer_sub_data(&self, target: GlEnum, offset: u64, data: &[u8]) {
        unsafe {
            gl::BufferSubData(
                target,
                offset as GLintptr,
                data.len() as GLsizeiptr,
                data.as_ptr() as *const c_void,
            )
        }
    }

    fn get_buffer_sub_data(&self, target: GlEnum, offset: u64, data: &mut [u8]) {
        unsafe {
            gl::GetBufferSubData(
                target,
                offset as GLintptr,
                data.len() as GLsizeiptr,
                data.as_mut_ptr() as *mut c_void,
            )
        }
    }

    fn copy_buffer_sub_data(
        &self,
        read_target: GlEnum,
        write_target: GlEnum,
        read_offset: u64,
        write_offset: u64,
        size: u64,
    ) {
        unsafe {
            gl::CopyBufferSubData(
                read_target,
                write_target,
                read_offset as GLintptr,
                write_offset as GLintptr,
                size as GLsizeiptr,
            )
        }
    }

    fn pixel_store_i(&self, pname: GlEnum, value: i32) {
        unsafe { gl::PixelStorei(pname, value) }
    }

    fn read_pixels(&self, rect: [i32; 4], format: GlEnum, ty: GlEnum, data: PixelDataMut) {
        let data = match data {
            PixelDataMut::Offset(offset) => offset as usize as *mut c_void,
            PixelDataMut::Slice(data) => data.as_mut_ptr() as *mut c_void,
        };
        unsafe { gl::ReadPixels(rect[0], rect[1], rect[2], rect[3], format, ty, data) }
    }

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
    ) {
        unsafe {
            gl::CopyImageSubData(
                src,
                src_target,
                src_level as GLint,
                src_offset[0],
                src_offset[1],
                src_offset[2],
                dst,
                dst_target,
                dst_level as GLint,
                dst_offset[0],
                dst_offset[1],
                dst_offset[2],
                extent[0],
                extent[1],
                extent[2],
            )
        }
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        unsafe { gl::EnableVertexAttribArray(index) }
    }

    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: GlEnum,
        normalized: bool,
        integer: bool,
        stride: u32,
        offset: u64,
    ) {
        unsafe {
            if integer {
                gl::VertexAttribIPointer(index, size, ty, stride as GLsizei, offset_ptr(offset));
            } else {
                gl::VertexAttribPointer(
                    index,
                    size,
                    ty,
                    boolean(normalized),
                    stride as GLsizei,
                    offset_ptr(offset),
                );
            }
        }
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        unsafe { gl::VertexAttribDivisor(index, divisor) }
    }

    fn draw_arrays(
        &self,
        mode: GlEnum,
        first: u32,
        count: u32,
        instance_count: u32,
        base_instance: u32,
    ) {
        unsafe {
            if base_instance != 0 {
                gl::DrawArraysInstancedBaseInstance(
                    mode,
                    first as GLint,
                    count as GLsizei,
                    instance_count as GLsizei,
                    base_instance,
                );
            } else {
                gl::DrawArraysInstanced(
                    mode,
                    first as GLint,
                    count as GLsizei,
                    instance_count as GLsizei,
                );
            }
        }
    }

    fn draw_elements(
        &self,
        mode: GlEnum,
        count: u32,
        ty: GlEnum,
        offset: u64,
        instance_count: u32,
        base_vertex: i32,
        base_instance: u32,
    ) {
        unsafe {
            if base_instance != 0 {
                gl::DrawElementsInstancedBaseVertexBaseInstance(
                    mode,
                    count as GLsizei,
                    ty,
                    offset_ptr(offset),
                    instance_count as GLsizei,
                    base_vertex,
                    base_instance,
                );
            } else {
                gl::DrawElementsInstancedBaseVertex(
                    mode,
                    count as GLsizei,
                    ty,
                    offset_ptr(offset),
                    instance_count as GLsizei,
                    base_vertex,
                );
            }
        }
    }

    fn draw_arrays_indirect(&self, mode: GlEnum, offset: u64, count: u32, stride: u32) {
        unsafe {
            if count == 1 {
                gl::DrawArraysIndirect(mode, offset_ptr(offset));
            } else {
                gl::MultiDrawArraysIndirect(
                    mode,
                    offset_ptr(offset),
                    count as GLsizei,
                    stride as GLsizei,
                );
            }
        }
    }

    fn draw_elements_indirect(&self, mode: GlEnum, ty: GlEnum, offset: u64, count: u32, stride: u32) {
        unsafe {
            if count == 1 {
                gl::DrawElementsIndirect(mode, ty, offset_ptr(offset));
            } else {
                gl::MultiDrawElementsIndirect(
                    mode,
                    ty,
                    offset_ptr(offset),
                    count as GLsizei,
                    stride as GLsizei,
                );
            }
        }
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        unsafe { gl::DispatchCompute(x, y, z) }
    }

    fn dispatch_compute_indirect(&self, offset: u64) {
        unsafe { gl::DispatchComputeIndirect(offset as GLintptr) }
    }

    fn memory_barrier(&self, bits: u32) {
        unsafe {
            if gl::MemoryBarrier::is_loaded() {
                gl::MemoryBarrier(bits);
            }
        }
    }

    fn uniform_fv(&self, location: i32, components: u32, data: &[f32]) {
        let count = (data.len() as u32 / components.max(1)) as GLsizei;
        let data = data.as_ptr();
        unsafe {
            match components {
                1 => gl::Uniform1fv(location, count, data),
                2 => gl::Uniform2fv(location, count, data),
                3 => gl::Uniform3fv(location, count, data),
                _ => gl::Uniform4fv(location, count, data),
            }
        }
    }

    fn uniform_iv(&self, location: i32, components: u32, data: &[i32]) {
        let count = (data.len() as u32 / components.max(1)) as GLsizei;
        let data = data.as_ptr();
        unsafe {
            match components {
                1 => gl::Uniform1iv(location, count, data),
                2 => gl::Uniform2iv(location, count, data),
                3 => gl::Uniform3iv(location, count, data),
                _ => gl::Uniform4iv(location, count, data),
            }
        }
    }

    fn uniform_uiv(&self, location: i32, components: u32, data: &[u32]) {
        let count = (data.len() as u32 / components.max(1)) as GLsizei;
        let data = data.as_ptr();
        unsafe {
            match components {
                1 => gl::Uniform1uiv(location, count, data),
                2 => gl::Uniform2uiv(location, count, data),
                3 => gl::Uniform3uiv(location, count, data),
                _ => gl::Uniform4uiv(location, count, data),
            }
        }
    }

    fn uniform_matrix_fv(&self, location: i32, dimension: u32, data: &[f32]) {
        let count = (data.len() as u32 / (dimension * dimension).max(1)) as GLsizei;
        let data = data.as_ptr();
        unsafe {
            match dimension {
                2 => gl::UniformMatrix2fv(location, count, gl::FALSE, data),
                3 => gl::UniformMatrix3fv(location, count, gl::FALSE, data),
                _ => gl::UniformMatrix4fv(location, count, gl::FALSE, data),
            }
        }
    }

    fn fence_sync(&self) -> SyncToken {
        let sync = unsafe { gl::FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0) };
        SyncToken(sync as usize)
    }

    fn client_wait_sync(&self, sync: SyncToken, timeout: u64) -> SyncStatus {
        let status = unsafe {
            gl::ClientWaitSync(sync.0 as GLsync, gl::SYNC_FLUSH_COMMANDS_BIT, timeout)
        };
        match status {
            gl::ALREADY_SIGNALED | gl::CONDITION_SATISFIED => SyncStatus::Signaled,
            gl::TIMEOUT_EXPIRED => SyncStatus::Timeout,
            _ => SyncStatus::Failed,
        }
    }

    fn delete_sync(&self, sync: SyncToken) {
        unsafe { gl::DeleteSync(sync.0 as GLsync) }
    }

    fn push_debug_group(&self, message: &str) {
        unsafe {
            if gl::PushDebugGroup::is_loaded() {
                gl::PushDebugGroup(
                    gl::DEBUG_SOURCE_APPLICATION,
                    0,
                    message.len() as GLsizei,
                    message.as_ptr() as *const GLchar,
                );
            }
        }
    }

    fn pop_debug_group(&self) {
        unsafe {
            if gl::PopDebugGroup::is_loaded() {
                gl::PopDebugGroup();
            }
        }
    }
}
