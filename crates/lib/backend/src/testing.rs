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

//! Recording driver used by unit tests. Hands out fresh names and logs every call.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use parking_lot::Mutex;

use ash::vk;

use crate::{
    BackendResult, CommandBuffer, ConstantFormat, Device, DeviceDesc, FramebufferDesc,
    FramebufferHandle, Gl, GlEnum, GlName, GraphicsPipelineDesc, ImageDesc, ImageHandle,
    ImageViewDesc, NativeContext, PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle,
    PixelData, PixelDataMut, RenderPassDesc, RenderPassHandle, ShaderModuleDesc, SubpassDesc,
    SyncStatus, SyncToken,
};

pub(crate) trait Arg {
    fn value(self) -> f64;
}

macro_rules! impl_arg {
    ($($ty:ty),*) => {
        $(impl Arg for $ty {
            fn value(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_arg!(u32, i32, u64, f32, usize);

impl Arg for bool {
    fn value(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlCall {
    pub name: &'static str,
    pub args: Vec<f64>,
}

impl GlCall {
    pub fn arg(&self, index: usize) -> f64 {
        self.args[index]
    }
}

#[derive(Debug)]
pub struct CallLog {
    calls: Mutex<Vec<GlCall>>,
    next_name: AtomicU32,
    pub fail_compile: AtomicBool,
    pub fail_link: AtomicBool,
    /// Sync objects never signal while set.
    pub stall_syncs: AtomicBool,
    version: Mutex<(u32, u32)>,
}

impl Default for CallLog {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            next_name: AtomicU32::new(1),
            fail_compile: AtomicBool::new(false),
            fail_link: AtomicBool::new(false),
            stall_syncs: AtomicBool::new(false),
            version: Mutex::new((4, 6)),
        }
    }
}

impl CallLog {
    fn push(&self, name: &'static str, args: Vec<f64>) {
        self.calls.lock().push(GlCall { name, args });
    }

    fn next_name(&self) -> GlName {
        self.next_name.fetch_add(1, Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|call| call.name).collect()
    }

    pub fn named(&self, name: &str) -> Vec<GlCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.name == name)
            .cloned()
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.name == name).count()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn set_version(&self, major: u32, minor: u32) {
        *self.version.lock() = (major, minor);
    }
}

macro_rules! record {
    ($self:ident, $name:expr $(, $arg:expr)*) => {
        $self.log.push($name, vec![$(Arg::value($arg)),*])
    };
}

#[derive(Debug, Default, Clone)]
pub struct RecordingGl {
    log: Arc<CallLog>,
}

impl RecordingGl {
    pub fn with_log(log: Arc<CallLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn shared_log(&self) -> Arc<CallLog> {
        self.log.clone()
    }

    fn create(&self, name: &'static str) -> GlName {
        let object = self.log.next_name();
        record!(self, name, object);
        object
    }
}

impl Gl for RecordingGl {
    fn version(&self) -> (u32, u32) {
        *self.log.version.lock()
    }

    fn get_integer(&self, _pname: GlEnum) -> i32 {
        0
    }

    fn get_error(&self) -> GlEnum {
        gl::NO_ERROR
    }

    fn flush(&self) {
        record!(self, "flush");
    }

    fn finish(&self) {
        record!(self, "finish");
    }

    fn create_buffer(&self) -> GlName {
        self.create("create_buffer")
    }

    fn delete_buffer(&self, buffer: GlName) {
        record!(self, "delete_buffer", buffer);
    }

    fn create_texture(&self) -> GlName {
        self.create("create_texture")
    }

    fn delete_texture(&self, texture: GlName) {
        record!(self, "delete_texture", texture);
    }

    fn create_sampler(&self) -> GlName {
        self.create("create_sampler")
    }

    fn delete_sampler(&self, sampler: GlName) {
        record!(self, "delete_sampler", sampler);
    }

    fn create_framebuffer(&self) -> GlName {
        self.create("create_framebuffer")
    }

    fn delete_framebuffer(&self, framebuffer: GlName) {
        record!(self, "delete_framebuffer", framebuffer);
    }

    fn create_vertex_array(&self) -> GlName {
        self.create("create_vertex_array")
    }

    fn delete_vertex_array(&self, vertex_array: GlName) {
        record!(self, "delete_vertex_array", vertex_array);
    }

    fn create_shader(&self, ty: GlEnum) -> GlName {
        let shader = self.log.next_name();
        record!(self, "create_shader", ty, shader);
        shader
    }

    fn shader_source(&self, shader: GlName, _source: &str) {
        record!(self, "shader_source", shader);
    }

    fn compile_shader(&self, shader: GlName) -> Result<(), String> {
        record!(self, "compile_shader", shader);
        if self.log.fail_compile.load(Ordering::Relaxed) {
            Err("syntax error".into())
        } else {
            Ok(())
        }
    }

    fn delete_shader(&self, shader: GlName) {
        record!(self, "delete_shader", shader);
    }

    fn create_program(&self) -> GlName {
        self.create("create_program")
    }

    fn attach_shader(&self, program: GlName, shader: GlName) {
        record!(self, "attach_shader", program, shader);
    }

    fn detach_shader(&self, program: GlName, shader: GlName) {
        record!(self, "detach_shader", program, shader);
    }

    fn link_program(&self, program: GlName) -> Result<(), String> {
        record!(self, "link_program", program);
        if self.log.fail_link.load(Ordering::Relaxed) {
            Err("unresolved symbol".into())
        } else {
            Ok(())
        }
    }

    fn delete_program(&self, program: GlName) {
        record!(self, "delete_program", program);
    }

    fn get_uniform_location(&self, program: GlName, _name: &str) -> Option<i32> {
        let location = self.log.next_name() as i32;
        record!(self, "get_uniform_location", program, location);
        Some(location)
    }

    fn get_uniform_block_index(&self, program: GlName, _name: &str) -> Option<u32> {
        let index = self.log.next_name();
        record!(self, "get_uniform_block_index", program, index);
        Some(index)
    }

    fn uniform_block_binding(&self, program: GlName, index: u32, binding: u32) {
        record!(self, "uniform_block_binding", program, index, binding);
    }

    fn get_shader_storage_block_index(&self, program: GlName, _name: &str) -> Option<u32> {
        let index = self.log.next_name();
        record!(self, "get_shader_storage_block_index", program, index);
        Some(index)
    }

    fn shader_storage_block_binding(&self, program: GlName, index: u32, binding: u32) {
        record!(self, "shader_storage_block_binding", program, index, binding);
    }

    fn enable(&self, cap: GlEnum) {
        record!(self, "enable", cap);
    }

    fn disable(&self, cap: GlEnum) {
        record!(self, "disable", cap);
    }

    fn enable_i(&self, cap: GlEnum, index: u32) {
        record!(self, "enable_i", cap, index);
    }

    fn disable_i(&self, cap: GlEnum, index: u32) {
        record!(self, "disable_i", cap, index);
    }

    fn cull_face(&self, mode: GlEnum) {
        record!(self, "cull_face", mode);
    }

    fn front_face(&self, mode: GlEnum) {
        record!(self, "front_face", mode);
    }

    fn polygon_mode(&self, mode: GlEnum) {
        record!(self, "polygon_mode", mode);
    }

    fn polygon_offset(&self, factor: f32, units: f32, clamp: f32) {
        record!(self, "polygon_offset", factor, units, clamp);
    }

    fn primitive_restart_index(&self, index: u32) {
        record!(self, "primitive_restart_index", index);
    }

    fn line_width(&self, width: f32) {
        record!(self, "line_width", width);
    }

    fn sample_mask(&self, mask: u32) {
        record!(self, "sample_mask", mask);
    }

    fn min_sample_shading(&self, value: f32) {
        record!(self, "min_sample_shading", value);
    }

    fn patch_vertices(&self, count: u32) {
        record!(self, "patch_vertices", count);
    }

    fn depth_func(&self, func: GlEnum) {
        record!(self, "depth_func", func);
    }

    fn depth_mask(&self, flag: bool) {
        record!(self, "depth_mask", flag);
    }

    fn depth_range(&self, index: u32, near: f32, far: f32) {
        record!(self, "depth_range", index, near, far);
    }

    fn stencil_func_separate(&self, face: GlEnum, func: GlEnum, reference: u32, mask: u32) {
        record!(self, "stencil_func_separate", face, func, reference, mask);
    }

    fn stencil_op_separate(&self, face: GlEnum, fail: GlEnum, depth_fail: GlEnum, pass: GlEnum) {
        record!(self, "stencil_op_separate", face, fail, depth_fail, pass);
    }

    fn stencil_mask_separate(&self, face: GlEnum, mask: u32) {
        record!(self, "stencil_mask_separate", face, mask);
    }

    fn blend_equation_separate_i(&self, buffer: u32, rgb: GlEnum, alpha: GlEnum) {
        record!(self, "blend_equation_separate_i", buffer, rgb, alpha);
    }

    fn blend_func_separate_i(
        &self,
        buffer: u32,
        src_rgb: GlEnum,
        dst_rgb: GlEnum,
        src_alpha: GlEnum,
        dst_alpha: GlEnum,
    ) {
        record!(
            self,
            "blend_func_separate_i",
            buffer,
            src_rgb,
            dst_rgb,
            src_alpha,
            dst_alpha
        );
    }

    fn blend_color(&self, color: [f32; 4]) {
        record!(self, "blend_color", color[0], color[1], color[2], color[3]);
    }

    fn color_mask_i(&self, buffer: u32, mask: [bool; 4]) {
        record!(self, "color_mask_i", buffer, mask[0], mask[1], mask[2], mask[3]);
    }

    fn logic_op(&self, op: GlEnum) {
        record!(self, "logic_op", op);
    }

    fn viewport(&self, index: u32, rect: [f32; 4]) {
        record!(self, "viewport", index, rect[0], rect[1], rect[2], rect[3]);
    }

    fn scissor(&self, index: u32, rect: [i32; 4]) {
        record!(self, "scissor", index, rect[0], rect[1], rect[2], rect[3]);
    }

    fn use_program(&self, program: GlName) {
        record!(self, "use_program", program);
    }

    fn bind_framebuffer(&self, target: GlEnum, framebuffer: GlName) {
        record!(self, "bind_framebuffer", target, framebuffer);
    }

    fn bind_vertex_array(&self, vertex_array: GlName) {
        record!(self, "bind_vertex_array", vertex_array);
    }

    fn bind_buffer(&self, target: GlEnum, buffer: GlName) {
        record!(self, "bind_buffer", target, buffer);
    }

    fn bind_buffer_range(&self, target: GlEnum, index: u32, buffer: GlName, offset: u64, size: u64) {
        record!(self, "bind_buffer_range", target, index, buffer, offset, size);
    }

    fn active_texture(&self, unit: u32) {
        record!(self, "active_texture", unit);
    }

    fn bind_texture(&self, target: GlEnum, texture: GlName) {
        record!(self, "bind_texture", target, texture);
    }

    fn bind_sampler(&self, unit: u32, sampler: GlName) {
        record!(self, "bind_sampler", unit, sampler);
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
        record!(
            self,
            "bind_image_texture",
            unit,
            texture,
            level,
            layered,
            layer,
            access,
            format
        );
    }

    fn tex_storage(
        &self,
        target: GlEnum,
        levels: u32,
        internal_format: GlEnum,
        _format: GlEnum,
        _ty: GlEnum,
        extent: [i32; 3],
    ) {
        record!(
            self,
            "tex_storage",
            target,
            levels,
            internal_format,
            extent[0],
            extent[1],
            extent[2]
        );
    }

    fn tex_storage_multisample(
        &self,
        target: GlEnum,
        samples: u32,
        internal_format: GlEnum,
        extent: [i32; 3],
    ) {
        record!(
            self,
            "tex_storage_multisample",
            target,
            samples,
            internal_format,
            extent[0],
            extent[1],
            extent[2]
        );
    }

    fn tex_buffer_range(
        &self,
        internal_format: GlEnum,
        buffer: GlName,
        offset: u64,
        size: Option<u64>,
    ) {
        record!(
            self,
            "tex_buffer_range",
            internal_format,
            buffer,
            offset,
            size.unwrap_or(0)
        );
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
        record!(
            self,
            "texture_view",
            view,
            target,
            original,
            internal_format,
            base_level,
            level_count,
            base_layer,
            layer_count
        );
    }

    fn tex_parameter_i(&self, target: GlEnum, pname: GlEnum, value: i32) {
        record!(self, "tex_parameter_i", target, pname, value);
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
        let source = match data {
            PixelData::Offset(offset) => offset,
            PixelData::Slice(data) => data.len() as u64,
        };
        record!(
            self,
            "tex_sub_image",
            target,
            level,
            offset[0],
            offset[1],
            offset[2],
            extent[0],
            extent[1],
            extent[2],
            format,
            ty,
            source
        );
    }

    fn compressed_tex_sub_image(
        &self,
        target: GlEnum,
        level: u32,
        offset: [i32; 3],
        extent: [i32; 3],
        format: GlEnum,
        size: u32,
        _data: PixelData,
    ) {
        record!(
            self,
            "compressed_tex_sub_image",
            target,
            level,
            offset[0],
            offset[1],
            offset[2],
            extent[0],
            extent[1],
            extent[2],
            format,
            size
        );
    }

    fn sampler_parameter_i(&self, sampler: GlName, pname: GlEnum, value: i32) {
        record!(self, "sampler_parameter_i", sampler, pname, value);
    }

    fn sampler_parameter_f(&self, sampler: GlName, pname: GlEnum, value: f32) {
        record!(self, "sampler_parameter_f", sampler, pname, value);
    }

    fn sampler_parameter_fv(&self, sampler: GlName, pname: GlEnum, value: &[f32; 4]) {
        record!(
            self,
            "sampler_parameter_fv",
            sampler,
            pname,
            value[0],
            value[1],
            value[2],
            value[3]
        );
    }

    fn framebuffer_texture(&self, target: GlEnum, attachment: GlEnum, texture: GlName, level: u32) {
        record!(self, "framebuffer_texture", target, attachment, texture, level);
    }

    fn framebuffer_texture_2d(
        &self,
        target: GlEnum,
        attachment: GlEnum,
        texture_target: GlEnum,
        texture: GlName,
        level: u32,
    ) {
        record!(
            self,
            "framebuffer_texture_2d",
            target,
            attachment,
            texture_target,
            texture,
            level
        );
    }

    fn framebuffer_texture_layer(
        &self,
        target: GlEnum,
        attachment: GlEnum,
        texture: GlName,
        level: u32,
        layer: u32,
    ) {
        record!(
            self,
            "framebuffer_texture_layer",
            target,
            attachment,
            texture,
            level,
            layer
        );
    }

    fn check_framebuffer_status(&self, target: GlEnum) -> GlEnum {
        record!(self, "check_framebuffer_status", target);
        gl::FRAMEBUFFER_COMPLETE
    }

    fn draw_buffers(&self, buffers: &[GlEnum]) {
        self.log.push(
            "draw_buffers",
            buffers.iter().map(|buffer| *buffer as f64).collect(),
        );
    }

    fn read_buffer(&self, source: GlEnum) {
        record!(self, "read_buffer", source);
    }

    fn invalidate_framebuffer(&self, target: GlEnum, attachments: &[GlEnum]) {
        let mut args = vec![target as f64];
        args.extend(attachments.iter().map(|attachment| *attachment as f64));
        self.log.push("invalidate_framebuffer", args);
    }

    fn blit_framebuffer(&self, src: [i32; 4], dst: [i32; 4], mask: u32, filter: GlEnum) {
        record!(
            self,
            "blit_framebuffer",
            src[0],
            src[1],
            src[2],
            src[3],
            dst[0],
            dst[1],
            dst[2],
            dst[3],
            mask,
            filter
        );
    }

    fn clear_buffer_fv(&self, buffer: GlEnum, draw_buffer: u32, value: &[f32; 4]) {
        record!(
            self,
            "clear_buffer_fv",
            buffer,
            draw_buffer,
            value[0],
            value[1],
            value[2],
            value[3]
        );
    }

    fn clear_buffer_iv(&self, buffer: GlEnum, draw_buffer: u32, value: &[i32; 4]) {
        record!(
            self,
            "clear_buffer_iv",
            buffer,
            draw_buffer,
            value[0],
            value[1],
            value[2],
            value[3]
        );
    }

    fn clear_buffer_uiv(&self, buffer: GlEnum, draw_buffer: u32, value: &[u32; 4]) {
        record!(
            self,
            "clear_buffer_uiv",
            buffer,
            draw_buffer,
            value[0],
            value[1],
            value[2],
            value[3]
        );
    }

    fn clear_buffer_fi(&self, depth: f32, stencil: i32) {
        record!(self, "clear_buffer_fi", depth, stencil);
    }

    fn buffer_data(&self, target: GlEnum, size: u64, _data: Option<&[u8]>, usage: GlEnum) {
        record!(self, "buffer_data", target, size, usage);
    }

    fn buffer_sub_data(&self, target: GlEnum, offset: u64, data: &[u8]) {
        record!(self, "buffer_sub_data", target, offset, data.len());
    }

    fn get_buffer_sub_data(&self, target: GlEnum, offset: u64, data: &mut [u8]) {
        record!(self, "get_buffer_sub_data", target, offset, data.len());
        data.fill(0);
    }

    fn copy_buffer_sub_data(
        &self,
        read_target: GlEnum,
        write_target: GlEnum,
        read_offset: u64,
        write_offset: u64,
        size: u64,
    ) {
        record!(
            self,
            "copy_buffer_sub_data",
            read_target,
            write_target,
            read_offset,
            write_offset,
            size
        );
    }

    fn pixel_store_i(&self, pname: GlEnum, value: i32) {
        record!(self, "pixel_store_i", pname, value);
    }

    fn read_pixels(&self, rect: [i32; 4], format: GlEnum, ty: GlEnum, data: PixelDataMut) {
        let destination = match data {
            PixelDataMut::Offset(offset) => offset,
            PixelDataMut::Slice(data) => {
                data.fill(0);
                data.len() as u64
            }
        };
        record!(
            self,
            "read_pixels",
            rect[0],
            rect[1],
            rect[2],
            rect[3],
            format,
            ty,
            destination
        );
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
        record!(
            self,
            "copy_image_sub_data",
            src,
            src_target,
            src_level,
            src_offset[0],
            src_offset[1],
            src_offset[2],
            dst,
            dst_target,
            dst_level,
            dst_offset[0],
            dst_offset[1],
            dst_offset[2],
            extent[0],
            extent[1],
            extent[2]
        );
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        record!(self, "enable_vertex_attrib_array", index);
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
        record!(
            self,
            "vertex_attrib_pointer",
            index,
            size,
            ty,
            normalized,
            integer,
            stride,
            offset
        );
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        record!(self, "vertex_attrib_divisor", index, divisor);
    }

    fn draw_arrays(
        &self,
        mode: GlEnum,
        first: u32,
        count: u32,
        instance_count: u32,
        base_instance: u32,
    ) {
        record!(
            self,
            "draw_arrays",
            mode,
            first,
            count,
            instance_count,
            base_instance
        );
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
        record!(
            self,
            "draw_elements",
            mode,
            count,
            ty,
            offset,
            instance_count,
            base_vertex,
            base_instance
        );
    }

    fn draw_arrays_indirect(&self, mode: GlEnum, offset: u64, count: u32, stride: u32) {
        record!(self, "draw_arrays_indirect", mode, offset, count, stride);
    }

    fn draw_elements_indirect(&self, mode: GlEnum, ty: GlEnum, offset: u64, count: u32, stride: u32) {
        record!(self, "draw_elements_indirect", mode, ty, offset, count, stride);
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        record!(self, "dispatch_compute", x, y, z);
    }

    fn dispatch_compute_indirect(&self, offset: u64) {
        record!(self, "dispatch_compute_indirect", offset);
    }

    fn memory_barrier(&self, bits: u32) {
        record!(self, "memory_barrier", bits);
    }

    fn uniform_fv(&self, location: i32, components: u32, data: &[f32]) {
        let mut args = vec![location as f64, components as f64];
        args.extend(data.iter().map(|value| *value as f64));
        self.log.push("uniform_fv", args);
    }

    fn uniform_iv(&self, location: i32, components: u32, data: &[i32]) {
        let mut args = vec![location as f64, components as f64];
        args.extend(data.iter().map(|value| *value as f64));
        self.log.push("uniform_iv", args);
    }

    fn uniform_uiv(&self, location: i32, components: u32, data: &[u32]) {
        let mut args = vec![location as f64, components as f64];
        args.extend(data.iter().map(|value| *value as f64));
        self.log.push("uniform_uiv", args);
    }

    fn uniform_matrix_fv(&self, location: i32, dimension: u32, data: &[f32]) {
        let mut args = vec![location as f64, dimension as f64];
        args.extend(data.iter().map(|value| *value as f64));
        self.log.push("uniform_matrix_fv", args);
    }

    fn fence_sync(&self) -> SyncToken {
        let sync = self.log.next_name();
        record!(self, "fence_sync", sync);
        SyncToken(sync as usize)
    }

    fn client_wait_sync(&self, sync: SyncToken, timeout: u64) -> SyncStatus {
        record!(self, "client_wait_sync", sync.0, timeout);
        if self.log.stall_syncs.load(Ordering::Relaxed) {
            SyncStatus::Timeout
        } else {
            SyncStatus::Signaled
        }
    }

    fn delete_sync(&self, sync: SyncToken) {
        record!(self, "delete_sync", sync.0);
    }

    fn push_debug_group(&self, _message: &str) {
        record!(self, "push_debug_group");
    }

    fn pop_debug_group(&self) {
        record!(self, "pop_debug_group");
    }
}

/// Context over [`RecordingGl`]; make-current, release and swap are logged too.
#[derive(Debug, Default)]
pub struct RecordingContext {
    gl: RecordingGl,
}

impl RecordingContext {
    pub fn with_log(log: Arc<CallLog>) -> Self {
        Self {
            gl: RecordingGl::with_log(log),
        }
    }
}

impl NativeContext for RecordingContext {
    fn make_current(&self) -> BackendResult<()> {
        self.gl.log.push("make_current", Vec::new());
        Ok(())
    }

    fn release_current(&self) {
        self.gl.log.push("release_current", Vec::new());
    }

    fn swap_buffers(&self) -> BackendResult<()> {
        self.gl.log.push("swap_buffers", Vec::new());
        Ok(())
    }

    fn gl(&self) -> &dyn Gl {
        &self.gl
    }
}

pub fn init_logging() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .ok();
}

/// Device over a recording context with a 64x64 single color target pass.
pub struct Fixture {
    pub device: Arc<Device>,
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub color: ImageHandle,
}

impl Fixture {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub fn new(log: &Arc<CallLog>) -> Self {
        let device = Device::new(DeviceDesc::new(Box::new(RecordingContext::with_log(
            log.clone(),
        ))))
        .unwrap();
        let layout = device
            .create_pipeline_layout(PipelineLayoutDesc::default().push_constant_range(
                vk::ShaderStageFlags::ALL_GRAPHICS,
                0,
                128,
            ))
            .unwrap();
        let render_pass = device
            .create_render_pass(
                RenderPassDesc::default()
                    .color_attachment(
                        Self::FORMAT,
                        vk::AttachmentLoadOp::CLEAR,
                        vk::AttachmentStoreOp::STORE,
                    )
                    .subpass(SubpassDesc::default().color(0)),
            )
            .unwrap();
        let color = device
            .create_image(ImageDesc::color_attachment(Self::FORMAT, 64, 64))
            .unwrap();
        let view = device
            .create_image_view(ImageViewDesc::new(
                color,
                vk::ImageViewType::TYPE_2D,
                Self::FORMAT,
            ))
            .unwrap();
        let framebuffer = device
            .create_framebuffer(FramebufferDesc::new(render_pass, 64, 64).attachment(view))
            .unwrap();

        Self {
            device,
            layout,
            render_pass,
            framebuffer,
            color,
        }
    }

    /// Opaque pipeline reading one `vec3` per vertex from binding 0. The fragment stage
    /// declares `constants`.
    pub fn pipeline(&self, constants: &[(&str, u32, ConstantFormat)]) -> PipelineHandle {
        let vertex = self
            .device
            .create_shader_module(ShaderModuleDesc::vertex("void main() {}"))
            .unwrap();
        let fragment = constants.iter().fold(
            ShaderModuleDesc::fragment("void main() {}"),
            |desc, (name, offset, format)| desc.push_constant(name, *offset, *format),
        );
        let fragment = self.device.create_shader_module(fragment).unwrap();
        self.device
            .create_graphics_pipeline(
                GraphicsPipelineDesc::new(self.layout, self.render_pass, 0)
                    .stage(vertex)
                    .stage(fragment)
                    .vertex_binding(0, 12, vk::VertexInputRate::VERTEX)
                    .vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
                    .opaque(),
            )
            .unwrap()
    }

    pub fn begin_pass(&self, cb: &mut CommandBuffer, color: [f32; 4]) {
        cb.begin_render_pass(
            self.render_pass,
            self.framebuffer,
            vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: 64,
                    height: 64,
                },
            },
            &[vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            }],
        );
    }
}
