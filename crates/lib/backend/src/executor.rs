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

//! Replays recorded command lists on a locked context.

use byte_slice_cast::{AsByteSlice, AsSliceOf};

use crate::{
    render_pass::{attach_texture, check_framebuffer},
    ClearColor, ClearTarget, Command, CommandList, ConstantFormat, ContextId, ContextLock,
    ContextState, Device, Gl, GlEnum, GlName, PixelData, PixelDataMut, Rect, ScalarKind,
    TextureLocation, TransferRegion,
};

/// Texel offset of a region as sub-image and copy calls expect it: array layers and
/// cube faces go into the next free coordinate.
fn texel_offset(region: &TransferRegion) -> [i32; 3] {
    let [x, y, z] = region.offset;
    let layer = region.location.layer as i32;
    match region.location.target {
        gl::TEXTURE_1D_ARRAY => [x, layer, 0],
        gl::TEXTURE_2D_ARRAY
        | gl::TEXTURE_CUBE_MAP_ARRAY
        | gl::TEXTURE_2D_MULTISAMPLE_ARRAY
        | gl::TEXTURE_CUBE_MAP => [x, y, layer],
        _ => [x, y, z],
    }
}

/// Offset for an upload through `upload_target`. Cube faces have their own targets.
fn upload_offset(region: &TransferRegion, upload_target: GlEnum) -> [i32; 3] {
    if upload_target != region.location.target && region.location.target == gl::TEXTURE_CUBE_MAP {
        [region.offset[0], region.offset[1], 0]
    } else {
        texel_offset(region)
    }
}

fn region_rect(region: &TransferRegion) -> [i32; 4] {
    let [x, y, _] = region.offset;
    let [width, height, _] = region.extent;
    [x, y, x + width, y + height]
}

struct Replay<'a> {
    device: &'a Device,
    gl: &'a dyn Gl,
    state: &'a mut ContextState,
    id: ContextId,
    commands: &'a CommandList,
}

/// Runs every command of `commands` in order.
pub(crate) fn execute(device: &Device, lock: &ContextLock, commands: &CommandList) {
    puffin::profile_function!();
    let mut state = lock.state();
    let mut replay = Replay {
        device,
        gl: lock.gl(),
        state: &mut *state,
        id: lock.id(),
        commands,
    };
    for command in commands {
        replay.apply(command);
    }
}

impl<'a> Replay<'a> {
    fn apply(&mut self, command: &Command) {
        let gl = self.gl;
        match *command {
            Command::InputAssembly(state) => {
                self.state
                    .apply_input_assembly(gl, &state, self.device.caps().fixed_index_restart)
            }
            Command::Rasterization { state, dynamic } => {
                self.state.apply_rasterization(gl, &state, dynamic)
            }
            Command::Multisample(state) => self.state.apply_multisample(gl, &state),
            Command::DepthStencil { state, dynamic } => {
                self.state.apply_depth_stencil(gl, &state, dynamic)
            }
            Command::ColorBlend { state, dynamic } => {
                if let Some(blend) = self.commands.blend_state(state) {
                    self.state.apply_color_blend(gl, blend, dynamic);
                }
            }
            Command::Tessellation(state) => self.state.apply_tessellation(gl, &state),
            Command::UseProgram(program) => self.state.use_program(gl, program),

            Command::SetViewport { index, viewport } => {
                self.state.set_viewport(gl, index, &viewport)
            }
            Command::SetScissor { index, rect } => self.state.set_scissor(gl, index, &rect),
            Command::SetLineWidth(width) => self.state.set_line_width(gl, width),
            Command::SetDepthBias(bias) => self.state.set_depth_bias(gl, bias),
            Command::SetBlendConstants(constants) => {
                self.state.set_blend_constants(gl, constants)
            }
            Command::SetStencilCompareMask { faces, mask } => {
                self.state.set_stencil_compare_mask(gl, faces, mask)
            }
            Command::SetStencilWriteMask { faces, mask } => {
                self.state.set_stencil_write_mask(gl, faces, mask)
            }
            Command::SetStencilReference { faces, reference } => {
                self.state.set_stencil_reference(gl, faces, reference)
            }

            Command::BindFramebuffer(handle) => {
                let framebuffers = self.device.framebuffer_storage.read();
                match framebuffers.get(handle) {
                    Some(framebuffer) => {
                        let fbo = framebuffer.fbo(gl, self.state, self.id, &self.device.debug);
                        self.state.bind_framebuffer(gl, gl::FRAMEBUFFER, fbo);
                    }
                    None => self
                        .device
                        .debug
                        .error("Framebuffer destroyed before its commands ran"),
                }
            }
            Command::BindBackBuffer => self.state.bind_framebuffer(gl, gl::FRAMEBUFFER, 0),
            Command::DrawBuffers(range) => gl.draw_buffers(self.commands.enums(range)),
            Command::InvalidateFramebuffer(range) => {
                gl.invalidate_framebuffer(gl::FRAMEBUFFER, self.commands.enums(range))
            }
            Command::ClearColor {
                draw_buffer,
                value,
                area,
            } => self.clear_color(draw_buffer, value, area),
            Command::ClearDepth { depth, area } => self.clear_depth_stencil(Some(depth), None, area),
            Command::ClearStencil { stencil, area } => {
                self.clear_depth_stencil(None, Some(stencil), area)
            }
            Command::ClearDepthStencil {
                depth,
                stencil,
                area,
            } => self.clear_depth_stencil(Some(depth), Some(stencil), area),
            Command::ClearBackColor { value, area } => {
                self.clear_color(0, ClearColor::Float(value), area)
            }
            Command::ClearBackDepthStencil {
                depth,
                stencil,
                area,
            } => self.clear_depth_stencil(depth, stencil, area),

            Command::BindTexture {
                unit,
                target,
                texture,
            } => self.state.bind_texture(gl, unit, target, texture),
            Command::BindSampler { unit, sampler } => self.state.bind_sampler(gl, unit, sampler),
            Command::BindImageTexture { unit, binding } => {
                self.state.bind_image_texture(gl, unit, binding)
            }
            Command::BindBufferRange {
                target,
                index,
                buffer,
                offset,
                size,
            } => self
                .state
                .bind_buffer_range(gl, target, index, buffer, offset, size),
            Command::BindGeometry { geometry, offsets } => {
                let offsets = self.commands.offsets(offsets).collect::<Vec<_>>();
                if !self
                    .device
                    .geometry
                    .lock()
                    .bind(gl, self.state, self.id, geometry, &offsets)
                {
                    self.device
                        .debug
                        .error("Vertex input destroyed before its draws ran");
                }
            }
            Command::Uniform {
                location,
                format,
                data,
                ..
            } => self.uniform(location, format, self.commands.words(data)),

            Command::Draw {
                mode,
                first,
                count,
                instances,
                first_instance,
            } => gl.draw_arrays(mode, first, count, instances, self.base_instance(first_instance)),
            Command::DrawIndexed {
                mode,
                index_type,
                offset,
                count,
                instances,
                vertex_offset,
                first_instance,
                primitive_restart,
            } => {
                self.primitive_restart(primitive_restart, index_type);
                gl.draw_elements(
                    mode,
                    count,
                    index_type,
                    offset,
                    instances,
                    vertex_offset,
                    self.base_instance(first_instance),
                );
            }
            Command::DrawIndirect {
                mode,
                buffer,
                offset,
                count,
                stride,
            } => {
                self.state.bind_buffer(gl, gl::DRAW_INDIRECT_BUFFER, buffer);
                gl.draw_arrays_indirect(mode, offset, count, stride);
            }
            Command::DrawIndexedIndirect {
                mode,
                index_type,
                buffer,
                offset,
                count,
                stride,
                primitive_restart,
            } => {
                self.primitive_restart(primitive_restart, index_type);
                self.state.bind_buffer(gl, gl::DRAW_INDIRECT_BUFFER, buffer);
                gl.draw_elements_indirect(mode, index_type, offset, count, stride);
            }
            Command::Dispatch([x, y, z]) => gl.dispatch_compute(x, y, z),
            Command::DispatchIndirect { buffer, offset } => {
                self.state
                    .bind_buffer(gl, gl::DISPATCH_INDIRECT_BUFFER, buffer);
                gl.dispatch_compute_indirect(offset);
            }
            Command::MemoryBarrier(bits) => gl.memory_barrier(bits.bits()),

            Command::BlitImage {
                src,
                dst,
                mask,
                filter,
            } => self.blit(&src, &dst, mask, filter),
            Command::CopyImage { src, dst } => gl.copy_image_sub_data(
                src.location.texture,
                src.location.target,
                src.location.level,
                texel_offset(&src),
                dst.location.texture,
                dst.location.target,
                dst.location.level,
                texel_offset(&dst),
                src.extent,
            ),
            Command::CopyImageViaHost {
                src,
                dst,
                upload_target,
            } => self.copy_via_host(&src, &dst, upload_target),
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                self.state.bind_buffer(gl, gl::COPY_READ_BUFFER, src);
                self.state.bind_buffer(gl, gl::COPY_WRITE_BUFFER, dst);
                gl.copy_buffer_sub_data(
                    gl::COPY_READ_BUFFER,
                    gl::COPY_WRITE_BUFFER,
                    src_offset,
                    dst_offset,
                    size,
                );
            }
            Command::CopyBufferToImage {
                buffer,
                offset,
                dst,
                upload_target,
                row_length,
                image_height,
            } => self.upload(buffer, offset, &dst, upload_target, row_length, image_height),
            Command::CopyImageToBuffer {
                src,
                buffer,
                offset,
                row_length,
                image_height,
            } => self.readback(&src, buffer, offset, row_length, image_height),
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                self.state.bind_buffer(gl, gl::COPY_WRITE_BUFFER, buffer);
                gl.buffer_sub_data(
                    gl::COPY_WRITE_BUFFER,
                    offset,
                    self.commands.words(data).as_byte_slice(),
                );
            }
            Command::FillBuffer {
                buffer,
                offset,
                size,
                value,
            } => {
                let words = vec![value; (size / 4) as usize];
                self.state.bind_buffer(gl, gl::COPY_WRITE_BUFFER, buffer);
                gl.buffer_sub_data(gl::COPY_WRITE_BUFFER, offset, words.as_byte_slice());
            }
            Command::ClearImageColor { image, value } => self.clear_image_color(&image, value),
            Command::ClearImageDepthStencil {
                image,
                depth,
                stencil,
            } => self.clear_image_depth_stencil(&image, depth, stencil),

            Command::PushDebugGroup(label) => {
                if let Some(label) = self.commands.label(label) {
                    gl.push_debug_group(label);
                }
            }
            Command::PopDebugGroup => gl.pop_debug_group(),
        }
    }

    fn primitive_restart(&mut self, enabled: bool, index_type: GlEnum) {
        let fixed_index = self.device.caps().fixed_index_restart;
        self.state
            .set_primitive_restart(self.gl, enabled, fixed_index);
        if enabled && !fixed_index {
            self.state.set_restart_index(self.gl, index_type);
        }
    }

    fn base_instance(&self, first_instance: u32) -> u32 {
        if self.device.caps().base_instance {
            first_instance
        } else {
            0
        }
    }

    fn uniform(&self, location: i32, format: ConstantFormat, words: &[u32]) {
        let gl = self.gl;
        let bytes = words.as_byte_slice();
        let result = match (format.kind(), format.columns()) {
            (ScalarKind::Float, Some(columns)) => bytes
                .as_slice_of::<f32>()
                .map(|values| gl.uniform_matrix_fv(location, columns, values)),
            (ScalarKind::Float, None) => bytes
                .as_slice_of::<f32>()
                .map(|values| gl.uniform_fv(location, format.components(), values)),
            (ScalarKind::Int, _) => bytes
                .as_slice_of::<i32>()
                .map(|values| gl.uniform_iv(location, format.components(), values)),
            (ScalarKind::UInt, _) => {
                gl.uniform_uiv(location, format.components(), words);
                Ok(())
            }
        };
        if let Err(err) = result {
            self.device
                .debug
                .error(&format!("Push constant upload failed: {}", err));
        }
    }

    fn clear_color(&mut self, draw_buffer: u32, value: ClearColor, area: Option<Rect>) {
        let gl = self.gl;
        let scope = self
            .state
            .begin_clear(gl, ClearTarget::Color(draw_buffer), area);
        match value {
            ClearColor::Float(value) => gl.clear_buffer_fv(gl::COLOR, draw_buffer, &value),
            ClearColor::Int(value) => gl.clear_buffer_iv(gl::COLOR, draw_buffer, &value),
            ClearColor::UInt(value) => gl.clear_buffer_uiv(gl::COLOR, draw_buffer, &value),
        }
        self.state.end_clear(gl, scope);
    }

    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<u32>, area: Option<Rect>) {
        let gl = self.gl;
        let target = match (depth, stencil) {
            (Some(_), Some(_)) => ClearTarget::DepthStencil,
            (Some(_), None) => ClearTarget::Depth,
            (None, Some(_)) => ClearTarget::Stencil,
            (None, None) => return,
        };
        let scope = self.state.begin_clear(gl, target, area);
        match (depth, stencil) {
            (Some(depth), Some(stencil)) => gl.clear_buffer_fi(depth, stencil as i32),
            (Some(depth), None) => gl.clear_buffer_fv(gl::DEPTH, 0, &[depth; 4]),
            (None, Some(stencil)) => gl.clear_buffer_iv(gl::STENCIL, 0, &[stencil as i32; 4]),
            (None, None) => {}
        }
        self.state.end_clear(gl, scope);
    }

    /// Framebuffer object with a single texture level attached at `target`.
    fn temporary_framebuffer(&mut self, target: GlEnum, location: &TextureLocation) -> GlName {
        let gl = self.gl;
        let fbo = gl.create_framebuffer();
        self.state.bind_framebuffer(gl, target, fbo);
        let point = location.format.attachment(0);
        attach_texture(gl, target, point, location, false);
        if point != gl::COLOR_ATTACHMENT0 {
            if target != gl::DRAW_FRAMEBUFFER {
                gl.read_buffer(gl::NONE);
            }
            if target != gl::READ_FRAMEBUFFER {
                gl.draw_buffers(&[gl::NONE]);
            }
        }
        check_framebuffer(gl, target, &self.device.debug);

        fbo
    }

    fn release_framebuffer(&mut self, fbo: GlName) {
        self.state.framebuffer_deleted(fbo);
        self.gl.delete_framebuffer(fbo);
    }

    fn blit(&mut self, src: &TransferRegion, dst: &TransferRegion, mask: u32, filter: GlEnum) {
        let gl = self.gl;
        let scissor = self.state.suspend_scissor_test(gl);
        let read = self.temporary_framebuffer(gl::READ_FRAMEBUFFER, &src.location);
        let draw = self.temporary_framebuffer(gl::DRAW_FRAMEBUFFER, &dst.location);
        gl.blit_framebuffer(region_rect(src), region_rect(dst), mask, filter);
        self.release_framebuffer(read);
        self.release_framebuffer(draw);
        self.state.resume_scissor_test(gl, scissor);
    }

    fn set_pack_layout(&mut self, row_length: u32, image_height: u32) {
        let gl = self.gl;
        self.state.pixel_store(gl, gl::PACK_ALIGNMENT, 1);
        self.state.pixel_store(gl, gl::PACK_ROW_LENGTH, row_length as i32);
        self.state
            .pixel_store(gl, gl::PACK_IMAGE_HEIGHT, image_height as i32);
    }

    fn set_unpack_layout(&mut self, row_length: u32, image_height: u32) {
        let gl = self.gl;
        self.state.pixel_store(gl, gl::UNPACK_ALIGNMENT, 1);
        self.state
            .pixel_store(gl, gl::UNPACK_ROW_LENGTH, row_length as i32);
        self.state
            .pixel_store(gl, gl::UNPACK_IMAGE_HEIGHT, image_height as i32);
    }

    fn upload_region(&mut self, region: &TransferRegion, upload_target: GlEnum, data: PixelData) {
        let gl = self.gl;
        let location = &region.location;
        self.state
            .bind_texture_for_update(gl, location.target, location.texture);
        let offset = upload_offset(region, upload_target);
        let [width, height, depth] = region.extent;
        if location.format.is_compressed() {
            let size = location
                .format
                .region_size(width as u32, height as u32, depth.max(1) as u32);
            gl.compressed_tex_sub_image(
                upload_target,
                location.level,
                offset,
                region.extent,
                location.format.internal,
                size as u32,
                data,
            );
        } else {
            gl.tex_sub_image(
                upload_target,
                location.level,
                offset,
                region.extent,
                location.format.format,
                location.format.ty,
                data,
            );
        }
    }

    fn upload(
        &mut self,
        buffer: GlName,
        offset: u64,
        dst: &TransferRegion,
        upload_target: GlEnum,
        row_length: u32,
        image_height: u32,
    ) {
        let gl = self.gl;
        self.state.bind_buffer(gl, gl::PIXEL_UNPACK_BUFFER, buffer);
        self.set_unpack_layout(row_length, image_height);
        self.upload_region(dst, upload_target, PixelData::Offset(offset));
        self.state.bind_buffer(gl, gl::PIXEL_UNPACK_BUFFER, 0);
    }

    fn readback(
        &mut self,
        src: &TransferRegion,
        buffer: GlName,
        offset: u64,
        row_length: u32,
        image_height: u32,
    ) {
        let gl = self.gl;
        let fbo = self.temporary_framebuffer(gl::READ_FRAMEBUFFER, &src.location);
        self.state.bind_buffer(gl, gl::PIXEL_PACK_BUFFER, buffer);
        self.set_pack_layout(row_length, image_height);
        let [x, y, _] = src.offset;
        let [width, height, _] = src.extent;
        gl.read_pixels(
            [x, y, width, height],
            src.location.format.format,
            src.location.format.ty,
            PixelDataMut::Offset(offset),
        );
        self.state.bind_buffer(gl, gl::PIXEL_PACK_BUFFER, 0);
        self.release_framebuffer(fbo);
    }

    /// Copy through client memory, one slice at a time.
    fn copy_via_host(&mut self, src: &TransferRegion, dst: &TransferRegion, upload_target: GlEnum) {
        let gl = self.gl;
        let [x, y, _] = src.offset;
        let [width, height, _] = src.extent;
        let mut pixels = vec![
            0u8;
            src.location
                .format
                .region_size(width as u32, height as u32, 1) as usize
        ];

        let fbo = self.temporary_framebuffer(gl::READ_FRAMEBUFFER, &src.location);
        self.state.bind_buffer(gl, gl::PIXEL_PACK_BUFFER, 0);
        self.set_pack_layout(0, 0);
        gl.read_pixels(
            [x, y, width, height],
            src.location.format.format,
            src.location.format.ty,
            PixelDataMut::Slice(&mut pixels),
        );
        self.release_framebuffer(fbo);

        self.state.bind_buffer(gl, gl::PIXEL_UNPACK_BUFFER, 0);
        self.set_unpack_layout(0, 0);
        let dst = TransferRegion {
            extent: [width, height, 1],
            ..*dst
        };
        self.upload_region(&dst, upload_target, PixelData::Slice(&pixels));
    }

    fn clear_image_color(&mut self, image: &TextureLocation, value: ClearColor) {
        let fbo = self.temporary_framebuffer(gl::DRAW_FRAMEBUFFER, image);
        self.clear_color(0, value, None);
        self.release_framebuffer(fbo);
    }

    fn clear_image_depth_stencil(
        &mut self,
        image: &TextureLocation,
        depth: Option<f32>,
        stencil: Option<u32>,
    ) {
        let fbo = self.temporary_framebuffer(gl::DRAW_FRAMEBUFFER, image);
        self.clear_depth_stencil(depth, stencil, None);
        self.release_framebuffer(fbo);
    }
}
