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

use ash::vk;
use byte_slice_cast::{AsByteSlice, AsMutByteSlice, ToByteSlice, ToMutByteSlice};
use log::debug;

use crate::{
    format_desc, BackendError, BackendResult, BufferHandle, BufferViewHandle, Device, GlEnum,
    GlName, SharedObject,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
}

impl BufferDesc {
    pub fn gpu(size: u64, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    pub fn host(size: u64, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            memory: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        }
    }

    fn usage_hint(&self) -> GlEnum {
        let host = self.memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let readback = self.usage.contains(vk::BufferUsageFlags::TRANSFER_DST)
            && !self.usage.intersects(
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::UNIFORM_BUFFER,
            );
        match (host, readback) {
            (true, true) => gl::DYNAMIC_READ,
            (true, false) => gl::DYNAMIC_DRAW,
            (false, _) => gl::STATIC_DRAW,
        }
    }
}

#[derive(Debug)]
pub struct Buffer {
    pub(crate) name: GlName,
    pub desc: BufferDesc,
}

/// Texel buffer: a buffer range seen through a `TEXTURE_BUFFER` texture.
#[derive(Debug)]
pub struct BufferView {
    pub(crate) texture: GlName,
    pub buffer: BufferHandle,
    pub format: vk::Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferViewDesc {
    pub buffer: BufferHandle,
    pub format: vk::Format,
    pub offset: u64,
    pub range: u64,
}

impl Device {
    pub fn create_buffer(&self, desc: BufferDesc) -> BackendResult<BufferHandle> {
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let name = gl.create_buffer();
        lock.state().bind_buffer(gl, gl::COPY_WRITE_BUFFER, name);
        gl.buffer_data(gl::COPY_WRITE_BUFFER, desc.size, None, desc.usage_hint());
        if gl.get_error() == gl::OUT_OF_MEMORY {
            lock.state().buffer_deleted(name);
            gl.delete_buffer(name);
            return Err(BackendError::OutOfDeviceMemory);
        }
        drop(lock);
        debug!("Buffer {} created, {} bytes", name, desc.size);

        Ok(self.buffer_storage.write().push(Buffer { name, desc }))
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        let Some(buffer) = self.buffer_storage.write().remove(handle) else {
            return;
        };
        self.collect_geometry();
        self.delete_shared(SharedObject::Buffer(buffer.name));
    }

    pub fn buffer_desc(&self, handle: BufferHandle) -> BackendResult<BufferDesc> {
        self.buffer_storage
            .read()
            .get(handle)
            .map(|buffer| buffer.desc)
            .ok_or(BackendError::InvalidHandle("buffer"))
    }

    /// Host write through `glBufferSubData`, the equivalent of a mapped write.
    pub fn write_buffer<T: ToByteSlice>(
        &self,
        handle: BufferHandle,
        offset: u64,
        data: &[T],
    ) -> BackendResult<()> {
        let (name, size) = self.buffer_name_and_size(handle)?;
        let bytes = data.as_byte_slice();
        if offset + bytes.len() as u64 > size {
            return Err(BackendError::InvalidState("write past the end of buffer"));
        }
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        lock.state().bind_buffer(gl, gl::COPY_WRITE_BUFFER, name);
        gl.buffer_sub_data(gl::COPY_WRITE_BUFFER, offset, bytes);

        Ok(())
    }

    /// Host read. Waits for every command touching the buffer on the main context.
    pub fn read_buffer<T: ToMutByteSlice>(
        &self,
        handle: BufferHandle,
        offset: u64,
        data: &mut [T],
    ) -> BackendResult<()> {
        let (name, size) = self.buffer_name_and_size(handle)?;
        let bytes = data.as_mut_byte_slice();
        if offset + bytes.len() as u64 > size {
            return Err(BackendError::InvalidState("read past the end of buffer"));
        }
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        lock.state().bind_buffer(gl, gl::COPY_READ_BUFFER, name);
        gl.get_buffer_sub_data(gl::COPY_READ_BUFFER, offset, bytes);

        Ok(())
    }

    fn buffer_name_and_size(&self, handle: BufferHandle) -> BackendResult<(GlName, u64)> {
        self.buffer_storage
            .read()
            .get(handle)
            .map(|buffer| (buffer.name, buffer.desc.size))
            .ok_or(BackendError::InvalidHandle("buffer"))
    }

    pub fn create_buffer_view(&self, desc: BufferViewDesc) -> BackendResult<BufferViewHandle> {
        let format = format_desc(desc.format)
            .filter(|format| {
                !format.is_compressed() && format.aspects == vk::ImageAspectFlags::COLOR
            })
            .ok_or_else(|| {
                BackendError::NotSupported(format!("texel buffer format {:?}", desc.format))
            })?;
        let (buffer, size) = self.buffer_name_and_size(desc.buffer)?;
        let range = if desc.range == vk::WHOLE_SIZE {
            None
        } else {
            Some(desc.range.min(size.saturating_sub(desc.offset)))
        };
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let texture = gl.create_texture();
        lock.state()
            .bind_texture_for_update(gl, gl::TEXTURE_BUFFER, texture);
        gl.tex_buffer_range(format.internal, buffer, desc.offset, range);
        drop(lock);

        Ok(self.buffer_view_storage.write().push(BufferView {
            texture,
            buffer: desc.buffer,
            format: desc.format,
        }))
    }

    pub fn destroy_buffer_view(&self, handle: BufferViewHandle) {
        if let Some(view) = self.buffer_view_storage.write().remove(handle) {
            self.delete_shared(SharedObject::Texture(view.texture));
        }
    }
}
