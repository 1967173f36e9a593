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

use std::{collections::HashMap, sync::Arc};

use arrayvec::ArrayVec;
use glint_common::{Arena, Handle};
use log::debug;

use crate::{
    Buffer, BufferHandle, ContextId, ContextObject, ContextState, Device, Gl, GlName, Pipeline,
    PipelineHandle, VertexLayout,
};

pub const MAX_VERTEX_BINDINGS: usize = 16;

/// Offset of every vertex binding of a [`GeometryKey`], in key order.
pub type VertexOffsets = ArrayVec<u64, MAX_VERTEX_BINDINGS>;

/// Buffers and pipeline a vertex array object is built from. Offsets are not part of the
/// key, they are applied when the vertex array is bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct GeometryKey {
    pub pipeline: PipelineHandle,
    /// Binding and buffer, sorted by binding.
    pub vertex: ArrayVec<(u32, BufferHandle), MAX_VERTEX_BINDINGS>,
    pub index: Option<BufferHandle>,
}

/// Vertex array object emulation. One GL vertex array per context, set up on first draw
/// and re-pointed whenever a draw binds the buffers at other offsets.
#[derive(Debug)]
pub struct GeometryBuffers {
    key: GeometryKey,
    layout: Arc<VertexLayout>,
    vertex_buffers: ArrayVec<(u32, GlName), MAX_VERTEX_BINDINGS>,
    index_buffer: Option<GlName>,
    vertex_arrays: HashMap<ContextId, (GlName, VertexOffsets)>,
}

fn to_offsets(offsets: &[u64]) -> VertexOffsets {
    offsets.iter().copied().take(MAX_VERTEX_BINDINGS).collect()
}

/// Points the attributes of `layout` at `buffers`. Only bindings whose offset differs from
/// `previous` are touched, all of them without one.
fn point_attributes(
    gl: &dyn Gl,
    state: &mut ContextState,
    layout: &VertexLayout,
    buffers: &[(u32, GlName)],
    offsets: &[u64],
    previous: Option<&[u64]>,
) {
    for attribute in &layout.attributes {
        let Some(binding) = layout.binding(attribute.binding) else {
            continue;
        };
        let Some(slot) = buffers
            .iter()
            .position(|(index, _)| *index == attribute.binding)
        else {
            debug!(
                "Attribute {} has no buffer bound at binding {}",
                attribute.location, attribute.binding
            );
            continue;
        };
        let offset = offsets.get(slot).copied().unwrap_or_default();
        if previous.and_then(|previous| previous.get(slot)) == Some(&offset) {
            continue;
        }
        state.bind_buffer(gl, gl::ARRAY_BUFFER, buffers[slot].1);
        gl.vertex_attrib_pointer(
            attribute.location,
            attribute.size,
            attribute.ty,
            attribute.normalized,
            attribute.integer,
            binding.stride,
            offset + attribute.offset as u64,
        );
    }
}

pub type GeometryHandle = Handle<GeometryBuffers>;

/// Entries name their buffers and pipeline by generation-checked handles, a destroyed
/// owner turns the entry stale and the next collect drops it.
#[derive(Debug, Default)]
pub struct GeometryCache {
    entries: Arena<GeometryBuffers>,
    lookup: HashMap<GeometryKey, GeometryHandle>,
}

impl GeometryCache {
    pub(crate) fn get_or_create(
        &mut self,
        key: GeometryKey,
        layout: &Arc<VertexLayout>,
        buffers: &Arena<Buffer>,
    ) -> Option<GeometryHandle> {
        if let Some(handle) = self.lookup.get(&key) {
            if self.entries.contains(*handle) {
                return Some(*handle);
            }
        }
        let vertex_buffers = key
            .vertex
            .iter()
            .map(|(binding, buffer)| buffers.get(*buffer).map(|buffer| (*binding, buffer.name)))
            .collect::<Option<ArrayVec<_, MAX_VERTEX_BINDINGS>>>()?;
        let index_buffer = match key.index {
            Some(handle) => Some(buffers.get(handle)?.name),
            None => None,
        };

        let handle = self.entries.push(GeometryBuffers {
            key: key.clone(),
            layout: layout.clone(),
            vertex_buffers,
            index_buffer,
            vertex_arrays: HashMap::new(),
        });
        self.lookup.insert(key, handle);

        Some(handle)
    }

    /// Drops entries whose buffers or pipeline are gone and returns their vertex arrays.
    pub(crate) fn collect(
        &mut self,
        buffers: &Arena<Buffer>,
        pipelines: &Arena<Pipeline>,
    ) -> Vec<(ContextId, GlName)> {
        let stale = self.entries.retain_extract(|entry| {
            pipelines.contains(entry.key.pipeline)
                && entry
                    .key
                    .vertex
                    .iter()
                    .all(|(_, buffer)| buffers.contains(*buffer))
                && entry.key.index.map_or(true, |index| buffers.contains(index))
        });
        if stale.is_empty() {
            return Vec::new();
        }
        let entries = &self.entries;
        self.lookup.retain(|_, handle| entries.contains(*handle));
        debug!("{} geometry entries collected", stale.len());

        stale
            .into_iter()
            .flat_map(|entry| {
                entry
                    .vertex_arrays
                    .into_iter()
                    .map(|(id, (vertex_array, _))| (id, vertex_array))
            })
            .collect()
    }

    /// Binds the vertex array of `handle` in the locked context, building it first if needed.
    pub(crate) fn bind(
        &mut self,
        gl: &dyn Gl,
        state: &mut ContextState,
        id: ContextId,
        handle: GeometryHandle,
        offsets: &[u64],
    ) -> bool {
        let Some(entry) = self.entries.get_mut(handle) else {
            return false;
        };
        let GeometryBuffers {
            layout,
            vertex_buffers,
            index_buffer,
            vertex_arrays,
            ..
        } = entry;
        if let Some((vertex_array, current)) = vertex_arrays.get_mut(&id) {
            state.bind_vertex_array(gl, *vertex_array);
            if current.as_slice() != offsets {
                point_attributes(
                    gl,
                    state,
                    layout,
                    vertex_buffers,
                    offsets,
                    Some(current.as_slice()),
                );
                *current = to_offsets(offsets);
            }
            return true;
        }

        let vertex_array = gl.create_vertex_array();
        state.bind_vertex_array(gl, vertex_array);
        for attribute in &layout.attributes {
            let Some(binding) = layout.binding(attribute.binding) else {
                continue;
            };
            gl.enable_vertex_attrib_array(attribute.location);
            if binding.instanced {
                gl.vertex_attrib_divisor(attribute.location, 1);
            }
        }
        point_attributes(gl, state, layout, vertex_buffers, offsets, None);
        if let Some(index) = index_buffer {
            state.bind_buffer(gl, gl::ELEMENT_ARRAY_BUFFER, *index);
        }
        vertex_arrays.insert(id, (vertex_array, to_offsets(offsets)));

        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Device {
    pub(crate) fn geometry_buffers(
        &self,
        key: GeometryKey,
        layout: &Arc<VertexLayout>,
    ) -> Option<GeometryHandle> {
        let buffers = self.buffer_storage.read();
        self.geometry.lock().get_or_create(key, layout, &buffers)
    }

    pub(crate) fn collect_geometry(&self) {
        let released = {
            let buffers = self.buffer_storage.read();
            let pipelines = self.pipeline_storage.read();
            self.geometry.lock().collect(&buffers, &pipelines)
        };
        self.release_context_objects(
            released
                .into_iter()
                .map(|(id, vertex_array)| (id, ContextObject::VertexArray(vertex_array))),
        );
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use arrayvec::ArrayVec;
    use ash::vk;
    use glint_common::{Arena, Handle};

    use crate::{
        testing::{CallLog, RecordingGl},
        Buffer, BufferDesc, ContextId, ContextState, GeometryCache, GeometryKey, Pipeline,
        PipelineKind, VertexAttribute, VertexBinding, VertexLayout,
    };

    fn buffer(name: u32) -> Buffer {
        Buffer {
            name,
            desc: BufferDesc::gpu(1024, vk::BufferUsageFlags::VERTEX_BUFFER),
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline {
            program: 1,
            push_constants: Arc::from(Vec::new()),
            kind: PipelineKind::Compute,
            layout: Handle::invalid(),
        }
    }

    fn layout() -> Arc<VertexLayout> {
        Arc::new(VertexLayout {
            bindings: vec![
                VertexBinding {
                    binding: 0,
                    stride: 16,
                    instanced: false,
                },
                VertexBinding {
                    binding: 1,
                    stride: 4,
                    instanced: true,
                },
            ],
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    binding: 0,
                    size: 3,
                    ty: gl::FLOAT,
                    normalized: false,
                    integer: false,
                    offset: 4,
                },
                VertexAttribute {
                    location: 1,
                    binding: 1,
                    size: 4,
                    ty: gl::UNSIGNED_BYTE,
                    normalized: true,
                    integer: false,
                    offset: 0,
                },
            ],
        })
    }

    #[test]
    fn same_combination_same_entry() {
        let mut buffers = Arena::default();
        let mut pipelines = Arena::default();
        let vertex = buffers.push(buffer(10));
        let instance = buffers.push(buffer(11));
        let pipeline = pipelines.push(pipeline());
        let key = GeometryKey {
            pipeline,
            vertex: ArrayVec::from_iter([(0, vertex), (1, instance)]),
            index: None,
        };
        let layout = layout();
        let mut cache = GeometryCache::default();

        let first = cache.get_or_create(key.clone(), &layout, &buffers).unwrap();
        let second = cache.get_or_create(key.clone(), &layout, &buffers).unwrap();
        assert_eq!(first, second);
        assert_eq!(1, cache.len());

        buffers.remove(instance);
        assert!(cache.collect(&buffers, &pipelines).is_empty());
        assert!(cache.is_empty());
        let replacement = buffers.push(buffer(11));
        let key = GeometryKey {
            vertex: ArrayVec::from_iter([(0, vertex), (1, replacement)]),
            ..key
        };
        let third = cache.get_or_create(key, &layout, &buffers).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn vertex_array_is_built_once_per_context() {
        let mut buffers = Arena::default();
        let mut pipelines = Arena::default();
        let vertex = buffers.push(buffer(10));
        let instance = buffers.push(buffer(11));
        let index = buffers.push(buffer(12));
        let pipeline = pipelines.push(pipeline());
        let key = GeometryKey {
            pipeline,
            vertex: ArrayVec::from_iter([(0, vertex), (1, instance)]),
            index: Some(index),
        };
        let mut cache = GeometryCache::default();
        let handle = cache.get_or_create(key, &layout(), &buffers).unwrap();

        let log = Arc::new(CallLog::default());
        let gl = RecordingGl::with_log(log.clone());
        let mut state = ContextState::default();
        assert!(cache.bind(&gl, &mut state, ContextId(0), handle, &[32, 0]));
        assert!(cache.bind(&gl, &mut state, ContextId(0), handle, &[32, 0]));
        assert_eq!(1, log.count("create_vertex_array"));
        assert_eq!(1, log.count("bind_vertex_array"));
        let pointers = log.named("vertex_attrib_pointer");
        assert_eq!(2, pointers.len());
        assert_eq!(36.0, pointers[0].arg(6));
        assert_eq!(1, log.count("vertex_attrib_divisor"));

        log.clear();
        assert!(cache.bind(&gl, &mut state, ContextId(0), handle, &[96, 0]));
        assert_eq!(1, cache.len());
        assert_eq!(0, log.count("create_vertex_array"));
        let pointers = log.named("vertex_attrib_pointer");
        assert_eq!(1, pointers.len());
        assert_eq!(0.0, pointers[0].arg(0));
        assert_eq!(100.0, pointers[0].arg(6));

        pipelines.remove(pipeline);
        let released = cache.collect(&buffers, &pipelines);
        assert_eq!(1, released.len());
        assert_eq!(ContextId(0), released[0].0);
    }
}
