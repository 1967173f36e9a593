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

use std::collections::BTreeMap;

use ash::vk;

use crate::{
    format_desc, BackendError, BackendResult, BufferHandle, BufferViewHandle, Capabilities,
    Command, CommandList, DebugReporter, DescriptorSetHandle, DescriptorSetLayoutHandle, Device,
    GlEnum, GlName, ImageUnitBinding, ImageViewHandle, SamplerHandle,
};

/// GL binding point namespace a descriptor type lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotClass {
    Texture,
    Image,
    UniformBuffer,
    StorageBuffer,
}

pub(crate) fn slot_class(ty: vk::DescriptorType) -> Option<SlotClass> {
    match ty {
        vk::DescriptorType::SAMPLER
        | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        | vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::UNIFORM_TEXEL_BUFFER
        | vk::DescriptorType::INPUT_ATTACHMENT => Some(SlotClass::Texture),
        vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
            Some(SlotClass::Image)
        }
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
            Some(SlotClass::UniformBuffer)
        }
        vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
            Some(SlotClass::StorageBuffer)
        }
        _ => None,
    }
}

pub(crate) fn is_dynamic(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

/// First GL binding point and number of consecutive points given to one layout binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub class: SlotClass,
    pub ty: vk::DescriptorType,
    pub first: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl From<vk::DescriptorSetLayoutBinding> for DescriptorBinding {
    fn from(value: vk::DescriptorSetLayoutBinding) -> Self {
        Self {
            binding: value.binding,
            ty: value.descriptor_type,
            count: value.descriptor_count,
            stages: value.stage_flags,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    pub fn binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            ty,
            count,
            stages,
        });
        self
    }
}

#[derive(Debug)]
pub struct DescriptorSetLayout {
    /// Sorted by binding number.
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings
            .binary_search_by_key(&binding, |desc| desc.binding)
            .ok()
            .map(|index| &self.bindings[index])
    }

    /// Dynamic offsets a bind of this set consumes.
    pub fn dynamic_count(&self) -> u32 {
        self.bindings
            .iter()
            .filter(|binding| is_dynamic(binding.ty))
            .map(|binding| binding.count)
            .sum()
    }
}

/// Descriptor resolved to GL names at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Descriptor {
    Sampler(GlName),
    Texture {
        target: GlEnum,
        texture: GlName,
        sampler: Option<GlName>,
    },
    Image(ImageUnitBinding),
    Buffer {
        buffer: GlName,
        offset: u64,
        size: u64,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct DescriptorArray {
    pub ty: vk::DescriptorType,
    pub descriptors: Vec<Option<Descriptor>>,
}

#[derive(Debug)]
pub struct DescriptorSet {
    pub layout: DescriptorSetLayoutHandle,
    pub(crate) bindings: BTreeMap<u32, DescriptorArray>,
}

impl DescriptorSet {
    /// Turns every written descriptor into bind commands, bindings in ascending order.
    /// Dynamic buffers take the next value of `dynamic_offsets` each.
    pub(crate) fn resolve(
        &self,
        slots: &[(u32, BindingSlot)],
        dynamic_offsets: &mut impl Iterator<Item = u32>,
        caps: &Capabilities,
        debug: &DebugReporter,
        commands: &mut CommandList,
    ) {
        for (binding, slot) in slots {
            let array = self.bindings.get(binding);
            for element in 0..slot.count {
                let dynamic_offset = if is_dynamic(slot.ty) {
                    dynamic_offsets.next().unwrap_or(0) as u64
                } else {
                    0
                };
                let Some(descriptor) = array
                    .and_then(|array| array.descriptors.get(element as usize))
                    .copied()
                    .flatten()
                else {
                    continue;
                };
                let unit = slot.first + element;
                match descriptor {
                    Descriptor::Sampler(sampler) => {
                        commands.append(Command::BindSampler { unit, sampler })
                    }
                    Descriptor::Texture {
                        target,
                        texture,
                        sampler,
                    } => {
                        commands.append(Command::BindTexture {
                            unit,
                            target,
                            texture,
                        });
                        if let Some(sampler) = sampler {
                            commands.append(Command::BindSampler { unit, sampler });
                        }
                    }
                    Descriptor::Image(binding) => {
                        if caps.image_load_store {
                            commands.append(Command::BindImageTexture { unit, binding });
                        } else {
                            debug.error("Storage images need GL 4.2, binding skipped");
                        }
                    }
                    Descriptor::Buffer {
                        buffer,
                        offset,
                        size,
                    } => {
                        let target = match slot.class {
                            SlotClass::StorageBuffer if caps.storage_buffers => {
                                gl::SHADER_STORAGE_BUFFER
                            }
                            SlotClass::StorageBuffer => {
                                debug.error("Storage buffers need GL 4.3, binding skipped");
                                continue;
                            }
                            _ => gl::UNIFORM_BUFFER,
                        };
                        commands.append(Command::BindBufferRange {
                            target,
                            index: unit,
                            buffer,
                            offset: offset + dynamic_offset,
                            size,
                        });
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorImageInfo {
    pub sampler: Option<SamplerHandle>,
    pub view: Option<ImageViewHandle>,
}

impl DescriptorImageInfo {
    pub fn combined(view: ImageViewHandle, sampler: SamplerHandle) -> Self {
        Self {
            sampler: Some(sampler),
            view: Some(view),
        }
    }

    pub fn view(view: ImageViewHandle) -> Self {
        Self {
            sampler: None,
            view: Some(view),
        }
    }

    pub fn sampler(sampler: SamplerHandle) -> Self {
        Self {
            sampler: Some(sampler),
            view: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBufferInfo {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub range: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorWriteData {
    Images(Vec<DescriptorImageInfo>),
    Buffers(Vec<DescriptorBufferInfo>),
    TexelBuffers(Vec<BufferViewHandle>),
}

impl DescriptorWriteData {
    fn len(&self) -> usize {
        match self {
            Self::Images(infos) => infos.len(),
            Self::Buffers(infos) => infos.len(),
            Self::TexelBuffers(views) => views.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDescriptorSet {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub array_element: u32,
    pub ty: vk::DescriptorType,
    pub data: DescriptorWriteData,
}

impl WriteDescriptorSet {
    pub fn images(
        set: DescriptorSetHandle,
        binding: u32,
        ty: vk::DescriptorType,
        infos: &[DescriptorImageInfo],
    ) -> Self {
        Self {
            set,
            binding,
            array_element: 0,
            ty,
            data: DescriptorWriteData::Images(infos.to_vec()),
        }
    }

    pub fn buffers(
        set: DescriptorSetHandle,
        binding: u32,
        ty: vk::DescriptorType,
        infos: &[DescriptorBufferInfo],
    ) -> Self {
        Self {
            set,
            binding,
            array_element: 0,
            ty,
            data: DescriptorWriteData::Buffers(infos.to_vec()),
        }
    }

    pub fn texel_buffers(
        set: DescriptorSetHandle,
        binding: u32,
        ty: vk::DescriptorType,
        views: &[BufferViewHandle],
    ) -> Self {
        Self {
            set,
            binding,
            array_element: 0,
            ty,
            data: DescriptorWriteData::TexelBuffers(views.to_vec()),
        }
    }

    pub fn array_element(mut self, value: u32) -> Self {
        self.array_element = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyDescriptorSet {
    pub src_set: DescriptorSetHandle,
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_set: DescriptorSetHandle,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub count: u32,
}

/// Writes `values` starting at `binding[element]`, spilling into the following bindings
/// of the same type once an array is full.
fn store(
    set: &mut DescriptorSet,
    mut binding: u32,
    mut element: u32,
    values: impl IntoIterator<Item = Option<Descriptor>>,
    debug: &DebugReporter,
) {
    let ty = set.bindings.get(&binding).map(|array| array.ty);
    for value in values {
        loop {
            let Some(array) = set.bindings.get_mut(&binding) else {
                debug.error(&format!("Descriptor write past binding {}", binding));
                return;
            };
            if Some(array.ty) != ty {
                debug.error(&format!(
                    "Descriptor write spills into binding {} of another type",
                    binding
                ));
                return;
            }
            if let Some(slot) = array.descriptors.get_mut(element as usize) {
                *slot = value;
                element += 1;
                break;
            }
            let next = set.bindings.range(binding + 1..).next().map(|(next, _)| *next);
            match next {
                Some(next) => {
                    binding = next;
                    element = 0;
                }
                None => {
                    debug.error("Descriptor write past the last binding");
                    return;
                }
            }
        }
    }
}

impl Device {
    pub fn create_descriptor_set_layout(
        &self,
        desc: DescriptorSetLayoutDesc,
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let mut bindings = desc
            .bindings
            .into_iter()
            .filter(|binding| {
                let supported = slot_class(binding.ty).is_some();
                if !supported {
                    self.debug.error(&format!(
                        "Descriptor type {:?} has no GL equivalent, binding {} skipped",
                        binding.ty, binding.binding
                    ));
                }
                supported
            })
            .collect::<Vec<_>>();
        bindings.sort_by_key(|binding| binding.binding);
        if bindings
            .windows(2)
            .any(|pair| pair[0].binding == pair[1].binding)
        {
            return Err(BackendError::InvalidState("duplicate descriptor binding"));
        }

        Ok(self
            .set_layout_storage
            .write()
            .push(DescriptorSetLayout { bindings }))
    }

    pub fn destroy_descriptor_set_layout(&self, handle: DescriptorSetLayoutHandle) {
        self.set_layout_storage.write().remove(handle);
    }

    pub fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let bindings = self
            .set_layout_storage
            .read()
            .get(layout)
            .map(|layout| {
                layout
                    .bindings
                    .iter()
                    .map(|binding| {
                        (
                            binding.binding,
                            DescriptorArray {
                                ty: binding.ty,
                                descriptors: vec![None; binding.count as usize],
                            },
                        )
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .ok_or(BackendError::InvalidHandle("descriptor set layout"))?;

        Ok(self
            .descriptor_storage
            .write()
            .push(DescriptorSet { layout, bindings }))
    }

    pub fn free_descriptor_set(&self, handle: DescriptorSetHandle) {
        self.descriptor_storage.write().remove(handle);
    }

    /// Applies the writes, then the copies. Problems are reported and the offending
    /// write is skipped.
    pub fn update_descriptor_sets(&self, writes: &[WriteDescriptorSet], copies: &[CopyDescriptorSet]) {
        let resolved = writes
            .iter()
            .filter_map(|write| {
                self.resolve_write(write)
                    .map(|descriptors| (write.set, write.binding, write.array_element, write.ty, descriptors))
            })
            .collect::<Vec<_>>();

        let mut storage = self.descriptor_storage.write();
        for (handle, binding, element, ty, descriptors) in resolved {
            let Some(set) = storage.get_mut(handle) else {
                self.debug.error("Descriptor write into a freed set");
                continue;
            };
            match set.bindings.get(&binding) {
                Some(array) if array.ty == ty => {
                    store(set, binding, element, descriptors, &self.debug)
                }
                Some(array) => self.debug.error(&format!(
                    "Binding {} holds {:?}, write of {:?} skipped",
                    binding, array.ty, ty
                )),
                None => self
                    .debug
                    .error(&format!("Descriptor set has no binding {}", binding)),
            }
        }
        for copy in copies {
            let source = storage.get(copy.src_set).and_then(|set| {
                let array = set.bindings.get(&copy.src_binding)?;
                let start = copy.src_array_element as usize;
                array
                    .descriptors
                    .get(start..start + copy.count as usize)
                    .map(<[_]>::to_vec)
            });
            let Some(source) = source else {
                self.debug.error("Descriptor copy reads out of range");
                continue;
            };
            match storage.get_mut(copy.dst_set) {
                Some(set) => store(
                    set,
                    copy.dst_binding,
                    copy.dst_array_element,
                    source,
                    &self.debug,
                ),
                None => self.debug.error("Descriptor copy into a freed set"),
            }
        }
    }

    fn resolve_write(&self, write: &WriteDescriptorSet) -> Option<Vec<Option<Descriptor>>> {
        let ty = write.ty;
        let descriptors = match (&write.data, slot_class(ty)) {
            (_, None) => {
                self.debug
                    .error(&format!("Descriptor type {:?} has no GL equivalent", ty));
                return None;
            }
            (DescriptorWriteData::Images(infos), Some(SlotClass::Texture | SlotClass::Image))
                if ty != vk::DescriptorType::UNIFORM_TEXEL_BUFFER
                    && ty != vk::DescriptorType::STORAGE_TEXEL_BUFFER =>
            {
                let views = self.image_view_storage.read();
                let samplers = self.sampler_storage.read();
                infos
                    .iter()
                    .map(|info| {
                        let view = info.view.and_then(|view| views.get(view));
                        let sampler = info
                            .sampler
                            .and_then(|sampler| samplers.get(sampler))
                            .map(|sampler| sampler.name);
                        match (ty, view, sampler) {
                            (vk::DescriptorType::SAMPLER, _, Some(sampler)) => {
                                Some(Descriptor::Sampler(sampler))
                            }
                            (vk::DescriptorType::STORAGE_IMAGE, Some(view), _) => {
                                let location = view.location();
                                Some(Descriptor::Image(ImageUnitBinding {
                                    texture: location.texture,
                                    level: location.level,
                                    layered: view.layer_count > 1
                                        || view.target == gl::TEXTURE_3D,
                                    layer: location.layer,
                                    access: gl::READ_WRITE,
                                    format: view.format.internal,
                                }))
                            }
                            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, Some(view), None) => {
                                self.debug.error("Combined image sampler without a sampler");
                                Some(Descriptor::Texture {
                                    target: view.target,
                                    texture: view.texture,
                                    sampler: None,
                                })
                            }
                            (vk::DescriptorType::SAMPLER, _, None) => {
                                self.debug.error("Sampler descriptor with an invalid sampler");
                                None
                            }
                            (_, Some(view), sampler) => Some(Descriptor::Texture {
                                target: view.target,
                                texture: view.texture,
                                sampler: sampler
                                    .filter(|_| ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
                            }),
                            (_, None, _) => {
                                self.debug.error("Image descriptor with an invalid view");
                                None
                            }
                        }
                    })
                    .collect()
            }
            (
                DescriptorWriteData::Buffers(infos),
                Some(SlotClass::UniformBuffer | SlotClass::StorageBuffer),
            ) => {
                let buffers = self.buffer_storage.read();
                infos
                    .iter()
                    .map(|info| {
                        let Some(buffer) = buffers.get(info.buffer) else {
                            self.debug.error("Buffer descriptor with an invalid buffer");
                            return None;
                        };
                        let size = if info.range == vk::WHOLE_SIZE {
                            buffer.desc.size.saturating_sub(info.offset)
                        } else {
                            info.range
                        };
                        Some(Descriptor::Buffer {
                            buffer: buffer.name,
                            offset: info.offset,
                            size,
                        })
                    })
                    .collect()
            }
            (DescriptorWriteData::TexelBuffers(handles), Some(class)) => {
                let views = self.buffer_view_storage.read();
                handles
                    .iter()
                    .map(|handle| {
                        let Some(view) = views.get(*handle) else {
                            self.debug.error("Texel buffer descriptor with an invalid view");
                            return None;
                        };
                        if class == SlotClass::Image {
                            let format = format_desc(view.format)
                                .map(|format| format.internal)
                                .unwrap_or(gl::R32F);
                            Some(Descriptor::Image(ImageUnitBinding {
                                texture: view.texture,
                                level: 0,
                                layered: false,
                                layer: 0,
                                access: gl::READ_WRITE,
                                format,
                            }))
                        } else {
                            Some(Descriptor::Texture {
                                target: gl::TEXTURE_BUFFER,
                                texture: view.texture,
                                sampler: None,
                            })
                        }
                    })
                    .collect()
            }
            (data, _) => {
                self.debug.error(&format!(
                    "Descriptor write of {:?} carries {} mismatched entries",
                    ty,
                    data.len()
                ));
                return None;
            }
        };

        Some(descriptors)
    }
}
