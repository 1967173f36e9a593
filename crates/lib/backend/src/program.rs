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

use std::collections::HashSet;

use ash::vk;
use log::debug;
use smol_str::SmolStr;

use crate::{
    translate, BackendError, BackendResult, Device, GlName, PipelineLayout, ShaderModuleHandle,
    SlotClass, MAX_PUSH_CONSTANTS_SIZE,
};

/// Type of a push constant member as the shader declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantFormat {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    UVec2,
    UVec3,
    UVec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Int,
    UInt,
}

impl ConstantFormat {
    pub fn kind(self) -> ScalarKind {
        match self {
            Self::Int | Self::IVec2 | Self::IVec3 | Self::IVec4 => ScalarKind::Int,
            Self::UInt | Self::UVec2 | Self::UVec3 | Self::UVec4 => ScalarKind::UInt,
            _ => ScalarKind::Float,
        }
    }

    /// Components of one element as uploaded to GL.
    pub fn components(self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::UInt => 1,
            Self::Vec2 | Self::IVec2 | Self::UVec2 => 2,
            Self::Vec3 | Self::IVec3 | Self::UVec3 => 3,
            Self::Vec4 | Self::IVec4 | Self::UVec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }

    pub fn columns(self) -> Option<u32> {
        match self {
            Self::Mat2 => Some(2),
            Self::Mat3 => Some(3),
            Self::Mat4 => Some(4),
            _ => None,
        }
    }

    /// Size of one element in the push constant block, std430 packing.
    pub fn size(self) -> u32 {
        match self {
            Self::Mat3 => 48,
            _ => self.components() * 4,
        }
    }

    /// Array stride in the push constant block.
    pub fn stride(self) -> u32 {
        match self {
            Self::Vec3 | Self::IVec3 | Self::UVec3 => 16,
            _ => self.size(),
        }
    }

    /// Bytes covered by `count` elements starting at the first one. `None` on overflow.
    pub fn extent(self, count: u32) -> Option<u32> {
        self.stride()
            .checked_mul(count.saturating_sub(1))?
            .checked_add(self.size())
    }

    /// Copies `count` elements starting at byte `offset` out of the push constant words,
    /// dropping the padding of `mat3` columns. `None` if the block is too short.
    pub(crate) fn pack(self, words: &[u32], offset: u32, count: u32) -> Option<Vec<u32>> {
        let mut result = Vec::with_capacity((self.components() * count) as usize);
        for element in 0..count {
            let base = ((offset + element * self.stride()) / 4) as usize;
            if self == Self::Mat3 {
                for column in 0..3 {
                    let start = base + column * 4;
                    result.extend_from_slice(words.get(start..start + 3)?);
                }
            } else {
                let end = base + self.components() as usize;
                result.extend_from_slice(words.get(base..end)?);
            }
        }

        Some(result)
    }
}

/// Kind of resource a named shader variable stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// `sampler*` uniform: combined samplers, sampled images, texel buffers and input
    /// attachments. Bound to texture units.
    Texture,
    /// `image*` uniform bound to an image unit.
    Image,
    UniformBlock,
    StorageBlock,
}

impl BindingKind {
    fn class(self) -> SlotClass {
        match self {
            Self::Texture => SlotClass::Texture,
            Self::Image => SlotClass::Image,
            Self::UniformBlock => SlotClass::UniformBuffer,
            Self::StorageBlock => SlotClass::StorageBuffer,
        }
    }
}

/// Name of a shader variable and the descriptor it reads from. GLSL for GL has no
/// descriptor sets, the table replaces `layout(set, binding)` qualifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderBinding {
    pub name: SmolStr,
    pub set: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Uniform standing in for a push constant block member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PushConstant {
    pub name: SmolStr,
    pub offset: u32,
    pub format: ConstantFormat,
    pub array_size: u32,
}

#[derive(Debug, Clone)]
pub struct ShaderModuleDesc<'a> {
    pub stage: vk::ShaderStageFlags,
    pub source: &'a str,
    pub bindings: Vec<ShaderBinding>,
    pub push_constants: Vec<PushConstant>,
}

impl<'a> ShaderModuleDesc<'a> {
    pub fn new(stage: vk::ShaderStageFlags, source: &'a str) -> Self {
        Self {
            stage,
            source,
            bindings: Vec::new(),
            push_constants: Vec::new(),
        }
    }

    pub fn vertex(source: &'a str) -> Self {
        Self::new(vk::ShaderStageFlags::VERTEX, source)
    }

    pub fn fragment(source: &'a str) -> Self {
        Self::new(vk::ShaderStageFlags::FRAGMENT, source)
    }

    pub fn compute(source: &'a str) -> Self {
        Self::new(vk::ShaderStageFlags::COMPUTE, source)
    }

    pub fn binding(mut self, name: &str, set: u32, binding: u32, kind: BindingKind) -> Self {
        self.bindings.push(ShaderBinding {
            name: name.into(),
            set,
            binding,
            kind,
        });
        self
    }

    pub fn texture(self, name: &str, set: u32, binding: u32) -> Self {
        self.binding(name, set, binding, BindingKind::Texture)
    }

    pub fn image(self, name: &str, set: u32, binding: u32) -> Self {
        self.binding(name, set, binding, BindingKind::Image)
    }

    pub fn uniform_block(self, name: &str, set: u32, binding: u32) -> Self {
        self.binding(name, set, binding, BindingKind::UniformBlock)
    }

    pub fn storage_block(self, name: &str, set: u32, binding: u32) -> Self {
        self.binding(name, set, binding, BindingKind::StorageBlock)
    }

    pub fn push_constant(self, name: &str, offset: u32, format: ConstantFormat) -> Self {
        self.push_array(name, offset, format, 1)
    }

    pub fn push_array(mut self, name: &str, offset: u32, format: ConstantFormat, count: u32) -> Self {
        self.push_constants.push(PushConstant {
            name: name.into(),
            offset,
            format,
            array_size: count.max(1),
        });
        self
    }
}

#[derive(Debug)]
pub struct ShaderModule {
    pub(crate) shader: GlName,
    pub(crate) compiled: bool,
    pub stage: vk::ShaderStageFlags,
    pub bindings: Vec<ShaderBinding>,
    pub push_constants: Vec<PushConstant>,
}

/// Push constant member resolved to a uniform location of a linked program.
#[derive(Debug, Clone, PartialEq)]
pub struct PushUniform {
    pub location: i32,
    pub offset: u32,
    pub format: ConstantFormat,
    pub array_size: u32,
    pub stages: vk::ShaderStageFlags,
}

impl PushUniform {
    pub fn range(&self) -> std::ops::Range<u32> {
        let end = self
            .format
            .extent(self.array_size)
            .and_then(|extent| self.offset.checked_add(extent))
            .unwrap_or(u32::MAX);

        self.offset..end
    }
}

#[derive(Debug)]
pub(crate) struct Program {
    pub name: GlName,
    pub push_constants: Vec<PushUniform>,
}

struct LinkInput {
    shader: GlName,
    stage: vk::ShaderStageFlags,
    compiled: bool,
    bindings: Vec<ShaderBinding>,
    push_constants: Vec<PushConstant>,
}

impl Device {
    pub fn create_shader_module(&self, desc: ShaderModuleDesc) -> BackendResult<ShaderModuleHandle> {
        let ty = translate::shader_stage(desc.stage)
            .ok_or_else(|| BackendError::NotSupported(format!("shader stage {:?}", desc.stage)))?;
        let supported = match ty {
            gl::COMPUTE_SHADER => self.caps().compute,
            gl::TESS_CONTROL_SHADER | gl::TESS_EVALUATION_SHADER => self.caps().tessellation,
            _ => true,
        };
        if !supported {
            return Err(BackendError::NotSupported(format!(
                "{:?} shaders on GL {}.{}",
                desc.stage,
                self.caps().version.0,
                self.caps().version.1
            )));
        }
        if let Some(constant) = desc.push_constants.iter().find(|constant| {
            constant.offset % 4 != 0
                || constant
                    .format
                    .extent(constant.array_size)
                    .and_then(|extent| constant.offset.checked_add(extent))
                    .map_or(true, |end| end > MAX_PUSH_CONSTANTS_SIZE)
        }) {
            return Err(BackendError::NotSupported(format!(
                "push constant {} at {} with {} elements doesn't fit in {} bytes",
                constant.name, constant.offset, constant.array_size, MAX_PUSH_CONSTANTS_SIZE
            )));
        }
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let shader = gl.create_shader(ty);
        gl.shader_source(shader, desc.source);
        let compiled = match gl.compile_shader(shader) {
            Ok(()) => true,
            Err(log) if self.validation() => {
                gl.delete_shader(shader);
                return Err(BackendError::ShaderCompilation {
                    stage: desc.stage,
                    log,
                });
            }
            Err(log) => {
                self.debug.error(&format!(
                    "{:?} shader compilation failed: {}",
                    desc.stage, log
                ));
                false
            }
        };
        drop(lock);

        Ok(self.shader_storage.write().push(ShaderModule {
            shader,
            compiled,
            stage: desc.stage,
            bindings: desc.bindings,
            push_constants: desc.push_constants,
        }))
    }

    pub fn destroy_shader_module(&self, handle: ShaderModuleHandle) {
        let Some(module) = self.shader_storage.write().remove(handle) else {
            return;
        };
        match self.main_context().lock() {
            Ok(lock) => lock.gl().delete_shader(module.shader),
            Err(err) => self
                .debug
                .error(&format!("Can't delete shader {}: {}", module.shader, err)),
        }
    }

    /// Links the stages and points every named resource at the binding point the layout
    /// gives it.
    pub(crate) fn link_program(
        &self,
        stages: &[ShaderModuleHandle],
        layout: &PipelineLayout,
    ) -> BackendResult<Program> {
        let modules = {
            let storage = self.shader_storage.read();
            stages
                .iter()
                .map(|handle| {
                    storage
                        .get(*handle)
                        .map(|module| LinkInput {
                            shader: module.shader,
                            stage: module.stage,
                            compiled: module.compiled,
                            bindings: module.bindings.clone(),
                            push_constants: module.push_constants.clone(),
                        })
                        .ok_or(BackendError::InvalidHandle("shader module"))
                })
                .collect::<BackendResult<Vec<_>>>()?
        };
        if modules.iter().any(|module| !module.compiled) {
            self.debug
                .warning("Linking a program out of a shader that failed to compile");
        }

        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let name = gl.create_program();
        modules
            .iter()
            .for_each(|module| gl.attach_shader(name, module.shader));
        let linked = gl.link_program(name);
        modules
            .iter()
            .for_each(|module| gl.detach_shader(name, module.shader));
        if let Err(log) = linked {
            if self.validation() {
                gl.delete_program(name);
                return Err(BackendError::ProgramLink(log));
            }
            self.debug.error(&format!("Program link failed: {}", log));
            return Ok(Program {
                name,
                push_constants: Vec::new(),
            });
        }

        let mut state = lock.state();
        state.use_program(gl, name);
        let mut seen = HashSet::new();
        for binding in modules.iter().flat_map(|module| module.bindings.iter()) {
            if !seen.insert(binding.name.clone()) {
                continue;
            }
            let Some(slot) = layout.slot(binding.set, binding.binding) else {
                self.debug.warning(&format!(
                    "{} uses set {} binding {} missing from the pipeline layout",
                    binding.name, binding.set, binding.binding
                ));
                continue;
            };
            if slot.class != binding.kind.class() {
                self.debug.error(&format!(
                    "{} is a {:?}, layout binding is {:?}",
                    binding.name, binding.kind, slot.ty
                ));
                continue;
            }
            match binding.kind {
                BindingKind::Texture | BindingKind::Image => {
                    match gl.get_uniform_location(name, &binding.name) {
                        Some(location) => {
                            let units = (slot.first..slot.first + slot.count)
                                .map(|unit| unit as i32)
                                .collect::<Vec<_>>();
                            gl.uniform_iv(location, 1, &units);
                        }
                        None => debug!("{} is not used by program {}", binding.name, name),
                    }
                }
                BindingKind::UniformBlock => match gl.get_uniform_block_index(name, &binding.name) {
                    Some(index) => gl.uniform_block_binding(name, index, slot.first),
                    None => debug!("{} is not used by program {}", binding.name, name),
                },
                BindingKind::StorageBlock => {
                    if !self.caps().storage_buffers {
                        self.debug.warning(&format!(
                            "Storage block {} needs GL 4.3, left unbound",
                            binding.name
                        ));
                        continue;
                    }
                    match gl.get_shader_storage_block_index(name, &binding.name) {
                        Some(index) => gl.shader_storage_block_binding(name, index, slot.first),
                        None => debug!("{} is not used by program {}", binding.name, name),
                    }
                }
            }
        }

        let mut push_constants: Vec<PushUniform> = Vec::new();
        for module in &modules {
            for constant in &module.push_constants {
                if let Some(uniform) = push_constants.iter_mut().find(|uniform| {
                    uniform.offset == constant.offset && uniform.format == constant.format
                }) {
                    uniform.stages |= module.stage;
                    continue;
                }
                match gl.get_uniform_location(name, &constant.name) {
                    Some(location) => push_constants.push(PushUniform {
                        location,
                        offset: constant.offset,
                        format: constant.format,
                        array_size: constant.array_size,
                        stages: module.stage,
                    }),
                    None => debug!("Push constant {} is not used by program {}", constant.name, name),
                }
            }
        }
        push_constants.sort_by_key(|uniform| uniform.offset);
        debug!("Program {} linked, {} push uniforms", name, push_constants.len());

        Ok(Program {
            name,
            push_constants,
        })
    }
}
