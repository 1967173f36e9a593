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

//! Recorded command encoding.
//!
//! Every [`Command`] variant has a fixed size payload. Variable sized data (uniform
//! values, draw buffer lists, blend state blocks, debug labels) lives in side tables of
//! the owning [`CommandList`] and is addressed by index, so the command sequence itself
//! stays a flat array.

use ash::vk;
use smol_str::SmolStr;

use crate::{
    ColorBlendState, ConstantFormat, DepthBias, DepthStencilState, DynamicStates,
    FramebufferHandle, GeometryHandle, GlEnum, GlName, ImageUnitBinding, InputAssemblyState,
    MemoryBarrierBits, MultisampleState, RasterizationState, Rect, TessellationState,
    TextureLocation, Viewport,
};

/// Range of a side table of a [`CommandList`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataRange {
    pub start: u32,
    pub len: u32,
}

impl DataRange {
    fn shifted(self, by: u32) -> Self {
        Self {
            start: self.start + by,
            len: self.len,
        }
    }

    fn as_range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.start + self.len) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearColor {
    Float([f32; 4]),
    Int([i32; 4]),
    UInt([u32; 4]),
}

impl ClearColor {
    /// Interprets a Vulkan clear value the way an attachment of the given integer class
    /// reads it. `None` stands for normalized and float formats.
    pub fn from_vk(value: &vk::ClearColorValue, integer: Option<bool>) -> Self {
        // SAFETY: every member of the union is a plain array of four 32-bit values.
        unsafe {
            match integer {
                Some(true) => Self::Int(value.int32),
                Some(false) => Self::UInt(value.uint32),
                None => Self::Float(value.float32),
            }
        }
    }
}

/// Blit, copy or clear target: one level of one layer of a texture, or the back buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRegion {
    pub location: TextureLocation,
    pub offset: [i32; 3],
    pub extent: [i32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    InputAssembly(InputAssemblyState),
    Rasterization {
        state: RasterizationState,
        dynamic: DynamicStates,
    },
    Multisample(MultisampleState),
    DepthStencil {
        state: DepthStencilState,
        dynamic: DynamicStates,
    },
    /// Index into the list's blend state table.
    ColorBlend {
        state: u32,
        dynamic: DynamicStates,
    },
    Tessellation(TessellationState),
    UseProgram(GlName),

    SetViewport {
        index: u32,
        viewport: Viewport,
    },
    SetScissor {
        index: u32,
        rect: Rect,
    },
    SetLineWidth(f32),
    SetDepthBias(DepthBias),
    SetBlendConstants([f32; 4]),
    SetStencilCompareMask {
        faces: vk::StencilFaceFlags,
        mask: u32,
    },
    SetStencilWriteMask {
        faces: vk::StencilFaceFlags,
        mask: u32,
    },
    SetStencilReference {
        faces: vk::StencilFaceFlags,
        reference: u32,
    },

    /// Binds the framebuffer object the context owns for this framebuffer.
    BindFramebuffer(FramebufferHandle),
    BindBackBuffer,
    /// Draw buffer enums in the list's enum table.
    DrawBuffers(DataRange),
    InvalidateFramebuffer(DataRange),
    ClearColor {
        draw_buffer: u32,
        value: ClearColor,
        area: Option<Rect>,
    },
    ClearDepth {
        depth: f32,
        area: Option<Rect>,
    },
    ClearStencil {
        stencil: u32,
        area: Option<Rect>,
    },
    ClearDepthStencil {
        depth: f32,
        stencil: u32,
        area: Option<Rect>,
    },
    ClearBackColor {
        value: [f32; 4],
        area: Option<Rect>,
    },
    ClearBackDepthStencil {
        depth: Option<f32>,
        stencil: Option<u32>,
        area: Option<Rect>,
    },

    BindTexture {
        unit: u32,
        target: GlEnum,
        texture: GlName,
    },
    BindSampler {
        unit: u32,
        sampler: GlName,
    },
    BindImageTexture {
        unit: u32,
        binding: ImageUnitBinding,
    },
    BindBufferRange {
        target: GlEnum,
        index: u32,
        buffer: GlName,
        offset: u64,
        size: u64,
    },
    /// Vertex array plus the offset of every vertex binding, two words each, low word first.
    BindGeometry {
        geometry: GeometryHandle,
        offsets: DataRange,
    },
    /// Push constant member. Values sit packed in the word table.
    Uniform {
        location: i32,
        format: ConstantFormat,
        count: u32,
        offset: u32,
        stages: vk::ShaderStageFlags,
        data: DataRange,
    },

    Draw {
        mode: GlEnum,
        first: u32,
        count: u32,
        instances: u32,
        first_instance: u32,
    },
    DrawIndexed {
        mode: GlEnum,
        index_type: GlEnum,
        offset: u64,
        count: u32,
        instances: u32,
        vertex_offset: i32,
        first_instance: u32,
        primitive_restart: bool,
    },
    DrawIndirect {
        mode: GlEnum,
        buffer: GlName,
        offset: u64,
        count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        mode: GlEnum,
        index_type: GlEnum,
        buffer: GlName,
        offset: u64,
        count: u32,
        stride: u32,
        primitive_restart: bool,
    },
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: GlName,
        offset: u64,
    },
    MemoryBarrier(MemoryBarrierBits),

    /// Framebuffer blit, used for blits and multisample resolves.
    BlitImage {
        src: TransferRegion,
        dst: TransferRegion,
        mask: u32,
        filter: GlEnum,
    },
    CopyImage {
        src: TransferRegion,
        dst: TransferRegion,
    },
    /// Copy through client memory for formats `glCopyImageSubData` can't handle.
    CopyImageViaHost {
        src: TransferRegion,
        dst: TransferRegion,
        upload_target: GlEnum,
    },
    CopyBuffer {
        src: GlName,
        dst: GlName,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        buffer: GlName,
        offset: u64,
        dst: TransferRegion,
        upload_target: GlEnum,
        row_length: u32,
        image_height: u32,
    },
    CopyImageToBuffer {
        src: TransferRegion,
        buffer: GlName,
        offset: u64,
        row_length: u32,
        image_height: u32,
    },
    UpdateBuffer {
        buffer: GlName,
        offset: u64,
        data: DataRange,
    },
    FillBuffer {
        buffer: GlName,
        offset: u64,
        size: u64,
        value: u32,
    },
    ClearImageColor {
        image: TextureLocation,
        value: ClearColor,
    },
    ClearImageDepthStencil {
        image: TextureLocation,
        depth: Option<f32>,
        stencil: Option<u32>,
    },

    PushDebugGroup(u32),
    PopDebugGroup,
}

/// Ordered command sequence plus the side tables its commands point into.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
    words: Vec<u32>,
    enums: Vec<GlEnum>,
    blend_states: Vec<ColorBlendState>,
    labels: Vec<SmolStr>,
}

impl CommandList {
    pub fn append(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn iter(&self) -> std::slice::Iter<Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.words.clear();
        self.enums.clear();
        self.blend_states.clear();
        self.labels.clear();
    }

    pub fn push_words(&mut self, words: &[u32]) -> DataRange {
        let start = self.words.len() as u32;
        self.words.extend_from_slice(words);
        DataRange {
            start,
            len: words.len() as u32,
        }
    }

    pub fn words(&self, range: DataRange) -> &[u32] {
        self.words.get(range.as_range()).unwrap_or_default()
    }

    pub fn push_offsets(&mut self, offsets: &[u64]) -> DataRange {
        let words = offsets
            .iter()
            .flat_map(|offset| [*offset as u32, (*offset >> 32) as u32])
            .collect::<Vec<_>>();
        self.push_words(&words)
    }

    pub fn offsets(&self, range: DataRange) -> impl Iterator<Item = u64> + '_ {
        self.words(range)
            .chunks_exact(2)
            .map(|pair| pair[0] as u64 | (pair[1] as u64) << 32)
    }

    pub fn push_enums(&mut self, values: &[GlEnum]) -> DataRange {
        let start = self.enums.len() as u32;
        self.enums.extend_from_slice(values);
        DataRange {
            start,
            len: values.len() as u32,
        }
    }

    pub fn enums(&self, range: DataRange) -> &[GlEnum] {
        self.enums.get(range.as_range()).unwrap_or_default()
    }

    pub fn push_blend_state(&mut self, state: ColorBlendState) -> u32 {
        self.blend_states.push(state);
        self.blend_states.len() as u32 - 1
    }

    pub fn blend_state(&self, index: u32) -> Option<&ColorBlendState> {
        self.blend_states.get(index as usize)
    }

    pub fn push_label(&mut self, label: &str) -> u32 {
        self.labels.push(label.into());
        self.labels.len() as u32 - 1
    }

    pub fn label(&self, index: u32) -> Option<&str> {
        self.labels.get(index as usize).map(SmolStr::as_str)
    }

    /// Appends every command of `other`, rebasing the side table references.
    pub fn extend_from(&mut self, other: &CommandList) {
        let words = self.words.len() as u32;
        let enums = self.enums.len() as u32;
        let blend_states = self.blend_states.len() as u32;
        let labels = self.labels.len() as u32;
        self.words.extend_from_slice(&other.words);
        self.enums.extend_from_slice(&other.enums);
        self.blend_states.extend(other.blend_states.iter().cloned());
        self.labels.extend(other.labels.iter().cloned());
        self.commands.extend(other.commands.iter().map(|command| match *command {
            Command::ColorBlend { state, dynamic } => Command::ColorBlend {
                state: state + blend_states,
                dynamic,
            },
            Command::DrawBuffers(range) => Command::DrawBuffers(range.shifted(enums)),
            Command::InvalidateFramebuffer(range) => {
                Command::InvalidateFramebuffer(range.shifted(enums))
            }
            Command::Uniform {
                location,
                format,
                count,
                offset,
                stages,
                data,
            } => Command::Uniform {
                location,
                format,
                count,
                offset,
                stages,
                data: data.shifted(words),
            },
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => Command::UpdateBuffer {
                buffer,
                offset,
                data: data.shifted(words),
            },
            Command::BindGeometry { geometry, offsets } => Command::BindGeometry {
                geometry,
                offsets: offsets.shifted(words),
            },
            Command::PushDebugGroup(label) => Command::PushDebugGroup(label + labels),
            command => command,
        }));
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
