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

//! Pipeline barriers expressed as `glMemoryBarrier` bits.
//!
//! GL has no image layouts and no per-stage execution dependencies. The best it offers is
//! making incoherent writes visible to a class of consumers, so a barrier turns into the
//! union of consumer classes touched by its stages and target layouts. The mapping is an
//! approximation and errs on the side of extra bits.

use ash::vk;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
    pub struct MemoryBarrierBits: u32 {
        const VertexAttribArray = gl::VERTEX_ATTRIB_ARRAY_BARRIER_BIT;
        const ElementArray = gl::ELEMENT_ARRAY_BARRIER_BIT;
        const Uniform = gl::UNIFORM_BARRIER_BIT;
        const TextureFetch = gl::TEXTURE_FETCH_BARRIER_BIT;
        const ShaderImageAccess = gl::SHADER_IMAGE_ACCESS_BARRIER_BIT;
        const Command = gl::COMMAND_BARRIER_BIT;
        const PixelBuffer = gl::PIXEL_BUFFER_BARRIER_BIT;
        const TextureUpdate = gl::TEXTURE_UPDATE_BARRIER_BIT;
        const BufferUpdate = gl::BUFFER_UPDATE_BARRIER_BIT;
        const Framebuffer = gl::FRAMEBUFFER_BARRIER_BIT;
        const TransformFeedback = gl::TRANSFORM_FEEDBACK_BARRIER_BIT;
        const AtomicCounter = gl::ATOMIC_COUNTER_BARRIER_BIT;
        const ShaderStorage = gl::SHADER_STORAGE_BARRIER_BIT;
        const ClientMappedBuffer = gl::CLIENT_MAPPED_BUFFER_BARRIER_BIT;
        const QueryBuffer = gl::QUERY_BUFFER_BARRIER_BIT;
        const All = gl::ALL_BARRIER_BITS;
    }
}

const SHADER_RESOURCES: MemoryBarrierBits = MemoryBarrierBits::Uniform
    .union(MemoryBarrierBits::TextureFetch)
    .union(MemoryBarrierBits::ShaderImageAccess)
    .union(MemoryBarrierBits::ShaderStorage);

/// Bits for a single pipeline stage.
fn stage_bits(stage: vk::PipelineStageFlags) -> MemoryBarrierBits {
    match stage {
        vk::PipelineStageFlags::DRAW_INDIRECT => MemoryBarrierBits::Command,
        vk::PipelineStageFlags::VERTEX_INPUT => {
            MemoryBarrierBits::VertexAttribArray | MemoryBarrierBits::ElementArray
        }
        vk::PipelineStageFlags::VERTEX_SHADER => {
            MemoryBarrierBits::VertexAttribArray
                | MemoryBarrierBits::ElementArray
                | MemoryBarrierBits::Uniform
        }
        vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
        | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
        | vk::PipelineStageFlags::GEOMETRY_SHADER => SHADER_RESOURCES,
        vk::PipelineStageFlags::FRAGMENT_SHADER => {
            MemoryBarrierBits::TextureFetch | MemoryBarrierBits::Uniform
        }
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT => MemoryBarrierBits::Framebuffer,
        vk::PipelineStageFlags::COMPUTE_SHADER => {
            SHADER_RESOURCES | MemoryBarrierBits::AtomicCounter
        }
        vk::PipelineStageFlags::TRANSFER => {
            MemoryBarrierBits::TextureUpdate
                | MemoryBarrierBits::BufferUpdate
                | MemoryBarrierBits::PixelBuffer
        }
        vk::PipelineStageFlags::HOST => {
            MemoryBarrierBits::ClientMappedBuffer | MemoryBarrierBits::BufferUpdate
        }
        vk::PipelineStageFlags::TRANSFORM_FEEDBACK_EXT => MemoryBarrierBits::TransformFeedback,
        vk::PipelineStageFlags::ALL_GRAPHICS | vk::PipelineStageFlags::ALL_COMMANDS => {
            MemoryBarrierBits::All
        }
        _ => MemoryBarrierBits::empty(),
    }
}

/// Union of the bits of every stage in `stages`.
pub fn stage_barrier_bits(stages: vk::PipelineStageFlags) -> MemoryBarrierBits {
    (0..u32::BITS)
        .map(|bit| vk::PipelineStageFlags::from_raw(1 << bit))
        .filter(|stage| stages.contains(*stage))
        .fold(MemoryBarrierBits::empty(), |bits, stage| bits | stage_bits(stage))
}

/// Consumers implied by the layout an image moves into.
pub fn layout_barrier_bits(layout: vk::ImageLayout) -> MemoryBarrierBits {
    match layout {
        vk::ImageLayout::GENERAL => {
            MemoryBarrierBits::ShaderImageAccess | MemoryBarrierBits::TextureFetch
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL => MemoryBarrierBits::Framebuffer,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL => MemoryBarrierBits::TextureFetch,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            MemoryBarrierBits::TextureUpdate | MemoryBarrierBits::PixelBuffer
        }
        vk::ImageLayout::PRESENT_SRC_KHR => MemoryBarrierBits::Framebuffer,
        _ => MemoryBarrierBits::empty(),
    }
}

/// Barrier bits for a whole `cmd_pipeline_barrier`.
pub fn pipeline_barrier_bits(
    src: vk::PipelineStageFlags,
    dst: vk::PipelineStageFlags,
    image_layouts: impl IntoIterator<Item = vk::ImageLayout>,
) -> MemoryBarrierBits {
    image_layouts
        .into_iter()
        .fold(stage_barrier_bits(src | dst), |bits, layout| {
            bits | layout_barrier_bits(layout)
        })
}
