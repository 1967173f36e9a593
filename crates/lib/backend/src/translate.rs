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

//! Vulkan enum values to their GL counterparts.

use ash::vk;

use crate::GlEnum;

pub fn compare_op(op: vk::CompareOp) -> GlEnum {
    match op {
        vk::CompareOp::NEVER => gl::NEVER,
        vk::CompareOp::LESS => gl::LESS,
        vk::CompareOp::EQUAL => gl::EQUAL,
        vk::CompareOp::LESS_OR_EQUAL => gl::LEQUAL,
        vk::CompareOp::GREATER => gl::GREATER,
        vk::CompareOp::NOT_EQUAL => gl::NOTEQUAL,
        vk::CompareOp::GREATER_OR_EQUAL => gl::GEQUAL,
        _ => gl::ALWAYS,
    }
}

pub fn stencil_op(op: vk::StencilOp) -> GlEnum {
    match op {
        vk::StencilOp::ZERO => gl::ZERO,
        vk::StencilOp::REPLACE => gl::REPLACE,
        vk::StencilOp::INCREMENT_AND_CLAMP => gl::INCR,
        vk::StencilOp::DECREMENT_AND_CLAMP => gl::DECR,
        vk::StencilOp::INVERT => gl::INVERT,
        vk::StencilOp::INCREMENT_AND_WRAP => gl::INCR_WRAP,
        vk::StencilOp::DECREMENT_AND_WRAP => gl::DECR_WRAP,
        _ => gl::KEEP,
    }
}

pub fn blend_factor(factor: vk::BlendFactor) -> GlEnum {
    match factor {
        vk::BlendFactor::ZERO => gl::ZERO,
        vk::BlendFactor::ONE => gl::ONE,
        vk::BlendFactor::SRC_COLOR => gl::SRC_COLOR,
        vk::BlendFactor::ONE_MINUS_SRC_COLOR => gl::ONE_MINUS_SRC_COLOR,
        vk::BlendFactor::DST_COLOR => gl::DST_COLOR,
        vk::BlendFactor::ONE_MINUS_DST_COLOR => gl::ONE_MINUS_DST_COLOR,
        vk::BlendFactor::SRC_ALPHA => gl::SRC_ALPHA,
        vk::BlendFactor::ONE_MINUS_SRC_ALPHA => gl::ONE_MINUS_SRC_ALPHA,
        vk::BlendFactor::DST_ALPHA => gl::DST_ALPHA,
        vk::BlendFactor::ONE_MINUS_DST_ALPHA => gl::ONE_MINUS_DST_ALPHA,
        vk::BlendFactor::CONSTANT_COLOR => gl::CONSTANT_COLOR,
        vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR => gl::ONE_MINUS_CONSTANT_COLOR,
        vk::BlendFactor::CONSTANT_ALPHA => gl::CONSTANT_ALPHA,
        vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA => gl::ONE_MINUS_CONSTANT_ALPHA,
        vk::BlendFactor::SRC_ALPHA_SATURATE => gl::SRC_ALPHA_SATURATE,
        vk::BlendFactor::SRC1_COLOR => gl::SRC1_COLOR,
        vk::BlendFactor::ONE_MINUS_SRC1_COLOR => gl::ONE_MINUS_SRC1_COLOR,
        vk::BlendFactor::SRC1_ALPHA => gl::SRC1_ALPHA,
        vk::BlendFactor::ONE_MINUS_SRC1_ALPHA => gl::ONE_MINUS_SRC1_ALPHA,
        _ => gl::ONE,
    }
}

pub fn blend_op(op: vk::BlendOp) -> GlEnum {
    match op {
        vk::BlendOp::SUBTRACT => gl::FUNC_SUBTRACT,
        vk::BlendOp::REVERSE_SUBTRACT => gl::FUNC_REVERSE_SUBTRACT,
        vk::BlendOp::MIN => gl::MIN,
        vk::BlendOp::MAX => gl::MAX,
        _ => gl::FUNC_ADD,
    }
}

pub fn logic_op(op: vk::LogicOp) -> GlEnum {
    match op {
        vk::LogicOp::CLEAR => gl::CLEAR,
        vk::LogicOp::AND => gl::AND,
        vk::LogicOp::AND_REVERSE => gl::AND_REVERSE,
        vk::LogicOp::AND_INVERTED => gl::AND_INVERTED,
        vk::LogicOp::NO_OP => gl::NOOP,
        vk::LogicOp::XOR => gl::XOR,
        vk::LogicOp::OR => gl::OR,
        vk::LogicOp::NOR => gl::NOR,
        vk::LogicOp::EQUIVALENT => gl::EQUIV,
        vk::LogicOp::INVERT => gl::INVERT,
        vk::LogicOp::OR_REVERSE => gl::OR_REVERSE,
        vk::LogicOp::COPY_INVERTED => gl::COPY_INVERTED,
        vk::LogicOp::OR_INVERTED => gl::OR_INVERTED,
        vk::LogicOp::NAND => gl::NAND,
        vk::LogicOp::SET => gl::SET,
        _ => gl::COPY,
    }
}

pub fn polygon_mode(mode: vk::PolygonMode) -> GlEnum {
    match mode {
        vk::PolygonMode::LINE => gl::LINE,
        vk::PolygonMode::POINT => gl::POINT,
        _ => gl::FILL,
    }
}

/// `None` when culling is disabled.
pub fn cull_mode(mode: vk::CullModeFlags) -> Option<GlEnum> {
    if mode == vk::CullModeFlags::FRONT_AND_BACK {
        Some(gl::FRONT_AND_BACK)
    } else if mode.contains(vk::CullModeFlags::FRONT) {
        Some(gl::FRONT)
    } else if mode.contains(vk::CullModeFlags::BACK) {
        Some(gl::BACK)
    } else {
        None
    }
}

pub fn front_face(face: vk::FrontFace) -> GlEnum {
    match face {
        vk::FrontFace::CLOCKWISE => gl::CW,
        _ => gl::CCW,
    }
}

pub fn primitive_topology(topology: vk::PrimitiveTopology) -> GlEnum {
    match topology {
        vk::PrimitiveTopology::POINT_LIST => gl::POINTS,
        vk::PrimitiveTopology::LINE_LIST => gl::LINES,
        vk::PrimitiveTopology::LINE_STRIP => gl::LINE_STRIP,
        vk::PrimitiveTopology::TRIANGLE_STRIP => gl::TRIANGLE_STRIP,
        vk::PrimitiveTopology::TRIANGLE_FAN => gl::TRIANGLE_FAN,
        vk::PrimitiveTopology::LINE_LIST_WITH_ADJACENCY => gl::LINES_ADJACENCY,
        vk::PrimitiveTopology::LINE_STRIP_WITH_ADJACENCY => gl::LINE_STRIP_ADJACENCY,
        vk::PrimitiveTopology::TRIANGLE_LIST_WITH_ADJACENCY => gl::TRIANGLES_ADJACENCY,
        vk::PrimitiveTopology::TRIANGLE_STRIP_WITH_ADJACENCY => gl::TRIANGLE_STRIP_ADJACENCY,
        vk::PrimitiveTopology::PATCH_LIST => gl::PATCHES,
        _ => gl::TRIANGLES,
    }
}

/// Index type and index size in bytes.
pub fn index_type(ty: vk::IndexType) -> (GlEnum, u64) {
    match ty {
        vk::IndexType::UINT16 => (gl::UNSIGNED_SHORT, 2),
        vk::IndexType::UINT8_EXT => (gl::UNSIGNED_BYTE, 1),
        _ => (gl::UNSIGNED_INT, 4),
    }
}

pub fn filter(filter: vk::Filter) -> GlEnum {
    match filter {
        vk::Filter::NEAREST => gl::NEAREST,
        _ => gl::LINEAR,
    }
}

pub fn min_filter(filter: vk::Filter, mipmap: vk::SamplerMipmapMode, mipmapped: bool) -> GlEnum {
    match (filter, mipmapped, mipmap) {
        (vk::Filter::NEAREST, false, _) => gl::NEAREST,
        (_, false, _) => gl::LINEAR,
        (vk::Filter::NEAREST, true, vk::SamplerMipmapMode::NEAREST) => gl::NEAREST_MIPMAP_NEAREST,
        (vk::Filter::NEAREST, true, _) => gl::NEAREST_MIPMAP_LINEAR,
        (_, true, vk::SamplerMipmapMode::NEAREST) => gl::LINEAR_MIPMAP_NEAREST,
        (_, true, _) => gl::LINEAR_MIPMAP_LINEAR,
    }
}

pub fn address_mode(mode: vk::SamplerAddressMode) -> GlEnum {
    match mode {
        vk::SamplerAddressMode::MIRRORED_REPEAT => gl::MIRRORED_REPEAT,
        vk::SamplerAddressMode::CLAMP_TO_EDGE => gl::CLAMP_TO_EDGE,
        vk::SamplerAddressMode::CLAMP_TO_BORDER => gl::CLAMP_TO_BORDER,
        vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE => gl::MIRROR_CLAMP_TO_EDGE,
        _ => gl::REPEAT,
    }
}

pub fn border_color(color: vk::BorderColor) -> [f32; 4] {
    match color {
        vk::BorderColor::FLOAT_OPAQUE_BLACK | vk::BorderColor::INT_OPAQUE_BLACK => {
            [0.0, 0.0, 0.0, 1.0]
        }
        vk::BorderColor::FLOAT_OPAQUE_WHITE | vk::BorderColor::INT_OPAQUE_WHITE => [1.0; 4],
        _ => [0.0; 4],
    }
}

pub fn shader_stage(stage: vk::ShaderStageFlags) -> Option<GlEnum> {
    match stage {
        vk::ShaderStageFlags::VERTEX => Some(gl::VERTEX_SHADER),
        vk::ShaderStageFlags::TESSELLATION_CONTROL => Some(gl::TESS_CONTROL_SHADER),
        vk::ShaderStageFlags::TESSELLATION_EVALUATION => Some(gl::TESS_EVALUATION_SHADER),
        vk::ShaderStageFlags::GEOMETRY => Some(gl::GEOMETRY_SHADER),
        vk::ShaderStageFlags::FRAGMENT => Some(gl::FRAGMENT_SHADER),
        vk::ShaderStageFlags::COMPUTE => Some(gl::COMPUTE_SHADER),
        _ => None,
    }
}

pub fn image_access(access: vk::AccessFlags) -> GlEnum {
    let read = access.intersects(vk::AccessFlags::SHADER_READ);
    let write = access.intersects(vk::AccessFlags::SHADER_WRITE);
    match (read, write) {
        (true, false) => gl::READ_ONLY,
        (false, true) => gl::WRITE_ONLY,
        _ => gl::READ_WRITE,
    }
}

#[cfg(test)]
mod test {
    use ash::vk;

    use super::*;

    #[test]
    fn cull_modes() {
        assert_eq!(None, cull_mode(vk::CullModeFlags::NONE));
        assert_eq!(Some(gl::BACK), cull_mode(vk::CullModeFlags::BACK));
        assert_eq!(
            Some(gl::FRONT_AND_BACK),
            cull_mode(vk::CullModeFlags::FRONT_AND_BACK)
        );
    }

    #[test]
    fn min_filters() {
        assert_eq!(
            gl::LINEAR,
            min_filter(vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR, false)
        );
        assert_eq!(
            gl::NEAREST_MIPMAP_LINEAR,
            min_filter(vk::Filter::NEAREST, vk::SamplerMipmapMode::LINEAR, true)
        );
        assert_eq!(
            gl::LINEAR_MIPMAP_NEAREST,
            min_filter(vk::Filter::LINEAR, vk::SamplerMipmapMode::NEAREST, true)
        );
    }

    #[test]
    fn index_sizes() {
        assert_eq!((gl::UNSIGNED_SHORT, 2), index_type(vk::IndexType::UINT16));
        assert_eq!((gl::UNSIGNED_INT, 4), index_type(vk::IndexType::UINT32));
    }
}
