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

use crate::GlEnum;

const COMPRESSED_RGB_S3TC_DXT1: GlEnum = 0x83F0;
const COMPRESSED_RGBA_S3TC_DXT1: GlEnum = 0x83F1;
const COMPRESSED_RGBA_S3TC_DXT3: GlEnum = 0x83F2;
const COMPRESSED_RGBA_S3TC_DXT5: GlEnum = 0x83F3;
const COMPRESSED_SRGB_S3TC_DXT1: GlEnum = 0x8C4C;
const COMPRESSED_SRGB_ALPHA_S3TC_DXT1: GlEnum = 0x8C4D;
const COMPRESSED_SRGB_ALPHA_S3TC_DXT3: GlEnum = 0x8C4E;
const COMPRESSED_SRGB_ALPHA_S3TC_DXT5: GlEnum = 0x8C4F;

/// How a Vulkan format is stored and transferred in GL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDesc {
    pub internal: GlEnum,
    pub format: GlEnum,
    pub ty: GlEnum,
    /// Texel block dimensions, `(1, 1)` for uncompressed formats.
    pub block: (u32, u32),
    /// Bytes per texel block.
    pub block_size: u32,
    pub aspects: vk::ImageAspectFlags,
}

impl FormatDesc {
    const fn color(internal: GlEnum, format: GlEnum, ty: GlEnum, size: u32) -> Self {
        Self {
            internal,
            format,
            ty,
            block: (1, 1),
            block_size: size,
            aspects: vk::ImageAspectFlags::COLOR,
        }
    }

    const fn depth(
        internal: GlEnum,
        format: GlEnum,
        ty: GlEnum,
        size: u32,
        aspects: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            internal,
            format,
            ty,
            block: (1, 1),
            block_size: size,
            aspects,
        }
    }

    const fn compressed(internal: GlEnum, format: GlEnum, size: u32) -> Self {
        Self {
            internal,
            format,
            ty: gl::UNSIGNED_BYTE,
            block: (4, 4),
            block_size: size,
            aspects: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.block != (1, 1)
    }

    pub fn has_depth(&self) -> bool {
        self.aspects.contains(vk::ImageAspectFlags::DEPTH)
    }

    pub fn has_stencil(&self) -> bool {
        self.aspects.contains(vk::ImageAspectFlags::STENCIL)
    }

    /// Framebuffer attachment point for this format.
    pub fn attachment(&self, color_index: u32) -> GlEnum {
        match (self.has_depth(), self.has_stencil()) {
            (true, true) => gl::DEPTH_STENCIL_ATTACHMENT,
            (true, false) => gl::DEPTH_ATTACHMENT,
            (false, true) => gl::STENCIL_ATTACHMENT,
            _ => gl::COLOR_ATTACHMENT0 + color_index,
        }
    }

    /// Bits for `glBlitFramebuffer` and `glClear`.
    pub fn buffer_mask(&self) -> u32 {
        let mut mask = 0;
        if self.aspects.contains(vk::ImageAspectFlags::COLOR) {
            mask |= gl::COLOR_BUFFER_BIT;
        }
        if self.has_depth() {
            mask |= gl::DEPTH_BUFFER_BIT;
        }
        if self.has_stencil() {
            mask |= gl::STENCIL_BUFFER_BIT;
        }
        mask
    }

    /// Bytes taken by a tightly packed region of the given texel extent.
    pub fn region_size(&self, width: u32, height: u32, depth: u32) -> u64 {
        let blocks_x = (width + self.block.0 - 1) / self.block.0;
        let blocks_y = (height + self.block.1 - 1) / self.block.1;
        blocks_x as u64 * blocks_y as u64 * depth as u64 * self.block_size as u64
    }

    /// Whether clear values for this format are integers, and signed ones.
    pub fn integer_class(&self) -> Option<bool> {
        match self.format {
            gl::RED_INTEGER | gl::RG_INTEGER | gl::RGB_INTEGER | gl::RGBA_INTEGER
            | gl::BGRA_INTEGER => Some(matches!(
                self.ty,
                gl::BYTE | gl::SHORT | gl::INT
            )),
            _ => None,
        }
    }
}

pub fn format_desc(format: vk::Format) -> Option<FormatDesc> {
    use vk::ImageAspectFlags as Aspect;
    use FormatDesc as F;

    let desc = match format {
        vk::Format::R8_UNORM => F::color(gl::R8, gl::RED, gl::UNSIGNED_BYTE, 1),
        vk::Format::R8_SNORM => F::color(gl::R8_SNORM, gl::RED, gl::BYTE, 1),
        vk::Format::R8_UINT => F::color(gl::R8UI, gl::RED_INTEGER, gl::UNSIGNED_BYTE, 1),
        vk::Format::R8_SINT => F::color(gl::R8I, gl::RED_INTEGER, gl::BYTE, 1),
        vk::Format::R8G8_UNORM => F::color(gl::RG8, gl::RG, gl::UNSIGNED_BYTE, 2),
        vk::Format::R8G8_SNORM => F::color(gl::RG8_SNORM, gl::RG, gl::BYTE, 2),
        vk::Format::R8G8_UINT => F::color(gl::RG8UI, gl::RG_INTEGER, gl::UNSIGNED_BYTE, 2),
        vk::Format::R8G8_SINT => F::color(gl::RG8I, gl::RG_INTEGER, gl::BYTE, 2),
        vk::Format::R8G8B8_UNORM => F::color(gl::RGB8, gl::RGB, gl::UNSIGNED_BYTE, 3),
        vk::Format::R8G8B8_SRGB => F::color(gl::SRGB8, gl::RGB, gl::UNSIGNED_BYTE, 3),
        vk::Format::B8G8R8_UNORM => F::color(gl::RGB8, gl::BGR, gl::UNSIGNED_BYTE, 3),
        vk::Format::R8G8B8A8_UNORM => F::color(gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE, 4),
        vk::Format::R8G8B8A8_SNORM => F::color(gl::RGBA8_SNORM, gl::RGBA, gl::BYTE, 4),
        vk::Format::R8G8B8A8_UINT => {
            F::color(gl::RGBA8UI, gl::RGBA_INTEGER, gl::UNSIGNED_BYTE, 4)
        }
        vk::Format::R8G8B8A8_SINT => F::color(gl::RGBA8I, gl::RGBA_INTEGER, gl::BYTE, 4),
        vk::Format::R8G8B8A8_SRGB => {
            F::color(gl::SRGB8_ALPHA8, gl::RGBA, gl::UNSIGNED_BYTE, 4)
        }
        vk::Format::B8G8R8A8_UNORM => F::color(gl::RGBA8, gl::BGRA, gl::UNSIGNED_BYTE, 4),
        vk::Format::B8G8R8A8_SRGB => {
            F::color(gl::SRGB8_ALPHA8, gl::BGRA, gl::UNSIGNED_BYTE, 4)
        }
        vk::Format::A8B8G8R8_UNORM_PACK32 => {
            F::color(gl::RGBA8, gl::RGBA, gl::UNSIGNED_INT_8_8_8_8_REV, 4)
        }
        vk::Format::A2B10G10R10_UNORM_PACK32 => {
            F::color(gl::RGB10_A2, gl::RGBA, gl::UNSIGNED_INT_2_10_10_10_REV, 4)
        }
        vk::Format::A2B10G10R10_UINT_PACK32 => F::color(
            gl::RGB10_A2UI,
            gl::RGBA_INTEGER,
            gl::UNSIGNED_INT_2_10_10_10_REV,
            4,
        ),
        vk::Format::B10G11R11_UFLOAT_PACK32 => F::color(
            gl::R11F_G11F_B10F,
            gl::RGB,
            gl::UNSIGNED_INT_10F_11F_11F_REV,
            4,
        ),
        vk::Format::E5B9G9R9_UFLOAT_PACK32 => {
            F::color(gl::RGB9_E5, gl::RGB, gl::UNSIGNED_INT_5_9_9_9_REV, 4)
        }
        vk::Format::R5G6B5_UNORM_PACK16 => {
            F::color(gl::RGB565, gl::RGB, gl::UNSIGNED_SHORT_5_6_5, 2)
        }
        vk::Format::R4G4B4A4_UNORM_PACK16 => {
            F::color(gl::RGBA4, gl::RGBA, gl::UNSIGNED_SHORT_4_4_4_4, 2)
        }
        vk::Format::R5G5B5A1_UNORM_PACK16 => {
            F::color(gl::RGB5_A1, gl::RGBA, gl::UNSIGNED_SHORT_5_5_5_1, 2)
        }
        vk::Format::R16_UNORM => F::color(gl::R16, gl::RED, gl::UNSIGNED_SHORT, 2),
        vk::Format::R16_SNORM => F::color(gl::R16_SNORM, gl::RED, gl::SHORT, 2),
        vk::Format::R16_UINT => F::color(gl::R16UI, gl::RED_INTEGER, gl::UNSIGNED_SHORT, 2),
        vk::Format::R16_SINT => F::color(gl::R16I, gl::RED_INTEGER, gl::SHORT, 2),
        vk::Format::R16_SFLOAT => F::color(gl::R16F, gl::RED, gl::HALF_FLOAT, 2),
        vk::Format::R16G16_UNORM => F::color(gl::RG16, gl::RG, gl::UNSIGNED_SHORT, 4),
        vk::Format::R16G16_SNORM => F::color(gl::RG16_SNORM, gl::RG, gl::SHORT, 4),
        vk::Format::R16G16_UINT => {
            F::color(gl::RG16UI, gl::RG_INTEGER, gl::UNSIGNED_SHORT, 4)
        }
        vk::Format::R16G16_SINT => F::color(gl::RG16I, gl::RG_INTEGER, gl::SHORT, 4),
        vk::Format::R16G16_SFLOAT => F::color(gl::RG16F, gl::RG, gl::HALF_FLOAT, 4),
        vk::Format::R16G16B16A16_UNORM => {
            F::color(gl::RGBA16, gl::RGBA, gl::UNSIGNED_SHORT, 8)
        }
        vk::Format::R16G16B16A16_SNORM => F::color(gl::RGBA16_SNORM, gl::RGBA, gl::SHORT, 8),
        vk::Format::R16G16B16A16_UINT => {
            F::color(gl::RGBA16UI, gl::RGBA_INTEGER, gl::UNSIGNED_SHORT, 8)
        }
        vk::Format::R16G16B16A16_SINT => {
            F::color(gl::RGBA16I, gl::RGBA_INTEGER, gl::SHORT, 8)
        }
        vk::Format::R16G16B16A16_SFLOAT => {
            F::color(gl::RGBA16F, gl::RGBA, gl::HALF_FLOAT, 8)
        }
        vk::Format::R32_UINT => F::color(gl::R32UI, gl::RED_INTEGER, gl::UNSIGNED_INT, 4),
        vk::Format::R32_SINT => F::color(gl::R32I, gl::RED_INTEGER, gl::INT, 4),
        vk::Format::R32_SFLOAT => F::color(gl::R32F, gl::RED, gl::FLOAT, 4),
        vk::Format::R32G32_UINT => F::color(gl::RG32UI, gl::RG_INTEGER, gl::UNSIGNED_INT, 8),
        vk::Format::R32G32_SINT => F::color(gl::RG32I, gl::RG_INTEGER, gl::INT, 8),
        vk::Format::R32G32_SFLOAT => F::color(gl::RG32F, gl::RG, gl::FLOAT, 8),
        vk::Format::R32G32B32_UINT => {
            F::color(gl::RGB32UI, gl::RGB_INTEGER, gl::UNSIGNED_INT, 12)
        }
        vk::Format::R32G32B32_SINT => F::color(gl::RGB32I, gl::RGB_INTEGER, gl::INT, 12),
        vk::Format::R32G32B32_SFLOAT => F::color(gl::RGB32F, gl::RGB, gl::FLOAT, 12),
        vk::Format::R32G32B32A32_UINT => {
            F::color(gl::RGBA32UI, gl::RGBA_INTEGER, gl::UNSIGNED_INT, 16)
        }
        vk::Format::R32G32B32A32_SINT => {
            F::color(gl::RGBA32I, gl::RGBA_INTEGER, gl::INT, 16)
        }
        vk::Format::R32G32B32A32_SFLOAT => F::color(gl::RGBA32F, gl::RGBA, gl::FLOAT, 16),
        vk::Format::D16_UNORM => F::depth(
            gl::DEPTH_COMPONENT16,
            gl::DEPTH_COMPONENT,
            gl::UNSIGNED_SHORT,
            2,
            Aspect::DEPTH,
        ),
        vk::Format::X8_D24_UNORM_PACK32 => F::depth(
            gl::DEPTH_COMPONENT24,
            gl::DEPTH_COMPONENT,
            gl::UNSIGNED_INT,
            4,
            Aspect::DEPTH,
        ),
        vk::Format::D32_SFLOAT => F::depth(
            gl::DEPTH_COMPONENT32F,
            gl::DEPTH_COMPONENT,
            gl::FLOAT,
            4,
            Aspect::DEPTH,
        ),
        vk::Format::S8_UINT => F::depth(
            gl::STENCIL_INDEX8,
            gl::STENCIL_INDEX,
            gl::UNSIGNED_BYTE,
            1,
            Aspect::STENCIL,
        ),
        vk::Format::D24_UNORM_S8_UINT => F::depth(
            gl::DEPTH24_STENCIL8,
            gl::DEPTH_STENCIL,
            gl::UNSIGNED_INT_24_8,
            4,
            Aspect::DEPTH | Aspect::STENCIL,
        ),
        vk::Format::D32_SFLOAT_S8_UINT => F::depth(
            gl::DEPTH32F_STENCIL8,
            gl::DEPTH_STENCIL,
            gl::FLOAT_32_UNSIGNED_INT_24_8_REV,
            8,
            Aspect::DEPTH | Aspect::STENCIL,
        ),
        vk::Format::BC1_RGB_UNORM_BLOCK => F::compressed(COMPRESSED_RGB_S3TC_DXT1, gl::RGB, 8),
        vk::Format::BC1_RGB_SRGB_BLOCK => F::compressed(COMPRESSED_SRGB_S3TC_DXT1, gl::RGB, 8),
        vk::Format::BC1_RGBA_UNORM_BLOCK => {
            F::compressed(COMPRESSED_RGBA_S3TC_DXT1, gl::RGBA, 8)
        }
        vk::Format::BC1_RGBA_SRGB_BLOCK => {
            F::compressed(COMPRESSED_SRGB_ALPHA_S3TC_DXT1, gl::RGBA, 8)
        }
        vk::Format::BC2_UNORM_BLOCK => F::compressed(COMPRESSED_RGBA_S3TC_DXT3, gl::RGBA, 16),
        vk::Format::BC2_SRGB_BLOCK => {
            F::compressed(COMPRESSED_SRGB_ALPHA_S3TC_DXT3, gl::RGBA, 16)
        }
        vk::Format::BC3_UNORM_BLOCK => F::compressed(COMPRESSED_RGBA_S3TC_DXT5, gl::RGBA, 16),
        vk::Format::BC3_SRGB_BLOCK => {
            F::compressed(COMPRESSED_SRGB_ALPHA_S3TC_DXT5, gl::RGBA, 16)
        }
        vk::Format::BC4_UNORM_BLOCK => F::compressed(gl::COMPRESSED_RED_RGTC1, gl::RED, 8),
        vk::Format::BC4_SNORM_BLOCK => {
            F::compressed(gl::COMPRESSED_SIGNED_RED_RGTC1, gl::RED, 8)
        }
        vk::Format::BC5_UNORM_BLOCK => F::compressed(gl::COMPRESSED_RG_RGTC2, gl::RG, 16),
        vk::Format::BC5_SNORM_BLOCK => {
            F::compressed(gl::COMPRESSED_SIGNED_RG_RGTC2, gl::RG, 16)
        }
        vk::Format::BC6H_UFLOAT_BLOCK => {
            F::compressed(gl::COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT, gl::RGB, 16)
        }
        vk::Format::BC6H_SFLOAT_BLOCK => {
            F::compressed(gl::COMPRESSED_RGB_BPTC_SIGNED_FLOAT, gl::RGB, 16)
        }
        vk::Format::BC7_UNORM_BLOCK => {
            F::compressed(gl::COMPRESSED_RGBA_BPTC_UNORM, gl::RGBA, 16)
        }
        vk::Format::BC7_SRGB_BLOCK => {
            F::compressed(gl::COMPRESSED_SRGB_ALPHA_BPTC_UNORM, gl::RGBA, 16)
        }
        vk::Format::ETC2_R8G8B8_UNORM_BLOCK => {
            F::compressed(gl::COMPRESSED_RGB8_ETC2, gl::RGB, 8)
        }
        vk::Format::ETC2_R8G8B8_SRGB_BLOCK => {
            F::compressed(gl::COMPRESSED_SRGB8_ETC2, gl::RGB, 8)
        }
        vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK => {
            F::compressed(gl::COMPRESSED_RGBA8_ETC2_EAC, gl::RGBA, 16)
        }
        vk::Format::ETC2_R8G8B8A8_SRGB_BLOCK => {
            F::compressed(gl::COMPRESSED_SRGB8_ALPHA8_ETC2_EAC, gl::RGBA, 16)
        }
        _ => return None,
    };

    Some(desc)
}

/// Vertex attribute layout: component count, component type, normalized, integer.
pub fn vertex_format(format: vk::Format) -> Option<(i32, GlEnum, bool, bool)> {
    let layout = match format {
        vk::Format::R32_SFLOAT => (1, gl::FLOAT, false, false),
        vk::Format::R32G32_SFLOAT => (2, gl::FLOAT, false, false),
        vk::Format::R32G32B32_SFLOAT => (3, gl::FLOAT, false, false),
        vk::Format::R32G32B32A32_SFLOAT => (4, gl::FLOAT, false, false),
        vk::Format::R16G16_SFLOAT => (2, gl::HALF_FLOAT, false, false),
        vk::Format::R16G16B16A16_SFLOAT => (4, gl::HALF_FLOAT, false, false),
        vk::Format::R32_UINT => (1, gl::UNSIGNED_INT, false, true),
        vk::Format::R32G32_UINT => (2, gl::UNSIGNED_INT, false, true),
        vk::Format::R32G32B32_UINT => (3, gl::UNSIGNED_INT, false, true),
        vk::Format::R32G32B32A32_UINT => (4, gl::UNSIGNED_INT, false, true),
        vk::Format::R32_SINT => (1, gl::INT, false, true),
        vk::Format::R32G32_SINT => (2, gl::INT, false, true),
        vk::Format::R32G32B32_SINT => (3, gl::INT, false, true),
        vk::Format::R32G32B32A32_SINT => (4, gl::INT, false, true),
        vk::Format::R8G8B8A8_UNORM => (4, gl::UNSIGNED_BYTE, true, false),
        vk::Format::R8G8B8A8_SNORM => (4, gl::BYTE, true, false),
        vk::Format::R8G8B8A8_UINT => (4, gl::UNSIGNED_BYTE, false, true),
        vk::Format::R8G8B8A8_SINT => (4, gl::BYTE, false, true),
        vk::Format::R8G8_UNORM => (2, gl::UNSIGNED_BYTE, true, false),
        vk::Format::R16G16_UNORM => (2, gl::UNSIGNED_SHORT, true, false),
        vk::Format::R16G16_SNORM => (2, gl::SHORT, true, false),
        vk::Format::R16G16B16A16_UNORM => (4, gl::UNSIGNED_SHORT, true, false),
        vk::Format::R16G16B16A16_SNORM => (4, gl::SHORT, true, false),
        vk::Format::R16G16B16A16_UINT => (4, gl::UNSIGNED_SHORT, false, true),
        vk::Format::R16G16B16A16_SINT => (4, gl::SHORT, false, true),
        vk::Format::A2B10G10R10_UNORM_PACK32 => {
            (4, gl::UNSIGNED_INT_2_10_10_10_REV, true, false)
        }
        _ => return None,
    };

    Some(layout)
}

#[cfg(test)]
mod test {
    use ash::vk;

    use super::{format_desc, vertex_format};

    #[test]
    fn color_formats() {
        let desc = format_desc(vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(gl::SRGB8_ALPHA8, desc.internal);
        assert_eq!(gl::BGRA, desc.format);
        assert_eq!(gl::COLOR_ATTACHMENT0 + 2, desc.attachment(2));
        assert_eq!(None, desc.integer_class());
        assert_eq!(
            Some(false),
            format_desc(vk::Format::R32_UINT).unwrap().integer_class()
        );
    }

    #[test]
    fn depth_formats() {
        let desc = format_desc(vk::Format::D24_UNORM_S8_UINT).unwrap();
        assert_eq!(gl::DEPTH_STENCIL_ATTACHMENT, desc.attachment(0));
        assert_eq!(
            gl::DEPTH_BUFFER_BIT | gl::STENCIL_BUFFER_BIT,
            desc.buffer_mask()
        );
    }

    #[test]
    fn compressed_sizes() {
        let desc = format_desc(vk::Format::BC1_RGBA_UNORM_BLOCK).unwrap();
        assert!(desc.is_compressed());
        assert_eq!(8 * 4 * 4, desc.region_size(16, 14, 1));
        assert_eq!(
            64 * 4,
            format_desc(vk::Format::R8G8B8A8_UNORM)
                .unwrap()
                .region_size(8, 8, 1)
        );
    }

    #[test]
    fn vertex_layouts() {
        assert_eq!(
            Some((3, gl::FLOAT, false, false)),
            vertex_format(vk::Format::R32G32B32_SFLOAT)
        );
        assert_eq!(None, vertex_format(vk::Format::D32_SFLOAT));
    }
}
