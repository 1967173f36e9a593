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
use log::debug;

use crate::{
    format_desc, BackendError, BackendResult, Device, FormatDesc, GlEnum, GlName, ImageHandle,
    ImageViewHandle, SharedObject,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub flags: vk::ImageCreateFlags,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    pub fn new(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            flags: vk::ImageCreateFlags::empty(),
            usage: vk::ImageUsageFlags::empty(),
        }
    }

    pub fn texture(format: vk::Format, width: u32, height: u32) -> Self {
        Self::new(format, width, height)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
    }

    pub fn cubemap(format: vk::Format, size: u32) -> Self {
        let mut desc = Self::texture(format, size, size).array_layers(6);
        desc.flags = vk::ImageCreateFlags::CUBE_COMPATIBLE;
        desc
    }

    pub fn color_attachment(format: vk::Format, width: u32, height: u32) -> Self {
        Self::new(format, width, height).usage(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )
    }

    pub fn depth_stencil_attachment(format: vk::Format, width: u32, height: u32) -> Self {
        Self::new(format, width, height).usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    pub fn image_type(mut self, value: vk::ImageType) -> Self {
        self.image_type = value;
        self
    }

    pub fn depth(mut self, value: u32) -> Self {
        self.extent.depth = value;
        self
    }

    pub fn mip_levels(mut self, value: u32) -> Self {
        self.mip_levels = value.max(1);
        self
    }

    pub fn array_layers(mut self, value: u32) -> Self {
        self.array_layers = value.max(1);
        self
    }

    pub fn samples(mut self, value: vk::SampleCountFlags) -> Self {
        self.samples = value;
        self
    }

    pub fn usage(mut self, value: vk::ImageUsageFlags) -> Self {
        self.usage = value;
        self
    }

    fn target(&self) -> GlEnum {
        let multisampled = self.samples.as_raw() > 1;
        let arrayed = self.array_layers > 1;
        match self.image_type {
            vk::ImageType::TYPE_1D if arrayed => gl::TEXTURE_1D_ARRAY,
            vk::ImageType::TYPE_1D => gl::TEXTURE_1D,
            vk::ImageType::TYPE_3D => gl::TEXTURE_3D,
            _ if multisampled && arrayed => gl::TEXTURE_2D_MULTISAMPLE_ARRAY,
            _ if multisampled => gl::TEXTURE_2D_MULTISAMPLE,
            _ if self.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
                && self.array_layers == 6 =>
            {
                gl::TEXTURE_CUBE_MAP
            }
            _ if self.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
                && self.array_layers % 6 == 0 =>
            {
                gl::TEXTURE_CUBE_MAP_ARRAY
            }
            _ if arrayed => gl::TEXTURE_2D_ARRAY,
            _ => gl::TEXTURE_2D,
        }
    }

    /// Storage extent in the shape `glTexStorage*` expects for `target`.
    fn storage_extent(&self, target: GlEnum) -> [i32; 3] {
        let vk::Extent3D {
            width,
            height,
            depth,
        } = self.extent;
        let layers = self.array_layers;
        let extent = match target {
            gl::TEXTURE_1D => [width, 1, 1],
            gl::TEXTURE_1D_ARRAY => [width, layers, 1],
            gl::TEXTURE_2D_ARRAY
            | gl::TEXTURE_2D_MULTISAMPLE_ARRAY
            | gl::TEXTURE_CUBE_MAP_ARRAY => [width, height, layers],
            gl::TEXTURE_3D => [width, height, depth],
            _ => [width, height, 1],
        };

        extent.map(|value| value as i32)
    }
}

#[derive(Debug)]
pub struct Image {
    pub(crate) name: GlName,
    pub(crate) target: GlEnum,
    pub(crate) format: FormatDesc,
    pub desc: ImageDesc,
}

pub(crate) fn level_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    let shrink = |value: u32| (value >> level).max(1);
    vk::Extent3D {
        width: shrink(extent.width),
        height: shrink(extent.height),
        depth: shrink(extent.depth),
    }
}

impl Image {
    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        level_extent(self.desc.extent, level)
    }

    pub(crate) fn location(&self, level: u32, layer: u32) -> TextureLocation {
        TextureLocation {
            texture: self.name,
            target: self.target,
            format: self.format,
            level,
            layer,
        }
    }

    /// Cube faces are uploaded through their own face targets.
    pub(crate) fn upload_target(&self, layer: u32) -> GlEnum {
        match self.target {
            gl::TEXTURE_CUBE_MAP => gl::TEXTURE_CUBE_MAP_POSITIVE_X + layer % 6,
            target => target,
        }
    }
}

/// One mip level of one layer of a texture, as addressed by transfer commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureLocation {
    pub texture: GlName,
    pub target: GlEnum,
    pub format: FormatDesc,
    pub level: u32,
    pub layer: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub image: ImageHandle,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub components: vk::ComponentMapping,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl ImageViewDesc {
    /// View over every level and layer of `image`.
    pub fn new(image: ImageHandle, view_type: vk::ImageViewType, format: vk::Format) -> Self {
        let aspect_mask = format_desc(format)
            .map(|format| format.aspects)
            .unwrap_or(vk::ImageAspectFlags::COLOR);
        Self {
            image,
            view_type,
            format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
        }
    }

    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.subresource_range.aspect_mask = aspect;
        self
    }

    pub fn levels(mut self, base: u32, count: u32) -> Self {
        self.subresource_range.base_mip_level = base;
        self.subresource_range.level_count = count;
        self
    }

    pub fn layers(mut self, base: u32, count: u32) -> Self {
        self.subresource_range.base_array_layer = base;
        self.subresource_range.layer_count = count;
        self
    }

    pub fn components(mut self, components: vk::ComponentMapping) -> Self {
        self.components = components;
        self
    }
}

#[derive(Debug)]
pub struct ImageView {
    pub(crate) texture: GlName,
    pub(crate) target: GlEnum,
    pub(crate) format: FormatDesc,
    /// The view has its own texture name instead of aliasing the image.
    owned: bool,
    pub image: ImageHandle,
    pub base_level: u32,
    pub level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub extent: vk::Extent3D,
    pub samples: vk::SampleCountFlags,
}

impl ImageView {
    /// Location of the view's first level for attachments and resolves. Owned views start
    /// at their own level zero.
    pub(crate) fn location(&self) -> TextureLocation {
        let (level, layer) = if self.owned {
            (0, 0)
        } else {
            (self.base_level, self.base_layer)
        };
        TextureLocation {
            texture: self.texture,
            target: self.target,
            format: self.format,
            level,
            layer,
        }
    }
}

fn view_target(view_type: vk::ImageViewType, samples: vk::SampleCountFlags) -> GlEnum {
    let multisampled = samples.as_raw() > 1;
    match view_type {
        vk::ImageViewType::TYPE_1D => gl::TEXTURE_1D,
        vk::ImageViewType::TYPE_1D_ARRAY => gl::TEXTURE_1D_ARRAY,
        vk::ImageViewType::TYPE_2D_ARRAY if multisampled => gl::TEXTURE_2D_MULTISAMPLE_ARRAY,
        vk::ImageViewType::TYPE_2D_ARRAY => gl::TEXTURE_2D_ARRAY,
        vk::ImageViewType::TYPE_3D => gl::TEXTURE_3D,
        vk::ImageViewType::CUBE => gl::TEXTURE_CUBE_MAP,
        vk::ImageViewType::CUBE_ARRAY => gl::TEXTURE_CUBE_MAP_ARRAY,
        _ if multisampled => gl::TEXTURE_2D_MULTISAMPLE,
        _ => gl::TEXTURE_2D,
    }
}

fn swizzle(component: vk::ComponentSwizzle, identity: GlEnum) -> GlEnum {
    match component {
        vk::ComponentSwizzle::ZERO => gl::ZERO,
        vk::ComponentSwizzle::ONE => gl::ONE,
        vk::ComponentSwizzle::R => gl::RED,
        vk::ComponentSwizzle::G => gl::GREEN,
        vk::ComponentSwizzle::B => gl::BLUE,
        vk::ComponentSwizzle::A => gl::ALPHA,
        _ => identity,
    }
}

fn remaining(count: u32, total: u32, base: u32) -> u32 {
    if count == vk::REMAINING_MIP_LEVELS {
        total.saturating_sub(base)
    } else {
        count
    }
}

impl Device {
    pub fn create_image(&self, desc: ImageDesc) -> BackendResult<ImageHandle> {
        let format = format_desc(desc.format)
            .ok_or_else(|| BackendError::NotSupported(format!("format {:?}", desc.format)))?;
        let target = desc.target();
        if matches!(
            target,
            gl::TEXTURE_CUBE_MAP_ARRAY | gl::TEXTURE_2D_MULTISAMPLE_ARRAY
        ) && self.caps().version < (4, 0)
        {
            return Err(BackendError::NotSupported(format!(
                "{:?} image with {} layers",
                desc.image_type, desc.array_layers
            )));
        }
        let extent = desc.storage_extent(target);
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let name = gl.create_texture();
        lock.state().bind_texture_for_update(gl, target, name);
        let samples = desc.samples.as_raw();
        if samples > 1 {
            gl.tex_storage_multisample(target, samples, format.internal, extent);
        } else {
            gl.tex_storage(
                target,
                desc.mip_levels,
                format.internal,
                format.format,
                format.ty,
                extent,
            );
        }
        if gl.get_error() == gl::OUT_OF_MEMORY {
            lock.state().texture_deleted(name);
            gl.delete_texture(name);
            return Err(BackendError::OutOfDeviceMemory);
        }
        drop(lock);
        debug!("Image {} created: {:?}", name, desc);

        Ok(self.image_storage.write().push(Image {
            name,
            target,
            format,
            desc,
        }))
    }

    pub fn destroy_image(&self, handle: ImageHandle) {
        if let Some(image) = self.image_storage.write().remove(handle) {
            self.delete_shared(SharedObject::Texture(image.name));
        }
    }

    pub fn image_desc(&self, handle: ImageHandle) -> BackendResult<ImageDesc> {
        self.image_storage
            .read()
            .get(handle)
            .map(|image| image.desc)
            .ok_or(BackendError::InvalidHandle("image"))
    }

    pub fn create_image_view(&self, desc: ImageViewDesc) -> BackendResult<ImageViewHandle> {
        let format = format_desc(desc.format)
            .ok_or_else(|| BackendError::NotSupported(format!("format {:?}", desc.format)))?;
        let (image_name, image_target, image_format, image_desc) = self
            .image_storage
            .read()
            .get(desc.image)
            .map(|image| (image.name, image.target, image.format, image.desc))
            .ok_or(BackendError::InvalidHandle("image"))?;
        let range = desc.subresource_range;
        let level_count = remaining(range.level_count, image_desc.mip_levels, range.base_mip_level);
        let layer_count = remaining(
            range.layer_count,
            image_desc.array_layers,
            range.base_array_layer,
        );
        let target = view_target(desc.view_type, image_desc.samples);
        let whole = range.base_mip_level == 0
            && level_count == image_desc.mip_levels
            && range.base_array_layer == 0
            && layer_count == image_desc.array_layers
            && target == image_target
            && format.internal == image_format.internal;
        let components = desc.components;
        let identity = [components.r, components.g, components.b, components.a]
            .iter()
            .all(|component| *component == vk::ComponentSwizzle::IDENTITY);
        let stencil_only =
            range.aspect_mask == vk::ImageAspectFlags::STENCIL && image_format.has_depth();
        let needs_view = !whole || !identity || stencil_only;

        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let (texture, target, owned) = if needs_view && self.caps().texture_view {
            let view = gl.create_texture();
            gl.texture_view(
                view,
                target,
                image_name,
                format.internal,
                range.base_mip_level,
                level_count,
                range.base_array_layer,
                layer_count,
            );
            let mut state = lock.state();
            state.bind_texture_for_update(gl, target, view);
            if !identity {
                let channels = [
                    (gl::TEXTURE_SWIZZLE_R, desc.components.r, gl::RED),
                    (gl::TEXTURE_SWIZZLE_G, desc.components.g, gl::GREEN),
                    (gl::TEXTURE_SWIZZLE_B, desc.components.b, gl::BLUE),
                    (gl::TEXTURE_SWIZZLE_A, desc.components.a, gl::ALPHA),
                ];
                for (pname, component, identity) in channels {
                    gl.tex_parameter_i(target, pname, swizzle(component, identity) as i32);
                }
            }
            if stencil_only {
                gl.tex_parameter_i(
                    target,
                    gl::DEPTH_STENCIL_TEXTURE_MODE,
                    gl::STENCIL_INDEX as i32,
                );
            }
            (view, target, true)
        } else {
            if needs_view {
                self.debug.warning(&format!(
                    "Texture views need GL 4.3, view of image {} covers the whole image",
                    image_name
                ));
            }
            (image_name, image_target, false)
        };
        drop(lock);

        let view = ImageView {
            texture,
            target,
            format,
            owned,
            image: desc.image,
            base_level: range.base_mip_level,
            level_count,
            base_layer: range.base_array_layer,
            layer_count,
            extent: level_extent(image_desc.extent, range.base_mip_level),
            samples: image_desc.samples,
        };

        Ok(self.image_view_storage.write().push(view))
    }

    pub fn destroy_image_view(&self, handle: ImageViewHandle) {
        let Some(view) = self.image_view_storage.write().remove(handle) else {
            return;
        };
        if view.owned {
            self.delete_shared(SharedObject::Texture(view.texture));
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ash::vk;

    use crate::{
        testing::{CallLog, RecordingContext},
        Capabilities, Device, DeviceDesc, ImageDesc, ImageViewDesc,
    };

    fn device(log: &Arc<CallLog>, caps: Capabilities) -> Arc<Device> {
        Device::new(
            DeviceDesc::new(Box::new(RecordingContext::with_log(log.clone())))
                .capabilities(caps),
        )
        .unwrap()
    }

    #[test]
    fn targets_follow_shape() {
        let desc = ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 4, 4);
        assert_eq!(gl::TEXTURE_2D, desc.target());
        assert_eq!(gl::TEXTURE_2D_ARRAY, desc.array_layers(3).target());
        let cube = ImageDesc::cubemap(vk::Format::R8G8B8A8_UNORM, 4);
        assert_eq!(gl::TEXTURE_CUBE_MAP, cube.target());
        assert_eq!(gl::TEXTURE_CUBE_MAP_ARRAY, cube.array_layers(12).target());
        assert_eq!([4, 4, 12], cube.array_layers(12).storage_extent(gl::TEXTURE_CUBE_MAP_ARRAY));
        assert_eq!(
            gl::TEXTURE_2D_MULTISAMPLE,
            desc.samples(vk::SampleCountFlags::TYPE_4).target()
        );
    }

    #[test]
    fn whole_view_aliases_image() {
        let log = Arc::new(CallLog::default());
        let device = device(&log, Capabilities::from_version(4, 6));
        let image = device
            .create_image(ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 16, 16).mip_levels(5))
            .unwrap();
        assert_eq!(1, log.count("tex_storage"));
        let view = device
            .create_image_view(ImageViewDesc::new(
                image,
                vk::ImageViewType::TYPE_2D,
                vk::Format::R8G8B8A8_UNORM,
            ))
            .unwrap();
        assert_eq!(0, log.count("texture_view"));
        device.destroy_image_view(view);
        assert_eq!(0, log.count("delete_texture"));
        device.destroy_image(image);
        assert_eq!(1, log.count("delete_texture"));
    }

    #[test]
    fn partial_view_creates_texture_view() {
        let log = Arc::new(CallLog::default());
        let device = device(&log, Capabilities::from_version(4, 6));
        let image = device
            .create_image(ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 16, 16).array_layers(4))
            .unwrap();
        let view = device
            .create_image_view(
                ImageViewDesc::new(image, vk::ImageViewType::TYPE_2D, vk::Format::R8G8B8A8_SRGB)
                    .layers(2, 1),
            )
            .unwrap();
        assert_eq!(1, log.count("texture_view"));
        device.destroy_image_view(view);
        assert_eq!(1, log.count("delete_texture"));
    }

    #[test]
    fn swizzled_view_sets_texture_swizzle() {
        let log = Arc::new(CallLog::default());
        let device = device(&log, Capabilities::from_version(4, 6));
        let image = device
            .create_image(ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 16, 16))
            .unwrap();
        device
            .create_image_view(
                ImageViewDesc::new(image, vk::ImageViewType::TYPE_2D, vk::Format::R8G8B8A8_UNORM)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::B,
                        b: vk::ComponentSwizzle::R,
                        ..Default::default()
                    }),
            )
            .unwrap();
        assert_eq!(1, log.count("texture_view"));
        let swizzles = log
            .named("tex_parameter_i")
            .iter()
            .filter(|call| call.arg(1) == gl::TEXTURE_SWIZZLE_R as f64)
            .map(|call| call.arg(2))
            .collect::<Vec<_>>();
        assert_eq!(vec![gl::BLUE as f64], swizzles);
    }

    #[test]
    fn partial_view_without_support_is_reported() {
        let log = Arc::new(CallLog::default());
        let device = device(&log, Capabilities::from_version(3, 3));
        let image = device
            .create_image(ImageDesc::texture(vk::Format::R8G8B8A8_UNORM, 16, 16).mip_levels(3))
            .unwrap();
        let view = device
            .create_image_view(
                ImageViewDesc::new(image, vk::ImageViewType::TYPE_2D, vk::Format::R8G8B8A8_UNORM)
                    .levels(1, 1),
            )
            .unwrap();
        assert_eq!(0, log.count("texture_view"));
        let views = device.image_view_storage.read();
        assert_eq!(1, views.get(view).unwrap().base_level);
        assert_eq!(8, views.get(view).unwrap().extent.width);
    }
}
