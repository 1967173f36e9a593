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

use crate::{
    translate, BackendError, BackendResult, Device, GlName, SamplerHandle, SharedObject,
    TEXTURE_MAX_ANISOTROPY,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: [vk::SamplerAddressMode; 3],
    pub mip_lod_bias: f32,
    pub anisotropy: Option<f32>,
    pub compare: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: [vk::SamplerAddressMode::REPEAT; 3],
            mip_lod_bias: 0.0,
            anisotropy: None,
            compare: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

impl SamplerDesc {
    pub fn filter(mut self, filter: vk::Filter) -> Self {
        self.mag_filter = filter;
        self.min_filter = filter;
        self
    }

    pub fn mipmap_mode(mut self, mode: vk::SamplerMipmapMode) -> Self {
        self.mipmap_mode = mode;
        self
    }

    pub fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode = [mode; 3];
        self
    }

    pub fn anisotropy(mut self, level: f32) -> Self {
        self.anisotropy = Some(level);
        self
    }

    pub fn compare(mut self, op: vk::CompareOp) -> Self {
        self.compare = Some(op);
        self
    }

    pub fn lod(mut self, min: f32, max: f32) -> Self {
        self.min_lod = min;
        self.max_lod = max;
        self
    }

    pub fn border_color(mut self, color: vk::BorderColor) -> Self {
        self.border_color = color;
        self
    }
}

#[derive(Debug)]
pub struct Sampler {
    pub(crate) name: GlName,
    pub desc: SamplerDesc,
}

impl Device {
    pub fn create_sampler(&self, desc: SamplerDesc) -> BackendResult<SamplerHandle> {
        let lock = self.main_context().lock()?;
        let gl = lock.gl();
        let name = gl.create_sampler();
        // Vulkan mipmapping is switched off by a zero lod range, not by the filter.
        let mipmapped = desc.max_lod > 0.0;
        let params = [
            (
                gl::TEXTURE_MIN_FILTER,
                translate::min_filter(desc.min_filter, desc.mipmap_mode, mipmapped),
            ),
            (gl::TEXTURE_MAG_FILTER, translate::filter(desc.mag_filter)),
            (gl::TEXTURE_WRAP_S, translate::address_mode(desc.address_mode[0])),
            (gl::TEXTURE_WRAP_T, translate::address_mode(desc.address_mode[1])),
            (gl::TEXTURE_WRAP_R, translate::address_mode(desc.address_mode[2])),
        ];
        for (pname, value) in params {
            gl.sampler_parameter_i(name, pname, value as i32);
        }
        gl.sampler_parameter_f(name, gl::TEXTURE_MIN_LOD, desc.min_lod);
        gl.sampler_parameter_f(name, gl::TEXTURE_MAX_LOD, desc.max_lod);
        if desc.mip_lod_bias != 0.0 {
            gl.sampler_parameter_f(name, gl::TEXTURE_LOD_BIAS, desc.mip_lod_bias);
        }
        if let Some(level) = desc.anisotropy {
            if self.caps().anisotropy {
                gl.sampler_parameter_f(name, TEXTURE_MAX_ANISOTROPY, level);
            } else {
                self.debug
                    .warning("Anisotropic filtering needs GL 4.6, ignored");
            }
        }
        if let Some(op) = desc.compare {
            gl.sampler_parameter_i(
                name,
                gl::TEXTURE_COMPARE_MODE,
                gl::COMPARE_REF_TO_TEXTURE as i32,
            );
            gl.sampler_parameter_i(
                name,
                gl::TEXTURE_COMPARE_FUNC,
                translate::compare_op(op) as i32,
            );
        }
        if desc.address_mode.contains(&vk::SamplerAddressMode::CLAMP_TO_BORDER) {
            gl.sampler_parameter_fv(
                name,
                gl::TEXTURE_BORDER_COLOR,
                &translate::border_color(desc.border_color),
            );
        }
        drop(lock);

        Ok(self.sampler_storage.write().push(Sampler { name, desc }))
    }

    pub fn destroy_sampler(&self, handle: SamplerHandle) {
        if let Some(sampler) = self.sampler_storage.write().remove(handle) {
            self.delete_shared(SharedObject::Sampler(sampler.name));
        }
    }

    pub fn sampler_desc(&self, handle: SamplerHandle) -> BackendResult<SamplerDesc> {
        self.sampler_storage
            .read()
            .get(handle)
            .map(|sampler| sampler.desc)
            .ok_or(BackendError::InvalidHandle("sampler"))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ash::vk;

    use crate::{
        testing::{CallLog, RecordingContext},
        Device, DeviceDesc, SamplerDesc, TEXTURE_MAX_ANISOTROPY,
    };

    #[test]
    fn translates_parameters() {
        let log = Arc::new(CallLog::default());
        let device = Device::new(DeviceDesc::new(Box::new(RecordingContext::with_log(
            log.clone(),
        ))))
        .unwrap();
        let sampler = device
            .create_sampler(
                SamplerDesc::default()
                    .filter(vk::Filter::NEAREST)
                    .address_mode(vk::SamplerAddressMode::CLAMP_TO_BORDER)
                    .compare(vk::CompareOp::LESS_OR_EQUAL),
            )
            .unwrap();
        let ints = log.named("sampler_parameter_i");
        let min_filter = ints
            .iter()
            .find(|call| call.arg(1) == gl::TEXTURE_MIN_FILTER as f64)
            .unwrap();
        assert_eq!(gl::NEAREST_MIPMAP_LINEAR as f64, min_filter.arg(2));
        assert!(ints
            .iter()
            .any(|call| call.arg(2) == gl::LEQUAL as f64));
        assert_eq!(1, log.count("sampler_parameter_fv"));

        device.destroy_sampler(sampler);
        assert_eq!(1, log.count("delete_sampler"));
        assert!(device.sampler_desc(sampler).is_err());
    }

    #[test]
    fn anisotropy_needs_capability() {
        let anisotropic = |major, minor| {
            let log = Arc::new(CallLog::default());
            log.set_version(major, minor);
            let device = Device::new(DeviceDesc::new(Box::new(RecordingContext::with_log(
                log.clone(),
            ))))
            .unwrap();
            device
                .create_sampler(SamplerDesc::default().anisotropy(8.0))
                .unwrap();
            log.named("sampler_parameter_f")
                .iter()
                .filter(|call| call.arg(1) == TEXTURE_MAX_ANISOTROPY as f64)
                .map(|call| call.arg(2))
                .collect::<Vec<_>>()
        };
        assert_eq!(vec![8.0], anisotropic(4, 6));
        assert!(anisotropic(4, 5).is_empty());
    }
}
