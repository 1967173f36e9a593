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
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Out of host memory")]
    OutOfHostMemory,
    #[error("Out of device memory")]
    OutOfDeviceMemory,
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("{stage:?} shader compilation failed: {log}")]
    ShaderCompilation {
        stage: vk::ShaderStageFlags,
        log: String,
    },
    #[error("Program link failed: {0}")]
    ProgramLink(String),
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("Context lost")]
    ContextLost,
    #[error("Incompatible context: {0}")]
    IncompatibleContext(String),
    #[error("Timeout")]
    Timeout,
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl From<BackendError> for vk::Result {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::OutOfHostMemory => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            BackendError::OutOfDeviceMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            BackendError::NotSupported(_) => vk::Result::ERROR_FEATURE_NOT_PRESENT,
            BackendError::ShaderCompilation { .. } | BackendError::ProgramLink(_) => {
                vk::Result::ERROR_INVALID_SHADER_NV
            }
            BackendError::InvalidHandle(_) | BackendError::InvalidState(_) => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            BackendError::ContextLost => vk::Result::ERROR_DEVICE_LOST,
            BackendError::IncompatibleContext(_) => vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            BackendError::Timeout => vk::Result::TIMEOUT,
        }
    }
}
