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

//! Vulkan object model on top of OpenGL 3.3+.
//!
//! Command buffers record into a flat [`CommandList`]; queues replay the list on a locked
//! [`Context`] through a [`ContextState`] cache which drops redundant driver calls.

mod barrier;
mod buffer;
mod command_buffer;
mod commands;
mod context;
mod debug;
mod descriptors;
mod device;
mod error;
mod executor;
mod format;
mod geometry;
mod gl;
mod image;
mod pipeline;
mod program;
mod queue;
mod render_pass;
mod sampler;
mod state;
mod swapchain;
mod translate;

#[cfg(test)]
mod scenario;
#[cfg(test)]
mod testing;

pub use self::gl::*;
pub use barrier::*;
pub use buffer::*;
pub use command_buffer::*;
pub use commands::*;
pub use context::*;
pub use debug::*;
pub use descriptors::*;
pub use device::*;
pub use error::*;
pub use format::*;
pub use geometry::*;
pub use image::*;
pub use pipeline::*;
pub use program::*;
pub use queue::*;
pub use render_pass::*;
pub use sampler::*;
pub use state::*;
pub use swapchain::*;
