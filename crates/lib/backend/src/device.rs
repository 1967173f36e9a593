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

use std::sync::Arc;

use ash::vk;
use glint_common::{Arena, Handle};
use log::info;
use parking_lot::{Mutex, RwLock};

use crate::{
    BackendError, BackendResult, Buffer, BufferView, Capabilities, Context, ContextId,
    ContextObject, DebugCallback, DebugReporter, DescriptorSet, DescriptorSetLayout, Fence,
    Framebuffer, GeometryCache, Image, ImageView, NativeContext, Pipeline, PipelineLayout,
    RenderPass, Sampler, ShaderModule, SharedObject,
};

pub type BufferHandle = Handle<Buffer>;
pub type BufferViewHandle = Handle<BufferView>;
pub type ImageHandle = Handle<Image>;
pub type ImageViewHandle = Handle<ImageView>;
pub type SamplerHandle = Handle<Sampler>;
pub type ShaderModuleHandle = Handle<ShaderModule>;
pub type DescriptorSetLayoutHandle = Handle<DescriptorSetLayout>;
pub type DescriptorSetHandle = Handle<DescriptorSet>;
pub type PipelineLayoutHandle = Handle<PipelineLayout>;
pub type PipelineHandle = Handle<Pipeline>;
pub type RenderPassHandle = Handle<RenderPass>;
pub type FramebufferHandle = Handle<Framebuffer>;
pub type FenceHandle = Handle<Fence>;

/// Device creation parameters.
pub struct DeviceDesc {
    pub(crate) context: Box<dyn NativeContext>,
    pub(crate) extra_contexts: Vec<Box<dyn NativeContext>>,
    pub(crate) validation: bool,
    pub(crate) queue_count: u32,
    pub(crate) capabilities: Option<Capabilities>,
    pub(crate) debug_callbacks: Vec<(vk::DebugReportFlagsEXT, DebugCallback)>,
}

impl DeviceDesc {
    pub fn new(context: Box<dyn NativeContext>) -> Self {
        Self {
            context,
            extra_contexts: Vec::new(),
            validation: false,
            queue_count: 1,
            capabilities: None,
            debug_callbacks: Vec::new(),
        }
    }

    /// Turns compile and link failures into hard errors and checks framebuffer completeness.
    pub fn validation(mut self, value: bool) -> Self {
        self.validation = value;
        self
    }

    /// Adds a context sharing objects with the main one. Queues are spread over contexts.
    pub fn extra_context(mut self, context: Box<dyn NativeContext>) -> Self {
        self.extra_contexts.push(context);
        self
    }

    pub fn queue_count(mut self, value: u32) -> Self {
        self.queue_count = value.max(1);
        self
    }

    /// Overrides detected capabilities, mostly to force GL 3.3 paths.
    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = Some(caps);
        self
    }

    pub fn debug_callback(mut self, flags: vk::DebugReportFlagsEXT, callback: DebugCallback) -> Self {
        self.debug_callbacks.push((flags, callback));
        self
    }
}

pub struct Device {
    contexts: Vec<Context>,
    caps: Capabilities,
    validation: bool,
    queue_count: u32,
    pub(crate) debug: DebugReporter,
    pub(crate) buffer_storage: RwLock<Arena<Buffer>>,
    pub(crate) buffer_view_storage: RwLock<Arena<BufferView>>,
    pub(crate) image_storage: RwLock<Arena<Image>>,
    pub(crate) image_view_storage: RwLock<Arena<ImageView>>,
    pub(crate) sampler_storage: RwLock<Arena<Sampler>>,
    pub(crate) shader_storage: RwLock<Arena<ShaderModule>>,
    pub(crate) set_layout_storage: RwLock<Arena<DescriptorSetLayout>>,
    pub(crate) descriptor_storage: RwLock<Arena<DescriptorSet>>,
    pub(crate) pipeline_layout_storage: RwLock<Arena<PipelineLayout>>,
    pub(crate) pipeline_storage: RwLock<Arena<Pipeline>>,
    pub(crate) render_pass_storage: RwLock<Arena<RenderPass>>,
    pub(crate) framebuffer_storage: RwLock<Arena<Framebuffer>>,
    pub(crate) fence_storage: RwLock<Arena<Fence>>,
    pub(crate) geometry: Mutex<GeometryCache>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("contexts", &self.contexts.len())
            .field("caps", &self.caps)
            .field("validation", &self.validation)
            .finish()
    }
}

impl Device {
    pub fn new(desc: DeviceDesc) -> BackendResult<Arc<Self>> {
        let caps = match desc.capabilities {
            Some(caps) => caps,
            None => {
                desc.context.make_current()?;
                let caps = Capabilities::detect(desc.context.gl());
                desc.context.release_current();
                caps
            }
        };
        if !caps.is_supported() {
            return Err(BackendError::IncompatibleContext(format!(
                "GL {}.{} found, {}.{} required",
                caps.version.0,
                caps.version.1,
                Capabilities::MIN_VERSION.0,
                Capabilities::MIN_VERSION.1
            )));
        }
        info!("Creating device on GL {}.{}", caps.version.0, caps.version.1);
        info!("{:?}", caps);

        let contexts = std::iter::once(desc.context)
            .chain(desc.extra_contexts)
            .enumerate()
            .map(|(index, native)| Context::new(ContextId(index as u32), native, caps))
            .collect::<Vec<_>>();
        let debug = DebugReporter::default();
        for (flags, callback) in desc.debug_callbacks {
            debug.register(flags, callback);
        }

        Ok(Arc::new(Self {
            contexts,
            caps,
            validation: desc.validation,
            queue_count: desc.queue_count,
            debug,
            buffer_storage: RwLock::default(),
            buffer_view_storage: RwLock::default(),
            image_storage: RwLock::default(),
            image_view_storage: RwLock::default(),
            sampler_storage: RwLock::default(),
            shader_storage: RwLock::default(),
            set_layout_storage: RwLock::default(),
            descriptor_storage: RwLock::default(),
            pipeline_layout_storage: RwLock::default(),
            pipeline_storage: RwLock::default(),
            render_pass_storage: RwLock::default(),
            framebuffer_storage: RwLock::default(),
            fence_storage: RwLock::default(),
            geometry: Mutex::default(),
        }))
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn validation(&self) -> bool {
        self.validation
    }

    pub fn debug(&self) -> &DebugReporter {
        &self.debug
    }

    pub fn queue_count(&self) -> u32 {
        self.queue_count
    }

    /// Context every object is created on.
    pub fn main_context(&self) -> &Context {
        &self.contexts[0]
    }

    pub fn context(&self, id: ContextId) -> Option<&Context> {
        self.contexts.get(id.0 as usize)
    }

    /// Logical queues sharing a context are serialized on its lock.
    pub(crate) fn queue_context(&self, queue: u32) -> &Context {
        &self.contexts[queue as usize % self.contexts.len()]
    }

    /// Hands per-context objects to their owners, they go away on the next lock.
    pub(crate) fn release_context_objects(
        &self,
        objects: impl IntoIterator<Item = (ContextId, ContextObject)>,
    ) {
        for (id, object) in objects {
            if let Some(context) = self.context(id) {
                context.defer_delete(object);
            }
        }
    }

    /// Deletes a shared object on the main context and drops it from every other cache.
    pub(crate) fn delete_shared(&self, object: SharedObject) {
        match self.main_context().lock() {
            Ok(lock) => {
                let gl = lock.gl();
                let mut state = lock.state();
                match object {
                    SharedObject::Buffer(name) => {
                        state.buffer_deleted(name);
                        gl.delete_buffer(name);
                    }
                    SharedObject::Texture(name) => {
                        state.texture_deleted(name);
                        gl.delete_texture(name);
                    }
                    SharedObject::Sampler(name) => {
                        state.sampler_deleted(name);
                        gl.delete_sampler(name);
                    }
                    SharedObject::Program(name) => {
                        if state.program() == Some(name) {
                            state.forget_program();
                        }
                        gl.delete_program(name);
                    }
                }
            }
            Err(err) => {
                self.debug
                    .error(&format!("Can't delete {:?}: {}", object, err));
                return;
            }
        }
        self.contexts[1..]
            .iter()
            .for_each(|context| context.forget(object));
    }

    /// Waits until every context has finished its work.
    pub fn wait_idle(&self) -> BackendResult<()> {
        puffin::profile_function!();
        for context in &self.contexts {
            let lock = context.lock()?;
            crate::queue::wait_context_idle(lock.gl())?;
        }

        Ok(())
    }
}
