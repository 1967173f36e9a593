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

use std::collections::HashMap;

use ash::vk;
use log::debug;
use parking_lot::Mutex;

use crate::{
    format_desc, BackendError, BackendResult, ContextId, ContextObject, ContextState,
    DebugReporter, Device, FormatDesc, FramebufferHandle, Gl, GlEnum, GlName, ImageViewHandle,
    RenderPassHandle, TextureLocation,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    pub color: Vec<u32>,
    /// Parallel to `color`, `vk::ATTACHMENT_UNUSED` where nothing is resolved.
    pub resolve: Vec<u32>,
    pub depth_stencil: Option<u32>,
    pub input: Vec<u32>,
}

impl SubpassDesc {
    pub fn color(mut self, attachment: u32) -> Self {
        self.color.push(attachment);
        self.resolve.push(vk::ATTACHMENT_UNUSED);
        self
    }

    pub fn resolved_color(mut self, attachment: u32, resolve: u32) -> Self {
        self.color.push(attachment);
        self.resolve.push(resolve);
        self
    }

    pub fn depth_stencil(mut self, attachment: u32) -> Self {
        self.depth_stencil = Some(attachment);
        self
    }

    pub fn input(mut self, attachment: u32) -> Self {
        self.input.push(attachment);
        self
    }

    pub(crate) fn resolves(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.color
            .iter()
            .zip(self.resolve.iter())
            .filter(|(color, resolve)| {
                **color != vk::ATTACHMENT_UNUSED && **resolve != vk::ATTACHMENT_UNUSED
            })
            .map(|(color, resolve)| (*color, *resolve))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassDesc {
    pub fn attachment(mut self, attachment: vk::AttachmentDescription) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn color_attachment(
        self,
        format: vk::Format,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
    ) -> Self {
        self.attachment(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op,
            store_op,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ..Default::default()
        })
    }

    pub fn depth_attachment(
        self,
        format: vk::Format,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
    ) -> Self {
        self.attachment(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op,
            store_op,
            stencil_load_op: load_op,
            stencil_store_op: store_op,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        })
    }

    pub fn subpass(mut self, subpass: SubpassDesc) -> Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// Render pass attachment with its GL attachment point inside the pass framebuffer.
#[derive(Debug, Clone, Copy)]
pub struct PassAttachment {
    pub desc: vk::AttachmentDescription,
    pub(crate) format: FormatDesc,
    pub(crate) point: GlEnum,
}

impl PassAttachment {
    pub(crate) fn is_color(&self) -> bool {
        self.format.aspects.contains(vk::ImageAspectFlags::COLOR)
    }
}

#[derive(Debug)]
pub struct RenderPass {
    pub attachments: Vec<PassAttachment>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPass {
    /// Draw buffer list routing fragment output `i` to the `i`-th color attachment of
    /// the subpass.
    pub(crate) fn draw_buffers(&self, subpass: usize, default: bool) -> Vec<GlEnum> {
        let Some(desc) = self.subpasses.get(subpass) else {
            return Vec::new();
        };
        desc.color
            .iter()
            .map(|index| match self.attachments.get(*index as usize) {
                Some(_) if default => gl::BACK_LEFT,
                Some(attachment) => attachment.point,
                None => gl::NONE,
            })
            .collect()
    }

    /// Every color attachment of the framebuffer, in color slot order.
    pub(crate) fn all_draw_buffers(&self, default: bool) -> Vec<GlEnum> {
        if default {
            return vec![gl::BACK_LEFT];
        }
        self.attachments
            .iter()
            .filter(|attachment| attachment.is_color())
            .map(|attachment| attachment.point)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassHandle,
    /// No views means the window's default framebuffer.
    pub attachments: Vec<ImageViewHandle>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

impl FramebufferDesc {
    pub fn new(render_pass: RenderPassHandle, width: u32, height: u32) -> Self {
        Self {
            render_pass,
            attachments: Vec::new(),
            width,
            height,
            layers: 1,
        }
    }

    pub fn attachment(mut self, view: ImageViewHandle) -> Self {
        self.attachments.push(view);
        self
    }

    pub fn layers(mut self, value: u32) -> Self {
        self.layers = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FramebufferAttachment {
    pub location: TextureLocation,
    pub layered: bool,
    pub point: GlEnum,
}

#[derive(Debug)]
pub struct Framebuffer {
    pub render_pass: RenderPassHandle,
    pub(crate) attachments: Vec<FramebufferAttachment>,
    pub extent: vk::Extent2D,
    pub layers: u32,
    pub(crate) is_default: bool,
    fbos: Mutex<HashMap<ContextId, GlName>>,
}

/// Attaches one texture level to the framebuffer bound at `target`.
pub(crate) fn attach_texture(
    gl: &dyn Gl,
    target: GlEnum,
    point: GlEnum,
    location: &TextureLocation,
    layered: bool,
) {
    match location.target {
        _ if layered => gl.framebuffer_texture(target, point, location.texture, location.level),
        gl::TEXTURE_CUBE_MAP => gl.framebuffer_texture_2d(
            target,
            point,
            gl::TEXTURE_CUBE_MAP_POSITIVE_X + location.layer,
            location.texture,
            location.level,
        ),
        texture_target if crate::is_layered_target(texture_target) => gl.framebuffer_texture_layer(
            target,
            point,
            location.texture,
            location.level,
            location.layer,
        ),
        texture_target => gl.framebuffer_texture_2d(
            target,
            point,
            texture_target,
            location.texture,
            location.level,
        ),
    }
}

pub(crate) fn check_framebuffer(gl: &dyn Gl, target: GlEnum, debug: &DebugReporter) -> bool {
    let status = gl.check_framebuffer_status(target);
    if status != gl::FRAMEBUFFER_COMPLETE {
        debug.error(&format!("Framebuffer incomplete: 0x{:x}", status));
        return false;
    }
    true
}

impl Framebuffer {
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Name of the framebuffer object in the locked context, created on first use.
    pub(crate) fn fbo(
        &self,
        gl: &dyn Gl,
        state: &mut ContextState,
        id: ContextId,
        debug: &DebugReporter,
    ) -> GlName {
        if self.is_default {
            return 0;
        }
        let mut fbos = self.fbos.lock();
        if let Some(fbo) = fbos.get(&id) {
            return *fbo;
        }
        let fbo = gl.create_framebuffer();
        state.bind_framebuffer(gl, gl::FRAMEBUFFER, fbo);
        for attachment in &self.attachments {
            attach_texture(
                gl,
                gl::FRAMEBUFFER,
                attachment.point,
                &attachment.location,
                attachment.layered,
            );
        }
        check_framebuffer(gl, gl::FRAMEBUFFER, debug);
        debug!("Framebuffer object {} created for context {:?}", fbo, id);
        fbos.insert(id, fbo);

        fbo
    }
}

impl Device {
    pub fn create_render_pass(&self, desc: RenderPassDesc) -> BackendResult<RenderPassHandle> {
        let mut color_slot = 0;
        let mut attachments = Vec::with_capacity(desc.attachments.len());
        for attachment in &desc.attachments {
            let format = format_desc(attachment.format).ok_or_else(|| {
                BackendError::NotSupported(format!("attachment format {:?}", attachment.format))
            })?;
            let point = format.attachment(color_slot);
            if format.aspects.contains(vk::ImageAspectFlags::COLOR) {
                color_slot += 1;
            }
            attachments.push(PassAttachment {
                desc: *attachment,
                format,
                point,
            });
        }
        if color_slot as usize > self.caps().max_color_attachments as usize {
            return Err(BackendError::NotSupported(format!(
                "{} color attachments, {} available",
                color_slot,
                self.caps().max_color_attachments
            )));
        }
        if desc.subpasses.is_empty() {
            return Err(BackendError::InvalidState("render pass without subpasses"));
        }
        let count = attachments.len() as u32;
        let in_range = |index: &u32| *index == vk::ATTACHMENT_UNUSED || *index < count;
        for subpass in &desc.subpasses {
            let valid = subpass.color.iter().all(in_range)
                && subpass.resolve.iter().all(in_range)
                && subpass.input.iter().all(in_range)
                && subpass.depth_stencil.iter().all(in_range);
            if !valid {
                return Err(BackendError::InvalidState(
                    "subpass references a missing attachment",
                ));
            }
            if !subpass.input.is_empty() {
                self.debug.warning(
                    "Input attachments are read as textures, bind them through descriptors",
                );
            }
        }

        Ok(self.render_pass_storage.write().push(RenderPass {
            attachments,
            subpasses: desc.subpasses,
            dependencies: desc.dependencies,
        }))
    }

    pub fn destroy_render_pass(&self, handle: RenderPassHandle) {
        self.render_pass_storage.write().remove(handle);
    }

    pub fn create_framebuffer(&self, desc: FramebufferDesc) -> BackendResult<FramebufferHandle> {
        let points = self
            .render_pass_storage
            .read()
            .get(desc.render_pass)
            .map(|pass| {
                pass.attachments
                    .iter()
                    .map(|attachment| (attachment.point, attachment.desc.format))
                    .collect::<Vec<_>>()
            })
            .ok_or(BackendError::InvalidHandle("render pass"))?;

        let is_default = desc.attachments.is_empty();
        let mut attachments = Vec::with_capacity(desc.attachments.len());
        if !is_default {
            if desc.attachments.len() != points.len() {
                return Err(BackendError::InvalidState(
                    "framebuffer and render pass attachment counts differ",
                ));
            }
            let views = self.image_view_storage.read();
            for (handle, (point, format)) in desc.attachments.iter().zip(points) {
                let view = views
                    .get(*handle)
                    .ok_or(BackendError::InvalidHandle("image view"))?;
                if format_desc(format).map(|desc| desc.internal) != Some(view.format.internal) {
                    self.debug.warning(&format!(
                        "Attachment view format differs from render pass format {:?}",
                        format
                    ));
                }
                attachments.push(FramebufferAttachment {
                    location: view.location(),
                    layered: desc.layers > 1 && view.layer_count > 1,
                    point,
                });
            }
        }

        Ok(self.framebuffer_storage.write().push(Framebuffer {
            render_pass: desc.render_pass,
            attachments,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            layers: desc.layers.max(1),
            is_default,
            fbos: Mutex::default(),
        }))
    }

    pub fn destroy_framebuffer(&self, handle: FramebufferHandle) {
        let Some(framebuffer) = self.framebuffer_storage.write().remove(handle) else {
            return;
        };
        let fbos = std::mem::take(&mut *framebuffer.fbos.lock());
        self.release_context_objects(
            fbos.into_iter()
                .map(|(id, fbo)| (id, ContextObject::Framebuffer(fbo))),
        );
    }
}
