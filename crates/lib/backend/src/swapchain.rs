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

use std::{sync::Arc, time::Duration};

use ash::vk;
use log::info;
use parking_lot::{Condvar, Mutex};

use crate::{
    render_pass::attach_texture, BackendError, BackendResult, Device, FenceHandle, ImageDesc,
    ImageHandle, Queue,
};

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
}

impl SwapchainDesc {
    pub fn new(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            extent: vk::Extent2D { width, height },
        }
    }
}

/// Single-image swapchain over the default framebuffer of the window the contexts draw to.
/// Present blits the image into the back buffer upside down and swaps.
pub struct Swapchain {
    device: Arc<Device>,
    desc: SwapchainDesc,
    image: ImageHandle,
    acquired: Mutex<bool>,
    released: Condvar,
}

impl Device {
    pub fn create_swapchain(self: &Arc<Self>, desc: SwapchainDesc) -> BackendResult<Swapchain> {
        let image = self.create_image(
            ImageDesc::new(desc.format, desc.extent.width, desc.extent.height).usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )?;
        info!(
            "Swapchain created: {:?} {}x{}",
            desc.format, desc.extent.width, desc.extent.height
        );

        Ok(Swapchain {
            device: self.clone(),
            desc,
            image,
            acquired: Mutex::new(false),
            released: Condvar::new(),
        })
    }
}

impl Swapchain {
    pub fn images(&self) -> [ImageHandle; 1] {
        [self.image]
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Waits up to `timeout` nanoseconds for the image to come back from present.
    pub fn acquire_next_image(&self, timeout: u64, fence: Option<FenceHandle>) -> BackendResult<u32> {
        puffin::profile_function!();
        let mut acquired = self.acquired.lock();
        let result = self.released.wait_while_for(
            &mut acquired,
            |acquired| *acquired,
            Duration::from_nanos(timeout),
        );
        if result.timed_out() {
            return Err(BackendError::Timeout);
        }
        *acquired = true;
        drop(acquired);
        if let Some(fence) = fence {
            self.device.signal_fence(fence)?;
        }

        Ok(0)
    }

    pub fn present(&self, queue: &Queue, index: u32) -> BackendResult<()> {
        puffin::profile_function!();
        if index != 0 {
            return Err(BackendError::InvalidHandle("swapchain image"));
        }
        if !*self.acquired.lock() {
            return Err(BackendError::InvalidState("presented image wasn't acquired"));
        }
        let location = self
            .device
            .image_storage
            .read()
            .get(self.image)
            .ok_or(BackendError::InvalidHandle("image"))?
            .location(0, 0);

        let lock = self.device.queue_context(queue.index()).lock()?;
        {
            let gl = lock.gl();
            let mut state = lock.state();
            let scissor = state.suspend_scissor_test(gl);
            let fbo = gl.create_framebuffer();
            state.bind_framebuffer(gl, gl::READ_FRAMEBUFFER, fbo);
            attach_texture(
                gl,
                gl::READ_FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                &location,
                false,
            );
            state.bind_framebuffer(gl, gl::DRAW_FRAMEBUFFER, 0);
            let width = self.desc.extent.width as i32;
            let height = self.desc.extent.height as i32;
            gl.blit_framebuffer(
                [0, 0, width, height],
                [0, height, width, 0],
                gl::COLOR_BUFFER_BIT,
                gl::NEAREST,
            );
            state.framebuffer_deleted(fbo);
            gl.delete_framebuffer(fbo);
            state.resume_scissor_test(gl, scissor);
        }
        lock.swap_buffers()?;
        drop(lock);

        *self.acquired.lock() = false;
        self.released.notify_one();

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.device.destroy_image(self.image);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ash::vk;

    use crate::{
        testing::{CallLog, RecordingContext},
        BackendError, Device, DeviceDesc, SwapchainDesc,
    };

    #[test]
    fn acquire_present_cycle() {
        let log = Arc::new(CallLog::default());
        let device = Device::new(DeviceDesc::new(Box::new(RecordingContext::with_log(
            log.clone(),
        ))))
        .unwrap();
        let queue = device.queue(0).unwrap();
        let swapchain = device
            .create_swapchain(SwapchainDesc::new(vk::Format::R8G8B8A8_UNORM, 320, 200))
            .unwrap();
        assert!(matches!(
            swapchain.present(&queue, 0),
            Err(BackendError::InvalidState(_))
        ));

        let fence = device.create_fence(false);
        assert_eq!(0, swapchain.acquire_next_image(u64::MAX, Some(fence)).unwrap());
        assert!(device.fence_status(fence).unwrap());
        assert!(matches!(
            swapchain.acquire_next_image(1000, None),
            Err(BackendError::Timeout)
        ));

        log.clear();
        swapchain.present(&queue, 0).unwrap();
        let blit = &log.named("blit_framebuffer")[0];
        assert_eq!(
            [0.0, 0.0, 320.0, 200.0, 0.0, 200.0, 320.0, 0.0],
            [
                blit.arg(0),
                blit.arg(1),
                blit.arg(2),
                blit.arg(3),
                blit.arg(4),
                blit.arg(5),
                blit.arg(6),
                blit.arg(7)
            ]
        );
        assert_eq!(1, log.count("swap_buffers"));
        assert_eq!(1, log.count("delete_framebuffer"));
        assert_eq!(0, swapchain.acquire_next_image(0, None).unwrap());

        drop(swapchain);
        assert_eq!(1, log.count("delete_texture"));
    }
}
