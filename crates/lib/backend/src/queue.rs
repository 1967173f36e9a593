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

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use ash::vk;
use log::{debug, warn};

use crate::{
    executor, BackendError, BackendResult, CommandBuffer, CommandBufferState, ContextId, Device,
    FenceHandle, Gl, SyncStatus, SyncToken,
};

const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Host side of a fence. Submission arms it with a sync object on the submitting context.
#[derive(Debug, Default)]
pub struct Fence {
    pending: Option<(ContextId, SyncToken)>,
    signaled: bool,
}

/// Blocks until everything issued on the current context has retired.
pub(crate) fn wait_context_idle(gl: &dyn Gl) -> BackendResult<()> {
    let sync = gl.fence_sync();
    let status = gl.client_wait_sync(sync, u64::MAX);
    gl.delete_sync(sync);
    match status {
        SyncStatus::Failed => Err(BackendError::ContextLost),
        _ => Ok(()),
    }
}

/// Logical queue. Queues mapped to the same context are serialized on its lock.
pub struct Queue {
    device: Arc<Device>,
    index: u32,
}

impl Queue {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Replays `buffers` in order on the queue context. `fence` is armed after the last one.
    pub fn submit(&self, buffers: &[&CommandBuffer], fence: Option<FenceHandle>) -> BackendResult<()> {
        puffin::profile_function!();
        for buffer in buffers {
            if buffer.level() != vk::CommandBufferLevel::PRIMARY {
                return Err(BackendError::InvalidState(
                    "secondary command buffers can't be submitted",
                ));
            }
            if buffer.state() != CommandBufferState::Executable {
                return Err(BackendError::InvalidState(
                    "submitted command buffer isn't executable",
                ));
            }
        }
        if let Some(fence) = fence {
            if !self.device.fence_storage.read().contains(fence) {
                return Err(BackendError::InvalidHandle("fence"));
            }
        }

        let lock = self.device.queue_context(self.index).lock()?;
        for buffer in buffers {
            executor::execute(&self.device, &lock, buffer.commands());
            buffer.mark_submitted();
        }
        let gl = lock.gl();
        gl.flush();
        if let Some(fence) = fence {
            let sync = gl.fence_sync();
            let armed = self.device.fence_storage.write().get_mut(fence).map(|fence| {
                fence.signaled = false;
                fence.pending.replace((lock.id(), sync))
            });
            let Some(previous) = armed else {
                gl.delete_sync(sync);
                return Err(BackendError::InvalidHandle("fence"));
            };
            if let Some((_, previous)) = previous {
                warn!("Fence submitted again before it was waited on");
                gl.delete_sync(previous);
            }
        }
        debug!(
            "{} command buffers submitted to queue {}",
            buffers.len(),
            self.index
        );

        Ok(())
    }

    pub fn wait_idle(&self) -> BackendResult<()> {
        puffin::profile_function!();
        let lock = self.device.queue_context(self.index).lock()?;
        wait_context_idle(lock.gl())
    }
}

impl Device {
    pub fn queue(self: &Arc<Self>, index: u32) -> BackendResult<Queue> {
        if index >= self.queue_count() {
            return Err(BackendError::InvalidHandle("queue"));
        }

        Ok(Queue {
            device: self.clone(),
            index,
        })
    }

    pub fn create_fence(&self, signaled: bool) -> FenceHandle {
        self.fence_storage.write().push(Fence {
            pending: None,
            signaled,
        })
    }

    pub fn destroy_fence(&self, handle: FenceHandle) {
        let Some(fence) = self.fence_storage.write().remove(handle) else {
            return;
        };
        if let Some((id, sync)) = fence.pending {
            self.delete_sync(id, sync);
        }
    }

    pub fn reset_fences(&self, handles: &[FenceHandle]) -> BackendResult<()> {
        let released = {
            let mut fences = self.fence_storage.write();
            let mut released = Vec::new();
            for handle in handles {
                let fence = fences
                    .get_mut(*handle)
                    .ok_or(BackendError::InvalidHandle("fence"))?;
                fence.signaled = false;
                released.extend(fence.pending.take());
            }
            released
        };
        for (id, sync) in released {
            self.delete_sync(id, sync);
        }

        Ok(())
    }

    /// Signals `handle` from the host, used by swapchain acquire.
    pub(crate) fn signal_fence(&self, handle: FenceHandle) -> BackendResult<()> {
        let released = {
            let mut fences = self.fence_storage.write();
            let fence = fences
                .get_mut(handle)
                .ok_or(BackendError::InvalidHandle("fence"))?;
            fence.signaled = true;
            fence.pending.take()
        };
        if let Some((id, sync)) = released {
            self.delete_sync(id, sync);
        }

        Ok(())
    }

    /// Non-blocking status check.
    pub fn fence_status(&self, handle: FenceHandle) -> BackendResult<bool> {
        self.poll_fence(handle, 0)
    }

    /// Waits for all or any of `handles` with a timeout in nanoseconds. A fence that was
    /// never submitted stays unsignaled until the timeout runs out or the host signals it.
    pub fn wait_for_fences(
        &self,
        handles: &[FenceHandle],
        wait_all: bool,
        timeout: u64,
    ) -> BackendResult<()> {
        puffin::profile_function!();
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout));
        let remaining = || match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .as_nanos()
                .min(u64::MAX as u128) as u64,
            None => u64::MAX,
        };

        // Unsubmitted fences can still be signaled from the host.
        let backoff = || thread::sleep(POLL_INTERVAL.min(Duration::from_nanos(remaining())));
        if wait_all {
            for handle in handles {
                while !self.poll_fence(*handle, remaining())? {
                    if remaining() == 0 {
                        return Err(BackendError::Timeout);
                    }
                    backoff();
                }
            }
            return Ok(());
        }

        loop {
            for handle in handles {
                if self.poll_fence(*handle, 0)? {
                    return Ok(());
                }
            }
            if remaining() == 0 {
                return Err(BackendError::Timeout);
            }
            backoff();
        }
    }

    fn poll_fence(&self, handle: FenceHandle, timeout: u64) -> BackendResult<bool> {
        let pending = {
            let fences = self.fence_storage.read();
            let fence = fences
                .get(handle)
                .ok_or(BackendError::InvalidHandle("fence"))?;
            if fence.signaled {
                return Ok(true);
            }
            fence.pending
        };
        // Never submitted and never signaled.
        let Some((id, sync)) = pending else {
            return Ok(false);
        };

        let context = self.context(id).ok_or(BackendError::ContextLost)?;
        let lock = context.lock()?;
        match lock.gl().client_wait_sync(sync, timeout) {
            SyncStatus::Signaled => {
                let mut fences = self.fence_storage.write();
                if let Some(fence) = fences.get_mut(handle) {
                    if fence.pending == Some((id, sync)) {
                        fence.pending = None;
                        fence.signaled = true;
                        lock.gl().delete_sync(sync);
                    }
                }
                Ok(true)
            }
            SyncStatus::Timeout => Ok(false),
            SyncStatus::Failed => Err(BackendError::ContextLost),
        }
    }

    fn delete_sync(&self, id: ContextId, sync: SyncToken) {
        let Some(context) = self.context(id) else {
            return;
        };
        match context.lock() {
            Ok(lock) => lock.gl().delete_sync(sync),
            Err(err) => self
                .debug()
                .error(&format!("Can't delete fence sync: {}", err)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{atomic::Ordering, Arc},
        thread,
        time::{Duration, Instant},
    };

    use ash::vk;

    use crate::{
        testing::{CallLog, Fixture},
        BackendError, CommandBuffer,
    };

    #[test]
    fn submit_arms_fence() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let device = &fixture.device;
        let queue = device.queue(0).unwrap();
        let fence = device.create_fence(false);
        assert!(!device.fence_status(fence).unwrap());

        let mut cb = CommandBuffer::primary(device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        fixture.begin_pass(&mut cb, [0.0, 0.0, 0.0, 1.0]);
        cb.end_render_pass();
        cb.end().unwrap();

        log.clear();
        queue.submit(&[&cb], Some(fence)).unwrap();
        assert_eq!(1, log.count("flush"));
        assert_eq!(1, log.count("fence_sync"));
        assert!(log.count("clear_buffer_fv") > 0);

        log.stall_syncs.store(true, Ordering::Relaxed);
        assert!(matches!(
            device.wait_for_fences(&[fence], true, 1000),
            Err(BackendError::Timeout)
        ));
        log.stall_syncs.store(false, Ordering::Relaxed);
        device.wait_for_fences(&[fence], true, u64::MAX).unwrap();
        assert!(device.fence_status(fence).unwrap());
        assert_eq!(1, log.count("delete_sync"));

        device.reset_fences(&[fence]).unwrap();
        assert!(!device.fence_status(fence).unwrap());
        device.destroy_fence(fence);
        assert!(matches!(
            device.fence_status(fence),
            Err(BackendError::InvalidHandle(_))
        ));
    }

    #[test]
    fn submit_needs_executable_primaries() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let queue = fixture.device.queue(0).unwrap();
        let cb = CommandBuffer::primary(&fixture.device);
        assert!(matches!(
            queue.submit(&[&cb], None),
            Err(BackendError::InvalidState(_))
        ));
        assert!(fixture.device.queue(1).is_err());

        let mut once = CommandBuffer::primary(&fixture.device);
        once.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        once.end().unwrap();
        queue.submit(&[&once], None).unwrap();
        assert!(queue.submit(&[&once], None).is_err());
    }

    #[test]
    fn unsubmitted_fence_waits_out_timeout() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let device = fixture.device.clone();
        let fence = device.create_fence(false);

        let started = Instant::now();
        assert!(matches!(
            device.wait_for_fences(&[fence], true, 5_000_000),
            Err(BackendError::Timeout)
        ));
        assert!(started.elapsed() >= Duration::from_millis(5));

        let signaler = device.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaler.signal_fence(fence).unwrap();
        });
        device
            .wait_for_fences(&[fence], true, 10_000_000_000)
            .unwrap();
        handle.join().unwrap();
        assert!(device.fence_status(fence).unwrap());
    }

    #[test]
    fn wait_any_returns_on_signaled() {
        let log = Arc::new(CallLog::default());
        let fixture = Fixture::new(&log);
        let device = &fixture.device;
        let idle = device.create_fence(false);
        let done = device.create_fence(true);
        device.wait_for_fences(&[idle, done], false, 0).unwrap();
        assert!(matches!(
            device.wait_for_fences(&[idle, done], true, 0),
            Err(BackendError::Timeout)
        ));

        log.clear();
        device.queue(0).unwrap().wait_idle().unwrap();
        assert_eq!(1, log.count("client_wait_sync"));
    }
}
