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
    cell::{RefCell, RefMut},
    thread::{self, ThreadId},
};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::{BackendResult, Capabilities, ContextState, Gl, GlName};

/// Platform side of a GL context: WGL, GLX, EGL or whatever the application uses.
pub trait NativeContext: Send {
    fn make_current(&self) -> BackendResult<()>;
    fn release_current(&self);
    fn swap_buffers(&self) -> BackendResult<()>;
    fn gl(&self) -> &dyn Gl;
}

/// Index of a context inside its device. Container objects (vertex arrays, framebuffers)
/// are not shared between contexts and are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) u32);

/// Per-context object queued for deletion by whichever thread dropped its owner.
/// Container objects GL never shares between contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextObject {
    VertexArray(GlName),
    Framebuffer(GlName),
}

/// Shared objects deleted through another context. Their names may come back for new
/// objects, so every other cache has to drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedObject {
    Buffer(GlName),
    Texture(GlName),
    Sampler(GlName),
    Program(GlName),
}

struct ContextData {
    owner: Option<ThreadId>,
    depth: u32,
    state: ContextState,
}

struct ContextInner {
    native: Box<dyn NativeContext>,
    data: RefCell<ContextData>,
}

/// A GL context and the cache of its state.
///
/// Only one thread can hold the context at a time. Locking again from the owning thread
/// is free, the context is made current on the outermost lock only.
pub struct Context {
    id: ContextId,
    caps: Capabilities,
    inner: ReentrantMutex<ContextInner>,
    garbage: Mutex<Vec<ContextObject>>,
    forgotten: Mutex<Vec<SharedObject>>,
}

impl Context {
    pub(crate) fn new(id: ContextId, native: Box<dyn NativeContext>, caps: Capabilities) -> Self {
        Self {
            id,
            caps,
            inner: ReentrantMutex::new(ContextInner {
                native,
                data: RefCell::new(ContextData {
                    owner: None,
                    depth: 0,
                    state: ContextState::default(),
                }),
            }),
            garbage: Mutex::default(),
            forgotten: Mutex::default(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn lock(&self) -> BackendResult<ContextLock> {
        let guard = self.inner.lock();
        {
            let mut data = guard.data.borrow_mut();
            let current = thread::current().id();
            if data.owner != Some(current) {
                guard.native.make_current()?;
                data.owner = Some(current);
            }
            data.depth += 1;
        }
        let lock = ContextLock {
            context: self,
            guard,
        };
        lock.collect_garbage();

        Ok(lock)
    }

    /// Queues a per-context object for deletion next time the context is locked.
    pub(crate) fn defer_delete(&self, object: ContextObject) {
        self.garbage.lock().push(object);
    }

    pub(crate) fn forget(&self, object: SharedObject) {
        self.forgotten.lock().push(object);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("caps", &self.caps)
            .finish()
    }
}

/// Scoped ownership of a [`Context`]. Releases the context when the outermost lock drops.
pub struct ContextLock<'a> {
    context: &'a Context,
    guard: ReentrantMutexGuard<'a, ContextInner>,
}

impl<'a> ContextLock<'a> {
    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn id(&self) -> ContextId {
        self.context.id
    }

    pub fn caps(&self) -> &Capabilities {
        &self.context.caps
    }

    pub fn gl(&self) -> &dyn Gl {
        self.guard.native.gl()
    }

    /// Borrow of the state cache. Must not be held across a nested lock of the same context.
    pub fn state(&self) -> RefMut<ContextState> {
        RefMut::map(self.guard.data.borrow_mut(), |data| &mut data.state)
    }

    pub fn swap_buffers(&self) -> BackendResult<()> {
        self.guard.native.swap_buffers()
    }

    fn collect_garbage(&self) {
        let garbage = std::mem::take(&mut *self.context.garbage.lock());
        let forgotten = std::mem::take(&mut *self.context.forgotten.lock());
        if garbage.is_empty() && forgotten.is_empty() {
            return;
        }
        let gl = self.gl();
        let mut state = self.state();
        for object in forgotten {
            match object {
                SharedObject::Buffer(name) => state.buffer_deleted(name),
                SharedObject::Texture(name) => state.texture_deleted(name),
                SharedObject::Sampler(name) => state.sampler_deleted(name),
                SharedObject::Program(name) => {
                    if state.program() == Some(name) {
                        state.forget_program();
                    }
                }
            }
        }
        for object in garbage {
            match object {
                ContextObject::VertexArray(name) => {
                    state.vertex_array_deleted(name);
                    gl.delete_vertex_array(name);
                }
                ContextObject::Framebuffer(name) => {
                    state.framebuffer_deleted(name);
                    gl.delete_framebuffer(name);
                }
            }
        }
    }
}

impl<'a> Drop for ContextLock<'a> {
    fn drop(&mut self) {
        let mut data = self.guard.data.borrow_mut();
        data.depth -= 1;
        if data.depth == 0 {
            data.owner = None;
            self.guard.native.release_current();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        testing::{CallLog, RecordingContext},
        Capabilities, Context, ContextId, ContextObject, SharedObject,
    };

    fn context(log: &Arc<CallLog>) -> Context {
        Context::new(
            ContextId(0),
            Box::new(RecordingContext::with_log(log.clone())),
            Capabilities::from_version(4, 6),
        )
    }

    #[test]
    fn nested_lock_makes_current_once() {
        let log = Arc::new(CallLog::default());
        let context = context(&log);
        {
            let _outer = context.lock().unwrap();
            {
                let _inner = context.lock().unwrap();
            }
            assert_eq!(0, log.count("release_current"));
        }
        assert_eq!(vec!["make_current", "release_current"], log.names());
    }

    #[test]
    fn lock_from_other_thread_waits() {
        let log = Arc::new(CallLog::default());
        let context = Arc::new(context(&log));
        let lock = context.lock().unwrap();
        let other = context.clone();
        let handle = std::thread::spawn(move || {
            let _lock = other.lock().unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(1, log.count("make_current"));
        drop(lock);
        handle.join().unwrap();
        assert_eq!(2, log.count("make_current"));
    }

    #[test]
    fn deferred_objects_are_deleted_on_lock() {
        let log = Arc::new(CallLog::default());
        let context = context(&log);
        context.defer_delete(ContextObject::VertexArray(4));
        context.defer_delete(ContextObject::Framebuffer(5));
        let _lock = context.lock().unwrap();
        assert_eq!(1, log.count("delete_vertex_array"));
        assert_eq!(1, log.count("delete_framebuffer"));
    }

    #[test]
    fn forgotten_names_are_rebound() {
        let log = Arc::new(CallLog::default());
        let context = context(&log);
        {
            let lock = context.lock().unwrap();
            lock.state().bind_texture(lock.gl(), 0, gl::TEXTURE_2D, 7);
        }
        context.forget(SharedObject::Texture(7));
        let lock = context.lock().unwrap();
        lock.state().bind_texture(lock.gl(), 0, gl::TEXTURE_2D, 7);
        assert_eq!(2, log.count("bind_texture"));
    }
}
