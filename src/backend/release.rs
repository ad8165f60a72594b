//! Owned backend handles
//!
//! A [`GpuResource`] owns exactly one backend handle. Dropping it does not
//! touch the backend directly (the backend is usually borrowed elsewhere);
//! instead the handle is pushed onto the [`ReleaseQueue`] it was created
//! with, and the renderer drains that queue into the backend between frames
//! and on shutdown. Because `GpuResource` is not `Clone`, every handle is
//! released exactly once.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::*;

/// A backend resource waiting to be destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
    Program(ProgramHandle),
    VertexBinding(VertexBindingHandle),
}

impl Release {
    fn apply<B: GraphicsBackend>(self, backend: &mut B) {
        match self {
            Release::Buffer(h) => backend.destroy_buffer(h),
            Release::Texture(h) => backend.destroy_texture(h),
            Release::Framebuffer(h) => backend.destroy_framebuffer(h),
            Release::Program(h) => backend.destroy_program(h),
            Release::VertexBinding(h) => backend.destroy_vertex_binding(h),
        }
    }

    /// Vertex bindings reference programs and buffers and framebuffers
    /// reference textures, so dependents are destroyed first.
    fn order(&self) -> u8 {
        match self {
            Release::VertexBinding(_) => 0,
            Release::Framebuffer(_) => 1,
            Release::Program(_) => 2,
            Release::Buffer(_) => 3,
            Release::Texture(_) => 3,
        }
    }
}

/// Handle types that can be owned by a [`GpuResource`]
pub trait BackendHandle: Copy + std::fmt::Debug {
    fn release(self) -> Release;
}

impl BackendHandle for BufferHandle {
    fn release(self) -> Release {
        Release::Buffer(self)
    }
}

impl BackendHandle for TextureHandle {
    fn release(self) -> Release {
        Release::Texture(self)
    }
}

impl BackendHandle for FramebufferHandle {
    fn release(self) -> Release {
        Release::Framebuffer(self)
    }
}

impl BackendHandle for ProgramHandle {
    fn release(self) -> Release {
        Release::Program(self)
    }
}

impl BackendHandle for VertexBindingHandle {
    fn release(self) -> Release {
        Release::VertexBinding(self)
    }
}

/// Shared list of handles whose owners have been dropped
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue {
    pending: Arc<Mutex<Vec<Release>>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, release: Release) {
        self.pending.lock().push(release);
    }

    /// Number of handles waiting to be destroyed
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Destroy every pending handle, returning how many were released
    pub fn flush<B: GraphicsBackend>(&self, backend: &mut B) -> usize {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        pending.sort_by_key(Release::order);

        let count = pending.len();
        for release in pending {
            log::trace!("Releasing {:?}", release);
            release.apply(backend);
        }
        count
    }
}

/// Exclusive owner of a backend handle
#[derive(Debug)]
pub struct GpuResource<H: BackendHandle> {
    handle: H,
    queue: ReleaseQueue,
}

impl<H: BackendHandle> GpuResource<H> {
    pub fn new(handle: H, queue: &ReleaseQueue) -> Self {
        Self {
            handle,
            queue: queue.clone(),
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }
}

impl<H: BackendHandle> Drop for GpuResource<H> {
    fn drop(&mut self) {
        self.queue.push(self.handle.release());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::backend::types::*;

    fn buffer(backend: &mut HeadlessBackend) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap()
    }

    #[test]
    fn test_drop_queues_release() {
        let mut backend = HeadlessBackend::new(64, 64);
        let queue = ReleaseQueue::new();
        let owned = GpuResource::new(buffer(&mut backend), &queue);
        assert!(queue.is_empty());

        drop(owned);
        assert_eq!(queue.len(), 1);
        assert_eq!(backend.live_resource_count(), 1);

        assert_eq!(queue.flush(&mut backend), 1);
        assert_eq!(backend.live_resource_count(), 0);
        assert_eq!(backend.invalid_destroy_count(), 0);
    }

    #[test]
    fn test_flush_is_exactly_once() {
        let mut backend = HeadlessBackend::new(64, 64);
        let queue = ReleaseQueue::new();
        let owned = GpuResource::new(buffer(&mut backend), &queue);
        drop(owned);

        queue.flush(&mut backend);
        assert_eq!(queue.flush(&mut backend), 0);
        assert_eq!(backend.invalid_destroy_count(), 0);
    }

    #[test]
    fn test_flush_orders_dependents_first() {
        let mut backend = HeadlessBackend::new(64, 64);
        let queue = ReleaseQueue::new();
        let texture = backend
            .create_texture(&TextureDescriptor::default())
            .unwrap();
        let framebuffer = backend
            .create_framebuffer(&FramebufferDescriptor {
                label: None,
                color_attachments: vec![texture],
                depth_attachment: None,
            })
            .unwrap();

        drop(GpuResource::new(texture, &queue));
        drop(GpuResource::new(framebuffer, &queue));
        queue.flush(&mut backend);

        let destroyed = backend.destroyed();
        assert_eq!(destroyed[0], Release::Framebuffer(framebuffer));
        assert_eq!(destroyed[1], Release::Texture(texture));
    }
}
