//! Multi-attachment render targets
//!
//! A render target owns its color attachments, one optional depth attachment
//! and the framebuffer object grouping them. Color slot `i` is wired to
//! fragment output `@location(i)` once, when the framebuffer is created.

use thiserror::Error;

use crate::backend::*;

#[derive(Error, Debug)]
pub enum RenderTargetError {
    #[error("Render target '{label}' is incomplete: {reason}")]
    Incomplete { label: String, reason: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Formats and size of a render target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    pub label: String,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub width: u32,
    pub height: u32,
}

impl RenderTargetDescriptor {
    /// `count` 8-bit color slots plus a 32-bit float depth attachment
    pub fn with_color_slots(count: usize, width: u32, height: u32) -> Self {
        Self {
            label: "Render Target".to_string(),
            color_formats: vec![TextureFormat::Rgba8Unorm; count],
            depth_format: Some(TextureFormat::Depth32Float),
            width,
            height,
        }
    }
}

struct Attachments {
    colors: Vec<GpuResource<TextureHandle>>,
    depth: Option<GpuResource<TextureHandle>>,
    framebuffer: GpuResource<FramebufferHandle>,
    status: FramebufferStatus,
}

/// Off-screen color + depth target
pub struct RenderTarget {
    desc: RenderTargetDescriptor,
    attachments: Attachments,
    queue: ReleaseQueue,
}

impl RenderTarget {
    /// Allocate every attachment and validate the result.
    ///
    /// An incomplete target is logged and returned anyway; it refuses
    /// [`bind_for_write`](Self::bind_for_write) until a resize fixes it.
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        desc: RenderTargetDescriptor,
    ) -> Result<Self, RenderTargetError> {
        let attachments = Self::allocate(backend, queue, &desc, desc.width, desc.height)?;
        Ok(Self {
            desc,
            attachments,
            queue: queue.clone(),
        })
    }

    fn allocate<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        desc: &RenderTargetDescriptor,
        width: u32,
        height: u32,
    ) -> Result<Attachments, RenderTargetError> {
        let usage = TextureUsage::RENDER_ATTACHMENT
            | TextureUsage::TEXTURE_BINDING
            | TextureUsage::COPY_SRC;

        let mut colors = Vec::with_capacity(desc.color_formats.len());
        for (slot, &format) in desc.color_formats.iter().enumerate() {
            let handle = backend.create_texture(&TextureDescriptor {
                label: Some(format!("{} Color {}", desc.label, slot)),
                width,
                height,
                format,
                usage,
            })?;
            colors.push(GpuResource::new(handle, queue));
        }

        let depth = match desc.depth_format {
            Some(format) => {
                let handle = backend.create_texture(&TextureDescriptor {
                    label: Some(format!("{} Depth", desc.label)),
                    width,
                    height,
                    format,
                    usage,
                })?;
                Some(GpuResource::new(handle, queue))
            }
            None => None,
        };

        let framebuffer = backend.create_framebuffer(&FramebufferDescriptor {
            label: Some(desc.label.clone()),
            color_attachments: colors.iter().map(GpuResource::handle).collect(),
            depth_attachment: depth.as_ref().map(GpuResource::handle),
        })?;
        let framebuffer = GpuResource::new(framebuffer, queue);

        let status = backend.framebuffer_status(framebuffer.handle());
        match &status {
            FramebufferStatus::Complete => log::debug!(
                "Render target '{}' allocated: {} color slots at {}x{}",
                desc.label,
                colors.len(),
                width,
                height
            ),
            FramebufferStatus::Incomplete(reason) => {
                log::error!("Render target '{}' is incomplete: {}", desc.label, reason)
            }
        }

        Ok(Attachments {
            colors,
            depth,
            framebuffer,
            status,
        })
    }

    /// Free every attachment and reallocate at the new size.
    pub fn resize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<(), RenderTargetError> {
        let (width, height) = (width.max(1), height.max(1));
        self.attachments = Self::allocate(backend, &self.queue, &self.desc, width, height)?;
        self.desc.width = width;
        self.desc.height = height;
        Ok(())
    }

    /// Redirect subsequent draws into this target
    pub fn bind_for_write<B: GraphicsBackend>(
        &self,
        backend: &mut B,
    ) -> Result<(), RenderTargetError> {
        if let FramebufferStatus::Incomplete(reason) = &self.attachments.status {
            return Err(RenderTargetError::Incomplete {
                label: self.desc.label.clone(),
                reason: reason.clone(),
            });
        }
        backend.bind_framebuffer(Some(self.attachments.framebuffer.handle()));
        Ok(())
    }

    /// Restore the default surface as the draw target
    pub fn unbind<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.bind_framebuffer(None);
    }

    /// Bind color slot `i` for sampling at texture unit `unit_base + i`
    pub fn bind_color_for_read<B: GraphicsBackend>(&self, backend: &mut B, unit_base: u32) {
        for (i, color) in self.attachments.colors.iter().enumerate() {
            backend.bind_texture(unit_base + i as u32, color.handle());
        }
    }

    /// Bind the depth attachment for sampling at `unit`
    pub fn bind_depth_for_read<B: GraphicsBackend>(&self, backend: &mut B, unit: u32) {
        match &self.attachments.depth {
            Some(depth) => backend.bind_texture(unit, depth.handle()),
            None => log::warn!("Render target '{}' has no depth to read", self.desc.label),
        }
    }

    pub fn descriptor(&self) -> &RenderTargetDescriptor {
        &self.desc
    }

    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub fn color_slot_count(&self) -> usize {
        self.attachments.colors.len()
    }

    pub fn color_attachment(&self, slot: usize) -> Option<TextureHandle> {
        self.attachments.colors.get(slot).map(GpuResource::handle)
    }

    pub fn depth_attachment(&self) -> Option<TextureHandle> {
        self.attachments.depth.as_ref().map(GpuResource::handle)
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.attachments.framebuffer.handle()
    }

    pub fn status(&self) -> &FramebufferStatus {
        &self.attachments.status
    }

    pub fn is_complete(&self) -> bool {
        self.attachments.status.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};

    fn target(backend: &mut HeadlessBackend, queue: &ReleaseQueue) -> RenderTarget {
        RenderTarget::create(
            backend,
            queue,
            RenderTargetDescriptor::with_color_slots(3, 800, 600),
        )
        .unwrap()
    }

    #[test]
    fn test_create_allocates_slots_and_depth() {
        let mut backend = HeadlessBackend::new(800, 600);
        let queue = ReleaseQueue::new();
        let target = target(&mut backend, &queue);

        assert!(target.is_complete());
        assert_eq!(target.color_slot_count(), 3);
        let depth = target.depth_attachment().unwrap();
        assert!(backend.texture_descriptor(depth).unwrap().format.is_depth());
        let framebuffer = backend.framebuffer_descriptor(target.framebuffer()).unwrap();
        assert_eq!(framebuffer.color_attachments.len(), 3);
    }

    #[test]
    fn test_resize_reallocates_every_attachment() {
        let mut backend = HeadlessBackend::new(800, 600);
        let queue = ReleaseQueue::new();
        let mut target = target(&mut backend, &queue);
        let old_color = target.color_attachment(0).unwrap();

        target.resize(&mut backend, 1024, 512).unwrap();
        assert_eq!(queue.flush(&mut backend), 5);

        assert_eq!(target.size(), (1024, 512));
        assert_eq!(target.color_slot_count(), 3);
        assert!(backend.texture_descriptor(old_color).is_none());
        let handles = (0..3)
            .filter_map(|i| target.color_attachment(i))
            .chain(target.depth_attachment());
        for handle in handles {
            let desc = backend.texture_descriptor(handle).unwrap();
            assert_eq!((desc.width, desc.height), (1024, 512));
        }
        assert!(target.is_complete());
    }

    #[test]
    fn test_incomplete_target_refuses_write_binding() {
        let mut backend = HeadlessBackend::new(800, 600);
        backend.set_framebuffers_incomplete(true);
        let queue = ReleaseQueue::new();
        let target = target(&mut backend, &queue);

        assert!(!target.is_complete());
        assert!(matches!(
            target.bind_for_write(&mut backend),
            Err(RenderTargetError::Incomplete { .. })
        ));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_bind_for_read_uses_consecutive_units() {
        let mut backend = HeadlessBackend::new(800, 600);
        let queue = ReleaseQueue::new();
        let target = target(&mut backend, &queue);
        backend.begin_frame().unwrap();
        backend.take_commands();

        target.bind_color_for_read(&mut backend, 0);
        target.bind_depth_for_read(&mut backend, 3);

        let units: Vec<u32> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BindTexture { unit, .. } => Some(*unit),
                _ => None,
            })
            .collect();
        assert_eq!(units, vec![0, 1, 2, 3]);
    }
}
