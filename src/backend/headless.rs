//! Headless recording backend.
//!
//! This backend doesn't talk to a GPU. It keeps buffer contents in host
//! memory, tracks every resource it hands out, validates bindings against the
//! configured [`DeviceLimits`] and records the command stream so tests (and
//! tools without a display) can inspect exactly what a frame issued.

use std::collections::HashMap;
use std::ops::Range;

use crate::backend::release::Release;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::validate_framebuffer;

/// A command recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginFrame,
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: u64,
    },
    BindFramebuffer(Option<FramebufferHandle>),
    Clear {
        color: [f32; 4],
        depth: Option<f32>,
    },
    UseProgram(ProgramHandle),
    BindUniformRange {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    BindVertexBinding(VertexBindingHandle),
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
    },
    BlitDepthToSurface(FramebufferHandle),
    EndFrame,
}

/// Backend that records instead of rendering
#[derive(Debug)]
pub struct HeadlessBackend {
    limits: DeviceLimits,
    surface_size: (u32, u32),
    next_id: u64,
    in_frame: bool,

    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, TextureDescriptor>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    programs: HashMap<u64, ProgramDescriptor>,
    vertex_bindings: HashMap<u64, VertexBindingDescriptor>,

    commands: Vec<Command>,
    destroyed: Vec<Release>,
    invalid_destroys: usize,
    misaligned_bindings: usize,
    vertex_bindings_created: usize,
    frames_presented: u64,
    force_incomplete: bool,
}

impl HeadlessBackend {
    /// Create a headless backend with a default surface of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, DeviceLimits::default())
    }

    /// Create a headless backend reporting custom device limits
    pub fn with_limits(width: u32, height: u32, limits: DeviceLimits) -> Self {
        Self {
            limits,
            surface_size: (width.max(1), height.max(1)),
            next_id: 1,
            in_frame: false,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_bindings: HashMap::new(),
            commands: Vec::new(),
            destroyed: Vec::new(),
            invalid_destroys: 0,
            misaligned_bindings: 0,
            vertex_bindings_created: 0,
            frames_presented: 0,
            force_incomplete: false,
        }
    }

    /// Make every framebuffer report itself incomplete
    pub fn set_framebuffers_incomplete(&mut self, incomplete: bool) {
        self.force_incomplete = incomplete;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drain the recorded command stream
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Number of indexed draws recorded so far
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawIndexed { .. }))
            .count()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn framebuffer_descriptor(
        &self,
        framebuffer: FramebufferHandle,
    ) -> Option<&FramebufferDescriptor> {
        self.framebuffers.get(&framebuffer.0)
    }

    pub fn program_descriptor(&self, program: ProgramHandle) -> Option<&ProgramDescriptor> {
        self.programs.get(&program.0)
    }

    pub fn vertex_binding_descriptor(
        &self,
        binding: VertexBindingHandle,
    ) -> Option<&VertexBindingDescriptor> {
        self.vertex_bindings.get(&binding.0)
    }

    /// Resources created and not yet destroyed
    pub fn live_resource_count(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.framebuffers.len()
            + self.programs.len()
            + self.vertex_bindings.len()
    }

    /// Every successful destroy call, in order
    pub fn destroyed(&self) -> &[Release] {
        &self.destroyed
    }

    /// Destroy calls for handles that were unknown or already destroyed
    pub fn invalid_destroy_count(&self) -> usize {
        self.invalid_destroys
    }

    /// Uniform ranges bound at offsets violating the minimum alignment
    pub fn misaligned_binding_count(&self) -> usize {
        self.misaligned_bindings
    }

    pub fn vertex_bindings_created(&self) -> usize {
        self.vertex_bindings_created
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: Command) {
        if !self.in_frame {
            log::warn!("HeadlessBackend: {:?} recorded outside of a frame", command);
        }
        log::trace!("HeadlessBackend: {:?}", command);
        self.commands.push(command);
    }

    fn destroyed_ok(&mut self, removed: bool, release: Release) {
        if removed {
            self.destroyed.push(release);
        } else {
            log::warn!("HeadlessBackend: destroying unknown resource {:?}", release);
            self.invalid_destroys += 1;
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Headless".to_string(),
            backend: "Recording".to_string(),
            driver: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn surface_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn surface_depth_format(&self) -> TextureFormat {
        TextureFormat::Depth32Float
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let max = self.limits.max_texture_dimension;
            self.surface_size = (width.min(max), height.min(max));
        }
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        self.in_frame = true;
        self.record(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if !self.in_frame {
            return Err(BackendError::NoActiveFrame);
        }
        self.record(Command::EndFrame);
        self.in_frame = false;
        self.frames_presented += 1;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.allocate_id();
        self.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: desc.size.max(data.len() as u64),
            ..desc.clone()
        })?;
        if let Some(storage) = self.buffers.get_mut(&handle.0) {
            storage[..data.len()].copy_from_slice(data);
        }
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(storage) = self.buffers.get_mut(&buffer.0) else {
            log::error!("HeadlessBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            log::error!(
                "HeadlessBackend: write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                storage.len()
            );
            return;
        }
        storage[start..end].copy_from_slice(data);
        self.record(Command::WriteBuffer {
            buffer,
            offset,
            len: data.len() as u64,
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.limits.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        match self.textures.get(&texture.0) {
            Some(desc) if desc.width == width && desc.height == height => {
                let expected = (width * height * desc.format.bytes_per_pixel()) as usize;
                if data.len() != expected {
                    log::warn!(
                        "HeadlessBackend: texture upload of {} bytes, expected {}",
                        data.len(),
                        expected
                    );
                }
            }
            Some(desc) => log::error!(
                "HeadlessBackend: texture upload {}x{} into {}x{}",
                width,
                height,
                desc.width,
                desc.height
            ),
            None => log::error!("HeadlessBackend: upload to unknown texture {:?}", texture),
        }
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        let known = desc
            .color_attachments
            .iter()
            .chain(desc.depth_attachment.iter())
            .all(|t| self.textures.contains_key(&t.0));
        if !known {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "{:?} references an unknown texture",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        if self.force_incomplete {
            return FramebufferStatus::Incomplete("forced incomplete".to_string());
        }
        let Some(desc) = self.framebuffers.get(&framebuffer.0) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_string());
        };
        let describe = |t: &TextureHandle| {
            self.textures
                .get(&t.0)
                .map(|d| (d.format, d.width, d.height))
        };
        let colors: Option<Vec<_>> = desc.color_attachments.iter().map(describe).collect();
        let depth = desc.depth_attachment.as_ref().map(describe);
        match (colors, depth) {
            (Some(colors), None) => validate_framebuffer(&colors, None, &self.limits),
            (Some(colors), Some(Some(depth))) => {
                validate_framebuffer(&colors, Some(depth), &self.limits)
            }
            _ => FramebufferStatus::Incomplete("attachment was destroyed".to_string()),
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        if desc.source.trim().is_empty() {
            return Err(BackendError::ProgramCreationFailed(format!(
                "{}: empty source",
                desc.label
            )));
        }
        log::trace!("HeadlessBackend: creating program {}", desc.label);
        let id = self.allocate_id();
        self.programs.insert(id, desc.clone());
        Ok(ProgramHandle(id))
    }

    fn create_vertex_binding(
        &mut self,
        desc: &VertexBindingDescriptor,
    ) -> BackendResult<VertexBindingHandle> {
        if !self.programs.contains_key(&desc.program.0) {
            return Err(BackendError::VertexBindingCreationFailed(format!(
                "unknown program {:?}",
                desc.program
            )));
        }
        if !self.buffers.contains_key(&desc.vertex_buffer.0)
            || !self.buffers.contains_key(&desc.index_buffer.0)
        {
            return Err(BackendError::VertexBindingCreationFailed(
                "unknown vertex or index buffer".to_string(),
            ));
        }
        let id = self.allocate_id();
        self.vertex_bindings.insert(id, desc.clone());
        self.vertex_bindings_created += 1;
        Ok(VertexBindingHandle(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.record(Command::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self, color: [f32; 4], depth: Option<f32>) {
        self.record(Command::Clear { color, depth });
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.record(Command::UseProgram(program));
    }

    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64) {
        // Zero means no alignment requirement
        let alignment = self.limits.min_uniform_alignment.max(1);
        if offset % alignment != 0 {
            log::error!(
                "HeadlessBackend: uniform range at offset {} is not aligned to {}",
                offset,
                alignment
            );
            self.misaligned_bindings += 1;
        }
        let end = offset.saturating_add(size);
        match self.buffers.get(&buffer.0) {
            Some(storage) if end > storage.len() as u64 => log::error!(
                "HeadlessBackend: uniform range {}..{} exceeds buffer of {} bytes",
                offset,
                end,
                storage.len()
            ),
            None => log::error!("HeadlessBackend: binding unknown buffer {:?}", buffer),
            _ => {}
        }
        self.record(Command::BindUniformRange {
            slot,
            buffer,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.record(Command::BindTexture { unit, texture });
    }

    fn bind_vertex_binding(&mut self, binding: VertexBindingHandle) {
        self.record(Command::BindVertexBinding(binding));
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32) {
        self.record(Command::DrawIndexed {
            indices,
            base_vertex,
        });
    }

    fn blit_depth_to_surface(&mut self, framebuffer: FramebufferHandle) {
        self.record(Command::BlitDepthToSurface(framebuffer));
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let removed = self.buffers.remove(&buffer.0).is_some();
        self.destroyed_ok(removed, Release::Buffer(buffer));
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let removed = self.textures.remove(&texture.0).is_some();
        self.destroyed_ok(removed, Release::Texture(texture));
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let removed = self.framebuffers.remove(&framebuffer.0).is_some();
        self.destroyed_ok(removed, Release::Framebuffer(framebuffer));
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        let removed = self.programs.remove(&program.0).is_some();
        self.destroyed_ok(removed, Release::Program(program));
    }

    fn destroy_vertex_binding(&mut self, binding: VertexBindingHandle) {
        let removed = self.vertex_bindings.remove(&binding.0).is_some();
        self.destroyed_ok(removed, Release::VertexBinding(binding));
    }
}
