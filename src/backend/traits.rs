//! Core backend abstraction traits
//!
//! The frame pipeline talks to the GPU through a small, handle-based command
//! interface: resources are created up front and referred to by opaque
//! handles, and drawing is expressed as bind/draw commands against the
//! currently bound framebuffer. Both the wgpu backend and the headless
//! recording backend implement it.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create program: {0}")]
    ProgramCreationFailed(String),
    #[error("Failed to create vertex binding: {0}")]
    VertexBindingCreationFailed(String),
    #[error("Frame not started")]
    NoActiveFrame,
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a framebuffer object grouping texture attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u64);

/// Handle to a vertex-input object wiring buffers to one program's inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexBindingHandle(pub(crate) u64);

/// Framebuffer descriptor
///
/// Color attachment `i` receives fragment output `@location(i)`; the mapping is
/// fixed when the framebuffer is created.
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<TextureHandle>,
    pub depth_attachment: Option<TextureHandle>,
}

/// A texture unit declared by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUnit {
    pub unit: u32,
    pub sample_type: TextureSampleType,
}

/// Program descriptor
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    /// WGSL source containing both stages
    pub source: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Uniform binding slots the program reads
    pub uniform_slots: Vec<u32>,
    pub texture_units: Vec<TextureUnit>,
    /// Whether the program samples through the default filtering sampler
    pub uses_sampler: bool,
    pub color_formats: Vec<TextureFormat>,
    pub depth: Option<DepthState>,
    pub primitive_topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
}

impl ProgramDescriptor {
    pub fn new(label: &str, source: &str) -> Self {
        Self {
            label: label.to_string(),
            source: source.to_string(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: "fs_main".to_string(),
            uniform_slots: Vec::new(),
            texture_units: Vec::new(),
            uses_sampler: false,
            color_formats: Vec::new(),
            depth: None,
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
        }
    }
}

/// Vertex binding descriptor
///
/// `layout` only carries the attributes wired to the program's active
/// locations, with the mesh's original stride and offsets.
#[derive(Debug, Clone)]
pub struct VertexBindingDescriptor {
    pub label: Option<String>,
    pub program: ProgramHandle,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_format: IndexFormat,
    pub layout: VertexBufferLayout,
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Describe the selected device
    fn device_info(&self) -> DeviceInfo;

    /// Limits the frame pipeline sizes its resources against
    fn limits(&self) -> DeviceLimits;

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Color format of the default surface
    fn surface_format(&self) -> TextureFormat;

    /// Depth format of the default surface
    fn surface_depth_format(&self) -> TextureFormat;

    /// Resize the default surface and its depth buffer
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<()>;

    /// Submit recorded work and present the frame
    fn end_frame(&mut self) -> BackendResult<()>;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Write RGBA8 data to a texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    /// Group textures into a framebuffer
    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor)
        -> BackendResult<FramebufferHandle>;

    /// Validate a framebuffer's attachments
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;

    /// Compile and link a program
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Create a vertex-input object for one program
    fn create_vertex_binding(
        &mut self,
        desc: &VertexBindingDescriptor,
    ) -> BackendResult<VertexBindingHandle>;

    // Command recording

    /// Redirect subsequent draws to `framebuffer`, or the default surface on `None`
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Clear the bound framebuffer's color attachments, and depth when given
    fn clear(&mut self, color: [f32; 4], depth: Option<f32>);

    /// Make `program` current
    fn use_program(&mut self, program: ProgramHandle);

    /// Bind `size` bytes of `buffer` starting at `offset` to a uniform slot
    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64);

    /// Bind a texture for sampling at a texture unit
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// Bind a vertex-input object
    fn bind_vertex_binding(&mut self, binding: VertexBindingHandle);

    /// Draw indexed primitives with the current state
    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, base_vertex: i32);

    /// Copy a framebuffer's depth attachment into the default surface depth
    fn blit_depth_to_surface(&mut self, framebuffer: FramebufferHandle);

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy a framebuffer object (not its attachments)
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Destroy a program
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Destroy a vertex-input object
    fn destroy_vertex_binding(&mut self, binding: VertexBindingHandle);
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}
