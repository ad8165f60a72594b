//! wgpu backend implementation
//!
//! The frame pipeline speaks in bind/clear/draw commands against whatever
//! framebuffer is currently bound. wgpu wants explicit render passes with
//! pipelines and bind groups, so commands are buffered into a pending pass
//! (each draw snapshots the bound state) and the pass is encoded when the
//! target changes, a depth blit is requested or the frame ends. A vertex
//! binding owns the render pipeline built for its program and mesh layout.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::validate_framebuffer;

const UNIFORM_GROUP: usize = 0;
const TEXTURE_GROUP: usize = 1;
const SAMPLER_GROUP: usize = 2;

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct ProgramEntry {
    desc: ProgramDescriptor,
    shader: wgpu::ShaderModule,
    layouts: [wgpu::BindGroupLayout; 3],
    pipeline_layout: wgpu::PipelineLayout,
}

struct VertexBindingEntry {
    program: u64,
    pipeline: wgpu::RenderPipeline,
    vertex_buffer: u64,
    index_buffer: u64,
    index_format: wgpu::IndexFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BindResource {
    Buffer { id: u64, offset: u64, size: u64 },
    Texture(u64),
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindGroupKey {
    program: u64,
    group: usize,
    entries: Vec<(u32, BindResource)>,
}

/// State captured when a draw is recorded
struct DrawCall {
    program: u64,
    binding: u64,
    uniforms: BTreeMap<u32, (u64, u64, u64)>,
    textures: BTreeMap<u32, u64>,
    indices: Range<u32>,
    base_vertex: i32,
}

/// Draws buffered against one target, `None` being the surface
struct PendingPass {
    target: Option<u64>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    draws: Vec<DrawCall>,
}

#[derive(Default)]
struct BoundState {
    framebuffer: Option<u64>,
    program: Option<u64>,
    binding: Option<u64>,
    uniforms: BTreeMap<u32, (u64, u64, u64)>,
    textures: BTreeMap<u32, u64>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    surface_depth: TextureEntry,
    sampler: wgpu::Sampler,

    current_texture: Option<wgpu::SurfaceTexture>,
    current_view: Option<wgpu::TextureView>,
    encoder: Option<wgpu::CommandEncoder>,

    // Resource storage
    next_id: u64,
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, TextureEntry>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    programs: HashMap<u64, ProgramEntry>,
    vertex_bindings: HashMap<u64, VertexBindingEntry>,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,

    bound: BoundState,
    pending: Option<PendingPass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> TextureFormat {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
            wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
            wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
            wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24PlusStencil8,
            _ => TextureFormat::Rgba8Unorm,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
            VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }

    fn convert_sample_type(sample_type: TextureSampleType) -> wgpu::TextureSampleType {
        match sample_type {
            TextureSampleType::Float { filterable } => wgpu::TextureSampleType::Float { filterable },
            TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
        }
    }

    /// Clamp to device limits while maintaining aspect ratio
    fn clamp_surface_size(width: u32, height: u32, max_size: u32) -> (u32, u32) {
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            let new_width = ((width as f32 * scale) as u32).max(1);
            let new_height = ((height as f32 * scale) as u32).max(1);
            (new_width, new_height)
        } else {
            (width.max(1), height.max(1))
        }
    }

    fn create_texture_entry(device: &wgpu::Device, desc: &TextureDescriptor) -> TextureEntry {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        TextureEntry {
            texture,
            view,
            desc: desc.clone(),
        }
    }

    fn surface_depth_descriptor(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor {
            label: Some("Surface Depth".into()),
            width,
            height,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` inside a validation error scope, turning a captured error into `Err`
    fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }
}

impl WgpuBackend {
    /// Create a backend rendering into `window`
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("surface reports no formats".into())
            })?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let (width, height) = Self::clamp_surface_size(
            size.width,
            size.height,
            device.limits().max_texture_dimension_2d,
        );

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &surface_config);

        let surface_depth =
            Self::create_texture_entry(&device, &Self::surface_depth_descriptor(width, height));
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Default Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            surface_depth,
            sampler,
            current_texture: None,
            current_view: None,
            encoder: None,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_bindings: HashMap::new(),
            bind_groups: HashMap::new(),
            bound: BoundState::default(),
            pending: None,
        })
    }

    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        // On Windows, try Vulkan first to avoid D3D12 debug layer validation errors
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::Backends::all()
        } else {
            #[cfg(target_os = "windows")]
            {
                wgpu::Backends::VULKAN
            }
            #[cfg(not(target_os = "windows"))]
            {
                wgpu::Backends::all()
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;

        // If no adapter found with preferred backend, try with all backends
        let (instance, surface, adapter) = if adapter.is_none() && backends != wgpu::Backends::all()
        {
            log::warn!("Preferred backend not available, falling back to all backends");
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let surface = instance
                .create_surface(window.clone())
                .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    BackendError::InitializationFailed("No suitable adapter found".into())
                })?;
            (instance, surface, adapter)
        } else {
            let adapter = adapter.ok_or_else(|| {
                BackendError::InitializationFailed("No suitable adapter found".into())
            })?;
            (instance, surface, adapter)
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Frame Pipeline Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }
}

// Pass recording
impl WgpuBackend {
    fn pending_pass(&mut self) -> &mut PendingPass {
        let target = self.bound.framebuffer;
        self.pending.get_or_insert_with(|| PendingPass {
            target,
            clear_color: None,
            clear_depth: None,
            draws: Vec::new(),
        })
    }

    /// Bind group keys for a draw, or `None` when the program reads
    /// something that isn't bound
    fn bind_group_keys(&self, draw: &DrawCall) -> Option<[BindGroupKey; 3]> {
        let program = self.programs.get(&draw.program)?;

        let mut uniforms = Vec::with_capacity(program.desc.uniform_slots.len());
        for &slot in &program.desc.uniform_slots {
            let Some(&(id, offset, size)) = draw.uniforms.get(&slot) else {
                log::error!(
                    "Program '{}' reads uniform slot {} but nothing is bound there",
                    program.desc.label,
                    slot
                );
                return None;
            };
            uniforms.push((slot, BindResource::Buffer { id, offset, size }));
        }

        let mut textures = Vec::with_capacity(program.desc.texture_units.len());
        for unit in &program.desc.texture_units {
            let Some(&id) = draw.textures.get(&unit.unit) else {
                log::error!(
                    "Program '{}' samples texture unit {} but nothing is bound there",
                    program.desc.label,
                    unit.unit
                );
                return None;
            };
            textures.push((unit.unit, BindResource::Texture(id)));
        }

        let samplers = if program.desc.uses_sampler {
            vec![(0, BindResource::Sampler)]
        } else {
            Vec::new()
        };

        let key = |group, entries| BindGroupKey {
            program: draw.program,
            group,
            entries,
        };
        Some([
            key(UNIFORM_GROUP, uniforms),
            key(TEXTURE_GROUP, textures),
            key(SAMPLER_GROUP, samplers),
        ])
    }

    fn ensure_bind_group(&mut self, key: &BindGroupKey) -> bool {
        if self.bind_groups.contains_key(key) {
            return true;
        }
        let Some(program) = self.programs.get(&key.program) else {
            return false;
        };

        let mut entries = Vec::with_capacity(key.entries.len());
        for &(binding, resource) in &key.entries {
            let resource = match resource {
                BindResource::Buffer { id, offset, size } => {
                    let Some(buffer) = self.buffers.get(&id) else {
                        log::error!("Uniform range references destroyed buffer {}", id);
                        return false;
                    };
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset,
                        size: NonZeroU64::new(size),
                    })
                }
                BindResource::Texture(id) => {
                    let Some(texture) = self.textures.get(&id) else {
                        log::error!("Texture unit references destroyed texture {}", id);
                        return false;
                    };
                    wgpu::BindingResource::TextureView(&texture.view)
                }
                BindResource::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
            };
            entries.push(wgpu::BindGroupEntry { binding, resource });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.desc.label.as_str()),
            layout: &program.layouts[key.group],
            entries: &entries,
        });
        self.bind_groups.insert(key.clone(), bind_group);
        true
    }

    /// Encode the pending pass into the frame's command encoder
    fn flush_pass(&mut self) {
        let Some(pass) = self.pending.take() else {
            return;
        };
        let Some(mut encoder) = self.encoder.take() else {
            log::warn!("Dropping {} draws recorded outside of a frame", pass.draws.len());
            return;
        };

        let mut resolved = Vec::with_capacity(pass.draws.len());
        for draw in &pass.draws {
            let keys = self
                .bind_group_keys(draw)
                .filter(|keys| keys.iter().all(|k| self.ensure_bind_group(k)));
            resolved.push(keys);
        }

        self.encode_pass(&mut encoder, &pass, &resolved);
        self.encoder = Some(encoder);
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PendingPass,
        resolved: &[Option<[BindGroupKey; 3]>],
    ) {
        let (color_views, depth_view): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) =
            match pass.target {
                Some(framebuffer) => {
                    let Some(desc) = self.framebuffers.get(&framebuffer) else {
                        log::error!("Pass targets destroyed framebuffer {}", framebuffer);
                        return;
                    };
                    let colors = desc
                        .color_attachments
                        .iter()
                        .filter_map(|t| self.textures.get(&t.0).map(|e| &e.view))
                        .collect();
                    let depth = desc
                        .depth_attachment
                        .and_then(|t| self.textures.get(&t.0).map(|e| &e.view));
                    (colors, depth)
                }
                None => {
                    let Some(view) = self.current_view.as_ref() else {
                        log::error!("Surface pass recorded without an acquired image");
                        return;
                    };
                    (vec![view], Some(&self.surface_depth.view))
                }
            };

        let color_load = match pass.clear_color {
            Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                r: c[0] as f64,
                g: c[1] as f64,
                b: c[2] as f64,
                a: c[3] as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
            .into_iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let depth_attachment = depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: match pass.clear_depth {
                    Some(depth) => wgpu::LoadOp::Clear(depth),
                    None => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(if pass.target.is_some() {
                "Framebuffer Pass"
            } else {
                "Surface Pass"
            }),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for (draw, keys) in pass.draws.iter().zip(resolved) {
            let Some(keys) = keys else {
                continue;
            };
            let Some(binding) = self.vertex_bindings.get(&draw.binding) else {
                continue;
            };
            let (Some(vertices), Some(indices)) = (
                self.buffers.get(&binding.vertex_buffer),
                self.buffers.get(&binding.index_buffer),
            ) else {
                continue;
            };

            render_pass.set_pipeline(&binding.pipeline);
            for (index, key) in keys.iter().enumerate() {
                if let Some(bind_group) = self.bind_groups.get(key) {
                    render_pass.set_bind_group(index as u32, bind_group, &[]);
                }
            }
            render_pass.set_vertex_buffer(0, vertices.slice(..));
            render_pass.set_index_buffer(indices.slice(..), binding.index_format);
            render_pass.draw_indexed(draw.indices.clone(), draw.base_vertex, 0..1);
        }
    }

    fn purge_bind_groups(&mut self, stale: impl Fn(&BindGroupKey) -> bool) {
        self.bind_groups.retain(|key, _| !stale(key));
    }
}

impl GraphicsBackend for WgpuBackend {
    fn device_info(&self) -> DeviceInfo {
        let info = self.adapter.get_info();
        DeviceInfo {
            name: info.name,
            backend: format!("{:?}", info.backend),
            driver: format!("{} {}", info.driver, info.driver_info),
        }
    }

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            min_uniform_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            max_uniform_block_size: limits.max_uniform_buffer_binding_size as u64,
            max_color_attachments: limits.max_color_attachments,
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn surface_format(&self) -> TextureFormat {
        Self::convert_texture_format_back(self.surface_config.format)
    }

    fn surface_depth_format(&self) -> TextureFormat {
        self.surface_depth.desc.format
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let (width, height) = Self::clamp_surface_size(
                width,
                height,
                self.device.limits().max_texture_dimension_2d,
            );
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
            self.surface_depth = Self::create_texture_entry(
                &self.device,
                &Self::surface_depth_descriptor(width, height),
            );
        }
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        let output = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            _ => BackendError::AcquireImageFailed(e.to_string()),
        })?;

        self.current_view = Some(
            output
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        );
        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
        self.bound = BoundState::default();
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.current_texture.is_none() {
            return Err(BackendError::NoActiveFrame);
        }
        self.flush_pass();

        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }

        self.current_view = None;
        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }

        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: data,
                usage: Self::convert_buffer_usage(desc.usage),
            });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get(&buffer.0) {
            Some(buf) => self.queue.write_buffer(buf, offset, data),
            None => log::error!("Write to unknown buffer {:?}", buffer),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        let entry = Self::create_texture_entry(&self.device, desc);
        let id = self.allocate_id();
        self.textures.insert(id, entry);
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(entry) = self.textures.get(&texture.0) else {
            log::error!("Upload to unknown texture {:?}", texture);
            return;
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * entry.desc.format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
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
        let Some(desc) = self.framebuffers.get(&framebuffer.0) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_string());
        };
        let describe = |t: &TextureHandle| {
            self.textures
                .get(&t.0)
                .map(|e| (e.desc.format, e.desc.width, e.desc.height))
        };
        let colors: Option<Vec<_>> = desc.color_attachments.iter().map(describe).collect();
        let depth = desc.depth_attachment.as_ref().map(describe);
        match (colors, depth) {
            (Some(colors), None) => validate_framebuffer(&colors, None, &self.limits()),
            (Some(colors), Some(Some(depth))) => {
                validate_framebuffer(&colors, Some(depth), &self.limits())
            }
            _ => FramebufferStatus::Incomplete("attachment was destroyed".to_string()),
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let shader = self
            .validated(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label.as_str()),
                    source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
                })
            })
            .map_err(|e| BackendError::ProgramCreationFailed(format!("{}: {}", desc.label, e)))?;

        let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .uniform_slots
            .iter()
            .map(|&slot| wgpu::BindGroupLayoutEntry {
                binding: slot,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .texture_units
            .iter()
            .map(|unit| wgpu::BindGroupLayoutEntry {
                binding: unit.unit,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: Self::convert_sample_type(unit.sample_type),
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        let sampler_entries: Vec<wgpu::BindGroupLayoutEntry> = if desc.uses_sampler {
            vec![wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            }]
        } else {
            Vec::new()
        };

        let layout = |entries: &[wgpu::BindGroupLayoutEntry]| {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(desc.label.as_str()),
                    entries,
                })
        };
        let layouts = [
            layout(&uniform_entries),
            layout(&texture_entries),
            layout(&sampler_entries),
        ];

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label.as_str()),
                bind_group_layouts: &[&layouts[0], &layouts[1], &layouts[2]],
                push_constant_ranges: &[],
            });

        let id = self.allocate_id();
        self.programs.insert(
            id,
            ProgramEntry {
                desc: desc.clone(),
                shader,
                layouts,
                pipeline_layout,
            },
        );
        Ok(ProgramHandle(id))
    }

    fn create_vertex_binding(
        &mut self,
        desc: &VertexBindingDescriptor,
    ) -> BackendResult<VertexBindingHandle> {
        let program = self.programs.get(&desc.program.0).ok_or_else(|| {
            BackendError::VertexBindingCreationFailed(format!("unknown program {:?}", desc.program))
        })?;
        if !self.buffers.contains_key(&desc.vertex_buffer.0)
            || !self.buffers.contains_key(&desc.index_buffer.0)
        {
            return Err(BackendError::VertexBindingCreationFailed(
                "unknown vertex or index buffer".into(),
            ));
        }

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: desc.layout.array_stride,
            step_mode: match desc.layout.step_mode {
                VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
            },
            attributes: &attributes,
        }];

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = program
            .desc
            .color_formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let index_format = Self::convert_index_format(desc.index_format);
        let topology = match program.desc.primitive_topology {
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        };
        let primitive = wgpu::PrimitiveState {
            topology,
            strip_index_format: (topology == wgpu::PrimitiveTopology::TriangleStrip)
                .then_some(index_format),
            front_face: match program.desc.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match program.desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let depth_stencil = program.desc.depth.map(|ds| wgpu::DepthStencilState {
            format: Self::convert_texture_format(ds.format),
            depth_write_enabled: ds.write_enabled,
            depth_compare: Self::convert_compare_function(ds.compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .validated(|device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: desc.label.as_deref(),
                    layout: Some(&program.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &program.shader,
                        entry_point: &program.desc.vertex_entry,
                        buffers: &vertex_buffers,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &program.shader,
                        entry_point: &program.desc.fragment_entry,
                        targets: &color_targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive,
                    depth_stencil,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                })
            })
            .map_err(|e| {
                BackendError::VertexBindingCreationFailed(format!("{}: {}", program.desc.label, e))
            })?;

        let entry = VertexBindingEntry {
            program: desc.program.0,
            pipeline,
            vertex_buffer: desc.vertex_buffer.0,
            index_buffer: desc.index_buffer.0,
            index_format,
        };
        let id = self.allocate_id();
        self.vertex_bindings.insert(id, entry);
        Ok(VertexBindingHandle(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.flush_pass();
        self.bound.framebuffer = framebuffer.map(|f| f.0);
    }

    fn clear(&mut self, color: [f32; 4], depth: Option<f32>) {
        // A clear after draws can't become a load op of the same pass
        if self.pending.as_ref().is_some_and(|p| !p.draws.is_empty()) {
            self.flush_pass();
        }
        let pass = self.pending_pass();
        pass.clear_color = Some(color);
        pass.clear_depth = depth.or(pass.clear_depth);
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.bound.program = Some(program.0);
    }

    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64) {
        self.bound.uniforms.insert(slot, (buffer.0, offset, size));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.bound.textures.insert(unit, texture.0);
    }

    fn bind_vertex_binding(&mut self, binding: VertexBindingHandle) {
        self.bound.binding = Some(binding.0);
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32) {
        let (Some(program), Some(binding)) = (self.bound.program, self.bound.binding) else {
            log::warn!("Draw issued without a program and vertex binding");
            return;
        };
        if self
            .vertex_bindings
            .get(&binding)
            .is_some_and(|b| b.program != program)
        {
            log::error!(
                "Vertex binding {} was built for another program than {}",
                binding,
                program
            );
            return;
        }
        let draw = DrawCall {
            program,
            binding,
            uniforms: self.bound.uniforms.clone(),
            textures: self.bound.textures.clone(),
            indices,
            base_vertex,
        };
        self.pending_pass().draws.push(draw);
    }

    fn blit_depth_to_surface(&mut self, framebuffer: FramebufferHandle) {
        self.flush_pass();

        let Some(source) = self
            .framebuffers
            .get(&framebuffer.0)
            .and_then(|fb| fb.depth_attachment)
            .and_then(|t| self.textures.get(&t.0))
        else {
            log::warn!("Framebuffer {:?} has no depth attachment to blit", framebuffer);
            return;
        };
        let destination = &self.surface_depth;
        if (source.desc.width, source.desc.height)
            != (destination.desc.width, destination.desc.height)
            || source.desc.format != destination.desc.format
        {
            log::warn!(
                "Skipping depth blit: {}x{} {:?} into {}x{} {:?}",
                source.desc.width,
                source.desc.height,
                source.desc.format,
                destination.desc.width,
                destination.desc.height,
                destination.desc.format
            );
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &destination.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: source.desc.width,
                height: source.desc.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.purge_bind_groups(|key| {
                key.entries.iter().any(
                    |(_, r)| matches!(r, BindResource::Buffer { id, .. } if *id == buffer.0),
                )
            });
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.purge_bind_groups(|key| {
                key.entries
                    .iter()
                    .any(|(_, r)| *r == BindResource::Texture(texture.0))
            });
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program.0).is_some() {
            self.purge_bind_groups(|key| key.program == program.0);
        }
    }

    fn destroy_vertex_binding(&mut self, binding: VertexBindingHandle) {
        self.vertex_bindings.remove(&binding.0);
    }
}
