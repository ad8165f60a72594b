//! Frame orchestrator
//!
//! [`Renderer`] owns the backend and every GPU resource the frame pipeline
//! needs: the parameter region, the G-buffer, the pass programs, the texture
//! table and the uploaded models. The scene stays with the host and is lent
//! to [`Renderer::run_frame`] once per frame.

use std::path::Path;

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::*;
use crate::resources::*;
use crate::scene::Scene;
use crate::RendererConfig;

/// What one call to [`Renderer::run_frame`] did
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub delta_time: f32,
    /// States entered, ending with [`FrameState::Idle`]
    pub states: Vec<FrameState>,
    pub draw_calls: u32,
    /// Global block as written: header plus one record per shaded light
    pub global_params: ParamRange,
    pub composite_params: ParamRange,
    /// Bytes streamed into the parameter region
    pub params_bytes: u64,
    /// The G-buffer was incomplete so the scene passes drew nothing
    pub target_incomplete: bool,
}

/// GPU state released as a whole on shutdown
struct FrameResources {
    params: BufferRegion,
    gbuffer: RenderTarget,
    geometry: GeometryPass,
    composite: CompositePass,
    forward: ForwardPass,
    overlay: OverlayPass,
    textures: TextureTable,
    models: Vec<Model>,
}

/// Deferred renderer driving a [`GraphicsBackend`]
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    queue: ReleaseQueue,
    config: RendererConfig,
    resources: Option<FrameResources>,
    sequence: FrameSequence,
    frame_index: u64,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Size the surface and create every pipeline resource.
    ///
    /// An incomplete G-buffer is logged but not fatal; frames skip the scene
    /// passes until a resize produces a complete one.
    pub fn init(mut backend: B, width: u32, height: u32, config: RendererConfig) -> RenderResult<Self> {
        let info = backend.device_info();
        log::info!(
            "Initializing renderer on {} ({}, {})",
            info.name,
            info.backend,
            info.driver
        );

        backend.resize_surface(width.max(1), height.max(1));
        let (width, height) = backend.surface_size();
        let limits = backend.limits();
        log::info!(
            "Surface {}x{}, uniform alignment {}, max uniform block {}",
            width,
            height,
            limits.min_uniform_alignment,
            limits.max_uniform_block_size
        );

        let queue = ReleaseQueue::new();
        let resources = Self::create_resources(&mut backend, &queue, &config, width, height)
            .map_err(|e| {
                log::error!("Renderer setup failed: {}", e);
                e
            })?;

        Ok(Self {
            backend,
            queue,
            config,
            resources: Some(resources),
            sequence: FrameSequence::new(),
            frame_index: 0,
        })
    }

    fn create_resources(
        backend: &mut B,
        queue: &ReleaseQueue,
        config: &RendererConfig,
        width: u32,
        height: u32,
    ) -> RenderResult<FrameResources> {
        // The global binding always spans the full light array
        let capacity = config
            .param_capacity
            .map(|c| c.max(GLOBAL_PARAMS_BINDING_SIZE));
        let params = BufferRegion::new(backend, queue, capacity, "Frame Parameters")?;
        let textures = TextureTable::new(backend, queue)?;
        let gbuffer = RenderTarget::create(backend, queue, gbuffer_descriptor(width, height))?;

        Ok(FrameResources {
            params,
            gbuffer,
            geometry: GeometryPass::new(backend, queue)?,
            composite: CompositePass::new(backend, queue)?,
            forward: ForwardPass::new(backend, queue)?,
            overlay: OverlayPass::new(backend, queue)?,
            textures,
            models: Vec::new(),
        })
    }

    fn resources_mut(&mut self) -> RenderResult<&mut FrameResources> {
        self.resources.as_mut().ok_or(RenderError::ShutDown)
    }

    /// Resize the surface and reallocate the G-buffer to match.
    ///
    /// Zero-sized requests (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let Self {
            backend,
            queue,
            resources,
            ..
        } = self;
        let resources = resources.as_mut().ok_or(RenderError::ShutDown)?;

        backend.resize_surface(width, height);
        let (width, height) = backend.surface_size();
        resources.gbuffer.resize(backend, width, height)?;
        queue.flush(backend);
        log::debug!("Resized to {}x{}", width, height);
        Ok(())
    }

    /// Run one frame over `scene`.
    ///
    /// Entity world matrices and local parameter ranges are written back into
    /// the scene. On error the frame is abandoned and the renderer returns to
    /// [`FrameState::Idle`].
    pub fn run_frame(&mut self, scene: &mut Scene, delta_time: f32) -> RenderResult<FrameReport> {
        if self.resources.is_none() {
            return Err(RenderError::ShutDown);
        }
        self.queue.flush(&mut self.backend);

        let mut frame_open = false;
        match self.record_frame(scene, delta_time, &mut frame_open) {
            Ok(report) => Ok(report),
            Err(e) => {
                log::error!("Frame {} aborted: {}", self.frame_index, e);
                if frame_open {
                    if let Err(end) = self.backend.end_frame() {
                        log::warn!("Failed to close aborted frame: {}", end);
                    }
                }
                self.sequence.reset();
                Err(e)
            }
        }
    }

    fn record_frame(
        &mut self,
        scene: &mut Scene,
        delta_time: f32,
        frame_open: &mut bool,
    ) -> RenderResult<FrameReport> {
        let Self {
            backend,
            config,
            resources,
            sequence,
            frame_index,
            ..
        } = self;
        let res = resources.as_mut().ok_or(RenderError::ShutDown)?;

        sequence.advance(FrameState::PackParams)?;
        backend.begin_frame()?;
        *frame_open = true;

        scene.update(backend.surface_size());
        let settings = PackSettings {
            clear_color: config.clear_color,
            render_mode: config.render_mode,
            gizmo_scale: config.gizmo_scale,
        };
        let packed = pack_frame(&mut res.params, backend, scene, &settings)?;

        let mut draw_calls = 0;
        let mut target_incomplete = false;
        match config.frame_mode {
            FrameMode::Deferred => {
                sequence.advance(FrameState::GeometryPass)?;
                if res.gbuffer.is_complete() {
                    draw_calls += res.geometry.execute(
                        backend,
                        &res.gbuffer,
                        &packed,
                        &scene.entities,
                        &mut res.models,
                        &res.textures,
                    )?;
                } else {
                    log::debug!("G-buffer incomplete, skipping scene passes");
                    target_incomplete = true;
                }

                sequence.advance(FrameState::CompositePass)?;
                draw_calls +=
                    res.composite
                        .execute(backend, &res.gbuffer, &packed, config.clear_color)?;
            }
            FrameMode::Forward => {
                sequence.advance(FrameState::ForwardPass)?;
                draw_calls += res.forward.execute(
                    backend,
                    &packed,
                    config.clear_color,
                    &scene.entities,
                    &mut res.models,
                )?;
            }
        }

        sequence.advance(FrameState::OverlayPass)?;
        if config.draw_gizmos {
            draw_calls += res.overlay.execute(backend, &packed, &scene.lights)?;
        }

        backend.end_frame()?;
        *frame_open = false;
        sequence.advance(FrameState::Presented)?;
        sequence.advance(FrameState::Idle)?;

        let report = FrameReport {
            frame_index: *frame_index,
            delta_time,
            states: sequence.reset(),
            draw_calls,
            global_params: packed.global,
            composite_params: packed.composite,
            params_bytes: packed.bytes_written,
            target_incomplete,
        };
        *frame_index += 1;
        Ok(report)
    }

    /// Release every GPU resource. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(resources) = self.resources.take() {
            let model_count = resources.models.len();
            drop(resources);
            let released = self.queue.flush(&mut self.backend);
            log::info!(
                "Renderer shut down after {} frames, released {} resources ({} models)",
                self.frame_index,
                released,
                model_count
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.resources.is_none()
    }

    /// Run `f` with the backend and the release queue resources must be owned
    /// through, e.g. to build mesh-parts from raw vertex data.
    pub fn with_backend<T>(&mut self, f: impl FnOnce(&mut B, &ReleaseQueue) -> T) -> T {
        f(&mut self.backend, &self.queue)
    }

    /// Take ownership of a model built through [`with_backend`](Self::with_backend),
    /// returning its index.
    pub fn add_model(&mut self, model: Model) -> RenderResult<usize> {
        let resources = self.resources_mut()?;
        resources.models.push(model);
        Ok(resources.models.len() - 1)
    }

    /// Upload `mesh` as a one-part model drawn with `material`
    pub fn upload_mesh(&mut self, mesh: &Mesh, material: Material) -> RenderResult<usize> {
        if self.resources.is_none() {
            return Err(RenderError::ShutDown);
        }
        let part = MeshPart::from_mesh(&mut self.backend, &self.queue, mesh, 0)?;
        let model = Model::new(&mesh.name).with_part(part).with_material(material);
        self.add_model(model)
    }

    /// Load a texture through the texture table.
    ///
    /// Failures yield [`TextureId::NOT_FOUND`], which draws as the magenta
    /// fallback.
    pub fn load_texture<P: AsRef<Path>>(&mut self, path: P) -> TextureId {
        let Self {
            backend, resources, ..
        } = self;
        match resources.as_mut() {
            Some(resources) => resources.textures.load(backend, path),
            None => TextureId::NOT_FOUND,
        }
    }

    /// Upload already decoded texture data
    pub fn insert_texture(&mut self, data: &TextureData) -> RenderResult<TextureId> {
        let Self {
            backend, resources, ..
        } = self;
        let resources = resources.as_mut().ok_or(RenderError::ShutDown)?;
        Ok(resources.textures.insert(backend, data)?)
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        log::info!("Render mode: {:?}", mode);
        self.config.render_mode = mode;
    }

    pub fn render_mode(&self) -> RenderMode {
        self.config.render_mode
    }

    pub fn set_frame_mode(&mut self, mode: FrameMode) {
        log::info!("Frame mode: {:?}", mode);
        self.config.frame_mode = mode;
    }

    pub fn frame_mode(&self) -> FrameMode {
        self.config.frame_mode
    }

    pub fn set_draw_gizmos(&mut self, draw: bool) {
        self.config.draw_gizmos = draw;
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.backend.device_info()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.sequence.state()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Current surface size
    pub fn size(&self) -> (u32, u32) {
        self.backend.surface_size()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn release_queue(&self) -> &ReleaseQueue {
        &self.queue
    }

    pub fn gbuffer(&self) -> Option<&RenderTarget> {
        self.resources.as_ref().map(|r| &r.gbuffer)
    }

    pub fn model(&self, index: usize) -> Option<&Model> {
        self.resources.as_ref()?.models.get(index)
    }

    pub fn textures(&self) -> Option<&TextureTable> {
        self.resources.as_ref().map(|r| &r.textures)
    }

    /// Host copy of a range written by the last frame
    pub fn param_bytes(&self, range: ParamRange) -> Option<&[u8]> {
        self.resources.as_ref()?.params.bytes(range)
    }

    pub fn param_region(&self) -> Option<&BufferRegion> {
        self.resources.as_ref().map(|r| &r.params)
    }

    pub fn geometry_program(&self) -> Option<&ShaderProgram> {
        self.resources.as_ref().map(|r| r.geometry.program())
    }

    pub fn forward_program(&self) -> Option<&ShaderProgram> {
        self.resources.as_ref().map(|r| r.forward.program())
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::scene::Entity;

    fn renderer(config: RendererConfig) -> Renderer<HeadlessBackend> {
        Renderer::init(HeadlessBackend::new(128, 96), 128, 96, config).unwrap()
    }

    #[test]
    fn test_small_capacity_still_fits_global_block() {
        let mut renderer = renderer(RendererConfig {
            param_capacity: Some(64),
            ..Default::default()
        });
        let capacity = renderer.param_region().unwrap().capacity();
        assert!(capacity >= GLOBAL_PARAMS_BINDING_SIZE);

        let mut scene = Scene::new();
        renderer.run_frame(&mut scene, 0.0).unwrap();
    }

    #[test]
    fn test_param_overflow_aborts_frame() {
        let mut renderer = renderer(RendererConfig {
            param_capacity: Some(GLOBAL_PARAMS_BINDING_SIZE),
            ..Default::default()
        });
        let model = renderer
            .upload_mesh(&Mesh::cube(), Material::new("Cube"))
            .unwrap();
        let mut scene = Scene::new();
        for _ in 0..8 {
            scene.add_entity(Entity::new(model));
        }

        let err = renderer.run_frame(&mut scene, 0.0).unwrap_err();
        assert!(matches!(err, RenderError::Stream(_)));
        assert_eq!(renderer.state(), FrameState::Idle);
        assert_eq!(renderer.backend().frames_presented(), 1);
    }

    #[test]
    fn test_init_sizes_gbuffer_to_surface() {
        let renderer = renderer(RendererConfig::default());
        assert_eq!(renderer.size(), (128, 96));
        assert_eq!(renderer.gbuffer().map(RenderTarget::size), Some((128, 96)));
        assert_eq!(renderer.state(), FrameState::Idle);
        assert!(renderer.textures().is_some_and(|t| t.len() >= 4));
    }

    #[test]
    fn test_modes_apply_to_next_frame() {
        let mut renderer = renderer(RendererConfig::default());
        let mut scene = Scene::new();
        renderer.set_frame_mode(FrameMode::Forward);
        renderer.set_draw_gizmos(false);
        scene.add_point_light(glam::Vec3::Y, glam::Vec3::ONE);

        let report = renderer.run_frame(&mut scene, 0.0).unwrap();
        assert!(report.states.contains(&FrameState::ForwardPass));
        assert_eq!(report.draw_calls, 0);

        renderer.set_frame_mode(renderer.frame_mode().toggle());
        renderer.set_draw_gizmos(true);
        let report = renderer.run_frame(&mut scene, 0.0).unwrap();
        assert!(report.states.contains(&FrameState::GeometryPass));
        assert_eq!(report.draw_calls, 2);
    }

    #[test]
    fn test_drop_releases_resources() {
        let queue = {
            let renderer = renderer(RendererConfig::default());
            renderer.release_queue().clone()
        };
        assert!(queue.is_empty());
    }
}
