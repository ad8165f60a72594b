//! Deferred Frame - a deferred-shading frame pipeline over a handle-based
//! graphics backend
//!
//! Each frame streams camera, light and per-entity parameters into one
//! aligned uniform region, rasterizes the scene into a multi-attachment
//! G-buffer, composites the G-buffer onto the surface and finally draws light
//! gizmos on top.
//!
//! Two backends implement [`backend::GraphicsBackend`]:
//! - **wgpu**: renders into a window surface
//! - **headless**: records commands and keeps buffer contents on the host,
//!   used by tests and tools without a display
//!
//! # Features
//! - Aligned stream writer for packing uniform blocks
//! - Render targets with completeness validation and resize
//! - Vertex bindings cached per mesh-part and program
//! - Deferred and forward frame modes with G-buffer debug views

pub mod backend;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod window;

pub use backend::headless::HeadlessBackend;
pub use backend::wgpu_backend::WgpuBackend;
pub use backend::GraphicsBackend;
pub use engine::{FrameReport, Renderer};
pub use error::{RenderError, RenderResult};
pub use pipeline::{FrameMode, FrameState, RenderMode};
pub use scene::Scene;

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Surface clear color, also shown where the G-buffer holds nothing
    pub clear_color: [f32; 4],
    /// Deferred or forward frame sequence
    pub frame_mode: FrameMode,
    /// What the composite pass shows
    pub render_mode: RenderMode,
    /// World-space size of light gizmos
    pub gizmo_scale: f32,
    /// Draw light gizmos in the overlay pass
    pub draw_gizmos: bool,
    /// Parameter region size in bytes, `None` for the device maximum
    pub param_capacity: Option<u64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Frame".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            clear_color: [0.1, 0.1, 0.12, 1.0],
            frame_mode: FrameMode::Deferred,
            render_mode: RenderMode::Final,
            gizmo_scale: 0.2,
            draw_gizmos: true,
            param_capacity: None,
        }
    }
}

/// Install `env_logger`, defaulting to `info` unless `RUST_LOG` says otherwise.
///
/// Calling this more than once is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
