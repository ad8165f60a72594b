//! Window management using winit
//!
//! A small host shell: it opens a window, builds a [`Renderer`] over a
//! [`WgpuBackend`] and runs frames until the window closes. Scene updates
//! happen between frames through the update callback.
//!
//! Built-in keys:
//! - `Escape` exits
//! - `Tab` switches between deferred and forward frames
//! - `M` cycles the composite render mode
//! - `G` toggles light gizmos

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use winit::{
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::backend::wgpu_backend::WgpuBackend;
use crate::engine::Renderer;
use crate::error::{RenderError, RenderResult};
use crate::scene::Scene;
use crate::RendererConfig;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Event loop: {0}")]
    EventLoop(#[from] EventLoopError),
    #[error("Window creation failed: {0}")]
    Os(#[from] OsError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Keyboard state gathered since the previous frame
#[derive(Debug, Default)]
pub struct FrameInput {
    held: HashSet<KeyCode>,
    pressed: HashSet<KeyCode>,
}

impl FrameInput {
    /// Whether `key` is currently down
    pub fn is_held(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    /// Whether `key` went down since the previous frame
    pub fn was_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        match event.state {
            ElementState::Pressed => {
                if !event.repeat {
                    self.pressed.insert(code);
                }
                self.held.insert(code);
            }
            ElementState::Released => {
                self.held.remove(&code);
            }
        }
    }

    fn end_frame(&mut self) {
        self.pressed.clear();
    }
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, WindowError> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)?;

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            resized: false,
            close_requested: false,
        })
    }

    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Take the resize flag, returning whether a resize happened
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

fn apply_builtin_keys(renderer: &mut Renderer<WgpuBackend>, input: &FrameInput) -> bool {
    if input.was_pressed(KeyCode::Tab) {
        renderer.set_frame_mode(renderer.frame_mode().toggle());
    }
    if input.was_pressed(KeyCode::KeyM) {
        renderer.set_render_mode(renderer.render_mode().next());
    }
    if input.was_pressed(KeyCode::KeyG) {
        let draw = !renderer.config().draw_gizmos;
        renderer.set_draw_gizmos(draw);
    }
    input.was_pressed(KeyCode::Escape)
}

/// Open a window and render until it closes.
///
/// `setup` builds the scene once the renderer exists. `update` runs before
/// every frame with the keyboard state and the frame delta in seconds.
pub fn run<S, U>(config: RendererConfig, setup: S, mut update: U) -> Result<(), WindowError>
where
    S: FnOnce(&mut Renderer<WgpuBackend>) -> RenderResult<Scene>,
    U: FnMut(&mut Renderer<WgpuBackend>, &mut Scene, &FrameInput, f32),
{
    let event_loop = EventLoop::new()?;
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)?;

    let backend = WgpuBackend::new(window.window_arc(), config.vsync).map_err(RenderError::from)?;
    let (width, height) = window.dimensions();
    let mut renderer = Renderer::init(backend, width, height, config)?;
    let mut scene = setup(&mut renderer)?;

    let mut input = FrameInput::default();
    let mut last_frame = Instant::now();
    let mut failure: Option<RenderError> = None;

    event_loop.run(|event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::KeyboardInput { event, .. } => input.handle_key(&event),
                    WindowEvent::RedrawRequested => {
                        if window.take_resized() {
                            let (w, h) = window.dimensions();
                            if let Err(e) = renderer.resize(w, h) {
                                failure = Some(e);
                                elwt.exit();
                                return;
                            }
                        }

                        if apply_builtin_keys(&mut renderer, &input) {
                            elwt.exit();
                            return;
                        }

                        let now = Instant::now();
                        let dt = now.duration_since(last_frame).as_secs_f32();
                        last_frame = now;

                        update(&mut renderer, &mut scene, &input, dt);
                        input.end_frame();

                        if let Err(e) = renderer.run_frame(&mut scene, dt) {
                            failure = Some(e);
                            elwt.exit();
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => {
                if !window.should_close() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    })?;

    renderer.shutdown();
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
