//! Shared setup for the integration tests

#![allow(dead_code)]

use deferred_frame::backend::headless::{Command, HeadlessBackend};
use deferred_frame::resources::{Material, Mesh};
use deferred_frame::scene::{Camera, Entity, Scene};
use deferred_frame::{Renderer, RendererConfig};
use glam::Vec3;

pub const CLEAR_COLOR: [f32; 4] = [0.2, 0.3, 0.4, 1.0];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config() -> RendererConfig {
    RendererConfig {
        clear_color: CLEAR_COLOR,
        ..Default::default()
    }
}

/// Renderer over a headless backend with a surface of the given size
pub fn renderer(width: u32, height: u32) -> Renderer<HeadlessBackend> {
    renderer_with(width, height, config())
}

pub fn renderer_with(
    width: u32,
    height: u32,
    config: RendererConfig,
) -> Renderer<HeadlessBackend> {
    init_logging();
    Renderer::init(HeadlessBackend::new(width, height), width, height, config)
        .expect("renderer init")
}

pub fn scene() -> Scene {
    let mut scene = Scene::new();
    scene.camera = Camera::new(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO);
    scene
}

/// Scene with `count` cubes in a row, all sharing one uploaded model
pub fn cube_scene(renderer: &mut Renderer<HeadlessBackend>, count: usize) -> Scene {
    let cube = renderer
        .upload_mesh(&Mesh::cube(), Material::new("Cube"))
        .expect("upload cube");
    let mut scene = scene();
    for i in 0..count {
        scene.add_entity(Entity::new(cube).with_position(Vec3::new(i as f32 * 2.0, 0.0, 0.0)));
    }
    scene
}

/// Drain the commands recorded so far
pub fn take_commands(renderer: &mut Renderer<HeadlessBackend>) -> Vec<Command> {
    renderer.backend_mut().take_commands()
}

pub fn draws(commands: &[Command]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, Command::DrawIndexed { .. }))
        .count()
}

pub fn read_f32s(bytes: &[u8], count: usize) -> Vec<f32> {
    bytes[..count * 4]
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
