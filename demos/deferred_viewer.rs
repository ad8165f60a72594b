//! Deferred viewer
//!
//! Run with:
//!   cargo run --example deferred_viewer
//!   cargo run --example deferred_viewer -- --forward --texture assets/crate.png
//!
//! Controls:
//!   Tab      - Switch deferred / forward frames
//!   M        - Cycle render mode (final, positions, normals, albedo, depth)
//!   G        - Toggle light gizmos
//!   A/D      - Orbit the camera
//!   Escape   - Exit

use std::path::PathBuf;

use clap::Parser;
use deferred_frame::{
    resources::{Material, Mesh, TextureId},
    scene::{Camera, Entity, Scene},
    window, FrameMode, RenderMode, RendererConfig,
};
use glam::Vec3;
use winit::keyboard::KeyCode;

#[derive(Parser, Debug)]
#[command(name = "Deferred Viewer", about = "Deferred-shading frame pipeline demo", version)]
struct Args {
    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Disable vertical sync.
    #[arg(long)]
    no_vsync: bool,

    /// Start in forward mode instead of deferred.
    #[arg(long)]
    forward: bool,

    /// Hide light gizmos.
    #[arg(long)]
    no_gizmos: bool,

    /// Albedo texture for the floor.
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Number of orbiting point lights.
    #[arg(long, default_value = "4")]
    lights: usize,
}

const ORBIT_SPEED: f32 = 1.2;

fn build_scene(
    renderer: &mut deferred_frame::Renderer<deferred_frame::WgpuBackend>,
    args: &Args,
) -> deferred_frame::RenderResult<Scene> {
    let floor_material = match &args.texture {
        Some(path) => Material::new("Floor").with_albedo(renderer.load_texture(path)),
        None => {
            let checker = deferred_frame::resources::TextureData::checkerboard(
                8,
                [200, 200, 200, 255],
                [90, 90, 90, 255],
            );
            let id = renderer.insert_texture(&checker)?;
            Material::new("Floor").with_albedo(id)
        }
    };
    let floor = renderer.upload_mesh(&Mesh::plane(12.0, 12.0, 4), floor_material)?;
    let cube = renderer.upload_mesh(&Mesh::cube(), Material::new("Cube"))?;
    let sphere = renderer.upload_mesh(&Mesh::sphere(32, 16), Material::new("Sphere"))?;
    let cylinder = renderer.upload_mesh(&Mesh::cylinder(0.5, 1.5, 24), Material::new("Pillar"))?;
    // Shows the magenta fallback
    let missing = renderer.upload_mesh(
        &Mesh::cube(),
        Material::new("Missing").with_albedo(TextureId::NOT_FOUND),
    )?;

    let mut scene = Scene::new();
    scene.camera = Camera::new(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO);
    scene.add_entity(Entity::new(floor));
    scene.add_entity(Entity::new(cube).with_position(Vec3::new(-2.5, 0.5, 0.0)));
    scene.add_entity(Entity::new(sphere).with_position(Vec3::new(0.0, 1.0, 0.0)));
    scene.add_entity(Entity::new(cylinder).with_position(Vec3::new(2.5, 0.75, 0.0)));
    scene.add_entity(
        Entity::new(missing)
            .with_position(Vec3::new(0.0, 0.4, 2.5))
            .with_scale(Vec3::splat(0.8)),
    );

    scene.add_directional_light(Vec3::new(-0.4, -1.0, -0.3), Vec3::splat(0.4));
    for i in 0..args.lights {
        let angle = i as f32 / args.lights.max(1) as f32 * std::f32::consts::TAU;
        let color = Vec3::new(
            0.5 + 0.5 * angle.cos(),
            0.5 + 0.5 * (angle + 2.1).cos(),
            0.5 + 0.5 * (angle + 4.2).cos(),
        );
        scene.add_point_light(Vec3::new(4.0 * angle.cos(), 2.0, 4.0 * angle.sin()), color);
    }
    Ok(scene)
}

fn main() {
    deferred_frame::init_logging();
    let args = Args::parse();

    let config = RendererConfig {
        title: "Deferred Viewer".to_string(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        frame_mode: if args.forward {
            FrameMode::Forward
        } else {
            FrameMode::Deferred
        },
        render_mode: RenderMode::Final,
        draw_gizmos: !args.no_gizmos,
        ..Default::default()
    };

    let mut elapsed = 0.0f32;
    let mut orbit = 0.0f32;
    let result = window::run(
        config,
        |renderer| build_scene(renderer, &args),
        |_renderer, scene, input, dt| {
            elapsed += dt;
            if input.is_held(KeyCode::KeyA) {
                orbit -= ORBIT_SPEED * dt;
            }
            if input.is_held(KeyCode::KeyD) {
                orbit += ORBIT_SPEED * dt;
            }
            scene
                .camera
                .set_position(Vec3::new(10.0 * orbit.sin(), 5.0, 10.0 * orbit.cos()));

            // Point lights circle the origin
            let count = scene.lights.len().saturating_sub(1).max(1) as f32;
            for (i, light) in scene.lights.iter_mut().skip(1).enumerate() {
                let angle = elapsed * 0.5 + i as f32 / count * std::f32::consts::TAU;
                light.position = Vec3::new(4.0 * angle.cos(), 2.0, 4.0 * angle.sin());
            }
            if let Some(sphere) = scene.entities.get_mut(2) {
                sphere.transform.position.y = 1.0 + 0.3 * (elapsed * 2.0).sin();
            }
        },
    );

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
