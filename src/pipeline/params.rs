//! Per-frame parameter packing
//!
//! Everything the passes read from uniforms is streamed into one
//! [`BufferRegion`] per frame, in this order:
//!
//! | block     | contents                                       | slot |
//! |-----------|------------------------------------------------|------|
//! | global    | camera position, light count, light records    | 0    |
//! | local × N | world matrix, world-view-projection matrix     | 1    |
//! | composite | clear color, render mode                       | 2    |
//! | gizmo × L | marker world-view-projection matrix, color     | 1    |
//!
//! Every block starts at the device's uniform offset alignment. Inside the
//! global block each light record is laid out the way WGSL lays out
//! [`PARAMS_WGSL`]'s `Light` struct: every field on a 16 byte boundary.

use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::pipeline::{RenderMode, COMPOSITE_PARAMS_SLOT, GLOBAL_PARAMS_SLOT, LOCAL_PARAMS_SLOT};
use crate::resources::{BufferRegion, ParamRange, StreamError, StreamWriter};
use crate::scene::{Light, LightKind, Scene};

/// Lights beyond this count are packed for gizmos only
pub const MAX_SHADED_LIGHTS: usize = 16;

/// Bytes one light occupies in the global block
pub const LIGHT_RECORD_STRIDE: u64 = 64;

/// Camera position and light count
pub const GLOBAL_HEADER_SIZE: u64 = 16;

/// Size the shaders declare for the global block, whatever the light count
pub const GLOBAL_PARAMS_BINDING_SIZE: u64 =
    GLOBAL_HEADER_SIZE + MAX_SHADED_LIGHTS as u64 * LIGHT_RECORD_STRIDE;

/// World and world-view-projection matrices
pub const LOCAL_PARAMS_SIZE: u64 = 128;

/// Clear color and render mode, padded
pub const COMPOSITE_PARAMS_SIZE: u64 = 32;

/// Marker world-view-projection matrix and color
pub const GIZMO_PARAMS_SIZE: u64 = 80;

/// Uniform declarations and the shading term shared by every program
pub const PARAMS_WGSL: &str = r#"
struct Light {
    kind: u32,
    color: vec3<f32>,
    direction: vec3<f32>,
    position: vec3<f32>,
}

struct GlobalParams {
    camera_position: vec3<f32>,
    light_count: u32,
    lights: array<Light, 16>,
}

struct LocalParams {
    world: mat4x4<f32>,
    world_view_projection: mat4x4<f32>,
}

const LIGHT_DIRECTIONAL: u32 = 0u;
const MAX_LIGHTS: u32 = 16u;

@group(0) @binding(0) var<uniform> frame: GlobalParams;

// Lambert diffuse plus a small Blinn highlight
fn shade(position: vec3<f32>, normal: vec3<f32>, albedo: vec3<f32>) -> vec3<f32> {
    let n = normalize(normal);
    let view_dir = normalize(frame.camera_position - position);
    var color = albedo * 0.05;
    let count = min(frame.light_count, MAX_LIGHTS);
    for (var i = 0u; i < count; i += 1u) {
        let light = frame.lights[i];
        var to_light = normalize(-light.direction);
        var attenuation = 1.0;
        if light.kind != LIGHT_DIRECTIONAL {
            let offset = light.position - position;
            let dist = length(offset);
            to_light = offset / max(dist, 0.0001);
            attenuation = 1.0 / (1.0 + dist * dist);
        }
        let diffuse = max(dot(n, to_light), 0.0);
        let half_dir = normalize(to_light + view_dir);
        let specular = pow(max(dot(n, half_dir), 0.0), 32.0);
        color += (albedo * diffuse + vec3<f32>(specular * 0.25)) * light.color * attenuation;
    }
    return color;
}
"#;

/// Settings packed alongside the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackSettings {
    pub clear_color: [f32; 4],
    pub render_mode: RenderMode,
    pub gizmo_scale: f32,
}

/// Ranges written by [`pack_frame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedFrame {
    pub buffer: BufferHandle,
    pub global: ParamRange,
    pub composite: ParamRange,
    /// One per scene light, in scene order
    pub gizmos: Vec<ParamRange>,
    pub bytes_written: u64,
}

impl PackedFrame {
    /// Bind the global block. The binding covers the full declared light
    /// array even when fewer records were written.
    pub fn bind_global<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.bind_uniform_range(
            GLOBAL_PARAMS_SLOT,
            self.buffer,
            self.global.offset,
            GLOBAL_PARAMS_BINDING_SIZE,
        );
    }

    pub fn bind_local<B: GraphicsBackend>(&self, backend: &mut B, range: ParamRange) {
        backend.bind_uniform_range(LOCAL_PARAMS_SLOT, self.buffer, range.offset, range.size);
    }

    pub fn bind_composite<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.bind_uniform_range(
            COMPOSITE_PARAMS_SLOT,
            self.buffer,
            self.composite.offset,
            self.composite.size,
        );
    }

    /// Bind the gizmo block of light `index`, if it was packed
    pub fn bind_gizmo<B: GraphicsBackend>(&self, backend: &mut B, index: usize) -> bool {
        match self.gizmos.get(index) {
            Some(range) => {
                backend.bind_uniform_range(LOCAL_PARAMS_SLOT, self.buffer, range.offset, range.size);
                true
            }
            None => false,
        }
    }
}

/// Write the global block: camera position, light count and one record per
/// shaded light.
pub fn write_global<B: GraphicsBackend>(
    writer: &mut StreamWriter<'_, B>,
    camera_position: Vec3,
    lights: &[Light],
) -> Result<ParamRange, StreamError> {
    let shaded = &lights[..lights.len().min(MAX_SHADED_LIGHTS)];
    if shaded.len() < lights.len() {
        log::warn!(
            "{} lights in scene, only the first {} are shaded",
            lights.len(),
            MAX_SHADED_LIGHTS
        );
    }

    writer.write_block(|w| {
        w.write(&camera_position)?;
        w.write(&(shaded.len() as u32))?;
        for light in shaded {
            write_light(w, light)?;
        }
        Ok(())
    })
}

fn write_light<B: GraphicsBackend>(
    w: &mut StreamWriter<'_, B>,
    light: &Light,
) -> Result<(), StreamError> {
    w.align_head(16)?;
    w.write(&light.kind.as_u32())?;
    w.align_head(16)?;
    w.write(&light.color)?;
    w.align_head(16)?;
    w.write(&light.direction)?;
    w.align_head(16)?;
    w.write(&light.position)?;
    w.align_head(16)?;
    Ok(())
}

/// Write one entity's local block
pub fn write_local<B: GraphicsBackend>(
    writer: &mut StreamWriter<'_, B>,
    world: Mat4,
    view_projection: Mat4,
) -> Result<ParamRange, StreamError> {
    writer.write_block(|w| {
        w.write(&world)?;
        w.write(&(view_projection * world))?;
        Ok(())
    })
}

pub fn write_composite<B: GraphicsBackend>(
    writer: &mut StreamWriter<'_, B>,
    clear_color: [f32; 4],
    render_mode: RenderMode,
) -> Result<ParamRange, StreamError> {
    writer.write_block(|w| {
        w.write(&clear_color)?;
        w.write(&render_mode.as_u32())?;
        w.align_head(16)?;
        Ok(())
    })
}

/// Marker transform: translate to the light, then scale uniformly
pub fn gizmo_matrix(light: &Light, scale: f32) -> Mat4 {
    Mat4::from_translation(light.position) * Mat4::from_scale(Vec3::splat(scale))
}

pub fn write_gizmo<B: GraphicsBackend>(
    writer: &mut StreamWriter<'_, B>,
    light: &Light,
    view_projection: Mat4,
    scale: f32,
) -> Result<ParamRange, StreamError> {
    writer.write_block(|w| {
        w.write(&(view_projection * gizmo_matrix(light, scale)))?;
        w.write(&light.color.extend(1.0))?;
        Ok(())
    })
}

/// Stream the whole frame into `region`, recording each entity's local range
/// on the entity.
///
/// World matrices are read as they are; refresh them with
/// [`Scene::update`] first.
pub fn pack_frame<B: GraphicsBackend>(
    region: &mut BufferRegion,
    backend: &mut B,
    scene: &mut Scene,
    settings: &PackSettings,
) -> Result<PackedFrame, StreamError> {
    let buffer = region.buffer();
    let view_projection = scene.camera.view_projection_matrix();

    let mut writer = region.begin_write(backend);
    let global = write_global(&mut writer, scene.camera.world_position(), &scene.lights)?;

    for entity in &mut scene.entities {
        entity.local_params = write_local(&mut writer, entity.world_matrix, view_projection)?;
    }

    let composite = write_composite(&mut writer, settings.clear_color, settings.render_mode)?;

    let mut gizmos = Vec::with_capacity(scene.lights.len());
    for light in &scene.lights {
        gizmos.push(write_gizmo(
            &mut writer,
            light,
            view_projection,
            settings.gizmo_scale,
        )?);
    }

    let bytes_written = writer.end_write();
    log::trace!(
        "Packed {} entities and {} lights into {} bytes",
        scene.entities.len(),
        scene.lights.len(),
        bytes_written
    );

    Ok(PackedFrame {
        buffer,
        global,
        composite,
        gizmos,
        bytes_written,
    })
}

/// Decode the type tag of light record `index` from a packed global block
pub fn light_kind_at(global: &[u8], index: usize) -> Option<LightKind> {
    let start = GLOBAL_HEADER_SIZE as usize + index * LIGHT_RECORD_STRIDE as usize;
    let tag = global.get(start..start + 4)?;
    match u32::from_ne_bytes(tag.try_into().ok()?) {
        0 => Some(LightKind::Directional),
        1 => Some(LightKind::Point),
        _ => None,
    }
}
