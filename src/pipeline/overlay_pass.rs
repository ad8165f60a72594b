//! Light gizmo overlay
//!
//! Draws a small marker at every light, colored by the light: a sphere for
//! point lights and a quad for directional lights. Markers depth-test against
//! whatever the surface depth holds after the scene passes.

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::{PackedFrame, LOCAL_PARAMS_SLOT};
use crate::resources::{Mesh, MeshPart, ProgramError, ShaderProgram};
use crate::scene::{Light, LightKind};

pub struct OverlayPass {
    program: ShaderProgram,
    sphere: MeshPart,
    quad: MeshPart,
}

impl OverlayPass {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
    ) -> Result<Self, ProgramError> {
        let desc = ProgramDescriptor {
            uniform_slots: vec![LOCAL_PARAMS_SLOT],
            color_formats: vec![backend.surface_format()],
            depth: Some(DepthState {
                format: backend.surface_depth_format(),
                write_enabled: true,
                compare: CompareFunction::LessEqual,
            }),
            cull_mode: CullMode::None,
            ..ProgramDescriptor::new("Light Gizmos", OVERLAY_SHADER)
        };
        let program = ShaderProgram::compile(backend, queue, &desc)?;
        let sphere = MeshPart::from_mesh(backend, queue, &Mesh::sphere(12, 8), 0)?;
        let quad = MeshPart::from_mesh(backend, queue, &Mesh::quad(1.0), 0)?;
        Ok(Self {
            program,
            sphere,
            quad,
        })
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Draw one marker per light with a packed gizmo block
    pub fn execute<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        params: &PackedFrame,
        lights: &[Light],
    ) -> RenderResult<u32> {
        backend.bind_framebuffer(None);
        if lights.is_empty() {
            return Ok(0);
        }
        backend.use_program(self.program.handle());

        let mut draws = 0;
        for (index, light) in lights.iter().enumerate() {
            if !params.bind_gizmo(backend, index) {
                log::warn!("No gizmo block packed for light {}", index);
                continue;
            }
            let marker = match light.kind {
                LightKind::Point => &mut self.sphere,
                LightKind::Directional => &mut self.quad,
            };
            let binding = marker.vertex_binding(backend, &self.program)?;
            backend.bind_vertex_binding(binding);
            backend.draw_indexed(0..marker.index_count(), 0);
            draws += 1;
        }
        Ok(draws)
    }
}

pub const OVERLAY_SHADER: &str = r#"
struct GizmoParams {
    world_view_projection: mat4x4<f32>,
    color: vec4<f32>,
}

@group(0) @binding(1) var<uniform> gizmo: GizmoParams;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return gizmo.world_view_projection * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return gizmo.color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use crate::resources::ParamRange;
    use glam::Vec3;

    fn packed(backend: &mut HeadlessBackend, gizmos: usize) -> PackedFrame {
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4096,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        PackedFrame {
            buffer,
            global: ParamRange::default(),
            composite: ParamRange::default(),
            gizmos: (0..gizmos)
                .map(|i| ParamRange::new(256 * i as u64, 80))
                .collect(),
            bytes_written: 0,
        }
    }

    #[test]
    fn test_marker_mesh_follows_light_kind() {
        let mut backend = HeadlessBackend::new(64, 64);
        let queue = ReleaseQueue::new();
        let mut pass = OverlayPass::new(&mut backend, &queue).unwrap();
        let params = packed(&mut backend, 2);
        let lights = [
            Light::point(Vec3::ZERO, Vec3::ONE),
            Light::directional(Vec3::NEG_Y, Vec3::ONE),
        ];

        backend.begin_frame().unwrap();
        let draws = pass.execute(&mut backend, &params, &lights).unwrap();
        assert_eq!(draws, 2);
        assert_eq!(pass.sphere.binding_count(), 1);
        assert_eq!(pass.quad.binding_count(), 1);

        let counts: Vec<u32> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexed { indices, .. } => Some(indices.end),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![pass.sphere.index_count(), 6]);
    }

    #[test]
    fn test_lights_without_blocks_are_skipped() {
        let mut backend = HeadlessBackend::new(64, 64);
        let queue = ReleaseQueue::new();
        let mut pass = OverlayPass::new(&mut backend, &queue).unwrap();
        let params = packed(&mut backend, 1);
        let lights = [Light::point(Vec3::ZERO, Vec3::ONE); 3];

        backend.begin_frame().unwrap();
        assert_eq!(pass.execute(&mut backend, &params, &lights).unwrap(), 1);
    }
}
