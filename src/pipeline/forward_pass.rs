//! Forward pass
//!
//! Shades entities straight onto the default surface, skipping the G-buffer.
//! The program only reads positions and normals, so mesh-parts drawn by both
//! passes end up with two vertex bindings over different attribute subsets.

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{PackedFrame, FAR_DEPTH, GLOBAL_PARAMS_SLOT, LOCAL_PARAMS_SLOT, PARAMS_WGSL};
use crate::resources::{Model, ProgramError, ShaderProgram};
use crate::scene::Entity;

pub struct ForwardPass {
    program: ShaderProgram,
}

impl ForwardPass {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
    ) -> Result<Self, ProgramError> {
        let source = [PARAMS_WGSL, FORWARD_SHADER].concat();
        let desc = ProgramDescriptor {
            uniform_slots: vec![GLOBAL_PARAMS_SLOT, LOCAL_PARAMS_SLOT],
            color_formats: vec![backend.surface_format()],
            depth: Some(DepthState {
                format: backend.surface_depth_format(),
                write_enabled: true,
                compare: CompareFunction::Less,
            }),
            ..ProgramDescriptor::new("Forward Pass", &source)
        };
        Ok(Self {
            program: ShaderProgram::compile(backend, queue, &desc)?,
        })
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Clear the surface and draw every entity onto it, returning the number
    /// of draws.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        params: &PackedFrame,
        clear_color: [f32; 4],
        entities: &[Entity],
        models: &mut [Model],
    ) -> RenderResult<u32> {
        backend.bind_framebuffer(None);
        backend.clear(clear_color, Some(FAR_DEPTH));
        backend.use_program(self.program.handle());
        params.bind_global(backend);

        let mut draws = 0;
        for entity in entities {
            let model = models
                .get_mut(entity.model)
                .ok_or(RenderError::UnknownModel(entity.model))?;
            params.bind_local(backend, entity.local_params);

            for part in &mut model.parts {
                let binding = part.vertex_binding(backend, &self.program)?;
                backend.bind_vertex_binding(binding);
                for submesh in part.submeshes() {
                    backend.draw_indexed(submesh.indices(), 0);
                    draws += 1;
                }
            }
        }
        Ok(draws)
    }
}

/// Forward shader, appended to the shared parameter declarations
pub const FORWARD_SHADER: &str = r#"
const FORWARD_ALBEDO: vec3<f32> = vec3<f32>(0.8, 0.8, 0.8);

@group(0) @binding(1) var<uniform> entity: LocalParams;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let local_position = vec4<f32>(input.position, 1.0);
    out.clip_position = entity.world_view_projection * local_position;
    out.world_position = (entity.world * local_position).xyz;
    out.world_normal = (entity.world * vec4<f32>(input.normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = shade(input.world_position, input.world_normal, FORWARD_ALBEDO);
    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_program_reads_position_and_normal_only() {
        let mut backend = HeadlessBackend::new(8, 8);
        let pass = ForwardPass::new(&mut backend, &ReleaseQueue::new()).unwrap();
        assert_eq!(
            pass.program().inputs().iter().collect::<Vec<_>>(),
            vec![(0, 3), (1, 3)]
        );
        let desc = backend.program_descriptor(pass.program().handle()).unwrap();
        assert!(desc.source.contains("fn shade("));
        assert!(desc.texture_units.is_empty());
    }
}
