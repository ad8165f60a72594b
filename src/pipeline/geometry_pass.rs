//! G-buffer geometry pass
//!
//! Rasterizes every entity into the G-buffer's three color slots:
//! - `@location(0)` world-space position (RGBA16F)
//! - `@location(1)` world-space normal (RGBA16F)
//! - `@location(2)` albedo sampled from the material texture (RGBA8)
//!
//! plus depth. The slot mapping is fixed by the render target's framebuffer.

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{
    gbuffer_descriptor, PackedFrame, ALBEDO_UNIT, GLOBAL_PARAMS_SLOT, LOCAL_PARAMS_SLOT,
    PARAMS_WGSL,
};
use crate::resources::{Model, ProgramError, RenderTarget, ShaderProgram, TextureTable};
use crate::scene::Entity;

/// Depth the G-buffer and the surface are cleared to
pub const FAR_DEPTH: f32 = 1.0;

pub struct GeometryPass {
    program: ShaderProgram,
}

impl GeometryPass {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
    ) -> Result<Self, ProgramError> {
        let source = [PARAMS_WGSL, GEOMETRY_SHADER].concat();
        let desc = ProgramDescriptor {
            uniform_slots: vec![GLOBAL_PARAMS_SLOT, LOCAL_PARAMS_SLOT],
            texture_units: vec![TextureUnit {
                unit: ALBEDO_UNIT,
                sample_type: TextureSampleType::Float { filterable: true },
            }],
            uses_sampler: true,
            color_formats: gbuffer_descriptor(1, 1).color_formats,
            depth: Some(DepthState {
                format: TextureFormat::Depth32Float,
                write_enabled: true,
                compare: CompareFunction::Less,
            }),
            ..ProgramDescriptor::new("Geometry Pass", &source)
        };
        Ok(Self {
            program: ShaderProgram::compile(backend, queue, &desc)?,
        })
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Draw every entity into `gbuffer`, returning the number of draws.
    ///
    /// Unknown model indices and vertex binding mismatches abort the pass.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        gbuffer: &RenderTarget,
        params: &PackedFrame,
        entities: &[Entity],
        models: &mut [Model],
        textures: &TextureTable,
    ) -> RenderResult<u32> {
        gbuffer.bind_for_write(backend)?;
        backend.clear([0.0; 4], Some(FAR_DEPTH));
        backend.use_program(self.program.handle());
        params.bind_global(backend);

        let mut draws = 0;
        for entity in entities {
            let Model {
                parts, materials, ..
            } = models
                .get_mut(entity.model)
                .ok_or(RenderError::UnknownModel(entity.model))?;
            params.bind_local(backend, entity.local_params);

            for part in parts.iter_mut() {
                let binding = part.vertex_binding(backend, &self.program)?;
                backend.bind_vertex_binding(binding);

                for submesh in part.submeshes() {
                    let albedo = materials
                        .get(submesh.material_index)
                        .and_then(|m| m.albedo);
                    if let Some(texture) = textures.resolve(albedo) {
                        backend.bind_texture(ALBEDO_UNIT, texture);
                    }
                    backend.draw_indexed(submesh.indices(), 0);
                    draws += 1;
                }
            }
        }

        gbuffer.unbind(backend);
        Ok(draws)
    }
}

/// G-buffer shader, appended to the shared parameter declarations
pub const GEOMETRY_SHADER: &str = r#"
@group(0) @binding(1) var<uniform> entity: LocalParams;
@group(1) @binding(0) var albedo_texture: texture_2d<f32>;
@group(2) @binding(0) var albedo_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct GBufferOutput {
    @location(0) position: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) albedo: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let local_position = vec4<f32>(input.position, 1.0);
    out.clip_position = entity.world_view_projection * local_position;
    out.world_position = (entity.world * local_position).xyz;
    out.world_normal = (entity.world * vec4<f32>(input.normal, 0.0)).xyz;
    out.uv = input.uv;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;
    out.position = vec4<f32>(input.world_position, 1.0);
    out.normal = vec4<f32>(normalize(input.world_normal), 0.0);
    out.albedo = textureSample(albedo_texture, albedo_sampler, input.uv);
    return out;
}
"#;
