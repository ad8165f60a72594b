//! Composite pass
//!
//! Shades the G-buffer onto the default surface with one full-surface quad,
//! then copies the G-buffer depth into the surface depth so the overlay pass
//! can depth-test against the scene.

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::{
    PackedFrame, COMPOSITE_PARAMS_SLOT, FAR_DEPTH, GBUFFER_COLOR_SLOTS, GLOBAL_PARAMS_SLOT,
    PARAMS_WGSL,
};
use crate::resources::{MeshPart, ProgramError, RenderTarget, ShaderProgram};

pub struct CompositePass {
    program: ShaderProgram,
    quad: MeshPart,
}

impl CompositePass {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
    ) -> Result<Self, ProgramError> {
        let source = [PARAMS_WGSL, COMPOSITE_SHADER].concat();

        let unfilterable = TextureSampleType::Float { filterable: false };
        let mut texture_units: Vec<TextureUnit> = (0..GBUFFER_COLOR_SLOTS as u32)
            .map(|unit| TextureUnit {
                unit,
                sample_type: unfilterable,
            })
            .collect();
        texture_units.push(TextureUnit {
            unit: GBUFFER_COLOR_SLOTS as u32,
            sample_type: TextureSampleType::Depth,
        });

        // The surface pass always carries a depth attachment, so the program
        // declares one it never writes
        let desc = ProgramDescriptor {
            uniform_slots: vec![GLOBAL_PARAMS_SLOT, COMPOSITE_PARAMS_SLOT],
            texture_units,
            color_formats: vec![backend.surface_format()],
            depth: Some(DepthState {
                format: backend.surface_depth_format(),
                write_enabled: false,
                compare: CompareFunction::Always,
            }),
            cull_mode: CullMode::None,
            ..ProgramDescriptor::new("Composite Pass", &source)
        };
        let program = ShaderProgram::compile(backend, queue, &desc)?;
        let quad = MeshPart::fullscreen_quad(backend, queue)?;
        Ok(Self { program, quad })
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Clear the surface and, when `gbuffer` is complete, shade it.
    ///
    /// Returns the number of draws issued.
    pub fn execute<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        gbuffer: &RenderTarget,
        params: &PackedFrame,
        clear_color: [f32; 4],
    ) -> RenderResult<u32> {
        backend.bind_framebuffer(None);
        backend.clear(clear_color, Some(FAR_DEPTH));
        if !gbuffer.is_complete() {
            return Ok(0);
        }

        backend.use_program(self.program.handle());
        gbuffer.bind_color_for_read(backend, 0);
        gbuffer.bind_depth_for_read(backend, gbuffer.color_slot_count() as u32);
        params.bind_global(backend);
        params.bind_composite(backend);

        let binding = self.quad.vertex_binding(backend, &self.program)?;
        backend.bind_vertex_binding(binding);
        backend.draw_indexed(0..self.quad.index_count(), 0);

        backend.blit_depth_to_surface(gbuffer.framebuffer());
        Ok(1)
    }
}

/// Composite shader, appended to the shared parameter declarations
pub const COMPOSITE_SHADER: &str = r#"
struct CompositeParams {
    clear_color: vec4<f32>,
    mode: u32,
}

const MODE_DEPTH: u32 = 4u;

@group(0) @binding(2) var<uniform> composite: CompositeParams;
@group(1) @binding(0) var gbuffer_position: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_depth: texture_depth_2d;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(input.position.xy, 0.0, 1.0);
    out.uv = input.uv;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(floor(input.clip_position.xy));
    let depth = textureLoad(gbuffer_depth, pixel, 0);
    if composite.mode == MODE_DEPTH {
        return vec4<f32>(vec3<f32>(depth), 1.0);
    }
    // Nothing was rasterized here
    if depth >= 1.0 {
        return composite.clear_color;
    }

    let position = textureLoad(gbuffer_position, pixel, 0).xyz;
    let normal = textureLoad(gbuffer_normal, pixel, 0).xyz;
    let albedo = textureLoad(gbuffer_albedo, pixel, 0).rgb;

    // 1 positions, 2 normals, 3 albedo
    var color = shade(position, normal, albedo);
    switch composite.mode {
        case 1u: {
            color = fract(position);
        }
        case 2u: {
            color = normal * 0.5 + 0.5;
        }
        case 3u: {
            color = albedo;
        }
        default: {}
    }
    return vec4<f32>(color, 1.0);
}
"#;
