mod common;

use common::*;
use deferred_frame::backend::headless::{Command, HeadlessBackend};
use deferred_frame::backend::{GraphicsBackend, ProgramDescriptor, QuadVertex};
use deferred_frame::pipeline::{
    FrameSequence, GLOBAL_HEADER_SIZE, LIGHT_RECORD_STRIDE, LOCAL_PARAMS_SLOT, MAX_SHADED_LIGHTS,
};
use deferred_frame::resources::{
    BindingError, Material, Mesh, MeshPart, Model, ProgramInputs, ShaderProgram, Submesh, TextureId,
};
use deferred_frame::scene::Entity;
use deferred_frame::{FrameMode, FrameState, RenderError, RenderMode, Renderer, RendererConfig};
use glam::{Vec2, Vec3};
use rstest::rstest;

fn quad_model(renderer: &mut Renderer<HeadlessBackend>) -> usize {
    let vertices = [
        QuadVertex {
            position: Vec3::new(0.0, 0.0, 0.0),
            uv: Vec2::new(0.0, 0.0),
        },
        QuadVertex {
            position: Vec3::new(1.0, 0.0, 0.0),
            uv: Vec2::new(1.0, 0.0),
        },
        QuadVertex {
            position: Vec3::new(1.0, 1.0, 0.0),
            uv: Vec2::new(1.0, 1.0),
        },
    ];
    let part = renderer
        .with_backend(|backend, queue| {
            MeshPart::from_raw(
                backend,
                queue,
                "Position Uv Triangle",
                &vertices,
                QuadVertex::layout(),
                &[0, 1, 2],
                vec![Submesh {
                    index_offset: 0,
                    index_count: 3,
                    material_index: 0,
                }],
            )
        })
        .unwrap();
    renderer
        .add_model(Model::new("Triangle").with_part(part))
        .unwrap()
}

#[test]
fn test_empty_scene_composites_clear_color() {
    let mut renderer = renderer(800, 600);
    let mut scene = scene();

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(
        report.states,
        vec![
            FrameState::PackParams,
            FrameState::GeometryPass,
            FrameState::CompositePass,
            FrameState::OverlayPass,
            FrameState::Presented,
            FrameState::Idle,
        ]
    );
    assert!(!report.target_incomplete);
    assert_eq!(report.draw_calls, 1);

    let gbuffer = renderer.gbuffer().unwrap();
    assert_eq!(gbuffer.size(), (800, 600));
    assert_eq!(gbuffer.color_slot_count(), 3);
    let gbuffer_fb = gbuffer.framebuffer();

    let commands = take_commands(&mut renderer);
    let gbuffer_clear = commands
        .windows(2)
        .any(|w| {
            w[0] == Command::BindFramebuffer(Some(gbuffer_fb))
                && w[1]
                    == Command::Clear {
                        color: [0.0; 4],
                        depth: Some(1.0),
                    }
        });
    assert!(gbuffer_clear, "G-buffer depth is cleared to the far plane");

    let surface_clear = commands.windows(2).any(|w| {
        w[0] == Command::BindFramebuffer(None)
            && w[1]
                == Command::Clear {
                    color: CLEAR_COLOR,
                    depth: Some(1.0),
                }
    });
    assert!(surface_clear, "surface is cleared to the clear color");
    assert!(commands.contains(&Command::BlitDepthToSurface(gbuffer_fb)));
    assert_eq!(draws(&commands), 1);
    assert_eq!(commands.last(), Some(&Command::EndFrame));

    let composite = renderer.param_bytes(report.composite_params).unwrap();
    assert_eq!(read_f32s(composite, 4), CLEAR_COLOR.to_vec());
    assert_eq!(read_u32(composite, 16), RenderMode::Final.as_u32());
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[case(MAX_SHADED_LIGHTS)]
#[case(MAX_SHADED_LIGHTS + 4)]
fn test_global_block_size_follows_light_count(#[case] lights: usize) {
    let mut renderer = renderer(320, 240);
    let mut scene = scene();
    for i in 0..lights {
        scene.add_point_light(Vec3::new(i as f32, 1.0, 0.0), Vec3::ONE);
    }

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    let shaded = lights.min(MAX_SHADED_LIGHTS) as u64;
    assert_eq!(
        report.global_params.size,
        GLOBAL_HEADER_SIZE + shaded * LIGHT_RECORD_STRIDE
    );
    let global = renderer.param_bytes(report.global_params).unwrap();
    assert_eq!(read_u32(global, 12), shaded as u32);
}

#[test]
fn test_three_lights_pack_208_bytes() {
    let mut renderer = renderer(800, 600);
    let mut scene = scene();
    scene.add_directional_light(Vec3::NEG_Y, Vec3::ONE);
    scene.add_point_light(Vec3::new(1.0, 1.0, 0.0), Vec3::X);
    scene.add_point_light(Vec3::new(-1.0, 1.0, 0.0), Vec3::Z);

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(report.global_params.size, 16 + 3 * 64);
    // Composite plus one gizmo per light
    assert_eq!(report.draw_calls, 4);
}

#[rstest]
#[case(RenderMode::Final)]
#[case(RenderMode::Positions)]
#[case(RenderMode::Normals)]
#[case(RenderMode::Albedo)]
#[case(RenderMode::Depth)]
fn test_render_mode_reaches_composite_block(#[case] mode: RenderMode) {
    let mut renderer = renderer(64, 64);
    let mut scene = scene();
    renderer.set_render_mode(mode);

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    let composite = renderer.param_bytes(report.composite_params).unwrap();
    assert_eq!(read_u32(composite, 16), mode.as_u32());
}

#[test]
fn test_local_blocks_are_aligned_and_disjoint() {
    let mut renderer = renderer(640, 480);
    let mut scene = cube_scene(&mut renderer, 5);

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(report.draw_calls, 5 + 1);

    let alignment = renderer.param_region().unwrap().alignment();
    let ranges: Vec<_> = scene.entities.iter().map(|e| e.local_params).collect();
    for (i, range) in ranges.iter().enumerate() {
        assert_eq!(range.offset % alignment, 0);
        assert!(!range.overlaps(&report.global_params));
        for other in &ranges[i + 1..] {
            assert!(!range.overlaps(other));
        }
    }
    assert_eq!(renderer.backend().misaligned_binding_count(), 0);
}

fn local_binding_offsets(commands: &[Command]) -> Vec<u64> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::BindUniformRange { slot, offset, .. } if *slot == LOCAL_PARAMS_SLOT => {
                Some(*offset)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_local_blocks_follow_entity_changes() {
    let mut renderer = renderer(640, 480);
    let mut scene = cube_scene(&mut renderer, 3);
    let alignment = renderer.param_region().unwrap().alignment();

    renderer.run_frame(&mut scene, 0.016).unwrap();
    let offsets: Vec<_> = scene.entities.iter().map(|e| e.local_params.offset).collect();
    assert_eq!(offsets, vec![alignment, 2 * alignment, 3 * alignment]);
    take_commands(&mut renderer);

    // Dropping the first entity moves everyone down one block
    let removed = scene.entities.remove(0);
    renderer.run_frame(&mut scene, 0.016).unwrap();
    let offsets: Vec<_> = scene.entities.iter().map(|e| e.local_params.offset).collect();
    assert_eq!(offsets, vec![alignment, 2 * alignment]);
    assert_eq!(local_binding_offsets(&take_commands(&mut renderer)), offsets);

    // Re-adding at the front and appending a new one repacks in scene order
    scene.entities.insert(0, removed);
    let model = scene.entities[0].model;
    scene.add_entity(Entity::new(model).with_position(Vec3::new(0.0, 2.0, 0.0)));
    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    let ranges: Vec<_> = scene.entities.iter().map(|e| e.local_params).collect();
    for (i, range) in ranges.iter().enumerate() {
        assert_eq!(range.offset, (i as u64 + 1) * alignment);
        assert!(range.size > 0);
        assert!(!range.overlaps(&report.global_params));
        for other in &ranges[i + 1..] {
            assert!(range.offset < other.offset);
            assert!(!range.overlaps(other));
        }
    }
    let offsets: Vec<_> = ranges.iter().map(|r| r.offset).collect();
    assert_eq!(local_binding_offsets(&take_commands(&mut renderer)), offsets);
    assert_eq!(renderer.backend().misaligned_binding_count(), 0);
}

#[test]
fn test_vertex_bindings_built_once_per_program() {
    let mut renderer = renderer(64, 64);
    let mut scene = cube_scene(&mut renderer, 3);

    renderer.run_frame(&mut scene, 0.016).unwrap();
    // Shared cube part with the geometry program, quad with the composite program
    assert_eq!(renderer.backend().vertex_bindings_created(), 2);

    renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(renderer.backend().vertex_bindings_created(), 2);

    renderer.set_frame_mode(FrameMode::Forward);
    renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(renderer.backend().vertex_bindings_created(), 3);
    let cube = renderer.model(0).unwrap();
    assert_eq!(cube.parts[0].binding_count(), 2);
}

#[test]
fn test_forward_mode_skips_gbuffer() {
    let config = RendererConfig {
        frame_mode: FrameMode::Forward,
        ..config()
    };
    let mut renderer = renderer_with(320, 240, config);
    let mut scene = cube_scene(&mut renderer, 2);
    take_commands(&mut renderer);

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(
        report.states,
        vec![
            FrameState::PackParams,
            FrameState::ForwardPass,
            FrameState::OverlayPass,
            FrameState::Presented,
            FrameState::Idle,
        ]
    );
    assert_eq!(report.draw_calls, 2);

    let commands = take_commands(&mut renderer);
    assert!(!commands
        .iter()
        .any(|c| matches!(c, Command::BindFramebuffer(Some(_)))));
    assert!(!commands
        .iter()
        .any(|c| matches!(c, Command::BlitDepthToSurface(_))));
}

#[test]
fn test_unmatched_location_is_reported() {
    let mut renderer = renderer(64, 64);

    // Mesh locations {0, 1} against a program reading {0, 2}
    let result = renderer.with_backend(|backend, queue| {
        let desc = ProgramDescriptor::new("Position Uv", "// reflected elsewhere");
        let inputs = ProgramInputs::from_locations([(0, 3), (2, 2)]);
        let program = ShaderProgram::with_inputs(backend, queue, &desc, inputs).unwrap();
        let mut part = MeshPart::fullscreen_quad(backend, queue).unwrap();
        part.vertex_binding(backend, &program)
    });
    assert!(matches!(
        result,
        Err(BindingError::UnmatchedLocation { location: 2, .. })
    ));
}

#[test]
fn test_binding_error_aborts_frame_and_returns_to_idle() {
    let mut renderer = renderer(64, 64);
    let triangle = quad_model(&mut renderer);
    let mut scene = scene();
    scene.add_entity(Entity::new(triangle));

    let err = renderer.run_frame(&mut scene, 0.016).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Binding(BindingError::UnmatchedLocation { location: 2, .. })
    ));
    assert_eq!(renderer.state(), FrameState::Idle);
    // The aborted frame was still closed
    assert_eq!(renderer.backend().frames_presented(), 1);

    scene.entities.clear();
    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert_eq!(report.frame_index, 0);
    assert_eq!(renderer.frame_index(), 1);
}

#[test]
fn test_unknown_model_aborts_frame() {
    let mut renderer = renderer(64, 64);
    let mut scene = scene();
    scene.add_entity(Entity::new(42));

    let err = renderer.run_frame(&mut scene, 0.016).unwrap_err();
    assert!(matches!(err, RenderError::UnknownModel(42)));
    assert_eq!(renderer.state(), FrameState::Idle);
}

#[test]
fn test_resize_reallocates_every_attachment() {
    let mut renderer = renderer(800, 600);
    renderer.resize(1024, 768).unwrap();
    assert_eq!(renderer.size(), (1024, 768));

    let gbuffer = renderer.gbuffer().unwrap();
    assert_eq!(gbuffer.size(), (1024, 768));
    assert!(gbuffer.is_complete());

    let mut attachments: Vec<_> = (0..gbuffer.color_slot_count())
        .filter_map(|slot| gbuffer.color_attachment(slot))
        .collect();
    attachments.extend(gbuffer.depth_attachment());
    assert_eq!(attachments.len(), 4);
    for texture in attachments {
        let desc = renderer.backend().texture_descriptor(texture).unwrap();
        assert_eq!((desc.width, desc.height), (1024, 768));
    }
    assert_eq!(renderer.backend().invalid_destroy_count(), 0);
}

#[test]
fn test_zero_sized_resize_is_ignored() {
    let mut renderer = renderer(800, 600);
    renderer.resize(0, 300).unwrap();
    assert_eq!(renderer.size(), (800, 600));
    assert_eq!(renderer.gbuffer().unwrap().size(), (800, 600));
}

#[test]
fn test_incomplete_gbuffer_skips_scene_draws() {
    init_logging();
    let mut backend = HeadlessBackend::new(256, 256);
    backend.set_framebuffers_incomplete(true);
    let mut renderer = Renderer::init(backend, 256, 256, config()).unwrap();
    assert!(!renderer.gbuffer().unwrap().is_complete());

    let mut scene = cube_scene(&mut renderer, 2);
    scene.add_point_light(Vec3::Y, Vec3::ONE);
    take_commands(&mut renderer);

    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert!(report.target_incomplete);
    // Only the gizmo is drawn
    assert_eq!(report.draw_calls, 1);
    assert_eq!(report.states.last(), Some(&FrameState::Idle));

    let commands = take_commands(&mut renderer);
    assert!(commands.contains(&Command::Clear {
        color: CLEAR_COLOR,
        depth: Some(1.0),
    }));
    assert_eq!(renderer.backend().frames_presented(), 1);

    renderer.backend_mut().set_framebuffers_incomplete(false);
    renderer.resize(256, 256).unwrap();
    let report = renderer.run_frame(&mut scene, 0.016).unwrap();
    assert!(!report.target_incomplete);
    assert_eq!(report.draw_calls, 2 + 1 + 1);
}

#[rstest]
#[case(FrameState::Idle, FrameState::GeometryPass)]
#[case(FrameState::Idle, FrameState::Presented)]
#[case(FrameState::PackParams, FrameState::CompositePass)]
#[case(FrameState::PackParams, FrameState::OverlayPass)]
fn test_illegal_transitions_are_rejected(#[case] from: FrameState, #[case] to: FrameState) {
    let mut sequence = FrameSequence::new();
    if from == FrameState::PackParams {
        sequence.advance(FrameState::PackParams).unwrap();
    }
    let err = sequence.advance(to).unwrap_err();
    assert!(matches!(
        err,
        RenderError::InvalidTransition { from: f, to: t } if f == from && t == to
    ));
    assert_eq!(sequence.state(), from);
}

#[test]
fn test_shutdown_releases_everything() {
    let mut renderer = renderer(320, 240);
    let mut scene = cube_scene(&mut renderer, 3);
    scene.add_point_light(Vec3::Y, Vec3::ONE);
    scene.add_directional_light(Vec3::NEG_Y, Vec3::ONE);
    let missing = renderer.load_texture("does/not/exist.png");
    assert_eq!(missing, TextureId::NOT_FOUND);

    renderer.run_frame(&mut scene, 0.016).unwrap();
    renderer.resize(400, 300).unwrap();
    renderer.set_frame_mode(FrameMode::Forward);
    renderer.run_frame(&mut scene, 0.016).unwrap();
    assert!(renderer.backend().live_resource_count() > 0);

    renderer.shutdown();
    assert!(renderer.is_shut_down());
    assert_eq!(renderer.backend().live_resource_count(), 0);
    assert_eq!(renderer.backend().invalid_destroy_count(), 0);

    let destroyed = renderer.backend().destroyed().len();
    renderer.shutdown();
    assert_eq!(renderer.backend().destroyed().len(), destroyed);

    assert!(matches!(
        renderer.run_frame(&mut scene, 0.016),
        Err(RenderError::ShutDown)
    ));
    assert!(matches!(
        renderer.upload_mesh(&Mesh::cube(), Material::new("Late")),
        Err(RenderError::ShutDown)
    ));
}

#[test]
fn test_device_info_and_frame_counter() {
    let mut renderer = renderer(64, 64);
    assert_eq!(renderer.device_info().name, "Headless");

    let mut scene = scene();
    for expected in 0..3 {
        let report = renderer.run_frame(&mut scene, 0.5).unwrap();
        assert_eq!(report.frame_index, expected);
        assert_eq!(report.delta_time, 0.5);
    }
    assert_eq!(renderer.backend().frames_presented(), 3);
    assert_eq!(renderer.backend().surface_size(), (64, 64));
}
