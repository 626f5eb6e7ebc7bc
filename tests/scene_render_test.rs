mod common;

use std::f32::consts::{FRAC_PI_2, FRAC_PI_3, FRAC_PI_6, PI};

use common::test_utils::{
    cube_vertices, draws_into, draws_with, quad_vertices, recording_scene, solid_image,
};
use penumbra::{
    Scene,
    camera::Projection,
    cgmath::{Matrix4, Point3, Rad, Vector3, perspective},
    config::SceneConfig,
    context::{
        Capability, ClearMask, Face, UniformLocation, UniformType, UniformValue,
        recording::{Call, RecordingContext},
    },
    error::{ConstructionError, RenderError, SceneError, ShaderError},
};

const ALBEDO: UniformLocation = UniformLocation::Texture { binding: 0 };
const SHADOW_MAP: UniformLocation = UniformLocation::Texture { binding: 2 };
const SHININESS: UniformLocation = UniformLocation::Block {
    offset: 348,
    ty: UniformType::Float,
};

fn mat4(m: Matrix4<f32>) -> UniformValue {
    UniformValue::Mat4(m.into())
}

/// Short names for the call log, enough to check ordering.
fn call_names(calls: &[Call]) -> Vec<&'static str> {
    calls
        .iter()
        .map(|call| match call {
            Call::BindFramebuffer(Some(_)) => "bind shadow framebuffer",
            Call::BindFramebuffer(None) => "bind screen",
            Call::Clear(_) => "clear",
            Call::Viewport { .. } => "viewport",
            Call::CullFace(_) => "cull",
            Call::UseProgram(_) => "use",
            Call::SetUniform { .. } => "uniform",
            Call::BindVertexBuffer(_) => "bind buffer",
            Call::VertexAttribute(_) => "attribute",
            Call::BindTexture { .. } => "bind texture",
            Call::Draw { .. } => "draw",
            Call::Flush => "flush",
            _ => "other",
        })
        .collect()
}

#[test]
fn single_cube_renders_once_per_pass() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene
        .create_texture(&solid_image(4, 4, [200, 40, 40, 255]))
        .unwrap();
    let model = scene.create_model(mesh, texture, 32.0).unwrap();
    scene.add_model(model).unwrap();
    scene.set_camera(Point3::new(3.0, 10.0, 3.0), Rad(-FRAC_PI_3), Rad(-FRAC_PI_2));
    scene.set_projection(Rad(FRAC_PI_6), 800.0 / 600.0);

    scene.context_mut().clear_log();
    scene.render().unwrap();

    let ctx = scene.context();
    assert_eq!(ctx.draws().len(), 2);

    let shadow_framebuffer = scene.shadow_map().framebuffer();
    let shadow_draws = draws_into(ctx, Some(shadow_framebuffer));
    let [depth_draw] = shadow_draws.as_slice() else {
        panic!("expected one depth draw, got {shadow_draws:?}");
    };
    assert_eq!(depth_draw.program, Some(scene.depth_program().program().id()));
    assert_eq!(depth_draw.cull_face, Some(Face::Front));
    assert_eq!(depth_draw.viewport, (1600, 1600));
    assert_eq!(depth_draw.attributes.len(), 1);
    assert_eq!((depth_draw.first, depth_draw.count), (0, 36));

    let screen_draws = draws_into(ctx, None);
    let [lit_draw] = screen_draws.as_slice() else {
        panic!("expected one lit draw, got {screen_draws:?}");
    };
    assert_eq!(lit_draw.program, Some(scene.lit_program().program().id()));
    assert_eq!(lit_draw.cull_face, Some(Face::Back));
    assert_eq!(lit_draw.viewport, (800, 600));
    assert_eq!(lit_draw.attributes.len(), 3);
    assert_eq!(lit_draw.vertex_buffer, depth_draw.vertex_buffer);
    assert_eq!(lit_draw.texture_for(SHADOW_MAP), Some(scene.shadow_map().texture()));
    let albedo = lit_draw.texture_for(ALBEDO).expect("albedo bound");
    assert_ne!(albedo, scene.shadow_map().texture());
    assert!(ctx.is_live_texture(albedo));

    // Depth pass strictly before the lit pass, one flush at the end.
    let mut expected = vec![
        "bind shadow framebuffer",
        "clear",
        "viewport",
        "cull",
        "use",
        "uniform",
        "bind buffer",
        "attribute",
        "uniform",
        "draw",
        "bind screen",
        "clear",
        "viewport",
        "cull",
        "use",
    ];
    expected.extend(["uniform"; 7]);
    expected.extend(["bind texture", "bind buffer"]);
    expected.extend(["attribute"; 3]);
    expected.push("bind texture");
    expected.extend(["uniform"; 3]);
    expected.extend(["draw", "flush"]);
    assert_eq!(call_names(ctx.calls()), expected);

    let clears: Vec<_> = ctx
        .calls()
        .iter()
        .filter_map(|call| match call {
            Call::Clear(mask) => Some(*mask),
            _ => None,
        })
        .collect();
    assert_eq!(clears, [ClearMask::DEPTH, ClearMask::COLOR_DEPTH]);
}

#[test]
fn lit_pass_receives_camera_light_and_projection() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let model = scene.create_model(mesh, texture, 32.0).unwrap();
    scene.add_model(model).unwrap();
    scene.set_camera(Point3::new(3.0, 10.0, 3.0), Rad(-FRAC_PI_3), Rad(-FRAC_PI_2));
    scene.set_projection(Rad(FRAC_PI_6), 800.0 / 600.0);
    scene.render().unwrap();

    let lit = scene.lit_program().program();
    let uniform = |name| lit.uniform_location(name).unwrap();
    let draws = draws_with(scene.context(), lit.id());
    let [draw] = draws.as_slice() else {
        panic!("expected one lit draw");
    };

    assert_eq!(
        draw.uniforms[&uniform("projection_matrix")],
        mat4(perspective(Rad(FRAC_PI_6), 800.0 / 600.0, 1.0, 1000.0))
    );
    assert_eq!(
        draw.uniforms[&uniform("view_matrix")],
        mat4(scene.camera().view_matrix())
    );
    assert_eq!(
        draw.uniforms[&uniform("lightspace_matrix")],
        mat4(scene.light().lightspace_matrix())
    );
    assert_eq!(
        draw.uniforms[&uniform("camera_position")],
        UniformValue::Vec3([3.0, 10.0, 3.0])
    );
    assert_eq!(
        draw.uniforms[&uniform("light_position")],
        UniformValue::Vec3([0.0, 5.0, 1.0])
    );
    assert_eq!(draw.uniforms[&SHININESS], UniformValue::Float(32.0));
}

#[test]
fn both_passes_use_the_same_model_matrix() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let model = scene.create_model(mesh, texture, 16.0).unwrap();
    scene.add_model(model).unwrap();
    {
        let instance = &mut scene.model_mut(model).unwrap().instance;
        instance.position = Vector3::new(1.0, 0.5, -2.0);
        instance.scale = 2.0;
    }
    let expected = scene.model(model).unwrap().instance.model_matrix();
    scene.render().unwrap();

    let depth = scene.depth_program().program();
    let lit = scene.lit_program().program();
    let depth_draws = draws_with(scene.context(), depth.id());
    let lit_draws = draws_with(scene.context(), lit.id());
    assert_eq!(depth_draws.len(), 1);
    assert_eq!(lit_draws.len(), 1);

    let depth_model = depth_draws[0].uniforms[&depth.uniform_location("model_matrix").unwrap()];
    let lit_model = lit_draws[0].uniforms[&lit.uniform_location("model_matrix").unwrap()];
    assert_eq!(depth_model, mat4(expected));
    assert_eq!(lit_model, mat4(expected));
    assert_eq!(
        depth_draws[0].uniforms[&depth.uniform_location("lightspace_matrix").unwrap()],
        lit_draws[0].uniforms[&lit.uniform_location("lightspace_matrix").unwrap()]
    );
}

#[test]
fn empty_scene_still_clears_both_targets() {
    let mut scene = recording_scene();
    scene.context_mut().clear_log();
    scene.render().unwrap();

    let ctx = scene.context();
    assert!(ctx.draws().is_empty());
    assert!(ctx.calls().contains(&Call::Clear(ClearMask::DEPTH)));
    assert!(ctx.calls().contains(&Call::Clear(ClearMask::COLOR_DEPTH)));
    assert_eq!(ctx.calls().last(), Some(&Call::Flush));
}

#[test]
fn missing_depth_textures_fail_construction_cleanly() {
    let mut ctx = RecordingContext::default().without(Capability::DepthTexture);
    let Err(err) = Scene::new(&mut ctx) else {
        panic!("construction should fail");
    };
    assert!(matches!(
        err,
        ConstructionError::UnsupportedCapability(Capability::DepthTexture)
    ));
    assert_eq!(ctx.bound_framebuffer(), None);
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn incomplete_shadow_framebuffer_releases_everything() {
    let mut ctx = RecordingContext::default().with_incomplete_framebuffers();
    let Err(err) = Scene::new(&mut ctx) else {
        panic!("construction should fail");
    };
    assert!(matches!(err, ConstructionError::FramebufferIncomplete(_)), "{err}");
    assert_eq!(ctx.bound_framebuffer(), None);
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn zero_sized_shadow_map_is_incomplete() {
    let mut ctx = RecordingContext::default();
    let config = SceneConfig {
        shadow_map_size: 0,
        ..Default::default()
    };
    let Err(err) = Scene::with_config(&mut ctx, config) else {
        panic!("construction should fail");
    };
    assert!(matches!(err, ConstructionError::FramebufferIncomplete(_)), "{err}");
    assert_eq!(ctx.bound_framebuffer(), None);
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn shadow_map_beyond_the_texture_limit_is_incomplete() {
    let mut ctx = RecordingContext::default().with_max_texture_size(2048);
    let config = SceneConfig {
        shadow_map_size: 4096,
        ..Default::default()
    };
    let Err(err) = Scene::with_config(&mut ctx, config) else {
        panic!("construction should fail");
    };
    assert!(
        matches!(&err, ConstructionError::FramebufferIncomplete(reason) if reason.contains("2048")),
        "{err}"
    );
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);

    let config = SceneConfig {
        shadow_map_size: 2048,
        ..Default::default()
    };
    let scene = Scene::with_config(RecordingContext::default().with_max_texture_size(2048), config)
        .unwrap();
    assert_eq!(scene.shadow_map_size(), 2048);
}

#[test]
fn degenerate_light_projection_fails_before_creating_anything() {
    let mut ctx = RecordingContext::default();
    let config = SceneConfig {
        light_projection: Projection::new(Rad(FRAC_PI_2), 1.0, 0.0, 100.0),
        ..Default::default()
    };
    let Err(err) = Scene::with_config(&mut ctx, config) else {
        panic!("construction should fail");
    };
    assert!(matches!(err, ConstructionError::InvalidConfig(_)), "{err}");
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn degenerate_camera_field_of_view_fails_construction() {
    let config = SceneConfig {
        fovy: Rad(PI),
        ..Default::default()
    };
    let Err(err) = Scene::with_config(RecordingContext::default(), config) else {
        panic!("construction should fail");
    };
    assert!(matches!(err, ConstructionError::InvalidConfig(_)), "{err}");
}

#[test]
fn link_failure_is_reported_with_its_log() {
    let mut ctx = RecordingContext::default().failing_link("bad interface");
    let Err(err) = Scene::new(&mut ctx) else {
        panic!("construction should fail");
    };
    assert!(
        matches!(&err, ConstructionError::Shader(ShaderError::Link { log, .. }) if log == "bad interface"),
        "{err}"
    );
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn scene_hands_back_a_clean_context() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&quad_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(1, 1, [0; 4])).unwrap();
    scene.destroy_mesh(mesh).unwrap();
    scene.destroy_texture(texture).unwrap();

    let ctx = scene.into_context();
    assert_eq!(ctx.live_programs(), 0);
    assert_eq!(ctx.live_buffers(), 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn mesh_create_and_destroy() {
    let mut scene = recording_scene();
    scene.context_mut().clear_log();

    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    assert_eq!(scene.context().live_buffers(), 1);
    assert!(matches!(
        scene.context().calls(),
        [Call::CreateVertexBuffer { bytes: 1152, .. }]
    ));

    scene.destroy_mesh(mesh).unwrap();
    assert_eq!(scene.context().live_buffers(), 0);
    assert_eq!(scene.destroy_mesh(mesh), Err(SceneError::StaleHandle));
}

#[test]
fn vertex_data_must_be_whole_triangles() {
    let mut scene = recording_scene();
    assert_eq!(
        scene.create_mesh(&[]),
        Err(SceneError::InvalidVertexData { len: 0 })
    );
    assert_eq!(
        scene.create_mesh(&[0.0; 25]),
        Err(SceneError::InvalidVertexData { len: 25 })
    );
    // A single vertex is not a triangle.
    assert_eq!(
        scene.create_mesh(&[0.0; 8]),
        Err(SceneError::InvalidVertexData { len: 8 })
    );
    assert_eq!(scene.context().live_buffers(), 0);
}

#[test]
fn textures_need_pixels() {
    let mut scene = recording_scene();
    assert_eq!(
        scene.create_texture(&solid_image(0, 4, [0; 4])),
        Err(SceneError::EmptyImage)
    );

    scene.context_mut().clear_log();
    scene.create_texture(&solid_image(16, 4, [0; 4])).unwrap();
    assert!(matches!(
        scene.context().calls(),
        [Call::CreateTexture {
            width: 16,
            height: 4,
            mip_levels: 5,
            ..
        }]
    ));
}

#[test]
fn shininess_must_be_positive_and_finite() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&quad_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(1, 1, [0; 4])).unwrap();

    assert_eq!(
        scene.create_model(mesh, texture, 0.0),
        Err(SceneError::InvalidShininess(0.0))
    );
    assert!(matches!(
        scene.create_model(mesh, texture, f32::NAN),
        Err(SceneError::InvalidShininess(v)) if v.is_nan()
    ));

    let model = scene.create_model(mesh, texture, 8.0).unwrap();
    assert_eq!(
        scene.set_shininess(model, -1.0),
        Err(SceneError::InvalidShininess(-1.0))
    );
    assert_eq!(scene.model(model).unwrap().shininess(), 8.0);
    scene.set_shininess(model, 64.0).unwrap();
    assert_eq!(scene.model(model).unwrap().shininess(), 64.0);
}

#[test]
fn destroyed_texture_skips_only_its_models() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let red = scene.create_texture(&solid_image(2, 2, [255, 0, 0, 255])).unwrap();
    let blue = scene.create_texture(&solid_image(2, 2, [0, 0, 255, 255])).unwrap();
    let red_cube = scene.create_model(mesh, red, 32.0).unwrap();
    let blue_cube = scene.create_model(mesh, blue, 32.0).unwrap();
    scene.add_model(red_cube).unwrap();
    scene.add_model(blue_cube).unwrap();

    scene.destroy_texture(red).unwrap();
    assert_eq!(scene.destroy_texture(red), Err(SceneError::StaleHandle));
    assert_eq!(
        scene.create_model(mesh, red, 32.0),
        Err(SceneError::StaleHandle)
    );

    scene.context_mut().clear_log();
    scene.render().unwrap();
    let ctx = scene.context();
    assert_eq!(draws_into(ctx, Some(scene.shadow_map().framebuffer())).len(), 1);
    let lit_draws = draws_into(ctx, None);
    assert_eq!(lit_draws.len(), 1);
    assert!(ctx.is_live_texture(lit_draws[0].texture_for(ALBEDO).unwrap()));

    // The model itself is still there until removed.
    assert!(scene.model(red_cube).is_ok());
    assert_eq!(scene.models().count(), 2);
}

#[test]
fn destroyed_mesh_skips_its_models() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let model = scene.create_model(mesh, texture, 32.0).unwrap();
    scene.add_model(model).unwrap();
    scene.destroy_mesh(mesh).unwrap();

    scene.render().unwrap();
    assert!(scene.context().draws().is_empty());
}

#[test]
fn handles_from_another_scene_are_rejected() {
    let mut first = recording_scene();
    let mut second = recording_scene();
    let mesh = first.create_mesh(&quad_vertices()).unwrap();
    let texture = first.create_texture(&solid_image(1, 1, [0; 4])).unwrap();
    let model = first.create_model(mesh, texture, 4.0).unwrap();

    let own_texture = second.create_texture(&solid_image(1, 1, [0; 4])).unwrap();
    assert_eq!(
        second.create_model(mesh, own_texture, 4.0),
        Err(SceneError::ForeignHandle)
    );
    assert_eq!(second.destroy_mesh(mesh), Err(SceneError::ForeignHandle));
    assert_eq!(second.destroy_texture(texture), Err(SceneError::ForeignHandle));
    assert_eq!(second.add_model(model), Err(SceneError::ForeignHandle));
    assert_eq!(first.context().live_buffers(), 1);
    assert_eq!(first.context().live_textures(), 2);
}

#[test]
fn models_sharing_mesh_and_texture_differ_in_shininess() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let dull = scene.create_model(mesh, texture, 4.0).unwrap();
    let shiny = scene.create_model(mesh, texture, 128.0).unwrap();
    scene.model_mut(shiny).unwrap().instance.position = Vector3::new(2.0, 0.0, 0.0);
    scene.add_model(dull).unwrap();
    scene.add_model(shiny).unwrap();

    scene.render().unwrap();
    let lit_draws = draws_into(scene.context(), None);
    assert_eq!(lit_draws.len(), 2);
    assert_eq!(lit_draws[0].uniforms[&SHININESS], UniformValue::Float(4.0));
    assert_eq!(lit_draws[1].uniforms[&SHININESS], UniformValue::Float(128.0));
    assert_eq!(lit_draws[0].vertex_buffer, lit_draws[1].vertex_buffer);
    assert_eq!(lit_draws[0].texture_for(ALBEDO), lit_draws[1].texture_for(ALBEDO));
}

#[test]
fn render_set_membership() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let model = scene.create_model(mesh, texture, 32.0).unwrap();

    // Created but not added.
    scene.render().unwrap();
    assert!(scene.context().draws().is_empty());

    scene.add_model(model).unwrap();
    scene.add_model(model).unwrap();
    assert_eq!(scene.models().collect::<Vec<_>>(), [model]);
    scene.context_mut().clear_log();
    scene.render().unwrap();
    assert_eq!(scene.context().draws().len(), 2);

    scene.remove_model(model).unwrap();
    scene.context_mut().clear_log();
    scene.render().unwrap();
    assert!(scene.context().draws().is_empty());
    assert!(scene.model(model).is_ok());

    scene.add_model(model).unwrap();
    scene.destroy_model(model).unwrap();
    assert_eq!(scene.model(model).err(), Some(SceneError::StaleHandle));
    assert_eq!(scene.add_model(model), Err(SceneError::StaleHandle));
    assert_eq!(scene.models().count(), 0);
}

#[test]
fn viewport_follows_the_surface() {
    let mut scene = recording_scene();
    assert_eq!(scene.viewport(), (800, 600));
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let model = scene.create_model(mesh, texture, 32.0).unwrap();
    scene.add_model(model).unwrap();

    scene.set_viewport(1024, 768);
    assert_eq!(scene.viewport(), (1024, 768));
    assert!(scene.context().calls().contains(&Call::ResizeSurface {
        width: 1024,
        height: 768
    }));

    scene.context_mut().clear_log();
    scene.render().unwrap();
    let ctx = scene.context();
    assert_eq!(draws_into(ctx, None)[0].viewport, (1024, 768));
    assert_eq!(
        draws_into(ctx, Some(scene.shadow_map().framebuffer()))[0].viewport,
        (1600, 1600)
    );
}

#[test]
fn degenerate_projections_keep_the_previous_one() {
    let mut scene = recording_scene();
    let mesh = scene.create_mesh(&cube_vertices()).unwrap();
    let texture = scene.create_texture(&solid_image(2, 2, [255; 4])).unwrap();
    let model = scene.create_model(mesh, texture, 32.0).unwrap();
    scene.add_model(model).unwrap();

    scene.set_projection(Rad(FRAC_PI_3), 2.0);
    let kept = *scene.projection();
    assert_eq!(kept.aspect, 2.0);

    for (fovy, aspect) in [
        (FRAC_PI_3, 0.0),
        (FRAC_PI_3, -1.5),
        (FRAC_PI_3, f32::NAN),
        (FRAC_PI_3, f32::INFINITY),
        (0.0, 1.0),
        (PI, 1.0),
        (-FRAC_PI_6, 1.0),
        (f32::NAN, 1.0),
    ] {
        scene.set_projection(Rad(fovy), aspect);
        assert_eq!(*scene.projection(), kept, "fovy {fovy}, aspect {aspect}");
        assert_eq!(scene.render(), Ok(()));
    }

    let lit = scene.lit_program().program();
    let projection = lit.uniform_location("projection_matrix").unwrap();
    let draws = draws_with(scene.context(), lit.id());
    let last = draws.last().expect("lit draws");
    assert_eq!(
        last.uniforms[&projection],
        mat4(perspective(Rad(FRAC_PI_3), 2.0, 1.0, 1000.0))
    );
}

#[test]
fn zero_width_surface_still_renders() {
    let mut scene = Scene::new(RecordingContext::new(0, 600)).unwrap();
    assert_eq!(scene.projection().aspect, 1.0 / 600.0);
    assert_eq!(scene.render(), Ok(()));

    scene.set_viewport(0, 0);
    assert_eq!(scene.render(), Ok(()));
}

#[test]
fn light_position_is_configurable() {
    let mut scene = recording_scene();
    assert_eq!(scene.light_position(), Point3::new(0.0, 5.0, 1.0));
    scene.set_light_position(Point3::new(-3.0, 8.0, 2.0));
    assert_eq!(scene.light().position, Point3::new(-3.0, 8.0, 2.0));
}

#[test]
fn lost_context_fails_every_frame() {
    let mut scene = recording_scene();
    scene.render().unwrap();

    scene.context_mut().lose();
    assert_eq!(scene.render(), Err(RenderError::ContextLost));
    assert_eq!(scene.render(), Err(RenderError::ContextLost));
}
