#![allow(dead_code)]

use penumbra::{
    RgbaImage,
    cgmath::{Matrix4, Vector4},
    context::{
        FramebufferId, ProgramId,
        recording::{DrawRecord, RecordingContext},
    },
    logging::{LoggingConfig, init_logging},
    scene::Scene,
};

/// Unit cube centred on the origin, counter-clockwise faces seen from outside.
pub fn cube_vertices() -> Vec<f32> {
    // (normal, tangent u, tangent v) per face, with u × v = normal.
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut vertices = Vec::with_capacity(36 * 8);
    for (n, u, v) in faces {
        for (a, b) in corners {
            for axis in 0..3 {
                vertices.push(0.5 * (n[axis] + a * u[axis] + b * v[axis]));
            }
            vertices.extend_from_slice(&n);
            vertices.extend_from_slice(&[(a + 1.0) / 2.0, (b + 1.0) / 2.0]);
        }
    }
    vertices
}

/// Unit quad in the XZ plane facing +Y.
pub fn quad_vertices() -> Vec<f32> {
    vec![
        -0.5, 0.0, -0.5, 0.0, 1.0, 0.0, 0.0, 0.0, //
        -0.5, 0.0, 0.5, 0.0, 1.0, 0.0, 0.0, 1.0, //
        0.5, 0.0, -0.5, 0.0, 1.0, 0.0, 1.0, 0.0, //
        0.5, 0.0, -0.5, 0.0, 1.0, 0.0, 1.0, 0.0, //
        -0.5, 0.0, 0.5, 0.0, 1.0, 0.0, 0.0, 1.0, //
        0.5, 0.0, 0.5, 0.0, 1.0, 0.0, 1.0, 1.0, //
    ]
}

pub fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba(rgba))
}

pub fn assert_matrix_close(actual: &Matrix4<f32>, expected: &Matrix4<f32>) {
    let a: &[[f32; 4]; 4] = actual.as_ref();
    let e: &[[f32; 4]; 4] = expected.as_ref();
    for c in 0..4 {
        for r in 0..4 {
            assert!(
                (a[c][r] - e[c][r]).abs() < 1e-4,
                "column {c} row {r}: {} != {}\n{actual:?}\n{expected:?}",
                a[c][r],
                e[c][r]
            );
        }
    }
}

pub fn assert_vec4_close(actual: Vector4<f32>, expected: Vector4<f32>) {
    let diff = actual - expected;
    assert!(
        diff.x.abs() < 1e-4 && diff.y.abs() < 1e-4 && diff.z.abs() < 1e-4 && diff.w.abs() < 1e-4,
        "{actual:?} != {expected:?}"
    );
}

pub fn recording_scene() -> Scene<RecordingContext> {
    init_logging(LoggingConfig::default());
    Scene::new(RecordingContext::default()).expect("scene over a recording context")
}

/// Draws issued into `framebuffer` (`None` = on screen).
pub fn draws_into(
    ctx: &RecordingContext,
    framebuffer: Option<FramebufferId>,
) -> Vec<&DrawRecord> {
    ctx.draws()
        .iter()
        .filter(|d| d.framebuffer == framebuffer)
        .collect()
}

pub fn draws_with(ctx: &RecordingContext, program: ProgramId) -> Vec<&DrawRecord> {
    ctx.draws()
        .iter()
        .filter(|d| d.program == Some(program))
        .collect()
}
