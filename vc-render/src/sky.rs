use bevy::math::primitives::Sphere;
use bevy::prelude::*;
use bevy::render::mesh::{Indices, VertexAttributeValues};
use vc_utils::SkyStop;

pub const SKY_RADIUS: f32 = 500.0;

/// Linear interpolation over stops sorted by `at`. `t` is clamped to the
/// first and last stop.
pub fn sample_gradient(stops: &[SkyStop], t: f32) -> [f32; 3] {
    let Some(first) = stops.first() else {
        return [0.0; 3];
    };
    if t <= first.at {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if t <= b.at {
            let span = b.at - a.at;
            let k = if span > 0.0 { (t - a.at) / span } else { 1.0 };
            return [
                a.color[0] + (b.color[0] - a.color[0]) * k,
                a.color[1] + (b.color[1] - a.color[1]) * k,
                a.color[2] + (b.color[2] - a.color[2]) * k,
            ];
        }
    }
    stops.last().map_or([0.0; 3], |s| s.color)
}

/// Normalised height of a point on the sphere, 0 at the bottom pole.
pub fn height_fraction(y: f32, radius: f32) -> f32 {
    ((y / radius + 1.0) * 0.5).clamp(0.0, 1.0)
}

/// UV sphere seen from inside, with the gradient baked into vertex colours.
pub fn sky_sphere_mesh(radius: f32, stops: &[SkyStop]) -> Mesh {
    let mut stops = stops.to_vec();
    stops.sort_by(|a, b| a.at.total_cmp(&b.at));

    let mut mesh = Sphere::new(radius).mesh().uv(48, 24);

    let colors: Vec<[f32; 4]> = match mesh.attribute(Mesh::ATTRIBUTE_POSITION) {
        Some(VertexAttributeValues::Float32x3(positions)) => positions
            .iter()
            .map(|p| {
                let [r, g, b] = sample_gradient(&stops, height_fraction(p[1], radius));
                [r, g, b, 1.0]
            })
            .collect(),
        _ => Vec::new(),
    };
    mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, colors);

    if let Some(VertexAttributeValues::Float32x3(normals)) =
        mesh.attribute_mut(Mesh::ATTRIBUTE_NORMAL)
    {
        for n in normals.iter_mut() {
            *n = [-n[0], -n[1], -n[2]];
        }
    }
    match mesh.indices_mut() {
        Some(Indices::U32(indices)) => {
            for tri in indices.chunks_exact_mut(3) {
                tri.swap(1, 2);
            }
        }
        Some(Indices::U16(indices)) => {
            for tri in indices.chunks_exact_mut(3) {
                tri.swap(1, 2);
            }
        }
        None => {}
    }
    mesh
}
