//! Procedural scenes shared by the debug programs. Meshes are built straight into render-api types.

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use render_api::{ExtractedMaterial, ExtractedMesh, ExtractedMeshes, ExtractedView, PointLight};

/// Interleaved position, normal, uv.
pub type Vertex = [f32; 8];

#[derive(Default)]
pub struct MeshBuilder {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshBuilder {
    /// Rectangle spanned by half-extents `u` and `v` around `center`, facing `u x v`.
    pub fn quad(&mut self, center: Vec3, u: Vec3, v: Vec3) -> &mut Self {
        let n = u.cross(v).normalize();
        let base = self.vertices.len() as u32;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (su, sv) in corners {
            let p = center + u * su + v * sv;
            self.vertices.push([p.x, p.y, p.z, n.x, n.y, n.z, (su + 1.0) * 0.5, (sv + 1.0) * 0.5]);
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self
    }

    /// Closed box with outward faces.
    pub fn cuboid(&mut self, center: Vec3, half: Vec3) -> &mut Self {
        let (x, y, z) = (Vec3::X * half.x, Vec3::Y * half.y, Vec3::Z * half.z);
        self.quad(center + x, -z, y)
            .quad(center - x, z, y)
            .quad(center + y, z, x)
            .quad(center - y, x, z)
            .quad(center + z, x, y)
            .quad(center - z, -x, y)
    }

    pub fn build(&self, entity_id: u64, transform: Mat4, material: ExtractedMaterial) -> ExtractedMesh {
        ExtractedMesh {
            entity_id,
            vertex_data: bytemuck::cast_slice(&self.vertices).to_vec(),
            index_data: bytemuck::cast_slice(&self.indices).to_vec(),
            transform: transform.to_cols_array(),
            visible: true,
            material,
        }
    }
}

fn diffuse(r: f32, g: f32, b: f32) -> ExtractedMaterial {
    ExtractedMaterial { base_color: [r, g, b, 1.0], roughness: 0.9, ..ExtractedMaterial::default() }
}

/// Room spanning x, z in [-1, 1] and y in [0, 2], open towards +Z, with a tall and a short block.
/// `spin` rotates the short block about Y so hosts can exercise motion vectors.
pub fn cornell_box(spin: f32) -> ExtractedMeshes {
    let mut meshes = HashMap::new();
    let mut add = |mesh: ExtractedMesh| {
        meshes.insert(mesh.entity_id, mesh);
    };

    let mut white = MeshBuilder::default();
    white
        .quad(Vec3::ZERO, Vec3::Z, Vec3::X)
        .quad(Vec3::new(0.0, 2.0, 0.0), Vec3::X, Vec3::Z)
        .quad(Vec3::new(0.0, 1.0, -1.0), Vec3::X, Vec3::Y);
    add(white.build(1, Mat4::IDENTITY, diffuse(0.73, 0.73, 0.73)));

    let mut left = MeshBuilder::default();
    left.quad(Vec3::new(-1.0, 1.0, 0.0), Vec3::NEG_Z, Vec3::Y);
    add(left.build(2, Mat4::IDENTITY, diffuse(0.65, 0.05, 0.05)));

    let mut right = MeshBuilder::default();
    right.quad(Vec3::new(1.0, 1.0, 0.0), Vec3::Z, Vec3::Y);
    add(right.build(3, Mat4::IDENTITY, diffuse(0.12, 0.45, 0.15)));

    let mut tall = MeshBuilder::default();
    tall.cuboid(Vec3::new(0.0, 0.6, 0.0), Vec3::new(0.3, 0.6, 0.3));
    add(tall.build(
        4,
        Mat4::from_translation(Vec3::new(-0.35, 0.0, -0.3)) * Mat4::from_rotation_y(0.3),
        ExtractedMaterial { base_color: [0.8, 0.8, 0.8, 1.0], specular: [0.9; 3], roughness: 0.15, emissive: [0.0; 3] },
    ));

    let mut short = MeshBuilder::default();
    short.cuboid(Vec3::new(0.0, 0.3, 0.0), Vec3::splat(0.3));
    add(short.build(5, Mat4::from_translation(Vec3::new(0.4, 0.0, 0.35)) * Mat4::from_rotation_y(-0.3 + spin), diffuse(0.73, 0.73, 0.73)));

    let mut lamp = MeshBuilder::default();
    lamp.quad(Vec3::new(0.0, 1.99, 0.0), Vec3::X * 0.25, Vec3::Z * 0.25);
    add(lamp.build(6, Mat4::IDENTITY, ExtractedMaterial { emissive: [1.0; 3], ..diffuse(1.0, 1.0, 1.0) }));

    ExtractedMeshes { meshes }
}

pub fn cornell_light() -> PointLight {
    PointLight { position: [0.0, 1.8, 0.0], color: [6.0, 5.6, 5.0], radius: 4.0, falloff_exponent: 2.0 }
}

/// Camera circling the open side of the box.
pub fn orbit_view(angle: f32, size: (u32, u32)) -> ExtractedView {
    let (w, h) = size;
    let aspect = if h > 0 { w as f32 / h as f32 } else { 1.0 };
    let eye = Vec3::new(angle.sin() * 0.6, 1.0, 3.4 + angle.cos() * 0.2);
    let (near, far) = (0.1, 50.0);
    ExtractedView {
        view: Mat4::look_at_rh(eye, Vec3::new(0.0, 1.0, 0.0), Vec3::Y).to_cols_array(),
        proj: Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, aspect, near, far).to_cols_array(),
        near,
        far,
        viewport_size: size,
        directional_light: None,
        point_lights: vec![cornell_light()],
        spot_lights: Vec::new(),
        sky_color: [0.02, 0.02, 0.03],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(v: &Vertex) -> Vec3 {
        Vec3::new(v[0], v[1], v[2])
    }

    #[test]
    fn triangles_wind_towards_their_normal() {
        let mut b = MeshBuilder::default();
        b.cuboid(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0)).quad(Vec3::ZERO, Vec3::Z, Vec3::X);
        for tri in b.indices.chunks(3) {
            let [a, c, d] = [tri[0], tri[1], tri[2]].map(|i| &b.vertices[i as usize]);
            let face = (position(c) - position(a)).cross(position(d) - position(a));
            let n = Vec3::new(a[3], a[4], a[5]);
            assert!(face.dot(n) > 0.0);
        }
    }

    #[test]
    fn cuboid_normals_point_outward() {
        let mut b = MeshBuilder::default();
        b.cuboid(Vec3::new(2.0, 0.0, 0.0), Vec3::splat(0.5));
        for v in &b.vertices {
            let n = Vec3::new(v[3], v[4], v[5]);
            assert!((position(v) - Vec3::new(2.0, 0.0, 0.0)).dot(n) > 0.0);
        }
    }

    #[test]
    fn room_faces_inward() {
        let scene = cornell_box(0.0);
        assert_eq!(scene.meshes.len(), 6);
        let center = Vec3::new(0.0, 1.0, 0.0);
        for id in [1u64, 2, 3] {
            let mesh = &scene.meshes[&id];
            let verts: Vec<Vertex> = bytemuck::pod_collect_to_vec(&mesh.vertex_data);
            for v in &verts {
                let n = Vec3::new(v[3], v[4], v[5]);
                assert!((center - position(v)).dot(n) > 0.0, "mesh {id}");
            }
        }
    }
}
