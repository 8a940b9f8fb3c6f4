//! Octahedral mapping: unit directions to `[0,1]^2`, and the remap of a six-layer cube capture
//! into one octahedral atlas slice.

use glam::{Vec2, Vec3, Vec4};
use wgpu::CommandEncoder;

use crate::camera::cube_face_basis;
use crate::shader;

const OCTAHEDRAL_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/octahedral.wgsl"));

pub fn oct_encode(n: Vec3) -> Vec2 {
    let p = Vec2::new(n.x, n.y) / (n.x.abs() + n.y.abs() + n.z.abs());
    let p = if n.z < 0.0 {
        let sign = Vec2::new(if p.x >= 0.0 { 1.0 } else { -1.0 }, if p.y >= 0.0 { 1.0 } else { -1.0 });
        (Vec2::ONE - Vec2::new(p.y.abs(), p.x.abs())) * sign
    } else {
        p
    };
    p * 0.5 + Vec2::splat(0.5)
}

pub fn oct_decode(uv: Vec2) -> Vec3 {
    let f = uv * 2.0 - Vec2::ONE;
    let mut n = Vec3::new(f.x, f.y, 1.0 - f.x.abs() - f.y.abs());
    let t = (-n.z).clamp(0.0, 1.0);
    n.x += if n.x >= 0.0 { -t } else { t };
    n.y += if n.y >= 0.0 { -t } else { t };
    n.normalize()
}

/// Face index (capture order +X, -X, +Y, -Y, -Z, +Z) by major axis.
pub fn cube_face_index(dir: Vec3) -> usize {
    let a = dir.abs();
    if a.x >= a.y && a.x >= a.z {
        if dir.x > 0.0 { 0 } else { 1 }
    } else if a.y >= a.z {
        if dir.y > 0.0 { 2 } else { 3 }
    } else if dir.z < 0.0 {
        4
    } else {
        5
    }
}

/// Face and texture uv (top-left origin) at which the capture of that face sees `dir`.
pub fn cube_face_of(dir: Vec3) -> (usize, Vec2) {
    let face = cube_face_index(dir);
    let (r, u, f) = cube_face_basis(face);
    let z = dir.dot(f);
    let ndc = Vec2::new(dir.dot(r), dir.dot(u)) / z;
    (face, Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5))
}

/// Inverse of [`cube_face_of`].
pub fn face_direction(face: usize, uv: Vec2) -> Vec3 {
    let (r, u, f) = cube_face_basis(face);
    (f + r * (uv.x * 2.0 - 1.0) + u * (1.0 - uv.y * 2.0)).normalize()
}

/// How a cube channel is written into its atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeMode {
    Color,
    /// World normal packed as `n * 0.5 + 0.5` for an unorm atlas.
    Normal,
    /// Radial distance in the red channel.
    Distance,
}

impl EncodeMode {
    fn code(self) -> u32 {
        match self {
            EncodeMode::Color => 0,
            EncodeMode::Normal => 1,
            EncodeMode::Distance => 2,
        }
    }

    pub fn apply(self, v: Vec4) -> Vec4 {
        match self {
            EncodeMode::Color => v,
            EncodeMode::Normal => (v.truncate() * 0.5 + Vec3::splat(0.5)).extend(1.0),
            EncodeMode::Distance => Vec4::new(v.x, 0.0, 0.0, 0.0),
        }
    }
}

/// Nearest texel of `faces[face]` (row-major, `face_res` squared) at `uv`.
fn load_face(faces: &[Vec<Vec4>; 6], face_res: u32, face: usize, uv: Vec2) -> Vec4 {
    let max = face_res as i32 - 1;
    let x = ((uv.x * face_res as f32) as i32).clamp(0, max) as usize;
    let y = ((uv.y * face_res as f32) as i32).clamp(0, max) as usize;
    faces[face][y * face_res as usize + x]
}

/// CPU mirror of the octahedral remap shader.
pub fn remap_cube(faces: &[Vec<Vec4>; 6], face_res: u32, out_res: u32, mode: EncodeMode) -> Vec<Vec4> {
    let mut out = Vec::with_capacity((out_res * out_res) as usize);
    for y in 0..out_res {
        for x in 0..out_res {
            let uv = (Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) / out_res as f32;
            let (face, face_uv) = cube_face_of(oct_decode(uv));
            out.push(mode.apply(load_face(faces, face_res, face, face_uv)));
        }
    }
    out
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct OctahedralParams {
    encode_mode: u32,
    face_res: u32,
    _pad: [u32; 2],
}

/// GPU remap from a 6-layer cube array into one atlas layer. One pipeline per atlas format.
pub struct OctahedralMapping {
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: Vec<(wgpu::TextureFormat, wgpu::RenderPipeline)>,
}

impl OctahedralMapping {
    pub fn new(device: &wgpu::Device, formats: &[wgpu::TextureFormat]) -> Self {
        let module = shader::create_module(device, "octahedral_shader", OCTAHEDRAL_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("octahedral_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<OctahedralParams>() as u64),
                shader::texture_entry(1, wgpu::TextureSampleType::Float { filterable: false }, wgpu::TextureViewDimension::D2Array),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("octahedral_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let mut mapping = Self { module, layout, bind_group_layout, pipelines: Vec::new() };
        for &format in formats {
            mapping.pipeline_for(device, format);
        }
        mapping
    }

    fn pipeline_for(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> usize {
        if let Some(i) = self.pipelines.iter().position(|(f, _)| *f == format) {
            return i;
        }
        let pipeline = shader::fullscreen_pipeline(
            device,
            "octahedral_pipeline",
            &self.module,
            &self.layout,
            "fs",
            &[Some(wgpu::ColorTargetState::from(format))],
        );
        self.pipelines.push((format, pipeline));
        self.pipelines.len() - 1
    }

    /// Remap `cube` (6 layers of `face_res`) into `target`, a single-layer view of format `format`.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        cube: &wgpu::TextureView,
        face_res: u32,
        mode: EncodeMode,
        format: wgpu::TextureFormat,
        target: &wgpu::TextureView,
    ) {
        let index = self.pipeline_for(device, format);
        let params = OctahedralParams { encode_mode: mode.code(), face_res, _pad: [0; 2] };
        let buf = shader::write_uniform(device, queue, "octahedral_params", &params);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("octahedral_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(cube) },
            ],
        });
        let pipeline = &self.pipelines[index].1;
        shader::draw_fullscreen(encoder, "octahedral_remap", pipeline, &bind_group, target, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const AXES: [Vec3; 6] = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::NEG_Z, Vec3::Z];

    #[test]
    fn oct_round_trip() {
        let dirs = [
            Vec3::new(0.3, -0.5, 0.8),
            Vec3::new(-0.7, 0.2, -0.6),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-0.1, -0.9, -0.2),
        ];
        for d in dirs {
            let d = d.normalize();
            let back = oct_decode(oct_encode(d));
            assert_relative_eq!(back.x, d.x, epsilon = 1e-5);
            assert_relative_eq!(back.y, d.y, epsilon = 1e-5);
            assert_relative_eq!(back.z, d.z, epsilon = 1e-5);
        }
    }

    #[test]
    fn face_uv_round_trip() {
        for face in 0..6 {
            for uv in [Vec2::new(0.5, 0.5), Vec2::new(0.1, 0.8), Vec2::new(0.95, 0.05)] {
                let d = face_direction(face, uv);
                let (f, back) = cube_face_of(d);
                assert_eq!(f, face);
                assert_relative_eq!(back.x, uv.x, epsilon = 1e-5);
                assert_relative_eq!(back.y, uv.y, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn axes_land_on_face_centres() {
        for (face, axis) in AXES.iter().enumerate() {
            let (f, uv) = cube_face_of(*axis);
            assert_eq!(f, face);
            assert_relative_eq!(uv.x, 0.5, epsilon = 1e-6);
            assert_relative_eq!(uv.y, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn remap_recovers_all_six_faces() {
        let face_res = 8;
        let faces: [Vec<Vec4>; 6] =
            std::array::from_fn(|i| vec![Vec4::new(i as f32, 0.0, 0.0, 1.0); (face_res * face_res) as usize]);
        let out_res = 32;
        let atlas = remap_cube(&faces, face_res, out_res, EncodeMode::Color);
        for (face, axis) in AXES.iter().enumerate() {
            let uv = oct_encode(*axis);
            let x = ((uv.x * out_res as f32) as u32).min(out_res - 1);
            let y = ((uv.y * out_res as f32) as u32).min(out_res - 1);
            assert_eq!(atlas[(y * out_res + x) as usize].x, face as f32, "axis {axis}");
        }
    }

    #[test]
    fn encode_modes_pack_channels() {
        let n = Vec4::new(0.0, -1.0, 0.0, 0.0);
        assert_eq!(EncodeMode::Normal.apply(n), Vec4::new(0.5, 0.0, 0.5, 1.0));
        assert_eq!(EncodeMode::Distance.apply(Vec4::new(3.0, 9.0, 9.0, 9.0)), Vec4::new(3.0, 0.0, 0.0, 0.0));
    }
}
