//! CPU reference for the reflection march in `shaders/ssr.wgsl`.
//!
//! Same parametrisation as the shader: the ray is projected to pixel space, permuted so the
//! major axis is x, and walked in units of `stride` pixels along that axis. The coarse phase
//! steps through HZB cells, the fine phase is a DDA with a thickness test.

use glam::{Mat4, Vec2, Vec2Swizzles, Vec3, Vec4};

use super::SsrSettings;
use crate::camera::Camera;
use crate::hzb::HzbChain;

const SEGMENT_EPS: f32 = 1e-3;

/// NDC -> pixel (y down, origin top-left) composed with `proj`.
pub fn proj_to_pixel(proj: Mat4, width: f32, height: f32) -> Mat4 {
    let ndc_to_pixel = Mat4::from_cols(
        Vec4::new(0.5 * width, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -0.5 * height, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.5 * width, 0.5 * height, 0.0, 1.0),
    );
    ndc_to_pixel * proj
}

/// Depth buffer, its HZB and the camera that produced them.
pub struct DepthScene<'a> {
    pub depth: &'a [f32],
    pub width: u32,
    pub height: u32,
    pub hzb: &'a HzbChain,
    pub camera: &'a Camera,
}

impl DepthScene<'_> {
    fn inside(&self, pixel: Vec2) -> bool {
        pixel.x >= 0.0 && pixel.y >= 0.0 && pixel.x < self.width as f32 && pixel.y < self.height as f32
    }

    /// View-space z of the depth sample under `pixel`.
    fn scene_z(&self, pixel: Vec2) -> f32 {
        let idx = pixel.y as usize * self.width as usize + pixel.x as usize;
        self.camera.view_z_from_depth(self.depth[idx])
    }

    /// HZB minimum device depth of the cell holding `pixel` at `level`.
    fn hzb_min(&self, level: u32, pixel: Vec2) -> f32 {
        let cell = (1u32 << level) as f32;
        let mip = &self.hzb.mips[level as usize];
        mip.load((pixel.x / cell).floor() as i32, (pixel.y / cell).floor() as i32)[0]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TraceOutcome {
    Hit { pixel: [u32; 2], steps: u32 },
    Miss { steps: u32 },
}

impl TraceOutcome {
    pub fn steps(&self) -> u32 {
        match *self {
            TraceOutcome::Hit { steps, .. } | TraceOutcome::Miss { steps } => steps,
        }
    }

    pub fn hit_pixel(&self) -> Option<[u32; 2]> {
        match *self {
            TraceOutcome::Hit { pixel, .. } => Some(pixel),
            TraceOutcome::Miss { .. } => None,
        }
    }
}

struct Ray {
    p0: Vec2,
    dp: Vec2,
    q0z: f32,
    dqz: f32,
    k0: f32,
    dk: f32,
    permute: bool,
    t_max: f32,
}

impl Ray {
    fn pixel(&self, t: f32) -> Vec2 {
        let p = self.p0 + self.dp * t;
        if self.permute { p.yx() } else { p }
    }

    fn major(&self, t: f32) -> f32 {
        self.p0.x + self.dp.x * t
    }

    fn view_z(&self, t: f32) -> f32 {
        (self.q0z + self.dqz * t) / (self.k0 + self.dk * t)
    }
}

fn device_depth(params: Vec4, z: f32) -> f32 {
    (params.x * z + params.y) / (params.z * z + params.w)
}

/// March the reflection of the view ray through `origin` (view space) about `normal` (view space).
/// `jitter` is the per-pixel offset in stride units, in `[0, 1)`.
pub fn trace_reflection(scene: &DepthScene, settings: &SsrSettings, origin: Vec3, normal: Vec3, jitter: f32) -> TraceOutcome {
    if -origin.z > settings.max_distance {
        return TraceOutcome::Miss { steps: 0 };
    }
    let camera = scene.camera;
    let near_z = -camera.near;
    let view_dir = origin.normalize();
    let dir = (view_dir - 2.0 * view_dir.dot(normal) * normal).normalize();
    let ray_len = if origin.z + dir.z * settings.max_distance > near_z {
        (near_z - origin.z) / dir.z
    } else {
        settings.max_distance
    };
    let end = origin + dir * ray_len;

    let to_pixel = proj_to_pixel(camera.proj, scene.width as f32, scene.height as f32);
    let h0 = to_pixel * origin.extend(1.0);
    let h1 = to_pixel * end.extend(1.0);
    let k0 = 1.0 / h0.w;
    let k1 = 1.0 / h1.w;
    let q0 = origin * k0;
    let q1 = end * k1;
    let p0 = h0.truncate().truncate() * k0;
    let mut p1 = h1.truncate().truncate() * k1;
    if p0.distance_squared(p1) < 1e-4 {
        p1 += Vec2::splat(0.01);
    }
    let mut delta = p1 - p0;
    let permute = delta.x.abs() < delta.y.abs();
    let (p0, delta) = if permute {
        delta = delta.yx();
        (p0.yx(), delta)
    } else {
        (p0, delta)
    };
    let step_dir = delta.x.signum();
    let inv_dx = step_dir / delta.x;
    let stride = settings.stride.max(1.0);
    let ray = Ray {
        p0,
        dp: Vec2::new(step_dir, delta.y * inv_dx) * stride,
        q0z: q0.z,
        dqz: (q1.z - q0.z) * inv_dx * stride,
        k0,
        dk: (k1 - k0) * inv_dx * stride,
        permute,
        t_max: delta.x.abs() / stride,
    };

    let t0 = 1.0 + jitter;
    let mut steps = 0;
    let t_start = if settings.hiz_ray_trace {
        match coarse_phase(scene, settings, &ray, t0, &mut steps) {
            Some(t) => t,
            None => return TraceOutcome::Miss { steps },
        }
    } else {
        t0
    };
    fine_phase(scene, settings, &ray, t_start, steps)
}

/// Walk HZB cells. Returns the parameter to start the DDA from, or `None` on a miss.
fn coarse_phase(scene: &DepthScene, settings: &SsrSettings, ray: &Ray, t0: f32, steps: &mut u32) -> Option<f32> {
    let params = scene.camera.depth_params();
    let max_level = scene.hzb.mip_count().saturating_sub(1) as i32;
    let step_dir = ray.dp.x.signum();
    let stride = ray.dp.x.abs();
    let mut level = 0i32;
    let mut t = t0;
    while *steps < settings.max_steps_hzb {
        if t > ray.t_max {
            return None;
        }
        let start_pixel = ray.pixel(t);
        if !scene.inside(start_pixel) {
            return None;
        }
        *steps += 1;

        let cell = (1u32 << level) as f32;
        let pm = ray.major(t);
        let boundary = if step_dir > 0.0 { ((pm / cell).floor() + 1.0) * cell } else { (pm / cell).floor() * cell };
        let seg_end = (t + ((boundary - pm) * step_dir).max(0.0) / stride).min(ray.t_max);
        let end_pixel = ray.pixel((seg_end - SEGMENT_EPS).max(t));

        let ray_depth = device_depth(params, ray.view_z(t)).max(device_depth(params, ray.view_z(seg_end)));
        let mut cell_min = scene.hzb_min(level as u32, start_pixel);
        if scene.inside(end_pixel) {
            cell_min = cell_min.min(scene.hzb_min(level as u32, end_pixel));
        }

        if ray_depth < cell_min {
            t = seg_end + SEGMENT_EPS;
            level = (level + 1).min(max_level);
        } else if level == 0 {
            return Some(t);
        } else {
            level -= 1;
        }
    }
    Some(t)
}

fn fine_phase(scene: &DepthScene, settings: &SsrSettings, ray: &Ray, t_start: f32, mut steps: u32) -> TraceOutcome {
    let mut t = t_start;
    let mut prev_z = ray.view_z(t - 0.5);
    let mut dda_steps = 0;
    while dda_steps < settings.max_steps_dda && t <= ray.t_max {
        let z_a = prev_z;
        let z_b = ray.view_z(t + 0.5);
        prev_z = z_b;
        let (ray_z_min, ray_z_max) = if z_a > z_b { (z_b, z_a) } else { (z_a, z_b) };
        let pixel = ray.pixel(t);
        if !scene.inside(pixel) {
            return TraceOutcome::Miss { steps };
        }
        dda_steps += 1;
        steps += 1;
        let scene_z = scene.scene_z(pixel);
        let behind = ray_z_max < scene_z - settings.thickness;
        let in_front = ray_z_min > scene_z;
        if !behind && !in_front {
            return TraceOutcome::Hit { pixel: [pixel.x as u32, pixel.y as u32], steps };
        }
        t += 1.0;
    }
    TraceOutcome::Miss { steps }
}

/// Per-pixel noise in `[0, 1)`, same hash as the shader.
pub fn jitter_noise(pixel: [u32; 2], frame: u32) -> f32 {
    let p = Vec2::new(pixel[0] as f32 + (frame % 64) as f32 * 7.0, pixel[1] as f32 + (frame % 64) as f32 * 13.0);
    let mut p3 = (Vec3::new(p.x, p.y, p.x) * 0.1031).fract();
    p3 += Vec3::splat(p3.dot(Vec3::new(p3.y, p3.z, p3.x) + Vec3::splat(33.33)));
    ((p3.x + p3.y) * p3.z).fract()
}

/// Reflection image for a static frame: origin from depth, `normals` in view space,
/// hit colour weighted by the origin's `specular`. Misses and background are zero.
pub fn trace_frame(
    scene: &DepthScene,
    settings: &SsrSettings,
    normals: &[Vec3],
    color: &[Vec3],
    specular: &[Vec3],
    frame: u32,
) -> Vec<Vec4> {
    let inv_proj = scene.camera.inv_proj();
    let (w, h) = (scene.width, scene.height);
    let mut out = vec![Vec4::ZERO; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            let d = scene.depth[idx];
            if d >= 1.0 {
                continue;
            }
            let ndc = Vec2::new((x as f32 + 0.5) / w as f32 * 2.0 - 1.0, 1.0 - (y as f32 + 0.5) / h as f32 * 2.0);
            let origin = inv_proj.project_point3(ndc.extend(d));
            let jitter = settings.jitter_fraction * jitter_noise([x, y], frame);
            if let Some([hx, hy]) = trace_reflection(scene, settings, origin, normals[idx], jitter).hit_pixel() {
                let c = color[(hy * w + hx) as usize] * specular[idx];
                out[idx] = c.extend(1.0);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::resolve_cpu;

    const SIZE: u32 = 64;

    fn camera() -> Camera {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        Camera::new(Mat4::IDENTITY, proj, 0.1, 100.0)
    }

    fn wall_depth(cam: &Camera, z: f32) -> Vec<f32> {
        let clip = cam.proj * Vec4::new(0.0, 0.0, z, 1.0);
        vec![clip.z / clip.w; (SIZE * SIZE) as usize]
    }

    fn settings(max_distance: f32) -> SsrSettings {
        SsrSettings { jitter_fraction: 0.0, max_distance, ..Default::default() }
    }

    #[test]
    fn reflection_off_floor_hits_wall() {
        let cam = camera();
        let depth = wall_depth(&cam, -16.0);
        let hzb = HzbChain::from_depth(&depth, SIZE, SIZE);
        let scene = DepthScene { depth: &depth, width: SIZE, height: SIZE, hzb: &hzb, camera: &cam };
        for hiz in [true, false] {
            let s = SsrSettings { hiz_ray_trace: hiz, ..settings(10.0) };
            let outcome = trace_reflection(&scene, &s, Vec3::new(0.0, -1.0, -10.0), Vec3::Y, 0.0);
            let [x, y] = outcome.hit_pixel().expect("reflection should reach the wall");
            assert_eq!(x, 32);
            assert!((32..=34).contains(&y), "hit row {y}");
        }
    }

    #[test]
    fn origin_beyond_max_distance_never_hits() {
        let cam = camera();
        let depth = wall_depth(&cam, -16.0);
        let hzb = HzbChain::from_depth(&depth, SIZE, SIZE);
        let scene = DepthScene { depth: &depth, width: SIZE, height: SIZE, hzb: &hzb, camera: &cam };
        let s = settings(10.0);
        // Exactly at the threshold is still traced.
        assert!(trace_reflection(&scene, &s, Vec3::new(0.0, -1.0, -10.0), Vec3::Y, 0.0).hit_pixel().is_some());
        let beyond = trace_reflection(&scene, &s, Vec3::new(0.0, -1.0, -10.01), Vec3::Y, 0.0);
        assert_eq!(beyond, TraceOutcome::Miss { steps: 0 });
    }

    #[test]
    fn sky_only_depth_is_a_miss() {
        let cam = camera();
        let depth = vec![1.0; (SIZE * SIZE) as usize];
        let hzb = HzbChain::from_depth(&depth, SIZE, SIZE);
        let scene = DepthScene { depth: &depth, width: SIZE, height: SIZE, hzb: &hzb, camera: &cam };
        let outcome = trace_reflection(&scene, &settings(100.0), Vec3::new(0.0, -1.0, -10.0), Vec3::Y, 0.0);
        assert!(outcome.hit_pixel().is_none());
    }

    #[test]
    fn step_budget_bounds_the_march() {
        let cam = camera();
        let depth = vec![1.0; (SIZE * SIZE) as usize];
        let hzb = HzbChain::from_depth(&depth, SIZE, SIZE);
        let scene = DepthScene { depth: &depth, width: SIZE, height: SIZE, hzb: &hzb, camera: &cam };
        let s = SsrSettings { max_steps_hzb: 3, max_steps_dda: 5, ..settings(100.0) };
        let outcome = trace_reflection(&scene, &s, Vec3::new(4.0, -1.0, -10.0), Vec3::new(-0.3, 1.0, 0.0).normalize(), 0.0);
        assert!(outcome.steps() <= 8);
    }

    #[test]
    fn proj_to_pixel_maps_corners() {
        let cam = camera();
        let m = proj_to_pixel(cam.proj, 64.0, 32.0);
        let top_left = m * Vec4::new(-5.0, 5.0, -5.0, 1.0);
        let p = top_left.truncate().truncate() / top_left.w;
        assert!((p.x - 0.0).abs() < 1e-4 && (p.y - 0.0).abs() < 1e-4);
    }

    #[test]
    fn static_scene_accumulates_to_fixed_point() {
        let cam = camera();
        let mut depth = wall_depth(&cam, -16.0);
        // Floor in the lower half at y = -1.
        let inv_proj = cam.inv_proj();
        let mut normals = vec![Vec3::Z; (SIZE * SIZE) as usize];
        for y in SIZE / 2 + 2..SIZE {
            for x in 0..SIZE {
                let ndc = Vec2::new((x as f32 + 0.5) / SIZE as f32 * 2.0 - 1.0, 1.0 - (y as f32 + 0.5) / SIZE as f32 * 2.0);
                let far = inv_proj.project_point3(ndc.extend(1.0));
                let s = -1.0 / far.y;
                let hit = far * s;
                if hit.z > -16.0 {
                    let clip = cam.proj * hit.extend(1.0);
                    let idx = (y * SIZE + x) as usize;
                    depth[idx] = clip.z / clip.w;
                    normals[idx] = Vec3::Y;
                }
            }
        }
        let hzb = HzbChain::from_depth(&depth, SIZE, SIZE);
        let scene = DepthScene { depth: &depth, width: SIZE, height: SIZE, hzb: &hzb, camera: &cam };
        let color: Vec<Vec3> = (0..SIZE * SIZE).map(|i| Vec3::new((i % SIZE) as f32 / SIZE as f32, 0.5, 1.0)).collect();
        let specular = vec![Vec3::splat(0.5); (SIZE * SIZE) as usize];
        let s = settings(100.0);

        let first = trace_frame(&scene, &s, &normals, &color, &specular, 0);
        assert!(first.iter().any(|c| c.w > 0.0), "floor should reflect the wall");
        let mut history: Option<Vec<Vec4>> = None;
        let mut last_delta = f32::MAX;
        for frame in 0..80 {
            let current = trace_frame(&scene, &s, &normals, &color, &specular, frame);
            assert_eq!(current, first, "zero jitter must be deterministic");
            let resolved = resolve_cpu(&current, history.as_deref(), SIZE, SIZE, 0.1);
            if let Some(prev) = &history {
                last_delta = resolved.iter().zip(prev).map(|(a, b)| (*a - *b).abs().max_element()).fold(0.0, f32::max);
            }
            history = Some(resolved);
        }
        assert!(last_delta < 1e-4, "accumulation still moving by {last_delta}");
        let final_frame = history.unwrap_or_default();
        for (a, b) in final_frame.iter().zip(&first) {
            assert!((*a - *b).abs().max_element() < 1e-3);
        }
    }
}
