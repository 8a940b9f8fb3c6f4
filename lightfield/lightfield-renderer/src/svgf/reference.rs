//! CPU mirror of `shaders/svgf.wgsl` for a static camera (zero motion).

use glam::{Vec2, Vec3, Vec4};

use super::SvgfSettings;

const MAX_HISTORY: f32 = 32.0;
const DEPTH_REJECT: f32 = 10.0;
const NORMAL_REJECT: f32 = 0.9;

pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Binomial row `2r` normalised to the centre tap.
pub fn kernel_weight(k: i32, r: i32) -> f32 {
    (1..=k.abs()).fold(1.0, |w, j| w * (r - j + 1) as f32 / (r + j) as f32)
}

/// Guide channels the filter reads from the G-buffer.
pub struct GuideBuffers<'a> {
    pub width: u32,
    pub height: u32,
    /// Positive view depth.
    pub linear_z: &'a [f32],
    pub z_derivative: &'a [f32],
    pub normals: &'a [Vec3],
}

impl GuideBuffers<'_> {
    fn len(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// In-bounds neighbours of pixel `i` at `(dx, dy) * step`.
    fn neighbour(&self, i: usize, dx: i32, dy: i32, step: i32) -> Option<usize> {
        let (w, h) = (self.width as i32, self.height as i32);
        let x = (i as i32 % w) + dx * step;
        let y = (i as i32 / w) + dy * step;
        (x >= 0 && y >= 0 && x < w && y < h).then(|| (y * w + x) as usize)
    }
}

struct History {
    filtered: Vec<Vec3>,
    /// (m1, m2, history length).
    moments: Vec<Vec3>,
    linear_z: Vec<f32>,
    normals: Vec<Vec3>,
}

pub struct SvgfReference {
    settings: SvgfSettings,
    history: Option<History>,
}

impl SvgfReference {
    pub fn new(settings: SvgfSettings) -> Self {
        Self { settings, history: None }
    }

    pub fn invalidate_history(&mut self) {
        self.history = None;
    }

    /// History length of pixel `i` after the last `execute`, 0 before the first.
    pub fn history_length(&self, i: usize) -> f32 {
        self.history.as_ref().map_or(0.0, |h| h.moments[i].z)
    }

    pub fn execute(&mut self, guide: &GuideBuffers, illumination: &[Vec3]) -> Vec<Vec3> {
        assert_eq!(illumination.len(), guide.len());
        let (illum, moments) = self.reproject(guide, illumination);
        let mut current = self.estimate_variance(guide, &illum, &moments);
        let mut feedback = None;
        for i in 0..self.settings.atrous_iterations {
            current = self.atrous(guide, &current, 1 << i);
            if i == self.settings.feedback_tap {
                feedback = Some(current.clone());
            }
        }
        let feedback = feedback.unwrap_or_else(|| current.clone());
        self.history = Some(History {
            filtered: feedback.iter().map(|v| v.truncate()).collect(),
            moments,
            linear_z: guide.linear_z.to_vec(),
            normals: guide.normals.to_vec(),
        });
        current.iter().map(|v| v.truncate()).collect()
    }

    fn reproject(&self, guide: &GuideBuffers, illumination: &[Vec3]) -> (Vec<Vec4>, Vec<Vec3>) {
        let s = &self.settings;
        let history = self.history.as_ref().filter(|h| s.temporal_reprojection && h.linear_z.len() == illumination.len());
        let mut illum = Vec::with_capacity(illumination.len());
        let mut moments = Vec::with_capacity(illumination.len());
        for (i, &color) in illumination.iter().enumerate() {
            let lum = luminance(color);
            let consistent = history.filter(|h| {
                let depth_ok = (h.linear_z[i] - guide.linear_z[i]).abs() / (guide.z_derivative[i] + 1e-2) < DEPTH_REJECT;
                depth_ok && h.normals[i].dot(guide.normals[i]) > NORMAL_REJECT
            });
            let (len, alpha, moments_alpha, prev_color, prev_moments) = match consistent {
                Some(h) => {
                    let m = h.moments[i];
                    let len = ((m.z + 0.5).floor() + 1.0).min(MAX_HISTORY);
                    (len, s.alpha.max(1.0 / len), s.moments_alpha.max(1.0 / len), h.filtered[i], Vec2::new(m.x, m.y))
                }
                None => (1.0, 1.0, 1.0, Vec3::ZERO, Vec2::ZERO),
            };
            let m = prev_moments.lerp(Vec2::new(lum, lum * lum), moments_alpha);
            let variance = (m.y - m.x * m.x).max(0.0);
            illum.push(prev_color.lerp(color, alpha).extend(variance));
            moments.push(Vec3::new(m.x, m.y, len));
        }
        (illum, moments)
    }

    fn estimate_variance(&self, guide: &GuideBuffers, illum: &[Vec4], moments: &[Vec3]) -> Vec<Vec4> {
        let s = &self.settings;
        (0..illum.len())
            .map(|i| {
                let len = moments[i].z;
                if !s.spatial_variance || len >= 4.0 {
                    return illum[i];
                }
                let phi_z = guide.z_derivative[i].max(1e-8) * 3.0;
                let mut sum_w = 0.0;
                let mut sum_illum = Vec3::ZERO;
                let mut sum_moments = Vec2::ZERO;
                for dy in -3..=3 {
                    for dx in -3..=3 {
                        let Some(q) = guide.neighbour(i, dx, dy, 1) else { continue };
                        let w_z = (guide.linear_z[i] - guide.linear_z[q]).abs() / phi_z;
                        let w_n = guide.normals[i].dot(guide.normals[q]).max(0.0).powf(s.phi_normal);
                        let w = (-w_z).exp() * w_n;
                        sum_illum += w * illum[q].truncate();
                        sum_moments += w * Vec2::new(moments[q].x, moments[q].y);
                        sum_w += w;
                    }
                }
                let sum_w = sum_w.max(1e-6);
                let m = sum_moments / sum_w;
                let variance = (m.y - m.x * m.x).max(0.0) * 4.0 / len;
                (sum_illum / sum_w).extend(variance)
            })
            .collect()
    }

    fn filtered_variance(guide: &GuideBuffers, input: &[Vec4], i: usize) -> f32 {
        let mut sum = 0.0;
        let mut sum_w = 0.0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let Some(q) = guide.neighbour(i, dx, dy, 1) else { continue };
                let w = (if dx == 0 { 1.0 } else { 0.5 }) * (if dy == 0 { 1.0 } else { 0.5 }) * 0.25;
                sum += w * input[q].w;
                sum_w += w;
            }
        }
        sum / sum_w
    }

    fn atrous(&self, guide: &GuideBuffers, input: &[Vec4], step: i32) -> Vec<Vec4> {
        let s = &self.settings;
        let r = s.atrous_radius as i32;
        (0..input.len())
            .map(|i| {
                let center = input[i];
                let lc = luminance(center.truncate());
                let phi_l = s.phi_color * (1e-10 + Self::filtered_variance(guide, input, i)).max(0.0).sqrt();
                let phi_z = guide.z_derivative[i].max(1e-8) * step as f32;
                let mut sum_w = 1.0;
                let mut sum_rgb = center.truncate();
                let mut sum_var = center.w;
                for dy in -r..=r {
                    for dx in -r..=r {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let Some(q) = guide.neighbour(i, dx, dy, step) else { continue };
                        let tap = input[q];
                        let w_l = (lc - luminance(tap.truncate())).abs() / phi_l;
                        let w_z = (guide.linear_z[i] - guide.linear_z[q]).abs()
                            / (phi_z * Vec2::new(dx as f32, dy as f32).length());
                        let w_n = guide.normals[i].dot(guide.normals[q]).max(0.0).powf(s.phi_normal);
                        let w = kernel_weight(dx, r) * kernel_weight(dy, r) * (-w_l - w_z).exp() * w_n;
                        sum_rgb += w * tap.truncate();
                        sum_var += w * w * tap.w;
                        sum_w += w;
                    }
                }
                (sum_rgb / sum_w).extend(sum_var / (sum_w * sum_w))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const W: u32 = 16;
    const H: u32 = 16;

    struct Scene {
        z: Vec<f32>,
        dz: Vec<f32>,
        normals: Vec<Vec3>,
    }

    impl Scene {
        fn flat() -> Self {
            let n = (W * H) as usize;
            Self { z: vec![5.0; n], dz: vec![0.01; n], normals: vec![Vec3::Z; n] }
        }

        fn guide(&self) -> GuideBuffers<'_> {
            GuideBuffers { width: W, height: H, linear_z: &self.z, z_derivative: &self.dz, normals: &self.normals }
        }
    }

    #[test]
    fn binomial_kernel_matches_five_tap() {
        assert_relative_eq!(kernel_weight(0, 2), 1.0);
        assert_relative_eq!(kernel_weight(1, 2), 2.0 / 3.0);
        assert_relative_eq!(kernel_weight(-2, 2), 1.0 / 6.0);
    }

    #[test]
    fn constant_input_is_a_fixed_point() {
        let scene = Scene::flat();
        let mut svgf = SvgfReference::new(SvgfSettings::default());
        let input = vec![Vec3::new(0.5, 0.25, 0.125); (W * H) as usize];
        for _ in 0..5 {
            let out = svgf.execute(&scene.guide(), &input);
            for v in out {
                assert_relative_eq!(v.x, 0.5, epsilon = 1e-5);
                assert_relative_eq!(v.y, 0.25, epsilon = 1e-5);
                assert_relative_eq!(v.z, 0.125, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn static_texture_converges_without_blurring_edges() {
        let scene = Scene::flat();
        let mut svgf = SvgfReference::new(SvgfSettings::default());
        // 4x4 checker blocks with a per-pixel hashed grain, so no two neighbours match.
        let input: Vec<Vec3> = (0..W * H)
            .map(|i| {
                let (x, y) = (i % W, i / W);
                let block = if (x / 4 + y / 4) % 2 == 0 { 0.2 } else { 0.8 };
                let grain = (i.wrapping_mul(2_654_435_761) >> 24) as f32 / 255.0;
                Vec3::splat(block + 0.05 * grain)
            })
            .collect();
        let first = svgf.execute(&scene.guide(), &input);
        assert!(first.iter().zip(&input).any(|(o, i)| (o.x - i.x).abs() > 1e-2), "first frame is filtered");

        let mut prev = first;
        for _ in 0..300 {
            prev = svgf.execute(&scene.guide(), &input);
        }
        let out = svgf.execute(&scene.guide(), &input);
        for ((o, p), i) in out.iter().zip(&prev).zip(&input) {
            assert!((o.x - p.x).abs() < 1e-4, "still changing: {o} vs {p}");
            assert!((o.x - i.x).abs() < 1e-3, "output {o} drifted from input {i}");
        }
    }

    #[test]
    fn temporal_noise_converges_to_the_mean() {
        let scene = Scene::flat();
        let mut svgf = SvgfReference::new(SvgfSettings::default());
        let mut out = Vec::new();
        for frame in 0..60u32 {
            let input: Vec<Vec3> = (0..W * H)
                .map(|i| {
                    let sign = if (i % W + i / W + frame) % 2 == 0 { 1.0 } else { -1.0 };
                    Vec3::splat(0.5 + 0.25 * sign)
                })
                .collect();
            out = svgf.execute(&scene.guide(), &input);
        }
        for v in out {
            assert!((v.x - 0.5).abs() < 0.05, "pixel {v} still noisy");
        }
    }

    #[test]
    fn history_accumulates_and_resets_on_disocclusion() {
        let mut scene = Scene::flat();
        let mut svgf = SvgfReference::new(SvgfSettings::default());
        let input = vec![Vec3::ONE; (W * H) as usize];
        for _ in 0..3 {
            svgf.execute(&scene.guide(), &input);
        }
        assert_eq!(svgf.history_length(0), 3.0);

        scene.z[0] = 8.0;
        svgf.execute(&scene.guide(), &input);
        assert_eq!(svgf.history_length(0), 1.0);
        assert_eq!(svgf.history_length(1), 4.0);

        svgf.invalidate_history();
        svgf.execute(&scene.guide(), &input);
        assert_eq!(svgf.history_length(1), 1.0);
    }

    #[test]
    fn disabled_reprojection_is_spatial_only() {
        let scene = Scene::flat();
        let settings = SvgfSettings { temporal_reprojection: false, ..Default::default() };
        let mut svgf = SvgfReference::new(settings);
        let input = vec![Vec3::ONE; (W * H) as usize];
        for _ in 0..4 {
            svgf.execute(&scene.guide(), &input);
            assert_eq!(svgf.history_length(7), 1.0);
        }
    }

    #[test]
    fn history_length_saturates() {
        let scene = Scene::flat();
        let mut svgf = SvgfReference::new(SvgfSettings::default());
        let input = vec![Vec3::ONE; (W * H) as usize];
        for _ in 0..40 {
            svgf.execute(&scene.guide(), &input);
        }
        assert_eq!(svgf.history_length(0), MAX_HISTORY);
    }
}
