//! Hierarchical Z-buffer: power-of-two Rg32Float mip chain of (min, max) device depth.
//!
//! The GPU build runs one render pass per mip, each reading the previous one. [`HzbChain`]
//! is the CPU mirror used by the reference SSR tracer.

use wgpu::CommandEncoder;

use crate::shader;

const HZB_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/hzb.wgsl"));

pub const HZB_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;

pub fn next_pow2(v: u32) -> u32 {
    v.max(1).next_power_of_two()
}

/// `floor(log2(max(w, h))) + 1`.
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

pub struct HzbTexture {
    pub texture: wgpu::Texture,
    width: u32,
    height: u32,
    mip_count: u32,
    depth_width: u32,
    depth_height: u32,
}

impl HzbTexture {
    /// Allocate for a `depth_width` x `depth_height` depth buffer.
    pub fn new(device: &wgpu::Device, depth_width: u32, depth_height: u32) -> Self {
        let width = next_pow2(depth_width);
        let height = next_pow2(depth_height);
        let mip_count = mip_count(width, height);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("hzb"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HZB_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self { texture, width, height, mip_count, depth_width, depth_height }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn mip_count(&self) -> u32 { self.mip_count }
    pub fn depth_size(&self) -> (u32, u32) { (self.depth_width, self.depth_height) }

    pub fn mip_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("hzb_mip"),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    /// All mips, for `textureLoad` with an explicit level.
    pub fn full_view(&self) -> wgpu::TextureView {
        self.texture.create_view(&Default::default())
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct HzbParams {
    src_size: [u32; 2],
    uv_scale: [f32; 2],
}

pub struct HzbPass {
    first_pipeline: wgpu::RenderPipeline,
    down_pipeline: wgpu::RenderPipeline,
    first_layout: wgpu::BindGroupLayout,
    down_layout: wgpu::BindGroupLayout,
}

impl HzbPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "hzb_shader", HZB_SHADER);
        let params_size = std::mem::size_of::<HzbParams>() as u64;
        let first_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("hzb_first_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, params_size),
                shader::depth_texture_entry(1),
            ],
        });
        let down_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("hzb_down_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, params_size),
                shader::unfilterable_texture_entry(2),
            ],
        });
        let target = [Some(wgpu::ColorTargetState::from(HZB_FORMAT))];
        let first_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("hzb_first_pipeline_layout"),
            bind_group_layouts: &[&first_layout],
            push_constant_ranges: &[],
        });
        let down_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("hzb_down_pipeline_layout"),
            bind_group_layouts: &[&down_layout],
            push_constant_ranges: &[],
        });
        let first_pipeline =
            shader::fullscreen_pipeline(device, "hzb_first_pipeline", &module, &first_pipeline_layout, "fs_first", &target);
        let down_pipeline =
            shader::fullscreen_pipeline(device, "hzb_down_pipeline", &module, &down_pipeline_layout, "fs_down", &target);
        Self { first_pipeline, down_pipeline, first_layout, down_layout }
    }

    /// Build every mip of `hzb` from `depth`. Mips are encoded strictly in increasing order.
    ///
    /// Panics when `hzb` was not allocated for a `depth_width` x `depth_height` buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        depth: &wgpu::TextureView,
        depth_width: u32,
        depth_height: u32,
        hzb: &HzbTexture,
    ) {
        assert!(
            hzb.width() == next_pow2(depth_width) && hzb.height() == next_pow2(depth_height),
            "HZB is {}x{} but depth {}x{} needs {}x{}",
            hzb.width(),
            hzb.height(),
            depth_width,
            depth_height,
            next_pow2(depth_width),
            next_pow2(depth_height),
        );

        let params = HzbParams {
            src_size: [depth_width, depth_height],
            uv_scale: [hzb.width() as f32 / depth_width as f32, hzb.height() as f32 / depth_height as f32],
        };
        let buf = shader::write_uniform(device, queue, "hzb_params_0", &params);
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hzb_first_bind_group"),
            layout: &self.first_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(depth) },
            ],
        });
        let target = hzb.mip_view(0);
        shader::draw_fullscreen(encoder, "hzb_mip_0", &self.first_pipeline, &bg, &target, wgpu::LoadOp::Clear(wgpu::Color::WHITE));

        for level in 1..hzb.mip_count() {
            let (sw, sh) = mip_size(hzb.width(), hzb.height(), level - 1);
            let params = HzbParams { src_size: [sw, sh], uv_scale: [1.0, 1.0] };
            let buf = shader::write_uniform(device, queue, "hzb_params", &params);
            let src = hzb.mip_view(level - 1);
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("hzb_down_bind_group"),
                layout: &self.down_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&src) },
                ],
            });
            let target = hzb.mip_view(level);
            shader::draw_fullscreen(encoder, "hzb_mip", &self.down_pipeline, &bg, &target, wgpu::LoadOp::Clear(wgpu::Color::WHITE));
        }
    }
}

/// One CPU mip: `(min, max)` per texel, row-major.
#[derive(Clone, Debug)]
pub struct HzbMip {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 2]>,
}

impl HzbMip {
    pub fn load(&self, x: i32, y: i32) -> [f32; 2] {
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        self.texels[y * self.width as usize + x]
    }
}

/// CPU HZB with the same reduction as the GPU build.
#[derive(Clone, Debug)]
pub struct HzbChain {
    pub mips: Vec<HzbMip>,
}

impl HzbChain {
    /// `depth` is row-major `width * height` device depth.
    pub fn from_depth(depth: &[f32], width: u32, height: u32) -> Self {
        let pw = next_pow2(width);
        let ph = next_pow2(height);
        let mut texels = vec![[1.0, 1.0]; (pw * ph) as usize];
        for y in 0..height {
            for x in 0..width {
                let d = depth[(y * width + x) as usize];
                texels[(y * pw + x) as usize] = [d, d];
            }
        }
        let mut mips = vec![HzbMip { width: pw, height: ph, texels }];
        for level in 1..mip_count(pw, ph) {
            let src = &mips[level as usize - 1];
            let (w, h) = mip_size(pw, ph, level);
            let mut texels = Vec::with_capacity((w * h) as usize);
            for y in 0..h as i32 {
                for x in 0..w as i32 {
                    let taps = [
                        src.load(2 * x, 2 * y),
                        src.load(2 * x + 1, 2 * y),
                        src.load(2 * x, 2 * y + 1),
                        src.load(2 * x + 1, 2 * y + 1),
                    ];
                    let lo = taps.iter().map(|t| t[0]).fold(f32::INFINITY, f32::min);
                    let hi = taps.iter().map(|t| t[1]).fold(f32::NEG_INFINITY, f32::max);
                    texels.push([lo, hi]);
                }
            }
            mips.push(HzbMip { width: w, height: h, texels });
        }
        Self { mips }
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn width(&self) -> u32 {
        self.mips[0].width
    }

    pub fn height(&self) -> u32 {
        self.mips[0].height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_matches_log2() {
        assert_eq!(mip_count(1, 1), 1);
        assert_eq!(mip_count(2, 1), 2);
        assert_eq!(mip_count(1024, 512), 11);
        assert_eq!(mip_count(2048, 2048), 12);
        assert_eq!(next_pow2(1280), 2048);
        assert_eq!(next_pow2(720), 1024);
        assert_eq!(next_pow2(0), 1);
    }

    #[test]
    fn each_mip_halves_the_previous() {
        for (w, h) in [(1280u32, 720u32), (64, 64), (3, 17), (1, 9)] {
            let chain = HzbChain::from_depth(&vec![0.5; (w * h) as usize], w, h);
            let top = w.max(h);
            let expected = 32 - next_pow2(top).leading_zeros();
            assert_eq!(chain.mip_count(), expected);
            for k in 1..chain.mips.len() {
                let prev = &chain.mips[k - 1];
                let cur = &chain.mips[k];
                assert_eq!(cur.width, prev.width.div_ceil(2));
                assert_eq!(cur.height, prev.height.div_ceil(2));
            }
            let last = chain.mips.last().unwrap();
            assert_eq!((last.width, last.height), (1, 1));
        }
    }

    #[test]
    fn padding_reads_far_and_extrema_propagate() {
        // 3x2 depth padded to 4x2.
        let depth = [0.2, 0.4, 0.9, 0.3, 0.5, 0.6];
        let chain = HzbChain::from_depth(&depth, 3, 2);
        assert_eq!(chain.width(), 4);
        assert_eq!(chain.mips[0].load(3, 0), [1.0, 1.0]);
        assert_eq!(chain.mips[1].load(0, 0), [0.2, 0.5]);
        assert_eq!(chain.mips[1].load(1, 0), [0.6, 1.0]);
        assert_eq!(chain.mips[2].load(0, 0), [0.2, 1.0]);
    }

    #[test]
    fn coarse_min_never_exceeds_fine_min() {
        let (w, h) = (37u32, 23u32);
        let depth: Vec<f32> = (0..w * h).map(|i| ((i * 7919) % 1000) as f32 / 1000.0).collect();
        let chain = HzbChain::from_depth(&depth, w, h);
        for k in 1..chain.mips.len() {
            let fine = &chain.mips[k - 1];
            let coarse = &chain.mips[k];
            for y in 0..fine.height as i32 {
                for x in 0..fine.width as i32 {
                    let c = coarse.load(x / 2, y / 2);
                    let f = fine.load(x, y);
                    assert!(c[0] <= f[0] && c[1] >= f[1]);
                }
            }
        }
    }
}
