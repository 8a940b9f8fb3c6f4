//! Probe volume: owns the grid, the atlases and the per-probe update chain
//! (cube capture, octahedral remap, filtering, low-res downscale).

use glam::{UVec3, Vec3};
use wgpu::CommandEncoder;

use crate::error::{RenderError, RenderResult};
use crate::gbuffer::MeshDraw;
use crate::light_pass::SceneLights;
use crate::scope::PassScope;
use crate::shader;
use crate::shadows::ShadowInput;

use super::capture::ProbeCapture;
use super::downscale::{downscale_factor, DownscalePass, LOW_RES_DISTANCE_FORMAT};
use super::filtering::{FilterSettings, ProbeFiltering, IRRADIANCE_FORMAT, MOMENTS_FORMAT};
use super::grid::{Aabb, ProbeGrid};
use super::octahedral::{EncodeMode, OctahedralMapping};
use super::LightFieldConfig;

pub const RADIANCE_ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const NORMAL_ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DISTANCE_ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

/// What probe faces render: the frame's meshes and lights, plus the sun's shadow map when active.
pub struct ProbeScene<'a> {
    pub meshes: &'a [MeshDraw],
    pub lights: &'a SceneLights,
    pub shadow: Option<ShadowInput<'a>>,
}

/// One 2D-array slice per probe, indexed by the probe's flat index.
pub struct ProbeAtlases {
    pub radiance: wgpu::Texture,
    /// World normal packed `n * 0.5 + 0.5`.
    pub normal: wgpu::Texture,
    pub distance: wgpu::Texture,
    pub low_res_distance: wgpu::Texture,
    pub irradiance: wgpu::Texture,
    /// (E[d], E[d^2]).
    pub moments: wgpu::Texture,
    probe_count: u32,
    resolution: u32,
    low_res_resolution: u32,
    filtered_resolution: u32,
}

impl ProbeAtlases {
    pub fn new(device: &wgpu::Device, config: &LightFieldConfig, probe_count: u32) -> Self {
        let res = config.octahedral_resolution;
        let low = config.low_res_octahedral_resolution;
        let filtered = config.filtered_resolution;
        log::info!(
            "light field: allocating atlases for {} probes ({}^2, low-res {}^2, filtered {}^2)",
            probe_count,
            res,
            low,
            filtered
        );
        Self {
            radiance: shader::render_target(device, "probe_radiance_atlas", res, res, probe_count, RADIANCE_ATLAS_FORMAT),
            normal: shader::render_target(device, "probe_normal_atlas", res, res, probe_count, NORMAL_ATLAS_FORMAT),
            distance: shader::render_target(device, "probe_distance_atlas", res, res, probe_count, DISTANCE_ATLAS_FORMAT),
            low_res_distance: shader::render_target(device, "probe_low_res_distance_atlas", low, low, probe_count, LOW_RES_DISTANCE_FORMAT),
            irradiance: shader::render_target(device, "probe_irradiance_atlas", filtered, filtered, probe_count, IRRADIANCE_FORMAT),
            moments: shader::render_target(device, "probe_moments_atlas", filtered, filtered, probe_count, MOMENTS_FORMAT),
            probe_count,
            resolution: res,
            low_res_resolution: low,
            filtered_resolution: filtered,
        }
    }

    pub fn probe_count(&self) -> u32 { self.probe_count }
    pub fn resolution(&self) -> u32 { self.resolution }
    pub fn low_res_resolution(&self) -> u32 { self.low_res_resolution }
    pub fn filtered_resolution(&self) -> u32 { self.filtered_resolution }
    pub fn radiance_view(&self) -> wgpu::TextureView { shader::array_view(&self.radiance) }
    pub fn normal_view(&self) -> wgpu::TextureView { shader::array_view(&self.normal) }
    pub fn distance_view(&self) -> wgpu::TextureView { shader::array_view(&self.distance) }
    pub fn low_res_distance_view(&self) -> wgpu::TextureView { shader::array_view(&self.low_res_distance) }
    pub fn irradiance_view(&self) -> wgpu::TextureView { shader::array_view(&self.irradiance) }
    pub fn moments_view(&self) -> wgpu::TextureView { shader::array_view(&self.moments) }
}

pub struct LightFieldProbeVolume {
    config: LightFieldConfig,
    grid: ProbeGrid,
    has_bounds: bool,
    capture: ProbeCapture,
    mapping: OctahedralMapping,
    filtering: ProbeFiltering,
    downscale: DownscalePass,
    atlases: Option<ProbeAtlases>,
}

impl LightFieldProbeVolume {
    pub fn new(device: &wgpu::Device, config: LightFieldConfig) -> Self {
        let grid = ProbeGrid::new(config.probe_counts, Aabb::new(Vec3::ZERO, Vec3::ZERO));
        Self {
            grid,
            has_bounds: false,
            capture: ProbeCapture::new(device, config.cube_resolution),
            mapping: OctahedralMapping::new(device, &[RADIANCE_ATLAS_FORMAT, NORMAL_ATLAS_FORMAT, DISTANCE_ATLAS_FORMAT]),
            filtering: ProbeFiltering::new(device, config.filter),
            downscale: DownscalePass::new(device),
            atlases: None,
            config,
        }
    }

    pub fn config(&self) -> &LightFieldConfig {
        &self.config
    }

    pub fn grid(&self) -> &ProbeGrid {
        &self.grid
    }

    /// `None` until the first update with scene bounds allocated them.
    pub fn atlases(&self) -> Option<&ProbeAtlases> {
        self.atlases.as_ref()
    }

    pub fn has_bounds(&self) -> bool {
        self.has_bounds
    }

    /// Fit the grid to `bounds`. Probes move and all become due; atlases are kept.
    pub fn set_scene_bounds(&mut self, bounds: Aabb) {
        let changed = self.grid.set_bounds(bounds);
        if changed || !self.has_bounds {
            log::debug!("light field: scene bounds {:?} .. {:?}", bounds.min, bounds.max);
        }
        self.has_bounds = true;
    }

    /// Counts are sanitised (1..=1024, power of two). A change drops the atlases; the next update reallocates.
    pub fn set_probe_counts(&mut self, counts: UVec3) {
        if self.grid.set_counts(counts) {
            log::info!("light field: probe counts {:?}", self.grid.counts());
            self.config.probe_counts = self.grid.counts();
            self.atlases = None;
        }
    }

    pub fn probe_counts(&self) -> UVec3 {
        self.grid.counts()
    }

    pub fn set_probes_per_frame(&mut self, budget: usize) {
        self.config.probes_per_frame = budget;
    }

    /// Re-render every probe over the next updates.
    pub fn update_all(&mut self) {
        self.grid.reset_updates();
    }

    pub fn set_update_every_frame(&mut self, index: u32, enabled: bool) {
        self.grid.set_update_every_frame(index, enabled);
    }

    pub fn set_visible(&mut self, index: u32, visible: bool) {
        self.grid.set_visible(index, visible);
    }

    pub fn set_all_visible(&mut self, visible: bool) {
        self.grid.set_all_visible(visible);
    }

    pub fn probe_size(&self) -> f32 {
        self.config.probe_size
    }

    pub fn set_probe_size(&mut self, size: f32) {
        self.config.probe_size = size.max(0.0);
    }

    pub fn filter_settings(&self) -> &FilterSettings {
        self.filtering.settings()
    }

    /// New filter parameters apply to probes updated from now on; call [`Self::update_all`] to refilter everything.
    pub fn set_filter_settings(&mut self, settings: FilterSettings) {
        self.config.filter = settings;
        self.filtering.set_settings(settings);
    }

    /// Refresh up to `probes_per_frame` due probes. Returns how many were rendered.
    /// Without bounds or meshes nothing is rendered.
    pub fn update(
        &mut self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &ProbeScene,
    ) -> RenderResult<usize> {
        if !self.has_bounds || scene.meshes.is_empty() {
            return Ok(0);
        }
        let count = self.grid.len() as u32;
        let limit = device.limits().max_texture_array_layers;
        if count > limit {
            return Err(RenderError::ProbeLimit { requested: count, limit });
        }
        if self.atlases.as_ref().map_or(true, |a| a.probe_count() != count) {
            self.atlases = Some(ProbeAtlases::new(device, &self.config, count));
            self.grid.reset_updates();
        }

        let picked = self.grid.schedule(self.config.probes_per_frame);
        let Some(atlases) = self.atlases.as_ref() else {
            return Ok(0);
        };
        let mut scope = PassScope::new(encoder, "light_field_update");
        let face_res = self.capture.resolution();
        let radiance_cube = self.capture.radiance_view();
        let normal_cube = self.capture.normal_view();
        let distance_cube = self.capture.distance_view();
        let factor = downscale_factor(atlases.resolution(), atlases.low_res_resolution());
        for &index in &picked {
            let Some(probe) = self.grid.probe(index) else { continue };
            log::debug!("light field: updating probe {} at {:?}", index, probe.position);
            self.capture.capture(&mut scope, device, queue, probe.position, scene);

            let radiance = shader::layer_view(&atlases.radiance, index);
            let normal = shader::layer_view(&atlases.normal, index);
            let distance = shader::layer_view(&atlases.distance, index);
            let channels = [
                (&radiance_cube, EncodeMode::Color, RADIANCE_ATLAS_FORMAT, &radiance),
                (&normal_cube, EncodeMode::Normal, NORMAL_ATLAS_FORMAT, &normal),
                (&distance_cube, EncodeMode::Distance, DISTANCE_ATLAS_FORMAT, &distance),
            ];
            for (cube, mode, format, target) in channels {
                self.mapping.encode(&mut scope, device, queue, cube, face_res, mode, format, target);
            }

            let irradiance = shader::layer_view(&atlases.irradiance, index);
            let moments = shader::layer_view(&atlases.moments, index);
            self.filtering.encode(&mut scope, device, queue, &radiance, &distance, &irradiance, &moments);
            let low_res = shader::layer_view(&atlases.low_res_distance, index);
            self.downscale.encode(&mut scope, device, queue, &distance, factor, &low_res);
        }
        Ok(picked.len())
    }
}
