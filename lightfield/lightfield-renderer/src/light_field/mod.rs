//! Light-field probe GI: a grid of probes over the scene bounds, each captured as a cube,
//! remapped to octahedral atlas slices (radiance, normal, distance), filtered into irradiance and
//! distance moments, then looked up per pixel by the probe ray tracer.

pub mod capture;
pub mod debug;
pub mod downscale;
pub mod filtering;
pub mod grid;
pub mod indirect;
pub mod octahedral;
pub mod ray_tracing;
pub mod volume;

use glam::UVec3;

pub use debug::ProbeDebugPass;
pub use filtering::FilterSettings;
pub use grid::{Aabb, LightFieldProbe, ProbeGrid};
pub use indirect::{IndirectKind, IndirectLighting};
pub use ray_tracing::ProbeRayTracing;
pub use volume::{LightFieldProbeVolume, ProbeAtlases, ProbeScene};

/// Probe volume tunables. Resolutions are per probe slice.
#[derive(Clone, Debug)]
pub struct LightFieldConfig {
    /// Probes per axis; each axis is clamped to 1..=1024 and rounded up to a power of two.
    pub probe_counts: UVec3,
    /// Refresh budget per `update` call.
    pub probes_per_frame: usize,
    /// Cube face capture size.
    pub cube_resolution: u32,
    /// Radiance / normal / distance atlas size.
    pub octahedral_resolution: u32,
    /// Low-res distance atlas used by the glossy march's coarse phase.
    pub low_res_octahedral_resolution: u32,
    /// Irradiance / moments atlas size.
    pub filtered_resolution: u32,
    /// Radius of the debug impostor spheres.
    pub probe_size: f32,
    pub filter: FilterSettings,
}

impl Default for LightFieldConfig {
    fn default() -> Self {
        Self {
            probe_counts: UVec3::new(2, 1, 1),
            probes_per_frame: 1,
            cube_resolution: 1024,
            octahedral_resolution: 1024,
            low_res_octahedral_resolution: 1024 / 32,
            filtered_resolution: 128,
            probe_size: 1.0,
            filter: FilterSettings::default(),
        }
    }
}

/// What the probe debug pass paints on each visible probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeDebugMode {
    /// Radiance atlas in the sphere normal's direction.
    #[default]
    Radiance,
    /// Filtered irradiance in the sphere normal's direction.
    Irradiance,
    /// Flat per-probe colour derived from the probe index.
    ProbeColor,
}

impl ProbeDebugMode {
    pub(crate) fn code(self) -> u32 {
        match self {
            ProbeDebugMode::Radiance => 0,
            ProbeDebugMode::Irradiance => 1,
            ProbeDebugMode::ProbeColor => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let c = LightFieldConfig::default();
        assert_eq!(c.probe_counts, UVec3::new(2, 1, 1));
        assert_eq!(c.probes_per_frame, 1);
        assert_eq!(c.low_res_octahedral_resolution, 32);
        assert_eq!(c.filtered_resolution, 128);
        assert_eq!(c.filter.sample_count, 512);
    }
}
