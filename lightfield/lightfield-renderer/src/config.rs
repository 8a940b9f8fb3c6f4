//! Renderer configuration: stage toggles, tone mapping, swapchain and per-pass tunables.

use crate::light_field::{LightFieldConfig, ProbeDebugMode};
use crate::ssr::SsrSettings;
use crate::svgf::SvgfSettings;

/// Tone mapping mode for present pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapping {
    #[default]
    Reinhard,
    /// No tone mapping (clamp).
    None,
}

impl ToneMapping {
    pub(crate) fn code(self) -> u32 {
        match self {
            ToneMapping::Reinhard => 0,
            ToneMapping::None => 1,
        }
    }
}

/// Renderer and bridge configuration.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Tone mapping for present pass.
    pub tone_mapping: ToneMapping,
    /// Swapchain texture format for present (e.g. Rgba8Unorm or Bgra8Unorm).
    pub swapchain_format: wgpu::TextureFormat,
    /// Directional shadow map + visibility pass. Off means full visibility.
    pub shadow_enabled: bool,
    pub shadow_resolution: u32,
    pub ssr_enabled: bool,
    pub ssr: SsrSettings,
    /// Run SVGF over the accumulated reflections before compositing.
    pub ssr_denoise: bool,
    /// Light-field probe GI (volume update + probe ray tracing).
    pub gi_enabled: bool,
    pub gi_denoise: bool,
    pub svgf: SvgfSettings,
    pub light_field: LightFieldConfig,
    /// Draw probes on top of the lit frame.
    pub probe_debug: Option<ProbeDebugMode>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tone_mapping: ToneMapping::default(),
            swapchain_format: wgpu::TextureFormat::Rgba8Unorm,
            shadow_enabled: true,
            shadow_resolution: 2048,
            ssr_enabled: true,
            ssr: SsrSettings::default(),
            ssr_denoise: false,
            gi_enabled: true,
            gi_denoise: true,
            svgf: SvgfSettings::default(),
            light_field: LightFieldConfig::default(),
            probe_debug: None,
        }
    }
}
