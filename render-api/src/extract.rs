//! Data types for extraction from the host engine into the render world.
//! The host fills these each frame.

use std::collections::HashMap;

/// Column-major 4x4 identity.
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

/// Constant surface parameters written into the G-buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractedMaterial {
    /// Linear RGB albedo + opacity.
    pub base_color: [f32; 4],
    /// Specular reflectance (F0) in linear RGB.
    pub specular: [f32; 3],
    pub roughness: f32,
    /// Emitted radiance; stored in an 8-bit target so keep it in [0, 1].
    pub emissive: [f32; 3],
}

impl Default for ExtractedMaterial {
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.8, 0.8, 1.0],
            specular: [0.04, 0.04, 0.04],
            roughness: 0.5,
            emissive: [0.0; 3],
        }
    }
}

/// Per-mesh instance data extracted from the main world.
#[derive(Clone, Debug)]
pub struct ExtractedMesh {
    /// Host-defined entity or instance id.
    pub entity_id: u64,
    /// Interleaved vertices: position (3 f32), normal (3 f32), uv (2 f32); 32 bytes each.
    pub vertex_data: Vec<u8>,
    /// Index data (u32 indices).
    pub index_data: Vec<u8>,
    /// World transform: column-major 4x4 matrix (WGSL/wgpu convention).
    /// Index [col*4+row]; e.g. m[0..4] is the first column.
    pub transform: [f32; 16],
    /// Whether this instance is visible.
    pub visible: bool,
    pub material: ExtractedMaterial,
}

/// All extracted meshes for the current frame.
#[derive(Default, Debug)]
pub struct ExtractedMeshes {
    pub meshes: HashMap<u64, ExtractedMesh>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub radius: f32,
    pub falloff_exponent: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpotLight {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub radius: f32,
    /// Radians.
    pub inner_angle: f32,
    /// Radians.
    pub outer_angle: f32,
}

/// View/camera and lighting data for the current frame.
#[derive(Clone, Debug)]
pub struct ExtractedView {
    /// World-to-view, column-major. View space looks down -Z.
    pub view: [f32; 16],
    /// View-to-clip, column-major, depth mapped to [0, 1].
    pub proj: [f32; 16],
    /// Positive distances to the clip planes used to build `proj`.
    pub near: f32,
    pub far: f32,
    pub viewport_size: (u32, u32),
    /// Main directional light (direction the light travels: unit vector, color: RGB).
    /// If None, no sun light and no shadow pass.
    pub directional_light: Option<([f32; 3], [f32; 3])>,
    pub point_lights: Vec<PointLight>,
    pub spot_lights: Vec<SpotLight>,
    /// Radiance returned for rays and pixels that see no geometry.
    pub sky_color: [f32; 3],
}

impl Default for ExtractedView {
    fn default() -> Self {
        Self {
            view: IDENTITY,
            proj: IDENTITY,
            near: 0.1,
            far: 100.0,
            viewport_size: (800, 600),
            directional_light: None,
            point_lights: Vec::new(),
            spot_lights: Vec::new(),
            sky_color: [0.0; 3],
        }
    }
}
