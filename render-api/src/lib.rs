//! Shared render backend API.
//! Defines extract types and the RenderBackend trait so a host can drive the
//! lightfield renderer through one code path (prepare + render_frame).

mod extract;
mod backend;

pub use extract::{
    ExtractedMaterial, ExtractedMesh, ExtractedMeshes, ExtractedView, PointLight, SpotLight,
    IDENTITY,
};
pub use backend::{RenderBackend, RenderBackendWindow};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
