//! Lightfield bridge: implements render_api::RenderBackend using lightfield-renderer.

mod plugin;
mod window_backend;

pub use plugin::{camera_from_view, lights_from_view, mesh_local_bounds, transform_bounds, volume_bounds, LightfieldPlugin};
pub use window_backend::LightfieldWindowBackend;
