//! Backend traits. The host calls prepare + render_frame once per frame and never touches wgpu.

use crate::{ExtractedMeshes, ExtractedView};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Frame-driven render backend.
pub trait RenderBackend: Send {
    /// Upload extracted meshes and refresh cached scene data (bounds, materials).
    fn prepare(&mut self, extracted: &ExtractedMeshes);

    /// Encode and submit one frame for `view`.
    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String>;

    /// Drop temporal history (reflection accumulation, denoiser history, motion reference).
    /// Hosts call this on camera cuts so the next frame starts from spatial-only results.
    fn invalidate_history(&mut self) {}
}

/// Backend that also owns a surface for a window given by raw handles (e.g. from winit).
pub trait RenderBackendWindow: RenderBackend + Send {
    /// Render one frame and present it. The surface is configured from `view.viewport_size`.
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String>;
}
