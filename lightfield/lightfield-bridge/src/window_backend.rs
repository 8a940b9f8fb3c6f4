//! Window-capable backend: created from a window, implements RenderBackendWindow.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use render_api::{ExtractedMeshes, ExtractedView, RenderBackend, RenderBackendWindow};
use wgpu::SurfaceTargetUnsafe;

use crate::plugin::LightfieldPlugin;
use lightfield_renderer::RendererConfig;

/// Backend that owns the wgpu Instance and a LightfieldPlugin and presents to a window.
/// The surface is recreated from the raw handles each frame, so the host only has to
/// keep the window alive.
pub struct LightfieldWindowBackend {
    instance: wgpu::Instance,
    plugin: LightfieldPlugin,
    /// Surface storage format; the renderer presents through its sRGB view.
    surface_format: wgpu::TextureFormat,
}

impl LightfieldWindowBackend {
    pub fn from_window(window: &(impl HasWindowHandle + HasDisplayHandle)) -> Result<Box<dyn RenderBackendWindow>, String> {
        Self::from_window_with_config(window, RendererConfig::default())
    }

    /// `config.swapchain_format` is replaced by the sRGB view of the first format the surface supports.
    pub fn from_window_with_config(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        config: RendererConfig,
    ) -> Result<Box<dyn RenderBackendWindow>, String> {
        let (raw_window, raw_display) = {
            let wh = window.window_handle().map_err(|e| e.to_string())?;
            let dh = window.display_handle().map_err(|e| e.to_string())?;
            (wh.as_raw(), dh.as_raw())
        };
        let backend = pollster::block_on(Self::from_raw_handles_async(raw_window, raw_display, config))?;
        Ok(Box::new(backend))
    }

    async fn from_raw_handles_async(
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
        config: RendererConfig,
    ) -> Result<Self, String> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor { backends: wgpu::Backends::PRIMARY, ..Default::default() });
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No adapter")?;
        // Probe atlases are texture arrays with one layer per probe.
        let limits = wgpu::Limits { max_texture_array_layers: adapter.limits().max_texture_array_layers, ..Default::default() };
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor { label: Some("lightfield_device"), required_limits: limits, ..Default::default() },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;
        let caps = surface.get_capabilities(&adapter);
        let format = caps.formats.first().copied().unwrap_or(wgpu::TextureFormat::Rgba8Unorm);
        log::info!("lightfield window backend: adapter {:?}, surface format {:?}", adapter.get_info().name, format);
        let plugin = LightfieldPlugin::new_with_config(device, queue, RendererConfig { swapchain_format: format.add_srgb_suffix(), ..config })?;
        drop(surface);
        Ok(Self { instance, plugin, surface_format: format })
    }

    fn surface_config(format: wgpu::TextureFormat, width: u32, height: u32) -> wgpu::SurfaceConfiguration {
        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![format.add_srgb_suffix()],
            desired_maximum_frame_latency: 2,
        }
    }
}

impl RenderBackend for LightfieldWindowBackend {
    fn prepare(&mut self, extracted: &ExtractedMeshes) {
        self.plugin.prepare(extracted);
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.plugin.render_frame(view)
    }

    fn invalidate_history(&mut self) {
        self.plugin.invalidate_history();
    }
}

impl RenderBackendWindow for LightfieldWindowBackend {
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String> {
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { self.instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let (width, height) = view.viewport_size;
        let config = Self::surface_config(self.surface_format, width.max(1), height.max(1));
        surface.configure(self.plugin.device(), &config);

        let frame = match surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                log::debug!("lightfield window backend: surface lost, reconfiguring");
                surface.configure(self.plugin.device(), &config);
                surface.get_current_texture().map_err(|e| e.to_string())?
            }
            Err(wgpu::SurfaceError::Timeout) => return Err("Surface get_current_texture timeout".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        let target_view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(self.plugin.renderer().config().swapchain_format),
            ..Default::default()
        });
        self.plugin.render_frame_to_swapchain(view, &target_view)?;
        frame.present();
        Ok(())
    }
}
