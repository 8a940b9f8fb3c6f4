//! Backend-agnostic window demo: render-api + LightfieldWindowBackend; the host never touches wgpu.
//! Cornell box lit by a point light, probe GI and SSR.
//! Run: cargo run -p debug --bin hybrid_window [-- --probes]
//! Keys: Space pauses the animation, C forces a camera cut (history reset).

use std::time::Instant;

use lightfield_renderer::{ProbeDebugMode, RendererConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::RenderBackendWindow;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

struct App {
    window: Option<Window>,
    backend: Option<Box<dyn RenderBackendWindow>>,
    config: RendererConfig,
    size: (u32, u32),
    start: Instant,
    paused_at: Option<f32>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self { window: None, backend: None, config, size: (1280, 720), start: Instant::now(), paused_at: None }
    }

    fn time(&self) -> f32 {
        self.paused_at.unwrap_or_else(|| self.start.elapsed().as_secs_f32())
    }

    fn redraw(&mut self) {
        let Some(window) = &self.window else { return };
        let phys = window.inner_size();
        self.size = (phys.width.max(1), phys.height.max(1));
        if self.backend.is_none() {
            match lightfield_bridge::LightfieldWindowBackend::from_window_with_config(window, self.config.clone()) {
                Ok(backend) => self.backend = Some(backend),
                Err(e) => {
                    log::error!("LightfieldWindowBackend::from_window failed: {}", e);
                    return;
                }
            }
        }
        let (raw_window, raw_display) = match (window.window_handle(), window.display_handle()) {
            (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
            _ => return,
        };
        let t = self.time();
        let view = debug::orbit_view(t * 0.3, self.size);
        let scene = debug::cornell_box(t * 0.5);
        let Some(backend) = &mut self.backend else { return };
        backend.prepare(&scene);
        if let Err(e) = backend.render_frame_to_window(&view, raw_window, raw_display) {
            log::warn!("frame failed: {}", e);
        }
        window.request_redraw();
    }

    fn key(&mut self, key: &Key) {
        match key {
            Key::Named(NamedKey::Space) => {
                self.paused_at = match self.paused_at {
                    Some(t) => {
                        self.start = Instant::now() - std::time::Duration::from_secs_f32(t);
                        None
                    }
                    None => Some(self.start.elapsed().as_secs_f32()),
                };
            }
            Key::Character(c) if c.as_str().eq_ignore_ascii_case("c") => {
                if let Some(backend) = &mut self.backend {
                    log::info!("camera cut");
                    backend.invalidate_history();
                }
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("Lightfield hybrid renderer")
            .with_inner_size(winit::dpi::PhysicalSize::new(self.size.0, self.size.1));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(physical) => {
                self.size = (physical.width.max(1), physical.height.max(1));
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event: KeyEvent { logical_key, state: ElementState::Pressed, .. }, .. } => {
                self.key(&logical_key);
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let show_probes = std::env::args().any(|a| a == "--probes");
    let config = RendererConfig {
        probe_debug: show_probes.then_some(ProbeDebugMode::Radiance),
        ..RendererConfig::default()
    };
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
