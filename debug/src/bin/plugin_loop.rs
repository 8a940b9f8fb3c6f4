//! Headless host loop: render-api types + LightfieldPlugin as RenderBackend (prepare + render_frame).
//! Run: RUST_LOG=debug cargo run -p debug --bin plugin_loop

use lightfield_bridge::LightfieldPlugin;
use lightfield_renderer::{LightFieldConfig, RendererConfig};
use render_api::RenderBackend;

const FRAMES: u32 = 12;

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (device, queue) = pollster::block_on(request_device())?;
    let config = RendererConfig {
        light_field: LightFieldConfig {
            cube_resolution: 256,
            octahedral_resolution: 256,
            probes_per_frame: 4,
            ..LightFieldConfig::default()
        },
        ..RendererConfig::default()
    };
    let mut plugin = LightfieldPlugin::new_with_config(device, queue, config)?;

    for frame in 0..FRAMES {
        let t = frame as f32 / FRAMES as f32;
        // Jump cut halfway through: temporal history must not survive it.
        if frame == FRAMES / 2 {
            plugin.invalidate_history();
        }
        let angle = if frame < FRAMES / 2 { t } else { -t };
        plugin.prepare(&debug::cornell_box(t * 0.5));
        plugin.render_frame(&debug::orbit_view(angle, (640, 480)))?;
    }
    let waited = plugin.device().poll(wgpu::Maintain::Wait);
    log::debug!("plugin_loop: wait queue_empty={:?}", waited.is_queue_empty());
    if !plugin.device().poll(wgpu::Maintain::Poll).is_queue_empty() {
        log::warn!("plugin_loop: submissions still in flight after waiting on the device");
    }

    let grid = plugin.renderer().light_field().grid();
    let updated = grid.probes().iter().filter(|p| p.updated).count();
    log::info!(
        "plugin_loop: {} frames, {} meshes, {}/{} probes captured, bounds {:?}",
        FRAMES,
        plugin.mesh_count(),
        updated,
        grid.len(),
        plugin.scene_bounds()
    );
    Ok(())
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor { backends: wgpu::Backends::PRIMARY, ..Default::default() });
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    let limits = wgpu::Limits { max_texture_array_layers: adapter.limits().max_texture_array_layers, ..Default::default() };
    adapter
        .request_device(&wgpu::DeviceDescriptor { label: Some("plugin_loop_device"), required_limits: limits, ..Default::default() }, None)
        .await
        .map_err(|e| e.to_string())
}
