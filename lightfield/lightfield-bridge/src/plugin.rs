//! Lightfield plugin: implements RenderBackend for the host.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use lightfield_renderer::{
    Aabb, Camera, DirectionalLight, FrameInput, MaterialParams, MeshDraw, Renderer, RendererConfig, SceneLights,
};
use render_api::{ExtractedMaterial, ExtractedMeshes, ExtractedView, RenderBackend};

/// Interleaved position/normal/uv, 32 bytes per vertex.
const VERTEX_STRIDE: usize = 32;

/// Object-space bounds of an interleaved vertex stream. `None` for empty or truncated data.
pub fn mesh_local_bounds(vertex_data: &[u8]) -> Option<Aabb> {
    Aabb::from_points(vertex_data.chunks_exact(VERTEX_STRIDE).map(|v| {
        let p: [f32; 3] = bytemuck::pod_read_unaligned(&v[..12]);
        Vec3::from(p)
    }))
}

/// World bounds of `local` under `transform` (all eight corners).
pub fn transform_bounds(local: Aabb, transform: &[f32; 16]) -> Aabb {
    let m = Mat4::from_cols_array(transform);
    let corners = (0..8).map(|i| {
        let pick = |bit: u32, lo: f32, hi: f32| if i & bit == 0 { lo } else { hi };
        m.transform_point3(Vec3::new(
            pick(1, local.min.x, local.max.x),
            pick(2, local.min.y, local.max.y),
            pick(4, local.min.z, local.max.z),
        ))
    });
    Aabb::from_points(corners).unwrap_or(local)
}

/// Next probe-volume bounds. While the mesh set is unchanged the volume only grows, so
/// animation inside the current bounds never repositions (and re-queues) the probes.
/// `rebuild` refits to `scene` exactly.
pub fn volume_bounds(current: Option<Aabb>, scene: Option<Aabb>, rebuild: bool) -> Option<Aabb> {
    match (current, scene) {
        (Some(c), Some(s)) if !rebuild => Some(if c.contains(&s) { c } else { c.union(s) }),
        (_, s) => s,
    }
}

pub fn camera_from_view(view: &ExtractedView) -> Camera {
    Camera::new(Mat4::from_cols_array(&view.view), Mat4::from_cols_array(&view.proj), view.near, view.far)
}

pub fn lights_from_view(view: &ExtractedView) -> SceneLights {
    SceneLights {
        directional: view.directional_light.map(|(direction, color)| DirectionalLight {
            direction: Vec3::from(direction).normalize_or(Vec3::NEG_Y),
            color: Vec3::from(color),
        }),
        point_lights: view.point_lights.clone(),
        spot_lights: view.spot_lights.clone(),
        sky_color: view.sky_color,
    }
}

fn material_params(m: &ExtractedMaterial) -> MaterialParams {
    MaterialParams { base_color: m.base_color, specular: m.specular, roughness: m.roughness, emissive: m.emissive }
}

/// Cached GPU buffers, transforms and bounds for one mesh.
struct CachedMesh {
    vertex_buf: Arc<wgpu::Buffer>,
    index_buf: Arc<wgpu::Buffer>,
    index_count: u32,
    vertex_len: usize,
    index_len: usize,
    transform: [f32; 16],
    prev_transform: [f32; 16],
    local_bounds: Option<Aabb>,
    material: MaterialParams,
}

impl CachedMesh {
    fn world_bounds(&self) -> Option<Aabb> {
        self.local_bounds.map(|b| transform_bounds(b, &self.transform))
    }
}

/// Lightfield plugin: owns the renderer (and with it the wgpu device/queue); implements RenderBackend.
pub struct LightfieldPlugin {
    renderer: Renderer,
    /// Cache by entity_id. Updated in prepare() from ExtractedMeshes.
    mesh_cache: HashMap<u64, CachedMesh>,
    scene_bounds: Option<Aabb>,
}

impl LightfieldPlugin {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, String> {
        Self::new_with_config(device, queue, RendererConfig::default())
    }

    pub fn new_with_config(device: wgpu::Device, queue: wgpu::Queue, config: RendererConfig) -> Result<Self, String> {
        let renderer = Renderer::new_with_config(device, queue, config).map_err(|e| e.to_string())?;
        Ok(Self { renderer, mesh_cache: HashMap::new(), scene_bounds: None })
    }

    pub fn device(&self) -> &wgpu::Device {
        self.renderer.device()
    }
    pub fn queue(&self) -> &wgpu::Queue {
        self.renderer.queue()
    }
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }
    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Probe-volume bounds: refit to the union of mesh world bounds when meshes are added,
    /// removed or rebuilt, otherwise grown only when the scene leaves them.
    pub fn scene_bounds(&self) -> Option<Aabb> {
        self.scene_bounds
    }

    pub fn mesh_count(&self) -> usize {
        self.mesh_cache.len()
    }

    /// Render one frame and present it (tone-mapped) into `swapchain_view`.
    pub fn render_frame_to_swapchain(&mut self, view: &ExtractedView, swapchain_view: &wgpu::TextureView) -> Result<(), String> {
        self.render_frame_impl(view, Some(swapchain_view))
    }

    fn render_frame_impl(&mut self, view: &ExtractedView, swapchain_view: Option<&wgpu::TextureView>) -> Result<(), String> {
        let meshes: Vec<MeshDraw> = self
            .mesh_cache
            .values()
            .map(|c| MeshDraw {
                vertex_buf: Arc::clone(&c.vertex_buf),
                index_buf: Arc::clone(&c.index_buf),
                index_count: c.index_count,
                transform: c.transform,
                prev_transform: c.prev_transform,
                material: c.material,
            })
            .collect();
        let (width, height) = view.viewport_size;
        let lights = lights_from_view(view);
        let input = FrameInput {
            width,
            height,
            camera: camera_from_view(view),
            meshes: &meshes,
            lights: &lights,
            scene_bounds: self.scene_bounds,
        };
        let cmd = self.renderer.render_frame(&input, swapchain_view).map_err(|e| e.to_string())?;
        self.renderer.submit([cmd]);
        Ok(())
    }
}

impl RenderBackend for LightfieldPlugin {
    fn prepare(&mut self, extracted: &ExtractedMeshes) {
        let device = self.renderer.device();
        let queue = self.renderer.queue();
        let current: HashSet<u64> = extracted
            .meshes
            .iter()
            .filter(|(_, m)| m.visible && !m.vertex_data.is_empty() && !m.index_data.is_empty())
            .map(|(&k, _)| k)
            .collect();
        let cached_before = self.mesh_cache.len();
        self.mesh_cache.retain(|k, _| current.contains(k));
        let mut mesh_set_changed = self.mesh_cache.len() != cached_before;
        for (&entity_id, mesh) in &extracted.meshes {
            if !current.contains(&entity_id) {
                continue;
            }
            let vertex_len = mesh.vertex_data.len();
            let index_len = mesh.index_data.len();
            let material = material_params(&mesh.material);
            if let Some(cached) = self.mesh_cache.get_mut(&entity_id) {
                if cached.vertex_len == vertex_len && cached.index_len == index_len {
                    queue.write_buffer(&cached.vertex_buf, 0, &mesh.vertex_data);
                    queue.write_buffer(&cached.index_buf, 0, &mesh.index_data);
                    cached.prev_transform = cached.transform;
                    cached.transform = mesh.transform;
                    cached.local_bounds = mesh_local_bounds(&mesh.vertex_data);
                    cached.material = material;
                    continue;
                }
            }
            mesh_set_changed = true;
            let prev_transform = self.mesh_cache.get(&entity_id).map_or(mesh.transform, |c| c.transform);
            let vertex_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lightfield_mesh_vertex"),
                size: vertex_len as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&vertex_buf, 0, &mesh.vertex_data);
            let index_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lightfield_mesh_index"),
                size: index_len as u64,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&index_buf, 0, &mesh.index_data);
            self.mesh_cache.insert(
                entity_id,
                CachedMesh {
                    vertex_buf: Arc::new(vertex_buf),
                    index_buf: Arc::new(index_buf),
                    index_count: (index_len / 4) as u32,
                    vertex_len,
                    index_len,
                    transform: mesh.transform,
                    prev_transform,
                    local_bounds: mesh_local_bounds(&mesh.vertex_data),
                    material,
                },
            );
        }
        let world = self.mesh_cache.values().filter_map(CachedMesh::world_bounds).reduce(Aabb::union);
        self.scene_bounds = volume_bounds(self.scene_bounds, world, mesh_set_changed);
        log::trace!("lightfield plugin: {} meshes, bounds {:?}", self.mesh_cache.len(), self.scene_bounds);
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.render_frame_impl(view, None)
    }

    fn invalidate_history(&mut self) {
        self.renderer.invalidate_history();
        for cached in self.mesh_cache.values_mut() {
            cached.prev_transform = cached.transform;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn vertices(points: &[[f32; 3]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in points {
            let v: [f32; 8] = [p[0], p[1], p[2], 0.0, 1.0, 0.0, 0.0, 0.0];
            out.extend_from_slice(bytemuck::cast_slice(&v));
        }
        out
    }

    #[test]
    fn local_bounds_reads_positions_only() {
        let data = vertices(&[[-1.0, 0.0, 2.0], [3.0, -4.0, 0.5], [0.0, 1.0, 0.0]]);
        let b = mesh_local_bounds(&data).unwrap();
        assert_eq!(b.min, Vec3::new(-1.0, -4.0, 0.0));
        assert_eq!(b.max, Vec3::new(3.0, 1.0, 2.0));
        assert!(mesh_local_bounds(&[]).is_none());
        // A trailing partial vertex is ignored.
        assert!(mesh_local_bounds(&data[..20]).is_none());
    }

    #[test]
    fn bounds_follow_transform() {
        let local = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let moved = transform_bounds(local, &Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)).to_cols_array());
        assert_eq!(moved.min, Vec3::new(4.0, -1.0, -1.0));
        assert_eq!(moved.max, Vec3::new(6.0, 1.0, 1.0));

        let rotated = transform_bounds(local, &Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4).to_cols_array());
        assert_relative_eq!(rotated.max.x, std::f32::consts::SQRT_2, epsilon = 1e-5);
        assert_relative_eq!(rotated.max.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn volume_grows_but_refits_on_rebuild() {
        let room = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let inner = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        assert_eq!(volume_bounds(None, Some(room), false), Some(room));
        assert_eq!(volume_bounds(Some(room), Some(inner), false), Some(room));
        assert_eq!(volume_bounds(Some(room), Some(inner), true), Some(inner));
        assert_eq!(volume_bounds(Some(room), None, false), None);

        let wider = Aabb::new(Vec3::splat(-1.0), Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(volume_bounds(Some(room), Some(wider), false), Some(wider));
    }

    #[test]
    fn animated_hull_does_not_starve_probe_updates() {
        use lightfield_renderer::ProbeGrid;

        let base = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let mut bounds = volume_bounds(None, Some(base), true);
        let mut grid = ProbeGrid::new(glam::UVec3::new(4, 1, 1), base);
        let mut refreshed = HashSet::new();
        for frame in 0..100 {
            // A mesh on the hull wobbles by about a millimetre each frame.
            let wobble = 1e-3 * ((frame % 3) as f32 - 1.0);
            let scene = Aabb::new(base.min, base.max + Vec3::new(wobble, 0.0, 0.0));
            bounds = volume_bounds(bounds, Some(scene), false);
            if let Some(b) = bounds {
                grid.set_bounds(b);
            }
            refreshed.extend(grid.schedule(1));
        }
        assert_eq!(refreshed.len(), grid.len(), "refreshed {refreshed:?}");
    }

    #[test]
    fn view_conversion_keeps_camera_and_lights() {
        let eye = Vec3::new(0.0, 1.0, 5.0);
        let view = ExtractedView {
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y).to_cols_array(),
            proj: Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0).to_cols_array(),
            near: 0.1,
            far: 50.0,
            directional_light: Some(([0.0, -2.0, 0.0], [1.0, 0.5, 0.25])),
            sky_color: [0.1, 0.2, 0.3],
            ..ExtractedView::default()
        };
        let cam = camera_from_view(&view);
        assert_relative_eq!(cam.position.z, 5.0, epsilon = 1e-5);
        assert_eq!(cam.far, 50.0);

        let lights = lights_from_view(&view);
        let sun = lights.directional.unwrap();
        assert_eq!(sun.direction, Vec3::NEG_Y);
        assert_eq!(sun.color, Vec3::new(1.0, 0.5, 0.25));
        assert_eq!(lights.sky_color, [0.1, 0.2, 0.3]);
        assert!(lights_from_view(&ExtractedView::default()).directional.is_none());
    }
}
