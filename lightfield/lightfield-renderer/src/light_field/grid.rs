//! Probe placement over the scene bounds and the amortised refresh schedule.

use glam::{UVec3, Vec3};

pub const MAX_PROBES_PER_AXIS: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| match acc {
            None => Some(Self::new(p, p)),
            Some(b) => Some(Self::new(b.min.min(p), b.max.max(p))),
        })
    }

    pub fn union(self, other: Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Clamp each axis to `[1, MAX_PROBES_PER_AXIS]` and round up to a power of two.
pub fn sanitize_counts(counts: UVec3) -> UVec3 {
    let axis = |c: u32| c.clamp(1, MAX_PROBES_PER_AXIS).next_power_of_two();
    UVec3::new(axis(counts.x), axis(counts.y), axis(counts.z))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightFieldProbe {
    /// Flat index `ix + iy*cx + iz*cx*cy`; also the probe's atlas layer.
    pub index: u32,
    pub position: Vec3,
    pub updated: bool,
    pub update_every_frame: bool,
    pub visible: bool,
}

impl LightFieldProbe {
    fn due(&self) -> bool {
        self.update_every_frame || !self.updated
    }
}

#[derive(Clone, Debug)]
pub struct ProbeGrid {
    counts: UVec3,
    bounds: Aabb,
    step: Vec3,
    start: Vec3,
    probes: Vec<LightFieldProbe>,
    visualize_all: bool,
}

impl ProbeGrid {
    pub fn new(counts: UVec3, bounds: Aabb) -> Self {
        let mut grid = Self {
            counts: sanitize_counts(counts),
            bounds,
            step: Vec3::ZERO,
            start: Vec3::ZERO,
            probes: Vec::new(),
            visualize_all: false,
        };
        grid.regenerate();
        grid
    }

    pub fn counts(&self) -> UVec3 {
        self.counts
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn step(&self) -> Vec3 {
        self.step
    }

    /// Position of probe (0, 0, 0).
    pub fn start(&self) -> Vec3 {
        self.start
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probes in generation order (`iy` outer, then `iz`, `ix` inner).
    pub fn probes(&self) -> &[LightFieldProbe] {
        &self.probes
    }

    pub fn probe(&self, index: u32) -> Option<&LightFieldProbe> {
        self.probes.iter().find(|p| p.index == index)
    }

    fn probe_mut(&mut self, index: u32) -> Option<&mut LightFieldProbe> {
        self.probes.iter_mut().find(|p| p.index == index)
    }

    pub fn flat_index(&self, ix: u32, iy: u32, iz: u32) -> u32 {
        ix + iy * self.counts.x + iz * self.counts.x * self.counts.y
    }

    pub fn probe_position(&self, cell: UVec3) -> Vec3 {
        self.start + self.step * cell.as_vec3()
    }

    /// Sanitise and apply new counts. Returns whether the grid changed (atlases must be reallocated).
    pub fn set_counts(&mut self, counts: UVec3) -> bool {
        let counts = sanitize_counts(counts);
        if counts == self.counts {
            return false;
        }
        self.counts = counts;
        self.regenerate();
        true
    }

    /// Reposition probes for new bounds; every probe becomes due. Returns whether anything changed.
    pub fn set_bounds(&mut self, bounds: Aabb) -> bool {
        if bounds == self.bounds {
            return false;
        }
        self.bounds = bounds;
        self.regenerate();
        true
    }

    /// Mark every probe as needing a refresh.
    pub fn reset_updates(&mut self) {
        for p in &mut self.probes {
            p.updated = false;
        }
    }

    pub fn set_update_every_frame(&mut self, index: u32, enabled: bool) {
        if let Some(p) = self.probe_mut(index) {
            p.update_every_frame = enabled;
        }
    }

    pub fn set_visible(&mut self, index: u32, visible: bool) {
        if let Some(p) = self.probe_mut(index) {
            p.visible = visible;
        }
    }

    /// Toggle visibility of every probe; also applies to probes created by later regenerations.
    pub fn set_all_visible(&mut self, visible: bool) {
        self.visualize_all = visible;
        for p in &mut self.probes {
            p.visible = visible;
        }
    }

    /// Pick up to `budget` due probes, scanning from the start of the list, and mark them updated.
    pub fn schedule(&mut self, budget: usize) -> Vec<u32> {
        let mut picked = Vec::with_capacity(budget);
        for p in &mut self.probes {
            if picked.len() == budget {
                break;
            }
            if p.due() {
                p.updated = true;
                picked.push(p.index);
            }
        }
        picked
    }

    fn regenerate(&mut self) {
        let c = self.counts;
        self.step = self.bounds.extent() / (c + UVec3::ONE).as_vec3();
        self.start = self.bounds.min + self.step;
        self.probes.clear();
        self.probes.reserve((c.x * c.y * c.z) as usize);
        for iy in 0..c.y {
            for iz in 0..c.z {
                for ix in 0..c.x {
                    self.probes.push(LightFieldProbe {
                        index: ix + iy * c.x + iz * c.x * c.y,
                        position: self.start + self.step * Vec3::new(ix as f32, iy as f32, iz as f32),
                        updated: false,
                        update_every_frame: false,
                        visible: self.visualize_all,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_bounds() -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::splat(3.0))
    }

    #[test]
    fn counts_are_clamped_and_rounded() {
        assert_eq!(sanitize_counts(UVec3::new(0, 3, 5000)), UVec3::new(1, 4, 1024));
        assert_eq!(sanitize_counts(UVec3::new(2, 1, 8)), UVec3::new(2, 1, 8));
    }

    #[test]
    fn probes_are_spaced_inside_bounds() {
        let grid = ProbeGrid::new(UVec3::new(2, 1, 1), unit_bounds());
        assert_eq!(grid.len(), 2);
        assert_relative_eq!(grid.step().x, 1.0);
        assert_relative_eq!(grid.step().y, 1.5);
        let p1 = grid.probe(1).map(|p| p.position).unwrap_or_default();
        assert_relative_eq!(p1.x, 2.0);
        assert_relative_eq!(p1.y, 1.5);
    }

    #[test]
    fn count_change_regenerates_all_probes() {
        let mut grid = ProbeGrid::new(UVec3::new(2, 1, 1), unit_bounds());
        grid.schedule(2);
        assert!(grid.probes().iter().all(|p| p.updated));
        assert!(grid.set_counts(UVec3::new(4, 1, 1)));
        assert_eq!(grid.len(), 4);
        assert!(grid.probes().iter().all(|p| !p.updated));
        assert_relative_eq!(grid.step().x, 0.6);
        assert!(!grid.set_counts(UVec3::new(3, 1, 1)), "3 rounds to the current 4");
    }

    #[test]
    fn bounds_change_repositions_without_resizing() {
        let mut grid = ProbeGrid::new(UVec3::new(2, 1, 1), unit_bounds());
        grid.schedule(2);
        assert!(grid.set_bounds(Aabb::new(Vec3::splat(-3.0), Vec3::ZERO)));
        assert_eq!(grid.len(), 2);
        assert!(grid.probes().iter().all(|p| !p.updated));
        let p0 = grid.probe(0).map(|p| p.position).unwrap_or_default();
        assert_relative_eq!(p0.x, -2.0);
        assert!(!grid.set_bounds(Aabb::new(Vec3::splat(-3.0), Vec3::ZERO)));
    }

    #[test]
    fn flat_index_follows_x_then_y_then_z() {
        let grid = ProbeGrid::new(UVec3::new(2, 2, 2), unit_bounds());
        // Generation order is y outer, z, x inner; the stored index is x-major.
        let order: Vec<u32> = grid.probes().iter().map(|p| p.index).collect();
        assert_eq!(order, vec![0, 1, 4, 5, 2, 3, 6, 7]);
        assert_eq!(grid.flat_index(1, 1, 1), 7);
        let p = grid.probe(grid.flat_index(1, 0, 1)).map(|p| p.position).unwrap_or_default();
        assert_eq!(p, grid.probe_position(UVec3::new(1, 0, 1)));
    }

    #[test]
    fn budget_of_one_visits_each_probe_once() {
        let mut grid = ProbeGrid::new(UVec3::new(4, 1, 1), unit_bounds());
        let frames: Vec<Vec<u32>> = (0..5).map(|_| grid.schedule(1)).collect();
        assert_eq!(frames, vec![vec![0], vec![1], vec![2], vec![3], vec![]]);
    }

    #[test]
    fn update_every_frame_probe_is_always_due() {
        let mut grid = ProbeGrid::new(UVec3::new(4, 1, 1), unit_bounds());
        grid.set_update_every_frame(2, true);
        assert_eq!(grid.schedule(4), vec![0, 1, 2, 3]);
        assert_eq!(grid.schedule(4), vec![2]);
        grid.reset_updates();
        assert_eq!(grid.schedule(2), vec![0, 1]);
    }

    #[test]
    fn visualize_all_survives_regeneration() {
        let mut grid = ProbeGrid::new(UVec3::new(2, 1, 1), unit_bounds());
        grid.set_all_visible(true);
        grid.set_counts(UVec3::new(4, 1, 1));
        assert!(grid.probes().iter().all(|p| p.visible));
        grid.set_visible(1, false);
        assert_eq!(grid.probes().iter().filter(|p| p.visible).count(), 3);
    }

    #[test]
    fn aabb_from_points() {
        let b = Aabb::from_points([Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 2.0, 3.0)]);
        assert_eq!(b, Some(Aabb::new(Vec3::new(-1.0, -2.0, 0.0), Vec3::new(1.0, 2.0, 3.0))));
        assert_eq!(Aabb::from_points(std::iter::empty()), None);
    }

    #[test]
    fn containment_is_inclusive() {
        let outer = unit_bounds();
        assert!(outer.contains(&outer));
        assert!(outer.contains(&Aabb::new(Vec3::ONE, Vec3::splat(2.0))));
        assert!(!outer.contains(&Aabb::new(Vec3::ONE, Vec3::new(2.0, 3.001, 2.0))));
    }
}
