use glam::Vec2;

use std::collections::BTreeSet;

use crate::api::{ColliderSource, SpatialIndex};
use crate::spatial_grid::SpatialGrid;
use crate::types::*;

/// Index for static rectangles that are queried far more often than moved.
///
/// The covered cells are enumerated once at insertion and kept, so removal is
/// exact. `query` is cell-granular; `query_overlapping` adds the strict
/// rectangle test.
pub struct StationaryIndex<T> {
    grid: SpatialGrid<(Rect, T)>,
}

impl<T> StationaryIndex<T> {
    pub fn new(cell_size: f32) -> Self {
        Self { grid: SpatialGrid::new(cell_size) }
    }

    pub fn cell_size(&self) -> f32 {
        self.grid.cell_size()
    }

    /// Distinct objects filed in any cell the rect's span touches.
    pub fn query_set(&self, rect: Rect) -> BTreeSet<Handle> {
        self.grid.query(rect).into_iter().collect()
    }

    /// Objects whose own rectangle strictly overlaps `rect`.
    pub fn query_overlapping(&self, rect: Rect) -> Vec<Handle> {
        let mut out: Vec<Handle> = self
            .grid
            .query(rect)
            .into_iter()
            .filter(|h| self.grid.get(*h).is_some_and(|(r, _)| r.overlaps(&rect)))
            .collect();
        out.sort();
        out
    }

    pub fn rect_of(&self, handle: Handle) -> Option<Rect> {
        self.grid.get(handle).map(|(r, _)| *r)
    }

    pub fn cells_of(&self, handle: Handle) -> &[CellKey] {
        self.grid.cells_of(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, Rect, &T)> {
        self.grid.iter().map(|(h, (r, v))| (h, *r, v))
    }

    pub fn reset(&mut self) {
        self.grid.reset();
    }
}

impl<T> SpatialIndex<T> for StationaryIndex<T> {
    fn insert_rect(&mut self, value: T, rect: Rect) -> Handle {
        self.grid.insert_rect((rect, value), rect)
    }

    fn delete(&mut self, handle: Handle) -> Option<T> {
        self.grid.delete(handle).map(|(_, v)| v)
    }

    fn query(&self, rect: Rect) -> Vec<Handle> {
        self.query_set(rect).into_iter().collect()
    }

    fn get(&self, handle: Handle) -> Option<&T> {
        self.grid.get(handle).map(|(_, v)| v)
    }

    fn len(&self) -> usize {
        self.grid.len()
    }
}

/// Static colliders registered by the host (props, moving-platform stand-ins).
/// Candidates are the strict overlaps with the probe grown by one pixel, so a
/// body resting flush against a collider still sees it.
impl ColliderSource for StationaryIndex<PhysicsType> {
    fn colliders_near(&self, probe: Rect) -> Vec<PhysicsTile> {
        let grown = Rect::from_pos_size(probe.pos - Vec2::ONE, probe.size + Vec2::splat(2.0));
        self.query_overlapping(grown)
            .into_iter()
            .filter_map(|h| {
                self.grid.get(h).map(|(rect, kind)| PhysicsTile { rect: *rect, kind: *kind })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_removes_every_recorded_cell() {
        let mut idx = StationaryIndex::new(16.0);
        let h = idx.insert_rect("rock", Rect::new(10.0, 10.0, 30.0, 4.0));
        assert_eq!(idx.cells_of(h), &[(0, 0), (1, 0), (2, 0)]);
        assert_eq!(idx.delete(h), Some("rock"));
        assert!(idx.query_set(Rect::new(0.0, 0.0, 64.0, 64.0)).is_empty());
        assert_eq!(idx.delete(h), None);
    }

    #[test]
    fn test_query_is_cell_granular_but_overlap_is_strict() {
        let mut idx = StationaryIndex::new(16.0);
        let h = idx.insert_rect((), Rect::new(0.0, 0.0, 4.0, 4.0));
        // same cell, no geometric overlap
        let probe = Rect::new(8.0, 8.0, 2.0, 2.0);
        assert!(idx.query_set(probe).contains(&h));
        assert!(idx.query_overlapping(probe).is_empty());
        assert_eq!(idx.query_overlapping(Rect::new(3.0, 3.0, 2.0, 2.0)), vec![h]);
    }

    #[test]
    fn test_collider_source_reports_flush_neighbors() {
        let mut idx = StationaryIndex::new(32.0);
        idx.insert_rect(PhysicsType::Solid, Rect::new(0.0, 16.0, 16.0, 16.0));
        // body standing exactly on top of the collider
        let near = idx.colliders_near(Rect::new(2.0, 8.0, 8.0, 8.0));
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].kind, PhysicsType::Solid);
    }
}
