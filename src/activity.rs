use glam::Vec2;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

use crate::api::SpatialIndex;
use crate::spatial_grid::SpatialGrid;
use crate::types::*;

/// Point-filed index of moving entities, refreshed lazily around the view.
///
/// Entities are filed under the cell of their position at insertion. Only the
/// cells overlapping the view rect are revisited each frame; an entity found
/// there whose position now falls in another cell is moved, everything else
/// stays where it was last seen.
pub struct EntityActivityIndex<K> {
    grid: SpatialGrid<(K, String)>,
    known: HashMap<K, Handle>,
    active: BTreeMap<String, Vec<K>>,
}

impl<K: Copy + Eq + Hash> EntityActivityIndex<K> {
    pub fn new(cfg: ActivityConfig) -> Self {
        Self {
            grid: SpatialGrid::new(cfg.quad_size),
            known: HashMap::new(),
            active: BTreeMap::new(),
        }
    }

    pub fn quad_size(&self) -> f32 {
        self.grid.cell_size()
    }

    /// File `key` at `pos` under `tag`. Already known keys are left alone.
    pub fn insert(&mut self, key: K, pos: Vec2, tag: &str) -> bool {
        if self.known.contains_key(&key) {
            return false;
        }
        let handle = self.grid.insert_point((key, tag.to_string()), pos);
        self.known.insert(key, handle);
        self.active.entry(tag.to_string()).or_default();
        true
    }

    pub fn delete(&mut self, key: K) -> bool {
        match self.known.remove(&key) {
            Some(handle) => {
                self.grid.delete(handle);
                for list in self.active.values_mut() {
                    list.retain(|k| *k != key);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.known.contains_key(&key)
    }

    /// Cell `key` is currently filed under.
    pub fn cell_of(&self, key: K) -> Option<CellKey> {
        let handle = self.known.get(&key)?;
        self.grid.cells_of(*handle).first().copied()
    }

    /// Rebuild the per-tag active lists from the cells overlapping `view`,
    /// relocating every visited entity whose cell changed. `position_of`
    /// reports current positions; entities it has none for keep their cell.
    ///
    /// Each entity is visited at most once per pass, even when it moves into a
    /// cell that is scanned later.
    pub fn update_active(&mut self, view: Rect, position_of: impl Fn(K) -> Option<Vec2>) {
        for list in self.active.values_mut() {
            list.clear();
        }
        let mut seen = HashSet::new();
        for cell in view.cell_span(Vec2::splat(self.grid.cell_size())).iter() {
            let found: Vec<Handle> = self.grid.cell(cell).to_vec();
            for handle in found {
                if !seen.insert(handle) {
                    continue;
                }
                let Some((key, tag)) = self.grid.get(handle).map(|(k, t)| (*k, t.clone())) else {
                    continue;
                };
                if let Some(pos) = position_of(key) {
                    self.grid.relocate_point(handle, pos);
                }
                self.active.entry(tag).or_default().push(key);
            }
        }
    }

    /// Keys found active under `tag` by the last `update_active`.
    pub fn active(&self, tag: &str) -> &[K] {
        self.active.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every tag seen so far with its active list.
    pub fn active_groups(&self) -> impl Iterator<Item = (&str, &[K])> {
        self.active.iter().map(|(t, l)| (t.as_str(), l.as_slice()))
    }

    /// Number of filed entities.
    pub fn count(&self) -> usize {
        self.grid.len()
    }

    pub fn reset(&mut self) {
        self.grid.reset();
        self.known.clear();
        self.active.clear();
    }
}
