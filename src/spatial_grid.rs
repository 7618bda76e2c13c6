use glam::Vec2;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::api::SpatialIndex;
use crate::types::*;

/// Bucketed index mapping integer cells to the objects overlapping them.
///
/// Objects are addressed by [`Handle`] and kept in id order. Each entry
/// remembers the cells it was filed under, so deletion touches only those cells.
/// Ids are sparse: restoring an exported grid keeps its ids without allocating
/// for the gaps.
pub struct SpatialGrid<T> {
    cell_size: f32,
    entries: BTreeMap<u32, GridEntry<T>>,
    // cell coord -> handles filed there
    cells: HashMap<CellKey, Vec<Handle>>,
    next_id: u32,
}

struct GridEntry<T> {
    value: T,
    cells: Vec<CellKey>,
}

/// Serializable snapshot of a grid: `{objects, map, id_to_loc, next_id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridExport<R> {
    pub objects: BTreeMap<u32, R>,
    #[serde(with = "crate::tuple_keys::map")]
    pub map: BTreeMap<CellKey, Vec<u32>>,
    pub id_to_loc: BTreeMap<u32, Vec<CellKey>>,
    pub next_id: u32,
}

impl<T> SpatialGrid<T> {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(1e-5),
            entries: BTreeMap::new(),
            cells: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Handle the next insertion will receive.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    fn issue(&mut self) -> Handle {
        if self.next_id < u32::MAX {
            self.next_id += 1;
            return Handle(self.next_id - 1);
        }
        // id space exhausted: take the lowest free id
        let mut free = 0u32;
        for id in self.entries.keys() {
            if *id != free {
                break;
            }
            free += 1;
        }
        Handle(free)
    }

    pub fn cell_of(&self, p: Vec2) -> CellKey {
        cell_of(p, Vec2::splat(self.cell_size))
    }

    /// File `value` under the single cell containing `p`.
    pub fn insert_point(&mut self, value: T, p: Vec2) -> Handle {
        let handle = self.issue();
        let cell = self.cell_of(p);
        self.place(handle, value, vec![cell]);
        handle
    }

    /// Re-insert under a known handle (used when restoring exported maps).
    pub(crate) fn insert_rect_at(&mut self, handle: Handle, value: T, rect: Rect) {
        self.delete(handle);
        let cells = self.rect_cells(rect);
        self.place(handle, value, cells);
    }

    /// Make sure handles below `next_id` are never issued again.
    pub(crate) fn reserve_ids(&mut self, next_id: u32) {
        let past_last = self.entries.keys().next_back().map_or(0, |id| id.saturating_add(1));
        self.next_id = self.next_id.max(next_id).max(past_last);
    }

    fn rect_cells(&self, rect: Rect) -> Vec<CellKey> {
        let mut seen = HashSet::new();
        rect.cell_span(Vec2::splat(self.cell_size))
            .iter()
            .filter(|c| seen.insert(*c))
            .collect()
    }

    fn place(&mut self, handle: Handle, value: T, cells: Vec<CellKey>) {
        for cell in &cells {
            self.cells.entry(*cell).or_default().push(handle);
        }
        self.entries.insert(handle.0, GridEntry { value, cells });
    }

    fn unfile(&mut self, handle: Handle, cell: CellKey) {
        if let Some(list) = self.cells.get_mut(&cell) {
            list.retain(|h| *h != handle);
            if list.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Move a point-filed object to the cell containing `p`.
    /// Returns true when the object changed cells.
    pub fn relocate_point(&mut self, handle: Handle, p: Vec2) -> bool {
        let new_cell = self.cell_of(p);
        let old_cells = match self.entries.get(&handle.0) {
            Some(e) if e.cells.as_slice() != [new_cell] => e.cells.clone(),
            _ => return false,
        };
        for cell in old_cells {
            self.unfile(handle, cell);
        }
        self.cells.entry(new_cell).or_default().push(handle);
        if let Some(e) = self.entries.get_mut(&handle.0) {
            e.cells = vec![new_cell];
        }
        true
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.entries.get_mut(&handle.0).map(|e| &mut e.value)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Cells the object was filed under at its last (re)index.
    pub fn cells_of(&self, handle: Handle) -> &[CellKey] {
        self.entries
            .get(&handle.0)
            .map(|e| e.cells.as_slice())
            .unwrap_or(&[])
    }

    /// Handles filed directly under `cell`, in insertion order.
    pub fn cell(&self, cell: CellKey) -> &[Handle] {
        self.cells.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().map(|(id, e)| (Handle(*id), &e.value))
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Drop everything and restart handle numbering.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.cells.clear();
        self.next_id = 0;
    }

    pub fn export<R>(&self, mut f: impl FnMut(&T) -> R) -> GridExport<R> {
        let mut out = GridExport {
            objects: BTreeMap::new(),
            map: BTreeMap::new(),
            id_to_loc: BTreeMap::new(),
            next_id: self.next_id(),
        };
        for (handle, value) in self.iter() {
            out.objects.insert(handle.0, f(value));
            out.id_to_loc.insert(handle.0, self.cells_of(handle).to_vec());
        }
        for (cell, handles) in &self.cells {
            out.map.insert(*cell, handles.iter().map(|h| h.0).collect());
        }
        out
    }
}

impl<T> SpatialIndex<T> for SpatialGrid<T> {
    fn insert_rect(&mut self, value: T, rect: Rect) -> Handle {
        let handle = self.issue();
        let cells = self.rect_cells(rect);
        self.place(handle, value, cells);
        handle
    }

    fn delete(&mut self, handle: Handle) -> Option<T> {
        let entry = self.entries.remove(&handle.0)?;
        for cell in &entry.cells {
            self.unfile(handle, *cell);
        }
        Some(entry.value)
    }

    fn query(&self, rect: Rect) -> Vec<Handle> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for cell in rect.cell_span(Vec2::splat(self.cell_size)).iter() {
            if let Some(list) = self.cells.get(&cell) {
                for &h in list {
                    if seen.insert(h) {
                        out.push(h);
                    }
                }
            }
        }
        out
    }

    fn get(&self, handle: Handle) -> Option<&T> {
        self.entries.get(&handle.0).map(|e| &e.value)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
