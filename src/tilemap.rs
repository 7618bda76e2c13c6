use glam::Vec2;
use log::{trace, warn};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::api::{Blit, ColliderSource, RenderSink, SpatialIndex};
use crate::spatial_grid::SpatialGrid;
use crate::tile::{basic_tile_render, Tile, TileCatalog};
use crate::types::*;

/// Flood fills stop collecting cells once this many have been gathered.
pub const FLOOD_FILL_CAP: usize = 2048;

/// 3x3 neighborhood offsets, in the order collisions are resolved.
const BORDERS: [CellKey; 9] =
    [(-1, 0), (-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1), (0, 0)];

const CARDINALS: [CellKey; 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// One ranked collidable tile in a physics-map cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhysicsEntry {
    pub priority: f32,
    pub seq: u64,
    pub layer: i32,
}

/// Neighbor lookup result used by autotiling.
#[derive(Copy, Clone, Debug)]
pub enum Neighbor<'a> {
    Tile(&'a Tile),
    /// Outside a dimension-locked map.
    Edge,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FloodFill {
    pub filled: usize,
    /// The fill hit [`FLOOD_FILL_CAP`] and stopped early.
    pub capped: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TileCount {
    pub grid: usize,
    pub offgrid: usize,
}

/// Owner of all placed tiles.
///
/// Grid tiles are keyed by `(grid position, layer)`; off-grid tiles live in a
/// [`SpatialGrid`]. The physics map ranks, per cell, every grid tile that has a
/// physics type, highest `(priority, insertion sequence)` first.
pub struct TileStore {
    pub cfg: TileMapConfig,
    catalog: Rc<TileCatalog>,
    grid_tiles: HashMap<CellKey, BTreeMap<i32, Tile>>,
    physics_map: HashMap<CellKey, Vec<PhysicsEntry>>,
    offgrid: SpatialGrid<Tile>,
    seq: u64,
}

impl TileStore {
    pub fn new(cfg: TileMapConfig, catalog: Rc<TileCatalog>) -> Self {
        let offgrid = SpatialGrid::new(cfg.offgrid_cell_size());
        Self {
            cfg,
            catalog,
            grid_tiles: HashMap::new(),
            physics_map: HashMap::new(),
            offgrid,
            seq: 0,
        }
    }

    pub fn catalog(&self) -> &TileCatalog {
        &self.catalog
    }

    pub fn catalog_rc(&self) -> Rc<TileCatalog> {
        Rc::clone(&self.catalog)
    }

    /// Drop every tile. The off-grid index is rebuilt for the current tile size.
    pub fn reset(&mut self) {
        self.grid_tiles.clear();
        self.physics_map.clear();
        self.offgrid = SpatialGrid::new(self.cfg.offgrid_cell_size());
        self.seq = 0;
    }

    pub fn in_map(&self, pos: CellKey) -> bool {
        let dims = self.cfg.dimensions;
        pos.0 >= 0 && pos.1 >= 0 && (pos.0 as u32) < dims.x && (pos.1 as u32) < dims.y
    }

    pub fn world_dimensions(&self) -> Vec2 {
        self.cfg.world_dimensions()
    }

    pub fn insert(&mut self, tile: Tile, on_grid: bool) -> bool {
        if on_grid {
            self.insert_grid(tile)
        } else {
            self.insert_offgrid(tile).is_some()
        }
    }

    /// Place a grid tile, replacing whatever sat at the same `(position, layer)`.
    /// Out-of-bounds tiles on a locked map are dropped silently.
    pub fn insert_grid(&mut self, mut tile: Tile) -> bool {
        tile.attach(&self.cfg, true);
        let pos = tile.grid_pos();
        if self.cfg.dimensional_lock && !self.in_map(pos) {
            trace!("grid tile {} at {:?} outside map, dropped", tile.group, pos);
            return false;
        }
        let layer = tile.layer;
        self.remove_physics_entry(pos, layer);
        if let Some(kind) = tile.physics_type {
            let priority = self.cfg.priority_of(kind).unwrap_or(0.0);
            let bucket = self.physics_map.entry(pos).or_default();
            bucket.push(PhysicsEntry { priority, seq: self.seq, layer });
            bucket.sort_by(|a, b| b.priority.total_cmp(&a.priority).then(b.seq.cmp(&a.seq)));
            self.seq += 1;
        }
        self.grid_tiles.entry(pos).or_default().insert(layer, tile);
        true
    }

    pub fn insert_offgrid(&mut self, mut tile: Tile) -> Option<Handle> {
        tile.attach(&self.cfg, false);
        if self.cfg.dimensional_lock && !self.offgrid_in_map(tile.raw_pos) {
            trace!("off-grid tile {} at {:?} outside map, dropped", tile.group, tile.raw_pos);
            return None;
        }
        let rect = tile.rect;
        Some(self.offgrid.insert_rect(tile, rect))
    }

    /// Restore an off-grid tile under the handle it was exported with.
    pub(crate) fn insert_offgrid_at(&mut self, handle: Handle, mut tile: Tile) -> bool {
        tile.attach(&self.cfg, false);
        if self.cfg.dimensional_lock && !self.offgrid_in_map(tile.raw_pos) {
            trace!("off-grid tile {} at {:?} outside map, dropped", tile.group, tile.raw_pos);
            return false;
        }
        let rect = tile.rect;
        self.offgrid.insert_rect_at(handle, tile, rect);
        true
    }

    pub(crate) fn reserve_offgrid_ids(&mut self, next_id: u32) {
        self.offgrid.reserve_ids(next_id);
    }

    fn offgrid_in_map(&self, raw_pos: Vec2) -> bool {
        let cell = raw_pos / self.cfg.tile_size_f();
        let dims = self.cfg.dimensions.as_vec2();
        cell.x >= 0.0 && cell.y >= 0.0 && cell.x < dims.x && cell.y < dims.y
    }

    fn remove_physics_entry(&mut self, pos: CellKey, layer: i32) {
        if let Some(bucket) = self.physics_map.get_mut(&pos) {
            bucket.retain(|e| e.layer != layer);
            if bucket.is_empty() {
                self.physics_map.remove(&pos);
            }
        }
    }

    /// Delete grid tiles at `pos`: one layer, or every layer when `layer` is `None`.
    /// Returns how many tiles were removed.
    pub fn grid_delete(&mut self, pos: CellKey, layer: Option<i32>) -> usize {
        match layer {
            None => {
                self.physics_map.remove(&pos);
                self.grid_tiles.remove(&pos).map_or(0, |layers| layers.len())
            }
            Some(layer) => {
                let Some(layers) = self.grid_tiles.get_mut(&pos) else {
                    return 0;
                };
                if layers.remove(&layer).is_none() {
                    return 0;
                }
                if layers.is_empty() {
                    self.grid_tiles.remove(&pos);
                }
                self.remove_physics_entry(pos, layer);
                1
            }
        }
    }

    pub fn offgrid_delete(&mut self, handle: Handle) -> Option<Tile> {
        self.offgrid.delete(handle)
    }

    /// Delete every grid and off-grid tile overlapping `rect` (optionally one layer only).
    pub fn rect_delete(&mut self, rect: Rect, layer: Option<i32>) -> usize {
        let tile_size = self.cfg.tile_size_f();
        let mut removed = 0;
        for pos in self.rect_grid_locs(rect).iter() {
            let origin = Vec2::new(pos.0 as f32, pos.1 as f32) * tile_size;
            let cell_rect = Rect::from_pos_size(origin, tile_size);
            if self.grid_tiles.contains_key(&pos) && cell_rect.overlaps(&rect) {
                removed += self.grid_delete(pos, layer);
            }
        }
        let doomed: Vec<Handle> = self
            .offgrid
            .query(rect)
            .into_iter()
            .filter(|h| {
                self.offgrid
                    .get(*h)
                    .is_some_and(|t| t.rect.overlaps(&rect) && layer.is_none_or(|l| t.layer == l))
            })
            .collect();
        for h in doomed {
            if self.offgrid.delete(h).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn grid_tile(&self, pos: CellKey) -> Option<&BTreeMap<i32, Tile>> {
        self.grid_tiles.get(&pos)
    }

    pub fn tile_at(&self, pos: CellKey, layer: i32) -> Option<&Tile> {
        self.grid_tiles.get(&pos)?.get(&layer)
    }

    pub(crate) fn tile_at_mut(&mut self, pos: CellKey, layer: i32) -> Option<&mut Tile> {
        self.grid_tiles.get_mut(&pos)?.get_mut(&layer)
    }

    pub fn grid_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.grid_tiles.values().flat_map(|layers| layers.values())
    }

    pub fn offgrid(&self) -> &SpatialGrid<Tile> {
        &self.offgrid
    }

    /// Ranked physics entries of one cell, head first.
    pub fn physics_bucket(&self, pos: CellKey) -> &[PhysicsEntry] {
        self.physics_map.get(&pos).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Authoritative collidable tile of a grid cell.
    pub fn physics_tile_at(&self, pos: CellKey) -> Option<&Tile> {
        let head = self.physics_map.get(&pos)?.first()?;
        self.tile_at(pos, head.layer)
    }

    /// Authoritative collidable tile under a world point.
    pub fn physics_tile_at_world(&self, point: Vec2) -> Option<&Tile> {
        self.physics_tile_at(cell_of(point, self.cfg.tile_size_f()))
    }

    /// Head physics tile of the point's cell and of its 8 neighbors (at most 9).
    pub fn nearby_physics(&self, point: Vec2) -> Vec<&Tile> {
        let (gx, gy) = cell_of(point, self.cfg.tile_size_f());
        BORDERS
            .iter()
            .filter_map(|(dx, dy)| self.physics_tile_at((gx + dx, gy + dy)))
            .collect()
    }

    /// Tiles on `layer` around `pos` at the given offsets. With `handle_edge`,
    /// offsets that fall outside a locked map report [`Neighbor::Edge`].
    pub fn neighbors(
        &self,
        pos: CellKey,
        layer: i32,
        offsets: &[CellKey],
        handle_edge: bool,
    ) -> HashMap<CellKey, Neighbor<'_>> {
        let mut out = HashMap::new();
        for &(dx, dy) in offsets {
            let loc = (pos.0 + dx, pos.1 + dy);
            if let Some(tile) = self.tile_at(loc, layer) {
                out.insert((dx, dy), Neighbor::Tile(tile));
            }
            if handle_edge && self.cfg.dimensional_lock && !self.in_map(loc) {
                out.insert((dx, dy), Neighbor::Edge);
            }
        }
        out
    }

    /// Grid cells covered by a pixel rect.
    pub fn rect_grid_locs(&self, rect: Rect) -> CellSpan {
        rect.cell_span(self.cfg.tile_size_f())
    }

    /// Tiles touching `rect`, grouped by layer. Grid tiles come first, in row order.
    pub fn rect_select(&self, rect: Rect, grid_only: bool) -> BTreeMap<i32, Vec<&Tile>> {
        let mut layers: BTreeMap<i32, Vec<&Tile>> = BTreeMap::new();
        for pos in self.rect_grid_locs(rect).iter() {
            if let Some(tiles) = self.grid_tiles.get(&pos) {
                for (layer, tile) in tiles {
                    layers.entry(*layer).or_default().push(tile);
                }
            }
        }
        if !grid_only {
            for h in self.offgrid.query(rect) {
                if let Some(tile) = self.offgrid.get(h) {
                    layers.entry(tile.layer).or_default().push(tile);
                }
            }
        }
        layers
    }

    pub fn count_tiles(&self) -> TileCount {
        TileCount {
            grid: self.grid_tiles.values().map(BTreeMap::len).sum(),
            offgrid: self.offgrid.len(),
        }
    }

    pub fn count_rect_tiles(&self, rect: Rect) -> usize {
        self.rect_select(rect, false).values().map(Vec::len).sum()
    }

    /// Groups present on `layer` within `rect`.
    pub fn visible_layer_contains(&self, rect: Rect, layer: i32) -> BTreeSet<String> {
        self.rect_select(rect, false)
            .get(&layer)
            .map(|tiles| tiles.iter().map(|t| t.group.clone()).collect())
            .unwrap_or_default()
    }

    /// Fill empty, in-map cells 4-connected to `seed`'s position with copies of
    /// `seed`. Collection stops at [`FLOOD_FILL_CAP`] cells; what was gathered by
    /// then is still placed.
    pub fn flood_fill(&mut self, seed: &Tile) -> FloodFill {
        let layer = seed.layer;
        let start = seed.grid_pos();
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        let mut fill = Vec::new();
        let mut capped = false;
        while let Some(loc) = queue.pop_front() {
            if self.tile_at(loc, layer).is_some() || !self.in_map(loc) {
                continue;
            }
            if fill.len() >= FLOOD_FILL_CAP {
                capped = true;
                break;
            }
            fill.push(loc);
            for (dx, dy) in CARDINALS {
                let next = (loc.0 + dx, loc.1 + dy);
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        if capped {
            warn!("flood fill from {:?} hit the {} cell cap", start, FLOOD_FILL_CAP);
        }
        let mut filled = 0;
        for loc in fill {
            if self.insert_grid(seed.shifted(Vec2::new(loc.0 as f32, loc.1 as f32))) {
                filled += 1;
            }
        }
        FloodFill { filled, capped }
    }

    /// Raw blits for every tile in `rect`, ignoring custom render functions.
    pub fn render_prep(&self, rect: Rect, offset: Vec2, group: &str) -> Vec<Blit> {
        let mut out: Vec<Blit> = Vec::new();
        for tiles in self.rect_select(rect, false).values() {
            for tile in tiles {
                basic_tile_render(tile, offset, group, &mut out);
            }
        }
        out
    }

    /// Draw tiles in `rect` through their render functions, optionally only some groups.
    pub fn render(
        &self,
        rect: Rect,
        offset: Vec2,
        group: &str,
        sink: &mut dyn RenderSink,
        only: Option<&BTreeSet<String>>,
    ) {
        for tiles in self.rect_select(rect, false).values() {
            for tile in tiles {
                if only.is_none_or(|set| set.contains(&tile.group)) {
                    tile.render(offset, group, sink);
                }
            }
        }
    }

    pub fn debug_stats(&self) -> StoreStats {
        let counts = self.count_tiles();
        StoreStats {
            grid_tiles: counts.grid,
            grid_cells: self.grid_tiles.len(),
            offgrid_tiles: counts.offgrid,
            offgrid_cells: self.offgrid.cell_count(),
            physics_cells: self.physics_map.len(),
        }
    }
}

impl ColliderSource for TileStore {
    fn colliders_near(&self, probe: Rect) -> Vec<PhysicsTile> {
        self.nearby_physics(probe.center())
            .into_iter()
            .filter_map(|t| t.physics_type.map(|kind| PhysicsTile { rect: t.rect, kind }))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use glam::UVec2;

    pub(crate) fn catalog() -> Rc<TileCatalog> {
        let mut c = TileCatalog::new(Vec2::splat(16.0));
        c.add_group_json(
            "stone",
            r#"{"(0,0)": {}, "(1,0)": {}, "(2,0)": {}, "(0,1)": {}, "(1,1)": {}}"#,
        )
        .unwrap();
        c.add_group_json(
            "plat",
            r#"{"(0,0)": {"flags": ["dropthrough"]},
                "(1,0)": {"flags": ["rampr"]},
                "(2,0)": {"flags": ["rampl"]}}"#,
        )
        .unwrap();
        c.add_group_json("decor", r#"{"(0,0)": {"flags": [], "size": [24, 12]}}"#).unwrap();
        Rc::new(c)
    }

    pub(crate) fn store(w: u32, h: u32) -> TileStore {
        let cfg = TileMapConfig { dimensions: UVec2::new(w, h), ..TileMapConfig::default() };
        TileStore::new(cfg, catalog())
    }

    pub(crate) fn tile(s: &TileStore, group: &str, pos: (i32, i32), layer: i32) -> Tile {
        let at = Vec2::new(pos.0 as f32, pos.1 as f32);
        Tile::new(s.catalog(), group, TileId(0, 0), at, layer, "").unwrap()
    }

    #[test]
    fn test_insert_rejects_out_of_bounds_when_locked() {
        let mut s = store(4, 4);
        assert!(!s.insert(tile(&s, "stone", (4, 0), 0), true));
        assert!(!s.insert(tile(&s, "stone", (-1, 2), 0), true));
        assert!(s.insert(tile(&s, "stone", (3, 3), 0), true));
        s.cfg.dimensional_lock = false;
        assert!(s.insert(tile(&s, "stone", (40, 0), 0), true));
        assert_eq!(s.count_tiles().grid, 2);
    }

    #[test]
    fn test_physics_bucket_ranks_by_priority_then_recency() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "plat", (1, 1), 0), true);
        s.insert(tile(&s, "stone", (1, 1), 1), true);
        s.insert(tile(&s, "stone", (1, 1), 2), true);
        let bucket = s.physics_bucket((1, 1));
        assert_eq!(bucket.len(), 3);
        // two solids: the later one wins the tie
        assert_eq!(bucket[0].layer, 2);
        assert_eq!(bucket[1].layer, 1);
        assert_eq!(bucket[2].layer, 0);
        assert_eq!(s.physics_tile_at((1, 1)).unwrap().layer, 2);
    }

    #[test]
    fn test_replacing_a_layer_drops_its_stale_physics_entry() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        assert_eq!(s.physics_bucket((0, 0)).len(), 1);
        assert_eq!(s.count_tiles().grid, 1);
    }

    #[test]
    fn test_layer_delete_keeps_remaining_order() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "plat", (2, 2), 0), true);
        s.insert(tile(&s, "stone", (2, 2), 1), true);
        s.insert(tile(&s, "stone", (2, 2), 2), true);
        assert_eq!(s.grid_delete((2, 2), Some(2)), 1);
        let layers: Vec<i32> = s.physics_bucket((2, 2)).iter().map(|e| e.layer).collect();
        assert_eq!(layers, vec![1, 0]);
        assert_eq!(s.grid_delete((2, 2), Some(2)), 0);
        assert_eq!(s.grid_delete((2, 2), None), 2);
        assert!(s.physics_bucket((2, 2)).is_empty());
        assert!(s.grid_tile((2, 2)).is_none());
        assert_eq!(s.grid_delete((2, 2), None), 0);
    }

    #[test]
    fn test_nearby_physics_is_bounded_to_3x3() {
        let mut s = store(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                s.insert(tile(&s, "stone", (x, y), 0), true);
            }
        }
        let near = s.nearby_physics(Vec2::new(3.5 * 16.0, 3.5 * 16.0));
        assert_eq!(near.len(), 9);
        // the owning cell comes last
        assert_eq!(near[8].grid_pos(), (3, 3));
        let corner = s.nearby_physics(Vec2::new(1.0, 1.0));
        assert_eq!(corner.len(), 4);
    }

    #[test]
    fn test_offgrid_tiles_index_by_rect() {
        let mut s = store(8, 8);
        let t =
            Tile::new(s.catalog(), "decor", TileId(0, 0), Vec2::new(90.0, 10.0), 1, "").unwrap();
        let h = s.insert_offgrid(t).unwrap();
        // off-grid cells are 96px: the 24px sprite at x=90 spans two
        assert_eq!(s.offgrid().cells_of(h), &[(0, 0), (1, 0)]);
        let t =
            Tile::new(s.catalog(), "decor", TileId(0, 0), Vec2::new(-5.0, 10.0), 1, "").unwrap();
        assert!(s.insert_offgrid(t).is_none());
        assert_eq!(s.count_rect_tiles(Rect::new(100.0, 0.0, 4.0, 4.0)), 1);
    }

    #[test]
    fn test_rect_delete_respects_layer_and_overlap() {
        let mut s = store(8, 8);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "stone", (0, 0), 1), true);
        s.insert(tile(&s, "stone", (1, 0), 0), true);
        let t = Tile::new(s.catalog(), "decor", TileId(0, 0), Vec2::new(2.0, 2.0), 1, "").unwrap();
        s.insert_offgrid(t);
        // touches only cell (0,0); the edge at x=16 is shared, not overlapped
        let removed = s.rect_delete(Rect::new(0.0, 0.0, 16.0, 16.0), Some(1));
        assert_eq!(removed, 2);
        assert!(s.tile_at((0, 0), 0).is_some());
        assert!(s.tile_at((0, 0), 1).is_none());
        assert!(s.tile_at((1, 0), 0).is_some());
        assert_eq!(s.count_tiles().offgrid, 0);
    }

    #[test]
    fn test_flood_fill_stops_at_walls() {
        let mut s = store(6, 6);
        for y in 0..6 {
            s.insert(tile(&s, "stone", (3, y), 0), true);
        }
        let seed = tile(&s, "stone", (0, 0), 0);
        let out = s.flood_fill(&seed);
        assert_eq!(out, FloodFill { filled: 18, capped: false });
        assert!(s.tile_at((2, 5), 0).is_some());
        assert!(s.tile_at((4, 0), 0).is_none());
    }

    #[test]
    fn test_flood_fill_from_occupied_cell_is_noop() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (1, 1), 0), true);
        let out = s.flood_fill(&tile(&s, "stone", (1, 1), 0));
        assert_eq!(out.filled, 0);
        // a different layer is still empty
        let out = s.flood_fill(&tile(&s, "stone", (1, 1), 1));
        assert_eq!(out.filled, 16);
    }

    #[test]
    fn test_visible_layer_contains_lists_groups() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "plat", (1, 0), 0), true);
        s.insert(tile(&s, "plat", (1, 0), 1), true);
        let groups = s.visible_layer_contains(Rect::new(0.0, 0.0, 20.0, 4.0), 0);
        let names: Vec<String> = groups.into_iter().collect();
        assert_eq!(names, vec!["plat".to_string(), "stone".to_string()]);
    }

    #[test]
    fn test_render_filters_by_group() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "plat", (1, 0), 2), true);
        let only = BTreeSet::from(["plat".to_string()]);
        let mut blits: Vec<Blit> = Vec::new();
        s.render(Rect::new(0.0, 0.0, 40.0, 10.0), Vec2::ZERO, "world", &mut blits, Some(&only));
        assert_eq!(blits.len(), 1);
        assert_eq!(blits[0].z, 2);
    }

    #[test]
    fn test_render_prep_tags_the_render_group() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "plat", (1, 0), 2), true);
        let area = Rect::new(0.0, 0.0, 40.0, 10.0);
        let blits = s.render_prep(area, Vec2::new(-4.0, 0.0), "background");
        assert_eq!(blits.len(), 2);
        assert!(blits.iter().all(|b| b.render_group == "background"));
        let plat = blits.iter().find(|b| b.group == "plat").unwrap();
        assert_eq!((plat.pos, plat.z), (Vec2::new(20.0, 0.0), 2));
    }
}
