//! Tile-map interchange format.
//!
//! ```text
//! { tile_size: [w, h], dimensions: [w, h],
//!   grid_tiles: { "t\0(x,y)": { layer: record } },
//!   offgrid_tiles: { objects: { id: record }, map: { "t\0(x,y)": [ids] },
//!                    id_to_loc: { id: [[x, y]] }, next_id } }
//! ```
//!
//! Records are `{group, tile_id, pos, layer, c?}`. Loading goes through a hook
//! `(record, on_grid) -> bool`; returning false skips the tile so the caller can
//! turn spawn markers into entities instead.

use glam::{UVec2, Vec2};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::spatial_grid::GridExport;
use crate::tile::{Tile, TileRecord};
use crate::tilemap::TileStore;
use crate::types::*;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileMapFile {
    pub tile_size: UVec2,
    pub dimensions: UVec2,
    #[serde(with = "crate::tuple_keys::map")]
    pub grid_tiles: BTreeMap<CellKey, BTreeMap<i32, TileRecord>>,
    pub offgrid_tiles: GridExport<TileRecord>,
}

/// Load hook that keeps every tile.
pub fn keep_all(_: &TileRecord, _: bool) -> bool {
    true
}

impl TileStore {
    pub fn export(&self) -> TileMapFile {
        let mut grid_tiles: BTreeMap<CellKey, BTreeMap<i32, TileRecord>> = BTreeMap::new();
        for tile in self.grid_tiles() {
            grid_tiles
                .entry(tile.grid_pos())
                .or_default()
                .insert(tile.layer, tile.to_record());
        }
        TileMapFile {
            tile_size: self.cfg.tile_size,
            dimensions: self.cfg.dimensions,
            grid_tiles,
            offgrid_tiles: self.offgrid().export(Tile::to_record),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.export())?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        debug!("saved tile map to {}", path.display());
        Ok(())
    }

    /// Replace the store's contents with `file`. Tile size and dimensions come
    /// from the file; off-grid tiles keep their exported handles.
    ///
    /// Every kept record is resolved against the catalog before the store is
    /// touched, so an invalid reference leaves the current map intact.
    /// Returns the number of tiles placed.
    pub fn import(
        &mut self,
        file: TileMapFile,
        mut hook: impl FnMut(&TileRecord, bool) -> bool,
    ) -> Result<usize> {
        let mut grid = Vec::new();
        for record in file.grid_tiles.values().flat_map(|layers| layers.values()) {
            if hook(record, true) {
                grid.push(Tile::from_record(self.catalog(), record)?);
            } else {
                trace!("load hook skipped grid tile {} at {:?}", record.group, record.pos);
            }
        }
        let mut offgrid = Vec::new();
        for (id, record) in &file.offgrid_tiles.objects {
            if hook(record, false) {
                offgrid.push((Handle(*id), Tile::from_record(self.catalog(), record)?));
            } else {
                trace!("load hook skipped off-grid tile {} at {:?}", record.group, record.pos);
            }
        }

        self.cfg.tile_size = file.tile_size;
        self.cfg.dimensions = file.dimensions;
        self.reset();
        let mut placed = 0;
        for tile in grid {
            if self.insert_grid(tile) {
                placed += 1;
            }
        }
        for (handle, tile) in offgrid {
            if self.insert_offgrid_at(handle, tile) {
                placed += 1;
            }
        }
        self.reserve_offgrid_ids(file.offgrid_tiles.next_id);
        debug!(
            "loaded tile map {}x{} ({}px tiles): {} tiles",
            file.dimensions.x, file.dimensions.y, file.tile_size.x, placed
        );
        Ok(placed)
    }

    pub fn load_json(
        &mut self,
        json: &str,
        hook: impl FnMut(&TileRecord, bool) -> bool,
    ) -> Result<usize> {
        let file: TileMapFile = serde_json::from_str(json)?;
        self.import(file, hook)
    }

    pub fn load_file(
        &mut self,
        path: impl AsRef<Path>,
        hook: impl FnMut(&TileRecord, bool) -> bool,
    ) -> Result<usize> {
        let json = fs::read_to_string(path.as_ref())?;
        debug!("loading tile map from {}", path.as_ref().display());
        self.load_json(&json, hook)
    }

    /// Copy `other`'s tiles into this store, grid tiles shifted by `offset`
    /// cells and off-grid tiles by `offset` tiles' worth of pixels.
    pub fn inject(
        &mut self,
        other: &TileStore,
        offset: CellKey,
        mut hook: impl FnMut(&TileRecord, bool) -> bool,
    ) -> usize {
        let shift = Vec2::new(offset.0 as f32, offset.1 as f32);
        let mut placed = 0;
        for tile in other.grid_tiles() {
            let (gx, gy) = tile.grid_pos();
            let moved = tile.shifted(Vec2::new(gx as f32, gy as f32) + shift);
            if hook(&moved.to_record(), true) && self.insert_grid(moved) {
                placed += 1;
            }
        }
        let pixel_shift = shift * self.cfg.tile_size_f();
        for (_, tile) in other.offgrid().iter() {
            let moved = tile.shifted(tile.pos + pixel_shift);
            if hook(&moved.to_record(), false) && self.insert_offgrid(moved).is_some() {
                placed += 1;
            }
        }
        debug!("injected {} tiles at offset {:?}", placed, offset);
        placed
    }
}
