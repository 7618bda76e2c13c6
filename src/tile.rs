use glam::Vec2;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::api::{RenderSink, SpriteRef};
use crate::error::{Error, Result};
use crate::types::*;

/// Draws one tile. Arguments: tile, camera offset, render group, sink.
pub type TileRenderFn = fn(&Tile, Vec2, &str, &mut dyn RenderSink);

/// Default renderer: the tile's sprite at its pixel position, z = layer.
pub fn basic_tile_render(tile: &Tile, offset: Vec2, group: &str, sink: &mut dyn RenderSink) {
    sink.blit(tile.sprite(), tile.raw_pos + tile.offset - offset, tile.layer, group);
}

/// Per-sprite configuration within a group's sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileConfig {
    #[serde(default)]
    pub offset: Vec2,
    /// Missing flags mean `["solid"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<BTreeSet<String>>,
    /// Sprite size in pixels; missing means one grid tile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Vec2>,
}

/// Sprite set of one tile group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileGroup {
    #[serde(with = "crate::tuple_keys::loose_map")]
    pub tiles: BTreeMap<TileId, TileConfig>,
}

/// Lookup table of every group's sprites plus the per-group render overrides.
///
/// Image decoding and sheet slicing belong to the asset loader; the catalog only
/// keeps what the core needs to place, collide and draw a tile.
#[derive(Clone, Debug)]
pub struct TileCatalog {
    groups: HashMap<String, TileGroup>,
    renderers: HashMap<String, TileRenderFn>,
    default_size: Vec2,
}

impl TileCatalog {
    pub fn new(default_size: Vec2) -> Self {
        Self { groups: HashMap::new(), renderers: HashMap::new(), default_size }
    }

    pub fn add_group(&mut self, name: impl Into<String>, group: TileGroup) {
        self.groups.insert(name.into(), group);
    }

    /// Parse a group sheet config: `{"t\0(x,y)" | "(x,y)": {offset, flags, size}}`.
    pub fn add_group_json(&mut self, name: impl Into<String>, json: &str) -> Result<()> {
        let group: TileGroup = serde_json::from_str(json)?;
        self.add_group(name, group);
        Ok(())
    }

    /// Register a custom render function for every tile of `group`.
    pub fn register_renderer(&mut self, group: impl Into<String>, f: TileRenderFn) {
        self.renderers.insert(group.into(), f);
    }

    pub fn renderer(&self, group: &str) -> TileRenderFn {
        self.renderers.get(group).copied().unwrap_or(basic_tile_render)
    }

    pub fn group(&self, name: &str) -> Result<&TileGroup> {
        self.groups.get(name).ok_or_else(|| Error::UnknownGroup(name.to_string()))
    }

    pub fn config(&self, group: &str, tile_id: TileId) -> Result<&TileConfig> {
        self.group(group)?
            .tiles
            .get(&tile_id)
            .ok_or_else(|| Error::InvalidReference { group: group.to_string(), tile_id })
    }

    pub fn default_size(&self) -> Vec2 {
        self.default_size
    }
}

/// Persisted form of a tile: `{group, tile_id, pos, layer, c?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub group: String,
    pub tile_id: TileId,
    pub pos: Vec2,
    pub layer: i32,
    #[serde(rename = "c", default, skip_serializing_if = "String::is_empty")]
    pub custom_data: String,
}

/// A placed tile.
///
/// `pos` is the grid coordinate for grid tiles and the pixel position for
/// off-grid tiles; `raw_pos` and `rect` are always in pixels and are filled in
/// when the tile is attached to a store.
#[derive(Clone, Debug)]
pub struct Tile {
    pub group: String,
    pub tile_id: TileId,
    pub pos: Vec2,
    pub layer: i32,
    pub raw_pos: Vec2,
    pub rect: Rect,
    pub offset: Vec2,
    pub sprite_size: Vec2,
    pub flags: BTreeSet<String>,
    pub physics_type: Option<PhysicsType>,
    pub custom_data: String,
    render_fn: TileRenderFn,
}

impl Tile {
    pub fn new(
        catalog: &TileCatalog,
        group: &str,
        tile_id: TileId,
        pos: Vec2,
        layer: i32,
        custom_data: impl Into<String>,
    ) -> Result<Self> {
        let config = catalog.config(group, tile_id)?;
        let sprite_size = config.size.unwrap_or(catalog.default_size());
        let flags = config
            .flags
            .clone()
            .unwrap_or_else(|| BTreeSet::from(["solid".to_string()]));
        Ok(Self {
            group: group.to_string(),
            tile_id,
            pos,
            layer,
            raw_pos: pos,
            rect: Rect::from_pos_size(pos, sprite_size),
            offset: config.offset,
            sprite_size,
            flags,
            physics_type: None,
            custom_data: custom_data.into(),
            render_fn: catalog.renderer(group),
        })
    }

    pub fn from_record(catalog: &TileCatalog, record: &TileRecord) -> Result<Self> {
        Self::new(
            catalog,
            &record.group,
            record.tile_id,
            record.pos,
            record.layer,
            record.custom_data.clone(),
        )
    }

    pub fn to_record(&self) -> TileRecord {
        TileRecord {
            group: self.group.clone(),
            tile_id: self.tile_id,
            pos: self.pos,
            layer: self.layer,
            custom_data: self.custom_data.clone(),
        }
    }

    /// Integer grid coordinate (meaningful for grid tiles).
    pub fn grid_pos(&self) -> CellKey {
        (self.pos.x.floor() as i32, self.pos.y.floor() as i32)
    }

    pub fn sprite(&self) -> SpriteRef<'_> {
        SpriteRef { group: &self.group, tile_id: self.tile_id }
    }

    /// Switch to another sprite of the same group. Flags and physics type are kept.
    pub fn change_id(&mut self, catalog: &TileCatalog, tile_id: TileId) -> Result<()> {
        let config = catalog.config(&self.group, tile_id)?;
        self.tile_id = tile_id;
        self.offset = config.offset;
        self.sprite_size = config.size.unwrap_or(catalog.default_size());
        self.render_fn = catalog.renderer(&self.group);
        Ok(())
    }

    /// Same tile at another position; custom data is carried over.
    pub fn shifted(&self, pos: Vec2) -> Tile {
        let mut tile = self.clone();
        tile.pos = pos;
        tile.raw_pos = pos;
        tile.rect = Rect::from_pos_size(pos, self.sprite_size);
        tile.physics_type = None;
        tile
    }

    /// Bind the tile to a map: pixel geometry for grid tiles and the physics
    /// type, picked as the highest-priority flag the map knows about.
    pub(crate) fn attach(&mut self, cfg: &TileMapConfig, on_grid: bool) {
        if on_grid {
            let tile_size = cfg.tile_size_f();
            let (gx, gy) = self.grid_pos();
            self.raw_pos = Vec2::new(gx as f32, gy as f32) * tile_size;
            self.rect = Rect::from_pos_size(self.raw_pos, tile_size);
        } else {
            self.raw_pos = self.pos;
            self.rect = Rect::from_pos_size(self.pos, self.sprite_size);
        }
        self.physics_type = self
            .flags
            .iter()
            .filter_map(|f| PhysicsType::from_flag(f))
            .filter_map(|k| cfg.priority_of(k).map(|p| (k, p)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k);
    }

    pub fn render(&self, offset: Vec2, group: &str, sink: &mut dyn RenderSink) {
        (self.render_fn)(self, offset, group, sink);
    }
}
