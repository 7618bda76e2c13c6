use glam::{UVec2, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer cell coordinate used by every bucketed index and by the tile grid.
pub type CellKey = (i32, i32);

/// Cell containing `p` for a lattice of `cell` sized cells (floor division).
pub fn cell_of(p: Vec2, cell: Vec2) -> CellKey {
    ((p.x / cell.x).floor() as i32, (p.y / cell.y).floor() as i32)
}

/// Axis-aligned rectangle, top-left origin, y pointing down.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub pos: Vec2,
    pub size: Vec2,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { pos: Vec2::new(x, y), size: Vec2::new(w, h) }
    }

    pub fn from_pos_size(pos: Vec2, size: Vec2) -> Self {
        Self { pos, size }
    }

    pub fn left(&self) -> f32 {
        self.pos.x
    }

    pub fn right(&self) -> f32 {
        self.pos.x + self.size.x
    }

    pub fn top(&self) -> f32 {
        self.pos.y
    }

    pub fn bottom(&self) -> f32 {
        self.pos.y + self.size.y
    }

    pub fn center(&self) -> Vec2 {
        self.pos + self.size * 0.5
    }

    pub fn set_left(&mut self, x: f32) {
        self.pos.x = x;
    }

    pub fn set_right(&mut self, x: f32) {
        self.pos.x = x - self.size.x;
    }

    pub fn set_top(&mut self, y: f32) {
        self.pos.y = y;
    }

    pub fn set_bottom(&mut self, y: f32) {
        self.pos.y = y - self.size.y;
    }

    /// Strict overlap: rectangles that only share an edge do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && self.right() > other.left()
            && self.top() < other.bottom()
            && self.bottom() > other.top()
    }

    /// Half-open containment (`left <= x < right`).
    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.left() && p.x < self.right() && p.y >= self.top() && p.y < self.bottom()
    }

    /// True when `other` lies entirely inside this rect (edges may touch).
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.right() <= self.right()
            && other.top() >= self.top()
            && other.bottom() <= self.bottom()
    }

    /// Cells touched by this rect, including the cell under the right/bottom edge.
    pub fn cell_span(&self, cell: Vec2) -> CellSpan {
        let (x0, y0) = cell_of(self.pos, cell);
        let (x1, y1) = cell_of(Vec2::new(self.right(), self.bottom()), cell);
        CellSpan { min: (x0, y0), max: (x1, y1) }
    }
}

/// Inclusive range of cells, iterated row by row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CellSpan {
    pub min: CellKey,
    pub max: CellKey,
}

impl CellSpan {
    pub fn iter(self) -> impl Iterator<Item = CellKey> {
        (self.min.1..=self.max.1).flat_map(move |y| (self.min.0..=self.max.0).map(move |x| (x, y)))
    }

    pub fn len(&self) -> usize {
        let w = (self.max.0 - self.min.0 + 1).max(0) as usize;
        let h = (self.max.1 - self.min.1 + 1).max(0) as usize;
        w * h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opaque handle issued by a spatial index. Never reused within one index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

/// Sprite cell inside a tile group's sheet, `(column, row)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId(pub i32, pub i32);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

impl From<(i32, i32)> for TileId {
    fn from((x, y): (i32, i32)) -> Self {
        TileId(x, y)
    }
}

impl From<TileId> for (i32, i32) {
    fn from(id: TileId) -> Self {
        (id.0, id.1)
    }
}

/// Collision behavior a tile contributes to the physics map.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicsType {
    #[serde(rename = "solid")]
    Solid,
    #[serde(rename = "dropthrough")]
    Dropthrough,
    #[serde(rename = "rampr", alias = "ramp-right")]
    RampRight,
    #[serde(rename = "rampl", alias = "ramp-left")]
    RampLeft,
}

impl PhysicsType {
    /// Parse a tile flag. Both the short (`rampr`) and long (`ramp-right`) spellings are accepted.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "solid" => Some(PhysicsType::Solid),
            "dropthrough" => Some(PhysicsType::Dropthrough),
            "rampr" | "ramp-right" => Some(PhysicsType::RampRight),
            "rampl" | "ramp-left" => Some(PhysicsType::RampLeft),
            _ => None,
        }
    }

    pub fn as_flag(self) -> &'static str {
        match self {
            PhysicsType::Solid => "solid",
            PhysicsType::Dropthrough => "dropthrough",
            PhysicsType::RampRight => "rampr",
            PhysicsType::RampLeft => "rampl",
        }
    }
}

/// Which sides of an entity touched something during the last resolution call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Sides {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl Sides {
    pub fn any(self) -> bool {
        self.up || self.down || self.left || self.right
    }
}

/// Collision candidate handed to the resolver: a rectangle and how it collides.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhysicsTile {
    pub rect: Rect,
    pub kind: PhysicsType,
}

/// Tile map configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TileMapConfig {
    /// Pixel size of one grid cell.
    pub tile_size: UVec2,
    /// Grid width/height in cells.
    pub dimensions: UVec2,
    /// When set, inserts outside `dimensions` are dropped and autotiling treats
    /// out-of-map neighbors as edges.
    pub dimensional_lock: bool,
    /// Priority per physics type; higher wins the head of a physics-map cell.
    pub physics_priority: Vec<(PhysicsType, f32)>,
    /// Off-grid index cell size as a multiple of `tile_size.x + tile_size.y`.
    pub offgrid_cell_factor: f32,
}

impl Default for TileMapConfig {
    fn default() -> Self {
        Self {
            tile_size: UVec2::new(16, 16),
            dimensions: UVec2::new(16, 16),
            dimensional_lock: true,
            physics_priority: vec![
                (PhysicsType::Solid, 1.0),
                (PhysicsType::Dropthrough, 0.9),
                (PhysicsType::RampRight, 0.8),
                (PhysicsType::RampLeft, 0.7),
            ],
            offgrid_cell_factor: 3.0,
        }
    }
}

impl TileMapConfig {
    pub fn tile_size_f(&self) -> Vec2 {
        self.tile_size.as_vec2()
    }

    pub fn world_dimensions(&self) -> Vec2 {
        (self.dimensions * self.tile_size).as_vec2()
    }

    pub fn offgrid_cell_size(&self) -> f32 {
        (self.tile_size.x + self.tile_size.y) as f32 * self.offgrid_cell_factor
    }

    pub fn priority_of(&self, kind: PhysicsType) -> Option<f32> {
        self.physics_priority.iter().find(|(k, _)| *k == kind).map(|(_, p)| *p)
    }
}

/// Entity activity index configuration.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub quad_size: f32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { quad_size: 64.0 }
    }
}

/// Debug statistics for a tile store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub grid_tiles: usize,
    pub grid_cells: usize,
    pub offgrid_tiles: usize,
    pub offgrid_cells: usize,
    pub physics_cells: usize,
}
