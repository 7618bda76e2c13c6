//! tilequad: tile-world substrate (layered tile store, spatial indexes,
//! platformer physics, autotiling)

pub mod types;
pub mod error;
pub mod api;
pub mod tuple_keys;
pub mod spatial_grid;
pub mod stationary;
pub mod tile;
pub mod tilemap;
pub mod mask;
pub mod autotile;
pub mod physics;
pub mod activity;
pub mod groups;
pub mod particles;
pub mod persist;

pub use crate::types::*;
pub use crate::api::*;
pub use crate::error::{Error, Result};
pub use crate::spatial_grid::{GridExport, SpatialGrid};
pub use crate::stationary::StationaryIndex;
pub use crate::tile::{Tile, TileCatalog, TileConfig, TileGroup, TileRecord};
pub use crate::tilemap::{TileStore, FLOOD_FILL_CAP};
pub use crate::autotile::AutotileConfig;
pub use crate::physics::{Motion, PhysicsBody, Resolver};
pub use crate::activity::EntityActivityIndex;
pub use crate::groups::{EntityGroups, EntityId};
pub use crate::particles::{Behavior, Particle};
pub use crate::persist::TileMapFile;
