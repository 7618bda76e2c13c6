use glam::Vec2;

use crate::physics::PhysicsBody;
use crate::types::*;

/// Common contract of the bucketed indexes ([`crate::SpatialGrid`], [`crate::StationaryIndex`]).
pub trait SpatialIndex<T> {
    /// Insert `value` into every cell `rect` touches and return its handle.
    fn insert_rect(&mut self, value: T, rect: Rect) -> Handle;

    /// Remove an object. Unknown or already deleted handles are a no-op.
    fn delete(&mut self, handle: Handle) -> Option<T>;

    /// Distinct handles stored in any cell the query rect touches.
    fn query(&self, rect: Rect) -> Vec<Handle>;

    fn get(&self, handle: Handle) -> Option<&T>;

    /// Number of live objects.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything the resolver can collide an entity against.
pub trait ColliderSource {
    /// Collision candidates for an entity currently occupying `probe`.
    fn colliders_near(&self, probe: Rect) -> Vec<PhysicsTile>;
}

/// Axis-separated collision response.
pub trait ResolverApi {
    /// Resolve one axis of already-applied movement against `candidates`,
    /// mutating the body's position, velocity and side flags.
    fn resolve_axis(body: &mut PhysicsBody, movement: Vec2, candidates: &[PhysicsTile]);
}

/// Sprite reference passed to a renderer: which group sheet and which cell of it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpriteRef<'a> {
    pub group: &'a str,
    pub tile_id: TileId,
}

/// Renderer-facing side of the tile render functions.
pub trait RenderSink {
    fn blit(&mut self, sprite: SpriteRef<'_>, pos: Vec2, z: i32, group: &str);
}

/// Recorded blit; `Vec<Blit>` is the collecting sink used by `render_prep`.
#[derive(Clone, Debug, PartialEq)]
pub struct Blit {
    pub group: String,
    pub tile_id: TileId,
    pub pos: Vec2,
    pub z: i32,
    pub render_group: String,
}

impl RenderSink for Vec<Blit> {
    fn blit(&mut self, sprite: SpriteRef<'_>, pos: Vec2, z: i32, group: &str) {
        self.push(Blit {
            group: sprite.group.to_string(),
            tile_id: sprite.tile_id,
            pos,
            z,
            render_group: group.to_string(),
        });
    }
}

/// Entities tracked by the activity index expose their current position.
pub trait Located {
    fn position(&self) -> Vec2;
}
