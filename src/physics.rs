use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::api::{ColliderSource, ResolverApi};
use crate::types::*;

/// Move `v` toward `target` by `amount`, snapping once within range.
pub fn approach(v: f32, amount: f32, target: f32) -> f32 {
    if v > target + amount {
        v - amount
    } else if v < target - amount {
        v + amount
    } else {
        target
    }
}

/// Velocity state shared by physics bodies and particles.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Motion {
    pub velocity: Vec2,
    pub acceleration: Vec2,
    /// Per-axis absolute speed limit.
    pub velocity_caps: Vec2,
    /// Per-axis deceleration toward zero, in units per second.
    pub normalization: Vec2,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            velocity: Vec2::ZERO,
            acceleration: Vec2::ZERO,
            velocity_caps: Vec2::splat(99_999.0),
            normalization: Vec2::ZERO,
        }
    }
}

impl Motion {
    /// Acceleration, then normalization toward zero, then the caps.
    pub fn integrate(&mut self, dt: f32) {
        self.velocity += self.acceleration * dt;
        let n = self.normalization * dt;
        self.velocity = Vec2::new(
            approach(self.velocity.x, n.x, 0.0),
            approach(self.velocity.y, n.y, 0.0),
        );
        self.velocity = self.velocity.clamp(-self.velocity_caps, self.velocity_caps);
    }
}

/// Axis-aligned body moved through tile and static collider sources.
#[derive(Clone, Debug, Default)]
pub struct PhysicsBody {
    pub pos: Vec2,
    pub size: Vec2,
    pub motion: Motion,
    /// Fraction of velocity reflected on impact, per axis.
    pub bounce: Vec2,
    /// Displacement accumulated for the next update (forces add to it).
    pub next_movement: Vec2,
    /// Displacement of the last update divided by its dt.
    pub last_movement: Vec2,
    pub last_pos: Vec2,
    /// Sides touched during the most recent axis resolution.
    pub collisions: Sides,
    /// Every candidate overlapped during the last move.
    pub last_collisions: Vec<PhysicsTile>,
    /// Seconds left during which dropthrough platforms are ignored.
    pub dropthrough: f32,
    /// Sign convention for `flip_x`: positive faces right on rightward movement.
    pub autoflip: f32,
    pub flip_x: bool,
}

impl PhysicsBody {
    pub fn new(pos: Vec2, size: Vec2) -> Self {
        Self { pos, size, last_pos: pos, ..Self::default() }
    }

    pub fn rect(&self) -> Rect {
        Rect::from_pos_size(self.pos, self.size)
    }

    pub fn center(&self) -> Vec2 {
        self.rect().center()
    }

    fn candidates(&self, sources: &[&dyn ColliderSource]) -> Vec<PhysicsTile> {
        let probe = self.rect();
        sources.iter().flat_map(|s| s.colliders_near(probe)).collect()
    }

    /// Move by `movement`, x first then y, each axis against a fresh candidate set.
    pub fn physics_move(&mut self, movement: Vec2, sources: &[&dyn ColliderSource]) {
        self.last_collisions.clear();
        self.last_pos = self.pos;

        self.pos.x += movement.x;
        let tiles = self.candidates(sources);
        Resolver::resolve_axis(self, Vec2::new(movement.x, 0.0), &tiles);

        self.pos.y += movement.y;
        let tiles = self.candidates(sources);
        Resolver::resolve_axis(self, Vec2::new(0.0, movement.y), &tiles);
    }

    /// One simulation step.
    pub fn physics_update(&mut self, dt: f32, sources: &[&dyn ColliderSource]) {
        if self.next_movement.x * -self.autoflip > 0.0 {
            self.flip_x = true;
        }
        if self.next_movement.x * self.autoflip > 0.0 {
            self.flip_x = false;
        }

        self.next_movement += self.motion.velocity * dt;
        let movement = self.next_movement;
        self.physics_move(movement, sources);
        self.last_movement = if dt > 0.0 { movement / dt } else { Vec2::ZERO };

        self.motion.integrate(dt);
        self.next_movement = Vec2::ZERO;
        self.dropthrough = (self.dropthrough - dt).max(0.0);
    }

    /// Queue a displacement of `force * dt` for the next update.
    pub fn apply_force(&mut self, force: Vec2, dt: f32) {
        self.next_movement += force * dt;
    }
}

/// Collision response against solid, ramp and dropthrough tiles.
pub struct Resolver;

impl ResolverApi for Resolver {
    fn resolve_axis(body: &mut PhysicsBody, movement: Vec2, candidates: &[PhysicsTile]) {
        body.collisions = Sides::default();
        let mut rect = body.rect();
        for tile in candidates {
            if !rect.overlaps(&tile.rect) {
                continue;
            }
            let t = tile.rect;
            match tile.kind {
                PhysicsType::Solid => {
                    if movement.x > 0.0 {
                        rect.set_right(t.left());
                        body.motion.velocity.x *= -body.bounce.x;
                        body.collisions.right = true;
                    }
                    if movement.x < 0.0 {
                        rect.set_left(t.right());
                        body.motion.velocity.x *= -body.bounce.x;
                        body.collisions.left = true;
                    }
                    if movement.y > 0.0 {
                        rect.set_bottom(t.top());
                        body.motion.velocity.y *= -body.bounce.y;
                        body.collisions.down = true;
                    }
                    if movement.y < 0.0 {
                        rect.set_top(t.bottom());
                        body.motion.velocity.y *= -body.bounce.y;
                        body.collisions.up = true;
                    }
                }
                PhysicsType::RampRight | PhysicsType::RampLeft => {
                    let rising_right = tile.kind == PhysicsType::RampRight;
                    let toward_open =
                        if rising_right { movement.x > 0.0 } else { movement.x < 0.0 };
                    if movement.y > 0.0 || toward_open {
                        // surface height at the body's leading bottom corner
                        let (check_x, depth) = if rising_right {
                            let c = (rect.right() - t.left()) / t.size.x;
                            (c, 1.0 - c)
                        } else {
                            let c = (rect.left() - t.left()) / t.size.x;
                            (c, c)
                        };
                        let surface = depth * t.size.y + t.top();
                        if (0.0..=1.0).contains(&check_x) && rect.bottom() > surface {
                            rect.set_bottom(surface);
                            body.motion.velocity.y *= -body.bounce.y;
                            body.collisions.down = true;
                        }
                    }
                }
                PhysicsType::Dropthrough => {
                    if body.dropthrough <= 0.0
                        && movement.y > 0.0
                        && rect.bottom() > t.top()
                        && rect.bottom() - movement.y <= t.top() + 1.0
                    {
                        rect.set_bottom(t.top());
                        body.motion.velocity.y *= -body.bounce.y;
                        body.collisions.down = true;
                    }
                }
            }
            body.pos = rect.pos;
            rect = body.rect();
            body.last_collisions.push(*tile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SpatialIndex;
    use crate::stationary::StationaryIndex;
    use crate::tilemap::tests::store;
    use crate::tilemap::TileStore;
    use crate::tile::Tile;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn with(kind_group: &str, id: TileId, pos: (i32, i32)) -> TileStore {
        let mut s = store(8, 8);
        let at = Vec2::new(pos.0 as f32, pos.1 as f32);
        let t = Tile::new(s.catalog(), kind_group, id, at, 0, "").unwrap();
        s.insert(t, true);
        s
    }

    #[test]
    fn test_falling_body_rests_flush_on_solid() {
        let s = with("stone", TileId(0, 0), (1, 2));
        let mut b = PhysicsBody::new(Vec2::new(20.0, 20.0), Vec2::splat(8.0));
        b.motion.velocity = Vec2::new(0.0, 100.0);
        b.physics_update(0.1, &[&s]);
        assert_eq!(b.rect().bottom(), 32.0);
        assert!(b.collisions.down);
        assert_eq!(b.motion.velocity.y, 0.0);
        assert_eq!(b.last_collisions.len(), 1);
        assert!(approx(b.last_movement.y, 100.0));
    }

    #[test]
    fn test_solid_sets_horizontal_side_flags() {
        let mut b = PhysicsBody::new(Vec2::new(12.0, 0.0), Vec2::splat(8.0));
        let wall =
            [PhysicsTile { rect: Rect::new(16.0, 0.0, 16.0, 16.0), kind: PhysicsType::Solid }];
        Resolver::resolve_axis(&mut b, Vec2::new(4.0, 0.0), &wall);
        assert!(b.collisions.right && !b.collisions.left);
        assert_eq!(b.pos.x, 8.0);

        let mut b = PhysicsBody::new(Vec2::new(30.0, 0.0), Vec2::splat(8.0));
        Resolver::resolve_axis(&mut b, Vec2::new(-4.0, 0.0), &wall);
        assert!(b.collisions.left);
        assert_eq!(b.pos.x, 32.0);
    }

    #[test]
    fn test_dropthrough_passes_from_below_and_catches_from_above() {
        let s = with("plat", TileId(0, 0), (1, 2));

        let mut below = PhysicsBody::new(Vec2::new(20.0, 50.0), Vec2::splat(8.0));
        below.physics_move(Vec2::new(0.0, -10.0), &[&s]);
        assert_eq!(below.pos.y, 40.0);
        assert!(!below.collisions.up);

        let mut above = PhysicsBody::new(Vec2::new(20.0, 20.0), Vec2::splat(8.0));
        above.physics_move(Vec2::new(0.0, 5.0), &[&s]);
        assert_eq!(above.rect().bottom(), 32.0);
        assert!(above.collisions.down);

        // started more than a pixel inside the platform
        let mut inside = PhysicsBody::new(Vec2::new(20.0, 26.0), Vec2::splat(8.0));
        inside.physics_move(Vec2::new(0.0, 2.0), &[&s]);
        assert_eq!(inside.pos.y, 28.0);

        let mut dropping = PhysicsBody::new(Vec2::new(20.0, 20.0), Vec2::splat(8.0));
        dropping.dropthrough = 0.5;
        dropping.physics_move(Vec2::new(0.0, 5.0), &[&s]);
        assert_eq!(dropping.pos.y, 25.0);
        assert!(!dropping.collisions.down);
    }

    #[test]
    fn test_ramps_snap_to_surface() {
        let right = with("plat", TileId(1, 0), (1, 2));
        let mut b = PhysicsBody::new(Vec2::new(16.0, 30.0), Vec2::splat(8.0));
        b.physics_move(Vec2::new(0.0, 10.0), &[&right]);
        // right edge halfway across: surface at 40
        assert_eq!(b.rect().bottom(), 40.0);
        assert!(b.collisions.down);

        let left = with("plat", TileId(2, 0), (1, 2));
        let mut b = PhysicsBody::new(Vec2::new(20.0, 30.0), Vec2::splat(8.0));
        b.physics_move(Vec2::new(0.0, 10.0), &[&left]);
        assert_eq!(b.rect().bottom(), 36.0);
    }

    #[test]
    fn test_dropthrough_tolerance_is_one_pixel() {
        let s = with("plat", TileId(0, 0), (1, 2));

        // bottom starts exactly one pixel below the top at 32
        let mut edge = PhysicsBody::new(Vec2::new(20.0, 25.0), Vec2::splat(8.0));
        edge.physics_move(Vec2::new(0.0, 2.0), &[&s]);
        assert_eq!(edge.rect().bottom(), 32.0);
        assert!(edge.collisions.down);

        let mut past = PhysicsBody::new(Vec2::new(20.0, 25.01), Vec2::splat(8.0));
        past.physics_move(Vec2::new(0.0, 2.0), &[&s]);
        assert!(approx(past.pos.y, 27.01));
        assert!(!past.collisions.down);
    }

    #[test]
    fn test_ramps_catch_horizontal_moves_toward_the_open_side() {
        let ramp = [PhysicsTile {
            rect: Rect::new(16.0, 32.0, 16.0, 16.0),
            kind: PhysicsType::RampRight,
        }];

        // walked right from x=4; right edge a quarter across, surface at 44
        let mut uphill = PhysicsBody::new(Vec2::new(12.0, 38.0), Vec2::splat(8.0));
        Resolver::resolve_axis(&mut uphill, Vec2::new(8.0, 0.0), &ramp);
        assert_eq!(uphill.rect().bottom(), 44.0);
        assert!(uphill.collisions.down);

        // walked left from x=36 into the high side
        let mut back = PhysicsBody::new(Vec2::new(28.0, 38.0), Vec2::splat(8.0));
        Resolver::resolve_axis(&mut back, Vec2::new(-8.0, 0.0), &ramp);
        assert_eq!(back.pos.y, 38.0);
        assert!(!back.collisions.down);
    }

    #[test]
    fn test_bounce_reflects_velocity() {
        let s = with("stone", TileId(0, 0), (1, 2));
        let mut b = PhysicsBody::new(Vec2::new(20.0, 20.0), Vec2::splat(8.0));
        b.bounce = Vec2::new(0.0, 0.5);
        b.motion.velocity = Vec2::new(0.0, 100.0);
        b.physics_update(0.1, &[&s]);
        assert!(approx(b.motion.velocity.y, -50.0));
    }

    #[test]
    fn test_dropthrough_timer_counts_down_to_zero() {
        let mut b = PhysicsBody::new(Vec2::ZERO, Vec2::splat(4.0));
        b.dropthrough = 0.25;
        b.physics_update(0.1, &[]);
        assert!(approx(b.dropthrough, 0.15));
        for _ in 0..3 {
            b.physics_update(0.1, &[]);
        }
        assert_eq!(b.dropthrough, 0.0);
    }

    #[test]
    fn test_motion_normalizes_then_caps() {
        let mut m = Motion {
            velocity: Vec2::new(10.0, -10.0),
            normalization: Vec2::splat(50.0),
            ..Motion::default()
        };
        m.integrate(0.1);
        assert_eq!(m.velocity, Vec2::new(5.0, -5.0));
        m.integrate(0.1);
        assert_eq!(m.velocity, Vec2::ZERO);

        let mut m = Motion {
            velocity: Vec2::new(1000.0, 0.0),
            velocity_caps: Vec2::splat(200.0),
            ..Motion::default()
        };
        m.integrate(0.1);
        assert_eq!(m.velocity.x, 200.0);
    }

    #[test]
    fn test_forces_accumulate_into_next_move() {
        let mut b = PhysicsBody::new(Vec2::ZERO, Vec2::splat(4.0));
        b.autoflip = 1.0;
        b.apply_force(Vec2::new(-20.0, 0.0), 0.5);
        assert_eq!(b.next_movement, Vec2::new(-10.0, 0.0));
        b.physics_update(0.5, &[]);
        assert!(b.flip_x);
        assert_eq!(b.pos, Vec2::new(-10.0, 0.0));
        assert_eq!(b.last_pos, Vec2::ZERO);
        assert_eq!(b.next_movement, Vec2::ZERO);
    }

    #[test]
    fn test_static_colliders_block_like_tiles() {
        let mut props = StationaryIndex::new(32.0);
        props.insert_rect(PhysicsType::Solid, Rect::new(40.0, 0.0, 16.0, 64.0));
        let mut b = PhysicsBody::new(Vec2::new(30.0, 10.0), Vec2::splat(8.0));
        b.physics_move(Vec2::new(10.0, 0.0), &[&props]);
        assert_eq!(b.pos.x, 32.0);
        assert_eq!(b.last_collisions.len(), 1);
    }
}
