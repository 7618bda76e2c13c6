use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::api::{Located, RenderSink, SpriteRef};
use crate::physics::Motion;
use crate::tilemap::TileStore;
use crate::types::*;

/// Closed set of particle behaviors.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Behavior {
    Idle,
    /// Falls under `gravity` with a vertical speed cap and horizontal drag.
    Gravity { gravity: f32, max_fall: f32, drag: f32 },
    /// Drifts sideways on a sine wave; `phase` desynchronizes particles.
    Sway { phase: f32, amplitude: f32 },
}

impl Behavior {
    /// Applied once when the particle is created.
    pub fn init(&self, motion: &mut Motion) {
        if let Behavior::Gravity { gravity, max_fall, drag } = *self {
            motion.acceleration.y = gravity;
            motion.velocity_caps.y = max_fall;
            motion.normalization.x = drag;
        }
    }

    /// Applied every update before integration.
    pub fn step(&self, pos: &mut Vec2, clock: f32, dt: f32) {
        if let Behavior::Sway { phase, amplitude } = *self {
            pos.x += (clock * 2.0 + phase).sin() * dt * amplitude;
        }
    }
}

/// Short-lived point sprite.
///
/// `age` advances by `dt * decay_rate`; the particle is finished once it
/// reaches `lifetime`. With `collide` set, the particle bounces off solid grid
/// tiles, testing only the point itself.
#[derive(Clone, Debug)]
pub struct Particle {
    pub kind: String,
    pub pos: Vec2,
    pub motion: Motion,
    pub behavior: Behavior,
    pub next_movement: Vec2,
    pub bounce: f32,
    pub decay_rate: f32,
    pub lifetime: f32,
    pub age: f32,
    pub collide: bool,
    pub z: i32,
    clock: f32,
}

impl Particle {
    pub fn new(kind: &str, pos: Vec2, velocity: Vec2, lifetime: f32, behavior: Behavior) -> Self {
        let mut motion = Motion { velocity, ..Motion::default() };
        behavior.init(&mut motion);
        Self {
            kind: kind.to_string(),
            pos,
            motion,
            behavior,
            next_movement: Vec2::ZERO,
            bounce: 0.5,
            decay_rate: 1.0,
            lifetime,
            age: 0.0,
            collide: false,
            z: 0,
            clock: 0.0,
        }
    }

    /// Start part of the way through the lifetime.
    pub fn advanced(mut self, seconds: f32) -> Self {
        self.age += seconds;
        self
    }

    pub fn with_decay(mut self, rate: f32) -> Self {
        self.decay_rate = rate;
        self
    }

    pub fn colliding(mut self) -> Self {
        self.collide = true;
        self
    }

    pub fn finished(&self) -> bool {
        self.age >= self.lifetime
    }

    /// Index into an animation of `frames` frames, clamped to the last one.
    pub fn frame(&self, frames: u32) -> u32 {
        if frames == 0 || self.lifetime <= 0.0 {
            return 0;
        }
        let f = (self.age / self.lifetime * frames as f32) as u32;
        f.min(frames - 1)
    }

    /// Advance one step. Returns true once the particle is finished.
    pub fn update(&mut self, dt: f32, tiles: Option<&TileStore>) -> bool {
        self.age += dt * self.decay_rate;
        self.clock += dt;
        self.behavior.step(&mut self.pos, self.clock, dt);

        self.next_movement += self.motion.velocity * dt;
        let movement = self.next_movement;

        self.pos.x += movement.x;
        if let Some(rect) = self.solid_at(tiles) {
            self.motion.velocity.x *= -self.bounce;
            if movement.x > 0.0 {
                self.pos.x = rect.left();
            }
            if movement.x < 0.0 {
                self.pos.x = rect.right();
            }
        }
        self.pos.y += movement.y;
        if let Some(rect) = self.solid_at(tiles) {
            self.motion.velocity.y *= -self.bounce;
            if movement.y > 0.0 {
                self.pos.y = rect.top();
            }
            if movement.y < 0.0 {
                self.pos.y = rect.bottom();
            }
        }

        self.motion.integrate(dt);
        self.next_movement = Vec2::ZERO;
        self.finished()
    }

    fn solid_at(&self, tiles: Option<&TileStore>) -> Option<Rect> {
        if !self.collide {
            return None;
        }
        tiles?
            .physics_tile_at_world(self.pos)
            .filter(|t| t.physics_type == Some(PhysicsType::Solid))
            .map(|t| t.rect)
    }

    /// Blit the current frame at the particle position; `frames` is the length
    /// of the particle's animation strip.
    pub fn render(&self, frames: u32, offset: Vec2, group: &str, sink: &mut dyn RenderSink) {
        let sprite = SpriteRef { group: &self.kind, tile_id: TileId(self.frame(frames) as i32, 0) };
        sink.blit(sprite, self.pos - offset, self.z, group);
    }
}

impl Located for Particle {
    fn position(&self) -> Vec2 {
        self.pos
    }
}
