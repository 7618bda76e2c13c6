use glam::Vec2;

use std::collections::BTreeMap;

use crate::tile::Tile;
use crate::tilemap::TileStore;
use crate::types::*;

/// One-bit coverage bitmap, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageMask {
    width: u32,
    height: u32,
    bits: Vec<u64>,
}

impl CoverageMask {
    pub fn new(width: u32, height: u32) -> Self {
        let words = (width as usize * height as usize).div_ceil(64);
        Self { width, height, bits: vec![0; words] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let i = self.index(x, y);
        self.bits[i / 64] & (1 << (i % 64)) != 0
    }

    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        if on {
            self.bits[i / 64] |= 1 << (i % 64);
        } else {
            self.bits[i / 64] &= !(1 << (i % 64));
        }
    }

    /// Set every pixel of `rect` (in mask space), clipped to the mask.
    pub fn fill_rect(&mut self, rect: Rect) {
        let x0 = rect.left().floor().max(0.0) as u32;
        let y0 = rect.top().floor().max(0.0) as u32;
        let x1 = (rect.right().ceil().max(0.0) as u32).min(self.width);
        let y1 = (rect.bottom().ceil().max(0.0) as u32).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                self.set(x, y, true);
            }
        }
    }

    /// Bitwise OR of another mask of the same size.
    pub fn draw(&mut self, other: &CoverageMask) {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= *b;
        }
    }

    pub fn invert(&mut self) {
        for w in &mut self.bits {
            *w = !*w;
        }
        // keep the padding bits of the last word clear
        let used = self.width as usize * self.height as usize;
        if used % 64 != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= (1u64 << (used % 64)) - 1;
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    /// Number of pixels set in both masks.
    pub fn overlap_area(&self, other: &CoverageMask) -> u32 {
        self.bits.iter().zip(&other.bits).map(|(a, b)| (a & b).count_ones()).sum()
    }
}

fn sprite_rect(tile: &Tile, origin: Vec2) -> Rect {
    Rect::from_pos_size(tile.raw_pos + tile.offset - origin, tile.sprite_size)
}

impl TileStore {
    /// Coverage of every grid tile touching `rect`, one mask per layer.
    ///
    /// Sprites are treated as fully opaque over their sprite rectangle; alpha
    /// lives with the asset loader.
    pub fn area_rasterize(&self, rect: Rect) -> BTreeMap<i32, CoverageMask> {
        let (w, h) = (rect.size.x.max(0.0) as u32, rect.size.y.max(0.0) as u32);
        let mut masks: BTreeMap<i32, CoverageMask> = BTreeMap::new();
        for pos in self.rect_grid_locs(rect).iter() {
            if let Some(layers) = self.grid_tile(pos) {
                for (layer, tile) in layers {
                    masks
                        .entry(*layer)
                        .or_insert_with(|| CoverageMask::new(w, h))
                        .fill_rect(sprite_rect(tile, rect.pos));
                }
            }
        }
        masks
    }

    /// Delete grid tiles on `layer` inside `rect` that are completely covered by
    /// the union of all higher layers. Returns the number of tiles removed.
    pub fn optimize_area(&mut self, rect: Rect, layer: i32) -> usize {
        let masks = self.area_rasterize(rect);
        if !masks.contains_key(&layer) {
            return 0;
        }
        let mut above = masks.range(layer + 1..).map(|(_, m)| m);
        let Some(first) = above.next() else {
            return 0;
        };
        let mut open = first.clone();
        for m in above {
            open.draw(m);
        }
        open.invert();

        let (w, h) = (open.width(), open.height());
        let local = Rect::new(0.0, 0.0, w as f32, h as f32);
        let hidden: Vec<CellKey> = self
            .rect_grid_locs(rect)
            .iter()
            .filter(|pos| {
                self.tile_at(*pos, layer).is_some_and(|tile| {
                    // sprites reaching past `rect` are only partly rasterized
                    let sprite = sprite_rect(tile, rect.pos);
                    if !local.contains_rect(&sprite) {
                        return false;
                    }
                    let mut own = CoverageMask::new(w, h);
                    own.fill_rect(sprite);
                    own.count() > 0 && own.overlap_area(&open) == 0
                })
            })
            .collect();
        for pos in &hidden {
            self.grid_delete(*pos, Some(layer));
        }
        hidden.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tilemap::tests::{store, tile};

    #[test]
    fn test_mask_ops() {
        let mut a = CoverageMask::new(10, 7);
        a.fill_rect(Rect::new(2.0, 2.0, 3.0, 3.0));
        assert_eq!(a.count(), 9);
        let mut b = CoverageMask::new(10, 7);
        b.fill_rect(Rect::new(4.0, 4.0, 10.0, 10.0));
        assert_eq!(a.overlap_area(&b), 1);
        b.draw(&a);
        assert_eq!(b.count(), 9 + 18 - 1);
        b.invert();
        assert_eq!(b.count(), 70 - 26);
    }

    #[test]
    fn test_rasterize_splits_layers() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "stone", (1, 0), 1), true);
        let masks = s.area_rasterize(Rect::new(0.0, 0.0, 32.0, 16.0));
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[&0].count(), 256);
        assert!(masks[&1].get(20, 3));
        assert!(!masks[&1].get(3, 3));
    }

    #[test]
    fn test_optimize_removes_only_fully_hidden_tiles() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (0, 0), 0), true);
        s.insert(tile(&s, "stone", (1, 0), 0), true);
        s.insert(tile(&s, "stone", (0, 0), 1), true);
        let removed = s.optimize_area(Rect::new(0.0, 0.0, 32.0, 16.0), 0);
        assert_eq!(removed, 1);
        assert!(s.tile_at((0, 0), 0).is_none());
        assert!(s.tile_at((1, 0), 0).is_some());
        // nothing above layer 1
        assert_eq!(s.optimize_area(Rect::new(0.0, 0.0, 32.0, 16.0), 1), 0);
    }

    #[test]
    fn test_optimize_keeps_tiles_past_the_area_edge() {
        let mut s = store(4, 4);
        for x in 0..3 {
            s.insert(tile(&s, "stone", (x, 0), 0), true);
        }
        s.insert(tile(&s, "stone", (0, 0), 1), true);
        // (2,0) spans pixels 32..48, just right of the area, with nothing above it
        assert_eq!(s.optimize_area(Rect::new(0.0, 0.0, 32.0, 16.0), 0), 1);
        assert!(s.tile_at((0, 0), 0).is_none());
        assert!(s.tile_at((1, 0), 0).is_some());
        assert!(s.tile_at((2, 0), 0).is_some());
    }

    #[test]
    fn test_optimize_keeps_tiles_straddling_the_area() {
        let mut s = store(4, 4);
        s.insert(tile(&s, "stone", (1, 1), 0), true);
        s.insert(tile(&s, "stone", (1, 1), 1), true);
        // the area only covers the top-left quarter of both tiles
        assert_eq!(s.optimize_area(Rect::new(0.0, 0.0, 24.0, 24.0), 0), 0);
        assert!(s.tile_at((1, 1), 0).is_some());
        assert_eq!(s.optimize_area(Rect::new(0.0, 0.0, 64.0, 64.0), 0), 1);
    }
}
