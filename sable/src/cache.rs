// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Content-addressed caches with LRU eviction.
//!
//! Five caches share one generic shape: a hash map from key to a
//! reference-counted value plus an access epoch. Eviction pops entries in
//! epoch order until the cache fits its size budget; values still
//! referenced elsewhere (border outlines referencing their source, bitmap
//! keys referencing outlines, composites referencing bitmaps, emitted
//! images referencing composites) simply stay alive through their `Rc`
//! until the last holder drops.
//!
//! Keys that embed another cache's value use pointer identity ([`RefKey`]),
//! so two lookups hit the same entry exactly when they refer to the same
//! shared value.

use crate::bitmap::Bitmap;
use crate::font::FontEntry;
use crate::outline::Outline;
use hashbrown::HashMap;
use sable_primitives::{Rect, Vec2};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

type HashState = foldhash::fast::FixedState;

/// A shared cache value used as (part of) another cache's key, compared
/// and hashed by pointer identity.
#[derive(Debug)]
pub(crate) struct RefKey<T>(pub Rc<T>);

impl<T> Clone for RefKey<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> PartialEq for RefKey<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for RefKey<T> {}

impl<T> Hash for RefKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// An `f64` made hashable through its bit pattern. Values that reach keys
/// have already been quantized by the caller.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct FloatKey(u64);

impl From<f64> for FloatKey {
    fn from(v: f64) -> Self {
        Self(v.to_bits())
    }
}

impl FloatKey {
    pub(crate) fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

struct Entry<V> {
    value: Rc<V>,
    epoch: u64,
    size: usize,
}

/// One cache level: `get` moves hits to the LRU tail and constructs
/// missing values in place; `cut` evicts from the LRU head.
pub(crate) struct Cache<K, V> {
    map: HashMap<K, Entry<V>, HashState>,
    epoch: u64,
    size: usize,
    hits: u64,
    misses: u64,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::default(),
            epoch: 0,
            size: 0,
            hits: 0,
            misses: 0,
        }
    }
}

impl<K: Eq + Hash, V> Cache<K, V> {
    /// Looks up `key`, constructing the value on a miss. The constructor
    /// returns the value and its size in bytes for eviction accounting.
    pub(crate) fn get(&mut self, key: K, construct: impl FnOnce(&K) -> (V, usize)) -> Rc<V> {
        self.epoch += 1;
        let epoch = self.epoch;
        match self.map.entry(key) {
            hashbrown::hash_map::Entry::Occupied(mut e) => {
                self.hits += 1;
                let entry = e.get_mut();
                entry.epoch = epoch;
                entry.value.clone()
            }
            hashbrown::hash_map::Entry::Vacant(e) => {
                self.misses += 1;
                let (value, size) = construct(e.key());
                self.size += size;
                let value = Rc::new(value);
                e.insert(Entry {
                    value: value.clone(),
                    epoch,
                    size,
                });
                value
            }
        }
    }

    /// Total size of all resident entries.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Evicts least-recently-used entries until the cache holds at most
    /// `max_size` bytes. Entries whose values are still referenced
    /// elsewhere lose their cache slot but stay alive until released.
    pub(crate) fn cut(&mut self, max_size: usize) {
        if self.size <= max_size {
            return;
        }
        let mut by_age: Vec<(u64, usize)> = self.map.values().map(|e| (e.epoch, e.size)).collect();
        by_age.sort_unstable();
        let mut excess = self.size - max_size;
        let mut cutoff = 0;
        for &(epoch, size) in &by_age {
            if excess == 0 {
                break;
            }
            cutoff = epoch;
            excess = excess.saturating_sub(size);
        }
        let mut freed = 0;
        self.map.retain(|_, e| {
            if e.epoch <= cutoff {
                freed += e.size;
                false
            } else {
                true
            }
        });
        self.size -= freed;
    }

    /// Same as [`Cache::cut`], but bounded by entry count instead of bytes.
    pub(crate) fn cut_entries(&mut self, max_entries: usize) {
        if self.map.len() <= max_entries {
            return;
        }
        let mut by_age: Vec<u64> = self.map.values().map(|e| e.epoch).collect();
        by_age.sort_unstable();
        let cutoff = by_age[self.map.len() - max_entries - 1];
        let mut freed = 0;
        self.map.retain(|_, e| {
            if e.epoch <= cutoff {
                freed += e.size;
                false
            } else {
                true
            }
        });
        self.size -= freed;
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.size = 0;
    }
}

// --- concrete key and value types ---

/// Decoration flags carried in glyph keys.
pub(crate) mod deco {
    pub(crate) const UNDERLINE: u32 = 1;
    pub(crate) const STRIKETHROUGH: u32 = 2;
    pub(crate) const ROTATE: u32 = 4;
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct GlyphKey {
    pub font: RefKey<FontEntry>,
    pub size: FloatKey,
    pub face_index: u32,
    pub glyph_index: u32,
    pub bold: u32,
    pub italic: u32,
    pub flags: u32,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct DrawingKey {
    /// The drawing command string; shared, compared by content.
    pub text: Rc<str>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct BorderKey {
    pub outline: RefKey<OutlineEntry>,
    /// Border half-widths in stroker units.
    pub border: Vec2,
    pub scale_ord_x: i32,
    pub scale_ord_y: i32,
}

/// Key for one outline-pair cache entry.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum OutlineKey {
    Glyph(GlyphKey),
    Drawing(DrawingKey),
    Border(BorderKey),
    /// The unit box used by border style 3.
    OpaqueBox,
}

/// Cached outline pair (source + optional border companion) with layout
/// metrics.
#[derive(Default, Debug)]
pub(crate) struct OutlineEntry {
    pub valid: bool,
    pub outline: [Outline; 2],
    /// Bounding box of all control points of both outlines.
    pub cbox: Rect,
    /// 26.6 advance to the next outline in line.
    pub advance: i32,
    pub asc: i32,
    pub desc: i32,
}

impl OutlineEntry {
    pub(crate) fn heap_size(&self) -> usize {
        let per_point = core::mem::size_of::<Vec2>() + 2;
        core::mem::size_of::<Self>()
            + per_point * (self.outline[0].points().len() + self.outline[1].points().len())
    }
}

/// Quantized-transform key for one rendered bitmap.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct BitmapKey {
    pub outline: RefKey<OutlineEntry>,
    pub matrix_x: Vec2,
    pub matrix_y: Vec2,
    pub matrix_z: Vec2,
    /// Sub-pixel offset in the low `SUBPIXEL_ORDER` bits.
    pub offset: Vec2,
}

/// Filter parameters shared by one composite run.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Debug)]
pub(crate) struct FilterDesc {
    pub flags: u32,
    pub be: i32,
    /// Quantized blur index.
    pub blur: i32,
    /// Quantized 26.6 shadow offset.
    pub shadow: Vec2,
}

pub(crate) mod filter_flag {
    pub(crate) const BORDER_STYLE_3: u32 = 0x01;
    pub(crate) const NONZERO_BORDER: u32 = 0x02;
    pub(crate) const NONZERO_SHADOW: u32 = 0x04;
    pub(crate) const FILL_IN_SHADOW: u32 = 0x08;
    pub(crate) const FILL_IN_BORDER: u32 = 0x10;
}

/// One glyph's contribution to a composite: its fill and border bitmaps
/// and their positions relative to the composite origin.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct BitmapRef {
    pub bm: Option<RefKey<Bitmap>>,
    pub bm_o: Option<RefKey<Bitmap>>,
    pub pos: Vec2,
    pub pos_o: Vec2,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct CompositeKey {
    pub filter: FilterDesc,
    pub bitmaps: Vec<BitmapRef>,
}

/// Merged fill + border + shadow bitmaps for one same-filter glyph run.
#[derive(Default, Debug)]
pub(crate) struct CompositeEntry {
    pub bm: Option<Bitmap>,
    pub bm_o: Option<Bitmap>,
    pub bm_s: Option<Bitmap>,
}

impl CompositeEntry {
    pub(crate) fn heap_size(&self) -> usize {
        let bm = |b: &Option<Bitmap>| b.as_ref().map_or(0, Bitmap::size);
        core::mem::size_of::<Self>() + bm(&self.bm) + bm(&self.bm_o) + bm(&self.bm_s)
    }
}

/// Font cache key: family plus the style attributes that select a face.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct FontKey {
    pub family: Rc<str>,
    pub bold: u32,
    pub italic: u32,
    pub vertical: bool,
}

/// Glyph metrics cache key.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct MetricsKey {
    pub font: RefKey<FontEntry>,
    pub size: FloatKey,
    pub face_index: u32,
    pub glyph_index: u32,
}

/// Cached glyph metrics: 26.6 advance and vertical extents.
#[derive(Copy, Clone, Default, Debug)]
pub struct GlyphMetrics {
    pub advance: i32,
    pub asc: i32,
    pub desc: i32,
}

/// The renderer's cache hierarchy with its size budgets.
pub(crate) struct CacheSet {
    pub font: Cache<FontKey, FontEntry>,
    pub outline: Cache<OutlineKey, OutlineEntry>,
    pub metrics: Cache<MetricsKey, GlyphMetrics>,
    pub bitmap: Cache<BitmapKey, Bitmap>,
    pub composite: Cache<CompositeKey, CompositeEntry>,

    pub outline_max_entries: usize,
    pub bitmap_max_size: usize,
    pub composite_max_size: usize,
}

const MEGABYTE: usize = 1024 * 1024;

impl Default for CacheSet {
    fn default() -> Self {
        Self {
            font: Cache::default(),
            outline: Cache::default(),
            metrics: Cache::default(),
            bitmap: Cache::default(),
            composite: Cache::default(),
            outline_max_entries: 10_000,
            bitmap_max_size: 128 * MEGABYTE,
            composite_max_size: 64 * MEGABYTE,
        }
    }
}

impl CacheSet {
    /// Frame-start housekeeping: trim every cache to its budget.
    pub(crate) fn enforce_limits(&mut self) {
        self.composite.cut(self.composite_max_size);
        self.bitmap.cut(self.bitmap_max_size);
        self.outline.cut_entries(self.outline_max_entries);
    }

    /// Empties every cache; held values stay alive until released.
    pub(crate) fn clear_all(&mut self) {
        self.composite.clear();
        self.bitmap.clear();
        self.metrics.clear();
        self.outline.clear();
        self.font.clear();
    }
}

impl core::fmt::Debug for CacheSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheSet")
            .field("fonts", &self.font.len())
            .field("outlines", &self.outline.len())
            .field("metrics", &self.metrics.len())
            .field("bitmaps", &self.bitmap.len())
            .field("composites", &self.composite.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_constructs_once() {
        let mut cache: Cache<u32, String> = Cache::default();
        let v = cache.get(7, |k| (format!("v{k}"), 8));
        assert_eq!(*v, "v7");
        let v2 = cache.get(7, |_| panic!("must not construct on a hit"));
        assert_eq!(*v2, "v7");
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.size(), 8);
    }

    #[test]
    fn cut_evicts_in_lru_order() {
        let mut cache: Cache<u32, u32> = Cache::default();
        for k in 0..4 {
            cache.get(k, |&k| (k, 10));
        }
        // Touch 0 so 1 becomes the oldest.
        cache.get(0, |_| panic!("present"));
        cache.cut(25);
        assert!(cache.size() <= 25, "size {}", cache.size());
        // 0 and 3 must have survived.
        let mut constructed = false;
        cache.get(0, |_| {
            constructed = true;
            (0, 10)
        });
        assert!(!constructed, "entry 0 was evicted out of order");
        cache.get(1, |_| {
            constructed = true;
            (1, 10)
        });
        assert!(constructed, "entry 1 should have been evicted");
    }

    #[test]
    fn values_survive_eviction_while_referenced() {
        let mut cache: Cache<u32, Vec<u8>> = Cache::default();
        let held = cache.get(1, |_| (vec![42; 3], 100));
        cache.cut(0);
        assert_eq!(cache.len(), 0);
        // The evicted value is still usable through the retained handle.
        assert_eq!(held[0], 42);
        // A fresh lookup reconstructs rather than resurrecting.
        let fresh = cache.get(1, |_| (vec![7; 3], 100));
        assert_eq!(fresh[0], 7);
        assert_eq!(held[0], 42);
    }

    #[test]
    fn ref_key_uses_pointer_identity() {
        let a = Rc::new(5u32);
        let b = Rc::new(5u32);
        assert_ne!(RefKey(a.clone()), RefKey(b));
        assert_eq!(RefKey(a.clone()), RefKey(a));
    }

    #[test]
    fn cut_entries_bounds_count() {
        let mut cache: Cache<u32, u32> = Cache::default();
        for k in 0..100 {
            cache.get(k, |&k| (k, 1));
        }
        cache.cut_entries(10);
        assert_eq!(cache.len(), 10);
        let mut survivors = 0;
        for k in 90..100 {
            cache.get(k, |_| {
                survivors += 1;
                (0, 1)
            });
        }
        assert_eq!(survivors, 0, "newest entries must survive");
    }
}
