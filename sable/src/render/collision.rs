// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Inter-event collision handling.
//!
//! Within one layer, events that rendered in a previous frame keep their
//! position (they are "fixed"); the remaining events shift vertically into
//! free space. The fixed positions persist across frames keyed by event
//! index and invalidated by the renderer generation id.

use super::images::Image;
use hashbrown::HashMap;

/// One rendered event with its occupied rectangle.
#[derive(Debug)]
pub(crate) struct EventImages {
    pub images: Vec<Image>,
    pub top: i32,
    pub height: i32,
    pub left: i32,
    pub width: i32,
    pub detect_collisions: bool,
    /// +1 shifts down (top-anchored events), -1 shifts up (subtitles).
    pub shift_direction: i32,
    pub layer: i32,
    pub read_order: i32,
    pub event_index: usize,
}

/// Fixed placement remembered across frames.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct CollisionSlot {
    pub render_id: u64,
    pub top: i32,
    pub height: i32,
    pub left: i32,
    pub width: i32,
}

pub(crate) type CollisionMap = HashMap<usize, CollisionSlot>;

#[derive(Copy, Clone, Debug)]
struct FixedRect {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

fn overlap(a: &FixedRect, b: &FixedRect) -> bool {
    !(a.y0 >= b.y1 || b.y0 >= a.y1 || a.x0 >= b.x1 || b.x0 >= a.x1)
}

/// Shifts every image of an event vertically, clipping rows that leave
/// the frame.
pub(crate) fn shift_event(ei: &mut EventImages, shift: i32, frame_height: i32) {
    for img in &mut ei.images {
        img.dst_y += shift;
        if img.dst_y < 0 {
            let clip = (-img.dst_y) as usize;
            let clip = clip.min(img.h);
            img.h -= clip;
            img.offset += clip * img.stride;
            img.dst_y = 0;
        }
        if img.dst_y + img.h as i32 >= frame_height {
            let clip = img.dst_y + img.h as i32 - frame_height;
            img.h = img.h.saturating_sub(clip.max(0) as usize);
        }
        if img.h == 0 {
            img.dst_y = 0;
        }
    }
    ei.top += shift;
}

/// Finds a vertical shift that moves `s` clear of all fixed rectangles,
/// scanning down or up depending on `dir`, then registers the result.
fn fit_rect(s: &FixedRect, fixed: &mut Vec<FixedRect>, dir: i32) -> i32 {
    let mut shift = 0;
    if dir == 1 {
        for f in fixed.iter() {
            if s.y1 + shift <= f.y0 || s.y0 + shift >= f.y1 || s.x1 <= f.x0 || s.x0 >= f.x1 {
                continue;
            }
            shift = f.y1 - s.y0;
        }
    } else {
        for f in fixed.iter().rev() {
            if s.y1 + shift <= f.y0 || s.y0 + shift >= f.y1 || s.x1 <= f.x0 || s.x0 >= f.x1 {
                continue;
            }
            shift = f.y0 - s.y1;
        }
    }
    fixed.push(FixedRect {
        x0: s.x0,
        y0: s.y0 + shift,
        x1: s.x1,
        y1: s.y1 + shift,
    });
    fixed.sort_by_key(|r| r.y0);
    shift
}

/// Resolves collisions among one layer's events.
pub(crate) fn fix_collisions(
    imgs: &mut [EventImages],
    collision_map: &mut CollisionMap,
    render_id: u64,
    frame_height: i32,
) {
    let mut used: Vec<FixedRect> = Vec::with_capacity(imgs.len());

    // First pass: collect events that were already placed in an earlier
    // frame and still fit.
    for i in 0..imgs.len() {
        // Zero-area events cannot collide and are effectively fixed.
        if !imgs[i].detect_collisions || imgs[i].height == 0 || imgs[i].width == 0 {
            continue;
        }
        let key = imgs[i].event_index;
        let slot = collision_map.entry(key).or_default();
        if slot.render_id != render_id {
            *slot = CollisionSlot {
                render_id,
                ..CollisionSlot::default()
            };
        }
        if slot.height > 0 {
            let s = FixedRect {
                x0: slot.left,
                y0: slot.top,
                x1: slot.left + slot.width,
                y1: slot.top + slot.height,
            };
            let mut still_fixed = slot.height == imgs[i].height;
            if !still_fixed {
                log::debug!("event height has changed");
            }
            if still_fixed {
                for f in &used {
                    if overlap(&s, f) {
                        still_fixed = false;
                        break;
                    }
                }
            }
            if still_fixed {
                used.push(s);
                let shift = slot.top - imgs[i].top;
                shift_event(&mut imgs[i], shift, frame_height);
            } else {
                *slot = CollisionSlot {
                    render_id,
                    ..CollisionSlot::default()
                };
            }
        }
    }
    used.sort_by_key(|r| r.y0);

    // Second pass: fit the remaining events into free space and fix them.
    for ei in imgs.iter_mut() {
        if !ei.detect_collisions || ei.height == 0 || ei.width == 0 {
            continue;
        }
        let slot = collision_map.entry(ei.event_index).or_default();
        if slot.render_id == render_id && slot.height > 0 {
            continue; // already fixed above
        }
        let s = FixedRect {
            x0: ei.left,
            y0: ei.top,
            x1: ei.left + ei.width,
            y1: ei.top + ei.height,
        };
        let shift = fit_rect(&s, &mut used, ei.shift_direction);
        if shift != 0 {
            shift_event(ei, shift, frame_height);
        }
        *collision_map.get_mut(&ei.event_index).expect("slot exists") = CollisionSlot {
            render_id,
            top: ei.top,
            height: ei.height,
            left: ei.left,
            width: ei.width,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(index: usize, top: i32, height: i32) -> EventImages {
        EventImages {
            images: Vec::new(),
            top,
            height,
            left: 100,
            width: 200,
            detect_collisions: true,
            shift_direction: -1,
            layer: 0,
            read_order: index as i32,
            event_index: index,
        }
    }

    #[test]
    fn overlapping_events_separate() {
        let mut map = CollisionMap::default();
        let mut imgs = vec![ev(0, 100, 50), ev(1, 120, 50)];
        fix_collisions(&mut imgs, &mut map, 1, 1080);
        // Event 0 is placed first; event 1 is shifted up clear of it
        // (subtitle direction): 120 -> 100 - 50 = 50.
        assert_eq!(imgs[0].top, 100);
        assert_eq!(imgs[1].top, 50);
    }

    #[test]
    fn fixed_positions_persist_across_frames() {
        let mut map = CollisionMap::default();
        let mut imgs = vec![ev(0, 100, 50)];
        fix_collisions(&mut imgs, &mut map, 1, 1080);
        // Second frame: the event moved in layout but keeps its slot.
        let mut imgs = vec![ev(0, 130, 50)];
        fix_collisions(&mut imgs, &mut map, 1, 1080);
        assert_eq!(imgs[0].top, 100);
    }

    #[test]
    fn non_colliding_events_untouched() {
        let mut map = CollisionMap::default();
        let mut imgs = vec![ev(0, 100, 50), ev(1, 400, 50)];
        fix_collisions(&mut imgs, &mut map, 1, 1080);
        assert_eq!(imgs[0].top, 100);
        assert_eq!(imgs[1].top, 400);
    }

    #[test]
    fn downward_shift_direction() {
        let mut map = CollisionMap::default();
        let mut imgs = vec![ev(0, 100, 50), ev(1, 120, 50)];
        imgs[1].shift_direction = 1;
        fix_collisions(&mut imgs, &mut map, 1, 1080);
        // Shifted down past the first event: 100 + 50 = 150.
        assert_eq!(imgs[1].top, 150);
    }
}
