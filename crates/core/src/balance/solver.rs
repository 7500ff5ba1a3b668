use tracing::trace;

use tilesplit_protocol::{PixelViewport, Range, Viewport};

use crate::balance::tree::{Mode, Node, NodeKind, SplitMode};
use crate::model::{Compound, FrameRecord, Observation};

/// The usable record's observations, sorted once per frame for each split
/// axis. Observations that rendered nothing are dropped up front.
pub struct SortedLoads {
    by_x: Vec<Observation>,
    by_y: Vec<Observation>,
    by_range: Vec<Observation>,
}

impl SortedLoads {
    pub fn from_record(record: &FrameRecord, mode: Mode) -> Self {
        let items: Vec<Observation> = record
            .observations
            .iter()
            .filter(|o| o.viewport.has_area() && o.range.has_data())
            .cloned()
            .collect();

        if mode == Mode::Db {
            let mut by_range = items;
            by_range.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
            return Self {
                by_x: Vec::new(),
                by_y: Vec::new(),
                by_range,
            };
        }

        let mut by_x = items.clone();
        by_x.sort_by(|a, b| a.viewport.x.total_cmp(&b.viewport.x));
        let mut by_y = items;
        by_y.sort_by(|a, b| a.viewport.y.total_cmp(&b.viewport.y));
        Self {
            by_x,
            by_y,
            by_range: Vec::new(),
        }
    }
}

/// Mutable per-frame state threaded through the recursion: the children the
/// split is written into, the destination pixel grid, and the observation
/// list of the frame being planned.
pub struct SplitContext<'a> {
    pub children: &'a mut [Compound],
    pub root_pvp: PixelViewport,
    pub planned: &'a mut Vec<Observation>,
}

/// Recursively partition `vp`/`range` over the tree so that each subtree's
/// predicted render time matches its target.
///
/// Load density is piecewise-constant between the edges of the observed
/// viewports, so within each piece time is linear in the split distance and
/// the target inversion is exact; the walk finds the piece containing the
/// target and inverts there.
pub fn compute_split(
    node: &Node,
    loads: &SortedLoads,
    vp: Viewport,
    range: Range,
    ctx: &mut SplitContext<'_>,
) {
    debug_assert!(vp.is_valid(), "invalid viewport {vp}");
    debug_assert!(range.is_valid(), "invalid range {range}");
    assert!(
        node.usage > 0.0 || !vp.has_area() || !range.has_data(),
        "work assigned to unused subtree: {vp}, {range}"
    );

    let (left, right) = match &node.kind {
        NodeKind::Leaf { child, task_id, channel } => {
            assert!(
                vp == Viewport::FULL || range == Range::ALL,
                "mixed 2D/DB load balancing is not supported"
            );

            let compound = &mut ctx.children[*child];
            compound.set_viewport(vp);
            compound.set_range(range);
            trace!(task = task_id.get(), %vp, %range, "assigned slice");

            let observation = if vp.has_area() && range.has_data() {
                Observation::pending(*task_id, *channel, vp, range)
            } else {
                Observation::empty(*task_id, *channel, vp, range)
            };
            ctx.planned.push(observation);
            return;
        }
        NodeKind::Split { left, right } => (left, right),
    };

    match node.mode {
        SplitMode::Vertical => {
            debug_assert_eq!(range, Range::ALL);
            let end = vp.x_end();
            let mut split_pos = walk_axis(
                &loads.by_x,
                left.time,
                vp.x,
                end,
                |d| AxisSpan {
                    lo: d.viewport.x,
                    hi: d.viewport.x_end(),
                    cross_lo: d.viewport.y,
                    cross_hi: d.viewport.y_end(),
                    cross_extent: d.viewport.h,
                },
                vp.y,
                vp.y_end(),
                vp.h,
            );

            let pvp_w = ctx.root_pvp.w as f32;
            let boundary = node.boundary_2i.x as f32 / pvp_w;
            if left.usage == 0.0 {
                split_pos = vp.x;
            } else if right.usage == 0.0 {
                split_pos = end;
            } else if boundary > 0.0 {
                let length_right = end - split_pos;
                let length_left = split_pos - vp.x;
                let max_right = right.max_size.w as f32 / pvp_w;
                let max_left = left.max_size.w as f32 / pvp_w;
                if length_right > max_right {
                    split_pos = end - max_right;
                } else if length_left > max_left {
                    split_pos = vp.x + max_left;
                }

                if split_pos - vp.x < boundary {
                    split_pos = vp.x + boundary;
                }
                if end - split_pos < boundary {
                    split_pos = end - boundary;
                }
                split_pos = snap(split_pos, boundary);
            }
            split_pos = split_pos.clamp(vp.x, end);
            trace!(%vp, split_pos, "vertical split");

            let mut child_vp = vp;
            child_vp.w = split_pos - vp.x;
            compute_split(left, loads, child_vp, range, ctx);

            child_vp.x = child_vp.x_end();
            child_vp.w = end - child_vp.x;
            // Floating round-off can leave the right child slightly short of
            // the parent edge; widen until it reaches it.
            while child_vp.x_end() < end {
                child_vp.w += f32::EPSILON;
            }
            compute_split(right, loads, child_vp, range, ctx);
        }

        SplitMode::Horizontal => {
            debug_assert_eq!(range, Range::ALL);
            let end = vp.y_end();
            let mut split_pos = walk_axis(
                &loads.by_y,
                left.time,
                vp.y,
                end,
                |d| AxisSpan {
                    lo: d.viewport.y,
                    hi: d.viewport.y_end(),
                    cross_lo: d.viewport.x,
                    cross_hi: d.viewport.x_end(),
                    cross_extent: d.viewport.w,
                },
                vp.x,
                vp.x_end(),
                vp.w,
            );

            let pvp_h = ctx.root_pvp.h as f32;
            let boundary = node.boundary_2i.y as f32 / pvp_h;
            if left.usage == 0.0 {
                split_pos = vp.y;
            } else if right.usage == 0.0 {
                split_pos = end;
            } else if boundary > 0.0 {
                let length_right = end - split_pos;
                let length_left = split_pos - vp.y;
                let max_right = right.max_size.h as f32 / pvp_h;
                let max_left = left.max_size.h as f32 / pvp_h;
                if length_right > max_right {
                    split_pos = end - max_right;
                } else if length_left > max_left {
                    split_pos = vp.y + max_left;
                }

                if split_pos - vp.y < boundary {
                    split_pos = vp.y + boundary;
                }
                if end - split_pos < boundary {
                    split_pos = end - boundary;
                }
                split_pos = snap(split_pos, boundary);
            }
            split_pos = split_pos.clamp(vp.y, end);
            trace!(%vp, split_pos, "horizontal split");

            let mut child_vp = vp;
            child_vp.h = split_pos - vp.y;
            compute_split(left, loads, child_vp, range, ctx);

            child_vp.y = child_vp.y_end();
            child_vp.h = end - child_vp.y;
            while child_vp.y_end() < end {
                child_vp.h += f32::EPSILON;
            }
            compute_split(right, loads, child_vp, range, ctx);
        }

        SplitMode::Db => {
            debug_assert_eq!(vp, Viewport::FULL);
            let end = range.end;
            let mut time_left = left.time;
            let mut split_pos = range.start;
            let mut working: Vec<&Observation> = loads.by_range.iter().collect();

            while time_left > f32::EPSILON && split_pos < end && !working.is_empty() {
                working.retain(|d| d.range.end > split_pos);
                if working.is_empty() {
                    break;
                }

                // Next discontinuity in the load distribution.
                let current_pos = working
                    .iter()
                    .map(|d| d.range.end)
                    .fold(1.0_f32, f32::min);
                debug_assert!(current_pos > split_pos);

                // Range load is already a 1-D density: a straight sum gives
                // the cost of consuming the slice up to the discontinuity.
                let mut current_load = 0.0;
                for d in &working {
                    if d.range.start >= current_pos {
                        break;
                    }
                    current_load += d.load;
                }
                trace!(split_pos, current_pos, current_load, time_left, "range strip");

                if current_load >= time_left {
                    let width = current_pos - split_pos;
                    split_pos += width * time_left / current_load;
                    time_left = 0.0;
                } else {
                    time_left -= current_load;
                    split_pos = current_pos;
                }
            }

            let boundary = node.boundary_f;
            if left.usage == 0.0 {
                split_pos = range.start;
            } else if right.usage == 0.0 {
                split_pos = end;
            }

            split_pos = snap(split_pos, boundary);
            if split_pos - range.start < boundary {
                split_pos = range.start;
            }
            if end - split_pos < boundary {
                split_pos = end;
            }
            trace!(%range, split_pos, "range split");

            let mut child_range = range;
            child_range.end = split_pos;
            compute_split(left, loads, vp, child_range, ctx);

            child_range.start = child_range.end;
            child_range.end = range.end;
            compute_split(right, loads, vp, child_range, ctx);
        }
    }
}

struct AxisSpan {
    lo: f32,
    hi: f32,
    cross_lo: f32,
    cross_hi: f32,
    cross_extent: f32,
}

/// Walk the sorted observations along one image axis, consuming target time
/// strip by strip until it is spent, and return the resulting split position.
///
/// Each observation contributes its load weighted by how much of its cross
/// extent overlaps the viewport being split.
#[allow(clippy::too_many_arguments)]
fn walk_axis(
    sorted: &[Observation],
    target: f32,
    start: f32,
    end: f32,
    span: impl Fn(&Observation) -> AxisSpan,
    cross_start: f32,
    cross_end: f32,
    cross_size: f32,
) -> f32 {
    let mut time_left = target;
    let mut split_pos = start;
    let mut working: Vec<&Observation> = sorted.iter().collect();

    while time_left > f32::EPSILON && split_pos < end && !working.is_empty() {
        working.retain(|d| span(d).hi > split_pos);
        if working.is_empty() {
            break;
        }

        // Next discontinuity in the load distribution.
        let current_pos = working
            .iter()
            .map(|d| span(d).hi)
            .fold(1.0_f32, f32::min);
        debug_assert!(current_pos > split_pos);

        // Accumulate the load density of the strip up to the discontinuity.
        let mut current_load = 0.0;
        for d in &working {
            let s = span(d);
            if s.lo >= current_pos {
                break;
            }
            let mut contrib = s.cross_extent;
            if s.cross_lo < cross_start {
                contrib -= cross_start - s.cross_lo;
            }
            if s.cross_hi > cross_end {
                contrib -= s.cross_hi - cross_end;
            }
            if contrib > 0.0 {
                current_load += d.load * (contrib / cross_size);
            }
        }

        let width = current_pos - split_pos;
        let current_time = width * cross_size * current_load;
        trace!(split_pos, current_pos, current_time, time_left, "strip");

        if current_time >= time_left {
            split_pos += width * time_left / current_time;
            time_left = 0.0;
        } else {
            time_left -= current_time;
            split_pos = current_pos;
        }
    }

    split_pos
}

/// Snap to the nearest integer multiple of `boundary`, round half up. Safe
/// for the whole `[0, 1]` domain the split positions live in.
fn snap(pos: f32, boundary: f32) -> f32 {
    (pos / boundary).round() * boundary
}
