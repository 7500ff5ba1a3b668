use tracing::debug;

use tilesplit_protocol::Boundary2;

use crate::balance::tree::{Node, NodeKind, SplitMode};
use crate::model::{Compound, FrameRecord};

/// Redistribution snaps a share to a whole subtree below this threshold.
const LEFTOVER_EPSILON: f32 = 1e-4;

/// Per-frame inputs for target assignment.
pub struct TargetParams<'a> {
    /// The newest complete measurement record.
    pub record: &'a FrameRecord,
    /// Exponential smoothing factor in `[0, 1]`; 0 adopts the raw target,
    /// 1 holds the previous measurement.
    pub damping: f32,
    pub boundary_2i: Boundary2,
    pub boundary_f: f32,
}

/// Preorder pass assigning each leaf a damped target render time and
/// refreshing the aggregated bounds of every internal node.
///
/// `total_time` is the remaining unassigned pool; each leaf consumes its
/// target from it, so siblings to the right see the decremented pool.
/// Returns what is left of the pool after the subtree took its share.
pub fn assign_target_times(
    node: &mut Node,
    total_time: f32,
    resource_time: f32,
    children: &[Compound],
    params: &TargetParams<'_>,
) -> f32 {
    match &mut node.kind {
        NodeKind::Leaf { child, task_id, .. } => {
            let compound = &children[*child];
            let usage = if compound.running { compound.usage } else { 0.0 };
            let mut time = resource_time * usage;

            if usage > 0.0 {
                debug_assert!((0.0..=1.0).contains(&params.damping));
                if let Some(measured) = params
                    .record
                    .observations
                    .iter()
                    .find(|o| o.task_id == Some(*task_id))
                    .and_then(|o| o.time)
                {
                    // Smooth against the last measured time to keep the
                    // target stable under noisy measurements.
                    time = (1.0 - params.damping) * time + params.damping * measured as f32;
                }
            }

            node.max_size = compound.channel.pixel_viewport;
            node.boundary_2i = params.boundary_2i;
            node.boundary_f = params.boundary_f;
            node.time = time.min(total_time);
            node.usage = usage;
            debug!(
                task = task_id.get(),
                usage,
                target = node.time,
                pool = total_time - node.time,
                "leaf target"
            );
            total_time - node.time
        }
        NodeKind::Split { left, right } => {
            let mut pool = assign_target_times(left, total_time, resource_time, children, params);
            pool = assign_target_times(right, pool, resource_time, children, params);
            node.time = left.time + right.time;
            node.usage = left.usage + right.usage;

            match node.mode {
                SplitMode::Vertical => {
                    node.max_size.w = left.max_size.w + right.max_size.w;
                    node.max_size.h = left.max_size.h.min(right.max_size.h);
                    node.boundary_2i.x = left.boundary_2i.x + right.boundary_2i.x;
                    node.boundary_2i.y = left.boundary_2i.y.max(right.boundary_2i.y);
                    node.boundary_f = left.boundary_f.max(right.boundary_f);
                }
                SplitMode::Horizontal => {
                    node.max_size.w = left.max_size.w.min(right.max_size.w);
                    node.max_size.h = left.max_size.h + right.max_size.h;
                    node.boundary_2i.x = left.boundary_2i.x.max(right.boundary_2i.x);
                    node.boundary_2i.y = left.boundary_2i.y + right.boundary_2i.y;
                    node.boundary_f = left.boundary_f.max(right.boundary_f);
                }
                SplitMode::Db => {
                    node.max_size.w = left.max_size.w.max(right.max_size.w);
                    node.max_size.h = left.max_size.h.max(right.max_size.h);
                    node.boundary_2i.x = left.boundary_2i.x.max(right.boundary_2i.x);
                    node.boundary_2i.y = left.boundary_2i.y.max(right.boundary_2i.y);
                    node.boundary_f = left.boundary_f + right.boundary_f;
                }
            }
            pool
        }
    }
}

/// Preorder pass distributing the pool left over after clamping, each
/// subtree receiving a share proportional to its usage.
///
/// Leftover arriving at a subtree without usage indicates a target
/// assignment bug and aborts.
pub fn assign_leftover_time(node: &mut Node, time: f32) {
    match &mut node.kind {
        NodeKind::Leaf { .. } => {
            if node.usage > 0.0 {
                node.time += time;
            } else {
                assert!(
                    time < LEFTOVER_EPSILON,
                    "leftover time {time} assigned to unused leaf"
                );
            }
        }
        NodeKind::Split { left, right } => {
            if node.usage > 0.0 {
                let mut left_time = time * left.usage / node.usage;
                let mut right_time = time - left_time;
                if time - left_time < LEFTOVER_EPSILON {
                    left_time = time;
                    right_time = 0.0;
                } else if time - right_time < LEFTOVER_EPSILON {
                    left_time = 0.0;
                    right_time = time;
                }

                assign_leftover_time(left, left_time);
                assign_leftover_time(right, right_time);
                node.time = left.time + right.time;
            } else {
                assert!(
                    time <= LEFTOVER_EPSILON,
                    "leftover time {time} assigned to unused subtree"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::tree::Mode;
    use crate::model::{Channel, Observation};
    use tilesplit_protocol::{ChannelId, PixelViewport, Range, TaskId, Viewport};

    fn compounds(usages: &[f32]) -> Vec<Compound> {
        usages
            .iter()
            .enumerate()
            .map(|(i, &usage)| {
                let id = i as u32 + 1;
                Compound::new(
                    TaskId::new(id),
                    Channel::new(ChannelId::new(id), format!("gpu{id}"), PixelViewport::new(1024, 768)),
                )
                .with_usage(usage)
            })
            .collect()
    }

    fn measured_record(times: &[i64]) -> FrameRecord {
        FrameRecord {
            frame_number: 1,
            observations: times
                .iter()
                .enumerate()
                .map(|(i, &time)| Observation {
                    task_id: Some(TaskId::new(i as u32 + 1)),
                    channel: Some(ChannelId::new(i as u32 + 1)),
                    viewport: Viewport::FULL,
                    range: Range::ALL,
                    time: Some(time),
                    load: time as f32,
                })
                .collect(),
        }
    }

    fn params<'a>(record: &'a FrameRecord, damping: f32) -> TargetParams<'a> {
        TargetParams {
            record,
            damping,
            boundary_2i: Boundary2::UNIT,
            boundary_f: f32::EPSILON,
        }
    }

    #[test]
    fn undamped_targets_follow_usage() {
        let children = compounds(&[1.0, 3.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[20, 20]);
        let leftover =
            assign_target_times(&mut tree, 40.0, 10.0, &children, &params(&record, 0.0));
        let NodeKind::Split { left, right } = &tree.kind else {
            panic!("expected split");
        };
        assert_eq!(left.time, 10.0);
        assert_eq!(right.time, 30.0);
        assert_eq!(tree.time, 40.0);
        assert_eq!(tree.usage, 4.0);
        assert_eq!(leftover, 0.0);
    }

    #[test]
    fn damping_pulls_target_toward_measurement() {
        let children = compounds(&[1.0, 1.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[30, 10]);
        assign_target_times(&mut tree, 40.0, 20.0, &children, &params(&record, 0.5));
        let NodeKind::Split { left, right } = &tree.kind else {
            panic!("expected split");
        };
        // target = 0.5·raw + 0.5·measured
        assert_eq!(left.time, 25.0);
        assert_eq!(right.time, 15.0);
        // Contraction: the damped target is no further from the measurement
        // than (1 − damping) of the raw error.
        assert!((left.time - 30.0).abs() <= 0.5 * (20.0_f32 - 30.0).abs());
    }

    #[test]
    fn stopped_child_gets_no_target() {
        let mut children = compounds(&[1.0, 1.0]);
        children[1].running = false;
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[10, 10]);
        let leftover =
            assign_target_times(&mut tree, 20.0, 20.0, &children, &params(&record, 0.0));
        let NodeKind::Split { right, .. } = &tree.kind else {
            panic!("expected split");
        };
        assert_eq!(right.time, 0.0);
        assert_eq!(right.usage, 0.0);
        assert_eq!(leftover, 0.0);
    }

    #[test]
    fn targets_are_clamped_to_the_remaining_pool() {
        let children = compounds(&[1.0, 1.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[100, 100]);
        // Damping 1.0 holds the measured 100 for both, but the pool only
        // has 150: the right leaf is clamped to what remains.
        let leftover =
            assign_target_times(&mut tree, 150.0, 75.0, &children, &params(&record, 1.0));
        let NodeKind::Split { left, right } = &tree.kind else {
            panic!("expected split");
        };
        assert_eq!(left.time, 100.0);
        assert_eq!(right.time, 50.0);
        assert_eq!(leftover, 0.0);
    }

    #[test]
    fn leftover_is_shared_by_usage() {
        let children = compounds(&[1.0, 3.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[10, 30]);
        assign_target_times(&mut tree, 40.0, 10.0, &children, &params(&record, 0.0));
        assign_leftover_time(&mut tree, 8.0);
        let NodeKind::Split { left, right } = &tree.kind else {
            panic!("expected split");
        };
        assert_eq!(left.time, 12.0);
        assert_eq!(right.time, 36.0);
        assert_eq!(tree.time, 48.0);
    }

    #[test]
    fn tiny_leftover_snaps_to_one_side() {
        let children = compounds(&[1.0, 1.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[10, 10]);
        assign_target_times(&mut tree, 20.0, 10.0, &children, &params(&record, 0.0));
        assign_leftover_time(&mut tree, 5e-5);
        let NodeKind::Split { left, right } = &tree.kind else {
            panic!("expected split");
        };
        // Below the threshold the whole share lands on the left leaf.
        assert_eq!(left.time, 10.0 + 5e-5);
        assert_eq!(right.time, 10.0);
    }

    #[test]
    fn vertical_aggregation_sums_widths() {
        let children = compounds(&[1.0, 1.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[10, 10]);
        let params = TargetParams {
            record: &record,
            damping: 0.0,
            boundary_2i: Boundary2::new(2, 3),
            boundary_f: 0.25,
        };
        assign_target_times(&mut tree, 20.0, 10.0, &children, &params);
        assert_eq!(tree.max_size, PixelViewport::new(2048, 768));
        assert_eq!(tree.boundary_2i, Boundary2::new(4, 3));
        assert_eq!(tree.boundary_f, 0.25);
    }

    #[test]
    fn db_aggregation_sums_range_quanta() {
        let children = compounds(&[1.0, 1.0]);
        let mut tree = Node::build(&children, Mode::Db);
        let record = measured_record(&[10, 10]);
        let params = TargetParams {
            record: &record,
            damping: 0.0,
            boundary_2i: Boundary2::UNIT,
            boundary_f: 0.125,
        };
        assign_target_times(&mut tree, 20.0, 10.0, &children, &params);
        assert_eq!(tree.max_size, PixelViewport::new(1024, 768));
        assert_eq!(tree.boundary_f, 0.25);
    }

    #[test]
    #[should_panic(expected = "unused")]
    fn leftover_at_unused_subtree_is_fatal() {
        let children = compounds(&[0.0, 0.0]);
        let mut tree = Node::build(&children, Mode::Vertical);
        let record = measured_record(&[10, 10]);
        assign_target_times(&mut tree, 20.0, 10.0, &children, &params(&record, 0.0));
        assign_leftover_time(&mut tree, 20.0);
    }
}
