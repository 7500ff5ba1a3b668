use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use tilesplit_protocol::{ChannelId, Range, Statistic, StatisticKind, TaskId, Viewport};

/// One leaf's share of a frame: where it rendered and how long it took.
///
/// An observation starts out pending (`time == None`) when the split solver
/// plans the frame and becomes measured once the statistics for the frame
/// have been folded in. A leaf that will not render is measured immediately
/// with a zero time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Task the observation belongs to; `None` only in the synthetic
    /// bootstrap record.
    pub task_id: Option<TaskId>,
    /// Channel that renders this slice; `None` only in the synthetic record.
    pub channel: Option<ChannelId>,
    pub viewport: Viewport,
    pub range: Range,
    /// Measured render time in microseconds, `None` while pending.
    pub time: Option<i64>,
    /// Render time per unit of normalised viewport area.
    pub load: f32,
}

impl Observation {
    /// A planned slice awaiting its measurement.
    pub fn pending(task_id: TaskId, channel: ChannelId, viewport: Viewport, range: Range) -> Self {
        Self {
            task_id: Some(task_id),
            channel: Some(channel),
            viewport,
            range,
            time: None,
            load: 0.0,
        }
    }

    /// A slice that renders nothing and therefore costs nothing.
    pub fn empty(task_id: TaskId, channel: ChannelId, viewport: Viewport, range: Range) -> Self {
        Self {
            time: Some(0),
            ..Self::pending(task_id, channel, viewport, range)
        }
    }

    /// Unit-load placeholder used when no measurement exists yet; makes the
    /// first frame come out as a uniform split.
    pub fn synthetic() -> Self {
        Self {
            task_id: None,
            channel: None,
            viewport: Viewport::FULL,
            range: Range::ALL,
            time: Some(1),
            load: 1.0,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.time.is_some()
    }
}

/// The observations of one planned frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_number: u32,
    pub observations: Vec<Observation>,
}

impl FrameRecord {
    /// A record is complete once every observation has been measured.
    pub fn is_complete(&self) -> bool {
        self.observations.iter().all(Observation::is_measured)
    }
}

/// Sliding window of per-frame measurements, oldest first.
///
/// Frame numbers are strictly increasing. After [`History::check`] the front
/// record is the newest complete one (or the synthetic bootstrap record) and
/// serves as the measurement set for the next plan; the back record is the
/// frame currently in flight.
#[derive(Debug, Default)]
pub struct History {
    records: VecDeque<FrameRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record planning should read from: the front record after
    /// [`History::check`].
    pub fn usable(&self) -> Option<&FrameRecord> {
        self.records.front()
    }

    pub fn push(&mut self, record: FrameRecord) {
        debug_assert!(
            self.records
                .back()
                .is_none_or(|r| r.frame_number < record.frame_number),
            "frame numbers must be strictly increasing"
        );
        self.records.push_back(record);
    }

    /// Drop records superseded by a newer complete one; bootstrap with a
    /// synthetic unit-load record when nothing measured remains.
    pub fn check(&mut self) {
        let use_frame = self
            .records
            .iter()
            .rev()
            .find(|r| r.is_complete())
            .map(|r| r.frame_number);

        if let Some(use_frame) = use_frame {
            while self
                .records
                .front()
                .is_some_and(|r| r.frame_number < use_frame)
            {
                self.records.pop_front();
            }
        }

        if self.records.is_empty() {
            self.records.push_back(FrameRecord {
                frame_number: 0,
                observations: vec![Observation::synthetic()],
            });
        }
    }

    /// Fold a channel's statistics for one frame into the matching pending
    /// observation.
    ///
    /// The relevant time window is the hull of the clear/draw/readback events
    /// of the observation's task; frame transmission counts separately and
    /// wins if it dominates. Scanning stops at the first assemble event since
    /// compositing time belongs to a parent task. Statistics for unknown
    /// frames or tasks are dropped; an observation is written at most once.
    /// If two leaves share a channel the first observation wins.
    pub fn fold_statistics(
        &mut self,
        channel: ChannelId,
        frame_number: u32,
        statistics: &[Statistic],
    ) {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.frame_number == frame_number)
        else {
            return;
        };

        let Some(observation) = record
            .observations
            .iter_mut()
            .find(|o| o.channel == Some(channel))
        else {
            return;
        };

        debug_assert!(observation.task_id.is_some());

        if !observation.viewport.has_area() || observation.is_measured() {
            return;
        }

        let mut start_time = i64::MAX;
        let mut end_time = 0_i64;
        let mut time_transmit = 0_i64;
        for stat in statistics {
            if Some(stat.task) != observation.task_id {
                continue;
            }
            match stat.kind {
                StatisticKind::ChannelClear
                | StatisticKind::ChannelDraw
                | StatisticKind::ChannelReadback => {
                    start_time = start_time.min(stat.start_time);
                    end_time = end_time.max(stat.end_time);
                }
                StatisticKind::ChannelFrameTransmit => {
                    time_transmit += stat.end_time - stat.start_time;
                }
                StatisticKind::ChannelAssemble => break,
            }
        }

        if start_time == i64::MAX {
            return;
        }

        let time = (end_time - start_time).max(1).max(time_transmit);
        observation.time = Some(time);
        observation.load = time as f32 / observation.viewport.area();
        trace!(
            channel = channel.get(),
            frame = frame_number,
            time,
            load = observation.load,
            "folded load data"
        );
    }

}
