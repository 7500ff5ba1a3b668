use serde::{Deserialize, Serialize};

/// Identifies one rendering task (leaf compound) within the compound tree.
///
/// Task ids are assigned by the compound tree and are unique per leaf;
/// `0` is reserved and never used by a real task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Identity of an output channel (the GPU surface doing the drawing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// The pipeline stage a timing statistic was measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    /// Clearing the framebuffer before drawing.
    ChannelClear,
    /// The draw traversal itself.
    ChannelDraw,
    /// Reading the rendered pixels back from the GPU.
    ChannelReadback,
    /// Compositing input frames from other channels. Everything after the
    /// first assemble belongs to a parent task, not to this channel's own
    /// rendering.
    ChannelAssemble,
    /// Transmitting an output frame to another node.
    ChannelFrameTransmit,
}

/// One timed event emitted by a channel while rendering a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    /// The rendering task this event belongs to.
    pub task: TaskId,
    pub kind: StatisticKind,
    /// Event start, microseconds on the channel's clock.
    pub start_time: i64,
    /// Event end, microseconds on the channel's clock.
    pub end_time: i64,
}

impl Statistic {
    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }
}
