use std::fmt;

use serde::{Deserialize, Serialize};

use tilesplit_protocol::{Boundary2, ChannelId, PixelViewport, TaskId};

use crate::model::Compound;

/// Configured decomposition mode.
///
/// `TwoD` alternates vertical and horizontal splits down the tree; the other
/// modes force a single axis onto every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    TwoD,
    Vertical,
    Horizontal,
    Db,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoD => write!(f, "2D"),
            Self::Vertical => write!(f, "VERTICAL"),
            Self::Horizontal => write!(f, "HORIZONTAL"),
            Self::Db => write!(f, "DB"),
        }
    }
}

/// Axis an internal node splits along. Leaves carry one for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    Vertical,
    Horizontal,
    Db,
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertical => write!(f, "VERTICAL"),
            Self::Horizontal => write!(f, "HORIZONTAL"),
            Self::Db => write!(f, "DB"),
        }
    }
}

/// One node of the split tree.
///
/// The per-frame fields (`time`, `usage`, `max_size`, boundaries) are
/// refreshed by target assignment before every solve; between frames they
/// hold the previous frame's values.
#[derive(Debug)]
pub struct Node {
    pub mode: SplitMode,
    /// Target render time for the subtree, microseconds.
    pub time: f32,
    /// Summed resource weight of the subtree.
    pub usage: f32,
    /// Pixel cap on how much of the destination this subtree may cover.
    pub max_size: PixelViewport,
    pub boundary_2i: Boundary2,
    pub boundary_f: f32,
    pub kind: NodeKind,
}

/// Leaf or internal split — the distinction is total, there are no empty
/// child slots.
#[derive(Debug)]
pub enum NodeKind {
    Leaf {
        /// Index of the bound compound in the root's children list.
        child: usize,
        task_id: TaskId,
        channel: ChannelId,
    },
    Split {
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    /// Build the balanced binary split tree over an ordered, non-empty list
    /// of child compounds.
    pub fn build(children: &[Compound], mode: Mode) -> Self {
        debug_assert!(!children.is_empty());
        Self::build_slice(children, 0, mode)
    }

    fn build_slice(children: &[Compound], base: usize, mode: Mode) -> Self {
        if children.len() == 1 {
            let compound = &children[0];
            return Self {
                mode: match mode {
                    Mode::TwoD | Mode::Vertical => SplitMode::Vertical,
                    Mode::Horizontal => SplitMode::Horizontal,
                    Mode::Db => SplitMode::Db,
                },
                time: 0.0,
                usage: 0.0,
                max_size: PixelViewport::new(0, 0),
                boundary_2i: Boundary2::UNIT,
                boundary_f: f32::EPSILON,
                kind: NodeKind::Leaf {
                    child: base,
                    task_id: compound.task_id,
                    channel: compound.channel.id,
                },
            };
        }

        let middle = children.len() / 2;
        let left = Box::new(Self::build_slice(&children[..middle], base, mode));
        let right = Box::new(Self::build_slice(&children[middle..], base + middle, mode));

        // In 2D mode the axis alternates level by level, producing strips
        // within strips; otherwise the configured axis is used throughout.
        let split_mode = match mode {
            Mode::TwoD => {
                if right.mode == SplitMode::Vertical {
                    SplitMode::Horizontal
                } else {
                    SplitMode::Vertical
                }
            }
            Mode::Vertical => SplitMode::Vertical,
            Mode::Horizontal => SplitMode::Horizontal,
            Mode::Db => SplitMode::Db,
        };

        Self {
            mode: split_mode,
            time: 0.0,
            usage: 0.0,
            max_size: PixelViewport::new(0, 0),
            boundary_2i: Boundary2::UNIT,
            boundary_f: f32::EPSILON,
            kind: NodeKind::Split { left, right },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Channel ids of every leaf, left to right.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut out = Vec::new();
        self.collect_channels(&mut out);
        out
    }

    fn collect_channels(&self, out: &mut Vec<ChannelId>) {
        match &self.kind {
            NodeKind::Leaf { channel, .. } => out.push(*channel),
            NodeKind::Split { left, right } => {
                left.collect_channels(out);
                right.collect_channels(out);
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match &self.kind {
            NodeKind::Leaf { task_id, .. } => {
                writeln!(f, "{pad}task {} target time {}", task_id.get(), self.time)
            }
            NodeKind::Split { left, right } => {
                writeln!(f, "{pad}split {} target time {}", self.mode, self.time)?;
                left.fmt_indented(f, depth + 1)?;
                right.fmt_indented(f, depth + 1)
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
