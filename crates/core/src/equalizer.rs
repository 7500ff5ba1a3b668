use std::fmt;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use tilesplit_protocol::{Boundary2, ChannelId, Range, Statistic, Viewport};

use crate::balance::solver::{SortedLoads, SplitContext, compute_split};
use crate::balance::target::{TargetParams, assign_leftover_time, assign_target_times};
use crate::balance::tree::{Mode, Node};
use crate::model::{ChannelListener, Compound, FrameRecord, History};

/// Rejected configuration values. The planning core itself never sees
/// invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("damping {0} outside [0, 1]")]
    DampingOutOfRange(f32),
    #[error("split boundary must be at least 1x1, got {x}x{y}")]
    BoundaryTooSmall { x: u32, y: u32 },
    #[error("range boundary {0} must be positive")]
    NonPositiveRangeBoundary(f32),
}

/// Equalizes the per-frame render time of a compound's children by
/// repartitioning image space (or the data range) before every frame, based
/// on the times measured on previous frames.
///
/// `notify_update_pre` runs on the compound update thread; `notify_load_data`
/// may arrive from the rendering pipeline on any thread and only touches the
/// mutex-protected measurement history.
pub struct LoadEqualizer {
    mode: Mode,
    damping: f32,
    boundary_2i: Boundary2,
    boundary_f: f32,
    frozen: bool,
    tree: Option<Node>,
    history: Mutex<History>,
    listened: Vec<ChannelId>,
}

impl LoadEqualizer {
    pub fn new() -> Self {
        Self::with_mode(Mode::default())
    }

    pub fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            damping: 0.5,
            boundary_2i: Boundary2::UNIT,
            boundary_f: f32::EPSILON,
            frozen: false,
            tree: None,
            history: Mutex::new(History::new()),
            listened: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Set the decomposition mode. Must be configured before the first
    /// frame; the split tree is built once.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    pub fn set_damping(&mut self, damping: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&damping) {
            return Err(ConfigError::DampingOutOfRange(damping));
        }
        self.damping = damping;
        Ok(())
    }

    pub fn boundary_2i(&self) -> Boundary2 {
        self.boundary_2i
    }

    pub fn set_boundary_2i(&mut self, boundary: Boundary2) -> Result<(), ConfigError> {
        if boundary.x == 0 || boundary.y == 0 {
            return Err(ConfigError::BoundaryTooSmall {
                x: boundary.x,
                y: boundary.y,
            });
        }
        self.boundary_2i = boundary;
        Ok(())
    }

    pub fn boundary_f(&self) -> f32 {
        self.boundary_f
    }

    pub fn set_boundary_f(&mut self, boundary: f32) -> Result<(), ConfigError> {
        if boundary < f32::EPSILON {
            return Err(ConfigError::NonPositiveRangeBoundary(boundary));
        }
        self.boundary_f = boundary;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// A frozen equalizer keeps rotating its history but leaves the last
    /// split in place.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// The split tree, once built. Diagnostic only.
    pub fn tree(&self) -> Option<&Node> {
        self.tree.as_ref()
    }

    /// Channels this equalizer listens on for load data, established when
    /// the tree is built.
    pub fn listened_channels(&self) -> &[ChannelId] {
        &self.listened
    }

    /// Plan the next frame: rotate the measurement history, assign target
    /// times from the newest complete measurements, and write a fresh
    /// viewport/range split into the children.
    ///
    /// Called once per frame on the compound update thread, before the frame
    /// renders.
    pub fn notify_update_pre(&mut self, compound: &mut Compound, frame_number: u32) {
        if self.tree.is_none() {
            if compound.children.is_empty() {
                // A leaf compound has nothing to balance.
                return;
            }
            let tree = Node::build(&compound.children, self.mode);
            self.listened = tree.channels();
            debug!(frame = frame_number, tree = %tree, "built split tree");
            self.tree = Some(tree);
        }

        let mut history = self.history.lock().expect("history mutex poisoned");
        history.check();

        if self.frozen || !compound.running {
            return;
        }
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        let Some(usable) = history.usable().cloned() else {
            return;
        };

        let total_time: i64 = usable.observations.iter().filter_map(|o| o.time).sum();
        let n_resources: f32 = compound
            .children
            .iter()
            .filter(|c| c.running)
            .map(|c| c.usage)
            .sum();
        if n_resources <= 0.0 {
            warn!(
                frame = frame_number,
                "no running children with usage, keeping previous split"
            );
            return;
        }
        let resource_time = total_time as f32 / n_resources;
        debug!(
            frame = frame_number,
            using = usable.frame_number,
            total_time,
            resource_time,
            n_resources,
            "balancing"
        );

        let params = TargetParams {
            record: &usable,
            damping: self.damping,
            boundary_2i: self.boundary_2i,
            boundary_f: self.boundary_f,
        };
        let leftover = assign_target_times(
            tree,
            total_time as f32,
            resource_time,
            &compound.children,
            &params,
        );
        assign_leftover_time(tree, leftover);

        let loads = SortedLoads::from_record(&usable, self.mode);
        let mut planned = Vec::with_capacity(compound.children.len());
        let root_pvp = compound.inherit_pixel_viewport();
        let mut ctx = SplitContext {
            children: &mut compound.children,
            root_pvp,
            planned: &mut planned,
        };
        compute_split(tree, &loads, Viewport::FULL, Range::ALL, &mut ctx);

        history.push(FrameRecord {
            frame_number,
            observations: planned,
        });
    }

    /// Fold a channel's statistics for a rendered frame into the matching
    /// history record. Safe to call from any thread; statistics for evicted
    /// frames are dropped.
    pub fn notify_load_data(
        &self,
        channel: ChannelId,
        frame_number: u32,
        statistics: &[Statistic],
    ) {
        self.history
            .lock()
            .expect("history mutex poisoned")
            .fold_statistics(channel, frame_number, statistics);
    }
}

impl Default for LoadEqualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelListener for LoadEqualizer {
    fn notify_load_data(&self, channel: ChannelId, frame_number: u32, statistics: &[Statistic]) {
        Self::notify_load_data(self, channel, frame_number, statistics);
    }
}

impl fmt::Display for LoadEqualizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "load_equalizer")?;
        writeln!(f, "{{")?;
        writeln!(f, "    mode    {}", self.mode)?;
        if self.damping != 0.5 {
            writeln!(f, "    damping {}", self.damping)?;
        }
        if self.boundary_2i != Boundary2::UNIT {
            writeln!(f, "    boundary [ {} {} ]", self.boundary_2i.x, self.boundary_2i.y)?;
        }
        if self.boundary_f != f32::EPSILON {
            writeln!(f, "    boundary {}", self.boundary_f)?;
        }
        writeln!(f, "}}")
    }
}
