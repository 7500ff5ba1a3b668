//! Per-frame load equalisation for parallel rendering compounds.
//!
//! A compound subdivides one output among several child compounds rendering
//! concurrently on different GPUs or nodes. The equalizer organises those
//! children in a binary split tree and, before every frame, repartitions
//! image space (or the database range) so that all children are predicted to
//! finish at the same time:
//!
//! ```text
//!   Statistic stream ──▶ History ──▶ Target times ──▶ Split solver
//!   (notify_load_data)                                      │
//!                                       per-child Viewport + Range
//! ```
//!
//! [`LoadEqualizer::notify_update_pre`] drives the whole pipeline once per
//! frame; [`LoadEqualizer::notify_load_data`] feeds measured times back in
//! as frames finish rendering.

pub mod balance;
pub mod equalizer;
pub mod model;

pub use balance::{Mode, Node, NodeKind, SplitMode};
pub use equalizer::{ConfigError, LoadEqualizer};
pub use model::{Channel, ChannelListener, Compound, FrameRecord, History, Observation};
