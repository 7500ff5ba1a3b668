//! Shared plain-data types for the tilesplit load equalizer.
//!
//! Everything here is serialisable and carries no behaviour beyond small
//! geometric helpers: the fractional [`Viewport`]/[`Range`] pair describing a
//! child's slice of the work, the integer pixel types constraining splits,
//! and the [`Statistic`] events the rendering pipeline reports back.

pub mod geometry;
pub mod statistic;

pub use geometry::{Boundary2, PixelViewport, Range, Viewport};
pub use statistic::{ChannelId, Statistic, StatisticKind, TaskId};
