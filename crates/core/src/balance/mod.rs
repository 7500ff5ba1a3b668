pub mod solver;
pub mod target;
pub mod tree;

pub use solver::{SortedLoads, SplitContext, compute_split};
pub use target::{TargetParams, assign_leftover_time, assign_target_times};
pub use tree::{Mode, Node, NodeKind, SplitMode};
