pub mod compound;
pub mod history;

pub use compound::{Channel, ChannelListener, Compound};
pub use history::{FrameRecord, History, Observation};
