use serde::{Deserialize, Serialize};

use tilesplit_protocol::{ChannelId, PixelViewport, Range, Statistic, TaskId, Viewport};

/// The output surface a compound draws on — identity, a display name for
/// diagnostics, and the pixel extent that bounds how much work the surface
/// can take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub pixel_viewport: PixelViewport,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>, pixel_viewport: PixelViewport) -> Self {
        Self {
            id,
            name: name.into(),
            pixel_viewport,
        }
    }
}

/// A node in the rendering task tree the equalizer operates on.
///
/// Only the slice of the compound interface the equalizer consumes is
/// modelled: the ordered children, the static resource weight, the bound
/// channel, and the per-frame viewport/range slots the split solver writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compound {
    /// Nonzero unique id of this compound's rendering task.
    pub task_id: TaskId,
    /// Relative resource weight, ≥ 0. A weight of zero means the compound
    /// holds a resource but should not receive work.
    pub usage: f32,
    pub running: bool,
    pub channel: Channel,
    pub children: Vec<Compound>,
    viewport: Viewport,
    range: Range,
}

impl Compound {
    pub fn new(task_id: TaskId, channel: Channel) -> Self {
        Self {
            task_id,
            usage: 1.0,
            running: true,
            channel,
            children: Vec::new(),
            viewport: Viewport::FULL,
            range: Range::ALL,
        }
    }

    pub fn with_usage(mut self, usage: f32) -> Self {
        self.usage = usage;
        self
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn set_range(&mut self, range: Range) {
        self.range = range;
    }

    /// Pixel viewport of the destination this compound inherits — the hard
    /// pixel grid that split boundaries are expressed against.
    pub fn inherit_pixel_viewport(&self) -> PixelViewport {
        self.channel.pixel_viewport
    }
}

/// Surface through which per-frame timing statistics reach an equalizer.
///
/// The rendering pipeline calls this once per channel per rendered frame,
/// possibly from a different thread than the pre-frame update.
pub trait ChannelListener {
    fn notify_load_data(&self, channel: ChannelId, frame_number: u32, statistics: &[Statistic]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_compound_renders_everything() {
        let channel = Channel::new(ChannelId::new(1), "gpu1", PixelViewport::new(1024, 768));
        let compound = Compound::new(TaskId::new(1), channel);
        assert_eq!(compound.viewport(), Viewport::FULL);
        assert_eq!(compound.range(), Range::ALL);
        assert_eq!(compound.inherit_pixel_viewport(), PixelViewport::new(1024, 768));
        assert!(compound.running);
    }

    #[test]
    fn split_assignment_sticks() {
        let channel = Channel::new(ChannelId::new(2), "gpu2", PixelViewport::new(800, 600));
        let mut compound = Compound::new(TaskId::new(2), channel).with_usage(2.0);
        compound.set_viewport(Viewport::new(0.5, 0.0, 0.5, 1.0));
        compound.set_range(Range::new(0.0, 0.5));
        assert_eq!(compound.viewport().x, 0.5);
        assert_eq!(compound.range().end, 0.5);
        assert_eq!(compound.usage, 2.0);
    }
}
