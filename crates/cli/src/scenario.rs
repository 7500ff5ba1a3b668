use serde::Deserialize;

use tilesplit_core::{Channel, Compound, LoadEqualizer, Mode};
use tilesplit_protocol::{
    Boundary2, ChannelId, PixelViewport, Statistic, StatisticKind, TaskId,
};

/// A simulated rendering setup: a destination, a set of child GPUs with a
/// per-unit-of-work cost, and a number of frames to run.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_damping")]
    pub damping: f32,
    #[serde(default)]
    pub boundary: Option<[u32; 2]>,
    pub root: Extent,
    pub children: Vec<ChildSpec>,
    #[serde(default = "default_frames")]
    pub frames: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Extent {
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChildSpec {
    pub name: String,
    /// Pixel extent of the child's channel; defaults to the destination's.
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
    #[serde(default = "default_usage")]
    pub usage: f32,
    /// Simulated render time in milliseconds for covering the whole output.
    #[serde(default = "default_cost")]
    pub cost: f32,
}

fn default_damping() -> f32 {
    0.5
}

fn default_frames() -> u32 {
    8
}

fn default_usage() -> f32 {
    1.0
}

fn default_cost() -> f32 {
    1.0
}

/// Run the scenario: plan each frame, "render" it by synthesising draw and
/// readback statistics from the cost model, and feed the times back.
pub fn run(scenario: &Scenario) -> anyhow::Result<()> {
    let mut root = Compound::new(
        TaskId::new(1000),
        Channel::new(
            ChannelId::new(1000),
            "destination",
            PixelViewport::new(scenario.root.w, scenario.root.h),
        ),
    );
    for (i, spec) in scenario.children.iter().enumerate() {
        let id = i as u32 + 1;
        root.children.push(
            Compound::new(
                TaskId::new(id),
                Channel::new(
                    ChannelId::new(id),
                    spec.name.clone(),
                    PixelViewport::new(
                        spec.w.unwrap_or(scenario.root.w),
                        spec.h.unwrap_or(scenario.root.h),
                    ),
                ),
            )
            .with_usage(spec.usage),
        );
    }

    let mut eq = LoadEqualizer::with_mode(scenario.mode);
    eq.set_damping(scenario.damping)?;
    if let Some([x, y]) = scenario.boundary {
        eq.set_boundary_2i(Boundary2::new(x, y))?;
    }

    for frame in 1..=scenario.frames {
        eq.notify_update_pre(&mut root, frame);
        println!("frame {frame}");

        for (i, spec) in scenario.children.iter().enumerate() {
            let child = &root.children[i];
            let covered = child.viewport().area() * child.range().extent();
            let time_us = (f64::from(spec.cost) * 1_000.0 * f64::from(covered)) as i64;
            println!(
                "  {:<12} vp {} range {} time {:.2}ms",
                spec.name,
                child.viewport(),
                child.range(),
                time_us as f64 / 1_000.0,
            );

            if covered <= 0.0 {
                continue;
            }
            let stats = [
                Statistic {
                    task: child.task_id,
                    kind: StatisticKind::ChannelDraw,
                    start_time: 0,
                    end_time: time_us.max(1),
                },
                Statistic {
                    task: child.task_id,
                    kind: StatisticKind::ChannelReadback,
                    start_time: time_us.max(1),
                    end_time: time_us.max(1) + 100,
                },
            ];
            eq.notify_load_data(child.channel.id, frame, &stats);
        }
    }

    print!("{eq}");
    Ok(())
}
