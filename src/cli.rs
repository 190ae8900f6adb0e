use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::color::ColorSpace;
use crate::demo::{DemoInstance, DemoScene, HeadlessMaterials};
use crate::driver::RefreshDriver;
use crate::profiling::set_profiling_enabled;
use crate::source::SourceId;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless scene through the refresh pipeline
    Simulate {
        /// Scene description (JSON)
        #[arg(long)]
        scene: PathBuf,

        /// Number of frames to refresh
        #[arg(long, default_value_t = 60)]
        frames: u32,

        /// Frames per second used to advance the emitters
        #[arg(long, default_value_t = 60.0)]
        fps: f32,

        /// Render in linear colour space (overrides the scene)
        #[arg(long)]
        linear: bool,

        /// Log stage timings
        #[arg(long)]
        profile: bool,
    },
}

/// Final state of one source after a simulation run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceSummary {
    id: SourceId,
    uploads: usize,
    vertices: usize,
    triangles: usize,
    materials: Vec<Option<u64>>,
    failures: usize,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            scene,
            frames,
            fps,
            linear,
            profile,
        } => {
            if profile {
                set_profiling_enabled(true);
            }
            simulate(scene, frames, fps, linear)?;
        }
    }
    Ok(())
}

fn simulate(scene_path: PathBuf, frames: u32, fps: f32, linear: bool) -> Result<()> {
    let json = fs::read_to_string(&scene_path)
        .with_context(|| format!("Failed to read scene {}", scene_path.display()))?;
    let scene = DemoScene::from_json(&json)?;

    let mut frame = scene.frame;
    if linear {
        frame.color_space = ColorSpace::Linear;
    }
    if fps <= 0.0 {
        anyhow::bail!("fps must be positive, got {}", fps);
    }
    let dt = 1.0 / fps;

    let mut driver = RefreshDriver::new(Box::new(HeadlessMaterials::new()));
    let mut instances: Vec<DemoInstance> = Vec::with_capacity(scene.sources.len());
    for demo in &scene.sources {
        let (source, instance) = demo.build();
        driver.register(source);
        instances.push(instance);
    }
    log::info!(
        "Simulating {} sources for {} frames ({:?})",
        instances.len(),
        frames,
        frame.color_space
    );

    let mut failures = vec![0usize; instances.len()];
    for index in 0..frames {
        for instance in &instances {
            instance.emitter.step(dt);
        }

        let report = driver.refresh_all(&frame);
        report.log_failures();
        for (count, instance) in failures.iter_mut().zip(&instances) {
            if matches!(report.get(instance.id), Some(Err(_))) {
                *count += 1;
            }
        }
        log::debug!("Frame {}: {} vertices", index, report.total_vertices());
    }

    let summaries: Vec<SourceSummary> = instances
        .iter()
        .zip(&failures)
        .map(|(instance, failures)| {
            let log = instance.canvas.borrow();
            SourceSummary {
                id: instance.id,
                uploads: log.uploads,
                vertices: log.last_vertex_count,
                triangles: log.last_triangle_count,
                materials: log.materials.iter().map(|m| m.map(|m| m.0)).collect(),
                failures: *failures,
            }
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}
