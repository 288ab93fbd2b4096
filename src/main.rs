//! beamscan - Main entry point
//!
//! `beamscan plan` previews a scan pattern; `beamscan simulate` runs a full
//! scan against the simulated stage and DAQ and writes the session artifacts;
//! `beamscan boundaries` walks the simulated stage around the pattern edges;
//! `beamscan config` prints the effective settings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use beamscan::config::{PatternShape, Settings, DEFAULT_CONFIG_PATH};
use beamscan::core::{AcquisitionSource, ScanPlan};
use beamscan::data::{unique_session_stem, ScanRecorder};
use beamscan::hardware::{MockDaq, MockStage};
use beamscan::metadata::MetadataBuilder;
use beamscan::rig::{estimate_scan_time, format_duration, ScanRig};
use beamscan::scan::{CancelFlag, ObserverHandle, ProgressObserver};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for beamscan
#[derive(Parser, Debug)]
#[command(name = "beamscan")]
#[command(about = "XY stage + DAQ beam-mapping scans")]
#[command(version)]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the configured pattern and print its size and duration
    Plan(PatternArgs),
    /// Run a scan against the simulated stage and DAQ
    Simulate {
        #[command(flatten)]
        pattern: PatternArgs,
        /// Override the artifact directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Visit the centre and edge midpoints of the pattern area
    Boundaries {
        #[command(flatten)]
        pattern: PatternArgs,
        /// Pause at each point, in milliseconds
        #[arg(long, default_value_t = 1000)]
        pause_ms: u64,
    },
    /// Print the effective settings (file + environment) as TOML
    Config,
}

/// Pattern overrides applied on top of the settings file.
#[derive(Args, Debug, Default)]
struct PatternArgs {
    /// rectangle or circle
    #[arg(long)]
    shape: Option<String>,
    /// Origin as X,Y in mm
    #[arg(long, value_delimiter = ',', num_args = 2)]
    origin: Option<Vec<f64>>,
    /// Rectangle width in mm
    #[arg(long)]
    width: Option<f64>,
    /// Rectangle height in mm
    #[arg(long)]
    height: Option<f64>,
    /// Circle radius in mm
    #[arg(long)]
    radius: Option<f64>,
    /// Step size in mm, both axes
    #[arg(long)]
    step: Option<f64>,
}

impl PatternArgs {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        let pattern = &mut settings.pattern;
        if let Some(shape) = &self.shape {
            pattern.shape = match shape.to_ascii_lowercase().as_str() {
                "rectangle" => PatternShape::Rectangle,
                "circle" => PatternShape::Circle,
                other => anyhow::bail!("unknown pattern shape '{}'", other),
            };
        }
        if let Some([x, y]) = self.origin.as_deref() {
            pattern.origin = beamscan::Position::new(*x, *y);
        }
        if let Some(width) = self.width {
            pattern.width = width;
        }
        if let Some(height) = self.height {
            pattern.height = height;
        }
        if let Some(radius) = self.radius {
            pattern.radius = radius;
        }
        if let Some(step) = self.step {
            pattern.step_x = step;
            pattern.step_y = step;
        }
        settings.validate()?;
        Ok(())
    }
}

fn build_plan(rig: &ScanRig, settings: &Settings) -> Result<ScanPlan> {
    let p = &settings.pattern;
    let plan = match p.shape {
        PatternShape::Rectangle => rig.rectangle(p.width, p.height, p.step_x, p.step_y)?,
        PatternShape::Circle => rig.circle(p.radius, p.step_x, p.step_y)?,
    };
    Ok(plan)
}

fn build_rig(settings: &Settings) -> ScanRig {
    let origin = settings.pattern.origin;
    let stage = Arc::new(MockStage::with_speed(settings.mock.speed_mm_per_sec));
    let daq: Arc<dyn AcquisitionSource> = Arc::new(
        MockDaq::new(stage.position_handle())
            .with_profile(settings.mock.beam_profile(origin))
            .with_noise(settings.mock.noise_volts)
            .with_sample_rate(settings.mock.sample_rate_hz),
    );
    let mut rig = ScanRig::new(stage, Some(daq));
    rig.set_origin(origin.x, origin.y);
    rig
}

fn print_plan(plan: &ScanPlan, settings: &Settings) {
    let estimate = estimate_scan_time(
        plan.len(),
        settings.scan.movement_time_estimate,
        settings.scan.dwell_time,
    );
    println!("Pattern:   {:?}", settings.pattern.shape);
    println!("Points:    {}", plan.len());
    if let Some((min, max)) = plan.bounds() {
        println!("Bounds:    {} .. {}", min, max);
    }
    println!("Estimated: {}", format_duration(estimate));
}

async fn simulate(settings: &Settings, output_dir: Option<PathBuf>) -> Result<()> {
    let rig = build_rig(settings);
    let plan = build_plan(&rig, settings)?;
    print_plan(&plan, settings);

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; stopping after the current point");
            on_signal.cancel();
        }
    });

    let storage = &settings.storage;
    let dir = output_dir.unwrap_or_else(|| storage.output_dir.clone());
    let stem = unique_session_stem(&dir, &storage.file_prefix, Local::now());
    let mut recorder = ScanRecorder::new(&dir, stem, &storage.formats);

    let pattern = &settings.pattern;
    let context = MetadataBuilder::new()
        .experiment_name(&settings.application.name)
        .description("simulated beam scan")
        .parameter("pattern_type", format!("{:?}", pattern.shape).to_lowercase())
        .parameter("width", pattern.width)
        .parameter("height", pattern.height)
        .parameter("radius", pattern.radius)
        .parameter("step_x", pattern.step_x)
        .parameter("step_y", pattern.step_y)
        .software_version()
        .build();

    let progress =
        ObserverHandle::spawn(ProgressObserver::new(plan.len()), storage.observer_capacity);
    let outcome = rig
        .executor(settings.scan_parameters())
        .with_cancel(cancel)
        .with_context(context)
        .run(&plan, &mut recorder, Some(progress.channel()))
        .await
        .context("Scan rejected")?;
    if progress.join().await.is_err() {
        warn!("Progress observer panicked");
    }

    if let Some(summary) = &outcome.summary {
        println!(
            "Status:    {} ({} points in {:.1}s)",
            summary.status, summary.total_points, summary.duration_seconds
        );
        for artifact in &summary.artifacts {
            println!("Wrote:     {}", artifact.display());
        }
    }

    match outcome.fault {
        Some(fault) => Err(fault.into()),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level)),
        )
        .init();

    let result = match cli.command {
        Command::Config => toml::to_string_pretty(&settings)
            .map(|text| print!("{}", text))
            .context("Failed to render settings"),
        Command::Plan(pattern) => {
            pattern.apply(&mut settings)?;
            let rig = build_rig(&settings);
            let plan = build_plan(&rig, &settings)?;
            print_plan(&plan, &settings);
            Ok(())
        }
        Command::Simulate {
            pattern,
            output_dir,
        } => {
            pattern.apply(&mut settings)?;
            simulate(&settings, output_dir).await
        }
        Command::Boundaries { pattern, pause_ms } => {
            pattern.apply(&mut settings)?;
            let rig = build_rig(&settings);
            let extent = match settings.pattern.shape {
                PatternShape::Rectangle => (settings.pattern.width, settings.pattern.height),
                PatternShape::Circle => {
                    let diameter = 2.0 * settings.pattern.radius;
                    (diameter, diameter)
                }
            };
            info!("Testing boundaries of {} x {} mm", extent.0, extent.1);
            rig.test_boundaries(extent.0, extent.1, Duration::from_millis(pause_ms))
                .await
                .map_err(anyhow::Error::from)
        }
    };

    if let Err(err) = &result {
        error!("{:#}", err);
    }
    result
}
