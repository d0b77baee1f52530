// src/main.rs - Command-line entry point
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use lapse_rs::file_manager::FileManager;
use lapse_rs::{
    Config, GcodePositionSource, ProgressControl, ProgressUpdate, RunStatus, Stabilization, StabilizationError,
    StabilizationResults, TriggerType, load_config,
};

#[derive(Parser, Debug)]
#[command(name = "lapse", version, about = "Compute stabilized timelapse snapshot plans for a G-code file")]
struct Cli {
    /// G-code file to analyse
    gcode_file: String,
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
    /// Where to write the snapshot plans (JSON)
    #[arg(short, long)]
    output: Option<String>,
    /// Stabilization target X
    #[arg(long)]
    x: Option<f64>,
    /// Stabilization target Y
    #[arg(long)]
    y: Option<f64>,
    /// fast, compatibility, normal_quality or high_quality
    #[arg(long)]
    trigger_type: Option<TriggerType>,
    #[arg(long)]
    height_increment: Option<f64>,
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(x) = self.x {
            config.stabilization.x = x;
        }
        if let Some(y) = self.y {
            config.stabilization.y = y;
        }
        if let Some(trigger_type) = self.trigger_type {
            config.smart_layer.trigger_type = trigger_type;
        }
        if let Some(height_increment) = self.height_increment {
            config.stabilization.height_increment = height_increment;
        }
        if let Some(output) = &self.output {
            config.stabilization.output_path = output.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    tracing::info!("Starting lapse {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            load_config(path)?
        }
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    let file_manager = FileManager::new();
    let info = file_manager.file_info(&cli.gcode_file).await.map_err(|e| {
        tracing::error!("Cannot read G-code file: {}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    tracing::info!("G-code file: {} ({} bytes)", info.name, info.size);
    tracing::info!(
        "Target: ({}, {}), trigger type {:?}, height increment {}",
        config.stabilization.x,
        config.stabilization.y,
        config.smart_layer.trigger_type,
        config.stabilization.height_increment
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    let ctrl_c_flag = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, cancelling after the next progress update");
            ctrl_c_flag.store(true, Ordering::SeqCst);
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let progress_logger = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            tracing::info!(
                "{:5.1}% - {} gcodes, {} lines, {:.1}s elapsed, ~{:.1}s remaining",
                update.percent_complete,
                update.gcodes_processed,
                update.lines_processed,
                update.seconds_elapsed,
                update.seconds_remaining
            );
        }
    });

    let gcode_file = cli.gcode_file.clone();
    let run_config = config.clone();
    let results = tokio::task::spawn_blocking(move || -> Result<StabilizationResults, StabilizationError> {
        let mut source = GcodePositionSource::open(&gcode_file, run_config.position)?;
        let mut stabilization = Stabilization::from_config(run_config.stabilization, run_config.smart_layer)
            .with_progress(move |update: &ProgressUpdate| {
                // The logger may already be gone during shutdown
                let _ = progress_tx.send(*update);
                if cancelled.load(Ordering::SeqCst) {
                    ProgressControl::Cancel
                } else {
                    ProgressControl::Continue
                }
            });
        stabilization.process(&mut source)
    })
    .await?;

    let results = match results {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("Stabilization failed: {}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
        }
    };
    let _ = progress_logger.await;

    for warning in &results.warnings {
        tracing::warn!("{}", warning);
    }
    let written = file_manager.write_results(&config.stabilization.output_path, &results).await?;
    tracing::info!("Wrote {}", written.display());

    match &results.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Cancelled => {
            tracing::warn!("Run cancelled; {} partial snapshot plan(s) written", results.snapshot_plans.len());
            Ok(())
        }
        RunStatus::Aborted { error } => {
            tracing::error!("Run aborted: {}", error);
            Err(format!("stabilization aborted: {}", error).into())
        }
    }
}
