// src/stabilization/mod.rs - Stabilization driver and strategy contract
//
// The driver pulls Positions from a PositionSource one at a time, hands each
// (previous, current) pair to the active strategy, reports progress, and
// collects the emitted snapshot plans into StabilizationResults.
pub mod smart_layer;
pub mod snapshot_plan;
pub mod trigger_position;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

use crate::gcode::{Position, PositionSource, SourceError};
use smart_layer::{SmartLayerConfig, SmartLayerStrategy};
use snapshot_plan::SnapshotPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationType {
    #[default]
    SmartLayer,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StabilizationConfig {
    #[serde(rename = "type", default)]
    pub stabilization_type: StabilizationType,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Use the detected point's own X instead of the target
    #[serde(default)]
    pub x_disabled: bool,
    #[serde(default)]
    pub y_disabled: bool,
    /// Layer-change bucket size in mm, 0 means every layer
    #[serde(default)]
    pub height_increment: f64,
    #[serde(default = "default_notification_period")]
    pub notification_period_seconds: f64,
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

fn default_notification_period() -> f64 {
    0.25
}

fn default_output_path() -> String {
    "snapshot_plans.json".to_string()
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            stabilization_type: StabilizationType::default(),
            x: 0.0,
            y: 0.0,
            x_disabled: false,
            y_disabled: false,
            height_increment: 0.0,
            notification_period_seconds: default_notification_period(),
            output_path: default_output_path(),
        }
    }
}

impl StabilizationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err("Stabilization target coordinates must be finite".to_string());
        }
        if !(self.height_increment >= 0.0) || !self.height_increment.is_finite() {
            return Err("Height increment must be a finite value >= 0".to_string());
        }
        if !(self.notification_period_seconds >= 0.0) || !self.notification_period_seconds.is_finite() {
            return Err("Notification period must be a finite value >= 0".to_string());
        }
        if self.output_path.trim().is_empty() {
            return Err("Output path must not be empty".to_string());
        }
        Ok(())
    }
}

/// The coordinate candidates are measured against for the current position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizationTarget {
    pub x: f64,
    pub y: f64,
    pub x_disabled: bool,
    pub y_disabled: bool,
}

impl StabilizationTarget {
    pub fn from_config(config: &StabilizationConfig) -> Self {
        Self {
            x: config.x,
            y: config.y,
            x_disabled: config.x_disabled,
            y_disabled: config.y_disabled,
        }
    }

    /// Euclidean distance in the XY plane.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (x - self.x).hypot(y - self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub percent_complete: f64,
    pub seconds_elapsed: f64,
    pub seconds_remaining: f64,
    pub gcodes_processed: u64,
    pub lines_processed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressControl {
    Continue,
    Cancel,
}

/// Receives periodic progress; returning `Cancel` stops the run early.
pub trait ProgressSink {
    fn notify(&mut self, update: &ProgressUpdate) -> ProgressControl;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressUpdate) -> ProgressControl,
{
    fn notify(&mut self, update: &ProgressUpdate) -> ProgressControl {
        self(update)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Coordinate resolver failed: {0}")]
pub struct ResolverError(pub String);

/// Computes the stabilization target externally, given the configured (x, y).
///
/// Installing a resolver on a `Stabilization` opts the run in: it is then
/// consulted for every position, whatever the axis flags say. Runs without
/// one use the configured target unchanged.
pub trait CoordinateResolver {
    fn resolve(&mut self, x: f64, y: f64) -> Result<(f64, f64), ResolverError>;
}

impl<F> CoordinateResolver for F
where
    F: FnMut(f64, f64) -> Result<(f64, f64), ResolverError>,
{
    fn resolve(&mut self, x: f64, y: f64) -> Result<(f64, f64), ResolverError> {
        self(x, y)
    }
}

/// Contract between the driver and a trigger strategy.
pub trait StabilizationStrategy {
    /// Reject strategy settings before any input is read.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Evaluate one step of the stream. Plans are appended to `plans`.
    fn process_position(
        &mut self,
        target: &StabilizationTarget,
        previous: &Position,
        current: &Position,
        plans: &mut Vec<SnapshotPlan>,
    );

    /// Flush any window still open at the end of the stream.
    fn on_processing_complete(&mut self, target: &StabilizationTarget, plans: &mut Vec<SnapshotPlan>);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Completed,
    Cancelled,
    Aborted {
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StabilizationResults {
    pub status: RunStatus,
    pub snapshot_plans: Vec<SnapshotPlan>,
    pub lines_processed: u64,
    pub gcodes_processed: u64,
    pub malformed_lines: u64,
    pub seconds_elapsed: f64,
    pub warnings: Vec<String>,
}

impl StabilizationResults {
    /// The run stopped before the end of the input.
    pub fn is_partial(&self) -> bool {
        !matches!(self.status, RunStatus::Completed)
    }
}

#[derive(Debug, Error)]
pub enum StabilizationError {
    #[error("Setup error: {0}")]
    Setup(#[from] SourceError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub struct Stabilization<'a> {
    config: StabilizationConfig,
    strategy: Box<dyn StabilizationStrategy + 'a>,
    progress: Option<Box<dyn ProgressSink + 'a>>,
    resolver: Option<Box<dyn CoordinateResolver + 'a>>,
}

impl<'a> Stabilization<'a> {
    pub fn new(config: StabilizationConfig, strategy: Box<dyn StabilizationStrategy + 'a>) -> Self {
        Self {
            config,
            strategy,
            progress: None,
            resolver: None,
        }
    }

    /// Build the driver with the strategy selected by `stabilization.type`.
    pub fn from_config(stabilization: StabilizationConfig, smart_layer: SmartLayerConfig) -> Self {
        let strategy: Box<dyn StabilizationStrategy + 'a> = match stabilization.stabilization_type {
            StabilizationType::SmartLayer => {
                Box::new(SmartLayerStrategy::new(smart_layer, stabilization.height_increment))
            }
        };
        Self::new(stabilization, strategy)
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'a) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn with_coordinate_resolver(mut self, resolver: impl CoordinateResolver + 'a) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Run the whole input through the strategy.
    ///
    /// Only setup problems are returned as `Err`. Failures once the stream is
    /// running end the run with `RunStatus::Aborted` and keep the plans found so far.
    pub fn process<P: PositionSource + ?Sized>(
        &mut self,
        source: &mut P,
    ) -> Result<StabilizationResults, StabilizationError> {
        self.config.validate().map_err(StabilizationError::InvalidConfig)?;
        self.strategy.validate().map_err(StabilizationError::InvalidConfig)?;
        let total_size = source.total_size()?;
        tracing::info!(
            "Starting {:?} stabilization ({} bytes, target {:.3}, {:.3})",
            self.config.stabilization_type,
            total_size,
            self.config.x,
            self.config.y
        );

        let start = Instant::now();
        let mut last_notification = start;
        let mut results = StabilizationResults::default();
        let mut target = StabilizationTarget::from_config(&self.config);
        let mut previous = Position::default();

        loop {
            let current = match source.next_position() {
                Ok(Some(position)) => position,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Reading position failed after line {}: {}", source.lines_read(), e);
                    results.status = RunStatus::Aborted { error: e.to_string() };
                    break;
                }
            };
            results.gcodes_processed += 1;
            results.lines_processed = source.lines_read();

            if let Some(resolver) = self.resolver.as_mut() {
                match resolver.resolve(self.config.x, self.config.y) {
                    Ok((x, y)) => {
                        target.x = x;
                        target.y = y;
                    }
                    Err(e) => {
                        tracing::error!("Stopping at line {}: {}", current.line_number, e);
                        results.status = RunStatus::Aborted { error: e.to_string() };
                        break;
                    }
                }
            }

            self.strategy.process_position(&target, &previous, &current, &mut results.snapshot_plans);
            previous = current;

            if last_notification.elapsed().as_secs_f64() >= self.config.notification_period_seconds {
                last_notification = Instant::now();
                let update = progress_update(&results, source.bytes_read(), total_size, start);
                if self.notify(&update) == ProgressControl::Cancel {
                    tracing::warn!("Cancelled at {:.1}% (line {})", update.percent_complete, results.lines_processed);
                    results.status = RunStatus::Cancelled;
                    break;
                }
            }
        }

        // An aborted run keeps its plans but never flushes the open window
        if !matches!(results.status, RunStatus::Aborted { .. }) {
            self.strategy.on_processing_complete(&target, &mut results.snapshot_plans);
        }

        results.lines_processed = source.lines_read();
        results.malformed_lines = source.malformed_lines();
        results.seconds_elapsed = start.elapsed().as_secs_f64();
        if results.malformed_lines > 0 {
            results.warnings.push(format!("Skipped {} malformed line(s)", results.malformed_lines));
        }

        if results.status == RunStatus::Completed {
            let mut update = progress_update(&results, source.bytes_read(), total_size, start);
            update.percent_complete = 100.0;
            update.seconds_remaining = 0.0;
            self.notify(&update);
        }

        tracing::info!(
            "Stabilization finished ({:?}): {} snapshot plan(s), {} line(s), {} gcode(s) in {:.3}s",
            results.status,
            results.snapshot_plans.len(),
            results.lines_processed,
            results.gcodes_processed,
            results.seconds_elapsed
        );
        Ok(results)
    }

    fn notify(&mut self, update: &ProgressUpdate) -> ProgressControl {
        match self.progress.as_mut() {
            Some(sink) => sink.notify(update),
            None => ProgressControl::Continue,
        }
    }
}

fn progress_update(results: &StabilizationResults, bytes_read: u64, total_size: u64, start: Instant) -> ProgressUpdate {
    let percent_complete = if total_size == 0 {
        100.0
    } else {
        (bytes_read as f64 / total_size as f64 * 100.0).clamp(0.0, 100.0)
    };
    let seconds_elapsed = start.elapsed().as_secs_f64();
    let seconds_remaining = if percent_complete > 0.0 {
        seconds_elapsed * (100.0 - percent_complete) / percent_complete
    } else {
        0.0
    };
    ProgressUpdate {
        percent_complete,
        seconds_elapsed,
        seconds_remaining,
        gcodes_processed: results.gcodes_processed,
        lines_processed: results.lines_processed,
    }
}
