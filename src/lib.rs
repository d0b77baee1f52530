// src/lib.rs - Timelapse stabilization engine
pub mod config;
pub mod file_manager;
pub mod gcode;
pub mod stabilization;

pub use config::{Config, ConfigError, load_config};
pub use gcode::{GcodePositionSource, Position, PositionConfig, PositionSource, SourceError};
pub use stabilization::smart_layer::{SmartLayerConfig, SmartLayerStrategy};
pub use stabilization::snapshot_plan::{SnapshotAction, SnapshotPlan, SnapshotPlanStep};
pub use stabilization::trigger_position::{PositionType, TriggerType};
pub use stabilization::{
    CoordinateResolver, ProgressControl, ProgressSink, ProgressUpdate, ResolverError, RunStatus, Stabilization,
    StabilizationConfig, StabilizationError, StabilizationResults, StabilizationStrategy, StabilizationTarget,
};
