//! Smart-layer stabilization.
//!
//! Every position between two layer boundaries is a potential trigger point.
//! The closest eligible extrusion and travel candidates to the stabilization
//! target are kept; when the layer ends exactly one plan is emitted from the
//! preferred slot, or none if both slots are empty.
//!
//! A reported layer change opens `LayerBoundaryPending`. The boundary is
//! confirmed by the next position: only then is the previous window
//! finalized, and the boundary position itself becomes the first candidate
//! of the new window. A boundary still pending at the end of the stream is
//! confirmed by the completion hook.

use serde::{Deserialize, Serialize};

use super::snapshot_plan::{CoordinatePolicy, SnapshotPlan};
use super::trigger_position::{TriggerPosition, TriggerPositions, TriggerType};
use super::{StabilizationStrategy, StabilizationTarget};
use crate::gcode::Position;

/// Feedrates closer than this count as the same speed.
const SPEED_TOLERANCE: f64 = 1e-4;
/// Keeps heights that sit exactly on an increment in that increment's bucket.
const HEIGHT_INCREMENT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SmartLayerConfig {
    #[serde(default)]
    pub trigger_type: TriggerType,
    /// Minimum qualifying extrusion feedrate, 0 disables the bound
    #[serde(default)]
    pub speed_threshold: f64,
    /// Maximum qualifying extrusion feedrate, 0 disables the bound
    #[serde(default)]
    pub max_speed_threshold: f64,
    /// On distance ties prefer the faster candidate instead of the first one
    #[serde(default)]
    pub snap_to_fastest: bool,
}

impl Default for SmartLayerConfig {
    fn default() -> Self {
        Self {
            trigger_type: TriggerType::default(),
            speed_threshold: 0.0,
            max_speed_threshold: 0.0,
            snap_to_fastest: false,
        }
    }
}

impl SmartLayerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.speed_threshold >= 0.0) {
            return Err("Speed threshold must be >= 0".to_string());
        }
        if !(self.max_speed_threshold >= 0.0) {
            return Err("Maximum speed threshold must be >= 0".to_string());
        }
        if self.max_speed_threshold > 0.0 && self.max_speed_threshold < self.speed_threshold {
            return Err("Maximum speed threshold must not be below the speed threshold".to_string());
        }
        Ok(())
    }

    /// True if an extrusion at `feedrate` falls inside the configured range.
    pub fn speed_qualifies(&self, feedrate: f64) -> bool {
        if self.speed_threshold > 0.0 && feedrate < self.speed_threshold {
            return false;
        }
        if self.max_speed_threshold > 0.0 && feedrate > self.max_speed_threshold {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Accumulating,
    LayerBoundaryPending,
}

pub struct SmartLayerStrategy {
    config: SmartLayerConfig,
    height_increment: f64,
    state: LayerState,
    /// Layer reported by the most recent position
    current_layer: u32,
    /// Layer the open window started on
    window_layer: u32,
    current_height_increment: u32,
    /// Layer-change position waiting for confirmation
    pending_boundary: Option<Position>,
    closest_positions: TriggerPositions,
    fastest_extrusion_speed: Option<f64>,
    slowest_extrusion_speed: Option<f64>,
}

impl SmartLayerStrategy {
    pub fn new(config: SmartLayerConfig, height_increment: f64) -> Self {
        Self {
            config,
            height_increment,
            state: LayerState::Accumulating,
            current_layer: 0,
            window_layer: 0,
            current_height_increment: 0,
            pending_boundary: None,
            closest_positions: TriggerPositions::new(),
            fastest_extrusion_speed: None,
            slowest_extrusion_speed: None,
        }
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn closest_positions(&self) -> &TriggerPositions {
        &self.closest_positions
    }

    /// True once two extrusion speeds further apart than the tolerance were seen in this window.
    pub fn has_multiple_extrusion_speeds(&self) -> bool {
        match (self.fastest_extrusion_speed, self.slowest_extrusion_speed) {
            (Some(fastest), Some(slowest)) => fastest - slowest > SPEED_TOLERANCE,
            _ => false,
        }
    }

    /// Does this position close the current window?
    fn detect_layer_boundary(&mut self, position: &Position) -> bool {
        if !position.is_layer_change {
            return false;
        }
        if self.height_increment > 0.0 {
            let increment = (position.height / self.height_increment - HEIGHT_INCREMENT_TOLERANCE).ceil();
            let increment = if increment > 0.0 { increment as u32 } else { 0 };
            if increment <= self.current_height_increment {
                return false;
            }
            self.current_height_increment = increment;
        }
        true
    }

    fn track_extrusion_speed(&mut self, feedrate: f64) {
        self.fastest_extrusion_speed = Some(self.fastest_extrusion_speed.map_or(feedrate, |f| f.max(feedrate)));
        self.slowest_extrusion_speed = Some(self.slowest_extrusion_speed.map_or(feedrate, |s| s.min(feedrate)));
    }

    fn evaluate(&mut self, target: &StabilizationTarget, position: &Position) {
        if position.is_extruding {
            self.track_extrusion_speed(position.f);
        }
        let Some(position_type) = self.config.trigger_type.classify(position) else {
            return;
        };
        if position_type.is_extrusion() && !self.config.speed_qualifies(position.f) {
            return;
        }

        let distance = target.distance_to(position.x, position.y);
        if self.closest_positions.is_closer(position_type, distance, position.f, self.config.snap_to_fastest) {
            self.closest_positions.replace(TriggerPosition::new(position_type, position.clone(), distance));
        }
    }

    fn finalize_window(&mut self, target: &StabilizationTarget, plans: &mut Vec<SnapshotPlan>) {
        // Nothing before the first layer is printed material
        if self.window_layer > 0 {
            if let Some(trigger) = self.closest_positions.best(self.config.trigger_type) {
                let policy = if self.has_multiple_extrusion_speeds() {
                    CoordinatePolicy::FixedTarget
                } else {
                    CoordinatePolicy::DetectedPoint
                };
                let plan = SnapshotPlan::from_trigger(trigger, target, policy, self.window_layer);
                add_plan(plans, plan);
            } else {
                tracing::debug!("No trigger position found for layer {}", self.window_layer);
            }
        }
        self.reset_saved_positions();
    }

    /// Close the previous window and start the one opened by the pending boundary.
    fn confirm_boundary(&mut self, target: &StabilizationTarget, plans: &mut Vec<SnapshotPlan>) {
        self.finalize_window(target, plans);
        self.window_layer = self.current_layer;
        self.state = LayerState::Accumulating;
        if let Some(boundary) = self.pending_boundary.take() {
            self.evaluate(target, &boundary);
        }
    }

    fn reset_saved_positions(&mut self) {
        self.closest_positions.clear();
        self.fastest_extrusion_speed = None;
        self.slowest_extrusion_speed = None;
    }
}

fn add_plan(plans: &mut Vec<SnapshotPlan>, plan: SnapshotPlan) {
    if let Some(last) = plans.last() {
        if plan.line_number <= last.line_number {
            tracing::warn!(
                "Dropping snapshot plan at line {}: not after previous plan at line {}",
                plan.line_number,
                last.line_number
            );
            return;
        }
    }
    tracing::debug!(
        "Snapshot plan for layer {} at line {} ({:?}, {:.3}mm from target)",
        plan.layer,
        plan.line_number,
        plan.position_type,
        plan.distance_from_target
    );
    plans.push(plan);
}

impl StabilizationStrategy for SmartLayerStrategy {
    fn validate(&self) -> Result<(), String> {
        self.config.validate()
    }

    fn process_position(
        &mut self,
        target: &StabilizationTarget,
        _previous: &Position,
        current: &Position,
        plans: &mut Vec<SnapshotPlan>,
    ) {
        if self.state == LayerState::LayerBoundaryPending {
            self.confirm_boundary(target, plans);
        }

        if self.detect_layer_boundary(current) {
            self.current_layer = current.layer;
            self.pending_boundary = Some(current.clone());
            self.state = LayerState::LayerBoundaryPending;
            return;
        }

        self.current_layer = current.layer;
        self.evaluate(target, current);
    }

    fn on_processing_complete(&mut self, target: &StabilizationTarget, plans: &mut Vec<SnapshotPlan>) {
        if self.state == LayerState::LayerBoundaryPending {
            self.confirm_boundary(target, plans);
        }
        self.finalize_window(target, plans);
    }
}
