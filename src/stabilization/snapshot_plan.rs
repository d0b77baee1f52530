// src/stabilization/snapshot_plan.rs - Travel-then-capture action lists
use serde::{Deserialize, Serialize};

use super::StabilizationTarget;
use super::trigger_position::{PositionType, TriggerPosition};
use crate::gcode::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotAction {
    Travel,
    Snapshot,
}

/// When the renderer should send the triggering command relative to the plan steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendParsedCommand {
    #[default]
    First,
    Last,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapshotPlanStep {
    pub action: SnapshotAction,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReturnPosition {
    pub x: f64,
    pub y: f64,
}

/// Which coordinate the travel step heads for before axis overrides apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatePolicy {
    /// The winning candidate's own (x, y)
    DetectedPoint,
    /// The configured stabilization target
    FixedTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotPlan {
    pub line_number: u64,
    pub gcode_number: u64,
    pub file_offset: u64,
    pub layer: u32,
    pub position_type: PositionType,
    pub distance_from_target: f64,
    pub triggering_position: Position,
    pub steps: Vec<SnapshotPlanStep>,
    pub return_position: ReturnPosition,
    pub send_parsed_command: SendParsedCommand,
}

impl SnapshotPlan {
    /// Build the plan for a finalized trigger position.
    ///
    /// Disabled axes always take the candidate's own coordinate, whatever the policy.
    pub fn from_trigger(
        trigger: &TriggerPosition,
        target: &StabilizationTarget,
        policy: CoordinatePolicy,
        layer: u32,
    ) -> Self {
        let position = &trigger.position;
        let (mut x, mut y) = match policy {
            CoordinatePolicy::DetectedPoint => (position.x, position.y),
            CoordinatePolicy::FixedTarget => (target.x, target.y),
        };
        if target.x_disabled {
            x = position.x;
        }
        if target.y_disabled {
            y = position.y;
        }

        Self {
            line_number: position.line_number,
            gcode_number: position.gcode_number,
            file_offset: position.file_offset,
            layer,
            position_type: trigger.position_type,
            distance_from_target: trigger.distance,
            triggering_position: position.clone(),
            steps: vec![
                SnapshotPlanStep { action: SnapshotAction::Travel, x, y },
                SnapshotPlanStep { action: SnapshotAction::Snapshot, x, y },
            ],
            return_position: ReturnPosition { x: position.x, y: position.y },
            send_parsed_command: SendParsedCommand::First,
        }
    }

    /// Coordinate the camera is triggered at.
    pub fn snapshot_coordinate(&self) -> Option<(f64, f64)> {
        self.steps
            .iter()
            .find(|step| step.action == SnapshotAction::Snapshot)
            .map(|step| (step.x, step.y))
    }
}
