//! Candidate trigger positions and the per-category "best so far" slots.
//!
//! One slot exists for extrusion candidates and one for travel candidates.
//! Which positions may enter a slot is decided by the configured
//! [`TriggerType`]:
//!
//! | trigger type     | extruding | retracted travel | unretracted travel | preferred slot |
//! |------------------|-----------|------------------|--------------------|----------------|
//! | `fast`           | yes       | yes              | yes                | extrusion      |
//! | `compatibility`  | yes       | yes              | no                 | extrusion      |
//! | `normal_quality` | yes       | yes              | no                 | travel         |
//! | `high_quality`   | no        | yes              | no                 | travel         |

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::gcode::Position;

/// Distances closer than this are treated as equal.
pub const DISTANCE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Fast,
    #[default]
    Compatibility,
    NormalQuality,
    HighQuality,
}

impl TriggerType {
    /// Category a position falls into under this trigger type, if it is eligible at all.
    pub fn classify(self, position: &Position) -> Option<PositionType> {
        if position.is_extruding {
            return match self {
                TriggerType::HighQuality => None,
                _ => Some(PositionType::Extrusion),
            };
        }
        if !position.has_xy_changed {
            return None;
        }
        if position.is_retracted {
            return Some(PositionType::RetractedTravel);
        }
        match self {
            TriggerType::Fast => Some(PositionType::Travel),
            _ => None,
        }
    }

    /// True when the travel slot wins over the extrusion slot at finalization.
    pub fn prefers_travel(self) -> bool {
        matches!(self, TriggerType::NormalQuality | TriggerType::HighQuality)
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(TriggerType::Fast),
            "compatibility" => Ok(TriggerType::Compatibility),
            "normal_quality" => Ok(TriggerType::NormalQuality),
            "high_quality" => Ok(TriggerType::HighQuality),
            other => Err(format!(
                "Unknown trigger type '{}' (expected fast, compatibility, normal_quality or high_quality)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Extrusion,
    RetractedTravel,
    /// Unretracted travel, only eligible under `fast`
    Travel,
}

impl PositionType {
    pub fn is_extrusion(self) -> bool {
        self == PositionType::Extrusion
    }
}

/// Best candidate seen so far for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerPosition {
    pub position_type: PositionType,
    pub position: Position,
    pub distance: f64,
    pub feedrate: f64,
}

impl TriggerPosition {
    pub fn new(position_type: PositionType, position: Position, distance: f64) -> Self {
        let feedrate = position.f;
        Self { position_type, position, distance, feedrate }
    }

    /// Would a candidate at `distance`/`feedrate` replace this one?
    pub fn is_beaten_by(&self, distance: f64, feedrate: f64, snap_to_fastest: bool) -> bool {
        if distance < self.distance - DISTANCE_TOLERANCE {
            return true;
        }
        let tied = (distance - self.distance).abs() <= DISTANCE_TOLERANCE;
        tied && snap_to_fastest && feedrate > self.feedrate
    }
}

/// The two live slots of an evaluation window.
#[derive(Debug, Clone, Default)]
pub struct TriggerPositions {
    extrusion: Option<TriggerPosition>,
    travel: Option<TriggerPosition>,
}

impl TriggerPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extrusion(&self) -> Option<&TriggerPosition> {
        self.extrusion.as_ref()
    }

    pub fn travel(&self) -> Option<&TriggerPosition> {
        self.travel.as_ref()
    }

    pub fn get(&self, position_type: PositionType) -> Option<&TriggerPosition> {
        if position_type.is_extrusion() { self.extrusion() } else { self.travel() }
    }

    /// True if a candidate would be accepted into its category's slot.
    pub fn is_closer(&self, position_type: PositionType, distance: f64, feedrate: f64, snap_to_fastest: bool) -> bool {
        match self.get(position_type) {
            None => true,
            Some(current) => current.is_beaten_by(distance, feedrate, snap_to_fastest),
        }
    }

    /// Replace the slot for the candidate's category.
    pub fn replace(&mut self, candidate: TriggerPosition) {
        if candidate.position_type.is_extrusion() {
            self.extrusion = Some(candidate);
        } else {
            self.travel = Some(candidate);
        }
    }

    /// Winning candidate, honoring the trigger type's slot preference.
    pub fn best(&self, trigger_type: TriggerType) -> Option<&TriggerPosition> {
        if trigger_type.prefers_travel() {
            self.travel().or(self.extrusion())
        } else {
            self.extrusion().or(self.travel())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extrusion.is_none() && self.travel.is_none()
    }

    pub fn clear(&mut self) {
        self.extrusion = None;
        self.travel = None;
    }
}
