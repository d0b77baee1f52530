// src/gcode/position.rs - Machine state after each command
use serde::{Deserialize, Serialize};

use super::parser::ParsedCommand;

const XY_TOLERANCE: f64 = 1e-9;
const E_TOLERANCE: f64 = 1e-9;

/// Tracker settings that depend on the printer/slicer, not on the file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PositionConfig {
    /// Retraction length above which the extruder counts as retracted (mm)
    #[serde(default = "default_retraction_tolerance")]
    pub retraction_tolerance: f64,
    /// Minimum Z increase on an extruding move that starts a new layer (mm)
    #[serde(default = "default_layer_height_tolerance")]
    pub layer_height_tolerance: f64,
    /// Filament length withdrawn by a firmware retract (G10)
    #[serde(default = "default_firmware_retraction_length")]
    pub firmware_retraction_length: f64,
    /// Whether G90/G91 also switch the extruder between absolute and relative
    #[serde(default = "default_g90_influences_extruder")]
    pub g90_influences_extruder: bool,
    #[serde(default)]
    pub relative_extrusion: bool,
    #[serde(default)]
    pub home_x: f64,
    #[serde(default)]
    pub home_y: f64,
    #[serde(default)]
    pub home_z: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            retraction_tolerance: default_retraction_tolerance(),
            layer_height_tolerance: default_layer_height_tolerance(),
            firmware_retraction_length: default_firmware_retraction_length(),
            g90_influences_extruder: default_g90_influences_extruder(),
            relative_extrusion: false,
            home_x: 0.0,
            home_y: 0.0,
            home_z: 0.0,
        }
    }
}

impl PositionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.retraction_tolerance >= 0.0) {
            return Err("Retraction tolerance must be >= 0".to_string());
        }
        if !(self.layer_height_tolerance >= 0.0) {
            return Err("Layer height tolerance must be >= 0".to_string());
        }
        if !(self.firmware_retraction_length >= 0.0) {
            return Err("Firmware retraction length must be >= 0".to_string());
        }
        Ok(())
    }
}

fn default_retraction_tolerance() -> f64 { 0.0001 }
fn default_layer_height_tolerance() -> f64 { 0.0001 }
fn default_firmware_retraction_length() -> f64 { 1.0 }
fn default_g90_influences_extruder() -> bool { true }

/// Immutable snapshot of machine state after one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Extruder axis position
    pub e: f64,
    /// Raw change of the extruder axis caused by this command
    pub e_delta: f64,
    /// Material deposited by this command, after un-retraction was consumed
    pub extrusion_length: f64,
    /// Modal feedrate (mm/min)
    pub f: f64,
    pub is_extruding: bool,
    pub is_travel: bool,
    pub is_retracted: bool,
    pub retraction_length: f64,
    pub has_xy_changed: bool,
    pub layer: u32,
    /// Z of the most recent layer
    pub height: f64,
    pub is_layer_change: bool,
    /// 1-based line in the source file
    pub line_number: u64,
    /// 1-based index among lines that carried a command
    pub gcode_number: u64,
    /// Byte offset of the start of the line
    pub file_offset: u64,
    pub command: String,
}

/// Folds parsed commands into Position records.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    config: PositionConfig,
    current: Position,
    xyz_relative: bool,
    e_relative: bool,
    gcode_number: u64,
}

impl PositionTracker {
    pub fn new(config: PositionConfig) -> Self {
        let e_relative = config.relative_extrusion;
        Self {
            config,
            current: Position::default(),
            xyz_relative: false,
            e_relative,
            gcode_number: 0,
        }
    }

    pub fn current(&self) -> &Position {
        &self.current
    }

    /// Apply one command and return the resulting state.
    pub fn update(&mut self, cmd: &ParsedCommand, line_number: u64, file_offset: u64) -> Position {
        self.gcode_number += 1;

        let mut next = self.current.clone();
        next.e_delta = 0.0;
        next.extrusion_length = 0.0;
        next.is_extruding = false;
        next.is_travel = false;
        next.has_xy_changed = false;
        next.is_layer_change = false;
        next.line_number = line_number;
        next.gcode_number = self.gcode_number;
        next.file_offset = file_offset;
        next.command.clone_from(&cmd.name);

        match cmd.name.as_str() {
            "G0" | "G1" | "G2" | "G3" => self.apply_move(cmd, &mut next),
            "G90" => {
                self.xyz_relative = false;
                if self.config.g90_influences_extruder {
                    self.e_relative = false;
                }
            }
            "G91" => {
                self.xyz_relative = true;
                if self.config.g90_influences_extruder {
                    self.e_relative = true;
                }
            }
            "M82" => self.e_relative = false,
            "M83" => self.e_relative = true,
            "G92" => Self::apply_set_position(cmd, &mut next),
            "G28" => self.apply_home(cmd, &mut next),
            "G10" => {
                if next.retraction_length <= self.config.retraction_tolerance {
                    next.retraction_length = self.config.firmware_retraction_length;
                }
            }
            "G11" => next.retraction_length = 0.0,
            _ => {}
        }

        next.is_retracted = next.retraction_length > self.config.retraction_tolerance;
        self.current = next.clone();
        next
    }

    fn apply_move(&self, cmd: &ParsedCommand, next: &mut Position) {
        let prev = &self.current;
        let axis = |letter: char, current: f64| match cmd.get(letter) {
            Some(v) if self.xyz_relative => current + v,
            Some(v) => v,
            None => current,
        };
        next.x = axis('X', prev.x);
        next.y = axis('Y', prev.y);
        next.z = axis('Z', prev.z);
        if let Some(f) = cmd.get('F') {
            next.f = f;
        }

        if let Some(e) = cmd.get('E') {
            next.e_delta = if self.e_relative { e } else { e - prev.e };
            next.e = prev.e + next.e_delta;
        }

        next.has_xy_changed =
            (next.x - prev.x).abs() > XY_TOLERANCE || (next.y - prev.y).abs() > XY_TOLERANCE;

        if next.e_delta < -E_TOLERANCE {
            next.retraction_length += -next.e_delta;
        } else if next.e_delta > E_TOLERANCE {
            let consumed = next.e_delta.min(next.retraction_length);
            next.retraction_length -= consumed;
            next.extrusion_length = next.e_delta - consumed;
        }

        next.is_extruding = next.has_xy_changed && next.extrusion_length > E_TOLERANCE;
        next.is_travel = next.has_xy_changed && !next.is_extruding;

        if next.is_extruding && next.z > next.height + self.config.layer_height_tolerance {
            next.height = next.z;
            next.layer += 1;
            next.is_layer_change = true;
        }
    }

    fn apply_set_position(cmd: &ParsedCommand, next: &mut Position) {
        if cmd.parameters.is_empty() {
            next.x = 0.0;
            next.y = 0.0;
            next.z = 0.0;
            next.e = 0.0;
            return;
        }
        if let Some(x) = cmd.get('X') {
            next.x = x;
        }
        if let Some(y) = cmd.get('Y') {
            next.y = y;
        }
        if let Some(z) = cmd.get('Z') {
            next.z = z;
        }
        if let Some(e) = cmd.get('E') {
            next.e = e;
        }
    }

    fn apply_home(&self, cmd: &ParsedCommand, next: &mut Position) {
        let all = !(cmd.has('X') || cmd.has('Y') || cmd.has('Z'));
        if all || cmd.has('X') {
            next.x = self.config.home_x;
        }
        if all || cmd.has('Y') {
            next.y = self.config.home_y;
        }
        if all || cmd.has('Z') {
            next.z = self.config.home_z;
        }
    }
}
