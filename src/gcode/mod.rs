// src/gcode/mod.rs
pub mod parser;
pub mod position;
pub mod source;


pub use parser::{GCodeError, GCodeParser, GCodeSpan, GCodeToken, ParsedCommand};
pub use position::{Position, PositionConfig, PositionTracker};
pub use source::{GcodePositionSource, PositionSource, SourceError};
