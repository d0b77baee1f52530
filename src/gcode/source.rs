// src/gcode/source.rs - Sequential producers of Position records
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::parser::ParsedCommand;
use super::position::{Position, PositionConfig, PositionTracker};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Cannot access '{}': {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can feed the stabilization driver one Position at a time.
pub trait PositionSource {
    /// Total input size in bytes, requested once before the run starts.
    fn total_size(&mut self) -> Result<u64, SourceError>;

    /// Next Position, or `None` once the input is exhausted.
    fn next_position(&mut self) -> Result<Option<Position>, SourceError>;

    /// Bytes consumed so far; compared against `total_size` for progress.
    fn bytes_read(&self) -> u64;

    fn lines_read(&self) -> u64;

    /// Lines skipped because they could not be parsed.
    fn malformed_lines(&self) -> u64 {
        0
    }
}

/// Reads G-code text line by line and tracks machine state.
pub struct GcodePositionSource<R: BufRead> {
    reader: R,
    tracker: PositionTracker,
    total_size: u64,
    bytes_read: u64,
    lines_read: u64,
    malformed_lines: u64,
    line: Vec<u8>,
}

impl GcodePositionSource<BufReader<File>> {
    /// Open and size a G-code file.
    pub fn open(path: impl AsRef<Path>, config: PositionConfig) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let access_error = |source| SourceError::FileAccess { path: path.to_path_buf(), source };
        let file = File::open(path).map_err(access_error)?;
        let total_size = file.metadata().map_err(access_error)?.len();
        tracing::info!("Opened G-code file: {} ({} bytes)", path.display(), total_size);
        Ok(Self::from_reader(BufReader::new(file), total_size, config))
    }
}

impl<R: BufRead> GcodePositionSource<R> {
    pub fn from_reader(reader: R, total_size: u64, config: PositionConfig) -> Self {
        Self {
            reader,
            tracker: PositionTracker::new(config),
            total_size,
            bytes_read: 0,
            lines_read: 0,
            malformed_lines: 0,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead> PositionSource for GcodePositionSource<R> {
    fn total_size(&mut self) -> Result<u64, SourceError> {
        Ok(self.total_size)
    }

    fn next_position(&mut self) -> Result<Option<Position>, SourceError> {
        loop {
            self.line.clear();
            let read = self.reader.read_until(b'\n', &mut self.line)?;
            if read == 0 {
                return Ok(None);
            }
            let file_offset = self.bytes_read;
            self.bytes_read += read as u64;
            self.lines_read += 1;

            let text = String::from_utf8_lossy(&self.line);
            match ParsedCommand::parse(text.trim_end()) {
                Ok(Some(cmd)) => {
                    return Ok(Some(self.tracker.update(&cmd, self.lines_read, file_offset)));
                }
                Ok(None) => {}
                Err(e) => {
                    self.malformed_lines += 1;
                    tracing::debug!("Skipping line {}: {}", self.lines_read, e);
                }
            }
        }
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn lines_read(&self) -> u64 {
        self.lines_read
    }

    fn malformed_lines(&self) -> u64 {
        self.malformed_lines
    }
}
