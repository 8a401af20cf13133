//! Recorded frames loaded from a dump file

use crate::{Result, SimulatorError};
use hub_protocol::{encode_frame, parse_record};
use std::path::Path;
use tracing::{info, warn};

/// One frame ready to go on the wire
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    /// Line of the dump file it came from (0-based)
    pub sequence: usize,
    pub bytes: Vec<u8>,
}

/// Frames replayed to every client, in file order
#[derive(Debug, Clone, Default)]
pub struct Recording {
    frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn new(frames: Vec<RecordedFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `index`, wrapping around at the end
    pub fn cycle(&self, index: usize) -> Option<&RecordedFrame> {
        if self.frames.is_empty() {
            None
        } else {
            self.frames.get(index % self.frames.len())
        }
    }

    /// Build a recording from dump text; malformed lines are skipped
    pub fn parse(text: &str) -> Self {
        let mut frames = Vec::new();
        for (sequence, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_record(line) {
                Ok(frame) => frames.push(RecordedFrame {
                    sequence,
                    bytes: encode_frame(&frame),
                }),
                Err(e) => warn!("Skipping line {}: {}", sequence + 1, e),
            }
        }
        Self { frames }
    }
}

/// Load a dump file, failing if it holds no usable frame
pub async fn load_recording(path: &Path) -> Result<Recording> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SimulatorError::Recording {
            path: path.to_path_buf(),
            source,
        })?;

    let recording = Recording::parse(&text);
    if recording.is_empty() {
        return Err(SimulatorError::EmptyRecording(path.to_path_buf()));
    }
    info!("Loaded {} frames from {}", recording.len(), path.display());
    Ok(recording)
}
