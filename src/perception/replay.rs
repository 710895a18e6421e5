// Recorded observations played back as a frame source
//
// One JSON object per line:
//   {"width":400,"height":300,"detections":[{"label":"a bottle","score":0.8,"box":[0,0,50,50]}]}
// A line containing `null` stands for a cycle where capture produced no frame.
// Blank lines are skipped. End of input closes the source.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Detection, Detector, FrameGeometry, FrameSource, Observation, PerceptionError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

pub struct ReplaySource<R> {
    reader: R,
    line_no: usize,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PerceptionError> {
        let path = path.as_ref();
        info!("Replaying observations from {}", path.display());
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> FrameSource for ReplaySource<R> {
    type Frame = RecordedFrame;

    fn next_frame(&mut self) -> Result<Option<RecordedFrame>, PerceptionError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                debug!("Replay finished after {} lines", self.line_no);
                return Err(PerceptionError::SourceClosed);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                break;
            }
        }
        serde_json::from_str::<Option<RecordedFrame>>(line.trim()).map_err(|source| {
            PerceptionError::Replay {
                line: self.line_no,
                source,
            }
        })
    }
}

/// Returns the detections stored in a recorded frame
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedDetector;

impl Detector<RecordedFrame> for RecordedDetector {
    fn detect(
        &mut self,
        frame: &RecordedFrame,
        targets: &[String],
    ) -> Result<Observation, PerceptionError> {
        let detections = frame
            .detections
            .iter()
            .filter(|d| targets.is_empty() || targets.contains(&d.label))
            .cloned()
            .collect();
        Ok(Observation {
            geometry: FrameGeometry::new(frame.width, frame.height),
            detections,
        })
    }
}
