// Perception boundary: frames in, detections out
//
// Frame capture and the detection model live outside this crate. They plug in
// through `FrameSource` and `Detector`; the loop only ever sees `Observation`s.

pub mod replay;
pub mod steering;

use serde::{Deserialize, Serialize};

pub use replay::{RecordedDetector, RecordedFrame, ReplaySource};
pub use steering::{decide, Branch, GeometryError, SteeringPlan, SteeringThresholds};

/// Axis-aligned box in frame pixel coordinates.
/// Serialized as `[x_min, y_min, x_max, y_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn center_x(&self) -> f64 {
        (self.x_max + self.x_min) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x_min, y_min, x_max, y_max]: [f64; 4]) -> Self {
        Self::new(x_min, y_min, x_max, y_max)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x_min, b.y_min, b.x_max, b.y_max]
    }
}

/// Size of the frame a detection's box is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: f64,
    pub height: f64,
}

impl FrameGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f64,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// Detector output for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub geometry: FrameGeometry,
    pub detections: Vec<Detection>,
}

#[derive(Debug, thiserror::Error)]
pub enum PerceptionError {
    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Detection failed: {0}")]
    Detect(String),

    /// The source has no more frames and never will
    #[error("Frame source closed")]
    SourceClosed,

    #[error("Replay IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Replay line {line}: {source}")]
    Replay {
        line: usize,
        source: serde_json::Error,
    },
}

/// Pull-based frame acquisition
pub trait FrameSource {
    type Frame;

    /// `Ok(None)` means no frame is available this cycle.
    /// `Err(SourceClosed)` ends the loop; any other error skips the cycle.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, PerceptionError>;
}

/// Object detector. May be slow; called once per cycle.
pub trait Detector<F> {
    fn detect(&mut self, frame: &F, targets: &[String]) -> Result<Observation, PerceptionError>;
}

/// Highest-scoring detection whose label is in `targets` (any label when
/// `targets` is empty) and whose score is at least `min_score`. Ties keep the
/// earlier detection; NaN scores never match.
pub fn select_best<'a>(
    detections: &'a [Detection],
    targets: &[String],
    min_score: f64,
) -> Option<&'a Detection> {
    let mut best: Option<&Detection> = None;
    for det in detections {
        let wanted = targets.is_empty() || targets.iter().any(|t| t == &det.label);
        let scored = det.score >= min_score;
        if !wanted || !scored {
            continue;
        }
        match best {
            Some(b) if b.score >= det.score => {}
            _ => best = Some(det),
        }
    }
    best
}
