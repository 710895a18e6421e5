// Steering policy: one detection box + frame size -> motion commands
//
// Rules are checked in a fixed order and the first match wins:
//   1. box wider than `stop_width` of the frame        -> stop
//   2. center right of `hard_band` from the right edge  -> hard right turn, nudge
//   3. center left of `hard_band` from the left edge    -> hard left turn, nudge
//   4. center right of the centre dead zone             -> soft right turn, nudge
//   5. center left of the centre dead zone              -> soft left turn, nudge
//   6. centred                                          -> approach
// All comparisons are strict, so a value exactly on a threshold falls through
// to the next rule.

use crate::messages::{Direction, SteeringDecision};

use super::{BoundingBox, FrameGeometry};

/// Boxes may overshoot the frame edge by this many pixels (detector rounding)
const EDGE_TOLERANCE_PX: f64 = 1.0;

/// Thresholds and speeds of the steering policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringThresholds {
    /// Relative box width above which the target is too close
    pub stop_width: f64,
    /// Hard correction when the center is beyond this fraction from either edge
    pub hard_band: f64,
    /// Half-width of the centred dead zone, as a fraction of the frame width
    pub dead_zone: f64,
    pub hard_turn_speed: u8,
    pub soft_turn_speed: u8,
    pub nudge_speed: u8,
    pub approach_speed: u8,
}

impl Default for SteeringThresholds {
    fn default() -> Self {
        Self {
            stop_width: 0.4,
            hard_band: 0.25,
            dead_zone: 0.06,
            hard_turn_speed: 15,
            soft_turn_speed: 12,
            nudge_speed: 5,
            approach_speed: 15,
        }
    }
}

/// Which rule fired, named by where the target is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    TooClose,
    FarRight,
    FarLeft,
    Right,
    Left,
    Centered,
}

/// Commands for one cycle, in dispatch order
#[derive(Debug, Clone, PartialEq)]
pub struct SteeringPlan {
    pub branch: Branch,
    pub commands: Vec<SteeringDecision>,
}

impl SteeringPlan {
    /// Motion plans run for the dwell period and are then stopped
    pub fn needs_dwell(&self) -> bool {
        self.branch != Branch::TooClose
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Invalid frame size {width}x{height}")]
    InvalidFrame { width: f64, height: f64 },

    #[error("Invalid box {0:?}")]
    InvalidBox(BoundingBox),

    #[error("Box {bbox:?} does not fit a {width}x{height} frame")]
    OutsideFrame {
        bbox: BoundingBox,
        width: f64,
        height: f64,
    },
}

fn validate(bbox: &BoundingBox, frame: &FrameGeometry) -> Result<(), GeometryError> {
    let frame_ok = frame.width.is_finite()
        && frame.height.is_finite()
        && frame.width > 0.0
        && frame.height > 0.0;
    if !frame_ok {
        return Err(GeometryError::InvalidFrame {
            width: frame.width,
            height: frame.height,
        });
    }

    let coords = [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max];
    if !coords.iter().all(|c| c.is_finite()) || bbox.x_min > bbox.x_max || bbox.y_min > bbox.y_max {
        return Err(GeometryError::InvalidBox(*bbox));
    }

    let fits = bbox.x_min >= -EDGE_TOLERANCE_PX
        && bbox.y_min >= -EDGE_TOLERANCE_PX
        && bbox.x_max <= frame.width + EDGE_TOLERANCE_PX
        && bbox.y_max <= frame.height + EDGE_TOLERANCE_PX;
    if !fits {
        return Err(GeometryError::OutsideFrame {
            bbox: *bbox,
            width: frame.width,
            height: frame.height,
        });
    }
    Ok(())
}

/// Steering plan for a target box. Pure: same inputs, same plan.
pub fn decide(
    bbox: &BoundingBox,
    frame: &FrameGeometry,
    t: &SteeringThresholds,
) -> Result<SteeringPlan, GeometryError> {
    validate(bbox, frame)?;

    let width = frame.width;
    let center_x = bbox.center_x();
    let relative_width = bbox.width() / width;

    let branch = if relative_width > t.stop_width {
        Branch::TooClose
    } else if center_x > (1.0 - t.hard_band) * width {
        Branch::FarRight
    } else if center_x < t.hard_band * width {
        Branch::FarLeft
    } else if center_x > 0.5 * width + t.dead_zone * width {
        Branch::Right
    } else if center_x < 0.5 * width - t.dead_zone * width {
        Branch::Left
    } else {
        Branch::Centered
    };

    let nudge = SteeringDecision::new(Direction::Backward, t.nudge_speed);
    let commands = match branch {
        Branch::TooClose => vec![SteeringDecision::STOP],
        Branch::FarRight => vec![SteeringDecision::new(Direction::Right, t.hard_turn_speed), nudge],
        Branch::FarLeft => vec![SteeringDecision::new(Direction::Left, t.hard_turn_speed), nudge],
        Branch::Right => vec![SteeringDecision::new(Direction::Right, t.soft_turn_speed), nudge],
        Branch::Left => vec![SteeringDecision::new(Direction::Left, t.soft_turn_speed), nudge],
        Branch::Centered => vec![SteeringDecision::new(Direction::Backward, t.approach_speed)],
    };

    Ok(SteeringPlan { branch, commands })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(x_min: f64, x_max: f64) -> SteeringPlan {
        let frame = FrameGeometry::new(400.0, 300.0);
        decide(
            &BoundingBox::new(x_min, 100.0, x_max, 150.0),
            &frame,
            &SteeringThresholds::default(),
        )
        .unwrap()
    }

    fn d(direction: Direction, speed: u8) -> SteeringDecision {
        SteeringDecision::new(direction, speed)
    }

    #[test]
    fn test_too_close_stops() {
        // center_x = 200, relative width = 0.5
        let frame = FrameGeometry::new(400.0, 300.0);
        let p = decide(
            &BoundingBox::new(100.0, 100.0, 300.0, 200.0),
            &frame,
            &SteeringThresholds::default(),
        )
        .unwrap();
        assert_eq!(p.branch, Branch::TooClose);
        assert_eq!(p.commands, vec![SteeringDecision::STOP]);
        assert!(!p.needs_dwell());
    }

    #[test]
    fn test_far_left_object() {
        // center_x = 25 < 100, relative width = 0.125
        let frame = FrameGeometry::new(400.0, 300.0);
        let p = decide(
            &BoundingBox::new(0.0, 0.0, 50.0, 50.0),
            &frame,
            &SteeringThresholds::default(),
        )
        .unwrap();
        assert_eq!(p.branch, Branch::FarLeft);
        assert_eq!(p.commands, vec![d(Direction::Left, 15), d(Direction::Backward, 5)]);
        assert!(p.needs_dwell());
    }

    #[test]
    fn test_centered_approaches() {
        let p = plan(190.0, 210.0);
        assert_eq!(p.branch, Branch::Centered);
        assert_eq!(p.commands, vec![d(Direction::Backward, 15)]);
        assert!(p.needs_dwell());
    }

    #[test]
    fn test_far_right_object() {
        // center_x = 350
        let p = plan(340.0, 360.0);
        assert_eq!(p.branch, Branch::FarRight);
        assert_eq!(p.commands, vec![d(Direction::Right, 15), d(Direction::Backward, 5)]);
    }

    #[test]
    fn test_soft_bands() {
        // center_x = 260 > 224
        let p = plan(250.0, 270.0);
        assert_eq!(p.branch, Branch::Right);
        assert_eq!(p.commands, vec![d(Direction::Right, 12), d(Direction::Backward, 5)]);

        // center_x = 140 < 176
        let p = plan(130.0, 150.0);
        assert_eq!(p.branch, Branch::Left);
        assert_eq!(p.commands, vec![d(Direction::Left, 12), d(Direction::Backward, 5)]);
    }

    #[test]
    fn test_width_exactly_at_threshold_does_not_stop() {
        // width 160 / 400 = 0.4 exactly, centred
        let p = plan(120.0, 280.0);
        assert_eq!(p.branch, Branch::Centered);

        // Just over
        let p = plan(119.0, 281.0);
        assert_eq!(p.branch, Branch::TooClose);
    }

    #[test]
    fn test_center_on_hard_threshold_is_soft() {
        // center_x = 100 = 0.25 * width
        let p = plan(90.0, 110.0);
        assert_eq!(p.branch, Branch::Left);

        // center_x = 300 = 0.75 * width
        let p = plan(290.0, 310.0);
        assert_eq!(p.branch, Branch::Right);
    }

    #[test]
    fn test_deterministic() {
        for (x_min, x_max) in [(0.0, 50.0), (190.0, 210.0), (250.0, 270.0), (100.0, 300.0)] {
            assert_eq!(plan(x_min, x_max), plan(x_min, x_max));
        }
    }

    #[test]
    fn test_exactly_one_branch_per_position() {
        // Sweep the whole frame; every position yields one plan whose
        // commands match its branch
        for x in 0..=390 {
            let p = plan(x as f64, x as f64 + 10.0);
            let expected_len = match p.branch {
                Branch::TooClose | Branch::Centered => 1,
                _ => 2,
            };
            assert_eq!(p.commands.len(), expected_len, "x={x} branch={:?}", p.branch);
        }
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let t = SteeringThresholds::default();
        let bbox = BoundingBox::new(0.0, 0.0, 50.0, 50.0);

        assert!(matches!(
            decide(&bbox, &FrameGeometry::new(0.0, 300.0), &t),
            Err(GeometryError::InvalidFrame { .. })
        ));
        assert!(matches!(
            decide(&BoundingBox::new(60.0, 0.0, 50.0, 50.0), &FrameGeometry::new(400.0, 300.0), &t),
            Err(GeometryError::InvalidBox(_))
        ));
        // Box from a 640-wide frame checked against a 400-wide one
        assert!(matches!(
            decide(
                &BoundingBox::new(500.0, 0.0, 600.0, 50.0),
                &FrameGeometry::new(400.0, 300.0),
                &t
            ),
            Err(GeometryError::OutsideFrame { .. })
        ));
        assert!(matches!(
            decide(
                &BoundingBox::new(f64::NAN, 0.0, 50.0, 50.0),
                &FrameGeometry::new(400.0, 300.0),
                &t
            ),
            Err(GeometryError::InvalidBox(_))
        ));
    }

    #[test]
    fn test_edge_rounding_tolerated() {
        let t = SteeringThresholds::default();
        let frame = FrameGeometry::new(400.0, 300.0);
        assert!(decide(&BoundingBox::new(-0.5, 0.0, 40.0, 300.4), &frame, &t).is_ok());
    }
}
