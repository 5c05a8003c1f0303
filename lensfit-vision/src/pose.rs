use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};
use crate::geometry::{centroid, Point};
use crate::landmarks::LandmarkSet;

/// Eye centers plus the distance and tilt between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePose {
    pub left_center: Point,
    pub right_center: Point,
    pub inter_eye_distance: f32,
    pub tilt_degrees: f32,
}

impl EyePose {
    pub fn from_centers(left_center: Point, right_center: Point) -> Result<Self> {
        let inter_eye_distance = left_center.distance(&right_center);
        if !inter_eye_distance.is_finite() || inter_eye_distance == 0.0 {
            return Err(VisionError::DegenerateGeometry {
                distance: inter_eye_distance,
            });
        }

        let tilt_degrees = (right_center.y - left_center.y)
            .atan2(right_center.x - left_center.x)
            .to_degrees();

        Ok(Self {
            left_center,
            right_center,
            inter_eye_distance,
            tilt_degrees,
        })
    }

    pub fn midpoint(&self) -> Point {
        self.left_center.midpoint(&self.right_center)
    }
}

/// Reduce eye contours to an [`EyePose`].
///
/// Mirrored captures (right eye left of the left eye) are not rejected;
/// the angle simply comes out near ±180°.
pub fn estimate_pose(landmarks: &LandmarkSet) -> Result<EyePose> {
    let left = centroid(&landmarks.left_eye)
        .ok_or(VisionError::InvalidLandmarks("left eye contour is empty"))?;
    let right = centroid(&landmarks.right_eye)
        .ok_or(VisionError::InvalidLandmarks("right eye contour is empty"))?;

    let pose = EyePose::from_centers(left, right)?;
    log::trace!(
        "eye pose: distance {:.2}px, tilt {:.2}deg",
        pose.inter_eye_distance,
        pose.tilt_degrees
    );
    Ok(pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single(left: (f32, f32), right: (f32, f32)) -> LandmarkSet {
        LandmarkSet::new(
            vec![Point::new(left.0, left.1)],
            vec![Point::new(right.0, right.1)],
        )
    }

    #[test]
    fn test_horizontal_eyes() {
        let pose = estimate_pose(&single((100.0, 150.0), (160.0, 150.0))).unwrap();
        assert!(pose.tilt_degrees.abs() < 1e-4);
        assert!((pose.inter_eye_distance - 60.0).abs() < 1e-4);
    }

    #[test]
    fn test_tilted_eyes() {
        let pose = estimate_pose(&single((100.0, 150.0), (160.0, 120.0))).unwrap();
        let expected = (-30f32).atan2(60.0).to_degrees();
        assert!((pose.tilt_degrees - expected).abs() < 1e-4);
        assert!((pose.tilt_degrees + 26.565).abs() < 1e-2);
    }

    #[test]
    fn test_contour_centers_are_means() {
        let landmarks = LandmarkSet::new(
            vec![
                Point::new(90.0, 145.0),
                Point::new(110.0, 145.0),
                Point::new(110.0, 155.0),
                Point::new(90.0, 155.0),
            ],
            vec![Point::new(150.0, 150.0), Point::new(170.0, 150.0)],
        );
        let pose = estimate_pose(&landmarks).unwrap();
        assert_eq!(pose.left_center, Point::new(100.0, 150.0));
        assert_eq!(pose.right_center, Point::new(160.0, 150.0));
    }

    #[test]
    fn test_empty_contour_is_invalid() {
        let landmarks = LandmarkSet::new(vec![], vec![Point::new(1.0, 1.0)]);
        assert!(matches!(
            estimate_pose(&landmarks),
            Err(VisionError::InvalidLandmarks(_))
        ));
    }

    #[test]
    fn test_coincident_eyes_are_degenerate() {
        let err = estimate_pose(&single((50.0, 50.0), (50.0, 50.0))).unwrap_err();
        assert!(matches!(err, VisionError::DegenerateGeometry { .. }));

        let err = estimate_pose(&single((f32::NAN, 50.0), (60.0, 50.0))).unwrap_err();
        assert!(matches!(err, VisionError::DegenerateGeometry { .. }));
    }

    #[test]
    fn test_mirrored_labels_are_accepted() {
        let pose = estimate_pose(&single((160.0, 150.0), (100.0, 150.0))).unwrap();
        assert!((pose.tilt_degrees.abs() - 180.0).abs() < 1e-4);
        assert!((pose.inter_eye_distance - 60.0).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn prop_distance_matches_centers(
            lx in -2000.0f32..2000.0, ly in -2000.0f32..2000.0,
            rx in -2000.0f32..2000.0, ry in -2000.0f32..2000.0,
        ) {
            prop_assume!((lx - rx).abs() > 1e-2 || (ly - ry).abs() > 1e-2);
            let landmarks = single((lx, ly), (rx, ry));
            let pose = estimate_pose(&landmarks).unwrap();
            prop_assert_eq!(pose.inter_eye_distance, pose.left_center.distance(&pose.right_center));
            prop_assert_eq!(pose, estimate_pose(&landmarks).unwrap());
        }
    }
}
