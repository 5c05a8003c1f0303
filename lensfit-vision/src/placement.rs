use std::ops::RangeInclusive;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};
use crate::geometry::Point;
use crate::pose::EyePose;

/// Multipliers that keep typical frames inside the face. Not enforced.
pub const RECOMMENDED_SIZE_RANGE: RangeInclusive<f32> = 1.5..=3.5;
pub const DEFAULT_SIZE_MULTIPLIER: f32 = 2.5;

/// Eyewear artwork and its native pixel size.
#[derive(Debug, Clone)]
pub struct OverlaySpec {
    pub image: DynamicImage,
    pub native_width: u32,
    pub native_height: u32,
}

impl OverlaySpec {
    pub fn new(image: DynamicImage) -> Result<Self> {
        let (native_width, native_height) = image.dimensions();
        if native_width == 0 || native_height == 0 {
            return Err(VisionError::EmptyOverlay {
                width: native_width,
                height: native_height,
            });
        }
        Ok(Self {
            image,
            native_width,
            native_height,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).map_err(VisionError::ImageDecode)?;
        Self::new(image)
    }

    /// height / width
    pub fn aspect(&self) -> f32 {
        self.native_height as f32 / self.native_width as f32
    }
}

/// Where the overlay goes: an axis-aligned rectangle that is then rotated
/// by `rotation_degrees` about `pivot`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub pivot: Point,
    pub rotation_degrees: f32,
}

impl PlacementRect {
    /// Corners after rotation, clockwise from top-left.
    pub fn corners(&self) -> [Point; 4] {
        let theta = self.rotation_degrees.to_radians();
        [
            Point::new(self.x, self.y),
            Point::new(self.x + self.width, self.y),
            Point::new(self.x + self.width, self.y + self.height),
            Point::new(self.x, self.y + self.height),
        ]
        .map(|p| p.rotate_about(&self.pivot, theta))
    }

    /// Axis-aligned bounds of the rotated rectangle as `(min_x, min_y, max_x, max_y)`.
    pub fn rotated_bounds(&self) -> (f32, f32, f32, f32) {
        self.corners().iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}

/// Size the overlay from the eye distance and center it on the eye midpoint.
pub fn compute_placement(
    pose: &EyePose,
    overlay: &OverlaySpec,
    size_multiplier: f32,
) -> Result<PlacementRect> {
    if !size_multiplier.is_finite() || size_multiplier <= 0.0 {
        return Err(VisionError::InvalidSizeMultiplier(size_multiplier));
    }
    if !RECOMMENDED_SIZE_RANGE.contains(&size_multiplier) {
        log::debug!(
            "size multiplier {} outside recommended range {:?}",
            size_multiplier,
            RECOMMENDED_SIZE_RANGE
        );
    }

    let width = pose.inter_eye_distance * size_multiplier;
    let height = width * overlay.aspect();
    let pivot = pose.midpoint();

    Ok(PlacementRect {
        x: pivot.x - width / 2.0,
        y: pivot.y - height / 2.0,
        width,
        height,
        pivot,
        rotation_degrees: pose.tilt_degrees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn overlay(w: u32, h: u32) -> OverlaySpec {
        OverlaySpec::new(DynamicImage::new_rgba8(w, h)).unwrap()
    }

    fn pose(left: (f32, f32), right: (f32, f32)) -> EyePose {
        EyePose::from_centers(Point::new(left.0, left.1), Point::new(right.0, right.1)).unwrap()
    }

    #[test]
    fn test_scenario_sizes() {
        let p = pose((100.0, 150.0), (160.0, 150.0));
        let rect = compute_placement(&p, &overlay(200, 80), 2.5).unwrap();
        assert!((rect.width - 150.0).abs() < 1e-4);
        assert!((rect.height - 60.0).abs() < 1e-4);
        assert_eq!(rect.pivot, Point::new(130.0, 150.0));
        assert!((rect.x - 55.0).abs() < 1e-4);
        assert!((rect.y - 120.0).abs() < 1e-4);
        assert_eq!(rect.rotation_degrees, p.tilt_degrees);
    }

    #[test]
    fn test_rect_centered_on_pivot() {
        let p = pose((100.0, 150.0), (160.0, 120.0));
        let rect = compute_placement(&p, &overlay(300, 100), 2.0).unwrap();
        assert!((rect.x + rect.width / 2.0 - rect.pivot.x).abs() < 1e-3);
        assert!((rect.y + rect.height / 2.0 - rect.pivot.y).abs() < 1e-3);
        assert_eq!(rect.rotation_degrees, p.tilt_degrees);
    }

    #[test]
    fn test_recommended_extremes_are_positive() {
        let p = pose((100.0, 150.0), (160.0, 150.0));
        for m in [*RECOMMENDED_SIZE_RANGE.start(), *RECOMMENDED_SIZE_RANGE.end()] {
            let rect = compute_placement(&p, &overlay(200, 80), m).unwrap();
            assert!(rect.width > 0.0 && rect.height > 0.0);
        }
    }

    #[test]
    fn test_rejects_bad_multiplier() {
        let p = pose((0.0, 0.0), (10.0, 0.0));
        for m in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                compute_placement(&p, &overlay(10, 10), m),
                Err(VisionError::InvalidSizeMultiplier(_))
            ));
        }
        // Outside the recommended range is still accepted.
        assert!(compute_placement(&p, &overlay(10, 10), 6.0).is_ok());
    }

    #[test]
    fn test_empty_overlay() {
        assert!(matches!(
            OverlaySpec::new(DynamicImage::new_rgba8(0, 5)),
            Err(VisionError::EmptyOverlay { .. })
        ));
    }

    #[test]
    fn test_rotated_bounds() {
        let rect = PlacementRect {
            x: -10.0,
            y: -5.0,
            width: 20.0,
            height: 10.0,
            pivot: Point::new(0.0, 0.0),
            rotation_degrees: 90.0,
        };
        let (x0, y0, x1, y1) = rect.rotated_bounds();
        assert!((x0 + 5.0).abs() < 1e-4);
        assert!((x1 - 5.0).abs() < 1e-4);
        assert!((y0 + 10.0).abs() < 1e-4);
        assert!((y1 - 10.0).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn prop_aspect_preserved(
            w in 1u32..400, h in 1u32..400,
            m in 0.01f32..20.0,
            dist in 1.0f32..500.0,
        ) {
            let p = pose((0.0, 0.0), (dist, 0.0));
            let ov = overlay(w, h);
            let rect = compute_placement(&p, &ov, m).unwrap();
            let expected = w as f32 / h as f32;
            let actual = rect.width / rect.height;
            prop_assert!(((actual - expected) / expected).abs() < 1e-4);
        }
    }
}
