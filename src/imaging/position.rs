//! Placement geometry.
//!
//! All functions here are pure integer/float arithmetic, testable without
//! any image.
//!
//! Two modes decide where a crop window (or a smaller image on a larger
//! canvas) sits:
//!
//! - **Anchors** ([`Position`]): one of nine named alignments. Offsets are
//!   *not* clamped; a target larger than the container yields negative
//!   offsets, which padding/containment callers simply ignore.
//! - **Focal point**: a fractional `(x, y)` inside the original image that
//!   should end up as close to the middle of the crop window as the image
//!   bounds allow. Offsets are always clamped so the window stays inside
//!   the image.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named alignment within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Centre,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

/// Calculate the `(left, top)` offset of an `in`-sized box within an
/// `out`-sized container.
///
/// Division truncates toward zero, so odd deltas round toward the top-left
/// and negative deltas round toward zero.
///
/// ```
/// # use pixelsmith::imaging::{Position, calculate_position};
/// assert_eq!(calculate_position(50, 50, 100, 100, Position::Centre), (25, 25));
/// assert_eq!(calculate_position(50, 50, 100, 100, Position::Right), (50, 25));
/// ```
pub fn calculate_position(
    in_width: i32,
    in_height: i32,
    out_width: i32,
    out_height: i32,
    pos: Position,
) -> (i32, i32) {
    let dx = out_width - in_width;
    let dy = out_height - in_height;
    match pos {
        Position::TopLeft => (0, 0),
        Position::Top => (dx / 2, 0),
        Position::TopRight => (dx, 0),
        Position::Left => (0, dy / 2),
        Position::Centre => (dx / 2, dy / 2),
        Position::Right => (dx, dy / 2),
        Position::BottomLeft => (0, dy),
        Position::Bottom => (dx / 2, dy),
        Position::BottomRight => (dx, dy),
    }
}

/// Calculate the `(left, top)` crop offset that keeps a focal point centred.
///
/// `fpx`/`fpy` are fractions of the original `in_width`×`in_height` image.
/// The uniform shrink factor the resize step used is recovered as
/// `min(in_width / target_width, in_height / target_height)`, the focal point
/// is mapped into the resized `image_width`×`image_height` space with it, and
/// the window offset is rounded half away from zero, then clamped to
/// `[0, image - target]`.
///
/// When the image is smaller than the target on an axis the upper bound is
/// negative; the offset on that axis is 0.
#[allow(clippy::too_many_arguments)]
pub fn calculate_focal_point(
    fpx: f64,
    fpy: f64,
    in_width: i32,
    in_height: i32,
    target_width: i32,
    target_height: i32,
    image_width: i32,
    image_height: i32,
) -> (i32, i32) {
    let ratio_x = in_width as f64 / target_width as f64;
    let ratio_y = in_height as f64 / target_height as f64;
    let factor = ratio_x.min(ratio_y);

    let center_x = (fpx * in_width as f64) / factor;
    let center_y = (fpy * in_height as f64) / factor;

    let left = (center_x - target_width as f64 / 2.0).round() as i32;
    let top = (center_y - target_height as f64 / 2.0).round() as i32;

    (
        clamp_offset(left, image_width - target_width),
        clamp_offset(top, image_height - target_height),
    )
}

fn clamp_offset(offset: i32, max: i32) -> i32 {
    offset.min(max).max(0)
}

/// Where a crop window is anchored: a named position or a focal point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gravity {
    Anchor(Position),
    /// Fractional coordinates in `[0, 1]` within the original image.
    FocalPoint { x: f64, y: f64 },
}

impl Default for Gravity {
    fn default() -> Self {
        Gravity::Anchor(Position::Centre)
    }
}

/// Geometry needed to place a crop window after a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropGeometry {
    /// Original (pre-resize) dimensions.
    pub original: (i32, i32),
    /// Crop window dimensions.
    pub target: (i32, i32),
    /// Resized image dimensions (one page).
    pub image: (i32, i32),
}

impl Gravity {
    /// Crop window offset within the resized image.
    pub fn offset(&self, geometry: CropGeometry) -> (i32, i32) {
        let CropGeometry {
            original: (in_w, in_h),
            target: (target_w, target_h),
            image: (image_w, image_h),
        } = geometry;
        match *self {
            Gravity::Anchor(pos) => calculate_position(target_w, target_h, image_w, image_h, pos),
            Gravity::FocalPoint { x, y } => {
                calculate_focal_point(x, y, in_w, in_h, target_w, target_h, image_w, image_h)
            }
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid gravity: {0}")]
pub struct InvalidGravity(pub String);

impl FromStr for Position {
    type Err = InvalidGravity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top-left" | "tl" => Ok(Position::TopLeft),
            "top" | "t" => Ok(Position::Top),
            "top-right" | "tr" => Ok(Position::TopRight),
            "left" | "l" => Ok(Position::Left),
            "centre" | "center" | "c" => Ok(Position::Centre),
            "right" | "r" => Ok(Position::Right),
            "bottom-left" | "bl" => Ok(Position::BottomLeft),
            "bottom" | "b" => Ok(Position::Bottom),
            "bottom-right" | "br" => Ok(Position::BottomRight),
            _ => Err(InvalidGravity(s.to_string())),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Position::TopLeft => "top-left",
            Position::Top => "top",
            Position::TopRight => "top-right",
            Position::Left => "left",
            Position::Centre => "centre",
            Position::Right => "right",
            Position::BottomLeft => "bottom-left",
            Position::Bottom => "bottom",
            Position::BottomRight => "bottom-right",
        })
    }
}

/// Parses a [`Position`] name or `focal-X-Y` (X, Y fractions, clamped to
/// `[0, 1]`).
impl FromStr for Gravity {
    type Err = InvalidGravity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(coords) = s.strip_prefix("focal-") else {
            return s.parse().map(Gravity::Anchor);
        };
        let invalid = || InvalidGravity(s.to_string());
        let (x, y) = coords.split_once('-').ok_or_else(invalid)?;
        let x: f64 = x.parse().map_err(|_| invalid())?;
        let y: f64 = y.parse().map_err(|_| invalid())?;
        if !x.is_finite() || !y.is_finite() {
            return Err(invalid());
        }
        Ok(Gravity::FocalPoint {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        })
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gravity::Anchor(pos) => write!(f, "{pos}"),
            Gravity::FocalPoint { x, y } => write!(f, "focal-{x}-{y}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // calculate_position
    // =========================================================================

    #[test]
    fn anchors_on_padded_canvas() {
        let at = |pos| calculate_position(50, 50, 100, 100, pos);
        assert_eq!(at(Position::TopLeft), (0, 0));
        assert_eq!(at(Position::Top), (25, 0));
        assert_eq!(at(Position::TopRight), (50, 0));
        assert_eq!(at(Position::Left), (0, 25));
        assert_eq!(at(Position::Centre), (25, 25));
        assert_eq!(at(Position::Right), (50, 25));
        assert_eq!(at(Position::BottomLeft), (0, 50));
        assert_eq!(at(Position::Bottom), (25, 50));
        assert_eq!(at(Position::BottomRight), (50, 50));
    }

    #[test]
    fn odd_delta_truncates() {
        // delta 5 → 2, not 3
        assert_eq!(calculate_position(10, 10, 15, 15, Position::Centre), (2, 2));
    }

    #[test]
    fn negative_delta_truncates_toward_zero() {
        // delta -5 → -2 (floor division would give -3)
        assert_eq!(calculate_position(15, 15, 10, 10, Position::Centre), (-2, -2));
        assert_eq!(calculate_position(15, 15, 10, 10, Position::BottomRight), (-5, -5));
    }

    // =========================================================================
    // calculate_focal_point
    // =========================================================================

    #[test]
    fn focal_centre_on_exact_fit() {
        // factor 2.0, center (50, 50), offset (0, 0)
        assert_eq!(
            calculate_focal_point(0.5, 0.5, 200, 200, 100, 100, 100, 100),
            (0, 0)
        );
    }

    #[test]
    fn focal_point_shifts_window() {
        // 400x200 original, 100x100 target → factor 2, image 200x100
        // center_x = 0.75 * 400 / 2 = 150, left = 150 - 50 = 100
        assert_eq!(
            calculate_focal_point(0.75, 0.5, 400, 200, 100, 100, 200, 100),
            (100, 0)
        );
    }

    #[test]
    fn focal_point_clamps_to_image_bounds() {
        assert_eq!(
            calculate_focal_point(1.0, 1.0, 400, 200, 100, 100, 200, 100),
            (100, 0)
        );
        assert_eq!(
            calculate_focal_point(0.0, 0.0, 400, 200, 100, 100, 200, 100),
            (0, 0)
        );
    }

    #[test]
    fn focal_point_rounds_half_away_from_zero() {
        // factor 1, center_x = 0.5 * 101 = 50.5, left = 50.5 - 50 = 0.5 → 1
        assert_eq!(
            calculate_focal_point(0.5, 0.0, 101, 100, 100, 100, 101, 100),
            (1, 0)
        );
    }

    #[test]
    fn focal_point_image_smaller_than_target() {
        assert_eq!(
            calculate_focal_point(0.9, 0.9, 100, 100, 200, 200, 50, 50),
            (0, 0)
        );
    }

    // =========================================================================
    // Gravity
    // =========================================================================

    #[test]
    fn gravity_dispatches_anchor_with_target_inside_image() {
        let geometry = CropGeometry {
            original: (400, 200),
            target: (100, 100),
            image: (200, 100),
        };
        assert_eq!(Gravity::Anchor(Position::Centre).offset(geometry), (50, 0));
        assert_eq!(Gravity::Anchor(Position::Right).offset(geometry), (100, 0));
        assert_eq!(
            Gravity::FocalPoint { x: 0.0, y: 0.5 }.offset(geometry),
            (0, 0)
        );
    }

    #[test]
    fn parse_positions() {
        assert_eq!("top-left".parse(), Ok(Position::TopLeft));
        assert_eq!("center".parse(), Ok(Position::Centre));
        assert_eq!("BR".parse(), Ok(Position::BottomRight));
        assert!("middle".parse::<Position>().is_err());
    }

    #[test]
    fn parse_gravity() {
        assert_eq!("bottom".parse(), Ok(Gravity::Anchor(Position::Bottom)));
        assert_eq!(
            "focal-0.25-0.75".parse(),
            Ok(Gravity::FocalPoint { x: 0.25, y: 0.75 })
        );
        assert_eq!(
            "focal-2-0".parse(),
            Ok(Gravity::FocalPoint { x: 1.0, y: 0.0 })
        );
        assert!("focal-0.5".parse::<Gravity>().is_err());
        assert!("focal-a-b".parse::<Gravity>().is_err());
    }

    #[test]
    fn gravity_display_round_trips() {
        for g in ["top-right", "centre", "focal-0.5-0.25"] {
            let parsed: Gravity = g.parse().unwrap();
            assert_eq!(parsed.to_string(), g);
        }
    }
}
