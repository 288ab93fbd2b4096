//! Coordinate generators for raster and radial scans.
//!
//! Both generators are pure: the same arguments always give the same plan.
//! Coordinates are relative to an [`Origin`] and returned in stage units (mm).

use crate::core::{Origin, Position, ScanPlan};
use crate::error::{ScanError, ScanResult};

/// Absorbs float error so that e.g. `0.3 / 0.1` still counts 4 samples.
const STEP_EPSILON: f64 = 1e-9;

/// Largest plan either generator will build.
pub const MAX_PLAN_POINTS: usize = 10_000_000;

/// Number of samples from `0` to `span` inclusive at `step` spacing.
fn sample_count(span: f64, step: f64) -> ScanResult<usize> {
    let count = (span / step + STEP_EPSILON).floor() + 1.0;
    if !count.is_finite() || count > MAX_PLAN_POINTS as f64 {
        return Err(ScanError::InvalidPattern(format!(
            "span {} at step {} exceeds {} points",
            span, step, MAX_PLAN_POINTS
        )));
    }
    Ok(count as usize)
}

/// `rows * cols`, rejected if it exceeds [`MAX_PLAN_POINTS`].
fn plan_size(rows: usize, cols: usize) -> ScanResult<usize> {
    rows.checked_mul(cols)
        .filter(|&n| n <= MAX_PLAN_POINTS)
        .ok_or_else(|| {
            ScanError::InvalidPattern(format!(
                "{} rows x {} columns exceeds {} points",
                rows, cols, MAX_PLAN_POINTS
            ))
        })
}

fn check_step(name: &str, step: f64) -> ScanResult<()> {
    if !step.is_finite() || step <= 0.0 {
        return Err(ScanError::InvalidPattern(format!(
            "{} must be a positive number, got {}",
            name, step
        )));
    }
    Ok(())
}

fn check_extent(name: &str, value: f64) -> ScanResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ScanError::InvalidPattern(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Serpentine raster centered on `origin`.
///
/// Rows run from `-height/2` to `+height/2`. Even rows are visited left to
/// right, odd rows right to left, so the stage never flies back across the
/// full width between rows. The plan holds
/// `(floor(width/step_x)+1) * (floor(height/step_y)+1)` points.
pub fn rectangle(
    origin: Origin,
    width: f64,
    height: f64,
    step_x: f64,
    step_y: f64,
) -> ScanResult<ScanPlan> {
    check_extent("width", width)?;
    check_extent("height", height)?;
    check_step("step_x", step_x)?;
    check_step("step_y", step_y)?;

    let cols = sample_count(width, step_x)?;
    let rows = sample_count(height, step_y)?;
    let half_width = width / 2.0;
    let half_height = height / 2.0;

    let mut positions = Vec::with_capacity(plan_size(rows, cols)?);
    for row in 0..rows {
        let dy = -half_height + row as f64 * step_y;
        let xs = (0..cols).map(|col| -half_width + col as f64 * step_x);
        if row % 2 == 0 {
            positions.extend(xs.map(|dx| origin.offset(dx, dy)));
        } else {
            positions.extend(xs.rev().map(|dx| origin.offset(dx, dy)));
        }
    }

    Ok(ScanPlan::new(positions))
}

/// Filled disc of `radius` centered on `origin`.
///
/// Rows start at `+radius` and step down to `-radius`. Each row covers the chord
/// `±radius·sqrt(1-(dy/radius)²)` left to right, so every point lies inside or
/// on the circle.
pub fn circle(origin: Origin, radius: f64, step_x: f64, step_y: f64) -> ScanResult<ScanPlan> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(ScanError::InvalidPattern(format!(
            "radius must be a positive number, got {}",
            radius
        )));
    }
    check_step("step_x", step_x)?;
    check_step("step_y", step_y)?;

    let rows = sample_count(2.0 * radius, step_y)?;
    // checked against the enclosing square
    plan_size(rows, sample_count(2.0 * radius, step_x)?)?;
    let mut positions = Vec::new();
    for row in 0..rows {
        let dy = radius - row as f64 * step_y;
        let ratio = (dy / radius).clamp(-1.0, 1.0);
        let half_chord = radius * (1.0 - ratio * ratio).max(0.0).sqrt();
        let cols = sample_count(2.0 * half_chord, step_x)?;
        positions.extend(
            (0..cols).map(|col| origin.offset(-half_chord + col as f64 * step_x, dy)),
        );
    }

    Ok(ScanPlan::new(positions))
}

/// Stage positions visited by a boundary check: center, right, left, top, bottom.
pub fn boundary_points(origin: Origin, width: f64, height: f64) -> Vec<Position> {
    let half_width = width / 2.0;
    let half_height = height / 2.0;
    vec![
        origin.offset(0.0, 0.0),
        origin.offset(half_width, 0.0),
        origin.offset(-half_width, 0.0),
        origin.offset(0.0, half_height),
        origin.offset(0.0, -half_height),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_point_count() {
        let cases = [
            (20.0, 15.0, 2.0, 2.0),
            (10.0, 10.0, 1.0, 1.0),
            (0.3, 0.2, 0.1, 0.1),
            (5.0, 0.0, 2.5, 1.0),
            (7.0, 3.0, 2.0, 0.5),
        ];
        for (w, h, sx, sy) in cases {
            let plan = rectangle(Origin::default(), w, h, sx, sy).unwrap();
            let expected = ((w / sx + STEP_EPSILON).floor() as usize + 1)
                * ((h / sy + STEP_EPSILON).floor() as usize + 1);
            assert_eq!(plan.len(), expected, "w={} h={} sx={} sy={}", w, h, sx, sy);
        }
        // 11 columns by 8 rows
        let plan = rectangle(Origin::default(), 20.0, 15.0, 2.0, 2.0).unwrap();
        assert_eq!(plan.len(), 88);
    }

    #[test]
    fn test_rectangle_serpentine_order() {
        let plan = rectangle(Origin::default(), 4.0, 4.0, 1.0, 2.0).unwrap();
        let cols = 5;
        for (row, chunk) in plan.positions().chunks(cols).enumerate() {
            let ascending = chunk.windows(2).all(|w| w[0].x < w[1].x);
            let descending = chunk.windows(2).all(|w| w[0].x > w[1].x);
            if row % 2 == 0 {
                assert!(ascending, "row {} should run left to right", row);
            } else {
                assert!(descending, "row {} should run right to left", row);
            }
            assert!(chunk.iter().all(|p| p.y == chunk[0].y));
        }
    }

    #[test]
    fn test_rectangle_centered_on_origin() {
        let origin = Origin::new(904.0, 620.0);
        let plan = rectangle(origin, 20.0, 10.0, 2.0, 2.0).unwrap();
        let (lo, hi) = plan.bounds().unwrap();
        assert_eq!(lo, Position::new(894.0, 615.0));
        assert_eq!(hi, Position::new(914.0, 625.0));
        assert_eq!(plan.positions()[0], Position::new(894.0, 615.0));
    }

    #[test]
    fn test_circle_points_inside_radius() {
        for (radius, step) in [(5.0, 1.0), (10.0, 0.7), (3.0, 2.0), (1.0, 0.25)] {
            let origin = Origin::new(100.0, -50.0);
            let plan = circle(origin, radius, step, step).unwrap();
            assert!(!plan.is_empty());
            for p in plan.iter() {
                let dx = p.x - origin.x;
                let dy = p.y - origin.y;
                assert!(
                    dx * dx + dy * dy <= radius * radius + 1e-6,
                    "{} outside r={}",
                    p,
                    radius
                );
            }
        }
    }

    #[test]
    fn test_circle_rows_top_down() {
        let plan = circle(Origin::default(), 2.0, 1.0, 1.0).unwrap();
        let first = plan.positions()[0];
        let last = plan.positions()[plan.len() - 1];
        assert_eq!(first, Position::new(0.0, 2.0));
        assert_eq!(last, Position::new(0.0, -2.0));
        // rows: y=2 (1 pt), y=1 (4 pts), y=0 (5 pts), y=-1 (4 pts), y=-2 (1 pt)
        assert_eq!(plan.len(), 15);
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(matches!(
            rectangle(Origin::default(), 10.0, 10.0, 0.0, 1.0),
            Err(ScanError::InvalidPattern(_))
        ));
        assert!(rectangle(Origin::default(), -1.0, 10.0, 1.0, 1.0).is_err());
        assert!(circle(Origin::default(), 0.0, 1.0, 1.0).is_err());
        assert!(circle(Origin::default(), 5.0, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_oversized_plans_rejected() {
        let origin = Origin::default();
        for result in [
            rectangle(origin, 1e300, 1.0, 1e-300, 1.0),
            rectangle(origin, 1.0, f64::MAX, 1.0, f64::MIN_POSITIVE),
            rectangle(origin, 1e4, 1e4, 1.0, 1.0),
            circle(origin, 1e300, 1e-300, 1.0),
            circle(origin, 1e4, 0.01, 0.01),
        ] {
            assert!(matches!(result, Err(ScanError::InvalidPattern(_))));
        }

        // a large but sane raster still builds
        let plan = rectangle(origin, 999.0, 99.0, 1.0, 1.0).unwrap();
        assert_eq!(plan.len(), 100_000);
    }

    #[test]
    fn test_boundary_points() {
        let pts = boundary_points(Origin::new(10.0, 10.0), 4.0, 2.0);
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[1], Position::new(12.0, 10.0));
        assert_eq!(pts[4], Position::new(10.0, 9.0));
    }
}
