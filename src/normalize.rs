//! Landmark vector normalization: center on the face (or hand) centroid and
//! scale x/y by their pooled standard deviation.
//!
//! The same function runs while building the dataset and while serving, so
//! any change here breaks compatibility with already trained models.

use ndarray::{s, Array2, ArrayView2, Axis};

use crate::error::GestureError;
use crate::landmarks::{HAND_POINTS, TOTAL_POINTS, VECTOR_LEN};

/// Scaling is skipped when the pooled std is at or below this value.
pub const MIN_STD: f64 = 1e-6;

/// Normalize a flat 1530-value landmark vector.
///
/// An empty input is returned unchanged. Any other length that does not match
/// the 510-point layout fails with `InvalidLength`.
///
/// Not idempotent in general: normalizing an already normalized vector is
/// allowed and may move values slightly.
pub fn normalize(vector: &[f32]) -> Result<Vec<f32>, GestureError> {
    if vector.is_empty() {
        return Ok(Vec::new());
    }
    if vector.len() != VECTOR_LEN {
        return Err(GestureError::InvalidLength {
            expected: VECTOR_LEN,
            got: vector.len(),
        });
    }

    let mut pts = Array2::from_shape_vec((TOTAL_POINTS, 3), vector.to_vec()).map_err(|_| {
        GestureError::InvalidLength {
            expected: VECTOR_LEN,
            got: vector.len(),
        }
    })?;

    let (ref_x, ref_y) = reference_point(pts.view());

    // Center x/y; z is left as-is
    for mut row in pts.axis_iter_mut(Axis(0)) {
        row[0] = (row[0] as f64 - ref_x) as f32;
        row[1] = (row[1] as f64 - ref_y) as f32;
    }

    let std = pooled_xy_std(pts.view());
    if std > MIN_STD {
        for mut row in pts.axis_iter_mut(Axis(0)) {
            row[0] = (row[0] as f64 / std) as f32;
            row[1] = (row[1] as f64 / std) as f32;
        }
    }

    Ok(pts.into_raw_vec_and_offset().0)
}

/// Face centroid if any face coordinate is non-zero, otherwise hand centroid.
/// Only x and y of the centroid are returned.
fn reference_point(pts: ArrayView2<f32>) -> (f64, f64) {
    let hand = pts.slice(s![..HAND_POINTS, ..]);
    let face = pts.slice(s![HAND_POINTS.., ..]);

    let face_visible = face.iter().any(|&v| v != 0.0);
    let region = if face_visible { face } else { hand };
    centroid_xy(region)
}

fn centroid_xy(region: ArrayView2<f32>) -> (f64, f64) {
    let n = region.nrows() as f64;
    let (sx, sy) = region
        .axis_iter(Axis(0))
        .fold((0.0f64, 0.0f64), |(sx, sy), p| (sx + p[0] as f64, sy + p[1] as f64));
    (sx / n, sy / n)
}

/// Population std over all x and y values pooled together.
fn pooled_xy_std(pts: ArrayView2<f32>) -> f64 {
    let xy = pts.slice(s![.., ..2]);
    let n = xy.len() as f64;
    let mean = xy.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = xy
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::FACE_POINTS;

    /// Deterministic pseudo-random vector in roughly 0..1
    fn sample_vector(seed: u32) -> Vec<f32> {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        (0..VECTOR_LEN)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 10_000) as f32 / 10_000.0
            })
            .collect()
    }

    fn xy_std(v: &[f32]) -> f64 {
        let xy: Vec<f64> = v
            .chunks_exact(3)
            .flat_map(|c| [c[0] as f64, c[1] as f64])
            .collect();
        let n = xy.len() as f64;
        let mean = xy.iter().sum::<f64>() / n;
        (xy.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n).sqrt()
    }

    fn mean_xy(v: &[f32], range: std::ops::Range<usize>) -> (f64, f64) {
        let n = range.len() as f64;
        let (sx, sy) = range.fold((0.0, 0.0), |(sx, sy), i| {
            (sx + v[i * 3] as f64, sy + v[i * 3 + 1] as f64)
        });
        (sx / n, sy / n)
    }

    #[test]
    fn test_preserves_length() {
        let out = normalize(&sample_vector(1)).unwrap();
        assert_eq!(out.len(), VECTOR_LEN);
    }

    #[test]
    fn test_empty_is_passthrough() {
        let out = normalize(&[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_all_zero_is_noop() {
        let zeros = vec![0.0f32; VECTOR_LEN];
        let out = normalize(&zeros).unwrap();
        assert_eq!(out, zeros);
    }

    #[test]
    fn test_invalid_lengths() {
        for len in [3, 100, VECTOR_LEN - 3, VECTOR_LEN + 1, VECTOR_LEN + 3] {
            let err = normalize(&vec![0.5; len]).unwrap_err();
            assert_eq!(
                err,
                GestureError::InvalidLength { expected: VECTOR_LEN, got: len },
                "len={}",
                len
            );
        }
    }

    #[test]
    fn test_scaled_output_has_unit_pooled_std() {
        let out = normalize(&sample_vector(7)).unwrap();
        let std = xy_std(&out);
        assert!((std - 1.0).abs() < 1e-4, "std={}", std);
    }

    #[test]
    fn test_face_centroid_is_origin_when_face_visible() {
        let out = normalize(&sample_vector(3)).unwrap();
        let (cx, cy) = mean_xy(&out, HAND_POINTS..TOTAL_POINTS);
        assert!(cx.abs() < 1e-4 && cy.abs() < 1e-4, "centroid=({}, {})", cx, cy);
    }

    #[test]
    fn test_hand_centroid_used_when_face_missing() {
        let mut v = vec![0.0f32; VECTOR_LEN];
        for i in 0..HAND_POINTS {
            v[i * 3] = 0.2 + i as f32 * 0.01;
            v[i * 3 + 1] = 0.6 - i as f32 * 0.005;
            v[i * 3 + 2] = -0.05;
        }
        let out = normalize(&v).unwrap();

        let (hx, hy) = mean_xy(&out, 0..HAND_POINTS);
        assert!(hx.abs() < 1e-4 && hy.abs() < 1e-4, "hand centroid=({}, {})", hx, hy);

        // Face points were zero, so after centering they sit at -ref / std
        let (fx, fy) = mean_xy(&out, HAND_POINTS..TOTAL_POINTS);
        assert!(fx < 0.0 && fy < 0.0, "face=({}, {})", fx, fy);
    }

    #[test]
    fn test_single_nonzero_face_coordinate_selects_face() {
        let mut v = vec![0.0f32; VECTOR_LEN];
        for i in 0..HAND_POINTS {
            v[i * 3] = 1.0;
            v[i * 3 + 1] = 1.0;
        }
        // Only a z value on the face: still counts as visible
        v[HAND_POINTS * 3 + 2] = 0.3;
        let out = normalize(&v).unwrap();
        let (fx, fy) = mean_xy(&out, HAND_POINTS..TOTAL_POINTS);
        assert!(fx.abs() < 1e-4 && fy.abs() < 1e-4);
        let (hx, _) = mean_xy(&out, 0..HAND_POINTS);
        assert!(hx > 0.0);
    }

    #[test]
    fn test_z_is_untouched() {
        let input = sample_vector(11);
        let out = normalize(&input).unwrap();
        for i in 0..TOTAL_POINTS {
            assert_eq!(out[i * 3 + 2], input[i * 3 + 2]);
        }
    }

    #[test]
    fn test_constant_points_are_centered_but_not_scaled() {
        // Every point equal: centering yields zeros and std is 0
        let mut v = Vec::with_capacity(VECTOR_LEN);
        for _ in 0..TOTAL_POINTS {
            v.extend_from_slice(&[0.4, 0.7, 0.2]);
        }
        let out = normalize(&v).unwrap();
        for c in out.chunks_exact(3) {
            assert!(c[0].abs() < 1e-6 && c[1].abs() < 1e-6);
            assert_eq!(c[2], 0.2);
        }
    }

    #[test]
    fn test_renormalizing_is_accepted() {
        let once = normalize(&sample_vector(5)).unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(twice.len(), VECTOR_LEN);
        assert!((xy_std(&twice) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_face_count_matches_layout() {
        assert_eq!(TOTAL_POINTS - HAND_POINTS, FACE_POINTS);
    }
}
