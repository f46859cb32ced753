//! Landmark vector layout shared by recording, dataset building and inference.
//!
//! A vector is 510 (x, y, z) points: 42 hand points (two hands of 21) followed
//! by 468 face mesh points, flattened row-major to 1530 values.

/// Points per detected hand
pub const HAND_POINTS_PER_HAND: usize = 21;
/// Hand points in a vector (two hands)
pub const HAND_POINTS: usize = 2 * HAND_POINTS_PER_HAND;
/// Face mesh points in a vector
pub const FACE_POINTS: usize = 468;
pub const TOTAL_POINTS: usize = HAND_POINTS + FACE_POINTS;
/// Flattened vector length
pub const VECTOR_LEN: usize = TOTAL_POINTS * 3;

/// Single landmark in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Build a fixed-length vector from raw detector output.
///
/// Hands are concatenated in detection order and padded or truncated to 42
/// points. Only the first face is used, padded or truncated to 468 points.
/// Missing detections become zero points, so the result is always 1530 long.
pub fn assemble_vector(hands: &[Vec<LandmarkPoint>], face: Option<&[LandmarkPoint]>) -> Vec<f32> {
    let mut out = Vec::with_capacity(VECTOR_LEN);

    let hand_points = hands.iter().flatten().copied();
    push_padded(&mut out, hand_points, HAND_POINTS);

    let face_points = face.into_iter().flatten().copied();
    push_padded(&mut out, face_points, FACE_POINTS);

    out
}

fn push_padded(out: &mut Vec<f32>, points: impl Iterator<Item = LandmarkPoint>, count: usize) {
    let mut written = 0;
    for p in points.take(count) {
        out.extend_from_slice(&[p.x, p.y, p.z]);
        written += 1;
    }
    for _ in written..count {
        out.extend_from_slice(&[0.0, 0.0, 0.0]);
    }
}

/// View a flat vector as points. A trailing partial triple is ignored.
pub fn points(vector: &[f32]) -> impl Iterator<Item = LandmarkPoint> + '_ {
    vector
        .chunks_exact(3)
        .map(|c| LandmarkPoint::new(c[0], c[1], c[2]))
}
