//! Small numeric helpers shared by the transform and scale code.

use glam::Vec3;

/// Compare two floats with a tolerance relative to their magnitude.
///
/// The tolerance is one millionth of the larger magnitude, floored at a few
/// multiples of the smallest normal float. Against zero this is an exact test
/// for any value a scale or squared distance can realistically take.
pub fn approximately(a: f32, b: f32) -> bool {
    let tolerance = (1e-6 * a.abs().max(b.abs())).max(f32::MIN_POSITIVE * 8.0);
    (b - a).abs() < tolerance
}

/// Reciprocal of `v`, or 1.0 when `v` is (approximately) zero.
pub fn safe_recip(v: f32) -> f32 {
    if approximately(v, 0.0) {
        1.0
    } else {
        1.0 / v
    }
}

/// Component-wise [`safe_recip`].
pub fn safe_recip3(v: Vec3) -> Vec3 {
    Vec3::new(safe_recip(v.x), safe_recip(v.y), safe_recip(v.z))
}
