use crate::descriptor::FaceDescriptor;

/// Bounded similarity in `[0, 1]` between a stored and a live descriptor;
/// 1.0 means an identical keypoint layout.
///
/// The score is `clamp(1 - d / (len * distance_scale), 0, 1)` where `d` is
/// the Euclidean distance over the full vector. Descriptors of differing
/// length score exactly 0.0: they are not comparable, and verification must
/// fail closed rather than guess.
///
/// `distance_scale` (`DEFAULT_DISTANCE_SCALE` = 100.0) encodes the
/// provider's pixel coordinate range and is calibrated together with the
/// similarity threshold; changing the detector or its input resolution
/// means re-deriving both against the same enrolled population. Any
/// non-finite or non-positive scale, and any non-finite intermediate,
/// collapses to 0.0 so a NaN can never reach the threshold comparison.
pub fn similarity_score(
    stored: &FaceDescriptor,
    live: &FaceDescriptor,
    distance_scale: f64,
) -> f64 {
    if stored.values.len() != live.values.len() || stored.values.is_empty() {
        return 0.0;
    }
    if !distance_scale.is_finite() || distance_scale <= 0.0 {
        return 0.0;
    }

    let distance = euclidean_distance(&stored.values, &live.values);
    let normalized = distance / (stored.values.len() as f64 * distance_scale);
    if !normalized.is_finite() {
        return 0.0;
    }

    (1.0 - normalized).clamp(0.0, 1.0)
}

fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (l, r) in lhs.iter().zip(rhs.iter()) {
        let diff = l - r;
        sum += diff * diff;
    }
    sum.sqrt()
}
