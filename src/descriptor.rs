use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::{DetectedFace, FaceSelection};
use crate::errors::{AppError, AppResult};

/// Fixed-length numeric summary of one face capture: the detector's
/// keypoints flattened to `[x0, y0, x1, y1, ...]` in provider order. The
/// length is `2 x keypoint count` and stays constant for a deployment as
/// long as the provider configuration does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceDescriptor {
    pub values: Vec<f64>,
    pub captured_at: DateTime<Utc>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Flattens one detection result into a descriptor. `None` means the frame
/// had no usable face: zero faces detected, or the selected face carried no
/// keypoints (an empty descriptor could never verify anyone).
pub fn descriptor_from_detection(
    faces: &[DetectedFace],
    policy: FaceSelection,
) -> Option<FaceDescriptor> {
    let face = policy.select(faces)?;
    if face.keypoints.is_empty() {
        return None;
    }

    let mut values = Vec::with_capacity(face.keypoints.len() * 2);
    for keypoint in &face.keypoints {
        values.push(keypoint.x);
        values.push(keypoint.y);
    }

    Some(FaceDescriptor::new(values))
}

/// Element-wise arithmetic mean over a batch of equal-length descriptors.
/// The result is stamped with the aggregation time, not any input's time.
pub fn aggregate_descriptors(batch: &[FaceDescriptor]) -> AppResult<FaceDescriptor> {
    let first = batch.first().ok_or(AppError::EmptyBatch)?;
    let expected = first.values.len();

    for (index, descriptor) in batch.iter().enumerate() {
        if descriptor.values.len() != expected {
            return Err(AppError::LengthMismatch {
                index,
                expected,
                found: descriptor.values.len(),
            });
        }
    }

    let mut sums = vec![0.0; expected];
    for descriptor in batch {
        for (slot, value) in sums.iter_mut().zip(descriptor.values.iter()) {
            *slot += value;
        }
    }

    let count = batch.len() as f64;
    let values = sums.into_iter().map(|sum| sum / count).collect();

    Ok(FaceDescriptor::new(values))
}
