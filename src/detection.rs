use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keypoint {
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedFace {
    pub keypoints: Vec<Keypoint>,
}

/// One video frame handed through to the keypoint provider. Pixel data is
/// opaque here; the provider decides how to decode it. Only the dimensions
/// matter to this crate: a frame with zero width or height must never reach
/// `detect`.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// External face detector. May return an empty vec when no face is in the
/// frame; errors are infrastructure failures, which sessions fold into
/// "no face detected" rather than aborting an attempt.
pub trait KeypointProvider {
    fn detect(&self, frame: &VideoFrame) -> AppResult<Vec<DetectedFace>>;
}

/// Caller-owned frame supply. The device behind it (camera, file, test
/// script) is never owned or closed by this crate. `Ok(None)` means the
/// timeout elapsed without a frame.
pub trait FrameSource {
    fn next_frame(&mut self, timeout: Duration) -> AppResult<Option<VideoFrame>>;
}

/// Which detected face feeds the descriptor when a frame contains several.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    #[default]
    FirstDetected,
}

impl FaceSelection {
    pub fn select<'a>(&self, faces: &'a [DetectedFace]) -> Option<&'a DetectedFace> {
        match self {
            FaceSelection::FirstDetected => faces.first(),
        }
    }
}
