pub mod config;
pub mod descriptor;
pub mod detection;
pub mod enrollment;
pub mod errors;
pub mod similarity;
pub mod store;
pub mod verification;

pub use config::{
    load_from_paths, load_resolved_from_paths, ConfigFile, LoadedConfig, ResolvedConfig,
    ResolvedConfigWithSource, DEFAULT_CAPTURE_COUNT, DEFAULT_DISTANCE_SCALE,
    DEFAULT_FRAME_TIMEOUT_MILLIS, DEFAULT_INTER_CAPTURE_DELAY_MILLIS,
    DEFAULT_SIMILARITY_THRESHOLD,
};

pub use descriptor::{aggregate_descriptors, descriptor_from_detection, FaceDescriptor};

pub use detection::{
    DetectedFace, FaceSelection, FrameSource, Keypoint, KeypointProvider, VideoFrame,
};

pub use enrollment::{
    run_enrollment, run_enrollment_with, validate_user_key, CaptureStatus, EnrollmentConfig,
    EnrollmentOutcome, EnrollmentSession,
};

pub use errors::{AppError, AppResult};

pub use similarity::similarity_score;

pub use store::{EnrollmentStore, MemoryEnrollmentStore, VerificationEvent, VerificationEventSink};

pub use verification::{
    run_verification, AttemptState, RejectionReason, VerificationConfig, VerificationOutcome,
};
