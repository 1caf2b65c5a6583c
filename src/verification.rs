use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::descriptor::{descriptor_from_detection, FaceDescriptor};
use crate::detection::{FaceSelection, FrameSource, KeypointProvider};
use crate::enrollment::validate_user_key;
use crate::errors::AppResult;
use crate::similarity::similarity_score;
use crate::store::{EnrollmentStore, VerificationEvent, VerificationEventSink};

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub user_key: String,
    pub source_tag: String,
    pub similarity_threshold: f64,
    pub distance_scale: f64,
    pub frame_timeout: Duration,
    pub selection_policy: FaceSelection,
}

impl VerificationConfig {
    pub fn for_user(user_key: &str, source_tag: &str, resolved: &ResolvedConfig) -> Self {
        Self {
            user_key: user_key.to_string(),
            source_tag: source_tag.to_string(),
            similarity_threshold: resolved.similarity_threshold,
            distance_scale: resolved.distance_scale,
            frame_timeout: resolved.frame_timeout,
            selection_policy: resolved.selection_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Capturing,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    NoEnrollmentOnFile,
    NoFaceDetected,
    BelowThreshold,
}

#[derive(Debug)]
pub struct VerificationOutcome {
    pub user_key: String,
    pub state: AttemptState,
    pub similarity: Option<f64>,
    pub rejection: Option<RejectionReason>,
    pub event_recorded: bool,
    pub logs: Vec<String>,
}

impl VerificationOutcome {
    fn accepted(user_key: &str, similarity: f64, event_recorded: bool, logs: Vec<String>) -> Self {
        Self {
            user_key: user_key.to_string(),
            state: AttemptState::Accepted,
            similarity: Some(similarity),
            rejection: None,
            event_recorded,
            logs,
        }
    }

    fn rejected(
        user_key: &str,
        similarity: Option<f64>,
        reason: RejectionReason,
        logs: Vec<String>,
    ) -> Self {
        Self {
            user_key: user_key.to_string(),
            state: AttemptState::Rejected,
            similarity,
            rejection: Some(reason),
            event_recorded: false,
            logs,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.state == AttemptState::Accepted
    }
}

/// One verification attempt: load the enrollment, capture a single frame,
/// compare, decide. The enrollment is loaded before any capture so a user
/// with nothing on file is turned away without touching the camera. Exactly
/// one event is appended per accepted attempt; a sink failure is logged and
/// reflected in `event_recorded` but never reverses the decision. A failing
/// store read is the only collaborator error that propagates.
pub fn run_verification<P, F, S, E>(
    config: &VerificationConfig,
    provider: &P,
    frames: &mut F,
    store: &S,
    events: &E,
) -> AppResult<VerificationOutcome>
where
    P: KeypointProvider,
    F: FrameSource,
    S: EnrollmentStore,
    E: VerificationEventSink,
{
    validate_user_key(&config.user_key)?;

    debug!(
        user_key = %config.user_key,
        source_tag = %config.source_tag,
        state = ?AttemptState::Idle,
        "starting verification attempt"
    );
    let mut logs = vec![format!(
        "Starting verification for user {} from {}",
        config.user_key, config.source_tag
    )];

    let Some(stored) = store.load_enrollment(&config.user_key)? else {
        info!(user_key = %config.user_key, "no enrollment on file");
        logs.push(format!(
            "No enrollment on file for user {}",
            config.user_key
        ));
        return Ok(VerificationOutcome::rejected(
            &config.user_key,
            None,
            RejectionReason::NoEnrollmentOnFile,
            logs,
        ));
    };

    debug!(
        user_key = %config.user_key,
        values = stored.len(),
        state = ?AttemptState::Capturing,
        "loaded enrollment; capturing one frame"
    );

    let Some(live) = capture_descriptor(config, provider, frames, &mut logs) else {
        info!(user_key = %config.user_key, "verification rejected: no face detected");
        return Ok(VerificationOutcome::rejected(
            &config.user_key,
            None,
            RejectionReason::NoFaceDetected,
            logs,
        ));
    };

    let score = similarity_score(&stored, &live, config.distance_scale);
    logs.push(format!(
        "Similarity {score:.4} against threshold {:.4}",
        config.similarity_threshold
    ));

    if score < config.similarity_threshold {
        info!(
            user_key = %config.user_key,
            similarity = score,
            "verification rejected: below threshold"
        );
        logs.push(format!(
            "Rejected user {}: similarity below threshold",
            config.user_key
        ));
        return Ok(VerificationOutcome::rejected(
            &config.user_key,
            Some(score),
            RejectionReason::BelowThreshold,
            logs,
        ));
    }

    let event = VerificationEvent::accepted(&config.user_key, &config.source_tag, score);
    let event_recorded = match events.append_verification(&event) {
        Ok(()) => {
            logs.push(format!("Recorded verification event {}", event.id));
            true
        }
        Err(err) => {
            warn!(
                user_key = %config.user_key,
                error = %err,
                "verification event was not recorded; decision stands"
            );
            logs.push(format!("Verification event was not recorded: {err}"));
            false
        }
    };

    info!(
        user_key = %config.user_key,
        similarity = score,
        "verification accepted"
    );
    logs.push(format!("Accepted user {}", config.user_key));

    Ok(VerificationOutcome::accepted(
        &config.user_key,
        score,
        event_recorded,
        logs,
    ))
}

fn capture_descriptor<P, F>(
    config: &VerificationConfig,
    provider: &P,
    frames: &mut F,
    logs: &mut Vec<String>,
) -> Option<FaceDescriptor>
where
    P: KeypointProvider,
    F: FrameSource,
{
    let frame = match frames.next_frame(config.frame_timeout) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            logs.push(format!(
                "No frame arrived within {} ms",
                config.frame_timeout.as_millis()
            ));
            return None;
        }
        Err(err) => {
            warn!(
                user_key = %config.user_key,
                error = %err,
                "frame source failed; treating as no face"
            );
            logs.push(format!("Frame source failed: {err}"));
            return None;
        }
    };

    if !frame.has_area() {
        logs.push(format!(
            "Frame has no usable dimensions ({}x{})",
            frame.width(),
            frame.height()
        ));
        return None;
    }

    let faces = match provider.detect(&frame) {
        Ok(faces) => faces,
        Err(err) => {
            warn!(
                user_key = %config.user_key,
                error = %err,
                "keypoint provider failed; treating as no face"
            );
            logs.push(format!("Keypoint provider failed: {err}"));
            return None;
        }
    };

    let descriptor = descriptor_from_detection(&faces, config.selection_policy);
    if descriptor.is_none() {
        logs.push("No face detected".to_string());
    }
    descriptor
}
