use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::descriptor::{aggregate_descriptors, descriptor_from_detection, FaceDescriptor};
use crate::detection::{FaceSelection, FrameSource, KeypointProvider};
use crate::errors::{AppError, AppResult};
use crate::store::EnrollmentStore;

#[derive(Debug, Clone)]
pub struct EnrollmentConfig {
    pub user_key: String,
    pub capture_count: u32,
    pub inter_capture_delay: Duration,
    pub frame_timeout: Duration,
    pub selection_policy: FaceSelection,
}

impl EnrollmentConfig {
    pub fn for_user(user_key: &str, resolved: &ResolvedConfig) -> Self {
        Self {
            user_key: user_key.to_string(),
            capture_count: resolved.capture_count,
            inter_capture_delay: resolved.inter_capture_delay,
            frame_timeout: resolved.frame_timeout,
            selection_policy: resolved.selection_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Captured,
    NoFaceDetected,
}

#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub user_key: String,
    pub requested_captures: u32,
    pub completed_captures: u32,
    pub descriptor_len: usize,
    pub success: bool,
    pub failed_capture: Option<u32>,
    pub logs: Vec<String>,
}

/// One enrollment attempt. The session owns nothing but its in-memory
/// capture buffer, so abandoning an attempt between captures is just
/// dropping the session.
pub struct EnrollmentSession {
    config: EnrollmentConfig,
    buffer: Vec<FaceDescriptor>,
    logs: Vec<String>,
}

impl EnrollmentSession {
    pub fn new(config: EnrollmentConfig) -> AppResult<Self> {
        validate_user_key(&config.user_key)?;

        let buffer = Vec::with_capacity(config.capture_count as usize);
        let logs = vec![format!(
            "Starting enrollment for user {} ({} capture(s) requested)",
            config.user_key, config.capture_count
        )];

        Ok(Self {
            config,
            buffer,
            logs,
        })
    }

    pub fn user_key(&self) -> &str {
        &self.config.user_key
    }

    pub fn captured(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.len() >= self.config.capture_count as usize
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Waits for one frame, runs detection, and buffers the extracted
    /// descriptor. Timeouts, degenerate frames, collaborator failures and
    /// frames without a usable face all report `NoFaceDetected`. Recording
    /// into a session that already holds `capture_count` captures, or a
    /// descriptor whose length drifts from the session's first capture,
    /// is an error.
    pub fn record_capture<P, F>(&mut self, provider: &P, frames: &mut F) -> AppResult<CaptureStatus>
    where
        P: KeypointProvider,
        F: FrameSource,
    {
        if self.is_complete() {
            return Err(AppError::SessionComplete {
                capture_count: self.config.capture_count,
            });
        }

        let capture_number = self.buffer.len() + 1;

        let frame = match frames.next_frame(self.config.frame_timeout) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.logs.push(format!(
                    "Capture {capture_number}: no frame arrived within {} ms",
                    self.config.frame_timeout.as_millis()
                ));
                return Ok(CaptureStatus::NoFaceDetected);
            }
            Err(err) => {
                warn!(
                    user_key = %self.config.user_key,
                    error = %err,
                    "frame source failed; treating as no face"
                );
                self.logs.push(format!(
                    "Capture {capture_number}: frame source failed: {err}"
                ));
                return Ok(CaptureStatus::NoFaceDetected);
            }
        };

        if !frame.has_area() {
            self.logs.push(format!(
                "Capture {capture_number}: frame has no usable dimensions ({}x{})",
                frame.width(),
                frame.height()
            ));
            return Ok(CaptureStatus::NoFaceDetected);
        }

        let faces = match provider.detect(&frame) {
            Ok(faces) => faces,
            Err(err) => {
                warn!(
                    user_key = %self.config.user_key,
                    error = %err,
                    "keypoint provider failed; treating as no face"
                );
                self.logs.push(format!(
                    "Capture {capture_number}: keypoint provider failed: {err}"
                ));
                return Ok(CaptureStatus::NoFaceDetected);
            }
        };

        let Some(descriptor) = descriptor_from_detection(&faces, self.config.selection_policy)
        else {
            self.logs
                .push(format!("Capture {capture_number}: no face detected"));
            return Ok(CaptureStatus::NoFaceDetected);
        };

        if let Some(first) = self.buffer.first() {
            if descriptor.len() != first.len() {
                return Err(AppError::LengthMismatch {
                    index: self.buffer.len(),
                    expected: first.len(),
                    found: descriptor.len(),
                });
            }
        }

        debug!(
            user_key = %self.config.user_key,
            capture = capture_number,
            values = descriptor.len(),
            "recorded enrollment capture"
        );
        self.logs.push(format!(
            "Capture {capture_number}: descriptor with {} value(s)",
            descriptor.len()
        ));
        self.buffer.push(descriptor);

        Ok(CaptureStatus::Captured)
    }

    /// Averages the buffered captures into one descriptor and saves it,
    /// replacing any previous enrollment for the user.
    pub fn finish<S>(&mut self, store: &S) -> AppResult<FaceDescriptor>
    where
        S: EnrollmentStore,
    {
        let descriptor = aggregate_descriptors(&self.buffer)?;
        store.save_enrollment(&self.config.user_key, &descriptor)?;

        info!(
            user_key = %self.config.user_key,
            captures = self.buffer.len(),
            values = descriptor.len(),
            "saved enrollment descriptor"
        );
        self.logs.push(format!(
            "Aggregated {} capture(s) into a descriptor with {} value(s)",
            self.buffer.len(),
            descriptor.len()
        ));
        self.logs.push(format!(
            "Saved enrollment descriptor for user {}",
            self.config.user_key
        ));

        Ok(descriptor)
    }
}

pub fn run_enrollment<P, F, S>(
    config: &EnrollmentConfig,
    provider: &P,
    frames: &mut F,
    store: &S,
) -> AppResult<EnrollmentOutcome>
where
    P: KeypointProvider,
    F: FrameSource,
    S: EnrollmentStore,
{
    run_enrollment_with(config, provider, frames, store, thread::sleep)
}

/// Sequential enrollment driver: captures strictly one at a time, invoking
/// `pause` between captures (never before the first, never after the last)
/// so consecutive frames differ. A capture without a face aborts the whole
/// attempt and discards all progress; that is a failed outcome, not an
/// error. Structural problems (length drift, empty batch, store failures)
/// are errors.
pub fn run_enrollment_with<P, F, S, D>(
    config: &EnrollmentConfig,
    provider: &P,
    frames: &mut F,
    store: &S,
    mut pause: D,
) -> AppResult<EnrollmentOutcome>
where
    P: KeypointProvider,
    F: FrameSource,
    S: EnrollmentStore,
    D: FnMut(Duration),
{
    let mut session = EnrollmentSession::new(config.clone())?;

    for capture_index in 0..config.capture_count {
        if capture_index > 0 {
            pause(config.inter_capture_delay);
        }

        match session.record_capture(provider, frames)? {
            CaptureStatus::Captured => {}
            CaptureStatus::NoFaceDetected => {
                let failed_capture = capture_index + 1;
                warn!(
                    user_key = %config.user_key,
                    capture = failed_capture,
                    "enrollment aborted: no face detected"
                );
                let mut logs = session.logs().to_vec();
                logs.push(format!(
                    "Enrollment aborted at capture {failed_capture}/{}; discarding {} buffered capture(s)",
                    config.capture_count,
                    session.captured()
                ));
                return Ok(EnrollmentOutcome {
                    user_key: config.user_key.clone(),
                    requested_captures: config.capture_count,
                    completed_captures: session.captured() as u32,
                    descriptor_len: 0,
                    success: false,
                    failed_capture: Some(failed_capture),
                    logs,
                });
            }
        }
    }

    let descriptor = session.finish(store)?;

    Ok(EnrollmentOutcome {
        user_key: config.user_key.clone(),
        requested_captures: config.capture_count,
        completed_captures: session.captured() as u32,
        descriptor_len: descriptor.len(),
        success: true,
        failed_capture: None,
        logs: session.logs().to_vec(),
    })
}

pub fn validate_user_key(user_key: &str) -> AppResult<()> {
    if user_key.is_empty() {
        return Err(AppError::InvalidUserKey {
            user_key: user_key.to_string(),
            message: "user key cannot be empty".into(),
        });
    }

    if !user_key
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(AppError::InvalidUserKey {
            user_key: user_key.to_string(),
            message: "use ASCII letters, numbers, '-' or '_' only".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use crate::detection::{DetectedFace, Keypoint, VideoFrame};
    use crate::store::MemoryEnrollmentStore;

    fn face_from_coords(coords: &[(f64, f64)]) -> DetectedFace {
        DetectedFace {
            keypoints: coords
                .iter()
                .map(|(x, y)| Keypoint {
                    name: None,
                    x: *x,
                    y: *y,
                })
                .collect(),
        }
    }

    fn config_for(user_key: &str, captures: u32) -> EnrollmentConfig {
        EnrollmentConfig {
            user_key: user_key.into(),
            capture_count: captures,
            inter_capture_delay: Duration::from_millis(500),
            frame_timeout: Duration::from_millis(100),
            selection_policy: FaceSelection::FirstDetected,
        }
    }

    struct ScriptedProvider {
        responses: RefCell<VecDeque<AppResult<Vec<DetectedFace>>>>,
        fallback: Option<DetectedFace>,
        calls: RefCell<usize>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<AppResult<Vec<DetectedFace>>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                fallback: None,
                calls: RefCell::new(0),
            }
        }

        fn repeating(face: DetectedFace) -> Self {
            Self {
                responses: RefCell::new(VecDeque::new()),
                fallback: Some(face),
                calls: RefCell::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.borrow()
        }
    }

    impl KeypointProvider for ScriptedProvider {
        fn detect(&self, _frame: &VideoFrame) -> AppResult<Vec<DetectedFace>> {
            *self.calls.borrow_mut() += 1;
            match self.responses.borrow_mut().pop_front() {
                Some(response) => response,
                None => Ok(self.fallback.clone().into_iter().collect()),
            }
        }
    }

    struct StaticFrames {
        calls: usize,
        frame: Option<VideoFrame>,
    }

    impl StaticFrames {
        fn live() -> Self {
            Self {
                calls: 0,
                frame: Some(VideoFrame::new(vec![0u8; 16], 640, 480)),
            }
        }

        fn timing_out() -> Self {
            Self {
                calls: 0,
                frame: None,
            }
        }
    }

    impl FrameSource for StaticFrames {
        fn next_frame(&mut self, _timeout: Duration) -> AppResult<Option<VideoFrame>> {
            self.calls += 1;
            Ok(self.frame.clone())
        }
    }

    struct FailingFrames;

    impl FrameSource for FailingFrames {
        fn next_frame(&mut self, _timeout: Duration) -> AppResult<Option<VideoFrame>> {
            Err(AppError::FrameSource("device unplugged".into()))
        }
    }

    struct RejectingStore;

    impl EnrollmentStore for RejectingStore {
        fn load_enrollment(&self, _user_key: &str) -> AppResult<Option<FaceDescriptor>> {
            Ok(None)
        }

        fn save_enrollment(&self, user_key: &str, _descriptor: &FaceDescriptor) -> AppResult<()> {
            Err(AppError::StoreWrite {
                user_key: user_key.to_string(),
                message: "read-only store".into(),
            })
        }
    }

    #[test]
    fn user_keys_are_validated() {
        assert!(validate_user_key("alice-01_X").is_ok());
        assert!(matches!(
            validate_user_key(""),
            Err(AppError::InvalidUserKey { .. })
        ));
        assert!(matches!(
            validate_user_key("alice smith"),
            Err(AppError::InvalidUserKey { .. })
        ));
        assert!(matches!(
            validate_user_key("tag#7"),
            Err(AppError::InvalidUserKey { .. })
        ));
    }

    #[test]
    fn session_buffers_captures_and_saves_the_average() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![face_from_coords(&[(0.0, 2.0)])]),
            Ok(vec![face_from_coords(&[(4.0, 6.0)])]),
        ]);
        let mut frames = StaticFrames::live();
        let store = MemoryEnrollmentStore::new();

        let mut session = EnrollmentSession::new(config_for("alice", 2)).unwrap();
        assert_eq!(
            session.record_capture(&provider, &mut frames).unwrap(),
            CaptureStatus::Captured
        );
        assert!(!session.is_complete());
        assert_eq!(
            session.record_capture(&provider, &mut frames).unwrap(),
            CaptureStatus::Captured
        );
        assert!(session.is_complete());

        let descriptor = session.finish(&store).unwrap();
        assert_eq!(descriptor.values, vec![2.0, 4.0]);

        let saved = store.load_enrollment("alice").unwrap().unwrap();
        assert_eq!(saved.values, vec![2.0, 4.0]);
    }

    #[test]
    fn timeout_reports_no_face_without_calling_the_provider() {
        let provider = ScriptedProvider::new(Vec::new());
        let mut frames = StaticFrames::timing_out();

        let mut session = EnrollmentSession::new(config_for("alice", 1)).unwrap();
        let status = session.record_capture(&provider, &mut frames).unwrap();

        assert_eq!(status, CaptureStatus::NoFaceDetected);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn degenerate_frame_reports_no_face_without_calling_the_provider() {
        let provider = ScriptedProvider::new(Vec::new());
        let mut frames = StaticFrames {
            calls: 0,
            frame: Some(VideoFrame::new(Vec::new(), 0, 480)),
        };

        let mut session = EnrollmentSession::new(config_for("alice", 1)).unwrap();
        let status = session.record_capture(&provider, &mut frames).unwrap();

        assert_eq!(status, CaptureStatus::NoFaceDetected);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn provider_failure_is_folded_into_no_face() {
        let provider =
            ScriptedProvider::new(vec![Err(AppError::Provider("model not loaded".into()))]);
        let mut frames = StaticFrames::live();

        let mut session = EnrollmentSession::new(config_for("alice", 1)).unwrap();
        let status = session.record_capture(&provider, &mut frames).unwrap();

        assert_eq!(status, CaptureStatus::NoFaceDetected);
        assert!(session
            .logs()
            .iter()
            .any(|line| line.contains("keypoint provider failed")));
    }

    #[test]
    fn frame_source_failure_is_folded_into_no_face() {
        let provider = ScriptedProvider::new(Vec::new());
        let mut frames = FailingFrames;

        let mut session = EnrollmentSession::new(config_for("alice", 1)).unwrap();
        let status = session.record_capture(&provider, &mut frames).unwrap();

        assert_eq!(status, CaptureStatus::NoFaceDetected);
        assert_eq!(provider.call_count(), 0);
        assert!(session
            .logs()
            .iter()
            .any(|line| line.contains("frame source failed")));
    }

    #[test]
    fn length_drift_between_captures_is_an_error() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![face_from_coords(&[(1.0, 2.0)])]),
            Ok(vec![face_from_coords(&[(1.0, 2.0), (3.0, 4.0)])]),
        ]);
        let mut frames = StaticFrames::live();

        let mut session = EnrollmentSession::new(config_for("alice", 2)).unwrap();
        session.record_capture(&provider, &mut frames).unwrap();

        let err = session.record_capture(&provider, &mut frames).unwrap_err();
        match err {
            AppError::LengthMismatch {
                index,
                expected,
                found,
            } => {
                assert_eq!(index, 1);
                assert_eq!(expected, 2);
                assert_eq!(found, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn finishing_without_captures_is_an_empty_batch() {
        let store = MemoryEnrollmentStore::new();
        let mut session = EnrollmentSession::new(config_for("alice", 3)).unwrap();

        let err = session.finish(&store).unwrap_err();
        assert!(matches!(err, AppError::EmptyBatch));
    }

    #[test]
    fn store_save_failure_propagates_from_finish() {
        let provider = ScriptedProvider::repeating(face_from_coords(&[(1.0, 2.0)]));
        let mut frames = StaticFrames::live();

        let mut session = EnrollmentSession::new(config_for("alice", 1)).unwrap();
        session.record_capture(&provider, &mut frames).unwrap();

        let err = session.finish(&RejectingStore).unwrap_err();
        match err {
            AppError::StoreWrite { user_key, .. } => assert_eq!(user_key, "alice"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn captures_past_completion_are_rejected() {
        let provider = ScriptedProvider::repeating(face_from_coords(&[(1.0, 2.0)]));
        let mut frames = StaticFrames::live();

        let mut session = EnrollmentSession::new(config_for("alice", 1)).unwrap();
        session.record_capture(&provider, &mut frames).unwrap();
        assert!(session.is_complete());

        let err = session.record_capture(&provider, &mut frames).unwrap_err();
        match err {
            AppError::SessionComplete { capture_count } => assert_eq!(capture_count, 1),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(session.captured(), 1);
        assert_eq!(frames.calls, 1);
    }

    #[test]
    fn driver_pauses_between_captures_only() {
        let provider = ScriptedProvider::repeating(face_from_coords(&[(1.0, 2.0), (3.0, 4.0)]));
        let mut frames = StaticFrames::live();
        let store = MemoryEnrollmentStore::new();
        let config = config_for("alice", 5);

        let pauses = RefCell::new(Vec::new());
        let outcome = run_enrollment_with(&config, &provider, &mut frames, &store, |delay| {
            pauses.borrow_mut().push(delay)
        })
        .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.completed_captures, 5);
        assert_eq!(outcome.descriptor_len, 4);
        assert_eq!(pauses.borrow().len(), 4);
        assert!(pauses
            .borrow()
            .iter()
            .all(|delay| *delay == Duration::from_millis(500)));
    }

    #[test]
    fn driver_aborts_and_discards_progress_on_a_missed_capture() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![face_from_coords(&[(1.0, 2.0)])]),
            Ok(Vec::new()),
        ]);
        let mut frames = StaticFrames::live();
        let store = MemoryEnrollmentStore::new();
        let config = config_for("alice", 5);

        let outcome =
            run_enrollment_with(&config, &provider, &mut frames, &store, |_delay| {}).unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.failed_capture, Some(2));
        assert_eq!(outcome.completed_captures, 1);
        assert_eq!(outcome.descriptor_len, 0);
        assert_eq!(provider.call_count(), 2);
        assert!(store.load_enrollment("alice").unwrap().is_none());
    }

    #[test]
    fn driver_rejects_invalid_user_keys_before_any_capture() {
        let provider = ScriptedProvider::new(Vec::new());
        let mut frames = StaticFrames::live();
        let store = MemoryEnrollmentStore::new();
        let config = config_for("not a key", 3);

        let err =
            run_enrollment_with(&config, &provider, &mut frames, &store, |_delay| {}).unwrap_err();

        assert!(matches!(err, AppError::InvalidUserKey { .. }));
        assert_eq!(frames.calls, 0);
    }

    #[test]
    fn config_is_built_from_resolved_settings() {
        let resolved = ResolvedConfig::default();
        let config = EnrollmentConfig::for_user("alice", &resolved);

        assert_eq!(config.user_key, "alice");
        assert_eq!(config.capture_count, resolved.capture_count);
        assert_eq!(config.inter_capture_delay, resolved.inter_capture_delay);
        assert_eq!(config.frame_timeout, resolved.frame_timeout);
    }
}
