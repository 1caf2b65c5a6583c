use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::FaceDescriptor;
use crate::errors::{AppError, AppResult};

/// Persistence seam for the one enrollment descriptor kept per user.
///
/// Saving overwrites wholesale; no history is kept. Concurrent enrollment
/// and verification for the same user is a race this crate does not
/// resolve: the last writer wins.
pub trait EnrollmentStore {
    fn load_enrollment(&self, user_key: &str) -> AppResult<Option<FaceDescriptor>>;
    fn save_enrollment(&self, user_key: &str, descriptor: &FaceDescriptor) -> AppResult<()>;
}

/// Append-only audit log. From the decision's point of view the append is
/// fire-and-forget: a sink failure is logged and reported in the outcome,
/// but never changes an accept into a reject.
pub trait VerificationEventSink {
    fn append_verification(&self, event: &VerificationEvent) -> AppResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationEvent {
    pub id: String,
    pub user_key: String,
    pub source_tag: String,
    pub similarity: f64,
    pub accepted: bool,
    pub recorded_at: DateTime<Utc>,
}

impl VerificationEvent {
    pub fn accepted(user_key: &str, source_tag: &str, similarity: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_key: user_key.to_string(),
            source_tag: source_tag.to_string(),
            similarity,
            accepted: true,
            recorded_at: Utc::now(),
        }
    }
}

/// In-process reference implementation of both store traits, for tests and
/// for embedders that keep enrollment in memory.
#[derive(Debug, Default)]
pub struct MemoryEnrollmentStore {
    enrollments: Mutex<HashMap<String, FaceDescriptor>>,
    events: Mutex<Vec<VerificationEvent>>,
}

impl MemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enrolled_users(&self) -> Vec<String> {
        self.enrollments
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<VerificationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EnrollmentStore for MemoryEnrollmentStore {
    fn load_enrollment(&self, user_key: &str) -> AppResult<Option<FaceDescriptor>> {
        let map = self.enrollments.lock().map_err(|_| AppError::StoreRead {
            user_key: user_key.to_string(),
            message: "enrollment map lock poisoned".into(),
        })?;
        Ok(map.get(user_key).cloned())
    }

    fn save_enrollment(&self, user_key: &str, descriptor: &FaceDescriptor) -> AppResult<()> {
        let mut map = self.enrollments.lock().map_err(|_| AppError::StoreWrite {
            user_key: user_key.to_string(),
            message: "enrollment map lock poisoned".into(),
        })?;
        map.insert(user_key.to_string(), descriptor.clone());
        Ok(())
    }
}

impl VerificationEventSink for MemoryEnrollmentStore {
    fn append_verification(&self, event: &VerificationEvent) -> AppResult<()> {
        let mut events = self.events.lock().map_err(|_| AppError::EventAppend {
            user_key: event.user_key.clone(),
            message: "event log lock poisoned".into(),
        })?;
        events.push(event.clone());
        Ok(())
    }
}
