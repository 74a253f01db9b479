use chrono::{DateTime, Utc};
use rollcall_client::RecognizedFace;
use serde::Serialize;
use std::collections::VecDeque;

/// Maximum entries kept in a recognition log.
pub const LOG_CAPACITY: usize = 5;

/// A student recognized during a live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    pub student_id: String,
    pub name: String,
    /// Match confidence in [0, 1].
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl RecognitionEvent {
    pub fn from_match(face: &RecognizedFace, timestamp: DateTime<Utc>) -> Self {
        Self {
            student_id: face.student_id.clone(),
            name: face.name.clone(),
            confidence: face.confidence.clamp(0.0, 1.0),
            timestamp,
        }
    }

    /// Confidence scaled for display.
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }
}

/// Most-recent-first log, capped at [`LOG_CAPACITY`], one entry per student.
///
/// The first sighting of a student wins: later sightings are dropped and
/// do not refresh the original timestamp.
#[derive(Debug, Clone, Default)]
pub struct RecognitionLog {
    entries: VecDeque<RecognitionEvent>,
}

impl RecognitionLog {
    /// Record an event. Returns `false` if the student is already logged.
    pub fn record(&mut self, event: RecognitionEvent) -> bool {
        if self.contains(&event.student_id) {
            return false;
        }
        self.entries.push_front(event);
        self.entries.truncate(LOG_CAPACITY);
        true
    }

    pub fn contains(&self, student_id: &str) -> bool {
        self.entries.iter().any(|e| e.student_id == student_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RecognitionEvent> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<RecognitionEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Reachability of the recognition service, probed once at mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BackendAvailability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

impl BackendAvailability {
    pub fn is_available(self) -> bool {
        self == Self::Available
    }
}

impl From<bool> for BackendAvailability {
    fn from(reachable: bool) -> Self {
        if reachable {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    Success,
    Error,
}

/// Inline user-facing message. Persists until superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub text: String,
    pub kind: MessageKind,
}

impl StatusMessage {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Success,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}
