use serde::{Deserialize, Serialize};

/// Body of `POST /api/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_section: Option<String>,
    /// JPEG still as a `data:` URL.
    pub image: String,
}

/// Body of `POST /api/recognize`.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizeRequest {
    /// JPEG still as a `data:` URL.
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_section: Option<String>,
}

/// Success body of `POST /api/recognize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognizeResponse {
    #[serde(default)]
    pub recognized: Vec<RecognizedFace>,
}

impl RecognizeResponse {
    /// Only the first match of a call is consumed.
    pub fn first_match(&self) -> Option<&RecognizedFace> {
        self.recognized.first()
    }
}

/// One identity matched by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedFace {
    pub student_id: String,
    pub name: String,
    /// Match confidence in [0, 1].
    pub confidence: f32,
}

/// An enrolled student as listed by `GET /api/students`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub class_section: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A row of `GET /api/attendance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub name: String,
    pub timestamp: String,
    /// `auto` for recognition, `manual` for hand-marked rows.
    pub marked_by: String,
}

/// A class section as listed by `GET /api/classes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A row of `GET /api/audit-logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    #[serde(default)]
    pub details: Option<String>,
    pub timestamp: String,
}

/// Query filters for the student list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StudentFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Query filters for attendance. The service defaults `date` to today.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttendanceFilter {
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_section: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ManualAttendanceRequest<'a> {
    pub student_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_section: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateClassRequest<'a> {
    pub class_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    /// Structured error kind, when the service provides one.
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn message_or(&self, fallback: &str) -> String {
        match self.error.as_deref() {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => fallback.to_string(),
        }
    }
}
