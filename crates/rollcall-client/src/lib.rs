//! rollcall-client — Recognition service client.
//!
//! Typed requests and responses for register, recognize, the student and
//! attendance listings, manual marking and the health probe. The
//! [`RecognitionBackend`] trait is the seam the flow controllers use.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiClient, RecognitionBackend, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use error::{ApiError, RecognitionErrorKind};
pub use types::{
    AttendanceFilter, AttendanceRecord, AuditEntry, ClassInfo, RecognizeRequest,
    RecognizeResponse, RecognizedFace, RegisterRequest, Student, StudentFilter,
};
