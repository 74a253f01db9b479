//! rollcall-core — Registration and live recognition controllers.
//!
//! Both controllers share one shape: own a capture session, sample a still
//! from it, and exchange that still with the recognition service, either
//! to enroll a student or to recognize one.

pub mod live;
pub mod registration;
pub mod types;

#[cfg(test)]
mod testing;

pub use live::{LiveError, LivePhase, LiveRecognition, LiveSettings, LiveView, PreviewSink};
pub use registration::{
    RegistrationDraft, RegistrationFlow, RegistrationPhase, RegistrationSettings,
    RegistrationView, SubmitError,
};
pub use types::{BackendAvailability, MessageKind, RecognitionEvent, RecognitionLog, StatusMessage};
