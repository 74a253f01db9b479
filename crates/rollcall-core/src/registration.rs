//! Registration flow: start camera, capture a still, fill the draft, enroll.
//!
//! ```text
//! NoCamera --start--> Streaming --capture--> Captured --submit--> Submitting
//!     ^                   ^                     |  ^                 |
//!     |                   +-------retake--------+  +--failure/abort--+
//!     +---------------- success, then a scheduled stop --------------+
//! ```
//! `stop_camera()` returns to `NoCamera` from any phase. Dropping the flow
//! releases the camera.

use crate::types::StatusMessage;
use rollcall_capture::{CameraSource, CaptureError, CaptureSession, FrameImage, JpegQuality};
use rollcall_client::{ApiError, RecognitionBackend, RegisterRequest};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const MSG_CAMERA_STARTED: &str = "Camera started successfully";
const MSG_CAMERA_DENIED: &str = "Unable to access camera. Please allow camera permissions.";
const MSG_CAMERA_STOPPED: &str = "Camera stopped";
const MSG_START_FIRST: &str = "Please start the camera first";
const MSG_CAPTURED: &str = "Image captured! Now fill the form and register.";
const MSG_MISSING_IDENTITY: &str = "Please enter both name and student ID";
const MSG_MISSING_IMAGE: &str = "Please capture an image first";
const MSG_PROCESSING: &str = "Processing registration... Please wait";
const MSG_FAILED: &str = "Registration failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistrationPhase {
    NoCamera,
    Streaming,
    Captured,
    Submitting,
}

/// The in-progress, not-yet-submitted registration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationDraft {
    pub name: String,
    pub student_id: String,
    /// Optional; blank means "not provided".
    pub email: String,
    pub class_section: String,
}

impl Default for RegistrationDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            student_id: String::new(),
            email: String::new(),
            class_section: "Default".to_string(),
        }
    }
}

impl RegistrationDraft {
    fn has_identity(&self) -> bool {
        !self.name.trim().is_empty() && !self.student_id.trim().is_empty()
    }

    fn to_request(&self, still: &FrameImage) -> RegisterRequest {
        let non_blank = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        RegisterRequest {
            name: self.name.trim().to_string(),
            student_id: self.student_id.trim().to_string(),
            email: non_blank(&self.email),
            class_section: non_blank(&self.class_section),
            image: still.to_data_url(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    /// How long the success message stays up before the camera stops.
    pub success_delay: Duration,
    pub quality: JpegQuality,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_secs(2),
            quality: JpegQuality::RECOGNITION,
        }
    }
}

/// What a form renders. Published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationView {
    pub phase: RegistrationPhase,
    pub draft: RegistrationDraft,
    pub has_image: bool,
    pub message: Option<StatusMessage>,
    /// The submit control is enabled.
    pub can_submit: bool,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    /// Rejected locally; no request was sent.
    #[error("{0}")]
    Validation(&'static str),
    #[error("a registration is already being submitted")]
    Busy,
    #[error(transparent)]
    Rejected(ApiError),
}

struct FlowState {
    capture: CaptureSession,
    phase: RegistrationPhase,
    draft: RegistrationDraft,
    still: Option<FrameImage>,
    message: Option<StatusMessage>,
    view_tx: watch::Sender<RegistrationView>,
}

impl FlowState {
    fn view(&self) -> RegistrationView {
        RegistrationView {
            phase: self.phase,
            draft: self.draft.clone(),
            has_image: self.still.is_some(),
            message: self.message.clone(),
            can_submit: self.phase == RegistrationPhase::Captured,
        }
    }

    fn transition(&mut self, next: RegistrationPhase) {
        if self.phase != next {
            tracing::debug!(from = ?self.phase, to = ?next, "registration phase");
            self.phase = next;
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    fn stop_camera(&mut self) {
        self.capture.stop();
        self.still = None;
        self.transition(RegistrationPhase::NoCamera);
        self.message = Some(StatusMessage::success(MSG_CAMERA_STOPPED));
        self.publish();
    }

    fn reject(&mut self, message: &'static str) -> SubmitError {
        tracing::debug!(message, "registration rejected locally");
        self.message = Some(StatusMessage::error(message));
        self.publish();
        SubmitError::Validation(message)
    }
}

/// Puts a submission that was dropped mid-request back to `Captured`.
struct SubmitGuard<'a> {
    state: &'a Mutex<FlowState>,
    armed: bool,
}

impl SubmitGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(self.state);
        if state.phase == RegistrationPhase::Submitting {
            tracing::info!("registration abandoned before the service answered");
            state.transition(RegistrationPhase::Captured);
            state.message = None;
            state.publish();
        }
    }
}

/// Registration flow controller. Owns its camera session.
pub struct RegistrationFlow<A> {
    api: A,
    settings: RegistrationSettings,
    state: Arc<Mutex<FlowState>>,
    pending_stop: Option<JoinHandle<()>>,
}

impl<A: RecognitionBackend> RegistrationFlow<A> {
    pub fn new(api: A, camera: Box<dyn CameraSource>, settings: RegistrationSettings) -> Self {
        let state = FlowState {
            capture: CaptureSession::new(camera),
            phase: RegistrationPhase::NoCamera,
            draft: RegistrationDraft::default(),
            still: None,
            message: None,
            view_tx: watch::channel(RegistrationView {
                phase: RegistrationPhase::NoCamera,
                draft: RegistrationDraft::default(),
                has_image: false,
                message: None,
                can_submit: false,
            })
            .0,
        };
        Self {
            api,
            settings,
            state: Arc::new(Mutex::new(state)),
            pending_stop: None,
        }
    }

    /// Watch the flow's view; the receiver sees every published transition.
    pub fn subscribe(&self) -> watch::Receiver<RegistrationView> {
        lock(&self.state).view_tx.subscribe()
    }

    pub fn view(&self) -> RegistrationView {
        lock(&self.state).view()
    }

    pub fn phase(&self) -> RegistrationPhase {
        lock(&self.state).phase
    }

    pub fn draft(&self) -> RegistrationDraft {
        lock(&self.state).draft.clone()
    }

    /// The captured still, if any.
    pub fn still(&self) -> Option<FrameImage> {
        lock(&self.state).still.clone()
    }

    pub fn update_draft(&mut self, edit: impl FnOnce(&mut RegistrationDraft)) {
        let mut state = lock(&self.state);
        edit(&mut state.draft);
        state.publish();
    }

    pub fn start_camera(&mut self) -> Result<(), CaptureError> {
        self.cancel_pending_stop();
        let mut state = lock(&self.state);
        // A restart opens a new session; stills from the old one are void.
        state.still = None;
        match state.capture.start() {
            Ok(()) => {
                state.transition(RegistrationPhase::Streaming);
                state.message = Some(StatusMessage::success(MSG_CAMERA_STARTED));
                state.publish();
                Ok(())
            }
            Err(e) => {
                state.transition(RegistrationPhase::NoCamera);
                state.message = Some(StatusMessage::error(MSG_CAMERA_DENIED));
                state.publish();
                Err(e)
            }
        }
    }

    pub fn stop_camera(&mut self) {
        self.cancel_pending_stop();
        lock(&self.state).stop_camera();
    }

    /// Freeze the current frame as the registration still.
    pub fn capture(&mut self) -> Result<(), CaptureError> {
        self.cancel_pending_stop();
        let mut state = lock(&self.state);
        let can_capture = matches!(
            state.phase,
            RegistrationPhase::Streaming | RegistrationPhase::Captured
        ) && state.capture.is_active();
        if !can_capture {
            state.message = Some(StatusMessage::error(MSG_START_FIRST));
            state.publish();
            return Err(CaptureError::NoActiveStream);
        }

        match state.capture.capture_frame(self.settings.quality) {
            Ok(still) => {
                state.still = Some(still);
                state.transition(RegistrationPhase::Captured);
                state.message = Some(StatusMessage::success(MSG_CAPTURED));
                state.publish();
                Ok(())
            }
            Err(e) => {
                state.message = Some(StatusMessage::error(e.to_string()));
                state.publish();
                Err(e)
            }
        }
    }

    /// Discard the still and go back to the live feed.
    pub fn retake(&mut self) -> Result<(), CaptureError> {
        self.cancel_pending_stop();
        let mut state = lock(&self.state);
        state.still = None;
        if !state.capture.is_active() {
            drop(state);
            return self.start_camera();
        }
        state.transition(RegistrationPhase::Streaming);
        state.message = None;
        state.publish();
        Ok(())
    }

    /// Submit the draft with its still.
    ///
    /// Missing name, student id or still is rejected locally. On success the
    /// draft resets and a camera stop is scheduled after the configured
    /// delay. On failure, or if the returned future is dropped before the
    /// service answers, the still is kept for another attempt.
    pub async fn submit(&mut self) -> Result<Value, SubmitError> {
        let request = {
            let mut state = lock(&self.state);
            if state.phase == RegistrationPhase::Submitting {
                return Err(SubmitError::Busy);
            }
            if !state.draft.has_identity() {
                return Err(state.reject(MSG_MISSING_IDENTITY));
            }
            let request = state
                .still
                .as_ref()
                .filter(|still| state.capture.holds(still))
                .map(|still| state.draft.to_request(still));
            let Some(request) = request else {
                return Err(state.reject(MSG_MISSING_IMAGE));
            };
            state.transition(RegistrationPhase::Submitting);
            state.message = Some(StatusMessage::success(MSG_PROCESSING));
            state.publish();
            request
        };

        tracing::info!(student_id = %request.student_id, "submitting registration");
        let guard = SubmitGuard {
            state: &self.state,
            armed: true,
        };
        let result = self.api.register(request).await;
        guard.disarm();

        match result {
            Ok(body) => {
                {
                    let mut state = lock(&self.state);
                    let name = state.draft.name.trim().to_string();
                    tracing::info!(name = %name, "registration accepted");
                    state.draft = RegistrationDraft::default();
                    state.still = None;
                    state.transition(RegistrationPhase::Streaming);
                    state.message = Some(StatusMessage::success(format!(
                        "Student {name} registered successfully!"
                    )));
                    state.publish();
                }
                self.schedule_stop();
                Ok(body)
            }
            Err(e) => {
                tracing::warn!(error = %e, "registration rejected");
                let text = e.to_string();
                let text = if text.is_empty() { MSG_FAILED.to_string() } else { text };
                let mut state = lock(&self.state);
                state.transition(RegistrationPhase::Captured);
                state.message = Some(StatusMessage::error(text));
                state.publish();
                Err(SubmitError::Rejected(e))
            }
        }
    }

    /// Wait for the camera stop scheduled by a successful submit, if any.
    pub async fn wait_for_camera_stop(&mut self) {
        if let Some(task) = self.pending_stop.take() {
            let _ = task.await;
        }
    }

    fn schedule_stop(&mut self) {
        self.cancel_pending_stop();
        let state = Arc::clone(&self.state);
        let delay = self.settings.success_delay;
        self.pending_stop = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&state).stop_camera();
        }));
    }

    fn cancel_pending_stop(&mut self) {
        if let Some(task) = self.pending_stop.take() {
            task.abort();
        }
    }
}

impl<A> Drop for RegistrationFlow<A> {
    fn drop(&mut self) {
        if let Some(task) = self.pending_stop.take() {
            task.abort();
        }
        lock(&self.state).capture.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
