//! Live recognition loop.
//!
//! While scanning, a progress counter sweeps 0–100 in fixed steps on a fixed
//! tick. Each completed sweep samples one still and sends one recognize
//! call, awaited inline, so calls never overlap and the call rate is bounded
//! by the sweep length rather than the camera frame rate.
//!
//! The scan and preview tasks are owned by the controller and aborted by
//! `stop_scanning()`, `stop_camera()` and drop.

use crate::types::{BackendAvailability, RecognitionEvent, RecognitionLog};
use chrono::Utc;
use image::RgbImage;
use rollcall_capture::overlay::{self, DetectionBox};
use rollcall_capture::{CameraSource, CaptureError, CaptureSession, JpegQuality};
use rollcall_client::{RecognitionBackend, RecognitionErrorKind, RecognizeRequest};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MSG_CAMERA_DENIED: &str = "Unable to access camera. Please allow camera permissions.";
const MSG_NO_FACE: &str = "No face detected. Please face the camera directly with good lighting.";
const MSG_RECOGNITION_FAILED: &str = "Recognition failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LivePhase {
    Idle,
    Streaming,
    Scanning,
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub class_section: String,
    /// Progress tick interval.
    pub tick: Duration,
    /// Progress added per tick.
    pub step: u8,
    pub flash_duration: Duration,
    /// How long a recognition error stays up.
    pub error_duration: Duration,
    /// Redraw interval of the preview task.
    pub preview_interval: Duration,
    pub quality: JpegQuality,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            class_section: "Default".to_string(),
            tick: Duration::from_millis(30),
            step: 2,
            flash_duration: Duration::from_secs(1),
            error_duration: Duration::from_secs(3),
            preview_interval: Duration::from_millis(33),
            quality: JpegQuality::RECOGNITION,
        }
    }
}

#[derive(Error, Debug)]
pub enum LiveError {
    #[error("camera is not streaming")]
    NotStreaming,
    #[error("recognition service is not available")]
    BackendUnavailable,
}

/// Receives redrawn preview frames while the camera is live.
pub trait PreviewSink: Send + Sync + 'static {
    fn present(&self, frame: &RgbImage);
}

/// Display state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveView {
    pub phase: LivePhase,
    pub backend: BackendAvailability,
    pub class_section: String,
    /// Sweep progress, 0–100.
    pub progress: u8,
    #[serde(skip)]
    pub detection_box: Option<DetectionBox>,
    pub success_flash: bool,
    pub error: Option<String>,
    /// Most recent first.
    pub log: Vec<RecognitionEvent>,
    /// The start-recognition control is enabled.
    pub can_start_scanning: bool,
}

enum Notice {
    /// Camera problems stay until the next start attempt.
    Persistent(String),
    Transient { text: String, until: Instant },
}

struct LiveState {
    phase: LivePhase,
    backend: BackendAvailability,
    class_section: String,
    progress: u8,
    detection_box: Option<DetectionBox>,
    flash_until: Option<Instant>,
    notice: Option<Notice>,
    log: RecognitionLog,
}

impl LiveState {
    fn set_phase(&mut self, next: LivePhase) {
        if self.phase != next {
            tracing::debug!(from = ?self.phase, to = ?next, "live phase");
            self.phase = next;
        }
    }

    fn clear_scan_display(&mut self) {
        self.progress = 0;
        self.detection_box = None;
        self.flash_until = None;
    }
}

/// Live recognition controller. Owns its camera session and background tasks.
pub struct LiveRecognition<A> {
    api: Arc<A>,
    capture: Arc<Mutex<CaptureSession>>,
    state: Arc<Mutex<LiveState>>,
    settings: Arc<LiveSettings>,
    preview: Option<Arc<dyn PreviewSink>>,
    scan_task: Option<JoinHandle<()>>,
    preview_task: Option<JoinHandle<()>>,
}

impl<A: RecognitionBackend> LiveRecognition<A> {
    pub fn new(api: A, camera: Box<dyn CameraSource>, settings: LiveSettings) -> Self {
        let state = LiveState {
            phase: LivePhase::Idle,
            backend: BackendAvailability::Unknown,
            class_section: settings.class_section.clone(),
            progress: 0,
            detection_box: None,
            flash_until: None,
            notice: None,
            log: RecognitionLog::default(),
        };
        Self {
            api: Arc::new(api),
            capture: Arc::new(Mutex::new(CaptureSession::new(camera))),
            state: Arc::new(Mutex::new(state)),
            settings: Arc::new(settings),
            preview: None,
            scan_task: None,
            preview_task: None,
        }
    }

    /// Build the controller and probe the backend once.
    pub async fn mount(api: A, camera: Box<dyn CameraSource>, settings: LiveSettings) -> Self {
        let live = Self::new(api, camera, settings);
        live.probe_backend().await;
        live
    }

    /// Redraw frames into `sink` while the camera is live.
    pub fn with_preview(mut self, sink: Arc<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    pub async fn probe_backend(&self) -> BackendAvailability {
        let availability = BackendAvailability::from(self.api.check_health().await);
        tracing::info!(backend = ?availability, "backend probed");
        lock(&self.state).backend = availability;
        availability
    }

    pub fn set_class_section(&self, class_section: impl Into<String>) {
        lock(&self.state).class_section = class_section.into();
    }

    pub fn start_camera(&mut self) -> Result<(), CaptureError> {
        self.stop_scanning();
        self.stop_preview();
        lock(&self.state).notice = None;

        let started = lock(&self.capture).start();
        if let Err(e) = started {
            let mut state = lock(&self.state);
            state.set_phase(LivePhase::Idle);
            state.notice = Some(Notice::Persistent(MSG_CAMERA_DENIED.to_string()));
            return Err(e);
        }

        lock(&self.state).set_phase(LivePhase::Streaming);
        self.spawn_preview();
        Ok(())
    }

    /// Begin the sweep-and-recognize cycle. Requires a live camera and a
    /// backend that answered the health probe.
    pub fn start_scanning(&mut self) -> Result<(), LiveError> {
        let canvas = lock(&self.capture).canvas_size();
        {
            let mut state = lock(&self.state);
            match state.phase {
                LivePhase::Scanning => return Ok(()),
                LivePhase::Idle => return Err(LiveError::NotStreaming),
                LivePhase::Streaming => {}
            }
            if !state.backend.is_available() {
                tracing::warn!(backend = ?state.backend, "scan refused");
                return Err(LiveError::BackendUnavailable);
            }
            state.set_phase(LivePhase::Scanning);
            state.progress = 0;
            state.detection_box = Some(DetectionBox::centered(canvas.0, canvas.1));
        }

        self.scan_task = Some(tokio::spawn(run_scan(
            Arc::clone(&self.api),
            Arc::clone(&self.capture),
            Arc::clone(&self.state),
            Arc::clone(&self.settings),
        )));
        Ok(())
    }

    pub fn stop_scanning(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        let mut state = lock(&self.state);
        if state.phase == LivePhase::Scanning {
            state.set_phase(LivePhase::Streaming);
        }
        state.clear_scan_display();
    }

    /// Release the camera and cancel every background task.
    pub fn stop_camera(&mut self) {
        self.stop_scanning();
        self.stop_preview();
        lock(&self.capture).stop();
        lock(&self.state).set_phase(LivePhase::Idle);
    }

    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    pub fn snapshot(&self) -> LiveView {
        let now = Instant::now();
        let state = lock(&self.state);
        let error = match &state.notice {
            Some(Notice::Persistent(text)) => Some(text.clone()),
            Some(Notice::Transient { text, until }) if now < *until => Some(text.clone()),
            _ => None,
        };
        LiveView {
            phase: state.phase,
            backend: state.backend,
            class_section: state.class_section.clone(),
            progress: state.progress,
            detection_box: state.detection_box,
            success_flash: state.flash_until.is_some_and(|until| now < until),
            error,
            log: state.log.to_vec(),
            can_start_scanning: state.phase == LivePhase::Streaming && state.backend.is_available(),
        }
    }

    fn stop_preview(&mut self) {
        if let Some(task) = self.preview_task.take() {
            task.abort();
        }
    }

    fn spawn_preview(&mut self) {
        self.stop_preview();
        if let Some(sink) = &self.preview {
            self.preview_task = Some(tokio::spawn(run_preview(
                Arc::clone(&self.capture),
                Arc::clone(&self.state),
                Arc::clone(sink),
                self.settings.preview_interval,
            )));
        }
    }
}

impl<A> Drop for LiveRecognition<A> {
    fn drop(&mut self) {
        for task in [self.scan_task.take(), self.preview_task.take()].into_iter().flatten() {
            task.abort();
        }
        lock(&self.capture).stop();
    }
}

async fn run_scan<A: RecognitionBackend>(
    api: Arc<A>,
    capture: Arc<Mutex<CaptureSession>>,
    state: Arc<Mutex<LiveState>>,
    settings: Arc<LiveSettings>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + settings.tick, settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut progress: u8 = 0;

    loop {
        ticker.tick().await;
        progress = progress.saturating_add(settings.step).min(100);

        let (complete, backend) = {
            let mut state = lock(&state);
            if progress >= 100 {
                progress = 0;
            }
            state.progress = progress;
            (progress == 0, state.backend)
        };

        if complete && backend.is_available() {
            recognize_once(api.as_ref(), &capture, &state, &settings).await;
        }
    }
}

async fn recognize_once<A: RecognitionBackend>(
    api: &A,
    capture: &Arc<Mutex<CaptureSession>>,
    state: &Mutex<LiveState>,
    settings: &LiveSettings,
) {
    // Frame reads and JPEG encoding block; keep them off the runtime threads.
    let still = tokio::task::spawn_blocking({
        let capture = Arc::clone(capture);
        let quality = settings.quality;
        move || lock(&capture).capture_frame(quality)
    })
    .await;
    let still = match still {
        Ok(Ok(still)) => still,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "frame capture failed");
            show_transient(state, e.to_string(), settings.error_duration);
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "capture task failed");
            return;
        }
    };

    let class_section = lock(state).class_section.clone();
    let request = RecognizeRequest {
        image: still.to_data_url(),
        class_section: (!class_section.is_empty()).then_some(class_section),
    };

    match api.recognize(request).await {
        Ok(resp) => {
            let Some(face) = resp.first_match() else {
                tracing::debug!("recognize returned no identities");
                return;
            };
            let event = RecognitionEvent::from_match(face, Utc::now());
            let mut state = lock(state);
            if state.log.record(event) {
                tracing::info!(student_id = %face.student_id, confidence = face.confidence, "student recognized");
            } else {
                tracing::debug!(student_id = %face.student_id, "already logged");
            }
            state.flash_until = Some(Instant::now() + settings.flash_duration);
        }
        Err(e) => match e.recognition_kind() {
            RecognitionErrorKind::NotRecognized => {
                tracing::debug!("face not recognized");
            }
            RecognitionErrorKind::NoFace => {
                tracing::debug!("no face in still");
                show_transient(state, MSG_NO_FACE.to_string(), settings.error_duration);
            }
            RecognitionErrorKind::Other => {
                tracing::warn!(error = %e, "recognize failed");
                let text = e.to_string();
                let text = if text.is_empty() { MSG_RECOGNITION_FAILED.to_string() } else { text };
                show_transient(state, text, settings.error_duration);
            }
        },
    }
}

fn show_transient(state: &Mutex<LiveState>, text: String, duration: Duration) {
    lock(state).notice = Some(Notice::Transient {
        text,
        until: Instant::now() + duration,
    });
}

async fn run_preview(
    capture: Arc<Mutex<CaptureSession>>,
    state: Arc<Mutex<LiveState>>,
    sink: Arc<dyn PreviewSink>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let marks = {
            let state = lock(&state);
            match (state.phase, state.detection_box) {
                (LivePhase::Scanning, Some(bbox)) => Some((bbox, state.progress)),
                _ => None,
            }
        };

        let drawn = tokio::task::spawn_blocking({
            let capture = Arc::clone(&capture);
            let sink = Arc::clone(&sink);
            move || {
                let mut frame = lock(&capture).read_raster()?;
                if let Some((bbox, progress)) = marks {
                    overlay::draw_overlay(&mut frame, &bbox, progress);
                }
                sink.present(&frame);
                Ok::<(), CaptureError>(())
            }
        })
        .await;
        match drawn {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "preview frame unavailable"),
            Err(e) => tracing::warn!(error = %e, "preview task failed"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
