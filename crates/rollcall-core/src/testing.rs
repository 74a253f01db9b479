//! In-memory recognition backend for controller tests.

use rollcall_client::{
    ApiError, RecognitionBackend, RecognitionErrorKind, RecognizeRequest, RecognizeResponse,
    RecognizedFace, RegisterRequest,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    inner: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    unhealthy: AtomicBool,
    register_calls: AtomicUsize,
    recognize_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    recognize_delay: Mutex<Duration>,
    register_delay: Mutex<Duration>,
    registrations: Mutex<Vec<RegisterRequest>>,
    register_results: Mutex<VecDeque<Result<Value, ApiError>>>,
    recognize_results: Mutex<VecDeque<Result<RecognizeResponse, ApiError>>>,
}

impl FakeBackend {
    pub fn unhealthy() -> Self {
        let fake = Self::default();
        fake.inner.unhealthy.store(true, Ordering::SeqCst);
        fake
    }

    pub fn register_calls(&self) -> usize {
        self.inner.register_calls.load(Ordering::SeqCst)
    }

    pub fn recognize_calls(&self) -> usize {
        self.inner.recognize_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> Vec<RegisterRequest> {
        self.inner.registrations.lock().unwrap().clone()
    }

    pub fn set_recognize_delay(&self, delay: Duration) {
        *self.inner.recognize_delay.lock().unwrap() = delay;
    }

    pub fn set_register_delay(&self, delay: Duration) {
        *self.inner.register_delay.lock().unwrap() = delay;
    }

    pub fn push_register(&self, result: Result<Value, ApiError>) {
        self.inner.register_results.lock().unwrap().push_back(result);
    }

    pub fn push_match(&self, student_id: &str, name: &str, confidence: f32) {
        self.inner
            .recognize_results
            .lock()
            .unwrap()
            .push_back(Ok(RecognizeResponse {
                recognized: vec![RecognizedFace {
                    student_id: student_id.into(),
                    name: name.into(),
                    confidence,
                }],
            }));
    }

    pub fn push_recognize_error(&self, message: &str) {
        let kind = RecognitionErrorKind::classify(None, message);
        self.inner
            .recognize_results
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Recognition {
                kind,
                message: message.into(),
            }));
    }
}

impl RecognitionBackend for FakeBackend {
    async fn check_health(&self) -> bool {
        !self.inner.unhealthy.load(Ordering::SeqCst)
    }

    async fn register(&self, request: RegisterRequest) -> Result<Value, ApiError> {
        self.inner.register_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.registrations.lock().unwrap().push(request);
        let delay = *self.inner.register_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self.inner.register_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(json!({"message": "registered"})))
    }

    async fn recognize(&self, _request: RecognizeRequest) -> Result<RecognizeResponse, ApiError> {
        self.inner.recognize_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.inner.recognize_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        let next = self.inner.recognize_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RecognizeResponse::default()))
    }
}
