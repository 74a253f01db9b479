//! reqwest-backed client for the recognition service.

use crate::error::{ApiError, RecognitionErrorKind};
use crate::types::{
    AttendanceFilter, AttendanceRecord, AuditEntry, ClassInfo, CreateClassRequest, ErrorBody,
    ManualAttendanceRequest, RecognizeRequest, RecognizeResponse, RegisterRequest, Student,
    StudentFilter,
};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Service address used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const CLASSES: &str = "/api/classes";
const REGISTER: &str = "/api/register";
const RECOGNIZE: &str = "/api/recognize";
const STUDENTS: &str = "/api/students";
const ATTENDANCE: &str = "/api/attendance";
const MANUAL_ATTENDANCE: &str = "/api/attendance/manual";
const AUDIT_LOGS: &str = "/api/audit-logs";

/// The slice of the service the flow controllers depend on.
pub trait RecognitionBackend: Send + Sync + 'static {
    /// Reachability probe. Never fails: any error reads as `false`.
    fn check_health(&self) -> impl Future<Output = bool> + Send;

    fn register(
        &self,
        request: RegisterRequest,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    fn recognize(
        &self,
        request: RecognizeRequest,
    ) -> impl Future<Output = Result<RecognizeResponse, ApiError>> + Send;
}

/// Stateless wrapper over the service's HTTP surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://"))
            || Url::parse(base_url).is_err()
        {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `{base}{collection}/{id}` with `id` as a single percent-encoded segment.
    fn item_url(&self, collection: &str, id: &str) -> Result<Url, ApiError> {
        let invalid = || ApiError::InvalidBaseUrl(self.base_url.clone());
        let mut url = Url::parse(&self.url(collection)).map_err(|_| invalid())?;
        url.path_segments_mut().map_err(|_| invalid())?.push(id);
        Ok(url)
    }

    /// GET the class list and report whether it answered 2xx.
    pub async fn check_health(&self) -> bool {
        match self.http.get(self.url(CLASSES)).send().await {
            Ok(resp) => {
                let status = resp.status();
                tracing::debug!(status = %status, "health probe answered");
                status.is_success()
            }
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// Enroll a student. The success body is returned undecoded.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Value, ApiError> {
        let resp = self.http.post(self.url(REGISTER)).json(request).send().await?;
        log_status(REGISTER, &resp);

        if !resp.status().is_success() {
            let body = error_body(resp).await;
            return Err(ApiError::Registration(
                body.message_or("Failed to register student"),
            ));
        }
        Ok(resp.json().await?)
    }

    /// Match a still against the students of a class section.
    pub async fn recognize(&self, request: &RecognizeRequest) -> Result<RecognizeResponse, ApiError> {
        let resp = self.http.post(self.url(RECOGNIZE)).json(request).send().await?;
        log_status(RECOGNIZE, &resp);

        if !resp.status().is_success() {
            let body = error_body(resp).await;
            let message = body.message_or("Face not recognized");
            let kind = RecognitionErrorKind::classify(body.code.as_deref(), &message);
            return Err(ApiError::Recognition { kind, message });
        }
        Ok(resp.json().await?)
    }

    pub async fn list_students(&self, filter: &StudentFilter) -> Result<Vec<Student>, ApiError> {
        let resp = self.http.get(self.url(STUDENTS)).query(filter).send().await?;
        decode_list(STUDENTS, resp, "Failed to fetch students").await
    }

    pub async fn list_attendance(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, ApiError> {
        let resp = self.http.get(self.url(ATTENDANCE)).query(filter).send().await?;
        decode_list(ATTENDANCE, resp, "Failed to fetch attendance").await
    }

    /// Mark a student present without a recognition round-trip.
    pub async fn mark_attendance_manually(
        &self,
        student_id: &str,
        class_section: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = ManualAttendanceRequest {
            student_id,
            class_section,
        };
        let resp = self
            .http
            .post(self.url(MANUAL_ATTENDANCE))
            .json(&body)
            .send()
            .await?;
        decode_value(MANUAL_ATTENDANCE, resp, "Failed to mark attendance").await
    }

    pub async fn list_classes(&self) -> Result<Vec<ClassInfo>, ApiError> {
        let resp = self.http.get(self.url(CLASSES)).send().await?;
        decode_list(CLASSES, resp, "Failed to fetch classes").await
    }

    pub async fn create_class(
        &self,
        class_name: &str,
        description: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = CreateClassRequest {
            class_name,
            description,
        };
        let resp = self.http.post(self.url(CLASSES)).json(&body).send().await?;
        decode_value(CLASSES, resp, "Failed to create class").await
    }

    /// Remove a student together with their attendance history.
    pub async fn delete_student(&self, student_id: &str) -> Result<Value, ApiError> {
        let url = self.item_url(STUDENTS, student_id)?;
        let resp = self.http.delete(url).send().await?;
        decode_value(STUDENTS, resp, "Failed to delete student").await
    }

    pub async fn audit_logs(&self, limit: Option<u32>) -> Result<Vec<AuditEntry>, ApiError> {
        let mut req = self.http.get(self.url(AUDIT_LOGS));
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        let resp = req.send().await?;
        decode_list(AUDIT_LOGS, resp, "Failed to fetch audit logs").await
    }
}

impl RecognitionBackend for ApiClient {
    async fn check_health(&self) -> bool {
        ApiClient::check_health(self).await
    }

    async fn register(&self, request: RegisterRequest) -> Result<Value, ApiError> {
        ApiClient::register(self, &request).await
    }

    async fn recognize(&self, request: RecognizeRequest) -> Result<RecognizeResponse, ApiError> {
        ApiClient::recognize(self, &request).await
    }
}

fn log_status(endpoint: &str, resp: &Response) {
    let status = resp.status();
    if status.is_success() {
        tracing::debug!(endpoint, status = %status, "api call succeeded");
    } else {
        tracing::warn!(endpoint, status = %status, "api call rejected");
    }
}

/// Read the error body of a failed response. Non-JSON bodies read as empty.
async fn error_body(resp: Response) -> ErrorBody {
    resp.json::<ErrorBody>().await.unwrap_or_default()
}

/// List endpoints report a fixed message on failure, ignoring the body.
async fn decode_list<T: DeserializeOwned>(
    endpoint: &str,
    resp: Response,
    failure: &str,
) -> Result<Vec<T>, ApiError> {
    log_status(endpoint, &resp);
    if !resp.status().is_success() {
        return Err(ApiError::Request(failure.to_string()));
    }
    Ok(resp.json().await?)
}

/// Mutating endpoints surface the service's `error` field when present.
async fn decode_value(endpoint: &str, resp: Response, failure: &str) -> Result<Value, ApiError> {
    log_status(endpoint, &resp);
    if !resp.status().is_success() {
        let body = error_body(resp).await;
        return Err(ApiError::Request(body.message_or(failure)));
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(app: Router) -> ApiClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ApiClient::new(&format!("http://{addr}/"), Duration::from_secs(5)).unwrap()
    }

    fn image() -> String {
        "data:image/jpeg;base64,/9j/AA==".to_string()
    }

    #[test]
    fn test_base_url_validation() {
        assert!(matches!(
            ApiClient::new("localhost:5000", DEFAULT_TIMEOUT),
            Err(ApiError::InvalidBaseUrl(_))
        ));
        let client = ApiClient::new("http://localhost:5000///", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(client.url(RECOGNIZE), "http://localhost:5000/api/recognize");
    }

    #[tokio::test]
    async fn test_health_ok() {
        let client = serve(Router::new().route(
            "/api/classes",
            get(|| async { Json(json!([{"name": "Default", "description": "Default class"}])) }),
        ))
        .await;
        assert!(client.check_health().await);
    }

    #[tokio::test]
    async fn test_health_non_2xx_is_unreachable() {
        let client = serve(Router::new().route(
            "/api/classes",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        assert!(!client.check_health().await);
    }

    #[tokio::test]
    async fn test_health_connection_refused_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        assert!(!client.check_health().await);
    }

    #[tokio::test]
    async fn test_register_success_returns_body() {
        let client = serve(Router::new().route(
            "/api/register",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["student_id"], "S1");
                assert!(body["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
                Json(json!({"message": format!("Student {} registered successfully", body["name"].as_str().unwrap())}))
            }),
        ))
        .await;

        let req = RegisterRequest {
            name: "Ada".into(),
            student_id: "S1".into(),
            email: None,
            class_section: Some("Default".into()),
            image: image(),
        };
        let body = client.register(&req).await.unwrap();
        assert_eq!(body["message"], "Student Ada registered successfully");
    }

    #[tokio::test]
    async fn test_register_rejection_carries_server_message() {
        let client = serve(Router::new().route(
            "/api/register",
            post(|| async {
                (StatusCode::BAD_REQUEST, Json(json!({"error": "Student ID already exists"})))
            }),
        ))
        .await;

        let req = RegisterRequest {
            name: "Ada".into(),
            student_id: "S1".into(),
            email: Some("ada@example.com".into()),
            class_section: None,
            image: image(),
        };
        let err = client.register(&req).await.unwrap_err();
        assert!(matches!(err, ApiError::Registration(ref m) if m == "Student ID already exists"));
    }

    #[tokio::test]
    async fn test_register_rejection_without_json_uses_fallback() {
        let client = serve(Router::new().route(
            "/api/register",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;

        let req = RegisterRequest {
            name: "Ada".into(),
            student_id: "S1".into(),
            email: None,
            class_section: None,
            image: image(),
        };
        let err = client.register(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to register student");
    }

    #[tokio::test]
    async fn test_recognize_success() {
        let client = serve(Router::new().route(
            "/api/recognize",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["class_section"], "CS-101");
                Json(json!({"recognized": [{"student_id": "S1", "name": "Ada", "confidence": 0.87}]}))
            }),
        ))
        .await;

        let resp = client
            .recognize(&RecognizeRequest {
                image: image(),
                class_section: Some("CS-101".into()),
            })
            .await
            .unwrap();
        let face = resp.first_match().unwrap();
        assert_eq!(face.student_id, "S1");
        assert!((face.confidence - 0.87).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recognize_failures_are_classified() {
        let client = serve(
            Router::new().route(
                "/api/recognize",
                post(|Json(body): Json<Value>| async move {
                    match body["class_section"].as_str() {
                        Some("noface") => (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "No face detected in image"})),
                        ),
                        Some("stranger") => (
                            StatusCode::NOT_FOUND,
                            Json(json!({"error": "Face not recognized"})),
                        ),
                        Some("coded") => (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "nobody there", "code": "no_face"})),
                        ),
                        _ => (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "No students registered in this class"})),
                        ),
                    }
                }),
            ),
        )
        .await;

        let kind_for = |section: &'static str| {
            let client = client.clone();
            async move {
                client
                    .recognize(&RecognizeRequest {
                        image: image(),
                        class_section: Some(section.into()),
                    })
                    .await
                    .unwrap_err()
                    .recognition_kind()
            }
        };

        assert_eq!(kind_for("noface").await, RecognitionErrorKind::NoFace);
        assert_eq!(kind_for("stranger").await, RecognitionErrorKind::NotRecognized);
        assert_eq!(kind_for("coded").await, RecognitionErrorKind::NoFace);
        assert_eq!(kind_for("empty").await, RecognitionErrorKind::Other);
    }

    #[tokio::test]
    async fn test_list_students_sends_filters() {
        let client = serve(Router::new().route(
            "/api/students",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(json!([{
                    "student_id": "S1",
                    "name": params.get("search").cloned().unwrap_or_default(),
                    "email": null,
                    "class_section": params.get("class_section").cloned(),
                    "created_at": "2026-01-05 09:00:00"
                }]))
            }),
        ))
        .await;

        let students = client
            .list_students(&StudentFilter {
                class_section: Some("CS-101".into()),
                search: Some("Ada".into()),
            })
            .await
            .unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Ada");
        assert_eq!(students[0].class_section.as_deref(), Some("CS-101"));
        assert_eq!(students[0].email, None);
    }

    #[tokio::test]
    async fn test_list_attendance_failure_is_generic() {
        let client = serve(Router::new().route(
            "/api/attendance",
            get(|| async {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "db locked"})))
            }),
        ))
        .await;

        let err = client
            .list_attendance(&AttendanceFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Request(ref m) if m == "Failed to fetch attendance"));
    }

    #[tokio::test]
    async fn test_list_attendance_parses_records() {
        let client = serve(Router::new().route(
            "/api/attendance",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("date").map(String::as_str), Some("2026-03-02"));
                Json(json!([{
                    "student_id": "S1", "name": "Ada",
                    "timestamp": "2026-03-02 08:59:00", "marked_by": "auto"
                }]))
            }),
        ))
        .await;

        let rows = client
            .list_attendance(&AttendanceFilter {
                date: Some("2026-03-02".into()),
                class_section: None,
            })
            .await
            .unwrap();
        assert_eq!(rows[0].marked_by, "auto");
    }

    #[tokio::test]
    async fn test_manual_attendance() {
        let client = serve(Router::new().route(
            "/api/attendance/manual",
            post(|Json(body): Json<Value>| async move {
                if body["student_id"] == "S1" {
                    (StatusCode::OK, Json(json!({"message": "Attendance marked for Ada"})))
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({"error": "Student not found"})))
                }
            }),
        ))
        .await;

        let ok = client.mark_attendance_manually("S1", Some("Default")).await.unwrap();
        assert_eq!(ok["message"], "Attendance marked for Ada");

        let err = client.mark_attendance_manually("S9", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Request(ref m) if m == "Student not found"));
    }

    #[tokio::test]
    async fn test_classes_delete_and_audit() {
        let client = serve(
            Router::new()
                .route(
                    "/api/classes",
                    get(|| async { Json(json!([{"name": "Default", "description": null}])) }).post(
                        |Json(body): Json<Value>| async move {
                            if body["class_name"] == "Default" {
                                (StatusCode::BAD_REQUEST, Json(json!({"error": "Class already exists"})))
                            } else {
                                (StatusCode::OK, Json(json!({"message": "Class created successfully"})))
                            }
                        },
                    ),
                )
                .route(
                    "/api/students/{id}",
                    delete(|Path(id): Path<String>| async move {
                        Json(json!({"message": format!("deleted {id}")}))
                    }),
                )
                .route(
                    "/api/audit-logs",
                    get(|Query(params): Query<HashMap<String, String>>| async move {
                        let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(50);
                        let rows: Vec<Value> = (0..limit.min(3))
                            .map(|i| json!({"action": "MARK_ATTENDANCE", "details": format!("#{i}"), "timestamp": "2026-03-02 09:00:00"}))
                            .collect();
                        Json(Value::Array(rows))
                    }),
                ),
        )
        .await;

        let classes = client.list_classes().await.unwrap();
        assert_eq!(classes[0].name, "Default");
        assert_eq!(classes[0].description, None);

        let err = client.create_class("Default", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Class already exists");
        client.create_class("CS-101", Some("Intro")).await.unwrap();

        let deleted = client.delete_student("S1").await.unwrap();
        assert_eq!(deleted["message"], "deleted S1");

        let logs = client.audit_logs(Some(2)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].details.as_deref(), Some("#1"));
    }

    #[tokio::test]
    async fn test_delete_student_escapes_reserved_characters() {
        let client = serve(Router::new().route(
            "/api/students/{id}",
            delete(|Path(id): Path<String>| async move {
                Json(json!({"message": format!("deleted {id}")}))
            }),
        ))
        .await;

        for id in ["S1?x=1", "2023/CS-01", "A#7", "Zoë 2"] {
            let deleted = client.delete_student(id).await.unwrap();
            assert_eq!(deleted["message"], format!("deleted {id}"));
        }
    }

    #[test]
    fn test_item_url_is_one_segment() {
        let client = ApiClient::new("http://localhost:5000/", DEFAULT_TIMEOUT).unwrap();
        let url = client.item_url(STUDENTS, "2023/CS-01?x").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/students/2023%2FCS-01%3Fx");
    }
}
