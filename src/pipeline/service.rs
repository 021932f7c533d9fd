//! Client for the PDF → LaTeX OCR service, and the polling loop around it.
//!
//! The service protocol has three calls:
//!
//! | call       | request                                   | result                     |
//! |------------|-------------------------------------------|----------------------------|
//! | `submit`   | `POST {endpoint}` multipart (`options_json`, `file`) | `{"pdf_id": …}` |
//! | `status`   | `GET {endpoint}/{job_id}`                 | `{"status", "percent_done"}` |
//! | `download` | `GET {endpoint}/{job_id}.tex`             | zip archive bytes          |
//!
//! [`OcrService`] abstracts these so the orchestrator and the submission
//! cache can be tested without a network. [`MathpixClient`] is the HTTP
//! implementation.

use crate::config::{ConversionConfig, ServiceCredentials};
use crate::error::Pdf2TxtError;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Processing state reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceStatus {
    /// Still working. `status` is the raw value (`"received"`, `"split"`, …).
    Processing { status: String, percent_done: u8 },
    Completed,
    /// Terminal failure with the service's message.
    Error(String),
}

/// The three calls of the OCR service.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Upload a PDF and return the job id.
    async fn submit(&self, pdf: &[u8], filename: &str) -> Result<String, Pdf2TxtError>;

    async fn status(&self, job_id: &str) -> Result<ServiceStatus, Pdf2TxtError>;

    /// Fetch the result archive of a completed job.
    async fn download(&self, job_id: &str) -> Result<Vec<u8>, Pdf2TxtError>;
}

/// HTTP client for the Mathpix `v3/pdf` API.
pub struct MathpixClient {
    client: reqwest::Client,
    endpoint: String,
    credentials: ServiceCredentials,
}

impl std::fmt::Debug for MathpixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MathpixClient")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    pdf_id: Option<String>,
    error: Option<String>,
    error_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<String>,
    percent_done: Option<f64>,
    error: Option<String>,
    error_info: Option<serde_json::Value>,
}

impl MathpixClient {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: ServiceCredentials,
        http_timeout: Duration,
    ) -> Result<Self, Pdf2TxtError> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| Pdf2TxtError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Build from a config; fails if no credentials were provided.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, Pdf2TxtError> {
        let credentials = config.credentials.clone().ok_or_else(|| {
            Pdf2TxtError::InvalidConfig(format!(
                "OCR service credentials missing; set {} and {}",
                crate::config::APP_ID_ENV,
                crate::config::APP_KEY_ENV
            ))
        })?;
        Self::new(
            config.service_endpoint.clone(),
            credentials,
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("app_id", &self.credentials.app_id)
            .header("app_key", &self.credentials.app_key)
    }
}

/// Options sent with every upload: only the LaTeX zip is requested.
fn submission_options() -> serde_json::Value {
    serde_json::json!({
        "conversion_formats": {
            "md": false,
            "docx": false,
            "tex.zip": true,
            "html": false
        }
    })
}

#[async_trait]
impl OcrService for MathpixClient {
    async fn submit(&self, pdf: &[u8], filename: &str) -> Result<String, Pdf2TxtError> {
        let submission_error = |detail: String| Pdf2TxtError::Submission {
            filename: filename.to_string(),
            detail,
            info: None,
        };

        let part = multipart::Part::bytes(pdf.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| submission_error(e.to_string()))?;
        let form = multipart::Form::new()
            .text("options_json", submission_options().to_string())
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .header("app_id", &self.credentials.app_id)
            .header("app_key", &self.credentials.app_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| submission_error(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| submission_error(e.to_string()))?;
        if !status.is_success() {
            return Err(submission_error(format!("HTTP {status}: {body}")));
        }

        let parsed: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| submission_error(format!("unreadable response ({e}): {body}")))?;
        if let Some(error) = parsed.error {
            warn!("Service rejected {}: {}", filename, error);
            return Err(Pdf2TxtError::Submission {
                filename: filename.to_string(),
                detail: error,
                info: parsed.error_info,
            });
        }
        let job_id = parsed
            .pdf_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| submission_error(format!("response without pdf_id: {body}")))?;
        info!("Submitted {} as job {}", filename, job_id);
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<ServiceStatus, Pdf2TxtError> {
        let transport = |detail: String| Pdf2TxtError::Transport {
            job_id: job_id.to_string(),
            stage: "status",
            detail,
        };

        let response = self
            .get(format!("{}/{}", self.endpoint, job_id))
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| transport(format!("unreadable status: {e}")))?;
        Ok(interpret_status(body))
    }

    async fn download(&self, job_id: &str) -> Result<Vec<u8>, Pdf2TxtError> {
        let transport = |detail: String| Pdf2TxtError::Transport {
            job_id: job_id.to_string(),
            stage: "download",
            detail,
        };

        let response = self
            .get(format!("{}/{}.tex", self.endpoint, job_id))
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport(e.to_string()))?;
        debug!("Downloaded {} bytes for job {}", bytes.len(), job_id);
        Ok(bytes.to_vec())
    }
}

fn interpret_status(body: StatusResponse) -> ServiceStatus {
    match body.status.as_deref() {
        Some("completed") => ServiceStatus::Completed,
        Some("error") => ServiceStatus::Error(error_message(body.error, body.error_info)),
        None if body.error.is_some() => {
            ServiceStatus::Error(error_message(body.error, body.error_info))
        }
        other => ServiceStatus::Processing {
            status: other.unwrap_or("unknown").to_string(),
            percent_done: body.percent_done.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8,
        },
    }
}

fn error_message(error: Option<String>, info: Option<serde_json::Value>) -> String {
    match (error, info) {
        (Some(e), Some(i)) => format!("{e} ({i})"),
        (Some(e), None) => e,
        (None, Some(i)) => i.to_string(),
        (None, None) => "service reported status 'error'".to_string(),
    }
}

/// A wall-clock budget shared by polling and archive re-downloads.
///
/// Uses [`tokio::time::Instant`] so tests with paused time see virtual time.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    fn timeout_error(&self, job_id: &str) -> Pdf2TxtError {
        Pdf2TxtError::Timeout {
            job_id: job_id.to_string(),
            secs: self.budget.as_secs(),
        }
    }
}

/// Poll `job_id` until the service reports `completed`.
///
/// Sleeps `poll_interval` (or whatever is left of the budget, if less)
/// between polls. Returns [`Pdf2TxtError::Timeout`] once the deadline has
/// passed without a `completed` status, and [`Pdf2TxtError::Service`] as soon
/// as the service reports `error`. Reported `percent_done` values reach the
/// progress callback only when they increase.
pub async fn await_completion(
    service: &dyn OcrService,
    job_id: &str,
    deadline: &Deadline,
    poll_interval: Duration,
    progress: Option<&ProgressCallback>,
) -> Result<(), Pdf2TxtError> {
    let mut last_percent: Option<u8> = None;
    let mut polls = 0u32;
    loop {
        polls += 1;
        match service.status(job_id).await? {
            ServiceStatus::Completed => {
                info!("Job {} completed after {} poll(s)", job_id, polls);
                if let Some(cb) = progress {
                    if last_percent.map_or(true, |p| p < 100) {
                        cb.on_poll_progress(job_id, 100);
                    }
                }
                return Ok(());
            }
            ServiceStatus::Error(detail) => {
                return Err(Pdf2TxtError::Service {
                    job_id: job_id.to_string(),
                    detail,
                });
            }
            ServiceStatus::Processing {
                status,
                percent_done,
            } => {
                debug!("Job {}: {} ({}%)", job_id, status, percent_done);
                if last_percent.map_or(true, |p| percent_done > p) {
                    last_percent = Some(percent_done);
                    if let Some(cb) = progress {
                        cb.on_poll_progress(job_id, percent_done);
                    }
                }
            }
        }

        if deadline.expired() {
            warn!(
                "Job {} not complete after {}s ({} polls)",
                job_id,
                deadline.budget().as_secs(),
                polls
            );
            return Err(deadline.timeout_error(job_id));
        }
        tokio::time::sleep(poll_interval.min(deadline.remaining())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ConversionProgressCallback;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> MathpixClient {
        MathpixClient::new(
            format!("{}/v3/pdf", server.uri()),
            ServiceCredentials::new("test-id", "test-key"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn submit_returns_pdf_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/pdf"))
            .and(header("app_id", "test-id"))
            .and(header("app_key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"pdf_id": "2024_abc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).submit(b"%PDF-1.7", "paper.pdf").await.unwrap();
        assert_eq!(id, "2024_abc");
    }

    #[tokio::test]
    async fn submit_surfaces_inline_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "Invalid credentials",
                "error_info": {"id": "http_unauthorized"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).submit(b"%PDF", "x.pdf").await.unwrap_err();
        match err {
            Pdf2TxtError::Submission { detail, info, .. } => {
                assert_eq!(detail, "Invalid credentials");
                assert_eq!(info.unwrap()["id"], "http_unauthorized");
            }
            other => panic!("expected Submission, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_parses_progress_and_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/pdf/job-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "split", "percent_done": 42.6}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/pdf/job-b"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "completed"})),
            )
            .mount(&server)
            .await;

        let c = client(&server);
        assert_eq!(
            c.status("job-a").await.unwrap(),
            ServiceStatus::Processing {
                status: "split".into(),
                percent_done: 43
            }
        );
        assert_eq!(c.status("job-b").await.unwrap(), ServiceStatus::Completed);
    }

    #[tokio::test]
    async fn status_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "error", "error": "PDF is encrypted"}),
            ))
            .mount(&server)
            .await;
        assert_eq!(
            client(&server).status("j").await.unwrap(),
            ServiceStatus::Error("PDF is encrypted".into())
        );
    }

    #[tokio::test]
    async fn download_fetches_tex_zip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/pdf/job-z.tex"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04zip".to_vec()))
            .mount(&server)
            .await;
        let bytes = client(&server).download("job-z").await.unwrap();
        assert_eq!(bytes, b"PK\x03\x04zip");
    }

    #[tokio::test]
    async fn download_http_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let err = client(&server).download("job-z").await.unwrap_err();
        assert!(matches!(
            err,
            Pdf2TxtError::Transport {
                stage: "download",
                ..
            }
        ));
    }

    /// Replays a fixed list of statuses, then repeats the last one.
    struct ScriptedService {
        statuses: Mutex<VecDeque<ServiceStatus>>,
        polls: Mutex<u32>,
    }

    impl ScriptedService {
        fn new(statuses: Vec<ServiceStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                polls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrService for ScriptedService {
        async fn submit(&self, _pdf: &[u8], _filename: &str) -> Result<String, Pdf2TxtError> {
            Ok("job".into())
        }

        async fn status(&self, _job_id: &str) -> Result<ServiceStatus, Pdf2TxtError> {
            *self.polls.lock().unwrap() += 1;
            let mut q = self.statuses.lock().unwrap();
            if q.len() > 1 {
                Ok(q.pop_front().unwrap())
            } else {
                Ok(q.front().cloned().unwrap())
            }
        }

        async fn download(&self, _job_id: &str) -> Result<Vec<u8>, Pdf2TxtError> {
            Ok(Vec::new())
        }
    }

    fn processing(p: u8) -> ServiceStatus {
        ServiceStatus::Processing {
            status: "split".into(),
            percent_done: p,
        }
    }

    #[derive(Default)]
    struct PercentRecorder(Mutex<Vec<u8>>);

    impl ConversionProgressCallback for PercentRecorder {
        fn on_poll_progress(&self, _job_id: &str, percent_done: u8) {
            self.0.lock().unwrap().push(percent_done);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_processing() {
        let svc = ScriptedService::new(vec![processing(10), processing(60), ServiceStatus::Completed]);
        let deadline = Deadline::after(Duration::from_secs(60));
        await_completion(&svc, "job", &deadline, Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(*svc.polls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_one_interval_of_budget() {
        let svc = ScriptedService::new(vec![processing(5)]);
        let deadline = Deadline::after(Duration::from_secs(60));
        let started = Instant::now();
        let err = await_completion(&svc, "job", &deadline, Duration::from_secs(5), None)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, Pdf2TxtError::Timeout { secs: 60, .. }));
        assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(65), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn service_error_stops_polling_immediately() {
        let svc = ScriptedService::new(vec![processing(20), ServiceStatus::Error("bad pdf".into())]);
        let deadline = Deadline::after(Duration::from_secs(60));
        let err = await_completion(&svc, "job", &deadline, Duration::from_secs(5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2TxtError::Service { .. }));
        assert_eq!(*svc.polls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn percent_reported_monotonically() {
        let svc = ScriptedService::new(vec![
            processing(10),
            processing(40),
            processing(30),
            processing(40),
            processing(90),
            ServiceStatus::Completed,
        ]);
        let recorder = Arc::new(PercentRecorder::default());
        let cb: ProgressCallback = recorder.clone();
        let deadline = Deadline::after(Duration::from_secs(60));
        await_completion(&svc, "job", &deadline, Duration::from_secs(1), Some(&cb))
            .await
            .unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![10, 40, 90, 100]);
    }

    #[test]
    fn submission_options_request_only_tex_zip() {
        let opts = submission_options();
        assert_eq!(opts["conversion_formats"]["tex.zip"], true);
        assert_eq!(opts["conversion_formats"]["md"], false);
    }
}
