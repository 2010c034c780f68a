use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;

use lesson_core::model::{LessonId, LessonProgress, ProgressUpdate};

use crate::config::ProgressApiConfig;
use crate::error::ProgressStoreError;
use crate::progress_store::ProgressStore;

/// `ProgressStore` backed by the platform's REST API.
///
/// * `PUT {base}/progress/lesson/{id}` with `{watchedDuration, videoProgressPercent}`
/// * `POST {base}/progress/complete/{id}`
///
/// Both reply `{progress: {...}}`.
#[derive(Clone)]
pub struct HttpProgressStore {
    client: Client,
    config: ProgressApiConfig,
}

impl HttpProgressStore {
    /// Build a store with a client honoring the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `ProgressStoreError::Http` if the HTTP client cannot be built.
    pub fn new(config: ProgressApiConfig) -> Result<Self, ProgressStoreError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Build a store around an existing client.
    #[must_use]
    pub fn with_client(client: Client, config: ProgressApiConfig) -> Self {
        Self { client, config }
    }

    /// Build a store from `LEARN_API_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ProgressStoreError::Unavailable` when configuration is
    /// missing or invalid.
    pub fn from_env() -> Result<Self, ProgressStoreError> {
        let config = ProgressApiConfig::from_env()
            .map_err(|err| ProgressStoreError::Unavailable(err.to_string()))?;
        Self::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &ProgressApiConfig {
        &self.config
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.config.endpoint(segments));
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ProgressStore for HttpProgressStore {
    async fn save_lesson_progress(
        &self,
        lesson_id: &LessonId,
        update: &ProgressUpdate,
    ) -> Result<LessonProgress, ProgressStoreError> {
        let response = self
            .request(Method::PUT, &["progress", "lesson", lesson_id.as_str()])
            .json(update)
            .send()
            .await?;
        read_progress(response).await
    }

    async fn complete_lesson(
        &self,
        lesson_id: &LessonId,
    ) -> Result<LessonProgress, ProgressStoreError> {
        let response = self
            .request(Method::POST, &["progress", "complete", lesson_id.as_str()])
            .send()
            .await?;
        read_progress(response).await
    }
}

async fn read_progress(response: Response) -> Result<LessonProgress, ProgressStoreError> {
    let status = response.status();
    if status.is_client_error() {
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_owned()
            });
        return Err(ProgressStoreError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    if !status.is_success() {
        return Err(ProgressStoreError::HttpStatus(status));
    }

    let body: ProgressEnvelope = response.json().await?;
    Ok(body.progress)
}

#[derive(Debug, Deserialize)]
struct ProgressEnvelope {
    progress: LessonProgress,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned HTTP response and hands back the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0_u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&raw) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (base, handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn store(base: &str) -> HttpProgressStore {
        let config = ProgressApiConfig::new(base).unwrap().with_token("t0k3n");
        let client = Client::builder().no_proxy().build().unwrap();
        HttpProgressStore::with_client(client, config)
    }

    #[tokio::test]
    async fn puts_progress_and_reads_envelope() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"progress":{"watchedDuration":12.5,"videoProgressPercent":30,"isCompleted":false,"lesson":"l1"}}"#,
        )
        .await;
        let update = ProgressUpdate {
            watched_duration: 12.5,
            video_progress_percent: 30,
        };

        let progress = store(&base)
            .save_lesson_progress(&LessonId::new("l1").unwrap(), &update)
            .await
            .unwrap();
        assert!(!progress.is_completed);
        assert!((progress.video_progress_percent - 30.0).abs() < f64::EPSILON);

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/progress/lesson/l1 HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer t0k3n"));
        assert!(request.contains(r#""watchedDuration":12.5"#));
        assert!(request.contains(r#""videoProgressPercent":30"#));
    }

    #[tokio::test]
    async fn completion_rejection_carries_server_message() {
        let (base, server) = serve_once(
            "400 Bad Request",
            r#"{"message":"Pass the lesson quiz before completing"}"#,
        )
        .await;

        let err = store(&base)
            .complete_lesson(&LessonId::new("l1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressStoreError::Rejected { status: 400, ref message }
                if message == "Pass the lesson quiz before completing"
        ));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/progress/complete/l1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn rejection_without_body_uses_reason() {
        let (base, _server) = serve_once("403 Forbidden", "").await;
        let err = store(&base)
            .complete_lesson(&LessonId::new("l1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressStoreError::Rejected { status: 403, ref message } if message == "Forbidden"
        ));
    }

    #[tokio::test]
    async fn server_error_is_a_status_failure() {
        let (base, _server) = serve_once("503 Service Unavailable", "{}").await;
        let update = ProgressUpdate {
            watched_duration: 1.0,
            video_progress_percent: 5,
        };
        let err = store(&base)
            .save_lesson_progress(&LessonId::new("l1").unwrap(), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressStoreError::HttpStatus(s) if s.as_u16() == 503));
    }
}
