use futures_util::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::io::ReaderStream;

use super::error::UploadError;
use super::{RemoteUploadClient, UploadEvent, UploadResponse, UploadStream, UploadTarget};
use crate::transform::TransformedImage;

/// Size of the pieces the file part is streamed in.
const CHUNK_SIZE: usize = 64 * 1024;

/// Smallest increase in the sent fraction worth reporting.
const PROGRESS_STEP: f64 = 0.01;

/// Longest slice of a rejection body kept for diagnostics.
const MAX_ERROR_BODY: usize = 512;

/// Uploads over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    client: Client,
}

impl HttpUploadClient {
    pub fn new() -> Result<Self, UploadError> {
        let client = Client::builder()
            .user_agent(concat!("photosync-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl RemoteUploadClient for HttpUploadClient {
    fn upload(&self, image: &TransformedImage, target: &UploadTarget) -> UploadStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let image = image.clone();
        let target = target.clone();

        tokio::spawn(async move {
            let result = send_multipart(&client, &image, &target, &tx).await;
            match &result {
                Ok(response) => tracing::debug!(
                    id = %image.photo_id,
                    public_id = %response.public_id,
                    "Upload accepted"
                ),
                Err(e) => tracing::debug!(id = %image.photo_id, error = %e, "Upload failed"),
            }
            let _ = tx.send(UploadEvent::Finished(result));
        });

        terminated(rx)
    }
}

/// Turn the worker's channel into a stream that ends right after the first
/// terminal event. A worker that disappears without one yields a synthetic
/// failure, so every stream ends with exactly one `Finished`.
fn terminated(rx: UnboundedReceiver<UploadEvent>) -> UploadStream {
    stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(event) if event.is_terminal() => Some((event, None)),
            Some(event) => Some((event, Some(rx))),
            None => Some((
                UploadEvent::Finished(Err(UploadError::Other(
                    "Upload worker ended without a result".to_string(),
                ))),
                None,
            )),
        }
    })
    .boxed()
}

/// Reports the sent fraction as the body stream is drained.
struct ProgressTracker {
    total: u64,
    sent: u64,
    last_reported: f64,
    tx: UnboundedSender<UploadEvent>,
}

impl ProgressTracker {
    fn new(total: u64, tx: UnboundedSender<UploadEvent>) -> Self {
        Self {
            total,
            sent: 0,
            last_reported: 0.0,
            tx,
        }
    }

    fn advance(&mut self, n: usize) {
        if self.total == 0 {
            return;
        }
        self.sent = (self.sent + n as u64).min(self.total);
        let fraction = self.sent as f64 / self.total as f64;
        let done = self.sent == self.total;
        if done || fraction - self.last_reported >= PROGRESS_STEP {
            self.last_reported = fraction;
            let _ = self.tx.send(UploadEvent::Progress(fraction));
        }
    }
}

async fn send_multipart(
    client: &Client,
    image: &TransformedImage,
    target: &UploadTarget,
    events: &UnboundedSender<UploadEvent>,
) -> Result<UploadResponse, UploadError> {
    let io_err = |source| UploadError::Io {
        path: image.path.clone(),
        source,
    };
    let file = tokio::fs::File::open(&image.path).await.map_err(io_err)?;
    let total = file.metadata().await.map_err(io_err)?.len();

    let mut tracker = ProgressTracker::new(total, events.clone());
    let body = ReaderStream::with_capacity(file, CHUNK_SIZE).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            tracker.advance(bytes.len());
        }
        chunk
    });

    let part = Part::stream_with_length(Body::wrap_stream(body), total)
        .file_name(image.filename.clone())
        .mime_str(&image.content_type)
        .map_err(|e| {
            UploadError::Other(format!("Invalid content type '{}': {e}", image.content_type))
        })?;
    let form = Form::new()
        .part("file", part)
        .text("upload_preset", target.preset().to_string());

    let network = |source| UploadError::Network {
        filename: image.filename.clone(),
        source,
    };

    let response = client
        .post(target.url())
        .multipart(form)
        .send()
        .await
        .map_err(network)?;
    let status = response.status();
    let text = response.text().await.map_err(network)?;

    if !status.is_success() {
        return Err(UploadError::Rejected {
            filename: image.filename.clone(),
            status: status.as_u16(),
            body: truncate(&text, MAX_ERROR_BODY),
        });
    }

    serde_json::from_str(&text).map_err(|e| UploadError::MalformedResponse {
        filename: image.filename.clone(),
        source: e,
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadFailureKind;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::path::Path;

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/upload")
    }

    /// Echo back what arrived so tests can check the wire format.
    async fn echo_upload(mut multipart: Multipart) -> Json<Value> {
        let mut preset = String::new();
        let mut file_name = String::new();
        let mut content_type = String::new();
        let mut size = 0usize;
        while let Some(field) = multipart.next_field().await.unwrap() {
            match field.name().unwrap_or_default() {
                "upload_preset" => preset = field.text().await.unwrap(),
                "file" => {
                    file_name = field.file_name().unwrap_or_default().to_string();
                    content_type = field.content_type().unwrap_or_default().to_string();
                    size = field.bytes().await.unwrap().len();
                }
                other => panic!("unexpected field {other}"),
            }
        }
        Json(json!({
            "secure_url": format!("https://res.example.com/{file_name}"),
            "public_id": preset,
            "format": content_type,
            "width": 2000,
            "height": 1500,
            "bytes": size,
            "created_at": "2025-01-15T00:00:00Z"
        }))
    }

    fn image_at(path: &Path, id: &str) -> TransformedImage {
        TransformedImage {
            photo_id: id.to_string(),
            path: path.to_path_buf(),
            filename: format!("{id}.jpg"),
            content_type: "image/jpeg".to_string(),
            width: 2000,
            height: 1500,
            bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }

    fn write_file(dir: &Path, len: usize) -> std::path::PathBuf {
        let path = dir.join("payload.jpg");
        std::fs::write(&path, vec![0xAB; len]).unwrap();
        path
    }

    /// Drain a stream, asserting the terminal event comes exactly once, last.
    async fn drain(mut stream: UploadStream) -> (Vec<f64>, Result<UploadResponse, UploadError>) {
        let mut progress = Vec::new();
        let mut result = None;
        while let Some(event) = stream.next().await {
            assert!(result.is_none(), "event after terminal");
            match event {
                UploadEvent::Progress(f) => progress.push(f),
                UploadEvent::Finished(r) => result = Some(r),
            }
        }
        (progress, result.expect("stream ended without a terminal event"))
    }

    #[tokio::test]
    async fn test_upload_success_reports_progress_and_fields() {
        let url = spawn_server(Router::new().route("/upload", post(echo_upload))).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 300_000);
        let client = HttpUploadClient::new().unwrap();

        let stream = client.upload(
            &image_at(&path, "IMG_0001"),
            &UploadTarget::new(url, "image-sharing"),
        );
        let (progress, result) = drain(stream).await;

        let response = result.unwrap();
        assert_eq!(response.secure_url, "https://res.example.com/IMG_0001.jpg");
        assert_eq!(response.public_id, "image-sharing");
        assert_eq!(response.format, "image/jpeg");
        assert_eq!(response.bytes, 300_000);

        assert!(progress.len() >= 2);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(progress.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn test_empty_file_emits_no_progress() {
        let url = spawn_server(Router::new().route("/upload", post(echo_upload))).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 0);
        let client = HttpUploadClient::new().unwrap();

        let (progress, result) = drain(
            client.upload(&image_at(&path, "empty"), &UploadTarget::new(url, "p")),
        )
        .await;
        assert!(progress.is_empty());
        assert_eq!(result.unwrap().bytes, 0);
    }

    #[tokio::test]
    async fn test_non_2xx_is_server_rejected() {
        let router = Router::new().route(
            "/upload",
            post(|| async { (StatusCode::BAD_REQUEST, r#"{"error":{"message":"Upload preset not found"}}"#) }),
        );
        let url = spawn_server(router).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 1024);
        let client = HttpUploadClient::new().unwrap();

        let (_, result) =
            drain(client.upload(&image_at(&path, "x"), &UploadTarget::new(url, "p"))).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), UploadFailureKind::ServerRejected);
        assert!(matches!(err, UploadError::Rejected { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_with_secure_url_is_still_failure() {
        let router = Router::new().route(
            "/upload",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    r#"{"secure_url":"https://res.example.com/x.jpg","public_id":"x"}"#,
                )
            }),
        );
        let url = spawn_server(router).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);
        let client = HttpUploadClient::new().unwrap();

        let (_, result) =
            drain(client.upload(&image_at(&path, "x"), &UploadTarget::new(url, "p"))).await;
        let err = result.unwrap_err();
        assert!(matches!(err, UploadError::Rejected { status: 500, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_server_rejected() {
        let router = Router::new().route("/upload", post(|| async { "<html>ok</html>" }));
        let url = spawn_server(router).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);
        let client = HttpUploadClient::new().unwrap();

        let (_, result) =
            drain(client.upload(&image_at(&path, "x"), &UploadTarget::new(url, "p"))).await;
        let err = result.unwrap_err();
        assert!(matches!(err, UploadError::MalformedResponse { .. }));
        assert_eq!(err.kind(), UploadFailureKind::ServerRejected);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);
        let client = HttpUploadClient::new().unwrap();

        let (_, result) = drain(client.upload(
            &image_at(&path, "x"),
            &UploadTarget::new(format!("http://{addr}/upload"), "p"),
        ))
        .await;
        assert_eq!(
            result.unwrap_err().kind(),
            UploadFailureKind::NetworkUnreachable
        );
    }

    #[tokio::test]
    async fn test_supplied_client_timeout_is_network_error() {
        let router = Router::new().route(
            "/upload",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                "late"
            }),
        );
        let url = spawn_server(router).await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);
        let client = HttpUploadClient::with_client(
            Client::builder()
                .timeout(std::time::Duration::from_millis(200))
                .build()
                .unwrap(),
        );

        let (_, result) =
            drain(client.upload(&image_at(&path, "x"), &UploadTarget::new(url, "p"))).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), UploadFailureKind::NetworkUnreachable);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_file_is_unknown_without_progress() {
        let client = HttpUploadClient::new().unwrap();
        let image = image_at(Path::new("/nonexistent/transformed.jpg"), "x");

        let (progress, result) = drain(client.upload(
            &image,
            &UploadTarget::new("http://127.0.0.1:1/upload", "p"),
        ))
        .await;
        assert!(progress.is_empty());
        assert_eq!(result.unwrap_err().kind(), UploadFailureKind::Unknown);
    }

    #[tokio::test]
    async fn test_terminated_synthesizes_failure_when_worker_vanishes() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(UploadEvent::Progress(0.5)).unwrap();
        drop(tx);

        let (progress, result) = drain(terminated(rx)).await;
        assert_eq!(progress, vec![0.5]);
        assert_eq!(result.unwrap_err().kind(), UploadFailureKind::Unknown);
    }

    #[tokio::test]
    async fn test_terminated_stops_after_terminal() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(UploadEvent::Finished(Err(UploadError::Other("x".into()))))
            .unwrap();
        tx.send(UploadEvent::Progress(0.9)).unwrap();

        let events: Vec<UploadEvent> = terminated(rx).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[test]
    fn test_tracker_reports_in_steps_and_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = ProgressTracker::new(1000, tx);
        tracker.advance(5); // 0.5%: below step
        tracker.advance(5); // 1.0%
        tracker.advance(990);

        let mut seen = Vec::new();
        while let Ok(UploadEvent::Progress(f)) = rx.try_recv() {
            seen.push(f);
        }
        assert_eq!(seen, vec![0.01, 1.0]);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
