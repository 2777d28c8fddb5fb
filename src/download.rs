//! Streaming HTTP downloads for model assets
//!
//! Payloads are streamed in 8 KB reads so progress can be reported while the
//! body arrives. Nothing is written to disk here; persistence is the model
//! cache's job.

use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// Progress callback receiving a download percentage in `0.0..=100.0`
pub type DownloadProgressFn = dyn Fn(f32) + Send + Sync;

/// Request timeout for model downloads
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const READ_BUFFER_BYTES: usize = 8192;

/// HTTP client for model and preprocessing config downloads
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
}

impl ModelDownloader {
    /// Create a new downloader with the default request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client })
    }

    /// Download a binary payload, reporting percentage progress
    ///
    /// When the server sends no content length, progress is only reported
    /// once the body has been read completely.
    ///
    /// # Errors
    /// - Invalid URL
    /// - Network errors or non-success HTTP status
    pub async fn download_bytes(
        &self,
        url: &str,
        progress: Option<&DownloadProgressFn>,
    ) -> Result<Vec<u8>> {
        validate_model_url(url)?;
        log::debug!("Downloading: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("HTTP error {} for {}", response.status(), url),
                "request rejected",
            ));
        }

        let total_size = response.content_length().filter(|&len| len > 0);
        let mut payload = Vec::with_capacity(total_size.unwrap_or(0).min(512 * 1024 * 1024) as usize);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut buffer = vec![0; READ_BUFFER_BYTES];
        let mut last_reported = -1.0_f32;

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            payload.extend_from_slice(buffer.get(..bytes_read).unwrap_or(&[]));

            if let (Some(report), Some(total)) = (progress, total_size) {
                let pct = ((payload.len() as f64 / total as f64) * 100.0).min(100.0) as f32;
                // Whole-percent steps keep callback traffic bounded
                if pct.floor() > last_reported {
                    last_reported = pct.floor();
                    report(pct);
                }
            }
        }

        if let Some(report) = progress {
            report(100.0);
        }

        log::debug!("Downloaded {} bytes from {}", payload.len(), url);
        Ok(payload)
    }

    /// Download a small text document (e.g. JSON config)
    ///
    /// # Errors
    /// - Network errors, non-success HTTP status or non-UTF-8 body
    pub async fn download_text(&self, url: &str) -> Result<String> {
        let bytes = self.download_bytes(url, None).await?;
        String::from_utf8(bytes)
            .map_err(|e| BgRemovalError::model_load(format!("Response from {url} is not UTF-8: {e}")))
    }
}

/// Hex-encoded SHA-256 digest
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Check that a payload matches an expected SHA-256 digest
#[must_use]
pub fn verify_integrity(bytes: &[u8], expected_hash: Option<&str>) -> bool {
    let Some(expected) = expected_hash else {
        return true;
    };

    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        true
    } else {
        log::warn!(
            "Integrity check failed: expected {}, got {}",
            expected,
            actual
        );
        false
    }
}

/// Validate that a URL can be fetched over HTTP(S)
///
/// # Errors
/// - Empty URL, unsupported scheme or missing host
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            BgRemovalError::invalid_config(format!(
                "Unsupported URL format: {url}. Expected an http:// or https:// URL"
            ))
        })?;

    if rest.split('/').next().unwrap_or_default().is_empty() {
        return Err(BgRemovalError::invalid_config(format!(
            "Model URL has no host: {url}"
        )));
    }

    Ok(())
}

/// Extract `(owner, repository)` from a `HuggingFace` URL
///
/// # Errors
/// - URL is not a `https://huggingface.co/<owner>/<repo>/...` URL
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    let repo_path = url.strip_prefix("https://huggingface.co/").ok_or_else(|| {
        BgRemovalError::invalid_config(format!("Not a HuggingFace URL: {url}"))
    })?;

    let mut parts = repo_path.split('/').filter(|part| !part.is_empty());
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: https://huggingface.co/owner/repo"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Serve `body` once per connection with the given status line
    pub(crate) async fn serve_once(status: &'static str, body: Vec<u8>, connections: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..connections {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = vec![0u8; 4096];
                let _ = socket.read(&mut request).await;
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}")
    }

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/briaai/RMBG-1.4").is_ok());
        assert!(validate_model_url("http://127.0.0.1:8080/model.onnx").is_ok());
        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("ftp://example.com/model.onnx").is_err());
        assert!(validate_model_url("https:///model.onnx").is_err());
    }

    #[test]
    fn test_parse_huggingface_url() {
        let (owner, repo) =
            parse_huggingface_url("https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx")
                .unwrap();
        assert_eq!(owner, "briaai");
        assert_eq!(repo, "RMBG-1.4");

        assert!(parse_huggingface_url("https://huggingface.co/briaai").is_err());
        assert!(parse_huggingface_url("https://github.com/a/b").is_err());
    }

    #[test]
    fn test_integrity_helpers() {
        let digest = sha256_hex(b"hello");
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(verify_integrity(b"hello", None));
        assert!(verify_integrity(b"hello", Some(&digest.to_uppercase())));
        assert!(!verify_integrity(b"hello!", Some(&digest)));
    }

    #[tokio::test]
    async fn test_download_bytes_reports_progress() {
        let body = vec![7u8; 40_000];
        let base = serve_once("200 OK", body.clone(), 1).await;
        let downloader = ModelDownloader::new().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let report = move |pct: f32| sink.lock().unwrap().push(pct);

        let payload = downloader
            .download_bytes(&format!("{base}/model.onnx"), Some(&report))
            .await
            .unwrap();

        assert_eq!(payload, body);
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn test_http_error_is_model_load_error() {
        let base = serve_once("404 Not Found", b"missing".to_vec(), 1).await;
        let downloader = ModelDownloader::new().unwrap();

        let err = downloader
            .download_bytes(&format!("{base}/model.onnx"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::ModelLoad(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_download_text() {
        let base = serve_once("200 OK", br#"{"do_pad":false}"#.to_vec(), 1).await;
        let downloader = ModelDownloader::new().unwrap();
        let text = downloader
            .download_text(&format!("{base}/preprocessor_config.json"))
            .await
            .unwrap();
        assert!(text.contains("do_pad"));
    }
}
