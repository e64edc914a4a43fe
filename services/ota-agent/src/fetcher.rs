//! HTTP client for manifests and file payloads.
//!
//! Every GET is retried with a fixed delay between attempts; the first
//! attempt is not delayed. Only transport errors and non-200 statuses are
//! retried. A manifest that arrives but cannot be decoded is a permanent
//! error.

use std::path::Path;
use std::time::{Duration, Instant};

use ota_manifest::Manifest;
use reqwest::{Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::UpdateError;

/// Delay between attempts of the same request.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Minimum interval between download progress lines.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Retrying HTTP fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with a per-request timeout and attempt budget.
    ///
    /// `max_attempts` below one is treated as one.
    pub fn new(timeout: Duration, max_attempts: u32) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Override the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Number of attempts made per request.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fetch and decode a manifest. Validation is left to the caller.
    pub async fn fetch_manifest(&self, url: &str) -> Result<Manifest, UpdateError> {
        let fetch_failed = |reason: String| UpdateError::ManifestFetchFailed {
            url: url.to_string(),
            attempts: self.max_attempts,
            reason,
        };

        let response = self.get(url).await.map_err(fetch_failed)?;
        let body = response
            .text()
            .await
            .map_err(|e| fetch_failed(format!("read body: {e}")))?;

        let manifest = Manifest::from_yaml(&body)?;
        debug!(
            url = %url,
            version = %manifest.version,
            file_count = manifest.files.len(),
            "Fetched manifest"
        );
        Ok(manifest)
    }

    /// Download a payload to `dest`, reporting progress as it streams.
    ///
    /// Returns the number of bytes written. The caller owns cleanup of
    /// `dest` on failure.
    pub async fn download(&self, url: &str, dest: &Path, label: &str) -> Result<u64, UpdateError> {
        let download_failed = |reason: String| UpdateError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let mut response = self.get(url).await.map_err(download_failed)?;

        let mut file = File::create(dest)
            .await
            .map_err(|e| UpdateError::io(dest, e))?;
        let mut progress = Progress::new(label, response.content_length());

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_failed(format!("read body: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::io(dest, e))?;
            progress.advance(chunk.len() as u64);
        }

        file.flush().await.map_err(|e| UpdateError::io(dest, e))?;
        file.sync_all().await.map_err(|e| UpdateError::io(dest, e))?;
        progress.finish();

        Ok(progress.written)
    }

    /// GET with retries; returns the last failure reason when exhausted.
    async fn get(&self, url: &str) -> Result<Response, String> {
        let mut last_failure = String::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.client.get(url).send().await {
                Ok(response) if response.status() == StatusCode::OK => return Ok(response),
                Ok(response) => last_failure = format!("bad status {}", response.status()),
                Err(e) => last_failure = e.to_string(),
            }

            warn!(
                url = %url,
                attempt,
                max_attempts = self.max_attempts,
                error = %last_failure,
                "HTTP request failed"
            );
        }

        Err(last_failure)
    }
}

/// Cumulative byte counter that logs at a bounded rate.
struct Progress<'a> {
    label: &'a str,
    total: Option<u64>,
    written: u64,
    last_report: Instant,
}

impl<'a> Progress<'a> {
    fn new(label: &'a str, total: Option<u64>) -> Self {
        Self {
            label,
            total: total.filter(|t| *t > 0),
            written: 0,
            last_report: Instant::now(),
        }
    }

    /// Count `bytes`; returns true if a progress line was emitted.
    fn advance(&mut self, bytes: u64) -> bool {
        self.written += bytes;
        let complete = self.total == Some(self.written);
        if !complete && self.last_report.elapsed() < PROGRESS_INTERVAL {
            return false;
        }
        self.report();
        self.last_report = Instant::now();
        true
    }

    fn report(&self) {
        match self.total {
            Some(total) => info!(
                file = %self.label,
                written = self.written,
                total,
                percent = %format!("{:.1}", self.percent(total)),
                "Download progress"
            ),
            None => info!(file = %self.label, written = self.written, "Download progress"),
        }
    }

    fn percent(&self, total: u64) -> f64 {
        self.written as f64 / total as f64 * 100.0
    }

    fn finish(&self) {
        info!(file = %self.label, bytes = self.written, "Download complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn fetcher(attempts: u32) -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), attempts)
            .unwrap()
            .with_retry_delay(Duration::from_millis(10))
    }

    fn manifest_yaml(base: &str) -> String {
        format!(
            "version: \"1.0.0\"\nfiles:\n  - name: a\n    url: {base}/files/a\n    sha256: {HASH}\n    target: /tmp/a\n"
        )
    }

    #[tokio::test]
    async fn test_fetch_manifest_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps/demo/version.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(manifest_yaml(&server.uri())))
            .expect(1)
            .mount(&server)
            .await;

        let manifest = fetcher(3)
            .fetch_manifest(&format!("{}/apps/demo/version.yaml", server.uri()))
            .await
            .unwrap();

        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.files[0].name, "a");
    }

    #[tokio::test]
    async fn test_fetch_manifest_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(3).fetch_manifest(&server.uri()).await.unwrap_err();

        match err {
            UpdateError::ManifestFetchFailed {
                attempts, reason, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("503"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_manifest_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(manifest_yaml(&server.uri())))
            .mount(&server)
            .await;

        let manifest = fetcher(2).fetch_manifest(&server.uri()).await.unwrap();
        assert_eq!(manifest.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_undecodable_manifest_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("files: [unterminated"))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(3).fetch_manifest(&server.uri()).await.unwrap_err();
        assert!(matches!(err, UpdateError::ManifestInvalid(_)));
    }

    #[tokio::test]
    async fn test_download_writes_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join(".tmp-a-1");
        let written = fetcher(1)
            .download(&format!("{}/files/a", server.uri()), &dest, "a")
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_download_not_found_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join(".tmp-a-1");
        let err = fetcher(2)
            .download(&server.uri(), &dest, "a")
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::DownloadFailed { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let f = HttpFetcher::new(Duration::from_secs(1), 0).unwrap();
        assert_eq!(f.max_attempts(), 1);
    }

    #[test]
    fn test_progress_percent() {
        let mut p = Progress::new("a", Some(200));
        p.advance(50);
        assert_eq!(p.percent(200), 25.0);
        p.advance(150);
        assert_eq!(p.written, 200);
    }

    #[test]
    fn test_progress_is_rate_limited() {
        let mut p = Progress::new("a", Some(1_000));
        assert!(!p.advance(10));
        assert!(!p.advance(10));

        p.last_report = Instant::now() - PROGRESS_INTERVAL;
        assert!(p.advance(10));
        assert!(!p.advance(10));

        // Completion is always reported.
        assert!(p.advance(960));
        assert_eq!(p.written, 1_000);
    }

    #[test]
    fn test_progress_without_length_still_reports() {
        let mut p = Progress::new("a", None);
        assert!(!p.advance(10));
        p.last_report = Instant::now() - PROGRESS_INTERVAL;
        assert!(p.advance(10));
    }
}
