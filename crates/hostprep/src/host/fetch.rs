//! Streaming HTTP downloads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{Fetcher, HostError};

const USER_AGENT: &str = concat!("hostprep/", env!("CARGO_PKG_VERSION"));

/// Downloads installer payloads over HTTP(S).
///
/// Bytes stream into a `.part` sibling which is renamed over `dest` once the
/// body has been fully written, so an interrupted download never leaves a
/// file that a `File` guard would mistake for a finished one.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    show_progress: bool,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            show_progress: true,
        })
    }

    /// Enable or disable the terminal progress bar.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        match total {
            Some(len) => {
                let pb = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::with_template(
                    "  {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                ) {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {bytes} ({bytes_per_sec})") {
                    pb.set_style(style);
                }
                pb
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), HostError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(url, dest = %dest.display(), "Downloading");
        let response = self.client.get(url).send().await?.error_for_status()?;

        let partial = partial_path(dest);
        let pb = self.progress_bar(response.content_length());
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    pb.abandon();
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            pb.set_position(written);
        }

        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;
        pb.finish_and_clear();

        debug!(bytes = written, dest = %dest.display(), "Download complete");
        Ok(())
    }
}

/// Temporary path a download streams into before being moved into place.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_is_sibling() {
        let dest = Path::new("/tmp/downloads/DockerDesktopInstaller.exe");
        assert_eq!(
            partial_path(dest),
            PathBuf::from("/tmp/downloads/DockerDesktopInstaller.exe.part")
        );
    }

    #[test]
    fn test_fetcher_builds() {
        let fetcher = HttpFetcher::new().unwrap().with_progress(false);
        assert!(!fetcher.show_progress);
        assert!(fetcher.progress_bar(Some(10)).is_hidden());
    }

    #[tokio::test]
    async fn test_fetch_writes_body_to_dest() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/installer.exe"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"MZ payload".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("downloads").join("installer.exe");
        let fetcher = HttpFetcher::new().unwrap().with_progress(false);

        fetcher
            .fetch(&format!("{}/installer.exe", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"MZ payload");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("missing.exe");
        let fetcher = HttpFetcher::new().unwrap().with_progress(false);

        let err = fetcher
            .fetch(&format!("{}/missing.exe", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::Http(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unreachable_url_leaves_no_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");
        let fetcher = HttpFetcher::new().unwrap().with_progress(false);

        let result = fetcher.fetch("http://127.0.0.1:9/payload.bin", &dest).await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }
}
