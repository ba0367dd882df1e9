//! Content download.
//!
//! One request per call, no retries: a failed download is reported once and
//! the calling step decides whether it is fatal.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;

pub trait Downloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP(S) downloader.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("alpine-lift/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "downloading");
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("requesting '{}'", url))?
            .error_for_status()
            .with_context(|| format!("downloading '{}'", url))?;
        let body = response
            .bytes()
            .with_context(|| format!("reading body of '{}'", url))?;
        tracing::debug!(url, bytes = body.len(), "downloaded");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_fetch_returns_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/drpcli.amd64.linux")
            .with_status(200)
            .with_body("ELF-ish")
            .create();

        let body = downloader()
            .fetch(&format!("{}/drpcli.amd64.linux", server.url()))
            .unwrap();

        assert_eq!(body, b"ELF-ish");
        mock.assert();
    }

    #[test]
    fn test_fetch_error_status_is_error() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing").with_status(404).create();

        let result = downloader().fetch(&format!("{}/missing", server.url()));

        assert!(result.is_err());
    }

    #[test]
    fn test_fetch_unreachable_is_error() {
        let result = downloader().fetch("http://127.0.0.1:1/nothing");
        assert!(result.is_err());
    }
}
