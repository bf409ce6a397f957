//! Source image download.
//!
//! The pipeline only needs "URL in, bytes out", so downloading sits behind the
//! [`Downloader`] trait: production code uses [`HttpDownloader`], tests serve
//! bytes from memory.

use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Download failure. Per image: the image is skipped.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} is larger than {limit} bytes")]
    TooLarge { url: String, limit: u64 },
    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fetches the raw bytes behind a URL.
pub trait Downloader: Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Build the blocking HTTP client shared by every network component of a run.
pub fn build_client(timeout: Duration, user_agent: &str) -> reqwest::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
}

/// [`Downloader`] over a blocking reqwest client.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    /// Bodies larger than this are rejected. `None` = unlimited.
    max_bytes: Option<u64>,
}

impl HttpDownloader {
    pub fn new(client: reqwest::blocking::Client, max_bytes: Option<u64>) -> Self {
        Self { client, max_bytes }
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| DownloadError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let (Some(limit), Some(len)) = (self.max_bytes, response.content_length())
            && len > limit
        {
            return Err(DownloadError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        let mut bytes = Vec::new();
        match self.max_bytes {
            Some(limit) => {
                response
                    .take(limit + 1)
                    .read_to_end(&mut bytes)
                    .map_err(|source| DownloadError::Body {
                        url: url.to_string(),
                        source,
                    })?;
                if bytes.len() as u64 > limit {
                    return Err(DownloadError::TooLarge {
                        url: url.to_string(),
                        limit,
                    });
                }
            }
            None => {
                let mut response = response;
                response
                    .read_to_end(&mut bytes)
                    .map_err(|source| DownloadError::Body {
                        url: url.to_string(),
                        source,
                    })?;
            }
        }

        tracing::debug!(url = %url, size = bytes.len(), "downloaded");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_with_settings() {
        assert!(build_client(Duration::from_secs(5), "portfolio-sync/test").is_ok());
    }

    #[test]
    fn unreachable_host_is_transport_error() {
        let client = build_client(Duration::from_secs(2), "portfolio-sync/test").unwrap();
        let downloader = HttpDownloader::new(client, None);
        // Port 9 on localhost is the discard port; nothing listens in CI.
        let err = downloader.fetch("http://127.0.0.1:9/a.jpg").unwrap_err();
        assert!(matches!(err, DownloadError::Transport { .. }));
    }

    #[test]
    fn error_messages_name_the_url() {
        let err = DownloadError::Status {
            url: "https://files.test/a.jpg".into(),
            status: 403,
        };
        assert_eq!(err.to_string(), "https://files.test/a.jpg returned HTTP 403");
    }
}
