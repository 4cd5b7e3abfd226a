use crate::config::FetchConfig;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),
    #[error("URL scheme `{0}` is not supported, use http or https")]
    UnsupportedScheme(String),
    #[error("Host `{0}` is not allowed")]
    HostNotAllowed(String),
    #[error("Image request timed out: {0}")]
    Timeout(reqwest::Error),
    #[error("Image request failed: {0}")]
    Request(reqwest::Error),
    #[error("Image host responded with {0}")]
    UpstreamStatus(StatusCode),
    #[error("Image is larger than {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err)
        } else {
            FetchError::Request(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
    max_bytes: usize,
    allowed_hosts: Arc<Vec<String>>,
}

impl ImageFetcher {
    pub fn new(fetch_config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(fetch_config.get_timeout())
            .connect_timeout(fetch_config.get_connect_timeout())
            .build()
            .map_err(FetchError::Request)?;

        let allowed_hosts = fetch_config
            .allowed_hosts
            .iter()
            .map(|host| host.trim().to_lowercase())
            .filter(|host| !host.is_empty())
            .collect();

        Ok(Self {
            client,
            max_bytes: fetch_config.max_bytes,
            allowed_hosts: Arc::new(allowed_hosts),
        })
    }

    /// Checks scheme and host before any network I/O happens.
    pub fn validate_url(&self, url: &str) -> Result<Url, FetchError> {
        let parsed = Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(FetchError::UnsupportedScheme(other.to_string())),
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl("URL has no host".to_string()))?
            .to_lowercase();

        if !self.allowed_hosts.is_empty() && !self.allowed_hosts.contains(&host) {
            return Err(FetchError::HostNotAllowed(host));
        }

        Ok(parsed)
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let url = self.validate_url(url)?;

        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus(status));
        }

        let limit = self.max_bytes;
        let content_length = response.content_length();
        if content_length.is_some_and(|len| len > limit as u64) {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length is advisory, the limit is enforced on the streamed body too.
        let mut body = BytesMut::with_capacity(content_length.unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!("Fetched {} bytes", body.len());
        Ok(body.freeze())
    }
}
