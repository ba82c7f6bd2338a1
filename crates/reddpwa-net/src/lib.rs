//! # REDDPWA Net
//!
//! The production [`Network`] capability: performs the worker's outgoing
//! requests over HTTP with `reqwest`.
//!
//! Any response the server returns, including error statuses, is handed back
//! as a [`FetchResponse`]. Only transport failures (refused connection, DNS,
//! timeout) become errors, which the worker treats as "offline".

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::ACCEPT_LANGUAGE;
use reddpwa_sw::{FetchRequest, FetchResponse, Network, ServiceWorkerError};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<NetError> for ServiceWorkerError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::InvalidUrl(msg) => ServiceWorkerError::InvalidUrl(msg),
            other => ServiceWorkerError::Network(other.to_string()),
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("reddpwa-sw/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed network.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    config: LoaderConfig,
}

impl HttpNetwork {
    /// Build the HTTP client.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, timeout = ?config.default_timeout, "HttpNetwork initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Perform one request.
    pub async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        if !matches!(request.url.scheme(), "http" | "https") {
            return Err(NetError::InvalidUrl(format!(
                "unsupported scheme: {}",
                request.url.scheme()
            )));
        }

        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if !request.headers.contains_key(ACCEPT_LANGUAGE) {
            builder = builder.header(ACCEPT_LANGUAGE, &self.config.accept_language);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body: Bytes = response.bytes().await.map_err(|e| self.classify(e))?;

        trace!(
            url = %final_url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(FetchResponse::new(status, headers, body))
    }

    fn classify(&self, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::Timeout(self.config.default_timeout)
        } else {
            NetError::Http(err)
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> reddpwa_sw::Result<FetchResponse> {
        Ok(self.send(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("reddpwa-sw/"));
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_error_conversion() {
        let err: ServiceWorkerError = NetError::Timeout(Duration::from_secs(5)).into();
        assert!(err.is_network());

        let err: ServiceWorkerError = NetError::InvalidUrl("ftp://x".into()).into();
        assert!(matches!(err, ServiceWorkerError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let network = HttpNetwork::new(LoaderConfig::default()).unwrap();
        let request = FetchRequest::get(Url::parse("ftp://files.example/a.txt").unwrap());
        assert!(matches!(
            network.send(&request).await,
            Err(NetError::InvalidUrl(_))
        ));
    }
}
