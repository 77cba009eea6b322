//! `HTTPFetcher`: the plain-HTTP collaborator used by the finder to pull
//! third-party relay directory listings.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum HttpFetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("non-success status: {0}")]
    Status(u16),
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value, HttpFetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(socks5_proxy: Option<&str>) -> Result<Self, HttpFetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = socks5_proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value, HttpFetchError> {
        let response = tokio::time::timeout(timeout, self.client.get(url).send())
            .await
            .map_err(|_| HttpFetchError::Timeout)??;
        if !response.status().is_success() {
            return Err(HttpFetchError::Status(response.status().as_u16()));
        }
        Ok(response.json::<serde_json::Value>().await?)
    }
}
