use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{bearer, SharedTokenProvider};
use crate::config::{endpoint, ClientConfig};
use crate::error::SyncError;
use crate::model::{FilterCategory, MatchId, MatchRecord};

/// One fetch of the match list for a filter category. Implementations hold
/// no scheduling state; the refresh scheduler decides when to call them.
pub trait SnapshotFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        filter: FilterCategory,
    ) -> impl Future<Output = Result<Vec<MatchRecord>, SyncError>> + Send;
}

#[derive(Clone)]
pub struct HttpSnapshotFetcher {
    client: Client,
    api_url: String,
    tokens: SharedTokenProvider,
    request_timeout: Duration,
    max_retries: u8,
    retry_backoff: Duration,
}

impl HttpSnapshotFetcher {
    pub fn new(client: Client, api_url: impl Into<String>, tokens: SharedTokenProvider) -> Self {
        let config = ClientConfig {
            api_url: api_url.into(),
            ..ClientConfig::default()
        };
        Self::from_config(client, &config, tokens)
    }

    pub fn from_config(client: Client, config: &ClientConfig, tokens: SharedTokenProvider) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            tokens,
            request_timeout: config.refresh.request_timeout(),
            max_retries: config.refresh.max_retries,
            retry_backoff: Duration::from_millis(config.refresh.retry_backoff_ms),
        }
    }

    /// Single match lookup, outside of any cache slot.
    pub async fn fetch_match(&self, id: MatchId) -> Result<MatchRecord, SyncError> {
        let url = endpoint(&self.api_url, &format!("matches/{id}"))?;
        self.get_json(url).await
    }

    /// Free-text search. Results go straight back to the caller.
    pub async fn search(&self, query: &str) -> Result<Vec<MatchRecord>, SyncError> {
        let mut url = endpoint(&self.api_url, "matches/search")?;
        url.query_pairs_mut().append_pair("query", query);
        self.get_json(url).await
    }

    fn request(&self, url: Url) -> RequestBuilder {
        let mut builder = self.client.get(url).timeout(self.request_timeout);
        if let Some(auth) = bearer(self.tokens.as_ref()) {
            builder = builder.header(reqwest::header::AUTHORIZATION, auth);
        }
        builder
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SyncError> {
        let mut attempt: u8 = 0;
        loop {
            match self.try_get(url.clone()).await {
                Ok(response) => return Ok(response.json::<T>().await?),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    attempt += 1;
                    debug!(url = %url, attempt, error = %err, "retrying request");
                    tokio::time::sleep(self.retry_backoff * u32::from(attempt)).await;
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "request failed");
                    return Err(err);
                }
            }
        }
    }

    async fn try_get(&self, url: Url) -> Result<Response, SyncError> {
        let response = self.request(url).send().await?;
        check_response(response).await
    }
}

impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self, filter: FilterCategory) -> Result<Vec<MatchRecord>, SyncError> {
        let url = endpoint(&self.api_url, filter.resource_path())?;
        self.get_json(url).await
    }
}

pub(crate) async fn check_response(response: Response) -> Result<Response, SyncError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Status { status, message })
    }
}

fn is_retryable(err: &SyncError) -> bool {
    match err {
        SyncError::Transport(_) => true,
        SyncError::Status { status, .. } => *status >= 500,
        _ => false,
    }
}
