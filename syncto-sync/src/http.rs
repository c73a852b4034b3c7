//! HTTP transport for a Kinto-style record server.
//!
//! Records live under
//! `{URL}buckets/{xClientState}/collections/{collection}/records`. Every
//! request carries `Authorization: BrowserID <assertion>` and
//! `X-Client-State`. Conditional writes add `If-Match: "<last_modified>"`.

use crate::config::{SyncConfig, SyncOptions};
use crate::error::ConfigError;
use crate::transport::{SyncTransport, TransportResponse};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, IF_MATCH};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use syncto_types::{ServerTimestamp, WireRecord};
use tracing::{debug, warn};

/// Connection settings for [`HttpTransport`].
#[derive(Clone)]
pub struct HttpTransportConfig {
    /// Server base URL, e.g. `https://syncto.example.com/v1/`.
    pub base_url: String,
    /// BrowserID assertion.
    pub assertion: String,
    /// Bucket name and `X-Client-State` header value.
    pub x_client_state: String,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
}

impl HttpTransportConfig {
    /// Builds the transport settings for one credential set.
    pub fn from_options(options: &SyncOptions, config: &SyncConfig) -> Self {
        Self {
            base_url: options.url.clone(),
            assertion: options.assertion.clone(),
            x_client_state: options.x_client_state.clone(),
            timeout_ms: config.request_timeout_ms,
        }
    }
}

impl fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("base_url", &self.base_url)
            .field("assertion", &"[REDACTED]")
            .field("x_client_state", &self.x_client_state)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Serialize)]
struct DataEnvelope<'a> {
    data: &'a WireRecord,
}

/// [`SyncTransport`] over HTTP.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport. Fails only if the HTTP client cannot be built.
    pub fn new(config: HttpTransportConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ConfigError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// The settings this transport was built with.
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// URL of the records endpoint for `collection`.
    pub fn records_url(&self, collection: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!(
            "{}/buckets/{}/collections/{}/records",
            base,
            urlencoding::encode(&self.config.x_client_state),
            urlencoding::encode(collection)
        )
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.records_url(collection), urlencoding::encode(id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("BrowserID {}", self.config.assertion))
            .header("X-Client-State", &self.config.x_client_state)
    }

    async fn send(&self, request: RequestBuilder) -> TransportResponse {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Sync server unreachable: {}", e);
                return TransportResponse::unreachable();
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => TransportResponse::new(status, body),
            Err(e) => {
                warn!("Failed to read response body (status {}): {}", status, e);
                TransportResponse::unreachable()
            }
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn get_records(
        &self,
        collection: &str,
        since: Option<ServerTimestamp>,
    ) -> TransportResponse {
        debug!("GET {} since {:?}", collection, since);
        let mut request = self.authorize(self.client.get(self.records_url(collection)));
        if let Some(since) = since {
            request = request.query(&[("_since", since.to_string())]);
        }
        self.send(request).await
    }

    async fn put_record(
        &self,
        collection: &str,
        record: &WireRecord,
        if_match: Option<ServerTimestamp>,
    ) -> TransportResponse {
        debug!("PUT {}/{} if-match {:?}", collection, record.id, if_match);
        let request = self.authorize(self.client.put(self.record_url(collection, &record.id)));
        let request = with_if_match(request, if_match).json(&DataEnvelope { data: record });
        self.send(request).await
    }

    async fn delete_record(
        &self,
        collection: &str,
        id: &str,
        if_match: Option<ServerTimestamp>,
    ) -> TransportResponse {
        debug!("DELETE {}/{} if-match {:?}", collection, id, if_match);
        let request = self.authorize(self.client.delete(self.record_url(collection, id)));
        self.send(with_if_match(request, if_match)).await
    }
}

/// Record timestamps travel as quoted ETags.
fn with_if_match(request: RequestBuilder, if_match: Option<ServerTimestamp>) -> RequestBuilder {
    match if_match {
        Some(ts) => request.header(IF_MATCH, format!("\"{ts}\"")),
        None => request,
    }
}
