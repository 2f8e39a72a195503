//! Where documents come from.
//!
//! [`HttpSource`] issues one `GET {base}/{screen_id}?platform=..&version=..`
//! per call and checks the response in order: transport error, status,
//! empty body, UTF-8, JSON syntax. Only syntax is checked; the document is
//! otherwise opaque.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Url};
use serde::de::IgnoredAny;
use tracing::debug;
use uuid::Uuid;

use crate::cache::entry::{Document, ScreenId};
use crate::config::{ClientInfo, NetworkConfig};
use crate::error::{Error, FetchError, Result};

/// Result of one fetch.
pub type FetchOutcome = std::result::Result<Document, FetchError>;

/// Something that can produce the current document for a screen.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Perform a single retrieval attempt.
    async fn fetch(&self, screen_id: &ScreenId) -> FetchOutcome;
}

const PLATFORM_HEADER: &str = "x-client-platform";
const OS_VERSION_HEADER: &str = "x-client-os-version";
const DEVICE_MODEL_HEADER: &str = "x-client-device-model";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fetches documents over HTTP.
pub struct HttpSource {
    client: Client,
    base: Url,
    client_info: ClientInfo,
}

impl HttpSource {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let base = config.base_url()?;
        let info = &config.client;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in [
            (PLATFORM_HEADER, &info.platform),
            (OS_VERSION_HEADER, &info.os_version),
            (DEVICE_MODEL_HEADER, &info.device_model),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("client header {name}: {e}")))?;
            headers.insert(HeaderName::from_static(name), value);
        }

        let client = Client::builder()
            .user_agent(format!(
                "screen-config-cache/{} ({}; {})",
                info.client_version, info.platform, info.os_version
            ))
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            client_info: info.clone(),
        })
    }

    /// Deterministic request URL for a screen.
    pub fn screen_url(&self, screen_id: &ScreenId) -> Url {
        let mut url = self.base.clone();
        // Cannot fail: the base was checked to be a base URL.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(screen_id.as_str());
        }
        url.query_pairs_mut()
            .append_pair("platform", &self.client_info.platform)
            .append_pair("version", &self.client_info.client_version);
        url
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn fetch(&self, screen_id: &ScreenId) -> FetchOutcome {
        let url = self.screen_url(screen_id);
        let request_id = Uuid::new_v4();
        debug!(%screen_id, %url, %request_id, "Fetching screen document");

        let response = self
            .client
            .get(url)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .send()
            .await
            .map_err(|e| {
                if is_timeout(&e) {
                    FetchError::timed_out()
                } else {
                    FetchError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            if is_timeout(&e) {
                FetchError::timed_out()
            } else {
                FetchError::network(format!("failed to read body: {e}"))
            }
        })?;

        let document = validate_body(&body)?;
        debug!(%screen_id, %request_id, size = document.len(), "Fetched screen document");
        Ok(document)
    }
}

/// Whether `err` was caused by the connect or read timeout.
fn is_timeout(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Check that a response body is non-empty, UTF-8 and well-formed JSON.
pub fn validate_body(body: &[u8]) -> FetchOutcome {
    if body.is_empty() {
        return Err(FetchError::network("empty response body"));
    }
    let text = std::str::from_utf8(body)
        .map_err(|e| FetchError::Parse(format!("body is not valid UTF-8: {e}")))?;
    serde_json::from_str::<IgnoredAny>(text)
        .map_err(|e| FetchError::Parse(format!("body is not valid JSON: {e}")))?;
    Ok(Document::from(text))
}
