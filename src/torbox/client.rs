//! Authenticated HTTP client for the Torbox API.
//!
//! [`TorboxClient`] owns two reqwest clients: one with short timeouts for the
//! JSON API and one with long read timeouts for streaming media. Every API
//! call goes through [`TorboxClient::request`], which applies the retry
//! policy, unwraps the response envelope and maps failures onto
//! [`TorboxError`].
//!
//! # Example
//!
//! ```no_run
//! use torbox_core::torbox::{JobApi, TorboxClient, TorboxConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TorboxClient::new(TorboxConfig::new(
//!     "https://api.torbox.app",
//!     Some("my-api-key".to_string()),
//! ))?;
//! let jobs = client.list_jobs().await?;
//! println!("{jobs}");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::{Url, form_urlencoded};

use super::api::{ByteStream, JobApi};
use super::constants::{
    API_CONNECT_TIMEOUT_SECS, API_READ_TIMEOUT_SECS, CANCEL_JOB_PATH, CREATE_WEB_DOWNLOAD_PATH,
    DEFAULT_BASE_URL, DOWNLOAD_CONNECT_TIMEOUT_SECS, DOWNLOAD_READ_TIMEOUT_SECS, JOBS_PATH,
    USER_ME_PATH, WEB_DOWNLOADS_PATH, default_user_agent,
};
use super::envelope::{body_snippet, envelope_message, unwrap_envelope};
use super::error::TorboxError;
use super::retry::{RetryDecision, RetryPolicy, classify_error};

/// Request body variants accepted by [`TorboxClient::request`].
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(Value),
}

/// Connection settings for [`TorboxClient`].
#[derive(Debug, Clone)]
pub struct TorboxConfig {
    /// API host, without trailing slash.
    pub base_url: String,
    /// API key; `None` or blank makes every API call fail with `AuthMissing`.
    pub api_key: Option<String>,
    /// Retry policy applied when a call does not supply its own.
    pub retry_policy: RetryPolicy,
}

impl TorboxConfig {
    /// Creates a config with the default retry policy.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl Default for TorboxConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, None)
    }
}

/// HTTP client for the Torbox API.
///
/// Designed to be created once and shared (it is cheap to clone; the
/// underlying connection pools are reference counted).
#[derive(Debug, Clone)]
pub struct TorboxClient {
    http: Client,
    download_http: Client,
    base_url: String,
    api_key: Option<String>,
    retry_policy: RetryPolicy,
}

impl TorboxClient {
    /// Builds a client from its config.
    ///
    /// # Errors
    ///
    /// Returns [`TorboxError::ClientBuild`] if reqwest cannot construct a client
    /// (TLS backend initialisation failure).
    pub fn new(config: TorboxConfig) -> Result<Self, TorboxError> {
        let http = build_client(API_CONNECT_TIMEOUT_SECS, API_READ_TIMEOUT_SECS)?;
        let download_http = build_client(DOWNLOAD_CONNECT_TIMEOUT_SECS, DOWNLOAD_READ_TIMEOUT_SECS)?;
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        let api_key = config
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            http,
            download_http,
            base_url,
            api_key,
            retry_policy: config.retry_policy,
        })
    }

    /// Returns the normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs an authenticated API call and deserializes the envelope `data`.
    ///
    /// `endpoint` is a path (optionally with a query string) relative to the
    /// base URL. When `retry_policy` is `None` the client's policy applies.
    ///
    /// # Errors
    ///
    /// - [`TorboxError::AuthMissing`] before any I/O when no key is configured
    /// - [`TorboxError::HttpStatus`] for non-2xx responses, after retries
    /// - [`TorboxError::Rejected`] for `success = false` envelopes
    /// - [`TorboxError::InvalidResponse`] for non-JSON bodies or `data` that
    ///   does not fit `T`
    #[instrument(skip(self, method, body, retry_policy), fields(method = %method))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<RequestBody>,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<T, TorboxError> {
        let api_key = self.api_key.as_deref().ok_or(TorboxError::AuthMissing)?;
        let url = self.endpoint_url(endpoint)?;
        let policy = retry_policy.unwrap_or(&self.retry_policy);

        let data = with_retry(policy, endpoint, api_key, || {
            self.send_once(&url, endpoint, &method, body.as_ref(), api_key)
        })
        .await?;

        serde_json::from_value(data).map_err(|e| {
            TorboxError::invalid_response(endpoint, format!("unexpected data shape: {e}"))
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, TorboxError> {
        let raw = format!("{}{}", self.base_url, endpoint);
        Url::parse(&raw).map_err(|_| TorboxError::InvalidUrl { url: raw })
    }

    async fn send_once(
        &self,
        url: &Url,
        endpoint: &str,
        method: &Method,
        body: Option<&RequestBody>,
        api_key: &str,
    ) -> Result<Value, TorboxError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(api_key)
            .header("X-API-Key", api_key)
            .header(ACCEPT, "application/json");

        match body {
            Some(RequestBody::Form(fields)) => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                request = request
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded);
            }
            Some(RequestBody::Json(value)) => {
                request = request.json(value);
            }
            None => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| TorboxError::network(endpoint, e))?;

        let status = response.status();
        let retry_after = retry_after_header(&response);
        let text = response
            .text()
            .await
            .map_err(|e| TorboxError::network(endpoint, e))?;
        // Non-JSON bodies are kept as text for diagnostics only.
        let parsed: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(envelope_message)
                .unwrap_or_else(|| body_snippet(&text));
            return Err(TorboxError::http_status(
                endpoint,
                status.as_u16(),
                message,
                retry_after,
            ));
        }

        if text.trim().is_empty() {
            debug!(endpoint, status = status.as_u16(), "empty success body");
            return Ok(Value::Null);
        }

        let Some(payload) = parsed else {
            return Err(TorboxError::invalid_response(
                endpoint,
                format!("expected JSON body, got: {}", body_snippet(&text)),
            ));
        };

        unwrap_envelope(endpoint, payload)
    }

    async fn open_download(&self, url: &Url) -> Result<reqwest::Response, TorboxError> {
        let endpoint = url.as_str();
        let response = self
            .download_http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TorboxError::network(endpoint, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after_header(&response);
        let text = response.text().await.unwrap_or_default();
        Err(TorboxError::http_status(
            endpoint,
            status.as_u16(),
            body_snippet(&text),
            retry_after,
        ))
    }
}

#[async_trait]
impl JobApi for TorboxClient {
    #[instrument(skip(self))]
    async fn check_connection(&self) -> Result<Value, TorboxError> {
        self.request(USER_ME_PATH, Method::GET, None, None).await
    }

    #[instrument(skip(self), fields(link = %link))]
    async fn create_job(&self, link: &str, name: Option<&str>) -> Result<Value, TorboxError> {
        let mut fields = vec![("link".to_string(), link.to_string())];
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            fields.push(("name".to_string(), name.to_string()));
        }
        self.request(
            CREATE_WEB_DOWNLOAD_PATH,
            Method::POST,
            Some(RequestBody::Form(fields)),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self) -> Result<Value, TorboxError> {
        self.request(JOBS_PATH, Method::GET, None, None).await
    }

    #[instrument(skip(self))]
    async fn job_by_hash(&self, hash: &str) -> Result<Value, TorboxError> {
        let endpoint = format!("{JOBS_PATH}/{}", encode_path_segment(hash));
        self.request(&endpoint, Method::GET, None, None).await
    }

    #[instrument(skip(self))]
    async fn web_downloads_by_id(&self, id: &str) -> Result<Value, TorboxError> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("id", id)
            .finish();
        let endpoint = format!("{WEB_DOWNLOADS_PATH}?{query}");
        self.request(&endpoint, Method::GET, None, None).await
    }

    #[instrument(skip(self))]
    async fn cancel_job(&self, job_id: u64) -> Result<(), TorboxError> {
        let endpoint = format!("{CANCEL_JOB_PATH}/{job_id}");
        let _: Value = self.request(&endpoint, Method::DELETE, None, None).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn download(&self, url: &str) -> Result<ByteStream, TorboxError> {
        let parsed = Url::parse(url).map_err(|_| TorboxError::InvalidUrl {
            url: url.to_string(),
        })?;
        let key = self.api_key.as_deref().unwrap_or_default();

        let response =
            with_retry(&self.retry_policy, url, key, || self.open_download(&parsed)).await?;

        let endpoint = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| TorboxError::network(endpoint.clone(), e)))
            .boxed())
    }
}

/// Runs `operation` under `policy`, sleeping between retryable failures.
///
/// Every failed attempt is logged with the API key redacted.
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: &str,
    api_key: &str,
    mut operation: F,
) -> Result<T, TorboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TorboxError>>,
{
    let mut attempt: u32 = 1;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        warn!(
            endpoint,
            attempt,
            kind = %error.kind(),
            api_key = %redact_api_key(api_key),
            error = %error,
            "Torbox request attempt failed"
        );

        match policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                let delay = server_requested_delay(&error, policy.max_delay()).unwrap_or(delay);
                debug!(delay_ms = delay.as_millis(), next_attempt, "backing off");
                tokio::time::sleep(delay).await;
                attempt = next_attempt;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "giving up");
                return Err(error);
            }
        }
    }
}

fn server_requested_delay(error: &TorboxError, cap: Duration) -> Option<Duration> {
    match error {
        TorboxError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value).map(|delay| delay.min(cap)),
        _ => None,
    }
}

/// Parses a `Retry-After` header value (delta-seconds or HTTP-date).
///
/// Negative values and dates in the past yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    datetime.duration_since(std::time::SystemTime::now()).ok()
}

/// Redacts an API key to its first and last three characters.
///
/// Keys of six characters or fewer are fully masked.
#[must_use]
pub fn redact_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 6 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}…{tail}")
}

fn retry_after_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string)
}

fn encode_path_segment(segment: &str) -> String {
    // byte_serialize encodes a literal '+' as %2B, so any remaining '+' is a space.
    form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, TorboxError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(default_user_agent())
        .build()
        .map_err(TorboxError::ClientBuild)
}
