//! Salesforce HTTP transport with session-header auth and safe logging.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::salesforce::xml;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Salesforce API requests.
const CLIENT_USER_AGENT: &str = concat!("bulk-export/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Sanitizes a URL for safe logging.
///
/// Only the path is kept: scheme, host, query and fragment are dropped.
/// Example: `/services/async/60.0/job/750xx/batch`
pub fn sanitize_url_for_logs(url: &Url) -> String {
    url.path().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP transport for the Salesforce async API.
///
/// Every request carries the session id in the configured header. Any
/// non-success status is turned into an `AppError` before the body reaches
/// the caller, so callers only ever see bodies of 2xx responses.
#[derive(Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    instance_url: Url,
    auth_header: HeaderName,
    session: SecretString,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("instance_url", &self.instance_url.as_str())
            .field("auth_header", &self.auth_header)
            .field("session", &"[REDACTED]")
            .finish()
    }
}

impl SalesforceClient {
    /// Creates a transport for the given instance.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` if the instance URL or header name is invalid
    /// - `AppError::Internal` if the HTTP client fails to initialize
    pub fn new(
        instance_url: &str,
        session: SecretString,
        auth_header_name: &str,
    ) -> Result<Self, AppError> {
        let instance_url = Url::parse(instance_url)
            .map_err(|_| AppError::Config("Invalid instance URL".to_string()))?;
        if !matches!(instance_url.scheme(), "http" | "https") {
            return Err(AppError::Config(
                "Instance URL must use http or https".to_string(),
            ));
        }

        let auth_header = HeaderName::from_bytes(auth_header_name.as_bytes()).map_err(|_| {
            AppError::Config(format!("Invalid auth header name: {}", auth_header_name))
        })?;

        Ok(Self {
            http: build_http_client()?,
            instance_url,
            auth_header,
            session,
        })
    }

    /// Builds a full URL by joining the path with the instance URL.
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        self.instance_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Issues a GET and returns the body of a successful response.
    pub async fn get_text(&self, path: &str) -> Result<String, AppError> {
        self.send(Method::GET, path, None, &[]).await
    }

    /// Issues a POST with a body and returns the body of a successful response.
    ///
    /// `extra_headers` are added after the session and content-type headers.
    pub async fn post_text(
        &self,
        path: &str,
        body: String,
        content_type: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<String, AppError> {
        self.send(Method::POST, path, Some((body, content_type)), extra_headers)
            .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(String, &str)>,
        extra_headers: &[(&str, &str)],
    ) -> Result<String, AppError> {
        let url = self.build_url(path)?;
        let sanitized_url = sanitize_url_for_logs(&url);

        let mut session = HeaderValue::from_str(self.session.expose_secret())
            .map_err(|_| AppError::Config("Session id contains invalid characters".to_string()))?;
        session.set_sensitive(true);

        let mut request = self
            .http
            .request(method.clone(), url.as_str())
            .header(self.auth_header.clone(), session);

        if let Some((body, content_type)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(body);
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        let start = Instant::now();
        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        let response = match result {
            Ok(response) => response,
            Err(_) => {
                // The reqwest error may carry the full URL; never surface it.
                info!("[SFDC] {} {} FAILED {}ms", method, sanitized_url, duration_ms);
                return Err(AppError::ConnectionFailed(
                    "Connection to Salesforce failed".to_string(),
                ));
            }
        };

        let status = response.status();
        info!(
            "[SFDC] {} {} {} {}ms",
            method,
            sanitized_url,
            status.as_u16(),
            duration_ms
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.text().await.map_err(|_| {
            AppError::ConnectionFailed("Failed to read Salesforce response body".to_string())
        })
    }
}

/// Maps a non-success response to the matching `AppError`.
async fn parse_error_response(response: reqwest::Response, status: StatusCode) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == StatusCode::NOT_FOUND {
        return AppError::NotFound("Bulk job resource not found".to_string());
    }

    let body = response.text().await.unwrap_or_default();

    if let Some(api_error) = xml::decode_api_error(&body) {
        if api_error.code == "ExceededQuota" {
            warn!("[SFDC] API quota exceeded");
            return AppError::RateLimited {
                retry_after_secs: None,
            };
        }
        return AppError::SalesforceError(format!("[{}] {}", api_error.code, api_error.message));
    }

    AppError::SalesforceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Builds the configured HTTP client.
fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
