//! HTTP generator client
//!
//! `GET {base_url}/{resource}/{userId}` returns the user's current result.
//! A 404 means the service has not computed it yet; the client then issues
//! the `?force_refresh=true` variant once, which computes on demand.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tally_core::{
    ConfigError, GeneratedResult, GenerationError, GeneratorConfig, PeriodicPayload, TallyResult,
    UserId,
};

use crate::generator::ResultGenerator;
use crate::response::{decode_generated, summarize_error_body};

/// What one HTTP exchange produced.
enum Exchange<T> {
    Found(GeneratedResult<T>),
    NotComputed,
}

/// Remote generator client.
pub struct GeneratorClient {
    client: Client,
    base_url: Url,
    resource: Vec<String>,
    api_token: Option<String>,
}

impl GeneratorClient {
    /// Build a client from validated configuration.
    pub fn new(config: &GeneratorConfig) -> TallyResult<Self> {
        config.validate()?;

        let base_url = Url::parse(config.base_url.trim()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "TALLY_GENERATOR_BASE_URL".to_string(),
                value: config.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_GENERATOR_BASE_URL".to_string(),
                value: config.base_url.clone(),
                reason: "cannot be used as a base URL".to_string(),
            }
            .into());
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "TALLY_GENERATOR_TIMEOUT_SECS".to_string(),
                value: format!("{:?}", config.timeout),
                reason: format!("HTTP client could not be built: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            resource: config
                .resource
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            api_token: config.api_token.clone(),
        })
    }

    /// Build a client from `TALLY_GENERATOR_*` environment variables.
    pub fn from_env() -> TallyResult<Self> {
        Self::new(&GeneratorConfig::from_env()?)
    }

    /// URL for one user, with the user id as a single escaped path segment.
    pub fn endpoint(&self, user_id: &UserId, force_refresh: bool) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(self.resource.iter().map(String::as_str))
                .push(user_id.as_str());
        }
        if force_refresh {
            url.query_pairs_mut().append_pair("force_refresh", "true");
        }
        url
    }

    async fn exchange<T: PeriodicPayload>(
        &self,
        user_id: &UserId,
        force_refresh: bool,
    ) -> Result<Exchange<T>, GenerationError> {
        let url = self.endpoint(user_id, force_refresh);
        tracing::debug!(user_id = %user_id, force_refresh, "Requesting generated result");

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());

        if status.is_success() {
            let body = response.bytes().await.map_err(transport_error)?;
            return decode_generated(&body).map(Exchange::Found);
        }

        if status == StatusCode::NOT_FOUND {
            return Ok(Exchange::NotComputed);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = summarize_error_body(&error_text)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                GenerationError::unauthorized(message)
            }
            StatusCode::TOO_MANY_REQUESTS => GenerationError::rate_limited(retry_after),
            _ => GenerationError::service(Some(status.as_u16()), message),
        })
    }
}

#[async_trait]
impl<T: PeriodicPayload> ResultGenerator<T> for GeneratorClient {
    async fn fetch_or_generate(
        &self,
        user_id: &UserId,
        force_refresh: bool,
    ) -> Result<GeneratedResult<T>, GenerationError> {
        if user_id.is_blank() {
            return Err(GenerationError::service(None, "user id is blank"));
        }

        match self.exchange(user_id, force_refresh).await? {
            Exchange::Found(result) => Ok(result),
            Exchange::NotComputed if !force_refresh => {
                tracing::info!(
                    user_id = %user_id,
                    "Result not computed yet, requesting generation"
                );
                match self.exchange(user_id, true).await? {
                    Exchange::Found(result) => Ok(result),
                    Exchange::NotComputed => Err(not_found()),
                }
            }
            Exchange::NotComputed => Err(not_found()),
        }
    }
}

fn not_found() -> GenerationError {
    GenerationError::service(
        Some(StatusCode::NOT_FOUND.as_u16()),
        "generation produced no result",
    )
}

fn transport_error(e: reqwest::Error) -> GenerationError {
    let message = if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        format!("HTTP request failed: {}", e)
    };
    GenerationError::service(e.status().map(|s| s.as_u16()), message)
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(Duration::from_secs_f64)
}

impl std::fmt::Debug for GeneratorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorClient")
            .field("base_url", &self.base_url.as_str())
            .field("resource", &self.resource.join("/"))
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    fn client(base: &str, resource: &str) -> GeneratorClient {
        GeneratorClient::new(&GeneratorConfig::new(base).with_resource(resource)).unwrap()
    }

    #[test]
    fn test_endpoint_layout() {
        let c = client("https://api.example.com", "wellness-score");
        assert_eq!(
            c.endpoint(&UserId::from("u1"), false).as_str(),
            "https://api.example.com/wellness-score/u1"
        );
        assert_eq!(
            c.endpoint(&UserId::from("u1"), true).as_str(),
            "https://api.example.com/wellness-score/u1?force_refresh=true"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_escapes_user() {
        let c = client("https://api.example.com/v1/", "/insights/weekly/");
        assert_eq!(
            c.endpoint(&UserId::from("a/b c"), false).as_str(),
            "https://api.example.com/v1/insights/weekly/a%2Fb%20c"
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(GeneratorClient::new(&GeneratorConfig::new("ftp://example.com")).is_err());
        let bad_resource = GeneratorConfig::new("http://example.com").with_resource("/");
        assert!(GeneratorClient::new(&bad_resource).is_err());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-5"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let c = GeneratorClient::new(
            &GeneratorConfig::new("https://api.example.com").with_token("sk-secret"),
        )
        .unwrap();
        let debug = format!("{:?}", c);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
