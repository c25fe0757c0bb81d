//! Profile service client
//!
//! Fetches a player's profile by identifier and classifies every failure
//! into a [`FetchError`]. The service reports most failures in the JSON
//! body (with a non-2xx status), so the body is interpreted regardless of
//! the HTTP status code.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tabstats_common::config::{EnrichmentSettings, SharedCredential};
use tabstats_common::Identifier;

use crate::error::{FetchError, FetchResult};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("TabStats/", env!("CARGO_PKG_VERSION"));

/// Cause string the service uses for a rejected key
const INVALID_KEY_CAUSE: &str = "Invalid API key";

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Source of raw player profiles
///
/// Implemented by [`ProfileClient`] for the real service; tests provide
/// scripted implementations.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch the `player` object for an identifier
    async fn fetch_profile(&self, id: Identifier) -> FetchResult<Value>;
}

/// HTTP client for the profile service
pub struct ProfileClient {
    http_client: reqwest::Client,
    base_url: String,
    credential: SharedCredential,
    rate_limiter: Option<DirectLimiter>,
}

impl ProfileClient {
    /// Build a client from the enrichment settings.
    ///
    /// The credential is shared, so a key change made elsewhere applies to
    /// the next request without rebuilding the client.
    pub fn new(settings: &EnrichmentSettings, credential: SharedCredential) -> FetchResult<Self> {
        let timeout = Duration::from_millis(settings.request_timeout_ms);
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let rate_limiter = settings
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            http_client,
            base_url: settings.profile_base_url.trim_end_matches('/').to_string(),
            credential,
            rate_limiter,
        })
    }
}

#[async_trait]
impl ProfileSource for ProfileClient {
    async fn fetch_profile(&self, id: Identifier) -> FetchResult<Value> {
        let key = self.credential.get();
        if key.is_empty() {
            return Err(FetchError::InvalidCredential);
        }

        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}/player", self.base_url);
        let compact = id.compact();

        tracing::debug!(id = %id, "Querying profile service");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[("key", key.as_str()), ("uuid", compact.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        tracing::trace!(id = %id, status = status.as_u16(), bytes = body.len(), "Profile response");

        interpret_profile_response(&body)
    }
}

/// Classify a profile response body.
///
/// Returns the `player` object on success.
pub fn interpret_profile_response(body: &str) -> FetchResult<Value> {
    let mut obj: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
    if !obj.is_object() {
        return Err(FetchError::MalformedResponse(
            "response is not a JSON object".to_string(),
        ));
    }

    let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);
    let success = flag("success");
    let throttle = flag("throttle");
    let global = flag("global");
    let cause = obj
        .get("cause")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let invalid_key = cause.eq_ignore_ascii_case(INVALID_KEY_CAUSE);

    if !success {
        if invalid_key {
            return Err(FetchError::InvalidCredential);
        }
        if throttle || global {
            return Err(FetchError::Throttled { global });
        }
        return Err(FetchError::RequestFailed(if cause.is_empty() {
            "unsuccessful response".to_string()
        } else {
            cause
        }));
    }

    match obj.get_mut("player").map(Value::take) {
        Some(player) if player.is_object() => Ok(player),
        Some(Value::Null) | None => Err(FetchError::ProfileNotFound),
        Some(other) => Err(FetchError::MalformedResponse(format!(
            "player is not an object: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_returns_player_object() {
        let player = interpret_profile_response(
            r#"{"success":true,"player":{"displayname":"Steve","stats":{}}}"#,
        )
        .unwrap();
        assert_eq!(player["displayname"], "Steve");
    }

    #[test]
    fn test_null_player_is_not_found() {
        assert_eq!(
            interpret_profile_response(r#"{"success":true,"player":null}"#),
            Err(FetchError::ProfileNotFound)
        );
        assert_eq!(
            interpret_profile_response(r#"{"success":true}"#),
            Err(FetchError::ProfileNotFound)
        );
    }

    #[test]
    fn test_invalid_key_wins_over_throttle() {
        assert_eq!(
            interpret_profile_response(
                r#"{"success":false,"cause":"invalid api KEY","throttle":true,"global":true}"#
            ),
            Err(FetchError::InvalidCredential)
        );
    }

    #[test]
    fn test_throttle_scope() {
        assert_eq!(
            interpret_profile_response(r#"{"success":false,"throttle":true}"#),
            Err(FetchError::Throttled { global: false })
        );
        assert_eq!(
            interpret_profile_response(r#"{"success":false,"throttle":true,"global":true}"#),
            Err(FetchError::Throttled { global: true })
        );
    }

    #[test]
    fn test_other_failures() {
        assert_eq!(
            interpret_profile_response(r#"{"success":false,"cause":"Malformed UUID"}"#),
            Err(FetchError::RequestFailed("Malformed UUID".to_string()))
        );
        assert!(matches!(
            interpret_profile_response("<html>502</html>"),
            Err(FetchError::MalformedResponse(_))
        ));
        assert!(matches!(
            interpret_profile_response("[1,2]"),
            Err(FetchError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_credential_fails_before_io() {
        let settings = EnrichmentSettings {
            // Unroutable; a request would fail with RequestFailed instead
            profile_base_url: "http://127.0.0.1:9".to_string(),
            ..EnrichmentSettings::default()
        };
        let client = ProfileClient::new(&settings, SharedCredential::new("  ")).unwrap();
        let result = client.fetch_profile(Identifier::from_parts(1, 4)).await;
        assert_eq!(result, Err(FetchError::InvalidCredential));
    }
}
