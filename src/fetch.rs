//! HTTP fetching with bounded retries and exponential backoff.
//!
//! Every remote fetch carries the configured timeout (set on the shared
//! `reqwest::Client`). Transient failures — timeouts, connection errors,
//! HTTP 5xx and 429 — are retried up to the configured budget, after which
//! they become a terminal failure for the owning unit only. Other non-success
//! statuses are treated as malformed data and are not retried.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), 30s) + random_jitter(0..250ms)
//! ```

use crate::errors::{PipelineError, Result};
use rand::{rng, Rng};
use reqwest::{Client, Response, StatusCode};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Whether a failed request may succeed on retry.
fn is_transient_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

/// Whether a status code signals a retryable server-side condition.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn backoff_delay(base_delay: Duration, attempt: usize) -> Duration {
    let mut delay = base_delay.saturating_mul(1 << (attempt - 1).min(16) as u32);
    if delay > MAX_BACKOFF {
        delay = MAX_BACKOFF;
    }
    let jitter_ms: u64 = rng().random_range(0..=250);
    delay + Duration::from_millis(jitter_ms)
}

/// GET `url`, retrying transient failures up to `max_retries` times.
///
/// Returns the successful [`Response`]. Non-transient, non-success statuses
/// yield [`PipelineError::MalformedData`] immediately; an exhausted retry
/// budget yields [`PipelineError::TransientFetch`].
#[instrument(level = "debug", skip(client))]
pub async fn get_with_retry(
    client: &Client,
    url: &str,
    max_retries: usize,
    base_delay: Duration,
) -> Result<Response> {
    let total_t0 = Instant::now();
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        let outcome = client.get(url).send().await;

        let retryable = match outcome {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) if is_transient_status(resp.status()) => {
                resp.error_for_status().expect_err("status checked above")
            }
            Ok(resp) => {
                return Err(PipelineError::MalformedData {
                    url: url.to_string(),
                    reason: format!("status {}", resp.status()),
                });
            }
            Err(e) if is_transient_error(&e) => e,
            Err(e) => return Err(e.into()),
        };

        if attempt > max_retries {
            error!(
                url,
                attempt,
                max = max_retries,
                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                error = %retryable,
                "fetch exhausted retries"
            );
            return Err(PipelineError::TransientFetch {
                url: url.to_string(),
                attempts: attempt,
                source: retryable,
            });
        }

        let delay = backoff_delay(base_delay, attempt);
        warn!(
            url,
            attempt,
            max = max_retries,
            ?delay,
            error = %retryable,
            "fetch attempt failed; backing off"
        );
        sleep(delay).await;
    }
}

/// GET `url` and decode its JSON body, with the same retry policy.
///
/// A body that fails to decode is [`PipelineError::MalformedData`] — the
/// source returned something we cannot use, so retrying would not help.
pub async fn get_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
    max_retries: usize,
    base_delay: Duration,
) -> Result<T> {
    let resp = get_with_retry(client, url, max_retries, base_delay).await?;
    resp.json::<T>()
        .await
        .map_err(|e| PipelineError::MalformedData {
            url: url.to_string(),
            reason: format!("undecodable body: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let base = Duration::from_millis(100);
        let mut last = Duration::ZERO;
        for attempt in 1..=12 {
            let d = backoff_delay(base, attempt);
            // Jitter is at most 250ms, so stripping it keeps ordering checks valid.
            let floor = d.saturating_sub(Duration::from_millis(250));
            assert!(floor >= last.saturating_sub(Duration::from_millis(250)));
            assert!(d <= MAX_BACKOFF + Duration::from_millis(250));
            last = d;
        }
    }

    #[tokio::test]
    async fn test_get_with_retry_succeeds_after_transient_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = Client::new();
        let resp = get_with_retry(
            &client,
            &format!("{}/flaky", server.uri()),
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_get_with_retry_gives_up_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = Client::new();
        let err = get_with_retry(
            &client,
            &format!("{}/down", server.uri()),
            2,
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransientFetch { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_get_with_retry_does_not_retry_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let err = get_with_retry(
            &client,
            &format!("{}/missing", server.uri()),
            5,
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedData { .. }));
    }

    #[tokio::test]
    async fn test_get_json_flags_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/junk"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = Client::new();
        let err = get_json::<serde_json::Value>(
            &client,
            &format!("{}/junk", server.uri()),
            1,
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedData { .. }));
    }
}
