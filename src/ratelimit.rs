use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Bounded retry on throttling responses. Attempt `n` (zero-based) that gets
/// a 429 waits `unit * 2^(n+1)` before the next one. Any other response, and
/// whatever the final attempt returns, is handed back untouched.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitGuard {
    max_attempts: usize,
    unit: Duration,
}

impl Default for RateLimitGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitGuard {
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            unit: Duration::from_secs(1),
        }
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl((attempt + 1) as u32).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }

    /// Sends the request built by `build`, rebuilding it for every retry.
    pub async fn execute<F>(&self, mut build: F) -> reqwest::Result<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let response = build().send().await?;
            let last = attempt + 1 >= self.max_attempts;
            if response.status() != StatusCode::TOO_MANY_REQUESTS || last {
                return Ok(response);
            }

            let delay = self.backoff_for(attempt);
            warn!(
                url = %response.url(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "rate limited, backing off"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use reqwest::Client;

    use super::RateLimitGuard;

    async fn throttled_until_third(State(hits): State<Arc<AtomicUsize>>) -> Response {
        let hit = hits.fetch_add(1, Ordering::SeqCst);
        if hit < 2 {
            (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response()
        } else {
            (StatusCode::OK, "ok").into_response()
        }
    }

    async fn always_throttled(State(hits): State<Arc<AtomicUsize>>) -> Response {
        hits.fetch_add(1, Ordering::SeqCst);
        (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve mock");
        });
        format!("http://{addr}")
    }

    #[test]
    fn backoff_doubles_from_two_units() {
        let guard = RateLimitGuard::new();
        assert_eq!(guard.backoff_for(0), Duration::from_secs(2));
        assert_eq!(guard.backoff_for(1), Duration::from_secs(4));
        assert_eq!(guard.backoff_for(2), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_throttled_calls_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(
            Router::new()
                .route("/x", get(throttled_until_third))
                .with_state(hits.clone()),
        )
        .await;

        let client = Client::new();
        let guard = RateLimitGuard::new().with_unit(Duration::from_millis(10));
        let started = Instant::now();
        let response = guard
            .execute(|| client.get(format!("{base}/x")))
            .await
            .expect("request");

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn final_throttled_response_is_returned_as_is() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(
            Router::new()
                .route("/x", get(always_throttled))
                .with_state(hits.clone()),
        )
        .await;

        let client = Client::new();
        let guard = RateLimitGuard::new().with_unit(Duration::from_millis(1));
        let response = guard
            .execute(|| client.get(format!("{base}/x")))
            .await
            .expect("request");

        assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
