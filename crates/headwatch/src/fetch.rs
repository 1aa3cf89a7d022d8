//! Resilient page fetcher wrapping reqwest.
//!
//! One GET per attempt. Server errors (5xx), network failures, and
//! protection interstitials are retried with exponential backoff; every
//! other response, 4xx included, ends the loop immediately.
//!
//! The retry loop is a small state machine. [`decide`] is the pure
//! transition function; [`HttpFetcher::fetch`] only performs I/O and sleeps.

use std::time::Duration;

use tracing::{debug, warn};

use crate::classify::is_protection_page;
use crate::config::FetchConfig;
use crate::types::HeadwatchResult;

/// Retry bounds for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Sleep before the attempt following `attempt`: `initial_backoff * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Total attempts for one URL, saturating at `u32::MAX`.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Full backoff schedule for a URL that never succeeds.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|a| self.backoff(a)).collect()
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
        }
    }
}

/// What one attempt observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptSignal {
    /// A response arrived.
    Response { status: u16, protection_page: bool },
    /// Timeout, connection failure, or a body that could not be read.
    Network(String),
}

impl AttemptSignal {
    /// Error text for a retriable signal, `None` for an acceptable response.
    pub fn transient_error(&self) -> Option<String> {
        match self {
            AttemptSignal::Response { status, .. } if is_server_error(*status) => {
                Some(format!("server error {status}"))
            }
            AttemptSignal::Response {
                protection_page: true,
                ..
            } => Some("temporary protection or captcha page detected".to_string()),
            AttemptSignal::Response { .. } => None,
            AttemptSignal::Network(error) => Some(error.clone()),
        }
    }
}

/// Transition chosen after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Keep the response.
    Accept,
    /// Sleep, then try again.
    Retry { after: Duration, error: String },
    /// Out of attempts.
    GiveUp { error: String },
}

/// Pure transition function of the retry state machine.
///
/// `attempt` is zero-based. `protection_page` must already account for
/// `ignore_protection`.
pub fn decide(policy: &RetryPolicy, attempt: u32, signal: &AttemptSignal) -> Decision {
    match signal.transient_error() {
        None => Decision::Accept,
        Some(error) if attempt < policy.max_retries => Decision::Retry {
            after: policy.backoff(attempt),
            error,
        },
        Some(error) => Decision::GiveUp { error },
    }
}

fn is_server_error(status: u16) -> bool {
    (500..600).contains(&status)
}

/// States of the retry loop.
#[derive(Debug)]
enum FetchState {
    Attempting { attempt: u32 },
    Retriable { attempt: u32, wait: Duration },
    Success { status: u16, body: String, attempts: u32 },
    ExhaustedFailure { last_error: String, attempts: u32 },
}

/// How a fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success {
        status: u16,
        body: String,
        attempts: u32,
    },
    Failure {
        last_error: String,
        attempts: u32,
    },
}

impl FetchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Success { attempts, .. } | FetchOutcome::Failure { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// HTTP fetcher for monitored pages.
///
/// The client (connection pool and cookie jar) is shared across URLs;
/// nothing else carries over between fetches.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    ignore_protection: bool,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher from explicit configuration.
    pub fn new(config: &FetchConfig) -> HeadwatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(config.user_agent.as_str())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            policy: RetryPolicy::from(config),
            ignore_protection: config.ignore_protection,
            timeout: config.timeout,
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch a page, retrying transient failures.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let mut state = FetchState::Attempting { attempt: 0 };

        loop {
            state = match state {
                FetchState::Attempting { attempt } => {
                    debug!(
                        "GET {url} (attempt {}/{})",
                        attempt.saturating_add(1),
                        self.policy.max_attempts()
                    );
                    let (signal, body) = self.attempt(url).await;
                    match decide(&self.policy, attempt, &signal) {
                        Decision::Accept => {
                            let status = match signal {
                                AttemptSignal::Response { status, .. } => status,
                                AttemptSignal::Network(_) => 0,
                            };
                            FetchState::Success {
                                status,
                                body: body.unwrap_or_default(),
                                attempts: attempt.saturating_add(1),
                            }
                        }
                        Decision::Retry { after, error } => {
                            warn!(
                                "Transient failure for {url} on attempt {}: {error}; retrying in {after:?}",
                                attempt.saturating_add(1)
                            );
                            FetchState::Retriable {
                                attempt,
                                wait: after,
                            }
                        }
                        Decision::GiveUp { error } => FetchState::ExhaustedFailure {
                            last_error: error,
                            attempts: attempt.saturating_add(1),
                        },
                    }
                }
                FetchState::Retriable { attempt, wait } => {
                    tokio::time::sleep(wait).await;
                    FetchState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                FetchState::Success {
                    status,
                    body,
                    attempts,
                } => {
                    return FetchOutcome::Success {
                        status,
                        body,
                        attempts,
                    }
                }
                FetchState::ExhaustedFailure {
                    last_error,
                    attempts,
                } => {
                    return FetchOutcome::Failure {
                        last_error,
                        attempts,
                    };
                }
            };
        }
    }

    /// One GET. Returns the observed signal and, for responses, the body.
    async fn attempt(&self, url: &str) -> (AttemptSignal, Option<String>) {
        let resp = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(r) => r,
            Err(e) => return (AttemptSignal::Network(describe_request_error(&e)), None),
        };

        let status = resp.status().as_u16();
        if is_server_error(status) {
            return (
                AttemptSignal::Response {
                    status,
                    protection_page: false,
                },
                None,
            );
        }

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return (AttemptSignal::Network(describe_request_error(&e)), None),
        };

        let protection_page = !self.ignore_protection && is_protection_page(&body.to_lowercase());
        (
            AttemptSignal::Response {
                status,
                protection_page,
            },
            Some(body),
        )
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy(max_retries: u32, backoff_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(backoff_ms),
        }
    }

    fn fast_config(max_retries: u32) -> FetchConfig {
        FetchConfig {
            max_retries,
            initial_backoff: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
            ..FetchConfig::default()
        }
    }

    fn response(status: u16) -> AttemptSignal {
        AttemptSignal::Response {
            status,
            protection_page: false,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(2, 700);
        assert_eq!(p.backoff(0), Duration::from_millis(700));
        assert_eq!(p.backoff(1), Duration::from_millis(1400));
        assert_eq!(p.backoff(2), Duration::from_millis(2800));
        assert_eq!(p.schedule().len(), 2);
    }

    #[test]
    fn test_max_attempts_saturates() {
        assert_eq!(policy(2, 700).max_attempts(), 3);
        assert_eq!(policy(u32::MAX, 700).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_backoff_saturates() {
        let p = policy(100, 700);
        assert_eq!(p.backoff(64), Duration::MAX);
        let schedule = p.schedule();
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_retry_bound_with_three_transient_failures() {
        let p = policy(2, 700);
        let failure = response(503);

        let mut sleeps = Vec::new();
        let mut attempts = 0;
        loop {
            let decision = decide(&p, attempts, &failure);
            attempts += 1;
            match decision {
                Decision::Retry { after, .. } => sleeps.push(after),
                Decision::GiveUp { error } => {
                    assert_eq!(error, "server error 503");
                    break;
                }
                Decision::Accept => panic!("5xx must not be accepted"),
            }
        }

        assert_eq!(attempts, 3);
        assert_eq!(
            sleeps,
            vec![Duration::from_millis(700), Duration::from_millis(1400)]
        );
    }

    #[test]
    fn test_client_errors_are_terminal() {
        let p = policy(2, 700);
        assert_eq!(decide(&p, 0, &response(404)), Decision::Accept);
        assert_eq!(decide(&p, 0, &response(403)), Decision::Accept);
        assert_eq!(decide(&p, 0, &response(200)), Decision::Accept);
    }

    #[test]
    fn test_network_errors_and_protection_are_retriable() {
        let p = policy(1, 10);
        let net = AttemptSignal::Network("connection failed".to_string());
        assert!(matches!(decide(&p, 0, &net), Decision::Retry { .. }));
        assert!(matches!(decide(&p, 1, &net), Decision::GiveUp { .. }));

        let protected = AttemptSignal::Response {
            status: 200,
            protection_page: true,
        };
        assert!(matches!(decide(&p, 0, &protected), Decision::Retry { .. }));
    }

    #[test]
    fn test_zero_retries_gives_up_at_once() {
        let p = policy(0, 700);
        assert!(matches!(
            decide(&p, 0, &response(500)),
            Decision::GiveUp { .. }
        ));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Hello</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(2)).unwrap();
        let outcome = fetcher.fetch(&format!("{}/page", server.uri())).await;
        assert_eq!(
            outcome,
            FetchOutcome::Success {
                status: 200,
                body: "<h1>Hello</h1>".to_string(),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_exhausts_on_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(2)).unwrap();
        let started = Instant::now();
        let outcome = fetcher.fetch(&server.uri()).await;

        match outcome {
            FetchOutcome::Failure {
                last_error,
                attempts,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "server error 503");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // 5ms + 10ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("<title>404 Not Found</title>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(2)).unwrap();
        let outcome = fetcher.fetch(&server.uri()).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Success {
                status: 404,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_retries_past_protection_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<title>Just a moment...</title> Cloudflare"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Real</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config(2)).unwrap();
        match fetcher.fetch(&server.uri()).await {
            FetchOutcome::Success { body, attempts, .. } => {
                assert_eq!(body, "<h1>Real</h1>");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ignore_protection_accepts_interstitial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("please enable cookies"))
            .expect(1)
            .mount(&server)
            .await;

        let config = FetchConfig {
            ignore_protection: true,
            ..fast_config(2)
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let outcome = fetcher.fetch(&server.uri()).await;
        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(outcome, FetchOutcome::Success { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_is_retried_then_fails() {
        // Bind and drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(&fast_config(1)).unwrap();
        let outcome = fetcher.fetch(&format!("http://{addr}/")).await;
        assert!(matches!(outcome, FetchOutcome::Failure { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = FetchConfig {
            timeout: Duration::from_millis(50),
            ..fast_config(1)
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        match fetcher.fetch(&server.uri()).await {
            FetchOutcome::Failure {
                last_error,
                attempts,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"), "{last_error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
