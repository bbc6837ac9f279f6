//! HTTP fetching with retries, per-host rate limiting and cancellation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use espforge_shared::{EspforgeError, Result, ScrapeConfig};

use crate::error::ExtractError;

/// User-Agent string for documentation requests.
const USER_AGENT: &str = concat!("espforge/", env!("CARGO_PKG_VERSION"));

/// Upper bound for a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Receiving side of a job's cancel signal.
///
/// Checked before every attempt and raced against backoff sleeps; an
/// in-flight request is never interrupted.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token paired with the sender that trips it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the sender
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Spaces request starts to the same host by a fixed interval.
///
/// A caller reserves the next free slot under the lock and sleeps after
/// releasing it, so waiting callers never block each other's bookkeeping.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for this host's next slot.
    pub async fn acquire(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }

        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(host)
                .copied()
                .filter(|t| *t > now)
                .unwrap_or(now);
            slots.insert(host.to_string(), slot + self.interval);
            slot - now
        };

        if !wait.is_zero() {
            debug!(host, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// One attempt's failure, before retry policy is applied.
enum AttemptError {
    Transient(String),
    Final(ExtractError),
}

/// HTTP client with retry and rate-limit policy.
pub struct Fetcher {
    client: Client,
    limiter: HostRateLimiter,
    max_attempts: u32,
    initial_backoff: Duration,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Fetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| EspforgeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limiter: HostRateLimiter::new(Duration::from_millis(config.rate_limit_ms)),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs.
    pub fn allow_localhost(mut self, allow: bool) -> Self {
        self.allow_localhost = allow;
        self
    }

    /// Validate a locator and reject SSRF targets.
    pub fn check_locator(&self, locator: &str) -> std::result::Result<Url, ExtractError> {
        let url = Url::parse(locator).map_err(|e| ExtractError::InvalidLocator {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ExtractError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if !self.allow_localhost && is_ssrf_target(&url) {
            warn!(%url, "SSRF protection: blocked");
            return Err(ExtractError::InvalidLocator {
                locator: locator.to_string(),
                reason: "private or loopback host".into(),
            });
        }
        Ok(url)
    }

    /// GET `url`, retrying transient failures with exponential backoff.
    pub async fn fetch(
        &self,
        url: &Url,
        cancel: &CancelToken,
    ) -> std::result::Result<String, ExtractError> {
        let host = url.host_str().unwrap_or_default().to_string();
        let mut delay = self.initial_backoff;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled(url));
            }

            tokio::select! {
                _ = self.limiter.acquire(&host) => {}
                _ = cancel.cancelled() => return Err(cancelled(url)),
            }
            if cancel.is_cancelled() {
                return Err(cancelled(url));
            }

            debug!(%url, attempt, "fetching page");
            let message = match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Final(err)) => return Err(err),
                Err(AttemptError::Transient(message)) => message,
            };

            if attempt == self.max_attempts {
                return Err(ExtractError::Transient {
                    url: url.to_string(),
                    attempts: attempt,
                    message,
                });
            }

            warn!(
                %url,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "transient failure, backing off"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(cancelled(url)),
            }
            delay = next_backoff(delay);
        }

        // max_attempts >= 1, so the loop always returns.
        Err(cancelled(url))
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("body read failed: {e}")))
    }
}

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_BACKOFF)
}

fn cancelled(url: &Url) -> ExtractError {
    ExtractError::Cancelled {
        url: url.to_string(),
    }
}

fn classify_request_error(url: &Url, err: reqwest::Error) -> AttemptError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        AttemptError::Transient(err.to_string())
    } else {
        AttemptError::Final(ExtractError::Permanent {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }
}

fn classify_status(url: &Url, status: StatusCode) -> AttemptError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AttemptError::Transient(format!("HTTP {status}"))
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        AttemptError::Final(ExtractError::NotFound {
            url: url.to_string(),
            status: status.as_u16(),
        })
    } else {
        AttemptError::Final(ExtractError::Permanent {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        })
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub(crate) fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(max_attempts: u32) -> ScrapeConfig {
        ScrapeConfig {
            concurrency: 2,
            rate_limit_ms: 0,
            max_attempts,
            initial_backoff_ms: 10,
            timeout_secs: 5,
        }
    }

    fn fetcher(max_attempts: u32) -> Fetcher {
        Fetcher::new(&config(max_attempts)).unwrap().allow_localhost(true)
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(next_backoff(Duration::from_secs(200)), MAX_BACKOFF);

        let mut delay = Duration::from_millis(500);
        for _ in 0..200 {
            delay = next_backoff(delay);
        }
        assert_eq!(delay, MAX_BACKOFF);
        assert_eq!(next_backoff(Duration::MAX), MAX_BACKOFF);
    }

    #[test]
    fn ssrf_blocks_private_targets() {
        for target in [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://printer.local/",
        ] {
            assert!(is_ssrf_target(&Url::parse(target).unwrap()), "{target}");
        }
        assert!(!is_ssrf_target(
            &Url::parse("https://esphome.io/components/").unwrap()
        ));
    }

    #[test]
    fn check_locator_rejects_garbage_and_private_hosts() {
        let f = Fetcher::new(&config(1)).unwrap();
        assert!(matches!(
            f.check_locator("not a url"),
            Err(ExtractError::InvalidLocator { .. })
        ));
        assert!(matches!(
            f.check_locator("ftp://esphome.io/x"),
            Err(ExtractError::InvalidLocator { .. })
        ));
        assert!(matches!(
            f.check_locator("http://127.0.0.1/x"),
            Err(ExtractError::InvalidLocator { .. })
        ));
        assert!(f.check_locator("https://esphome.io/components/wifi.html").is_ok());
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>ok</h1>"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();
        let body = fetcher(3).fetch(&url, &CancelToken::never()).await.unwrap();
        assert_eq!(body, "<h1>ok</h1>");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/busy", server.uri())).unwrap();
        let err = fetcher(2)
            .fetch(&url, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Transient { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = fetcher(3)
            .fetch(&url, &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractError::NotFound {
                url: url.to_string(),
                status: 404
            }
        );
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/forbidden", server.uri())).unwrap();
        let err = fetcher(3)
            .fetch(&url, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Permanent { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (tx, token) = CancelToken::channel();
        tx.send(true).unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let err = fetcher(3).fetch(&url, &token).await.unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(5);
        cfg.initial_backoff_ms = 60_000;
        let f = Fetcher::new(&cfg).unwrap().allow_localhost(true);
        let (tx, token) = CancelToken::channel();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(true).unwrap();
        });
        let started = std::time::Instant::now();
        let err = f.fetch(&url, &token).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, ExtractError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn rate_limiter_spaces_same_host() {
        let limiter = HostRateLimiter::new(Duration::from_millis(50));
        let started = std::time::Instant::now();
        for _ in 0..3 {
            limiter.acquire("esphome.io").await;
        }
        assert!(started.elapsed() >= Duration::from_millis(100));

        let other = std::time::Instant::now();
        limiter.acquire("example.com").await;
        assert!(other.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn never_token_stays_pending() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
    }
}
