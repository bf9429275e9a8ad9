//! ICS source fetching.
//!
//! Drives every configured source under a concurrency cap and one global
//! deadline per refresh cycle.  Partial success is normal: each source
//! independently yields a body or a typed error, and the pipeline decides
//! what a failed source means for the window.
//!
//! # Retry policy
//! Transient failures (network errors, timeouts, 5xx) retry up to
//! `MAX_RETRIES` with exponential backoff plus jitter.  4xx never retries;
//! 401/403 additionally logs a SECURITY event.
//!
//! # Conditional refetch
//! `ETag`/`Last-Modified` validators are remembered per source and sent on
//! the next cycle; a 304 re-serves the previously fetched body.

use chime_protocol::RawIcsResponse;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{Config, SourceAuth, SourceSpec};
use crate::health::HealthTracker;
use crate::http_client::ClientManager;

/// Hard cap on a fetched body; matches the parser's fatal input limit.
const MAX_BODY_BYTES: u64 = 50 * 1024 * 1024;
/// First retry delay; grows by the configured backoff factor.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Whole-cycle fetch deadline.
const GLOBAL_DEADLINE: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP {status}")]
    Status { status: u16 },
    #[error("body exceeded {MAX_BODY_BYTES} bytes")]
    TooLarge,
    #[error("global fetch deadline expired")]
    DeadlineExpired,
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Status { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Per-source outcome of one cycle.
#[derive(Debug)]
pub struct SourceFetch {
    pub source_id: String,
    pub url: String,
    pub result: Result<RawIcsResponse, FetchError>,
}

#[derive(Debug, Clone)]
struct CachedFetch {
    etag: Option<String>,
    last_modified: Option<String>,
    body: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct FetchOrchestrator {
    client: Arc<ClientManager>,
    health: Arc<HealthTracker>,
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
    max_retries: u32,
    backoff_factor: f64,
    global_deadline: Duration,
    validators: Mutex<HashMap<String, CachedFetch>>,
    /// Last completed network fetch per source, for per-source refresh
    /// interval overrides.
    last_fetched: Mutex<HashMap<String, std::time::Instant>>,
}

impl FetchOrchestrator {
    pub fn new(config: &Config, client: Arc<ClientManager>, health: Arc<HealthTracker>) -> Self {
        FetchOrchestrator {
            client,
            health,
            semaphore: Arc::new(Semaphore::new(config.fetch_concurrency)),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            backoff_factor: config.retry_backoff_factor,
            global_deadline: GLOBAL_DEADLINE,
            validators: Mutex::new(HashMap::new()),
            last_fetched: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.global_deadline = deadline;
        self
    }

    /// Fetch every source; always returns one entry per source.
    pub async fn fetch_all(&self, sources: &[SourceSpec]) -> Vec<SourceFetch> {
        let mut pending: FuturesUnordered<_> = sources
            .iter()
            .map(|source| self.fetch_guarded(source))
            .collect();

        let deadline = tokio::time::sleep(self.global_deadline);
        tokio::pin!(deadline);

        let mut results: Vec<SourceFetch> = Vec::with_capacity(sources.len());
        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some(result) => results.push(result),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        completed = results.len(),
                        total = sources.len(),
                        "global fetch deadline expired, cancelling in-flight fetches"
                    );
                    break;
                }
            }
        }
        drop(pending); // cancels whatever is still in flight

        // Report sources that never completed as deadline timeouts.
        for source in sources {
            if !results.iter().any(|r| r.source_id == source.id) {
                results.push(SourceFetch {
                    source_id: source.id.clone(),
                    url: source.url.clone(),
                    result: Err(FetchError::DeadlineExpired),
                });
            }
        }
        results
    }

    async fn fetch_guarded(&self, source: &SourceSpec) -> SourceFetch {
        // A source with its own slower refresh interval re-serves the last
        // body until it is due again.
        if let Some(cached) = self.not_yet_due(source) {
            debug!(source = %source.id, "source not due, serving cached body");
            return SourceFetch {
                source_id: source.id.clone(),
                url: source.url.clone(),
                result: Ok(RawIcsResponse {
                    body: cached.body,
                    status: 304,
                    etag: cached.etag,
                    last_modified: cached.last_modified,
                }),
            };
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("fetch semaphore never closes");
        self.health.record_fetch_attempt();

        let result = self.fetch_with_retries(source).await;
        match &result {
            Ok(response) => {
                self.health.record_fetch_success();
                self.last_fetched
                    .lock()
                    .expect("last-fetched lock")
                    .insert(source.id.clone(), std::time::Instant::now());
                debug!(
                    source = %source.id,
                    bytes = response.body.len(),
                    status = response.status,
                    "source fetched"
                );
            }
            Err(e) => {
                warn!(source = %source.id, error = %e, "source fetch failed");
            }
        }
        SourceFetch {
            source_id: source.id.clone(),
            url: source.url.clone(),
            result,
        }
    }

    async fn fetch_with_retries(
        &self,
        source: &SourceSpec,
    ) -> Result<RawIcsResponse, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(source).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(BACKOFF_BASE, self.backoff_factor, attempt);
                    debug!(
                        source = %source.id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, source: &SourceSpec) -> Result<RawIcsResponse, FetchError> {
        let client = if source.verify_tls {
            self.client.client()
        } else {
            insecure_client(self.request_timeout)
        };

        let mut request = client
            .get(&source.url)
            .timeout(source.request_timeout.unwrap_or(self.request_timeout));

        match &source.auth {
            SourceAuth::None => {}
            SourceAuth::Basic { username, password } => {
                request = request.basic_auth(username, Some(password));
            }
            SourceAuth::Bearer { token } => {
                request = request.bearer_auth(token);
            }
        }
        for (name, value) in &source.headers {
            request = request.header(name, value);
        }
        if let Some(cached) = self.cached_validators(&source.id) {
            if let Some(etag) = &cached.etag {
                request = request.header("If-None-Match", etag);
            }
            if let Some(last_modified) = &cached.last_modified {
                request = request.header("If-Modified-Since", last_modified);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.client.record_error();
                return Err(if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(e.to_string())
                });
            }
        };

        let status = response.status().as_u16();
        match status {
            200 => {
                let etag = header_string(&response, "etag");
                let last_modified = header_string(&response, "last-modified");
                let body = self.read_body(response).await?;
                self.client.record_success();
                self.store_validators(
                    &source.id,
                    CachedFetch {
                        etag: etag.clone(),
                        last_modified: last_modified.clone(),
                        body: body.clone(),
                    },
                );
                Ok(RawIcsResponse {
                    body,
                    status: 200,
                    etag,
                    last_modified,
                })
            }
            304 => {
                self.client.record_success();
                match self.cached_validators(&source.id) {
                    Some(cached) => {
                        debug!(source = %source.id, "not modified, serving cached body");
                        Ok(RawIcsResponse {
                            body: cached.body,
                            status: 304,
                            etag: cached.etag,
                            last_modified: cached.last_modified,
                        })
                    }
                    // A 304 with nothing cached means our validator state
                    // was lost; drop validators so the next attempt is
                    // unconditional.
                    None => Err(FetchError::Status { status: 304 }),
                }
            }
            401 | 403 => {
                self.client.record_error();
                warn!(
                    security = true,
                    source = %source.id,
                    status,
                    "source rejected credentials"
                );
                Err(FetchError::Auth { status })
            }
            s if s >= 500 => {
                self.client.record_error();
                Err(FetchError::Status { status: s })
            }
            s => {
                self.client.record_error();
                Err(FetchError::Status { status: s })
            }
        }
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;
            if body.len() as u64 + chunk.len() as u64 > MAX_BODY_BYTES {
                warn!(security = true, "fetched body exceeded size cap");
                return Err(FetchError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// When the source carries its own refresh interval and the last
    /// successful fetch is younger than it, return the cached body.
    fn not_yet_due(&self, source: &SourceSpec) -> Option<CachedFetch> {
        let interval = source.refresh_interval?;
        let last = *self
            .last_fetched
            .lock()
            .expect("last-fetched lock")
            .get(&source.id)?;
        if last.elapsed() >= interval {
            return None;
        }
        self.cached_validators(&source.id)
    }

    fn cached_validators(&self, source_id: &str) -> Option<CachedFetch> {
        self.validators
            .lock()
            .expect("validator lock")
            .get(source_id)
            .cloned()
    }

    fn store_validators(&self, source_id: &str, cached: CachedFetch) {
        self.validators
            .lock()
            .expect("validator lock")
            .insert(source_id.to_owned(), cached);
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn backoff_delay(base: Duration, factor: f64, attempt: u32) -> Duration {
    let scaled = base.as_millis() as f64 * factor.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0..250) as f64;
    Duration::from_millis((scaled + jitter) as u64)
}

/// One-off client for sources that explicitly opted out of TLS
/// verification (self-hosted calendars with private CAs).
fn insecure_client(timeout: Duration) -> reqwest::Client {
    info!("building insecure (no TLS verification) client for opted-out source");
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()
        .expect("HTTP client construction cannot fail with static options")
}

// ---------------------------------------------------------------------------
// Unit tests (wiremock-backed)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_vars;
    use std::collections::HashMap as StdHashMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn test_config(extra: &[(&str, &str)]) -> Config {
        let mut vars: StdHashMap<String, String> = StdHashMap::new();
        vars.insert("ICS_URL".to_owned(), "https://unused/cal.ics".to_owned());
        vars.insert("REQUEST_TIMEOUT".to_owned(), "2".to_owned());
        for (k, v) in extra {
            vars.insert((*k).to_owned(), (*v).to_owned());
        }
        load_config_from_vars(&vars).unwrap()
    }

    fn orchestrator(config: &Config) -> FetchOrchestrator {
        let client = Arc::new(ClientManager::new(config.request_timeout));
        let health = Arc::new(HealthTracker::new(config.refresh_interval));
        FetchOrchestrator::new(config, client, health)
    }

    fn source(id: &str, url: String) -> SourceSpec {
        SourceSpec::new(id, url)
    }

    #[tokio::test]
    async fn fetches_a_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cal.ics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("BEGIN:VCALENDAR"))
            .mount(&server)
            .await;

        let config = test_config(&[]);
        let orch = orchestrator(&config);
        let results = orch
            .fetch_all(&[source("s1", format!("{}/cal.ics", server.uri()))])
            .await;

        assert_eq!(results.len(), 1);
        let response = results[0].result.as_ref().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"BEGIN:VCALENDAR");
    }

    #[tokio::test]
    async fn retries_transient_500_then_succeeds() {
        struct FlakyResponder(std::sync::atomic::AtomicU32);
        impl Respond for FlakyResponder {
            fn respond(&self, _: &Request) -> ResponseTemplate {
                let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200).set_body_string("ok")
                }
            }
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(FlakyResponder(std::sync::atomic::AtomicU32::new(0)))
            .mount(&server)
            .await;

        let config = test_config(&[("MAX_RETRIES", "2")]);
        let orch = orchestrator(&config);
        let results = orch.fetch_all(&[source("s1", server.uri())]).await;
        assert!(results[0].result.is_ok());
    }

    #[tokio::test]
    async fn does_not_retry_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&[("MAX_RETRIES", "3")]);
        let orch = orchestrator(&config);
        let results = orch.fetch_all(&[source("s1", server.uri())]).await;
        assert!(matches!(
            results[0].result,
            Err(FetchError::Status { status: 404 })
        ));
    }

    #[tokio::test]
    async fn auth_failure_is_typed_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&[]);
        let orch = orchestrator(&config);
        let results = orch.fetch_all(&[source("s1", server.uri())]).await;
        assert!(matches!(
            results[0].result,
            Err(FetchError::Auth { status: 401 })
        ));
    }

    #[tokio::test]
    async fn bearer_auth_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&[]);
        let orch = orchestrator(&config);
        let mut spec = source("s1", server.uri());
        spec.auth = SourceAuth::Bearer {
            token: "sekrit".to_owned(),
        };
        let results = orch.fetch_all(&[spec]).await;
        assert!(results[0].result.is_ok());
    }

    #[tokio::test]
    async fn etag_round_trip_serves_cached_body_on_304() {
        let server = MockServer::start().await;
        // First response: 200 with an ETag.
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("BEGIN:VCALENDAR")
                    .insert_header("ETag", "\"v1\""),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Second response: 304 when the validator comes back.
        Mock::given(method("GET"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let config = test_config(&[]);
        let orch = orchestrator(&config);
        let spec = source("s1", server.uri());

        let first = orch.fetch_all(std::slice::from_ref(&spec)).await;
        assert_eq!(first[0].result.as_ref().unwrap().status, 200);

        let second = orch.fetch_all(&[spec]).await;
        let response = second[0].result.as_ref().unwrap();
        assert_eq!(response.status, 304);
        assert_eq!(response.body, b"BEGIN:VCALENDAR");
    }

    #[tokio::test]
    async fn per_source_interval_serves_cached_body_without_refetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("BEGIN:VCALENDAR"))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&[]);
        let orch = orchestrator(&config);
        let mut spec = source("slowpoll", server.uri());
        spec.refresh_interval = Some(Duration::from_secs(3600));

        let first = orch.fetch_all(std::slice::from_ref(&spec)).await;
        assert_eq!(first[0].result.as_ref().unwrap().status, 200);

        // Not due for an hour: the cached body comes back, the mock's
        // expect(1) verifies no second request went out.
        let second = orch.fetch_all(&[spec]).await;
        let response = second[0].result.as_ref().unwrap();
        assert_eq!(response.status, 304);
        assert_eq!(response.body, b"BEGIN:VCALENDAR");
    }

    #[tokio::test]
    async fn global_deadline_reports_unfinished_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let config = test_config(&[("MAX_RETRIES", "0")]);
        let orch = orchestrator(&config).with_deadline(Duration::from_millis(200));
        let results = orch.fetch_all(&[source("slow", server.uri())]).await;
        assert!(matches!(
            results[0].result,
            Err(FetchError::DeadlineExpired)
        ));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let a0 = backoff_delay(Duration::from_millis(500), 1.5, 0);
        let a2 = backoff_delay(Duration::from_millis(500), 1.5, 2);
        assert!(a0 >= Duration::from_millis(500));
        assert!(a0 < Duration::from_millis(800));
        assert!(a2 >= Duration::from_millis(1125));
        assert!(a2 < Duration::from_millis(1425));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Network("reset".to_owned()).is_transient());
        assert!(FetchError::Status { status: 503 }.is_transient());
        assert!(!FetchError::Status { status: 404 }.is_transient());
        assert!(!FetchError::Auth { status: 401 }.is_transient());
        assert!(!FetchError::TooLarge.is_transient());
    }
}
