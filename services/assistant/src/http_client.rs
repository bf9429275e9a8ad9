//! Shared HTTP client lifecycle.
//!
//! One connection-pooled client per process, IPv4-only (the target hosts
//! sit on networks where AAAA lookups stall), recreated after 3
//! consecutive errors or 5 minutes without a success.  Recreation is the
//! blunt recovery for a wedged pool; its health state is part of this
//! type's contract, not hidden.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const MAX_CONSECUTIVE_ERRORS: u32 = 3;
const STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Keep-alive connections per host; small on purpose for constrained hosts.
const POOL_MAX_IDLE_PER_HOST: usize = 2;

pub struct ClientManager {
    request_timeout: Duration,
    inner: Mutex<ClientState>,
}

struct ClientState {
    client: reqwest::Client,
    consecutive_errors: u32,
    last_success: Option<Instant>,
    created: Instant,
}

impl ClientManager {
    pub fn new(request_timeout: Duration) -> Self {
        ClientManager {
            request_timeout,
            inner: Mutex::new(ClientState {
                client: build_client(request_timeout),
                consecutive_errors: 0,
                last_success: None,
                created: Instant::now(),
            }),
        }
    }

    /// The current client, recreated first if it looks wedged.
    pub fn client(&self) -> reqwest::Client {
        let mut state = self.inner.lock().expect("client state lock");
        if needs_recreate(&state) {
            warn!(
                consecutive_errors = state.consecutive_errors,
                "recreating shared HTTP client"
            );
            state.client = build_client(self.request_timeout);
            state.consecutive_errors = 0;
            state.created = Instant::now();
        }
        state.client.clone()
    }

    pub fn record_success(&self) {
        let mut state = self.inner.lock().expect("client state lock");
        state.consecutive_errors = 0;
        state.last_success = Some(Instant::now());
    }

    pub fn record_error(&self) {
        let mut state = self.inner.lock().expect("client state lock");
        state.consecutive_errors += 1;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.inner.lock().expect("client state lock").consecutive_errors
    }
}

fn needs_recreate(state: &ClientState) -> bool {
    if state.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
        return true;
    }
    let since_good = state
        .last_success
        .map_or_else(|| state.created.elapsed(), |t| t.elapsed());
    // Only consider staleness once errors have been seen; an idle healthy
    // client is fine.
    state.consecutive_errors > 0 && since_good > STALE_AFTER
}

fn build_client(request_timeout: Duration) -> reqwest::Client {
    info!("building shared HTTP client (IPv4-only, pooled)");
    reqwest::Client::builder()
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Duration::from_secs(90))
        .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .user_agent(concat!("chime/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("HTTP client construction cannot fail with static options")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_accumulate_until_success() {
        let manager = ClientManager::new(Duration::from_secs(5));
        manager.record_error();
        manager.record_error();
        assert_eq!(manager.consecutive_errors(), 2);
        manager.record_success();
        assert_eq!(manager.consecutive_errors(), 0);
    }

    #[test]
    fn client_is_recreated_after_error_threshold() {
        let manager = ClientManager::new(Duration::from_secs(5));
        for _ in 0..MAX_CONSECUTIVE_ERRORS {
            manager.record_error();
        }
        // Fetching the client resets the error streak via recreation.
        let _ = manager.client();
        assert_eq!(manager.consecutive_errors(), 0);
    }

    #[test]
    fn healthy_client_is_reused() {
        let manager = ClientManager::new(Duration::from_secs(5));
        manager.record_success();
        let _ = manager.client();
        assert_eq!(manager.consecutive_errors(), 0);
    }
}
