//! Service configuration from environment variables.
//!
//! `.env` files are loaded first (via dotenvy) so a systemd unit and a dev
//! shell configure the service identically.  Every recognized variable has
//! a documented default; the only hard requirement is at least one source
//! URL (`ICS_URL` or `ICS_SOURCES`).
//!
//! # Recognized variables
//! - `ICS_URL` / `ICS_SOURCES` (comma-separated)
//! - `REFRESH_INTERVAL` (seconds, default 300)
//! - `SERVER_BIND` (default `0.0.0.0`), `SERVER_PORT` (default 8080)
//! - `RRULE_EXPANSION_DAYS` (365), `EXPANSION_TIME_BUDGET_MS_PER_RULE`
//!   (200), `MAX_OCCURRENCES_PER_RULE` (250), `EXPANSION_YIELD_FREQUENCY`
//!   (50), `RRULE_WORKER_CONCURRENCY` (1)
//! - `FETCH_CONCURRENCY` (2, clamped to 1..=3), `REQUEST_TIMEOUT` (30),
//!   `MAX_RETRIES` (3), `RETRY_BACKOFF_FACTOR` (1.5)
//! - `EVENT_WINDOW_SIZE` (50)
//! - `ALEXA_BEARER_TOKEN` (voice endpoints return 503 until set)
//! - `DEBUG`, `LOG_LEVEL`
//! - `TEST_TIME` (RFC 3339; pins the clock)
//! - `PRODUCTION` (default true; enables cache + precompute)
//! - `DEFAULT_TIMEZONE` (default `America/New_York`)
//! - `EXDATE_TOLERANCE_SECS` (60)

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Per-source HTTP auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAuth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// One ICS feed to poll.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Stable identifier, used in logs and health notes.
    pub id: String,
    pub url: String,
    pub auth: SourceAuth,
    /// Overrides the global `REQUEST_TIMEOUT` when set.
    pub request_timeout: Option<Duration>,
    /// Overrides the global `REFRESH_INTERVAL` when set.
    pub refresh_interval: Option<Duration>,
    pub headers: Vec<(String, String)>,
    pub verify_tls: bool,
}

impl SourceSpec {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        SourceSpec {
            id: id.into(),
            url: url.into(),
            auth: SourceAuth::None,
            request_timeout: None,
            refresh_interval: None,
            headers: Vec::new(),
            verify_tls: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<SourceSpec>,
    pub refresh_interval: Duration,
    pub server_bind: String,
    pub server_port: u16,

    pub expansion_days: i64,
    pub expansion_time_budget: Duration,
    pub max_occurrences_per_rule: usize,
    pub expansion_yield_frequency: usize,
    pub rrule_worker_concurrency: usize,

    pub fetch_concurrency: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_factor: f64,

    pub event_window_size: usize,
    pub alexa_bearer_token: Option<String>,
    pub debug: bool,
    pub log_level: String,
    /// Pins the clock when set (test deployments only).
    pub test_time: Option<DateTime<Utc>>,
    /// Enables the response cache and precomputation.
    pub production: bool,
    pub default_timezone: Tz,
    pub exdate_tolerance: chrono::Duration,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_bind, self.server_port)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingField(s) => write!(f, "Missing required variable: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load from the process environment (after `dotenvy::dotenv()`).
pub fn load_config() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();
    let vars: HashMap<String, String> = std::env::vars().collect();
    load_config_from_vars(&vars)
}

/// Load from an explicit variable map (tests use this directly).
pub fn load_config_from_vars(vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
    let get = |name: &str| vars.get(name).map(String::as_str).filter(|v| !v.is_empty());

    let sources = parse_sources(get("ICS_SOURCES"), get("ICS_URL"))?;

    let refresh_interval = Duration::from_secs(parse_or(get("REFRESH_INTERVAL"), 300u64)?);
    let server_bind = get("SERVER_BIND").unwrap_or("0.0.0.0").to_owned();
    let server_port = parse_or(get("SERVER_PORT"), 8080u16)?;

    let expansion_days = parse_or(get("RRULE_EXPANSION_DAYS"), 365i64)?;
    let expansion_time_budget =
        Duration::from_millis(parse_or(get("EXPANSION_TIME_BUDGET_MS_PER_RULE"), 200u64)?);
    let max_occurrences_per_rule = parse_or(get("MAX_OCCURRENCES_PER_RULE"), 250usize)?;
    let expansion_yield_frequency = parse_or(get("EXPANSION_YIELD_FREQUENCY"), 50usize)?;
    let rrule_worker_concurrency = parse_or(get("RRULE_WORKER_CONCURRENCY"), 1usize)?.max(1);

    let fetch_concurrency = parse_or(get("FETCH_CONCURRENCY"), 2usize)?.clamp(1, 3);
    let request_timeout = Duration::from_secs(parse_or(get("REQUEST_TIMEOUT"), 30u64)?);
    let max_retries = parse_or(get("MAX_RETRIES"), 3u32)?;
    let retry_backoff_factor = parse_or(get("RETRY_BACKOFF_FACTOR"), 1.5f64)?;
    if retry_backoff_factor < 1.0 {
        return Err(ConfigError::InvalidValue(
            "RETRY_BACKOFF_FACTOR must be >= 1.0".to_owned(),
        ));
    }

    let event_window_size = parse_or(get("EVENT_WINDOW_SIZE"), 50usize)?.max(1);
    let alexa_bearer_token = get("ALEXA_BEARER_TOKEN").map(str::to_owned);
    let debug = parse_bool(get("DEBUG"), false)?;
    let log_level = get("LOG_LEVEL")
        .unwrap_or(if debug { "debug" } else { "info" })
        .to_owned();

    let test_time = match get("TEST_TIME") {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ConfigError::InvalidValue(format!("TEST_TIME '{}': {}", raw, e)))?,
        ),
        None => None,
    };

    let production = parse_bool(get("PRODUCTION"), true)?;
    let default_timezone = match get("DEFAULT_TIMEZONE") {
        Some(raw) => Tz::from_str(raw)
            .map_err(|_| ConfigError::InvalidValue(format!("DEFAULT_TIMEZONE '{}'", raw)))?,
        None => chrono_tz::America::New_York,
    };
    let exdate_tolerance =
        chrono::Duration::seconds(parse_or(get("EXDATE_TOLERANCE_SECS"), 60i64)?);

    Ok(Config {
        sources,
        refresh_interval,
        server_bind,
        server_port,
        expansion_days,
        expansion_time_budget,
        max_occurrences_per_rule,
        expansion_yield_frequency,
        rrule_worker_concurrency,
        fetch_concurrency,
        request_timeout,
        max_retries,
        retry_backoff_factor,
        event_window_size,
        alexa_bearer_token,
        debug,
        log_level,
        test_time,
        production,
        default_timezone,
        exdate_tolerance,
    })
}

fn parse_sources(
    ics_sources: Option<&str>,
    ics_url: Option<&str>,
) -> Result<Vec<SourceSpec>, ConfigError> {
    let urls: Vec<&str> = match (ics_sources, ics_url) {
        (Some(list), _) => list
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .collect(),
        (None, Some(single)) => vec![single],
        (None, None) => {
            return Err(ConfigError::MissingField("ICS_URL or ICS_SOURCES".to_owned()));
        }
    };
    if urls.is_empty() {
        return Err(ConfigError::InvalidValue(
            "ICS_SOURCES contained no URLs".to_owned(),
        ));
    }

    Ok(urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| SourceSpec::new(format!("source-{}", i + 1), url))
        .collect())
}

fn parse_or<T: FromStr>(raw: Option<&str>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("'{}'", raw))),
    }
}

fn parse_bool(raw: Option<&str>, default: bool) -> Result<bool, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(format!("boolean '{}'", other))),
        },
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg =
            load_config_from_vars(&vars(&[("ICS_URL", "https://example.com/cal.ics")])).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].url, "https://example.com/cal.ics");
        assert_eq!(cfg.refresh_interval, Duration::from_secs(300));
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.expansion_days, 365);
        assert_eq!(cfg.max_occurrences_per_rule, 250);
        assert_eq!(cfg.fetch_concurrency, 2);
        assert_eq!(cfg.event_window_size, 50);
        assert!(cfg.production);
        assert_eq!(cfg.exdate_tolerance, chrono::Duration::seconds(60));
        assert_eq!(cfg.default_timezone, chrono_tz::America::New_York);
    }

    #[test]
    fn missing_sources_is_an_error() {
        let err = load_config_from_vars(&vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn ics_sources_splits_and_wins_over_ics_url() {
        let cfg = load_config_from_vars(&vars(&[
            ("ICS_SOURCES", "https://a/cal.ics, https://b/cal.ics"),
            ("ICS_URL", "https://ignored/cal.ics"),
        ]))
        .unwrap();
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[0].id, "source-1");
        assert_eq!(cfg.sources[1].url, "https://b/cal.ics");
    }

    #[test]
    fn fetch_concurrency_is_clamped() {
        let cfg = load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("FETCH_CONCURRENCY", "9"),
        ]))
        .unwrap();
        assert_eq!(cfg.fetch_concurrency, 3);

        let cfg = load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("FETCH_CONCURRENCY", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.fetch_concurrency, 1);
    }

    #[test]
    fn test_time_parses_rfc3339() {
        let cfg = load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("TEST_TIME", "2025-11-05T00:00:00Z"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.test_time.unwrap(),
            chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 11, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("REFRESH_INTERVAL", "soon"),
        ]))
        .is_err());
        assert!(load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("TEST_TIME", "yesterday"),
        ]))
        .is_err());
        assert!(load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("RETRY_BACKOFF_FACTOR", "0.5"),
        ]))
        .is_err());
        assert!(load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("DEFAULT_TIMEZONE", "Mars/Olympus"),
        ]))
        .is_err());
    }

    #[test]
    fn debug_implies_debug_log_level() {
        let cfg = load_config_from_vars(&vars(&[
            ("ICS_URL", "https://a/cal.ics"),
            ("DEBUG", "true"),
        ]))
        .unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.log_level, "debug");
    }
}
