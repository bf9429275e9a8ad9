//! Voice and kiosk HTTP handlers.
//!
//! One static intent table is the single source of truth for routing
//! metadata: auth requirement, cacheability, precompute key, and parameter
//! schema.  One runner executes every intent: validate → authenticate →
//! read window → precomputed → cached → compute.  Intent semantics live in
//! [`intents`] as pure functions; nothing in this module touches the
//! calendar logic itself.

pub mod intents;
pub mod params;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chime_protocol::{EventWindow, HealthStatus, HttpErrorEnvelope, MeetingJson};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::precompute;
use crate::response_cache::ResponseCache;
use crate::state::AppState;
use intents::{DetailLevel, MorningSummaryParams};
use params::{FieldKind, FieldSpec, ValidationError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Request-level failures, mapped to status codes in one place.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or wrong bearer token; body stays terse, details go to logs.
    Unauthorized,
    Validation(ValidationError),
    /// No window published yet (startup before the first refresh).
    Unavailable,
    Internal(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                HttpErrorEnvelope {
                    code: "UNAUTHORIZED".to_owned(),
                    message: "unauthorized".to_owned(),
                    details: None,
                },
            ),
            ApiError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                HttpErrorEnvelope {
                    code: "VALIDATION_ERROR".to_owned(),
                    message: e.to_string(),
                    details: Some(serde_json::json!({ "field": e.field })),
                },
            ),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                HttpErrorEnvelope {
                    code: "UNAVAILABLE".to_owned(),
                    message: "I can't reach your calendar yet. Please try again in a moment."
                        .to_owned(),
                    details: None,
                },
            ),
            ApiError::Internal(detail) => {
                // The detail is logged, never echoed.
                warn!(detail = %detail, "internal handler error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HttpErrorEnvelope {
                        code: "INTERNAL_ERROR".to_owned(),
                        message: "I'm having trouble accessing your calendar right now."
                            .to_owned(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(envelope)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        warn!(security = true, "voice endpoint hit but ALEXA_BEARER_TOKEN is not configured");
        return Err(ApiError::Unavailable);
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        Some(_) => {
            warn!(security = true, "voice request with wrong bearer token");
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!(security = true, "voice request without bearer token");
            Err(ApiError::Unauthorized)
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

// ---------------------------------------------------------------------------
// Intent table
// ---------------------------------------------------------------------------

/// Routing metadata for one intent.
pub struct IntentDescriptor {
    pub name: &'static str,
    pub requires_auth: bool,
    pub cacheable: bool,
    pub precompute_key: Option<&'static str>,
    pub params: &'static [FieldSpec],
}

const TZ_PARAM: FieldSpec = FieldSpec {
    name: "tz",
    kind: FieldKind::Timezone,
    required: false,
    default: None,
};

const MORNING_PARAMS: &[FieldSpec] = &[
    TZ_PARAM,
    FieldSpec {
        name: "date",
        kind: FieldKind::Date,
        required: false,
        default: None,
    },
    FieldSpec {
        name: "detail_level",
        kind: FieldKind::Choice(&["brief", "standard", "detailed"]),
        required: false,
        default: Some("standard"),
    },
    FieldSpec {
        name: "max_events",
        kind: FieldKind::Int { min: 1, max: 20 },
        required: false,
        default: Some("10"),
    },
];

/// The single source of truth for intent routing.
pub static INTENTS: &[IntentDescriptor] = &[
    IntentDescriptor {
        name: "next-meeting",
        requires_auth: true,
        cacheable: true,
        precompute_key: Some(precompute::NEXT_MEETING),
        params: &[TZ_PARAM],
    },
    IntentDescriptor {
        name: "time-until-next",
        requires_auth: true,
        cacheable: true,
        precompute_key: Some(precompute::TIME_UNTIL_NEXT),
        params: &[],
    },
    IntentDescriptor {
        name: "done-for-day",
        requires_auth: true,
        cacheable: true,
        precompute_key: Some(precompute::DONE_FOR_DAY),
        params: &[TZ_PARAM],
    },
    IntentDescriptor {
        name: "launch",
        requires_auth: true,
        cacheable: true,
        precompute_key: None,
        params: &[TZ_PARAM],
    },
    IntentDescriptor {
        name: "morning-summary",
        requires_auth: true,
        cacheable: true,
        precompute_key: Some(precompute::MORNING_SUMMARY),
        params: MORNING_PARAMS,
    },
    IntentDescriptor {
        name: "morning-summary-general",
        requires_auth: false,
        cacheable: true,
        precompute_key: Some(precompute::MORNING_SUMMARY),
        params: MORNING_PARAMS,
    },
];

fn descriptor(name: &str) -> &'static IntentDescriptor {
    INTENTS
        .iter()
        .find(|d| d.name == name)
        .expect("intent registered in INTENTS")
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Validate → authenticate → window → precomputed → cached → compute.
async fn run_intent<F>(
    state: &AppState,
    name: &'static str,
    headers: &HeaderMap,
    raw: HashMap<String, String>,
    compute: F,
) -> Result<Json<Value>, ApiError>
where
    F: FnOnce(
            &AppState,
            &EventWindow,
            DateTime<Utc>,
            &[(String, String)],
        ) -> Result<Value, ApiError>
        + Send,
{
    let descriptor = descriptor(name);

    let validated = params::validate(descriptor.params, &raw, &state.resolver)
        .map_err(ApiError::Validation)?;

    if descriptor.requires_auth {
        check_bearer(headers, state.config.alexa_bearer_token.as_deref())?;
    }

    let window = state.window.read();
    if window.version == 0 {
        return Err(ApiError::Unavailable);
    }
    let now = state.now();

    // Parameter-free requests are the hot path: serve the precomputed
    // answer for this window version when one exists.
    if raw.is_empty() {
        if let Some(key) = descriptor.precompute_key {
            if let Some(precomputed) = state.precomputed.get(key, window.version) {
                return Ok(Json(precomputed.as_ref().clone()));
            }
        }
    }

    let cache_key = ResponseCache::key(name, window.version, &validated);
    if descriptor.cacheable {
        if let Some(cached) = state.cache.get(cache_key) {
            return Ok(Json(cached.as_ref().clone()));
        }
    }

    let value = compute(state, &window, now, &validated)?;
    if descriptor.cacheable {
        state.cache.put(cache_key, Arc::new(value.clone()));
    }
    Ok(Json(value))
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

fn param_tz(state: &AppState, validated: &[(String, String)]) -> Tz {
    params::get(validated, "tz")
        .and_then(|name| Tz::from_str(name).ok())
        .unwrap_or(state.config.default_timezone)
}

fn morning_params(
    state: &AppState,
    now: DateTime<Utc>,
    validated: &[(String, String)],
) -> MorningSummaryParams {
    let tz = param_tz(state, validated);
    let date = params::get(validated, "date")
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        // Asked without a date, "morning summary" means the next morning.
        .unwrap_or_else(|| (now.with_timezone(&tz) + chrono::Duration::days(1)).date_naive());
    let detail_level = params::get(validated, "detail_level")
        .and_then(DetailLevel::parse)
        .unwrap_or(DetailLevel::Standard);
    let max_events = params::get(validated, "max_events")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(10);

    MorningSummaryParams {
        date,
        tz,
        detail_level,
        max_events,
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn alexa_next_meeting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    run_intent(
        &state,
        "next-meeting",
        &headers,
        raw,
        |state, window, now, validated| {
            let tz = param_tz(state, validated);
            Ok(serde_json::to_value(intents::next_meeting(
                window, now, tz, &state.deps,
            ))?)
        },
    )
    .await
}

async fn alexa_time_until_next(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    run_intent(
        &state,
        "time-until-next",
        &headers,
        raw,
        |state, window, now, _| {
            Ok(serde_json::to_value(intents::time_until_next(
                window,
                now,
                &state.deps,
            ))?)
        },
    )
    .await
}

async fn alexa_done_for_day(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    run_intent(
        &state,
        "done-for-day",
        &headers,
        raw,
        |state, window, now, validated| {
            let tz = param_tz(state, validated);
            Ok(serde_json::to_value(intents::done_for_day(
                window, now, tz, &state.deps,
            ))?)
        },
    )
    .await
}

async fn alexa_launch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    run_intent(
        &state,
        "launch",
        &headers,
        raw,
        |state, window, now, validated| {
            let tz = param_tz(state, validated);
            Ok(serde_json::to_value(intents::launch_summary(
                window, now, tz, &state.deps,
            ))?)
        },
    )
    .await
}

async fn alexa_morning_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    run_intent(
        &state,
        "morning-summary",
        &headers,
        raw,
        |state, window, now, validated| {
            let params = morning_params(state, now, validated);
            Ok(serde_json::to_value(intents::morning_summary(
                window,
                &params,
                &state.deps,
            ))?)
        },
    )
    .await
}

/// Unauthenticated kiosk variant of the morning summary.
async fn general_morning_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    run_intent(
        &state,
        "morning-summary-general",
        &headers,
        raw,
        |state, window, now, validated| {
            let params = morning_params(state, now, validated);
            Ok(serde_json::to_value(intents::morning_summary(
                window,
                &params,
                &state.deps,
            ))?)
        },
    )
    .await
}

/// Kiosk "next" endpoint: the prioritized event as plain JSON.
async fn next_event(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let window = state.window.read();
    if window.version == 0 {
        return Err(ApiError::Unavailable);
    }
    let now = state.now();
    let next = cal_core::pick_next(&window.events, now, &state.deps.rules);
    Ok(Json(serde_json::json!({
        "meeting": next.as_ref().map(|n| MeetingJson::from(&n.event)),
        "seconds_until_start": next.as_ref().map(|n| n.seconds_until_start),
        "window_version": window.version,
    })))
}

async fn healthz(State(state): State<AppState>) -> Response {
    let snapshot = state.health.snapshot(state.now());
    let status = match snapshot.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(snapshot)).into_response()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/alexa/next-meeting", get(alexa_next_meeting))
        .route("/api/alexa/time-until-next", get(alexa_time_until_next))
        .route("/api/alexa/done-for-day", get(alexa_done_for_day))
        .route("/api/alexa/launch", get(alexa_launch))
        .route("/api/alexa/morning-summary", get(alexa_morning_summary))
        .route("/api/morning-summary", get(general_morning_summary))
        .route("/api/next", get(next_event))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
