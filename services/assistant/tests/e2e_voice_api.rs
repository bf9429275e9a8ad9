//! End-to-end voice API suite.
//!
//! Stands up a wiremock ICS source, runs one real refresh cycle, serves
//! the router on a random port, and exercises the HTTP surface the way a
//! voice skill or kiosk would.
//!
//! # Scenarios
//! 1. Authenticated next-meeting returns speech + payload.
//! 2. Precomputed parameter-free requests answer in single-digit millis.
//! 3. Auth failures are 401 with a terse body.
//! 4. Bad parameters are 400 naming the field.
//! 5. Health endpoint reflects refresh state.
//! 6. RECURRENCE-ID override is visible end-to-end.

use assistant::fetch::FetchOrchestrator;
use assistant::refresh::RefreshScheduler;
use assistant::state::AppState;
use chime_test_utils::IcsBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "e2e-bearer-token";

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

async fn start_assistant(feed: String) -> (SocketAddr, AppState) {
    let ics_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .mount(&ics_server)
        .await;
    // The mock must outlive the test; leak it (tests are short-lived).
    let ics_server = Box::leak(Box::new(ics_server));

    let mut vars = HashMap::new();
    vars.insert("ICS_URL".to_owned(), format!("{}/cal.ics", ics_server.uri()));
    vars.insert("ALEXA_BEARER_TOKEN".to_owned(), TOKEN.to_owned());
    vars.insert("TEST_TIME".to_owned(), "2025-11-05T12:00:00Z".to_owned());
    vars.insert("PRODUCTION".to_owned(), "true".to_owned());
    vars.insert("MAX_RETRIES".to_owned(), "0".to_owned());
    let state = AppState::new(assistant::config::load_config_from_vars(&vars).unwrap());

    let fetcher = Arc::new(FetchOrchestrator::new(
        &state.config,
        Arc::clone(&state.http_client),
        Arc::clone(&state.health),
    ));
    let scheduler = RefreshScheduler::new(state.clone(), fetcher, CancellationToken::new());
    scheduler.run_cycle().await;

    let router = assistant::handlers::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server error");
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, state)
}

fn upcoming_feed() -> String {
    IcsBuilder::new()
        .event(&[
            "UID:standup",
            "SUMMARY:Standup",
            "DTSTART:20251105T130000Z",
            "DTEND:20251105T131500Z",
        ])
        .event(&[
            "UID:retro",
            "SUMMARY:Retro",
            "DTSTART:20251105T160000Z",
            "DTEND:20251105T170000Z",
        ])
        .build()
}

async fn get_json(
    client: &reqwest::Client,
    addr: SocketAddr,
    path_and_query: &str,
    token: Option<&str>,
) -> (u16, serde_json::Value) {
    let mut request = client.get(format!("http://{}{}", addr, path_and_query));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.expect("request");
    let status = response.status().as_u16();
    let body = response.json().await.expect("json body");
    (status, body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn next_meeting_returns_speech_and_payload() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, addr, "/api/alexa/next-meeting", Some(TOKEN)).await;
    assert_eq!(status, 200);
    let speech = body["speech_text"].as_str().unwrap();
    assert!(speech.contains("Standup"), "speech was: {}", speech);
    assert_eq!(body["meeting"]["subject"], "Standup");
    assert_eq!(body["seconds_until_start"], 3600);
    assert!(body["ssml"].as_str().unwrap().starts_with("<speak>"));
}

#[tokio::test]
async fn precomputed_next_meeting_is_fast() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    // Warm the connection, then take the best of several tries; the
    // precomputed path does no computation at request time.
    get_json(&client, addr, "/api/alexa/next-meeting", Some(TOKEN)).await;
    let mut best = Duration::from_secs(1);
    for _ in 0..5 {
        let started = Instant::now();
        let (status, _) = get_json(&client, addr, "/api/alexa/next-meeting", Some(TOKEN)).await;
        assert_eq!(status, 200);
        best = best.min(started.elapsed());
    }
    assert!(
        best < Duration::from_millis(10),
        "precomputed answer took {:?}",
        best
    );
}

#[tokio::test]
async fn missing_and_wrong_tokens_are_rejected() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, addr, "/api/alexa/next-meeting", None).await;
    assert_eq!(status, 401);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["message"], "unauthorized");

    let (status, _) = get_json(&client, addr, "/api/alexa/next-meeting", Some("nope")).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn invalid_timezone_is_400_naming_the_field() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        addr,
        "/api/alexa/next-meeting?tz=Not/AZone",
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["details"]["field"], "tz");
}

#[tokio::test]
async fn timezone_parameter_changes_spoken_clock() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    // 13:00 UTC == 8:00 AM New York, 5:00 AM Los Angeles.
    let (_, ny) = get_json(
        &client,
        addr,
        "/api/alexa/next-meeting?tz=America/New_York",
        Some(TOKEN),
    )
    .await;
    let (_, la) = get_json(
        &client,
        addr,
        "/api/alexa/next-meeting?tz=America/Los_Angeles",
        Some(TOKEN),
    )
    .await;
    assert!(ny["speech_text"].as_str().unwrap().contains("8:00 AM"));
    assert!(la["speech_text"].as_str().unwrap().contains("5:00 AM"));
}

#[tokio::test]
async fn recurrence_override_is_visible_end_to_end() {
    let feed = IcsBuilder::new()
        .event(&[
            "UID:M",
            "SUMMARY:Weekly sync",
            "DTSTART:20251103T090000Z",
            "DTEND:20251103T100000Z",
            "RRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=4",
        ])
        .event(&[
            "UID:M",
            "SUMMARY:Weekly sync (moved)",
            "DTSTART:20251110T113000Z",
            "DTEND:20251110T123000Z",
            "RECURRENCE-ID:20251110T090000Z",
        ])
        .build();
    let (_, state) = start_assistant(feed).await;

    let window = state.window.read();
    let starts: Vec<_> = window.events.iter().map(|e| e.start.utc.to_rfc3339()).collect();
    assert!(
        starts.contains(&"2025-11-10T11:30:00+00:00".to_owned()),
        "override missing from {:?}",
        starts
    );
    assert!(
        !starts.contains(&"2025-11-10T09:00:00+00:00".to_owned()),
        "overridden occurrence leaked into {:?}",
        starts
    );
}

#[tokio::test]
async fn healthz_reports_ok_after_refresh() {
    let (addr, state) = start_assistant(upcoming_feed()).await;
    state.health.record_heartbeat(state.now());
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, addr, "/healthz", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["event_count"], 2);
    assert!(body["last_success"].is_string());
}

#[tokio::test]
async fn kiosk_next_endpoint_needs_no_auth() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, addr, "/api/next", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["meeting"]["subject"], "Standup");
    assert_eq!(body["window_version"], 1);
}

#[tokio::test]
async fn general_morning_summary_is_unauthenticated() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        addr,
        "/api/morning-summary?date=2025-11-05&tz=UTC",
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert!(body["speech_text"].is_string());
    assert!(body["timeframe_start"].is_string());
    assert!(body["density"].is_string());
}

#[tokio::test]
async fn done_for_day_speaks_last_end() {
    let (addr, _state) = start_assistant(upcoming_feed()).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        addr,
        "/api/alexa/done-for-day?tz=UTC",
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, 200);
    // Retro ends 17:00 UTC.
    assert_eq!(body["speech_text"], "You're done for the day at 5:00 PM.");
    assert_eq!(body["timezone"], "UTC");
}
