// assistant: The chime calendar voice assistant service.
//
// Wires the crates together: fetch ICS sources on a schedule, run them
// through the processing pipelines, publish the event window, precompute
// voice answers, and serve the voice/kiosk HTTP API.

pub mod config;
pub mod fetch;
pub mod handlers;
pub mod health;
pub mod http_client;
pub mod pipeline;
pub mod precompute;
pub mod refresh;
pub mod response_cache;
pub mod skipped;
pub mod state;
pub mod window;

pub use state::AppState;
