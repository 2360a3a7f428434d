// Shared helpers for the service's unit tests.
pub mod env;
pub mod http_test;

use crate::config::CounterConfig;

/// Configuration pointing every upstream at one local fake server.
pub fn local_config(base_url: &str) -> CounterConfig {
    CounterConfig {
        api_url: base_url.to_string(),
        doppler_url: base_url.to_string(),
        uaa_url: base_url.to_string(),
        client_id: "cf".to_string(),
        client_secret: "shh".to_string(),
        username: "admin".to_string(),
        password: "admin-pass".to_string(),
        message_prefix: "TEST".to_string(),
        metrics_bind: None,
        skip_tls_verify: false,
        auth_backoff_initial_ms: 1,
        auth_backoff_max_ms: 5,
        progress_every: 0,
        envelope_buffer: 8,
        request_timeout_ms: 200,
    }
}
