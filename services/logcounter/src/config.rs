use anyhow::{Context, Result, anyhow};
use logcounter_core::BackoffPolicy;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

// Log counter configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    // Cloud controller base URL for app name lookups.
    pub api_url: String,
    // Firehose base URL.
    pub doppler_url: String,
    // Identity service (UAA) base URL.
    pub uaa_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    // Prefix every counted test message starts with.
    pub message_prefix: String,
    // Optional Prometheus/health listener.
    pub metrics_bind: Option<SocketAddr>,
    // Accept self-signed certificates on every endpoint.
    pub skip_tls_verify: bool,
    // First delay after a failed token fetch or subscribe.
    pub auth_backoff_initial_ms: u64,
    // Upper bound for the doubling backoff.
    pub auth_backoff_max_ms: u64,
    // Envelopes between progress log lines; 0 disables them.
    pub progress_every: u64,
    // Envelopes buffered between the HTTP stream and the reader task.
    pub envelope_buffer: usize,
    // Deadline for token and app-name requests (not the firehose stream).
    pub request_timeout_ms: u64,
}

const DEFAULT_SKIP_TLS_VERIFY: bool = true;
const DEFAULT_AUTH_BACKOFF_INITIAL_MS: u64 = 100;
const DEFAULT_AUTH_BACKOFF_MAX_MS: u64 = 5000;
const DEFAULT_PROGRESS_EVERY: u64 = 1000;
const DEFAULT_ENVELOPE_BUFFER: usize = 1024;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Default, Deserialize)]
struct CounterConfigOverride {
    api_url: Option<String>,
    doppler_url: Option<String>,
    uaa_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
    message_prefix: Option<String>,
    metrics_bind: Option<String>,
    skip_tls_verify: Option<bool>,
    auth_backoff_initial_ms: Option<u64>,
    auth_backoff_max_ms: Option<u64>,
    progress_every: Option<u64>,
    envelope_buffer: Option<usize>,
    request_timeout_ms: Option<u64>,
}

impl CounterConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = match std::env::var("LOGCOUNTER_METRICS_BIND") {
            Ok(value) => Some(
                value
                    .parse()
                    .with_context(|| "parse LOGCOUNTER_METRICS_BIND")?,
            ),
            Err(_) => None,
        };
        let skip_tls_verify = std::env::var("LOGCOUNTER_SKIP_TLS_VERIFY")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_SKIP_TLS_VERIFY);
        let auth_backoff_initial_ms = std::env::var("LOGCOUNTER_AUTH_BACKOFF_INITIAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_AUTH_BACKOFF_INITIAL_MS);
        let auth_backoff_max_ms = std::env::var("LOGCOUNTER_AUTH_BACKOFF_MAX_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_AUTH_BACKOFF_MAX_MS);
        let progress_every = std::env::var("LOGCOUNTER_PROGRESS_EVERY")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PROGRESS_EVERY);
        let envelope_buffer = std::env::var("LOGCOUNTER_ENVELOPE_BUFFER")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ENVELOPE_BUFFER);
        let request_timeout_ms = std::env::var("LOGCOUNTER_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        Ok(Self {
            api_url: env_or_empty("API_ADDR"),
            doppler_url: env_or_empty("DOPPLER_ADDR"),
            uaa_url: env_or_empty("UAA_ADDR"),
            client_id: env_or_empty("CLIENT_ID"),
            client_secret: env_or_empty("CLIENT_SECRET"),
            username: env_or_empty("CF_USERNAME"),
            password: env_or_empty("CF_PASSWORD"),
            message_prefix: env_or_empty("MESSAGE_PREFIX"),
            metrics_bind,
            skip_tls_verify,
            auth_backoff_initial_ms,
            auth_backoff_max_ms,
            progress_every,
            envelope_buffer,
            request_timeout_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("LOGCOUNTER_CONFIG") {
            // YAML overrides win over the environment.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read LOGCOUNTER_CONFIG: {path}"))?;
            let override_cfg: CounterConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse logcounter config yaml")?;
            config.apply(override_cfg)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, override_cfg: CounterConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.api_url {
            self.api_url = value;
        }
        if let Some(value) = override_cfg.doppler_url {
            self.doppler_url = value;
        }
        if let Some(value) = override_cfg.uaa_url {
            self.uaa_url = value;
        }
        if let Some(value) = override_cfg.client_id {
            self.client_id = value;
        }
        if let Some(value) = override_cfg.client_secret {
            self.client_secret = value;
        }
        if let Some(value) = override_cfg.username {
            self.username = value;
        }
        if let Some(value) = override_cfg.password {
            self.password = value;
        }
        if let Some(value) = override_cfg.message_prefix {
            self.message_prefix = value;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
        }
        if let Some(value) = override_cfg.skip_tls_verify {
            self.skip_tls_verify = value;
        }
        if let Some(value) = override_cfg.auth_backoff_initial_ms {
            self.auth_backoff_initial_ms = value;
        }
        if let Some(value) = override_cfg.auth_backoff_max_ms
            && value > 0
        {
            self.auth_backoff_max_ms = value;
        }
        if let Some(value) = override_cfg.progress_every {
            self.progress_every = value;
        }
        if let Some(value) = override_cfg.envelope_buffer
            && value > 0
        {
            self.envelope_buffer = value;
        }
        if let Some(value) = override_cfg.request_timeout_ms
            && value > 0
        {
            self.request_timeout_ms = value;
        }
        Ok(())
    }

    /// Rejects configurations that cannot reach the upstream services.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("API_ADDR", &self.api_url),
            ("DOPPLER_ADDR", &self.doppler_url),
            ("UAA_ADDR", &self.uaa_url),
        ] {
            if value.is_empty() {
                return Err(anyhow!("{name} must be set"));
            }
        }
        Ok(())
    }

    pub fn auth_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.auth_backoff_initial_ms),
            max: Duration::from_millis(self.auth_backoff_max_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn env_or_empty(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}
