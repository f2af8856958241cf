use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Process configuration, resolved once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub upstream_base_url: String,
    pub upstream_token: String,
    pub upstream_session: String,

    pub cache_default_ttl: Duration,
    pub cache_sweep_interval: Duration,

    pub matcher_tick: Duration,
    pub matcher_pending_ttl: Duration,

    pub live_tick: Duration,
    pub live_subscriber_buffer: usize,
    pub live_shutdown_grace: Duration,

    pub breaker_fails: u32,
    pub breaker_window: Duration,
    pub breaker_cooldown: Duration,

    pub auth_secret: String,
    pub token_ttl: Duration,

    pub upstream_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// Secrets (`UPSTREAM_TOKEN`, `UPSTREAM_SESSION`, `AUTH_SECRET`) also
    /// accept a `*_FILE` variant pointing at a file containing the value.
    /// The `_FILE` form is preferred in containers — the secret never shows
    /// up in `env` output.
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            upstream_base_url: std::env::var("UPSTREAM_BASE_URL")
                .context("UPSTREAM_BASE_URL not set")?,
            upstream_token: secret("UPSTREAM_TOKEN")?,
            upstream_session: secret("UPSTREAM_SESSION")?,

            cache_default_ttl: ms("CACHE_DEFAULT_TTL_MS", 30_000)?,
            cache_sweep_interval: Duration::from_secs(30),

            matcher_tick: ms("MATCHER_TICK_MS", 1_000)?,
            matcher_pending_ttl: ms("MATCHER_PENDING_TTL_MS", 900_000)?,

            live_tick: ms("LIVE_TICK_MS", 3_000)?,
            live_subscriber_buffer: int("LIVE_SUBSCRIBER_BUFFER", 4)? as usize,
            live_shutdown_grace: Duration::from_secs(2),

            breaker_fails: int("BREAKER_FAILS", 5)? as u32,
            breaker_window: ms("BREAKER_WINDOW_MS", 60_000)?,
            breaker_cooldown: ms("BREAKER_COOLDOWN_MS", 30_000)?,

            auth_secret: secret("AUTH_SECRET")?,
            token_ttl: ms("TOKEN_TTL_MS", 86_400_000)?,

            upstream_timeout: ms("UPSTREAM_TIMEOUT_MS", 10_000)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// A config suitable for tests: localhost upstream, fast ticks.
    pub fn for_tests() -> Self {
        Config {
            upstream_base_url: "http://127.0.0.1:0".to_string(),
            upstream_token: "test-token".to_string(),
            upstream_session: "test-session".to_string(),
            cache_default_ttl: Duration::from_millis(30_000),
            cache_sweep_interval: Duration::from_secs(30),
            matcher_tick: Duration::from_millis(50),
            matcher_pending_ttl: Duration::from_millis(900_000),
            live_tick: Duration::from_millis(50),
            live_subscriber_buffer: 4,
            live_shutdown_grace: Duration::from_secs(2),
            breaker_fails: 5,
            breaker_window: Duration::from_secs(60),
            breaker_cooldown: Duration::from_secs(30),
            auth_secret: "test-secret".to_string(),
            token_ttl: Duration::from_millis(86_400_000),
            upstream_timeout: Duration::from_secs(10),
            log_level: "debug".to_string(),
        }
    }
}

/// Resolve a secret: `NAME` env var first, then `NAME_FILE`.
fn secret(name: &str) -> Result<String> {
    if let Ok(value) = std::env::var(name) {
        return Ok(value);
    }
    let file_var = format!("{name}_FILE");
    if let Ok(path) = std::env::var(&file_var) {
        let value = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {file_var} from {path}"))?;
        return Ok(value.trim().to_string());
    }
    bail!("{name} not configured. Set {name} or {name}_FILE.")
}

fn int(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{name} must be an integer, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn ms(name: &str, default: u64) -> Result<Duration> {
    let value = int(name, default as i64)?;
    if value < 0 {
        bail!("{name} must be non-negative, got {value}");
    }
    Ok(Duration::from_millis(value as u64))
}
