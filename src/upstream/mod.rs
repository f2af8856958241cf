//! Authenticated request pipeline to the upstream provider: form-encoded
//! operation calls, envelope parsing, canonical normalization, and the
//! TTL-cache/breaker interaction.

pub mod breaker;
pub mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::cache::{TtlCache, cache_key};
use crate::config::Config;
use crate::error::UpstreamError;

pub use breaker::{Breaker, BreakerSnapshot};
pub use registry::{Envelope, Normalizer, OperationSpec};

/// Per-call options. `ttl` overrides the registry row (which itself falls
/// back to the configured default TTL); `timeout` overrides the configured
/// default.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    pub use_cache: bool,
    pub ttl: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl CallOpts {
    pub fn cached() -> Self {
        CallOpts {
            use_cache: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UpstreamStats {
    pub requests: u64,
    pub failures: u64,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    session: String,
    default_timeout: Duration,
    default_cache_ttl: Duration,
    cache: Arc<TtlCache>,
    breaker: Breaker,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl UpstreamClient {
    pub fn new(config: &Config, cache: Arc<TtlCache>) -> Self {
        UpstreamClient {
            http: reqwest::Client::new(),
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            token: config.upstream_token.clone(),
            session: config.upstream_session.clone(),
            default_timeout: config.upstream_timeout,
            default_cache_ttl: config.cache_default_ttl,
            cache,
            breaker: Breaker::new(
                config.breaker_fails,
                config.breaker_window,
                config.breaker_cooldown,
            ),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Perform one upstream operation. Consults the cache first when
    /// `opts.use_cache`; on success the normalized payload is cached with
    /// `opts.ttl`, the registry row's TTL, or the configured default, in
    /// that order. Reports errors as values, never panics, and does not
    /// fall back — degradation is the caller's call.
    pub async fn call(
        &self,
        operation: &str,
        params: &BTreeMap<String, String>,
        opts: CallOpts,
    ) -> Result<Value, UpstreamError> {
        let spec = registry::lookup(operation).ok_or_else(|| {
            UpstreamError::Transport(format!("unknown upstream operation '{operation}'"))
        })?;

        let key = cache_key(operation, params);
        if opts.use_cache {
            if let Some(hit) = self.cache.get(&key) {
                return Ok(hit);
            }
        }

        if self.breaker.is_open(operation) {
            return Err(UpstreamError::BreakerOpen {
                operation: operation.to_string(),
            });
        }

        let result = self.fetch(spec, params, &opts).await;
        match &result {
            Ok(value) => {
                self.breaker.record_success(operation);
                if opts.use_cache {
                    let ttl = opts
                        .ttl
                        .or(spec.cache_ttl)
                        .unwrap_or(self.default_cache_ttl);
                    self.cache.put(&key, value.clone(), ttl);
                }
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.breaker.record_failure(operation);
                tracing::warn!(operation, kind = err.kind(), error = %err, "upstream call failed");
            }
        }
        result
    }

    async fn fetch(
        &self,
        spec: &OperationSpec,
        params: &BTreeMap<String, String>,
        opts: &CallOpts,
    ) -> Result<Value, UpstreamError> {
        let mut form: BTreeMap<&str, &str> = BTreeMap::new();
        for (k, v) in spec.defaults {
            form.insert(k, v);
        }
        for (k, v) in params {
            form.insert(k.as_str(), v.as_str());
        }
        form.insert("operation", spec.name);
        form.insert("agentSite", "1");
        form.insert("RRO", "1");
        form.insert("token", &self.token);
        if !form.contains_key("agentOwner") {
            if let Some(agent_id) = params.get("agentID") {
                form.insert("agentOwner", agent_id.as_str());
            }
        }

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let url = format!("{}/{}", self.base_url, spec.subpath);

        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Cookie", self.session.clone())
            .form(&form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let payload = registry::extract(spec.envelope, &body);
        Ok(registry::normalize(spec.normalizer, payload))
    }

    pub fn stats(&self) -> UpstreamStats {
        UpstreamStats {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub fn breaker_snapshot(&self) -> Vec<BreakerSnapshot> {
        self.breaker.snapshot()
    }
}
