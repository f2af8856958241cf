use thiserror::Error;

/// Failure of a call against the upstream provider.
///
/// These never cross the service boundary raw; callers decide whether to
/// retry, fall back to the local store, or surface a [`CoreError::Upstream`].
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("upstream timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("upstream http error: status {status}, body: {body}")]
    Http { status: u16, body: String },

    #[error("upstream response parse error: {0}")]
    Parse(String),

    #[error("breaker open for operation '{operation}'")]
    BreakerOpen { operation: String },

    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout { .. } => "timeout",
            UpstreamError::Http { .. } => "http",
            UpstreamError::Parse(_) => "parse",
            UpstreamError::BreakerOpen { .. } => "breaker_open",
            UpstreamError::Transport(_) => "transport",
        }
    }

    /// Timeouts, transport failures and 5xx responses may be retried for
    /// idempotent reads; 4xx and parse failures are deterministic.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout { .. } | UpstreamError::Transport(_) => true,
            UpstreamError::Http { status, .. } => *status >= 500,
            UpstreamError::Parse(_) | UpstreamError::BreakerOpen { .. } => false,
        }
    }
}

/// The tagged error every public service method returns.
///
/// The routing layer owns the mapping to HTTP statuses; nothing in the core
/// inspects transport details.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },
}

impl CoreError {
    /// Wrap an unexpected failure with a correlation id and log it.
    pub fn internal(message: impl Into<String>) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let message = message.into();
        tracing::error!(correlation_id, %message, "internal error");
        CoreError::Internal {
            correlation_id,
            message,
        }
    }

    /// An invariant violation is an internal error that additionally raises
    /// a structured alert for operators.
    pub fn invariant(message: impl Into<String>) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let message = message.into();
        tracing::error!(correlation_id, %message, alert = true, "invariant violation");
        CoreError::Internal {
            correlation_id,
            message,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Auth(_) => "auth",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Upstream(_) => "upstream",
            CoreError::Internal { .. } => "internal",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
