use crate::types::enums::FailureStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("rate limited, reset in {reset_after_secs}s")]
    RateLimited { reset_after_secs: u64 },
    #[error("upstream unavailable: {message}")]
    Upstream { message: String },
    #[error("malformed run listing: {message}")]
    Malformed { message: String },
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("upstream timeout")]
    UpstreamTimeout,
    #[error("upstream rejected request: {message}")]
    UpstreamRejected { message: String },
    #[error("response malformed: {message}")]
    ParseMalformed { message: String },
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("circuit not open, cannot reset (phase: {phase})")]
    NotOpen { phase: String },
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found")]
    NotFound,
    #[error("snapshot not active (status: {status})")]
    NotActive { status: String },
    #[error("capture failed for {path}: {message}")]
    CaptureFailed { path: String, message: String },
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health check not found")]
    NotFound,
    #[error("health check already resolved")]
    AlreadyResolved,
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request not found")]
    NotFound,
    #[error("approval request already resolved (status: {status})")]
    AlreadyResolved { status: String },
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum FailureError {
    #[error("failure not found")]
    NotFound,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: FailureStatus,
        to: FailureStatus,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("store error: {message}")]
    Store { message: String },
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("authentication rejected")]
    AuthRejected,
    #[error("rate limited, reset in {reset_after_secs}s")]
    RateLimited { reset_after_secs: u64 },
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("logs expired for run {run_id}")]
    LogsExpired { run_id: String },
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("timeout")]
    Timeout,
}

impl VcsError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout | Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication rejected")]
    AuthRejected,
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("timeout")]
    Timeout,
    #[error("empty completion")]
    EmptyCompletion,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("authentication rejected")]
    AuthRejected,
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("timeout")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required value: {name}")]
    Missing { name: String },
    #[error("invalid value for {name}: {message}")]
    Invalid { name: String, message: String },
    #[error("unreadable config file {path}: {message}")]
    Unreadable { path: String, message: String },
}

#[derive(Debug, Error)]
pub enum MendError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Failure(#[from] FailureError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {message}")]
    Internal { message: String },
}
