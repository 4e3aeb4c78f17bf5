//! Error taxonomy for scheduler tasks.
//!
//! Everything here is contained within the task that raised it — the loop
//! logs and moves on, and the task retries on its next natural tick. The
//! only error that stops the process is a configuration error at startup,
//! which lives in `config::ConfigError`.

use thiserror::Error;

use crate::alerts::AlertError;
use crate::analysis::AnalysisError;
use crate::db::DbError;
use crate::push::PushError;

/// A failure raised by a single scheduler task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Store connectivity or query failure. Retried next natural tick.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// The analysis invoker failed outright (both structured and fallback
    /// calls). The gated timer is not advanced so the next tick retries.
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Alert lifecycle violation — a bug or concurrent writer, not a
    /// transient condition.
    #[error("alert lifecycle error: {0}")]
    Lifecycle(#[from] AlertError),

    /// Delivery transport failure at the task level. Individual send
    /// failures are handled inline; this surfaces only unexpected ones.
    #[error("delivery error: {0}")]
    Delivery(#[from] PushError),
}

impl TaskError {
    /// Whether the next natural tick can be expected to clear this error
    /// without operator intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Store(_) | TaskError::Analysis(_) | TaskError::Delivery(_) => true,
            TaskError::Lifecycle(e) => !matches!(e, AlertError::IllegalTransition { .. }),
        }
    }
}
