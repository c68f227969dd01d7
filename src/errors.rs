use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Error taxonomy for the conversation monitor (see `SPEC_FULL.md` §7).
///
/// Transient adapter failures are wrapped in `Adapter` and reported through
/// the `scan_error` event rather than aborting the monitor; `OpenFailed` and
/// `CloseFailed` are the only variants that ever reach `start`/`stop`
/// callers directly.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("adapter call failed: {0}")]
    Adapter(#[from] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("folder open failed: {0}")]
    OpenFailed(anyhow::Error),

    #[error("folder close failed: {0}")]
    CloseFailed(anyhow::Error),

    #[error("conversation set invariant violated: {0}")]
    Invariant(String),
}

impl MonitorError {
    /// True for errors that should be reported via `scan_error` and not
    /// propagated to the operation queue's caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, MonitorError::Adapter(_))
    }
}
