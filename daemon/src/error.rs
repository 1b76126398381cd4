/// Errors raised by the audio-session and window-system collaborators.
///
/// Every variant is transient from the reconciliation loop's point of view:
/// the failing call is logged and retried on a later tick.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// An OS call failed (COM/Win32). `context` names the call that failed.
    #[error("{context}: {message}")]
    Os { context: &'static str, message: String },

    /// The process owns no audio session in the current enumeration
    /// (usually because it just exited).
    #[error("no audio session for pid {0}")]
    SessionNotFound(u32),

    /// The backend is not available on this platform.
    #[error("{0} is only supported on Windows")]
    Unsupported(&'static str),
}

impl BackendError {
    pub fn os(context: &'static str, err: impl std::fmt::Display) -> Self {
        BackendError::Os {
            context,
            message: err.to_string(),
        }
    }
}
