use thiserror::Error;

/// Failure taxonomy for the harvest run.
///
/// `Config` and `Session` surface at startup/bootstrap; `Auth` is terminal
/// for one prefix after re-authentication attempts run out; `Transport`
/// aborts the whole run. Transient non-200 responses never become an error —
/// they are retried in place by the client.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid category tree: {0}")]
    Config(String),

    #[error("session bootstrap failed: {0}")]
    Session(String),

    #[error("authentication rejected after {attempts} attempts (HTTP {status})")]
    Auth { attempts: u32, status: u16 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("csv sink: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Whether this error should stop the entire run instead of just the
    /// current prefix.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Config(_))
    }
}
