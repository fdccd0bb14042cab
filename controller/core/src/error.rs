use thiserror::Error;

/// Rejects an admission request.
///
/// Every failure is reported as an internal error: plugins only fail when they cannot establish
/// their post-conditions, which is never the client's fault.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Internal error occurred: {0:#}")]
    Internal(anyhow::Error),
}

// === impl AdmissionError ===

impl AdmissionError {
    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        Self::Internal(error.into())
    }

    /// The HTTP status code reported to the API client.
    pub fn code(&self) -> u16 {
        match self {
            Self::Internal(_) => 500,
        }
    }
}
