use std::fmt;

/// Deterministic vs. non-deterministic failure distinction matters here:
/// only `IllegalInitArgument` carries `should_cancel = true` back to the
/// initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmgError {
    IllegalInitArgument(String),
    NodeStopping,
}

impl CmgError {
    pub fn should_cancel(&self) -> bool {
        matches!(self, CmgError::IllegalInitArgument(_))
    }
}

impl fmt::Display for CmgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmgError::IllegalInitArgument(msg) => write!(f, "illegal init argument: {}", msg),
            CmgError::NodeStopping => write!(f, "node stopping"),
        }
    }
}

impl std::error::Error for CmgError {}
