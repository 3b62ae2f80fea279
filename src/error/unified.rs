//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    /// The backend rate limit resets after a few minutes.
    WaitForRateLimit,
    SignInAgain,
    CheckConfiguration,
    ContactSupport,
}

impl RecoverySuggestion {
    /// One-line hint for the user.
    pub fn hint(self) -> &'static str {
        match self {
            Self::RetryWithBackoff => "the backend could not be reached; try again in a moment",
            Self::WaitForRateLimit => "X is rate limiting this account; wait a few minutes and retry",
            Self::SignInAgain => "run `ibtikar auth login` to sign in",
            Self::CheckConfiguration => "check the backend URL and config file",
            Self::ContactSupport => "if this keeps happening, report it with IBTIKAR_LOG=debug output",
        }
    }
}
