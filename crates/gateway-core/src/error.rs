/// Errors that cross the `gateway-core` boundary.
///
/// Everything else in spec §7's taxonomy (classes 2-4: soft per-subquery
/// failures, retryable transport statuses, deadline exceeded) never reaches
/// this type — those are captured as warnings on the composite response
/// instead. Only class 1 (caller input) and class 5 (invariant violations)
/// abort a request outright.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    CallerInput(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub fn caller_input(msg: impl Into<String>) -> Error {
        Error::CallerInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Error {
        Error::Internal(msg.into())
    }

    /// Whether this should be rendered as a 4xx (caller's fault) or a 5xx
    /// (ours). `gateway-server` uses this to pick a status code without
    /// matching on the variant itself.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Error::CallerInput(_))
    }
}
