use thiserror::Error;

/// Error taxonomy for the store and facade surfaces.
///
/// This mirrors the kinds (not names) fixed by the transport error envelope:
/// `NotFound -> 404`, `Invalid* -> 400`, `RateLimited -> 429` (transport-only,
/// never raised by this crate), everything else -> 500. The decision
/// procedure itself never returns an `Err`: a malformed rule or missing
/// segment is contained and surfaces as the flag's default result, not a
/// propagated error (see [`crate::decision`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A targeted flag or segment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A definition write failed schema validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A flag write references a segment id that doesn't exist in the tenant.
    ///
    /// A subclass of [`EngineError::InvalidInput`], kept distinct so callers
    /// can tell referential failures from shape failures.
    #[error("invalid reference: segment {0:?} does not exist in tenant")]
    InvalidReference(String),

    /// The backing store rejected a write.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The backing store rejected an update.
    #[error("update failed: {0}")]
    UpdateFailed(String),

    /// The backing store rejected a delete.
    #[error("delete failed: {0}")]
    DeleteFailed(String),

    /// Unexpected condition not covered by the other variants.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Status-code mapping for transports that want it.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::NotFound(_) => 404,
            EngineError::InvalidInput(_) | EngineError::InvalidReference(_) => 400,
            EngineError::WriteFailed(_)
            | EngineError::UpdateFailed(_)
            | EngineError::DeleteFailed(_)
            | EngineError::Internal(_) => 500,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
