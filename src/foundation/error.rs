/// Convenience result type used across the compositing engine.
pub type SortlastResult<T> = Result<T, SortlastError>;

/// Top-level error taxonomy used by engine APIs.
///
/// Any error returned from a collective operation means the frame is
/// compromised on every rank; the session itself stays usable.
#[derive(thiserror::Error, Debug)]
pub enum SortlastError {
    /// Internal invariant violated (mismatched masks, corrupt images, ...).
    #[error("sanity check failed: {0}")]
    SanityCheck(String),

    /// Operation not allowed in the current state or configuration.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Argument out of range or inconsistent with other arguments.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Unknown or unsupported enumerated choice.
    #[error("invalid enum: {0}")]
    InvalidEnum(String),

    /// Value could not be converted to the requested representation.
    #[error("bad cast: {0}")]
    BadCast(String),

    /// A buffer could not be sized for the requested frame.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Transport failure reported by a communicator.
    #[error("communication error: {0}")]
    Communication(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SortlastError {
    /// Build a [`SortlastError::SanityCheck`] value.
    pub fn sanity(msg: impl Into<String>) -> Self {
        Self::SanityCheck(msg.into())
    }

    /// Build a [`SortlastError::InvalidOperation`] value.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Build a [`SortlastError::InvalidValue`] value.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Build a [`SortlastError::InvalidEnum`] value.
    pub fn invalid_enum(msg: impl Into<String>) -> Self {
        Self::InvalidEnum(msg.into())
    }

    /// Build a [`SortlastError::BadCast`] value.
    pub fn bad_cast(msg: impl Into<String>) -> Self {
        Self::BadCast(msg.into())
    }

    /// Build a [`SortlastError::OutOfMemory`] value.
    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::OutOfMemory(msg.into())
    }

    /// Build a [`SortlastError::Communication`] value.
    pub fn communication(msg: impl Into<String>) -> Self {
        Self::Communication(msg.into())
    }

    /// True for errors that indicate an engine bug rather than caller misuse.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SanityCheck(_))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
