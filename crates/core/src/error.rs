//! Guest runtime errors
//!
//! Every fallible stack operation reports a `GuestError` instead of panicking,
//! so a host embedding the runtime can unwind a failed conversion and keep the
//! evaluation context usable.

use crate::value::GuestType;

/// Error raised by the guest runtime
#[derive(Debug, Clone, PartialEq)]
pub enum GuestError {
    /// Growing the stack would exceed its depth limit
    StackOverflow {
        depth: usize,
        requested: usize,
        limit: usize,
    },
    /// An operation needed more slots than the current frame holds
    StackUnderflow { needed: usize, available: usize },
    /// Tables cannot be indexed by nil
    NilKey,
    /// Tables cannot be indexed by NaN
    NanKey,
    /// The key handed to `next` is not present in the table
    InvalidNextKey,
    /// A table operation was applied to a non-table value
    NotATable(GuestType),
    /// A call was attempted on a non-function value
    NotCallable(GuestType),
    /// Nested calls went deeper than the runtime allows
    CallDepthExceeded(usize),
    /// A table handle outlived the table it referred to
    DanglingTable,
    /// Error raised by native code running inside the guest
    Runtime(String),
}

impl std::fmt::Display for GuestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuestError::StackOverflow {
                depth,
                requested,
                limit,
            } => write!(
                f,
                "stack overflow: depth {} + {} exceeds limit {}",
                depth, requested, limit
            ),
            GuestError::StackUnderflow { needed, available } => write!(
                f,
                "stack underflow: needed {} slots, frame has {}",
                needed, available
            ),
            GuestError::NilKey => write!(f, "table index is nil"),
            GuestError::NanKey => write!(f, "table index is NaN"),
            GuestError::InvalidNextKey => write!(f, "invalid key to 'next'"),
            GuestError::NotATable(t) => write!(f, "attempt to index a {} value", t),
            GuestError::NotCallable(t) => write!(f, "attempt to call a {} value", t),
            GuestError::CallDepthExceeded(limit) => {
                write!(f, "call depth exceeded limit of {}", limit)
            }
            GuestError::DanglingTable => write!(f, "table handle refers to a collected table"),
            GuestError::Runtime(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for GuestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_guest_wording() {
        assert_eq!(GuestError::NilKey.to_string(), "table index is nil");
        assert_eq!(
            GuestError::NotATable(GuestType::Number).to_string(),
            "attempt to index a number value"
        );
        assert_eq!(
            GuestError::InvalidNextKey.to_string(),
            "invalid key to 'next'"
        );
    }
}
