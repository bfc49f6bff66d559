//! Bridge errors
//!
//! Any error aborts the whole conversion. By the time a `BridgeError` reaches
//! the caller the guest stack is back at its pre-call depth and every
//! intermediate allocation has been released.

use stackbridge_core::{GuestError, GuestType};

/// What a conversion budget counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationUnit {
    /// Arena bytes (ITR nodes and copied strings)
    Bytes,
    /// Nodes: ITR nodes when extracting, tables plus entries when pushing
    Nodes,
}

impl std::fmt::Display for AllocationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationUnit::Bytes => f.write_str("bytes"),
            AllocationUnit::Nodes => f.write_str("nodes"),
        }
    }
}

/// Error during marshalling between host and guest
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Host value kind with no guest representation (function, channel, ...)
    UnsupportedHostType(String),
    /// Guest value kind with no host representation (function, userdata, ...)
    UnsupportedGuestType(GuestType),
    /// A value contains itself (host `Shared` cycle or guest table cycle)
    CyclicStructure,
    /// Conversion budget exhausted
    AllocationFailure {
        unit: AllocationUnit,
        requested: usize,
        limit: usize,
    },
    /// Nesting went deeper than the configured maximum
    DepthLimitExceeded(usize),
    /// Map key the guest cannot use as a table key (nil or NaN)
    InvalidTableKey(String),
    /// Integer that does not survive conversion to a guest number
    InexactInteger(i128),
    /// Guest string that is not valid UTF-8
    NonUtf8String,
    /// Error raised by the guest runtime
    Guest(GuestError),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::UnsupportedHostType(kind) => {
                write!(f, "unsupported host type: {}", kind)
            }
            BridgeError::UnsupportedGuestType(ty) => {
                write!(f, "unsupported guest type: {}", ty)
            }
            BridgeError::CyclicStructure => write!(f, "cyclic structure cannot be converted"),
            BridgeError::AllocationFailure {
                unit,
                requested,
                limit,
            } => write!(
                f,
                "conversion arena exhausted: {} more {} requested, limit is {}",
                requested, unit, limit
            ),
            BridgeError::DepthLimitExceeded(limit) => {
                write!(f, "nesting exceeds maximum depth of {}", limit)
            }
            BridgeError::InvalidTableKey(key) => write!(f, "invalid table key: {}", key),
            BridgeError::InexactInteger(v) => {
                write!(f, "integer {} cannot be represented exactly as a guest number", v)
            }
            BridgeError::NonUtf8String => write!(f, "guest string is not valid UTF-8"),
            BridgeError::Guest(e) => write!(f, "guest error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Guest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GuestError> for BridgeError {
    fn from(e: GuestError) -> Self {
        BridgeError::Guest(e)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
