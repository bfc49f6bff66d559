//! stackbridge: value marshalling between a host and an embedded
//! stack-based scripting runtime
//!
//! The guest exposes its values through a shared evaluation stack
//! (`stackbridge_core::GuestStack`). This crate converts arbitrary nested
//! host values into guest values and guest tables back into host values.
//! Host and guest never share a collector: guest tables stay owned by the
//! guest, and everything the host allocates while reading them is owned by
//! a per-call `ConversionScope`.
//!
//! ```text
//! HostValue ──push──→ guest stack ──(guest call)──→ guest stack ──extract──→ HostValue
//!                                                        │
//!                                             table walk → ITR → HostMap
//! ```
//!
//! # Modules
//!
//! - `host`: `HostValue`, `HostMap`, `Record`, `Opaque`
//! - `pusher`: host → guest
//! - `extractor`: guest → host
//! - `itr`: intermediate table representation and the table walk
//! - `ownership`: conversion scopes and the allocation ledger
//! - `config`: `BridgeConfig` and TOML loading
//! - `bridge`: the `Bridge` facade

pub mod bridge;
pub mod config;
pub mod error;
pub mod extractor;
pub mod host;
pub mod itr;
pub mod ownership;
pub mod pusher;

pub use bridge::Bridge;
pub use config::{BridgeConfig, ConfigError, IntegerPolicy, NumberMode, SequenceBase};
pub use error::{AllocationUnit, BridgeError, Result};
pub use extractor::{extract, extract_returns};
pub use host::{Field, HostMap, HostValue, Opaque, OpaqueKind, Record, ScalarKey, Shared};
pub use ownership::{ConversionScope, OwnershipStats, ownership_stats, reset_ownership_stats};
pub use pusher::{push, push_all};

// Guest side, re-exported so embedders need a single dependency
pub use stackbridge_core::{GuestError, GuestStack, GuestType, Vm};
