//! stackbridge core: the guest side of the bridge
//!
//! This crate defines the stack API a host bridge needs from an embedded
//! stack-based scripting runtime, and a small reference runtime that
//! implements it.
//!
//! Key design principles:
//! - GuestValue: what the guest talks about (nil, boolean, number, string, table, ...)
//! - EvalStack: contiguous array of values shared by host and guest
//! - Heap: guest-owned tables behind generation-checked handles
//!
//! # Modules
//!
//! - `api`: the `GuestStack` trait and stack dump helper
//! - `error`: guest runtime errors
//! - `heap`: table heap and mark-sweep collector
//! - `stack`: evaluation stack with a depth limit
//! - `table`: guest table semantics (keys, `next` enumeration)
//! - `value`: `GuestValue` and `GuestType`
//! - `vm`: the reference runtime

pub mod api;
pub mod error;
pub mod heap;
pub mod stack;
pub mod table;
pub mod value;
pub mod vm;

pub use api::{GuestStack, MULTRET, dump_stack};
pub use error::GuestError;
pub use heap::{Heap, HeapStats, TableRef};
pub use stack::{DEFAULT_STACK_LIMIT, EvalStack};
pub use table::{Table, TableKey};
pub use value::{GuestType, GuestValue, NativeFn, NativeFunction};
pub use vm::{DEFAULT_MAX_CALL_DEPTH, Vm};
