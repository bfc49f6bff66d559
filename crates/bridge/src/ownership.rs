//! Ownership transfer layer
//!
//! Guest tables belong to the guest heap and its collector; the bridge only
//! pushes and pops stack slots. Everything the host side allocates while
//! reading a guest table (ITR nodes and string buffers) belongs to a
//! `ConversionScope`, which lives for exactly one extraction:
//!
//! ```text
//! extract()
//!   └─ ConversionScope::new()        bump arena + budget
//!        ├─ charge_node / copy_buffer   allocate, count
//!        ├─ note_node_release / release_buffer   count each release once
//!        └─ drop                     free the arena in bulk, reclaim leftovers
//! ```
//!
//! The arena is never freed piecemeal. Releases are bookkeeping that lets
//! tests prove every node and buffer was accounted for; the memory itself
//! goes back in one step when the scope drops. Whatever a scope still holds
//! at that point was never released explicitly. It is settled in bulk and
//! recorded in the `*_reclaimed` counters, which stay at zero after a
//! successful extraction.
//!
//! A scope carries two budgets: bytes (`arena_limit`) and a count of nodes
//! (`max_nodes`). The node count bounds the work of walking guest tables
//! that share subtables, which are converted once per path.
//!
//! # Ledger
//!
//! Each thread keeps an `OwnershipStats` ledger. It is thread-local because
//! an evaluation context (and therefore every scope) is confined to one
//! thread, so tests running in parallel never see each other's counts.

use crate::error::{AllocationUnit, BridgeError, Result};
use bumpalo::Bump;
use std::cell::Cell;
use tracing::trace;

/// Counters for every allocation made by conversion scopes on this thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnershipStats {
    pub scopes_opened: u64,
    pub scopes_closed: u64,
    pub nodes_allocated: u64,
    pub nodes_released: u64,
    pub buffers_allocated: u64,
    pub buffers_released: u64,
    pub bytes_allocated: u64,
    pub bytes_released: u64,
    /// Part of `nodes_released` settled by a scope drop rather than released
    pub nodes_reclaimed: u64,
    pub buffers_reclaimed: u64,
    pub bytes_reclaimed: u64,
}

impl OwnershipStats {
    /// Nodes allocated but not yet released
    pub fn outstanding_nodes(&self) -> u64 {
        self.nodes_allocated - self.nodes_released
    }

    pub fn outstanding_buffers(&self) -> u64 {
        self.buffers_allocated - self.buffers_released
    }

    /// True when every scope has closed and everything it allocated was released
    pub fn is_balanced(&self) -> bool {
        self.scopes_opened == self.scopes_closed
            && self.nodes_allocated == self.nodes_released
            && self.buffers_allocated == self.buffers_released
            && self.bytes_allocated == self.bytes_released
    }

    /// True when nothing had to be reclaimed by a scope drop
    pub fn fully_released(&self) -> bool {
        self.nodes_reclaimed == 0 && self.buffers_reclaimed == 0 && self.bytes_reclaimed == 0
    }
}

thread_local! {
    static LEDGER: Cell<OwnershipStats> = Cell::new(OwnershipStats::default());
}

fn record(update: impl FnOnce(&mut OwnershipStats)) {
    LEDGER.with(|ledger| {
        let mut stats = ledger.get();
        update(&mut stats);
        ledger.set(stats);
    });
}

/// Snapshot of this thread's ledger
pub fn ownership_stats() -> OwnershipStats {
    LEDGER.with(Cell::get)
}

/// Zero this thread's ledger
pub fn reset_ownership_stats() {
    LEDGER.with(|ledger| ledger.set(OwnershipStats::default()));
}

/// Owner of every host-side allocation made during one extraction
pub struct ConversionScope {
    arena: Bump,
    limit: Option<usize>,
    charged: Cell<usize>,
    node_limit: Option<usize>,
    nodes_charged: Cell<usize>,
    live_nodes: Cell<u64>,
    live_buffers: Cell<u64>,
    live_bytes: Cell<u64>,
}

impl ConversionScope {
    /// Open a scope, optionally capping the bytes it may allocate
    pub fn new(limit: Option<usize>) -> Self {
        record(|s| s.scopes_opened += 1);
        trace!(?limit, "conversion scope opened");
        ConversionScope {
            arena: Bump::new(),
            limit,
            charged: Cell::new(0),
            node_limit: None,
            nodes_charged: Cell::new(0),
            live_nodes: Cell::new(0),
            live_buffers: Cell::new(0),
            live_bytes: Cell::new(0),
        }
    }

    /// Cap the number of nodes this scope may charge (builder pattern)
    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = Some(limit);
        self
    }

    pub fn arena(&self) -> &Bump {
        &self.arena
    }

    /// Bytes charged against the budget so far
    pub fn charged(&self) -> usize {
        self.charged.get()
    }

    pub fn live_nodes(&self) -> u64 {
        self.live_nodes.get()
    }

    pub fn live_buffers(&self) -> u64 {
        self.live_buffers.get()
    }

    fn charge(&self, bytes: usize) -> Result<()> {
        let total = self.charged.get().saturating_add(bytes);
        match self.limit {
            Some(limit) if total > limit => {
                return Err(BridgeError::AllocationFailure {
                    unit: AllocationUnit::Bytes,
                    requested: bytes,
                    limit,
                });
            }
            _ => {}
        }
        self.charged.set(total);
        Ok(())
    }

    /// Account for one ITR node of `bytes` bytes
    pub fn charge_node(&self, bytes: usize) -> Result<()> {
        let count = self.nodes_charged.get() + 1;
        match self.node_limit {
            Some(limit) if count > limit => {
                return Err(BridgeError::AllocationFailure {
                    unit: AllocationUnit::Nodes,
                    requested: 1,
                    limit,
                });
            }
            _ => {}
        }
        self.charge(bytes)?;
        self.nodes_charged.set(count);
        self.live_nodes.set(self.live_nodes.get() + 1);
        record(|s| s.nodes_allocated += 1);
        Ok(())
    }

    pub fn note_node_release(&self) {
        self.live_nodes.set(self.live_nodes.get() - 1);
        record(|s| s.nodes_released += 1);
    }

    /// Copy guest bytes into a host-owned buffer in this scope's arena
    pub fn copy_buffer<'s>(&'s self, bytes: &[u8]) -> Result<&'s [u8]> {
        self.charge(bytes.len())?;
        let buffer = self.arena.alloc_slice_copy(bytes);
        let len = bytes.len() as u64;
        self.live_buffers.set(self.live_buffers.get() + 1);
        self.live_bytes.set(self.live_bytes.get() + len);
        record(|s| {
            s.buffers_allocated += 1;
            s.bytes_allocated += len;
        });
        Ok(buffer)
    }

    /// Account for the release of a buffer of `len` bytes
    pub fn release_buffer(&self, len: usize) {
        let len = len as u64;
        self.live_buffers.set(self.live_buffers.get() - 1);
        self.live_bytes.set(self.live_bytes.get() - len);
        record(|s| {
            s.buffers_released += 1;
            s.bytes_released += len;
        });
    }
}

impl Drop for ConversionScope {
    fn drop(&mut self) {
        let nodes = self.live_nodes.get();
        let buffers = self.live_buffers.get();
        let bytes = self.live_bytes.get();
        if nodes > 0 || buffers > 0 {
            trace!(nodes, buffers, "reclaiming unreleased allocations in bulk");
        }
        record(|s| {
            s.nodes_released += nodes;
            s.buffers_released += buffers;
            s.bytes_released += bytes;
            s.nodes_reclaimed += nodes;
            s.buffers_reclaimed += buffers;
            s.bytes_reclaimed += bytes;
            s.scopes_closed += 1;
        });
        trace!(
            charged = self.charged.get(),
            arena_bytes = self.arena.allocated_bytes(),
            "conversion scope closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_balances_on_drop() {
        reset_ownership_stats();
        {
            let scope = ConversionScope::new(None);
            scope.charge_node(32).unwrap();
            let buf = scope.copy_buffer(b"hello").unwrap();
            assert_eq!(buf, b"hello");
            let stats = ownership_stats();
            assert_eq!(stats.outstanding_nodes(), 1);
            assert_eq!(stats.outstanding_buffers(), 1);
            assert!(!stats.is_balanced());
        }
        let stats = ownership_stats();
        assert!(stats.is_balanced());
        assert_eq!(stats.bytes_allocated, 5);
        assert_eq!(stats.nodes_reclaimed, 1);
        assert_eq!(stats.buffers_reclaimed, 1);
        assert_eq!(stats.bytes_reclaimed, 5);
        assert!(!stats.fully_released());
    }

    #[test]
    fn test_explicit_releases() {
        reset_ownership_stats();
        let scope = ConversionScope::new(None);
        scope.charge_node(16).unwrap();
        scope.copy_buffer(b"abc").unwrap();
        scope.release_buffer(3);
        scope.note_node_release();
        assert_eq!(scope.live_nodes(), 0);
        assert_eq!(scope.live_buffers(), 0);
        drop(scope);
        let stats = ownership_stats();
        assert!(stats.is_balanced());
        assert_eq!(stats.nodes_released, 1);
        assert!(stats.fully_released());
    }

    #[test]
    fn test_budget() {
        let scope = ConversionScope::new(Some(10));
        scope.copy_buffer(b"12345678").unwrap();
        assert_eq!(
            scope.copy_buffer(b"abc"),
            Err(BridgeError::AllocationFailure {
                unit: AllocationUnit::Bytes,
                requested: 3,
                limit: 10
            })
        );
        assert_eq!(scope.charged(), 8);
        assert_eq!(scope.live_buffers(), 1);
    }

    #[test]
    fn test_node_limit() {
        let scope = ConversionScope::new(None).with_node_limit(2);
        scope.charge_node(16).unwrap();
        scope.charge_node(16).unwrap();
        assert_eq!(
            scope.charge_node(16),
            Err(BridgeError::AllocationFailure {
                unit: AllocationUnit::Nodes,
                requested: 1,
                limit: 2
            })
        );
        assert_eq!(scope.live_nodes(), 2);
        assert_eq!(scope.charged(), 32);

        // released nodes still count against the limit
        scope.note_node_release();
        assert!(scope.charge_node(16).is_err());
    }
}
