//! Intermediate table representation (ITR) and the table walk
//!
//! Reading a guest table happens in two passes. The walk drives the guest's
//! `next` protocol and records every entry as a node in a doubly linked
//! list; the Extractor then turns the list into host values. Splitting the
//! passes keeps the guest iteration loop free of host allocation failures
//! other than the arena budget, and lets the walk finish the guest iteration
//! even when an entry cannot be converted.
//!
//! ```text
//! head                                   sentinel
//!  ┌───────────┐    ┌───────────┐    ┌───────────┐
//!  │ Populated │ ─→ │ Populated │ ─→ │   Empty   │
//!  │ key,value │ ←─ │ key,value │ ←─ │           │
//!  └───────────┘    └───────────┘    └───────────┘
//! ```
//!
//! Every step allocates the next (empty) node before populating the current
//! one, so a finished list always ends in an empty sentinel, even for an
//! empty table. The sentinel is released but never read as data.
//!
//! Nodes live in the `ConversionScope` arena and are addressed by `NodeId`.
//! Each node moves to `Released` exactly once.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::ownership::ConversionScope;
use bumpalo::collections::Vec as BumpVec;
use stackbridge_core::{GuestStack, GuestType};
use tracing::trace;

/// Handle to a node in an `Itr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One classified key or value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Datum<'s> {
    Boolean(bool),
    Number(f64),
    /// Host-owned copy of a guest string
    String(&'s [u8]),
    /// Head of the nested list for a guest table
    Table(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Empty,
    Populated,
    Released,
}

#[derive(Debug)]
pub struct Node<'s> {
    entry: Option<(Datum<'s>, Datum<'s>)>,
    previous: Option<NodeId>,
    next: Option<NodeId>,
    state: NodeState,
}

impl<'s> Node<'s> {
    /// Key and value, present once the node is populated
    pub fn entry(&self) -> Option<(Datum<'s>, Datum<'s>)> {
        self.entry
    }

    pub fn previous(&self) -> Option<NodeId> {
        self.previous
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    pub fn state(&self) -> NodeState {
        self.state
    }
}

/// Node storage for one extraction
pub struct Itr<'s> {
    scope: &'s ConversionScope,
    nodes: BumpVec<'s, Node<'s>>,
}

impl<'s> Itr<'s> {
    pub fn new(scope: &'s ConversionScope) -> Self {
        Itr {
            scope,
            nodes: BumpVec::new_in(scope.arena()),
        }
    }

    pub fn scope(&self) -> &'s ConversionScope {
        self.scope
    }

    /// Number of nodes allocated so far (all lists)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node<'s> {
        &self.nodes[id.index()]
    }

    /// Allocate an empty node and link it after `previous`
    pub fn alloc_node(&mut self, previous: Option<NodeId>) -> Result<NodeId> {
        self.scope.charge_node(std::mem::size_of::<Node<'s>>())?;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            entry: None,
            previous,
            next: None,
            state: NodeState::Empty,
        });
        if let Some(prev) = previous {
            self.nodes[prev.index()].next = Some(id);
        }
        Ok(id)
    }

    pub fn populate(&mut self, id: NodeId, key: Datum<'s>, value: Datum<'s>) {
        let node = &mut self.nodes[id.index()];
        debug_assert_eq!(node.state, NodeState::Empty);
        node.entry = Some((key, value));
        node.state = NodeState::Populated;
    }

    /// Release a node and the string buffers it owns.
    ///
    /// Returns `false` if the node was already released. Nested lists are
    /// released separately, by whoever consumes them.
    pub fn release(&mut self, id: NodeId) -> bool {
        let scope = self.scope;
        let node = &mut self.nodes[id.index()];
        if node.state == NodeState::Released {
            return false;
        }
        if let Some((key, value)) = node.entry {
            for datum in [key, value] {
                if let Datum::String(bytes) = datum {
                    scope.release_buffer(bytes.len());
                }
            }
        }
        node.state = NodeState::Released;
        scope.note_node_release();
        true
    }

    /// Node ids of the list starting at `head`, sentinel included
    pub fn list(&self, head: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(head), move |id| self.nodes[id.index()].next)
    }
}

/// Walk the guest table at `idx` into a new list in `itr`.
///
/// The stack is left exactly as it was found, whether the walk succeeds or
/// fails.
pub fn walk_table<'s, S: GuestStack + ?Sized>(
    stack: &mut S,
    itr: &mut Itr<'s>,
    config: &BridgeConfig,
    idx: i32,
) -> Result<NodeId> {
    TableWalk {
        stack,
        itr,
        config,
        path: Vec::new(),
    }
    .table(idx)
}

struct TableWalk<'a, 's, S: ?Sized> {
    stack: &'a mut S,
    itr: &'a mut Itr<'s>,
    config: &'a BridgeConfig,
    /// Identities of the tables currently being walked
    path: Vec<usize>,
}

impl<'s, S: GuestStack + ?Sized> TableWalk<'_, 's, S> {
    fn table(&mut self, idx: i32) -> Result<NodeId> {
        let idx = self.stack.abs_index(idx);
        let identity = self.stack.to_pointer(idx).unwrap_or_default();
        if self.path.len() >= self.config.max_depth {
            return Err(BridgeError::DepthLimitExceeded(self.config.max_depth));
        }
        if self.config.cycle_guard && self.path.contains(&identity) {
            return Err(BridgeError::CyclicStructure);
        }
        self.path.push(identity);
        let result = self.entries(idx);
        self.path.pop();
        result
    }

    /// Drive `next` over the table at absolute index `idx` to completion
    fn entries(&mut self, idx: i32) -> Result<NodeId> {
        self.stack.check_stack(2)?;
        let base = self.stack.top();
        let head = self.itr.alloc_node(None)?;
        let mut current = head;
        let mut failure: Option<BridgeError> = None;
        let mut count = 0usize;

        self.stack.push_nil();
        loop {
            match self.stack.next(idx) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    failure.get_or_insert(e.into());
                    break;
                }
            }
            // After a failure keep iterating so the guest sees a complete
            // traversal, but classify nothing more.
            if failure.is_none() {
                match self.step(&mut current) {
                    Ok(()) => count += 1,
                    Err(e) => failure = Some(e),
                }
            }
            self.stack.pop(1);
        }
        self.stack.set_top(base);

        match failure {
            Some(e) => {
                trace!(error = %e, depth = self.path.len(), "table walk failed");
                Err(e)
            }
            None => {
                trace!(entries = count, depth = self.path.len(), "table walked");
                Ok(head)
            }
        }
    }

    fn step(&mut self, current: &mut NodeId) -> Result<()> {
        let next = self.itr.alloc_node(Some(*current))?;
        let key = self.classify(-2)?;
        let value = self.classify(-1)?;
        self.itr.populate(*current, key, value);
        *current = next;
        Ok(())
    }

    fn classify(&mut self, idx: i32) -> Result<Datum<'s>> {
        match self.stack.type_of(idx) {
            GuestType::Boolean => Ok(Datum::Boolean(self.stack.to_boolean(idx))),
            GuestType::Number => self
                .stack
                .to_number(idx)
                .map(Datum::Number)
                .ok_or(BridgeError::UnsupportedGuestType(GuestType::Number)),
            GuestType::String => {
                let scope = self.itr.scope();
                let bytes = self
                    .stack
                    .to_bytes(idx)
                    .ok_or(BridgeError::UnsupportedGuestType(GuestType::String))?;
                Ok(Datum::String(scope.copy_buffer(bytes)?))
            }
            GuestType::Table => self.table(idx).map(Datum::Table),
            other => Err(BridgeError::UnsupportedGuestType(other)),
        }
    }
}
