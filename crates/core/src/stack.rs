//! Evaluation stack
//!
//! A contiguous array of `GuestValue` slots shared by the host and the guest.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬─────────┐
//! │   v0     │   v1     │   v2     │   v3     │  ...    │
//! └──────────┴──────────┴──────────┴──────────┴─────────┘
//!               ↑ frame base               ↑ top
//!
//! - Grows upward
//! - Positive API indices count from the frame base (1 = first slot)
//! - Negative API indices count from the top (-1 = top slot)
//! ```
//!
//! The stack grows on demand up to a fixed depth limit. Callers reserve
//! room with `check_stack` before pushing a batch of values; plain pushes
//! never fail.

use crate::error::GuestError;
use crate::value::GuestValue;

/// Default initial capacity (number of slots)
pub const DEFAULT_STACK_CAPACITY: usize = 64;

/// Default depth limit for a single evaluation context
pub const DEFAULT_STACK_LIMIT: usize = 1_000_000;

/// Value stack for one evaluation context
#[derive(Debug)]
pub struct EvalStack {
    slots: Vec<GuestValue>,
    limit: usize,
}

impl EvalStack {
    /// Create a stack that may grow up to `limit` slots
    pub fn new(limit: usize) -> Self {
        EvalStack {
            slots: Vec::with_capacity(DEFAULT_STACK_CAPACITY.min(limit)),
            limit,
        }
    }

    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_STACK_LIMIT)
    }

    /// Current number of slots in use
    #[inline]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Check that `n` more values fit under the limit, reserving room for them
    pub fn reserve(&mut self, n: usize) -> Result<(), GuestError> {
        let depth = self.depth();
        if depth.saturating_add(n) > self.limit {
            return Err(GuestError::StackOverflow {
                depth,
                requested: n,
                limit: self.limit,
            });
        }
        self.slots.reserve(n);
        Ok(())
    }

    #[inline]
    pub fn push(&mut self, value: GuestValue) {
        self.slots.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<GuestValue> {
        self.slots.pop()
    }

    /// Slot at absolute position `pos` (0-based)
    #[inline]
    pub fn get(&self, pos: usize) -> Option<&GuestValue> {
        self.slots.get(pos)
    }

    /// Resize to exactly `depth` slots, filling new slots with nil
    pub fn set_depth(&mut self, depth: usize) {
        self.slots.resize(depth, GuestValue::Nil);
    }

    /// Remove and return every slot from `pos` upward
    pub fn split_off(&mut self, pos: usize) -> Vec<GuestValue> {
        self.slots.split_off(pos)
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = GuestValue>) {
        self.slots.extend(values);
    }

    pub fn iter(&self) -> impl Iterator<Item = &GuestValue> {
        self.slots.iter()
    }
}

impl Default for EvalStack {
    fn default() -> Self {
        Self::with_default_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = EvalStack::with_default_limit();
        stack.push(GuestValue::Number(1.0));
        stack.push(GuestValue::Boolean(true));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop(), Some(GuestValue::Boolean(true)));
        assert_eq!(stack.pop(), Some(GuestValue::Number(1.0)));
        assert!(stack.is_empty());
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_reserve_respects_limit() {
        let mut stack = EvalStack::new(2);
        assert!(stack.reserve(2).is_ok());
        stack.push(GuestValue::Nil);
        assert_eq!(
            stack.reserve(2),
            Err(GuestError::StackOverflow {
                depth: 1,
                requested: 2,
                limit: 2
            })
        );
    }

    #[test]
    fn test_set_depth_fills_with_nil() {
        let mut stack = EvalStack::with_default_limit();
        stack.set_depth(3);
        assert_eq!(stack.depth(), 3);
        assert!(stack.iter().all(GuestValue::is_nil));
        stack.set_depth(1);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_split_off() {
        let mut stack = EvalStack::with_default_limit();
        for i in 0..4 {
            stack.push(GuestValue::Number(i as f64));
        }
        let tail = stack.split_off(2);
        assert_eq!(tail, vec![GuestValue::Number(2.0), GuestValue::Number(3.0)]);
        assert_eq!(stack.depth(), 2);
    }
}
