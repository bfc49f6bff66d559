//! Reference guest runtime
//!
//! `Vm` is a single evaluation context: one value stack with call frames,
//! one table heap, and a globals table. It implements `GuestStack`, so the
//! host bridge can drive it exactly as it would drive any embedded
//! interpreter exposing a stack API.
//!
//! Native functions run in their own frame. While a native function runs,
//! index 1 is its first argument and `top()` is the number of values in
//! its frame. Whatever it leaves on top of its frame becomes its results.

use crate::api::{GuestStack, MULTRET};
use crate::error::GuestError;
use crate::heap::{Heap, HeapStats, TableRef};
use crate::stack::{DEFAULT_STACK_LIMIT, EvalStack};
use crate::table::Table;
use crate::value::{GuestType, GuestValue, NativeFunction};
use tracing::{debug, trace};

/// Default limit on nested native calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// A guest evaluation context
#[derive(Debug)]
pub struct Vm {
    stack: EvalStack,
    heap: Heap,
    globals: TableRef,
    /// Absolute position of slot 1 of the running frame
    base: usize,
    call_depth: usize,
    max_call_depth: usize,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_STACK_LIMIT, DEFAULT_MAX_CALL_DEPTH)
    }

    /// Create a context with explicit stack and call depth limits
    pub fn with_limits(stack_limit: usize, max_call_depth: usize) -> Self {
        let mut heap = Heap::new();
        let globals = heap.alloc(Table::new());
        Vm {
            stack: EvalStack::new(stack_limit),
            heap,
            globals,
            base: 0,
            call_depth: 0,
            max_call_depth,
        }
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Number of guest tables currently alive (including the globals table)
    pub fn live_tables(&self) -> usize {
        self.heap.live()
    }

    /// Value at `idx` in the current frame
    pub fn value_at(&self, idx: i32) -> Option<&GuestValue> {
        self.slot_pos(idx).and_then(|pos| self.stack.get(pos))
    }

    /// Table stored at `idx`, if the slot holds a live table
    pub fn table_at(&self, idx: i32) -> Option<&Table> {
        match self.value_at(idx) {
            Some(GuestValue::Table(t)) => self.heap.get(*t),
            _ => None,
        }
    }

    pub fn push_function(&mut self, func: NativeFunction) {
        self.stack.push(GuestValue::Function(func));
    }

    pub fn push_light_userdata(&mut self, ptr: usize) {
        self.stack.push(GuestValue::LightUserdata(ptr));
    }

    /// Push `t[name]` where `t` is the table at `idx`
    pub fn get_field(&mut self, idx: i32, name: &str) -> Result<(), GuestError> {
        let table = self.table_ref(idx)?;
        let value = self
            .heap
            .get(table)
            .ok_or(GuestError::DanglingTable)?
            .get(&GuestValue::string(name));
        self.stack.push(value);
        Ok(())
    }

    /// Pop the top value and assign it to `t[name]` where `t` is at `idx`
    pub fn set_field(&mut self, idx: i32, name: &str) -> Result<(), GuestError> {
        let table = self.table_ref(idx)?;
        let value = self.pop_value()?;
        self.heap
            .get_mut(table)
            .ok_or(GuestError::DanglingTable)?
            .set(GuestValue::string(name), value)
    }

    /// Length of the array part of the table at `idx`
    pub fn raw_len(&self, idx: i32) -> Result<usize, GuestError> {
        let table = self.table_ref(idx)?;
        self.heap
            .get(table)
            .map(Table::sequence_len)
            .ok_or(GuestError::DanglingTable)
    }

    /// Free every table unreachable from the stack and the globals table.
    ///
    /// Returns the number of tables freed.
    pub fn collect_garbage(&mut self) -> usize {
        let roots: Vec<TableRef> = self
            .stack
            .iter()
            .filter_map(GuestValue::as_table)
            .chain(std::iter::once(self.globals))
            .collect();
        let freed = self.heap.collect(roots);
        debug!(freed, live = self.heap.live(), "collected guest tables");
        freed
    }

    fn slot_pos(&self, idx: i32) -> Option<usize> {
        let depth = self.stack.depth();
        if idx > 0 {
            let pos = self.base + idx as usize - 1;
            (pos < depth).then_some(pos)
        } else if idx < 0 {
            let offset = idx.unsigned_abs() as usize;
            (offset <= depth - self.base).then(|| depth - offset)
        } else {
            None
        }
    }

    fn table_ref(&self, idx: i32) -> Result<TableRef, GuestError> {
        match self.value_at(idx) {
            Some(GuestValue::Table(t)) => Ok(*t),
            Some(other) => Err(GuestError::NotATable(other.type_of())),
            None => Err(GuestError::NotATable(GuestType::None)),
        }
    }

    fn pop_value(&mut self) -> Result<GuestValue, GuestError> {
        if self.top() < 1 {
            return Err(GuestError::StackUnderflow {
                needed: 1,
                available: 0,
            });
        }
        self.stack.pop().ok_or(GuestError::StackUnderflow {
            needed: 1,
            available: 0,
        })
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestStack for Vm {
    fn top(&self) -> i32 {
        (self.stack.depth() - self.base) as i32
    }

    fn set_top(&mut self, idx: i32) {
        let depth = if idx >= 0 {
            self.base + idx as usize
        } else {
            let relative = self.stack.depth() as i64 + idx as i64 + 1;
            relative.max(self.base as i64) as usize
        };
        self.stack.set_depth(depth);
    }

    fn check_stack(&mut self, extra: usize) -> Result<(), GuestError> {
        self.stack.reserve(extra)
    }

    fn push_nil(&mut self) {
        self.stack.push(GuestValue::Nil);
    }

    fn push_boolean(&mut self, b: bool) {
        self.stack.push(GuestValue::Boolean(b));
    }

    fn push_number(&mut self, n: f64) {
        self.stack.push(GuestValue::Number(n));
    }

    fn push_string(&mut self, bytes: &[u8]) {
        self.stack.push(GuestValue::String(bytes.into()));
    }

    fn push_value(&mut self, idx: i32) {
        let value = self.value_at(idx).cloned().unwrap_or(GuestValue::Nil);
        self.stack.push(value);
    }

    fn new_table(&mut self, narr: usize, nrec: usize) {
        let table = self.heap.alloc(Table::with_capacity(narr + nrec));
        self.stack.push(GuestValue::Table(table));
    }

    fn set_table(&mut self, idx: i32) -> Result<(), GuestError> {
        let table = self.table_ref(idx)?;
        if self.top() < 2 {
            return Err(GuestError::StackUnderflow {
                needed: 2,
                available: self.top() as usize,
            });
        }
        let value = self.pop_value()?;
        let key = self.pop_value()?;
        self.heap
            .get_mut(table)
            .ok_or(GuestError::DanglingTable)?
            .set(key, value)
    }

    fn type_of(&self, idx: i32) -> GuestType {
        self.value_at(idx)
            .map(GuestValue::type_of)
            .unwrap_or(GuestType::None)
    }

    fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_some_and(GuestValue::truthy)
    }

    fn to_number(&self, idx: i32) -> Option<f64> {
        match self.value_at(idx) {
            Some(GuestValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    fn to_bytes(&self, idx: i32) -> Option<&[u8]> {
        match self.value_at(idx) {
            Some(GuestValue::String(s)) => Some(&s[..]),
            _ => None,
        }
    }

    fn to_pointer(&self, idx: i32) -> Option<usize> {
        match self.value_at(idx) {
            Some(GuestValue::Table(t)) => Some(t.identity()),
            Some(GuestValue::Function(f)) => Some(f.addr()),
            Some(GuestValue::LightUserdata(p)) => Some(*p),
            _ => None,
        }
    }

    fn next(&mut self, idx: i32) -> Result<bool, GuestError> {
        let table = self.table_ref(idx)?;
        let key = self.pop_value()?;
        let entry = self
            .heap
            .get(table)
            .ok_or(GuestError::DanglingTable)?
            .next(&key)?;
        match entry {
            Some((k, v)) => {
                self.stack.push(k);
                self.stack.push(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_global(&mut self, name: &str) -> Result<(), GuestError> {
        let value = self.pop_value()?;
        self.heap
            .get_mut(self.globals)
            .ok_or(GuestError::DanglingTable)?
            .set(GuestValue::string(name), value)
    }

    fn get_global(&mut self, name: &str) -> Result<(), GuestError> {
        let value = self
            .heap
            .get(self.globals)
            .ok_or(GuestError::DanglingTable)?
            .get(&GuestValue::string(name));
        self.stack.push(value);
        Ok(())
    }

    fn call(&mut self, nargs: i32, nresults: i32) -> Result<(), GuestError> {
        let available = self.top().max(0) as usize;
        let nargs = nargs.max(0) as usize;
        if nargs + 1 > available {
            return Err(GuestError::StackUnderflow {
                needed: nargs + 1,
                available,
            });
        }
        let func_pos = self.stack.depth() - nargs - 1;
        let func = match self.stack.get(func_pos) {
            Some(GuestValue::Function(f)) => *f,
            Some(other) => return Err(GuestError::NotCallable(other.type_of())),
            None => return Err(GuestError::NotCallable(GuestType::None)),
        };
        if self.call_depth >= self.max_call_depth {
            return Err(GuestError::CallDepthExceeded(self.max_call_depth));
        }

        trace!(function = func.name, nargs, "call");
        let saved_base = self.base;
        self.base = func_pos + 1;
        self.call_depth += 1;
        let result = (func.func)(self);
        self.call_depth -= 1;
        self.base = saved_base;

        let returned = match result {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                self.stack.set_depth(func_pos);
                return Err(e);
            }
        };
        let depth = self.stack.depth();
        let frame = depth.saturating_sub(func_pos + 1);
        if returned > frame {
            self.stack.set_depth(func_pos);
            return Err(GuestError::StackUnderflow {
                needed: returned,
                available: frame,
            });
        }
        let mut results = self.stack.split_off(depth - returned);
        self.stack.set_depth(func_pos);
        if nresults != MULTRET {
            results.resize(nresults.max(0) as usize, GuestValue::Nil);
        }
        self.stack.extend(results);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dump_stack;

    fn add_one(vm: &mut Vm) -> Result<i32, GuestError> {
        let n = vm
            .to_number(1)
            .ok_or_else(|| GuestError::Runtime("add_one: expected number".to_string()))?;
        vm.push_number(n + 1.0);
        Ok(1)
    }

    fn fail(_vm: &mut Vm) -> Result<i32, GuestError> {
        Err(GuestError::Runtime("boom".to_string()))
    }

    fn frame_size(vm: &mut Vm) -> Result<i32, GuestError> {
        let n = vm.top();
        vm.push_number(n as f64);
        Ok(1)
    }

    #[test]
    fn test_indexing() {
        let mut vm = Vm::new();
        vm.push_number(1.0);
        vm.push_string(b"two");
        vm.push_boolean(true);
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.type_of(1), GuestType::Number);
        assert_eq!(vm.type_of(-1), GuestType::Boolean);
        assert_eq!(vm.to_bytes(-2), Some(&b"two"[..]));
        assert_eq!(vm.type_of(4), GuestType::None);
        assert_eq!(vm.type_of(-4), GuestType::None);
        assert_eq!(vm.abs_index(-1), 3);
    }

    #[test]
    fn test_no_coercion() {
        let mut vm = Vm::new();
        vm.push_number(3.0);
        vm.push_string(b"4");
        assert_eq!(vm.to_bytes(1), None);
        assert_eq!(vm.to_number(2), None);
    }

    #[test]
    fn test_set_top_and_pop() {
        let mut vm = Vm::new();
        vm.set_top(3);
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.type_of(3), GuestType::Nil);
        vm.pop(2);
        assert_eq!(vm.top(), 1);
        vm.set_top(0);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_table_set_and_next() {
        let mut vm = Vm::new();
        vm.new_table(0, 2);
        vm.push_string(b"key");
        vm.push_string(b"value");
        vm.set_table(-3).unwrap();
        assert_eq!(vm.top(), 1);

        vm.push_nil();
        assert!(vm.next(1).unwrap());
        assert_eq!(vm.to_bytes(-2), Some(&b"key"[..]));
        assert_eq!(vm.to_bytes(-1), Some(&b"value"[..]));
        vm.pop(1);
        assert!(!vm.next(1).unwrap());
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_set_table_on_non_table() {
        let mut vm = Vm::new();
        vm.push_number(1.0);
        vm.push_string(b"k");
        vm.push_string(b"v");
        assert_eq!(
            vm.set_table(1),
            Err(GuestError::NotATable(GuestType::Number))
        );
    }

    #[test]
    fn test_globals() {
        let mut vm = Vm::new();
        vm.new_table(0, 0);
        vm.set_global("tb").unwrap();
        assert_eq!(vm.top(), 0);
        vm.get_global("tb").unwrap();
        assert_eq!(vm.type_of(-1), GuestType::Table);
        vm.get_global("missing").unwrap();
        assert_eq!(vm.type_of(-1), GuestType::Nil);
    }

    #[test]
    fn test_field_helpers() {
        let mut vm = Vm::new();
        vm.new_table(0, 1);
        vm.push_string(b"abc");
        vm.set_field(1, "key").unwrap();
        vm.get_field(1, "key").unwrap();
        assert_eq!(vm.to_bytes(-1), Some(&b"abc"[..]));
    }

    #[test]
    fn test_call_native() {
        let mut vm = Vm::new();
        vm.push_string(b"below");
        vm.push_function(NativeFunction::new("add_one", add_one));
        vm.push_number(41.0);
        vm.call(1, 1).unwrap();
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_number(-1), Some(42.0));
        assert_eq!(vm.to_bytes(1), Some(&b"below"[..]));
    }

    #[test]
    fn test_call_sees_own_frame() {
        let mut vm = Vm::new();
        vm.push_number(0.0);
        vm.push_number(0.0);
        vm.push_function(NativeFunction::new("frame_size", frame_size));
        vm.push_boolean(true);
        vm.push_boolean(false);
        vm.call(2, MULTRET).unwrap();
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.to_number(-1), Some(2.0));
    }

    #[test]
    fn test_call_adjusts_results() {
        let mut vm = Vm::new();
        vm.push_function(NativeFunction::new("add_one", add_one));
        vm.push_number(1.0);
        vm.call(1, 3).unwrap();
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.to_number(1), Some(2.0));
        assert_eq!(vm.type_of(3), GuestType::Nil);
    }

    #[test]
    fn test_call_error_unwinds_frame() {
        let mut vm = Vm::new();
        vm.push_number(7.0);
        vm.push_function(NativeFunction::new("fail", fail));
        vm.push_number(1.0);
        assert_eq!(
            vm.call(1, 0),
            Err(GuestError::Runtime("boom".to_string()))
        );
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_call_non_function() {
        let mut vm = Vm::new();
        vm.push_number(1.0);
        assert_eq!(
            vm.call(0, 0),
            Err(GuestError::NotCallable(GuestType::Number))
        );
    }

    #[test]
    fn test_collect_garbage_keeps_rooted_tables() {
        let mut vm = Vm::new();
        vm.new_table(0, 0);
        vm.new_table(0, 0);
        vm.set_global("kept").unwrap();
        assert_eq!(vm.live_tables(), 3);
        vm.pop(1);
        assert_eq!(vm.collect_garbage(), 1);
        assert_eq!(vm.live_tables(), 2);
    }

    #[test]
    fn test_dump_stack() {
        let mut vm = Vm::new();
        vm.push_number(1.5);
        vm.push_string(b"hi");
        vm.push_boolean(false);
        vm.push_nil();
        let dump = dump_stack(&vm);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "1\tnumber\t1.5");
        assert_eq!(lines[1], "2\tstring\thi");
        assert_eq!(lines[2], "3\tboolean\tfalse");
        assert_eq!(lines[3], "4\tnil\tnil");

        vm.set_top(0);
        vm.push_number(0.1 + 0.2);
        vm.push_number(1e20);
        assert_eq!(dump_stack(&vm), "1\tnumber\t0.3\n2\tnumber\t1e+20\n");
    }
}
