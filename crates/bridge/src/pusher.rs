//! Host → guest marshalling
//!
//! `push` converts one `HostValue` into exactly one new guest stack value.
//! Composites become fresh guest tables; the guest owns everything pushed.
//!
//! | host                 | guest                                  |
//! |----------------------|----------------------------------------|
//! | `Nil`, `Bool`        | nil, boolean                           |
//! | `Int`, `UInt`        | number (widened to a double)           |
//! | `Float`              | number                                 |
//! | `String`             | string (the guest keeps its own copy)  |
//! | `Seq`                | table keyed from `sequence_base`       |
//! | `Map`                | table, entry by entry                  |
//! | `Record`             | table of exported fields               |
//! | `Shared`             | the pointee                            |
//! | `Opaque`             | rejected                               |
//!
//! On failure the stack is truncated back to where it was, so a partially
//! built table is simply dropped and left to the guest collector.
//!
//! Every table and every entry counts against `max_nodes`. A `Shared` cell
//! reachable by several paths is pushed once per path.

use crate::config::{BridgeConfig, IntegerPolicy};
use crate::error::{AllocationUnit, BridgeError, Result};
use crate::host::{HostMap, HostValue, Record, Shared};
use stackbridge_core::{GuestStack, GuestType};
use std::rc::Rc;
use tracing::debug;

/// Push one host value onto the guest stack
pub fn push<S: GuestStack + ?Sized>(
    stack: &mut S,
    value: &HostValue,
    config: &BridgeConfig,
) -> Result<()> {
    let top = stack.top();
    let result = Pusher::new(stack, config).value(value);
    if let Err(e) = &result {
        debug!(error = %e, kind = value.type_name(), "push failed, restoring stack");
        stack.set_top(top);
    }
    result
}

/// Push several values; on failure none of them stay on the stack
pub fn push_all<S: GuestStack + ?Sized>(
    stack: &mut S,
    values: &[HostValue],
    config: &BridgeConfig,
) -> Result<()> {
    let top = stack.top();
    stack.check_stack(values.len())?;
    for value in values {
        if let Err(e) = push(stack, value, config) {
            stack.set_top(top);
            return Err(e);
        }
    }
    Ok(())
}

struct Pusher<'a, S: ?Sized> {
    stack: &'a mut S,
    config: &'a BridgeConfig,
    /// Shared cells on the current path
    path: Vec<*const ()>,
    depth: usize,
    nodes: usize,
}

impl<'a, S: GuestStack + ?Sized> Pusher<'a, S> {
    fn new(stack: &'a mut S, config: &'a BridgeConfig) -> Self {
        Pusher {
            stack,
            config,
            path: Vec::new(),
            depth: 0,
            nodes: 0,
        }
    }

    fn value(&mut self, value: &HostValue) -> Result<()> {
        self.stack.check_stack(1)?;
        match value {
            HostValue::Nil => self.stack.push_nil(),
            HostValue::Bool(b) => self.stack.push_boolean(*b),
            HostValue::Int(i) => {
                let n = self.integer(*i as i128)?;
                self.stack.push_number(n);
            }
            HostValue::UInt(u) => {
                let n = self.integer(*u as i128)?;
                self.stack.push_number(n);
            }
            HostValue::Float(f) => self.stack.push_number(*f),
            HostValue::String(s) => self.stack.push_string(s.as_bytes()),
            HostValue::Seq(items) => self.seq(items)?,
            HostValue::Map(map) => self.map(map)?,
            HostValue::Record(record) => self.record(record)?,
            HostValue::Shared(cell) => self.shared(cell)?,
            HostValue::Opaque(opaque) => {
                return Err(BridgeError::UnsupportedHostType(format!(
                    "{} '{}'",
                    opaque.kind(),
                    opaque.label()
                )));
            }
        }
        Ok(())
    }

    fn integer(&self, i: i128) -> Result<f64> {
        let n = i as f64;
        if self.config.integers == IntegerPolicy::Exact && n as i128 != i {
            return Err(BridgeError::InexactInteger(i));
        }
        Ok(n)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= self.config.max_depth {
            return Err(BridgeError::DepthLimitExceeded(self.config.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Count one table or entry against the node budget
    fn charge(&mut self) -> Result<()> {
        if self.nodes >= self.config.max_nodes {
            return Err(BridgeError::AllocationFailure {
                unit: AllocationUnit::Nodes,
                requested: 1,
                limit: self.config.max_nodes,
            });
        }
        self.nodes += 1;
        Ok(())
    }

    fn seq(&mut self, items: &[HostValue]) -> Result<()> {
        self.enter()?;
        self.charge()?;
        self.stack.new_table(items.len(), 0);
        let first = self.config.sequence_base.first_index();
        for (i, item) in items.iter().enumerate() {
            self.charge()?;
            self.stack.check_stack(2)?;
            self.stack.push_number((first + i as i64) as f64);
            self.value(item)?;
            self.stack.set_table(-3)?;
        }
        self.leave();
        Ok(())
    }

    fn map(&mut self, map: &HostMap) -> Result<()> {
        self.enter()?;
        self.charge()?;
        self.stack.new_table(0, map.len());
        for (key, value) in map.iter() {
            self.charge()?;
            self.stack.check_stack(2)?;
            self.value(key)?;
            self.check_key()?;
            self.value(value)?;
            self.stack.set_table(-3)?;
        }
        self.leave();
        Ok(())
    }

    /// Reject a just-pushed key the guest cannot index by
    fn check_key(&self) -> Result<()> {
        match self.stack.type_of(-1) {
            GuestType::Nil => Err(BridgeError::InvalidTableKey("nil".to_string())),
            GuestType::Number if self.stack.to_number(-1).is_some_and(f64::is_nan) => {
                Err(BridgeError::InvalidTableKey("NaN".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn record(&mut self, record: &Record) -> Result<()> {
        let exported = record.exported_fields().count();
        if exported == 0 && !record.fields().is_empty() {
            return Err(BridgeError::UnsupportedHostType(format!(
                "record '{}' without exported fields",
                record.name()
            )));
        }
        self.enter()?;
        self.charge()?;
        self.stack.new_table(0, exported);
        for field in record.exported_fields() {
            self.charge()?;
            self.stack.check_stack(2)?;
            self.stack.push_string(field.name.as_bytes());
            self.value(&field.value)?;
            self.stack.set_table(-3)?;
        }
        self.leave();
        Ok(())
    }

    fn shared(&mut self, cell: &Shared) -> Result<()> {
        let identity = Rc::as_ptr(cell) as *const ();
        if self.config.cycle_guard && self.path.contains(&identity) {
            return Err(BridgeError::CyclicStructure);
        }
        let inner = cell.try_borrow().map_err(|_| {
            BridgeError::UnsupportedHostType("shared value that is mutably borrowed".to_string())
        })?;
        self.enter()?;
        self.path.push(identity);
        self.value(&inner)?;
        self.path.pop();
        self.leave();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequenceBase;
    use crate::host::Opaque;
    use stackbridge_core::{Vm, dump_stack};

    #[test]
    fn test_scalars() {
        let mut vm = Vm::new();
        let config = BridgeConfig::default();
        push(&mut vm, &HostValue::Nil, &config).unwrap();
        push(&mut vm, &HostValue::from(true), &config).unwrap();
        push(&mut vm, &HostValue::from(42), &config).unwrap();
        push(&mut vm, &HostValue::from("hi"), &config).unwrap();
        assert_eq!(vm.top(), 4);
        assert_eq!(vm.type_of(1), GuestType::Nil);
        assert!(vm.to_boolean(2));
        assert_eq!(vm.to_number(3), Some(42.0));
        assert_eq!(vm.to_bytes(4), Some(&b"hi"[..]));
    }

    #[test]
    fn test_seq_uses_base() {
        let mut vm = Vm::new();
        let value = HostValue::from(vec!["a", "b"]);
        push(&mut vm, &value, &BridgeConfig::default()).unwrap();
        assert_eq!(vm.raw_len(-1).unwrap(), 2);

        let zero = BridgeConfig::new().with_sequence_base(SequenceBase::Zero);
        push(&mut vm, &value, &zero).unwrap();
        assert_eq!(vm.raw_len(-1).unwrap(), 1);
        vm.push_nil();
        assert!(vm.next(-2).unwrap());
        assert_eq!(vm.to_number(-2), Some(0.0));
    }

    #[test]
    fn test_record_exports_only_public_fields() {
        let mut vm = Vm::new();
        let record = Record::new("User")
            .with_field("name", "ada")
            .with_private_field("password", "secret");
        push(&mut vm, &record.into(), &BridgeConfig::default()).unwrap();
        assert_eq!(vm.table_at(-1).map(|t| t.len()), Some(1));
        vm.get_field(-1, "password").unwrap();
        assert_eq!(vm.type_of(-1), GuestType::Nil);
    }

    #[test]
    fn test_record_without_exported_fields() {
        let mut vm = Vm::new();
        let record = Record::new("Secret").with_private_field("key", 1);
        let err = push(&mut vm, &record.into(), &BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedHostType(_)));
        assert_eq!(vm.top(), 0);

        push(&mut vm, &Record::new("Empty").into(), &BridgeConfig::default()).unwrap();
        assert_eq!(vm.type_of(-1), GuestType::Table);
    }

    #[test]
    fn test_opaque_rejected_inside_map() {
        let mut vm = Vm::new();
        vm.push_boolean(true);
        let value = HostValue::map([
            ("ok", HostValue::from(1)),
            ("handler", Opaque::function("on_event").into()),
        ]);
        let err = push(&mut vm, &value, &BridgeConfig::default()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::UnsupportedHostType("function 'on_event'".to_string())
        );
        assert_eq!(vm.top(), 1);
        assert!(vm.to_boolean(1));
    }

    #[test]
    fn test_invalid_keys() {
        let mut vm = Vm::new();
        let mut map = HostMap::new();
        map.insert(HostValue::Nil, 1);
        let err = push(&mut vm, &map.into(), &BridgeConfig::default()).unwrap_err();
        assert_eq!(err, BridgeError::InvalidTableKey("nil".to_string()));

        let mut map = HostMap::new();
        map.insert(f64::NAN, 1);
        let err = push(&mut vm, &map.into(), &BridgeConfig::default()).unwrap_err();
        assert_eq!(err, BridgeError::InvalidTableKey("NaN".to_string()));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_exact_integers() {
        let mut vm = Vm::new();
        let exact = BridgeConfig::new().with_integer_policy(IntegerPolicy::Exact);
        push(&mut vm, &HostValue::Int(1 << 53), &exact).unwrap();
        let err = push(&mut vm, &HostValue::Int((1 << 53) + 1), &exact).unwrap_err();
        assert_eq!(err, BridgeError::InexactInteger((1 << 53) + 1));
        let err = push(&mut vm, &HostValue::UInt(u64::MAX), &exact).unwrap_err();
        assert_eq!(err, BridgeError::InexactInteger(u64::MAX as i128));

        push(&mut vm, &HostValue::Int((1 << 53) + 1), &BridgeConfig::default()).unwrap();
        assert_eq!(vm.to_number(-1), Some(9_007_199_254_740_992.0));
    }

    #[test]
    fn test_shared_alias_is_not_a_cycle() {
        let mut vm = Vm::new();
        let leaf = HostValue::shared("leaf");
        let value = HostValue::from(vec![leaf.clone(), leaf]);
        push(&mut vm, &value, &BridgeConfig::default()).unwrap();
        assert_eq!(vm.raw_len(-1).unwrap(), 2);
    }

    #[test]
    fn test_shared_cycle() {
        let mut vm = Vm::new();
        let cell: Shared = Rc::new(std::cell::RefCell::new(HostValue::Nil));
        *cell.borrow_mut() = HostValue::from(vec![HostValue::Shared(cell.clone())]);
        let value = HostValue::Shared(cell.clone());

        let err = push(&mut vm, &value, &BridgeConfig::default()).unwrap_err();
        assert_eq!(err, BridgeError::CyclicStructure);
        assert_eq!(vm.top(), 0);

        let unguarded = BridgeConfig::new().with_cycle_guard(false).with_max_depth(8);
        let err = push(&mut vm, &value, &unguarded).unwrap_err();
        assert_eq!(err, BridgeError::DepthLimitExceeded(8));
        assert_eq!(vm.top(), 0);

        // break the cycle so the cells can be freed
        *cell.borrow_mut() = HostValue::Nil;
    }

    /// Each level holds the next one twice: 2^depth paths to the leaf
    fn shared_dag(depth: usize) -> HostValue {
        let mut node = HostValue::from("leaf");
        for _ in 0..depth {
            let cell = HostValue::shared(node);
            node = HostValue::map([("a", cell.clone()), ("b", cell)]);
        }
        node
    }

    #[test]
    fn test_shared_dag_hits_node_limit() {
        let mut vm = Vm::new();
        vm.push_boolean(true);
        let config = BridgeConfig::new().with_max_nodes(10_000);
        let err = push(&mut vm, &shared_dag(30), &config).unwrap_err();
        assert_eq!(
            err,
            BridgeError::AllocationFailure {
                unit: AllocationUnit::Nodes,
                requested: 1,
                limit: 10_000
            }
        );
        assert_eq!(vm.top(), 1);

        // a shallow DAG fits: 2^4 - 1 tables with two entries each
        let fits = BridgeConfig::new().with_max_nodes(45);
        push(&mut vm, &shared_dag(4), &fits).unwrap();
        let short = BridgeConfig::new().with_max_nodes(44);
        let err = push(&mut vm, &shared_dag(4), &short).unwrap_err();
        assert!(matches!(err, BridgeError::AllocationFailure { .. }));
        assert_eq!(vm.top(), 2);
    }

    #[test]
    fn test_push_all_is_atomic() {
        let mut vm = Vm::new();
        let values = vec![
            HostValue::from(1),
            HostValue::from("two"),
            Opaque::channel("jobs").into(),
        ];
        let err = push_all(&mut vm, &values, &BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedHostType(_)));
        assert_eq!(vm.top(), 0);

        push_all(&mut vm, &values[..2], &BridgeConfig::default()).unwrap();
        assert_eq!(dump_stack(&vm), "1\tnumber\t1\n2\tstring\ttwo\n");
    }
}
