//! Guest → host marshalling
//!
//! `extract` reads the value at a stack index without popping it. Scalars
//! convert directly. A table is walked into an ITR list inside a fresh
//! `ConversionScope`, then materialized into a `HostMap`, releasing each
//! node as soon as its entry has been converted.
//!
//! Tables always come back as `HostValue::Map`, even when the guest built
//! them array-style: `{10, 20}` extracts as `{1: 10, 2: 20}`.

use crate::config::{BridgeConfig, NumberMode};
use crate::error::{BridgeError, Result};
use crate::host::{HostMap, HostValue};
use crate::itr::{Datum, Itr, NodeId, NodeState, walk_table};
use crate::ownership::ConversionScope;
use stackbridge_core::{GuestError, GuestStack, GuestType};
use tracing::debug;

/// Largest magnitude at which every integer is exactly representable (2^53)
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Convert the value at `idx` into a host value; the stack is left unchanged
pub fn extract<S: GuestStack + ?Sized>(
    stack: &mut S,
    idx: i32,
    config: &BridgeConfig,
) -> Result<HostValue> {
    match stack.type_of(idx) {
        GuestType::Nil => Ok(HostValue::Nil),
        GuestType::Boolean => Ok(HostValue::Bool(stack.to_boolean(idx))),
        GuestType::Number => stack
            .to_number(idx)
            .map(|n| number(n, config.numbers))
            .ok_or(BridgeError::UnsupportedGuestType(GuestType::Number)),
        GuestType::String => {
            let bytes = stack
                .to_bytes(idx)
                .ok_or(BridgeError::UnsupportedGuestType(GuestType::String))?;
            string(bytes)
        }
        GuestType::Table => table(stack, idx, config),
        other => Err(BridgeError::UnsupportedGuestType(other)),
    }
}

/// Extract the top `n` values (bottom-most first) and pop them.
///
/// On failure nothing is popped.
pub fn extract_returns<S: GuestStack + ?Sized>(
    stack: &mut S,
    n: usize,
    config: &BridgeConfig,
) -> Result<Vec<HostValue>> {
    let available = stack.top().max(0) as usize;
    if n > available {
        return Err(GuestError::StackUnderflow {
            needed: n,
            available,
        }
        .into());
    }
    let count = n as i32;
    let mut values = Vec::with_capacity(n);
    for offset in 0..count {
        values.push(extract(stack, offset - count, config)?);
    }
    stack.pop(count);
    Ok(values)
}

fn number(n: f64, mode: NumberMode) -> HostValue {
    match mode {
        NumberMode::IntegralAsInt if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INTEGER => {
            HostValue::Int(n as i64)
        }
        _ => HostValue::Float(n),
    }
}

fn string(bytes: &[u8]) -> Result<HostValue> {
    std::str::from_utf8(bytes)
        .map(|s| HostValue::String(s.to_owned()))
        .map_err(|_| BridgeError::NonUtf8String)
}

fn table<S: GuestStack + ?Sized>(
    stack: &mut S,
    idx: i32,
    config: &BridgeConfig,
) -> Result<HostValue> {
    let top = stack.top();
    let scope = ConversionScope::new(config.arena_limit).with_node_limit(config.max_nodes);
    let mut itr = Itr::new(&scope);

    let walked = walk_table(stack, &mut itr, config, idx);
    stack.set_top(top);
    let head = walked.inspect_err(|e| debug!(error = %e, "guest table walk failed"))?;

    let map = materialize(&mut itr, head, config)?;
    debug!(
        entries = map.len(),
        nodes = itr.len(),
        bytes = scope.charged(),
        "extracted guest table"
    );
    Ok(HostValue::Map(map))
}

/// Second pass: convert a list into a map, releasing each node once its
/// entry is in the map. The sentinel is released without being read.
fn materialize(itr: &mut Itr<'_>, head: NodeId, config: &BridgeConfig) -> Result<HostMap> {
    let mut map = HostMap::with_capacity(itr.list(head).count().saturating_sub(1));
    let mut cursor = Some(head);
    while let Some(id) = cursor {
        let node = itr.node(id);
        cursor = node.next();
        match (node.state(), node.entry()) {
            (NodeState::Populated, Some((key, value))) => {
                let key = datum(itr, key, config)?;
                let value = datum(itr, value, config)?;
                map.insert(key, value);
                itr.release(id);
            }
            (NodeState::Released, _) => {}
            _ => {
                itr.release(id);
            }
        }
    }
    Ok(map)
}

fn datum(itr: &mut Itr<'_>, datum: Datum<'_>, config: &BridgeConfig) -> Result<HostValue> {
    match datum {
        Datum::Boolean(b) => Ok(HostValue::Bool(b)),
        Datum::Number(n) => Ok(number(n, config.numbers)),
        Datum::String(bytes) => string(bytes),
        Datum::Table(head) => materialize(itr, head, config).map(HostValue::Map),
    }
}
