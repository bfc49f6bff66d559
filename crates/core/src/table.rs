//! Guest tables
//!
//! A table is an insertion-ordered list of entries plus a hash index from
//! normalized key to entry position. The layout gives the guest's `next`
//! protocol a stable enumeration order:
//!
//! ```text
//! entries: [ (k0, v0) | (k1, nil) | (k2, v2) | ... ]
//!                          ^ removed entry kept as a tombstone
//! index:   { key(k0) -> 0, key(k1) -> 1, key(k2) -> 2 }
//! ```
//!
//! Assigning nil to an existing key leaves a tombstone, so a traversal that
//! clears entries as it goes can still find its position. Tombstones are
//! compacted away only when a *new* key is inserted, which is not allowed
//! during a traversal.

use crate::error::GuestError;
use crate::heap::TableRef;
use crate::value::GuestValue;
use std::collections::HashMap;
use std::rc::Rc;

/// Minimum number of slots before tombstone compaction is considered
const COMPACT_THRESHOLD: usize = 8;

/// Hashable form of a guest value used as a table key
///
/// Numbers are keyed by their bit pattern after folding `-0.0` into `0.0`.
/// Nil and NaN have no key form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Boolean(bool),
    Number(u64),
    String(Rc<[u8]>),
    Table(TableRef),
    Function(usize),
    LightUserdata(usize),
}

impl TableKey {
    /// Convert a value to its key form
    pub fn from_value(value: &GuestValue) -> Result<TableKey, GuestError> {
        match value {
            GuestValue::Nil => Err(GuestError::NilKey),
            GuestValue::Number(n) if n.is_nan() => Err(GuestError::NanKey),
            GuestValue::Number(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                Ok(TableKey::Number(n.to_bits()))
            }
            GuestValue::Boolean(b) => Ok(TableKey::Boolean(*b)),
            GuestValue::String(s) => Ok(TableKey::String(Rc::clone(s))),
            GuestValue::Table(t) => Ok(TableKey::Table(*t)),
            GuestValue::Function(f) => Ok(TableKey::Function(f.addr())),
            GuestValue::LightUserdata(p) => Ok(TableKey::LightUserdata(*p)),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: GuestValue,
    value: GuestValue,
}

/// Key/value container usable as both map and array
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    index: HashMap<TableKey, usize>,
    live: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Table {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            live: 0,
        }
    }

    /// Number of non-nil entries
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Look up a key; absent keys and keys with no key form read as nil
    pub fn get(&self, key: &GuestValue) -> GuestValue {
        let Ok(key) = TableKey::from_value(key) else {
            return GuestValue::Nil;
        };
        self.index
            .get(&key)
            .map(|&i| self.entries[i].value.clone())
            .unwrap_or(GuestValue::Nil)
    }

    /// Assign `table[key] = value`; assigning nil removes the entry
    pub fn set(&mut self, key: GuestValue, value: GuestValue) -> Result<(), GuestError> {
        let table_key = TableKey::from_value(&key)?;
        if let Some(&i) = self.index.get(&table_key) {
            let entry = &mut self.entries[i];
            match (entry.value.is_nil(), value.is_nil()) {
                (true, false) => self.live += 1,
                (false, true) => self.live -= 1,
                _ => {}
            }
            entry.value = value;
            return Ok(());
        }
        if value.is_nil() {
            return Ok(());
        }
        self.compact_if_sparse();
        self.index.insert(table_key, self.entries.len());
        self.entries.push(Entry { key, value });
        self.live += 1;
        Ok(())
    }

    /// Entry following `key` in enumeration order (`nil` starts a traversal).
    ///
    /// Returns `Ok(None)` once the traversal is complete.
    pub fn next(&self, key: &GuestValue) -> Result<Option<(GuestValue, GuestValue)>, GuestError> {
        let start = if key.is_nil() {
            0
        } else {
            let table_key = TableKey::from_value(key)?;
            match self.index.get(&table_key) {
                Some(&i) => i + 1,
                None => return Err(GuestError::InvalidNextKey),
            }
        };
        Ok(self.entries[start..]
            .iter()
            .find(|e| !e.value.is_nil())
            .map(|e| (e.key.clone(), e.value.clone())))
    }

    /// Length of the array part: the largest `n` such that `1..=n` are all present
    pub fn sequence_len(&self) -> usize {
        let mut n = 0usize;
        while !self.get(&GuestValue::Number((n + 1) as f64)).is_nil() {
            n += 1;
        }
        n
    }

    /// Every table handle held by this table, as key or value
    pub(crate) fn references(&self) -> impl Iterator<Item = TableRef> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.value.is_nil())
            .flat_map(|e| [e.key.as_table(), e.value.as_table()])
            .flatten()
    }

    fn compact_if_sparse(&mut self) {
        let slots = self.entries.len();
        if slots < COMPACT_THRESHOLD || self.live * 2 > slots {
            return;
        }
        self.entries.retain(|e| !e.value.is_nil());
        self.index.clear();
        for (i, e) in self.entries.iter().enumerate() {
            if let Ok(k) = TableKey::from_value(&e.key) {
                self.index.insert(k, i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> GuestValue {
        GuestValue::string(text)
    }

    #[test]
    fn test_set_get() {
        let mut t = Table::new();
        t.set(s("key"), s("value")).unwrap();
        t.set(GuestValue::Number(1.0), GuestValue::Boolean(true))
            .unwrap();
        assert_eq!(t.get(&s("key")), s("value"));
        assert_eq!(t.get(&GuestValue::Number(1.0)), GuestValue::Boolean(true));
        assert_eq!(t.get(&s("missing")), GuestValue::Nil);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_nil_and_nan_keys_rejected() {
        let mut t = Table::new();
        assert_eq!(
            t.set(GuestValue::Nil, GuestValue::Number(1.0)),
            Err(GuestError::NilKey)
        );
        assert_eq!(
            t.set(GuestValue::Number(f64::NAN), GuestValue::Number(1.0)),
            Err(GuestError::NanKey)
        );
        assert!(t.is_empty());
    }

    #[test]
    fn test_negative_zero_is_same_key() {
        let mut t = Table::new();
        t.set(GuestValue::Number(0.0), s("zero")).unwrap();
        assert_eq!(t.get(&GuestValue::Number(-0.0)), s("zero"));
    }

    #[test]
    fn test_next_enumerates_in_insertion_order() {
        let mut t = Table::new();
        t.set(s("a"), GuestValue::Number(1.0)).unwrap();
        t.set(s("b"), GuestValue::Number(2.0)).unwrap();
        t.set(s("c"), GuestValue::Number(3.0)).unwrap();

        let mut keys = Vec::new();
        let mut cursor = GuestValue::Nil;
        while let Some((k, _)) = t.next(&cursor).unwrap() {
            keys.push(k.clone());
            cursor = k;
        }
        assert_eq!(keys, vec![s("a"), s("b"), s("c")]);
    }

    #[test]
    fn test_clearing_during_traversal() {
        let mut t = Table::new();
        for i in 1..=4 {
            t.set(GuestValue::Number(i as f64), s("x")).unwrap();
        }
        let mut cursor = GuestValue::Nil;
        let mut seen = 0;
        while let Some((k, _)) = t.next(&cursor).unwrap() {
            t.set(k.clone(), GuestValue::Nil).unwrap();
            cursor = k;
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert!(t.is_empty());
    }

    #[test]
    fn test_next_with_unknown_key() {
        let t = Table::new();
        assert_eq!(t.next(&s("ghost")), Err(GuestError::InvalidNextKey));
        assert_eq!(t.next(&GuestValue::Nil), Ok(None));
    }

    #[test]
    fn test_compaction_keeps_lookups() {
        let mut t = Table::new();
        for i in 0..16 {
            t.set(GuestValue::Number(i as f64), GuestValue::Boolean(true))
                .unwrap();
        }
        for i in 0..12 {
            t.set(GuestValue::Number(i as f64), GuestValue::Nil).unwrap();
        }
        t.set(s("fresh"), GuestValue::Boolean(false)).unwrap();
        assert_eq!(t.len(), 5);
        assert_eq!(t.get(&GuestValue::Number(13.0)), GuestValue::Boolean(true));
        assert_eq!(t.get(&s("fresh")), GuestValue::Boolean(false));
        assert_eq!(t.entries.len(), 5);
    }

    #[test]
    fn test_sequence_len() {
        let mut t = Table::new();
        for i in 1..=3 {
            t.set(GuestValue::Number(i as f64), s("v")).unwrap();
        }
        t.set(GuestValue::Number(5.0), s("gap")).unwrap();
        assert_eq!(t.sequence_len(), 3);
    }
}
