//! Table heap
//!
//! Tables live in a slot array owned by the runtime and are addressed by
//! generation-checked handles:
//!
//! ```text
//! slots: [ gen 0: Table | gen 3: <free> | gen 1: Table | ... ]
//!            ^ TableRef { index: 0, generation: 0 }
//! ```
//!
//! A handle whose generation no longer matches its slot refers to a collected
//! table and resolves to `None`, never to whatever table reused the slot.
//!
//! Only the collector frees tables. Holders of a `TableRef` (stack slots,
//! table entries, the host bridge) never release one directly.

use crate::table::Table;

/// Handle to a table in the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    index: u32,
    generation: u32,
}

impl TableRef {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Stable identity of the referenced table (the runtime's "pointer")
    pub fn identity(&self) -> usize {
        ((self.generation as usize) << 32) | self.index as usize
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    table: Option<Table>,
    marked: bool,
}

/// Owner of every guest table
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    total_allocated: u64,
    total_freed: u64,
}

/// Heap statistics for debugging/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live_tables: usize,
    pub capacity: usize,
    pub total_allocated: u64,
    pub total_freed: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a table into the heap and return its handle
    pub fn alloc(&mut self, table: Table) -> TableRef {
        self.live += 1;
        self.total_allocated += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.table = Some(table);
            slot.marked = false;
            return TableRef {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            table: Some(table),
            marked: false,
        });
        TableRef {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, table: TableRef) -> Option<&Table> {
        self.slots
            .get(table.index as usize)
            .filter(|slot| slot.generation == table.generation)
            .and_then(|slot| slot.table.as_ref())
    }

    pub fn get_mut(&mut self, table: TableRef) -> Option<&mut Table> {
        self.slots
            .get_mut(table.index as usize)
            .filter(|slot| slot.generation == table.generation)
            .and_then(|slot| slot.table.as_mut())
    }

    /// Number of tables currently alive
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_tables: self.live,
            capacity: self.slots.len(),
            total_allocated: self.total_allocated,
            total_freed: self.total_freed,
        }
    }

    /// Mark-sweep collection: free every table unreachable from `roots`.
    ///
    /// Returns the number of tables freed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = TableRef>) -> usize {
        for slot in self.slots.iter_mut() {
            slot.marked = false;
        }

        let mut worklist: Vec<TableRef> = roots.into_iter().collect();
        while let Some(table) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(table.index as usize) else {
                continue;
            };
            if slot.generation != table.generation || slot.marked {
                continue;
            }
            let Some(contents) = slot.table.as_ref() else {
                continue;
            };
            slot.marked = true;
            worklist.extend(contents.references());
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.table.is_some() && !slot.marked {
                slot.table = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        self.total_freed += freed as u64;
        freed
    }
}
