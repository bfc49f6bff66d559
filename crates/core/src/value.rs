//! Guest values
//!
//! `GuestValue` is what the guest runtime talks about: the four categories a
//! host can exchange with it (boolean, number, string, table) plus nil and
//! the kinds that stay on the guest side of the boundary (functions and light
//! userdata).
//!
//! Tables are not stored inline. A `GuestValue::Table` is a handle into the
//! runtime's heap, so two values can alias the same table and the heap (not
//! the holder of the handle) decides when the table is freed.

use crate::error::GuestError;
use crate::heap::TableRef;
use crate::vm::Vm;
use std::rc::Rc;

/// Type tag for a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestType {
    /// The index does not refer to a slot in the current frame
    None,
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    LightUserdata,
}

impl GuestType {
    /// Name used in guest error messages and stack dumps
    pub fn name(self) -> &'static str {
        match self {
            GuestType::None => "no value",
            GuestType::Nil => "nil",
            GuestType::Boolean => "boolean",
            GuestType::Number => "number",
            GuestType::String => "string",
            GuestType::Table => "table",
            GuestType::Function => "function",
            GuestType::LightUserdata => "userdata",
        }
    }
}

impl std::fmt::Display for GuestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature of a native function callable from the guest.
///
/// The function sees only its own frame: index 1 is its first argument.
/// It returns how many values on top of its frame are results.
pub type NativeFn = fn(&mut Vm) -> Result<i32, GuestError>;

/// A named native function
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl NativeFunction {
    pub const fn new(name: &'static str, func: NativeFn) -> Self {
        Self { name, func }
    }

    /// Address of the function, used as its identity
    pub fn addr(&self) -> usize {
        self.func as usize
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "function: {} (0x{:x})", self.name, self.addr())
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

/// A value held in a stack slot or table entry
#[derive(Debug, Clone, PartialEq)]
pub enum GuestValue {
    Nil,
    Boolean(bool),
    /// Numbers are IEEE 754 doubles; there is no separate integer subtype
    Number(f64),
    /// Byte string owned by the guest (not required to be UTF-8)
    String(Rc<[u8]>),
    Table(TableRef),
    Function(NativeFunction),
    LightUserdata(usize),
}

impl GuestValue {
    /// Build a guest string from host text (the guest gets its own copy)
    pub fn string(s: &str) -> Self {
        GuestValue::String(Rc::from(s.as_bytes()))
    }

    pub fn type_of(&self) -> GuestType {
        match self {
            GuestValue::Nil => GuestType::Nil,
            GuestValue::Boolean(_) => GuestType::Boolean,
            GuestValue::Number(_) => GuestType::Number,
            GuestValue::String(_) => GuestType::String,
            GuestValue::Table(_) => GuestType::Table,
            GuestValue::Function(_) => GuestType::Function,
            GuestValue::LightUserdata(_) => GuestType::LightUserdata,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, GuestValue::Nil)
    }

    /// Guest truthiness: only nil and false are false
    pub fn truthy(&self) -> bool {
        !matches!(self, GuestValue::Nil | GuestValue::Boolean(false))
    }

    pub fn as_table(&self) -> Option<TableRef> {
        match self {
            GuestValue::Table(t) => Some(*t),
            _ => None,
        }
    }
}
