//! Guest stack API
//!
//! `GuestStack` is the surface the host bridge needs from a guest runtime:
//! push scalars and tables, assign table entries, inspect slot types, read
//! scalars back, and iterate tables with the stateful `next` protocol.
//!
//! Indexing follows the usual embedded-interpreter convention. Positive
//! indices are absolute within the current frame (1 is the bottom slot).
//! Negative indices count down from the top (-1 is the top slot).
//! An index that names no slot reports `GuestType::None`.

use crate::error::GuestError;
use crate::value::GuestType;

/// Pass to `call` to keep every result
pub const MULTRET: i32 = -1;

/// Stack-level access to a guest evaluation context
pub trait GuestStack {
    /// Index of the top slot (the number of slots in the current frame)
    fn top(&self) -> i32;

    /// Set the top: a non-negative index sets the frame size (padding with
    /// nil), a negative index is relative to the current top.
    fn set_top(&mut self, idx: i32);

    /// Ensure `extra` more values can be pushed
    fn check_stack(&mut self, extra: usize) -> Result<(), GuestError>;

    fn push_nil(&mut self);
    fn push_boolean(&mut self, b: bool);
    fn push_number(&mut self, n: f64);

    /// Push a string; the guest keeps its own copy of the bytes
    fn push_string(&mut self, bytes: &[u8]);

    /// Push a copy of the value at `idx`
    fn push_value(&mut self, idx: i32);

    /// Push a new empty table with space preallocated for `narr` array
    /// entries and `nrec` other entries
    fn new_table(&mut self, narr: usize, nrec: usize);

    /// `t[k] = v` where `t` is at `idx`, `v` is the top and `k` just below it.
    /// Pops both key and value.
    fn set_table(&mut self, idx: i32) -> Result<(), GuestError>;

    fn type_of(&self, idx: i32) -> GuestType;

    /// Truthiness of the value at `idx`
    fn to_boolean(&self, idx: i32) -> bool;

    /// Number at `idx`, without coercing strings
    fn to_number(&self, idx: i32) -> Option<f64>;

    /// Bytes of the string at `idx`, without coercing numbers.
    ///
    /// The slice stays valid while the value remains on the stack.
    fn to_bytes(&self, idx: i32) -> Option<&[u8]>;

    /// Identity of a table, function or userdata at `idx`
    fn to_pointer(&self, idx: i32) -> Option<usize>;

    /// Table iteration step: pops a key and pushes the next key/value pair
    /// of the table at `idx`, returning `true`. When the table is exhausted
    /// it pushes nothing and returns `false`. Push nil to begin.
    fn next(&mut self, idx: i32) -> Result<bool, GuestError>;

    /// Pop the top value and store it as a global named `name`
    fn set_global(&mut self, name: &str) -> Result<(), GuestError>;

    /// Push the global named `name`
    fn get_global(&mut self, name: &str) -> Result<(), GuestError>;

    /// Call the function below the top `nargs` values. The function and its
    /// arguments are replaced by its results, adjusted to `nresults` unless
    /// it is `MULTRET`.
    fn call(&mut self, nargs: i32, nresults: i32) -> Result<(), GuestError>;

    /// Pop `n` values
    fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    /// Convert a relative index into an absolute one
    fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 { idx } else { self.top() + idx + 1 }
    }
}

/// Render every slot of the current frame, one per line, as
/// `index<TAB>typename<TAB>value`.
///
/// Numbers print like C's `%g`: six significant digits, trailing zeros
/// dropped, exponent form outside `1e-4 <= |n| < 1e6` (`0.3`, `1e+20`).
pub fn dump_stack<S: GuestStack + ?Sized>(stack: &S) -> String {
    let mut out = String::new();
    for i in 1..=stack.top() {
        let ty = stack.type_of(i);
        let shown = match ty {
            GuestType::Number => stack.to_number(i).map(format_number),
            GuestType::String => stack
                .to_bytes(i)
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            GuestType::Boolean => Some(stack.to_boolean(i).to_string()),
            GuestType::Nil => Some("nil".to_string()),
            _ => stack.to_pointer(i).map(|p| format!("0x{:x}", p)),
        };
        out.push_str(&format!(
            "{}\t{}\t{}\n",
            i,
            ty.name(),
            shown.unwrap_or_default()
        ));
    }
    out
}

/// Six significant digits, `%g` style
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    // exponent after rounding to six digits
    let sci = format!("{:.5e}", n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if (-4..6).contains(&exp) {
        let fixed = format!("{:.*}", (5 - exp) as usize, n);
        trim_fraction(&fixed).to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(1e20), "1e+20");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(123456.0), "123456");
        assert_eq!(format_number(1234567.0), "1.23457e+06");
        assert_eq!(format_number(999999.7), "1e+06");
        assert_eq!(format_number(0.0001), "0.0001");
        assert_eq!(format_number(0.00001), "1e-05");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(f64::INFINITY), "inf");
        assert_eq!(format_number(f64::NAN), "nan");
    }
}
