//! Variant values
//!
//! The external model exchanges values as a tagged union (VARIANT). This
//! module holds both sides of the boundary:
//! - [`Variant`]: the external representation handed to dispatch calls
//! - [`Value`]: the host representation returned to client code
//! - [`convert`]: the bidirectional converter between the two
//! - [`wire`]: the binary encoding of the tagged union

pub mod convert;
mod value;
pub mod wire;

use std::fmt;
use std::sync::Arc;

use crate::runtime::RawDispatch;

pub use convert::{to_external, to_host, transpose, Ownership};
pub use value::{EnumDecl, EnumValue, Value, ValueKind};

/// VARTYPE discriminants (wire contract, must not change)
pub mod vt {
    pub const VT_EMPTY: u16 = 0;
    pub const VT_NULL: u16 = 1;
    pub const VT_I2: u16 = 2;
    pub const VT_I4: u16 = 3;
    pub const VT_R4: u16 = 4;
    pub const VT_R8: u16 = 5;
    pub const VT_DATE: u16 = 7;
    pub const VT_BSTR: u16 = 8;
    pub const VT_DISPATCH: u16 = 9;
    pub const VT_BOOL: u16 = 11;
    pub const VT_VARIANT: u16 = 12;
    pub const VT_I8: u16 = 20;
    pub const VT_ARRAY: u16 = 0x2000;
}

/// External tagged-union value
///
/// The Rust variant is the discriminant, so a payload can never disagree
/// with its tag inside the process. Object references are plain pointers:
/// whether a `Dispatch` payload carries a count depends on where the value
/// came from (see [`Ownership`]).
#[derive(Clone)]
pub enum Variant {
    Empty,
    Null,
    Bool(bool),
    I2(i16),
    I4(i32),
    I8(i64),
    R4(f32),
    R8(f64),
    BStr(String),
    /// OLE automation date: days since 1899-12-30, time as the fraction
    Date(f64),
    Dispatch(Option<RawDispatch>),
    /// Single-dimension array of variants, row-major
    Array(Vec<Variant>),
}

impl Variant {
    /// The VARTYPE code of this value
    pub fn vt(&self) -> u16 {
        match self {
            Variant::Empty => vt::VT_EMPTY,
            Variant::Null => vt::VT_NULL,
            Variant::Bool(_) => vt::VT_BOOL,
            Variant::I2(_) => vt::VT_I2,
            Variant::I4(_) => vt::VT_I4,
            Variant::I8(_) => vt::VT_I8,
            Variant::R4(_) => vt::VT_R4,
            Variant::R8(_) => vt::VT_R8,
            Variant::BStr(_) => vt::VT_BSTR,
            Variant::Date(_) => vt::VT_DATE,
            Variant::Dispatch(_) => vt::VT_DISPATCH,
            Variant::Array(_) => vt::VT_ARRAY | vt::VT_VARIANT,
        }
    }

    /// Name of the discriminant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Empty => "VT_EMPTY",
            Variant::Null => "VT_NULL",
            Variant::Bool(_) => "VT_BOOL",
            Variant::I2(_) => "VT_I2",
            Variant::I4(_) => "VT_I4",
            Variant::I8(_) => "VT_I8",
            Variant::R4(_) => "VT_R4",
            Variant::R8(_) => "VT_R8",
            Variant::BStr(_) => "VT_BSTR",
            Variant::Date(_) => "VT_DATE",
            Variant::Dispatch(_) => "VT_DISPATCH",
            Variant::Array(_) => "VT_ARRAY|VT_VARIANT",
        }
    }

    /// Check for VT_EMPTY or VT_NULL
    pub fn is_nothing(&self) -> bool {
        matches!(self, Variant::Empty | Variant::Null)
    }

    /// Visit every object reference, descending into arrays
    pub fn for_each_dispatch(&self, f: &mut impl FnMut(&RawDispatch)) {
        match self {
            Variant::Dispatch(Some(raw)) => f(raw),
            Variant::Array(items) => items.iter().for_each(|item| item.for_each_dispatch(f)),
            _ => {}
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Empty
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Empty, Variant::Empty) | (Variant::Null, Variant::Null) => true,
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::I2(a), Variant::I2(b)) => a == b,
            (Variant::I4(a), Variant::I4(b)) => a == b,
            (Variant::I8(a), Variant::I8(b)) => a == b,
            (Variant::R4(a), Variant::R4(b)) => a == b,
            (Variant::R8(a), Variant::R8(b)) => a == b,
            (Variant::BStr(a), Variant::BStr(b)) => a == b,
            (Variant::Date(a), Variant::Date(b)) => a == b,
            (Variant::Dispatch(a), Variant::Dispatch(b)) => match (a, b) {
                (Some(a), Some(b)) => Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const (),
                (None, None) => true,
                _ => false,
            },
            (Variant::Array(a), Variant::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "Empty"),
            Variant::Null => write!(f, "Null"),
            Variant::Bool(v) => write!(f, "Bool({v})"),
            Variant::I2(v) => write!(f, "I2({v})"),
            Variant::I4(v) => write!(f, "I4({v})"),
            Variant::I8(v) => write!(f, "I8({v})"),
            Variant::R4(v) => write!(f, "R4({v})"),
            Variant::R8(v) => write!(f, "R8({v})"),
            Variant::BStr(v) => write!(f, "BStr({v:?})"),
            Variant::Date(v) => write!(f, "Date({v})"),
            Variant::Dispatch(Some(raw)) => write!(f, "Dispatch({:p})", Arc::as_ptr(raw) as *const ()),
            Variant::Dispatch(None) => write!(f, "Dispatch(null)"),
            Variant::Array(items) => f.debug_tuple("Array").field(items).finish(),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i16> for Variant {
    fn from(v: i16) -> Self {
        Variant::I2(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::I4(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::I8(v)
    }
}

impl From<f32> for Variant {
    fn from(v: f32) -> Self {
        Variant::R4(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::R8(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::BStr(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::BStr(v)
    }
}
