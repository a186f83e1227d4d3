//! Host-side values and value shapes

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::decl::InterfaceDecl;
use crate::proxy::DynamicProxy;

/// Closed set of named integer constants
#[derive(Debug, PartialEq, Eq)]
pub struct EnumDecl {
    name: String,
    constants: Vec<(String, i64)>,
}

impl EnumDecl {
    /// Declare an enumeration from `(name, value)` pairs
    pub fn new<S: Into<String>>(name: impl Into<String>, constants: impl IntoIterator<Item = (S, i64)>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            constants: constants.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a constant by symbolic name
    pub fn value(self: &Arc<Self>, name: &str) -> Option<EnumValue> {
        self.constants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, v)| EnumValue { decl: self.clone(), name: n.clone(), value: *v })
    }

    /// Look up a constant by its integer value
    pub fn from_value(self: &Arc<Self>, value: i64) -> Option<EnumValue> {
        self.constants
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, v)| EnumValue { decl: self.clone(), name: n.clone(), value: *v })
    }
}

/// One constant of an [`EnumDecl`]
#[derive(Clone)]
pub struct EnumValue {
    decl: Arc<EnumDecl>,
    name: String,
    value: i64,
}

impl EnumValue {
    pub fn decl(&self) -> &Arc<EnumDecl> {
        &self.decl
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The integer carried across the boundary
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.decl.name == other.decl.name && self.value == other.value
    }
}

impl fmt::Debug for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}({})", self.decl.name, self.name, self.value)
    }
}

/// Host value exchanged with client code
#[derive(Clone)]
pub enum Value {
    Empty,
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Date(NaiveDateTime),
    Enum(EnumValue),
    Object(DynamicProxy),
    Array(Vec<Value>),
    /// Arbitrary host object; has no external representation
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer content, widened losslessly
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::Enum(e) => Some(e.value()),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&DynamicProxy> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<DynamicProxy> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Check for `Empty` or `Null`
    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Empty | Value::Null)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::I16(v) => write!(f, "I16({v})"),
            Value::I32(v) => write!(f, "I32({v})"),
            Value::I64(v) => write!(f, "I64({v})"),
            Value::F32(v) => write!(f, "F32({v})"),
            Value::F64(v) => write!(f, "F64({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::Date(v) => write!(f, "Date({v})"),
            Value::Enum(v) => write!(f, "Enum({v:?})"),
            Value::Object(v) => write!(f, "Object({v})"),
            Value::Array(v) => f.debug_tuple("Array").field(v).finish(),
            Value::Opaque(_) => write!(f, "Opaque"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Date(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<DynamicProxy> for Value {
    fn from(v: DynamicProxy) -> Self {
        Value::Object(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// Declared shape of a parameter or return value
#[derive(Clone, Debug)]
pub enum ValueKind {
    /// Whatever the Variant naturally maps to
    Any,
    /// No value (returns only)
    Void,
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Str,
    Date,
    Enum(Arc<EnumDecl>),
    /// Object reference, wrapped with the given declaration (generic
    /// dispatch when `None`)
    Object(Option<Arc<InterfaceDecl>>),
    Array(Box<ValueKind>),
}

impl ValueKind {
    /// Value used when an event arrives without this argument
    ///
    /// Primitive shapes get their zero value; everything else is `Empty`.
    pub fn default_value(&self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::I16 => Value::I16(0),
            ValueKind::I32 => Value::I32(0),
            ValueKind::I64 => Value::I64(0),
            ValueKind::F32 => Value::F32(0.0),
            ValueKind::F64 => Value::F64(0.0),
            _ => Value::Empty,
        }
    }

    /// Shape of `T` when wrapped as an object
    pub fn object(decl: Arc<InterfaceDecl>) -> Self {
        ValueKind::Object(Some(decl))
    }

    pub fn array_of(element: ValueKind) -> Self {
        ValueKind::Array(Box::new(element))
    }
}
