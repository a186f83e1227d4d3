//! Conversion between host values and Variants
//!
//! `to_external` never adds external counts: object references point at the
//! proxy's own reference, which stays valid as long as the source `Value`
//! is alive. `to_host` wraps object references in new proxies through the
//! factory, so they join the registry like any other proxy.

use chrono::{DateTime, NaiveDateTime};

use super::{Value, ValueKind, Variant};
use crate::decl::InterfaceDecl;
use crate::factory::ObjectFactory;
use crate::runtime::ComRef;
use crate::types::{AutomationError, Result};

/// Days from 1899-12-30 (OLE date zero) to 1970-01-01
const OLE_UNIX_EPOCH_DAYS: f64 = 25_569.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Who owns the counts of object references inside a Variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Each reference carries a count that the conversion consumes
    /// (dispatch results)
    Owned,
    /// The caller keeps its counts (callback arguments)
    Borrowed,
}

/// Convert a host value to its external representation
///
/// Returns `None` when the value cannot be marshaled: opaque host objects,
/// disposed proxies, and arrays containing either.
pub fn to_external(value: &Value) -> Option<Variant> {
    let variant = match value {
        Value::Empty => Variant::Empty,
        Value::Null => Variant::Null,
        Value::Bool(v) => Variant::Bool(*v),
        Value::I16(v) => Variant::I2(*v),
        Value::I32(v) => Variant::I4(*v),
        Value::I64(v) => Variant::I8(*v),
        Value::F32(v) => Variant::R4(*v),
        Value::F64(v) => Variant::R8(*v),
        Value::Str(v) => Variant::BStr(v.clone()),
        Value::Date(v) => Variant::Date(ole_date_from_datetime(v)),
        Value::Enum(v) => Variant::I8(v.value()),
        Value::Object(proxy) => Variant::Dispatch(Some(proxy.raw_dispatch()?)),
        Value::Array(items) => Variant::Array(items.iter().map(to_external).collect::<Option<Vec<_>>>()?),
        Value::Opaque(_) => return None,
    };
    Some(variant)
}

/// Convert an external value to the host shape `target`
///
/// With [`Ownership::Owned`] every object reference in `variant` is released
/// exactly once before returning, on success and on failure alike.
pub fn to_host(variant: Variant, target: &ValueKind, ownership: Ownership, factory: &ObjectFactory) -> Result<Value> {
    let mut pins = Vec::new();
    if ownership == Ownership::Owned {
        variant.for_each_dispatch(&mut |raw| pins.push(ComRef::adopt(raw.clone())));
    }
    let value = convert(variant, target, factory);
    drop(pins);
    value
}

fn convert(variant: Variant, target: &ValueKind, factory: &ObjectFactory) -> Result<Value> {
    match (target, variant) {
        (_, Variant::Empty) => Ok(Value::Empty),
        (_, Variant::Null) => Ok(Value::Null),
        (ValueKind::Void, _) => Ok(Value::Empty),
        (ValueKind::Any, variant) => natural(variant, factory),
        (ValueKind::Bool, Variant::Bool(v)) => Ok(Value::Bool(v)),
        (ValueKind::I16, variant) => narrow(&variant, target).map(Value::I16),
        (ValueKind::I32, variant) => narrow(&variant, target).map(Value::I32),
        (ValueKind::I64, variant) => narrow(&variant, target).map(Value::I64),
        (ValueKind::F32, Variant::R4(v)) => Ok(Value::F32(v)),
        (ValueKind::F32, variant) => {
            let wide = float(&variant).ok_or_else(|| mismatch(&variant, target))?;
            let narrowed = wide as f32;
            if f64::from(narrowed) == wide || wide.is_nan() {
                Ok(Value::F32(narrowed))
            } else {
                Err(AutomationError::Marshaling(format!("{wide} is not representable as F32")))
            }
        }
        (ValueKind::F64, variant) => float(&variant).map(Value::F64).ok_or_else(|| mismatch(&variant, target)),
        (ValueKind::Str, Variant::BStr(v)) => Ok(Value::Str(v)),
        (ValueKind::Date, Variant::Date(v) | Variant::R8(v)) => datetime_from_ole_date(v).map(Value::Date),
        (ValueKind::Enum(decl), variant) => {
            let raw = integer(&variant).ok_or_else(|| mismatch(&variant, target))?;
            decl.from_value(raw).map(Value::Enum).ok_or_else(|| {
                AutomationError::Marshaling(format!("{raw} is not a constant of {}", decl.name()))
            })
        }
        (ValueKind::Object(_), Variant::Dispatch(None)) => Ok(Value::Null),
        (ValueKind::Object(decl), Variant::Dispatch(Some(raw))) => {
            let decl = decl.clone().unwrap_or_else(InterfaceDecl::dispatch);
            factory.create_proxy(&raw, decl).map(Value::Object)
        }
        (ValueKind::Array(element), Variant::Array(items)) => items
            .into_iter()
            .map(|item| convert(item, element, factory))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (target, variant) => Err(mismatch(&variant, target)),
    }
}

/// Mapping used when no shape is declared
fn natural(variant: Variant, factory: &ObjectFactory) -> Result<Value> {
    Ok(match variant {
        Variant::Empty => Value::Empty,
        Variant::Null | Variant::Dispatch(None) => Value::Null,
        Variant::Bool(v) => Value::Bool(v),
        Variant::I2(v) => Value::I16(v),
        Variant::I4(v) => Value::I32(v),
        Variant::I8(v) => Value::I64(v),
        Variant::R4(v) => Value::F32(v),
        Variant::R8(v) => Value::F64(v),
        Variant::BStr(v) => Value::Str(v),
        Variant::Date(v) => Value::Date(datetime_from_ole_date(v)?),
        Variant::Dispatch(Some(raw)) => Value::Object(factory.create_proxy(&raw, InterfaceDecl::dispatch())?),
        Variant::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| natural(item, factory))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

fn integer(variant: &Variant) -> Option<i64> {
    match variant {
        Variant::I2(v) => Some(i64::from(*v)),
        Variant::I4(v) => Some(i64::from(*v)),
        Variant::I8(v) => Some(*v),
        _ => None,
    }
}

fn float(variant: &Variant) -> Option<f64> {
    match variant {
        Variant::R4(v) => Some(f64::from(*v)),
        Variant::R8(v) => Some(*v),
        Variant::I2(v) => Some(f64::from(*v)),
        Variant::I4(v) => Some(f64::from(*v)),
        _ => None,
    }
}

/// Integer conversion that refuses to truncate
fn narrow<T: TryFrom<i64>>(variant: &Variant, target: &ValueKind) -> Result<T> {
    let wide = integer(variant).ok_or_else(|| mismatch(variant, target))?;
    T::try_from(wide).map_err(|_| AutomationError::Marshaling(format!("{wide} is out of range for {target:?}")))
}

fn mismatch(variant: &Variant, target: &ValueKind) -> AutomationError {
    AutomationError::Marshaling(format!("cannot convert {} to {target:?}", variant.type_name()))
}

/// Encode a timestamp as an OLE automation date
///
/// Dates before 1899-12-30 keep a negative day part and a positive time
/// fraction, so -1.25 is 1899-12-29 06:00.
pub fn ole_date_from_datetime(value: &NaiveDateTime) -> f64 {
    let linear = value.and_utc().timestamp_millis() as f64 / MILLIS_PER_DAY + OLE_UNIX_EPOCH_DAYS;
    if linear >= 0.0 {
        return linear;
    }
    let day = linear.floor();
    let fraction = linear - day;
    day - fraction
}

/// Decode an OLE automation date, rounding to the millisecond
pub fn datetime_from_ole_date(value: f64) -> Result<NaiveDateTime> {
    if !value.is_finite() {
        return Err(AutomationError::Marshaling(format!("{value} is not a valid OLE date")));
    }
    let linear = if value >= 0.0 {
        value
    } else {
        let day = value.trunc();
        day + (value - day).abs()
    };
    let millis = ((linear - OLE_UNIX_EPOCH_DAYS) * MILLIS_PER_DAY).round() as i64;
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| AutomationError::Marshaling(format!("OLE date {value} is out of range")))
}

/// Turn row-major 2-D data into column-major
///
/// Some consumers read arrays column-first; callers producing data for them
/// transpose explicitly. Ragged input is rejected.
pub fn transpose(rows: &[Vec<Variant>]) -> Result<Vec<Vec<Variant>>> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().position(|row| row.len() != width) {
        return Err(AutomationError::Marshaling(format!(
            "row {row} has {} columns, expected {width}",
            rows[row].len()
        )));
    }
    Ok((0..width)
        .map(|column| rows.iter().map(|row| row[column].clone()).collect())
        .collect())
}
