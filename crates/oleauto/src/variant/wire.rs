//! Variant binary encoding
//!
//! Layout: little-endian `u16` VARTYPE, then the payload.
//! - VT_BOOL: `i16`, 0 or -1
//! - VT_BSTR: `u32` byte length, then UTF-16LE code units
//! - VT_DATE: `f64` OLE date
//! - VT_ARRAY|VT_VARIANT: `u32` element count, then each element encoded
//!
//! Object references are process-local and have no encoding. Arrays nest at
//! most [`MAX_NESTING_DEPTH`] levels deep.

use bytes::{Buf, BufMut};

use super::vt::*;
use super::Variant;
use crate::types::{AutomationError, Result};

/// Deepest array nesting `decode` accepts
pub const MAX_NESTING_DEPTH: usize = 64;

/// Bytes needed to encode `variant`
pub fn encoded_size(variant: &Variant) -> usize {
    2 + match variant {
        Variant::Empty | Variant::Null => 0,
        Variant::Bool(_) | Variant::I2(_) => 2,
        Variant::I4(_) | Variant::R4(_) => 4,
        Variant::I8(_) | Variant::R8(_) | Variant::Date(_) => 8,
        Variant::BStr(s) => 4 + s.encode_utf16().count() * 2,
        Variant::Dispatch(_) => 0,
        Variant::Array(items) => 4 + items.iter().map(encoded_size).sum::<usize>(),
    }
}

/// Encode a variant
pub fn encode<B: BufMut>(variant: &Variant, buf: &mut B) -> Result<()> {
    buf.put_u16_le(variant.vt());
    match variant {
        Variant::Empty | Variant::Null => {}
        Variant::Bool(v) => buf.put_i16_le(if *v { -1 } else { 0 }),
        Variant::I2(v) => buf.put_i16_le(*v),
        Variant::I4(v) => buf.put_i32_le(*v),
        Variant::I8(v) => buf.put_i64_le(*v),
        Variant::R4(v) => buf.put_f32_le(*v),
        Variant::R8(v) | Variant::Date(v) => buf.put_f64_le(*v),
        Variant::BStr(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            buf.put_u32_le((units.len() * 2) as u32);
            for unit in units {
                buf.put_u16_le(unit);
            }
        }
        Variant::Dispatch(_) => {
            return Err(AutomationError::Marshaling(
                "object references have no wire representation".to_string(),
            ))
        }
        Variant::Array(items) => {
            buf.put_u32_le(items.len() as u32);
            for item in items {
                encode(item, buf)?;
            }
        }
    }
    Ok(())
}

fn need<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(AutomationError::BufferUnderflow {
            needed,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// Decode one variant
pub fn decode<B: Buf>(buf: &mut B) -> Result<Variant> {
    decode_nested(buf, 0)
}

fn decode_nested<B: Buf>(buf: &mut B, depth: usize) -> Result<Variant> {
    need(buf, 2)?;
    let vt = buf.get_u16_le();
    let variant = match vt {
        VT_EMPTY => Variant::Empty,
        VT_NULL => Variant::Null,
        VT_BOOL => {
            need(buf, 2)?;
            match buf.get_i16_le() {
                0 => Variant::Bool(false),
                -1 => Variant::Bool(true),
                other => {
                    return Err(AutomationError::InvalidData(format!(
                        "VT_BOOL payload must be 0 or -1, got {other}"
                    )))
                }
            }
        }
        VT_I2 => {
            need(buf, 2)?;
            Variant::I2(buf.get_i16_le())
        }
        VT_I4 => {
            need(buf, 4)?;
            Variant::I4(buf.get_i32_le())
        }
        VT_I8 => {
            need(buf, 8)?;
            Variant::I8(buf.get_i64_le())
        }
        VT_R4 => {
            need(buf, 4)?;
            Variant::R4(buf.get_f32_le())
        }
        VT_R8 => {
            need(buf, 8)?;
            Variant::R8(buf.get_f64_le())
        }
        VT_DATE => {
            need(buf, 8)?;
            let date = buf.get_f64_le();
            if !date.is_finite() {
                return Err(AutomationError::InvalidData(format!("VT_DATE payload {date} is not finite")));
            }
            Variant::Date(date)
        }
        VT_BSTR => {
            need(buf, 4)?;
            let len = buf.get_u32_le() as usize;
            if len % 2 != 0 {
                return Err(AutomationError::InvalidData(format!("odd VT_BSTR byte length {len}")));
            }
            need(buf, len)?;
            let units: Vec<u16> = (0..len / 2).map(|_| buf.get_u16_le()).collect();
            let text = String::from_utf16(&units)
                .map_err(|_| AutomationError::InvalidData("VT_BSTR is not valid UTF-16".to_string()))?;
            Variant::BStr(text)
        }
        VT_DISPATCH => {
            return Err(AutomationError::InvalidData(
                "VT_DISPATCH cannot be decoded from a buffer".to_string(),
            ))
        }
        code if code == VT_ARRAY | VT_VARIANT => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(AutomationError::InvalidData(format!(
                    "arrays nested deeper than {MAX_NESTING_DEPTH} levels"
                )));
            }
            need(buf, 4)?;
            let count = buf.get_u32_le() as usize;
            // Every element needs at least its discriminant
            need(buf, count.saturating_mul(2))?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_nested(buf, depth + 1)?);
            }
            Variant::Array(items)
        }
        other => return Err(AutomationError::InvalidData(format!("unsupported VARTYPE 0x{other:04x}"))),
    };
    Ok(variant)
}
