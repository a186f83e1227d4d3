//! Core automation types
//!
//! This module contains the identifiers and error types shared by every
//! layer of the bridge:
//! - Identifiers: IID, CLSID, DISPID, LCID
//! - Status codes: HRESULT and the well-known constants
//! - Errors: the bridge error enum and native call failures

mod error;
mod identifiers;

pub use error::*;
pub use identifiers::{Clsid, DispId, Iid, Lcid};
