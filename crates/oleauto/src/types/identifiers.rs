//! Automation identifier types
//!
//! These are the identifiers that cross the boundary into the external
//! object model and must be preserved exactly:
//! - IID: Interface Identifier (used for interface queries)
//! - CLSID: Class Identifier (used for object creation)
//! - DISPID: Dispatch Identifier (member id on a dispatch interface)
//! - LCID: Locale Identifier (threaded through every dispatch call)

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use super::error::{AutomationError, Result};

/// Parse a GUID in registry format, with or without surrounding braces
fn parse_guid(s: &str) -> Result<Uuid> {
    let trimmed = s.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(trimmed);
    Uuid::parse_str(inner).map_err(|e| AutomationError::InvalidData(format!("invalid GUID {s:?}: {e}")))
}

/// Interface Identifier (16 bytes / GUID)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iid(pub Uuid);

impl Iid {
    /// Null IID, used as the reserved `riid` argument of dispatch calls
    pub const NULL: Iid = Iid(Uuid::nil());

    /// IUnknown: basic reference-counted identity
    pub const IUNKNOWN: Iid = Iid(Uuid::from_u128(0x00000000_0000_0000_c000_000000000046));

    /// IDispatch: generic late-bound dispatch capability
    pub const IDISPATCH: Iid = Iid(Uuid::from_u128(0x00020400_0000_0000_c000_000000000046));

    /// IConnectionPointContainer
    pub const ICONNECTIONPOINTCONTAINER: Iid =
        Iid(Uuid::from_u128(0xb196b284_bab4_101a_b69c_00aa00341d07));

    /// Parse from string format "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
    pub fn parse(s: &str) -> Result<Self> {
        parse_guid(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> &Uuid {
        &self.0
    }

    /// Check if this is the null IID
    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

impl FromStr for Iid {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IID({{{}}})", self.0.hyphenated())
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

/// Class Identifier (16 bytes / GUID)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Clsid(pub Uuid);

impl Clsid {
    /// Parse from string format, braces optional
    pub fn parse(s: &str) -> Result<Self> {
        parse_guid(s).map(Self)
    }

    /// Generate a random CLSID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for Clsid {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for Clsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CLSID({{{}}})", self.0.hyphenated())
    }
}

impl fmt::Display for Clsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

/// Dispatch Identifier
///
/// Numeric member id on a dispatch interface. Negative values are reserved
/// by the automation model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispId(pub i32);

impl DispId {
    /// Default member
    pub const VALUE: DispId = DispId(0);
    /// Unknown member (returned by failed name lookups)
    pub const UNKNOWN: DispId = DispId(-1);
    /// Named argument carrying the new value of a property put
    pub const PROPERTYPUT: DispId = DispId(-3);
    /// Enumerator member (`_NewEnum`)
    pub const NEWENUM: DispId = DispId(-4);
}

impl fmt::Debug for DispId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DISPID({})", self.0)
    }
}

impl fmt::Display for DispId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for DispId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Locale Identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lcid(pub u32);

impl Lcid {
    /// The calling user's default locale
    pub const USER_DEFAULT: Lcid = Lcid(0x0400);
    /// The system default locale
    pub const SYSTEM_DEFAULT: Lcid = Lcid(0x0800);
    /// Locale-neutral
    pub const NEUTRAL: Lcid = Lcid(0x0000);
    /// English (United States)
    pub const EN_US: Lcid = Lcid(0x0409);
}

impl fmt::Debug for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LCID(0x{:04x})", self.0)
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
