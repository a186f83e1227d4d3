//! Native runtime seam
//!
//! Everything the bridge needs from the external object model is expressed
//! by the traits in this module. A `DispatchObject` is one external object
//! reached through its dispatch interface; a `ComRuntime` is the per-thread
//! runtime that creates and looks up those objects.
//!
//! Reference-count conventions follow the external model: any method that
//! hands out a [`RawDispatch`] has already added one count on behalf of the
//! caller, and the caller owns that count (see [`ComRef::adopt`]).

mod com_ref;

use std::fmt;
use std::sync::Arc;

use crate::types::{hresult, Clsid, DispId, HResult, Iid, Lcid};
use crate::variant::Variant;

pub use com_ref::ComRef;

/// Pointer to an external dispatch object
///
/// Cloning the `Arc` does not touch the external count.
pub type RawDispatch = Arc<dyn DispatchObject>;

/// Dispatch invocation kind
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchFlags(pub u16);

impl DispatchFlags {
    pub const METHOD: DispatchFlags = DispatchFlags(0x1);
    pub const PROPERTYGET: DispatchFlags = DispatchFlags(0x2);
    pub const PROPERTYPUT: DispatchFlags = DispatchFlags(0x4);
    pub const PROPERTYPUTREF: DispatchFlags = DispatchFlags(0x8);

    /// Check whether all bits of `other` are set
    pub fn contains(&self, other: DispatchFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether the call writes a property
    pub fn is_put(&self) -> bool {
        self.0 & (Self::PROPERTYPUT.0 | Self::PROPERTYPUTREF.0) != 0
    }
}

impl std::ops::BitOr for DispatchFlags {
    type Output = DispatchFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        DispatchFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for DispatchFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::METHOD) {
            names.push("METHOD");
        }
        if self.contains(Self::PROPERTYGET) {
            names.push("PROPERTYGET");
        }
        if self.contains(Self::PROPERTYPUT) {
            names.push("PROPERTYPUT");
        }
        if self.contains(Self::PROPERTYPUTREF) {
            names.push("PROPERTYPUTREF");
        }
        write!(f, "DispatchFlags({})", names.join("|"))
    }
}

/// Argument block of a dispatch call
///
/// `args` is in native order: the last declared argument comes first, and
/// named arguments occupy the leading slots, one per entry of `named_args`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispParams {
    pub args: Vec<Variant>,
    pub named_args: Vec<DispId>,
}

impl DispParams {
    /// Build a positional argument block from arguments in declared order
    pub fn positional(declared: Vec<Variant>) -> Self {
        let mut args = declared;
        args.reverse();
        Self { args, named_args: Vec::new() }
    }

    /// Build the argument block of a property put
    pub fn property_put(value: Variant) -> Self {
        Self {
            args: vec![value],
            named_args: vec![DispId::PROPERTYPUT],
        }
    }

    /// Number of positional (unnamed) arguments
    pub fn positional_count(&self) -> usize {
        self.args.len().saturating_sub(self.named_args.len())
    }
}

/// Exception details filled in by the callee when a dispatch fails with
/// `DISP_E_EXCEPTION`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExcepInfo {
    pub code: u16,
    pub source: Option<String>,
    pub description: Option<String>,
    pub scode: u32,
}

/// Failed dispatch call
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeFailure {
    pub hresult: HResult,
    pub excep_info: Option<ExcepInfo>,
    /// Native index of the offending argument
    pub arg_err: Option<u32>,
}

impl InvokeFailure {
    pub fn new(hresult: u32) -> Self {
        Self {
            hresult: HResult(hresult),
            excep_info: None,
            arg_err: None,
        }
    }

    /// A `DISP_E_EXCEPTION` failure carrying source and description
    pub fn exception(source: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            hresult: HResult(hresult::DISP_E_EXCEPTION),
            excep_info: Some(ExcepInfo {
                code: 0,
                source: Some(source.into()),
                description: Some(description.into()),
                scode: hresult::E_FAIL,
            }),
            arg_err: None,
        }
    }

    pub fn with_arg_err(mut self, index: u32) -> Self {
        self.arg_err = Some(index);
        self
    }
}

impl From<HResult> for InvokeFailure {
    fn from(hr: HResult) -> Self {
        Self {
            hresult: hr,
            excep_info: None,
            arg_err: None,
        }
    }
}

/// An external object reached through its dispatch interface
pub trait DispatchObject: Send + Sync {
    /// Add one external count; returns the new count (informational)
    fn add_ref(&self) -> u32;

    /// Drop one external count; returns the new count (informational)
    fn release(&self) -> u32;

    /// Query for another interface; the result carries one count
    fn query_interface(&self, iid: &Iid) -> std::result::Result<RawDispatch, HResult>;

    /// Map member names to dispatch ids
    fn get_ids_of_names(&self, names: &[&str], lcid: Lcid) -> std::result::Result<Vec<DispId>, HResult>;

    /// Invoke a member
    ///
    /// Object references in the returned Variant carry one count each.
    fn invoke(
        &self,
        dispid: DispId,
        lcid: Lcid,
        flags: DispatchFlags,
        params: &DispParams,
    ) -> std::result::Result<Variant, InvokeFailure>;

    /// Connect `sink` to the connection point for `events`
    fn advise(&self, events: &Iid, sink: RawDispatch) -> std::result::Result<u32, HResult> {
        let _ = (events, sink);
        Err(HResult(hresult::CONNECT_E_NOCONNECTION))
    }

    /// Disconnect a sink previously connected with [`advise`](Self::advise)
    fn unadvise(&self, events: &Iid, cookie: u32) -> std::result::Result<(), HResult> {
        let _ = (events, cookie);
        Err(HResult(hresult::CONNECT_E_NOCONNECTION))
    }
}

/// Apartment threading model passed to runtime initialization
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ThreadingModel {
    /// Single-threaded apartment
    Apartment,
    /// Multi-threaded apartment
    #[default]
    Multithreaded,
}

/// Display name of an entry in the running object table
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Moniker {
    pub display_name: String,
}

impl Moniker {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self { display_name: display_name.into() }
    }
}

impl fmt::Display for Moniker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Forward-only cursor over running object monikers
pub trait MonikerCursor: Send {
    fn reset(&mut self);

    fn next(&mut self) -> Option<Moniker>;
}

/// Session-wide directory of running objects
pub trait RawRunningObjectTable: Send + Sync {
    fn enum_running(&self) -> std::result::Result<Box<dyn MonikerCursor>, HResult>;

    /// Look up the object registered under `moniker`; the result carries one
    /// count
    fn get_object(&self, moniker: &Moniker) -> std::result::Result<RawDispatch, HResult>;
}

/// Per-thread external runtime
///
/// Every method except [`default_locale`](Self::default_locale) must be
/// called from a thread that completed [`initialize`](Self::initialize).
pub trait ComRuntime: Send + Sync {
    fn initialize(&self, model: ThreadingModel) -> std::result::Result<(), HResult>;

    fn uninitialize(&self);

    /// Resolve a programmatic identifier to a class id
    fn clsid_from_prog_id(&self, prog_id: &str) -> std::result::Result<Clsid, HResult>;

    /// Create an instance; the result carries one count
    fn create_instance(&self, clsid: &Clsid, iid: &Iid) -> std::result::Result<RawDispatch, HResult>;

    /// Fetch a registered active instance; the result carries one count
    fn get_active_object(&self, clsid: &Clsid) -> std::result::Result<RawDispatch, HResult>;

    fn running_object_table(&self) -> std::result::Result<Arc<dyn RawRunningObjectTable>, HResult>;

    fn default_locale(&self) -> Lcid {
        Lcid::USER_DEFAULT
    }
}
