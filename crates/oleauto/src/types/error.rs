//! Automation error types

use std::fmt;

use thiserror::Error;

use super::identifiers::DispId;

/// Result type for automation operations
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Automation bridge errors
#[derive(Error, Debug)]
pub enum AutomationError {
    /// A host value has no Variant representation, or a Variant does not fit
    /// the requested host shape
    #[error("marshaling error: {0}")]
    Marshaling(String),

    /// The external model returned a failure status
    #[error(transparent)]
    Com(#[from] ComError),

    /// The apartment worker died while running a work item
    #[error("apartment fault: {0}")]
    ApartmentFault(String),

    /// The apartment could not accept or complete work
    #[error("apartment error: {0}")]
    Apartment(String),

    /// The interface declaration has no member with this host name
    #[error("no member {member:?} declared on {interface}")]
    UnknownMember { interface: String, member: String },

    /// The interface declaration is incomplete for the requested operation
    #[error("declaration error: {0}")]
    Declaration(String),

    /// The proxy has already released its external reference
    #[error("proxy for {0} has been disposed")]
    Disposed(String),

    /// Buffer underflow (not enough data)
    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Invalid data
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl AutomationError {
    /// The HRESULT carried by a native call failure, if any
    pub fn hresult(&self) -> Option<HResult> {
        match self {
            AutomationError::Com(e) => Some(e.hresult),
            _ => None,
        }
    }
}

/// Failure while delivering an event to a listener
///
/// These never travel back into the external model; they are handed to
/// the listener's error channel instead.
#[derive(Error, Debug)]
pub enum CallbackError {
    /// The sink has no member bound to this dispatch id
    #[error("no event bound to dispatch id {0}")]
    UnknownDispId(DispId),

    /// The member has no explicit dispatch id and sinks do not resolve names
    #[error("event {member} has no dispatch id and cannot be bound by name")]
    UnresolvedName { member: String },

    /// An argument could not be converted to its declared shape
    #[error("cannot decode arguments of {member}: {source}")]
    Decode {
        member: String,
        #[source]
        source: AutomationError,
    },

    /// The listener returned an error
    #[error("listener failed handling {member}: {source}")]
    Handler {
        member: String,
        #[source]
        source: AutomationError,
    },

    /// The listener panicked
    #[error("listener panicked handling {member}: {message}")]
    Panicked { member: String, message: String },

    /// No thread could be started to run the listener
    #[error("cannot start callback thread: {0}")]
    Spawn(String),
}

/// HRESULT status code returned by the external model
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub u32);

impl HResult {
    /// Check the severity bit
    pub fn is_failure(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Check for a success code (`S_OK`, `S_FALSE`, ...)
    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }

    /// Human-readable text for well-known codes
    pub fn message(&self) -> &'static str {
        match self.0 {
            hresult::S_OK => "The operation completed successfully.",
            hresult::S_FALSE => "The operation completed with a false result.",
            hresult::E_NOTIMPL => "Not implemented.",
            hresult::E_NOINTERFACE => "No such interface supported.",
            hresult::E_POINTER => "Invalid pointer.",
            hresult::E_FAIL => "Unspecified error.",
            hresult::E_UNEXPECTED => "Catastrophic failure.",
            hresult::E_ACCESSDENIED => "Access is denied.",
            hresult::E_OUTOFMEMORY => "Not enough memory resources are available.",
            hresult::E_INVALIDARG => "The parameter is incorrect.",
            hresult::REGDB_E_CLASSNOTREG => "Class not registered.",
            hresult::CO_E_CLASSSTRING => "Invalid class string.",
            hresult::CO_E_NOTINITIALIZED => "CoInitialize has not been called.",
            hresult::CO_E_OBJNOTCONNECTED => "Object is not connected to server.",
            hresult::MK_E_UNAVAILABLE => "Operation unavailable.",
            hresult::RPC_E_DISCONNECTED => "The object invoked has disconnected from its clients.",
            hresult::RPC_E_WRONG_THREAD => {
                "The application called an interface that was marshalled for a different thread."
            }
            hresult::DISP_E_UNKNOWNINTERFACE => "Unknown interface.",
            hresult::DISP_E_MEMBERNOTFOUND => "Member not found.",
            hresult::DISP_E_PARAMNOTFOUND => "Parameter not found.",
            hresult::DISP_E_TYPEMISMATCH => "Type mismatch.",
            hresult::DISP_E_UNKNOWNNAME => "Unknown name.",
            hresult::DISP_E_NONAMEDARGS => "No named arguments.",
            hresult::DISP_E_BADVARTYPE => "Bad variable type.",
            hresult::DISP_E_EXCEPTION => "Exception occurred.",
            hresult::DISP_E_OVERFLOW => "Out of present range.",
            hresult::DISP_E_BADPARAMCOUNT => "Invalid number of parameters.",
            hresult::CONNECT_E_NOCONNECTION => "There is no connection for this connection ID.",
            hresult::CONNECT_E_ADVISELIMIT => "This implementation's limit for advisory connections has been reached.",
            _ => "Unknown error.",
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HRESULT(0x{:08x})", self.0)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Failure reported by the external model
///
/// Carries the native status code plus, for dispatch calls, the
/// exception source/description pair filled in by the callee.
#[derive(Debug, Clone)]
pub struct ComError {
    /// Native status code
    pub hresult: HResult,
    /// Bridge operation that failed (e.g. `queryInterface`)
    pub context: String,
    /// Source reported by the callee's exception info
    pub exception_source: Option<String>,
    /// Description reported by the callee's exception info
    pub description: Option<String>,
    /// Index of the offending argument, if reported
    pub arg_err: Option<u32>,
}

impl ComError {
    /// Create an error from a bare status code
    pub fn new(context: impl Into<String>, hresult: HResult) -> Self {
        Self {
            hresult,
            context: context.into(),
            exception_source: None,
            description: None,
            arg_err: None,
        }
    }
}

impl fmt::Display for ComError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.context)?;
        match &self.description {
            Some(description) => write!(f, "{description}")?,
            None => write!(f, "{}", self.hresult.message())?,
        }
        if let Some(source) = &self.exception_source {
            write!(f, " [{source}]")?;
        }
        write!(f, " (HRESULT: {})", self.hresult)?;
        let arg_related = matches!(
            self.hresult.0,
            hresult::DISP_E_TYPEMISMATCH | hresult::DISP_E_PARAMNOTFOUND
        );
        if let (true, Some(arg)) = (arg_related, self.arg_err) {
            write!(f, " (puArgErr={arg})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ComError {}

/// HRESULT codes used by the automation bridge
pub mod hresult {
    /// Operation successful
    pub const S_OK: u32 = 0x00000000;
    /// Operation successful, returning false
    pub const S_FALSE: u32 = 0x00000001;
    /// Not implemented
    pub const E_NOTIMPL: u32 = 0x80004001;
    /// No such interface supported
    pub const E_NOINTERFACE: u32 = 0x80004002;
    /// Invalid pointer
    pub const E_POINTER: u32 = 0x80004003;
    /// Unspecified error
    pub const E_FAIL: u32 = 0x80004005;
    /// Catastrophic failure
    pub const E_UNEXPECTED: u32 = 0x8000FFFF;
    /// Access denied
    pub const E_ACCESSDENIED: u32 = 0x80070005;
    /// Out of memory
    pub const E_OUTOFMEMORY: u32 = 0x8007000E;
    /// Invalid argument
    pub const E_INVALIDARG: u32 = 0x80070057;
    /// Class not registered
    pub const REGDB_E_CLASSNOTREG: u32 = 0x80040154;
    /// Invalid class string (unknown prog-id)
    pub const CO_E_CLASSSTRING: u32 = 0x800401F3;
    /// Runtime not initialized on the calling thread
    pub const CO_E_NOTINITIALIZED: u32 = 0x800401F0;
    /// Object or server not available
    pub const CO_E_OBJNOTCONNECTED: u32 = 0x800401FD;
    /// Moniker operation unavailable (nothing running)
    pub const MK_E_UNAVAILABLE: u32 = 0x800401E3;
    /// Object disconnected from its clients
    pub const RPC_E_DISCONNECTED: u32 = 0x80010108;
    /// Interface called from a thread outside its apartment
    pub const RPC_E_WRONG_THREAD: u32 = 0x8001010E;
    /// Unknown interface
    pub const DISP_E_UNKNOWNINTERFACE: u32 = 0x80020001;
    /// Member not found
    pub const DISP_E_MEMBERNOTFOUND: u32 = 0x80020003;
    /// Parameter not found
    pub const DISP_E_PARAMNOTFOUND: u32 = 0x80020004;
    /// Type mismatch
    pub const DISP_E_TYPEMISMATCH: u32 = 0x80020005;
    /// Unknown name
    pub const DISP_E_UNKNOWNNAME: u32 = 0x80020006;
    /// No named arguments
    pub const DISP_E_NONAMEDARGS: u32 = 0x80020007;
    /// Bad variable type
    pub const DISP_E_BADVARTYPE: u32 = 0x80020008;
    /// Exception occurred (see exception info)
    pub const DISP_E_EXCEPTION: u32 = 0x80020009;
    /// Out of present range
    pub const DISP_E_OVERFLOW: u32 = 0x8002000A;
    /// Invalid number of parameters
    pub const DISP_E_BADPARAMCOUNT: u32 = 0x8002000E;
    /// No connection for this cookie / interface
    pub const CONNECT_E_NOCONNECTION: u32 = 0x80040200;
    /// Advise limit reached
    pub const CONNECT_E_ADVISELIMIT: u32 = 0x80040201;
}
