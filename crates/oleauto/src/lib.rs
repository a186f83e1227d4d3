//! Late-bound automation bridge
//!
//! This crate lets host code drive external automation objects through
//! their dispatch interface: objects are created or located, wrapped in
//! proxies, called by member name with host values, and can push events
//! back into host listeners.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Host code                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ObjectFactory        │  DynamicProxy     │  CallbackSink   │
//! │  - create / fetch     │  - get/put/method │  - dispid match │
//! │  - weak registry      │  - name cache     │  - own threads  │
//! │  - running objects    │  - identity       │                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Variant converter    │  Apartment thread (one worker,      │
//! │  (host <-> external)  │  FIFO queue, runtime init/teardown) │
//! ├─────────────────────────────────────────────────────────────┤
//! │        ComRuntime seam (native or loopback runtime)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **Apartment**: the single thread every external call runs on
//! - **Dispatch id**: numeric member id, fixed or resolved by name
//! - **Variant**: tagged value crossing the boundary
//! - **Reference count**: every external pointer the bridge holds is
//!   released exactly once, on the apartment
//!
//! # Modules
//!
//! - [`types`]: Identifiers, status codes and errors
//! - [`runtime`]: The native runtime seam and owned references
//! - [`apartment`]: Apartment worker thread
//! - [`variant`]: External values, host values and conversion
//! - [`decl`]: Interface declarations
//! - [`factory`]: Object creation and the proxy registry
//! - [`proxy`]: Dynamic proxies
//! - [`callback`]: Event sinks
//! - [`rot`]: Running object enumeration
//! - [`loopback`]: In-process runtime

pub mod types;
pub mod runtime;
pub mod apartment;
pub mod variant;
pub mod decl;
pub mod factory;
pub mod proxy;
pub mod callback;
pub mod rot;
pub mod loopback;

// Re-export the types most callers need
pub use types::{
    AutomationError, CallbackError, ComError, Result,
    Clsid, DispId, HResult, Iid, Lcid,
};
pub use apartment::{ApartmentState, ApartmentThread};
pub use callback::{CallbackSink, ComEventListener, EventHandlers};
pub use decl::{ComInterface, InterfaceBuilder, InterfaceDecl, MemberDecl};
pub use factory::{FactoryConfig, ObjectFactory};
pub use proxy::{DynamicProxy, EventSubscription};
pub use rot::{RunningObjectTable, RunningObjects};
pub use runtime::{ComRuntime, DispatchObject, ThreadingModel};
pub use variant::{EnumDecl, EnumValue, Value, ValueKind, Variant};

/// Default bound on apartment teardown, in milliseconds
pub const DEFAULT_TERMINATE_TIMEOUT_MS: u64 = 5000;
