//! Event callback sinks
//!
//! A [`CallbackSink`] is a dispatch object the bridge hands to an external
//! connection point. Each incoming event is matched to a declared member by
//! dispatch id, its arguments are pinned, and the listener runs on a fresh
//! thread so the source is never blocked by host code. Listener failures
//! are reported through [`ComEventListener::callback_error`] and never
//! travel back to the source.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

use tracing::{debug, error, trace, warn};

use crate::apartment::panic_message;
use crate::decl::{InterfaceDecl, MemberDecl};
use crate::factory::ObjectFactory;
use crate::runtime::{ComRef, DispParams, DispatchFlags, DispatchObject, InvokeFailure, RawDispatch};
use crate::types::{hresult, AutomationError, CallbackError, DispId, HResult, Iid, Lcid, Result};
use crate::variant::{to_host, Ownership, Value, Variant};

/// Receives events delivered through a [`CallbackSink`]
pub trait ComEventListener: Send + Sync + 'static {
    /// Handle one event; `event` is the member's host name and `args` are
    /// in declared order
    fn handle(&self, event: &str, args: Vec<Value>) -> Result<()>;

    /// Report a failure that happened while delivering an event
    fn callback_error(&self, error: CallbackError) {
        error!(%error, "event delivery failed");
    }
}

type Handler = Box<dyn Fn(Vec<Value>) -> Result<()> + Send + Sync>;
type ErrorHandler = Box<dyn Fn(CallbackError) + Send + Sync>;

/// Listener built from per-event closures
///
/// Events without a handler are ignored.
#[derive(Default)]
pub struct EventHandlers {
    handlers: HashMap<String, Handler>,
    on_error: Option<ErrorHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, event: impl Into<String>, handler: impl Fn(Vec<Value>) -> Result<()> + Send + Sync + 'static) -> Self {
        self.handlers.insert(event.into(), Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(CallbackError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }
}

impl ComEventListener for EventHandlers {
    fn handle(&self, event: &str, args: Vec<Value>) -> Result<()> {
        match self.handlers.get(event) {
            Some(handler) => handler(args),
            None => {
                trace!(event, "no handler for event");
                Ok(())
            }
        }
    }

    fn callback_error(&self, error: CallbackError) {
        match &self.on_error {
            Some(handler) => handler(error),
            None => error!(%error, "event delivery failed"),
        }
    }
}

/// Dispatch object delivering events of one interface to a listener
pub struct CallbackSink {
    this: Weak<CallbackSink>,
    factory: ObjectFactory,
    decl: Arc<InterfaceDecl>,
    members: HashMap<DispId, Arc<MemberDecl>>,
    listener: Arc<dyn ComEventListener>,
}

/// One event ready to run on a callback thread
struct Delivery {
    factory: ObjectFactory,
    member: Arc<MemberDecl>,
    listener: Arc<dyn ComEventListener>,
    args: Vec<Variant>,
    pins: Vec<ComRef>,
    session: u64,
}

impl CallbackSink {
    /// Build a sink for `decl`
    ///
    /// Members without an explicit dispatch id cannot be matched and are
    /// reported to the listener once, here.
    pub fn new(factory: ObjectFactory, decl: Arc<InterfaceDecl>, listener: Arc<dyn ComEventListener>) -> Arc<Self> {
        let mut members = HashMap::new();
        for member in decl.members() {
            match member.dispid() {
                Some(id) => {
                    members.insert(id, member.clone());
                }
                None => listener.callback_error(CallbackError::UnresolvedName {
                    member: format!("{}.{}", decl.name(), member.name()),
                }),
            }
        }
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            factory,
            decl,
            members,
            listener,
        })
    }

    pub fn interface(&self) -> &Arc<InterfaceDecl> {
        &self.decl
    }

    /// Member bound to `dispid`
    pub fn member(&self, dispid: DispId) -> Option<&Arc<MemberDecl>> {
        self.members.get(&dispid)
    }

    /// Put native arguments back in declared order, one slot per parameter
    ///
    /// Named arguments land at the position given by their id; slots nobody
    /// filled stay `Empty`.
    fn arrange(member: &MemberDecl, params: &DispParams) -> Vec<Variant> {
        let mut slots = vec![Variant::Empty; member.param_kinds().len()];
        let named = params.named_args.len().min(params.args.len());

        for (slot, arg) in slots.iter_mut().zip(params.args[named..].iter().rev()) {
            *slot = arg.clone();
        }
        for (id, arg) in params.named_args.iter().zip(&params.args[..named]) {
            if let Some(slot) = usize::try_from(id.0).ok().and_then(|i| slots.get_mut(i)) {
                *slot = arg.clone();
            }
        }
        slots
    }

    fn spawn(&self, delivery: Delivery) {
        let name = self.factory.config().callback_thread_name.clone();
        let listener = delivery.listener.clone();
        let spawned = thread::Builder::new().name(name).spawn(move || delivery.run());
        if let Err(e) = spawned {
            warn!(error = %e, "cannot start callback thread");
            listener.callback_error(CallbackError::Spawn(e.to_string()));
        }
    }
}

impl Delivery {
    fn run(self) {
        let Delivery { factory, member, listener, args, pins, session } = self;
        let event = member.name();

        match decode(&factory, &member, args) {
            Ok(values) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.handle(event, values)));
                match outcome {
                    Ok(Ok(())) => trace!(event, "event delivered"),
                    Ok(Err(source)) => listener.callback_error(CallbackError::Handler {
                        member: event.to_string(),
                        source,
                    }),
                    Err(payload) => listener.callback_error(CallbackError::Panicked {
                        member: event.to_string(),
                        message: panic_message(payload.as_ref()),
                    }),
                }
            }
            Err(source) => listener.callback_error(CallbackError::Decode {
                member: event.to_string(),
                source,
            }),
        }

        factory.release_on_apartment(pins, session);
    }
}

fn decode(factory: &ObjectFactory, member: &MemberDecl, args: Vec<Variant>) -> std::result::Result<Vec<Value>, AutomationError> {
    args.into_iter()
        .zip(member.param_kinds())
        .map(|(arg, kind)| {
            if arg.is_nothing() {
                Ok(kind.default_value())
            } else {
                to_host(arg, kind, Ownership::Borrowed, factory)
            }
        })
        .collect()
}

impl DispatchObject for CallbackSink {
    fn add_ref(&self) -> u32 {
        1
    }

    fn release(&self) -> u32 {
        1
    }

    fn query_interface(&self, iid: &Iid) -> std::result::Result<RawDispatch, HResult> {
        let supported = *iid == Iid::IUNKNOWN || *iid == Iid::IDISPATCH || Some(*iid) == self.decl.iid();
        if !supported {
            return Err(HResult(hresult::E_NOINTERFACE));
        }
        match self.this.upgrade() {
            Some(this) => Ok(this),
            None => Err(HResult(hresult::E_UNEXPECTED)),
        }
    }

    fn get_ids_of_names(&self, _names: &[&str], _lcid: Lcid) -> std::result::Result<Vec<DispId>, HResult> {
        Err(HResult(hresult::E_NOTIMPL))
    }

    fn invoke(
        &self,
        dispid: DispId,
        _lcid: Lcid,
        _flags: DispatchFlags,
        params: &DispParams,
    ) -> std::result::Result<Variant, InvokeFailure> {
        let Some(member) = self.members.get(&dispid) else {
            debug!(interface = self.decl.name(), dispid = dispid.0, "event with unknown dispatch id");
            self.listener.callback_error(CallbackError::UnknownDispId(dispid));
            return Ok(Variant::Empty);
        };

        let args = Self::arrange(member, params);
        let mut pins = Vec::new();
        for arg in &args {
            arg.for_each_dispatch(&mut |raw| pins.push(ComRef::retain(raw)));
        }
        trace!(interface = self.decl.name(), event = member.name(), args = args.len(), "dispatching event");

        self.spawn(Delivery {
            factory: self.factory.clone(),
            member: member.clone(),
            listener: self.listener.clone(),
            args,
            pins,
            session: self.factory.apartment().session(),
        });
        Ok(Variant::Empty)
    }
}
