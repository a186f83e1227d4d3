//! In-process dispatch objects

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::runtime::{ComRef, DispParams, DispatchFlags, DispatchObject, InvokeFailure, RawDispatch};
use crate::types::{hresult, DispId, HResult, Iid, Lcid};
use crate::variant::Variant;

/// Behavior of an object hosted by the loopback runtime
///
/// Implementations see arguments in declared order and never deal with
/// reference counts.
pub trait AutomationObject: Send + Sync + 'static {
    /// Interfaces answered by `query_interface` besides IUnknown/IDispatch
    fn interfaces(&self) -> Vec<Iid> {
        Vec::new()
    }

    /// Event interfaces sinks may connect to
    fn event_interfaces(&self) -> Vec<Iid> {
        Vec::new()
    }

    fn dispid_of(&self, name: &str) -> Option<DispId>;

    fn invoke(
        &self,
        ctx: &InvokeContext<'_>,
        dispid: DispId,
        flags: DispatchFlags,
        args: &[Variant],
    ) -> std::result::Result<Variant, InvokeFailure>;
}

/// What a hosted object can reach while handling a call
pub struct InvokeContext<'a> {
    object: &'a HostedObject,
    lcid: Lcid,
}

impl InvokeContext<'_> {
    /// Raise an event on every sink connected for `events`
    pub fn fire(&self, events: &Iid, dispid: DispId, args: Vec<Variant>) -> usize {
        self.object.fire_event(events, dispid, args)
    }

    /// The object being called
    pub fn this(&self) -> Option<Arc<HostedObject>> {
        self.object.this.upgrade()
    }

    pub fn locale(&self) -> Lcid {
        self.lcid
    }
}

type Connections = HashMap<Iid, Vec<(u32, ComRef)>>;

/// Reference-counted shell around an [`AutomationObject`]
///
/// Counts follow the external rules: a fresh object starts at zero, every
/// handed-out pointer carries one count, and calls are refused once the
/// count is back to zero. Connected sinks are dropped at that point too.
pub struct HostedObject {
    this: Weak<HostedObject>,
    object: Arc<dyn AutomationObject>,
    refs: AtomicU32,
    over_releases: AtomicUsize,
    name_lookups: AtomicUsize,
    last_locale: Mutex<Option<Lcid>>,
    connections: Mutex<Connections>,
    next_cookie: AtomicU32,
}

impl HostedObject {
    pub fn new(object: Arc<dyn AutomationObject>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            object,
            refs: AtomicU32::new(0),
            over_releases: AtomicUsize::new(0),
            name_lookups: AtomicUsize::new(0),
            last_locale: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_cookie: AtomicU32::new(1),
        })
    }

    pub fn object(&self) -> &Arc<dyn AutomationObject> {
        &self.object
    }

    /// Current external count
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    /// Number of releases that arrived with the count already at zero
    pub fn over_releases(&self) -> usize {
        self.over_releases.load(Ordering::SeqCst)
    }

    /// Number of `get_ids_of_names` calls served
    pub fn name_lookups(&self) -> usize {
        self.name_lookups.load(Ordering::SeqCst)
    }

    /// Locale of the most recent name lookup or call
    pub fn last_locale(&self) -> Option<Lcid> {
        *self.last_locale.lock()
    }

    pub fn connection_count(&self, events: &Iid) -> usize {
        self.connections.lock().get(events).map_or(0, Vec::len)
    }

    /// Hand out a counted pointer, e.g. to return from `invoke`
    pub fn to_variant(self: &Arc<Self>) -> Variant {
        Variant::Dispatch(Some(self.counted()))
    }

    pub(crate) fn counted(self: &Arc<Self>) -> RawDispatch {
        self.refs.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    /// Deliver an event to every connected sink; returns how many sinks
    /// accepted it
    pub fn fire_event(&self, events: &Iid, dispid: DispId, args: Vec<Variant>) -> usize {
        let sinks: Vec<RawDispatch> = self
            .connections
            .lock()
            .get(events)
            .map(|sinks| sinks.iter().map(|(_, sink)| sink.raw().clone()).collect())
            .unwrap_or_default();

        let params = DispParams::positional(args);
        let lcid = self.last_locale().unwrap_or(Lcid::USER_DEFAULT);
        sinks
            .iter()
            .filter(|sink| {
                let delivered = sink.invoke(dispid, lcid, DispatchFlags::METHOD, &params);
                if let Err(failure) = &delivered {
                    debug!(%events, dispid = dispid.0, hresult = %failure.hresult, "sink refused event");
                }
                delivered.is_ok()
            })
            .count()
    }

    fn supports(&self, iid: &Iid) -> bool {
        *iid == Iid::IUNKNOWN
            || *iid == Iid::IDISPATCH
            || (*iid == Iid::ICONNECTIONPOINTCONTAINER && !self.object.event_interfaces().is_empty())
            || self.object.interfaces().contains(iid)
    }

    /// Native argument block back to declared order
    fn declared_args(flags: DispatchFlags, params: &DispParams) -> std::result::Result<Vec<Variant>, InvokeFailure> {
        if flags.is_put() {
            if params.named_args != [DispId::PROPERTYPUT] || params.args.is_empty() {
                return Err(InvokeFailure::new(hresult::DISP_E_PARAMNOTFOUND));
            }
            // The new value goes last, after any index arguments
            let mut declared: Vec<Variant> = params.args[1..].iter().rev().cloned().collect();
            declared.push(params.args[0].clone());
            return Ok(declared);
        }
        if !params.named_args.is_empty() {
            return Err(InvokeFailure::new(hresult::DISP_E_NONAMEDARGS));
        }
        Ok(params.args.iter().rev().cloned().collect())
    }
}

impl DispatchObject for HostedObject {
    fn add_ref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self) -> u32 {
        let Ok(previous) = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        else {
            self.over_releases.fetch_add(1, Ordering::SeqCst);
            warn!("release on an object with no references");
            return 0;
        };
        let remaining = previous - 1;
        if previous == 1 {
            let dropped = std::mem::take(&mut *self.connections.lock());
            trace!(sinks = dropped.values().map(Vec::len).sum::<usize>(), "last reference released");
        }
        remaining
    }

    fn query_interface(&self, iid: &Iid) -> std::result::Result<RawDispatch, HResult> {
        if !self.supports(iid) {
            return Err(HResult(hresult::E_NOINTERFACE));
        }
        let this = self.this.upgrade().ok_or(HResult(hresult::E_UNEXPECTED))?;
        Ok(this.counted())
    }

    fn get_ids_of_names(&self, names: &[&str], lcid: Lcid) -> std::result::Result<Vec<DispId>, HResult> {
        self.name_lookups.fetch_add(1, Ordering::SeqCst);
        *self.last_locale.lock() = Some(lcid);
        names
            .iter()
            .map(|name| {
                self.object
                    .dispid_of(name)
                    .ok_or(HResult(hresult::DISP_E_UNKNOWNNAME))
            })
            .collect()
    }

    fn invoke(
        &self,
        dispid: DispId,
        lcid: Lcid,
        flags: DispatchFlags,
        params: &DispParams,
    ) -> std::result::Result<Variant, InvokeFailure> {
        if self.ref_count() == 0 {
            return Err(InvokeFailure::new(hresult::CO_E_OBJNOTCONNECTED));
        }
        *self.last_locale.lock() = Some(lcid);
        let args = Self::declared_args(flags, params)?;
        let ctx = InvokeContext { object: self, lcid };
        self.object.invoke(&ctx, dispid, flags, &args)
    }

    fn advise(&self, events: &Iid, sink: RawDispatch) -> std::result::Result<u32, HResult> {
        if !self.object.event_interfaces().contains(events) {
            return Err(HResult(hresult::CONNECT_E_NOCONNECTION));
        }
        let sink = ComRef::adopt(sink.query_interface(events)?);
        let cookie = self.next_cookie.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().entry(*events).or_default().push((cookie, sink));
        Ok(cookie)
    }

    fn unadvise(&self, events: &Iid, cookie: u32) -> std::result::Result<(), HResult> {
        let removed = {
            let mut connections = self.connections.lock();
            let sinks = connections.get_mut(events);
            sinks.and_then(|sinks| {
                let position = sinks.iter().position(|(c, _)| *c == cookie)?;
                Some(sinks.remove(position))
            })
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(HResult(hresult::CONNECT_E_NOCONNECTION)),
        }
    }
}
