//! Dynamic proxies
//!
//! A [`DynamicProxy`] binds one external reference to one interface
//! declaration. Calls against the declaration are classified by member kind
//! and forwarded as dispatch calls on the apartment:
//!
//! | member kind  | flags                 | arguments                          |
//! |--------------|-----------------------|------------------------------------|
//! | property put | `PROPERTYPUT`         | one value, named `DISPID_PROPERTYPUT` |
//! | property get | `METHOD\|PROPERTYGET` | reversed                           |
//! | method       | `METHOD\|PROPERTYGET` | reversed                           |
//!
//! Clones of a proxy share one identity and one external count.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::apartment::ApartmentThread;
use crate::callback::{CallbackSink, ComEventListener};
use crate::decl::{ComInterface, DispBinding, InterfaceDecl, MemberDecl, MemberKind};
use crate::factory::ObjectFactory;
use crate::runtime::{ComRef, DispParams, DispatchFlags, InvokeFailure, RawDispatch};
use crate::types::{hresult, AutomationError, ComError, DispId, HResult, Iid, Result};
use crate::variant::{to_external, to_host, Ownership, Value, ValueKind, Variant};

pub(crate) struct ProxyInner {
    id: u64,
    decl: Arc<InterfaceDecl>,
    factory: ObjectFactory,
    dispatch: Mutex<Option<ComRef>>,
    /// Apartment session the reference was taken in
    session: u64,
    unknown_id: usize,
    /// Dispatch ids resolved by name, keyed by external name
    dispids: Mutex<HashMap<String, DispId>>,
}

impl ProxyInner {
    fn dispatch(&self) -> Result<RawDispatch> {
        self.dispatch
            .lock()
            .as_ref()
            .map(|owned| owned.raw().clone())
            .ok_or_else(|| AutomationError::Disposed(self.decl.name().to_string()))
    }

    /// Must run on the apartment
    fn resolve(&self, dispatch: &RawDispatch, binding: &DispBinding) -> Result<DispId> {
        let name = match binding {
            DispBinding::Id(id) => return Ok(*id),
            DispBinding::Name(name) => name,
        };
        if let Some(id) = self.dispids.lock().get(name) {
            return Ok(*id);
        }

        let context = format!("GetIDsOfNames({}.{name})", self.decl.name());
        let id = dispatch
            .get_ids_of_names(&[name.as_str()], self.factory.locale())
            .map_err(|hr| ComError::new(context.clone(), hr))?
            .first()
            .copied()
            .ok_or_else(|| ComError::new(context, HResult(hresult::DISP_E_UNKNOWNNAME)))?;
        debug!(interface = self.decl.name(), member = %name, dispid = id.0, "resolved dispatch id");
        self.dispids.lock().insert(name.clone(), id);
        Ok(id)
    }

    /// Release the external reference; later calls fail with `Disposed`
    pub(crate) fn dispose(&self) {
        let Some(owned) = self.dispatch.lock().take() else {
            return;
        };
        self.factory.unregister_id(self.id);
        trace!(interface = self.decl.name(), unk = self.unknown_id, "disposing proxy");
        self.factory.release_on_apartment(vec![owned], self.session);
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Host-side stand-in for one external object
#[derive(Clone)]
pub struct DynamicProxy {
    inner: Arc<ProxyInner>,
}

/// A sink connected to an object's connection point
pub struct EventSubscription {
    iid: Iid,
    cookie: u32,
    sink: Arc<CallbackSink>,
}

impl EventSubscription {
    pub fn iid(&self) -> Iid {
        self.iid
    }

    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    pub fn sink(&self) -> &Arc<CallbackSink> {
        &self.sink
    }
}

impl DynamicProxy {
    /// Wrap a borrowed reference; must run on the apartment
    ///
    /// Takes one count for the proxy and records the object's IUnknown
    /// identity.
    pub(crate) fn attach(factory: ObjectFactory, raw: &RawDispatch, decl: Arc<InterfaceDecl>) -> DynamicProxy {
        let owned = ComRef::retain(raw);
        let unknown_id = match raw.query_interface(&Iid::IUNKNOWN) {
            Ok(unknown) => ComRef::adopt(unknown).identity(),
            Err(_) => owned.identity(),
        };
        let proxy = DynamicProxy {
            inner: Arc::new(ProxyInner {
                id: factory.next_proxy_id(),
                decl,
                factory: factory.clone(),
                dispatch: Mutex::new(Some(owned)),
                session: factory.apartment().session(),
                unknown_id,
                dispids: Mutex::new(HashMap::new()),
            }),
        };
        factory.register(&proxy);
        proxy
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyInner> {
        Arc::downgrade(&self.inner)
    }

    /// Declaration this proxy implements
    pub fn interface(&self) -> &Arc<InterfaceDecl> {
        &self.inner.decl
    }

    pub fn factory(&self) -> &ObjectFactory {
        &self.inner.factory
    }

    fn apartment(&self) -> &ApartmentThread {
        self.inner.factory.apartment()
    }

    /// Address of the object's IUnknown, the external identity
    pub fn unknown_id(&self) -> usize {
        self.inner.unknown_id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.dispatch.lock().is_none()
    }

    /// The underlying pointer, without adding a count
    pub fn raw_dispatch(&self) -> Option<RawDispatch> {
        self.inner.dispatch().ok()
    }

    /// Call a declared member by host name
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let member = self.inner.decl.require_member(method)?.clone();
        match member.kind() {
            MemberKind::PropertyPut => {
                let [value] = <[Value; 1]>::try_from(args).map_err(|args| {
                    AutomationError::Marshaling(format!(
                        "{}.{} takes one value, got {}",
                        self.inner.decl.name(),
                        member.name(),
                        args.len()
                    ))
                })?;
                self.put(member.binding().clone(), value, self.context(&member))
                    .map(|()| Value::Empty)
            }
            MemberKind::PropertyGet | MemberKind::Method => self.call(
                member.binding().clone(),
                DispatchFlags::METHOD | DispatchFlags::PROPERTYGET,
                args,
                member.return_kind().clone(),
                self.context(&member),
            ),
        }
    }

    /// Read a property by external name
    pub fn get_property(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let context = format!("{}.{name}", self.inner.decl.name());
        self.call(binding(name), DispatchFlags::PROPERTYGET, args, ValueKind::Any, context)
    }

    /// Write a property by external name
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let context = format!("{}.{name}", self.inner.decl.name());
        self.put(binding(name), value.into(), context)
    }

    /// Call a method by external name
    pub fn invoke_method(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let context = format!("{}.{name}", self.inner.decl.name());
        self.call(binding(name), DispatchFlags::METHOD, args, ValueKind::Any, context)
    }

    pub fn get_property_by_id(&self, dispid: DispId, args: Vec<Value>) -> Result<Value> {
        let context = format!("{}[{dispid}]", self.inner.decl.name());
        self.call(DispBinding::Id(dispid), DispatchFlags::PROPERTYGET, args, ValueKind::Any, context)
    }

    pub fn set_property_by_id(&self, dispid: DispId, value: impl Into<Value>) -> Result<()> {
        let context = format!("{}[{dispid}]", self.inner.decl.name());
        self.put(DispBinding::Id(dispid), value.into(), context)
    }

    pub fn invoke_method_by_id(&self, dispid: DispId, args: Vec<Value>) -> Result<Value> {
        let context = format!("{}[{dispid}]", self.inner.decl.name());
        self.call(DispBinding::Id(dispid), DispatchFlags::METHOD, args, ValueKind::Any, context)
    }

    fn context(&self, member: &MemberDecl) -> String {
        format!("{}.{}", self.inner.decl.name(), member.name())
    }

    fn call(
        &self,
        target: DispBinding,
        flags: DispatchFlags,
        args: Vec<Value>,
        returns: ValueKind,
        context: String,
    ) -> Result<Value> {
        let params = DispParams::positional(marshal_all(&args, &context)?);
        self.dispatch(target, flags, params, returns, args, context)
    }

    fn put(&self, target: DispBinding, value: Value, context: String) -> Result<()> {
        let external = marshal(&value, 0, &context)?;
        let params = DispParams::property_put(external);
        self.dispatch(target, DispatchFlags::PROPERTYPUT, params, ValueKind::Void, vec![value], context)
            .map(|_| ())
    }

    /// Issue one dispatch call on the apartment
    ///
    /// `keep` holds the host arguments so proxies passed by reference stay
    /// alive until the call returns.
    fn dispatch(
        &self,
        target: DispBinding,
        flags: DispatchFlags,
        params: DispParams,
        returns: ValueKind,
        keep: Vec<Value>,
        context: String,
    ) -> Result<Value> {
        let inner = self.inner.clone();
        self.apartment().execute(move || -> Result<Value> {
            let _keep = keep;
            let dispatch = inner.dispatch()?;
            let dispid = inner.resolve(&dispatch, &target)?;
            let lcid = inner.factory.locale();
            trace!(%context, dispid = dispid.0, ?flags, args = params.args.len(), "invoke");
            let result = dispatch
                .invoke(dispid, lcid, flags, &params)
                .map_err(|failure| invoke_error(context, failure))?;
            to_host(result, &returns, Ownership::Owned, &inner.factory)
        })?
    }

    /// Query the object for another interface and wrap the result
    pub fn query_interface(&self, decl: &Arc<InterfaceDecl>) -> Result<DynamicProxy> {
        let inner = self.inner.clone();
        let decl = decl.clone();
        let iid = decl.query_iid();
        self.apartment().execute(move || -> Result<DynamicProxy> {
            let dispatch = inner.dispatch()?;
            let queried = dispatch.query_interface(&iid).map_err(|hr| {
                ComError::new(format!("queryInterface({} -> {})", inner.decl.name(), decl.name()), hr)
            })?;
            let queried = ComRef::adopt(queried);
            Ok(DynamicProxy::attach(inner.factory.clone(), queried.raw(), decl))
        })?
    }

    /// Typed variant of [`query_interface`](Self::query_interface)
    pub fn query<T: ComInterface>(&self) -> Result<T> {
        self.query_interface(&T::declaration()).map(T::from_proxy)
    }

    /// Connect a listener to the object's events
    pub fn advise(
        &self,
        events: &Arc<InterfaceDecl>,
        listener: Arc<dyn ComEventListener>,
    ) -> Result<EventSubscription> {
        let iid = events.iid().ok_or_else(|| {
            AutomationError::Declaration(format!("{} has no IID to connect to", events.name()))
        })?;
        let sink = self.inner.factory.create_callback_sink(events, listener);
        let raw_sink: RawDispatch = sink.clone();
        let inner = self.inner.clone();
        let cookie = self.apartment().execute(move || -> Result<u32> {
            let dispatch = inner.dispatch()?;
            dispatch
                .advise(&iid, raw_sink)
                .map_err(|hr| ComError::new(format!("Advise({iid})"), hr).into())
        })??;
        debug!(proxy = %self, %iid, cookie, "connected event sink");
        Ok(EventSubscription { iid, cookie, sink })
    }

    /// Disconnect a listener connected with [`advise`](Self::advise)
    pub fn unadvise(&self, subscription: EventSubscription) -> Result<()> {
        let inner = self.inner.clone();
        let EventSubscription { iid, cookie, .. } = subscription;
        self.apartment().execute(move || -> Result<()> {
            let dispatch = inner.dispatch()?;
            dispatch
                .unadvise(&iid, cookie)
                .map_err(|hr| ComError::new(format!("Unadvise({iid}, {cookie})"), hr).into())
        })?
    }

    /// Release the external reference
    ///
    /// Idempotent. Also happens when the last clone is dropped.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

fn binding(name: &str) -> DispBinding {
    DispBinding::Name(name.to_string())
}

fn marshal(value: &Value, index: usize, context: &str) -> Result<Variant> {
    to_external(value)
        .ok_or_else(|| AutomationError::Marshaling(format!("argument {index} of {context} cannot be marshaled: {value:?}")))
}

fn marshal_all(values: &[Value], context: &str) -> Result<Vec<Variant>> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| marshal(value, index, context))
        .collect()
}

fn invoke_error(context: String, failure: InvokeFailure) -> AutomationError {
    let mut error = ComError::new(context, failure.hresult);
    if let Some(info) = failure.excep_info {
        error.exception_source = info.source;
        error.description = info.description;
    }
    error.arg_err = failure.arg_err;
    error.into()
}

impl fmt::Display for DynamicProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{unk=0x{:x}}}", self.inner.decl.name(), self.inner.unknown_id)
    }
}

impl fmt::Debug for DynamicProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicProxy({self})")
    }
}

impl PartialEq for DynamicProxy {
    fn eq(&self, other: &Self) -> bool {
        self.inner.unknown_id == other.inner.unknown_id
    }
}

impl Eq for DynamicProxy {}

impl Hash for DynamicProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.unknown_id.hash(state);
    }
}
