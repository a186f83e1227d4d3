//! Object factory and proxy registry
//!
//! The factory owns the apartment, creates or fetches external objects,
//! wraps every reference in a [`DynamicProxy`] and keeps a weak registry of
//! live proxies so they can be disposed in bulk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::apartment::ApartmentThread;
use crate::callback::{CallbackSink, ComEventListener};
use crate::decl::{ClassRef, ComInterface, InterfaceDecl};
use crate::proxy::{DynamicProxy, ProxyInner};
use crate::rot::RunningObjectTable;
use crate::runtime::{ComRef, ComRuntime, RawDispatch, ThreadingModel};
use crate::types::{AutomationError, Clsid, ComError, Iid, Lcid, Result};

/// Object factory configuration
#[derive(Clone, Debug)]
pub struct FactoryConfig {
    /// Name of the apartment worker thread
    pub apartment_name: String,
    /// Threading model passed to runtime initialization
    pub threading_model: ThreadingModel,
    /// Bound on teardown in [`ObjectFactory::terminate`]
    pub terminate_timeout: Duration,
    /// Locale for dispatch calls; the runtime default when `None`
    pub locale: Option<Lcid>,
    /// Name of the threads running event listeners
    pub callback_thread_name: String,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            apartment_name: "com-apartment".to_string(),
            threading_model: ThreadingModel::default(),
            terminate_timeout: Duration::from_millis(crate::DEFAULT_TERMINATE_TIMEOUT_MS),
            locale: None,
            callback_thread_name: "com-callback".to_string(),
        }
    }
}

struct FactoryShared {
    apartment: ApartmentThread,
    config: FactoryConfig,
    registry: Mutex<HashMap<u64, Weak<ProxyInner>>>,
    next_proxy_id: AtomicU64,
    locale: RwLock<Option<Lcid>>,
}

impl Drop for FactoryShared {
    fn drop(&mut self) {
        self.apartment.terminate(self.config.terminate_timeout);
    }
}

/// Creates external objects and tracks their proxies
///
/// Cloning is cheap; clones share the apartment and the registry.
#[derive(Clone)]
pub struct ObjectFactory {
    shared: Arc<FactoryShared>,
}

impl ObjectFactory {
    /// Create a factory with the default configuration
    pub fn new(runtime: Arc<dyn ComRuntime>) -> Self {
        Self::with_config(runtime, FactoryConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn ComRuntime>, config: FactoryConfig) -> Self {
        let apartment = ApartmentThread::new(config.apartment_name.clone(), runtime, config.threading_model);
        Self::with_apartment(apartment, config)
    }

    /// Create a factory over a prepared apartment (e.g. one with a fault
    /// handler installed)
    pub fn with_apartment(apartment: ApartmentThread, config: FactoryConfig) -> Self {
        let locale = config.locale;
        Self {
            shared: Arc::new(FactoryShared {
                apartment,
                config,
                registry: Mutex::new(HashMap::new()),
                next_proxy_id: AtomicU64::new(1),
                locale: RwLock::new(locale),
            }),
        }
    }

    pub fn apartment(&self) -> &ApartmentThread {
        &self.shared.apartment
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.shared.config
    }

    fn runtime(&self) -> &Arc<dyn ComRuntime> {
        self.shared.apartment.runtime()
    }

    /// Locale applied to every dispatch call
    pub fn locale(&self) -> Lcid {
        let locale = *self.shared.locale.read();
        locale.unwrap_or_else(|| self.runtime().default_locale())
    }

    /// Override the locale; `None` restores the runtime default
    pub fn set_locale(&self, locale: Option<Lcid>) {
        *self.shared.locale.write() = locale;
    }

    /// Create a new instance of the class named by `decl`
    pub fn create_object(&self, decl: &Arc<InterfaceDecl>) -> Result<DynamicProxy> {
        let class = class_of(decl)?;
        let factory = self.clone();
        let decl = decl.clone();
        self.shared.apartment.execute(move || -> Result<DynamicProxy> {
            let clsid = factory.resolve_class(&class)?;
            let created = factory
                .runtime()
                .create_instance(&clsid, &Iid::IDISPATCH)
                .map_err(|hr| ComError::new(format!("CoCreateInstance({class})"), hr))?;
            // The proxy takes its own count; the creation count goes with `created`
            let created = ComRef::adopt(created);
            let proxy = factory.create_proxy(created.raw(), decl)?;
            debug!(%proxy, %class, "created object");
            Ok(proxy)
        })?
    }

    /// Typed variant of [`create_object`](Self::create_object)
    pub fn create<T: ComInterface>(&self) -> Result<T> {
        self.create_object(&T::declaration()).map(T::from_proxy)
    }

    /// Attach to the running instance of the class named by `decl`
    pub fn fetch_object(&self, decl: &Arc<InterfaceDecl>) -> Result<DynamicProxy> {
        let class = class_of(decl)?;
        let factory = self.clone();
        let decl = decl.clone();
        self.shared.apartment.execute(move || -> Result<DynamicProxy> {
            let clsid = factory.resolve_class(&class)?;
            let active = factory
                .runtime()
                .get_active_object(&clsid)
                .map_err(|hr| ComError::new(format!("GetActiveObject({class})"), hr))?;
            let active = ComRef::adopt(active);
            let proxy = factory.create_proxy(active.raw(), decl)?;
            debug!(%proxy, %class, "fetched running object");
            Ok(proxy)
        })?
    }

    pub fn fetch<T: ComInterface>(&self) -> Result<T> {
        self.fetch_object(&T::declaration()).map(T::from_proxy)
    }

    /// Wrap a borrowed reference in a new registered proxy
    ///
    /// The proxy adds its own count; the caller keeps whatever count it has.
    pub fn create_proxy(&self, raw: &RawDispatch, decl: Arc<InterfaceDecl>) -> Result<DynamicProxy> {
        let raw = raw.clone();
        let factory = self.clone();
        self.shared
            .apartment
            .execute(move || DynamicProxy::attach(factory, &raw, decl))
    }

    /// Build a sink delivering events of `decl` to `listener`
    pub fn create_callback_sink(
        &self,
        decl: &Arc<InterfaceDecl>,
        listener: Arc<dyn ComEventListener>,
    ) -> Arc<CallbackSink> {
        CallbackSink::new(self.clone(), decl.clone(), listener)
    }

    /// Open the session's running object table
    pub fn running_object_table(&self) -> Result<RunningObjectTable> {
        let factory = self.clone();
        let raw = self
            .shared
            .apartment
            .execute(move || factory.runtime().running_object_table())?
            .map_err(|hr| ComError::new("GetRunningObjectTable", hr))?;
        Ok(RunningObjectTable::new(self.clone(), raw))
    }

    /// Track a proxy for bulk disposal
    pub fn register(&self, proxy: &DynamicProxy) {
        let mut registry = self.shared.registry.lock();
        registry.insert(proxy.id(), proxy.downgrade());
    }

    pub fn unregister(&self, proxy: &DynamicProxy) {
        self.unregister_id(proxy.id());
    }

    pub(crate) fn unregister_id(&self, id: u64) {
        self.shared.registry.lock().remove(&id);
    }

    pub(crate) fn next_proxy_id(&self) -> u64 {
        self.shared.next_proxy_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of registered proxies that are still alive
    pub fn live_proxies(&self) -> usize {
        let registry = self.shared.registry.lock();
        registry.values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Dispose every live registered proxy
    ///
    /// The registry is emptied under the lock before anything is disposed,
    /// so proxies registered concurrently are left untouched and a second
    /// call finds nothing to do.
    pub fn dispose_all(&self) {
        let snapshot = std::mem::take(&mut *self.shared.registry.lock());
        let mut disposed = 0usize;
        for weak in snapshot.into_values() {
            if let Some(inner) = weak.upgrade() {
                inner.dispose();
                disposed += 1;
            }
        }
        debug!(disposed, "disposed registered proxies");
    }

    /// Dispose all proxies and stop the apartment
    pub fn terminate(&self) {
        self.dispose_all();
        self.shared.apartment.terminate(self.shared.config.terminate_timeout);
    }

    /// Drop references on the apartment that produced them
    ///
    /// `session` is the apartment session the references were taken in.
    /// Once the runtime has been torn down the objects died with it, so the
    /// references are forgotten instead of released. A worker lost to a
    /// fault keeps its runtime, and the release restarts the apartment.
    pub(crate) fn release_on_apartment(&self, refs: Vec<ComRef>, session: u64) {
        if refs.is_empty() {
            return;
        }
        let apartment = &self.shared.apartment;
        if apartment.session() != session {
            trace!(count = refs.len(), "runtime torn down, forgetting references");
            forget(refs);
        } else if apartment.on_worker_thread() {
            drop(refs);
        } else {
            let pending = Arc::new(Mutex::new(Some(refs)));
            let queued = pending.clone();
            if let Err(e) = apartment.execute(move || drop(queued.lock().take())) {
                debug!(error = %e, "apartment unavailable, forgetting references");
                if let Some(refs) = pending.lock().take() {
                    forget(refs);
                }
            }
        }
    }

    /// Must run on the apartment
    fn resolve_class(&self, class: &ClassRef) -> Result<Clsid> {
        match class {
            ClassRef::Clsid(clsid) => Ok(*clsid),
            ClassRef::ProgId(prog_id) => self
                .runtime()
                .clsid_from_prog_id(prog_id)
                .map_err(|hr| ComError::new(format!("CLSIDFromProgID({prog_id})"), hr).into()),
        }
    }
}

fn forget(refs: Vec<ComRef>) {
    for owned in refs {
        owned.into_raw();
    }
}

fn class_of(decl: &InterfaceDecl) -> Result<ClassRef> {
    decl.class()
        .cloned()
        .ok_or_else(|| AutomationError::Declaration(format!("{} names no class id or prog-id", decl.name())))
}
