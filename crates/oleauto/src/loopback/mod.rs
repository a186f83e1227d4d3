//! Loopback runtime
//!
//! An in-process implementation of the native runtime seam. Classes are
//! registered as Rust constructors, instances are [`HostedObject`]s that
//! keep real reference counts, and a small running object table holds
//! named entries. The loopback runtime enforces the same threading rule as
//! the native one: every call except locale lookup fails with
//! `CO_E_NOTINITIALIZED` on a thread that has not initialized it.
//!
//! ```
//! use std::sync::Arc;
//! use oleauto::loopback::LoopbackRuntime;
//! use oleauto::ObjectFactory;
//!
//! let runtime = Arc::new(LoopbackRuntime::new());
//! let factory = ObjectFactory::new(runtime.clone());
//! assert!(factory.running_object_table().is_ok());
//! ```

mod object;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::runtime::{ComRuntime, DispatchObject, Moniker, MonikerCursor, RawDispatch, RawRunningObjectTable, ThreadingModel};
use crate::types::{hresult, Clsid, HResult, Iid, Lcid};

pub use object::{AutomationObject, HostedObject, InvokeContext};

type Constructor = Arc<dyn Fn() -> Arc<dyn AutomationObject> + Send + Sync>;

/// In-process runtime for tests and demos
pub struct LoopbackRuntime {
    classes: RwLock<HashMap<Clsid, Constructor>>,
    /// Lower-cased prog-id to class id
    prog_ids: RwLock<HashMap<String, Clsid>>,
    instances: Mutex<Vec<Arc<HostedObject>>>,
    active: RwLock<HashMap<Clsid, Arc<HostedObject>>>,
    rot: Arc<LoopbackRot>,
    threads: Mutex<HashSet<ThreadId>>,
    initialize_calls: AtomicUsize,
    uninitialize_calls: AtomicUsize,
    fail_initialize: AtomicBool,
    locale: Lcid,
}

impl Default for LoopbackRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
            prog_ids: RwLock::new(HashMap::new()),
            instances: Mutex::new(Vec::new()),
            active: RwLock::new(HashMap::new()),
            rot: Arc::new(LoopbackRot::default()),
            threads: Mutex::new(HashSet::new()),
            initialize_calls: AtomicUsize::new(0),
            uninitialize_calls: AtomicUsize::new(0),
            fail_initialize: AtomicBool::new(false),
            locale: Lcid::USER_DEFAULT,
        }
    }

    /// Use `locale` as the runtime default
    pub fn with_locale(mut self, locale: Lcid) -> Self {
        self.locale = locale;
        self
    }

    /// Register a creatable class; prog-ids match case-insensitively
    pub fn register_class<T, F>(&self, clsid: Clsid, prog_id: Option<&str>, constructor: F)
    where
        T: AutomationObject,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move || Arc::new(constructor()) as Arc<dyn AutomationObject>);
        self.classes.write().insert(clsid, constructor);
        if let Some(prog_id) = prog_id {
            self.prog_ids.write().insert(prog_id.to_lowercase(), clsid);
        }
        debug!(%clsid, ?prog_id, "registered loopback class");
    }

    /// Every instance created through `create_instance`, oldest first
    pub fn instances(&self) -> Vec<Arc<HostedObject>> {
        self.instances.lock().clone()
    }

    /// Make `object` the running instance of `clsid`
    ///
    /// The object is also listed in the running object table as `!{clsid}`.
    pub fn register_active_object(&self, clsid: Clsid, object: Arc<HostedObject>) {
        self.rot.insert(Moniker::new(format!("!{clsid}")), object.clone());
        self.active.write().insert(clsid, object);
    }

    pub fn revoke_active_object(&self, clsid: &Clsid) {
        self.active.write().remove(clsid);
        self.rot.remove(&format!("!{clsid}"));
    }

    /// List `object` in the running object table under `name`
    pub fn register_running_object(&self, name: &str, object: Arc<HostedObject>) {
        self.rot.insert(Moniker::new(name), object);
    }

    pub fn revoke_running_object(&self, name: &str) {
        self.rot.remove(name);
    }

    /// Make the next initializations fail
    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn uninitialize_calls(&self) -> usize {
        self.uninitialize_calls.load(Ordering::SeqCst)
    }

    /// Check whether the calling thread has initialized this runtime
    pub fn is_initialized_here(&self) -> bool {
        self.threads.lock().contains(&thread::current().id())
    }

    /// Number of moniker cursor steps taken so far
    pub fn cursor_steps(&self) -> usize {
        self.rot.steps.load(Ordering::SeqCst)
    }

    fn require_initialized(&self) -> std::result::Result<(), HResult> {
        if self.is_initialized_here() {
            Ok(())
        } else {
            Err(HResult(hresult::CO_E_NOTINITIALIZED))
        }
    }
}

impl ComRuntime for LoopbackRuntime {
    fn initialize(&self, model: ThreadingModel) -> std::result::Result<(), HResult> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(HResult(hresult::E_FAIL));
        }
        self.threads.lock().insert(thread::current().id());
        trace!(?model, "loopback runtime initialized");
        Ok(())
    }

    fn uninitialize(&self) {
        self.uninitialize_calls.fetch_add(1, Ordering::SeqCst);
        self.threads.lock().remove(&thread::current().id());
    }

    fn clsid_from_prog_id(&self, prog_id: &str) -> std::result::Result<Clsid, HResult> {
        self.require_initialized()?;
        self.prog_ids
            .read()
            .get(&prog_id.to_lowercase())
            .copied()
            .ok_or(HResult(hresult::CO_E_CLASSSTRING))
    }

    fn create_instance(&self, clsid: &Clsid, iid: &Iid) -> std::result::Result<RawDispatch, HResult> {
        self.require_initialized()?;
        let constructor = self
            .classes
            .read()
            .get(clsid)
            .cloned()
            .ok_or(HResult(hresult::REGDB_E_CLASSNOTREG))?;
        let hosted = HostedObject::new(constructor());
        let pointer = hosted.query_interface(iid)?;
        self.instances.lock().push(hosted);
        Ok(pointer)
    }

    fn get_active_object(&self, clsid: &Clsid) -> std::result::Result<RawDispatch, HResult> {
        self.require_initialized()?;
        let active = self.active.read().get(clsid).cloned();
        active
            .map(|object| object.counted())
            .ok_or(HResult(hresult::MK_E_UNAVAILABLE))
    }

    fn running_object_table(&self) -> std::result::Result<Arc<dyn RawRunningObjectTable>, HResult> {
        self.require_initialized()?;
        Ok(self.rot.clone())
    }

    fn default_locale(&self) -> Lcid {
        self.locale
    }
}

/// Named entries in registration order
#[derive(Default)]
struct LoopbackRot {
    entries: RwLock<Vec<(Moniker, Arc<HostedObject>)>>,
    steps: Arc<AtomicUsize>,
}

impl LoopbackRot {
    fn insert(&self, moniker: Moniker, object: Arc<HostedObject>) {
        let mut entries = self.entries.write();
        entries.retain(|(m, _)| *m != moniker);
        entries.push((moniker, object));
    }

    fn remove(&self, name: &str) {
        self.entries.write().retain(|(m, _)| m.display_name != name);
    }
}

impl RawRunningObjectTable for LoopbackRot {
    fn enum_running(&self) -> std::result::Result<Box<dyn MonikerCursor>, HResult> {
        let monikers = self.entries.read().iter().map(|(m, _)| m.clone()).collect();
        Ok(Box::new(SnapshotCursor {
            monikers,
            position: 0,
            steps: self.steps.clone(),
        }))
    }

    fn get_object(&self, moniker: &Moniker) -> std::result::Result<RawDispatch, HResult> {
        let entries = self.entries.read();
        entries
            .iter()
            .find(|(m, _)| m == moniker)
            .map(|(_, object)| object.counted())
            .ok_or(HResult(hresult::MK_E_UNAVAILABLE))
    }
}

/// Cursor over the monikers present when enumeration started
struct SnapshotCursor {
    monikers: Vec<Moniker>,
    position: usize,
    steps: Arc<AtomicUsize>,
}

impl MonikerCursor for SnapshotCursor {
    fn reset(&mut self) {
        self.position = 0;
    }

    fn next(&mut self) -> Option<Moniker> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        let moniker = self.monikers.get(self.position).cloned()?;
        self.position += 1;
        Some(moniker)
    }
}
