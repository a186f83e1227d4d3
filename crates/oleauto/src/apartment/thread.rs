//! Single-worker apartment thread
//!
//! One native thread per apartment drains an unbounded queue of work items.
//! The worker is started lazily, initializes the runtime before running
//! anything, and is replaced transparently after a fault.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use futures::executor::block_on;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::{ApartmentState, FaultHandler, WorkFuture};
use crate::runtime::{ComRuntime, ThreadingModel};
use crate::types::{AutomationError, ComError, Result};

/// Bound used when an apartment is dropped without an explicit terminate
const DROP_TERMINATE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_APARTMENT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Apartment id and worker generation of the current thread, if it is a
    /// worker
    static CURRENT_APARTMENT: Cell<Option<(u64, u64)>> = const { Cell::new(None) };
}

type Job = Box<dyn FnOnce() -> JobOutcome + Send>;

enum JobOutcome {
    Continue,
    /// Teardown ran; the worker exits
    Shutdown,
    /// The work item panicked; `notify` delivers the failure to its caller
    /// once the worker has stopped accepting work
    Fault {
        message: String,
        notify: Box<dyn FnOnce() + Send>,
    },
}

/// State shared with the worker thread
struct Shared {
    state: RwLock<ApartmentState>,
    /// Bumped for every new worker and when a worker is abandoned
    generation: AtomicU64,
    /// Bumped whenever the runtime is torn down
    session: AtomicU64,
    faults: AtomicU64,
    worker_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    /// Update the state only if `generation` is still the current worker
    fn transition(&self, generation: u64, state: ApartmentState) {
        let mut guard = self.state.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            *guard = state;
        }
    }
}

struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

/// Dedicated thread owning one apartment of the external model
pub struct ApartmentThread {
    id: u64,
    name: String,
    model: ThreadingModel,
    runtime: Arc<dyn ComRuntime>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    fault_handler: Option<FaultHandler>,
}

impl ApartmentThread {
    /// Create an apartment; no thread is started until the first call
    pub fn new(name: impl Into<String>, runtime: Arc<dyn ComRuntime>, model: ThreadingModel) -> Self {
        Self {
            id: NEXT_APARTMENT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            model,
            runtime,
            shared: Arc::new(Shared {
                state: RwLock::new(ApartmentState::Uninitialized),
                generation: AtomicU64::new(0),
                session: AtomicU64::new(0),
                faults: AtomicU64::new(0),
                worker_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
            fault_handler: None,
        }
    }

    /// Install a callback run whenever a work item kills the worker
    pub fn with_fault_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.fault_handler = Some(Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Arc<dyn ComRuntime> {
        &self.runtime
    }

    /// Current lifecycle state (informational)
    pub fn state(&self) -> ApartmentState {
        *self.shared.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ApartmentState::Ready
    }

    /// Number of workers lost to panicking work items
    pub fn fault_count(&self) -> u64 {
        self.shared.faults.load(Ordering::SeqCst)
    }

    /// Number of runtime teardowns so far
    ///
    /// References taken in an earlier session belong to a runtime that no
    /// longer exists.
    pub fn session(&self) -> u64 {
        self.shared.session.load(Ordering::SeqCst)
    }

    /// Thread id of the current worker, if one is running
    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        *self.shared.worker_thread.lock()
    }

    /// Check whether the calling thread is this apartment's live worker
    ///
    /// An abandoned worker is no longer the apartment.
    pub fn on_worker_thread(&self) -> bool {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        CURRENT_APARTMENT.with(|current| current.get() == Some((self.id, generation)))
    }

    /// Run `work` on the worker and block until it completes
    ///
    /// Called from the worker itself, `work` runs inline.
    pub fn execute<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.on_worker_thread() {
            return Ok(work());
        }

        let (tx, rx) = oneshot::channel();
        self.dispatch(Box::new(move || {
            run_caught(work, move |result| {
                let _ = tx.send(result);
            })
        }))?;

        block_on(rx).map_err(|_| worker_lost())?
    }

    /// Queue `work` on the worker; the future resolves with its result
    pub fn submit<T, F>(&self, work: F) -> WorkFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.on_worker_thread() {
            let value = work();
            return Box::pin(async move { Ok(value) });
        }

        let (tx, rx) = oneshot::channel();
        let queued = self.dispatch(Box::new(move || {
            run_caught(work, move |result| {
                let _ = tx.send(result);
            })
        }));

        Box::pin(async move {
            queued?;
            rx.await.map_err(|_| worker_lost())?
        })
    }

    /// Tear down the runtime and stop the worker, waiting at most `timeout`
    ///
    /// A worker stuck in a native call is abandoned: its queue is closed,
    /// work still queued behind it is dropped, and the apartment returns to
    /// `Uninitialized` so a later call starts a fresh worker.
    pub fn terminate(&self, timeout: Duration) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        if self.on_worker_thread() {
            // The loop exits once the current item returns and the queue
            // sender is gone
            self.runtime.uninitialize();
            worker.cancelled.store(true, Ordering::SeqCst);
            let mut state = self.shared.state.write();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.session.fetch_add(1, Ordering::SeqCst);
            *state = ApartmentState::Uninitialized;
            *self.shared.worker_thread.lock() = None;
            debug!(apartment = %self.name, "apartment terminated from its own worker");
            return;
        }

        let (done_tx, done_rx) = std_mpsc::sync_channel(1);
        let runtime = self.runtime.clone();
        let teardown: Job = Box::new(move || {
            runtime.uninitialize();
            let _ = done_tx.send(());
            JobOutcome::Shutdown
        });

        if worker.sender.send(teardown).is_err() {
            debug!(apartment = %self.name, "worker already stopped");
            *self.shared.state.write() = ApartmentState::Uninitialized;
            return;
        }
        drop(worker.sender);

        match done_rx.recv_timeout(timeout) {
            Ok(()) => {
                self.shared.session.fetch_add(1, Ordering::SeqCst);
                let _ = worker.handle.join();
                debug!(apartment = %self.name, "apartment terminated");
            }
            Err(_) => {
                warn!(
                    apartment = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "teardown did not complete in time, abandoning worker"
                );
                worker.cancelled.store(true, Ordering::SeqCst);
                let mut state = self.shared.state.write();
                self.shared.generation.fetch_add(1, Ordering::SeqCst);
                self.shared.session.fetch_add(1, Ordering::SeqCst);
                *state = ApartmentState::Uninitialized;
                *self.shared.worker_thread.lock() = None;
            }
        }
    }

    fn dispatch(&self, job: Job) -> Result<()> {
        let sender = self.sender()?;
        sender
            .send(job)
            .map_err(|_| AutomationError::Apartment(format!("apartment {} is not accepting work", self.name)))
    }

    /// Sender of the live worker, starting one if needed
    fn sender(&self) -> Result<mpsc::UnboundedSender<Job>> {
        let mut worker = self.worker.lock();
        if let Some(current) = worker.as_ref() {
            if !current.sender.is_closed() {
                return Ok(current.sender.clone());
            }
        }

        let started = self.start_worker()?;
        let sender = started.sender.clone();
        *worker = Some(started);
        Ok(sender)
    }

    fn start_worker(&self) -> Result<Worker> {
        let generation = {
            let mut state = self.shared.state.write();
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ApartmentState::Initializing;
            generation
        };

        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let (init_tx, init_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let apartment_id = self.id;
        let name = self.name.clone();
        let model = self.model;
        let runtime = self.runtime.clone();
        let shared = self.shared.clone();
        let fault_handler = self.fault_handler.clone();
        let worker_cancelled = cancelled.clone();

        debug!(apartment = %self.name, generation, ?model, "starting apartment worker");

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                CURRENT_APARTMENT.with(|current| current.set(Some((apartment_id, generation))));

                if let Err(hr) = runtime.initialize(model) {
                    shared.transition(generation, ApartmentState::Faulted);
                    let _ = init_tx.send(Err(hr));
                    return;
                }
                *shared.worker_thread.lock() = Some(thread::current().id());
                shared.transition(generation, ApartmentState::Ready);
                let _ = init_tx.send(Ok(()));

                while let Some(job) = receiver.blocking_recv() {
                    match job() {
                        JobOutcome::Continue => {}
                        JobOutcome::Shutdown => {
                            shared.transition(generation, ApartmentState::Uninitialized);
                            break;
                        }
                        JobOutcome::Fault { message, notify } => {
                            receiver.close();
                            shared.faults.fetch_add(1, Ordering::SeqCst);
                            shared.transition(generation, ApartmentState::Uninitialized);
                            error!(apartment = %name, %message, "work item panicked, worker exiting");
                            if let Some(handler) = &fault_handler {
                                handler(&message);
                            }
                            notify();
                            break;
                        }
                    }
                    if worker_cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                }
            })
            .map_err(|e| {
                *self.shared.state.write() = ApartmentState::Uninitialized;
                AutomationError::Apartment(format!("failed to spawn apartment thread: {e}"))
            })?;

        match block_on(init_rx) {
            Ok(Ok(())) => {
                debug!(apartment = %self.name, generation, "apartment ready");
                Ok(Worker { sender, handle, cancelled })
            }
            Ok(Err(hr)) => {
                let _ = handle.join();
                Err(ComError::new("initialize apartment", hr).into())
            }
            Err(_) => {
                self.shared.transition(generation, ApartmentState::Uninitialized);
                Err(AutomationError::ApartmentFault(
                    "apartment worker died during runtime initialization".to_string(),
                ))
            }
        }
    }
}

impl Drop for ApartmentThread {
    fn drop(&mut self) {
        self.terminate(DROP_TERMINATE_TIMEOUT);
    }
}

/// Run a work item, turning a panic into a fault outcome
fn run_caught<T, F, R>(work: F, reply: R) -> JobOutcome
where
    F: FnOnce() -> T,
    R: FnOnce(Result<T>) + Send + 'static,
    T: Send + 'static,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => {
            reply(Ok(value));
            JobOutcome::Continue
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let failure = AutomationError::ApartmentFault(message.clone());
            JobOutcome::Fault {
                message,
                notify: Box::new(move || reply(Err(failure))),
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "work item panicked".to_string()
    }
}

fn worker_lost() -> AutomationError {
    AutomationError::Apartment("apartment worker stopped before completing the work item".to_string())
}
