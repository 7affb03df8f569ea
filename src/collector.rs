//! The process-wide sink behind every instrumented call site.
//!
//! `record` captures the values with the thread's reentrancy guard held but
//! outside the store lock; only the flag check and the insert are exclusive.
//! Capturing runs arbitrary `toString()` code, which may wait on monitors held
//! by threads that are themselves about to record. The store sits in a
//! [`ReentrantMutex`] so that a declaration made on the thread that is writing
//! the store reaches the borrow check instead of deadlocking.

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use crate::codec::ValueCodec;
use crate::error::{Error, Result};
use crate::guard::ReentrancyGuard;
use crate::instrument::{Declaration, DeclarationSink};
use crate::store::{CoverageStore, Observation, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectorMode {
    /// Record argument values.
    #[default]
    Coverage,
    /// Only declare members; values are never captured.
    Template,
}

/// What a call to [`Collector::record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new observation was stored.
    Recorded,
    /// The observation was already present.
    Duplicate,
    /// Template mode: the member was declared, no values kept.
    Declared,
    /// The thread was already collecting; nothing happened.
    Reentrant,
    /// The store is being written out; nothing happened.
    Serializing,
    /// The store is borrowed further up this thread's stack; nothing happened.
    Busy,
}

type Initializer = Box<dyn FnOnce(&Collector) -> Result<()> + Send>;

pub struct Collector {
    store: ReentrantMutex<RefCell<CoverageStore>>,
    serializing: AtomicBool,
    mode: CollectorMode,
    initializer: Mutex<Option<Initializer>>,
    initialized: AtomicBool,
    init_failure: Mutex<Option<String>>,
    canonical: Option<Arc<dyn ValueCodec>>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("mode", &self.mode)
            .field("serializing", &self.serializing.load(Ordering::Relaxed))
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("canonical", &self.canonical.as_ref().map(|c| c.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(CoverageStore::new(), CollectorMode::Coverage)
    }
}

/// Clears the serializing flag when the write finishes, also on error.
struct SerializingFlag<'a>(&'a AtomicBool);

impl<'a> SerializingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for SerializingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Collector {
    pub fn new(store: CoverageStore, mode: CollectorMode) -> Self {
        Self {
            store: ReentrantMutex::new(RefCell::new(store)),
            serializing: AtomicBool::new(false),
            mode,
            initializer: Mutex::new(None),
            initialized: AtomicBool::new(false),
            init_failure: Mutex::new(None),
            canonical: None,
        }
    }

    /// Stores observations in the form `codec` reads them back, so a file
    /// written with a lossy codec and merged in again does not gain
    /// duplicates.
    pub fn with_canonical_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.canonical = Some(codec);
        self
    }

    pub fn mode(&self) -> CollectorMode {
        self.mode
    }

    /// Sets the one-shot initializer run by the first [`record`](Self::record)
    /// or an explicit [`initialize`](Self::initialize).
    pub fn set_initializer<F>(&self, f: F)
    where
        F: FnOnce(&Collector) -> Result<()> + Send + 'static,
    {
        *self.initializer.lock() = Some(Box::new(f));
        *self.init_failure.lock() = None;
        self.initialized.store(false, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Runs the initializer if it has not run yet. The first call returns the
    /// initializer's own error; every later call reports it again as
    /// [`Error::Initialization`].
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return self.previous_failure();
        }
        let mut slot = self.initializer.lock();
        if self.initialized.load(Ordering::Acquire) {
            return self.previous_failure();
        }
        let init = slot.take();
        let result = match init {
            Some(f) => f(self),
            None => Ok(()),
        };
        if let Err(error) = &result {
            *self.init_failure.lock() = Some(error.to_string());
        }
        self.initialized.store(true, Ordering::Release);
        result
    }

    fn previous_failure(&self) -> Result<()> {
        match self.init_failure.lock().as_ref() {
            Some(message) => Err(Error::Initialization(message.clone())),
            None => Ok(()),
        }
    }

    fn canonical(&self, observation: Observation) -> Observation {
        match &self.canonical {
            Some(codec) => codec.canonical(observation),
            None => observation,
        }
    }

    /// Inserts an empty observation list for the member if it has none.
    pub fn declare(&self, owner: &str, member: &str) -> bool {
        let cell = self.store.lock();
        let Ok(mut store) = cell.try_borrow_mut() else {
            debug!(owner, member, "store busy on this thread, declaration dropped");
            return false;
        };
        store.declare(owner, member)
    }

    pub fn record(&self, owner: &str, member: &str, signature: &str, values: Vec<Value>) -> RecordOutcome {
        self.record_with(owner, member, signature, move || values)
    }

    /// Like [`record`](Self::record), but the values are produced by `capture`
    /// with the reentrancy guard held. Instrumented code that `capture` ends
    /// up running on this thread is not recorded. The store lock is not held
    /// while `capture` runs.
    pub fn record_with<F>(&self, owner: &str, member: &str, signature: &str, capture: F) -> RecordOutcome
    where
        F: FnOnce() -> Vec<Value>,
    {
        if !self.initialized.load(Ordering::Acquire) {
            if let Err(error) = self.initialize() {
                warn!(%error, "coverage initializer failed");
            }
        }

        let Some(_guard) = ReentrancyGuard::enter() else {
            return RecordOutcome::Reentrant;
        };

        if self.mode == CollectorMode::Template {
            let cell = self.store.lock();
            if self.serializing.load(Ordering::Acquire) {
                return RecordOutcome::Serializing;
            }
            return match cell.try_borrow_mut() {
                Ok(mut store) => {
                    store.declare(owner, member);
                    RecordOutcome::Declared
                }
                Err(_) => RecordOutcome::Busy,
            };
        }

        let observation = self.canonical(Observation::new(capture()));
        trace!(owner, member, signature, values = observation.len(), "record");

        let cell = self.store.lock();
        if self.serializing.load(Ordering::Acquire) {
            return RecordOutcome::Serializing;
        }
        let Ok(mut store) = cell.try_borrow_mut() else {
            return RecordOutcome::Busy;
        };
        if store.add(owner, member, observation) {
            RecordOutcome::Recorded
        } else {
            RecordOutcome::Duplicate
        }
    }

    /// Empties the store. Meant for tests.
    pub fn reset(&self) {
        self.replace(CoverageStore::new());
    }

    /// Swaps in `store` and returns the previous contents.
    pub fn replace(&self, store: CoverageStore) -> CoverageStore {
        self.store.lock().replace(store)
    }

    /// Unions `other` into the store, in canonical form when a canonical
    /// codec is set.
    pub fn merge(&self, other: CoverageStore) {
        let other = match &self.canonical {
            Some(codec) => other.canonicalize(codec.as_ref()),
            None => other,
        };
        let cell = self.store.lock();
        cell.borrow_mut().merge(other);
    }

    pub fn snapshot(&self) -> CoverageStore {
        self.with_store(CoverageStore::clone)
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&CoverageStore) -> R) -> R {
        let cell = self.store.lock();
        let store = cell.borrow();
        f(&store)
    }

    /// Writes the store with `codec`. Records arriving on this thread while
    /// the write runs are skipped.
    pub fn write_to<W: Write>(&self, writer: &mut W, codec: &dyn ValueCodec) -> Result<()> {
        let cell = self.store.lock();
        let _flag = SerializingFlag::raise(&self.serializing);
        let store = cell.borrow();
        store.write_to(writer, codec)
    }

    pub fn save_to(&self, path: &Path, codec: &dyn ValueCodec) -> Result<()> {
        let cell = self.store.lock();
        let _flag = SerializingFlag::raise(&self.serializing);
        let store = cell.borrow();
        store.save(path, codec)
    }
}

impl DeclarationSink for Collector {
    fn declare(&self, declaration: &Declaration) {
        Collector::declare(self, &declaration.owner, &declaration.member);
    }
}
