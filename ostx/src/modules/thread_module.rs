use crate::common::{ModuleCapability, ModuleKind};
use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::ResourceId;
use crate::transaction::{DeferredLog, LogRecord, TransactionContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

enum SpawnState {
    Pending,
    Running(JoinHandle<()>),
    Joined,
    Discarded,
}

/// Handle to a thread requested with [`ThreadModule::spawn_on_commit`].
///
/// The thread exists only once the requesting transaction has committed.
#[derive(Clone)]
pub struct SpawnedThread {
    state: Arc<Mutex<SpawnState>>,
}

impl SpawnedThread {
    fn new() -> Self {
        SpawnedThread {
            state: Arc::new(Mutex::new(SpawnState::Pending)),
        }
    }

    /// `true` once the thread was started by a commit.
    pub fn is_spawned(&self) -> bool {
        matches!(
            *self.state.lock(),
            SpawnState::Running(_) | SpawnState::Joined
        )
    }

    /// `true` if the requesting transaction aborted.
    pub fn is_discarded(&self) -> bool {
        matches!(*self.state.lock(), SpawnState::Discarded)
    }

    /// Id of the running thread, if it was started and not yet joined.
    pub fn thread_id(&self) -> Option<ThreadId> {
        match &*self.state.lock() {
            SpawnState::Running(handle) => Some(handle.thread().id()),
            _ => None,
        }
    }

    /// Waits for the thread to finish.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidOperation`] if the thread was never started or was already
    /// joined, [`ErrorKind::InternalError`] if it panicked.
    pub fn join(&self) -> OstxResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), SpawnState::Joined);
        match previous {
            SpawnState::Running(handle) => handle.join().map_err(|_| {
                OstxError::new("Spawned thread panicked", ErrorKind::InternalError)
            }),
            other => {
                let message = match other {
                    SpawnState::Pending => "Thread has not been spawned yet",
                    SpawnState::Discarded => "Thread spawn was discarded by an abort",
                    _ => "Thread was already joined",
                };
                *self.state.lock() = other;
                Err(OstxError::new(message, ErrorKind::InvalidOperation))
            }
        }
    }

    fn start(&self, name: Option<&str>, body: ThreadBody) -> std::io::Result<()> {
        let mut builder = std::thread::Builder::new();
        if let Some(name) = name {
            builder = builder.name(name.to_string());
        }
        let handle = builder.spawn(body)?;
        *self.state.lock() = SpawnState::Running(handle);
        Ok(())
    }

    fn discard(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SpawnState::Pending) {
            *state = SpawnState::Discarded;
        }
    }
}

impl std::fmt::Debug for SpawnedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedThread")
            .field("spawned", &self.is_spawned())
            .field("discarded", &self.is_discarded())
            .finish()
    }
}

struct SpawnRequest {
    name: Option<String>,
    body: Mutex<Option<ThreadBody>>,
    handle: SpawnedThread,
}

impl std::fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("name", &self.name)
            .finish()
    }
}

/// Thread participant.
///
/// Identity queries are pure. Thread creation cannot be taken back, so it is deferred to
/// `apply`.
#[derive(Debug, Default)]
pub struct ThreadModule {
    log: DeferredLog<SpawnRequest>,
    requested: usize,
}

impl ThreadModule {
    /// Identity of the calling thread.
    pub fn current(&self) -> ThreadId {
        std::thread::current().id()
    }

    pub fn equal(&self, a: ThreadId, b: ThreadId) -> bool {
        a == b
    }

    /// Requests a thread that runs `body` once the transaction commits.
    pub fn spawn_on_commit<F>(&mut self, name: Option<&str>, body: F) -> SpawnedThread
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = SpawnedThread::new();
        let resource = ResourceId::Named(format!("thread-spawn-{}", self.requested));
        self.requested += 1;
        self.log.append(LogRecord::deferred(
            resource,
            SpawnRequest {
                name: name.map(str::to_string),
                body: Mutex::new(Some(Box::new(body))),
                handle: handle.clone(),
            },
        ));
        handle
    }

    pub fn pending_spawns(&self) -> usize {
        self.log.len()
    }
}

impl ModuleCapability for ThreadModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Thread
    }

    fn apply(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        let spawned = self.log.apply_all(|record| {
            let request = record.payload();
            match request.body.lock().take() {
                Some(body) => request
                    .handle
                    .start(request.name.as_deref(), body)
                    .map_err(|e| {
                        OstxError::new_with_cause(
                            "Deferred thread spawn failed",
                            ErrorKind::ModuleInternalError,
                            OstxError::from(e),
                        )
                    }),
                None => Ok(()),
            }
        })?;
        log::trace!("Transaction {} spawned {} threads", ctx.id(), spawned);
        Ok(())
    }

    fn undo(&mut self, _ctx: &TransactionContext) -> OstxResult<()> {
        self.log.undo_all(|record| {
            let request = record.payload();
            request.body.lock().take();
            request.handle.discard();
            Ok(())
        })?;
        Ok(())
    }

    fn release(&mut self) {
        for record in self.log.iter() {
            record.payload().handle.discard();
        }
        self.log.discard();
    }

    fn journal(&self) -> Vec<String> {
        self.log.journal(ModuleKind::Thread, |request| {
            ("spawn", request.name.as_deref().map(str::as_bytes))
        })
    }
}
