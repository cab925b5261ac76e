use crate::common::{encode, HeldLocks, ModuleCapability, ModuleKind};
use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::{AccessSet, PipePair, ResourceId};
use crate::transaction::{DeferredLog, LogRecord, TransactionContext};
use std::collections::BTreeMap;

#[derive(Debug)]
enum PipeOp {
    Write(Vec<u8>),
    Read { offset: u64, bytes: Vec<u8> },
}

/// Where this transaction's reads of one pipe started and where the next one continues.
#[derive(Debug, Clone, Copy)]
struct ReadCursor {
    start: u64,
    next: u64,
}

/// Pipe participant.
///
/// Writes are buffered and reach the pipe only in `apply`, in the order they were issued.
/// Reads peek at the pipe's shared buffer and leave the bytes in place. `apply` consumes
/// them, so an aborted reader never disturbs the stream.
#[derive(Debug, Default)]
pub struct PipeModule {
    pipes: BTreeMap<u64, PipePair>,
    cursors: BTreeMap<u64, ReadCursor>,
    log: DeferredLog<PipeOp>,
    access: AccessSet,
    held: HeldLocks,
}

impl PipeModule {
    /// Buffers `bytes` for the write end of `pipe`. Returns the number of bytes accepted.
    pub fn write(
        &mut self,
        ctx: &TransactionContext,
        pipe: &PipePair,
        bytes: &[u8],
    ) -> OstxResult<usize> {
        if pipe.is_writer_closed() {
            return Err(OstxError::new(
                &format!("Write end of pipe {} is closed", pipe.id()),
                ErrorKind::InvalidOperation,
            ));
        }
        let id = pipe.write_id();
        self.track(pipe);
        self.access.write(ctx.versions(), &id);
        log::trace!("Transaction {} buffered write to {}: {}", ctx.id(), id, encode(bytes));
        self.log
            .append(LogRecord::deferred(id, PipeOp::Write(bytes.to_vec())));
        Ok(bytes.len())
    }

    /// Reads up to `max` bytes from `pipe`, blocking until data is available.
    ///
    /// Successive reads continue where the previous one stopped. The bytes stay in the pipe
    /// until commit. An empty result means end of stream.
    pub fn read(
        &mut self,
        ctx: &TransactionContext,
        pipe: &PipePair,
        max: usize,
    ) -> OstxResult<Vec<u8>> {
        let id = pipe.read_id();
        self.track(pipe);
        // version first: a consumer publishes only after moving the front
        self.access.write(ctx.versions(), &id);

        let cursor = self.cursors.entry(pipe.id()).or_insert_with(|| {
            let front = pipe.front();
            ReadCursor {
                start: front,
                next: front,
            }
        });
        let offset = cursor.next;
        let bytes = pipe.peek_at(offset, max)?;
        cursor.next += bytes.len() as u64;

        if !bytes.is_empty() {
            log::trace!(
                "Transaction {} read {} bytes of {} at {}",
                ctx.id(),
                bytes.len(),
                id,
                offset
            );
            self.log.append(LogRecord::deferred(
                id,
                PipeOp::Read {
                    offset,
                    bytes: bytes.clone(),
                },
            ));
        }
        Ok(bytes)
    }

    /// Number of bytes buffered for `pipe` and not yet written.
    pub fn pending_bytes(&self, pipe: &PipePair) -> usize {
        let id = pipe.write_id();
        self.log
            .iter()
            .filter(|r| r.resource() == &id)
            .map(|r| match r.payload() {
                PipeOp::Write(bytes) => bytes.len(),
                PipeOp::Read { .. } => 0,
            })
            .sum()
    }

    fn track(&mut self, pipe: &PipePair) {
        self.pipes
            .entry(pipe.id())
            .or_insert_with(|| pipe.clone());
    }

    fn pipe_of(&self, id: &ResourceId) -> OstxResult<&PipePair> {
        let key = match id {
            ResourceId::PipeRead(key) | ResourceId::PipeWrite(key) => *key,
            other => {
                return Err(OstxError::new(
                    &format!("{} is not a pipe", other),
                    ErrorKind::InternalError,
                ))
            }
        };
        self.pipes.get(&key).ok_or_else(|| {
            OstxError::new(
                &format!("Pipe {} is not tracked by this transaction", key),
                ErrorKind::InternalError,
            )
        })
    }

    /// `true` while no one consumed from any pipe this transaction reads.
    fn fronts_unmoved(&self) -> bool {
        self.cursors.iter().all(|(key, cursor)| {
            self.pipes
                .get(key)
                .is_some_and(|pipe| pipe.front() == cursor.start)
        })
    }
}

impl ModuleCapability for PipeModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Pipe
    }

    fn lock(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        let ids = self.access.observed().cloned().collect::<Vec<_>>();
        self.held
            .acquire_all(ctx.locks(), ids, ctx.id(), ctx.config().lock_timeout())
    }

    fn unlock(&mut self, ctx: &TransactionContext) {
        self.held.release_all(ctx.locks(), ctx.id());
    }

    fn validate(&self, ctx: &TransactionContext, _eotx: bool) -> bool {
        self.access.validate(ctx.versions()) && self.fronts_unmoved()
    }

    fn apply(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        let mut log = std::mem::take(&mut self.log);
        let result = log.apply_all(|record| {
            let pipe = self.pipe_of(record.resource())?;
            let outcome = match record.payload() {
                PipeOp::Write(bytes) => pipe.write_all(bytes),
                PipeOp::Read { offset, bytes } => pipe.consume_at(*offset, bytes.len()),
            };
            outcome.map_err(|e| {
                OstxError::new_with_cause(
                    &format!("Deferred operation on {} failed", record.resource()),
                    ErrorKind::ModuleInternalError,
                    e,
                )
            })
        });
        // records applied before a failure are on the pipe
        self.access.publish(ctx.versions());
        self.cursors.clear();

        let applied = result?;
        log::trace!("Transaction {} applied {} pipe records", ctx.id(), applied);
        Ok(())
    }

    fn undo(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        // nothing reached the pipes, so dropping the records is enough
        let dropped = self.log.undo_all(|_| Ok(()))?;
        self.cursors.clear();
        log::trace!("Transaction {} dropped {} pipe records", ctx.id(), dropped);
        Ok(())
    }

    fn release(&mut self) {
        self.log.discard();
        self.pipes.clear();
        self.cursors.clear();
        self.access.clear();
    }

    fn journal(&self) -> Vec<String> {
        self.log.journal(ModuleKind::Pipe, |op| match op {
            PipeOp::Write(bytes) => ("write", Some(bytes.as_slice())),
            PipeOp::Read { bytes, .. } => ("read", Some(bytes.as_slice())),
        })
    }
}
