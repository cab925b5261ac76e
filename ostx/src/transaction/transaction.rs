use crate::common::{ModuleCapability, ModuleKind, Participant};
use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::transaction::{
    AbortReason, CommitOutcome, ParticipantHandle, TransactionContext, TransactionEventBus,
    TransactionEventInfo, TransactionId, TransactionPhase, TransactionStats,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Manager-owned sinks a transaction reports to once released.
#[derive(Clone)]
pub(crate) struct TransactionHooks {
    pub(crate) event_bus: TransactionEventBus,
    pub(crate) stats: TransactionStats,
}

/// One logical unit of work over operating-system resources.
///
/// While the transaction is `ACTIVE`, wrapper calls register modules and append to their
/// logs. [`commit`](Self::commit) then drives every participant, in canonical
/// [`ModuleKind`] order, through
///
/// 1. `lock` with a bounded wait,
/// 2. `validate` at end of transaction,
/// 3. `apply` if every participant is valid, `undo` otherwise,
/// 4. `finish`, `unlock` and `release`.
///
/// A transaction that is dropped while still `ACTIVE` is aborted.
///
/// # Examples
///
/// ```rust
/// use ostx::{pipe, TransactionManager};
///
/// let manager = TransactionManager::new();
/// let channel = manager.open_pipe().unwrap();
///
/// let mut tx = manager.begin();
/// pipe::write(&mut tx, &channel, b"hello").unwrap();
/// assert!(tx.commit().unwrap().is_committed());
///
/// assert_eq!(channel.read(5).unwrap(), b"hello");
/// ```
pub struct Transaction {
    ctx: TransactionContext,
    phase: TransactionPhase,
    participants: BTreeMap<ModuleKind, Participant>,
    roster: Vec<ModuleKind>,
    outcome: Option<CommitOutcome>,
    started_at: DateTime<Utc>,
    hooks: Option<TransactionHooks>,
}

impl Transaction {
    /// Begins a transaction that reports to no manager.
    pub fn new(ctx: TransactionContext) -> Self {
        Self::with_hooks(ctx, None)
    }

    pub(crate) fn with_hooks(ctx: TransactionContext, hooks: Option<TransactionHooks>) -> Self {
        log::debug!("Transaction {} began", ctx.id());
        Transaction {
            ctx,
            phase: TransactionPhase::Active,
            participants: BTreeMap::new(),
            roster: Vec::new(),
            outcome: None,
            started_at: Utc::now(),
            hooks,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.ctx.id()
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == TransactionPhase::Active
    }

    /// Final outcome, once the transaction is released.
    pub fn outcome(&self) -> Option<CommitOutcome> {
        self.outcome
    }

    pub fn context(&self) -> &TransactionContext {
        &self.ctx
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Participating module kinds in lock order.
    pub fn participants(&self) -> &[ModuleKind] {
        &self.roster
    }

    /// Adds `module` to the transaction.
    ///
    /// Registration is idempotent per [`ModuleKind`]: if a participant of the same kind is
    /// already present, `module` is dropped and the existing participant is kept.
    pub fn register_module<M: ModuleCapability>(
        &mut self,
        module: M,
    ) -> OstxResult<ParticipantHandle> {
        self.ensure_active("register a module")?;
        let kind = module.kind();
        self.insert_participant(kind, module);
        Ok(ParticipantHandle::new(self.id(), kind))
    }

    /// Runs `f` against the participant of type `M`, registering a default instance first if
    /// the transaction has none.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidOperation`] if the transaction is no longer active, or if a
    /// participant of a different type already owns `M`'s kind. Errors returned by `f` are
    /// passed through.
    pub fn with_module<M, R, F>(&mut self, f: F) -> OstxResult<R>
    where
        M: ModuleCapability + Default,
        F: FnOnce(&mut M, &TransactionContext) -> OstxResult<R>,
    {
        self.ensure_active("use a module")?;

        let registered = self
            .participants
            .values()
            .any(|p| p.downcast_ref::<M>().is_some());
        if !registered {
            let module = M::default();
            let kind = module.kind();
            if self.participants.contains_key(&kind) {
                log::error!("Module kind {} is already taken by another module type", kind);
                return Err(OstxError::new(
                    &format!("Module kind {} is already taken by another module type", kind),
                    ErrorKind::InvalidOperation,
                ));
            }
            self.insert_participant(kind, module);
        }

        let ctx = self.ctx.clone();
        let module = self
            .participants
            .values_mut()
            .find_map(|p| p.downcast_mut::<M>())
            .ok_or_else(|| {
                OstxError::new("Registered module disappeared", ErrorKind::InternalError)
            })?;
        f(module, &ctx)
    }

    /// Returns the participant of type `M`, if registered.
    pub fn module<M: ModuleCapability>(&self) -> Option<&M> {
        self.participants
            .values()
            .find_map(|p| p.downcast_ref::<M>())
    }

    /// Commits the transaction.
    ///
    /// Contention and module faults are reported through the returned outcome. `Err` is
    /// only returned when the transaction is not `ACTIVE`.
    pub fn commit(&mut self) -> OstxResult<CommitOutcome> {
        self.ensure_active("commit")?;
        log::debug!(
            "Transaction {} committing with participants {:?}",
            self.id(),
            self.roster
        );

        let ctx = self.ctx.clone();
        let mut locked = Vec::with_capacity(self.participants.len());
        let mut lock_failure = None;
        for (kind, participant) in self.participants.iter_mut() {
            match participant.module_mut().lock(&ctx) {
                Ok(()) => locked.push(*kind),
                Err(e) => {
                    let reason = if e.kind() == &ErrorKind::ResourceBusy {
                        AbortReason::LockFailed
                    } else {
                        AbortReason::ModuleError(e.code())
                    };
                    log::warn!(
                        "Transaction {} failed to lock {} module: {}",
                        ctx.id(),
                        kind,
                        e
                    );
                    lock_failure = Some(reason);
                    break;
                }
            }
        }

        if let Some(reason) = lock_failure {
            self.advance(TransactionPhase::Undoing)?;
            let reason = self.undo_participants(reason);
            return self.finish_and_release(&locked, CommitOutcome::Aborted(reason));
        }

        self.advance(TransactionPhase::Locked)?;
        self.advance(TransactionPhase::Validating)?;

        let valid = self.participants.iter().all(|(kind, participant)| {
            let valid = participant.module().validate(&ctx, true);
            if !valid {
                log::debug!("Transaction {} invalidated by {} module", ctx.id(), kind);
            }
            valid
        });

        if !valid {
            self.advance(TransactionPhase::Undoing)?;
            let reason = self.undo_participants(AbortReason::ValidationFailed);
            return self.finish_and_release(&locked, CommitOutcome::Aborted(reason));
        }

        self.advance(TransactionPhase::Applying)?;
        let mut fault = None;
        for (kind, participant) in self.participants.iter_mut() {
            if let Err(e) = participant.module_mut().apply(&ctx) {
                log::error!(
                    "Transaction {} failed to apply {} module after validation: {:?}",
                    ctx.id(),
                    kind,
                    e
                );
                fault.get_or_insert(e.code());
            }
        }

        let outcome = match fault {
            Some(code) => CommitOutcome::Aborted(AbortReason::ModuleError(code)),
            None => CommitOutcome::Committed,
        };
        self.finish_and_release(&locked, outcome)
    }

    /// Validates every participant mid-transaction.
    ///
    /// On conflict the transaction is aborted at once and an error of kind
    /// [`ErrorKind::ValidationConflict`] is returned.
    pub fn validate_early(&mut self) -> OstxResult<()> {
        self.ensure_active("validate")?;
        let ctx = self.ctx.clone();
        let valid = self
            .participants
            .values()
            .all(|participant| participant.module().validate(&ctx, false));
        if valid {
            return Ok(());
        }

        log::debug!("Transaction {} failed early validation", ctx.id());
        let outcome = self.abort_with(AbortReason::ValidationFailed)?;
        Err(OstxError::new(
            &format!("Transaction {} {}", ctx.id(), outcome),
            ErrorKind::ValidationConflict,
        ))
    }

    /// Aborts the transaction, reverting every speculative effect.
    pub fn abort(&mut self) -> OstxResult<CommitOutcome> {
        self.ensure_active("abort")?;
        self.abort_with(AbortReason::Requested)
    }

    /// Text-safe description of every record buffered so far, participants in lock order.
    pub fn journal(&self) -> Vec<String> {
        self.participants
            .values()
            .flat_map(|participant| participant.module().journal())
            .collect()
    }

    fn insert_participant<M: ModuleCapability>(&mut self, kind: ModuleKind, module: M) {
        if self.participants.contains_key(&kind) {
            return;
        }
        log::debug!("Transaction {} registered {} module", self.id(), kind);
        self.participants.insert(kind, Participant::new(module));
        self.roster = self.participants.keys().copied().collect();
    }

    fn abort_with(&mut self, reason: AbortReason) -> OstxResult<CommitOutcome> {
        self.advance(TransactionPhase::Undoing)?;
        let reason = self.undo_participants(reason);
        self.finish_and_release(&[], CommitOutcome::Aborted(reason))
    }

    /// Undoes every participant, newest kind first. A failing undo turns the abort into a
    /// module fault.
    fn undo_participants(&mut self, reason: AbortReason) -> AbortReason {
        let ctx = self.ctx.clone();
        let mut fault = None;
        for (kind, participant) in self.participants.iter_mut().rev() {
            if let Err(e) = participant.module_mut().undo(&ctx) {
                log::error!(
                    "Transaction {} failed to undo {} module: {:?}",
                    ctx.id(),
                    kind,
                    e
                );
                fault.get_or_insert(e.code());
            }
        }
        match fault {
            Some(code) => AbortReason::ModuleError(code),
            None => reason,
        }
    }

    fn finish_and_release(
        &mut self,
        locked: &[ModuleKind],
        outcome: CommitOutcome,
    ) -> OstxResult<CommitOutcome> {
        self.advance(TransactionPhase::Finishing)?;
        let ctx = self.ctx.clone();

        for participant in self.participants.values_mut() {
            participant.module_mut().finish(&ctx);
        }
        for kind in locked.iter().rev() {
            if let Some(participant) = self.participants.get_mut(kind) {
                participant.module_mut().unlock(&ctx);
            }
        }
        for mut participant in std::mem::take(&mut self.participants).into_values() {
            participant.module_mut().release();
        }

        self.advance(TransactionPhase::Released)?;
        self.outcome = Some(outcome);
        log::debug!("Transaction {} released: {}", ctx.id(), outcome);
        self.report(outcome);
        Ok(outcome)
    }

    fn report(&self, outcome: CommitOutcome) {
        if let Some(hooks) = &self.hooks {
            hooks.stats.record_outcome(outcome);
            let event = TransactionEventInfo::new(
                self.id(),
                outcome,
                self.roster.clone(),
                self.started_at,
            );
            if let Err(e) = hooks.event_bus.publish(event) {
                log::warn!("Failed to publish event for transaction {}: {}", self.id(), e);
            }
        }
    }

    fn advance(&mut self, next: TransactionPhase) -> OstxResult<()> {
        if !self.phase.can_advance_to(next) {
            log::error!(
                "Transaction {} cannot move from {} to {}",
                self.id(),
                self.phase,
                next
            );
            return Err(OstxError::new(
                &format!("Illegal transition from {} to {}", self.phase, next),
                ErrorKind::InternalError,
            ));
        }
        log::trace!("Transaction {} {} -> {}", self.id(), self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> OstxResult<()> {
        if self.phase != TransactionPhase::Active {
            log::error!(
                "Cannot {} in transaction {}, phase is {}",
                action,
                self.id(),
                self.phase
            );
            return Err(OstxError::new(
                &format!("Cannot {} in phase {}", action, self.phase),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            log::debug!("Transaction {} dropped while active, aborting", self.id());
            if let Err(e) = self.abort_with(AbortReason::Requested) {
                log::error!("Failed to abort dropped transaction {}: {}", self.id(), e);
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("phase", &self.phase)
            .field("participants", &self.roster)
            .field("outcome", &self.outcome)
            .finish()
    }
}
