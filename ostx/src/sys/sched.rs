//! Scheduler interaction inside a transaction.

use crate::errors::OstxResult;
use crate::modules::SchedModule;
use crate::transaction::Transaction;

/// Yields the processor.
///
/// When the manager is configured with `validate_on_yield`, the yield point also validates
/// the transaction early. A conflict aborts the transaction and is returned as an error of
/// kind [`ErrorKind::ValidationConflict`](crate::errors::ErrorKind::ValidationConflict).
pub fn yield_now(tx: &mut Transaction) -> OstxResult<()> {
    tx.with_module::<SchedModule, _, _>(|m, ctx| {
        m.yield_now(ctx);
        Ok(())
    })?;
    if tx.context().config().validate_on_yield() {
        tx.validate_early()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::resource::ResourceId;
    use crate::transaction::{AbortReason, CommitOutcome};
    use crate::TransactionManager;

    #[test]
    fn test_yield_detects_conflict_early() {
        let manager = TransactionManager::new();
        let pipe = manager.open_pipe().unwrap();
        let mut tx = manager.begin();
        crate::pipe::write(&mut tx, &pipe, b"x").unwrap();
        yield_now(&mut tx).unwrap();

        manager.resources().versions().bump(&ResourceId::PipeWrite(pipe.id()));
        let err = yield_now(&mut tx).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationConflict);
        assert_eq!(
            tx.outcome(),
            Some(CommitOutcome::Aborted(AbortReason::ValidationFailed))
        );
        assert_eq!(pipe.buffered_len(), 0);
    }

    #[test]
    fn test_yield_without_early_validation() {
        let manager = TransactionManager::builder()
            .validate_on_yield(false)
            .build()
            .unwrap();
        let pipe = manager.open_pipe().unwrap();
        let mut tx = manager.begin();
        crate::pipe::write(&mut tx, &pipe, b"x").unwrap();
        manager.resources().versions().bump(&pipe.write_id());

        yield_now(&mut tx).unwrap();
        assert!(tx.is_active());
        assert_eq!(
            tx.commit().unwrap(),
            CommitOutcome::Aborted(AbortReason::ValidationFailed)
        );
    }
}
