//! Thread identity and creation inside a transaction.

use crate::errors::OstxResult;
use crate::modules::ThreadModule;
use crate::transaction::Transaction;
use std::thread::ThreadId;

pub use crate::modules::SpawnedThread;

pub fn current(tx: &mut Transaction) -> OstxResult<ThreadId> {
    tx.with_module::<ThreadModule, _, _>(|m, _| Ok(m.current()))
}

pub fn equal(a: ThreadId, b: ThreadId) -> bool {
    a == b
}

/// Starts a thread running `body` when `tx` commits. Nothing runs if it aborts.
pub fn spawn_on_commit<F>(tx: &mut Transaction, name: Option<&str>, body: F) -> OstxResult<SpawnedThread>
where
    F: FnOnce() + Send + 'static,
{
    tx.with_module::<ThreadModule, _, _>(|m, _| Ok(m.spawn_on_commit(name, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionManager;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_spawn_on_commit_runs_after_commit() {
        let manager = TransactionManager::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let mut tx = manager.begin();
        let me = current(&mut tx).unwrap();
        assert!(equal(me, std::thread::current().id()));
        let handle = spawn_on_commit(&mut tx, Some("committed"), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert!(!handle.is_spawned());

        assert!(tx.commit().unwrap().is_committed());
        awaitility::at_most(Duration::from_secs(2)).until(|| ran.load(Ordering::SeqCst));
        handle.join().unwrap();
    }

    #[test]
    fn test_spawn_discarded_on_abort() {
        let manager = TransactionManager::new();
        let mut tx = manager.begin();
        let handle = spawn_on_commit(&mut tx, None, || panic!("must not run")).unwrap();
        tx.abort().unwrap();
        assert!(handle.is_discarded());
    }
}
