use awaitility::at_most;
use ostx::common::ModuleKind;
use ostx::errors::{ErrorKind, OstxError, OstxResult};
use ostx::transaction::{JournalLine, TransactionEventInfo, TransactionEventListener};
use ostx::{pipe, AbortReason, CommitOutcome, TransactionManager};
use ostx_int_test::test_util::{
    cleanup, create_test_context, create_test_context_with, run_test, TestContext,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[ctor::ctor]
fn init() {
    colog::init();
}

fn collector() -> (TransactionEventListener, Arc<Mutex<Vec<TransactionEventInfo>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener = TransactionEventListener::new(move |event| {
        sink.lock().push(event);
        Ok(())
    });
    (listener, events)
}

#[test]
fn test_listener_sees_every_outcome() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let (listener, events) = collector();
            let subscriber = manager.subscribe(listener)?;
            let channel = manager.open_pipe()?;

            let mut tx = manager.begin();
            pipe::write(&mut tx, &channel, b"x")?;
            let committed_id = tx.id();
            tx.commit()?;

            let mut tx = manager.begin();
            pipe::write(&mut tx, &channel, b"y")?;
            let aborted_id = tx.id();
            tx.abort()?;

            at_most(Duration::from_secs(1)).until(|| events.lock().len() == 2);
            {
                let events = events.lock();
                assert_eq!(events[0].id(), committed_id);
                assert_eq!(events[0].outcome(), CommitOutcome::Committed);
                assert_eq!(events[0].participants(), &[ModuleKind::Pipe]);
                assert!(events[0].timestamp() >= events[0].started_at());
                assert_eq!(events[1].id(), aborted_id);
                assert_eq!(
                    events[1].outcome(),
                    CommitOutcome::Aborted(AbortReason::Requested)
                );
            }

            manager.unsubscribe(subscriber)?;
            manager.begin().abort()?;
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(events.lock().len(), 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failing_listener_does_not_change_outcome() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            manager.subscribe(TransactionEventListener::new(|_| {
                Err(OstxError::new("listener broke", ErrorKind::EventError))
            }))?;
            let channel = manager.open_pipe()?;

            let mut tx = manager.begin();
            pipe::write(&mut tx, &channel, b"data")?;
            assert_eq!(tx.commit()?, CommitOutcome::Committed);
            assert_eq!(channel.read(8)?, b"data");
            Ok(())
        },
        cleanup,
    )
}

fn retrying_context() -> OstxResult<TestContext> {
    let manager = TransactionManager::builder()
        .max_retries(3)
        .retry_backoff(Duration::from_millis(1))
        .build()?;
    create_test_context_with(manager)
}

#[test]
fn test_stats_count_retries() {
    run_test(
        retrying_context,
        |ctx| {
            let manager = ctx.manager();
            let before = manager.stats();
            let mut attempts = 0;
            let result: Result<(), _> = manager.run(|_tx| {
                attempts += 1;
                Err(OstxError::new("always busy", ErrorKind::ResourceBusy))
            });
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::ResourceBusy);
            assert_eq!(attempts, 4);

            let after = manager.stats();
            assert_eq!(after.started - before.started, 4);
            assert_eq!(after.retried - before.retried, 3);
            assert_eq!(after.requested - before.requested, 4);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_journal_lines_parse_back() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let channel = manager.open_pipe()?;
            let path = ctx.file("journal.txt");

            let mut tx = manager.begin();
            let fd = ostx::fs::open(
                &mut tx,
                &path,
                ostx::fs::OpenFlags::new().write(true).create(true),
            )?;
            ostx::fs::write(&mut tx, fd, b"line one\nline two")?;
            pipe::write(&mut tx, &channel, &[0, 1, 2, 255])?;

            let lines = tx
                .journal()
                .iter()
                .map(|line| JournalLine::parse(line))
                .collect::<Result<Vec<_>, _>>()?;
            assert_eq!(lines.len(), 3);
            assert_eq!(lines[0].op(), "create");
            assert_eq!(lines[1].op(), "write");
            assert_eq!(lines[1].payload(), b"line one\nline two");
            assert_eq!(lines[2].module(), "pipe");
            assert_eq!(lines[2].payload(), &[0, 1, 2, 255]);
            tx.abort()?;
            Ok(())
        },
        cleanup,
    )
}
