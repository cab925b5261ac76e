use awaitility::at_most;
use ostx::pipe;
use ostx_int_test::test_util::{cleanup, create_test_context, run_test};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_reader_sees_nothing_until_commit() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let channel = manager.open_pipe()?;
            let received = Arc::new(Mutex::new(Vec::new()));
            let reading = Arc::new(AtomicBool::new(false));

            let reader = {
                let channel = channel.clone();
                let received = received.clone();
                let reading = reading.clone();
                thread::spawn(move || {
                    reading.store(true, Ordering::SeqCst);
                    loop {
                        let chunk = channel.read(64).unwrap();
                        if chunk.is_empty() {
                            break;
                        }
                        received.lock().extend_from_slice(&chunk);
                    }
                })
            };

            let mut tx = manager.begin();
            assert_eq!(pipe::write(&mut tx, &channel, b"hello")?, 5);

            at_most(Duration::from_secs(1)).until(|| reading.load(Ordering::SeqCst));
            thread::sleep(Duration::from_millis(50));
            assert!(received.lock().is_empty());

            assert!(tx.commit()?.is_committed());
            at_most(Duration::from_secs(2)).until(|| received.lock().len() == 5);
            assert_eq!(received.lock().as_slice(), b"hello");

            channel.close_writer();
            reader.join().unwrap();
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_aborted_write_never_reaches_reader() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let channel = manager.open_pipe()?;

            let mut tx = manager.begin();
            pipe::write(&mut tx, &channel, b"discarded")?;
            tx.abort()?;

            let mut tx = manager.begin();
            pipe::write(&mut tx, &channel, b"kept")?;
            tx.commit()?;

            assert_eq!(channel.read(64)?, b"kept");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_writes_commit_in_program_order() {
    run_test(
        create_test_context,
        |ctx| {
            let manager = ctx.manager();
            let channel = manager.open_pipe()?;

            manager.run(|tx| {
                pipe::write(tx, &channel, b"one ")?;
                pipe::write(tx, &channel, b"two ")?;
                pipe::write(tx, &channel, b"three")?;
                Ok(())
            })?;

            let mut seen = Vec::new();
            while seen.len() < 13 {
                seen.extend(channel.read(64)?);
            }
            assert_eq!(seen, b"one two three");
            Ok(())
        },
        cleanup,
    )
}
