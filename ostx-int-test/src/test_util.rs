use ostx::errors::{ErrorKind, OstxError, OstxResult};
use ostx::TransactionManager;
use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Number of attempts [`run_test`] makes before reporting a failure.
pub const TEST_ATTEMPTS: u32 = 3;

/// Runs `test` between `before` and `after`, retrying the whole sequence.
///
/// Contention tests depend on thread timing, so an attempt that fails or panics is repeated
/// with a fresh context before the test is reported as failed. `after` runs even when `test`
/// returns an error.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> OstxResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> OstxResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> OstxResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let mut failure = String::new();
    let mut trace = None;

    for attempt in 1..=TEST_ATTEMPTS {
        let started = Instant::now();
        let outcome = std::panic::catch_unwind(|| attempt_once(&before, &test, &after));

        failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err((message, backtrace))) => {
                trace = Some(backtrace);
                message
            }
            Err(payload) => {
                trace = Some(Backtrace::capture().to_string());
                format!("Panic: {}", panic_message(payload.as_ref()))
            }
        };

        if attempt < TEST_ATTEMPTS {
            let pause = Duration::from_millis(100 * attempt as u64);
            eprintln!(
                "\n---- attempt {}/{} failed after {:?}, retrying in {:?} ----\n{}\n",
                attempt,
                TEST_ATTEMPTS,
                started.elapsed(),
                pause,
                failure
            );
            thread::sleep(pause);
        }
    }

    if let Some(bt) = trace.filter(|bt| !bt.is_empty() && !bt.contains("disabled")) {
        eprintln!("\nBacktrace:\n{}", bt);
    }
    panic!("Test failed after {} attempts. Last error: {}", TEST_ATTEMPTS, failure);
}

fn attempt_once<T, B, A>(before: &B, test: &T, after: &A) -> Result<(), (String, String)>
where
    T: Fn(TestContext) -> OstxResult<()>,
    B: Fn() -> OstxResult<TestContext>,
    A: Fn(TestContext) -> OstxResult<()>,
{
    let backtrace = || Backtrace::capture().to_string();
    let ctx = before().map_err(|e| (format!("Before run failed: {:?}", e), backtrace()))?;
    match test(ctx.clone()) {
        Ok(()) => after(ctx).map_err(|e| (format!("After run failed: {:?}", e), backtrace())),
        Err(e) => {
            if let Err(cleanup) = after(ctx) {
                eprintln!("Cleanup after failed attempt also failed: {:?}", cleanup);
            }
            Err((format!("Test failed: {:?}", e), backtrace()))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unknown panic".to_string())
}

/// A manager plus a private scratch directory.
#[derive(Clone)]
pub struct TestContext {
    dir: PathBuf,
    manager: TransactionManager,
}

impl TestContext {
    pub fn new(dir: PathBuf, manager: TransactionManager) -> Self {
        Self { dir, manager }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manager(&self) -> TransactionManager {
        self.manager.clone()
    }

    /// Path of `name` inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

pub fn random_path() -> PathBuf {
    env::temp_dir().join(format!("ostx-{}", uuid::Uuid::new_v4()))
}

pub fn create_test_context() -> OstxResult<TestContext> {
    create_test_context_with(TransactionManager::new())
}

pub fn create_test_context_with(manager: TransactionManager) -> OstxResult<TestContext> {
    let dir = random_path();
    fs::create_dir_all(&dir).map_err(|e| {
        OstxError::new_with_cause(
            &format!("Failed to create test directory {}", dir.display()),
            ErrorKind::IOError,
            OstxError::from(e),
        )
    })?;
    Ok(TestContext::new(dir, manager))
}

pub fn cleanup(ctx: TestContext) -> OstxResult<()> {
    ctx.manager.close()?;
    if ctx.dir.exists() {
        fs::remove_dir_all(&ctx.dir)?;
    }
    Ok(())
}

/// Reads a file that holds a decimal counter. A missing or empty file counts as zero.
pub fn read_counter(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
