//! Scratch state shared by the benchmarks

use ostx::errors::OstxResult;
use ostx::TransactionManager;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Result type for workload setup
pub type WorkloadResult<T> = Result<T, Box<dyn std::error::Error>>;

/// A manager plus a scratch directory removed on drop
pub struct BenchContext {
    manager: TransactionManager,
    dir: TempDir,
}

impl BenchContext {
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Path of `name` inside the scratch directory
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Creates `count` files named `counter-N` holding `0`
    pub fn counters(&self, count: usize) -> WorkloadResult<Vec<PathBuf>> {
        (0..count)
            .map(|i| {
                let path = self.file(&format!("counter-{}", i));
                std::fs::write(&path, b"0")?;
                Ok(path)
            })
            .collect()
    }
}

impl Drop for BenchContext {
    fn drop(&mut self) {
        if let Err(e) = self.manager.close() {
            log::warn!("Failed to close bench manager: {}", e);
        }
    }
}

/// Routes `log` output through `env_logger`, honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn create_context() -> WorkloadResult<BenchContext> {
    create_context_with(TransactionManager::new())
}

/// Context whose manager retries aggressively, for contention benchmarks
pub fn create_contended_context() -> WorkloadResult<BenchContext> {
    let manager = TransactionManager::builder()
        .lock_timeout(Duration::from_millis(20))
        .max_retries(1_000)
        .retry_backoff(Duration::from_micros(50))
        .build()?;
    create_context_with(manager)
}

fn create_context_with(manager: TransactionManager) -> WorkloadResult<BenchContext> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("ostx-bench-{}", uuid::Uuid::new_v4()))
        .tempdir()?;
    Ok(BenchContext { manager, dir })
}

pub fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Reads the counter at `path`, adds one and writes it back, inside `tx`.
pub fn increment(tx: &mut ostx::Transaction, path: &Path) -> OstxResult<u64> {
    let fd = ostx::fs::open(tx, path, ostx::fs::OpenFlags::new().read(true).write(true))?;
    let bytes = ostx::fs::read(tx, fd, 32)?;
    let value: u64 = String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(0);
    ostx::fs::seek(tx, fd, std::io::SeekFrom::Start(0))?;
    ostx::fs::write(tx, fd, (value + 1).to_string().as_bytes())?;
    Ok(value + 1)
}
