//! File operations inside a transaction.
//!
//! ```rust
//! use ostx::fs::{self, OpenFlags};
//! use ostx::TransactionManager;
//!
//! let dir = std::env::temp_dir().join(format!("ostx-doc-{}", std::process::id()));
//! std::fs::create_dir_all(&dir).unwrap();
//! let path = dir.join("greeting.txt");
//!
//! let manager = TransactionManager::new();
//! let mut tx = manager.begin();
//! let fd = fs::open(&mut tx, &path, OpenFlags::new().write(true).create(true)).unwrap();
//! fs::write(&mut tx, fd, b"hi").unwrap();
//! tx.abort().unwrap();
//!
//! assert!(!path.exists());
//! # std::fs::remove_dir_all(&dir).unwrap();
//! ```

use crate::errors::OstxResult;
use crate::modules::FileModule;
use crate::transaction::Transaction;
use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;

pub use crate::modules::{FileHandle, OpenFlags};

pub fn open<P: AsRef<Path>>(
    tx: &mut Transaction,
    path: P,
    flags: OpenFlags,
) -> OstxResult<FileHandle> {
    tx.with_module::<FileModule, _, _>(|m, ctx| m.open(ctx, path.as_ref(), flags))
}

/// Brings a descriptor opened outside the transaction under its control.
pub fn adopt<P: AsRef<Path>>(tx: &mut Transaction, file: &File, path: P) -> OstxResult<FileHandle> {
    tx.with_module::<FileModule, _, _>(|m, ctx| m.adopt(ctx, file, path.as_ref()))
}

pub fn read(tx: &mut Transaction, fd: FileHandle, len: usize) -> OstxResult<Vec<u8>> {
    tx.with_module::<FileModule, _, _>(|m, ctx| m.read(ctx, fd, len))
}

pub fn write(tx: &mut Transaction, fd: FileHandle, bytes: &[u8]) -> OstxResult<usize> {
    tx.with_module::<FileModule, _, _>(|m, ctx| m.write(ctx, fd, bytes))
}

pub fn seek(tx: &mut Transaction, fd: FileHandle, pos: SeekFrom) -> OstxResult<u64> {
    tx.with_module::<FileModule, _, _>(|m, _| m.seek(fd, pos))
}

pub fn tell(tx: &mut Transaction, fd: FileHandle) -> OstxResult<u64> {
    tx.with_module::<FileModule, _, _>(|m, _| m.tell(fd))
}

pub fn remove<P: AsRef<Path>>(tx: &mut Transaction, path: P) -> OstxResult<()> {
    tx.with_module::<FileModule, _, _>(|m, ctx| m.remove(ctx, path.as_ref()))
}

pub fn close(tx: &mut Transaction, fd: FileHandle) -> OstxResult<()> {
    tx.with_module::<FileModule, _, _>(|m, _| m.close(fd))
}
