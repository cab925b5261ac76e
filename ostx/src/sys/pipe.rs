//! Pipe operations inside a transaction.

use crate::errors::OstxResult;
use crate::modules::PipeModule;
use crate::resource::PipePair;
use crate::transaction::Transaction;

/// Buffers `bytes` for `pipe`. Readers see nothing until the transaction commits.
pub fn write(tx: &mut Transaction, pipe: &PipePair, bytes: &[u8]) -> OstxResult<usize> {
    tx.with_module::<PipeModule, _, _>(|m, ctx| m.write(ctx, pipe, bytes))
}

/// Reads up to `max` bytes. The bytes leave the pipe only when the transaction commits.
pub fn read(tx: &mut Transaction, pipe: &PipePair, max: usize) -> OstxResult<Vec<u8>> {
    tx.with_module::<PipeModule, _, _>(|m, ctx| m.read(ctx, pipe, max))
}
