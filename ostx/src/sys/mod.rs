//! Transactional counterparts of everyday system calls.
//!
//! Each function registers the matching module with the transaction on first use and
//! records the operation in that module's log. None of them performs an irreversible
//! effect directly.

pub mod fs;
pub mod pipe;
pub mod sched;
pub mod thread;
