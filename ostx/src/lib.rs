#![allow(clippy::module_inception)]
//! # ostx - Transactions over operating-system resources
//!
//! ostx groups ordinarily non-transactional operations on files, pipes, threads and the
//! scheduler into one logical unit that either fully takes effect or leaves no trace.
//!
//! ## Key Features
//!
//! - **Atomicity**: irreversible effects are buffered and performed only at commit,
//!   reversible ones are compensated on abort
//! - **Isolation**: optimistic validation against per-resource version counters
//! - **Deadlock freedom**: commit locks are taken in one canonical order with a bounded wait
//! - **Extensible**: any resource domain can take part by implementing
//!   [`ModuleCapability`](common::ModuleCapability)
//! - **Retry helper**: [`TransactionManager::run`] re-runs transactions that lost a race
//! - **Events**: listeners are notified of every transaction outcome
//!
//! ## Quick Start
//!
//! ```rust
//! use ostx::{pipe, TransactionManager};
//!
//! let manager = TransactionManager::new();
//! let channel = manager.open_pipe().unwrap();
//!
//! let mut tx = manager.begin();
//! pipe::write(&mut tx, &channel, b"abc").unwrap();
//! // nothing is in the pipe yet
//! assert!(tx.commit().unwrap().is_committed());
//! assert_eq!(channel.read(3).unwrap(), b"abc");
//! ```
//!
//! ## Module Organization
//!
//! - [`common`] - Module capability trait, commit locks, event bus and codec
//! - [`errors`] - Error types and result definitions
//! - [`resource`] - Resource identities, version counters and pipe pairs
//! - [`transaction`] - The coordinator, deferred logs and transaction events
//! - [`modules`] - Built-in file, pipe, thread and scheduler participants
//! - [`fs`], [`pipe`], [`thread`], [`sched`] - Transactional system-call wrappers

pub mod common;
pub mod errors;
pub mod manager;
pub mod manager_builder;
pub mod modules;
pub mod resource;
mod sys;
pub mod transaction;
pub mod tx_config;

pub use manager::TransactionManager;
pub use manager_builder::TransactionManagerBuilder;
pub use sys::{fs, pipe, sched, thread};
pub use transaction::{AbortReason, CommitOutcome, Transaction};
pub use tx_config::TxConfig;
