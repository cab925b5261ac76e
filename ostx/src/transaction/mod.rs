//! Transaction coordination.
//!
//! A [`Transaction`] collects participating modules while the body runs and drives them
//! through the commit or abort lifecycle when it ends.

mod context;
mod core;
mod deferred_log;
mod event;
mod stats;
mod transaction;

pub use context::*;
pub use core::*;
pub use deferred_log::*;
pub use event::*;
pub use stats::*;
pub use transaction::*;
