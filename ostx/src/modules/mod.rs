//! Built-in resource domains.

mod file_module;
mod pipe_module;
mod sched_module;
mod thread_module;

pub use file_module::*;
pub use pipe_module::*;
pub use sched_module::*;
pub use thread_module::*;
