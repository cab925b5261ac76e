mod constants;
mod event_bus;
mod lock;
mod module;
mod util;

pub use constants::*;
pub use event_bus::*;
pub use lock::*;
pub use module::*;
pub use util::*;
