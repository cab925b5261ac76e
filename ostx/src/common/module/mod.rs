mod module;

pub use module::*;
