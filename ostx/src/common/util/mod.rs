mod encoding;
mod type_utils;

pub use encoding::*;
pub use type_utils::*;
