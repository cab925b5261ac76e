mod pipe_pair;
mod resource_id;
mod resource_table;
mod version;

pub use pipe_pair::*;
pub use resource_id::*;
pub use resource_table::*;
pub use version::*;
