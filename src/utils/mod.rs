pub mod byte_size;
pub mod date_format;
pub mod memory_probe;
pub mod process_killer;
pub mod user_path;

pub use byte_size::*;
pub use date_format::*;
pub use memory_probe::*;
pub use process_killer::*;
pub use user_path::*;
