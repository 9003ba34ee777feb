pub mod descriptor;
pub mod process_info;

pub use descriptor::*;
pub use process_info::*;
