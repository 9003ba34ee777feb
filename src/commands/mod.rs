pub mod descriptor;
pub mod process;

pub use descriptor::*;
pub use process::*;
