pub mod config_parser;
pub mod file_watcher;
pub mod log_writer;
pub mod process_manager;
pub mod restart_policy;
pub mod supervisor;

pub use config_parser::*;
pub use file_watcher::*;
pub use log_writer::*;
pub use process_manager::*;
pub use restart_policy::*;
