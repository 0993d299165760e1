//! Platform helpers shared by the BG Remover crates.

mod executable;
mod paths;

pub use executable::{current_executable, executable_suffix, process_name};
pub use paths::{AppPaths, AppPathsError};
