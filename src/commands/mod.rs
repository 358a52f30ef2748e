// Engine commands
pub mod apply;
pub mod run;
pub mod status;

// Read-only listings
pub mod catalog;
pub mod log;
pub mod users;
pub mod variables;
