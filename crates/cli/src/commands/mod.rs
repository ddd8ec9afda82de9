//! CLI command implementations

pub mod list;
pub mod reset;
pub mod run;
