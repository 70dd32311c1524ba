//! Command-line surface: argument handling lives in the binary, command
//! implementations and their error type live here

pub mod commands;
pub mod error;

pub use error::CliError;
