//! CLI-specific error types

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::metatable::MetatableError;
use crate::report::ReportError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File already exists: {0}. Use --force to overwrite.")]
    FileExists(PathBuf),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    #[error("Metatable error: {0}")]
    MetatableError(#[from] MetatableError),

    #[error("Report error: {0}")]
    ReportError(#[from] ReportError),
}
