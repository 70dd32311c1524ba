//! Reports
//!
//! A report knows how to produce its data and how to save it:
//! - [`Report::create_report`] gathers and reconciles the data
//! - [`Report::save_report`] writes it to the report's destination
//!
//! The only report today is the hosted feature service [`UsageReport`].

pub mod enrich;
pub mod usage;
pub mod writer;

use std::path::PathBuf;

use crate::catalog::CatalogError;
use crate::metatable::MetatableError;

pub use enrich::{EnrichedRecord, ItemEnricher, RateCard, Sentinel};
pub use usage::{ReportSink, UsageReport, build_report};
pub use writer::{ReportRow, RotatingLogWriter, format_csv, write_csv};

/// Error type for report operations
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Catalog call that can't be degraded to a sentinel
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Metatable could not be read
    #[error("Metatable error: {0}")]
    Metatable(#[from] MetatableError),

    /// Report could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// A report that can be created and saved
pub trait Report {
    /// Data produced by [`Report::create_report`]
    type Data;

    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Gather the report's data
    fn create_report(&self) -> ReportResult<Self::Data>;

    /// Write `data` to the report's destination, returning where it went
    fn save_report(&self, data: &Self::Data) -> ReportResult<PathBuf>;

    /// Create and save in one go
    fn run(&self) -> ReportResult<PathBuf> {
        let data = self.create_report()?;
        self.save_report(&data)
    }
}
