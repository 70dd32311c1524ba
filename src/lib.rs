//! AGOL Reporter - hosted feature service usage and inventory reports
//!
//! Provides:
//! - Portal catalog access (folders, items, sharing, open data groups, usage)
//! - Metatable reading for SGID membership
//! - Per-item enrichment with storage cost and degraded-value sentinels
//! - CSV and rotating log report writers
//! - Retry with exponential backoff for flaky portal calls

pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod metatable;
pub mod report;
pub mod retry;

// Re-export commonly used types
#[cfg(feature = "api-backend")]
pub use catalog::PortalClient;
pub use catalog::{Catalog, CatalogError, CatalogItem, CatalogResult, Folder, SharingInfo};

#[cfg(feature = "api-backend")]
pub use metatable::FeatureLayerSource;
pub use metatable::{
    FeatureSet, FeatureSetFile, FieldSchema, MetatableError, MetatableIndex, MetatableRecord,
    MetatableResult, MetatableSource, read_metatable,
};

pub use report::{
    EnrichedRecord, ItemEnricher, RateCard, Report, ReportError, ReportResult, ReportSink,
    Sentinel, UsageReport, build_report,
};

pub use config::{ConfigError, ReporterConfig};
pub use retry::{RetryPolicy, retry};
