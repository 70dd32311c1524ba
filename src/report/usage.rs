//! Hosted feature service usage report
//!
//! Lists every feature service in the reporting user's folders with its
//! sharing, open data and SGID status, storage cost and trailing-year usage.
//! SGID membership comes from the SGID and shelved metatables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::catalog::Catalog;
use crate::metatable::{FieldSchema, MetatableIndex, MetatableSource, read_metatable};
use crate::retry::RetryPolicy;

use super::enrich::{EnrichedRecord, ItemEnricher, RateCard};
use super::writer::{RotatingLogWriter, format_timestamp, write_csv};
use super::{Report, ReportResult};

/// Sub-directory of the report directory the usage reports go to
pub const USAGE_REPORT_DIR: &str = "AGOLUsage";

/// Where and how a usage report is saved
#[derive(Debug, Clone, PartialEq)]
pub enum ReportSink {
    /// A fresh CSV file per run
    Csv,
    /// An appended, size-rotated log file
    RotatingLog {
        delimiter: String,
        max_bytes: u64,
        backup_count: u32,
    },
}

impl ReportSink {
    fn extension(&self) -> &'static str {
        match self {
            ReportSink::Csv => "csv",
            ReportSink::RotatingLog { .. } => "log",
        }
    }
}

/// Default output path: `<report_dir>/AGOLUsage/AGOLReport_<timestamp>.<ext>`.
///
/// The rotating log keeps one file, so its name carries no timestamp.
pub fn usage_report_path(report_dir: &Path, sink: &ReportSink, now: &DateTime<Local>) -> PathBuf {
    let dir = report_dir.join(USAGE_REPORT_DIR);
    match sink {
        ReportSink::Csv => dir.join(format!(
            "AGOLReport_{}.{}",
            now.format("%Y%m%d-%H%M%S"),
            sink.extension()
        )),
        ReportSink::RotatingLog { .. } => dir.join(format!("AGOLReport.{}", sink.extension())),
    }
}

/// Build the usage report rows.
///
/// Folders, items and open data groups are read from `catalog`, then the
/// metatables are read in order into one index. Rows come out in catalog
/// order. A metatable or catalog listing failure aborts the build.
pub fn build_report<C, S>(
    catalog: &C,
    metatables: &[(S, FieldSchema)],
    rates: RateCard,
    retry: RetryPolicy,
) -> ReportResult<Vec<EnrichedRecord>>
where
    C: Catalog + ?Sized,
    S: MetatableSource,
{
    let folders = catalog.list_folders()?;
    let items = catalog.list_feature_service_items(&folders)?;
    let open_data_groups: HashSet<String> = catalog.list_open_data_groups()?.into_iter().collect();
    info!(
        "Found {} feature services in {} folders, {} open data groups",
        items.len(),
        folders.len(),
        open_data_groups.len()
    );

    let mut index = MetatableIndex::new();
    for (source, schema) in metatables {
        read_metatable(&mut index, source, *schema)?;
    }

    let enricher = ItemEnricher::new(catalog)
        .with_rates(rates)
        .with_retry(retry);

    let mut records = Vec::with_capacity(items.len());
    for (item, folder) in &items {
        let category = index.category(&item.id);
        records.push(enricher.enrich(item, &open_data_groups, folder, category)?);
    }

    let degraded = records.iter().filter(|r| r.is_degraded()).count();
    if degraded > 0 {
        info!("{} of {} rows have degraded values", degraded, records.len());
    }

    Ok(records)
}

/// Usage report over a catalog and its metatables
pub struct UsageReport<C: Catalog> {
    catalog: C,
    metatables: Vec<(Box<dyn MetatableSource>, FieldSchema)>,
    rates: RateCard,
    retry: RetryPolicy,
    out_path: PathBuf,
    sink: ReportSink,
}

impl<C: Catalog> UsageReport<C> {
    pub fn new(catalog: C, out_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            metatables: Vec::new(),
            rates: RateCard::default(),
            retry: RetryPolicy::default(),
            out_path: out_path.into(),
            sink: ReportSink::Csv,
        }
    }

    /// Add a metatable; tables are read in the order they are added
    #[must_use]
    pub fn with_metatable(
        mut self,
        source: impl MetatableSource + 'static,
        schema: FieldSchema,
    ) -> Self {
        self.metatables.push((Box::new(source), schema));
        self
    }

    #[must_use]
    pub fn with_rates(mut self, rates: RateCard) -> Self {
        self.rates = rates;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: ReportSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }
}

impl<C: Catalog> Report for UsageReport<C> {
    type Data = Vec<EnrichedRecord>;

    fn name(&self) -> &str {
        "AGOL Usage Report"
    }

    fn create_report(&self) -> ReportResult<Self::Data> {
        info!("Creating {}...", self.name());
        build_report(&self.catalog, &self.metatables, self.rates, self.retry)
    }

    fn save_report(&self, data: &Self::Data) -> ReportResult<PathBuf> {
        info!("Saving {} to {}...", self.name(), self.out_path.display());
        let timestamp = format_timestamp(&Local::now());

        match &self.sink {
            ReportSink::Csv => write_csv(data, &self.out_path, &timestamp)?,
            ReportSink::RotatingLog {
                delimiter,
                max_bytes,
                backup_count,
            } => RotatingLogWriter::new(&self.out_path)
                .with_delimiter(delimiter.as_str())
                .with_max_bytes(*max_bytes)
                .with_backup_count(*backup_count)
                .write_rows(data, &timestamp)?,
        }

        Ok(self.out_path.clone())
    }
}
