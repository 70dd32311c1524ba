//! Per-item enrichment
//!
//! Turns a catalog item into one report row: copies the item's own fields,
//! joins it against the metatable category and the open data groups, and
//! derives storage credits and cost from its size.
//!
//! Sharing and usage lookups go through [`retry_if`], retrying only
//! recoverable errors. When a lookup still fails, only that item's affected columns degrade to a [`Sentinel`]; the
//! rest of the row and the rest of the report are unaffected.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogError, CatalogItem, Folder};
use crate::retry::{RetryPolicy, retry_if};

use super::{ReportError, ReportResult};

/// Folder column value for items in the root folder
pub const ROOT_FOLDER_NAME: &str = "_root";

/// Default hosted feature service storage rate
pub const DEFAULT_CREDITS_PER_MB: f64 = 0.24;

/// Default price of one credit, in dollars
pub const DEFAULT_DOLLARS_PER_CREDIT: f64 = 0.1;

/// Metatable categories that count as SGID membership
pub const SGID_CATEGORIES: [&str; 2] = ["static", "SGID"];

const MODIFIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage rate card used to price an item's size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    /// Credits charged per MB of storage per month
    pub credits_per_mb: f64,
    /// Dollars per credit
    pub dollars_per_credit: f64,
}

impl Default for RateCard {
    fn default() -> Self {
        Self {
            credits_per_mb: DEFAULT_CREDITS_PER_MB,
            dollars_per_credit: DEFAULT_DOLLARS_PER_CREDIT,
        }
    }
}

/// Marker written in place of a value whose lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentinel {
    /// Sharing details could not be read
    SharingError,
    /// Open data membership is unknown because sharing failed
    GroupError,
    /// Usage statistics could not be read
    UsageError,
}

impl Sentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::SharingError => "sharing_error",
            Sentinel::GroupError => "group error",
            Sentinel::UsageError => "error",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that may have degraded to a sentinel
pub type Degraded<T> = Result<T, Sentinel>;

/// One row of the usage report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub item_id: String,
    pub title: String,
    pub owner: String,
    pub folder: String,
    pub views: u64,
    /// Local time, `YYYY-MM-DD HH:MM:SS`
    pub modified: String,
    /// Item content status
    pub authoritative: String,
    pub sharing_everyone: Degraded<bool>,
    pub sharing_org: Degraded<bool>,
    pub sharing_groups: Degraded<String>,
    pub open_data_group: Degraded<bool>,
    pub in_sgid: bool,
    pub tags: String,
    pub size_mb: f64,
    pub monthly_credits: f64,
    pub monthly_cost: f64,
    pub data_requests_1y: Degraded<u64>,
}

impl EnrichedRecord {
    /// Column names in report order
    pub const COLUMNS: [&'static str; 17] = [
        "itemid",
        "title",
        "owner",
        "folder",
        "views",
        "modified",
        "authoritative",
        "sharing_everyone",
        "sharing_org",
        "sharing_groups",
        "open_data_group",
        "in_sgid",
        "tags",
        "sizeMB",
        "credits",
        "cost",
        "data_requests_1Y",
    ];

    /// Rendered value of one column, `None` for unknown columns
    pub fn value(&self, column: &str) -> Option<String> {
        let value = match column {
            "itemid" => self.item_id.clone(),
            "title" => self.title.clone(),
            "owner" => self.owner.clone(),
            "folder" => self.folder.clone(),
            "views" => self.views.to_string(),
            "modified" => self.modified.clone(),
            "authoritative" => self.authoritative.clone(),
            "sharing_everyone" => render(&self.sharing_everyone, flag),
            "sharing_org" => render(&self.sharing_org, flag),
            "sharing_groups" => render(&self.sharing_groups, String::clone),
            "open_data_group" => render(&self.open_data_group, flag),
            "in_sgid" => flag(&self.in_sgid),
            "tags" => self.tags.clone(),
            "sizeMB" => number(self.size_mb),
            "credits" => number(self.monthly_credits),
            "cost" => number(self.monthly_cost),
            "data_requests_1Y" => render(&self.data_requests_1y, u64::to_string),
            _ => return None,
        };
        Some(value)
    }

    /// Rendered values in column order
    pub fn values(&self) -> Vec<String> {
        Self::COLUMNS
            .iter()
            .map(|column| self.value(column).unwrap_or_default())
            .collect()
    }

    /// True when any lookup for this item degraded
    pub fn is_degraded(&self) -> bool {
        self.sharing_groups.is_err() || self.data_requests_1y.is_err()
    }
}

fn render<T>(value: &Degraded<T>, show: impl Fn(&T) -> String) -> String {
    match value {
        Ok(v) => show(v),
        Err(sentinel) => sentinel.to_string(),
    }
}

fn flag(value: &bool) -> String {
    let rendered = if *value { "True" } else { "False" };
    rendered.to_string()
}

/// Shortest round-trip form with at least one decimal (`12.0`, `2.88`).
/// Very large or small magnitudes use exponent notation without a sign
/// (`1e16`, `1e-7`).
fn number(value: f64) -> String {
    format!("{:?}", value)
}

/// Format an epoch-milliseconds timestamp as local time
pub fn format_modified(epoch_ms: i64) -> String {
    match DateTime::from_timestamp_millis(epoch_ms) {
        Some(utc) => utc.with_timezone(&Local).format(MODIFIED_FORMAT).to_string(),
        None => epoch_ms.to_string(),
    }
}

/// Folder column value for `folder`
pub fn folder_name(folder: &Folder) -> &str {
    folder.title().unwrap_or(ROOT_FOLDER_NAME)
}

/// Whether a metatable category counts as SGID membership.
///
/// Items without a metatable record are not in the SGID.
pub fn is_sgid_category(category: Option<&str>) -> bool {
    category.is_some_and(|c| SGID_CATEGORIES.contains(&c))
}

/// Builds report rows for catalog items
pub struct ItemEnricher<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    rates: RateCard,
    retry: RetryPolicy,
}

impl<'a, C: Catalog + ?Sized> ItemEnricher<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self {
            catalog,
            rates: RateCard::default(),
            retry: RetryPolicy::default(),
        }
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

    /// Build the report row for one item.
    ///
    /// Recoverable sharing and usage failures degrade the affected columns.
    /// Anything else (for example an expired sign-in) is returned as an
    /// error since every following item would fail the same way.
    pub fn enrich(
        &self,
        item: &CatalogItem,
        open_data_groups: &HashSet<String>,
        folder: &Folder,
        metatable_category: Option<&str>,
    ) -> ReportResult<EnrichedRecord> {
        info!("Getting info for {}...", item.title);

        let (sharing_everyone, sharing_org, sharing_groups, open_data_group) =
            match retry_if(&self.retry, CatalogError::is_recoverable, || {
                self.catalog.sharing(item)
            }) {
                Ok(sharing) => {
                    let open_data = sharing
                        .groups
                        .iter()
                        .any(|group| open_data_groups.contains(group));
                    (
                        Ok(sharing.everyone),
                        Ok(sharing.org),
                        Ok(sharing.joined_groups()),
                        Ok(open_data),
                    )
                }
                Err(err) => {
                    self.degrade(item, "sharing", err)?;
                    (
                        Err(Sentinel::SharingError),
                        Err(Sentinel::SharingError),
                        Err(Sentinel::SharingError),
                        Err(Sentinel::GroupError),
                    )
                }
            };

        let data_requests_1y = match retry_if(&self.retry, CatalogError::is_recoverable, || {
            self.catalog.yearly_usage(item)
        }) {
            Ok(count) => Ok(count),
            Err(err) => {
                self.degrade(item, "usage", err)?;
                Err(Sentinel::UsageError)
            }
        };

        let size_mb = item.size as f64 / 1024.0 / 1024.0;
        let monthly_credits = size_mb * self.rates.credits_per_mb;
        let monthly_cost = monthly_credits * self.rates.dollars_per_credit;

        Ok(EnrichedRecord {
            item_id: item.id.clone(),
            title: item.title.clone(),
            owner: item.owner.clone(),
            folder: folder_name(folder).to_string(),
            views: item.num_views,
            modified: format_modified(item.modified),
            authoritative: item.content_status.clone().unwrap_or_default(),
            sharing_everyone,
            sharing_org,
            sharing_groups,
            open_data_group,
            in_sgid: is_sgid_category(metatable_category),
            tags: item.tags.join(", "),
            size_mb,
            monthly_credits,
            monthly_cost,
            data_requests_1y,
        })
    }

    fn degrade(&self, item: &CatalogItem, lookup: &str, err: CatalogError) -> ReportResult<()> {
        if !err.is_recoverable() {
            return Err(ReportError::Catalog(err));
        }
        warn!(
            "Giving up on {} lookup for '{}' ({}): {}",
            lookup, item.title, item.id, err
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogResult, SharingInfo};
    use chrono::TimeZone;
    use std::cell::Cell;

    struct StubCatalog {
        sharing: CatalogResult<SharingInfo>,
        usage: CatalogResult<u64>,
        sharing_calls: Cell<u32>,
        usage_calls: Cell<u32>,
    }

    impl StubCatalog {
        fn new(sharing: CatalogResult<SharingInfo>, usage: CatalogResult<u64>) -> Self {
            Self {
                sharing,
                usage,
                sharing_calls: Cell::new(0),
                usage_calls: Cell::new(0),
            }
        }
    }

    impl Catalog for StubCatalog {
        fn list_folders(&self) -> CatalogResult<Vec<Folder>> {
            Ok(vec![Folder::Root])
        }

        fn list_feature_service_items(
            &self,
            _folders: &[Folder],
        ) -> CatalogResult<Vec<(CatalogItem, Folder)>> {
            Ok(Vec::new())
        }

        fn list_open_data_groups(&self) -> CatalogResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn sharing(&self, _item: &CatalogItem) -> CatalogResult<SharingInfo> {
            self.sharing_calls.set(self.sharing_calls.get() + 1);
            self.sharing.clone()
        }

        fn yearly_usage(&self, _item: &CatalogItem) -> CatalogResult<u64> {
            self.usage_calls.set(self.usage_calls.get() + 1);
            self.usage.clone()
        }
    }

    fn test_item() -> CatalogItem {
        let modified = Local
            .with_ymd_and_hms(2020, 12, 25, 18, 30, 55)
            .unwrap()
            .timestamp_millis();
        CatalogItem {
            id: "itemid".to_string(),
            title: "title".to_string(),
            owner: "owner".to_string(),
            item_type: "Feature Service".to_string(),
            name: Some("service".to_string()),
            num_views: 42,
            modified,
            content_status: Some("content_status".to_string()),
            access: Some("public".to_string()),
            tags: vec!["tag1".to_string(), "tag2".to_string()],
            size: 12_582_912,
        }
    }

    fn shared() -> SharingInfo {
        SharingInfo {
            everyone: true,
            org: true,
            groups: vec!["Utah SGID Roads".to_string(), "test_group".to_string()],
        }
    }

    fn open_data() -> HashSet<String> {
        HashSet::from(["Utah SGID Roads".to_string()])
    }

    fn enricher(catalog: &StubCatalog) -> ItemEnricher<'_, StubCatalog> {
        ItemEnricher::new(catalog).with_retry(RetryPolicy::immediate(3))
    }

    #[test]
    fn test_enrich_populates_every_field() {
        let catalog = StubCatalog::new(Ok(shared()), Ok(1234));
        let record = enricher(&catalog)
            .enrich(
                &test_item(),
                &open_data(),
                &Folder::named("f1", "folder"),
                Some("SGID"),
            )
            .unwrap();

        assert_eq!(record.item_id, "itemid");
        assert_eq!(record.title, "title");
        assert_eq!(record.owner, "owner");
        assert_eq!(record.folder, "folder");
        assert_eq!(record.views, 42);
        assert_eq!(record.modified, "2020-12-25 18:30:55");
        assert_eq!(record.authoritative, "content_status");
        assert_eq!(record.sharing_everyone, Ok(true));
        assert_eq!(record.sharing_org, Ok(true));
        assert_eq!(
            record.sharing_groups,
            Ok("Utah SGID Roads, test_group".to_string())
        );
        assert_eq!(record.open_data_group, Ok(true));
        assert!(record.in_sgid);
        assert_eq!(record.tags, "tag1, tag2");
        assert_eq!(record.size_mb, 12.0);
        assert!((record.monthly_credits - 2.88).abs() < 1e-9);
        assert!((record.monthly_cost - 0.288).abs() < 1e-9);
        assert_eq!(record.data_requests_1y, Ok(1234));
        assert!(!record.is_degraded());
    }

    #[test]
    fn test_sharing_failure_degrades_sharing_columns_only() {
        let catalog = StubCatalog::new(
            Err(CatalogError::Permission("denied".to_string())),
            Ok(7),
        );
        let record = enricher(&catalog)
            .enrich(&test_item(), &open_data(), &Folder::Root, None)
            .unwrap();

        assert_eq!(catalog.sharing_calls.get(), 4);
        assert_eq!(record.sharing_everyone, Err(Sentinel::SharingError));
        assert_eq!(record.sharing_org, Err(Sentinel::SharingError));
        assert_eq!(record.sharing_groups, Err(Sentinel::SharingError));
        assert_eq!(record.open_data_group, Err(Sentinel::GroupError));
        assert_eq!(record.value("sharing_everyone").unwrap(), "sharing_error");
        assert_eq!(record.value("sharing_groups").unwrap(), "sharing_error");
        assert_eq!(record.value("open_data_group").unwrap(), "group error");

        assert_eq!(record.title, "title");
        assert_eq!(record.tags, "tag1, tag2");
        assert_eq!(record.data_requests_1y, Ok(7));
        assert!(record.is_degraded());
    }

    #[test]
    fn test_usage_failure_degrades_usage_column_only() {
        let catalog = StubCatalog::new(Ok(shared()), Err(CatalogError::Usage("boom".into())));
        let record = enricher(&catalog)
            .enrich(&test_item(), &open_data(), &Folder::Root, None)
            .unwrap();

        assert_eq!(catalog.usage_calls.get(), 4);
        assert_eq!(record.data_requests_1y, Err(Sentinel::UsageError));
        assert_eq!(record.value("data_requests_1Y").unwrap(), "error");
        assert_eq!(record.sharing_everyone, Ok(true));
        assert_eq!(record.open_data_group, Ok(true));
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(number(12.0), "12.0");
        assert_eq!(number(0.0), "0.0");
        assert_eq!(number(2.88), "2.88");
        assert_eq!(number(1e16), "1e16");
    }

    #[test]
    fn test_fatal_lookup_error_is_returned() {
        let catalog = StubCatalog::new(
            Err(CatalogError::Authentication("token expired".into())),
            Ok(0),
        );
        let result = enricher(&catalog).enrich(&test_item(), &open_data(), &Folder::Root, None);
        assert!(matches!(
            result,
            Err(ReportError::Catalog(CatalogError::Authentication(_)))
        ));
        assert_eq!(catalog.sharing_calls.get(), 1);
        assert_eq!(catalog.usage_calls.get(), 0);
    }

    #[test]
    fn test_open_data_requires_matching_group() {
        let catalog = StubCatalog::new(Ok(shared()), Ok(0));
        let record = enricher(&catalog)
            .enrich(&test_item(), &HashSet::new(), &Folder::Root, None)
            .unwrap();
        assert_eq!(record.open_data_group, Ok(false));
        assert_eq!(record.value("open_data_group").unwrap(), "False");
    }

    #[test]
    fn test_in_sgid_categories() {
        assert!(is_sgid_category(Some("static")));
        assert!(is_sgid_category(Some("SGID")));
        assert!(!is_sgid_category(Some("shelved")));
        assert!(!is_sgid_category(Some("sgid")));
        assert!(!is_sgid_category(None));
    }

    #[test]
    fn test_root_folder_name() {
        assert_eq!(folder_name(&Folder::Root), "_root");
        assert_eq!(folder_name(&Folder::named("id", "Roads")), "Roads");
    }

    #[test]
    fn test_values_follow_column_order() {
        let catalog = StubCatalog::new(Ok(shared()), Ok(5));
        let record = enricher(&catalog)
            .enrich(&test_item(), &open_data(), &Folder::Root, Some("shelved"))
            .unwrap();
        let values = record.values();

        assert_eq!(values.len(), EnrichedRecord::COLUMNS.len());
        assert_eq!(values[0], "itemid");
        assert_eq!(values[3], "_root");
        assert_eq!(values[11], "False");
        assert_eq!(values[13], "12.0");
        assert_eq!(values[16], "5");
        assert_eq!(record.value("no_such_column"), None);
    }
}
