//! Metatable reading
//!
//! Metatables are reference tables that record which portal items belong to
//! the SGID inventory. Two tables are read per run:
//! - the canonical SGID table (`TABLENAME, AGOL_ITEM_ID, AGOL_PUBLISHED_NAME,
//!   Authoritative`), whose records are always categorised as `SGID`
//! - the shelved/AGOL table (`TABLENAME, AGOL_ITEM_ID, AGOL_PUBLISHED_NAME,
//!   CATEGORY`), whose records are never authoritative
//!
//! Both are folded into one [`MetatableIndex`] keyed by item id. The first
//! record seen for an id wins; later ones are only noted as duplicates.

pub mod source;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use source::{FeatureSet, FeatureSetFile, MetatableRow, MetatableSource};
#[cfg(feature = "api-backend")]
pub use source::FeatureLayerSource;

/// Category assigned to every record of the canonical SGID table
pub const SGID_CATEGORY: &str = "SGID";

/// Authoritative flag for records that don't carry one
pub const DEFAULT_AUTHORITATIVE: &str = "n";

/// Fields read from the canonical SGID metatable
pub const SGID_FIELDS: [&str; 4] = [
    "TABLENAME",
    "AGOL_ITEM_ID",
    "AGOL_PUBLISHED_NAME",
    "Authoritative",
];

/// Fields read from the shelved/AGOL metatable
pub const SHELVED_FIELDS: [&str; 4] = [
    "TABLENAME",
    "AGOL_ITEM_ID",
    "AGOL_PUBLISHED_NAME",
    "CATEGORY",
];

/// Error type for metatable operations
#[derive(Debug, thiserror::Error)]
pub enum MetatableError {
    /// The table could not be opened or queried
    #[error("Metatable source unavailable: {0}")]
    SourceUnavailable(String),

    /// The requested field list is not a known metatable shape, or the
    /// table lacks one of its fields
    #[error("Malformed metatable schema: {0}")]
    MalformedSchema(String),

    /// A row did not match the requested field list
    #[error("Malformed metatable row: {0}")]
    MalformedRow(String),
}

/// Result type for metatable operations
pub type MetatableResult<T> = Result<T, MetatableError>;

/// Shape of a metatable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSchema {
    /// Canonical inventory table, carries an `Authoritative` column
    Sgid,
    /// Shelved/AGOL table, carries a `CATEGORY` column
    Shelved,
}

impl FieldSchema {
    /// Field names to request from the source, in row order
    pub fn fields(&self) -> &'static [&'static str; 4] {
        match self {
            FieldSchema::Sgid => &SGID_FIELDS,
            FieldSchema::Shelved => &SHELVED_FIELDS,
        }
    }

}

impl std::fmt::Display for FieldSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldSchema::Sgid => write!(f, "sgid"),
            FieldSchema::Shelved => write!(f, "shelved"),
        }
    }
}

/// One inventory entry from a metatable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetatableRecord {
    /// Source table name in the SGID (`TABLENAME`)
    pub source_name: String,
    /// Title the item was published under (`AGOL_PUBLISHED_NAME`)
    pub published_name: String,
    /// `SGID`, `static`, `shelved`, ...
    pub category: String,
    /// Authoritative flag, `n` unless the SGID table says otherwise
    pub authoritative: String,
}

/// In-memory index of metatable records keyed by item id
#[derive(Debug, Clone, Default)]
pub struct MetatableIndex {
    records: HashMap<Uuid, MetatableRecord>,
    duplicate_keys: Vec<String>,
}

impl MetatableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless the id is already present.
    ///
    /// Returns `false` and records `raw_id` as a duplicate when the id was
    /// seen before; the existing record is kept.
    pub fn insert(&mut self, item_id: Uuid, raw_id: &str, record: MetatableRecord) -> bool {
        if self.records.contains_key(&item_id) {
            self.duplicate_keys.push(raw_id.to_string());
            return false;
        }
        self.records.insert(item_id, record);
        true
    }

    /// Look up a record by item id.
    ///
    /// Ids that don't parse as UUIDs never match.
    pub fn get(&self, item_id: &str) -> Option<&MetatableRecord> {
        let id = Uuid::parse_str(item_id.trim()).ok()?;
        self.records.get(&id)
    }

    /// Category of the record for `item_id`, if any
    pub fn category(&self, item_id: &str) -> Option<&str> {
        self.get(item_id).map(|record| record.category.as_str())
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.get(item_id).is_some()
    }

    /// Ids seen more than once, in encounter order
    pub fn duplicate_keys(&self) -> &[String] {
        &self.duplicate_keys
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read one metatable into `index`.
///
/// Rows whose item id is not a UUID are skipped. Source errors are returned
/// as-is and should abort the run.
pub fn read_metatable<S: MetatableSource + ?Sized>(
    index: &mut MetatableIndex,
    source: &S,
    schema: FieldSchema,
) -> MetatableResult<()> {
    info!("Reading {} metatable from {}...", schema, source.describe());

    let fields = schema.fields();
    let rows = source.read_rows(fields)?;

    let duplicates_before = index.duplicate_keys().len();
    let mut skipped = 0usize;
    let mut inserted = 0usize;

    for row in rows {
        let [table_name, item_id, published_name, fourth]: [Option<String>; 4] =
            row.try_into().map_err(|row: MetatableRow| {
                MetatableError::MalformedRow(format!(
                    "expected {} values, got {}",
                    fields.len(),
                    row.len()
                ))
            })?;

        let raw_id = item_id.unwrap_or_default();
        let raw_id = raw_id.trim();
        let Ok(id) = Uuid::parse_str(raw_id) else {
            debug!("Skipping metatable row with item id '{}'", raw_id);
            skipped += 1;
            continue;
        };

        let (category, authoritative) = match schema {
            FieldSchema::Sgid => (
                SGID_CATEGORY.to_string(),
                fourth.unwrap_or_else(|| DEFAULT_AUTHORITATIVE.to_string()),
            ),
            FieldSchema::Shelved => (fourth.unwrap_or_default(), DEFAULT_AUTHORITATIVE.to_string()),
        };

        let record = MetatableRecord {
            source_name: table_name.unwrap_or_default(),
            published_name: published_name.unwrap_or_default(),
            category,
            authoritative,
        };

        if index.insert(id, raw_id, record) {
            inserted += 1;
        }
    }

    let new_duplicates = &index.duplicate_keys()[duplicates_before..];
    if !new_duplicates.is_empty() {
        warn!(
            "{} duplicate item ids in {} metatable: {}",
            new_duplicates.len(),
            schema,
            new_duplicates.join(", ")
        );
    }
    info!(
        "Loaded {} {} metatable records ({} rows without a valid item id)",
        inserted, schema, skipped
    );

    Ok(())
}
