//! Portal catalog abstraction
//!
//! The reporter only needs a handful of operations from an ArcGIS Online
//! (or Enterprise) organization:
//! - list the reporting user's folders
//! - list the feature service items in those folders
//! - list the groups flagged for open data
//! - per item: sharing and trailing-year usage, both of which can fail
//!
//! [`Catalog`] captures these so reports can run against the live portal
//! ([`PortalClient`]) or an in-memory double.

#[cfg(feature = "api-backend")]
pub mod portal;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "api-backend")]
pub use portal::PortalClient;

/// Item type reported on by the usage report
pub const FEATURE_SERVICE_TYPE: &str = "Feature Service";

/// Errors that can occur during catalog operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Sign-in failed or the token was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Sharing or group details could not be read for an item
    #[error("Permission error: {0}")]
    Permission(String),

    /// Usage statistics could not be read for an item
    #[error("Usage statistics error: {0}")]
    Usage(String),

    /// Transport failure talking to the portal
    #[error("Network error: {0}")]
    Network(String),

    /// The portal answered with something we can't interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CatalogError {
    /// Errors a per-item lookup may degrade to a sentinel value
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CatalogError::Permission(_) | CatalogError::Usage(_) | CatalogError::Network(_)
        )
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// A folder in the reporting user's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Folder {
    /// The user's root content folder
    Root,
    /// A named folder
    Named { id: String, title: String },
}

impl Folder {
    pub fn named(id: impl Into<String>, title: impl Into<String>) -> Self {
        Folder::Named {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Folder title, `None` for the root folder
    pub fn title(&self) -> Option<&str> {
        match self {
            Folder::Root => None,
            Folder::Named { title, .. } => Some(title),
        }
    }

    /// Folder id, `None` for the root folder
    pub fn id(&self) -> Option<&str> {
        match self {
            Folder::Root => None,
            Folder::Named { id, .. } => Some(id),
        }
    }
}

/// A portal item as listed in a user's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner: String,
    #[serde(rename = "type", default)]
    pub item_type: String,
    /// Service name, used to look up usage statistics
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub num_views: u64,
    /// Last modified time in epoch milliseconds
    #[serde(default)]
    pub modified: i64,
    /// `org_authoritative`, `deprecated` or empty
    #[serde(default)]
    pub content_status: Option<String>,
    /// `private`, `shared`, `org` or `public`
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Storage size in bytes
    #[serde(default)]
    pub size: i64,
}

impl CatalogItem {
    pub fn is_feature_service(&self) -> bool {
        self.item_type == FEATURE_SERVICE_TYPE
    }
}

/// Who an item is shared with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingInfo {
    /// Shared with everyone (public)
    pub everyone: bool,
    /// Shared with the organization
    pub org: bool,
    /// Titles of the groups the item is shared with
    pub groups: Vec<String>,
}

impl SharingInfo {
    /// Group titles joined the way they appear in the report
    pub fn joined_groups(&self) -> String {
        self.groups.join(", ")
    }
}

/// Catalog operations needed to build a usage report
pub trait Catalog {
    /// Folders to report on, root folder first
    fn list_folders(&self) -> CatalogResult<Vec<Folder>>;

    /// Feature service items in `folders`, paired with their folder, in
    /// folder order then portal order
    fn list_feature_service_items(
        &self,
        folders: &[Folder],
    ) -> CatalogResult<Vec<(CatalogItem, Folder)>>;

    /// Titles of groups flagged as open data groups
    fn list_open_data_groups(&self) -> CatalogResult<Vec<String>>;

    /// Sharing details for one item
    fn sharing(&self, item: &CatalogItem) -> CatalogResult<SharingInfo>;

    /// Request count over the trailing year for one item
    fn yearly_usage(&self, item: &CatalogItem) -> CatalogResult<u64>;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn list_folders(&self) -> CatalogResult<Vec<Folder>> {
        (**self).list_folders()
    }

    fn list_feature_service_items(
        &self,
        folders: &[Folder],
    ) -> CatalogResult<Vec<(CatalogItem, Folder)>> {
        (**self).list_feature_service_items(folders)
    }

    fn list_open_data_groups(&self) -> CatalogResult<Vec<String>> {
        (**self).list_open_data_groups()
    }

    fn sharing(&self, item: &CatalogItem) -> CatalogResult<SharingInfo> {
        (**self).sharing(item)
    }

    fn yearly_usage(&self, item: &CatalogItem) -> CatalogResult<u64> {
        (**self).yearly_usage(item)
    }
}
