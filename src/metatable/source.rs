//! Metatable sources
//!
//! A source yields rows for a requested field list. Rows come back in the
//! requested field order with `None` for null attributes.
//!
//! Both concrete sources speak the ArcGIS feature set JSON shape
//! (`{"features": [{"attributes": {...}}]}`):
//! - [`FeatureSetFile`] reads an export from disk
//! - [`FeatureLayerSource`] queries a hosted table or layer over REST

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

#[cfg(feature = "api-backend")]
use crate::catalog::PortalClient;

use super::{MetatableError, MetatableResult};

/// One metatable row, values in requested field order
pub type MetatableRow = Vec<Option<String>>;

/// A tabular data source the metatable reader can query
pub trait MetatableSource {
    /// Human readable location, used in log messages
    fn describe(&self) -> String;

    /// Read every row, projecting `fields` in order
    fn read_rows(&self, fields: &[&str]) -> MetatableResult<Vec<MetatableRow>>;
}

impl<S: MetatableSource + ?Sized> MetatableSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read_rows(&self, fields: &[&str]) -> MetatableResult<Vec<MetatableRow>> {
        (**self).read_rows(fields)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeatureSet {
    #[serde(default)]
    features: Vec<RawFeature>,
    #[serde(default)]
    exceeded_transfer_limit: bool,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Attribute rows of a feature set, already in memory
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    rows: Vec<Map<String, Value>>,
    exceeded_transfer_limit: bool,
}

impl FeatureSet {
    /// Parse a feature set JSON document.
    ///
    /// An `error` object in the document (as returned by ArcGIS REST
    /// endpoints with HTTP 200) is reported as an unavailable source.
    pub fn from_json(content: &str) -> MetatableResult<Self> {
        let raw: RawFeatureSet = serde_json::from_str(content).map_err(|e| {
            MetatableError::SourceUnavailable(format!("Failed to parse feature set: {}", e))
        })?;

        if let Some(err) = raw.error {
            return Err(MetatableError::SourceUnavailable(match err.code {
                Some(code) => format!("{} (code {})", err.message, code),
                None => err.message,
            }));
        }

        Ok(Self {
            rows: raw.features.into_iter().map(|f| f.attributes).collect(),
            exceeded_transfer_limit: raw.exceeded_transfer_limit,
        })
    }

    /// True when the server cut the result short at its record limit
    pub fn exceeded_transfer_limit(&self) -> bool {
        self.exceeded_transfer_limit
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Project every row onto `fields`.
    ///
    /// Field names match exactly first, then case-insensitively. A field
    /// missing from a row is a schema error.
    pub fn project(&self, fields: &[&str]) -> MetatableResult<Vec<MetatableRow>> {
        self.rows
            .iter()
            .map(|attributes| {
                fields
                    .iter()
                    .map(|field| match lookup(attributes, field) {
                        Some(value) => Ok(scalar_to_string(value)),
                        None => Err(MetatableError::MalformedSchema(format!(
                            "Field '{}' not present in feature set",
                            field
                        ))),
                    })
                    .collect::<MetatableResult<MetatableRow>>()
            })
            .collect()
    }
}

impl MetatableSource for FeatureSet {
    fn describe(&self) -> String {
        format!("in-memory feature set ({} rows)", self.rows.len())
    }

    fn read_rows(&self, fields: &[&str]) -> MetatableResult<Vec<MetatableRow>> {
        self.project(fields)
    }
}

fn lookup<'a>(attributes: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    attributes.get(field).or_else(|| {
        attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Feature set JSON export on disk
#[derive(Debug, Clone)]
pub struct FeatureSetFile {
    path: PathBuf,
}

impl FeatureSetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetatableSource for FeatureSetFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read_rows(&self, fields: &[&str]) -> MetatableResult<Vec<MetatableRow>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            MetatableError::SourceUnavailable(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let set = FeatureSet::from_json(&content)?;
        if set.exceeded_transfer_limit() {
            return Err(MetatableError::SourceUnavailable(format!(
                "{} is a truncated query result ({} rows)",
                self.path.display(),
                set.len()
            )));
        }
        set.project(fields)
    }
}

/// Read every page of a paged query.
///
/// `fetch` is called with the offset of the next page until a page comes
/// back without the transfer limit flag. A flagged page that is empty, or
/// that repeats the first page (the layer ignores `resultOffset`), is an
/// error rather than a silently truncated table.
pub fn read_all_pages<F>(fields: &[&str], mut fetch: F) -> MetatableResult<Vec<MetatableRow>>
where
    F: FnMut(usize) -> MetatableResult<FeatureSet>,
{
    let mut rows: Vec<MetatableRow> = Vec::new();
    let mut first_page: Option<Vec<MetatableRow>> = None;

    loop {
        let page = fetch(rows.len())?;
        let exceeded = page.exceeded_transfer_limit();
        let page_rows = page.project(fields)?;

        if exceeded {
            if page_rows.is_empty() {
                return Err(MetatableError::SourceUnavailable(format!(
                    "Transfer limit exceeded with an empty page at offset {}",
                    rows.len()
                )));
            }
            if first_page.as_ref() == Some(&page_rows) {
                return Err(MetatableError::SourceUnavailable(format!(
                    "Transfer limit exceeded and the layer does not page past {} rows",
                    rows.len()
                )));
            }
        }

        if first_page.is_none() {
            first_page = Some(page_rows.clone());
        }
        rows.extend(page_rows);

        if !exceeded {
            return Ok(rows);
        }
        debug!("Transfer limit reached, fetching from offset {}", rows.len());
    }
}

/// Hosted table or feature layer queried through its REST `query` endpoint.
///
/// Large tables are read page by page with `resultOffset`.
#[cfg(feature = "api-backend")]
pub struct FeatureLayerSource {
    url: String,
    token: Option<String>,
    referer: Option<String>,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "api-backend")]
impl FeatureLayerSource {
    /// `url` is the layer URL, e.g. `.../FeatureServer/0`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: None,
            referer: None,
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Layer in the signed-in organization, queried with the portal's
    /// token, referer and HTTP client
    pub fn for_portal(url: impl Into<String>, portal: &PortalClient) -> Self {
        Self::new(url)
            .with_token(Some(portal.token().to_string()))
            .with_referer(Some(portal.org_url().to_string()))
            .with_client(portal.http_client())
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Referer sent with each query; referer-bound tokens are rejected
    /// without it
    #[must_use]
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::blocking::Client) -> Self {
        self.client = client;
        self
    }

    fn query_request(
        &self,
        fields: &[&str],
        offset: usize,
    ) -> reqwest::Result<reqwest::blocking::Request> {
        let out_fields = fields.join(",");
        let offset = offset.to_string();
        let mut params = vec![
            ("where", "1=1"),
            ("outFields", out_fields.as_str()),
            ("returnGeometry", "false"),
            ("resultOffset", offset.as_str()),
            ("f", "json"),
        ];
        if let Some(token) = &self.token {
            params.push(("token", token.as_str()));
        }

        let mut request = self.client.get(format!("{}/query", self.url)).query(&params);
        if let Some(referer) = &self.referer {
            request = request.header(reqwest::header::REFERER, referer.as_str());
        }
        request.build()
    }

    fn fetch_page(&self, fields: &[&str], offset: usize) -> MetatableResult<FeatureSet> {
        let body = self
            .query_request(fields, offset)
            .and_then(|request| self.client.execute(request))
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| {
                MetatableError::SourceUnavailable(format!("Failed to query {}: {}", self.url, e))
            })?;

        FeatureSet::from_json(&body)
    }
}

#[cfg(feature = "api-backend")]
impl MetatableSource for FeatureLayerSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn read_rows(&self, fields: &[&str]) -> MetatableResult<Vec<MetatableRow>> {
        read_all_pages(fields, |offset| self.fetch_page(fields, offset))
    }
}
