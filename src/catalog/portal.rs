//! ArcGIS portal REST client
//!
//! Blocking client over the portal sharing API:
//! - `generateToken` for sign-in
//! - `content/users/<user>[/<folder>]` for folders and items
//! - `community/groups` for open data groups
//! - `content/items/<id>/groups` for sharing
//! - `portals/<org>/usage` for usage statistics

use chrono::{Duration, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::{Catalog, CatalogError, CatalogItem, CatalogResult, Folder, SharingInfo};

/// Maximum number of items requested per folder
pub const ITEMS_PER_FOLDER: u32 = 1000;

/// Maximum number of open data groups requested
const GROUP_SEARCH_LIMIT: u32 = 100;

/// Token lifetime requested from `generateToken`, in minutes
const TOKEN_EXPIRATION_MINUTES: u32 = 720;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PortalSelf {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserContent {
    #[serde(default)]
    items: Vec<CatalogItem>,
    #[serde(default)]
    folders: Vec<RawFolder>,
}

#[derive(Debug, Deserialize)]
struct RawFolder {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct GroupSearch {
    #[serde(default)]
    results: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ItemGroups {
    #[serde(default)]
    admin: Vec<RawGroup>,
    #[serde(default)]
    member: Vec<RawGroup>,
    #[serde(default)]
    other: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    data: Vec<UsageSeries>,
}

#[derive(Debug, Deserialize)]
struct UsageSeries {
    #[serde(default)]
    num: Vec<(Value, Value)>,
}

/// Signed-in connection to an ArcGIS Online organization
pub struct PortalClient {
    org_url: String,
    username: String,
    org_id: String,
    token: String,
    client: Client,
}

impl PortalClient {
    /// Sign in to `org_url` as `username`.
    ///
    /// Fails with [`CatalogError::Authentication`] when the credentials are
    /// rejected.
    pub fn connect(org_url: &str, username: &str, password: &str) -> CatalogResult<Self> {
        let org_url = org_url.trim_end_matches('/').to_string();

        info!("==========");
        info!("Portal: {}", org_url);
        info!("User: {}", username);
        info!("==========");

        let client = referer_client(&org_url)?;

        let expiration = TOKEN_EXPIRATION_MINUTES.to_string();
        let response = client
            .post(format!("{}/sharing/rest/generateToken", org_url))
            .form(&[
                ("username", username),
                ("password", password),
                ("client", "referer"),
                ("referer", org_url.as_str()),
                ("expiration", expiration.as_str()),
                ("f", "json"),
            ])
            .send()
            .map_err(|e| CatalogError::Network(format!("Sign-in request failed: {}", e)))?;
        let body: Value = response
            .json()
            .map_err(|e| CatalogError::InvalidResponse(format!("Sign-in response: {}", e)))?;
        if let Some(error) = body.get("error") {
            return Err(CatalogError::Authentication(describe_api_error(error)));
        }
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| CatalogError::Authentication(format!("No token returned: {}", e)))?;

        let mut portal = Self {
            org_url,
            username: username.to_string(),
            org_id: String::new(),
            token: token.token,
            client,
        };

        let portal_self: PortalSelf = portal.get("portals/self", &[])?;
        portal.org_id = portal_self.id;
        debug!("Signed in to organization {}", portal.org_id);

        Ok(portal)
    }

    /// Wrap a token issued elsewhere for `org_url`, without signing in
    pub fn with_token(
        org_url: &str,
        username: &str,
        org_id: &str,
        token: &str,
    ) -> CatalogResult<Self> {
        let org_url = org_url.trim_end_matches('/').to_string();
        Ok(Self {
            client: referer_client(&org_url)?,
            org_url,
            username: username.to_string(),
            org_id: org_id.to_string(),
            token: token.to_string(),
        })
    }

    pub fn org_url(&self) -> &str {
        &self.org_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Access token, for metatable sources hosted in the same org
    pub fn token(&self) -> &str {
        &self.token
    }

    /// HTTP client sending the portal's `Referer`, for requests that use
    /// [`PortalClient::token`]
    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> CatalogResult<T> {
        let url = format!("{}/sharing/rest/{}", self.org_url, path);
        let mut query: Vec<(&str, &str)> = vec![("f", "json"), ("token", self.token.as_str())];
        query.extend_from_slice(params);

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .map_err(|e| CatalogError::Network(format!("GET {}: {}", path, e)))?;
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|e| CatalogError::InvalidResponse(format!("GET {}: {}", path, e)))?;

        if let Some(error) = body.get("error") {
            return Err(classify_api_error(error));
        }
        if !status.is_success() {
            return Err(CatalogError::Network(format!("GET {}: HTTP {}", path, status)));
        }

        serde_json::from_value(body)
            .map_err(|e| CatalogError::InvalidResponse(format!("GET {}: {}", path, e)))
    }

    fn user_content_path(&self, folder: &Folder) -> String {
        let user = urlencoding::encode(&self.username);
        match folder.id() {
            None => format!("content/users/{}", user),
            Some(id) => format!("content/users/{}/{}", user, urlencoding::encode(id)),
        }
    }
}

impl Catalog for PortalClient {
    fn list_folders(&self) -> CatalogResult<Vec<Folder>> {
        info!("Getting {}'s folders...", self.username);
        let content: UserContent =
            self.get(&self.user_content_path(&Folder::Root), &[("num", "1")])?;

        let mut folders = vec![Folder::Root];
        folders.extend(
            content
                .folders
                .into_iter()
                .map(|folder| Folder::named(folder.id, folder.title)),
        );
        Ok(folders)
    }

    fn list_feature_service_items(
        &self,
        folders: &[Folder],
    ) -> CatalogResult<Vec<(CatalogItem, Folder)>> {
        info!("Getting item objects...");
        let num = ITEMS_PER_FOLDER.to_string();
        let mut feature_services = Vec::new();

        for folder in folders {
            let content: UserContent =
                self.get(&self.user_content_path(folder), &[("num", num.as_str())])?;
            feature_services.extend(
                content
                    .items
                    .into_iter()
                    .filter(CatalogItem::is_feature_service)
                    .map(|item| (item, folder.clone())),
            );
        }

        Ok(feature_services)
    }

    fn list_open_data_groups(&self) -> CatalogResult<Vec<String>> {
        info!("Getting open data groups...");
        let q = format!("orgid:{} AND isopendata:true", self.org_id);
        let num = GROUP_SEARCH_LIMIT.to_string();
        let search: GroupSearch = self.get(
            "community/groups",
            &[("q", q.as_str()), ("num", num.as_str())],
        )?;
        Ok(search.results.into_iter().map(|group| group.title).collect())
    }

    fn sharing(&self, item: &CatalogItem) -> CatalogResult<SharingInfo> {
        let path = format!("content/items/{}/groups", urlencoding::encode(&item.id));
        let groups: ItemGroups = self.get(&path, &[]).map_err(sharing_error)?;

        let access = item.access.as_deref().unwrap_or("private");
        Ok(SharingInfo {
            everyone: access == "public",
            org: access == "public" || access == "org",
            groups: groups
                .admin
                .into_iter()
                .chain(groups.member)
                .chain(groups.other)
                .map(|group| group.title)
                .collect(),
        })
    }

    fn yearly_usage(&self, item: &CatalogItem) -> CatalogResult<u64> {
        let name = item
            .name
            .as_deref()
            .ok_or_else(|| CatalogError::Usage(format!("Item {} has no service name", item.id)))?;

        let end = Utc::now();
        let start = end - Duration::days(365);
        let start_ms = start.timestamp_millis().to_string();
        let end_ms = end.timestamp_millis().to_string();
        let path = format!("portals/{}/usage", self.org_id);

        let usage: UsageResponse = self
            .get(
                &path,
                &[
                    ("startTime", start_ms.as_str()),
                    ("endTime", end_ms.as_str()),
                    ("period", "1w"),
                    ("vars", "num"),
                    ("groupby", "name"),
                    ("etype", "svcusg"),
                    ("stype", "features"),
                    ("name", name),
                ],
            )
            .map_err(usage_error)?;

        sum_usage(&usage)
    }
}

fn sum_usage(usage: &UsageResponse) -> CatalogResult<u64> {
    let mut total = 0u64;
    for series in &usage.data {
        for (_, count) in &series.num {
            let count = match count {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            }
            .ok_or_else(|| CatalogError::Usage(format!("Unexpected usage count: {}", count)))?;
            total = total.saturating_add(count);
        }
    }
    Ok(total)
}

/// Client that sends `org_url` as the `Referer` on every request.
///
/// Tokens are generated with `client=referer`, so every request carrying
/// one must come from this client.
fn referer_client(org_url: &str) -> CatalogResult<Client> {
    let mut headers = HeaderMap::new();
    let referer = HeaderValue::from_str(org_url)
        .map_err(|e| CatalogError::Authentication(format!("Invalid portal URL: {}", e)))?;
    headers.insert(REFERER, referer);
    Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| CatalogError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Sharing lookup failures are permission errors unless the sign-in itself
/// or the connection failed
fn sharing_error(err: CatalogError) -> CatalogError {
    match err {
        CatalogError::Authentication(_) | CatalogError::Network(_) | CatalogError::Permission(_) => {
            err
        }
        other => CatalogError::Permission(other.to_string()),
    }
}

/// Usage lookup failures are usage errors unless the sign-in itself or the
/// connection failed
fn usage_error(err: CatalogError) -> CatalogError {
    match err {
        CatalogError::Authentication(_) | CatalogError::Network(_) | CatalogError::Usage(_) => err,
        other => CatalogError::Usage(other.to_string()),
    }
}

fn describe_api_error(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match error.get("code").and_then(Value::as_i64) {
        Some(code) => format!("{} (code {})", message, code),
        None => message.to_string(),
    }
}

fn classify_api_error(error: &Value) -> CatalogError {
    let description = describe_api_error(error);
    match error.get("code").and_then(Value::as_i64) {
        Some(498) | Some(499) => CatalogError::Authentication(description),
        Some(403) => CatalogError::Permission(description),
        _ => CatalogError::InvalidResponse(description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_usage_accepts_string_and_number_counts() {
        let usage: UsageResponse = serde_json::from_str(
            r#"{"data": [{"num": [["1608921055000", "12"], ["1609525855000", 30]]},
                         {"num": [["1610130655000", "0"]]}]}"#,
        )
        .unwrap();
        assert_eq!(sum_usage(&usage).unwrap(), 42);
    }

    #[test]
    fn test_sum_usage_rejects_garbage() {
        let usage: UsageResponse =
            serde_json::from_str(r#"{"data": [{"num": [["1608921055000", "lots"]]}]}"#).unwrap();
        assert!(matches!(sum_usage(&usage), Err(CatalogError::Usage(_))));
    }

    #[test]
    fn test_empty_usage_is_zero() {
        let usage: UsageResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert_eq!(sum_usage(&usage).unwrap(), 0);
    }

    #[test]
    fn test_classify_api_error() {
        let token: Value =
            serde_json::from_str(r#"{"code": 498, "message": "Invalid token."}"#).unwrap();
        assert!(matches!(
            classify_api_error(&token),
            CatalogError::Authentication(_)
        ));

        let denied: Value = serde_json::from_str(
            r#"{"code": 403, "message": "You do not have permissions to access this resource or perform this operation."}"#,
        )
        .unwrap();
        assert!(matches!(
            classify_api_error(&denied),
            CatalogError::Permission(_)
        ));

        let other: Value = serde_json::from_str(r#"{"message": "Item does not exist"}"#).unwrap();
        assert_eq!(
            classify_api_error(&other),
            CatalogError::InvalidResponse("Item does not exist".to_string())
        );
    }

    #[test]
    fn test_expired_token_stays_fatal_on_item_lookups() {
        let expired: Value =
            serde_json::from_str(r#"{"code": 498, "message": "Invalid token."}"#).unwrap();

        let sharing = sharing_error(classify_api_error(&expired));
        assert!(matches!(sharing, CatalogError::Authentication(_)));
        assert!(!sharing.is_recoverable());

        let usage = usage_error(classify_api_error(&expired));
        assert!(matches!(usage, CatalogError::Authentication(_)));
        assert!(!usage.is_recoverable());
    }

    #[test]
    fn test_item_lookup_errors_are_recoverable() {
        let missing = CatalogError::InvalidResponse("Item does not exist".to_string());
        assert_eq!(
            sharing_error(missing.clone()),
            CatalogError::Permission("Invalid response: Item does not exist".to_string())
        );
        assert!(matches!(usage_error(missing), CatalogError::Usage(_)));

        let reset = CatalogError::Network("connection reset".to_string());
        assert_eq!(sharing_error(reset.clone()), reset);
        assert_eq!(usage_error(reset.clone()), reset);
    }
}
