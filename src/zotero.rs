//! Zotero web API client and library import.
//!
//! Items are fetched 100 per request (the API maximum) and mapped onto
//! paper records. An import turns selected item keys into papers, links
//! their Zotero tags, and pulls the first PDF attachment into the paper's
//! folder.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use regex::Regex;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::doi::{is_valid_doi, normalize_doi};
use crate::error::{AppError, AppResult};
use crate::library::Library;
use crate::models::{
    non_blank, ApiResponse, LibraryType, PaperInput, ZoteroConfig, ZoteroConfigView,
    ZoteroCredentials,
};
use crate::store::Store;
use crate::url_validator::validate_paper_url;
use crate::AppState;

const PAGE_SIZE: usize = 100;
/// Items fetched when resolving keys for an import.
const IMPORT_SNAPSHOT: usize = 1000;
const UNTITLED: &str = "Untitled";
const UNKNOWN_AUTHOR: &str = "Unknown author";

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})\b").expect("static year regex"));
static ISO_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-(\d{1,2})").expect("static month regex"));

// ============================================================================
// Client
// ============================================================================

/// Which library to talk to and with what key.
#[derive(Debug, Clone, Copy)]
pub struct Account<'a> {
    pub user_id: &'a str,
    pub api_key: &'a str,
    pub library_type: LibraryType,
}

impl<'a> From<&'a ZoteroConfig> for Account<'a> {
    fn from(c: &'a ZoteroConfig) -> Self {
        Self {
            user_id: &c.user_id,
            api_key: &c.api_key,
            library_type: c.library_type,
        }
    }
}

impl<'a> From<&'a ZoteroCredentials> for Account<'a> {
    fn from(c: &'a ZoteroCredentials) -> Self {
        Self {
            user_id: &c.user_id,
            api_key: &c.api_key,
            library_type: c.library_type,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemQuery {
    pub limit: Option<usize>,
    pub start: Option<usize>,
    #[serde(alias = "itemType")]
    pub item_type: Option<String>,
    pub tag: Option<String>,
    pub q: Option<String>,
    pub since: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ItemPage {
    pub items: Vec<Value>,
    pub total: usize,
    pub library_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoteroCollection {
    pub key: String,
    pub name: String,
    pub parent_key: Option<String>,
    pub num_items: u64,
}

#[derive(Clone)]
pub struct ZoteroClient {
    http: reqwest::Client,
    base_url: String,
}

fn header_number(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn check_status(response: Response) -> AppResult<Response> {
    match response.status() {
        s if s.is_success() => Ok(response),
        StatusCode::FORBIDDEN => Err(AppError::Validation(
            "Invalid Zotero API key or insufficient permissions".to_string(),
        )),
        StatusCode::NOT_FOUND => Err(AppError::NotFound("Zotero resource".to_string())),
        s => Err(AppError::Upstream(format!("Zotero returned {}", s))),
    }
}

impl ZoteroClient {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("Papershelf/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: crate::config::trim_base_url(base_url),
        })
    }

    fn get(&self, account: Account<'_>, rest: &str) -> RequestBuilder {
        let url = format!(
            "{}/{}/{}/{}",
            self.base_url,
            account.library_type.path_segment(),
            urlencoding::encode(account.user_id.trim()),
            rest
        );
        self.http
            .get(url)
            .header("Zotero-API-Key", account.api_key.trim())
            .header("Zotero-API-Version", "3")
    }

    /// Check the credentials against the library. Returns the library
    /// version on success.
    pub async fn test_connection(&self, account: Account<'_>) -> AppResult<Option<u64>> {
        if account.user_id.trim().is_empty() || account.api_key.trim().is_empty() {
            return Err(AppError::Validation(
                "Zotero user id and API key are required".to_string(),
            ));
        }
        let response = self
            .get(account, "items")
            .query(&[("limit", "1")])
            .send()
            .await?;
        let response = check_status(response)?;
        Ok(header_number(&response, "Last-Modified-Version"))
    }

    /// Items matching `query`, following pagination until `limit` items are
    /// collected or the library is exhausted.
    pub async fn fetch_items(&self, account: Account<'_>, query: &ItemQuery) -> AppResult<ItemPage> {
        let limit = query.limit.unwrap_or(PAGE_SIZE).max(1);
        let mut start = query.start.unwrap_or(0);
        let mut items: Vec<Value> = Vec::new();
        let mut total = 0;
        let mut library_version = None;

        loop {
            let batch = (limit - items.len()).min(PAGE_SIZE);
            let mut params: Vec<(&str, String)> = vec![
                ("format", "json".to_string()),
                ("include", "data".to_string()),
                ("limit", batch.to_string()),
                ("start", start.to_string()),
            ];
            if let Some(v) = query.item_type.as_deref().and_then(non_blank) {
                params.push(("itemType", v));
            }
            if let Some(v) = query.tag.as_deref().and_then(non_blank) {
                params.push(("tag", v));
            }
            if let Some(v) = query.q.as_deref().and_then(non_blank) {
                params.push(("q", v));
            }
            if let Some(v) = query.since {
                params.push(("since", v.to_string()));
            }

            let response = check_status(self.get(account, "items").query(&params).send().await?)?;
            total = header_number(&response, "Total-Results").unwrap_or(0) as usize;
            library_version = header_number(&response, "Last-Modified-Version").or(library_version);

            let page: Vec<Value> = response.json().await?;
            let received = page.len();
            items.extend(page);
            start += received;

            if received == 0 || items.len() >= limit || start >= total {
                break;
            }
        }

        items.truncate(limit);
        tracing::debug!(count = items.len(), total, "Fetched Zotero items");
        Ok(ItemPage {
            items,
            total,
            library_version,
        })
    }

    pub async fn fetch_collections(&self, account: Account<'_>) -> AppResult<Vec<ZoteroCollection>> {
        let response = self
            .get(account, "collections")
            .query(&[("format", "json"), ("limit", "100")])
            .send()
            .await?;
        let raw: Vec<Value> = check_status(response)?.json().await?;

        Ok(raw
            .iter()
            .filter_map(|c| {
                let data = c.get("data")?;
                Some(ZoteroCollection {
                    key: c.get("key")?.as_str()?.to_string(),
                    name: data.get("name")?.as_str()?.to_string(),
                    // `false` for top-level collections
                    parent_key: data
                        .get("parentCollection")
                        .and_then(|p| p.as_str())
                        .map(str::to_string),
                    num_items: c
                        .pointer("/meta/numItems")
                        .and_then(|n| n.as_u64())
                        .unwrap_or(0),
                })
            })
            .collect())
    }

    pub async fn children(&self, account: Account<'_>, item_key: &str) -> AppResult<Vec<Value>> {
        let response = self
            .get(account, &format!("items/{}/children", urlencoding::encode(item_key)))
            .query(&[("format", "json")])
            .send()
            .await?;
        Ok(check_status(response)?.json().await?)
    }

    pub async fn download_file(&self, account: Account<'_>, attachment_key: &str) -> AppResult<Vec<u8>> {
        let response = self
            .get(account, &format!("items/{}/file", urlencoding::encode(attachment_key)))
            .send()
            .await?;
        Ok(check_status(response)?.bytes().await?.to_vec())
    }

    /// Bytes of the item's first PDF attachment, if it has one.
    pub async fn download_pdf(&self, account: Account<'_>, item_key: &str) -> AppResult<Option<Vec<u8>>> {
        let children = self.children(account, item_key).await?;
        let attachment = children.iter().find(|child| {
            child.pointer("/data/itemType").and_then(|v| v.as_str()) == Some("attachment")
                && child.pointer("/data/contentType").and_then(|v| v.as_str())
                    == Some("application/pdf")
        });
        match attachment.and_then(|a| a.get("key")).and_then(|k| k.as_str()) {
            Some(key) => Ok(Some(self.download_file(account, key).await?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Item Mapping
// ============================================================================

fn data_str<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn creator_name(creator: &Value) -> Option<String> {
    let first = data_str(creator, "firstName");
    let last = data_str(creator, "lastName");
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
        _ => data_str(creator, "name").or(last).map(str::to_string),
    }
}

pub fn item_authors(data: &Value) -> String {
    data.get("creators")
        .and_then(|c| c.as_array())
        .map(|creators| {
            creators
                .iter()
                .filter_map(creator_name)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

pub fn item_tags(data: &Value) -> Vec<String> {
    data.get("tags")
        .and_then(|t| t.as_array())
        .map(|tags| {
            tags.iter()
                .filter_map(|t| data_str(t, "tag"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_year(date: &str) -> Option<i32> {
    YEAR.captures(date)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_month(date: &str) -> Option<u32> {
    ISO_MONTH
        .captures(date.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|m| (1..=12).contains(m))
}

/// Map a Zotero item onto a paper create request. DOIs and URLs that would
/// fail validation are dropped rather than failing the import.
pub fn item_to_paper(item: &Value) -> Option<PaperInput> {
    let key = item.get("key")?.as_str()?;
    let data = item.get("data")?;

    let authors = item_authors(data);
    let date = data_str(data, "date");
    let conference = ["publicationTitle", "conferenceName", "bookTitle", "university"]
        .iter()
        .find_map(|k| data_str(data, k))
        .map(str::to_string);
    let doi = data_str(data, "DOI")
        .map(normalize_doi)
        .filter(|d| is_valid_doi(d));
    let url = data_str(data, "url")
        .filter(|u| validate_paper_url(u).is_ok())
        .map(str::to_string);

    Some(PaperInput {
        title: Some(data_str(data, "title").unwrap_or(UNTITLED).to_string()),
        authors: Some(if authors.is_empty() {
            UNKNOWN_AUTHOR.to_string()
        } else {
            authors
        }),
        publication_date: date.map(str::to_string),
        conference,
        conference_short: data_str(data, "journalAbbreviation").map(str::to_string),
        year: date.and_then(parse_year),
        month: date.and_then(parse_month),
        abstract_text: data_str(data, "abstractNote").map(str::to_string),
        doi,
        url,
        reading_status: Some("unread".to_string()),
        is_favorite: Some(false),
        zotero_key: Some(key.to_string()),
        tags: item_tags(data),
        ..Default::default()
    })
}

/// Item summary shown in the import picker.
#[derive(Debug, Clone, Serialize)]
pub struct ZoteroItemView {
    pub key: String,
    pub item_type: String,
    pub title: String,
    pub authors: String,
    pub date: Option<String>,
    pub publication: Option<String>,
    pub doi: Option<String>,
    pub tags: Vec<String>,
    pub imported: bool,
}

impl ZoteroItemView {
    fn from_item(item: &Value, store: &Store) -> AppResult<Option<Self>> {
        let (Some(key), Some(data)) = (item.get("key").and_then(|k| k.as_str()), item.get("data"))
        else {
            return Ok(None);
        };
        let item_type = data_str(data, "itemType").unwrap_or_default();
        if item_type == "attachment" || item_type == "note" {
            return Ok(None);
        }
        Ok(Some(Self {
            key: key.to_string(),
            item_type: item_type.to_string(),
            title: data_str(data, "title").unwrap_or(UNTITLED).to_string(),
            authors: item_authors(data),
            date: data_str(data, "date").map(str::to_string),
            publication: data_str(data, "publicationTitle")
                .or_else(|| data_str(data, "conferenceName"))
                .map(str::to_string),
            doi: data_str(data, "DOI").map(str::to_string),
            tags: item_tags(data),
            imported: store.find_by_zotero_key(key)?.is_some(),
        }))
    }
}

// ============================================================================
// Import
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ImportedItem {
    pub id: u64,
    pub zotero_key: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportFailure {
    pub key: String,
    pub title: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportDetails {
    pub imported: Vec<ImportedItem>,
    pub errors: Vec<ImportFailure>,
}

/// Outcome of an import. `imported + errors` always equals the number of
/// requested keys.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: usize,
    pub details: ImportDetails,
}

impl ImportReport {
    fn success(&mut self, item: ImportedItem) {
        self.imported += 1;
        self.details.imported.push(item);
    }

    fn failure(&mut self, key: &str, title: Option<String>, error: impl Into<String>) {
        self.errors += 1;
        self.details.errors.push(ImportFailure {
            key: key.to_string(),
            title,
            error: error.into(),
        });
    }
}

/// Create the paper folder and bring in the PDF and cover. Failures here
/// are logged by the caller and never undo the import.
async fn attach_files(
    client: &ZoteroClient,
    store: &Store,
    library: &Library,
    account: Account<'_>,
    paper_id: u64,
    item_key: &str,
) -> AppResult<()> {
    let paper = store.require_paper(paper_id)?;
    let (folder, _) = library.ensure_folder(&paper)?;
    let paper = store.modify_paper(paper_id, |p| p.folder_path = Some(folder))?;

    let Some(bytes) = client.download_pdf(account, item_key).await? else {
        return Ok(());
    };

    let library = library.clone();
    let snapshot = paper.clone();
    let cover =
        tokio::task::spawn_blocking(move || crate::pdf::store_with_cover(&library, &snapshot, &bytes))
            .await??;
    if let Some(cover) = cover {
        store.modify_paper(paper_id, |p| p.image = Some(cover))?;
    }
    tracing::info!(paper_id, zotero_key = item_key, "Attached Zotero PDF");
    Ok(())
}

pub async fn import_items(
    client: &ZoteroClient,
    store: &Store,
    library: &Library,
    config: &ZoteroConfig,
    keys: &[String],
) -> AppResult<ImportReport> {
    let account = Account::from(config);
    let snapshot = client
        .fetch_items(
            account,
            &ItemQuery {
                limit: Some(IMPORT_SNAPSHOT),
                ..Default::default()
            },
        )
        .await?;
    let by_key: HashMap<&str, &Value> = snapshot
        .items
        .iter()
        .filter_map(|item| Some((item.get("key")?.as_str()?, item)))
        .collect();

    let mut report = ImportReport::default();
    for key in keys {
        let Some(item) = by_key.get(key.as_str()) else {
            report.failure(key, None, "Item not found in Zotero library");
            continue;
        };
        let title = item
            .pointer("/data/title")
            .and_then(|t| t.as_str())
            .map(str::to_string);

        match store.find_by_zotero_key(key) {
            Ok(Some(_)) => {
                report.failure(key, title, "Already imported");
                continue;
            }
            Err(e) => {
                report.failure(key, title, e.to_string());
                continue;
            }
            Ok(None) => {}
        }

        let Some(input) = item_to_paper(item) else {
            report.failure(key, title, "Malformed Zotero item");
            continue;
        };
        let paper = match store.create_paper(&input) {
            Ok(paper) => paper,
            Err(e) => {
                report.failure(key, title, e.to_string());
                continue;
            }
        };

        if let Err(e) = attach_files(client, store, library, account, paper.id, key).await {
            tracing::warn!(paper_id = paper.id, zotero_key = %key, error = %e, "Could not attach Zotero files");
        }

        report.success(ImportedItem {
            id: paper.id,
            zotero_key: key.clone(),
            title: paper.title,
        });
    }

    if let Err(e) = store.touch_zotero_sync() {
        tracing::warn!(error = %e, "Could not record Zotero sync time");
    }
    tracing::info!(imported = report.imported, errors = report.errors, "Zotero import finished");
    Ok(report)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ConnectionInfo {
    pub library_version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    pub items: Vec<ZoteroItemView>,
    pub total: usize,
    pub library_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default, alias = "itemKeys")]
    pub item_keys: Vec<String>,
}

fn require_config(store: &Store) -> AppResult<ZoteroConfig> {
    store
        .zotero_config()?
        .ok_or_else(|| AppError::Validation("Zotero is not configured".to_string()))
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Json(creds): Json<ZoteroCredentials>,
) -> AppResult<impl IntoResponse> {
    let library_version = state.zotero.test_connection(Account::from(&creds)).await?;
    Ok(ApiResponse::with_message(
        ConnectionInfo { library_version },
        "Connection successful",
    ))
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let config = state.store.zotero_config()?;
    Ok(ApiResponse::ok(ZoteroConfigView::from_config(config.as_ref())))
}

/// Verify the credentials, then store them.
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(creds): Json<ZoteroCredentials>,
) -> AppResult<impl IntoResponse> {
    state.zotero.test_connection(Account::from(&creds)).await?;

    let last_sync = state.store.zotero_config()?.and_then(|c| c.last_sync);
    let config = ZoteroConfig {
        user_id: creds.user_id.trim().to_string(),
        api_key: creds.api_key.trim().to_string(),
        library_type: creds.library_type,
        last_sync,
        updated_at: Utc::now(),
    };
    state.store.save_zotero_config(&config)?;
    tracing::info!(user_id = %config.user_id, "Saved Zotero configuration");
    Ok(ApiResponse::with_message(
        ZoteroConfigView::from_config(Some(&config)),
        "Configuration saved",
    ))
}

pub async fn delete_config(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    state.store.delete_zotero_config()?;
    Ok(ApiResponse::message("Configuration deleted"))
}

pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemQuery>,
) -> AppResult<impl IntoResponse> {
    let config = require_config(&state.store)?;
    let page = state.zotero.fetch_items(Account::from(&config), &query).await?;

    let mut items = Vec::with_capacity(page.items.len());
    for item in &page.items {
        if let Some(view) = ZoteroItemView::from_item(item, &state.store)? {
            items.push(view);
        }
    }
    Ok(ApiResponse::ok(ItemsResponse {
        items,
        total: page.total,
        library_version: page.library_version,
    }))
}

pub async fn list_collections(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let config = require_config(&state.store)?;
    let collections = state.zotero.fetch_collections(Account::from(&config)).await?;
    Ok(ApiResponse::ok(collections))
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportRequest>,
) -> AppResult<impl IntoResponse> {
    if body.item_keys.is_empty() {
        return Err(AppError::Validation("item_keys must be a non-empty list".to_string()));
    }
    let config = require_config(&state.store)?;
    let report = import_items(
        &state.zotero,
        &state.store,
        &state.library,
        &config,
        &body.item_keys,
    )
    .await?;
    Ok(ApiResponse::ok(report))
}

#[cfg(test)]
#[path = "zotero_test.rs"]
mod zotero_test;
