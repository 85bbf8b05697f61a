//! Data models for the paper library.
//!
//! Records stored in sled, request bodies accepted by the handlers, and the
//! views returned to the client. Block content lives in `blocks`.

use std::fmt;
use std::str::FromStr;

use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::doi::is_valid_doi;
use crate::error::{AppError, AppResult};
use crate::url_validator::validate_paper_url;

pub const DEFAULT_TAG_COLOR: &str = "#3B82F6";

// ============================================================================
// Response Envelope
// ============================================================================

/// `{ "success": true, "data": ... }` wrapper used by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        })
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            message: Some(message.into()),
        })
    }
}

// ============================================================================
// Papers
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    #[default]
    Unread,
    Reading,
    Read,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Unread => "unread",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Read => "read",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "unread" => Ok(ReadingStatus::Unread),
            "reading" => Ok(ReadingStatus::Reading),
            "read" => Ok(ReadingStatus::Read),
            other => Err(AppError::Validation(format!(
                "Invalid reading status '{}': expected unread, reading or read",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: u64,
    pub title: String,
    pub authors: String,
    pub publication_date: Option<String>,
    pub conference: Option<String>,
    pub conference_short: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub folder_path: Option<String>,
    pub zotero_key: Option<String>,
    pub reading_status: ReadingStatus,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Paper {
    /// Build a new record from a create request. Fields are normalized but
    /// not validated; call [`Paper::validate`] before storing.
    pub fn from_input(id: u64, input: &PaperInput) -> AppResult<Self> {
        let now = Utc::now();
        let mut paper = Paper {
            id,
            title: String::new(),
            authors: String::new(),
            publication_date: None,
            conference: None,
            conference_short: None,
            year: None,
            month: None,
            abstract_text: None,
            doi: None,
            url: None,
            image: None,
            folder_path: None,
            zotero_key: None,
            reading_status: ReadingStatus::Unread,
            is_favorite: false,
            created_at: now,
            updated_at: now,
        };
        paper.apply(input)?;
        paper.zotero_key = input.zotero_key.as_deref().and_then(non_blank);
        paper.created_at = now;
        Ok(paper)
    }

    /// Merge the fields present in `input` over this record. Blank strings
    /// clear optional fields.
    pub fn apply(&mut self, input: &PaperInput) -> AppResult<()> {
        if let Some(title) = &input.title {
            self.title = title.trim().to_string();
        }
        if let Some(authors) = &input.authors {
            self.authors = authors.trim().to_string();
        }
        merge_opt(&mut self.publication_date, &input.publication_date);
        merge_opt(&mut self.conference, &input.conference);
        merge_opt(&mut self.conference_short, &input.conference_short);
        merge_opt(&mut self.abstract_text, &input.abstract_text);
        merge_opt(&mut self.url, &input.url);
        merge_opt(&mut self.image, &input.image);
        if let Some(doi) = &input.doi {
            self.doi = non_blank(doi).map(|d| crate::doi::normalize_doi(&d));
        }
        if input.year.is_some() {
            self.year = input.year;
        }
        if input.month.is_some() {
            self.month = input.month;
        }
        if let Some(status) = &input.reading_status {
            self.reading_status = status.parse()?;
        }
        if let Some(favorite) = input.is_favorite {
            self.is_favorite = favorite;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        if self.authors.trim().is_empty() {
            return Err(AppError::Validation("Authors are required".to_string()));
        }
        if let Some(doi) = &self.doi {
            if !is_valid_doi(doi) {
                return Err(AppError::Validation(format!("Invalid DOI format: {}", doi)));
            }
        }
        if let Some(url) = &self.url {
            validate_paper_url(url)
                .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
        }
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(AppError::Validation(format!("Invalid month: {}", month)));
            }
        }
        Ok(())
    }

    /// Case-insensitive match against title, authors and venue.
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.authors.to_lowercase().contains(needle_lower)
            || self
                .conference
                .as_deref()
                .map(|c| c.to_lowercase().contains(needle_lower))
                .unwrap_or(false)
    }
}

fn merge_opt(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *target = non_blank(v);
    }
}

pub fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Body of paper create and update requests. Every field is optional so the
/// same type serves partial updates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperInput {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub publication_date: Option<String>,
    pub conference: Option<String>,
    pub conference_short: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub reading_status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_flag")]
    pub is_favorite: Option<bool>,
    pub zotero_key: Option<String>,
    /// Tag names, created on demand.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Category names, created on demand like tags.
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Accept `true`/`false` as well as the `0`/`1` integers older clients send.
fn deserialize_optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(Option::<Flag>::deserialize(deserializer)?.map(|flag| match flag {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub reading_status: String,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteUpdate {
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_favorite: bool,
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_optional_flag(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("is_favorite is required"))
}

/// A paper as returned to the client, with its tags, categories and
/// collection ids.
#[derive(Debug, Clone, Serialize)]
pub struct PaperView {
    #[serde(flatten)]
    pub paper: Paper,
    pub tags: Vec<Tag>,
    pub categories: Vec<Category>,
    pub collections: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaperStats {
    pub total: usize,
    pub unread: usize,
    pub reading: usize,
    pub read: usize,
    pub favorite: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub paper_count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagInput {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// Accept `#RGB` and `#RRGGBB` colors.
pub fn is_valid_color(color: &str) -> bool {
    let Some(hex) = color.strip_prefix('#') else {
        return false;
    };
    (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

// ============================================================================
// Categories
// ============================================================================

pub const MAX_CATEGORY_NAME: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryInput {
    pub name: Option<String>,
}

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    #[serde(flatten)]
    pub collection: Collection,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub papers: Vec<Paper>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionInput {
    pub name: Option<String>,
    #[serde(default, alias = "paperIds")]
    pub paper_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionPapers {
    #[serde(default, alias = "paperIds")]
    pub paper_ids: Vec<u64>,
}

// ============================================================================
// DOI Metadata
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoiMetadata {
    pub title: String,
    pub authors: String,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub publication_date: Option<String>,
    pub journal: Option<String>,
    pub journal_short: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub doi: String,
    pub url: String,
}

// ============================================================================
// Zotero
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    #[default]
    User,
    Group,
}

impl LibraryType {
    /// Path segment used by the Zotero web API.
    pub fn path_segment(&self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoteroConfig {
    pub user_id: String,
    pub api_key: String,
    #[serde(default)]
    pub library_type: LibraryType,
    pub last_sync: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoteroCredentials {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(default, alias = "libraryType")]
    pub library_type: LibraryType,
}

/// What the client gets to see of the stored Zotero configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ZoteroConfigView {
    pub configured: bool,
    pub user_id: Option<String>,
    pub api_key_preview: Option<String>,
    pub library_type: Option<LibraryType>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl ZoteroConfigView {
    pub fn from_config(config: Option<&ZoteroConfig>) -> Self {
        match config {
            Some(c) => Self {
                configured: true,
                user_id: Some(c.user_id.clone()),
                api_key_preview: Some(mask_secret(&c.api_key)),
                library_type: Some(c.library_type),
                last_sync: c.last_sync,
            },
            None => Self {
                configured: false,
                user_id: None,
                api_key_preview: None,
                library_type: None,
                last_sync: None,
            },
        }
    }
}

/// Hide all but the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("••••••{}", tail)
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    None,
    Ollama,
    Groq,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub llm_provider: LlmProvider,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_model: Option<String>,
}

impl Settings {
    /// Merge a partial update. A masked key echoed back by the client leaves
    /// the stored key untouched.
    pub fn apply(&mut self, update: SettingsUpdate) -> AppResult<()> {
        if let Some(mode) = update.view_mode {
            self.view_mode = mode;
        }
        if let Some(provider) = update.llm_provider {
            self.llm_provider = provider;
        }
        if let Some(url) = update.ollama_url {
            self.ollama_url = match non_blank(&url) {
                Some(u) => {
                    crate::url_validator::validate_service_url(&u)
                        .map_err(|e| AppError::Validation(format!("Invalid Ollama URL: {}", e)))?;
                    Some(crate::config::trim_base_url(&u))
                }
                None => None,
            };
        }
        if let Some(model) = update.ollama_model {
            self.ollama_model = non_blank(&model);
        }
        if let Some(key) = update.groq_api_key {
            if !key.starts_with("••••••") {
                self.groq_api_key = non_blank(&key);
            }
        }
        if let Some(model) = update.groq_model {
            self.groq_model = non_blank(&model);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub view_mode: Option<ViewMode>,
    pub llm_provider: Option<LlmProvider>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub view_mode: ViewMode,
    pub llm_provider: LlmProvider,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub groq_api_key_preview: Option<String>,
    pub groq_model: Option<String>,
}

impl From<&Settings> for SettingsView {
    fn from(s: &Settings) -> Self {
        Self {
            view_mode: s.view_mode,
            llm_provider: s.llm_provider,
            ollama_url: s.ollama_url.clone(),
            ollama_model: s.ollama_model.clone(),
            groq_api_key_preview: s.groq_api_key.as_deref().map(mask_secret),
            groq_model: s.groq_model.clone(),
        }
    }
}
