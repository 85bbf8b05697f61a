//! DOI handling: validation, extraction from URLs and free text, and metadata
//! lookup through the CrossRef works API.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::DoiMetadata;

static DOI_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10\.\d{4,}/[-._;()/<>a-zA-Z0-9]+$").expect("static DOI regex")
});

static JATS_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static tag regex"));

/// Patterns tried in order against PDF text; the first capture wins.
static TEXT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bdoi:\s*(10\.\d{4,}/\S+)",
        r"(?i)(?:https?://)?(?:dx\.)?doi\.org/(10\.\d{4,}/\S+)",
        r"\b(10\.\d{4,}/\S+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static DOI text regex"))
    .collect()
});

pub fn is_valid_doi(doi: &str) -> bool {
    DOI_FORMAT.is_match(doi)
}

fn trim_doi_punctuation(doi: &str) -> &str {
    doi.trim_end_matches(['.', ',', ';'])
}

/// Pull a DOI out of a URL or bare identifier.
pub fn extract_doi(input: &str) -> Option<String> {
    let patterns = [
        // Standard DOI URLs
        r#"(?:doi\.org|dx\.doi\.org)/?(10\.\d{4,}/[^\s\]"'<>]+)"#,
        // Publisher landing pages that embed the DOI in the path
        r#"dl\.acm\.org/doi/(?:abs/|pdf/|full/)?(10\.\d{4,}/[^\s\]"'<>]+)"#,
        r#"link\.springer\.com/(?:article|chapter)/(10\.\d{4,}/[^\s\]"'<>]+)"#,
        r#"onlinelibrary\.wiley\.com/doi/(?:abs/|full/)?(10\.\d{4,}/[^\s\]"'<>]+)"#,
        r#"journals\.plos\.org/\w+/article\?id=(10\.\d{4,}/[^\s\]"'<>&]+)"#,
        // doi: prefix
        r#"(?i)^doi:\s*(10\.\d{4,}/[^\s\]"'<>]+)$"#,
        // Bare DOI
        r#"^(10\.\d{4,}/[^\s\]"'<>]+)$"#,
    ];

    let input = input.trim();
    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(m) = re.captures(input).and_then(|caps| caps.get(1)) {
                return Some(trim_doi_punctuation(m.as_str()).to_string());
            }
        }
    }
    None
}

/// Canonical stored form of a user-supplied DOI. Percent-encoded input (as
/// sent in a path segment) is decoded and URL forms are reduced to the bare
/// identifier; anything unrecognized is returned trimmed so validation can
/// report it.
pub fn normalize_doi(input: &str) -> String {
    let decoded = urlencoding::decode(input.trim())
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| input.trim().to_string());
    extract_doi(&decoded).unwrap_or(decoded)
}

/// Search extracted PDF text for the first valid DOI.
pub fn find_doi_in_text(text: &str) -> Option<String> {
    for re in TEXT_PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let candidate = trim_doi_punctuation(m.as_str());
                if is_valid_doi(candidate) {
                    return Some(candidate.to_string());
                }
            }
        }
    }
    None
}

// ============================================================================
// CrossRef
// ============================================================================

#[derive(Clone)]
pub struct CrossrefClient {
    http: reqwest::Client,
    base_url: String,
}

impl CrossrefClient {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("Papershelf/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: crate::config::trim_base_url(base_url),
        })
    }

    pub async fn fetch_metadata(&self, doi: &str) -> AppResult<DoiMetadata> {
        let doi = normalize_doi(doi);
        if !is_valid_doi(&doi) {
            return Err(AppError::Validation(format!("Invalid DOI format: {}", doi)));
        }

        let url = format!("{}/works/{}", self.base_url, doi);
        tracing::debug!(%doi, "Querying CrossRef");

        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("DOI {}", doi)));
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "CrossRef returned {} for {}",
                response.status(),
                doi
            )));
        }

        let json: Value = response.json().await?;
        let message = json
            .get("message")
            .ok_or_else(|| AppError::Upstream("CrossRef response has no message".to_string()))?;

        parse_work(&doi, message)
            .ok_or_else(|| AppError::Upstream(format!("CrossRef record for {} has no title", doi)))
    }
}

fn first_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|t| t.as_array())
        .and_then(|a| a.first())
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Map a CrossRef `message` object to paper metadata. Returns `None` when the
/// record has no title.
pub fn parse_work(doi: &str, message: &Value) -> Option<DoiMetadata> {
    let title = first_string(message, "title")?;

    let authors: Vec<String> = message
        .get("author")
        .and_then(|a| a.as_array())
        .map(|authors| {
            authors
                .iter()
                .filter_map(|a| {
                    let given = a.get("given").and_then(|g| g.as_str()).unwrap_or("");
                    let family = a.get("family").and_then(|f| f.as_str()).unwrap_or("");
                    let full = format!("{} {}", given, family).trim().to_string();
                    if full.is_empty() {
                        a.get("name").and_then(|n| n.as_str()).map(str::to_string)
                    } else {
                        Some(full)
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let date_parts: Vec<i64> = ["published", "published-print", "published-online", "issued"]
        .iter()
        .filter_map(|key| message.get(*key))
        .filter_map(|p| p.get("date-parts"))
        .filter_map(|d| d.as_array())
        .filter_map(|a| a.first())
        .filter_map(|a| a.as_array())
        .map(|parts| parts.iter().filter_map(|p| p.as_i64()).collect::<Vec<_>>())
        .find(|parts| !parts.is_empty())
        .unwrap_or_default();

    let year = date_parts.first().map(|y| *y as i32);
    let month = date_parts
        .get(1)
        .map(|m| *m as u32)
        .filter(|m| (1..=12).contains(m));
    let publication_date = year.map(|y| match (month, date_parts.get(2)) {
        (Some(m), Some(d)) => format!("{:04}-{:02}-{:02}", y, m, d),
        (Some(m), None) => format!("{:04}-{:02}", y, m),
        _ => format!("{:04}", y),
    });

    let abstract_text = message
        .get("abstract")
        .and_then(|a| a.as_str())
        .map(strip_markup)
        .filter(|a| !a.is_empty());

    let doi = message
        .get("DOI")
        .and_then(|d| d.as_str())
        .unwrap_or(doi)
        .to_string();
    let url = message
        .get("URL")
        .and_then(|u| u.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://doi.org/{}", doi));

    Some(DoiMetadata {
        title,
        authors: authors.join(", "),
        year,
        month,
        publication_date,
        journal: first_string(message, "container-title"),
        journal_short: first_string(message, "short-container-title"),
        abstract_text,
        doi,
        url,
    })
}

/// Drop JATS/HTML tags from an abstract and collapse whitespace.
fn strip_markup(text: &str) -> String {
    JATS_TAG
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
