//! Block notes attached to papers.
//!
//! A paper's notes live in `notes.json` inside its library folder:
//! `{ "paperId", "blocks", "lastModified", "version" }`. Rich-text block
//! content is sanitized and block order re-indexed on every write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::autosave::NotesSink;
use crate::blocks::{Block, Document};
use crate::error::{AppError, AppResult};
use crate::library::Library;
use crate::models::ApiResponse;
use crate::store::Store;
use crate::AppState;

pub const NOTES_FILE: &str = "notes.json";
pub const NOTES_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesDocument {
    pub paper_id: u64,
    pub blocks: Vec<Block>,
    pub last_modified: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    NOTES_VERSION.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteSummary {
    pub paper_id: u64,
    pub title: String,
    pub block_count: usize,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SaveNotesRequest {
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Strip unsafe markup from rich-text blocks and renumber `order` 0..n.
pub fn sanitize_blocks(blocks: Vec<Block>) -> Vec<Block> {
    let mut blocks = blocks;
    for block in &mut blocks {
        block.content.map_rich_text(|html| ammonia::clean(html));
    }
    Document::from_blocks(blocks).into_blocks()
}

#[derive(Clone)]
pub struct NotesStore {
    store: Store,
    library: Library,
}

impl NotesStore {
    pub fn new(store: Store, library: Library) -> Self {
        Self { store, library }
    }

    fn notes_path(&self, paper_id: u64) -> AppResult<Option<PathBuf>> {
        let paper = self.store.require_paper(paper_id)?;
        Ok(self
            .library
            .find_folder(&paper)
            .map(|dir| dir.join(NOTES_FILE)))
    }

    /// Stored notes, or a document holding one empty text block when the
    /// paper has none yet.
    pub fn load(&self, paper_id: u64) -> AppResult<NotesDocument> {
        match self.notes_path(paper_id)? {
            Some(path) if path.is_file() => read_notes(&path),
            _ => Ok(NotesDocument {
                paper_id,
                blocks: Document::new().into_blocks(),
                last_modified: Utc::now(),
                version: default_version(),
            }),
        }
    }

    pub fn save(&self, paper_id: u64, blocks: Vec<Block>) -> AppResult<NotesDocument> {
        let paper = self.store.require_paper(paper_id)?;
        let (folder, dir) = self.library.ensure_folder(&paper)?;
        if paper.folder_path.as_deref() != Some(folder.as_str()) {
            self.store
                .modify_paper(paper_id, |p| p.folder_path = Some(folder.clone()))?;
        }

        let doc = NotesDocument {
            paper_id,
            blocks: sanitize_blocks(blocks),
            last_modified: Utc::now(),
            version: default_version(),
        };

        write_notes(&dir, &doc)?;

        tracing::debug!(paper_id, blocks = doc.blocks.len(), "Saved notes");
        Ok(doc)
    }

    pub fn delete(&self, paper_id: u64) -> AppResult<bool> {
        match self.notes_path(paper_id)? {
            Some(path) if path.is_file() => {
                fs::remove_file(path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Every paper that has a notes file, most recently edited first.
    pub fn list(&self) -> AppResult<Vec<NoteSummary>> {
        let mut summaries = Vec::new();
        if !self.library.root().is_dir() {
            return Ok(summaries);
        }

        for entry in WalkDir::new(self.library.root())
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == NOTES_FILE)
        {
            let doc = match read_notes(entry.path()) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable notes");
                    continue;
                }
            };
            // orphaned folders keep their notes but are not listed
            let Some(paper) = self.store.get_paper(doc.paper_id)? else {
                continue;
            };
            summaries.push(NoteSummary {
                paper_id: paper.id,
                title: paper.title,
                block_count: doc.blocks.len(),
                last_modified: doc.last_modified,
            });
        }

        summaries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(summaries)
    }
}

/// Write through a uniquely named temp file in the same directory, so
/// concurrent saves of one paper never share a partial file.
fn write_notes(dir: &Path, doc: &NotesDocument) -> AppResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, doc)?;
    tmp.flush()?;
    tmp.persist(dir.join(NOTES_FILE))
        .map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

fn read_notes(path: &Path) -> AppResult<NotesDocument> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl NotesSink for NotesStore {
    fn save(&self, paper_id: u64, blocks: Vec<Block>) -> AppResult<()> {
        NotesStore::save(self, paper_id, blocks).map(|_| ())
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_notes(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let notes = state.notes.clone();
    let summaries = tokio::task::spawn_blocking(move || notes.list()).await??;
    Ok(ApiResponse::ok(summaries))
}

pub async fn get_notes(
    State(state): State<Arc<AppState>>,
    UrlPath(paper_id): UrlPath<u64>,
) -> AppResult<impl IntoResponse> {
    let notes = state.notes.clone();
    let doc = tokio::task::spawn_blocking(move || notes.load(paper_id)).await??;
    Ok(ApiResponse::ok(doc))
}

pub async fn save_notes(
    State(state): State<Arc<AppState>>,
    UrlPath(paper_id): UrlPath<u64>,
    Json(body): Json<SaveNotesRequest>,
) -> AppResult<impl IntoResponse> {
    let notes = state.notes.clone();
    let doc = tokio::task::spawn_blocking(move || notes.save(paper_id, body.blocks)).await??;
    Ok(ApiResponse::with_message(doc, "Notes saved"))
}

/// Queue a snapshot for debounced saving. Rapid calls for the same paper
/// collapse into one write of the latest blocks.
pub async fn autosave_notes(
    State(state): State<Arc<AppState>>,
    UrlPath(paper_id): UrlPath<u64>,
    Json(body): Json<SaveNotesRequest>,
) -> AppResult<impl IntoResponse> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.require_paper(paper_id)).await??;
    state.autosaver.schedule(paper_id, body.blocks);
    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::message("Autosave scheduled"),
    ))
}

pub async fn delete_notes(
    State(state): State<Arc<AppState>>,
    UrlPath(paper_id): UrlPath<u64>,
) -> AppResult<impl IntoResponse> {
    let notes = state.notes.clone();
    let removed = tokio::task::spawn_blocking(move || notes.delete(paper_id)).await??;
    if !removed {
        return Err(AppError::NotFound(format!("Notes for paper {}", paper_id)));
    }
    Ok(ApiResponse::message("Notes deleted"))
}
