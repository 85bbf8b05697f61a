//! Papershelf - a personal research-paper manager.
//!
//! The crate is the HTTP backend (papers, tags, collections, notes, DOI and
//! Zotero lookups, PDF extraction, LLM calls) plus the block-document engine
//! the note editor drives.
//!
//! - `models`: records, request bodies and response views
//! - `store`: sled persistence
//! - `library`: per-paper folders on disk
//! - `blocks`, `slash`, `editor`, `autosave`: the note editor
//! - `notes`: notes persistence and handlers
//! - `doi`, `zotero`, `pdf`, `llm`: external services
//! - `navigation`: browser routes and page state
//! - `handlers`: paper, tag, collection and settings endpoints

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod autosave;
pub mod blocks;
pub mod config;
pub mod doi;
pub mod editor;
pub mod error;
pub mod handlers;
pub mod library;
pub mod llm;
pub mod models;
pub mod navigation;
pub mod notes;
pub mod pdf;
pub mod slash;
pub mod store;
pub mod url_validator;
pub mod zotero;

use crate::autosave::Autosaver;
use crate::config::{AppConfig, MAX_COVER_BYTES, MAX_NOTE_IMAGE_BYTES, MAX_PDF_BYTES};
use crate::doi::CrossrefClient;
use crate::error::AppResult;
use crate::library::Library;
use crate::llm::LlmClient;
use crate::notes::NotesStore;
use crate::store::Store;
use crate::zotero::ZoteroClient;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub library: Library,
    pub notes: NotesStore,
    pub crossref: CrossrefClient,
    pub zotero: ZoteroClient,
    pub llm: LlmClient,
    pub autosaver: Autosaver,
}

impl AppState {
    /// Open the database and library directories named by `config` and
    /// build the outbound clients.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let store = Store::open(&config.db_path)?;
        let library = Library::new(&config.library_dir, &config.uploads_dir);
        library.ensure_dirs()?;

        let notes = NotesStore::new(store.clone(), library.clone());
        let autosaver = Autosaver::new(Arc::new(notes.clone()), config.autosave_debounce);

        Ok(Self {
            crossref: CrossrefClient::new(&config.crossref_url)?,
            zotero: ZoteroClient::new(&config.zotero_url)?,
            llm: LlmClient::new(&config.ollama_url, &config.groq_url)?,
            store,
            library,
            notes,
            autosaver,
            config,
        })
    }

    /// Write pending autosaves and flush the database.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.autosaver.flush().await;
        self.store.flush().await
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: Arc<AppState>) -> Router {
    let papers_dir = ServeDir::new(&state.config.library_dir);
    let extracted_dir = ServeDir::new(state.library.extracted_dir());
    let assets_dir = ServeDir::new(state.config.frontend_dir.join("assets"));

    Router::new()
        // Papers
        .route(
            "/api/papers",
            get(handlers::list_papers).post(handlers::create_paper),
        )
        .route("/api/papers/stats", get(handlers::paper_stats))
        .route("/api/papers/search", get(handlers::search_papers))
        .route("/api/papers/doi/{*doi}", get(handlers::doi_metadata))
        .route("/api/papers/check-doi/{*doi}", get(handlers::check_doi))
        .route(
            "/api/papers/upload-pdf",
            post(handlers::upload_pdf)
                .layer(DefaultBodyLimit::max(MAX_PDF_BYTES + MULTIPART_OVERHEAD)),
        )
        .route(
            "/api/papers/extract-images",
            post(handlers::extract_upload_images),
        )
        .route(
            "/api/papers/{id}",
            get(handlers::get_paper)
                .put(handlers::update_paper)
                .delete(handlers::delete_paper),
        )
        .route("/api/papers/{id}/status", patch(handlers::update_status))
        .route("/api/papers/{id}/favorite", patch(handlers::update_favorite))
        .route(
            "/api/papers/{id}/save-pdf-assets",
            post(handlers::save_pdf_assets),
        )
        .route("/api/papers/{id}/pdf", get(handlers::serve_pdf))
        .route(
            "/api/papers/{id}/cover-image",
            post(handlers::upload_cover)
                .layer(DefaultBodyLimit::max(MAX_COVER_BYTES + MULTIPART_OVERHEAD)),
        )
        .route(
            "/api/papers/{id}/saved-images",
            get(handlers::list_saved_images),
        )
        .route(
            "/api/papers/{id}/saved-images/{filename}",
            axum::routing::delete(handlers::delete_saved_image),
        )
        .route(
            "/api/papers/{id}/preview-extract-images",
            post(handlers::preview_extract_images),
        )
        .route("/api/papers/{id}/copy-images", post(handlers::copy_images))
        .route(
            "/api/papers/{id}/categories/{category_id}",
            post(handlers::link_category).delete(handlers::unlink_category),
        )
        // Note images
        .route(
            "/api/upload-image",
            post(handlers::upload_note_image)
                .layer(DefaultBodyLimit::max(MAX_NOTE_IMAGE_BYTES + MULTIPART_OVERHEAD)),
        )
        .route(
            "/api/image/{paper_id}/{filename}",
            get(handlers::serve_note_image).delete(handlers::delete_note_image),
        )
        // Tags
        .route(
            "/api/tags",
            get(handlers::list_tags).post(handlers::create_tag),
        )
        .route("/api/tags/papers/{paper_id}", get(handlers::paper_tags))
        .route(
            "/api/tags/{id}",
            axum::routing::put(handlers::update_tag).delete(handlers::delete_tag),
        )
        .route(
            "/api/tags/{id}/papers/{paper_id}",
            post(handlers::link_tag).delete(handlers::unlink_tag),
        )
        // Categories
        .route(
            "/api/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route(
            "/api/categories/{id}",
            axum::routing::delete(handlers::delete_category),
        )
        .route(
            "/api/categories/{id}/papers",
            get(handlers::category_papers),
        )
        // Collections
        .route(
            "/api/collections",
            get(handlers::list_collections).post(handlers::create_collection),
        )
        .route(
            "/api/collections/{id}",
            get(handlers::get_collection)
                .put(handlers::rename_collection)
                .delete(handlers::delete_collection),
        )
        .route(
            "/api/collections/{id}/papers",
            post(handlers::add_collection_papers),
        )
        .route(
            "/api/collections/{id}/papers/{paper_id}",
            axum::routing::delete(handlers::remove_collection_paper),
        )
        // Notes
        .route("/api/notes", get(notes::list_notes))
        .route(
            "/api/notes/{paper_id}",
            get(notes::get_notes)
                .post(notes::save_notes)
                .delete(notes::delete_notes),
        )
        .route(
            "/api/notes/{paper_id}/autosave",
            post(notes::autosave_notes),
        )
        // Zotero
        .route("/api/zotero/test", post(zotero::test_connection))
        .route(
            "/api/zotero/config",
            get(zotero::get_config)
                .post(zotero::save_config)
                .delete(zotero::delete_config),
        )
        .route("/api/zotero/items", get(zotero::list_items))
        .route("/api/zotero/collections", get(zotero::list_collections))
        .route("/api/zotero/import", post(zotero::import))
        // Settings and LLM
        .route(
            "/api/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route("/api/ollama/status", get(llm::ollama_status))
        .route("/api/ollama/models/installed", get(llm::installed_models))
        .route("/api/ollama/test", post(llm::test_ollama))
        .route("/api/groq/test", post(llm::test_groq))
        .route("/api/chat", post(llm::chat))
        .route("/api/pdf/extract", post(llm::extract_paper_text))
        // Navigation
        .route("/api/navigation", get(navigation::resolve))
        // Static files
        .nest_service("/api/MyPapers", papers_dir)
        .nest_service("/api/extracted-images", extracted_dir)
        .nest_service("/assets", assets_dir)
        .fallback(navigation::spa_shell)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
