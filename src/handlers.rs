//! HTTP route handlers for papers, tags, categories, collections and
//! settings.
//!
//! Notes, Zotero, LLM and navigation handlers live next to their services
//! in `notes`, `zotero`, `llm` and `navigation`.

use std::sync::Arc;

use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_COVER_BYTES, MAX_NOTE_IMAGE_BYTES, MAX_PDF_BYTES};
use crate::error::{AppError, AppResult};
use crate::library::{is_plain_filename, SavedImage, IMPORTED_IMAGES_DIR};
use crate::models::{
    ApiResponse, CategoryInput, CollectionInput, CollectionPapers, DoiMetadata, FavoriteUpdate,
    PaperInput, ReadingStatus, SearchQuery, Settings, SettingsUpdate, SettingsView, StatusUpdate,
    TagInput,
};
use crate::pdf::{self, ExtractedImage};
use crate::AppState;

/// Web prefix of the extraction scratch directory.
pub const EXTRACTED_IMAGES_URL: &str = "/api/extracted-images";

// ============================================================================
// Papers
// ============================================================================

pub async fn list_papers(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.list_paper_views()?))
}

pub async fn paper_stats(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.stats()?))
}

pub async fn search_papers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> AppResult<impl IntoResponse> {
    if query.q.trim().is_empty() {
        return Err(AppError::Validation("Search query is required".to_string()));
    }
    let views = state
        .store
        .search_papers(&query.q)?
        .into_iter()
        .map(|p| state.store.paper_view(p))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(ApiResponse::ok(views))
}

pub async fn get_paper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    Ok(ApiResponse::ok(state.store.paper_view(paper)?))
}

pub async fn create_paper(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PaperInput>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.create_paper(&input)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(state.store.paper_view(paper)?)))
}

pub async fn update_paper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(input): Json<PaperInput>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.update_paper(id, &input)?;
    Ok(ApiResponse::ok(state.store.paper_view(paper)?))
}

/// Delete the record, its links, and its folder (PDF, images, notes).
pub async fn delete_paper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.delete_paper(id)?;
    let library = state.library.clone();
    let removed = tokio::task::spawn_blocking(move || library.remove_folder(&paper)).await??;
    if removed {
        tracing::debug!(paper_id = id, "Removed paper folder");
    }
    Ok(ApiResponse::message("Paper deleted"))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<StatusUpdate>,
) -> AppResult<impl IntoResponse> {
    let status: ReadingStatus = body.reading_status.parse()?;
    Ok(ApiResponse::ok(state.store.set_reading_status(id, status)?))
}

pub async fn update_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<FavoriteUpdate>,
) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.set_favorite(id, body.is_favorite)?))
}

// ============================================================================
// DOI
// ============================================================================

/// The DOI captured by a `{*doi}` segment, in stored form.
fn decode_doi_param(raw: &str) -> AppResult<String> {
    let doi = crate::doi::normalize_doi(raw.trim_start_matches('/'));
    if doi.is_empty() {
        return Err(AppError::Validation("DOI is required".to_string()));
    }
    Ok(doi)
}

pub async fn doi_metadata(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doi = decode_doi_param(&raw)?;
    Ok(ApiResponse::ok(state.crossref.fetch_metadata(&doi).await?))
}

#[derive(Debug, Serialize)]
pub struct DoiCheck {
    pub doi: String,
    pub exists: bool,
    pub paper_id: Option<u64>,
}

pub async fn check_doi(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doi = decode_doi_param(&raw)?;
    let existing = state.store.find_by_doi(&doi)?;
    Ok(ApiResponse::ok(DoiCheck {
        exists: existing.is_some(),
        paper_id: existing.map(|p| p.id),
        doi,
    }))
}

// ============================================================================
// PDF Upload
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    Crossref,
    Pdf,
}

#[derive(Debug, Serialize)]
pub struct UploadedPdf {
    /// Name of the stored upload, passed back to `save-pdf-assets`.
    pub pdf_filename: String,
    pub original_filename: String,
    pub metadata: DoiMetadata,
    pub metadata_source: MetadataSource,
    pub extracted_doi: Option<String>,
    pub images: Vec<ExtractedImage>,
}

async fn read_field(field: Field<'_>, limit: usize, what: &str) -> AppResult<Vec<u8>> {
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {}: {}", what, e)))?;
    if bytes.len() > limit {
        return Err(AppError::Validation(format!(
            "{} exceeds the {} MB limit",
            what,
            limit / (1024 * 1024)
        )));
    }
    Ok(bytes.to_vec())
}

fn is_pdf(content_type: Option<&str>, filename: &str) -> bool {
    content_type == Some("application/pdf") || filename.to_lowercase().ends_with(".pdf")
}

/// Accept a PDF, pull out its text, DOI and images, and propose metadata:
/// CrossRef's when a DOI is found and resolves, otherwise what the text
/// gives.
pub async fn upload_pdf(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("pdf") {
            continue;
        }
        let filename = field.file_name().unwrap_or("document.pdf").to_string();
        if !is_pdf(field.content_type(), &filename) {
            return Err(AppError::Validation("Only PDF files are allowed".to_string()));
        }
        let bytes = read_field(field, MAX_PDF_BYTES, "PDF").await?;
        upload = Some((filename, bytes));
        break;
    }
    let (original_filename, bytes) =
        upload.ok_or_else(|| AppError::Validation("No PDF file uploaded".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("Uploaded PDF is empty".to_string()));
    }

    let library = state.library.clone();
    let original = original_filename.clone();
    let (pdf_filename, extraction) = tokio::task::spawn_blocking(move || {
        let extraction = pdf::analyze(&bytes, &library.extracted_dir(), EXTRACTED_IMAGES_URL)?;
        let name = library.save_upload(&original, &bytes)?;
        Ok::<_, AppError>((name, extraction))
    })
    .await??;

    tracing::info!(
        file = %pdf_filename,
        doi = ?extraction.doi,
        images = extraction.images.len(),
        "Processed uploaded PDF"
    );

    let text_metadata = || DoiMetadata {
        title: extraction.title_guess.clone().unwrap_or_default(),
        doi: extraction.doi.clone().unwrap_or_default(),
        ..Default::default()
    };
    let (metadata, metadata_source) = match &extraction.doi {
        Some(doi) => match state.crossref.fetch_metadata(doi).await {
            Ok(meta) => (meta, MetadataSource::Crossref),
            Err(e) => {
                tracing::warn!(%doi, error = %e, "CrossRef lookup failed, using PDF text");
                (text_metadata(), MetadataSource::Pdf)
            }
        },
        None => (text_metadata(), MetadataSource::Pdf),
    };

    Ok(ApiResponse::ok(UploadedPdf {
        pdf_filename,
        original_filename,
        metadata,
        metadata_source,
        extracted_doi: extraction.doi,
        images: extraction.images,
    }))
}

// ============================================================================
// Paper Assets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SavePdfAssetsRequest {
    #[serde(alias = "pdfFilename")]
    pub pdf_filename: String,
    #[serde(default, alias = "selectedImages")]
    pub selected_images: Vec<String>,
    #[serde(alias = "coverImage")]
    pub cover_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SavedAssets {
    pub folder_path: String,
    pub pdf_path: String,
    pub saved_images: Vec<String>,
    pub cover_image: Option<String>,
}

/// Move an uploaded PDF into the paper's folder, keep the chosen images and
/// set a cover: the one named, else one picked from the PDF.
pub async fn save_pdf_assets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<SavePdfAssetsRequest>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    let library = state.library.clone();

    let (folder, assets) = tokio::task::spawn_blocking(move || -> AppResult<(String, SavedAssets)> {
        let upload = library.upload_path(&body.pdf_filename)?;
        let bytes = std::fs::read(&upload)?;
        let (folder, _) = library.ensure_folder(&paper)?;

        let cover = match body.cover_image.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(name) => {
                if !is_plain_filename(name) {
                    return Err(AppError::Validation(format!("Invalid file name: {}", name)));
                }
                let source = library.extracted_dir().join(name);
                if !source.is_file() {
                    return Err(AppError::NotFound(format!("Image {}", name)));
                }
                library.store_pdf(&paper, &bytes)?;
                Some(library.cover_from_file(&paper, &source)?)
            }
            None => pdf::store_with_cover(&library, &paper, &bytes)?,
        };
        let saved_images = library.copy_extracted_images(&paper, &body.selected_images)?;

        let pdf_path = library
            .pdf_path(&paper)
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .map(|n| format!("{}/{}/{}", crate::config::LIBRARY_DIR, folder, n))
            .unwrap_or_default();

        if let Err(e) = std::fs::remove_file(&upload) {
            tracing::warn!(path = %upload.display(), error = %e, "Could not remove upload");
        }
        Ok((
            folder.clone(),
            SavedAssets {
                folder_path: folder,
                pdf_path,
                saved_images,
                cover_image: cover,
            },
        ))
    })
    .await??;

    let cover = assets.cover_image.clone();
    state.store.modify_paper(id, |p| {
        p.folder_path = Some(folder);
        if cover.is_some() {
            p.image = cover;
        }
    })?;
    Ok(ApiResponse::with_message(assets, "PDF assets saved"))
}

pub async fn serve_pdf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    let path = state
        .library
        .pdf_path(&paper)
        .ok_or_else(|| AppError::NotFound(format!("PDF of paper {}", id)))?;
    let bytes = tokio::fs::read(&path).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, "inline"),
        ],
        bytes,
    ))
}

fn image_extension(content_type: Option<&str>) -> Option<&'static str> {
    match content_type? {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
pub struct CoverUpload {
    pub image_path: String,
}

pub async fn upload_cover(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if !matches!(field.name(), Some("coverImage") | Some("cover_image")) {
            continue;
        }
        let ext = image_extension(field.content_type()).ok_or_else(|| {
            AppError::Validation("Only JPEG, PNG, GIF and WebP images are allowed".to_string())
        })?;
        upload = Some((ext, read_field(field, MAX_COVER_BYTES, "Image").await?));
        break;
    }
    let (ext, bytes) =
        upload.ok_or_else(|| AppError::Validation("No image file uploaded".to_string()))?;

    let library = state.library.clone();
    let target = paper.clone();
    let (folder, image_path) = tokio::task::spawn_blocking(move || -> AppResult<(String, String)> {
        let (folder, _) = library.ensure_folder(&target)?;
        Ok((folder, library.store_cover(&target, ext, &bytes)?))
    })
    .await??;

    let path = image_path.clone();
    state.store.modify_paper(paper.id, |p| {
        p.folder_path = Some(folder);
        p.image = Some(path);
    })?;
    tracing::info!(paper_id = paper.id, image = %image_path, "Stored cover image");
    Ok(ApiResponse::ok(CoverUpload { image_path }))
}

// ============================================================================
// Saved Images
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SavedImages {
    pub images: Vec<SavedImage>,
    pub total: usize,
}

pub async fn list_saved_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    let library = state.library.clone();
    let images = tokio::task::spawn_blocking(move || library.list_saved_images(&paper)).await??;
    Ok(ApiResponse::ok(SavedImages {
        total: images.len(),
        images,
    }))
}

pub async fn delete_saved_image(
    State(state): State<Arc<AppState>>,
    Path((id, filename)): Path<(u64, String)>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    let library = state.library.clone();
    tokio::task::spawn_blocking(move || library.delete_saved_image(&paper, &filename)).await??;
    Ok(ApiResponse::message("Image deleted"))
}

#[derive(Debug, Serialize)]
pub struct ImagePreview {
    pub new_images: Vec<ExtractedImage>,
    pub total_extracted: usize,
    pub new_count: usize,
}

/// Extract the images of a stored PDF into the scratch directory and list
/// the ones not yet saved for the paper.
pub async fn preview_extract_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    let library = state.library.clone();

    let preview = tokio::task::spawn_blocking(move || -> AppResult<ImagePreview> {
        let path = library
            .pdf_path(&paper)
            .ok_or_else(|| AppError::NotFound(format!("PDF of paper {}", paper.id)))?;
        let bytes = std::fs::read(path)?;
        let extracted = pdf::extract_images(&bytes, &library.extracted_dir(), EXTRACTED_IMAGES_URL)?;
        let saved: Vec<String> = library
            .list_saved_images(&paper)?
            .into_iter()
            .map(|i| i.filename)
            .collect();

        let total_extracted = extracted.len();
        let new_images: Vec<ExtractedImage> = extracted
            .into_iter()
            .filter(|i| !saved.contains(&i.filename))
            .collect();
        Ok(ImagePreview {
            new_count: new_images.len(),
            new_images,
            total_extracted,
        })
    })
    .await??;

    let message = format!("{} new images found", preview.new_count);
    Ok(ApiResponse::with_message(preview, message))
}

#[derive(Debug, Deserialize)]
pub struct ExtractImagesRequest {
    #[serde(alias = "filePath")]
    pub file_path: String,
}

/// Extract the images of a PDF still waiting in the uploads directory. Only
/// the file name of `file_path` is used.
pub async fn extract_upload_images(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExtractImagesRequest>,
) -> AppResult<impl IntoResponse> {
    let name = body
        .file_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(AppError::Validation("File path is required".to_string()));
    }
    let library = state.library.clone();
    let images = tokio::task::spawn_blocking(move || -> AppResult<Vec<ExtractedImage>> {
        let bytes = std::fs::read(library.upload_path(&name)?)?;
        pdf::extract_images(&bytes, &library.extracted_dir(), EXTRACTED_IMAGES_URL)
    })
    .await??;
    Ok(ApiResponse::ok(images))
}

#[derive(Debug, Deserialize)]
pub struct CopyImagesRequest {
    #[serde(alias = "selectedImages")]
    pub selected_images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CopiedImages {
    pub copied: Vec<String>,
    pub copied_count: usize,
    pub total_requested: usize,
}

pub async fn copy_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<CopyImagesRequest>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(id)?;
    if state.library.find_folder(&paper).is_none() {
        return Err(AppError::NotFound(format!("Folder of paper {}", id)));
    }
    let library = state.library.clone();
    let total_requested = body.selected_images.len();
    let copied = tokio::task::spawn_blocking(move || {
        library.copy_extracted_images(&paper, &body.selected_images)
    })
    .await??;

    let message = format!("{} image(s) copied to saved images", copied.len());
    Ok(ApiResponse::with_message(
        CopiedImages {
            copied_count: copied.len(),
            copied,
            total_requested,
        },
        message,
    ))
}

// ============================================================================
// Note Images
// ============================================================================

#[derive(Debug, Serialize)]
pub struct NoteImageUpload {
    pub filename: String,
    pub path: String,
    pub url: String,
    pub original_name: String,
    pub size: usize,
    pub mimetype: String,
}

/// Extension for a stored note image: the uploaded file's own when it is a
/// short alphanumeric one, otherwise the content type's subtype.
fn note_image_extension(original_name: &str, mimetype: &str) -> String {
    let sane = |ext: &str| {
        !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
    };
    if let Some(ext) = std::path::Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| sane(*e))
    {
        return ext.to_lowercase();
    }
    let subtype: String = mimetype
        .trim_start_matches("image/")
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    match subtype.as_str() {
        "jpeg" => "jpg".to_string(),
        s if sane(s) => s.to_string(),
        _ => "img".to_string(),
    }
}

fn note_image_content_type(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Store a picture pasted or dropped into a paper's notes. Expects an
/// `image` file field and an `articleId` text field naming the paper.
pub async fn upload_note_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut paper_id = None;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("articleId") | Some("paper_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid article id: {}", e)))?;
                let id = text.trim().parse::<u64>().map_err(|_| {
                    AppError::Validation(format!("Invalid article id: {}", text.trim()))
                })?;
                paper_id = Some(id);
            }
            Some("image") => {
                let mimetype = field.content_type().unwrap_or_default().to_string();
                if !mimetype.starts_with("image/") {
                    return Err(AppError::Validation(
                        "Only image files are allowed".to_string(),
                    ));
                }
                let original_name = field.file_name().unwrap_or("image").to_string();
                let bytes = read_field(field, MAX_NOTE_IMAGE_BYTES, "Image").await?;
                upload = Some((original_name, mimetype, bytes));
            }
            _ => {}
        }
    }
    let (original_name, mimetype, bytes) =
        upload.ok_or_else(|| AppError::Validation("No image file provided".to_string()))?;
    let paper_id =
        paper_id.ok_or_else(|| AppError::Validation("Article ID is required".to_string()))?;
    let paper = state.store.require_paper(paper_id)?;

    let extension = note_image_extension(&original_name, &mimetype);
    let size = bytes.len();
    let library = state.library.clone();
    let target = paper.clone();
    let (folder, filename) = tokio::task::spawn_blocking(move || -> AppResult<(String, String)> {
        let (folder, _) = library.ensure_folder(&target)?;
        Ok((folder, library.store_note_image(&target, &extension, &bytes)?))
    })
    .await??;

    if paper.folder_path.as_deref() != Some(folder.as_str()) {
        state.store.modify_paper(paper.id, |p| p.folder_path = Some(folder))?;
    }
    tracing::info!(paper_id, file = %filename, size, "Stored note image");
    Ok(ApiResponse::ok(NoteImageUpload {
        path: format!("{}/{}", IMPORTED_IMAGES_DIR, filename),
        url: format!("/api/image/{}/{}", paper_id, filename),
        filename,
        original_name,
        size,
        mimetype,
    }))
}

pub async fn serve_note_image(
    State(state): State<Arc<AppState>>,
    Path((paper_id, filename)): Path<(u64, String)>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(paper_id)?;
    let path = state.library.note_image_path(&paper, &filename)?;
    let bytes = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, note_image_content_type(&filename))], bytes))
}

pub async fn delete_note_image(
    State(state): State<Arc<AppState>>,
    Path((paper_id, filename)): Path<(u64, String)>,
) -> AppResult<impl IntoResponse> {
    let paper = state.store.require_paper(paper_id)?;
    let library = state.library.clone();
    tokio::task::spawn_blocking(move || library.delete_note_image(&paper, &filename)).await??;
    Ok(ApiResponse::message("Image deleted successfully"))
}

// ============================================================================
// Tags
// ============================================================================

pub async fn list_tags(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.list_tags()?))
}

pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    Json(input): Json<TagInput>,
) -> AppResult<impl IntoResponse> {
    let tag = state.store.create_tag(&input)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(tag)))
}

pub async fn update_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(input): Json<TagInput>,
) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.update_tag(id, &input)?))
}

pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    state.store.delete_tag(id)?;
    Ok(ApiResponse::message("Tag deleted"))
}

pub async fn link_tag(
    State(state): State<Arc<AppState>>,
    Path((tag_id, paper_id)): Path<(u64, u64)>,
) -> AppResult<impl IntoResponse> {
    state.store.link_tag(tag_id, paper_id)?;
    Ok(ApiResponse::message("Tag added to paper"))
}

pub async fn unlink_tag(
    State(state): State<Arc<AppState>>,
    Path((tag_id, paper_id)): Path<(u64, u64)>,
) -> AppResult<impl IntoResponse> {
    if !state.store.unlink_tag(tag_id, paper_id)? {
        return Err(AppError::NotFound(format!(
            "Tag {} on paper {}",
            tag_id, paper_id
        )));
    }
    Ok(ApiResponse::message("Tag removed from paper"))
}

pub async fn paper_tags(
    State(state): State<Arc<AppState>>,
    Path(paper_id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    state.store.require_paper(paper_id)?;
    Ok(ApiResponse::ok(state.store.tags_for_paper(paper_id)?))
}

// ============================================================================
// Categories
// ============================================================================

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.list_categories()?))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CategoryInput>,
) -> AppResult<impl IntoResponse> {
    let category = state.store.create_category(&input)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(category)))
}

pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    state.store.delete_category(id)?;
    Ok(ApiResponse::message("Category deleted"))
}

pub async fn category_papers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.papers_in_category(id)?))
}

pub async fn link_category(
    State(state): State<Arc<AppState>>,
    Path((paper_id, category_id)): Path<(u64, u64)>,
) -> AppResult<impl IntoResponse> {
    state.store.link_category(category_id, paper_id)?;
    Ok(ApiResponse::message("Paper added to category"))
}

pub async fn unlink_category(
    State(state): State<Arc<AppState>>,
    Path((paper_id, category_id)): Path<(u64, u64)>,
) -> AppResult<impl IntoResponse> {
    if !state.store.unlink_category(category_id, paper_id)? {
        return Err(AppError::NotFound(
            "Paper-Category relationship not found".to_string(),
        ));
    }
    Ok(ApiResponse::message("Paper removed from category"))
}

// ============================================================================
// Collections
// ============================================================================

pub async fn list_collections(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.list_collections()?))
}

pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CollectionInput>,
) -> AppResult<impl IntoResponse> {
    let collection = state
        .store
        .create_collection(input.name.as_deref(), &input.paper_ids)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(collection)))
}

pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.store.collection_detail(id)?))
}

pub async fn rename_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(input): Json<CollectionInput>,
) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::ok(
        state.store.rename_collection(id, input.name.as_deref())?,
    ))
}

pub async fn delete_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<impl IntoResponse> {
    state.store.delete_collection(id)?;
    Ok(ApiResponse::message("Collection deleted"))
}

#[derive(Debug, Serialize)]
pub struct AddedPapers {
    pub added: usize,
}

pub async fn add_collection_papers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<CollectionPapers>,
) -> AppResult<impl IntoResponse> {
    let added = state.store.add_to_collection(id, &body.paper_ids)?;
    Ok(ApiResponse::ok(AddedPapers { added }))
}

pub async fn remove_collection_paper(
    State(state): State<Arc<AppState>>,
    Path((id, paper_id)): Path<(u64, u64)>,
) -> AppResult<impl IntoResponse> {
    state.store.remove_from_collection(id, paper_id)?;
    Ok(ApiResponse::message("Paper removed from collection"))
}

// ============================================================================
// Settings
// ============================================================================

pub async fn get_settings(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let settings: Settings = state.store.settings()?;
    Ok(ApiResponse::ok(SettingsView::from(&settings)))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<impl IntoResponse> {
    let mut settings = state.store.settings()?;
    settings.apply(update)?;
    state.store.save_settings(&settings)?;
    Ok(ApiResponse::with_message(
        SettingsView::from(&settings),
        "Settings saved",
    ))
}

#[cfg(test)]
#[path = "handlers_test.rs"]
mod handlers_test;
