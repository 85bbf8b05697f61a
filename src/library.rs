//! On-disk paper library.
//!
//! Every paper owns a folder `<clean_title>_<id>` under the library root
//! holding its PDF, a `saved_images/` directory, an `imported_image/`
//! directory for pictures embedded in notes, an optional cover image and
//! `notes.json`. Paths handed to the client are web paths of the form
//! `MyPapers/<folder>/<file>`, served under `/api/MyPapers/`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::config::LIBRARY_DIR;
use crate::error::{AppError, AppResult};
use crate::models::Paper;

pub const SAVED_IMAGES_DIR: &str = "saved_images";
pub const EXTRACTED_IMAGES_DIR: &str = "extracted_images";
pub const IMPORTED_IMAGES_DIR: &str = "imported_image";
const MAX_CLEAN_TITLE: usize = 50;

/// Lowercased title with punctuation dropped and whitespace runs turned into
/// single underscores, cut to 50 characters.
pub fn clean_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    joined.to_lowercase().chars().take(MAX_CLEAN_TITLE).collect()
}

pub fn folder_name(title: &str, id: u64) -> String {
    let clean = clean_title(title);
    if clean.is_empty() {
        format!("paper_{}", id)
    } else {
        format!("{}_{}", clean, id)
    }
}

/// A file name is acceptable when it is a single path component.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Resolve `target` and make sure it stays inside `base`. Missing parents
/// of a new file are created first.
pub fn resolve_within(base: &Path, target: &Path) -> AppResult<PathBuf> {
    let canonical_base = fs::canonicalize(base)?;

    if target.exists() {
        let canonical = fs::canonicalize(target)?;
        if canonical.starts_with(&canonical_base) {
            Ok(canonical)
        } else {
            Err(AppError::Validation("Path escapes base directory".to_string()))
        }
    } else {
        let parent = target
            .parent()
            .ok_or_else(|| AppError::Validation("No parent directory".to_string()))?;
        fs::create_dir_all(parent)?;
        let canonical_parent = fs::canonicalize(parent)?;
        if canonical_parent.starts_with(&canonical_base) {
            Ok(target.to_path_buf())
        } else {
            Err(AppError::Validation("Path escapes base directory".to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedImage {
    pub filename: String,
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    uploads: PathBuf,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>, uploads: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            uploads: uploads.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    /// Scratch directory for images pulled out of uploaded PDFs.
    pub fn extracted_dir(&self) -> PathBuf {
        self.uploads.join(EXTRACTED_IMAGES_DIR)
    }

    pub fn ensure_dirs(&self) -> AppResult<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.extracted_dir())?;
        Ok(())
    }

    fn web_path(folder: &str, rel: &str) -> String {
        format!("{}/{}/{}", LIBRARY_DIR, folder, rel)
    }

    // ========================================================================
    // Paper Folders
    // ========================================================================

    /// Existing folder of a paper: the recorded one, otherwise any directory
    /// ending in `_<id>`.
    pub fn find_folder(&self, paper: &Paper) -> Option<PathBuf> {
        if let Some(name) = paper.folder_path.as_deref().filter(|n| is_plain_filename(n)) {
            let dir = self.root.join(name);
            if dir.is_dir() {
                return Some(dir);
            }
        }

        let suffix = format!("_{}", paper.id);
        fs::read_dir(&self.root)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.ends_with(&suffix))
                        .unwrap_or(false)
            })
    }

    /// The paper's folder, created when missing. Returns the folder name and
    /// its path.
    pub fn ensure_folder(&self, paper: &Paper) -> AppResult<(String, PathBuf)> {
        if let Some(dir) = self.find_folder(paper) {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| AppError::Internal("Folder name is not UTF-8".to_string()))?;
            return Ok((name, dir));
        }

        let name = folder_name(&paper.title, paper.id);
        let dir = self.root.join(&name);
        fs::create_dir_all(dir.join(SAVED_IMAGES_DIR))?;
        tracing::debug!(paper_id = paper.id, folder = %name, "Created paper folder");
        Ok((name, dir))
    }

    pub fn remove_folder(&self, paper: &Paper) -> AppResult<bool> {
        match self.find_folder(paper) {
            Some(dir) => {
                let dir = resolve_within(&self.root, &dir)?;
                fs::remove_dir_all(&dir)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // PDFs
    // ========================================================================

    fn pdf_filename(paper: &Paper) -> String {
        format!("{}.pdf", folder_name(&paper.title, paper.id))
    }

    /// The paper's PDF: the canonical file name first, else any `.pdf` in
    /// its folder.
    pub fn pdf_path(&self, paper: &Paper) -> Option<PathBuf> {
        let dir = self.find_folder(paper)?;
        let canonical = dir.join(Self::pdf_filename(paper));
        if canonical.is_file() {
            return Some(canonical);
        }
        fs::read_dir(&dir)
            .ok()?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .find(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("pdf"))
                        .unwrap_or(false)
            })
    }

    pub fn store_pdf(&self, paper: &Paper, bytes: &[u8]) -> AppResult<PathBuf> {
        let (_, dir) = self.ensure_folder(paper)?;
        let path = dir.join(Self::pdf_filename(paper));
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Write an uploaded file into the uploads directory under a
    /// timestamped name. Returns the stored file name.
    pub fn save_upload(&self, original_name: &str, bytes: &[u8]) -> AppResult<String> {
        fs::create_dir_all(&self.uploads)?;
        let stem = Path::new(original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(clean_title)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "upload".to_string());
        let name = format!("{}_{}.pdf", Utc::now().timestamp_millis(), stem);
        fs::write(self.uploads.join(&name), bytes)?;
        Ok(name)
    }

    pub fn upload_path(&self, name: &str) -> AppResult<PathBuf> {
        if !is_plain_filename(name) {
            return Err(AppError::Validation(format!("Invalid file name: {}", name)));
        }
        let path = self.uploads.join(name);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("Upload {}", name)));
        }
        Ok(path)
    }

    // ========================================================================
    // Images
    // ========================================================================

    pub fn list_saved_images(&self, paper: &Paper) -> AppResult<Vec<SavedImage>> {
        let Some(dir) = self.find_folder(paper) else {
            return Ok(Vec::new());
        };
        let folder = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let images_dir = dir.join(SAVED_IMAGES_DIR);
        if !images_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut images = Vec::new();
        for entry in fs::read_dir(&images_dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            images.push(SavedImage {
                url: Self::web_path(&folder, &format!("{}/{}", SAVED_IMAGES_DIR, filename)),
                filename,
                size: meta.len(),
            });
        }
        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(images)
    }

    pub fn delete_saved_image(&self, paper: &Paper, filename: &str) -> AppResult<()> {
        if !is_plain_filename(filename) {
            return Err(AppError::Validation(format!("Invalid file name: {}", filename)));
        }
        let dir = self
            .find_folder(paper)
            .ok_or_else(|| AppError::NotFound(format!("Folder of paper {}", paper.id)))?;
        let path = dir.join(SAVED_IMAGES_DIR).join(filename);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("Image {}", filename)));
        }
        fs::remove_file(resolve_within(&self.root, &path)?)?;
        Ok(())
    }

    /// Copy named images from the extraction scratch directory into the
    /// paper's `saved_images/`. Unknown names are skipped; returns the
    /// copied file names.
    pub fn copy_extracted_images(&self, paper: &Paper, filenames: &[String]) -> AppResult<Vec<String>> {
        let (_, dir) = self.ensure_folder(paper)?;
        let target_dir = dir.join(SAVED_IMAGES_DIR);
        fs::create_dir_all(&target_dir)?;
        let source_dir = self.extracted_dir();

        let mut copied = Vec::new();
        for name in filenames {
            if !is_plain_filename(name) {
                continue;
            }
            let source = source_dir.join(name);
            if !source.is_file() {
                tracing::debug!(file = %name, "Extracted image missing, skipping");
                continue;
            }
            fs::copy(&source, target_dir.join(name))?;
            copied.push(name.clone());
        }
        Ok(copied)
    }

    /// Store a picture embedded in the paper's notes under a random name.
    /// Returns the stored file name.
    pub fn store_note_image(&self, paper: &Paper, extension: &str, bytes: &[u8]) -> AppResult<String> {
        let (_, dir) = self.ensure_folder(paper)?;
        let images_dir = dir.join(IMPORTED_IMAGES_DIR);
        fs::create_dir_all(&images_dir)?;
        let name = format!(
            "{:032x}.{}",
            rand::random::<u128>(),
            extension.trim_start_matches('.')
        );
        fs::write(images_dir.join(&name), bytes)?;
        Ok(name)
    }

    pub fn note_image_path(&self, paper: &Paper, filename: &str) -> AppResult<PathBuf> {
        if !is_plain_filename(filename) {
            return Err(AppError::Validation(format!("Invalid file name: {}", filename)));
        }
        let dir = self
            .find_folder(paper)
            .ok_or_else(|| AppError::NotFound(format!("Folder of paper {}", paper.id)))?;
        let path = dir.join(IMPORTED_IMAGES_DIR).join(filename);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("Image {}", filename)));
        }
        resolve_within(&self.root, &path)
    }

    pub fn delete_note_image(&self, paper: &Paper, filename: &str) -> AppResult<()> {
        fs::remove_file(self.note_image_path(paper, filename)?)?;
        Ok(())
    }

    /// Store a cover image as `paper_Cover_<id>.<ext>`, replacing any
    /// previous cover. Returns the web path to record on the paper.
    pub fn store_cover(&self, paper: &Paper, extension: &str, bytes: &[u8]) -> AppResult<String> {
        let (folder, dir) = self.ensure_folder(paper)?;
        let prefix = format!("paper_Cover_{}.", paper.id);
        for entry in fs::read_dir(&dir)?.filter_map(Result::ok) {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())?;
            }
        }
        let name = format!("{}{}", prefix, extension.trim_start_matches('.'));
        fs::write(dir.join(&name), bytes)?;
        Ok(Self::web_path(&folder, &name))
    }

    /// Use an already extracted or saved image as the cover.
    pub fn cover_from_file(&self, paper: &Paper, source: &Path) -> AppResult<String> {
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_string();
        let bytes = fs::read(source)?;
        self.store_cover(paper, &extension, &bytes)
    }
}
