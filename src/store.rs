//! Persistent storage for papers, tags, categories, collections and
//! configuration.
//!
//! Everything lives in one sled database. Records are JSON values keyed by
//! big-endian ids, so tree iteration follows creation order. Uniqueness of
//! DOIs, Zotero keys and tag, category and collection names is enforced by
//! index trees claimed with compare-and-swap, and many-to-many links are kept
//! in both directions as `(a, b)` pair keys with empty values.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};

use crate::error::{AppError, AppResult};
use crate::models::{
    is_valid_color, Category, CategoryInput, Collection, CollectionDetail, CollectionSummary, Paper, PaperInput,
    PaperStats, PaperView, ReadingStatus, Settings, Tag, TagInput, TagWithCount, ZoteroConfig,
    DEFAULT_TAG_COLOR, MAX_CATEGORY_NAME,
};

const ZOTERO_CONFIG_KEY: &[u8] = b"zotero_config";
const SETTINGS_KEY: &[u8] = b"settings";

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

fn second_id(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(8..16)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn decode_id(value: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn put_json<T: Serialize>(tree: &Tree, key: impl AsRef<[u8]>, value: &T) -> AppResult<()> {
    tree.insert(key.as_ref(), serde_json::to_vec(value)?)?;
    Ok(())
}

fn get_json<T: DeserializeOwned>(tree: &Tree, key: impl AsRef<[u8]>) -> AppResult<Option<T>> {
    match tree.get(key.as_ref())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn all_json<T: DeserializeOwned>(tree: &Tree) -> AppResult<Vec<T>> {
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_, bytes) = item?;
        out.push(serde_json::from_slice(&bytes)?);
    }
    Ok(out)
}

/// Index keys for case-insensitive name uniqueness.
fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Clone)]
pub struct Store {
    db: Db,
    papers: Tree,
    doi_index: Tree,
    zotero_index: Tree,
    tags: Tree,
    tag_names: Tree,
    paper_tags: Tree,
    tag_papers: Tree,
    categories: Tree,
    category_names: Tree,
    paper_categories: Tree,
    category_papers: Tree,
    collections: Tree,
    collection_names: Tree,
    collection_papers: Tree,
    paper_collections: Tree,
    meta: Tree,
}

impl Store {
    pub fn open(path: &Path) -> AppResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> AppResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> AppResult<Self> {
        Ok(Self {
            papers: db.open_tree("papers")?,
            doi_index: db.open_tree("papers_by_doi")?,
            zotero_index: db.open_tree("papers_by_zotero_key")?,
            tags: db.open_tree("tags")?,
            tag_names: db.open_tree("tags_by_name")?,
            paper_tags: db.open_tree("paper_tags")?,
            tag_papers: db.open_tree("tag_papers")?,
            categories: db.open_tree("categories")?,
            category_names: db.open_tree("categories_by_name")?,
            paper_categories: db.open_tree("paper_categories")?,
            category_papers: db.open_tree("category_papers")?,
            collections: db.open_tree("collections")?,
            collection_names: db.open_tree("collections_by_name")?,
            collection_papers: db.open_tree("collection_papers")?,
            paper_collections: db.open_tree("paper_collections")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    pub async fn flush(&self) -> AppResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Ids start at 1 so they never collide with a zero default on the client.
    fn next_id(&self) -> AppResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    /// Atomically claim `key` in a uniqueness index for `id`. Returns false
    /// when another record already holds it.
    fn claim(index: &Tree, key: &str, id: u64) -> AppResult<bool> {
        let id_bytes = id_key(id);
        let result = index.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(&id_bytes[..]),
        )?;
        match result {
            Ok(()) => Ok(true),
            Err(existing) => Ok(existing.current.as_deref().and_then(decode_id) == Some(id)),
        }
    }

    /// Release `key` only if `id` still holds it.
    fn release(index: &Tree, key: &str, id: u64) -> AppResult<()> {
        let id_bytes = id_key(id);
        let _ = index.compare_and_swap(
            key.as_bytes(),
            Some(&id_bytes[..]),
            None as Option<&[u8]>,
        )?;
        Ok(())
    }

    // ========================================================================
    // Papers
    // ========================================================================

    pub fn get_paper(&self, id: u64) -> AppResult<Option<Paper>> {
        get_json(&self.papers, id_key(id))
    }

    pub fn require_paper(&self, id: u64) -> AppResult<Paper> {
        self.get_paper(id)?
            .ok_or_else(|| AppError::NotFound(format!("Paper {}", id)))
    }

    /// All papers, newest first.
    pub fn list_papers(&self) -> AppResult<Vec<Paper>> {
        let mut papers: Vec<Paper> = all_json(&self.papers)?;
        papers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(papers)
    }

    pub fn paper_view(&self, paper: Paper) -> AppResult<PaperView> {
        let tags = self.tags_for_paper(paper.id)?;
        let categories = self.categories_for_paper(paper.id)?;
        let collections = self.linked_ids(&self.paper_collections, paper.id)?;
        Ok(PaperView {
            paper,
            tags,
            categories,
            collections,
        })
    }

    pub fn list_paper_views(&self) -> AppResult<Vec<PaperView>> {
        self.list_papers()?
            .into_iter()
            .map(|p| self.paper_view(p))
            .collect()
    }

    pub fn search_papers(&self, query: &str) -> AppResult<Vec<Paper>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.list_papers();
        }
        Ok(self
            .list_papers()?
            .into_iter()
            .filter(|p| p.matches(&needle))
            .collect())
    }

    pub fn find_by_doi(&self, doi: &str) -> AppResult<Option<Paper>> {
        match self.doi_index.get(name_key(doi).as_bytes())? {
            Some(bytes) => match decode_id(&bytes) {
                Some(id) => self.get_paper(id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn find_by_zotero_key(&self, key: &str) -> AppResult<Option<Paper>> {
        match self.zotero_index.get(key.as_bytes())? {
            Some(bytes) => match decode_id(&bytes) {
                Some(id) => self.get_paper(id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Validate and insert a new paper, creating any named tags and
    /// categories.
    pub fn create_paper(&self, input: &PaperInput) -> AppResult<Paper> {
        let id = self.next_id()?;
        let paper = Paper::from_input(id, input)?;
        paper.validate()?;

        if let Some(doi) = &paper.doi {
            if !Self::claim(&self.doi_index, &name_key(doi), id)? {
                return Err(AppError::Conflict(
                    "A paper with this DOI already exists".to_string(),
                ));
            }
        }
        if let Some(key) = &paper.zotero_key {
            if !Self::claim(&self.zotero_index, key, id)? {
                if let Some(doi) = &paper.doi {
                    Self::release(&self.doi_index, &name_key(doi), id)?;
                }
                return Err(AppError::Conflict(format!(
                    "Zotero item {} is already imported",
                    key
                )));
            }
        }

        put_json(&self.papers, id_key(id), &paper)?;

        for name in &input.tags {
            if name.trim().is_empty() {
                continue;
            }
            let tag = self.get_or_create_tag(name)?;
            self.link_tag(tag.id, id)?;
        }
        for name in &input.categories {
            if name.trim().is_empty() {
                continue;
            }
            let category = self.get_or_create_category(name)?;
            self.link_category(category.id, id)?;
        }

        tracing::info!(paper_id = id, title = %paper.title, "Created paper");
        Ok(paper)
    }

    /// Merge `input` over the stored paper. Changing the DOI re-checks
    /// uniqueness; `tags` and `categories`, when non-empty, replace the
    /// paper's current set.
    pub fn update_paper(&self, id: u64, input: &PaperInput) -> AppResult<Paper> {
        let mut paper = self.require_paper(id)?;
        let old_doi = paper.doi.clone();
        paper.apply(input)?;
        paper.validate()?;

        if paper.doi != old_doi {
            if let Some(doi) = &paper.doi {
                if !Self::claim(&self.doi_index, &name_key(doi), id)? {
                    return Err(AppError::Conflict(
                        "A paper with this DOI already exists".to_string(),
                    ));
                }
            }
            if let Some(doi) = &old_doi {
                Self::release(&self.doi_index, &name_key(doi), id)?;
            }
        }

        put_json(&self.papers, id_key(id), &paper)?;

        if !input.tags.is_empty() {
            let wanted: Vec<u64> = input
                .tags
                .iter()
                .filter(|n| !n.trim().is_empty())
                .map(|n| self.get_or_create_tag(n).map(|t| t.id))
                .collect::<AppResult<_>>()?;
            for tag_id in self.linked_ids(&self.paper_tags, id)? {
                if !wanted.contains(&tag_id) {
                    self.unlink_tag(tag_id, id)?;
                }
            }
            for tag_id in wanted {
                self.link_tag(tag_id, id)?;
            }
        }
        if !input.categories.is_empty() {
            let wanted: Vec<u64> = input
                .categories
                .iter()
                .filter(|n| !n.trim().is_empty())
                .map(|n| self.get_or_create_category(n).map(|c| c.id))
                .collect::<AppResult<_>>()?;
            for category_id in self.linked_ids(&self.paper_categories, id)? {
                if !wanted.contains(&category_id) {
                    self.unlink_category(category_id, id)?;
                }
            }
            for category_id in wanted {
                self.link_category(category_id, id)?;
            }
        }

        Ok(paper)
    }

    /// Apply a closure to a stored paper and write it back.
    pub fn modify_paper<F>(&self, id: u64, f: F) -> AppResult<Paper>
    where
        F: FnOnce(&mut Paper),
    {
        let mut paper = self.require_paper(id)?;
        f(&mut paper);
        paper.updated_at = Utc::now();
        put_json(&self.papers, id_key(id), &paper)?;
        Ok(paper)
    }

    pub fn set_reading_status(&self, id: u64, status: ReadingStatus) -> AppResult<Paper> {
        self.modify_paper(id, |p| p.reading_status = status)
    }

    pub fn set_favorite(&self, id: u64, favorite: bool) -> AppResult<Paper> {
        self.modify_paper(id, |p| p.is_favorite = favorite)
    }

    /// Remove a paper and every link that points at it.
    pub fn delete_paper(&self, id: u64) -> AppResult<Paper> {
        let paper = self.require_paper(id)?;

        for tag_id in self.linked_ids(&self.paper_tags, id)? {
            self.unlink_tag(tag_id, id)?;
        }
        for category_id in self.linked_ids(&self.paper_categories, id)? {
            self.unlink_category(category_id, id)?;
        }
        for collection_id in self.linked_ids(&self.paper_collections, id)? {
            self.collection_papers.remove(pair_key(collection_id, id))?;
            self.paper_collections.remove(pair_key(id, collection_id))?;
        }
        if let Some(doi) = &paper.doi {
            Self::release(&self.doi_index, &name_key(doi), id)?;
        }
        if let Some(key) = &paper.zotero_key {
            Self::release(&self.zotero_index, key, id)?;
        }
        self.papers.remove(id_key(id))?;

        tracing::info!(paper_id = id, "Deleted paper");
        Ok(paper)
    }

    pub fn stats(&self) -> AppResult<PaperStats> {
        let mut stats = PaperStats::default();
        for paper in all_json::<Paper>(&self.papers)? {
            stats.total += 1;
            match paper.reading_status {
                ReadingStatus::Unread => stats.unread += 1,
                ReadingStatus::Reading => stats.reading += 1,
                ReadingStatus::Read => stats.read += 1,
            }
            if paper.is_favorite {
                stats.favorite += 1;
            }
        }
        Ok(stats)
    }

    fn linked_ids(&self, tree: &Tree, owner: u64) -> AppResult<Vec<u64>> {
        let mut ids = Vec::new();
        for item in tree.scan_prefix(id_key(owner)) {
            let (key, _) = item?;
            if let Some(id) = second_id(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn get_tag(&self, id: u64) -> AppResult<Option<Tag>> {
        get_json(&self.tags, id_key(id))
    }

    pub fn require_tag(&self, id: u64) -> AppResult<Tag> {
        self.get_tag(id)?
            .ok_or_else(|| AppError::NotFound(format!("Tag {}", id)))
    }

    pub fn find_tag_by_name(&self, name: &str) -> AppResult<Option<Tag>> {
        match self.tag_names.get(name_key(name).as_bytes())? {
            Some(bytes) => match decode_id(&bytes) {
                Some(id) => self.get_tag(id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Tags ordered by name, each with the number of linked papers.
    pub fn list_tags(&self) -> AppResult<Vec<TagWithCount>> {
        let mut tags: Vec<TagWithCount> = all_json::<Tag>(&self.tags)?
            .into_iter()
            .map(|tag| {
                let paper_count = self.tag_papers.scan_prefix(id_key(tag.id)).count();
                TagWithCount { tag, paper_count }
            })
            .collect();
        tags.sort_by(|a, b| a.tag.name.to_lowercase().cmp(&b.tag.name.to_lowercase()));
        Ok(tags)
    }

    pub fn create_tag(&self, input: &TagInput) -> AppResult<Tag> {
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::Validation("Tag name is required".to_string()))?;
        let color = match input.color.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) if is_valid_color(c) => c.to_string(),
            Some(c) => return Err(AppError::Validation(format!("Invalid color: {}", c))),
            None => DEFAULT_TAG_COLOR.to_string(),
        };

        let id = self.next_id()?;
        if !Self::claim(&self.tag_names, &name_key(name), id)? {
            return Err(AppError::Conflict(format!("Tag '{}' already exists", name)));
        }

        let tag = Tag {
            id,
            name: name.to_string(),
            color,
            created_at: Utc::now(),
        };
        put_json(&self.tags, id_key(id), &tag)?;
        Ok(tag)
    }

    /// Case-insensitive lookup, creating the tag with the default color when
    /// it does not exist yet.
    pub fn get_or_create_tag(&self, name: &str) -> AppResult<Tag> {
        if let Some(tag) = self.find_tag_by_name(name)? {
            return Ok(tag);
        }
        match self.create_tag(&TagInput {
            name: Some(name.to_string()),
            color: None,
        }) {
            Ok(tag) => Ok(tag),
            // created concurrently between the lookup and the claim
            Err(AppError::Conflict(_)) => self
                .find_tag_by_name(name)?
                .ok_or_else(|| AppError::Internal(format!("Tag '{}' vanished", name))),
            Err(e) => Err(e),
        }
    }

    pub fn update_tag(&self, id: u64, input: &TagInput) -> AppResult<Tag> {
        let mut tag = self.require_tag(id)?;

        if let Some(name) = input.name.as_deref().map(str::trim) {
            if name.is_empty() {
                return Err(AppError::Validation("Tag name is required".to_string()));
            }
            if name_key(name) != name_key(&tag.name) {
                if !Self::claim(&self.tag_names, &name_key(name), id)? {
                    return Err(AppError::Conflict(format!("Tag '{}' already exists", name)));
                }
                Self::release(&self.tag_names, &name_key(&tag.name), id)?;
            }
            tag.name = name.to_string();
        }
        if let Some(color) = input.color.as_deref().map(str::trim) {
            if !is_valid_color(color) {
                return Err(AppError::Validation(format!("Invalid color: {}", color)));
            }
            tag.color = color.to_string();
        }

        put_json(&self.tags, id_key(id), &tag)?;
        Ok(tag)
    }

    pub fn delete_tag(&self, id: u64) -> AppResult<Tag> {
        let tag = self.require_tag(id)?;
        for paper_id in self.linked_ids(&self.tag_papers, id)? {
            self.unlink_tag(id, paper_id)?;
        }
        Self::release(&self.tag_names, &name_key(&tag.name), id)?;
        self.tags.remove(id_key(id))?;
        Ok(tag)
    }

    /// Idempotent: linking twice leaves a single link.
    pub fn link_tag(&self, tag_id: u64, paper_id: u64) -> AppResult<()> {
        self.require_tag(tag_id)?;
        self.require_paper(paper_id)?;
        self.tag_papers.insert(pair_key(tag_id, paper_id), &[] as &[u8])?;
        self.paper_tags.insert(pair_key(paper_id, tag_id), &[] as &[u8])?;
        Ok(())
    }

    /// Returns whether a link existed.
    pub fn unlink_tag(&self, tag_id: u64, paper_id: u64) -> AppResult<bool> {
        let existed = self.tag_papers.remove(pair_key(tag_id, paper_id))?.is_some();
        self.paper_tags.remove(pair_key(paper_id, tag_id))?;
        Ok(existed)
    }

    pub fn tags_for_paper(&self, paper_id: u64) -> AppResult<Vec<Tag>> {
        let mut tags = Vec::new();
        for tag_id in self.linked_ids(&self.paper_tags, paper_id)? {
            if let Some(tag) = self.get_tag(tag_id)? {
                tags.push(tag);
            }
        }
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(tags)
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub fn get_category(&self, id: u64) -> AppResult<Option<Category>> {
        get_json(&self.categories, id_key(id))
    }

    pub fn require_category(&self, id: u64) -> AppResult<Category> {
        self.get_category(id)?
            .ok_or_else(|| AppError::NotFound("Category not found".to_string()))
    }

    pub fn find_category_by_name(&self, name: &str) -> AppResult<Option<Category>> {
        match self.category_names.get(name_key(name).as_bytes())? {
            Some(bytes) => match decode_id(&bytes) {
                Some(id) => self.get_category(id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn list_categories(&self) -> AppResult<Vec<Category>> {
        let mut categories: Vec<Category> = all_json(&self.categories)?;
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(categories)
    }

    pub fn create_category(&self, input: &CategoryInput) -> AppResult<Category> {
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::Validation("Category name is required".to_string()))?;
        if name.chars().count() > MAX_CATEGORY_NAME {
            return Err(AppError::Validation(format!(
                "Category name must be at most {} characters",
                MAX_CATEGORY_NAME
            )));
        }

        let id = self.next_id()?;
        if !Self::claim(&self.category_names, &name_key(name), id)? {
            return Err(AppError::Conflict(format!(
                "Category '{}' already exists",
                name
            )));
        }

        let category = Category {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        put_json(&self.categories, id_key(id), &category)?;
        tracing::info!(category_id = id, name = %category.name, "Created category");
        Ok(category)
    }

    pub fn get_or_create_category(&self, name: &str) -> AppResult<Category> {
        if let Some(category) = self.find_category_by_name(name)? {
            return Ok(category);
        }
        match self.create_category(&CategoryInput {
            name: Some(name.to_string()),
        }) {
            Ok(category) => Ok(category),
            Err(AppError::Conflict(_)) => self
                .find_category_by_name(name)?
                .ok_or_else(|| AppError::Internal(format!("Category '{}' vanished", name))),
            Err(e) => Err(e),
        }
    }

    pub fn delete_category(&self, id: u64) -> AppResult<Category> {
        let category = self.require_category(id)?;
        for paper_id in self.linked_ids(&self.category_papers, id)? {
            self.unlink_category(id, paper_id)?;
        }
        Self::release(&self.category_names, &name_key(&category.name), id)?;
        self.categories.remove(id_key(id))?;
        Ok(category)
    }

    /// Papers in a category, newest first.
    pub fn papers_in_category(&self, id: u64) -> AppResult<Vec<Paper>> {
        self.require_category(id)?;
        let mut papers = Vec::new();
        for paper_id in self.linked_ids(&self.category_papers, id)? {
            if let Some(paper) = self.get_paper(paper_id)? {
                papers.push(paper);
            }
        }
        papers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(papers)
    }

    /// Idempotent: linking twice leaves a single link.
    pub fn link_category(&self, category_id: u64, paper_id: u64) -> AppResult<()> {
        self.require_category(category_id)?;
        self.require_paper(paper_id)?;
        self.category_papers
            .insert(pair_key(category_id, paper_id), &[] as &[u8])?;
        self.paper_categories
            .insert(pair_key(paper_id, category_id), &[] as &[u8])?;
        Ok(())
    }

    /// Returns whether a link existed.
    pub fn unlink_category(&self, category_id: u64, paper_id: u64) -> AppResult<bool> {
        let existed = self
            .category_papers
            .remove(pair_key(category_id, paper_id))?
            .is_some();
        self.paper_categories.remove(pair_key(paper_id, category_id))?;
        Ok(existed)
    }

    pub fn categories_for_paper(&self, paper_id: u64) -> AppResult<Vec<Category>> {
        let mut categories = Vec::new();
        for category_id in self.linked_ids(&self.paper_categories, paper_id)? {
            if let Some(category) = self.get_category(category_id)? {
                categories.push(category);
            }
        }
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(categories)
    }

    // ========================================================================
    // Collections
    // ========================================================================

    pub fn get_collection(&self, id: u64) -> AppResult<Option<Collection>> {
        get_json(&self.collections, id_key(id))
    }

    pub fn require_collection(&self, id: u64) -> AppResult<Collection> {
        self.get_collection(id)?
            .ok_or_else(|| AppError::NotFound(format!("Collection {}", id)))
    }

    pub fn list_collections(&self) -> AppResult<Vec<CollectionSummary>> {
        let mut out: Vec<CollectionSummary> = all_json::<Collection>(&self.collections)?
            .into_iter()
            .map(|collection| {
                let count = self
                    .collection_papers
                    .scan_prefix(id_key(collection.id))
                    .count();
                CollectionSummary { collection, count }
            })
            .collect();
        out.sort_by(|a, b| {
            a.collection
                .name
                .to_lowercase()
                .cmp(&b.collection.name.to_lowercase())
        });
        Ok(out)
    }

    pub fn collection_detail(&self, id: u64) -> AppResult<CollectionDetail> {
        let collection = self.require_collection(id)?;
        let mut papers = Vec::new();
        for paper_id in self.linked_ids(&self.collection_papers, id)? {
            if let Some(paper) = self.get_paper(paper_id)? {
                papers.push(paper);
            }
        }
        papers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(CollectionDetail { collection, papers })
    }

    fn valid_collection_name(name: Option<&str>) -> AppResult<&str> {
        name.map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::Validation("Collection name is required".to_string()))
    }

    pub fn create_collection(&self, name: Option<&str>, paper_ids: &[u64]) -> AppResult<Collection> {
        let name = Self::valid_collection_name(name)?;
        let id = self.next_id()?;
        if !Self::claim(&self.collection_names, &name_key(name), id)? {
            return Err(AppError::Conflict(format!(
                "A collection named '{}' already exists",
                name
            )));
        }

        let collection = Collection {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        put_json(&self.collections, id_key(id), &collection)?;
        self.add_to_collection(id, paper_ids)?;
        Ok(collection)
    }

    pub fn rename_collection(&self, id: u64, name: Option<&str>) -> AppResult<Collection> {
        let name = Self::valid_collection_name(name)?;
        let mut collection = self.require_collection(id)?;
        if name_key(name) != name_key(&collection.name) {
            if !Self::claim(&self.collection_names, &name_key(name), id)? {
                return Err(AppError::Conflict(format!(
                    "A collection named '{}' already exists",
                    name
                )));
            }
            Self::release(&self.collection_names, &name_key(&collection.name), id)?;
        }
        collection.name = name.to_string();
        put_json(&self.collections, id_key(id), &collection)?;
        Ok(collection)
    }

    pub fn delete_collection(&self, id: u64) -> AppResult<Collection> {
        let collection = self.require_collection(id)?;
        for paper_id in self.linked_ids(&self.collection_papers, id)? {
            self.collection_papers.remove(pair_key(id, paper_id))?;
            self.paper_collections.remove(pair_key(paper_id, id))?;
        }
        Self::release(&self.collection_names, &name_key(&collection.name), id)?;
        self.collections.remove(id_key(id))?;
        Ok(collection)
    }

    /// Add papers to a collection, skipping unknown ids and existing
    /// members. Returns how many were newly added.
    pub fn add_to_collection(&self, id: u64, paper_ids: &[u64]) -> AppResult<usize> {
        self.require_collection(id)?;
        let mut added = 0;
        let mut seen = HashSet::new();
        for &paper_id in paper_ids {
            if !seen.insert(paper_id) || self.get_paper(paper_id)?.is_none() {
                continue;
            }
            if self
                .collection_papers
                .insert(pair_key(id, paper_id), &[] as &[u8])?
                .is_none()
            {
                added += 1;
            }
            self.paper_collections.insert(pair_key(paper_id, id), &[] as &[u8])?;
        }
        Ok(added)
    }

    pub fn remove_from_collection(&self, id: u64, paper_id: u64) -> AppResult<()> {
        self.require_collection(id)?;
        if self
            .collection_papers
            .remove(pair_key(id, paper_id))?
            .is_none()
        {
            return Err(AppError::NotFound(format!(
                "Paper {} in collection {}",
                paper_id, id
            )));
        }
        self.paper_collections.remove(pair_key(paper_id, id))?;
        Ok(())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn zotero_config(&self) -> AppResult<Option<ZoteroConfig>> {
        get_json(&self.meta, ZOTERO_CONFIG_KEY)
    }

    pub fn save_zotero_config(&self, config: &ZoteroConfig) -> AppResult<()> {
        put_json(&self.meta, ZOTERO_CONFIG_KEY, config)
    }

    pub fn delete_zotero_config(&self) -> AppResult<bool> {
        Ok(self.meta.remove(ZOTERO_CONFIG_KEY)?.is_some())
    }

    pub fn touch_zotero_sync(&self) -> AppResult<()> {
        if let Some(mut config) = self.zotero_config()? {
            config.last_sync = Some(Utc::now());
            self.save_zotero_config(&config)?;
        }
        Ok(())
    }

    pub fn settings(&self) -> AppResult<Settings> {
        Ok(get_json(&self.meta, SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> AppResult<()> {
        put_json(&self.meta, SETTINGS_KEY, settings)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
