//! Block document model.
//!
//! A note is an ordered sequence of typed blocks. [`Document`] owns the
//! sequence and keeps `order` equal to each block's position after every
//! mutation, so the stored form never has gaps or duplicate indices.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

// ============================================================================
// Block Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    H1,
    H2,
    H3,
    List,
    Quote,
    Code,
    Image,
    Table,
    Todo,
    Separator,
}

impl BlockKind {
    pub const ALL: [BlockKind; 11] = [
        BlockKind::Text,
        BlockKind::H1,
        BlockKind::H2,
        BlockKind::H3,
        BlockKind::List,
        BlockKind::Quote,
        BlockKind::Code,
        BlockKind::Image,
        BlockKind::Table,
        BlockKind::Todo,
        BlockKind::Separator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::H1 => "h1",
            BlockKind::H2 => "h2",
            BlockKind::H3 => "h3",
            BlockKind::List => "list",
            BlockKind::Quote => "quote",
            BlockKind::Code => "code",
            BlockKind::Image => "image",
            BlockKind::Table => "table",
            BlockKind::Todo => "todo",
            BlockKind::Separator => "separator",
        }
    }

    /// Blocks where Enter starts a new block instead of a new line.
    pub fn enter_creates_block(&self) -> bool {
        matches!(
            self,
            BlockKind::Text
                | BlockKind::H1
                | BlockKind::H2
                | BlockKind::H3
                | BlockKind::Quote
                | BlockKind::Image
                | BlockKind::Separator
        )
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown block type: {}", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// Type-specific payload, tagged by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockContent {
    Text {
        #[serde(default)]
        content: String,
    },
    H1 {
        #[serde(default)]
        content: String,
    },
    H2 {
        #[serde(default)]
        content: String,
    },
    H3 {
        #[serde(default)]
        content: String,
    },
    List {
        #[serde(default)]
        items: Vec<String>,
        #[serde(default)]
        ordered: bool,
    },
    Quote {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
    },
    Code {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Image {
        #[serde(default, alias = "url")]
        src: String,
        #[serde(default)]
        alt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Table {
        #[serde(default)]
        headers: Vec<String>,
        #[serde(default)]
        rows: Vec<Vec<String>>,
    },
    Todo {
        #[serde(default)]
        items: Vec<TodoItem>,
    },
    Separator {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<SeparatorStyle>,
    },
}

impl BlockContent {
    /// Fresh content for a newly created block of `kind`.
    pub fn default_for(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Text => BlockContent::Text {
                content: String::new(),
            },
            BlockKind::H1 => BlockContent::H1 {
                content: String::new(),
            },
            BlockKind::H2 => BlockContent::H2 {
                content: String::new(),
            },
            BlockKind::H3 => BlockContent::H3 {
                content: String::new(),
            },
            BlockKind::List => BlockContent::List {
                items: vec![String::new()],
                ordered: false,
            },
            BlockKind::Quote => BlockContent::Quote {
                content: String::new(),
                author: None,
            },
            BlockKind::Code => BlockContent::Code {
                content: String::new(),
                language: Some("text".to_string()),
            },
            BlockKind::Image => BlockContent::Image {
                src: String::new(),
                alt: String::new(),
                caption: Some(String::new()),
                width: Some(100),
                height: None,
            },
            BlockKind::Table => BlockContent::Table {
                headers: vec!["Column 1".to_string(), "Column 2".to_string()],
                rows: vec![vec![String::new(), String::new()]],
            },
            BlockKind::Todo => BlockContent::Todo {
                items: vec![TodoItem::default()],
            },
            BlockKind::Separator => BlockContent::Separator {
                style: Some(SeparatorStyle::Solid),
            },
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            BlockContent::Text { .. } => BlockKind::Text,
            BlockContent::H1 { .. } => BlockKind::H1,
            BlockContent::H2 { .. } => BlockKind::H2,
            BlockContent::H3 { .. } => BlockKind::H3,
            BlockContent::List { .. } => BlockKind::List,
            BlockContent::Quote { .. } => BlockKind::Quote,
            BlockContent::Code { .. } => BlockKind::Code,
            BlockContent::Image { .. } => BlockKind::Image,
            BlockContent::Table { .. } => BlockKind::Table,
            BlockContent::Todo { .. } => BlockKind::Todo,
            BlockContent::Separator { .. } => BlockKind::Separator,
        }
    }

    /// The single text field of text, heading, quote and code blocks.
    pub fn text(&self) -> Option<&str> {
        match self {
            BlockContent::Text { content }
            | BlockContent::H1 { content }
            | BlockContent::H2 { content }
            | BlockContent::H3 { content }
            | BlockContent::Quote { content, .. }
            | BlockContent::Code { content, .. } => Some(content),
            _ => None,
        }
    }

    /// True when the block holds nothing the user typed. Separators count
    /// as empty so Backspace removes them.
    pub fn is_empty(&self) -> bool {
        match self {
            BlockContent::Text { content }
            | BlockContent::H1 { content }
            | BlockContent::H2 { content }
            | BlockContent::H3 { content }
            | BlockContent::Code { content, .. } => content.is_empty(),
            BlockContent::Quote { content, author } => {
                content.is_empty() && author.as_deref().unwrap_or("").is_empty()
            }
            BlockContent::List { items, .. } => items.iter().all(|i| i.is_empty()),
            BlockContent::Todo { items } => items.iter().all(|i| i.text.is_empty()),
            BlockContent::Table { headers, rows } => {
                headers.iter().all(|h| h.is_empty())
                    && rows.iter().all(|r| r.iter().all(|c| c.is_empty()))
            }
            BlockContent::Image { src, .. } => src.is_empty(),
            BlockContent::Separator { .. } => true,
        }
    }

    /// Apply `f` to every field that holds user-authored rich text.
    pub fn map_rich_text<F>(&mut self, mut f: F)
    where
        F: FnMut(&str) -> String,
    {
        match self {
            BlockContent::Text { content }
            | BlockContent::H1 { content }
            | BlockContent::H2 { content }
            | BlockContent::H3 { content } => *content = f(content),
            BlockContent::Quote { content, author } => {
                *content = f(content);
                if let Some(a) = author {
                    *a = f(a);
                }
            }
            BlockContent::List { items, .. } => {
                for item in items.iter_mut() {
                    *item = f(item);
                }
            }
            BlockContent::Todo { items } => {
                for item in items.iter_mut() {
                    item.text = f(&item.text);
                }
            }
            BlockContent::Table { headers, rows } => {
                for h in headers.iter_mut() {
                    *h = f(h);
                }
                for cell in rows.iter_mut().flat_map(|r| r.iter_mut()) {
                    *cell = f(cell);
                }
            }
            BlockContent::Code { .. } | BlockContent::Image { .. } | BlockContent::Separator { .. } => {}
        }
    }
}

// ============================================================================
// Block
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(flatten)]
    pub content: BlockContent,
    #[serde(default)]
    pub order: usize,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `block_<unix millis>_<9 base36 chars>`
pub fn generate_block_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("block_{}_{}", Utc::now().timestamp_millis(), suffix)
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self::with_content(BlockContent::default_for(kind))
    }

    pub fn with_content(content: BlockContent) -> Self {
        let now = Utc::now();
        Self {
            id: generate_block_id(),
            content,
            order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.content.kind()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Copy with a fresh id and timestamps.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::with_content(self.content.clone());
        copy.order = self.order;
        copy
    }

    pub fn set_content(&mut self, content: BlockContent) {
        self.content = content;
        self.updated_at = Utc::now();
    }

    /// Switch to another block type. Identity, order and creation time are
    /// kept; the payload starts from the new type's defaults.
    pub fn retype(&mut self, kind: BlockKind) {
        self.set_content(BlockContent::default_for(kind));
    }
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document is never empty: it starts with one empty text block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::new(BlockKind::Text)],
        }
    }

    /// Load blocks as stored. They are sorted by their `order` field (stable,
    /// so ties keep file order) and re-indexed.
    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        if blocks.is_empty() {
            return Self::new();
        }
        blocks.sort_by_key(|b| b.order);
        let mut doc = Self { blocks };
        doc.reindex();
        doc
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    fn check(&self, index: usize) -> AppResult<()> {
        if index < self.blocks.len() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Block index {} out of range (document has {} blocks)",
                index,
                self.blocks.len()
            )))
        }
    }

    fn reindex(&mut self) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.order = i;
        }
    }

    /// Insert `block` right after `after`, or at the end when `after` is
    /// `None`. Returns the new block's index.
    pub fn insert_after(&mut self, after: Option<usize>, block: Block) -> AppResult<usize> {
        let index = match after {
            Some(i) => {
                self.check(i)?;
                i + 1
            }
            None => self.blocks.len(),
        };
        self.blocks.insert(index, block);
        self.reindex();
        Ok(index)
    }

    /// Remove the block at `index` and return the index that should take
    /// focus. Removing the only block leaves a single empty text block.
    pub fn remove(&mut self, index: usize) -> AppResult<usize> {
        self.check(index)?;
        if self.blocks.len() == 1 {
            self.blocks = vec![Block::new(BlockKind::Text)];
            return Ok(0);
        }
        self.blocks.remove(index);
        self.reindex();
        Ok(index.saturating_sub(1))
    }

    /// Insert a copy of the block at `index` directly after it.
    pub fn duplicate(&mut self, index: usize) -> AppResult<usize> {
        self.check(index)?;
        let copy = self.blocks[index].duplicate();
        self.insert_after(Some(index), copy)
    }

    /// Move the block at `from` so it ends up at position `to`.
    pub fn move_block(&mut self, from: usize, to: usize) -> AppResult<usize> {
        self.check(from)?;
        self.check(to)?;
        if from != to {
            let block = self.blocks.remove(from);
            self.blocks.insert(to, block);
            self.reindex();
        }
        Ok(to)
    }

    pub fn move_up(&mut self, index: usize) -> AppResult<usize> {
        self.check(index)?;
        if index == 0 {
            return Ok(0);
        }
        self.move_block(index, index - 1)
    }

    pub fn move_down(&mut self, index: usize) -> AppResult<usize> {
        self.check(index)?;
        if index + 1 == self.blocks.len() {
            return Ok(index);
        }
        self.move_block(index, index + 1)
    }

    pub fn update(&mut self, index: usize, content: BlockContent) -> AppResult<()> {
        self.check(index)?;
        self.blocks[index].set_content(content);
        Ok(())
    }

    pub fn retype(&mut self, index: usize, kind: BlockKind) -> AppResult<()> {
        self.check(index)?;
        self.blocks[index].retype(kind);
        Ok(())
    }

    pub fn block_mut(&mut self, index: usize) -> AppResult<&mut Block> {
        self.check(index)?;
        Ok(&mut self.blocks[index])
    }
}
