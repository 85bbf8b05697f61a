//! Editor interaction state.
//!
//! [`EditorState`] is the block editor minus the browser: it tracks which
//! block has focus, the open slash menu, drag and drop, and the position
//! inside list, todo and table blocks. The client forwards key presses
//! (with caret geometry it measured) and gets back whether the key was
//! consumed. Every change bumps [`EditorState::revision`] so callers know
//! when to hand a snapshot to the autosaver.

use serde::{Deserialize, Serialize};

use crate::blocks::{Block, BlockContent, BlockKind, Document, TodoItem};
use crate::error::{AppError, AppResult};
use crate::slash::{search_commands, SlashCommand};

// ============================================================================
// Input Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Enter,
    Backspace,
    ArrowUp,
    ArrowDown,
    Tab,
    Escape,
    Other,
}

/// Rectangle in client coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Where the caret sits in the focused field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Caret {
    /// Plain input or textarea: character offset into the field's value.
    Offset { offset: usize },
    /// Rich text: caret and element boxes as measured by the browser.
    Geometry {
        caret: Rect,
        element: Rect,
        line_height: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyInput {
    pub key: Key,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub caret: Option<Caret>,
}

impl KeyInput {
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            shift: false,
            caret: None,
        }
    }

    pub fn with_caret(key: Key, caret: Caret) -> Self {
        Self {
            caret: Some(caret),
            ..Self::plain(key)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The editor acted on the key; the client should prevent the default.
    Handled,
    /// Leave the key to the focused field.
    Ignored,
}

/// Position inside a structured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InnerFocus {
    Item { index: usize },
    /// Row 0 is the header row.
    Cell { row: usize, col: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlashMenu {
    pub block_id: String,
    pub query: String,
    pub suggestions: Vec<&'static SlashCommand>,
    pub highlighted: usize,
    /// Menu position relative to the editor, once the client reports layout.
    pub anchor: Option<(f64, f64)>,
}

// ============================================================================
// Caret Line Detection
// ============================================================================

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// True when the caret is on the first visual line of its field. Without
/// caret information the field is treated as single-line.
pub fn caret_on_first_line(text: &str, caret: Option<&Caret>) -> bool {
    match caret {
        None => true,
        Some(Caret::Offset { offset }) => !text[..byte_offset(text, *offset)].contains('\n'),
        Some(Caret::Geometry {
            caret,
            element,
            line_height,
        }) => caret.top - element.top < *line_height,
    }
}

/// True when the caret is on the last visual line of its field.
pub fn caret_on_last_line(text: &str, caret: Option<&Caret>) -> bool {
    match caret {
        None => true,
        Some(Caret::Offset { offset }) => !text[byte_offset(text, *offset)..].contains('\n'),
        Some(Caret::Geometry {
            caret,
            element,
            line_height,
        }) => element.bottom - caret.bottom < *line_height,
    }
}

// ============================================================================
// Editor State
// ============================================================================

#[derive(Debug, Clone)]
pub struct EditorState {
    doc: Document,
    focused: Option<usize>,
    selected: Option<usize>,
    inner: Option<InnerFocus>,
    slash: Option<SlashMenu>,
    dragging: Option<usize>,
    drop_target: Option<usize>,
    revision: u64,
}

impl Default for EditorState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl EditorState {
    /// Open a document. An empty document gets one text block, focused.
    pub fn new(blocks: Vec<Block>) -> Self {
        let was_empty = blocks.is_empty();
        Self {
            doc: Document::from_blocks(blocks),
            focused: if was_empty { Some(0) } else { None },
            selected: None,
            inner: None,
            slash: None,
            dragging: None,
            drop_target: None,
            revision: 0,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn blocks(&self) -> &[Block] {
        self.doc.blocks()
    }

    pub fn snapshot(&self) -> Vec<Block> {
        self.doc.blocks().to_vec()
    }

    pub fn focused(&self) -> Option<usize> {
        self.focused
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn inner_focus(&self) -> Option<InnerFocus> {
        self.inner
    }

    pub fn slash_menu(&self) -> Option<&SlashMenu> {
        self.slash.as_ref()
    }

    pub fn drop_target(&self) -> Option<usize> {
        self.drop_target
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn changed(&mut self) {
        self.revision += 1;
    }

    fn focused_index(&self) -> AppResult<usize> {
        self.focused
            .ok_or_else(|| AppError::Validation("No block has focus".to_string()))
    }

    // ---- focus -------------------------------------------------------------

    pub fn focus(&mut self, index: usize) -> AppResult<()> {
        if self.doc.get(index).is_none() {
            return Err(AppError::Validation(format!("No block at index {}", index)));
        }
        if self.focused != Some(index) {
            self.inner = None;
        }
        self.focused = Some(index);
        self.selected = Some(index);
        Ok(())
    }

    /// Set the position inside the focused list, todo or table block.
    pub fn focus_inner(&mut self, inner: InnerFocus) -> AppResult<()> {
        let index = self.focused_index()?;
        let valid = match (&self.doc.blocks()[index].content, inner) {
            (BlockContent::List { items, .. }, InnerFocus::Item { index }) => index < items.len(),
            (BlockContent::Todo { items }, InnerFocus::Item { index }) => index < items.len(),
            (BlockContent::Table { headers, rows }, InnerFocus::Cell { row, col }) => {
                row <= rows.len() && col < headers.len()
            }
            _ => false,
        };
        if !valid {
            return Err(AppError::Validation(
                "Position does not exist in the focused block".to_string(),
            ));
        }
        self.inner = Some(inner);
        Ok(())
    }

    pub fn blur(&mut self) {
        self.focused = None;
        self.inner = None;
    }

    /// Move focus to another block, entering structured blocks at the edge
    /// nearest to where focus came from.
    fn move_focus(&mut self, index: usize, from_above: bool) {
        self.focused = Some(index);
        self.selected = Some(index);
        self.inner = match &self.doc.blocks()[index].content {
            BlockContent::List { items, .. } if !items.is_empty() => Some(InnerFocus::Item {
                index: if from_above { 0 } else { items.len() - 1 },
            }),
            BlockContent::Todo { items } if !items.is_empty() => Some(InnerFocus::Item {
                index: if from_above { 0 } else { items.len() - 1 },
            }),
            BlockContent::Table { headers, rows } if !headers.is_empty() => Some(InnerFocus::Cell {
                row: if from_above { 0 } else { rows.len() },
                col: 0,
            }),
            _ => None,
        };
    }

    // ---- content -----------------------------------------------------------

    /// Replace a block's payload. Text blocks starting with `/` open the
    /// slash menu; anything else closes it.
    pub fn update_block(&mut self, index: usize, content: BlockContent) -> AppResult<()> {
        self.doc.update(index, content)?;
        self.changed();

        let block = &self.doc.blocks()[index];
        match &block.content {
            BlockContent::Text { content } if crate::slash::is_slash_command(content) => {
                let suggestions = search_commands(content);
                if suggestions.is_empty() {
                    self.slash = None;
                } else {
                    let anchor = self
                        .slash
                        .as_ref()
                        .filter(|m| m.block_id == block.id)
                        .and_then(|m| m.anchor);
                    self.slash = Some(SlashMenu {
                        block_id: block.id.clone(),
                        query: content.clone(),
                        suggestions,
                        highlighted: 0,
                        anchor,
                    });
                }
            }
            BlockContent::Text { .. } => self.slash = None,
            _ => {}
        }
        Ok(())
    }

    /// Record where the slash menu should appear: just below the active
    /// block, offset from its left edge.
    pub fn place_slash_menu(&mut self, block: Rect, editor: Rect) {
        if let Some(menu) = self.slash.as_mut() {
            menu.anchor = Some((block.left - editor.left + 50.0, block.bottom - editor.top + 10.0));
        }
    }

    pub fn close_slash_menu(&mut self) {
        self.slash = None;
    }

    /// Switch the block the menu was opened on to `kind`.
    pub fn apply_slash_command(&mut self, kind: BlockKind) -> AppResult<()> {
        let menu = self
            .slash
            .take()
            .ok_or_else(|| AppError::Validation("Slash menu is not open".to_string()))?;
        let index = self
            .doc
            .position(&menu.block_id)
            .ok_or_else(|| AppError::NotFound(format!("Block {}", menu.block_id)))?;
        self.doc.retype(index, kind)?;
        self.focused = Some(index);
        self.selected = Some(index);
        self.inner = None;
        self.changed();
        Ok(())
    }

    // ---- structure ---------------------------------------------------------

    /// Insert a new block after the focused one (or at the end) and focus it.
    pub fn insert_block(&mut self, kind: BlockKind) -> AppResult<usize> {
        self.slash = None;
        let index = self.doc.insert_after(self.focused, Block::new(kind))?;
        self.move_focus(index, true);
        self.changed();
        Ok(index)
    }

    pub fn delete_block(&mut self, index: usize) -> AppResult<usize> {
        let focus = self.doc.remove(index)?;
        if self
            .slash
            .as_ref()
            .is_some_and(|m| self.doc.position(&m.block_id).is_none())
        {
            self.slash = None;
        }
        self.move_focus(focus, false);
        self.changed();
        Ok(focus)
    }

    pub fn duplicate_block(&mut self, index: usize) -> AppResult<usize> {
        let new_index = self.doc.duplicate(index)?;
        self.focused = Some(new_index);
        self.selected = Some(new_index);
        self.inner = None;
        self.changed();
        Ok(new_index)
    }

    pub fn move_block_up(&mut self, index: usize) -> AppResult<usize> {
        let to = self.doc.move_up(index)?;
        self.follow_move(index, to);
        Ok(to)
    }

    pub fn move_block_down(&mut self, index: usize) -> AppResult<usize> {
        let to = self.doc.move_down(index)?;
        self.follow_move(index, to);
        Ok(to)
    }

    fn follow_move(&mut self, from: usize, to: usize) {
        if from != to {
            self.focused = Some(to);
            self.selected = Some(to);
            self.changed();
        }
    }

    // ---- drag and drop -----------------------------------------------------

    pub fn drag_start(&mut self, index: usize) -> AppResult<()> {
        if self.doc.get(index).is_none() {
            return Err(AppError::Validation(format!("No block at index {}", index)));
        }
        self.dragging = Some(index);
        self.drop_target = None;
        Ok(())
    }

    pub fn drag_over(&mut self, index: usize) {
        if self.dragging.is_some_and(|d| d != index) && index < self.doc.len() {
            self.drop_target = Some(index);
        }
    }

    pub fn drag_end(&mut self) {
        self.dragging = None;
        self.drop_target = None;
    }

    /// Drop the dragged block onto `target`; it takes the target's position
    /// and focus follows it.
    pub fn drop_on(&mut self, target: usize) -> AppResult<Option<usize>> {
        let dragged = self.dragging.take();
        self.drop_target = None;
        match dragged {
            Some(from) if from != target => {
                let to = self.doc.move_block(from, target)?;
                self.focused = Some(to);
                self.selected = Some(to);
                self.inner = None;
                self.changed();
                Ok(Some(to))
            }
            _ => Ok(None),
        }
    }

    // ---- keyboard ----------------------------------------------------------

    pub fn handle_key(&mut self, input: KeyInput) -> AppResult<KeyOutcome> {
        if self.slash.is_some() {
            if let Some(outcome) = self.handle_menu_key(input.key)? {
                return Ok(outcome);
            }
        }

        if input.key == Key::Enter && input.ctrl {
            self.insert_block(BlockKind::Text)?;
            return Ok(KeyOutcome::Handled);
        }

        let Some(index) = self.focused else {
            return Ok(KeyOutcome::Ignored);
        };

        match self.doc.blocks()[index].kind() {
            BlockKind::List | BlockKind::Todo => self.handle_item_key(index, input),
            BlockKind::Table => self.handle_table_key(index, input),
            _ => self.handle_field_key(index, input),
        }
    }

    fn handle_menu_key(&mut self, key: Key) -> AppResult<Option<KeyOutcome>> {
        let Some(menu) = self.slash.as_mut() else {
            return Ok(None);
        };
        match key {
            Key::ArrowDown => {
                menu.highlighted = (menu.highlighted + 1).min(menu.suggestions.len() - 1);
            }
            Key::ArrowUp => {
                menu.highlighted = menu.highlighted.saturating_sub(1);
            }
            Key::Enter => {
                let kind = menu.suggestions[menu.highlighted].kind;
                self.apply_slash_command(kind)?;
            }
            Key::Escape => {
                self.slash = None;
            }
            _ => return Ok(None),
        }
        Ok(Some(KeyOutcome::Handled))
    }

    fn navigate_up(&mut self, index: usize) -> KeyOutcome {
        if index == 0 {
            return KeyOutcome::Ignored;
        }
        self.move_focus(index - 1, false);
        KeyOutcome::Handled
    }

    fn navigate_down(&mut self, index: usize) -> KeyOutcome {
        if index + 1 >= self.doc.len() {
            return KeyOutcome::Ignored;
        }
        self.move_focus(index + 1, true);
        KeyOutcome::Handled
    }

    /// Text, heading, quote, code, image and separator blocks.
    fn handle_field_key(&mut self, index: usize, input: KeyInput) -> AppResult<KeyOutcome> {
        let block = &self.doc.blocks()[index];
        let creates_block = block.kind().enter_creates_block();
        let empty = block.is_empty();
        let text = block.content.text().unwrap_or("");
        let first_line = caret_on_first_line(text, input.caret.as_ref());
        let last_line = caret_on_last_line(text, input.caret.as_ref());

        match input.key {
            Key::Enter if !input.shift && creates_block => {
                self.insert_block(BlockKind::Text)?;
                Ok(KeyOutcome::Handled)
            }
            Key::Backspace if empty => {
                self.delete_block(index)?;
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowUp if first_line => Ok(self.navigate_up(index)),
            Key::ArrowDown if last_line => Ok(self.navigate_down(index)),
            _ => Ok(KeyOutcome::Ignored),
        }
    }

    fn current_item(&self) -> usize {
        match self.inner {
            Some(InnerFocus::Item { index }) => index,
            _ => 0,
        }
    }

    /// List and todo blocks move between items and hand off to block-level
    /// navigation at the first and last item.
    fn handle_item_key(&mut self, index: usize, input: KeyInput) -> AppResult<KeyOutcome> {
        let item = self.current_item();
        let content = self.doc.blocks()[index].content.clone();
        let (len, item_empty) = match &content {
            BlockContent::List { items, .. } => {
                (items.len(), items.get(item).map_or(true, |s| s.is_empty()))
            }
            BlockContent::Todo { items } => {
                (items.len(), items.get(item).map_or(true, |t| t.text.is_empty()))
            }
            _ => return Ok(KeyOutcome::Ignored),
        };

        match input.key {
            Key::Enter => {
                self.edit_items(index, |items| items.insert_empty(item + 1))?;
                self.inner = Some(InnerFocus::Item { index: item + 1 });
                Ok(KeyOutcome::Handled)
            }
            Key::Backspace if item_empty => {
                if len <= 1 {
                    self.delete_block(index)?;
                } else {
                    self.edit_items(index, |items| items.remove(item))?;
                    self.inner = Some(InnerFocus::Item {
                        index: item.saturating_sub(1),
                    });
                }
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowUp if item > 0 => {
                self.inner = Some(InnerFocus::Item { index: item - 1 });
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowUp => Ok(self.navigate_up(index)),
            Key::ArrowDown if item + 1 < len => {
                self.inner = Some(InnerFocus::Item { index: item + 1 });
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowDown => Ok(self.navigate_down(index)),
            Key::Tab if matches!(content, BlockContent::Todo { .. }) => {
                if input.shift {
                    self.edit_items(index, |items| items.toggle(item))?;
                } else if item + 1 < len {
                    self.inner = Some(InnerFocus::Item { index: item + 1 });
                } else {
                    self.edit_items(index, |items| items.insert_empty(item + 1))?;
                    self.inner = Some(InnerFocus::Item { index: item + 1 });
                }
                Ok(KeyOutcome::Handled)
            }
            _ => Ok(KeyOutcome::Ignored),
        }
    }

    fn edit_items<F>(&mut self, index: usize, f: F) -> AppResult<()>
    where
        F: FnOnce(&mut ItemsMut<'_>),
    {
        let block = self.doc.block_mut(index)?;
        let mut content = block.content.clone();
        {
            let mut items = match &mut content {
                BlockContent::List { items, .. } => ItemsMut::List(items),
                BlockContent::Todo { items } => ItemsMut::Todo(items),
                _ => return Ok(()),
            };
            f(&mut items);
        }
        block.set_content(content);
        self.changed();
        Ok(())
    }

    /// Tables move between cells (Tab walks row-major, arrows move within a
    /// column) and hand off at the header row and last row.
    fn handle_table_key(&mut self, index: usize, input: KeyInput) -> AppResult<KeyOutcome> {
        let (cols, total_rows, empty) = match &self.doc.blocks()[index].content {
            BlockContent::Table { headers, rows } => (
                headers.len(),
                rows.len() + 1,
                self.doc.blocks()[index].is_empty(),
            ),
            _ => return Ok(KeyOutcome::Ignored),
        };
        let (row, col) = match self.inner {
            Some(InnerFocus::Cell { row, col }) => (row, col),
            _ => (0, 0),
        };
        let last_col = cols.saturating_sub(1);

        match input.key {
            Key::Tab => {
                let next = if input.shift {
                    if col > 0 {
                        Some((row, col - 1))
                    } else if row > 0 {
                        Some((row - 1, last_col))
                    } else {
                        None
                    }
                } else if col < last_col {
                    Some((row, col + 1))
                } else if row + 1 < total_rows {
                    Some((row + 1, 0))
                } else {
                    None
                };
                if let Some((row, col)) = next {
                    self.inner = Some(InnerFocus::Cell { row, col });
                }
                Ok(KeyOutcome::Handled)
            }
            Key::Enter => {
                if row + 1 < total_rows {
                    self.inner = Some(InnerFocus::Cell { row: row + 1, col });
                } else {
                    self.insert_block(BlockKind::Text)?;
                }
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowUp if row > 0 => {
                self.inner = Some(InnerFocus::Cell { row: row - 1, col });
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowUp => Ok(self.navigate_up(index)),
            Key::ArrowDown if row + 1 < total_rows => {
                self.inner = Some(InnerFocus::Cell { row: row + 1, col });
                Ok(KeyOutcome::Handled)
            }
            Key::ArrowDown => Ok(self.navigate_down(index)),
            Key::Backspace if empty => {
                self.delete_block(index)?;
                Ok(KeyOutcome::Handled)
            }
            _ => Ok(KeyOutcome::Ignored),
        }
    }
}

/// Uniform item editing over list and todo payloads.
enum ItemsMut<'a> {
    List(&'a mut Vec<String>),
    Todo(&'a mut Vec<TodoItem>),
}

impl ItemsMut<'_> {
    fn insert_empty(&mut self, at: usize) {
        match self {
            ItemsMut::List(items) => {
                let at = at.min(items.len());
                items.insert(at, String::new());
            }
            ItemsMut::Todo(items) => {
                let at = at.min(items.len());
                items.insert(at, TodoItem::default());
            }
        }
    }

    fn remove(&mut self, at: usize) {
        match self {
            ItemsMut::List(items) if at < items.len() => {
                items.remove(at);
            }
            ItemsMut::Todo(items) if at < items.len() => {
                items.remove(at);
            }
            _ => {}
        }
    }

    fn toggle(&mut self, at: usize) {
        if let ItemsMut::Todo(items) = self {
            if let Some(item) = items.get_mut(at) {
                item.completed = !item.completed;
            }
        }
    }
}

#[cfg(test)]
#[path = "editor_test.rs"]
mod editor_test;
