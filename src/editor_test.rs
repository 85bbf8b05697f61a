use super::*;
use crate::blocks::{Block, BlockContent, BlockKind, TodoItem};

fn text(s: &str) -> Block {
    Block::with_content(BlockContent::Text {
        content: s.to_string(),
    })
}

fn editor_with(texts: &[&str]) -> EditorState {
    EditorState::new(texts.iter().map(|t| text(t)).collect())
}

fn texts(editor: &EditorState) -> Vec<String> {
    editor
        .blocks()
        .iter()
        .map(|b| b.content.text().unwrap_or("").to_string())
        .collect()
}

fn orders(editor: &EditorState) -> Vec<usize> {
    editor.blocks().iter().map(|b| b.order).collect()
}

fn set_text(editor: &mut EditorState, index: usize, s: &str) {
    editor
        .update_block(
            index,
            BlockContent::Text {
                content: s.to_string(),
            },
        )
        .unwrap();
}

// ============================================================================
// Creation, deletion, duplication
// ============================================================================

#[test]
fn test_empty_document_starts_focused_on_one_text_block() {
    let editor = EditorState::new(Vec::new());
    assert_eq!(editor.blocks().len(), 1);
    assert_eq!(editor.focused(), Some(0));
}

#[test]
fn test_enter_in_text_block_inserts_after_focused() {
    let mut editor = editor_with(&["a", "b", "c"]);
    editor.focus(1).unwrap();
    let outcome = editor.handle_key(KeyInput::plain(Key::Enter)).unwrap();
    assert_eq!(outcome, KeyOutcome::Handled);
    assert_eq!(texts(&editor), vec!["a", "b", "", "c"]);
    assert_eq!(orders(&editor), vec![0, 1, 2, 3]);
    assert_eq!(editor.focused(), Some(2));
}

#[test]
fn test_shift_enter_is_left_to_the_field() {
    let mut editor = editor_with(&["a"]);
    editor.focus(0).unwrap();
    let mut input = KeyInput::plain(Key::Enter);
    input.shift = true;
    assert_eq!(editor.handle_key(input).unwrap(), KeyOutcome::Ignored);
    assert_eq!(editor.blocks().len(), 1);
}

#[test]
fn test_ctrl_enter_without_focus_appends() {
    let mut editor = editor_with(&["a", "b"]);
    let mut input = KeyInput::plain(Key::Enter);
    input.ctrl = true;
    assert_eq!(editor.handle_key(input).unwrap(), KeyOutcome::Handled);
    assert_eq!(texts(&editor), vec!["a", "b", ""]);
    assert_eq!(editor.focused(), Some(2));
}

#[test]
fn test_ctrl_enter_in_code_block_creates_block() {
    let mut editor = EditorState::new(vec![Block::new(BlockKind::Code)]);
    editor.focus(0).unwrap();
    assert_eq!(
        editor.handle_key(KeyInput::plain(Key::Enter)).unwrap(),
        KeyOutcome::Ignored
    );
    let mut input = KeyInput::plain(Key::Enter);
    input.ctrl = true;
    editor.handle_key(input).unwrap();
    assert_eq!(editor.blocks().len(), 2);
    assert_eq!(editor.blocks()[1].kind(), BlockKind::Text);
}

#[test]
fn test_backspace_on_empty_block_deletes_and_focuses_previous() {
    let mut editor = editor_with(&["a", "", "c"]);
    editor.focus(1).unwrap();
    assert_eq!(
        editor.handle_key(KeyInput::plain(Key::Backspace)).unwrap(),
        KeyOutcome::Handled
    );
    assert_eq!(texts(&editor), vec!["a", "c"]);
    assert_eq!(editor.focused(), Some(0));
    assert_eq!(orders(&editor), vec![0, 1]);
}

#[test]
fn test_backspace_on_non_empty_block_is_ignored() {
    let mut editor = editor_with(&["a"]);
    editor.focus(0).unwrap();
    assert_eq!(
        editor.handle_key(KeyInput::plain(Key::Backspace)).unwrap(),
        KeyOutcome::Ignored
    );
}

#[test]
fn test_deleting_only_block_leaves_empty_text_block() {
    let mut editor = EditorState::new(vec![Block::new(BlockKind::Separator)]);
    editor.focus(0).unwrap();
    editor.handle_key(KeyInput::plain(Key::Backspace)).unwrap();
    assert_eq!(editor.blocks().len(), 1);
    assert_eq!(editor.blocks()[0].kind(), BlockKind::Text);
    assert!(editor.blocks()[0].is_empty());
    assert_eq!(editor.focused(), Some(0));
}

#[test]
fn test_duplicate_focuses_copy() {
    let mut editor = editor_with(&["a", "b"]);
    editor.focus(0).unwrap();
    assert_eq!(editor.selected(), Some(0));
    let index = editor.duplicate_block(0).unwrap();
    assert_eq!(index, 1);
    assert_eq!(texts(&editor), vec!["a", "a", "b"]);
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.selected(), Some(1));
    assert_ne!(editor.blocks()[0].id, editor.blocks()[1].id);
}

#[test]
fn test_revision_tracks_changes() {
    let mut editor = editor_with(&["a"]);
    assert_eq!(editor.revision(), 0);
    editor.focus(0).unwrap();
    assert_eq!(editor.revision(), 0);
    set_text(&mut editor, 0, "ab");
    editor.insert_block(BlockKind::Quote).unwrap();
    assert_eq!(editor.revision(), 2);
}

// ============================================================================
// Drag and drop
// ============================================================================

#[test]
fn test_drop_moves_block_to_target_position() {
    let mut editor = editor_with(&["a", "b", "c", "d"]);
    editor.drag_start(0).unwrap();
    editor.drag_over(2);
    assert_eq!(editor.drop_target(), Some(2));
    assert_eq!(editor.drop_on(2).unwrap(), Some(2));
    assert_eq!(texts(&editor), vec!["b", "c", "a", "d"]);
    assert_eq!(orders(&editor), vec![0, 1, 2, 3]);
    assert_eq!(editor.focused(), Some(2));
    assert_eq!(editor.drop_target(), None);
}

#[test]
fn test_drop_on_itself_or_without_drag_is_noop() {
    let mut editor = editor_with(&["a", "b"]);
    assert_eq!(editor.drop_on(1).unwrap(), None);
    editor.drag_start(1).unwrap();
    editor.drag_over(1);
    assert_eq!(editor.drop_target(), None);
    assert_eq!(editor.drop_on(1).unwrap(), None);
    assert_eq!(texts(&editor), vec!["a", "b"]);
    assert_eq!(editor.revision(), 0);
}

#[test]
fn test_move_up_and_down_follow_focus() {
    let mut editor = editor_with(&["a", "b", "c"]);
    assert_eq!(editor.move_block_down(0).unwrap(), 1);
    assert_eq!(texts(&editor), vec!["b", "a", "c"]);
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.move_block_up(2).unwrap(), 1);
    assert_eq!(texts(&editor), vec!["b", "c", "a"]);
}

// ============================================================================
// Slash menu
// ============================================================================

#[test]
fn test_slash_menu_opens_filters_and_closes() {
    let mut editor = editor_with(&["x"]);
    editor.focus(0).unwrap();
    set_text(&mut editor, 0, "/");
    assert_eq!(editor.slash_menu().unwrap().suggestions.len(), 11);

    set_text(&mut editor, 0, "/head");
    let ids: Vec<&str> = editor
        .slash_menu()
        .unwrap()
        .suggestions
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["h1", "h2", "h3"]);

    set_text(&mut editor, 0, "/zzz");
    assert!(editor.slash_menu().is_none());

    set_text(&mut editor, 0, "/code");
    assert!(editor.slash_menu().is_some());
    set_text(&mut editor, 0, "plain");
    assert!(editor.slash_menu().is_none());
}

#[test]
fn test_slash_menu_anchor() {
    let mut editor = editor_with(&["x"]);
    set_text(&mut editor, 0, "/");
    editor.place_slash_menu(
        Rect {
            left: 120.0,
            top: 200.0,
            right: 600.0,
            bottom: 230.0,
        },
        Rect {
            left: 100.0,
            top: 50.0,
            right: 800.0,
            bottom: 900.0,
        },
    );
    assert_eq!(editor.slash_menu().unwrap().anchor, Some((70.0, 190.0)));

    set_text(&mut editor, 0, "/t");
    assert_eq!(editor.slash_menu().unwrap().anchor, Some((70.0, 190.0)));
}

#[test]
fn test_choosing_command_switches_type_and_keeps_identity() {
    let mut editor = editor_with(&["a", "b"]);
    editor.focus(1).unwrap();
    set_text(&mut editor, 1, "/h2");
    let id = editor.blocks()[1].id.clone();

    assert_eq!(
        editor.handle_key(KeyInput::plain(Key::Enter)).unwrap(),
        KeyOutcome::Handled
    );
    let block = &editor.blocks()[1];
    assert_eq!(block.kind(), BlockKind::H2);
    assert_eq!(block.id, id);
    assert_eq!(block.order, 1);
    assert!(editor.slash_menu().is_none());
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.blocks().len(), 2);
}

#[test]
fn test_menu_keyboard_navigation() {
    let mut editor = editor_with(&["a"]);
    editor.focus(0).unwrap();
    set_text(&mut editor, 0, "/head");

    editor.handle_key(KeyInput::plain(Key::ArrowUp)).unwrap();
    assert_eq!(editor.slash_menu().unwrap().highlighted, 0);
    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.slash_menu().unwrap().highlighted, 2);

    editor.handle_key(KeyInput::plain(Key::Enter)).unwrap();
    assert_eq!(editor.blocks()[0].kind(), BlockKind::H3);
}

#[test]
fn test_escape_closes_menu_without_change() {
    let mut editor = editor_with(&["a"]);
    editor.focus(0).unwrap();
    set_text(&mut editor, 0, "/");
    editor.handle_key(KeyInput::plain(Key::Escape)).unwrap();
    assert!(editor.slash_menu().is_none());
    assert_eq!(editor.blocks()[0].kind(), BlockKind::Text);
    assert!(editor.apply_slash_command(BlockKind::H1).is_err());
}

// ============================================================================
// Arrow navigation
// ============================================================================

#[test]
fn test_caret_line_detection_from_offset() {
    let text = "first\nsecond\nthird";
    assert!(caret_on_first_line(text, Some(&Caret::Offset { offset: 3 })));
    assert!(!caret_on_first_line(text, Some(&Caret::Offset { offset: 8 })));
    assert!(caret_on_last_line(text, Some(&Caret::Offset { offset: 15 })));
    assert!(!caret_on_last_line(text, Some(&Caret::Offset { offset: 8 })));
    assert!(caret_on_last_line(text, Some(&Caret::Offset { offset: 99 })));
    assert!(caret_on_first_line("héllo", Some(&Caret::Offset { offset: 2 })));
}

#[test]
fn test_caret_line_detection_from_geometry() {
    let element = Rect {
        left: 0.0,
        top: 100.0,
        right: 500.0,
        bottom: 160.0,
    };
    let caret = |top: f64| Caret::Geometry {
        caret: Rect {
            left: 10.0,
            top,
            right: 11.0,
            bottom: top + 18.0,
        },
        element,
        line_height: 20.0,
    };
    assert!(caret_on_first_line("", Some(&caret(102.0))));
    assert!(!caret_on_first_line("", Some(&caret(140.0))));
    assert!(caret_on_last_line("", Some(&caret(140.0))));
    assert!(!caret_on_last_line("", Some(&caret(102.0))));
}

#[test]
fn test_arrow_keys_move_between_blocks_only_at_edges() {
    let mut editor = editor_with(&["a", "line one\nline two", "c"]);
    editor.focus(1).unwrap();

    let up_mid = KeyInput::with_caret(Key::ArrowUp, Caret::Offset { offset: 12 });
    assert_eq!(editor.handle_key(up_mid).unwrap(), KeyOutcome::Ignored);
    assert_eq!(editor.focused(), Some(1));

    let down_first = KeyInput::with_caret(Key::ArrowDown, Caret::Offset { offset: 2 });
    assert_eq!(editor.handle_key(down_first).unwrap(), KeyOutcome::Ignored);

    let down_last = KeyInput::with_caret(Key::ArrowDown, Caret::Offset { offset: 12 });
    assert_eq!(editor.handle_key(down_last).unwrap(), KeyOutcome::Handled);
    assert_eq!(editor.focused(), Some(2));

    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.focused(), Some(2));

    editor.handle_key(KeyInput::plain(Key::ArrowUp)).unwrap();
    assert_eq!(editor.focused(), Some(1));
}

// ============================================================================
// Structured blocks
// ============================================================================

#[test]
fn test_list_navigation_delegates_at_edges() {
    let list = Block::with_content(BlockContent::List {
        items: vec!["one".into(), "two".into()],
        ordered: false,
    });
    let mut editor = EditorState::new(vec![text("above"), list, text("below")]);
    editor.focus(0).unwrap();

    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Item { index: 0 }));

    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Item { index: 1 }));

    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.focused(), Some(2));

    editor.handle_key(KeyInput::plain(Key::ArrowUp)).unwrap();
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Item { index: 1 }));
}

#[test]
fn test_list_enter_and_backspace_edit_items() {
    let list = Block::with_content(BlockContent::List {
        items: vec!["one".into()],
        ordered: true,
    });
    let mut editor = EditorState::new(vec![list]);
    editor.focus(0).unwrap();
    editor.focus_inner(InnerFocus::Item { index: 0 }).unwrap();

    editor.handle_key(KeyInput::plain(Key::Enter)).unwrap();
    assert_eq!(
        editor.blocks()[0].content,
        BlockContent::List {
            items: vec!["one".into(), String::new()],
            ordered: true
        }
    );
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Item { index: 1 }));

    editor.handle_key(KeyInput::plain(Key::Backspace)).unwrap();
    assert_eq!(
        editor.blocks()[0].content,
        BlockContent::List {
            items: vec!["one".into()],
            ordered: true
        }
    );
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Item { index: 0 }));
    assert_eq!(editor.blocks().len(), 1);
}

#[test]
fn test_backspace_in_single_empty_item_deletes_block() {
    let mut editor = EditorState::new(vec![text("a"), Block::new(BlockKind::Todo)]);
    editor.focus(1).unwrap();
    editor.handle_key(KeyInput::plain(Key::Backspace)).unwrap();
    assert_eq!(texts(&editor), vec!["a"]);
    assert_eq!(editor.focused(), Some(0));
}

#[test]
fn test_todo_tab_moves_adds_and_toggles() {
    let todo = Block::with_content(BlockContent::Todo {
        items: vec![TodoItem {
            text: "write".into(),
            completed: false,
        }],
    });
    let mut editor = EditorState::new(vec![todo]);
    editor.focus(0).unwrap();

    let mut shift_tab = KeyInput::plain(Key::Tab);
    shift_tab.shift = true;
    editor.handle_key(shift_tab).unwrap();
    match &editor.blocks()[0].content {
        BlockContent::Todo { items } => assert!(items[0].completed),
        other => panic!("unexpected {:?}", other),
    }

    editor.handle_key(KeyInput::plain(Key::Tab)).unwrap();
    match &editor.blocks()[0].content {
        BlockContent::Todo { items } => assert_eq!(items.len(), 2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Item { index: 1 }));
}

#[test]
fn test_table_tab_and_arrow_navigation() {
    let table = Block::with_content(BlockContent::Table {
        headers: vec!["h1".into(), "h2".into()],
        rows: vec![vec!["a".into(), "b".into()]],
    });
    let mut editor = EditorState::new(vec![text("above"), table, text("below")]);
    editor.focus(1).unwrap();
    editor.focus_inner(InnerFocus::Cell { row: 0, col: 0 }).unwrap();

    editor.handle_key(KeyInput::plain(Key::Tab)).unwrap();
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Cell { row: 0, col: 1 }));
    editor.handle_key(KeyInput::plain(Key::Tab)).unwrap();
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Cell { row: 1, col: 0 }));

    let mut shift_tab = KeyInput::plain(Key::Tab);
    shift_tab.shift = true;
    editor.handle_key(shift_tab).unwrap();
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Cell { row: 0, col: 1 }));

    editor.handle_key(KeyInput::plain(Key::ArrowUp)).unwrap();
    assert_eq!(editor.focused(), Some(0));

    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.focused(), Some(1));
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Cell { row: 0, col: 0 }));

    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.inner_focus(), Some(InnerFocus::Cell { row: 1, col: 0 }));
    editor.handle_key(KeyInput::plain(Key::ArrowDown)).unwrap();
    assert_eq!(editor.focused(), Some(2));
}

#[test]
fn test_enter_on_last_table_row_creates_block() {
    let mut editor = EditorState::new(vec![Block::new(BlockKind::Table)]);
    editor.focus(0).unwrap();
    editor.focus_inner(InnerFocus::Cell { row: 1, col: 1 }).unwrap();
    editor.handle_key(KeyInput::plain(Key::Enter)).unwrap();
    assert_eq!(editor.blocks().len(), 2);
    assert_eq!(editor.focused(), Some(1));
}

#[test]
fn test_focus_inner_rejects_bad_positions() {
    let mut editor = EditorState::new(vec![Block::new(BlockKind::Table)]);
    assert!(editor.focus_inner(InnerFocus::Cell { row: 0, col: 0 }).is_err());
    editor.focus(0).unwrap();
    assert!(editor.focus_inner(InnerFocus::Cell { row: 2, col: 0 }).is_err());
    assert!(editor.focus_inner(InnerFocus::Item { index: 0 }).is_err());
}
