//! Slash commands: typing `/` at the start of a text block opens a menu
//! that switches the block to another type.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::blocks::BlockKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlashCommand {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub icon: &'static str,
    pub keywords: &'static [&'static str],
    pub shortcut: &'static str,
}

pub static SLASH_COMMANDS: &[SlashCommand] = &[
    SlashCommand {
        id: "text",
        label: "Text",
        description: "Plain text block",
        kind: BlockKind::Text,
        icon: "📝",
        keywords: &["text", "paragraph", "plain"],
        shortcut: "/text",
    },
    SlashCommand {
        id: "h1",
        label: "Heading 1",
        description: "Main heading (H1)",
        kind: BlockKind::H1,
        icon: "📋",
        keywords: &["heading", "title", "h1", "header"],
        shortcut: "/h1",
    },
    SlashCommand {
        id: "h2",
        label: "Heading 2",
        description: "Subheading (H2)",
        kind: BlockKind::H2,
        icon: "📄",
        keywords: &["heading", "title", "h2", "subtitle"],
        shortcut: "/h2",
    },
    SlashCommand {
        id: "h3",
        label: "Heading 3",
        description: "Minor heading (H3)",
        kind: BlockKind::H3,
        icon: "📃",
        keywords: &["heading", "title", "h3", "subheading"],
        shortcut: "/h3",
    },
    SlashCommand {
        id: "list",
        label: "List",
        description: "Bulleted or numbered list",
        kind: BlockKind::List,
        icon: "📋",
        keywords: &["list", "bullet", "numbered"],
        shortcut: "/list",
    },
    SlashCommand {
        id: "quote",
        label: "Quote",
        description: "Quotation block",
        kind: BlockKind::Quote,
        icon: "💬",
        keywords: &["quote", "citation", "blockquote"],
        shortcut: "/quote",
    },
    SlashCommand {
        id: "code",
        label: "Code",
        description: "Code block with syntax highlighting",
        kind: BlockKind::Code,
        icon: "💻",
        keywords: &["code", "programming", "snippet"],
        shortcut: "/code",
    },
    SlashCommand {
        id: "image",
        label: "Image",
        description: "Insert an image",
        kind: BlockKind::Image,
        icon: "🖼️",
        keywords: &["image", "picture", "photo", "img"],
        shortcut: "/image",
    },
    SlashCommand {
        id: "table",
        label: "Table",
        description: "Table with rows and columns",
        kind: BlockKind::Table,
        icon: "📊",
        keywords: &["table", "grid"],
        shortcut: "/table",
    },
    SlashCommand {
        id: "todo",
        label: "Todo",
        description: "Checklist for tasks",
        kind: BlockKind::Todo,
        icon: "☑️",
        keywords: &["todo", "task", "checkbox"],
        shortcut: "/todo",
    },
    SlashCommand {
        id: "separator",
        label: "Separator",
        description: "Horizontal rule between sections",
        kind: BlockKind::Separator,
        icon: "➖",
        keywords: &["separator", "divider", "line", "hr"],
        shortcut: "/separator",
    },
];

static LEADING_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/\w+)").expect("static slash regex"));

pub fn is_slash_command(text: &str) -> bool {
    text.starts_with('/')
}

/// Commands matching `query`. The query must start with `/`; a bare `/`
/// lists everything, otherwise a command matches on its exact shortcut or
/// when its label or any keyword contains the search term.
pub fn search_commands(query: &str) -> Vec<&'static SlashCommand> {
    let lower = query.trim().to_lowercase();
    let Some(term) = lower.strip_prefix('/') else {
        return Vec::new();
    };

    if term.is_empty() {
        return SLASH_COMMANDS.iter().collect();
    }

    SLASH_COMMANDS
        .iter()
        .filter(|cmd| {
            cmd.shortcut[1..] == *term
                || cmd.label.to_lowercase().contains(term)
                || cmd.keywords.iter().any(|k| k.to_lowercase().contains(term))
        })
        .collect()
}

pub fn exact_command(shortcut: &str) -> Option<&'static SlashCommand> {
    SLASH_COMMANDS.iter().find(|cmd| cmd.shortcut == shortcut)
}

/// The `/word` at the start of `text`, if any.
pub fn extract_slash_command(text: &str) -> Option<&str> {
    LEADING_COMMAND
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
