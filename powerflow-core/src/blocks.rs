use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::page::Icon;
use crate::recording::truncate_with_ellipsis;

/// Longest text a single rich-text run may carry.
pub const RICH_TEXT_MAX_CHARS: usize = 1900;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    #[default]
    Default,
    Gray,
    Blue,
    Red,
    Yellow,
    GrayBackground,
    RedBackground,
    YellowBackground,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum TextKind {
    Text,
}

/// A styled run of text. Content longer than [`RICH_TEXT_MAX_CHARS`] is cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RichText {
    #[serde(rename = "type")]
    kind: TextKind,
    pub text: TextContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl RichText {
    pub fn plain(content: &str) -> Self {
        Self {
            kind: TextKind::Text,
            text: TextContent {
                content: truncate_with_ellipsis(content, RICH_TEXT_MAX_CHARS),
                link: None,
            },
            annotations: None,
        }
    }

    pub fn bold(content: &str) -> Self {
        let mut text = Self::plain(content);
        text.annotations = Some(Annotations {
            bold: true,
            ..Annotations::default()
        });
        text
    }

    pub fn with_link(mut self, url: &str) -> Self {
        self.text.link = Some(Link {
            url: url.to_string(),
        });
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        if color != Color::Default {
            self.annotations.get_or_insert_with(Annotations::default).color = color;
        }
        self
    }

    pub fn content(&self) -> &str {
        &self.text.content
    }

    pub fn is_bold(&self) -> bool {
        self.annotations.as_ref().is_some_and(|a| a.bold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBody {
    pub rich_text: Vec<RichText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadingBody {
    pub rich_text: Vec<RichText>,
    pub color: Color,
    pub is_toggleable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToDoBody {
    pub rich_text: Vec<RichText>,
    pub checked: bool,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalloutBody {
    pub rich_text: Vec<RichText>,
    pub icon: Icon,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Empty {}

/// Page body block, serialized as `{"type": kind, kind: body}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(TextBody),
    Heading3(HeadingBody),
    BulletedListItem(TextBody),
    ToDo(ToDoBody),
    Toggle(TextBody),
    Quote(TextBody),
    Callout(CalloutBody),
    Divider,
}

impl Block {
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Paragraph(_) => "paragraph",
            Block::Heading3(_) => "heading_3",
            Block::BulletedListItem(_) => "bulleted_list_item",
            Block::ToDo(_) => "to_do",
            Block::Toggle(_) => "toggle",
            Block::Quote(_) => "quote",
            Block::Callout(_) => "callout",
            Block::Divider => "divider",
        }
    }

    pub fn paragraph(rich_text: Vec<RichText>) -> Self {
        Block::Paragraph(text_body(rich_text, Vec::new()))
    }

    pub fn heading_3(rich_text: Vec<RichText>) -> Self {
        Block::Heading3(HeadingBody {
            rich_text,
            color: Color::Default,
            is_toggleable: false,
        })
    }

    pub fn bullet(rich_text: Vec<RichText>) -> Self {
        Block::BulletedListItem(text_body(rich_text, Vec::new()))
    }

    /// Bullet rendered as `**label:** value`.
    pub fn labeled_bullet(label: &str, value: &str) -> Self {
        Self::bullet(vec![
            RichText::bold(&format!("{label}: ")),
            RichText::plain(value),
        ])
    }

    pub fn to_do(text: &str) -> Self {
        Block::ToDo(ToDoBody {
            rich_text: vec![RichText::plain(text)],
            checked: false,
            color: Color::Default,
        })
    }

    pub fn toggle(title: &str, children: Vec<Block>) -> Self {
        Block::Toggle(text_body(vec![RichText::plain(title)], children))
    }

    pub fn quote(text: &str) -> Self {
        Block::Quote(TextBody {
            rich_text: vec![RichText::plain(text)],
            color: Some(Color::Default),
            children: Vec::new(),
        })
    }

    pub fn callout(text: &str, icon: Icon, color: Color) -> Self {
        Block::Callout(CalloutBody {
            rich_text: vec![RichText::plain(text)],
            icon,
            color,
        })
    }

    pub fn rich_text(&self) -> &[RichText] {
        match self {
            Block::Paragraph(body)
            | Block::BulletedListItem(body)
            | Block::Toggle(body)
            | Block::Quote(body) => &body.rich_text,
            Block::Heading3(body) => &body.rich_text,
            Block::ToDo(body) => &body.rich_text,
            Block::Callout(body) => &body.rich_text,
            Block::Divider => &[],
        }
    }

    pub fn plain_text(&self) -> String {
        self.rich_text().iter().map(RichText::content).collect()
    }

    pub fn children(&self) -> &[Block] {
        match self {
            Block::Paragraph(body)
            | Block::BulletedListItem(body)
            | Block::Toggle(body)
            | Block::Quote(body) => &body.children,
            _ => &[],
        }
    }
}

fn text_body(rich_text: Vec<RichText>, children: Vec<Block>) -> TextBody {
    TextBody {
        rich_text,
        color: None,
        children,
    }
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = self.kind();
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", kind)?;
        match self {
            Block::Paragraph(body)
            | Block::BulletedListItem(body)
            | Block::Toggle(body)
            | Block::Quote(body) => map.serialize_entry(kind, body)?,
            Block::Heading3(body) => map.serialize_entry(kind, body)?,
            Block::ToDo(body) => map.serialize_entry(kind, body)?,
            Block::Callout(body) => map.serialize_entry(kind, body)?,
            Block::Divider => map.serialize_entry(kind, &Empty {})?,
        }
        map.end()
    }
}

/// Splits `**bold**` spans into separate runs.
pub fn parse_bold_segments(text: &str) -> Vec<RichText> {
    let mut runs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        let Some(len) = after.find("**") else {
            break;
        };
        let inner = &after[..len];
        if inner.is_empty() || inner.contains('*') {
            // Not a bold span; keep the opening marker as literal text.
            let literal_end = start + 2;
            push_plain(&mut runs, &rest[..literal_end]);
            rest = &rest[literal_end..];
            continue;
        }
        push_plain(&mut runs, &rest[..start]);
        runs.push(RichText::bold(inner));
        rest = &after[len + 2..];
    }
    push_plain(&mut runs, rest);
    if runs.is_empty() {
        runs.push(RichText::plain(text));
    }
    merge_plain_runs(runs)
}

fn push_plain(runs: &mut Vec<RichText>, text: &str) {
    if !text.is_empty() {
        runs.push(RichText::plain(text));
    }
}

fn merge_plain_runs(runs: Vec<RichText>) -> Vec<RichText> {
    let mut merged: Vec<RichText> = Vec::with_capacity(runs.len());
    for run in runs {
        match merged.last_mut() {
            Some(last) if !last.is_bold() && !run.is_bold() => {
                let joined = format!("{}{}", last.content(), run.content());
                *last = RichText::plain(&joined);
            }
            _ => merged.push(run),
        }
    }
    merged
}

/// Converts summary markdown into blocks: `### ` headings, `- ` bullets
/// (indented or not) and paragraphs. Blank lines are dropped.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    markdown
        .trim()
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            if let Some(heading) = line.strip_prefix("### ") {
                Block::heading_3(parse_bold_segments(heading.trim()))
            } else if let Some(item) = line.trim_start().strip_prefix("- ") {
                Block::bullet(parse_bold_segments(item.trim()))
            } else {
                Block::paragraph(parse_bold_segments(line))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blocks_serialize_with_type_key() {
        assert_eq!(
            serde_json::to_value(Block::Divider).unwrap(),
            json!({"type": "divider", "divider": {}})
        );
        assert_eq!(
            serde_json::to_value(Block::to_do("Ship it")).unwrap(),
            json!({
                "type": "to_do",
                "to_do": {
                    "rich_text": [{"type": "text", "text": {"content": "Ship it"}}],
                    "checked": false,
                    "color": "default"
                }
            })
        );
    }

    #[test]
    fn toggle_carries_children() {
        let toggle = Block::toggle("Details", vec![Block::paragraph(vec![RichText::plain("x")])]);
        let value = serde_json::to_value(&toggle).unwrap();
        assert_eq!(value["toggle"]["children"][0]["type"], "paragraph");
        assert_eq!(toggle.children().len(), 1);

        let empty = serde_json::to_value(Block::toggle("Empty", Vec::new())).unwrap();
        assert!(empty["toggle"].get("children").is_none());
    }

    #[test]
    fn rich_text_is_truncated() {
        let long = "x".repeat(5000);
        let text = RichText::plain(&long);
        assert_eq!(text.content().chars().count(), RICH_TEXT_MAX_CHARS);
        assert!(text.content().ends_with("..."));
    }

    #[test]
    fn links_and_colors_serialize() {
        let text = RichText::plain("Open").with_link("https://example.com").with_color(Color::Blue);
        assert_eq!(
            serde_json::to_value(&text).unwrap(),
            json!({
                "type": "text",
                "text": {"content": "Open", "link": {"url": "https://example.com"}},
                "annotations": {
                    "bold": false, "italic": false, "strikethrough": false,
                    "underline": false, "code": false, "color": "blue"
                }
            })
        );
    }

    #[test]
    fn bold_segments_are_split() {
        let runs = parse_bold_segments("Hello **world** and **foo**!");
        let parts: Vec<(&str, bool)> = runs.iter().map(|r| (r.content(), r.is_bold())).collect();
        assert_eq!(
            parts,
            vec![
                ("Hello ", false),
                ("world", true),
                (" and ", false),
                ("foo", true),
                ("!", false)
            ]
        );
    }

    #[test]
    fn unmatched_markers_stay_literal() {
        let runs = parse_bold_segments("a ** b");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].content(), "a ** b");
        assert!(!runs[0].is_bold());
    }

    #[test]
    fn markdown_maps_to_block_kinds() {
        let blocks = markdown_to_blocks("### Key **points**\n\n- First\n  - Nested\nPlain line\n");
        let kinds: Vec<&str> = blocks.iter().map(Block::kind).collect();
        assert_eq!(
            kinds,
            vec!["heading_3", "bulleted_list_item", "bulleted_list_item", "paragraph"]
        );
        assert_eq!(blocks[0].plain_text(), "Key points");
        assert!(blocks[0].rich_text()[1].is_bold());
        assert_eq!(blocks[2].plain_text(), "Nested");
        assert!(markdown_to_blocks("  \n\n").is_empty());
    }
}
