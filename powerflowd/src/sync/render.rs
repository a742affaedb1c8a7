use std::collections::{HashMap, HashSet};

use powerflow_core::{
    ActionItem, Block, Color, Icon, NewPage, OutlineNode, PropertyValue, Recording, RichText,
    markdown_to_blocks,
};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::config::PropertyMap;

const DEFAULT_EMOJI: &str = "🎙️";
const TAG_EMOJI: [(&str, &str); 10] = [
    ("work", "💼"),
    ("meeting", "📅"),
    ("idea", "💡"),
    ("reminder", "⏰"),
    ("personal", "👤"),
    ("task", "✅"),
    ("note", "📝"),
    ("question", "❓"),
    ("important", "⭐"),
    ("urgent", "🔥"),
];
const TRANSCRIPT_PREVIEW_CHARS: usize = 500;
const MAX_OUTLINE_DEPTH: usize = 32;
/// Notion rejects nested `children` arrays longer than this.
const MAX_NESTED_CHILDREN: usize = 100;

/// Properties, body and icon for a new destination row.
pub fn render_page(recording: &Recording, map: &PropertyMap) -> NewPage {
    NewPage {
        properties: properties(recording, map),
        children: body_blocks(recording),
        icon: Some(icon_for(recording)),
    }
}

pub fn properties(recording: &Recording, map: &PropertyMap) -> HashMap<String, PropertyValue> {
    let mut props = HashMap::new();
    props.insert(
        map.title.clone(),
        PropertyValue::title(&recording.display_title()),
    );
    props.insert(
        map.dedup_key.clone(),
        PropertyValue::rich_text(&recording.dedup_key()),
    );

    let mut put = |column: &Option<String>, value: Option<PropertyValue>| {
        if let (Some(column), Some(value)) = (column, value) {
            props.insert(column.clone(), value);
        }
    };
    put(
        &map.source_url,
        recording.source_url.as_deref().and_then(PropertyValue::url),
    );
    put(&map.tags, tags_value(&recording.tags));
    put(
        &map.priority,
        highest_priority(&recording.action_items).and_then(|p| PropertyValue::select(&p)),
    );
    put(
        &map.due_date,
        earliest_due(&recording.action_items).map(PropertyValue::date),
    );
    put(
        &map.context,
        first_context(&recording.action_items).map(PropertyValue::rich_text),
    );
    props
}

/// Tags de-duplicated case-insensitively; first spelling wins.
fn tags_value(tags: &[String]) -> Option<PropertyValue> {
    let mut seen = HashSet::new();
    let unique: Vec<&str> = tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.to_lowercase()))
        .collect();
    PropertyValue::multi_select(unique)
}

fn priority_rank(priority: &str) -> Option<(u8, &'static str)> {
    match priority.trim().to_ascii_lowercase().as_str() {
        "high" => Some((3, "High")),
        "medium" => Some((2, "Medium")),
        "low" => Some((1, "Low")),
        _ => None,
    }
}

fn highest_priority(items: &[ActionItem]) -> Option<String> {
    let ranked = items
        .iter()
        .filter_map(|item| item.priority.as_deref().and_then(priority_rank))
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, name)| name.to_string());
    ranked.or_else(|| {
        items
            .iter()
            .find_map(|item| item.priority.as_deref().map(str::trim))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    })
}

fn earliest_due(items: &[ActionItem]) -> Option<OffsetDateTime> {
    items.iter().filter_map(|item| item.due_date).min()
}

fn first_context(items: &[ActionItem]) -> Option<&str> {
    items
        .iter()
        .filter_map(|item| item.context.as_deref())
        .map(str::trim)
        .find(|context| !context.is_empty())
}

pub fn icon_for(recording: &Recording) -> Icon {
    let emoji = recording
        .tags
        .iter()
        .find_map(|tag| {
            let normalized = tag.trim().to_lowercase();
            TAG_EMOJI
                .iter()
                .find(|(name, _)| *name == normalized)
                .map(|(_, emoji)| *emoji)
        })
        .unwrap_or(DEFAULT_EMOJI);
    Icon::emoji(emoji)
}

/// Summary, action items, outline, then collapsed source details.
pub fn body_blocks(recording: &Recording) -> Vec<Block> {
    let mut blocks = Vec::new();

    if let Some(summary) = recording.summary.as_deref() {
        blocks.extend(markdown_to_blocks(summary));
    }

    if !recording.action_items.is_empty() {
        blocks.push(Block::heading_3(vec![RichText::plain("Action Items")]));
        blocks.extend(recording.action_items.iter().map(|item| Block::to_do(&action_line(item))));
    }

    let outline = cap_nested(outline_blocks(&recording.outline));
    if !outline.is_empty() {
        blocks.push(Block::toggle("🧠 Mind Map", outline));
    }

    blocks.push(Block::Divider);

    let details = source_details(recording);
    if !details.is_empty() {
        blocks.push(Block::toggle("📎 Source Details", details));
    }
    blocks
}

fn action_line(item: &ActionItem) -> String {
    let mut line = item.label.clone();
    if let Some(priority) = item.priority.as_deref() {
        line.push_str(&format!(" [{priority}]"));
    }
    if let Some(due) = item.due_date {
        let format = format_description!("[month repr:short] [day]");
        if let Ok(due) = due.format(format) {
            line.push_str(&format!(" — due {due}"));
        }
    }
    line
}

/// Nodes whose parent is absent from the outline are shown as roots.
fn outline_blocks(nodes: &[OutlineNode]) -> Vec<Block> {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&OutlineNode>> = HashMap::new();
    let mut roots = Vec::new();
    for node in nodes {
        match node.parent_node_id.as_deref() {
            Some(parent) if !node.is_root() && ids.contains(parent) => {
                children.entry(parent).or_default().push(node);
            }
            _ => roots.push(node),
        }
    }

    let mut blocks = Vec::new();
    let mut visited = HashSet::new();
    for root in roots {
        push_outline_node(root, 0, &children, &mut visited, &mut blocks);
    }
    blocks
}

fn cap_nested(mut blocks: Vec<Block>) -> Vec<Block> {
    if blocks.len() <= MAX_NESTED_CHILDREN {
        return blocks;
    }
    let hidden = blocks.len() - (MAX_NESTED_CHILDREN - 1);
    blocks.truncate(MAX_NESTED_CHILDREN - 1);
    blocks.push(Block::paragraph(vec![RichText::plain(&format!(
        "… and {hidden} more"
    ))]));
    blocks
}

fn push_outline_node<'a>(
    node: &'a OutlineNode,
    depth: usize,
    children: &HashMap<&str, Vec<&'a OutlineNode>>,
    visited: &mut HashSet<&'a str>,
    blocks: &mut Vec<Block>,
) {
    if depth > MAX_OUTLINE_DEPTH || !visited.insert(node.node_id.as_str()) {
        return;
    }
    if depth == 0 {
        blocks.push(Block::bullet(vec![RichText::bold(&node.title)]));
    } else {
        let indent = "    ".repeat(depth - 1);
        blocks.push(Block::bullet(vec![RichText::plain(&format!(
            "{indent}↳ {}",
            node.title
        ))]));
    }
    for child in children.get(node.node_id.as_str()).into_iter().flatten() {
        push_outline_node(child, depth + 1, children, visited, blocks);
    }
}

fn source_details(recording: &Recording) -> Vec<Block> {
    let mut details = Vec::new();
    if let Some(seconds) = recording.duration_seconds.filter(|s| *s > 0) {
        details.push(Block::labeled_bullet("Duration", &format_duration(seconds)));
    }
    if let Some(created) = recording.created_at {
        let format = format_description!(
            "[month repr:short] [day], [year] at [hour repr:12]:[minute] [period]"
        );
        if let Ok(captured) = created.format(format) {
            details.push(Block::labeled_bullet("Captured", &captured));
        }
    }
    if let Some(url) = recording.source_url.as_deref() {
        details.push(Block::paragraph(vec![
            RichText::plain("Open in Pocket AI →")
                .with_link(url)
                .with_color(Color::Blue),
        ]));
    }
    if let Some(transcript) = recording.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
        details.push(Block::toggle(
            "📝 Full Transcript",
            vec![Block::paragraph(vec![RichText::plain(&transcript_preview(
                transcript,
            ))])],
        ));
    }
    details
}

fn transcript_preview(transcript: &str) -> String {
    if transcript.chars().count() <= TRANSCRIPT_PREVIEW_CHARS {
        return transcript.to_string();
    }
    let mut preview: String = transcript.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

/// `m:ss` under an hour, `h:mm:ss` above.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "Unknown".to_string();
    }
    let (minutes, secs) = (seconds / 60, seconds % 60);
    if minutes < 60 {
        return format!("{minutes}:{secs:02}");
    }
    let (hours, mins) = (minutes / 60, minutes % 60);
    format!("{hours}:{mins:02}:{secs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn node(id: &str, parent: &str, title: &str) -> OutlineNode {
        OutlineNode {
            node_id: id.into(),
            parent_node_id: Some(parent.into()),
            title: title.into(),
        }
    }

    fn sample() -> Recording {
        let mut rec = Recording::new("rec-1");
        rec.title = Some("Planning".into());
        rec.summary = Some("### Overview\n- **Budget** approved".into());
        rec.tags = vec!["Meeting".into(), "meeting ".into(), "work".into(), " ".into()];
        rec.action_items = vec![
            ActionItem {
                priority: Some("low".into()),
                due_date: Some(datetime!(2026-02-12 9:00 UTC)),
                ..ActionItem::new("Book room")
            },
            ActionItem {
                priority: Some("High".into()),
                due_date: Some(datetime!(2026-02-10 17:00 UTC)),
                context: Some("Send to finance".into()),
                ..ActionItem::new("Send deck")
            },
        ];
        rec.outline = vec![node("a", "a", "Plan"), node("b", "a", "Budget"), node("c", "b", "Q3")];
        rec.created_at = Some(datetime!(2026-02-06 14:05 UTC));
        rec.duration_seconds = Some(3725);
        rec.source_url = Some("https://heypocket.com/recordings/rec-1".into());
        rec.transcript = Some("t".repeat(600));
        rec
    }

    fn full_map() -> PropertyMap {
        PropertyMap {
            tags: Some("Tags".into()),
            ..PropertyMap::default()
        }
    }

    #[test]
    fn writes_mapped_properties() {
        let props = properties(&sample(), &full_map());
        let value = |name: &str| serde_json::to_value(&props[name]).unwrap();

        assert_eq!(value("Name")["title"][0]["text"]["content"], "Planning");
        assert_eq!(
            value("Inbox ID")["rich_text"][0]["text"]["content"],
            "pocket:recording:rec-1"
        );
        assert_eq!(value("Source"), json!({"url": "https://heypocket.com/recordings/rec-1"}));
        assert_eq!(
            value("Tags"),
            json!({"multi_select": [{"name": "Meeting"}, {"name": "work"}]})
        );
        assert_eq!(value("Priority"), json!({"select": {"name": "High"}}));
        assert_eq!(value("Due Date"), json!({"date": {"start": "2026-02-10"}}));
        assert_eq!(value("Context")["rich_text"][0]["text"]["content"], "Send to finance");
    }

    #[test]
    fn unmapped_or_empty_fields_are_left_out() {
        let map = PropertyMap {
            priority: None,
            due_date: None,
            context: None,
            source_url: None,
            tags: None,
            ..PropertyMap::default()
        };
        let props = properties(&sample(), &map);
        assert_eq!(props.len(), 2);

        let bare = Recording::new("x");
        let props = properties(&bare, &full_map());
        let mut names: Vec<_> = props.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["Inbox ID", "Name"]);
    }

    #[test]
    fn icon_follows_first_known_tag() {
        assert_eq!(icon_for(&sample()), Icon::emoji("📅"));
        let mut rec = Recording::new("x");
        rec.tags = vec!["random".into(), " URGENT ".into()];
        assert_eq!(icon_for(&rec), Icon::emoji("🔥"));
        assert_eq!(icon_for(&Recording::new("y")), Icon::emoji("🎙️"));
    }

    #[test]
    fn body_has_expected_sections() {
        let blocks = body_blocks(&sample());
        let kinds: Vec<&str> = blocks.iter().map(Block::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "heading_3",
                "bulleted_list_item",
                "heading_3",
                "to_do",
                "to_do",
                "toggle",
                "divider",
                "toggle"
            ]
        );
        assert_eq!(blocks[3].plain_text(), "Book room [low] — due Feb 12");
        assert_eq!(blocks[4].plain_text(), "Send deck [High] — due Feb 10");

        let outline = blocks[5].children();
        assert_eq!(outline.len(), 3);
        assert!(outline[0].rich_text()[0].is_bold());
        assert_eq!(outline[1].plain_text(), "↳ Budget");
        assert_eq!(outline[2].plain_text(), "    ↳ Q3");

        let details = blocks[7].children();
        assert_eq!(details[0].plain_text(), "Duration: 1:02:05");
        assert_eq!(details[1].plain_text(), "Captured: Feb 06, 2026 at 02:05 PM");
        assert_eq!(details[2].plain_text(), "Open in Pocket AI →");
        let transcript = details[3].children()[0].plain_text();
        assert_eq!(transcript.chars().count(), 503);
        assert!(transcript.ends_with("..."));
    }

    #[test]
    fn minimal_recording_body_is_just_a_divider() {
        let blocks = body_blocks(&Recording::new("x"));
        assert_eq!(blocks, vec![Block::Divider]);
    }

    #[test]
    fn orphans_and_cycles_do_not_break_the_outline() {
        let nodes = vec![node("x", "missing", "Orphan"), node("p", "q", "P"), node("q", "p", "Q")];
        let blocks = outline_blocks(&nodes);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].plain_text(), "Orphan");
    }

    #[test]
    fn long_outlines_fit_in_one_toggle() {
        let mut rec = Recording::new("x");
        rec.outline = (0..150)
            .map(|i| OutlineNode {
                node_id: format!("n{i}"),
                parent_node_id: None,
                title: format!("Point {i}"),
            })
            .collect();
        let blocks = body_blocks(&rec);
        let outline = blocks[0].children();
        assert_eq!(outline.len(), 100);
        assert_eq!(outline[98].plain_text(), "Point 98");
        assert_eq!(outline[99].kind(), "paragraph");
        assert_eq!(outline[99].plain_text(), "… and 51 more");

        rec.outline.truncate(100);
        let outline = body_blocks(&rec)[0].children().to_vec();
        assert_eq!(outline.len(), 100);
        assert_eq!(outline[99].plain_text(), "Point 99");
    }

    #[test]
    fn durations_format_like_a_clock() {
        assert_eq!(format_duration(0), "Unknown");
        assert_eq!(format_duration(9), "0:09");
        assert_eq!(format_duration(154), "2:34");
        assert_eq!(format_duration(3923), "1:05:23");
    }
}
