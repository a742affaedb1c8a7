use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Prefix of every dedup key written to the destination.
pub const DEDUP_KEY_PREFIX: &str = "pocket:recording:";

const UNTITLED: &str = "Untitled Recording";
const TITLE_MAX_CHARS: usize = 60;

/// One voice note with the AI-derived content attached to it. This is the
/// unit of sync: one recording becomes at most one destination row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    pub id: String,
    pub title: Option<String>,
    /// Markdown.
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub tags: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub outline: Vec<OutlineNode>,
    pub created_at: Option<OffsetDateTime>,
    pub duration_seconds: Option<u64>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionItem {
    pub label: String,
    pub priority: Option<String>,
    pub due_date: Option<OffsetDateTime>,
    pub assignee: Option<String>,
    pub context: Option<String>,
    pub item_type: Option<String>,
}

/// Node of the hierarchical outline ("mind map"). A node whose parent id is
/// its own id is a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlineNode {
    pub node_id: String,
    pub parent_node_id: Option<String>,
    pub title: String,
}

impl OutlineNode {
    pub fn is_root(&self) -> bool {
        self.parent_node_id.as_deref() == Some(self.node_id.as_str())
    }
}

impl ActionItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

impl Recording {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sole authority for "already synced".
    pub fn dedup_key(&self) -> String {
        dedup_key_for(&self.id)
    }

    pub fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        let first_sentence = self
            .summary
            .as_deref()
            .and_then(|summary| summary.split('.').next())
            .map(str::trim)
            .unwrap_or_default();
        if first_sentence.is_empty() {
            return UNTITLED.to_string();
        }
        truncate_with_ellipsis(first_sentence, TITLE_MAX_CHARS)
    }

    /// True once upstream AI processing has produced at least one piece of
    /// derived content. Records that are not ready are left for a later cycle.
    pub fn is_ready(&self) -> bool {
        let has_summary = self
            .summary
            .as_deref()
            .is_some_and(|summary| !summary.trim().is_empty());
        has_summary || !self.action_items.is_empty() || !self.outline.is_empty()
    }
}

pub fn dedup_key_for(id: &str) -> String {
    if id.starts_with(DEDUP_KEY_PREFIX) {
        id.to_string()
    } else {
        format!("{DEDUP_KEY_PREFIX}{id}")
    }
}

/// Keeps at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Parses the timestamp shapes the Pocket API emits. Values without an offset
/// are taken as UTC; bare dates are midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }
    let normalized = value.replacen(' ', "T", 1);
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let naive_fraction =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    if let Ok(parsed) = PrimitiveDateTime::parse(&normalized, naive)
        .or_else(|_| PrimitiveDateTime::parse(&normalized, naive_fraction))
    {
        return Some(parsed.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(value, date_only)
        .ok()
        .map(|date| date.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn dedup_key_is_prefixed_and_idempotent() {
        let rec = Recording::new("abc-123");
        assert_eq!(rec.dedup_key(), "pocket:recording:abc-123");
        assert_eq!(dedup_key_for(&rec.dedup_key()), rec.dedup_key());
    }

    #[test]
    fn display_title_prefers_trimmed_title() {
        let mut rec = Recording::new("1");
        rec.title = Some("  Standup notes ".into());
        rec.summary = Some("Ignored. Really.".into());
        assert_eq!(rec.display_title(), "Standup notes");
    }

    #[test]
    fn display_title_falls_back_to_first_sentence() {
        let mut rec = Recording::new("1");
        rec.title = Some("   ".into());
        rec.summary = Some("Discussed the roadmap. Then lunch.".into());
        assert_eq!(rec.display_title(), "Discussed the roadmap");
    }

    #[test]
    fn display_title_truncates_long_sentences() {
        let mut rec = Recording::new("1");
        rec.summary = Some("a".repeat(80));
        let title = rec.display_title();
        assert_eq!(title.chars().count(), 60);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn display_title_uses_fallback_literal() {
        assert_eq!(Recording::new("1").display_title(), "Untitled Recording");
        let mut rec = Recording::new("2");
        rec.summary = Some(". starts with a dot".into());
        assert_eq!(rec.display_title(), "Untitled Recording");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(70);
        let out = truncate_with_ellipsis(&text, 60);
        assert_eq!(out.chars().count(), 60);
    }

    #[test]
    fn readiness_requires_derived_content() {
        let mut rec = Recording::new("1");
        rec.title = Some("Has a title".into());
        rec.transcript = Some("raw words".into());
        assert!(!rec.is_ready());

        rec.summary = Some("   \n".into());
        assert!(!rec.is_ready());

        rec.summary = Some("Done".into());
        assert!(rec.is_ready());

        let mut with_actions = Recording::new("2");
        with_actions.action_items.push(ActionItem::new("Call Bob"));
        assert!(with_actions.is_ready());

        let mut with_outline = Recording::new("3");
        with_outline.outline.push(OutlineNode {
            node_id: "n1".into(),
            parent_node_id: Some("n1".into()),
            title: "Root".into(),
        });
        assert!(with_outline.is_ready());
    }

    #[test]
    fn outline_root_points_at_itself() {
        let root = OutlineNode {
            node_id: "a".into(),
            parent_node_id: Some("a".into()),
            title: "Root".into(),
        };
        let child = OutlineNode {
            node_id: "b".into(),
            parent_node_id: Some("a".into()),
            title: "Child".into(),
        };
        assert!(root.is_root());
        assert!(!child.is_root());
    }

    #[test]
    fn parses_timestamp_variants() {
        assert_eq!(
            parse_timestamp("2026-02-06T14:00:00Z"),
            Some(datetime!(2026-02-06 14:00:00 UTC))
        );
        assert_eq!(
            parse_timestamp("2026-02-06T14:00:00+02:00"),
            Some(datetime!(2026-02-06 12:00:00 UTC))
        );
        assert_eq!(
            parse_timestamp("2026-02-06T14:00:00.250"),
            Some(datetime!(2026-02-06 14:00:00.25 UTC))
        );
        assert_eq!(
            parse_timestamp("2026-02-06 14:00:00"),
            Some(datetime!(2026-02-06 14:00:00 UTC))
        );
        assert_eq!(
            parse_timestamp("2026-02-10"),
            Some(datetime!(2026-02-10 0:00 UTC))
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
