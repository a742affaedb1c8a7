use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::blocks::{Block, RichText};

/// Value of one page property, serialized in the Notion property shape
/// (`{"select": {"name": ..}}`, `{"url": ..}` and so on).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Title(Vec<RichText>),
    RichText(Vec<RichText>),
    Url(String),
    Select(SelectOption),
    MultiSelect(Vec<SelectOption>),
    Date(DateValue),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateValue {
    pub start: String,
}

impl SelectOption {
    /// Option names cannot contain commas.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().replace(',', " "),
        }
    }
}

impl PropertyValue {
    pub fn title(text: &str) -> Self {
        PropertyValue::Title(vec![RichText::plain(text)])
    }

    pub fn rich_text(text: &str) -> Self {
        PropertyValue::RichText(vec![RichText::plain(text)])
    }

    /// `None` unless `value` parses as an absolute URL.
    pub fn url(value: &str) -> Option<Self> {
        url::Url::parse(value)
            .ok()
            .map(|_| PropertyValue::Url(value.to_string()))
    }

    pub fn select(name: &str) -> Option<Self> {
        let option = SelectOption::new(name);
        (!option.name.is_empty()).then_some(PropertyValue::Select(option))
    }

    pub fn multi_select<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let options: Vec<SelectOption> = names
            .into_iter()
            .map(SelectOption::new)
            .filter(|option| !option.name.is_empty())
            .collect();
        (!options.is_empty()).then_some(PropertyValue::MultiSelect(options))
    }

    /// Date-only value; the time of day is dropped.
    pub fn date(at: OffsetDateTime) -> Self {
        let format = format_description!("[year]-[month]-[day]");
        let start = at
            .date()
            .format(format)
            .unwrap_or_else(|_| at.date().to_string());
        PropertyValue::Date(DateValue { start })
    }
}

/// Column type in a database schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Title,
    RichText,
    Url,
    Select,
    MultiSelect,
    Date,
    Checkbox,
    Number,
    #[serde(other)]
    Other,
}

impl PropertyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Url => "url",
            PropertyKind::Select => "select",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::Date => "date",
            PropertyKind::Checkbox => "checkbox",
            PropertyKind::Number => "number",
            PropertyKind::Other => "other",
        }
    }

    /// Schema payload used when adding a column of this kind. `None` for
    /// kinds that cannot be created that way.
    pub fn schema_config(self) -> Option<Value> {
        let config = match self {
            PropertyKind::RichText => json!({"rich_text": {}}),
            PropertyKind::Url => json!({"url": {}}),
            PropertyKind::Select => json!({"select": {"options": []}}),
            PropertyKind::MultiSelect => json!({"multi_select": {"options": []}}),
            PropertyKind::Date => json!({"date": {}}),
            PropertyKind::Checkbox => json!({"checkbox": {}}),
            PropertyKind::Number => json!({"number": {}}),
            PropertyKind::Title | PropertyKind::Other => return None,
        };
        Some(config)
    }
}

/// Page icon. Only emoji icons are produced; anything else reads as
/// [`Icon::Unsupported`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Icon {
    Emoji { emoji: String },
    #[serde(other)]
    Unsupported,
}

impl Icon {
    pub fn emoji(emoji: &str) -> Self {
        Icon::Emoji {
            emoji: emoji.to_string(),
        }
    }

    pub fn as_emoji(&self) -> Option<&str> {
        match self {
            Icon::Emoji { emoji } => Some(emoji),
            Icon::Unsupported => None,
        }
    }
}

/// Everything needed to create one database row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub properties: HashMap<String, PropertyValue>,
    pub children: Vec<Block>,
    pub icon: Option<Icon>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn property_values_use_notion_shapes() {
        assert_eq!(
            serde_json::to_value(PropertyValue::title("Standup")).unwrap(),
            json!({"title": [{"type": "text", "text": {"content": "Standup"}}]})
        );
        assert_eq!(
            serde_json::to_value(PropertyValue::select("High").unwrap()).unwrap(),
            json!({"select": {"name": "High"}})
        );
        assert_eq!(
            serde_json::to_value(PropertyValue::date(datetime!(2026-02-10 18:30 UTC))).unwrap(),
            json!({"date": {"start": "2026-02-10"}})
        );
        assert_eq!(
            serde_json::to_value(PropertyValue::multi_select(["work", " ", "a,b"]).unwrap())
                .unwrap(),
            json!({"multi_select": [{"name": "work"}, {"name": "a b"}]})
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PropertyValue::url("not a url").is_none());
        assert!(PropertyValue::url("https://heypocket.com/recordings/1").is_some());
        assert!(PropertyValue::select("  ").is_none());
        assert!(PropertyValue::multi_select(Vec::<&str>::new()).is_none());
    }

    #[test]
    fn unknown_kinds_and_icons_deserialize() {
        let kind: PropertyKind = serde_json::from_value(json!("formula")).unwrap();
        assert_eq!(kind, PropertyKind::Other);
        assert!(kind.schema_config().is_none());
        assert_eq!(
            PropertyKind::MultiSelect.schema_config(),
            Some(json!({"multi_select": {"options": []}}))
        );

        let icon: Icon = serde_json::from_value(json!({"type": "emoji", "emoji": "📄"})).unwrap();
        assert_eq!(icon.as_emoji(), Some("📄"));
        let external: Icon =
            serde_json::from_value(json!({"type": "external", "external": {"url": "x"}})).unwrap();
        assert_eq!(external, Icon::Unsupported);
    }
}
