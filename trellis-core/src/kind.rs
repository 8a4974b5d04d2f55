//! Block kinds and the per-kind handler table.
//!
//! Every kind-specific decision (default attributes for a new block, which
//! structured form edits it, which columns a grid row has) is a `match` on
//! [`BlockKind`], so adding a kind is a compile error everywhere it matters.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// The tag identifying a block's structural/rendering type.
///
/// Tags the builder has no dedicated handling for are kept verbatim in
/// [`BlockKind::Other`] and only ever edited as raw JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    RichText,
    HeroBanner,
    ContactSection,
    QuickEntryGrid,
    ServiceBlocksGrid,
    Other(String),
}

/// How a single form field is edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Widget {
    /// Single-line text, stored as a JSON string.
    Text,
    /// Checkbox, stored as a JSON boolean.
    Checkbox,
    /// Comma-separated input, stored as a JSON array of strings.
    TagList,
}

/// One field of a structured form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub widget: Widget,
}

impl FieldSpec {
    const fn text(name: &'static str, label: &'static str) -> Self {
        Self { name, label, widget: Widget::Text }
    }
}

/// Shape of the structured form for a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormSchema {
    /// A flat record edited field by field.
    Fields(&'static [FieldSpec]),
    /// A table over the `items` array, one row per item.
    Grid(&'static [FieldSpec]),
}

impl FormSchema {
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Fields(fields) | Self::Grid(fields) => fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }
}

pub const HERO_BANNER_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("title", "标题"),
    FieldSpec::text("subtitle", "副标题"),
    FieldSpec::text("background_url", "背景URL"),
    FieldSpec::text("cta_text", "按钮文本"),
    FieldSpec::text("cta_link", "按钮链接"),
];

pub const CONTACT_SECTION_FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "enable_form",
    label: "启用表单",
    widget: Widget::Checkbox,
}];

pub const QUICK_ENTRY_COLUMNS: &[FieldSpec] = &[
    FieldSpec::text("title", "title"),
    FieldSpec::text("subtitle", "subtitle"),
    FieldSpec::text("desc", "desc"),
    FieldSpec::text("href", "href"),
    FieldSpec::text("icon", "icon"),
    FieldSpec { name: "tags", label: "tags", widget: Widget::TagList },
];

pub const SERVICE_BLOCK_COLUMNS: &[FieldSpec] = &[
    FieldSpec::text("title", "title"),
    FieldSpec::text("subtitle", "subtitle"),
    FieldSpec::text("desc", "desc"),
    FieldSpec::text("href", "href"),
    FieldSpec::text("icon", "icon"),
    FieldSpec::text("background_url", "background_url"),
    FieldSpec::text("badge_text", "badge_text"),
];

impl BlockKind {
    /// Parse a wire tag. Never fails: unknown tags become [`BlockKind::Other`].
    pub fn parse(tag: &str) -> Self {
        match tag {
            "RichText" => Self::RichText,
            "HeroBanner" => Self::HeroBanner,
            "ContactSection" => Self::ContactSection,
            "QuickEntryGrid" => Self::QuickEntryGrid,
            "ServiceBlocksGrid" => Self::ServiceBlocksGrid,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RichText => "RichText",
            Self::HeroBanner => "HeroBanner",
            Self::ContactSection => "ContactSection",
            Self::QuickEntryGrid => "QuickEntryGrid",
            Self::ServiceBlocksGrid => "ServiceBlocksGrid",
            Self::Other(tag) => tag,
        }
    }

    pub fn is_grid(&self) -> bool {
        matches!(self, Self::QuickEntryGrid | Self::ServiceBlocksGrid)
    }

    /// Attributes a freshly created block of this kind starts with.
    pub fn default_attributes(&self) -> Value {
        match self {
            Self::RichText => json!({ "html": "<p>示例文本</p>" }),
            Self::HeroBanner => json!({
                "title": "欢迎",
                "subtitle": "副标题",
                "background_url": "",
                "cta_text": "",
                "cta_link": "#",
            }),
            Self::ContactSection => json!({ "enable_form": true }),
            Self::QuickEntryGrid | Self::ServiceBlocksGrid => json!({ "items": [] }),
            Self::Other(_) => json!({}),
        }
    }

    /// The structured form for this kind, or `None` when it can only be
    /// edited as raw JSON.
    pub fn form_schema(&self) -> Option<FormSchema> {
        match self {
            Self::HeroBanner => Some(FormSchema::Fields(HERO_BANNER_FIELDS)),
            Self::ContactSection => Some(FormSchema::Fields(CONTACT_SECTION_FIELDS)),
            Self::QuickEntryGrid => Some(FormSchema::Grid(QUICK_ENTRY_COLUMNS)),
            Self::ServiceBlocksGrid => Some(FormSchema::Grid(SERVICE_BLOCK_COLUMNS)),
            Self::RichText | Self::Other(_) => None,
        }
    }
}

impl From<&str> for BlockKind {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BlockKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_and_unknown_tags() {
        assert_eq!(BlockKind::parse("HeroBanner"), BlockKind::HeroBanner);
        assert_eq!(BlockKind::parse("QuickEntryGrid"), BlockKind::QuickEntryGrid);
        assert_eq!(
            BlockKind::parse("NewsGrid"),
            BlockKind::Other("NewsGrid".to_string())
        );
        assert_eq!(BlockKind::parse("NewsGrid").as_str(), "NewsGrid");
    }

    #[test]
    fn test_serde_uses_wire_tag() {
        let json = serde_json::to_string(&BlockKind::ServiceBlocksGrid).unwrap();
        assert_eq!(json, "\"ServiceBlocksGrid\"");

        let kind: BlockKind = serde_json::from_str("\"PartnerLogos\"").unwrap();
        assert_eq!(kind, BlockKind::Other("PartnerLogos".to_string()));
    }

    #[test]
    fn test_hero_banner_default_attributes() {
        let attrs = BlockKind::HeroBanner.default_attributes();
        assert_eq!(attrs["title"], "欢迎");
        assert_eq!(attrs["subtitle"], "副标题");
        assert_eq!(attrs["background_url"], "");
        assert_eq!(attrs["cta_text"], "");
        assert_eq!(attrs["cta_link"], "#");
        assert_eq!(attrs.as_object().map(|o| o.len()), Some(5));
    }

    #[test]
    fn test_rich_text_default_is_placeholder_html() {
        let attrs = BlockKind::RichText.default_attributes();
        assert_eq!(attrs["html"], "<p>示例文本</p>");
    }

    #[test]
    fn test_form_schemas() {
        assert!(BlockKind::RichText.form_schema().is_none());
        assert!(BlockKind::Other("StatsSection".into()).form_schema().is_none());

        let hero = BlockKind::HeroBanner.form_schema().unwrap();
        let names: Vec<_> = hero.fields().iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            ["title", "subtitle", "background_url", "cta_text", "cta_link"]
        );

        let quick = BlockKind::QuickEntryGrid.form_schema().unwrap();
        assert!(matches!(quick, FormSchema::Grid(_)));
        assert_eq!(quick.field("tags").map(|f| f.widget), Some(Widget::TagList));

        let service = BlockKind::ServiceBlocksGrid.form_schema().unwrap();
        assert!(service.field("tags").is_none());
        assert!(service.field("badge_text").is_some());
    }

    #[test]
    fn test_grid_kinds() {
        assert!(BlockKind::QuickEntryGrid.is_grid());
        assert!(BlockKind::ServiceBlocksGrid.is_grid());
        assert!(!BlockKind::HeroBanner.is_grid());
    }
}
