//! Block attribute codec.
//!
//! A block's attributes travel as an opaque JSON string. Kinds with a
//! structured form ([`BlockKind::form_schema`]) decode into an
//! [`AttributeRecord`]; everything else stays raw.
//!
//! Decoding is strict and returns a [`DecodeError`]. Callers that must always
//! be able to open a form use [`decode_or_empty`], which maps a malformed
//! payload to the kind's empty record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::kind::{BlockKind, FieldSpec, Widget};

/// A JSON object with insertion order preserved.
pub type Object = Map<String, Value>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed attribute JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("attribute payload is not a JSON object")]
    NotAnObject,

    #[error("block kind `{0}` has no structured form")]
    NoForm(BlockKind),
}

impl DecodeError {
    /// Whether the payload itself was bad (as opposed to the kind having no form).
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::NoForm(_))
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("a `{record}` record cannot be stored on a `{kind}` block")]
    KindMismatch { kind: BlockKind, record: BlockKind },

    #[error("failed to serialize attributes: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("`{kind}` has no field named `{field}`")]
    UnknownField { kind: BlockKind, field: String },

    #[error("`{0}` is edited per grid row, not per field")]
    GridRecord(BlockKind),
}

// ---------------------------------------------------------------
// Per-kind records
// ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeroBanner {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub subtitle: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub background_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cta_text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cta_link: String,
}

/// Contact section settings. Keys other than `enable_form` (headings etc.)
/// are carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactSection {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub enable_form: bool,
    #[serde(flatten)]
    pub extra: Object,
}

/// One row of a grid block, kept as the flat object it was stored as.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridItem(pub Object);

/// Attributes of the grid kinds: an `items` array plus any heading keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridAttributes {
    #[serde(default, deserialize_with = "items_or_empty")]
    pub items: Vec<GridItem>,
    #[serde(flatten)]
    pub extra: Object,
}

/// Typed attributes of a block whose kind has a structured form.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeRecord {
    HeroBanner(HeroBanner),
    ContactSection(ContactSection),
    QuickEntryGrid(GridAttributes),
    ServiceBlocksGrid(GridAttributes),
}

// Field readers never fail: one odd value must not cost the other fields.

/// Scalars become their text, null and containers become empty.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::String(text) => is_checked(&text),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    })
}

fn items_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<GridItem>, D::Error> {
    let Value::Array(entries) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(object) => Some(GridItem(object)),
            _ => None,
        })
        .collect())
}

// ---------------------------------------------------------------
// Records
// ---------------------------------------------------------------

impl AttributeRecord {
    /// The record a form opens with when the stored payload is unusable.
    pub fn empty(kind: &BlockKind) -> Option<Self> {
        match kind {
            BlockKind::HeroBanner => Some(Self::HeroBanner(HeroBanner::default())),
            BlockKind::ContactSection => Some(Self::ContactSection(ContactSection::default())),
            BlockKind::QuickEntryGrid => Some(Self::QuickEntryGrid(GridAttributes::default())),
            BlockKind::ServiceBlocksGrid => {
                Some(Self::ServiceBlocksGrid(GridAttributes::default()))
            }
            BlockKind::RichText | BlockKind::Other(_) => None,
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Self::HeroBanner(_) => BlockKind::HeroBanner,
            Self::ContactSection(_) => BlockKind::ContactSection,
            Self::QuickEntryGrid(_) => BlockKind::QuickEntryGrid,
            Self::ServiceBlocksGrid(_) => BlockKind::ServiceBlocksGrid,
        }
    }

    pub fn grid(&self) -> Option<&GridAttributes> {
        match self {
            Self::QuickEntryGrid(grid) | Self::ServiceBlocksGrid(grid) => Some(grid),
            Self::HeroBanner(_) | Self::ContactSection(_) => None,
        }
    }

    pub fn grid_mut(&mut self) -> Option<&mut GridAttributes> {
        match self {
            Self::QuickEntryGrid(grid) | Self::ServiceBlocksGrid(grid) => Some(grid),
            Self::HeroBanner(_) | Self::ContactSection(_) => None,
        }
    }

    /// Display text of a flat-form field. Grid records and unknown fields
    /// yield an empty string.
    pub fn field_text(&self, field: &FieldSpec) -> String {
        match self {
            Self::HeroBanner(hero) => match field.name {
                "title" => hero.title.clone(),
                "subtitle" => hero.subtitle.clone(),
                "background_url" => hero.background_url.clone(),
                "cta_text" => hero.cta_text.clone(),
                "cta_link" => hero.cta_link.clone(),
                _ => String::new(),
            },
            Self::ContactSection(contact) => match field.name {
                "enable_form" => contact.enable_form.to_string(),
                _ => String::new(),
            },
            Self::QuickEntryGrid(_) | Self::ServiceBlocksGrid(_) => String::new(),
        }
    }

    /// Set one flat-form field from its input text. Text is trimmed the way
    /// the form submits it.
    pub fn set_field(&mut self, name: &str, text: &str) -> Result<(), FieldError> {
        let kind = self.kind();
        let unknown = || FieldError::UnknownField {
            kind: kind.clone(),
            field: name.to_owned(),
        };
        let text = text.trim();
        match self {
            Self::HeroBanner(hero) => {
                let slot = match name {
                    "title" => &mut hero.title,
                    "subtitle" => &mut hero.subtitle,
                    "background_url" => &mut hero.background_url,
                    "cta_text" => &mut hero.cta_text,
                    "cta_link" => &mut hero.cta_link,
                    _ => return Err(unknown()),
                };
                *slot = text.to_owned();
            }
            Self::ContactSection(contact) => match name {
                "enable_form" => contact.enable_form = is_checked(text),
                _ => return Err(unknown()),
            },
            Self::QuickEntryGrid(_) | Self::ServiceBlocksGrid(_) => {
                return Err(FieldError::GridRecord(kind.clone()))
            }
        }
        Ok(())
    }
}

impl GridItem {
    /// Build a row from form cells, positionally matched to `columns`.
    /// Missing cells are empty; tag columns are split into lists.
    pub fn from_cells(columns: &[FieldSpec], cells: &[&str]) -> Self {
        let mut object = Object::new();
        for (index, field) in columns.iter().enumerate() {
            let text = cells.get(index).copied().unwrap_or_default();
            object.insert(field.name.to_owned(), cell_value(field, text));
        }
        Self(object)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The text shown in this row's cell for `field`.
    pub fn cell_text(&self, field: &FieldSpec) -> String {
        match self.0.get(field.name) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Some(other) => other.to_string(),
        }
    }
}

impl GridAttributes {
    /// Store `item` at `index`, padding with empty rows when the index is
    /// past the end.
    pub fn set_item(&mut self, index: usize, item: GridItem) {
        if self.items.len() <= index {
            self.items.resize_with(index + 1, GridItem::default);
        }
        self.items[index] = item;
    }

    /// Remove the row at `index`; out-of-range indices are a no-op.
    pub fn remove_item(&mut self, index: usize) -> Option<GridItem> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn replace_items(&mut self, items: Vec<GridItem>) {
        self.items = items;
    }
}

fn cell_value(field: &FieldSpec, text: &str) -> Value {
    let text = text.trim();
    match field.widget {
        Widget::Text => Value::String(text.to_owned()),
        Widget::Checkbox => Value::Bool(is_checked(text)),
        Widget::TagList => Value::Array(split_tags(text).into_iter().map(Value::String).collect()),
    }
}

/// Checkbox input text to boolean.
pub fn is_checked(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes" | "checked"
    )
}

/// Split comma-separated tag input: tokens are trimmed, empty tokens
/// dropped, order kept, duplicates kept.
pub fn split_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

// ---------------------------------------------------------------
// decode / encode
// ---------------------------------------------------------------

fn parse_object<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    match serde_json::from_str::<Value>(raw)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value)?),
        Value::Null => Ok(serde_json::from_value(Value::Object(Object::new()))?),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decode a raw attribute payload into the kind's structured record.
pub fn decode(kind: &BlockKind, raw: &str) -> Result<AttributeRecord, DecodeError> {
    let record = match kind {
        BlockKind::HeroBanner => AttributeRecord::HeroBanner(parse_object(raw)?),
        BlockKind::ContactSection => AttributeRecord::ContactSection(parse_object(raw)?),
        BlockKind::QuickEntryGrid => AttributeRecord::QuickEntryGrid(parse_object(raw)?),
        BlockKind::ServiceBlocksGrid => AttributeRecord::ServiceBlocksGrid(parse_object(raw)?),
        BlockKind::RichText | BlockKind::Other(_) => return Err(DecodeError::NoForm(kind.clone())),
    };
    Ok(record)
}

/// [`decode`] with the form-opening recovery policy: a malformed payload
/// yields the empty record, a kind without a form yields `None`.
pub fn decode_or_empty(kind: &BlockKind, raw: &str) -> Option<AttributeRecord> {
    match decode(kind, raw) {
        Ok(record) => Some(record),
        Err(DecodeError::NoForm(_)) => None,
        Err(e) => {
            log::debug!("{kind} attributes unreadable, using empty form: {e}");
            AttributeRecord::empty(kind)
        }
    }
}

/// Encode a record back to the raw payload stored on a `kind` block.
pub fn encode(kind: &BlockKind, record: &AttributeRecord) -> Result<String, EncodeError> {
    let record_kind = record.kind();
    if &record_kind != kind {
        return Err(EncodeError::KindMismatch {
            kind: kind.clone(),
            record: record_kind,
        });
    }
    let raw = match record {
        AttributeRecord::HeroBanner(hero) => serde_json::to_string(hero)?,
        AttributeRecord::ContactSection(contact) => serde_json::to_string(contact)?,
        AttributeRecord::QuickEntryGrid(grid) | AttributeRecord::ServiceBlocksGrid(grid) => {
            serde_json::to_string(grid)?
        }
    };
    Ok(raw)
}
