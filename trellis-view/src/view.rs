//! Snapshot → view bridge: projects the [`TreeModel`] into display nodes.
//!
//! The view tree is rebuilt from scratch after every successful load. In
//! between, drag gestures rearrange its nodes in place, and the drag-end
//! intents read the new order straight back from node order.

use std::fmt::Write as _;

use trellis_core::{
    decode_or_empty, Block, BlockId, BlockKind, FieldSpec, FormSchema, LayoutId, Section,
    SectionId, TreeModel,
};

use crate::error::BindingError;

/// Shown in place of a missing section title.
const SECTION_LABEL: &str = "分区";

/// One field of a flat structured form, with its current text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldView {
    pub spec: FieldSpec,
    pub value: String,
}

/// The structured editor a block opens with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormView {
    Fields(Vec<FieldView>),
    /// One row per grid item, one cell per column.
    Grid {
        columns: &'static [FieldSpec],
        rows: Vec<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub id: BlockId,
    pub kind: BlockKind,
    pub label: String,
    pub enabled: bool,
    /// Attribute JSON exactly as stored, for the raw editor.
    pub raw_attributes: String,
    /// `None` for kinds edited as raw JSON only.
    pub form: Option<FormView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNode {
    pub id: SectionId,
    pub title: String,
    pub label: String,
    pub enabled: bool,
    pub blocks: Vec<BlockNode>,
}

/// What the builder page shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewTree {
    pub layout_id: Option<LayoutId>,
    pub status: Option<String>,
    pub sections: Vec<SectionNode>,
}

fn form_view(block: &Block) -> Option<FormView> {
    let schema = block.kind.form_schema()?;
    let record = decode_or_empty(&block.kind, block.attributes_text())?;
    let form = match schema {
        FormSchema::Fields(fields) => FormView::Fields(
            fields
                .iter()
                .map(|spec| FieldView {
                    spec: *spec,
                    value: record.field_text(spec),
                })
                .collect(),
        ),
        FormSchema::Grid(columns) => FormView::Grid {
            columns,
            rows: record
                .grid()
                .map(|grid| {
                    grid.items
                        .iter()
                        .map(|item| columns.iter().map(|spec| item.cell_text(spec)).collect())
                        .collect()
                })
                .unwrap_or_default(),
        },
    };
    Some(form)
}

fn block_node(block: &Block) -> BlockNode {
    BlockNode {
        id: block.id,
        kind: block.kind.clone(),
        label: format!("{} #{}", block.kind, block.id),
        enabled: block.is_enabled,
        raw_attributes: block.attributes_text().to_string(),
        form: form_view(block),
    }
}

fn section_node(section: &Section) -> SectionNode {
    let title = section.title.clone().unwrap_or_default();
    let label = if title.is_empty() {
        format!("{SECTION_LABEL} #{}", section.id)
    } else {
        format!("{SECTION_LABEL} #{} {title}", section.id)
    };
    SectionNode {
        id: section.id,
        title,
        label,
        enabled: section.is_enabled,
        blocks: section.blocks.iter().map(block_node).collect(),
    }
}

/// Build the view from the current snapshot, in snapshot order.
pub fn render(model: &TreeModel) -> ViewTree {
    ViewTree {
        layout_id: model.layout_id(),
        status: model.layout().and_then(|layout| layout.status.clone()),
        sections: model.sections_in_order().iter().map(section_node).collect(),
    }
}

/// Move the element at `from` so that it ends up at `to`.
fn move_within<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), BindingError> {
    let len = items.len();
    for index in [from, to] {
        if index >= len {
            return Err(BindingError::OutOfRange { index, len });
        }
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

impl ViewTree {
    pub fn section(&self, id: SectionId) -> Option<&SectionNode> {
        self.sections.iter().find(|section| section.id == id)
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockNode> {
        self.sections
            .iter()
            .flat_map(|section| &section.blocks)
            .find(|block| block.id == id)
    }

    // ---------------------------------------------------------------
    // Drag gestures
    // ---------------------------------------------------------------

    /// Drag the section at position `from` to position `to`.
    pub fn move_section(&mut self, from: usize, to: usize) -> Result<(), BindingError> {
        move_within(&mut self.sections, from, to)
    }

    /// Drag a block within its section.
    pub fn move_block(
        &mut self,
        section_id: SectionId,
        from: usize,
        to: usize,
    ) -> Result<(), BindingError> {
        let section = self
            .sections
            .iter_mut()
            .find(|section| section.id == section_id)
            .ok_or(BindingError::UnknownNode {
                kind: "section",
                id: section_id,
            })?;
        move_within(&mut section.blocks, from, to)
    }

    /// Section ids in on-screen order.
    pub fn section_order(&self) -> Vec<SectionId> {
        self.sections.iter().map(|section| section.id).collect()
    }

    /// Block ids of one section in on-screen order.
    pub fn block_order(&self, section_id: SectionId) -> Option<Vec<BlockId>> {
        self.section(section_id)
            .map(|section| section.blocks.iter().map(|block| block.id).collect())
    }

    /// Plain-text outline for terminals and logs.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        match (self.layout_id, &self.status) {
            (Some(id), Some(status)) => {
                let _ = writeln!(out, "Layout #{id} ({status})");
            }
            (Some(id), None) => {
                let _ = writeln!(out, "Layout #{id}");
            }
            (None, _) => {
                let _ = writeln!(out, "Layout not loaded");
                return out;
            }
        }
        if self.sections.is_empty() {
            let _ = writeln!(out, "  (no sections)");
        }
        for section in &self.sections {
            let state = if section.enabled { "" } else { " [disabled]" };
            let _ = writeln!(out, "  {}{state}", section.label);
            for block in &section.blocks {
                let state = if block.enabled { "" } else { " [disabled]" };
                let _ = writeln!(out, "    - {}{state}", block.label);
                match &block.form {
                    Some(FormView::Fields(fields)) => {
                        for field in fields {
                            let _ = writeln!(out, "        {}: {}", field.spec.name, field.value);
                        }
                    }
                    Some(FormView::Grid { rows, .. }) => {
                        for (index, row) in rows.iter().enumerate() {
                            let _ = writeln!(out, "        [{index}] {}", row.join(" | "));
                        }
                    }
                    None => {
                        let _ = writeln!(out, "        {}", block.raw_attributes);
                    }
                }
            }
        }
        out
    }
}
