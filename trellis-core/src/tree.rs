//! Layout tree snapshot.
//!
//! The wire shape of `GET {prefix}/data` doubles as the in-memory model: the
//! tree is never patched locally, only replaced wholesale by the next fetch.

use serde::{Deserialize, Serialize};

use crate::kind::BlockKind;

pub type LayoutId = i64;
pub type SectionId = i64;
pub type BlockId = i64;

fn enabled() -> bool {
    true
}

/// Layout root metadata.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LayoutInfo {
    pub id: LayoutId,
    /// `home` or `column`.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub scope_id: Option<i64>,
    /// `draft` or `published`.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "block_type")]
    pub kind: BlockKind,
    /// Raw attribute JSON, stored and sent back without interpretation.
    #[serde(default)]
    pub attributes_json: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
}

impl Block {
    /// The attribute payload as text, `{}` when the store holds none.
    pub fn attributes_text(&self) -> &str {
        self.attributes_json.as_deref().unwrap_or("{}")
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Section {
    pub id: SectionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Full layout tree as returned by the layout store.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LayoutTree {
    pub layout: LayoutInfo,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// Where a rank defect was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankScope {
    Layout(LayoutId),
    Section(SectionId),
}

/// Sibling ranks that do not line up with sibling order: a collision, a gap,
/// or a sequence that starts neither at 0 nor at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankDefect {
    pub scope: RankScope,
    pub ranks: Vec<i64>,
}

/// Ranks are consistent when they count up by one from a base of 0 or 1.
/// Snapshots that omit ranks have nothing to check.
fn ranks_are_dense(ranks: &[Option<i64>]) -> bool {
    let Some(ranks) = ranks.iter().copied().collect::<Option<Vec<_>>>() else {
        return true;
    };
    match ranks.first() {
        None => true,
        Some(&base) if base == 0 || base == 1 => ranks
            .iter()
            .zip(base..)
            .all(|(&rank, expected)| rank == expected),
        Some(_) => false,
    }
}

/// The last layout snapshot fetched from the store.
///
/// [`TreeModel::replace`] is the only mutator.
#[derive(Debug, Clone, Default)]
pub struct TreeModel {
    snapshot: Option<LayoutTree>,
    generation: u64,
}

impl TreeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly fetched tree, discarding the previous one.
    pub fn replace(&mut self, tree: LayoutTree) {
        self.snapshot = Some(tree);
        self.generation += 1;
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    /// How many snapshots have been installed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> Option<&LayoutTree> {
        self.snapshot.as_ref()
    }

    pub fn layout(&self) -> Option<&LayoutInfo> {
        self.snapshot.as_ref().map(|tree| &tree.layout)
    }

    pub fn layout_id(&self) -> Option<LayoutId> {
        self.layout().map(|layout| layout.id)
    }

    pub fn sections_in_order(&self) -> &[Section] {
        self.snapshot
            .as_ref()
            .map(|tree| tree.sections.as_slice())
            .unwrap_or_default()
    }

    /// Blocks of `section_id` in order, `None` for an unknown section.
    pub fn blocks_in_order(&self, section_id: SectionId) -> Option<&[Block]> {
        self.find_section(section_id)
            .map(|section| section.blocks.as_slice())
    }

    pub fn find_section(&self, id: SectionId) -> Option<&Section> {
        self.sections_in_order().iter().find(|section| section.id == id)
    }

    /// Find a block anywhere in the layout, together with its section.
    pub fn find_block(&self, id: BlockId) -> Option<(&Section, &Block)> {
        self.sections_in_order().iter().find_map(|section| {
            section
                .blocks
                .iter()
                .find(|block| block.id == id)
                .map(|block| (section, block))
        })
    }

    pub fn section_ids(&self) -> Vec<SectionId> {
        self.sections_in_order().iter().map(|s| s.id).collect()
    }

    pub fn block_count(&self) -> usize {
        self.sections_in_order().iter().map(|s| s.blocks.len()).sum()
    }

    /// Every sibling group whose ranks disagree with its order.
    pub fn rank_defects(&self) -> Vec<RankDefect> {
        let Some(tree) = &self.snapshot else {
            return Vec::new();
        };
        let mut defects = Vec::new();

        let section_ranks: Vec<_> = tree.sections.iter().map(|s| s.sort_order).collect();
        if !ranks_are_dense(&section_ranks) {
            defects.push(RankDefect {
                scope: RankScope::Layout(tree.layout.id),
                ranks: section_ranks.into_iter().flatten().collect(),
            });
        }

        for section in &tree.sections {
            let block_ranks: Vec<_> = section.blocks.iter().map(|b| b.sort_order).collect();
            if !ranks_are_dense(&block_ranks) {
                defects.push(RankDefect {
                    scope: RankScope::Section(section.id),
                    ranks: block_ranks.into_iter().flatten().collect(),
                });
            }
        }
        defects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> LayoutTree {
        serde_json::from_str(
            r#"{
                "layout": {"id": 7, "scope": "home", "scope_id": null, "status": "draft"},
                "sections": [
                    {"id": 1, "title": "Hero", "sort_order": 0, "blocks": [
                        {"id": 10, "block_type": "HeroBanner", "attributes_json": "{\"title\":\"Hi\"}", "sort_order": 0},
                        {"id": 11, "block_type": "RichText", "attributes_json": null, "sort_order": 1}
                    ]},
                    {"id": 2, "title": null, "sort_order": 1, "is_enabled": false, "blocks": [
                        {"id": 20, "block_type": "NewsGrid", "attributes_json": "{}", "sort_order": 0}
                    ]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_wire_tree() {
        let tree = sample_tree();
        assert_eq!(tree.layout.id, 7);
        assert_eq!(tree.layout.status.as_deref(), Some("draft"));
        assert_eq!(tree.sections.len(), 2);
        assert!(tree.sections[0].is_enabled);
        assert!(!tree.sections[1].is_enabled);
        assert_eq!(tree.sections[0].blocks[0].kind, BlockKind::HeroBanner);
        assert_eq!(
            tree.sections[1].blocks[0].kind,
            BlockKind::Other("NewsGrid".into())
        );
        assert_eq!(tree.sections[0].blocks[1].attributes_text(), "{}");
    }

    #[test]
    fn test_minimal_wire_shape() {
        let tree: LayoutTree = serde_json::from_str(
            r#"{"layout":{"id":1},"sections":[{"id":3,"title":"S","blocks":[{"id":4,"block_type":"RichText","attributes_json":"{}"}]}]}"#,
        )
        .unwrap();
        assert_eq!(tree.sections[0].sort_order, None);
        assert!(tree.sections[0].blocks[0].is_enabled);
    }

    #[test]
    fn test_empty_model() {
        let model = TreeModel::new();
        assert!(!model.is_loaded());
        assert_eq!(model.generation(), 0);
        assert!(model.sections_in_order().is_empty());
        assert!(model.layout_id().is_none());
        assert!(model.find_block(10).is_none());
        assert!(model.rank_defects().is_empty());
    }

    #[test]
    fn test_lookups() {
        let mut model = TreeModel::new();
        model.replace(sample_tree());

        assert_eq!(model.layout_id(), Some(7));
        assert_eq!(model.section_ids(), vec![1, 2]);
        assert_eq!(model.block_count(), 3);
        assert_eq!(model.find_section(2).map(|s| s.blocks.len()), Some(1));
        assert!(model.find_section(99).is_none());

        let (section, block) = model.find_block(11).unwrap();
        assert_eq!(section.id, 1);
        assert_eq!(block.kind, BlockKind::RichText);

        let ids: Vec<_> = model.blocks_in_order(1).unwrap().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert!(model.blocks_in_order(42).is_none());
    }

    #[test]
    fn test_replace_discards_previous_snapshot() {
        let mut model = TreeModel::new();
        model.replace(sample_tree());

        let mut next = sample_tree();
        next.sections.remove(0);
        model.replace(next);

        assert_eq!(model.generation(), 2);
        assert_eq!(model.section_ids(), vec![2]);
        assert!(model.find_block(10).is_none());
    }

    #[test]
    fn test_rank_defects() {
        let mut model = TreeModel::new();
        model.replace(sample_tree());
        assert!(model.rank_defects().is_empty());

        let mut tree = sample_tree();
        tree.sections[1].sort_order = Some(0);
        tree.sections[0].blocks[1].sort_order = Some(3);
        model.replace(tree);

        let defects = model.rank_defects();
        assert_eq!(defects.len(), 2);
        assert_eq!(defects[0].scope, RankScope::Layout(7));
        assert_eq!(defects[0].ranks, vec![0, 0]);
        assert_eq!(defects[1].scope, RankScope::Section(1));
    }

    #[test]
    fn test_ranks_are_dense() {
        assert!(ranks_are_dense(&[]));
        assert!(ranks_are_dense(&[Some(0), Some(1), Some(2)]));
        assert!(ranks_are_dense(&[Some(1), Some(2)]));
        assert!(ranks_are_dense(&[Some(0), None]));
        assert!(!ranks_are_dense(&[Some(0), Some(2)]));
        assert!(!ranks_are_dense(&[Some(1), Some(1)]));
        assert!(!ranks_are_dense(&[Some(2), Some(3)]));
    }
}
