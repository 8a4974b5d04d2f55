//! # trellis-core: layout tree and block attribute codec
//!
//! The in-memory side of the page-layout builder:
//!
//! - [`tree`]: the layout snapshot (sections → blocks) as last fetched from
//!   the layout store, plus the read-only [`TreeModel`] wrapper.
//! - [`kind`]: the closed set of block kinds and their handler table
//!   (default attributes, form schema).
//! - [`codec`]: conversion between a block's raw attribute JSON and the
//!   typed per-kind form records.
//!
//! Nothing in this crate performs I/O.

pub mod codec;
pub mod kind;
pub mod tree;

pub use codec::{
    decode, decode_or_empty, encode, join_tags, split_tags, AttributeRecord, ContactSection,
    DecodeError, EncodeError, FieldError, GridAttributes, GridItem, HeroBanner,
};
pub use kind::{BlockKind, FieldSpec, FormSchema, Widget};
pub use tree::{
    Block, BlockId, LayoutId, LayoutInfo, LayoutTree, RankDefect, RankScope, Section, SectionId,
    TreeModel,
};
