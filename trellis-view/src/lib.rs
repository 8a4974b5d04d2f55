//! # trellis-view: render/view binding for the layout builder
//!
//! ```text
//! TreeModel ──render()──► ViewTree ──gestures──► ViewTree (dragged)
//!     ▲                                              │
//!     │ load()                              Intent   │
//!     │                                              ▼
//! SyncEngine ◄──────────────────────────── Binding::dispatch
//! ```
//!
//! - [`view`]: display nodes, drag gestures, text outline
//! - [`binding`]: intents, notices, and the engine binding

pub mod binding;
pub mod error;
pub mod view;

pub use binding::{Binding, Intent, Notice};
pub use error::BindingError;
pub use view::{render, BlockNode, FieldView, FormView, SectionNode, ViewTree};
