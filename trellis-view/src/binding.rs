//! # View binding
//!
//! Connects user intents to the sync engine and keeps the rendered tree in
//! step with the snapshot.
//!
//! A binding owns one engine. Each [`Intent`] runs the matching engine
//! operation; on success the view is re-rendered from the fresh snapshot,
//! on failure a [`Notice`] is recorded and the view is left exactly as it
//! was. A drag that the store refused therefore stays in its dragged order
//! until the next successful load.

use tokio::sync::mpsc;
use trellis_core::{AttributeRecord, BlockId, BlockKind, GridItem, SectionId};
use trellis_sync::{PublishReceipt, SyncEngine, SyncEvent, Transport};

use crate::error::BindingError;
use crate::view::{render, ViewTree};

/// A user gesture, already resolved to ids and values.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Refresh,
    /// Append a section; `None` uses the default title.
    AddSection { title: Option<String> },
    AddBlock { section_id: SectionId, kind: BlockKind },
    /// Palette drop: into the first section, creating one if needed.
    PaletteAdd { kind: BlockKind },
    DeleteBlock { block_id: BlockId },
    UpdateSection {
        section_id: SectionId,
        title: Option<String>,
        enabled: Option<bool>,
    },
    /// Sections were dragged; submit the order the view now shows.
    DragSectionsEnd,
    /// Blocks of one section were dragged.
    DragBlocksEnd { section_id: SectionId },
    SaveAttributes { block_id: BlockId, raw: String },
    SaveForm { block_id: BlockId, record: AttributeRecord },
    SaveGridItem { block_id: BlockId, index: usize, item: GridItem },
    DeleteGridItem { block_id: BlockId, index: usize },
    SaveGridItems { block_id: BlockId, items: Vec<GridItem> },
    Publish,
}

/// A message for the user (the builder page shows these as toasts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Info(text) | Self::Error(text) => text,
        }
    }
}

fn published_notice(receipt: &PublishReceipt) -> String {
    match &receipt.published_at {
        Some(at) => format!("已发布 ({at})"),
        None => "已发布".to_string(),
    }
}

pub struct Binding<T: Transport> {
    engine: SyncEngine<T>,
    view: ViewTree,
    notices: Vec<Notice>,
    events: Option<mpsc::Receiver<SyncEvent>>,
}

impl<T: Transport> Binding<T> {
    /// Bind an engine. The binding takes the engine's event channel if it
    /// is still available.
    pub fn new(mut engine: SyncEngine<T>) -> Self {
        let events = engine.take_event_rx();
        let view = render(engine.model());
        Self {
            engine,
            view,
            notices: Vec::new(),
            events,
        }
    }

    pub fn engine(&self) -> &SyncEngine<T> {
        &self.engine
    }

    pub fn view(&self) -> &ViewTree {
        &self.view
    }

    /// Mutable access for drag gestures on the rendered tree.
    pub fn view_mut(&mut self) -> &mut ViewTree {
        &mut self.view
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Engine events received since the last call.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut drained = Vec::new();
        if let Some(events) = &mut self.events {
            while let Ok(event) = events.try_recv() {
                drained.push(event);
            }
        }
        drained
    }

    pub fn preview_path(&self) -> String {
        self.engine.preview_path()
    }

    /// Run one intent against the engine.
    pub async fn dispatch(&mut self, intent: Intent) -> Result<(), BindingError> {
        log::debug!("Dispatching {intent:?}");
        let engine = &mut self.engine;
        let result = match intent {
            Intent::Refresh => engine.load().await.map(|()| None),
            Intent::AddSection { title } => {
                let added = match title {
                    Some(title) => engine.add_section_titled(&title).await,
                    None => engine.add_section().await,
                };
                added.map(|_| None)
            }
            Intent::AddBlock { section_id, kind } => {
                engine.add_block(section_id, kind).await.map(|_| None)
            }
            Intent::PaletteAdd { kind } => {
                engine.add_block_to_first_section(kind).await.map(|_| None)
            }
            Intent::DeleteBlock { block_id } => engine.delete_block(block_id).await.map(|()| None),
            Intent::UpdateSection {
                section_id,
                title,
                enabled,
            } => engine
                .update_section(section_id, title.as_deref(), enabled)
                .await
                .map(|()| None),
            Intent::DragSectionsEnd => {
                let order = self.view.section_order();
                engine.reorder_sections(&order).await.map(|()| None)
            }
            Intent::DragBlocksEnd { section_id } => {
                let Some(order) = self.view.block_order(section_id) else {
                    let err = BindingError::UnknownNode {
                        kind: "section",
                        id: section_id,
                    };
                    self.notices.push(Notice::Error(err.to_string()));
                    return Err(err);
                };
                engine.reorder_blocks(section_id, &order).await.map(|()| None)
            }
            Intent::SaveAttributes { block_id, raw } => engine
                .set_attributes(block_id, &raw)
                .await
                .map(|()| Some("已保存".to_string())),
            Intent::SaveForm { block_id, record } => engine
                .save_form(block_id, &record)
                .await
                .map(|()| Some("已保存".to_string())),
            Intent::SaveGridItem {
                block_id,
                index,
                item,
            } => engine
                .save_grid_item(block_id, index, item)
                .await
                .map(|()| Some("已保存".to_string())),
            Intent::DeleteGridItem { block_id, index } => engine
                .delete_grid_item(block_id, index)
                .await
                .map(|()| Some("已删除".to_string())),
            Intent::SaveGridItems { block_id, items } => engine
                .save_grid_items(block_id, items)
                .await
                .map(|()| Some("已保存".to_string())),
            Intent::Publish => engine
                .publish()
                .await
                .map(|receipt| Some(published_notice(&receipt))),
        };

        match result {
            Ok(message) => {
                self.view = render(self.engine.model());
                if let Some(message) = message {
                    self.notices.push(Notice::Info(message));
                }
                Ok(())
            }
            Err(e) => {
                self.notices.push(Notice::Error(e.user_message()));
                Err(e.into())
            }
        }
    }
}
