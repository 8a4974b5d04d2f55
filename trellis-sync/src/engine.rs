//! The sync engine.
//!
//! One engine per builder page. It owns the transport, the resolved scope,
//! the tree snapshot and the event channel; nothing is shared or global.
//!
//! ```text
//! intent ──► validate ──► remote call ──► ok ──► Mutated ──► load() ──► Loaded
//!               │              │
//!               ▼              ▼
//!         SyncError      SyncError + Failed   (snapshot left as it was)
//! ```
//!
//! Every successful mutation is followed by exactly one full reload. The
//! store assigns ids and ranks, so the engine never patches the snapshot
//! from a mutation response.

use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use trellis_core::{
    decode_or_empty, encode, AttributeRecord, BlockId, BlockKind, EncodeError, GridAttributes,
    GridItem, LayoutId, LayoutTree, SectionId, TreeModel,
};

use crate::config::EngineConfig;
use crate::protocol::{
    dense_ranks, read_ack, server_message, CreateBlock, Created, Deleted, PublishReceipt,
    ReorderBlocks, ReorderSections, Reordered,
};
use crate::scope::{Endpoint, Scope};
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// Title given to sections created without one.
pub const DEFAULT_SECTION_TITLE: &str = "分区";

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// The operations the engine reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    AddSection,
    AddBlock,
    DeleteBlock,
    UpdateSection,
    ReorderSections,
    ReorderBlocks,
    SetAttributes,
    SaveForm,
    EditGrid,
    Publish,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::AddSection => "add section",
            Self::AddBlock => "add block",
            Self::DeleteBlock => "delete block",
            Self::UpdateSection => "update section",
            Self::ReorderSections => "reorder sections",
            Self::ReorderBlocks => "reorder blocks",
            Self::SetAttributes => "set attributes",
            Self::SaveForm => "save form",
            Self::EditGrid => "edit grid",
            Self::Publish => "publish",
        })
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A fresh snapshot was installed
    Loaded { sections: usize, blocks: usize },
    /// The store accepted a mutation (a reload follows)
    Mutated(Operation),
    /// The layout was published
    Published(PublishReceipt),
    /// An operation failed; the snapshot is unchanged
    Failed { op: Operation, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("layout is not loaded")]
    NotLoaded,

    #[error("unknown section {0}")]
    UnknownSection(SectionId),

    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("block kind `{0}` has no structured form")]
    NoForm(BlockKind),

    #[error("block kind `{0}` is not a grid")]
    NotAGrid(BlockKind),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl SyncError {
    /// Text for a user-facing notice: the store's own message when it gave
    /// one, otherwise the error itself.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Apply the store's response contract: non-2xx and any body carrying an
/// `error` field are rejections, everything else is success.
fn accept(response: ApiResponse) -> Result<Value, SyncError> {
    let ApiResponse { status, body } = response;
    if !(200..300).contains(&status) {
        let message = server_message(&body)
            .or_else(|| body.as_str().filter(|text| !text.is_empty()).map(str::to_owned))
            .unwrap_or_else(|| status_text(status));
        return Err(SyncError::Rejected { status, message });
    }
    if let Some(error) = body.get("error").filter(|value| !value.is_null()) {
        let message = match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return Err(SyncError::Rejected { status, message });
    }
    Ok(body)
}

fn status_text(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map_or_else(|| format!("HTTP {status}"), str::to_owned)
}

/// `order` must name every current sibling exactly once.
fn check_permutation(current: &[i64], order: &[i64]) -> Result<(), SyncError> {
    let known: HashSet<i64> = current.iter().copied().collect();
    let mut seen = HashSet::with_capacity(order.len());
    for &id in order {
        if !known.contains(&id) {
            return Err(SyncError::InvalidOrder(format!("{id} is not a sibling")));
        }
        if !seen.insert(id) {
            return Err(SyncError::InvalidOrder(format!("{id} appears twice")));
        }
    }
    let missing: Vec<String> = current
        .iter()
        .filter(|id| !seen.contains(*id))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::InvalidOrder(format!(
            "missing {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Keeps one layout snapshot converged with the layout store.
pub struct SyncEngine<T: Transport> {
    transport: T,
    scope: Scope,
    model: TreeModel,

    /// Event sender
    event_tx: mpsc::Sender<SyncEvent>,

    /// Event receiver for the view (taken once)
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T, scope: Scope) -> Self {
        Self::with_capacity(transport, scope, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(transport: T, scope: Scope, event_capacity: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));
        Self {
            transport,
            scope,
            model: TreeModel::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn with_config(transport: T, config: &EngineConfig) -> Self {
        Self::with_capacity(transport, config.scope(), config.event_capacity)
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn model(&self) -> &TreeModel {
        &self.model
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Where the rendered preview of this layout lives. Navigation target,
    /// not a JSON endpoint.
    pub fn preview_path(&self) -> String {
        self.scope.path(Endpoint::Preview)
    }

    // ---------------------------------------------------------------
    // Public operations
    // ---------------------------------------------------------------

    /// Fetch the full tree and install it. On failure the previous snapshot
    /// stays in place.
    pub async fn load(&mut self) -> Result<(), SyncError> {
        let result = self.fetch().await;
        self.report(Operation::Load, result)
    }

    /// Append a section with the default title. Returns the new id when the
    /// store's acknowledgement carries one.
    pub async fn add_section(&mut self) -> Result<Option<SectionId>, SyncError> {
        self.add_section_titled(DEFAULT_SECTION_TITLE).await
    }

    pub async fn add_section_titled(
        &mut self,
        title: &str,
    ) -> Result<Option<SectionId>, SyncError> {
        let result = self.create_section(title).await;
        self.report(Operation::AddSection, result)
    }

    /// Create a block of `kind` with its default attributes.
    pub async fn add_block(
        &mut self,
        section_id: SectionId,
        kind: BlockKind,
    ) -> Result<Option<BlockId>, SyncError> {
        let result = self.create_block(section_id, kind).await;
        self.report(Operation::AddBlock, result)
    }

    /// Palette add: the block goes into the first section, which is created
    /// first when the layout has none.
    pub async fn add_block_to_first_section(
        &mut self,
        kind: BlockKind,
    ) -> Result<Option<BlockId>, SyncError> {
        let result = self.palette_add(kind).await;
        self.report(Operation::AddBlock, result)
    }

    pub async fn delete_block(&mut self, block_id: BlockId) -> Result<(), SyncError> {
        let result = self.remove_block(block_id).await;
        self.report(Operation::DeleteBlock, result)
    }

    /// Rename and/or enable/disable a section. `None` leaves a field as is.
    pub async fn update_section(
        &mut self,
        section_id: SectionId,
        title: Option<&str>,
        is_enabled: Option<bool>,
    ) -> Result<(), SyncError> {
        let result = self.upsert_section(section_id, title, is_enabled).await;
        self.report(Operation::UpdateSection, result)
    }

    /// Submit a new section order. `order` must be a permutation of the
    /// current sections; ranks are reassigned densely from zero.
    pub async fn reorder_sections(&mut self, order: &[SectionId]) -> Result<(), SyncError> {
        let result = self.submit_section_order(order).await;
        self.report(Operation::ReorderSections, result)
    }

    /// Submit a new block order within one section.
    pub async fn reorder_blocks(
        &mut self,
        section_id: SectionId,
        order: &[BlockId],
    ) -> Result<(), SyncError> {
        let result = self.submit_block_order(section_id, order).await;
        self.report(Operation::ReorderBlocks, result)
    }

    /// Replace a block's attribute JSON verbatim.
    pub async fn set_attributes(&mut self, block_id: BlockId, raw: &str) -> Result<(), SyncError> {
        let result = self.checked_put(block_id, raw, Operation::SetAttributes).await;
        self.report(Operation::SetAttributes, result)
    }

    /// Encode a structured form with the block's kind and store it.
    pub async fn save_form(
        &mut self,
        block_id: BlockId,
        record: &AttributeRecord,
    ) -> Result<(), SyncError> {
        let result = self.store_record(block_id, record).await;
        self.report(Operation::SaveForm, result)
    }

    /// Store `item` as row `index` of a grid block (padding the grid when
    /// the index is past the end).
    pub async fn save_grid_item(
        &mut self,
        block_id: BlockId,
        index: usize,
        item: GridItem,
    ) -> Result<(), SyncError> {
        let result = self
            .edit_grid(block_id, |grid| grid.set_item(index, item))
            .await;
        self.report(Operation::EditGrid, result)
    }

    /// Remove row `index` of a grid block. An index past the end leaves the
    /// rows as they are.
    pub async fn delete_grid_item(&mut self, block_id: BlockId, index: usize) -> Result<(), SyncError> {
        let result = self
            .edit_grid(block_id, |grid| {
                grid.remove_item(index);
            })
            .await;
        self.report(Operation::EditGrid, result)
    }

    /// Replace every row of a grid block.
    pub async fn save_grid_items(
        &mut self,
        block_id: BlockId,
        items: Vec<GridItem>,
    ) -> Result<(), SyncError> {
        let result = self
            .edit_grid(block_id, |grid| grid.replace_items(items))
            .await;
        self.report(Operation::EditGrid, result)
    }

    /// Publish the draft. The tree itself does not change, so no reload.
    pub async fn publish(&mut self) -> Result<PublishReceipt, SyncError> {
        let result = self.submit_publish().await;
        self.report(Operation::Publish, result)
    }

    // ---------------------------------------------------------------
    // Internals (failures surface through the public wrapper's report)
    // ---------------------------------------------------------------

    async fn call(&self, request: ApiRequest) -> Result<Value, SyncError> {
        log::debug!("{} {}", request.method, request.path);
        let response = self.transport.send(request).await?;
        accept(response)
    }

    /// A mutation: the body only matters for its optional ack fields.
    async fn acknowledge<R: DeserializeOwned + Default>(
        &self,
        request: ApiRequest,
    ) -> Result<R, SyncError> {
        Ok(read_ack(self.call(request).await?))
    }

    async fn call_as<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, SyncError> {
        Ok(serde_json::from_value(self.call(request).await?)?)
    }

    async fn fetch(&mut self) -> Result<(), SyncError> {
        let tree: LayoutTree = self
            .call_as(ApiRequest::get(self.scope.path(Endpoint::Data)))
            .await?;
        self.model.replace(tree);

        for defect in self.model.rank_defects() {
            log::warn!(
                "Rank defect in {:?}: ranks {:?} do not follow sibling order",
                defect.scope,
                defect.ranks
            );
        }

        let sections = self.model.sections_in_order().len();
        let blocks = self.model.block_count();
        log::debug!("Loaded {} layout: {sections} sections, {blocks} blocks", self.scope);
        self.emit(SyncEvent::Loaded { sections, blocks });
        Ok(())
    }

    /// The layout id, fetching the tree first when nothing is loaded yet.
    async fn ensure_loaded(&mut self) -> Result<LayoutId, SyncError> {
        if !self.model.is_loaded() {
            self.fetch().await?;
        }
        self.model.layout_id().ok_or(SyncError::NotLoaded)
    }

    /// Mutation accepted: announce it and reload.
    async fn settle(&mut self, op: Operation) -> Result<(), SyncError> {
        self.emit(SyncEvent::Mutated(op));
        self.fetch().await
    }

    async fn create_section(&mut self, title: &str) -> Result<Option<SectionId>, SyncError> {
        let layout_id = self.ensure_loaded().await?;
        let rank = self.model.sections_in_order().len();
        let request = ApiRequest::post(self.scope.path(Endpoint::Sections))
            .query("layout_id", layout_id)
            .query("title", title)
            .query("sort_order", rank);

        let created: Created = self.acknowledge(request).await?;
        log::info!("Created section {:?} in {} layout", created.id, self.scope);
        self.settle(Operation::AddSection).await?;
        Ok(created.id)
    }

    async fn create_block(
        &mut self,
        section_id: SectionId,
        kind: BlockKind,
    ) -> Result<Option<BlockId>, SyncError> {
        if self.model.is_loaded() && self.model.find_section(section_id).is_none() {
            return Err(SyncError::UnknownSection(section_id));
        }
        let body = CreateBlock {
            section_id,
            attributes_json: kind.default_attributes().to_string(),
            block_type: kind,
        };
        let request =
            ApiRequest::post(self.scope.path(Endpoint::Blocks)).json(serde_json::to_value(&body)?);

        let created: Created = self.acknowledge(request).await?;
        log::info!(
            "Created {} block {:?} in section {section_id}",
            body.block_type,
            created.id
        );
        self.settle(Operation::AddBlock).await?;
        Ok(created.id)
    }

    async fn palette_add(&mut self, kind: BlockKind) -> Result<Option<BlockId>, SyncError> {
        self.ensure_loaded().await?;
        if self.model.sections_in_order().is_empty() {
            self.create_section(DEFAULT_SECTION_TITLE).await?;
        }
        // Taken from the reloaded tree, the ack may not name the new section.
        let section_id = self
            .model
            .sections_in_order()
            .first()
            .map(|section| section.id)
            .ok_or(SyncError::NotLoaded)?;
        self.create_block(section_id, kind).await
    }

    async fn remove_block(&mut self, block_id: BlockId) -> Result<(), SyncError> {
        if self.model.is_loaded() && self.model.find_block(block_id).is_none() {
            return Err(SyncError::UnknownBlock(block_id));
        }
        let deleted: Deleted = self
            .acknowledge(ApiRequest::delete(self.scope.path(Endpoint::Block(block_id))))
            .await?;
        log::info!("Deleted block {}", deleted.deleted.unwrap_or(block_id));
        self.settle(Operation::DeleteBlock).await
    }

    async fn upsert_section(
        &mut self,
        section_id: SectionId,
        title: Option<&str>,
        is_enabled: Option<bool>,
    ) -> Result<(), SyncError> {
        let layout_id = self.ensure_loaded().await?;
        if self.model.find_section(section_id).is_none() {
            return Err(SyncError::UnknownSection(section_id));
        }
        let mut request = ApiRequest::post(self.scope.path(Endpoint::Sections))
            .query("layout_id", layout_id)
            .query("section_id", section_id);
        if let Some(title) = title {
            request = request.query("title", title);
        }
        if let Some(is_enabled) = is_enabled {
            request = request.query("is_enabled", is_enabled);
        }

        let _: Created = self.acknowledge(request).await?;
        log::info!("Updated section {section_id}");
        self.settle(Operation::UpdateSection).await
    }

    async fn submit_section_order(&mut self, order: &[SectionId]) -> Result<(), SyncError> {
        let layout_id = self.ensure_loaded().await?;
        check_permutation(&self.model.section_ids(), order)?;
        let body = ReorderSections {
            layout_id,
            order: dense_ranks(order),
        };
        let request = ApiRequest::post(self.scope.path(Endpoint::SectionsReorder))
            .json(serde_json::to_value(&body)?);

        let reordered: Reordered = self.acknowledge(request).await?;
        log::info!(
            "Reordered {} sections",
            reordered.updated.unwrap_or(order.len())
        );
        self.settle(Operation::ReorderSections).await
    }

    async fn submit_block_order(
        &mut self,
        section_id: SectionId,
        order: &[BlockId],
    ) -> Result<(), SyncError> {
        if self.model.is_loaded() {
            let blocks = self
                .model
                .blocks_in_order(section_id)
                .ok_or(SyncError::UnknownSection(section_id))?;
            let current: Vec<BlockId> = blocks.iter().map(|block| block.id).collect();
            check_permutation(&current, order)?;
        }
        let body = ReorderBlocks {
            section_id,
            order: dense_ranks(order),
        };
        let request = ApiRequest::post(self.scope.path(Endpoint::BlocksReorder))
            .json(serde_json::to_value(&body)?);

        let reordered: Reordered = self.acknowledge(request).await?;
        log::info!(
            "Reordered {} blocks in section {section_id}",
            reordered.updated.unwrap_or(order.len())
        );
        self.settle(Operation::ReorderBlocks).await
    }

    async fn checked_put(
        &mut self,
        block_id: BlockId,
        raw: &str,
        op: Operation,
    ) -> Result<(), SyncError> {
        if self.model.is_loaded() && self.model.find_block(block_id).is_none() {
            return Err(SyncError::UnknownBlock(block_id));
        }
        self.put_attributes(block_id, raw, op).await
    }

    async fn put_attributes(
        &mut self,
        block_id: BlockId,
        raw: &str,
        op: Operation,
    ) -> Result<(), SyncError> {
        let request = ApiRequest::put(self.scope.path(Endpoint::Block(block_id)))
            .query("attributes_json", raw);
        let _: Created = self.acknowledge(request).await?;
        log::info!("Stored attributes of block {block_id} ({} bytes)", raw.len());
        self.settle(op).await
    }

    /// Kind of a block in the current snapshot.
    fn block_kind(&self, block_id: BlockId) -> Result<BlockKind, SyncError> {
        if !self.model.is_loaded() {
            return Err(SyncError::NotLoaded);
        }
        self.model
            .find_block(block_id)
            .map(|(_, block)| block.kind.clone())
            .ok_or(SyncError::UnknownBlock(block_id))
    }

    async fn store_record(
        &mut self,
        block_id: BlockId,
        record: &AttributeRecord,
    ) -> Result<(), SyncError> {
        let kind = self.block_kind(block_id)?;
        let raw = encode(&kind, record)?;
        self.put_attributes(block_id, &raw, Operation::SaveForm).await
    }

    /// Read the grid from the snapshot (leniently), edit it, store it.
    async fn edit_grid(
        &mut self,
        block_id: BlockId,
        edit: impl FnOnce(&mut GridAttributes),
    ) -> Result<(), SyncError> {
        let kind = self.block_kind(block_id)?;
        if !kind.is_grid() {
            return Err(SyncError::NotAGrid(kind));
        }
        let raw = self
            .model
            .find_block(block_id)
            .map(|(_, block)| block.attributes_text().to_owned())
            .ok_or(SyncError::UnknownBlock(block_id))?;

        let mut record =
            decode_or_empty(&kind, &raw).ok_or_else(|| SyncError::NoForm(kind.clone()))?;
        let grid = record
            .grid_mut()
            .ok_or_else(|| SyncError::NotAGrid(kind.clone()))?;
        edit(grid);

        let raw = encode(&kind, &record)?;
        self.put_attributes(block_id, &raw, Operation::EditGrid).await
    }

    async fn submit_publish(&mut self) -> Result<PublishReceipt, SyncError> {
        let receipt: PublishReceipt = self
            .acknowledge(ApiRequest::post(self.scope.path(Endpoint::Publish)))
            .await?;
        log::info!(
            "Published {} layout: status={:?} at={:?}",
            self.scope,
            receipt.status,
            receipt.published_at
        );
        self.emit(SyncEvent::Published(receipt.clone()));
        Ok(receipt)
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    fn emit(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Event channel full, dropping {event:?}");
            }
            Err(TrySendError::Closed(event)) => {
                log::debug!("No event listener, dropping {event:?}");
            }
        }
    }

    fn report<R>(&self, op: Operation, result: Result<R, SyncError>) -> Result<R, SyncError> {
        if let Err(e) = &result {
            if e.is_rejection() {
                log::warn!("{op} rejected by the layout store: {e}");
            } else {
                log::error!("{op} failed: {e}");
            }
            self.emit(SyncEvent::Failed {
                op,
                message: e.user_message(),
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;
    use trellis_core::kind::QUICK_ENTRY_COLUMNS;

    use crate::transport::Method;

    /// Answers from a fixed script and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ApiResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<ApiRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Unavailable("script exhausted".into())))
        }
    }

    fn ok(body: Value) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse::ok(body))
    }

    fn tree() -> Value {
        json!({
            "layout": {"id": 1, "scope": "home", "status": "draft"},
            "sections": [
                {"id": 5, "title": "Top", "sort_order": 0, "blocks": [
                    {"id": 50, "block_type": "RichText", "attributes_json": "{}", "sort_order": 0},
                    {"id": 51, "block_type": "QuickEntryGrid",
                     "attributes_json": "{\"heading_title\":\"Go\",\"items\":[{\"title\":\"A\"}]}",
                     "sort_order": 1}
                ]},
                {"id": 6, "title": "Bottom", "sort_order": 1, "blocks": []}
            ]
        })
    }

    fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn loaded(
        replies: Vec<Result<ApiResponse, TransportError>>,
    ) -> (SyncEngine<Arc<Scripted>>, Arc<Scripted>) {
        let mut script = vec![ok(tree())];
        script.extend(replies);
        let transport = Scripted::new(script);
        let mut engine = SyncEngine::new(transport.clone(), Scope::Global);
        engine.load().await.unwrap();
        (engine, transport)
    }

    #[test]
    fn test_accept_contract() {
        assert_eq!(accept(ApiResponse::ok(json!({"id": 3}))).unwrap(), json!({"id": 3}));

        let err = accept(ApiResponse::new(404, json!({"error": "Block not found"}))).unwrap_err();
        assert!(matches!(&err, SyncError::Rejected { status: 404, message } if message == "Block not found"));
        assert_eq!(err.user_message(), "Block not found");

        let err = accept(ApiResponse::ok(json!({"error": "Section not found"}))).unwrap_err();
        assert!(matches!(err, SyncError::Rejected { status: 200, .. }));

        let err = accept(ApiResponse::new(500, Value::Null)).unwrap_err();
        assert_eq!(err.user_message(), "Internal Server Error");

        let err = accept(ApiResponse::new(502, json!("Bad gateway from proxy"))).unwrap_err();
        assert_eq!(err.user_message(), "Bad gateway from proxy");
    }

    #[test]
    fn test_check_permutation() {
        assert!(check_permutation(&[1, 2, 3], &[3, 1, 2]).is_ok());
        assert!(check_permutation(&[], &[]).is_ok());
        assert!(matches!(check_permutation(&[1, 2], &[1, 1]), Err(SyncError::InvalidOrder(_))));
        assert!(matches!(check_permutation(&[1, 2], &[1, 9]), Err(SyncError::InvalidOrder(_))));
        assert!(matches!(check_permutation(&[1, 2], &[2]), Err(SyncError::InvalidOrder(_))));
    }

    #[tokio::test]
    async fn test_add_block_submits_defaults_and_reloads_once() {
        let transport = Scripted::new(vec![ok(json!({"id": 99})), ok(tree())]);
        let mut engine = SyncEngine::new(transport.clone(), Scope::Global);

        let id = engine.add_block(5, BlockKind::HeroBanner).await.unwrap();
        assert_eq!(id, Some(99));

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, Method::Post);
        assert_eq!(seen[0].path, "/admin/home/blocks");
        let body = seen[0].body.as_ref().unwrap();
        assert_eq!(body["section_id"], json!(5));
        assert_eq!(body["block_type"], json!("HeroBanner"));
        let attributes: Value =
            serde_json::from_str(body["attributes_json"].as_str().unwrap()).unwrap();
        assert_eq!(attributes, BlockKind::HeroBanner.default_attributes());
        assert_eq!(seen[1].method, Method::Get);
        assert_eq!(seen[1].path, "/admin/home/data");

        // The model is exactly what the reload returned.
        assert_eq!(engine.model().generation(), 1);
        assert!(engine.model().find_block(99).is_none());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_snapshot() {
        let (mut engine, _) = loaded(vec![Err(TransportError::Unavailable("down".into()))]).await;
        let mut rx = engine.take_event_rx().unwrap();
        drain(&mut rx);

        let err = engine.load().await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(engine.model().generation(), 1);
        assert_eq!(engine.model().section_ids(), vec![5, 6]);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SyncEvent::Failed { op: Operation::Load, .. }]
        ));
    }

    #[tokio::test]
    async fn test_rejection_carries_server_message() {
        let (mut engine, transport) =
            loaded(vec![Ok(ApiResponse::new(404, json!({"error": "Block not found"})))]).await;
        let mut rx = engine.take_event_rx().unwrap();
        drain(&mut rx);

        let err = engine.delete_block(50).await.unwrap_err();
        assert_eq!(err.user_message(), "Block not found");
        assert_eq!(transport.seen().len(), 2);
        assert_eq!(
            drain(&mut rx),
            vec![SyncEvent::Failed {
                op: Operation::DeleteBlock,
                message: "Block not found".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_orders_make_no_call() {
        let (mut engine, transport) = loaded(vec![]).await;

        assert!(matches!(
            engine.reorder_sections(&[5]).await,
            Err(SyncError::InvalidOrder(_))
        ));
        assert!(matches!(
            engine.reorder_sections(&[5, 5]).await,
            Err(SyncError::InvalidOrder(_))
        ));
        assert!(matches!(
            engine.reorder_blocks(5, &[51, 50, 7]).await,
            Err(SyncError::InvalidOrder(_))
        ));
        assert!(matches!(
            engine.reorder_blocks(42, &[]).await,
            Err(SyncError::UnknownSection(42))
        ));
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_reorder_blocks_submits_dense_ranks() {
        let (mut engine, transport) =
            loaded(vec![ok(json!({"updated": 2})), ok(tree())]).await;

        engine.reorder_blocks(5, &[51, 50]).await.unwrap();
        let seen = transport.seen();
        assert_eq!(seen[1].path, "/admin/home/blocks/reorder");
        assert_eq!(
            seen[1].body,
            Some(json!({"section_id": 5, "order": [
                {"id": 51, "sort_order": 0},
                {"id": 50, "sort_order": 1}
            ]}))
        );
        assert_eq!(seen[2].path, "/admin/home/data");
    }

    #[tokio::test]
    async fn test_add_section_uses_count_as_rank() {
        let transport = Scripted::new(vec![ok(tree()), ok(json!({"id": 7})), ok(tree())]);
        let mut engine = SyncEngine::new(transport.clone(), Scope::Column(3));

        let id = engine.add_section().await.unwrap();
        assert_eq!(id, Some(7));

        let seen = transport.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].path, "/admin/columns/3/builder/data");
        assert_eq!(seen[1].path, "/admin/columns/3/builder/sections");
        assert_eq!(seen[1].query_value("layout_id"), Some("1"));
        assert_eq!(seen[1].query_value("title"), Some(DEFAULT_SECTION_TITLE));
        assert_eq!(seen[1].query_value("sort_order"), Some("2"));
    }

    #[tokio::test]
    async fn test_update_section_query() {
        let (mut engine, transport) = loaded(vec![ok(json!({"id": 6})), ok(tree())]).await;

        engine.update_section(6, None, Some(false)).await.unwrap();
        let request = &transport.seen()[1];
        assert_eq!(request.query_value("section_id"), Some("6"));
        assert_eq!(request.query_value("is_enabled"), Some("false"));
        assert_eq!(request.query_value("title"), None);

        assert!(matches!(
            engine.update_section(99, Some("x"), None).await,
            Err(SyncError::UnknownSection(99))
        ));
    }

    #[tokio::test]
    async fn test_grid_edit_preserves_unknown_keys() {
        let (mut engine, transport) = loaded(vec![ok(json!({"id": 51})), ok(tree())]).await;

        let item = GridItem::from_cells(QUICK_ENTRY_COLUMNS, &["B", "", "", "/b", "", "x, y"]);
        engine.save_grid_item(51, 2, item).await.unwrap();

        let request = &transport.seen()[1];
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.path, "/admin/home/blocks/51");
        let stored: Value =
            serde_json::from_str(request.query_value("attributes_json").unwrap()).unwrap();
        assert_eq!(stored["heading_title"], json!("Go"));
        let items = stored["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["title"], json!("A"));
        assert_eq!(items[1], json!({}));
        assert_eq!(items[2]["tags"], json!(["x", "y"]));
    }

    #[tokio::test]
    async fn test_grid_edit_on_other_kind() {
        let (mut engine, transport) = loaded(vec![]).await;
        assert!(matches!(
            engine.delete_grid_item(50, 0).await,
            Err(SyncError::NotAGrid(BlockKind::RichText))
        ));
        assert!(matches!(
            engine.delete_grid_item(404, 0).await,
            Err(SyncError::UnknownBlock(404))
        ));
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_save_form_requires_snapshot() {
        let transport = Scripted::new(vec![]);
        let mut engine = SyncEngine::new(transport.clone(), Scope::Global);
        let record = AttributeRecord::empty(&BlockKind::HeroBanner).unwrap();
        assert!(matches!(
            engine.save_form(1, &record).await,
            Err(SyncError::NotLoaded)
        ));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_publish_does_not_reload() {
        let (mut engine, transport) = loaded(vec![ok(
            json!({"status": "published", "published_at": "2024-01-01T00:00:00"}),
        )])
        .await;
        let mut rx = engine.take_event_rx().unwrap();
        drain(&mut rx);

        let receipt = engine.publish().await.unwrap();
        assert_eq!(receipt.status.as_deref(), Some("published"));
        assert_eq!(transport.seen().len(), 2);
        assert_eq!(drain(&mut rx), vec![SyncEvent::Published(receipt)]);
    }

    #[tokio::test]
    async fn test_untyped_acks_still_reload() {
        let (mut engine, transport) = loaded(vec![
            ok(json!({"success": true})),
            ok(tree()),
            Ok(ApiResponse::new(204, Value::Null)),
            ok(tree()),
            ok(json!({"ok": 1})),
            ok(tree()),
        ])
        .await;

        engine.delete_block(50).await.unwrap();
        assert_eq!(engine.model().generation(), 2);

        engine.reorder_sections(&[6, 5]).await.unwrap();
        assert_eq!(engine.model().generation(), 3);

        let id = engine.add_block(6, BlockKind::RichText).await.unwrap();
        assert_eq!(id, None);
        assert_eq!(engine.model().generation(), 4);
        assert_eq!(transport.seen().len(), 7);
    }

    #[tokio::test]
    async fn test_publish_with_empty_ack() {
        let (mut engine, _) = loaded(vec![Ok(ApiResponse::new(204, Value::Null))]).await;
        let receipt = engine.publish().await.unwrap();
        assert_eq!(receipt, PublishReceipt::default());
    }

    #[tokio::test]
    async fn test_mutation_events_in_order() {
        let (mut engine, _) = loaded(vec![ok(json!({"deleted": 50})), ok(tree())]).await;
        let mut rx = engine.take_event_rx().unwrap();
        drain(&mut rx);

        engine.delete_block(50).await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                SyncEvent::Mutated(Operation::DeleteBlock),
                SyncEvent::Loaded { sections: 2, blocks: 2 },
            ]
        );
    }

    #[test]
    fn test_preview_path() {
        let engine = SyncEngine::new(Scripted::new(vec![]), Scope::Column(9));
        assert_eq!(engine.preview_path(), "/admin/columns/9/builder/preview");
    }
}
