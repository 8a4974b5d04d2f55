//! In-process reference implementation of the layout store.
//!
//! Architecture:
//! ```text
//! SyncEngine ── ApiRequest ──► ReferenceServer::send
//!                                   │ lock
//!                                   ▼
//!                              ServerState
//!                                ├── layouts: Scope → LayoutTree (created on first access)
//!                                ├── failures: injected, consumed one per request
//!                                └── requests: every request seen, in order
//! ```
//!
//! It implements the endpoint contract the engine relies on and nothing of
//! the real service's business logic. Ids are allocated from one counter
//! shared by layouts, sections and blocks. Block lookups by id are global
//! across layouts, like the real store's.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use trellis_core::{
    Block, BlockId, BlockKind, LayoutId, LayoutInfo, LayoutTree, Section, SectionId,
};

use crate::protocol::{ReorderBlocks, ReorderSections};
use crate::scope::Scope;
use crate::transport::{ApiRequest, ApiResponse, Method, Transport, TransportError};

/// A failure to inject into the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The request never reaches the store.
    Unreachable,
    /// The store answers `status` with `{"error": error}`.
    Status { status: u16, error: String },
}

#[derive(Debug, Clone)]
struct StoredLayout {
    tree: LayoutTree,
    published_at: Option<String>,
}

impl StoredLayout {
    fn new(id: LayoutId, scope: Scope) -> Self {
        let layout = LayoutInfo {
            id,
            scope: Some(if scope.is_global() { "home" } else { "column" }.to_string()),
            scope_id: scope.column_id().and_then(|id| i64::try_from(id).ok()),
            status: Some("draft".to_string()),
        };
        Self {
            tree: LayoutTree {
                layout,
                sections: Vec::new(),
            },
            published_at: None,
        }
    }

    /// The tree as the store returns it: siblings ordered by rank.
    fn ordered(&self) -> LayoutTree {
        let mut tree = self.tree.clone();
        tree.sections.sort_by_key(|section| section.sort_order);
        for section in &mut tree.sections {
            section.blocks.sort_by_key(|block| block.sort_order);
        }
        tree
    }
}

#[derive(Debug, Default)]
struct ServerState {
    layouts: HashMap<Scope, StoredLayout>,
    next_id: i64,
    failures: VecDeque<Failure>,
    requests: Vec<ApiRequest>,
}

/// Body of `POST {prefix}/blocks`. The store fills in what the client omits.
#[derive(Debug, Deserialize)]
struct NewBlock {
    section_id: SectionId,
    #[serde(default)]
    block_type: Option<BlockKind>,
    #[serde(default)]
    attributes_json: Option<String>,
}

fn alloc(next_id: &mut i64) -> i64 {
    *next_id += 1;
    *next_id
}

fn ok(body: Value) -> ApiResponse {
    ApiResponse::ok(body)
}

fn not_found(error: &str) -> ApiResponse {
    ApiResponse::new(404, json!({ "error": error }))
}

fn unprocessable(detail: String) -> ApiResponse {
    ApiResponse::new(422, json!({ "detail": detail }))
}

fn route_not_found() -> ApiResponse {
    ApiResponse::new(404, json!({ "detail": "Not Found" }))
}

fn query_i64(request: &ApiRequest, key: &str) -> Result<Option<i64>, ApiResponse> {
    request
        .query_value(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| unprocessable(format!("{key}: not a valid integer")))
        })
        .transpose()
}

fn query_bool(request: &ApiRequest, key: &str) -> Result<Option<bool>, ApiResponse> {
    request
        .query_value(key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(true),
            "false" | "0" | "off" | "no" => Ok(false),
            _ => Err(unprocessable(format!("{key}: not a valid boolean"))),
        })
        .transpose()
}

fn body_as<T: serde::de::DeserializeOwned>(request: &ApiRequest) -> Result<T, ApiResponse> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|e| unprocessable(format!("invalid body: {e}")))
}

/// Reassign dense ranks in current rank order.
fn compact(blocks: &mut [Block]) {
    blocks.sort_by_key(|block| block.sort_order);
    for (block, rank) in blocks.iter_mut().zip(0..) {
        block.sort_order = Some(rank);
    }
}

fn now_unix_secs() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl ServerState {
    /// The layout of `scope`, created on first access.
    fn layout_mut(&mut self, scope: Scope) -> &mut StoredLayout {
        let Self {
            layouts, next_id, ..
        } = self;
        layouts
            .entry(scope)
            .or_insert_with(|| StoredLayout::new(alloc(next_id), scope))
    }

    fn sections_mut(&mut self) -> impl Iterator<Item = &mut Section> + '_ {
        self.layouts
            .values_mut()
            .flat_map(|layout| layout.tree.sections.iter_mut())
    }

    fn add_section(&mut self, scope: Scope, title: &str) -> SectionId {
        let Self {
            layouts, next_id, ..
        } = self;
        let layout = layouts
            .entry(scope)
            .or_insert_with(|| StoredLayout::new(alloc(next_id), scope));
        let id = alloc(next_id);
        let rank = layout.tree.sections.len() as i64;
        layout.tree.sections.push(Section {
            id,
            title: Some(title.to_string()),
            sort_order: Some(rank),
            is_enabled: true,
            blocks: Vec::new(),
        });
        id
    }

    /// Append a block to a section; `None` when the section does not exist.
    fn add_block(
        &mut self,
        section_id: SectionId,
        kind: BlockKind,
        attributes_json: String,
    ) -> Option<BlockId> {
        let id = self.next_id + 1;
        let section = self.sections_mut().find(|section| section.id == section_id)?;
        let rank = section.blocks.len() as i64;
        section.blocks.push(Block {
            id,
            kind,
            attributes_json: Some(attributes_json),
            sort_order: Some(rank),
            is_enabled: true,
        });
        self.next_id = id;
        Some(id)
    }

    fn block_mut(&mut self, block_id: BlockId) -> Option<&mut Block> {
        self.sections_mut()
            .flat_map(|section| section.blocks.iter_mut())
            .find(|block| block.id == block_id)
    }

    // ---------------------------------------------------------------
    // Routing
    // ---------------------------------------------------------------

    fn route(&mut self, request: &ApiRequest) -> ApiResponse {
        let Some((scope, rest)) = Scope::split_path(&request.path) else {
            return route_not_found();
        };
        let block_id = rest
            .strip_prefix("/blocks/")
            .and_then(|id| id.parse::<BlockId>().ok());

        let result = match (request.method, rest, block_id) {
            (Method::Get, "/data", _) => Ok(self.read_tree(scope)),
            (Method::Get, "/preview", _) => Ok(self.preview(scope)),
            (Method::Post, "/sections", _) => self.upsert_section(request),
            (Method::Post, "/sections/reorder", _) => self.reorder_sections(request),
            (Method::Post, "/blocks", _) => self.create_block(request),
            (Method::Post, "/blocks/reorder", _) => self.reorder_blocks(request),
            (Method::Post, "/publish", _) => Ok(self.publish(scope)),
            (Method::Put, _, Some(id)) => self.update_block(id, request),
            (Method::Delete, _, Some(id)) => Ok(self.delete_block(id)),
            _ => Ok(route_not_found()),
        };
        result.unwrap_or_else(|rejection| rejection)
    }

    fn read_tree(&mut self, scope: Scope) -> ApiResponse {
        let tree = self.layout_mut(scope).ordered();
        match serde_json::to_value(&tree) {
            Ok(body) => ok(body),
            Err(e) => ApiResponse::new(500, json!({ "error": e.to_string() })),
        }
    }

    fn upsert_section(&mut self, request: &ApiRequest) -> Result<ApiResponse, ApiResponse> {
        let layout_id = query_i64(request, "layout_id")?
            .ok_or_else(|| unprocessable("layout_id: field required".to_string()))?;
        let section_id = query_i64(request, "section_id")?;
        let sort_order = query_i64(request, "sort_order")?;
        let is_enabled = query_bool(request, "is_enabled")?;
        let title = request.query_value("title");

        let Self {
            layouts, next_id, ..
        } = self;
        let layout = layouts
            .values_mut()
            .find(|layout| layout.tree.layout.id == layout_id)
            .ok_or_else(|| not_found("Layout not found"))?;

        let Some(section_id) = section_id else {
            let id = alloc(next_id);
            layout.tree.sections.push(Section {
                id,
                title: Some(title.unwrap_or_default().to_string()),
                sort_order: Some(sort_order.unwrap_or(0)),
                is_enabled: is_enabled.unwrap_or(true),
                blocks: Vec::new(),
            });
            return Ok(ok(json!({ "id": id })));
        };

        let section = layout
            .tree
            .sections
            .iter_mut()
            .find(|section| section.id == section_id)
            .ok_or_else(|| not_found("Section not found"))?;
        if let Some(title) = title {
            section.title = Some(title.to_string());
        }
        if let Some(sort_order) = sort_order {
            section.sort_order = Some(sort_order);
        }
        if let Some(is_enabled) = is_enabled {
            section.is_enabled = is_enabled;
        }
        Ok(ok(json!({ "id": section.id })))
    }

    fn reorder_sections(&mut self, request: &ApiRequest) -> Result<ApiResponse, ApiResponse> {
        let batch: ReorderSections = body_as(request)?;
        let mut updated = 0;
        if let Some(layout) = self
            .layouts
            .values_mut()
            .find(|layout| layout.tree.layout.id == batch.layout_id)
        {
            for entry in &batch.order {
                if let Some(section) = layout.tree.sections.iter_mut().find(|s| s.id == entry.id) {
                    section.sort_order = Some(entry.sort_order);
                    updated += 1;
                }
            }
        }
        Ok(ok(json!({ "updated": updated })))
    }

    fn create_block(&mut self, request: &ApiRequest) -> Result<ApiResponse, ApiResponse> {
        let new: NewBlock = body_as(request)?;
        let kind = new.block_type.unwrap_or(BlockKind::RichText);
        let attributes = new.attributes_json.unwrap_or_else(|| "{}".to_string());
        let id = self
            .add_block(new.section_id, kind, attributes)
            .ok_or_else(|| not_found("Section not found"))?;
        Ok(ok(json!({ "id": id })))
    }

    fn reorder_blocks(&mut self, request: &ApiRequest) -> Result<ApiResponse, ApiResponse> {
        let batch: ReorderBlocks = body_as(request)?;
        let mut updated = 0;
        if let Some(section) = self.sections_mut().find(|s| s.id == batch.section_id) {
            for entry in &batch.order {
                if let Some(block) = section.blocks.iter_mut().find(|b| b.id == entry.id) {
                    block.sort_order = Some(entry.sort_order);
                    updated += 1;
                }
            }
        }
        Ok(ok(json!({ "updated": updated })))
    }

    fn update_block(
        &mut self,
        block_id: BlockId,
        request: &ApiRequest,
    ) -> Result<ApiResponse, ApiResponse> {
        let attributes = request
            .query_value("attributes_json")
            .ok_or_else(|| unprocessable("attributes_json: field required".to_string()))?
            .to_string();
        let block = self
            .block_mut(block_id)
            .ok_or_else(|| not_found("Block not found"))?;
        block.attributes_json = Some(attributes);
        Ok(ok(json!({ "id": block_id })))
    }

    fn delete_block(&mut self, block_id: BlockId) -> ApiResponse {
        for section in self.sections_mut() {
            if let Some(index) = section.blocks.iter().position(|b| b.id == block_id) {
                section.blocks.remove(index);
                compact(&mut section.blocks);
                return ok(json!({ "deleted": block_id }));
            }
        }
        not_found("Block not found")
    }

    fn publish(&mut self, scope: Scope) -> ApiResponse {
        let layout = self.layout_mut(scope);
        let published_at = now_unix_secs();
        layout.tree.layout.status = Some("published".to_string());
        layout.published_at = Some(published_at.clone());
        ok(json!({ "status": "published", "published_at": published_at }))
    }

    fn preview(&mut self, scope: Scope) -> ApiResponse {
        let tree = self.layout_mut(scope).ordered();
        let mut html = String::from("<!doctype html>\n<main class=\"layout-preview\">\n");
        for section in tree.sections.iter().filter(|s| s.is_enabled) {
            let title = escape_html(section.title.as_deref().unwrap_or_default());
            html.push_str(&format!("<section data-id=\"{}\">\n<h2>{title}</h2>\n", section.id));
            for block in section.blocks.iter().filter(|b| b.is_enabled) {
                html.push_str(&format!(
                    "<div class=\"block\" data-type=\"{}\" data-id=\"{}\">{}</div>\n",
                    escape_html(block.kind.as_str()),
                    block.id,
                    escape_html(block.attributes_text()),
                ));
            }
            html.push_str("</section>\n");
        }
        html.push_str("</main>\n");
        ok(Value::String(html))
    }
}

/// In-memory layout store speaking the builder's endpoint contract.
#[derive(Debug, Default)]
pub struct ReferenceServer {
    state: Mutex<ServerState>,
}

impl ReferenceServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with a small home layout, used by the offline demo.
    pub fn seeded_demo() -> Self {
        let mut state = ServerState::default();

        let hero = state.add_section(Scope::Global, "Hero");
        state.add_block(
            hero,
            BlockKind::HeroBanner,
            BlockKind::HeroBanner.default_attributes().to_string(),
        );

        let entries = state.add_section(Scope::Global, "Quick entries");
        let grid = json!({
            "heading_title": "Start here",
            "items": [
                {"title": "Docs", "subtitle": "", "desc": "Guides", "href": "/docs", "icon": "book", "tags": ["guide"]},
                {"title": "Support", "subtitle": "", "desc": "Ask us", "href": "/support", "icon": "help", "tags": []}
            ]
        });
        state.add_block(entries, BlockKind::QuickEntryGrid, grid.to_string());

        let contact = state.add_section(Scope::Global, "Contact");
        state.add_block(
            contact,
            BlockKind::RichText,
            BlockKind::RichText.default_attributes().to_string(),
        );
        state.add_block(
            contact,
            BlockKind::ContactSection,
            BlockKind::ContactSection.default_attributes().to_string(),
        );

        Self {
            state: Mutex::new(state),
        }
    }

    /// Make the next request fail. Failures queue up, one per request.
    pub async fn fail_next(&self, failure: Failure) {
        self.state.lock().await.failures.push_back(failure);
    }

    /// Every request seen so far, including failed ones.
    pub async fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    /// Add a section directly, bypassing the request log.
    pub async fn seed_section(&self, scope: Scope, title: &str) -> SectionId {
        self.state.lock().await.add_section(scope, title)
    }

    /// Add a block directly; `None` when the section does not exist.
    pub async fn seed_block(
        &self,
        section_id: SectionId,
        kind: BlockKind,
        attributes_json: &str,
    ) -> Option<BlockId> {
        self.state
            .lock()
            .await
            .add_block(section_id, kind, attributes_json.to_string())
    }

    /// The tree of `scope` as `GET data` would return it, if it exists yet.
    pub async fn snapshot(&self, scope: Scope) -> Option<LayoutTree> {
        self.state
            .lock()
            .await
            .layouts
            .get(&scope)
            .map(StoredLayout::ordered)
    }

    /// Publication time of the layout of `scope`, once published.
    pub async fn published_at(&self, scope: Scope) -> Option<String> {
        self.state
            .lock()
            .await
            .layouts
            .get(&scope)
            .and_then(|layout| layout.published_at.clone())
    }
}

#[async_trait]
impl Transport for ReferenceServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut state = self.state.lock().await;
        state.requests.push(request.clone());

        if let Some(failure) = state.failures.pop_front() {
            log::debug!("Injected failure for {} {}: {failure:?}", request.method, request.path);
            return match failure {
                Failure::Unreachable => Err(TransportError::Unavailable(
                    "reference server unreachable".to_string(),
                )),
                Failure::Status { status, error } => {
                    Ok(ApiResponse::new(status, json!({ "error": error })))
                }
            };
        }

        let response = state.route(&request);
        log::debug!("{} {} -> {}", request.method, request.path, response.status);
        Ok(response)
    }
}
