//! Request and response bodies of the layout store.
//!
//! Only the JSON-bodied endpoints have types here; the query-string
//! endpoints (`POST sections`, `PUT blocks/{id}`) are assembled directly by
//! the engine.
//!
//! ```text
//! POST {prefix}/sections/reorder  {layout_id,  order:[{id, sort_order}]} → {updated}
//! POST {prefix}/blocks/reorder    {section_id, order:[{id, sort_order}]} → {updated}
//! POST {prefix}/blocks            {section_id, block_type, attributes_json} → {id}
//! DELETE {prefix}/blocks/{id}                                           → {deleted}
//! POST {prefix}/publish                                  → {status, published_at}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_core::{BlockId, BlockKind, LayoutId, SectionId};

/// One entry of a reorder batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankEntry {
    pub id: i64,
    pub sort_order: i64,
}

/// Assign dense zero-based ranks in the given order.
pub fn dense_ranks(order: &[i64]) -> Vec<RankEntry> {
    order
        .iter()
        .zip(0..)
        .map(|(&id, sort_order)| RankEntry { id, sort_order })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReorderSections {
    pub layout_id: LayoutId,
    pub order: Vec<RankEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReorderBlocks {
    pub section_id: SectionId,
    pub order: Vec<RankEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateBlock {
    pub section_id: SectionId,
    pub block_type: BlockKind,
    /// Attribute JSON as text; the store keeps it uninterpreted.
    pub attributes_json: String,
}

// Acknowledgements are informational. Any 2xx without an `error` field means
// the mutation was applied, so every field is optional and the engine reads
// them with `read_ack`, which never fails.

/// `{id}` returned by creations and attribute updates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Created {
    #[serde(default)]
    pub id: Option<i64>,
}

/// `{updated}` returned by reorder batches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reordered {
    #[serde(default)]
    pub updated: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deleted {
    #[serde(default)]
    pub deleted: Option<BlockId>,
}

/// Read an acknowledgement body, falling back to the empty ack when the
/// body is empty or shaped differently.
pub fn read_ack<R: DeserializeOwned + Default>(body: Value) -> R {
    if body.is_null() {
        return R::default();
    }
    serde_json::from_value(body).unwrap_or_else(|e| {
        log::debug!("Unrecognized acknowledgement body: {e}");
        R::default()
    })
}

/// What the store answers to a publish request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

/// The error text a store response carries, if any.
///
/// The store reports failures as `{"error": ...}`; framework-level errors
/// come back as `{"detail": ...}`.
pub fn server_message(body: &Value) -> Option<String> {
    let object = body.as_object()?;
    ["error", "detail", "message"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dense_ranks() {
        let ranks = dense_ranks(&[3, 1, 2]);
        assert_eq!(
            ranks,
            vec![
                RankEntry { id: 3, sort_order: 0 },
                RankEntry { id: 1, sort_order: 1 },
                RankEntry { id: 2, sort_order: 2 },
            ]
        );
        assert!(dense_ranks(&[]).is_empty());
    }

    #[test]
    fn test_reorder_wire_shape() {
        let body = ReorderBlocks {
            section_id: 4,
            order: dense_ranks(&[9, 8]),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"section_id": 4, "order": [{"id": 9, "sort_order": 0}, {"id": 8, "sort_order": 1}]})
        );
    }

    #[test]
    fn test_create_block_wire_shape() {
        let body = CreateBlock {
            section_id: 5,
            block_type: BlockKind::HeroBanner,
            attributes_json: "{}".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"section_id": 5, "block_type": "HeroBanner", "attributes_json": "{}"})
        );
    }

    #[test]
    fn test_publish_receipt_tolerates_missing_fields() {
        let receipt: PublishReceipt = serde_json::from_value(json!({"status": "published"})).unwrap();
        assert_eq!(receipt.status.as_deref(), Some("published"));
        assert_eq!(receipt.published_at, None);
    }

    #[test]
    fn test_read_ack_is_lenient() {
        let created: Created = read_ack(json!({"id": 7}));
        assert_eq!(created.id, Some(7));

        let created: Created = read_ack(json!({"success": true}));
        assert_eq!(created.id, None);

        let reordered: Reordered = read_ack(Value::Null);
        assert_eq!(reordered, Reordered::default());

        let deleted: Deleted = read_ack(json!({"deleted": "yes"}));
        assert_eq!(deleted.deleted, None);

        let receipt: PublishReceipt = read_ack(json!("ok"));
        assert_eq!(receipt, PublishReceipt::default());
    }

    #[test]
    fn test_server_message() {
        assert_eq!(
            server_message(&json!({"error": "Block not found"})).as_deref(),
            Some("Block not found")
        );
        assert_eq!(
            server_message(&json!({"detail": "Not Found"})).as_deref(),
            Some("Not Found")
        );
        assert_eq!(
            server_message(&json!({"error": null, "detail": [1]})).as_deref(),
            Some("[1]")
        );
        assert_eq!(server_message(&json!({"id": 1})), None);
        assert_eq!(server_message(&json!("plain")), None);
    }
}
