//! Cached content records.
//!
//! A [`ContentNode`] is the immutable, published form of a content item as it
//! is kept in the snapshot dictionary. Nodes are shared between generations, so
//! they are built once and never mutated afterwards; a changed item is a new
//! node.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Separator of the ancestor ids in a content path.
const PATH_SEPARATOR: char = ',';

/// A published content item.
///
/// The `path` lists the ids of all ancestors and of the node itself, starting
/// at the virtual root `-1`, e.g. `-1,1046,1050`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Integer identifier.
    pub id: i32,
    /// Unique key (the content GUID as an integer).
    pub key: u128,
    /// Comma separated ancestor path including the node itself.
    pub path: String,
    /// Position among siblings.
    pub sort_order: i32,
    /// Creation time in milliseconds since the Unix epoch.
    pub create_date_ms: i64,
    /// Identifier of the user that created the item.
    pub creator_id: i32,
    /// Identifier of the content type.
    pub content_type_id: i32,
    /// Whether this is the draft rather than the published version.
    pub is_draft: bool,
    /// Serialized property data.
    pub data: Option<Bytes>,
}

impl ContentNode {
    /// Creates a node with the given id and key, placed directly under the root.
    #[must_use]
    pub fn new(id: i32, key: u128) -> Self {
        Self {
            id,
            key,
            path: format!("-1{PATH_SEPARATOR}{id}"),
            sort_order: 0,
            create_date_ms: 0,
            creator_id: -1,
            content_type_id: 0,
            is_draft: false,
            data: None,
        }
    }

    /// Sets the path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type_id: i32) -> Self {
        self.content_type_id = content_type_id;
        self
    }

    /// Marks the node as a draft.
    #[must_use]
    pub fn as_draft(mut self) -> Self {
        self.is_draft = true;
        self
    }

    /// Sets the property data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Returns the ancestor ids of the path, root first, skipping malformed
    /// segments.
    pub fn path_segments(&self) -> impl Iterator<Item = i32> + '_ {
        self.path
            .split(PATH_SEPARATOR)
            .filter_map(|segment| segment.trim().parse().ok())
    }

    /// Returns the depth of the node; items directly under the root are at
    /// level 1.
    #[must_use]
    pub fn level(&self) -> usize {
        self.path_segments().count().saturating_sub(1)
    }

    /// Returns the id of the parent, or `None` for the root itself.
    #[must_use]
    pub fn parent_id(&self) -> Option<i32> {
        let segments: Vec<i32> = self.path_segments().collect();
        match segments.len() {
            0 | 1 => None,
            n => Some(segments[n - 2]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_under_root() {
        let node = ContentNode::new(1046, 7);
        assert_eq!(node.path, "-1,1046");
        assert_eq!(node.level(), 1);
        assert_eq!(node.parent_id(), Some(-1));
        assert!(!node.is_draft);
    }

    #[test]
    fn test_nested_path() {
        let node = ContentNode::new(1050, 9).with_path("-1,1046,1050");
        assert_eq!(node.path_segments().collect::<Vec<_>>(), vec![-1, 1046, 1050]);
        assert_eq!(node.level(), 2);
        assert_eq!(node.parent_id(), Some(1046));
    }

    #[test]
    fn test_malformed_path_segments_are_skipped() {
        let node = ContentNode::new(3, 3).with_path("-1,,x,3");
        assert_eq!(node.level(), 1);
    }

    #[test]
    fn test_builder() {
        let node = ContentNode::new(1, 1)
            .with_sort_order(4)
            .with_content_type(12)
            .with_data(&b"{\"title\":\"Home\"}"[..])
            .as_draft();
        assert_eq!(node.sort_order, 4);
        assert_eq!(node.content_type_id, 12);
        assert!(node.is_draft);
        assert_eq!(node.data.as_deref(), Some(&b"{\"title\":\"Home\"}"[..]));
    }

    #[test]
    fn test_json_shape() {
        let node = ContentNode::new(1046, 1).with_sort_order(2);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], 1046);
        assert_eq!(json["path"], "-1,1046");
        assert_eq!(json["sort_order"], 2);
        let text = serde_json::to_string(&node).unwrap();
        let back: ContentNode = serde_json::from_str(&text).unwrap();
        assert_eq!(back, node);
    }
}
