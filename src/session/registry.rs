use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::graph_utils::graph::{
    FlowGraph, Node, NodeData, NodeId, NodeTemplate, Position, Selection,
};
use crate::graph_utils::validate::Connection;
use super::document::{DocumentId, FlowDocument};

/// Persists a document. Implementations may write RON files, hit a backend,
/// or record calls in tests.
pub trait SaveFlow {
    fn save_flow(&mut self, doc: &FlowDocument) -> anyhow::Result<()>;
}

/// Receives a dropped file. Any resulting graph change is the uploader's
/// business and is observed later as an ordinary store mutation.
pub trait UploadFlow {
    fn upload_flow(&mut self, file: &Path) -> anyhow::Result<()>;
}

/// Serialized palette payload: `{ "type": ..., "node": { "template": ... } }`.
#[derive(Debug, Clone, Deserialize)]
struct RawComponentDrop {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    node: Option<RawComponentNode>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawComponentNode {
    #[serde(default)]
    template: NodeTemplate,
}

/// A drop payload the canvas hands to the factory. Anything that is neither
/// a component descriptor nor a file list is a silent no-op upstream.
#[derive(Debug, Clone)]
pub enum DropPayload {
    Component(String),
    Files(Vec<std::path::PathBuf>),
}

/// Parsed component descriptor, ready to become a node.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub kind: String,
    pub template: NodeTemplate,
}

impl ComponentDescriptor {
    /// Parse a serialized palette payload. Returns None on malformed data;
    /// the drop then never becomes a gesture (no snapshot, no mutation).
    pub fn parse(payload: &str) -> Option<Self> {
        let raw: RawComponentDrop = serde_json::from_str(payload).ok()?;
        Some(Self {
            kind: raw.kind,
            template: raw.node.unwrap_or_default().template,
        })
    }
}

/// Session-wide bookkeeping shared by every open document: node id
/// generation, the cross-document clipboard, and the per-document pending
/// (unsaved) markers. Owned and injected rather than ambient so tests can
/// construct isolated instances.
#[derive(Default)]
pub struct DocumentRegistry {
    id_counters: HashMap<String, u64>,
    last_copied: Option<Selection>,
    pending: HashMap<DocumentId, bool>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh unique node id: "<kind>-<n>" from a per-kind monotonic counter.
    pub fn get_node_id(&mut self, kind: &str) -> NodeId {
        let counter = self.id_counters.entry(kind.to_string()).or_insert(0);
        *counter += 1;
        format!("{kind}-{counter}")
    }

    /// Raise the id counters above every id already present in `graph`, so
    /// ids generated later cannot collide with a loaded document's.
    pub fn observe_graph(&mut self, graph: &FlowGraph) {
        for node in &graph.nodes {
            let Some((kind, suffix)) = node.id.rsplit_once('-') else {
                continue;
            };
            let Ok(n) = suffix.parse::<u64>() else { continue };
            let counter = self.id_counters.entry(kind.to_string()).or_insert(0);
            *counter = (*counter).max(n);
        }
    }

    pub fn set_document_pending(&mut self, id: DocumentId, pending: bool) {
        self.pending.insert(id, pending);
    }

    pub fn is_document_pending(&self, id: DocumentId) -> bool {
        self.pending.get(&id).copied().unwrap_or(false)
    }

    /// Overwrite the clipboard with a deep copy of `selection`. Empty
    /// selections are ignored, so a stray copy chord cannot clear it.
    pub fn set_last_copied_selection(&mut self, selection: Selection) {
        if selection.is_empty() {
            return;
        }
        self.last_copied = Some(selection);
    }

    pub fn last_copied_selection(&self) -> Option<&Selection> {
        self.last_copied.as_ref()
    }

    /// Build a node from a parsed component drop. The runtime value is reset;
    /// a dropped template never carries one into the graph.
    pub fn build_node(&mut self, desc: &ComponentDescriptor, at: Position) -> Node {
        let id = self.get_node_id(&desc.kind);
        Node {
            id,
            node_type: "genericNode".to_string(),
            position: at,
            data: NodeData {
                kind: desc.kind.clone(),
                template: desc.template.clone(),
                value: None,
            },
        }
    }

    /// Reconstitute the clipboard into `doc` so the subgraph's top-left
    /// corner lands at `at`. Node ids are always regenerated (the clipboard
    /// may have been filled from a different document), edges are remapped
    /// onto the new ids, and only edges internal to the copied selection are
    /// carried. Returns the new node ids; empty clipboard is a no-op.
    pub fn paste_into(&mut self, doc: &mut FlowDocument, at: Position) -> Vec<NodeId> {
        let Some(selection) = self.last_copied.clone() else {
            return Vec::new();
        };
        if selection.nodes.is_empty() {
            return Vec::new();
        }
        let min_x = selection
            .nodes
            .iter()
            .map(|n| n.position.x)
            .fold(f32::INFINITY, f32::min);
        let min_y = selection
            .nodes
            .iter()
            .map(|n| n.position.y)
            .fold(f32::INFINITY, f32::min);

        let mut id_map: HashMap<NodeId, NodeId> = HashMap::new();
        let mut new_ids: Vec<NodeId> = Vec::new();
        for node in &selection.nodes {
            let new_id = self.get_node_id(&node.data.kind);
            let mut pasted = node.clone();
            pasted.id = new_id.clone();
            pasted.position = Position::new(
                node.position.x - min_x + at.x,
                node.position.y - min_y + at.y,
            );
            if doc.graph.add_node(pasted) {
                id_map.insert(node.id.clone(), new_id.clone());
                new_ids.push(new_id);
            }
        }
        for edge in &selection.edges {
            let (Some(source), Some(target)) =
                (id_map.get(&edge.source), id_map.get(&edge.target))
            else {
                continue;
            };
            let candidate = Connection::new(
                source.clone(),
                edge.source_handle.clone(),
                target.clone(),
                edge.target_handle.clone(),
            );
            if let Err(err) = doc.graph.connect(candidate) {
                // Edges valid at copy time stay valid after an id rewrite;
                // anything else is dropped, not surfaced.
                log::debug!("skipping pasted edge: {err}");
            }
        }
        if !new_ids.is_empty() {
            self.set_document_pending(doc.id, true);
        }
        new_ids
    }
}
