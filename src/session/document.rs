use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph_utils::graph::{FlowGraph, Viewport};
use super::undo::Snapshot;

pub type DocumentId = Uuid;

/// One open flow. The live graph is the mutable projection of the document's
/// persisted data; `saved` is the snapshot it was last persisted as, and the
/// dirty flag is nothing more than structural inequality between the two.
#[derive(Debug, Clone)]
pub struct FlowDocument {
    pub id: DocumentId,
    pub name: String,
    pub graph: FlowGraph,
    pub viewport: Viewport,
    saved: Snapshot,
}

impl FlowDocument {
    pub fn new(name: impl Into<String>) -> Self {
        let graph = FlowGraph::new();
        let saved = Snapshot::capture(&graph);
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            graph,
            viewport: Viewport::default(),
            saved,
        }
    }

    /// Rebuild a document from persisted parts. The loaded graph is by
    /// definition the saved state, so the document starts clean.
    pub fn from_parts(
        id: DocumentId,
        name: impl Into<String>,
        graph: FlowGraph,
        viewport: Viewport,
    ) -> Self {
        let saved = Snapshot::capture(&graph);
        Self { id, name: name.into(), graph, viewport, saved }
    }

    /// True whenever the live `(nodes, edges)` differ from the last-saved
    /// snapshot. Viewport moves alone never dirty a document.
    pub fn is_dirty(&self) -> bool {
        !self.saved.matches(&self.graph)
    }

    /// Record the current graph as persisted.
    pub fn mark_saved(&mut self) {
        self.saved = Snapshot::capture(&self.graph);
    }

    pub fn saved_snapshot(&self) -> &Snapshot {
        &self.saved
    }

    pub fn to_persisted(&self) -> PersistedFlow {
        PersistedFlow {
            id: self.id,
            name: self.name.clone(),
            nodes: self.graph.nodes.clone(),
            edges: self.graph.edges.clone(),
            viewport: self.viewport,
        }
    }
}

/// The externally visible document shape: ids, handles, positions and the
/// viewport must survive a serialize/reload round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFlow {
    pub id: DocumentId,
    pub name: String,
    pub nodes: Vec<crate::graph_utils::graph::Node>,
    pub edges: Vec<crate::graph_utils::graph::Edge>,
    pub viewport: Viewport,
}

impl PersistedFlow {
    pub fn into_document(self) -> FlowDocument {
        let graph = FlowGraph { nodes: self.nodes, edges: self.edges };
        FlowDocument::from_parts(self.id, self.name, graph, self.viewport)
    }
}
