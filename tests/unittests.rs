use flow_canvas::graph_utils::graph::{
    FlowGraph, Node, NodeChange, NodeData, NodeTemplate, PortDef, Position, Viewport,
    FILE_INPUT_KIND, NO_VALID_SUFFIX,
};
use flow_canvas::graph_utils::validate::{
    self, Connection, ConnectionError,
};
use flow_canvas::gui::frontend::{delete_items, resolve_reconnect};
use flow_canvas::persistence::persist::{self, AppStateFile};
use flow_canvas::persistence::settings::AppSettings;
use flow_canvas::session::document::FlowDocument;
use flow_canvas::session::guard::{LeaveChoice, LeaveOutcome, LeaveRequest, NavigationGuard};
use flow_canvas::session::registry::{ComponentDescriptor, DocumentRegistry, SaveFlow};
use flow_canvas::session::undo::{Snapshot, UndoRedoStack};

fn node(id: &str, kind: &str, ports: Vec<PortDef>, file_types: Vec<&str>) -> Node {
    Node {
        id: id.to_string(),
        node_type: "genericNode".to_string(),
        position: Position::new(0.0, 0.0),
        data: NodeData {
            kind: kind.to_string(),
            template: NodeTemplate {
                ports,
                file_types: file_types.iter().map(|s| s.to_string()).collect(),
                suffixes: file_types.iter().map(|s| format!(".{s}")).collect(),
            },
            value: None,
        },
    }
}

fn file_input(id: &str) -> Node {
    node(id, FILE_INPUT_KIND, vec![PortDef::output("Document|file")], vec![])
}

fn loader(id: &str, kind: &str, file_types: Vec<&str>) -> Node {
    node(
        id,
        kind,
        vec![PortDef::input("Document|file"), PortDef::output("Text|text")],
        file_types,
    )
}

fn connect(graph: &mut FlowGraph, source: &str, target: &str) -> String {
    graph
        .connect(Connection::new(source, "Document|file", target, "Document|file"))
        .expect("connection should be accepted")
}

#[test]
fn removing_nodes_cascades_to_incident_edges() {
    let mut graph = FlowGraph::new();
    assert!(graph.add_node(file_input("InputFileNode-1")));
    assert!(graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"])));
    assert!(graph.add_node(loader("TextLoader-2", "TextLoader", vec!["txt"])));
    connect(&mut graph, "InputFileNode-1", "TextLoader-1");
    connect(&mut graph, "InputFileNode-1", "TextLoader-2");
    assert_eq!(graph.edge_count(), 2);

    assert!(graph.remove_nodes(&["TextLoader-1".to_string()]));
    assert!(graph
        .edges
        .iter()
        .all(|e| e.source != "TextLoader-1" && e.target != "TextLoader-1"));
    assert_eq!(graph.edge_count(), 1);

    assert!(graph.remove_nodes(&["InputFileNode-1".to_string()]));
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn duplicate_node_ids_are_refused() {
    let mut graph = FlowGraph::new();
    assert!(graph.add_node(file_input("InputFileNode-1")));
    assert!(!graph.add_node(file_input("InputFileNode-1")));
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn incompatible_port_types_are_rejected_without_mutation() {
    let mut graph = FlowGraph::new();
    graph.add_node(node("A-1", "A", vec![PortDef::output("Text|out")], vec![]));
    graph.add_node(node("B-1", "B", vec![PortDef::input("Document|in")], vec![]));
    let before = graph.clone();

    let candidate = Connection::new("A-1", "Text|out", "B-1", "Document|in");
    assert!(!validate::is_valid_connection(&candidate, &graph));
    assert!(matches!(
        graph.connect(candidate),
        Err(ConnectionError::IncompatibleTypes { .. })
    ));
    assert_eq!(graph, before);
}

#[test]
fn wildcard_tag_connects_to_anything() {
    let mut graph = FlowGraph::new();
    graph.add_node(node("A-1", "A", vec![PortDef::output("Text|out")], vec![]));
    graph.add_node(node("B-1", "B", vec![PortDef::input("any|in")], vec![]));
    assert!(graph
        .connect(Connection::new("A-1", "Text|out", "B-1", "any|in"))
        .is_ok());
}

#[test]
fn self_loops_and_duplicates_are_rejected() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));

    let self_loop = Connection::new(
        "InputFileNode-1",
        "Document|file",
        "InputFileNode-1",
        "Document|file",
    );
    assert_eq!(graph.connect(self_loop), Err(ConnectionError::SelfLoop));

    let candidate = Connection::new(
        "InputFileNode-1",
        "Document|file",
        "TextLoader-1",
        "Document|file",
    );
    assert!(graph.connect(candidate.clone()).is_ok());
    assert_eq!(graph.connect(candidate), Err(ConnectionError::DuplicateEdge));
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn connection_to_missing_node_is_rejected() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    let candidate = Connection::new(
        "InputFileNode-1",
        "Document|file",
        "TextLoader-9",
        "Document|file",
    );
    assert_eq!(
        graph.connect(candidate),
        Err(ConnectionError::UnknownEndpoint("TextLoader-9".to_string()))
    );
}

#[test]
fn file_input_types_follow_downstream_intersection() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("ImageLoader-1", "ImageLoader", vec!["png", "jpg"]));
    graph.add_node(loader("ImageLoader-2", "ImageLoader", vec!["jpg", "gif"]));

    let e1 = connect(&mut graph, "InputFileNode-1", "ImageLoader-1");
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec!["png", "jpg"]);
    assert_eq!(input.data.template.suffixes, vec![".png", ".jpg"]);

    let e2 = connect(&mut graph, "InputFileNode-1", "ImageLoader-2");
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec!["jpg"]);

    // Losing a neighbor widens the intersection again
    assert!(graph.remove_edges(&[e2]));
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec!["png", "jpg"]);

    // No downstream neighbors: sentinel, never stale data
    assert!(graph.remove_edges(&[e1]));
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec![NO_VALID_SUFFIX]);
}

#[test]
fn empty_intersection_yields_sentinel() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("ImageLoader-1", "ImageLoader", vec!["png"]));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    connect(&mut graph, "InputFileNode-1", "ImageLoader-1");
    connect(&mut graph, "InputFileNode-1", "TextLoader-1");
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec![NO_VALID_SUFFIX]);
    assert_eq!(input.data.template.suffixes, vec![format!(".{NO_VALID_SUFFIX}")]);
}

#[test]
fn file_input_recompute_cascades_on_node_removal() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("ImageLoader-1", "ImageLoader", vec!["png", "jpg"]));
    graph.add_node(loader("ImageLoader-2", "ImageLoader", vec!["jpg", "gif"]));
    connect(&mut graph, "InputFileNode-1", "ImageLoader-1");
    connect(&mut graph, "InputFileNode-1", "ImageLoader-2");

    assert!(graph.remove_nodes(&["ImageLoader-2".to_string()]));
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec!["png", "jpg"]);
}

#[test]
fn node_changes_move_nodes_and_drop_dangling_reports() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    let moved = graph.apply_node_changes(&[
        NodeChange::Moved {
            id: "InputFileNode-1".to_string(),
            position: Position::new(40.0, 25.0),
        },
        // Late report about a node that no longer exists; must be ignored
        NodeChange::Moved {
            id: "TextLoader-9".to_string(),
            position: Position::new(1.0, 1.0),
        },
    ]);
    assert!(moved);
    let n = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!((n.position.x, n.position.y), (40.0, 25.0));
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn reconnect_moves_an_edge_and_recomputes_file_types() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    graph.add_node(loader("ImageLoader-1", "ImageLoader", vec!["png"]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");

    let moved = graph
        .reconnect(
            &edge,
            Connection::new("InputFileNode-1", "Document|file", "ImageLoader-1", "Document|file"),
        )
        .expect("reconnect should be accepted");
    assert_eq!(graph.edge_count(), 1);
    let e = graph.get_edge(&moved).unwrap();
    assert_eq!(e.target, "ImageLoader-1");
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec!["png"]);
}

#[test]
fn reconnect_back_onto_the_same_port_is_not_a_duplicate() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");

    let candidate =
        Connection::new("InputFileNode-1", "Document|file", "TextLoader-1", "Document|file");
    assert!(graph.reconnect(&edge, candidate).is_ok());
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn rejected_reconnect_keeps_the_edge_in_place() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    graph.add_node(node("B-1", "B", vec![PortDef::input("Text|in")], vec![]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");
    let before = graph.clone();

    let result = graph.reconnect(
        &edge,
        Connection::new("InputFileNode-1", "Document|file", "B-1", "Text|in"),
    );
    assert!(matches!(result, Err(ConnectionError::IncompatibleTypes { .. })));
    assert_eq!(graph, before);

    assert_eq!(
        graph.reconnect(
            "bogus",
            Connection::new("InputFileNode-1", "Document|file", "TextLoader-1", "Document|file"),
        ),
        Err(ConnectionError::UnknownEdge("bogus".to_string()))
    );
}

#[test]
fn reconnect_released_off_any_port_deletes_the_edge() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");

    assert!(resolve_reconnect(&mut graph, &edge, None));
    assert_eq!(graph.edge_count(), 0);
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec![NO_VALID_SUFFIX]);
}

#[test]
fn reconnect_dropped_on_an_incompatible_port_deletes_the_edge() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    graph.add_node(node("B-1", "B", vec![PortDef::input("Text|in")], vec![]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");

    let candidate = Connection::new("InputFileNode-1", "Document|file", "B-1", "Text|in");
    assert!(resolve_reconnect(&mut graph, &edge, Some(candidate)));
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn deleting_only_stale_ids_leaves_no_undo_entry() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");
    let mut stack = UndoRedoStack::default();

    // Selection that survived past the nodes it referenced
    assert!(!delete_items(
        &mut graph,
        &mut stack,
        &["gone-edge".to_string()],
        &["GoneNode-9".to_string()],
    ));
    assert_eq!(stack.undo_depth(), 0);
    assert_eq!(graph.node_count(), 2);

    // Mixed stale and live ids still delete the live ones, with one entry
    assert!(delete_items(
        &mut graph,
        &mut stack,
        &[edge],
        &["GoneNode-9".to_string(), "TextLoader-1".to_string()],
    ));
    assert_eq!(stack.undo_depth(), 1);
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
    assert!(stack.undo(&mut graph));
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn edge_changes_remove_edges_and_ignore_stale_ids() {
    use flow_canvas::graph_utils::graph::EdgeChange;
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    let edge = connect(&mut graph, "InputFileNode-1", "TextLoader-1");

    assert!(!graph.apply_edge_changes(&[EdgeChange::Removed { id: "bogus".to_string() }]));
    assert_eq!(graph.edge_count(), 1);

    assert!(graph.apply_edge_changes(&[EdgeChange::Removed { id: edge }]));
    assert_eq!(graph.edge_count(), 0);
    let input = graph.get_node("InputFileNode-1").unwrap();
    assert_eq!(input.data.template.file_types, vec![NO_VALID_SUFFIX]);
}

#[test]
fn snapshot_restores_pre_mutation_state() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt"]));
    connect(&mut graph, "InputFileNode-1", "TextLoader-1");

    let mut stack = UndoRedoStack::default();
    let before = graph.clone();
    stack.take_snapshot(&graph);
    graph.remove_nodes(&["TextLoader-1".to_string()]);
    assert_ne!(graph, before);

    assert!(stack.undo(&mut graph));
    assert_eq!(graph, before);

    // The restored graph owns its data, so redo still reproduces the
    // post-mutation state exactly.
    assert!(stack.redo(&mut graph));
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn new_snapshot_clears_redo_branch() {
    let mut graph = FlowGraph::new();
    let mut stack = UndoRedoStack::default();
    stack.take_snapshot(&graph);
    graph.add_node(file_input("InputFileNode-1"));
    assert!(stack.undo(&mut graph));
    assert_eq!(stack.redo_depth(), 1);

    stack.take_snapshot(&graph);
    assert_eq!(stack.redo_depth(), 0);
    assert!(!stack.redo(&mut graph));
}

#[test]
fn snapshot_capture_is_deep() {
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-1"));
    let snapshot = Snapshot::capture(&graph);
    graph.remove_nodes(&["InputFileNode-1".to_string()]);
    assert!(!snapshot.matches(&graph));
    snapshot.restore_into(&mut graph);
    assert!(snapshot.matches(&graph));
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn copy_paste_reproduces_an_isomorphic_subgraph_with_fresh_ids() {
    let mut registry = DocumentRegistry::new();
    let mut doc = FlowDocument::new("flow a");
    let mut a = file_input(&registry.get_node_id(FILE_INPUT_KIND));
    a.position = Position::new(10.0, 20.0);
    let mut b = loader(&registry.get_node_id("TextLoader"), "TextLoader", vec!["txt"]);
    b.position = Position::new(210.0, 80.0);
    let (a_id, b_id) = (a.id.clone(), b.id.clone());
    doc.graph.add_node(a);
    doc.graph.add_node(b);
    connect(&mut doc.graph, &a_id, &b_id);

    let selection = doc.graph.selection_of(&[a_id.clone(), b_id.clone()]);
    assert_eq!(selection.nodes.len(), 2);
    assert_eq!(selection.edges.len(), 1);
    registry.set_last_copied_selection(selection);

    let pasted = registry.paste_into(&mut doc, Position::new(10.0, 20.0));
    assert_eq!(pasted.len(), 2);
    assert_eq!(doc.graph.node_count(), 4);
    assert_eq!(doc.graph.edge_count(), 2);

    // Strictly new ids
    for id in &pasted {
        assert_ne!(*id, a_id);
        assert_ne!(*id, b_id);
    }
    // Relative geometry preserved: paste target equals the original
    // top-left, so positions line up exactly
    let originals: Vec<Position> = [&a_id, &b_id]
        .iter()
        .map(|id| doc.graph.get_node(id).unwrap().position)
        .collect();
    let copies: Vec<Position> = pasted
        .iter()
        .map(|id| doc.graph.get_node(id).unwrap().position)
        .collect();
    assert_eq!(originals, copies);
    // Internal connectivity preserved between the new ids
    let new_edge = doc
        .graph
        .edges
        .iter()
        .find(|e| pasted.contains(&e.source))
        .expect("pasted edge should exist");
    assert!(pasted.contains(&new_edge.target));
}

#[test]
fn paste_works_across_documents() {
    let mut registry = DocumentRegistry::new();
    let mut source_doc = FlowDocument::new("flow a");
    let n = file_input(&registry.get_node_id(FILE_INPUT_KIND));
    let n_id = n.id.clone();
    source_doc.graph.add_node(n);
    registry.set_last_copied_selection(source_doc.graph.selection_of(&[n_id.clone()]));

    // The target document already contains the same id; regeneration must
    // avoid the collision.
    let mut target_doc = FlowDocument::new("flow b");
    target_doc.graph.add_node(file_input(&n_id));
    registry.observe_graph(&target_doc.graph);

    let pasted = registry.paste_into(&mut target_doc, Position::new(0.0, 0.0));
    assert_eq!(pasted.len(), 1);
    assert_ne!(pasted[0], n_id);
    assert_eq!(target_doc.graph.node_count(), 2);
    assert!(registry.is_document_pending(target_doc.id));
}

#[test]
fn empty_clipboard_paste_is_a_noop() {
    let mut registry = DocumentRegistry::new();
    let mut doc = FlowDocument::new("flow");
    assert!(registry.paste_into(&mut doc, Position::new(0.0, 0.0)).is_empty());
    assert!(!doc.is_dirty());
}

#[test]
fn empty_selection_never_overwrites_clipboard() {
    let mut registry = DocumentRegistry::new();
    let doc = {
        let mut d = FlowDocument::new("flow");
        d.graph.add_node(file_input("InputFileNode-1"));
        d
    };
    registry.set_last_copied_selection(doc.graph.selection_of(&["InputFileNode-1".to_string()]));
    assert!(registry.last_copied_selection().is_some());
    registry.set_last_copied_selection(doc.graph.selection_of(&[]));
    assert!(registry.last_copied_selection().is_some());
}

#[test]
fn component_drop_builds_a_fresh_valueless_node() {
    let mut registry = DocumentRegistry::new();
    let payload = r#"{
        "type": "TextLoader",
        "node": { "template": {
            "ports": [ { "handle": "Document|file", "direction": "Input" } ],
            "file_types": ["txt"], "suffixes": [".txt"]
        } }
    }"#;
    let desc = ComponentDescriptor::parse(payload).expect("payload should parse");
    let node = registry.build_node(&desc, Position::new(7.0, 9.0));
    assert!(node.id.starts_with("TextLoader-"));
    assert_eq!(node.node_type, "genericNode");
    assert_eq!((node.position.x, node.position.y), (7.0, 9.0));
    assert!(node.data.value.is_none());
    assert_eq!(node.data.template.file_types, vec!["txt"]);

    let again = registry.build_node(&desc, Position::new(0.0, 0.0));
    assert_ne!(node.id, again.id);
}

#[test]
fn unrecognized_drop_payload_parses_to_none() {
    assert!(ComponentDescriptor::parse("not json at all").is_none());
}

#[test]
fn observed_graph_raises_id_counters() {
    let mut registry = DocumentRegistry::new();
    let mut graph = FlowGraph::new();
    graph.add_node(file_input("InputFileNode-7"));
    registry.observe_graph(&graph);
    assert_eq!(registry.get_node_id(FILE_INPUT_KIND), "InputFileNode-8");
}

struct RecordingSaver {
    calls: usize,
    fail: bool,
}

impl SaveFlow for RecordingSaver {
    fn save_flow(&mut self, _doc: &FlowDocument) -> anyhow::Result<()> {
        self.calls += 1;
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        Ok(())
    }
}

#[test]
fn clean_document_leaves_without_blocking() {
    let mut guard = NavigationGuard::new();
    let doc = FlowDocument::new("flow");
    assert_eq!(guard.request_leave(&doc), LeaveRequest::Proceed);
    assert!(!guard.is_blocked());
}

#[test]
fn dirty_document_blocks_with_three_outcomes() {
    let mut registry = DocumentRegistry::new();
    let mut saver = RecordingSaver { calls: 0, fail: false };
    let mut guard = NavigationGuard::new();
    let mut doc = FlowDocument::new("flow");
    doc.graph.add_node(file_input("InputFileNode-1"));
    assert!(doc.is_dirty());

    assert_eq!(guard.request_leave(&doc), LeaveRequest::Blocked);
    assert!(guard.is_blocked());

    // Cancel: stay, still dirty
    let outcome = guard.resolve(LeaveChoice::Cancel, &mut doc, &mut registry, &mut saver);
    assert_eq!(outcome, LeaveOutcome::Stayed);
    assert!(doc.is_dirty());
    assert!(!guard.is_blocked());

    // Discard: leave, persisted data untouched, no save call
    assert_eq!(guard.request_leave(&doc), LeaveRequest::Blocked);
    let outcome = guard.resolve(LeaveChoice::Discard, &mut doc, &mut registry, &mut saver);
    assert_eq!(outcome, LeaveOutcome::Left);
    assert_eq!(saver.calls, 0);

    // Save and leave: save resolves, dirty clears, navigation proceeds once
    assert_eq!(guard.request_leave(&doc), LeaveRequest::Blocked);
    let outcome = guard.resolve(LeaveChoice::SaveAndLeave, &mut doc, &mut registry, &mut saver);
    assert_eq!(outcome, LeaveOutcome::Left);
    assert_eq!(saver.calls, 1);
    assert!(!doc.is_dirty());
    assert!(!registry.is_document_pending(doc.id));
    assert_eq!(guard.request_leave(&doc), LeaveRequest::Proceed);
}

#[test]
fn failed_save_keeps_the_guard_blocked_and_the_flag_dirty() {
    let mut registry = DocumentRegistry::new();
    let mut saver = RecordingSaver { calls: 0, fail: true };
    let mut guard = NavigationGuard::new();
    let mut doc = FlowDocument::new("flow");
    doc.graph.add_node(file_input("InputFileNode-1"));

    assert_eq!(guard.request_leave(&doc), LeaveRequest::Blocked);
    let outcome = guard.resolve(LeaveChoice::SaveAndLeave, &mut doc, &mut registry, &mut saver);
    assert_eq!(outcome, LeaveOutcome::Stayed);
    assert_eq!(saver.calls, 1);
    assert!(doc.is_dirty());
    assert!(guard.is_blocked());
}

#[test]
fn viewport_moves_alone_do_not_dirty_a_document() {
    let mut doc = FlowDocument::new("flow");
    doc.viewport = Viewport { x: 300.0, y: -40.0, zoom: 2.0 };
    assert!(!doc.is_dirty());
    doc.graph.add_node(file_input("InputFileNode-1"));
    assert!(doc.is_dirty());
    doc.mark_saved();
    assert!(!doc.is_dirty());
}

#[test]
fn state_file_round_trips_the_document() {
    let mut doc = FlowDocument::new("round trip");
    let mut input = file_input("InputFileNode-1");
    input.position = Position::new(12.5, -3.0);
    doc.graph.add_node(input);
    doc.graph.add_node(loader("TextLoader-1", "TextLoader", vec!["txt", "md"]));
    connect(&mut doc.graph, "InputFileNode-1", "TextLoader-1");
    doc.viewport = Viewport { x: 5.0, y: 6.0, zoom: 1.25 };

    let state = AppStateFile::from_document(&doc);
    let text = ron::ser::to_string(&state).expect("serialize");
    let reloaded: AppStateFile = ron::from_str(&text).expect("deserialize");
    let restored = reloaded.into_document();

    assert_eq!(restored.id, doc.id);
    assert_eq!(restored.name, doc.name);
    assert_eq!(restored.graph, doc.graph);
    assert_eq!(restored.viewport, doc.viewport);
    // A freshly loaded document is clean by definition
    assert!(!restored.is_dirty());
}

// Sole test touching the process-wide autosave-dir override; keeping it to
// one test avoids racing other threads for the OnceLock.
#[test]
fn state_files_save_load_and_list_on_disk() {
    let dir = std::env::temp_dir().join(format!("flow-canvas-test-{}", std::process::id()));
    let settings = AppSettings { autosave_override: Some(dir.clone()), ..Default::default() };
    persist::set_settings_override(settings);

    let mut doc = FlowDocument::new("on disk");
    doc.graph.add_node(file_input("InputFileNode-1"));
    let state = AppStateFile::from_document(&doc);

    let active = persist::save_active(&state).expect("active save");
    assert_eq!(active, persist::active_state_path());
    let versioned = persist::save_versioned(&state).expect("versioned save");
    assert_ne!(active, versioned);

    let reloaded = persist::load_active().expect("load").expect("state present");
    assert_eq!(reloaded.into_document().graph, doc.graph);

    let versions = persist::list_versions().expect("list");
    assert!(versions.contains(&versioned));
    // Versions never include the active file itself
    assert!(!versions.contains(&active));

    let _ = std::fs::remove_dir_all(dir);
}
