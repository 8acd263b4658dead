#![allow(clippy::collapsible_if)]
#![allow(clippy::needless_return)]
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use eframe::egui::{self, Color32, Pos2, Rect, Sense, Stroke, Vec2};

use crate::graph_utils::graph::{
    EdgeId, FlowGraph, Node, NodeChange, NodeId, PortDef, PortDirection, Position, Viewport,
};
use crate::graph_utils::validate::{self, Connection, ConnectionError};
use crate::persistence::persist::{self, AppStateFile};
use crate::persistence::settings::AppSettings;
use crate::session::document::FlowDocument;
use crate::session::guard::{LeaveChoice, LeaveOutcome, LeaveRequest, NavigationGuard};
use crate::session::registry::{
    ComponentDescriptor, DocumentRegistry, DropPayload, SaveFlow, UploadFlow,
};
use crate::session::undo::UndoRedoStack;

// Style for toast notifications
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NoticeStyle {
    Subtle,
    Prominent,
}

const NODE_SIZE: Vec2 = Vec2::new(150.0, 54.0);
const PORT_RADIUS: f32 = 5.0;
const EDGE_HIT_DISTANCE: f32 = 6.0;

// Saves the active document to the autosave state file. The default save
// collaborator wired into the navigation guard.
pub struct RonSaver;

impl SaveFlow for RonSaver {
    fn save_flow(&mut self, doc: &FlowDocument) -> anyhow::Result<()> {
        let state = AppStateFile::from_document(doc);
        persist::save_active(&state)?;
        Ok(())
    }
}

// Default upload collaborator: acknowledges the file hand-off. A real
// deployment substitutes a backend client here; any graph change it causes
// arrives later as an ordinary store mutation.
struct LoggingUploader {
    last_file: Option<PathBuf>,
}

impl UploadFlow for LoggingUploader {
    fn upload_flow(&mut self, file: &std::path::Path) -> anyhow::Result<()> {
        log::info!("forwarding dropped file {} to upload", file.display());
        self.last_file = Some(file.to_path_buf());
        Ok(())
    }
}

struct PaletteEntry {
    label: String,
    payload: String,
}

#[derive(Clone, Debug)]
struct PendingConnection {
    source: NodeId,
    source_handle: String,
}

// An existing edge whose target end has been grabbed; the source end stays
// anchored while the loose end follows the pointer.
#[derive(Clone, Debug)]
struct ReconnectDrag {
    edge_id: EdgeId,
    source: NodeId,
    source_handle: String,
}

pub struct CanvasApp {
    document: FlowDocument,
    registry: DocumentRegistry,
    undo_stack: UndoRedoStack,
    guard: NavigationGuard,
    saver: RonSaver,
    uploader: LoggingUploader,
    palette: Vec<PaletteEntry>,
    // canvas state
    pan: Vec2,
    zoom: f32,
    dragging: Option<NodeId>,
    pending_connection: Option<PendingConnection>,
    reconnecting: Option<ReconnectDrag>,
    selected_nodes: HashSet<NodeId>,
    selected_edges: HashSet<String>,
    // Rectangle (rubber-band) selection while Shift is held
    rect_select_start: Option<Pos2>,
    rect_select_current: Option<Pos2>,
    // Latest pointer position in screen space; keyboard paste carries no
    // coordinate of its own, so we keep tracking it on every movement.
    pointer_pos: Pos2,
    last_canvas_rect: Option<Rect>,
    // Palette item currently being dragged onto the canvas
    palette_drag: Option<String>,
    // persistence
    last_change: Instant,
    last_save: Instant,
    save_error: Option<String>,
    last_save_info: Option<String>,
    last_info_time: Option<Instant>,
    last_info_style: NoticeStyle,
    // Close interception: the confirm prompt always fires on a close
    // request, whatever the dirty state; the three-way unsaved-changes
    // choice appears inside it only when the guard blocks.
    close_confirm_open: bool,
    allow_close: bool,
    app_settings: AppSettings,
    sidebar_open: bool,
}

impl CanvasApp {
    pub fn new(document: FlowDocument) -> Self {
        let settings = AppSettings::load().unwrap_or_default();
        let mut registry = DocumentRegistry::new();
        registry.observe_graph(&document.graph);
        let viewport = document.viewport;
        Self {
            document,
            registry,
            undo_stack: UndoRedoStack::default(),
            guard: NavigationGuard::new(),
            saver: RonSaver,
            uploader: LoggingUploader { last_file: None },
            palette: default_palette(),
            pan: Vec2::new(viewport.x, viewport.y),
            zoom: viewport.zoom.clamp(0.01, 8.0),
            dragging: None,
            pending_connection: None,
            reconnecting: None,
            selected_nodes: HashSet::new(),
            selected_edges: HashSet::new(),
            rect_select_start: None,
            rect_select_current: None,
            pointer_pos: Pos2::ZERO,
            last_canvas_rect: None,
            palette_drag: None,
            last_change: Instant::now(),
            last_save: Instant::now(),
            save_error: None,
            last_save_info: None,
            last_info_time: None,
            last_info_style: NoticeStyle::Prominent,
            close_confirm_open: false,
            allow_close: false,
            app_settings: settings,
            sidebar_open: true,
        }
    }

    pub fn from_state(state: AppStateFile) -> Self {
        Self::new(state.into_document())
    }

    // Runs after every store mutation so the pending marker and the autosave
    // clock stay in step with the dirty flag.
    fn after_mutation(&mut self) {
        self.registry
            .set_document_pending(self.document.id, self.document.is_dirty());
        self.last_change = Instant::now();
    }

    fn save_now_with(&mut self, style: NoticeStyle) {
        let state = AppStateFile::from_document(&self.document);
        match persist::save_active(&state) {
            Ok(path) => {
                // Explicit saves also leave a timestamped version behind
                if let Err(e) = persist::save_versioned(&state) {
                    log::warn!("versioned save failed: {e:#}");
                }
                self.document.mark_saved();
                self.registry.set_document_pending(self.document.id, false);
                self.last_save = Instant::now();
                self.save_error = None;
                self.last_save_info = Some(format!("Saved to {}", path.display()));
                self.last_info_time = Some(Instant::now());
                self.last_info_style = style;
            }
            Err(e) => {
                self.save_error = Some(format!("Save failed: {}", e));
            }
        }
    }

    fn save_now(&mut self) {
        self.save_now_with(NoticeStyle::Prominent);
    }

    // Crash-recovery write of the live state. Deliberately does not mark the
    // document saved: the dirty flag tracks the user's explicit saves, and
    // the navigation guard must still fire after an autosave.
    fn autosave_tick(&mut self) {
        let quiet = Duration::from_secs(self.app_settings.autosave_secs.max(1));
        if self.document.is_dirty()
            && self.last_change.elapsed() >= quiet
            && self.last_save.elapsed() >= quiet
        {
            let state = AppStateFile::from_document(&self.document);
            match persist::save_active(&state) {
                Ok(_) => {
                    self.last_save = Instant::now();
                }
                Err(e) => {
                    self.save_error = Some(format!("Autosave failed: {}", e));
                }
            }
        }
    }

    /// Route a drop through the node factory. Component payloads become new
    /// nodes; file payloads are snapshotted and forwarded to the upload
    /// collaborator. A payload matching neither kind changes nothing and
    /// takes no snapshot.
    fn handle_drop(&mut self, payload: DropPayload, at: Position) {
        match payload {
            DropPayload::Component(serialized) => {
                let Some(desc) = ComponentDescriptor::parse(&serialized) else {
                    log::debug!("ignoring drop with unrecognized payload");
                    return;
                };
                self.undo_stack.take_snapshot(&self.document.graph);
                let node = self.registry.build_node(&desc, at);
                let id = node.id.clone();
                if self.document.graph.add_node(node) {
                    self.selected_nodes.clear();
                    self.selected_nodes.insert(id);
                    self.after_mutation();
                }
            }
            DropPayload::Files(files) => {
                let Some(first) = files.first() else { return };
                self.undo_stack.take_snapshot(&self.document.graph);
                if let Err(e) = self.uploader.upload_flow(first) {
                    self.save_error = Some(format!("Upload failed: {}", e));
                    log::warn!("upload of {} failed: {e:#}", first.display());
                }
            }
        }
    }

    fn copy_selection(&mut self) {
        let ids: Vec<NodeId> = self.selected_nodes.iter().cloned().collect();
        if ids.is_empty() {
            return;
        }
        let selection = self.document.graph.selection_of(&ids);
        self.registry.set_last_copied_selection(selection);
    }

    fn paste_at(&mut self, world: Position) {
        if self.registry.last_copied_selection().is_none() {
            return;
        }
        self.undo_stack.take_snapshot(&self.document.graph);
        let new_ids = self.registry.paste_into(&mut self.document, world);
        if !new_ids.is_empty() {
            self.selected_nodes = new_ids.into_iter().collect();
            self.selected_edges.clear();
            self.after_mutation();
        }
    }

    fn delete_selection(&mut self) {
        let edge_ids: Vec<EdgeId> = self.selected_edges.drain().collect();
        let node_ids: Vec<NodeId> = self.selected_nodes.drain().collect();
        if delete_items(&mut self.document.graph, &mut self.undo_stack, &edge_ids, &node_ids) {
            self.after_mutation();
        }
    }

    fn try_connect(&mut self, candidate: Connection) {
        if let Err(err) = validate::validate_connection(&candidate, &self.document.graph) {
            // Refused connection: no edge, no snapshot, gesture just ends.
            log::debug!("connection refused: {err}");
            self.last_save_info = Some(format!("{}", err));
            self.last_info_time = Some(Instant::now());
            self.last_info_style = NoticeStyle::Subtle;
            return;
        }
        self.undo_stack.take_snapshot(&self.document.graph);
        match self.document.graph.connect(candidate) {
            Ok(_) => self.after_mutation(),
            Err(err) => log::debug!("connection refused late: {err}"),
        }
    }

    fn undo(&mut self) {
        if self.undo_stack.undo(&mut self.document.graph) {
            self.selected_nodes.clear();
            self.selected_edges.clear();
            self.after_mutation();
        }
    }

    fn redo(&mut self) {
        if self.undo_stack.redo(&mut self.document.graph) {
            self.selected_nodes.clear();
            self.selected_edges.clear();
            self.after_mutation();
        }
    }

    fn deselect_all(&mut self) {
        self.selected_nodes.clear();
        self.selected_edges.clear();
        self.pending_connection = None;
        self.reconnecting = None;
    }
}

/// Remove the given edges and nodes as one undoable step. Ids that no longer
/// exist in the store are discarded first; when nothing live remains neither
/// the store nor the undo stack is touched.
pub fn delete_items(
    graph: &mut FlowGraph,
    undo: &mut UndoRedoStack,
    edge_ids: &[EdgeId],
    node_ids: &[NodeId],
) -> bool {
    let edge_ids: Vec<EdgeId> = edge_ids
        .iter()
        .filter(|id| graph.get_edge(id).is_some())
        .cloned()
        .collect();
    let node_ids: Vec<NodeId> = node_ids
        .iter()
        .filter(|id| graph.has_node(id))
        .cloned()
        .collect();
    if edge_ids.is_empty() && node_ids.is_empty() {
        return false;
    }
    undo.take_snapshot(graph);
    let mut mutated = graph.remove_edges(&edge_ids);
    mutated |= graph.remove_nodes(&node_ids);
    mutated
}

/// End an edge-reconnect gesture. Dropping on a port revalidates the edge at
/// the new tuple; dropping anywhere else deletes it, as does dropping on a
/// port that rejects the connection. Returns whether the store changed.
pub fn resolve_reconnect(
    graph: &mut FlowGraph,
    edge_id: &str,
    candidate: Option<Connection>,
) -> bool {
    match candidate {
        Some(c) => match graph.reconnect(edge_id, c) {
            Ok(_) => true,
            Err(ConnectionError::UnknownEdge(_)) => false,
            Err(err) => {
                log::debug!("reconnect refused, dropping edge: {err}");
                graph.remove_edges(&[edge_id.to_string()])
            }
        },
        None => graph.remove_edges(&[edge_id.to_string()]),
    }
}

fn default_palette() -> Vec<PaletteEntry> {
    let entry = |label: &str, payload: serde_json::Value| PaletteEntry {
        label: label.to_string(),
        payload: payload.to_string(),
    };
    vec![
        entry(
            "File input",
            serde_json::json!({
                "type": "InputFileNode",
                "node": { "template": {
                    "ports": [ { "handle": "Document|file", "direction": "Output" } ],
                    "file_types": [], "suffixes": []
                } }
            }),
        ),
        entry(
            "Text loader",
            serde_json::json!({
                "type": "TextLoader",
                "node": { "template": {
                    "ports": [
                        { "handle": "Document|file", "direction": "Input" },
                        { "handle": "Text|text", "direction": "Output" }
                    ],
                    "file_types": ["txt", "md"], "suffixes": [".txt", ".md"]
                } }
            }),
        ),
        entry(
            "Image loader",
            serde_json::json!({
                "type": "ImageLoader",
                "node": { "template": {
                    "ports": [
                        { "handle": "Document|file", "direction": "Input" },
                        { "handle": "Text|caption", "direction": "Output" }
                    ],
                    "file_types": ["png", "jpg"], "suffixes": [".png", ".jpg"]
                } }
            }),
        ),
        entry(
            "Prompt",
            serde_json::json!({
                "type": "PromptNode",
                "node": { "template": {
                    "ports": [
                        { "handle": "Text|input", "direction": "Input" },
                        { "handle": "Text|output", "direction": "Output" }
                    ]
                } }
            }),
        ),
        entry(
            "Output",
            serde_json::json!({
                "type": "OutputNode",
                "node": { "template": {
                    "ports": [ { "handle": "any|input", "direction": "Input" } ]
                } }
            }),
        ),
    ]
}

// Stable per-tag color so an edge and the ports it may legally join share a
// hue, mirroring the class-based stroke styling of the document format.
fn color_for_tag(tag: &str) -> Color32 {
    let mut hash: u32 = 2166136261;
    for b in tag.to_ascii_lowercase().bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    let hue = (hash % 360) as f32;
    let (r, g, b) = hue_to_rgb(hue);
    Color32::from_rgb(r, g, b)
}

fn hue_to_rgb(hue: f32) -> (u8, u8, u8) {
    let h = (hue / 60.0) % 6.0;
    let c = 180.0f32;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    ((r + 60.0) as u8, (g + 60.0) as u8, (b + 60.0) as u8)
}

fn dist_point_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let len2 = ab.x * ab.x + ab.y * ab.y;
    if len2 <= f32::EPSILON {
        return a.distance(p);
    }
    let t = (((p.x - a.x) * ab.x + (p.y - a.y) * ab.y) / len2).clamp(0.0, 1.0);
    let proj = Pos2::new(a.x + ab.x * t, a.y + ab.y * t);
    proj.distance(p)
}

// Screen positions of a node's ports, inputs down the left edge and outputs
// down the right, evenly spaced.
fn port_positions(rect: Rect, ports: &[PortDef]) -> Vec<(usize, Pos2)> {
    let inputs: Vec<usize> = ports
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction == PortDirection::Input)
        .map(|(i, _)| i)
        .collect();
    let outputs: Vec<usize> = ports
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction == PortDirection::Output)
        .map(|(i, _)| i)
        .collect();
    let mut out = Vec::with_capacity(ports.len());
    for (slot, idx) in inputs.iter().enumerate() {
        let y = rect.top() + rect.height() * (slot as f32 + 1.0) / (inputs.len() as f32 + 1.0);
        out.push((*idx, Pos2::new(rect.left(), y)));
    }
    for (slot, idx) in outputs.iter().enumerate() {
        let y = rect.top() + rect.height() * (slot as f32 + 1.0) / (outputs.len() as f32 + 1.0);
        out.push((*idx, Pos2::new(rect.right(), y)));
    }
    out
}

fn port_screen_pos(node: &Node, handle: &str, rect: Rect) -> Option<Pos2> {
    let ports = &node.data.template.ports;
    let idx = ports.iter().position(|p| p.handle == handle)?;
    port_positions(rect, ports)
        .into_iter()
        .find(|(i, _)| *i == idx)
        .map(|(_, pos)| pos)
}

impl eframe::App for CanvasApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // The close prompt is unconditional: it covers paths the in-app
        // guard cannot, so it fires whatever the dirty state says.
        if ctx.input(|i| i.viewport().close_requested()) && !self.allow_close {
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            let _ = self.guard.request_leave(&self.document);
            self.close_confirm_open = true;
        }

        // Track pointer for keyboard paste
        if let Some(pos) = ctx.pointer_hover_pos() {
            self.pointer_pos = pos;
        }

        // OS file drops go straight to the factory
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|f| f.path.clone())
                .collect()
        });
        if !dropped.is_empty() {
            let at = self.world_from_screen_or_center(self.pointer_pos);
            self.handle_drop(DropPayload::Files(dropped), at);
        }

        self.handle_shortcuts(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button(if self.sidebar_open { "⏴ Components" } else { "⏵ Components" }).clicked() {
                    self.sidebar_open = !self.sidebar_open;
                }
                if ui.button("Save").clicked() {
                    self.save_now();
                }
                if ui.button("Undo").clicked() {
                    self.undo();
                }
                if ui.button("Redo").clicked() {
                    self.redo();
                }
                ui.separator();
                ui.label(&self.document.name);
                if self.document.is_dirty() {
                    ui.colored_label(Color32::from_rgb(255, 180, 60), "● unsaved");
                }
                if let Some(err) = &self.save_error {
                    ui.colored_label(Color32::from_rgb(255, 90, 90), err);
                }
            });
        });

        if self.sidebar_open {
            egui::SidePanel::left("palette").default_width(170.0).show(ctx, |ui| {
                ui.heading("Components");
                ui.separator();
                ui.small("Drag onto the canvas");
                let mut drag_payload: Option<String> = None;
                for entry in &self.palette {
                    let resp = ui.add(
                        egui::Label::new(format!("⬛ {}", entry.label))
                            .sense(Sense::click_and_drag()),
                    );
                    if resp.drag_started() {
                        drag_payload = Some(entry.payload.clone());
                    }
                }
                if drag_payload.is_some() {
                    self.palette_drag = drag_payload;
                }
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            self.canvas_ui(ui);
        });

        if self.close_confirm_open {
            self.close_confirm_window(ctx);
        }

        // Transient toast for save feedback
        if let (Some(info), Some(at)) = (&self.last_save_info, self.last_info_time) {
            let ttl = match self.last_info_style {
                NoticeStyle::Subtle => Duration::from_millis(1500),
                NoticeStyle::Prominent => Duration::from_millis(3000),
            };
            if at.elapsed() < ttl {
                egui::Area::new(egui::Id::new("toast"))
                    .anchor(egui::Align2::CENTER_BOTTOM, Vec2::new(0.0, -16.0))
                    .show(ctx, |ui| {
                        egui::Frame::popup(ui.style()).show(ui, |ui| {
                            ui.label(info);
                        });
                    });
                ctx.request_repaint_after(Duration::from_millis(100));
            } else {
                self.last_save_info = None;
                self.last_info_time = None;
            }
        }

        self.autosave_tick();
        // Keep the persisted viewport in step with the canvas
        self.document.viewport = Viewport { x: self.pan.x, y: self.pan.y, zoom: self.zoom };
    }
}

impl CanvasApp {
    // Edge whose target endpoint sits under `pos`, if any.
    fn edge_grab_at(&self, canvas: Rect, pos: Pos2) -> Option<ReconnectDrag> {
        for edge in &self.document.graph.edges {
            let Some(dst) = self.document.graph.get_node(&edge.target) else { continue };
            let dst_rect = node_screen_rect(canvas, self.pan, self.zoom, dst);
            let end = port_screen_pos(dst, &edge.target_handle, dst_rect)
                .unwrap_or_else(|| dst_rect.left_center());
            if end.distance(pos) <= PORT_RADIUS * 2.0 {
                return Some(ReconnectDrag {
                    edge_id: edge.id.clone(),
                    source: edge.source.clone(),
                    source_handle: edge.source_handle.clone(),
                });
            }
        }
        None
    }

    // Input port under `pos`, if any.
    fn input_port_at(&self, canvas: Rect, pos: Pos2) -> Option<(NodeId, String)> {
        for node in &self.document.graph.nodes {
            let rect = node_screen_rect(canvas, self.pan, self.zoom, node);
            for (idx, ppos) in port_positions(rect, &node.data.template.ports) {
                let port = &node.data.template.ports[idx];
                if port.direction == PortDirection::Input && ppos.distance(pos) <= PORT_RADIUS * 2.5
                {
                    return Some((node.id.clone(), port.handle.clone()));
                }
            }
        }
        None
    }

    fn world_from_screen_or_center(&self, p: Pos2) -> Position {
        let rect = self
            .last_canvas_rect
            .unwrap_or(Rect::from_min_size(Pos2::ZERO, Vec2::new(800.0, 600.0)));
        let w = from_screen(rect, self.pan, self.zoom, p);
        Position::new(w.x, w.y)
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        let (copy, paste, undo, redo, save, delete) = ctx.input(|i| {
            let cmd = i.modifiers.command;
            (
                cmd && i.key_pressed(egui::Key::C),
                cmd && i.key_pressed(egui::Key::V),
                cmd && !i.modifiers.shift && i.key_pressed(egui::Key::Z),
                cmd && (i.key_pressed(egui::Key::Y)
                    || (i.modifiers.shift && i.key_pressed(egui::Key::Z))),
                cmd && i.key_pressed(egui::Key::S),
                i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace),
            )
        });
        if copy {
            self.copy_selection();
        }
        if paste {
            let at = self.world_from_screen_or_center(self.pointer_pos);
            self.paste_at(at);
        }
        if undo {
            self.undo();
        }
        if redo {
            self.redo();
        }
        if save {
            self.save_now();
        }
        if delete {
            self.delete_selection();
        }
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            // Abandoning a reconnect leaves the edge where it was
            self.pending_connection = None;
            self.reconnecting = None;
        }
    }

    fn close_confirm_window(&mut self, ctx: &egui::Context) {
        let dirty_block = self.guard.is_blocked();
        egui::Window::new("Leave Flow-Canvas?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, Vec2::ZERO)
            .show(ctx, |ui| {
                if dirty_block {
                    ui.label("This flow has unsaved changes.");
                } else {
                    ui.label("Are you sure you want to leave?");
                }
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Cancel").clicked() {
                        self.guard.cancel();
                        self.close_confirm_open = false;
                    }
                    if dirty_block {
                        if ui.button("Leave without saving").clicked() {
                            let outcome = self.guard.resolve(
                                LeaveChoice::Discard,
                                &mut self.document,
                                &mut self.registry,
                                &mut self.saver,
                            );
                            if outcome == LeaveOutcome::Left {
                                self.close_confirm_open = false;
                                self.allow_close = true;
                                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                            }
                        }
                        if ui.button("Save and leave").clicked() {
                            let outcome = self.guard.resolve(
                                LeaveChoice::SaveAndLeave,
                                &mut self.document,
                                &mut self.registry,
                                &mut self.saver,
                            );
                            match outcome {
                                LeaveOutcome::Left => {
                                    self.close_confirm_open = false;
                                    self.allow_close = true;
                                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                                }
                                LeaveOutcome::Stayed => {
                                    self.save_error =
                                        Some("Save failed; staying on the flow".to_string());
                                }
                            }
                        }
                    } else if ui.button("Leave").clicked() {
                        self.close_confirm_open = false;
                        self.allow_close = true;
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
    }

    fn canvas_ui(&mut self, ui: &mut egui::Ui) {
        let available = ui.available_rect_before_wrap();
        self.last_canvas_rect = Some(available);

        // Background allocation for panning/clicking; nodes and ports are
        // allocated later, so they win the hit test.
        let bg_resp = ui.allocate_rect(available, Sense::click_and_drag());

        // Zoom with scroll only when the pointer is over the canvas
        if bg_resp.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let factor = (1.0 + scroll * 0.001).clamp(0.9, 1.1);
                self.zoom = (self.zoom * factor).clamp(0.01, 8.0);
                ui.ctx().request_repaint_after(Duration::from_millis(16));
            }
        }

        let shift_held = ui.input(|i| i.modifiers.shift);

        // Rubber-band selection with Shift, panning otherwise
        if shift_held {
            if bg_resp.drag_started() {
                if let Some(pos) = ui.input(|i| i.pointer.press_origin()) {
                    self.rect_select_start = Some(pos);
                    self.rect_select_current = Some(pos);
                }
            }
            if let Some(cur) = ui.input(|i| i.pointer.latest_pos()) {
                if self.rect_select_start.is_some() && bg_resp.dragged() {
                    self.rect_select_current = Some(cur);
                }
            }
            if self.rect_select_start.is_some() && !ui.input(|i| i.pointer.primary_down()) {
                if let (Some(a), Some(b)) =
                    (self.rect_select_start.take(), self.rect_select_current.take())
                {
                    let sel_rect = Rect::from_two_pos(a, b);
                    for node in &self.document.graph.nodes {
                        let rect = node_screen_rect(available, self.pan, self.zoom, node);
                        if sel_rect.intersects(rect) {
                            self.selected_nodes.insert(node.id.clone());
                        }
                    }
                }
            }
        } else {
            self.rect_select_start = None;
            self.rect_select_current = None;
            // A drag that starts on an edge's target endpoint grabs that
            // edge for reconnection instead of panning.
            if bg_resp.drag_started()
                && self.dragging.is_none()
                && self.reconnecting.is_none()
                && self.pending_connection.is_none()
            {
                if let Some(origin) = ui.input(|i| i.pointer.press_origin()) {
                    self.reconnecting = self.edge_grab_at(available, origin);
                }
            }
            if bg_resp.dragged() && self.dragging.is_none() && self.reconnecting.is_none() {
                self.pan += bg_resp.drag_delta();
            }
        }
        if bg_resp.clicked() {
            self.deselect_all();
        }

        let painter = ui.painter_at(available);
        painter.rect_filled(available, 0.0, Color32::from_gray(24));
        if self.app_settings.grid_enabled {
            draw_grid(&painter, available, self.pan, self.zoom, self.app_settings.grid_step);
        }

        // Palette drop: a dragged palette item released over the canvas
        // becomes a component drop at the pointer.
        if self.palette_drag.is_some() {
            let released = ui.input(|i| i.pointer.any_released());
            let over_canvas = available.contains(self.pointer_pos);
            if released {
                if let Some(payload) = self.palette_drag.take() {
                    if over_canvas {
                        let at = self.world_from_screen_or_center(self.pointer_pos);
                        self.handle_drop(DropPayload::Component(payload), at);
                    }
                }
            } else if over_canvas {
                painter.text(
                    self.pointer_pos + Vec2::new(12.0, -12.0),
                    egui::Align2::LEFT_BOTTOM,
                    "drop to add",
                    egui::FontId::proportional(12.0),
                    Color32::from_gray(180),
                );
            }
        }

        // Draw edges first so nodes sit on top
        let mut clicked_edge: Option<String> = None;
        let pointer = self.pointer_pos;
        let primary_clicked = ui.input(|i| i.pointer.primary_clicked());
        for edge in &self.document.graph.edges {
            // The grabbed edge is replaced by the live reconnect line
            if self.reconnecting.as_ref().is_some_and(|r| r.edge_id == edge.id) {
                continue;
            }
            let (Some(src), Some(dst)) = (
                self.document.graph.get_node(&edge.source),
                self.document.graph.get_node(&edge.target),
            ) else {
                continue;
            };
            let src_rect = node_screen_rect(available, self.pan, self.zoom, src);
            let dst_rect = node_screen_rect(available, self.pan, self.zoom, dst);
            let a = port_screen_pos(src, &edge.source_handle, src_rect)
                .unwrap_or_else(|| src_rect.right_center());
            let b = port_screen_pos(dst, &edge.target_handle, dst_rect)
                .unwrap_or_else(|| dst_rect.left_center());
            let tag = validate::type_tag(&edge.target_handle);
            let selected = self.selected_edges.contains(&edge.id);
            let stroke = if selected {
                Stroke::new(3.0, Color32::from_rgb(255, 200, 80))
            } else {
                Stroke::new(1.8, color_for_tag(tag))
            };
            // Two segments through a midpoint pulled horizontally, a cheap
            // approximation of the animated bezier in the web renderer.
            let mid = Pos2::new((a.x + b.x) * 0.5, (a.y + b.y) * 0.5);
            painter.line_segment([a, mid], stroke);
            painter.line_segment([mid, b], stroke);
            if primary_clicked
                && (dist_point_segment(pointer, a, mid) < EDGE_HIT_DISTANCE
                    || dist_point_segment(pointer, mid, b) < EDGE_HIT_DISTANCE)
            {
                clicked_edge = Some(edge.id.clone());
            }
        }
        if let Some(id) = clicked_edge {
            if !ui.input(|i| i.modifiers.command) {
                self.selected_edges.clear();
                self.selected_nodes.clear();
            }
            self.selected_edges.insert(id);
        }

        // Nodes: iterate over a snapshot of ids so interaction handlers can
        // borrow the store mutably.
        let node_ids: Vec<NodeId> = self.document.graph.nodes.iter().map(|n| n.id.clone()).collect();
        let mut moves: Vec<NodeChange> = Vec::new();
        let mut clicked_node: Option<NodeId> = None;
        let mut connect_attempt: Option<Connection> = None;
        let mut drag_ended = false;

        for id in &node_ids {
            let Some(node) = self.document.graph.get_node(id) else { continue };
            let node = node.clone();
            let rect = node_screen_rect(available, self.pan, self.zoom, &node);
            let resp = ui.allocate_rect(rect, Sense::click_and_drag());

            if resp.drag_started() {
                // Undoable gesture begins: snapshot before the first move is
                // visible in the store. Dragging a selected node drags the
                // whole selection.
                self.undo_stack.take_snapshot(&self.document.graph);
                self.dragging = Some(id.clone());
            }
            if resp.dragged() && self.dragging.as_deref() == Some(id.as_str()) {
                let delta = resp.drag_delta() / self.zoom;
                let group: Vec<NodeId> = if self.selected_nodes.contains(id) {
                    self.selected_nodes.iter().cloned().collect()
                } else {
                    vec![id.clone()]
                };
                for gid in group {
                    if let Some(n) = self.document.graph.get_node(&gid) {
                        moves.push(NodeChange::Moved {
                            id: gid,
                            position: Position::new(
                                n.position.x + delta.x,
                                n.position.y + delta.y,
                            ),
                        });
                    }
                }
            }
            if resp.drag_stopped() && self.dragging.as_deref() == Some(id.as_str()) {
                drag_ended = true;
            }
            if resp.clicked() {
                clicked_node = Some(id.clone());
            }

            // Body
            let selected = self.selected_nodes.contains(id);
            let fill = if selected {
                Color32::from_rgb(52, 70, 120)
            } else {
                Color32::from_gray(48)
            };
            let outline = if selected {
                Stroke::new(2.0, Color32::from_rgb(130, 170, 255))
            } else {
                Stroke::new(1.0, Color32::from_gray(90))
            };
            painter.rect_filled(rect, 6.0, fill);
            painter.rect_stroke(rect, 6.0, outline, egui::StrokeKind::Inside);
            painter.text(
                rect.center_top() + Vec2::new(0.0, 14.0),
                egui::Align2::CENTER_CENTER,
                &node.data.kind,
                egui::FontId::proportional((13.0 * self.zoom).clamp(9.0, 18.0)),
                Color32::WHITE,
            );
            if node.is_file_input() {
                let types = node.data.template.file_types.join(", ");
                painter.text(
                    rect.center_bottom() - Vec2::new(0.0, 10.0),
                    egui::Align2::CENTER_CENTER,
                    if types.is_empty() { "no uploads yet".to_string() } else { types },
                    egui::FontId::proportional((10.0 * self.zoom).clamp(8.0, 13.0)),
                    Color32::from_gray(170),
                );
            }

            // Ports, allocated after the body so they win the hit test
            for (idx, pos) in port_positions(rect, &node.data.template.ports) {
                let port = &node.data.template.ports[idx];
                let tag = validate::type_tag(&port.handle);
                let port_rect = Rect::from_center_size(pos, Vec2::splat(PORT_RADIUS * 3.0));
                let port_resp = ui.allocate_rect(port_rect, Sense::click());
                let mut color = color_for_tag(tag);
                if let Some(pending) = &self.pending_connection {
                    let candidate = Connection::new(
                        pending.source.clone(),
                        pending.source_handle.clone(),
                        node.id.clone(),
                        port.handle.clone(),
                    );
                    if port.direction == PortDirection::Input
                        && !validate::is_valid_connection(&candidate, &self.document.graph)
                    {
                        color = Color32::from_gray(70);
                    }
                }
                painter.circle_filled(pos, PORT_RADIUS, color);
                let port_clicked = port_resp.clicked();
                if port_resp.hovered() {
                    painter.circle_stroke(pos, PORT_RADIUS + 2.0, Stroke::new(1.0, Color32::WHITE));
                    port_resp.on_hover_text(port.handle.clone());
                }
                if port_clicked {
                    match port.direction {
                        PortDirection::Output => {
                            self.pending_connection = Some(PendingConnection {
                                source: node.id.clone(),
                                source_handle: port.handle.clone(),
                            });
                        }
                        PortDirection::Input => {
                            if let Some(pending) = self.pending_connection.take() {
                                connect_attempt = Some(Connection::new(
                                    pending.source,
                                    pending.source_handle,
                                    node.id.clone(),
                                    port.handle.clone(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        if !moves.is_empty() {
            if self.document.graph.apply_node_changes(&moves) {
                self.after_mutation();
            }
        }
        if drag_ended {
            if self.app_settings.snap_to_grid {
                if let Some(dragged) = &self.dragging {
                    let step = self.app_settings.grid_step.max(1.0);
                    let group: Vec<NodeId> = if self.selected_nodes.contains(dragged) {
                        self.selected_nodes.iter().cloned().collect()
                    } else {
                        vec![dragged.clone()]
                    };
                    let snaps: Vec<NodeChange> = group
                        .into_iter()
                        .filter_map(|gid| {
                            let n = self.document.graph.get_node(&gid)?;
                            Some(NodeChange::Moved {
                                id: gid,
                                position: Position::new(
                                    (n.position.x / step).round() * step,
                                    (n.position.y / step).round() * step,
                                ),
                            })
                        })
                        .collect();
                    if self.document.graph.apply_node_changes(&snaps) {
                        self.after_mutation();
                    }
                }
            }
            self.dragging = None;
        }
        if let Some(id) = clicked_node {
            let ctrl = ui.input(|i| i.modifiers.command);
            if ctrl {
                if !self.selected_nodes.remove(&id) {
                    self.selected_nodes.insert(id);
                }
            } else {
                self.selected_nodes.clear();
                self.selected_edges.clear();
                self.selected_nodes.insert(id);
            }
        }
        if let Some(candidate) = connect_attempt {
            self.try_connect(candidate);
        }

        // Live connection line from the pending source port to the pointer
        if let Some(pending) = &self.pending_connection {
            if let Some(node) = self.document.graph.get_node(&pending.source) {
                let rect = node_screen_rect(available, self.pan, self.zoom, node);
                if let Some(from) = port_screen_pos(node, &pending.source_handle, rect) {
                    let tag = validate::type_tag(&pending.source_handle);
                    painter.line_segment(
                        [from, self.pointer_pos],
                        Stroke::new(1.5, color_for_tag(tag)),
                    );
                }
            } else {
                // Source vanished mid-gesture (e.g. undo); drop the gesture.
                self.pending_connection = None;
            }
        }

        // Reconnect gesture: the loose end follows the pointer until
        // release. Released on an input port, the edge is revalidated at
        // the new tuple; released anywhere else, the edge is deleted.
        if let Some(rec) = self.reconnecting.clone() {
            if ui.input(|i| i.pointer.any_released()) {
                self.reconnecting = None;
                let candidate = self
                    .input_port_at(available, self.pointer_pos)
                    .map(|(node, handle)| {
                        Connection::new(
                            rec.source.clone(),
                            rec.source_handle.clone(),
                            node,
                            handle,
                        )
                    });
                // Dropping back on the port the edge already occupies (or a
                // vanished edge) ends the gesture with no undo entry.
                let nothing_to_do = match self.document.graph.get_edge(&rec.edge_id) {
                    None => true,
                    Some(e) => candidate
                        .as_ref()
                        .is_some_and(|c| e.target == c.target && e.target_handle == c.target_handle),
                };
                if !nothing_to_do {
                    self.undo_stack.take_snapshot(&self.document.graph);
                    if resolve_reconnect(&mut self.document.graph, &rec.edge_id, candidate) {
                        self.after_mutation();
                    }
                }
            } else if let Some(node) = self.document.graph.get_node(&rec.source) {
                let rect = node_screen_rect(available, self.pan, self.zoom, node);
                if let Some(from) = port_screen_pos(node, &rec.source_handle, rect) {
                    let tag = validate::type_tag(&rec.source_handle);
                    painter.line_segment(
                        [from, self.pointer_pos],
                        Stroke::new(1.5, color_for_tag(tag)),
                    );
                }
            } else {
                self.reconnecting = None;
            }
        }

        // Selection rectangle overlay
        if let (Some(a), Some(b)) = (self.rect_select_start, self.rect_select_current) {
            let rect = Rect::from_two_pos(a, b);
            painter.rect_filled(rect, 0.0, Color32::from_rgba_premultiplied(60, 90, 160, 40));
            painter.rect_stroke(
                rect,
                0.0,
                Stroke::new(1.0, Color32::from_rgb(120, 160, 255)),
                egui::StrokeKind::Inside,
            );
        }
    }
}

fn to_screen(canvas: Rect, pan: Vec2, zoom: f32, p: Pos2) -> Pos2 {
    let center = canvas.center();
    Pos2::new(
        (p.x - center.x) * zoom + center.x + pan.x,
        (p.y - center.y) * zoom + center.y + pan.y,
    )
}

fn from_screen(canvas: Rect, pan: Vec2, zoom: f32, p: Pos2) -> Pos2 {
    let center = canvas.center();
    Pos2::new(
        ((p.x - pan.x) - center.x) / zoom + center.x,
        ((p.y - pan.y) - center.y) / zoom + center.y,
    )
}

fn node_screen_rect(canvas: Rect, pan: Vec2, zoom: f32, node: &Node) -> Rect {
    let min = to_screen(canvas, pan, zoom, Pos2::new(node.position.x, node.position.y));
    Rect::from_min_size(min, NODE_SIZE * zoom)
}

fn draw_grid(painter: &egui::Painter, rect: Rect, pan: Vec2, zoom: f32, world_step: f32) {
    let step = (world_step.max(1.0) * zoom).max(4.0);
    let color = Color32::from_gray(34);
    let ox = (pan.x % step + step) % step;
    let oy = (pan.y % step + step) % step;
    let mut x = rect.left() + ox;
    while x < rect.right() {
        painter.line_segment(
            [Pos2::new(x, rect.top()), Pos2::new(x, rect.bottom())],
            Stroke::new(0.5, color),
        );
        x += step;
    }
    let mut y = rect.top() + oy;
    while y < rect.bottom() {
        painter.line_segment(
            [Pos2::new(rect.left(), y), Pos2::new(rect.right(), y)],
            Stroke::new(0.5, color),
        );
        y += step;
    }
}

