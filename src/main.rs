use flow_canvas::gui::frontend::CanvasApp;
use flow_canvas::persistence::persist;
use flow_canvas::session::document::FlowDocument;

use eframe::egui;

fn main() -> eframe::Result {
    env_logger::init();

    let loaded_state = persist::load_active().ok().flatten();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1300.0, 710.0])
            // Provide sensible bounds so the UI stays usable on small screens
            .with_min_inner_size([700.0, 420.0])
            .with_resizable(true),
        ..Default::default()
    };
    eframe::run_native(
        "Flow-Canvas",
        options,
        Box::new(move |_cc| {
            if let Some(state) = loaded_state {
                Ok(Box::new(CanvasApp::from_state(state)) as Box<dyn eframe::App>)
            } else {
                // No prior state: start with an empty flow
                Ok(Box::new(CanvasApp::new(FlowDocument::new("Untitled flow"))) as Box<dyn eframe::App>)
            }
        }),
    )
}
