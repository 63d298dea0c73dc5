use macroquad::prelude::*;
use macroquad::ui::{hash, root_ui, widgets};
use spine_slider_puppet::app::{PuppetApp, SliderInput};
use spine_slider_puppet::canvas::{CanvasConfig, SkeletonCanvas};
use spine_slider_puppet::config::ViewerConfig;

const CONFIG_PATH: &str = "viewer.ron";
const ASSET_PREFIX: &str = "assets/spine-data/";

/// The page sliders. The panel owns the widget state; the app only reads it
/// through `SliderInput` handles.
struct ControlPanel {
    horizontal: f32,
    vertical: f32,
    horizontal_out: SliderInput,
    vertical_out: SliderInput,
}

impl ControlPanel {
    fn new() -> Self {
        Self {
            horizontal: 50.0,
            vertical: 50.0,
            horizontal_out: SliderInput::new(50.0),
            vertical_out: SliderInput::new(50.0),
        }
    }

    fn draw(&mut self) {
        widgets::Window::new(hash!(), vec2(20.0, 20.0), vec2(260.0, 90.0))
            .label("front bone")
            .ui(&mut *root_ui(), |ui| {
                ui.slider(hash!(), "x", 0f32..100f32, &mut self.horizontal);
                ui.slider(hash!(), "y", 0f32..100f32, &mut self.vertical);
            });
        self.horizontal_out.set(self.horizontal);
        self.vertical_out.set(self.vertical);
    }
}

fn window_conf() -> Conf {
    let config = ViewerConfig::load_or_default(CONFIG_PATH);
    Conf {
        window_title: config.title,
        window_width: config.width,
        window_height: config.height,
        high_dpi: true,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    let config = ViewerConfig::load_or_default(CONFIG_PATH);
    let mut panel = ControlPanel::new();
    let mut app = PuppetApp::new(
        panel.horizontal_out.clone(),
        panel.vertical_out.clone(),
        &config,
    );
    let canvas = SkeletonCanvas::new(CanvasConfig {
        path_prefix: ASSET_PREFIX.to_string(),
    });
    canvas.run(&mut app, move || panel.draw()).await;
}
