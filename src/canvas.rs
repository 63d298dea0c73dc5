use crate::assets::AssetManager;
use crate::runtime::draw::SkeletonRenderer;
use macroquad::prelude::*;

/// Lifecycle hooks of a canvas application. The canvas drives them:
/// `load_assets` once before anything else, then `initialize` after every
/// queued asset arrived (or `error` if any failed), then `update` and
/// `render` every frame until the window closes.
pub trait CanvasApp {
    fn load_assets(&mut self, canvas: &mut SkeletonCanvas);
    fn initialize(&mut self, canvas: &mut SkeletonCanvas);
    fn update(&mut self, canvas: &mut SkeletonCanvas, delta: f32);
    fn render(&mut self, canvas: &mut SkeletonCanvas);
    fn error(&mut self, canvas: &mut SkeletonCanvas);
}

pub struct CanvasConfig {
    /// Prepended to every queued asset name.
    pub path_prefix: String,
}

pub struct SkeletonCanvas {
    pub asset_manager: AssetManager,
    pub renderer: SkeletonRenderer,
}

impl SkeletonCanvas {
    /// GL-free; safe to construct outside a window.
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            asset_manager: AssetManager::new(config.path_prefix),
            renderer: SkeletonRenderer::new(),
        }
    }

    pub fn clear(&self, r: f32, g: f32, b: f32, a: f32) {
        clear_background(Color::new(r, g, b, a));
    }

    /// Hands control to the canvas until the window closes. `page_overlay`
    /// runs after `render` each frame, outside the skeleton camera; the
    /// control page draws its widgets there.
    pub async fn run(mut self, app: &mut impl CanvasApp, mut page_overlay: impl FnMut()) {
        app.load_assets(&mut self);
        self.asset_manager.load_queued().await;
        if self.asset_manager.errors().is_empty() {
            app.initialize(&mut self);
        } else {
            app.error(&mut self);
        }
        loop {
            let delta = get_frame_time();
            app.update(&mut self, delta);
            app.render(&mut self);
            page_overlay();
            next_frame().await;
        }
    }
}
