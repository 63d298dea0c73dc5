use crate::atlas::{Atlas, AtlasError, AtlasPage, PageFilter};
use macroquad::file::{load_file, load_string, FileError};
use macroquad::logging::warn;
use macroquad::miniquad::{Texture, TextureFormat, TextureParams, TextureWrap};
use macroquad::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Io(#[from] FileError),

    #[error("atlas `{path}`: {source}")]
    Atlas { path: String, source: AtlasError },

    #[error("json `{path}`: {source}")]
    Json { path: String, source: serde_json::Error },

    #[error("texture page `{0}`: {1}")]
    Image(String, image::ImageError),
}

enum AssetRequest {
    TextureAtlas(String),
    Json(String),
}

/// A parsed atlas together with one uploaded texture per page.
pub struct TextureAtlas {
    pub atlas: Atlas,
    pub pages: Vec<Texture2D>,
}

/// Queue-based asset loader. Hooks queue what they need up front; the canvas
/// drains the queue once before the first frame. Failures are recorded, not
/// raised; one bad file never blocks the others.
pub struct AssetManager {
    prefix: String,
    queue: Vec<AssetRequest>,
    atlases: HashMap<String, TextureAtlas>,
    documents: HashMap<String, Value>,
    errors: Vec<AssetError>,
}

impl AssetManager {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            queue: Vec::new(),
            atlases: HashMap::new(),
            documents: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Queues a `.atlas` file and the page images it names.
    pub fn load_texture_atlas(&mut self, name: &str) {
        self.queue.push(AssetRequest::TextureAtlas(name.to_string()));
    }

    pub fn load_json(&mut self, name: &str) {
        self.queue.push(AssetRequest::Json(name.to_string()));
    }

    pub async fn load_queued(&mut self) {
        let queue = std::mem::take(&mut self.queue);
        for request in queue {
            let outcome = match &request {
                AssetRequest::TextureAtlas(name) => self.fetch_texture_atlas(name).await,
                AssetRequest::Json(name) => self.fetch_json(name).await,
            };
            if let Err(error) = outcome {
                self.errors.push(error);
            }
        }
    }

    pub fn atlas(&self, name: &str) -> Option<&TextureAtlas> {
        self.atlases.get(name)
    }

    pub fn json(&self, name: &str) -> Option<&Value> {
        self.documents.get(name)
    }

    pub fn errors(&self) -> &[AssetError] {
        &self.errors
    }

    async fn fetch_texture_atlas(&mut self, name: &str) -> Result<(), AssetError> {
        let path = format!("{}{}", self.prefix, name);
        let text = load_string(&path).await?;
        let atlas = Atlas::parse(&text)
            .map_err(|source| AssetError::Atlas { path: path.clone(), source })?;
        let mut pages = Vec::with_capacity(atlas.pages.len());
        for page in atlas.pages.iter() {
            let image_path = page_path(&path, &page.name);
            let bytes = load_file(&image_path).await?;
            let texture = make_texture(&bytes, page)
                .map_err(|error| AssetError::Image(image_path, error))?;
            pages.push(texture);
        }
        self.atlases.insert(name.to_string(), TextureAtlas { atlas, pages });
        Ok(())
    }

    async fn fetch_json(&mut self, name: &str) -> Result<(), AssetError> {
        let path = format!("{}{}", self.prefix, name);
        let text = load_string(&path).await?;
        let document = serde_json::from_str(&text)
            .map_err(|source| AssetError::Json { path, source })?;
        self.documents.insert(name.to_string(), document);
        Ok(())
    }
}

// Page images live next to the atlas file that names them.
fn page_path(atlas_path: &str, page_name: &str) -> String {
    match atlas_path.rfind('/') {
        Some(slash) => format!("{}{}", &atlas_path[..=slash], page_name),
        None => page_name.to_string(),
    }
}

fn make_texture(bytes: &[u8], page: &AtlasPage) -> Result<Texture2D, image::ImageError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = (img.width(), img.height());
    let mut raw_bytes = img.into_raw();
    if page.pma {
        warn!("page `{}` is premultiplied; expect dark edges", page.name);
    }
    bleed_transparent_texels(&mut raw_bytes, width as usize, height as usize);
    let ctx = unsafe {
        let InternalGlContext { quad_context, .. } = get_internal_gl();
        quad_context
    };
    let texture = Texture::from_data_and_format(
        ctx,
        &raw_bytes[..],
        TextureParams {
            width,
            height,
            format: TextureFormat::RGBA8,
            filter: filter_mode(page.min_filter),
            wrap: TextureWrap::Clamp,
        },
    );
    Ok(Texture2D::from_miniquad_texture(texture))
}

fn filter_mode(filter: PageFilter) -> FilterMode {
    match filter {
        PageFilter::Nearest => FilterMode::Nearest,
        // mipmaps are not generated, so mipmap filters sample linearly
        PageFilter::Linear | PageFilter::MipMap => FilterMode::Linear,
    }
}

/// Copies RGB into fully transparent texels from any non transparent
/// 4-neighbor. Three passes push color a few texels outward, far enough to
/// stop dark fringes under bilinear sampling. Alpha is left untouched.
fn bleed_transparent_texels(bytes: &mut [u8], width: usize, height: usize) {
    let texel = |x: usize, y: usize| 4 * (y * width + x);
    for _ in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let at = texel(x, y);
                if bytes[at..at + 4].iter().any(|&it| it != 0) {
                    continue;
                }
                let neighbors = [
                    if y > 0 { Some(texel(x, y - 1)) } else { None },
                    if y + 1 < height { Some(texel(x, y + 1)) } else { None },
                    if x > 0 { Some(texel(x - 1, y)) } else { None },
                    if x + 1 < width { Some(texel(x + 1, y)) } else { None },
                ];
                for &from in neighbors.iter().flatten() {
                    if bytes[from..from + 4].iter().any(|&it| it != 0) {
                        bytes[at] = bytes[from];
                        bytes[at + 1] = bytes[from + 1];
                        bytes[at + 2] = bytes[from + 2];
                    }
                }
            }
        }
    }
}
