use macroquad::logging::warn;
use ron::de::from_reader;
use serde::Deserialize;

/// Viewer settings read from a `.ron` file next to the manifest. A missing
/// or malformed file falls back to the defaults so a bad edit never keeps
/// the page from coming up.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub title: String,
    pub width: i32,
    pub height: i32,
    pub debug_bones: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "slider puppet".to_string(),
            width: 800,
            height: 600,
            debug_bones: false,
        }
    }
}

impl ViewerConfig {
    pub fn load_or_default(path: &str) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(it) => it,
            Err(_) => return Self::default(),
        };
        match from_reader(&bytes[..]) {
            Ok(it) => it,
            Err(rejection) => {
                warn!("config `{}` is malformed: {}", path, rejection);
                Self::default()
            }
        }
    }
}
