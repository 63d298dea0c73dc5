use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

pub(crate) fn default_one() -> f32 {
    1.0
}

fn default_white() -> String {
    "ffffffff".to_string()
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawSkeletonFile {
    #[serde(default)]
    pub skeleton: RawHeader,

    #[serde(default)]
    pub bones: Vec<RawBone>,

    #[serde(default)]
    pub slots: Vec<RawSlot>,

    #[serde(default)]
    pub skins: Vec<RawSkin>,

    #[serde(default)]
    pub animations: HashMap<String, RawAnimation>,

    #[serde(default)]
    pub ik: Vec<Value>,

    #[serde(default)]
    pub transform: Vec<Value>,

    #[serde(default)]
    pub path: Vec<Value>,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawHeader {
    #[serde(rename = "spine")]
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    #[serde(default)]
    pub width: f32,

    #[serde(default)]
    pub height: f32,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawBone {
    pub name: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub length: f32,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    #[serde(default)]
    pub rotation: f32,

    #[serde(rename = "scaleX")]
    #[serde(default = "default_one")]
    pub scale_x: f32,

    #[serde(rename = "scaleY")]
    #[serde(default = "default_one")]
    pub scale_y: f32,

    #[serde(rename = "shearX")]
    #[serde(default)]
    pub shear_x: f32,

    #[serde(rename = "shearY")]
    #[serde(default)]
    pub shear_y: f32,

    #[serde(rename = "transform")]
    #[serde(default)]
    pub inherit: RawInherit,
}

#[derive(Copy, Clone, PartialEq, Eq, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum RawInherit {
    Normal,
    OnlyTranslation,
    NoRotationOrReflection,
    NoScale,
    NoScaleOrReflection,
}

impl Default for RawInherit {
    fn default() -> Self {
        RawInherit::Normal
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawSlot {
    pub name: String,

    pub bone: String,

    #[serde(default)]
    pub attachment: Option<String>,

    #[serde(default = "default_white")]
    pub color: String,

    #[serde(default)]
    pub blend: Option<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawSkin {
    pub name: String,

    /// slot name -> attachment name -> attachment body
    #[serde(default)]
    pub attachments: HashMap<String, HashMap<String, RawAttachment>>,
}

#[derive(Clone, Debug)]
pub enum RawAttachment {
    Region(RawRegionAttachment),
    Mesh(RawMeshAttachment),
    Unsupported(String),
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawRegionAttachment {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    #[serde(default)]
    pub rotation: f32,

    #[serde(rename = "scaleX")]
    #[serde(default = "default_one")]
    pub scale_x: f32,

    #[serde(rename = "scaleY")]
    #[serde(default = "default_one")]
    pub scale_y: f32,

    #[serde(default)]
    pub width: f32,

    #[serde(default)]
    pub height: f32,

    #[serde(default = "default_white")]
    pub color: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawMeshAttachment {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub uvs: Vec<f32>,

    #[serde(default)]
    pub triangles: Vec<u16>,

    #[serde(default)]
    pub vertices: Vec<f32>,

    #[serde(default)]
    pub hull: u32,

    #[serde(default = "default_white")]
    pub color: String,
}

// An attachment's `type` tag is optional and defaults to a plain region,
// so the dispatch has to happen by hand instead of through a tagged enum.
impl<'de> Deserialize<'de> for RawAttachment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Value = Deserialize::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(|it| it.as_str())
            .unwrap_or("region")
            .to_string();
        match kind.as_str() {
            "region" => serde_json::from_value::<RawRegionAttachment>(value)
                .map(RawAttachment::Region)
                .map_err(serde::de::Error::custom),
            "mesh" => serde_json::from_value::<RawMeshAttachment>(value)
                .map(RawAttachment::Mesh)
                .map_err(serde::de::Error::custom),
            _ => Ok(RawAttachment::Unsupported(kind)),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawAnimation {
    #[serde(default)]
    pub bones: HashMap<String, RawBoneTimelines>,

    #[serde(default)]
    pub slots: Value,

    #[serde(default)]
    pub deform: Value,

    #[serde(rename = "drawOrder")]
    #[serde(default)]
    pub draw_order: Value,

    #[serde(default)]
    pub events: Value,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawBoneTimelines {
    #[serde(default)]
    pub rotate: Vec<RawRotateFrame>,

    #[serde(default)]
    pub translate: Vec<RawVectorFrame>,

    #[serde(default)]
    pub scale: Vec<RawVectorFrame>,

    #[serde(default)]
    pub shear: Vec<Value>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawRotateFrame {
    #[serde(default)]
    pub time: f32,

    /// Exports older than 4.0 call this field `angle`.
    #[serde(default)]
    #[serde(alias = "angle")]
    pub value: f32,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawVectorFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub x: Option<f32>,

    #[serde(default)]
    pub y: Option<f32>,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum RawCurve {
    Named(String),
    Handles(Vec<f32>),
}

/// Parses an `rrggbbaa` hex string, the color notation of the skeleton
/// export. Malformed strings come back as opaque white rather than an error
/// so that a stray color never blocks an otherwise valid file.
pub(crate) fn parse_hex_color(text: &str) -> [f32; 4] {
    if text.len() != 8 || !text.is_ascii() {
        return [1.0, 1.0, 1.0, 1.0];
    }
    let mut channels = [1.0f32; 4];
    for (slot, chunk) in channels.iter_mut().zip(0..4) {
        match u8::from_str_radix(&text[chunk * 2..chunk * 2 + 2], 16) {
            Ok(byte) => *slot = byte as f32 / 255.0,
            Err(_) => return [1.0, 1.0, 1.0, 1.0],
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_without_a_type_tag_is_a_region() {
        let parsed: RawAttachment =
            serde_json::from_str(r#"{ "x": 3.5, "width": 10, "height": 20 }"#).unwrap();
        match parsed {
            RawAttachment::Region(region) => {
                assert_eq!(region.x, 3.5);
                assert_eq!(region.scale_x, 1.0);
            }
            other => panic!("expected a region, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_attachment_kinds_keep_their_tag() {
        let parsed: RawAttachment =
            serde_json::from_str(r#"{ "type": "clipping", "end": "x" }"#).unwrap();
        match parsed {
            RawAttachment::Unsupported(kind) => assert_eq!(kind, "clipping"),
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    #[test]
    fn rotate_frames_accept_the_legacy_angle_field() {
        let parsed: RawRotateFrame =
            serde_json::from_str(r#"{ "time": 0.5, "angle": -12.5 }"#).unwrap();
        assert_eq!(parsed.value, -12.5);
    }

    #[test]
    fn curves_parse_as_stepped_or_handles() {
        let stepped: RawRotateFrame = serde_json::from_str(r#"{ "curve": "stepped" }"#).unwrap();
        assert_eq!(stepped.curve, Some(RawCurve::Named("stepped".to_string())));
        let bezier: RawRotateFrame =
            serde_json::from_str(r#"{ "curve": [0.25, 0.0, 0.75, 1.0] }"#).unwrap();
        match bezier.curve {
            Some(RawCurve::Handles(values)) => assert_eq!(values.len(), 4),
            other => panic!("expected handles, got {:?}", other),
        }
    }

    #[test]
    fn hex_colors_decode_to_unit_floats() {
        let color = parse_hex_color("ff800040");
        assert!((color[0] - 1.0).abs() < 1e-6);
        assert!((color[1] - 128.0 / 255.0).abs() < 1e-6);
        assert!((color[3] - 64.0 / 255.0).abs() < 1e-6);
        assert_eq!(parse_hex_color("zzzzzzzz"), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(parse_hex_color("fff"), [1.0, 1.0, 1.0, 1.0]);
    }
}
