pub(crate) mod raw;
pub(crate) mod timeline;

pub use timeline::Animation;

use crate::atlas::{Atlas, AtlasRegion};
use macroquad::logging::warn;
use raw::{
    parse_hex_color, RawAnimation, RawAttachment, RawBone, RawInherit, RawMeshAttachment,
    RawRegionAttachment, RawSkeletonFile,
};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use timeline::{compile_rotate_frames, compile_vector_frames, BoneTimeline, Keyframes};

#[derive(Debug, Error)]
pub enum SkeletonError {
    #[error("malformed skeleton json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bone `{child}` references parent `{parent}` which is not declared before it")]
    UnknownParent { child: String, parent: String },

    #[error("bone `{0}` has no parent, but the root slot is already taken")]
    ExtraRoot(String),

    #[error("slot `{slot}` targets unknown bone `{bone}`")]
    UnknownBone { slot: String, bone: String },

    #[error("attachment `{attachment}` wants region `{region}` which is not in the atlas")]
    MissingRegion { attachment: String, region: String },

    #[error("mesh `{0}` has malformed vertex weights")]
    MalformedWeights(String),
}

/// How a bone picks up its parent's world transform.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Inherit {
    Normal,
    OnlyTranslation,
}

/// A bone-local pose. Rotation is stored in radians; the export carries
/// degrees.
#[derive(Copy, Clone, Debug)]
pub struct LocalTransform {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl From<&RawBone> for LocalTransform {
    fn from(bone: &RawBone) -> Self {
        Self {
            x: bone.x,
            y: bone.y,
            rotation: bone.rotation.to_radians(),
            scale_x: bone.scale_x,
            scale_y: bone.scale_y,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BoneData {
    pub name: String,
    pub parent: Option<usize>,
    pub length: f32,
    pub inherit: Inherit,
    pub setup: LocalTransform,
}

#[derive(Clone, Debug)]
pub struct SlotData {
    pub name: String,
    pub bone: usize,
    pub color: [f32; 4],
    /// Attachment visible in the setup pose, if any.
    pub attachment: Option<String>,
}

#[derive(Clone, Debug)]
pub enum Attachment {
    Region(RegionAttachment),
    Mesh(MeshAttachment),
}

#[derive(Clone, Debug)]
pub struct RegionAttachment {
    pub page: usize,
    pub region: AtlasRegion,
    pub x: f32,
    pub y: f32,
    /// Radians.
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub width: f32,
    pub height: f32,
    pub color: [f32; 4],
}

#[derive(Clone, Debug)]
pub struct MeshAttachment {
    pub page: usize,
    /// Page UVs per vertex, already mapped through the atlas region.
    pub uvs: Vec<(f32, f32)>,
    pub triangles: Vec<u16>,
    pub vertices: MeshVertices,
    pub color: [f32; 4],
}

#[derive(Clone, Debug)]
pub enum MeshVertices {
    /// One position per vertex, in the coordinate space of the slot's bone.
    Plain(Vec<(f32, f32)>),
    /// Influence lists per vertex; each influence stores the position in the
    /// space of the influencing bone.
    Weighted(Vec<Vec<VertexInfluence>>),
}

#[derive(Clone, Copy, Debug)]
pub struct VertexInfluence {
    pub bone: usize,
    pub x: f32,
    pub y: f32,
    pub weight: f32,
}

/// Everything parsed out of one skeleton export, resolved against its atlas
/// and ready to be instantiated as a runtime skeleton.
#[derive(Clone, Debug)]
pub struct SkeletonData {
    pub version: String,
    pub width: f32,
    pub height: f32,
    /// Parents always precede children.
    pub bones: Vec<BoneData>,
    /// Back to front draw order.
    pub slots: Vec<SlotData>,
    /// Keyed by slot index and attachment name, merged from the active skin.
    pub attachments: HashMap<(usize, String), Attachment>,
    pub animations: Vec<Animation>,
    bone_lookup: HashMap<String, usize>,
    animation_lookup: HashMap<String, usize>,
}

impl SkeletonData {
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bone_lookup.get(name).copied()
    }

    pub fn animation_index(&self, name: &str) -> Option<usize> {
        self.animation_lookup.get(name).copied()
    }

    pub fn animation(&self, name: &str) -> Option<&Animation> {
        self.animation_index(name).map(|id| &self.animations[id])
    }
}

/// Resolves attachment names against a parsed atlas while skeleton data is
/// being built.
pub struct AtlasAttachmentLoader<'a> {
    atlas: &'a Atlas,
}

impl<'a> AtlasAttachmentLoader<'a> {
    pub fn new(atlas: &'a Atlas) -> Self {
        Self { atlas }
    }

    fn require(
        &self,
        attachment: &str,
        path: Option<&str>,
    ) -> Result<(usize, AtlasRegion), SkeletonError> {
        let region_name = path.unwrap_or(attachment);
        self.atlas
            .find_region(region_name)
            .map(|(page, region)| (page, region.clone()))
            .ok_or_else(|| SkeletonError::MissingRegion {
                attachment: attachment.to_string(),
                region: region_name.to_string(),
            })
    }
}

pub struct SkeletonJson<'a> {
    loader: AtlasAttachmentLoader<'a>,
}

impl<'a> SkeletonJson<'a> {
    pub fn new(atlas: &'a Atlas) -> Self {
        Self { loader: AtlasAttachmentLoader::new(atlas) }
    }

    /// Builds skeleton data out of an exported `.json` document. Unsupported
    /// constructs degrade with a warning; structural problems are errors.
    pub fn read_skeleton_data(&self, document: &Value) -> Result<SkeletonData, SkeletonError> {
        let raw: RawSkeletonFile = serde_json::from_value(document.clone())?;
        self.build(raw)
    }

    fn build(&self, raw: RawSkeletonFile) -> Result<SkeletonData, SkeletonError> {
        let mut bone_lookup = HashMap::new();
        let mut bones = Vec::with_capacity(raw.bones.len());
        for (id, bone) in raw.bones.iter().enumerate() {
            // The lookup only holds earlier bones, so a forward parent
            // reference fails here as well.
            let parent = match &bone.parent {
                Some(parent_name) => {
                    Some(*bone_lookup.get(parent_name).ok_or_else(|| {
                        SkeletonError::UnknownParent {
                            child: bone.name.clone(),
                            parent: parent_name.clone(),
                        }
                    })?)
                }
                None if id == 0 => None,
                None => return Err(SkeletonError::ExtraRoot(bone.name.clone())),
            };
            let inherit = match bone.inherit {
                RawInherit::Normal => Inherit::Normal,
                RawInherit::OnlyTranslation => Inherit::OnlyTranslation,
                other => {
                    warn!(
                        "bone `{}`: inherit mode {:?} is not supported, treating as normal",
                        bone.name, other
                    );
                    Inherit::Normal
                }
            };
            if bone.shear_x != 0.0 || bone.shear_y != 0.0 {
                warn!("bone `{}`: shear is not supported and is ignored", bone.name);
            }
            bone_lookup.insert(bone.name.clone(), id);
            bones.push(BoneData {
                name: bone.name.clone(),
                parent,
                length: bone.length,
                inherit,
                setup: LocalTransform::from(bone),
            });
        }

        let mut slot_lookup = HashMap::new();
        let mut slots = Vec::with_capacity(raw.slots.len());
        for (id, slot) in raw.slots.iter().enumerate() {
            let bone = *bone_lookup.get(&slot.bone).ok_or_else(|| SkeletonError::UnknownBone {
                slot: slot.name.clone(),
                bone: slot.bone.clone(),
            })?;
            if let Some(blend) = &slot.blend {
                if blend != "normal" {
                    warn!("slot `{}`: blend mode `{}` is drawn as normal", slot.name, blend);
                }
            }
            slot_lookup.insert(slot.name.clone(), id);
            slots.push(SlotData {
                name: slot.name.clone(),
                bone,
                color: parse_hex_color(&slot.color),
                attachment: slot.attachment.clone(),
            });
        }

        let mut attachments = HashMap::new();
        let skin = raw
            .skins
            .iter()
            .find(|it| it.name == "default")
            .or_else(|| raw.skins.first());
        if let Some(skin) = skin {
            if raw.skins.len() > 1 {
                warn!("skeleton has {} skins, using `{}`", raw.skins.len(), skin.name);
            }
            for (slot_name, slot_attachments) in &skin.attachments {
                let slot_id = match slot_lookup.get(slot_name) {
                    Some(id) => *id,
                    None => {
                        warn!("skin `{}` references unknown slot `{}`", skin.name, slot_name);
                        continue;
                    }
                };
                for (attachment_name, attachment) in slot_attachments {
                    match attachment {
                        RawAttachment::Region(region) => {
                            let built = self.build_region(attachment_name, region)?;
                            attachments
                                .insert((slot_id, attachment_name.clone()), Attachment::Region(built));
                        }
                        RawAttachment::Mesh(mesh) => {
                            let built = self.build_mesh(attachment_name, mesh, bones.len())?;
                            attachments
                                .insert((slot_id, attachment_name.clone()), Attachment::Mesh(built));
                        }
                        RawAttachment::Unsupported(kind) => {
                            warn!(
                                "attachment `{}` has unsupported type `{}`, skipping",
                                attachment_name, kind
                            );
                        }
                    }
                }
            }
        }

        if !raw.ik.is_empty() || !raw.transform.is_empty() || !raw.path.is_empty() {
            warn!("ik, transform and path constraints are not supported and are ignored");
        }

        let mut names = raw.animations.keys().collect::<Vec<_>>();
        names.sort();
        let mut animations = Vec::with_capacity(names.len());
        for name in names {
            animations.push(compile_animation(name, &raw.animations[name], &bone_lookup));
        }
        let animation_lookup = animations
            .iter()
            .enumerate()
            .map(|(id, it)| (it.name.clone(), id))
            .collect();

        Ok(SkeletonData {
            version: raw.skeleton.version,
            width: raw.skeleton.width,
            height: raw.skeleton.height,
            bones,
            slots,
            attachments,
            animations,
            bone_lookup,
            animation_lookup,
        })
    }

    fn build_region(
        &self,
        name: &str,
        raw: &RawRegionAttachment,
    ) -> Result<RegionAttachment, SkeletonError> {
        let (page, region) = self.loader.require(name, raw.path.as_deref())?;
        let width = if raw.width > 0.0 { raw.width } else { region.orig_width };
        let height = if raw.height > 0.0 { raw.height } else { region.orig_height };
        Ok(RegionAttachment {
            page,
            x: raw.x,
            y: raw.y,
            rotation: raw.rotation.to_radians(),
            scale_x: raw.scale_x,
            scale_y: raw.scale_y,
            width,
            height,
            color: parse_hex_color(&raw.color),
            region,
        })
    }

    fn build_mesh(
        &self,
        name: &str,
        raw: &RawMeshAttachment,
        bone_count: usize,
    ) -> Result<MeshAttachment, SkeletonError> {
        let (page, region) = self.loader.require(name, raw.path.as_deref())?;
        let page_data = &self.loader.atlas.pages[page];
        let vertex_count = raw.uvs.len() / 2;
        let uvs = map_mesh_uvs(&raw.uvs, &region, page_data.width, page_data.height);
        let vertices = if raw.vertices.len() == raw.uvs.len() {
            MeshVertices::Plain(raw.vertices.chunks_exact(2).map(|it| (it[0], it[1])).collect())
        } else {
            MeshVertices::Weighted(parse_weights(name, &raw.vertices, vertex_count, bone_count)?)
        };
        Ok(MeshAttachment {
            page,
            uvs,
            triangles: raw.triangles.clone(),
            vertices,
            color: parse_hex_color(&raw.color),
        })
    }
}

/// Maps mesh UVs from attachment space into page space. Whitespace stripped
/// by the packer is restored through the orig size and offset, and a 90
/// degree region swaps the axes.
fn map_mesh_uvs(
    source: &[f32],
    region: &AtlasRegion,
    page_width: f32,
    page_height: f32,
) -> Vec<(f32, f32)> {
    let mut uvs = Vec::with_capacity(source.len() / 2);
    if region.degrees == 90 {
        let u = region.u - (region.orig_height - region.offset_y - region.height) / page_width;
        let v = region.v - (region.orig_width - region.offset_x - region.width) / page_height;
        let width = region.orig_height / page_width;
        let height = region.orig_width / page_height;
        for pair in source.chunks_exact(2) {
            uvs.push((u + pair[1] * width, v + (1.0 - pair[0]) * height));
        }
    } else {
        let u = region.u - region.offset_x / page_width;
        let v = region.v - (region.orig_height - region.offset_y - region.height) / page_height;
        let width = region.orig_width / page_width;
        let height = region.orig_height / page_height;
        for pair in source.chunks_exact(2) {
            uvs.push((u + pair[0] * width, v + pair[1] * height));
        }
    }
    uvs
}

// The run-length vertex format: per vertex an influence count, then
// (bone, x, y, weight) per influence.
fn parse_weights(
    mesh: &str,
    data: &[f32],
    vertex_count: usize,
    bone_count: usize,
) -> Result<Vec<Vec<VertexInfluence>>, SkeletonError> {
    let malformed = || SkeletonError::MalformedWeights(mesh.to_string());
    let mut vertices = Vec::with_capacity(vertex_count);
    let mut cursor = 0usize;
    for _ in 0..vertex_count {
        let influence_count = *data.get(cursor).ok_or_else(malformed)? as usize;
        cursor += 1;
        let mut influences = Vec::with_capacity(influence_count);
        for _ in 0..influence_count {
            let chunk = data.get(cursor..cursor + 4).ok_or_else(malformed)?;
            if chunk[0] < 0.0 || chunk[0] as usize >= bone_count {
                return Err(malformed());
            }
            influences.push(VertexInfluence {
                bone: chunk[0] as usize,
                x: chunk[1],
                y: chunk[2],
                weight: chunk[3],
            });
            cursor += 4;
        }
        vertices.push(influences);
    }
    if cursor != data.len() {
        return Err(malformed());
    }
    Ok(vertices)
}

fn compile_animation(
    name: &str,
    raw: &RawAnimation,
    bone_lookup: &HashMap<String, usize>,
) -> Animation {
    let mut timelines = Vec::new();
    for (bone_name, frames) in &raw.bones {
        let bone = match bone_lookup.get(bone_name) {
            Some(id) => *id,
            None => {
                warn!("animation `{}` keys unknown bone `{}`, skipping", name, bone_name);
                continue;
            }
        };
        if !frames.rotate.is_empty() {
            timelines.push(BoneTimeline {
                bone,
                keys: Keyframes::Rotate(compile_rotate_frames(&frames.rotate)),
            });
        }
        if !frames.translate.is_empty() {
            timelines.push(BoneTimeline {
                bone,
                keys: Keyframes::Translate(compile_vector_frames(&frames.translate, 0.0)),
            });
        }
        if !frames.scale.is_empty() {
            timelines.push(BoneTimeline {
                bone,
                keys: Keyframes::Scale(compile_vector_frames(&frames.scale, 1.0)),
            });
        }
        if !frames.shear.is_empty() {
            warn!("animation `{}`: shear timelines on `{}` are not supported", name, bone_name);
        }
    }
    timelines.sort_by_key(|it| it.bone);
    let mut duration = 0.0f32;
    for timeline in &timelines {
        let last = match &timeline.keys {
            Keyframes::Rotate(keys) => keys.last().map(|it| it.time),
            Keyframes::Translate(keys) | Keyframes::Scale(keys) => keys.last().map(|it| it.time),
        };
        if let Some(time) = last {
            duration = duration.max(time);
        }
    }
    if !value_is_empty(&raw.slots)
        || !value_is_empty(&raw.deform)
        || !value_is_empty(&raw.draw_order)
        || !value_is_empty(&raw.events)
    {
        warn!(
            "animation `{}`: slot, deform, draw order and event timelines are not supported",
            name
        );
    }
    Animation { name: name.to_string(), duration, timelines }
}

fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SkeletonData {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let document =
            serde_json::from_str(include_str!("../test_assets/model.json")).unwrap();
        SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap()
    }

    #[test]
    fn builds_the_fixture_skeleton() {
        let data = fixture();
        assert_eq!(data.width, 220.0);
        assert_eq!(data.height, 380.0);
        let names = data.bones.iter().map(|it| it.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["root", "body", "flont", "head"]);
        assert_eq!(data.bones[0].parent, None);
        assert_eq!(data.bones[2].parent, Some(1));
        assert_eq!(data.bone_index("flont"), Some(2));
        assert!((data.bones[3].setup.rotation - 5f32.to_radians()).abs() < 1e-6);
        assert_eq!(data.slots.len(), 2);
        assert_eq!(data.slots[1].bone, 3);
    }

    #[test]
    fn attachment_path_overrides_its_name() {
        let data = fixture();
        let attachment = data.attachments.get(&(1, "head-skin".to_string())).unwrap();
        match attachment {
            Attachment::Region(region) => {
                assert_eq!(region.region.name, "face");
                assert_eq!(region.region.degrees, 90);
                assert!((region.rotation - (-5f32).to_radians()).abs() < 1e-6);
                assert_eq!(region.width, 60.0);
            }
            other => panic!("expected a region attachment, got {:?}", other),
        }
    }

    #[test]
    fn animation_duration_spans_the_longest_timeline() {
        let data = fixture();
        let animation = data.animation("animation").unwrap();
        assert!((animation.duration - 1.3333).abs() < 1e-4);
        assert_eq!(animation.timelines.len(), 3);
        // sorted by bone index: body first, then both head timelines
        assert_eq!(animation.timelines[0].bone, 1);
        assert_eq!(animation.timelines[1].bone, 3);
    }

    #[test]
    fn forward_parent_references_are_rejected() {
        let atlas = Atlas::default();
        let document = serde_json::from_str(
            r#"{ "bones": [ { "name": "a", "parent": "b" }, { "name": "b" } ] }"#,
        )
        .unwrap();
        let err = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap_err();
        match err {
            SkeletonError::UnknownParent { child, parent } => {
                assert_eq!(child, "a");
                assert_eq!(parent, "b");
            }
            other => panic!("expected UnknownParent, got {:?}", other),
        }
    }

    #[test]
    fn a_second_parentless_bone_is_rejected() {
        let atlas = Atlas::default();
        let document = serde_json::from_str(
            r#"{ "bones": [ { "name": "root" }, { "name": "stray" } ] }"#,
        )
        .unwrap();
        let err = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap_err();
        match err {
            SkeletonError::ExtraRoot(name) => assert_eq!(name, "stray"),
            other => panic!("expected ExtraRoot, got {:?}", other),
        }
    }

    #[test]
    fn a_lone_named_skin_stands_in_for_default() {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let document = serde_json::from_str(
            r#"{
                "bones": [ { "name": "root" } ],
                "slots": [ { "name": "s", "bone": "root", "attachment": "body" } ],
                "skins": [ {
                    "name": "outfit",
                    "attachments": { "s": { "body": { "width": 120, "height": 180 } } }
                } ]
            }"#,
        )
        .unwrap();
        let data = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap();
        assert!(data.attachments.contains_key(&(0, "body".to_string())));
    }

    #[test]
    fn missing_atlas_regions_are_an_error() {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let document = serde_json::from_str(
            r#"{
                "bones": [ { "name": "root" } ],
                "slots": [ { "name": "s", "bone": "root" } ],
                "skins": [ { "name": "default", "attachments": { "s": { "ghost": {} } } } ]
            }"#,
        )
        .unwrap();
        let err = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap_err();
        match err {
            SkeletonError::MissingRegion { attachment, region } => {
                assert_eq!(attachment, "ghost");
                assert_eq!(region, "ghost");
            }
            other => panic!("expected MissingRegion, got {:?}", other),
        }
    }

    #[test]
    fn mesh_uvs_map_into_the_page() {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let (_, body) = atlas.find_region("body").unwrap();
        let uvs = map_mesh_uvs(&[0.0, 0.0, 1.0, 1.0], body, 256.0, 256.0);
        assert!((uvs[0].0 - 2.0 / 256.0).abs() < 1e-6);
        assert!((uvs[0].1 - 2.0 / 256.0).abs() < 1e-6);
        assert!((uvs[1].0 - 122.0 / 256.0).abs() < 1e-6);
        assert!((uvs[1].1 - 182.0 / 256.0).abs() < 1e-6);
    }

    #[test]
    fn rotated_mesh_uvs_swap_axes() {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let (_, face) = atlas.find_region("face").unwrap();
        let uvs = map_mesh_uvs(&[0.0, 0.0, 1.0, 1.0], face, 256.0, 256.0);
        assert!((uvs[0].0 - 126.0 / 256.0).abs() < 1e-6);
        assert!((uvs[0].1 - 62.0 / 256.0).abs() < 1e-6);
        assert!((uvs[1].0 - 206.0 / 256.0).abs() < 1e-6);
        assert!((uvs[1].1 - 2.0 / 256.0).abs() < 1e-6);
    }

    #[test]
    fn weighted_vertices_parse_their_influence_runs() {
        let parsed = parse_weights(
            "m",
            &[1.0, 0.0, 4.0, 5.0, 1.0, 2.0, 0.0, 1.0, 1.0, 0.5, 1.0, 2.0, 2.0, 0.5],
            2,
            2,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].len(), 1);
        assert_eq!(parsed[1].len(), 2);
        assert_eq!(parsed[1][1].bone, 1);
        assert_eq!(parsed[1][1].weight, 0.5);
    }

    #[test]
    fn weight_runs_with_out_of_range_bones_are_rejected() {
        let err = parse_weights("m", &[1.0, 9.0, 0.0, 0.0, 1.0], 1, 2).unwrap_err();
        match err {
            SkeletonError::MalformedWeights(mesh) => assert_eq!(mesh, "m"),
            other => panic!("expected MalformedWeights, got {:?}", other),
        }
    }

    #[test]
    fn truncated_weight_runs_are_rejected() {
        assert!(parse_weights("m", &[2.0, 0.0, 1.0, 1.0, 1.0], 1, 2).is_err());
        assert!(parse_weights("m", &[1.0, 0.0, 1.0, 1.0, 1.0, 7.0], 1, 2).is_err());
    }
}
