use super::Skeleton;
use crate::assets::TextureAtlas;
use crate::atlas::AtlasRegion;
use crate::skeleton::{
    Attachment, MeshVertices, RegionAttachment, SkeletonData, VertexInfluence,
};
use macroquad::logging::warn;
use macroquad::prelude::*;

const COLORS: &[Color] = &[
    GOLD,
    ORANGE,
    PINK,
    RED,
    MAROON,
    GREEN,
    LIME,
    DARKGREEN,
    SKYBLUE,
    BLUE,
    DARKBLUE,
    PURPLE,
    VIOLET,
    DARKPURPLE,
    BEIGE,
    MAGENTA,
];

/// Feeds triangle geometry straight into the active camera pass through the
/// internal gl context, reusing its buffers between draws.
pub struct BufferedDrawBatcher {
    vertex_buffer: Vec<Vertex>,
    index_buffer: Vec<u16>,
}

impl BufferedDrawBatcher {
    pub fn new() -> Self {
        Self { vertex_buffer: Vec::new(), index_buffer: Vec::new() }
    }

    fn flush_triangles(
        &mut self,
        vertices: impl Iterator<Item = Vertex>,
        indices: impl Iterator<Item = u16>,
        texture: Option<Texture2D>,
    ) {
        self.vertex_buffer.clear();
        self.index_buffer.clear();
        self.vertex_buffer.extend(vertices);
        self.index_buffer.extend(indices);

        let quad_gl = unsafe {
            let InternalGlContext { quad_gl, .. } = get_internal_gl();
            quad_gl
        };

        quad_gl.texture(texture);
        quad_gl.draw_mode(DrawMode::Triangles);
        quad_gl.geometry(&self.vertex_buffer, &self.index_buffer);
    }
}

trait Drawable {
    fn draw(&self, batcher: &mut BufferedDrawBatcher, pose_matrices: &[nalgebra::Matrix3<f32>]);
}

// Corner order BL, UL, UR, BR for both the offsets and the UVs.
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

struct RegionDrawable {
    texture: Texture2D,
    bone: usize,
    corners: [nalgebra::Point3<f32>; 4],
    uvs: [(f32, f32); 4],
    color: Color,
}

impl RegionDrawable {
    fn new(texture: Texture2D, bone: usize, attachment: &RegionAttachment, slot_color: [f32; 4]) -> Self {
        Self {
            texture,
            bone,
            corners: region_local_corners(attachment),
            uvs: region_uv_corners(&attachment.region),
            color: combine_colors(slot_color, attachment.color),
        }
    }
}

impl Drawable for RegionDrawable {
    fn draw(&self, batcher: &mut BufferedDrawBatcher, pose_matrices: &[nalgebra::Matrix3<f32>]) {
        let matrix = pose_matrices[self.bone];
        let vertices = self.corners.iter().zip(self.uvs.iter()).map(|(&corner, &(u, v))| {
            let world = matrix * corner;
            Vertex::new(world.x, world.y, 0.0, u, v, self.color)
        });
        batcher.flush_triangles(vertices, QUAD_INDICES.iter().copied(), Some(self.texture));
    }
}

struct MeshDrawable {
    texture: Texture2D,
    bone: usize,
    uvs: Vec<(f32, f32)>,
    triangles: Vec<u16>,
    vertices: MeshVertices,
    color: Color,
}

impl Drawable for MeshDrawable {
    fn draw(&self, batcher: &mut BufferedDrawBatcher, pose_matrices: &[nalgebra::Matrix3<f32>]) {
        match &self.vertices {
            MeshVertices::Plain(positions) => {
                let matrix = pose_matrices[self.bone];
                let vertices = positions.iter().zip(self.uvs.iter()).map(|(&(x, y), &(u, v))| {
                    let world = matrix * nalgebra::Point3::new(x, y, 1.0);
                    Vertex::new(world.x, world.y, 0.0, u, v, self.color)
                });
                batcher.flush_triangles(
                    vertices,
                    self.triangles.iter().copied(),
                    Some(self.texture),
                );
            }
            MeshVertices::Weighted(influences) => {
                let vertices = influences.iter().zip(self.uvs.iter()).map(|(vertex, &(u, v))| {
                    let (x, y) = blend_influences(vertex, pose_matrices);
                    Vertex::new(x, y, 0.0, u, v, self.color)
                });
                batcher.flush_triangles(
                    vertices,
                    self.triangles.iter().copied(),
                    Some(self.texture),
                );
            }
        }
    }
}

fn blend_influences(
    influences: &[VertexInfluence],
    pose_matrices: &[nalgebra::Matrix3<f32>],
) -> (f32, f32) {
    let mut blended = (0.0, 0.0);
    for influence in influences.iter().filter(|it| it.weight != 0.0) {
        let world = pose_matrices[influence.bone]
            * nalgebra::Point3::new(influence.x, influence.y, 1.0);
        blended.0 += influence.weight * world.x;
        blended.1 += influence.weight * world.y;
    }
    blended
}

/// Slot attachments of one skeleton flattened into drawables, back to front.
/// Built once per skeleton instance; slot order never changes afterwards.
pub struct DrawList {
    drawables: Vec<Box<dyn Drawable>>,
}

impl DrawList {
    pub fn build(data: &SkeletonData, atlas: &TextureAtlas) -> Self {
        let mut drawables: Vec<Box<dyn Drawable>> = Vec::new();
        for (slot_id, slot) in data.slots.iter().enumerate() {
            let name = match &slot.attachment {
                Some(name) => name,
                None => continue,
            };
            let attachment = match data.attachments.get(&(slot_id, name.clone())) {
                Some(attachment) => attachment,
                None => {
                    warn!("slot `{}` names attachment `{}` which the skin lacks", slot.name, name);
                    continue;
                }
            };
            match attachment {
                Attachment::Region(region) => drawables.push(Box::new(RegionDrawable::new(
                    atlas.pages[region.page],
                    slot.bone,
                    region,
                    slot.color,
                ))),
                Attachment::Mesh(mesh) => drawables.push(Box::new(MeshDrawable {
                    texture: atlas.pages[mesh.page],
                    bone: slot.bone,
                    uvs: mesh.uvs.clone(),
                    triangles: mesh.triangles.clone(),
                    vertices: mesh.vertices.clone(),
                    color: combine_colors(slot.color, mesh.color),
                })),
            }
        }
        Self { drawables }
    }

    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }
}

/// How the world viewport reacts when the window changes size.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ResizeMode {
    /// One world unit per pixel; a bigger window shows more world.
    Expand,
    /// A fixed world viewport, scaled uniformly into the window.
    Fit { width: f32, height: f32 },
}

/// A y-up camera centered on the world origin.
fn viewport_camera(mode: ResizeMode, screen_width: f32, screen_height: f32) -> Camera2D {
    let (view_width, view_height) = match mode {
        ResizeMode::Expand => (screen_width, screen_height),
        ResizeMode::Fit { width, height } => {
            let scale = (screen_width / width).min(screen_height / height);
            (screen_width / scale, screen_height / scale)
        }
    };
    Camera2D {
        target: vec2(0.0, 0.0),
        zoom: vec2(2.0 / view_width, 2.0 / view_height),
        ..Default::default()
    }
}

/// Owns the camera and the draw batcher for skeleton rendering. A frame is
/// bracketed by [`SkeletonRenderer::begin`] and [`SkeletonRenderer::end`];
/// skeleton draws only make sense in between.
pub struct SkeletonRenderer {
    batcher: BufferedDrawBatcher,
    camera: Camera2D,
    in_frame: bool,
}

impl SkeletonRenderer {
    pub fn new() -> Self {
        Self {
            batcher: BufferedDrawBatcher::new(),
            camera: Camera2D::default(),
            in_frame: false,
        }
    }

    /// Rebuilds the camera against the current window size.
    pub fn resize(&mut self, mode: ResizeMode) {
        self.camera = viewport_camera(mode, screen_width(), screen_height());
    }

    pub fn begin(&mut self) {
        debug_assert!(!self.in_frame, "begin() called twice without end()");
        self.in_frame = true;
        set_camera(&self.camera);
    }

    pub fn draw_skeleton(&mut self, skeleton: &Skeleton, draw_list: &DrawList) {
        debug_assert!(self.in_frame, "draw_skeleton() outside begin()/end()");
        for drawable in draw_list.drawables.iter() {
            drawable.draw(&mut self.batcher, skeleton.pose_matrices());
        }
    }

    /// Draws every bone as a colored line from its origin towards its tip.
    pub fn draw_skeleton_debug(&self, skeleton: &Skeleton) {
        debug_assert!(self.in_frame, "draw_skeleton_debug() outside begin()/end()");
        let pose_matrices = skeleton.pose_matrices();
        for (bone_id, bone_data) in skeleton.data().bones.iter().enumerate() {
            let color = COLORS[bone_id % COLORS.len()];
            let matrix = pose_matrices[bone_id];
            let origin = matrix * nalgebra::Point3::new(0.0, 0.0, 1.0);
            let tip = matrix * nalgebra::Point3::new(bone_data.length.max(10.0), 0.0, 1.0);
            draw_line(origin.x, origin.y, tip.x, tip.y, 2.0, color);
        }
    }

    pub fn end(&mut self) {
        debug_assert!(self.in_frame, "end() without begin()");
        self.in_frame = false;
        set_default_camera();
    }
}

fn region_uv_corners(region: &AtlasRegion) -> [(f32, f32); 4] {
    if region.degrees == 90 {
        [
            (region.u2, region.v2),
            (region.u, region.v2),
            (region.u, region.v),
            (region.u2, region.v),
        ]
    } else {
        [
            (region.u, region.v2),
            (region.u, region.v),
            (region.u2, region.v),
            (region.u2, region.v2),
        ]
    }
}

// The attachment's own translation, rotation and scale are baked into the
// corners once; only the bone matrix is applied per frame. Whitespace the
// packer stripped comes back through the orig size and offset.
fn region_local_corners(attachment: &RegionAttachment) -> [nalgebra::Point3<f32>; 4] {
    let region = &attachment.region;
    let region_scale_x = attachment.width / region.orig_width * attachment.scale_x;
    let region_scale_y = attachment.height / region.orig_height * attachment.scale_y;
    let local_x = -attachment.width / 2.0 * attachment.scale_x + region.offset_x * region_scale_x;
    let local_y = -attachment.height / 2.0 * attachment.scale_y + region.offset_y * region_scale_y;
    let local_x2 = local_x + region.width * region_scale_x;
    let local_y2 = local_y + region.height * region_scale_y;
    let (sin, cos) = attachment.rotation.sin_cos();
    let local_x_cos = local_x * cos + attachment.x;
    let local_x_sin = local_x * sin;
    let local_y_cos = local_y * cos + attachment.y;
    let local_y_sin = local_y * sin;
    let local_x2_cos = local_x2 * cos + attachment.x;
    let local_x2_sin = local_x2 * sin;
    let local_y2_cos = local_y2 * cos + attachment.y;
    let local_y2_sin = local_y2 * sin;
    [
        nalgebra::Point3::new(local_x_cos - local_y_sin, local_y_cos + local_x_sin, 1.0),
        nalgebra::Point3::new(local_x_cos - local_y2_sin, local_y2_cos + local_x_sin, 1.0),
        nalgebra::Point3::new(local_x2_cos - local_y2_sin, local_y2_cos + local_x2_sin, 1.0),
        nalgebra::Point3::new(local_x2_cos - local_y_sin, local_y_cos + local_x2_sin, 1.0),
    ]
}

fn combine_colors(slot: [f32; 4], attachment: [f32; 4]) -> Color {
    Color::new(
        slot[0] * attachment[0],
        slot[1] * attachment[1],
        slot[2] * attachment[2],
        slot[3] * attachment[3],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::Atlas;
    use crate::skeleton::SkeletonJson;

    fn fixture_data() -> (Atlas, SkeletonData) {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let document =
            serde_json::from_str(include_str!("../test_assets/model.json")).unwrap();
        let data = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap();
        (atlas, data)
    }

    #[test]
    fn expand_keeps_one_world_unit_per_pixel() {
        let camera = viewport_camera(ResizeMode::Expand, 800.0, 600.0);
        assert!((camera.zoom.x - 2.0 / 800.0).abs() < 1e-9);
        assert!((camera.zoom.y - 2.0 / 600.0).abs() < 1e-9);
        // positive y zoom keeps the world y axis pointing up
        assert!(camera.zoom.y > 0.0);
    }

    #[test]
    fn fit_letterboxes_the_requested_viewport() {
        let camera = viewport_camera(ResizeMode::Fit { width: 400.0, height: 400.0 }, 800.0, 600.0);
        // the window is wider than the viewport, so height is the tight axis
        assert!((camera.zoom.y - 2.0 / 400.0).abs() < 1e-9);
        let visible_width = 2.0 / camera.zoom.x;
        assert!((visible_width - 800.0 / 1.5).abs() < 1e-3);

        // portrait window: width becomes the tight axis
        let camera = viewport_camera(ResizeMode::Fit { width: 400.0, height: 400.0 }, 300.0, 900.0);
        assert!((camera.zoom.x - 2.0 / 400.0).abs() < 1e-9);
        let visible_height = 2.0 / camera.zoom.y;
        assert!((visible_height - 900.0 / 0.75).abs() < 1e-3);
    }

    #[test]
    fn unrotated_uv_corners_walk_the_region() {
        let (atlas, _) = fixture_data();
        let (_, body) = atlas.find_region("body").unwrap();
        let uvs = region_uv_corners(body);
        // bottom left carries v2, the texture-space bottom
        assert_eq!(uvs[0], (body.u, body.v2));
        assert_eq!(uvs[2], (body.u2, body.v));
    }

    #[test]
    fn rotated_uv_corners_turn_a_quarter() {
        let (atlas, _) = fixture_data();
        let (_, face) = atlas.find_region("face").unwrap();
        let uvs = region_uv_corners(face);
        assert_eq!(uvs[0], (face.u2, face.v2));
        assert_eq!(uvs[1], (face.u, face.v2));
        assert_eq!(uvs[2], (face.u, face.v));
        assert_eq!(uvs[3], (face.u2, face.v));
    }

    #[test]
    fn region_corners_center_on_the_attachment_origin() {
        let (_, data) = fixture_data();
        let attachment = match data.attachments.get(&(0, "body".to_string())).unwrap() {
            Attachment::Region(region) => region.clone(),
            other => panic!("expected a region, got {:?}", other),
        };
        let corners = region_local_corners(&attachment);
        // 120x180, no stripped whitespace, offset up by the attachment y
        assert!((corners[0].x - (-60.0)).abs() < 1e-4);
        assert!((corners[0].y - (90.0 - 90.0)).abs() < 1e-4);
        assert!((corners[2].x - 60.0).abs() < 1e-4);
        assert!((corners[2].y - (90.0 + 90.0)).abs() < 1e-4);
    }

    #[test]
    fn region_corners_honor_the_attachment_rotation() {
        let (atlas, _) = fixture_data();
        let (_, body) = atlas.find_region("body").unwrap();
        let attachment = RegionAttachment {
            page: 0,
            region: body.clone(),
            x: 5.0,
            y: 7.0,
            rotation: std::f32::consts::FRAC_PI_2,
            scale_x: 1.0,
            scale_y: 1.0,
            width: 120.0,
            height: 180.0,
            color: [1.0; 4],
        };
        let corners = region_local_corners(&attachment);
        // bottom left (-60, -90) turns into (90, -60) around the origin
        assert!((corners[0].x - (5.0 + 90.0)).abs() < 1e-3);
        assert!((corners[0].y - (7.0 - 60.0)).abs() < 1e-3);
    }

    #[test]
    fn draw_list_follows_slot_order() {
        let (atlas, data) = fixture_data();
        let textures = TextureAtlas {
            atlas,
            pages: vec![Texture2D::empty()],
        };
        let list = DrawList::build(&data, &textures);
        assert_eq!(list.len(), 2);
        assert!(!list.is_empty());
    }

    #[test]
    fn slots_without_attachments_draw_nothing() {
        let atlas = Atlas::default();
        let document = serde_json::from_str(
            r#"{
                "bones": [ { "name": "root" } ],
                "slots": [ { "name": "bare", "bone": "root" } ]
            }"#,
        )
        .unwrap();
        let data = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap();
        let textures = TextureAtlas { atlas: Atlas::default(), pages: Vec::new() };
        let list = DrawList::build(&data, &textures);
        assert!(list.is_empty());
    }
}
