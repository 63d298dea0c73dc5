pub mod animation;
pub mod draw;

use crate::skeleton::{Inherit, LocalTransform, SkeletonData};
use indextree::Arena;
use std::collections::VecDeque;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

/// Index of a bone inside a skeleton instance.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BoneHandle(pub(crate) usize);

/// Mutable local state of one bone. Starts out as a copy of the setup pose.
#[derive(Clone, Debug)]
pub struct Bone {
    pub x: f32,
    pub y: f32,
    /// Radians.
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Bone {
    fn from_setup(setup: &LocalTransform) -> Self {
        Self {
            x: setup.x,
            y: setup.y,
            rotation: setup.rotation,
            scale_x: setup.scale_x,
            scale_y: setup.scale_y,
        }
    }

    fn local_matrix(&self) -> nalgebra::Matrix3<f32> {
        let translation: nalgebra::Matrix3<f32> =
            nalgebra::Translation2::new(self.x, self.y).into();
        let rotation: nalgebra::Matrix3<f32> = nalgebra::Rotation2::new(self.rotation).into();
        let scale = nalgebra::Matrix3::new(
            self.scale_x, 0.0, 0.0,
            0.0, self.scale_y, 0.0,
            0.0, 0.0, 1.0,
        );
        translation * rotation * scale
    }
}

#[derive(Copy, Clone, Debug)]
struct BoneNode {
    id: usize,
    is_dirty: bool,
}

/// A posable instance of [`SkeletonData`]. Local bone state is flat; world
/// matrices are cached and recomputed lazily through a dirty flag per bone.
pub struct Skeleton {
    data: Arc<SkeletonData>,
    bones: Vec<Bone>,
    bone_tree: Arena<BoneNode>,
    tree_handles: Vec<indextree::NodeId>,
    pose_matrices: Vec<nalgebra::Matrix3<f32>>,
    buffer_deque: VecDeque<indextree::NodeId>,
    x: f32,
    y: f32,
    scale_x: f32,
    scale_y: f32,
}

impl Skeleton {
    pub fn new(data: Arc<SkeletonData>) -> Self {
        let bones = data
            .bones
            .iter()
            .map(|it| Bone::from_setup(&it.setup))
            .collect::<Vec<_>>();
        let mut bone_tree = Arena::new();
        let mut tree_handles: Vec<indextree::NodeId> = Vec::with_capacity(bones.len());
        for (id, bone) in data.bones.iter().enumerate() {
            let handle = bone_tree.new_node(BoneNode { id, is_dirty: true });
            if let Some(parent) = bone.parent {
                tree_handles[parent].append(handle, &mut bone_tree);
            }
            tree_handles.push(handle);
        }
        let pose_matrices = vec![nalgebra::Matrix3::identity(); bones.len()];
        Self {
            data,
            bones,
            bone_tree,
            tree_handles,
            pose_matrices,
            buffer_deque: VecDeque::new(),
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    pub fn data(&self) -> &SkeletonData {
        &self.data
    }

    pub fn find_bone(&self, name: &str) -> Option<BoneHandle> {
        self.data.bone_index(name).map(BoneHandle)
    }

    pub fn bone(&self, handle: BoneHandle) -> &Bone {
        &self.bones[handle.0]
    }

    pub fn bones_mut(&mut self) -> BonesMut<'_> {
        BonesMut { skeleton: self }
    }

    /// Where the skeleton root lands in world space.
    pub fn set_position(&mut self, x: f32, y: f32) {
        if (self.x, self.y) != (x, y) {
            self.x = x;
            self.y = y;
            self.mark_all_dirty();
        }
    }

    pub fn set_scale(&mut self, scale_x: f32, scale_y: f32) {
        if (self.scale_x, self.scale_y) != (scale_x, scale_y) {
            self.scale_x = scale_x;
            self.scale_y = scale_y;
            self.mark_all_dirty();
        }
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    /// Recomputes cached world matrices for bones whose local state changed
    /// since the last pass. Parents precede children in `tree_handles`, so a
    /// single linear sweep settles the whole tree.
    pub fn update_world_transform(&mut self) {
        for &node_id in self.tree_handles.iter() {
            let node = self.bone_tree.get_mut(node_id).unwrap().get_mut();
            if node.is_dirty {
                node.is_dirty = false;
            } else {
                continue;
            }
            let bone_id = node.id;
            let bone_data = &self.data.bones[bone_id];
            let parent_transform = match bone_data.parent {
                None => self.root_matrix(),
                Some(parent) => match bone_data.inherit {
                    Inherit::Normal => self.pose_matrices[parent],
                    Inherit::OnlyTranslation => {
                        let parent_matrix = self.pose_matrices[parent];
                        let origin = parent_matrix * nalgebra::Point3::new(0.0, 0.0, 1.0);
                        nalgebra::Translation2::new(origin.x, origin.y).into()
                    }
                },
            };
            self.pose_matrices[bone_id] = parent_transform * self.bones[bone_id].local_matrix();
        }
    }

    pub fn world_position(&self, handle: BoneHandle) -> (f32, f32) {
        let origin = self.pose_matrices[handle.0] * nalgebra::Point3::new(0.0, 0.0, 1.0);
        (origin.x, origin.y)
    }

    pub(crate) fn pose_matrices(&self) -> &[nalgebra::Matrix3<f32>] {
        &self.pose_matrices
    }

    fn root_matrix(&self) -> nalgebra::Matrix3<f32> {
        let translation: nalgebra::Matrix3<f32> =
            nalgebra::Translation2::new(self.x, self.y).into();
        let scale = nalgebra::Matrix3::new(
            self.scale_x, 0.0, 0.0,
            0.0, self.scale_y, 0.0,
            0.0, 0.0, 1.0,
        );
        translation * scale
    }

    fn mark_all_dirty(&mut self) {
        if let Some(&root) = self.tree_handles.first() {
            for node_id in root.descendants(&self.bone_tree) {
                self.buffer_deque.push_back(node_id);
            }
            while let Some(node_id) = self.buffer_deque.pop_front() {
                let node = self.bone_tree.get_mut(node_id).unwrap().get_mut();
                node.is_dirty = true;
            }
        }
    }
}

/// Write access to bone state. Writing through the index operator marks the
/// bone's whole subtree dirty, so the next [`Skeleton::update_world_transform`]
/// picks the change up.
pub struct BonesMut<'a> {
    skeleton: &'a mut Skeleton,
}

impl<'a> Index<BoneHandle> for BonesMut<'a> {
    type Output = Bone;
    fn index(&self, handle: BoneHandle) -> &Self::Output {
        &self.skeleton.bones[handle.0]
    }
}

impl<'a> IndexMut<BoneHandle> for BonesMut<'a> {
    fn index_mut(&mut self, handle: BoneHandle) -> &mut Self::Output {
        let node_id = self.skeleton.tree_handles[handle.0];
        for node_id in node_id.descendants(&self.skeleton.bone_tree) {
            self.skeleton.buffer_deque.push_back(node_id);
        }
        while let Some(node_id) = self.skeleton.buffer_deque.pop_front() {
            let node = self.skeleton.bone_tree.get_mut(node_id).unwrap().get_mut();
            node.is_dirty = true;
        }
        &mut self.skeleton.bones[handle.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::Atlas;
    use crate::skeleton::SkeletonJson;
    use std::f32::consts::FRAC_PI_2;

    fn fixture_skeleton() -> Skeleton {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let document =
            serde_json::from_str(include_str!("../test_assets/model.json")).unwrap();
        let data = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap();
        Skeleton::new(Arc::new(data))
    }

    fn assert_close(actual: (f32, f32), expected: (f32, f32)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-4 && (actual.1 - expected.1).abs() < 1e-4,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn world_positions_compose_down_the_tree() {
        let mut skeleton = fixture_skeleton();
        skeleton.update_world_transform();
        let flont = skeleton.find_bone("flont").unwrap();
        // body sits at y 10 under the root, flont at (-15, 120) under body
        assert_close(skeleton.world_position(flont), (-15.0, 130.0));
    }

    #[test]
    fn root_transform_offsets_and_scales_everything() {
        let mut skeleton = fixture_skeleton();
        skeleton.set_position(7.0, -3.0);
        skeleton.set_scale(2.0, 2.0);
        skeleton.update_world_transform();
        let flont = skeleton.find_bone("flont").unwrap();
        assert_close(skeleton.world_position(flont), (-23.0, 257.0));
    }

    #[test]
    fn rotated_parent_carries_its_children_around() {
        let mut skeleton = fixture_skeleton();
        skeleton.update_world_transform();
        let body = skeleton.find_bone("body").unwrap();
        let flont = skeleton.find_bone("flont").unwrap();
        skeleton.bones_mut()[body].rotation = FRAC_PI_2;
        skeleton.update_world_transform();
        // (-15, 120) rotated a quarter turn is (-120, -15), plus body's y 10
        assert_close(skeleton.world_position(flont), (-120.0, -5.0));
    }

    #[test]
    fn writes_after_an_update_still_take_effect() {
        let mut skeleton = fixture_skeleton();
        skeleton.update_world_transform();
        let flont = skeleton.find_bone("flont").unwrap();
        let before = skeleton.world_position(flont);
        skeleton.bones_mut()[flont].x += 10.0;
        skeleton.update_world_transform();
        let after = skeleton.world_position(flont);
        assert_close(after, (before.0 + 10.0, before.1));
    }

    #[test]
    fn untouched_bones_keep_their_matrices() {
        let mut skeleton = fixture_skeleton();
        skeleton.update_world_transform();
        let head = skeleton.find_bone("head").unwrap();
        let before = skeleton.world_position(head);
        skeleton.update_world_transform();
        assert_close(skeleton.world_position(head), before);
    }

    #[test]
    fn only_translation_bones_ignore_parent_rotation() {
        let atlas = Atlas::default();
        let document = serde_json::from_str(
            r#"{
                "bones": [
                    { "name": "root" },
                    { "name": "spin", "parent": "root", "rotation": 90 },
                    { "name": "leaf", "parent": "spin", "x": 10, "transform": "onlyTranslation" }
                ]
            }"#,
        )
        .unwrap();
        let data = SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap();
        let mut skeleton = Skeleton::new(Arc::new(data));
        skeleton.update_world_transform();
        let leaf = skeleton.find_bone("leaf").unwrap();
        assert_close(skeleton.world_position(leaf), (10.0, 0.0));
    }

    #[test]
    fn unknown_bone_names_find_nothing() {
        let skeleton = fixture_skeleton();
        assert!(skeleton.find_bone("flont").is_some());
        assert!(skeleton.find_bone("front").is_none());
    }
}
