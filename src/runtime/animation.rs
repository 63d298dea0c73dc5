use super::{BoneHandle, Skeleton};
use crate::skeleton::timeline::{sample_scalar, sample_vector, Keyframes};
use crate::skeleton::SkeletonData;
use macroquad::logging::warn;
use std::sync::Arc;

/// Playback settings shared by every state built from the same skeleton
/// data.
pub struct AnimationStateData {
    data: Arc<SkeletonData>,
    /// Crossfade duration in seconds when one animation replaces another on
    /// a track. Not consumed yet; kept so callers can configure it up front.
    pub default_mix: f32,
}

impl AnimationStateData {
    pub fn new(data: Arc<SkeletonData>) -> Self {
        Self { data, default_mix: 0.0 }
    }

    pub fn skeleton_data(&self) -> &Arc<SkeletonData> {
        &self.data
    }
}

struct Track {
    animation: usize,
    time: f32,
    looping: bool,
}

/// Drives animations over time and poses skeletons from them. Time is in
/// seconds and advances only through [`AnimationState::update`].
pub struct AnimationState {
    data: Arc<SkeletonData>,
    tracks: Vec<Option<Track>>,
}

impl AnimationState {
    pub fn new(state_data: &AnimationStateData) -> Self {
        Self { data: state_data.data.clone(), tracks: Vec::new() }
    }

    /// Starts an animation from its beginning on the given track. Returns
    /// false and leaves the track untouched when no animation with that name
    /// exists.
    pub fn set_animation(&mut self, track: usize, name: &str, looping: bool) -> bool {
        let animation = match self.data.animation_index(name) {
            Some(id) => id,
            None => {
                warn!("no animation named `{}`", name);
                return false;
            }
        };
        if self.tracks.len() <= track {
            self.tracks.resize_with(track + 1, || None);
        }
        self.tracks[track] = Some(Track { animation, time: 0.0, looping });
        true
    }

    pub fn update(&mut self, delta: f32) {
        for track in self.tracks.iter_mut().flatten() {
            track.time += delta;
        }
    }

    /// Poses the skeleton at every track's current time. Keyed values land
    /// on top of the setup pose; bones no timeline touches keep whatever
    /// local state they already carry.
    pub fn apply(&self, skeleton: &mut Skeleton) {
        let data = self.data.clone();
        for track in self.tracks.iter().flatten() {
            let animation = &data.animations[track.animation];
            let time = if track.looping && animation.duration > 0.0 {
                track.time % animation.duration
            } else {
                track.time
            };
            let mut bones = skeleton.bones_mut();
            for timeline in &animation.timelines {
                let handle = BoneHandle(timeline.bone);
                let setup = data.bones[timeline.bone].setup;
                match &timeline.keys {
                    Keyframes::Rotate(keys) => {
                        bones[handle].rotation = setup.rotation + sample_scalar(keys, time);
                    }
                    Keyframes::Translate(keys) => {
                        let (x, y) = sample_vector(keys, time);
                        let bone = &mut bones[handle];
                        bone.x = setup.x + x;
                        bone.y = setup.y + y;
                    }
                    Keyframes::Scale(keys) => {
                        let (x, y) = sample_vector(keys, time);
                        let bone = &mut bones[handle];
                        bone.scale_x = setup.scale_x * x;
                        bone.scale_y = setup.scale_y * y;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::Atlas;
    use crate::skeleton::SkeletonJson;

    fn rig() -> (Skeleton, AnimationState) {
        let atlas = Atlas::parse(include_str!("../test_assets/model.atlas")).unwrap();
        let document =
            serde_json::from_str(include_str!("../test_assets/model.json")).unwrap();
        let data =
            Arc::new(SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap());
        let skeleton = Skeleton::new(data.clone());
        let state = AnimationState::new(&AnimationStateData::new(data));
        (skeleton, state)
    }

    #[test]
    fn unknown_animation_names_are_refused() {
        let (mut skeleton, mut state) = rig();
        assert!(!state.set_animation(0, "walk", true));
        // applying the empty state leaves the pose alone
        let body = skeleton.find_bone("body").unwrap();
        let before = skeleton.bone(body).rotation;
        state.apply(&mut skeleton);
        assert_eq!(skeleton.bone(body).rotation, before);
    }

    #[test]
    fn time_zero_applies_the_first_keys() {
        let (mut skeleton, mut state) = rig();
        assert!(state.set_animation(0, "animation", true));
        state.apply(&mut skeleton);
        let body = skeleton.find_bone("body").unwrap();
        let head = skeleton.find_bone("head").unwrap();
        assert!((skeleton.bone(body).rotation - (-4f32).to_radians()).abs() < 1e-5);
        assert!((skeleton.bone(head).y - 150.0).abs() < 1e-4);
        assert!((skeleton.bone(head).scale_x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn keyed_values_land_on_top_of_the_setup_pose() {
        let (mut skeleton, mut state) = rig();
        state.set_animation(0, "animation", true);
        state.update(0.6667);
        state.apply(&mut skeleton);
        let body = skeleton.find_bone("body").unwrap();
        let head = skeleton.find_bone("head").unwrap();
        assert!((skeleton.bone(body).rotation - 4f32.to_radians()).abs() < 1e-4);
        // head sits at y 150 in setup, the key shifts it by -8
        assert!((skeleton.bone(head).y - 142.0).abs() < 1e-3);
        assert!((skeleton.bone(head).scale_x - 1.05).abs() < 1e-5);
    }

    #[test]
    fn looping_tracks_wrap_back_to_the_start() {
        let (mut skeleton, mut state) = rig();
        state.set_animation(0, "animation", true);
        state.update(2.0 * 1.3333);
        state.apply(&mut skeleton);
        let body = skeleton.find_bone("body").unwrap();
        assert!((skeleton.bone(body).rotation - (-4f32).to_radians()).abs() < 1e-3);
    }

    #[test]
    fn non_looping_tracks_hold_their_last_keys() {
        let (mut skeleton, mut state) = rig();
        state.set_animation(0, "animation", false);
        state.update(10.0);
        state.apply(&mut skeleton);
        let head = skeleton.find_bone("head").unwrap();
        assert!((skeleton.bone(head).y - 150.0).abs() < 1e-4);
        assert!((skeleton.bone(head).scale_x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn bones_without_timelines_are_never_written() {
        let (mut skeleton, mut state) = rig();
        state.set_animation(0, "animation", true);
        let flont = skeleton.find_bone("flont").unwrap();
        skeleton.bones_mut()[flont].x = 123.0;
        skeleton.bones_mut()[flont].y = -55.0;
        state.update(0.31);
        state.apply(&mut skeleton);
        assert_eq!(skeleton.bone(flont).x, 123.0);
        assert_eq!(skeleton.bone(flont).y, -55.0);
    }

    #[test]
    fn scale_keys_multiply_the_setup_scale() {
        let atlas = Atlas::default();
        let document = serde_json::from_str(
            r#"{
                "bones": [ { "name": "root" }, { "name": "b", "parent": "root", "scaleX": 2 } ],
                "animations": {
                    "grow": {
                        "bones": {
                            "b": { "scale": [ { "x": 1.5, "y": 1 } ] }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let data =
            Arc::new(SkeletonJson::new(&atlas).read_skeleton_data(&document).unwrap());
        let mut skeleton = Skeleton::new(data.clone());
        let mut state = AnimationState::new(&AnimationStateData::new(data));
        state.set_animation(0, "grow", false);
        state.apply(&mut skeleton);
        let b = skeleton.find_bone("b").unwrap();
        assert!((skeleton.bone(b).scale_x - 3.0).abs() < 1e-5);
        assert!((skeleton.bone(b).scale_y - 1.0).abs() < 1e-5);
    }
}
