use crate::assets::TextureAtlas;
use crate::canvas::{CanvasApp, SkeletonCanvas};
use crate::config::ViewerConfig;
use crate::runtime::animation::{AnimationState, AnimationStateData};
use crate::runtime::draw::{DrawList, ResizeMode};
use crate::runtime::{BoneHandle, Skeleton};
use crate::skeleton::{SkeletonData, SkeletonJson};
use macroquad::logging::{error, warn};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

pub const ATLAS_NAME: &str = "model.atlas";
pub const SKELETON_NAME: &str = "model.json";
/// The shipped export misspells the bone; it must be looked up verbatim.
const FRONT_BONE_NAME: &str = "flont";
const ANIMATION_NAME: &str = "animation";
const SKELETON_SCALE: f32 = 1.5;

/// Maps a 0..100 page slider onto a world axis interval.
#[derive(Copy, Clone, Debug)]
pub struct AxisRange {
    pub min: f32,
    pub max: f32,
}

impl AxisRange {
    /// Linear and unclamped: 0 lands on `min`, 100 on `max`, values outside
    /// the slider range extrapolate.
    pub fn position(&self, value: i32) -> f32 {
        self.min + (self.max - self.min) * (value as f32 / 100.0)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FrontBoneRange {
    pub x: AxisRange,
    pub y: AxisRange,
}

impl Default for FrontBoneRange {
    fn default() -> Self {
        Self {
            x: AxisRange { min: -200.0, max: -30.0 },
            y: AxisRange { min: -150.0, max: -20.0 },
        }
    }
}

/// Read handle onto a slider owned by the control page. The widget stores a
/// float; consumers read whole steps with the fraction truncated toward
/// zero.
#[derive(Clone)]
pub struct SliderInput(Rc<Cell<f32>>);

impl SliderInput {
    pub fn new(initial: f32) -> Self {
        Self(Rc::new(Cell::new(initial)))
    }

    pub fn set(&self, value: f32) {
        self.0.set(value);
    }

    pub fn value(&self) -> i32 {
        self.0.get() as i32
    }
}

/// Everything that exists only once the skeleton assets are in.
struct Rig {
    skeleton: Skeleton,
    state: AnimationState,
    draw_list: DrawList,
    front_bone: Option<BoneHandle>,
}

impl Rig {
    fn assemble(data: Arc<SkeletonData>, atlas: &TextureAtlas) -> Self {
        let mut skeleton = Skeleton::new(data.clone());
        skeleton.set_scale(SKELETON_SCALE, SKELETON_SCALE);
        skeleton.set_position(0.0, -data.height.floor() / 2.0);
        let front_bone = skeleton.find_bone(FRONT_BONE_NAME);
        if front_bone.is_none() {
            warn!("bone `{}` is missing; the sliders will be inert", FRONT_BONE_NAME);
        }
        let mut state = AnimationState::new(&AnimationStateData::new(data.clone()));
        state.set_animation(0, ANIMATION_NAME, true);
        let draw_list = DrawList::build(&data, atlas);
        Self { skeleton, state, draw_list, front_bone }
    }
}

/// The slider puppet: one skeleton with a looping idle animation, and a
/// pair of page sliders steering its front bone.
pub struct PuppetApp {
    horizontal: SliderInput,
    vertical: SliderInput,
    range: FrontBoneRange,
    debug_bones: bool,
    rig: Option<Rig>,
}

impl PuppetApp {
    pub fn new(horizontal: SliderInput, vertical: SliderInput, config: &ViewerConfig) -> Self {
        Self {
            horizontal,
            vertical,
            range: FrontBoneRange::default(),
            debug_bones: config.debug_bones,
            rig: None,
        }
    }
}

impl CanvasApp for PuppetApp {
    fn load_assets(&mut self, canvas: &mut SkeletonCanvas) {
        canvas.asset_manager.load_texture_atlas(ATLAS_NAME);
        canvas.asset_manager.load_json(SKELETON_NAME);
    }

    fn initialize(&mut self, canvas: &mut SkeletonCanvas) {
        let atlas = match canvas.asset_manager.atlas(ATLAS_NAME) {
            Some(it) => it,
            None => {
                error!("texture atlas `{}` never loaded", ATLAS_NAME);
                return;
            }
        };
        let document = match canvas.asset_manager.json(SKELETON_NAME) {
            Some(it) => it,
            None => {
                error!("skeleton `{}` never loaded", SKELETON_NAME);
                return;
            }
        };
        let data = match SkeletonJson::new(&atlas.atlas).read_skeleton_data(document) {
            Ok(it) => Arc::new(it),
            Err(rejection) => {
                error!("skeleton `{}` rejected: {}", SKELETON_NAME, rejection);
                return;
            }
        };
        self.rig = Some(Rig::assemble(data, atlas));
    }

    fn update(&mut self, _canvas: &mut SkeletonCanvas, delta: f32) {
        let rig = match self.rig.as_mut() {
            Some(it) => it,
            None => return,
        };
        if let Some(front_bone) = rig.front_bone {
            let mut bones = rig.skeleton.bones_mut();
            bones[front_bone].x = self.range.x.position(self.horizontal.value());
            bones[front_bone].y = self.range.y.position(self.vertical.value());
        }
        rig.state.update(delta);
        rig.state.apply(&mut rig.skeleton);
        rig.skeleton.update_world_transform();
    }

    fn render(&mut self, canvas: &mut SkeletonCanvas) {
        let rig = match self.rig.as_ref() {
            Some(it) => it,
            None => return,
        };
        canvas.renderer.resize(ResizeMode::Expand);
        canvas.clear(0.2, 0.2, 0.2, 1.0);
        canvas.renderer.begin();
        canvas.renderer.draw_skeleton(&rig.skeleton, &rig.draw_list);
        if self.debug_bones {
            canvas.renderer.draw_skeleton_debug(&rig.skeleton);
        }
        canvas.renderer.end();
    }

    fn error(&mut self, canvas: &mut SkeletonCanvas) {
        for failure in canvas.asset_manager.errors() {
            error!("asset failure: {}", failure);
        }
    }
}
