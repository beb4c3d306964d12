use crate::remap::{RemapVisitor, Transient};
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4};
use prism_common::{Size, StringHandle};
use prism_resource::{TextureHandle, TextureKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable index of an object in its [`RenderGraph`](crate::RenderGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Type discriminant of a graph object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphObjectType {
    Scene,
    Layer,
    Node,
    Light,
    Camera,
    Model,
    DefaultMaterial,
    CustomMaterial,
    ReferencedMaterial,
    Image,
    Text,
    Effect,
    Path,
    PathSubPath,
    Lightmaps,
}

impl GraphObjectType {
    /// Types that carry a [`NodeBase`] and live in the child hierarchy.
    pub fn is_node(self) -> bool {
        matches!(
            self,
            Self::Layer
                | Self::Node
                | Self::Light
                | Self::Camera
                | Self::Model
                | Self::Text
                | Self::Path
        )
    }

    pub fn is_material(self) -> bool {
        matches!(
            self,
            Self::DefaultMaterial | Self::CustomMaterial | Self::ReferencedMaterial
        )
    }
}

/// Derived world-space state written by the renderer's prepare pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalState {
    pub world: Mat4,
    pub opacity: f32,
    pub active: bool,
    pub valid: bool,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            opacity: 1.0,
            active: true,
            valid: false,
        }
    }
}

impl Transient for GlobalState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Spatial properties and hierarchy links shared by every node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeBase {
    pub position: Vec3,
    /// Euler angles in radians, applied X then Y then Z.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub pivot: Vec3,
    pub opacity: f32,
    pub active: bool,
    pub transform_dirty: bool,
    pub parent: Option<ObjectId>,
    pub first_child: Option<ObjectId>,
    pub next_sibling: Option<ObjectId>,
    #[serde(skip)]
    pub global: GlobalState,
}

impl Default for NodeBase {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            pivot: Vec3::ZERO,
            opacity: 1.0,
            active: true,
            transform_dirty: true,
            parent: None,
            first_child: None,
            next_sibling: None,
            global: GlobalState::default(),
        }
    }
}

impl NodeBase {
    /// Local transform: translate, rotate about the pivot, scale.
    pub fn local_transform(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_translation(self.position)
            * Mat4::from_quat(rotation)
            * Mat4::from_scale(self.scale)
            * Mat4::from_translation(-self.pivot)
    }

    fn remap(&mut self, visitor: &mut dyn RemapVisitor) {
        visitor.remap_weak(&mut self.parent);
        visitor.remap_owned(&mut self.first_child);
        visitor.remap_owned(&mut self.next_sibling);
        visitor.reset_transient(&mut self.global);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub first_child: Option<ObjectId>,
    pub clear_color: Vec4,
    pub use_clear_color: bool,
    pub presentation: StringHandle,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            first_child: None,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            use_clear_color: true,
            presentation: StringHandle::EMPTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayerBackground {
    #[default]
    Transparent,
    Color,
    Unspecified,
}

/// What a layer drew last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerFrameCache {
    pub viewport: Size,
    pub draw_calls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub node: NodeBase,
    /// Head of the effect list. Last added is first rendered.
    pub first_effect: Option<ObjectId>,
    pub light_probe: Option<ObjectId>,
    /// Explicit size; empty means "inherit the viewport".
    pub size: Size,
    pub background: LayerBackground,
    pub clear_color: Vec4,
    pub active_camera: Option<ObjectId>,
    #[serde(skip)]
    pub last_frame: Option<LayerFrameCache>,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            node: NodeBase::default(),
            first_effect: None,
            light_probe: None,
            size: Size::default(),
            background: LayerBackground::Transparent,
            clear_color: Vec4::ZERO,
            active_camera: None,
            last_frame: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightKind {
    #[default]
    Directional,
    Point,
    Area,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Light {
    pub node: NodeBase,
    pub kind: LightKind,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub ambient: Vec3,
    pub brightness: f32,
    pub cast_shadow: bool,
    pub shadow_map_resolution: u32,
    /// Restrict lighting to this subtree.
    pub scope: Option<ObjectId>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            node: NodeBase::default(),
            kind: LightKind::Directional,
            diffuse: Vec3::ONE,
            specular: Vec3::ONE,
            ambient: Vec3::ZERO,
            brightness: 100.0,
            cast_shadow: false,
            shadow_map_resolution: 9,
            scope: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub node: NodeBase,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub clip_near: f32,
    pub clip_far: f32,
    pub orthographic: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            node: NodeBase::default(),
            fov: 60f32.to_radians(),
            clip_near: 10.0,
            clip_far: 5000.0,
            orthographic: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub node: NodeBase,
    /// Key into the buffer manager's mesh cache. The mesh itself is shared.
    pub mesh_path: StringHandle,
    pub first_material: Option<ObjectId>,
    pub skeleton_root: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Lighting {
    None,
    #[default]
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Screen,
    Multiply,
    Overlay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultMaterial {
    pub next_material: Option<ObjectId>,
    pub lighting: Lighting,
    pub blend_mode: BlendMode,
    pub diffuse_color: Vec3,
    pub opacity: f32,
    pub specular_amount: f32,
    pub emissive_power: f32,
    pub diffuse_map: Option<ObjectId>,
    pub specular_map: Option<ObjectId>,
    pub bump_map: Option<ObjectId>,
    pub normal_map: Option<ObjectId>,
    pub opacity_map: Option<ObjectId>,
    pub emissive_map: Option<ObjectId>,
    pub lightmaps: Option<ObjectId>,
}

impl Default for DefaultMaterial {
    fn default() -> Self {
        Self {
            next_material: None,
            lighting: Lighting::Pixel,
            blend_mode: BlendMode::Normal,
            diffuse_color: Vec3::ONE,
            opacity: 1.0,
            specular_amount: 0.0,
            emissive_power: 0.0,
            diffuse_map: None,
            specular_map: None,
            bump_map: None,
            normal_map: None,
            opacity_map: None,
            emissive_map: None,
            lightmaps: None,
        }
    }
}

/// Which slot an image occupies on a default material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSlot {
    Diffuse,
    Specular,
    Bump,
    Normal,
    Opacity,
    Emissive,
    LightmapIndirect,
    LightmapRadiosity,
    LightmapShadow,
    Custom(u16),
}

impl DefaultMaterial {
    /// Image slots in shader-binding order.
    pub fn image_slots(&self) -> [(ImageSlot, Option<ObjectId>); 6] {
        [
            (ImageSlot::Diffuse, self.diffuse_map),
            (ImageSlot::Specular, self.specular_map),
            (ImageSlot::Bump, self.bump_map),
            (ImageSlot::Normal, self.normal_map),
            (ImageSlot::Opacity, self.opacity_map),
            (ImageSlot::Emissive, self.emissive_map),
        ]
    }

    pub fn slot_mut(&mut self, slot: ImageSlot) -> Option<&mut Option<ObjectId>> {
        match slot {
            ImageSlot::Diffuse => Some(&mut self.diffuse_map),
            ImageSlot::Specular => Some(&mut self.specular_map),
            ImageSlot::Bump => Some(&mut self.bump_map),
            ImageSlot::Normal => Some(&mut self.normal_map),
            ImageSlot::Opacity => Some(&mut self.opacity_map),
            ImageSlot::Emissive => Some(&mut self.emissive_map),
            _ => None,
        }
    }
}

/// Value of a dynamic (class-defined) property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    String(StringHandle),
    Image(Option<ObjectId>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicProperty {
    pub name: StringHandle,
    pub value: PropertyValue,
}

fn remap_properties(properties: &mut [DynamicProperty], visitor: &mut dyn RemapVisitor) {
    for property in properties {
        visitor.remap_string(&mut property.name);
        match &mut property.value {
            PropertyValue::String(text) => visitor.remap_string(text),
            PropertyValue::Image(image) => visitor.remap_owned(image),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomMaterial {
    pub class_name: StringHandle,
    pub next_material: Option<ObjectId>,
    pub properties: Vec<DynamicProperty>,
    pub lightmaps: Option<ObjectId>,
    pub has_transparency: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferencedMaterial {
    pub next_material: Option<ObjectId>,
    pub referenced: Option<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MappingMode {
    #[default]
    Normal,
    Environment,
    LightProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TilingMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Texture the renderer resolved for an image on the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBinding {
    /// Non-owning view; the buffer manager owns the texture.
    pub texture: TextureKey,
    pub placeholder: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub image_path: StringHandle,
    pub offscreen_renderer_id: StringHandle,
    pub scale: Vec2,
    pub pivot: Vec2,
    /// Radians about the texture-space Z axis.
    pub rotation: f32,
    pub position: Vec2,
    pub mapping: MappingMode,
    pub horizontal_tiling: TilingMode,
    pub vertical_tiling: TilingMode,
    #[serde(skip)]
    pub texture_matrix: Option<Mat4>,
    #[serde(skip)]
    pub binding: Option<ImageBinding>,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            image_path: StringHandle::EMPTY,
            offscreen_renderer_id: StringHandle::EMPTY,
            scale: Vec2::ONE,
            pivot: Vec2::ZERO,
            rotation: 0.0,
            position: Vec2::ZERO,
            mapping: MappingMode::Normal,
            horizontal_tiling: TilingMode::ClampToEdge,
            vertical_tiling: TilingMode::ClampToEdge,
            texture_matrix: None,
            binding: None,
        }
    }
}

impl Image {
    /// The composed 4x4 texture transform, recomputed only after
    /// [`invalidate_matrix`](Self::invalidate_matrix).
    pub fn texture_matrix(&mut self) -> Mat4 {
        if let Some(matrix) = self.texture_matrix {
            return matrix;
        }
        let pivot = self.pivot.extend(0.0);
        let matrix = Mat4::from_translation(self.position.extend(0.0))
            * Mat4::from_translation(pivot)
            * Mat4::from_rotation_z(self.rotation)
            * Mat4::from_scale(self.scale.extend(1.0))
            * Mat4::from_translation(-pivot);
        self.texture_matrix = Some(matrix);
        matrix
    }

    pub fn invalidate_matrix(&mut self) {
        self.texture_matrix = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Text {
    pub node: NodeBase,
    pub text: StringHandle,
    pub font: StringHandle,
    pub font_size: f32,
    pub color: Vec3,
    pub align: TextAlign,
    pub leading: f32,
    pub tracking: f32,
    /// Set when a text-affecting property changes. The rasterized texture is
    /// stale until the renderer clears it.
    pub text_dirty: bool,
    #[serde(skip)]
    pub texture: Option<TextureHandle>,
    #[serde(skip)]
    pub texture_size: Option<Size>,
}

impl Default for Text {
    fn default() -> Self {
        Self {
            node: NodeBase::default(),
            text: StringHandle::EMPTY,
            font: StringHandle::EMPTY,
            font_size: 24.0,
            color: Vec3::ONE,
            align: TextAlign::Center,
            leading: 0.0,
            tracking: 0.0,
            text_dirty: true,
            texture: None,
            texture_size: None,
        }
    }
}

/// Backend state an effect accumulates while rendering.
#[derive(Debug, Clone, Default)]
pub struct EffectContext {
    pub output: Option<TextureHandle>,
    pub frames_rendered: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Effect {
    pub class_name: StringHandle,
    pub next_effect: Option<ObjectId>,
    pub layer: Option<ObjectId>,
    pub active: bool,
    pub properties: Vec<DynamicProperty>,
    /// Backend-specific command data supplied by the effect class.
    pub payload: Vec<u8>,
    #[serde(skip)]
    pub context: Option<EffectContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathType {
    #[default]
    Geometry,
    Painted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub node: NodeBase,
    pub path_type: PathType,
    pub width: f32,
    pub stroke: bool,
    pub fill: bool,
    pub first_sub_path: Option<ObjectId>,
    pub first_material: Option<ObjectId>,
}

impl Default for Path {
    fn default() -> Self {
        Self {
            node: NodeBase::default(),
            path_type: PathType::Geometry,
            width: 5.0,
            stroke: true,
            fill: false,
            first_sub_path: None,
            first_material: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSubPath {
    pub path: Option<ObjectId>,
    pub next_sub_path: Option<ObjectId>,
    pub closed: bool,
    pub points: Vec<Vec2>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lightmaps {
    pub indirect: Option<ObjectId>,
    pub radiosity: Option<ObjectId>,
    pub shadow: Option<ObjectId>,
}

/// Per-type payload of a graph object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ObjectData {
    Scene(Scene),
    Layer(Layer),
    Node(NodeBase),
    Light(Light),
    Camera(Camera),
    Model(Model),
    DefaultMaterial(DefaultMaterial),
    CustomMaterial(CustomMaterial),
    ReferencedMaterial(ReferencedMaterial),
    Image(Image),
    Text(Text),
    Effect(Effect),
    Path(Path),
    PathSubPath(PathSubPath),
    Lightmaps(Lightmaps),
}

impl ObjectData {
    pub fn object_type(&self) -> GraphObjectType {
        match self {
            Self::Scene(_) => GraphObjectType::Scene,
            Self::Layer(_) => GraphObjectType::Layer,
            Self::Node(_) => GraphObjectType::Node,
            Self::Light(_) => GraphObjectType::Light,
            Self::Camera(_) => GraphObjectType::Camera,
            Self::Model(_) => GraphObjectType::Model,
            Self::DefaultMaterial(_) => GraphObjectType::DefaultMaterial,
            Self::CustomMaterial(_) => GraphObjectType::CustomMaterial,
            Self::ReferencedMaterial(_) => GraphObjectType::ReferencedMaterial,
            Self::Image(_) => GraphObjectType::Image,
            Self::Text(_) => GraphObjectType::Text,
            Self::Effect(_) => GraphObjectType::Effect,
            Self::Path(_) => GraphObjectType::Path,
            Self::PathSubPath(_) => GraphObjectType::PathSubPath,
            Self::Lightmaps(_) => GraphObjectType::Lightmaps,
        }
    }

    pub fn node(&self) -> Option<&NodeBase> {
        match self {
            Self::Layer(l) => Some(&l.node),
            Self::Node(n) => Some(n),
            Self::Light(l) => Some(&l.node),
            Self::Camera(c) => Some(&c.node),
            Self::Model(m) => Some(&m.node),
            Self::Text(t) => Some(&t.node),
            Self::Path(p) => Some(&p.node),
            _ => None,
        }
    }

    pub fn node_mut(&mut self) -> Option<&mut NodeBase> {
        match self {
            Self::Layer(l) => Some(&mut l.node),
            Self::Node(n) => Some(n),
            Self::Light(l) => Some(&mut l.node),
            Self::Camera(c) => Some(&mut c.node),
            Self::Model(m) => Some(&mut m.node),
            Self::Text(t) => Some(&mut t.node),
            Self::Path(p) => Some(&mut p.node),
            _ => None,
        }
    }

    /// Link to the next material in a material list.
    pub fn next_material(&self) -> Option<Option<ObjectId>> {
        match self {
            Self::DefaultMaterial(m) => Some(m.next_material),
            Self::CustomMaterial(m) => Some(m.next_material),
            Self::ReferencedMaterial(m) => Some(m.next_material),
            _ => None,
        }
    }

    pub fn next_material_mut(&mut self) -> Option<&mut Option<ObjectId>> {
        match self {
            Self::DefaultMaterial(m) => Some(&mut m.next_material),
            Self::CustomMaterial(m) => Some(&mut m.next_material),
            Self::ReferencedMaterial(m) => Some(&mut m.next_material),
            _ => None,
        }
    }

    /// Feed every link, string and transient field through `visitor`.
    pub fn remap(&mut self, visitor: &mut dyn RemapVisitor) {
        match self {
            Self::Scene(s) => {
                visitor.remap_owned(&mut s.first_child);
                visitor.remap_string(&mut s.presentation);
            }
            Self::Layer(l) => {
                l.node.remap(visitor);
                visitor.remap_owned(&mut l.first_effect);
                visitor.remap_owned(&mut l.light_probe);
                visitor.remap_weak(&mut l.active_camera);
                visitor.reset_transient(&mut l.last_frame);
            }
            Self::Node(n) => n.remap(visitor),
            Self::Light(l) => {
                l.node.remap(visitor);
                visitor.remap_weak(&mut l.scope);
            }
            Self::Camera(c) => c.node.remap(visitor),
            Self::Model(m) => {
                m.node.remap(visitor);
                visitor.remap_string(&mut m.mesh_path);
                visitor.remap_owned(&mut m.first_material);
            }
            Self::DefaultMaterial(m) => {
                visitor.remap_owned(&mut m.next_material);
                visitor.remap_owned(&mut m.diffuse_map);
                visitor.remap_owned(&mut m.specular_map);
                visitor.remap_owned(&mut m.bump_map);
                visitor.remap_owned(&mut m.normal_map);
                visitor.remap_owned(&mut m.opacity_map);
                visitor.remap_owned(&mut m.emissive_map);
                visitor.remap_owned(&mut m.lightmaps);
            }
            Self::CustomMaterial(m) => {
                visitor.remap_string(&mut m.class_name);
                visitor.remap_owned(&mut m.next_material);
                visitor.remap_owned(&mut m.lightmaps);
                remap_properties(&mut m.properties, visitor);
            }
            Self::ReferencedMaterial(m) => {
                visitor.remap_owned(&mut m.next_material);
                visitor.remap_weak(&mut m.referenced);
            }
            Self::Image(i) => {
                visitor.remap_string(&mut i.image_path);
                visitor.remap_string(&mut i.offscreen_renderer_id);
                visitor.reset_transient(&mut i.texture_matrix);
                visitor.reset_transient(&mut i.binding);
            }
            Self::Text(t) => {
                t.node.remap(visitor);
                visitor.remap_string(&mut t.text);
                visitor.remap_string(&mut t.font);
                visitor.reset_transient(&mut t.texture);
                visitor.reset_transient(&mut t.texture_size);
            }
            Self::Effect(e) => {
                visitor.remap_string(&mut e.class_name);
                visitor.remap_owned(&mut e.next_effect);
                visitor.remap_weak(&mut e.layer);
                remap_properties(&mut e.properties, visitor);
                visitor.reset_transient(&mut e.context);
            }
            Self::Path(p) => {
                p.node.remap(visitor);
                visitor.remap_owned(&mut p.first_sub_path);
                visitor.remap_owned(&mut p.first_material);
            }
            Self::PathSubPath(s) => {
                visitor.remap_weak(&mut s.path);
                visitor.remap_owned(&mut s.next_sub_path);
            }
            Self::Lightmaps(l) => {
                visitor.remap_owned(&mut l.indirect);
                visitor.remap_owned(&mut l.radiosity);
                visitor.remap_owned(&mut l.shadow);
            }
        }
    }
}

/// One object in the render graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphObject {
    /// Identity that survives save/load, used to match authoring objects.
    pub uid: Uuid,
    pub dirty: bool,
    pub data: ObjectData,
}

impl GraphObject {
    pub fn new(data: ObjectData) -> Self {
        Self::with_uid(Uuid::new_v4(), data)
    }

    pub fn with_uid(uid: Uuid, data: ObjectData) -> Self {
        Self {
            uid,
            dirty: true,
            data,
        }
    }

    pub fn object_type(&self) -> GraphObjectType {
        self.data.object_type()
    }

    pub fn remap(&mut self, visitor: &mut dyn RemapVisitor) {
        self.data.remap(visitor);
    }
}
