use crate::class::{ClassKind, ClassRegistry};
use crate::object::{
    Camera, CustomMaterial, DefaultMaterial, Effect, GraphObject, GraphObjectType, Image,
    ImageSlot, Layer, Light, LightKind, Lightmaps, Model, NodeBase, ObjectData, ObjectId, Path,
    PathSubPath, ReferencedMaterial, Scene, Text,
};
use crate::remap::{OwnedLinkCollector, RemapVisitor, Transient, UnlinkRemap};
use glam::{Vec2, Vec3};
use prism_common::{StringHandle, StringTable};
use std::collections::HashSet;
use uuid::Uuid;

/// The intrusive lists a graph object can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Child nodes, in insertion order.
    Children,
    /// Materials of a model or path, in insertion order.
    Materials,
    /// Effects of a layer. Last added is first.
    Effects,
    /// Sub paths of a path, in insertion order.
    SubPaths,
}

/// Arena of graph objects addressed by stable [`ObjectId`]s.
///
/// Links between objects are indices, so removal and remap rewrite indices
/// rather than patching pointers. All objects are owned by the graph; links
/// never keep their target alive. Every mutation of a spatial property marks
/// the node transform-dirty, every mutation at all marks the object dirty.
#[derive(Debug, Default)]
pub struct RenderGraph {
    objects: Vec<Option<GraphObject>>,
    free: Vec<u32>,
    live: usize,
    scene: Option<ObjectId>,
    strings: StringTable,
    classes: ClassRegistry,
    violations: u64,
}

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, id: ObjectId) -> Option<&$ty> {
            match &self.get(id)?.data {
                ObjectData::$variant(value) => Some(value),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, id: ObjectId) -> Option<&mut $ty> {
            match &mut self.get_mut(id)?.data {
                ObjectData::$variant(value) => Some(value),
                _ => None,
            }
        }
    };
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph backed by an existing path manager and dynamic-object system.
    pub fn with_context(strings: StringTable, classes: ClassRegistry) -> Self {
        Self {
            strings,
            classes,
            ..Self::default()
        }
    }

    /// Rebuild a graph from loaded slots. Empty slots become free slots.
    pub fn restore(
        objects: Vec<Option<GraphObject>>,
        scene: Option<ObjectId>,
        strings: StringTable,
        classes: ClassRegistry,
    ) -> Self {
        let free = objects
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u32)
            .collect();
        let live = objects.iter().filter(|slot| slot.is_some()).count();
        Self {
            objects,
            free,
            live,
            scene,
            strings,
            classes,
            violations: 0,
        }
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn classes_mut(&mut self) -> &mut ClassRegistry {
        &mut self.classes
    }

    pub fn intern(&mut self, text: &str) -> StringHandle {
        self.strings.intern(text)
    }

    pub fn resolve(&self, handle: StringHandle) -> &str {
        self.strings.get(handle)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, live or free. Object ids are always below this.
    pub fn slot_count(&self) -> usize {
        self.objects.len()
    }

    /// Contract violations detected so far (release builds only; debug
    /// builds panic on the first one).
    pub fn violations(&self) -> u64 {
        self.violations
    }

    pub fn scene(&self) -> Option<ObjectId> {
        self.scene
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ObjectId) -> Option<&GraphObject> {
        self.objects.get(id.index())?.as_ref()
    }

    /// Raw mutable access. Does not mark the object dirty; links must be
    /// changed through the list operations.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut GraphObject> {
        self.objects.get_mut(id.index())?.as_mut()
    }

    pub fn object_type(&self, id: ObjectId) -> Option<GraphObjectType> {
        self.get(id).map(GraphObject::object_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &GraphObject)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|o| (ObjectId(index as u32), o)))
    }

    /// Every slot in id order, including free ones.
    pub fn slots(&self) -> &[Option<GraphObject>] {
        &self.objects
    }

    pub fn find_by_uid(&self, uid: Uuid) -> Option<ObjectId> {
        self.iter().find(|(_, o)| o.uid == uid).map(|(id, _)| id)
    }

    pub fn node(&self, id: ObjectId) -> Option<&NodeBase> {
        self.get(id)?.data.node()
    }

    typed_access!(layer, layer_mut, Layer, Layer);
    typed_access!(light, light_mut, Light, Light);
    typed_access!(camera, camera_mut, Camera, Camera);
    typed_access!(model, model_mut, Model, Model);
    typed_access!(default_material, default_material_mut, DefaultMaterial, DefaultMaterial);
    typed_access!(custom_material, custom_material_mut, CustomMaterial, CustomMaterial);
    typed_access!(image, image_mut, Image, Image);
    typed_access!(text, text_mut, Text, Text);
    typed_access!(effect, effect_mut, Effect, Effect);
    typed_access!(path, path_mut, Path, Path);
    typed_access!(sub_path, sub_path_mut, PathSubPath, PathSubPath);
    typed_access!(lightmaps, lightmaps_mut, Lightmaps, Lightmaps);

    // --- creation -------------------------------------------------------

    /// Place an object in a free slot, or a new one.
    pub fn insert(&mut self, object: GraphObject) -> ObjectId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.objects[index as usize] = Some(object);
                ObjectId(index)
            }
            None => {
                self.objects.push(Some(object));
                ObjectId(self.objects.len() as u32 - 1)
            }
        }
    }

    pub fn create(&mut self, data: ObjectData) -> ObjectId {
        self.insert(GraphObject::new(data))
    }

    /// Create the scene root. A graph has at most one.
    pub fn create_scene(&mut self) -> ObjectId {
        if let Some(scene) = self.scene {
            self.violation("scene already exists");
            return scene;
        }
        let id = self.create(ObjectData::Scene(Scene::default()));
        self.scene = Some(id);
        id
    }

    pub fn create_layer(&mut self) -> ObjectId {
        self.create(ObjectData::Layer(Layer::default()))
    }

    pub fn create_node(&mut self) -> ObjectId {
        self.create(ObjectData::Node(NodeBase::default()))
    }

    pub fn create_light(&mut self, kind: LightKind) -> ObjectId {
        self.create(ObjectData::Light(Light {
            kind,
            ..Light::default()
        }))
    }

    pub fn create_camera(&mut self) -> ObjectId {
        self.create(ObjectData::Camera(Camera::default()))
    }

    pub fn create_model(&mut self, mesh_path: &str) -> ObjectId {
        let mesh_path = self.intern(mesh_path);
        self.create(ObjectData::Model(Model {
            mesh_path,
            ..Model::default()
        }))
    }

    pub fn create_default_material(&mut self) -> ObjectId {
        self.create(ObjectData::DefaultMaterial(DefaultMaterial::default()))
    }

    /// Instantiate a registered custom-material class. `None` when the
    /// class is unknown.
    pub fn create_custom_material(&mut self, class_name: &str) -> Option<ObjectId> {
        let Some((properties, _)) =
            self.classes
                .instantiate(class_name, ClassKind::CustomMaterial, &mut self.strings)
        else {
            tracing::warn!(class = class_name, "unknown custom material class");
            return None;
        };
        let class_name = self.intern(class_name);
        Some(self.create(ObjectData::CustomMaterial(CustomMaterial {
            class_name,
            properties,
            ..CustomMaterial::default()
        })))
    }

    pub fn create_referenced_material(&mut self, referenced: Option<ObjectId>) -> ObjectId {
        self.create(ObjectData::ReferencedMaterial(ReferencedMaterial {
            next_material: None,
            referenced,
        }))
    }

    pub fn create_image(&mut self, image_path: &str) -> ObjectId {
        let image_path = self.intern(image_path);
        self.create(ObjectData::Image(Image {
            image_path,
            ..Image::default()
        }))
    }

    pub fn create_text(&mut self, text: &str) -> ObjectId {
        let text = self.intern(text);
        self.create(ObjectData::Text(Text {
            text,
            ..Text::default()
        }))
    }

    /// Instantiate a registered effect class. `None` when the class is
    /// unknown.
    pub fn create_effect(&mut self, class_name: &str) -> Option<ObjectId> {
        let Some((properties, payload)) =
            self.classes
                .instantiate(class_name, ClassKind::Effect, &mut self.strings)
        else {
            tracing::warn!(class = class_name, "unknown effect class");
            return None;
        };
        let class_name = self.intern(class_name);
        Some(self.create(ObjectData::Effect(Effect {
            class_name,
            active: true,
            properties,
            payload,
            ..Effect::default()
        })))
    }

    pub fn create_path(&mut self) -> ObjectId {
        self.create(ObjectData::Path(Path::default()))
    }

    pub fn create_sub_path(&mut self, points: Vec<Vec2>, closed: bool) -> ObjectId {
        self.create(ObjectData::PathSubPath(PathSubPath {
            points,
            closed,
            ..PathSubPath::default()
        }))
    }

    pub fn create_lightmaps(&mut self) -> ObjectId {
        self.create(ObjectData::Lightmaps(Lightmaps::default()))
    }

    // --- lists ----------------------------------------------------------

    /// Iterate the list `kind` owned by `owner`.
    ///
    /// # Panics
    /// If the list is cyclic. A corrupt list is an invariant break.
    pub fn list(&self, owner: ObjectId, kind: ListKind) -> ListIter<'_> {
        ListIter {
            graph: self,
            kind,
            next: self.head(owner, kind).flatten(),
            remaining: self.objects.len(),
        }
    }

    pub fn children(&self, parent: ObjectId) -> ListIter<'_> {
        self.list(parent, ListKind::Children)
    }

    pub fn materials(&self, owner: ObjectId) -> ListIter<'_> {
        self.list(owner, ListKind::Materials)
    }

    pub fn effects(&self, layer: ObjectId) -> ListIter<'_> {
        self.list(layer, ListKind::Effects)
    }

    pub fn sub_paths(&self, path: ObjectId) -> ListIter<'_> {
        self.list(path, ListKind::SubPaths)
    }

    /// Append `child` to `parent`'s children.
    pub fn add_child(&mut self, parent: ObjectId, child: ObjectId) -> bool {
        if self.head(parent, ListKind::Children).is_none() || !self.is_member(child, ListKind::Children)
        {
            self.violation("add_child on non-node objects");
            return false;
        }
        if parent == child {
            self.violation("node added as its own child");
            return false;
        }
        if self.node(child).is_some_and(|n| n.parent.is_some()) {
            self.violation("node already has a parent");
            return false;
        }
        if self.is_ancestor(child, parent) {
            self.violation("add_child would create a cycle");
            return false;
        }
        if !self.list_append(parent, ListKind::Children, child) {
            return false;
        }
        if let Some(obj) = self.get_mut(child) {
            obj.dirty = true;
            if let Some(node) = obj.data.node_mut() {
                node.parent = Some(parent);
                node.transform_dirty = true;
            }
        }
        self.mark_dirty(parent);
        true
    }

    pub fn remove_child(&mut self, parent: ObjectId, child: ObjectId) -> bool {
        if !self.list_remove(parent, ListKind::Children, child) {
            return false;
        }
        if let Some(obj) = self.get_mut(child) {
            obj.dirty = true;
            if let Some(node) = obj.data.node_mut() {
                node.parent = None;
                node.transform_dirty = true;
            }
        }
        self.mark_dirty(parent);
        true
    }

    /// Append `material` to the material list of a model or path.
    pub fn add_material(&mut self, owner: ObjectId, material: ObjectId) -> bool {
        if self.head(owner, ListKind::Materials).is_none()
            || !self.is_member(material, ListKind::Materials)
        {
            self.violation("add_material on a non-material or non-owner");
            return false;
        }
        if self.next_link(material).flatten().is_some()
            || (cfg!(debug_assertions) && self.owned_by_any(material))
        {
            self.violation("material already belongs to a list");
            return false;
        }
        let added = self.list_append(owner, ListKind::Materials, material);
        if added {
            self.mark_dirty(owner);
        }
        added
    }

    pub fn remove_material(&mut self, owner: ObjectId, material: ObjectId) -> bool {
        let removed = self.list_remove(owner, ListKind::Materials, material);
        if removed {
            self.mark_dirty(owner);
        }
        removed
    }

    /// Prepend `effect` to `layer`'s effects: the last effect added is the
    /// first one rendered.
    pub fn add_effect(&mut self, layer: ObjectId, effect: ObjectId) -> bool {
        if self.head(layer, ListKind::Effects).is_none() || !self.is_member(effect, ListKind::Effects)
        {
            self.violation("add_effect on a non-effect or non-layer");
            return false;
        }
        if self.effect(effect).is_some_and(|e| e.layer.is_some()) {
            self.violation("effect already belongs to a layer");
            return false;
        }
        if !self.list_prepend(layer, ListKind::Effects, effect) {
            return false;
        }
        if let Some(e) = self.effect_mut(effect) {
            e.layer = Some(layer);
        }
        self.mark_dirty(effect);
        self.mark_dirty(layer);
        true
    }

    pub fn remove_effect(&mut self, layer: ObjectId, effect: ObjectId) -> bool {
        if !self.list_remove(layer, ListKind::Effects, effect) {
            return false;
        }
        if let Some(e) = self.effect_mut(effect) {
            e.layer = None;
        }
        self.mark_dirty(layer);
        true
    }

    pub fn add_sub_path(&mut self, path: ObjectId, sub_path: ObjectId) -> bool {
        if self.head(path, ListKind::SubPaths).is_none()
            || !self.is_member(sub_path, ListKind::SubPaths)
        {
            self.violation("add_sub_path on a non-path");
            return false;
        }
        if self.sub_path(sub_path).is_some_and(|s| s.path.is_some()) {
            self.violation("sub path already belongs to a path");
            return false;
        }
        if !self.list_append(path, ListKind::SubPaths, sub_path) {
            return false;
        }
        if let Some(s) = self.sub_path_mut(sub_path) {
            s.path = Some(path);
        }
        self.mark_dirty(path);
        true
    }

    pub fn remove_sub_path(&mut self, path: ObjectId, sub_path: ObjectId) -> bool {
        if !self.list_remove(path, ListKind::SubPaths, sub_path) {
            return false;
        }
        if let Some(s) = self.sub_path_mut(sub_path) {
            s.path = None;
        }
        self.mark_dirty(path);
        true
    }

    /// Put `image` in a texture slot of a default material. Returns the image
    /// previously in the slot.
    pub fn set_material_image(
        &mut self,
        material: ObjectId,
        slot: ImageSlot,
        image: Option<ObjectId>,
    ) -> Option<ObjectId> {
        if image.is_some_and(|i| self.object_type(i) != Some(GraphObjectType::Image)) {
            self.violation("material slot given a non-image");
            return None;
        }
        let Some(target) = self
            .default_material_mut(material)
            .and_then(|m| m.slot_mut(slot))
        else {
            self.violation("image slot on a non-default material");
            return None;
        };
        let previous = std::mem::replace(target, image);
        self.mark_dirty(material);
        previous
    }

    // --- removal --------------------------------------------------------

    /// Remove `id` and everything it owns. Every remaining link to a removed
    /// object is nulled. Returns the number of objects removed.
    pub fn remove(&mut self, id: ObjectId) -> usize {
        if !self.contains(id) {
            return 0;
        }
        let replacement = self.next_link(id).flatten();
        let mut splice = SpliceRemap {
            target: id,
            replacement,
            spliced: 0,
        };
        for slot in self.objects.iter_mut() {
            let Some(object) = slot.as_mut() else { continue };
            let before = splice.spliced;
            object.remap(&mut splice);
            if splice.spliced != before {
                object.dirty = true;
            }
        }
        if let Some(next) = self.next_link_mut(id) {
            *next = None;
        }

        let mut removed = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !removed.insert(current) {
                continue;
            }
            let mut collector = OwnedLinkCollector::default();
            if let Some(object) = self.get_mut(current) {
                object.remap(&mut collector);
            }
            stack.extend(collector.owned);
        }

        for gone in &removed {
            let taken = self
                .objects
                .get_mut(gone.index())
                .and_then(Option::take);
            if taken.is_some() {
                self.free.push(gone.0);
                self.live -= 1;
            }
        }
        if self.scene.is_some_and(|s| removed.contains(&s)) {
            self.scene = None;
        }

        let mut unlink = UnlinkRemap::new(&removed);
        for object in self.objects.iter_mut().flatten() {
            object.remap(&mut unlink);
        }
        tracing::debug!(
            root = id.0,
            removed = removed.len(),
            unlinked = unlink.nulled,
            "removed graph objects"
        );
        removed.len()
    }

    // --- mutation -------------------------------------------------------

    pub fn is_dirty(&self, id: ObjectId) -> bool {
        self.get(id).is_some_and(|o| o.dirty)
    }

    pub fn mark_dirty(&mut self, id: ObjectId) {
        if let Some(object) = self.get_mut(id) {
            object.dirty = true;
        }
    }

    pub fn clear_dirty(&mut self, id: ObjectId) {
        if let Some(object) = self.get_mut(id) {
            object.dirty = false;
        }
    }

    pub fn dirty_objects(&self) -> Vec<ObjectId> {
        self.iter().filter(|(_, o)| o.dirty).map(|(id, _)| id).collect()
    }

    pub fn clear_all_dirty(&mut self) {
        for object in self.objects.iter_mut().flatten() {
            object.dirty = false;
        }
    }

    /// Edit any property and mark the object dirty.
    pub fn edit<R>(&mut self, id: ObjectId, f: impl FnOnce(&mut ObjectData) -> R) -> Option<R> {
        let object = self.get_mut(id)?;
        object.dirty = true;
        Some(f(&mut object.data))
    }

    /// Edit a spatial property: marks the node dirty and transform-dirty.
    pub fn edit_node(&mut self, id: ObjectId, f: impl FnOnce(&mut NodeBase)) -> bool {
        if self.node(id).is_none() {
            self.violation("spatial edit on a non-node");
            return false;
        }
        let Some(object) = self.get_mut(id) else {
            return false;
        };
        object.dirty = true;
        if let Some(node) = object.data.node_mut() {
            f(node);
            node.transform_dirty = true;
        }
        true
    }

    pub fn set_position(&mut self, id: ObjectId, position: Vec3) -> bool {
        self.edit_node(id, |n| n.position = position)
    }

    pub fn set_rotation(&mut self, id: ObjectId, rotation: Vec3) -> bool {
        self.edit_node(id, |n| n.rotation = rotation)
    }

    pub fn set_scale(&mut self, id: ObjectId, scale: Vec3) -> bool {
        self.edit_node(id, |n| n.scale = scale)
    }

    pub fn set_pivot(&mut self, id: ObjectId, pivot: Vec3) -> bool {
        self.edit_node(id, |n| n.pivot = pivot)
    }

    pub fn set_opacity(&mut self, id: ObjectId, opacity: f32) -> bool {
        self.edit_node(id, |n| n.opacity = opacity.clamp(0.0, 1.0))
    }

    pub fn set_active(&mut self, id: ObjectId, active: bool) -> bool {
        self.edit_node(id, |n| n.active = active)
    }

    /// Edit an image's path or 2D transform. The texture matrix is recomposed
    /// on next use.
    pub fn edit_image(&mut self, id: ObjectId, f: impl FnOnce(&mut Image)) -> bool {
        let Some(image) = self.image_mut(id) else {
            return false;
        };
        f(image);
        image.invalidate_matrix();
        self.mark_dirty(id);
        true
    }

    /// Edit a text-affecting property. The text texture becomes stale.
    pub fn edit_text(&mut self, id: ObjectId, f: impl FnOnce(&mut Text)) -> bool {
        let Some(text) = self.text_mut(id) else {
            return false;
        };
        f(text);
        text.text_dirty = true;
        self.mark_dirty(id);
        true
    }

    pub fn set_text(&mut self, id: ObjectId, value: &str) -> bool {
        let handle = self.intern(value);
        self.edit_text(id, |t| t.text = handle)
    }

    /// Feed every object through `visitor`.
    pub fn remap_all(&mut self, visitor: &mut dyn RemapVisitor) {
        for object in self.objects.iter_mut().flatten() {
            object.remap(visitor);
        }
    }

    // --- internals ------------------------------------------------------

    fn violation(&mut self, what: &str) {
        self.violations += 1;
        tracing::error!("render graph contract violation: {what}");
        debug_assert!(false, "render graph contract violation: {what}");
    }

    /// Head link of the list, or `None` if `owner` cannot own such a list.
    fn head(&self, owner: ObjectId, kind: ListKind) -> Option<Option<ObjectId>> {
        let data = &self.get(owner)?.data;
        match (kind, data) {
            (ListKind::Children, ObjectData::Scene(s)) => Some(s.first_child),
            (ListKind::Children, _) => data.node().map(|n| n.first_child),
            (ListKind::Materials, ObjectData::Model(m)) => Some(m.first_material),
            (ListKind::Materials, ObjectData::Path(p)) => Some(p.first_material),
            (ListKind::Effects, ObjectData::Layer(l)) => Some(l.first_effect),
            (ListKind::SubPaths, ObjectData::Path(p)) => Some(p.first_sub_path),
            _ => None,
        }
    }

    fn head_mut(&mut self, owner: ObjectId, kind: ListKind) -> Option<&mut Option<ObjectId>> {
        let data = &mut self.get_mut(owner)?.data;
        match (kind, data) {
            (ListKind::Children, ObjectData::Scene(s)) => Some(&mut s.first_child),
            (ListKind::Children, data) => data.node_mut().map(|n| &mut n.first_child),
            (ListKind::Materials, ObjectData::Model(m)) => Some(&mut m.first_material),
            (ListKind::Materials, ObjectData::Path(p)) => Some(&mut p.first_material),
            (ListKind::Effects, ObjectData::Layer(l)) => Some(&mut l.first_effect),
            (ListKind::SubPaths, ObjectData::Path(p)) => Some(&mut p.first_sub_path),
            _ => None,
        }
    }

    fn is_member(&self, id: ObjectId, kind: ListKind) -> bool {
        let Some(ty) = self.object_type(id) else {
            return false;
        };
        match kind {
            ListKind::Children => ty.is_node(),
            ListKind::Materials => ty.is_material(),
            ListKind::Effects => ty == GraphObjectType::Effect,
            ListKind::SubPaths => ty == GraphObjectType::PathSubPath,
        }
    }

    /// The sibling link of whichever list `id` can be a member of.
    fn next_link(&self, id: ObjectId) -> Option<Option<ObjectId>> {
        let data = &self.get(id)?.data;
        match data {
            ObjectData::Effect(e) => Some(e.next_effect),
            ObjectData::PathSubPath(s) => Some(s.next_sub_path),
            _ => data
                .next_material()
                .or_else(|| data.node().map(|n| n.next_sibling)),
        }
    }

    fn next_link_mut(&mut self, id: ObjectId) -> Option<&mut Option<ObjectId>> {
        let data = &mut self.get_mut(id)?.data;
        match data {
            ObjectData::Effect(e) => Some(&mut e.next_effect),
            ObjectData::PathSubPath(s) => Some(&mut s.next_sub_path),
            ObjectData::DefaultMaterial(_)
            | ObjectData::CustomMaterial(_)
            | ObjectData::ReferencedMaterial(_) => data.next_material_mut(),
            _ => data.node_mut().map(|n| &mut n.next_sibling),
        }
    }

    fn list_append(&mut self, owner: ObjectId, kind: ListKind, item: ObjectId) -> bool {
        let members: Vec<ObjectId> = self.list(owner, kind).collect();
        if members.contains(&item) {
            self.violation("object added to a list twice");
            return false;
        }
        let slot = match members.last().copied() {
            Some(last) => self.next_link_mut(last),
            None => self.head_mut(owner, kind),
        };
        match slot {
            Some(slot) => {
                *slot = Some(item);
                true
            }
            None => false,
        }
    }

    fn list_prepend(&mut self, owner: ObjectId, kind: ListKind, item: ObjectId) -> bool {
        if self.list(owner, kind).any(|member| member == item) {
            self.violation("object added to a list twice");
            return false;
        }
        let Some(old_head) = self.head(owner, kind) else {
            return false;
        };
        if let Some(next) = self.next_link_mut(item) {
            *next = old_head;
        }
        match self.head_mut(owner, kind) {
            Some(head) => {
                *head = Some(item);
                true
            }
            None => false,
        }
    }

    /// Unlink `item` by walking to its predecessor.
    fn list_remove(&mut self, owner: ObjectId, kind: ListKind, item: ObjectId) -> bool {
        let next = self.next_link(item).flatten();
        if self.head(owner, kind).flatten() == Some(item) {
            if let Some(head) = self.head_mut(owner, kind) {
                *head = next;
            }
        } else {
            let predecessor = self
                .list(owner, kind)
                .find(|&member| self.next_link(member).flatten() == Some(item));
            let Some(predecessor) = predecessor else {
                return false;
            };
            if let Some(link) = self.next_link_mut(predecessor) {
                *link = next;
            }
        }
        if let Some(link) = self.next_link_mut(item) {
            *link = None;
        }
        true
    }

    fn is_ancestor(&self, ancestor: ObjectId, of: ObjectId) -> bool {
        let mut current = Some(of);
        let mut remaining = self.objects.len();
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            if remaining == 0 {
                panic!("corrupt parent chain: cycle through {id:?}");
            }
            remaining -= 1;
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    fn owned_by_any(&self, id: ObjectId) -> bool {
        self.iter().any(|(_, object)| {
            let mut collector = OwnedLinkCollector::default();
            object.clone().remap(&mut collector);
            collector.owned.contains(&id)
        })
    }
}

/// Iterator over an intrusive list. See [`RenderGraph::list`].
#[derive(Debug)]
pub struct ListIter<'a> {
    graph: &'a RenderGraph,
    kind: ListKind,
    next: Option<ObjectId>,
    remaining: usize,
}

impl Iterator for ListIter<'_> {
    type Item = ObjectId;

    fn next(&mut self) -> Option<ObjectId> {
        let current = self.next?;
        assert!(
            self.remaining > 0,
            "corrupt {:?} list: cycle through {current:?}",
            self.kind
        );
        self.remaining -= 1;
        self.next = self.graph.next_link(current).flatten();
        Some(current)
    }
}

/// Replaces owned links to `target` with `replacement`, splicing the target
/// out of whatever list or slot holds it.
struct SpliceRemap {
    target: ObjectId,
    replacement: Option<ObjectId>,
    spliced: usize,
}

impl RemapVisitor for SpliceRemap {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>) {
        if *link == Some(self.target) {
            *link = self.replacement;
            self.spliced += 1;
        }
    }

    fn remap_weak(&mut self, _link: &mut Option<ObjectId>) {}

    fn remap_string(&mut self, _text: &mut StringHandle) {}

    fn reset_transient(&mut self, _field: &mut dyn Transient) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassDef, PropertyDefault};
    use crate::remap::IdentityRemap;

    fn graph_with_effects() -> RenderGraph {
        let mut classes = ClassRegistry::new();
        classes.register(
            ClassDef::new("Blur", ClassKind::Effect)
                .with_property("radius", PropertyDefault::Float(4.0)),
        );
        classes.register(
            ClassDef::new("Glass", ClassKind::CustomMaterial)
                .with_property("tint", PropertyDefault::Vec3(Vec3::ONE)),
        );
        RenderGraph::with_context(StringTable::new(), classes)
    }

    #[test]
    fn graph_starts_empty() {
        let g = RenderGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.scene(), None);
    }

    #[test]
    fn children_append_in_order() {
        let mut g = RenderGraph::new();
        let scene = g.create_scene();
        let layer = g.create_layer();
        let a = g.create_node();
        let b = g.create_model("#Cube");
        assert!(g.add_child(scene, layer));
        assert!(g.add_child(layer, a));
        assert!(g.add_child(layer, b));

        assert_eq!(g.children(layer).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(g.node(b).unwrap().parent, Some(layer));
        assert_eq!(g.node(layer).unwrap().parent, Some(scene));
    }

    #[test]
    fn material_lists_have_n_elements_after_n_adds() {
        for n in 0..12 {
            let mut g = RenderGraph::new();
            let model = g.create_model("#Cube");
            let mut added = Vec::new();
            for _ in 0..n {
                let m = g.create_default_material();
                assert!(g.add_material(model, m));
                added.push(m);
            }
            let listed: Vec<_> = g.materials(model).collect();
            assert_eq!(listed.len(), n);
            assert_eq!(listed, added);
        }
    }

    #[test]
    fn effects_are_in_reverse_addition_order() {
        for n in 0..10 {
            let mut g = graph_with_effects();
            let layer = g.create_layer();
            let mut added = Vec::new();
            for _ in 0..n {
                let e = g.create_effect("Blur").unwrap();
                assert!(g.add_effect(layer, e));
                added.push(e);
            }
            added.reverse();
            assert_eq!(g.effects(layer).collect::<Vec<_>>(), added);
            for &e in &added {
                assert_eq!(g.effect(e).unwrap().layer, Some(layer));
            }
        }
    }

    #[test]
    fn mixed_material_kinds_share_one_list() {
        let mut g = graph_with_effects();
        let model = g.create_model("#Cube");
        let base = g.create_default_material();
        let glass = g.create_custom_material("Glass").unwrap();
        let reference = g.create_referenced_material(Some(base));
        for m in [base, glass, reference] {
            assert!(g.add_material(model, m));
        }
        assert_eq!(g.materials(model).count(), 3);
        assert_eq!(g.custom_material(glass).unwrap().properties.len(), 1);
    }

    #[test]
    fn unknown_classes_are_not_created() {
        let mut g = RenderGraph::new();
        assert!(g.create_effect("Nope").is_none());
        assert!(g.create_custom_material("Nope").is_none());
        assert!(g.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already has a parent")]
    fn double_add_child_fails_loudly() {
        let mut g = RenderGraph::new();
        let layer = g.create_layer();
        let node = g.create_node();
        g.add_child(layer, node);
        g.add_child(layer, node);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already belongs to a list")]
    fn double_add_material_fails_loudly() {
        let mut g = RenderGraph::new();
        let model = g.create_model("#Cube");
        let m = g.create_default_material();
        g.add_material(model, m);
        g.add_material(model, m);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already belongs to a layer")]
    fn double_add_effect_fails_loudly() {
        let mut g = graph_with_effects();
        let layer = g.create_layer();
        let e = g.create_effect("Blur").unwrap();
        g.add_effect(layer, e);
        g.add_effect(layer, e);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cycle")]
    fn ancestor_cannot_become_child() {
        let mut g = RenderGraph::new();
        let a = g.create_node();
        let b = g.create_node();
        g.add_child(a, b);
        g.add_child(b, a);
    }

    #[test]
    #[should_panic(expected = "corrupt")]
    fn iterating_a_corrupt_list_panics() {
        let mut g = RenderGraph::new();
        let model = g.create_model("#Cube");
        let m = g.create_default_material();
        g.add_material(model, m);
        g.default_material_mut(m).unwrap().next_material = Some(m);
        let _ = g.materials(model).count();
    }

    #[test]
    fn remove_material_walks_to_predecessor() {
        let mut g = RenderGraph::new();
        let model = g.create_model("#Cube");
        let ms: Vec<_> = (0..4).map(|_| g.create_default_material()).collect();
        for &m in &ms {
            g.add_material(model, m);
        }
        assert!(g.remove_material(model, ms[2]));
        assert!(g.remove_material(model, ms[0]));
        assert!(!g.remove_material(model, ms[0]));
        assert_eq!(g.materials(model).collect::<Vec<_>>(), vec![ms[1], ms[3]]);
        assert_eq!(g.default_material(ms[2]).unwrap().next_material, None);
    }

    #[test]
    fn remove_splices_sibling_and_frees_subtree() {
        let mut g = RenderGraph::new();
        let layer = g.create_layer();
        let a = g.create_node();
        let model = g.create_model("#Cube");
        let c = g.create_node();
        for n in [a, model, c] {
            g.add_child(layer, n);
        }
        let material = g.create_default_material();
        g.add_material(model, material);
        let image = g.create_image("wood.png");
        g.set_material_image(material, ImageSlot::Diffuse, Some(image));
        let reference = g.create_referenced_material(Some(material));
        let before = g.len();

        assert_eq!(g.remove(model), 3);
        assert_eq!(g.len(), before - 3);
        assert_eq!(g.children(layer).collect::<Vec<_>>(), vec![a, c]);
        assert!(!g.contains(image));
        let referenced = match &g.get(reference).unwrap().data {
            ObjectData::ReferencedMaterial(r) => r.referenced,
            _ => unreachable!(),
        };
        assert_eq!(referenced, None);

        let reused = g.create_node();
        assert!(reused.index() < before);
    }

    #[test]
    fn removing_the_scene_clears_it() {
        let mut g = RenderGraph::new();
        let scene = g.create_scene();
        let layer = g.create_layer();
        g.add_child(scene, layer);
        assert_eq!(g.remove(scene), 2);
        assert_eq!(g.scene(), None);
        assert!(g.is_empty());
    }

    #[test]
    fn spatial_setters_mark_transform_dirty() {
        let mut g = RenderGraph::new();
        let node = g.create_node();
        g.clear_all_dirty();
        g.node_mut_for_test(node).transform_dirty = false;

        assert!(g.set_position(node, Vec3::X));
        assert!(g.is_dirty(node));
        assert!(g.node(node).unwrap().transform_dirty);
        g.clear_dirty(node);
        assert!(g.dirty_objects().is_empty());
    }

    #[test]
    fn text_edits_mark_text_dirty() {
        let mut g = RenderGraph::new();
        let text = g.create_text("hello");
        g.text_mut(text).unwrap().text_dirty = false;
        assert!(g.set_text(text, "world"));
        let t = g.text(text).unwrap();
        assert!(t.text_dirty);
        assert_eq!(g.resolve(t.text), "world");
    }

    #[test]
    fn image_edits_invalidate_matrix() {
        let mut g = RenderGraph::new();
        let image = g.create_image("a.png");
        g.image_mut(image).unwrap().texture_matrix();
        assert!(g.edit_image(image, |i| i.rotation = 1.0));
        assert!(g.image(image).unwrap().texture_matrix.is_none());
    }

    #[test]
    fn identity_remap_leaves_graph_unchanged() {
        let mut g = graph_with_effects();
        let scene = g.create_scene();
        let layer = g.create_layer();
        g.add_child(scene, layer);
        let effect = g.create_effect("Blur").unwrap();
        g.add_effect(layer, effect);
        let model = g.create_model("mesh/teapot.mesh");
        g.add_child(layer, model);
        let material = g.create_custom_material("Glass").unwrap();
        g.add_material(model, material);
        let light = g.create_light(LightKind::Point);
        g.add_child(layer, light);
        let path = g.create_path();
        let sub = g.create_sub_path(vec![Vec2::ZERO, Vec2::ONE], false);
        g.add_sub_path(path, sub);

        let before: Vec<String> = g.iter().map(|(_, o)| format!("{o:?}")).collect();
        let mut identity = IdentityRemap::default();
        g.remap_all(&mut identity);
        let after: Vec<String> = g.iter().map(|(_, o)| format!("{o:?}")).collect();
        assert_eq!(before, after);
        assert!(identity.links_visited > 0);
    }

    #[test]
    fn restore_rebuilds_free_list() {
        let objects = vec![
            Some(GraphObject::new(ObjectData::Node(NodeBase::default()))),
            None,
            Some(GraphObject::new(ObjectData::Node(NodeBase::default()))),
        ];
        let mut g = RenderGraph::restore(objects, None, StringTable::new(), ClassRegistry::new());
        assert_eq!(g.len(), 2);
        assert_eq!(g.create_node(), ObjectId(1));
        assert_eq!(g.create_node(), ObjectId(3));
    }

    impl RenderGraph {
        fn node_mut_for_test(&mut self, id: ObjectId) -> &mut NodeBase {
            self.get_mut(id).unwrap().data.node_mut().unwrap()
        }
    }
}
