//! Structural checks on a freshly loaded object table.
//!
//! Saved bytes are untrusted. Before a table becomes a [`RenderGraph`] every
//! link must point at an object of the right type and no object may sit in
//! two list positions. Lists must terminate, and so must parent chains.
//!
//! [`RenderGraph`]: prism_graph::RenderGraph

use crate::format::PersistError;
use prism_graph::{
    DynamicProperty, GraphObject, GraphObjectType, ObjectData, ObjectId, PropertyValue,
};
use std::collections::HashSet;

type Table = [Option<GraphObject>];

pub(crate) fn check_topology(objects: &Table, scene: Option<ObjectId>) -> Result<(), PersistError> {
    if let Some(scene) = scene {
        expect(objects, scene, |ty| ty == GraphObjectType::Scene)?;
    }
    check_exclusive_ownership(objects)?;
    for (index, object) in objects.iter().enumerate() {
        let Some(object) = object else { continue };
        let owner = ObjectId(index as u32);
        check_lists(objects, owner, &object.data)?;
        check_slots(objects, &object.data)?;
        check_parent_chain(objects, owner)?;
    }
    Ok(())
}

fn corrupt(id: ObjectId) -> PersistError {
    PersistError::CorruptGraph { index: id.0 }
}

fn object_type(objects: &Table, id: ObjectId) -> Option<GraphObjectType> {
    objects
        .get(id.index())
        .and_then(Option::as_ref)
        .map(GraphObject::object_type)
}

fn expect(
    objects: &Table,
    id: ObjectId,
    accept: impl Fn(GraphObjectType) -> bool,
) -> Result<(), PersistError> {
    match object_type(objects, id) {
        Some(ty) if accept(ty) => Ok(()),
        _ => Err(corrupt(id)),
    }
}

fn expect_opt(
    objects: &Table,
    link: Option<ObjectId>,
    accept: impl Fn(GraphObjectType) -> bool,
) -> Result<(), PersistError> {
    link.map_or(Ok(()), |id| expect(objects, id, accept))
}

/// Each object is linked into at most one list position, never by itself.
fn check_exclusive_ownership(objects: &Table) -> Result<(), PersistError> {
    let mut linked = HashSet::new();
    for (index, object) in objects.iter().enumerate() {
        let Some(object) = object else { continue };
        let heads = list_heads(&object.data).into_iter().map(|(_, head)| head);
        for target in heads.chain([next_link(&object.data)]).flatten() {
            if target.index() == index || !linked.insert(target) {
                return Err(corrupt(target));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMember {
    Child,
    Material,
    Effect,
    SubPath,
}

impl ListMember {
    fn accepts(self, ty: GraphObjectType) -> bool {
        match self {
            Self::Child => ty.is_node(),
            Self::Material => ty.is_material(),
            Self::Effect => ty == GraphObjectType::Effect,
            Self::SubPath => ty == GraphObjectType::PathSubPath,
        }
    }
}

fn list_heads(data: &ObjectData) -> Vec<(ListMember, Option<ObjectId>)> {
    let mut heads = Vec::new();
    match data {
        ObjectData::Scene(s) => heads.push((ListMember::Child, s.first_child)),
        ObjectData::Model(m) => heads.push((ListMember::Material, m.first_material)),
        ObjectData::Layer(l) => heads.push((ListMember::Effect, l.first_effect)),
        ObjectData::Path(p) => {
            heads.push((ListMember::Material, p.first_material));
            heads.push((ListMember::SubPath, p.first_sub_path));
        }
        _ => {}
    }
    if let Some(node) = data.node() {
        heads.push((ListMember::Child, node.first_child));
    }
    heads
}

/// The sibling link of whichever list `data` can be a member of.
fn next_link(data: &ObjectData) -> Option<ObjectId> {
    match data {
        ObjectData::Effect(e) => e.next_effect,
        ObjectData::PathSubPath(s) => s.next_sub_path,
        _ => data
            .next_material()
            .or_else(|| data.node().map(|n| n.next_sibling))
            .flatten(),
    }
}

fn check_lists(objects: &Table, owner: ObjectId, data: &ObjectData) -> Result<(), PersistError> {
    for (kind, head) in list_heads(data) {
        let mut seen = HashSet::new();
        let mut next = head;
        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(corrupt(id));
            }
            let member = objects
                .get(id.index())
                .and_then(Option::as_ref)
                .filter(|m| kind.accepts(m.object_type()))
                .ok_or_else(|| corrupt(id))?;
            let parent = member.data.node().and_then(|n| n.parent);
            if kind == ListMember::Child && parent != Some(owner) {
                return Err(corrupt(id));
            }
            next = next_link(&member.data);
        }
    }
    Ok(())
}

/// Links outside the intrusive lists must name the right kind of object.
fn check_slots(objects: &Table, data: &ObjectData) -> Result<(), PersistError> {
    let image = |ty: GraphObjectType| ty == GraphObjectType::Image;
    let lightmaps = |ty: GraphObjectType| ty == GraphObjectType::Lightmaps;
    match data {
        ObjectData::Layer(l) => {
            expect_opt(objects, l.active_camera, |ty| ty == GraphObjectType::Camera)
        }
        ObjectData::Light(l) => expect_opt(objects, l.scope, GraphObjectType::is_node),
        ObjectData::DefaultMaterial(m) => {
            for (_, slot) in m.image_slots() {
                expect_opt(objects, slot, image)?;
            }
            expect_opt(objects, m.lightmaps, lightmaps)
        }
        ObjectData::CustomMaterial(m) => {
            check_properties(objects, &m.properties)?;
            expect_opt(objects, m.lightmaps, lightmaps)
        }
        ObjectData::ReferencedMaterial(m) => {
            expect_opt(objects, m.referenced, GraphObjectType::is_material)
        }
        ObjectData::Effect(e) => {
            check_properties(objects, &e.properties)?;
            expect_opt(objects, e.layer, |ty| ty == GraphObjectType::Layer)
        }
        ObjectData::PathSubPath(s) => {
            expect_opt(objects, s.path, |ty| ty == GraphObjectType::Path)
        }
        ObjectData::Lightmaps(l) => {
            for slot in [l.indirect, l.radiosity, l.shadow] {
                expect_opt(objects, slot, image)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_properties(objects: &Table, properties: &[DynamicProperty]) -> Result<(), PersistError> {
    for property in properties {
        if let PropertyValue::Image(image) = &property.value {
            expect_opt(objects, *image, |ty| ty == GraphObjectType::Image)?;
        }
    }
    Ok(())
}

/// Parents are nodes or the scene, and following them always ends.
fn check_parent_chain(objects: &Table, start: ObjectId) -> Result<(), PersistError> {
    let mut seen = HashSet::new();
    let mut current = start;
    loop {
        if !seen.insert(current) {
            return Err(corrupt(current));
        }
        let parent = objects
            .get(current.index())
            .and_then(Option::as_ref)
            .and_then(|o| o.data.node())
            .and_then(|n| n.parent);
        let Some(parent) = parent else {
            return Ok(());
        };
        expect(objects, parent, |ty| {
            ty.is_node() || ty == GraphObjectType::Scene
        })?;
        current = parent;
    }
}
