//! The render graph: the engine-owned mirror of the authored scene.
//!
//! Objects live in an arena and link to each other by [`ObjectId`]. Owned
//! links (children, materials, effects, sub paths, material images) form a
//! tree; weak links (parents, references, light scopes) never own. Every
//! object type exposes its links, strings and transient state through
//! [`RemapVisitor`], which is how removal, save and load rewrite the graph.
//!
//! # Invariants
//! - Intrusive lists are singly linked and acyclic. Adding an object to a
//!   list twice is a contract violation (panics in debug builds).
//! - Effects are prepended: the last effect added renders first. Every other
//!   list appends.
//! - Dirtiness is local. Derived per-frame lists are the renderer's job.

mod class;
mod graph;
mod object;
mod remap;

pub use class::{ClassDef, ClassKind, ClassRegistry, PropertyDef, PropertyDefault};
pub use graph::{ListIter, ListKind, RenderGraph};
pub use object::{
    BlendMode, Camera, CustomMaterial, DefaultMaterial, DynamicProperty, Effect, EffectContext,
    GlobalState, GraphObject, GraphObjectType, Image, ImageBinding, ImageSlot, Layer,
    LayerBackground, LayerFrameCache, Light, LightKind, Lighting, Lightmaps, MappingMode, Model,
    NodeBase, ObjectData, ObjectId, Path, PathSubPath, PathType, PropertyValue,
    ReferencedMaterial, Scene, Text, TextAlign, TilingMode,
};
pub use remap::{
    IdentityRemap, OwnedLinkCollector, RemapVisitor, ResetTransients, Transient, UnlinkRemap,
};

pub fn crate_info() -> &'static str {
    "prism-graph v0.1.0"
}
