//! Per-frame derived data. Everything here is allocated from the frame arena
//! and rebuilt every frame.

use glam::{Mat4, Vec3};
use prism_graph::{ImageSlot, LightKind, ObjectId};
use prism_resource::TextureKey;

/// One active image slot of a material, linked in shader-binding order.
#[derive(Debug, Clone, Copy)]
pub struct RenderableImage<'f> {
    pub slot: ImageSlot,
    pub image: ObjectId,
    pub texture: TextureKey,
    pub matrix: Mat4,
    pub placeholder: bool,
    pub next: Option<&'f RenderableImage<'f>>,
}

impl<'f> RenderableImage<'f> {
    pub fn iter(&'f self) -> ImageChainIter<'f> {
        ImageChainIter { next: Some(self) }
    }
}

pub struct ImageChainIter<'f> {
    next: Option<&'f RenderableImage<'f>>,
}

impl<'f> Iterator for ImageChainIter<'f> {
    type Item = &'f RenderableImage<'f>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next;
        Some(current)
    }
}

/// Iterate a possibly empty chain.
pub fn chain_iter<'f>(head: Option<&'f RenderableImage<'f>>) -> ImageChainIter<'f> {
    ImageChainIter { next: head }
}

/// A light as seen by the shading of one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEntry {
    pub light: ObjectId,
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    /// Diffuse colour scaled by brightness.
    pub color: Vec3,
    pub cast_shadow: bool,
    pub scope: Option<ObjectId>,
}
