use glam::Mat4;
use prism_common::{Size, TextureFormat};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Opaque backend object name (a GL name, a Vulkan handle index, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendHandle(pub u64);

/// Capabilities reported by a device. Limits are explicit, never assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub max_texture_size: u32,
    pub max_texture_units: u32,
    /// Render buffers can change size/format without being recreated.
    pub render_buffer_resize: bool,
    pub occlusion_queries: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_texture_units: 16,
            render_buffer_resize: true,
            occlusion_queries: false,
        }
    }
}

/// How often a drawable buffer's contents change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    Static,
    Dynamic,
    Stream,
}

/// A single buffer binding point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindTarget {
    Vertex,
    Index,
    Uniform,
    DrawIndirect,
}

impl BindTarget {
    fn bit(self) -> u8 {
        match self {
            Self::Vertex => 1,
            Self::Index => 1 << 1,
            Self::Uniform => 1 << 2,
            Self::DrawIndirect => 1 << 3,
        }
    }
}

/// Set of targets a buffer may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BindTargets(u8);

impl BindTargets {
    pub const NONE: Self = Self(0);
    pub const VERTEX: Self = Self(1);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const DRAW_INDIRECT: Self = Self(1 << 3);

    pub fn contains(self, target: BindTarget) -> bool {
        self.0 & target.bit() != 0
    }
}

impl BitOr for BindTargets {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<BindTarget> for BindTargets {
    fn from(target: BindTarget) -> Self {
        Self(target.bit())
    }
}

/// Frame buffer attachment points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color0,
    Depth,
    DepthStencil,
}

/// What a frame buffer attachment refers to, in backend terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSource {
    Texture(BackendHandle),
    RenderBuffer(BackendHandle),
    Detached,
}

/// One indexed or non-indexed draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub shader_key: u64,
    pub vertex_buffer: BackendHandle,
    pub index_buffer: Option<BackendHandle>,
    pub first: u32,
    pub count: u32,
    pub world: Mat4,
    pub opacity: f32,
}

/// Opaque graphics backend.
///
/// The renderer issues every create/bind/release/draw through this trait and
/// never touches a specific graphics API. `create_*` returns `None` when the
/// object cannot be created or the capability is missing.
pub trait Device {
    fn caps(&self) -> DeviceCaps;

    fn create_texture(
        &mut self,
        size: Size,
        format: TextureFormat,
        pixels: Option<&[u8]>,
    ) -> Option<BackendHandle>;
    fn upload_texture(
        &mut self,
        texture: BackendHandle,
        size: Size,
        format: TextureFormat,
        pixels: &[u8],
    );
    fn destroy_texture(&mut self, texture: BackendHandle);

    fn create_render_buffer(&mut self, size: Size, format: TextureFormat)
    -> Option<BackendHandle>;
    /// Resize in place. Returns `false` when the backend cannot.
    fn resize_render_buffer(
        &mut self,
        buffer: BackendHandle,
        size: Size,
        format: TextureFormat,
    ) -> bool;
    fn destroy_render_buffer(&mut self, buffer: BackendHandle);

    fn create_frame_buffer(&mut self) -> Option<BackendHandle>;
    fn attach(
        &mut self,
        frame_buffer: BackendHandle,
        attachment: Attachment,
        source: AttachmentSource,
    );
    fn destroy_frame_buffer(&mut self, frame_buffer: BackendHandle);

    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        targets: BindTargets,
        data: &[u8],
    ) -> Option<BackendHandle>;
    fn update_buffer(&mut self, buffer: BackendHandle, offset: usize, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BackendHandle);

    fn create_query(&mut self) -> Option<BackendHandle>;
    fn destroy_query(&mut self, query: BackendHandle);

    fn bind_buffer(&mut self, target: BindTarget, buffer: Option<BackendHandle>);
    fn bind_frame_buffer(&mut self, frame_buffer: Option<BackendHandle>);
    fn bind_texture(&mut self, unit: u32, texture: Option<BackendHandle>);

    fn set_viewport(&mut self, size: Size);
    fn clear(&mut self, color: [f32; 4]);
    fn draw(&mut self, call: &DrawCall);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_targets_combine() {
        let targets = BindTargets::VERTEX | BindTargets::INDEX;
        assert!(targets.contains(BindTarget::Vertex));
        assert!(targets.contains(BindTarget::Index));
        assert!(!targets.contains(BindTarget::Uniform));
        assert!(!BindTargets::NONE.contains(BindTarget::Vertex));
    }

    #[test]
    fn single_target_converts() {
        let targets: BindTargets = BindTarget::DrawIndirect.into();
        assert_eq!(targets, BindTargets::DRAW_INDIRECT);
    }
}
