//! Ensure-or-reuse wrappers for temporary render targets.
//!
//! A wrapper allocates lazily on first `ensure`, skips reallocation while
//! dimensions and format are unchanged, and releases on `release` or drop.
//! Release consumes the inner handle, so a double free cannot be expressed.

use crate::device::Device;
use crate::handle::{
    FrameBufferHandle, FrameBufferKey, RenderBufferHandle, RenderBufferKey, TextureHandle,
    TextureKey,
};
use crate::manager::{EnsureOutcome, ResourceManager};
use prism_common::{Size, TextureFormat};

#[derive(Debug, Default)]
pub struct ScopedFrameBuffer {
    handle: Option<FrameBufferHandle>,
}

impl ScopedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate on first use. Returns `false` if the device refused.
    pub fn ensure<D: Device>(&mut self, manager: &mut ResourceManager<D>) -> bool {
        if self.handle.is_none() {
            self.handle = manager.allocate_frame_buffer();
        }
        self.handle.is_some()
    }

    pub fn release<D: Device>(&mut self, manager: &mut ResourceManager<D>) {
        if let Some(handle) = self.handle.take() {
            manager.release(handle);
        }
    }

    pub fn key(&self) -> Option<FrameBufferKey> {
        self.handle.as_ref().map(|h| h.key())
    }

    pub fn is_allocated(&self) -> bool {
        self.handle.is_some()
    }
}

#[derive(Debug, Default)]
pub struct ScopedRenderBuffer {
    handle: Option<RenderBufferHandle>,
}

impl ScopedRenderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure<D: Device>(
        &mut self,
        manager: &mut ResourceManager<D>,
        size: Size,
        format: TextureFormat,
    ) -> EnsureOutcome {
        manager.ensure_render_buffer(&mut self.handle, size, format)
    }

    pub fn release<D: Device>(&mut self, manager: &mut ResourceManager<D>) {
        if let Some(handle) = self.handle.take() {
            manager.release(handle);
        }
    }

    pub fn key(&self) -> Option<RenderBufferKey> {
        self.handle.as_ref().map(|h| h.key())
    }

    pub fn is_allocated(&self) -> bool {
        self.handle.is_some()
    }
}

#[derive(Debug, Default)]
pub struct ScopedTexture {
    handle: Option<TextureHandle>,
}

impl ScopedTexture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure<D: Device>(
        &mut self,
        manager: &mut ResourceManager<D>,
        size: Size,
        format: TextureFormat,
    ) -> EnsureOutcome {
        manager.ensure_texture(&mut self.handle, size, format)
    }

    pub fn release<D: Device>(&mut self, manager: &mut ResourceManager<D>) {
        if let Some(handle) = self.handle.take() {
            manager.release(handle);
        }
    }

    pub fn key(&self) -> Option<TextureKey> {
        self.handle.as_ref().map(|h| h.key())
    }

    pub fn is_allocated(&self) -> bool {
        self.handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceCall, HeadlessDevice};

    #[test]
    fn ensure_then_reuse_then_release() {
        let mut mgr = ResourceManager::new(HeadlessDevice::new());
        let mut depth = ScopedRenderBuffer::new();
        let size = Size::new(320, 240);

        assert_eq!(
            depth.ensure(&mut mgr, size, TextureFormat::Depth24Stencil8),
            EnsureOutcome::Created
        );
        let key = depth.key().unwrap();
        assert_eq!(
            depth.ensure(&mut mgr, size, TextureFormat::Depth24Stencil8),
            EnsureOutcome::Reused
        );
        assert_eq!(depth.key(), Some(key));

        depth.release(&mut mgr);
        depth.release(&mut mgr);
        assert!(!depth.is_allocated());
        assert_eq!(mgr.live_counts().render_buffers, 0);
        assert_eq!(mgr.device().double_frees(), 0);
    }

    #[test]
    fn frame_buffer_is_allocated_once() {
        let mut mgr = ResourceManager::new(HeadlessDevice::new());
        let mut fb = ScopedFrameBuffer::new();
        assert!(fb.ensure(&mut mgr));
        assert!(fb.ensure(&mut mgr));
        let creates = mgr
            .device()
            .journal()
            .count(|c| matches!(c, DeviceCall::CreateFrameBuffer(_)));
        assert_eq!(creates, 1);
    }

    #[test]
    fn dropping_a_wrapper_releases_on_next_collection() {
        let mut mgr = ResourceManager::new(HeadlessDevice::new());
        {
            let mut color = ScopedTexture::new();
            color.ensure(&mut mgr, Size::new(16, 16), TextureFormat::Rgba8);
            assert_eq!(mgr.live_counts().textures, 1);
        }
        mgr.end_frame();
        assert_eq!(mgr.live_counts().textures, 0);
    }

    #[test]
    fn texture_resize_recreates() {
        let mut mgr = ResourceManager::new(HeadlessDevice::new());
        let mut color = ScopedTexture::new();
        color.ensure(&mut mgr, Size::new(16, 16), TextureFormat::Rgba8);
        let first = color.key().unwrap();
        assert_eq!(
            color.ensure(&mut mgr, Size::new(32, 16), TextureFormat::Rgba8),
            EnsureOutcome::Created
        );
        assert_ne!(color.key(), Some(first));
        assert_eq!(mgr.live_counts().textures, 1);
    }
}
