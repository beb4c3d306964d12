//! Resource management: the single owner of backend-resident objects.
//!
//! # Invariants
//! - Only [`ResourceManager`] creates or destroys backend objects.
//! - A backend handle is destroyed exactly once, when its last strong handle
//!   is gone, and observers hear about it before the handle is freed.
//! - Requests above the device's maximum texture size are clamped and
//!   reported, never rejected.
//! - A buffer mapped for CPU writes cannot be bound.

mod device;
mod handle;
mod headless;
mod manager;
mod pool;
mod scoped;
mod state;

pub use device::{
    Attachment, AttachmentSource, BackendHandle, BindTarget, BindTargets, BufferUsage, Device,
    DeviceCaps, DrawCall,
};
pub use handle::{
    BufferHandle, BufferKey, FrameBufferHandle, FrameBufferKey, QueryHandle, QueryKey,
    RenderBufferHandle, RenderBufferKey, ResourceKey, ResourceKind, Shared, TextureHandle,
    TextureKey,
};
pub use headless::{DeviceCall, HeadlessDevice, Journal};
pub use manager::{
    BufferInfo, Diagnostics, EnsureOutcome, LiveCounts, RenderBufferInfo, ResourceConfig,
    ResourceManager, TextureInfo,
};
pub use scoped::{ScopedFrameBuffer, ScopedRenderBuffer, ScopedTexture};
pub use state::{BindingState, ResourceObserver};

pub fn crate_info() -> &'static str {
    "prism-resource v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("resource"));
    }
}
