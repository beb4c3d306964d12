use crate::handle::TextureHandle;
use prism_common::{Size, TextureFormat};

struct PooledTexture {
    handle: TextureHandle,
    size: Size,
    format: TextureFormat,
    last_used: u64,
}

/// Free list of intermediate "resource textures" reused across frames.
///
/// Textures that sit unused for more than `retention_frames` frames are
/// handed back for destruction.
pub(crate) struct TexturePool {
    free: Vec<PooledTexture>,
    retention_frames: u64,
}

impl TexturePool {
    pub(crate) fn new(retention_frames: u64) -> Self {
        Self {
            free: Vec::new(),
            retention_frames,
        }
    }

    pub(crate) fn take(&mut self, size: Size, format: TextureFormat) -> Option<TextureHandle> {
        let index = self
            .free
            .iter()
            .position(|t| t.size == size && t.format == format)?;
        Some(self.free.swap_remove(index).handle)
    }

    pub(crate) fn put(&mut self, handle: TextureHandle, size: Size, format: TextureFormat, frame: u64) {
        self.free.push(PooledTexture {
            handle,
            size,
            format,
            last_used: frame,
        });
    }

    /// Remove entries idle for longer than the retention window.
    pub(crate) fn evict(&mut self, frame: u64) -> Vec<TextureHandle> {
        let retention = self.retention_frames;
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.free.len());
        for entry in self.free.drain(..) {
            if frame.saturating_sub(entry.last_used) > retention {
                evicted.push(entry.handle);
            } else {
                kept.push(entry);
            }
        }
        self.free = kept;
        evicted
    }

    pub(crate) fn drain(&mut self) -> Vec<TextureHandle> {
        self.free.drain(..).map(|t| t.handle).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }
}
