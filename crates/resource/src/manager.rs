use crate::device::{
    Attachment, AttachmentSource, BackendHandle, BindTarget, BindTargets, BufferUsage, Device,
    DeviceCaps, DrawCall,
};
use crate::handle::{
    BufferHandle, BufferKey, FrameBufferHandle, FrameBufferKey, QueryHandle, QueryKey,
    ReleaseQueue, RenderBufferHandle, RenderBufferKey, ResourceKey, ResourceKind, Shared,
    TextureHandle, TextureKey,
};
use crate::pool::TexturePool;
use crate::state::{BindingState, ResourceObserver};
use prism_common::{Size, TextureFormat};
use slotmap::SlotMap;
use std::collections::HashMap;

/// Resource manager configuration.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Frames an unused pooled texture survives before it is destroyed.
    pub pool_retention_frames: u64,
    /// Lower the device's maximum texture size. Never raises it.
    pub max_texture_size: Option<u32>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            pool_retention_frames: 3,
            max_texture_size: None,
        }
    }
}

/// Non-fatal problems the manager has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Requests larger than the device limit that were clamped.
    pub clamped_requests: usize,
    /// Contract violations that were ignored in release builds.
    pub contract_violations: usize,
    /// Device refused to create an object.
    pub failed_allocations: usize,
}

/// Result of an "ensure" request on an existing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Dimensions and format matched; nothing was touched.
    Reused,
    /// Storage was resized in place; the backend handle is unchanged.
    Resized,
    /// A new backend object was created (the old one, if any, was released).
    Created,
    /// The device could not provide the object.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub backend: BackendHandle,
    pub size: Size,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBufferInfo {
    pub backend: BackendHandle,
    pub size: Size,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub backend: BackendHandle,
    pub usage: BufferUsage,
    pub targets: BindTargets,
    pub len: usize,
    pub mapped: bool,
}

/// Counts of live manager-owned objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCounts {
    pub textures: usize,
    pub render_buffers: usize,
    pub frame_buffers: usize,
    pub buffers: usize,
    pub queries: usize,
    pub pooled_textures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachmentRef {
    Texture(TextureKey),
    RenderBuffer(RenderBufferKey),
}

struct FrameBufferRecord {
    backend: BackendHandle,
    attachments: HashMap<Attachment, AttachmentRef>,
}

struct BufferRecord {
    backend: BackendHandle,
    usage: BufferUsage,
    targets: BindTargets,
    shadow: Vec<u8>,
    mapped: bool,
}

/// Single allocation authority for backend-resident objects.
///
/// Call sites request allocation, resize and release here and never create
/// or destroy backend objects themselves. Every backend handle is destroyed
/// exactly once, after observers have been told about it.
pub struct ResourceManager<D: Device> {
    device: D,
    caps: DeviceCaps,
    max_texture_size: u32,
    textures: SlotMap<TextureKey, TextureInfo>,
    render_buffers: SlotMap<RenderBufferKey, RenderBufferInfo>,
    frame_buffers: SlotMap<FrameBufferKey, FrameBufferRecord>,
    buffers: SlotMap<BufferKey, BufferRecord>,
    queries: SlotMap<QueryKey, BackendHandle>,
    releases: ReleaseQueue,
    state: BindingState,
    observers: Vec<Box<dyn ResourceObserver>>,
    pool: TexturePool,
    diagnostics: Diagnostics,
    frame: u64,
}

impl<D: Device> ResourceManager<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, ResourceConfig::default())
    }

    pub fn with_config(device: D, config: ResourceConfig) -> Self {
        let caps = device.caps();
        let max_texture_size = config
            .max_texture_size
            .map_or(caps.max_texture_size, |m| m.min(caps.max_texture_size));
        Self {
            device,
            caps,
            max_texture_size,
            textures: SlotMap::with_key(),
            render_buffers: SlotMap::with_key(),
            frame_buffers: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            queries: SlotMap::with_key(),
            releases: ReleaseQueue::default(),
            state: BindingState::new(caps.max_texture_units),
            observers: Vec::new(),
            pool: TexturePool::new(config.pool_retention_frames),
            diagnostics: Diagnostics::default(),
            frame: 0,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Direct device access for state and draw commands. Object lifetime
    /// must still go through the manager.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    pub fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    pub fn state(&self) -> &BindingState {
        &self.state
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn add_observer(&mut self, observer: Box<dyn ResourceObserver>) {
        self.observers.push(observer);
    }

    pub fn live_counts(&self) -> LiveCounts {
        LiveCounts {
            textures: self.textures.len(),
            render_buffers: self.render_buffers.len(),
            frame_buffers: self.frame_buffers.len(),
            buffers: self.buffers.len(),
            queries: self.queries.len(),
            pooled_textures: self.pool.len(),
        }
    }

    // --- Frame hooks ---

    pub fn begin_frame(&mut self) {
        self.collect_released();
    }

    /// Destroy released objects and evict idle pooled textures.
    pub fn end_frame(&mut self) {
        self.frame += 1;
        let evicted = self.pool.evict(self.frame);
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicting idle pooled textures");
        }
        drop(evicted);
        self.collect_released();
    }

    /// Drop a strong handle and destroy the object if it was the last one.
    pub fn release<K: ResourceKind>(&mut self, handle: Shared<K>) {
        drop(handle);
        self.collect_released();
    }

    /// Destroy every object whose last handle has been dropped.
    pub fn collect_released(&mut self) {
        loop {
            let keys = self.releases.take();
            if keys.is_empty() {
                break;
            }
            for key in keys {
                self.destroy(key);
            }
        }
    }

    // --- Textures ---

    pub fn allocate_texture(
        &mut self,
        size: Size,
        format: TextureFormat,
        pixels: Option<&[u8]>,
    ) -> Option<TextureHandle> {
        let clamped = self.clamp(size, "texture");
        if clamped.is_empty() {
            tracing::warn!(?size, "refusing to allocate an empty texture");
            return None;
        }
        let pixels = if clamped == size { pixels } else { None };
        let Some(backend) = self.device.create_texture(clamped, format, pixels) else {
            self.diagnostics.failed_allocations += 1;
            tracing::warn!(?clamped, ?format, "device refused texture");
            return None;
        };
        let key = self.textures.insert(TextureInfo {
            backend,
            size: clamped,
            format,
        });
        Some(Shared::new(key, self.releases.clone()))
    }

    /// Replace the contents (and possibly dimensions) of a texture.
    pub fn upload_texture(
        &mut self,
        texture: TextureKey,
        size: Size,
        format: TextureFormat,
        pixels: &[u8],
    ) -> bool {
        let clamped = self.clamp(size, "texture upload");
        let Some(record) = self.textures.get_mut(texture) else {
            self.violation("upload to a texture that does not exist");
            return false;
        };
        record.size = clamped;
        record.format = format;
        let backend = record.backend;
        self.device.upload_texture(backend, clamped, format, pixels);
        true
    }

    /// Make `slot` hold a texture of exactly `size`/`format`.
    pub fn ensure_texture(
        &mut self,
        slot: &mut Option<TextureHandle>,
        size: Size,
        format: TextureFormat,
    ) -> EnsureOutcome {
        let size = self.clamp(size, "texture");
        if let Some(handle) = slot.as_ref()
            && let Some(info) = self.textures.get(handle.key())
            && info.size == size
            && info.format == format
        {
            return EnsureOutcome::Reused;
        }
        if let Some(old) = slot.take() {
            self.release(old);
        }
        match self.allocate_texture(size, format, None) {
            Some(handle) => {
                *slot = Some(handle);
                EnsureOutcome::Created
            }
            None => EnsureOutcome::Failed,
        }
    }

    pub fn texture_info(&self, texture: TextureKey) -> Option<TextureInfo> {
        self.textures.get(texture).copied()
    }

    /// Bind a texture to a unit, skipping the device call when cached.
    pub fn bind_texture(&mut self, unit: u32, texture: Option<TextureKey>) -> bool {
        if unit >= self.state.texture_unit_count() {
            self.violation("texture unit out of range");
            return false;
        }
        let backend = match texture {
            Some(key) => match self.textures.get(key) {
                Some(info) => Some(info.backend),
                None => {
                    self.violation("bind of a destroyed texture");
                    return false;
                }
            },
            None => None,
        };
        if self.state.set_texture(unit, texture) {
            self.device.bind_texture(unit, backend);
        }
        true
    }

    // --- Pooled resource textures ---

    /// Take a texture of the given shape from the pool, or allocate one.
    pub fn acquire_pooled_texture(
        &mut self,
        size: Size,
        format: TextureFormat,
    ) -> Option<TextureHandle> {
        let size = self.clamp(size, "pooled texture");
        if let Some(handle) = self.pool.take(size, format) {
            return Some(handle);
        }
        self.allocate_texture(size, format, None)
    }

    /// Return a texture to the pool for reuse on a later frame.
    pub fn recycle_texture(&mut self, handle: TextureHandle) {
        let Some(info) = self.textures.get(handle.key()).copied() else {
            self.violation("recycling a destroyed texture");
            return;
        };
        self.pool.put(handle, info.size, info.format, self.frame);
    }

    // --- Render buffers ---

    pub fn allocate_render_buffer(
        &mut self,
        size: Size,
        format: TextureFormat,
    ) -> Option<RenderBufferHandle> {
        let size = self.clamp(size, "render buffer");
        if size.is_empty() {
            tracing::warn!("refusing to allocate an empty render buffer");
            return None;
        }
        let Some(backend) = self.device.create_render_buffer(size, format) else {
            self.diagnostics.failed_allocations += 1;
            return None;
        };
        let key = self.render_buffers.insert(RenderBufferInfo {
            backend,
            size,
            format,
        });
        Some(Shared::new(key, self.releases.clone()))
    }

    /// Make `slot` hold a render buffer of `size`/`format`.
    ///
    /// Unchanged requests are no-ops. Dimension changes resize in place when
    /// the device supports it. Format changes always recreate.
    pub fn ensure_render_buffer(
        &mut self,
        slot: &mut Option<RenderBufferHandle>,
        size: Size,
        format: TextureFormat,
    ) -> EnsureOutcome {
        let size = self.clamp(size, "render buffer");
        if let Some(handle) = slot.as_ref()
            && let Some(info) = self.render_buffers.get_mut(handle.key())
        {
            if info.size == size && info.format == format {
                return EnsureOutcome::Reused;
            }
            if info.format == format
                && !size.is_empty()
                && self.device.resize_render_buffer(info.backend, size, format)
            {
                info.size = size;
                return EnsureOutcome::Resized;
            }
        }
        if let Some(old) = slot.take() {
            self.release(old);
        }
        match self.allocate_render_buffer(size, format) {
            Some(handle) => {
                *slot = Some(handle);
                EnsureOutcome::Created
            }
            None => EnsureOutcome::Failed,
        }
    }

    pub fn render_buffer_info(&self, buffer: RenderBufferKey) -> Option<RenderBufferInfo> {
        self.render_buffers.get(buffer).copied()
    }

    // --- Frame buffers ---

    pub fn allocate_frame_buffer(&mut self) -> Option<FrameBufferHandle> {
        let Some(backend) = self.device.create_frame_buffer() else {
            self.diagnostics.failed_allocations += 1;
            return None;
        };
        let key = self.frame_buffers.insert(FrameBufferRecord {
            backend,
            attachments: HashMap::new(),
        });
        Some(Shared::new(key, self.releases.clone()))
    }

    /// Attach (or with `None`, detach) a texture. The frame buffer holds a
    /// non-owning view; the caller keeps the texture alive.
    pub fn attach_texture(
        &mut self,
        frame_buffer: FrameBufferKey,
        attachment: Attachment,
        texture: Option<TextureKey>,
    ) -> bool {
        let source = match texture {
            Some(key) => match self.textures.get(key) {
                Some(info) => AttachmentSource::Texture(info.backend),
                None => {
                    self.violation("attaching a destroyed texture");
                    return false;
                }
            },
            None => AttachmentSource::Detached,
        };
        self.set_attachment(frame_buffer, attachment, texture.map(AttachmentRef::Texture), source)
    }

    pub fn attach_render_buffer(
        &mut self,
        frame_buffer: FrameBufferKey,
        attachment: Attachment,
        buffer: Option<RenderBufferKey>,
    ) -> bool {
        let source = match buffer {
            Some(key) => match self.render_buffers.get(key) {
                Some(info) => AttachmentSource::RenderBuffer(info.backend),
                None => {
                    self.violation("attaching a destroyed render buffer");
                    return false;
                }
            },
            None => AttachmentSource::Detached,
        };
        self.set_attachment(
            frame_buffer,
            attachment,
            buffer.map(AttachmentRef::RenderBuffer),
            source,
        )
    }

    pub fn bind_frame_buffer(&mut self, frame_buffer: Option<FrameBufferKey>) -> bool {
        let backend = match frame_buffer {
            Some(key) => match self.frame_buffers.get(key) {
                Some(record) => Some(record.backend),
                None => {
                    self.violation("bind of a destroyed frame buffer");
                    return false;
                }
            },
            None => None,
        };
        if self.state.set_frame_buffer(frame_buffer) {
            self.device.bind_frame_buffer(backend);
        }
        true
    }

    pub fn frame_buffer_backend(&self, frame_buffer: FrameBufferKey) -> Option<BackendHandle> {
        self.frame_buffers.get(frame_buffer).map(|r| r.backend)
    }

    pub fn frame_buffer_attachment_count(&self, frame_buffer: FrameBufferKey) -> usize {
        self.frame_buffers
            .get(frame_buffer)
            .map_or(0, |r| r.attachments.len())
    }

    // --- Drawable buffers ---

    pub fn allocate_buffer(
        &mut self,
        usage: BufferUsage,
        targets: BindTargets,
        data: &[u8],
    ) -> Option<BufferHandle> {
        let Some(backend) = self.device.create_buffer(usage, targets, data) else {
            self.diagnostics.failed_allocations += 1;
            return None;
        };
        let key = self.buffers.insert(BufferRecord {
            backend,
            usage,
            targets,
            shadow: data.to_vec(),
            mapped: false,
        });
        Some(Shared::new(key, self.releases.clone()))
    }

    pub fn update_buffer(&mut self, buffer: BufferKey, offset: usize, data: &[u8]) -> bool {
        let Some(record) = self.buffers.get_mut(buffer) else {
            self.violation("update of a destroyed buffer");
            return false;
        };
        if record.mapped {
            self.violation("update of a mapped buffer");
            return false;
        }
        let Some(end) = offset.checked_add(data.len()) else {
            self.violation("buffer update range overflows");
            return false;
        };
        if record.shadow.len() < end {
            record.shadow.resize(end, 0);
        }
        record.shadow[offset..end].copy_from_slice(data);
        let backend = record.backend;
        self.device.update_buffer(backend, offset, data);
        true
    }

    /// Lock a buffer for CPU writes. The buffer cannot be bound until
    /// [`unmap_buffer`](Self::unmap_buffer) is called.
    pub fn map_buffer(&mut self, buffer: BufferKey) -> Option<&mut [u8]> {
        let already_mapped = match self.buffers.get(buffer) {
            Some(record) => record.mapped,
            None => {
                self.violation("map of a destroyed buffer");
                return None;
            }
        };
        if already_mapped {
            self.violation("buffer mapped twice");
            return None;
        }
        let record = self.buffers.get_mut(buffer)?;
        record.mapped = true;
        Some(record.shadow.as_mut_slice())
    }

    /// Unlock a mapped buffer and upload what the CPU wrote.
    pub fn unmap_buffer(&mut self, buffer: BufferKey) -> bool {
        let Some(record) = self.buffers.get_mut(buffer) else {
            self.violation("unmap of a destroyed buffer");
            return false;
        };
        if !record.mapped {
            self.violation("unmap of a buffer that is not mapped");
            return false;
        }
        record.mapped = false;
        let backend = record.backend;
        self.device.update_buffer(backend, 0, &record.shadow);
        true
    }

    /// Bind a buffer. Binding a mapped buffer is a contract violation.
    pub fn bind_buffer(&mut self, target: BindTarget, buffer: Option<BufferKey>) -> bool {
        let backend = match buffer {
            Some(key) => {
                let Some(record) = self.buffers.get(key) else {
                    self.violation("bind of a destroyed buffer");
                    return false;
                };
                if record.mapped {
                    self.violation("bind of a buffer that is mapped for CPU writes");
                    return false;
                }
                if !record.targets.contains(target) {
                    self.violation("bind to a target the buffer was not created for");
                    return false;
                }
                Some(record.backend)
            }
            None => None,
        };
        if self.state.set_buffer(target, buffer) {
            self.device.bind_buffer(target, backend);
        }
        true
    }

    pub fn buffer_info(&self, buffer: BufferKey) -> Option<BufferInfo> {
        self.buffers.get(buffer).map(|r| BufferInfo {
            backend: r.backend,
            usage: r.usage,
            targets: r.targets,
            len: r.shadow.len(),
            mapped: r.mapped,
        })
    }

    // --- Drawing ---

    pub fn set_viewport(&mut self, size: Size) {
        self.device.set_viewport(size);
    }

    pub fn clear(&mut self, color: [f32; 4]) {
        self.device.clear(color);
    }

    /// Draw with the currently bound buffers. Drawing while one of them is
    /// mapped is a contract violation.
    pub fn draw(&mut self, call: &DrawCall) -> bool {
        for target in [BindTarget::Vertex, BindTarget::Index] {
            let mapped = self
                .state
                .buffer(target)
                .and_then(|key| self.buffers.get(key))
                .is_some_and(|record| record.mapped);
            if mapped {
                self.violation("draw from a buffer that is mapped for CPU writes");
                return false;
            }
        }
        self.device.draw(call);
        true
    }

    // --- Queries ---

    /// Occlusion query, or `None` when the device has no support.
    pub fn create_query(&mut self) -> Option<QueryHandle> {
        if !self.caps.occlusion_queries {
            return None;
        }
        let backend = self.device.create_query()?;
        let key = self.queries.insert(backend);
        Some(Shared::new(key, self.releases.clone()))
    }

    // --- Internals ---

    fn clamp(&mut self, size: Size, what: &str) -> Size {
        let clamped = size.clamped(self.max_texture_size);
        if clamped != size {
            self.diagnostics.clamped_requests += 1;
            tracing::error!(
                requested = ?size,
                max = self.max_texture_size,
                "{what} exceeds the device maximum, clamping"
            );
        }
        clamped
    }

    fn violation(&mut self, what: &str) {
        self.diagnostics.contract_violations += 1;
        tracing::error!("resource contract violation: {what}");
        debug_assert!(false, "resource contract violation: {what}");
    }

    fn set_attachment(
        &mut self,
        frame_buffer: FrameBufferKey,
        attachment: Attachment,
        target: Option<AttachmentRef>,
        source: AttachmentSource,
    ) -> bool {
        let Some(record) = self.frame_buffers.get_mut(frame_buffer) else {
            self.violation("attach to a destroyed frame buffer");
            return false;
        };
        let current = record.attachments.get(&attachment).copied();
        if current == target {
            return true;
        }
        match target {
            Some(t) => record.attachments.insert(attachment, t),
            None => record.attachments.remove(&attachment),
        };
        let backend = record.backend;
        self.device.attach(backend, attachment, source);
        true
    }

    fn detach_everywhere(&mut self, target: AttachmentRef) {
        for record in self.frame_buffers.values_mut() {
            record.attachments.retain(|_, a| *a != target);
        }
    }

    fn destroy(&mut self, key: ResourceKey) {
        match key {
            ResourceKey::Texture(k) => {
                if !self.textures.contains_key(k) {
                    return self.violation("texture destroyed twice");
                }
                self.state.texture_destroyed(k);
                for observer in &mut self.observers {
                    observer.texture_destroyed(k);
                }
                self.detach_everywhere(AttachmentRef::Texture(k));
                if let Some(info) = self.textures.remove(k) {
                    self.device.destroy_texture(info.backend);
                }
            }
            ResourceKey::RenderBuffer(k) => {
                if !self.render_buffers.contains_key(k) {
                    return self.violation("render buffer destroyed twice");
                }
                self.state.render_buffer_destroyed(k);
                for observer in &mut self.observers {
                    observer.render_buffer_destroyed(k);
                }
                self.detach_everywhere(AttachmentRef::RenderBuffer(k));
                if let Some(info) = self.render_buffers.remove(k) {
                    self.device.destroy_render_buffer(info.backend);
                }
            }
            ResourceKey::FrameBuffer(k) => {
                if !self.frame_buffers.contains_key(k) {
                    return self.violation("frame buffer destroyed twice");
                }
                self.state.frame_buffer_destroyed(k);
                for observer in &mut self.observers {
                    observer.frame_buffer_destroyed(k);
                }
                if let Some(record) = self.frame_buffers.remove(k) {
                    self.device.destroy_frame_buffer(record.backend);
                }
            }
            ResourceKey::Buffer(k) => {
                if !self.buffers.contains_key(k) {
                    return self.violation("buffer destroyed twice");
                }
                self.state.buffer_destroyed(k);
                for observer in &mut self.observers {
                    observer.buffer_destroyed(k);
                }
                if let Some(record) = self.buffers.remove(k) {
                    self.device.destroy_buffer(record.backend);
                }
            }
            ResourceKey::Query(k) => {
                if let Some(backend) = self.queries.remove(k) {
                    self.device.destroy_query(backend);
                } else {
                    self.violation("query destroyed twice");
                }
            }
        }
    }
}

impl<D: Device> Drop for ResourceManager<D> {
    fn drop(&mut self) {
        drop(self.pool.drain());
        self.collect_released();
        // Objects still referenced by outstanding handles die with the device.
        for (_, info) in self.textures.drain() {
            self.device.destroy_texture(info.backend);
        }
        for (_, info) in self.render_buffers.drain() {
            self.device.destroy_render_buffer(info.backend);
        }
        for (_, record) in self.frame_buffers.drain() {
            self.device.destroy_frame_buffer(record.backend);
        }
        for (_, record) in self.buffers.drain() {
            self.device.destroy_buffer(record.backend);
        }
        for (_, backend) in self.queries.drain() {
            self.device.destroy_query(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceCall, HeadlessDevice, Journal};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn manager() -> ResourceManager<HeadlessDevice> {
        ResourceManager::new(HeadlessDevice::new())
    }

    struct RecordingObserver {
        journal: Journal,
        seen: Rc<RefCell<Vec<(String, usize)>>>,
    }

    impl ResourceObserver for RecordingObserver {
        fn texture_destroyed(&mut self, _key: TextureKey) {
            self.seen
                .borrow_mut()
                .push(("texture".into(), self.journal.len()));
        }

        fn render_buffer_destroyed(&mut self, _key: RenderBufferKey) {
            self.seen
                .borrow_mut()
                .push(("render_buffer".into(), self.journal.len()));
        }

        fn buffer_destroyed(&mut self, _key: BufferKey) {
            self.seen
                .borrow_mut()
                .push(("buffer".into(), self.journal.len()));
        }
    }

    #[test]
    fn unchanged_render_buffer_request_reuses_handle() {
        let mut mgr = manager();
        let mut slot = None;
        let size = Size::new(640, 480);
        assert_eq!(
            mgr.ensure_render_buffer(&mut slot, size, TextureFormat::Depth24),
            EnsureOutcome::Created
        );
        let backend = mgr.render_buffer_info(slot.as_ref().unwrap().key()).unwrap().backend;

        assert_eq!(
            mgr.ensure_render_buffer(&mut slot, size, TextureFormat::Depth24),
            EnsureOutcome::Reused
        );
        let again = mgr.render_buffer_info(slot.as_ref().unwrap().key()).unwrap().backend;
        assert_eq!(backend, again);
        let creates = mgr
            .device()
            .journal()
            .count(|c| matches!(c, DeviceCall::CreateRenderBuffer(..)));
        assert_eq!(creates, 1);
    }

    #[test]
    fn format_change_reallocates() {
        let mut mgr = manager();
        let mut slot = None;
        let size = Size::new(64, 64);
        mgr.ensure_render_buffer(&mut slot, size, TextureFormat::Depth24);
        let first = mgr.render_buffer_info(slot.as_ref().unwrap().key()).unwrap().backend;

        assert_eq!(
            mgr.ensure_render_buffer(&mut slot, size, TextureFormat::Depth24Stencil8),
            EnsureOutcome::Created
        );
        let info = mgr.render_buffer_info(slot.as_ref().unwrap().key()).unwrap();
        assert_ne!(info.backend, first);
        assert_eq!(info.format, TextureFormat::Depth24Stencil8);
        assert!(!mgr.device().is_live(first));
        assert_eq!(mgr.live_counts().render_buffers, 1);
    }

    #[test]
    fn dimension_change_resizes_in_place_when_supported() {
        let mut mgr = manager();
        let mut slot = None;
        mgr.ensure_render_buffer(&mut slot, Size::new(64, 64), TextureFormat::Depth24);
        let first = mgr.render_buffer_info(slot.as_ref().unwrap().key()).unwrap().backend;

        assert_eq!(
            mgr.ensure_render_buffer(&mut slot, Size::new(128, 32), TextureFormat::Depth24),
            EnsureOutcome::Resized
        );
        let info = mgr.render_buffer_info(slot.as_ref().unwrap().key()).unwrap();
        assert_eq!(info.backend, first);
        assert_eq!(info.size, Size::new(128, 32));
    }

    #[test]
    fn dimension_change_recreates_without_resize_support() {
        let device = HeadlessDevice::with_caps(DeviceCaps {
            render_buffer_resize: false,
            ..DeviceCaps::default()
        });
        let mut mgr = ResourceManager::new(device);
        let mut slot = None;
        mgr.ensure_render_buffer(&mut slot, Size::new(64, 64), TextureFormat::Depth24);
        assert_eq!(
            mgr.ensure_render_buffer(&mut slot, Size::new(32, 32), TextureFormat::Depth24),
            EnsureOutcome::Created
        );
        assert_eq!(mgr.device().live_objects(), 1);
    }

    #[test]
    fn oversized_requests_are_clamped_not_rejected() {
        let device = HeadlessDevice::with_caps(DeviceCaps {
            max_texture_size: 1024,
            ..DeviceCaps::default()
        });
        let mut mgr = ResourceManager::new(device);
        let rb = mgr
            .allocate_render_buffer(Size::new(5000, 600), TextureFormat::Depth24)
            .unwrap();
        let info = mgr.render_buffer_info(rb.key()).unwrap();
        assert_eq!(info.size, Size::new(1024, 600));
        assert_eq!(mgr.diagnostics().clamped_requests, 1);

        let tex = mgr
            .allocate_texture(Size::new(2048, 2048), TextureFormat::Rgba8, None)
            .unwrap();
        assert_eq!(mgr.texture_info(tex.key()).unwrap().size, Size::new(1024, 1024));
    }

    #[test]
    fn config_can_lower_the_texture_limit() {
        let config = ResourceConfig {
            max_texture_size: Some(256),
            ..ResourceConfig::default()
        };
        let mgr = ResourceManager::with_config(HeadlessDevice::new(), config);
        assert_eq!(mgr.max_texture_size(), 256);
    }

    #[test]
    fn release_at_zero_notifies_before_destroying() {
        let mut mgr = manager();
        let journal = mgr.device().journal();
        let seen = Rc::new(RefCell::new(Vec::new()));
        mgr.add_observer(Box::new(RecordingObserver {
            journal: journal.clone(),
            seen: Rc::clone(&seen),
        }));

        let tex = mgr
            .allocate_texture(Size::new(8, 8), TextureFormat::Rgba8, None)
            .unwrap();
        let extra = tex.clone();
        mgr.release(tex);
        assert!(seen.borrow().is_empty());
        assert_eq!(mgr.live_counts().textures, 1);

        mgr.release(extra);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        let destroy_at = journal
            .position(|c| matches!(c, DeviceCall::DestroyTexture(_)))
            .unwrap();
        assert!(seen[0].1 <= destroy_at);
        assert_eq!(mgr.live_counts().textures, 0);
        assert_eq!(mgr.device().double_frees(), 0);
    }

    #[test]
    fn destroying_a_bound_texture_clears_the_cache() {
        let mut mgr = manager();
        let tex = mgr
            .allocate_texture(Size::new(8, 8), TextureFormat::Rgba8, None)
            .unwrap();
        assert!(mgr.bind_texture(2, Some(tex.key())));
        assert_eq!(mgr.state().texture(2), Some(tex.key()));
        mgr.release(tex);
        assert_eq!(mgr.state().texture(2), None);
    }

    #[test]
    fn redundant_texture_binds_skip_the_device() {
        let mut mgr = manager();
        let tex = mgr
            .allocate_texture(Size::new(8, 8), TextureFormat::Rgba8, None)
            .unwrap();
        mgr.bind_texture(0, Some(tex.key()));
        mgr.bind_texture(0, Some(tex.key()));
        let binds = mgr
            .device()
            .journal()
            .count(|c| matches!(c, DeviceCall::BindTexture(..)));
        assert_eq!(binds, 1);
    }

    #[test]
    fn dropped_handles_are_collected_on_begin_frame() {
        let mut mgr = manager();
        {
            let _fb = mgr.allocate_frame_buffer().unwrap();
        }
        assert_eq!(mgr.live_counts().frame_buffers, 1);
        mgr.begin_frame();
        assert_eq!(mgr.live_counts().frame_buffers, 0);
        assert_eq!(mgr.device().live_objects(), 0);
    }

    #[test]
    fn destroyed_attachments_are_detached() {
        let mut mgr = manager();
        let fb = mgr.allocate_frame_buffer().unwrap();
        let color = mgr
            .allocate_texture(Size::new(16, 16), TextureFormat::Rgba8, None)
            .unwrap();
        assert!(mgr.attach_texture(fb.key(), Attachment::Color0, Some(color.key())));
        assert_eq!(mgr.frame_buffer_attachment_count(fb.key()), 1);
        mgr.release(color);
        assert_eq!(mgr.frame_buffer_attachment_count(fb.key()), 0);
    }

    #[test]
    fn mapped_buffer_round_trip() {
        let mut mgr = manager();
        let vb = mgr
            .allocate_buffer(BufferUsage::Dynamic, BindTargets::VERTEX, &[0u8; 16])
            .unwrap();
        {
            let bytes = mgr.map_buffer(vb.key()).unwrap();
            bytes[0] = 42;
        }
        assert!(mgr.buffer_info(vb.key()).unwrap().mapped);
        assert!(mgr.unmap_buffer(vb.key()));
        assert!(mgr.bind_buffer(BindTarget::Vertex, Some(vb.key())));
        assert_eq!(mgr.state().buffer(BindTarget::Vertex), Some(vb.key()));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "mapped for CPU writes")]
    fn binding_a_mapped_buffer_asserts_in_debug() {
        let mut mgr = manager();
        let vb = mgr
            .allocate_buffer(BufferUsage::Dynamic, BindTargets::VERTEX, &[0u8; 16])
            .unwrap();
        mgr.map_buffer(vb.key());
        mgr.bind_buffer(BindTarget::Vertex, Some(vb.key()));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "buffer update range overflows")]
    fn overflowing_buffer_update_asserts_in_debug() {
        let mut mgr = manager();
        let vb = mgr
            .allocate_buffer(BufferUsage::Dynamic, BindTargets::VERTEX, &[0u8; 16])
            .unwrap();
        mgr.update_buffer(vb.key(), usize::MAX, &[1, 2]);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn overflowing_buffer_update_is_refused() {
        let mut mgr = manager();
        let vb = mgr
            .allocate_buffer(BufferUsage::Dynamic, BindTargets::VERTEX, &[0u8; 16])
            .unwrap();
        assert!(!mgr.update_buffer(vb.key(), usize::MAX, &[1, 2]));
        assert_eq!(mgr.diagnostics().contract_violations, 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "draw from a buffer that is mapped")]
    fn drawing_from_a_mapped_buffer_asserts_in_debug() {
        let mut mgr = manager();
        let vb = mgr
            .allocate_buffer(BufferUsage::Dynamic, BindTargets::VERTEX, &[0u8; 16])
            .unwrap();
        mgr.bind_buffer(BindTarget::Vertex, Some(vb.key()));
        let backend = mgr.buffer_info(vb.key()).unwrap().backend;
        mgr.map_buffer(vb.key());
        mgr.draw(&DrawCall {
            shader_key: 0,
            vertex_buffer: backend,
            index_buffer: None,
            first: 0,
            count: 3,
            world: glam::Mat4::IDENTITY,
            opacity: 1.0,
        });
    }

    #[test]
    fn draws_reach_the_device() {
        let mut mgr = manager();
        let journal = mgr.device().journal();
        mgr.set_viewport(Size::new(8, 8));
        mgr.clear([0.0, 0.0, 0.0, 1.0]);
        let call = DrawCall {
            shader_key: 7,
            vertex_buffer: BackendHandle(1),
            index_buffer: None,
            first: 0,
            count: 3,
            world: glam::Mat4::IDENTITY,
            opacity: 1.0,
        };
        assert!(mgr.draw(&call));
        assert_eq!(journal.count(|c| matches!(c, DeviceCall::Draw(_))), 1);
        assert_eq!(
            journal.count(|c| matches!(c, DeviceCall::Viewport(s) if *s == Size::new(8, 8))),
            1
        );
    }

    #[test]
    fn buffer_destroy_notifies_observers() {
        let mut mgr = manager();
        let journal = mgr.device().journal();
        let seen = Rc::new(RefCell::new(Vec::new()));
        mgr.add_observer(Box::new(RecordingObserver {
            journal,
            seen: Rc::clone(&seen),
        }));
        let ib = mgr
            .allocate_buffer(BufferUsage::Static, BindTargets::INDEX, &[0u8; 6])
            .unwrap();
        mgr.bind_buffer(BindTarget::Index, Some(ib.key()));
        mgr.release(ib);
        assert_eq!(seen.borrow()[0].0, "buffer");
        assert_eq!(mgr.state().buffer(BindTarget::Index), None);
    }

    #[test]
    fn pooled_textures_are_reused_then_evicted() {
        let config = ResourceConfig {
            pool_retention_frames: 2,
            ..ResourceConfig::default()
        };
        let mut mgr = ResourceManager::with_config(HeadlessDevice::new(), config);
        let size = Size::new(256, 256);

        let tex = mgr.acquire_pooled_texture(size, TextureFormat::Rgba8).unwrap();
        let key = tex.key();
        mgr.recycle_texture(tex);
        mgr.end_frame();

        let again = mgr.acquire_pooled_texture(size, TextureFormat::Rgba8).unwrap();
        assert_eq!(again.key(), key);
        mgr.recycle_texture(again);

        for _ in 0..4 {
            mgr.end_frame();
        }
        assert_eq!(mgr.live_counts().pooled_textures, 0);
        assert_eq!(mgr.live_counts().textures, 0);
    }

    #[test]
    fn queries_are_unavailable_without_support() {
        let mut mgr = manager();
        assert!(mgr.create_query().is_none());

        let device = HeadlessDevice::with_caps(DeviceCaps {
            occlusion_queries: true,
            ..DeviceCaps::default()
        });
        let mut mgr = ResourceManager::new(device);
        let query = mgr.create_query().unwrap();
        mgr.release(query);
        assert_eq!(mgr.live_counts().queries, 0);
    }

    #[test]
    fn dropping_the_manager_frees_everything() {
        let device = HeadlessDevice::new();
        let journal = device.journal();
        let mut mgr = ResourceManager::new(device);
        let _tex = mgr
            .allocate_texture(Size::new(4, 4), TextureFormat::Rgba8, None)
            .unwrap();
        let _rb = mgr
            .allocate_render_buffer(Size::new(4, 4), TextureFormat::Depth16)
            .unwrap();
        drop(mgr);
        assert_eq!(
            journal.count(|c| matches!(
                c,
                DeviceCall::DestroyTexture(_) | DeviceCall::DestroyRenderBuffer(_)
            )),
            2
        );
    }
}
