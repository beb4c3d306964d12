use crate::device::{
    Attachment, AttachmentSource, BackendHandle, BindTarget, BindTargets, BufferUsage, Device,
    DeviceCaps, DrawCall,
};
use prism_common::{Size, TextureFormat};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// A call recorded by [`HeadlessDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateTexture(BackendHandle, Size, TextureFormat),
    UploadTexture(BackendHandle, Size),
    DestroyTexture(BackendHandle),
    CreateRenderBuffer(BackendHandle, Size, TextureFormat),
    ResizeRenderBuffer(BackendHandle, Size, TextureFormat),
    DestroyRenderBuffer(BackendHandle),
    CreateFrameBuffer(BackendHandle),
    Attach(BackendHandle, Attachment, AttachmentSource),
    DestroyFrameBuffer(BackendHandle),
    CreateBuffer(BackendHandle, BufferUsage, usize),
    UpdateBuffer(BackendHandle, usize, usize),
    DestroyBuffer(BackendHandle),
    CreateQuery(BackendHandle),
    DestroyQuery(BackendHandle),
    BindBuffer(BindTarget, Option<BackendHandle>),
    BindFrameBuffer(Option<BackendHandle>),
    BindTexture(u32, Option<BackendHandle>),
    Viewport(Size),
    Clear([f32; 4]),
    Draw(DrawCall),
}

/// Shared, clonable view of the calls a headless device has received.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<DeviceCall>>>);

impl Journal {
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.0.borrow().clone()
    }

    /// Count calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.0.borrow().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&DeviceCall) -> bool) -> Option<usize> {
        self.0.borrow().iter().position(pred)
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    fn push(&self, call: DeviceCall) {
        self.0.borrow_mut().push(call);
    }
}

/// Device that allocates names and records calls without a GPU.
///
/// Used by tests and the CLI. Destroying a handle that is not live is
/// reported as a double free.
#[derive(Debug)]
pub struct HeadlessDevice {
    caps: DeviceCaps,
    next_handle: u64,
    live: HashSet<BackendHandle>,
    journal: Journal,
    double_frees: usize,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps::default())
    }

    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            next_handle: 1,
            live: HashSet::new(),
            journal: Journal::default(),
            double_frees: 0,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Number of backend objects currently alive.
    pub fn live_objects(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, handle: BackendHandle) -> bool {
        self.live.contains(&handle)
    }

    pub fn double_frees(&self) -> usize {
        self.double_frees
    }

    fn allocate(&mut self) -> BackendHandle {
        let handle = BackendHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle);
        handle
    }

    fn free(&mut self, handle: BackendHandle) {
        if !self.live.remove(&handle) {
            self.double_frees += 1;
            tracing::error!(?handle, "headless device: destroy of dead handle");
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for HeadlessDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_texture(
        &mut self,
        size: Size,
        format: TextureFormat,
        _pixels: Option<&[u8]>,
    ) -> Option<BackendHandle> {
        if size.width > self.caps.max_texture_size || size.height > self.caps.max_texture_size {
            return None;
        }
        let handle = self.allocate();
        self.journal
            .push(DeviceCall::CreateTexture(handle, size, format));
        Some(handle)
    }

    fn upload_texture(
        &mut self,
        texture: BackendHandle,
        size: Size,
        _format: TextureFormat,
        _pixels: &[u8],
    ) {
        self.journal.push(DeviceCall::UploadTexture(texture, size));
    }

    fn destroy_texture(&mut self, texture: BackendHandle) {
        self.free(texture);
        self.journal.push(DeviceCall::DestroyTexture(texture));
    }

    fn create_render_buffer(
        &mut self,
        size: Size,
        format: TextureFormat,
    ) -> Option<BackendHandle> {
        let handle = self.allocate();
        self.journal
            .push(DeviceCall::CreateRenderBuffer(handle, size, format));
        Some(handle)
    }

    fn resize_render_buffer(
        &mut self,
        buffer: BackendHandle,
        size: Size,
        format: TextureFormat,
    ) -> bool {
        if !self.caps.render_buffer_resize {
            return false;
        }
        self.journal
            .push(DeviceCall::ResizeRenderBuffer(buffer, size, format));
        true
    }

    fn destroy_render_buffer(&mut self, buffer: BackendHandle) {
        self.free(buffer);
        self.journal.push(DeviceCall::DestroyRenderBuffer(buffer));
    }

    fn create_frame_buffer(&mut self) -> Option<BackendHandle> {
        let handle = self.allocate();
        self.journal.push(DeviceCall::CreateFrameBuffer(handle));
        Some(handle)
    }

    fn attach(
        &mut self,
        frame_buffer: BackendHandle,
        attachment: Attachment,
        source: AttachmentSource,
    ) {
        self.journal
            .push(DeviceCall::Attach(frame_buffer, attachment, source));
    }

    fn destroy_frame_buffer(&mut self, frame_buffer: BackendHandle) {
        self.free(frame_buffer);
        self.journal
            .push(DeviceCall::DestroyFrameBuffer(frame_buffer));
    }

    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        _targets: BindTargets,
        data: &[u8],
    ) -> Option<BackendHandle> {
        let handle = self.allocate();
        self.journal
            .push(DeviceCall::CreateBuffer(handle, usage, data.len()));
        Some(handle)
    }

    fn update_buffer(&mut self, buffer: BackendHandle, offset: usize, data: &[u8]) {
        self.journal
            .push(DeviceCall::UpdateBuffer(buffer, offset, data.len()));
    }

    fn destroy_buffer(&mut self, buffer: BackendHandle) {
        self.free(buffer);
        self.journal.push(DeviceCall::DestroyBuffer(buffer));
    }

    fn create_query(&mut self) -> Option<BackendHandle> {
        if !self.caps.occlusion_queries {
            return None;
        }
        let handle = self.allocate();
        self.journal.push(DeviceCall::CreateQuery(handle));
        Some(handle)
    }

    fn destroy_query(&mut self, query: BackendHandle) {
        self.free(query);
        self.journal.push(DeviceCall::DestroyQuery(query));
    }

    fn bind_buffer(&mut self, target: BindTarget, buffer: Option<BackendHandle>) {
        self.journal.push(DeviceCall::BindBuffer(target, buffer));
    }

    fn bind_frame_buffer(&mut self, frame_buffer: Option<BackendHandle>) {
        self.journal.push(DeviceCall::BindFrameBuffer(frame_buffer));
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<BackendHandle>) {
        self.journal.push(DeviceCall::BindTexture(unit, texture));
    }

    fn set_viewport(&mut self, size: Size) {
        self.journal.push(DeviceCall::Viewport(size));
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.journal.push(DeviceCall::Clear(color));
    }

    fn draw(&mut self, call: &DrawCall) {
        self.journal.push(DeviceCall::Draw(call.clone()));
    }
}
