//! Image and mesh caches on top of the resource manager.
//!
//! Lives on the render thread. Worker threads never see it: they hand decoded
//! pixels and geometry to the loader, which feeds them in here while draining
//! completions.

use crate::AssetError;
use crate::import::{DecodedImage, ImporterRegistry, decode_image};
use crate::mesh::{Bounds, MeshData, MeshSubset};
use crate::streams::InputStreamFactory;
use prism_common::Size;
use prism_resource::{
    BindTargets, BufferHandle, BufferKey, BufferUsage, Device, ResourceManager, TextureHandle,
    TextureKey,
};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

pub const CUBE_PRIMITIVE: &str = "#Cube";
pub const RECTANGLE_PRIMITIVE: &str = "#Rectangle";

/// Where an image is in its load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Pending,
    Loaded,
    Failed,
    /// A pending load was cancelled. Only an explicit request loads it again.
    Cancelled,
}

/// The texture to sample for an image path this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedImage {
    pub texture: TextureKey,
    pub size: Size,
    pub placeholder: bool,
}

#[derive(Debug)]
struct ImageEntry {
    status: ImageStatus,
    texture: Option<TextureHandle>,
    size: Size,
    /// Image shown while this one is pending or after it failed.
    placeholder: Option<Arc<str>>,
}

/// Geometry resident in backend buffers, shared by every model using the
/// same mesh path.
#[derive(Debug)]
pub struct RenderMesh {
    pub path: Arc<str>,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    pub subsets: Vec<MeshSubset>,
    pub bounds: Bounds,
}

impl RenderMesh {
    pub fn vertex_key(&self) -> BufferKey {
        self.vertex_buffer.key()
    }

    pub fn index_key(&self) -> BufferKey {
        self.index_buffer.key()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub images: usize,
    pub pending_images: usize,
    pub failed_images: usize,
    pub meshes: usize,
    pub failed_meshes: usize,
}

/// Caches images and meshes by path.
pub struct BufferManager {
    streams: Arc<dyn InputStreamFactory>,
    importers: Arc<ImporterRegistry>,
    placeholder: Option<(TextureHandle, Size)>,
    images: HashMap<Arc<str>, ImageEntry>,
    meshes: HashMap<Arc<str>, Rc<RenderMesh>>,
    pending_meshes: HashSet<Arc<str>>,
    failed_meshes: HashSet<Arc<str>>,
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("images", &self.images.len())
            .field("meshes", &self.meshes.len())
            .field("importers", &self.importers)
            .finish_non_exhaustive()
    }
}

impl BufferManager {
    pub fn new(streams: Arc<dyn InputStreamFactory>, importers: ImporterRegistry) -> Self {
        Self {
            streams,
            importers: Arc::new(importers),
            placeholder: None,
            images: HashMap::new(),
            meshes: HashMap::new(),
            pending_meshes: HashSet::new(),
            failed_meshes: HashSet::new(),
        }
    }

    pub fn streams(&self) -> Arc<dyn InputStreamFactory> {
        Arc::clone(&self.streams)
    }

    pub fn importers(&self) -> Arc<ImporterRegistry> {
        Arc::clone(&self.importers)
    }

    pub fn stats(&self) -> BufferStats {
        let count = |status: ImageStatus| {
            self.images
                .values()
                .filter(|e| e.status == status)
                .count()
        };
        BufferStats {
            images: self.images.len(),
            pending_images: count(ImageStatus::Pending),
            failed_images: count(ImageStatus::Failed),
            meshes: self.meshes.len(),
            failed_meshes: self.failed_meshes.len(),
        }
    }

    // --- images ---------------------------------------------------------

    /// Create the default placeholder: a 2x2 magenta and white checker.
    pub fn create_placeholder<D: Device>(&mut self, resources: &mut ResourceManager<D>) -> bool {
        const M: [u8; 4] = [255, 0, 255, 255];
        const W: [u8; 4] = [255, 255, 255, 255];
        let pixels = [M, W, W, M].concat();
        let size = Size::new(2, 2);
        let Some(texture) =
            resources.allocate_texture(size, prism_common::TextureFormat::Rgba8, Some(&pixels))
        else {
            tracing::warn!("device refused the placeholder texture");
            return false;
        };
        self.placeholder = Some((texture, size));
        true
    }

    pub fn placeholder(&self) -> Option<TextureKey> {
        self.placeholder.as_ref().map(|(t, _)| t.key())
    }

    /// Mark `path` as loading. An already loaded image stays loaded.
    pub fn mark_pending(&mut self, path: &str, placeholder: Option<&str>) {
        let placeholder: Option<Arc<str>> = placeholder.map(Arc::from);
        match self.images.get_mut(path) {
            Some(entry) => {
                if entry.status != ImageStatus::Loaded {
                    entry.status = ImageStatus::Pending;
                }
                if placeholder.is_some() {
                    entry.placeholder = placeholder;
                }
            }
            None => {
                self.images.insert(
                    Arc::from(path),
                    ImageEntry {
                        status: ImageStatus::Pending,
                        texture: None,
                        size: Size::default(),
                        placeholder,
                    },
                );
            }
        }
    }

    /// Record that a pending load was cancelled.
    pub fn cancel_pending(&mut self, path: &str) {
        if let Some(entry) = self.images.get_mut(path)
            && entry.status == ImageStatus::Pending
        {
            entry.status = ImageStatus::Cancelled;
        }
    }

    pub fn image_status(&self, path: &str) -> Option<ImageStatus> {
        self.images.get(path).map(|e| e.status)
    }

    /// Upload decoded pixels for `path`. Returns `false` if the device
    /// refused, in which case the image is marked failed.
    pub fn upload_image<D: Device>(
        &mut self,
        resources: &mut ResourceManager<D>,
        path: &str,
        image: &DecodedImage,
    ) -> bool {
        let texture = resources.allocate_texture(image.size, image.format, Some(&image.pixels));
        let Some(texture) = texture else {
            self.mark_failed(path);
            return false;
        };
        let size = resources
            .texture_info(texture.key())
            .map_or(image.size, |info| info.size);
        let entry = self
            .images
            .entry(Arc::from(path))
            .or_insert_with(|| ImageEntry {
                status: ImageStatus::Pending,
                texture: None,
                size,
                placeholder: None,
            });
        entry.status = ImageStatus::Loaded;
        entry.texture = Some(texture);
        entry.size = size;
        true
    }

    pub fn mark_failed(&mut self, path: &str) {
        let entry = self
            .images
            .entry(Arc::from(path))
            .or_insert_with(|| ImageEntry {
                status: ImageStatus::Failed,
                texture: None,
                size: Size::default(),
                placeholder: None,
            });
        entry.status = ImageStatus::Failed;
        entry.texture = None;
    }

    /// Load, decode and upload on the calling thread.
    pub fn load_image_sync<D: Device>(
        &mut self,
        resources: &mut ResourceManager<D>,
        path: &str,
    ) -> ImageStatus {
        if self.image_status(path) == Some(ImageStatus::Loaded) {
            return ImageStatus::Loaded;
        }
        let decoded = self
            .streams
            .read_all(path)
            .and_then(|bytes| decode_image(&bytes));
        match decoded {
            Ok(image) if self.upload_image(resources, path, &image) => ImageStatus::Loaded,
            Ok(_) => ImageStatus::Failed,
            Err(e) => {
                tracing::warn!(path, error = %e, "image load failed");
                self.mark_failed(path);
                ImageStatus::Failed
            }
        }
    }

    /// The texture to sample for `path`: the real texture once loaded, the
    /// placeholder otherwise. `None` only when there is no placeholder yet.
    pub fn resolve_image(&self, path: &str) -> Option<ResolvedImage> {
        if let Some(entry) = self.images.get(path) {
            if let Some(texture) = &entry.texture {
                return Some(ResolvedImage {
                    texture: texture.key(),
                    size: entry.size,
                    placeholder: false,
                });
            }
            if let Some(custom) = entry
                .placeholder
                .as_deref()
                .and_then(|p| self.images.get(p))
                .and_then(|e| e.texture.as_ref().map(|t| (t.key(), e.size)))
            {
                return Some(ResolvedImage {
                    texture: custom.0,
                    size: custom.1,
                    placeholder: true,
                });
            }
        }
        self.placeholder.as_ref().map(|(texture, size)| ResolvedImage {
            texture: texture.key(),
            size: *size,
            placeholder: true,
        })
    }

    /// Drop the cached texture for `path`. The backend texture goes away once
    /// nothing else holds it.
    pub fn release_image(&mut self, path: &str) -> bool {
        self.images.remove(path).is_some()
    }

    // --- meshes ---------------------------------------------------------

    /// The cached mesh for `path`, if resident.
    pub fn mesh(&self, path: &str) -> Option<Rc<RenderMesh>> {
        self.meshes.get(path).cloned()
    }

    pub fn is_mesh_pending(&self, path: &str) -> bool {
        self.pending_meshes.contains(path)
    }

    pub fn is_mesh_failed(&self, path: &str) -> bool {
        self.failed_meshes.contains(path)
    }

    /// Returns `false` if the mesh is already resident, pending or failed.
    pub fn mark_mesh_pending(&mut self, path: &str) -> bool {
        if self.meshes.contains_key(path)
            || self.failed_meshes.contains(path)
            || self.pending_meshes.contains(path)
        {
            return false;
        }
        self.pending_meshes.insert(Arc::from(path));
        true
    }

    /// Load a mesh on the calling thread, or return the cached one. Identical
    /// paths always yield the identical shared mesh.
    pub fn load_mesh<D: Device>(
        &mut self,
        resources: &mut ResourceManager<D>,
        path: &str,
    ) -> Option<Rc<RenderMesh>> {
        if let Some(mesh) = self.meshes.get(path) {
            return Some(Rc::clone(mesh));
        }
        if self.failed_meshes.contains(path) {
            return None;
        }
        let data = match path {
            CUBE_PRIMITIVE => Ok(MeshData::cube()),
            RECTANGLE_PRIMITIVE => Ok(MeshData::rectangle()),
            _ => self.read_mesh(path),
        };
        match data {
            Ok(data) => self.insert_mesh(resources, path, &data),
            Err(e) => {
                tracing::warn!(path, error = %e, "mesh load failed");
                self.mark_mesh_failed(path);
                None
            }
        }
    }

    /// Upload geometry for `path` and cache it.
    pub fn insert_mesh<D: Device>(
        &mut self,
        resources: &mut ResourceManager<D>,
        path: &str,
        data: &MeshData,
    ) -> Option<Rc<RenderMesh>> {
        self.pending_meshes.remove(path);
        if let Some(mesh) = self.meshes.get(path) {
            return Some(Rc::clone(mesh));
        }
        let vertex_buffer =
            resources.allocate_buffer(BufferUsage::Static, BindTargets::VERTEX, data.vertex_bytes());
        let index_buffer =
            resources.allocate_buffer(BufferUsage::Static, BindTargets::INDEX, data.index_bytes());
        let (Some(vertex_buffer), Some(index_buffer)) = (vertex_buffer, index_buffer) else {
            tracing::warn!(path, "device refused mesh buffers");
            self.mark_mesh_failed(path);
            return None;
        };
        let path: Arc<str> = Arc::from(path);
        let mesh = Rc::new(RenderMesh {
            path: Arc::clone(&path),
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            subsets: data.subsets.clone(),
            bounds: data.bounds(),
        });
        tracing::debug!(path = %path, vertices = mesh.vertex_count, "mesh resident");
        self.meshes.insert(path, Rc::clone(&mesh));
        Some(mesh)
    }

    pub fn mark_mesh_failed(&mut self, path: &str) {
        self.pending_meshes.remove(path);
        self.failed_meshes.insert(Arc::from(path));
    }

    pub fn release_mesh(&mut self, path: &str) -> bool {
        self.meshes.remove(path).is_some()
    }

    /// Drop every cached image and mesh, placeholder included.
    pub fn clear(&mut self) {
        self.images.clear();
        self.meshes.clear();
        self.pending_meshes.clear();
        self.failed_meshes.clear();
        self.placeholder = None;
    }

    fn read_mesh(&self, path: &str) -> Result<MeshData, AssetError> {
        let bytes = self.streams.read_all(path)?;
        self.importers.import(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::MemoryStreamFactory;
    use prism_resource::HeadlessDevice;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn setup() -> (BufferManager, ResourceManager<HeadlessDevice>, Arc<MemoryStreamFactory>) {
        let streams = Arc::new(MemoryStreamFactory::new());
        streams.insert("tex/a.png", png_bytes());
        streams.insert("tex/bad.png", b"garbage".to_vec());
        streams.insert("mesh/rect.mesh", MeshData::rectangle().encode().unwrap());
        let buffers = BufferManager::new(streams.clone(), ImporterRegistry::with_native());
        (buffers, ResourceManager::new(HeadlessDevice::new()), streams)
    }

    #[test]
    fn pending_images_resolve_to_placeholder() {
        let (mut buffers, mut resources, _) = setup();
        assert!(buffers.resolve_image("tex/a.png").is_none());
        assert!(buffers.create_placeholder(&mut resources));
        buffers.mark_pending("tex/a.png", None);

        let resolved = buffers.resolve_image("tex/a.png").unwrap();
        assert!(resolved.placeholder);
        assert_eq!(Some(resolved.texture), buffers.placeholder());

        assert_eq!(
            buffers.load_image_sync(&mut resources, "tex/a.png"),
            ImageStatus::Loaded
        );
        let resolved = buffers.resolve_image("tex/a.png").unwrap();
        assert!(!resolved.placeholder);
        assert_eq!(resolved.size, Size::new(4, 4));
    }

    #[test]
    fn cancelled_images_stay_cancelled_until_requested() {
        let (mut buffers, mut resources, _) = setup();
        buffers.create_placeholder(&mut resources);
        buffers.mark_pending("tex/a.png", None);
        buffers.cancel_pending("tex/a.png");
        assert_eq!(buffers.image_status("tex/a.png"), Some(ImageStatus::Cancelled));
        assert!(buffers.resolve_image("tex/a.png").unwrap().placeholder);
        assert_eq!(buffers.stats().pending_images, 0);

        buffers.mark_pending("tex/a.png", None);
        assert_eq!(buffers.image_status("tex/a.png"), Some(ImageStatus::Pending));
    }

    #[test]
    fn failed_images_keep_the_placeholder() {
        let (mut buffers, mut resources, _) = setup();
        buffers.create_placeholder(&mut resources);
        assert_eq!(
            buffers.load_image_sync(&mut resources, "tex/bad.png"),
            ImageStatus::Failed
        );
        let resolved = buffers.resolve_image("tex/bad.png").unwrap();
        assert!(resolved.placeholder);
        assert_eq!(buffers.stats().failed_images, 1);
    }

    #[test]
    fn custom_placeholder_is_used_when_loaded() {
        let (mut buffers, mut resources, _) = setup();
        buffers.create_placeholder(&mut resources);
        buffers.load_image_sync(&mut resources, "tex/a.png");
        buffers.mark_pending("tex/b.png", Some("tex/a.png"));
        let resolved = buffers.resolve_image("tex/b.png").unwrap();
        assert!(resolved.placeholder);
        assert_eq!(
            resolved.texture,
            buffers.resolve_image("tex/a.png").unwrap().texture
        );
    }

    #[test]
    fn identical_mesh_paths_share_one_mesh() {
        let (mut buffers, mut resources, _) = setup();
        let a = buffers.load_mesh(&mut resources, "mesh/rect.mesh").unwrap();
        let b = buffers.load_mesh(&mut resources, "mesh/rect.mesh").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(resources.live_counts().buffers, 2);
        assert_eq!(a.index_count, 6);
    }

    #[test]
    fn primitives_need_no_io() {
        let (mut buffers, mut resources, _) = setup();
        let cube = buffers.load_mesh(&mut resources, CUBE_PRIMITIVE).unwrap();
        assert_eq!(cube.index_count, 36);
        let rect = buffers
            .load_mesh(&mut resources, RECTANGLE_PRIMITIVE)
            .unwrap();
        assert_eq!(rect.vertex_count, 4);
    }

    #[test]
    fn missing_meshes_fail_once() {
        let (mut buffers, mut resources, streams) = setup();
        assert!(buffers.load_mesh(&mut resources, "mesh/none.mesh").is_none());
        assert!(buffers.is_mesh_failed("mesh/none.mesh"));
        streams.insert("mesh/none.mesh", MeshData::cube().encode().unwrap());
        assert!(buffers.load_mesh(&mut resources, "mesh/none.mesh").is_none());
    }

    #[test]
    fn releasing_a_mesh_frees_buffers_when_unshared() {
        let (mut buffers, mut resources, _) = setup();
        let mesh = buffers.load_mesh(&mut resources, CUBE_PRIMITIVE).unwrap();
        assert!(buffers.release_mesh(CUBE_PRIMITIVE));
        resources.end_frame();
        assert_eq!(resources.live_counts().buffers, 2);
        drop(mesh);
        resources.end_frame();
        assert_eq!(resources.live_counts().buffers, 0);
    }

    #[test]
    fn mesh_pending_is_tracked() {
        let (mut buffers, mut resources, _) = setup();
        assert!(buffers.mark_mesh_pending("mesh/rect.mesh"));
        assert!(!buffers.mark_mesh_pending("mesh/rect.mesh"));
        buffers.insert_mesh(&mut resources, "mesh/rect.mesh", &MeshData::rectangle());
        assert!(!buffers.is_mesh_pending("mesh/rect.mesh"));
        assert!(buffers.mesh("mesh/rect.mesh").is_some());
    }
}
