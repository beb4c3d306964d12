use crate::AssetError;
use crate::mesh::{MeshData, MeshError};
use prism_common::{Size, TextureFormat};
use std::sync::Arc;

/// Converts an already-exported file into validated geometry.
pub trait MeshImporter: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case file extensions, without the dot.
    fn extensions(&self) -> &[&str];

    fn import(&self, bytes: &[u8]) -> Result<MeshData, MeshError>;
}

/// Reads the native CBOR `.mesh` format.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeMeshImporter;

impl MeshImporter for NativeMeshImporter {
    fn name(&self) -> &str {
        "native"
    }

    fn extensions(&self) -> &[&str] {
        &["mesh"]
    }

    fn import(&self, bytes: &[u8]) -> Result<MeshData, MeshError> {
        MeshData::decode(bytes)
    }
}

/// Importers by file extension. Built at startup and handed to whoever
/// needs it.
#[derive(Clone, Default)]
pub struct ImporterRegistry {
    importers: Vec<Arc<dyn MeshImporter>>,
}

impl std::fmt::Debug for ImporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.importers.iter().map(|i| i.name()))
            .finish()
    }
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the native importer.
    pub fn with_native() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NativeMeshImporter));
        registry
    }

    /// Later registrations take precedence for shared extensions.
    pub fn register(&mut self, importer: Arc<dyn MeshImporter>) {
        tracing::debug!(importer = importer.name(), "registered mesh importer");
        self.importers.insert(0, importer);
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    pub fn find(&self, path: &str) -> Option<&Arc<dyn MeshImporter>> {
        let extension = extension_of(path)?;
        self.importers
            .iter()
            .find(|i| i.extensions().iter().any(|e| *e == extension))
    }

    pub fn import(&self, path: &str, bytes: &[u8]) -> Result<MeshData, AssetError> {
        let importer = self
            .find(path)
            .ok_or_else(|| AssetError::NoImporter(path.to_string()))?;
        Ok(importer.import(bytes)?)
    }
}

fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next()?;
    let (_, extension) = name.rsplit_once('.')?;
    Some(extension.to_ascii_lowercase())
}

/// Pixels ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub size: Size,
    pub format: TextureFormat,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// A solid RGBA8 image.
    pub fn solid(size: Size, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(size.pixel_count() as usize);
        Self {
            size,
            format: TextureFormat::Rgba8,
            pixels,
        }
    }
}

/// Decode PNG or JPEG bytes into RGBA8, or into a single-channel texture for
/// greyscale sources.
pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage, AssetError> {
    let decoded = image::load_from_memory(bytes)?;
    let size = Size::new(decoded.width(), decoded.height());
    let (format, pixels) = match decoded.color() {
        image::ColorType::L8 => (TextureFormat::R8, decoded.into_luma8().into_raw()),
        _ => (TextureFormat::Rgba8, decoded.into_rgba8().into_raw()),
    };
    Ok(DecodedImage {
        size,
        format,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeObj;

    impl MeshImporter for FakeObj {
        fn name(&self) -> &str {
            "fake-obj"
        }

        fn extensions(&self) -> &[&str] {
            &["obj", "mesh"]
        }

        fn import(&self, _bytes: &[u8]) -> Result<MeshData, MeshError> {
            Ok(MeshData::rectangle())
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let registry = ImporterRegistry::with_native();
        assert!(registry.find("models/Teapot.MESH").is_some());
        assert!(registry.find("models/teapot.fbx").is_none());
        assert!(registry.find("models.dir/noext").is_none());
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = ImporterRegistry::with_native();
        registry.register(Arc::new(FakeObj));
        assert_eq!(registry.find("a.mesh").unwrap().name(), "fake-obj");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn import_without_importer_fails() {
        let registry = ImporterRegistry::new();
        assert!(matches!(
            registry.import("a.mesh", &[]),
            Err(AssetError::NoImporter(_))
        ));
    }

    #[test]
    fn native_import_decodes() {
        let registry = ImporterRegistry::with_native();
        let bytes = MeshData::cube().encode().unwrap();
        assert_eq!(registry.import("cube.mesh", &bytes).unwrap().indices.len(), 36);
    }

    #[test]
    fn png_decodes_to_rgba8() {
        let decoded = decode_image(&png_bytes(3, 2)).unwrap();
        assert_eq!(decoded.size, Size::new(3, 2));
        assert_eq!(decoded.format, TextureFormat::Rgba8);
        assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
        assert_eq!(&decoded.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn corrupt_image_is_an_error() {
        assert!(matches!(
            decode_image(b"\x89PNG broken"),
            Err(AssetError::Decode(_))
        ));
    }
}
