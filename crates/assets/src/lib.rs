//! Asset side of rendering: input streams, mesh import, image decode and the
//! render-thread caches that turn them into device resources.
//!
//! # Invariants
//! - Identical mesh paths share one resident mesh.
//! - An image that is pending or failed resolves to a placeholder, never to
//!   nothing, once a placeholder exists.
//! - Stream factories and importers are thread-safe; `BufferManager` is not
//!   and stays on the render thread.

mod buffers;
mod import;
mod mesh;
mod streams;

pub use buffers::{
    BufferManager, BufferStats, CUBE_PRIMITIVE, ImageStatus, RECTANGLE_PRIMITIVE, RenderMesh,
    ResolvedImage,
};
pub use import::{DecodedImage, ImporterRegistry, MeshImporter, NativeMeshImporter, decode_image};
pub use mesh::{Bounds, MeshData, MeshError, MeshSubset, Vertex};
pub use streams::{FsStreamFactory, InputStreamFactory, MemoryStreamFactory};

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("no importer for {0}")]
    NoImporter(String),
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),
}

pub fn crate_info() -> &'static str {
    "prism-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("assets"));
    }
}
