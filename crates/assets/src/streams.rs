use crate::AssetError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// Opens asset bytes by path. Shared with loader worker threads.
pub trait InputStreamFactory: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, AssetError>;

    fn exists(&self, path: &str) -> bool;

    fn read_all(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        let mut reader = self.open(path)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Resolves relative paths against a list of search directories, first hit
/// wins. Absolute paths are opened as given.
#[derive(Debug, Clone, Default)]
pub struct FsStreamFactory {
    search_paths: Vec<PathBuf>,
}

impl FsStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(path);
        if direct.is_absolute() || self.search_paths.is_empty() {
            return direct.is_file().then_some(direct);
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
    }
}

impl InputStreamFactory for FsStreamFactory {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, AssetError> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| AssetError::NotFound(path.to_string()))?;
        Ok(Box::new(std::fs::File::open(resolved)?))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }
}

/// In-memory files, for tests and embedded assets.
#[derive(Debug, Default)]
pub struct MemoryStreamFactory {
    files: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.files.write().insert(path.into(), bytes.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl InputStreamFactory for MemoryStreamFactory {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, AssetError> {
        let bytes = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_factory_serves_inserted_files() {
        let streams = MemoryStreamFactory::new();
        streams.insert("a.bin", vec![1u8, 2, 3]);
        assert!(streams.exists("a.bin"));
        assert_eq!(streams.read_all("a.bin").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            streams.read_all("missing"),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn fs_factory_searches_directories_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("tex.png"), b"second").unwrap();
        let streams = FsStreamFactory::new()
            .with_search_path(first.path())
            .with_search_path(second.path());
        assert_eq!(streams.read_all("tex.png").unwrap(), b"second");

        std::fs::write(first.path().join("tex.png"), b"first").unwrap();
        assert_eq!(streams.read_all("tex.png").unwrap(), b"first");
        assert!(!streams.exists("nope.png"));
    }
}
