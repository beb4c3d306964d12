//! File-backed presentation persistence.
//!
//! Layout inside the store directory:
//! ```text
//! presentation.meta.json   - metadata and format versions
//! graphs/
//!   000001.graph.zst       - zstd compressed saved graphs, one per revision
//! integrity/
//!   manifest.json          - hash chain manifest
//! ```

use crate::format::{self, FORMAT_VERSION, PersistError};
use prism_common::StringTable;
use prism_graph::{ClassRegistry, RenderGraph};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const STORE_SCHEMA_VERSION: u32 = 1;

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("saved graph: {0}")]
    Persist(#[from] PersistError),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("no revision {0}")]
    MissingRevision(u32),
    #[error("store holds no revisions")]
    NoRevisions,
}

/// Metadata stored in presentation.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub store_schema_version: u32,
    pub graph_format_version: u32,
    pub revision_count: u32,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
    pub objects: usize,
}

/// Integrity manifest tracking all revision hashes in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Directory of saved graph revisions with schema versioning and integrity
/// checking.
pub struct PresentationStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

impl PresentationStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("graphs"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("presentation.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.store_schema_version != STORE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.store_schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            if meta.graph_format_version != FORMAT_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.graph_format_version,
                    expected_version: FORMAT_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                store_schema_version: STORE_SCHEMA_VERSION,
                graph_format_version: FORMAT_VERSION,
                revision_count: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Save `graph` as a new revision. Returns the revision number.
    pub fn save_graph(&mut self, graph: &RenderGraph) -> Result<u32, StoreError> {
        let bytes = format::save(graph)?;
        let compressed = zstd_compress(&bytes)?;

        self.meta.revision_count += 1;
        let revision = self.meta.revision_count;
        let filename = revision_filename(revision);
        std::fs::write(self.root.join("graphs").join(&filename), &compressed)?;

        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());
        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256: hash,
            prev_hash,
            objects: graph.len(),
        });

        self.save_meta()?;
        self.save_manifest()?;
        tracing::info!(revision, objects = graph.len(), "saved presentation revision");
        Ok(revision)
    }

    /// Load the newest revision.
    pub fn load_latest(
        &self,
        strings: StringTable,
        classes: ClassRegistry,
    ) -> Result<RenderGraph, StoreError> {
        if self.meta.revision_count == 0 {
            return Err(StoreError::NoRevisions);
        }
        self.load_revision(self.meta.revision_count, strings, classes)
    }

    pub fn load_revision(
        &self,
        revision: u32,
        strings: StringTable,
        classes: ClassRegistry,
    ) -> Result<RenderGraph, StoreError> {
        if revision == 0 || revision > self.meta.revision_count {
            return Err(StoreError::MissingRevision(revision));
        }
        let filename = revision_filename(revision);
        let compressed = std::fs::read(self.root.join("graphs").join(&filename))?;
        self.verify_file_hash(&filename, &compressed)?;
        let bytes = zstd_decompress(&compressed)?;
        Ok(format::load(&bytes, strings, classes)?)
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }

            let data = std::fs::read(self.root.join("graphs").join(&entry.filename))?;
            let actual_hash = sha256_hex(&data);
            if actual_hash != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual: actual_hash,
                });
            }

            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    fn verify_file_hash(&self, filename: &str, data: &[u8]) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        match self.manifest.entries.iter().find(|e| e.filename == filename) {
            Some(entry) if entry.sha256 != actual => Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            }),
            Some(_) => Ok(()),
            None => Err(StoreError::IntegrityMismatch {
                expected: format!("manifest entry for {filename}"),
                actual: "none".into(),
            }),
        }
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join("presentation.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

fn revision_filename(revision: u32) -> String {
    format!("{revision:06}.graph.zst")
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::structure_digest;
    use glam::Vec3;

    fn sample() -> RenderGraph {
        let mut g = RenderGraph::new();
        let scene = g.create_scene();
        let layer = g.create_layer();
        g.add_child(scene, layer);
        let model = g.create_model("#Cube");
        g.add_child(layer, model);
        g.set_position(model, Vec3::new(10.0, 5.0, -3.0));
        g
    }

    #[test]
    fn store_open_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PresentationStore::open(tmp.path().join("pres")).unwrap();
        assert_eq!(store.meta().revision_count, 0);
        assert!(store.root().join("graphs").is_dir());
        assert!(store.root().join("integrity").is_dir());
    }

    #[test]
    fn save_and_reload_preserves_structure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pres");
        let graph = sample();
        let digest = structure_digest(&graph);
        {
            let mut store = PresentationStore::open(&path).unwrap();
            assert_eq!(store.save_graph(&graph).unwrap(), 1);
        }

        let store = PresentationStore::open(&path).unwrap();
        assert_eq!(store.meta().revision_count, 1);
        let loaded = store
            .load_latest(StringTable::new(), ClassRegistry::new())
            .unwrap();
        assert_eq!(structure_digest(&loaded), digest);
    }

    #[test]
    fn older_revisions_stay_loadable() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = PresentationStore::open(tmp.path().join("pres")).unwrap();
        let mut graph = sample();
        store.save_graph(&graph).unwrap();
        graph.create_node();
        store.save_graph(&graph).unwrap();

        let first = store
            .load_revision(1, StringTable::new(), ClassRegistry::new())
            .unwrap();
        let second = store
            .load_latest(StringTable::new(), ClassRegistry::new())
            .unwrap();
        assert_eq!(first.len() + 1, second.len());
        assert!(matches!(
            store.load_revision(3, StringTable::new(), ClassRegistry::new()),
            Err(StoreError::MissingRevision(3))
        ));
        store.verify_integrity().unwrap();
    }

    #[test]
    fn empty_store_has_nothing_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PresentationStore::open(tmp.path().join("pres")).unwrap();
        assert!(matches!(
            store.load_latest(StringTable::new(), ClassRegistry::new()),
            Err(StoreError::NoRevisions)
        ));
    }

    #[test]
    fn corruption_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pres");
        let mut store = PresentationStore::open(&path).unwrap();
        store.save_graph(&sample()).unwrap();

        let file = path.join("graphs").join("000001.graph.zst");
        let mut data = std::fs::read(&file).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&file, &data).unwrap();

        let reopened = PresentationStore::open(&path).unwrap();
        assert!(reopened.verify_integrity().is_err());
        assert!(matches!(
            reopened.load_latest(StringTable::new(), ClassRegistry::new()),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pres");
        let _store = PresentationStore::open(&path).unwrap();

        let meta_path = path.join("presentation.meta.json");
        let mut meta: StoreMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.store_schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        match PresentationStore::open(&path) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, STORE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }
}
