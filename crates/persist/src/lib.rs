//! Persistence: the flat saved-graph format and a file-backed store of
//! presentation revisions.
//!
//! # Invariants
//! - A saved graph never references memory outside its own buffer: links are
//!   dense indices, strings are offsets into the trailing string block.
//! - Loading requires the path manager and the dynamic-object classes.
//! - Transient state is empty after load and every object starts dirty.
//! - Store revisions are hash chained; a mismatch fails closed.

mod digest;
mod format;
mod store;
mod validate;

pub use digest::structure_digest;
pub use format::{FORMAT_VERSION, MAGIC, PersistError, load, save};
pub use store::{IntegrityManifest, ManifestEntry, PresentationStore, StoreError, StoreMeta};

pub fn crate_info() -> &'static str {
    "prism-persist v0.1.0"
}
