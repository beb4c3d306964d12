//! Shared types used across the prism crates.
//!
//! # Invariants
//! - `StringHandle::EMPTY` always resolves to the empty string.
//! - Interning the same text twice yields the same handle.

mod strings;
mod types;

pub use strings::{StringBlockError, StringBlockReader, StringBlockWriter, StringHandle, StringTable};
pub use types::{Fnv1a, Size, TextureFormat};

pub fn crate_info() -> &'static str {
    "prism-common v0.1.0"
}
