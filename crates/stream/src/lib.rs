//! Asynchronous image and mesh loading.
//!
//! # Invariants
//! - Workers never touch the device, the graph or the buffer manager.
//! - Listener callbacks run only inside `ImageLoader::drain`, on the thread
//!   that owns the loader.
//! - After a cancel call returns, nothing is delivered for what it cancelled.
//! - Completions for one path arrive in submission order.

mod loader;

pub use loader::{
    BatchId, ImageLoadListener, ImageLoader, LoadError, LoadStatus, LoaderConfig, LoaderStats,
};

pub fn crate_info() -> &'static str {
    "prism-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
