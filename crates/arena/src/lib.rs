//! Per-frame allocator: fast bump allocation for transient render data.
//!
//! # Invariants
//! - Nothing allocated from a [`FrameArena`] outlives the next `reset()`;
//!   the borrow checker enforces this because `reset` takes `&mut self`.
//! - Small requests are served from a list of fixed-size slabs. Slabs are
//!   rewound on reset and reused, never re-created.
//! - Large requests bypass the slabs and are freed outright on reset.
//!
//! The arena is single-threaded (`!Send`) and belongs to the render thread.

mod frame;

pub use frame::{ArenaConfig, ArenaStats, FrameArena};

pub fn crate_info() -> &'static str {
    "prism-arena v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("arena"));
    }
}
