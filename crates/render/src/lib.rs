//! Rendering: turns the render graph into device calls once per frame.
//!
//! # Invariants
//! - The renderer never creates backend objects itself. Every texture, buffer
//!   and frame buffer goes through the resource manager.
//! - Per-frame lists (image chains, light lists, shader keys, draws) live in
//!   the frame arena and are gone after `end_frame`.
//! - Global transforms, texture matrices and text textures are recomputed
//!   only when the graph marks them stale.
//! - Loader callbacks are drained at `begin_frame`, never mid-traversal.

mod dump;
mod frame;
mod prepare;
mod renderer;
mod shader;
mod stats;
mod text;

pub use dump::GraphDump;
pub use frame::{ImageChainIter, LightEntry, RenderableImage, chain_iter};
pub use prepare::{LayerContents, collect_layer, in_scope, update_transforms};
pub use renderer::{Renderer, RendererConfig};
pub use shader::{ProgramKind, ShaderKeyBuilder};
pub use stats::{FrameStats, FrameTimer};
pub use text::{BlockTextRasterizer, RasterizedText, TextRasterizer, TextRequest};

pub fn crate_info() -> &'static str {
    "prism-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
