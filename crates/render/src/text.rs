use prism_common::{Size, TextureFormat};
use prism_graph::TextAlign;

/// Everything that affects how a text node rasterizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextRequest<'a> {
    pub text: &'a str,
    pub font: &'a str,
    pub font_size: f32,
    pub align: TextAlign,
    pub leading: f32,
    pub tracking: f32,
}

/// Coverage pixels ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizedText {
    pub size: Size,
    pub format: TextureFormat,
    pub pixels: Vec<u8>,
}

/// Turns text into a texture image. Injected into the renderer at startup.
pub trait TextRasterizer {
    /// `None` when there is nothing to draw.
    fn rasterize(&mut self, request: &TextRequest<'_>) -> Option<RasterizedText>;
}

/// Draws every non-blank character as a solid block on a fixed advance.
/// Enough for layout, tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockTextRasterizer;

impl TextRasterizer for BlockTextRasterizer {
    fn rasterize(&mut self, request: &TextRequest<'_>) -> Option<RasterizedText> {
        let lines: Vec<&str> = request.text.lines().collect();
        let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        if longest == 0 {
            return None;
        }
        let size = request.font_size.max(1.0);
        let advance = (size * 0.6 + request.tracking).max(1.0).round() as u32;
        let line_height = (size + request.leading).max(1.0).round() as u32;
        let glyph_height = (size * 0.7).max(1.0).round() as u32;
        let width = advance * longest as u32;
        let height = line_height * lines.len() as u32;
        let mut pixels = vec![0u8; (width * height) as usize];

        for (row, line) in lines.iter().enumerate() {
            let line_width = advance * line.chars().count() as u32;
            let x0 = match request.align {
                TextAlign::Left => 0,
                TextAlign::Center => (width - line_width) / 2,
                TextAlign::Right => width - line_width,
            };
            let y0 = row as u32 * line_height + (line_height - glyph_height.min(line_height));
            for (column, ch) in line.chars().enumerate() {
                if ch.is_whitespace() {
                    continue;
                }
                let gx = x0 + column as u32 * advance;
                for y in y0..(y0 + glyph_height).min(height) {
                    let start = (y * width + gx) as usize;
                    let end = start + advance.saturating_sub(1).max(1) as usize;
                    pixels[start..end.min(((y + 1) * width) as usize)].fill(255);
                }
            }
        }

        Some(RasterizedText {
            size: Size::new(width, height),
            format: TextureFormat::R8,
            pixels,
        })
    }
}
