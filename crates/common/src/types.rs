use serde::{Deserialize, Serialize};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp both dimensions to `max`. Returns the clamped size.
    pub fn clamped(self, max: u32) -> Self {
        Self {
            width: self.width.min(max),
            height: self.height.min(max),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Pixel formats understood by the device abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgba16F,
    Rgba32F,
    Depth16,
    Depth24,
    Depth24Stencil8,
    Depth32F,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rg8 | Self::Depth16 => 2,
            Self::Rgb8 | Self::Depth24 => 3,
            Self::Rgba8 | Self::Depth24Stencil8 | Self::Depth32F => 4,
            Self::Rgba16F => 8,
            Self::Rgba32F => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Self::Depth16 | Self::Depth24 | Self::Depth24Stencil8 | Self::Depth32F
        )
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Rgba16F | Self::Rgba32F)
    }
}

/// FNV-1a hasher used for shader keys and content checks.
///
/// Deterministic across platforms, unlike `DefaultHasher`.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    pub fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write(&value.to_le_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.0
    }

    /// Hash a byte slice in one call.
    pub fn hash(bytes: &[u8]) -> u64 {
        let mut h = Self::new();
        h.write(bytes);
        h.finish()
    }
}

impl Default for Fnv1a {
    fn default() -> Self {
        Self::new()
    }
}
