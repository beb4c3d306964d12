use crate::frame::{LightEntry, RenderableImage, chain_iter};
use prism_common::Fnv1a;
use prism_graph::{BlendMode, DefaultMaterial, ImageSlot, LightKind, Lighting};

/// Program families the renderer draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    DefaultMaterial,
    CustomMaterial,
    Text,
    Effect,
    Composite,
}

/// Accumulates the features that select a shader variant.
///
/// Only features that change generated code feed the key: which image slots
/// are present, not the images' transforms; how many lights of each kind,
/// not where they are.
#[derive(Debug, Clone, Copy)]
pub struct ShaderKeyBuilder {
    hash: Fnv1a,
}

impl ShaderKeyBuilder {
    pub fn new(program: ProgramKind) -> Self {
        let mut hash = Fnv1a::new();
        hash.write_u32(program as u32);
        Self { hash }
    }

    pub fn default_material(mut self, material: &DefaultMaterial) -> Self {
        self.hash.write_u32(match material.lighting {
            Lighting::None => 0,
            Lighting::Pixel => 1,
        });
        self.hash.write_u32(match material.blend_mode {
            BlendMode::Normal => 0,
            BlendMode::Screen => 1,
            BlendMode::Multiply => 2,
            BlendMode::Overlay => 3,
        });
        self.hash.write_u32(u32::from(material.opacity < 1.0));
        self.hash.write_u32(u32::from(material.emissive_power > 0.0));
        self
    }

    pub fn class(mut self, name: &str) -> Self {
        self.hash.write(name.as_bytes());
        self.hash.write(&[0]);
        self
    }

    pub fn payload(mut self, bytes: &[u8]) -> Self {
        self.hash.write_u32(bytes.len() as u32);
        self.hash.write(bytes);
        self
    }

    pub fn transparent(mut self, transparent: bool) -> Self {
        self.hash.write_u32(u32::from(transparent));
        self
    }

    pub fn images(mut self, chain: Option<&RenderableImage<'_>>) -> Self {
        let mut count = 0;
        for image in chain_iter(chain) {
            self.hash.write_u32(slot_code(image.slot));
            count += 1;
        }
        self.hash.write_u32(count);
        self
    }

    pub fn lights(mut self, lights: &[LightEntry]) -> Self {
        let mut counts = [0u32; 3];
        let mut shadows = 0u32;
        for light in lights {
            counts[match light.kind {
                LightKind::Directional => 0,
                LightKind::Point => 1,
                LightKind::Area => 2,
            }] += 1;
            shadows += u32::from(light.cast_shadow);
        }
        for count in counts {
            self.hash.write_u32(count);
        }
        self.hash.write_u32(shadows);
        self
    }

    pub fn finish(self) -> u64 {
        self.hash.finish()
    }
}

fn slot_code(slot: ImageSlot) -> u32 {
    match slot {
        ImageSlot::Diffuse => 1,
        ImageSlot::Specular => 2,
        ImageSlot::Bump => 3,
        ImageSlot::Normal => 4,
        ImageSlot::Opacity => 5,
        ImageSlot::Emissive => 6,
        ImageSlot::LightmapIndirect => 7,
        ImageSlot::LightmapRadiosity => 8,
        ImageSlot::LightmapShadow => 9,
        ImageSlot::Custom(n) => 100 + u32::from(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};
    use prism_graph::ObjectId;
    use prism_resource::TextureKey;

    fn image<'f>(slot: ImageSlot, next: Option<&'f RenderableImage<'f>>) -> RenderableImage<'f> {
        RenderableImage {
            slot,
            image: ObjectId(0),
            texture: TextureKey::default(),
            matrix: Mat4::IDENTITY,
            placeholder: false,
            next,
        }
    }

    fn light(kind: LightKind) -> LightEntry {
        LightEntry {
            light: ObjectId(0),
            kind,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
            cast_shadow: false,
            scope: None,
        }
    }

    #[test]
    fn same_features_same_key() {
        let material = DefaultMaterial::default();
        let a = ShaderKeyBuilder::new(ProgramKind::DefaultMaterial)
            .default_material(&material)
            .finish();
        let b = ShaderKeyBuilder::new(ProgramKind::DefaultMaterial)
            .default_material(&material)
            .finish();
        assert_eq!(a, b);
        assert_ne!(a, ShaderKeyBuilder::new(ProgramKind::Text).finish());
    }

    #[test]
    fn image_slots_change_the_key_but_transforms_do_not() {
        let diffuse = image(ImageSlot::Diffuse, None);
        let mut moved = diffuse;
        moved.matrix = Mat4::from_translation(Vec3::X);
        let with_normal = image(ImageSlot::Normal, Some(&diffuse));

        let key = |chain: Option<&RenderableImage<'_>>| {
            ShaderKeyBuilder::new(ProgramKind::DefaultMaterial)
                .images(chain)
                .finish()
        };
        assert_eq!(key(Some(&diffuse)), key(Some(&moved)));
        assert_ne!(key(Some(&diffuse)), key(Some(&with_normal)));
        assert_ne!(key(None), key(Some(&diffuse)));
    }

    #[test]
    fn light_counts_feed_the_key() {
        let key = |lights: &[LightEntry]| {
            ShaderKeyBuilder::new(ProgramKind::DefaultMaterial)
                .lights(lights)
                .finish()
        };
        let one = [light(LightKind::Point)];
        let mut moved = one;
        moved[0].position = Vec3::splat(5.0);
        assert_eq!(key(&one), key(&moved));
        assert_ne!(key(&one), key(&[light(LightKind::Directional)]));
        assert_ne!(key(&one), key(&[light(LightKind::Point), light(LightKind::Point)]));
    }
}
