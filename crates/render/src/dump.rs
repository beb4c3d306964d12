use prism_graph::{ObjectData, ObjectId, RenderGraph};
use std::fmt::Write;

/// Human-readable outline of a render graph.
///
/// Walks the scene's child hierarchy and lists each node's materials and
/// effects under it. Useful for CLI output, logging and tests.
#[derive(Debug, Default)]
pub struct GraphDump {
    /// Print global state (world position, opacity) next to each node.
    pub globals: bool,
}

impl GraphDump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_globals(mut self) -> Self {
        self.globals = true;
        self
    }

    pub fn render(&self, graph: &RenderGraph) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== Render Graph ({} objects, {} dirty) ===",
            graph.len(),
            graph.dirty_objects().len()
        );
        let Some(scene) = graph.scene() else {
            out.push_str("(no scene)\n");
            return out;
        };
        self.object(graph, scene, 0, &mut out);
        out
    }

    fn object(&self, graph: &RenderGraph, id: ObjectId, depth: usize, out: &mut String) {
        let Some(object) = graph.get(id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let uid = object.uid.to_string();
        let _ = write!(
            out,
            "{indent}{:?} #{} [{}]",
            object.object_type(),
            id.0,
            &uid[..8]
        );
        self.details(graph, &object.data, out);
        if self.globals
            && let Some(node) = object.data.node()
        {
            let p = node.global.world.transform_point3(glam::Vec3::ZERO);
            let _ = write!(
                out,
                " world=({:.2}, {:.2}, {:.2}) opacity={:.2}",
                p.x, p.y, p.z, node.global.opacity
            );
        }
        out.push('\n');

        for material in graph.materials(id) {
            self.object(graph, material, depth + 2, out);
        }
        for effect in graph.effects(id) {
            self.object(graph, effect, depth + 2, out);
        }
        for child in graph.children(id) {
            self.object(graph, child, depth + 1, out);
        }
    }

    fn details(&self, graph: &RenderGraph, data: &ObjectData, out: &mut String) {
        let _ = match data {
            ObjectData::Layer(layer) => write!(
                out,
                " size={}x{} background={:?}",
                layer.size.width, layer.size.height, layer.background
            ),
            ObjectData::Light(light) => write!(
                out,
                " kind={:?} brightness={:.0}",
                light.kind, light.brightness
            ),
            ObjectData::Model(model) => write!(out, " mesh={:?}", graph.resolve(model.mesh_path)),
            ObjectData::Image(image) => write!(out, " path={:?}", graph.resolve(image.image_path)),
            ObjectData::Text(text) => write!(out, " text={:?}", graph.resolve(text.text)),
            ObjectData::Effect(effect) => write!(
                out,
                " class={} active={}",
                graph.resolve(effect.class_name),
                effect.active
            ),
            ObjectData::CustomMaterial(material) => {
                write!(out, " class={}", graph.resolve(material.class_name))
            }
            ObjectData::ReferencedMaterial(r) => {
                write!(out, " -> {:?}", r.referenced.map(|id| id.0))
            }
            _ => Ok(()),
        };
        if let ObjectData::DefaultMaterial(material) = data {
            for (slot, image) in material.image_slots() {
                if let Some(image) = image.and_then(|i| graph.image(i)) {
                    let _ = write!(out, " {slot:?}={:?}", graph.resolve(image.image_path));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn empty_graph() {
        let output = GraphDump::new().render(&RenderGraph::new());
        assert!(output.contains("0 objects"));
        assert!(output.contains("(no scene)"));
    }

    #[test]
    fn hierarchy_with_materials() {
        let mut graph = RenderGraph::new();
        let scene = graph.create_scene();
        let layer = graph.create_layer();
        let model = graph.create_model("#Cube");
        let material = graph.create_default_material();
        let image = graph.create_image("tex/wood.png");
        graph.add_child(scene, layer);
        graph.add_child(layer, model);
        graph.add_material(model, material);
        graph.set_material_image(material, prism_graph::ImageSlot::Diffuse, Some(image));
        graph.set_position(model, Vec3::new(1.0, 2.0, 3.0));
        crate::prepare::update_transforms(&mut graph);

        let output = GraphDump::new().with_globals().render(&graph);
        assert!(output.contains("5 objects"));
        assert!(output.contains("  Layer #"));
        assert!(output.contains("    Model #"));
        assert!(output.contains("mesh=\"#Cube\""));
        assert!(output.contains("Diffuse=\"tex/wood.png\""));
        assert!(output.contains("world=(1.00, 2.00, 3.00)"));
    }
}
