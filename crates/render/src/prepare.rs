use glam::Mat4;
use prism_graph::{GlobalState, GraphObjectType, ObjectId, RenderGraph};

/// Recompute global transforms, opacity and activity below the scene.
///
/// Only nodes that are transform-dirty, never computed, or below a node that
/// changed are recomputed. Returns how many nodes were.
pub fn update_transforms(graph: &mut RenderGraph) -> usize {
    let _span = tracing::trace_span!("update_transforms").entered();
    let Some(scene) = graph.scene() else {
        return 0;
    };
    let mut stack: Vec<(ObjectId, GlobalState, bool)> = graph
        .children(scene)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|id| (id, root_state(), false))
        .collect();
    let mut updated = 0;
    let mut steps = graph.slot_count();

    while let Some((id, parent, parent_changed)) = stack.pop() {
        if steps == 0 {
            tracing::error!(node = id.0, "corrupt node hierarchy, transform pass cut short");
            break;
        }
        steps -= 1;
        let children: Vec<ObjectId> = graph.children(id).collect();
        let Some(node) = graph.get_mut(id).and_then(|o| o.data.node_mut()) else {
            continue;
        };
        let changed = parent_changed || node.transform_dirty || !node.global.valid;
        if changed {
            node.global = GlobalState {
                world: parent.world * node.local_transform(),
                opacity: parent.opacity * node.opacity,
                active: parent.active && node.active,
                valid: true,
            };
            node.transform_dirty = false;
            updated += 1;
        }
        let global = node.global;
        stack.extend(children.into_iter().rev().map(|c| (c, global, changed)));
    }
    updated
}

fn root_state() -> GlobalState {
    GlobalState {
        world: Mat4::IDENTITY,
        opacity: 1.0,
        active: true,
        valid: true,
    }
}

/// Renderable objects found under one layer this frame.
#[derive(Debug, Default)]
pub struct LayerContents {
    pub models: Vec<ObjectId>,
    pub lights: Vec<ObjectId>,
    pub texts: Vec<ObjectId>,
    pub paths: Vec<ObjectId>,
}

/// Collect the active renderables below `layer`, in pre-order. Inactive
/// subtrees are skipped whole.
pub fn collect_layer(graph: &RenderGraph, layer: ObjectId) -> LayerContents {
    let mut contents = LayerContents::default();
    let mut stack: Vec<ObjectId> = graph.children(layer).collect();
    stack.reverse();
    let mut steps = graph.slot_count();
    while let Some(id) = stack.pop() {
        if steps == 0 {
            tracing::error!(layer = layer.0, "corrupt node hierarchy, layer walk cut short");
            break;
        }
        steps -= 1;
        let Some(node) = graph.node(id) else {
            continue;
        };
        if !node.global.active {
            continue;
        }
        match graph.object_type(id) {
            Some(GraphObjectType::Model) => contents.models.push(id),
            Some(GraphObjectType::Light) => contents.lights.push(id),
            Some(GraphObjectType::Text) => contents.texts.push(id),
            Some(GraphObjectType::Path) => contents.paths.push(id),
            _ => {}
        }
        let first = stack.len();
        stack.extend(graph.children(id));
        stack[first..].reverse();
    }
    contents
}

/// True when `scope` is `node` or one of its ancestors.
pub fn in_scope(graph: &RenderGraph, node: ObjectId, scope: ObjectId) -> bool {
    let mut current = Some(node);
    let mut steps = graph.slot_count();
    while let Some(id) = current {
        if id == scope {
            return true;
        }
        if steps == 0 {
            return false;
        }
        steps -= 1;
        current = graph.node(id).and_then(|n| n.parent);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use prism_graph::LightKind;

    fn scene() -> (RenderGraph, ObjectId, ObjectId, ObjectId) {
        let mut graph = RenderGraph::new();
        let scene = graph.create_scene();
        let layer = graph.create_layer();
        let group = graph.create_node();
        let model = graph.create_model("#Cube");
        graph.add_child(scene, layer);
        graph.add_child(layer, group);
        graph.add_child(group, model);
        (graph, layer, group, model)
    }

    #[test]
    fn first_pass_computes_every_node() {
        let (mut graph, _, group, model) = scene();
        graph.set_position(group, Vec3::new(1.0, 0.0, 0.0));
        graph.set_position(model, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(update_transforms(&mut graph), 3);
        let world = graph.node(model).unwrap().global.world;
        assert!(
            (world.transform_point3(Vec3::ZERO) - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6
        );
        assert_eq!(update_transforms(&mut graph), 0);
    }

    #[test]
    fn only_dirty_subtrees_are_recomputed() {
        let (mut graph, layer, group, model) = scene();
        let sibling = graph.create_node();
        graph.add_child(layer, sibling);
        update_transforms(&mut graph);

        graph.set_scale(group, Vec3::splat(2.0));
        assert_eq!(update_transforms(&mut graph), 2);
        assert!(!graph.node(model).unwrap().transform_dirty);

        graph.set_position(sibling, Vec3::ONE);
        assert_eq!(update_transforms(&mut graph), 1);
    }

    #[test]
    fn opacity_and_activity_inherit() {
        let (mut graph, _, group, model) = scene();
        graph.set_opacity(group, 0.5);
        graph.set_opacity(model, 0.5);
        graph.set_active(group, false);
        update_transforms(&mut graph);
        let global = graph.node(model).unwrap().global;
        assert!((global.opacity - 0.25).abs() < 1e-6);
        assert!(!global.active);
    }

    #[test]
    fn collect_skips_inactive_subtrees() {
        let (mut graph, layer, group, model) = scene();
        let light = graph.create_light(LightKind::Point);
        graph.add_child(layer, light);
        update_transforms(&mut graph);
        let contents = collect_layer(&graph, layer);
        assert_eq!(contents.models, vec![model]);
        assert_eq!(contents.lights, vec![light]);

        graph.set_active(group, false);
        update_transforms(&mut graph);
        assert!(collect_layer(&graph, layer).models.is_empty());
    }

    #[test]
    fn scope_walks_parents() {
        let (graph, layer, group, model) = scene();
        assert!(in_scope(&graph, model, group));
        assert!(in_scope(&graph, model, layer));
        assert!(in_scope(&graph, model, model));
        assert!(!in_scope(&graph, group, model));
    }

    #[test]
    fn self_parented_node_does_not_hang_the_passes() {
        let (mut graph, layer, group, _) = scene();
        let node = graph.get_mut(group).unwrap().data.node_mut().unwrap();
        node.first_child = Some(group);
        node.parent = Some(group);

        let updated = update_transforms(&mut graph);
        assert!(updated <= graph.slot_count());
        let contents = collect_layer(&graph, layer);
        assert!(contents.models.len() <= graph.slot_count());
    }
}
