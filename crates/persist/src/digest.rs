use prism_common::{Fnv1a, StringHandle, StringTable};
use prism_graph::{ObjectData, ObjectId, RemapVisitor, RenderGraph, Transient};

/// Fingerprint of a graph's structure and property values.
///
/// Objects are ordered by uid, links are replaced by that order and string
/// handles by their text, so two graphs that differ only in slot layout or
/// string table layout have the same digest. Dirty flags and transient state
/// do not contribute.
pub fn structure_digest(graph: &RenderGraph) -> u64 {
    let mut order: Vec<_> = graph.iter().map(|(id, o)| (o.uid, id)).collect();
    order.sort();
    let mut canonical = vec![None; graph.slot_count()];
    for (rank, (_, id)) in order.iter().enumerate() {
        canonical[id.index()] = Some(rank as u32);
    }

    let mut hash = Fnv1a::new();
    for (uid, id) in &order {
        let Some(object) = graph.get(*id) else {
            continue;
        };
        let mut copy = object.clone();
        copy.remap(&mut CanonicalRemap {
            canonical: &canonical,
            strings: graph.strings(),
            hash: &mut hash,
        });
        if let Some(node) = copy.data.node_mut() {
            node.transform_dirty = false;
        }
        if let ObjectData::Text(text) = &mut copy.data {
            text.text_dirty = false;
        }
        hash.write(uid.as_bytes());
        hash.write(format!("{:?}", copy.data).as_bytes());
    }
    hash.finish()
}

struct CanonicalRemap<'a> {
    canonical: &'a [Option<u32>],
    strings: &'a StringTable,
    hash: &'a mut Fnv1a,
}

impl CanonicalRemap<'_> {
    fn link(&mut self, link: &mut Option<ObjectId>) {
        *link = link.and_then(|id| {
            self.canonical
                .get(id.index())
                .copied()
                .flatten()
                .map(ObjectId)
        });
    }
}

impl RemapVisitor for CanonicalRemap<'_> {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>) {
        self.link(link);
    }

    fn remap_weak(&mut self, link: &mut Option<ObjectId>) {
        self.link(link);
    }

    fn remap_string(&mut self, text: &mut StringHandle) {
        self.hash.write(self.strings.get(*text).as_bytes());
        self.hash.write(&[0]);
        *text = StringHandle::EMPTY;
    }

    fn reset_transient(&mut self, field: &mut dyn Transient) {
        field.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn digest_tracks_property_values() {
        let mut g = RenderGraph::new();
        let node = g.create_node();
        let before = structure_digest(&g);
        g.set_position(node, Vec3::X);
        assert_ne!(structure_digest(&g), before);
    }

    #[test]
    fn digest_ignores_dirty_flags() {
        let mut g = RenderGraph::new();
        let text = g.create_text("hi");
        let before = structure_digest(&g);
        g.clear_all_dirty();
        g.text_mut(text).unwrap().text_dirty = false;
        assert_eq!(structure_digest(&g), before);
    }

    #[test]
    fn digest_tracks_string_text() {
        let mut g = RenderGraph::new();
        let text = g.create_text("a");
        let before = structure_digest(&g);
        g.set_text(text, "b");
        assert_ne!(structure_digest(&g), before);
    }
}
