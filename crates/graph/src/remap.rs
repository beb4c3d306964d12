use crate::object::ObjectId;
use prism_common::StringHandle;
use std::collections::HashSet;

/// A field holding per-frame or backend state that is never saved.
pub trait Transient {
    /// Return to the freshly-created state.
    fn reset(&mut self);
}

impl<T> Transient for Option<T> {
    fn reset(&mut self) {
        *self = None;
    }
}

/// Rewrites every link, string and transient field of a graph object.
///
/// Each object type feeds its fields through the method for the field's
/// category. Owned links form the ownership tree (children, materials,
/// effects, sub paths, material images); weak links are back references and
/// cross references that never keep their target alive.
pub trait RemapVisitor {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>);
    fn remap_weak(&mut self, link: &mut Option<ObjectId>);
    fn remap_string(&mut self, text: &mut StringHandle);
    fn reset_transient(&mut self, field: &mut dyn Transient);
}

/// Leaves everything as it is.
#[derive(Debug, Default)]
pub struct IdentityRemap {
    /// Links visited, owned and weak, present or not.
    pub links_visited: usize,
    pub strings_visited: usize,
}

impl RemapVisitor for IdentityRemap {
    fn remap_owned(&mut self, _link: &mut Option<ObjectId>) {
        self.links_visited += 1;
    }

    fn remap_weak(&mut self, _link: &mut Option<ObjectId>) {
        self.links_visited += 1;
    }

    fn remap_string(&mut self, _text: &mut StringHandle) {
        self.strings_visited += 1;
    }

    fn reset_transient(&mut self, _field: &mut dyn Transient) {}
}

/// Collects the targets of owned links.
#[derive(Debug, Default)]
pub struct OwnedLinkCollector {
    pub owned: Vec<ObjectId>,
}

impl RemapVisitor for OwnedLinkCollector {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>) {
        if let Some(id) = *link {
            self.owned.push(id);
        }
    }

    fn remap_weak(&mut self, _link: &mut Option<ObjectId>) {}

    fn remap_string(&mut self, _text: &mut StringHandle) {}

    fn reset_transient(&mut self, _field: &mut dyn Transient) {}
}

/// Nulls every link pointing at a removed object.
#[derive(Debug)]
pub struct UnlinkRemap<'a> {
    removed: &'a HashSet<ObjectId>,
    pub nulled: usize,
}

impl<'a> UnlinkRemap<'a> {
    pub fn new(removed: &'a HashSet<ObjectId>) -> Self {
        Self { removed, nulled: 0 }
    }

    fn visit(&mut self, link: &mut Option<ObjectId>) {
        if link.is_some_and(|id| self.removed.contains(&id)) {
            *link = None;
            self.nulled += 1;
        }
    }
}

impl RemapVisitor for UnlinkRemap<'_> {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>) {
        self.visit(link);
    }

    fn remap_weak(&mut self, link: &mut Option<ObjectId>) {
        self.visit(link);
    }

    fn remap_string(&mut self, _text: &mut StringHandle) {}

    fn reset_transient(&mut self, _field: &mut dyn Transient) {}
}

/// Resets transient fields and nothing else.
#[derive(Debug, Default)]
pub struct ResetTransients;

impl RemapVisitor for ResetTransients {
    fn remap_owned(&mut self, _link: &mut Option<ObjectId>) {}

    fn remap_weak(&mut self, _link: &mut Option<ObjectId>) {}

    fn remap_string(&mut self, _text: &mut StringHandle) {}

    fn reset_transient(&mut self, field: &mut dyn Transient) {
        field.reset();
    }
}
