use crate::device::BindTarget;
use crate::handle::{BufferKey, FrameBufferKey, RenderBufferKey, TextureKey};
use std::collections::BTreeMap;

/// Notified by the manager before a backend object is freed, so anything
/// caching a view of "the currently bound X" can drop it.
pub trait ResourceObserver {
    fn texture_destroyed(&mut self, _key: TextureKey) {}
    fn render_buffer_destroyed(&mut self, _key: RenderBufferKey) {}
    fn frame_buffer_destroyed(&mut self, _key: FrameBufferKey) {}
    fn buffer_destroyed(&mut self, _key: BufferKey) {}
}

/// Cache of what is currently bound on the device.
///
/// Lets the manager skip redundant binds. Stale entries are cleared through
/// the [`ResourceObserver`] notifications.
#[derive(Debug, Clone, Default)]
pub struct BindingState {
    frame_buffer: Option<FrameBufferKey>,
    buffers: BTreeMap<BindTarget, BufferKey>,
    texture_units: Vec<Option<TextureKey>>,
    active_unit: u32,
}

impl BindingState {
    pub fn new(texture_units: u32) -> Self {
        Self {
            texture_units: vec![None; texture_units as usize],
            ..Self::default()
        }
    }

    pub fn frame_buffer(&self) -> Option<FrameBufferKey> {
        self.frame_buffer
    }

    pub fn buffer(&self, target: BindTarget) -> Option<BufferKey> {
        self.buffers.get(&target).copied()
    }

    pub fn texture(&self, unit: u32) -> Option<TextureKey> {
        self.texture_units.get(unit as usize).copied().flatten()
    }

    pub fn active_unit(&self) -> u32 {
        self.active_unit
    }

    pub fn texture_unit_count(&self) -> u32 {
        self.texture_units.len() as u32
    }

    /// Record a frame buffer bind. Returns `false` if it was already bound.
    pub(crate) fn set_frame_buffer(&mut self, key: Option<FrameBufferKey>) -> bool {
        if self.frame_buffer == key {
            return false;
        }
        self.frame_buffer = key;
        true
    }

    pub(crate) fn set_buffer(&mut self, target: BindTarget, key: Option<BufferKey>) -> bool {
        let previous = match key {
            Some(k) => self.buffers.insert(target, k),
            None => self.buffers.remove(&target),
        };
        previous != key
    }

    pub(crate) fn set_texture(&mut self, unit: u32, key: Option<TextureKey>) -> bool {
        let Some(slot) = self.texture_units.get_mut(unit as usize) else {
            return false;
        };
        self.active_unit = unit;
        if *slot == key {
            return false;
        }
        *slot = key;
        true
    }
}

impl ResourceObserver for BindingState {
    fn texture_destroyed(&mut self, key: TextureKey) {
        for slot in &mut self.texture_units {
            if *slot == Some(key) {
                *slot = None;
            }
        }
    }

    fn frame_buffer_destroyed(&mut self, key: FrameBufferKey) {
        if self.frame_buffer == Some(key) {
            self.frame_buffer = None;
        }
    }

    fn buffer_destroyed(&mut self, key: BufferKey) {
        self.buffers.retain(|_, bound| *bound != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn redundant_binds_are_detected() {
        let mut keys: SlotMap<BufferKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let mut state = BindingState::new(4);

        assert!(state.set_buffer(BindTarget::Vertex, Some(a)));
        assert!(!state.set_buffer(BindTarget::Vertex, Some(a)));
        assert!(state.set_buffer(BindTarget::Vertex, None));
        assert_eq!(state.buffer(BindTarget::Vertex), None);
    }

    #[test]
    fn destroy_notification_clears_texture_units() {
        let mut keys: SlotMap<TextureKey, ()> = SlotMap::with_key();
        let tex = keys.insert(());
        let mut state = BindingState::new(4);
        state.set_texture(0, Some(tex));
        state.set_texture(3, Some(tex));
        assert_eq!(state.active_unit(), 3);

        state.texture_destroyed(tex);
        assert_eq!(state.texture(0), None);
        assert_eq!(state.texture(3), None);
    }

    #[test]
    fn out_of_range_unit_is_ignored() {
        let mut keys: SlotMap<TextureKey, ()> = SlotMap::with_key();
        let tex = keys.insert(());
        let mut state = BindingState::new(2);
        assert!(!state.set_texture(5, Some(tex)));
        assert_eq!(state.texture(5), None);
    }
}
