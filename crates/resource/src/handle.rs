use slotmap::new_key_type;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

new_key_type! {
    pub struct TextureKey;
    pub struct RenderBufferKey;
    pub struct FrameBufferKey;
    pub struct BufferKey;
    pub struct QueryKey;
}

/// Any manager-owned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Texture(TextureKey),
    RenderBuffer(RenderBufferKey),
    FrameBuffer(FrameBufferKey),
    Buffer(BufferKey),
    Query(QueryKey),
}

/// Key types the manager hands out shared handles for.
pub trait ResourceKind: slotmap::Key + fmt::Debug {
    fn wrap(self) -> ResourceKey;
}

impl ResourceKind for TextureKey {
    fn wrap(self) -> ResourceKey {
        ResourceKey::Texture(self)
    }
}

impl ResourceKind for RenderBufferKey {
    fn wrap(self) -> ResourceKey {
        ResourceKey::RenderBuffer(self)
    }
}

impl ResourceKind for FrameBufferKey {
    fn wrap(self) -> ResourceKey {
        ResourceKey::FrameBuffer(self)
    }
}

impl ResourceKind for BufferKey {
    fn wrap(self) -> ResourceKey {
        ResourceKey::Buffer(self)
    }
}

impl ResourceKind for QueryKey {
    fn wrap(self) -> ResourceKey {
        ResourceKey::Query(self)
    }
}

/// Keys whose last strong handle was dropped, waiting for the manager to
/// destroy them.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReleaseQueue(Rc<RefCell<Vec<ResourceKey>>>);

impl ReleaseQueue {
    pub(crate) fn push(&self, key: ResourceKey) {
        self.0.borrow_mut().push(key);
    }

    pub(crate) fn take(&self) -> Vec<ResourceKey> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

struct Owner<K: ResourceKind> {
    key: K,
    releases: ReleaseQueue,
}

impl<K: ResourceKind> Drop for Owner<K> {
    fn drop(&mut self) {
        self.releases.push(self.key.wrap());
    }
}

/// Strong, reference-counted handle to a manager-owned resource.
///
/// Cloning shares ownership. When the last clone is dropped the key is queued
/// and the manager destroys the backend object on its next collection pass,
/// exactly once. Non-owning views are plain keys obtained with [`Shared::key`].
pub struct Shared<K: ResourceKind>(Rc<Owner<K>>);

impl<K: ResourceKind> Shared<K> {
    pub(crate) fn new(key: K, releases: ReleaseQueue) -> Self {
        Self(Rc::new(Owner { key, releases }))
    }

    pub fn key(&self) -> K {
        self.0.key
    }

    /// Number of strong handles sharing this resource.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<K: ResourceKind> Clone for Shared<K> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<K: ResourceKind> fmt::Debug for Shared<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("key", &self.0.key)
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl<K: ResourceKind> PartialEq for Shared<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

pub type TextureHandle = Shared<TextureKey>;
pub type RenderBufferHandle = Shared<RenderBufferKey>;
pub type FrameBufferHandle = Shared<FrameBufferKey>;
pub type BufferHandle = Shared<BufferKey>;
pub type QueryHandle = Shared<QueryKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn last_drop_queues_release_once() {
        let mut keys: SlotMap<TextureKey, ()> = SlotMap::with_key();
        let key = keys.insert(());
        let queue = ReleaseQueue::default();

        let a = Shared::new(key, queue.clone());
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);

        drop(a);
        assert!(queue.is_empty());
        drop(b);
        assert_eq!(queue.take(), vec![ResourceKey::Texture(key)]);
        assert!(queue.is_empty());
    }
}
