use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

/// Base alignment of every slab. Requests with a stricter alignment take the
/// large-allocation path.
const SLAB_ALIGN: usize = 16;

const DEFAULT_SLAB_SIZE: usize = 16 * 1024;

/// Configured slab sizes above this fall back to the default.
const MAX_SLAB_SIZE: usize = 1 << 30;

const DEFAULT_SLAB_LAYOUT: Layout = match Layout::from_size_align(DEFAULT_SLAB_SIZE, SLAB_ALIGN) {
    Ok(layout) => layout,
    Err(_) => panic!("default slab layout is invalid"),
};

/// Arena configuration.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Size in bytes of each slab. Requests of at least half this size are
    /// treated as large allocations.
    pub slab_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            slab_size: DEFAULT_SLAB_SIZE,
        }
    }
}

/// Allocation counters for instrumentation and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Slabs currently owned by the arena.
    pub slab_count: usize,
    /// Slabs ever created. Stays flat once the working set is reached.
    pub slabs_created: usize,
    /// Live large allocations since the last reset.
    pub large_allocations: usize,
    /// Bytes held by live large allocations.
    pub large_bytes: usize,
    /// Bytes handed out from slabs since the last reset, padding included.
    pub slab_bytes_used: usize,
}

struct Slab {
    ptr: NonNull<u8>,
}

struct LargeBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

/// Slab-bump allocator reset once per frame.
pub struct FrameArena {
    slab_size: usize,
    slab_layout: Layout,
    slabs: RefCell<Vec<Slab>>,
    large: RefCell<Vec<LargeBlock>>,
    current: Cell<usize>,
    offset: Cell<usize>,
    slabs_created: Cell<usize>,
    slab_bytes_used: Cell<usize>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    pub fn with_config(config: ArenaConfig) -> Self {
        let slab_layout = Some(config.slab_size.max(SLAB_ALIGN * 4))
            .filter(|&size| size <= MAX_SLAB_SIZE)
            .and_then(|size| Layout::from_size_align(size, SLAB_ALIGN).ok())
            .unwrap_or_else(|| {
                tracing::warn!(
                    requested = config.slab_size,
                    fallback = DEFAULT_SLAB_SIZE,
                    "slab size out of range, using the default"
                );
                DEFAULT_SLAB_LAYOUT
            });
        Self {
            slab_size: slab_layout.size(),
            slab_layout,
            slabs: RefCell::new(Vec::new()),
            large: RefCell::new(Vec::new()),
            current: Cell::new(0),
            offset: Cell::new(0),
            slabs_created: Cell::new(0),
            slab_bytes_used: Cell::new(0),
        }
    }

    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Move `value` into the arena.
    pub fn alloc<T: Copy>(&self, value: T) -> &mut T {
        let ptr = self.alloc_layout(Layout::new::<T>()).cast::<T>();
        // SAFETY: `ptr` is valid for writes of `T`, properly aligned, and not
        // aliased by any other allocation until the arena is reset.
        unsafe {
            ptr.as_ptr().write(value);
            &mut *ptr.as_ptr()
        }
    }

    /// Copy `src` into the arena.
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> &mut [T] {
        let dst = self.alloc_uninit_slice::<T>(src.len());
        // SAFETY: `dst` has room for `src.len()` elements and does not overlap
        // `src`, which lives outside the arena or in an earlier allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len());
            std::slice::from_raw_parts_mut(dst.as_ptr(), src.len())
        }
    }

    /// Allocate `len` elements, initialising element `i` with `f(i)`.
    ///
    /// # Panics
    ///
    /// If `len` elements of `T` do not fit in an allocation layout.
    pub fn alloc_slice_fill_with<T: Copy>(
        &self,
        len: usize,
        mut f: impl FnMut(usize) -> T,
    ) -> &mut [T] {
        let dst = self.alloc_uninit_slice::<T>(len);
        // SAFETY: every element in `0..len` is written before the slice is
        // formed, and the memory is exclusively ours until reset.
        unsafe {
            for i in 0..len {
                dst.as_ptr().add(i).write(f(i));
            }
            std::slice::from_raw_parts_mut(dst.as_ptr(), len)
        }
    }

    /// Raw allocation for `layout`. Zero-sized requests return a dangling,
    /// well-aligned pointer.
    pub fn alloc_layout(&self, layout: Layout) -> NonNull<u8> {
        if layout.size() == 0 {
            return dangling(layout.align());
        }
        if layout.size() < self.slab_size / 2 && layout.align() <= SLAB_ALIGN {
            self.alloc_small(layout)
        } else {
            self.alloc_large(layout)
        }
    }

    /// Rewind to the first slab and free every large allocation.
    pub fn reset(&mut self) {
        let large = self.large.get_mut();
        for block in large.drain(..) {
            // SAFETY: each block was allocated with exactly this layout and
            // `&mut self` proves no arena reference is still alive.
            unsafe { alloc::dealloc(block.ptr.as_ptr(), block.layout) };
        }
        self.current.set(0);
        self.offset.set(0);
        self.slab_bytes_used.set(0);
    }

    pub fn stats(&self) -> ArenaStats {
        let large = self.large.borrow();
        ArenaStats {
            slab_count: self.slabs.borrow().len(),
            slabs_created: self.slabs_created.get(),
            large_allocations: large.len(),
            large_bytes: large.iter().map(|b| b.layout.size()).sum(),
            slab_bytes_used: self.slab_bytes_used.get(),
        }
    }

    fn alloc_uninit_slice<T: Copy>(&self, len: usize) -> NonNull<T> {
        let layout = match Layout::array::<T>(len) {
            Ok(layout) => layout,
            Err(_) => panic!("arena slice of {len} elements overflows a layout"),
        };
        self.alloc_layout(layout).cast::<T>()
    }

    fn alloc_small(&self, layout: Layout) -> NonNull<u8> {
        let mut slabs = self.slabs.borrow_mut();
        loop {
            let index = self.current.get();
            if index == slabs.len() {
                slabs.push(self.new_slab());
            }
            let start = align_up(self.offset.get(), layout.align());
            let end = start + layout.size();
            if end <= self.slab_size {
                let used = self.slab_bytes_used.get() + (end - self.offset.get());
                self.slab_bytes_used.set(used);
                self.offset.set(end);
                // SAFETY: `start + size <= slab_size`, so the pointer stays in
                // the slab allocation.
                return unsafe { NonNull::new_unchecked(slabs[index].ptr.as_ptr().add(start)) };
            }
            // The tail of this slab is skipped for the rest of the frame.
            self.current.set(index + 1);
            self.offset.set(0);
        }
    }

    fn new_slab(&self) -> Slab {
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc(self.slab_layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(self.slab_layout);
        };
        self.slabs_created.set(self.slabs_created.get() + 1);
        tracing::trace!(
            slab = self.slabs_created.get(),
            size = self.slab_size,
            "frame arena slab created"
        );
        Slab { ptr }
    }

    fn alloc_large(&self, layout: Layout) -> NonNull<u8> {
        // SAFETY: callers route zero-sized layouts away from this path.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        self.large.borrow_mut().push(LargeBlock { ptr, layout });
        ptr
    }
}

impl Default for FrameArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameArena {
    fn drop(&mut self) {
        self.reset();
        for slab in self.slabs.get_mut().drain(..) {
            // SAFETY: every slab was allocated with `slab_layout`.
            unsafe { alloc::dealloc(slab.ptr.as_ptr(), self.slab_layout) };
        }
    }
}

impl std::fmt::Debug for FrameArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameArena")
            .field("slab_size", &self.slab_size)
            .field("stats", &self.stats())
            .finish()
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

fn dangling(align: usize) -> NonNull<u8> {
    // SAFETY: alignments are non-zero powers of two.
    unsafe { NonNull::new_unchecked(align as *mut u8) }
}
