//! Control blocks: the shared bookkeeping behind `Shared` and `Weak`.
//!
//! Every block starts with a `ControlBlock` header holding the strong and
//! weak counters, an existence flag and the allocation strategy. The
//! object itself lives either in a separate box (`Allocation::Detached`)
//! or inline after the header (`Allocation::InPlace`). The strategy is
//! fixed when the block is created and dispatched through two entry
//! points stored in the header, so handles never need to know the
//! concrete block type.
//!
//! Lifecycle
//! - The strong count going 1 -> 0 tears the object down, exactly once.
//! - The block's own memory is released once both counts are zero.
//! - During teardown the block holds one extra weak unit, so a destructor
//!   that drops the last weak handle to its own block cannot free the
//!   block underneath the running teardown.
//!
//! All entry points that may release the block take `NonNull<ControlBlock>`
//! rather than `&self`; callers detach their pointer before returning
//! their token and never touch it afterwards.

use crate::tokens::{Count, StrongCount, StrongToken, WeakCount, WeakToken};
use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::ptr::{self, NonNull};

/// How the owned object is stored relative to its control block.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Allocation {
    /// Object boxed separately; the block only records its address.
    Detached,
    /// Object embedded in the block: one allocation for both.
    InPlace,
}

#[repr(C)]
pub(crate) struct ControlBlock {
    strong: StrongCount,
    weak: WeakCount,
    exists: Cell<bool>,
    allocation: Allocation,
    destroy: unsafe fn(NonNull<ControlBlock>),
    release: unsafe fn(NonNull<ControlBlock>),
}

#[repr(C)]
struct DetachedBlock<T: ?Sized> {
    header: ControlBlock,
    object: Cell<Option<NonNull<T>>>,
}

#[repr(C)]
struct InPlaceBlock<T> {
    header: ControlBlock,
    object: UnsafeCell<MaybeUninit<T>>,
}

#[cfg(test)]
thread_local! {
    static LIVE_BLOCKS: Cell<isize> = const { Cell::new(0) };
}

/// Blocks allocated and not yet released on this thread.
#[cfg(test)]
pub(crate) fn live_blocks() -> isize {
    LIVE_BLOCKS.with(Cell::get)
}

#[inline]
fn track_live(delta: isize) {
    #[cfg(test)]
    LIVE_BLOCKS.with(|c| c.set(c.get() + delta));
    #[cfg(not(test))]
    let _ = delta;
}

impl ControlBlock {
    fn header(
        allocation: Allocation,
        destroy: unsafe fn(NonNull<ControlBlock>),
        release: unsafe fn(NonNull<ControlBlock>),
    ) -> Self {
        Self {
            strong: StrongCount::new(),
            weak: WeakCount::new(),
            exists: Cell::new(false),
            allocation,
            destroy,
            release,
        }
    }

    /// Allocate a Detached block adopting `object`.
    ///
    /// Returns the block, the object's address and the first strong unit.
    pub(crate) fn detached<T: ?Sized>(object: Box<T>) -> (NonNull<Self>, NonNull<T>, StrongToken) {
        let target = NonNull::from(Box::leak(object));
        let block = Box::new(DetachedBlock {
            header: Self::header(
                Allocation::Detached,
                destroy_detached::<T>,
                release_detached::<T>,
            ),
            object: Cell::new(Some(target)),
        });
        block.header.exists.set(true);
        let token = block.header.strong.get();
        track_live(1);
        (NonNull::from(Box::leak(block)).cast(), target, token)
    }

    /// Allocate an In-Place block with `value` constructed inside it.
    pub(crate) fn in_place<T>(value: T) -> (NonNull<Self>, NonNull<T>, StrongToken) {
        let (block, target) = Self::in_place_with(MaybeUninit::new(value));
        // SAFETY: the block was just allocated and nothing else refers to it.
        let header = unsafe { block.as_ref() };
        header.exists.set(true);
        (block, target, header.strong.get())
    }

    /// Allocate an In-Place block whose object storage is still empty.
    ///
    /// Both counts start at zero and `exists()` is false until
    /// `init_in_place` writes the object.
    pub(crate) fn in_place_uninit<T>() -> (NonNull<Self>, NonNull<T>) {
        Self::in_place_with(MaybeUninit::uninit())
    }

    fn in_place_with<T>(storage: MaybeUninit<T>) -> (NonNull<Self>, NonNull<T>) {
        let raw = Box::into_raw(Box::new(InPlaceBlock {
            header: Self::header(Allocation::InPlace, destroy_in_place::<T>, release_in_place::<T>),
            object: UnsafeCell::new(storage),
        }));
        track_live(1);
        // SAFETY: `raw` comes from Box::into_raw and is non-null; the object
        // pointer is derived from it and so carries the whole allocation.
        unsafe {
            let object = UnsafeCell::raw_get(ptr::addr_of!((*raw).object)).cast::<T>();
            (NonNull::new_unchecked(raw).cast(), NonNull::new_unchecked(object))
        }
    }

    /// Write the object into an In-Place block from `in_place_uninit` and
    /// mint its first strong unit.
    ///
    /// # Safety
    /// `this`/`target` must come from the same `in_place_uninit::<T>` call,
    /// and the object must not have been written yet.
    pub(crate) unsafe fn init_in_place<T>(
        this: NonNull<Self>,
        target: NonNull<T>,
        value: T,
    ) -> StrongToken {
        let header = this.as_ref();
        debug_assert_eq!(header.allocation, Allocation::InPlace);
        debug_assert!(!header.exists.get());
        target.as_ptr().write(value);
        header.exists.set(true);
        header.strong.get()
    }

    #[inline]
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.current()
    }

    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.current()
    }

    /// True until the owned object has been torn down.
    #[inline]
    pub(crate) fn exists(&self) -> bool {
        self.exists.get()
    }

    #[inline]
    pub(crate) fn allocation(&self) -> Allocation {
        self.allocation
    }

    #[inline]
    pub(crate) fn acquire_strong(&self) -> StrongToken {
        debug_assert!(self.strong.current() > 0, "new strong unit on a dead object");
        self.strong.get()
    }

    /// Promotion path: a strong unit only while the object is still owned.
    #[inline]
    pub(crate) fn try_acquire_strong(&self) -> Option<StrongToken> {
        if !self.exists.get() {
            return None;
        }
        self.strong.try_get()
    }

    #[inline]
    pub(crate) fn acquire_weak(&self) -> WeakToken {
        self.weak.get()
    }

    /// Return a strong unit. The last one tears the object down and, if no
    /// weak units remain, releases the block.
    ///
    /// # Safety
    /// `this` must point to a live block and `token` must have been minted
    /// by its strong counter. The caller must not use `this` afterwards.
    pub(crate) unsafe fn release_strong(this: NonNull<Self>, token: StrongToken) {
        let block = this.as_ref();
        if !block.strong.put(token) {
            return;
        }
        let _hold = TeardownHold {
            block: this,
            token: ManuallyDrop::new(block.weak.get()),
        };
        // Cleared first: the object is torn down at most once.
        if block.exists.replace(false) {
            (block.destroy)(this);
        }
    }

    /// Return a weak unit, releasing the block if it was the last unit of
    /// either kind.
    ///
    /// # Safety
    /// Same contract as `release_strong`, for the weak counter.
    pub(crate) unsafe fn release_weak(this: NonNull<Self>, token: WeakToken) {
        let block = this.as_ref();
        if block.weak.put(token) && block.strong.current() == 0 {
            (block.release)(this);
        }
    }
}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("strong", &self.strong.current())
            .field("weak", &self.weak.current())
            .field("exists", &self.exists.get())
            .field("allocation", &self.allocation)
            .finish()
    }
}

// Weak unit held by a block while its object is torn down. Returned on
// drop, so the block is still released if the object's destructor panics.
struct TeardownHold {
    block: NonNull<ControlBlock>,
    token: ManuallyDrop<WeakToken>,
}

impl Drop for TeardownHold {
    fn drop(&mut self) {
        // SAFETY: the token is taken exactly once, here.
        let token = unsafe { ManuallyDrop::take(&mut self.token) };
        // SAFETY: the hold keeps the block alive until this call.
        unsafe { ControlBlock::release_weak(self.block, token) }
    }
}

unsafe fn destroy_detached<T: ?Sized>(this: NonNull<ControlBlock>) {
    let block = this.cast::<DetachedBlock<T>>();
    if let Some(object) = block.as_ref().object.take() {
        drop(Box::from_raw(object.as_ptr()));
    }
}

unsafe fn release_detached<T: ?Sized>(this: NonNull<ControlBlock>) {
    debug_assert!(this.as_ref().object_gone());
    track_live(-1);
    drop(Box::from_raw(this.cast::<DetachedBlock<T>>().as_ptr()));
}

unsafe fn destroy_in_place<T>(this: NonNull<ControlBlock>) {
    let block = this.cast::<InPlaceBlock<T>>().as_ptr();
    let object = UnsafeCell::raw_get(ptr::addr_of!((*block).object)).cast::<T>();
    ptr::drop_in_place(object);
}

unsafe fn release_in_place<T>(this: NonNull<ControlBlock>) {
    debug_assert!(this.as_ref().object_gone());
    track_live(-1);
    // MaybeUninit storage: freeing the block never drops the object again.
    drop(Box::from_raw(this.cast::<InPlaceBlock<T>>().as_ptr()));
}

impl ControlBlock {
    fn object_gone(&self) -> bool {
        !self.exists.get() && self.strong.current() == 0 && self.weak.current() == 0
    }
}
