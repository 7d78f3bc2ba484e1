//! `Shared<T>`: the owning handle.
//!
//! A non-empty `Shared` holds one strong unit of a control block plus the
//! address it dereferences to. That address is usually the block's own
//! object, but aliasing handles (`alias`, `project`) point at any place
//! the owned object keeps alive, e.g. one of its fields.
//!
//! Equality and hashing use the target address only. Two handles to
//! different fields of one object are unequal even though they share a
//! block; `owner_eq` compares blocks instead. Zero-sized objects all share
//! one dangling address, so separately owned ZSTs compare equal; use
//! `owner_eq` to tell them apart.
//!
//! Cycles made only of `Shared` handles never reach a zero strong count
//! and leak. Back-references should be `Weak`.

use crate::block::{Allocation, ControlBlock};
use crate::error::HandleError;
use crate::self_ref::SharedFromSelf;
use crate::tokens::StrongToken;
use crate::weak::{Weak, WeakLink};
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::Deref;
use core::ptr::{self, NonNull};

/// One strong unit of a block, plus the address a handle dereferences to.
pub(crate) struct StrongLink<T: ?Sized> {
    block: NonNull<ControlBlock>,
    target: NonNull<T>,
    token: ManuallyDrop<StrongToken>,
}

impl<T: ?Sized> StrongLink<T> {
    pub(crate) fn new(block: NonNull<ControlBlock>, target: NonNull<T>, token: StrongToken) -> Self {
        Self {
            block,
            target,
            token: ManuallyDrop::new(token),
        }
    }

    #[inline]
    pub(crate) fn header(&self) -> &ControlBlock {
        // SAFETY: the strong unit held by this link keeps the block allocated.
        unsafe { self.block.as_ref() }
    }

    /// Another strong unit of the same block, pointing at `target`.
    fn share<U: ?Sized>(&self, target: NonNull<U>) -> StrongLink<U> {
        StrongLink::new(self.block, target, self.header().acquire_strong())
    }

    fn release(mut self) {
        // SAFETY: `self` is consumed, so the token is taken exactly once and
        // the block pointer is not used after it is returned.
        unsafe {
            let token = ManuallyDrop::take(&mut self.token);
            ControlBlock::release_strong(self.block, token);
        }
    }
}

/// Owning, single-threaded reference-counted handle.
///
/// Cloning increments the strong count; dropping decrements it and tears
/// the object down when the last strong handle goes away. A handle may be
/// empty: it then owns nothing, `use_count()` is 0 and dereferencing it
/// panics.
pub struct Shared<T: ?Sized> {
    link: Option<StrongLink<T>>,
    // Owns a T for drop-check purposes; raw pointers also keep this !Send + !Sync.
    _owns: PhantomData<T>,
}

impl<T: ?Sized> Shared<T> {
    /// A handle that owns nothing.
    pub const fn empty() -> Self {
        Self {
            link: None,
            _owns: PhantomData,
        }
    }

    pub(crate) fn from_link(link: StrongLink<T>) -> Self {
        Self {
            link: Some(link),
            _owns: PhantomData,
        }
    }

    /// Adopt a separately allocated object (Detached strategy).
    pub fn from_box(object: Box<T>) -> Self {
        let (block, target, token) = ControlBlock::detached(object);
        Self::from_link(StrongLink::new(block, target, token))
    }

    /// Adopt a raw address. A null pointer yields an empty handle.
    ///
    /// # Safety
    /// A non-null `ptr` must come from `Box::into_raw` and must not be
    /// owned by anything else; the handle frees it with `Box`.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        if ptr.cast::<u8>().is_null() {
            Self::empty()
        } else {
            Self::from_box(Box::from_raw(ptr))
        }
    }

    /// Aliasing constructor: shares `owner`'s block (one more strong unit)
    /// but dereferences to `target`.
    ///
    /// The whole object behind `owner` stays alive as long as the returned
    /// handle does. An empty `owner` or a null `target` yields an empty
    /// handle.
    ///
    /// # Safety
    /// `target` must stay valid for reads for as long as `owner`'s object
    /// is alive, typically because it points into that object.
    pub unsafe fn alias<U: ?Sized>(owner: &Shared<U>, target: *const T) -> Self {
        match (&owner.link, NonNull::new(target as *mut T)) {
            (Some(link), Some(target)) => Self::from_link(link.share(target)),
            _ => Self::empty(),
        }
    }

    /// Safe aliasing: a handle to a place reachable from this handle's
    /// target, keeping the whole object alive. `project` is not called on
    /// an empty handle.
    pub fn project<U, F>(&self, project: F) -> Shared<U>
    where
        U: ?Sized,
        F: for<'x> FnOnce(&'x T) -> &'x U,
    {
        match &self.link {
            None => Shared::empty(),
            Some(link) => {
                // SAFETY: the link's strong unit keeps the target alive.
                let place = project(unsafe { link.target.as_ref() });
                Shared::from_link(link.share(NonNull::from(place)))
            }
        }
    }

    /// Promote a weak handle.
    ///
    /// Fails with `HandleError::DanglingWeak` if the weak handle is empty or
    /// its object has already been torn down (or is not constructed yet).
    pub fn try_from_weak(weak: &Weak<T>) -> Result<Self, HandleError> {
        let link = weak.link().ok_or(HandleError::DanglingWeak)?;
        let token = link
            .header()
            .try_acquire_strong()
            .ok_or(HandleError::DanglingWeak)?;
        Ok(Self::from_link(StrongLink::new(link.block(), link.target(), token)))
    }

    /// A weak handle observing the same block and target.
    pub fn downgrade(&self) -> Weak<T> {
        match &self.link {
            None => Weak::new(),
            Some(link) => Weak::from_link(WeakLink::new(
                link.block,
                link.target,
                link.header().acquire_weak(),
            )),
        }
    }

    /// Give up this handle's strong unit and become empty.
    pub fn reset(&mut self) {
        if let Some(link) = self.link.take() {
            link.release();
        }
    }

    /// Release the current object, then adopt `ptr`. Does nothing if `ptr`
    /// is the current target; a null `ptr` leaves the handle empty.
    ///
    /// # Safety
    /// Same contract as `from_raw` whenever `ptr` differs from the current
    /// target.
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        if ptr.cast::<u8>() as *const u8 == self.addr() {
            return;
        }
        self.reset();
        *self = Self::from_raw(ptr);
    }

    /// Release the current object, then adopt `object`.
    pub fn reset_box(&mut self, object: Box<T>) {
        self.reset();
        *self = Self::from_box(object);
    }

    /// Exchange block and target with `other`; no counts change.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.link, &mut other.link);
    }

    /// Move the handle out, leaving this one empty; no counts change.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// The target, or `None` for an empty handle.
    pub fn get(&self) -> Option<&T> {
        // SAFETY: the link's strong unit keeps the target alive.
        self.link.as_ref().map(|link| unsafe { link.target.as_ref() })
    }

    /// Mutable access, only while this is the sole handle of either kind.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let link = self.link.as_mut()?;
        let header = link.header();
        if header.strong_count() == 1 && header.weak_count() == 0 {
            // SAFETY: no other handle can reach the object.
            Some(unsafe { link.target.as_mut() })
        } else {
            None
        }
    }

    /// The target address, or `None` for an empty handle.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.link.as_ref().map(|link| link.target)
    }

    /// Number of strong handles sharing this block; 0 if empty.
    pub fn use_count(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.header().strong_count())
    }

    /// Number of weak handles observing this block; 0 if empty.
    pub fn weak_count(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.header().weak_count())
    }

    pub fn is_empty(&self) -> bool {
        self.link.is_none()
    }

    pub fn is_some(&self) -> bool {
        self.link.is_some()
    }

    /// How the owned object is allocated; `None` if empty.
    pub fn allocation(&self) -> Option<Allocation> {
        self.link.as_ref().map(|link| link.header().allocation())
    }

    /// True if both handles share one control block, whatever their targets.
    pub fn owner_eq<U: ?Sized>(&self, other: &Shared<U>) -> bool {
        match (&self.link, &other.link) {
            (Some(a), Some(b)) => a.block == b.block,
            _ => false,
        }
    }

    fn addr(&self) -> *const u8 {
        self.link
            .as_ref()
            .map_or(ptr::null(), |link| link.target.as_ptr().cast::<u8>() as *const u8)
    }
}

impl<T> Shared<T> {
    /// Construct `value` inside a fresh control block: one allocation for
    /// both (In-Place strategy).
    pub fn new(value: T) -> Self {
        let (block, target, token) = ControlBlock::in_place(value);
        Self::from_link(StrongLink::new(block, target, token))
    }

    /// Construct an In-Place object that receives a weak handle to itself.
    ///
    /// Inside `build` the weak handle is expired: the object is not owned
    /// yet, so promotion fails. It becomes live once `new_cyclic` returns.
    pub fn new_cyclic<F>(build: F) -> Self
    where
        F: FnOnce(&Weak<T>) -> T,
    {
        let (block, target) = ControlBlock::in_place_uninit::<T>();
        // SAFETY: the block was just allocated; this weak unit keeps it
        // allocated while `build` runs, including if `build` panics.
        let weak = Weak::from_link(WeakLink::new(block, target, unsafe {
            block.as_ref().acquire_weak()
        }));
        let value = build(&weak);
        // SAFETY: `block`/`target` come from `in_place_uninit` and the
        // object has not been written.
        let token = unsafe { ControlBlock::init_in_place(block, target, value) };
        drop(weak);
        Self::from_link(StrongLink::new(block, target, token))
    }
}

impl<T: SharedFromSelf> Shared<T> {
    /// `new` for objects carrying a self-reference: binds the object's
    /// `SelfRef` to the new block before returning.
    pub fn new_self_aware(value: T) -> Self {
        let shared = Self::new(value);
        shared.bind_self();
        shared
    }

    /// `from_box` for objects carrying a self-reference.
    pub fn from_box_self_aware(object: Box<T>) -> Self {
        let shared = Self::from_box(object);
        shared.bind_self();
        shared
    }

    fn bind_self(&self) {
        if let Some(value) = self.get() {
            let bound = value.self_ref().bind(self.downgrade());
            debug_assert!(bound, "object already bound to another block");
        }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        match &self.link {
            None => Self::empty(),
            Some(link) => Self::from_link(link.share(link.target)),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        let same = match (&self.link, &source.link) {
            (Some(a), Some(b)) => a.block == b.block && ptr::eq(a.target.as_ptr(), b.target.as_ptr()),
            (None, None) => true,
            _ => false,
        };
        if !same {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.link {
            // SAFETY: the link's strong unit keeps the target alive.
            Some(link) => unsafe { link.target.as_ref() },
            None => panic!("dereferenced an empty Shared handle"),
        }
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

/// Target-address equality. Distinct zero-sized objects share an address;
/// `owner_eq` distinguishes their blocks.
impl<T: ?Sized, U: ?Sized> PartialEq<Shared<U>> for Shared<T> {
    fn eq(&self, other: &Shared<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.addr() as usize).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            None => f.write_str("Shared(empty)"),
            Some(link) => {
                let header = link.header();
                f.debug_struct("Shared")
                    // SAFETY: the link's strong unit keeps the target alive.
                    .field("value", &unsafe { link.target.as_ref() })
                    .field("strong", &header.strong_count())
                    .field("weak", &header.weak_count())
                    .field("allocation", &header.allocation())
                    .finish()
            }
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(object: Box<T>) -> Self {
        Self::from_box(object)
    }
}

impl<'a, T: ?Sized> TryFrom<&'a Weak<T>> for Shared<T> {
    type Error = HandleError;

    fn try_from(weak: &'a Weak<T>) -> Result<Self, HandleError> {
        Self::try_from_weak(weak)
    }
}
