//! `Weak<T>`: the observing handle.
//!
//! A weak handle holds one weak unit of a control block. It keeps the
//! block allocated but never the object: it cannot be dereferenced, only
//! promoted back to a `Shared` while some strong handle is still alive.

use crate::block::ControlBlock;
use crate::error::HandleError;
use crate::shared::Shared;
use crate::tokens::WeakToken;
use core::fmt;
use core::mem::{self, ManuallyDrop};
use core::ptr::NonNull;

/// One weak unit of a block, plus the address a promoted handle would
/// dereference to.
pub(crate) struct WeakLink<T: ?Sized> {
    block: NonNull<ControlBlock>,
    target: NonNull<T>,
    token: ManuallyDrop<WeakToken>,
}

impl<T: ?Sized> WeakLink<T> {
    pub(crate) fn new(block: NonNull<ControlBlock>, target: NonNull<T>, token: WeakToken) -> Self {
        Self {
            block,
            target,
            token: ManuallyDrop::new(token),
        }
    }

    #[inline]
    pub(crate) fn header(&self) -> &ControlBlock {
        // SAFETY: the weak unit held by this link keeps the block allocated.
        unsafe { self.block.as_ref() }
    }

    #[inline]
    pub(crate) fn block(&self) -> NonNull<ControlBlock> {
        self.block
    }

    #[inline]
    pub(crate) fn target(&self) -> NonNull<T> {
        self.target
    }

    fn share(&self) -> Self {
        Self::new(self.block, self.target, self.header().acquire_weak())
    }

    fn release(mut self) {
        // SAFETY: `self` is consumed, so the token is taken exactly once and
        // the block pointer is not used after it is returned.
        unsafe {
            let token = ManuallyDrop::take(&mut self.token);
            ControlBlock::release_weak(self.block, token);
        }
    }
}

/// Non-owning observer of a `Shared` object.
pub struct Weak<T: ?Sized> {
    link: Option<WeakLink<T>>,
}

impl<T: ?Sized> Weak<T> {
    /// A weak handle observing nothing; always expired.
    pub const fn new() -> Self {
        Self { link: None }
    }

    pub(crate) fn from_link(link: WeakLink<T>) -> Self {
        Self { link: Some(link) }
    }

    pub(crate) fn link(&self) -> Option<&WeakLink<T>> {
        self.link.as_ref()
    }

    /// True if this handle observes nothing or its object is gone.
    pub fn expired(&self) -> bool {
        self.link.as_ref().map_or(true, |link| !link.header().exists())
    }

    /// Promote to a `Shared`, or get an empty one if the object is gone.
    pub fn lock(&self) -> Shared<T> {
        if self.expired() {
            return Shared::empty();
        }
        Shared::try_from_weak(self).unwrap_or_default()
    }

    /// Promote to a `Shared`, failing with `HandleError::DanglingWeak` if
    /// the object is gone.
    pub fn upgrade(&self) -> Result<Shared<T>, HandleError> {
        Shared::try_from_weak(self)
    }

    /// Strong count of the observed block; 0 if empty. Diagnostic only:
    /// the value can go stale as soon as any strong handle is dropped.
    pub fn use_count(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.header().strong_count())
    }

    /// Weak count of the observed block, including this handle; 0 if empty.
    pub fn weak_count(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.header().weak_count())
    }

    /// Give up this handle's weak unit and become empty.
    pub fn reset(&mut self) {
        if let Some(link) = self.link.take() {
            link.release();
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.link, &mut other.link);
    }

    /// Move the handle out, leaving this one empty; no counts change.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// True if both handles observe one control block.
    pub fn owner_eq<U: ?Sized>(&self, other: &Weak<U>) -> bool {
        match (&self.link, &other.link) {
            (Some(a), Some(b)) => a.block == b.block,
            _ => false,
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.as_ref().map(WeakLink::share),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        let same = match (&self.link, &source.link) {
            (Some(a), Some(b)) => a.block == b.block && core::ptr::eq(a.target.as_ptr(), b.target.as_ptr()),
            (None, None) => true,
            _ => false,
        };
        if !same {
            *self = source.clone();
        }
    }
}

impl<'a, T: ?Sized> From<&'a Shared<T>> for Weak<T> {
    fn from(shared: &'a Shared<T>) -> Self {
        shared.downgrade()
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            None => f.write_str("Weak(empty)"),
            Some(link) => {
                let header = link.header();
                f.debug_struct("Weak")
                    .field("expired", &!header.exists())
                    .field("strong", &header.strong_count())
                    .field("weak", &header.weak_count())
                    .finish()
            }
        }
    }
}
