//! Self-reference: objects that hand out handles to themselves.
//!
//! An object that needs this embeds a `SelfRef<Self>` field and implements
//! `SharedFromSelf`. The field starts unbound. The owning factories
//! (`Shared::new_self_aware`, `Shared::from_box_self_aware`) bind it to
//! the new block once the object is owned, so asking for a handle to self
//! while the object is still being built fails with `NotOwned` instead of
//! inventing a second owner.

use crate::error::HandleError;
use crate::shared::Shared;
use crate::weak::Weak;
use core::cell::OnceCell;
use core::fmt;

/// Back-reference slot filled in by the owning factory.
pub struct SelfRef<T> {
    slot: OnceCell<Weak<T>>,
}

impl<T> SelfRef<T> {
    pub const fn new() -> Self {
        Self {
            slot: OnceCell::new(),
        }
    }

    /// Bind to the owning block. Returns false if already bound.
    pub(crate) fn bind(&self, weak: Weak<T>) -> bool {
        self.slot.set(weak).is_ok()
    }

    /// True once an owning factory has taken the object.
    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn shared(&self) -> Result<Shared<T>, HandleError> {
        self.slot.get().ok_or(HandleError::NotOwned)?.upgrade()
    }

    pub fn weak(&self) -> Result<Weak<T>, HandleError> {
        self.slot.get().cloned().ok_or(HandleError::NotOwned)
    }
}

impl<T> Default for SelfRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Capability to mint handles to `self` once owned.
///
/// Only `Shared::new_self_aware` and `Shared::from_box_self_aware` bind the
/// back-reference. An object owned through `Shared::new`, `from_box`,
/// `from_raw` or `From` stays unbound and keeps reporting `NotOwned`.
pub trait SharedFromSelf: Sized {
    fn self_ref(&self) -> &SelfRef<Self>;

    /// A new strong handle sharing the block that owns `self`.
    ///
    /// Fails with `NotOwned` before an owning factory has taken the
    /// object, and with `DanglingWeak` once it is being torn down.
    fn shared_from_self(&self) -> Result<Shared<Self>, HandleError> {
        self.self_ref().shared()
    }

    /// A new weak handle observing the block that owns `self`.
    fn weak_from_self(&self) -> Result<Weak<Self>, HandleError> {
        self.self_ref().weak()
    }
}
