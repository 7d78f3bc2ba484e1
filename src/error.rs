//! Failures reported by handle operations.
//!
//! Only conditions a caller can check for are errors. Dereferencing an
//! empty `Shared` is a precondition violation and panics instead.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Promotion of a weak handle whose object has already been torn down.
    #[error("dangling weak reference: the object has already been destroyed")]
    DanglingWeak,

    /// Self-reference requested before any strong handle owns the object.
    #[error("object is not owned by any strong handle yet")]
    NotOwned,
}
