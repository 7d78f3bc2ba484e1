//! rc-handles: single-threaded strong/weak reference-counted handles over
//! a shared control block.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: the guarantees of a shared/weak pointer pair, built by hand in
//!   small layers so each piece can be reasoned about independently.
//! - Layers:
//!   - `tokens`: counters that mint linear, zero-sized tokens. Every
//!     strong or weak unit a handle holds is a token that must be returned
//!     to the counter that minted it.
//!   - `block::ControlBlock`: the strong and weak counters, an existence
//!     flag and the allocation strategy (`Allocation::Detached` for an
//!     adopted box, `Allocation::InPlace` for one allocation holding both
//!     block and object). Owns the teardown and release protocol.
//!   - `Shared<T>` / `Weak<T>`: handles holding `(block, target, token)`.
//!     The target may differ from the block's object (aliasing).
//!   - `SelfRef<T>` / `SharedFromSelf`: an explicit back-reference field
//!     bound by the owning factory.
//!
//! Lifecycle
//! - Object teardown runs exactly once, when the strong count goes 1 -> 0,
//!   however many weak handles are outstanding.
//! - Block memory is released exactly once, when both counts are zero,
//!   whichever reaches zero last.
//! - The existence flag is cleared before the object's destructor runs, so
//!   weak handles report expiry from inside that destructor.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` (no atomics). Callers sharing handles
//!   across threads must add their own synchronization; this crate
//!   provides none.
//! - Counter overflow aborts the process, matching `Rc`.
//! - Cycles of `Shared` handles leak; use `Weak` for back-references.
//!
//! Failure modes
//! - Promoting an expired weak handle returns `HandleError::DanglingWeak`.
//! - Asking an object for a handle to itself before an owning factory has
//!   taken it returns `HandleError::NotOwned`.
//! - Dereferencing an empty `Shared` is a caller bug and panics.
//!
//! Unsafe code is confined to `block` and the `*Link` types in `shared`
//! and `weak`; the public API is safe apart from raw-pointer adoption and
//! the raw aliasing constructor.

mod block;
mod error;
mod self_ref;
mod shared;
pub mod tokens;
mod weak;

mod handles_proptest;

// Public surface
pub use block::Allocation;
pub use error::HandleError;
pub use self_ref::{SelfRef, SharedFromSelf};
pub use shared::Shared;
pub use weak::Weak;
