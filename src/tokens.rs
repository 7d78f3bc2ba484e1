//! Lifetime-tied linear tokens and counting traits.
//!
//! Tokens are zero-sized proofs that a unit was acquired from a
//! particular counter. Dropping a token panics; the only valid way to
//! dispose of it is to return it to the originating counter via
//! `Count::put`. Every strong or weak unit a handle contributes to a
//! control block is held as one of these tokens.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

/// Zero-sized, linear token tied to its originating counter via lifetime.
pub struct Token<'a, C: ?Sized> {
    // Lifetime is tracked separately from the counter type to avoid
    // imposing `'a` bounds on `C`.
    _lt: PhantomData<&'a ()>,
    _ctr: PhantomData<*const C>,
}

impl<'a, C: ?Sized> Token<'a, C> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            _lt: PhantomData,
            _ctr: PhantomData,
        }
    }
}

impl<'a, C: ?Sized> Drop for Token<'a, C> {
    fn drop(&mut self) {
        // Intentional fail-fast on misuse: token must be consumed by Count::put.
        panic!("Token dropped without Count::put");
    }
}

/// A source of counted units, enforced by linear Token flow.
pub trait Count {
    /// The token type minted by this counter.
    type Token<'a>: Sized
    where
        Self: 'a;

    /// Acquire one unit and return a linear token for it.
    ///
    /// Tokens are minted with a 'static lifetime parameter. The token is
    /// still branded to the counter kind via its type parameter, and can be
    /// covariantly shortened when returning it via `put`.
    fn get(&self) -> Self::Token<'static>;

    /// Acquire one unit only if the count is currently non-zero.
    fn try_get(&self) -> Option<Self::Token<'static>>;

    /// Return (consume) a previously acquired token.
    /// Returns true if the count is now zero.
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool;

    /// Number of outstanding units.
    fn current(&self) -> usize;
}

/// Names which of a control block's two counters a `CellCount` is.
pub trait CountKind {
    const NAME: &'static str;
}

/// Owning units: the object lives while this count is non-zero.
pub enum StrongUnits {}

/// Observing units: the block lives while this or the strong count is non-zero.
pub enum WeakUnits {}

impl CountKind for StrongUnits {
    const NAME: &'static str = "strong";
}

impl CountKind for WeakUnits {
    const NAME: &'static str = "weak";
}

/// Single-threaded counter of one kind of unit.
pub struct CellCount<K> {
    count: Cell<usize>,
    _kind: PhantomData<fn() -> K>,
}

pub type StrongCount = CellCount<StrongUnits>;
pub type WeakCount = CellCount<WeakUnits>;

/// A strong unit held by a `Shared` handle.
pub type StrongToken = Token<'static, StrongCount>;
/// A weak unit held by a `Weak` handle (or by a block during teardown).
pub type WeakToken = Token<'static, WeakCount>;

impl<K: CountKind> CellCount<K> {
    pub const fn new() -> Self {
        Self {
            count: Cell::new(0),
            _kind: PhantomData,
        }
    }
}

impl<K: CountKind> Default for CellCount<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CountKind> fmt::Debug for CellCount<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellCount")
            .field("kind", &K::NAME)
            .field("count", &self.count.get())
            .finish()
    }
}

impl<K: CountKind + 'static> Count for CellCount<K> {
    type Token<'a>
        = Token<'a, Self>
    where
        Self: 'a;

    #[inline]
    fn get(&self) -> Self::Token<'static> {
        let n = self.count.get().wrapping_add(1);
        self.count.set(n);
        if n == 0 {
            // Follow Rc semantics: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        Token::<'static, Self>::new()
    }

    #[inline]
    fn try_get(&self) -> Option<Self::Token<'static>> {
        if self.count.get() == 0 {
            None
        } else {
            Some(self.get())
        }
    }

    #[inline]
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool {
        // Consume first so a failed assertion does not drop the token mid-unwind.
        core::mem::forget(t);
        let c = self.count.get();
        assert!(c > 0, "{} count underflow", K::NAME);
        let n = c - 1;
        self.count.set(n);
        n == 0
    }

    #[inline]
    fn current(&self) -> usize {
        self.count.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn get_and_put_track_the_count() {
        let c = StrongCount::new();
        let t1 = c.get();
        let t2 = c.get();
        assert_eq!(c.current(), 2);
        assert!(!c.put(t1));
        assert_eq!(c.current(), 1);
        assert!(c.put(t2));
        assert_eq!(c.current(), 0);
    }

    #[test]
    fn try_get_refuses_a_zero_count() {
        let c = StrongCount::new();
        assert!(c.try_get().is_none());
        let t = c.get();
        let t2 = c.try_get().expect("count is non-zero");
        assert_eq!(c.current(), 2);
        c.put(t);
        c.put(t2);
    }

    #[test]
    fn dropping_a_token_panics() {
        let c = WeakCount::new();
        let res = catch_unwind(AssertUnwindSafe(|| {
            let t = c.get();
            drop(t);
        }));
        assert!(res.is_err(), "dropping a token must panic");
    }

    #[test]
    fn returning_a_foreign_token_to_an_empty_counter_panics() {
        let a = WeakCount::new();
        let b = WeakCount::new();
        let t = a.get();
        let res = catch_unwind(AssertUnwindSafe(|| {
            b.put(t);
        }));
        assert!(res.is_err(), "underflow must be detected");
        assert_eq!(b.current(), 0);
    }

    enum ExtraUnits {}

    impl CountKind for ExtraUnits {
        const NAME: &'static str = "extra";
    }

    fn cycle<K: CountKind + 'static>(c: &CellCount<K>) -> usize {
        let t = c.get();
        let peak = c.current();
        let t2 = c.try_get().expect("count is non-zero");
        assert!(!c.put(t2));
        assert!(c.put(t));
        peak
    }

    // Counting is generic over the kind marker, including kinds defined
    // outside this module.
    #[test]
    fn every_kind_counts_through_the_generic_impl() {
        assert_eq!(cycle(&StrongCount::new()), 1);
        assert_eq!(cycle(&WeakCount::new()), 1);
        let extra = CellCount::<ExtraUnits>::new();
        assert_eq!(cycle(&extra), 1);
        assert_eq!(extra.current(), 0);
        assert!(format!("{:?}", extra).contains("extra"));
    }

    #[test]
    fn debug_names_the_kind() {
        let c = StrongCount::new();
        let t = c.get();
        let s = format!("{:?}", c);
        assert!(s.contains("strong"));
        assert!(s.contains("count: 1"));
        c.put(t);
    }
}
