// Weak handle test suite.
//
// Invariants exercised:
// - A weak handle never keeps the object alive, only the block.
// - expired() flips the instant the last strong handle goes, even while
//   other weak handles remain.
// - lock() on a live handle adds one strong unit; on an expired one it
//   returns an empty handle. upgrade() reports the failure as an error.
// - new_cyclic hands the constructor an expired weak handle to the object
//   being built; it becomes live once construction completes.
use rc_handles::{HandleError, Shared, Weak};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct Counted(Rc<Cell<usize>>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

// Scenario B: derive a weak handle, drop the strong one.
#[test]
fn weak_expires_with_last_strong() {
    let s = Shared::new(7);
    let w = s.downgrade();
    assert!(!w.expired());
    drop(s);
    assert!(w.expired());
    assert!(w.lock().is_empty());
    assert_eq!(w.use_count(), 0);
}

// Expiry does not wait for other weak handles; teardown runs once.
#[test]
fn expiry_is_immediate_with_other_weaks_outstanding() {
    let drops = Rc::new(Cell::new(0));
    let s = Shared::from_box(Box::new(Counted(drops.clone())));
    let weaks: Vec<Weak<Counted>> = (0..3).map(|_| Weak::from(&s)).collect();
    assert_eq!(s.weak_count(), 3);
    let s2 = s.clone();
    drop(s);
    assert!(weaks.iter().all(|w| !w.expired()));
    drop(s2);
    assert_eq!(drops.get(), 1);
    assert!(weaks.iter().all(Weak::expired));
    assert!(weaks.iter().all(|w| w.weak_count() == 3));
    drop(weaks);
    assert_eq!(drops.get(), 1);
}

// lock() on a live handle: use_count is the pre-lock count + 1.
#[test]
fn lock_adds_one_strong_unit() {
    let s = Shared::new("live".to_string());
    let other = s.clone();
    let w = s.downgrade();
    let before = w.use_count();
    let locked = w.lock();
    assert_eq!(locked.use_count(), before + 1);
    assert_eq!(*locked, "live");
    assert!(locked == s);
    drop((other, locked));
    assert_eq!(s.use_count(), 1);
}

// Promotion failure is a distinct, checkable error.
#[test]
fn promotion_of_dangling_weak_fails() {
    let s = Shared::new(1u64);
    let w = s.downgrade();
    let promoted = Shared::<u64>::try_from(&w).expect("live");
    assert!(promoted.is_some());
    assert_eq!(s.use_count(), 2);
    drop(promoted);
    drop(s);
    assert_eq!(Shared::try_from_weak(&w).err(), Some(HandleError::DanglingWeak));
    assert_eq!(w.upgrade().err(), Some(HandleError::DanglingWeak));
    assert_eq!(Shared::<u64>::try_from(&w).err(), Some(HandleError::DanglingWeak));
    assert_eq!(
        Shared::try_from_weak(&Weak::<u64>::new()).err(),
        Some(HandleError::DanglingWeak)
    );
}

// Weak handles derived from an aliasing handle promote to the alias target.
#[test]
fn weak_of_alias_promotes_to_alias_target() {
    let whole = Shared::new((3u8, "tail".to_string()));
    let tail = whole.project(|p| &p.1);
    let w = tail.downgrade();
    drop(tail);
    let again = w.lock();
    assert_eq!(again.as_str(), "tail");
    assert!(again.owner_eq(&whole));
    drop((whole, again));
    assert!(w.expired());
}

// Copy/move/reset/swap of weak handles adjust only the weak count.
#[test]
fn weak_copy_move_reset_swap() {
    let s = Shared::new(0);
    let mut a = s.downgrade();
    let b = a.clone();
    assert_eq!(s.weak_count(), 2);

    let moved = a.take();
    assert!(a.expired());
    assert_eq!(a.weak_count(), 0);
    assert_eq!(s.weak_count(), 2);

    let mut c = Weak::new();
    c.swap(&mut a);
    assert!(c.expired());
    a.clone_from(&moved);
    assert_eq!(s.weak_count(), 3);
    a.clone_from(&moved);
    assert_eq!(s.weak_count(), 3);

    a.reset();
    assert_eq!(s.weak_count(), 2);
    drop((b, moved));
    assert_eq!(s.weak_count(), 0);
    assert_eq!(s.use_count(), 1);
}

// The block outlives the object when the last strong handle goes first,
// and the object is not touched again when the last weak handle goes.
#[test]
fn last_weak_after_object_only_frees_block() {
    let drops = Rc::new(Cell::new(0));
    let s = Shared::new(Counted(drops.clone()));
    let w = s.downgrade();
    drop(s);
    assert_eq!(drops.get(), 1);
    drop(w);
    assert_eq!(drops.get(), 1);
}

// A destructor may observe its own weak handles: they are already expired.
#[test]
fn weak_is_expired_inside_destructor() {
    struct Observer {
        me: RefCell<Weak<Observer>>,
        seen_expired: Rc<Cell<Option<bool>>>,
    }

    impl Drop for Observer {
        fn drop(&mut self) {
            let me = self.me.borrow();
            self.seen_expired.set(Some(me.expired() && me.lock().is_empty()));
        }
    }

    let seen = Rc::new(Cell::new(None));
    let s = Shared::new(Observer {
        me: RefCell::new(Weak::new()),
        seen_expired: seen.clone(),
    });
    *s.me.borrow_mut() = s.downgrade();
    drop(s);
    assert_eq!(seen.get(), Some(true));
}

// new_cyclic: the weak handle is expired during construction and live
// afterwards; the object can keep it as a back-reference.
#[test]
fn new_cyclic_back_reference() {
    struct Parent {
        me: Weak<Parent>,
        promoted_during_build: bool,
    }

    let parent = Shared::new_cyclic(|me: &Weak<Parent>| {
        assert!(me.expired());
        assert_eq!(me.upgrade().err(), Some(HandleError::DanglingWeak));
        Parent {
            me: me.clone(),
            promoted_during_build: !me.lock().is_empty(),
        }
    });
    assert!(!parent.promoted_during_build);
    assert_eq!(parent.use_count(), 1);
    assert_eq!(parent.weak_count(), 1);

    let again = parent.me.lock();
    assert!(again == parent);
    assert_eq!(parent.use_count(), 2);
}

// A panicking constructor leaves nothing behind.
#[test]
fn new_cyclic_panic_is_contained() {
    let escaped: Rc<RefCell<Option<Weak<u8>>>> = Rc::new(RefCell::new(None));
    let slot = escaped.clone();
    let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        Shared::new_cyclic(|me: &Weak<u8>| -> u8 {
            *slot.borrow_mut() = Some(me.clone());
            panic!("constructor failed");
        })
    }));
    assert!(res.is_err());
    let w = escaped.borrow_mut().take().expect("weak escaped");
    assert!(w.expired());
    assert_eq!(w.weak_count(), 1);
}
