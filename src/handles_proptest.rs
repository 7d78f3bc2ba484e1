#![cfg(test)]

// Property tests for the handle protocol kept inside the crate so they can
// observe block releases through `block::live_blocks`.
//
// Model: per object, the handles currently alive (whole-object strong
// handles, projected field handles, weak handles) and a teardown counter.
// Invariants checked after every step:
// - every strong handle reports use_count == number of strong handles;
// - teardown ran exactly once iff no strong handle remains, else never;
// - weak handles are expired iff no strong handle remains;
// - weak_count matches the number of weak handles;
// - live blocks == objects with at least one handle of either kind.

use crate::block::live_blocks;
use crate::{Shared, Weak};
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

struct Tracked {
    drops: Rc<Cell<usize>>,
    field: u32,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[derive(Clone, Debug)]
enum Op {
    NewInPlace(u32),
    NewBoxed(u32),
    Clone(usize),
    Project(usize),
    DropStrong(usize),
    Downgrade(usize),
    CloneWeak(usize),
    DropWeak(usize),
    Lock(usize),
    Take(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let idx = 0usize..16;
    prop_oneof![
        any::<u32>().prop_map(Op::NewInPlace),
        any::<u32>().prop_map(Op::NewBoxed),
        idx.clone().prop_map(Op::Clone),
        idx.clone().prop_map(Op::Project),
        idx.clone().prop_map(Op::DropStrong),
        idx.clone().prop_map(Op::Downgrade),
        idx.clone().prop_map(Op::CloneWeak),
        idx.clone().prop_map(Op::DropWeak),
        idx.clone().prop_map(Op::Lock),
        idx.prop_map(Op::Take),
    ]
}

#[derive(Default)]
struct Obj {
    drops: Rc<Cell<usize>>,
    field: u32,
    whole: Vec<Shared<Tracked>>,
    fields: Vec<Shared<u32>>,
    weak: Vec<Weak<Tracked>>,
}

impl Obj {
    fn new(field: u32, in_place: bool) -> Self {
        let drops = Rc::new(Cell::new(0));
        let value = Tracked {
            drops: drops.clone(),
            field,
        };
        let s = if in_place {
            Shared::new(value)
        } else {
            Shared::from_box(Box::new(value))
        };
        Self {
            drops,
            field,
            whole: vec![s],
            ..Self::default()
        }
    }

    fn strong(&self) -> usize {
        self.whole.len() + self.fields.len()
    }
}

fn pick(objs: &mut [Obj], i: usize) -> Option<&mut Obj> {
    if objs.is_empty() {
        None
    } else {
        let n = objs.len();
        Some(&mut objs[i % n])
    }
}

proptest! {
    #[test]
    fn prop_handle_protocol(ops in proptest::collection::vec(arb_op(), 1..120)) {
        let before = live_blocks();
        let mut objs: Vec<Obj> = Vec::new();

        for op in ops {
            match op {
                Op::NewInPlace(v) => objs.push(Obj::new(v, true)),
                Op::NewBoxed(v) => objs.push(Obj::new(v, false)),
                Op::Clone(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        if let Some(s) = o.whole.last().cloned() {
                            o.whole.push(s);
                        } else if let Some(f) = o.fields.last().cloned() {
                            o.fields.push(f);
                        }
                    }
                }
                Op::Project(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        if let Some(s) = o.whole.last() {
                            let f = s.project(|t| &t.field);
                            prop_assert!(f.owner_eq(s));
                            o.fields.push(f);
                        }
                    }
                }
                Op::DropStrong(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        if o.whole.pop().is_none() {
                            o.fields.pop();
                        }
                    }
                }
                Op::Downgrade(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        if let Some(s) = o.whole.last() {
                            o.weak.push(s.downgrade());
                        }
                    }
                }
                Op::CloneWeak(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        if let Some(w) = o.weak.last().cloned() {
                            o.weak.push(w);
                        }
                    }
                }
                Op::DropWeak(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        o.weak.pop();
                    }
                }
                Op::Lock(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        let prior = o.strong();
                        if let Some(w) = o.weak.last() {
                            let s = w.lock();
                            if prior == 0 {
                                prop_assert!(s.is_empty());
                            } else {
                                prop_assert_eq!(s.use_count(), prior + 1);
                                prop_assert_eq!(s.field, o.field);
                                o.whole.push(s);
                            }
                        }
                    }
                }
                Op::Take(i) => {
                    if let Some(o) = pick(&mut objs, i) {
                        if let Some(s) = o.whole.last_mut() {
                            let count = s.use_count();
                            let moved = s.take();
                            prop_assert!(s.is_empty());
                            prop_assert_eq!(s.use_count(), 0);
                            prop_assert_eq!(moved.use_count(), count);
                            *s = moved;
                        }
                    }
                }
            }

            let mut expected_live = 0isize;
            for o in &objs {
                let strong = o.strong();
                for s in &o.whole {
                    prop_assert_eq!(s.use_count(), strong);
                }
                for f in &o.fields {
                    prop_assert_eq!(f.use_count(), strong);
                    prop_assert_eq!(**f, o.field);
                }
                for w in &o.weak {
                    prop_assert_eq!(w.expired(), strong == 0);
                    prop_assert_eq!(w.use_count(), strong);
                    prop_assert_eq!(w.weak_count(), o.weak.len());
                }
                prop_assert_eq!(o.drops.get(), usize::from(strong == 0));
                if strong + o.weak.len() > 0 {
                    expected_live += 1;
                }
            }
            prop_assert_eq!(live_blocks() - before, expected_live);
        }

        drop(objs);
        prop_assert_eq!(live_blocks(), before);
    }
}
