//! Fiber Integration Tests
//!
//! Queue rotation is covered by unit tests; these verify that fiber
//! records really are GC roots and that the BIF surface behaves at
//! its edges.

mod common;

use common::{snapshot, spawn, Snapshot};
use sgc::{collect, FiberExit, SgcError, Term, TermBuilder, NIL};

/// Fiber call triples survive collection on equal footing with the
/// stack.
///
/// **Bug this finds:** fiber records missing from the root set
#[test]
fn test_fiber_arguments_survive_collection() {
    let mut p = spawn(144);

    let args = {
        let t = p.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
        p.make_cons(t, NIL)
    };
    let id = p.fiber_create(Term::make_atom(10), Term::make_atom(20), args);

    collect(&mut p, 0, &mut []);

    assert_eq!(p.heap_used(), 5, "fiber args kept everything alive");
    assert_eq!(p.fiber_count(), 2);

    // Promote the fiber and collect again; its id stays stable.
    p.fiber_yield_to(id).unwrap();
    collect(&mut p, 0, &mut []);
    let list = p.fibers_term();
    assert!(list.is_list());
    unsafe {
        let head_id = *sgc::term::list_val(list);
        assert_eq!(head_id, id);
    }

    // Dropping the fiber reaps its roots.
    let res = p.fiber_exit_id(id, NIL).unwrap();
    assert!(matches!(res, FiberExit::Switched(_)));
    collect(&mut p, 0, &mut []);
    assert_eq!(p.heap_used(), 0, "args die with their fiber");
}

/// Exiting fibers one by one ends with the process exit.
///
/// **Bug this finds:** last-fiber edge case switching instead of
/// terminating
#[test]
fn test_fiber_exit_cascade() {
    let mut p = spawn(55);
    p.fiber_create(Term::make_atom(1), Term::make_atom(2), NIL);
    p.fiber_create(Term::make_atom(3), Term::make_atom(4), NIL);
    assert_eq!(p.fiber_count(), 3);

    let reason = Term::make_atom(0);
    assert!(matches!(p.fiber_exit(reason), FiberExit::Switched(_)));
    assert!(matches!(p.fiber_exit(reason), FiberExit::Switched(_)));
    assert_eq!(p.fiber_exit(reason), FiberExit::ProcessExit(reason));
}

/// Bad fiber identifiers are rejected with badarg.
///
/// **Bug this finds:** id validation accepting arbitrary terms
#[test]
fn test_fiber_badarg() {
    let mut p = spawn(55);
    let bogus = Term::make_small(5);
    assert!(matches!(p.fiber_yield_to(bogus), Err(SgcError::Badarg(_))));
    assert!(matches!(p.fiber_exit_id(bogus, NIL), Err(SgcError::Badarg(_))));
    // Well-formed but unknown ref.
    let unknown = Term::make_ref(4096);
    assert!(matches!(p.fiber_yield_to(unknown), Err(SgcError::Badarg(_))));
}

/// The fibers list itself is an ordinary heap term.
///
/// **Bug this finds:** id list built without heap room accounting
#[test]
fn test_fibers_term_snapshot() {
    let mut p = spawn(55);
    let a = p.current_fiber();
    let b = p.fiber_create(Term::make_atom(1), Term::make_atom(2), NIL);
    let list = p.fibers_term();
    assert_eq!(
        snapshot(list),
        Snapshot::Cons(
            Box::new(Snapshot::Immediate(a.0)),
            Box::new(Snapshot::Cons(
                Box::new(Snapshot::Immediate(b.0)),
                Box::new(Snapshot::Nil)
            ))
        )
    );
}
