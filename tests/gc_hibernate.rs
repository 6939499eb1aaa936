//! Hibernation Tests
//!
//! These tests verify the shrink-to-fit collection: exact-fit heap,
//! no old generation, all pointers rewritten after the final copy.

mod common;

use common::{build_tuple_list, snapshot, spawn};
use sgc::{collect, collect_hibernate, Term, TermBuilder, NIL};

/// The S3 scenario: hibernation leaves an exact-fit young heap and
/// no old heap, with the reachable state intact.
///
/// **Bug this finds:** offset pass missing a root class, heap sized
/// off the wrong measure, old heap surviving hibernation
#[test]
fn test_hibernate_exact_fit() {
    let mut p = spawn(144);

    // Live data, pushed into the old generation by two collections
    // so hibernation has both generations to collapse.
    let keep = build_tuple_list(&mut p, 2); // 10 words
    let _garbage = build_tuple_list(&mut p, 10);
    p.stack_push(keep);
    collect(&mut p, 0, &mut []);
    collect(&mut p, 0, &mut []);
    assert!(p.has_old_heap());
    assert_eq!(p.old_heap_used(), 10);

    // Hand the data to the argument registers; the stack must be
    // empty when hibernating.
    p.arity = 1;
    p.arg_reg[0] = p.stack().get(0);
    p.stack_pop();

    let before = snapshot(p.arg_reg[0]);
    collect_hibernate(&mut p);

    assert!(!p.has_old_heap());
    assert_eq!(p.heap_size(), 10, "exact fit");
    assert_eq!(p.heap_used(), 10);
    assert_eq!(p.heap_free(), 0);
    assert_eq!(p.mature_size(), 10);
    assert_eq!(snapshot(p.arg_reg[0]), before);
}

/// A process with nothing reachable hibernates to the one-word
/// minimum heap.
///
/// **Bug this finds:** zero-size allocation, heap lost entirely
#[test]
fn test_hibernate_empty_process() {
    let mut p = spawn(55);
    let _garbage = build_tuple_list(&mut p, 4);
    p.arity = 0;

    collect_hibernate(&mut p);

    assert_eq!(p.heap_size(), 1);
    assert_eq!(p.heap_used(), 0);
    assert!(!p.has_old_heap());
}

/// Hibernate and then keep running: the next collections see a
/// consistent heap and can grow it again.
///
/// **Bug this finds:** dangling high-water or hend after the
/// exact-fit copy
#[test]
fn test_hibernate_then_resume() {
    let mut p = spawn(55);
    let keep = p.make_tuple(&[Term::make_small(5), Term::make_small(6)]);
    p.arity = 1;
    p.arg_reg[0] = keep;

    collect_hibernate(&mut p);
    assert_eq!(p.heap_size(), 3);
    let before = snapshot(p.arg_reg[0]);

    // Waking up: the heap is below the process minimum, and the
    // next collection restores it.
    let mut regs = [p.arg_reg[0]];
    collect(&mut p, 20, &mut regs);
    p.arg_reg[0] = regs[0];

    assert!(p.heap_size() >= 55);
    assert!(p.heap_free() >= 20);
    assert_eq!(snapshot(p.arg_reg[0]), before);

    // And the heap can be used normally again.
    let more = p.make_cons(p.arg_reg[0], NIL);
    assert_eq!(
        snapshot(more),
        common::Snapshot::Cons(Box::new(before), Box::new(common::Snapshot::Nil))
    );
}
