//! Cross-Cutting Property Tests
//!
//! Universal invariants and the remaining runtime surface: the
//! heap-size table exposed as a term, post-BIF collection, stack
//! resizing, and a randomized liveness stress test.

mod common;

use common::{snapshot, spawn, Snapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sgc::{after_bif, change_stack_size, collect, heap_sizes_term, Freason, Term, TermBuilder, NIL};

/// ============================================================================
/// HEAP-SIZE TABLE
/// ============================================================================

/// `heap_sizes_term` mirrors the schedule exactly, including the
/// entries too large for small integers.
///
/// **Bug this finds:** table exposed truncated or re-ordered,
/// bignum fallback missing
#[test]
fn test_heap_sizes_term_matches_table() {
    let mut p = spawn(55);
    let list = heap_sizes_term(&mut p);

    let table = sgc::heap_sizes();
    let mut l = list;
    let mut decoded = Vec::new();
    while l.is_list() {
        unsafe {
            let cell = sgc::term::list_val(l);
            decoded.push(match snapshot(*cell) {
                Snapshot::Small(v) => v as usize,
                Snapshot::Big(v) => v,
                other => panic!("unexpected element {:?}", other),
            });
            l = *cell.add(1);
        }
    }
    assert!(l.is_nil());
    assert_eq!(decoded, table);
    assert_eq!(decoded[0], 34);
    assert_eq!(decoded[1], 55);
}

/// ============================================================================
/// POST-BIF COLLECTION
/// ============================================================================

/// A successful BIF result is protected and relocated.
///
/// **Bug this finds:** result term lost to the collection it
/// triggered
#[test]
fn test_after_bif_protects_result() {
    let mut p = spawn(55);
    let result = p.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
    let before = snapshot(result);

    let relocated = after_bif(&mut p, result, &mut []);

    assert_ne!(relocated, result);
    assert_eq!(snapshot(relocated), before);
    assert_eq!(p.heap_used(), 3);
}

/// A failing BIF keeps the caller's registers alive instead.
///
/// **Bug this finds:** failure path collecting with the wrong root
/// array
#[test]
fn test_after_bif_failure_keeps_registers() {
    let mut p = spawn(55);
    p.freason = Freason::Badarg;
    let arg = p.make_cons(Term::make_small(9), NIL);
    let before = snapshot(arg);
    let mut regs = [arg];

    let r = after_bif(&mut p, sgc::term::NON_VALUE, &mut regs);

    assert!(r.is_non_value());
    assert_eq!(snapshot(regs[0]), before);
}

/// A trapping BIF is collected against its saved registers.
///
/// **Bug this finds:** trap path ignoring `def_arg_reg`
#[test]
fn test_after_bif_trap_uses_saved_registers() {
    let mut p = spawn(55);
    p.freason = Freason::Trap;
    let saved = p.make_tuple(&[Term::make_small(4)]);
    let before = snapshot(saved);
    p.arity = 1;
    p.def_arg_reg[0] = saved;

    let r = after_bif(&mut p, sgc::term::NON_VALUE, &mut []);

    assert!(r.is_non_value());
    assert_eq!(snapshot(p.def_arg_reg[0]), before);
    assert_eq!(p.heap_used(), 2);
}

/// ============================================================================
/// STACK RESIZING
/// ============================================================================

/// Explicit stack resizes preserve the live slice and follow the
/// caller's request exactly.
///
/// **Bug this finds:** live slice not moved to the new upper end
#[test]
fn test_change_stack_size() {
    let mut p = spawn(55);
    let t = p.make_tuple(&[Term::make_small(1)]);
    p.stack_push(t);
    p.stack_push(Term::make_small(2));

    assert_eq!(change_stack_size(&mut p, 233), 233);
    assert_eq!(p.stack().size(), 233);
    assert_eq!(p.stack().get(0).small_value(), 2);

    // The stacked heap reference still works across a collection.
    collect(&mut p, 0, &mut []);
    assert_eq!(
        snapshot(p.stack().get(1)),
        Snapshot::Tuple(vec![Snapshot::Small(1)])
    );
}

/// ============================================================================
/// RANDOMIZED LIVENESS
/// ============================================================================

/// Random term graphs survive arbitrary collection sequences
/// unchanged. Deterministic seed: failures reproduce.
///
/// **Bug this finds:** anything; the catch-all for copy ordering,
/// sharing, and sizing interactions
#[test]
fn test_randomized_liveness() {
    let mut rng = StdRng::seed_from_u64(0x5ce1);

    for round in 0..20 {
        let mut p = spawn(377);
        let mut snaps = Vec::new();

        let n_roots = rng.gen_range(1..6);
        for _ in 0..n_roots {
            let t = random_term(&mut p, &mut rng, 3);
            p.stack_push(t);
            snaps.push(snapshot(t));
        }

        for _ in 0..rng.gen_range(1..5) {
            // Guarantee room before littering the heap.
            let need = rng.gen_range(64..128);
            collect(&mut p, need, &mut []);
            assert!(p.heap_free() >= need);
            let _garbage = random_term(&mut p, &mut rng, 2);
        }

        for (i, snap) in snaps.iter().rev().enumerate() {
            assert_eq!(&snapshot(p.stack().get(i)), snap, "round {}", round);
        }
    }
}

fn random_term(p: &mut sgc::Process, rng: &mut StdRng, depth: usize) -> Term {
    if depth == 0 || rng.gen_bool(0.4) {
        return match rng.gen_range(0..3) {
            0 => Term::make_small(rng.gen_range(-1000..1000)),
            1 => Term::make_atom(rng.gen_range(0..50)),
            _ => NIL,
        };
    }
    match rng.gen_range(0..3) {
        0 => {
            let h = random_term(p, rng, depth - 1);
            let t = random_term(p, rng, depth - 1);
            p.make_cons(h, t)
        }
        1 => {
            let a = random_term(p, rng, depth - 1);
            let b = random_term(p, rng, depth - 1);
            p.make_tuple(&[a, b])
        }
        _ => {
            let len = rng.gen_range(0..12);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            p.make_heap_binary(&bytes)
        }
    }
}
