//! Message and Heap-Fragment Tests
//!
//! These tests verify the fragment drain path: attached message
//! payloads copied wholesale after the sweep, BIF temporaries
//! evacuated through the restricted root subset, and the fragment
//! chain left empty after every collection.

mod common;

use common::{snapshot, spawn, Snapshot};
use sgc::heap::fragment::HeapFragment;
use sgc::{collect, Term, TermBuilder, NIL};

/// ============================================================================
/// ATTACHED MESSAGES
/// ============================================================================

/// An attached payload reaches the heap through a collection and the
/// envelope is rewritten to the copy.
///
/// **Bug this finds:** attached payloads scanned (and torn) by the
/// main sweep, envelope slots left pointing into freed fragments
#[test]
fn test_attached_message_survives_collection() {
    let mut p = spawn(144);

    let mut frag = HeapFragment::new(16);
    let inner = frag.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
    let payload = frag.make_cons(inner, NIL);
    p.send_attached(frag, payload, NIL);

    collect(&mut p, 0, &mut []);

    assert_eq!(p.message_count(), 1);
    let received = p.receive().expect("payload must be on-heap now");
    assert_eq!(
        snapshot(received),
        Snapshot::Cons(
            Box::new(Snapshot::Tuple(vec![Snapshot::Small(1), Snapshot::Small(2)])),
            Box::new(Snapshot::Nil),
        )
    );
}

/// Inline messages are ordinary roots and survive in place.
///
/// **Bug this finds:** message queue missing from the root set
#[test]
fn test_inline_message_is_a_root() {
    let mut p = spawn(144);
    let t = p.make_tuple(&[Term::make_small(3)]);
    p.send_local(t, NIL);
    let before = snapshot(t);

    collect(&mut p, 0, &mut []);

    assert_eq!(p.heap_used(), 2, "only the message payload survives");
    assert_eq!(snapshot(p.receive().unwrap()), before);
}

/// Several attached messages from different senders all land on the
/// heap in queue order.
///
/// **Bug this finds:** per-message fragment bookkeeping crossing
/// wires, heap room miscounted for multiple attachments
#[test]
fn test_many_attached_messages() {
    let mut p = spawn(55);

    for i in 0..10 {
        let mut frag = HeapFragment::new(4);
        let payload = frag.make_tuple(&[Term::make_small(i)]);
        p.send_attached(frag, payload, NIL);
    }

    collect(&mut p, 0, &mut []);

    for i in 0..10 {
        assert_eq!(
            snapshot(p.receive().unwrap()),
            Snapshot::Tuple(vec![Snapshot::Small(i)])
        );
    }
}

/// ============================================================================
/// BIF-TEMPORARY FRAGMENTS
/// ============================================================================

/// A live register referencing a BIF fragment is evacuated by the
/// drain, and the fragment chain is released.
///
/// **Bug this finds:** fragment contents missed by the restricted
/// root subset, chain not emptied after collection
#[test]
fn test_bif_fragment_drained_via_registers() {
    let mut p = spawn(144);

    let mut b = p.mbuf_builder(16);
    let inner = b.make_cons(Term::make_small(5), NIL);
    let temp = b.make_tuple(&[inner, Term::make_small(6)]);
    assert_eq!(p.mbuf_count(), 1);
    let before = snapshot(temp);

    let mut regs = [temp];
    collect(&mut p, 0, &mut regs);

    assert_eq!(p.mbuf_count(), 0, "fragment chain must be empty");
    assert_eq!(p.mbuf_size(), 0);
    assert_eq!(snapshot(regs[0]), before);
    assert_eq!(p.heap_used(), 5);
}

/// A fault value referencing a fragment is in the allowed subset
/// and is preserved across the drain.
///
/// **Bug this finds:** terminating processes losing their exit
/// reason to the drain
#[test]
fn test_fvalue_fragment_reference_preserved() {
    let mut p = spawn(144);

    let mut b = p.mbuf_builder(8);
    let reason = b.make_tuple(&[Term::make_atom(1), Term::make_small(-1)]);
    p.fvalue = reason;
    let before = snapshot(reason);

    collect(&mut p, 0, &mut []);

    assert_eq!(p.mbuf_count(), 0);
    assert_eq!(snapshot(p.fvalue), before);
}

/// A refc binary built in a BIF fragment keeps exactly one process
/// reference across the drain.
///
/// **Bug this finds:** fragment off-heap objects double-linked or
/// double-dropped during the drain
#[test]
fn test_fragment_binary_refcount_stable() {
    let mut p = spawn(144);

    let mut b = p.mbuf_builder(16);
    let bin_term = b.make_refc_binary(b"built by a bif");
    let bin = unsafe { (*(sgc::term::boxed_val(bin_term) as *const sgc::term::ProcBin)).val };

    let mut regs = [bin_term];
    collect(&mut p, 0, &mut regs);

    assert_eq!(p.mbuf_count(), 0);
    unsafe {
        assert_eq!((*bin).refc(), 1);
    }
    assert_eq!(snapshot(regs[0]), Snapshot::Binary(b"built by a bif".to_vec()));

    // And when it dies, the buffer goes with it.
    collect(&mut p, 0, &mut []);
    assert!(p.off_heap().mso.is_null());
}
