//! Off-Heap Object Tests
//!
//! These tests verify the off-heap list sweeps: reference counts
//! dropped exactly once for dead objects, list relinking through
//! forwarding markers, writable-binary shrinking, and the rescue of
//! interior match-state pointers.

mod common;

use common::{snapshot, spawn, Snapshot};
use sgc::term::objects::{PB_IS_WRITABLE, PROC_BIN_WORDS};
use sgc::term::{boxed_val, Binary, BinMatchState, FunEntry, NodeEntry, ProcBin};
use sgc::{collect, Term, TermBuilder};

/// ============================================================================
/// REFCOUNT TESTS
/// ============================================================================

/// The S4 scenario: an unreachable refc binary with an external
/// holder keeps its buffer but loses the process's reference and
/// its off-heap node.
///
/// **Bug this finds:** double decrement, missing decrement, freeing
/// a buffer that still has holders
#[test]
fn test_dead_binary_dropped_from_list_not_freed() {
    let mut p = spawn(144);

    let b = p.make_refc_binary(b"shared with another process");
    let bin = unsafe { (*(boxed_val(b) as *const ProcBin)).val };
    unsafe { (*bin).refc_inc() }; // the external holder
    assert_eq!(unsafe { (*bin).refc() }, 2);
    assert!(!p.off_heap().mso.is_null());

    // Unreachable: not rooted anywhere. Fullsweep.
    collect(&mut p, 0, &mut []);

    assert!(p.off_heap().mso.is_null(), "node must leave the list");
    unsafe {
        assert_eq!((*bin).refc(), 1, "exactly one reference dropped");
        assert_eq!((*bin).refc_dectest(), 0);
        Binary::free(bin);
    }
}

/// A reachable refc binary survives with its node relinked and its
/// refcount untouched.
///
/// **Bug this finds:** list not following forwarding markers,
/// refcount dropped for survivors
#[test]
fn test_live_binary_relinked() {
    let mut p = spawn(144);

    let b = p.make_refc_binary(b"payload");
    p.stack_push(b);
    let bin = unsafe { (*(boxed_val(b) as *const ProcBin)).val };

    collect(&mut p, 0, &mut []);

    let moved = p.stack().get(0);
    assert_ne!(moved, b);
    unsafe {
        let pb = p.off_heap().mso;
        assert_eq!(pb as usize, boxed_val(moved) as usize, "list points at the copy");
        assert!((*pb).next.is_null());
        assert_eq!((*pb).val, bin);
        assert_eq!((*bin).refc(), 1);
    }
    assert_eq!(snapshot(moved), Snapshot::Binary(b"payload".to_vec()));
}

/// Dead closures release their fun-table entry; dead externals
/// deref their node entry.
///
/// **Bug this finds:** non-binary off-heap lists not swept
#[test]
fn test_dead_fun_and_external_deref() {
    let mut p = spawn(144);

    let entry = FunEntry::alloc(Term::make_atom(1), 42);
    unsafe { (*entry).refc_inc() }; // keep the entry observable
    let _f = p.make_fun(entry, 2, &[Term::make_small(1)]);

    let node = NodeEntry::alloc(Term::make_atom(2), 1);
    unsafe { (*node).refc_inc() };
    let _e = p.make_external(node, 99);

    collect(&mut p, 0, &mut []);

    assert!(p.off_heap().funs.is_null());
    assert!(p.off_heap().externals.is_null());
    unsafe {
        assert_eq!((*entry).refc(), 1);
        assert_eq!((*node).refc(), 1);
        FunEntry::erase(entry);
        NodeEntry::deref(node);
    }
}

/// A closure's environment is live data and survives with it.
///
/// **Bug this finds:** fun environment not copied (its arity only
/// covers the fixed fields)
#[test]
fn test_fun_environment_survives() {
    let mut p = spawn(144);

    let entry = FunEntry::alloc(Term::make_atom(1), 7);
    let captured = p.make_tuple(&[Term::make_small(10), Term::make_small(20)]);
    let f = p.make_fun(entry, 1, &[captured, Term::make_small(3)]);
    p.stack_push(f);

    collect(&mut p, 0, &mut []);

    let snap = snapshot(p.stack().get(0));
    assert_eq!(
        snap,
        Snapshot::Fun {
            index: 7,
            env: vec![
                Snapshot::Tuple(vec![Snapshot::Small(10), Snapshot::Small(20)]),
                Snapshot::Small(3),
            ],
        }
    );
}

/// ============================================================================
/// SHRINK CANDIDATES
/// ============================================================================

/// The S5 scenario: a writable, inactive binary with large slack is
/// shrunk to its used size plus the policy slack, and the data
/// pointer is re-seated into the reallocated buffer.
///
/// **Bug this finds:** shrink never firing, slack formula inverted,
/// stale `bytes` pointer after realloc
#[test]
fn test_writable_inactive_binary_shrinks() {
    let mut p = spawn(144);

    // 1024-byte buffer of which 120 bytes are used.
    let bin = Binary::alloc(1024);
    unsafe {
        for i in 0..120 {
            *(*bin).orig_bytes().add(i) = i as u8;
        }
    }
    let b = p.make_refc_binary_from(bin, 120);
    unsafe {
        let pb = boxed_val(b) as *mut ProcBin;
        (*pb).flags |= PB_IS_WRITABLE;
    }
    p.stack_push(b);

    collect(&mut p, 0, &mut []);

    unsafe {
        let pb = p.off_heap().mso;
        assert!(!pb.is_null());
        // Sole candidate, no active writers: leave 20% slack.
        assert_eq!((*(*pb).val).orig_size, 144);
        assert_eq!((*pb).size, 120);
        assert_eq!((*pb).bytes, (*(*pb).val).orig_bytes());
        let data = std::slice::from_raw_parts((*pb).bytes, 120);
        assert_eq!(data[119], 119);
    }
}

/// A binary with less than 8 bytes of slack is not a shrink
/// candidate.
///
/// **Bug this finds:** pointless reallocs below allocator alignment
#[test]
fn test_small_slack_not_shrunk() {
    let mut p = spawn(144);

    let bin = Binary::alloc(64);
    let b = p.make_refc_binary_from(bin, 60);
    unsafe {
        let pb = boxed_val(b) as *mut ProcBin;
        (*pb).flags |= PB_IS_WRITABLE;
    }
    p.stack_push(b);

    collect(&mut p, 0, &mut []);

    unsafe {
        let pb = p.off_heap().mso;
        assert_eq!((*(*pb).val).orig_size, 64, "4 bytes of slack stay");
    }
}

/// ============================================================================
/// MATCH STATES
/// ============================================================================

/// A match state's interior base pointer is recomputed from the
/// forwarded binary.
///
/// **Bug this finds:** `base` left pointing into the freed source
/// buffer's handle
#[test]
fn test_matchstate_base_reseated() {
    let mut p = spawn(144);

    let b = p.make_refc_binary(b"match me");
    let ms = p.make_matchstate(b);
    p.stack_push(ms);

    collect(&mut p, 0, &mut []);

    unsafe {
        let moved = p.stack().get(0);
        let ms = boxed_val(moved) as *const BinMatchState;
        let pb = boxed_val((*ms).orig) as *const ProcBin;
        assert_eq!((*ms).base, (*pb).bytes, "base must track the moved binary");
        assert_eq!((*ms).size, 8 * 8);
    }
    // One ProcBin + one match state on the heap, nothing else.
    assert_eq!(p.heap_used(), PROC_BIN_WORDS + 5);
}

/// ============================================================================
/// VIRTUAL HEAP
/// ============================================================================

/// Binary overhead accounting follows the survivors.
///
/// **Bug this finds:** vheap counted off dead binaries
#[test]
fn test_vheap_counts_survivors_only() {
    let mut p = spawn(610);

    let live = p.make_refc_binary(&[1u8; 256]);
    p.stack_push(live);
    let _dead = p.make_refc_binary(&[2u8; 4096]);

    collect(&mut p, 0, &mut []);

    let word = std::mem::size_of::<usize>();
    assert_eq!(p.off_heap().overhead, 256 / word);
}
