//! Literal Collection - Rehome A Literal Area
//!
//! Moves the terms of a module's literal range into a freshly
//! allocated old generation, leaving no reference to the caller's
//! buffer. The caller has already run a major collection, so no old
//! heap exists and no literal references can hide there.
//!
//! A collection is destructive (forwarding markers are written), and
//! the literal area must stay intact for other processes, so the
//! literals are first copied to a temporary area; all references are
//! re-pointed at the copy, and the copy is then collected into the
//! new old heap.

use crate::collect::offset::{offset_heap, offset_rootset};
use crate::collect::rootset::setup_rootset;
use crate::collect::sweep::{sweep_one_area, sweep_one_heap, sweep_rootset, Area};
use crate::heap::sizes;
use crate::logging::{log_event, CollectionKind, GcEvent};
use crate::process::{Process, Status};
use crate::term::{Term, WORD_SIZE};

/// Move every reference this process holds into `[literals,
/// literals+lit_size)` onto a fresh old heap.
///
/// # Safety
///
/// The literal range must hold well-formed terms and must not be
/// referenced by this process again through the old addresses.
pub unsafe fn garbage_collect_literals(p: &mut Process, literals: *mut Term, lit_size: usize) {
    // Set GC state.
    p.gcstatus = p.status;
    p.status = Status::Garbing;
    super::activity_begin();

    log_event(GcEvent::CollectionStart {
        pid: p.id,
        kind: CollectionKind::Literals,
        need: lit_size,
    });
    let started = std::time::Instant::now();

    // The caller just ran a major collection, so we must not have an
    // old heap yet; allocate one to receive the literals.
    assert!(p.old_heap.is_null(), "literal collection needs a fresh old generation");
    let old_heap_size = sizes::next_heap_size(lit_size, 0);
    unsafe {
        let n_old = crate::heap::alloc_words(old_heap_size);
        p.old_heap = n_old;
        p.old_htop = n_old;
        p.old_hend = n_old.add(old_heap_size);
    }

    let arity = p.arity;
    let arg_ptr = p.arg_reg.as_mut_ptr();

    unsafe {
        // Copy the literals to writable memory and re-point every
        // reference at the copy.
        let temp_lit = crate::heap::alloc_words(lit_size);
        std::ptr::copy_nonoverlapping(literals, temp_lit, lit_size);
        let offs = (temp_lit as isize - literals as isize) / WORD_SIZE as isize;
        let lit_area = Area::new(literals, lit_size);
        offset_heap(temp_lit, lit_size, offs, lit_area);
        offset_heap(p.heap, p.heap_used(), offs, lit_area);
        offset_rootset(p, offs, lit_area, arg_ptr, arity);

        // Now collect the temporary copy into the old heap, roots
        // first.
        let area = Area::new(temp_lit, lit_size);
        let rootset = setup_rootset(p, arg_ptr, arity);
        let mut old_htop = sweep_rootset(&rootset, p.old_htop, area, Area::empty());
        drop(rootset);

        // All rootset references are updated; go through the heaps
        // updating the rest.
        old_htop = sweep_one_heap(p.heap, p.htop, old_htop, area);
        old_htop = sweep_one_area(p.old_heap, old_htop, area, Area::empty());
        debug_assert!(p.old_htop <= old_htop && old_htop <= p.old_hend);
        p.old_htop = old_htop;

        crate::heap::free_words(temp_lit, lit_size);
    }

    // Restore status.
    p.quick_sanity_check();
    p.status = p.gcstatus;
    super::activity_end();

    log_event(GcEvent::CollectionEnd {
        pid: p.id,
        kind: CollectionKind::Literals,
        duration_us: started.elapsed().as_micros() as u64,
        reclaimed_words: 0,
        heap_words: p.heap_sz,
    });
}
