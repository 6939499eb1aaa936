//! Hibernation Collection - Shrink To Fit
//!
//! Places all living data on a fresh heap of exactly the live size
//! and deallocates everything else. The collection copies to a
//! temporary heap first and then to an exact-fit allocation; garbage
//! collecting as usual and then shrinking with realloc caused
//! serious fragmentation when large numbers of processes hibernated
//! at once.

use crate::collect::offheap::{sweep_proc_bins, sweep_proc_externals, sweep_proc_funs};
use crate::collect::offset::{offset_heap, offset_rootset};
use crate::collect::rootset::setup_rootset;
use crate::collect::sweep::{sweep_one_area, sweep_rootset, Area};
use crate::logging::{log_event, CollectionKind, GcEvent};
use crate::process::{Process, Status, F_FORCE_GC};
use crate::term::WORD_SIZE;

/// Collect for hibernation. The stack must be empty and no heap
/// fragments may be pending; on return the young heap is exact-fit
/// and there is no old heap.
pub fn garbage_collect_hibernate(p: &mut Process) {
    // Preliminaries.
    p.gcstatus = p.status;
    p.status = Status::Garbing;
    super::activity_begin();
    p.quick_sanity_check();
    assert!(p.mbuf.is_empty(), "hibernate with pending heap fragments");
    assert_eq!(p.combined_message_size(), 0, "hibernate with attached messages");
    assert!(p.stack.is_empty(), "hibernate with a non-empty stack");

    log_event(GcEvent::CollectionStart {
        pid: p.id,
        kind: CollectionKind::Hibernate,
        need: 0,
    });
    let started = std::time::Instant::now();
    let live_before = p.heap_used() + p.old_heap_used();

    // Evacuate everything into a temporary heap large enough for
    // both generations.
    let temp_size = p.heap_sz + p.old_heap_used();
    let temp_heap = unsafe { crate::heap::alloc_words(temp_size) };
    let mut htop = temp_heap;

    let arity = p.arity;
    let arg_ptr = p.arg_reg.as_mut_ptr();

    unsafe {
        let rootset = setup_rootset(p, arg_ptr, arity);

        let src = Area::new(p.heap, p.heap_used());
        htop = sweep_rootset(&rootset, htop, src, Area::empty());
        htop = sweep_one_area(temp_heap, htop, src, Area::empty());

        if !p.old_heap.is_null() {
            let src = Area::new(p.old_heap, p.old_heap_used());
            htop = sweep_rootset(&rootset, htop, src, Area::empty());
            htop = sweep_one_area(temp_heap, htop, src, Area::empty());
        }

        drop(rootset);
    }

    if !p.off_heap.mso.is_null() {
        sweep_proc_bins(p, true);
    }
    if !p.off_heap.funs.is_null() {
        sweep_proc_funs(p, true);
    }
    if !p.off_heap.externals.is_null() {
        sweep_proc_externals(p, true);
    }

    // Release both source heaps; the temporary heap takes over.
    unsafe {
        crate::heap::free_words(p.heap, p.heap_sz);
        if !p.old_heap.is_null() {
            crate::heap::free_words(p.old_heap, p.old_heap_size());
            p.old_heap = std::ptr::null_mut();
            p.old_htop = std::ptr::null_mut();
            p.old_hend = std::ptr::null_mut();
        }

        p.heap = temp_heap;
        p.high_water = htop;
        p.htop = htop;
        p.hend = temp_heap.add(temp_size);
        p.heap_sz = temp_size;
    }

    let actual_size = p.heap_used();
    let heap_size = if actual_size == 0 { 1 } else { actual_size };

    p.flags &= !F_FORCE_GC;

    // Move the heap to its final, exact-fit destination.
    debug_assert!(actual_size <= p.heap_sz);
    unsafe {
        let heap = crate::heap::alloc_words(heap_size);
        std::ptr::copy_nonoverlapping(p.heap, heap, actual_size);

        let old_base = p.heap;
        let high_water_off = p.mature_size();
        crate::heap::free_words(p.heap, p.heap_sz);

        let offs = (heap as isize - old_base as isize) / WORD_SIZE as isize;
        let area = Area::new(old_base, actual_size);
        offset_heap(heap, actual_size, offs, area);
        p.high_water = heap.add(high_water_off);
        p.hend = heap.add(heap_size);
        offset_rootset(p, offs, area, arg_ptr, arity);
        p.htop = heap.add(actual_size);
        p.heap = heap;
        p.heap_sz = heap_size;
    }

    // Finishing.
    p.quick_sanity_check();
    p.status = p.gcstatus;
    super::activity_end();

    log_event(GcEvent::CollectionEnd {
        pid: p.id,
        kind: CollectionKind::Hibernate,
        duration_us: started.elapsed().as_micros() as u64,
        reclaimed_words: live_before.saturating_sub(p.heap_used()),
        heap_words: p.heap_sz,
    });
}
