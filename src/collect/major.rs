//! Major (Fullsweep) Collection
//!
//! Evacuates both generations into a single fresh young heap and
//! discards the old heap. Everything alive afterwards sits below the
//! high-water mark, so the next minor collection re-creates the old
//! generation from scratch.

use crate::collect::frags::{collect_heap_frags, remove_message_buffers};
use crate::collect::offheap::{sweep_proc_bins, sweep_proc_externals, sweep_proc_funs};
use crate::collect::resize::{grow_new_heap, shrink_new_heap};
use crate::collect::rootset::setup_rootset;
use crate::collect::sweep::{sweep_one_area, sweep_rootset, Area};
use crate::process::{Process, F_HEAP_GROW, F_NEED_FULLSWEEP};
use crate::term::Term;

/// Run one major collection. Always completes.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots.
pub(crate) unsafe fn major_collection(
    p: &mut Process,
    need: usize,
    objv: *mut Term,
    nobj: usize,
    recl: &mut usize,
) -> bool {
    let src = Area::new(p.heap, p.heap_used());
    let oh = if p.old_heap.is_null() {
        Area::empty()
    } else {
        Area::new(p.old_heap, p.old_heap_used())
    };
    let fragments = p.mbuf_size() + p.combined_message_size();
    let size_before = fragments + p.heap_used();

    // Size the heap to receive all live data.
    let mut new_sz = p.next_heap_size(p.heap_sz + fragments + p.old_heap_used(), 0);

    // Grow although we don't actually need to?
    if new_sz == p.heap_sz && p.flags & F_HEAP_GROW != 0 {
        new_sz = p.next_heap_size(p.heap_sz, 1);
    }
    p.flags &= !(F_HEAP_GROW | F_NEED_FULLSWEEP);

    let n_heap = unsafe { crate::heap::alloc_words(new_sz) };
    let mut n_htop = n_heap;

    unsafe {
        // Get rid of heap fragments.
        if !p.mbuf.is_empty() {
            n_htop = collect_heap_frags(p, n_heap, n_htop, objv, nobj);
        }

        // Copy all terms directly referenced by the root set.
        let rootset = setup_rootset(p, objv, nobj);
        n_htop = sweep_rootset(&rootset, n_htop, src, oh);
        drop(rootset);

        // Chase the rest of the closure from either generation.
        n_htop = sweep_one_area(n_heap, n_htop, src, oh);
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

    unsafe {
        if !p.old_heap.is_null() {
            crate::heap::free_words(p.old_heap, p.old_heap_size());
            p.old_heap = std::ptr::null_mut();
            p.old_htop = std::ptr::null_mut();
            p.old_hend = std::ptr::null_mut();
        }

        crate::heap::free_words(p.heap, p.heap_sz);
        p.heap = n_heap;
        p.htop = n_htop;
        p.heap_sz = new_sz;
        p.hend = n_heap.add(new_sz);
    }
    p.gen_gcs = 0;
    p.high_water = p.htop;

    p.quick_sanity_check();

    // Copy newly received messages onto the end of the new heap.
    p.move_attached_messages_to_heap();

    *recl += unsafe { adjust_after_fullsweep(p, size_before, need, objv, nobj) };

    #[cfg(debug_assertions)]
    crate::collect::debug::disallow_heap_frag_ref_in_heap(p);

    remove_message_buffers(p);

    p.quick_sanity_check();
    true
}

/// Post-fullsweep sizing: grow when the heap cannot satisfy the
/// request, mark a lazy grow when more than 75% is in use, shrink
/// when less than 25% is.
unsafe fn adjust_after_fullsweep(
    p: &mut Process,
    size_before: usize,
    need: usize,
    objv: *mut Term,
    nobj: usize,
) -> usize {
    let size_after = p.heap_used();
    let reclaimed_now = size_before.saturating_sub(size_after);

    // Separate-stack layout: no stack words live on the heap.
    let need_after = size_after + need;
    unsafe {
        if p.heap_sz < need_after {
            let sz = p.next_heap_size(need_after, 0);
            grow_new_heap(p, sz, objv, nobj);
        } else if 3 * p.heap_sz < 4 * need_after {
            // More than 75% used; postpone the grow to the next GC.
            p.flags |= F_HEAP_GROW;
        } else if 4 * need_after < p.heap_sz && p.heap_sz > p.global_floor {
            // Less than 25% used; shrink.
            let wanted = 2 * need_after;
            let sz = if wanted < p.min_heap_size {
                p.min_heap_size
            } else {
                p.next_heap_size(wanted, 0)
            };
            if sz < p.heap_sz {
                shrink_new_heap(p, sz, objv, nobj);
            }
        }
    }

    reclaimed_now
}
