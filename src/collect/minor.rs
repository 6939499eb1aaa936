//! Minor (Generational) Collection
//!
//! Two-destination copy: young data that survived a previous
//! collection (below the high-water mark) is promoted to the old
//! heap, fresh data is copied to a new young heap. A minor pass that
//! cannot fit the mature slice in the old heap's free space abandons
//! the attempt and escalates to a major collection.

use crate::collect::frags::{collect_heap_frags, remove_message_buffers};
use crate::collect::offheap::{sweep_proc_bins, sweep_proc_externals, sweep_proc_funs};
use crate::collect::resize::shrink_new_heap;
use crate::collect::rootset::{setup_rootset, RootSet};
use crate::collect::sweep::{move_boxed, move_cons, sweep_matchstate_minor, sweep_one_area, Area};
use crate::process::{Process, F_NEED_FULLSWEEP};
use crate::term::{
    boxed_val, header_arity, header_is_bin_matchstate, header_is_thing, is_moved, list_val,
    BinMatchState, PrimaryTag, Term,
};

/// Run one minor collection. Returns `true` when the heap satisfies
/// `need` afterwards; `false` requests escalation to a major pass.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots.
pub(crate) unsafe fn minor_collection(
    p: &mut Process,
    need: usize,
    objv: *mut Term,
    nobj: usize,
    recl: &mut usize,
) -> bool {
    let mature = p.mature_size();

    // Allocate an old heap if we don't have one and if we'll need
    // one. A larger size than strictly needed is chosen; it cuts
    // down the number of fullsweeps noticeably.
    if p.old_heap.is_null() && mature != 0 {
        let new_sz = crate::heap::sizes::next_heap_size(p.heap_used(), 1);
        let n_old = unsafe { crate::heap::alloc_words(new_sz) };
        p.old_heap = n_old;
        p.old_htop = n_old;
        p.old_hend = unsafe { n_old.add(new_sz) };
    }

    // Do a minor collection if there is an old heap and if it is
    // large enough.
    if !p.old_heap.is_null() && mature <= old_heap_free(p) {
        let fragments = p.mbuf_size() + p.combined_message_size();
        let size_before = fragments + p.heap_used();
        let new_sz = p.next_heap_size(p.heap_sz + fragments, 0);

        unsafe { do_minor(p, new_sz, objv, nobj) };

        // Copy newly received messages onto the end of the new heap.
        p.quick_sanity_check();
        p.move_attached_messages_to_heap();
        p.quick_sanity_check();

        p.gen_gcs += 1;
        let size_after = p.heap_used();
        // Separate-stack layout: no stack words live on the heap.
        let need_after = size_after + need;
        *recl += size_before.saturating_sub(size_after);

        // Excessively large heaps should be shrunk, but don't even
        // bother on reasonably small ones: after tenuring, the new
        // heap is often nearly empty, and a shrink would just
        // oscillate.
        if p.heap_sz > 3000
            && 4 * need_after < p.heap_sz
            && (p.heap_sz > 8000 || p.heap_sz > p.old_heap_size())
        {
            let mut wanted = 3 * need_after;
            let old_heap_sz = p.old_heap_size();

            // Keep the young heap from dropping far below the old
            // generation's capacity.
            if wanted * 9 < old_heap_sz {
                let new_wanted = old_heap_sz / 8;
                if new_wanted > wanted {
                    wanted = new_wanted;
                }
            }

            let wanted = if wanted < p.min_heap_size {
                p.min_heap_size
            } else {
                p.next_heap_size(wanted, 0)
            };
            if wanted < p.heap_sz {
                unsafe { shrink_new_heap(p, wanted, objv, nobj) };
            }
            debug_assert_eq!(p.heap_sz, p.next_heap_size(p.heap_sz, 0));
            return true;
        }

        if p.heap_sz >= need_after {
            // The heap size turned out to be just right.
            debug_assert_eq!(p.heap_sz, p.next_heap_size(p.heap_sz, 0));
            return true;
        }
        log::debug!(
            "<{}> minor left {} words for need {}, forcing fullsweep",
            p.id,
            p.heap_sz,
            need_after
        );
    }

    // Not enough room after (or for) a minor collection. Force a
    // major one.
    p.flags |= F_NEED_FULLSWEEP;
    false
}

unsafe fn do_minor(p: &mut Process, new_sz: usize, objv: *mut Term, nobj: usize) {
    let heap = p.heap;
    let heap_words = p.heap_used();
    let mature_words = p.mature_size();
    let young = Area::new(heap, heap_words);
    let mature = Area::new(heap, mature_words);
    let mut old_htop = p.old_htop;

    let n_heap = unsafe { crate::heap::alloc_words(new_sz) };
    let mut n_htop = n_heap;

    unsafe {
        if !p.mbuf.is_empty() {
            n_htop = collect_heap_frags(p, n_heap, n_htop, objv, nobj);
        }

        let rootset = setup_rootset(p, objv, nobj);
        evacuate_roots(&rootset, mature, young, &mut old_htop, &mut n_htop);
        drop(rootset);

        // All root slots now point at the new heap, but most of what
        // they reference still lives on the old one; scan the new
        // heap until the transitive closure is across.
        if mature_words == 0 {
            n_htop = sweep_one_area(n_heap, n_htop, young, Area::empty());
        } else {
            sweep_new_heap(n_heap, &mut n_htop, &mut old_htop, mature, young);
        }

        // If we have been tenuring, the newly written part of the
        // old generation may still point into the source young heap.
        if p.old_htop < old_htop {
            old_htop = sweep_one_area(p.old_htop, old_htop, young, Area::empty());
        }
        p.old_htop = old_htop;
        p.high_water = if p.heap != p.high_water { n_heap } else { n_htop };
    }

    if !p.off_heap.mso.is_null() {
        sweep_proc_bins(p, false);
    }
    if !p.off_heap.funs.is_null() {
        sweep_proc_funs(p, false);
    }
    if !p.off_heap.externals.is_null() {
        sweep_proc_externals(p, false);
    }

    #[cfg(debug_assertions)]
    crate::collect::debug::disallow_heap_frag_ref_in_old_heap(p);

    unsafe {
        crate::heap::free_words(p.heap, p.heap_sz);
        p.heap = n_heap;
        p.htop = n_htop;
        p.heap_sz = new_sz;
        p.hend = n_heap.add(new_sz);
    }

    #[cfg(debug_assertions)]
    crate::collect::debug::disallow_heap_frag_ref_in_heap(p);

    remove_message_buffers(p);
}

/// Evacuate the root set with the two-destination rule: mature data
/// to the old heap, fresh data to the new young heap.
unsafe fn evacuate_roots(
    rootset: &RootSet,
    mature: Area,
    young: Area,
    old_htop: &mut *mut Term,
    n_htop: &mut *mut Term,
) {
    for roots in rootset.roots.iter() {
        let mut g_ptr = roots.v;
        let mut g_sz = roots.sz;
        while g_sz > 0 {
            g_sz -= 1;
            unsafe {
                let gval = *g_ptr;
                match gval.primary_tag() {
                    PrimaryTag::Boxed => {
                        let ptr = boxed_val(gval);
                        let val = *ptr;
                        if is_moved(val) {
                            debug_assert!(val.is_boxed());
                            *g_ptr = val;
                        } else if mature.contains(ptr) {
                            move_boxed(ptr, val, old_htop, g_ptr);
                        } else if young.contains(ptr) {
                            move_boxed(ptr, val, n_htop, g_ptr);
                        }
                        g_ptr = g_ptr.add(1);
                    }
                    PrimaryTag::List => {
                        let ptr = list_val(gval);
                        let val = *ptr;
                        if val.is_non_value() {
                            *g_ptr = *ptr.add(1);
                        } else if mature.contains(ptr) {
                            move_cons(ptr, val, old_htop, g_ptr);
                        } else if young.contains(ptr) {
                            move_cons(ptr, val, n_htop, g_ptr);
                        }
                        g_ptr = g_ptr.add(1);
                    }
                    _ => {
                        g_ptr = g_ptr.add(1);
                    }
                }
            }
        }
    }
}

/// Cheney scan of the new young heap with the two-destination rule.
unsafe fn sweep_new_heap(
    n_heap: *mut Term,
    n_htop: &mut *mut Term,
    old_htop: &mut *mut Term,
    mature: Area,
    young: Area,
) {
    let mut n_hp = n_heap;
    while n_hp != *n_htop {
        unsafe {
            let gval = *n_hp;
            match gval.primary_tag() {
                PrimaryTag::Boxed => {
                    let ptr = boxed_val(gval);
                    let val = *ptr;
                    if is_moved(val) {
                        debug_assert!(val.is_boxed());
                        *n_hp = val;
                        n_hp = n_hp.add(1);
                    } else if mature.contains(ptr) {
                        move_boxed(ptr, val, old_htop, n_hp);
                        n_hp = n_hp.add(1);
                    } else if young.contains(ptr) {
                        move_boxed(ptr, val, n_htop, n_hp);
                        n_hp = n_hp.add(1);
                    } else {
                        n_hp = n_hp.add(1);
                    }
                }
                PrimaryTag::List => {
                    let ptr = list_val(gval);
                    let val = *ptr;
                    if val.is_non_value() {
                        *n_hp = *ptr.add(1);
                        n_hp = n_hp.add(1);
                    } else if mature.contains(ptr) {
                        move_cons(ptr, val, old_htop, n_hp);
                        n_hp = n_hp.add(1);
                    } else if young.contains(ptr) {
                        move_cons(ptr, val, n_htop, n_hp);
                        n_hp = n_hp.add(1);
                    } else {
                        n_hp = n_hp.add(1);
                    }
                }
                PrimaryTag::Header => {
                    if !header_is_thing(gval) {
                        n_hp = n_hp.add(1);
                    } else {
                        if header_is_bin_matchstate(gval) {
                            sweep_matchstate_minor(
                                n_hp as *mut BinMatchState,
                                old_htop,
                                n_htop,
                                mature,
                                young,
                            );
                        }
                        n_hp = n_hp.add(header_arity(gval) + 1);
                    }
                }
                PrimaryTag::Immediate => {
                    n_hp = n_hp.add(1);
                }
            }
        }
    }
}

/// Free words in the old generation.
pub(crate) fn old_heap_free(p: &Process) -> usize {
    if p.old_heap.is_null() {
        0
    } else {
        (p.old_hend as usize - p.old_htop as usize) / crate::term::WORD_SIZE
    }
}
