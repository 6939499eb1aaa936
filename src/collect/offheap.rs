//! Off-Heap List Sweeps
//!
//! After evacuation, every off-heap list is walked through its old
//! nodes: a forwarding marker means the object survived and the list
//! is relinked to the new copy; a node still on the old heap during
//! a generational sweep stays linked; anything else is dead and its
//! external resource loses the process's reference.
//!
//! The binary sweep additionally accounts the virtual heap (bytes
//! managed through refc binaries) and collects shrink candidates:
//! writable-but-inactive binaries whose buffers carry slack worth
//! reclaiming with a realloc.

use crate::collect::sweep::Area;
use crate::heap::sizes;
use crate::process::{Process, F_NEED_FULLSWEEP};
use crate::term::objects::{PB_ACTIVE_WRITER, PB_IS_WRITABLE};
use crate::term::{
    boxed_val, is_moved, Binary, ExternalThing, FunEntry, FunThing, NodeEntry, ProcBin, Term,
    WORD_SIZE,
};

/// Candidate-count limits for leaving slack after a shrink pass.
const INACT_WR_PB_LEAVE_MUCH_LIMIT: usize = 1;
const INACT_WR_PB_LEAVE_MUCH_PERCENTAGE: usize = 20;
const INACT_WR_PB_LEAVE_LIMIT: usize = 10;
const INACT_WR_PB_LEAVE_PERCENTAGE: usize = 10;

/// Next virtual-heap threshold: grow to the schedule entry above
/// twice the current use when the limit was exceeded, shrink to 3/4
/// when less than half is used.
pub(crate) fn next_vheap_size(vheap: usize, vheap_sz: usize, floor: usize) -> usize {
    if vheap < floor {
        return floor;
    }
    if vheap > vheap_sz {
        return sizes::next_heap_size(2 * vheap, 0);
    }
    if vheap < vheap_sz / 2 {
        return vheap_sz * 3 / 4;
    }
    vheap_sz
}

/// Whole old-heap span, the "still tenured" test of a generational
/// sweep.
fn old_full_area(p: &Process) -> Area {
    if p.old_heap.is_null() {
        Area::empty()
    } else {
        Area::new(p.old_heap, p.old_heap_size())
    }
}

pub(crate) fn sweep_proc_externals(p: &mut Process, fullsweep: bool) {
    let oh = if fullsweep {
        Area::empty()
    } else {
        old_full_area(p)
    };

    unsafe {
        let mut prev: *mut *mut ExternalThing = &mut p.off_heap.externals;
        let mut ptr = p.off_heap.externals;
        while !ptr.is_null() {
            let ppt = ptr as *mut Term;
            let first = *ppt;
            if is_moved(first) {
                // Object is alive; patch the list to the moved copy.
                let ro = boxed_val(first) as *mut ExternalThing;
                *prev = ro;
                prev = std::ptr::addr_of_mut!((*ro).next);
                ptr = (*ro).next;
            } else if oh.contains(ppt) {
                // Object resides on the old heap and this was a
                // generational sweep; keep it linked.
                prev = std::ptr::addr_of_mut!((*ptr).next);
                ptr = (*ptr).next;
            } else {
                // Dead; drop the node reference.
                NodeEntry::deref((*ptr).node);
                *prev = (*ptr).next;
                ptr = *prev;
            }
        }
        debug_assert!((*prev).is_null());
    }
}

pub(crate) fn sweep_proc_funs(p: &mut Process, fullsweep: bool) {
    let oh = if fullsweep {
        Area::empty()
    } else {
        old_full_area(p)
    };

    unsafe {
        let mut prev: *mut *mut FunThing = &mut p.off_heap.funs;
        let mut ptr = p.off_heap.funs;
        while !ptr.is_null() {
            let ppt = ptr as *mut Term;
            let first = *ppt;
            if is_moved(first) {
                let ro = boxed_val(first) as *mut FunThing;
                *prev = ro;
                prev = std::ptr::addr_of_mut!((*ro).next);
                ptr = (*ro).next;
            } else if oh.contains(ppt) {
                prev = std::ptr::addr_of_mut!((*ptr).next);
                ptr = (*ptr).next;
            } else {
                let fe = (*ptr).entry;
                *prev = (*ptr).next;
                ptr = *prev;
                if (*fe).refc_dectest() == 0 {
                    FunEntry::erase(fe);
                }
            }
        }
        debug_assert!((*prev).is_null());
    }
}

struct ShrinkCand {
    new_candidates: *mut ProcBin,
    new_candidates_end: *mut ProcBin,
    old_candidates: *mut ProcBin,
    no_of_candidates: usize,
    no_of_active: usize,
}

/// Decide what to do with a surviving binary: keep it in the main
/// list, or divert it to a shrink-candidate list when it is writable,
/// inactive, and carries at least 8 bytes of slack (the allocators
/// are 8-byte aligned, smaller shrinks have no effect). Returns the
/// next node of the original chain.
unsafe fn link_live_proc_bin(
    shrink: &mut ShrinkCand,
    prev: &mut *mut *mut ProcBin,
    pbp: *mut ProcBin,
    on_new_heap: bool,
) -> *mut ProcBin {
    unsafe {
        let next = (*pbp).next;

        if (*pbp).flags & (PB_ACTIVE_WRITER | PB_IS_WRITABLE) != 0 {
            debug_assert!((*pbp).flags & PB_IS_WRITABLE != 0);

            if (*pbp).flags & PB_ACTIVE_WRITER != 0 {
                (*pbp).flags &= !PB_ACTIVE_WRITER;
                shrink.no_of_active += 1;
            } else {
                let unused = (*(*pbp).val).orig_size - (*pbp).size;
                if unused >= 8 {
                    if on_new_heap {
                        if shrink.new_candidates.is_null() {
                            shrink.new_candidates_end = pbp;
                        }
                        (*pbp).next = shrink.new_candidates;
                        shrink.new_candidates = pbp;
                    } else {
                        (*pbp).next = shrink.old_candidates;
                        shrink.old_candidates = pbp;
                    }
                    shrink.no_of_candidates += 1;
                    return next;
                }
            }
        }

        // Not a shrink candidate; keep in the main list.
        **prev = pbp;
        *prev = std::ptr::addr_of_mut!((*pbp).next);
        next
    }
}

pub(crate) fn sweep_proc_bins(p: &mut Process, fullsweep: bool) {
    let oh = if fullsweep {
        Area::empty()
    } else {
        old_full_area(p)
    };
    let floor = p.global_floor;

    let mut shrink = ShrinkCand {
        new_candidates: std::ptr::null_mut(),
        new_candidates_end: std::ptr::null_mut(),
        old_candidates: std::ptr::null_mut(),
        no_of_candidates: 0,
        no_of_active: 0,
    };
    let mut bin_vheap = 0usize;
    p.bin_old_vheap = 0;

    unsafe {
        let mso_root: *mut *mut ProcBin = &mut p.off_heap.mso;
        let mut prev = mso_root;
        let mut ptr = *mso_root;

        while !ptr.is_null() {
            let ppt = ptr as *mut Term;
            let first = *ppt;
            if is_moved(first) {
                bin_vheap += (*ptr).size / WORD_SIZE;
                let newp = boxed_val(first) as *mut ProcBin;
                let on_new_heap = !oh.contains(newp as *const Term);
                ptr = link_live_proc_bin(&mut shrink, &mut prev, newp, on_new_heap);
            } else if oh.contains(ppt) {
                p.bin_old_vheap += (*ptr).size / WORD_SIZE;
                ptr = link_live_proc_bin(&mut shrink, &mut prev, ptr, false);
            } else {
                // Dead; drop the buffer reference.
                *prev = (*ptr).next;
                let bptr = (*ptr).val;
                if (*bptr).refc_dectest() == 0 {
                    Binary::free(bptr);
                }
                ptr = *prev;
            }
        }

        if p.bin_old_vheap >= p.bin_old_vheap_sz {
            p.flags |= F_NEED_FULLSWEEP;
        }

        p.bin_vheap_sz = next_vheap_size(bin_vheap, p.bin_vheap_sz, floor);
        p.bin_old_vheap_sz = next_vheap_size(p.bin_old_vheap, p.bin_old_vheap_sz, floor);
        p.off_heap.overhead = bin_vheap;

        if shrink.no_of_candidates > 0 {
            let mut leave_unused = 0;
            if shrink.no_of_active == 0 {
                if shrink.no_of_candidates <= INACT_WR_PB_LEAVE_MUCH_LIMIT {
                    leave_unused = INACT_WR_PB_LEAVE_MUCH_PERCENTAGE;
                } else if shrink.no_of_candidates <= INACT_WR_PB_LEAVE_LIMIT {
                    leave_unused = INACT_WR_PB_LEAVE_PERCENTAGE;
                }
            }

            for list in [shrink.new_candidates, shrink.old_candidates] {
                let mut cand = list;
                while !cand.is_null() {
                    let mut new_size = (*cand).size;

                    if leave_unused > 0 {
                        new_size += new_size * leave_unused / 100;
                        // Shrinking by less than the allocator
                        // alignment has no effect.
                        if new_size + 8 >= (*(*cand).val).orig_size {
                            cand = (*cand).next;
                            continue;
                        }
                    }

                    (*cand).val = Binary::realloc((*cand).val, new_size);
                    (*cand).bytes = (*(*cand).val).orig_bytes();
                    cand = (*cand).next;
                }
            }

            // The main list is now split in up to three parts. Put
            // them back together as new candidates -> other -> old
            // candidates; the list must only ever refer from the new
            // generation to the old, never the other way.
            if !shrink.new_candidates.is_null() {
                if prev == mso_root {
                    // Empty "other" list.
                    prev = std::ptr::addr_of_mut!((*shrink.new_candidates_end).next);
                } else {
                    (*shrink.new_candidates_end).next = *mso_root;
                }
                *mso_root = shrink.new_candidates;
            }
        }

        *prev = shrink.old_candidates;
    }
}
