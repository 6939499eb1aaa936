//! Hard-Debug Checkers
//!
//! Debug-build verification of the reference discipline the
//! collector relies on: nothing but the restricted root subset may
//! point into heap fragments, the old generation may never point at
//! the fresh young region, and the off-heap lists must stay
//! well-formed (valid addresses, live refcounts, old-segment suffix
//! ordering, no cycles).
//!
//! Violations abort; these are runtime bugs, not recoverable errors.

use crate::process::Process;
use crate::term::{
    boxed_val, header_arity, header_is_thing, is_moved, list_val, ptr_val, PrimaryTag, Term,
};

/// Spare header bit used to detect cycles in the external list; set
/// and cleared within one check, never visible outside it.
const EXTERNAL_VISITED_BIT: usize = 1 << (usize::BITS - 1);

fn in_frag(p: &Process, ptr: *const Term) -> bool {
    p.mbuf.iter().any(|f| {
        let (start, size) = f.area();
        (ptr as usize).wrapping_sub(start as usize) < size
    })
}

/// True if `ptr` lies in any arena belonging to this process.
pub(crate) fn within(ptr: *const Term, p: &Process) -> bool {
    if !p.old_heap.is_null() && (p.old_heap as *const Term) <= ptr && ptr < p.old_hend {
        return true;
    }
    if (p.heap as *const Term) <= ptr && ptr < p.htop {
        return true;
    }
    if in_frag(p, ptr) {
        return true;
    }
    for msg in p.msg.iter() {
        if let Some(frag) = msg.attached.as_ref() {
            let (start, size) = frag.area();
            if (ptr as usize).wrapping_sub(start as usize) < size {
                return true;
            }
        }
    }
    false
}

/// Panic if any slot of a root array references a heap fragment.
pub(crate) fn disallow_heap_frag_ref(p: &Process, objv: *mut Term, nobj: usize) {
    let mut i = 0;
    while i < nobj {
        unsafe {
            let gval = *objv.add(i);
            match gval.primary_tag() {
                PrimaryTag::Boxed => {
                    let ptr = boxed_val(gval);
                    let val = *ptr;
                    if !is_moved(val) && in_frag(p, ptr) {
                        panic!("<{}> root references a heap fragment", p.id);
                    }
                }
                PrimaryTag::List => {
                    let ptr = list_val(gval);
                    let val = *ptr;
                    if !val.is_non_value() && in_frag(p, ptr) {
                        panic!("<{}> root references a heap fragment", p.id);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
}

/// Panic if any heap term references a heap fragment.
pub(crate) fn disallow_heap_frag_ref_in_heap(p: &Process) {
    if p.mbuf.is_empty() {
        return;
    }

    let heap = p.heap;
    let htop = p.htop;
    let heap_bytes = (htop as usize - heap as usize) as usize;
    let mut hp = heap;
    while hp < htop {
        unsafe {
            let val = *hp;
            hp = hp.add(1);
            match val.primary_tag() {
                PrimaryTag::Boxed | PrimaryTag::List => {
                    let ptr = ptr_val(val);
                    let inside = (ptr as usize).wrapping_sub(heap as usize) < heap_bytes;
                    if !inside && in_frag(p, ptr) {
                        panic!("<{}> heap references a heap fragment", p.id);
                    }
                }
                PrimaryTag::Header => {
                    if header_is_thing(val) {
                        hp = hp.add(header_arity(val));
                    }
                }
                PrimaryTag::Immediate => {}
            }
        }
    }
}

/// Panic if the old generation references the fresh young heap or a
/// heap fragment. Closes the old-pointer invariant after a minor
/// collection.
pub(crate) fn disallow_heap_frag_ref_in_old_heap(p: &Process) {
    if p.old_heap.is_null() {
        return;
    }

    let old_heap = p.old_heap;
    let old_htop = p.old_htop;
    let old_bytes = (old_htop as usize - old_heap as usize) as usize;
    let new_heap = p.heap;
    let new_bytes = (p.htop as usize - new_heap as usize) as usize;

    let mut hp = old_heap;
    while hp < old_htop {
        unsafe {
            let val = *hp;
            hp = hp.add(1);
            match val.primary_tag() {
                PrimaryTag::Boxed | PrimaryTag::List => {
                    let ptr = ptr_val(val);
                    let in_old = (ptr as usize).wrapping_sub(old_heap as usize) < old_bytes;
                    if !in_old {
                        if (ptr as usize).wrapping_sub(new_heap as usize) < new_bytes {
                            panic!("<{}> old heap references the fresh young heap", p.id);
                        }
                        if in_frag(p, ptr) {
                            panic!("<{}> old heap references a heap fragment", p.id);
                        }
                    }
                }
                PrimaryTag::Header => {
                    if header_is_thing(val) {
                        hp = hp.add(header_arity(val));
                        if hp > old_htop {
                            panic!("<{}> thing overruns the old heap", p.id);
                        }
                    }
                }
                PrimaryTag::Immediate => {}
            }
        }
    }
}

/// Verify the off-heap lists: every node within a process arena,
/// every refcount at least 1, old-heap nodes forming a suffix of
/// each list, and no cycle in the external list.
pub(crate) fn check_off_heap(p: &Process) {
    let old_lo = p.old_heap as usize;
    let old_hi = p.old_htop as usize;
    let in_old = |ptr: usize| !p.old_heap.is_null() && old_lo <= ptr && ptr < old_hi;

    unsafe {
        let mut old = false;
        let mut pb = p.off_heap.mso;
        while !pb.is_null() {
            let ptr = pb as usize;
            assert!((*(*pb).val).refc() >= 1, "<{}> linked binary with dead refc", p.id);
            if old {
                assert!(in_old(ptr), "<{}> binary list points old -> new", p.id);
            } else if in_old(ptr) {
                old = true;
            } else {
                assert!(within(pb as *const Term, p), "<{}> binary node outside process", p.id);
            }
            pb = (*pb).next;
        }

        let mut old = false;
        let mut fun = p.off_heap.funs;
        while !fun.is_null() {
            let ptr = fun as usize;
            assert!((*(*fun).entry).refc() >= 1, "<{}> linked fun with dead refc", p.id);
            if old {
                assert!(in_old(ptr), "<{}> fun list points old -> new", p.id);
            } else if in_old(ptr) {
                old = true;
            } else {
                assert!(within(fun as *const Term, p), "<{}> fun node outside process", p.id);
            }
            fun = (*fun).next;
        }

        let mut old = false;
        let mut ext = p.off_heap.externals;
        while !ext.is_null() {
            let ptr = ext as usize;
            assert!((*(*ext).node).refc() >= 1, "<{}> linked external with dead refc", p.id);
            assert!(
                (*ext).header.0 & EXTERNAL_VISITED_BIT == 0,
                "<{}> circular external list",
                p.id
            );
            if old {
                assert!(in_old(ptr), "<{}> external list points old -> new", p.id);
            } else if in_old(ptr) {
                old = true;
            } else {
                assert!(within(ext as *const Term, p), "<{}> external node outside process", p.id);
            }
            (*ext).header = Term((*ext).header.0 | EXTERNAL_VISITED_BIT);
            ext = (*ext).next;
        }

        // Clear the visited bits again.
        let mut ext = p.off_heap.externals;
        while !ext.is_null() {
            (*ext).header = Term((*ext).header.0 & !EXTERNAL_VISITED_BIT);
            ext = (*ext).next;
        }
    }
}
