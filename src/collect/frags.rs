//! Heap-Fragment Drain
//!
//! Fragments exist because BIFs and message senders sometimes build
//! terms without room on the process heap. At collection entry only
//! a restricted root subset may reference them: the live registers,
//! the fault value and trace, the seq-trace token, the group leader,
//! and inline message slots. Those roots are evacuated first, then
//! the freshly written heap region is swept against every fragment
//! to chase references that crossed between fragments, and the chain
//! is released.

use crate::collect::sweep::{move_boxed, move_cons, sweep_one_area, Area};
use crate::process::Process;
use crate::term::{boxed_val, is_moved, list_val, PrimaryTag, Term};

/// Evacuate every slot of one root array whose target lies in a heap
/// fragment.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots and the destination
/// must have room for the fragments' contents.
pub(crate) unsafe fn collect_root_array(
    p: &Process,
    mut n_htop: *mut Term,
    objv: *mut Term,
    nobj: usize,
) -> *mut Term {
    debug_assert!(!p.htop.is_null());
    let mut objv = objv;
    let mut nobj = nobj;
    while nobj > 0 {
        nobj -= 1;
        unsafe {
            let gval = *objv;
            match gval.primary_tag() {
                PrimaryTag::Boxed => {
                    let ptr = boxed_val(gval);
                    let val = *ptr;
                    if is_moved(val) {
                        debug_assert!(val.is_boxed());
                        *objv = val;
                    } else {
                        for frag in p.mbuf.iter() {
                            let (start, size) = frag.area();
                            if (ptr as usize).wrapping_sub(start as usize) < size {
                                move_boxed(ptr, val, &mut n_htop, objv);
                                break;
                            }
                        }
                    }
                    objv = objv.add(1);
                }
                PrimaryTag::List => {
                    let ptr = list_val(gval);
                    let val = *ptr;
                    if val.is_non_value() {
                        *objv = *ptr.add(1);
                    } else {
                        for frag in p.mbuf.iter() {
                            let (start, size) = frag.area();
                            if (ptr as usize).wrapping_sub(start as usize) < size {
                                move_cons(ptr, val, &mut n_htop, objv);
                                break;
                            }
                        }
                    }
                    objv = objv.add(1);
                }
                _ => {
                    objv = objv.add(1);
                }
            }
        }
    }
    n_htop
}

/// Drain the heap-fragment chain into the new heap.
///
/// # Safety
///
/// `n_hstart`/`n_htop` must delimit the new heap's written region and
/// the new heap must have room for all fragment contents.
pub(crate) unsafe fn collect_heap_frags(
    p: &mut Process,
    n_hstart: *mut Term,
    mut n_htop: *mut Term,
    objv: *mut Term,
    nobj: usize,
) -> *mut Term {
    // References into fragments from the stack, heap, or dictionary
    // are not allowed; only the subset below may hold them.
    #[cfg(debug_assertions)]
    {
        crate::collect::debug::disallow_heap_frag_ref(p, p.stack.top(), p.stack.used());
        let dict_root = p
            .dictionary
            .as_mut()
            .map(|d| (d.data.as_mut_ptr(), d.data.len()));
        if let Some((ptr, len)) = dict_root {
            crate::collect::debug::disallow_heap_frag_ref(p, ptr, len);
        }
        crate::collect::debug::disallow_heap_frag_ref_in_heap(p);
    }

    let fvalue_ptr = std::ptr::addr_of_mut!(p.fvalue);
    let ftrace_ptr = std::ptr::addr_of_mut!(p.ftrace);
    let token_ptr = std::ptr::addr_of_mut!(p.seq_trace_token);
    let leader_ptr = std::ptr::addr_of_mut!(p.group_leader);

    unsafe {
        if nobj > 0 {
            n_htop = collect_root_array(p, n_htop, objv, nobj);
        }
        if p.fvalue.is_not_immediate() {
            n_htop = collect_root_array(p, n_htop, fvalue_ptr, 1);
        }
        if p.ftrace.is_not_immediate() {
            n_htop = collect_root_array(p, n_htop, ftrace_ptr, 1);
        }
        if p.seq_trace_token.is_not_immediate() {
            n_htop = collect_root_array(p, n_htop, token_ptr, 1);
        }
        if p.group_leader.is_not_immediate() {
            n_htop = collect_root_array(p, n_htop, leader_ptr, 1);
        }

        // Inline messages may reference fragment data when the
        // payload was built by a BIF; attached payloads are copied
        // wholesale at the end of the collection instead.
        for i in 0..p.msg.len() {
            let m_ptr = {
                let msg = p.msg.iter_mut().nth(i).expect("indexed message");
                if msg.attached.is_some() {
                    continue;
                }
                msg.m.as_mut_ptr()
            };
            n_htop = collect_root_array(p, n_htop, m_ptr, 2);
        }

        // All fragment-referencing roots now point at the new heap;
        // chase what the moved data itself references.
        for i in 0..p.mbuf.len() {
            let (start, size) = p.mbuf[i].area();
            if size != 0 {
                let words = size / crate::term::WORD_SIZE;
                n_htop = sweep_one_area(
                    n_hstart,
                    n_htop,
                    Area::new(start as *const Term, words),
                    Area::empty(),
                );
            }
        }
    }
    n_htop
}

/// Release every heap fragment. Their contents have either been
/// evacuated or were garbage.
pub(crate) fn remove_message_buffers(p: &mut Process) {
    p.mbuf.clear();
}
