//! Pointer Offsetting
//!
//! When a heap arena is moved by `realloc`, every pointer into the
//! moved range must shift by the relocation delta. Two flavors exist
//! and must not be conflated:
//!
//! - [`offset_heap`] walks a term area decoding headers: thing
//!   payloads are skipped, and the subtags that embed pointers (the
//!   off-heap `next` links, the match-state `orig`/`base`) are
//!   patched explicitly.
//! - [`offset_heap_ptr`] treats every slot as a potentially tagged
//!   pointer. The stack (and single process fields) may contain
//!   words that merely *look* like headers, so header decoding there
//!   would skip live slots.

use crate::collect::sweep::Area;
use crate::process::Process;
use crate::term::{
    binary_bytes, header_arity, header_is_thing, header_subtag, offset_ptr, ptr_val,
    BinMatchState, ExternalThing, FunThing, PrimaryTag, ProcBin, Term, BIN_MATCHSTATE_SUBTAG,
    EXTERNAL_SUBTAG, FUN_SUBTAG, REFC_BINARY_SUBTAG,
};

/// Offset pointers into `area` found in a heap term range.
///
/// # Safety
///
/// `[hp, hp+sz)` must hold well-formed heap terms.
pub(crate) unsafe fn offset_heap(hp: *mut Term, sz: usize, offs: isize, area: Area) {
    let mut hp = hp;
    let mut sz = sz;
    while sz > 0 {
        sz -= 1;
        unsafe {
            let val = *hp;
            match val.primary_tag() {
                PrimaryTag::List | PrimaryTag::Boxed => {
                    if area.contains(ptr_val(val)) {
                        *hp = offset_ptr(val, offs);
                    }
                    hp = hp.add(1);
                }
                PrimaryTag::Header => {
                    if !header_is_thing(val) {
                        hp = hp.add(1);
                        continue;
                    }
                    let tari = header_arity(val);
                    match header_subtag(val) {
                        REFC_BINARY_SUBTAG => {
                            let pb = hp as *mut ProcBin;
                            let next = (*pb).next;
                            if !next.is_null() && area.contains(next as *const Term) {
                                (*pb).next = (next as *mut Term).offset(offs) as *mut ProcBin;
                            }
                        }
                        FUN_SUBTAG => {
                            let funp = hp as *mut FunThing;
                            let next = (*funp).next;
                            if !next.is_null() && area.contains(next as *const Term) {
                                (*funp).next = (next as *mut Term).offset(offs) as *mut FunThing;
                            }
                        }
                        EXTERNAL_SUBTAG => {
                            let etp = hp as *mut ExternalThing;
                            let next = (*etp).next;
                            if !next.is_null() && area.contains(next as *const Term) {
                                (*etp).next =
                                    (next as *mut Term).offset(offs) as *mut ExternalThing;
                            }
                        }
                        BIN_MATCHSTATE_SUBTAG => {
                            let ms = hp as *mut BinMatchState;
                            if area.contains(ptr_val((*ms).orig)) {
                                (*ms).orig = offset_ptr((*ms).orig, offs);
                                (*ms).base = binary_bytes((*ms).orig);
                            }
                        }
                        _ => {}
                    }
                    sz -= tari;
                    hp = hp.add(tari + 1);
                }
                PrimaryTag::Immediate => {
                    hp = hp.add(1);
                }
            }
        }
    }
}

/// Offset pointers into `area` found in a slot array (stack, live
/// registers, single fields). No header decoding.
///
/// # Safety
///
/// `[hp, hp+sz)` must be readable and writable term slots.
pub(crate) unsafe fn offset_heap_ptr(hp: *mut Term, sz: usize, offs: isize, area: Area) {
    let mut hp = hp;
    let mut sz = sz;
    while sz > 0 {
        sz -= 1;
        unsafe {
            let val = *hp;
            match val.primary_tag() {
                PrimaryTag::List | PrimaryTag::Boxed => {
                    if area.contains(ptr_val(val)) {
                        *hp = offset_ptr(val, offs);
                    }
                }
                _ => {}
            }
            hp = hp.add(1);
        }
    }
}

/// Offset the off-heap list head pointers.
pub(crate) fn offset_off_heap(p: &mut Process, offs: isize, area: Area) {
    unsafe {
        if !p.off_heap.mso.is_null() && area.contains(p.off_heap.mso as *const Term) {
            p.off_heap.mso = (p.off_heap.mso as *mut Term).offset(offs) as *mut ProcBin;
        }
        if !p.off_heap.funs.is_null() && area.contains(p.off_heap.funs as *const Term) {
            p.off_heap.funs = (p.off_heap.funs as *mut Term).offset(offs) as *mut FunThing;
        }
        if !p.off_heap.externals.is_null() && area.contains(p.off_heap.externals as *const Term) {
            p.off_heap.externals =
                (p.off_heap.externals as *mut Term).offset(offs) as *mut ExternalThing;
        }
    }
}

/// Offset the message-queue term and token slots.
pub(crate) fn offset_mqueue(p: &mut Process, offs: isize, area: Area) {
    for msg in p.msg.iter_mut() {
        let mesg = msg.m[0];
        if mesg.is_value() {
            match mesg.primary_tag() {
                PrimaryTag::List | PrimaryTag::Boxed => {
                    if area.contains(ptr_val(mesg)) {
                        msg.m[0] = offset_ptr(mesg, offs);
                    }
                }
                _ => {}
            }
        }
        let token = msg.m[1];
        if token.is_boxed() && area.contains(ptr_val(token)) {
            msg.m[1] = offset_ptr(token, offs);
        }
    }
}

/// Offset every root vector of the process.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots.
pub(crate) unsafe fn offset_rootset(
    p: &mut Process,
    offs: isize,
    area: Area,
    objv: *mut Term,
    nobj: usize,
) {
    unsafe {
        if let Some(dict) = p.dictionary.as_mut() {
            offset_heap(dict.data.as_mut_ptr(), dict.data.len(), offs, area);
        }
        offset_heap_ptr(std::ptr::addr_of_mut!(p.fvalue), 1, offs, area);
        offset_heap_ptr(std::ptr::addr_of_mut!(p.ftrace), 1, offs, area);
        offset_heap_ptr(std::ptr::addr_of_mut!(p.seq_trace_token), 1, offs, area);
        offset_heap_ptr(std::ptr::addr_of_mut!(p.group_leader), 1, offs, area);
        offset_mqueue(p, offs, area);
        offset_heap_ptr(p.stack.top(), p.stack.used(), offs, area);
        for mfa in p.fibers.mfa_arrays() {
            offset_heap_ptr(mfa, 3, offs, area);
        }
        if nobj > 0 {
            offset_heap_ptr(objv, nobj, offs, area);
        }
        offset_off_heap(p, offs, area);
    }
}

/// Offset pointers into `[low, high)` found in a heap term range.
/// Exported for runtime components that relocate term blocks of
/// their own.
///
/// # Safety
///
/// `[hp, hp+sz)` must hold well-formed heap terms.
pub unsafe fn offset_heap_range(hp: *mut Term, sz: usize, offs: isize, low: *const Term, high: *const Term) {
    let words = (high as usize - low as usize) / crate::term::WORD_SIZE;
    unsafe { offset_heap(hp, sz, offs, Area::new(low, words)) }
}

/// Offset pointers into `[low, high)` found in a slot array.
///
/// # Safety
///
/// `[hp, hp+sz)` must be readable and writable term slots.
pub unsafe fn offset_heap_ptr_range(
    hp: *mut Term,
    sz: usize,
    offs: isize,
    low: *const Term,
    high: *const Term,
) {
    let words = (high as usize - low as usize) / crate::term::WORD_SIZE;
    unsafe { offset_heap_ptr(hp, sz, offs, Area::new(low, words)) }
}

/// Re-base a process's off-heap list heads when the block holding
/// the nodes moved by `offs` words.
pub fn offset_off_heap_range(p: &mut Process, offs: isize, low: *const Term, high: *const Term) {
    let words = (high as usize - low as usize) / crate::term::WORD_SIZE;
    offset_off_heap(p, offs, Area::new(low, words));
}
