//! Evacuation Core - Forwarding Moves and Cheney Scans
//!
//! The shared machinery of every collection variant: the byte-range
//! membership test, the two forwarding move operations, and the scan
//! loops that chase the transitive closure of reachable objects.
//!
//! The `MOVED` test is always performed before any area test. A
//! forwarded object's first word is no longer a header, and skipping
//! that check would copy shared objects twice and tear cycles apart.

use crate::collect::rootset::RootSet;
use crate::term::{
    binary_bytes, boxed_size, boxed_val, header_arity, header_is_bin_matchstate, header_is_thing,
    is_moved, list_val, make_boxed, make_list, BinMatchState, PrimaryTag, Term, NON_VALUE,
    WORD_SIZE,
};

/// A source byte range for evacuation membership tests.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Area {
    start: *const u8,
    size: usize,
}

impl Area {
    /// Area covering `words` words from `start`.
    #[inline]
    pub fn new(start: *const Term, words: usize) -> Area {
        Area {
            start: start as *const u8,
            size: words * WORD_SIZE,
        }
    }

    /// Area matching nothing.
    #[inline]
    pub fn empty() -> Area {
        Area {
            start: std::ptr::null(),
            size: 0,
        }
    }

    #[inline]
    pub fn contains(&self, ptr: *const Term) -> bool {
        (ptr as usize).wrapping_sub(self.start as usize) < self.size
    }
}

/// Copy a boxed object to `*htop`, leaving a forwarding word in its
/// header slot and rewriting the referring slot `orig`.
///
/// # Safety
///
/// `ptr` must address a live boxed object whose header is `hdr`, and
/// the destination must have room for the whole object.
#[inline]
pub(crate) unsafe fn move_boxed(ptr: *mut Term, hdr: Term, htop: &mut *mut Term, orig: *mut Term) {
    unsafe {
        debug_assert!(hdr.is_header());
        let n = boxed_size(ptr, hdr);
        let dst = *htop;
        std::ptr::copy_nonoverlapping(ptr, dst, n);
        let gval = make_boxed(dst);
        *orig = gval;
        *ptr = gval;
        *htop = dst.add(n);
    }
}

/// Copy a cons cell to `*htop`, leaving the non-value sentinel and
/// the forwarding address in the source cell.
///
/// # Safety
///
/// `ptr` must address a live cons cell whose first word is `car`, and
/// the destination must have room for two words.
#[inline]
pub(crate) unsafe fn move_cons(ptr: *mut Term, car: Term, htop: &mut *mut Term, orig: *mut Term) {
    unsafe {
        let dst = *htop;
        *dst = car;
        *dst.add(1) = *ptr.add(1);
        let gval = make_list(dst);
        *orig = gval;
        *ptr = NON_VALUE;
        *ptr.add(1) = gval;
        *htop = dst.add(2);
    }
}

/// Evacuate every root slot whose target lies in `src` or `oh` to
/// `htop`. Pass [`Area::empty`] for `oh` when there is only one
/// source area.
///
/// # Safety
///
/// The root arrays must be live and the destination must have room
/// for all reachable data.
pub(crate) unsafe fn sweep_rootset(
    rootset: &RootSet,
    mut htop: *mut Term,
    src: Area,
    oh: Area,
) -> *mut Term {
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
                        } else if src.contains(ptr) || oh.contains(ptr) {
                            move_boxed(ptr, val, &mut htop, g_ptr);
                        }
                        g_ptr = g_ptr.add(1);
                    }
                    PrimaryTag::List => {
                        let ptr = list_val(gval);
                        let val = *ptr;
                        if val.is_non_value() {
                            *g_ptr = *ptr.add(1);
                        } else if src.contains(ptr) || oh.contains(ptr) {
                            move_cons(ptr, val, &mut htop, g_ptr);
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
    htop
}

/// Cheney-scan the destination area from `n_hp` to the moving top,
/// evacuating everything reachable from `src` or `oh`. Returns the
/// final top.
///
/// # Safety
///
/// `[n_hp, n_htop)` must hold well-formed terms and the destination
/// must have room for all reachable data.
pub(crate) unsafe fn sweep_one_area(
    mut n_hp: *mut Term,
    mut n_htop: *mut Term,
    src: Area,
    oh: Area,
) -> *mut Term {
    while n_hp != n_htop {
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
                    } else if src.contains(ptr) || oh.contains(ptr) {
                        move_boxed(ptr, val, &mut n_htop, n_hp);
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
                    } else if src.contains(ptr) || oh.contains(ptr) {
                        move_cons(ptr, val, &mut n_htop, n_hp);
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
                            sweep_matchstate(n_hp as *mut BinMatchState, &mut n_htop, src, oh);
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
    n_htop
}

/// Rescue a match state's `orig` binary and recompute its interior
/// `base` pointer.
///
/// # Safety
///
/// `ms` must address a live match state inside the destination area.
pub(crate) unsafe fn sweep_matchstate(
    ms: *mut BinMatchState,
    htop: &mut *mut Term,
    src: Area,
    oh: Area,
) {
    unsafe {
        let origptr = std::ptr::addr_of_mut!((*ms).orig);
        let ptr = boxed_val(*origptr);
        let val = *ptr;
        if is_moved(val) {
            *origptr = val;
            (*ms).base = binary_bytes(*origptr);
        } else if src.contains(ptr) || oh.contains(ptr) {
            move_boxed(ptr, val, htop, origptr);
            (*ms).base = binary_bytes(*origptr);
        }
    }
}

/// Rescue a match state's binary under the minor collection's
/// two-destination rule: a mature binary is promoted, a fresh one
/// follows the match state into the new young heap.
///
/// # Safety
///
/// `ms` must address a live match state inside the destination area.
pub(crate) unsafe fn sweep_matchstate_minor(
    ms: *mut BinMatchState,
    old_htop: &mut *mut Term,
    n_htop: &mut *mut Term,
    mature: Area,
    young: Area,
) {
    unsafe {
        let origptr = std::ptr::addr_of_mut!((*ms).orig);
        let ptr = boxed_val(*origptr);
        let val = *ptr;
        if is_moved(val) {
            *origptr = val;
            (*ms).base = binary_bytes(*origptr);
        } else if mature.contains(ptr) {
            move_boxed(ptr, val, old_htop, origptr);
            (*ms).base = binary_bytes(*origptr);
        } else if young.contains(ptr) {
            move_boxed(ptr, val, n_htop, origptr);
            (*ms).base = binary_bytes(*origptr);
        }
    }
}

/// Scan a fixed, already-live heap range `[heap_ptr, heap_end)`,
/// evacuating everything it references in `src` to `htop` (which
/// lies in a *different* area). Used by the literal collector, where
/// the scanned range itself does not grow.
///
/// # Safety
///
/// The range must hold well-formed terms and `htop`'s arena must
/// have room for all reachable data.
pub(crate) unsafe fn sweep_one_heap(
    mut heap_ptr: *mut Term,
    heap_end: *mut Term,
    mut htop: *mut Term,
    src: Area,
) -> *mut Term {
    while heap_ptr < heap_end {
        unsafe {
            let gval = *heap_ptr;
            match gval.primary_tag() {
                PrimaryTag::Boxed => {
                    let ptr = boxed_val(gval);
                    let val = *ptr;
                    if is_moved(val) {
                        debug_assert!(val.is_boxed());
                        *heap_ptr = val;
                        heap_ptr = heap_ptr.add(1);
                    } else if src.contains(ptr) {
                        move_boxed(ptr, val, &mut htop, heap_ptr);
                        heap_ptr = heap_ptr.add(1);
                    } else {
                        heap_ptr = heap_ptr.add(1);
                    }
                }
                PrimaryTag::List => {
                    let ptr = list_val(gval);
                    let val = *ptr;
                    if val.is_non_value() {
                        *heap_ptr = *ptr.add(1);
                        heap_ptr = heap_ptr.add(1);
                    } else if src.contains(ptr) {
                        move_cons(ptr, val, &mut htop, heap_ptr);
                        heap_ptr = heap_ptr.add(1);
                    } else {
                        heap_ptr = heap_ptr.add(1);
                    }
                }
                PrimaryTag::Header => {
                    if !header_is_thing(gval) {
                        heap_ptr = heap_ptr.add(1);
                    } else {
                        heap_ptr = heap_ptr.add(header_arity(gval) + 1);
                    }
                }
                PrimaryTag::Immediate => {
                    heap_ptr = heap_ptr.add(1);
                }
            }
        }
    }
    htop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::make_arityval;

    #[test]
    fn test_area_contains() {
        let words = [Term(0); 8];
        let a = Area::new(words.as_ptr(), 4);
        assert!(a.contains(words.as_ptr()));
        assert!(a.contains(unsafe { words.as_ptr().add(3) }));
        assert!(!a.contains(unsafe { words.as_ptr().add(4) }));
        assert!(!Area::empty().contains(words.as_ptr()));
    }

    #[test]
    fn test_move_boxed_forwards() {
        let mut src = [make_arityval(2), Term::make_small(1), Term::make_small(2)];
        let mut dst = [Term(0); 8];
        let mut htop = dst.as_mut_ptr();
        let mut slot = make_boxed(src.as_ptr());
        unsafe {
            let hdr = src[0];
            move_boxed(src.as_mut_ptr(), hdr, &mut htop, &mut slot);
            assert_eq!(boxed_val(slot), dst.as_mut_ptr());
            assert!(is_moved(src[0]));
            assert_eq!(boxed_val(src[0]), dst.as_mut_ptr());
            assert_eq!(htop, dst.as_mut_ptr().add(3));
            assert_eq!(dst[1].small_value(), 1);
            assert_eq!(dst[2].small_value(), 2);
        }
    }

    #[test]
    fn test_move_cons_forwards() {
        let mut src = [Term::make_small(7), crate::term::NIL];
        let mut dst = [Term(0); 4];
        let mut htop = dst.as_mut_ptr();
        let mut slot = make_list(src.as_ptr());
        unsafe {
            let car = src[0];
            move_cons(src.as_mut_ptr(), car, &mut htop, &mut slot);
            assert_eq!(list_val(slot), dst.as_mut_ptr());
            assert!(src[0].is_non_value());
            assert_eq!(src[1], slot);
            assert_eq!(dst[0].small_value(), 7);
            assert!(dst[1].is_nil());
        }
    }

    #[test]
    fn test_shared_object_copied_once() {
        // Two slots referencing the same tuple; the second must be
        // resolved through the forwarding word.
        let mut src = [make_arityval(1), Term::make_small(9)];
        let mut dst = [Term(0); 8];
        let mut htop = dst.as_mut_ptr();
        let mut slot_a = make_boxed(src.as_ptr());
        unsafe {
            let hdr = src[0];
            move_boxed(src.as_mut_ptr(), hdr, &mut htop, &mut slot_a);
            let val = src[0];
            assert!(is_moved(val));
            let slot_b = val;
            assert_eq!(slot_a, slot_b);
            assert_eq!(htop, dst.as_mut_ptr().add(2));
        }
    }
}
