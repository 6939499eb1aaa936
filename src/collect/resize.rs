//! Heap and Stack Resizing
//!
//! Grow and shrink paths for the young heap outside of a copying
//! pass, plus the separate-stack resize operations. A `realloc` that
//! returns a different base forces an offset pass over the heap and
//! the whole root set.

use crate::collect::offset::{offset_heap, offset_rootset};
use crate::collect::sweep::Area;
use crate::heap::sizes;
use crate::logging::{log_event, GcEvent};
use crate::process::Process;
use crate::term::{Term, WORD_SIZE};

/// Grow the young heap to `new_sz` words in place.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots; no other pointers
/// into the young heap may exist outside the root set.
pub(crate) unsafe fn grow_new_heap(p: &mut Process, new_sz: usize, objv: *mut Term, nobj: usize) {
    debug_assert!(p.heap_sz < new_sz);
    let heap_size = p.heap_used();
    let old_sz = p.heap_sz;
    let old_base = p.heap;
    let high_water_off = p.mature_size();

    unsafe {
        let new_heap = crate::heap::realloc_words(p.heap, p.heap_sz, new_sz);
        let offs = (new_heap as isize - old_base as isize) / WORD_SIZE as isize;

        if offs == 0 {
            p.hend = new_heap.add(new_sz);
        } else {
            let area = Area::new(old_base, heap_size);
            offset_heap(new_heap, heap_size, offs, area);
            p.high_water = new_heap.add(high_water_off);
            p.hend = new_heap.add(new_sz);
            offset_rootset(p, offs, area, objv, nobj);
            p.htop = new_heap.add(heap_size);
            p.heap = new_heap;
        }
    }
    p.heap_sz = new_sz;

    log::debug!("<{}> heap grown {} -> {} words", p.id, old_sz, new_sz);
    log_event(GcEvent::HeapResize {
        pid: p.id,
        old_words: old_sz,
        new_words: new_sz,
    });
}

/// Shrink the young heap to `new_sz` words in place.
///
/// # Safety
///
/// Same contract as [`grow_new_heap`].
pub(crate) unsafe fn shrink_new_heap(p: &mut Process, new_sz: usize, objv: *mut Term, nobj: usize) {
    debug_assert!(new_sz < p.heap_sz);
    debug_assert!(p.heap_used() <= new_sz);
    let heap_size = p.heap_used();
    let old_sz = p.heap_sz;
    let old_base = p.heap;
    let high_water_off = p.mature_size();

    unsafe {
        let new_heap = crate::heap::realloc_words(p.heap, p.heap_sz, new_sz);
        p.hend = new_heap.add(new_sz);

        let offs = (new_heap as isize - old_base as isize) / WORD_SIZE as isize;
        if offs != 0 {
            // A shrunk heap is not expected to move, but you never
            // know on some strange embedded systems.
            let area = Area::new(old_base, heap_size);
            offset_heap(new_heap, heap_size, offs, area);
            p.high_water = new_heap.add(high_water_off);
            offset_rootset(p, offs, area, objv, nobj);
            p.htop = new_heap.add(heap_size);
            p.heap = new_heap;
        }
    }
    p.heap_sz = new_sz;

    log::debug!("<{}> heap shrunk {} -> {} words", p.id, old_sz, new_sz);
    log_event(GcEvent::HeapResize {
        pid: p.id,
        old_words: old_sz,
        new_words: new_sz,
    });
}

/// Resize the separate stack arena to exactly `new_sz` words, moving
/// the live slice to the new upper end. Returns the new size.
pub fn change_stack_size(p: &mut Process, new_sz: usize) -> usize {
    p.stack.resize(new_sz);
    new_sz
}

/// Grow the stack so at least `need` more words fit, following the
/// heap-size schedule.
pub fn grow_stack(p: &mut Process, need: usize) -> usize {
    let new_sz = sizes::next_heap_size(p.stack.size() + need, 0);
    change_stack_size(p, new_sz)
}
