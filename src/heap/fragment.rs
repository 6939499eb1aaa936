//! Heap Fragments - Off-Heap Term Buffers
//!
//! A heap fragment holds terms that belong to a process but could not
//! be placed on its heap: message payloads built by a sender, and BIF
//! temporaries allocated when the process was not at a safe point to
//! grow. Fragments are logically part of the process and are drained
//! into the young heap by the next collection, after which the chain
//! is empty.

use crate::term::{OffHeap, Term, TermBuilder};

/// One off-heap term buffer.
///
/// Fragments built by message senders carry their own off-heap lists;
/// these are merged into the receiving process when the payload moves
/// onto its heap. Fragments created for BIF temporaries link their
/// off-heap objects into the process lists directly and leave this
/// one empty.
pub struct HeapFragment {
    pub mem: *mut Term,
    /// Capacity in words.
    pub size: usize,
    /// Words written so far.
    pub used: usize,
    pub off_heap: OffHeap,
}

impl HeapFragment {
    pub fn new(size: usize) -> HeapFragment {
        HeapFragment {
            mem: unsafe { super::alloc_words(size.max(1)) },
            size: size.max(1),
            used: 0,
            off_heap: OffHeap::default(),
        }
    }

    /// Byte view of the written part, for area-membership tests.
    #[inline]
    pub fn area(&self) -> (*const u8, usize) {
        (self.mem as *const u8, self.used * crate::term::WORD_SIZE)
    }
}

impl TermBuilder for HeapFragment {
    fn alloc(&mut self, need: usize) -> *mut Term {
        assert!(
            self.used + need <= self.size,
            "heap fragment overrun: used {} + need {} > size {}",
            self.used,
            need,
            self.size
        );
        let hp = unsafe { self.mem.add(self.used) };
        self.used += need;
        hp
    }

    fn off_heap_mut(&mut self) -> &mut OffHeap {
        &mut self.off_heap
    }
}

impl Drop for HeapFragment {
    fn drop(&mut self) {
        // A drained fragment has had its off-heap list merged away; a
        // discarded one still owns a reference per linked node.
        if !self.off_heap.is_empty() {
            self.off_heap.cleanup();
        }
        unsafe { super::free_words(self.mem, self.size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{structural_eq, Term};

    #[test]
    fn test_fragment_builder() {
        let mut frag = HeapFragment::new(32);
        let t = frag.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
        let l = frag.make_cons(t, crate::term::NIL);
        assert_eq!(frag.used, 5);
        assert!(structural_eq(l, l));
    }

    #[test]
    #[should_panic(expected = "heap fragment overrun")]
    fn test_fragment_overrun_panics() {
        let mut frag = HeapFragment::new(2);
        let _ = frag.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
    }

    #[test]
    fn test_discarded_fragment_drops_offheap_refs() {
        let bin = crate::term::Binary::alloc_from(b"payload");
        unsafe { (*bin).refc_inc() };
        {
            let mut frag = HeapFragment::new(16);
            let _ = frag.make_refc_binary_from(bin, 7);
        }
        unsafe {
            assert_eq!((*bin).refc(), 1);
            assert_eq!((*bin).refc_dectest(), 0);
            crate::term::Binary::free(bin);
        }
    }
}
