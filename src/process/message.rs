//! Message Queue
//!
//! Envelopes are either *inline* (the payload already lives on the
//! process heap and the two envelope slots are roots) or *attached*
//! (the payload sits in a fragment built by the sender). Attached
//! payloads are self-contained subgraphs; the collector copies them
//! wholesale onto the heap end after the main sweep instead of
//! scanning them.

use crate::collect::offset::offset_heap;
use crate::collect::sweep::Area;
use crate::heap::fragment::HeapFragment;
use crate::term::{offset_ptr, ptr_val, ExternalThing, FunThing, ProcBin, Term, WORD_SIZE};

use super::Process;

/// One message envelope: `m[0]` is the payload term, `m[1]` the
/// sequential-trace token.
pub struct Message {
    pub m: [Term; 2],
    pub attached: Option<HeapFragment>,
}

/// Ordered queue of envelopes. Boxing keeps the envelope slots at
/// stable addresses; the root set points straight at them.
#[derive(Default)]
pub struct MessageQueue {
    msgs: Vec<Box<Message>>,
}

impl MessageQueue {
    pub fn push(&mut self, msg: Message) {
        self.msgs.push(Box::new(msg));
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.msgs.iter().map(|b| b.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.msgs.iter_mut().map(|b| b.as_mut())
    }

    pub fn pop_front(&mut self) -> Option<Box<Message>> {
        if self.msgs.is_empty() {
            None
        } else {
            Some(self.msgs.remove(0))
        }
    }
}

impl Process {
    /// Deliver a message whose payload is already on this heap.
    pub fn send_local(&mut self, term: Term, token: Term) {
        self.msg.push(Message {
            m: [term, token],
            attached: None,
        });
    }

    /// Deliver a message whose payload lives in `frag` (built by the
    /// sender). The payload stays in the fragment until the next
    /// collection moves it onto the heap.
    pub fn send_attached(&mut self, frag: HeapFragment, term: Term, token: Term) {
        debug_assert!(
            !term.is_not_immediate() || {
                let (start, size) = frag.area();
                (ptr_val(term) as usize).wrapping_sub(start as usize) < size
            },
            "attached payload must live in its fragment"
        );
        self.msg.push(Message {
            m: [term, token],
            attached: Some(frag),
        });
    }

    pub fn message_count(&self) -> usize {
        self.msg.len()
    }

    /// Payload term of message `i` without consuming it.
    pub fn peek_message(&self, i: usize) -> Term {
        self.msg.msgs[i].m[0]
    }

    /// Dequeue the first message. Only valid once the payload is on
    /// the heap (any collection guarantees that).
    pub fn receive(&mut self) -> Option<Term> {
        let msg = self.msg.pop_front()?;
        assert!(
            msg.attached.is_none(),
            "receive before attached payload reached the heap"
        );
        Some(msg.m[0])
    }

    /// Total words of payload still attached to messages.
    pub(crate) fn combined_message_size(&self) -> usize {
        self.msg
            .iter()
            .filter_map(|m| m.attached.as_ref())
            .map(|f| f.used)
            .sum()
    }

    /// Move every still-attached payload onto the heap end.
    ///
    /// Runs after the main sweep; each fragment is self-contained, so
    /// a wholesale copy plus an intra-area offset pass rebuilds the
    /// subgraph without rescanning it. The fragment's off-heap lists
    /// are spliced onto the front of the process lists (fresh data
    /// belongs at the new-generation end).
    pub(crate) fn move_attached_messages_to_heap(&mut self) {
        for i in 0..self.msg.msgs.len() {
            let Some(mut frag) = self.msg.msgs[i].attached.take() else {
                continue;
            };
            let used = frag.used;
            if used > 0 {
                assert!(
                    self.heap_free() >= used,
                    "<{}> no room for attached message ({} words)",
                    self.id,
                    used
                );
                unsafe {
                    let dst = self.htop;
                    std::ptr::copy_nonoverlapping(frag.mem, dst, used);
                    self.htop = self.htop.add(used);

                    let offs =
                        (dst as isize - frag.mem as isize) / WORD_SIZE as isize;
                    let area = Area::new(frag.mem, used);
                    offset_heap(dst, used, offs, area);

                    let msg = self.msg.msgs[i].as_mut();
                    for slot in msg.m.iter_mut() {
                        if slot.is_not_immediate() && area.contains(ptr_val(*slot)) {
                            *slot = offset_ptr(*slot, offs);
                        }
                    }

                    splice_frag_off_heap(self, &mut frag, offs);
                }
            }
            // Fragment is freed here; its off-heap lists were merged
            // away so nothing is dereferenced.
        }
    }
}

/// Re-base the fragment's off-heap list heads by `offs` and splice
/// each list onto the front of the process's.
unsafe fn splice_frag_off_heap(p: &mut Process, frag: &mut HeapFragment, offs: isize) {
    unsafe {
        if !frag.off_heap.mso.is_null() {
            let head = (frag.off_heap.mso as *mut Term).offset(offs) as *mut ProcBin;
            let mut tail = head;
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = p.off_heap.mso;
            p.off_heap.mso = head;
            frag.off_heap.mso = std::ptr::null_mut();
        }
        if !frag.off_heap.funs.is_null() {
            let head = (frag.off_heap.funs as *mut Term).offset(offs) as *mut FunThing;
            let mut tail = head;
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = p.off_heap.funs;
            p.off_heap.funs = head;
            frag.off_heap.funs = std::ptr::null_mut();
        }
        if !frag.off_heap.externals.is_null() {
            let head = (frag.off_heap.externals as *mut Term).offset(offs) as *mut ExternalThing;
            let mut tail = head;
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = p.off_heap.externals;
            p.off_heap.externals = head;
            frag.off_heap.externals = std::ptr::null_mut();
        }
        p.off_heap.overhead += frag.off_heap.overhead;
        frag.off_heap.overhead = 0;
    }
}
