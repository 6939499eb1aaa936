//! Process State - Heaps, Stack, and Root Fields
//!
//! Everything the collector needs from a process: the young and old
//! heap arenas, the separate stack arena, the dictionary, the message
//! queue, the heap-fragment chain, the off-heap lists, and the
//! handful of single-term fields that count as roots.
//!
//! The heap pointer discipline is the load-bearing part:
//!
//! ```text
//! young heap:   heap ≤ high_water ≤ htop ≤ hend,  hend - heap = heap_sz
//! old heap:     old_heap ≤ old_htop ≤ old_hend    (absent until first
//!                                                  promotion)
//! stack:        end ≤ top ≤ start                 (separate arena,
//!                                                  grows downward)
//! ```
//!
//! These invariants hold on entry and exit of every collection; the
//! sanity checks below abort the runtime when they are violated.

pub mod fiber;
pub mod message;

use crate::config::GcConfig;
use crate::error::{Result, SgcError};
use crate::heap::fragment::HeapFragment;
use crate::heap::sizes;
use crate::term::{OffHeap, Term, TermBuilder, NIL};

use self::fiber::FiberQueue;
use self::message::MessageQueue;

/// Number of argument registers preserved across BIF calls.
pub const MAX_ARG_REGS: usize = 6;

/// A fullsweep is required before the next collection completes.
pub const F_NEED_FULLSWEEP: u32 = 1 << 0;
/// Grow the heap at the next major collection even if not strictly needed.
pub const F_HEAP_GROW: u32 = 1 << 1;
/// A collection has been requested regardless of heap pressure.
pub const F_FORCE_GC: u32 = 1 << 2;

/// Scheduler-visible process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Runnable,
    Waiting,
    /// The process is being garbage collected; no user code runs.
    Garbing,
    Exiting,
}

/// Why the current BIF returned a non-value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freason {
    Normal,
    /// The BIF trapped; its live registers are in `def_arg_reg`.
    Trap,
    Badarg,
}

/// Separate stack arena, growing downward from `start` toward `end`.
///
/// The interleaved layout (stack sharing the young heap's upper end)
/// is deliberately not supported; every stack access goes through
/// this type so the collector never needs to care.
pub struct Stack {
    base: *mut Term,
    size: usize,
    pub(crate) top: *mut Term,
}

impl Stack {
    pub fn new(size: usize) -> Stack {
        let base = unsafe { crate::heap::alloc_words(size) };
        Stack {
            base,
            size,
            top: unsafe { base.add(size) },
        }
    }

    /// Highest address; the stack is empty when `top == start`.
    #[inline]
    pub fn start(&self) -> *mut Term {
        unsafe { self.base.add(self.size) }
    }

    /// Lowest address; pushing past it is an overrun.
    #[inline]
    pub fn end(&self) -> *mut Term {
        self.base
    }

    #[inline]
    pub fn top(&self) -> *mut Term {
        self.top
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn used(&self) -> usize {
        (self.start() as usize - self.top as usize) / crate::term::WORD_SIZE
    }

    #[inline]
    pub fn avail(&self) -> usize {
        self.size - self.used()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top == self.start()
    }

    pub(crate) fn push_raw(&mut self, term: Term) {
        debug_assert!(self.avail() > 0);
        unsafe {
            self.top = self.top.sub(1);
            *self.top = term;
        }
    }

    pub fn pop(&mut self) -> Option<Term> {
        if self.is_empty() {
            return None;
        }
        unsafe {
            let t = *self.top;
            self.top = self.top.add(1);
            Some(t)
        }
    }

    /// Slot `i` counted from the top of the stack.
    pub fn get(&self, i: usize) -> Term {
        assert!(i < self.used(), "stack slot {} out of {}", i, self.used());
        unsafe { *self.top.add(i) }
    }

    /// Overwrite slot `i` counted from the top.
    pub fn set(&mut self, i: usize, term: Term) {
        assert!(i < self.used(), "stack slot {} out of {}", i, self.used());
        unsafe { *self.top.add(i) = term }
    }

    /// Resize the arena, keeping the used slice at the upper end.
    /// Growing moves the slice after the realloc, shrinking before
    /// it; the slice would otherwise be cut off with the old tail.
    pub(crate) fn resize(&mut self, new_size: usize) {
        let used = self.used();
        assert!(new_size >= used, "stack resize below used size");
        unsafe {
            if new_size > self.size {
                let new_base = crate::heap::realloc_words(self.base, self.size, new_size);
                std::ptr::copy(
                    new_base.add(self.size - used),
                    new_base.add(new_size - used),
                    used,
                );
                self.base = new_base;
            } else {
                std::ptr::copy(
                    self.base.add(self.size - used),
                    self.base.add(new_size - used),
                    used,
                );
                self.base = crate::heap::realloc_words(self.base, self.size, new_size);
            }
            self.size = new_size;
            self.top = self.base.add(new_size - used);
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { crate::heap::free_words(self.base, self.size) }
    }
}

/// Process dictionary; its backing array is a root vector.
#[derive(Default)]
pub struct Dictionary {
    pub(crate) data: Vec<Term>,
}

/// A Skein process, as seen by its collector.
pub struct Process {
    pub(crate) id: u64,

    // Young heap.
    pub(crate) heap: *mut Term,
    pub(crate) htop: *mut Term,
    pub(crate) hend: *mut Term,
    pub(crate) heap_sz: usize,
    pub(crate) high_water: *mut Term,

    // Old heap; null until the first promotion.
    pub(crate) old_heap: *mut Term,
    pub(crate) old_htop: *mut Term,
    pub(crate) old_hend: *mut Term,

    pub(crate) stack: Stack,

    pub(crate) min_heap_size: usize,
    pub(crate) global_floor: usize,
    pub(crate) gen_gcs: u32,
    pub(crate) max_gen_gcs: u32,
    pub(crate) flags: u32,
    pub(crate) status: Status,
    pub(crate) gcstatus: Status,

    pub(crate) dictionary: Option<Dictionary>,

    /// Sequential-trace token; a root when non-immediate.
    pub seq_trace_token: Term,
    /// Group leader; a root when non-immediate.
    pub group_leader: Term,
    /// Exit reason while terminating; a root when non-immediate.
    pub fvalue: Term,
    /// Saved stack trace while terminating; a root when non-immediate.
    pub ftrace: Term,
    pub freason: Freason,

    /// Live argument-register count for `def_arg_reg`.
    pub arity: usize,
    pub arg_reg: [Term; MAX_ARG_REGS],
    pub def_arg_reg: [Term; MAX_ARG_REGS],
    /// Reduction budget charged by collections.
    pub reductions: usize,

    pub(crate) msg: MessageQueue,
    pub(crate) mbuf: Vec<HeapFragment>,

    pub(crate) off_heap: OffHeap,
    pub(crate) bin_vheap_sz: usize,
    pub(crate) bin_old_vheap: usize,
    pub(crate) bin_old_vheap_sz: usize,

    pub(crate) fibers: FiberQueue,
    pub(crate) next_ref: usize,

    pub(crate) config: GcConfig,
}

// The collector runs on one scheduler thread at a time; nothing here
// is shared without the process table's own synchronization.
unsafe impl Send for Process {}

impl Process {
    /// Spawn a process with a fresh young heap and an empty stack.
    pub fn spawn(id: u64, config: GcConfig) -> Result<Process> {
        config
            .validate()
            .map_err(|e| SgcError::Configuration(e.to_string()))?;

        let global_floor = config.global_floor;
        let min_heap_size = config.min_heap_size.max(global_floor);
        let heap_sz = sizes::next_heap_size(min_heap_size, 0);
        let heap = unsafe { crate::heap::alloc_words(heap_sz) };

        let mut p = Process {
            id,
            heap,
            htop: heap,
            hend: unsafe { heap.add(heap_sz) },
            heap_sz,
            high_water: heap,
            old_heap: std::ptr::null_mut(),
            old_htop: std::ptr::null_mut(),
            old_hend: std::ptr::null_mut(),
            stack: Stack::new(sizes::MIN_HEAP_SIZE),
            min_heap_size,
            global_floor,
            gen_gcs: 0,
            max_gen_gcs: config.max_gen_gcs,
            flags: 0,
            status: Status::Runnable,
            gcstatus: Status::Runnable,
            dictionary: None,
            seq_trace_token: NIL,
            group_leader: Term::make_pid(0),
            fvalue: NIL,
            ftrace: NIL,
            freason: Freason::Normal,
            arity: 0,
            arg_reg: [NIL; MAX_ARG_REGS],
            def_arg_reg: [NIL; MAX_ARG_REGS],
            reductions: 0,
            msg: MessageQueue::default(),
            mbuf: Vec::new(),
            off_heap: OffHeap::default(),
            bin_vheap_sz: global_floor,
            bin_old_vheap: 0,
            bin_old_vheap_sz: global_floor,
            fibers: FiberQueue::default(),
            next_ref: 0,
            config,
        };
        // Every process starts as its own sole fiber.
        let root_id = p.fresh_ref();
        p.fibers.append(root_id, [NIL; 3]);
        Ok(p)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn heap_size(&self) -> usize {
        self.heap_sz
    }

    #[inline]
    pub fn heap_used(&self) -> usize {
        (self.htop as usize - self.heap as usize) / crate::term::WORD_SIZE
    }

    #[inline]
    pub fn heap_free(&self) -> usize {
        (self.hend as usize - self.htop as usize) / crate::term::WORD_SIZE
    }

    /// Words of young data that already survived one collection.
    #[inline]
    pub fn mature_size(&self) -> usize {
        (self.high_water as usize - self.heap as usize) / crate::term::WORD_SIZE
    }

    #[inline]
    pub fn has_old_heap(&self) -> bool {
        !self.old_heap.is_null()
    }

    #[inline]
    pub fn old_heap_size(&self) -> usize {
        if self.old_heap.is_null() {
            0
        } else {
            (self.old_hend as usize - self.old_heap as usize) / crate::term::WORD_SIZE
        }
    }

    #[inline]
    pub fn old_heap_used(&self) -> usize {
        if self.old_heap.is_null() {
            0
        } else {
            (self.old_htop as usize - self.old_heap as usize) / crate::term::WORD_SIZE
        }
    }

    /// Address span `[start, top)` of the old generation's live
    /// part, for membership tests.
    pub fn old_heap_span(&self) -> Option<(usize, usize)> {
        if self.old_heap.is_null() {
            None
        } else {
            Some((self.old_heap as usize, self.old_htop as usize))
        }
    }

    #[inline]
    pub fn gen_gcs(&self) -> u32 {
        self.gen_gcs
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Total words in the heap-fragment chain.
    pub fn mbuf_size(&self) -> usize {
        self.mbuf.iter().map(|f| f.used).sum()
    }

    pub fn mbuf_count(&self) -> usize {
        self.mbuf.len()
    }

    pub fn off_heap(&self) -> &OffHeap {
        &self.off_heap
    }

    /// Clamp a heap size request to the size schedule and the
    /// process minimum. Use of hibernation can have shrunk the heap
    /// below the minimum, so the clamp is applied on every resize.
    pub(crate) fn next_heap_size(&self, size: usize, offset: usize) -> usize {
        let size = sizes::next_heap_size(size, offset);
        size.max(self.min_heap_size)
    }

    #[inline]
    pub(crate) fn fresh_ref(&mut self) -> Term {
        let r = Term::make_ref(self.next_ref);
        self.next_ref += 1;
        r
    }

    // === Stack ===

    /// Push a root onto the stack, growing the arena on demand.
    pub fn stack_push(&mut self, term: Term) {
        if self.stack.avail() == 0 {
            let new_sz = sizes::next_heap_size(self.stack.size() + 1, 0);
            self.stack.resize(new_sz);
        }
        self.stack.push_raw(term);
    }

    pub fn stack_pop(&mut self) -> Option<Term> {
        self.stack.pop()
    }

    // === Dictionary ===

    /// Append a term to the process dictionary root vector.
    pub fn dict_put(&mut self, term: Term) {
        self.dictionary.get_or_insert_with(Dictionary::default).data.push(term);
    }

    pub fn dict_len(&self) -> usize {
        self.dictionary.as_ref().map_or(0, |d| d.data.len())
    }

    pub fn dict_get(&self, i: usize) -> Term {
        self.dictionary.as_ref().expect("no dictionary").data[i]
    }

    // === Heap fragments ===

    /// Open a fresh heap fragment for BIF temporaries. Off-heap
    /// objects written through the returned builder are linked into
    /// the process lists directly, so the fragment itself never owns
    /// references.
    pub fn mbuf_builder(&mut self, size: usize) -> MbufBuilder<'_> {
        self.mbuf.push(HeapFragment::new(size));
        let Process { mbuf, off_heap, .. } = self;
        MbufBuilder {
            frag: mbuf.last_mut().expect("pushed above"),
            off_heap,
        }
    }

    // === Sanity checks ===

    /// Heap/stack overrun check; runs in all build modes, aborting
    /// with diagnostics on violation. Debug builds additionally
    /// verify the full pointer discipline.
    pub(crate) fn quick_sanity_check(&self) {
        if self.stack.top < self.stack.end() {
            log::error!(
                "<{}> stack overrun: top {:p} end {:p} start {:p}",
                self.id,
                self.stack.top,
                self.stack.end(),
                self.stack.start()
            );
            panic!("<{}> overrun stack", self.id);
        }
        if self.htop > self.hend {
            log::error!(
                "<{}> heap overrun: heap {:p} htop {:p} hend {:p}",
                self.id,
                self.heap,
                self.htop,
                self.hend
            );
            panic!("<{}> overrun heap", self.id);
        }
        debug_assert!(self.heap < self.hend);
        debug_assert_eq!(
            self.heap_sz,
            (self.hend as usize - self.heap as usize) / crate::term::WORD_SIZE
        );
        debug_assert!(self.heap <= self.htop);
        debug_assert!(self.heap <= self.high_water && self.high_water <= self.htop);
        if !self.old_heap.is_null() {
            debug_assert!(self.old_heap <= self.old_htop && self.old_htop <= self.old_hend);
        }
    }
}

impl TermBuilder for Process {
    /// Bump-allocate on the young heap. The caller must have ensured
    /// room (by collecting with the needed word count); running out
    /// here is a runtime bug, not an error.
    fn alloc(&mut self, need: usize) -> *mut Term {
        assert!(
            self.heap_free() >= need,
            "<{}> heap overrun: need {} words, {} free (collect first)",
            self.id,
            need,
            self.heap_free()
        );
        let hp = self.htop;
        self.htop = unsafe { self.htop.add(need) };
        hp
    }

    fn off_heap_mut(&mut self) -> &mut OffHeap {
        &mut self.off_heap
    }
}

/// Builder writing BIF temporaries into a process heap fragment while
/// linking off-heap objects into the process lists.
pub struct MbufBuilder<'a> {
    frag: &'a mut HeapFragment,
    off_heap: &'a mut OffHeap,
}

impl TermBuilder for MbufBuilder<'_> {
    fn alloc(&mut self, need: usize) -> *mut Term {
        self.frag.alloc(need)
    }

    fn off_heap_mut(&mut self) -> &mut OffHeap {
        self.off_heap
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // Fragments and messages drop their own arenas; the process
        // drops the one reference it holds per linked off-heap node.
        self.off_heap.cleanup();
        unsafe {
            crate::heap::free_words(self.heap, self.heap_sz);
            if !self.old_heap.is_null() {
                crate::heap::free_words(self.old_heap, self.old_heap_size());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_invariants() {
        let p = Process::spawn(1, GcConfig::default()).unwrap();
        assert_eq!(p.heap_size(), 34);
        assert_eq!(p.heap_used(), 0);
        assert_eq!(p.mature_size(), 0);
        assert!(!p.has_old_heap());
        assert!(p.stack().is_empty());
        p.quick_sanity_check();
    }

    #[test]
    fn test_spawn_rounds_min_heap_to_schedule() {
        let p = Process::spawn(1, GcConfig {
            min_heap_size: 100,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(p.heap_size(), 144);
    }

    #[test]
    fn test_global_floor_raises_process_minimum() {
        let p = Process::spawn(1, GcConfig {
            min_heap_size: 34,
            global_floor: 100,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(p.min_heap_size, 100);
        assert_eq!(p.global_floor, 100);
        assert_eq!(p.heap_size(), 144);
        assert_eq!(p.bin_vheap_sz, 100);
    }

    #[test]
    fn test_spawn_rejects_bad_config() {
        let r = Process::spawn(1, GcConfig {
            min_heap_size: 0,
            ..Default::default()
        });
        assert!(r.is_err());
    }

    #[test]
    fn test_builders_bump_heap() {
        let mut p = Process::spawn(1, GcConfig::default()).unwrap();
        let t = p.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
        let l = p.make_cons(t, NIL);
        assert_eq!(p.heap_used(), 5);
        assert!(crate::term::structural_eq(l, l));
    }

    #[test]
    fn test_stack_push_pop_and_growth() {
        let mut p = Process::spawn(1, GcConfig::default()).unwrap();
        for i in 0..200 {
            p.stack_push(Term::make_small(i));
        }
        assert_eq!(p.stack().used(), 200);
        assert_eq!(p.stack().get(0).small_value(), 199);
        for i in (0..200).rev() {
            assert_eq!(p.stack_pop().unwrap().small_value(), i);
        }
        assert!(p.stack_pop().is_none());
    }

    #[test]
    fn test_stack_resize_preserves_contents() {
        let mut s = Stack::new(8);
        s.push_raw(Term::make_small(10));
        s.push_raw(Term::make_small(20));
        s.resize(64);
        assert_eq!(s.size(), 64);
        assert_eq!(s.used(), 2);
        assert_eq!(s.get(0).small_value(), 20);
        assert_eq!(s.get(1).small_value(), 10);
        s.resize(4);
        assert_eq!(s.get(0).small_value(), 20);
    }

    #[test]
    fn test_mbuf_builder_links_offheap_into_process() {
        let mut p = Process::spawn(1, GcConfig::default()).unwrap();
        let mut b = p.mbuf_builder(16);
        let _bin = b.make_refc_binary(b"fragment resident");
        assert_eq!(p.mbuf_count(), 1);
        assert!(p.mbuf_size() > 0);
        assert!(!p.off_heap().mso.is_null());
        assert!(p.mbuf[0].off_heap.is_empty());
    }

    #[test]
    fn test_dictionary_roots() {
        let mut p = Process::spawn(1, GcConfig::default()).unwrap();
        let t = p.make_tuple(&[Term::make_small(5)]);
        p.dict_put(t);
        assert_eq!(p.dict_len(), 1);
        assert_eq!(p.dict_get(0), t);
    }
}
