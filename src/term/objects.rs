//! On-Heap Objects With Off-Heap Payloads
//!
//! Layouts of the boxed objects the collector must treat specially,
//! and the shared reference-counted resources behind them.
//!
//! Each of the three off-heap object kinds carries its list link
//! *inside* the on-heap object. The link survives copying because the
//! object is moved wholesale; the off-heap sweep then follows the old
//! list, discovering new addresses through the forwarding markers.

use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Term, WORD_SIZE};

/// Words occupied by a `ProcBin` on the heap.
pub const PROC_BIN_WORDS: usize = 6;
/// Fixed words of a `FunThing`; environment terms follow.
pub const FUN_FIXED_WORDS: usize = 5;
/// Words occupied by an `ExternalThing` on the heap.
pub const EXTERNAL_WORDS: usize = 4;
/// Words occupied by a `BinMatchState` on the heap.
pub const MATCHSTATE_WORDS: usize = 5;

const _: () = assert!(std::mem::size_of::<ProcBin>() == PROC_BIN_WORDS * WORD_SIZE);
const _: () = assert!(std::mem::size_of::<FunThing>() == FUN_FIXED_WORDS * WORD_SIZE);
const _: () = assert!(std::mem::size_of::<ExternalThing>() == EXTERNAL_WORDS * WORD_SIZE);
const _: () = assert!(std::mem::size_of::<BinMatchState>() == MATCHSTATE_WORDS * WORD_SIZE);

/// The binary is writable (append-optimized building in progress).
pub const PB_IS_WRITABLE: usize = 1;
/// A writer is currently active on the binary.
pub const PB_ACTIVE_WRITER: usize = 2;

/// On-heap handle of a reference-counted binary
#[repr(C)]
pub struct ProcBin {
    pub header: Term,
    /// Bytes of the backing buffer this handle exposes.
    pub size: usize,
    /// Off-heap list link.
    pub next: *mut ProcBin,
    /// Shared backing buffer.
    pub val: *mut Binary,
    /// Data pointer into `val`'s payload.
    pub bytes: *mut u8,
    pub flags: usize,
}

/// On-heap closure. `num_free` environment terms follow the fixed
/// fields; the header arity covers only the fixed fields so the sweep
/// scans the environment as ordinary heap words.
#[repr(C)]
pub struct FunThing {
    pub header: Term,
    /// Off-heap list link.
    pub next: *mut FunThing,
    /// Shared fun-table entry.
    pub entry: *mut FunEntry,
    pub arity: usize,
    pub num_free: usize,
}

impl FunThing {
    /// Pointer to the first environment term.
    ///
    /// # Safety
    ///
    /// `this` must point at a live closure followed by `num_free`
    /// environment words.
    #[inline]
    pub unsafe fn env_ptr(this: *mut FunThing) -> *mut Term {
        unsafe { (this as *mut Term).add(FUN_FIXED_WORDS) }
    }
}

/// On-heap external identifier
#[repr(C)]
pub struct ExternalThing {
    pub header: Term,
    /// Off-heap list link.
    pub next: *mut ExternalThing,
    /// Shared node-table entry.
    pub node: *mut NodeEntry,
    pub id: usize,
}

/// On-heap binary match state. `base` is an interior pointer into the
/// matched binary's payload and must be recomputed whenever `orig`
/// is forwarded or offset.
#[repr(C)]
pub struct BinMatchState {
    pub header: Term,
    /// Boxed reference to the matched binary.
    pub orig: Term,
    pub base: *mut u8,
    /// Match position in bits.
    pub offset: usize,
    /// Total size in bits.
    pub size: usize,
}

// === Shared reference-counted resources ===

/// Backing buffer of a reference-counted binary.
///
/// Allocated as one block: this header immediately followed by
/// `orig_size` payload bytes. Shared across processes; freed when the
/// last reference is dropped.
#[repr(C)]
pub struct Binary {
    refc: AtomicUsize,
    pub orig_size: usize,
}

impl Binary {
    fn layout(size: usize) -> Layout {
        Layout::from_size_align(
            std::mem::size_of::<Binary>() + size,
            std::mem::align_of::<Binary>(),
        )
        .expect("binary layout")
    }

    /// Allocate a buffer of `size` bytes with a reference count of 1.
    pub fn alloc(size: usize) -> *mut Binary {
        let layout = Self::layout(size);
        unsafe {
            let p = alloc(layout) as *mut Binary;
            if p.is_null() {
                handle_alloc_error(layout);
            }
            (*p).refc = AtomicUsize::new(1);
            (*p).orig_size = size;
            p
        }
    }

    /// Allocate a buffer holding a copy of `data`.
    pub fn alloc_from(data: &[u8]) -> *mut Binary {
        let p = Self::alloc(data.len());
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), (*p).orig_bytes(), data.len());
        }
        p
    }

    /// Resize the buffer in place, possibly moving it.
    ///
    /// # Safety
    ///
    /// `this` must be a live buffer; all `bytes` pointers into it are
    /// invalidated and must be re-seated from `orig_bytes()`.
    pub unsafe fn realloc(this: *mut Binary, new_size: usize) -> *mut Binary {
        unsafe {
            let old_layout = Self::layout((*this).orig_size);
            let p = realloc(
                this as *mut u8,
                old_layout,
                std::mem::size_of::<Binary>() + new_size,
            ) as *mut Binary;
            if p.is_null() {
                handle_alloc_error(Self::layout(new_size));
            }
            (*p).orig_size = new_size;
            p
        }
    }

    /// Free the buffer. Only called when the reference count reached 0.
    ///
    /// # Safety
    ///
    /// `this` must be a live buffer with no remaining references.
    pub unsafe fn free(this: *mut Binary) {
        unsafe {
            let layout = Self::layout((*this).orig_size);
            dealloc(this as *mut u8, layout);
        }
    }

    /// Pointer to the payload bytes.
    #[inline]
    pub fn orig_bytes(&self) -> *mut u8 {
        unsafe { (self as *const Binary as *mut u8).add(std::mem::size_of::<Binary>()) }
    }

    #[inline]
    pub fn refc(&self) -> usize {
        self.refc.load(Ordering::Acquire)
    }

    #[inline]
    pub fn refc_inc(&self) {
        self.refc.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the reference count, returning the new value.
    #[inline]
    pub fn refc_dectest(&self) -> usize {
        self.refc.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

/// Shared fun-table entry behind every closure of one definition.
pub struct FunEntry {
    refc: AtomicUsize,
    pub module: Term,
    pub index: usize,
}

impl FunEntry {
    pub fn alloc(module: Term, index: usize) -> *mut FunEntry {
        Box::into_raw(Box::new(FunEntry {
            refc: AtomicUsize::new(1),
            module,
            index,
        }))
    }

    #[inline]
    pub fn refc(&self) -> usize {
        self.refc.load(Ordering::Acquire)
    }

    #[inline]
    pub fn refc_inc(&self) {
        self.refc.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn refc_dectest(&self) -> usize {
        self.refc.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Remove the entry from the fun table. Only called when the
    /// reference count reached 0.
    ///
    /// # Safety
    ///
    /// `this` must be a live entry with no remaining references.
    pub unsafe fn erase(this: *mut FunEntry) {
        drop(unsafe { Box::from_raw(this) });
    }
}

/// Shared node-table entry behind external identifiers.
pub struct NodeEntry {
    refc: AtomicUsize,
    pub name: Term,
    pub creation: u32,
}

impl NodeEntry {
    pub fn alloc(name: Term, creation: u32) -> *mut NodeEntry {
        Box::into_raw(Box::new(NodeEntry {
            refc: AtomicUsize::new(1),
            name,
            creation,
        }))
    }

    #[inline]
    pub fn refc(&self) -> usize {
        self.refc.load(Ordering::Acquire)
    }

    #[inline]
    pub fn refc_inc(&self) {
        self.refc.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; frees the entry at zero.
    ///
    /// # Safety
    ///
    /// `this` must be a live entry and the caller must hold one of
    /// its references.
    pub unsafe fn deref(this: *mut NodeEntry) {
        unsafe {
            if (*this).refc.fetch_sub(1, Ordering::AcqRel) == 1 {
                drop(Box::from_raw(this));
            }
        }
    }
}

/// Per-arena off-heap bookkeeping: the three object lists plus the
/// virtual-heap overhead of the binaries reachable through them.
pub struct OffHeap {
    pub mso: *mut ProcBin,
    pub funs: *mut FunThing,
    pub externals: *mut ExternalThing,
    /// Words of binary data managed through refc binaries.
    pub overhead: usize,
}

impl Default for OffHeap {
    fn default() -> Self {
        OffHeap {
            mso: std::ptr::null_mut(),
            funs: std::ptr::null_mut(),
            externals: std::ptr::null_mut(),
            overhead: 0,
        }
    }
}

impl OffHeap {
    pub fn is_empty(&self) -> bool {
        self.mso.is_null() && self.funs.is_null() && self.externals.is_null()
    }

    /// Drop one reference from every linked node and clear the lists.
    ///
    /// Used at process exit and when an unconsumed heap fragment is
    /// discarded: each node's external resource loses exactly the one
    /// reference the arena held.
    pub fn cleanup(&mut self) {
        unsafe {
            let mut pb = self.mso;
            while !pb.is_null() {
                let next = (*pb).next;
                if (*(*pb).val).refc_dectest() == 0 {
                    Binary::free((*pb).val);
                }
                pb = next;
            }
            let mut fun = self.funs;
            while !fun.is_null() {
                let next = (*fun).next;
                if (*(*fun).entry).refc_dectest() == 0 {
                    FunEntry::erase((*fun).entry);
                }
                fun = next;
            }
            let mut ext = self.externals;
            while !ext.is_null() {
                let next = (*ext).next;
                NodeEntry::deref((*ext).node);
                ext = next;
            }
        }
        self.mso = std::ptr::null_mut();
        self.funs = std::ptr::null_mut();
        self.externals = std::ptr::null_mut();
        self.overhead = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_alloc_and_bytes() {
        let bin = Binary::alloc_from(b"hello, skein");
        unsafe {
            assert_eq!((*bin).orig_size, 12);
            assert_eq!((*bin).refc(), 1);
            let payload = std::slice::from_raw_parts((*bin).orig_bytes(), 12);
            assert_eq!(payload, b"hello, skein");
            assert_eq!((*bin).refc_dectest(), 0);
            Binary::free(bin);
        }
    }

    #[test]
    fn test_binary_realloc_preserves_prefix() {
        let bin = Binary::alloc_from(b"0123456789abcdef");
        unsafe {
            let bin = Binary::realloc(bin, 4);
            assert_eq!((*bin).orig_size, 4);
            let payload = std::slice::from_raw_parts((*bin).orig_bytes(), 4);
            assert_eq!(payload, b"0123");
            Binary::free(bin);
        }
    }

    #[test]
    fn test_refc_inc_dec() {
        let bin = Binary::alloc(8);
        unsafe {
            (*bin).refc_inc();
            assert_eq!((*bin).refc(), 2);
            assert_eq!((*bin).refc_dectest(), 1);
            assert_eq!((*bin).refc_dectest(), 0);
            Binary::free(bin);
        }
    }

    #[test]
    fn test_node_entry_deref_frees_at_zero() {
        let node = NodeEntry::alloc(Term::make_atom(42), 1);
        unsafe {
            (*node).refc_inc();
            NodeEntry::deref(node);
            assert_eq!((*node).refc(), 1);
            NodeEntry::deref(node);
        }
    }

    #[test]
    fn test_offheap_cleanup_drops_each_once() {
        let mut oh = OffHeap::default();
        let bin = Binary::alloc(16);
        unsafe {
            (*bin).refc_inc(); // keep alive past cleanup
        }
        // Hand-build a one-node list on the Rust stack; cleanup only
        // follows links, it does not care where nodes live.
        let mut pb = ProcBin {
            header: super::super::make_header(PROC_BIN_WORDS - 1, super::super::REFC_BINARY_SUBTAG),
            size: 16,
            next: std::ptr::null_mut(),
            val: bin,
            bytes: unsafe { (*bin).orig_bytes() },
            flags: 0,
        };
        oh.mso = &mut pb;
        oh.cleanup();
        assert!(oh.is_empty());
        unsafe {
            assert_eq!((*bin).refc(), 1);
            assert_eq!((*bin).refc_dectest(), 0);
            Binary::free(bin);
        }
    }
}
