//! Term Model - Tagged Machine Words
//!
//! Every value the collector handles is a single machine word with a
//! two-bit primary tag:
//!
//! ```text
//! 64-bit Term Layout:
//! ┌──────────────────────────────────────────────┬──────┐
//! │                 Payload                      │ Tag  │
//! │                  63-2                        │ 1-0  │
//! └──────────────────────────────────────────────┴──────┘
//!
//! Primary Tags:
//! - 00 Header:    in-place object descriptor (subtag in bits 2-5,
//!                 arity in bits 6-63); only valid as the first word
//!                 of a boxed object
//! - 01 List:      pointer to a two-word cons cell
//! - 10 Boxed:     pointer to a header-tagged object
//! - 11 Immediate: small integer, atom, pid, ref, nil
//! ```
//!
//! Forwarding during collection reuses the tag space: a copied boxed
//! object has its header overwritten with the boxed-tagged address of
//! the new copy, so "first word is not a header" means "moved". A
//! copied cons cell stores the non-value sentinel in its first word
//! and the forwarded list term in its second.

pub mod objects;

pub use objects::{
    Binary, BinMatchState, ExternalThing, FunEntry, FunThing, NodeEntry, OffHeap, ProcBin,
};

/// Bytes per term word.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

const TAG_PRIMARY_MASK: usize = 0x3;
const TAG_PRIMARY_HEADER: usize = 0x0;
const TAG_PRIMARY_LIST: usize = 0x1;
const TAG_PRIMARY_BOXED: usize = 0x2;
const TAG_PRIMARY_IMMED: usize = 0x3;

const TAG_IMMED1_MASK: usize = 0xF;
const TAG_IMMED1_SIZE: usize = 4;
const TAG_IMMED1_SMALL: usize = 0x3;
const TAG_IMMED1_ATOM: usize = 0x7;
const TAG_IMMED1_PID: usize = 0xB;
const TAG_IMMED1_IMMED2: usize = 0xF;

const TAG_IMMED2_MASK: usize = 0x3F;
const TAG_IMMED2_SIZE: usize = 6;
const TAG_IMMED2_REF: usize = 0x0F;
const TAG_IMMED2_NIL: usize = 0x1F;

const HEADER_SUBTAG_MASK: usize = 0x3C;
const HEADER_ARITY_SHIFT: usize = 6;

/// Tuple header; the only transparent subtag (its payload is terms).
pub const ARITYVAL_SUBTAG: usize = 0x0 << 2;
/// Single-limb positive bignum.
pub const POS_BIG_SUBTAG: usize = 0x1 << 2;
/// Reference-counted binary (off-heap payload).
pub const REFC_BINARY_SUBTAG: usize = 0x4 << 2;
/// Binary with payload stored inline on the heap.
pub const HEAP_BINARY_SUBTAG: usize = 0x5 << 2;
/// Closure; environment terms follow the fixed fields.
pub const FUN_SUBTAG: usize = 0x6 << 2;
/// External identifier backed by a node-table entry.
pub const EXTERNAL_SUBTAG: usize = 0x7 << 2;
/// Binary match state; carries an interior `base` pointer.
pub const BIN_MATCHSTATE_SUBTAG: usize = 0x8 << 2;
const NON_VALUE_SUBTAG: usize = 0xF << 2;

/// The empty list.
pub const NIL: Term = Term(TAG_IMMED2_NIL);

/// The non-value sentinel. Header-tagged so the cons forwarding test
/// stays a single compare, but with a subtag no live object uses.
pub const NON_VALUE: Term = Term(NON_VALUE_SUBTAG);

/// Largest magnitude representable as a small integer.
pub const SMALL_MAX: isize = isize::MAX >> TAG_IMMED1_SIZE;
/// Most negative small integer.
pub const SMALL_MIN: isize = isize::MIN >> TAG_IMMED1_SIZE;

/// Primary tag of a term word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryTag {
    Header,
    List,
    Boxed,
    Immediate,
}

/// A tagged machine word
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term(pub usize);

impl Term {
    #[inline]
    pub fn primary_tag(self) -> PrimaryTag {
        match self.0 & TAG_PRIMARY_MASK {
            TAG_PRIMARY_HEADER => PrimaryTag::Header,
            TAG_PRIMARY_LIST => PrimaryTag::List,
            TAG_PRIMARY_BOXED => PrimaryTag::Boxed,
            _ => PrimaryTag::Immediate,
        }
    }

    #[inline]
    pub fn is_header(self) -> bool {
        self.0 & TAG_PRIMARY_MASK == TAG_PRIMARY_HEADER
    }

    #[inline]
    pub fn is_list(self) -> bool {
        self.0 & TAG_PRIMARY_MASK == TAG_PRIMARY_LIST
    }

    #[inline]
    pub fn is_boxed(self) -> bool {
        self.0 & TAG_PRIMARY_MASK == TAG_PRIMARY_BOXED
    }

    #[inline]
    pub fn is_immediate(self) -> bool {
        self.0 & TAG_PRIMARY_MASK == TAG_PRIMARY_IMMED
    }

    /// Terms the root scan must chase: boxed and list pointers.
    #[inline]
    pub fn is_not_immediate(self) -> bool {
        self.is_boxed() || self.is_list()
    }

    #[inline]
    pub fn is_non_value(self) -> bool {
        self.0 == NON_VALUE.0
    }

    #[inline]
    pub fn is_value(self) -> bool {
        self.0 != NON_VALUE.0
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == NIL.0
    }

    #[inline]
    pub fn is_small(self) -> bool {
        self.0 & TAG_IMMED1_MASK == TAG_IMMED1_SMALL
    }

    #[inline]
    pub fn is_atom(self) -> bool {
        self.0 & TAG_IMMED1_MASK == TAG_IMMED1_ATOM
    }

    #[inline]
    pub fn is_pid(self) -> bool {
        self.0 & TAG_IMMED1_MASK == TAG_IMMED1_PID
    }

    #[inline]
    pub fn is_ref(self) -> bool {
        self.0 & TAG_IMMED2_MASK == TAG_IMMED2_REF
    }

    #[inline]
    pub fn make_small(value: isize) -> Term {
        debug_assert!((SMALL_MIN..=SMALL_MAX).contains(&value));
        Term(((value << TAG_IMMED1_SIZE) as usize) | TAG_IMMED1_SMALL)
    }

    #[inline]
    pub fn small_value(self) -> isize {
        debug_assert!(self.is_small());
        (self.0 as isize) >> TAG_IMMED1_SIZE
    }

    #[inline]
    pub fn make_atom(index: usize) -> Term {
        Term((index << TAG_IMMED1_SIZE) | TAG_IMMED1_ATOM)
    }

    #[inline]
    pub fn atom_index(self) -> usize {
        debug_assert!(self.is_atom());
        self.0 >> TAG_IMMED1_SIZE
    }

    #[inline]
    pub fn make_pid(number: usize) -> Term {
        Term((number << TAG_IMMED1_SIZE) | TAG_IMMED1_PID)
    }

    #[inline]
    pub fn make_ref(number: usize) -> Term {
        Term((number << TAG_IMMED2_SIZE) | TAG_IMMED2_REF)
    }

    /// True if `value` can be stored as a small integer.
    #[inline]
    pub fn fits_small(value: usize) -> bool {
        value <= SMALL_MAX as usize
    }
}

// === Pointer extraction ===

#[inline]
pub fn make_boxed(ptr: *const Term) -> Term {
    debug_assert!(ptr as usize & TAG_PRIMARY_MASK == 0);
    Term(ptr as usize | TAG_PRIMARY_BOXED)
}

#[inline]
pub fn make_list(ptr: *const Term) -> Term {
    debug_assert!(ptr as usize & TAG_PRIMARY_MASK == 0);
    Term(ptr as usize | TAG_PRIMARY_LIST)
}

#[inline]
pub fn boxed_val(term: Term) -> *mut Term {
    debug_assert!(term.is_boxed());
    (term.0 & !TAG_PRIMARY_MASK) as *mut Term
}

#[inline]
pub fn list_val(term: Term) -> *mut Term {
    debug_assert!(term.is_list());
    (term.0 & !TAG_PRIMARY_MASK) as *mut Term
}

/// Stripped pointer of either a boxed or a list term.
#[inline]
pub fn ptr_val(term: Term) -> *mut Term {
    (term.0 & !TAG_PRIMARY_MASK) as *mut Term
}

/// Re-tag a pointer term whose target moved by `offs` words.
#[inline]
pub fn offset_ptr(term: Term, offs: isize) -> Term {
    Term((term.0 as isize + offs * WORD_SIZE as isize) as usize)
}

/// Forwarding test for boxed objects: a copied object's header slot
/// holds the boxed-tagged new address, so anything that is not a
/// header means the object has been moved. This must be the first
/// test on any target.
#[inline]
pub fn is_moved(first_word: Term) -> bool {
    !first_word.is_header()
}

// === Header decoding ===

#[inline]
pub fn make_header(arity: usize, subtag: usize) -> Term {
    Term((arity << HEADER_ARITY_SHIFT) | subtag)
}

#[inline]
pub fn make_arityval(arity: usize) -> Term {
    make_header(arity, ARITYVAL_SUBTAG)
}

/// Number of payload words following the header.
#[inline]
pub fn header_arity(header: Term) -> usize {
    debug_assert!(header.is_header());
    header.0 >> HEADER_ARITY_SHIFT
}

#[inline]
pub fn header_subtag(header: Term) -> usize {
    header.0 & HEADER_SUBTAG_MASK
}

/// Transparent headers (tuples) are followed by ordinary term words;
/// everything else is a "thing" whose payload must be skipped.
#[inline]
pub fn header_is_thing(header: Term) -> bool {
    header_subtag(header) != ARITYVAL_SUBTAG
}

#[inline]
pub fn header_is_bin_matchstate(header: Term) -> bool {
    header_subtag(header) == BIN_MATCHSTATE_SUBTAG
}

/// Number of words a boxed object occupies on the heap.
///
/// For most things this is arity + 1, but a closure's environment
/// lives past the fixed fields the arity describes.
///
/// # Safety
///
/// `ptr` must point at a live boxed object whose first word is
/// `header`.
#[inline]
pub unsafe fn boxed_size(ptr: *const Term, header: Term) -> usize {
    let mut nelts = header_arity(header);
    if header_subtag(header) == FUN_SUBTAG {
        nelts += unsafe { (*(ptr as *const FunThing)).num_free };
    }
    nelts + 1
}

/// Data pointer of a binary term (refc or heap binary).
///
/// # Safety
///
/// `term` must be a boxed reference to a live binary object.
pub unsafe fn binary_bytes(term: Term) -> *mut u8 {
    let ptr = boxed_val(term);
    let header = unsafe { *ptr };
    match header_subtag(header) {
        REFC_BINARY_SUBTAG => unsafe { (*(ptr as *mut ProcBin)).bytes },
        HEAP_BINARY_SUBTAG => unsafe { ptr.add(2) as *mut u8 },
        _ => unreachable!("binary_bytes on non-binary header"),
    }
}

/// Structural equality of two terms.
///
/// Immediates compare by word; lists and tuples recurse; binaries
/// compare by payload bytes; closures by entry and environment;
/// externals by node and id. Terms may live on different heaps.
///
/// Only used on quiescent heaps (no `MOVED` markers present).
pub fn structural_eq(a: Term, b: Term) -> bool {
    if a == b {
        return true;
    }
    match (a.primary_tag(), b.primary_tag()) {
        (PrimaryTag::Immediate, PrimaryTag::Immediate) => a == b,
        (PrimaryTag::List, PrimaryTag::List) => unsafe {
            let ap = list_val(a);
            let bp = list_val(b);
            structural_eq(*ap, *bp) && structural_eq(*ap.add(1), *bp.add(1))
        },
        (PrimaryTag::Boxed, PrimaryTag::Boxed) => unsafe { boxed_eq(boxed_val(a), boxed_val(b)) },
        _ => false,
    }
}

unsafe fn boxed_eq(ap: *mut Term, bp: *mut Term) -> bool {
    let ah = unsafe { *ap };
    let bh = unsafe { *bp };
    if header_subtag(ah) != header_subtag(bh) {
        // A refc and a heap binary with equal payloads still compare
        // equal, like any two binaries do.
        let both_bins = matches!(header_subtag(ah), REFC_BINARY_SUBTAG | HEAP_BINARY_SUBTAG)
            && matches!(header_subtag(bh), REFC_BINARY_SUBTAG | HEAP_BINARY_SUBTAG);
        if !both_bins {
            return false;
        }
    }
    unsafe {
        match header_subtag(ah) {
            ARITYVAL_SUBTAG => {
                let n = header_arity(ah);
                if n != header_arity(bh) {
                    return false;
                }
                (1..=n).all(|i| structural_eq(*ap.add(i), *bp.add(i)))
            }
            POS_BIG_SUBTAG => header_arity(bh) == 1 && *ap.add(1) == *bp.add(1),
            REFC_BINARY_SUBTAG | HEAP_BINARY_SUBTAG => binary_payload_eq(ap, bp),
            FUN_SUBTAG => {
                let af = ap as *const FunThing;
                let bf = bp as *const FunThing;
                if (*af).entry != (*bf).entry || (*af).num_free != (*bf).num_free {
                    return false;
                }
                let ae = FunThing::env_ptr(ap as *mut FunThing);
                let be = FunThing::env_ptr(bp as *mut FunThing);
                (0..(*af).num_free).all(|i| structural_eq(*ae.add(i), *be.add(i)))
            }
            EXTERNAL_SUBTAG => {
                let ae = ap as *const ExternalThing;
                let be = bp as *const ExternalThing;
                (*ae).node == (*be).node && (*ae).id == (*be).id
            }
            BIN_MATCHSTATE_SUBTAG => {
                let am = ap as *const BinMatchState;
                let bm = bp as *const BinMatchState;
                (*am).offset == (*bm).offset
                    && (*am).size == (*bm).size
                    && structural_eq((*am).orig, (*bm).orig)
            }
            _ => false,
        }
    }
}

unsafe fn binary_payload_eq(ap: *mut Term, bp: *mut Term) -> bool {
    unsafe {
        let asz = *ap.add(1);
        let bsz = *bp.add(1);
        if asz.0 != bsz.0 {
            return false;
        }
        let abytes = binary_bytes(make_boxed(ap));
        let bbytes = binary_bytes(make_boxed(bp));
        std::slice::from_raw_parts(abytes, asz.0) == std::slice::from_raw_parts(bbytes, bsz.0)
    }
}

/// Seam through which terms are written onto a word arena.
///
/// Implemented by the process (young heap) and by heap fragments, so
/// the same builders serve both destinations. Off-heap objects link
/// into the destination's off-heap lists as they are written.
pub trait TermBuilder {
    /// Reserve `need` words and return the write cursor.
    fn alloc(&mut self, need: usize) -> *mut Term;

    /// Off-heap bookkeeping of the destination arena.
    fn off_heap_mut(&mut self) -> &mut OffHeap;

    fn make_tuple(&mut self, elems: &[Term]) -> Term {
        let hp = self.alloc(elems.len() + 1);
        unsafe {
            *hp = make_arityval(elems.len());
            for (i, e) in elems.iter().enumerate() {
                *hp.add(i + 1) = *e;
            }
            make_boxed(hp)
        }
    }

    fn make_cons(&mut self, head: Term, tail: Term) -> Term {
        let hp = self.alloc(2);
        unsafe {
            *hp = head;
            *hp.add(1) = tail;
            make_list(hp)
        }
    }

    /// Proper list of `elems`, last cell pointing at nil.
    fn make_proper_list(&mut self, elems: &[Term]) -> Term {
        let mut tail = NIL;
        for e in elems.iter().rev() {
            tail = self.make_cons(*e, tail);
        }
        tail
    }

    /// Small integer, or a single-limb bignum when out of range.
    fn make_uint(&mut self, value: usize) -> Term {
        if Term::fits_small(value) {
            Term::make_small(value as isize)
        } else {
            let hp = self.alloc(2);
            unsafe {
                *hp = make_header(1, POS_BIG_SUBTAG);
                *hp.add(1) = Term(value);
                make_boxed(hp)
            }
        }
    }

    fn make_heap_binary(&mut self, data: &[u8]) -> Term {
        let data_words = data.len().div_ceil(WORD_SIZE);
        let hp = self.alloc(2 + data_words);
        unsafe {
            *hp = make_header(1 + data_words, HEAP_BINARY_SUBTAG);
            *hp.add(1) = Term(data.len());
            let dst = hp.add(2) as *mut u8;
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            make_boxed(hp)
        }
    }

    /// Reference-counted binary over an existing backing buffer.
    /// The caller transfers one reference to the new term.
    fn make_refc_binary_from(&mut self, bin: *mut Binary, size: usize) -> Term {
        let hp = self.alloc(objects::PROC_BIN_WORDS) as *mut ProcBin;
        let oh = self.off_heap_mut();
        unsafe {
            (*hp).header = make_header(objects::PROC_BIN_WORDS - 1, REFC_BINARY_SUBTAG);
            (*hp).size = size;
            (*hp).next = oh.mso;
            (*hp).val = bin;
            (*hp).bytes = (*bin).orig_bytes();
            (*hp).flags = 0;
            oh.mso = hp;
            oh.overhead += size / WORD_SIZE;
            make_boxed(hp as *mut Term)
        }
    }

    /// Fresh reference-counted binary holding a copy of `data`.
    fn make_refc_binary(&mut self, data: &[u8]) -> Term {
        let bin = Binary::alloc_from(data);
        self.make_refc_binary_from(bin, data.len())
    }

    /// Closure over `entry` capturing `env`.
    /// The caller transfers one reference to the fun entry.
    fn make_fun(&mut self, entry: *mut FunEntry, arity: usize, env: &[Term]) -> Term {
        let hp = self.alloc(objects::FUN_FIXED_WORDS + env.len()) as *mut FunThing;
        let oh = self.off_heap_mut();
        unsafe {
            (*hp).header = make_header(objects::FUN_FIXED_WORDS - 1, FUN_SUBTAG);
            (*hp).next = oh.funs;
            (*hp).entry = entry;
            (*hp).arity = arity;
            (*hp).num_free = env.len();
            let envp = FunThing::env_ptr(hp);
            for (i, e) in env.iter().enumerate() {
                *envp.add(i) = *e;
            }
            oh.funs = hp;
            make_boxed(hp as *mut Term)
        }
    }

    /// External identifier backed by `node`.
    /// The caller transfers one reference to the node entry.
    fn make_external(&mut self, node: *mut NodeEntry, id: usize) -> Term {
        let hp = self.alloc(objects::EXTERNAL_WORDS) as *mut ExternalThing;
        let oh = self.off_heap_mut();
        unsafe {
            (*hp).header = make_header(objects::EXTERNAL_WORDS - 1, EXTERNAL_SUBTAG);
            (*hp).next = oh.externals;
            (*hp).node = node;
            (*hp).id = id;
            oh.externals = hp;
            make_boxed(hp as *mut Term)
        }
    }

    /// Match state positioned at the start of binary `bin`.
    fn make_matchstate(&mut self, bin: Term) -> Term {
        let hp = self.alloc(objects::MATCHSTATE_WORDS) as *mut BinMatchState;
        unsafe {
            let size = (*boxed_val(bin).add(1)).0;
            (*hp).header = make_header(objects::MATCHSTATE_WORDS - 1, BIN_MATCHSTATE_SUBTAG);
            (*hp).orig = bin;
            (*hp).base = binary_bytes(bin);
            (*hp).offset = 0;
            (*hp).size = size * 8;
            make_boxed(hp as *mut Term)
        }
    }
}
