//! Heap Memory - Word Arenas on the Global Allocator
//!
//! The collector assumes nothing about the allocator beyond the
//! allocate/realloc/free contract; heaps, stacks, and fragments are
//! plain word arrays obtained here. Allocation failure aborts the
//! runtime; a process with no heap cannot run and cannot fail
//! gracefully either.

pub mod fragment;
pub mod sizes;

use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};

use crate::term::Term;

#[inline]
fn words_layout(words: usize) -> Layout {
    Layout::array::<usize>(words).expect("heap layout overflow")
}

/// Allocate an uninitialized arena of `words` words.
///
/// # Safety
///
/// The returned block must be released with [`free_words`] (or grown
/// with [`realloc_words`]) using the same word count.
pub unsafe fn alloc_words(words: usize) -> *mut Term {
    debug_assert!(words > 0);
    let layout = words_layout(words);
    let p = unsafe { alloc(layout) } as *mut Term;
    if p.is_null() {
        handle_alloc_error(layout);
    }
    p
}

/// Resize an arena, possibly moving it. Contents up to
/// `min(old_words, new_words)` are preserved.
///
/// # Safety
///
/// `ptr` must come from [`alloc_words`]/[`realloc_words`] with
/// exactly `old_words` words.
pub unsafe fn realloc_words(ptr: *mut Term, old_words: usize, new_words: usize) -> *mut Term {
    debug_assert!(new_words > 0);
    let old_layout = words_layout(old_words);
    let p = unsafe { realloc(ptr as *mut u8, old_layout, new_words * std::mem::size_of::<usize>()) }
        as *mut Term;
    if p.is_null() {
        handle_alloc_error(words_layout(new_words));
    }
    p
}

/// Release an arena.
///
/// # Safety
///
/// `ptr` must come from [`alloc_words`]/[`realloc_words`] with
/// exactly `words` words, and must not be used afterwards.
pub unsafe fn free_words(ptr: *mut Term, words: usize) {
    unsafe { dealloc(ptr as *mut u8, words_layout(words)) }
}
