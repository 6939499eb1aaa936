//! Collection Entry Points
//!
//! The public surface of the collector:
//!
//! - [`garbage_collect`]: guarantee `need` free words on the young
//!   heap, escalating minor to major as required. Never fails.
//! - [`gc_after_bif_call`]: collect after a BIF while protecting
//!   its live registers or its result.
//! - [`garbage_collect_hibernate`]: shrink-to-fit for a process
//!   that yields with a preserved continuation.
//! - [`garbage_collect_literals`]: rehome a literal range into a
//!   fresh old generation.
//! - [`heap_sizes_term`] / [`crate::stats::info`]: introspection.
//!
//! Every collection runs synchronously on the scheduler thread that
//! owns the process; the process status is flipped to `Garbing`
//! around it and a scheduler activity counter accounts for the time.

#[cfg(debug_assertions)]
pub(crate) mod debug;
pub(crate) mod frags;
pub(crate) mod major;
pub(crate) mod minor;
pub(crate) mod offheap;
pub mod offset;
pub(crate) mod resize;
pub(crate) mod rootset;
pub(crate) mod sweep;

mod hibernate;
mod literals;

pub use hibernate::garbage_collect_hibernate;
pub use literals::garbage_collect_literals;
pub use resize::{change_stack_size, grow_stack};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::heap::sizes;
use crate::logging::{log_event, CollectionKind, GcEvent};
use crate::process::{Freason, Process, Status, F_FORCE_GC, F_NEED_FULLSWEEP};
use crate::term::{Term, TermBuilder};

/// Schedulers currently inside a collection, for activity accounting.
static GC_ACTIVITY: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn activity_begin() {
    GC_ACTIVITY.fetch_add(1, Ordering::AcqRel);
}

pub(crate) fn activity_end() {
    GC_ACTIVITY.fetch_sub(1, Ordering::AcqRel);
}

/// Number of schedulers currently collecting.
pub fn gc_activity() -> usize {
    GC_ACTIVITY.load(Ordering::Acquire)
}

/// Garbage collect a process.
///
/// `need` is the number of words that must be free on the young heap
/// on return; `objv` holds live terms to preserve (and relocate) on
/// behalf of the caller. Returns the reduction-budget cost of the
/// collection.
pub fn garbage_collect(p: &mut Process, need: usize, objv: &mut [Term]) -> usize {
    unsafe { garbage_collect_raw(p, need, objv.as_mut_ptr(), objv.len()) }
}

/// Implementation of [`garbage_collect`] over a raw root array, for
/// callers whose registers live inside the process itself.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots.
pub(crate) unsafe fn garbage_collect_raw(
    p: &mut Process,
    need: usize,
    objv: *mut Term,
    nobj: usize,
) -> usize {
    let mut reclaimed_now: usize = 0;

    p.gcstatus = p.status;
    p.status = Status::Garbing;
    let monitor_start = if p.config.long_gc_threshold_ms > 0 {
        Some(Instant::now())
    } else {
        None
    };
    activity_begin();

    let started = Instant::now();

    #[cfg(debug_assertions)]
    debug::check_off_heap(p);
    p.quick_sanity_check();

    if p.gen_gcs >= p.max_gen_gcs {
        p.flags |= F_NEED_FULLSWEEP;
    }

    let mut kind = if p.flags & F_NEED_FULLSWEEP != 0 {
        CollectionKind::Major
    } else {
        CollectionKind::Minor
    };
    log_event(GcEvent::CollectionStart {
        pid: p.id,
        kind,
        need,
    });

    // Test which type of GC to do; a failed minor escalates.
    let mut done = false;
    while !done {
        if p.flags & F_NEED_FULLSWEEP != 0 {
            kind = CollectionKind::Major;
            done = unsafe { major::major_collection(p, need, objv, nobj, &mut reclaimed_now) };
        } else {
            done = unsafe { minor::minor_collection(p, need, objv, nobj, &mut reclaimed_now) };
            if !done {
                log::debug!("<{}> escalating to fullsweep", p.id);
                log_event(GcEvent::Escalated { pid: p.id });
            }
        }
    }

    // Finish.
    #[cfg(debug_assertions)]
    debug::check_off_heap(p);
    p.quick_sanity_check();

    p.status = p.gcstatus;
    activity_end();

    if let Some(t0) = monitor_start {
        if p.config.test_long_gc_sleep_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(p.config.test_long_gc_sleep_ms));
        }
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        if elapsed_ms > p.config.long_gc_threshold_ms {
            log::warn!("<{}> long gc: {} ms", p.id, elapsed_ms);
            log_event(GcEvent::LongGc {
                pid: p.id,
                duration_ms: elapsed_ms,
            });
        }
    }
    if p.config.large_heap_words > 0 {
        let size = p.heap_sz + p.old_heap_size();
        if size >= p.config.large_heap_words {
            log::warn!("<{}> large heap: {} words", p.id, size);
            log_event(GcEvent::LargeHeap {
                pid: p.id,
                heap_words: size,
            });
        }
    }

    crate::stats::record_collection(reclaimed_now);
    log_event(GcEvent::CollectionEnd {
        pid: p.id,
        kind,
        duration_us: started.elapsed().as_micros() as u64,
        reclaimed_words: reclaimed_now,
        heap_words: p.heap_sz,
    });

    p.flags &= !F_FORCE_GC;

    debug_assert!(p.heap_free() >= need);
    p.heap_used() / 10
}

/// Collect after a BIF call, protecting whatever is still live:
/// the saved registers of a trapping call, the caller's registers on
/// failure, or the single result term on success. Returns the
/// (possibly relocated) result and charges the cost to the process's
/// reduction budget.
pub fn gc_after_bif_call(p: &mut Process, result: Term, regs: &mut [Term]) -> Term {
    let cost;
    let result = if result.is_non_value() {
        if p.freason == Freason::Trap {
            let nobj = p.arity.min(crate::process::MAX_ARG_REGS);
            let objv = p.def_arg_reg.as_mut_ptr();
            cost = unsafe { garbage_collect_raw(p, 0, objv, nobj) };
        } else {
            cost = garbage_collect(p, 0, regs);
        }
        result
    } else {
        let mut val = [result];
        cost = garbage_collect(p, 0, &mut val);
        val[0]
    };
    p.reductions += cost;
    result
}

/// The permissible heap-size schedule as an on-heap list of
/// integers, largest last. Collects first when the process heap
/// cannot hold the list.
pub fn heap_sizes_term(p: &mut Process) -> Term {
    let table = sizes::heap_sizes();
    let mut need = 0;
    for &sz in table {
        need += 2;
        if !Term::fits_small(sz) {
            need += 2;
        }
    }
    if p.heap_free() < need {
        garbage_collect(p, need, &mut []);
    }

    let mut res = crate::term::NIL;
    for &sz in table.iter().rev() {
        let num = p.make_uint(sz);
        res = p.make_cons(num, res);
    }
    res
}
