//! Root-Set Construction
//!
//! Enumerates every term slot reachable without traversing the heap:
//! the stack slice, the dictionary backing array, the caller's live
//! registers, the single-term process fields, the fiber records, and
//! the inline (non-attached) message slots.
//!
//! Root arrays point straight into the owning structures; the
//! collector rewrites them in place.

use crate::process::Process;
use crate::term::Term;

/// Default root-array storage; larger root sets spill into a grown
/// heap allocation released by cleanup (dropping the set).
pub(crate) const ROOTSET_DEFAULT: usize = 32;

/// One contiguous vector of term slots.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Roots {
    pub v: *mut Term,
    pub sz: usize,
}

/// The full root set of one collection.
pub(crate) struct RootSet {
    pub roots: Vec<Roots>,
}

/// Build the root set.
///
/// `objv`/`nobj` is the caller-supplied live-register array used to
/// preserve BIF arguments across the collection.
///
/// # Safety
///
/// `objv` must point at `nobj` live term slots, and the process must
/// not be mutated (other than through the returned roots) while the
/// set is alive.
pub(crate) unsafe fn setup_rootset(p: &mut Process, objv: *mut Term, nobj: usize) -> RootSet {
    let mut roots: Vec<Roots> = Vec::with_capacity(ROOTSET_DEFAULT);

    roots.push(Roots {
        v: p.stack.top(),
        sz: p.stack.used(),
    });

    if let Some(dict) = p.dictionary.as_mut() {
        if !dict.data.is_empty() {
            roots.push(Roots {
                v: dict.data.as_mut_ptr(),
                sz: dict.data.len(),
            });
        }
    }

    if nobj > 0 {
        roots.push(Roots { v: objv, sz: nobj });
    }

    if p.seq_trace_token.is_not_immediate() {
        roots.push(Roots {
            v: std::ptr::addr_of_mut!(p.seq_trace_token),
            sz: 1,
        });
    }
    if p.group_leader.is_not_immediate() {
        roots.push(Roots {
            v: std::ptr::addr_of_mut!(p.group_leader),
            sz: 1,
        });
    }

    // The process may be collected while it is terminating; fvalue
    // holds the exit reason and ftrace the saved stack trace.
    if p.fvalue.is_not_immediate() {
        roots.push(Roots {
            v: std::ptr::addr_of_mut!(p.fvalue),
            sz: 1,
        });
    }
    if p.ftrace.is_not_immediate() {
        roots.push(Roots {
            v: std::ptr::addr_of_mut!(p.ftrace),
            sz: 1,
        });
    }

    // Fiber records share the heap and root their saved call triple.
    for mfa in p.fibers.mfa_arrays() {
        roots.push(Roots { v: mfa, sz: 3 });
    }

    // Inline messages live on the heap already; attached ones are in
    // their own fragments and are copied wholesale after the sweep.
    for msg in p.msg.iter_mut() {
        if msg.attached.is_none() {
            roots.push(Roots {
                v: msg.m.as_mut_ptr(),
                sz: 2,
            });
        }
    }

    RootSet { roots }
}
