//! # SGC - Per-Process Generational Garbage Collector
//!
//! SGC is the per-process copying collector of the Skein actor
//! runtime. Every process owns a private heap and is collected
//! independently on the scheduler thread running it. There is no
//! global stop-the-world phase, no read or write barrier, and no
//! cross-process reference to worry about. Heaps are private and
//! bounded, so pauses are short, predictable, and parallel across
//! actors.
//!
//! ## Overview
//!
//! - **Two generations per process**: fresh data lives on the young
//!   heap; data that survives a collection is promoted past the
//!   high-water mark into the old heap.
//! - **Cheney-style copying**: a two-pointer scan evacuates the
//!   transitive closure of the root set; forwarding markers make
//!   shared subterms and cycles terminate naturally.
//! - **Off-heap bookkeeping**: reference-counted binaries, closures,
//!   and external identifiers are tracked through linked lists
//!   threaded *inside* the on-heap objects and swept after every
//!   copy.
//! - **Heap fragments**: message payloads and BIF temporaries built
//!   off-heap are drained into the young heap by the next
//!   collection.
//! - **Specialised variants**: hibernation collects into an
//!   exact-fit heap; literal collection rehomes a literal range
//!   into a fresh old generation.
//! - **Fibers**: cooperatively scheduled coroutines share the
//!   process heap and root their saved call triples.
//!
//! ## Quick Start
//!
//! ```rust
//! use sgc::{collect, GcConfig, Process, Term, TermBuilder};
//!
//! fn main() -> Result<(), sgc::SgcError> {
//!     let mut p = Process::spawn(1, GcConfig::default())?;
//!
//!     // Build a graph and keep it reachable from the stack.
//!     let pair = p.make_tuple(&[Term::make_small(1), Term::make_small(2)]);
//!     let list = p.make_cons(pair, sgc::NIL);
//!     p.stack_push(list);
//!
//!     // Ask for 16 free words; the collector copies the live data
//!     // and guarantees the headroom.
//!     collect(&mut p, 16, &mut []);
//!     assert!(p.heap_free() >= 16);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Collection Data Flow
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌───────────────┐
//! │ Root-set   │ → │ Evacuator  │ → │ Off-heap list │
//! │ builder    │   │ (minor /   │   │ sweep         │
//! │            │   │  major)    │   │               │
//! └────────────┘   └────────────┘   └───────────────┘
//!        ↑               │                  │
//!   stack, dict,    heap-fragment      resize, update
//!   regs, fields,   drain (minor:      process heap
//!   messages,       integrated)        pointers
//!   fibers
//! ```
//!
//! ## Safety
//!
//! The collector manipulates raw word arenas and is `unsafe`
//! internally; the crate surface is safe under one discipline: terms
//! handed to a process's builders belong to that process, and raw
//! `Term` values must not be used across a collection unless they
//! were reachable from the root set (stack, dictionary, registers,
//! messages), in which case the collector rewrites them in place.
//!
//! ## Modules
//!
//! - [`term`]: tagged-word term model and on-heap object layouts
//! - [`heap`]: word arenas, the size schedule, heap fragments
//! - [`process`]: process state, stack, messages, fibers
//! - [`collect`]: the collector proper and its variants
//! - [`config`]: tuning knobs
//! - [`logging`]: structured GC events and monitor reports
//! - [`stats`]: global collection counters

pub mod collect;
pub mod config;
pub mod error;
pub mod heap;
pub mod logging;
pub mod process;
pub mod stats;
pub mod term;

pub use collect::{
    change_stack_size, garbage_collect as collect, garbage_collect_hibernate as collect_hibernate,
    garbage_collect_literals as collect_literals, gc_after_bif_call as after_bif, gc_activity,
    grow_stack, heap_sizes_term,
};
pub use config::{ConfigError, GcConfig};
pub use error::{Result, SgcError};
pub use heap::sizes::heap_sizes;
pub use process::fiber::FiberExit;
pub use process::{Freason, Process, Status};
pub use stats::{info, GcInfo};
pub use term::{structural_eq, Term, TermBuilder, NIL};

/// SGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_spawn_and_collect_roundtrip() {
        let mut p = Process::spawn(7, GcConfig::default()).unwrap();
        let t = p.make_tuple(&[Term::make_small(3), Term::make_small(4)]);
        p.stack_push(t);
        let cost = collect(&mut p, 8, &mut []);
        assert!(p.heap_free() >= 8);
        assert_eq!(cost, p.heap_used() / 10);
    }

    #[test]
    fn test_heap_sizes_exported() {
        let sizes = heap_sizes();
        assert_eq!(sizes[0], 34);
        assert!(sizes.len() > 100);
    }
}
