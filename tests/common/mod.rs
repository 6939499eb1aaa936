//! Shared Test Fixtures
//!
//! Process spawning helpers and a Rust-side snapshot of term graphs
//! so liveness can be compared across collections without holding
//! raw heap pointers through them.

#![allow(dead_code)]

use sgc::term::{
    self, boxed_val, header_arity, header_subtag, list_val, BinMatchState, ExternalThing,
    FunThing, ProcBin,
};
use sgc::{GcConfig, Process, Term, TermBuilder};

/// Spawn with a specific minimum heap size (words).
pub fn spawn(min_heap: usize) -> Process {
    Process::spawn(1, GcConfig {
        min_heap_size: min_heap,
        ..Default::default()
    })
    .expect("spawn")
}

pub fn spawn_default() -> Process {
    Process::spawn(1, GcConfig::default()).expect("spawn")
}

/// Heap-independent copy of a term graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Small(isize),
    Atom(usize),
    Nil,
    Immediate(usize),
    Cons(Box<Snapshot>, Box<Snapshot>),
    Tuple(Vec<Snapshot>),
    Big(usize),
    Binary(Vec<u8>),
    Fun { index: usize, env: Vec<Snapshot> },
    External { id: usize },
    Match { offset: usize, orig: Box<Snapshot> },
}

/// Decode a term graph into owned Rust data.
pub fn snapshot(t: Term) -> Snapshot {
    if t.is_nil() {
        return Snapshot::Nil;
    }
    if t.is_small() {
        return Snapshot::Small(t.small_value());
    }
    if t.is_atom() {
        return Snapshot::Atom(t.atom_index());
    }
    if t.is_immediate() {
        return Snapshot::Immediate(t.0);
    }
    if t.is_list() {
        let cell = list_val(t);
        unsafe {
            return Snapshot::Cons(
                Box::new(snapshot(*cell)),
                Box::new(snapshot(*cell.add(1))),
            );
        }
    }
    assert!(t.is_boxed(), "undecodable term {:#x}", t.0);
    let ptr = boxed_val(t);
    unsafe {
        let header = *ptr;
        match header_subtag(header) {
            term::ARITYVAL_SUBTAG => {
                let n = header_arity(header);
                Snapshot::Tuple((1..=n).map(|i| snapshot(*ptr.add(i))).collect())
            }
            term::POS_BIG_SUBTAG => Snapshot::Big((*ptr.add(1)).0),
            term::REFC_BINARY_SUBTAG => {
                let pb = ptr as *const ProcBin;
                Snapshot::Binary(std::slice::from_raw_parts((*pb).bytes, (*pb).size).to_vec())
            }
            term::HEAP_BINARY_SUBTAG => {
                let size = (*ptr.add(1)).0;
                let bytes = ptr.add(2) as *const u8;
                Snapshot::Binary(std::slice::from_raw_parts(bytes, size).to_vec())
            }
            term::FUN_SUBTAG => {
                let f = ptr as *mut FunThing;
                let env = FunThing::env_ptr(f);
                Snapshot::Fun {
                    index: (*(*f).entry).index,
                    env: (0..(*f).num_free).map(|i| snapshot(*env.add(i))).collect(),
                }
            }
            term::EXTERNAL_SUBTAG => {
                let e = ptr as *const ExternalThing;
                Snapshot::External { id: (*e).id }
            }
            term::BIN_MATCHSTATE_SUBTAG => {
                let ms = ptr as *const BinMatchState;
                Snapshot::Match {
                    offset: (*ms).offset,
                    orig: Box::new(snapshot((*ms).orig)),
                }
            }
            other => panic!("undecodable header subtag {:#x}", other),
        }
    }
}

/// Build a proper list of `n` two-element tuples; occupies `5 * n`
/// heap words.
pub fn build_tuple_list(p: &mut Process, n: usize) -> Term {
    let mut l = sgc::NIL;
    for i in 0..n {
        let t = p.make_tuple(&[Term::make_small(i as isize), Term::make_small(-(i as isize))]);
        l = p.make_cons(t, l);
    }
    l
}

/// Whether `t`'s target lies inside the process's old generation.
pub fn in_old_heap(p: &Process, t: Term) -> bool {
    match p.old_heap_span() {
        Some((lo, hi)) => {
            let a = sgc::term::ptr_val(t) as usize;
            lo <= a && a < hi
        }
        None => false,
    }
}
