//! Fiber Queue
//!
//! Cooperatively scheduled coroutines sharing one process heap,
//! arranged in a doubly-linked list. The head fiber is the one
//! currently running; yielding rotates or promotes, exiting removes.
//! Every fiber's saved call triple is a GC root on equal footing
//! with the main stack.

use crate::error::{Result, SgcError};
use crate::term::Term;

use super::Process;

/// One fiber record.
pub struct Fiber {
    /// Internal-ref immediate identifying the fiber.
    pub id: Term,
    /// Saved `{module, function, args}`; rooted during collection.
    pub mfa: [Term; 3],
    prev: *mut Fiber,
    next: *mut Fiber,
}

/// Doubly-linked fiber list; the head is the running fiber.
pub struct FiberQueue {
    head: *mut Fiber,
    tail: *mut Fiber,
    count: usize,
}

impl Default for FiberQueue {
    fn default() -> Self {
        FiberQueue {
            head: std::ptr::null_mut(),
            tail: std::ptr::null_mut(),
            count: 0,
        }
    }
}

/// Outcome of a fiber exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberExit {
    /// The named non-head fiber was removed; its reason discarded.
    Removed,
    /// The head exited and the queue switched to this fiber.
    Switched(Term),
    /// The last fiber exited; the process terminates with this reason.
    ProcessExit(Term),
}

impl FiberQueue {
    pub fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn head_id(&self) -> Term {
        debug_assert!(!self.head.is_null());
        unsafe { (*self.head).id }
    }

    pub(crate) fn append(&mut self, id: Term, mfa: [Term; 3]) {
        let node = Box::into_raw(Box::new(Fiber {
            id,
            mfa,
            prev: self.tail,
            next: std::ptr::null_mut(),
        }));
        unsafe {
            if self.tail.is_null() {
                self.head = node;
            } else {
                (*self.tail).next = node;
            }
        }
        self.tail = node;
        self.count += 1;
    }

    fn find(&self, id: Term) -> *mut Fiber {
        let mut f = self.head;
        unsafe {
            while !f.is_null() {
                if (*f).id == id {
                    return f;
                }
                f = (*f).next;
            }
        }
        std::ptr::null_mut()
    }

    unsafe fn unlink(&mut self, f: *mut Fiber) {
        unsafe {
            if (*f).prev.is_null() {
                self.head = (*f).next;
            } else {
                (*(*f).prev).next = (*f).next;
            }
            if (*f).next.is_null() {
                self.tail = (*f).prev;
            } else {
                (*(*f).next).prev = (*f).prev;
            }
            (*f).prev = std::ptr::null_mut();
            (*f).next = std::ptr::null_mut();
            self.count -= 1;
        }
    }

    unsafe fn push_front(&mut self, f: *mut Fiber) {
        unsafe {
            (*f).next = self.head;
            if self.head.is_null() {
                self.tail = f;
            } else {
                (*self.head).prev = f;
            }
        }
        self.head = f;
        self.count += 1;
    }

    unsafe fn push_back(&mut self, f: *mut Fiber) {
        unsafe {
            (*f).prev = self.tail;
            if self.tail.is_null() {
                self.head = f;
            } else {
                (*self.tail).next = f;
            }
        }
        self.tail = f;
        self.count += 1;
    }

    /// Ids from head to tail.
    pub fn ids(&self) -> Vec<Term> {
        let mut out = Vec::with_capacity(self.count);
        let mut f = self.head;
        unsafe {
            while !f.is_null() {
                out.push((*f).id);
                f = (*f).next;
            }
        }
        out
    }

    /// Root arrays of every fiber's saved call triple.
    pub(crate) fn mfa_arrays(&mut self) -> Vec<*mut Term> {
        let mut out = Vec::with_capacity(self.count);
        let mut f = self.head;
        unsafe {
            while !f.is_null() {
                out.push((*f).mfa.as_mut_ptr());
                f = (*f).next;
            }
        }
        out
    }
}

impl Drop for FiberQueue {
    fn drop(&mut self) {
        let mut f = self.head;
        unsafe {
            while !f.is_null() {
                let next = (*f).next;
                drop(Box::from_raw(f));
                f = next;
            }
        }
    }
}

#[inline]
fn check_fiber_id(id: Term) -> Result<()> {
    if id.is_pid() || id.is_ref() {
        Ok(())
    } else {
        Err(SgcError::Badarg("fiber id must be a pid or ref".to_string()))
    }
}

impl Process {
    /// `fiber:create(Module, Function, Args)`: append a fiber at the
    /// tail and return its id.
    pub fn fiber_create(&mut self, module: Term, function: Term, args: Term) -> Term {
        let id = self.fresh_ref();
        self.fibers.append(id, [module, function, args]);
        id
    }

    /// `fiber:yield()`: rotate to the next runnable fiber. With a
    /// single fiber this is a no-op returning its id.
    pub fn fiber_yield(&mut self) -> Term {
        let q = &mut self.fibers;
        unsafe {
            let head = q.head;
            debug_assert!(!head.is_null());
            if (*head).next.is_null() {
                return (*head).id;
            }
            q.unlink(head);
            q.push_back(head);
            q.head_id()
        }
    }

    /// `fiber:yield(Id)`: promote the named fiber to the head.
    pub fn fiber_yield_to(&mut self, id: Term) -> Result<Term> {
        check_fiber_id(id)?;
        let f = self.fibers.find(id);
        if f.is_null() {
            return Err(SgcError::Badarg("no such fiber".to_string()));
        }
        unsafe {
            if f != self.fibers.head {
                self.fibers.unlink(f);
                self.fibers.push_front(f);
            }
        }
        Ok(self.fibers.head_id())
    }

    /// `fiber:exit(Reason)`: terminate the running fiber. Falls
    /// through to process exit when it is the only one.
    pub fn fiber_exit(&mut self, reason: Term) -> FiberExit {
        let q = &mut self.fibers;
        unsafe {
            let head = q.head;
            debug_assert!(!head.is_null());
            if (*head).next.is_null() {
                return FiberExit::ProcessExit(reason);
            }
            q.unlink(head);
            drop(Box::from_raw(head));
            FiberExit::Switched(q.head_id())
        }
    }

    /// `fiber:exit(Id, Reason)`: remove the named fiber. Exiting the
    /// head behaves like `fiber_exit`; a non-head fiber is removed
    /// and its reason silently discarded.
    pub fn fiber_exit_id(&mut self, id: Term, reason: Term) -> Result<FiberExit> {
        check_fiber_id(id)?;
        let f = self.fibers.find(id);
        if f.is_null() {
            return Err(SgcError::Badarg("no such fiber".to_string()));
        }
        if f == self.fibers.head {
            return Ok(self.fiber_exit(reason));
        }
        unsafe {
            self.fibers.unlink(f);
            drop(Box::from_raw(f));
        }
        Ok(FiberExit::Removed)
    }

    /// The `fibers()` introspection BIF: on-heap list of fiber ids,
    /// head first.
    pub fn fibers_term(&mut self) -> Term {
        let ids = self.fibers.ids();
        crate::term::TermBuilder::make_proper_list(self, &ids)
    }

    /// Id of the running fiber.
    pub fn current_fiber(&self) -> Term {
        self.fibers.head_id()
    }

    pub fn fiber_count(&self) -> usize {
        self.fibers.count()
    }
}
