//! Per-thread reentrancy guard for the collection path.
//!
//! Converting a captured argument to text may run instrumented code again on
//! the same thread (a `toString()` that takes arguments, an instrumented
//! codec). Those nested calls must not be recorded.

use std::cell::Cell;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Claims the current thread for collection. Returns `false` without touching
/// the depth if the thread is already collecting.
pub fn enter() -> bool {
    DEPTH.with(|depth| {
        if depth.get() > 0 {
            return false;
        }
        depth.set(1);
        true
    })
}

/// Releases one successful [`enter`].
pub fn exit() {
    DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
}

pub fn depth() -> u32 {
    DEPTH.with(Cell::get)
}

/// Scope form of [`enter`]/[`exit`]; dropping it releases the thread, also
/// during unwinding.
#[must_use = "the thread is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReentrancyGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ReentrancyGuard {
    pub fn enter() -> Option<Self> {
        enter().then(|| Self { _not_send: std::marker::PhantomData })
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        exit();
    }
}
