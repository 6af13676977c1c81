//! # Interrupt Dispatch
//!
//! The entry stubs push the vector number, the error code (or zero) and the
//! processor's return frame, then call [`InterruptTable::dispatch`]. The
//! table looks up the handler object registered for the vector and runs it.
//!
//! A vector whose handler is still running is refused instead of entered a
//! second time: a fault raised by the page fault handler itself would
//! otherwise recurse until the stack overflows.

use core::sync::atomic::{AtomicBool, Ordering};
use log::{trace, warn};

/// Number of IDT vectors.
pub const VECTORS: usize = 256;

/// What the entry stub saved for one interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InterruptFrame {
    pub vector: u8,
    /// Error code pushed by the processor; zero for vectors without one.
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl InterruptFrame {
    /// Frame of an interrupt that carries an error code.
    #[must_use]
    pub const fn with_error(vector: u8, error_code: u32, eip: u32, cs: u32) -> Self {
        Self {
            vector,
            error_code,
            eip,
            cs,
            eflags: 0x202,
        }
    }

    /// Whether the interrupted code ran in ring 3.
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 0b11 == 0b11
    }
}

/// A handler object for one vector.
pub trait InterruptHandler {
    /// Handle the interrupt described by `frame`. Runs with interrupts
    /// disabled; returning resumes the interrupted code.
    fn handle(&self, frame: &InterruptFrame);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler for vector {0}")]
    Unhandled(u8),
    #[error("vector {0} raised while its handler was running")]
    Reentered(u8),
    #[error("vector {0} already has a handler")]
    AlreadyRegistered(u8),
}

/// Handler objects indexed by vector.
pub struct InterruptTable<'h> {
    handlers: [Option<&'h dyn InterruptHandler>; VECTORS],
    active: [AtomicBool; VECTORS],
}

impl Default for InterruptTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> InterruptTable<'h> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handlers: [None; VECTORS],
            active: [const { AtomicBool::new(false) }; VECTORS],
        }
    }

    /// Install `handler` for `vector`.
    ///
    /// # Errors
    /// [`DispatchError::AlreadyRegistered`] if the vector is taken.
    pub fn register(
        &mut self,
        vector: u8,
        handler: &'h dyn InterruptHandler,
    ) -> Result<(), DispatchError> {
        let slot = &mut self.handlers[usize::from(vector)];
        if slot.is_some() {
            return Err(DispatchError::AlreadyRegistered(vector));
        }
        *slot = Some(handler);
        trace!("registered handler for vector {vector}");
        Ok(())
    }

    /// Remove and return the handler for `vector`.
    pub fn unregister(&mut self, vector: u8) -> Option<&'h dyn InterruptHandler> {
        self.handlers[usize::from(vector)].take()
    }

    #[must_use]
    pub fn is_registered(&self, vector: u8) -> bool {
        self.handlers[usize::from(vector)].is_some()
    }

    /// Whether the handler for `vector` is running right now.
    #[must_use]
    pub fn is_active(&self, vector: u8) -> bool {
        self.active[usize::from(vector)].load(Ordering::Relaxed)
    }

    /// Run the handler registered for `frame.vector`.
    ///
    /// # Errors
    /// - [`DispatchError::Unhandled`] if nothing is registered.
    /// - [`DispatchError::Reentered`] if the vector's handler is already
    ///   running further up the stack.
    pub fn dispatch(&self, frame: &InterruptFrame) -> Result<(), DispatchError> {
        let vector = frame.vector;
        let Some(handler) = self.handlers[usize::from(vector)] else {
            warn!("unhandled interrupt {vector} at eip {:#010x}", frame.eip);
            return Err(DispatchError::Unhandled(vector));
        };

        let active = &self.active[usize::from(vector)];
        if active.swap(true, Ordering::Acquire) {
            warn!("vector {vector} reentered at eip {:#010x}", frame.eip);
            return Err(DispatchError::Reentered(vector));
        }
        let _running = Running(active);
        handler.handle(frame);
        Ok(())
    }
}

/// Clears the active flag when the handler returns or unwinds.
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, OnceCell};

    #[derive(Default)]
    struct Counter {
        calls: Cell<u32>,
        last_error: Cell<u32>,
    }

    impl InterruptHandler for Counter {
        fn handle(&self, frame: &InterruptFrame) {
            self.calls.set(self.calls.get() + 1);
            self.last_error.set(frame.error_code);
        }
    }

    /// Raises its own vector again from inside the handler.
    struct Nested<'a> {
        table: OnceCell<&'a InterruptTable<'a>>,
        inner: Cell<Option<Result<(), DispatchError>>>,
    }

    impl InterruptHandler for Nested<'_> {
        fn handle(&self, frame: &InterruptFrame) {
            if let Some(table) = self.table.get() {
                self.inner.set(Some(table.dispatch(frame)));
            }
        }
    }

    #[test]
    fn dispatches_to_the_registered_handler() {
        let counter = Counter::default();
        let mut table = InterruptTable::new();
        table.register(14, &counter).unwrap();
        assert!(table.is_registered(14));

        table
            .dispatch(&InterruptFrame::with_error(14, 0b110, 0x1000, 0x1B))
            .unwrap();
        assert_eq!(counter.calls.get(), 1);
        assert_eq!(counter.last_error.get(), 0b110);
        assert!(!table.is_active(14));
    }

    #[test]
    fn one_handler_per_vector() {
        let a = Counter::default();
        let b = Counter::default();
        let mut table = InterruptTable::new();
        table.register(32, &a).unwrap();
        assert_eq!(table.register(32, &b), Err(DispatchError::AlreadyRegistered(32)));

        assert!(table.unregister(32).is_some());
        table.register(32, &b).unwrap();
        table.dispatch(&InterruptFrame::with_error(32, 0, 0, 0x08)).unwrap();
        assert_eq!((a.calls.get(), b.calls.get()), (0, 1));
    }

    #[test]
    fn unhandled_vectors_are_reported() {
        let table = InterruptTable::new();
        assert_eq!(
            table.dispatch(&InterruptFrame::with_error(3, 0, 0, 0x08)),
            Err(DispatchError::Unhandled(3))
        );
    }

    #[test]
    fn a_running_vector_is_not_entered_again() {
        let nested = Nested {
            table: OnceCell::new(),
            inner: Cell::new(None),
        };
        let mut table = InterruptTable::new();
        table.register(14, &nested).unwrap();
        let _ = nested.table.set(&table);

        let frame = InterruptFrame::with_error(14, 0, 0xC010_0000, 0x08);
        assert_eq!(table.dispatch(&frame), Ok(()));
        assert_eq!(nested.inner.get(), Some(Err(DispatchError::Reentered(14))));
        // and the vector is usable again afterwards
        assert!(!table.is_active(14));
        assert_eq!(table.dispatch(&frame), Ok(()));
    }

    #[test]
    fn ring_is_taken_from_cs() {
        assert!(InterruptFrame::with_error(14, 0, 0, 0x1B).from_user());
        assert!(!InterruptFrame::with_error(14, 0, 0, 0x08).from_user());
    }
}
