//! # Interrupt Dispatch and Page Faults
//!
//! - [`InterruptTable`]: one handler object per vector, with detection of
//!   unhandled vectors and of a vector interrupting its own handler.
//! - [`PageFaultHandler`]: the handler for vector 14. It decodes the error
//!   code, looks up the faulting address in the active directory and hands
//!   a fatal fault to a [`ProcessFaultReporter`].
//!
//! The assembly entry stubs and the IDT itself live with the boot code; they
//! build an [`InterruptFrame`] and call [`InterruptTable::dispatch`].

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod dispatch;
pub mod page_fault;

pub use dispatch::{DispatchError, InterruptFrame, InterruptHandler, InterruptTable};
pub use page_fault::{
    FatalOnly, FaultKind, FaultReport, MappingStatus, PAGE_FAULT_VECTOR, PageFaultError,
    PageFaultHandler, ProcessFaultReporter, RecoveryPolicy,
};
