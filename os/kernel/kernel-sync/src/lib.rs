//! # Kernel synchronization primitives
//!
//! The kernel runs on a single processor, but interrupts can preempt any code
//! that has not masked them. Shared state is therefore protected by a
//! [`SpinLock`] combined with an [`IrqGuard`] that masks interrupts for the
//! duration of a critical section.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{HardwareInterrupts, InterruptControl, IrqGuard};
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
