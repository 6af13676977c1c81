//! # Typed i386 Control Registers
//!
//! Bitfield models of the control registers the paging code touches:
//!
//! * [`cr0::Cr0`]: paging enable (PG) and supervisor write protection (WP)
//! * [`cr2::Cr2`]: linear address of the last page fault
//! * [`cr3::Cr3`]: physical base of the active page directory
//!
//! The values are plain data and usable anywhere, e.g. by a software MMU.
//! Reading and writing the real registers requires the `asm` feature and a
//! 32-bit x86 target.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
