//! # Kernel Memory Management
//!
//! Physical frames, the kernel's view of virtual memory and process
//! address spaces, on top of the paging primitives of `kernel_vmem`.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ MemoryManager (vmm)                          │
//! │   map / unmap / query, switch, heap helpers  │
//! │   clone / destroy address spaces (clone)     │
//! └──────┬──────────────────────┬────────────────┘
//!        │                      │
//! ┌──────▼────────────┐  ┌──────▼──────────────────┐
//! │ FrameAllocator    │  │ ScratchWindow           │
//! │ bump, then a free │  │ short-lived mappings of │
//! │ frame stack       │  │ arbitrary frames        │
//! └───────────────────┘  └─────────────────────────┘
//! ```
//!
//! ## Boot sequence
//!
//! 1. [`FrameAllocator::bootstrap`] hands out frames after the kernel image.
//! 2. The boot directory is built from those frames: identity map of the
//!    first 4 MiB, a page table for every kernel slot, the recursive slots.
//! 3. Paging is switched on.
//! 4. The frame allocator moves to its stack at `FRAME_STACK_START`.
//! 5. Every usable frame of the boot memory map is freed into the stack.
//!
//! [`MemoryManager::init`] runs all five steps.
//!
//! ## Concurrency
//!
//! There is one processor. Mutating operations take `&mut MemoryManager`;
//! anything that goes through the scratch window additionally runs under an
//! [`IrqGuard`](kernel_sync::IrqGuard), so an interrupt handler that only
//! queries mappings never sees a half-built directory.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod clone;
pub mod frame_alloc;
pub mod scratch;
pub mod vmm;

pub use clone::{AddressSpace, CloneMode, DestroyError};
pub use frame_alloc::{FrameAllocError, FrameAllocator};
pub use vmm::{MemoryManager, VmmError};
