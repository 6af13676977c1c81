//! # Page Faults
//!
//! Vector 14. The processor pushes an error code describing the access and
//! leaves the faulting linear address in `CR2`. The handler decodes both,
//! looks the address up in the active directory and, unless the
//! [`RecoveryPolicy`] takes the fault, hands a [`FaultReport`] to the
//! [`ProcessFaultReporter`], which does not return.
//!
//! The handler allocates nothing and never blocks: the memory manager is
//! only consulted if its lock is free, so a fault raised by code that holds
//! the lock is still reported (with [`MappingStatus::Unknown`]).

use crate::dispatch::{DispatchError, InterruptFrame, InterruptHandler, InterruptTable};
use bitfield_struct::bitfield;
use core::fmt::{self, Write};
use kernel_alloc::MemoryManager;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::SpinLock;
use kernel_vmem::Mmu;
use log::{debug, error};

pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Page-fault error code layout (i386).
///
/// Reference: Intel SDM Vol. 3A, §6.15 "Page-Fault Exception (#PF)".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = a reserved bit was set in a paging entry.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        if self.reserved_bit() {
            FaultKind::Reserved
        } else if self.present() {
            FaultKind::Permission
        } else {
            FaultKind::Unmapped
        }
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging entry"
        } else if !self.present() {
            "Non-present page (page not mapped)"
        } else if self.instruction_fetch() {
            "Instruction fetch from protected page"
        } else if self.write() {
            if self.user() {
                "User write to read-only or supervisor page"
            } else {
                "Kernel write to read-only page"
            }
        } else if self.user() {
            "User read of supervisor page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Cause of a page fault, as passed to [`ProcessFaultReporter::report_fatal`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Nothing is mapped at the address.
    Unmapped,
    /// The page is mapped but the access is not allowed.
    Permission,
    /// A paging entry on the walk has a reserved bit set.
    Reserved,
}

impl FaultKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped",
            Self::Permission => "permission",
            Self::Reserved => "reserved bit",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the active directory maps at the faulting address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MappingStatus {
    Mapped(PhysicalAddress),
    Unmapped,
    /// The memory manager was locked when the fault was taken.
    Unknown,
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapped(pa) => write!(f, "mapped to {pa}"),
            Self::Unmapped => f.write_str("not mapped"),
            Self::Unknown => f.write_str("mapping unknown"),
        }
    }
}

/// Everything known about one page fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub address: VirtualAddress,
    pub error: PageFaultError,
    pub mapping: MappingStatus,
    pub eip: u32,
}

impl FaultReport {
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        self.error.kind()
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.error;
        write!(
            f,
            "page fault at {} (eip {:#010x}): {} [P={} W={} U={} R={} I={}], {}",
            self.address,
            self.eip,
            e.explain(),
            u8::from(e.present()),
            u8::from(e.write()),
            u8::from(e.user()),
            u8::from(e.reserved_bit()),
            u8::from(e.instruction_fetch()),
            self.mapping,
        )
    }
}

/// Receives faults nobody recovers from. Decides whether the faulting
/// process or the whole system goes down, and never returns.
pub trait ProcessFaultReporter {
    fn report_fatal(&self, reason: FaultKind, message: &str) -> !;
}

/// Gets the first look at every fault.
pub trait RecoveryPolicy {
    /// Resolve the fault so the access can be retried. `false` leaves it fatal.
    fn recover(&self, report: &FaultReport) -> bool;
}

/// Every fault is fatal.
#[derive(Debug, Default, Copy, Clone)]
pub struct FatalOnly;

impl RecoveryPolicy for FatalOnly {
    fn recover(&self, _report: &FaultReport) -> bool {
        false
    }
}

/// The vector 14 handler object.
pub struct PageFaultHandler<'a, M: Mmu, R, P = FatalOnly> {
    mmu: M,
    memory: &'a SpinLock<MemoryManager<M>>,
    reporter: R,
    policy: P,
}

impl<'a, M: Mmu, R: ProcessFaultReporter> PageFaultHandler<'a, M, R> {
    /// `mmu` is used to read `CR2`; it must be the processor `memory` drives.
    pub const fn new(mmu: M, memory: &'a SpinLock<MemoryManager<M>>, reporter: R) -> Self {
        Self::with_policy(mmu, memory, reporter, FatalOnly)
    }
}

impl<'a, M: Mmu, R: ProcessFaultReporter, P: RecoveryPolicy> PageFaultHandler<'a, M, R, P> {
    pub const fn with_policy(
        mmu: M,
        memory: &'a SpinLock<MemoryManager<M>>,
        reporter: R,
        policy: P,
    ) -> Self {
        Self {
            mmu,
            memory,
            reporter,
            policy,
        }
    }

    /// Register this handler for [`PAGE_FAULT_VECTOR`].
    ///
    /// # Errors
    /// [`DispatchError::AlreadyRegistered`] if the vector is taken.
    pub fn install<'t>(&'t self, table: &mut InterruptTable<'t>) -> Result<(), DispatchError> {
        table.register(PAGE_FAULT_VECTOR, self)
    }

    /// Decode the fault the processor just raised.
    #[must_use]
    pub fn report(&self, frame: &InterruptFrame) -> FaultReport {
        let address = self.mmu.fault_address();
        let mapping = self
            .memory
            .try_lock()
            .map_or(MappingStatus::Unknown, |memory| {
                memory
                    .query_mapping(address)
                    .map_or(MappingStatus::Unmapped, MappingStatus::Mapped)
            });
        FaultReport {
            address,
            error: PageFaultError::from_bits(frame.error_code),
            mapping,
            eip: frame.eip,
        }
    }
}

impl<M: Mmu, R: ProcessFaultReporter, P: RecoveryPolicy> InterruptHandler
    for PageFaultHandler<'_, M, R, P>
{
    fn handle(&self, frame: &InterruptFrame) {
        let report = self.report(frame);
        if self.policy.recover(&report) {
            debug!("recovered {report}");
            return;
        }

        error!("{report}");
        let mut message = MessageBuffer::new();
        // a message cut short is still worth reporting
        let _ = write!(message, "{report}");
        self.reporter.report_fatal(report.kind(), message.as_str());
    }
}

/// Fixed-size text sink; output that does not fit is dropped.
struct MessageBuffer {
    bytes: [u8; Self::CAPACITY],
    len: usize,
}

impl MessageBuffer {
    const CAPACITY: usize = 256;

    const fn new() -> Self {
        Self {
            bytes: [0; Self::CAPACITY],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }
}

impl Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut n = s.len().min(Self::CAPACITY - self.len);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
