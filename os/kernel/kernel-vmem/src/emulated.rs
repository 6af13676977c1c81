//! # Emulated i386 MMU
//!
//! A software paging unit used to run the paging code on a host. It models:
//!
//! - physical RAM as one zeroed, 4 KiB-aligned allocation,
//! - `CR0.PG`/`CR0.WP`, `CR2` and `CR3`,
//! - the two-level walk with the user/supervisor and read/write checks of
//!   the combined PDE and PTE permissions,
//! - page-fault error codes shaped like the hardware ones,
//! - a TLB that keeps successful translations until `invlpg`, a `CR3` load
//!   or a paging mode change, so a missing invalidation shows up as a stale
//!   read,
//! - the interrupt flag.
//!
//! Accessed and dirty bits are not maintained.
//!
//! Kernel accesses made through [`Mmu::page_ptr`] that would fault on real
//! hardware panic instead.

extern crate alloc;

use crate::mmu::Mmu;
use crate::page_table::{PdEntry, PtEntry, split_indices};
use crate::FrameAlloc;
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::ptr::{self, NonNull};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr2::Cr2;
use kernel_registers::cr3::Cr3;
use kernel_sync::InterruptControl;

/// What an access does with the addressed byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// Privilege level of an access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Privilege {
    /// Ring 0.
    Supervisor,
    /// Ring 3.
    User,
}

/// A page fault raised by the emulated walk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fault {
    /// The faulting linear address, also written to `CR2`.
    pub address: VirtualAddress,
    /// Hardware-layout error code: `P`, `W/R`, `U/S`, `RSVD`, `I/D` in bits 0 to 4.
    pub error_code: u32,
}

#[derive(Debug, Copy, Clone)]
struct Translation {
    frame: PhysicalPage,
    writable: bool,
    user: bool,
}

/// Software i386 paging unit with its own RAM.
pub struct EmulatedMachine {
    ram: NonNull<u8>,
    layout: Layout,
    cr0: Cell<Cr0>,
    cr2: Cell<Cr2>,
    cr3: Cell<Cr3>,
    interrupts: Cell<bool>,
    tlb: RefCell<BTreeMap<u32, Translation>>,
    invalidations: Cell<u32>,
    flushes: Cell<u32>,
}

impl EmulatedMachine {
    /// A machine with `frames` frames of zeroed RAM starting at physical 0,
    /// paging disabled and interrupts enabled.
    ///
    /// # Panics
    /// If the RAM cannot be allocated.
    #[must_use]
    pub fn new(frames: u32) -> Self {
        assert!(frames > 0, "the machine needs some RAM");
        let bytes = frames as usize * PAGE_SIZE as usize;
        let layout = match Layout::from_size_align(bytes, PAGE_SIZE as usize) {
            Ok(layout) => layout,
            Err(e) => panic!("cannot describe {frames} frames of RAM: {e}"),
        };
        // Safety: the layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ram) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self {
            ram,
            layout,
            cr0: Cell::new(Cr0::protected_mode()),
            cr2: Cell::new(Cr2::default()),
            cr3: Cell::new(Cr3::new()),
            interrupts: Cell::new(true),
            tlb: RefCell::new(BTreeMap::new()),
            invalidations: Cell::new(0),
            flushes: Cell::new(0),
        }
    }

    /// Bytes of RAM.
    #[must_use]
    pub const fn ram_size(&self) -> usize {
        self.layout.size()
    }

    /// Set or clear `CR0.WP`. With it clear, supervisor writes ignore `RW`.
    pub fn set_write_protect(&self, on: bool) {
        self.cr0.set(self.cr0.get().with_wp_write_protect(on));
    }

    fn phys_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let offset = pa.as_u32() as usize;
        assert!(
            offset < self.ram_size(),
            "physical access at {pa:?} beyond {} bytes of RAM",
            self.ram_size()
        );
        // Safety: offset is inside the allocation.
        unsafe { self.ram.as_ptr().add(offset) }
    }

    /// # Panics
    /// If `pa` is not 4-byte aligned or lies outside RAM.
    #[must_use]
    pub fn read_phys_u32(&self, pa: PhysicalAddress) -> u32 {
        assert_eq!(pa.as_u32() % 4, 0, "unaligned physical read");
        // Safety: in bounds and aligned.
        unsafe { ptr::read_volatile(self.phys_ptr(pa).cast::<u32>()) }
    }

    /// # Panics
    /// If `pa` is not 4-byte aligned or lies outside RAM.
    pub fn write_phys_u32(&self, pa: PhysicalAddress, value: u32) {
        assert_eq!(pa.as_u32() % 4, 0, "unaligned physical write");
        // Safety: in bounds and aligned.
        unsafe { ptr::write_volatile(self.phys_ptr(pa).cast::<u32>(), value) }
    }

    /// The 1024 words of `frame`, read physically.
    #[must_use]
    pub fn frame_words(&self, frame: PhysicalPage) -> Vec<u32> {
        (0..1024)
            .map(|i| self.read_phys_u32(frame.base() + i * 4))
            .collect()
    }

    fn walk(&self, va: VirtualAddress) -> Option<Translation> {
        let (di, ti) = split_indices(va);
        let directory = self.cr3.get().directory();
        let pde = PdEntry::from_raw(self.read_phys_u32(directory.base() + u32::from(di.as_u16()) * 4));
        let table = pde.table()?;
        let pte = PtEntry::from_raw(self.read_phys_u32(table.base() + u32::from(ti.as_u16()) * 4));
        let (frame, flags) = pte.page()?;
        Some(Translation {
            frame,
            writable: pde.flags().writable() && flags.writable(),
            user: pde.is_user() && flags.user_access(),
        })
    }

    fn permits(&self, t: Translation, kind: AccessKind, privilege: Privilege) -> bool {
        let write = kind == AccessKind::Write;
        match privilege {
            Privilege::User => t.user && (!write || t.writable),
            Privilege::Supervisor => {
                !write || t.writable || !self.cr0.get().wp_write_protect()
            }
        }
    }

    fn fault(
        &self,
        va: VirtualAddress,
        present: bool,
        kind: AccessKind,
        privilege: Privilege,
    ) -> Fault {
        let error_code = u32::from(present)
            | (u32::from(kind == AccessKind::Write) << 1)
            | (u32::from(privilege == Privilege::User) << 2)
            | (u32::from(kind == AccessKind::Execute) << 4);
        self.cr2.set(Cr2::new(va));
        Fault {
            address: va,
            error_code,
        }
    }

    /// Translate an access the way the processor would.
    ///
    /// # Errors
    /// The [`Fault`] the processor would raise; `CR2` is updated.
    pub fn access(
        &self,
        va: VirtualAddress,
        kind: AccessKind,
        privilege: Privilege,
    ) -> Result<PhysicalAddress, Fault> {
        if !self.paging_enabled() {
            return Ok(PhysicalAddress::new(va.as_u32()));
        }

        let key = va.page().number();
        let cached = self.tlb.borrow().get(&key).copied();
        let translation = match cached {
            Some(t) if self.permits(t, kind, privilege) => t,
            _ => {
                // a permission miss re-walks, like the processor does
                self.tlb.borrow_mut().remove(&key);
                match self.walk(va) {
                    Some(t) if self.permits(t, kind, privilege) => {
                        self.tlb.borrow_mut().insert(key, t);
                        t
                    }
                    walked => return Err(self.fault(va, walked.is_some(), kind, privilege)),
                }
            }
        };
        Ok(translation.frame.join(va.offset()))
    }

    /// Load a word through the page tables.
    ///
    /// # Errors
    /// The page fault the load raises.
    pub fn load_u32(&self, va: VirtualAddress, privilege: Privilege) -> Result<u32, Fault> {
        let pa = self.access(va, AccessKind::Read, privilege)?;
        Ok(self.read_phys_u32(pa))
    }

    /// Store a word through the page tables.
    ///
    /// # Errors
    /// The page fault the store raises.
    pub fn store_u32(
        &self,
        va: VirtualAddress,
        value: u32,
        privilege: Privilege,
    ) -> Result<(), Fault> {
        let pa = self.access(va, AccessKind::Write, privilege)?;
        self.write_phys_u32(pa, value);
        Ok(())
    }

    /// Whether the TLB holds a translation of `page`.
    #[must_use]
    pub fn is_cached(&self, page: VirtualPage) -> bool {
        self.tlb.borrow().contains_key(&page.number())
    }

    /// Number of `invlpg` executed so far.
    #[must_use]
    pub fn invalidations(&self) -> u32 {
        self.invalidations.get()
    }

    /// Number of full TLB flushes (explicit or by `CR3` load) so far.
    #[must_use]
    pub fn tlb_flushes(&self) -> u32 {
        self.flushes.get()
    }

    fn clear_tlb(&self) {
        self.tlb.borrow_mut().clear();
        self.flushes.set(self.flushes.get() + 1);
    }
}

impl Drop for EmulatedMachine {
    fn drop(&mut self) {
        // Safety: allocated in `new` with the same layout.
        unsafe { dealloc(self.ram.as_ptr(), self.layout) }
    }
}

impl InterruptControl for EmulatedMachine {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn disable_interrupts(&self) {
        self.interrupts.set(false);
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }
}

impl Mmu for EmulatedMachine {
    /// # Panics
    /// If the kernel touches a page that is not mapped: a kernel page fault.
    fn page_ptr(&self, page: VirtualPage) -> *mut u8 {
        match self.access(page.base(), AccessKind::Write, Privilege::Supervisor) {
            Ok(pa) => self.phys_ptr(pa),
            Err(f) => panic!(
                "kernel page fault at {:?}, error code {:#x}",
                f.address, f.error_code
            ),
        }
    }

    fn paging_enabled(&self) -> bool {
        self.cr0.get().pg_paging()
    }

    fn active_directory(&self) -> PhysicalPage {
        self.cr3.get().directory()
    }

    unsafe fn load_directory(&self, directory: PhysicalPage) {
        self.cr3.set(Cr3::from_directory(directory));
        self.clear_tlb();
    }

    unsafe fn enable_paging(&self) {
        self.cr0.set(self.cr0.get().with_pg_paging(true));
        self.clear_tlb();
    }

    unsafe fn disable_paging(&self) {
        self.cr0.set(self.cr0.get().with_pg_paging(false));
        self.clear_tlb();
    }

    fn invalidate_page(&self, page: VirtualPage) {
        self.tlb.borrow_mut().remove(&page.number());
        self.invalidations.set(self.invalidations.get() + 1);
    }

    fn flush_tlb(&self) {
        self.clear_tlb();
    }

    fn fault_address(&self) -> VirtualAddress {
        self.cr2.get().fault_address()
    }
}

/// Bump frame source over a physical byte range, for building tables in tests.
#[derive(Debug)]
pub struct BumpFrames {
    next: u32,
    end: u32,
    allocated: u32,
}

impl BumpFrames {
    /// Hand out frames from `start` (rounded up to a page) up to `end`.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self {
            next: start.next_multiple_of(PAGE_SIZE),
            end,
            allocated: 0,
        }
    }

    #[must_use]
    pub const fn allocated(&self) -> u32 {
        self.allocated
    }
}

impl FrameAlloc for BumpFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        if self.next.checked_add(PAGE_SIZE)? > self.end {
            return None;
        }
        let frame = PhysicalPage::try_new(PhysicalAddress::new(self.next)).ok()?;
        self.next += PAGE_SIZE;
        self.allocated += 1;
        Some(frame)
    }
}
