//! # Active Page Tables
//!
//! Map, unmap and query pages of the directory currently loaded in `CR3`.
//! Every paging structure is reached through the [recursive windows](crate::recursive),
//! so no physical memory needs to be mapped for the walk.
//!
//! ## TLB discipline
//!
//! - After a PTE changes, the page is invalidated with `invlpg`.
//! - After a new page table is linked, its window page is invalidated before
//!   the table is zeroed through it.
//! - When an existing PDE gains `US`, every cached translation below it is
//!   stale, so the whole TLB is flushed.

use crate::mmu::Mmu;
use crate::page_table::{DirectoryIndex, PageTableView, PdEntry, PtEntry, split_indices};
use crate::recursive::{self, is_recursive_region};
use crate::{FrameAlloc, PageEntryBits, PagingError};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use log::trace;

/// Handle to the page tables of the active directory.
///
/// The handle borrows the [`Mmu`]; it holds no state of its own, so two
/// handles on the same processor see the same tables.
pub struct ActivePageTables<'m, M: Mmu + ?Sized> {
    mmu: &'m M,
}

impl<'m, M: Mmu + ?Sized> ActivePageTables<'m, M> {
    /// # Safety
    /// Paging must be enabled with a directory whose recursive slots are
    /// installed, and nothing else may modify the active tables while the
    /// handle performs an operation.
    #[inline]
    pub const unsafe fn new(mmu: &'m M) -> Self {
        Self { mmu }
    }

    #[inline]
    pub const fn mmu(&self) -> &'m M {
        self.mmu
    }

    /// Directory entry `i` of the active directory.
    #[must_use]
    pub fn directory_entry(&self, i: DirectoryIndex) -> PdEntry {
        // Safety: guaranteed by `new`.
        unsafe { recursive::active_directory(self.mmu) }.get(i)
    }

    fn table(&self, i: DirectoryIndex) -> Option<PageTableView<'m>> {
        if !self.directory_entry(i).is_present() {
            return None;
        }
        // Safety: slot `i` is present.
        Some(unsafe { recursive::active_table(self.mmu, i) })
    }

    /// Install or replace the mapping `page → frame`.
    ///
    /// A missing page table is allocated from `alloc`, zeroed and linked
    /// present and writable, with `US` when `flags` is a user mapping.
    ///
    /// # Errors
    /// - [`PagingError::RecursiveWindow`] for pages inside the recursive slots.
    /// - [`PagingError::OutOfMemory`] if a page table was needed and `alloc` is empty.
    pub fn map<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &mut A,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), PagingError> {
        if is_recursive_region(page.base()) {
            return Err(PagingError::RecursiveWindow(page));
        }

        let (di, ti) = split_indices(page.base());
        let user = flags.user_access();
        // Safety: guaranteed by `new`.
        let mut dir = unsafe { recursive::active_directory(self.mmu) };
        let pde = dir.get(di);

        if !pde.is_present() {
            let table = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
            let link = PageEntryBits::kernel_rw().with_user_access(user);
            dir.set(di, PdEntry::make(table, link));
            self.mmu.invalidate_page(recursive::table_window(di));
            // Safety: slot `di` was just linked.
            unsafe { recursive::active_table(self.mmu, di) }.zero();
            trace!("new page table {table:?} for directory slot {}", di.as_usize());
        } else if user && !pde.is_user() {
            dir.set(di, pde.with_user_access());
            self.mmu.flush_tlb();
            trace!("directory slot {} opened to user mode", di.as_usize());
        }

        // Safety: slot `di` is present.
        let mut table = unsafe { recursive::active_table(self.mmu, di) };
        table.set(ti, PtEntry::make(frame, flags));
        self.mmu.invalidate_page(page);
        Ok(())
    }

    /// Remove the mapping of `page` and return the frame it pointed at.
    ///
    /// The frame is not freed. Unmapping an unmapped page is a no-op that
    /// returns `None`.
    ///
    /// # Errors
    /// [`PagingError::RecursiveWindow`] for pages inside the recursive slots.
    pub fn unmap(&mut self, page: VirtualPage) -> Result<Option<PhysicalPage>, PagingError> {
        if is_recursive_region(page.base()) {
            return Err(PagingError::RecursiveWindow(page));
        }

        let (di, ti) = split_indices(page.base());
        let Some(mut table) = self.table(di) else {
            return Ok(None);
        };
        let Some((frame, _)) = table.get(ti).page() else {
            return Ok(None);
        };
        table.set(ti, PtEntry::zero());
        self.mmu.invalidate_page(page);
        Ok(Some(frame))
    }

    /// The physical address `va` translates to, or `None` if the page table
    /// or the entry is absent. Reads only.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (frame, _) = self.entry(va)?.page()?;
        Some(frame.join(va.offset()))
    }

    /// The raw table entry for `va`, present or not, if its page table exists.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PtEntry> {
        let (di, ti) = split_indices(va);
        Some(self.table(di)?.get(ti))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{build_boot_directory, enable_translation};
    use crate::emulated::{AccessKind, BumpFrames, EmulatedMachine, Privilege};
    use crate::NoFrames;

    fn frame(n: u32) -> PhysicalPage {
        PhysicalPage::from_number(n).unwrap()
    }

    fn page(va: u32) -> VirtualPage {
        VirtualPage::try_new(VirtualAddress::new(va)).unwrap()
    }

    fn booted() -> (EmulatedMachine, BumpFrames) {
        let m = EmulatedMachine::new(1024);
        let mut frames = BumpFrames::new(0x10_0000, 0x40_0000);
        let dir = build_boot_directory(&m, &mut frames, core::iter::empty()).unwrap();
        unsafe { enable_translation(&m, dir).unwrap() };
        (m, frames)
    }

    #[test]
    fn map_query_unmap() {
        let (m, mut frames) = booted();
        let mut pt = unsafe { ActivePageTables::new(&m) };

        pt.map(&mut frames, page(0x0800_0000), frame(0x200), PageEntryBits::user_rw())
            .unwrap();
        assert_eq!(
            pt.query(VirtualAddress::new(0x0800_0123)),
            Some(PhysicalAddress::new(0x0020_0123))
        );
        assert_eq!(pt.unmap(page(0x0800_0000)).unwrap(), Some(frame(0x200)));
        assert_eq!(pt.query(VirtualAddress::new(0x0800_0000)), None);
        assert_eq!(pt.unmap(page(0x0800_0000)).unwrap(), None);
        // the table stays, the entry is gone
        assert_eq!(pt.entry(VirtualAddress::new(0x0800_0000)), Some(PtEntry::zero()));
        assert_eq!(pt.entry(VirtualAddress::new(0x0C00_0000)), None);
    }

    #[test]
    fn new_user_table_gets_a_user_pde() {
        let (m, mut frames) = booted();
        let mut pt = unsafe { ActivePageTables::new(&m) };
        pt.map(&mut frames, page(0x0040_0000), frame(0x300), PageEntryBits::user_ro())
            .unwrap();
        let pde = pt.directory_entry(DirectoryIndex::new(1).unwrap());
        assert!(pde.is_user());
        assert!(pde.flags().writable());

        assert!(m.access(VirtualAddress::new(0x0040_0010), AccessKind::Read, Privilege::User).is_ok());
        assert!(m.access(VirtualAddress::new(0x0040_0010), AccessKind::Write, Privilege::User).is_err());
    }

    #[test]
    fn user_mapping_upgrades_a_kernel_pde() {
        let (m, mut frames) = booted();
        let mut pt = unsafe { ActivePageTables::new(&m) };
        pt.map(&mut frames, page(0x0080_0000), frame(0x300), PageEntryBits::kernel_rw())
            .unwrap();
        assert!(m.access(VirtualAddress::new(0x0080_0000), AccessKind::Read, Privilege::User).is_err());

        let flushes = m.tlb_flushes();
        pt.map(&mut frames, page(0x0080_1000), frame(0x301), PageEntryBits::user_rw())
            .unwrap();
        assert!(pt.directory_entry(DirectoryIndex::new(2).unwrap()).is_user());
        assert_eq!(m.tlb_flushes(), flushes + 1);
        assert!(m.access(VirtualAddress::new(0x0080_1000), AccessKind::Write, Privilege::User).is_ok());
        // the supervisor page in the same table stays supervisor-only
        assert!(m.access(VirtualAddress::new(0x0080_0000), AccessKind::Read, Privilege::User).is_err());
    }

    #[test]
    fn remap_overwrites_and_invalidates() {
        let (m, mut frames) = booted();
        let mut pt = unsafe { ActivePageTables::new(&m) };
        let va = VirtualAddress::new(0x0100_0000);
        pt.map(&mut frames, va.page(), frame(0x200), PageEntryBits::kernel_rw()).unwrap();
        m.store_u32(va, 0xAAAA_5555, Privilege::Supervisor).unwrap();

        pt.map(&mut frames, va.page(), frame(0x201), PageEntryBits::kernel_rw()).unwrap();
        m.store_u32(va, 0x1234_5678, Privilege::Supervisor).unwrap();
        assert_eq!(m.read_phys_u32(PhysicalAddress::new(0x0020_0000)), 0xAAAA_5555);
        assert_eq!(m.read_phys_u32(PhysicalAddress::new(0x0020_1000)), 0x1234_5678);
    }

    #[test]
    fn recursive_region_is_rejected() {
        let (m, _) = booted();
        let mut pt = unsafe { ActivePageTables::new(&m) };
        let p = page(0xFFBF_F000);
        assert_eq!(
            pt.map(&mut NoFrames, p, frame(1), PageEntryBits::kernel_rw()),
            Err(PagingError::RecursiveWindow(p))
        );
        assert_eq!(pt.unmap(p), Err(PagingError::RecursiveWindow(p)));
    }

    #[test]
    fn missing_table_without_frames_is_out_of_memory() {
        let (m, _) = booted();
        let mut pt = unsafe { ActivePageTables::new(&m) };
        assert_eq!(
            pt.map(&mut NoFrames, page(0x1000_0000), frame(1), PageEntryBits::kernel_rw()),
            Err(PagingError::OutOfMemory)
        );
    }

    #[test]
    fn query_walks_the_recursive_region_too() {
        let (m, _) = booted();
        let pt = unsafe { ActivePageTables::new(&m) };
        let dir = m.active_directory();
        assert_eq!(
            pt.query(VirtualAddress::new(0xFFFF_F000)),
            Some(dir.base())
        );
        let identity = pt
            .directory_entry(DirectoryIndex::IDENTITY)
            .table()
            .unwrap();
        assert_eq!(
            pt.query(VirtualAddress::new(0xFFC0_0004)),
            Some(PhysicalAddress::new(identity.base().as_u32() + 4))
        );
        assert_eq!(
            pt.entry(VirtualAddress::new(0x0000_5000)).unwrap().page().unwrap().0,
            frame(5)
        );
    }
}
