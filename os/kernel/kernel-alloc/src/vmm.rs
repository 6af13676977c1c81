//! # Memory Manager
//!
//! [`MemoryManager`] owns every piece of mutable memory state of the kernel:
//! the processor's paging unit, the frame allocator, the scratch window and
//! the kernel directory. Operations take it by reference; there are no
//! globals.
//!
//! ```text
//!  init ─► bump frames ─► boot directory ─► paging on ─► frame stack ─► memory map
//! ```
//!
//! After [`init`](MemoryManager::init) every kernel directory slot has a page
//! table, so kernel mappings never allocate tables and are visible in every
//! address space cloned later.

use crate::frame_alloc::{FrameAllocError, FrameAllocator};
use crate::scratch::ScratchWindow;
use crate::clone::AddressSpace;
use core::ops::Range;
use kernel_info::boot::MemoryMapEntry;
use kernel_info::memory::{KERNEL_HEAP_END, KERNEL_HEAP_START};
use kernel_memory_addresses::{
    AddressError, PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};
use kernel_sync::IrqGuard;
use kernel_vmem::bootstrap::{build_boot_directory, enable_translation};
use kernel_vmem::{ActivePageTables, DirectoryIndex, Mmu, PageEntryBits, PagingError, PtEntry};
use log::{debug, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error(transparent)]
    Frames(#[from] FrameAllocError),
    #[error(transparent)]
    Paging(#[from] PagingError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("every scratch window slot is in use")]
    ScratchExhausted,
    #[error("the address space is loaded in CR3")]
    AddressSpaceActive,
}

impl VmmError {
    /// Whether the operation failed for lack of physical frames, either for
    /// data or for a page table.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::Frames(FrameAllocError::OutOfMemory | FrameAllocError::Paging(PagingError::OutOfMemory))
                | Self::Paging(PagingError::OutOfMemory)
        )
    }
}

/// The kernel's virtual memory state.
pub struct MemoryManager<M: Mmu> {
    mmu: M,
    frames: FrameAllocator,
    scratch: ScratchWindow,
    kernel_directory: PhysicalPage,
}

/// Disjoint borrows of a [`MemoryManager`], so an [`IrqGuard`] on the MMU
/// can be held while frames and scratch slots change.
pub(crate) struct Parts<'a, M: Mmu> {
    pub mmu: &'a M,
    pub frames: &'a mut FrameAllocator,
    pub scratch: &'a mut ScratchWindow,
}

impl<M: Mmu> MemoryManager<M> {
    /// Bring up paging and the frame allocator.
    ///
    /// `kernel_end` is the first byte after the kernel image; everything from
    /// there to 4 MiB is used for boot structures before the memory map is
    /// read.
    ///
    /// # Errors
    /// Any failure here leaves the machine unusable; the caller halts.
    ///
    /// # Safety
    /// Paging must be off, and the executing kernel must live in the first
    /// 4 MiB of physical memory.
    pub unsafe fn init(
        mmu: M,
        kernel_end: PhysicalAddress,
        memory_map: &[MemoryMapEntry],
    ) -> Result<Self, VmmError> {
        let mut frames = FrameAllocator::bootstrap(kernel_end)?;
        let kernel_slots = DirectoryIndex::range(DirectoryIndex::KERNEL_FIRST, DirectoryIndex::DIRECTORY_WINDOW);
        let kernel_directory = build_boot_directory(&mmu, &mut frames.source(&mmu), kernel_slots)?;
        // Safety: guaranteed by the caller.
        unsafe { enable_translation(&mmu, kernel_directory)? };
        frames.enable_stack(&mmu)?;
        frames.seed_from_memory_map(&mmu, memory_map)?;

        info!("memory manager ready, kernel directory {kernel_directory:?}");
        Ok(Self {
            mmu,
            frames,
            scratch: ScratchWindow::new(),
            kernel_directory,
        })
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &M {
        &self.mmu
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    /// The directory built at boot. It is never destroyed.
    #[inline]
    #[must_use]
    pub const fn kernel_directory(&self) -> PhysicalPage {
        self.kernel_directory
    }

    /// The directory currently loaded.
    #[must_use]
    pub fn current_directory(&self) -> PhysicalPage {
        self.mmu.active_directory()
    }

    /// Virtual range reserved for the kernel heap. Its page tables exist, so
    /// mapping there only consumes data frames.
    #[must_use]
    pub const fn heap_range() -> Range<VirtualAddress> {
        VirtualAddress::new(KERNEL_HEAP_START)..VirtualAddress::new(KERNEL_HEAP_END)
    }

    pub(crate) fn parts(&mut self) -> Parts<'_, M> {
        Parts {
            mmu: &self.mmu,
            frames: &mut self.frames,
            scratch: &mut self.scratch,
        }
    }

    fn tables(&self) -> ActivePageTables<'_, M> {
        // Safety: paging is on since `init`, with recursive slots in every
        // directory we load; `&mut self` on the mutators serializes access.
        unsafe { ActivePageTables::new(&self.mmu) }
    }

    /// One unused frame.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] when physical memory is exhausted.
    pub fn allocate_frame(&mut self) -> Result<PhysicalPage, VmmError> {
        Ok(self.frames.allocate(&self.mmu)?)
    }

    /// Give `frame` back. It must not be free already nor mapped anywhere.
    ///
    /// # Errors
    /// See [`FrameAllocator::free`].
    pub fn free_frame(&mut self, frame: PhysicalPage) -> Result<(), VmmError> {
        Ok(self.frames.free(&self.mmu, frame)?)
    }

    /// Map the page at `va` to the frame at `pa` in the active directory,
    /// replacing any previous mapping.
    ///
    /// # Errors
    /// - [`AddressError::Unaligned`] if either address is not page aligned.
    /// - [`PagingError::RecursiveWindow`] for the recursive slots.
    /// - Out of memory if a page table was needed.
    pub fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let page = VirtualPage::try_new(va)?;
        let frame = PhysicalPage::try_new(pa)?;
        self.map_page(page, frame, flags)
    }

    /// [`map`](Self::map) for typed pages.
    ///
    /// # Errors
    /// As for [`map`](Self::map), minus alignment.
    pub fn map_page(
        &mut self,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        // Safety: see `tables`.
        let mut tables = unsafe { ActivePageTables::new(&self.mmu) };
        tables.map(&mut self.frames.source(&self.mmu), page, frame, flags)?;
        Ok(())
    }

    /// Remove the mapping at `va` and return its frame, which stays allocated.
    ///
    /// # Errors
    /// - [`AddressError::Unaligned`] if `va` is not page aligned.
    /// - [`PagingError::RecursiveWindow`] for the recursive slots.
    pub fn unmap(&mut self, va: VirtualAddress) -> Result<Option<PhysicalPage>, VmmError> {
        let page = VirtualPage::try_new(va)?;
        Ok(self.tables().unmap(page)?)
    }

    /// Where `va` translates to in the active directory.
    #[must_use]
    pub fn query_mapping(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.tables().query(va)
    }

    /// The raw table entry covering `va`, if its page table exists.
    #[must_use]
    pub fn page_entry(&self, va: VirtualAddress) -> Option<PtEntry> {
        self.tables().entry(va)
    }

    /// Load `space` into `CR3`.
    pub fn switch_address_space(&mut self, space: &AddressSpace) {
        self.load(space.directory());
    }

    /// Load the kernel directory into `CR3`.
    pub fn switch_to_kernel(&mut self) {
        self.load(self.kernel_directory);
    }

    fn load(&self, directory: PhysicalPage) {
        if self.mmu.active_directory() == directory {
            return;
        }
        // Safety: every directory we hand out shares the kernel tables and
        // the identity table, so the kernel stays mapped.
        unsafe { self.mmu.load_directory(directory) };
        debug!("switched to directory {directory:?}");
    }

    #[must_use]
    pub fn is_active(&self, space: &AddressSpace) -> bool {
        self.mmu.active_directory() == space.directory()
    }

    /// Map `pages` fresh, zeroed frames starting at `start`.
    ///
    /// On failure every page mapped by this call is unmapped and freed again.
    ///
    /// # Errors
    /// - [`AddressError::Unaligned`] if `start` is not page aligned.
    /// - [`AddressError::OutOfRange`] if the range wraps the address space.
    /// - Out of memory.
    pub fn map_anonymous(
        &mut self,
        start: VirtualAddress,
        pages: u32,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let first = VirtualPage::try_new(start)?;
        let end = u64::from(start.as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE);
        if end > 1 << 32 {
            return Err(AddressError::OutOfRange(end).into());
        }

        for n in 0..pages {
            let result = self.map_fresh(first, n, flags);
            if let Err(e) = result {
                warn!("anonymous mapping at {start:?} failed after {n} pages: {e}");
                self.release_pages(first, n);
                return Err(e);
            }
        }
        Ok(())
    }

    fn map_fresh(&mut self, first: VirtualPage, n: u32, flags: PageEntryBits) -> Result<(), VmmError> {
        let page = first.checked_add_pages(n).ok_or(AddressError::PageNumberOutOfRange(first.number()))?;
        let frame = self.parts().zeroed_frame()?;
        if let Err(e) = self.map_page(page, frame, flags) {
            self.free_frame(frame)?;
            return Err(e);
        }
        Ok(())
    }

    fn release_pages(&mut self, first: VirtualPage, count: u32) {
        for n in 0..count {
            let Some(page) = first.checked_add_pages(n) else {
                break;
            };
            let unmapped = self.tables().unmap(page);
            match unmapped {
                Ok(Some(frame)) => {
                    if let Err(e) = self.free_frame(frame) {
                        warn!("leaking {frame:?}: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("cannot unmap {page:?}: {e}"),
            }
        }
    }

    /// Unmap `pages` pages from `start` and free their frames. Returns the
    /// number of pages that were mapped.
    ///
    /// # Errors
    /// - [`AddressError::Unaligned`] if `start` is not page aligned.
    /// - [`PagingError::RecursiveWindow`] for the recursive slots.
    pub fn unmap_and_free(&mut self, start: VirtualAddress, pages: u32) -> Result<u32, VmmError> {
        let first = VirtualPage::try_new(start)?;
        let mut freed = 0;
        for n in 0..pages {
            let Some(page) = first.checked_add_pages(n) else {
                break;
            };
            let unmapped = self.tables().unmap(page)?;
            if let Some(frame) = unmapped {
                self.free_frame(frame)?;
                freed += 1;
            }
        }
        Ok(freed)
    }

    /// Run `f` on the contents of `frame`, mapped through the scratch window
    /// with interrupts disabled.
    ///
    /// # Errors
    /// [`VmmError::ScratchExhausted`] if no scratch slot is free.
    pub fn with_frame<R>(
        &mut self,
        frame: PhysicalPage,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, VmmError> {
        let mut parts = self.parts();
        let _irq = IrqGuard::new(parts.mmu);
        let slot = parts.scratch.map(parts.mmu, frame)?;
        // Safety: the slot is ours until unmapped below.
        let result = f(unsafe { slot.bytes(parts.mmu) });
        parts.scratch.unmap(parts.mmu, slot)?;
        Ok(result)
    }
}

impl<M: Mmu> Parts<'_, M> {
    pub fn allocate(&mut self) -> Result<PhysicalPage, VmmError> {
        Ok(self.frames.allocate(self.mmu)?)
    }

    pub fn free(&mut self, frame: PhysicalPage) -> Result<(), VmmError> {
        Ok(self.frames.free(self.mmu, frame)?)
    }

    /// A frame filled with zeroes. Freed again if it cannot be cleared.
    pub fn zeroed_frame(&mut self) -> Result<PhysicalPage, VmmError> {
        let _irq = IrqGuard::new(self.mmu);
        let frame = self.allocate()?;
        match self.scratch.map(self.mmu, frame) {
            Ok(slot) => {
                // Safety: mapped just now, unmapped below.
                unsafe { slot.bytes(self.mmu) }.fill(0);
                self.scratch.unmap(self.mmu, slot)?;
                Ok(frame)
            }
            Err(e) => {
                self.free(frame)?;
                Err(e)
            }
        }
    }

    /// Copy the contents of frame `from` into frame `to`.
    pub fn copy_frame(&mut self, from: PhysicalPage, to: PhysicalPage) -> Result<(), VmmError> {
        let _irq = IrqGuard::new(self.mmu);
        let src = self.scratch.map(self.mmu, from)?;
        let dst = self.scratch.map(self.mmu, to)?;
        // Safety: two distinct scratch pages, both mapped until unmapped below.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.mmu.page_ptr(src.page()).cast_const(),
                self.mmu.page_ptr(dst.page()),
                PAGE_SIZE as usize,
            );
        }
        self.scratch.unmap(self.mmu, dst)?;
        self.scratch.unmap(self.mmu, src)?;
        Ok(())
    }
}
