//! # Physical Frame Allocator
//!
//! Two phases:
//!
//! 1. **Bump.** Before paging, frames are handed out from a cursor that starts
//!    at the end of the kernel image and never moves back. Every such frame
//!    lies in the identity-mapped first 4 MiB.
//! 2. **Stack.** Once paging is on, [`FrameAllocator::enable_stack`] maps one
//!    page at [`FRAME_STACK_START`] and free frames are kept there as a stack
//!    of `u32` addresses. The bump cursor at that moment becomes the floor:
//!    frames below it back the kernel and boot structures and are never
//!    recycled.
//!
//! The stack grows by itself: when it is full, the frame being freed is
//! mapped as the next stack page instead of being pushed. When the stack runs
//! empty, surplus stack pages are handed out again. Growth maps into the
//! stack's page table, which exists from boot, so it never allocates.
//!
//! ## Double free
//!
//! There is no bitmap. Freeing a frame twice, or freeing a frame that is
//! still mapped somewhere, corrupts the allocator; callers must not do it.

use kernel_info::boot::MemoryMapEntry;
use kernel_info::memory::{FRAME_STACK_END, FRAME_STACK_START, IDENTITY_MAPPED_END};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{ActivePageTables, FrameAlloc, Mmu, NoFrames, PageEntryBits, PagingError};
use log::{debug, info, trace, warn};

/// Frame addresses per stack page.
const SLOTS_PER_PAGE: u32 = PAGE_SIZE / 4;

/// Maximum number of stack pages.
const MAX_STACK_PAGES: u32 = (FRAME_STACK_END - FRAME_STACK_START) / PAGE_SIZE;

/// Exclusive upper bound of 32-bit physical memory.
const PHYSICAL_END: u64 = 1 << 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("out of physical frames")]
    OutOfMemory,
    #[error("{0:?} is not a frame boundary")]
    Misaligned(PhysicalAddress),
    #[error("the kernel image ends at {0:?}, past the identity-mapped region")]
    KernelTooLarge(PhysicalAddress),
    #[error("frame stack: {0}")]
    Paging(#[from] PagingError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Bump,
    Stack {
        /// Frames below this are never recycled.
        floor: PhysicalPage,
    },
}

/// The physical frame allocator.
#[derive(Debug)]
pub struct FrameAllocator {
    /// Next bump frame.
    cursor: u32,
    /// End of the bump range (exclusive).
    limit: u32,
    phase: Phase,
    /// Frames on the stack.
    len: u32,
    /// Mapped stack pages.
    stack_pages: u32,
}

impl FrameAllocator {
    /// Bump-allocate from `kernel_end` (rounded up) to the end of the
    /// identity-mapped region.
    ///
    /// # Errors
    /// [`FrameAllocError::KernelTooLarge`] if the kernel reaches past that region.
    pub const fn bootstrap(kernel_end: PhysicalAddress) -> Result<Self, FrameAllocError> {
        let Some(cursor) = kernel_end.align_up() else {
            return Err(FrameAllocError::KernelTooLarge(kernel_end));
        };
        if cursor.as_u32() > IDENTITY_MAPPED_END {
            return Err(FrameAllocError::KernelTooLarge(kernel_end));
        }
        Ok(Self {
            cursor: cursor.as_u32(),
            limit: IDENTITY_MAPPED_END,
            phase: Phase::Bump,
            len: 0,
            stack_pages: 0,
        })
    }

    /// Whether the free-frame stack is in use.
    #[must_use]
    pub const fn stack_enabled(&self) -> bool {
        matches!(self.phase, Phase::Stack { .. })
    }

    /// Frames that can still be allocated.
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        match self.phase {
            Phase::Bump => (self.limit - self.cursor) / PAGE_SIZE,
            Phase::Stack { .. } => self.len + self.stack_pages.saturating_sub(1),
        }
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        u64::from(self.free_frames()) * u64::from(PAGE_SIZE)
    }

    /// Frames currently used as stack storage.
    #[must_use]
    pub const fn stack_pages(&self) -> u32 {
        self.stack_pages
    }

    /// The lowest frame `free` accepts, once the stack is enabled.
    #[must_use]
    pub const fn floor(&self) -> Option<PhysicalPage> {
        match self.phase {
            Phase::Bump => None,
            Phase::Stack { floor } => Some(floor),
        }
    }

    fn bump(&mut self) -> Result<PhysicalPage, FrameAllocError> {
        let end = self.cursor.checked_add(PAGE_SIZE).ok_or(FrameAllocError::OutOfMemory)?;
        if end > self.limit {
            return Err(FrameAllocError::OutOfMemory);
        }
        let frame = PhysicalPage::containing_address(PhysicalAddress::new(self.cursor));
        self.cursor = end;
        Ok(frame)
    }

    fn stack_page(index: u32) -> VirtualPage {
        VirtualPage::containing_address(VirtualAddress::new(FRAME_STACK_START + index * PAGE_SIZE))
    }

    fn slot<M: Mmu + ?Sized>(mmu: &M, index: u32) -> *mut u32 {
        let page = Self::stack_page(index / SLOTS_PER_PAGE);
        let base = mmu.page_ptr(page).cast::<u32>();
        // Safety: the slot lies inside the mapped stack page.
        unsafe { base.add((index % SLOTS_PER_PAGE) as usize) }
    }

    /// Allocate one frame.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] when no frame is left.
    pub fn allocate<M: Mmu + ?Sized>(&mut self, mmu: &M) -> Result<PhysicalPage, FrameAllocError> {
        if !self.stack_enabled() {
            return self.bump();
        }

        if self.len > 0 {
            self.len -= 1;
            // Safety: slot `len` was written by a push.
            let raw = unsafe { core::ptr::read_volatile(Self::slot(mmu, self.len)) };
            return Ok(PhysicalPage::containing_address(PhysicalAddress::new(raw)));
        }

        // empty: give back surplus stack storage, but keep the first page
        if self.stack_pages > 1 {
            self.stack_pages -= 1;
            let page = Self::stack_page(self.stack_pages);
            // Safety: the stack table exists and nobody else maps this range.
            let mut tables = unsafe { ActivePageTables::new(mmu) };
            if let Some(frame) = tables.unmap(page)? {
                trace!("frame stack shrinks, reusing {frame:?}");
                return Ok(frame);
            }
        }
        Err(FrameAllocError::OutOfMemory)
    }

    /// Return `frame` to the allocator.
    ///
    /// Ignored before [`enable_stack`](Self::enable_stack), and for frames
    /// below the floor.
    ///
    /// The caller guarantees that `frame` is not free already and no longer
    /// mapped anywhere; neither is checked.
    ///
    /// # Errors
    /// [`FrameAllocError::Paging`] if the stack page table is missing.
    pub fn free<M: Mmu + ?Sized>(&mut self, mmu: &M, frame: PhysicalPage) -> Result<(), FrameAllocError> {
        let Phase::Stack { floor } = self.phase else {
            trace!("ignoring free of {frame:?} before paging");
            return Ok(());
        };
        if frame < floor {
            trace!("ignoring free of reserved {frame:?}");
            return Ok(());
        }

        if self.len == self.stack_pages * SLOTS_PER_PAGE {
            if self.stack_pages == MAX_STACK_PAGES {
                warn!("frame stack region exhausted, dropping {frame:?}");
                return Ok(());
            }
            let page = Self::stack_page(self.stack_pages);
            // Safety: the stack table exists and nobody else maps this range.
            let mut tables = unsafe { ActivePageTables::new(mmu) };
            tables.map(&mut NoFrames, page, frame, PageEntryBits::kernel_rw())?;
            self.stack_pages += 1;
            trace!("frame stack grows into {frame:?}");
            return Ok(());
        }

        // Safety: slot `len` lies in a mapped stack page.
        unsafe { core::ptr::write_volatile(Self::slot(mmu, self.len), frame.base().as_u32()) };
        self.len += 1;
        Ok(())
    }

    /// Free a frame given by address.
    ///
    /// # Errors
    /// [`FrameAllocError::Misaligned`] if `pa` is not a frame boundary,
    /// otherwise as [`free`](Self::free).
    pub fn free_address<M: Mmu + ?Sized>(&mut self, mmu: &M, pa: PhysicalAddress) -> Result<(), FrameAllocError> {
        let frame = PhysicalPage::try_new(pa).map_err(|_| FrameAllocError::Misaligned(pa))?;
        self.free(mmu, frame)
    }

    /// Switch from bump allocation to the free-frame stack.
    ///
    /// Takes one more bump frame as the first stack page. Paging must be on
    /// and the stack's page table present.
    ///
    /// # Errors
    /// - [`FrameAllocError::OutOfMemory`] if no bump frame is left.
    /// - [`FrameAllocError::Paging`] if the page could not be mapped.
    pub fn enable_stack<M: Mmu + ?Sized>(&mut self, mmu: &M) -> Result<(), FrameAllocError> {
        if self.stack_enabled() {
            return Ok(());
        }
        let first = self.bump()?;
        // Safety: the caller has paging on; the stack range is ours.
        let mut tables = unsafe { ActivePageTables::new(mmu) };
        tables.map(&mut NoFrames, Self::stack_page(0), first, PageEntryBits::kernel_rw())?;

        let floor = PhysicalPage::containing_address(PhysicalAddress::new(self.cursor));
        self.phase = Phase::Stack { floor };
        self.stack_pages = 1;
        debug!("frame stack enabled, frames below {floor:?} are reserved");
        Ok(())
    }

    /// Free every frame of every usable region of the boot memory map.
    ///
    /// Regions are clipped to 32-bit physical memory and to whole frames.
    ///
    /// # Errors
    /// As [`free`](Self::free).
    pub fn seed_from_memory_map<M: Mmu + ?Sized>(
        &mut self,
        mmu: &M,
        entries: &[MemoryMapEntry],
    ) -> Result<(), FrameAllocError> {
        if !self.stack_enabled() {
            warn!("memory map offered before the frame stack exists; ignored");
            return Ok(());
        }

        let page = u64::from(PAGE_SIZE);
        let below_4_gib = |e: &&MemoryMapEntry| e.is_usable() && e.base_address < PHYSICAL_END;
        for entry in entries.iter().filter(below_4_gib) {
            let start = entry.base_address.div_ceil(page) * page;
            let end = (entry.end().min(PHYSICAL_END) / page) * page;
            let mut at = start;
            while at < end {
                let pa = PhysicalAddress::try_from_u64(at).map_err(PagingError::from)?;
                self.free(mmu, PhysicalPage::containing_address(pa))?;
                at += page;
            }
        }
        info!(
            "memory map seeded: {} frames ({} KiB) free",
            self.free_frames(),
            self.free_bytes() / 1024
        );
        Ok(())
    }

    /// A [`FrameAlloc`] view for the paging code.
    #[must_use]
    pub fn source<'a, M: Mmu + ?Sized>(&'a mut self, mmu: &'a M) -> FrameSource<'a, M> {
        FrameSource { frames: self, mmu }
    }
}

/// Adapter handing frames of a [`FrameAllocator`] to the paging code.
pub struct FrameSource<'a, M: Mmu + ?Sized> {
    frames: &'a mut FrameAllocator,
    mmu: &'a M,
}

impl<M: Mmu + ?Sized> FrameAlloc for FrameSource<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.frames.allocate(self.mmu).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::{MemoryMapEntry, MemoryRegionType};
    use kernel_vmem::DirectoryIndex;
    use kernel_vmem::bootstrap::{build_boot_directory, enable_translation};
    use kernel_vmem::emulated::EmulatedMachine;
    use std::collections::HashSet;

    /// Paging on with only the identity table, the recursive slots and the
    /// frame stack table; the allocator switched to its stack.
    fn minimal(m: &EmulatedMachine, kernel_end: u32) -> FrameAllocator {
        let mut frames = FrameAllocator::bootstrap(PhysicalAddress::new(kernel_end)).unwrap();
        let dir =
            build_boot_directory(m, &mut frames.source(m), [DirectoryIndex::FRAME_STACK]).unwrap();
        unsafe { enable_translation(m, dir).unwrap() };
        frames.enable_stack(m).unwrap();
        frames
    }

    #[test]
    fn bump_phase_is_sequential_and_bounded() {
        let m = EmulatedMachine::new(16);
        let mut frames = FrameAllocator::bootstrap(PhysicalAddress::new(0x003F_D001)).unwrap();
        assert_eq!(frames.free_frames(), 2);
        assert_eq!(frames.allocate(&m).unwrap().base().as_u32(), 0x003F_E000);
        assert_eq!(frames.allocate(&m).unwrap().base().as_u32(), 0x003F_F000);
        assert_eq!(frames.allocate(&m), Err(FrameAllocError::OutOfMemory));
    }

    #[test]
    fn kernel_past_identity_region_is_rejected() {
        let end = PhysicalAddress::new(0x0040_0001);
        assert_eq!(
            FrameAllocator::bootstrap(end).unwrap_err(),
            FrameAllocError::KernelTooLarge(end)
        );
    }

    #[test]
    fn frees_before_paging_are_ignored() {
        let m = EmulatedMachine::new(16);
        let mut frames = FrameAllocator::bootstrap(PhysicalAddress::new(0x1000)).unwrap();
        frames.free(&m, PhysicalPage::from_number(0x300).unwrap()).unwrap();
        assert_eq!(frames.allocate(&m).unwrap().base().as_u32(), 0x1000);
    }

    #[test]
    fn sixteen_seeded_frames_then_out_of_memory() {
        let m = EmulatedMachine::new(512);
        let mut frames = minimal(&m, 0x10000);
        frames
            .seed_from_memory_map(&m, &[MemoryMapEntry::usable(0x10_0000, 64 * 1024)])
            .unwrap();
        assert_eq!(frames.free_frames(), 16);

        let mut seen = HashSet::new();
        for _ in 0..16 {
            let f = frames.allocate(&m).unwrap();
            assert!(f.base().as_u32() >= 0x10_0000 && f.base().as_u32() < 0x11_0000);
            assert!(seen.insert(f), "{f:?} handed out twice");
        }
        assert_eq!(frames.allocate(&m), Err(FrameAllocError::OutOfMemory));

        let back = PhysicalPage::from_number(0x105).unwrap();
        frames.free(&m, back).unwrap();
        assert_eq!(frames.allocate(&m), Ok(back));
    }

    #[test]
    fn reserved_frames_and_other_region_types_are_skipped() {
        let m = EmulatedMachine::new(512);
        let mut frames = minimal(&m, 0x10000);
        let floor = frames.floor().unwrap();
        frames
            .seed_from_memory_map(
                &m,
                &[
                    // covers the kernel and the boot tables, only the part above the floor counts
                    MemoryMapEntry::usable(0, u64::from(floor.base().as_u32()) + 0x2000),
                    MemoryMapEntry::new(0x10_0000, 0x10_0000, MemoryRegionType::Reserved),
                    // unaligned edges shrink to whole frames
                    MemoryMapEntry::usable(0x12_0800, 0x1800),
                ],
            )
            .unwrap();
        assert_eq!(frames.free_frames(), 3);
        let mut got: Vec<u32> = (0..3).map(|_| frames.allocate(&m).unwrap().base().as_u32()).collect();
        got.sort_unstable();
        let f = floor.base().as_u32();
        assert_eq!(got, vec![f, f + 0x1000, 0x12_1000]);
    }

    #[test]
    fn misaligned_address_is_rejected() {
        let m = EmulatedMachine::new(512);
        let mut frames = minimal(&m, 0x10000);
        let pa = PhysicalAddress::new(0x10_0010);
        assert_eq!(frames.free_address(&m, pa), Err(FrameAllocError::Misaligned(pa)));
    }

    #[test]
    fn memory_above_4_gib_is_clipped() {
        let m = EmulatedMachine::new(512);
        let mut frames = minimal(&m, 0x10000);
        frames
            .seed_from_memory_map(
                &m,
                &[
                    MemoryMapEntry::usable(0xFFFF_E000, 0x10_0000),
                    MemoryMapEntry::usable(0x1_0000_0000, 0x1000_0000),
                ],
            )
            .unwrap();
        assert_eq!(frames.free_frames(), 2);
    }

    #[test]
    fn regions_at_the_top_of_the_64_bit_range_are_ignored() {
        let m = EmulatedMachine::new(512);
        let mut frames = minimal(&m, 0x10000);
        let before = frames.free_frames();
        frames
            .seed_from_memory_map(
                &m,
                &[
                    MemoryMapEntry::usable(u64::MAX - 0x800, 0x400),
                    MemoryMapEntry::usable(u64::MAX - 0xFFF, 0x1000),
                    MemoryMapEntry::usable(0x10_0000, 0x2000),
                ],
            )
            .unwrap();
        assert_eq!(frames.free_frames(), before + 2);
    }

    #[test]
    fn stack_grows_into_freed_frames_and_shrinks_back() {
        // 2048 frames of RAM; seed 1100 frames so the stack needs a second page
        let m = EmulatedMachine::new(2048);
        let mut frames = minimal(&m, 0x10000);
        frames
            .seed_from_memory_map(&m, &[MemoryMapEntry::usable(0x20_0000, 1100 * 4096)])
            .unwrap();
        assert_eq!(frames.stack_pages(), 2);
        // one of the seeded frames became stack storage, but it is still accounted as free
        assert_eq!(frames.free_frames(), 1100);

        let mut seen = HashSet::new();
        for _ in 0..1100 {
            assert!(seen.insert(frames.allocate(&m).unwrap()));
        }
        assert_eq!(frames.stack_pages(), 1);
        assert_eq!(frames.allocate(&m), Err(FrameAllocError::OutOfMemory));
        assert!(seen.iter().all(|f| f.base().as_u32() >= 0x20_0000));
    }
}
