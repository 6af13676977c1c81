//! # Address Space Cloning
//!
//! A new directory is assembled in a fresh frame that is not mapped
//! anywhere, so both directories, their page tables and any copied frames
//! are reached through the [scratch window](crate::scratch). The whole
//! operation runs with interrupts disabled.
//!
//! | Directory slots | What the clone gets |
//! |-----------------|---------------------|
//! | 0 | the source's entry: the shared identity table |
//! | 1‒767 | per [`CloneMode`] |
//! | 768‒1021 | the source's entries: shared kernel tables |
//! | 1022, 1023 | rebuilt for the new directory |
//!
//! A clone that fails part way frees every frame it took.

use crate::vmm::{MemoryManager, Parts, VmmError};
use kernel_memory_addresses::PhysicalPage;
use kernel_sync::IrqGuard;
use kernel_vmem::page_table::{DirectoryView, PageTableView};
use kernel_vmem::{DirectoryIndex, Mmu, PdEntry, PtEntry, recursive};
use log::{debug, info, warn};

/// What happens to the user part of an address space when it is cloned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloneMode {
    /// User directory entries are copied, so both spaces use the same page
    /// tables. Nothing is reference counted: the source must outlive the
    /// clone, and destroying the clone leaves the tables alone.
    Share,
    /// Each user page table is duplicated entry for entry; the frames
    /// behind the entries stay shared. The clone owns its tables but no
    /// data frames, so frames mapped into it later must be unmapped with
    /// [`unmap_and_free`](MemoryManager::unmap_and_free) before it is
    /// destroyed or they leak.
    CopyTables,
    /// Each user page table is duplicated and every mapped frame is copied
    /// into a fresh one with the same flags.
    CopyPages,
}

/// A process directory created by cloning. The kernel directory has none.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an address space that is dropped is leaked"]
pub struct AddressSpace {
    directory: PhysicalPage,
    mode: CloneMode,
}

impl AddressSpace {
    /// The frame holding the page directory.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage {
        self.directory
    }

    /// How the space was cloned, which decides what it owns.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> CloneMode {
        self.mode
    }
}

/// An address space that could not be destroyed, handed back with the reason.
#[derive(Debug, thiserror::Error)]
#[error("cannot destroy {space:?}: {reason}")]
pub struct DestroyError {
    pub space: AddressSpace,
    #[source]
    pub reason: VmmError,
}

fn user_slots() -> impl Iterator<Item = DirectoryIndex> {
    DirectoryIndex::all().filter(|i| i.is_user())
}

impl<M: Mmu> MemoryManager<M> {
    /// Clone `source` into a new address space.
    ///
    /// # Errors
    /// Out of memory; nothing is leaked.
    pub fn clone_address_space(
        &mut self,
        source: &AddressSpace,
        mode: CloneMode,
    ) -> Result<AddressSpace, VmmError> {
        self.clone_directory(source.directory(), mode)
    }

    /// Clone the kernel directory, the starting point of the first process.
    ///
    /// # Errors
    /// Out of memory; nothing is leaked.
    pub fn clone_kernel_space(&mut self, mode: CloneMode) -> Result<AddressSpace, VmmError> {
        self.clone_directory(self.kernel_directory(), mode)
    }

    fn clone_directory(
        &mut self,
        source: PhysicalPage,
        mode: CloneMode,
    ) -> Result<AddressSpace, VmmError> {
        let mut parts = self.parts();
        let mmu = parts.mmu;
        let _irq = IrqGuard::new(mmu);

        let directory = parts.zeroed_frame()?;
        let result = parts.fill_directory(source, directory, mode);
        parts.scratch.release_all(mmu);

        match result {
            Ok(()) => {
                info!("cloned {source:?} into {directory:?} ({mode:?})");
                Ok(AddressSpace { directory, mode })
            }
            Err(e) => {
                warn!("clone of {source:?} failed: {e}");
                if let Err(cleanup) = parts.teardown(directory, mode) {
                    warn!("partial clone {directory:?} leaked: {cleanup}");
                }
                parts.scratch.release_all(mmu);
                Err(e)
            }
        }
    }

    /// Release the directory of `space` and everything it owns: the window
    /// table, private user page tables and, for [`CloneMode::CopyPages`],
    /// the user frames.
    ///
    /// # Errors
    /// [`VmmError::AddressSpaceActive`] if `space` is loaded; switch away first.
    pub fn destroy_address_space(&mut self, space: AddressSpace) -> Result<(), DestroyError> {
        if self.is_active(&space) {
            return Err(DestroyError {
                space,
                reason: VmmError::AddressSpaceActive,
            });
        }

        let mut parts = self.parts();
        let mmu = parts.mmu;
        let _irq = IrqGuard::new(mmu);
        let result = parts.teardown(space.directory, space.mode);
        parts.scratch.release_all(mmu);

        match result {
            Ok(()) => {
                debug!("destroyed address space {:?}", space.directory);
                Ok(())
            }
            Err(reason) => Err(DestroyError { space, reason }),
        }
    }
}

impl<M: Mmu> Parts<'_, M> {
    /// Fill the zeroed directory `target` from `source`.
    ///
    /// Every frame taken is linked into `target` before it is used, so
    /// [`teardown`](Self::teardown) finds it if a later step fails.
    fn fill_directory(
        &mut self,
        source: PhysicalPage,
        target: PhysicalPage,
        mode: CloneMode,
    ) -> Result<(), VmmError> {
        let src_slot = self.scratch.map(self.mmu, source)?;
        let dst_slot = self.scratch.map(self.mmu, target)?;
        // Safety: both slots stay mapped until the end of this function, and
        // interrupts are off.
        let src: DirectoryView<'_> = unsafe { src_slot.table(self.mmu) };
        let mut dst: DirectoryView<'_> = unsafe { dst_slot.table(self.mmu) };

        dst.set(DirectoryIndex::IDENTITY, src.get(DirectoryIndex::IDENTITY));

        for di in user_slots() {
            let pde = src.get(di);
            let Some(src_table) = pde.table() else {
                continue;
            };
            if mode == CloneMode::Share {
                dst.set(di, pde);
                continue;
            }
            let table = self.zeroed_frame()?;
            dst.set(di, PdEntry::make(table, pde.flags()));
            self.copy_table(src_table, table, mode == CloneMode::CopyPages)?;
        }

        for di in DirectoryIndex::range(DirectoryIndex::KERNEL_FIRST, DirectoryIndex::DIRECTORY_WINDOW) {
            dst.set(di, src.get(di));
        }

        let window_table = self.allocate()?;
        dst.set(
            DirectoryIndex::DIRECTORY_WINDOW,
            PdEntry::make(window_table, recursive::link_flags()),
        );
        let window_slot = self.scratch.map(self.mmu, window_table)?;
        // Safety: as above.
        let mut window: PageTableView<'_> = unsafe { window_slot.table(self.mmu) };
        recursive::install(&mut dst, target, &mut window, window_table);

        self.scratch.unmap(self.mmu, window_slot)?;
        self.scratch.unmap(self.mmu, dst_slot)?;
        self.scratch.unmap(self.mmu, src_slot)?;
        Ok(())
    }

    /// Fill the zeroed page table `target` from `source`, either sharing the
    /// frames or copying each into a new one.
    fn copy_table(
        &mut self,
        source: PhysicalPage,
        target: PhysicalPage,
        copy_frames: bool,
    ) -> Result<(), VmmError> {
        let src_slot = self.scratch.map(self.mmu, source)?;
        let dst_slot = self.scratch.map(self.mmu, target)?;
        // Safety: as in `fill_directory`.
        let src: PageTableView<'_> = unsafe { src_slot.table(self.mmu) };
        let mut dst: PageTableView<'_> = unsafe { dst_slot.table(self.mmu) };

        for (ti, pte) in src.iter() {
            let Some((frame, flags)) = pte.page() else {
                continue;
            };
            if copy_frames {
                let copy = self.allocate()?;
                dst.set(ti, PtEntry::make(copy, flags));
                self.copy_frame(frame, copy)?;
            } else {
                dst.set(ti, pte);
            }
        }

        self.scratch.unmap(self.mmu, dst_slot)?;
        self.scratch.unmap(self.mmu, src_slot)?;
        Ok(())
    }

    /// Free `directory` and what it owns under `mode`. The directory must not
    /// be active.
    fn teardown(&mut self, directory: PhysicalPage, mode: CloneMode) -> Result<(), VmmError> {
        let dir_slot = self.scratch.map(self.mmu, directory)?;
        // Safety: as in `fill_directory`.
        let dir: DirectoryView<'_> = unsafe { dir_slot.table(self.mmu) };

        if mode != CloneMode::Share {
            for di in user_slots() {
                let Some(table) = dir.get(di).table() else {
                    continue;
                };
                if mode == CloneMode::CopyPages {
                    self.free_table_frames(table)?;
                }
                self.free(table)?;
            }
        }

        let window_table = dir.get(DirectoryIndex::DIRECTORY_WINDOW).table();
        self.scratch.unmap(self.mmu, dir_slot)?;
        if let Some(window_table) = window_table {
            self.free(window_table)?;
        }
        self.free(directory)
    }

    fn free_table_frames(&mut self, table: PhysicalPage) -> Result<(), VmmError> {
        let slot = self.scratch.map(self.mmu, table)?;
        // Safety: as in `fill_directory`.
        let entries: PageTableView<'_> = unsafe { slot.table(self.mmu) };
        for (_, pte) in entries.iter() {
            if let Some((frame, _)) = pte.page() {
                self.free(frame)?;
            }
        }
        self.scratch.unmap(self.mmu, slot)
    }
}
