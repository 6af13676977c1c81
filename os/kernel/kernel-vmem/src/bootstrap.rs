//! # Boot Directory
//!
//! Builds the first page directory while paging is still disabled, so every
//! frame is reachable at its physical address. The result contains:
//!
//! - the first 4 MiB identity mapped (kernel only, writable), with the same
//!   page table also linked at the `KERNEL_START` slot,
//! - both recursive slots,
//! - an empty page table for each requested kernel slot.
//!
//! [`enable_translation`] loads such a directory and turns paging on.

use crate::mmu::Mmu;
use crate::page_table::{
    DirectoryIndex, DirectoryView, PageTableView, PagingEntry, PdEntry, PtEntry, TableIndex,
    TableView,
};
use crate::{FrameAlloc, PageEntryBits, PagingError, recursive};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use log::{debug, info};

/// View of `frame` through its physical address.
///
/// # Safety
/// Paging must be disabled and `frame` must not be in use by anything else.
unsafe fn identity_view<'a, M: Mmu + ?Sized, E: PagingEntry>(
    mmu: &M,
    frame: PhysicalPage,
) -> TableView<'a, E> {
    debug_assert!(!mmu.paging_enabled());
    let page = VirtualPage::containing_address(VirtualAddress::new(frame.base().as_u32()));
    unsafe { TableView::from_ptr(mmu.page_ptr(page)) }
}

/// Build the boot directory from frames of `alloc`.
///
/// `preallocate` lists further kernel slots that receive a zeroed page
/// table; slots already linked and the recursive pair are skipped.
/// Frames handed out before an error are not returned to `alloc`.
///
/// # Errors
/// - [`PagingError::AlreadyEnabled`] if paging is on.
/// - [`PagingError::OutOfMemory`] if `alloc` runs dry.
pub fn build_boot_directory<M, A, I>(
    mmu: &M,
    alloc: &mut A,
    preallocate: I,
) -> Result<PhysicalPage, PagingError>
where
    M: Mmu + ?Sized,
    A: FrameAlloc + ?Sized,
    I: IntoIterator<Item = DirectoryIndex>,
{
    if mmu.paging_enabled() {
        return Err(PagingError::AlreadyEnabled);
    }

    let directory = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
    // Safety: paging is off and the frame is fresh.
    let mut dir: DirectoryView<'_> = unsafe { identity_view(mmu, directory) };
    dir.zero();

    let identity = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
    // Safety: as above.
    let mut table: PageTableView<'_> = unsafe { identity_view(mmu, identity) };
    for (ti, frame) in TableIndex::all().zip(0u32..) {
        let frame = PhysicalPage::from_number(frame)?;
        table.set(ti, PtEntry::make(frame, PageEntryBits::kernel_rw()));
    }
    let link = PdEntry::make(identity, PageEntryBits::kernel_rw());
    dir.set(DirectoryIndex::IDENTITY, link);
    dir.set(DirectoryIndex::KERNEL_FIRST, link);

    let window_table = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
    // Safety: as above.
    let mut window: PageTableView<'_> = unsafe { identity_view(mmu, window_table) };
    recursive::install(&mut dir, directory, &mut window, window_table);

    let mut tables = 0u32;
    for di in preallocate {
        if di.is_recursive() || dir.get(di).is_present() {
            continue;
        }
        let frame = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
        // Safety: as above.
        let mut t: PageTableView<'_> = unsafe { identity_view(mmu, frame) };
        t.zero();
        dir.set(di, PdEntry::make(frame, PageEntryBits::kernel_rw()));
        tables += 1;
    }

    debug!("boot directory at {directory:?}, {tables} kernel tables preallocated");
    Ok(directory)
}

/// Whether `directory` is fit to be loaded: the identity table and both
/// recursive slots are in place.
///
/// # Safety
/// Paging must be disabled.
unsafe fn is_complete<M: Mmu + ?Sized>(mmu: &M, directory: PhysicalPage) -> bool {
    // Safety: paging is off.
    let dir: DirectoryView<'_> = unsafe { identity_view(mmu, directory) };
    if !dir.get(DirectoryIndex::IDENTITY).is_present() {
        return false;
    }
    let window = dir
        .get(DirectoryIndex::DIRECTORY_WINDOW)
        .table()
        // Safety: paging is off.
        .map(|frame| unsafe { identity_view::<M, PtEntry>(mmu, frame) });
    recursive::is_installed(&dir, directory, window.as_ref())
}

/// Load `directory` into `CR3` and enable paging.
///
/// # Errors
/// - [`PagingError::AlreadyEnabled`] if paging is on.
/// - [`PagingError::IncompleteDirectory`] if the identity table or a
///   recursive slot is missing.
///
/// # Safety
/// The executing code, stack and data must live in the identity-mapped first 4 MiB.
pub unsafe fn enable_translation<M: Mmu + ?Sized>(
    mmu: &M,
    directory: PhysicalPage,
) -> Result<(), PagingError> {
    if mmu.paging_enabled() {
        return Err(PagingError::AlreadyEnabled);
    }
    // Safety: paging is off.
    if !unsafe { is_complete(mmu, directory) } {
        return Err(PagingError::IncompleteDirectory(directory));
    }
    unsafe {
        mmu.load_directory(directory);
        mmu.enable_paging();
    }
    info!("paging enabled, directory {directory:?}");
    Ok(())
}

/// Turn paging off. `CR3` keeps its value.
///
/// # Safety
/// Everything the caller uses afterwards must be identity mapped.
pub unsafe fn disable_translation<M: Mmu + ?Sized>(mmu: &M) {
    unsafe { mmu.disable_paging() };
    info!("paging disabled");
}
