use super::{ENTRIES, EntryIndex, PageDirectory, PageTable, PagingEntry, PdEntry, PtEntry};
use core::marker::PhantomData;
use core::ptr;

/// Volatile access to a directory or table in mapped memory.
///
/// Paging structures are read by the processor behind the compiler's back
/// and are usually reached through the recursive windows or the scratch
/// window, so every access is a volatile 32-bit load or store.
pub struct TableView<'a, E> {
    base: *mut u32,
    _marker: PhantomData<&'a mut [E; ENTRIES]>,
}

/// A [`TableView`] over a page directory.
pub type DirectoryView<'a> = TableView<'a, PdEntry>;

/// A [`TableView`] over a page table.
pub type PageTableView<'a> = TableView<'a, PtEntry>;

impl<E: PagingEntry> TableView<'_, E> {
    /// # Safety
    /// `base` must point at 4 KiB of readable and writable memory, 4 KiB
    /// aligned, that stays mapped for the lifetime of the view.
    #[inline]
    pub unsafe fn from_ptr(base: *mut u8) -> Self {
        debug_assert!(!base.is_null());
        debug_assert_eq!(base.addr() & 0xFFF, 0, "tables are page aligned");
        Self {
            base: base.cast(),
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, i: E::Index) -> E {
        let slot = i.as_usize();
        debug_assert!(slot < ENTRIES);
        // Safety: slot < ENTRIES and the view covers ENTRIES words.
        E::from_raw(unsafe { ptr::read_volatile(self.base.add(slot)) })
    }

    #[inline]
    pub fn set(&mut self, i: E::Index, e: E) {
        let slot = i.as_usize();
        debug_assert!(slot < ENTRIES);
        // Safety: see `get`.
        unsafe { ptr::write_volatile(self.base.add(slot), e.raw()) }
    }

    /// Clear every entry.
    pub fn zero(&mut self) {
        for slot in 0..ENTRIES {
            // Safety: see `get`.
            unsafe { ptr::write_volatile(self.base.add(slot), 0) }
        }
    }

    /// Copy all entries of `other` into this table.
    pub fn copy_from(&mut self, other: &TableView<'_, E>) {
        for slot in 0..ENTRIES {
            // Safety: both views cover ENTRIES words.
            unsafe {
                let v = ptr::read_volatile(other.base.add(slot));
                ptr::write_volatile(self.base.add(slot), v);
            }
        }
    }

    /// All entries with their index.
    pub fn iter(&self) -> impl Iterator<Item = (E::Index, E)> + '_ {
        (0..ENTRIES).map(|slot| {
            let i = E::Index::from_slot(slot);
            (i, self.get(i))
        })
    }
}

impl<'a> From<&'a mut PageDirectory> for DirectoryView<'a> {
    fn from(d: &'a mut PageDirectory) -> Self {
        // Safety: an owned directory is aligned, sized and outlives 'a.
        unsafe { Self::from_ptr(ptr::from_mut(d).cast()) }
    }
}

impl<'a> From<&'a mut PageTable> for PageTableView<'a> {
    fn from(t: &'a mut PageTable) -> Self {
        // Safety: as above.
        unsafe { Self::from_ptr(ptr::from_mut(t).cast()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::{DirectoryIndex, TableIndex};

    #[test]
    fn view_writes_through_to_owned_table() {
        let mut t = PageTable::zeroed();
        {
            let mut v = PageTableView::from(&mut t);
            v.set(TableIndex::new(7).unwrap(), PtEntry::from_raw(0x7003));
            assert_eq!(v.iter().filter(|(_, e)| e.is_present()).count(), 1);
        }
        assert_eq!(t.get(TableIndex::new(7).unwrap()).raw(), 0x7003);
    }

    #[test]
    fn copy_and_zero() {
        let mut a = PageDirectory::zeroed();
        let mut b = PageDirectory::zeroed();
        a.set(DirectoryIndex::KERNEL_FIRST, PdEntry::from_raw(0x0010_0003));
        {
            let src = DirectoryView::from(&mut a);
            let mut dst = DirectoryView::from(&mut b);
            dst.copy_from(&src);
            assert_eq!(dst.get(DirectoryIndex::KERNEL_FIRST).raw(), 0x0010_0003);
            dst.zero();
        }
        assert!(!b.get(DirectoryIndex::KERNEL_FIRST).is_present());
    }
}
