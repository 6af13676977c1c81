mod common;

use common::{KERNEL_END, RAM_FRAMES, SEEDED_FRAMES, boot, memory_map, va};
use kernel_alloc::{CloneMode, FrameAllocError, MemoryManager, VmmError};
use kernel_info::memory::{KERNEL_START, SCRATCH_WINDOW_END, SCRATCH_WINDOW_START};
use kernel_memory_addresses::{
    AddressError, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};
use kernel_sync::InterruptControl;
use kernel_vmem::emulated::{AccessKind, EmulatedMachine, Privilege};
use kernel_vmem::{Mmu, PageEntryBits, PagingError};
use std::cell::Cell;
use std::collections::HashSet;

#[test]
fn init_turns_on_paging_and_seeds_the_allocator() {
    let mm = boot();
    assert!(mm.mmu().paging_enabled());
    assert_eq!(mm.current_directory(), mm.kernel_directory());
    assert!(mm.frames().stack_enabled());
    assert_eq!(mm.frames().free_frames(), SEEDED_FRAMES);

    // low memory is reachable both identity mapped and in the higher half
    mm.mmu().write_phys_u32(PhysicalAddress::new(0x8000), 0x5A5A_0001);
    assert_eq!(mm.mmu().load_u32(va(0x8000), Privilege::Supervisor), Ok(0x5A5A_0001));
    assert_eq!(
        mm.mmu().load_u32(va(KERNEL_START + 0x8000), Privilege::Supervisor),
        Ok(0x5A5A_0001)
    );
    assert!(mm.mmu().load_u32(va(0x8000), Privilege::User).is_err());
}

#[test]
fn map_query_unmap_round_trip() {
    let mut mm = boot();
    let frame = mm.allocate_frame().unwrap();
    let v = va(0x0800_0000);

    mm.map(v, frame.base(), PageEntryBits::user_rw()).unwrap();
    assert_eq!(mm.query_mapping(v + 0x123), Some(frame.base() + 0x123));
    mm.mmu().store_u32(v + 8, 77, Privilege::User).unwrap();
    assert_eq!(mm.mmu().read_phys_u32(frame.base() + 8), 77);

    let entry = mm.page_entry(v).unwrap();
    assert!(entry.flags().user_access() && entry.flags().writable());

    assert_eq!(mm.unmap(v).unwrap(), Some(frame));
    assert_eq!(mm.query_mapping(v), None);
    assert!(mm.mmu().access(v, AccessKind::Read, Privilege::User).is_err());
    // unmapping leaves the frame to the caller
    mm.free_frame(frame).unwrap();
}

#[test]
fn unaligned_and_recursive_addresses_are_rejected() {
    let mut mm = boot();
    let frame = mm.allocate_frame().unwrap();
    assert_eq!(
        mm.map(va(0x0800_0010), frame.base(), PageEntryBits::kernel_rw()),
        Err(VmmError::Address(AddressError::Unaligned(0x0800_0010)))
    );
    assert_eq!(
        mm.map(va(0x0800_0000), frame.base() + 4, PageEntryBits::kernel_rw()),
        Err(VmmError::Address(AddressError::Unaligned(frame.base().as_u32() + 4)))
    );
    let self_map = va(0xFFFF_F000);
    assert_eq!(
        mm.unmap(self_map),
        Err(VmmError::Paging(PagingError::RecursiveWindow(self_map.page())))
    );
    assert_eq!(mm.query_mapping(self_map), Some(mm.kernel_directory().base()));
}

#[test]
fn every_seeded_frame_is_handed_out_exactly_once() {
    let mut mm = boot();
    let mut seen = HashSet::new();
    let err = loop {
        match mm.allocate_frame() {
            Ok(frame) => assert!(seen.insert(frame), "{frame:?} handed out twice"),
            Err(e) => break e,
        }
    };
    assert_eq!(seen.len() as u32, SEEDED_FRAMES);
    assert_eq!(err, VmmError::Frames(FrameAllocError::OutOfMemory));
    assert!(err.is_out_of_memory());

    // a mapping that needs a fresh page table now fails the same way
    let any = *seen.iter().next().unwrap();
    let err = mm.map(va(0x4000_0000), any.base(), PageEntryBits::user_rw()).unwrap_err();
    assert!(err.is_out_of_memory(), "{err:?}");

    // the most recently freed frame comes back first
    let back = *seen.iter().last().unwrap();
    mm.free_frame(back).unwrap();
    assert_eq!(mm.allocate_frame(), Ok(back));
}

#[test]
fn anonymous_heap_pages_are_zeroed_and_returned() {
    let mut mm = boot();
    let heap = MemoryManager::<EmulatedMachine>::heap_range();

    // leave garbage in the frame the next allocation will reuse
    let dirty = mm.allocate_frame().unwrap();
    mm.with_frame(dirty, |bytes| bytes.fill(0xEE)).unwrap();
    mm.free_frame(dirty).unwrap();

    let before = mm.frames().free_frames();
    mm.map_anonymous(heap.start, 4, PageEntryBits::kernel_rw()).unwrap();
    // kernel tables exist from boot, so only the data frames are used
    assert_eq!(mm.frames().free_frames(), before - 4);
    assert_eq!(mm.query_mapping(heap.start), Some(dirty.base()));
    for page in 0..4 {
        let at = heap.start + page * 0x1000 + 0xFFC;
        assert_eq!(mm.mmu().load_u32(at, Privilege::Supervisor), Ok(0));
    }
    assert!(mm.mmu().load_u32(heap.start, Privilege::User).is_err());

    assert_eq!(mm.unmap_and_free(heap.start, 8).unwrap(), 4);
    assert_eq!(mm.frames().free_frames(), before);
    assert_eq!(mm.query_mapping(heap.start), None);
}

#[test]
fn failed_anonymous_mapping_rolls_back() {
    let mut mm = boot();
    let mut hoard = Vec::new();
    while mm.frames().free_frames() > 3 {
        hoard.push(mm.allocate_frame().unwrap());
    }
    let heap = MemoryManager::<EmulatedMachine>::heap_range();
    let err = mm
        .map_anonymous(heap.start, 5, PageEntryBits::kernel_rw())
        .unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(mm.frames().free_frames(), 3);
    for page in 0..5 {
        assert_eq!(mm.query_mapping(heap.start + page * 0x1000), None);
    }
}

#[test]
fn anonymous_range_must_fit_the_address_space() {
    let mut mm = boot();
    assert_eq!(
        mm.map_anonymous(va(0xFFFF_E000), 4, PageEntryBits::kernel_rw()),
        Err(VmmError::Address(AddressError::OutOfRange(0x1_0000_2000)))
    );
}

#[test]
fn with_frame_reaches_unmapped_memory_and_cleans_up() {
    let mut mm = boot();
    let frame = PhysicalPage::containing_address(PhysicalAddress::new(0x0070_0000));
    mm.mmu().write_phys_u32(frame.base() + 16, 0xDEAD_BEEF);

    let word = mm
        .with_frame(frame, |bytes| u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]))
        .unwrap();
    assert_eq!(word, 0xDEAD_BEEF);

    assert!(mm.mmu().interrupts_enabled(), "interrupts are restored");
    assert!(
        mm.mmu()
            .load_u32(va(SCRATCH_WINDOW_START), Privilege::Supervisor)
            .is_err(),
        "scratch slot is unmapped again"
    );
}

#[test]
fn remapping_invalidates_the_old_translation() {
    let mut mm = boot();
    let a = mm.allocate_frame().unwrap();
    let b = mm.allocate_frame().unwrap();
    let v = va(0x0900_0000);

    mm.map(v, a.base(), PageEntryBits::kernel_rw()).unwrap();
    mm.mmu().store_u32(v, 1, Privilege::Supervisor).unwrap();
    assert!(mm.mmu().is_cached(v.page()));

    mm.map(v, b.base(), PageEntryBits::kernel_rw()).unwrap();
    mm.mmu().store_u32(v, 2, Privilege::Supervisor).unwrap();
    assert_eq!(mm.mmu().read_phys_u32(a.base()), 1);
    assert_eq!(mm.mmu().read_phys_u32(b.base()), 2);
}

/// Counts accesses to the scratch window, and those made while interrupts
/// were enabled.
struct ScratchWatch<'m> {
    machine: &'m EmulatedMachine,
    touched: Cell<u32>,
    touched_with_interrupts: Cell<u32>,
}

impl<'m> ScratchWatch<'m> {
    fn new(machine: &'m EmulatedMachine) -> Self {
        Self {
            machine,
            touched: Cell::new(0),
            touched_with_interrupts: Cell::new(0),
        }
    }
}

impl InterruptControl for ScratchWatch<'_> {
    fn interrupts_enabled(&self) -> bool {
        self.machine.interrupts_enabled()
    }
    fn disable_interrupts(&self) {
        self.machine.disable_interrupts();
    }
    fn enable_interrupts(&self) {
        self.machine.enable_interrupts();
    }
}

impl Mmu for ScratchWatch<'_> {
    fn page_ptr(&self, page: VirtualPage) -> *mut u8 {
        let at = page.base().as_u32();
        if (SCRATCH_WINDOW_START..SCRATCH_WINDOW_END).contains(&at) {
            self.touched.set(self.touched.get() + 1);
            if self.machine.interrupts_enabled() {
                self.touched_with_interrupts
                    .set(self.touched_with_interrupts.get() + 1);
            }
        }
        self.machine.page_ptr(page)
    }
    fn paging_enabled(&self) -> bool {
        self.machine.paging_enabled()
    }
    fn active_directory(&self) -> PhysicalPage {
        self.machine.active_directory()
    }
    unsafe fn load_directory(&self, directory: PhysicalPage) {
        unsafe { self.machine.load_directory(directory) }
    }
    unsafe fn enable_paging(&self) {
        unsafe { self.machine.enable_paging() }
    }
    unsafe fn disable_paging(&self) {
        unsafe { self.machine.disable_paging() }
    }
    fn invalidate_page(&self, page: VirtualPage) {
        self.machine.invalidate_page(page);
    }
    fn flush_tlb(&self) {
        self.machine.flush_tlb();
    }
    fn fault_address(&self) -> VirtualAddress {
        self.machine.fault_address()
    }
}

#[test]
fn the_scratch_window_is_only_used_with_interrupts_masked() {
    let machine = EmulatedMachine::new(RAM_FRAMES);
    let watch = ScratchWatch::new(&machine);
    let mut mm =
        unsafe { MemoryManager::init(watch, PhysicalAddress::new(KERNEL_END), &memory_map()) }
            .expect("boot");
    let heap = MemoryManager::<ScratchWatch<'_>>::heap_range();

    // zeroing fresh frames
    mm.map_anonymous(heap.start, 4, PageEntryBits::kernel_rw()).unwrap();
    let zeroing = mm.mmu().touched.get();
    assert!(zeroing >= 4, "every new frame is cleared through the window");

    // copying frames into a clone
    let space = mm.clone_kernel_space(CloneMode::CopyTables).unwrap();
    mm.switch_address_space(&space);
    mm.map_anonymous(va(0x0800_0000), 2, PageEntryBits::user_rw()).unwrap();
    mm.switch_to_kernel();
    let child = mm.clone_address_space(&space, CloneMode::CopyPages).unwrap();
    assert!(mm.mmu().touched.get() > zeroing);

    let frame = mm.allocate_frame().unwrap();
    mm.with_frame(frame, |bytes| bytes[0] = 1).unwrap();

    assert_eq!(mm.mmu().touched_with_interrupts.get(), 0);
    assert!(machine.interrupts_enabled(), "interrupts are restored");

    mm.destroy_address_space(child).unwrap();
    mm.destroy_address_space(space).unwrap();
}
