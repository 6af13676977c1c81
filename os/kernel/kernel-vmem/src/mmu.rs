//! # Processor Paging Interface
//!
//! Everything the paging code needs from the processor: the control
//! registers that switch and enable translation, TLB maintenance, the page
//! fault address, the interrupt flag, and a way to turn a virtual page into a
//! pointer the kernel can dereference.
//!
//! [`HardwareMmu`] drives a real i386. Host tests use the software MMU in
//! [`crate::emulated`].

use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::InterruptControl;

/// The paging unit of the executing processor.
///
/// Interrupt control is a supertrait so that multi-step page table updates
/// can run under an [`IrqGuard`](kernel_sync::IrqGuard) of the same object.
pub trait Mmu: InterruptControl {
    /// Pointer through which the kernel reaches `page` right now.
    ///
    /// With paging disabled this is the physical address of the same number.
    /// The pointer is only meaningful while `page` is mapped (or paging is off).
    fn page_ptr(&self, page: VirtualPage) -> *mut u8;

    /// `CR0.PG`.
    fn paging_enabled(&self) -> bool;

    /// The directory frame in `CR3`.
    fn active_directory(&self) -> PhysicalPage;

    /// Load `CR3`, which also drops every non-global TLB entry.
    ///
    /// # Safety
    /// With paging enabled, `directory` must map the code, stack and data the
    /// caller continues to use.
    unsafe fn load_directory(&self, directory: PhysicalPage);

    /// Set `CR0.PG`.
    ///
    /// # Safety
    /// `CR3` must hold a directory that identity-maps the executing code.
    unsafe fn enable_paging(&self);

    /// Clear `CR0.PG`.
    ///
    /// # Safety
    /// The executing code and every pointer still in use must be identity mapped.
    unsafe fn disable_paging(&self);

    /// `invlpg`: drop any cached translation of `page`.
    fn invalidate_page(&self, page: VirtualPage);

    /// Drop every non-global cached translation (reload `CR3`).
    fn flush_tlb(&self);

    /// `CR2`: the linear address of the last page fault.
    fn fault_address(&self) -> VirtualAddress;
}

impl<T: Mmu + ?Sized> Mmu for &T {
    #[inline]
    fn page_ptr(&self, page: VirtualPage) -> *mut u8 {
        (**self).page_ptr(page)
    }

    #[inline]
    fn paging_enabled(&self) -> bool {
        (**self).paging_enabled()
    }

    #[inline]
    fn active_directory(&self) -> PhysicalPage {
        (**self).active_directory()
    }

    #[inline]
    unsafe fn load_directory(&self, directory: PhysicalPage) {
        unsafe { (**self).load_directory(directory) }
    }

    #[inline]
    unsafe fn enable_paging(&self) {
        unsafe { (**self).enable_paging() }
    }

    #[inline]
    unsafe fn disable_paging(&self) {
        unsafe { (**self).disable_paging() }
    }

    #[inline]
    fn invalidate_page(&self, page: VirtualPage) {
        (**self).invalidate_page(page);
    }

    #[inline]
    fn flush_tlb(&self) {
        (**self).flush_tlb();
    }

    #[inline]
    fn fault_address(&self) -> VirtualAddress {
        (**self).fault_address()
    }
}

/// The paging unit of the executing i386 processor.
///
/// Must only be used in ring 0.
#[derive(Debug, Default, Copy, Clone)]
pub struct HardwareMmu;

#[cfg(target_arch = "x86")]
mod hardware {
    use super::{HardwareMmu, Mmu};
    use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
    use kernel_registers::cr0::Cr0;
    use kernel_registers::cr2::Cr2;
    use kernel_registers::cr3::Cr3;
    use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
    use kernel_sync::{HardwareInterrupts, InterruptControl};

    impl InterruptControl for HardwareMmu {
        #[inline]
        fn interrupts_enabled(&self) -> bool {
            HardwareInterrupts.interrupts_enabled()
        }

        #[inline]
        fn disable_interrupts(&self) {
            HardwareInterrupts.disable_interrupts();
        }

        #[inline]
        fn enable_interrupts(&self) {
            HardwareInterrupts.enable_interrupts();
        }
    }

    impl Mmu for HardwareMmu {
        #[inline]
        fn page_ptr(&self, page: VirtualPage) -> *mut u8 {
            core::ptr::with_exposed_provenance_mut(page.base().as_u32() as usize)
        }

        #[inline]
        fn paging_enabled(&self) -> bool {
            unsafe { Cr0::load_unsafe() }.pg_paging()
        }

        #[inline]
        fn active_directory(&self) -> PhysicalPage {
            unsafe { Cr3::load_unsafe() }.directory()
        }

        unsafe fn load_directory(&self, directory: PhysicalPage) {
            unsafe { Cr3::from_directory(directory).store_unsafe() }
        }

        unsafe fn enable_paging(&self) {
            unsafe {
                let cr0 = Cr0::load_unsafe();
                cr0.with_pg_paging(true).store_unsafe();
            }
        }

        unsafe fn disable_paging(&self) {
            unsafe {
                let cr0 = Cr0::load_unsafe();
                cr0.with_pg_paging(false).store_unsafe();
            }
        }

        #[inline]
        fn invalidate_page(&self, page: VirtualPage) {
            let va = page.base().as_u32();
            unsafe {
                core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
            }
        }

        #[inline]
        fn flush_tlb(&self) {
            unsafe {
                let cr3 = Cr3::load_unsafe();
                cr3.store_unsafe();
            }
        }

        #[inline]
        fn fault_address(&self) -> VirtualAddress {
            unsafe { Cr2::load_unsafe() }.fault_address()
        }
    }
}
