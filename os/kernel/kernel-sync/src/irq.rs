//! Scoped interrupt masking.
//!
//! Multi-step operations on shared memory-management state (the free-frame
//! stack, the scratch window, the active directory) must not be interleaved
//! with an interrupt handler touching the same state. [`IrqGuard`] disables
//! interrupts for a scope and restores the previous state on every exit path,
//! including early returns and unwinding.

/// Access to the interrupt-enable flag of the executing context.
///
/// On hardware this is `EFLAGS.IF` together with `cli`/`sti`
/// ([`HardwareInterrupts`]); tests and emulators provide their own flag.
///
/// # Privilege
///
/// Implementations for real hardware must only be used in contexts where
/// `cli`/`sti` are legal (ring 0).
pub trait InterruptControl {
    /// Whether maskable interrupts are currently delivered.
    fn interrupts_enabled(&self) -> bool;

    /// Stop delivering maskable interrupts (`cli`).
    fn disable_interrupts(&self);

    /// Resume delivering maskable interrupts (`sti`).
    fn enable_interrupts(&self);
}

impl<T: InterruptControl + ?Sized> InterruptControl for &T {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }

    #[inline]
    fn disable_interrupts(&self) {
        (**self).disable_interrupts();
    }

    #[inline]
    fn enable_interrupts(&self) {
        (**self).enable_interrupts();
    }
}

/// The interrupt flag of the executing i386 processor.
#[derive(Debug, Default, Copy, Clone)]
pub struct HardwareInterrupts;

/// Bit 9 of `EFLAGS`, the interrupt-enable flag.
pub const EFLAGS_IF: u32 = 1 << 9;

#[cfg(target_arch = "x86")]
impl HardwareInterrupts {
    /// Returns the current `EFLAGS` value (via `pushfd/pop`).
    #[inline]
    #[must_use]
    pub fn eflags() -> u32 {
        let r: u32;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(preserves_flags)) }
        r
    }
}

#[cfg(target_arch = "x86")]
impl InterruptControl for HardwareInterrupts {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        Self::eflags() & EFLAGS_IF != 0
    }

    #[inline]
    fn disable_interrupts(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable_interrupts(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt flag. If interrupts were enabled,
/// it disables them. On drop, it re-enables them **only** if they were
/// previously enabled, so guards nest correctly.
///
/// # Examples
///
/// ```
/// use core::cell::Cell;
/// use kernel_sync::{InterruptControl, IrqGuard};
///
/// struct Flag(Cell<bool>);
/// impl InterruptControl for Flag {
///     fn interrupts_enabled(&self) -> bool { self.0.get() }
///     fn disable_interrupts(&self) { self.0.set(false) }
///     fn enable_interrupts(&self) { self.0.set(true) }
/// }
///
/// let flag = Flag(Cell::new(true));
/// {
///     let _g = IrqGuard::new(&flag);
///     assert!(!flag.interrupts_enabled());
/// }
/// assert!(flag.interrupts_enabled());
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<'a, C: InterruptControl + ?Sized> {
    control: &'a C,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, C: InterruptControl + ?Sized> IrqGuard<'a, C> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    pub fn new(control: &'a C) -> Self {
        let were_enabled = control.interrupts_enabled();
        if were_enabled {
            control.disable_interrupts();
        }
        Self {
            control,
            were_enabled,
        }
    }

    /// Whether interrupts will be re-enabled when this guard is dropped.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl<C: InterruptControl + ?Sized> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.control.enable_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[derive(Default)]
    struct Flag {
        enabled: Cell<bool>,
        toggles: Cell<u32>,
    }

    impl InterruptControl for Flag {
        fn interrupts_enabled(&self) -> bool {
            self.enabled.get()
        }
        fn disable_interrupts(&self) {
            self.toggles.set(self.toggles.get() + 1);
            self.enabled.set(false);
        }
        fn enable_interrupts(&self) {
            self.toggles.set(self.toggles.get() + 1);
            self.enabled.set(true);
        }
    }

    #[test]
    fn nested_guards_restore_outer_state_only() {
        let flag = Flag::default();
        flag.enabled.set(true);
        {
            let outer = IrqGuard::new(&flag);
            assert!(outer.restores_interrupts());
            {
                let inner = IrqGuard::new(&flag);
                assert!(!inner.restores_interrupts());
            }
            assert!(!flag.interrupts_enabled(), "inner guard must not re-enable");
        }
        assert!(flag.interrupts_enabled());
        assert_eq!(flag.toggles.get(), 2);
    }

    #[test]
    fn guard_leaves_disabled_interrupts_alone() {
        let flag = Flag::default();
        drop(IrqGuard::new(&flag));
        assert!(!flag.interrupts_enabled());
        assert_eq!(flag.toggles.get(), 0);
    }

    #[test]
    fn early_return_restores() {
        fn fallible(flag: &Flag, fail: bool) -> Result<(), ()> {
            let _g = IrqGuard::new(flag);
            if fail {
                return Err(());
            }
            Ok(())
        }

        let flag = Flag::default();
        flag.enabled.set(true);
        assert!(fallible(&flag, true).is_err());
        assert!(flag.interrupts_enabled());
    }
}
