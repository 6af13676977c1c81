use core::fmt;

/// Byte output for debug text.
pub trait DebugSink {
    fn put_bytes(&self, bytes: &[u8]);
}

impl<S: DebugSink + ?Sized> DebugSink for &S {
    fn put_bytes(&self, bytes: &[u8]) {
        (**self).put_bytes(bytes);
    }
}

/// QEMU's debug console, I/O port `0x402`.
#[derive(Debug, Default, Copy, Clone)]
pub struct QemuDebugPort;

impl QemuDebugPort {
    pub const PORT: u16 = 0x402;
}

impl DebugSink for QemuDebugPort {
    #[inline]
    fn put_bytes(&self, bytes: &[u8]) {
        #[cfg(all(feature = "enabled", target_os = "none", target_arch = "x86"))]
        for &b in bytes {
            // Safety: port 0x402 has no side effects beyond QEMU's debug console.
            unsafe { outb(Self::PORT, b) }
        }
        #[cfg(not(all(feature = "enabled", target_os = "none", target_arch = "x86")))]
        let _ = bytes;
    }
}

#[cfg(all(feature = "enabled", target_os = "none", target_arch = "x86"))]
#[allow(clippy::inline_always)]
#[inline(always)]
unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
        );
    }
}

/// `fmt::Write` over a [`DebugSink`], no buffering.
pub struct SinkWriter<'a, S: DebugSink + ?Sized>(&'a S);

impl<'a, S: DebugSink + ?Sized> SinkWriter<'a, S> {
    pub const fn new(sink: &'a S) -> Self {
        Self(sink)
    }
}

impl<S: DebugSink + ?Sized> fmt::Write for SinkWriter<'_, S> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.put_bytes(s.as_bytes());
        Ok(())
    }
}
