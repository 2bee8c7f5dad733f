//! CCU register window
//!
//! Every CCU occupies one contiguous window of 32-bit registers. The engine
//! only ever addresses it by byte offset from the window base.

/// Byte offset of the write-access ("password") register in every CCU.
pub const WR_ACCESS_OFFSET: u32 = 0;

/// A readable and writable window of 32-bit registers.
pub trait RegisterWindow {
    /// Read the register at `offset` bytes from the window base.
    fn read(&mut self, offset: u32) -> u32;

    /// Write the register at `offset` bytes from the window base.
    fn write(&mut self, offset: u32, value: u32);

    /// Read-modify-write helper.
    #[inline]
    fn modify(&mut self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let val = self.read(offset);
        self.write(offset, f(val));
    }
}

impl<T: RegisterWindow + ?Sized> RegisterWindow for &mut T {
    #[inline]
    fn read(&mut self, offset: u32) -> u32 {
        T::read(self, offset)
    }

    #[inline]
    fn write(&mut self, offset: u32, value: u32) {
        T::write(self, offset, value)
    }
}

/// Memory-mapped register window.
pub struct Mmio {
    base: *mut u32,
    range: u32,
}

// The window is only ever touched while its CCU lock is held.
unsafe impl Send for Mmio {}

impl Mmio {
    /// Wrap a mapped register window of `range` bytes.
    ///
    /// # Safety
    ///
    /// `base` must point to a valid, 4-byte aligned, device-mapped region of at least
    /// `range` bytes that nothing else accesses while this `Mmio` is alive.
    pub const unsafe fn new(base: *mut u32, range: u32) -> Self {
        Self { base, range }
    }

    /// Byte size of the window.
    pub const fn range(&self) -> u32 {
        self.range
    }

    #[inline]
    fn ptr(&self, offset: u32) -> *mut u32 {
        debug_assert!(offset % 4 == 0 && offset < self.range);
        self.base.wrapping_byte_add(offset as usize)
    }
}

impl RegisterWindow for Mmio {
    #[inline]
    fn read(&mut self, offset: u32) -> u32 {
        unsafe { core::ptr::read_volatile(self.ptr(offset)) }
    }

    #[inline]
    fn write(&mut self, offset: u32, value: u32) {
        unsafe { core::ptr::write_volatile(self.ptr(offset), value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmio_over_plain_memory() {
        let mut backing = [0u32; 8];
        let mut regs = unsafe { Mmio::new(backing.as_mut_ptr(), 32) };
        regs.write(4, 0x1234);
        regs.modify(4, |v| v | 0x8000_0000);
        assert_eq!(regs.read(4), 0x8000_1234);
        assert_eq!(regs.read(0), 0);
        drop(regs);
        assert_eq!(backing[1], 0x8000_1234);
    }
}
