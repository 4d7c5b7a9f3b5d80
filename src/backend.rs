use std::sync::Mutex;

/// A byte-addressable register region. One instance per MMIO/port region
/// (`bridge`, `uart`, `local`); the register façade in [`crate::regs`] is
/// generic over this trait so the exact same offset/field code runs against
/// real hardware and against the in-memory fake used by every test.
pub trait Backend: Send + Sync {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
    fn read8(&self, offset: usize) -> u8;
    fn write8(&self, offset: usize, value: u8);
}

/// Real MMIO/port-mapped backend. The caller guarantees `base` points at a
/// region of at least `len` bytes mapped for this device and not aliased by
/// anything else, for the lifetime of the `MmioBackend`.
pub struct MmioBackend {
    base: *mut u8,
    len: usize,
}

// SAFETY: callers of `new` promise `base` is a stable mapping for the life of
// this value; access is volatile and unsynchronized reordering is prevented
// by the fences below, matching the CSR facade this is modeled on.
unsafe impl Send for MmioBackend {}
unsafe impl Sync for MmioBackend {}

impl MmioBackend {
    /// # Safety
    /// `base` must point at a valid MMIO mapping of at least `len` bytes that
    /// lives for as long as this `MmioBackend` does, and must not be accessed
    /// through any other alias.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    fn check(&self, offset: usize, width: usize) {
        assert!(offset + width <= self.len, "register offset {offset} out of range");
    }
}

impl Backend for MmioBackend {
    fn read32(&self, offset: usize) -> u32 {
        self.check(offset, 4);
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        unsafe { (self.base.add(offset) as *const u32).read_volatile() }
    }

    fn write32(&self, offset: usize, value: u32) {
        self.check(offset, 4);
        unsafe { (self.base.add(offset) as *mut u32).write_volatile(value) };
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    fn read8(&self, offset: usize) -> u8 {
        self.check(offset, 1);
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        unsafe { self.base.add(offset).read_volatile() }
    }

    fn write8(&self, offset: usize, value: u8) {
        self.check(offset, 1);
        unsafe { self.base.add(offset).write_volatile(value) };
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }
}

/// In-memory stand-in for a register region, used by every test and by the
/// UART's "no hardware" echo mode. Reads/writes just touch a byte vector;
/// callers can additionally script interrupt-cause and status values through
/// the helper methods on the concrete fakes in each engine's test module.
pub struct FakeBackend {
    mem: Mutex<Vec<u8>>,
}

impl FakeBackend {
    pub fn new(len: usize) -> Self {
        Self { mem: Mutex::new(vec![0u8; len]) }
    }

    /// Directly poke a 32-bit value, e.g. to script a bridge/DMA status
    /// register for a test without going through a write accessor.
    pub fn poke32(&self, offset: usize, value: u32) {
        self.write32(offset, value);
    }

    pub fn peek32(&self, offset: usize) -> u32 {
        self.read32(offset)
    }
}

impl Backend for FakeBackend {
    fn read32(&self, offset: usize) -> u32 {
        let mem = self.mem.lock().unwrap();
        u32::from_le_bytes(mem[offset..offset + 4].try_into().unwrap())
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut mem = self.mem.lock().unwrap();
        mem[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn read8(&self, offset: usize) -> u8 {
        let mem = self.mem.lock().unwrap();
        mem[offset]
    }

    fn write8(&self, offset: usize, value: u8) {
        let mut mem = self.mem.lock().unwrap();
        mem[offset] = value;
    }
}
