/// Module parameters for a single device instance, passed at attach time.
/// Nothing here is a process-wide static: every `Device` carries its own copy.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Default per-SGL-entry size, in bytes.
    pub buflen: u32,
    /// Permanent pool cap: the highest `total` a `DMA_INIT` may ever request.
    pub maxever: u32,
    /// Default `DMA_NEXT` wait, in ticks.
    pub timeout: u32,
    /// Diagnostic bitmask; gates `log::debug!`/`log::trace!` call sites on
    /// top of whatever level the process's logger is already filtering at.
    pub verbose: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { buflen: 1_048_576, maxever: 33_554_432, timeout: 5_000, verbose: 0 }
    }
}

/// Wire-level UART parameters, as negotiated by `SET_SERIAL`/`GET_SERIAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartParams {
    pub baud: u32,
    pub bits: u8,
    pub parity: Parity,
    pub stop: u8,
    pub fifo_trigger: u8,
    pub buffer_size: u32,
    pub blocking: bool,
    pub timeout_ms: u32,
}

impl Default for UartParams {
    fn default() -> Self {
        Self {
            baud: 57_600,
            bits: 8,
            parity: Parity::None,
            stop: 1,
            fifo_trigger: 8,
            buffer_size: 8192,
            blocking: true,
            timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

pub const PAGE_SIZE: u32 = 4096;
pub const VMACLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
pub const DMA_ABORT_WAIT_TICKS: u32 = 10;
