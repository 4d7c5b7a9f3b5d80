use thiserror::Error;

/// The five-kind error taxonomy the core surfaces through its read/write/ioctl
/// boundary. The interrupt bottom half never propagates these upward — it logs
/// and leaves device state consistent for the next call.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Bad argument to an ioctl, rejected before any state was touched.
    #[error("config error: {0}")]
    Config(&'static str),

    /// Allocation failed, or a request exceeds the permanent pool.
    #[error("resource error: {0}")]
    Resource(&'static str),

    /// A timeout expired on a suspension point. The caller may retry.
    #[error("would block")]
    WouldBlock,

    /// Bridge returned the low-power sentinel, a PCI abort was seen, or the
    /// pixel counter was nonzero at DMA completion. The operation still
    /// completes with best-effort status; this is logged at the call site.
    #[error("hardware fault: {0}")]
    HardwareFault(&'static str),
}

pub type Result<T> = core::result::Result<T, DriverError>;
