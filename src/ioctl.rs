//! Ioctl opcode table and payload types for the control surface, per spec §6.

use num_derive::{FromPrimitive, ToPrimitive};

use crate::config::{DriverConfig, UartParams};
use crate::dma::{DmaConfig, DmaStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum IoctlCmd {
    Reset = 0,
    SerialInStatus = 1,
    SerialOutStatus = 2,
    GetSerial = 3,
    SetSerial = 4,
    SerialBreak = 5,
    SerialClear = 6,
    DmaInit = 7,
    DmaStart = 8,
    DmaStatus = 9,
    DmaNext = 10,
    DmaAbort = 11,
    Verbose = 12,
    SetPoll = 13,
    FreeMem = 14,
}

/// Which wait condition `poll` selects, per `SETPOLL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTarget {
    Dma,
    Uart,
}

/// Payload carried by a single ioctl call, tagged by [`IoctlCmd`].
pub enum IoctlRequest {
    Reset,
    SerialInStatus,
    SerialOutStatus,
    GetSerial,
    SetSerial(UartParams),
    SerialBreak(u32),
    SerialClear,
    DmaInit(DmaConfig),
    DmaStart,
    DmaStatus,
    DmaNext,
    DmaAbort,
    Verbose(u32),
    SetPoll(PollTarget),
    FreeMem,
}

pub enum IoctlResponse {
    Unit,
    Count(usize),
    SerialParams(UartParams),
    Dma(DmaStatus),
}

impl IoctlRequest {
    pub fn cmd(&self) -> IoctlCmd {
        match self {
            IoctlRequest::Reset => IoctlCmd::Reset,
            IoctlRequest::SerialInStatus => IoctlCmd::SerialInStatus,
            IoctlRequest::SerialOutStatus => IoctlCmd::SerialOutStatus,
            IoctlRequest::GetSerial => IoctlCmd::GetSerial,
            IoctlRequest::SetSerial(_) => IoctlCmd::SetSerial,
            IoctlRequest::SerialBreak(_) => IoctlCmd::SerialBreak,
            IoctlRequest::SerialClear => IoctlCmd::SerialClear,
            IoctlRequest::DmaInit(_) => IoctlCmd::DmaInit,
            IoctlRequest::DmaStart => IoctlCmd::DmaStart,
            IoctlRequest::DmaStatus => IoctlCmd::DmaStatus,
            IoctlRequest::DmaNext => IoctlCmd::DmaNext,
            IoctlRequest::DmaAbort => IoctlCmd::DmaAbort,
            IoctlRequest::Verbose(_) => IoctlCmd::Verbose,
            IoctlRequest::SetPoll(_) => IoctlCmd::SetPoll,
            IoctlRequest::FreeMem => IoctlCmd::FreeMem,
        }
    }
}

/// Module parameters honoured at `DMA_INIT` time when the caller doesn't
/// override them; mirrors [`DriverConfig`]'s defaults.
pub fn default_dma_config(driver: &DriverConfig, total: u32) -> DmaConfig {
    use crate::dma::DmaWakeMode;
    DmaConfig {
        total,
        buflen: driver.buflen,
        timeout: std::time::Duration::from_millis(driver.timeout as u64),
        maxever: driver.maxever,
        mode: DmaWakeMode::OnEnd,
    }
}
