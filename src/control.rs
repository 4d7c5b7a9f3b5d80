//! Character-device-style control surface: one [`Control`] per `open()`,
//! sharing the underlying [`Device`]. Dispatches ioctls per spec §6 and
//! routes `read`/`write`/`poll`/`mmap` to the relevant engine.

use std::sync::Arc;
use std::time::Duration;

use crate::device::Device;
use crate::error::{DriverError, Result};
use crate::ioctl::{IoctlRequest, IoctlResponse, PollTarget};
use crate::mapping::MappingLayer;

/// One open file-descriptor-equivalent onto a [`Device`]. Multiple `Control`
/// handles may share one device concurrently; `Drop` mirrors `close()`.
pub struct Control {
    device: Arc<Device>,
    mapped: bool,
}

impl Control {
    pub fn open(device: Arc<Device>) -> Self {
        device.open();
        Self { device, mapped: false }
    }

    pub fn read(&self, buf: &mut [u8], blocking: bool, timeout: Duration) -> Result<usize> {
        self.device.uart().read_into(buf, blocking, timeout)
    }

    pub fn write(&self, buf: &[u8], blocking: bool, timeout: Duration) -> Result<usize> {
        self.device.uart().write_all(buf, blocking, timeout)
    }

    /// Returns `true` if the handle's selected condition ("readable") is
    /// currently set, without blocking. A real poll implementation would
    /// register with the OS wait-queue primitive; this core only exposes
    /// the non-blocking status check that primitive would query.
    pub fn poll(&self) -> bool {
        match self.device.poll_target() {
            PollTarget::Uart => self.device.uart().rx_count() > 0,
            PollTarget::Dma => {
                matches!(self.device.dma().status().status, crate::dma::DmaRunStatus::Done)
            }
        }
    }

    /// Map the DMA pool read-only into the caller's address space. Returns
    /// the base pointer the caller should treat as a `length`-byte region;
    /// actual page installation on fault is [`MappingLayer::fault`].
    pub fn mmap(&mut self, length: usize) -> Result<()> {
        let maxever = self.device.config().maxever as usize;
        if length > maxever {
            return Err(DriverError::Config("mmap length exceeds maxever"));
        }
        self.device.mapping().map_open();
        self.mapped = true;
        Ok(())
    }

    pub fn munmap(&mut self) {
        if self.mapped {
            self.device.mapping().map_close();
            self.mapped = false;
        }
    }

    pub fn resolve_fault(&self, offset: usize) -> Option<*mut u8> {
        let sm_buflen = self.device.dma().sm_buflen() as usize;
        let pages = self.device.dma().sgl_pages();
        MappingLayer::fault(offset, sm_buflen, &pages)
    }

    pub fn ioctl(&mut self, request: IoctlRequest) -> Result<IoctlResponse> {
        match request {
            IoctlRequest::Reset => {
                // Local command register reset goes through the DMA engine's
                // local-bus handle, the only owner of that register file.
                self.device.dma().reset_local_command();
                Ok(IoctlResponse::Unit)
            }
            IoctlRequest::SerialInStatus => Ok(IoctlResponse::Count(self.device.uart().rx_count())),
            IoctlRequest::SerialOutStatus => Ok(IoctlResponse::Count(self.device.uart().tx_free())),
            IoctlRequest::GetSerial => Ok(IoctlResponse::SerialParams(self.device.uart().get_params())),
            IoctlRequest::SetSerial(params) => {
                let applied = self.device.uart().set_params(params)?;
                Ok(IoctlResponse::SerialParams(applied))
            }
            IoctlRequest::SerialBreak(ms) => {
                self.device.uart().send_break(ms.min(1000));
                Ok(IoctlResponse::Unit)
            }
            IoctlRequest::SerialClear => {
                self.device.uart().clear();
                Ok(IoctlResponse::Unit)
            }
            IoctlRequest::DmaInit(cfg) => {
                self.device.dma().configure(cfg)?;
                Ok(IoctlResponse::Unit)
            }
            IoctlRequest::DmaStart => {
                self.device.dma().start()?;
                Ok(IoctlResponse::Dma(self.device.dma().status()))
            }
            IoctlRequest::DmaStatus => Ok(IoctlResponse::Dma(self.device.dma().status())),
            IoctlRequest::DmaNext => {
                let status = self.device.dma().next_buffer()?;
                Ok(IoctlResponse::Dma(status))
            }
            IoctlRequest::DmaAbort => {
                let status = self.device.dma().abort()?;
                Ok(IoctlResponse::Dma(status))
            }
            IoctlRequest::Verbose(level) => {
                self.device.set_verbose(level);
                Ok(IoctlResponse::Unit)
            }
            IoctlRequest::SetPoll(target) => {
                self.device.set_poll_target(target);
                Ok(IoctlResponse::Unit)
            }
            IoctlRequest::FreeMem => {
                self.device.dma().free()?;
                Ok(IoctlResponse::Unit)
            }
        }
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.munmap();
        self.device.close();
    }
}
