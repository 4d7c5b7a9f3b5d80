//! In-memory hardware stand-ins, shared between this crate's own unit tests
//! and the scenario tests under `tests/`. Not wired into any real attach
//! path; exists purely so the engines above can be exercised without a card.

use std::sync::Mutex;

use crate::backend::Backend;
use crate::regs::uart16550::{IER_DLH, IIR_FCR, LCR, LCR_DLAB, LSR, MCR, RBR_THR_DLL};

struct Inner {
    lcr: u8,
    mcr: u8,
    ier: u8,
    dll: u8,
    dlh: u8,
    rx: std::collections::VecDeque<u8>,
    tx_log: Vec<u8>,
    tx_empty_pending: bool,
    line_status_pending: bool,
    modem_pending: bool,
}

/// A small self-consistent 16550 simulator: an RX queue that drives
/// LSR/IIR the way real silicon would, and a TX log capturing everything
/// the engine ever pushed out via THR.
pub struct FakeUartBackend {
    inner: Mutex<Inner>,
}

impl FakeUartBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lcr: 0,
                mcr: 0,
                ier: 0,
                dll: 0,
                dlh: 0,
                rx: std::collections::VecDeque::new(),
                tx_log: Vec::new(),
                tx_empty_pending: false,
                line_status_pending: false,
                modem_pending: false,
            }),
        }
    }

    pub fn push_rx_bytes(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    pub fn set_tx_empty_pending(&self, pending: bool) {
        self.inner.lock().unwrap().tx_empty_pending = pending;
    }

    pub fn set_line_status_pending(&self, pending: bool) {
        self.inner.lock().unwrap().line_status_pending = pending;
    }

    pub fn tx_log(&self) -> Vec<u8> {
        self.inner.lock().unwrap().tx_log.clone()
    }
}

impl Default for FakeUartBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FakeUartBackend {
    fn read32(&self, _offset: usize) -> u32 {
        0
    }

    fn write32(&self, _offset: usize, _value: u32) {}

    fn read8(&self, offset: usize) -> u8 {
        let mut inner = self.inner.lock().unwrap();
        match offset {
            LCR => inner.lcr,
            MCR => inner.mcr,
            RBR_THR_DLL => {
                if inner.lcr & LCR_DLAB != 0 {
                    inner.dll
                } else {
                    inner.rx.pop_front().unwrap_or(0)
                }
            }
            IER_DLH => {
                if inner.lcr & LCR_DLAB != 0 {
                    inner.dlh
                } else {
                    inner.ier
                }
            }
            LSR => {
                use crate::regs::uart16550::{LSR_DATA_READY, LSR_THRE};
                inner.line_status_pending = false;
                let mut lsr = LSR_THRE;
                if !inner.rx.is_empty() {
                    lsr |= LSR_DATA_READY;
                }
                lsr
            }
            crate::regs::uart16550::MSR => {
                inner.modem_pending = false;
                0
            }
            IIR_FCR => {
                use crate::regs::uart16550::*;
                if inner.line_status_pending {
                    IIR_ID_LINE_STATUS
                } else if !inner.rx.is_empty() {
                    IIR_ID_RX_AVAILABLE
                } else if inner.tx_empty_pending {
                    inner.tx_empty_pending = false;
                    IIR_ID_TX_EMPTY
                } else if inner.modem_pending {
                    IIR_ID_MODEM
                } else {
                    IIR_NO_PENDING
                }
            }
            _ => 0,
        }
    }

    fn write8(&self, offset: usize, value: u8) {
        let mut inner = self.inner.lock().unwrap();
        match offset {
            LCR => inner.lcr = value,
            MCR => inner.mcr = value,
            RBR_THR_DLL => {
                if inner.lcr & LCR_DLAB != 0 {
                    inner.dll = value;
                } else {
                    inner.tx_log.push(value);
                }
            }
            IER_DLH => {
                if inner.lcr & LCR_DLAB != 0 {
                    inner.dlh = value;
                } else {
                    inner.ier = value;
                }
            }
            IIR_FCR => {}
            _ => {}
        }
    }
}
