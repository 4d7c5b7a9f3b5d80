//! Scatter-gather DMA engine: descriptor chain allocation, arm/abort,
//! completion interrupt handling, and buffer-at-a-time progress waits.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::config::{DMA_ABORT_WAIT_TICKS, PAGE_SIZE};
use crate::error::{DriverError, Result};
use crate::mapping::MapGate;
use crate::regs::bridge::{self, BridgeRegs};
use crate::regs::local::{self, LocalRegs};

const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaWakeMode {
    EachBuffer,
    OnEnd,
}

#[derive(Debug, Clone, Copy)]
pub struct DmaConfig {
    pub total: u32,
    pub buflen: u32,
    pub timeout: Duration,
    pub maxever: u32,
    pub mode: DmaWakeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaRunStatus {
    Idle,
    Running,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct DmaStatus {
    pub transferred: u32,
    pub status: DmaRunStatus,
    pub cur: u32,
    pub next: u32,
}

struct SglEntry {
    pci_addr: u32,
    #[allow(dead_code)]
    local_addr: u32,
    size: u32,
    #[allow(dead_code)]
    link_bits: u32,
    cpu_ptr: *mut u8,
}

// SAFETY: the buffers an SglEntry points into outlive the entry (they're
// owned by the same `DmaEngine`, freed only after the entry vector is
// dropped), and are never aliased mutably outside `fault()`'s read path.
unsafe impl Send for SglEntry {}

struct Pool {
    buflen: u32,
    maxever: u32,
    sm_buflen: u32,
    buffers: Vec<Vec<u8>>,
}

struct DmaState {
    pool: Option<Pool>,
    cfg: Option<DmaConfig>,
    sgl: Vec<SglEntry>,
    cur: u32,
    next: u32,
    done: bool,
    aborting: bool,
}

pub struct DmaEngine {
    bridge_backend: Arc<dyn crate::backend::Backend>,
    local_backend: Arc<dyn crate::backend::Backend>,
    state: Mutex<DmaState>,
    done_cv: Condvar,
    map_gate: Arc<MapGate>,
}

impl DmaEngine {
    pub fn new(
        bridge_backend: Arc<dyn crate::backend::Backend>,
        local_backend: Arc<dyn crate::backend::Backend>,
        map_gate: Arc<MapGate>,
    ) -> Self {
        Self {
            bridge_backend,
            local_backend,
            state: Mutex::new(DmaState {
                pool: None,
                cfg: None,
                sgl: Vec::new(),
                cur: 0,
                next: 0,
                done: false,
                aborting: false,
            }),
            done_cv: Condvar::new(),
            map_gate,
        }
    }

    fn bridge(&self) -> BridgeRegs<'_> {
        BridgeRegs::new(self.bridge_backend.as_ref())
    }

    fn local(&self) -> LocalRegs<'_> {
        LocalRegs::new(self.local_backend.as_ref())
    }

    pub fn configure(&self, cfg: DmaConfig) -> Result<()> {
        self.map_gate.wait_drained(crate::config::VMACLOSE_TIMEOUT)?;

        let mut state = self.state.lock().unwrap();

        let existing_pool = state.pool.as_ref().map(|p| PoolLimits { buflen: p.buflen, maxever: p.maxever });
        let nbuf = validate(&cfg, existing_pool)?;

        let sm_buflen = div_ceil(cfg.buflen, PAGE_SIZE) * PAGE_SIZE;
        if state.pool.is_none() {
            let count = div_ceil(cfg.maxever, cfg.buflen);
            let buffers = (0..count).map(|_| vec![0u8; sm_buflen as usize]).collect();
            state.pool = Some(Pool { buflen: cfg.buflen, maxever: cfg.maxever, sm_buflen, buffers });
        }

        let pool = state.pool.as_mut().expect("pool just established above");
        let mut sgl = Vec::with_capacity(nbuf as usize);
        for i in 0..nbuf {
            let is_last = i == nbuf - 1;
            let remainder = cfg.total - cfg.buflen * i;
            let size = if is_last { if remainder == 0 { cfg.buflen } else { remainder } } else { cfg.buflen };
            let mut link_bits = bridge::DESC_SOURCE_PCI | bridge::DESC_DIRECTION_TO_PCI;
            if cfg.mode == DmaWakeMode::EachBuffer {
                link_bits |= bridge::DESC_INTR_AT_END;
            }
            if is_last {
                link_bits |= bridge::DESC_END_OF_CHAIN | bridge::DESC_INTR_AT_END;
            }
            let cpu_ptr = pool.buffers[i as usize].as_mut_ptr();
            // Synthetic bus address: the fake backend and every test key off
            // this value, real hardware would supply it from the platform's
            // DMA-coherent allocator (out of scope for this core).
            let pci_addr = 0x1000_0000u32.wrapping_add(i * sm_buflen);
            sgl.push(SglEntry { pci_addr, local_addr: local::FIFO_PORT_ADDR, size, link_bits, cpu_ptr });
        }

        state.sgl = sgl;
        state.cfg = Some(cfg);
        state.cur = 0;
        state.next = 0;
        state.done = false;
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        if self.bridge().dma_channel_enabled() {
            self.abort()?;
        }
        let mut state = self.state.lock().unwrap();
        let cfg = state.cfg.ok_or(DriverError::Config("DMA not configured"))?;
        if state.sgl.is_empty() {
            return Err(DriverError::Config("DMA not configured"));
        }
        self.local().set_pixel_counter(cfg.total / 2);
        self.local().reset_command();
        state.done = false;
        state.aborting = false;
        state.cur = 0;
        state.next = 0;
        let first_addr = state.sgl[0].pci_addr;
        drop(state);

        let bridge = self.bridge();
        bridge.set_dma0_mode(bridge::DMA0_START_MODE);
        bridge.set_dma0_desc_ptr(first_addr | bridge::DESC_PTR_IN_PCI_SPACE);
        bridge.set_dma_channel_enable(true);
        bridge.set_master_enable(true);
        bridge.set_dma_channel_start();
        Ok(())
    }

    pub fn abort(&self) -> Result<DmaStatus> {
        let was_running = self.bridge().dma_channel_enabled();
        {
            let mut state = self.state.lock().unwrap();
            state.aborting = true;
        }
        self.bridge().set_dma_channel_abort();
        if was_running {
            let state = self.state.lock().unwrap();
            let (state, timeout) = self
                .done_cv
                .wait_timeout_while(state, TICK * DMA_ABORT_WAIT_TICKS, |s| !s.done)
                .unwrap();
            if timeout.timed_out() && !state.done {
                drop(state);
                return Err(DriverError::WouldBlock);
            }
        }
        {
            let mut state = self.state.lock().unwrap();
            state.aborting = false;
        }
        Ok(self.status())
    }

    pub fn status(&self) -> DmaStatus {
        let state = self.state.lock().unwrap();
        let total = state.cfg.map(|c| c.total).unwrap_or(0);
        let target_addr = self.bridge().dma0_pci_addr();
        let mut transferred = 0u32;
        for entry in &state.sgl {
            if entry.pci_addr == target_addr {
                transferred = (transferred + entry.size).min(total);
                break;
            }
            transferred += entry.size;
        }
        let run_status = if state.done {
            DmaRunStatus::Done
        } else if state.cfg.is_some() && self.bridge().dma_channel_enabled() {
            DmaRunStatus::Running
        } else {
            DmaRunStatus::Idle
        };
        DmaStatus { transferred: transferred.min(total), status: run_status, cur: state.cur, next: state.next }
    }

    /// Waits for DMA progress using the `timeout` recorded by the preceding
    /// `configure()` call (spec.md §3: "timeout (ticks to wait in
    /// `dma_next`)"), not a driver-wide default.
    pub fn next_buffer(&self) -> Result<DmaStatus> {
        let (mode, timeout) = {
            let state = self.state.lock().unwrap();
            let cfg = state.cfg.ok_or(DriverError::Config("DMA not configured"))?;
            (cfg.mode, cfg.timeout)
        };
        let state = self.state.lock().unwrap();
        let (mut state, timed_out) = self
            .done_cv
            .wait_timeout_while(state, timeout, |s| match mode {
                DmaWakeMode::EachBuffer => s.next >= s.cur && !s.done,
                DmaWakeMode::OnEnd => !s.done,
            })
            .unwrap();
        let progressed = match mode {
            DmaWakeMode::EachBuffer => state.next < state.cur || state.done,
            DmaWakeMode::OnEnd => state.done,
        };
        if timed_out.timed_out() && !progressed {
            return Err(DriverError::WouldBlock);
        }
        state.next += 1;
        drop(state);
        Ok(self.status())
    }

    /// Five-step sequence of spec §4.3, run from the bottom half after a
    /// DMA-0 interrupt with the done-to-PCI mode bit set.
    pub fn service_interrupt(&self) {
        let bridge = self.bridge();
        if bridge.rf_done_to_pci() == 0 {
            return;
        }
        let done = bridge.dma_done();
        let mode = {
            let mut state = self.state.lock().unwrap();
            if done {
                bridge.clear_dma_interrupt();
                self.local().reset_command();
                let counter = self.local().read_pixel_counter();
                if counter != 0 && !state.aborting {
                    log::warn!("DMA completed with nonzero pixel counter readback: {counter}");
                }
                state.done = true;
            } else {
                bridge.clear_dma_interrupt();
            }
            state.cur += 1;
            state.cfg.map(|c| c.mode)
        };
        match mode {
            Some(DmaWakeMode::EachBuffer) => self.done_cv.notify_all(),
            Some(DmaWakeMode::OnEnd) => {
                if done {
                    self.done_cv.notify_all();
                }
            }
            None => {}
        }
    }

    /// Drops the SGL and its backing buffers once no user mapping remains.
    pub fn free(&self) -> Result<()> {
        self.map_gate.wait_drained(crate::config::VMACLOSE_TIMEOUT)?;
        let mut state = self.state.lock().unwrap();
        state.sgl.clear();
        state.pool = None;
        state.cfg = None;
        state.cur = 0;
        state.next = 0;
        state.done = false;
        Ok(())
    }

    /// `RESET` ioctl: write 0 to the local command register directly,
    /// independent of any configured transfer.
    pub fn reset_local_command(&self) {
        self.local().reset_command();
    }

    pub fn dma_nbuf(&self) -> usize {
        self.state.lock().unwrap().sgl.len()
    }

    pub fn sm_buflen(&self) -> u32 {
        self.state.lock().unwrap().pool.as_ref().map(|p| p.sm_buflen).unwrap_or(0)
    }

    /// Raw CPU pointers for every active SGL entry, for the mapping layer's
    /// page-fault resolution.
    pub fn sgl_pages(&self) -> Vec<*mut u8> {
        self.state.lock().unwrap().sgl.iter().map(|e| e.cpu_ptr).collect()
    }
}

/// The two pool dimensions a reconfigure must not violate.
struct PoolLimits {
    buflen: u32,
    maxever: u32,
}

/// `DmaConfig` boundary checks from spec.md §4.3/§8, independent of any
/// locked engine state so a test can enumerate them directly: `buflen` at
/// least `PAGE_SIZE`, `nbuf*buflen` within the signed 31-bit range the
/// bridge's descriptor pointer field can address, and — when a permanent
/// pool already exists — `maxever` no larger than what it was sized for and
/// `buflen` unchanged from the allocated value. Returns the descriptor count
/// (`nbuf`) on success.
fn validate(cfg: &DmaConfig, existing_pool: Option<PoolLimits>) -> Result<u32> {
    if cfg.buflen < PAGE_SIZE {
        return Err(DriverError::Config("buflen below PAGE_SIZE"));
    }
    let nbuf = div_ceil(cfg.total, cfg.buflen);
    let span = nbuf as u64 * cfg.buflen as u64;
    if span > 0x7FFF_FFFF {
        return Err(DriverError::Config("total/buflen combination overflows 31-bit range"));
    }
    let pool_maxever = match existing_pool {
        Some(pool) => {
            if cfg.maxever > pool.maxever {
                return Err(DriverError::Resource("maxever exceeds allocated permanent pool"));
            }
            if cfg.buflen != pool.buflen {
                return Err(DriverError::Config("buflen differs from the allocated buflen"));
            }
            pool.maxever
        }
        None => cfg.maxever,
    };
    let pool_nbuf = div_ceil(pool_maxever, cfg.buflen);
    if nbuf > pool_nbuf {
        return Err(DriverError::Resource("total exceeds permanent pool"));
    }
    Ok(nbuf)
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}


trait DmaModeExt {
    fn rf_done_to_pci(&self) -> u32;
}

impl<'a> DmaModeExt for BridgeRegs<'a> {
    fn rf_done_to_pci(&self) -> u32 {
        if self.dma0_mode() & (1 << 17) != 0 {
            1
        } else {
            0
        }
    }
}
