//! Tracks live user-space mappings of the DMA pool and resolves page faults
//! against the scatter-gather list. Reconfiguration and teardown of the DMA
//! engine block on the same drained condition this module owns.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{DriverError, Result};

/// Shared between [`crate::dma::DmaEngine`] and [`MappingLayer`] without ever
/// nesting the DMA lock and this one: callers release one before acquiring
/// the other.
pub struct MapGate {
    active: Mutex<u32>,
    drained: Condvar,
}

impl MapGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { active: Mutex::new(0), drained: Condvar::new() })
    }

    pub fn open(&self) {
        let mut active = self.active.lock().unwrap();
        *active += 1;
    }

    pub fn close(&self) {
        let mut active = self.active.lock().unwrap();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.drained.notify_all();
        }
    }

    pub fn active_count(&self) -> u32 {
        *self.active.lock().unwrap()
    }

    /// Block until no mapping remains, up to `timeout`. Used by DMA
    /// reconfiguration and `free()`.
    pub fn wait_drained(&self, timeout: Duration) -> Result<()> {
        let active = self.active.lock().unwrap();
        if *active == 0 {
            return Ok(());
        }
        let (active, timed_out) =
            self.drained.wait_timeout_while(active, timeout, |a| *a != 0).unwrap();
        if timed_out.timed_out() || *active != 0 {
            return Err(DriverError::WouldBlock);
        }
        Ok(())
    }

    /// Close-time last resort: force the counter to zero regardless of
    /// actual outstanding mappings, logging the anomaly.
    pub fn force_clear(&self) {
        let mut active = self.active.lock().unwrap();
        if *active != 0 {
            log::warn!("forcing {} live DMA mapping(s) closed on device teardown", *active);
            *active = 0;
            self.drained.notify_all();
        }
    }
}

/// Resolves user-space page faults against the DMA pool's scatter list.
pub struct MappingLayer {
    gate: Arc<MapGate>,
}

impl MappingLayer {
    pub fn new(gate: Arc<MapGate>) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> Arc<MapGate> {
        self.gate.clone()
    }

    pub fn map_open(&self) {
        self.gate.open();
    }

    pub fn map_close(&self) {
        self.gate.close();
    }

    pub fn active_count(&self) -> u32 {
        self.gate.active_count()
    }

    /// Resolve a byte offset into the pool to a backing address, given the
    /// per-buffer stride `sm_buflen` and the currently configured SGL. Faults
    /// landing past `dma_nbuf` entries fail with `None`.
    pub fn fault(offset: usize, sm_buflen: usize, sgl_pages: &[*mut u8]) -> Option<*mut u8> {
        if sm_buflen == 0 {
            return None;
        }
        let nbuf = offset / sm_buflen;
        let loff = offset % sm_buflen;
        let base = *sgl_pages.get(nbuf)?;
        Some(unsafe { base.add(loff) })
    }
}
