//! The root device entity: owns the three engines, dispatches the bridge
//! interrupt to a bottom-half worker, and tracks open-handle/poll-routing
//! state shared across every [`crate::control::Control`] handle.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::backend::Backend;
use crate::config::DriverConfig;
use crate::dma::DmaEngine;
use crate::ioctl::PollTarget;
use crate::mapping::{MapGate, MappingLayer};
use crate::regs::bridge::{self, BridgeRegs};
use crate::uart::UartEngine;

bitflags! {
    /// Decoded `INT_CTRL_STATUS` cause bits, spec §4.5.
    pub struct InterruptCause: u32 {
        const DOORBELL      = 1 << 0;
        const PCI_ABORT     = 1 << 1;
        const LOCAL1_UART   = 1 << 2;
        const DMA0          = 1 << 3;
        const DMA1          = 1 << 4;
        const OUTBOUND_POST = 1 << 5;
    }
}

/// The root device. One instance per attached card; cheap to clone via
/// `Arc` since every field is itself `Arc`/atomic.
pub struct Device {
    bridge_backend: Arc<dyn Backend>,
    uart: Arc<UartEngine>,
    dma: Arc<DmaEngine>,
    mapping: MappingLayer,
    map_gate: Arc<MapGate>,
    open_count: AtomicUsize,
    poll_target: Mutex<PollTarget>,
    verbose: AtomicU32,
    config: DriverConfig,
    bottom_half_tx: Sender<u32>,
}

impl Device {
    pub fn new(
        bridge_backend: Arc<dyn Backend>,
        uart_backend: Arc<dyn Backend>,
        local_backend: Arc<dyn Backend>,
        config: DriverConfig,
        test_echo: bool,
    ) -> Arc<Self> {
        let map_gate = MapGate::new();
        let uart = Arc::new(UartEngine::new(uart_backend, test_echo));
        let dma = Arc::new(DmaEngine::new(bridge_backend.clone(), local_backend, map_gate.clone()));
        let mapping = MappingLayer::new(map_gate.clone());
        let (tx, rx) = std::sync::mpsc::channel();

        let device = Arc::new(Self {
            bridge_backend,
            uart,
            dma,
            mapping,
            map_gate,
            open_count: AtomicUsize::new(0),
            poll_target: Mutex::new(PollTarget::Uart),
            verbose: AtomicU32::new(config.verbose),
            config,
            bottom_half_tx: tx,
        });

        spawn_bottom_half(device.clone(), rx);
        device
    }

    fn bridge(&self) -> BridgeRegs<'_> {
        BridgeRegs::new(self.bridge_backend.as_ref())
    }

    pub fn uart(&self) -> &UartEngine {
        &self.uart
    }

    pub fn dma(&self) -> &DmaEngine {
        &self.dma
    }

    pub fn mapping(&self) -> &MappingLayer {
        &self.mapping
    }

    pub fn map_gate(&self) -> &Arc<MapGate> {
        &self.map_gate
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn set_verbose(&self, level: u32) {
        self.verbose.store(level, Ordering::Relaxed);
    }

    pub fn verbose(&self) -> u32 {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn set_poll_target(&self, target: PollTarget) {
        *self.poll_target.lock().unwrap() = target;
    }

    pub fn poll_target(&self) -> PollTarget {
        *self.poll_target.lock().unwrap()
    }

    pub fn open(&self) {
        self.open_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `true` if this was the last open handle.
    pub fn close(&self) -> bool {
        let remaining = self.open_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let _ = self.dma.abort();
            if self.map_gate.active_count() != 0 {
                self.map_gate.force_clear();
            }
        }
        remaining == 0
    }

    /// IRQ top-half: decode cause bits and forward to the bottom half. Never
    /// blocks, never touches engine state directly — everything past the
    /// cause decode happens off the IRQ stack.
    pub fn handle_interrupt(&self) {
        let status = self.bridge().int_ctrl_status();
        if status == bridge::LOW_POWER_SENTINEL {
            return;
        }
        if !self.bridge().master_enabled() {
            return;
        }
        let mut cause = InterruptCause::empty();
        if status & (1 << bridge::DOORBELL_ACTIVE.shift) != 0 {
            cause |= InterruptCause::DOORBELL;
        }
        if status & (1 << bridge::PCI_ABORT_ACTIVE.shift) != 0 {
            cause |= InterruptCause::PCI_ABORT;
        }
        if status & (1 << bridge::LOCAL1_ACTIVE.shift) != 0 {
            cause |= InterruptCause::LOCAL1_UART;
        }
        if status & (1 << bridge::DMA0_ACTIVE.shift) != 0 {
            cause |= InterruptCause::DMA0;
        }
        if status & (1 << bridge::DMA1_ACTIVE.shift) != 0 {
            cause |= InterruptCause::DMA1;
        }
        if status & (1 << bridge::OUTBOUND_POST_ACTIVE.shift) != 0 {
            cause |= InterruptCause::OUTBOUND_POST;
        }
        if cause.is_empty() {
            return;
        }
        // Mask to prevent re-entry; the bottom half re-enables on completion.
        self.bridge().set_master_enable(false);
        let _ = self.bottom_half_tx.send(cause.bits());
    }

    fn service_bottom_half(&self, cause: InterruptCause) {
        if cause.contains(InterruptCause::LOCAL1_UART) {
            self.uart.service_interrupt();
        }
        if cause.contains(InterruptCause::DMA0) || cause.contains(InterruptCause::DMA1) {
            self.dma.service_interrupt();
        }
        if cause.contains(InterruptCause::PCI_ABORT) {
            log::error!("PCI abort reported by bridge");
        }
        self.bridge().set_master_enable(true);
    }
}

fn spawn_bottom_half(device: Arc<Device>, rx: Receiver<u32>) {
    std::thread::spawn(move || {
        while let Ok(bits) = rx.recv() {
            let cause = InterruptCause::from_bits_truncate(bits);
            device.service_bottom_half(cause);
        }
    });
}
