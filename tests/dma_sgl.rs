//! Scatter-gather list layout invariants: spec §8's `configure()` boundary
//! cases and the happy-path/wake-each scenarios.

use std::sync::Arc;
use std::time::Duration;

use ccd_bridge_core::backend::FakeBackend;
use ccd_bridge_core::dma::{DmaConfig, DmaEngine, DmaRunStatus, DmaWakeMode};
use ccd_bridge_core::mapping::MapGate;

fn engine() -> (DmaEngine, Arc<FakeBackend>, Arc<FakeBackend>) {
    let bridge = Arc::new(FakeBackend::new(256));
    let local = Arc::new(FakeBackend::new(64));
    let gate = MapGate::new();
    let dma = DmaEngine::new(bridge.clone(), local.clone(), gate);
    (dma, bridge, local)
}

fn cfg(total: u32, buflen: u32, mode: DmaWakeMode) -> DmaConfig {
    DmaConfig { total, buflen, timeout: Duration::from_millis(500), maxever: 33_554_432, mode }
}

#[test]
fn configure_splits_into_expected_buffer_count() {
    let (dma, _bridge, _local) = engine();
    dma.configure(cfg(2_097_152, 1_048_576, DmaWakeMode::OnEnd)).unwrap();
    assert_eq!(dma.dma_nbuf(), 2);
}

#[test]
fn last_entry_takes_the_remainder() {
    let (dma, _bridge, _local) = engine();
    // 3 buffers of 1 MiB plus a half-size remainder.
    dma.configure(cfg(3 * 1_048_576 + 512_000, 1_048_576, DmaWakeMode::OnEnd)).unwrap();
    assert_eq!(dma.dma_nbuf(), 4);
}

#[test]
fn exact_multiple_keeps_uniform_size() {
    let (dma, _bridge, _local) = engine();
    dma.configure(cfg(4 * 1_048_576, 1_048_576, DmaWakeMode::OnEnd)).unwrap();
    assert_eq!(dma.dma_nbuf(), 4);
}

#[test]
fn buflen_below_page_size_is_rejected() {
    let (dma, _bridge, _local) = engine();
    assert!(dma.configure(cfg(4096, 1024, DmaWakeMode::OnEnd)).is_err());
}

#[test]
fn reconfigure_with_larger_maxever_is_rejected() {
    let (dma, _bridge, _local) = engine();
    dma.configure(cfg(1_048_576, 1_048_576, DmaWakeMode::OnEnd)).unwrap();
    let mut second = cfg(1_048_576, 1_048_576, DmaWakeMode::OnEnd);
    second.maxever = 67_108_864;
    assert!(dma.configure(second).is_err());
}

#[test]
fn configure_is_idempotent_before_start() {
    let (dma, _bridge, _local) = engine();
    let c = cfg(2_097_152, 1_048_576, DmaWakeMode::OnEnd);
    dma.configure(c).unwrap();
    dma.configure(c).unwrap();
    assert_eq!(dma.dma_nbuf(), 2);
}

#[test]
fn dma_happy_path_wake_on_end() {
    let (dma, bridge, local) = engine();
    dma.configure(cfg(2_097_152, 1_048_576, DmaWakeMode::OnEnd)).unwrap();
    dma.start().unwrap();

    // First descriptor completes: not the end of chain.
    dma.service_interrupt();
    assert_eq!(dma.status().cur, 1);
    assert_eq!(dma.status().status, DmaRunStatus::Running);

    // Second (final) descriptor completes with the done bit set.
    set_dma_done(&bridge, true);
    dma.service_interrupt();

    let status = dma.next_buffer().unwrap();
    assert_eq!(status.status, DmaRunStatus::Done);
    assert_eq!(status.transferred, 2_097_152);
    assert_eq!(status.cur, 2);
    let _ = local;
}

#[test]
fn dma_wake_each_reports_progress_per_buffer() {
    let (dma, bridge, _local) = engine();
    dma.configure(cfg(2_097_152, 1_048_576, DmaWakeMode::EachBuffer)).unwrap();
    dma.start().unwrap();

    dma.service_interrupt();
    let first = dma.next_buffer().unwrap();
    assert_eq!(first.cur, 1);
    assert_eq!(first.next, 1);

    set_dma_done(&bridge, true);
    dma.service_interrupt();
    let second = dma.next_buffer().unwrap();
    assert_eq!(second.cur, 2);
    assert_eq!(second.next, 2);
    assert_eq!(second.status, DmaRunStatus::Done);
}

fn set_dma_done(bridge: &FakeBackend, done: bool) {
    use ccd_bridge_core::regs::bridge::DMA_CMD_STATUS;
    let current = bridge.peek32(DMA_CMD_STATUS.offset);
    let bit = 1u32 << 4; // DMA_CHANNEL_DONE
    bridge.poke32(DMA_CMD_STATUS.offset, if done { current | bit } else { current & !bit });
}
