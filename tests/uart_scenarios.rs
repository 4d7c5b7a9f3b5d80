//! UART scenarios from spec §8: echo delivery, overflow drop, and the
//! set/get round-trip normalisation properties.

use std::sync::Arc;
use std::time::Duration;

use ccd_bridge_core::config::{Parity, UartParams};
use ccd_bridge_core::testkit::FakeUartBackend;
use ccd_bridge_core::uart::UartEngine;

fn engine() -> (UartEngine, Arc<FakeUartBackend>) {
    let fake = Arc::new(FakeUartBackend::new());
    let engine = UartEngine::new(fake.clone(), false);
    (engine, fake)
}

#[test]
fn scenario_1_uart_echo() {
    let (engine, fake) = engine();
    engine
        .set_params(UartParams {
            baud: 57_600,
            bits: 8,
            parity: Parity::None,
            stop: 1,
            fifo_trigger: 8,
            buffer_size: 8192,
            blocking: true,
            timeout_ms: 1000,
        })
        .unwrap();

    fake.push_rx_bytes(&[0x59, 0x5A]);
    engine.service_interrupt();

    let mut buf = [0u8; 2];
    let n = engine.read_into(&mut buf, true, Duration::from_millis(100)).unwrap();
    assert_eq!(n, 2);
    assert_eq!(buf, [0x59, 0x5A]);
    assert_eq!(engine.rx_count(), 0);
}

#[test]
fn scenario_2_uart_overflow_drop() {
    let (engine, fake) = engine();
    engine.set_params(UartParams { buffer_size: 1, ..UartParams::default() }).unwrap();
    // buffer_size is rounded up to 8192; push more than that and the
    // overflow bytes are dropped, not the oldest ones.
    let bytes: Vec<u8> = (0..8200u32).map(|i| (i % 256) as u8).collect();
    fake.push_rx_bytes(&bytes);
    engine.service_interrupt();
    assert_eq!(engine.rx_count(), 8192);
}

#[test]
fn set_then_get_yields_normalised_values() {
    let (engine, _fake) = engine();
    let applied = engine
        .set_params(UartParams { buffer_size: 100, fifo_trigger: 3, ..UartParams::default() })
        .unwrap();
    assert_eq!(applied.buffer_size, 8192);
    assert_eq!(applied.fifo_trigger, 0);

    let fetched = engine.get_params();
    assert_eq!(fetched.buffer_size, 8192);
    assert_eq!(fetched.fifo_trigger, 0);
}

#[test]
fn break_time_is_clamped_to_one_second() {
    let (engine, _fake) = engine();
    let start = std::time::Instant::now();
    engine.send_break(5_000);
    assert!(start.elapsed() < Duration::from_millis(1_500));
}

#[test]
fn clear_drains_both_rings_and_wakes_waiters() {
    let (engine, fake) = engine();
    fake.push_rx_bytes(&[1, 2, 3]);
    engine.service_interrupt();
    assert_eq!(engine.rx_count(), 3);
    engine.clear();
    assert_eq!(engine.rx_count(), 0);
}
