//! Host-side driver core for a scientific CCD camera attached through a
//! PLX 9054 PCI bridge: scatter-gather DMA, a 16550 UART, local-bus
//! registers, and a character-device-style control surface over them.
//!
//! This crate is the testable core only — PCI enumeration/BAR mapping and
//! IRQ registration are a platform concern that hands this crate three
//! [`backend::Backend`] instances and calls [`device::Device::handle_interrupt`]
//! from the real ISR.

pub mod backend;
pub mod config;
pub mod control;
pub mod demux;
pub mod device;
pub mod dma;
pub mod error;
pub mod ioctl;
pub mod mapping;
pub mod regs;
pub mod uart;

pub mod testkit;

pub use error::{DriverError, Result};
