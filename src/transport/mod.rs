//! Transport channel abstraction.
//!
//! The device session owns exactly one [`Transport`], acquired on connect
//! and released on disconnect. The trait mirrors the physical link contract:
//! open, write, bounded read, flush, close. The session assumes no framing
//! beyond what the command protocol defines; line assembly happens above
//! this layer.
//!
//! Two implementations are provided: [`serial::SerialTransport`] for real
//! hardware (behind the `instrument_serial` feature) and [`mock::MockTransport`],
//! which emulates the firmware end-to-end for hardware-free testing.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Bidirectional byte channel to a device.
///
/// `read` returns at least one byte or `Timeout`; it never blocks past the
/// given deadline. `flush_input` discards any buffered inbound bytes so the
/// next exchange starts from a known-clean state.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<()>;

    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `max_bytes`, waiting at most `timeout` for the first byte.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;

    async fn flush_input(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
