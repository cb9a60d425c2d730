//! Serial transport for real OSpRad hardware.
//!
//! Wraps the `serialport` crate and provides async I/O by running the
//! blocking serial operations on Tokio's blocking task executor. The port
//! handle lives behind `Arc<Mutex<...>>` so blocking tasks can share it
//! safely.

use async_trait::async_trait;
use log::{debug, info, warn};
use serialport::SerialPort;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{OspradError, Result};
use crate::transport::Transport;

/// Internal poll interval for the underlying port; the overall deadline is
/// enforced by [`Transport::read`].
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Transport for an explicitly named port.
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            port: None,
        }
    }

    /// Discover the device port. Exactly one candidate must be present;
    /// zero or several candidates is a `ConnectionFailed`, since guessing
    /// between ports risks talking to the wrong instrument.
    pub fn discover(baud_rate: u32) -> Result<Self> {
        let ports = serialport::available_ports()
            .map_err(|e| OspradError::ConnectionFailed(format!("port enumeration failed: {e}")))?;

        let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
        debug!("Available serial ports: {names:?}");

        match names.as_slice() {
            [] => Err(OspradError::ConnectionFailed(
                "no serial ports found".to_string(),
            )),
            [only] => {
                info!("Discovered device port '{only}'");
                Ok(Self::new(only.clone(), baud_rate))
            }
            many => Err(OspradError::ConnectionFailed(format!(
                "{} candidate ports found ({many:?}); configure the port explicitly",
                many.len()
            ))),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port_handle(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or(OspradError::NotConnected)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<()> {
        let name = self.port_name.clone();
        let baud = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud)
                .timeout(PORT_POLL_TIMEOUT)
                .open()
                .map_err(|e| {
                    OspradError::ConnectionFailed(format!(
                        "failed to open serial port '{name}' at {baud} baud: {e}"
                    ))
                })
        })
        .await
        .map_err(|e| OspradError::ConnectionFailed(format!("serial open task panicked: {e}")))??;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!("Serial port '{}' opened at {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_handle()?;
        let payload = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            let mut guard = port.blocking_lock();
            guard.write_all(&payload)?;
            guard.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| OspradError::DeviceFault(format!("serial write task panicked: {e}")))?
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port_handle()?;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            use std::io::Read;
            let mut guard = port.blocking_lock();
            let mut buffer = vec![0u8; max_bytes.max(1)];
            let deadline = Instant::now() + timeout;

            loop {
                match guard.read(&mut buffer) {
                    Ok(0) => {
                        return Err(OspradError::DeviceFault(
                            "unexpected EOF from serial port".to_string(),
                        ))
                    }
                    Ok(n) => {
                        buffer.truncate(n);
                        return Ok(buffer);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        if Instant::now() >= deadline {
                            return Err(OspradError::Timeout(timeout));
                        }
                        // Port poll interval elapsed without data; keep waiting.
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })
        .await
        .map_err(|e| OspradError::DeviceFault(format!("serial read task panicked: {e}")))?
    }

    async fn flush_input(&mut self) -> Result<()> {
        let port = self.port_handle()?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let guard = port.blocking_lock();
            guard
                .clear(serialport::ClearBuffer::Input)
                .map_err(|e| OspradError::DeviceFault(format!("failed to flush input: {e}")))
        })
        .await
        .map_err(|e| OspradError::DeviceFault(format!("serial flush task panicked: {e}")))?
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        } else {
            warn!("close() on already-closed serial port '{}'", self.port_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_starts_closed() {
        let transport = SerialTransport::new("/dev/ttyUSB0".to_string(), 115_200);
        assert_eq!(transport.port_name(), "/dev/ttyUSB0");
        assert!(transport.port.is_none());
    }

    #[tokio::test]
    async fn test_io_before_open_is_not_connected() {
        let mut transport = SerialTransport::new("/dev/ttyUSB0".to_string(), 115_200);
        let err = transport.write(b"r").await.unwrap_err();
        assert!(matches!(err, OspradError::NotConnected));
    }
}
