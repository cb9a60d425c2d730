//! Device session lifecycle and command serialization.
//!
//! A [`DeviceSession`] owns one [`Transport`] and the connection state
//! machine `Disconnected → Connecting → Connected → Measuring → Connected →
//! Disconnected`. The transient states are never observable after a call
//! returns: every failure path lands back in `Connected` or `Disconnected`.
//!
//! The session is single-owner by contract. At most one operation may be in
//! flight at a time; callers needing shared access must serialize it
//! externally. There is no process-wide device singleton — each session is
//! an explicitly owned value, so tests can run several against independent
//! mock devices.
//!
//! Transport-level timeouts are retried a bounded number of times with the
//! same command before surfacing. Malformed frames are retried up to their
//! own ceiling, after which the session forces a disconnect since the link
//! can no longer be trusted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationStore;
use crate::config::{DeviceSettings, Settings};
use crate::engine::EngineTuning;
use crate::error::{LastError, OspradError, Result};
use crate::measurement::{MeasurementResult, MeasurementType};
use crate::protocol::{
    self, ScanFrame, DEFAULT_MAX_SCANS, DEFAULT_MIN_SCANS, MAX_INTEGRATION_MS, MAX_SCANS,
    MIN_INTEGRATION_MS, MIN_SCANS,
};
use crate::transport::Transport;

/// Connection/operation state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Measuring,
}

/// Acquisition configuration applied to the next `measure()` call.
///
/// Immutable once attached to a session until explicitly reconfigured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Integration time in milliseconds; 0 requests auto-ranging.
    pub integration_time_ms: u32,
    pub min_scans: u32,
    pub max_scans: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            integration_time_ms: 0,
            min_scans: DEFAULT_MIN_SCANS,
            max_scans: DEFAULT_MAX_SCANS,
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.min_scans < MIN_SCANS {
            return Err(OspradError::InvalidConfiguration(format!(
                "min_scans must be at least {MIN_SCANS}, got {}",
                self.min_scans
            )));
        }
        if self.max_scans > MAX_SCANS {
            return Err(OspradError::InvalidConfiguration(format!(
                "max_scans must be at most {MAX_SCANS}, got {}",
                self.max_scans
            )));
        }
        if self.min_scans > self.max_scans {
            return Err(OspradError::InvalidConfiguration(format!(
                "min_scans ({}) exceeds max_scans ({})",
                self.min_scans, self.max_scans
            )));
        }
        if self.integration_time_ms > MAX_INTEGRATION_MS {
            return Err(OspradError::InvalidConfiguration(format!(
                "integration_time_ms must be at most {MAX_INTEGRATION_MS}, got {}",
                self.integration_time_ms
            )));
        }
        Ok(())
    }
}

/// One spectroradiometer connection.
pub struct DeviceSession {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) device: DeviceSettings,
    pub(crate) tuning: EngineTuning,
    pub(crate) calibration: Arc<CalibrationStore>,
    pub(crate) state: SessionState,
    pub(crate) config: Configuration,
    pub(crate) unit_number: Option<u32>,
    last_error: Option<LastError>,
    /// Inbound bytes not yet consumed as a full line.
    pending: Vec<u8>,
    // Last settings actually sent, to skip redundant traffic.
    sent_integration: Option<u32>,
    sent_min_scans: Option<u32>,
    sent_max_scans: Option<u32>,
}

impl DeviceSession {
    pub fn new(
        transport: Box<dyn Transport>,
        calibration: Arc<CalibrationStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            transport,
            device: settings.device.clone(),
            tuning: settings.engine,
            calibration,
            state: SessionState::Disconnected,
            config: Configuration::default(),
            unit_number: None,
            last_error: None,
            pending: Vec::new(),
            sent_integration: None,
            sent_min_scans: None,
            sent_max_scans: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn configuration(&self) -> Configuration {
        self.config
    }

    /// Serial number of the connected unit, known after `connect`.
    pub fn unit_number(&self) -> Option<u32> {
        self.unit_number
    }

    /// Most recent failure, cleared by the next successful operation.
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Open the transport and handshake with the device.
    ///
    /// On success the session records the unit serial number and moves to
    /// `Connected`. On failure the transport is released (no leaked handles
    /// across failed attempts) and the session stays `Disconnected`.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            let err =
                OspradError::ConnectionFailed("session is already connected".to_string());
            self.record_error(&err);
            return Err(err);
        }

        self.state = SessionState::Connecting;
        match self.try_connect().await {
            Ok(unit) => {
                self.unit_number = Some(unit);
                self.state = SessionState::Connected;
                self.last_error = None;
                info!("Connected to OSpRad unit #{unit}");
                Ok(())
            }
            Err(err) => {
                if let Err(close_err) = self.transport.close().await {
                    warn!("Transport close after failed connect: {close_err}");
                }
                self.pending.clear();
                self.state = SessionState::Disconnected;
                self.record_error(&err);
                Err(err)
            }
        }
    }

    async fn try_connect(&mut self) -> Result<u32> {
        self.transport.open().await?;

        // Give the link time to stabilize before the first exchange; some
        // USB-serial bridges reset the MCU on open.
        tokio::time::sleep(Duration::from_millis(self.device.settle_ms)).await;

        self.sent_integration = None;
        self.sent_min_scans = None;
        self.sent_max_scans = None;
        self.pending.clear();

        let attempts = self.device.handshake_retries.max(1);
        let mut last: Option<OspradError> = None;
        for attempt in 1..=attempts {
            match self.handshake().await {
                Ok(unit) => return Ok(unit),
                Err(err) => {
                    debug!("Handshake attempt {attempt}/{attempts} failed: {err}");
                    let _ = self.resync().await;
                    last = Some(err);
                }
            }
        }

        Err(OspradError::ConnectionFailed(format!(
            "handshake failed after {attempts} attempts: {}",
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Identify the device with a minimum-exposure probe scan; the frame
    /// header carries the unit serial number.
    async fn handshake(&mut self) -> Result<u32> {
        let timeout = self.command_timeout();
        self.transport
            .write(protocol::set_integration(MIN_INTEGRATION_MS).as_bytes())
            .await?;
        self.read_line(timeout).await?;
        self.sent_integration = Some(MIN_INTEGRATION_MS);

        self.transport
            .write(protocol::scan_command(MeasurementType::Radiance).as_bytes())
            .await?;
        let line = self.read_line(timeout).await?;
        let frame = protocol::parse_frame(&line)?;
        Ok(frame.unit)
    }

    /// Validate and record a new configuration. No device I/O happens here;
    /// settings are pushed lazily at measure time. On a constraint violation
    /// the prior configuration stays in force.
    pub fn configure(&mut self, config: Configuration) -> Result<()> {
        if let Err(err) = config.validate() {
            self.record_error(&err);
            return Err(err);
        }
        self.config = config;
        self.last_error = None;
        debug!(
            "Configured: integration={}ms scans={}..{}",
            config.integration_time_ms, config.min_scans, config.max_scans
        );
        Ok(())
    }

    /// Perform one measurement under the configuration in force.
    ///
    /// Blocking (in the async sense) for at most `deadline`, defaulting to
    /// the configured measure timeout. On expiry the in-flight exchange is
    /// abandoned, the transport is flushed back to a clean state and
    /// `Timeout` is returned with the session back in `Connected`.
    pub async fn measure(
        &mut self,
        measurement_type: MeasurementType,
        deadline: Option<Duration>,
    ) -> Result<MeasurementResult> {
        if self.state != SessionState::Connected {
            let err = OspradError::NotConnected;
            self.record_error(&err);
            return Err(err);
        }

        self.state = SessionState::Measuring;
        let deadline =
            deadline.unwrap_or_else(|| Duration::from_millis(self.device.measure_timeout_ms));

        match tokio::time::timeout(deadline, self.run_measurement(measurement_type)).await {
            Ok(Ok(result)) => {
                self.state = SessionState::Connected;
                self.last_error = None;
                info!(
                    "{} measurement complete: {} scans at {} ms, {:.4} {}",
                    measurement_type,
                    result.num_scans,
                    result.integration_time_ms,
                    result.photometric,
                    measurement_type.photometric_unit()
                );
                Ok(result)
            }
            Ok(Err(err)) => {
                // A forced disconnect inside the engine leaves Disconnected;
                // everything else returns to Connected.
                if self.state != SessionState::Disconnected {
                    self.state = SessionState::Connected;
                }
                self.record_error(&err);
                Err(err)
            }
            Err(_) => {
                // Same rule as above: a forced disconnect that the deadline
                // cancelled mid-close stays Disconnected.
                if self.state != SessionState::Disconnected {
                    if let Err(flush_err) = self.resync().await {
                        warn!("Transport resync after measure timeout: {flush_err}");
                    }
                    self.state = SessionState::Connected;
                }
                let err = OspradError::Timeout(deadline);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Release the transport and return to `Disconnected`. Idempotent and
    /// reachable from any state.
    pub async fn disconnect(&mut self) {
        // Mark the session down before touching the transport, so a caller
        // deadline cancelling us mid-close still observes Disconnected.
        let was_connected = self.state != SessionState::Disconnected;
        self.state = SessionState::Disconnected;
        self.pending.clear();
        self.sent_integration = None;
        self.sent_min_scans = None;
        self.sent_max_scans = None;
        self.unit_number = None;

        if let Err(err) = self.transport.close().await {
            warn!("Error closing transport: {err}");
        }
        if was_connected {
            info!("Disconnected");
        }
    }

    // =========================================================================
    // Command/response plumbing (used by the measurement engine)
    // =========================================================================

    pub(crate) fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.device.command_timeout_ms)
    }

    pub(crate) fn record_error(&mut self, err: &OspradError) {
        self.last_error = Some(LastError::from(err));
    }

    /// Drop anything buffered on the line so the next exchange starts clean.
    pub(crate) async fn resync(&mut self) -> Result<()> {
        self.pending.clear();
        self.transport.flush_input().await
    }

    /// Write a command and read its single-line response, retrying the same
    /// command a bounded number of times on transport timeout.
    pub(crate) async fn exchange(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let mut last: Option<OspradError> = None;
        for attempt in 0..=self.device.command_retries {
            if attempt > 0 {
                debug!("Retrying command '{command}' (attempt {})", attempt + 1);
                self.resync().await?;
            }
            if let Err(err) = self.transport.write(command.as_bytes()).await {
                last = Some(err);
                continue;
            }
            match self.read_line(timeout).await {
                Ok(line) => return Ok(line),
                Err(err @ OspradError::Timeout(_)) => last = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last
            .unwrap_or_else(|| OspradError::DeviceFault(format!("command '{command}' failed"))))
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).trim().to_string());
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(OspradError::Timeout(timeout))?;
            let chunk = self.transport.read(256, remaining).await?;
            self.pending.extend_from_slice(&chunk);
        }
    }

    /// Send a setting only when it differs from the last value sent.
    pub(crate) async fn ensure_integration(&mut self, ms: u32) -> Result<()> {
        if self.sent_integration == Some(ms) {
            return Ok(());
        }
        let ack = self
            .exchange(&protocol::set_integration(ms), self.command_timeout())
            .await?;
        debug!("Integration time set to {ms} ms (ack '{ack}')");
        self.sent_integration = Some(ms);
        Ok(())
    }

    pub(crate) async fn ensure_scan_hints(&mut self, min: u32, max: u32) -> Result<()> {
        if self.sent_min_scans != Some(min) {
            self.exchange(&protocol::set_min_scans(min), self.command_timeout())
                .await?;
            self.sent_min_scans = Some(min);
        }
        if self.sent_max_scans != Some(max) {
            self.exchange(&protocol::set_max_scans(max), self.command_timeout())
                .await?;
            self.sent_max_scans = Some(max);
        }
        Ok(())
    }

    /// Request one scan frame, retrying malformed responses up to the
    /// ceiling. Past the ceiling the link is considered unusable and the
    /// session forces a disconnect.
    pub(crate) async fn acquire_scan(
        &mut self,
        measurement_type: MeasurementType,
        timeout: Duration,
    ) -> Result<ScanFrame> {
        let mut last: Option<OspradError> = None;
        for attempt in 0..=self.device.malformed_retries {
            if attempt > 0 {
                self.resync().await?;
            }
            let line = self
                .exchange(protocol::scan_command(measurement_type), timeout)
                .await?;
            match protocol::parse_frame(&line) {
                Ok(frame) => return Ok(frame),
                Err(err) => {
                    warn!("Malformed scan frame (attempt {}): {err}", attempt + 1);
                    last = Some(err);
                }
            }
        }

        error!("Scan frames malformed past retry ceiling; forcing disconnect");
        self.disconnect().await;
        Err(OspradError::DeviceFault(format!(
            "scan frames malformed past retry ceiling: {}",
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationTable;
    use crate::transport::mock::MockTransport;

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.device.settle_ms = 1;
        settings.device.command_timeout_ms = 100;
        settings
    }

    fn mock_session() -> DeviceSession {
        let store = Arc::new(CalibrationStore::with_table(CalibrationTable::synthetic(1)));
        DeviceSession::new(Box::new(MockTransport::with_unit(1)), store, &fast_settings())
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = mock_session();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.unit_number().is_none());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_configuration_validation() {
        assert!(Configuration::default().validate().is_ok());

        let swapped = Configuration {
            integration_time_ms: 0,
            min_scans: 10,
            max_scans: 5,
        };
        assert!(matches!(
            swapped.validate().unwrap_err(),
            OspradError::InvalidConfiguration(_)
        ));

        let zero_scans = Configuration {
            integration_time_ms: 0,
            min_scans: 0,
            max_scans: 5,
        };
        assert!(zero_scans.validate().is_err());

        let too_long = Configuration {
            integration_time_ms: MAX_INTEGRATION_MS + 1,
            min_scans: 1,
            max_scans: 5,
        };
        assert!(too_long.validate().is_err());
    }

    #[tokio::test]
    async fn test_invalid_configure_keeps_prior_config() {
        let mut session = mock_session();
        let good = Configuration {
            integration_time_ms: 100,
            min_scans: 2,
            max_scans: 4,
        };
        session.configure(good).unwrap();

        let bad = Configuration {
            integration_time_ms: 100,
            min_scans: 9,
            max_scans: 2,
        };
        let err = session.configure(bad).unwrap_err();
        assert!(matches!(err, OspradError::InvalidConfiguration(_)));
        assert_eq!(session.configuration(), good);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_measure_requires_connection() {
        let mut session = mock_session();
        let err = session
            .measure(MeasurementType::Radiance, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OspradError::NotConnected));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
