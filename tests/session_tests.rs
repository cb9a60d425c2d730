//! End-to-end session tests against the simulated device.
//!
//! These exercise the full stack — session state machine, command exchange,
//! exposure search, scan averaging and calibration correction — with the
//! mock transport standing in for hardware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use osprad::calibration::{CalibrationStore, CalibrationTable};
use osprad::color;
use osprad::session::{Configuration, DeviceSession, SessionState};
use osprad::transport::mock::{FaultMode, MockTransport};
use osprad::transport::Transport;
use osprad::{ErrorKind, MeasurementType, OspradError, Settings};

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.device.settle_ms = 1;
    settings.device.command_timeout_ms = 200;
    settings.device.measure_timeout_ms = 10_000;
    settings.engine.scan_timeout_margin_ms = 100;
    settings
}

fn session_with(transport: MockTransport, unit: u32) -> DeviceSession {
    let store = Arc::new(CalibrationStore::with_table(CalibrationTable::synthetic(unit)));
    DeviceSession::new(Box::new(transport), store, &fast_settings())
}

#[tokio::test]
async fn test_connect_records_unit_and_state() {
    let mut session = session_with(MockTransport::with_unit(7), 7);
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.unit_number(), Some(7));
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_double_connect_is_rejected() {
    let mut session = session_with(MockTransport::new(), 1);
    session.connect().await.unwrap();
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, OspradError::ConnectionFailed(_)));
    // The existing connection stays usable.
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_measure_with_explicit_integration() {
    let mut session = session_with(MockTransport::new(), 1);
    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 50,
            min_scans: 2,
            max_scans: 6,
        })
        .unwrap();

    let result = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap();

    assert_eq!(result.unit_number, 1);
    assert_eq!(result.integration_time_ms, 50);
    assert!((2..=6).contains(&result.num_scans));
    assert!(result.luminance().unwrap() > 0.0);
    assert_eq!(session.state(), SessionState::Connected);

    // Spectral values land on the unit's calibrated wavelength grid.
    let table = CalibrationTable::synthetic(1);
    assert_eq!(result.spectrum.wavelengths(), table.wavelengths());
}

#[tokio::test]
async fn test_auto_exposure_lands_in_target_band() {
    let mut session = session_with(MockTransport::new(), 1);
    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 0,
            min_scans: 2,
            max_scans: 10,
        })
        .unwrap();

    let result = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap();

    // The mock signal scales linearly with integration time, so the search
    // settles with the peak inside the target band and no clipping.
    let peak = result
        .raw_counts
        .iter()
        .cloned()
        .fold(0.0, f64::max);
    let fraction = peak / 65535.0;
    assert!(
        (0.6..1.0).contains(&fraction),
        "peak fraction {fraction:.3} outside expected band"
    );
    assert_eq!(result.saturation, 0.0);
}

#[tokio::test]
async fn test_irradiance_measurement() {
    let mut session = session_with(MockTransport::new(), 1);
    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 100,
            min_scans: 2,
            max_scans: 5,
        })
        .unwrap();

    let result = session
        .measure(MeasurementType::Irradiance, None)
        .await
        .unwrap();
    assert!(result.illuminance().unwrap() > 0.0);
    assert!(result.luminance().is_none());
}

#[tokio::test]
async fn test_measured_spectrum_feeds_color_pipeline() {
    let mut session = session_with(MockTransport::new(), 1);
    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 0,
            min_scans: 2,
            max_scans: 10,
        })
        .unwrap();

    let result = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap();

    let (x, y) = color::chromaticity(&result.spectrum).unwrap();
    assert!(x.is_finite() && y.is_finite());
    assert!((0.0..1.0).contains(&x) && (0.0..1.0).contains(&y));

    let shape = color::analyze_shape(&result.spectrum).unwrap();
    // The mock emits a single line near pixel 140 of the synthetic grid.
    assert!((560.0..630.0).contains(&shape.peak_wavelength));
    assert!(shape.fwhm.is_some());
}

#[tokio::test]
async fn test_missing_calibration_fails_measure() {
    let store = Arc::new(CalibrationStore::with_table(CalibrationTable::synthetic(2)));
    let mut session = DeviceSession::new(
        Box::new(MockTransport::with_unit(1)),
        store,
        &fast_settings(),
    );

    session.connect().await.unwrap();
    let err = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OspradError::CalibrationMissing(1)));
    // The connection itself survives; only the measurement fails.
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(
        session.last_error().map(|e| e.kind),
        Some(ErrorKind::CalibrationMissing)
    );
}

#[tokio::test]
async fn test_persistent_garbage_forces_disconnect() {
    let transport = MockTransport::new();
    let handle = transport.clone();
    let mut session = session_with(transport, 1);

    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 20,
            min_scans: 1,
            max_scans: 2,
        })
        .unwrap();

    // One more fault than the retry ceiling (3 retries = 4 attempts).
    handle.inject_fault(FaultMode::GarbageFrame, 4);

    let err = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OspradError::DeviceFault(_)));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_transient_garbage_is_retried() {
    let transport = MockTransport::new();
    let handle = transport.clone();
    let mut session = session_with(transport, 1);

    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 20,
            min_scans: 1,
            max_scans: 2,
        })
        .unwrap();

    handle.inject_fault(FaultMode::GarbageFrame, 2);

    let result = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap();
    assert!(result.num_scans >= 1);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_dropped_responses_surface_timeout() {
    let transport = MockTransport::new();
    let handle = transport.clone();
    let mut session = session_with(transport, 1);

    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 5,
            min_scans: 1,
            max_scans: 2,
        })
        .unwrap();

    // Swallow every attempt of the scan exchange, retries included.
    handle.inject_fault(FaultMode::DropResponse, 3);

    let err = session
        .measure(MeasurementType::Radiance, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OspradError::Timeout(_)));
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_measure_deadline_expires() {
    let transport = MockTransport::new();
    let handle = transport.clone();
    let mut session = session_with(transport, 1);

    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 50,
            min_scans: 1,
            max_scans: 2,
        })
        .unwrap();

    // No responses at all: the overall deadline fires before the per-command
    // retries finish.
    handle.inject_fault(FaultMode::DropResponse, 10);

    let err = session
        .measure(MeasurementType::Radiance, Some(Duration::from_millis(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, OspradError::Timeout(d) if d == Duration::from_millis(30)));
    assert_eq!(session.state(), SessionState::Connected);
}

/// Mock wrapper whose `close` takes a configurable time, standing in for a
/// transport teardown that outlives a caller deadline.
struct SlowCloseTransport {
    inner: MockTransport,
    close_delay: Duration,
}

#[async_trait]
impl Transport for SlowCloseTransport {
    async fn open(&mut self) -> osprad::Result<()> {
        self.inner.open().await
    }

    async fn write(&mut self, bytes: &[u8]) -> osprad::Result<()> {
        self.inner.write(bytes).await
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> osprad::Result<Vec<u8>> {
        self.inner.read(max_bytes, timeout).await
    }

    async fn flush_input(&mut self) -> osprad::Result<()> {
        self.inner.flush_input().await
    }

    async fn close(&mut self) -> osprad::Result<()> {
        tokio::time::sleep(self.close_delay).await;
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_deadline_during_forced_disconnect_stays_disconnected() {
    let inner = MockTransport::new();
    let handle = inner.clone();
    let transport = SlowCloseTransport {
        inner,
        close_delay: Duration::from_millis(300),
    };
    let store = Arc::new(CalibrationStore::with_table(CalibrationTable::synthetic(1)));
    let mut session = DeviceSession::new(Box::new(transport), store, &fast_settings());

    session.connect().await.unwrap();
    session
        .configure(Configuration {
            integration_time_ms: 20,
            min_scans: 1,
            max_scans: 2,
        })
        .unwrap();

    // Exhaust the malformed-frame budget so the engine forces a disconnect,
    // then let the measure deadline expire while the close is in flight. The
    // session must not report Connected over a transport it already gave up.
    handle.inject_fault(FaultMode::GarbageFrame, 4);

    let err = session
        .measure(MeasurementType::Radiance, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, OspradError::Timeout(_)));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let mut session = session_with(MockTransport::new(), 1);
    session.connect().await.unwrap();

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.unit_number().is_none());

    // A second disconnect is a no-op, not an error.
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let mut session = session_with(MockTransport::with_unit(3), 3);
    session.connect().await.unwrap();
    session.disconnect().await;

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.unit_number(), Some(3));
}
