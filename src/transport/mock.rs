//! Mock device transport.
//!
//! Emulates the OSpRad firmware end-to-end behind the [`Transport`]
//! contract: settings commands are acknowledged, scan commands produce
//! synthetic frames with a Gaussian emission line over a broadband floor,
//! detector noise, and full-scale clipping. Signal grows linearly with the
//! configured integration time, so the auto-exposure search behaves exactly
//! as it does against hardware.
//!
//! The session cannot distinguish this transport from a real device except
//! by data realism. Fault injection (`GarbageFrame`, `DropResponse`) lets
//! tests drive the retry and forced-disconnect paths.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{OspradError, Result};
use crate::protocol::{FULL_SCALE, SENSOR_PIXELS};
use crate::transport::Transport;

/// Synthetic emission described in detector-count rates (counts per ms of
/// integration), in pixel space. The default is a single line near 590 nm
/// on the synthetic wavelength grid.
#[derive(Clone, Copy, Debug)]
pub struct EmissionProfile {
    pub peak_pixel: f64,
    pub width_pixels: f64,
    /// Peak count rate in counts/ms.
    pub peak_rate: f64,
    /// Broadband floor count rate in counts/ms.
    pub floor_rate: f64,
}

impl Default for EmissionProfile {
    fn default() -> Self {
        Self {
            peak_pixel: 140.0,
            width_pixels: 18.0,
            peak_rate: 40.0,
            floor_rate: 2.0,
        }
    }
}

/// One-shot response faults, consumed by the next scan command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultMode {
    /// Reply with an unparseable line instead of a frame.
    GarbageFrame,
    /// Swallow the command; the session's read will time out.
    DropResponse,
}

struct MockState {
    open: bool,
    unit_number: u32,
    integration_ms: u32,
    min_scans: u32,
    max_scans: u32,
    seq: u32,
    outbox: VecDeque<u8>,
    profile: EmissionProfile,
    rng: StdRng,
    faults: VecDeque<FaultMode>,
}

/// Cloneable handle to a simulated device. Clones share firmware state, so a
/// test can keep one handle for fault injection while the session owns the
/// other.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_unit(1)
    }

    pub fn with_unit(unit_number: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: false,
                unit_number,
                integration_ms: 100,
                min_scans: 3,
                max_scans: 50,
                seq: 0,
                outbox: VecDeque::new(),
                profile: EmissionProfile::default(),
                rng: StdRng::seed_from_u64(0x05EED + u64::from(unit_number)),
                faults: VecDeque::new(),
            })),
        }
    }

    pub fn set_profile(&self, profile: EmissionProfile) {
        self.lock().profile = profile;
    }

    /// Queue `count` copies of a response fault for upcoming scan commands.
    pub fn inject_fault(&self, mode: FaultMode, count: u32) {
        let mut state = self.lock();
        for _ in 0..count {
            state.faults.push_back(mode);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MockState {
    fn take(&mut self, max_bytes: usize) -> Option<Vec<u8>> {
        if self.outbox.is_empty() {
            return None;
        }
        let n = max_bytes.max(1).min(self.outbox.len());
        Some(self.outbox.drain(..n).collect())
    }

    fn push_line(&mut self, line: &str) {
        self.outbox.extend(line.as_bytes());
        self.outbox.push_back(b'\n');
    }

    fn handle_command(&mut self, command: &str) {
        let command = command.trim();
        let Some(prefix) = command.chars().next() else {
            return;
        };

        match prefix {
            't' | 'n' | 'a' => {
                match command[1..].parse::<u32>() {
                    Ok(value) => {
                        match prefix {
                            't' => self.integration_ms = value.max(1),
                            'n' => self.min_scans = value,
                            _ => self.max_scans = value,
                        }
                        self.push_line("ok");
                    }
                    Err(_) => self.push_line("err"),
                }
            }
            'r' | 'i' => match self.faults.pop_front() {
                Some(FaultMode::GarbageFrame) => self.push_line("@@corrupt@@"),
                Some(FaultMode::DropResponse) => {}
                None => {
                    let frame = self.scan_frame(prefix == 'i');
                    self.push_line(&frame);
                }
            },
            _ => self.push_line("err"),
        }
    }

    fn scan_frame(&mut self, irradiance: bool) -> String {
        let t = self.integration_ms as f64;
        let profile = self.profile;
        // The irradiance diffuser attenuates the optical path.
        let gain = if irradiance { 0.6 } else { 1.0 };

        let mut saturated = 0usize;
        let mut counts = Vec::with_capacity(SENSOR_PIXELS);
        for i in 0..SENSOR_PIXELS {
            let x = (i as f64 - profile.peak_pixel) / profile.width_pixels;
            let rate = profile.floor_rate + profile.peak_rate * (-0.5 * x * x).exp();
            let noise: f64 = self.rng.gen_range(-2.0..2.0);
            let mut value = (rate * gain * t + noise).max(0.0);
            if value >= FULL_SCALE {
                value = FULL_SCALE;
                saturated += 1;
            }
            counts.push(value);
        }

        self.seq = self.seq.wrapping_add(1);
        let saturation = saturated as f64 / SENSOR_PIXELS as f64;

        let mut line = format!(
            "{},{},1,{},{:.4}",
            self.unit_number, self.seq, self.integration_ms, saturation
        );
        for c in &counts {
            line.push_str(&format!(",{c:.0}"));
        }
        line
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.open = true;
        state.outbox.clear();
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let command = String::from_utf8_lossy(bytes).to_string();
        let mut state = self.lock();
        if !state.open {
            return Err(OspradError::NotConnected);
        }
        state.handle_command(&command);
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        {
            let mut state = self.lock();
            if !state.open {
                return Err(OspradError::NotConnected);
            }
            if let Some(bytes) = state.take(max_bytes) {
                return Ok(bytes);
            }
        }
        // Nothing pending; a real port sits silent for the caller's full
        // deadline, so the session's outer timeouts are what fire first.
        tokio::time::sleep(timeout).await;
        let mut state = self.lock();
        if !state.open {
            return Err(OspradError::NotConnected);
        }
        if let Some(bytes) = state.take(max_bytes) {
            return Ok(bytes);
        }
        Err(OspradError::Timeout(timeout))
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.lock().outbox.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.open = false;
        state.outbox.clear();
        Ok(())
    }
}
