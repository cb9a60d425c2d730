//! Device control and spectral analysis for a 288-pixel serial
//! spectroradiometer.
//!
//! The crate is layered:
//!
//! - [`transport`]: byte-level channel to the instrument, with a serial
//!   implementation behind the `instrument_serial` feature and an in-process
//!   mock for tests and demos.
//! - [`session`]: the connection state machine, command/acknowledge
//!   exchanges and frame reassembly.
//! - [`engine`]: exposure search, scan averaging and calibration correction
//!   (implemented on [`DeviceSession`]).
//! - [`calibration`]: per-unit calibration tables loaded from CSV.
//! - [`color`]: pure analysis of measured spectra (chromaticity, CCT, CRI,
//!   sRGB preview, shape descriptors).

pub mod calibration;
pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod measurement;
pub mod protocol;
pub mod session;
pub mod transport;

pub use calibration::{CalibrationStore, CalibrationTable};
pub use config::Settings;
pub use engine::EngineTuning;
pub use error::{ErrorKind, LastError, OspradError, Result};
pub use measurement::{MeasurementResult, MeasurementType, Spectrum};
pub use session::{Configuration, DeviceSession, SessionState};
