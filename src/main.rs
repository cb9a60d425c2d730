//! Command-line front end for the OSpRad spectroradiometer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use osprad::calibration::{CalibrationStore, CalibrationTable};
use osprad::color::{self, CriConfig};
use osprad::session::{Configuration, DeviceSession};
use osprad::transport::mock::MockTransport;
use osprad::transport::Transport;
use osprad::{MeasurementType, Settings};

#[derive(Parser)]
#[command(name = "osprad", about = "OSpRad spectroradiometer control", version)]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MeasureKind {
    Radiance,
    Irradiance,
}

impl From<MeasureKind> for MeasurementType {
    fn from(kind: MeasureKind) -> Self {
        match kind {
            MeasureKind::Radiance => MeasurementType::Radiance,
            MeasureKind::Irradiance => MeasurementType::Irradiance,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Take one measurement and print the analysis.
    Measure {
        /// Use the built-in simulated device instead of hardware.
        #[arg(long)]
        mock: bool,
        /// Serial port; autodiscovered when omitted.
        #[arg(long)]
        port: Option<String>,
        /// Measurement geometry.
        #[arg(long, value_enum, default_value_t = MeasureKind::Radiance)]
        kind: MeasureKind,
        /// Integration time in ms; 0 auto-ranges.
        #[arg(long, default_value_t = 0)]
        integration_ms: u32,
        #[arg(long, default_value_t = 3)]
        min_scans: u32,
        #[arg(long, default_value_t = 50)]
        max_scans: u32,
        /// Calibration CSV; the mock device falls back to a synthetic table.
        #[arg(long)]
        calibration: Option<String>,
        /// Overall measurement deadline in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Emit the result as JSON instead of a report.
        #[arg(long)]
        json: bool,
    },
    /// List candidate serial ports.
    Ports,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut settings = Settings::new(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Command::Measure {
            mock,
            port,
            kind,
            integration_ms,
            min_scans,
            max_scans,
            calibration,
            timeout_secs,
            json,
        } => {
            if let Some(port) = port {
                settings.device.port = Some(port);
            }
            let calibration = load_calibration(calibration.as_deref(), &settings, mock)?;
            let transport = build_transport(mock, &settings)?;

            let mut session = DeviceSession::new(transport, Arc::new(calibration), &settings);
            session.connect().await.context("connecting to device")?;
            session.configure(Configuration {
                integration_time_ms: integration_ms,
                min_scans,
                max_scans,
            })?;

            let deadline = timeout_secs.map(Duration::from_secs);
            let result = session.measure(kind.into(), deadline).await;
            session.disconnect().await;
            let result = result.context("measurement failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_report(&result, &settings);
            }
        }
        Command::Ports => list_ports()?,
    }

    Ok(())
}

fn build_transport(mock: bool, settings: &Settings) -> anyhow::Result<Box<dyn Transport>> {
    if mock {
        info!("Using simulated device");
        return Ok(Box::new(MockTransport::new()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        use osprad::transport::serial::SerialTransport;
        let transport = match &settings.device.port {
            Some(port) => SerialTransport::new(port.clone(), settings.device.baud_rate),
            None => SerialTransport::discover(settings.device.baud_rate)
                .context("serial port autodiscovery")?,
        };
        Ok(Box::new(transport))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = settings;
        anyhow::bail!("built without serial support; use --mock")
    }
}

fn load_calibration(
    path: Option<&str>,
    settings: &Settings,
    mock: bool,
) -> anyhow::Result<CalibrationStore> {
    match path {
        Some(path) => {
            CalibrationStore::load(path).with_context(|| format!("loading calibration {path}"))
        }
        None if mock => Ok(CalibrationStore::with_table(CalibrationTable::synthetic(1))),
        None => {
            let path = &settings.device.calibration_file;
            CalibrationStore::load(path).with_context(|| format!("loading calibration {path}"))
        }
    }
}

fn print_report(result: &osprad::MeasurementResult, settings: &Settings) {
    println!("Unit #{}, {}", result.unit_number, result.measurement_type);
    println!(
        "  {} scans at {} ms, saturation {:.1}%",
        result.num_scans,
        result.integration_time_ms,
        result.saturation * 100.0
    );
    println!(
        "  Photometric: {:.4} {}",
        result.photometric,
        result.measurement_type.photometric_unit()
    );

    match color::chromaticity(&result.spectrum) {
        Ok((x, y)) => {
            println!("  Chromaticity: ({x:.4}, {y:.4})");
            match color::cct(x, y) {
                Ok(kelvin) => {
                    println!("  CCT: {kelvin:.0} K");
                    let cri_config = CriConfig {
                        daylight_threshold_k: settings.analysis.daylight_threshold_k,
                    };
                    match color::cri(&result.spectrum, kelvin, &cri_config) {
                        Ok(cri) => println!("  CRI Ra: {:.1}", cri.ra),
                        Err(err) => println!("  CRI: {err}"),
                    }
                }
                Err(err) => println!("  CCT: {err}"),
            }
            if let Ok((r, g, b)) = color::spectrum_to_rgb8(&result.spectrum) {
                println!("  sRGB: #{r:02x}{g:02x}{b:02x}");
            }
        }
        Err(err) => println!("  Chromaticity: {err}"),
    }

    match color::analyze_shape(&result.spectrum) {
        Ok(shape) => {
            println!(
                "  Peak {:.1} nm, centroid {:.1} nm",
                shape.peak_wavelength, shape.centroid_wavelength
            );
            match shape.fwhm {
                Some(fwhm) => println!("  FWHM {fwhm:.1} nm"),
                None => println!("  FWHM undefined (no half-maximum crossing)"),
            }
        }
        Err(err) => println!("  Shape: {err}"),
    }
}

#[cfg(feature = "instrument_serial")]
fn list_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
fn list_ports() -> anyhow::Result<()> {
    anyhow::bail!("built without serial support")
}
