//! # Serial Communication Module
//!
//! Opens the flight controller's telemetry link (USB CDC or a USB-to-serial
//! adapter) as an async byte stream.
//!
//! This module handles:
//! - Trying candidate device paths in order of preference
//! - Opening the port 8N1 without flow control at the configured baud rate
//! - Reporting which device was found, or every path that was tried

pub mod port_trait;

pub use port_trait::DeviceOpener;

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{RelayError, Result};

/// Default telemetry device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // Flight controllers enumerating as USB CDC
    "/dev/ttyUSB0", // Telemetry radios behind USB-to-serial adapters
];

/// Opens the telemetry serial port
#[derive(Debug, Clone)]
pub struct SerialOpener {
    paths: Vec<String>,
    baud_rate: u32,
}

impl SerialOpener {
    pub fn new(paths: Vec<String>, baud_rate: u32) -> Self {
        Self { paths, baud_rate }
    }

    /// Configured port first, then the fallbacks, without duplicates
    pub fn from_config(config: &SerialConfig) -> Self {
        let mut paths = vec![config.port.clone()];
        for path in &config.fallback_ports {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        Self::new(paths, config.baud_rate)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Open the first device that works
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyACM0"])
    /// * `baud_rate` - Line speed of the telemetry link
    ///
    /// # Returns
    ///
    /// * `Result<(SerialStream, String)>` - Open port and the path that worked
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path when none can be opened
    pub fn open_with_paths(
        paths: &[String],
        baud_rate: u32,
    ) -> Result<(tokio_serial::SerialStream, String)> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened telemetry device at {} ({} baud)", path, baud_rate);
                    return Ok((port, path.clone()));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(RelayError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port 8N1 without flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| RelayError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self::new(
            DEFAULT_DEVICE_PATHS.iter().map(|p| p.to_string()).collect(),
            57600,
        )
    }
}

#[async_trait]
impl DeviceOpener for SerialOpener {
    type Device = tokio_serial::SerialStream;

    async fn open(&self) -> Result<(tokio_serial::SerialStream, String)> {
        Self::open_with_paths(&self.paths, self.baud_rate)
    }
}
