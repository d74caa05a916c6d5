// SPDX-License-Identifier: GPL-3.0-only
//! Byte stream to the ambient light sensor

use tokio::io::AsyncRead;

pub type SensorStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens a fresh connection to the sensor
///
/// Called again after every lost connection; each stream is dropped (and
/// the port released) before the next one is opened.
pub trait SensorLink: Send + Sync + 'static {
    fn open(&self) -> std::io::Result<SensorStream>;

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;
}

/// Serial port link
#[derive(Debug, Clone)]
pub struct SerialLink {
    pub port: String,
    pub baud_rate: u32,
}

impl SerialLink {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

impl SensorLink for SerialLink {
    fn open(&self) -> std::io::Result<SensorStream> {
        let builder = tokio_serial::new(&self.port, self.baud_rate);
        let stream = tokio_serial::SerialStream::open(&builder)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud_rate)
    }
}
