//! # Serial GNSS Receiver
//!
//! Reads NMEA bursts from a GNSS receiver UART (DFRobot and similar modules
//! default to 9600 baud, 8N1).
//!
//! Each read collects whatever the receiver emits within a bounded window and
//! hands it to the NMEA decoder, so acquisition never blocks the sampling
//! loop indefinitely.

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::{nmea, Fix, PositionSource};
use crate::error::{Result, TrackerError};

/// Upper bound on bytes collected per read (several full NMEA bursts)
pub const MAX_BURST_BYTES: usize = 4096;

/// GNSS receiver attached over a serial port
pub struct SerialGnss<R = tokio_serial::SerialStream> {
    /// Byte stream from the receiver
    port: R,
    /// Device path (e.g., /dev/serial0)
    device_path: String,
    /// How long a single read may collect bytes
    read_window: Duration,
    buffer: BytesMut,
}

impl<R> std::fmt::Debug for SerialGnss<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialGnss")
            .field("device_path", &self.device_path)
            .field("read_window", &self.read_window)
            .finish_non_exhaustive()
    }
}

impl SerialGnss {
    /// Open the receiver serial port
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/serial0")
    /// * `baud_rate` - Receiver baud rate
    /// * `read_window` - Maximum time a single read collects bytes
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Serial` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gnss_tracker::gnss::serial::SerialGnss;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let gnss = SerialGnss::open("/dev/serial0", 9600, Duration::from_millis(500))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: &str, baud_rate: u32, read_window: Duration) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", path, e)))?;

        info!("Opened GNSS receiver at {} ({} baud)", path, baud_rate);
        Ok(Self::from_reader(port, path, read_window))
    }
}

impl<R: AsyncRead + Unpin + Send> SerialGnss<R> {
    /// Wrap an already-open byte stream
    pub fn from_reader(port: R, device_path: &str, read_window: Duration) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            read_window,
            buffer: BytesMut::with_capacity(MAX_BURST_BYTES),
        }
    }

    /// Get the device path of the receiver
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Collect bytes until the read window closes, the stream ends, or the
    /// burst limit is reached.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Serial` if the stream fails, or ends before
    /// delivering any byte.
    async fn read_burst(&mut self) -> Result<BytesMut> {
        self.buffer.clear();
        let deadline = tokio::time::Instant::now() + self.read_window;

        while self.buffer.len() < MAX_BURST_BYTES {
            match tokio::time::timeout_at(deadline, self.port.read_buf(&mut self.buffer)).await {
                Err(_) => break, // window closed
                Ok(Ok(0)) => {
                    if self.buffer.is_empty() {
                        return Err(TrackerError::Serial(format!(
                            "Receiver at {} closed the stream",
                            self.device_path
                        )));
                    }
                    break;
                }
                Ok(Ok(n)) => debug!("Read {} bytes from {}", n, self.device_path),
                Ok(Err(e)) => {
                    return Err(TrackerError::Serial(format!(
                        "Failed to read {}: {}",
                        self.device_path, e
                    )))
                }
            }
        }

        Ok(self.buffer.split())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> PositionSource for SerialGnss<R> {
    async fn read_fix(&mut self) -> Result<Fix> {
        let burst = self.read_burst().await?;
        if burst.is_empty() {
            warn!("No data from GNSS receiver within {:?}", self.read_window);
        }
        Ok(nmea::fix_from_buffer(&burst))
    }
}
