//! UART transport to the modem.
//!
//! The device is a single half-duplex resource shared by two threads: the
//! reader thread pulls byte chunks through [`ByteSource`], and the engine
//! writes encoded frames through [`crate::engine::Platform::uart_send`].
//! [`SerialLink`] serializes port access behind a mutex; the short read
//! timeout keeps the reader responsive to shutdown without busy-spinning.

#[cfg(feature = "mock")]
pub mod pipe;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

use crate::engine::Platform;
use crate::gpio::ResetPin;
use crate::trace::warn;

/// Read timeout on the serial port. Expiry is not an error, it just hands
/// control back to the reader loop.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Unrecoverable byte-transport errors. There is no reconnection logic:
/// these are fatal to the run.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The device could not be opened or configured.
    #[error("cannot open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    /// The device reported end-of-stream.
    #[error("device disconnected")]
    Disconnected,
    /// Any other I/O failure on the port.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Source of raw bytes for the reader thread.
///
/// `Ok(0)` means "no data right now"; the caller is expected to poll again.
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`LinkError`] on disconnect or unrecoverable I/O failure.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;
}

/// Shared handle to the modem's serial port, 8-N-1 at the configured baud
/// rate.
///
/// Cloning is cheap; all clones refer to the same port.
#[derive(Clone)]
pub struct SerialLink {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

impl SerialLink {
    /// Opens and configures the serial device.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Open`] when the device cannot be opened.
    pub fn open(device: &str, baud: u32) -> Result<Self, LinkError> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| LinkError::Open {
                device: device.to_string(),
                source,
            })?;

        Ok(Self {
            port: Arc::new(Mutex::new(port)),
        })
    }

    /// Writes one buffer to the port and flushes it.
    ///
    /// # Errors
    ///
    /// Returns a [`LinkError`] on I/O failure.
    pub fn send_bytes(&self, buf: &[u8]) -> Result<(), LinkError> {
        let mut port = self.port.lock().expect("serial port lock poisoned");
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }
}

impl ByteSource for SerialLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut port = self.port.lock().expect("serial port lock poisoned");
        match port.read(buf) {
            // EOF: the device went away.
            Ok(0) => Err(LinkError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Host services handed to the protocol engine: the serial sink plus the
/// optional GPIO reset line.
pub struct HostPlatform {
    link: SerialLink,
    reset: Option<ResetPin>,
}

impl HostPlatform {
    /// Bundles the serial link with an optional reset line.
    #[must_use]
    pub fn new(link: SerialLink, reset: Option<ResetPin>) -> Self {
        Self { link, reset }
    }
}

impl Platform for HostPlatform {
    fn uart_send(&self, buf: &[u8]) -> Result<(), LinkError> {
        self.link.send_bytes(buf)
    }

    fn reset_assert(&self) {
        if let Some(pin) = &self.reset {
            if let Err(_e) = pin.assert_reset() {
                warn!(pin = pin.pin(), error = %_e, "cannot assert reset line");
            }
        }
    }

    fn reset_release(&self) {
        if let Some(pin) = &self.reset {
            if let Err(_e) = pin.release_reset() {
                warn!(pin = pin.pin(), error = %_e, "cannot release reset line");
            }
        }
    }
}
