//! Modem reset line over the Linux sysfs GPIO interface.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Valid BCM GPIO range on the Raspberry Pi header.
const GPIO_MIN: u32 = 2;
const GPIO_MAX: u32 = 27;

/// Errors configuring or driving the reset line.
#[derive(Debug, Error)]
pub enum GpioError {
    /// The pin number is outside the usable header range.
    #[error("invalid RESET GPIO number {0} (expected {GPIO_MIN}..={GPIO_MAX})")]
    InvalidPin(u32),
    /// Sysfs access failed.
    #[error("GPIO {pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: io::Error,
    },
}

/// Returns whether `pin` is a usable GPIO number.
///
/// Checked while parsing options so that a bad pin is rejected before any
/// UART or engine initialization happens.
#[must_use]
pub fn is_valid_pin(pin: u32) -> bool {
    (GPIO_MIN..=GPIO_MAX).contains(&pin)
}

/// An exported sysfs GPIO line configured as an output.
#[derive(Debug)]
pub struct ResetPin {
    pin: u32,
}

impl ResetPin {
    /// Exports `pin` and configures it as an output.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError::InvalidPin`] for pins outside the header range
    /// and [`GpioError::Io`] when sysfs access fails.
    pub fn export(pin: u32) -> Result<Self, GpioError> {
        if !is_valid_pin(pin) {
            return Err(GpioError::InvalidPin(pin));
        }

        // Exporting an already-exported pin yields EBUSY; that is fine.
        match fs::write("/sys/class/gpio/export", pin.to_string()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(16) => {}
            Err(source) => return Err(GpioError::Io { pin, source }),
        }

        let this = Self { pin };
        this.write_attr("direction", "out")?;
        Ok(this)
    }

    /// The BCM pin number.
    #[must_use]
    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Drives the line low (modem held in reset).
    ///
    /// # Errors
    ///
    /// Returns [`GpioError::Io`] when sysfs access fails.
    pub fn assert_reset(&self) -> Result<(), GpioError> {
        self.write_attr("value", "0")
    }

    /// Drives the line high (modem released from reset).
    ///
    /// # Errors
    ///
    /// Returns [`GpioError::Io`] when sysfs access fails.
    pub fn release_reset(&self) -> Result<(), GpioError> {
        self.write_attr("value", "1")
    }

    fn write_attr(&self, attr: &str, value: &str) -> Result<(), GpioError> {
        let mut path = PathBuf::from(format!("/sys/class/gpio/gpio{}", self.pin));
        path.push(attr);
        fs::write(&path, value).map_err(|source| GpioError::Io {
            pin: self.pin,
            source,
        })
    }
}
