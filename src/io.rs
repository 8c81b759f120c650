//! Traits for the USB transport underneath a session.
//!
//! A [`UsbBackend`] discovers and opens the bridge, yielding a [`UsbDevice`]
//! handle which performs the bulk transfers.  The session owns the handle
//! exclusively, and drops it to release the device.
//!
//! # Possible implementations
//!
//! - [`crate::usb::NusbBackend`] for real hardware
//! - [`crate::mock::MockBackend`], a simulated register-backed bridge for
//!   tests
//! - Anything else which can move bytes to and from the bridge's bulk
//!   endpoints, such as a USB/IP client
//!
//! Async equivalents, [`AsyncUsbBackend`] and [`AsyncUsbDevice`], are
//! available with the `async` feature.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::fmt;

#[cfg(feature = "async")]
use async_trait::async_trait;

use crate::config::DeviceFilter;

/// Transport fault classes.  Each has its own entry in
/// [`crate::config::RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The OS refused access to the device
    PermissionDenied,
    /// Any other transfer or open failure
    Io,
    /// A bulk IN transfer completed without data
    NoData,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::PermissionDenied => f.write_str("permission denied"),
            FaultKind::Io => f.write_str("i/o error"),
            FaultKind::NoData => f.write_str("no data"),
        }
    }
}

/// A single failed transport attempt, as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    kind: FaultKind,
    message: String,
}

impl DeviceError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DeviceError {}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => FaultKind::PermissionDenied,
            _ => FaultKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

/// Discovers and opens the bridge.
pub trait UsbBackend {
    /// Open device handle
    type Device: UsbDevice;

    /// Look for a device matching `filter` and open it.
    ///
    /// Returns `Ok(None)` if no matching device is currently present.  This
    /// is the normal state while the bridge is still enumerating, and is
    /// retried by the session.
    ///
    /// # Errors
    ///
    /// Returns an error if a matching device was found but could not be
    /// opened or claimed.
    fn find(&mut self, filter: &DeviceFilter) -> Result<Option<Self::Device>, DeviceError>;
}

/// Bulk transfers on an open device.
pub trait UsbDevice {
    /// Write `data` to the bulk OUT endpoint `endpoint` as a single
    /// transfer.
    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError>;

    /// Read up to `len` bytes from the bulk IN endpoint `endpoint`
    /// (direction bit already set).
    ///
    /// An empty result is a valid return, and is treated by the session as
    /// [`FaultKind::NoData`].
    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError>;
}

/// Async version of [`UsbBackend`]
#[cfg(feature = "async")]
#[async_trait(?Send)]
pub trait AsyncUsbBackend {
    type Device: AsyncUsbDevice;

    /// See [`UsbBackend::find`]
    async fn find(&mut self, filter: &DeviceFilter) -> Result<Option<Self::Device>, DeviceError>;
}

/// Async version of [`UsbDevice`]
#[cfg(feature = "async")]
#[async_trait(?Send)]
pub trait AsyncUsbDevice {
    /// See [`UsbDevice::bulk_write`]
    async fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError>;

    /// See [`UsbDevice::bulk_read`]
    async fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError>;
}
