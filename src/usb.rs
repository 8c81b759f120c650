//! USB transport using [`nusb`].
//!
//! The bridge enumerates with a single vendor-specific interface holding a
//! bulk OUT/IN endpoint pair.  [`NusbBackend`] picks the first device
//! matching the session's [`DeviceFilter`], opens it and claims the
//! filter's interface (see [`crate::config::Config::with_interface()`]).
//!
//! Transfers have no timeout, so a write to a wedged bridge can block
//! indefinitely.
//!
//! Permission problems show up when the device is opened, and are reported
//! as [`FaultKind::PermissionDenied`] so the session can log them
//! distinctly.  On Linux this usually means a udev rule is missing.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
use async_trait::async_trait;
use futures_lite::future::block_on;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use nusb::transfer::{RequestBuffer, TransferError};

use crate::config::DeviceFilter;
use crate::io::{DeviceError, FaultKind, UsbBackend, UsbDevice};
#[cfg(feature = "async")]
use crate::io::{AsyncUsbBackend, AsyncUsbDevice};

/// nusb-backed device discovery
#[derive(Debug, Default, Clone, Copy)]
pub struct NusbBackend;

impl NusbBackend {
    pub fn new() -> Self {
        Self
    }

    fn locate(&self, filter: &DeviceFilter) -> Result<Option<NusbDevice>, DeviceError> {
        let mut devices = nusb::list_devices()?;
        let Some(info) = devices.find(|info| filter.matches(info.vendor_id(), info.product_id()))
        else {
            return Ok(None);
        };

        debug!(
            "Opening usb device {:04x}:{:04x} bus {} addr {} interface {}",
            info.vendor_id(),
            info.product_id(),
            info.bus_number(),
            info.device_address(),
            filter.interface
        );
        let device = info.open()?;
        let interface = device.claim_interface(filter.interface)?;

        Ok(Some(NusbDevice { interface }))
    }
}

/// Open bridge, with its interface claimed.  Dropping it releases the
/// interface and closes the device.
pub struct NusbDevice {
    interface: nusb::Interface,
}

fn transfer_error(err: TransferError) -> DeviceError {
    let message = match err {
        TransferError::Disconnected => "device disconnected".to_string(),
        TransferError::Stall => "endpoint stalled".to_string(),
        other => other.to_string(),
    };
    DeviceError::new(FaultKind::Io, message)
}

impl UsbBackend for NusbBackend {
    type Device = NusbDevice;

    fn find(&mut self, filter: &DeviceFilter) -> Result<Option<NusbDevice>, DeviceError> {
        self.locate(filter)
    }
}

impl UsbDevice for NusbDevice {
    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError> {
        block_on(self.interface.bulk_out(endpoint, data.to_vec()))
            .into_result()
            .map(|_| ())
            .map_err(transfer_error)
    }

    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        block_on(self.interface.bulk_in(endpoint, RequestBuffer::new(len)))
            .into_result()
            .map_err(transfer_error)
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncUsbBackend for NusbBackend {
    type Device = NusbDevice;

    async fn find(&mut self, filter: &DeviceFilter) -> Result<Option<NusbDevice>, DeviceError> {
        self.locate(filter)
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncUsbDevice for NusbDevice {
    async fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.interface
            .bulk_out(endpoint, data.to_vec())
            .await
            .into_result()
            .map(|_| ())
            .map_err(transfer_error)
    }

    async fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.interface
            .bulk_in(endpoint, RequestBuffer::new(len))
            .await
            .into_result()
            .map_err(transfer_error)
    }
}
