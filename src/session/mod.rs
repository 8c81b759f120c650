//! Device session: ownership of a single bridge handle, and the raw bulk
//! transfer primitives with retry.
//!
//! A session is either [`State::Closed`] or [`State::Open`].  It starts
//! closed, and the handle only exists while open.  The raw transfers fail
//! fast with [`crate::Error::SessionNotOpen`] when closed.
//!
//! See [`Session`] for the blocking version and, with the `async` feature,
//! [`AsyncSession`] for the async version.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncSession};
pub use sync::{Delay, Session, StdDelay};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{DeviceError, FaultKind};
use crate::{Error, Location, Operation};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
}

/// The device binding.  The handle is only reachable while open.
#[derive(Debug)]
enum Link<H> {
    Closed,
    Open(H),
}

impl<H> Link<H> {
    fn state(&self) -> State {
        match self {
            Link::Closed => State::Closed,
            Link::Open(_) => State::Open,
        }
    }

    fn device(&mut self) -> Option<&mut H> {
        match self {
            Link::Open(device) => Some(device),
            Link::Closed => None,
        }
    }
}

// Helper functions

fn lost_device() -> DeviceError {
    DeviceError::new(FaultKind::NoData, "device not re-attached")
}

fn empty_read() -> DeviceError {
    DeviceError::new(FaultKind::NoData, "bulk read returned no data")
}

fn report_discovery_fault(attempt: u32, err: &DeviceError) {
    match err.kind() {
        FaultKind::PermissionDenied => warn!(
            "Access denied opening usb device (attempt {}), elevated privileges may be required: {}",
            attempt + 1,
            err.message()
        ),
        _ => warn!("Failed to open usb device (attempt {}): {err}", attempt + 1),
    }
}

fn report_fault(op: Operation, attempt: u32, attempts: u32, err: &DeviceError) {
    match err.kind() {
        FaultKind::PermissionDenied => warn!(
            "{op}: access denied (attempt {}/{attempts}), elevated privileges may be required: {}",
            attempt + 1,
            err.message()
        ),
        _ => warn!("{op}: {err} (attempt {}/{attempts})", attempt + 1),
    }
}

fn exhausted(op: Operation, attempts: u32, last: Option<DeviceError>) -> Error {
    let last = last.unwrap_or_else(|| DeviceError::new(FaultKind::Io, "no attempt made"));
    error!("{op} giving up after {attempts} attempt(s): {last}");
    Error::Transport {
        op,
        kind: last.kind(),
        attempts,
        location: Location(None),
        detail: last.message().to_string(),
    }
}
