//! Blocking session - the usual way to drive the bridge from a host tool.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::{Config, FaultPolicy};
use crate::io::{DeviceError, UsbBackend, UsbDevice};
use crate::session::{Link, State};
use crate::session::{empty_read, exhausted, lost_device, report_discovery_fault, report_fault};
use crate::{Error, Operation, Result};

/// Blocking pause between attempts.
///
/// Sessions sleep through this trait, rather than calling
/// `std::thread::sleep()` directly, so tests can run without waiting out
/// the backoff.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

/// [`Delay`] using `std::thread::sleep()`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Blocking device session.
///
/// Owns the backend and, while open, the device handle.  Not `Clone` - there
/// is exactly one owner of the handle.
///
/// ```rust
/// use hydrabone::config::Config;
/// use hydrabone::mock::MockBackend;
/// use hydrabone::session::{Session, State};
///
/// let mut session = Session::new(MockBackend::new(), Config::default());
/// assert_eq!(session.state(), State::Closed);
/// assert!(session.open());
/// session.raw_write(b"Ur\x04").unwrap();
/// session.close();
/// assert!(!session.is_open());
/// ```
pub struct Session<B: UsbBackend, D: Delay = StdDelay> {
    backend: B,
    delay: D,
    config: Config,
    link: Link<B::Device>,
}

impl<B: UsbBackend> Session<B, StdDelay> {
    /// Create a new, closed, session.
    pub fn new(backend: B, config: Config) -> Self {
        Self::with_delay(backend, config, StdDelay)
    }
}

impl<B: UsbBackend, D: Delay> Session<B, D> {
    /// Create a new, closed, session which pauses using `delay`.
    pub fn with_delay(backend: B, config: Config, delay: D) -> Self {
        Self {
            backend,
            delay,
            config,
            link: Link::Closed,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> State {
        self.link.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Open the session, returning whether it is now open.
    ///
    /// See [`Self::connect()`].
    pub fn open(&mut self) -> bool {
        self.connect().is_ok()
    }

    /// Open the session.
    ///
    /// Does nothing if already open.  Otherwise makes up to `max_retries`
    /// discovery attempts, pausing `discovery_step * t` after failed attempt
    /// `t`.
    ///
    /// Returns [`Error::DeviceNotFound`] if no attempt succeeded, in which
    /// case the session remains closed.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let attempts = self.config.retry.attempts();
        for attempt in 0..attempts {
            match self.backend.find(&self.config.filter) {
                Ok(Some(device)) => {
                    self.link = Link::Open(device);
                    if self.config.debug {
                        debug!("Device connected after {} tries", attempt + 1);
                    }
                    return Ok(());
                }
                Ok(None) => trace!("No matching usb device (attempt {})", attempt + 1),
                Err(err) => report_discovery_fault(attempt, &err),
            }

            if attempt + 1 < attempts {
                let pause = self.config.retry.discovery_delay(attempt);
                self.delay.delay(pause);
            }
        }

        error!("Unable to find usb device after {attempts} tries");
        Err(Error::DeviceNotFound { attempts })
    }

    /// Close the session, releasing the device.  Does nothing if closed.
    pub fn close(&mut self) {
        if let Link::Open(_) = self.link {
            self.link = Link::Closed;
            debug!("Session closed");
        }
    }

    /// Send `data` as a single bulk OUT transfer, retrying according to the
    /// session's [`crate::config::RetryPolicy`].
    pub fn raw_write(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::SessionNotOpen);
        }

        let endpoint = self.config.out_endpoint();
        let attempts = self.config.retry.attempts();
        let mut last = None;
        for attempt in 0..attempts {
            trace!("Bulk write EP {endpoint:#04x}: {data:02x?}");
            let result = match self.link.device() {
                Some(device) => device.bulk_write(endpoint, data),
                None => Err(lost_device()),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if let Some(policy) = self.on_fault(Operation::Write, attempt, attempts, &err)
                    {
                        self.recover(&policy);
                    } else if !self.config.retry.for_kind(err.kind()).retry {
                        return Err(exhausted(Operation::Write, attempt + 1, Some(err)));
                    }
                    last = Some(err);
                }
            }
        }

        Err(exhausted(Operation::Write, attempts, last))
    }

    /// Read up to `len` bytes as a single bulk IN transfer, retrying
    /// according to the session's [`crate::config::RetryPolicy`].
    ///
    /// An empty transfer is a [`crate::io::FaultKind::NoData`] fault.  A
    /// short, non-empty, transfer is returned as is.
    pub fn raw_read(&mut self, len: usize) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(Error::SessionNotOpen);
        }

        let endpoint = self.config.in_endpoint();
        let attempts = self.config.retry.attempts();
        let mut last = None;
        for attempt in 0..attempts {
            let result = match self.link.device() {
                Some(device) => match device.bulk_read(endpoint, len) {
                    Ok(data) if data.is_empty() => Err(empty_read()),
                    other => other,
                },
                None => Err(lost_device()),
            };

            match result {
                Ok(data) => {
                    trace!("Bulk read EP {endpoint:#04x}: {data:02x?}");
                    return Ok(data);
                }
                Err(err) => {
                    if let Some(policy) = self.on_fault(Operation::Read, attempt, attempts, &err) {
                        self.recover(&policy);
                    } else if !self.config.retry.for_kind(err.kind()).retry {
                        return Err(exhausted(Operation::Read, attempt + 1, Some(err)));
                    }
                    last = Some(err);
                }
            }
        }

        Err(exhausted(Operation::Read, attempts, last))
    }
}

// Internal functions
impl<B: UsbBackend, D: Delay> Session<B, D> {
    /// Log a fault, and return the policy to apply if another attempt is to
    /// be made.
    fn on_fault(
        &self,
        op: Operation,
        attempt: u32,
        attempts: u32,
        err: &DeviceError,
    ) -> Option<FaultPolicy> {
        report_fault(op, attempt, attempts, err);
        let policy = *self.config.retry.for_kind(err.kind());
        (policy.retry && attempt + 1 < attempts).then_some(policy)
    }

    fn recover(&mut self, policy: &FaultPolicy) {
        self.delay.delay(policy.delay);
        if policy.reopen {
            info!("Re-opening usb device");
            self.close();
            self.open();
        }
    }
}
