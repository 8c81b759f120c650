//! Asynchronous session - for hosts already running an async runtime.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::{Config, FaultPolicy};
use crate::io::{AsyncUsbBackend, AsyncUsbDevice, DeviceError};
use crate::session::{Link, State};
use crate::session::{empty_read, exhausted, lost_device, report_discovery_fault, report_fault};
use crate::{Error, Operation, Result};

/// Async pause between attempts.
///
/// Application must provide an implementation of this trait, so the session
/// can back off without blocking the executor.  This keeps `hydrabone` free
/// of any specific async runtime.
///
/// Example:
///
/// ```rust
/// use core::time::Duration;
/// use hydrabone::session::AsyncDelay;
///
/// struct TokioDelay;
/// impl AsyncDelay for TokioDelay {
///     async fn delay(&mut self, duration: Duration) {
///         # let _ = duration;
///         // tokio::time::sleep(duration).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay(&mut self, duration: Duration) -> impl Future<Output = ()>;
}

/// Async device session.
///
/// Behaves exactly as [`crate::session::Session`], awaiting each transfer in
/// turn.
pub struct AsyncSession<B: AsyncUsbBackend, D: AsyncDelay> {
    backend: B,
    delay: D,
    config: Config,
    link: Link<B::Device>,
}

impl<B: AsyncUsbBackend, D: AsyncDelay> AsyncSession<B, D> {
    /// Create a new, closed, session.
    pub fn new(backend: B, config: Config, delay: D) -> Self {
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
    pub async fn open(&mut self) -> bool {
        self.connect().await.is_ok()
    }

    /// Open the session.  See [`crate::session::Session::connect()`].
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let attempts = self.config.retry.attempts();
        for attempt in 0..attempts {
            match self.backend.find(&self.config.filter).await {
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
                self.delay.delay(pause).await;
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

    /// See [`crate::session::Session::raw_write()`]
    pub async fn raw_write(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::SessionNotOpen);
        }

        let endpoint = self.config.out_endpoint();
        let attempts = self.config.retry.attempts();
        let mut last = None;
        for attempt in 0..attempts {
            trace!("Bulk write EP {endpoint:#04x}: {data:02x?}");
            let result = match self.link.device() {
                Some(device) => device.bulk_write(endpoint, data).await,
                None => Err(lost_device()),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if let Some(policy) = self.on_fault(Operation::Write, attempt, attempts, &err)
                    {
                        self.recover(&policy).await;
                    } else if !self.config.retry.for_kind(err.kind()).retry {
                        return Err(exhausted(Operation::Write, attempt + 1, Some(err)));
                    }
                    last = Some(err);
                }
            }
        }

        Err(exhausted(Operation::Write, attempts, last))
    }

    /// See [`crate::session::Session::raw_read()`]
    pub async fn raw_read(&mut self, len: usize) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(Error::SessionNotOpen);
        }

        let endpoint = self.config.in_endpoint();
        let attempts = self.config.retry.attempts();
        let mut last = None;
        for attempt in 0..attempts {
            let result = match self.link.device() {
                Some(device) => match device.bulk_read(endpoint, len).await {
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
                        self.recover(&policy).await;
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
impl<B: AsyncUsbBackend, D: AsyncDelay> AsyncSession<B, D> {
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

    async fn recover(&mut self, policy: &FaultPolicy) {
        if !policy.delay.is_zero() {
            self.delay.delay(policy.delay).await;
        }
        if policy.reopen {
            info!("Re-opening usb device");
            self.close();
            self.open().await;
        }
    }
}
