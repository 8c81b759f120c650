//! Session and client configuration.
//!
//! All configuration is supplied at construction time.  [`Config::default()`]
//! matches the bridge tool's defaults: any vendor/product, endpoint 1, 10
//! retries, strict reads.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::Opcodes;
use crate::io::FaultKind;

/// Default bulk endpoint number.  OUT is this, IN is this with bit 7 set.
pub const DEFAULT_ENDPOINT: u8 = 1;

/// Default retry budget per raw transport operation
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default discovery backoff step.  Failed attempt `t` sleeps `t` steps.
pub const DEFAULT_DISCOVERY_STEP: Duration = Duration::from_millis(200);

/// Which device discovery picks, and the interface it claims on it.  An
/// absent id matches any device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Interface holding the bulk endpoint pair
    pub interface: u8,
}

impl DeviceFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|vid| vid == vendor_id)
            && self.product_id.is_none_or(|pid| pid == product_id)
    }
}

/// What to do after a transfer fails with a given [`FaultKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultPolicy {
    /// Retry at all.  If false the first fault of this kind is returned.
    pub retry: bool,
    /// Pause before the next attempt
    pub delay: Duration,
    /// Close and re-open the device before the next attempt
    pub reopen: bool,
}

impl FaultPolicy {
    /// Retry immediately on the same handle
    pub const fn immediate() -> Self {
        Self {
            retry: true,
            delay: Duration::ZERO,
            reopen: false,
        }
    }

    /// Re-open the device, then retry
    pub const fn reopen() -> Self {
        Self {
            retry: true,
            delay: Duration::ZERO,
            reopen: true,
        }
    }

    /// Give up on the first fault
    pub const fn fail() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
            reopen: false,
        }
    }
}

/// Retry budget and per fault kind policy.
///
/// `max_retries` is the number of attempts made by a single raw operation,
/// shared by all fault kinds.  At least one attempt is always made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Linear discovery backoff step
    pub discovery_step: Duration,
    pub io: FaultPolicy,
    /// Retried like `io` by default, although it rarely clears without
    /// outside intervention
    pub permission_denied: FaultPolicy,
    /// An empty bulk IN usually means the bridge dropped off the bus
    pub no_data: FaultPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            discovery_step: DEFAULT_DISCOVERY_STEP,
            io: FaultPolicy::immediate(),
            permission_denied: FaultPolicy::immediate(),
            no_data: FaultPolicy::reopen(),
        }
    }
}

impl RetryPolicy {
    pub fn for_kind(&self, kind: FaultKind) -> &FaultPolicy {
        match kind {
            FaultKind::PermissionDenied => &self.permission_denied,
            FaultKind::Io => &self.io,
            FaultKind::NoData => &self.no_data,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub(crate) fn discovery_delay(&self, attempt: u32) -> Duration {
        self.discovery_step * attempt
    }
}

/// How a word read which exhausted its retries is reported
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Fail the whole read
    #[default]
    Strict,
    /// Substitute [`crate::client::SENTINEL`] for the word and continue
    Lenient,
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub filter: DeviceFilter,
    /// Bulk endpoint number, without direction bit
    pub endpoint: u8,
    pub retry: RetryPolicy,
    /// Log each word transferred
    pub debug: bool,
    pub read_policy: ReadPolicy,
    pub opcodes: Opcodes,
    /// CSR directory (`csr.csv`) for the application's register map
    pub csr_csv: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::default(),
            endpoint: DEFAULT_ENDPOINT,
            retry: RetryPolicy::default(),
            debug: false,
            read_policy: ReadPolicy::default(),
            opcodes: Opcodes::default(),
            csr_csv: None,
        }
    }
}

impl Config {
    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.filter.vendor_id = Some(vendor_id);
        self
    }

    pub fn with_product_id(mut self, product_id: u16) -> Self {
        self.filter.product_id = Some(product_id);
        self
    }

    pub fn with_endpoint(mut self, endpoint: u8) -> Self {
        self.endpoint = endpoint & 0x7f;
        self
    }

    pub fn with_interface(mut self, interface: u8) -> Self {
        self.filter.interface = interface;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    pub fn with_opcodes(mut self, opcodes: Opcodes) -> Self {
        self.opcodes = opcodes;
        self
    }

    pub fn with_csr_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.csr_csv = Some(path.into());
        self
    }

    pub fn csr_csv(&self) -> Option<&Path> {
        self.csr_csv.as_deref()
    }

    /// Bulk OUT endpoint address
    pub fn out_endpoint(&self) -> u8 {
        self.endpoint
    }

    /// Bulk IN endpoint address
    pub fn in_endpoint(&self) -> u8 {
        self.endpoint | 0x80
    }
}
