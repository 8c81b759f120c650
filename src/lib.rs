//! Host-side CSR access to LiteX SoCs over a HydraUSB3 bulk bridge.
//!
//! The HydraUSB3 gateware exposes the SoC's Wishbone bus to the host through a
//! pair of USB bulk endpoints.  It does not speak a register access protocol
//! of its own: it tunnels the UART bridge's burst command set ("uartbone")
//! inside a thin USB envelope.  This crate implements the host side of that
//! tunnel, allowing 32-bit words to be read and written at arbitrary byte
//! addresses in the SoC's address space.
//!
//! ## Architecture
//!
//! Layers, from the wire upwards:
//!
//! - [`frame`] - Stateless encode/decode of the inner burst frame and the outer
//!   USB envelope
//! - [`io`] - Traits for the USB transport, so the protocol can be driven by
//!   real hardware ([`usb`]) or a simulated device ([`mock`])
//! - [`session`] - Ownership of a single device handle: discovery with backoff,
//!   close, and the raw bulk write/read primitives with bounded retry
//! - [`client`] - The public `read`/`write` operations, one physical round trip
//!   per word
//!
//! Every logical word access is strictly sequential:
//!
//! 1. `Uw` envelope carrying a read-burst frame for the word index
//! 2. `Ur` envelope asking the bridge for 4 bytes
//! 3. Bulk IN of 4 bytes, the big-endian word value
//!
//! Writes are a single `Uw` envelope carrying a write-burst frame, with no
//! acknowledgement beyond the USB transfer completing.
//!
//! ## Failure handling
//!
//! Device discovery is retried with linear backoff.  Bulk transfers are
//! retried in place, with the per fault kind policy in
//! [`config::RetryPolicy`].  An empty bulk IN is treated as a spurious
//! disconnect, and by default the device is closed and re-opened before the
//! next attempt.  Once the retry budget is exhausted the failure is returned as
//! an [`Error`].
//!
//! By default a failed word read fails the whole call.  [`config::ReadPolicy::Lenient`]
//! instead substitutes [`client::SENTINEL`] for that word and carries on, for
//! tools which prefer a complete (if partly bogus) dump to no dump at all.
//!
//! ## Getting Started
//!
//! ```no_run
//! use hydrabone::client::CsrClient;
//! use hydrabone::config::Config;
//! use hydrabone::usb::NusbBackend;
//!
//! let config = Config::default()
//!     .with_vendor_id(0x16c0)
//!     .with_product_id(0x05dc);
//! let mut client = CsrClient::new(NusbBackend::new(), config);
//! if !client.open() {
//!     panic!("no bridge found");
//! }
//! client.write(0x8200_0000, [0x1234_5678u32, 0x9abc_def0])?;
//! let words = client.read(0x8200_0000, 2)?;
//! assert_eq!(words, vec![0x1234_5678, 0x9abc_def0]);
//! # Ok::<(), hydrabone::Error>(())
//! ```
//!
//! Register names are resolved by the application's CSR directory (usually
//! loaded from the `csr.csv` LiteX emits), via [`client::RegisterMap`].
//!
//! ## Features
//!
//! Default features:
//! - `async` - Async session and client ([`session::AsyncSession`],
//!   [`client::AsyncCsrClient`]), runtime-agnostic
//! - `usb` - [`usb::NusbBackend`], the real USB transport, built on `nusb`
//!
//! Compile with `--no-default-features` to build against a custom transport
//! only.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod client;
pub mod config;
pub mod frame;
pub mod io;
pub mod mock;
pub mod session;
#[cfg(feature = "usb")]
pub mod usb;

pub use client::CsrClient;
#[cfg(feature = "async")]
pub use client::AsyncCsrClient;
pub use config::Config;

use core::fmt;

use crate::io::FaultKind;

/// Transport operation a fault occurred during
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Bulk OUT transfer
    Write,
    /// Bulk IN transfer
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => f.write_str("bulk write"),
            Operation::Read => f.write_str("bulk read"),
        }
    }
}

/// Optional word address, displayed as ` @ 0x........` when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location(pub Option<u32>);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, " @ {addr:#010x}"),
            None => Ok(()),
        }
    }
}

/// Bridge errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Device discovery exhausted its retries
    #[error("unable to find usb device after {attempts} attempt(s)")]
    DeviceNotFound { attempts: u32 },

    /// A transfer was attempted while the session was closed
    #[error("session not open")]
    SessionNotOpen,

    /// A bulk transfer kept failing until the retry budget ran out
    #[error("{op} failed ({kind}) after {attempts} attempt(s){location}: {detail}")]
    Transport {
        op: Operation,
        kind: FaultKind,
        attempts: u32,
        location: Location,
        detail: String,
    },

    /// The device returned fewer bytes than a value needs
    #[error("malformed response{location}: expected {expected} bytes, received {received}")]
    MalformedResponse {
        expected: usize,
        received: usize,
        location: Location,
    },

    /// Bytes which do not form a valid envelope or burst frame
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// Only incrementing bursts are supported
    #[error("unsupported burst mode: {0}")]
    UnsupportedBurstMode(String),

    /// The register directory has no entry for this name
    #[error("unknown register: {0}")]
    UnknownRegister(String),
}

impl Error {
    /// Attach the word address an access failed at.  Errors which already
    /// carry an address, or have no use for one, are returned unchanged.
    pub fn at(self, addr: u32) -> Self {
        match self {
            Error::Transport {
                op,
                kind,
                attempts,
                location: Location(None),
                detail,
            } => Error::Transport {
                op,
                kind,
                attempts,
                location: Location(Some(addr)),
                detail,
            },
            Error::MalformedResponse {
                expected,
                received,
                location: Location(None),
            } => Error::MalformedResponse {
                expected,
                received,
                location: Location(Some(addr)),
            },
            other => other,
        }
    }

    /// Fault kind, if this is a transport error
    pub fn transport_kind(&self) -> Option<FaultKind> {
        match self {
            Error::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Word address the failure occurred at, if known
    pub fn address(&self) -> Option<u32> {
        match self {
            Error::Transport { location, .. } | Error::MalformedResponse { location, .. } => {
                location.0
            }
            _ => None,
        }
    }
}

/// Type to represent the result of a bridge operation
pub type Result<T> = core::result::Result<T, Error>;
