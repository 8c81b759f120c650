//! CSR client: the public word `read`/`write` operations.
//!
//! Every word is its own round trip - no batching, even for multi-word
//! accesses:
//! - Read: request envelope, 4 byte expect envelope, 4 byte bulk read
//! - Write: write envelope, fire-and-forget
//!
//! See [`CsrClient`] for blocking usage, and [`AsyncCsrClient`] for async
//! usage.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::AsyncCsrClient;
pub use sync::CsrClient;

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, HashMap};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Operation, Result};

/// Value substituted for an unreadable word under
/// [`crate::config::ReadPolicy::Lenient`]
pub const SENTINEL: u32 = 0xffff_ffff;

/// Most words a read reserves space for up front.  Longer reads grow as
/// words arrive.
const MAX_PREALLOC_WORDS: usize = 1024;

/// Burst addressing mode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BurstMode {
    /// Word `i` is at `address + 4 * i`
    #[default]
    Incrementing,
    /// Every word at `address`.  Not supported by the client.
    Fixed,
}

impl fmt::Display for BurstMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurstMode::Incrementing => f.write_str("incr"),
            BurstMode::Fixed => f.write_str("fixed"),
        }
    }
}

impl FromStr for BurstMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "incr" => Ok(BurstMode::Incrementing),
            "fixed" => Ok(BurstMode::Fixed),
            other => Err(Error::UnsupportedBurstMode(other.to_string())),
        }
    }
}

/// Values for a write - a single word, or a sequence written to consecutive
/// addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Words(Vec<u32>);

impl Words {
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

impl From<u32> for Words {
    fn from(value: u32) -> Self {
        Words(vec![value])
    }
}

impl From<Vec<u32>> for Words {
    fn from(values: Vec<u32>) -> Self {
        Words(values)
    }
}

impl From<&[u32]> for Words {
    fn from(values: &[u32]) -> Self {
        Words(values.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for Words {
    fn from(values: [u32; N]) -> Self {
        Words(values.to_vec())
    }
}

/// Register directory lookup.
///
/// The directory itself (usually parsed from the `csr.csv` LiteX emits, see
/// [`crate::config::Config::csr_csv`]) belongs to the application.
pub trait RegisterMap {
    /// Byte address of register `name`
    fn address_of(&self, name: &str) -> Option<u32>;
}

impl RegisterMap for HashMap<String, u32> {
    fn address_of(&self, name: &str) -> Option<u32> {
        self.get(name).copied()
    }
}

impl RegisterMap for BTreeMap<String, u32> {
    fn address_of(&self, name: &str) -> Option<u32> {
        self.get(name).copied()
    }
}

// Helper functions

fn check_burst(burst: BurstMode) -> Result<()> {
    if burst != BurstMode::Incrementing {
        Err(Error::UnsupportedBurstMode(burst.to_string()))
    } else {
        Ok(())
    }
}

fn resolve(map: &impl RegisterMap, name: &str) -> Result<u32> {
    map.address_of(name)
        .ok_or_else(|| Error::UnknownRegister(name.to_string()))
}

fn word_addr(addr: u32, offset: usize) -> u32 {
    addr.wrapping_add((offset as u32).wrapping_mul(4))
}

/// Whether a failed word read may be papered over with [`SENTINEL`].  Only
/// read-side failures qualify.
fn substitutable(err: &Error) -> bool {
    matches!(
        err,
        Error::Transport {
            op: Operation::Read,
            ..
        } | Error::MalformedResponse { .. }
    )
}

fn substitute(addr: u32, err: &Error) -> u32 {
    warn!("Read failed, substituting {SENTINEL:#010x} @ {addr:#010x}: {err}");
    SENTINEL
}
