//! Simulated bridge, for testing without hardware.
//!
//! [`MockBackend`] behaves like a HydraUSB3 bridge in front of a register
//! file:
//! - a read-burst frame latches the word index
//! - an expect envelope stages the latched register's value as the next
//!   bulk IN
//! - a write-burst frame stores the value
//!
//! Discovery, bulk writes and bulk reads can have faults scripted in
//! [`MockState`], and every successful transfer is logged there for
//! inspection.  Clones of a backend, and every device it opens, share one
//! state.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

#[cfg(feature = "async")]
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::DeviceFilter;
use crate::frame::{Envelope, Frame, Opcodes, word_index};
use crate::io::{DeviceError, FaultKind, UsbBackend, UsbDevice};
#[cfg(feature = "async")]
use crate::io::{AsyncUsbBackend, AsyncUsbDevice};

/// Scripted outcome of a bulk read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Fail the transfer
    Fail(FaultKind),
    /// Complete the transfer with no data
    Empty,
    /// Complete the transfer with these bytes
    Bytes(Vec<u8>),
}

/// State shared by a [`MockBackend`] and its devices
#[derive(Debug, Default)]
pub struct MockState {
    pub opcodes: Opcodes,
    /// Word index to value
    pub registers: HashMap<u32, u32>,
    /// Number of further discoveries which find nothing.  `u32::MAX`
    /// means the device never appears.
    pub absent_finds: u32,
    /// Failures returned by the next discoveries, before `absent_finds` is
    /// considered
    pub find_faults: VecDeque<FaultKind>,
    pub find_calls: u32,
    /// Interface claimed by the last successful discovery
    pub claimed_interface: Option<u8>,
    /// Failures returned by the next bulk writes
    pub write_script: VecDeque<FaultKind>,
    /// Outcomes of the next bulk reads, ahead of staged responses
    pub read_script: VecDeque<Scripted>,
    /// Successful bulk writes: endpoint, bytes
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Bulk reads attempted: endpoint, length
    pub reads: Vec<(u8, usize)>,
    latched: Option<u32>,
    staged: Option<Vec<u8>>,
}

impl MockState {
    /// Value of the word containing byte address `addr`
    pub fn register(&self, addr: u32) -> u32 {
        self.registers
            .get(&word_index(addr))
            .copied()
            .unwrap_or_default()
    }

    /// Set the word containing byte address `addr`
    pub fn set_register(&mut self, addr: u32, value: u32) {
        self.registers.insert(word_index(addr), value);
    }

    /// Burst frames carried by the logged writes, in order
    pub fn frames(&self) -> Vec<Frame> {
        self.writes
            .iter()
            .filter_map(|(_, bytes)| Envelope::parse(bytes).ok())
            .filter_map(|envelope| envelope.frame(&self.opcodes).ok())
            .collect()
    }

    fn find(&mut self, filter: &DeviceFilter) -> Result<bool, DeviceError> {
        self.find_calls += 1;
        if let Some(kind) = self.find_faults.pop_front() {
            return Err(DeviceError::new(kind, "scripted discovery fault"));
        }
        if self.absent_finds > 0 {
            if self.absent_finds != u32::MAX {
                self.absent_finds -= 1;
            }
            return Ok(false);
        }
        let found = filter.matches(MOCK_VENDOR_ID, MOCK_PRODUCT_ID);
        if found {
            self.claimed_interface = Some(filter.interface);
        }
        Ok(found)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError> {
        if let Some(kind) = self.write_script.pop_front() {
            return Err(DeviceError::new(kind, "scripted write fault"));
        }
        self.writes.push((endpoint, data.to_vec()));

        let envelope = match Envelope::parse(data) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Mock bridge ignoring transfer: {err}");
                return Ok(());
            }
        };
        match envelope {
            Envelope::Expect(n) => {
                let value = self
                    .latched
                    .take()
                    .map(|index| self.registers.get(&index).copied().unwrap_or_default());
                self.staged = value.map(|value| {
                    let mut bytes = value.to_be_bytes().to_vec();
                    bytes.resize(n as usize, 0);
                    bytes
                });
            }
            Envelope::Command(_) => match envelope.frame(&self.opcodes) {
                Ok(Frame::Read { word_index, .. }) => self.latched = Some(word_index),
                Ok(Frame::Write {
                    word_index, value, ..
                }) => {
                    self.registers.insert(word_index, value);
                }
                Err(err) => warn!("Mock bridge ignoring command: {err}"),
            },
        }
        Ok(())
    }

    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.reads.push((endpoint, len));
        match self.read_script.pop_front() {
            Some(Scripted::Fail(kind)) => Err(DeviceError::new(kind, "scripted read fault")),
            Some(Scripted::Empty) => Ok(Vec::new()),
            Some(Scripted::Bytes(bytes)) => Ok(bytes),
            None => {
                let mut data = self.staged.take().unwrap_or_default();
                data.truncate(len);
                Ok(data)
            }
        }
    }
}

/// Vendor id the simulated bridge enumerates with
pub const MOCK_VENDOR_ID: u16 = 0x16c0;

/// Product id the simulated bridge enumerates with
pub const MOCK_PRODUCT_ID: u16 = 0x05dc;

/// Simulated bridge backend
#[derive(Debug, Default, Clone)]
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl MockBackend {
    /// Bridge which is present from the first discovery
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge which never appears
    pub fn absent() -> Self {
        let backend = Self::default();
        backend.with_state(|s| s.absent_finds = u32::MAX);
        backend
    }

    /// Inspect or modify the shared state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    fn open(&self, filter: &DeviceFilter) -> Result<Option<MockDevice>, DeviceError> {
        let found = self.state().find(filter)?;
        Ok(found.then(|| MockDevice {
            state: Rc::clone(&self.state),
        }))
    }
}

/// Open handle on a [`MockBackend`]
#[derive(Debug)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl UsbBackend for MockBackend {
    type Device = MockDevice;

    fn find(&mut self, filter: &DeviceFilter) -> Result<Option<MockDevice>, DeviceError> {
        self.open(filter)
    }
}

impl UsbDevice for MockDevice {
    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.state.borrow_mut().bulk_write(endpoint, data)
    }

    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.state.borrow_mut().bulk_read(endpoint, len)
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncUsbBackend for MockBackend {
    type Device = MockDevice;

    async fn find(&mut self, filter: &DeviceFilter) -> Result<Option<MockDevice>, DeviceError> {
        self.open(filter)
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncUsbDevice for MockDevice {
    async fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.state.borrow_mut().bulk_write(endpoint, data)
    }

    async fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.state.borrow_mut().bulk_read(endpoint, len)
    }
}
