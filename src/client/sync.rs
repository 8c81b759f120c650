//! Blocking CSR client.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::{BurstMode, RegisterMap, Words};
use crate::client::{MAX_PREALLOC_WORDS, check_burst, resolve, substitutable, substitute, word_addr};
use crate::config::{Config, ReadPolicy};
use crate::frame::{self, WORD_BYTES};
use crate::io::UsbBackend;
use crate::session::{Delay, Session, State, StdDelay};
use crate::Result;

/// Blocking CSR client.
///
/// Example usage, against the simulated bridge:
///
/// ```rust
/// use hydrabone::client::CsrClient;
/// use hydrabone::config::Config;
/// use hydrabone::mock::MockBackend;
///
/// let mut client = CsrClient::new(MockBackend::new(), Config::default());
/// assert!(client.open());
/// client.write(0x1000, 0xcafe_f00du32)?;
/// assert_eq!(client.read(0x1000, 1)?, vec![0xcafe_f00d]);
/// # Ok::<(), hydrabone::Error>(())
/// ```
pub struct CsrClient<B: UsbBackend, D: Delay = StdDelay> {
    session: Session<B, D>,
}

impl<B: UsbBackend> CsrClient<B, StdDelay> {
    /// Create a new CsrClient.  The session starts closed - call
    /// [`Self::open()`] before any access.
    pub fn new(backend: B, config: Config) -> Self {
        Self {
            session: Session::new(backend, config),
        }
    }
}

impl<B: UsbBackend, D: Delay> CsrClient<B, D> {
    /// Create a client around an existing session
    pub fn from_session(session: Session<B, D>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session<B, D> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<B, D> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<B, D> {
        self.session
    }

    pub fn config(&self) -> &Config {
        self.session.config()
    }

    pub fn open(&mut self) -> bool {
        self.session.open()
    }

    pub fn close(&mut self) {
        self.session.close()
    }

    pub fn is_open(&self) -> bool {
        self.session.state() == State::Open
    }

    /// Read `length` consecutive words starting at `addr`.
    ///
    /// Returns exactly `length` values, in address order.  Under
    /// [`ReadPolicy::Lenient`] a word whose read fails is returned as
    /// [`crate::client::SENTINEL`].
    pub fn read(&mut self, addr: u32, length: usize) -> Result<Vec<u32>> {
        self.read_burst(addr, length, BurstMode::Incrementing)
    }

    /// Read with an explicit burst mode.  Only
    /// [`BurstMode::Incrementing`] is supported.
    ///
    /// Under [`ReadPolicy::Lenient`], if a failed word leaves the session
    /// closed (the bridge dropped off the bus and did not come back), the
    /// session is reconnected once.  If that fails too, every remaining word
    /// is returned as [`crate::client::SENTINEL`].
    pub fn read_burst(&mut self, addr: u32, length: usize, burst: BurstMode) -> Result<Vec<u32>> {
        check_burst(burst)?;

        let lenient = self.config().read_policy == ReadPolicy::Lenient;
        let mut values = Vec::with_capacity(length.min(MAX_PREALLOC_WORDS));
        let mut lost = None;
        for ii in 0..length {
            let word = word_addr(addr, ii);
            if let Some(err) = &lost {
                values.push(substitute(word, err));
                continue;
            }

            match self.read_word(word) {
                Ok(value) => {
                    if self.config().debug {
                        debug!("read {value:#010x} @ {word:#010x}");
                    }
                    values.push(value);
                }
                Err(err) if lenient && substitutable(&err) => {
                    values.push(substitute(word, &err));
                    if ii + 1 < length && !self.is_open() {
                        lost = self.session.connect().err();
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Ok(values)
    }

    /// Read the single word at `addr`
    pub fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let value = self.read_word(addr)?;
        if self.config().debug {
            debug!("read {value:#010x} @ {addr:#010x}");
        }
        Ok(value)
    }

    /// Write one or more words, the first at `addr` and each following word
    /// 4 bytes on.
    ///
    /// There is no read-back - success means each USB transfer completed.
    pub fn write(&mut self, addr: u32, data: impl Into<Words>) -> Result<()> {
        let data = data.into();
        for (ii, value) in data.as_slice().iter().enumerate() {
            let word = word_addr(addr, ii);
            let envelope = frame::encode_write(word, *value, &self.config().opcodes);
            self.session
                .raw_write(&envelope.to_bytes())
                .map_err(|e| e.at(word))?;
            if self.config().debug {
                debug!("write {value:#010x} @ {word:#010x}");
            }
        }

        Ok(())
    }

    /// Read `length` words from the register `name`, resolved by `map`.
    pub fn read_register(
        &mut self,
        map: &impl RegisterMap,
        name: &str,
        length: usize,
    ) -> Result<Vec<u32>> {
        let addr = resolve(map, name)?;
        self.read(addr, length)
    }

    /// Write to the register `name`, resolved by `map`.
    pub fn write_register(
        &mut self,
        map: &impl RegisterMap,
        name: &str,
        data: impl Into<Words>,
    ) -> Result<()> {
        let addr = resolve(map, name)?;
        self.write(addr, data)
    }
}

// Internal functions
impl<B: UsbBackend, D: Delay> CsrClient<B, D> {
    fn read_word(&mut self, addr: u32) -> Result<u32> {
        let request = frame::encode_read_request(addr, &self.config().opcodes);
        let expect = frame::encode_read_expect(WORD_BYTES as u8);

        self.session
            .raw_write(&request.to_bytes())
            .map_err(|e| e.at(addr))?;
        self.session
            .raw_write(&expect.to_bytes())
            .map_err(|e| e.at(addr))?;
        let data = self.session.raw_read(WORD_BYTES).map_err(|e| e.at(addr))?;

        frame::decode_value(&data).map_err(|e| e.at(addr))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::SENTINEL;
    use crate::frame::{Envelope, Frame};
    use crate::io::FaultKind;
    use crate::mock::{MockBackend, Scripted};
    use crate::{Error, Operation};

    struct NoDelay;

    impl Delay for NoDelay {
        fn delay(&mut self, _duration: Duration) {}
    }

    fn client(backend: &MockBackend, config: Config) -> CsrClient<MockBackend, NoDelay> {
        let mut client =
            CsrClient::from_session(Session::with_delay(backend.clone(), config, NoDelay));
        assert!(client.open());
        client
    }

    #[test]
    fn read_sends_request_then_expect() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.set_register(0x40, 0x0102_0304));
        let mut client = client(&backend, Config::default());

        assert_eq!(client.read(0x40, 1).unwrap(), vec![0x0102_0304]);

        let writes = backend.with_state(|s| s.writes.clone());
        assert_eq!(writes.len(), 2);
        assert_eq!(
            Envelope::parse(&writes[0].1)
                .unwrap()
                .frame(&client.config().opcodes)
                .unwrap(),
            Frame::Read {
                word_index: 0x10,
                count: 1
            }
        );
        assert_eq!(Envelope::parse(&writes[1].1).unwrap(), Envelope::Expect(4));
        assert_eq!(backend.with_state(|s| s.reads.clone()), vec![(0x81, 4)]);
    }

    #[test]
    fn zero_length_read_is_empty() {
        let backend = MockBackend::new();
        let mut client = client(&backend, Config::default());
        assert_eq!(client.read(0, 0).unwrap(), Vec::<u32>::new());
        assert!(backend.with_state(|s| s.writes.is_empty()));
    }

    #[test]
    fn fixed_burst_rejected() {
        let backend = MockBackend::new();
        let mut client = client(&backend, Config::default());
        assert_eq!(
            client.read_burst(0, 1, BurstMode::Fixed),
            Err(Error::UnsupportedBurstMode("fixed".to_string()))
        );
        assert!(backend.with_state(|s| s.writes.is_empty()));
    }

    #[test]
    fn closed_client_fails_fast() {
        let backend = MockBackend::new();
        let mut client = CsrClient::from_session(Session::with_delay(
            backend.clone(),
            Config::default().with_read_policy(ReadPolicy::Lenient),
            NoDelay,
        ));
        assert_eq!(client.read(0, 2), Err(Error::SessionNotOpen));
        assert_eq!(client.write(0, 1u32), Err(Error::SessionNotOpen));
    }

    #[test]
    fn short_response_is_malformed() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.read_script.push_back(Scripted::Bytes(vec![0xaa, 0xbb])));
        let mut client = client(&backend, Config::default());
        let err = client.read(0x20, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedResponse {
                expected: 4,
                received: 2,
                ..
            }
        ));
        assert_eq!(err.address(), Some(0x20));
    }

    #[test]
    fn lenient_read_substitutes_sentinel() {
        let backend = MockBackend::new();
        backend.with_state(|s| {
            s.set_register(0x0, 1);
            s.set_register(0x8, 3);
            s.read_script.push_back(Scripted::Bytes(vec![0, 0, 0, 1]));
            s.read_script
                .extend(std::iter::repeat_n(Scripted::Fail(FaultKind::Io), 3));
        });
        let config = Config::default()
            .with_max_retries(3)
            .with_debug(true)
            .with_read_policy(ReadPolicy::Lenient);
        let mut client = client(&backend, config);
        assert_eq!(client.read(0x0, 3).unwrap(), vec![1, SENTINEL, 3]);
    }

    #[test]
    fn lenient_read_fills_in_once_device_is_gone() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.read_script.push_back(Scripted::Empty));
        let config = Config::default()
            .with_max_retries(2)
            .with_read_policy(ReadPolicy::Lenient);
        let mut client = client(&backend, config);
        backend.with_state(|s| s.absent_finds = u32::MAX);

        assert_eq!(client.read(0x0, 3).unwrap(), vec![SENTINEL; 3]);
        assert!(!client.is_open());
        // Open, the two-attempt reopen, then one two-attempt reconnect.
        assert_eq!(backend.with_state(|s| s.find_calls), 5);
        assert_eq!(backend.with_state(|s| s.reads.len()), 1);
    }

    #[test]
    fn lenient_read_reconnects_after_lost_device() {
        let backend = MockBackend::new();
        backend.with_state(|s| {
            s.set_register(0x4, 9);
            s.read_script.push_back(Scripted::Empty);
        });
        let config = Config::default()
            .with_max_retries(2)
            .with_read_policy(ReadPolicy::Lenient);
        let mut client = client(&backend, config);
        backend.with_state(|s| s.absent_finds = 2);

        assert_eq!(client.read(0x0, 2).unwrap(), vec![SENTINEL, 9]);
        assert!(client.is_open());
        assert_eq!(backend.with_state(|s| s.find_calls), 4);
    }

    #[test]
    fn strict_read_stops_at_lost_device() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.read_script.push_back(Scripted::Empty));
        let mut client = client(&backend, Config::default().with_max_retries(2));
        backend.with_state(|s| s.absent_finds = u32::MAX);

        let err = client.read(0x0, 2).unwrap_err();
        assert_eq!(err.transport_kind(), Some(FaultKind::NoData));
        assert_eq!(backend.with_state(|s| s.find_calls), 3);
    }

    #[test]
    fn oversized_read_fails_cleanly() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.write_script.push_back(FaultKind::Io));
        let mut client = client(&backend, Config::default().with_max_retries(1));
        let err = client.read(0x0, usize::MAX).unwrap_err();
        assert_eq!(err.transport_kind(), Some(FaultKind::Io));

        client.close();
        assert_eq!(client.read(0x0, usize::MAX), Err(Error::SessionNotOpen));
    }

    #[test]
    fn lenient_read_does_not_mask_write_faults() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.write_script.extend([FaultKind::Io; 3]));
        let config = Config::default()
            .with_max_retries(3)
            .with_read_policy(ReadPolicy::Lenient);
        let mut client = client(&backend, config);
        let err = client.read(0x10, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                op: Operation::Write,
                ..
            }
        ));
        assert_eq!(err.address(), Some(0x10));
    }

    #[test]
    fn write_fault_carries_address() {
        let backend = MockBackend::new();
        backend.with_state(|s| s.write_script.extend([FaultKind::PermissionDenied; 2]));
        let mut client = client(&backend, Config::default().with_max_retries(2));
        let err = client.write(0x1234, 5u32).unwrap_err();
        assert_eq!(err.transport_kind(), Some(FaultKind::PermissionDenied));
        assert_eq!(err.address(), Some(0x1234));
        assert!(err.to_string().contains("@ 0x00001234"));
    }

    #[test]
    fn register_names_resolve() {
        let backend = MockBackend::new();
        let mut map = std::collections::BTreeMap::new();
        map.insert("ctrl_scratch".to_string(), 0x4u32);
        let mut client = client(&backend, Config::default());
        client.write_register(&map, "ctrl_scratch", 0x1234_5678u32).unwrap();
        assert_eq!(
            client.read_register(&map, "ctrl_scratch", 1).unwrap(),
            vec![0x1234_5678]
        );
        assert_eq!(
            client.read_register(&map, "ctrl_reset", 1),
            Err(Error::UnknownRegister("ctrl_reset".to_string()))
        );
    }
}
