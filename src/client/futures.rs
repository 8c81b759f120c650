//! Asynchronous CSR client.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::{BurstMode, RegisterMap, Words};
use crate::client::{MAX_PREALLOC_WORDS, check_burst, resolve, substitutable, substitute, word_addr};
use crate::config::{Config, ReadPolicy};
use crate::frame::{self, WORD_BYTES};
use crate::io::AsyncUsbBackend;
use crate::session::{AsyncDelay, AsyncSession, State};
use crate::Result;

/// Async CSR client.
///
/// See [`AsyncDelay`] for required delay trait.
///
/// Example usage:
///
/// ```rust,ignore
/// use hydrabone::client::AsyncCsrClient;
/// use hydrabone::config::Config;
/// use hydrabone::usb::NusbBackend;
///
/// let mut client = AsyncCsrClient::new(NusbBackend::new(), Config::default(), Delay);
/// if client.open().await {
///     let id = client.read_u32(0x0000_0000).await?;
/// }
/// ```
pub struct AsyncCsrClient<B: AsyncUsbBackend, D: AsyncDelay> {
    session: AsyncSession<B, D>,
}

impl<B: AsyncUsbBackend, D: AsyncDelay> AsyncCsrClient<B, D> {
    /// Create a new AsyncCsrClient.  The session starts closed.
    pub fn new(backend: B, config: Config, delay: D) -> Self {
        Self {
            session: AsyncSession::new(backend, config, delay),
        }
    }

    pub fn from_session(session: AsyncSession<B, D>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &AsyncSession<B, D> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut AsyncSession<B, D> {
        &mut self.session
    }

    pub fn into_session(self) -> AsyncSession<B, D> {
        self.session
    }

    pub fn config(&self) -> &Config {
        self.session.config()
    }

    pub async fn open(&mut self) -> bool {
        self.session.open().await
    }

    pub fn close(&mut self) {
        self.session.close()
    }

    pub fn is_open(&self) -> bool {
        self.session.state() == State::Open
    }

    /// See [`crate::client::CsrClient::read()`]
    pub async fn read(&mut self, addr: u32, length: usize) -> Result<Vec<u32>> {
        self.read_burst(addr, length, BurstMode::Incrementing).await
    }

    /// See [`crate::client::CsrClient::read_burst()`]
    pub async fn read_burst(
        &mut self,
        addr: u32,
        length: usize,
        burst: BurstMode,
    ) -> Result<Vec<u32>> {
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

            match self.read_word(word).await {
                Ok(value) => {
                    if self.config().debug {
                        debug!("read {value:#010x} @ {word:#010x}");
                    }
                    values.push(value);
                }
                Err(err) if lenient && substitutable(&err) => {
                    values.push(substitute(word, &err));
                    if ii + 1 < length && !self.is_open() {
                        lost = self.session.connect().await.err();
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Ok(values)
    }

    pub async fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let value = self.read_word(addr).await?;
        if self.config().debug {
            debug!("read {value:#010x} @ {addr:#010x}");
        }
        Ok(value)
    }

    /// See [`crate::client::CsrClient::write()`]
    pub async fn write(&mut self, addr: u32, data: impl Into<Words>) -> Result<()> {
        let data = data.into();
        for (ii, value) in data.as_slice().iter().enumerate() {
            let word = word_addr(addr, ii);
            let envelope = frame::encode_write(word, *value, &self.config().opcodes);
            self.session
                .raw_write(&envelope.to_bytes())
                .await
                .map_err(|e| e.at(word))?;
            if self.config().debug {
                debug!("write {value:#010x} @ {word:#010x}");
            }
        }

        Ok(())
    }

    pub async fn read_register(
        &mut self,
        map: &impl RegisterMap,
        name: &str,
        length: usize,
    ) -> Result<Vec<u32>> {
        let addr = resolve(map, name)?;
        self.read(addr, length).await
    }

    pub async fn write_register(
        &mut self,
        map: &impl RegisterMap,
        name: &str,
        data: impl Into<Words>,
    ) -> Result<()> {
        let addr = resolve(map, name)?;
        self.write(addr, data).await
    }
}

// Internal functions
impl<B: AsyncUsbBackend, D: AsyncDelay> AsyncCsrClient<B, D> {
    async fn read_word(&mut self, addr: u32) -> Result<u32> {
        let request = frame::encode_read_request(addr, &self.config().opcodes);
        let expect = frame::encode_read_expect(WORD_BYTES as u8);

        self.session
            .raw_write(&request.to_bytes())
            .await
            .map_err(|e| e.at(addr))?;
        self.session
            .raw_write(&expect.to_bytes())
            .await
            .map_err(|e| e.at(addr))?;
        let data = self
            .session
            .raw_read(WORD_BYTES)
            .await
            .map_err(|e| e.at(addr))?;

        frame::decode_value(&data).map_err(|e| e.at(addr))
    }
}
