//! Burst frame and USB envelope encoding.
//!
//! The bridge tunnels the UART bridge's burst sub-protocol inside a USB
//! envelope, so there are two layers:
//!
//! Envelope (outer):
//! - Command: `'U' 'w' <len> <payload...>` - payload is a burst [`Frame`]
//! - Expect: `'U' 'r' <n>` - asks the bridge to return `n` bytes on the IN
//!   endpoint
//!
//! Frame (inner), all multi-byte fields big-endian:
//! - Read: `<read opcode> <count> <word index:4>`
//! - Write: `<write opcode> <count> <word index:4> <value:4>`
//!
//! The response to a read is the raw 4 byte big-endian value, unframed.
//!
//! Nothing in here performs I/O.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Location, Result};

/// First byte of every envelope
pub const ENVELOPE_MAGIC: u8 = b'U';

/// Envelope tag for an outbound command
pub const ENVELOPE_COMMAND: u8 = b'w';

/// Envelope tag asking for bytes back
pub const ENVELOPE_EXPECT: u8 = b'r';

/// Size of a value, and so of a read response, in bytes
pub const WORD_BYTES: usize = 4;

const ENVELOPE_HEADER_LEN: usize = 3;
const READ_FRAME_LEN: usize = 6;
const WRITE_FRAME_LEN: usize = 10;

/// Burst command opcodes.
///
/// The values belong to the UART bridge's command set, not to this
/// crate, so they are configurable.  The defaults are the UART bridge's
/// fixed-address burst commands, which the HydraUSB3 gateware expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcodes {
    pub read_burst: u8,
    pub write_burst: u8,
}

impl Opcodes {
    pub const WRITE_BURST_INCR: u8 = 0x01;
    pub const READ_BURST_INCR: u8 = 0x02;
    pub const WRITE_BURST_FIXED: u8 = 0x03;
    pub const READ_BURST_FIXED: u8 = 0x04;
}

impl Default for Opcodes {
    fn default() -> Self {
        Self {
            read_burst: Self::READ_BURST_FIXED,
            write_burst: Self::WRITE_BURST_FIXED,
        }
    }
}

/// Convert a byte address to the word index carried on the wire.  The low
/// two bits are dropped, not rejected.
pub const fn word_index(addr: u32) -> u32 {
    addr >> 2
}

/// Inner burst command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Read { word_index: u32, count: u8 },
    Write { word_index: u32, count: u8, value: u32 },
}

impl Frame {
    /// Single word read of the word containing `addr`
    pub const fn read(addr: u32) -> Self {
        Frame::Read {
            word_index: word_index(addr),
            count: 1,
        }
    }

    /// Single word write of `value` to the word containing `addr`
    pub const fn write(addr: u32, value: u32) -> Self {
        Frame::Write {
            word_index: word_index(addr),
            count: 1,
            value,
        }
    }

    pub fn word_index(&self) -> u32 {
        match self {
            Frame::Read { word_index, .. } | Frame::Write { word_index, .. } => *word_index,
        }
    }

    pub fn encode(&self, opcodes: &Opcodes) -> Vec<u8> {
        match *self {
            Frame::Read { word_index, count } => {
                let mut buf = Vec::with_capacity(READ_FRAME_LEN);
                buf.extend_from_slice(&[opcodes.read_burst, count]);
                buf.extend_from_slice(&word_index.to_be_bytes());
                buf
            }
            Frame::Write {
                word_index,
                count,
                value,
            } => {
                let mut buf = Vec::with_capacity(WRITE_FRAME_LEN);
                buf.extend_from_slice(&[opcodes.write_burst, count]);
                buf.extend_from_slice(&word_index.to_be_bytes());
                buf.extend_from_slice(&value.to_be_bytes());
                buf
            }
        }
    }

    /// Parse a frame, as the bridge would.
    pub fn decode(bytes: &[u8], opcodes: &Opcodes) -> Result<Self> {
        let (&opcode, rest) = bytes.split_first().ok_or(Error::InvalidFrame("empty frame"))?;
        if opcode == opcodes.read_burst {
            if bytes.len() != READ_FRAME_LEN {
                return Err(Error::InvalidFrame("read frame length"));
            }
            Ok(Frame::Read {
                count: rest[0],
                word_index: be_u32(&rest[1..5]),
            })
        } else if opcode == opcodes.write_burst {
            if bytes.len() != WRITE_FRAME_LEN {
                return Err(Error::InvalidFrame("write frame length"));
            }
            Ok(Frame::Write {
                count: rest[0],
                word_index: be_u32(&rest[1..5]),
                value: be_u32(&rest[5..9]),
            })
        } else {
            Err(Error::InvalidFrame("unknown opcode"))
        }
    }
}

/// Bytes of a command envelope: an encoded [`Frame`], or whatever an
/// envelope parsed from the wire carried.
///
/// Only built by [`Envelope::command()`] and [`Envelope::parse()`], so it
/// always fits the envelope's single length byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outer USB envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Outbound command, carrying an encoded [`Frame`]
    Command(Payload),
    /// Ask the bridge to return this many bytes
    Expect(u8),
}

impl Envelope {
    /// Wrap a frame in a command envelope.  Frames are at most 10 bytes.
    pub fn command(frame: &Frame, opcodes: &Opcodes) -> Self {
        Envelope::Command(Payload(frame.encode(opcodes)))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Envelope::Command(payload) => {
                let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
                buf.extend_from_slice(&[ENVELOPE_MAGIC, ENVELOPE_COMMAND, payload.len() as u8]);
                buf.extend_from_slice(payload.as_bytes());
                buf
            }
            Envelope::Expect(n) => vec![ENVELOPE_MAGIC, ENVELOPE_EXPECT, *n],
        }
    }

    /// Parse an envelope from a single bulk OUT transfer.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENVELOPE_HEADER_LEN {
            return Err(Error::InvalidFrame("short envelope"));
        }
        if bytes[0] != ENVELOPE_MAGIC {
            return Err(Error::InvalidFrame("bad envelope magic"));
        }
        let len = bytes[2];
        match bytes[1] {
            ENVELOPE_COMMAND => {
                let payload = &bytes[ENVELOPE_HEADER_LEN..];
                if payload.len() != len as usize {
                    return Err(Error::InvalidFrame("envelope length mismatch"));
                }
                Ok(Envelope::Command(Payload(payload.to_vec())))
            }
            ENVELOPE_EXPECT if bytes.len() == ENVELOPE_HEADER_LEN => Ok(Envelope::Expect(len)),
            ENVELOPE_EXPECT => Err(Error::InvalidFrame("expect envelope with payload")),
            _ => Err(Error::InvalidFrame("bad envelope tag")),
        }
    }

    /// Decode the burst frame a command envelope carries.
    pub fn frame(&self, opcodes: &Opcodes) -> Result<Frame> {
        match self {
            Envelope::Command(payload) => Frame::decode(payload.as_bytes(), opcodes),
            Envelope::Expect(_) => Err(Error::InvalidFrame("expect envelope has no frame")),
        }
    }
}

/// Envelope requesting a single word read at `addr`
pub fn encode_read_request(addr: u32, opcodes: &Opcodes) -> Envelope {
    Envelope::command(&Frame::read(addr), opcodes)
}

/// Envelope prompting the bridge to send back `n_bytes`
pub fn encode_read_expect(n_bytes: u8) -> Envelope {
    Envelope::Expect(n_bytes)
}

/// Envelope writing `value` to the word at `addr`
pub fn encode_write(addr: u32, value: u32, opcodes: &Opcodes) -> Envelope {
    Envelope::command(&Frame::write(addr, value), opcodes)
}

/// Interpret a read response as a big-endian value.  Bytes beyond the
/// first 4 are ignored.
pub fn decode_value(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < WORD_BYTES {
        return Err(Error::MalformedResponse {
            expected: WORD_BYTES,
            received: bytes.len(),
            location: Location(None),
        });
    }
    Ok(be_u32(&bytes[..WORD_BYTES]))
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_bytes() {
        let env = encode_read_request(0x8200_0010, &Opcodes::default());
        assert_eq!(
            env.to_bytes(),
            vec![b'U', b'w', 6, 0x04, 1, 0x20, 0x80, 0x00, 0x04]
        );
    }

    #[test]
    fn write_bytes() {
        let env = encode_write(0x0000_1000, 0xdead_beef, &Opcodes::default());
        assert_eq!(
            env.to_bytes(),
            vec![
                b'U', b'w', 10, 0x03, 1, 0x00, 0x00, 0x04, 0x00, 0xde, 0xad, 0xbe, 0xef
            ]
        );
    }

    #[test]
    fn expect_bytes() {
        assert_eq!(encode_read_expect(4).to_bytes(), vec![b'U', b'r', 4]);
    }

    #[test]
    fn unaligned_address_drops_low_bits() {
        let opcodes = Opcodes::default();
        for addr in [0x103, 0x102, 0x101, 0x100] {
            let frame = encode_read_request(addr, &opcodes).frame(&opcodes).unwrap();
            assert_eq!(frame.word_index(), 0x40);
        }
        let frame = encode_write(0xffff_ffff, 0, &opcodes)
            .frame(&opcodes)
            .unwrap();
        assert_eq!(frame.word_index(), 0x3fff_ffff);
    }

    #[test]
    fn custom_opcodes_are_used() {
        let opcodes = Opcodes {
            read_burst: Opcodes::READ_BURST_INCR,
            write_burst: Opcodes::WRITE_BURST_INCR,
        };
        assert_eq!(encode_read_request(0, &opcodes).to_bytes()[3], 0x02);
        assert_eq!(encode_write(0, 0, &opcodes).to_bytes()[3], 0x01);
    }

    #[test]
    fn decode_value_big_endian() {
        assert_eq!(decode_value(&[0x12, 0x34, 0x56, 0x78]).unwrap(), 0x1234_5678);
        assert_eq!(decode_value(&[0, 0, 0, 1, 0xff]).unwrap(), 1);
    }

    #[test]
    fn decode_value_short() {
        assert_eq!(
            decode_value(&[0x12, 0x34]),
            Err(Error::MalformedResponse {
                expected: 4,
                received: 2,
                location: Location(None),
            })
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Envelope::parse(b"Uw").is_err());
        assert!(Envelope::parse(b"Xw\x00").is_err());
        assert!(Envelope::parse(b"Ux\x00").is_err());
        assert!(Envelope::parse(b"Uw\x05\x04\x01").is_err());
        assert!(Envelope::parse(b"Ur\x04\x00").is_err());
        assert_eq!(Envelope::parse(b"Ur\x04").unwrap(), Envelope::Expect(4));
    }

    #[test]
    fn longest_command_keeps_its_length() {
        let mut bytes = vec![b'U', b'w', 0xff];
        bytes.extend(std::iter::repeat_n(0xa5, 0xff));
        let env = Envelope::parse(&bytes).unwrap();
        assert!(matches!(&env, Envelope::Command(payload) if payload.len() == 0xff));
        assert_eq!(env.to_bytes(), bytes);

        // A 256 byte payload cannot be described by the length byte.
        let mut bytes = vec![b'U', b'w', 0x00];
        bytes.extend(std::iter::repeat_n(0xa5, 0x100));
        assert_eq!(
            Envelope::parse(&bytes),
            Err(Error::InvalidFrame("envelope length mismatch"))
        );
    }

    #[test]
    fn frame_decode_errors() {
        let opcodes = Opcodes::default();
        assert!(Frame::decode(&[], &opcodes).is_err());
        assert!(Frame::decode(&[0x7f, 1, 0, 0, 0, 0], &opcodes).is_err());
        assert!(Frame::decode(&[0x04, 1, 0, 0, 0], &opcodes).is_err());
        assert_eq!(
            Frame::decode(&[0x03, 1, 0, 0, 0, 2, 0, 0, 0, 9], &opcodes).unwrap(),
            Frame::Write {
                word_index: 2,
                count: 1,
                value: 9
            }
        );
    }
}
