//! End-to-end tests of the blocking client against the simulated bridge.

use std::time::Duration;

use hydrabone::client::{CsrClient, SENTINEL};
use hydrabone::config::{Config, ReadPolicy};
use hydrabone::frame::{Envelope, Frame, Opcodes};
use hydrabone::io::FaultKind;
use hydrabone::mock::{MockBackend, Scripted};
use hydrabone::session::{Delay, Session, State};
use hydrabone::{Error, Operation};

struct NoDelay;

impl Delay for NoDelay {
    fn delay(&mut self, _duration: Duration) {}
}

fn client(backend: &MockBackend, config: Config) -> CsrClient<MockBackend, NoDelay> {
    CsrClient::from_session(Session::with_delay(backend.clone(), config, NoDelay))
}

fn open_client(backend: &MockBackend) -> CsrClient<MockBackend, NoDelay> {
    let mut client = client(backend, Config::default());
    assert!(client.open());
    client
}

#[test]
fn open_twice_discovers_once() {
    let backend = MockBackend::new();
    let mut client = client(&backend, Config::default());
    assert!(client.open());
    assert!(client.open());
    assert_eq!(backend.with_state(|s| s.find_calls), 1);
}

#[test]
fn configured_interface_is_claimed() {
    let backend = MockBackend::new();
    let mut client = client(&backend, Config::default().with_interface(3));
    assert!(client.open());
    assert_eq!(backend.with_state(|s| s.claimed_interface), Some(3));
}

#[test]
fn open_fails_when_device_absent() {
    let backend = MockBackend::absent();
    let mut client = client(&backend, Config::default());
    assert!(!client.open());
    assert_eq!(client.session().state(), State::Closed);
    assert_eq!(backend.with_state(|s| s.find_calls), 10);
    assert_eq!(client.read(0, 1), Err(Error::SessionNotOpen));
}

#[test]
fn read_returns_device_value() {
    let backend = MockBackend::new();
    backend.with_state(|s| s.set_register(0x8200_0100, 0xdead_beef));
    let mut client = open_client(&backend);
    assert_eq!(client.read(0x8200_0100, 1).unwrap(), vec![0xdead_beef]);
    assert_eq!(client.read_u32(0x8200_0100).unwrap(), 0xdead_beef);
}

#[test]
fn write_then_read_back() {
    let backend = MockBackend::new();
    let mut client = open_client(&backend);
    client.write(0x0000_2000, 0x1234_5678u32).unwrap();
    assert_eq!(client.read(0x0000_2000, 1).unwrap(), vec![0x1234_5678]);
    assert_eq!(backend.with_state(|s| s.register(0x2000)), 0x1234_5678);
}

#[test]
fn multi_word_write_is_sequential() {
    let backend = MockBackend::new();
    let mut client = open_client(&backend);
    client.write(0x100, [0xaaaa_aaaau32, 0xbbbb_bbbb]).unwrap();

    assert_eq!(
        backend.with_state(|s| s.frames()),
        vec![
            Frame::Write {
                word_index: 0x100 >> 2,
                count: 1,
                value: 0xaaaa_aaaa
            },
            Frame::Write {
                word_index: 0x104 >> 2,
                count: 1,
                value: 0xbbbb_bbbb
            },
        ]
    );
    assert!(backend.with_state(|s| s.writes.iter().all(|(ep, _)| *ep == 1)));
}

#[test]
fn unaligned_address_is_truncated() {
    let backend = MockBackend::new();
    let mut client = open_client(&backend);
    client.write(0x0000_0107, vec![1u32]).unwrap();
    client.read(0x0000_0106, 1).unwrap();

    let frames = backend.with_state(|s| s.frames());
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.word_index() == 0x41));
}

#[test]
fn multi_word_read_in_address_order() {
    let backend = MockBackend::new();
    backend.with_state(|s| {
        s.set_register(0x40, 10);
        s.set_register(0x44, 20);
        s.set_register(0x48, 30);
        s.set_register(0x4c, 40);
    });
    let mut client = open_client(&backend);
    assert_eq!(client.read(0x40, 3).unwrap(), vec![10, 20, 30]);

    let read_indices: Vec<u32> = backend.with_state(|s| {
        s.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Read { word_index, .. } => Some(word_index),
                Frame::Write { .. } => None,
            })
            .collect()
    });
    assert_eq!(read_indices, vec![0x10, 0x11, 0x12]);
    assert_eq!(backend.with_state(|s| s.reads.len()), 3);
}

#[test]
fn strict_read_surfaces_exhausted_transport() {
    let backend = MockBackend::new();
    backend.with_state(|s| {
        s.set_register(0x10, 1);
        s.read_script
            .extend(std::iter::repeat_n(Scripted::Fail(FaultKind::Io), 10));
    });
    let mut client = open_client(&backend);
    let err = client.read(0x10, 3).unwrap_err();
    assert!(matches!(
        err,
        Error::Transport {
            op: Operation::Read,
            kind: FaultKind::Io,
            attempts: 10,
            ..
        }
    ));
    assert_eq!(err.address(), Some(0x10));
    assert_eq!(backend.with_state(|s| s.reads.len()), 10);
}

#[test]
fn strict_read_surfaces_no_data() {
    let backend = MockBackend::new();
    backend.with_state(|s| s.read_script.extend(std::iter::repeat_n(Scripted::Empty, 10)));
    let mut client = open_client(&backend);
    let err = client.read(0x0, 1).unwrap_err();
    assert_eq!(err.transport_kind(), Some(FaultKind::NoData));
    // One discovery to open, then a re-open after every failed attempt but
    // the last.
    assert_eq!(backend.with_state(|s| s.find_calls), 10);
    assert!(client.is_open());
}

#[test]
fn lenient_read_fills_sentinels() {
    let backend = MockBackend::new();
    backend.with_state(|s| s.read_script.extend(std::iter::repeat_n(Scripted::Empty, 20)));
    let config = Config::default().with_read_policy(ReadPolicy::Lenient);
    let mut client = client(&backend, config);
    assert!(client.open());
    assert_eq!(client.read(0x0, 2).unwrap(), vec![SENTINEL, SENTINEL]);
}

#[test]
fn recovers_from_transient_disconnect() {
    let backend = MockBackend::new();
    backend.with_state(|s| {
        s.set_register(0x20, 0x5555_aaaa);
        s.read_script.push_back(Scripted::Empty);
        s.absent_finds = 0;
    });
    let mut client = open_client(&backend);
    // Device drops off the bus and takes two discoveries to come back.
    backend.with_state(|s| s.absent_finds = 2);
    assert_eq!(client.read(0x20, 1).unwrap(), vec![0x5555_aaaa]);
    assert_eq!(backend.with_state(|s| s.find_calls), 4);
}

#[test]
fn custom_opcodes_reach_the_wire() {
    let opcodes = Opcodes {
        read_burst: Opcodes::READ_BURST_INCR,
        write_burst: Opcodes::WRITE_BURST_INCR,
    };
    let backend = MockBackend::new();
    backend.with_state(|s| s.opcodes = opcodes);
    let mut client = client(&backend, Config::default().with_opcodes(opcodes));
    assert!(client.open());
    client.write(0x8, 77u32).unwrap();
    assert_eq!(client.read(0x8, 1).unwrap(), vec![77]);

    let first = backend.with_state(|s| s.writes[0].1.clone());
    assert_eq!(first[3], Opcodes::WRITE_BURST_INCR);
    assert!(matches!(
        Envelope::parse(&first).unwrap(),
        Envelope::Command(_)
    ));
}

#[test]
fn close_then_reopen() {
    let backend = MockBackend::new();
    let mut client = open_client(&backend);
    client.close();
    assert!(!client.is_open());
    assert_eq!(client.write(0, 1u32), Err(Error::SessionNotOpen));
    assert!(client.open());
    client.write(0, 1u32).unwrap();
    assert_eq!(backend.with_state(|s| s.find_calls), 2);
}
