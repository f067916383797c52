//! Wire-format integration tests: golden frame layout, header/trailer CRC
//! invariants as observed on the wire, and resynchronization behavior.

mod common;

use common::{build_frame, fast_config};
use filewire::constants::{WIRE_HEADER_SIZE, WIRE_TRAILER_SIZE};
use filewire::{crc32, ErrorDetail, FileWireError, MockLink, PacketType, Session, Transport};

#[test]
fn data_frame_golden_layout() {
    let (a, mut b) = MockLink::pair();
    let mut session = Session::new(Box::new(a), fast_config()).unwrap();
    session.send_packet(PacketType::Data, b"abc", 0x0102_0304_0506_0708).unwrap();

    let mut frame = vec![0u8; WIRE_HEADER_SIZE + 3 + WIRE_TRAILER_SIZE];
    assert_eq!(b.recv(&mut frame, 200).unwrap(), frame.len());

    // Header fields, little-endian.
    assert_eq!(frame[0], PacketType::Data as u8);
    assert_eq!(frame[1], 0, "wire version must be zero");
    assert_eq!(&frame[2..4], &[0, 0]);
    assert_eq!(&frame[4..8], &3u32.to_le_bytes());
    assert_eq!(&frame[8..12], &1u32.to_le_bytes());
    assert_eq!(&frame[12..20], &0x0102_0304_0506_0708u64.to_le_bytes());

    // Header CRC recomputes over the header with its CRC field zeroed.
    let mut zeroed = frame[..WIRE_HEADER_SIZE].to_vec();
    zeroed[20..24].fill(0);
    let stored = u32::from_le_bytes(frame[20..24].try_into().unwrap());
    assert_eq!(stored, crc32(&zeroed));

    // Trailer CRC recomputes over header + payload.
    let body_len = WIRE_HEADER_SIZE + 3;
    let trailer = u32::from_le_bytes(frame[body_len..].try_into().unwrap());
    assert_eq!(trailer, crc32(&frame[..body_len]));

    assert_eq!(&frame[WIRE_HEADER_SIZE..body_len], b"abc");
}

#[test]
fn handcrafted_frame_is_accepted() {
    let (a, b) = MockLink::pair();
    let injector = a.raw_sender();
    let mut rx = Session::new(Box::new(b), fast_config()).unwrap();

    injector.send(build_frame(PacketType::Data as u8, 9, 1234, b"hand-built")).unwrap();
    let pkt = rx.recv_packet(200).unwrap();
    assert_eq!(pkt.ty, PacketType::Data);
    assert_eq!(pkt.seq, 9);
    assert_eq!(pkt.offset, 1234);
    assert_eq!(pkt.payload, b"hand-built");
    drop(a);
}

#[test]
fn resync_recovers_the_next_frame_after_noise() {
    let (a, b) = MockLink::pair();
    let injector = a.raw_sender();
    let mut tx = Session::new(Box::new(a), fast_config()).unwrap();
    let mut rx = Session::new(Box::new(b), fast_config()).unwrap();

    injector.send(vec![0xC3; 200]).unwrap();
    tx.send_packet(PacketType::DataAck, &[], 9999).unwrap();
    let pkt = rx.recv_packet(500).unwrap();
    assert_eq!(pkt.ty, PacketType::DataAck);
    assert_eq!(pkt.offset, 9999);
}

#[test]
fn resync_gives_up_after_one_mtu_of_garbage() {
    let (a, b) = MockLink::pair();
    let injector = a.raw_sender();
    let mut rx = Session::new(Box::new(b), fast_config()).unwrap();

    // Varied garbage, comfortably more than one MTU, with no valid header.
    let garbage: Vec<u8> = (0u32..2048).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();
    injector.send(garbage).unwrap();
    let err = rx.recv_packet(500).unwrap_err();
    assert!(matches!(err, FileWireError::Crc { detail } if detail == ErrorDetail::CRC_HEADER));
    drop(a);
}

#[test]
fn single_bit_flip_in_header_is_survived() {
    let (a, b) = MockLink::pair();
    let injector = a.raw_sender();
    let mut rx = Session::new(Box::new(b), fast_config()).unwrap();

    let mut corrupted = build_frame(PacketType::Data as u8, 1, 0, b"first");
    corrupted[13] ^= 0x40; // flip one bit inside the offset field
    let intact = build_frame(PacketType::Data as u8, 2, 0, b"second");
    injector.send(corrupted).unwrap();
    injector.send(intact).unwrap();

    // The corrupted frame is unrecoverable; resync walks through it and
    // lands on the intact frame behind it.
    let pkt = rx.recv_packet(500).unwrap();
    assert_eq!(pkt.seq, 2);
    assert_eq!(pkt.payload, b"second");
    drop(a);
}

#[test]
fn oversized_payload_length_in_header_is_rejected() {
    let (a, b) = MockLink::pair();
    let injector = a.raw_sender();
    let mut rx = Session::new(Box::new(b), fast_config()).unwrap();

    // payload_len larger than the MTU budget, but a valid header CRC.
    let mut header = [0u8; WIRE_HEADER_SIZE];
    header[0] = PacketType::Data as u8;
    header[4..8].copy_from_slice(&60_000u32.to_le_bytes());
    let header_crc = crc32(&header);
    header[20..24].copy_from_slice(&header_crc.to_le_bytes());
    injector.send(header.to_vec()).unwrap();

    let err = rx.recv_packet(500).unwrap_err();
    assert!(matches!(err, FileWireError::Protocol { detail } if detail == ErrorDetail::PAYLOAD_SIZE));
    drop(a);
}
