// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Frame codec and payload layout tests.

use fdl_common::checksum::frame_checksum;
use fdl_common::packet::{Codec, CodecError, FdlPacket, Response, MAX_RESPONSE_TEXT};
use fdl_common::payload::{
    part_name, EraseScope, PartitionDescriptor, PartitionHeader, PayloadError, RawTransfer,
    RepartitionRequest, TransferRequest, TransferTarget,
};
use fdl_common::protocol::{
    Command, FieldWidth, ProtocolStage, ResponseTag, SizeUnit, COMMAND_BUFFER_LEN, FDL_MAGIC,
    PARTITION_TABLE_MAGIC,
};

fn wide() -> Codec {
    Codec::new(FieldWidth::Wide, 64 * 1024)
}

fn narrow() -> Codec {
    Codec::new(FieldWidth::Narrow, 0xFFFF)
}

// =============================================================================
// Encoding
// =============================================================================

#[test]
fn test_encode_connect_layout() {
    let frame = wide().encode_command(Command::Connect, &[]).unwrap();
    assert_eq!(
        frame,
        [0x9F, 0x8E, 0x6D, 0x5C, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]
    );
}

#[test]
fn test_encode_narrow_header() {
    let frame = narrow().encode_command(Command::StartData, &[1, 2, 3]).unwrap();
    assert_eq!(&frame[..4], &FDL_MAGIC.to_le_bytes());
    assert_eq!(&frame[4..6], &[3, 0]);
    assert_eq!(&frame[6..8], &[0x01, 0]);
    assert_eq!(&frame[8..11], &[1, 2, 3]);
    let checksum = frame_checksum(&frame[4..11]);
    assert_eq!(&frame[11..], &checksum.to_le_bytes());
}

#[test]
fn test_encode_narrow_rejects_large_payload() {
    let payload = vec![0u8; 0x1_0000];
    assert_eq!(
        narrow().encode(0x02, &payload),
        Err(CodecError::FieldOverflow(0x1_0000))
    );
}

#[test]
fn test_response_text_is_truncated() {
    let long = "x".repeat(200);
    let response = Response::text(ResponseTag::Version, &long);
    assert_eq!(response.payload.len(), MAX_RESPONSE_TEXT);
}

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_checksum_round_trip() {
    let codec = wide();
    for payload in [&b""[..], &b"a"[..], &b"okay"[..], &[0xFFu8; 301][..]] {
        let frame = codec.encode(0x80, payload).unwrap();
        let packet = codec.decode(&frame).unwrap();
        assert_eq!(packet.bytecode, 0x80);
        assert_eq!(packet.payload, payload);
    }
}

#[test]
fn test_decode_connect_after_noise() {
    // A stray lead byte in front of a CONNECT frame
    let raw = [
        0x9F, 0x9F, 0x8E, 0x6D, 0x5C, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF,
    ];
    let packet = wide().decode(&raw).unwrap();
    assert_eq!(packet.command(), Some(Command::Connect));
    assert!(packet.payload.is_empty());
}

#[test]
fn test_decode_skips_leading_garbage() {
    let mut raw = vec![0x00, 0x11, 0x22];
    raw.extend(wide().encode_command(Command::ReadChipId, &[]).unwrap());
    assert_eq!(
        wide().decode(&raw).unwrap().command(),
        Some(Command::ReadChipId)
    );
}

#[test]
fn test_decode_handshake_run() {
    let packet = wide().decode(&[0x3C, 0x3C, 0x3C]).unwrap();
    assert_eq!(packet, FdlPacket::handshake());
}

#[test]
fn test_decode_broken_handshake() {
    assert_eq!(
        wide().decode(&[0x3C, 0x3C, 0x00]),
        Err(CodecError::HandshakeMismatch(0x00))
    );
}

#[test]
fn test_decode_checksum_mismatch() {
    let mut frame = wide().encode(0x00, b"hello").unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0x01;
    let err = wide().decode(&frame).unwrap_err();
    assert!(matches!(err, CodecError::ChecksumMismatch { bytecode: 0, .. }));
    assert_eq!(err.response_tag(), ResponseTag::ChecksumVerifyFailure);
}

#[test]
fn test_decode_oversized_rejected_before_payload() {
    let codec = Codec::new(FieldWidth::Wide, 16);
    let frame = wide().encode(0x0B, &[0u8; 17]).unwrap();
    assert_eq!(
        codec.decode(&frame[..8]),
        Err(CodecError::Oversized { size: 17, limit: 16 })
    );
}

#[test]
fn test_decode_frame_larger_than_command_buffer() {
    let payload = vec![0x5Au8; COMMAND_BUFFER_LEN * 8 + 3];
    let frame = wide().encode(0x0B, &payload).unwrap();
    assert_eq!(wide().decode(&frame).unwrap().payload, payload);
}

#[test]
fn test_decode_truncated() {
    let frame = wide().encode(0x00, b"abc").unwrap();
    assert_eq!(wide().decode(&frame[..9]), Err(CodecError::Truncated));
}

#[test]
fn test_decoder_streams_back_to_back_frames() {
    let codec = wide();
    let mut stream = codec.encode_handshake();
    stream.extend(codec.encode_command(Command::Connect, &[]).unwrap());
    stream.extend(codec.encode_command(Command::Execute, &[]).unwrap());

    let mut decoder = codec.decoder();
    let packets: Vec<_> = stream
        .iter()
        .filter_map(|&b| decoder.push(b))
        .map(Result::unwrap)
        .collect();
    let commands: Vec<_> = packets.iter().map(|p| p.command().unwrap()).collect();
    assert_eq!(
        commands,
        [Command::Handshake, Command::Connect, Command::Execute]
    );
    assert!(!decoder.in_progress());
}

// =============================================================================
// Payload layouts
// =============================================================================

#[test]
fn test_start_data_fdl2_layout() {
    let request = TransferRequest {
        target: TransferTarget::Partition(part_name("kernel").unwrap()),
        size: 0x1234,
        checksum: 0xCAFE,
    };
    let raw = request.encode(ProtocolStage::Fdl2).unwrap();
    assert_eq!(raw.len(), TransferRequest::FDL2_LEN);
    assert_eq!(&raw[..4], &[b'k', 0, b'e', 0]);
    assert_eq!(&raw[72..80], &0x1234u64.to_le_bytes());
    assert_eq!(TransferRequest::decode(ProtocolStage::Fdl2, &raw).unwrap(), request);
}

#[test]
fn test_start_data_romcode_is_narrow() {
    let raw = [0x00, 0x00, 0x00, 0x80, 0x10, 0x00, 0x00, 0x00];
    let request = TransferRequest::decode(ProtocolStage::Romcode, &raw).unwrap();
    assert_eq!(request.target, TransferTarget::Address(0x8000_0000));
    assert_eq!(request.size, 16);
}

#[test]
fn test_start_data_truncated() {
    assert!(matches!(
        TransferRequest::decode(ProtocolStage::Fdl1, &[0u8; 12]),
        Err(PayloadError::Truncated { expected: 16, .. })
    ));
}

#[test]
fn test_partition_name_rejects_non_ascii() {
    assert_eq!(part_name("rootfs_é"), Err(PayloadError::BadName));
    assert_eq!(part_name(&"a".repeat(37)), Err(PayloadError::NameTooLong));
}

#[test]
fn test_erase_flag_means_all() {
    let raw = EraseScope::All.encode().unwrap();
    assert_eq!(raw.len(), EraseScope::LEN);
    assert_eq!(EraseScope::decode(&raw).unwrap(), EraseScope::All);
}

#[test]
fn test_raw_transfer_layout() {
    let raw = RawTransfer {
        len: 4096,
        checksum_enabled: true,
        checksum: 7,
    };
    let bytes = raw.encode();
    assert_eq!(bytes, [0, 0x10, 0, 0, 1, 0, 0, 0, 7, 0, 0, 0]);
}

#[test]
fn test_repartition_header_and_entries() {
    let request = RepartitionRequest {
        header: PartitionHeader {
            magic: PARTITION_TABLE_MAGIC,
            version: 1,
            unit: SizeUnit::Kib,
            count: 2,
        },
        descriptors: vec![
            PartitionDescriptor {
                name: part_name("spl").unwrap(),
                size: 256,
                gap: 0,
            },
            PartitionDescriptor {
                name: part_name("kernel").unwrap(),
                size: 8192,
                gap: 64,
            },
        ],
    };
    let raw = request.encode().unwrap();
    assert_eq!(&raw[..4], b"PART");
    assert_eq!(raw[5], 2);
    assert_eq!(RepartitionRequest::decode(&raw).unwrap(), request);
}

#[test]
fn test_repartition_unknown_unit() {
    let raw = [0x50, 0x41, 0x52, 0x54, 1, 9, 0, 0];
    assert_eq!(
        RepartitionRequest::decode(&raw),
        Err(PayloadError::UnknownUnit(9))
    );
}

#[test]
fn test_repartition_count_exceeds_payload() {
    let raw = [0x50, 0x41, 0x52, 0x54, 1, 0, 3, 0];
    assert!(matches!(
        RepartitionRequest::decode(&raw),
        Err(PayloadError::Truncated { .. })
    ));
}
