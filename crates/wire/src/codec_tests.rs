// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn varint_small_values_are_one_byte() {
    let mut out = BytesMut::new();
    write_varint(&mut out, 0x7f);
    assert_eq!(out.len(), 1);

    let mut buf = out.freeze();
    assert_eq!(read_varint(&mut buf, "t").unwrap(), 0x7f);
}

#[test]
fn varint_large_value_round_trips() {
    let mut out = BytesMut::new();
    write_varint(&mut out, u64::MAX);
    let mut buf = out.freeze();
    assert_eq!(read_varint(&mut buf, "t").unwrap(), u64::MAX);
    assert!(buf.is_empty());
}

#[test]
fn varint_overlong_is_corrupt() {
    // Eleven continuation bytes cannot encode a u64.
    let mut buf = Bytes::from_static(&[0xff; 11]);
    assert!(matches!(read_varint(&mut buf, "t"), Err(WireError::Corrupt(_))));
}

#[test]
fn zigzag_maps_sign_to_low_bit() {
    assert_eq!(zigzag_encode(0), 0);
    assert_eq!(zigzag_encode(-1), 1);
    assert_eq!(zigzag_encode(1), 2);
    assert_eq!(zigzag_decode(zigzag_encode(i64::MIN)), i64::MIN);
    assert_eq!(zigzag_decode(zigzag_encode(i64::MAX)), i64::MAX);
}

#[test]
fn string_round_trips_unicode() {
    let mut out = BytesMut::new();
    write_string(&mut out, "héllo wørld");
    let mut buf = out.freeze();
    assert_eq!(read_string(&mut buf, "t").unwrap(), "héllo wørld");
}

#[test]
fn string_with_invalid_utf8_is_corrupt() {
    let mut out = BytesMut::new();
    write_varint(&mut out, 2);
    out.put_slice(&[0xff, 0xfe]);
    let mut buf = out.freeze();
    assert!(matches!(read_string(&mut buf, "t"), Err(WireError::Corrupt(_))));
}

#[test]
fn truncated_scalar_reports_needed_bytes() {
    let mut buf = Bytes::from_static(&[0x01, 0x02]);
    let err = read_u32(&mut buf, "header").unwrap_err();
    match err {
        WireError::Truncated { context, needed } => {
            assert_eq!(context, "header");
            assert_eq!(needed, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn blob_truncated_after_length_is_detected() {
    let mut out = BytesMut::new();
    write_varint(&mut out, 10);
    out.put_slice(&[1, 2, 3]);
    let mut buf = out.freeze();
    assert!(matches!(read_blob(&mut buf, "t"), Err(WireError::Truncated { .. })));
}

#[test]
fn boolean_stream_round_trips_bit_pattern() {
    let pattern: Vec<bool> = (0..67).map(|i| i % 3 == 0).collect();
    let mut bs = BooleanStream::new();
    for &b in &pattern {
        bs.push(b);
    }

    let mut out = BytesMut::new();
    bs.marshal(&mut out);
    let mut buf = out.freeze();
    let mut read = BooleanStream::unmarshal(&mut buf).unwrap();
    for &b in &pattern {
        assert_eq!(read.pop().unwrap(), b);
    }
    // One bit past the end is a framing disagreement.
    assert!(read.pop().is_err());
}

#[test]
fn boolean_stream_empty_marshal() {
    let bs = BooleanStream::new();
    let mut out = BytesMut::new();
    bs.marshal(&mut out);
    let mut buf = out.freeze();
    let mut read = BooleanStream::unmarshal(&mut buf).unwrap();
    assert!(read.pop().is_err());
}
