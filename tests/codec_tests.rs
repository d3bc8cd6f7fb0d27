//! Codec Tests
//!
//! Frame layout, size limits and message authentication.

use std::io::Cursor;

use bytes::Bytes;
use kinetic::protocol::{
    compute_hmac, decode_frame, encode_frame, read_frame, seal, write_frame, Auth, Body, Command,
    Frame, KeyValue, Message, MessageType, HEADER_SIZE, MAX_MESSAGE_SIZE, MAX_VALUE_SIZE,
};
use kinetic::KineticError;

fn get_command(key: &[u8]) -> Command {
    let mut command = Command::new(
        MessageType::Get,
        Body::KeyValue(KeyValue {
            key: key.to_vec(),
            ..KeyValue::default()
        }),
    );
    command.header.sequence = 7;
    command.header.connection_id = 11;
    command
}

// =============================================================================
// Frame Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_frame() {
    let frame = Frame::new(Bytes::from_static(b"message"), Bytes::from_static(b"value bytes"));
    let encoded = encode_frame(&frame).unwrap();
    assert_eq!(encoded.len(), HEADER_SIZE + 7 + 11);

    let (decoded, consumed) = decode_frame(&encoded).unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded, frame);
}

#[test]
fn test_decode_ignores_trailing_bytes() {
    let first = encode_frame(&Frame::new(vec![1u8, 2], vec![3u8])).unwrap();
    let second = encode_frame(&Frame::new(vec![4u8], Bytes::new())).unwrap();
    let mut joined = first.to_vec();
    joined.extend_from_slice(&second);

    let (frame, consumed) = decode_frame(&joined).unwrap();
    assert_eq!(consumed, first.len());
    assert_eq!(frame.message.as_ref(), &[1u8, 2]);

    let (frame, _) = decode_frame(&joined[consumed..]).unwrap();
    assert_eq!(frame.message.as_ref(), &[4u8]);
    assert!(frame.value.is_empty());
}

#[test]
fn test_invalid_magic() {
    let mut bytes = encode_frame(&Frame::new(vec![1u8], Bytes::new())).unwrap().to_vec();
    bytes[0] = b'G';
    assert!(matches!(decode_frame(&bytes), Err(KineticError::InvalidMagic(b'G'))));
}

#[test]
fn test_oversized_parts_rejected() {
    let frame = Frame::new(vec![0u8; MAX_MESSAGE_SIZE + 1], Bytes::new());
    assert!(matches!(
        encode_frame(&frame),
        Err(KineticError::OversizedFrame { part: "message", .. })
    ));

    let frame = Frame::new(Bytes::new(), vec![0u8; MAX_VALUE_SIZE + 1]);
    assert!(matches!(
        encode_frame(&frame),
        Err(KineticError::OversizedFrame { part: "value", .. })
    ));

    // A header announcing too much is refused before any body is read
    let mut header = vec![b'F'];
    header.extend_from_slice(&((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes());
    header.extend_from_slice(&0u32.to_be_bytes());
    assert!(matches!(
        read_frame(&mut Cursor::new(header)),
        Err(KineticError::OversizedFrame { .. })
    ));
}

#[test]
fn test_limits_are_inclusive() {
    let frame = Frame::new(vec![0u8; 16], vec![0u8; MAX_VALUE_SIZE]);
    let encoded = encode_frame(&frame).unwrap();
    let (decoded, _) = decode_frame(&encoded).unwrap();
    assert_eq!(decoded.value.len(), MAX_VALUE_SIZE);
}

#[test]
fn test_truncated_frames() {
    let encoded = encode_frame(&Frame::new(vec![1u8; 10], vec![2u8; 10])).unwrap();

    assert!(matches!(
        decode_frame(&encoded[..5]),
        Err(KineticError::TruncatedFrame(_))
    ));
    assert!(matches!(
        decode_frame(&encoded[..encoded.len() - 1]),
        Err(KineticError::TruncatedFrame(_))
    ));
    assert!(matches!(
        read_frame(&mut Cursor::new(encoded[..15].to_vec())),
        Err(KineticError::TruncatedFrame(_))
    ));
}

#[test]
fn test_clean_eof_is_connection_closed() {
    let mut empty = Cursor::new(Vec::<u8>::new());
    assert!(matches!(read_frame(&mut empty), Err(KineticError::ConnectionClosed)));
}

#[test]
fn test_stream_round_trip() {
    let mut buf = Vec::new();
    let frames = vec![
        Frame::new(vec![1u8], vec![9u8; 100]),
        Frame::new(vec![2u8; 50], Bytes::new()),
    ];
    for frame in &frames {
        write_frame(&mut buf, frame).unwrap();
    }

    let mut cursor = Cursor::new(buf);
    for frame in &frames {
        assert_eq!(&read_frame(&mut cursor).unwrap(), frame);
    }
    assert!(matches!(read_frame(&mut cursor), Err(KineticError::ConnectionClosed)));
}

// =============================================================================
// Message Authentication Tests
// =============================================================================

#[test]
fn test_sealed_frame_verifies() {
    let command = get_command(b"bar");
    let frame = seal(&command, 1, b"asdfasdf", Bytes::from_static(b"payload")).unwrap();
    assert_eq!(frame.value.as_ref(), b"payload");

    let message = Message::from_frame(&frame).unwrap();
    assert_eq!(message.identity(), Some(1));
    message.verify(b"asdfasdf").unwrap();
    assert_eq!(message.command().unwrap(), command);
    assert!(matches!(message.verify(b"wrongkey"), Err(KineticError::HmacFailure)));
}

#[test]
fn test_hmac_over_length_prefixed_command() {
    let command = get_command(b"bar");
    let message = Message::sign(&command, 1, b"asdfasdf").unwrap();

    let expected = compute_hmac(b"asdfasdf", &message.command_bytes).unwrap();
    match &message.auth {
        Auth::Hmac { identity, hmac } => {
            assert_eq!(*identity, 1);
            assert_eq!(hmac, &expected);
        }
        Auth::Unsolicited => panic!("Expected HMAC auth"),
    }
}

#[test]
fn test_tampered_command_fails_verification() {
    let command = get_command(b"bar");
    let mut message = Message::sign(&command, 1, b"asdfasdf").unwrap();

    for i in 0..message.command_bytes.len() {
        let mut tampered = message.clone();
        tampered.command_bytes[i] ^= 0x01;
        assert!(matches!(tampered.verify(b"asdfasdf"), Err(KineticError::HmacFailure)));
    }

    message.command_bytes.push(0);
    assert!(message.verify(b"asdfasdf").is_err());
}
