//! Codec tests for the v3.1.1 client packet set

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use crate::codec::{Decoder, Encoder};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, EncodeError, Packet, PubAck, Publish, QoS,
    SubAck, Subscribe, SubscribeReturnCode, UnsubAck, Unsubscribe,
};

fn encode_packet(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    Encoder::new().encode(packet, &mut buf).unwrap();
    buf
}

fn decode_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    match Decoder::new().decode(buf)? {
        Some((packet, _)) => Ok(packet),
        None => Err(DecodeError::InsufficientData),
    }
}

// ============================================================================
// CONNECT / CONNACK
// ============================================================================

#[test]
fn test_connect_wire_layout() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "c1".to_string(),
        clean_session: true,
        keep_alive: 30,
        username: Some("u".to_string()),
        password: None,
    }));

    let encoded = encode_packet(&packet);
    assert_eq!(
        &encoded[..],
        &[
            0x10, 17, // CONNECT, remaining length
            0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
            0x04, // level
            0x82, // username + clean session
            0x00, 30, // keep alive
            0x00, 0x02, b'c', b'1', // client id
            0x00, 0x01, b'u', // username
        ][..]
    );
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_connect_with_password_roundtrip() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "client-123".to_string(),
        clean_session: false,
        keep_alive: 300,
        username: Some("user".to_string()),
        password: Some(Bytes::from_static(b"secret")),
    }));

    let encoded = encode_packet(&packet);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_connect_password_without_username_is_dropped() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "c".to_string(),
        password: Some(Bytes::from_static(b"orphan")),
        ..Default::default()
    }));

    let decoded = decode_packet(&encode_packet(&packet)).unwrap();
    match decoded {
        Packet::Connect(c) => assert_eq!(c.password, None),
        other => panic!("expected CONNECT, got {:?}", other),
    }
}

#[test]
fn test_connect_rejects_other_protocol_level() {
    let mut encoded = encode_packet(&Packet::Connect(Box::default()));
    encoded[8] = 5;
    assert_eq!(
        decode_packet(&encoded),
        Err(DecodeError::InvalidProtocolVersion(5))
    );
}

#[test]
fn test_connack_return_codes() {
    for code in 0u8..=5 {
        let data = [0x20, 0x02, 0x00, code];
        let decoded = decode_packet(&data).unwrap();
        let expected = ConnectReturnCode::from_u8(code).unwrap();
        assert_eq!(
            decoded,
            Packet::ConnAck(ConnAck {
                session_present: false,
                code: expected,
            })
        );
        assert_eq!(expected.is_accepted(), code == 0);
    }
}

#[test]
fn test_connack_session_present() {
    let packet = Packet::ConnAck(ConnAck {
        session_present: true,
        code: ConnectReturnCode::Accepted,
    });
    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[..], &[0x20, 0x02, 0x01, 0x00][..]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_connack_unknown_code() {
    let data = [0x20, 0x02, 0x00, 0x06];
    assert_eq!(decode_packet(&data), Err(DecodeError::InvalidReturnCode(6)));
}

// ============================================================================
// PUBLISH / PUBACK
// ============================================================================

#[test]
fn test_publish_qos0_wire_layout() {
    let packet = Packet::Publish(Publish::at_most_once("a/b", Bytes::from_static(b"hi")));
    let encoded = encode_packet(&packet);
    assert_eq!(
        &encoded[..],
        &[0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i'][..]
    );
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_publish_qos1_roundtrip() {
    let packet = Packet::Publish(Publish {
        dup: true,
        qos: QoS::AtLeastOnce,
        retain: true,
        topic: "sensors/temp".to_string(),
        packet_id: Some(42),
        payload: Bytes::from_static(b"{\"v\":1}"),
    });
    assert_eq!(decode_packet(&encode_packet(&packet)).unwrap(), packet);
}

#[test]
fn test_publish_empty_payload() {
    let packet = Packet::Publish(Publish::at_most_once("t", Bytes::new()));
    assert_eq!(decode_packet(&encode_packet(&packet)).unwrap(), packet);
}

#[test]
fn test_publish_encode_rejects_wildcards() {
    let packet = Packet::Publish(Publish::at_most_once("a/+", Bytes::new()));
    let mut buf = BytesMut::new();
    assert_eq!(
        Encoder::new().encode(&packet, &mut buf),
        Err(EncodeError::InvalidTopicName)
    );
}

#[test]
fn test_publish_encode_requires_packet_id_for_qos1() {
    let packet = Packet::Publish(Publish {
        qos: QoS::AtLeastOnce,
        topic: "t".to_string(),
        ..Default::default()
    });
    let mut buf = BytesMut::new();
    assert_eq!(
        Encoder::new().encode(&packet, &mut buf),
        Err(EncodeError::InvalidPacketId)
    );
}

#[test]
fn test_publish_dup_must_be_zero_for_qos0() {
    let data = [0x38, 0x03, 0x00, 0x01, b't'];
    assert!(matches!(
        decode_packet(&data),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_publish_packet_id_zero_invalid() {
    let data = [0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00];
    assert!(matches!(
        decode_packet(&data),
        Err(DecodeError::MalformedPacket("packet id cannot be 0"))
    ));
}

#[test]
fn test_puback() {
    let packet = Packet::PubAck(PubAck { packet_id: 7 });
    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[..], &[0x40, 0x02, 0x00, 0x07][..]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

// ============================================================================
// SUBSCRIBE / SUBACK / UNSUBSCRIBE / UNSUBACK
// ============================================================================

#[test]
fn test_subscribe_wire_layout() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 1,
        filters: vec![("k/t".to_string(), QoS::AtMostOnce)],
    });
    let encoded = encode_packet(&packet);
    assert_eq!(
        &encoded[..],
        &[0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'k', b'/', b't', 0x00][..]
    );
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_subscribe_multiple_filters() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 10,
        filters: vec![
            ("a/+".to_string(), QoS::AtMostOnce),
            ("b/#".to_string(), QoS::AtLeastOnce),
            ("c".to_string(), QoS::ExactlyOnce),
        ],
    });
    assert_eq!(decode_packet(&encode_packet(&packet)).unwrap(), packet);
}

#[test]
fn test_subscribe_invalid_flags() {
    let data = [0x80, 0x06, 0x00, 0x01, 0x00, 0x01, b't', 0x00];
    assert_eq!(decode_packet(&data), Err(DecodeError::InvalidFlags));
}

#[test]
fn test_subscribe_empty_filters_invalid() {
    let data = [0x82, 0x02, 0x00, 0x01];
    assert!(matches!(
        decode_packet(&data),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_suback_with_failure() {
    let packet = Packet::SubAck(SubAck {
        packet_id: 3,
        return_codes: vec![
            SubscribeReturnCode::GrantedQoS0,
            SubscribeReturnCode::Failure,
        ],
    });
    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[..], &[0x90, 0x04, 0x00, 0x03, 0x00, 0x80][..]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_suback_invalid_code() {
    let data = [0x90, 0x03, 0x00, 0x01, 0x03];
    assert_eq!(decode_packet(&data), Err(DecodeError::InvalidReturnCode(3)));
}

#[test]
fn test_unsubscribe_wire_layout() {
    let packet = Packet::Unsubscribe(Unsubscribe {
        packet_id: 2,
        filters: vec!["x".to_string()],
    });
    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[..], &[0xA2, 0x05, 0x00, 0x02, 0x00, 0x01, b'x'][..]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_unsuback() {
    let packet = Packet::UnsubAck(UnsubAck { packet_id: 9 });
    let encoded = encode_packet(&packet);
    assert_eq!(&encoded[..], &[0xB0, 0x02, 0x00, 0x09][..]);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

// ============================================================================
// PINGREQ / PINGRESP / DISCONNECT
// ============================================================================

#[test]
fn test_control_packets() {
    assert_eq!(&encode_packet(&Packet::PingReq)[..], &[0xC0, 0x00][..]);
    assert_eq!(&encode_packet(&Packet::PingResp)[..], &[0xD0, 0x00][..]);
    assert_eq!(&encode_packet(&Packet::Disconnect)[..], &[0xE0, 0x00][..]);

    assert_eq!(decode_packet(&[0xC0, 0x00]).unwrap(), Packet::PingReq);
    assert_eq!(decode_packet(&[0xD0, 0x00]).unwrap(), Packet::PingResp);
    assert_eq!(decode_packet(&[0xE0, 0x00]).unwrap(), Packet::Disconnect);
}

#[test]
fn test_pingreq_invalid_flags() {
    assert_eq!(decode_packet(&[0xC1, 0x00]), Err(DecodeError::InvalidFlags));
}

#[test]
fn test_v5_only_packet_types_rejected() {
    // PUBREC and AUTH are outside the client subset
    assert_eq!(
        decode_packet(&[0x50, 0x02, 0x00, 0x01]),
        Err(DecodeError::InvalidPacketType(5))
    );
    assert_eq!(
        decode_packet(&[0xF0, 0x00]),
        Err(DecodeError::InvalidPacketType(15))
    );
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_variable_int_boundary_values() {
    use crate::codec::{read_variable_int, write_variable_int};

    let test_cases = [
        (0, vec![0x00]),
        (127, vec![0x7F]),
        (128, vec![0x80, 0x01]),
        (16383, vec![0xFF, 0x7F]),
        (16384, vec![0x80, 0x80, 0x01]),
        (268435455, vec![0xFF, 0xFF, 0xFF, 0x7F]),
    ];

    for (value, expected_bytes) in test_cases {
        let mut buf = BytesMut::new();
        write_variable_int(&mut buf, value).unwrap();
        assert_eq!(&buf[..], &expected_bytes[..], "encoding {}", value);

        let (decoded, len) = read_variable_int(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(len, expected_bytes.len());
    }
}

#[test]
fn test_variable_int_invalid() {
    use crate::codec::read_variable_int;

    let invalid = [0x80, 0x80, 0x80, 0x80, 0x01];
    assert_eq!(
        read_variable_int(&invalid),
        Err(DecodeError::InvalidRemainingLength)
    );
}

#[test]
fn test_packet_too_large() {
    let decoder = Decoder::new().with_max_packet_size(100);
    let data = [0x30, 0xFF, 0xFF, 0xFF, 0x7F];
    assert_eq!(decoder.decode(&data), Err(DecodeError::PacketTooLarge));
}

#[test]
fn test_incomplete_packet() {
    let decoder = Decoder::new();
    assert_eq!(decoder.decode(&[0x10, 0x0F]).unwrap(), None);
    assert_eq!(decoder.decode(&[0x30]).unwrap(), None);
}

#[test]
fn test_back_to_back_packets() {
    let mut buf = encode_packet(&Packet::PingResp);
    buf.extend_from_slice(&encode_packet(&Packet::PubAck(PubAck { packet_id: 1 })));

    let decoder = Decoder::new();
    let (first, used) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, Packet::PingResp);
    assert_eq!(used, 2);

    let (second, used) = decoder.decode(&buf[used..]).unwrap().unwrap();
    assert_eq!(second, Packet::PubAck(PubAck { packet_id: 1 }));
    assert_eq!(used, 4);
}

#[test]
fn test_string_with_null_character_invalid() {
    use crate::codec::read_string;

    let data = [0x00, 0x05, b'h', b'e', 0x00, b'l', b'o'];
    assert!(matches!(
        read_string(&data),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_string_invalid_utf8() {
    use crate::codec::read_string;

    let data = [0x00, 0x03, 0xFF, 0xFE, 0xFD];
    assert_eq!(read_string(&data), Err(DecodeError::InvalidUtf8));
}

// ============================================================================
// Property-Based Tests (using proptest)
// ============================================================================

mod proptest_tests {
    use super::*;
    use crate::codec::{read_string, read_variable_int, write_string, write_variable_int};
    use proptest::prelude::*;

    fn topic_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_\\-]{1,16}(/[a-zA-Z0-9_\\-]{1,16}){0,5}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_variable_int_roundtrip(value in 0u32..268_435_455u32) {
            let mut buf = BytesMut::new();
            let written = write_variable_int(&mut buf, value).unwrap();
            let (decoded, consumed) = read_variable_int(&buf).unwrap();
            prop_assert_eq!(value, decoded);
            prop_assert_eq!(written, consumed);
        }

        #[test]
        fn prop_string_roundtrip(s in "[^\\x00]{0,64}") {
            let mut buf = BytesMut::new();
            write_string(&mut buf, &s).unwrap();
            let (decoded, consumed) = read_string(&buf).unwrap();
            prop_assert_eq!(&s, decoded);
            prop_assert_eq!(consumed, 2 + s.len());
        }

        #[test]
        fn prop_publish_roundtrip(
            topic in topic_strategy(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let packet = Packet::Publish(Publish::at_most_once(topic, Bytes::from(payload)));
            let encoded = encode_packet(&packet);
            let (decoded, used) = Decoder::new().decode(&encoded).unwrap().unwrap();
            prop_assert_eq!(used, encoded.len());
            prop_assert_eq!(decoded, packet);
        }

        #[test]
        fn prop_truncated_never_errors(
            topic in topic_strategy(),
            cut in 0usize..8,
        ) {
            let packet = Packet::Subscribe(Subscribe {
                packet_id: 1,
                filters: vec![(topic, QoS::AtMostOnce)],
            });
            let encoded = encode_packet(&packet);
            let cut = cut.min(encoded.len() - 1);
            let truncated = &encoded[..encoded.len() - 1 - cut];
            prop_assert_eq!(Decoder::new().decode(truncated).unwrap(), None);
        }
    }
}
