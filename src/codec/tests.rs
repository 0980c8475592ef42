use super::*;

fn ciborium_bytes(value: &ciborium::Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).unwrap();
    out
}

#[test]
fn test_rfc_integer_vectors() {
    let cases: &[(Value, &str)] = &[
        (Value::Unsigned(0), "00"),
        (Value::Unsigned(23), "17"),
        (Value::Unsigned(24), "1818"),
        (Value::Unsigned(1000), "1903e8"),
        (Value::Unsigned(1_000_000), "1a000f4240"),
        (Value::Unsigned(1_000_000_000_000), "1b000000e8d4a51000"),
        (Value::integer(-1), "20"),
        (Value::integer(-1000), "3903e7"),
    ];
    for (value, expected) in cases {
        assert_eq!(hex::encode(encode(value)), *expected, "{value:?}");
        assert_eq!(&decode(&hex::decode(expected).unwrap()).unwrap(), value);
    }
}

#[test]
fn test_matches_ciborium_encoding() {
    let ours = Value::text_map([
        ("index", Value::Unsigned(0x12345678)),
        ("updateActive", Value::Bool(true)),
        ("key", Value::Bytes(vec![0xAA; 16])),
        ("list", Value::Array(vec![Value::integer(-5), Value::Null])),
    ]);
    let theirs = ciborium::Value::Map(vec![
        (
            ciborium::Value::Text("index".into()),
            ciborium::Value::Integer(0x12345678.into()),
        ),
        (
            ciborium::Value::Text("updateActive".into()),
            ciborium::Value::Bool(true),
        ),
        (
            ciborium::Value::Text("key".into()),
            ciborium::Value::Bytes(vec![0xAA; 16]),
        ),
        (
            ciborium::Value::Text("list".into()),
            ciborium::Value::Array(vec![
                ciborium::Value::Integer((-5).into()),
                ciborium::Value::Null,
            ]),
        ),
    ]);
    assert_eq!(encode(&ours), ciborium_bytes(&theirs));
}

#[test]
fn test_decodes_ciborium_output() {
    let theirs = ciborium::Value::Array(vec![
        ciborium::Value::Text("mesh".into()),
        ciborium::Value::Tag(1, Box::new(ciborium::Value::Integer(1_700_000_000.into()))),
    ]);
    let decoded = decode(&ciborium_bytes(&theirs)).unwrap();
    assert_eq!(
        decoded,
        Value::Array(vec![
            Value::Text("mesh".into()),
            Value::Tag(1, Box::new(Value::Unsigned(1_700_000_000))),
        ])
    );
}

#[test]
fn test_indefinite_length_items() {
    // (_ h'0102', h'03') and [_ 1, [2, 3]]
    let bytes = hex::decode("5f42010241 03ff".replace(' ', "")).unwrap();
    assert_eq!(decode(&bytes).unwrap(), Value::Bytes(vec![1, 2, 3]));

    let bytes = hex::decode("9f01820203ff").unwrap();
    assert_eq!(
        decode(&bytes).unwrap(),
        Value::Array(vec![
            Value::Unsigned(1),
            Value::Array(vec![Value::Unsigned(2), Value::Unsigned(3)]),
        ])
    );

    let bytes = hex::decode("bf616101ff").unwrap();
    assert_eq!(decode(&bytes).unwrap().get("a"), Some(&Value::Unsigned(1)));
}

#[test]
fn test_floats() {
    assert_eq!(decode(&hex::decode("f93c00").unwrap()).unwrap(), Value::Float(1.0));
    assert_eq!(decode(&hex::decode("f9c400").unwrap()).unwrap(), Value::Float(-4.0));
    assert_eq!(
        decode(&hex::decode("fa47c35000").unwrap()).unwrap(),
        Value::Float(100000.0)
    );
    let encoded = encode(&Value::Float(1.1));
    assert_eq!(hex::encode(&encoded), "fb3ff199999999999a");
}

#[test]
fn test_simple_values() {
    assert_eq!(hex::encode(encode(&Value::Bool(false))), "f4");
    assert_eq!(hex::encode(encode(&Value::Undefined)), "f7");
    assert_eq!(decode(&[0xF0]).unwrap(), Value::Simple(16));
    assert_eq!(decode(&[0xF8, 0xFF]).unwrap(), Value::Simple(255));
}

#[test]
fn test_truncated_input() {
    assert!(matches!(
        decode(&[0x19, 0x01]),
        Err(CodecError::UnexpectedEnd { .. })
    ));
    assert!(matches!(
        decode(&[0x43, 0x01, 0x02]),
        Err(CodecError::UnexpectedEnd { .. })
    ));
}

#[test]
fn test_huge_declared_length_rejected() {
    // Array claiming 2^32 elements with no content.
    assert!(matches!(
        decode(&[0x9A, 0xFF, 0xFF, 0xFF, 0xFF]),
        Err(CodecError::UnexpectedEnd { .. })
    ));
}

#[test]
fn test_trailing_bytes() {
    assert_eq!(decode(&[0x01, 0x02]), Err(CodecError::TrailingBytes { count: 1 }));
}

#[test]
fn test_unexpected_break() {
    assert_eq!(decode(&[0xFF]), Err(CodecError::UnexpectedBreak { offset: 0 }));
}

#[test]
fn test_invalid_utf8() {
    assert!(matches!(
        decode(&[0x62, 0xC3, 0x28]),
        Err(CodecError::InvalidUtf8 { .. })
    ));
}

#[test]
fn test_nesting_limit() {
    let bytes = vec![0x81; MAX_NESTING_DEPTH + 2];
    assert_eq!(
        decode(&bytes),
        Err(CodecError::DepthExceeded {
            max: MAX_NESTING_DEPTH
        })
    );
}

#[test]
fn test_streaming_decoder() {
    let mut bytes = encode(&Value::Unsigned(7));
    bytes.extend(encode(&Value::from("x")));
    let mut decoder = Decoder::new(&bytes);
    assert_eq!(decoder.decode_value().unwrap(), Value::Unsigned(7));
    assert_eq!(decoder.decode_value().unwrap(), Value::Text("x".into()));
    assert_eq!(decoder.remaining(), 0);
}

#[test]
fn test_value_accessors() {
    assert_eq!(Value::integer(-3).as_i64(), Some(-3));
    assert_eq!(Value::Unsigned(3).as_u64(), Some(3));
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert!(Value::Null.as_text().is_none());
}
