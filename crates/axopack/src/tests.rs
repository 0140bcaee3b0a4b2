use std::sync::Arc;

use axopipe::duplex;
use axopipe::PipeHandle;

use crate::decoder::Decoder;
use crate::descriptor::TypeDescriptor;
use crate::encoder::Message;
use crate::spec::StructField;
use crate::spec::StructSpec;
use crate::types::Error;
use crate::types::Result;
use crate::value::Value;

type R<T> = Result<T>;

fn field(name: &'static str, ty: TypeDescriptor) -> StructField {
    StructField::new(name, ty, None, false)
}

fn nullable(name: &'static str, ty: TypeDescriptor) -> StructField {
    StructField::new(name, ty, None, true)
}

/// Encodes a root struct, checks the alignment invariant on the result,
/// and decodes it back.
fn roundtrip(spec: &StructSpec, fields: &[Value]) -> R<(Vec<u8>, Vec<PipeHandle>, Vec<Value>)> {
    let mut msg = Message::new();
    msg.append_struct_inline(spec, fields)?;
    let (data, handles) = msg.finish()?;
    assert_eq!(data.len() % 8, 0, "total size must be 8-byte aligned");
    let mut dec = Decoder::new(&data, &handles, 0);
    let decoded = dec.struct_inline(spec)?;
    Ok((data, handles, decoded))
}

#[test]
fn test_scalar_layout_golden() -> R<()> {
    let spec = StructSpec::new(
        "Mixed",
        vec![
            field("a", TypeDescriptor::U8),
            field("b", TypeDescriptor::U32),
            field("c", TypeDescriptor::Bool),
            field("d", TypeDescriptor::F64),
            field("e", TypeDescriptor::U16),
        ],
    );
    let values = vec![
        Value::U8(0x11),
        Value::U32(0x2233_4455),
        Value::Bool(true),
        Value::F64(1.5),
        Value::U16(0x6677),
    ];
    let (data, _, decoded) = roundtrip(&spec, &values)?;

    // Every scalar sits at a multiple of its own size.
    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        40, 0, 0, 0,            // struct size
        0, 0, 0, 0,             // struct version
        0x11, 0, 0, 0,          // a (u8), padding to 4
        0x55, 0x44, 0x33, 0x22, // b (u32)
        0x01, 0, 0, 0, 0, 0, 0, 0,                      // c (bool), padding to 8
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf8, 0x3f, // d = 1.5f64
        0x77, 0x66, 0, 0, 0, 0, 0, 0,                   // e (u16), trailing padding
    ];
    assert_eq!(data, expected);
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_every_scalar_roundtrip() -> R<()> {
    let spec = StructSpec::new(
        "Scalars",
        vec![
            field("v_bool", TypeDescriptor::Bool),
            field("v_u8", TypeDescriptor::U8),
            field("v_s8", TypeDescriptor::S8),
            field("v_u16", TypeDescriptor::U16),
            field("v_s16", TypeDescriptor::S16),
            field("v_u32", TypeDescriptor::U32),
            field("v_s32", TypeDescriptor::S32),
            field("v_u64", TypeDescriptor::U64),
            field("v_s64", TypeDescriptor::S64),
            field("v_f32", TypeDescriptor::F32),
            field("v_f64", TypeDescriptor::F64),
            field("v_enum", TypeDescriptor::Enum),
        ],
    );
    let values = vec![
        Value::Bool(true),
        Value::U8(0xfe),
        Value::S8(-5),
        Value::U16(0xbeef),
        Value::S16(-300),
        Value::U32(0xdead_beef),
        Value::S32(-70_000),
        Value::U64(u64::MAX - 1),
        Value::S64(i64::MIN + 1),
        Value::F32(3.25),
        Value::F64(-2.5e300),
        Value::S32(7),
    ];
    let (_, _, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_consecutive_bools_share_bytes() -> R<()> {
    let spec = StructSpec::new(
        "Flags",
        vec![
            field("a", TypeDescriptor::Bool),
            field("b", TypeDescriptor::Bool),
            field("c", TypeDescriptor::Bool),
            field("n", TypeDescriptor::U8),
            field("d", TypeDescriptor::Bool),
        ],
    );
    let values = vec![
        Value::Bool(true),
        Value::Bool(false),
        Value::Bool(true),
        Value::U8(9),
        Value::Bool(true),
    ];
    let (data, _, decoded) = roundtrip(&spec, &values)?;
    // a..c pack into one byte; the u8 closes the run; d starts a new byte.
    assert_eq!(data[8], 0b101);
    assert_eq!(data[9], 9);
    assert_eq!(data[10], 0b1);
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_bool_array_bit_packing() -> R<()> {
    let spec = StructSpec::new(
        "BoolArray",
        vec![field(
            "flags",
            TypeDescriptor::array(TypeDescriptor::Bool, false),
        )],
    );
    let bits = [true, false, true, true, false, false, false, true, true];
    let values = vec![Value::List(bits.iter().map(|b| Value::Bool(*b)).collect())];
    let (data, _, decoded) = roundtrip(&spec, &values)?;

    // Nine bools pack into exactly two bytes after the array header.
    let array_size = u32::from_le_bytes(data[16..20].try_into().unwrap());
    let count = u32::from_le_bytes(data[20..24].try_into().unwrap());
    assert_eq!(array_size, 8 + 2);
    assert_eq!(count, 9);
    assert_eq!(data[24], 0b1000_1101);
    assert_eq!(data[25], 0b1);
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_string_roundtrip() -> R<()> {
    let spec = StructSpec::new(
        "Text",
        vec![
            field("short", TypeDescriptor::Str),
            field("empty", TypeDescriptor::Str),
            field("unicode", TypeDescriptor::Str),
        ],
    );
    let values = vec![
        Value::Str("hi".to_string()),
        Value::Str(String::new()),
        Value::Str("pip\u{2192}e".to_string()),
    ];
    let (_, _, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_array_and_map_roundtrip() -> R<()> {
    let spec = StructSpec::new(
        "Containers",
        vec![
            field("nums", TypeDescriptor::array(TypeDescriptor::U32, false)),
            field("names", TypeDescriptor::array(TypeDescriptor::Str, false)),
            field(
                "scores",
                TypeDescriptor::map(TypeDescriptor::Str, TypeDescriptor::S32, false),
            ),
        ],
    );
    let values = vec![
        Value::List(vec![Value::U32(1), Value::U32(2), Value::U32(3)]),
        Value::List(vec![
            Value::Str("one".to_string()),
            Value::Str("two".to_string()),
        ]),
        Value::Map(vec![
            (Value::Str("a".to_string()), Value::S32(1)),
            (Value::Str("b".to_string()), Value::S32(-2)),
        ]),
    ];
    let (_, _, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_empty_containers_roundtrip() -> R<()> {
    let spec = StructSpec::new(
        "Empties",
        vec![
            field("nums", TypeDescriptor::array(TypeDescriptor::U64, false)),
            field(
                "table",
                TypeDescriptor::map(TypeDescriptor::U32, TypeDescriptor::Str, false),
            ),
        ],
    );
    let values = vec![Value::List(Vec::new()), Value::Map(Vec::new())];
    let (_, _, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_nested_struct_roundtrip() -> R<()> {
    let inner = Arc::new(StructSpec::new(
        "Point",
        vec![
            field("x", TypeDescriptor::S32),
            field("y", TypeDescriptor::S32),
        ],
    ));
    let spec = StructSpec::new(
        "Shape",
        vec![
            field("name", TypeDescriptor::Str),
            field("origin", TypeDescriptor::Struct(inner.clone())),
            field(
                "points",
                TypeDescriptor::array(TypeDescriptor::Struct(inner), false),
            ),
        ],
    );
    let values = vec![
        Value::Str("triangle".to_string()),
        Value::Record(vec![Value::S32(0), Value::S32(0)]),
        Value::List(vec![
            Value::Record(vec![Value::S32(1), Value::S32(2)]),
            Value::Record(vec![Value::S32(-3), Value::S32(4)]),
        ]),
    ];
    let (_, _, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_nullable_fields_decode_as_null() -> R<()> {
    let inner = Arc::new(StructSpec::new("Inner", vec![field("v", TypeDescriptor::U8)]));
    let spec = StructSpec::new(
        "Sparse",
        vec![
            nullable("items", TypeDescriptor::array(TypeDescriptor::U32, false)),
            nullable("detail", TypeDescriptor::Struct(inner)),
            nullable("label", TypeDescriptor::Str),
            nullable("pipe", TypeDescriptor::Handle),
        ],
    );
    let values = vec![Value::Null, Value::Null, Value::Null, Value::Null];
    let (_, handles, decoded) = roundtrip(&spec, &values)?;
    assert!(handles.is_empty());
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_non_nullable_null_is_an_encode_error() {
    let spec = StructSpec::new(
        "Strict",
        vec![field("items", TypeDescriptor::array(TypeDescriptor::U32, false))],
    );
    let mut msg = Message::new();
    let err = msg.append_struct_inline(&spec, &[Value::Null]).unwrap_err();
    assert!(matches!(err, Error::UnexpectedNull(_)));
}

#[test]
fn test_null_element_in_non_nullable_array_is_an_error() {
    let spec = StructSpec::new(
        "Strict",
        vec![field("names", TypeDescriptor::array(TypeDescriptor::Str, false))],
    );
    let mut msg = Message::new();
    msg.append_struct_inline(&spec, &[Value::List(vec![Value::Null])])
        .unwrap();
    let err = msg.finish().unwrap_err();
    assert!(matches!(err, Error::UnexpectedNull(_)));
}

#[test]
fn test_nullable_array_elements_roundtrip() -> R<()> {
    let spec = StructSpec::new(
        "Holes",
        vec![field("names", TypeDescriptor::array(TypeDescriptor::Str, true))],
    );
    let values = vec![Value::List(vec![
        Value::Str("a".to_string()),
        Value::Null,
        Value::Str("c".to_string()),
    ])];
    let (_, _, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_map_key_value_count_mismatch() -> R<()> {
    let spec = StructSpec::new(
        "Table",
        vec![field(
            "m",
            TypeDescriptor::map(TypeDescriptor::U32, TypeDescriptor::U32, false),
        )],
    );
    let values = vec![Value::Map(vec![
        (Value::U32(1), Value::U32(10)),
        (Value::U32(2), Value::U32(20)),
    ])];
    let (mut data, handles, _) = roundtrip(&spec, &values)?;

    // Shrink the values array's element count so it disagrees with keys.
    assert_eq!(u32::from_le_bytes(data[60..64].try_into().unwrap()), 2);
    data[60] = 1;
    let mut dec = Decoder::new(&data, &handles, 0);
    let err = dec.struct_inline(&spec).unwrap_err();
    assert!(matches!(err, Error::InvalidMapData));
    Ok(())
}

#[test]
fn test_map_with_bad_header_is_rejected() -> R<()> {
    let spec = StructSpec::new(
        "Table",
        vec![field(
            "m",
            TypeDescriptor::map(TypeDescriptor::U32, TypeDescriptor::U32, false),
        )],
    );
    let values = vec![Value::Map(vec![(Value::U32(1), Value::U32(10))])];
    let (mut data, handles, _) = roundtrip(&spec, &values)?;

    // The 24-byte map header starts where the struct's pointer lands.
    assert_eq!(u32::from_le_bytes(data[16..20].try_into().unwrap()), 24);
    data[16] = 16;
    let mut dec = Decoder::new(&data, &handles, 0);
    let err = dec.struct_inline(&spec).unwrap_err();
    assert!(matches!(err, Error::InvalidMapData));
    Ok(())
}

#[test]
fn test_handle_as_map_key_is_rejected() {
    let mut msg = Message::new();
    let err = msg
        .append_map_inline(
            &crate::spec::MapSpec {
                key: TypeDescriptor::Handle,
                value: TypeDescriptor::U32,
                value_nullable: false,
            },
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMapKey("handle")));
}

#[test]
fn test_handle_roundtrip() -> R<()> {
    let (ours, theirs) = duplex();
    let spec = StructSpec::new(
        "WithPipe",
        vec![
            field("tag", TypeDescriptor::U32),
            field("pipe", TypeDescriptor::Handle),
        ],
    );
    let values = vec![Value::U32(7), Value::Handle(theirs.clone())];
    let (data, handles, decoded) = roundtrip(&spec, &values)?;

    assert_eq!(handles.len(), 1);
    // The wire carries only the side-table index.
    assert_eq!(u32::from_le_bytes(data[12..16].try_into().unwrap()), 0);
    let Value::Handle(decoded_pipe) = &decoded[1] else {
        panic!("expected handle, got {:?}", decoded[1]);
    };
    assert!(decoded_pipe.same_endpoint(&theirs));
    assert!(!decoded_pipe.same_endpoint(&ours));
    Ok(())
}

#[test]
fn test_interface_proxy_and_request_roundtrip() -> R<()> {
    let (client, server) = duplex();
    let spec = StructSpec::new(
        "Wiring",
        vec![
            field("svc", TypeDescriptor::InterfaceProxy),
            field("incoming", TypeDescriptor::InterfaceRequest),
            nullable("missing", TypeDescriptor::InterfaceProxy),
        ],
    );
    let values = vec![
        Value::Handle(client.clone()),
        Value::Handle(server.clone()),
        Value::Null,
    ];
    let (_, handles, decoded) = roundtrip(&spec, &values)?;
    assert_eq!(handles.len(), 2);
    assert_eq!(decoded, values);
    Ok(())
}

#[test]
fn test_invalid_handle_index_is_rejected() -> R<()> {
    let spec = StructSpec::new("WithPipe", vec![field("pipe", TypeDescriptor::Handle)]);
    let (theirs, _keep) = duplex();
    let (data, _, _) = roundtrip(&spec, &[Value::Handle(theirs)])?;

    // Decode the same bytes with an empty handle table.
    let mut dec = Decoder::new(&data, &[], 0);
    let err = dec.struct_inline(&spec).unwrap_err();
    assert!(matches!(err, Error::InvalidHandleIndex(0)));
    Ok(())
}

#[test]
fn test_truncated_payload_is_rejected() -> R<()> {
    let spec = StructSpec::new("Tiny", vec![field("v", TypeDescriptor::U64)]);
    let (data, handles, _) = roundtrip(&spec, &[Value::U64(42)])?;

    let mut dec = Decoder::new(&data[..8], &handles, 0);
    let err = dec.struct_inline(&spec).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds));
    Ok(())
}

#[test]
fn test_type_mismatch_is_an_encode_error() {
    let spec = StructSpec::new("Tiny", vec![field("v", TypeDescriptor::U64)]);
    let mut msg = Message::new();
    let err = msg
        .append_struct_inline(&spec, &[Value::Str("nope".to_string())])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::TypeMismatch {
            expected: "u64",
            found: "string"
        }
    ));
}

#[test]
fn test_field_count_mismatch_is_an_encode_error() {
    let spec = StructSpec::new(
        "Pair",
        vec![
            field("a", TypeDescriptor::U8),
            field("b", TypeDescriptor::U8),
        ],
    );
    let mut msg = Message::new();
    let err = msg.append_struct_inline(&spec, &[Value::U8(1)]).unwrap_err();
    assert!(matches!(
        err,
        Error::FieldCountMismatch {
            expected: 2,
            found: 1,
            ..
        }
    ));
}

#[test]
fn test_pointers_are_self_relative() -> R<()> {
    let spec = StructSpec::new("Text", vec![field("s", TypeDescriptor::Str)]);
    let (data, _, _) = roundtrip(&spec, &[Value::Str("hi".to_string())])?;

    // The pointer at offset 8 targets the array header right behind the
    // 16-byte inline portion, so it stores 16 - 8 = 8.
    assert_eq!(u64::from_le_bytes(data[8..16].try_into().unwrap()), 8);
    let size = u32::from_le_bytes(data[16..20].try_into().unwrap());
    let count = u32::from_le_bytes(data[20..24].try_into().unwrap());
    assert_eq!(size, 8 + 2);
    assert_eq!(count, 2);
    assert_eq!(&data[24..26], b"hi");
    Ok(())
}

#[test]
fn test_deferred_payloads_follow_the_inline_portion() -> R<()> {
    // Two pointer fields: both slots precede both payloads (breadth-first).
    let spec = StructSpec::new(
        "TwoPtrs",
        vec![
            field("a", TypeDescriptor::Str),
            field("b", TypeDescriptor::Str),
        ],
    );
    let (data, _, decoded) = roundtrip(
        &spec,
        &[Value::Str("aaaa".to_string()), Value::Str("bb".to_string())],
    )?;

    let a_rel = u64::from_le_bytes(data[8..16].try_into().unwrap());
    let b_rel = u64::from_le_bytes(data[16..24].try_into().unwrap());
    // a's payload lands first, right after the 24-byte inline portion.
    assert_eq!(8 + a_rel as usize, 24);
    assert!(16 + b_rel as usize > 24);
    assert_eq!(
        decoded,
        vec![Value::Str("aaaa".to_string()), Value::Str("bb".to_string())]
    );
    Ok(())
}
