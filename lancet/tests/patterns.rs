//! Wildcards, derived regular expressions and stream filtering.

use lancet::{
    anything_like, filter_like, matching, Bits, Data, FieldExt, Int, Ref, Schema, Value, Wildcard,
};

fn header() -> Schema {
    Schema::builder("Header")
        .field("magic", Int::new(2).default_value(0x4d5a))
        .field("kind", Int::new(1))
        .field("len", Int::new(1))
        .build()
        .unwrap()
}

#[test]
fn concrete_instances_derive_literal_patterns() {
    let schema = header();
    let pkt = schema
        .instance_with([("kind", Value::Int(1)), ("len", Value::Int(0))])
        .unwrap();

    let regex = pkt.as_regex().unwrap();
    assert!(regex.is_match(b"\x4d\x5a\x01\x00"));
    assert!(!regex.is_match(b"\x4d\x5a\x02\x00"));
}

#[test]
fn wildcard_fields_match_any_bytes() {
    let schema = header();
    let mut pkt = anything_like(&schema);
    pkt.set("magic", Value::Int(0x4d5a)).unwrap();

    assert_eq!(pkt.regex_pattern(), Ok(String::from("MZ.{1}.{1}")));

    let regex = pkt.as_regex().unwrap();
    assert!(regex.is_match(b"MZ\x00\xff"));
    assert!(regex.is_match(b"MZ\x07\x00"));
    assert!(!regex.is_match(b"ZZ\x07\x00"));
}

#[test]
fn wildcard_data_with_known_width() {
    let schema = Schema::builder("Blob")
        .field("body", Data::with_len(3usize))
        .field("tail", Int::new(1))
        .build()
        .unwrap();

    let mut pkt = anything_like(&schema);
    pkt.set("tail", Value::Int(0)).unwrap();
    assert_eq!(pkt.regex_pattern(), Ok(String::from(".{3}\\x00")));
}

#[test]
fn wildcard_data_with_marker_anchors_on_it() {
    let schema = Schema::builder("CString")
        .field("s", Data::until(b"\x00"))
        .build()
        .unwrap();

    let pkt = anything_like(&schema);
    assert_eq!(pkt.regex_pattern(), Ok(String::from(".*\\x00")));

    let regex = pkt.as_regex().unwrap();
    assert!(regex.is_match(b"hello\x00"));
    assert!(!regex.is_match(b"hello"));
}

#[test]
fn custom_wildcard_pattern() {
    let schema = Schema::builder("CString")
        .field("s", Data::until(b"\x00"))
        .build()
        .unwrap();

    let mut pkt = schema.instance();
    pkt.set("s", Wildcard::matching("[a-z]+")).unwrap();
    assert_eq!(pkt.regex_pattern(), Ok(String::from("[a-z]+\\x00")));

    let regex = pkt.as_regex().unwrap();
    assert!(regex.is_match(b"abc\x00"));
    assert!(!regex.is_match(b"ABC\x00"));
}

#[test]
fn bit_patterns_expand_per_byte() {
    let schema = Schema::builder("Flags")
        .field("version", Bits::new(4))
        .field("reserved", Bits::new(4))
        .build()
        .unwrap();

    // All don't-care: one arbitrary byte.
    let pkt = anything_like(&schema);
    assert_eq!(pkt.regex_pattern(), Ok(String::from(".{1}")));

    // All fixed: the exact byte (0x41 escapes to itself).
    let pkt = schema
        .instance_with([("version", Value::Int(4)), ("reserved", Value::Int(1))])
        .unwrap();
    assert_eq!(pkt.regex_pattern(), Ok(String::from("A")));

    // High bits fixed, low bits free: a byte range 0x40-0x4f.
    let mut pkt = anything_like(&schema);
    pkt.set("version", Value::Int(4)).unwrap();
    assert_eq!(pkt.regex_pattern(), Ok(String::from("[\\x40-O]")));

    let regex = pkt.as_regex().unwrap();
    assert!(regex.is_match(b"\x42"));
    assert!(!regex.is_match(b"\x52"));
}

#[test]
fn mixed_bit_pattern_enumerates_a_class() {
    let schema = Schema::builder("Mixed")
        .field("hi", Bits::new(4))
        .field("mid", Bits::new(2))
        .field("lo", Bits::new(2))
        .build()
        .unwrap();

    let mut pkt = anything_like(&schema);
    pkt.set("hi", Value::Int(0)).unwrap();
    pkt.set("lo", Value::Int(1)).unwrap();

    // 0000 xx01: bytes 0x01, 0x05, 0x09, 0x0d.
    let regex = pkt.as_regex().unwrap();
    for byte in [0x01u8, 0x05, 0x09, 0x0d] {
        assert!(regex.is_match(&[byte]));
    }
    for byte in [0x00u8, 0x02, 0x11, 0x85] {
        assert!(!regex.is_match(&[byte]));
    }
}

#[test]
fn optional_wildcard_derives_an_optional_group() {
    let schema = Schema::builder("Opt")
        .field("flag", Int::new(1))
        .field("ext", Int::new(2).when("flag"))
        .build()
        .unwrap();

    let mut pkt = anything_like(&schema);
    pkt.set("flag", Value::Int(1)).unwrap();
    assert_eq!(pkt.regex_pattern(), Ok(String::from("\\x01(?:.{2})?")));
}

#[test]
fn sequence_wildcard_derives_a_counted_group() {
    let schema = Schema::builder("Rep")
        .field("items", Int::new(2).repeated(3usize))
        .build()
        .unwrap();

    let pkt = anything_like(&schema);
    assert_eq!(pkt.regex_pattern(), Ok(String::from("(?:.{2}){3}")));
}

#[test]
fn holes_from_movement_become_match_any() {
    let schema = Schema::builder("Placed")
        .field("head", Int::new(1))
        .field("tail", Int::new(1).at(4usize))
        .build()
        .unwrap();

    let pkt = schema
        .instance_with([("head", Value::Int(1)), ("tail", Value::Int(2))])
        .unwrap();
    assert_eq!(
        pkt.regex_pattern(),
        Ok(String::from("\\x01(?:.{3})\\x02"))
    );
}

#[test]
fn nested_references_derive_recursively() {
    let inner = Schema::builder("Inner")
        .field("v", Int::new(1))
        .build()
        .unwrap();
    let outer = Schema::builder("Outer")
        .field("tag", Int::new(1).default_value(9))
        .field("sub", Ref::new(&inner))
        .build()
        .unwrap();

    let mut pkt = outer.instance();
    let mut sub = inner.instance();
    sub.set("v", Value::any()).unwrap();
    pkt.set("sub", sub).unwrap();

    assert_eq!(pkt.regex_pattern(), Ok(String::from("\\x09.{1}")));
}

#[test]
fn filtering_a_stream_of_candidates() {
    let schema = header();
    let mut template = anything_like(&schema);
    template.set("magic", Value::Int(0x4d5a)).unwrap();
    template.set("kind", Value::Int(2)).unwrap();

    let candidates: Vec<&[u8]> = vec![
        b"MZ\x02\x00",
        b"MZ\x01\x00",
        b"XX\x02\x00",
        b"MZ\x02\xff",
        b"short",
    ];

    let narrowed = filter_like(&template, candidates.iter().copied()).unwrap();
    assert_eq!(narrowed, vec![b"MZ\x02\x00".as_slice(), b"MZ\x02\xff".as_slice()]);

    let parsed = matching(&template, candidates.iter().copied()).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].int("len"), Some(0));
    assert_eq!(parsed[1].int("len"), Some(0xff));
    assert!(parsed.iter().all(|pkt| pkt == &template));
}

#[test]
fn matching_is_anchored_at_the_start() {
    let schema = Schema::builder("Tagged")
        .field("tag", Int::new(1).default_value(0x41))
        .build()
        .unwrap();

    let template = schema.instance();
    let narrowed = filter_like(&template, [b"A_".as_slice(), b"_A".as_slice()]).unwrap();
    assert_eq!(narrowed, vec![b"A_".as_slice()]);
}
