//! Repetition, optional presence, cursor movement and schema-level
//! configuration.

use lancet::expr::{field, lit};
use lancet::{
    AutoLength, Cond, Data, ErrorKind, FieldExt, Int, Move, Schema, SchemaError, Sequence, Value,
};

#[test]
fn counted_sequence_of_ints() {
    let schema = Schema::builder("Counted")
        .field("n", Int::new(1))
        .field("items", Int::new(2).repeated("n"))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x03\x00\x01\x00\x02\x00\x03").unwrap();
    let items: Vec<i128> = pkt
        .list("items")
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(items, vec![1, 2, 3]);
    assert_eq!(pkt.pack().unwrap(), b"\x03\x00\x01\x00\x02\x00\x03");
}

#[test]
fn sequence_count_zero_yields_an_empty_list() {
    let schema = Schema::builder("Counted")
        .field("n", Int::new(1))
        .field("items", Int::new(1).repeated("n"))
        .field("tail", Int::new(1))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x00\x2a").unwrap();
    assert_eq!(pkt.list("items").unwrap().len(), 0);
    assert_eq!(pkt.int("tail"), Some(0x2a));
}

#[test]
fn negative_count_is_an_unpack_error() {
    let schema = Schema::builder("Bad")
        .field("items", Int::new(1).repeated(lit(0).sub(3)))
        .build()
        .unwrap();

    let err = schema.unpack(b"abc").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NegativeCount(-3)));
}

#[test]
fn until_sequence_reads_at_least_one_element() {
    // Read bytes until the last one has the high bit clear.
    let schema = Schema::builder("VarInt")
        .field(
            "groups",
            Int::new(1).repeated_until(field("groups").get(-1).bit_and(0x80).equals(0)),
        )
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x81\x82\x03rest").unwrap();
    let groups: Vec<i128> = pkt
        .list("groups")
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(groups, vec![0x81, 0x82, 0x03]);
    assert_eq!(pkt.pack().unwrap(), b"\x81\x82\x03");
}

#[test]
fn when_gates_the_whole_sequence() {
    let schema = Schema::builder("Gated")
        .field("flags", Int::new(1))
        .field(
            "items",
            Sequence::of(Int::new(1))
                .count(2usize)
                .when(field("flags").bit_and(0x01).equals(1)),
        )
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x01\x07\x08").unwrap();
    assert_eq!(pkt.list("items").unwrap().len(), 2);

    let pkt = schema.unpack(b"\x00").unwrap();
    assert_eq!(pkt.list("items").unwrap().len(), 0);
    assert_eq!(pkt.pack().unwrap(), b"\x00");
}

#[test]
fn sequence_may_not_have_both_count_and_until() {
    let err = Schema::builder("Bad")
        .field(
            "items",
            Sequence::of(Int::new(1)).count(2usize).until(Cond::func(|_| Ok(true))),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::SequenceCardinality));
}

#[test]
fn aligned_sequence_elements() {
    let schema = Schema::builder("Aligned")
        .field("n", Int::new(1))
        .field("items", Sequence::of(Int::new(1)).count("n").aligned_to(2))
        .build()
        .unwrap();

    // Layout: n at 0; elements at local offsets 2 and 4 (padding skipped).
    let pkt = schema.unpack(b"\x02\xee\x07\xee\x08").unwrap();
    let items: Vec<i128> = pkt
        .list("items")
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(items, vec![7, 8]);

    // Packing fills the alignment holes with the fill byte.
    assert_eq!(pkt.pack().unwrap(), b"\x02\x00\x07\x00\x08");
}

#[test]
fn optional_field_presence() {
    let schema = Schema::builder("Opt")
        .field("has_ext", Int::new(1))
        .field("ext", Int::new(2).when("has_ext"))
        .field("tail", Int::new(1))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x01\x00\x07\x2a").unwrap();
    assert_eq!(pkt.int("ext"), Some(7));
    assert_eq!(pkt.int("tail"), Some(0x2a));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x00\x07\x2a");

    // Absent: zero bytes consumed, zero bytes produced.
    let pkt = schema.unpack(b"\x00\x2a").unwrap();
    assert!(pkt.get("ext").unwrap().is_absent());
    assert_eq!(pkt.int("tail"), Some(0x2a));
    assert_eq!(pkt.pack().unwrap(), b"\x00\x2a");
}

#[test]
fn optional_condition_over_expressions() {
    let schema = Schema::builder("Versioned")
        .field("version", Int::new(1))
        .field("extra", Int::new(1).when(field("version").greater_or_eq(2)))
        .build()
        .unwrap();

    assert!(schema.unpack(b"\x01").unwrap().get("extra").unwrap().is_absent());
    assert_eq!(schema.unpack(b"\x02\x09").unwrap().int("extra"), Some(9));
}

#[test]
fn absolute_position_leaves_a_hole() {
    let schema = Schema::builder("Placed")
        .field("magic", Int::new(1))
        .field("late", Int::new(1).at(4usize))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x7fxxx\x2a").unwrap();
    assert_eq!(pkt.int("magic"), Some(0x7f));
    assert_eq!(pkt.int("late"), Some(0x2a));
    // The skipped range is filled, not preserved.
    assert_eq!(pkt.pack().unwrap(), b"\x7f\x00\x00\x00\x2a");
}

#[test]
fn relative_and_field_driven_movement() {
    let schema = Schema::builder("Skipping")
        .field("skip", Int::new(1))
        .field("v", Int::new(1).at_relative("skip"))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x02..\x2a").unwrap();
    assert_eq!(pkt.int("v"), Some(0x2a));
}

#[test]
fn aligned_field_decorator() {
    let schema = Schema::builder("Padded")
        .field("tag", Int::new(1))
        .field("word", Int::new(2).aligned(4))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x01...\x00\x07").unwrap();
    assert_eq!(pkt.int("word"), Some(7));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x00\x00\x00\x00\x07");
}

#[test]
fn explicit_move_field() {
    let schema = Schema::builder("Jump")
        .field("head", Int::new(1))
        .field("gap", Move::by(2))
        .field("tail", Int::new(1))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x01..\x04").unwrap();
    assert_eq!(pkt.int("tail"), Some(4));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x00\x00\x04");
}

#[test]
fn schema_wide_alignment() {
    let schema = Schema::builder("AllAligned")
        .align(2)
        .field("a", Int::new(1))
        .field("b", Int::new(1))
        .build()
        .unwrap();

    // Every field aligns to 2: a at 0, b at 2.
    let pkt = schema.unpack(b"\x01.\x02").unwrap();
    assert_eq!(pkt.int("a"), Some(1));
    assert_eq!(pkt.int("b"), Some(2));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x00\x02");
}

#[test]
fn overlapping_writes_collide() {
    // Rewind two bytes, then write a two-byte field over the first one.
    let schema = Schema::builder("Clash")
        .field("a", Int::new(2))
        .field("b", Int::new(2).at(1usize))
        .build()
        .unwrap();

    let mut pkt = schema.instance();
    pkt.set("a", Value::Int(1)).unwrap();
    pkt.set("b", Value::Int(2)).unwrap();
    let err = pkt.pack().unwrap_err();
    assert_eq!(err.field(), "b");
    assert!(matches!(err.kind(), ErrorKind::Collision { .. }));
}

#[test]
fn auto_length_tracks_the_payload() {
    let schema = Schema::builder("Framed")
        .field("n", Int::new(1).describe(AutoLength::of("payload")))
        .field("payload", Data::with_len("n"))
        .build()
        .unwrap();

    let pkt = schema
        .instance_with([("payload", Value::from("hello, world"))])
        .unwrap();
    assert_eq!(pkt.pack().unwrap(), b"\x0chello, world");

    // An explicit value pins the field.
    let mut pkt = schema
        .instance_with([("payload", Value::from("abc"))])
        .unwrap();
    pkt.set("n", Value::Int(2)).unwrap();
    assert_eq!(pkt.pack().unwrap(), b"\x02abc");

    // Unpacked instances keep the wire value.
    let pkt = schema.unpack(b"\x03abc").unwrap();
    assert_eq!(pkt.int("n"), Some(3));
    assert_eq!(pkt.pack().unwrap(), b"\x03abc");
}

#[test]
fn specialization_overrides_and_extends() {
    let base = Schema::builder("Base")
        .field("version", Int::new(1).default_value(1))
        .field("flags", Int::new(1))
        .build()
        .unwrap();

    let extended = base
        .specialize("Extended")
        .field("version", Int::new(1).default_value(2))
        .field("extra", Int::new(2))
        .build()
        .unwrap();

    assert_eq!(base.instance().pack().unwrap(), b"\x01\x00");
    assert_eq!(extended.instance().pack().unwrap(), b"\x02\x00\x00\x00");

    let pkt = extended.unpack(b"\x05\x06\x00\x07").unwrap();
    assert_eq!(pkt.int("version"), Some(5));
    assert_eq!(pkt.int("extra"), Some(7));
}

#[test]
fn additional_slots_are_carried_but_never_packed() {
    let schema = Schema::builder("Annotated")
        .additional_slot("note")
        .field("v", Int::new(1))
        .build()
        .unwrap();

    let mut pkt = schema.instance();
    pkt.set("note", Value::from("scratch")).unwrap();
    assert_eq!(pkt.pack().unwrap(), b"\x00");
    assert_eq!(pkt.bytes("note"), Some(b"scratch".as_slice()));
}

#[test]
fn reserved_names_are_rejected() {
    let err = Schema::builder("Bad")
        .field("_hidden", Int::new(1))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::ReservedName(_)));
}

#[test]
fn count_referencing_an_unknown_field_fails_to_compile() {
    let err = Schema::builder("Bad")
        .field("items", Int::new(1).repeated("missing"))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownField(name) if name == "missing"));
}

#[test]
fn movement_cannot_be_a_condition() {
    let err = Schema::builder("Bad")
        .field("gap", Move::by(1))
        .field("v", Int::new(1).when("gap"))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::NonBooleanCondition { field } if field == "gap"));
}
