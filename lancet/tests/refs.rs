//! Sub-message references: prototypes, resolvers, embedding, error frames.

use lancet::expr::field;
use lancet::{
    Data, ErrorKind, FieldExt, Int, Phase, Ref, Resolved, Schema, Value,
};

fn point() -> Schema {
    Schema::builder("Point")
        .field("x", Int::new(1))
        .field("y", Int::new(1))
        .build()
        .unwrap()
}

#[test]
fn prototype_references_and_defaults() {
    let point = point();
    let line = Schema::builder("Line")
        .field(
            "begin",
            Ref::prototype(
                point
                    .instance_with([("x", Value::Int(1)), ("y", Value::Int(2))])
                    .unwrap(),
            ),
        )
        .field("end", Ref::new(&point))
        .build()
        .unwrap();

    // The prototype doubles as the default value.
    let pkt = line.instance();
    assert_eq!(pkt.sub("begin").unwrap().int("x"), Some(1));
    assert_eq!(pkt.sub("begin").unwrap().int("y"), Some(2));
    assert_eq!(pkt.sub("end").unwrap().int("x"), Some(0));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x02\x00\x00");

    let pkt = line.unpack(b"\x01\x02\x03\x04").unwrap();
    assert_eq!(pkt.sub("end").unwrap().int("x"), Some(3));
    assert_eq!(pkt.sub("end").unwrap().int("y"), Some(4));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x02\x03\x04");
}

#[test]
fn counted_sequence_of_sub_messages() {
    let inner = Schema::builder("Inner")
        .field("v", Int::new(1))
        .build()
        .unwrap();
    let outer = Schema::builder("Outer")
        .field("n", Int::new(1))
        .field("items", Ref::new(&inner).repeated("n"))
        .build()
        .unwrap();

    let pkt = outer.unpack(b"\x02\x07\x08").unwrap();
    assert_eq!(pkt.int("n"), Some(2));
    let items = pkt.list("items").unwrap();
    assert_eq!(items[0].as_packet().unwrap().int("v"), Some(7));
    assert_eq!(items[1].as_packet().unwrap().int("v"), Some(8));
    assert_eq!(pkt.pack().unwrap(), b"\x02\x07\x08");
}

#[test]
fn nested_length_fields_see_their_own_message() {
    let chunk = Schema::builder("Chunk")
        .field("len", Int::new(1))
        .field("body", Data::with_len("len"))
        .build()
        .unwrap();
    let stream = Schema::builder("Stream")
        .field("n", Int::new(1))
        .field("chunks", Ref::new(&chunk).repeated("n"))
        .build()
        .unwrap();

    let pkt = stream.unpack(b"\x02\x01a\x03xyz").unwrap();
    let chunks = pkt.list("chunks").unwrap();
    assert_eq!(chunks[0].as_packet().unwrap().bytes("body"), Some(b"a".as_slice()));
    assert_eq!(chunks[1].as_packet().unwrap().bytes("body"), Some(b"xyz".as_slice()));
    assert_eq!(pkt.pack().unwrap(), b"\x02\x01a\x03xyz");
}

#[test]
fn resolver_choosing_between_layouts() {
    let v4 = Schema::builder("V4")
        .field("addr", Data::with_len(4usize))
        .build()
        .unwrap();
    let v6 = Schema::builder("V6")
        .field("addr", Data::with_len(16usize))
        .build()
        .unwrap();

    let packet = {
        let default = v4.instance();
        let (v4, v6) = (v4.clone(), v6.clone());
        Schema::builder("Addressed")
            .field("kind", Int::new(1))
            .field(
                "address",
                Ref::resolver(
                    move |ctx| {
                        let kind = ctx.pkt.int("kind").unwrap_or(0);
                        if kind == 6 {
                            Ok(Resolved::Packet(v6.instance()))
                        } else {
                            Ok(Resolved::Packet(v4.instance()))
                        }
                    },
                    default,
                ),
            )
            .build()
            .unwrap()
    };

    let pkt = packet.unpack(b"\x04ABCD").unwrap();
    assert_eq!(pkt.sub("address").unwrap().schema().name(), "V4");
    assert_eq!(pkt.pack().unwrap(), b"\x04ABCD");

    let pkt = packet.unpack(b"\x060123456789abcdef").unwrap();
    assert_eq!(pkt.sub("address").unwrap().schema().name(), "V6");
    assert_eq!(pkt.pack().unwrap(), b"\x060123456789abcdef");
}

#[test]
fn resolver_returning_a_scalar_descriptor() {
    // The width of `value` depends on an earlier field; the resolver hands
    // back a plain integer descriptor and the value lands in the reference's
    // own slot.
    let schema = Schema::builder("Sized")
        .field("width", Int::new(1))
        .field(
            "value",
            Ref::resolver(
                |ctx| {
                    let width = ctx.pkt.int("width").unwrap_or(1).max(1) as usize;
                    Ok(Resolved::Field(Int::new(width).into()))
                },
                Value::Int(0),
            ),
        )
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x02\x01\x00").unwrap();
    assert_eq!(pkt.int("value"), Some(0x100));

    // Packing a primitive value consults the resolver again.
    let mut pkt = schema.instance();
    pkt.set("width", Value::Int(2)).unwrap();
    pkt.set("value", Value::Int(0x203)).unwrap();
    assert_eq!(pkt.pack().unwrap(), b"\x02\x02\x03");
}

#[test]
fn computed_reference_from_an_expression() {
    let body = Schema::builder("Body")
        .field("v", Int::new(2))
        .build()
        .unwrap();
    let schema = Schema::builder("Wrapper")
        .field("head", Ref::new(&body))
        .field("tail", Ref::computed(field("head"), body.instance()))
        .build()
        .unwrap();

    let pkt = schema.unpack(b"\x00\x07\x00\x08").unwrap();
    assert_eq!(pkt.sub("tail").unwrap().int("v"), Some(8));
    assert_eq!(pkt.pack().unwrap(), b"\x00\x07\x00\x08");
}

#[test]
fn embedded_prototype_fields_are_flat() {
    let point = point();
    let point3d = Schema::builder("Point3d")
        .field(
            "base",
            Ref::prototype(
                point
                    .instance_with([("x", Value::Int(1)), ("y", Value::Int(2))])
                    .unwrap(),
            )
            .embed(),
        )
        .field("z", Int::new(1))
        .build()
        .unwrap();

    // Embedded defaults come from the prototype; the outer constructor may
    // override them by name.
    let pkt = point3d.instance();
    assert_eq!((pkt.int("x"), pkt.int("y"), pkt.int("z")), (Some(1), Some(2), Some(0)));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x02\x00");

    let pkt = point3d
        .instance_with([("x", Value::Int(7))])
        .unwrap();
    assert_eq!(pkt.pack().unwrap(), b"\x07\x02\x00");

    let pkt = point3d.unpack(b"\x01\x02\x03").unwrap();
    assert_eq!((pkt.int("x"), pkt.int("y"), pkt.int("z")), (Some(1), Some(2), Some(3)));
    assert_eq!(pkt.pack().unwrap(), b"\x01\x02\x03");
}

#[test]
fn errors_collect_one_frame_per_reference_boundary() {
    let inner = Schema::builder("Inner")
        .field("v", Int::new(4))
        .build()
        .unwrap();
    let middle = Schema::builder("Middle")
        .field("inner", Ref::new(&inner))
        .build()
        .unwrap();
    let outer = Schema::builder("Outer")
        .field("tag", Int::new(1))
        .field("middle", Ref::new(&middle))
        .build()
        .unwrap();

    let err = outer.unpack(b"\x01\x00\x00").unwrap_err();
    assert_eq!(err.phase(), Phase::Unpack);
    assert!(matches!(err.kind(), ErrorKind::ShortRead { needed: 4, available: 2 }));

    let frames = err.frames();
    assert_eq!(frames.len(), 3);
    assert_eq!((frames[0].field.as_str(), frames[0].schema.as_str()), ("v", "Inner"));
    assert_eq!((frames[1].field.as_str(), frames[1].schema.as_str()), ("inner", "Middle"));
    assert_eq!((frames[2].field.as_str(), frames[2].schema.as_str()), ("middle", "Outer"));
    assert_eq!(frames[0].offset, 1);

    let text = err.to_string();
    assert!(text.contains("Outer.middle"));
    assert!(text.contains("Inner.v"));
}

#[test]
fn local_alignment_is_relative_to_the_sub_message() {
    let inner = Schema::builder("Inner")
        .field("a", Int::new(1))
        .field("b", Int::new(1).aligned_local(2))
        .build()
        .unwrap();
    let outer = Schema::builder("Outer")
        .field("head", Int::new(1))
        .field("sub", Ref::new(&inner))
        .build()
        .unwrap();

    // The sub-message starts at offset 1; `b` aligns to offset 1 + 2.
    let pkt = outer.unpack(b"\xff\x01.\x02").unwrap();
    assert_eq!(pkt.sub("sub").unwrap().int("b"), Some(2));
    assert_eq!(pkt.pack().unwrap(), b"\xff\x01\x00\x02");
}

#[test]
fn prototype_freezing() {
    let point = point();
    let proto = point
        .instance_with([("x", Value::Int(9))])
        .unwrap()
        .as_prototype();

    let a = proto.instantiate();
    let mut b = proto.instantiate();
    b.set("x", Value::Int(1)).unwrap();

    assert_eq!(a.int("x"), Some(9));
    assert_eq!(b.int("x"), Some(1));
    assert_eq!(proto.instantiate().int("x"), Some(9));
}
