//! Declare an IPv4 header and round-trip a raw datagram through it.

use lancet::expr::field;
use lancet::{Bits, Data, Int, Schema};

fn ipv4() -> Schema {
    Schema::builder("Ipv4")
        .field("version", Bits::new(4).default_value(4))
        .field("ihl", Bits::new(4).default_value(5))
        .field("tos", Int::new(1))
        .field("total_length", Int::new(2))
        .field("id", Int::new(2))
        .field("flags", Bits::new(3))
        .field("fragment_offset", Bits::new(13))
        .field("ttl", Int::new(1).default_value(64))
        .field("protocol", Int::new(1))
        .field("checksum", Int::new(2))
        .field("src", Data::with_len(4usize))
        .field("dst", Data::with_len(4usize))
        // Options occupy whatever the header length claims beyond the
        // fixed 20 bytes.
        .field("options", Data::with_len(field("ihl").sub(5).mul(4)))
        .field("payload", Data::to_end())
        .build()
        .expect("well-formed layout")
}

fn main() {
    let raw: Vec<u8> = [
        0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x40, 0x00, 0x40, 0x11, 0xb6, 0x71, 0xc0, 0xa8,
        0x00, 0x01, 0xc0, 0xa8, 0x00, 0x02, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x08, 0x00, 0x00,
    ]
    .to_vec();

    let schema = ipv4();
    let pkt = schema.unpack(&raw).expect("valid datagram");

    println!(
        "v{} ihl={} ttl={} proto={}",
        pkt.int("version").unwrap(),
        pkt.int("ihl").unwrap(),
        pkt.int("ttl").unwrap(),
        pkt.int("protocol").unwrap(),
    );
    println!(
        "{:?} -> {:?} ({} payload byte(s))",
        pkt.bytes("src").unwrap(),
        pkt.bytes("dst").unwrap(),
        pkt.bytes("payload").unwrap().len(),
    );

    let again = pkt.pack().expect("packable");
    assert_eq!(again, raw);
    println!("round-trip ok");
}
