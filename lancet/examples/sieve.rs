//! Sift a pile of byte strings with a wildcard template.

use lancet::{anything_like, matching, Data, Int, Schema, Value};

fn main() {
    let frame = Schema::builder("Frame")
        .field("magic", Int::new(2))
        .field("kind", Int::new(1))
        .field("n", Int::new(1))
        .field("payload", Data::with_len("n"))
        .build()
        .expect("well-formed layout");

    // Match any frame with our magic and kind 2, whatever the payload.
    let mut template = anything_like(&frame);
    template.set("magic", Value::Int(0x4c43)).unwrap();
    template.set("kind", Value::Int(2)).unwrap();
    println!("pattern: {}", template.regex_pattern().unwrap());

    let candidates: Vec<&[u8]> = vec![
        b"LC\x02\x03abc",
        b"LC\x01\x00",
        b"XX\x02\x00",
        b"LC\x02\x00",
    ];

    for pkt in matching(&template, candidates).expect("derivable pattern") {
        println!(
            "kind {} with {} payload byte(s)",
            pkt.int("kind").unwrap(),
            pkt.bytes("payload").unwrap().len(),
        );
    }
}
