//! Declarative binary-packet codec engine.
//!
//! Declare the layout of a wire-format message as an ordered list of field
//! descriptors; the compiled [`Schema`] derives three total functions over
//! it: `pack` (message to bytes), `unpack` (bytes to message) and a regular
//! expression for template matching against byte streams.
//!
//! ```
//! use lancet::{Data, Int, Schema};
//!
//! let schema = Schema::builder("Frame")
//!     .field("n", Int::new(1))
//!     .field("payload", Data::with_len("n"))
//!     .build()
//!     .unwrap();
//!
//! let pkt = schema.unpack(b"\x03ABC").unwrap();
//! assert_eq!(pkt.int("n"), Some(3));
//! assert_eq!(pkt.bytes("payload"), Some(b"ABC".as_slice()));
//! assert_eq!(pkt.pack().unwrap(), b"\x03ABC");
//! ```
//!
//! Descriptors compose: integers of any width and endianness, counted or
//! delimiter-terminated byte blobs, bit fields packed MSB-first into byte
//! groups, references to sub-messages, repetition, optional presence and
//! cursor movement. Sizes, counts and conditions may depend on earlier
//! fields through the [`expr`] combinators or plain callables.

#![warn(missing_docs)]

mod error;
pub mod expr;
mod fragments;
mod packet;
mod pattern;
mod runtime;
mod schema;
mod value;

pub mod field;

pub use error::{ErrorKind, Frame, PacketError, Phase, SchemaError};
pub use expr::{Cond, CondFn, Count, CountFn, EvalCtx, Expr};
pub use field::auto::{Auto, AutoLength};
pub use field::{
    Bits, Data, FieldDef, FieldExt, Int, Marker, Move, MoveArg, Movement, Optional, Ref,
    ResolveCtx, Resolved, ResolverFn, Sequence,
};
pub use fragments::{Fragments, PackSink, RegexFragments};
pub use packet::{Packet, Prototype};
pub use pattern::{anything_like, filter_like, matching};
pub use schema::{Schema, SchemaBuilder, SchemaConfig};
pub use value::{Value, Wildcard};

pub use lancet_types::{ByteOrder, Endianness};
