//! Primitive wire codecs shared by the lancet packet engine.
//!
//! This crate holds the byte-level building blocks: endianness resolution,
//! arbitrary-width two's-complement integer conversion and alignment
//! arithmetic. It knows nothing about schemas or field descriptors.

#![warn(missing_docs)]

mod align;
mod endian;
mod error;
mod num;

pub use align::padding_to;
pub use endian::{ByteOrder, Endianness};
pub use error::NumError;
pub use num::{decode_int, encode_int, width_limits, MAX_INT_WIDTH};
