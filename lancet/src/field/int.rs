//! Fixed-width integer fields.

use lancet_types::{decode_int, encode_int, ByteOrder, Endianness, MAX_INT_WIDTH};

use crate::error::{CodecError, ErrorKind, SchemaError};
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::{SchemaConfig, SlotId};
use crate::value::Value;

use super::FieldCodec;

/// Integer field of a declared byte width.
///
/// Widths 1, 2, 4 and 8 decode through the primitive fast path; any other
/// width up to 16 goes through the generic byte loop. Signed values are
/// two's complement. The endianness falls back to the schema default when
/// not set on the field.
#[derive(Debug, Clone)]
pub struct Int {
    width: usize,
    signed: bool,
    endianness: Option<Endianness>,
    default: i128,
}

impl Int {
    /// Unsigned big-endian integer of `width` bytes (1 to 16).
    pub fn new(width: usize) -> Self {
        Int {
            width,
            signed: false,
            endianness: None,
            default: 0,
        }
    }

    /// Interpret the bytes as a two's-complement signed value.
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Override the schema's endianness for this field.
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = Some(endianness);
        self
    }

    /// Default value applied by the schema constructor.
    pub fn default_value(mut self, default: i128) -> Self {
        self.default = default;
        self
    }

    pub(crate) fn default(&self) -> i128 {
        self.default
    }

    pub(crate) fn set_default(&mut self, default: i128) {
        self.default = default;
    }

    pub(crate) fn compile(
        &self,
        slot: SlotId,
        config: &SchemaConfig,
    ) -> Result<IntCodec, SchemaError> {
        if self.width == 0 || self.width > MAX_INT_WIDTH {
            return Err(SchemaError::BadWidth(self.width));
        }
        let order = self
            .endianness
            .unwrap_or(config.endianness)
            .resolve();
        Ok(IntCodec {
            slot,
            width: self.width,
            signed: self.signed,
            order,
        })
    }
}

pub(crate) struct IntCodec {
    slot: SlotId,
    width: usize,
    signed: bool,
    order: ByteOrder,
}

impl FieldCodec for IntCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        _ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let end = offset.checked_add(self.width).ok_or(ErrorKind::ShortRead {
            needed: self.width,
            available: 0,
        })?;
        let bytes = raw.get(offset..end).ok_or(ErrorKind::ShortRead {
            needed: self.width,
            available: raw.len().saturating_sub(offset),
        })?;
        let value = decode_int(bytes, self.signed, self.order)?;
        pkt.set_slot(self.slot, Value::Int(value));
        Ok(end)
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        _ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let value = pkt
            .slot(self.slot)
            .as_int()
            .ok_or(ErrorKind::BadShape("an integer field holds a non-integer value"))?;
        let bytes = encode_int(value, self.width, self.signed, self.order)?;
        sink.append(&bytes)?;
        Ok(())
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        if pkt.slot(self.slot).is_any() {
            frags.push_pattern(&format!(".{{{}}}", self.width), self.width)?;
            Ok(())
        } else {
            self.pack(pkt, frags, ctx)
        }
    }
}
