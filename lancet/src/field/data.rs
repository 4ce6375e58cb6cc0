//! Raw byte-blob fields: counted or delimiter-terminated.

use bitflags::bitflags;
use regex::bytes::Regex;

use crate::error::{CodecError, ErrorKind, SchemaError};
use crate::expr::{CompiledCount, Count, EvalCtx};
use crate::fragments::{escape_bytes, PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::{SchemaConfig, SlotId};
use crate::value::Value;

use super::{compile_count, CompileCtx, FieldCodec};

bitflags! {
    /// Delimiter framing of an until-marker field.
    struct Framing: u8 {
        /// The delimiter is part of the value.
        const INCLUDE = 0b01;
        /// The cursor advances past the delimiter.
        const CONSUME = 0b10;
    }
}

/// What terminates an until-marker field.
#[derive(Debug, Clone)]
pub enum Marker {
    /// A literal byte sequence.
    Literal(Vec<u8>),
    /// A compiled pattern; the match span is the delimiter.
    Regex(Regex),
    /// Everything up to the end of the buffer.
    ToEnd,
}

impl From<&[u8]> for Marker {
    fn from(bytes: &[u8]) -> Self {
        Marker::Literal(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Marker {
    fn from(bytes: &[u8; N]) -> Self {
        Marker::Literal(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Marker {
    fn from(bytes: Vec<u8>) -> Self {
        Marker::Literal(bytes)
    }
}

impl From<&str> for Marker {
    fn from(text: &str) -> Self {
        Marker::Literal(text.as_bytes().to_vec())
    }
}

/// Byte-blob field.
///
/// Either counted — a constant, a prior field, an expression or a callable
/// gives the byte count — or terminated by an until-marker. The framing
/// flags decide whether the delimiter lands in the value and whether the
/// cursor consumes it.
#[derive(Clone)]
pub struct Data {
    len: Option<Count>,
    marker: Option<Marker>,
    framing: Framing,
    default: Option<Vec<u8>>,
}

impl Data {
    /// Field of `len` bytes.
    pub fn with_len(len: impl Into<Count>) -> Self {
        Data {
            len: Some(len.into()),
            marker: None,
            framing: Framing::CONSUME,
            default: None,
        }
    }

    /// Field terminated by a delimiter.
    ///
    /// By default the delimiter is consumed from the stream but kept out of
    /// the value.
    pub fn until(marker: impl Into<Marker>) -> Self {
        Data {
            len: None,
            marker: Some(marker.into()),
            framing: Framing::CONSUME,
            default: None,
        }
    }

    /// Field terminated by a pattern match. The pattern `"$"` is the
    /// shortcut for "to the end of the buffer".
    pub fn until_regex(pattern: &str) -> Result<Self, SchemaError> {
        let marker = if pattern == "$" {
            Marker::ToEnd
        } else {
            let regex = regex::bytes::RegexBuilder::new(pattern)
                .unicode(false)
                .build()
                .map_err(|err| SchemaError::BadMarker(err.to_string()))?;
            Marker::Regex(regex)
        };
        Ok(Data {
            len: None,
            marker: Some(marker),
            framing: Framing::CONSUME,
            default: None,
        })
    }

    /// Everything up to the end of the buffer.
    pub fn to_end() -> Self {
        Data {
            len: None,
            marker: Some(Marker::ToEnd),
            framing: Framing::CONSUME,
            default: None,
        }
    }

    /// Keep the delimiter as part of the value.
    pub fn include_delimiter(mut self) -> Self {
        self.framing |= Framing::INCLUDE;
        self
    }

    /// Leave the delimiter in the stream: the value excludes it and the
    /// cursor stops right before it.
    pub fn leave_delimiter(mut self) -> Self {
        self.framing -= Framing::CONSUME;
        self
    }

    /// Default value applied by the schema constructor.
    pub fn default_bytes_value(mut self, default: impl Into<Vec<u8>>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Default: explicit bytes, or that many zero bytes for a constant
    /// count, or empty.
    pub(crate) fn default_bytes(&self) -> Vec<u8> {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match self.len {
            Some(Count::Const(n)) => vec![0u8; n],
            _ => Vec::new(),
        }
    }

    pub(crate) fn set_default(&mut self, default: Vec<u8>) {
        self.default = Some(default);
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.framing.contains(Framing::INCLUDE) && !self.framing.contains(Framing::CONSUME) {
            return Err(SchemaError::BadFraming);
        }
        if let Some(Marker::Literal(marker)) = &self.marker {
            if marker.is_empty() {
                return Err(SchemaError::BadMarker("empty literal marker".to_owned()));
            }
        }
        Ok(())
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        slot: SlotId,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<DataCodec, SchemaError> {
        self.validate()?;
        // A pattern delimiter is only known once matched, so the matched
        // bytes live in a hidden per-instance slot for the packing side.
        let delim_slot = match (&self.marker, self.framing.contains(Framing::INCLUDE)) {
            (Some(Marker::Regex(_)), false) => Some(
                ctx.alloc
                    .alloc(&format!("_delim__{name}"), Value::Bytes(Vec::new()))?,
            ),
            _ => None,
        };
        self.build_codec(slot, delim_slot, Some(ctx.expanded), ctx.config)
    }

    pub(crate) fn compile_standalone(
        &self,
        slot: SlotId,
        config: &SchemaConfig,
    ) -> Result<DataCodec, SchemaError> {
        self.validate()?;
        self.build_codec(slot, None, None, config)
    }

    fn build_codec(
        &self,
        slot: SlotId,
        delim_slot: Option<SlotId>,
        known: Option<&[(String, super::FieldDef)]>,
        config: &SchemaConfig,
    ) -> Result<DataCodec, SchemaError> {
        let kind = match (&self.len, &self.marker) {
            (Some(Count::Const(n)), None) => DataKind::Fixed(*n),
            (Some(count), None) => DataKind::Counted(compile_count(count, known)?),
            (None, Some(Marker::Literal(marker))) => DataKind::Literal(marker.clone()),
            (None, Some(Marker::Regex(regex))) => DataKind::Pattern(regex.clone()),
            (None, Some(Marker::ToEnd)) => DataKind::ToEnd,
            _ => unreachable!("constructors set exactly one of len and marker"),
        };
        Ok(DataCodec {
            slot,
            kind,
            include: self.framing.contains(Framing::INCLUDE),
            consume: self.framing.contains(Framing::CONSUME),
            window: config.search_buffer_length,
            delim_slot,
        })
    }
}

enum DataKind {
    Fixed(usize),
    Counted(CompiledCount),
    Literal(Vec<u8>),
    Pattern(Regex),
    ToEnd,
}

pub(crate) struct DataCodec {
    slot: SlotId,
    kind: DataKind,
    include: bool,
    consume: bool,
    window: Option<usize>,
    delim_slot: Option<SlotId>,
}

impl DataCodec {
    fn take_counted(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        needed: usize,
    ) -> Result<usize, CodecError> {
        let end = offset
            .checked_add(needed)
            .filter(|end| *end <= raw.len())
            .ok_or(ErrorKind::ShortRead {
                needed,
                available: raw.len().saturating_sub(offset),
            })?;
        pkt.set_slot(self.slot, Value::Bytes(raw[offset..end].to_vec()));
        Ok(end)
    }

    /// The slice the delimiter search may inspect.
    fn search_window<'r>(&self, raw: &'r [u8], offset: usize) -> &'r [u8] {
        let window = &raw[offset.min(raw.len())..];
        match self.window {
            Some(limit) => &window[..limit.min(window.len())],
            None => window,
        }
    }
}

impl FieldCodec for DataCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        match &self.kind {
            DataKind::Fixed(n) => self.take_counted(pkt, raw, offset, *n),
            DataKind::Counted(count) => {
                let n = count.eval(&EvalCtx {
                    pkt: &*pkt,
                    raw: Some(raw),
                    offset,
                    local_offset: ctx.local_offset,
                    root: ctx.root,
                })?;
                if n < 0 {
                    return Err(ErrorKind::NegativeCount(n).into());
                }
                self.take_counted(pkt, raw, offset, n as usize)
            }
            DataKind::Literal(marker) => {
                let window = self.search_window(raw, offset);
                let found = window
                    .windows(marker.len())
                    .position(|candidate| candidate == marker.as_slice())
                    .ok_or(ErrorKind::MarkerNotFound)?;

                let (value_end, next) = if self.include {
                    let end = offset + found + marker.len();
                    (end, end)
                } else if self.consume {
                    (offset + found, offset + found + marker.len())
                } else {
                    (offset + found, offset + found)
                };
                pkt.set_slot(self.slot, Value::Bytes(raw[offset..value_end].to_vec()));
                Ok(next)
            }
            DataKind::Pattern(regex) => {
                let window = self.search_window(raw, offset);
                let found = regex.find(window).ok_or(ErrorKind::MarkerNotFound)?;

                let (value_end, next) = if self.include {
                    let end = offset + found.end();
                    (end, end)
                } else {
                    let delim = window[found.start()..found.end()].to_vec();
                    if let Some(delim_slot) = self.delim_slot {
                        pkt.set_slot(delim_slot, Value::Bytes(delim));
                    }
                    let end = offset + found.start();
                    let next = if self.consume { offset + found.end() } else { end };
                    (end, next)
                };
                pkt.set_slot(self.slot, Value::Bytes(raw[offset..value_end].to_vec()));
                Ok(next)
            }
            DataKind::ToEnd => {
                pkt.set_slot(self.slot, Value::Bytes(raw[offset.min(raw.len())..].to_vec()));
                Ok(raw.len().max(offset))
            }
        }
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        _ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let value = pkt
            .slot(self.slot)
            .as_bytes()
            .ok_or(ErrorKind::BadShape("a data field holds a non-bytes value"))?
            .to_vec();
        sink.append(&value)?;

        // A delimiter that is consumed from the stream but kept out of the
        // value must still be written on the wire.
        if !self.include && self.consume {
            match &self.kind {
                DataKind::Literal(marker) => sink.append(marker)?,
                DataKind::Pattern(_) => {
                    if let Some(delim_slot) = self.delim_slot {
                        let delim = pkt
                            .slot(delim_slot)
                            .as_bytes()
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default();
                        sink.append(&delim)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let wildcard = match pkt.slot(self.slot) {
            Value::Any(wildcard) => wildcard.clone(),
            _ => return self.pack(pkt, frags, ctx),
        };
        let custom = wildcard.pattern().map(str::to_owned);

        match &self.kind {
            DataKind::Fixed(n) => {
                frags.push_pattern(&format!(".{{{n}}}"), *n)?;
            }
            DataKind::Counted(count) => {
                let n = count.eval(&EvalCtx {
                    pkt: &*pkt,
                    raw: None,
                    offset: frags.current_offset(),
                    local_offset: ctx.local_offset,
                    root: ctx.root,
                });
                match n {
                    Ok(n) if n >= 0 => frags.push_pattern(&format!(".{{{n}}}"), n as usize)?,
                    _ => frags.push_pattern(custom.as_deref().unwrap_or(".*"), 1)?,
                }
            }
            DataKind::Literal(marker) => {
                let body = custom.as_deref().unwrap_or(".*");
                frags.push_pattern(&format!("{body}{}", escape_bytes(marker)), 1)?;
            }
            DataKind::Pattern(regex) => {
                let body = custom.as_deref().unwrap_or(".*");
                frags.push_pattern(&format!("{body}{}", regex.as_str()), 1)?;
            }
            DataKind::ToEnd => {
                frags.push_pattern(custom.as_deref().unwrap_or(".*"), 1)?;
            }
        }
        Ok(())
    }
}
