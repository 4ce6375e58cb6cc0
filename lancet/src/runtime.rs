//! The plan walkers: top-level and nested pack/unpack/regex drivers.
//!
//! A driver walks a schema's plan in order, invoking each entry's compiled
//! codec and decorating any failure with the field, schema and offset it
//! happened at. Reference codecs call back into these functions for their
//! sub-messages, so a propagating error collects one frame per message
//! boundary it crosses.

use tracing::trace;

use crate::error::{CodecError, PacketError, Phase};
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::schema::Schema;

/// Ambient state of one plan walk.
pub(crate) struct RunCtx<'a> {
    /// Offset at which the message being walked began.
    pub local_offset: usize,
    /// The outermost message, when this walk is nested.
    pub root: Option<&'a Packet>,
}

/// Walk the plan over `raw`, filling `pkt`; returns the final offset.
pub(crate) fn unpack_into(
    schema: &Schema,
    pkt: &mut Packet,
    raw: &[u8],
    mut offset: usize,
    ctx: &RunCtx<'_>,
) -> Result<usize, PacketError> {
    for entry in schema.plan() {
        trace!(schema = %schema.name(), field = %entry.name, offset, "unpacking field");
        match entry.codec.unpack(pkt, raw, offset, ctx) {
            Ok(next) => offset = next,
            Err(CodecError::Raw(kind)) => {
                return Err(PacketError::new(
                    Phase::Unpack,
                    offset,
                    entry.name.as_str(),
                    schema.name(),
                    kind,
                ));
            }
            Err(CodecError::Structured(mut err)) => {
                err.push_frame(offset, entry.name.as_str(), schema.name());
                return Err(err);
            }
        }
    }
    Ok(offset)
}

/// Walk the plan emitting `pkt`'s values into the sink.
pub(crate) fn pack_into(
    schema: &Schema,
    pkt: &mut Packet,
    sink: &mut dyn PackSink,
    ctx: &RunCtx<'_>,
) -> Result<(), PacketError> {
    for entry in schema.plan() {
        trace!(schema = %schema.name(), field = %entry.name, offset = sink.current_offset(), "packing field");
        let offset = sink.current_offset();
        match entry.codec.pack(pkt, sink, ctx) {
            Ok(()) => {}
            Err(CodecError::Raw(kind)) => {
                return Err(PacketError::new(
                    Phase::Pack,
                    offset,
                    entry.name.as_str(),
                    schema.name(),
                    kind,
                ));
            }
            Err(CodecError::Structured(mut err)) => {
                err.push_frame(offset, entry.name.as_str(), schema.name());
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Walk the plan emitting `pkt`'s regex form.
pub(crate) fn regex_into(
    schema: &Schema,
    pkt: &mut Packet,
    frags: &mut RegexFragments,
    ctx: &RunCtx<'_>,
) -> Result<(), PacketError> {
    for entry in schema.plan() {
        let offset = frags.current_offset();
        match entry.codec.pack_regexp(pkt, frags, ctx) {
            Ok(()) => {}
            Err(CodecError::Raw(kind)) => {
                return Err(PacketError::new(
                    Phase::Pack,
                    offset,
                    entry.name.as_str(),
                    schema.name(),
                    kind,
                ));
            }
            Err(CodecError::Structured(mut err)) => {
                err.push_frame(offset, entry.name.as_str(), schema.name());
                return Err(err);
            }
        }
    }
    Ok(())
}
