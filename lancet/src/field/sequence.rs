//! Repeated fields.

use lancet_types::padding_to;

use crate::error::{CodecError, ErrorKind, SchemaError};
use crate::expr::{CompiledCond, CompiledCount, Cond, Count, EvalCtx};
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::SlotId;
use crate::value::Value;

use super::{compile_cond, compile_count, CompileCtx, FieldCodec, FieldDef};

/// A field repeated a number of times or until a condition holds.
///
/// Exactly one of `count` and `until` must be set. An optional `when`
/// predicate gates entry into the loop; `aligned_to` pads before each
/// element relative to the enclosing message's start.
#[derive(Clone)]
pub struct Sequence {
    proto: Box<FieldDef>,
    count: Option<Count>,
    until: Option<Cond>,
    when: Option<Cond>,
    aligned: Option<usize>,
    default: Option<Vec<Value>>,
}

impl Sequence {
    /// Sequence over a prototype field; parameterize with
    /// [`count`](Sequence::count) or [`until`](Sequence::until).
    pub fn of(proto: impl Into<FieldDef>) -> Self {
        Sequence {
            proto: Box::new(proto.into()),
            count: None,
            until: None,
            when: None,
            aligned: None,
            default: None,
        }
    }

    /// Repeat a fixed or computed number of times.
    pub fn count(mut self, count: impl Into<Count>) -> Self {
        self.count = Some(count.into());
        self
    }

    /// Repeat until the condition holds, checked after each element.
    pub fn until(mut self, until: impl Into<Cond>) -> Self {
        self.until = Some(until.into());
        self
    }

    /// Only enter the loop when the condition holds.
    pub fn when(mut self, when: impl Into<Cond>) -> Self {
        self.when = Some(when.into());
        self
    }

    /// Align each element to a multiple of `to` from the enclosing
    /// message's start.
    pub fn aligned_to(mut self, to: usize) -> Self {
        self.aligned = Some(to);
        self
    }

    /// Default element list applied by the schema constructor.
    pub fn default_list_value(mut self, default: Vec<Value>) -> Self {
        self.default = Some(default);
        self
    }

    pub(crate) fn default_list(&self) -> Vec<Value> {
        self.default.clone().unwrap_or_default()
    }

    pub(crate) fn set_default(&mut self, default: Vec<Value>) {
        self.default = Some(default);
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        slot: SlotId,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<SeqCodec, SchemaError> {
        if self.count.is_some() == self.until.is_some() {
            return Err(SchemaError::SequenceCardinality);
        }

        let elem_name = format!("_seq_elem__{name}");
        let (elem_slot, proto) = self.proto.compile(&elem_name, &mut ctx.nested())?;

        let known = Some(ctx.expanded);
        Ok(SeqCodec {
            slot,
            elem_slot,
            proto,
            count: self.count.as_ref().map(|c| compile_count(c, known)).transpose()?,
            until: self.until.as_ref().map(|c| compile_cond(c, known)).transpose()?,
            when: self.when.as_ref().map(|c| compile_cond(c, known)).transpose()?,
            aligned: self.aligned.or(ctx.config.align).unwrap_or(1),
        })
    }
}

pub(crate) struct SeqCodec {
    slot: SlotId,
    elem_slot: SlotId,
    proto: Box<dyn FieldCodec>,
    count: Option<CompiledCount>,
    until: Option<CompiledCond>,
    when: Option<CompiledCond>,
    aligned: usize,
}

impl SeqCodec {
    fn push_elem(&self, pkt: &mut Packet) {
        let elem = pkt.slot(self.elem_slot).clone();
        if let Value::List(list) = pkt.slot_mut(self.slot) {
            list.push(elem);
        }
    }
}

impl FieldCodec for SeqCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        mut offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        // Cleared up front so `when` and `until` observe the growing list.
        pkt.set_slot(self.slot, Value::List(Vec::new()));

        let count = match &self.count {
            Some(count) => {
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
                Some(n as usize)
            }
            None => None,
        };

        if let Some(when) = &self.when {
            let enter = when.eval(&EvalCtx {
                pkt: &*pkt,
                raw: Some(raw),
                offset,
                local_offset: ctx.local_offset,
                root: ctx.root,
            })?;
            if count == Some(0) || !enter {
                return Ok(offset);
            }
        }

        match (count, &self.until) {
            (Some(n), _) => {
                for _ in 0..n {
                    offset += padding_to(offset, ctx.local_offset, self.aligned);
                    offset = self.proto.unpack(pkt, raw, offset, ctx)?;
                    self.push_elem(pkt);
                }
            }
            (None, Some(until)) => loop {
                offset += padding_to(offset, ctx.local_offset, self.aligned);
                offset = self.proto.unpack(pkt, raw, offset, ctx)?;
                self.push_elem(pkt);
                let stop = until.eval(&EvalCtx {
                    pkt: &*pkt,
                    raw: Some(raw),
                    offset,
                    local_offset: ctx.local_offset,
                    root: ctx.root,
                })?;
                if stop {
                    break;
                }
            },
            (None, None) => unreachable!("validated at compile time"),
        }

        Ok(offset)
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let list = pkt
            .slot(self.slot)
            .as_list()
            .ok_or(ErrorKind::BadShape("a repeated field holds a non-list value"))?
            .to_vec();

        for elem in list {
            pkt.set_slot(self.elem_slot, elem);
            let offset = sink.current_offset();
            sink.set_offset(offset + padding_to(offset, ctx.local_offset, self.aligned));
            self.proto.pack(pkt, sink, ctx)?;
        }
        Ok(())
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        if !pkt.slot(self.slot).is_any() {
            let list = pkt
                .slot(self.slot)
                .as_list()
                .ok_or(ErrorKind::BadShape("a repeated field holds a non-list value"))?
                .to_vec();
            for elem in list {
                pkt.set_slot(self.elem_slot, elem);
                let offset = frags.current_offset();
                frags.set_offset(offset + padding_to(offset, ctx.local_offset, self.aligned));
                self.proto.pack_regexp(pkt, frags, ctx)?;
            }
            return Ok(());
        }

        // Wildcard list: derive the element's pattern once and wrap it in a
        // counted or unbounded group.
        pkt.set_slot(self.elem_slot, Value::any());
        let mut inner = RegexFragments::new();
        let body = match self.proto.pack_regexp(pkt, &mut inner, ctx) {
            Ok(()) => inner.assemble(),
            Err(_) => String::from(".*"),
        };
        let pattern = match &self.count {
            Some(CompiledCount::Const(n)) => format!("(?:{body}){{{n}}}"),
            _ => format!("(?:{body})*"),
        };
        frags.push_pattern(&pattern, 1)?;
        Ok(())
    }
}
