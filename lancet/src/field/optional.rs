//! Conditionally present fields.

use crate::error::{CodecError, SchemaError};
use crate::expr::{CompiledCond, Cond, EvalCtx};
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::SlotId;
use crate::value::Value;

use super::{compile_cond, CompileCtx, FieldCodec, FieldDef};

/// A field present only when its predicate holds.
///
/// When absent, the value is [`Value::Absent`], packing emits nothing and
/// unpacking does not advance the cursor.
#[derive(Clone)]
pub struct Optional {
    proto: Box<FieldDef>,
    when: Cond,
    default: Option<Value>,
}

impl Optional {
    /// Wrap a prototype field behind a presence predicate.
    pub fn of(proto: impl Into<FieldDef>, when: impl Into<Cond>) -> Self {
        Optional {
            proto: Box::new(proto.into()),
            when: when.into(),
            default: None,
        }
    }

    /// Default value applied by the schema constructor (absent otherwise).
    pub fn default_value(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub(crate) fn default_value_or_absent(&self) -> Value {
        self.default.clone().unwrap_or(Value::Absent)
    }

    pub(crate) fn set_default(&mut self, default: Value) {
        self.default = Some(default);
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        slot: SlotId,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<OptCodec, SchemaError> {
        let elem_name = format!("_opt_elem__{name}");
        let (elem_slot, proto) = self.proto.compile(&elem_name, &mut ctx.nested())?;
        Ok(OptCodec {
            slot,
            elem_slot,
            proto,
            when: compile_cond(&self.when, Some(ctx.expanded))?,
        })
    }
}

pub(crate) struct OptCodec {
    slot: SlotId,
    elem_slot: SlotId,
    proto: Box<dyn FieldCodec>,
    when: CompiledCond,
}

impl FieldCodec for OptCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let present = self.when.eval(&EvalCtx {
            pkt: &*pkt,
            raw: Some(raw),
            offset,
            local_offset: ctx.local_offset,
            root: ctx.root,
        })?;

        if present {
            let next = self.proto.unpack(pkt, raw, offset, ctx)?;
            let value = pkt.slot(self.elem_slot).clone();
            pkt.set_slot(self.slot, value);
            Ok(next)
        } else {
            pkt.set_slot(self.slot, Value::Absent);
            Ok(offset)
        }
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        match pkt.slot(self.slot) {
            Value::Absent => Ok(()),
            value => {
                let value = value.clone();
                pkt.set_slot(self.elem_slot, value);
                self.proto.pack(pkt, sink, ctx)
            }
        }
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        if !pkt.slot(self.slot).is_any() {
            return self.pack(pkt, frags, ctx);
        }

        pkt.set_slot(self.elem_slot, Value::any());
        let mut inner = RegexFragments::new();
        let body = match self.proto.pack_regexp(pkt, &mut inner, ctx) {
            Ok(()) => inner.assemble(),
            Err(_) => String::from(".*"),
        };
        frags.push_pattern(&format!("(?:{body})?"), 1)?;
        Ok(())
    }
}
