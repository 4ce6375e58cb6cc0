//! References to sub-messages.

use std::sync::Arc;

use crate::error::{CodecError, ErrorKind, SchemaError};
use crate::expr::Expr;
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::{self, RunCtx};
use crate::schema::{Schema, SchemaConfig, SlotId};
use crate::value::Value;

use super::{CompileCtx, FieldCodec, FieldDef};

/// Context handed to a reference resolver.
pub struct ResolveCtx<'a> {
    /// The message being packed or unpacked.
    pub pkt: &'a Packet,
    /// The buffer, during unpacking.
    pub raw: Option<&'a [u8]>,
    /// Current cursor position.
    pub offset: usize,
    /// Offset at which the enclosing message began.
    pub local_offset: usize,
    /// Outermost message, when nested.
    pub root: Option<&'a Packet>,
    /// True when the resolver is consulted to encode a primitive value.
    pub packing: bool,
}

/// What a resolver may hand back.
pub enum Resolved {
    /// A concrete sub-message to delegate to.
    Packet(Packet),
    /// A scalar descriptor compiled on the spot; it reads or writes the
    /// reference's own value.
    Field(FieldDef),
}

/// Callable resolving the referent at pack/unpack time.
pub type ResolverFn = Arc<dyn Fn(&ResolveCtx<'_>) -> Result<Resolved, String> + Send + Sync>;

#[derive(Clone)]
enum RefKind {
    Prototype(Packet),
    Resolver { resolve: ResolverFn, default: Value },
    Computed { expr: Expr, default: Value },
}

/// Reference to another message layout.
///
/// The referent is a prototype instance (doubling as the default value), a
/// resolver callable, or a deferred expression yielding a sub-message. With
/// [`embed`](Ref::embed) the prototype's fields are inlined into the
/// enclosing schema and the reference itself packs nothing.
#[derive(Clone)]
pub struct Ref {
    kind: RefKind,
    embed: bool,
}

impl Ref {
    /// Reference a schema, using a default-constructed instance as the
    /// prototype.
    pub fn new(schema: &Schema) -> Self {
        Ref::prototype(schema.instance())
    }

    /// Reference with a customized prototype instance; its values are the
    /// defaults.
    pub fn prototype(proto: Packet) -> Self {
        Ref {
            kind: RefKind::Prototype(proto),
            embed: false,
        }
    }

    /// Reference resolved by a callable. The callable runs on every unpack
    /// (and on pack when the stored value is not a message); the default is
    /// mandatory because no prototype exists to supply one.
    pub fn resolver<F>(resolve: F, default: impl Into<Value>) -> Self
    where
        F: Fn(&ResolveCtx<'_>) -> Result<Resolved, String> + Send + Sync + 'static,
    {
        Ref {
            kind: RefKind::Resolver {
                resolve: Arc::new(resolve),
                default: default.into(),
            },
            embed: false,
        }
    }

    /// Reference computed by a deferred expression returning a sub-message.
    pub fn computed(expr: Expr, default: Packet) -> Self {
        Ref {
            kind: RefKind::Computed {
                expr,
                default: Value::Packet(default),
            },
            embed: false,
        }
    }

    /// Inline the prototype's fields into the enclosing schema.
    pub fn embed(mut self) -> Self {
        self.embed = true;
        self
    }

    pub(crate) fn is_embed(&self) -> bool {
        self.embed
    }

    /// The inlined `(name, descriptor)` list of an embedding reference.
    ///
    /// Field defaults come from the prototype instance, so a customized
    /// prototype propagates its values; the outer constructor may still
    /// override them by name.
    pub(crate) fn embedded_defs(&self) -> Vec<(String, FieldDef)> {
        let RefKind::Prototype(proto) = &self.kind else {
            return Vec::new();
        };
        proto
            .schema()
            .expanded_defs()
            .iter()
            .map(|(name, def)| {
                let mut def = def.clone();
                if !name.starts_with('_') {
                    if let Some(value) = proto.get(name) {
                        def.set_default(value.clone());
                    }
                }
                (name.clone(), def)
            })
            .collect()
    }

    pub(crate) fn default_value(&self) -> Value {
        match &self.kind {
            RefKind::Prototype(proto) => Value::Packet(proto.clone()),
            RefKind::Resolver { default, .. } | RefKind::Computed { default, .. } => {
                default.clone()
            }
        }
    }

    pub(crate) fn set_default(&mut self, value: Value) {
        match (&mut self.kind, value) {
            (RefKind::Prototype(proto), Value::Packet(new_proto)) => *proto = new_proto,
            (RefKind::Resolver { default, .. }, value)
            | (RefKind::Computed { default, .. }, value) => *default = value,
            _ => {}
        }
    }

    pub(crate) fn compile(
        &self,
        slot: SlotId,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<Box<dyn FieldCodec>, SchemaError> {
        if self.embed {
            if !matches!(self.kind, RefKind::Prototype(_)) {
                return Err(SchemaError::InvalidRef(
                    "only prototype references can be embedded",
                ));
            }
            return Ok(Box::new(NoopCodec));
        }

        Ok(match &self.kind {
            RefKind::Prototype(proto) => Box::new(ProtoRefCodec {
                slot,
                schema: proto.schema().clone(),
            }),
            RefKind::Resolver { resolve, .. } => Box::new(ResolverRefCodec {
                slot,
                resolve: resolve.clone(),
                config: ctx.config.clone(),
            }),
            RefKind::Computed { expr, .. } => Box::new(ComputedRefCodec {
                slot,
                program: expr.compile(),
            }),
        })
    }
}

/// Embedded references contribute nothing of their own.
struct NoopCodec;

impl FieldCodec for NoopCodec {
    fn unpack(
        &self,
        _pkt: &mut Packet,
        _raw: &[u8],
        offset: usize,
        _ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        Ok(offset)
    }

    fn pack(
        &self,
        _pkt: &mut Packet,
        _sink: &mut dyn PackSink,
        _ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    fn pack_regexp(
        &self,
        _pkt: &mut Packet,
        _frags: &mut RegexFragments,
        _ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Unpack a sub-message in place: fresh instance, delegated plan walk, the
/// enclosing message's frame added on the way out by the driver.
fn unpack_sub(
    schema: &Schema,
    sub: &mut Packet,
    pkt: &Packet,
    raw: &[u8],
    offset: usize,
    ctx: &RunCtx<'_>,
) -> Result<usize, CodecError> {
    let sub_ctx = RunCtx {
        local_offset: offset,
        root: Some(ctx.root.unwrap_or(pkt)),
    };
    let next = runtime::unpack_into(schema, sub, raw, offset, &sub_ctx)?;
    schema.run_sync_after_unpack(sub);
    Ok(next)
}

fn pack_sub(
    sub: &Packet,
    pkt: &Packet,
    sink: &mut dyn PackSink,
    ctx: &RunCtx<'_>,
) -> Result<Packet, CodecError> {
    let schema = sub.schema().clone();
    let mut work = sub.clone();
    schema.run_sync_before_pack(&mut work)?;
    let sub_ctx = RunCtx {
        local_offset: sink.current_offset(),
        root: Some(ctx.root.unwrap_or(pkt)),
    };
    runtime::pack_into(&schema, &mut work, sink, &sub_ctx)?;
    Ok(work)
}

struct ProtoRefCodec {
    slot: SlotId,
    schema: Schema,
}

impl FieldCodec for ProtoRefCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let mut sub = self.schema.blank_instance();
        let next = unpack_sub(&self.schema, &mut sub, pkt, raw, offset, ctx)?;
        pkt.set_slot(self.slot, Value::Packet(sub));
        Ok(next)
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let sub = pkt
            .slot(self.slot)
            .as_packet()
            .ok_or(ErrorKind::BadShape("a reference field holds a non-message value"))?
            .clone();
        pack_sub(&sub, pkt, sink, ctx)?;
        Ok(())
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        match pkt.slot(self.slot) {
            Value::Any(_) => {
                frags.push_pattern(".*", 1)?;
                Ok(())
            }
            Value::Packet(sub) => {
                let mut sub = sub.clone();
                let sub_ctx = RunCtx {
                    local_offset: frags.current_offset(),
                    root: Some(ctx.root.unwrap_or(pkt)),
                };
                runtime::regex_into(&self.schema, &mut sub, frags, &sub_ctx)?;
                Ok(())
            }
            _ => Err(ErrorKind::BadShape("a reference field holds a non-message value").into()),
        }
    }
}

struct ResolverRefCodec {
    slot: SlotId,
    resolve: ResolverFn,
    /// Ad-hoc descriptors compile against the enclosing schema's config.
    config: SchemaConfig,
}

impl ResolverRefCodec {
    fn resolve(&self, ctx: ResolveCtx<'_>) -> Result<Resolved, CodecError> {
        (self.resolve)(&ctx).map_err(|err| ErrorKind::Eval(err).into())
    }
}

impl FieldCodec for ResolverRefCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let resolved = self.resolve(ResolveCtx {
            pkt: &*pkt,
            raw: Some(raw),
            offset,
            local_offset: ctx.local_offset,
            root: ctx.root,
            packing: false,
        })?;

        match resolved {
            Resolved::Packet(mut sub) => {
                let schema = sub.schema().clone();
                let next = unpack_sub(&schema, &mut sub, pkt, raw, offset, ctx)?;
                pkt.set_slot(self.slot, Value::Packet(sub));
                Ok(next)
            }
            Resolved::Field(def) => {
                let codec = def.compile_scalar(self.slot, &self.config)?;
                codec.unpack(pkt, raw, offset, ctx)
            }
        }
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        if let Value::Packet(sub) = pkt.slot(self.slot) {
            let sub = sub.clone();
            pack_sub(&sub, pkt, sink, ctx)?;
            return Ok(());
        }

        // The stored value is primitive; ask the resolver how to encode it.
        let resolved = self.resolve(ResolveCtx {
            pkt: &*pkt,
            raw: None,
            offset: sink.current_offset(),
            local_offset: ctx.local_offset,
            root: ctx.root,
            packing: true,
        })?;

        match resolved {
            Resolved::Field(def) => {
                let codec = def.compile_scalar(self.slot, &self.config)?;
                codec.pack(pkt, sink, ctx)
            }
            Resolved::Packet(_) => Err(ErrorKind::BadShape(
                "resolver returned a message while a primitive value needs encoding",
            )
            .into()),
        }
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        match pkt.slot(self.slot) {
            Value::Any(_) => {
                frags.push_pattern(".*", 1)?;
                Ok(())
            }
            _ => self.pack(pkt, frags, ctx),
        }
    }
}

struct ComputedRefCodec {
    slot: SlotId,
    program: crate::expr::Program,
}

impl ComputedRefCodec {
    fn resolve(&self, ctx: &crate::expr::EvalCtx<'_>) -> Result<Packet, CodecError> {
        match self.program.eval(ctx)? {
            Value::Packet(sub) => Ok(sub),
            other => Err(ErrorKind::Eval(format!(
                "reference expression evaluated to {} instead of a message",
                other.shape()
            ))
            .into()),
        }
    }
}

impl FieldCodec for ComputedRefCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let mut sub = self.resolve(&crate::expr::EvalCtx {
            pkt: &*pkt,
            raw: Some(raw),
            offset,
            local_offset: ctx.local_offset,
            root: ctx.root,
        })?;
        let schema = sub.schema().clone();
        let next = unpack_sub(&schema, &mut sub, pkt, raw, offset, ctx)?;
        pkt.set_slot(self.slot, Value::Packet(sub));
        Ok(next)
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        match pkt.slot(self.slot) {
            Value::Packet(sub) => {
                let sub = sub.clone();
                pack_sub(&sub, pkt, sink, ctx)?;
                Ok(())
            }
            _ => Err(ErrorKind::BadShape(
                "a computed reference can only pack a message value",
            )
            .into()),
        }
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        match pkt.slot(self.slot) {
            Value::Any(_) => {
                frags.push_pattern(".*", 1)?;
                Ok(())
            }
            _ => self.pack(pkt, frags, ctx),
        }
    }
}
