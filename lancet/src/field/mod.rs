//! The field descriptor algebra.
//!
//! A schema is an ordered list of named descriptors. Each descriptor knows
//! how to describe itself (possibly expanding into several concrete
//! descriptors, e.g. a positioned field prepends a cursor movement), how to
//! compile into a plan codec, and — through that codec — how to pack,
//! unpack and render itself as a regex subpattern.

pub mod auto;

mod bits;
mod data;
mod int;
mod moves;
mod optional;
mod reference;
mod sequence;

use std::sync::Arc;

use crate::error::{CodecError, SchemaError};
use crate::expr::{CompiledCond, CompiledCount, Cond, Count, Expr};
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::{SchemaConfig, SlotAlloc, SlotId};
use crate::value::Value;

use auto::Auto;

pub use bits::Bits;
pub use data::{Data, Marker};
pub use int::Int;
pub use moves::{Move, MoveArg, Movement};
pub use optional::Optional;
pub use reference::{Ref, Resolved, ResolveCtx, ResolverFn};
pub use sequence::Sequence;

pub(crate) use bits::{link_bits_runs, BitsLinks};

/// A fully parameterized field descriptor, ready to be added to a schema.
#[derive(Clone)]
pub struct FieldDef {
    pub(crate) kind: FieldKind,
    pub(crate) pos: Option<(MoveArg, Movement)>,
    pub(crate) auto: Option<Arc<dyn Auto>>,
}

impl FieldDef {
    pub(crate) fn plain(kind: FieldKind) -> Self {
        FieldDef {
            kind,
            pos: None,
            auto: None,
        }
    }
}

#[derive(Clone)]
pub(crate) enum FieldKind {
    Int(Int),
    Data(Data),
    Bits(Bits),
    Ref(Ref),
    Seq(Sequence),
    Opt(Optional),
    Move(Move),
}

macro_rules! impl_into_field_def {
    ($($ty:ident => $variant:ident),*) => {
        $(impl From<$ty> for FieldDef {
            fn from(def: $ty) -> Self {
                FieldDef::plain(FieldKind::$variant(def))
            }
        })*
    };
}

impl_into_field_def!(
    Int => Int,
    Data => Data,
    Bits => Bits,
    Ref => Ref,
    Sequence => Seq,
    Optional => Opt,
    Move => Move
);

/// Fluent decorators shared by every descriptor.
///
/// Implemented for all descriptor types and for [`FieldDef`] itself, so
/// decorations chain in any order.
pub trait FieldExt: Into<FieldDef> + Sized {
    /// Repeat this field a fixed or computed number of times.
    fn repeated(self, count: impl Into<Count>) -> FieldDef {
        Sequence::of(self).count(count).into()
    }

    /// Repeat this field until the condition holds (checked after each
    /// element; at least one element is read).
    fn repeated_until(self, until: impl Into<Cond>) -> FieldDef {
        Sequence::of(self).until(until).into()
    }

    /// Make this field optional, present only when the condition holds.
    fn when(self, cond: impl Into<Cond>) -> FieldDef {
        Optional::of(self, cond).into()
    }

    /// Start this field at an absolute offset.
    fn at(self, position: impl Into<MoveArg>) -> FieldDef {
        let mut def = self.into();
        def.pos = Some((position.into(), Movement::Absolute));
        def
    }

    /// Start this field a relative distance from the cursor.
    fn at_relative(self, delta: impl Into<MoveArg>) -> FieldDef {
        let mut def = self.into();
        def.pos = Some((delta.into(), Movement::Relative));
        def
    }

    /// Align this field's start to a multiple of `to` from the buffer start.
    fn aligned(self, to: usize) -> FieldDef {
        let mut def = self.into();
        def.pos = Some((MoveArg::from(to), Movement::AlignGlobal));
        def
    }

    /// Align this field's start to a multiple of `to` from the enclosing
    /// message's start.
    fn aligned_local(self, to: usize) -> FieldDef {
        let mut def = self.into();
        def.pos = Some((MoveArg::from(to), Movement::AlignLocal));
        def
    }

    /// Attach a computed attribute that synchronizes this field before
    /// packing (e.g. an automatic length).
    fn describe(self, auto: impl Auto + 'static) -> FieldDef {
        let mut def = self.into();
        def.auto = Some(Arc::new(auto));
        def
    }
}

impl<T: Into<FieldDef>> FieldExt for T {}

impl FieldDef {
    /// Expand this descriptor into the concrete descriptors it stands for.
    ///
    /// A positional directive becomes a preceding `Move`; an embedding
    /// reference is followed by the inlined fields of its prototype. The
    /// schema-wide default alignment applies to fields without their own
    /// directive.
    pub(crate) fn expand(mut self, name: &str, config: &SchemaConfig) -> Vec<(String, FieldDef)> {
        if self.pos.is_none() && !matches!(self.kind, FieldKind::Move(_)) {
            if let Some(align) = config.align {
                if align > 1 {
                    self.pos = Some((MoveArg::from(align), Movement::AlignGlobal));
                }
            }
        }

        let mut out = Vec::new();
        if let Some((arg, movement)) = self.pos.take() {
            out.push((
                format!("_shift_to_{name}"),
                FieldDef::plain(FieldKind::Move(Move::raw(arg, movement))),
            ));
        }

        let embedded = match &self.kind {
            FieldKind::Ref(r) if r.is_embed() => r.embedded_defs(),
            _ => Vec::new(),
        };
        out.push((name.to_owned(), self));
        out.extend(embedded);
        out
    }

    /// The slot value a fresh instance starts with.
    pub(crate) fn default_value(&self) -> Value {
        match &self.kind {
            FieldKind::Int(d) => Value::Int(d.default()),
            FieldKind::Bits(d) => Value::Int(d.default()),
            FieldKind::Data(d) => Value::Bytes(d.default_bytes()),
            // An embedding reference owns no frame of its own; the inlined
            // fields carry the prototype's defaults instead.
            FieldKind::Ref(d) if d.is_embed() => Value::Absent,
            FieldKind::Ref(d) => d.default_value(),
            FieldKind::Seq(d) => Value::List(d.default_list()),
            FieldKind::Opt(d) => d.default_value_or_absent(),
            FieldKind::Move(_) => Value::Absent,
        }
    }

    /// Override the descriptor's default with a concrete value, where the
    /// shapes agree. Used when an embedding prototype carries customized
    /// field values.
    pub(crate) fn set_default(&mut self, value: Value) {
        match (&mut self.kind, value) {
            (FieldKind::Int(d), Value::Int(v)) => d.set_default(v),
            (FieldKind::Bits(d), Value::Int(v)) => d.set_default(v),
            (FieldKind::Data(d), Value::Bytes(v)) => d.set_default(v),
            (FieldKind::Ref(d), v @ (Value::Packet(_) | Value::Int(_) | Value::Bytes(_))) => {
                d.set_default(v)
            }
            (FieldKind::Seq(d), Value::List(v)) => d.set_default(v),
            (FieldKind::Opt(d), v) => d.set_default(v),
            _ => {}
        }
    }

    /// Compile into a plan codec, allocating this field's slots.
    pub(crate) fn compile(
        &self,
        name: &str,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<(SlotId, Box<dyn FieldCodec>), SchemaError> {
        let slot = ctx.alloc.alloc(name, self.default_value())?;
        let codec: Box<dyn FieldCodec> = match &self.kind {
            FieldKind::Int(d) => Box::new(d.compile(slot, ctx.config)?),
            FieldKind::Data(d) => Box::new(d.compile(name, slot, ctx)?),
            FieldKind::Bits(d) => Box::new(d.compile(name, slot, ctx)?),
            FieldKind::Ref(d) => d.compile(slot, ctx)?,
            FieldKind::Seq(d) => Box::new(d.compile(name, slot, ctx)?),
            FieldKind::Opt(d) => Box::new(d.compile(name, slot, ctx)?),
            FieldKind::Move(d) => Box::new(d.compile(slot, ctx)?),
        };
        Ok((slot, codec))
    }

    /// Compile a descriptor produced at runtime by a reference resolver.
    ///
    /// Only self-contained scalar descriptors are supported here; they write
    /// into the reference's own slot.
    pub(crate) fn compile_scalar(
        &self,
        slot: SlotId,
        config: &SchemaConfig,
    ) -> Result<Box<dyn FieldCodec>, SchemaError> {
        match &self.kind {
            FieldKind::Int(d) => Ok(Box::new(d.compile(slot, config)?)),
            FieldKind::Data(d) => Ok(Box::new(d.compile_standalone(slot, config)?)),
            _ => Err(SchemaError::InvalidRef(
                "resolvers may only return integer or data descriptors",
            )),
        }
    }

    pub(crate) fn is_bits(&self) -> bool {
        matches!(self.kind, FieldKind::Bits(_))
    }
}

/// Everything a descriptor needs while compiling into the plan.
pub(crate) struct CompileCtx<'a> {
    pub config: &'a SchemaConfig,
    /// The expanded descriptor list of the schema being compiled; empty for
    /// nested prototypes compiled on their own.
    pub expanded: &'a [(String, FieldDef)],
    /// Index in `expanded`, when compiling a top-level entry.
    pub position: Option<usize>,
    pub alloc: &'a mut SlotAlloc,
    pub bits_links: &'a BitsLinks,
}

impl<'a> CompileCtx<'a> {
    /// Context for compiling a nested prototype (sequence element, optional
    /// element): same allocator and config, no positional linkage.
    pub(crate) fn nested(&mut self) -> CompileCtx<'_> {
        CompileCtx {
            config: self.config,
            expanded: self.expanded,
            position: None,
            alloc: self.alloc,
            bits_links: self.bits_links,
        }
    }
}

/// A compiled field: the pack/unpack/regex closures of one plan entry.
pub(crate) trait FieldCodec: Send + Sync {
    /// Consume bytes starting at `offset`, store the value, return the new
    /// offset.
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError>;

    /// Emit the stored value into the sink.
    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError>;

    /// Emit the regex form: exact bytes for concrete values, a wildcard
    /// subpattern for [`Value::Any`].
    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError>;
}

/// Lower a count parameter, checking field references against the schema.
///
/// `known` is `None` when compiling outside a schema (ad-hoc descriptors),
/// where references cannot be validated early.
pub(crate) fn compile_count(
    count: &Count,
    known: Option<&[(String, FieldDef)]>,
) -> Result<CompiledCount, SchemaError> {
    match count {
        Count::Const(n) => Ok(CompiledCount::Const(*n as i128)),
        Count::Field(name) => {
            if let Some(fields) = known {
                if !fields.iter().any(|(n, _)| n == name) {
                    return Err(SchemaError::UnknownField(name.clone()));
                }
            }
            Ok(CompiledCount::Program(Expr::Field(name.clone()).compile()))
        }
        Count::Expr(expr) => Ok(CompiledCount::Program(expr.compile())),
        Count::Func(f) => Ok(CompiledCount::Func(f.clone())),
    }
}

/// Lower a boolean parameter.
///
/// A bare field reference must name a field whose shape has a truth value:
/// integers and byte/list-shaped fields qualify, references and movements
/// do not.
pub(crate) fn compile_cond(
    cond: &Cond,
    known: Option<&[(String, FieldDef)]>,
) -> Result<CompiledCond, SchemaError> {
    match cond {
        Cond::Field(name) => {
            if let Some(fields) = known {
                let def = fields
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, d)| d)
                    .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
                match def.kind {
                    FieldKind::Int(_)
                    | FieldKind::Bits(_)
                    | FieldKind::Data(_)
                    | FieldKind::Seq(_)
                    | FieldKind::Opt(_) => {}
                    FieldKind::Ref(_) | FieldKind::Move(_) => {
                        return Err(SchemaError::NonBooleanCondition { field: name.clone() })
                    }
                }
            }
            Ok(CompiledCond::Program(Expr::Field(name.clone()).compile()))
        }
        Cond::Expr(expr) => Ok(CompiledCond::Program(expr.compile())),
        Cond::Func(f) => Ok(CompiledCond::Func(f.clone())),
    }
}
