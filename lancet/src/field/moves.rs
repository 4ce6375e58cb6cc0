//! Cursor movement pseudo-fields.

use crate::error::{CodecError, ErrorKind, SchemaError};
use crate::expr::{CompiledCount, Count, CountFn, EvalCtx};
use crate::fragments::{PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::SlotId;

use super::{compile_count, CompileCtx, FieldCodec};

/// How a movement argument is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Movement {
    /// Set the cursor to the argument.
    Absolute,
    /// Add the argument to the cursor.
    Relative,
    /// Advance until the cursor is a multiple of the argument.
    AlignGlobal,
    /// Advance until the cursor, measured from the enclosing message's
    /// start, is a multiple of the argument.
    AlignLocal,
}

/// Argument of a movement: a constant, a prior field, or a callable.
#[derive(Clone)]
pub enum MoveArg {
    /// Fixed distance or position.
    Const(i128),
    /// Integer value of an earlier field.
    Field(String),
    /// User callable.
    Func(CountFn),
}

impl From<usize> for MoveArg {
    fn from(n: usize) -> Self {
        MoveArg::Const(n as i128)
    }
}

impl From<i32> for MoveArg {
    fn from(n: i32) -> Self {
        MoveArg::Const(n as i128)
    }
}

impl From<i128> for MoveArg {
    fn from(n: i128) -> Self {
        MoveArg::Const(n)
    }
}

impl From<&str> for MoveArg {
    fn from(field: &str) -> Self {
        MoveArg::Field(field.to_owned())
    }
}

/// A pseudo-field that only mutates the cursor; it carries no value.
#[derive(Clone)]
pub struct Move {
    arg: MoveArg,
    movement: Movement,
}

impl Move {
    /// Jump to an absolute offset.
    pub fn to(position: impl Into<MoveArg>) -> Self {
        Move::raw(position.into(), Movement::Absolute)
    }

    /// Move the cursor by a (possibly negative) distance.
    pub fn by(delta: impl Into<MoveArg>) -> Self {
        Move::raw(delta.into(), Movement::Relative)
    }

    /// Align the cursor to a multiple of `to` from the buffer start.
    pub fn align(to: impl Into<MoveArg>) -> Self {
        Move::raw(to.into(), Movement::AlignGlobal)
    }

    /// Align the cursor to a multiple of `to` from the enclosing message's
    /// start.
    pub fn align_local(to: impl Into<MoveArg>) -> Self {
        Move::raw(to.into(), Movement::AlignLocal)
    }

    pub(crate) fn raw(arg: MoveArg, movement: Movement) -> Self {
        Move { arg, movement }
    }

    pub(crate) fn compile(
        &self,
        _slot: SlotId,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<MoveCodec, SchemaError> {
        let arg = match &self.arg {
            MoveArg::Const(n) => CompiledCount::Const(*n),
            MoveArg::Field(name) => compile_count(&Count::Field(name.clone()), Some(ctx.expanded))?,
            MoveArg::Func(f) => CompiledCount::Func(f.clone()),
        };
        Ok(MoveCodec {
            arg,
            movement: self.movement,
        })
    }
}

pub(crate) struct MoveCodec {
    arg: CompiledCount,
    movement: Movement,
}

impl MoveCodec {
    /// Apply the movement to `offset`, with `base` as the local origin.
    fn target(&self, offset: usize, base: usize, arg: i128) -> Result<usize, CodecError> {
        let next = match self.movement {
            Movement::Absolute => arg,
            Movement::Relative => offset as i128 + arg,
            Movement::AlignGlobal | Movement::AlignLocal => {
                if arg <= 0 {
                    return Err(ErrorKind::Eval(format!(
                        "alignment of {arg} is not positive"
                    ))
                    .into());
                }
                let start = if self.movement == Movement::AlignGlobal {
                    0
                } else {
                    base as i128
                };
                let rel = offset as i128 - start;
                offset as i128 + ((arg - rel.rem_euclid(arg)) % arg)
            }
        };
        usize::try_from(next).map_err(|_| ErrorKind::NegativeOffset(next).into())
    }
}

impl FieldCodec for MoveCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let arg = self.arg.eval(&EvalCtx {
            pkt: &*pkt,
            raw: Some(raw),
            offset,
            local_offset: ctx.local_offset,
            root: ctx.root,
        })?;
        self.target(offset, ctx.local_offset, arg)
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let offset = sink.current_offset();
        let arg = self.arg.eval(&EvalCtx {
            pkt: &*pkt,
            raw: None,
            offset,
            local_offset: ctx.local_offset,
            root: ctx.root,
        })?;
        sink.set_offset(self.target(offset, ctx.local_offset, arg)?);
        Ok(())
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        // Movements behave identically in regex mode; the hole they leave
        // becomes a match-any subpattern at assembly time.
        self.pack(pkt, frags, ctx)
    }
}
