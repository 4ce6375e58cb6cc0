//! Structured error values for schema compilation and pack/unpack runtime.

use core::fmt;

use lancet_types::NumError;
use thiserror::Error;

/// Whether a failure happened while producing or consuming bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Message-to-bytes direction.
    Pack,
    /// Bytes-to-message direction.
    Unpack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pack => f.write_str("packing"),
            Phase::Unpack => f.write_str("unpacking"),
        }
    }
}

/// One level of the field nesting at the time of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Byte offset the cursor was at.
    pub offset: usize,
    /// Bound name of the field being processed.
    pub field: String,
    /// Name of the schema that declares the field.
    pub schema: String,
}

/// Error raised while compiling a schema into a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A contiguous run of bit fields does not close on a byte boundary.
    #[error("bit run {widths:?} sums to {total} bits, not a multiple of 8")]
    ByteBoundary {
        /// Bit widths of the run, in declaration order.
        widths: Vec<u32>,
        /// Their sum.
        total: u32,
    },
    /// A sequence must have exactly one of a count or an until condition.
    #[error("a sequence needs exactly one of `count` and `until`")]
    SequenceCardinality,
    /// A reference field was declared with an unusable prototype.
    #[error("invalid reference: {0}")]
    InvalidRef(&'static str),
    /// Integer width outside the supported range.
    #[error("unsupported field width of {0} byte(s)")]
    BadWidth(usize),
    /// A field was used as a boolean condition but holds neither an integer
    /// nor a sequence.
    #[error("field `{field}` cannot be converted to a boolean condition")]
    NonBooleanCondition {
        /// The offending field name.
        field: String,
    },
    /// `include_delimiter` without `consume_delimiter` is contradictory.
    #[error("a delimiter cannot be part of the value yet stay in the stream")]
    BadFraming,
    /// Unusable until-marker (empty literal or malformed pattern).
    #[error("invalid until-marker: {0}")]
    BadMarker(String),
    /// A descriptor refers to a field name the schema does not declare.
    #[error("unknown field `{0}`")]
    UnknownField(String),
    /// Two descriptors expanded to the same slot name.
    #[error("duplicate field `{0}`")]
    DuplicateField(String),
    /// Leading underscores are reserved for engine-generated slots.
    #[error("field name `{0}` is reserved")]
    ReservedName(String),
}

/// The cause of a pack or unpack failure, before frame decoration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The buffer ends before the field does.
    #[error("needed {needed} byte(s) but only {available} remain")]
    ShortRead {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// An until-marker never matched inside the search window.
    #[error("until-marker not found within the search window")]
    MarkerNotFound,
    /// A sequence count evaluated below zero.
    #[error("element count evaluated to {0}")]
    NegativeCount(i128),
    /// A cursor movement resolved to a negative absolute offset.
    #[error("cursor movement resolved to offset {0}")]
    NegativeOffset(i128),
    /// A bit-field value exceeds its declared bit width.
    #[error("value {value} does not fit in {bits} bit(s)")]
    BitsOverflow {
        /// The value being packed.
        value: i128,
        /// Declared width of the bit field.
        bits: u32,
    },
    /// Two fragments were written over the same byte range.
    #[error(
        "fragment collision: {new_start:08x}-{new_end:08x} overlaps {old_start:08x}-{old_end:08x}"
    )]
    Collision {
        /// Start of the chunk being inserted.
        new_start: usize,
        /// End (exclusive) of the chunk being inserted.
        new_end: usize,
        /// Start of the chunk already present.
        old_start: usize,
        /// End (exclusive) of the chunk already present.
        old_end: usize,
    },
    /// A value or resolver result has a shape the field cannot handle.
    #[error("{0}")]
    BadShape(&'static str),
    /// A deferred expression or callable failed to evaluate.
    #[error("expression evaluation failed: {0}")]
    Eval(String),
    /// Primitive integer conversion failure.
    #[error(transparent)]
    Num(#[from] NumError),
    /// A schema error surfaced at runtime (ad-hoc descriptor compilation).
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Structured pack/unpack failure: a cause plus the field nesting stack.
///
/// The first frame is the innermost field; every reference boundary the
/// error crosses appends the enclosing frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketError {
    phase: Phase,
    frames: Vec<Frame>,
    kind: ErrorKind,
}

impl PacketError {
    pub(crate) fn new(
        phase: Phase,
        offset: usize,
        field: impl Into<String>,
        schema: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        PacketError {
            phase,
            frames: vec![Frame {
                offset,
                field: field.into(),
                schema: schema.into(),
            }],
            kind,
        }
    }

    pub(crate) fn push_frame(
        &mut self,
        offset: usize,
        field: impl Into<String>,
        schema: impl Into<String>,
    ) {
        self.frames.push(Frame {
            offset,
            field: field.into(),
            schema: schema.into(),
        });
    }

    /// The phase the failure happened in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The underlying cause.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Nesting stack, innermost frame first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Offset of the innermost failing field.
    pub fn offset(&self) -> usize {
        self.frames[0].offset
    }

    /// Name of the innermost failing field.
    pub fn field(&self) -> &str {
        &self.frames[0].field
    }
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.frames[0];
        writeln!(
            f,
            "error while {} field `{}` of {} at {:08x}: {}",
            self.phase, inner.field, inner.schema, inner.offset, self.kind
        )?;
        writeln!(f, "field stack:")?;
        for frame in self.frames.iter().rev() {
            writeln!(f, "    {:08x} {}.{}", frame.offset, frame.schema, frame.field)?;
        }
        Ok(())
    }
}

impl std::error::Error for PacketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Internal error channel between codecs and the plan walkers.
///
/// `Raw` still needs frame decoration; `Structured` already crossed at least
/// one driver level and only collects enclosing frames on the way out.
#[derive(Debug)]
pub(crate) enum CodecError {
    Raw(ErrorKind),
    Structured(PacketError),
}

impl From<ErrorKind> for CodecError {
    fn from(kind: ErrorKind) -> Self {
        CodecError::Raw(kind)
    }
}

impl From<PacketError> for CodecError {
    fn from(err: PacketError) -> Self {
        CodecError::Structured(err)
    }
}

impl From<NumError> for CodecError {
    fn from(err: NumError) -> Self {
        CodecError::Raw(ErrorKind::Num(err))
    }
}

impl From<SchemaError> for CodecError {
    fn from(err: SchemaError) -> Self {
        CodecError::Raw(ErrorKind::Schema(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stack_and_cause() {
        let mut err = PacketError::new(
            Phase::Unpack,
            3,
            "v",
            "Inner",
            ErrorKind::ShortRead {
                needed: 4,
                available: 1,
            },
        );
        err.push_frame(1, "items", "Outer");

        let text = err.to_string();
        assert!(text.contains("error while unpacking field `v` of Inner at 00000003"));
        assert!(text.contains("needed 4 byte(s) but only 1 remain"));
        // Outermost frame is printed first.
        let outer = text.find("Outer.items").unwrap();
        let inner = text.find("Inner.v").unwrap();
        assert!(outer < inner);
    }
}
