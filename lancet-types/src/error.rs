use thiserror::Error;

/// Error raised by the primitive integer codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumError {
    /// The value cannot be represented in the declared byte width.
    #[error("value {value} does not fit in {width} byte(s) (signed: {signed})")]
    Overflow {
        /// The value that was being encoded.
        value: i128,
        /// The declared field width in bytes.
        width: usize,
        /// Whether the field is signed.
        signed: bool,
    },
    /// Integer widths must be between 1 and [`MAX_INT_WIDTH`](crate::MAX_INT_WIDTH) bytes.
    #[error("unsupported integer width of {0} byte(s)")]
    UnsupportedWidth(usize),
    /// An unsigned 16-byte value above `i128::MAX` cannot enter the value domain.
    #[error("unsigned 16-byte value exceeds the engine's integer domain")]
    Unrepresentable,
}
