//! Computed attributes attached to fields.
//!
//! A field decorated with [`FieldExt::describe`](super::FieldExt::describe)
//! gets its stored value synchronized from a computation right before
//! packing — the classic case being a length field that tracks another
//! field's size. Explicitly setting the field, or unpacking an instance
//! from the wire, pins the stored value and stops the recomputation for
//! that instance.

use crate::packet::Packet;
use crate::value::Value;

/// A computed attribute.
pub trait Auto: Send + Sync {
    /// Compute the field's value from the rest of the message.
    fn compute(&self, pkt: &Packet) -> Result<Value, String>;
}

/// Automatic length: the decorated field tracks the byte or element count
/// of another field.
pub struct AutoLength {
    of: String,
}

impl AutoLength {
    /// Track the length of `field`.
    pub fn of(field: impl Into<String>) -> Self {
        AutoLength { of: field.into() }
    }
}

impl Auto for AutoLength {
    fn compute(&self, pkt: &Packet) -> Result<Value, String> {
        let value = pkt
            .get(&self.of)
            .ok_or_else(|| format!("unknown field `{}`", self.of))?;
        match value {
            Value::Bytes(bytes) => Ok(Value::Int(bytes.len() as i128)),
            Value::List(list) => Ok(Value::Int(list.len() as i128)),
            other => Err(format!("field `{}` ({}) has no length", self.of, other.shape())),
        }
    }
}
