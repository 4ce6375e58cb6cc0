//! Message instances: per-field value storage over a compiled schema.

use core::fmt;

use crate::error::{ErrorKind, PacketError, Phase, SchemaError};
use crate::fragments::{Fragments, RegexFragments};
use crate::runtime::{self, RunCtx};
use crate::schema::{Schema, SlotId};
use crate::value::Value;

/// One message: a schema plus an owned value per slot.
///
/// Instances are created by [`Schema::instance`], [`Schema::instance_with`]
/// or [`Schema::unpack`]; they never share values with each other and may be
/// mutated freely.
#[derive(Clone)]
pub struct Packet {
    schema: Schema,
    slots: Vec<Value>,
}

impl Packet {
    pub(crate) fn from_slots(schema: Schema, slots: Vec<Value>) -> Self {
        Packet { schema, slots }
    }

    /// The schema this message was built from.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Value of a field (or engine-generated slot) by bound name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.slot_id(name).map(|slot| &self.slots[slot])
    }

    /// Set a field by bound name.
    ///
    /// Setting a field that carries a computed attribute pins the stored
    /// value: the attribute stops recomputing it for this instance.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SchemaError> {
        let slot = self
            .schema
            .slot_id(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_owned()))?;
        self.slots[slot] = value.into();
        if let Some(enabled) = self.schema.auto_enabled_slot(name) {
            self.slots[enabled] = Value::Int(0);
        }
        Ok(())
    }

    /// Integer value of a field, if it holds one.
    pub fn int(&self, name: &str) -> Option<i128> {
        self.get(name).and_then(Value::as_int)
    }

    /// Byte-string value of a field, if it holds one.
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(Value::as_bytes)
    }

    /// Element list of a repeated field, if it holds one.
    pub fn list(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_list)
    }

    /// Nested message held by a reference field, if any.
    pub fn sub(&self, name: &str) -> Option<&Packet> {
        self.get(name).and_then(Value::as_packet)
    }

    /// Declared fields in declaration order, engine-generated slots skipped.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .visible_fields()
            .map(|(name, slot)| (name, &self.slots[slot]))
    }

    pub(crate) fn slot(&self, slot: SlotId) -> &Value {
        &self.slots[slot]
    }

    pub(crate) fn slot_mut(&mut self, slot: SlotId) -> &mut Value {
        &mut self.slots[slot]
    }

    pub(crate) fn set_slot(&mut self, slot: SlotId, value: Value) {
        self.slots[slot] = value;
    }

    /// Serialize this message.
    ///
    /// Computed attributes are synchronized first; the result is the final
    /// byte string with any holes left by movement directives filled.
    pub fn pack(&self) -> Result<Vec<u8>, PacketError> {
        let schema = self.schema.clone();
        let mut work = self.clone();
        schema.run_sync_before_pack(&mut work)?;

        let mut frags = Fragments::new();
        runtime::pack_into(
            &schema,
            &mut work,
            &mut frags,
            &RunCtx {
                local_offset: 0,
                root: None,
            },
        )?;
        Ok(frags.to_bytes())
    }

    /// Derive the regular-expression pattern this message matches.
    ///
    /// Fields holding concrete values contribute exact byte literals; fields
    /// holding [`Value::Any`] contribute wildcard subpatterns.
    pub fn regex_pattern(&self) -> Result<String, PacketError> {
        let schema = self.schema.clone();
        let mut work = self.clone();

        let mut frags = RegexFragments::new();
        runtime::regex_into(
            &schema,
            &mut work,
            &mut frags,
            &RunCtx {
                local_offset: 0,
                root: None,
            },
        )?;
        Ok(frags.assemble())
    }

    /// [`Packet::regex_pattern`] compiled for matching against byte streams.
    ///
    /// The pattern is compiled in byte mode with `.` matching newlines.
    pub fn as_regex(&self) -> Result<regex::bytes::Regex, PacketError> {
        let pattern = self.regex_pattern()?;
        regex::bytes::RegexBuilder::new(&pattern)
            .dot_matches_new_line(true)
            .unicode(false)
            .build()
            .map_err(|err| {
                PacketError::new(
                    Phase::Pack,
                    0,
                    "<derived pattern>",
                    self.schema.name(),
                    ErrorKind::Eval(err.to_string()),
                )
            })
    }

    /// Freeze this instance as a cheap clone source.
    pub fn as_prototype(&self) -> Prototype {
        Prototype {
            template: self.clone(),
        }
    }
}

/// Messages compare by pairwise field equality in declaration order; a
/// wildcard in either field matches.
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        let mut ours = self.fields();
        let mut theirs = other.fields();
        loop {
            match (ours.next(), theirs.next()) {
                (None, None) => return true,
                (Some((name_a, a)), Some((name_b, b))) => {
                    if name_a != name_b || a != b {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct(self.schema.name());
        for (name, value) in self.fields() {
            dbg.field(name, value);
        }
        dbg.finish()
    }
}

/// A frozen message used as a structural template and default source.
#[derive(Clone)]
pub struct Prototype {
    template: Packet,
}

impl Prototype {
    /// Clone a fresh instance off the template.
    pub fn instantiate(&self) -> Packet {
        self.template.clone()
    }
}
