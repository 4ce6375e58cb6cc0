//! Schema construction and compilation.
//!
//! A [`SchemaBuilder`] collects named descriptors in declaration order and
//! compiles them into an immutable [`Schema`]: the descriptor list is
//! expanded (describe-yourself), bit runs are linked, every descriptor gets
//! its slots and its codec, and the result is the plan the runtime drivers
//! walk. A compiled schema is cheap to clone and safe to share across
//! threads.

use std::collections::HashMap;
use std::sync::Arc;

use lancet_types::Endianness;
use tracing::debug;

use crate::error::{ErrorKind, PacketError, Phase, SchemaError};
use crate::field::auto::Auto;
use crate::field::{link_bits_runs, CompileCtx, FieldCodec, FieldDef};
use crate::packet::Packet;
use crate::runtime::{self, RunCtx};
use crate::value::Value;

/// Index of a value slot inside an instance.
pub(crate) type SlotId = usize;

/// Per-schema configuration knobs.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    /// Default endianness of integer fields without their own.
    pub endianness: Endianness,
    /// Default alignment applied to every field and sequence element.
    pub align: Option<usize>,
    /// Upper bound on how far an until-marker search scans.
    pub search_buffer_length: Option<usize>,
    /// Extra named value slots carried by instances but never packed.
    pub additional_slots: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig {
            endianness: Endianness::Big,
            align: None,
            search_buffer_length: None,
            additional_slots: Vec::new(),
        }
    }
}

/// Ordered collection of descriptors, waiting to be compiled.
pub struct SchemaBuilder {
    name: String,
    config: SchemaConfig,
    defs: Vec<(String, FieldDef)>,
}

impl SchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        SchemaBuilder {
            name: name.into(),
            config: SchemaConfig::default(),
            defs: Vec::new(),
        }
    }

    /// Add a field. Redeclaring an existing name replaces its descriptor in
    /// place (the mechanism schema specialization builds on).
    pub fn field(mut self, name: impl Into<String>, def: impl Into<FieldDef>) -> Self {
        let name = name.into();
        let def = def.into();
        match self.defs.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = def,
            None => self.defs.push((name, def)),
        }
        self
    }

    /// Default endianness for integer fields.
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.config.endianness = endianness;
        self
    }

    /// Default alignment for every field.
    pub fn align(mut self, align: usize) -> Self {
        self.config.align = Some(align);
        self
    }

    /// Bound how far until-marker searches scan.
    pub fn search_buffer_length(mut self, limit: usize) -> Self {
        self.config.search_buffer_length = Some(limit);
        self
    }

    /// Carry an extra, never-packed value slot on every instance.
    pub fn additional_slot(mut self, name: impl Into<String>) -> Self {
        self.config.additional_slots.push(name.into());
        self
    }

    /// Compile the declaration into an immutable schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        for (name, _) in &self.defs {
            if name.is_empty() || name.starts_with('_') {
                return Err(SchemaError::ReservedName(name.clone()));
            }
        }

        let config = self.config;
        let expanded: Vec<(String, FieldDef)> = self
            .defs
            .iter()
            .flat_map(|(name, def)| def.clone().expand(name, &config))
            .collect();

        let bits_links = link_bits_runs(&expanded)?;

        let mut alloc = SlotAlloc::default();
        let mut plan = Vec::with_capacity(expanded.len());
        for (position, (name, def)) in expanded.iter().enumerate() {
            let mut ctx = CompileCtx {
                config: &config,
                expanded: &expanded,
                position: Some(position),
                alloc: &mut alloc,
                bits_links: &bits_links,
            };
            let (slot, codec) = def.compile(name, &mut ctx)?;
            plan.push(PlanEntry {
                name: name.clone(),
                slot,
                codec,
            });
        }

        let mut hooks = Vec::new();
        let mut auto_enabled = HashMap::new();
        for (name, def) in &expanded {
            if let Some(auto) = &def.auto {
                let target = alloc.slot_id(name).expect("compiled above");
                let enabled = alloc.alloc(&format!("_auto_{name}"), Value::Int(1))?;
                auto_enabled.insert(name.clone(), enabled);
                hooks.push(SyncHook {
                    field: name.clone(),
                    target,
                    enabled,
                    auto: auto.clone(),
                });
            }
        }

        for extra in &config.additional_slots {
            alloc.alloc(extra, Value::Absent)?;
        }

        let visible: Vec<(String, SlotId)> = plan
            .iter()
            .filter(|entry| !entry.name.starts_with('_'))
            .map(|entry| (entry.name.clone(), entry.slot))
            .collect();

        debug!(
            schema = %self.name,
            fields = plan.len(),
            slots = alloc.defaults.len(),
            "compiled schema"
        );

        Ok(Schema {
            inner: Arc::new(SchemaInner {
                name: self.name,
                config,
                defs: self.defs,
                expanded,
                plan,
                slot_index: alloc.index,
                defaults: alloc.defaults,
                visible,
                hooks,
                auto_enabled,
            }),
        })
    }
}

/// Slot bookkeeping during compilation.
#[derive(Default)]
pub(crate) struct SlotAlloc {
    index: HashMap<String, SlotId>,
    defaults: Vec<Value>,
}

impl SlotAlloc {
    /// Allocate a named slot with its initial value.
    pub(crate) fn alloc(&mut self, name: &str, default: Value) -> Result<SlotId, SchemaError> {
        if self.index.contains_key(name) {
            return Err(SchemaError::DuplicateField(name.to_owned()));
        }
        let slot = self.defaults.len();
        self.index.insert(name.to_owned(), slot);
        self.defaults.push(default);
        Ok(slot)
    }

    pub(crate) fn slot_id(&self, name: &str) -> Option<SlotId> {
        self.index.get(name).copied()
    }
}

/// One compiled plan entry.
pub(crate) struct PlanEntry {
    pub name: String,
    #[allow(dead_code)]
    pub slot: SlotId,
    pub codec: Box<dyn FieldCodec>,
}

struct SyncHook {
    field: String,
    target: SlotId,
    enabled: SlotId,
    auto: Arc<dyn Auto>,
}

struct SchemaInner {
    name: String,
    config: SchemaConfig,
    /// As declared, pre-expansion; seeds specialization.
    defs: Vec<(String, FieldDef)>,
    /// Post describe-yourself; seeds embedding.
    expanded: Vec<(String, FieldDef)>,
    plan: Vec<PlanEntry>,
    slot_index: HashMap<String, SlotId>,
    defaults: Vec<Value>,
    visible: Vec<(String, SlotId)>,
    hooks: Vec<SyncHook>,
    auto_enabled: HashMap<String, SlotId>,
}

/// A compiled message layout: the declared descriptors lowered into an
/// ordered, position-resolved plan.
///
/// Cloning is cheap (the compiled plan is shared); instances hold a clone.
#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

impl Schema {
    /// Start declaring a schema.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Start a schema that inherits this one's fields and configuration;
    /// redeclare fields by name to override them, add new ones to extend.
    pub fn specialize(&self, name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            config: self.inner.config.clone(),
            defs: self.inner.defs.clone(),
        }
    }

    /// The schema's name, used in error frames.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration the schema was compiled with.
    pub fn config(&self) -> &SchemaConfig {
        &self.inner.config
    }

    /// Declared field names in order, engine-generated slots skipped.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.inner.visible.iter().map(|(name, _)| name.as_str())
    }

    /// Fresh instance with every field at its default.
    pub fn instance(&self) -> Packet {
        Packet::from_slots(self.clone(), self.inner.defaults.clone())
    }

    /// Fresh instance with named overrides on top of the defaults.
    pub fn instance_with<'a>(
        &self,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Packet, SchemaError> {
        let mut pkt = self.instance();
        for (name, value) in values {
            pkt.set(name, value)?;
        }
        Ok(pkt)
    }

    /// Instance for the unpacking driver: slots exist but start absent.
    pub(crate) fn blank_instance(&self) -> Packet {
        Packet::from_slots(self.clone(), vec![Value::Absent; self.inner.defaults.len()])
    }

    /// Parse a message from the start of `raw`.
    pub fn unpack(&self, raw: &[u8]) -> Result<Packet, PacketError> {
        self.unpack_at(raw, 0).map(|(pkt, _)| pkt)
    }

    /// Parse a message starting at `offset`; returns the instance and the
    /// offset one past the consumed bytes.
    pub fn unpack_at(&self, raw: &[u8], offset: usize) -> Result<(Packet, usize), PacketError> {
        let mut pkt = self.blank_instance();
        let end = runtime::unpack_into(
            self,
            &mut pkt,
            raw,
            offset,
            &RunCtx {
                local_offset: offset,
                root: None,
            },
        )?;
        self.run_sync_after_unpack(&mut pkt);
        Ok((pkt, end))
    }

    /// Parse, mapping any failure to `None`.
    pub fn unpack_silent(&self, raw: &[u8]) -> Option<Packet> {
        self.unpack(raw).ok()
    }

    pub(crate) fn slot_id(&self, name: &str) -> Option<SlotId> {
        self.inner.slot_index.get(name).copied()
    }

    pub(crate) fn plan(&self) -> &[PlanEntry] {
        &self.inner.plan
    }

    pub(crate) fn expanded_defs(&self) -> &[(String, FieldDef)] {
        &self.inner.expanded
    }

    pub(crate) fn visible_fields(&self) -> impl Iterator<Item = (&str, SlotId)> {
        self.inner
            .visible
            .iter()
            .map(|(name, slot)| (name.as_str(), *slot))
    }

    pub(crate) fn auto_enabled_slot(&self, name: &str) -> Option<SlotId> {
        self.inner.auto_enabled.get(name).copied()
    }

    /// Synchronize computed attributes into their fields before packing.
    pub(crate) fn run_sync_before_pack(&self, pkt: &mut Packet) -> Result<(), PacketError> {
        for hook in &self.inner.hooks {
            let enabled = pkt.slot(hook.enabled).truthy().unwrap_or(false);
            if !enabled {
                continue;
            }
            match hook.auto.compute(&*pkt) {
                Ok(value) => pkt.set_slot(hook.target, value),
                Err(msg) => {
                    return Err(PacketError::new(
                        Phase::Pack,
                        0,
                        hook.field.clone(),
                        self.name(),
                        ErrorKind::Eval(msg),
                    ))
                }
            }
        }
        Ok(())
    }

    /// After a successful unpack the wire value wins: computed attributes
    /// stop recomputing for this instance.
    pub(crate) fn run_sync_after_unpack(&self, pkt: &mut Packet) {
        for hook in &self.inner.hooks {
            pkt.set_slot(hook.enabled, Value::Int(0));
        }
    }
}

impl core::fmt::Debug for Schema {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.inner.name)
            .field("fields", &self.inner.plan.len())
            .finish()
    }
}
