//! Template matching: wildcard instances and stream filtering.

use crate::error::PacketError;
use crate::packet::Packet;
use crate::schema::Schema;
use crate::value::Value;

/// An instance with every declared field set to the wildcard.
///
/// Its derived regular expression matches any message of the schema's
/// shape; narrow individual fields by setting concrete values.
pub fn anything_like(schema: &Schema) -> Packet {
    let mut pkt = schema.instance();
    let names: Vec<String> = schema.field_names().map(str::to_owned).collect();
    for name in names {
        pkt.set(&name, Value::any()).expect("declared field");
    }
    pkt
}

/// Keep the candidates whose bytes match the template's derived pattern.
///
/// Matching is anchored at the start of each candidate, like packing the
/// template would have produced the prefix.
pub fn filter_like<'a, I>(template: &Packet, candidates: I) -> Result<Vec<&'a [u8]>, PacketError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let regex = template.as_regex()?;
    Ok(candidates
        .into_iter()
        .filter(|raw| matches!(regex.find(raw), Some(found) if found.start() == 0))
        .collect())
}

/// Parse the candidates that match the template's pattern and keep those
/// structurally equal to it (wildcard fields match anything).
pub fn matching<'a, I>(template: &Packet, candidates: I) -> Result<Vec<Packet>, PacketError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let schema = template.schema().clone();
    Ok(filter_like(template, candidates)?
        .into_iter()
        .filter_map(|raw| schema.unpack_silent(raw))
        .filter(|pkt| pkt == template)
        .collect())
}
