//! Bit fields packed into byte-aligned groups.
//!
//! A contiguous run of `Bits` descriptors shares one synthetic integer of
//! ⌈Σ bits / 8⌉ bytes. The run must close on a byte boundary. Bits are laid
//! out MSB-first: the first descriptor of the run occupies the high bits.
//! The first member's unpack decodes the whole group once; the last
//! member's pack emits it.

use std::collections::HashMap;

use itertools::Itertools;
use lancet_types::{decode_int, encode_int, ByteOrder, MAX_INT_WIDTH};

use crate::error::{CodecError, ErrorKind, SchemaError};
use crate::fragments::{push_escaped, PackSink, RegexFragments};
use crate::packet::Packet;
use crate::runtime::RunCtx;
use crate::schema::SlotId;
use crate::value::Value;

use super::{CompileCtx, FieldCodec, FieldDef};

/// A field of `width` bits inside a byte-aligned group.
#[derive(Debug, Clone)]
pub struct Bits {
    width: u32,
    default: i128,
}

impl Bits {
    /// Bit field of `width` bits (at least 1).
    pub fn new(width: u32) -> Self {
        Bits { width, default: 0 }
    }

    /// Default value applied by the schema constructor.
    pub fn default_value(mut self, default: i128) -> Self {
        self.default = default;
        self
    }

    pub(crate) fn default(&self) -> i128 {
        self.default
    }

    pub(crate) fn set_default(&mut self, default: i128) {
        self.default = default;
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        slot: SlotId,
        ctx: &mut CompileCtx<'_>,
    ) -> Result<BitsCodec, SchemaError> {
        let link = match ctx.position.and_then(|position| ctx.bits_links.get(&position)) {
            Some(link) => link.clone(),
            // A bit field compiled outside a schema run (e.g. as a sequence
            // element) forms a group of its own and must fill whole bytes.
            None => standalone_link(name, self.width)?,
        };

        let group_slot = if link.first {
            ctx.alloc.alloc(&link.group_name, Value::Int(0))?
        } else {
            ctx.alloc
                .slot_id(&link.group_name)
                .ok_or_else(|| SchemaError::UnknownField(link.group_name.clone()))?
        };

        let members = if link.last {
            link.members
                .iter()
                .map(|(member, width)| {
                    let member_slot = ctx
                        .alloc
                        .slot_id(member)
                        .ok_or_else(|| SchemaError::UnknownField(member.clone()))?;
                    Ok((member_slot, *width))
                })
                .collect::<Result<Vec<_>, SchemaError>>()?
        } else {
            Vec::new()
        };

        Ok(BitsCodec {
            slot,
            group_slot,
            group_width: link.group_width,
            shift: link.shift,
            width: self.width,
            first: link.first,
            last: link.last,
            members,
        })
    }
}

/// Positional linkage of one `Bits` descriptor inside its run.
#[derive(Debug, Clone)]
pub(crate) struct BitsLink {
    pub group_name: String,
    pub group_width: usize,
    pub shift: u32,
    pub first: bool,
    pub last: bool,
    /// `(member name, bit width)` in source order; filled for the last
    /// member only.
    pub members: Vec<(String, u32)>,
}

pub(crate) type BitsLinks = HashMap<usize, BitsLink>;

fn standalone_link(name: &str, width: u32) -> Result<BitsLink, SchemaError> {
    if width == 0 || width % 8 != 0 {
        return Err(SchemaError::ByteBoundary {
            widths: vec![width],
            total: width,
        });
    }
    if (width / 8) as usize >= MAX_INT_WIDTH {
        return Err(SchemaError::BadWidth((width / 8) as usize));
    }
    Ok(BitsLink {
        group_name: format!("_bits__{name}"),
        group_width: (width / 8) as usize,
        shift: 0,
        first: true,
        last: true,
        members: vec![(name.to_owned(), width)],
    })
}

/// Find every contiguous `Bits` run in the expanded descriptor list and
/// precompute each member's linkage. Fails when a run does not close on a
/// byte boundary.
pub(crate) fn link_bits_runs(expanded: &[(String, FieldDef)]) -> Result<BitsLinks, SchemaError> {
    let mut links = BitsLinks::new();

    let runs = expanded
        .iter()
        .enumerate()
        .group_by(|(_, (_, def))| def.is_bits());
    for (is_bits, run) in &runs {
        if !is_bits {
            continue;
        }
        let run: Vec<(usize, &String, u32)> = run
            .map(|(position, (name, def))| {
                let width = match &def.kind {
                    super::FieldKind::Bits(bits) => bits.width(),
                    _ => unreachable!("grouped by is_bits"),
                };
                (position, name, width)
            })
            .collect();

        let widths: Vec<u32> = run.iter().map(|(_, _, width)| *width).collect();
        let total: u32 = widths.iter().sum();
        if total == 0 || total % 8 != 0 || widths.contains(&0) {
            return Err(SchemaError::ByteBoundary { widths, total });
        }
        // Strictly below the i128 width so shifts and masks cannot overflow.
        let group_width = (total / 8) as usize;
        if group_width >= MAX_INT_WIDTH {
            return Err(SchemaError::BadWidth(group_width));
        }

        let group_name = format!(
            "_bits__{}",
            run.iter().map(|(_, name, _)| name.as_str()).join("_")
        );
        let members: Vec<(String, u32)> = run
            .iter()
            .map(|(_, name, width)| ((*name).clone(), *width))
            .collect();

        // The first source-order member owns the high bits.
        let mut below = total;
        for (index, (position, _, width)) in run.iter().enumerate() {
            below -= width;
            links.insert(
                *position,
                BitsLink {
                    group_name: group_name.clone(),
                    group_width,
                    shift: below,
                    first: index == 0,
                    last: index == run.len() - 1,
                    members: if index == run.len() - 1 {
                        members.clone()
                    } else {
                        Vec::new()
                    },
                },
            );
        }
    }

    Ok(links)
}

pub(crate) struct BitsCodec {
    slot: SlotId,
    group_slot: SlotId,
    group_width: usize,
    shift: u32,
    width: u32,
    first: bool,
    last: bool,
    /// `(member slot, bit width)` in source order; last member only.
    members: Vec<(SlotId, u32)>,
}

impl BitsCodec {
    fn mask(&self) -> i128 {
        (1i128 << self.width) - 1
    }
}

impl FieldCodec for BitsCodec {
    fn unpack(
        &self,
        pkt: &mut Packet,
        raw: &[u8],
        offset: usize,
        _ctx: &RunCtx<'_>,
    ) -> Result<usize, CodecError> {
        let mut next = offset;
        if self.first {
            let end = offset
                .checked_add(self.group_width)
                .filter(|end| *end <= raw.len())
                .ok_or(ErrorKind::ShortRead {
                    needed: self.group_width,
                    available: raw.len().saturating_sub(offset),
                })?;
            let group = decode_int(&raw[offset..end], false, ByteOrder::Big)?;
            pkt.set_slot(self.group_slot, Value::Int(group));
            next = end;
        }

        let group = pkt
            .slot(self.group_slot)
            .as_int()
            .ok_or(ErrorKind::BadShape("bit group slot holds a non-integer"))?;
        pkt.set_slot(self.slot, Value::Int((group >> self.shift) & self.mask()));
        Ok(next)
    }

    fn pack(
        &self,
        pkt: &mut Packet,
        sink: &mut dyn PackSink,
        _ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        let value = pkt
            .slot(self.slot)
            .as_int()
            .ok_or(ErrorKind::BadShape("a bit field holds a non-integer value"))?;
        if value < 0 || value > self.mask() {
            return Err(ErrorKind::BitsOverflow {
                value,
                bits: self.width,
            }
            .into());
        }

        // Merge this member into the shared running integer.
        let group = pkt.slot(self.group_slot).as_int().unwrap_or(0);
        let mask = self.mask() << self.shift;
        let merged = ((value << self.shift) & mask) | (group & !mask);
        pkt.set_slot(self.group_slot, Value::Int(merged));

        if self.last {
            let bytes = encode_int(merged, self.group_width, false, ByteOrder::Big)?;
            sink.append(&bytes)?;
        }
        Ok(())
    }

    fn pack_regexp(
        &self,
        pkt: &mut Packet,
        frags: &mut RegexFragments,
        _ctx: &RunCtx<'_>,
    ) -> Result<(), CodecError> {
        if !self.last {
            return Ok(());
        }

        // Build the group's bit string: '0'/'1' for literal member values,
        // 'x' for don't-care bits of wildcard members.
        let mut bits = String::with_capacity(self.group_width * 8);
        for (member_slot, width) in &self.members {
            match pkt.slot(*member_slot) {
                Value::Any(_) => bits.extend(std::iter::repeat('x').take(*width as usize)),
                value => {
                    let v = value.as_int().ok_or(ErrorKind::BadShape(
                        "a bit field holds a non-integer value",
                    ))?;
                    if v < 0 || v >= (1i128 << width) {
                        return Err(ErrorKind::BitsOverflow {
                            value: v,
                            bits: *width,
                        }
                        .into());
                    }
                    for bit in (0..*width).rev() {
                        bits.push(if (v >> bit) & 1 == 1 { '1' } else { '0' });
                    }
                }
            }
        }

        for byte in bits.as_bytes().chunks(8) {
            push_byte_pattern(frags, byte)?;
        }
        Ok(())
    }
}

/// Emit the pattern for one byte of a bit group.
///
/// Four cases: all don't-care, all fixed, a contiguous low don't-care run
/// (a character range suffices), and the mixed case where the matching
/// bytes are enumerated into a character class.
fn push_byte_pattern(frags: &mut RegexFragments, bits: &[u8]) -> Result<(), ErrorKind> {
    let fixed = u8::from_str_radix(
        &bits
            .iter()
            .map(|b| if *b == b'1' { '1' } else { '0' })
            .collect::<String>(),
        2,
    )
    .expect("eight binary digits");

    let first_dont_care = bits.iter().position(|b| *b == b'x');
    match first_dont_care {
        None => frags.push_literal(&[fixed]),
        Some(0) if bits.iter().all(|b| *b == b'x') => frags.push_pattern(".{1}", 1),
        Some(first) if bits[first..].iter().all(|b| *b == b'x') => {
            let low = fixed;
            let high = fixed | (0xffu8 >> first);
            let mut pattern = String::from("[");
            push_escaped(&mut pattern, low);
            pattern.push('-');
            push_escaped(&mut pattern, high);
            pattern.push(']');
            frags.push_pattern(&pattern, 1)
        }
        Some(_) => {
            let dont_care = bits
                .iter()
                .fold(0u8, |acc, b| (acc << 1) | u8::from(*b == b'x'));
            let matching = (0u16..256)
                .map(|candidate| (candidate as u8 & dont_care) | fixed)
                .sorted()
                .dedup();
            let mut pattern = String::from("[");
            for byte in matching {
                push_escaped(&mut pattern, byte);
            }
            pattern.push(']');
            frags.push_pattern(&pattern, 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::RegexFragments;

    fn pattern_for(bits: &str) -> String {
        let mut frags = RegexFragments::new();
        push_byte_pattern(&mut frags, bits.as_bytes()).unwrap();
        frags.assemble()
    }

    #[test]
    fn byte_pattern_cases() {
        assert_eq!(pattern_for("xxxxxxxx"), ".{1}");
        assert_eq!(pattern_for("01000001"), "A");
        assert_eq!(pattern_for("010000xx"), "[\\x40-C]");
        // Mixed: 0b0100_00x1 matches 0x41 and 0x43.
        assert_eq!(pattern_for("010000x1"), "[AC]");
    }
}
