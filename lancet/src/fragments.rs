//! Sparse byte-buffer assembly for the packing direction.
//!
//! Fields append at a cursor that `Move` directives may relocate, so chunks
//! can arrive out of order and leave holes. `Fragments` keeps the chunks
//! sorted, rejects overlapping writes and fills the holes when the final
//! buffer is materialized. `RegexFragments` is the companion used when a
//! message is rendered as a regular expression instead of bytes.

use crate::error::ErrorKind;

/// Byte destination the pack closures write into.
///
/// Implemented by [`Fragments`] (raw bytes) and [`RegexFragments`] (escaped
/// literals), so a field's pack logic serves both renditions.
pub trait PackSink {
    /// Where the next append lands.
    fn current_offset(&self) -> usize;

    /// Relocate the cursor (used by movement and alignment directives).
    fn set_offset(&mut self, offset: usize);

    /// Append bytes at the cursor and advance it.
    fn append(&mut self, bytes: &[u8]) -> Result<(), ErrorKind>;
}

/// Sparse, sorted chunk buffer with collision detection and hole filling.
#[derive(Debug, Clone, Default)]
pub struct Fragments {
    /// Sorted by start offset; pairwise non-overlapping.
    chunks: Vec<(usize, Vec<u8>)>,
    current_offset: usize,
    fill: u8,
}

impl Fragments {
    /// Empty buffer with a zero fill byte.
    pub fn new() -> Self {
        Fragments::default()
    }

    /// Empty buffer filling holes with `fill`.
    pub fn with_fill(fill: u8) -> Self {
        Fragments {
            fill,
            ..Fragments::default()
        }
    }

    /// Append many chunks at the cursor.
    pub fn extend<'a>(&mut self, chunks: impl IntoIterator<Item = &'a [u8]>) -> Result<(), ErrorKind> {
        for chunk in chunks {
            self.append(chunk)?;
        }
        Ok(())
    }

    /// Insert a chunk at an explicit position and move the cursor past it.
    ///
    /// Fails when the new chunk overlaps an existing one. Only the immediate
    /// predecessor and successor need inspection: the chunk list is sorted
    /// and pairwise non-overlapping.
    pub fn insert(&mut self, position: usize, bytes: &[u8]) -> Result<(), ErrorKind> {
        let len = bytes.len();
        let at = self.chunks.partition_point(|(start, _)| *start <= position);

        if at > 0 {
            let (prev_start, prev) = &self.chunks[at - 1];
            let prev_end = prev_start + prev.len();
            if position < prev_end {
                return Err(ErrorKind::Collision {
                    new_start: position,
                    new_end: position + len,
                    old_start: *prev_start,
                    old_end: prev_end,
                });
            }
        }
        if at < self.chunks.len() {
            let (next_start, next) = &self.chunks[at];
            if *next_start < position + len {
                return Err(ErrorKind::Collision {
                    new_start: position,
                    new_end: position + len,
                    old_start: *next_start,
                    old_end: next_start + next.len(),
                });
            }
        }

        self.chunks.insert(at, (position, bytes.to_vec()));
        self.current_offset = position + len;
        Ok(())
    }

    /// Concatenate the chunks in offset order, filling holes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut begin = 0usize;
        for (offset, chunk) in &self.chunks {
            out.resize(out.len() + offset.saturating_sub(begin), self.fill);
            out.extend_from_slice(chunk);
            begin = offset + chunk.len();
        }
        out
    }
}

impl PackSink for Fragments {
    fn current_offset(&self) -> usize {
        self.current_offset
    }

    fn set_offset(&mut self, offset: usize) {
        self.current_offset = offset;
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        self.insert(self.current_offset, bytes)
    }
}

/// Regex-mode fragment buffer.
///
/// Literal chunks occupy real byte ranges (placeholder bytes keep the
/// collision bookkeeping of [`Fragments`] working); non-literal chunks carry
/// a raw subpattern and a nominal width. Assembly fills inter-chunk holes
/// with a match-any subpattern of the hole's width.
#[derive(Debug, Clone, Default)]
pub struct RegexFragments {
    frags: Fragments,
    /// `(position, width, pattern)` in insertion order.
    patterns: Vec<(usize, usize, String)>,
}

impl RegexFragments {
    /// Empty regex buffer.
    pub fn new() -> Self {
        RegexFragments::default()
    }

    /// Append bytes that must match exactly.
    pub fn push_literal(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        let position = self.frags.current_offset();
        self.frags.insert(position, bytes)?;
        self.patterns.push((position, bytes.len(), escape_bytes(bytes)));
        Ok(())
    }

    /// Append a raw subpattern covering `width` bytes of the stream.
    ///
    /// Widths are nominal: when the real extent is unknown the caller passes
    /// 1 so later chunks keep advancing.
    pub fn push_pattern(&mut self, pattern: &str, width: usize) -> Result<(), ErrorKind> {
        let width = width.max(1);
        let position = self.frags.current_offset();
        self.frags.insert(position, &vec![0u8; width])?;
        self.patterns.push((position, width, pattern.to_owned()));
        Ok(())
    }

    /// Concatenate the stored patterns in offset order, turning each hole
    /// into an anonymous `(?:.{N})` group.
    pub fn assemble(&self) -> String {
        let mut sorted = self.patterns.clone();
        sorted.sort_by_key(|(position, _, _)| *position);

        let mut out = String::new();
        let mut begin = 0usize;
        for (position, width, pattern) in &sorted {
            let hole = position.saturating_sub(begin);
            if hole > 0 {
                out.push_str(&format!("(?:.{{{hole}}})"));
            }
            out.push_str(pattern);
            begin = position + width;
        }
        out
    }
}

impl PackSink for RegexFragments {
    fn current_offset(&self) -> usize {
        self.frags.current_offset()
    }

    fn set_offset(&mut self, offset: usize) {
        self.frags.set_offset(offset);
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        self.push_literal(bytes)
    }
}

/// Escape raw bytes into a `regex::bytes` literal pattern.
pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for &byte in bytes {
        push_escaped(&mut out, byte);
    }
    out
}

/// Escape a single byte into `out`.
pub(crate) fn push_escaped(out: &mut String, byte: u8) {
    if byte.is_ascii_alphanumeric() {
        out.push(byte as char);
    } else {
        out.push_str(&format!("\\x{byte:02x}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn append_concatenates() {
        let mut frags = Fragments::new();
        frags.append(b"ab").unwrap();
        frags.append(b"cd").unwrap();
        assert_eq!(frags.to_bytes(), b"abcd");
        assert_eq!(frags.current_offset(), 4);
    }

    #[test]
    fn holes_are_filled() {
        let mut frags = Fragments::with_fill(b'.');
        frags.append(b"ab").unwrap();
        frags.insert(5, b"xy").unwrap();
        assert_eq!(frags.to_bytes(), b"ab...xy");
    }

    #[test]
    fn out_of_order_insert() {
        let mut frags = Fragments::new();
        frags.insert(4, b"late").unwrap();
        frags.insert(0, b"earl").unwrap();
        assert_eq!(frags.to_bytes(), b"earllate");
    }

    #[test]
    fn collisions_are_rejected() {
        let mut frags = Fragments::new();
        frags.insert(2, b"abcd").unwrap();

        // Overlap with the predecessor.
        let err = frags.insert(3, b"x").unwrap_err();
        assert!(matches!(err, ErrorKind::Collision { old_start: 2, .. }));

        // Overlap with the successor.
        let err = frags.insert(0, b"abc").unwrap_err();
        assert!(matches!(err, ErrorKind::Collision { old_start: 2, .. }));

        // Touching is fine.
        frags.insert(0, b"ab").unwrap();
        frags.insert(6, b"z").unwrap();
        assert_eq!(frags.to_bytes(), b"ababcdz");
    }

    #[test]
    fn empty_chunks_only_move_the_cursor() {
        let mut frags = Fragments::new();
        frags.append(b"ab").unwrap();
        frags.insert(7, b"").unwrap();
        assert_eq!(frags.current_offset(), 7);
        assert_eq!(frags.to_bytes(), b"ab");
    }

    #[test]
    fn regex_assembly_fills_holes() {
        let mut frags = RegexFragments::new();
        frags.push_literal(b"AB").unwrap();
        frags.set_offset(5);
        frags.push_pattern(".{2}", 2).unwrap();
        assert_eq!(frags.assemble(), "AB(?:.{3}).{2}");
    }

    #[test]
    fn escaping_is_byte_exact() {
        assert_eq!(escape_bytes(b"a1"), "a1");
        assert_eq!(escape_bytes(&[0x00, 0xff, b'.']), "\\x00\\xff\\x2e");
        let re = regex::bytes::RegexBuilder::new(&escape_bytes(&[0x00, 0xff]))
            .unicode(false)
            .build()
            .unwrap();
        assert!(re.is_match(&[0x00, 0xff]));
    }

    #[quickcheck]
    fn successful_inserts_never_overlap(positions: Vec<(u8, u8)>) -> bool {
        let mut frags = Fragments::new();
        let mut placed: Vec<(usize, usize)> = Vec::new();
        for (pos, len) in positions {
            let (pos, len) = (pos as usize, (len as usize % 8) + 1);
            if frags.insert(pos, &vec![0xaa; len]).is_ok() {
                placed.push((pos, pos + len));
            }
        }
        placed.sort_unstable();
        placed.windows(2).all(|w| w[0].1 <= w[1].0)
    }
}
