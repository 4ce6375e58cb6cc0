//! Arbitrary-width two's-complement integer conversion.
//!
//! Widths 1, 2, 4 and 8 take the primitive `from_be_bytes`/`to_be_bytes`
//! path; every other width up to [`MAX_INT_WIDTH`] goes through a generic
//! base-256 loop. The value domain is `i128`.

use crate::{ByteOrder, NumError};

/// Largest supported integer field width, in bytes.
pub const MAX_INT_WIDTH: usize = 16;

/// Inclusive `(min, max)` representable by a field of `width` bytes.
pub fn width_limits(width: usize, signed: bool) -> (i128, i128) {
    debug_assert!((1..=MAX_INT_WIDTH).contains(&width));
    if signed {
        if width == MAX_INT_WIDTH {
            (i128::MIN, i128::MAX)
        } else {
            let half = 1i128 << (width * 8 - 1);
            (-half, half - 1)
        }
    } else if width == MAX_INT_WIDTH {
        // The unsigned top half of the 16-byte range does not fit in i128.
        (0, i128::MAX)
    } else {
        (0, (1i128 << (width * 8)) - 1)
    }
}

/// Encode `value` into exactly `width` bytes.
///
/// Signed values are two's complement. Fails when the value does not fit
/// the declared width and signedness.
pub fn encode_int(
    value: i128,
    width: usize,
    signed: bool,
    order: ByteOrder,
) -> Result<Vec<u8>, NumError> {
    if width == 0 || width > MAX_INT_WIDTH {
        return Err(NumError::UnsupportedWidth(width));
    }

    let (min, max) = width_limits(width, signed);
    if value < min || value > max || (!signed && value < 0) {
        return Err(NumError::Overflow {
            value,
            width,
            signed,
        });
    }

    let mut bytes = match width {
        1 => vec![value as u8],
        2 => (value as u16).to_be_bytes().to_vec(),
        4 => (value as u32).to_be_bytes().to_vec(),
        8 => (value as u64).to_be_bytes().to_vec(),
        _ => {
            // Casting a negative i128 to u128 yields its 128-bit two's
            // complement; keeping the low `width` bytes truncates it to the
            // field's complement form.
            let raw = value as u128;
            raw.to_be_bytes()[MAX_INT_WIDTH - width..].to_vec()
        }
    };

    if order == ByteOrder::Little {
        bytes.reverse();
    }
    Ok(bytes)
}

/// Decode an exact-width byte slice into an integer.
///
/// The width is the slice length; signed values are two's complement.
pub fn decode_int(bytes: &[u8], signed: bool, order: ByteOrder) -> Result<i128, NumError> {
    let width = bytes.len();
    if width == 0 || width > MAX_INT_WIDTH {
        return Err(NumError::UnsupportedWidth(width));
    }

    let mut be = [0u8; MAX_INT_WIDTH];
    match order {
        ByteOrder::Big => be[MAX_INT_WIDTH - width..].copy_from_slice(bytes),
        ByteOrder::Little => {
            for (i, b) in bytes.iter().enumerate() {
                be[MAX_INT_WIDTH - 1 - i] = *b;
            }
        }
    }

    let value = match width {
        1 => {
            let v = be[MAX_INT_WIDTH - 1];
            if signed {
                v as i8 as i128
            } else {
                v as i128
            }
        }
        2 => {
            let v = u16::from_be_bytes(be[MAX_INT_WIDTH - 2..].try_into().expect("width 2"));
            if signed {
                v as i16 as i128
            } else {
                v as i128
            }
        }
        4 => {
            let v = u32::from_be_bytes(be[MAX_INT_WIDTH - 4..].try_into().expect("width 4"));
            if signed {
                v as i32 as i128
            } else {
                v as i128
            }
        }
        8 => {
            let v = u64::from_be_bytes(be[MAX_INT_WIDTH - 8..].try_into().expect("width 8"));
            if signed {
                v as i64 as i128
            } else {
                v as i128
            }
        }
        _ => {
            let acc = u128::from_be_bytes(be);
            let top_bit_set = (acc >> (width * 8 - 1)) & 1 == 1;
            if signed && top_bit_set {
                if width == MAX_INT_WIDTH {
                    acc as i128
                } else {
                    acc as i128 - (1i128 << (width * 8))
                }
            } else if !signed && acc > i128::MAX as u128 {
                return Err(NumError::Unrepresentable);
            } else {
                acc as i128
            }
        }
    };

    Ok(value)
}
