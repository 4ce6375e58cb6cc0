/// Byte order of a multi-byte integer field, as declared in a schema.
///
/// `Network` is an alias for big endian; `Native` resolves to the byte order
/// of the machine the code runs on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    /// Most significant byte first. The default.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
    /// Network byte order, i.e. big endian.
    Network,
    /// Whatever the target platform uses.
    Native,
}

/// A fully resolved byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

impl Endianness {
    /// Resolve the declared endianness to a concrete byte order.
    pub fn resolve(self) -> ByteOrder {
        match self {
            Endianness::Big | Endianness::Network => ByteOrder::Big,
            Endianness::Little => ByteOrder::Little,
            Endianness::Native => {
                if cfg!(target_endian = "big") {
                    ByteOrder::Big
                } else {
                    ByteOrder::Little
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn parse_and_resolve() {
        assert_eq!(Endianness::from_str("big").unwrap(), Endianness::Big);
        assert_eq!(Endianness::from_str("network").unwrap(), Endianness::Network);
        assert_eq!(Endianness::Network.resolve(), ByteOrder::Big);
        assert_eq!(Endianness::Little.resolve(), ByteOrder::Little);
        assert!(Endianness::from_str("middle").is_err());
        assert_eq!(Endianness::default(), Endianness::Big);
    }
}
