//! Hash primitives over the Stark field and the decimal wire encoding.
//!
//! `h2` and `hash_many` are the two hash functions every commitment, address
//! seed and order digest is built from. Both are Poseidon over the Stark
//! prime field, so a digest computed here matches the settlement service's
//! digest for the same ordered inputs.

use once_cell::sync::Lazy;
use starknet_crypto::{poseidon_hash, poseidon_hash_many, FieldElement};

use crate::error::{Result, WalletError};

/// Element of the Stark prime field `P = 2^251 + 17 * 2^192 + 1`.
pub type Felt = FieldElement;

static MASK_240: Lazy<Felt> = Lazy::new(|| low_bits_mask(240));

/// Two-input hash `H2(a, b)`.
pub fn h2(a: Felt, b: Felt) -> Felt {
    poseidon_hash(a, b)
}

/// Variable-length hash `H*(a, b, ...)`.
pub fn hash_many(elements: &[Felt]) -> Felt {
    poseidon_hash_many(elements)
}

fn low_bits_mask(bits: usize) -> Felt {
    let mut bytes = [0u8; 32];
    for bit in 0..bits.min(248) {
        bytes[31 - bit / 8] |= 1 << (bit % 8);
    }
    // 248 bits is always below the modulus.
    Felt::from_bytes_be(&bytes).unwrap_or(Felt::ZERO)
}

/// Keep the low `bits` bits of `value`; `bits` is capped at 248.
pub fn trim(value: Felt, bits: usize) -> Felt {
    if bits == 240 {
        return value & *MASK_240;
    }
    value & low_bits_mask(bits)
}

/// Keep the low 240 bits of `value`.
pub fn trim240(value: Felt) -> Felt {
    value & *MASK_240
}

/// The low 64 bits of `value` as an integer.
pub fn trim64(value: Felt) -> u64 {
    let bytes = value.to_bytes_be();
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[24..]);
    u64::from_be_bytes(low)
}

/// Bit length of the canonical integer behind `value`.
pub fn bit_length(value: &Felt) -> usize {
    let bytes = value.to_bytes_be();
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != 0 {
            return (32 - i) * 8 - byte.leading_zeros() as usize;
        }
    }
    0
}

/// Parse a decimal or `0x`-prefixed hex string into a field element.
pub fn parse_felt(value: &str) -> Result<Felt> {
    value
        .trim()
        .parse::<Felt>()
        .map_err(|e| WalletError::InvalidInput(format!("invalid field element {value:?}: {e}")))
}

/// Serde adapter writing a field element as a decimal string.
pub mod felt_dec {
    use super::Felt;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Felt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Felt, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Felt>()
            .map_err(|e| D::Error::custom(format!("invalid field element {raw:?}: {e}")))
    }
}

/// Serde adapter writing a `u64` as a decimal string. Accepts numbers on input.
pub mod u64_dec {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct DecVisitor;

        impl<'de> de::Visitor<'de> for DecVisitor {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a u64 as a decimal string or number")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.parse::<u64>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DecVisitor)
    }
}
