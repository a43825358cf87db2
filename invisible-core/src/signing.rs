//! Stark ECDSA signing and multi-note key aggregation.

use num_bigint::BigUint;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use starknet_crypto::{rfc6979_generate_k, sign, verify, SignError};

use crate::error::{Result, WalletError};
use crate::hash::{parse_felt, Felt};

/// Order of the Stark curve generator.
pub const CURVE_ORDER_HEX: &str =
    "0800000000000010ffffffffffffffffb781126dcae7b2321e66a241adc64d2f";

static CURVE_ORDER: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(CURVE_ORDER_HEX.as_bytes(), 16).unwrap_or_default()
});

/// Attempts at finding a usable nonce before giving up.
const MAX_NONCE_ATTEMPTS: u32 = 16;

/// Signature as sent on the wire: decimal strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarkSignature {
    pub r: String,
    pub s: String,
}

impl StarkSignature {
    pub fn r(&self) -> Result<Felt> {
        parse_felt(&self.r)
    }

    pub fn s(&self) -> Result<Felt> {
        parse_felt(&self.s)
    }
}

fn to_biguint(value: &Felt) -> BigUint {
    BigUint::from_bytes_be(&value.to_bytes_be())
}

/// Sum private scalars modulo the curve order.
///
/// Multi-note spends are signed with this sum; the settlement service checks
/// the signature against the sum of the input addresses.
pub fn aggregate_private_keys(keys: &[Felt]) -> Result<Felt> {
    let sum = keys
        .iter()
        .fold(BigUint::default(), |acc, key| acc + to_biguint(key))
        % &*CURVE_ORDER;
    Felt::from_byte_slice_be(&sum.to_bytes_be())
        .map_err(|e| WalletError::Signing(format!("aggregated key out of range: {e}")))
}

/// Sign a message hash with RFC 6979 nonces.
pub fn sign_hash(private_key: &Felt, message_hash: &Felt) -> Result<StarkSignature> {
    let mut seed: Option<Felt> = None;
    for _ in 0..MAX_NONCE_ATTEMPTS {
        let k = rfc6979_generate_k(message_hash, private_key, seed.as_ref());
        match sign(private_key, message_hash, &k) {
            Ok(signature) => {
                return Ok(StarkSignature {
                    r: signature.r.to_string(),
                    s: signature.s.to_string(),
                })
            }
            Err(SignError::InvalidK) => {
                seed = Some(seed.unwrap_or(Felt::ZERO) + Felt::ONE);
            }
            Err(err) => return Err(WalletError::Signing(err.to_string())),
        }
    }
    Err(WalletError::Signing("no valid nonce found".into()))
}

/// Verify a signature against a public key (x-coordinate).
pub fn verify_stark_signature(
    public_key: &Felt,
    message_hash: &Felt,
    signature: &StarkSignature,
) -> Result<bool> {
    verify(public_key, message_hash, &signature.r()?, &signature.s()?)
        .map_err(|e| WalletError::Signing(e.to_string()))
}
