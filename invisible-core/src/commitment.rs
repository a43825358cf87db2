//! Amount hiding.
//!
//! An amount is published as `hidden = amount XOR trim64(blinding)` next to
//! the commitment `H2(amount, blinding)`. The blinding is `H2(address, seed)`,
//! so only the holder of the wallet seed can open amounts at its addresses.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, h2, trim64, u64_dec, Felt};

/// Output of [`hide`]: what gets stored remotely plus the blinding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenAmount {
    #[serde(with = "felt_dec")]
    pub blinding: Felt,
    #[serde(with = "u64_dec")]
    pub hidden_amount: u64,
    #[serde(with = "felt_dec")]
    pub commitment: Felt,
}

/// Blinding factor for an address.
pub fn generate_blinding(address: Felt, seed: Felt) -> Felt {
    h2(address, seed)
}

/// Commitment `H2(amount, blinding)`.
pub fn commit(amount: u64, blinding: Felt) -> Felt {
    h2(Felt::from(amount), blinding)
}

pub fn hide_with_blinding(amount: u64, blinding: Felt) -> HiddenAmount {
    HiddenAmount {
        blinding,
        hidden_amount: amount ^ trim64(blinding),
        commitment: commit(amount, blinding),
    }
}

/// Hide `amount` for an address owned by the holder of `seed`.
pub fn hide(address: Felt, amount: u64, seed: Felt) -> HiddenAmount {
    hide_with_blinding(amount, generate_blinding(address, seed))
}

/// Open a hidden amount with a known blinding, checking the commitment.
pub fn reveal_with_blinding(blinding: Felt, hidden_amount: u64, commitment: Felt) -> Result<u64> {
    let amount = hidden_amount ^ trim64(blinding);
    if commit(amount, blinding) != commitment {
        return Err(WalletError::InvalidCommitment(commitment.to_string()));
    }
    Ok(amount)
}

/// Open a hidden amount at `address` using the wallet seed.
pub fn reveal(address: Felt, seed: Felt, hidden_amount: u64, commitment: Felt) -> Result<u64> {
    reveal_with_blinding(generate_blinding(address, seed), hidden_amount, commitment).map_err(
        |err| match err {
            WalletError::InvalidCommitment(_) => WalletError::InvalidCommitment(address.to_string()),
            other => other,
        },
    )
}
