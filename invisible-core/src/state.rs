//! Ledger entities: notes, positions and order tabs.
//!
//! Every field-element value is carried as a [`Felt`] in memory and written
//! as a decimal string on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::commitment::{commit, generate_blinding, reveal_with_blinding};
use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, h2, hash_many, u64_dec, Felt};

/// An owned, indivisible amount of one token at a one-time address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Slot in the remote state tree; `0` until the settlement service assigns one.
    pub index: u64,
    #[serde(with = "felt_dec")]
    pub address: Felt,
    pub token: u32,
    #[serde(with = "u64_dec")]
    pub amount: u64,
    #[serde(with = "felt_dec")]
    pub blinding: Felt,
}

impl Note {
    pub fn new(index: u64, address: Felt, token: u32, amount: u64, blinding: Felt) -> Self {
        Self {
            index,
            address,
            token,
            amount,
            blinding,
        }
    }

    pub fn commitment(&self) -> Felt {
        commit(self.amount, self.blinding)
    }

    /// Leaf hash of the note; empty notes hash to zero.
    pub fn hash(&self) -> Felt {
        if self.amount == 0 {
            return Felt::ZERO;
        }
        hash_many(&[self.address, Felt::from(self.token), self.commitment()])
    }

    /// The public record of this note.
    pub fn to_stored(&self) -> StoredNote {
        StoredNote {
            index: self.index,
            address: self.address,
            token: self.token,
            hidden_amount: self.amount ^ crate::hash::trim64(self.blinding),
            commitment: self.commitment(),
        }
    }
}

/// Hash of an optional note, zero when absent.
pub fn optional_note_hash(note: Option<&Note>) -> Felt {
    note.map(Note::hash).unwrap_or(Felt::ZERO)
}

/// A note as published by the state store: amount hidden, commitment public.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNote {
    pub index: u64,
    #[serde(with = "felt_dec")]
    pub address: Felt,
    pub token: u32,
    #[serde(with = "u64_dec")]
    pub hidden_amount: u64,
    #[serde(with = "felt_dec")]
    pub commitment: Felt,
}

impl StoredNote {
    /// Open the note with the wallet's private seed.
    pub fn reveal(&self, private_seed: Felt) -> Result<Note> {
        let blinding = generate_blinding(self.address, private_seed);
        let amount = reveal_with_blinding(blinding, self.hidden_amount, self.commitment)
            .map_err(|_| WalletError::InvalidCommitment(self.address.to_string()))?;
        Ok(Note::new(self.index, self.address, self.token, amount, blinding))
    }
}

/// Direction of a perpetual position or order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Long,
    Short,
}

impl OrderSide {
    /// Hash encoding: `1` for Long, `0` for Short.
    pub fn flag(self) -> Felt {
        match self {
            OrderSide::Long => Felt::ONE,
            OrderSide::Short => Felt::ZERO,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Long => OrderSide::Short,
            OrderSide::Short => OrderSide::Long,
        }
    }
}

impl FromStr for OrderSide {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Long" | "long" => Ok(OrderSide::Long),
            "Short" | "short" => Ok(OrderSide::Short),
            other => Err(WalletError::InvalidDirection(format!("order side {other:?}"))),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Long => write!(f, "Long"),
            OrderSide::Short => write!(f, "Short"),
        }
    }
}

/// Immutable part of a position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionHeader {
    pub synthetic_token: u32,
    #[serde(with = "felt_dec")]
    pub position_address: Felt,
    pub allow_partial_liquidation: bool,
    #[serde(default)]
    pub vlp_token: u32,
    #[serde(default, with = "u64_dec")]
    pub max_vlp_supply: u64,
}

impl PositionHeader {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            Felt::from(self.allow_partial_liquidation as u64),
            Felt::from(self.synthetic_token),
            self.position_address,
            Felt::from(self.vlp_token),
            Felt::from(self.max_vlp_supply),
        ])
    }
}

/// An open perpetual position owned by its own one-time key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub index: u64,
    pub position_header: PositionHeader,
    pub order_side: OrderSide,
    #[serde(with = "u64_dec")]
    pub position_size: u64,
    #[serde(with = "u64_dec")]
    pub margin: u64,
    #[serde(with = "u64_dec")]
    pub entry_price: u64,
    #[serde(with = "u64_dec")]
    pub liquidation_price: u64,
    #[serde(with = "u64_dec")]
    pub bankruptcy_price: u64,
    #[serde(default)]
    pub last_funding_idx: u32,
    #[serde(default, with = "u64_dec")]
    pub vlp_supply: u64,
    /// Hash as recorded by the settlement service; orders sign over this value.
    #[serde(with = "felt_dec")]
    pub hash: Felt,
}

impl Position {
    pub fn address(&self) -> Felt {
        self.position_header.position_address
    }

    pub fn synthetic_token(&self) -> u32 {
        self.position_header.synthetic_token
    }

    /// Hash of the current position state.
    pub fn compute_hash(&self) -> Felt {
        hash_many(&[
            self.position_header.hash(),
            self.order_side.flag(),
            Felt::from(self.position_size),
            Felt::from(self.entry_price),
            Felt::from(self.liquidation_price),
            Felt::from(self.last_funding_idx),
            Felt::from(self.vlp_supply),
        ])
    }
}

/// Immutable part of an order tab.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabHeader {
    pub base_token: u32,
    pub quote_token: u32,
    #[serde(with = "felt_dec")]
    pub base_blinding: Felt,
    #[serde(with = "felt_dec")]
    pub quote_blinding: Felt,
    #[serde(with = "felt_dec")]
    pub pub_key: Felt,
}

impl TabHeader {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            Felt::from(self.base_token),
            Felt::from(self.quote_token),
            self.pub_key,
        ])
    }
}

/// Standing two-sided liquidity for one spot market.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTab {
    pub tab_idx: u64,
    pub tab_header: TabHeader,
    #[serde(with = "u64_dec")]
    pub base_amount: u64,
    #[serde(with = "u64_dec")]
    pub quote_amount: u64,
    #[serde(with = "felt_dec")]
    pub hash: Felt,
}

impl OrderTab {
    pub fn new(tab_idx: u64, tab_header: TabHeader, base_amount: u64, quote_amount: u64) -> Self {
        let mut tab = Self {
            tab_idx,
            tab_header,
            base_amount,
            quote_amount,
            hash: Felt::ZERO,
        };
        tab.hash = tab.compute_hash();
        tab
    }

    pub fn address(&self) -> Felt {
        self.tab_header.pub_key
    }

    pub fn compute_hash(&self) -> Felt {
        let base_commitment = h2(Felt::from(self.base_amount), self.tab_header.base_blinding);
        let quote_commitment = h2(Felt::from(self.quote_amount), self.tab_header.quote_blinding);
        hash_many(&[self.tab_header.hash(), base_commitment, quote_commitment])
    }
}

/// Blindings `(base, quote)` for a tab at `address`.
pub fn tab_blindings(address: Felt, private_seed: Felt) -> (Felt, Felt) {
    (
        generate_blinding(address, private_seed + Felt::ONE),
        generate_blinding(address, private_seed + Felt::TWO),
    )
}

/// An order tab as published by the state store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOrderTab {
    pub index: u64,
    pub base_token: u32,
    pub quote_token: u32,
    #[serde(with = "felt_dec")]
    pub pub_key: Felt,
    #[serde(with = "u64_dec")]
    pub base_hidden_amount: u64,
    #[serde(with = "felt_dec")]
    pub base_commitment: Felt,
    #[serde(with = "u64_dec")]
    pub quote_hidden_amount: u64,
    #[serde(with = "felt_dec")]
    pub quote_commitment: Felt,
}

impl StoredOrderTab {
    /// Open both sides of the tab with the wallet's private seed.
    pub fn reveal(&self, private_seed: Felt) -> Result<OrderTab> {
        let (base_blinding, quote_blinding) = tab_blindings(self.pub_key, private_seed);
        let invalid = |side: &str| {
            WalletError::InvalidCommitment(format!("{} ({side} side of tab)", self.pub_key))
        };
        let base_amount =
            reveal_with_blinding(base_blinding, self.base_hidden_amount, self.base_commitment)
                .map_err(|_| invalid("base"))?;
        let quote_amount =
            reveal_with_blinding(quote_blinding, self.quote_hidden_amount, self.quote_commitment)
                .map_err(|_| invalid("quote"))?;

        let header = TabHeader {
            base_token: self.base_token,
            quote_token: self.quote_token,
            base_blinding,
            quote_blinding,
            pub_key: self.pub_key,
        };
        Ok(OrderTab::new(self.index, header, base_amount, quote_amount))
    }
}
