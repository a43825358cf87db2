//! Transaction builders.
//!
//! Each builder validates its arguments, selects inputs, derives output
//! addresses, hashes the message fields in their canonical order, signs, and
//! returns a message ready for the settlement service. Builders are methods
//! on [`WalletSession`](crate::session::WalletSession).

pub mod margin;
pub mod mm;
pub mod onchain;
pub mod perp;
pub mod spot;
pub mod split;
pub mod tabs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, hash_many, Felt};
use crate::signing::{aggregate_private_keys, sign_hash, StarkSignature};

pub use margin::{MarginChange, MarginDirection};
pub use mm::{AddLiquidity, CloseMm, RegisterMm, RemoveLiquidity};
pub use onchain::{Deposit, Withdrawal, WithdrawalRequest};
pub use perp::{
    LiquidationOrder, LiquidationRequest, OpenOrderFields, PerpOrder, PerpOrderRequest,
    PositionEffectType,
};
pub use spot::{LimitOrder, LimitOrderRequest, SpotNotesInfo, SpotSide};
pub use split::SplitOrder;
pub use tabs::{CloseOrderTab, ModifyOrderTab, OpenOrderTab};

/// Where the proceeds of a closing leg are paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOrderFields {
    #[serde(with = "felt_dec")]
    pub dest_received_address: Felt,
    #[serde(with = "felt_dec")]
    pub dest_received_blinding: Felt,
}

impl CloseOrderFields {
    pub fn hash(&self) -> Felt {
        hash_many(&[self.dest_received_address, self.dest_received_blinding])
    }
}

/// Sign with the sum of several note keys.
pub(crate) fn sign_with_keys(keys: &[Felt], message_hash: &Felt) -> Result<StarkSignature> {
    let key = aggregate_private_keys(keys)?;
    sign_hash(&key, message_hash)
}

/// Parse a wire tag into a closed enum, mapping failures to `InvalidDirection`.
pub(crate) fn parse_tag<T>(value: &str, what: &str, variants: &[(&str, T)]) -> Result<T>
where
    T: Copy,
{
    variants
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, v)| *v)
        .ok_or_else(|| WalletError::InvalidDirection(format!("{what} {value:?}")))
}

impl FromStr for SpotSide {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        parse_tag(s, "spot side", &[("Buy", SpotSide::Buy), ("Sell", SpotSide::Sell)])
    }
}

impl FromStr for PositionEffectType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        parse_tag(
            s,
            "position effect",
            &[
                ("Open", PositionEffectType::Open),
                ("Modify", PositionEffectType::Modify),
                ("Close", PositionEffectType::Close),
            ],
        )
    }
}

impl FromStr for MarginDirection {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        parse_tag(
            s,
            "margin direction",
            &[("Add", MarginDirection::Add), ("Remove", MarginDirection::Remove)],
        )
    }
}

impl fmt::Display for PositionEffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionEffectType::Open => write!(f, "Open"),
            PositionEffectType::Modify => write!(f, "Modify"),
            PositionEffectType::Close => write!(f, "Close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_parse_at_boundary() {
        assert_eq!("buy".parse::<SpotSide>().expect("parse"), SpotSide::Buy);
        assert_eq!(
            "Close".parse::<PositionEffectType>().expect("parse"),
            PositionEffectType::Close
        );
        assert_eq!("Remove".parse::<MarginDirection>().expect("parse"), MarginDirection::Remove);
        assert!(matches!("Up".parse::<MarginDirection>(), Err(WalletError::InvalidDirection(_))));
        assert!(matches!(
            "Liquidate".parse::<PositionEffectType>(),
            Err(WalletError::InvalidDirection(_))
        ));
    }

    #[test]
    fn test_close_fields_hash() {
        let fields = CloseOrderFields {
            dest_received_address: Felt::from(1u64),
            dest_received_blinding: Felt::from(2u64),
        };
        assert_eq!(fields.hash(), hash_many(&[Felt::from(1u64), Felt::from(2u64)]));
    }
}
