//! Market-maker actions on a position that backs a vault liquidity pool.
//!
//! All four messages are signed with the private key of the position they
//! act on.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, hash_many, u64_dec, Felt};
use crate::keys::EntityKind;
use crate::session::{require_positive, WalletSession};
use crate::signing::{sign_hash, StarkSignature};
use crate::state::Position;

/// Turn a position into a market-maker position issuing `vlp_token`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMm {
    pub position: Position,
    pub vlp_token: u32,
    #[serde(with = "u64_dec")]
    pub max_vlp_supply: u64,
    pub market_id: u32,
    pub synthetic_token: u32,
    pub signature: StarkSignature,
}

impl RegisterMm {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            self.position.hash,
            Felt::from(self.vlp_token),
            Felt::from(self.max_vlp_supply),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidity {
    pub position: Position,
    #[serde(with = "felt_dec")]
    pub depositor: Felt,
    #[serde(with = "u64_dec")]
    pub initial_value: u64,
    pub market_id: u32,
    pub synthetic_token: u32,
    pub signature: StarkSignature,
}

impl AddLiquidity {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            self.position.hash,
            self.depositor,
            Felt::from(self.initial_value),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidity {
    pub position: Position,
    #[serde(with = "felt_dec")]
    pub depositor: Felt,
    #[serde(with = "u64_dec")]
    pub initial_value: u64,
    #[serde(with = "u64_dec")]
    pub vlp_amount: u64,
    pub market_id: u32,
    pub synthetic_token: u32,
    pub signature: StarkSignature,
}

impl RemoveLiquidity {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            self.position.hash,
            self.depositor,
            Felt::from(self.initial_value),
            Felt::from(self.vlp_amount),
        ])
    }
}

/// Wind down a market-maker position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseMm {
    pub position: Position,
    #[serde(with = "u64_dec")]
    pub initial_value_sum: u64,
    #[serde(with = "u64_dec")]
    pub vlp_amount_sum: u64,
    pub market_id: u32,
    pub synthetic_token: u32,
    pub signature: StarkSignature,
}

impl CloseMm {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            self.position.hash,
            Felt::from(self.initial_value_sum),
            Felt::from(self.vlp_amount_sum),
        ])
    }
}

/// Position, its key and its perpetual market id.
struct MmContext {
    position: Position,
    key: Felt,
    market_id: u32,
}

impl MmContext {
    fn sign(&self, message_hash: &Felt) -> Result<StarkSignature> {
        sign_hash(&self.key, message_hash)
    }
}

impl WalletSession {
    fn mm_context(&self, position_address: &Felt) -> Result<MmContext> {
        let position = self.ledger.position(position_address)?.clone();
        let key = self
            .ledger
            .private_key(EntityKind::Position, position_address)?;
        let synthetic_token = position.synthetic_token();
        let market_id = self.config().perp_market_id(synthetic_token).ok_or_else(|| {
            WalletError::InvalidInput(format!("no perpetual market for token {synthetic_token}"))
        })?;
        Ok(MmContext {
            position,
            key,
            market_id,
        })
    }

    pub fn make_register_mm(
        &mut self,
        position_address: Felt,
        vlp_token: u32,
        max_vlp_supply: u64,
    ) -> Result<RegisterMm> {
        if vlp_token == 0 {
            return Err(WalletError::InvalidInput("vlp token must be set".into()));
        }
        require_positive("max vlp supply", max_vlp_supply)?;
        let ctx = self.mm_context(&position_address)?;

        let mut message = RegisterMm {
            synthetic_token: ctx.position.synthetic_token(),
            position: ctx.position.clone(),
            vlp_token,
            max_vlp_supply,
            market_id: ctx.market_id,
            signature: StarkSignature::default(),
        };
        message.signature = ctx.sign(&message.hash())?;
        self.mark_built("register market maker");
        Ok(message)
    }

    pub fn make_add_liquidity(
        &mut self,
        position_address: Felt,
        depositor: Felt,
        initial_value: u64,
    ) -> Result<AddLiquidity> {
        require_positive("initial value", initial_value)?;
        let ctx = self.mm_context(&position_address)?;

        let mut message = AddLiquidity {
            synthetic_token: ctx.position.synthetic_token(),
            position: ctx.position.clone(),
            depositor,
            initial_value,
            market_id: ctx.market_id,
            signature: StarkSignature::default(),
        };
        message.signature = ctx.sign(&message.hash())?;
        self.mark_built("add liquidity");
        Ok(message)
    }

    pub fn make_remove_liquidity(
        &mut self,
        position_address: Felt,
        depositor: Felt,
        initial_value: u64,
        vlp_amount: u64,
    ) -> Result<RemoveLiquidity> {
        require_positive("vlp amount", vlp_amount)?;
        let ctx = self.mm_context(&position_address)?;

        let mut message = RemoveLiquidity {
            synthetic_token: ctx.position.synthetic_token(),
            position: ctx.position.clone(),
            depositor,
            initial_value,
            vlp_amount,
            market_id: ctx.market_id,
            signature: StarkSignature::default(),
        };
        message.signature = ctx.sign(&message.hash())?;
        self.mark_built("remove liquidity");
        Ok(message)
    }

    pub fn make_close_mm(
        &mut self,
        position_address: Felt,
        initial_value_sum: u64,
        vlp_amount_sum: u64,
    ) -> Result<CloseMm> {
        let ctx = self.mm_context(&position_address)?;

        let mut message = CloseMm {
            synthetic_token: ctx.position.synthetic_token(),
            position: ctx.position.clone(),
            initial_value_sum,
            vlp_amount_sum,
            market_id: ctx.market_id,
            signature: StarkSignature::default(),
        };
        message.signature = ctx.sign(&message.hash())?;
        self.mark_built("close market maker");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::verify_stark_signature;
    use crate::state::OrderSide;
    use crate::testing::{open_position, session};

    #[test]
    fn test_register_signs_with_position_key() {
        let mut session = session();
        let position = open_position(&mut session, 12345, OrderSide::Long);
        let message = session
            .make_register_mm(position.address(), 88888, 1_000_000)
            .expect("should register");
        assert_eq!(message.market_id, 21);
        assert_eq!(
            message.hash(),
            hash_many(&[position.hash, Felt::from(88888u64), Felt::from(1_000_000u64)])
        );
        assert!(verify_stark_signature(&position.address(), &message.hash(), &message.signature)
            .expect("verify"));
        assert!(session.awaiting_order());
    }

    #[test]
    fn test_liquidity_actions_hash_their_fields() {
        let mut session = session();
        let position = open_position(&mut session, 54321, OrderSide::Short);
        let depositor = Felt::from(4242u64);

        let add = session
            .make_add_liquidity(position.address(), depositor, 10_000)
            .expect("add");
        let remove = session
            .make_remove_liquidity(position.address(), depositor, 10_000, 9_000)
            .expect("remove");
        let close = session
            .make_close_mm(position.address(), 10_000, 9_000)
            .expect("close");

        assert_eq!(add.market_id, 22);
        assert_ne!(add.hash(), remove.hash());
        assert_eq!(
            close.hash(),
            hash_many(&[position.hash, Felt::from(10_000u64), Felt::from(9_000u64)])
        );
        for (hash, signature) in [
            (add.hash(), &add.signature),
            (remove.hash(), &remove.signature),
            (close.hash(), &close.signature),
        ] {
            assert!(verify_stark_signature(&position.address(), &hash, signature).expect("verify"));
        }
    }

    #[test]
    fn test_mm_actions_reject_bad_input() {
        let mut session = session();
        let position = open_position(&mut session, 12345, OrderSide::Long);
        assert!(matches!(
            session.make_register_mm(position.address(), 0, 10),
            Err(WalletError::InvalidInput(_))
        ));
        assert!(matches!(
            session.make_add_liquidity(Felt::from(5u64), Felt::ONE, 10),
            Err(WalletError::InvalidPositionOrTab(_))
        ));
        assert!(!session.awaiting_order());
    }
}
