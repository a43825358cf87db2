//! Deposits into and withdrawals out of the exchange.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, hash_many, u64_dec, Felt};
use crate::orders::sign_with_keys;
use crate::session::{require_positive, WalletSession};
use crate::signing::{sign_hash, StarkSignature};
use crate::state::Note;

/// Chain id carried in the high 32 bits of a deposit id.
pub fn deposit_chain_id(deposit_id: u64) -> u64 {
    deposit_id >> 32
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    #[serde(with = "u64_dec")]
    pub deposit_id: u64,
    pub deposit_token: u32,
    #[serde(with = "u64_dec")]
    pub deposit_amount: u64,
    #[serde(with = "felt_dec")]
    pub stark_key: Felt,
    pub notes: Vec<Note>,
    pub signature: StarkSignature,
}

impl Deposit {
    pub fn hash(&self) -> Felt {
        let mut inputs = vec![Felt::from(self.deposit_id)];
        inputs.extend(self.notes.iter().map(Note::hash));
        hash_many(&inputs)
    }
}

#[derive(Clone, Debug)]
pub struct WithdrawalRequest {
    pub chain_id: u64,
    pub token: u32,
    pub amount: u64,
    pub recipient: Felt,
    pub max_gas_fee: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_chain_id: u64,
    pub withdrawal_token: u32,
    #[serde(with = "u64_dec")]
    pub withdrawal_amount: u64,
    #[serde(with = "felt_dec")]
    pub recipient: Felt,
    #[serde(with = "u64_dec")]
    pub max_gas_fee: u64,
    pub notes_in: Vec<Note>,
    /// Always present; an empty refund hashes to zero.
    pub refund_note: Note,
    pub signature: StarkSignature,
}

impl Withdrawal {
    pub fn hash(&self) -> Felt {
        let mut inputs: Vec<Felt> = self.notes_in.iter().map(Note::hash).collect();
        inputs.push(self.refund_note.hash());
        inputs.push(self.recipient);
        inputs.push(Felt::from(self.withdrawal_chain_id));
        inputs.push(Felt::from(self.max_gas_fee));
        hash_many(&inputs)
    }
}

impl WalletSession {
    fn require_known_chain(&self, chain_id: u64) -> Result<()> {
        if !self.config().is_known_chain(chain_id) {
            return Err(WalletError::UnknownChainId(chain_id));
        }
        Ok(())
    }

    /// Build and sign the claim for an on-chain deposit.
    ///
    /// `stark_key` must be the wallet's deposit key for `token`.
    pub fn make_deposit_order(
        &mut self,
        deposit_id: u64,
        token: u32,
        amount: u64,
        stark_key: Felt,
    ) -> Result<Deposit> {
        require_positive("deposit amount", amount)?;
        self.require_known_chain(deposit_chain_id(deposit_id))?;

        let deposit_key = self.keys().deposit_key(token);
        if deposit_key.address != stark_key {
            return Err(WalletError::InvalidAddress(format!(
                "stark key {stark_key} is not this wallet's deposit key for token {token}"
            )));
        }

        let note = self.fresh_note(token, amount, 0);
        let mut deposit = Deposit {
            deposit_id,
            deposit_token: token,
            deposit_amount: amount,
            stark_key,
            notes: vec![note],
            signature: StarkSignature::default(),
        };
        deposit.signature = sign_hash(&deposit_key.private_key, &deposit.hash())?;

        self.mark_built("deposit");
        Ok(deposit)
    }

    /// Build and sign a withdrawal to an on-chain recipient.
    pub fn make_withdrawal_order(&mut self, request: WithdrawalRequest) -> Result<Withdrawal> {
        require_positive("withdrawal amount", request.amount)?;
        self.require_known_chain(request.chain_id)?;

        let spent = self.spend(request.token, request.amount)?;
        let index = spent.notes.first().map(|n| n.index).unwrap_or_default();
        let refund_note = self.fresh_note(request.token, spent.refund, index);

        let mut withdrawal = Withdrawal {
            withdrawal_chain_id: request.chain_id,
            withdrawal_token: request.token,
            withdrawal_amount: request.amount,
            recipient: request.recipient,
            max_gas_fee: request.max_gas_fee,
            notes_in: spent.notes.clone(),
            refund_note,
            signature: StarkSignature::default(),
        };
        withdrawal.signature = sign_with_keys(&spent.keys, &withdrawal.hash())?;

        self.mark_built("withdrawal");
        Ok(withdrawal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::known_chains;
    use crate::signing::verify_stark_signature;
    use crate::testing::{fund, session};

    fn deposit_id(chain: u64, nonce: u64) -> u64 {
        (chain << 32) | nonce
    }

    #[test]
    fn test_deposit_signed_by_deposit_key() {
        let mut session = session();
        let stark_key = session.keys().deposit_key(55555).address;
        let id = deposit_id(known_chains::STARKNET, 17);

        let deposit = session
            .make_deposit_order(id, 55555, 5_000_000, stark_key)
            .expect("should build");
        assert_eq!(deposit.notes.len(), 1);
        assert_eq!(deposit.notes[0].amount, 5_000_000);
        assert!(verify_stark_signature(&stark_key, &deposit.hash(), &deposit.signature)
            .expect("verify"));
        assert_eq!(session.ledger.staged().len(), 1);
    }

    #[test]
    fn test_deposit_rejects_unknown_chain() {
        let mut session = session();
        let stark_key = session.keys().deposit_key(55555).address;
        let result = session.make_deposit_order(deposit_id(1, 1), 55555, 10, stark_key);
        assert!(matches!(result, Err(WalletError::UnknownChainId(1))));
        assert!(session.ledger.staged().is_empty());
    }

    #[test]
    fn test_deposit_rejects_foreign_stark_key() {
        let mut session = session();
        let id = deposit_id(known_chains::ETH_MAINNET, 1);
        let result = session.make_deposit_order(id, 55555, 10, Felt::from(3u64));
        assert!(matches!(result, Err(WalletError::InvalidAddress(_))));
    }

    #[test]
    fn test_withdrawal_always_carries_refund() {
        let mut session = session();
        fund(&mut session, 12345, &[10_000, 20_000], 5);

        let withdrawal = session
            .make_withdrawal_order(WithdrawalRequest {
                chain_id: known_chains::ZKSYNC,
                token: 12345,
                amount: 30_000,
                recipient: Felt::from(0xfeedu64),
                max_gas_fee: 100,
            })
            .expect("should build");
        assert_eq!(withdrawal.notes_in.len(), 2);
        assert_eq!(withdrawal.refund_note.amount, 0);
        assert_eq!(withdrawal.refund_note.hash(), Felt::ZERO);
        assert_eq!(session.available_amount(12345), 0);
    }

    #[test]
    fn test_withdrawal_unknown_chain_leaves_notes() {
        let mut session = session();
        fund(&mut session, 12345, &[10_000], 1);
        let result = session.make_withdrawal_order(WithdrawalRequest {
            chain_id: 42,
            token: 12345,
            amount: 5_000,
            recipient: Felt::ONE,
            max_gas_fee: 0,
        });
        assert!(matches!(result, Err(WalletError::UnknownChainId(42))));
        assert_eq!(session.available_amount(12345), 10_000);
    }
}
