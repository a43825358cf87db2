//! Adding margin to or removing margin from an open position.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{hash_many, u64_dec, Felt};
use crate::keys::EntityKind;
use crate::orders::{sign_with_keys, CloseOrderFields};
use crate::session::{require_positive, WalletSession};
use crate::signing::{sign_hash, StarkSignature};
use crate::state::{optional_note_hash, Note, Position};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarginDirection {
    Add,
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginChange {
    #[serde(with = "u64_dec")]
    pub margin_change: u64,
    pub direction: MarginDirection,
    pub notes_in: Option<Vec<Note>>,
    pub refund_note: Option<Note>,
    pub close_order_fields: Option<CloseOrderFields>,
    pub position: Position,
    pub signature: StarkSignature,
}

impl MarginChange {
    pub fn hash(&self) -> Felt {
        match self.direction {
            MarginDirection::Add => {
                let mut inputs: Vec<Felt> = self
                    .notes_in
                    .iter()
                    .flatten()
                    .map(Note::hash)
                    .collect();
                inputs.push(optional_note_hash(self.refund_note.as_ref()));
                inputs.push(self.position.hash);
                hash_many(&inputs)
            }
            MarginDirection::Remove => {
                let close_hash = self
                    .close_order_fields
                    .as_ref()
                    .map(CloseOrderFields::hash)
                    .unwrap_or(Felt::ZERO);
                // Removal is encoded as the field negation P - amount.
                let negated = -Felt::from(self.margin_change);
                hash_many(&[negated, close_hash, self.position.hash])
            }
        }
    }
}

impl WalletSession {
    /// Build and sign a margin change on an owned position.
    pub fn make_margin_change(
        &mut self,
        position_address: Felt,
        direction: MarginDirection,
        amount: u64,
    ) -> Result<MarginChange> {
        require_positive("margin change", amount)?;
        let position = self.ledger.position(&position_address)?.clone();
        let position_key = self
            .ledger
            .private_key(EntityKind::Position, &position_address)?;
        let collateral_token = self.config().collateral_token;

        let mut change = MarginChange {
            margin_change: amount,
            direction,
            notes_in: None,
            refund_note: None,
            close_order_fields: None,
            position,
            signature: StarkSignature::default(),
        };

        match direction {
            MarginDirection::Add => {
                let spent = self.spend(collateral_token, amount)?;
                if spent.refund > 0 {
                    // The refund stays at the first input's address.
                    let first = &spent.notes[0];
                    let refund = Note::new(
                        first.index,
                        first.address,
                        collateral_token,
                        spent.refund,
                        first.blinding,
                    );
                    self.ledger.stage(refund.clone());
                    change.refund_note = Some(refund);
                }
                change.notes_in = Some(spent.notes.clone());
                change.signature = sign_with_keys(&spent.keys, &change.hash())?;
            }
            MarginDirection::Remove => {
                if amount >= change.position.margin {
                    return Err(WalletError::InvalidInput(format!(
                        "cannot remove {amount} from a margin of {}",
                        change.position.margin
                    )));
                }
                change.close_order_fields = Some(self.fresh_destination(collateral_token));
                change.signature = sign_hash(&position_key, &change.hash())?;
            }
        }

        self.mark_built("margin change");
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::verify_stark_signature;
    use crate::state::OrderSide;
    use crate::testing::{fund, open_position, session};

    #[test]
    fn test_add_margin_refund_reuses_first_input() {
        let mut session = session();
        let position = open_position(&mut session, 12345, OrderSide::Long);
        let notes = fund(&mut session, 55555, &[1_000_000], 8);

        let change = session
            .make_margin_change(position.address(), MarginDirection::Add, 400_000)
            .expect("should build");
        let refund = change.refund_note.as_ref().expect("refund");
        assert_eq!(refund.amount, 600_000);
        assert_eq!(refund.address, notes[0].address);
        assert_eq!(refund.blinding, notes[0].blinding);
        assert_eq!(refund.index, 8);
    }

    #[test]
    fn test_remove_margin_negates_amount() {
        let mut session = session();
        let position = open_position(&mut session, 12345, OrderSide::Long);

        let change = session
            .make_margin_change(position.address(), MarginDirection::Remove, 1_000)
            .expect("should build");
        let close = change.close_order_fields.as_ref().expect("close fields");
        let expected = hash_many(&[
            Felt::ZERO - Felt::from(1_000u64),
            close.hash(),
            position.hash,
        ]);
        assert_eq!(change.hash(), expected);
        assert!(
            verify_stark_signature(&position.address(), &change.hash(), &change.signature)
                .expect("verify")
        );
    }

    #[test]
    fn test_margin_change_on_unknown_position() {
        let mut session = session();
        let result = session.make_margin_change(Felt::from(77u64), MarginDirection::Add, 5);
        assert!(matches!(result, Err(WalletError::InvalidPositionOrTab(_))));
    }

    #[test]
    fn test_remove_more_than_margin_rejected() {
        let mut session = session();
        let position = open_position(&mut session, 12345, OrderSide::Long);
        let result = session.make_margin_change(
            position.address(),
            MarginDirection::Remove,
            position.margin,
        );
        assert!(matches!(result, Err(WalletError::InvalidInput(_))));
        assert!(!session.awaiting_order());
    }
}
