//! Note restructuring: consolidate or split notes of one token into a note
//! of an exact amount plus change.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::hash::{hash_many, Felt};
use crate::orders::sign_with_keys;
use crate::session::WalletSession;
use crate::signing::StarkSignature;
use crate::state::{optional_note_hash, Note};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOrder {
    pub notes_in: Vec<Note>,
    pub new_note: Note,
    pub refund_note: Option<Note>,
    pub signature: StarkSignature,
}

impl SplitOrder {
    pub fn hash(&self) -> Felt {
        let mut inputs: Vec<Felt> = self.notes_in.iter().map(Note::hash).collect();
        inputs.push(self.new_note.hash());
        inputs.push(optional_note_hash(self.refund_note.as_ref()));
        hash_many(&inputs)
    }
}

impl WalletSession {
    /// Restructure notes so that one note holds exactly `new_amount`.
    ///
    /// Returns `Ok(None)` when the amount is zero or exceeds the balance, or
    /// when the rearrangement would not reduce fragmentation. The new note
    /// keeps the first input's address and blinding, the change keeps the
    /// last input's.
    pub fn make_split_order(&mut self, token: u32, new_amount: u64) -> Result<Option<SplitOrder>> {
        if new_amount == 0 || new_amount > self.available_amount(token) {
            return Ok(None);
        }
        let dust = self.config().dust(token);
        let Some(spent) = self.ledger.spend_for_split(token, new_amount, dust)? else {
            return Ok(None);
        };

        let (Some(first), Some(last)) = (spent.notes.first(), spent.notes.last()) else {
            return Ok(None);
        };
        let new_note = Note::new(first.index, first.address, token, new_amount, first.blinding);
        // Change includes any excess the no-refund search would have absorbed.
        let change = spent.refund.saturating_add(spent.excess);
        let refund_note = (change > 0)
            .then(|| Note::new(last.index, last.address, token, change, last.blinding));

        let mut order = SplitOrder {
            notes_in: spent.notes.clone(),
            new_note,
            refund_note,
            signature: StarkSignature::default(),
        };
        order.signature = sign_with_keys(&spent.keys, &order.hash())?;

        self.ledger.stage(order.new_note.clone());
        if let Some(refund) = &order.refund_note {
            self.ledger.stage(refund.clone());
        }
        debug!(token, inputs = order.notes_in.len(), "built note split");
        self.mark_built("split");
        Ok(Some(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{public_key, EntityKind};
    use crate::signing::{aggregate_private_keys, verify_stark_signature};
    use crate::testing::{fund, session};

    #[test]
    fn test_consolidates_many_small_notes() {
        let mut session = session();
        fund(&mut session, 55555, &[100_000; 7], 1);

        let order = session
            .make_split_order(55555, 600_000)
            .expect("should build")
            .expect("split expected");
        assert_eq!(order.notes_in.len(), 6);
        assert_eq!(order.new_note.amount, 600_000);
        assert_eq!(order.new_note.address, order.notes_in[0].address);
        assert!(order.refund_note.is_none());
        assert_eq!(session.available_amount(55555), 100_000);
        assert_eq!(session.ledger.staged().len(), 1);

        let keys: Vec<Felt> = order
            .notes_in
            .iter()
            .map(|n| session.ledger.private_key(EntityKind::Note, &n.address).expect("key"))
            .collect();
        let sum = aggregate_private_keys(&keys).expect("sum");
        assert!(verify_stark_signature(&public_key(&sum), &order.hash(), &order.signature)
            .expect("verify"));
    }

    #[test]
    fn test_splits_large_note_with_change_at_last_input() {
        let mut session = session();
        let notes = fund(&mut session, 55555, &[1_000_000], 4);

        let order = session
            .make_split_order(55555, 300_000)
            .expect("should build")
            .expect("split expected");
        let refund = order.refund_note.as_ref().expect("change");
        assert_eq!(refund.amount, 700_000);
        assert_eq!(refund.address, notes[0].address);
        assert_eq!(refund.index, 4);
        assert_eq!(order.new_note.index, 4);
    }

    #[test]
    fn test_split_near_u64_max() {
        let mut session = session();
        fund(&mut session, 55555, &[u64::MAX - 10, 1_000_000], 1);

        let order = session
            .make_split_order(55555, u64::MAX)
            .expect("should build")
            .expect("split expected");
        assert_eq!(order.new_note.amount, u64::MAX);
        assert_eq!(order.refund_note.as_ref().map(|n| n.amount), Some(999_990));
    }

    #[test]
    fn test_no_split_when_not_beneficial() {
        let mut session = session();
        fund(&mut session, 55555, &[100_000, 100_000], 1);

        assert!(session.make_split_order(55555, 200_000).expect("ok").is_none());
        assert!(session.make_split_order(55555, 500_000).expect("ok").is_none());
        assert!(session.make_split_order(55555, 0).expect("ok").is_none());
        assert_eq!(session.available_amount(55555), 200_000);
        assert!(!session.awaiting_order());
    }
}
