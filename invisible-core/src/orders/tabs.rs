//! Order tab lifecycle: open, close, and add or remove liquidity.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{hash_many, u64_dec, Felt};
use crate::keys::EntityKind;
use crate::ledger::SpentNotes;
use crate::orders::{sign_with_keys, CloseOrderFields};
use crate::session::{require_positive, WalletSession};
use crate::signing::{sign_hash, StarkSignature};
use crate::state::{optional_note_hash, tab_blindings, Note, OrderTab, TabHeader};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrderTab {
    pub base_notes_in: Vec<Note>,
    pub base_refund_note: Option<Note>,
    pub quote_notes_in: Vec<Note>,
    pub quote_refund_note: Option<Note>,
    pub order_tab: OrderTab,
    pub add_only: bool,
    pub signature: StarkSignature,
    pub market_id: u32,
}

impl OpenOrderTab {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            Felt::ZERO,
            self.order_tab.hash,
            optional_note_hash(self.base_refund_note.as_ref()),
            optional_note_hash(self.quote_refund_note.as_ref()),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOrderTab {
    pub order_tab: OrderTab,
    pub base_close_order_fields: CloseOrderFields,
    pub quote_close_order_fields: CloseOrderFields,
    #[serde(with = "u64_dec")]
    pub base_amount_change: u64,
    #[serde(with = "u64_dec")]
    pub quote_amount_change: u64,
    pub signature: StarkSignature,
}

impl CloseOrderTab {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            self.order_tab.hash,
            Felt::from(self.base_amount_change),
            Felt::from(self.quote_amount_change),
            self.base_close_order_fields.hash(),
            self.quote_close_order_fields.hash(),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyOrderTab {
    pub is_add: bool,
    pub order_tab: OrderTab,
    #[serde(with = "u64_dec")]
    pub base_amount: u64,
    #[serde(with = "u64_dec")]
    pub quote_amount: u64,
    pub base_notes_in: Vec<Note>,
    pub quote_notes_in: Vec<Note>,
    pub base_refund_note: Option<Note>,
    pub quote_refund_note: Option<Note>,
    pub base_close_order_fields: Option<CloseOrderFields>,
    pub quote_close_order_fields: Option<CloseOrderFields>,
    pub market_id: u32,
    pub signature: StarkSignature,
}

impl ModifyOrderTab {
    pub fn hash(&self) -> Felt {
        let (flag, base_out, quote_out) = if self.is_add {
            (
                Felt::ONE,
                optional_note_hash(self.base_refund_note.as_ref()),
                optional_note_hash(self.quote_refund_note.as_ref()),
            )
        } else {
            let close_hash = |f: &Option<CloseOrderFields>| {
                f.as_ref().map(CloseOrderFields::hash).unwrap_or(Felt::ZERO)
            };
            (
                Felt::ZERO,
                close_hash(&self.base_close_order_fields),
                close_hash(&self.quote_close_order_fields),
            )
        };
        hash_many(&[
            flag,
            self.order_tab.hash,
            Felt::from(self.base_amount),
            Felt::from(self.quote_amount),
            base_out,
            quote_out,
        ])
    }
}

/// Inputs and refunds for both sides of a tab.
struct FundedSides {
    base: Option<SpentNotes>,
    quote: Option<SpentNotes>,
    base_refund: Option<Note>,
    quote_refund: Option<Note>,
}

impl FundedSides {
    fn keys(&self) -> Vec<Felt> {
        self.base
            .iter()
            .chain(self.quote.iter())
            .flat_map(|s| s.keys.iter().copied())
            .collect()
    }

    fn notes(side: &Option<SpentNotes>) -> Vec<Note> {
        side.as_ref().map(|s| s.notes.clone()).unwrap_or_default()
    }
}

impl WalletSession {
    /// Spend both sides, skipping zero amounts. A failure on the quote side
    /// puts the base notes back.
    fn fund_tab_sides(
        &mut self,
        (base_token, base_amount): (u32, u64),
        (quote_token, quote_amount): (u32, u64),
    ) -> Result<FundedSides> {
        let base = match base_amount {
            0 => None,
            amount => Some(self.spend(base_token, amount)?),
        };
        let quote = match quote_amount {
            0 => None,
            amount => match self.spend(quote_token, amount) {
                Ok(spent) => Some(spent),
                Err(err) => {
                    for note in base.iter().flat_map(|s| s.notes.iter()) {
                        self.ledger.upsert_note(note.clone());
                    }
                    return Err(err);
                }
            },
        };

        let base_refund = match &base {
            Some(spent) => self.refund_note(base_token, spent),
            None => None,
        };
        let quote_refund = match &quote {
            Some(spent) => self.refund_note(quote_token, spent),
            None => None,
        };
        Ok(FundedSides {
            base,
            quote,
            base_refund,
            quote_refund,
        })
    }

    fn owned_tab(&self, tab_address: &Felt) -> Result<(OrderTab, Felt)> {
        let tab = self.ledger.order_tab(tab_address)?.clone();
        let key = self.ledger.private_key(EntityKind::OrderTab, tab_address)?;
        Ok((tab, key))
    }

    /// Open a new order tab for a spot market.
    pub fn make_open_order_tab(
        &mut self,
        base_amount: u64,
        quote_amount: u64,
        market_id: u32,
    ) -> Result<OpenOrderTab> {
        require_positive("base amount", base_amount)?;
        require_positive("quote amount", quote_amount)?;
        let (base_token, quote_token) = self.spot_market_tokens(market_id)?;

        let sides =
            self.fund_tab_sides((base_token, base_amount), (quote_token, quote_amount))?;

        let tab_key = self.keys_mut().next_order_tab_key(base_token);
        self.ledger
            .insert_key(EntityKind::OrderTab, tab_key.address, tab_key.private_key);
        let (base_blinding, quote_blinding) = tab_blindings(tab_key.address, self.private_seed());
        let header = TabHeader {
            base_token,
            quote_token,
            base_blinding,
            quote_blinding,
            pub_key: tab_key.address,
        };

        let mut message = OpenOrderTab {
            base_notes_in: FundedSides::notes(&sides.base),
            base_refund_note: sides.base_refund.clone(),
            quote_notes_in: FundedSides::notes(&sides.quote),
            quote_refund_note: sides.quote_refund.clone(),
            order_tab: OrderTab::new(0, header, base_amount, quote_amount),
            add_only: false,
            signature: StarkSignature::default(),
            market_id,
        };
        message.signature = sign_with_keys(&sides.keys(), &message.hash())?;

        self.mark_built("open order tab");
        Ok(message)
    }

    /// Close an order tab, paying both sides out to fresh notes.
    pub fn make_close_order_tab(&mut self, tab_address: Felt) -> Result<CloseOrderTab> {
        let (tab, tab_key) = self.owned_tab(&tab_address)?;
        let base = self.fresh_destination(tab.tab_header.base_token);
        let quote = self.fresh_destination(tab.tab_header.quote_token);

        let mut message = CloseOrderTab {
            base_amount_change: tab.base_amount,
            quote_amount_change: tab.quote_amount,
            order_tab: tab,
            base_close_order_fields: base,
            quote_close_order_fields: quote,
            signature: StarkSignature::default(),
        };
        message.signature = sign_hash(&tab_key, &message.hash())?;

        self.mark_built("close order tab");
        Ok(message)
    }

    /// Add liquidity to or remove liquidity from an order tab.
    pub fn make_modify_order_tab(
        &mut self,
        tab_address: Felt,
        market_id: u32,
        base_amount: u64,
        quote_amount: u64,
        is_add: bool,
    ) -> Result<ModifyOrderTab> {
        if base_amount == 0 && quote_amount == 0 {
            return Err(WalletError::InvalidInput(
                "modify order tab needs a non-zero amount".into(),
            ));
        }
        let (base_token, quote_token) = self.spot_market_tokens(market_id)?;
        let (tab, tab_key) = self.owned_tab(&tab_address)?;
        if tab.tab_header.base_token != base_token || tab.tab_header.quote_token != quote_token {
            return Err(WalletError::InvalidPositionOrTab(format!(
                "order tab {tab_address} does not belong to market {market_id}"
            )));
        }

        let mut message = ModifyOrderTab {
            is_add,
            order_tab: tab,
            base_amount,
            quote_amount,
            base_notes_in: Vec::new(),
            quote_notes_in: Vec::new(),
            base_refund_note: None,
            quote_refund_note: None,
            base_close_order_fields: None,
            quote_close_order_fields: None,
            market_id,
            signature: StarkSignature::default(),
        };

        if is_add {
            let sides =
                self.fund_tab_sides((base_token, base_amount), (quote_token, quote_amount))?;
            message.base_notes_in = FundedSides::notes(&sides.base);
            message.quote_notes_in = FundedSides::notes(&sides.quote);
            message.base_refund_note = sides.base_refund.clone();
            message.quote_refund_note = sides.quote_refund.clone();
            message.signature = sign_with_keys(&sides.keys(), &message.hash())?;
        } else {
            if base_amount > message.order_tab.base_amount
                || quote_amount > message.order_tab.quote_amount
            {
                return Err(WalletError::InvalidInput(format!(
                    "order tab {tab_address} holds less than the requested removal"
                )));
            }
            message.base_close_order_fields = Some(self.fresh_destination(base_token));
            message.quote_close_order_fields = Some(self.fresh_destination(quote_token));
            message.signature = sign_hash(&tab_key, &message.hash())?;
        }

        self.mark_built("modify order tab");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::public_key;
    use crate::signing::{aggregate_private_keys, verify_stark_signature};
    use crate::testing::{fund, session};

    fn open_tab(session: &mut WalletSession) -> OpenOrderTab {
        fund(session, 12345, &[100_000], 1);
        fund(session, 55555, &[2_000_000], 2);
        session
            .make_open_order_tab(40_000, 1_000_000, 11)
            .expect("should open")
    }

    #[test]
    fn test_open_tab_signs_with_both_sides() {
        let mut session = session();
        let message = open_tab(&mut session);
        assert_eq!(message.base_refund_note.as_ref().map(|n| n.amount), Some(60_000));
        assert_eq!(message.quote_refund_note.as_ref().map(|n| n.amount), Some(1_000_000));
        assert_eq!(message.order_tab.hash, message.order_tab.compute_hash());

        let keys: Vec<Felt> = message
            .base_notes_in
            .iter()
            .chain(message.quote_notes_in.iter())
            .map(|n| session.ledger.private_key(EntityKind::Note, &n.address).expect("key"))
            .collect();
        let signer = public_key(&aggregate_private_keys(&keys).expect("sum"));
        assert!(verify_stark_signature(&signer, &message.hash(), &message.signature)
            .expect("verify"));
    }

    #[test]
    fn test_open_tab_rolls_back_base_on_quote_failure() {
        let mut session = session();
        fund(&mut session, 12345, &[100_000], 1);
        let result = session.make_open_order_tab(40_000, 1_000_000, 11);
        assert!(matches!(result, Err(WalletError::InsufficientFunds { token: 55555, .. })));
        assert_eq!(session.available_amount(12345), 100_000);
    }

    #[test]
    fn test_close_tab_pays_out_everything() {
        let mut session = session();
        let opened = open_tab(&mut session);
        session.ledger.add_order_tab(opened.order_tab.clone());
        let address = opened.order_tab.address();

        let close = session.make_close_order_tab(address).expect("should close");
        assert_eq!(close.base_amount_change, 40_000);
        assert_eq!(close.quote_amount_change, 1_000_000);
        assert!(verify_stark_signature(&address, &close.hash(), &close.signature).expect("verify"));
    }

    #[test]
    fn test_modify_tab_add_and_remove() {
        let mut session = session();
        let opened = open_tab(&mut session);
        session.ledger.add_order_tab(opened.order_tab.clone());
        let address = opened.order_tab.address();
        session.commit_staged();

        let add = session
            .make_modify_order_tab(address, 11, 10_000, 0, true)
            .expect("should add");
        assert!(add.quote_notes_in.is_empty());
        assert_eq!(add.base_notes_in.len(), 1);
        assert!(add.base_refund_note.is_some());

        let remove = session
            .make_modify_order_tab(address, 11, 40_000, 500_000, false)
            .expect("should remove");
        assert!(remove.base_close_order_fields.is_some());
        assert!(verify_stark_signature(&address, &remove.hash(), &remove.signature)
            .expect("verify"));
        assert_ne!(add.hash(), remove.hash());

        let too_much = session.make_modify_order_tab(address, 11, 40_001, 0, false);
        assert!(matches!(too_much, Err(WalletError::InvalidInput(_))));

        let wrong_market = session.make_modify_order_tab(address, 12, 1, 0, true);
        assert!(matches!(wrong_market, Err(WalletError::InvalidPositionOrTab(_))));
    }
}
