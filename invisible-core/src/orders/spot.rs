//! Spot limit orders, funded by notes or by an order tab.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, hash_many, u64_dec, Felt};
use crate::keys::EntityKind;
use crate::orders::sign_with_keys;
use crate::session::{require_positive, WalletSession};
use crate::signing::{sign_hash, StarkSignature};
use crate::state::{optional_note_hash, Note, OrderTab};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpotSide {
    Buy,
    Sell,
}

/// Notes backing a spot order and where its proceeds land.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotNotesInfo {
    #[serde(with = "felt_dec")]
    pub dest_received_address: Felt,
    #[serde(with = "felt_dec")]
    pub dest_received_blinding: Felt,
    pub notes_in: Vec<Note>,
    pub refund_note: Option<Note>,
}

impl SpotNotesInfo {
    pub fn hash(&self) -> Felt {
        let mut inputs: Vec<Felt> = self.notes_in.iter().map(Note::hash).collect();
        inputs.push(optional_note_hash(self.refund_note.as_ref()));
        inputs.push(self.dest_received_address);
        inputs.push(self.dest_received_blinding);
        hash_many(&inputs)
    }
}

/// Parameters of a spot limit order.
#[derive(Clone, Debug)]
pub struct LimitOrderRequest {
    pub expiration_timestamp: u64,
    pub token_spent: u32,
    pub token_received: u32,
    pub amount_spent: u64,
    pub amount_received: u64,
    pub fee_limit: u64,
    pub side: SpotSide,
    /// Trade out of this order tab instead of spending notes.
    pub order_tab: Option<Felt>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub expiration_timestamp: u64,
    pub token_spent: u32,
    pub token_received: u32,
    #[serde(with = "u64_dec")]
    pub amount_spent: u64,
    #[serde(with = "u64_dec")]
    pub amount_received: u64,
    #[serde(with = "u64_dec")]
    pub fee_limit: u64,
    pub spot_note_info: Option<SpotNotesInfo>,
    pub order_tab: Option<OrderTab>,
    pub signature: StarkSignature,
}

impl LimitOrder {
    pub fn hash(&self) -> Felt {
        let backing = match (&self.spot_note_info, &self.order_tab) {
            (Some(info), _) => info.hash(),
            (None, Some(tab)) => tab.tab_header.pub_key,
            (None, None) => Felt::ZERO,
        };
        hash_many(&[
            Felt::from(self.expiration_timestamp),
            Felt::from(self.token_spent),
            Felt::from(self.token_received),
            Felt::from(self.amount_spent),
            Felt::from(self.amount_received),
            Felt::from(self.fee_limit),
            backing,
        ])
    }

    /// Notes consumed by this order, empty for tab orders.
    pub fn notes_in(&self) -> &[Note] {
        self.spot_note_info
            .as_ref()
            .map(|info| info.notes_in.as_slice())
            .unwrap_or(&[])
    }

    pub fn refund_note(&self) -> Option<&Note> {
        self.spot_note_info.as_ref().and_then(|i| i.refund_note.as_ref())
    }
}

impl WalletSession {
    /// Build and sign a spot limit order.
    pub fn make_limit_order(&mut self, request: LimitOrderRequest) -> Result<LimitOrder> {
        require_positive("amount spent", request.amount_spent)?;
        require_positive("amount received", request.amount_received)?;
        if request.token_spent == request.token_received {
            return Err(WalletError::InvalidInput(
                "spent and received tokens must differ".into(),
            ));
        }

        let mut order = LimitOrder {
            expiration_timestamp: request.expiration_timestamp,
            token_spent: request.token_spent,
            token_received: request.token_received,
            amount_spent: request.amount_spent,
            amount_received: request.amount_received,
            fee_limit: request.fee_limit,
            spot_note_info: None,
            order_tab: None,
            signature: StarkSignature::default(),
        };

        if let Some(tab_address) = request.order_tab {
            let base_token = match request.side {
                SpotSide::Buy => request.token_received,
                SpotSide::Sell => request.token_spent,
            };
            let tab = self.ledger.order_tab(&tab_address)?.clone();
            if tab.tab_header.base_token != base_token {
                return Err(WalletError::InvalidPositionOrTab(format!(
                    "order tab {tab_address} does not trade token {base_token}"
                )));
            }
            let tab_key = self.ledger.private_key(EntityKind::OrderTab, &tab_address)?;
            order.order_tab = Some(tab);
            order.signature = sign_hash(&tab_key, &order.hash())?;
        } else {
            let spent = self.spend(request.token_spent, request.amount_spent)?;
            let dest = self.fresh_destination(request.token_received);
            let refund_note = self.refund_note(request.token_spent, &spent);
            order.spot_note_info = Some(SpotNotesInfo {
                dest_received_address: dest.dest_received_address,
                dest_received_blinding: dest.dest_received_blinding,
                notes_in: spent.notes.clone(),
                refund_note,
            });
            order.signature = sign_with_keys(&spent.keys, &order.hash())?;
        }

        self.mark_built("limit order");
        Ok(order)
    }
}
