//! Perpetual orders and liquidation orders.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::hash::{felt_dec, hash_many, u64_dec, Felt};
use crate::keys::EntityKind;
use crate::orders::{sign_with_keys, CloseOrderFields};
use crate::session::{require_positive, WalletSession};
use crate::signing::{sign_hash, StarkSignature};
use crate::state::{optional_note_hash, Note, OrderSide, Position};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionEffectType {
    Open,
    Modify,
    Close,
}

impl PositionEffectType {
    pub fn flag(self) -> Felt {
        match self {
            PositionEffectType::Open => Felt::ZERO,
            PositionEffectType::Modify => Felt::ONE,
            PositionEffectType::Close => Felt::TWO,
        }
    }
}

/// Collateral and destination for a new position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrderFields {
    #[serde(with = "u64_dec")]
    pub initial_margin: u64,
    pub collateral_token: u32,
    pub notes_in: Vec<Note>,
    pub refund_note: Option<Note>,
    #[serde(with = "felt_dec")]
    pub position_address: Felt,
    pub allow_partial_liquidation: bool,
}

impl OpenOrderFields {
    pub fn hash(&self) -> Felt {
        let mut inputs: Vec<Felt> = self.notes_in.iter().map(Note::hash).collect();
        inputs.push(optional_note_hash(self.refund_note.as_ref()));
        inputs.push(Felt::from(self.initial_margin));
        inputs.push(Felt::from(self.collateral_token));
        inputs.push(self.position_address);
        inputs.push(Felt::from(self.allow_partial_liquidation as u64));
        hash_many(&inputs)
    }
}

/// Parameters of a perpetual order.
#[derive(Clone, Debug)]
pub struct PerpOrderRequest {
    pub expiration_timestamp: u64,
    pub position_effect_type: PositionEffectType,
    /// Position to modify or close; ignored when opening.
    pub position_address: Option<Felt>,
    pub order_side: OrderSide,
    pub synthetic_token: u32,
    pub synthetic_amount: u64,
    pub collateral_amount: u64,
    pub fee_limit: u64,
    /// Margin posted when opening.
    pub initial_margin: u64,
    pub allow_partial_liquidation: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpOrder {
    pub expiration_timestamp: u64,
    pub position: Option<Position>,
    pub position_effect_type: PositionEffectType,
    pub order_side: OrderSide,
    pub synthetic_token: u32,
    #[serde(with = "u64_dec")]
    pub synthetic_amount: u64,
    #[serde(with = "u64_dec")]
    pub collateral_amount: u64,
    #[serde(with = "u64_dec")]
    pub fee_limit: u64,
    pub open_order_fields: Option<OpenOrderFields>,
    pub close_order_fields: Option<CloseOrderFields>,
    pub signature: StarkSignature,
}

impl PerpOrder {
    pub fn hash(&self) -> Felt {
        let position_address = self
            .position
            .as_ref()
            .map(Position::address)
            .unwrap_or(Felt::ZERO);
        let fields_hash = match (&self.open_order_fields, &self.close_order_fields) {
            (Some(open), _) => open.hash(),
            (None, Some(close)) => close.hash(),
            (None, None) => Felt::ZERO,
        };
        hash_many(&[
            Felt::from(self.expiration_timestamp),
            position_address,
            self.position_effect_type.flag(),
            self.order_side.flag(),
            Felt::from(self.synthetic_token),
            Felt::from(self.synthetic_amount),
            Felt::from(self.collateral_amount),
            Felt::from(self.fee_limit),
            fields_hash,
        ])
    }

    pub fn notes_in(&self) -> &[Note] {
        self.open_order_fields
            .as_ref()
            .map(|f| f.notes_in.as_slice())
            .unwrap_or(&[])
    }

    pub fn refund_note(&self) -> Option<&Note> {
        self.open_order_fields
            .as_ref()
            .and_then(|f| f.refund_note.as_ref())
    }
}

/// Parameters of a liquidation order against someone else's position.
#[derive(Clone, Debug)]
pub struct LiquidationRequest {
    pub liquidated_position: Position,
    pub synthetic_amount: u64,
    pub collateral_amount: u64,
    pub initial_margin: u64,
    pub allow_partial_liquidation: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOrder {
    pub position: Position,
    pub order_side: OrderSide,
    pub synthetic_token: u32,
    #[serde(with = "u64_dec")]
    pub synthetic_amount: u64,
    #[serde(with = "u64_dec")]
    pub collateral_amount: u64,
    pub open_order_fields: OpenOrderFields,
    pub signature: StarkSignature,
}

impl LiquidationOrder {
    pub fn hash(&self) -> Felt {
        hash_many(&[
            self.position.address(),
            self.order_side.flag(),
            Felt::from(self.synthetic_token),
            Felt::from(self.synthetic_amount),
            Felt::from(self.collateral_amount),
            self.open_order_fields.hash(),
        ])
    }
}

impl WalletSession {
    /// Spend collateral notes and derive a fresh position address.
    fn open_fields(
        &mut self,
        synthetic_token: u32,
        initial_margin: u64,
        allow_partial_liquidation: bool,
    ) -> Result<(OpenOrderFields, Vec<Felt>)> {
        let collateral_token = self.config().collateral_token;
        let spent = self.spend(collateral_token, initial_margin)?;
        let refund_note = self.refund_note(collateral_token, &spent);

        let position_key = self.keys_mut().next_position_key(synthetic_token);
        self.ledger.insert_key(
            EntityKind::Position,
            position_key.address,
            position_key.private_key,
        );

        let fields = OpenOrderFields {
            initial_margin,
            collateral_token,
            notes_in: spent.notes.clone(),
            refund_note,
            position_address: position_key.address,
            allow_partial_liquidation,
        };
        Ok((fields, spent.keys))
    }

    /// Build and sign a perpetual order.
    ///
    /// Closing orders trade against the position's side regardless of the
    /// requested side.
    pub fn make_perp_order(&mut self, request: PerpOrderRequest) -> Result<PerpOrder> {
        require_positive("synthetic amount", request.synthetic_amount)?;
        require_positive("collateral amount", request.collateral_amount)?;
        if !self.config().is_synthetic(request.synthetic_token) {
            return Err(WalletError::InvalidInput(format!(
                "token {} has no perpetual market",
                request.synthetic_token
            )));
        }

        let mut order = PerpOrder {
            expiration_timestamp: request.expiration_timestamp,
            position: None,
            position_effect_type: request.position_effect_type,
            order_side: request.order_side,
            synthetic_token: request.synthetic_token,
            synthetic_amount: request.synthetic_amount,
            collateral_amount: request.collateral_amount,
            fee_limit: request.fee_limit,
            open_order_fields: None,
            close_order_fields: None,
            signature: StarkSignature::default(),
        };

        match request.position_effect_type {
            PositionEffectType::Open => {
                require_positive("initial margin", request.initial_margin)?;
                let (fields, keys) = self.open_fields(
                    request.synthetic_token,
                    request.initial_margin,
                    request.allow_partial_liquidation,
                )?;
                order.open_order_fields = Some(fields);
                order.signature = sign_with_keys(&keys, &order.hash())?;
            }
            effect => {
                let address = request.position_address.ok_or_else(|| {
                    WalletError::InvalidInput(format!("{effect} order needs a position address"))
                })?;
                let position = self.ledger.position(&address)?.clone();
                if position.synthetic_token() != request.synthetic_token {
                    return Err(WalletError::InvalidPositionOrTab(format!(
                        "position {address} is not in token {}",
                        request.synthetic_token
                    )));
                }
                let position_key = self.ledger.private_key(EntityKind::Position, &address)?;

                if effect == PositionEffectType::Close {
                    order.order_side = position.order_side.opposite();
                    let collateral_token = self.config().collateral_token;
                    order.close_order_fields = Some(self.fresh_destination(collateral_token));
                }
                order.position = Some(position);
                order.signature = sign_hash(&position_key, &order.hash())?;
            }
        }

        self.mark_built("perpetual order");
        Ok(order)
    }

    /// Build and sign an order taking over a liquidatable position.
    pub fn make_liquidation_order(&mut self, request: LiquidationRequest) -> Result<LiquidationOrder> {
        require_positive("synthetic amount", request.synthetic_amount)?;
        require_positive("collateral amount", request.collateral_amount)?;
        require_positive("initial margin", request.initial_margin)?;

        let synthetic_token = request.liquidated_position.synthetic_token();
        let (fields, keys) = self.open_fields(
            synthetic_token,
            request.initial_margin,
            request.allow_partial_liquidation,
        )?;

        let mut order = LiquidationOrder {
            order_side: request.liquidated_position.order_side,
            position: request.liquidated_position,
            synthetic_token,
            synthetic_amount: request.synthetic_amount,
            collateral_amount: request.collateral_amount,
            open_order_fields: fields,
            signature: StarkSignature::default(),
        };
        order.signature = sign_with_keys(&keys, &order.hash())?;

        self.mark_built("liquidation order");
        Ok(order)
    }
}
