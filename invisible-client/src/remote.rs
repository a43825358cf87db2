//! Collaborators the client talks to: the settlement service that executes
//! signed messages and the state store that publishes notes, positions and
//! order tabs by address.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use invisible_core::hash::{felt_dec, u64_dec};
use invisible_core::orders::{
    AddLiquidity, CloseMm, CloseOrderTab, Deposit, LimitOrder, LiquidationOrder, MarginChange,
    ModifyOrderTab, OpenOrderTab, PerpOrder, RegisterMm, RemoveLiquidity, SplitOrder, Withdrawal,
};
use invisible_core::state::{Note, OrderTab, Position, StoredNote, StoredOrderTab};
use invisible_core::{ActiveOrdersSnapshot, EntityKind, Felt};

use crate::error::Result;

/// A signed message for the settlement service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Submission {
    LimitOrder(LimitOrder),
    PerpOrder(PerpOrder),
    LiquidationOrder(LiquidationOrder),
    Deposit(Deposit),
    Withdrawal(Withdrawal),
    MarginChange(MarginChange),
    Split(SplitOrder),
    OpenOrderTab(OpenOrderTab),
    CloseOrderTab(CloseOrderTab),
    ModifyOrderTab(ModifyOrderTab),
    RegisterMm(RegisterMm),
    AddLiquidity(AddLiquidity),
    RemoveLiquidity(RemoveLiquidity),
    CloseMm(CloseMm),
}

impl Submission {
    pub fn kind(&self) -> &'static str {
        match self {
            Submission::LimitOrder(_) => "limit_order",
            Submission::PerpOrder(_) => "perp_order",
            Submission::LiquidationOrder(_) => "liquidation_order",
            Submission::Deposit(_) => "deposit",
            Submission::Withdrawal(_) => "withdrawal",
            Submission::MarginChange(_) => "margin_change",
            Submission::Split(_) => "split",
            Submission::OpenOrderTab(_) => "open_order_tab",
            Submission::CloseOrderTab(_) => "close_order_tab",
            Submission::ModifyOrderTab(_) => "modify_order_tab",
            Submission::RegisterMm(_) => "register_mm",
            Submission::AddLiquidity(_) => "add_liquidity",
            Submission::RemoveLiquidity(_) => "remove_liquidity",
            Submission::CloseMm(_) => "close_mm",
        }
    }
}

/// Outcome of a submission, cancellation or amendment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub successful: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Id of a resting order, when one was created.
    #[serde(default)]
    pub order_id: Option<u64>,
    /// Output notes with their assigned state-tree indices.
    #[serde(default)]
    pub notes: Vec<Note>,
    /// Position as it stands after the message was applied.
    #[serde(default)]
    pub position: Option<Position>,
    /// Order tab as it stands after the message was applied.
    #[serde(default)]
    pub order_tab: Option<OrderTab>,
}

impl SubmissionResponse {
    pub fn accepted() -> Self {
        Self {
            successful: true,
            ..Default::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            successful: false,
            error_message: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub order_id: u64,
    /// `true` for bids.
    pub order_side: bool,
    pub is_perp: bool,
    pub market_id: u32,
    #[serde(with = "felt_dec")]
    pub user_id: Felt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendRequest {
    pub order_id: u64,
    pub order_side: bool,
    pub is_perp: bool,
    pub market_id: u32,
    #[serde(with = "u64_dec")]
    pub new_price: u64,
    pub new_expiration: u64,
    /// Match against resting liquidity without moving the order.
    pub match_only: bool,
    #[serde(with = "felt_dec")]
    pub user_id: Felt,
}

/// The exchange's order and settlement endpoint.
#[async_trait]
pub trait SettlementService: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionResponse>;

    async fn cancel(&self, request: &CancelRequest) -> Result<SubmissionResponse>;

    async fn amend(&self, request: &AmendRequest) -> Result<SubmissionResponse>;

    /// Live state of the tracked orders, plus any partial-fill refund notes.
    async fn get_active_orders(
        &self,
        order_ids: &[u64],
        perp_order_ids: &[u64],
    ) -> Result<ActiveOrdersSnapshot>;
}

/// Public records keyed by one-time address.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn fetch_notes(&self, address: Felt) -> Result<Vec<StoredNote>>;

    async fn note_exists(&self, address: Felt) -> Result<bool>;

    async fn fetch_positions(&self, address: Felt) -> Result<Vec<Position>>;

    async fn position_exists(&self, address: Felt) -> Result<bool>;

    async fn fetch_order_tabs(&self, address: Felt) -> Result<Vec<StoredOrderTab>>;

    async fn order_tab_exists(&self, address: Felt) -> Result<bool>;

    /// Existence check for any entity kind.
    async fn exists(&self, kind: EntityKind, address: Felt) -> Result<bool> {
        match kind {
            EntityKind::Note => self.note_exists(address).await,
            EntityKind::Position => self.position_exists(address).await,
            EntityKind::OrderTab => self.order_tab_exists(address).await,
        }
    }
}
