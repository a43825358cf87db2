//! invisible-core
//!
//! Wallet core for a privacy-preserving exchange: one-time addresses derived
//! from a master key pair, amount-hiding commitments, a UTXO-style ledger of
//! notes, positions and order tabs, coin selection, and signed transaction
//! builders for every message the settlement service accepts.
//!
//! # Layout
//!
//! - [`keys`]: master keys, usage counters and one-time key derivation
//! - [`commitment`]: blindings, commitments and hidden amounts
//! - [`state`]: notes, positions and order tabs with their leaf hashes
//! - [`ledger`]: local bookkeeping of owned entities and their keys
//! - [`selection`]: input selection and refund computation
//! - [`orders`]: transaction builders on [`WalletSession`]
//! - [`reconcile`]: merging remote order state into the ledger
//!
//! Everything here is synchronous and performs no I/O; transport and
//! persistence live in `invisible-client`.

pub mod commitment;
pub mod config;
pub mod error;
pub mod hash;
pub mod keys;
pub mod ledger;
pub mod orders;
pub mod reconcile;
pub mod selection;
pub mod session;
pub mod signing;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::{ExchangeConfig, SpotMarket};
pub use error::{Result, WalletError};
pub use hash::Felt;
pub use keys::{DerivedKey, EntityKind, KeyChain, MasterKeys, UsageCounters};
pub use ledger::Ledger;
pub use orders::{
    AddLiquidity, CloseMm, CloseOrderFields, CloseOrderTab, Deposit, LimitOrder,
    LimitOrderRequest, LiquidationOrder, LiquidationRequest, MarginChange, MarginDirection,
    ModifyOrderTab, OpenOrderTab, PerpOrder, PerpOrderRequest, PositionEffectType, RegisterMm,
    RemoveLiquidity, SpotSide, SplitOrder, Withdrawal, WithdrawalRequest,
};
pub use reconcile::{ActiveOrdersSnapshot, ActivePerpOrder, ActiveSpotOrder, ReconcileSummary};
pub use session::WalletSession;
pub use signing::StarkSignature;
pub use state::{Note, OrderSide, OrderTab, Position, StoredNote, StoredOrderTab};
