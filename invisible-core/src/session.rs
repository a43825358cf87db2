//! The per-user wallet session.
//!
//! A [`WalletSession`] owns the key chain, the ledger and the exchange
//! parameters. Every builder takes `&mut self`, so one session serves one
//! mutating call at a time.

use tracing::info;

use crate::config::ExchangeConfig;
use crate::error::{Result, WalletError};
use crate::hash::Felt;
use crate::keys::{EntityKind, KeyChain, MasterKeys, UsageCounters};
use crate::ledger::{Ledger, SpentNotes};
use crate::orders::CloseOrderFields;
use crate::state::Note;

#[derive(Debug)]
pub struct WalletSession {
    keys: KeyChain,
    pub ledger: Ledger,
    config: ExchangeConfig,
    awaiting_order: bool,
}

impl WalletSession {
    pub fn new(master: MasterKeys, config: ExchangeConfig) -> Self {
        Self {
            keys: KeyChain::new(master),
            ledger: Ledger::new(),
            config,
            awaiting_order: false,
        }
    }

    /// Session for a wallet identified by a single private key.
    pub fn from_private_key(private_key: Felt, config: ExchangeConfig) -> Result<Self> {
        Ok(Self::new(MasterKeys::from_private_key(private_key)?, config))
    }

    pub fn user_id(&self) -> Felt {
        self.keys.user_id()
    }

    pub fn private_seed(&self) -> Felt {
        self.keys.private_seed()
    }

    pub fn keys(&self) -> &KeyChain {
        &self.keys
    }

    pub(crate) fn keys_mut(&mut self) -> &mut KeyChain {
        &mut self.keys
    }

    pub fn counters(&self) -> &UsageCounters {
        &self.keys.counters
    }

    pub fn restore_counters(&mut self, counters: UsageCounters) {
        self.keys.counters = counters;
    }

    pub fn set_counter(&mut self, kind: EntityKind, token: u32, value: u32) {
        self.keys.counters.set(kind, token, value);
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn available_amount(&self, token: u32) -> u64 {
        self.ledger.available_amount(token)
    }

    /// Whether a built transaction is still waiting on the settlement service.
    pub fn awaiting_order(&self) -> bool {
        self.awaiting_order
    }

    pub fn clear_awaiting_order(&mut self) {
        self.awaiting_order = false;
    }

    pub(crate) fn mark_built(&mut self, kind: &str) {
        self.awaiting_order = true;
        info!(kind, "built signed transaction");
    }

    /// Fresh one-time note address and its blinding; the key is recorded.
    pub(crate) fn fresh_destination(&mut self, token: u32) -> CloseOrderFields {
        let key = self.keys.next_note_key(token);
        self.ledger
            .insert_key(EntityKind::Note, key.address, key.private_key);
        CloseOrderFields {
            dest_received_address: key.address,
            dest_received_blinding: crate::commitment::generate_blinding(
                key.address,
                self.private_seed(),
            ),
        }
    }

    /// New note at a fresh address, staged as a pending output.
    pub(crate) fn fresh_note(&mut self, token: u32, amount: u64, index: u64) -> Note {
        let dest = self.fresh_destination(token);
        let note = Note::new(
            index,
            dest.dest_received_address,
            token,
            amount,
            dest.dest_received_blinding,
        );
        self.ledger.stage(note.clone());
        note
    }

    /// Refund note for a spend when the change exceeds the token's dust.
    pub(crate) fn refund_note(&mut self, token: u32, spent: &SpentNotes) -> Option<Note> {
        if spent.refund <= self.config.dust(token) {
            return None;
        }
        let index = spent.notes.first().map(|n| n.index).unwrap_or_default();
        Some(self.fresh_note(token, spent.refund, index))
    }

    /// Move staged outputs into the spendable set. Empty outputs are dropped.
    pub fn commit_staged(&mut self) -> Vec<Note> {
        let mut notes = self.ledger.take_staged();
        notes.retain(|n| n.amount > 0);
        for note in &notes {
            self.ledger.upsert_note(note.clone());
        }
        notes
    }

    /// Drop staged outputs of a transaction the settlement service refused.
    pub fn discard_staged(&mut self) -> Vec<Note> {
        self.ledger.take_staged()
    }

    pub(crate) fn spend(&mut self, token: u32, amount: u64) -> Result<SpentNotes> {
        let dust = self.config.dust(token);
        self.ledger.spend(token, amount, dust)
    }

    pub(crate) fn spot_market_tokens(&self, market_id: u32) -> Result<(u32, u32)> {
        self.config
            .spot_market(market_id)
            .map(|m| (m.base, m.quote))
            .ok_or_else(|| WalletError::InvalidInput(format!("unknown market id {market_id}")))
    }
}

/// Reject a zero amount before any side effect.
pub(crate) fn require_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(WalletError::InvalidInput(format!("{name} must be positive")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Note;
    use crate::testing::session;

    #[test]
    fn test_fresh_note_registers_key_and_stages() {
        let mut session = session();
        let note = session.fresh_note(55555, 100, 4);
        assert_eq!(note.index, 4);
        assert!(session
            .ledger
            .private_key(EntityKind::Note, &note.address)
            .is_ok());
        assert_eq!(session.ledger.staged(), &[note]);
        assert_eq!(session.counters().get(EntityKind::Note, 55555), 1);
    }

    #[test]
    fn test_refund_note_respects_dust() {
        let mut session = session();
        let input = Note::new(9, Felt::ONE, 55555, 100_000, Felt::ONE);
        let small = SpentNotes {
            notes: vec![input.clone()],
            keys: vec![Felt::ONE],
            refund: 50_000,
            excess: 0,
        };
        assert!(session.refund_note(55555, &small).is_none());

        let large = SpentNotes { refund: 50_001, ..small };
        let refund = session.refund_note(55555, &large).expect("refund expected");
        assert_eq!(refund.index, 9);
        assert_eq!(refund.amount, 50_001);
    }

    #[test]
    fn test_unknown_market() {
        let session = session();
        assert!(matches!(
            session.spot_market_tokens(99),
            Err(WalletError::InvalidInput(_))
        ));
        assert_eq!(session.spot_market_tokens(11).expect("market"), (12345, 55555));
    }
}
