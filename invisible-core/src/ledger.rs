//! Local bookkeeping for everything a wallet owns.
//!
//! The ledger holds spendable notes per token, positions per synthetic token,
//! order tabs per base token, the private keys behind each address, and the
//! notes tied up in live orders. It performs no cryptography.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::{Result, WalletError};
use crate::hash::Felt;
use crate::keys::EntityKind;
use crate::selection::{select_for_split, select_inputs, Selection};
use crate::state::{Note, OrderTab, Position};

/// Notes removed from the ledger for a spend, with their signing keys.
#[derive(Clone, Debug)]
pub struct SpentNotes {
    pub notes: Vec<Note>,
    pub keys: Vec<Felt>,
    pub refund: u64,
    /// Value above the target absorbed without a refund note.
    pub excess: u64,
}

impl SpentNotes {
    pub fn hashes(&self) -> Vec<Felt> {
        self.notes.iter().map(Note::hash).collect()
    }

    /// Exact sum of the spent amounts.
    pub fn total(&self) -> u128 {
        self.notes.iter().map(|n| u128::from(n.amount)).sum()
    }
}

/// Keep the first entry for every index.
pub fn dedupe_by_index<T, F>(entries: &mut Vec<T>, index_of: F)
where
    F: Fn(&T) -> u64,
{
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(index_of(entry)));
}

#[derive(Clone, Debug, Default)]
pub struct Ledger {
    notes: HashMap<u32, Vec<Note>>,
    positions: HashMap<u32, Vec<Position>>,
    order_tabs: HashMap<u32, Vec<OrderTab>>,
    note_keys: HashMap<Felt, Felt>,
    position_keys: HashMap<Felt, Felt>,
    tab_keys: HashMap<Felt, Felt>,
    /// Notes locked under a live order, by order id.
    frozen: HashMap<u64, Vec<Note>>,
    /// Refund notes declared by live orders, by order id.
    refund_notes: HashMap<u64, Note>,
    /// Outputs of the last built transaction awaiting settlement.
    staged: Vec<Note>,
    pub order_ids: BTreeSet<u64>,
    pub perp_order_ids: BTreeSet<u64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- notes ----

    pub fn notes(&self, token: u32) -> &[Note] {
        self.notes.get(&token).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tokens(&self) -> impl Iterator<Item = u32> + '_ {
        self.notes.keys().copied()
    }

    /// Sum of spendable note amounts for a token.
    pub fn available_amount(&self, token: u32) -> u64 {
        self.notes(token)
            .iter()
            .fold(0u64, |acc, n| acc.saturating_add(n.amount))
    }

    pub fn add_note(&mut self, note: Note) {
        self.notes.entry(note.token).or_default().push(note);
    }

    /// Remove the note with the same index and hash, if present.
    pub fn remove_note(&mut self, note: &Note) -> Option<Note> {
        let list = self.notes.get_mut(&note.token)?;
        let hash = note.hash();
        let pos = list
            .iter()
            .position(|n| n.index == note.index && n.hash() == hash)?;
        Some(list.remove(pos))
    }

    /// Replace any entry with the same `(hash, index)` and append the note.
    pub fn upsert_note(&mut self, note: Note) {
        self.remove_note(&note);
        self.add_note(note);
    }

    /// Upsert a note reported by the state store unless a live order holds it.
    ///
    /// Returns whether the note entered the spendable set.
    pub fn merge_note(&mut self, note: Note) -> bool {
        if self.is_frozen(&note) {
            return false;
        }
        self.upsert_note(note);
        true
    }

    /// Keep the first note per index within every token.
    pub fn dedupe_notes(&mut self) {
        for list in self.notes.values_mut() {
            dedupe_by_index(list, |n| n.index);
        }
    }

    fn note_keys_for(&self, notes: &[Note]) -> Result<Vec<Felt>> {
        notes
            .iter()
            .map(|n| self.private_key(EntityKind::Note, &n.address))
            .collect()
    }

    fn take_selection(&mut self, token: u32, selection: Selection) -> Result<SpentNotes> {
        let keys = self.note_keys_for(&selection.notes)?;
        for note in &selection.notes {
            self.remove_note(note);
        }
        debug!(token, spent = selection.notes.len(), refund = selection.refund, "removed spent notes");
        Ok(SpentNotes {
            notes: selection.notes,
            keys,
            refund: selection.refund,
            excess: selection.excess,
        })
    }

    /// Select notes covering `amount` and remove them from the spendable set.
    ///
    /// On error the ledger is left untouched.
    pub fn spend(&mut self, token: u32, amount: u64, dust: u64) -> Result<SpentNotes> {
        let selection = select_inputs(self.notes(token), amount, dust).map_err(|err| match err {
            WalletError::InsufficientFunds {
                requested,
                available,
                ..
            } => WalletError::InsufficientFunds {
                token,
                requested,
                available,
            },
            other => other,
        })?;
        self.take_selection(token, selection)
    }

    /// Strict-mode selection for note restructuring; `None` when not beneficial.
    pub fn spend_for_split(
        &mut self,
        token: u32,
        amount: u64,
        dust: u64,
    ) -> Result<Option<SpentNotes>> {
        match select_for_split(self.notes(token), amount, dust)? {
            Some(selection) => self.take_selection(token, selection).map(Some),
            None => Ok(None),
        }
    }

    // ---- keys ----

    fn key_map(&self, kind: EntityKind) -> &HashMap<Felt, Felt> {
        match kind {
            EntityKind::Note => &self.note_keys,
            EntityKind::Position => &self.position_keys,
            EntityKind::OrderTab => &self.tab_keys,
        }
    }

    fn key_map_mut(&mut self, kind: EntityKind) -> &mut HashMap<Felt, Felt> {
        match kind {
            EntityKind::Note => &mut self.note_keys,
            EntityKind::Position => &mut self.position_keys,
            EntityKind::OrderTab => &mut self.tab_keys,
        }
    }

    pub fn insert_key(&mut self, kind: EntityKind, address: Felt, private_key: Felt) {
        self.key_map_mut(kind).insert(address, private_key);
    }

    pub fn remove_key(&mut self, kind: EntityKind, address: &Felt) -> Option<Felt> {
        self.key_map_mut(kind).remove(address)
    }

    pub fn private_key(&self, kind: EntityKind, address: &Felt) -> Result<Felt> {
        self.key_map(kind)
            .get(address)
            .copied()
            .ok_or_else(|| WalletError::InvalidAddress(format!("no {kind} key for {address}")))
    }

    /// Private keys per address for a kind, for persisting.
    pub fn keys(&self, kind: EntityKind) -> &HashMap<Felt, Felt> {
        self.key_map(kind)
    }

    // ---- positions ----

    pub fn positions(&self, synthetic_token: u32) -> &[Position] {
        self.positions
            .get(&synthetic_token)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().flatten()
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions
            .entry(position.synthetic_token())
            .or_default()
            .push(position);
    }

    pub fn position(&self, address: &Felt) -> Result<&Position> {
        self.all_positions()
            .find(|p| p.address() == *address)
            .ok_or_else(|| WalletError::InvalidPositionOrTab(format!("no position at {address}")))
    }

    /// Replace the position at the same address, or add it.
    pub fn replace_position(&mut self, position: Position) {
        let list = self.positions.entry(position.synthetic_token()).or_default();
        match list.iter_mut().find(|p| p.address() == position.address()) {
            Some(slot) => *slot = position,
            None => list.push(position),
        }
    }

    pub fn remove_position(&mut self, address: &Felt) -> Option<Position> {
        for list in self.positions.values_mut() {
            if let Some(pos) = list.iter().position(|p| p.address() == *address) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    pub fn dedupe_positions(&mut self) {
        for list in self.positions.values_mut() {
            dedupe_by_index(list, |p| p.index);
        }
    }

    // ---- order tabs ----

    pub fn order_tabs(&self, base_token: u32) -> &[OrderTab] {
        self.order_tabs
            .get(&base_token)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add_order_tab(&mut self, tab: OrderTab) {
        self.order_tabs
            .entry(tab.tab_header.base_token)
            .or_default()
            .push(tab);
    }

    pub fn order_tab(&self, address: &Felt) -> Result<&OrderTab> {
        self.order_tabs
            .values()
            .flatten()
            .find(|t| t.address() == *address)
            .ok_or_else(|| WalletError::InvalidPositionOrTab(format!("no order tab at {address}")))
    }

    pub fn replace_order_tab(&mut self, tab: OrderTab) {
        let list = self.order_tabs.entry(tab.tab_header.base_token).or_default();
        match list.iter_mut().find(|t| t.address() == tab.address()) {
            Some(slot) => *slot = tab,
            None => list.push(tab),
        }
    }

    pub fn remove_order_tab(&mut self, address: &Felt) -> Option<OrderTab> {
        for list in self.order_tabs.values_mut() {
            if let Some(pos) = list.iter().position(|t| t.address() == *address) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    // ---- live orders ----

    /// Move notes out of the spendable set and lock them under `order_id`.
    ///
    /// Notes that are not currently spendable are still recorded, so the
    /// lock survives a later merge.
    pub fn freeze_notes(&mut self, order_id: u64, notes: Vec<Note>) {
        for note in &notes {
            if let Some(list) = self.notes.get_mut(&note.token) {
                list.retain(|n| n.index != note.index);
            }
        }
        let list = self.frozen.entry(order_id).or_default();
        list.extend(notes);
        dedupe_by_index(list, |n| n.index);
    }

    /// Return notes locked under `order_id` to the spendable set.
    pub fn release_frozen(&mut self, order_id: u64) -> Vec<Note> {
        let notes = self.frozen.remove(&order_id).unwrap_or_default();
        for note in &notes {
            self.upsert_note(note.clone());
        }
        notes
    }

    pub fn frozen_notes(&self, order_id: u64) -> &[Note] {
        self.frozen.get(&order_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a live order holds a note at this address or index.
    pub fn is_frozen(&self, note: &Note) -> bool {
        self.frozen
            .values()
            .flatten()
            .any(|n| n.address == note.address || n.index == note.index)
    }

    /// Indices of every note locked under a live order.
    pub fn frozen_indices(&self) -> HashSet<u64> {
        self.frozen.values().flatten().map(|n| n.index).collect()
    }

    pub fn register_refund(&mut self, order_id: u64, note: Note) {
        self.refund_notes.insert(order_id, note);
    }

    pub fn refund_note(&self, order_id: u64) -> Option<&Note> {
        self.refund_notes.get(&order_id)
    }

    pub fn take_refund(&mut self, order_id: u64) -> Option<Note> {
        self.refund_notes.remove(&order_id)
    }

    /// Stop tracking an order; frozen notes stay locked until released.
    pub fn forget_order(&mut self, order_id: u64, is_perp: bool) {
        if is_perp {
            self.perp_order_ids.remove(&order_id);
        } else {
            self.order_ids.remove(&order_id);
        }
        self.refund_notes.remove(&order_id);
    }

    // ---- staged outputs ----

    pub fn stage(&mut self, note: Note) {
        self.staged.push(note);
    }

    pub fn staged(&self) -> &[Note] {
        &self.staged
    }

    pub fn take_staged(&mut self) -> Vec<Note> {
        std::mem::take(&mut self.staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(index: u64, token: u32, amount: u64) -> Note {
        Note::new(index, Felt::from(1_000 + index), token, amount, Felt::from(index))
    }

    fn funded_ledger(amounts: &[u64]) -> Ledger {
        let mut ledger = Ledger::new();
        for (i, amount) in amounts.iter().enumerate() {
            let n = note(i as u64 + 1, 55555, *amount);
            ledger.insert_key(EntityKind::Note, n.address, Felt::from(10 + i as u64));
            ledger.add_note(n);
        }
        ledger
    }

    #[test]
    fn test_available_amount() {
        let ledger = funded_ledger(&[100, 200, 5]);
        assert_eq!(ledger.available_amount(55555), 305);
        assert_eq!(ledger.available_amount(12345), 0);
    }

    #[test]
    fn test_spend_removes_selected_notes() {
        let mut ledger = funded_ledger(&[100, 250, 400]);
        let spent = ledger.spend(55555, 300, 5).expect("should spend");
        assert_eq!(spent.total(), 400);
        assert_eq!(spent.refund, 100);
        assert_eq!(spent.keys.len(), 1);
        assert_eq!(ledger.available_amount(55555), 350);
    }

    #[test]
    fn test_failed_spend_leaves_ledger_untouched() {
        let mut ledger = funded_ledger(&[10, 20]);
        let before = ledger.notes(55555).to_vec();
        let result = ledger.spend(55555, 31, 0);
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { token: 55555, .. })
        ));
        assert_eq!(ledger.notes(55555), before.as_slice());
    }

    #[test]
    fn test_spend_without_key_fails_before_mutation() {
        let mut ledger = Ledger::new();
        ledger.add_note(note(1, 55555, 50));
        let result = ledger.spend(55555, 50, 0);
        assert!(matches!(result, Err(WalletError::InvalidAddress(_))));
        assert_eq!(ledger.available_amount(55555), 50);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let mut ledger = Ledger::new();
        ledger.add_note(note(1, 55555, 10));
        ledger.add_note(Note { amount: 99, ..note(1, 55555, 10) });
        ledger.add_note(note(2, 55555, 20));
        ledger.dedupe_notes();
        let amounts: Vec<u64> = ledger.notes(55555).iter().map(|n| n.amount).collect();
        assert_eq!(amounts, vec![10, 20]);
    }

    #[test]
    fn test_freeze_and_release() {
        let mut ledger = funded_ledger(&[10, 20]);
        let locked = vec![ledger.notes(55555)[0].clone()];
        ledger.freeze_notes(7, locked.clone());
        assert_eq!(ledger.available_amount(55555), 20);
        assert!(ledger.frozen_indices().contains(&locked[0].index));

        let released = ledger.release_frozen(7);
        assert_eq!(released, locked);
        assert_eq!(ledger.available_amount(55555), 30);
        assert!(ledger.frozen_indices().is_empty());
    }

    #[test]
    fn test_merge_skips_notes_held_by_live_orders() {
        let mut ledger = funded_ledger(&[10, 20]);
        let held = ledger.notes(55555)[0].clone();
        ledger.freeze_notes(7, vec![held.clone()]);

        assert!(!ledger.merge_note(held.clone()));
        assert_eq!(ledger.available_amount(55555), 20);

        assert!(ledger.merge_note(note(9, 55555, 5)));
        assert_eq!(ledger.available_amount(55555), 25);

        ledger.release_frozen(7);
        assert!(ledger.merge_note(held));
        assert_eq!(ledger.available_amount(55555), 35);
    }

    #[test]
    fn test_total_is_exact_past_u64() {
        let spent = SpentNotes {
            notes: vec![note(1, 55555, u64::MAX), note(2, 55555, 7)],
            keys: Vec::new(),
            refund: 0,
            excess: 0,
        };
        assert_eq!(spent.total(), u128::from(u64::MAX) + 7);
    }

    #[test]
    fn test_staged_outputs() {
        let mut ledger = Ledger::new();
        ledger.stage(note(0, 12345, 5));
        assert_eq!(ledger.staged().len(), 1);
        assert_eq!(ledger.take_staged().len(), 1);
        assert!(ledger.staged().is_empty());
    }
}
