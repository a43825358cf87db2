//! Merging remote order state back into the ledger.
//!
//! The settlement service is authoritative for which orders are still live
//! and which partial-fill refund (pfr) notes exist. [`WalletSession::handle_active_orders`]
//! applies such a snapshot; applying the same snapshot twice leaves the
//! ledger as applying it once.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::orders::PositionEffectType;
use crate::session::WalletSession;
use crate::state::Note;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSpotOrder {
    pub order_id: u64,
    pub notes_in: Vec<Note>,
    pub refund_note: Option<Note>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePerpOrder {
    pub order_id: u64,
    pub position_effect_type: PositionEffectType,
    pub notes_in: Vec<Note>,
    pub refund_note: Option<Note>,
}

/// Remote view of the orders a wallet tracks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveOrdersSnapshot {
    /// Tracked spot order ids the service no longer knows.
    pub bad_order_ids: Vec<u64>,
    pub bad_perp_order_ids: Vec<u64>,
    pub orders: Vec<ActiveSpotOrder>,
    pub perp_orders: Vec<ActivePerpOrder>,
    pub pfr_notes: Vec<Note>,
}

/// What a reconciliation pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub dropped_orders: usize,
    pub frozen_notes: usize,
    pub merged_pfr_notes: usize,
    pub skipped_pfr_notes: usize,
}

impl WalletSession {
    /// Apply an active-orders snapshot to the ledger.
    pub fn handle_active_orders(&mut self, snapshot: ActiveOrdersSnapshot) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        // Orders the service no longer knows stop locking their inputs. Any
        // input that was consumed disappears on the next state refresh.
        for order_id in &snapshot.bad_order_ids {
            self.release_frozen(*order_id, false);
            summary.dropped_orders += 1;
        }
        for order_id in &snapshot.bad_perp_order_ids {
            self.release_frozen(*order_id, true);
            summary.dropped_orders += 1;
        }

        let spot = snapshot
            .orders
            .into_iter()
            .map(|o| (o.order_id, o.notes_in, o.refund_note));
        // Only opening perp orders lock notes.
        let perp = snapshot
            .perp_orders
            .into_iter()
            .filter(|o| o.position_effect_type == PositionEffectType::Open)
            .map(|o| (o.order_id, o.notes_in, o.refund_note));

        for (order_id, notes_in, refund_note) in spot.chain(perp) {
            summary.frozen_notes += notes_in.len();
            self.ledger.freeze_notes(order_id, notes_in);
            if let Some(refund) = refund_note {
                self.ledger.register_refund(order_id, refund);
            }
        }

        for note in snapshot.pfr_notes {
            if self.ledger.merge_note(note) {
                summary.merged_pfr_notes += 1;
            } else {
                summary.skipped_pfr_notes += 1;
            }
        }

        self.ledger.dedupe_notes();
        self.ledger.dedupe_positions();

        info!(
            dropped = summary.dropped_orders,
            frozen = summary.frozen_notes,
            merged = summary.merged_pfr_notes,
            skipped = summary.skipped_pfr_notes,
            "reconciled active orders"
        );
        summary
    }

    /// Unlock the inputs of an order whose cancellation was confirmed.
    pub fn release_frozen(&mut self, order_id: u64, is_perp: bool) -> Vec<Note> {
        self.ledger.forget_order(order_id, is_perp);
        self.ledger.release_frozen(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Felt;
    use crate::testing::{fund, session};

    fn pfr(index: u64, amount: u64) -> Note {
        Note::new(index, Felt::from(9_000 + index), 55555, amount, Felt::from(3u64))
    }

    #[test]
    fn test_freezes_active_order_inputs() {
        let mut session = session();
        let notes = fund(&mut session, 55555, &[100_000, 200_000], 1);
        session.ledger.order_ids.insert(5);

        let summary = session.handle_active_orders(ActiveOrdersSnapshot {
            orders: vec![ActiveSpotOrder {
                order_id: 5,
                notes_in: vec![notes[0].clone()],
                refund_note: Some(pfr(50, 1_000)),
            }],
            ..Default::default()
        });

        assert_eq!(summary.frozen_notes, 1);
        assert_eq!(session.available_amount(55555), 200_000);
        assert_eq!(session.ledger.refund_note(5).map(|n| n.index), Some(50));

        let released = session.release_frozen(5, false);
        assert_eq!(released.len(), 1);
        assert_eq!(session.available_amount(55555), 300_000);
        assert!(!session.ledger.order_ids.contains(&5));
    }

    #[test]
    fn test_only_open_perp_orders_lock_notes() {
        let mut session = session();
        let notes = fund(&mut session, 55555, &[100_000, 200_000], 1);
        session.handle_active_orders(ActiveOrdersSnapshot {
            perp_orders: vec![
                ActivePerpOrder {
                    order_id: 1,
                    position_effect_type: PositionEffectType::Close,
                    notes_in: vec![notes[0].clone()],
                    refund_note: None,
                },
                ActivePerpOrder {
                    order_id: 2,
                    position_effect_type: PositionEffectType::Open,
                    notes_in: vec![notes[1].clone()],
                    refund_note: None,
                },
            ],
            ..Default::default()
        });
        assert_eq!(session.available_amount(55555), 100_000);
        assert!(session.ledger.frozen_notes(1).is_empty());
        assert_eq!(session.ledger.frozen_notes(2).len(), 1);
    }

    #[test]
    fn test_bad_ids_are_dropped() {
        let mut session = session();
        let notes = fund(&mut session, 55555, &[100_000, 200_000, 400_000], 1);
        session.ledger.order_ids.extend([1, 2]);
        session.ledger.perp_order_ids.insert(3);
        session.ledger.freeze_notes(1, vec![notes[0].clone()]);
        session.ledger.freeze_notes(2, vec![notes[1].clone()]);
        session.ledger.freeze_notes(3, vec![notes[2].clone()]);
        assert_eq!(session.available_amount(55555), 0);

        let summary = session.handle_active_orders(ActiveOrdersSnapshot {
            bad_order_ids: vec![2],
            bad_perp_order_ids: vec![3],
            ..Default::default()
        });
        assert_eq!(summary.dropped_orders, 2);
        assert_eq!(session.ledger.order_ids.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert!(session.ledger.perp_order_ids.is_empty());

        // Inputs of dropped orders are spendable again; order 1 still holds its note.
        assert_eq!(session.available_amount(55555), 600_000);
        assert!(session.ledger.frozen_notes(2).is_empty());
        assert!(session.ledger.frozen_notes(3).is_empty());
        assert_eq!(session.ledger.frozen_notes(1).len(), 1);
    }

    #[test]
    fn test_pfr_merge_is_idempotent() {
        let mut session = session();
        let snapshot = ActiveOrdersSnapshot {
            pfr_notes: vec![pfr(20, 70_000), pfr(21, 30_000)],
            ..Default::default()
        };

        session.handle_active_orders(snapshot.clone());
        let once: Vec<Note> = session.ledger.notes(55555).to_vec();
        session.handle_active_orders(snapshot);
        assert_eq!(session.ledger.notes(55555), once.as_slice());
        assert_eq!(session.available_amount(55555), 100_000);
    }

    #[test]
    fn test_pfr_note_at_frozen_address_is_skipped() {
        let mut session = session();
        let notes = fund(&mut session, 55555, &[100_000], 1);
        let mut at_frozen = pfr(30, 5_000);
        at_frozen.address = notes[0].address;

        let summary = session.handle_active_orders(ActiveOrdersSnapshot {
            orders: vec![ActiveSpotOrder {
                order_id: 8,
                notes_in: notes.clone(),
                refund_note: None,
            }],
            pfr_notes: vec![at_frozen],
            ..Default::default()
        });
        assert_eq!(summary.skipped_pfr_notes, 1);
        assert_eq!(session.available_amount(55555), 0);
    }
}
