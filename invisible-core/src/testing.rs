//! Fixtures shared by the unit tests.

use crate::commitment::generate_blinding;
use crate::config::ExchangeConfig;
use crate::hash::Felt;
use crate::keys::EntityKind;
use crate::session::WalletSession;
use crate::state::{Note, OrderSide, Position, PositionHeader};

pub fn session() -> WalletSession {
    WalletSession::from_private_key(Felt::from(0xabcdefu64), ExchangeConfig::default())
        .expect("should build session")
}

/// Credit spendable notes at fresh addresses, indices starting at `first_index`.
pub fn fund(session: &mut WalletSession, token: u32, amounts: &[u64], first_index: u64) -> Vec<Note> {
    let mut notes = Vec::new();
    for (i, amount) in amounts.iter().enumerate() {
        let slot = session.counters().get(EntityKind::Note, token);
        let key = session.keys().derive_at(EntityKind::Note, token, slot);
        session.set_counter(EntityKind::Note, token, slot + 1);
        let blinding = generate_blinding(key.address, session.private_seed());
        let note = Note::new(first_index + i as u64, key.address, token, *amount, blinding);
        session
            .ledger
            .insert_key(EntityKind::Note, key.address, key.private_key);
        session.ledger.add_note(note.clone());
        notes.push(note);
    }
    notes
}

/// Open position owned by the session.
pub fn open_position(session: &mut WalletSession, synthetic_token: u32, side: OrderSide) -> Position {
    let key = session.keys().derive_at(EntityKind::Position, synthetic_token, 15);
    session
        .ledger
        .insert_key(EntityKind::Position, key.address, key.private_key);
    let mut position = Position {
        index: 3,
        position_header: PositionHeader {
            synthetic_token,
            position_address: key.address,
            allow_partial_liquidation: true,
            vlp_token: 0,
            max_vlp_supply: 0,
        },
        order_side: side,
        position_size: 1_000_000,
        margin: 500_000_000,
        entry_price: 30_000_000_000,
        liquidation_price: 15_000_000_000,
        bankruptcy_price: 14_000_000_000,
        last_funding_idx: 0,
        vlp_supply: 0,
        hash: Felt::ZERO,
    };
    position.hash = position.compute_hash();
    session.ledger.add_position(position.clone());
    position
}
