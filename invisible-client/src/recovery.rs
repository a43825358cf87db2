//! Rediscovering owned addresses after local key material is lost.
//!
//! For one `(kind, token)` every slot of the derivation window is checked
//! against the state store at once. The lookups are joined before any counter
//! moves; dropping the scan future drops every outstanding lookup with it.

use futures::future::try_join_all;
use tracing::{info, warn};

use invisible_core::{DerivedKey, EntityKind, WalletSession};

use crate::error::Result;
use crate::remote::StateStore;

/// Keys found for one `(kind, token)` window.
#[derive(Clone, Debug)]
pub struct ScanResult {
    pub kind: EntityKind,
    pub token: u32,
    /// Owned slots with their keys, in slot order.
    pub found: Vec<(u32, DerivedKey)>,
    /// Counter value to resume derivation from.
    pub next_counter: u32,
}

/// Probe every slot of the window for `(kind, token)`.
pub async fn scan_window<S>(
    store: &S,
    session: &WalletSession,
    kind: EntityKind,
    token: u32,
) -> Result<ScanResult>
where
    S: StateStore + ?Sized,
{
    let candidates = session.keys().window_candidates(kind, token);
    let lookups = candidates
        .iter()
        .map(|key| store.exists(kind, key.address));
    let owned = try_join_all(lookups).await?;

    let found: Vec<(u32, DerivedKey)> = candidates
        .into_iter()
        .zip(owned)
        .enumerate()
        .filter(|(_, (_, exists))| *exists)
        .map(|(slot, (key, _))| (slot as u32, key))
        .collect();
    let next_counter = found
        .last()
        .map(|(slot, _)| (slot + 1) % kind.window())
        .unwrap_or(0);

    Ok(ScanResult {
        kind,
        token,
        found,
        next_counter,
    })
}

/// Tokens whose windows are scanned for a kind.
pub fn scan_tokens(session: &WalletSession, kind: EntityKind) -> Vec<u32> {
    let config = session.config();
    match kind {
        EntityKind::Note => config.assets(),
        EntityKind::Position => config.synthetic_tokens(),
        EntityKind::OrderTab => config.tab_tokens(),
    }
}

/// Scan every relevant window for `kinds`, record the discovered keys and
/// reset the counters. Returns the number of keys found.
pub async fn restore_keys<S>(
    store: &S,
    session: &mut WalletSession,
    kinds: &[EntityKind],
) -> Result<usize>
where
    S: StateStore + ?Sized,
{
    let mut discovered = 0;
    for kind in kinds {
        for token in scan_tokens(session, *kind) {
            let scan = scan_window(store, session, *kind, token).await?;
            for (_, key) in &scan.found {
                session.ledger.insert_key(*kind, key.address, key.private_key);
            }
            session.set_counter(*kind, token, scan.next_counter);
            discovered += scan.found.len();
        }
        info!(%kind, "restored keys from state store");
    }
    if discovered == 0 {
        warn!("recovery scan found no owned addresses");
    }
    Ok(discovered)
}
