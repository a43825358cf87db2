//! Durable local cache of key material, counters and tracked order ids.
//!
//! One sled tree holds a JSON record per wallet, keyed by the hex encoding of
//! the user id. Private keys are written as decimal strings.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::debug;

use invisible_core::hash::parse_felt;
use invisible_core::{EntityKind, Felt, UsageCounters, WalletSession};

use crate::error::{ClientError, Result};

const USERS_TREE: &str = "users";

/// What survives between sessions for one wallet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUserState {
    pub counters: UsageCounters,
    pub note_keys: Vec<String>,
    pub position_keys: Vec<String>,
    pub tab_keys: Vec<String>,
    pub order_ids: Vec<u64>,
    pub perp_order_ids: Vec<u64>,
}

impl CachedUserState {
    /// Snapshot the persistent parts of a session.
    pub fn capture(session: &WalletSession) -> Self {
        let keys = |kind: EntityKind| {
            let mut keys: Vec<String> = session
                .ledger
                .keys(kind)
                .values()
                .map(Felt::to_string)
                .collect();
            keys.sort();
            keys
        };
        Self {
            counters: session.counters().clone(),
            note_keys: keys(EntityKind::Note),
            position_keys: keys(EntityKind::Position),
            tab_keys: keys(EntityKind::OrderTab),
            order_ids: session.ledger.order_ids.iter().copied().collect(),
            perp_order_ids: session.ledger.perp_order_ids.iter().copied().collect(),
        }
    }

    /// Load counters, keys and order ids into a session.
    pub fn apply(&self, session: &mut WalletSession) -> Result<()> {
        for (kind, keys) in [
            (EntityKind::Note, &self.note_keys),
            (EntityKind::Position, &self.position_keys),
            (EntityKind::OrderTab, &self.tab_keys),
        ] {
            for raw in keys {
                let private_key = parse_felt(raw)?;
                let address = invisible_core::keys::public_key(&private_key);
                session.ledger.insert_key(kind, address, private_key);
            }
        }
        session.restore_counters(self.counters.clone());
        session.ledger.order_ids.extend(self.order_ids.iter().copied());
        session
            .ledger
            .perp_order_ids
            .extend(self.perp_order_ids.iter().copied());
        Ok(())
    }
}

#[derive(Clone)]
pub struct LocalCache {
    db: Db,
    users: Tree,
}

impl LocalCache {
    /// Open or create the cache at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    ClientError::Cache(format!("creating {}: {err}", parent.display()))
                })?;
            }
        }
        Self::from_db(sled::open(path)?)
    }

    /// Cache that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        let users = db.open_tree(USERS_TREE)?;
        Ok(Self { db, users })
    }

    fn key(user_id: Felt) -> String {
        hex::encode(user_id.to_bytes_be())
    }

    pub fn load(&self, user_id: Felt) -> Result<Option<CachedUserState>> {
        match self.users.get(Self::key(user_id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn store(&self, user_id: Felt, state: &CachedUserState) -> Result<()> {
        let raw = serde_json::to_vec(state)?;
        self.users.insert(Self::key(user_id), raw)?;
        self.db.flush()?;
        debug!(
            notes = state.note_keys.len(),
            positions = state.position_keys.len(),
            tabs = state.tab_keys.len(),
            "stored wallet cache"
        );
        Ok(())
    }

    pub fn remove(&self, user_id: Felt) -> Result<()> {
        self.users.remove(Self::key(user_id))?;
        Ok(())
    }
}
