//! Stealth address derivation.
//!
//! Every note, position and order tab lives at a one-time address derived
//! from the master key pair `(kv, ks)`:
//!
//! - a per-kind, per-token domain seed `H2(KIND_CONSTANT, token)`,
//! - subaddress keys `ksi = trim240(H2(ks, seed))`, `kvi = trim240(H2(kv, seed))`,
//! - the one-time private key `trim240(H2(counter, pub(kvi))) + ksi`.
//!
//! Counters wrap inside a small window per kind, so every owned address can
//! be rediscovered by probing `window` candidates per token.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use starknet_crypto::get_public_key;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, WalletError};
use crate::hash::{bit_length, h2, hash_many, trim240, Felt};

/// Maximum bit width of master key material.
pub const MAX_KEY_BITS: usize = 240;

/// Address window for notes.
pub const NOTE_WINDOW: u32 = 32;

/// Address window for positions and order tabs.
pub const ENTITY_WINDOW: u32 = 16;

fn felt_const(decimal: &str) -> Felt {
    // All constants below are well inside the field.
    Felt::from_dec_str(decimal).unwrap_or(Felt::ZERO)
}

static NOTE_DOMAIN: Lazy<Felt> =
    Lazy::new(|| felt_const("328965294021249504871258328423859990890523432589236523"));
static POSITION_DOMAIN: Lazy<Felt> =
    Lazy::new(|| felt_const("87311195862357333589832472352389732849239571003295829"));
static ORDER_TAB_DOMAIN: Lazy<Felt> =
    Lazy::new(|| felt_const("3289651004221748755344442085963285230025892366052333"));

static VIEW_KEY_MASK: Lazy<Felt> = Lazy::new(|| {
    felt_const("7689472303258934252343208597532492385943798632767034892572348289573")
});
static SPEND_KEY_MASK: Lazy<Felt> = Lazy::new(|| {
    felt_const("8232958253823489479856437527982347891347326348905738437643519378455")
});
static USER_ID_MASK: Lazy<Felt> = Lazy::new(|| {
    felt_const("172815432917432758348972343289652348293569370432238525823094893243")
});
static PRIVATE_SEED_MASK: Lazy<Felt> = Lazy::new(|| {
    felt_const("3289567280438953725403208532754302390573452930958285878326574839523")
});

/// The three address namespaces a wallet derives keys in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Note,
    Position,
    OrderTab,
}

impl EntityKind {
    /// Number of distinct addresses per token before the counter wraps.
    pub fn window(self) -> u32 {
        match self {
            EntityKind::Note => NOTE_WINDOW,
            EntityKind::Position | EntityKind::OrderTab => ENTITY_WINDOW,
        }
    }

    fn domain_constant(self) -> Felt {
        match self {
            EntityKind::Note => *NOTE_DOMAIN,
            EntityKind::Position => *POSITION_DOMAIN,
            EntityKind::OrderTab => *ORDER_TAB_DOMAIN,
        }
    }

    /// Domain-separated seed for this kind and token.
    pub fn seed(self, token: u32) -> Felt {
        h2(self.domain_constant(), Felt::from(token))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Note => write!(f, "note"),
            EntityKind::Position => write!(f, "position"),
            EntityKind::OrderTab => write!(f, "order tab"),
        }
    }
}

/// Public key (x-coordinate) for a private scalar.
pub fn public_key(private_key: &Felt) -> Felt {
    get_public_key(private_key)
}

/// Subaddress keys `(ksi, kvi)` for a domain seed.
pub fn derive_subaddress_keys(spend_key: Felt, view_key: Felt, seed: Felt) -> (Felt, Felt) {
    (trim240(h2(spend_key, seed)), trim240(h2(view_key, seed)))
}

/// One-time private key for slot `counter` of a subaddress.
///
/// `view_public` is the public key of the subaddress view key `kvi`.
pub fn derive_one_time_private_key(view_public: Felt, sub_spend_key: Felt, counter: u32) -> Felt {
    trim240(h2(Felt::from(counter), view_public)) + sub_spend_key
}

/// A derived private key and the address it controls.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DerivedKey {
    pub private_key: Felt,
    pub address: Felt,
}

impl DerivedKey {
    pub fn from_private_key(private_key: Felt) -> Self {
        Self {
            private_key,
            address: public_key(&private_key),
        }
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("address", &self.address.to_string())
            .finish_non_exhaustive()
    }
}

/// Master view and spend keys, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKeys {
    view: [u8; 32],
    spend: [u8; 32],
}

impl MasterKeys {
    /// Build from explicit view and spend keys, each at most 240 bits wide.
    pub fn new(view_key: Felt, spend_key: Felt) -> Result<Self> {
        for (name, key) in [("view", &view_key), ("spend", &spend_key)] {
            let bits = bit_length(key);
            if bits > MAX_KEY_BITS {
                return Err(WalletError::InvalidKeyLength(format!(
                    "{name} key is {bits} bits, limit is {MAX_KEY_BITS}"
                )));
            }
        }
        Ok(Self {
            view: view_key.to_bytes_be(),
            spend: spend_key.to_bytes_be(),
        })
    }

    /// Derive both master keys from a single private key.
    pub fn from_private_key(private_key: Felt) -> Result<Self> {
        let view = trim240(h2(*VIEW_KEY_MASK, private_key));
        let spend = trim240(h2(*SPEND_KEY_MASK, private_key));
        Self::new(view, spend)
    }

    pub fn view_key(&self) -> Felt {
        Felt::from_bytes_be(&self.view).unwrap_or(Felt::ZERO)
    }

    pub fn spend_key(&self) -> Felt {
        Felt::from_bytes_be(&self.spend).unwrap_or(Felt::ZERO)
    }

    /// Stable identifier used to key remote and cached state.
    pub fn user_id(&self) -> Felt {
        hash_many(&[*USER_ID_MASK, self.view_key(), self.spend_key()])
    }

    /// Seed for blinding factors and deposit keys.
    pub fn private_seed(&self) -> Felt {
        hash_many(&[*PRIVATE_SEED_MASK, self.view_key(), self.spend_key()])
    }
}

impl fmt::Debug for MasterKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeys").finish_non_exhaustive()
    }
}

/// Per-token usage counters for each entity kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    #[serde(default)]
    pub note: HashMap<u32, u32>,
    #[serde(default)]
    pub position: HashMap<u32, u32>,
    #[serde(default)]
    pub order_tab: HashMap<u32, u32>,
}

impl UsageCounters {
    fn table(&self, kind: EntityKind) -> &HashMap<u32, u32> {
        match kind {
            EntityKind::Note => &self.note,
            EntityKind::Position => &self.position,
            EntityKind::OrderTab => &self.order_tab,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut HashMap<u32, u32> {
        match kind {
            EntityKind::Note => &mut self.note,
            EntityKind::Position => &mut self.position,
            EntityKind::OrderTab => &mut self.order_tab,
        }
    }

    pub fn get(&self, kind: EntityKind, token: u32) -> u32 {
        self.table(kind).get(&token).copied().unwrap_or(0)
    }

    /// Store a counter, reduced into the kind's window.
    pub fn set(&mut self, kind: EntityKind, token: u32, value: u32) {
        self.table_mut(kind).insert(token, value % kind.window());
    }

    /// Return the current slot and advance the counter, wrapping at the window.
    pub fn advance(&mut self, kind: EntityKind, token: u32) -> u32 {
        let current = self.get(kind, token);
        self.set(kind, token, current + 1);
        current
    }
}

/// Master keys plus the counters that drive address derivation.
#[derive(Clone, Debug)]
pub struct KeyChain {
    master: MasterKeys,
    pub counters: UsageCounters,
}

impl KeyChain {
    pub fn new(master: MasterKeys) -> Self {
        Self {
            master,
            counters: UsageCounters::default(),
        }
    }

    pub fn with_counters(master: MasterKeys, counters: UsageCounters) -> Self {
        Self { master, counters }
    }

    pub fn master(&self) -> &MasterKeys {
        &self.master
    }

    pub fn user_id(&self) -> Felt {
        self.master.user_id()
    }

    pub fn private_seed(&self) -> Felt {
        self.master.private_seed()
    }

    /// Key at slot `counter` for `(kind, token)`. Pure; counters are untouched.
    pub fn derive_at(&self, kind: EntityKind, token: u32, counter: u32) -> DerivedKey {
        let (ksi, kvi) = derive_subaddress_keys(
            self.master.spend_key(),
            self.master.view_key(),
            kind.seed(token),
        );
        let private_key = derive_one_time_private_key(public_key(&kvi), ksi, counter);
        DerivedKey::from_private_key(private_key)
    }

    /// Every candidate key in the window for `(kind, token)`.
    pub fn window_candidates(&self, kind: EntityKind, token: u32) -> Vec<DerivedKey> {
        (0..kind.window())
            .map(|slot| self.derive_at(kind, token, slot))
            .collect()
    }

    /// Fresh key for `(kind, token)`; advances the counter.
    pub fn next_key(&mut self, kind: EntityKind, token: u32) -> DerivedKey {
        let slot = self.counters.advance(kind, token);
        debug!(%kind, token, slot, "derived one-time address");
        self.derive_at(kind, token, slot)
    }

    pub fn next_note_key(&mut self, token: u32) -> DerivedKey {
        self.next_key(EntityKind::Note, token)
    }

    pub fn next_position_key(&mut self, token: u32) -> DerivedKey {
        self.next_key(EntityKind::Position, token)
    }

    pub fn next_order_tab_key(&mut self, token: u32) -> DerivedKey {
        self.next_key(EntityKind::OrderTab, token)
    }

    /// Deposit key for a token, outside the one-time address tree.
    pub fn deposit_key(&self, token: u32) -> DerivedKey {
        DerivedKey::from_private_key(h2(self.private_seed(), Felt::from(token)))
    }
}
