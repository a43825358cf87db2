//! The wallet client: a [`WalletSession`] wired to its collaborators.
//!
//! Every `send_*` call builds and signs a message through the session,
//! submits it, and applies the outcome to the ledger. Inputs are removed from
//! the ledger when the message is built; a rejected or failed submission
//! leaves them removed until the next [`WalletClient::refresh_state`] or
//! reconciliation pass restores whatever the state store still holds.

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use invisible_core::orders::{
    AddLiquidity, CloseMm, CloseOrderTab, Deposit, LimitOrder, LimitOrderRequest,
    LiquidationOrder, LiquidationRequest, MarginChange, MarginDirection, ModifyOrderTab,
    OpenOrderTab, PerpOrder, PerpOrderRequest, RegisterMm, RemoveLiquidity, SplitOrder, Withdrawal,
    WithdrawalRequest,
};
use invisible_core::state::Note;
use invisible_core::{
    EntityKind, ExchangeConfig, Felt, ReconcileSummary, WalletError, WalletSession,
};

use crate::cache::{CachedUserState, LocalCache};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::recovery::restore_keys;
use crate::remote::{
    AmendRequest, CancelRequest, SettlementService, StateStore, Submission, SubmissionResponse,
};

const ALL_KINDS: [EntityKind; 3] = [EntityKind::Note, EntityKind::Position, EntityKind::OrderTab];

/// A built message and the settlement service's answer to it.
#[derive(Clone, Debug)]
pub struct Receipt<T> {
    pub message: T,
    pub response: SubmissionResponse,
}

pub struct WalletClient<S, T> {
    session: WalletSession,
    settlement: S,
    store: T,
    cache: LocalCache,
    recover_on_missing_note: bool,
}

impl<S, T> WalletClient<S, T>
where
    S: SettlementService,
    T: StateStore,
{
    pub fn new(session: WalletSession, settlement: S, store: T, cache: LocalCache) -> Self {
        Self {
            session,
            settlement,
            store,
            cache,
            recover_on_missing_note: true,
        }
    }

    /// Client for `private_key` using the cache and exchange parameters in `config`.
    pub fn from_config(
        private_key: Felt,
        config: &ClientConfig,
        settlement: S,
        store: T,
    ) -> anyhow::Result<Self> {
        let exchange: ExchangeConfig = config.exchange_config()?;
        let session = WalletSession::from_private_key(private_key, exchange)?;
        let cache = LocalCache::persistent(&config.cache_path)?;
        let mut client = Self::new(session, settlement, store, cache);
        client.recover_on_missing_note = config.recover_on_missing_note;
        Ok(client)
    }

    pub fn set_recover_on_missing_note(&mut self, enabled: bool) {
        self.recover_on_missing_note = enabled;
    }

    pub fn session(&self) -> &WalletSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut WalletSession {
        &mut self.session
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    // ---- login and state ----

    /// Load cached keys (or rediscover them), fetch owned state and reconcile
    /// tracked orders.
    pub async fn login(&mut self) -> Result<ReconcileSummary> {
        let user_id = self.session.user_id();
        match self.cache.load(user_id)? {
            Some(state) => state.apply(&mut self.session)?,
            None => {
                info!("no cached keys for wallet, scanning the state store");
                restore_keys(&self.store, &mut self.session, &ALL_KINDS).await?;
            }
        }
        self.refresh_state().await?;
        let summary = self.sync_orders().await?;
        info!(
            notes = self.session.ledger.keys(EntityKind::Note).len(),
            positions = self.session.ledger.keys(EntityKind::Position).len(),
            "logged in"
        );
        Ok(summary)
    }

    /// Rescan derivation windows for `kinds` and persist what was found.
    pub async fn recover(&mut self, kinds: &[EntityKind]) -> Result<usize> {
        let found = restore_keys(&self.store, &mut self.session, kinds).await?;
        self.persist()?;
        Ok(found)
    }

    /// Fetch the notes, positions and order tabs behind every known key.
    ///
    /// Notes held by a live order stay frozen until it is cancelled or
    /// reported gone.
    pub async fn refresh_state(&mut self) -> Result<()> {
        let notes = match self.fetch_notes().await {
            Ok(notes) => notes,
            Err(err) => {
                warn!(%err, "note fetch failed, rescanning note keys");
                restore_keys(&self.store, &mut self.session, &[EntityKind::Note]).await?;
                self.fetch_notes().await?
            }
        };
        let mut held = 0usize;
        for note in notes {
            if !self.session.ledger.merge_note(note) {
                held += 1;
            }
        }
        if held > 0 {
            debug!(held, "kept notes locked by live orders out of the spendable set");
        }

        let position_addresses = self.addresses(EntityKind::Position);
        let positions =
            try_join_all(position_addresses.iter().map(|a| self.store.fetch_positions(*a)))
                .await?;
        for position in positions.into_iter().flatten() {
            self.session.ledger.replace_position(position);
        }

        let seed = self.session.private_seed();
        let tab_addresses = self.addresses(EntityKind::OrderTab);
        let tabs =
            try_join_all(tab_addresses.iter().map(|a| self.store.fetch_order_tabs(*a))).await?;
        for stored in tabs.into_iter().flatten() {
            match stored.reveal(seed) {
                Ok(tab) => self.session.ledger.replace_order_tab(tab),
                Err(err) => warn!(%err, "skipping order tab that does not open"),
            }
        }

        self.session.ledger.dedupe_notes();
        self.session.ledger.dedupe_positions();
        Ok(())
    }

    async fn fetch_notes(&self) -> Result<Vec<Note>> {
        let seed = self.session.private_seed();
        let addresses = self.addresses(EntityKind::Note);
        let stored = try_join_all(addresses.iter().map(|a| self.store.fetch_notes(*a))).await?;

        let mut notes = Vec::new();
        for record in stored.into_iter().flatten() {
            match record.reveal(seed) {
                Ok(note) => notes.push(note),
                Err(err) => warn!(%err, index = record.index, "skipping note that does not open"),
            }
        }
        Ok(notes)
    }

    fn addresses(&self, kind: EntityKind) -> Vec<Felt> {
        self.session.ledger.keys(kind).keys().copied().collect()
    }

    /// Reconcile tracked orders against the settlement service.
    pub async fn sync_orders(&mut self) -> Result<ReconcileSummary> {
        let order_ids: Vec<u64> = self.session.ledger.order_ids.iter().copied().collect();
        let perp_order_ids: Vec<u64> =
            self.session.ledger.perp_order_ids.iter().copied().collect();
        let snapshot = self
            .settlement
            .get_active_orders(&order_ids, &perp_order_ids)
            .await?;
        let summary = self.session.handle_active_orders(snapshot);
        self.persist()?;
        Ok(summary)
    }

    pub fn persist(&self) -> Result<()> {
        self.cache
            .store(self.session.user_id(), &CachedUserState::capture(&self.session))
    }

    // ---- submission ----

    async fn submit(&mut self, submission: Submission) -> Result<SubmissionResponse> {
        let kind = submission.kind();
        let outcome = self.settlement.submit(&submission).await;
        self.session.clear_awaiting_order();

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.session.discard_staged();
                warn!(kind, %err, "submission failed");
                return Err(err);
            }
        };
        if !response.successful {
            self.session.discard_staged();
            return Err(self.rejected(kind, response).await);
        }

        self.apply(&submission, &response);
        self.persist()?;
        info!(kind, order_id = ?response.order_id, "submission accepted");
        Ok(response)
    }

    /// Turn a refusal into an error, rescanning note keys first when the
    /// refusal names a note the service does not know.
    async fn rejected(&mut self, kind: &str, response: SubmissionResponse) -> ClientError {
        let reason = response
            .error_message
            .unwrap_or_else(|| "no reason given".to_string());
        warn!(kind, %reason, "settlement service rejected message");
        let err = WalletError::RemoteRejected(reason);

        if err.is_missing_note() && self.recover_on_missing_note {
            warn!("rejection names an unknown note, rescanning note keys");
            let healed = match restore_keys(&self.store, &mut self.session, &[EntityKind::Note]).await {
                Ok(_) => self.refresh_state().await.and_then(|_| self.persist()),
                Err(recovery) => Err(recovery),
            };
            if let Err(recovery) = healed {
                warn!(%recovery, "note recovery failed");
            }
        }
        err.into()
    }

    fn apply(&mut self, submission: &Submission, response: &SubmissionResponse) {
        match submission {
            Submission::LimitOrder(order) => {
                self.session.discard_staged();
                if let Some(order_id) = response.order_id {
                    self.track_order(order_id, false, order.notes_in(), order.refund_note());
                }
            }
            Submission::PerpOrder(order) => {
                self.session.discard_staged();
                if let Some(order_id) = response.order_id {
                    self.track_order(order_id, true, order.notes_in(), order.refund_note());
                }
            }
            Submission::OpenOrderTab(open) => {
                self.settle_outputs(&response.notes);
                let tab = response.order_tab.clone().unwrap_or_else(|| open.order_tab.clone());
                self.session.ledger.replace_order_tab(tab);
            }
            Submission::CloseOrderTab(close) => {
                self.settle_outputs(&response.notes);
                self.session.ledger.remove_order_tab(&close.order_tab.address());
            }
            _ => self.settle_outputs(&response.notes),
        }

        if let Some(position) = &response.position {
            self.session.ledger.replace_position(position.clone());
        }
        if let (Some(tab), Submission::ModifyOrderTab(_)) = (&response.order_tab, submission) {
            self.session.ledger.replace_order_tab(tab.clone());
        }
    }

    /// Record the outputs of a settled message: the service's indexed notes
    /// when it returned them, the locally staged ones otherwise.
    fn settle_outputs(&mut self, notes: &[Note]) {
        if notes.is_empty() {
            self.session.commit_staged();
            return;
        }
        self.session.discard_staged();
        for note in notes.iter().filter(|n| n.amount > 0) {
            self.session.ledger.upsert_note(note.clone());
        }
    }

    fn track_order(&mut self, order_id: u64, is_perp: bool, notes_in: &[Note], refund: Option<&Note>) {
        let ledger = &mut self.session.ledger;
        if is_perp {
            ledger.perp_order_ids.insert(order_id);
        } else {
            ledger.order_ids.insert(order_id);
        }
        if !notes_in.is_empty() {
            ledger.freeze_notes(order_id, notes_in.to_vec());
        }
        if let Some(refund) = refund {
            ledger.register_refund(order_id, refund.clone());
        }
    }

    async fn send<M: Clone>(&mut self, message: M, wrap: fn(M) -> Submission) -> Result<Receipt<M>> {
        let response = self.submit(wrap(message.clone())).await?;
        Ok(Receipt { message, response })
    }

    pub async fn send_limit_order(&mut self, request: LimitOrderRequest) -> Result<Receipt<LimitOrder>> {
        let order = self.session.make_limit_order(request)?;
        self.send(order, Submission::LimitOrder).await
    }

    pub async fn send_perp_order(&mut self, request: PerpOrderRequest) -> Result<Receipt<PerpOrder>> {
        let order = self.session.make_perp_order(request)?;
        self.send(order, Submission::PerpOrder).await
    }

    pub async fn send_liquidation_order(
        &mut self,
        request: LiquidationRequest,
    ) -> Result<Receipt<LiquidationOrder>> {
        let order = self.session.make_liquidation_order(request)?;
        self.send(order, Submission::LiquidationOrder).await
    }

    pub async fn send_deposit(
        &mut self,
        deposit_id: u64,
        token: u32,
        amount: u64,
        stark_key: Felt,
    ) -> Result<Receipt<Deposit>> {
        let deposit = self
            .session
            .make_deposit_order(deposit_id, token, amount, stark_key)?;
        self.send(deposit, Submission::Deposit).await
    }

    pub async fn send_withdrawal(&mut self, request: WithdrawalRequest) -> Result<Receipt<Withdrawal>> {
        let withdrawal = self.session.make_withdrawal_order(request)?;
        self.send(withdrawal, Submission::Withdrawal).await
    }

    pub async fn send_margin_change(
        &mut self,
        position_address: Felt,
        direction: MarginDirection,
        amount: u64,
    ) -> Result<Receipt<MarginChange>> {
        let change = self
            .session
            .make_margin_change(position_address, direction, amount)?;
        self.send(change, Submission::MarginChange).await
    }

    /// Restructure notes of `token`; `None` when no split is worthwhile.
    pub async fn send_split(
        &mut self,
        token: u32,
        new_amount: u64,
    ) -> Result<Option<Receipt<SplitOrder>>> {
        match self.session.make_split_order(token, new_amount)? {
            Some(split) => self.send(split, Submission::Split).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn send_open_order_tab(
        &mut self,
        base_amount: u64,
        quote_amount: u64,
        market_id: u32,
    ) -> Result<Receipt<OpenOrderTab>> {
        let open = self
            .session
            .make_open_order_tab(base_amount, quote_amount, market_id)?;
        self.send(open, Submission::OpenOrderTab).await
    }

    pub async fn send_close_order_tab(&mut self, tab_address: Felt) -> Result<Receipt<CloseOrderTab>> {
        let close = self.session.make_close_order_tab(tab_address)?;
        self.send(close, Submission::CloseOrderTab).await
    }

    pub async fn send_modify_order_tab(
        &mut self,
        tab_address: Felt,
        market_id: u32,
        base_amount: u64,
        quote_amount: u64,
        is_add: bool,
    ) -> Result<Receipt<ModifyOrderTab>> {
        let modify = self.session.make_modify_order_tab(
            tab_address,
            market_id,
            base_amount,
            quote_amount,
            is_add,
        )?;
        self.send(modify, Submission::ModifyOrderTab).await
    }

    pub async fn send_register_mm(
        &mut self,
        position_address: Felt,
        vlp_token: u32,
        max_vlp_supply: u64,
    ) -> Result<Receipt<RegisterMm>> {
        let register = self
            .session
            .make_register_mm(position_address, vlp_token, max_vlp_supply)?;
        self.send(register, Submission::RegisterMm).await
    }

    pub async fn send_add_liquidity(
        &mut self,
        position_address: Felt,
        depositor: Felt,
        initial_value: u64,
    ) -> Result<Receipt<AddLiquidity>> {
        let add = self
            .session
            .make_add_liquidity(position_address, depositor, initial_value)?;
        self.send(add, Submission::AddLiquidity).await
    }

    pub async fn send_remove_liquidity(
        &mut self,
        position_address: Felt,
        depositor: Felt,
        initial_value: u64,
        vlp_amount: u64,
    ) -> Result<Receipt<RemoveLiquidity>> {
        let remove = self.session.make_remove_liquidity(
            position_address,
            depositor,
            initial_value,
            vlp_amount,
        )?;
        self.send(remove, Submission::RemoveLiquidity).await
    }

    pub async fn send_close_mm(
        &mut self,
        position_address: Felt,
        initial_value_sum: u64,
        vlp_amount_sum: u64,
    ) -> Result<Receipt<CloseMm>> {
        let close = self
            .session
            .make_close_mm(position_address, initial_value_sum, vlp_amount_sum)?;
        self.send(close, Submission::CloseMm).await
    }

    // ---- order management ----

    /// Cancel a resting order. Its locked inputs return to the spendable set
    /// only once the service confirms.
    pub async fn cancel_order(
        &mut self,
        order_id: u64,
        order_side: bool,
        is_perp: bool,
        market_id: u32,
    ) -> Result<Vec<Note>> {
        let request = CancelRequest {
            order_id,
            order_side,
            is_perp,
            market_id,
            user_id: self.session.user_id(),
        };
        let response = self.settlement.cancel(&request).await?;
        if !response.successful {
            return Err(self.rejected("cancel", response).await);
        }
        let released = self.session.release_frozen(order_id, is_perp);
        self.persist()?;
        info!(order_id, released = released.len(), "order cancelled");
        Ok(released)
    }

    pub async fn amend_order(&mut self, request: AmendRequest) -> Result<SubmissionResponse> {
        let response = self.settlement.amend(&request).await?;
        if !response.successful {
            return Err(self.rejected("amend", response).await);
        }
        Ok(response)
    }
}
