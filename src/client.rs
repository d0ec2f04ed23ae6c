//! Coordinator tying the session, the refresh pipeline and the engines
//! together.
//!
//! Wallet events enter through an explicit command queue and session
//! notices arrive over a broadcast channel; one loop consumes both. Each
//! refresh runs as its own task so a hung provider call stalls only that
//! refresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::address_book::{AccountAddress, AddressBook};
use crate::bond::math::{vesting_countdown, vesting_term, VestingCountdown};
use crate::bond::{BondEngine, BondId, BondRequest};
use crate::config::ClientConfig;
use crate::contracts::ReadProviderFactory;
use crate::error::ClientError;
use crate::network::NetworkId;
use crate::oracle::{HttpPriceSource, PriceOracle, PriceSource};
use crate::pending::{OperationKey, PendingOperation, PendingOperationTracker, TxStatus};
use crate::session::{
    ConnectionSession, EventOutcome, Session, SessionEvent, SessionNotice, WalletConnector,
};
use crate::stake::{StakeAction, StakeEngine};
use crate::store::{AccountBalances, BondPosition, ProtocolMetrics, SyncStore};
use crate::sync::{BondRefresh, RefreshOutcome, SyncPipeline};

/// Counters and last observations of the refresh machinery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub metrics_refreshes: u64,
    pub account_refreshes: u64,
    pub bond_refreshes: u64,
    pub last_block: Option<u64>,
    pub last_failure: Option<String>,
}

#[derive(Default)]
struct StatusState {
    status: SyncStatus,
    /// Network of the last metrics refresh started in this cache epoch,
    /// cleared when that refresh fails.
    metrics_network: Option<NetworkId>,
    /// Network the cached values were loaded from.
    cache_network: Option<NetworkId>,
}

enum ClientCommand {
    Wallet(SessionEvent),
}

struct ClientInner {
    config: ClientConfig,
    session: ConnectionSession,
    tracker: Arc<PendingOperationTracker>,
    store: Arc<SyncStore>,
    pipeline: Arc<SyncPipeline>,
    bonds: Arc<BondEngine>,
    stake: StakeEngine,
    inputs: Mutex<BTreeMap<BondId, String>>,
    state: Mutex<StatusState>,
}

pub struct BondClient {
    inner: Arc<ClientInner>,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientCommand>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl BondClient {
    /// Build a client from a validated configuration.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn WalletConnector>,
        read_providers: Arc<dyn ReadProviderFactory>,
        prices: Arc<dyn PriceSource>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let book = Arc::new(AddressBook::new(config.address_book.clone()));
        let oracle = Arc::new(PriceOracle::new(prices));
        let tracker = Arc::new(PendingOperationTracker::new());
        let store = Arc::new(SyncStore::new());
        let bonds = Arc::new(BondEngine::new(
            Arc::clone(&book),
            Arc::clone(&oracle),
            Arc::clone(&tracker),
            config.bonds.enabled.clone(),
            config.oracle.reserve_symbol.clone(),
        ));
        let pipeline = Arc::new(SyncPipeline::new(
            Arc::clone(&book),
            oracle,
            Arc::clone(&bonds),
            Arc::clone(&store),
            config.oracle.reserve_symbol.clone(),
        ));
        let stake = StakeEngine::new(book, Arc::clone(&tracker));
        let session =
            ConnectionSession::new(connector, read_providers, config.network.default_network);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(ClientInner {
            config,
            session,
            tracker,
            store,
            pipeline,
            bonds,
            stake,
            inputs: Mutex::new(BTreeMap::new()),
            state: Mutex::new(StatusState::default()),
        });
        Ok(Self {
            inner,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            shutdown_tx,
            tasks: AsyncMutex::new(Vec::new()),
        })
    }

    /// Build a client whose reserve prices come from the configured HTTP
    /// oracle.
    pub fn with_http_oracle(
        config: ClientConfig,
        connector: Arc<dyn WalletConnector>,
        read_providers: Arc<dyn ReadProviderFactory>,
    ) -> Result<Self, ClientError> {
        let prices = Arc::new(HttpPriceSource::from_config(&config.oracle)?);
        Self::new(config, connector, read_providers, prices)
    }

    /// Spawn the event loop and block watcher, load protocol data and
    /// reconnect a remembered wallet. Calling it again is a no-op.
    pub async fn start(&self) -> Result<(), ClientError> {
        let Some(commands) = self.command_rx.lock().take() else {
            debug!("bond client already started");
            return Ok(());
        };
        let notices = self.inner.session.notices();
        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            commands,
            notices,
            self.shutdown_tx.subscribe(),
        )));
        if self.inner.config.sync.watch_blocks {
            tasks.push(tokio::spawn(watch_blocks(
                Arc::clone(&self.inner),
                self.inner.config.sync.block_poll_interval(),
                self.shutdown_tx.subscribe(),
            )));
        }
        drop(tasks);

        self.inner.load_app();
        if let Err(error) = self.inner.session.restore().await {
            warn!(%error, "could not restore remembered wallet");
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.await.map_err(|_| ClientError::Stopped)?;
        }
        Ok(())
    }

    pub async fn connect(&self) -> Result<Arc<Session>, ClientError> {
        Ok(self.inner.session.connect().await?)
    }

    pub async fn disconnect(&self) -> Arc<Session> {
        self.inner.session.disconnect().await
    }

    /// Queue a wallet event for the event loop.
    pub fn wallet_event(&self, event: SessionEvent) -> Result<(), ClientError> {
        self.command_tx
            .send(ClientCommand::Wallet(event))
            .map_err(|_| ClientError::Stopped)
    }

    /// Record the candidate deposit for `bond` and restart its refresh.
    pub fn set_bond_input(
        &self,
        bond: BondId,
        value: impl Into<String>,
    ) -> Result<JoinHandle<BondRefresh>, ClientError> {
        self.inner.bonds.ensure_enabled(bond)?;
        self.inner.inputs.lock().insert(bond, value.into());
        Ok(self.inner.refresh_bond(bond))
    }

    pub fn session(&self) -> Arc<Session> {
        self.inner.session.current()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Arc<Session>> {
        self.inner.session.subscribe()
    }

    pub fn session_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.session.notices()
    }

    pub fn protocol_metrics(&self) -> ProtocolMetrics {
        self.inner.store.metrics()
    }

    /// Balances of the connected account; `None` while disconnected or
    /// before the account's first refresh.
    pub fn account_balances(&self) -> Option<AccountBalances> {
        let account = self.session().connected_account()?;
        self.inner
            .store
            .account_balances()
            .filter(|balances| balances.account == account)
    }

    pub fn bond_position(&self, bond: BondId) -> Option<BondPosition> {
        self.inner.store.bond_position(bond)
    }

    /// Enabled bonds, most discounted first.
    pub fn bonds_by_discount(&self) -> Vec<BondPosition> {
        let enabled = self.inner.bonds.enabled();
        let mut positions: Vec<_> = self
            .inner
            .store
            .bond_positions()
            .into_iter()
            .filter(|position| enabled.contains(&position.bond))
            .collect();
        positions.sort_by(|a, b| b.bond_discount.total_cmp(&a.bond_discount));
        positions
    }

    pub fn vesting_countdown(&self, bond: BondId) -> Option<VestingCountdown> {
        let position = self.bond_position(bond)?;
        let current_block = self.protocol_metrics().current_block;
        Some(vesting_countdown(
            current_block,
            position.bond_maturation_block,
        ))
    }

    /// Length of a fresh bond's vesting period, from the last quote.
    pub fn vesting_term(&self, bond: BondId) -> Option<Duration> {
        let position = self.bond_position(bond)?;
        Some(vesting_term(position.vesting_block))
    }

    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.inner.tracker.pending()
    }

    pub fn label_for(&self, key: &OperationKey, idle_label: &str) -> String {
        self.inner.tracker.label_for(key, idle_label)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.state.lock().status.clone()
    }

    fn connected(&self) -> Result<(Arc<Session>, AccountAddress), ClientError> {
        let session = self.session();
        let account = session
            .connected_account()
            .ok_or(ClientError::NotConnected)?;
        Ok((session, account))
    }

    pub async fn approve_bond(&self, bond: BondId) -> Result<TxStatus, ClientError> {
        let (session, _) = self.connected()?;
        let status = self
            .inner
            .bonds
            .approve(bond, session.network, Arc::clone(&session.provider))
            .await?;
        self.after_bond_transaction(bond, status);
        Ok(status)
    }

    /// Buy a bond. `slippage_bps` defaults to the configured slippage and
    /// the recipient to the connected account.
    pub async fn bond(
        &self,
        bond: BondId,
        amount: &str,
        slippage_bps: Option<u32>,
        recipient: Option<AccountAddress>,
        reset_confirmed: bool,
    ) -> Result<TxStatus, ClientError> {
        let (session, account) = self.connected()?;
        let request = BondRequest {
            bond,
            amount: amount.to_string(),
            slippage_bps: slippage_bps.unwrap_or(self.inner.config.bonds.default_slippage_bps),
            recipient: Some(recipient.unwrap_or(account)),
            reset_confirmed,
        };
        let status = self
            .inner
            .bonds
            .bond(&request, session.network, Arc::clone(&session.provider))
            .await?;
        self.after_bond_transaction(bond, status);
        Ok(status)
    }

    pub async fn redeem(&self, bond: BondId, autostake: bool) -> Result<TxStatus, ClientError> {
        let (session, account) = self.connected()?;
        let status = self
            .inner
            .bonds
            .redeem(
                bond,
                account,
                autostake,
                session.network,
                Arc::clone(&session.provider),
            )
            .await?;
        self.after_bond_transaction(bond, status);
        Ok(status)
    }

    pub async fn approve_stake(&self, action: StakeAction) -> Result<TxStatus, ClientError> {
        let (session, _) = self.connected()?;
        let status = self
            .inner
            .stake
            .approve(action, session.network, Arc::clone(&session.provider))
            .await?;
        self.after_stake_transaction(status);
        Ok(status)
    }

    pub async fn stake(&self, amount: &str) -> Result<TxStatus, ClientError> {
        let (session, _) = self.connected()?;
        let status = self
            .inner
            .stake
            .stake(amount, session.network, Arc::clone(&session.provider))
            .await?;
        self.after_stake_transaction(status);
        Ok(status)
    }

    pub async fn unstake(&self, amount: &str) -> Result<TxStatus, ClientError> {
        let (session, _) = self.connected()?;
        let status = self
            .inner
            .stake
            .unstake(amount, session.network, Arc::clone(&session.provider))
            .await?;
        self.after_stake_transaction(status);
        Ok(status)
    }

    fn after_bond_transaction(&self, bond: BondId, status: TxStatus) {
        if status.is_confirmed() {
            self.inner.refresh_bond(bond);
            self.inner.refresh_account();
        }
    }

    fn after_stake_transaction(&self, status: TxStatus) {
        if status.is_confirmed() {
            self.inner.refresh_account();
            self.inner.refresh_metrics();
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum RefreshKind {
    Metrics,
    Account,
    Bond,
}

impl ClientInner {
    fn record(&self, kind: RefreshKind, outcome: RefreshOutcome) {
        let mut state = self.state.lock();
        if outcome == RefreshOutcome::Failed {
            state.status.last_failure = Some(format!("{kind:?} refresh failed"));
            if matches!(kind, RefreshKind::Metrics) {
                state.metrics_network = None;
            }
        }
    }

    fn refresh_metrics(self: &Arc<Self>) -> JoinHandle<RefreshOutcome> {
        let session = self.session.current();
        {
            let mut state = self.state.lock();
            state.metrics_network = Some(session.network);
            state.cache_network = Some(session.network);
            state.status.metrics_refreshes += 1;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner
                .pipeline
                .refresh_protocol_metrics(session.network, Arc::clone(&session.provider))
                .await;
            inner.record(RefreshKind::Metrics, outcome);
            outcome
        })
    }

    fn refresh_account(self: &Arc<Self>) -> JoinHandle<RefreshOutcome> {
        let session = self.session.current();
        let account = session.connected_account();
        {
            let mut state = self.state.lock();
            state.cache_network = Some(session.network);
            if account.is_some() {
                state.status.account_refreshes += 1;
            }
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner
                .pipeline
                .refresh_account_balances(account, session.network, Arc::clone(&session.provider))
                .await;
            inner.record(RefreshKind::Account, outcome);
            outcome
        })
    }

    /// Generations are assigned here, before spawning, so trigger order
    /// decides which result is kept.
    fn refresh_bond(self: &Arc<Self>, bond: BondId) -> JoinHandle<BondRefresh> {
        let session = self.session.current();
        let input = self.inputs.lock().get(&bond).cloned().unwrap_or_default();
        {
            let mut state = self.state.lock();
            state.cache_network = Some(session.network);
            state.status.bond_refreshes += 1;
        }
        let refresh = self.pipeline.refresh_bond_position(
            bond,
            input,
            session.connected_account(),
            session.network,
            Arc::clone(&session.provider),
        );
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = refresh.await;
            inner.record(RefreshKind::Bond, outcome.quote);
            inner.record(RefreshKind::Bond, outcome.position);
            outcome
        })
    }

    fn refresh_bonds(self: &Arc<Self>) {
        for bond in self.bonds.enabled().to_vec() {
            self.refresh_bond(bond);
        }
    }

    /// Protocol-wide data, loaded independently of any wallet.
    fn load_app(self: &Arc<Self>) {
        self.refresh_metrics();
        self.refresh_bonds();
    }

    /// Account-level data, plus protocol data unless it is already loading
    /// for the session's network.
    fn load_account(self: &Arc<Self>) {
        let network = self.session.current().network;
        let metrics_network = self.state.lock().metrics_network;
        if metrics_network != Some(network) {
            self.refresh_metrics();
        }
        self.refresh_account();
        self.refresh_bonds();
    }

    fn reset_cache(&self) {
        self.store.invalidate();
        let mut state = self.state.lock();
        state.metrics_network = None;
        state.cache_network = None;
    }

    fn on_notice(self: &Arc<Self>, notice: SessionNotice) {
        match notice {
            SessionNotice::Connected(session) => {
                let cached = self.state.lock().cache_network;
                if cached.is_some_and(|network| network != session.network) {
                    info!(
                        from = ?cached,
                        to = ?session.network,
                        "wallet on another network; rebuilding cache"
                    );
                    self.reset_cache();
                }
                info!(network = ?session.network, "loading account after connect");
                self.load_account();
            }
            SessionNotice::Disconnected => {
                self.reset_cache();
                self.load_app();
            }
            SessionNotice::Invalidated { reason, session } => {
                info!(?reason, network = ?session.network, "rebuilding cache");
                self.reset_cache();
                self.load_account();
            }
        }
    }
}

async fn run_loop(
    inner: Arc<ClientInner>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    mut notices: broadcast::Receiver<SessionNotice>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => inner.on_notice(notice),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session notices lagged; rebuilding cache");
                    inner.reset_cache();
                    inner.load_account();
                }
                Err(RecvError::Closed) => break,
            },
            command = commands.recv() => match command {
                Some(ClientCommand::Wallet(event)) => {
                    let outcome = inner.session.handle_event(event).await;
                    if outcome == EventOutcome::Rejected {
                        error!(?event, "wallet switched to an unsupported network");
                    } else {
                        debug!(?event, ?outcome, "wallet event handled");
                    }
                }
                None => break,
            },
        }
    }
    debug!("bond client event loop stopped");
}

async fn watch_blocks(
    inner: Arc<ClientInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_seen: Option<(NetworkId, u64)> = None;

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let session = inner.session.current();
        let block = match session.provider.chain().block_number().await {
            Ok(block) => block,
            Err(error) => {
                warn!(network = ?session.network, %error, "block poll failed");
                continue;
            }
        };
        let advanced = match last_seen {
            Some((network, last)) if network == session.network => block > last,
            _ => false,
        };
        if last_seen.map_or(true, |(network, last)| network != session.network || block > last) {
            last_seen = Some((session.network, block));
        }
        inner.state.lock().status.last_block = Some(block);

        if advanced {
            debug!(block, network = ?session.network, "new block; refreshing");
            inner.refresh_metrics();
            inner.refresh_bonds();
        }
    }
}
