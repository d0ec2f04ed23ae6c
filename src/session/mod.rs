//! Wallet connection state machine.
//!
//! The live [`Session`] is published through a `watch` channel and replaced
//! wholesale on every transition, so readers never observe a half-updated
//! session. Transitions (connect, disconnect, wallet events) are serialized
//! behind one async lock.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::address_book::AccountAddress;
use crate::contracts::{ContractError, Provider, ReadProviderFactory};
use crate::network::NetworkId;

pub mod mock;

const NOTICE_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    SwitchingNetwork,
}

/// Snapshot of the wallet session.
#[derive(Clone)]
pub struct Session {
    pub network: NetworkId,
    pub account: Option<AccountAddress>,
    pub state: ConnectionState,
    /// Signer-backed when connected, read-only otherwise.
    pub provider: Arc<dyn Provider>,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The account, only while the session is connected.
    pub fn connected_account(&self) -> Option<AccountAddress> {
        self.account.filter(|_| self.is_connected())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("network", &self.network)
            .field("account", &self.account)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Events raised by the wallet provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    AccountsChanged(Option<AccountAddress>),
    ChainChanged(u64),
    /// Provider-level network change. `old` is absent on the initial report.
    NetworkChanged { new: u64, old: Option<u64> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidationReason {
    AccountChanged,
    NetworkChanged(NetworkId),
}

/// Broadcast to subscribers after a transition completes.
#[derive(Clone, Debug)]
pub enum SessionNotice {
    Connected(Arc<Session>),
    Disconnected,
    /// Every cached value derived from the previous session is void.
    Invalidated {
        reason: InvalidationReason,
        session: Arc<Session>,
    },
}

/// How an inbound wallet event was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored,
    Invalidated,
    Disconnected,
    /// The wallet moved to an unsupported chain; the session stays put.
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SessionError {
    #[error("chain {chain_id} is not supported")]
    UnsupportedNetwork { chain_id: u64 },
    #[error("wallet connection failed: {0}")]
    Wallet(String),
    #[error("provider query failed: {0}")]
    Provider(#[from] ContractError),
}

/// External wallet-selection flow.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Let the user pick a wallet and return a signer-backed provider.
    async fn connect(&self) -> Result<Arc<dyn Provider>, SessionError>;
    /// Whether a previously chosen wallet is remembered.
    fn has_cached_provider(&self) -> bool;
    /// Account recorded with the remembered wallet, if any.
    fn cached_account(&self) -> Option<AccountAddress>;
    fn clear_cached_provider(&self);
}

#[derive(Default)]
struct ConnectRecord {
    rounds: u64,
    last: Option<Result<Arc<Session>, SessionError>>,
}

pub struct ConnectionSession {
    connector: Arc<dyn WalletConnector>,
    read_providers: Arc<dyn ReadProviderFactory>,
    default_network: NetworkId,
    current: watch::Sender<Arc<Session>>,
    notices: broadcast::Sender<SessionNotice>,
    transition: AsyncMutex<()>,
    connects: Mutex<ConnectRecord>,
}

impl ConnectionSession {
    pub fn new(
        connector: Arc<dyn WalletConnector>,
        read_providers: Arc<dyn ReadProviderFactory>,
        default_network: NetworkId,
    ) -> Self {
        let initial = Session {
            network: default_network,
            account: None,
            state: ConnectionState::Disconnected,
            provider: read_providers.read_provider(default_network),
        };
        let (current, _) = watch::channel(Arc::new(initial));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            connector,
            read_providers,
            default_network,
            current,
            notices,
            transition: AsyncMutex::new(()),
            connects: Mutex::new(ConnectRecord::default()),
        }
    }

    pub fn current(&self) -> Arc<Session> {
        Arc::clone(&self.current.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Session>> {
        self.current.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    fn publish(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.current.send_replace(Arc::clone(&session));
        session
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn disconnected_session(&self) -> Session {
        Session {
            network: self.default_network,
            account: None,
            state: ConnectionState::Disconnected,
            provider: self.read_providers.read_provider(self.default_network),
        }
    }

    /// Connect through the wallet connector. Already connected sessions are
    /// returned as-is; callers that queued behind an in-flight connect get
    /// its result instead of starting a second wallet flow.
    pub async fn connect(&self) -> Result<Arc<Session>, SessionError> {
        let observed = self.connects.lock().rounds;
        let _transition = self.transition.lock().await;

        let current = self.current();
        if current.is_connected() {
            return Ok(current);
        }
        {
            let record = self.connects.lock();
            if record.rounds > observed {
                if let Some(result) = record.last.clone() {
                    return result;
                }
            }
        }

        self.publish(Session {
            state: ConnectionState::Connecting,
            ..(*current).clone()
        });
        let result = match self.establish().await {
            Ok(session) => {
                let session = self.publish(session);
                info!(
                    network = ?session.network,
                    account = ?session.account,
                    "wallet session connected"
                );
                self.notify(SessionNotice::Connected(Arc::clone(&session)));
                Ok(session)
            }
            Err(error) => {
                warn!(%error, "wallet connection failed");
                self.publish(Session {
                    state: ConnectionState::Disconnected,
                    ..(*current).clone()
                });
                Err(error)
            }
        };

        let mut record = self.connects.lock();
        record.rounds += 1;
        record.last = Some(result.clone());
        result
    }

    async fn establish(&self) -> Result<Session, SessionError> {
        let provider = self.connector.connect().await?;
        let chain = provider.chain();
        let chain_id = chain.chain_id().await?;
        let network = NetworkId::from_chain_id(chain_id);
        if !network.is_supported() {
            return Err(SessionError::UnsupportedNetwork { chain_id });
        }
        let account = chain.signer_address().await?;
        Ok(Session {
            network,
            account: Some(account),
            state: ConnectionState::Connected,
            provider,
        })
    }

    /// Reconnect at start-up when the wallet remembers a previous choice.
    pub async fn restore(&self) -> Result<Option<Arc<Session>>, SessionError> {
        if !self.connector.has_cached_provider() {
            debug!("no cached wallet to restore");
            return Ok(None);
        }
        self.connect().await.map(Some)
    }

    /// Forget the wallet and fall back to a read-only session.
    pub async fn disconnect(&self) -> Arc<Session> {
        let _transition = self.transition.lock().await;
        self.disconnect_locked()
    }

    fn disconnect_locked(&self) -> Arc<Session> {
        self.connector.clear_cached_provider();
        let session = self.publish(self.disconnected_session());
        info!("wallet session disconnected");
        self.notify(SessionNotice::Disconnected);
        session
    }

    pub async fn handle_event(&self, event: SessionEvent) -> EventOutcome {
        let _transition = self.transition.lock().await;
        let current = self.current();
        if !current.is_connected() {
            debug!(?event, "ignoring wallet event while disconnected");
            return EventOutcome::Ignored;
        }

        match event {
            SessionEvent::AccountsChanged(account) => self.accounts_changed(&current, account),
            SessionEvent::ChainChanged(chain_id) => self.chain_changed(&current, chain_id),
            SessionEvent::NetworkChanged { old: None, .. } => EventOutcome::Ignored,
            SessionEvent::NetworkChanged { new, old: Some(_) } => {
                self.chain_changed(&current, new)
            }
        }
    }

    fn accounts_changed(&self, current: &Session, account: Option<AccountAddress>) -> EventOutcome {
        let echo = account == current.account
            || (self.connector.has_cached_provider()
                && self.connector.cached_account() == current.account);
        if echo {
            debug!(?account, "ignoring account echo");
            return EventOutcome::Ignored;
        }

        let Some(account) = account else {
            self.disconnect_locked();
            return EventOutcome::Disconnected;
        };
        let session = self.publish(Session {
            account: Some(account),
            ..current.clone()
        });
        info!(%account, "wallet account changed");
        self.notify(SessionNotice::Invalidated {
            reason: InvalidationReason::AccountChanged,
            session,
        });
        EventOutcome::Invalidated
    }

    fn chain_changed(&self, current: &Session, chain_id: u64) -> EventOutcome {
        let network = NetworkId::from_chain_id(chain_id);
        if network == current.network {
            return EventOutcome::Ignored;
        }
        if !network.is_supported() {
            warn!(chain_id, current = ?current.network, "rejecting switch to unsupported chain");
            return EventOutcome::Rejected;
        }

        self.publish(Session {
            state: ConnectionState::SwitchingNetwork,
            ..current.clone()
        });
        let session = self.publish(Session {
            network,
            state: ConnectionState::Connected,
            ..current.clone()
        });
        info!(from = ?current.network, to = ?network, "wallet network switched");
        self.notify(SessionNotice::Invalidated {
            reason: InvalidationReason::NetworkChanged(network),
            session,
        });
        EventOutcome::Invalidated
    }
}
