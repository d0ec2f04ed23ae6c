//! Scriptable wallet connector for tests and local harnesses.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{SessionError, WalletConnector};
use crate::address_book::AccountAddress;
use crate::contracts::stub::StubProvider;
use crate::contracts::Provider;

#[derive(Default)]
struct MockState {
    provider: Option<StubProvider>,
    cached: bool,
    cached_account: Option<AccountAddress>,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
    connects: usize,
}

/// Hands out a configured [`StubProvider`] as the user's chosen wallet.
///
/// A successful connect marks the wallet as remembered, mirroring wallets
/// that cache the user's choice.
#[derive(Default)]
pub struct MockWalletConnector {
    state: Mutex<MockState>,
}

impl MockWalletConnector {
    pub fn new(provider: StubProvider) -> Self {
        Self {
            state: Mutex::new(MockState {
                provider: Some(provider),
                ..MockState::default()
            }),
        }
    }

    /// Wallet handed out by subsequent connects.
    pub fn set_provider(&self, provider: StubProvider) {
        self.state.lock().provider = Some(provider);
    }

    /// Fail the next connect as if the user dismissed the wallet prompt.
    pub fn fail_next(&self, reason: &str) {
        self.state.lock().failure = Some(reason.to_string());
    }

    /// Pause connects until the returned handle is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn remember(&self, account: Option<AccountAddress>) {
        let mut state = self.state.lock();
        state.cached = true;
        state.cached_account = account;
    }

    pub fn forget(&self) {
        let mut state = self.state.lock();
        state.cached = false;
        state.cached_account = None;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }
}

#[async_trait]
impl WalletConnector for MockWalletConnector {
    async fn connect(&self) -> Result<Arc<dyn Provider>, SessionError> {
        let gate = {
            let mut state = self.state.lock();
            state.connects += 1;
            state.gate.take()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if let Some(reason) = state.failure.take() {
            return Err(SessionError::Wallet(reason));
        }
        let provider = state
            .provider
            .clone()
            .ok_or_else(|| SessionError::Wallet("no wallet available".into()))?;
        state.cached = true;
        Ok(Arc::new(provider))
    }

    fn has_cached_provider(&self) -> bool {
        self.state.lock().cached
    }

    fn cached_account(&self) -> Option<AccountAddress> {
        self.state.lock().cached_account
    }

    fn clear_cached_provider(&self) {
        self.forget();
    }
}
