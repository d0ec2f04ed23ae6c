//! Admission control for mutating user actions.
//!
//! Each logical action (approve, bond, redeem, stake) owns an
//! [`OperationKey`]. At most one operation per key is pending at any time;
//! there is no timeout, so an operation stays pending until its owner calls
//! [`PendingOperationTracker::complete`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bond::BondId;
use crate::contracts::{ChainReader, ContractError, ContractResult, TxHash, TxReceipt};

/// Label shown for an action while it is pending.
pub const PENDING_LABEL: &str = "Pending...";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn approve(bond: BondId) -> Self {
        Self(format!("approve_{bond}"))
    }

    pub fn bond(bond: BondId) -> Self {
        Self(format!("bond_{bond}"))
    }

    /// Claiming and claim-and-stake use distinct slots.
    pub fn redeem(bond: BondId, autostake: bool) -> Self {
        if autostake {
            Self(format!("redeem_bond_{bond}_autostake"))
        } else {
            Self(format!("redeem_bond_{bond}"))
        }
    }

    pub fn approve_staking() -> Self {
        Self("approve_staking".into())
    }

    pub fn approve_unstaking() -> Self {
        Self("approve_unstaking".into())
    }

    pub fn staking() -> Self {
        Self("staking".into())
    }

    pub fn unstaking() -> Self {
        Self("unstaking".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// An admitted operation awaiting confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOperation {
    pub key: OperationKey,
    pub description: String,
    pub tx_hash: Option<TxHash>,
    pub started_at: Instant,
}

#[derive(Debug, Default)]
pub struct PendingOperationTracker {
    entries: Mutex<HashMap<OperationKey, PendingOperation>>,
}

impl PendingOperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `key`, returning `false` without side effects if it is already
    /// pending.
    pub fn try_begin(&self, key: &OperationKey) -> bool {
        self.try_begin_with(key, key.as_str())
    }

    pub fn try_begin_with(&self, key: &OperationKey, description: impl Into<String>) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            debug!(%key, "operation already pending");
            return false;
        }
        entries.insert(
            key.clone(),
            PendingOperation {
                key: key.clone(),
                description: description.into(),
                tx_hash: None,
                started_at: Instant::now(),
            },
        );
        true
    }

    /// Record the transaction hash once the write has been submitted.
    pub fn attach_hash(&self, key: &OperationKey, hash: TxHash) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.tx_hash = Some(hash);
        }
    }

    /// Release `key`. Both outcomes free the slot so the action can run again.
    pub fn complete(&self, key: &OperationKey, outcome: Outcome) -> Option<PendingOperation> {
        let removed = self.entries.lock().remove(key);
        match (&removed, outcome) {
            (Some(entry), Outcome::Success) => {
                info!(%key, tx = ?entry.tx_hash, "operation confirmed")
            }
            (Some(entry), Outcome::Failure) => {
                warn!(%key, tx = ?entry.tx_hash, "operation failed")
            }
            (None, _) => debug!(%key, ?outcome, "completed operation was not pending"),
        }
        removed
    }

    pub fn is_pending(&self, key: &OperationKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn label_for(&self, key: &OperationKey, idle_label: &str) -> String {
        if self.is_pending(key) {
            PENDING_LABEL.to_string()
        } else {
            idle_label.to_string()
        }
    }

    /// Pending operations, oldest first.
    pub fn pending(&self) -> Vec<PendingOperation> {
        let mut pending: Vec<_> = self.entries.lock().values().cloned().collect();
        pending.sort_by_key(|entry| entry.started_at);
        pending
    }
}

/// Result of an admitted-or-refused transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed(TxReceipt),
    /// Another operation with the same key is still pending; nothing was sent.
    AlreadyPending,
}

impl TxStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxStatus::Confirmed(_))
    }
}

/// Run one write under `key`: admit it, submit, wait for the receipt and
/// release the slot with the matching outcome. `submit` is not polled when
/// the key is already pending.
pub async fn track_transaction<F>(
    tracker: &PendingOperationTracker,
    key: &OperationKey,
    description: String,
    chain: Arc<dyn ChainReader>,
    submit: F,
) -> ContractResult<TxStatus>
where
    F: Future<Output = ContractResult<TxHash>>,
{
    if !tracker.try_begin_with(key, description) {
        return Ok(TxStatus::AlreadyPending);
    }

    let hash = match submit.await {
        Ok(hash) => hash,
        Err(error) => {
            tracker.complete(key, Outcome::Failure);
            return Err(error);
        }
    };
    tracker.attach_hash(key, hash);
    debug!(%key, tx = %hash, "transaction submitted");

    match chain.wait_for_transaction(hash).await {
        Ok(receipt) if receipt.success => {
            tracker.complete(key, Outcome::Success);
            Ok(TxStatus::Confirmed(receipt))
        }
        Ok(_) => {
            tracker.complete(key, Outcome::Failure);
            Err(ContractError::TransactionFailed(hash))
        }
        Err(error) => {
            tracker.complete(key, Outcome::Failure);
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_book::AccountAddress;
    use crate::contracts::stub::StubProvider;
    use crate::contracts::Provider;

    #[test]
    fn second_begin_is_refused_until_completion() {
        let tracker = PendingOperationTracker::new();
        let key = OperationKey::bond(BondId::Mim);

        assert!(tracker.try_begin(&key));
        assert!(!tracker.try_begin(&key));
        assert!(tracker.complete(&key, Outcome::Success).is_some());
        assert!(tracker.try_begin(&key));
    }

    #[test]
    fn failure_releases_slot_for_retry() {
        let tracker = PendingOperationTracker::new();
        let key = OperationKey::approve(BondId::Mim);

        assert!(tracker.try_begin(&key));
        tracker.complete(&key, Outcome::Failure);
        assert!(!tracker.is_pending(&key));
        assert!(tracker.try_begin(&key));
    }

    #[test]
    fn redeem_variants_use_separate_slots() {
        let tracker = PendingOperationTracker::new();
        let claim = OperationKey::redeem(BondId::Mim, false);
        let autostake = OperationKey::redeem(BondId::Mim, true);

        assert_eq!(claim.as_str(), "redeem_bond_mim");
        assert_eq!(autostake.as_str(), "redeem_bond_mim_autostake");
        assert!(tracker.try_begin(&claim));
        assert!(tracker.try_begin(&autostake));
    }

    #[test]
    fn labels_follow_pending_state() {
        let tracker = PendingOperationTracker::new();
        let key = OperationKey::bond(BondId::Mim);

        assert_eq!(tracker.label_for(&key, "Bond"), "Bond");
        tracker.try_begin_with(&key, "Bonding MIM");
        assert_eq!(tracker.label_for(&key, "Bond"), PENDING_LABEL);

        let hash = TxHash([7u8; 32]);
        tracker.attach_hash(&key, hash);
        let pending = tracker.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].description, "Bonding MIM");
        assert_eq!(pending[0].tx_hash, Some(hash));

        tracker.complete(&key, Outcome::Success);
        assert_eq!(tracker.label_for(&key, "Bond"), "Bond");
    }

    #[test]
    fn completing_unknown_key_is_harmless() {
        let tracker = PendingOperationTracker::new();
        assert!(tracker
            .complete(&OperationKey::staking(), Outcome::Failure)
            .is_none());
    }

    #[tokio::test]
    async fn receipt_wait_keeps_slot_pending() {
        let chain = StubProvider::default();
        let wallet = chain.with_signer(AccountAddress::new([1; 20]));
        let gate = chain.hold_transactions();
        let tracker = Arc::new(PendingOperationTracker::new());
        let key = OperationKey::staking();

        let task = {
            let tracker = Arc::clone(&tracker);
            let key = key.clone();
            let wallet = wallet.clone();
            tokio::spawn(async move {
                let token = wallet.erc20(AccountAddress::new([9; 20]));
                track_transaction(
                    &tracker,
                    &key,
                    "Staking".into(),
                    wallet.chain(),
                    token.approve(AccountAddress::new([2; 20]), 1),
                )
                .await
            })
        };

        while chain.call_count("wait_for_transaction") == 0 {
            tokio::task::yield_now().await;
        }
        assert!(tracker.is_pending(&key));
        assert!(tracker.pending()[0].tx_hash.is_some());

        gate.notify_one();
        let status = task.await.expect("join").expect("confirmed");
        assert!(status.is_confirmed());
        assert!(!tracker.is_pending(&key));
    }

    #[tokio::test]
    async fn refused_submission_is_never_polled() {
        let chain = StubProvider::default();
        let wallet = chain.with_signer(AccountAddress::new([1; 20]));
        let tracker = PendingOperationTracker::new();
        let key = OperationKey::unstaking();
        assert!(tracker.try_begin(&key));

        let token = wallet.erc20(AccountAddress::new([9; 20]));
        let status = track_transaction(
            &tracker,
            &key,
            "Unstaking".into(),
            wallet.chain(),
            token.approve(AccountAddress::new([2; 20]), 1),
        )
        .await
        .expect("refusal is not an error");
        assert_eq!(status, TxStatus::AlreadyPending);
        assert!(chain.transactions().is_empty());
    }
}
