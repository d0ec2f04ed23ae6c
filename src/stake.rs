//! Stake and unstake transactions against the staking contracts.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::address_book::{AddressBook, ContractName};
use crate::contracts::{ContractClients, ContractError, Provider};
use crate::network::{NetworkId, TOKEN_DECIMALS};
use crate::pending::{track_transaction, OperationKey, PendingOperationTracker, TxStatus};
use crate::units::{parse_units, MAX_ALLOWANCE};

#[derive(Clone, Debug, PartialEq, Error)]
pub enum StakeError {
    #[error("invalid amount `{0}`")]
    InvalidAmount(String),
    #[error("contract call failed: {0}")]
    ContractCallFailed(#[from] ContractError),
}

/// Direction of a staking approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StakeAction {
    /// Base token into the staking helper.
    Stake,
    /// Staked token back into the staking contract.
    Unstake,
}

impl StakeAction {
    fn approval_key(self) -> OperationKey {
        match self {
            StakeAction::Stake => OperationKey::approve_staking(),
            StakeAction::Unstake => OperationKey::approve_unstaking(),
        }
    }

    fn token_and_spender(self) -> (ContractName, ContractName) {
        match self {
            StakeAction::Stake => (ContractName::TimeToken, ContractName::StakingHelper),
            StakeAction::Unstake => (ContractName::MemoToken, ContractName::Staking),
        }
    }
}

fn parse_stake_amount(amount: &str) -> Result<u128, StakeError> {
    parse_units(amount, TOKEN_DECIMALS)
        .filter(|value| *value > 0)
        .ok_or_else(|| StakeError::InvalidAmount(amount.to_string()))
}

pub struct StakeEngine {
    book: Arc<AddressBook>,
    tracker: Arc<PendingOperationTracker>,
}

impl StakeEngine {
    pub fn new(book: Arc<AddressBook>, tracker: Arc<PendingOperationTracker>) -> Self {
        Self { book, tracker }
    }

    pub async fn approve(
        &self,
        action: StakeAction,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<TxStatus, StakeError> {
        let clients = ContractClients::new(Arc::clone(&self.book), network, provider);
        let (token_name, spender_name) = action.token_and_spender();
        let token = clients.token(token_name)?;
        let spender = clients.address(spender_name)?;
        let description = match action {
            StakeAction::Stake => "Approving staking",
            StakeAction::Unstake => "Approving unstaking",
        };

        let status = track_transaction(
            &self.tracker,
            &action.approval_key(),
            description.to_string(),
            clients.chain(),
            token.approve(spender, MAX_ALLOWANCE),
        )
        .await?;
        Ok(status)
    }

    pub async fn stake(
        &self,
        amount: &str,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<TxStatus, StakeError> {
        let value = parse_stake_amount(amount)?;
        let key = OperationKey::staking();
        if self.tracker.is_pending(&key) {
            return Ok(TxStatus::AlreadyPending);
        }
        let clients = ContractClients::new(Arc::clone(&self.book), network, provider);
        let recipient = clients.chain().signer_address().await?;
        let helper = clients.staking_helper()?;
        info!(%recipient, amount, "submitting stake");

        let status = track_transaction(
            &self.tracker,
            &key,
            format!("Staking {amount} TIME"),
            clients.chain(),
            helper.stake(value, recipient),
        )
        .await?;
        Ok(status)
    }

    pub async fn unstake(
        &self,
        amount: &str,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<TxStatus, StakeError> {
        let value = parse_stake_amount(amount)?;
        let clients = ContractClients::new(Arc::clone(&self.book), network, provider);
        let staking = clients.staking()?;
        info!(amount, "submitting unstake");

        let status = track_transaction(
            &self.tracker,
            &OperationKey::unstaking(),
            format!("Unstaking {amount} MEMO"),
            clients.chain(),
            staking.unstake(value, true),
        )
        .await?;
        Ok(status)
    }
}
