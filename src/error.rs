use thiserror::Error;

use crate::bond::BondError;
use crate::config::ConfigError;
use crate::contracts::ContractError;
use crate::oracle::OracleError;
use crate::session::SessionError;
use crate::stake::StakeError;

/// Errors surfaced by [`crate::client::BondClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Bond(#[from] BondError),
    #[error(transparent)]
    Stake(#[from] StakeError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("wallet is not connected")]
    NotConnected,
    #[error("bond client stopped")]
    Stopped,
}

impl ClientError {
    /// Stable code describing the error category.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Session(SessionError::UnsupportedNetwork { .. }) => "UNSUPPORTED_NETWORK",
            ClientError::Session(SessionError::Wallet(_)) => "WALLET_UNAVAILABLE",
            ClientError::Session(SessionError::Provider(_)) => "CONTRACT_CALL_FAILED",
            ClientError::Bond(BondError::InvalidAmount(_))
            | ClientError::Stake(StakeError::InvalidAmount(_)) => "INVALID_AMOUNT",
            ClientError::Bond(BondError::UnsupportedBond(_)) => "UNSUPPORTED_BOND",
            ClientError::Bond(BondError::ResetNotConfirmed { .. }) => "RESET_NOT_CONFIRMED",
            ClientError::Bond(BondError::PriceOutOfRange { .. }) => "PRICE_OUT_OF_RANGE",
            ClientError::Bond(BondError::ContractCallFailed(_))
            | ClientError::Stake(StakeError::ContractCallFailed(_))
            | ClientError::Contract(_) => "CONTRACT_CALL_FAILED",
            ClientError::Config(_) => "INVALID_CONFIG",
            ClientError::Oracle(_) => "PRICE_ORACLE_UNAVAILABLE",
            ClientError::NotConnected => "NOT_CONNECTED",
            ClientError::Stopped => "CLIENT_STOPPED",
        }
    }

    /// User-facing message for the error.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Session(SessionError::UnsupportedNetwork { chain_id }) => {
                format!("wallet is on unsupported chain {chain_id}")
            }
            ClientError::Bond(BondError::InvalidAmount(amount))
            | ClientError::Stake(StakeError::InvalidAmount(amount)) => {
                if amount.trim().is_empty() {
                    "enter an amount".to_string()
                } else {
                    format!("`{amount}` is not a valid amount")
                }
            }
            ClientError::Bond(BondError::ResetNotConfirmed { .. }) => {
                "bonding again will reset the vesting of your existing bond".to_string()
            }
            ClientError::Bond(BondError::ContractCallFailed(ContractError::TransactionFailed(
                hash,
            )))
            | ClientError::Stake(StakeError::ContractCallFailed(
                ContractError::TransactionFailed(hash),
            ))
            | ClientError::Contract(ContractError::TransactionFailed(hash)) => {
                format!("transaction {hash} was reverted")
            }
            other => other.to_string(),
        }
    }

    /// Suggested remediation hints for the user.
    pub fn hints(&self) -> Vec<String> {
        match self.code() {
            "UNSUPPORTED_NETWORK" => {
                vec!["Switch the wallet to a supported network and connect again.".to_string()]
            }
            "INVALID_AMOUNT" => vec!["Enter a positive decimal amount.".to_string()],
            "UNSUPPORTED_BOND" => vec!["Pick one of the enabled bonds.".to_string()],
            "RESET_NOT_CONFIRMED" => vec![
                "Redeem the existing bond first, or confirm the reset and retry.".to_string(),
            ],
            "PRICE_OUT_OF_RANGE" => {
                vec!["The depository reported an unusable bond price; retry later.".to_string()]
            }
            "CONTRACT_CALL_FAILED" => {
                vec!["Check the wallet connection and retry the transaction.".to_string()]
            }
            "NOT_CONNECTED" | "WALLET_UNAVAILABLE" => {
                vec!["Connect a wallet before submitting transactions.".to_string()]
            }
            _ => Vec::new(),
        }
    }
}
