//! Contract boundary.
//!
//! Every on-chain contract is reached through a typed async trait. A
//! [`Provider`] hands out clients bound to a concrete address, and
//! [`ContractClients`] resolves logical contract names through the
//! [`AddressBook`] for the active network. ABI encoding and transport live
//! behind these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::address_book::{AccountAddress, AddressBook, AddressBookError, ContractName};
use crate::bond::BondId;
use crate::network::NetworkId;

pub mod stub;

/// Transaction hash returned by write calls.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Outcome of a mined transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContractError {
    /// Networking or RPC failure before the call reached the contract.
    #[error("transport error: {0}")]
    Transport(String),
    /// The contract rejected the call.
    #[error("call `{method}` reverted: {reason}")]
    Reverted { method: String, reason: String },
    /// The transaction was mined but did not succeed.
    #[error("transaction {0} reverted on chain")]
    TransactionFailed(TxHash),
    #[error("provider has no signer attached")]
    NoSigner,
    #[error(transparent)]
    AddressBook(#[from] AddressBookError),
}

impl ContractError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn reverted(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reverted {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

pub type ContractResult<T> = Result<T, ContractError>;

/// Staking epoch as reported by the staking contract.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Epoch {
    pub length: u64,
    pub number: u64,
    pub end_time: u64,
    /// Protocol tokens distributed at the next rebase (9 decimals).
    pub distribute: u128,
}

/// Bond depository terms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BondTerms {
    pub control_variable: u128,
    /// Vesting length in blocks.
    pub vesting_term: u64,
    pub minimum_price: u128,
    pub max_payout: u128,
    pub fee: u128,
    pub max_debt: u128,
}

/// Bond position recorded for a depositor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BondInfo {
    /// Protocol tokens still owed (9 decimals).
    pub payout: u128,
    /// Blocks left to vest.
    pub vesting: u64,
    pub last_block: u64,
    pub price_paid: u128,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> ContractResult<u64>;
    async fn block_number(&self) -> ContractResult<u64>;
    async fn block_timestamp(&self, block: u64) -> ContractResult<u64>;
    /// Account of the attached signer; fails with [`ContractError::NoSigner`]
    /// on read-only providers.
    async fn signer_address(&self) -> ContractResult<AccountAddress>;
    async fn wait_for_transaction(&self, hash: TxHash) -> ContractResult<TxReceipt>;
}

#[async_trait]
pub trait Erc20Contract: Send + Sync {
    async fn balance_of(&self, owner: AccountAddress) -> ContractResult<u128>;
    async fn allowance(&self, owner: AccountAddress, spender: AccountAddress)
        -> ContractResult<u128>;
    async fn approve(&self, spender: AccountAddress, amount: u128) -> ContractResult<TxHash>;
}

#[async_trait]
pub trait StakedTokenContract: Send + Sync {
    async fn circulating_supply(&self) -> ContractResult<u128>;
}

#[async_trait]
pub trait StakingContract: Send + Sync {
    async fn epoch(&self) -> ContractResult<Epoch>;
    async fn index(&self) -> ContractResult<u128>;
    async fn unstake(&self, amount: u128, trigger: bool) -> ContractResult<TxHash>;
}

#[async_trait]
pub trait StakingHelperContract: Send + Sync {
    async fn stake(&self, amount: u128, recipient: AccountAddress) -> ContractResult<TxHash>;
}

#[async_trait]
pub trait BondingCalculatorContract: Send + Sync {
    async fn valuation(&self, pair: AccountAddress, amount: u128) -> ContractResult<u128>;
    async fn markdown(&self, pair: AccountAddress) -> ContractResult<u128>;
}

#[async_trait]
pub trait LiquidityPairContract: Send + Sync {
    /// Pair reserves as `(reserve stablecoin, protocol token)`.
    async fn get_reserves(&self) -> ContractResult<(u128, u128)>;
}

#[async_trait]
pub trait BondDepositoryContract: Send + Sync {
    async fn terms(&self) -> ContractResult<BondTerms>;
    async fn max_payout(&self) -> ContractResult<u128>;
    async fn bond_price(&self) -> ContractResult<u128>;
    async fn bond_price_in_usd(&self) -> ContractResult<u128>;
    async fn standardized_debt_ratio(&self) -> ContractResult<u128>;
    async fn payout_for(&self, value: u128) -> ContractResult<u128>;
    async fn bond_info(&self, depositor: AccountAddress) -> ContractResult<BondInfo>;
    async fn pending_payout_for(&self, depositor: AccountAddress) -> ContractResult<u128>;
    async fn deposit(
        &self,
        amount: u128,
        max_price: u128,
        depositor: AccountAddress,
    ) -> ContractResult<TxHash>;
    async fn redeem(&self, recipient: AccountAddress, stake: bool) -> ContractResult<TxHash>;
}

/// Signer-backed or read-only connection to a chain.
///
/// Clients returned by a read-only provider fail write calls with
/// [`ContractError::NoSigner`].
pub trait Provider: Send + Sync {
    fn chain(&self) -> Arc<dyn ChainReader>;
    fn erc20(&self, address: AccountAddress) -> Arc<dyn Erc20Contract>;
    fn staked_token(&self, address: AccountAddress) -> Arc<dyn StakedTokenContract>;
    fn staking(&self, address: AccountAddress) -> Arc<dyn StakingContract>;
    fn staking_helper(&self, address: AccountAddress) -> Arc<dyn StakingHelperContract>;
    fn bonding_calculator(&self, address: AccountAddress) -> Arc<dyn BondingCalculatorContract>;
    fn liquidity_pair(&self, address: AccountAddress) -> Arc<dyn LiquidityPairContract>;
    fn bond_depository(&self, address: AccountAddress) -> Arc<dyn BondDepositoryContract>;
}

/// Builds a read-only provider for a network, used while no wallet is connected.
pub trait ReadProviderFactory: Send + Sync {
    fn read_provider(&self, network: NetworkId) -> Arc<dyn Provider>;
}

/// Contract clients bound to one network and provider.
#[derive(Clone)]
pub struct ContractClients {
    book: Arc<AddressBook>,
    network: NetworkId,
    provider: Arc<dyn Provider>,
}

impl ContractClients {
    pub fn new(book: Arc<AddressBook>, network: NetworkId, provider: Arc<dyn Provider>) -> Self {
        Self {
            book,
            network,
            provider,
        }
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    pub fn address(&self, name: ContractName) -> ContractResult<AccountAddress> {
        Ok(self.book.resolve(self.network, name)?)
    }

    pub fn chain(&self) -> Arc<dyn ChainReader> {
        self.provider.chain()
    }

    pub fn token(&self, name: ContractName) -> ContractResult<Arc<dyn Erc20Contract>> {
        Ok(self.provider.erc20(self.address(name)?))
    }

    pub fn memo_supply(&self) -> ContractResult<Arc<dyn StakedTokenContract>> {
        Ok(self
            .provider
            .staked_token(self.address(ContractName::MemoToken)?))
    }

    pub fn staking(&self) -> ContractResult<Arc<dyn StakingContract>> {
        Ok(self.provider.staking(self.address(ContractName::Staking)?))
    }

    pub fn staking_helper(&self) -> ContractResult<Arc<dyn StakingHelperContract>> {
        Ok(self
            .provider
            .staking_helper(self.address(ContractName::StakingHelper)?))
    }

    pub fn bonding_calculator(&self) -> ContractResult<Arc<dyn BondingCalculatorContract>> {
        Ok(self
            .provider
            .bonding_calculator(self.address(ContractName::BondingCalculator)?))
    }

    pub fn liquidity_pair(&self) -> ContractResult<Arc<dyn LiquidityPairContract>> {
        Ok(self
            .provider
            .liquidity_pair(self.address(ContractName::LiquidityPair)?))
    }

    pub fn bond(&self, bond: BondId) -> ContractResult<Arc<dyn BondDepositoryContract>> {
        Ok(self
            .provider
            .bond_depository(self.address(ContractName::BondDepository(bond))?))
    }

    /// Address of the asset deposited into `bond`.
    pub fn reserve_address(&self, bond: BondId) -> ContractResult<AccountAddress> {
        Ok(self.book.address_for_asset(bond, self.network)?)
    }

    pub fn reserve(&self, bond: BondId) -> ContractResult<Arc<dyn Erc20Contract>> {
        Ok(self.provider.erc20(self.reserve_address(bond)?))
    }
}

impl fmt::Debug for ContractClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractClients")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}
