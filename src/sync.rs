//! Refresh flows that pull on-chain state into the [`SyncStore`].
//!
//! The three flows touch disjoint cache regions and may run concurrently.
//! Read failures never escape a refresh: they are logged, the previous cached
//! values stay in place and the loading flags are cleared.

use std::future::Future;
use std::sync::Arc;

use futures::future::join;
use thiserror::Error;
use tracing::{debug, warn};

use crate::address_book::{AccountAddress, AddressBook, ContractName};
use crate::bond::{BondEngine, BondId};
use crate::contracts::{ContractClients, ContractError, Provider};
use crate::network::{next_rebase_block, NetworkId, RESERVE_DECIMALS, TOKEN_DECIMALS};
use crate::oracle::PriceOracle;
use crate::protocol::{
    fetch_market_price, five_day_rate, staking_apy, staking_rebase, treasury_balance,
};
use crate::store::{AccountBalances, Commit, ProtocolMetrics, SyncStore, Ticket};
use crate::units::format_units;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// What a refresh did to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Preconditions were not met; nothing was fetched.
    Skipped,
    /// Fetched, but a newer refresh for the same key had already settled.
    Superseded,
    Failed,
}

impl From<Commit> for RefreshOutcome {
    fn from(commit: Commit) -> Self {
        match commit {
            Commit::Applied => RefreshOutcome::Updated,
            Commit::Stale => RefreshOutcome::Superseded,
        }
    }
}

/// Outcome of the two halves of a bond refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BondRefresh {
    pub quote: RefreshOutcome,
    pub position: RefreshOutcome,
}

impl BondRefresh {
    const SKIPPED: BondRefresh = BondRefresh {
        quote: RefreshOutcome::Skipped,
        position: RefreshOutcome::Skipped,
    };
}

pub struct SyncPipeline {
    book: Arc<AddressBook>,
    oracle: Arc<PriceOracle>,
    bonds: Arc<BondEngine>,
    store: Arc<SyncStore>,
    reserve_symbol: String,
}

impl SyncPipeline {
    pub fn new(
        book: Arc<AddressBook>,
        oracle: Arc<PriceOracle>,
        bonds: Arc<BondEngine>,
        store: Arc<SyncStore>,
        reserve_symbol: impl Into<String>,
    ) -> Self {
        Self {
            book,
            oracle,
            bonds,
            store,
            reserve_symbol: reserve_symbol.into(),
        }
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    fn clients(&self, network: NetworkId, provider: Arc<dyn Provider>) -> ContractClients {
        ContractClients::new(Arc::clone(&self.book), network, provider)
    }

    pub async fn refresh_protocol_metrics(
        &self,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> RefreshOutcome {
        if !self.book.has_network(network) {
            debug!(?network, "no contracts for network; skipping protocol metrics");
            return RefreshOutcome::Skipped;
        }
        let ticket = self.store.begin_metrics();
        match self.fetch_metrics(network, provider).await {
            Ok(metrics) => self.store.commit_metrics(ticket, metrics).into(),
            Err(error) => {
                warn!(?network, %error, "protocol metrics refresh failed");
                self.store.fail_metrics(ticket);
                RefreshOutcome::Failed
            }
        }
    }

    async fn fetch_metrics(
        &self,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<ProtocolMetrics, SyncError> {
        let clients = self.clients(network, provider);
        let chain = clients.chain();
        let current_block = chain.block_number().await?;
        let current_block_time = chain.block_timestamp(current_block).await?;

        let staking = clients.staking()?;
        let epoch = staking.epoch().await?;
        let index = staking.index().await?;
        let circulating_supply = clients.memo_supply()?.circulating_supply().await?;

        let treasury = clients.address(ContractName::Treasury)?;
        let pair = clients.address(ContractName::LiquidityPair)?;
        let stable_reserve = clients
            .token(ContractName::MimToken)?
            .balance_of(treasury)
            .await?;
        let lp_amount = clients
            .token(ContractName::LiquidityPair)?
            .balance_of(treasury)
            .await?;
        let calculator = clients.bonding_calculator()?;
        let lp_valuation = calculator.valuation(pair, lp_amount).await?;
        let lp_markdown = calculator.markdown(pair).await?;

        let market_price = fetch_market_price(&clients, &self.oracle, &self.reserve_symbol).await?;

        let rebase = staking_rebase(epoch.distribute, circulating_supply);
        Ok(ProtocolMetrics {
            market_price,
            treasury_balance: treasury_balance(stable_reserve, lp_valuation, lp_markdown),
            staking_apy: staking_apy(rebase),
            staking_rebase: rebase,
            five_day_rate: five_day_rate(rebase),
            current_index: format_units(index, TOKEN_DECIMALS),
            circulating_supply: format_units(circulating_supply, TOKEN_DECIMALS),
            current_block,
            current_block_time,
            next_rebase_block: next_rebase_block(current_block),
            next_rebase: epoch.end_time,
            loading: false,
        })
    }

    /// Refresh balances and staking allowances of `address`. Skipped without
    /// an account.
    pub async fn refresh_account_balances(
        &self,
        address: Option<AccountAddress>,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> RefreshOutcome {
        let Some(address) = address.filter(|address| !address.is_zero()) else {
            return RefreshOutcome::Skipped;
        };
        let ticket = self.store.begin_account(address);
        match self.fetch_account(address, network, provider).await {
            Ok(balances) => self.store.commit_account(ticket, balances).into(),
            Err(error) => {
                warn!(%address, ?network, %error, "account balance refresh failed");
                self.store.fail_account(ticket);
                RefreshOutcome::Failed
            }
        }
    }

    async fn fetch_account(
        &self,
        address: AccountAddress,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<AccountBalances, SyncError> {
        let clients = self.clients(network, provider);
        let time = clients.token(ContractName::TimeToken)?;
        let memo = clients.token(ContractName::MemoToken)?;
        let mim = clients.token(ContractName::MimToken)?;
        let staking = clients.address(ContractName::Staking)?;
        let staking_helper = clients.address(ContractName::StakingHelper)?;

        Ok(AccountBalances {
            account: address,
            mim_balance: format_units(mim.balance_of(address).await?, RESERVE_DECIMALS),
            memo_balance: format_units(memo.balance_of(address).await?, TOKEN_DECIMALS),
            time_balance: format_units(time.balance_of(address).await?, TOKEN_DECIMALS),
            stake_allowance: format_units(
                time.allowance(address, staking_helper).await?,
                TOKEN_DECIMALS,
            ),
            unstake_allowance: format_units(
                memo.allowance(address, staking).await?,
                TOKEN_DECIMALS,
            ),
            loading: false,
        })
    }

    /// Refresh the quote for `input` and, with an account, the user's
    /// position for `bond`.
    ///
    /// Generations are taken before the returned future is first polled, so
    /// call order decides which result wins, not completion order.
    pub fn refresh_bond_position(
        self: &Arc<Self>,
        bond: BondId,
        input: impl Into<String>,
        address: Option<AccountAddress>,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> impl Future<Output = BondRefresh> + Send + 'static {
        let input = input.into();
        let tickets = match self.bonds.ensure_enabled(bond) {
            Ok(()) => {
                let quote = self.store.begin_bond_quote(bond);
                let position = address
                    .filter(|address| !address.is_zero())
                    .map(|address| (address, self.store.begin_bond_position(bond)));
                Some((quote, position))
            }
            Err(error) => {
                warn!(%bond, %error, "refusing bond refresh");
                None
            }
        };
        let pipeline = Arc::clone(self);

        async move {
            let Some((quote_ticket, position_ticket)) = tickets else {
                return BondRefresh::SKIPPED;
            };
            let quote = pipeline.settle_quote(
                quote_ticket,
                bond,
                &input,
                network,
                Arc::clone(&provider),
            );
            let position = async {
                match position_ticket {
                    Some((address, ticket)) => {
                        pipeline
                            .settle_position(ticket, bond, address, network, Arc::clone(&provider))
                            .await
                    }
                    None => RefreshOutcome::Skipped,
                }
            };
            let (quote, position) = join(quote, position).await;
            BondRefresh { quote, position }
        }
    }

    async fn settle_quote(
        &self,
        ticket: Ticket,
        bond: BondId,
        input: &str,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> RefreshOutcome {
        match self.bonds.quote(bond, input, network, provider).await {
            Ok(quote) => {
                let outcome = self.store.commit_bond_quote(ticket, bond, input, quote).into();
                if outcome == RefreshOutcome::Superseded {
                    debug!(%bond, input, generation = ticket.generation(), "bond quote superseded");
                }
                outcome
            }
            Err(error) => {
                warn!(%bond, input, %error, "bond quote refresh failed");
                self.store.fail_bond_quote(ticket, bond);
                RefreshOutcome::Failed
            }
        }
    }

    async fn settle_position(
        &self,
        ticket: Ticket,
        bond: BondId,
        address: AccountAddress,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> RefreshOutcome {
        match self.bonds.user_position(bond, address, network, provider).await {
            Ok(position) => self.store.commit_bond_position(ticket, bond, position).into(),
            Err(error) => {
                warn!(%bond, %address, %error, "bond position refresh failed");
                self.store.fail_bond_position(ticket, bond);
                RefreshOutcome::Failed
            }
        }
    }
}
