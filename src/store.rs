//! In-memory cache for protocol, account and bond state.
//!
//! Writers never touch fields directly. Every refresh first takes a
//! [`Ticket`] for its cache key and later commits or fails that ticket. A
//! ticket only lands when it is newer than everything already settled for
//! the key and its epoch is still current, so results arriving out of order
//! or from an earlier session are discarded.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::address_book::AccountAddress;
use crate::bond::{BondId, BondQuote, UserBondPosition};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtocolMetrics {
    pub market_price: f64,
    pub treasury_balance: f64,
    pub staking_apy: f64,
    pub staking_rebase: f64,
    pub five_day_rate: f64,
    pub current_index: f64,
    pub circulating_supply: f64,
    pub current_block: u64,
    pub current_block_time: u64,
    pub next_rebase_block: u64,
    /// Epoch end time reported by the staking contract.
    pub next_rebase: u64,
    pub loading: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountBalances {
    pub account: AccountAddress,
    pub mim_balance: f64,
    pub memo_balance: f64,
    pub time_balance: f64,
    pub stake_allowance: f64,
    pub unstake_allowance: f64,
    pub loading: bool,
}

impl AccountBalances {
    pub fn empty(account: AccountAddress) -> Self {
        Self {
            account,
            mim_balance: 0.0,
            memo_balance: 0.0,
            time_balance: 0.0,
            stake_allowance: 0.0,
            unstake_allowance: 0.0,
            loading: false,
        }
    }
}

/// Cached pricing and user position for one bond.
#[derive(Clone, Debug, PartialEq)]
pub struct BondPosition {
    pub bond: BondId,
    /// Candidate input the quote fields were computed for.
    pub quoted_input: String,
    pub vesting_block: u64,
    pub bond_discount: f64,
    pub max_bond_price: f64,
    pub debt_ratio: f64,
    pub bond_quote: f64,
    pub bond_price: f64,
    pub market_price: f64,
    pub purchased: f64,
    pub exceeds_max_payout: bool,
    pub interest_due: f64,
    pub pending_payout: f64,
    pub wallet_balance: f64,
    pub allowance: f64,
    pub bond_maturation_block: u64,
    pub loading: bool,
}

impl BondPosition {
    pub fn new(bond: BondId) -> Self {
        Self {
            bond,
            quoted_input: String::new(),
            vesting_block: 0,
            bond_discount: 0.0,
            max_bond_price: 0.0,
            debt_ratio: 0.0,
            bond_quote: 0.0,
            bond_price: 0.0,
            market_price: 0.0,
            purchased: 0.0,
            exceeds_max_payout: false,
            interest_due: 0.0,
            pending_payout: 0.0,
            wallet_balance: 0.0,
            allowance: 0.0,
            bond_maturation_block: 0,
            loading: false,
        }
    }

    fn apply_quote(&mut self, input: &str, quote: BondQuote) {
        self.quoted_input = input.to_string();
        self.vesting_block = quote.vesting_term;
        self.bond_discount = quote.bond_discount;
        self.max_bond_price = quote.max_bond_price;
        self.debt_ratio = quote.debt_ratio;
        self.bond_quote = quote.bond_quote;
        self.bond_price = quote.bond_price;
        self.market_price = quote.market_price;
        self.purchased = quote.purchased;
        self.exceeds_max_payout = quote.exceeds_max_payout;
    }

    fn apply_user_position(&mut self, position: UserBondPosition) {
        self.interest_due = position.interest_due;
        self.pending_payout = position.pending_payout;
        self.bond_maturation_block = position.bond_maturation_block;
        self.wallet_balance = position.wallet_balance;
        self.allowance = position.allowance;
    }

    fn clear_user_position(&mut self) {
        self.apply_user_position(UserBondPosition::default());
    }
}

/// Handle identifying one refresh of one cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Whether a commit reached the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    Applied,
    Stale,
}

#[derive(Clone, Copy, Debug, Default)]
struct Generation {
    issued: u64,
    settled: u64,
}

impl Generation {
    fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn settle(&mut self, generation: u64) -> bool {
        if generation > self.settled {
            self.settled = generation;
            true
        } else {
            false
        }
    }

    fn in_flight(&self) -> bool {
        self.issued > self.settled
    }
}

#[derive(Debug)]
struct BondEntry {
    position: BondPosition,
    quote: Generation,
    user: Generation,
}

impl BondEntry {
    fn new(bond: BondId) -> Self {
        Self {
            position: BondPosition::new(bond),
            quote: Generation::default(),
            user: Generation::default(),
        }
    }

    fn sync_loading(&mut self) {
        self.position.loading = self.quote.in_flight() || self.user.in_flight();
    }
}

#[derive(Debug, Default)]
struct StoreState {
    /// Bumped on every full invalidation.
    network_epoch: u64,
    /// Bumped on invalidation and whenever the account goes away.
    account_epoch: u64,
    metrics: ProtocolMetrics,
    metrics_generation: Generation,
    metrics_loaded: bool,
    account: Option<AccountBalances>,
    account_generation: Generation,
    bonds: BTreeMap<BondId, BondEntry>,
}

impl StoreState {
    fn bond_entry(&mut self, bond: BondId) -> &mut BondEntry {
        self.bonds.entry(bond).or_insert_with(|| BondEntry::new(bond))
    }
}

#[derive(Debug, Default)]
pub struct SyncStore {
    state: RwLock<StoreState>,
}

impl SyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_metrics(&self) -> Ticket {
        let mut state = self.state.write();
        let generation = state.metrics_generation.issue();
        state.metrics.loading = true;
        Ticket {
            epoch: state.network_epoch,
            generation,
        }
    }

    pub fn commit_metrics(&self, ticket: Ticket, metrics: ProtocolMetrics) -> Commit {
        let mut state = self.state.write();
        if ticket.epoch != state.network_epoch || !state.metrics_generation.settle(ticket.generation)
        {
            debug!(generation = ticket.generation, "discarding stale protocol metrics");
            return Commit::Stale;
        }
        let loading = state.metrics_generation.in_flight();
        state.metrics = ProtocolMetrics { loading, ..metrics };
        state.metrics_loaded = true;
        Commit::Applied
    }

    /// Keep the previous metrics and clear the loading flag.
    pub fn fail_metrics(&self, ticket: Ticket) {
        let mut state = self.state.write();
        if ticket.epoch == state.network_epoch {
            state.metrics_generation.settle(ticket.generation);
            state.metrics.loading = state.metrics_generation.in_flight();
        }
    }

    pub fn metrics(&self) -> ProtocolMetrics {
        self.state.read().metrics.clone()
    }

    pub fn metrics_loaded(&self) -> bool {
        self.state.read().metrics_loaded
    }

    /// Start an account refresh. A different account than the cached one
    /// replaces the cached record.
    pub fn begin_account(&self, account: AccountAddress) -> Ticket {
        let mut state = self.state.write();
        if state.account.as_ref().map(|cached| cached.account) != Some(account) {
            state.account = Some(AccountBalances::empty(account));
        }
        let generation = state.account_generation.issue();
        if let Some(cached) = state.account.as_mut() {
            cached.loading = true;
        }
        Ticket {
            epoch: state.account_epoch,
            generation,
        }
    }

    pub fn commit_account(&self, ticket: Ticket, balances: AccountBalances) -> Commit {
        let mut state = self.state.write();
        let same_account =
            state.account.as_ref().map(|cached| cached.account) == Some(balances.account);
        if ticket.epoch != state.account_epoch
            || !same_account
            || !state.account_generation.settle(ticket.generation)
        {
            debug!(
                account = %balances.account,
                generation = ticket.generation,
                "discarding stale account balances"
            );
            return Commit::Stale;
        }
        let loading = state.account_generation.in_flight();
        state.account = Some(AccountBalances { loading, ..balances });
        Commit::Applied
    }

    pub fn fail_account(&self, ticket: Ticket) {
        let mut state = self.state.write();
        if ticket.epoch == state.account_epoch {
            state.account_generation.settle(ticket.generation);
            let loading = state.account_generation.in_flight();
            if let Some(cached) = state.account.as_mut() {
                cached.loading = loading;
            }
        }
    }

    pub fn account_balances(&self) -> Option<AccountBalances> {
        self.state.read().account.clone()
    }

    pub fn begin_bond_quote(&self, bond: BondId) -> Ticket {
        let mut state = self.state.write();
        let epoch = state.network_epoch;
        let entry = state.bond_entry(bond);
        let generation = entry.quote.issue();
        entry.sync_loading();
        Ticket { epoch, generation }
    }

    pub fn commit_bond_quote(
        &self,
        ticket: Ticket,
        bond: BondId,
        input: &str,
        quote: BondQuote,
    ) -> Commit {
        let mut state = self.state.write();
        if ticket.epoch != state.network_epoch {
            return Commit::Stale;
        }
        let entry = state.bond_entry(bond);
        if !entry.quote.settle(ticket.generation) {
            debug!(%bond, input, generation = ticket.generation, "discarding superseded bond quote");
            return Commit::Stale;
        }
        entry.position.apply_quote(input, quote);
        entry.sync_loading();
        Commit::Applied
    }

    pub fn fail_bond_quote(&self, ticket: Ticket, bond: BondId) {
        let mut state = self.state.write();
        if ticket.epoch == state.network_epoch {
            let entry = state.bond_entry(bond);
            entry.quote.settle(ticket.generation);
            entry.sync_loading();
        }
    }

    pub fn begin_bond_position(&self, bond: BondId) -> Ticket {
        let mut state = self.state.write();
        let epoch = state.account_epoch;
        let entry = state.bond_entry(bond);
        let generation = entry.user.issue();
        entry.sync_loading();
        Ticket { epoch, generation }
    }

    pub fn commit_bond_position(
        &self,
        ticket: Ticket,
        bond: BondId,
        position: UserBondPosition,
    ) -> Commit {
        let mut state = self.state.write();
        if ticket.epoch != state.account_epoch {
            return Commit::Stale;
        }
        let entry = state.bond_entry(bond);
        if !entry.user.settle(ticket.generation) {
            debug!(%bond, generation = ticket.generation, "discarding superseded bond position");
            return Commit::Stale;
        }
        entry.position.apply_user_position(position);
        entry.sync_loading();
        Commit::Applied
    }

    pub fn fail_bond_position(&self, ticket: Ticket, bond: BondId) {
        let mut state = self.state.write();
        if ticket.epoch == state.account_epoch {
            let entry = state.bond_entry(bond);
            entry.user.settle(ticket.generation);
            entry.sync_loading();
        }
    }

    pub fn bond_position(&self, bond: BondId) -> Option<BondPosition> {
        self.state
            .read()
            .bonds
            .get(&bond)
            .map(|entry| entry.position.clone())
    }

    pub fn bond_positions(&self) -> Vec<BondPosition> {
        self.state
            .read()
            .bonds
            .values()
            .map(|entry| entry.position.clone())
            .collect()
    }

    /// Drop everything tied to the current account. In-flight account and
    /// bond-position refreshes will be discarded.
    pub fn clear_account(&self) {
        let mut state = self.state.write();
        state.account_epoch += 1;
        state.account = None;
        state.account_generation = Generation::default();
        for entry in state.bonds.values_mut() {
            entry.position.clear_user_position();
            entry.user = Generation::default();
            entry.sync_loading();
        }
    }

    /// Reset the whole cache. Bond records keep their keys but lose all
    /// values; every in-flight refresh is discarded.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.network_epoch += 1;
        state.account_epoch += 1;
        state.metrics = ProtocolMetrics::default();
        state.metrics_generation = Generation::default();
        state.metrics_loaded = false;
        state.account = None;
        state.account_generation = Generation::default();
        for (bond, entry) in state.bonds.iter_mut() {
            *entry = BondEntry::new(*bond);
        }
    }
}
