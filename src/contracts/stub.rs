//! In-memory chain used by tests and local harnesses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{
    BondDepositoryContract, BondInfo, BondTerms, BondingCalculatorContract, ChainReader,
    ContractError, ContractResult, Epoch, Erc20Contract, LiquidityPairContract, Provider,
    ReadProviderFactory, StakedTokenContract, StakingContract, StakingHelperContract, TxHash,
    TxReceipt,
};
use crate::address_book::AccountAddress;
use crate::network::NetworkId;

const RESERVE_UNIT: u128 = 1_000_000_000_000_000_000;

/// Programmable bond depository state.
#[derive(Clone, Debug, Default)]
pub struct StubBond {
    pub terms: BondTerms,
    pub max_payout: u128,
    pub bond_price: u128,
    pub bond_price_in_usd: u128,
    pub standardized_debt_ratio: u128,
    /// Payout (9 decimals) granted per whole reserve unit (18 decimals).
    pub payout_per_unit: u128,
    pub infos: HashMap<AccountAddress, BondInfo>,
    pub pending: HashMap<AccountAddress, u128>,
}

/// Write call captured by the stub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubTransaction {
    pub hash: TxHash,
    pub method: String,
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub success: bool,
}

#[derive(Default)]
struct StubState {
    chain_id: u64,
    block_number: u64,
    block_timestamp: u64,
    balances: HashMap<(AccountAddress, AccountAddress), u128>,
    allowances: HashMap<(AccountAddress, AccountAddress, AccountAddress), u128>,
    circulating_supply: u128,
    epoch: Epoch,
    index: u128,
    valuation: u128,
    markdown: u128,
    reserves: (u128, u128),
    bonds: HashMap<AccountAddress, StubBond>,
    failures: HashSet<String>,
    calls: Vec<String>,
    payout_gates: HashMap<u128, Arc<Notify>>,
    tx_gate: Option<Arc<Notify>>,
    revert_transactions: bool,
    transactions: Vec<StubTransaction>,
    next_tx: u64,
}

/// Shared in-memory chain; clones observe the same state.
#[derive(Clone)]
pub struct StubProvider {
    state: Arc<Mutex<StubState>>,
    signer: Option<AccountAddress>,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new(NetworkId::TargetChain.chain_id())
    }
}

impl StubProvider {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                chain_id,
                ..StubState::default()
            })),
            signer: None,
        }
    }

    /// Same chain, seen through a wallet signing as `signer`.
    pub fn with_signer(&self, signer: AccountAddress) -> Self {
        Self {
            state: Arc::clone(&self.state),
            signer: Some(signer),
        }
    }

    /// Same chain without a signer.
    pub fn read_only(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            signer: None,
        }
    }

    pub fn signer(&self) -> Option<AccountAddress> {
        self.signer
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
    }

    pub fn set_block(&self, number: u64, timestamp: u64) {
        let mut state = self.state.lock();
        state.block_number = number;
        state.block_timestamp = timestamp;
    }

    pub fn set_balance(&self, token: AccountAddress, owner: AccountAddress, amount: u128) {
        self.state.lock().balances.insert((token, owner), amount);
    }

    pub fn set_allowance(
        &self,
        token: AccountAddress,
        owner: AccountAddress,
        spender: AccountAddress,
        amount: u128,
    ) {
        self.state
            .lock()
            .allowances
            .insert((token, owner, spender), amount);
    }

    pub fn set_circulating_supply(&self, supply: u128) {
        self.state.lock().circulating_supply = supply;
    }

    pub fn set_epoch(&self, epoch: Epoch) {
        self.state.lock().epoch = epoch;
    }

    pub fn set_index(&self, index: u128) {
        self.state.lock().index = index;
    }

    pub fn set_valuation(&self, valuation: u128, markdown: u128) {
        let mut state = self.state.lock();
        state.valuation = valuation;
        state.markdown = markdown;
    }

    pub fn set_reserves(&self, reserve: u128, token: u128) {
        self.state.lock().reserves = (reserve, token);
    }

    pub fn set_bond(&self, depository: AccountAddress, bond: StubBond) {
        self.state.lock().bonds.insert(depository, bond);
    }

    pub fn set_bond_position(
        &self,
        depository: AccountAddress,
        depositor: AccountAddress,
        info: BondInfo,
        pending_payout: u128,
    ) {
        let mut state = self.state.lock();
        let bond = state.bonds.entry(depository).or_default();
        bond.infos.insert(depositor, info);
        bond.pending.insert(depositor, pending_payout);
    }

    /// Make every subsequent call to `method` fail with a transport error.
    pub fn fail(&self, method: &str) {
        self.state.lock().failures.insert(method.to_string());
    }

    pub fn recover(&self, method: &str) {
        self.state.lock().failures.remove(method);
    }

    /// Block `payout_for(value)` until the returned handle is notified.
    pub fn hold_payout_for(&self, value: u128) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .payout_gates
            .insert(value, Arc::clone(&gate));
        gate
    }

    /// Block receipt lookups until the returned handle is notified.
    pub fn hold_transactions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().tx_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn release_transactions(&self) {
        if let Some(gate) = self.state.lock().tx_gate.take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    pub fn revert_transactions(&self, revert: bool) {
        self.state.lock().revert_transactions = revert;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn transactions(&self) -> Vec<StubTransaction> {
        self.state.lock().transactions.clone()
    }

    fn contract(&self, address: AccountAddress) -> Arc<StubContract> {
        Arc::new(StubContract {
            state: Arc::clone(&self.state),
            address,
            signer: self.signer,
        })
    }
}

impl Provider for StubProvider {
    fn chain(&self) -> Arc<dyn ChainReader> {
        self.contract(AccountAddress::ZERO)
    }

    fn erc20(&self, address: AccountAddress) -> Arc<dyn Erc20Contract> {
        self.contract(address)
    }

    fn staked_token(&self, address: AccountAddress) -> Arc<dyn StakedTokenContract> {
        self.contract(address)
    }

    fn staking(&self, address: AccountAddress) -> Arc<dyn StakingContract> {
        self.contract(address)
    }

    fn staking_helper(&self, address: AccountAddress) -> Arc<dyn StakingHelperContract> {
        self.contract(address)
    }

    fn bonding_calculator(&self, address: AccountAddress) -> Arc<dyn BondingCalculatorContract> {
        self.contract(address)
    }

    fn liquidity_pair(&self, address: AccountAddress) -> Arc<dyn LiquidityPairContract> {
        self.contract(address)
    }

    fn bond_depository(&self, address: AccountAddress) -> Arc<dyn BondDepositoryContract> {
        self.contract(address)
    }
}

impl ReadProviderFactory for StubProvider {
    fn read_provider(&self, _network: NetworkId) -> Arc<dyn Provider> {
        Arc::new(self.read_only())
    }
}

struct StubContract {
    state: Arc<Mutex<StubState>>,
    address: AccountAddress,
    signer: Option<AccountAddress>,
}

impl StubContract {
    fn record(&self, method: &str) -> ContractResult<()> {
        let mut state = self.state.lock();
        state.calls.push(method.to_string());
        if state.failures.contains(method) {
            return Err(ContractError::transport(format!("stub {method} failed")));
        }
        Ok(())
    }

    fn send(&self, method: &str) -> ContractResult<(TxHash, AccountAddress)> {
        self.record(method)?;
        let from = self.signer.ok_or(ContractError::NoSigner)?;
        let mut state = self.state.lock();
        state.next_tx += 1;
        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&state.next_tx.to_be_bytes());
        let hash = TxHash(hash);
        let success = !state.revert_transactions;
        state.transactions.push(StubTransaction {
            hash,
            method: method.to_string(),
            from,
            to: self.address,
            success,
        });
        Ok((hash, from))
    }

    fn with_bond<T>(&self, read: impl FnOnce(&StubBond) -> T) -> ContractResult<T> {
        let state = self.state.lock();
        state
            .bonds
            .get(&self.address)
            .map(read)
            .ok_or_else(|| ContractError::reverted("bond", format!("no bond at {}", self.address)))
    }
}

#[async_trait]
impl ChainReader for StubContract {
    async fn chain_id(&self) -> ContractResult<u64> {
        self.record("chain_id")?;
        Ok(self.state.lock().chain_id)
    }

    async fn block_number(&self) -> ContractResult<u64> {
        self.record("block_number")?;
        Ok(self.state.lock().block_number)
    }

    async fn block_timestamp(&self, _block: u64) -> ContractResult<u64> {
        self.record("block_timestamp")?;
        Ok(self.state.lock().block_timestamp)
    }

    async fn signer_address(&self) -> ContractResult<AccountAddress> {
        self.record("signer_address")?;
        self.signer.ok_or(ContractError::NoSigner)
    }

    async fn wait_for_transaction(&self, hash: TxHash) -> ContractResult<TxReceipt> {
        self.record("wait_for_transaction")?;
        let gate = self.state.lock().tx_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = self.state.lock();
        let tx = state
            .transactions
            .iter()
            .find(|tx| tx.hash == hash)
            .ok_or_else(|| ContractError::transport(format!("unknown transaction {hash}")))?;
        Ok(TxReceipt {
            hash,
            block_number: state.block_number,
            success: tx.success,
        })
    }
}

#[async_trait]
impl Erc20Contract for StubContract {
    async fn balance_of(&self, owner: AccountAddress) -> ContractResult<u128> {
        self.record("balance_of")?;
        let state = self.state.lock();
        Ok(state
            .balances
            .get(&(self.address, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn allowance(
        &self,
        owner: AccountAddress,
        spender: AccountAddress,
    ) -> ContractResult<u128> {
        self.record("allowance")?;
        let state = self.state.lock();
        Ok(state
            .allowances
            .get(&(self.address, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn approve(&self, spender: AccountAddress, amount: u128) -> ContractResult<TxHash> {
        let (hash, from) = self.send("approve")?;
        let mut state = self.state.lock();
        if !state.revert_transactions {
            state.allowances.insert((self.address, from, spender), amount);
        }
        Ok(hash)
    }
}

#[async_trait]
impl StakedTokenContract for StubContract {
    async fn circulating_supply(&self) -> ContractResult<u128> {
        self.record("circulating_supply")?;
        Ok(self.state.lock().circulating_supply)
    }
}

#[async_trait]
impl StakingContract for StubContract {
    async fn epoch(&self) -> ContractResult<Epoch> {
        self.record("epoch")?;
        Ok(self.state.lock().epoch)
    }

    async fn index(&self) -> ContractResult<u128> {
        self.record("index")?;
        Ok(self.state.lock().index)
    }

    async fn unstake(&self, _amount: u128, _trigger: bool) -> ContractResult<TxHash> {
        self.send("unstake").map(|(hash, _)| hash)
    }
}

#[async_trait]
impl StakingHelperContract for StubContract {
    async fn stake(&self, _amount: u128, _recipient: AccountAddress) -> ContractResult<TxHash> {
        self.send("stake").map(|(hash, _)| hash)
    }
}

#[async_trait]
impl BondingCalculatorContract for StubContract {
    async fn valuation(&self, _pair: AccountAddress, _amount: u128) -> ContractResult<u128> {
        self.record("valuation")?;
        Ok(self.state.lock().valuation)
    }

    async fn markdown(&self, _pair: AccountAddress) -> ContractResult<u128> {
        self.record("markdown")?;
        Ok(self.state.lock().markdown)
    }
}

#[async_trait]
impl LiquidityPairContract for StubContract {
    async fn get_reserves(&self) -> ContractResult<(u128, u128)> {
        self.record("get_reserves")?;
        Ok(self.state.lock().reserves)
    }
}

#[async_trait]
impl BondDepositoryContract for StubContract {
    async fn terms(&self) -> ContractResult<BondTerms> {
        self.record("terms")?;
        self.with_bond(|bond| bond.terms)
    }

    async fn max_payout(&self) -> ContractResult<u128> {
        self.record("max_payout")?;
        self.with_bond(|bond| bond.max_payout)
    }

    async fn bond_price(&self) -> ContractResult<u128> {
        self.record("bond_price")?;
        self.with_bond(|bond| bond.bond_price)
    }

    async fn bond_price_in_usd(&self) -> ContractResult<u128> {
        self.record("bond_price_in_usd")?;
        self.with_bond(|bond| bond.bond_price_in_usd)
    }

    async fn standardized_debt_ratio(&self) -> ContractResult<u128> {
        self.record("standardized_debt_ratio")?;
        self.with_bond(|bond| bond.standardized_debt_ratio)
    }

    async fn payout_for(&self, value: u128) -> ContractResult<u128> {
        self.record("payout_for")?;
        let gate = self.state.lock().payout_gates.get(&value).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.with_bond(|bond| value * bond.payout_per_unit / RESERVE_UNIT)
    }

    async fn bond_info(&self, depositor: AccountAddress) -> ContractResult<BondInfo> {
        self.record("bond_info")?;
        self.with_bond(|bond| bond.infos.get(&depositor).copied().unwrap_or_default())
    }

    async fn pending_payout_for(&self, depositor: AccountAddress) -> ContractResult<u128> {
        self.record("pending_payout_for")?;
        self.with_bond(|bond| bond.pending.get(&depositor).copied().unwrap_or_default())
    }

    async fn deposit(
        &self,
        amount: u128,
        _max_price: u128,
        depositor: AccountAddress,
    ) -> ContractResult<TxHash> {
        let (hash, _) = self.send("deposit")?;
        let mut state = self.state.lock();
        if state.revert_transactions {
            return Ok(hash);
        }
        let block = state.block_number;
        if let Some(bond) = state.bonds.get_mut(&self.address) {
            let payout = amount * bond.payout_per_unit / RESERVE_UNIT;
            let vesting = bond.terms.vesting_term;
            let info = bond.infos.entry(depositor).or_default();
            info.payout += payout;
            info.vesting = vesting;
            info.last_block = block;
        }
        Ok(hash)
    }

    async fn redeem(&self, recipient: AccountAddress, _stake: bool) -> ContractResult<TxHash> {
        let (hash, _) = self.send("redeem")?;
        let mut state = self.state.lock();
        if !state.revert_transactions {
            if let Some(bond) = state.bonds.get_mut(&self.address) {
                bond.infos.remove(&recipient);
                bond.pending.remove(&recipient);
            }
        }
        Ok(hash)
    }
}
