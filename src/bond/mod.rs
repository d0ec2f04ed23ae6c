//! Bond pricing and the approve/bond/redeem transaction flows.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::address_book::{AccountAddress, AddressBook, ContractName};
use crate::contracts::{ContractClients, ContractError, Provider};
use crate::network::{NetworkId, RESERVE_DECIMALS, TOKEN_DECIMALS};
use crate::oracle::PriceOracle;
use crate::pending::{track_transaction, OperationKey, PendingOperationTracker};
pub use crate::pending::TxStatus;
use crate::protocol::fetch_market_price;
use crate::units::{format_units, parse_units, MAX_ALLOWANCE};

pub mod math;

use math::{bond_discount, debt_ratio, max_bond_price, max_premium};

const RESERVE_UNIT: u128 = 1_000_000_000_000_000_000;

/// Closed set of bond types. Whether a type is usable is decided by the
/// configured allow-list, not by the type itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondId {
    Mim,
    MimTimeLp,
}

impl BondId {
    pub const ALL: [BondId; 2] = [BondId::Mim, BondId::MimTimeLp];

    pub fn as_str(self) -> &'static str {
        match self {
            BondId::Mim => "mim",
            BondId::MimTimeLp => "mim_time_lp",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BondId::Mim => "MIM",
            BondId::MimTimeLp => "MIM-TIME LP",
        }
    }

    pub fn is_lp(self) -> bool {
        matches!(self, BondId::MimTimeLp)
    }
}

impl fmt::Display for BondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BondId {
    type Err = BondError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        BondId::ALL
            .into_iter()
            .find(|bond| bond.as_str() == value)
            .ok_or_else(|| BondError::UnsupportedBond(value.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum BondError {
    #[error("bond `{0}` is not supported")]
    UnsupportedBond(String),
    #[error("invalid amount `{0}`")]
    InvalidAmount(String),
    #[error(
        "bonding would reset an existing position ({interest_due} due, {pending_payout} claimable)"
    )]
    ResetNotConfirmed {
        interest_due: f64,
        pending_payout: f64,
    },
    #[error("bond price {bond_price} with {slippage_bps} bps slippage overflows")]
    PriceOutOfRange { bond_price: u128, slippage_bps: u32 },
    #[error("contract call failed: {0}")]
    ContractCallFailed(#[from] ContractError),
}

/// Market-side view of a bond for a candidate deposit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BondQuote {
    pub bond_discount: f64,
    pub debt_ratio: f64,
    /// Protocol tokens paid out for the candidate deposit.
    pub bond_quote: f64,
    /// Largest reserve deposit accepted right now.
    pub max_bond_price: f64,
    /// Vesting length in blocks.
    pub vesting_term: u64,
    pub bond_price: f64,
    pub market_price: f64,
    /// Reserve value already held by the treasury.
    pub purchased: f64,
    pub exceeds_max_payout: bool,
}

/// Depositor-side view of a bond.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserBondPosition {
    pub interest_due: f64,
    pub pending_payout: f64,
    pub bond_maturation_block: u64,
    pub wallet_balance: f64,
    pub allowance: f64,
}

impl UserBondPosition {
    pub fn has_outstanding_rewards(&self) -> bool {
        self.interest_due > 0.0 || self.pending_payout > 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BondRequest {
    pub bond: BondId,
    pub amount: String,
    pub slippage_bps: u32,
    /// Defaults to the signing account.
    pub recipient: Option<AccountAddress>,
    /// The user accepted that an existing position will be reset.
    pub reset_confirmed: bool,
}

impl BondRequest {
    pub fn new(bond: BondId, amount: impl Into<String>, slippage_bps: u32) -> Self {
        Self {
            bond,
            amount: amount.into(),
            slippage_bps,
            recipient: None,
            reset_confirmed: false,
        }
    }

    pub fn with_recipient(mut self, recipient: AccountAddress) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn confirm_reset(mut self) -> Self {
        self.reset_confirmed = true;
        self
    }
}

/// Validate a user-entered deposit and scale it to reserve units.
pub fn parse_deposit(amount: &str) -> Result<u128, BondError> {
    parse_units(amount, RESERVE_DECIMALS)
        .filter(|value| *value > 0)
        .ok_or_else(|| BondError::InvalidAmount(amount.to_string()))
}

pub struct BondEngine {
    book: Arc<AddressBook>,
    oracle: Arc<PriceOracle>,
    tracker: Arc<PendingOperationTracker>,
    enabled: Vec<BondId>,
    reserve_symbol: String,
}

impl BondEngine {
    pub fn new(
        book: Arc<AddressBook>,
        oracle: Arc<PriceOracle>,
        tracker: Arc<PendingOperationTracker>,
        enabled: Vec<BondId>,
        reserve_symbol: impl Into<String>,
    ) -> Self {
        Self {
            book,
            oracle,
            tracker,
            enabled,
            reserve_symbol: reserve_symbol.into(),
        }
    }

    pub fn enabled(&self) -> &[BondId] {
        &self.enabled
    }

    pub fn ensure_enabled(&self, bond: BondId) -> Result<(), BondError> {
        if self.enabled.contains(&bond) {
            Ok(())
        } else {
            Err(BondError::UnsupportedBond(bond.to_string()))
        }
    }

    /// Resolve a bond identifier against the allow-list.
    pub fn parse_bond(&self, id: &str) -> Result<BondId, BondError> {
        let bond = id.parse::<BondId>()?;
        self.ensure_enabled(bond)?;
        Ok(bond)
    }

    fn clients(&self, network: NetworkId, provider: Arc<dyn Provider>) -> ContractClients {
        ContractClients::new(Arc::clone(&self.book), network, provider)
    }

    /// Read-only pricing for a candidate deposit. An empty candidate quotes a
    /// zero deposit.
    pub async fn quote(
        &self,
        bond: BondId,
        candidate: &str,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<BondQuote, BondError> {
        self.ensure_enabled(bond)?;
        let value = if candidate.trim().is_empty() {
            None
        } else {
            Some(parse_deposit(candidate)?)
        };

        let clients = self.clients(network, provider);
        let depository = clients.bond(bond)?;
        let terms = depository.terms().await?;
        let max_payout = depository.max_payout().await?;
        let market_price = fetch_market_price(&clients, &self.oracle, &self.reserve_symbol).await?;
        let bond_price = format_units(depository.bond_price_in_usd().await?, RESERVE_DECIMALS);
        let debt_ratio = debt_ratio(depository.standardized_debt_ratio().await?);
        let payout = match value {
            Some(value) => depository.payout_for(value).await?,
            None => 0,
        };
        let unit_payout = depository.payout_for(RESERVE_UNIT).await?;
        let purchased = self.purchased(&clients, bond).await?;

        let exceeds_max_payout = payout > max_payout;
        if exceeds_max_payout {
            warn!(%bond, candidate, "candidate deposit exceeds the maximum bond payout");
        }

        Ok(BondQuote {
            bond_discount: bond_discount(market_price, bond_price),
            debt_ratio,
            bond_quote: format_units(payout, TOKEN_DECIMALS),
            max_bond_price: max_bond_price(max_payout, unit_payout),
            vesting_term: terms.vesting_term,
            bond_price,
            market_price,
            purchased,
            exceeds_max_payout,
        })
    }

    async fn purchased(&self, clients: &ContractClients, bond: BondId) -> Result<f64, BondError> {
        let treasury = clients.address(ContractName::Treasury)?;
        let amount = clients.reserve(bond)?.balance_of(treasury).await?;
        if !bond.is_lp() {
            return Ok(format_units(amount, RESERVE_DECIMALS));
        }
        let asset = clients.reserve_address(bond)?;
        let calculator = clients.bonding_calculator()?;
        let valuation = calculator.valuation(asset, amount).await?;
        let markdown = calculator.markdown(asset).await?;
        Ok(format_units(valuation, TOKEN_DECIMALS) * format_units(markdown, RESERVE_DECIMALS))
    }

    pub async fn user_position(
        &self,
        bond: BondId,
        address: AccountAddress,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<UserBondPosition, BondError> {
        self.ensure_enabled(bond)?;
        let clients = self.clients(network, provider);
        let depository = clients.bond(bond)?;
        let depository_address = clients.address(ContractName::BondDepository(bond))?;
        let reserve = clients.reserve(bond)?;

        let info = depository.bond_info(address).await?;
        let pending_payout = depository.pending_payout_for(address).await?;
        let allowance = reserve.allowance(address, depository_address).await?;
        let balance = reserve.balance_of(address).await?;

        Ok(UserBondPosition {
            interest_due: format_units(info.payout, TOKEN_DECIMALS),
            pending_payout: format_units(pending_payout, TOKEN_DECIMALS),
            bond_maturation_block: info.last_block.saturating_add(info.vesting),
            wallet_balance: format_units(balance, RESERVE_DECIMALS),
            allowance: format_units(allowance, RESERVE_DECIMALS),
        })
    }

    /// Grant the depository an unlimited allowance on the reserve asset.
    pub async fn approve(
        &self,
        bond: BondId,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<TxStatus, BondError> {
        self.ensure_enabled(bond)?;
        let clients = self.clients(network, provider);
        let reserve = clients.reserve(bond)?;
        let spender = clients.address(ContractName::BondDepository(bond))?;

        let status = track_transaction(
            &self.tracker,
            &OperationKey::approve(bond),
            format!("Approving {}", bond.display_name()),
            clients.chain(),
            reserve.approve(spender, MAX_ALLOWANCE),
        )
        .await?;
        if status.is_confirmed() {
            info!(%bond, "bond reserve approved");
        }
        Ok(status)
    }

    pub async fn bond(
        &self,
        request: &BondRequest,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<TxStatus, BondError> {
        let bond = request.bond;
        self.ensure_enabled(bond)?;
        let value = parse_deposit(&request.amount)?;

        let key = OperationKey::bond(bond);
        if self.tracker.is_pending(&key) {
            return Ok(TxStatus::AlreadyPending);
        }

        let clients = self.clients(network, Arc::clone(&provider));
        let recipient = match request.recipient {
            Some(recipient) => recipient,
            None => clients.chain().signer_address().await?,
        };
        if !request.reset_confirmed {
            let position = self
                .user_position(bond, recipient, network, Arc::clone(&provider))
                .await?;
            if position.has_outstanding_rewards() {
                return Err(BondError::ResetNotConfirmed {
                    interest_due: position.interest_due,
                    pending_payout: position.pending_payout,
                });
            }
        }

        let depository = clients.bond(bond)?;
        let bond_price = depository.bond_price().await?;
        let max_price =
            max_premium(bond_price, request.slippage_bps).ok_or(BondError::PriceOutOfRange {
                bond_price,
                slippage_bps: request.slippage_bps,
            })?;
        info!(
            %bond,
            %recipient,
            slippage_bps = request.slippage_bps,
            max_price,
            "submitting bond deposit"
        );

        let status = track_transaction(
            &self.tracker,
            &key,
            format!("Bonding {}", bond.display_name()),
            clients.chain(),
            depository.deposit(value, max_price, recipient),
        )
        .await?;
        Ok(status)
    }

    /// Claim vested payout, optionally restaking it instead of paying out the
    /// base token.
    pub async fn redeem(
        &self,
        bond: BondId,
        address: AccountAddress,
        autostake: bool,
        network: NetworkId,
        provider: Arc<dyn Provider>,
    ) -> Result<TxStatus, BondError> {
        self.ensure_enabled(bond)?;
        let clients = self.clients(network, provider);
        let depository = clients.bond(bond)?;
        let description = if autostake {
            format!("Redeeming and staking {}", bond.display_name())
        } else {
            format!("Redeeming {}", bond.display_name())
        };

        let status = track_transaction(
            &self.tracker,
            &OperationKey::redeem(bond, autostake),
            description,
            clients.chain(),
            depository.redeem(address, autostake),
        )
        .await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_book::fixtures::{address, address_book};
    use crate::contracts::stub::{StubBond, StubProvider};
    use crate::contracts::{BondInfo, BondTerms};
    use crate::oracle::StaticPriceSource;
    use crate::pending::PENDING_LABEL;

    const USER: u8 = 0x01;

    struct Fixture {
        chain: StubProvider,
        wallet: Arc<dyn Provider>,
        tracker: Arc<PendingOperationTracker>,
        engine: BondEngine,
    }

    fn fixture() -> Fixture {
        let chain = StubProvider::default();
        chain.set_block(1_000, 1_700_000_000);
        chain.set_reserves(1_000 * 10u128.pow(18), 10 * 10u128.pow(9));
        chain.set_bond(
            address(0x21),
            StubBond {
                terms: BondTerms {
                    vesting_term: 33_110,
                    ..BondTerms::default()
                },
                max_payout: 500 * 10u128.pow(9),
                bond_price: 8_000,
                bond_price_in_usd: 80 * 10u128.pow(18),
                standardized_debt_ratio: 250_000_000,
                payout_per_unit: 12_500_000,
                ..StubBond::default()
            },
        );
        chain.set_balance(address(0x13), address(0x16), 2_000 * 10u128.pow(18));
        chain.set_balance(address(0x13), address(USER), 40 * 10u128.pow(18));

        let oracle = Arc::new(PriceOracle::new(Arc::new(StaticPriceSource::new([(
            "MIM", 1.0,
        )]))));
        let tracker = Arc::new(PendingOperationTracker::new());
        let engine = BondEngine::new(
            Arc::new(address_book()),
            oracle,
            Arc::clone(&tracker),
            vec![BondId::Mim],
            "MIM",
        );
        let wallet: Arc<dyn Provider> = Arc::new(chain.with_signer(address(USER)));
        Fixture {
            chain,
            wallet,
            tracker,
            engine,
        }
    }

    #[test]
    fn bond_ids_parse_from_keys() {
        assert_eq!("mim".parse::<BondId>(), Ok(BondId::Mim));
        assert_eq!("mim_time_lp".parse::<BondId>(), Ok(BondId::MimTimeLp));
        assert_eq!(
            "dai".parse::<BondId>(),
            Err(BondError::UnsupportedBond("dai".into()))
        );
    }

    #[test]
    fn disabled_bonds_are_unsupported() {
        let fx = fixture();
        assert_eq!(fx.engine.parse_bond("mim"), Ok(BondId::Mim));
        assert_eq!(
            fx.engine.parse_bond("mim_time_lp"),
            Err(BondError::UnsupportedBond("mim_time_lp".into()))
        );
    }

    #[test]
    fn deposits_must_be_positive_decimals() {
        assert_eq!(parse_deposit("1.5"), Ok(1_500_000_000_000_000_000));
        for input in ["", "abc", "0", "0.0", "-3", "1e9"] {
            assert_eq!(
                parse_deposit(input),
                Err(BondError::InvalidAmount(input.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn quote_combines_market_and_depository_reads() {
        let fx = fixture();
        let quote = fx
            .engine
            .quote(BondId::Mim, "4", NetworkId::TargetChain, fx.wallet.clone())
            .await
            .expect("quote");

        assert!((quote.market_price - 100.0).abs() < 1e-9);
        assert!((quote.bond_price - 80.0).abs() < 1e-9);
        assert!((quote.bond_discount - 0.25).abs() < 1e-9);
        assert!((quote.bond_quote - 0.05).abs() < 1e-12);
        assert!((quote.max_bond_price - 40_000.0).abs() < 1e-6);
        assert_eq!(quote.debt_ratio, 0.25);
        assert_eq!(quote.vesting_term, 33_110);
        assert_eq!(quote.purchased, 2_000.0);
        assert!(!quote.exceeds_max_payout);
    }

    #[tokio::test]
    async fn empty_candidate_quotes_zero() {
        let fx = fixture();
        let quote = fx
            .engine
            .quote(BondId::Mim, "", NetworkId::TargetChain, fx.wallet.clone())
            .await
            .expect("quote");
        assert_eq!(quote.bond_quote, 0.0);
        assert_eq!(fx.chain.call_count("payout_for"), 1);
    }

    #[tokio::test]
    async fn quote_rejects_disabled_bond_without_calls() {
        let fx = fixture();
        let err = fx
            .engine
            .quote(BondId::MimTimeLp, "1", NetworkId::TargetChain, fx.wallet.clone())
            .await
            .unwrap_err();
        assert_eq!(err, BondError::UnsupportedBond("mim_time_lp".into()));
        assert!(fx.chain.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_amounts_never_reach_the_chain() {
        let fx = fixture();
        for amount in ["", "abc"] {
            let err = fx
                .engine
                .bond(
                    &BondRequest::new(BondId::Mim, amount, 50),
                    NetworkId::TargetChain,
                    fx.wallet.clone(),
                )
                .await
                .unwrap_err();
            assert_eq!(err, BondError::InvalidAmount(amount.to_string()));
        }
        assert!(fx.chain.calls().is_empty());
        assert!(fx.tracker.pending().is_empty());
    }

    #[tokio::test]
    async fn bond_deposits_with_slippage_and_releases_slot() {
        let fx = fixture();
        let status = fx
            .engine
            .bond(
                &BondRequest::new(BondId::Mim, "4", 50),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .expect("bond");
        assert!(status.is_confirmed());
        let txs = fx.chain.transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].method, "deposit");
        assert_eq!(txs[0].to, address(0x21));
        assert!(!fx.tracker.is_pending(&OperationKey::bond(BondId::Mim)));
    }

    #[tokio::test]
    async fn existing_position_requires_confirmation() {
        let fx = fixture();
        fx.chain.set_bond_position(
            address(0x21),
            address(USER),
            BondInfo {
                payout: 3 * 10u128.pow(9),
                vesting: 100,
                last_block: 900,
                price_paid: 0,
            },
            0,
        );
        let request = BondRequest::new(BondId::Mim, "4", 50);
        let err = fx
            .engine
            .bond(&request, NetworkId::TargetChain, fx.wallet.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BondError::ResetNotConfirmed { .. }));
        assert!(fx.chain.transactions().is_empty());

        let status = fx
            .engine
            .bond(
                &request.confirm_reset(),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .expect("confirmed bond");
        assert!(status.is_confirmed());
    }

    #[tokio::test]
    async fn pending_bond_refuses_duplicate_submission() {
        let fx = fixture();
        let key = OperationKey::bond(BondId::Mim);
        assert!(fx.tracker.try_begin(&key));

        let status = fx
            .engine
            .bond(
                &BondRequest::new(BondId::Mim, "1", 50),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .expect("duplicate is not an error");
        assert_eq!(status, TxStatus::AlreadyPending);
        assert!(fx.chain.transactions().is_empty());
        assert_eq!(fx.tracker.label_for(&key, "Bond"), PENDING_LABEL);
    }

    #[tokio::test]
    async fn failed_write_releases_slot_and_surfaces_error() {
        let fx = fixture();
        fx.chain.fail("approve");
        let err = fx
            .engine
            .approve(BondId::Mim, NetworkId::TargetChain, fx.wallet.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BondError::ContractCallFailed(_)));
        assert!(!fx.tracker.is_pending(&OperationKey::approve(BondId::Mim)));

        fx.chain.recover("approve");
        let status = fx
            .engine
            .approve(BondId::Mim, NetworkId::TargetChain, fx.wallet.clone())
            .await
            .expect("retry");
        assert!(status.is_confirmed());
        let position = fx
            .engine
            .user_position(
                BondId::Mim,
                address(USER),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .expect("position");
        assert!(position.allowance > 0.0);
        assert_eq!(position.wallet_balance, 40.0);
    }

    #[tokio::test]
    async fn reverted_receipt_counts_as_failure() {
        let fx = fixture();
        fx.chain.revert_transactions(true);
        let err = fx
            .engine
            .redeem(
                BondId::Mim,
                address(USER),
                true,
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BondError::ContractCallFailed(ContractError::TransactionFailed(_))
        ));
        assert!(!fx
            .tracker
            .is_pending(&OperationKey::redeem(BondId::Mim, true)));
    }

    #[tokio::test]
    async fn user_position_reports_maturation_block() {
        let fx = fixture();
        fx.chain.set_bond_position(
            address(0x21),
            address(USER),
            BondInfo {
                payout: 2 * 10u128.pow(9),
                vesting: 500,
                last_block: 1_000,
                price_paid: 0,
            },
            500_000_000,
        );
        let position = fx
            .engine
            .user_position(
                BondId::Mim,
                address(USER),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .expect("position");
        assert_eq!(position.interest_due, 2.0);
        assert_eq!(position.pending_payout, 0.5);
        assert_eq!(position.bond_maturation_block, 1_500);
        assert!(position.has_outstanding_rewards());
    }

    #[tokio::test]
    async fn maturation_block_saturates_on_corrupt_position() {
        let fx = fixture();
        fx.chain.set_bond_position(
            address(0x21),
            address(USER),
            BondInfo {
                payout: 0,
                vesting: u64::MAX,
                last_block: 1_000,
                price_paid: 0,
            },
            0,
        );
        let position = fx
            .engine
            .user_position(
                BondId::Mim,
                address(USER),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .expect("position");
        assert_eq!(position.bond_maturation_block, u64::MAX);
    }

    #[tokio::test]
    async fn unscalable_bond_price_is_rejected_before_deposit() {
        let fx = fixture();
        fx.chain.set_bond(
            address(0x21),
            StubBond {
                bond_price: u128::MAX,
                payout_per_unit: 12_500_000,
                ..StubBond::default()
            },
        );
        let err = fx
            .engine
            .bond(
                &BondRequest::new(BondId::Mim, "4", 50),
                NetworkId::TargetChain,
                fx.wallet.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BondError::PriceOutOfRange {
                bond_price: u128::MAX,
                slippage_bps: 50,
            }
        );
        assert!(fx.chain.transactions().is_empty());
        assert!(!fx.tracker.is_pending(&OperationKey::bond(BondId::Mim)));
    }
}
