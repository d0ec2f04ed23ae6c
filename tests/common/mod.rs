//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bond_sync_client::address_book::{AccountAddress, BondAddresses, NetworkAddresses};
use bond_sync_client::bond::BondId;
use bond_sync_client::config::ClientConfig;
use bond_sync_client::contracts::stub::{StubBond, StubProvider};
use bond_sync_client::contracts::Epoch;
use bond_sync_client::network::NetworkId;
use bond_sync_client::oracle::StaticPriceSource;
use bond_sync_client::session::mock::MockWalletConnector;
use bond_sync_client::BondClient;
use tokio::time::sleep;

pub const ONE_RESERVE: u128 = 1_000_000_000_000_000_000;
pub const ONE_TOKEN: u128 = 1_000_000_000;

pub fn address(byte: u8) -> AccountAddress {
    AccountAddress::new([byte; 20])
}

pub fn deployment() -> NetworkAddresses {
    NetworkAddresses {
        time_token: address(0x11),
        memo_token: address(0x12),
        mim_token: address(0x13),
        staking: address(0x14),
        staking_helper: address(0x15),
        treasury: address(0x16),
        bonding_calculator: address(0x17),
        liquidity_pair: address(0x18),
        bonds: vec![
            BondAddresses {
                id: BondId::Mim,
                depository: address(0x21),
                reserve: address(0x13),
            },
            BondAddresses {
                id: BondId::MimTimeLp,
                depository: address(0x22),
                reserve: address(0x18),
            },
        ],
    }
}

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.address_book.target_chain = Some(deployment());
    config.sync.watch_blocks = false;
    config
}

/// Chain with a live MIM bond priced at 80 against a market price of 100.
pub fn seeded_chain() -> StubProvider {
    seeded_chain_on(NetworkId::TargetChain, 1_000)
}

/// Same deployment as [`seeded_chain`] on another chain, at `block`.
pub fn seeded_chain_on(network: NetworkId, block: u64) -> StubProvider {
    let chain = StubProvider::new(network.chain_id());
    chain.set_block(block, 1_700_000_000);
    chain.set_epoch(Epoch {
        length: 2_200,
        number: 10,
        end_time: 1_700_010_000,
        distribute: 10 * ONE_TOKEN,
    });
    chain.set_index(4 * ONE_TOKEN);
    chain.set_circulating_supply(1_000 * ONE_TOKEN);
    chain.set_reserves(1_000 * ONE_RESERVE, 10 * ONE_TOKEN);
    chain.set_balance(address(0x13), address(0x16), 2_000 * ONE_RESERVE);
    chain.set_bond(address(0x21), mim_bond());
    chain
}

pub fn mim_bond() -> StubBond {
    StubBond {
        max_payout: 500 * ONE_TOKEN,
        bond_price: 8_000,
        bond_price_in_usd: 80 * ONE_RESERVE,
        standardized_debt_ratio: 250_000_000,
        payout_per_unit: 12_500_000,
        ..StubBond::default()
    }
}

pub fn build_client(chain: &StubProvider, connector: Arc<MockWalletConnector>) -> BondClient {
    build_client_with(config(), chain, connector)
}

pub fn build_client_with(
    config: ClientConfig,
    chain: &StubProvider,
    connector: Arc<MockWalletConnector>,
) -> BondClient {
    BondClient::new(
        config,
        connector,
        Arc::new(chain.clone()),
        Arc::new(StaticPriceSource::new([("MIM", 1.0)])),
    )
    .expect("build client")
}

pub async fn wait_for<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..120 {
        if predicate().await {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not satisfied within timeout");
}

/// Let spawned refreshes run to completion.
pub async fn settle() {
    sleep(Duration::from_millis(100)).await;
}
