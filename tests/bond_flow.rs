//! Bond quoting and purchase through the client.

mod common;

use std::sync::Arc;

use bond_sync_client::bond::BondId;
use bond_sync_client::contracts::stub::StubBond;
use bond_sync_client::contracts::{BondInfo, BondTerms};
use bond_sync_client::pending::{OperationKey, TxStatus, PENDING_LABEL};
use bond_sync_client::session::mock::MockWalletConnector;
use bond_sync_client::sync::RefreshOutcome;
use common::{address, build_client, mim_bond, seeded_chain, wait_for, ONE_RESERVE, ONE_TOKEN};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latest_bond_input_wins_over_slower_earlier_quote() {
    let chain = seeded_chain();
    let slow = chain.hold_payout_for(5 * ONE_RESERVE);
    let connector = Arc::new(MockWalletConnector::new(chain.with_signer(address(1))));
    let client = build_client(&chain, connector);

    let first = client.set_bond_input(BondId::Mim, "5").expect("enabled");
    let second = client.set_bond_input(BondId::Mim, "10").expect("enabled");

    let latest = second.await.expect("join");
    assert_eq!(latest.quote, RefreshOutcome::Updated);
    slow.notify_one();
    let stale = first.await.expect("join");
    assert_eq!(stale.quote, RefreshOutcome::Superseded);

    let position = client.bond_position(BondId::Mim).expect("position");
    assert_eq!(position.quoted_input, "10");
    assert!((position.bond_quote - 0.125).abs() < 1e-12);
    assert!(!position.loading);
    assert!((position.bond_discount - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn malformed_amounts_are_rejected_before_any_contract_call() {
    let chain = seeded_chain();
    let connector = Arc::new(MockWalletConnector::new(chain.with_signer(address(1))));
    let client = build_client(&chain, connector);
    client.connect().await.expect("connect");
    chain.clear_calls();

    for amount in ["", "abc", "0"] {
        let err = client
            .bond(BondId::Mim, amount, None, None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT", "{amount:?}");
    }
    assert!(chain.calls().is_empty(), "{:?}", chain.calls());
    assert!(chain.transactions().is_empty());
}

#[tokio::test]
async fn bonding_over_an_open_position_needs_confirmation() {
    let chain = seeded_chain();
    chain.set_bond_position(
        address(0x21),
        address(1),
        BondInfo {
            payout: 3 * ONE_TOKEN,
            vesting: 100,
            last_block: 950,
            price_paid: 0,
        },
        ONE_TOKEN,
    );
    let connector = Arc::new(MockWalletConnector::new(chain.with_signer(address(1))));
    let client = build_client(&chain, connector);
    client.connect().await.expect("connect");

    let err = client
        .bond(BondId::Mim, "1", None, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RESET_NOT_CONFIRMED");
    assert!(chain.transactions().is_empty());

    let status = client
        .bond(BondId::Mim, "1", None, None, true)
        .await
        .expect("confirmed bond");
    assert!(status.is_confirmed());
    assert_eq!(chain.transactions().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_bond_while_pending_is_refused() {
    let chain = seeded_chain();
    let connector = Arc::new(MockWalletConnector::new(chain.with_signer(address(1))));
    let client = Arc::new(build_client(&chain, connector));
    client.connect().await.expect("connect");
    chain.hold_transactions();

    let submitted = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.bond(BondId::Mim, "2", Some(100), None, false).await })
    };
    wait_for(|| async { !client.pending_operations().is_empty() }).await;

    let key = OperationKey::bond(BondId::Mim);
    assert_eq!(client.label_for(&key, "Bond"), PENDING_LABEL);
    let refused = client
        .bond(BondId::Mim, "2", None, None, false)
        .await
        .expect("refusal is not an error");
    assert_eq!(refused, TxStatus::AlreadyPending);

    chain.release_transactions();
    let status = submitted.await.expect("join").expect("bond");
    assert!(status.is_confirmed());
    assert!(client.pending_operations().is_empty());
    assert_eq!(client.label_for(&key, "Bond"), "Bond");
    let deposits = chain
        .transactions()
        .into_iter()
        .filter(|tx| tx.method == "deposit")
        .count();
    assert_eq!(deposits, 1);
}

#[tokio::test]
async fn redeem_with_autostake_uses_the_connected_account() {
    let chain = seeded_chain();
    chain.set_bond_position(
        address(0x21),
        address(1),
        BondInfo {
            payout: 3 * ONE_TOKEN,
            vesting: 0,
            last_block: 900,
            price_paid: 0,
        },
        3 * ONE_TOKEN,
    );
    let connector = Arc::new(MockWalletConnector::new(chain.with_signer(address(1))));
    let client = build_client(&chain, connector);
    client.connect().await.expect("connect");

    let status = client.redeem(BondId::Mim, true).await.expect("redeem");
    assert!(status.is_confirmed());
    let redeem = chain.transactions().pop().expect("redeem sent");
    assert_eq!(redeem.method, "redeem");
    assert_eq!(redeem.from, address(1));
    assert_eq!(redeem.to, address(0x21));
}

#[tokio::test]
async fn vesting_term_follows_the_quoted_terms() {
    let chain = seeded_chain();
    chain.set_bond(
        address(0x21),
        StubBond {
            terms: BondTerms {
                vesting_term: 100,
                ..BondTerms::default()
            },
            ..mim_bond()
        },
    );
    let connector = Arc::new(MockWalletConnector::new(chain.with_signer(address(1))));
    let client = build_client(&chain, connector);
    assert!(client.vesting_term(BondId::Mim).is_none());

    let refresh = client.set_bond_input(BondId::Mim, "1").expect("enabled");
    assert_eq!(refresh.await.expect("join").quote, RefreshOutcome::Updated);

    let term = client.vesting_term(BondId::Mim).expect("quoted");
    assert!((term.as_secs_f64() - 1_314.0).abs() < 1e-6);
}
