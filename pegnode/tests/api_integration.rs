// Copyright (c) 2024 Botho Foundation
//
//! Query and submission surface tests against a synced ledger.

mod common;

use common::*;
use pegnode::api::{ApiError, RawBatch, SubmitRejection};
use pegnode::batch::BatchError;
use pegnode::chain::ChainError;
use pegnode::ledger::{ActionKind, HistoryFilter, HistorySelector};
use pegnode::params::COIN;
use pegnode::ticker::Ticker;
use pegnode::txid::TxId;

/// Alice holds 1000 pFCT, Bob 300, and Carol two coinbase payouts in PEG.
/// Rates are graded at START + 1.
async fn funded_node() -> TestNode {
    let node = TestNode::new();
    let carol = signer(3);
    node.chain.add_factoid(START, burn(signer(1).address(), 1_000 * COIN, 200));
    node.chain.add_factoid(START, burn(signer(2).address(), 300 * COIN, 201));
    node.chain.add_oracle(
        START + 1,
        vec![oracle_entry(carol.address(), 1), oracle_entry(carol.address(), 2)],
    );
    node.chain.set_tip(START + 1);
    node.sync_to_tip().await;
    node
}

fn raw(entry: &pegnode::chain::Entry) -> RawBatch {
    RawBatch {
        ext_ids: entry.ext_ids.clone(),
        content: entry.content.clone(),
    }
}

#[tokio::test]
async fn test_submit_accepted_batch() {
    let node = funded_node().await;
    let alice = signer(1);
    let tx = batch(vec![transfer(&alice, Ticker::PFct, signer(2).address(), 10 * COIN)]);
    let entry = signed_entry(&node.params, &alice, &tx, b"sub", START + 2);

    let id = node
        .api()
        .submit_transaction_batch(raw(&entry))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, hex::encode(entry.hash));

    let submitted = node.chain.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].chain, node.params.transaction_chain);
    assert_eq!(submitted[0].content, entry.content);
}

#[tokio::test]
async fn test_submit_rejections_never_reach_chain() {
    let node = funded_node().await;
    let alice = signer(1);
    let api = node.api();

    let greedy = batch(vec![
        transfer(&alice, Ticker::PFct, signer(2).address(), 600 * COIN),
        transfer(&alice, Ticker::PFct, signer(2).address(), 600 * COIN),
    ]);
    let entry = signed_entry(&node.params, &alice, &greedy, b"g", START + 2);
    match api.submit_transaction_batch(raw(&entry)).await.unwrap() {
        Err(SubmitRejection::Insufficient(short)) => {
            assert_eq!(short.balance, 1_000 * COIN);
            assert_eq!(short.requested, 1_200 * COIN);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let forged = signed_entry(
        &node.params,
        &signer(4),
        &batch(vec![transfer(&alice, Ticker::PFct, signer(4).address(), COIN)]),
        b"f",
        START + 2,
    );
    assert_eq!(
        api.submit_transaction_batch(raw(&forged)).await.unwrap(),
        Err(SubmitRejection::Invalid(BatchError::AddressMismatch))
    );

    let garbage = RawBatch {
        ext_ids: vec![b"salt".to_vec()],
        content: b"{\"version\":1}".to_vec(),
    };
    assert!(matches!(
        api.submit_transaction_batch(garbage).await.unwrap(),
        Err(SubmitRejection::Invalid(_))
    ));

    assert!(node.chain.submitted().is_empty());
}

#[tokio::test]
async fn test_submit_already_applied() {
    let node = funded_node().await;
    let alice = signer(1);
    let tx = batch(vec![transfer(&alice, Ticker::PFct, signer(2).address(), COIN)]);
    let entry = signed_entry(&node.params, &alice, &tx, b"dup", START + 2);
    node.chain.add_entry(START + 2, entry.clone());
    node.chain.set_tip(START + 2);
    node.sync_to_tip().await;

    assert_eq!(
        node.api().submit_transaction_batch(raw(&entry)).await.unwrap(),
        Err(SubmitRejection::AlreadyApplied(hex::encode(entry.hash)))
    );
}

#[tokio::test]
async fn test_submit_upstream_failure_is_system_error() {
    let node = funded_node().await;
    let alice = signer(1);
    let tx = batch(vec![transfer(&alice, Ticker::PFct, signer(2).address(), COIN)]);
    let entry = signed_entry(&node.params, &alice, &tx, b"up", START + 2);
    node.chain.fail_once(Call::Submit, 0);

    let err = node
        .api()
        .submit_transaction_batch(raw(&entry))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Chain(ChainError::Transport(_))));
}

#[tokio::test]
async fn test_rich_list_and_issuance() {
    let node = funded_node().await;
    let api = node.api();

    let rich = api.rich_list(Ticker::PFct, 10).unwrap();
    assert_eq!(
        rich,
        vec![
            (signer(1).address(), 1_000 * COIN),
            (signer(2).address(), 300 * COIN),
        ]
    );
    assert_eq!(api.rich_list(Ticker::PFct, 1).unwrap().len(), 1);
    assert!(api.rich_list(Ticker::PJpy, 10).unwrap().is_empty());

    let issuance = api.issuance().unwrap();
    assert_eq!(issuance.get(&Ticker::PFct), Some(&(1_300 * COIN as u128)));
    assert_eq!(
        issuance.get(&Ticker::Peg),
        Some(&(2 * node.params.coinbase_reward as u128))
    );
}

#[tokio::test]
async fn test_rates_and_quote() {
    let node = funded_node().await;
    let api = node.api();

    let rates = api.rates(START + 1).unwrap();
    assert_eq!(rates.get(&Ticker::PUsd), Some(&COIN));
    assert!(api.rates(START).unwrap().is_empty());

    let quote = api.quote(START + 1, Ticker::PFct, Ticker::PEur, 100 * COIN).unwrap();
    assert_eq!(quote.output, 200 * COIN);
    assert_eq!(quote.spread, 0);

    assert!(matches!(
        api.quote(START + 1, Ticker::PFct, Ticker::PJpy, COIN),
        Err(ApiError::MissingRate { ticker: Ticker::PJpy, .. })
    ));
    assert!(matches!(
        api.quote(START, Ticker::PFct, Ticker::PEur, COIN),
        Err(ApiError::MissingRate { .. })
    ));
}

#[tokio::test]
async fn test_history_selectors_and_filters() {
    let node = funded_node().await;
    let alice = signer(1);
    let bob = signer(2);
    let tx = batch(vec![
        transfer(&alice, Ticker::PFct, bob.address(), 5 * COIN),
        conversion(&alice, Ticker::PFct, 10 * COIN, Ticker::PUsd),
    ]);
    let entry = signed_entry(&node.params, &alice, &tx, b"h", START + 2);
    node.chain.add_oracle(START + 2, vec![oracle_entry(signer(3).address(), 3)]);
    node.chain.add_entry(START + 2, entry.clone());
    node.chain.set_tip(START + 2);
    node.sync_to_tip().await;
    let api = node.api();

    let by_entry = api
        .transaction_history(&HistoryFilter::new(HistorySelector::Entry(entry.hash)))
        .unwrap();
    assert_eq!(by_entry.rows.len(), 2);
    assert_eq!(by_entry.rows[1].tx_id, TxId::new(1, entry.hash).to_string());

    let txid: TxId = format!("1-{}", hex::encode(entry.hash)).parse().unwrap();
    let by_txid = api
        .transaction_history(&HistoryFilter::new(HistorySelector::TxId(txid)))
        .unwrap();
    assert_eq!(by_txid.rows.len(), 1);
    assert_eq!(by_txid.rows[0].action.kind, ActionKind::Conversion);

    // Bob appears as a burn recipient and as a transfer output.
    let bob_rows = api
        .transaction_history(&HistoryFilter::new(HistorySelector::Address(bob.address())))
        .unwrap();
    let kinds: Vec<_> = bob_rows.rows.iter().map(|r| r.action.kind).collect();
    assert_eq!(kinds, vec![ActionKind::Burn, ActionKind::Transfer]);

    let mut filter = HistoryFilter::new(HistorySelector::Height(START + 2));
    filter.kind = Some(ActionKind::Coinbase);
    let coinbase = api.transaction_history(&filter).unwrap();
    assert_eq!(coinbase.rows.len(), 1);
    assert_eq!(coinbase.rows[0].action.asset, Ticker::Peg);

    let mut filter = HistoryFilter::new(HistorySelector::Address(alice.address()));
    filter.asset = Some(Ticker::PUsd);
    let usd = api.transaction_history(&filter).unwrap();
    assert_eq!(usd.rows.len(), 1);
    assert_eq!(usd.rows[0].action.to_amount, Some(10 * COIN));

    let mut filter = HistoryFilter::new(HistorySelector::Address(alice.address()));
    filter.limit = 1;
    let first = api.transaction_history(&filter).unwrap();
    assert_eq!(first.rows.len(), 1);
    assert_eq!(first.next_offset, Some(1));
}
