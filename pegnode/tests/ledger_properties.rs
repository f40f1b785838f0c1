// Copyright (c) 2024 Botho Foundation
//
//! Property tests over randomly generated block sequences.
//!
//! Transfers only move value, so the pFCT supply must equal the amount
//! burned no matter which batches are accepted or skipped. Conversions into
//! PEG must never use more than the bank cap at any height.

mod common;

use common::*;
use pegnode::params::COIN;
use pegnode::ticker::Ticker;
use proptest::prelude::*;

const ACCOUNTS: u8 = 4;

#[derive(Debug, Clone)]
struct Move {
    from: u8,
    to: u8,
    amount: u64,
}

fn moves() -> impl Strategy<Value = Vec<Vec<Move>>> {
    let one = (0..ACCOUNTS, 0..ACCOUNTS, 1..600u64).prop_map(|(from, to, whole)| Move {
        from,
        to,
        amount: whole * COIN,
    });
    prop::collection::vec(prop::collection::vec(one, 0..4), 1..5)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_transfers_conserve_supply(blocks in moves()) {
        let node = TestNode::new();
        let signers: Vec<_> = (1..=ACCOUNTS).map(signer).collect();
        let burned = 500 * COIN;
        for (i, s) in signers.iter().enumerate() {
            node.chain.add_factoid(START, burn(s.address(), burned, 200 + i as u8));
        }

        let mut salt = 0u32;
        for (offset, moves) in blocks.iter().enumerate() {
            let height = START + 1 + offset as u64;
            for m in moves {
                let from = &signers[m.from as usize];
                let to = signers[m.to as usize].address();
                let tx = batch(vec![transfer(from, Ticker::PFct, to, m.amount)]);
                salt += 1;
                node.chain.add_entry(
                    height,
                    signed_entry(&node.params, from, &tx, &salt.to_be_bytes(), height),
                );
            }
        }
        node.chain.set_tip(START + blocks.len() as u64);

        runtime().block_on(node.sync_to_tip());

        let total: u64 = signers
            .iter()
            .map(|s| node.balance(&s.address(), Ticker::PFct))
            .sum();
        prop_assert_eq!(total, burned * ACCOUNTS as u64);
        let issuance = node.api().issuance().unwrap();
        prop_assert_eq!(
            issuance.get(&Ticker::PFct).copied(),
            Some(burned as u128 * ACCOUNTS as u128)
        );
        prop_assert_eq!(node.committed(), Some(START + blocks.len() as u64));
    }

    #[test]
    fn prop_bank_never_exceeds_cap(amounts in prop::collection::vec(1..4_000u64, 1..6)) {
        let node = TestNode::new();
        let signers: Vec<_> = (1..=amounts.len() as u8).map(signer).collect();
        for (i, s) in signers.iter().enumerate() {
            node.chain.add_factoid(START, burn(s.address(), 4_000 * COIN, 200 + i as u8));
        }
        node.chain.add_oracle(START + 1, vec![oracle_entry(signer(50).address(), 1)]);
        for (i, (s, whole)) in signers.iter().zip(&amounts).enumerate() {
            let tx = batch(vec![conversion(s, Ticker::PFct, whole * COIN, Ticker::Peg)]);
            node.chain.add_entry(
                START + 1,
                signed_entry(&node.params, s, &tx, &[i as u8], START + 1),
            );
        }
        node.chain.set_tip(START + 1);

        runtime().block_on(node.sync_to_tip());

        let txn = node.ledger.read_txn().unwrap();
        let bank = node.ledger.bank.get(START + 1, &txn).unwrap().unwrap();
        let usage = bank.usage.unwrap();
        prop_assert!(usage.used <= bank.cap);
        prop_assert!(usage.used <= usage.requested);
        // Each pFCT buys two PEG.
        let requested: u64 = amounts.iter().map(|a| 2 * a * COIN).sum();
        prop_assert_eq!(usage.requested, requested);

        let converted: u64 = signers
            .iter()
            .map(|s| node.balance(&s.address(), Ticker::Peg))
            .sum();
        prop_assert_eq!(converted, usage.used);
    }
}
