//! Property tests: conservation and non-negativity under arbitrary workloads.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;
use strongbox_common::AccountId;
use strongbox_ledger::{LedgerEngine, TransferRequest};
use strongbox_store::{Account, MemoryBalanceStore};

#[derive(Debug, Clone)]
enum Op {
    Transfer { from: usize, to: usize, cents: i64 },
    Adjust { account: usize, cents: i64 },
}

fn op_strategy(accounts: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..accounts, 0..accounts, -500i64..5_000)
            .prop_map(|(from, to, cents)| Op::Transfer { from, to, cents }),
        1 => (0..accounts, -5_000i64..5_000)
            .prop_map(|(account, cents)| Op::Adjust { account, cents }),
    ]
}

async fn engine_with(balances: &[i64]) -> (LedgerEngine, Vec<AccountId>) {
    let engine = LedgerEngine::new(Arc::new(MemoryBalanceStore::new(Duration::from_millis(200))));
    let mut ids = Vec::new();
    for (i, cents) in balances.iter().enumerate() {
        let owner = format!("owner-{}", i);
        ids.push(
            engine
                .create_account(&owner, Decimal::new(*cents, 2), "USD")
                .await
                .unwrap(),
        );
    }
    (engine, ids)
}

fn total(accounts: &[Account]) -> Decimal {
    accounts.iter().map(|account| account.balance).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn transfers_conserve_and_never_go_negative(
        balances in prop::collection::vec(0i64..10_000, 2..5),
        ops in prop::collection::vec(op_strategy(4), 1..40),
    ) {
        tokio_test::block_on(async {
            let (engine, ids) = engine_with(&balances).await;
            let mut expected_total = total(&engine.list_accounts().await.unwrap());

            for op in ops {
                let before = engine.list_accounts().await.unwrap();

                match op {
                    Op::Transfer { from, to, cents } => {
                        let from = ids[from % ids.len()];
                        let to = ids[to % ids.len()];
                        let request = TransferRequest::new("USD", Decimal::new(cents, 2), from, to);

                        match engine.transfer(&request).await {
                            Ok(rows) => assert_eq!(rows, 2),
                            Err(_) => assert_eq!(engine.list_accounts().await.unwrap(), before),
                        }
                    }
                    Op::Adjust { account, cents } => {
                        let account = ids[account % ids.len()];
                        let delta = Decimal::new(cents, 2);

                        match engine.adjust_balance(account, delta).await {
                            Ok(rows) => {
                                assert_eq!(rows, 1);
                                expected_total += delta;
                            }
                            Err(_) => assert_eq!(engine.list_accounts().await.unwrap(), before),
                        }
                    }
                }

                let after = engine.list_accounts().await.unwrap();
                assert_eq!(total(&after), expected_total);
                assert!(after.iter().all(|account| account.balance >= Decimal::ZERO));
            }
        });
    }
}
