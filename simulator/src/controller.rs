//! Simulation controller.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure, Context};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

use strongbox_common::{parse_amount, AccountId, LedgerError};
use strongbox_ledger::{LedgerEngine, TransferRequest};

use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};

/// An account opened by the running scenario.
#[derive(Debug, Clone)]
struct SimAccount {
    id: AccountId,
    currency: String,
}

/// Drives a ledger engine through scenarios.
pub struct SimulationController {
    /// Engine under test.
    engine: Arc<LedgerEngine>,
    /// Maximum operations in flight.
    concurrency: usize,
    /// Random number generator.
    rng: StdRng,
    /// Accounts by alias.
    accounts: HashMap<String, SimAccount>,
    /// Sum of balances each currency should hold.
    expected_totals: BTreeMap<String, Decimal>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(engine: Arc<LedgerEngine>, concurrency: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            engine,
            concurrency: concurrency.max(1),
            rng,
            accounts: HashMap::new(),
            expected_totals: BTreeMap::new(),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Run a scenario, then check that balances were conserved.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            steps = scenario.steps.len(),
            "Running scenario: {}",
            scenario.description
        );

        for (index, step) in scenario.steps.iter().enumerate() {
            self.execute_step(step)
                .await
                .with_context(|| format!("Step {} of {} failed", index + 1, scenario.name))?;
        }

        self.verify_conservation().await
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::CreateAccount {
                alias,
                balance,
                currency,
            } => {
                let balance = parse_amount(balance)?;
                let id = self.engine.create_account(alias, balance, currency).await?;

                *self.expected_totals.entry(currency.clone()).or_default() += balance;
                self.accounts.insert(
                    alias.clone(),
                    SimAccount {
                        id,
                        currency: currency.clone(),
                    },
                );

                debug!(alias = %alias, account_id = %id, "Account opened");
            }
            ScenarioStep::Transfer {
                from,
                to,
                amount,
                currency,
                expect,
            } => {
                let request = TransferRequest::new(
                    currency.as_str(),
                    parse_amount(amount)?,
                    self.account(from)?.id,
                    self.account(to)?.id,
                );

                let outcome = timed(&self.metrics, self.engine.transfer(&request)).await;
                check_expectation("Transfer", &outcome, expect.as_deref())?;
            }
            ScenarioStep::Adjust {
                account,
                delta,
                expect,
            } => {
                let account = self.account(account)?.clone();
                let delta = parse_amount(delta)?;

                let outcome = timed(&self.metrics, self.engine.adjust_balance(account.id, delta)).await;
                if outcome.is_ok() {
                    *self.expected_totals.entry(account.currency).or_default() += delta;
                }
                check_expectation("Adjustment", &outcome, expect.as_deref())?;
            }
            ScenarioStep::ConcurrentTransfers {
                from,
                to,
                amount,
                currency,
                count,
                both_directions,
                expect_committed,
            } => {
                let amount = parse_amount(amount)?;
                let from = self.account(from)?.id;
                let to = self.account(to)?.id;

                let requests = (0..*count)
                    .map(|i| {
                        if *both_directions && i % 2 == 1 {
                            TransferRequest::new(currency.as_str(), amount, to, from)
                        } else {
                            TransferRequest::new(currency.as_str(), amount, from, to)
                        }
                    })
                    .collect();

                let committed = self.run_concurrent(requests).await?;
                info!(committed, attempted = count, "Concurrent transfers finished");

                if let Some(expected) = expect_committed {
                    ensure!(
                        committed == *expected,
                        "{} transfers committed, expected {}",
                        committed,
                        expected
                    );
                }
            }
            ScenarioStep::RandomTransfers {
                accounts,
                currency,
                max_amount,
                count,
            } => {
                let ids = accounts
                    .iter()
                    .map(|alias| self.account(alias).map(|account| account.id))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                ensure!(ids.len() >= 2, "Random transfers need at least two accounts");

                let max_units = (parse_amount(max_amount)? * Decimal::from(100))
                    .to_i64()
                    .filter(|units| *units >= 1)
                    .context("Maximum amount must be at least 0.01")?;

                let requests = (0..*count)
                    .map(|_| {
                        let from = self.rng.gen_range(0..ids.len());
                        let mut to = self.rng.gen_range(0..ids.len());
                        while to == from {
                            to = self.rng.gen_range(0..ids.len());
                        }
                        let amount = Decimal::new(self.rng.gen_range(1..=max_units), 2);
                        TransferRequest::new(currency.as_str(), amount, ids[from], ids[to])
                    })
                    .collect();

                let committed = self.run_concurrent(requests).await?;
                info!(committed, attempted = count, "Random transfers finished");
            }
            ScenarioStep::AssertBalance { account, amount } => {
                let expected = parse_amount(amount)?;
                let actual = self.engine.get_balance(self.account(account)?.id).await?;

                ensure!(
                    actual == expected,
                    "Balance of {} is {}, expected {}",
                    account,
                    actual,
                    expected
                );
                info!(account = %account, balance = %actual, "Balance matches");
            }
        }

        Ok(())
    }

    /// Run transfers with at most `concurrency` in flight. Returns how many
    /// committed.
    async fn run_concurrent(&self, requests: Vec<TransferRequest>) -> anyhow::Result<u64> {
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let engine = self.engine.clone();
                let metrics = self.metrics.clone();
                let permits = permits.clone();

                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await?;
                    let outcome = timed(&metrics, engine.transfer(&request)).await;
                    anyhow::Ok(outcome.is_ok())
                })
            })
            .collect();

        let mut committed = 0;
        for handle in join_all(handles).await {
            if handle?? {
                committed += 1;
            }
        }

        Ok(committed)
    }

    /// Check that every account opened by this run is non-negative and that
    /// each currency still sums to what was deposited.
    pub async fn verify_conservation(&self) -> anyhow::Result<()> {
        let ours: HashMap<AccountId, &str> = self
            .accounts
            .values()
            .map(|account| (account.id, account.currency.as_str()))
            .collect();

        let mut totals: BTreeMap<&str, Decimal> = BTreeMap::new();
        for account in self.engine.list_accounts().await? {
            let Some(currency) = ours.get(&account.id) else {
                continue;
            };

            ensure!(
                account.balance >= Decimal::ZERO,
                "Account {} has negative balance {}",
                account.id,
                account.balance
            );
            *totals.entry(*currency).or_default() += account.balance;
        }

        for (currency, expected) in &self.expected_totals {
            let actual = totals.get(currency.as_str()).copied().unwrap_or_default();
            ensure!(
                actual == *expected,
                "{} total is {}, expected {}",
                currency,
                actual,
                expected
            );
            info!(currency = %currency, total = %actual, "Balances conserved");
        }

        Ok(())
    }

    fn account(&self, alias: &str) -> anyhow::Result<&SimAccount> {
        self.accounts
            .get(alias)
            .with_context(|| format!("Unknown account alias: {}", alias))
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

/// Await `operation` and record its outcome and latency.
async fn timed<F>(metrics: &RwLock<SimulationMetrics>, operation: F) -> Result<u64, LedgerError>
where
    F: Future<Output = Result<u64, LedgerError>>,
{
    let started = Instant::now();
    let outcome = operation.await;
    let latency = started.elapsed();

    let mut metrics = metrics.write().await;
    match &outcome {
        Ok(_) => metrics.record_success(latency),
        Err(e) => metrics.record_failure(e.error_code(), latency),
    }

    outcome
}

fn check_expectation(
    operation: &str,
    outcome: &Result<u64, LedgerError>,
    expect: Option<&str>,
) -> anyhow::Result<()> {
    match (outcome, expect) {
        (Ok(_), None) => Ok(()),
        (Err(e), Some(code)) if e.error_code() == code => {
            debug!(error_code = code, "{} failed as expected", operation);
            Ok(())
        }
        (Ok(rows), Some(code)) => bail!("{} updated {} rows, expected {}", operation, rows, code),
        (Err(e), _) => bail!("{} failed with {}: {}", operation, e.error_code(), e),
    }
}
