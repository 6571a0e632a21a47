//! Simulation scenarios.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
///
/// Accounts are referred to by alias; aliases are bound when a
/// `CreateAccount` step runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Open an account.
    CreateAccount {
        alias: String,
        balance: String,
        currency: String,
    },
    /// Run one transfer. `expect` is an error code, or absent for success.
    Transfer {
        from: String,
        to: String,
        amount: String,
        currency: String,
        #[serde(default)]
        expect: Option<String>,
    },
    /// Run one balance adjustment. `expect` as for `Transfer`.
    Adjust {
        account: String,
        delta: String,
        #[serde(default)]
        expect: Option<String>,
    },
    /// Run `count` identical transfers at once. With `both_directions` every
    /// other transfer runs from `to` back to `from`.
    ConcurrentTransfers {
        from: String,
        to: String,
        amount: String,
        currency: String,
        count: usize,
        #[serde(default)]
        both_directions: bool,
        #[serde(default)]
        expect_committed: Option<u64>,
    },
    /// Run `count` transfers between random pairs of `accounts`.
    RandomTransfers {
        accounts: Vec<String>,
        currency: String,
        max_amount: String,
        count: usize,
    },
    /// Fail the scenario unless the account holds exactly `amount`.
    AssertBalance { account: String, amount: String },
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str, accounts: usize) -> anyhow::Result<Self> {
        match name {
            "single-transfer" => Ok(Self::single_transfer()),
            "drain" => Ok(Self::drain()),
            "reverse-transfers" => Ok(Self::reverse_transfers()),
            "random-load" => Ok(Self::random_load(accounts)),
            path if path.ends_with(".json") => Self::from_file(Path::new(path)),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Read a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid scenario {}", path.display()))
    }

    /// Single EUR transfer with exact balance checks.
    fn single_transfer() -> Self {
        Self {
            name: "single-transfer".to_string(),
            description: "One 50.0123 EUR transfer between two accounts".to_string(),
            steps: vec![
                create("alice", "500", "EUR"),
                create("bob", "500", "EUR"),
                create("carol", "500", "GBP"),
                ScenarioStep::Transfer {
                    from: "alice".to_string(),
                    to: "bob".to_string(),
                    amount: "50.0123".to_string(),
                    currency: "EUR".to_string(),
                    expect: None,
                },
                ScenarioStep::Transfer {
                    from: "carol".to_string(),
                    to: "bob".to_string(),
                    amount: "10".to_string(),
                    currency: "GBP".to_string(),
                    expect: Some("CURRENCY_MISMATCH".to_string()),
                },
                assert_balance("alice", "449.9877"),
                assert_balance("bob", "550.0123"),
                assert_balance("carol", "500"),
            ],
        }
    }

    /// Many concurrent transfers racing to empty one account.
    fn drain() -> Self {
        Self {
            name: "drain".to_string(),
            description: "100 concurrent 2 USD transfers out of a 100 USD account".to_string(),
            steps: vec![
                create("source", "100", "USD"),
                create("sink", "0", "USD"),
                ScenarioStep::ConcurrentTransfers {
                    from: "source".to_string(),
                    to: "sink".to_string(),
                    amount: "2".to_string(),
                    currency: "USD".to_string(),
                    count: 100,
                    both_directions: false,
                    expect_committed: Some(50),
                },
                assert_balance("source", "0"),
                assert_balance("sink", "100"),
            ],
        }
    }

    /// Opposite transfers between the same pair of accounts.
    fn reverse_transfers() -> Self {
        Self {
            name: "reverse-transfers".to_string(),
            description: "Concurrent transfers in both directions between two accounts"
                .to_string(),
            steps: vec![
                create("east", "1000", "USD"),
                create("west", "1000", "USD"),
                ScenarioStep::ConcurrentTransfers {
                    from: "east".to_string(),
                    to: "west".to_string(),
                    amount: "1".to_string(),
                    currency: "USD".to_string(),
                    count: 200,
                    both_directions: true,
                    expect_committed: Some(200),
                },
                assert_balance("east", "1000"),
                assert_balance("west", "1000"),
            ],
        }
    }

    /// Random transfers among `accounts` accounts.
    fn random_load(accounts: usize) -> Self {
        let aliases: Vec<String> = (0..accounts.max(2)).map(|i| format!("acct-{}", i)).collect();

        let mut steps: Vec<ScenarioStep> = aliases
            .iter()
            .map(|alias| create(alias, "1000", "USD"))
            .collect();

        steps.push(ScenarioStep::RandomTransfers {
            accounts: aliases,
            currency: "USD".to_string(),
            max_amount: "250".to_string(),
            count: 5000,
        });

        Self {
            name: "random-load".to_string(),
            description: format!("Random USD transfers among {} accounts", accounts.max(2)),
            steps,
        }
    }
}

fn create(alias: &str, balance: &str, currency: &str) -> ScenarioStep {
    ScenarioStep::CreateAccount {
        alias: alias.to_string(),
        balance: balance.to_string(),
        currency: currency.to_string(),
    }
}

fn assert_balance(account: &str, amount: &str) -> ScenarioStep {
    ScenarioStep::AssertBalance {
        account: account.to_string(),
        amount: amount.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scenarios() {
        for name in ["single-transfer", "drain", "reverse-transfers", "random-load"] {
            let scenario = Scenario::load(name, 4).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }

        assert!(Scenario::load("chaos", 4).is_err());
    }

    #[test]
    fn test_scenario_from_json() {
        let json = r#"{
            "name": "custom",
            "description": "overdraw attempt",
            "steps": [
                {"CreateAccount": {"alias": "a", "balance": "10", "currency": "USD"}},
                {"Adjust": {"account": "a", "delta": "-11", "expect": "INSUFFICIENT_FUNDS"}},
                {"AssertBalance": {"account": "a", "amount": "10"}}
            ]
        }"#;

        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.steps.len(), 3);
        assert!(matches!(
            &scenario.steps[1],
            ScenarioStep::Adjust { expect: Some(code), .. } if code == "INSUFFICIENT_FUNDS"
        ));
    }
}
