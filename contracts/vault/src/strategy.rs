use soroban_sdk::{contractclient, Env};

/// Calls the vault makes into its strategies.
///
/// `report` is initiated by the strategy, so nothing here is called back
/// into it during that invocation.
#[allow(dead_code)]
#[contractclient(name = "Client")]
pub trait StrategyInterface {
    /// Frees up to `amount_needed` and transfers it to the vault.
    /// Returns the part of `amount_needed` the strategy could not cover.
    fn withdraw(env: Env, amount_needed: i128) -> i128;

    /// Whether the strategy has entered emergency exit.
    fn emergency_exit(env: Env) -> bool;
}
