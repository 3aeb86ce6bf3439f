use soroban_sdk::{contractclient, contracttype, Address, Env};

/// The vault's per-strategy accounting record, as returned by `Vault::strategy`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyParams {
    pub activation: u64,
    pub debt_ratio: u32,
    pub min_debt_per_harvest: i128,
    pub max_debt_per_harvest: i128,
    pub last_report: u64,
    pub total_debt: i128,
    pub total_gain: i128,
    pub total_loss: i128,
}

/// Vault entry points a strategy depends on.
#[allow(dead_code)]
#[contractclient(name = "Client")]
pub trait VaultInterface {
    fn token(env: Env) -> Address;

    fn governance(env: Env) -> Address;

    fn strategy(env: Env, strategy: Address) -> StrategyParams;

    fn debt_outstanding(env: Env, strategy: Address) -> i128;

    fn report(env: Env, strategy: Address, gain: i128, loss: i128, debt_payment: i128) -> i128;

    fn revoke_strategy(env: Env, caller: Address, strategy: Address);
}
