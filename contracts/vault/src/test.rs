#![cfg(test)]

use super::*;
use soroban_sdk::{
    contract, contractimpl, contracttype,
    testutils::{Address as _, Events, Ledger},
    token::{StellarAssetClient, TokenClient},
    Address, Env, IntoVal, Symbol, TryFromVal, Val, Vec,
};

const AMOUNT: i128 = 1_000 * 10_000_000;

// ============================================================================
// MOCK STRATEGY
// ============================================================================

#[contracttype]
#[derive(Clone)]
enum MockKey {
    Vault,
    Token,
    EmergencyExit,
}

/// Minimal strategy that holds whatever the vault lends it and lets tests
/// drive `report` with arbitrary numbers.
#[contract]
pub struct MockStrategy;

#[contractimpl]
impl MockStrategy {
    pub fn setup(env: Env, vault: Address, token: Address) {
        env.storage().instance().set(&MockKey::Vault, &vault);
        env.storage().instance().set(&MockKey::Token, &token);
    }

    pub fn report(env: Env, gain: i128, loss: i128, debt_payment: i128) -> i128 {
        let (vault, token) = Self::addresses(&env);
        let this = env.current_contract_address();
        if gain + debt_payment > 0 {
            token::Client::new(&env, &token).approve(
                &this,
                &vault,
                &(gain + debt_payment),
                &(env.ledger().sequence() + 100),
            );
        }
        VaultClient::new(&env, &vault).report(&this, &gain, &loss, &debt_payment)
    }

    pub fn withdraw(env: Env, amount_needed: i128) -> i128 {
        let (vault, token) = Self::addresses(&env);
        let this = env.current_contract_address();
        let token_client = token::Client::new(&env, &token);
        let freed = amount_needed.min(token_client.balance(&this));
        if freed > 0 {
            token_client.transfer(&this, &vault, &freed);
        }
        amount_needed - freed
    }

    pub fn revoke_self(env: Env) {
        let (vault, _) = Self::addresses(&env);
        let this = env.current_contract_address();
        VaultClient::new(&env, &vault).revoke_strategy(&this, &this);
    }

    pub fn set_emergency_exit(env: Env) {
        env.storage().instance().set(&MockKey::EmergencyExit, &true);
    }

    pub fn emergency_exit(env: Env) -> bool {
        env.storage().instance().get(&MockKey::EmergencyExit).unwrap_or(false)
    }

    /// Sends `amount` away to simulate a realized loss.
    pub fn lose(env: Env, sink: Address, amount: i128) {
        let (_, token) = Self::addresses(&env);
        token::Client::new(&env, &token).transfer(&env.current_contract_address(), &sink, &amount);
    }

    fn addresses(env: &Env) -> (Address, Address) {
        let storage = env.storage().instance();
        (
            storage.get(&MockKey::Vault).unwrap(),
            storage.get(&MockKey::Token).unwrap(),
        )
    }
}

// ============================================================================
// SETUP
// ============================================================================

struct Setup {
    env: Env,
    vault: VaultClient<'static>,
    token: TokenClient<'static>,
    asset: StellarAssetClient<'static>,
    governance: Address,
    guardian: Address,
    user: Address,
}

fn setup() -> Setup {
    let env = Env::default();
    env.mock_all_auths();

    let token_admin = Address::generate(&env);
    let token_address = env
        .register_stellar_asset_contract_v2(token_admin)
        .address();
    let token = TokenClient::new(&env, &token_address);
    let asset = StellarAssetClient::new(&env, &token_address);

    let governance = Address::generate(&env);
    let guardian = Address::generate(&env);
    let user = Address::generate(&env);
    asset.mint(&user, &(10 * AMOUNT));

    let vault_address = env.register(Vault, ());
    let vault = VaultClient::new(&env, &vault_address);
    vault.initialize(&governance, &guardian, &token_address);

    Setup { env, vault, token, asset, governance, guardian, user }
}

fn add_strategy(s: &Setup, debt_ratio: u32) -> MockStrategyClient<'static> {
    let address = s.env.register(MockStrategy, ());
    let strategy = MockStrategyClient::new(&s.env, &address);
    strategy.setup(&s.vault.address, &s.token.address);
    s.vault.add_strategy(&address, &debt_ratio, &0, &i128::MAX);
    strategy
}

fn find_event<T: TryFromVal<Env, Val>>(env: &Env, contract: &Address, topic: Symbol) -> Option<T> {
    let topics: Vec<Val> = (topic,).into_val(env);
    env.events()
        .all()
        .iter()
        .filter(|e| e.0 == *contract && e.1 == topics)
        .last()
        .and_then(|e| T::try_from_val(env, &e.2).ok())
}

// ============================================================================
// INITIALIZATION
// ============================================================================

#[test]
fn test_initialize_sets_roles_and_defaults() {
    let s = setup();

    assert_eq!(s.vault.governance(), s.governance);
    assert_eq!(s.vault.guardian(), s.guardian);
    assert_eq!(s.vault.token(), s.token.address);
    assert_eq!(s.vault.deposit_limit(), i128::MAX);
    assert_eq!(s.vault.total_supply(), 0);
    assert_eq!(s.vault.debt_ratio(), 0);
    assert!(!s.vault.is_shutdown());
    assert_eq!(s.vault.version(), 1);
}

#[test]
fn test_initialize_twice_fails() {
    let s = setup();

    assert_eq!(
        s.vault.try_initialize(&s.governance, &s.guardian, &s.token.address),
        Err(Ok(VaultError::AlreadyInitialized))
    );
}

// ============================================================================
// DEPOSIT / WITHDRAW
// ============================================================================

#[test]
fn test_first_deposit_mints_shares_one_to_one() {
    let s = setup();

    let shares = s.vault.deposit(&s.user, &AMOUNT);

    let event: DepositEvent = find_event(&s.env, &s.vault.address, symbol_short!("deposit")).unwrap();
    assert_eq!(event, DepositEvent { user: s.user.clone(), amount: AMOUNT, shares: AMOUNT });

    assert_eq!(shares, AMOUNT);
    assert_eq!(s.vault.balance(&s.user), AMOUNT);
    assert_eq!(s.token.balance(&s.vault.address), AMOUNT);
    assert_eq!(s.vault.total_assets(), AMOUNT);
    assert_eq!(s.vault.price_per_share(), 10_000_000);
}

#[test]
fn test_deposit_rejects_zero_amount() {
    let s = setup();

    assert_eq!(s.vault.try_deposit(&s.user, &0), Err(Ok(VaultError::InvalidAmount)));
}

#[test]
fn test_deposit_respects_limit() {
    let s = setup();

    s.vault.set_deposit_limit(&AMOUNT);
    let event: DepositLimitEvent = find_event(&s.env, &s.vault.address, symbol_short!("limit")).unwrap();
    assert_eq!(event.old_limit, i128::MAX);
    assert_eq!(event.new_limit, AMOUNT);

    s.vault.deposit(&s.user, &AMOUNT);
    assert_eq!(
        s.vault.try_deposit(&s.user, &1),
        Err(Ok(VaultError::DepositLimitExceeded))
    );
}

#[test]
fn test_deposit_share_overflow_fails() {
    let s = setup();
    let whale = Address::generate(&s.env);
    let huge = i128::MAX / 2;
    s.asset.mint(&whale, &huge);

    s.vault.deposit(&s.user, &AMOUNT);
    assert_eq!(s.vault.try_deposit(&whale, &huge), Err(Ok(VaultError::InvalidAmount)));
    assert_eq!(s.token.balance(&whale), huge);
    assert_eq!(s.vault.total_supply(), AMOUNT);
}

#[test]
fn test_withdraw_from_idle_funds() {
    let s = setup();
    let before = s.token.balance(&s.user);

    s.vault.deposit(&s.user, &AMOUNT);
    let amount = s.vault.withdraw(&s.user, &AMOUNT, &0);

    assert_eq!(amount, AMOUNT);
    assert_eq!(s.token.balance(&s.user), before);
    assert_eq!(s.vault.balance(&s.user), 0);
    assert_eq!(s.vault.total_supply(), 0);
}

#[test]
fn test_withdraw_more_shares_than_owned_fails() {
    let s = setup();

    s.vault.deposit(&s.user, &AMOUNT);
    assert_eq!(
        s.vault.try_withdraw(&s.user, &(AMOUNT + 1), &0),
        Err(Ok(VaultError::InsufficientShares))
    );
    assert_eq!(
        s.vault.try_withdraw(&s.user, &AMOUNT, &(MAX_BPS + 1)),
        Err(Ok(VaultError::InvalidMaxLoss))
    );
}

#[test]
fn test_withdraw_pulls_from_strategy() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);
    assert_eq!(s.token.balance(&s.vault.address), 0);

    let amount = s.vault.withdraw(&s.user, &(AMOUNT / 2), &0);

    assert_eq!(amount, AMOUNT / 2);
    assert_eq!(s.token.balance(&strategy.address), AMOUNT / 2);
    assert_eq!(s.vault.strategy(&strategy.address).total_debt, AMOUNT / 2);
    assert_eq!(s.vault.total_debt(), AMOUNT / 2);
}

#[test]
fn test_withdraw_loss_above_tolerance_fails() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);
    let sink = Address::generate(&s.env);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);
    strategy.lose(&sink, &(AMOUNT / 2));

    assert_eq!(
        s.vault.try_withdraw(&s.user, &AMOUNT, &100),
        Err(Ok(VaultError::MaxLossExceeded))
    );

    let amount = s.vault.withdraw(&s.user, &AMOUNT, &MAX_BPS);
    assert_eq!(amount, AMOUNT / 2);

    let params = s.vault.strategy(&strategy.address);
    assert_eq!(params.total_loss, AMOUNT / 2);
    assert_eq!(params.total_debt, 0);
    assert_eq!(s.vault.total_supply(), 0);
}

// ============================================================================
// STRATEGY MANAGEMENT
// ============================================================================

#[test]
fn test_add_strategy_registers_and_queues() {
    let s = setup();
    let strategy = add_strategy(&s, 4_000);

    let params = s.vault.strategy(&strategy.address);
    assert_eq!(params.debt_ratio, 4_000);
    assert_eq!(params.total_debt, 0);
    assert_eq!(s.vault.debt_ratio(), 4_000);
    assert_eq!(s.vault.withdrawal_queue().len(), 1);

    assert_eq!(
        s.vault.try_add_strategy(&strategy.address, &1_000, &0, &i128::MAX),
        Err(Ok(VaultError::StrategyExists))
    );
}

#[test]
fn test_add_strategy_ratio_ceiling() {
    let s = setup();
    add_strategy(&s, 7_000);
    let other = Address::generate(&s.env);

    assert_eq!(
        s.vault.try_add_strategy(&other, &3_001, &0, &i128::MAX),
        Err(Ok(VaultError::DebtRatioExceeded))
    );
    assert_eq!(
        s.vault.try_add_strategy(&other, &1_000, &10, &5),
        Err(Ok(VaultError::InvalidDebtBounds))
    );
}

#[test]
fn test_report_extends_credit_by_ratio() {
    let s = setup();
    let strategy = add_strategy(&s, 6_000);

    s.vault.deposit(&s.user, &AMOUNT);
    assert_eq!(s.vault.credit_available(&strategy.address), AMOUNT * 6 / 10);

    let outstanding = strategy.report(&0, &0, &0);

    assert_eq!(outstanding, 0);
    assert_eq!(s.token.balance(&strategy.address), AMOUNT * 6 / 10);
    assert_eq!(s.token.balance(&s.vault.address), AMOUNT * 4 / 10);
    assert_eq!(s.vault.total_debt(), AMOUNT * 6 / 10);
    assert_eq!(s.vault.total_assets(), AMOUNT);
    assert_eq!(s.vault.credit_available(&strategy.address), 0);
}

#[test]
fn test_report_gain_raises_share_price() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);

    let gain = AMOUNT / 10;
    s.asset.mint(&strategy.address, &gain);
    strategy.report(&gain, &0, &0);

    let event: StrategyReportedEvent = find_event(&s.env, &s.vault.address, symbol_short!("harvested")).unwrap();
    assert_eq!(event.gain, gain);
    assert_eq!(event.total_gain, gain);

    assert_eq!(s.token.balance(&s.vault.address), gain);
    assert_eq!(s.vault.total_assets(), AMOUNT + gain);
    assert_eq!(s.vault.price_per_share(), 11_000_000);
}

#[test]
fn test_report_loss_shrinks_debt_ratio() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);
    let sink = Address::generate(&s.env);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);

    let loss = AMOUNT / 5;
    strategy.lose(&sink, &loss);
    let outstanding = strategy.report(&0, &loss, &0);

    let params = s.vault.strategy(&strategy.address);
    assert_eq!(params.total_loss, loss);
    assert_eq!(params.total_debt, AMOUNT - loss);
    assert_eq!(params.debt_ratio, 8_000);
    assert_eq!(s.vault.debt_ratio(), 8_000);
    // limit is 80% of the remaining 800
    assert_eq!(outstanding, (AMOUNT - loss) - (AMOUNT - loss) * 8 / 10);
}

#[test]
fn test_report_loss_above_debt_fails() {
    let s = setup();
    let strategy = Address::generate(&s.env);
    s.vault.add_strategy(&strategy, &MAX_BPS, &0, &i128::MAX);

    assert_eq!(
        s.vault.try_report(&strategy, &0, &1, &0),
        Err(Ok(VaultError::LossExceedsDebt))
    );
}

#[test]
fn test_report_from_unknown_strategy_fails() {
    let s = setup();
    let stranger = Address::generate(&s.env);

    assert_eq!(
        s.vault.try_report(&stranger, &0, &0, &0),
        Err(Ok(VaultError::StrategyNotActive))
    );
}

// ============================================================================
// REVOCATION
// ============================================================================

#[test]
fn test_revoke_makes_all_debt_outstanding() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);
    assert_eq!(s.vault.debt_outstanding(&strategy.address), 0);

    s.vault.revoke_strategy(&s.governance, &strategy.address);
    let event: StrategyRevokedEvent = find_event(&s.env, &s.vault.address, symbol_short!("revoked")).unwrap();
    assert_eq!(event.caller, s.governance);

    assert_eq!(s.vault.strategy(&strategy.address).debt_ratio, 0);
    assert_eq!(s.vault.debt_ratio(), 0);
    assert_eq!(s.vault.debt_outstanding(&strategy.address), AMOUNT);
    assert_eq!(s.vault.credit_available(&strategy.address), 0);

    let outstanding = strategy.report(&0, &0, &AMOUNT);

    assert_eq!(outstanding, 0);
    assert_eq!(s.token.balance(&s.vault.address), AMOUNT);
    assert_eq!(s.token.balance(&strategy.address), 0);
    assert_eq!(s.vault.total_debt(), 0);
}

#[test]
fn test_revoke_by_guardian_and_strategy() {
    let s = setup();
    let first = add_strategy(&s, 5_000);
    let second = add_strategy(&s, 5_000);

    s.vault.revoke_strategy(&s.guardian, &first.address);
    second.revoke_self();

    assert_eq!(s.vault.strategy(&first.address).debt_ratio, 0);
    assert_eq!(s.vault.strategy(&second.address).debt_ratio, 0);
    assert_eq!(s.vault.debt_ratio(), 0);
}

#[test]
fn test_revoke_by_stranger_fails() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);
    let stranger = Address::generate(&s.env);

    assert_eq!(
        s.vault.try_revoke_strategy(&stranger, &strategy.address),
        Err(Ok(VaultError::NotAuthorized))
    );
}

#[test]
fn test_revoke_twice_is_noop() {
    let s = setup();
    let strategy = add_strategy(&s, 3_000);

    s.vault.revoke_strategy(&s.governance, &strategy.address);
    s.vault.revoke_strategy(&s.governance, &strategy.address);

    assert_eq!(s.vault.debt_ratio(), 0);
}

#[test]
fn test_revoke_only_unwinds_that_strategy() {
    let s = setup();
    let kept = add_strategy(&s, 5_000);
    let revoked = add_strategy(&s, 5_000);

    s.vault.deposit(&s.user, &AMOUNT);
    kept.report(&0, &0, &0);
    revoked.report(&0, &0, &0);

    s.vault.revoke_strategy(&s.governance, &revoked.address);
    revoked.report(&0, &0, &(AMOUNT / 2));
    kept.report(&0, &0, &0);

    assert_eq!(s.token.balance(&revoked.address), 0);
    assert_eq!(s.token.balance(&kept.address), AMOUNT / 2);
    assert_eq!(s.token.balance(&s.vault.address), AMOUNT / 2);
}

#[test]
fn test_update_debt_ratio_calls_back_excess() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);

    s.vault.update_strategy_debt_ratio(&strategy.address, &2_500);

    assert_eq!(s.vault.debt_ratio(), 2_500);
    assert_eq!(s.vault.debt_outstanding(&strategy.address), AMOUNT * 3 / 4);
}

#[test]
fn test_update_debt_ratio_rejects_exiting_strategy() {
    let s = setup();
    let strategy = add_strategy(&s, MAX_BPS);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);

    strategy.set_emergency_exit();
    strategy.revoke_self();

    assert_eq!(
        s.vault.try_update_strategy_debt_ratio(&strategy.address, &MAX_BPS),
        Err(Ok(VaultError::StrategyInEmergencyExit))
    );
    assert_eq!(s.vault.strategy(&strategy.address).debt_ratio, 0);
    assert_eq!(s.vault.debt_outstanding(&strategy.address), AMOUNT);
}

// ============================================================================
// EMERGENCY SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_blocks_deposits_and_recalls_debt() {
    let s = setup();
    let strategy = add_strategy(&s, 5_000);

    s.vault.deposit(&s.user, &AMOUNT);
    strategy.report(&0, &0, &0);

    s.vault.set_emergency_shutdown(&s.guardian, &true);
    let event: EmergencyShutdownEvent = find_event(&s.env, &s.vault.address, symbol_short!("shutdown")).unwrap();
    assert!(event.active);

    assert!(s.vault.is_shutdown());
    assert_eq!(s.vault.try_deposit(&s.user, &AMOUNT), Err(Ok(VaultError::VaultShutdown)));
    assert_eq!(s.vault.debt_outstanding(&strategy.address), AMOUNT / 2);
    assert_eq!(s.vault.credit_available(&strategy.address), 0);

    strategy.report(&0, &0, &(AMOUNT / 2));
    assert_eq!(s.token.balance(&s.vault.address), AMOUNT);
}

#[test]
fn test_only_governance_lifts_shutdown() {
    let s = setup();

    s.vault.set_emergency_shutdown(&s.guardian, &true);
    assert_eq!(
        s.vault.try_set_emergency_shutdown(&s.guardian, &false),
        Err(Ok(VaultError::NotAuthorized))
    );

    s.vault.set_emergency_shutdown(&s.governance, &false);
    assert!(!s.vault.is_shutdown());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_role_updates() {
    let s = setup();
    let guardian = Address::generate(&s.env);
    let governance = Address::generate(&s.env);

    s.vault.set_guardian(&guardian);
    let event: RoleUpdatedEvent = find_event(&s.env, &s.vault.address, symbol_short!("config")).unwrap();
    assert_eq!(event.role, symbol_short!("guardian"));
    assert_eq!(event.old, s.guardian);

    s.vault.set_governance(&governance);

    assert_eq!(s.vault.guardian(), guardian);
    assert_eq!(s.vault.governance(), governance);
}

#[test]
fn test_activation_uses_ledger_time() {
    let s = setup();
    s.env.ledger().with_mut(|li| {
        li.timestamp = 1_000;
    });

    let strategy = add_strategy(&s, 1_000);

    assert_eq!(s.vault.strategy(&strategy.address).activation, 1_000);
}
