//! # Harvest Vault Contract
//!
//! A share-issuing yield vault for Soroban that lends its idle assets to one or
//! more strategy contracts and settles with them on every harvest.
//!
//! ## Architecture Overview
//!
//! Users deposit the underlying token and receive vault shares. Governance
//! registers strategies, each with a debt ratio expressed in basis points of
//! the vault's total assets. When a strategy harvests, it calls [`Vault::report`]
//! with its realized gain, loss and the debt it is repaying. The vault settles
//! the difference between what the strategy owes and the new credit it is
//! allowed, then tells the strategy how much debt is still outstanding.
//!
//! ## Share Accounting Model
//!
//! - First deposit mints shares 1:1 with the deposited amount.
//! - Later deposits mint `amount * total_supply / total_assets`.
//! - `total_assets` = idle token balance of the vault + total strategy debt.
//!
//! ## Asset Flow
//!
//! ```text
//! Deposit Flow:
//! User → [Vault.deposit()] → [Token] → Vault (idle)
//!                      ↓
//!              Shares minted, DepositEvent emitted
//!
//! Harvest Flow (strategy):
//! Strategy → [Vault.report()] ⇄ [Token] ⇄ Vault
//!                      ↓
//!      credit sent / surplus pulled, StrategyReportedEvent emitted
//!
//! Withdraw Flow:
//! User → [Vault.withdraw()] → idle short? → [Strategy.withdraw()] (queue order)
//!                      ↓
//!              Shares burned, WithdrawEvent emitted
//! ```
//!
//! ## Revocation
//!
//! Revoking a strategy sets its debt ratio to zero. Its whole debt becomes
//! outstanding, so the strategy's next harvest returns every token it holds.
//! Governance, the guardian, or the strategy itself (emergency exit) may revoke.
//!
//! ## Storage Layout
//!
//! ### Instance Storage
//! - `Governance`, `Guardian`: role addresses
//! - `Token`: the underlying asset
//! - `TotalSupply`, `TotalDebt`, `DebtRatio`: vault-wide accounting
//! - `DepositLimit`, `EmergencyShutdown`: configuration
//! - `WithdrawalQueue`: strategies drawn on when idle funds are short
//! - `Version`
//!
//! ### Persistent Storage
//! - `Balance(user)`: vault shares per user
//! - `Strategy(address)`: [`StrategyParams`] per strategy

#![no_std]

mod strategy;

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, Env,
    Symbol, Vec,
};

/// Basis-point denominator for debt ratios and loss tolerances.
pub const MAX_BPS: u32 = 10_000;

const VERSION: u32 = 1;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors returned by [`Vault`] entry points.
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum VaultError {
    /// `initialize` was already called.
    AlreadyInitialized = 1,
    /// A required configuration key is missing.
    NotInitialized = 2,
    /// Caller does not hold the role required by this operation.
    NotAuthorized = 3,
    /// Amount or share count must be positive.
    InvalidAmount = 4,
    /// The vault is in emergency shutdown.
    VaultShutdown = 5,
    /// Deposit would push total assets above the deposit limit.
    DepositLimitExceeded = 6,
    /// User tried to burn more shares than they hold.
    InsufficientShares = 7,
    /// Strategy is already registered.
    StrategyExists = 8,
    /// Strategy was never added to this vault.
    StrategyNotActive = 9,
    /// Sum of debt ratios would exceed [`MAX_BPS`].
    DebtRatioExceeded = 10,
    /// `min_debt_per_harvest` is greater than `max_debt_per_harvest`.
    InvalidDebtBounds = 11,
    /// Reported loss is larger than the strategy's debt.
    LossExceedsDebt = 12,
    /// Strategy does not hold `gain + debt_payment`.
    InsufficientStrategyBalance = 13,
    /// Withdrawal loss is above the caller's tolerance.
    MaxLossExceeded = 14,
    /// `max_loss_bps` is above [`MAX_BPS`].
    InvalidMaxLoss = 15,
    /// Strategy is in emergency exit and cannot take a new debt ratio.
    StrategyInEmergencyExit = 16,
}

// ============================================================================
// STORAGE KEYS
// ============================================================================

/// Storage keys for vault state.
#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    /// Vault shares held by a user (persistent)
    Balance(Address),
    /// Per-strategy accounting record (persistent)
    Strategy(Address),
    Governance,
    Guardian,
    Token,
    TotalSupply,
    /// Sum of `total_debt` across strategies
    TotalDebt,
    /// Sum of `debt_ratio` across strategies, in bps
    DebtRatio,
    DepositLimit,
    EmergencyShutdown,
    WithdrawalQueue,
    Version,
}

/// Accounting record for a strategy attached to the vault.
///
/// A strategy whose `debt_ratio` is zero has been revoked: all of its
/// `total_debt` is outstanding and is expected back on its next report.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyParams {
    /// Ledger timestamp at which the strategy was added
    pub activation: u64,
    /// Target share of total assets, in bps
    pub debt_ratio: u32,
    /// Credit below this amount is not sent on harvest
    pub min_debt_per_harvest: i128,
    /// Upper bound on credit sent in a single harvest
    pub max_debt_per_harvest: i128,
    /// Ledger timestamp of the last report
    pub last_report: u64,
    /// Tokens currently lent to the strategy
    pub total_debt: i128,
    pub total_gain: i128,
    pub total_loss: i128,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Emitted once when the vault is initialized.
///
/// # Topics
/// - `SymbolShort("init")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InitializedEvent {
    pub governance: Address,
    pub guardian: Address,
    pub token: Address,
}

/// Emitted when a user deposits into the vault.
///
/// # Topics
/// - `SymbolShort("deposit")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositEvent {
    pub user: Address,
    /// Tokens transferred in
    pub amount: i128,
    /// Shares minted
    pub shares: i128,
}

/// Emitted when a user withdraws from the vault.
///
/// # Topics
/// - `SymbolShort("withdraw")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawEvent {
    pub user: Address,
    /// Tokens transferred out
    pub amount: i128,
    /// Shares burned
    pub shares: i128,
    /// Loss realized while pulling funds from strategies
    pub loss: i128,
}

/// Emitted when governance adds a strategy.
///
/// # Topics
/// - `SymbolShort("strat_add")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyAddedEvent {
    pub strategy: Address,
    pub debt_ratio: u32,
    pub min_debt_per_harvest: i128,
    pub max_debt_per_harvest: i128,
}

/// Emitted when governance changes a strategy's debt ratio.
///
/// # Topics
/// - `SymbolShort("ratio")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebtRatioUpdatedEvent {
    pub strategy: Address,
    pub old_ratio: u32,
    pub new_ratio: u32,
}

/// Emitted when a strategy is revoked.
///
/// # Topics
/// - `SymbolShort("revoked")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyRevokedEvent {
    pub strategy: Address,
    /// Governance, guardian, or the strategy itself
    pub caller: Address,
}

/// Emitted on every strategy report.
///
/// # Topics
/// - `SymbolShort("harvested")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyReportedEvent {
    pub strategy: Address,
    pub gain: i128,
    pub loss: i128,
    /// Portion of the offered debt payment the vault accepted
    pub debt_paid: i128,
    /// New funds sent to the strategy
    pub credit: i128,
    pub total_gain: i128,
    pub total_loss: i128,
    pub total_debt: i128,
    pub debt_ratio: u32,
}

/// Emitted when emergency shutdown is toggled.
///
/// # Topics
/// - `SymbolShort("shutdown")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmergencyShutdownEvent {
    pub active: bool,
    pub caller: Address,
}

/// Emitted when the deposit limit changes.
///
/// # Topics
/// - `SymbolShort("limit")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositLimitEvent {
    pub old_limit: i128,
    pub new_limit: i128,
}

/// Emitted when governance or guardian is replaced.
///
/// # Topics
/// - `SymbolShort("config")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoleUpdatedEvent {
    /// `gov` or `guardian`
    pub role: Symbol,
    pub old: Address,
    pub new: Address,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// Harvest Vault - share-issuing vault lending to harvestable strategies.
///
/// # Security Model
///
/// - Users can only deposit and withdraw for themselves (`require_auth()`)
/// - Only governance can add strategies, change ratios and configuration
/// - Governance, guardian or the strategy itself can revoke a strategy
/// - Only a registered strategy can report, and only for itself
/// - Emergency shutdown blocks deposits and recalls all strategy debt
#[contract]
pub struct Vault;

#[contractimpl]
impl Vault {
    // ==========================================================================
    // INITIALIZATION
    // ==========================================================================

    /// Initializes the vault with its roles and underlying token.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `governance` - Address allowed to manage strategies and configuration
    /// * `guardian` - Address allowed to revoke strategies and trigger shutdown
    /// * `token` - The underlying token contract address
    ///
    /// # Errors
    /// - [`VaultError::AlreadyInitialized`] if called twice
    ///
    /// # Events
    /// Emits `InitializedEvent`
    pub fn initialize(
        env: Env,
        governance: Address,
        guardian: Address,
        token: Address,
    ) -> Result<(), VaultError> {
        if env.storage().instance().has(&DataKey::Governance) {
            return Err(VaultError::AlreadyInitialized);
        }

        let storage = env.storage().instance();
        storage.set(&DataKey::Governance, &governance);
        storage.set(&DataKey::Guardian, &guardian);
        storage.set(&DataKey::Token, &token);
        storage.set(&DataKey::TotalSupply, &0_i128);
        storage.set(&DataKey::TotalDebt, &0_i128);
        storage.set(&DataKey::DebtRatio, &0_u32);
        storage.set(&DataKey::DepositLimit, &i128::MAX);
        storage.set(&DataKey::EmergencyShutdown, &false);
        storage.set(&DataKey::WithdrawalQueue, &Vec::<Address>::new(&env));
        storage.set(&DataKey::Version, &VERSION);

        env.events().publish(
            (symbol_short!("init"),),
            InitializedEvent { governance, guardian, token },
        );
        Ok(())
    }

    // ==========================================================================
    // CORE LIFECYCLE - DEPOSIT
    // ==========================================================================

    /// Deposits tokens and mints vault shares to `user`.
    ///
    /// Shares are priced before the transfer lands, so the depositor does not
    /// dilute themselves.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `user` - The depositor (must authorize)
    /// * `amount` - Tokens to deposit
    ///
    /// # Returns
    /// Shares minted
    ///
    /// # Errors
    /// - [`VaultError::VaultShutdown`] during emergency shutdown
    /// - [`VaultError::InvalidAmount`] if amount or resulting shares are not positive
    /// - [`VaultError::DepositLimitExceeded`] if total assets would exceed the limit
    ///
    /// # Events
    /// Emits `DepositEvent`
    pub fn deposit(env: Env, user: Address, amount: i128) -> Result<i128, VaultError> {
        user.require_auth();

        Self::require_not_shutdown(&env)?;
        Self::require_positive_amount(amount)?;

        let token_client = Self::token_client(&env)?;
        let total_assets = Self::total_assets_with(&env, &token_client);
        let limit = Self::read_deposit_limit(&env);
        match total_assets.checked_add(amount) {
            Some(after) if after <= limit => {}
            _ => return Err(VaultError::DepositLimitExceeded),
        }

        let shares = Self::shares_for_amount(&env, total_assets, amount)?;
        if shares <= 0 {
            return Err(VaultError::InvalidAmount);
        }

        token_client.transfer(&user, &env.current_contract_address(), &amount);

        Self::write_balance(&env, &user, Self::read_balance(&env, &user) + shares);
        Self::write_total_supply(&env, Self::read_total_supply(&env) + shares);

        env.events().publish(
            (symbol_short!("deposit"),),
            DepositEvent { user, amount, shares },
        );
        Ok(shares)
    }

    // ==========================================================================
    // CORE LIFECYCLE - WITHDRAW
    // ==========================================================================

    /// Burns `shares` and returns their value in tokens to `user`.
    ///
    /// When idle funds cannot cover the withdrawal the vault pulls from its
    /// strategies in withdrawal-queue order. Losses realized by a strategy
    /// are booked against it and reduce what the user receives. If the queue
    /// is exhausted and idle funds are still short, the user receives what is
    /// available and burns proportionally fewer shares.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `user` - The withdrawer (must authorize)
    /// * `shares` - Shares to redeem
    /// * `max_loss_bps` - Accepted loss as a fraction of the gross value, in bps
    ///
    /// # Returns
    /// Tokens transferred to `user`
    ///
    /// # Errors
    /// - [`VaultError::InvalidAmount`] if shares is not positive
    /// - [`VaultError::InvalidMaxLoss`] if `max_loss_bps > MAX_BPS`
    /// - [`VaultError::InsufficientShares`] if user holds fewer shares
    /// - [`VaultError::MaxLossExceeded`] if the realized loss is above tolerance
    ///
    /// # Events
    /// Emits `WithdrawEvent`
    pub fn withdraw(
        env: Env,
        user: Address,
        shares: i128,
        max_loss_bps: u32,
    ) -> Result<i128, VaultError> {
        user.require_auth();

        Self::require_positive_amount(shares)?;
        if max_loss_bps > MAX_BPS {
            return Err(VaultError::InvalidMaxLoss);
        }

        let balance = Self::read_balance(&env, &user);
        if shares > balance {
            return Err(VaultError::InsufficientShares);
        }

        let token_client = Self::token_client(&env)?;
        let vault = env.current_contract_address();

        let mut shares = shares;
        let mut value = Self::share_value(
            &env,
            Self::total_assets_with(&env, &token_client),
            shares,
        )?;
        let mut total_loss = 0_i128;
        let mut idle = token_client.balance(&vault);

        if value > idle {
            for strategy in Self::read_withdrawal_queue(&env).iter() {
                if value <= idle {
                    break;
                }
                let Some(mut params) = Self::read_strategy(&env, &strategy) else {
                    continue;
                };

                let amount_needed = (value - idle).min(params.total_debt);
                if amount_needed <= 0 {
                    continue;
                }

                let loss = strategy::Client::new(&env, &strategy).withdraw(&amount_needed);
                let after = token_client.balance(&vault);
                let withdrawn = after - idle;
                idle = after;

                if loss > 0 {
                    value -= loss;
                    total_loss += loss;
                    Self::report_loss(&env, &mut params, loss)?;
                }

                params.total_debt -= withdrawn;
                Self::write_total_debt(&env, Self::read_total_debt(&env) - withdrawn);
                Self::write_strategy(&env, &strategy, &params);
            }

            if value > idle {
                value = idle;
                let total_assets = Self::total_assets_with(&env, &token_client);
                shares = Self::shares_for_amount(&env, total_assets, value + total_loss)?
                    .min(shares);
            }

            if total_loss * MAX_BPS as i128 > max_loss_bps as i128 * (value + total_loss) {
                return Err(VaultError::MaxLossExceeded);
            }
        }

        Self::write_balance(&env, &user, balance - shares);
        Self::write_total_supply(&env, Self::read_total_supply(&env) - shares);

        if value > 0 {
            token_client.transfer(&vault, &user, &value);
        }

        env.events().publish(
            (symbol_short!("withdraw"),),
            WithdrawEvent { user, amount: value, shares, loss: total_loss },
        );
        Ok(value)
    }

    // ==========================================================================
    // STRATEGY MANAGEMENT
    // ==========================================================================

    /// Registers a strategy and appends it to the withdrawal queue.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `strategy` - The strategy contract address
    /// * `debt_ratio` - Target share of total assets, in bps
    /// * `min_debt_per_harvest` - Smallest credit worth sending
    /// * `max_debt_per_harvest` - Largest credit sent per harvest
    ///
    /// # Errors
    /// - [`VaultError::NotAuthorized`] via governance auth
    /// - [`VaultError::VaultShutdown`] during emergency shutdown
    /// - [`VaultError::StrategyExists`] if already registered
    /// - [`VaultError::InvalidDebtBounds`] if min > max or min is negative
    /// - [`VaultError::DebtRatioExceeded`] if the vault ratio would exceed [`MAX_BPS`]
    ///
    /// # Events
    /// Emits `StrategyAddedEvent`
    pub fn add_strategy(
        env: Env,
        strategy: Address,
        debt_ratio: u32,
        min_debt_per_harvest: i128,
        max_debt_per_harvest: i128,
    ) -> Result<(), VaultError> {
        Self::require_governance(&env)?;
        Self::require_not_shutdown(&env)?;

        if Self::read_strategy(&env, &strategy).is_some() {
            return Err(VaultError::StrategyExists);
        }
        if min_debt_per_harvest < 0 || min_debt_per_harvest > max_debt_per_harvest {
            return Err(VaultError::InvalidDebtBounds);
        }

        let vault_ratio = Self::read_debt_ratio(&env);
        if vault_ratio + debt_ratio > MAX_BPS {
            return Err(VaultError::DebtRatioExceeded);
        }

        let params = StrategyParams {
            activation: env.ledger().timestamp(),
            debt_ratio,
            min_debt_per_harvest,
            max_debt_per_harvest,
            last_report: env.ledger().timestamp(),
            total_debt: 0,
            total_gain: 0,
            total_loss: 0,
        };
        Self::write_strategy(&env, &strategy, &params);
        Self::write_debt_ratio(&env, vault_ratio + debt_ratio);

        let mut queue = Self::read_withdrawal_queue(&env);
        queue.push_back(strategy.clone());
        env.storage().instance().set(&DataKey::WithdrawalQueue, &queue);

        env.events().publish(
            (symbol_short!("strat_add"),),
            StrategyAddedEvent {
                strategy,
                debt_ratio,
                min_debt_per_harvest,
                max_debt_per_harvest,
            },
        );
        Ok(())
    }

    /// Changes a registered strategy's debt ratio.
    ///
    /// Lowering the ratio makes part of the strategy's debt outstanding;
    /// it is returned on the next harvest.
    ///
    /// # Errors
    /// - [`VaultError::StrategyNotActive`] if the strategy was never added
    /// - [`VaultError::StrategyInEmergencyExit`] if the strategy is unwinding
    /// - [`VaultError::DebtRatioExceeded`] if the vault total would pass [`MAX_BPS`]
    pub fn update_strategy_debt_ratio(
        env: Env,
        strategy: Address,
        debt_ratio: u32,
    ) -> Result<(), VaultError> {
        Self::require_governance(&env)?;

        let mut params = Self::active_strategy(&env, &strategy)?;
        if strategy::Client::new(&env, &strategy).emergency_exit() {
            return Err(VaultError::StrategyInEmergencyExit);
        }
        let vault_ratio = Self::read_debt_ratio(&env) - params.debt_ratio;
        if vault_ratio + debt_ratio > MAX_BPS {
            return Err(VaultError::DebtRatioExceeded);
        }

        let old_ratio = params.debt_ratio;
        params.debt_ratio = debt_ratio;
        Self::write_strategy(&env, &strategy, &params);
        Self::write_debt_ratio(&env, vault_ratio + debt_ratio);

        env.events().publish(
            (symbol_short!("ratio"),),
            DebtRatioUpdatedEvent { strategy, old_ratio, new_ratio: debt_ratio },
        );
        Ok(())
    }

    /// Revokes a strategy by setting its debt ratio to zero.
    ///
    /// After revocation every token lent to the strategy is outstanding debt,
    /// and the strategy's next harvest returns its full position to the vault.
    /// Revoking an already-revoked strategy does nothing.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `caller` - Governance, guardian, or the strategy itself (must authorize)
    /// * `strategy` - The strategy to revoke
    ///
    /// # Errors
    /// - [`VaultError::NotAuthorized`] if caller holds none of the allowed roles
    /// - [`VaultError::StrategyNotActive`] if the strategy was never added
    ///
    /// # Events
    /// Emits `StrategyRevokedEvent`
    ///
    /// # Security
    /// - A strategy calling this on itself during emergency exit is the
    ///   direct invoker, so its `require_auth()` is satisfied by the host
    pub fn revoke_strategy(env: Env, caller: Address, strategy: Address) -> Result<(), VaultError> {
        caller.require_auth();

        if caller != strategy
            && caller != Self::read_governance(&env)?
            && caller != Self::read_guardian(&env)?
        {
            return Err(VaultError::NotAuthorized);
        }

        let mut params = Self::active_strategy(&env, &strategy)?;
        if params.debt_ratio == 0 {
            return Ok(());
        }

        Self::write_debt_ratio(&env, Self::read_debt_ratio(&env) - params.debt_ratio);
        params.debt_ratio = 0;
        Self::write_strategy(&env, &strategy, &params);

        env.events().publish(
            (symbol_short!("revoked"),),
            StrategyRevokedEvent { strategy, caller },
        );
        Ok(())
    }

    // ==========================================================================
    // CORE LIFECYCLE - REPORT
    // ==========================================================================

    /// Settles a strategy's harvest.
    ///
    /// Called by the strategy at the end of its harvest. The vault books the
    /// loss, accepts the debt payment up to what is outstanding, then computes
    /// new credit. Only the net amount moves: credit beyond `gain + debt_paid`
    /// is sent to the strategy, and any surplus is pulled with
    /// `transfer_from`. The strategy must approve the vault beforehand.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `strategy` - The reporting strategy (must authorize)
    /// * `gain` - Profit realized since the last report
    /// * `loss` - Loss realized since the last report
    /// * `debt_payment` - Tokens offered to repay outstanding debt
    ///
    /// # Returns
    /// Debt still outstanding after settlement. For a revoked strategy or a
    /// vault in shutdown this is the strategy's entire remaining debt.
    ///
    /// # Errors
    /// - [`VaultError::InvalidAmount`] on negative inputs
    /// - [`VaultError::StrategyNotActive`] if the strategy was never added
    /// - [`VaultError::InsufficientStrategyBalance`] if the strategy cannot cover `gain + debt_payment`
    /// - [`VaultError::LossExceedsDebt`] if loss is above the strategy's debt
    ///
    /// # Events
    /// Emits `StrategyReportedEvent`
    ///
    /// # Security
    /// - Never calls back into the strategy; Soroban rejects re-entry
    pub fn report(
        env: Env,
        strategy: Address,
        gain: i128,
        loss: i128,
        debt_payment: i128,
    ) -> Result<i128, VaultError> {
        strategy.require_auth();

        if gain < 0 || loss < 0 || debt_payment < 0 {
            return Err(VaultError::InvalidAmount);
        }

        let mut params = Self::active_strategy(&env, &strategy)?;
        let token_client = Self::token_client(&env)?;
        if token_client.balance(&strategy) < gain + debt_payment {
            return Err(VaultError::InsufficientStrategyBalance);
        }

        if loss > 0 {
            Self::report_loss(&env, &mut params, loss)?;
        }
        params.total_gain += gain;

        let credit = Self::credit_for(&env, &token_client, &params);
        let mut debt = Self::debt_outstanding_for(&env, &token_client, &params);
        let debt_paid = debt_payment.min(debt);

        let mut total_debt = Self::read_total_debt(&env);
        if debt_paid > 0 {
            params.total_debt -= debt_paid;
            total_debt -= debt_paid;
            debt -= debt_paid;
        }
        if credit > 0 {
            params.total_debt += credit;
            total_debt += credit;
        }
        Self::write_total_debt(&env, total_debt);

        let vault = env.current_contract_address();
        let total_avail = gain + debt_paid;
        if total_avail < credit {
            token_client.transfer(&vault, &strategy, &(credit - total_avail));
        } else if total_avail > credit {
            token_client.transfer_from(&vault, &strategy, &vault, &(total_avail - credit));
        }

        params.last_report = env.ledger().timestamp();
        Self::write_strategy(&env, &strategy, &params);

        env.events().publish(
            (symbol_short!("harvested"),),
            StrategyReportedEvent {
                strategy,
                gain,
                loss,
                debt_paid,
                credit,
                total_gain: params.total_gain,
                total_loss: params.total_loss,
                total_debt: params.total_debt,
                debt_ratio: params.debt_ratio,
            },
        );
        Ok(debt)
    }

    // ==========================================================================
    // ADMINISTRATIVE - EMERGENCY SHUTDOWN
    // ==========================================================================

    /// Enables or disables emergency shutdown.
    ///
    /// While active, deposits are rejected, no credit is extended, and every
    /// strategy's full debt is outstanding. Withdrawals keep working.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `caller` - Governance or guardian (must authorize)
    /// * `active` - New shutdown state
    ///
    /// # Errors
    /// - [`VaultError::NotAuthorized`] if the guardian tries to lift shutdown,
    ///   or caller is neither role
    ///
    /// # Events
    /// Emits `EmergencyShutdownEvent`
    pub fn set_emergency_shutdown(env: Env, caller: Address, active: bool) -> Result<(), VaultError> {
        caller.require_auth();

        let is_governance = caller == Self::read_governance(&env)?;
        let is_guardian = caller == Self::read_guardian(&env)?;
        if !(is_governance || (active && is_guardian)) {
            return Err(VaultError::NotAuthorized);
        }

        env.storage().instance().set(&DataKey::EmergencyShutdown, &active);

        env.events().publish(
            (symbol_short!("shutdown"),),
            EmergencyShutdownEvent { active, caller },
        );
        Ok(())
    }

    // ==========================================================================
    // ADMINISTRATIVE - CONFIGURATION
    // ==========================================================================

    /// Sets the cap on total assets accepted through deposits.
    ///
    /// Lowering it below current assets does not affect existing deposits.
    pub fn set_deposit_limit(env: Env, limit: i128) -> Result<(), VaultError> {
        Self::require_governance(&env)?;

        let old_limit = Self::read_deposit_limit(&env);
        env.storage().instance().set(&DataKey::DepositLimit, &limit);

        env.events().publish(
            (symbol_short!("limit"),),
            DepositLimitEvent { old_limit, new_limit: limit },
        );
        Ok(())
    }

    pub fn set_guardian(env: Env, guardian: Address) -> Result<(), VaultError> {
        Self::require_governance(&env)?;

        let old = Self::read_guardian(&env)?;
        env.storage().instance().set(&DataKey::Guardian, &guardian);

        env.events().publish(
            (symbol_short!("config"),),
            RoleUpdatedEvent { role: symbol_short!("guardian"), old, new: guardian },
        );
        Ok(())
    }

    /// Hands governance to a new address. Both must authorize.
    pub fn set_governance(env: Env, governance: Address) -> Result<(), VaultError> {
        let old = Self::require_governance(&env)?;
        governance.require_auth();

        env.storage().instance().set(&DataKey::Governance, &governance);

        env.events().publish(
            (symbol_short!("config"),),
            RoleUpdatedEvent { role: symbol_short!("gov"), old, new: governance },
        );
        Ok(())
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    /// Tokens the vault would send `strategy` if it reported now.
    pub fn credit_available(env: Env, strategy: Address) -> Result<i128, VaultError> {
        let params = Self::active_strategy(&env, &strategy)?;
        let token_client = Self::token_client(&env)?;
        Ok(Self::credit_for(&env, &token_client, &params))
    }

    /// Tokens the vault wants back from `strategy`.
    ///
    /// Equal to the strategy's whole debt once it is revoked or the vault is
    /// in shutdown.
    pub fn debt_outstanding(env: Env, strategy: Address) -> Result<i128, VaultError> {
        let params = Self::active_strategy(&env, &strategy)?;
        let token_client = Self::token_client(&env)?;
        Ok(Self::debt_outstanding_for(&env, &token_client, &params))
    }

    pub fn strategy(env: Env, strategy: Address) -> Result<StrategyParams, VaultError> {
        Self::active_strategy(&env, &strategy)
    }

    /// Idle balance plus everything lent to strategies.
    pub fn total_assets(env: Env) -> Result<i128, VaultError> {
        let token_client = Self::token_client(&env)?;
        Ok(Self::total_assets_with(&env, &token_client))
    }

    pub fn total_debt(env: Env) -> i128 {
        Self::read_total_debt(&env)
    }

    pub fn debt_ratio(env: Env) -> u32 {
        Self::read_debt_ratio(&env)
    }

    pub fn total_supply(env: Env) -> i128 {
        Self::read_total_supply(&env)
    }

    /// Vault shares held by `user`.
    pub fn balance(env: Env, user: Address) -> i128 {
        Self::read_balance(&env, &user)
    }

    /// Value of one whole share (10^decimals) in tokens.
    pub fn price_per_share(env: Env) -> Result<i128, VaultError> {
        let token_client = Self::token_client(&env)?;
        let unit = 10_i128.pow(token_client.decimals());
        let total_assets = Self::total_assets_with(&env, &token_client);
        Self::share_value(&env, total_assets, unit)
    }

    pub fn token(env: Env) -> Result<Address, VaultError> {
        env.storage()
            .instance()
            .get(&DataKey::Token)
            .ok_or(VaultError::NotInitialized)
    }

    pub fn governance(env: Env) -> Result<Address, VaultError> {
        Self::read_governance(&env)
    }

    pub fn guardian(env: Env) -> Result<Address, VaultError> {
        Self::read_guardian(&env)
    }

    pub fn deposit_limit(env: Env) -> i128 {
        Self::read_deposit_limit(&env)
    }

    pub fn is_shutdown(env: Env) -> bool {
        Self::read_shutdown(&env)
    }

    pub fn withdrawal_queue(env: Env) -> Vec<Address> {
        Self::read_withdrawal_queue(&env)
    }

    pub fn version(env: Env) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::Version)
            .unwrap_or(VERSION)
    }

    // ==========================================================================
    // INTERNAL ACCOUNTING
    // ==========================================================================

    /// Books `loss` against a strategy and shrinks its debt ratio in
    /// proportion to the vault's total debt.
    fn report_loss(env: &Env, params: &mut StrategyParams, loss: i128) -> Result<(), VaultError> {
        if loss > params.total_debt {
            return Err(VaultError::LossExceedsDebt);
        }

        let total_debt = Self::read_total_debt(env);
        let vault_ratio = Self::read_debt_ratio(env);
        if vault_ratio != 0 && total_debt > 0 {
            let change = (loss * vault_ratio as i128 / total_debt).min(params.debt_ratio as i128) as u32;
            params.debt_ratio -= change;
            Self::write_debt_ratio(env, vault_ratio - change);
        }

        params.total_loss += loss;
        params.total_debt -= loss;
        Self::write_total_debt(env, total_debt - loss);
        Ok(())
    }

    fn credit_for(env: &Env, token_client: &token::Client, params: &StrategyParams) -> i128 {
        if Self::read_shutdown(env) {
            return 0;
        }

        let total_assets = Self::total_assets_with(env, token_client);
        let vault_debt_limit = Self::read_debt_ratio(env) as i128 * total_assets / MAX_BPS as i128;
        let vault_total_debt = Self::read_total_debt(env);
        let strategy_debt_limit = params.debt_ratio as i128 * total_assets / MAX_BPS as i128;

        if strategy_debt_limit <= params.total_debt || vault_debt_limit <= vault_total_debt {
            return 0;
        }

        let idle = token_client.balance(&env.current_contract_address());
        let available = (strategy_debt_limit - params.total_debt)
            .min(vault_debt_limit - vault_total_debt)
            .min(idle);

        if available < params.min_debt_per_harvest {
            return 0;
        }
        available.min(params.max_debt_per_harvest)
    }

    fn debt_outstanding_for(env: &Env, token_client: &token::Client, params: &StrategyParams) -> i128 {
        if Self::read_debt_ratio(env) == 0 || Self::read_shutdown(env) {
            return params.total_debt;
        }

        let total_assets = Self::total_assets_with(env, token_client);
        let strategy_debt_limit = params.debt_ratio as i128 * total_assets / MAX_BPS as i128;
        (params.total_debt - strategy_debt_limit).max(0)
    }

    fn total_assets_with(env: &Env, token_client: &token::Client) -> i128 {
        token_client.balance(&env.current_contract_address()) + Self::read_total_debt(env)
    }

    fn shares_for_amount(env: &Env, total_assets: i128, amount: i128) -> Result<i128, VaultError> {
        let total_supply = Self::read_total_supply(env);
        if total_supply == 0 {
            return Ok(amount);
        }
        if total_assets == 0 {
            return Ok(0);
        }
        amount
            .checked_mul(total_supply)
            .map(|n| n / total_assets)
            .ok_or(VaultError::InvalidAmount)
    }

    fn share_value(env: &Env, total_assets: i128, shares: i128) -> Result<i128, VaultError> {
        let total_supply = Self::read_total_supply(env);
        if total_supply == 0 {
            return Ok(shares);
        }
        shares
            .checked_mul(total_assets)
            .map(|n| n / total_supply)
            .ok_or(VaultError::InvalidAmount)
    }

    // ==========================================================================
    // INTERNAL STORAGE HELPERS
    // ==========================================================================

    fn token_client(env: &Env) -> Result<token::Client<'_>, VaultError> {
        let token: Address = env
            .storage()
            .instance()
            .get(&DataKey::Token)
            .ok_or(VaultError::NotInitialized)?;
        Ok(token::Client::new(env, &token))
    }

    fn read_governance(env: &Env) -> Result<Address, VaultError> {
        env.storage()
            .instance()
            .get(&DataKey::Governance)
            .ok_or(VaultError::NotInitialized)
    }

    fn read_guardian(env: &Env) -> Result<Address, VaultError> {
        env.storage()
            .instance()
            .get(&DataKey::Guardian)
            .ok_or(VaultError::NotInitialized)
    }

    fn read_strategy(env: &Env, strategy: &Address) -> Option<StrategyParams> {
        env.storage()
            .persistent()
            .get(&DataKey::Strategy(strategy.clone()))
    }

    fn active_strategy(env: &Env, strategy: &Address) -> Result<StrategyParams, VaultError> {
        Self::read_strategy(env, strategy).ok_or(VaultError::StrategyNotActive)
    }

    fn write_strategy(env: &Env, strategy: &Address, params: &StrategyParams) {
        env.storage()
            .persistent()
            .set(&DataKey::Strategy(strategy.clone()), params);
    }

    fn read_balance(env: &Env, user: &Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::Balance(user.clone()))
            .unwrap_or(0)
    }

    fn write_balance(env: &Env, user: &Address, shares: i128) {
        env.storage()
            .persistent()
            .set(&DataKey::Balance(user.clone()), &shares);
    }

    fn read_total_supply(env: &Env) -> i128 {
        env.storage().instance().get(&DataKey::TotalSupply).unwrap_or(0)
    }

    fn write_total_supply(env: &Env, supply: i128) {
        env.storage().instance().set(&DataKey::TotalSupply, &supply);
    }

    fn read_total_debt(env: &Env) -> i128 {
        env.storage().instance().get(&DataKey::TotalDebt).unwrap_or(0)
    }

    fn write_total_debt(env: &Env, debt: i128) {
        env.storage().instance().set(&DataKey::TotalDebt, &debt);
    }

    fn read_debt_ratio(env: &Env) -> u32 {
        env.storage().instance().get(&DataKey::DebtRatio).unwrap_or(0)
    }

    fn write_debt_ratio(env: &Env, ratio: u32) {
        env.storage().instance().set(&DataKey::DebtRatio, &ratio);
    }

    fn read_deposit_limit(env: &Env) -> i128 {
        env.storage().instance().get(&DataKey::DepositLimit).unwrap_or(0)
    }

    fn read_shutdown(env: &Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::EmergencyShutdown)
            .unwrap_or(false)
    }

    fn read_withdrawal_queue(env: &Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::WithdrawalQueue)
            .unwrap_or_else(|| Vec::new(env))
    }

    // ==========================================================================
    // INTERNAL VALIDATION HELPERS
    // ==========================================================================

    /// Requires governance authorization and returns the governance address.
    #[inline]
    fn require_governance(env: &Env) -> Result<Address, VaultError> {
        let governance = Self::read_governance(env)?;
        governance.require_auth();
        Ok(governance)
    }

    #[inline]
    fn require_not_shutdown(env: &Env) -> Result<(), VaultError> {
        if Self::read_shutdown(env) {
            return Err(VaultError::VaultShutdown);
        }
        Ok(())
    }

    #[inline]
    fn require_positive_amount(amount: i128) -> Result<(), VaultError> {
        if amount <= 0 {
            return Err(VaultError::InvalidAmount);
        }
        Ok(())
    }
}

mod test;
