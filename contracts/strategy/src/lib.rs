//! # Harvest Strategy Contract
//!
//! A strategy that borrows capital from a Harvest Vault and hands it back on
//! harvest. This implementation holds the vault's token ("want") directly, so
//! its position is simply its want balance. Gains arrive as tokens sent to the
//! contract.
//!
//! ## Harvest Cycle
//!
//! ```text
//! Keeper → [Strategy.harvest()]
//!             ↓ vault.debt_outstanding()
//!             ↓ prepare_return()  or  liquidate everything (emergency exit)
//!             ↓ approve vault for profit + debt_payment
//!             ↓ vault.report(profit, loss, debt_payment)
//!                    ⇄ vault pulls surplus / sends new credit
//! ```
//!
//! ## Revocation
//!
//! Once the vault revokes the strategy, its whole debt is outstanding and
//! `prepare_return` frees and repays all of it. Emergency exit reaches the same
//! end state from the strategy side: it revokes itself on the vault and the
//! next harvest liquidates the full position.
//!
//! ## Roles
//!
//! - `Keeper`: may harvest
//! - `Strategist`: may harvest, enter emergency exit, rotate roles
//! - Vault governance: everything the strategist can do

#![no_std]

mod vault;

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, Env,
    Symbol,
};

/// Ledgers the vault's allowance stays valid for after a harvest approves it.
pub const APPROVAL_LEDGERS: u32 = 100;

const VERSION: u32 = 1;

// ============================================================================
// ERRORS
// ============================================================================

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StrategyError {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    /// Caller is not keeper, strategist or vault governance as required.
    NotAuthorized = 3,
    AlreadyInEmergencyExit = 4,
    InvalidAmount = 5,
}

// ============================================================================
// STORAGE KEYS
// ============================================================================

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Vault,
    /// Token borrowed from the vault
    Want,
    Strategist,
    Keeper,
    EmergencyExit,
    Version,
}

// ============================================================================
// EVENTS
// ============================================================================

/// # Topics
/// - `SymbolShort("init")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InitializedEvent {
    pub vault: Address,
    pub want: Address,
    pub strategist: Address,
    pub keeper: Address,
}

/// Emitted after every harvest with the figures sent to the vault.
///
/// # Topics
/// - `SymbolShort("harvested")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HarvestedEvent {
    pub profit: i128,
    pub loss: i128,
    pub debt_payment: i128,
    /// Debt the vault still expects back after settlement
    pub debt_outstanding: i128,
}

/// # Topics
/// - `SymbolShort("em_exit")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmergencyExitEvent {
    pub caller: Address,
}

/// Emitted when the vault pulls funds during a user withdrawal.
///
/// # Topics
/// - `SymbolShort("withdrawn")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawnEvent {
    pub amount: i128,
    pub loss: i128,
}

/// # Topics
/// - `SymbolShort("config")`
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoleUpdatedEvent {
    /// `keeper` or `strategst`
    pub role: Symbol,
    pub old: Address,
    pub new: Address,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// Hold strategy: keeps borrowed want idle and reports against vault debt.
#[contract]
pub struct HoldStrategy;

#[contractimpl]
impl HoldStrategy {
    // ==========================================================================
    // INITIALIZATION
    // ==========================================================================

    /// Binds the strategy to a vault and reads the want token from it.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `vault` - The vault this strategy reports to
    /// * `strategist` - Operator allowed to harvest and trigger emergency exit
    /// * `keeper` - Bot allowed to harvest
    ///
    /// # Errors
    /// - [`StrategyError::AlreadyInitialized`] if called twice
    ///
    /// # Events
    /// Emits `InitializedEvent`
    pub fn initialize(
        env: Env,
        vault: Address,
        strategist: Address,
        keeper: Address,
    ) -> Result<(), StrategyError> {
        if env.storage().instance().has(&DataKey::Vault) {
            return Err(StrategyError::AlreadyInitialized);
        }

        let want = vault::Client::new(&env, &vault).token();

        let storage = env.storage().instance();
        storage.set(&DataKey::Vault, &vault);
        storage.set(&DataKey::Want, &want);
        storage.set(&DataKey::Strategist, &strategist);
        storage.set(&DataKey::Keeper, &keeper);
        storage.set(&DataKey::EmergencyExit, &false);
        storage.set(&DataKey::Version, &VERSION);

        env.events().publish(
            (symbol_short!("init"),),
            InitializedEvent { vault, want, strategist, keeper },
        );
        Ok(())
    }

    // ==========================================================================
    // CORE LIFECYCLE - HARVEST
    // ==========================================================================

    /// Reconciles the position with the vault.
    ///
    /// Normally runs [`prepare_return`](Self::prepare_return) against the
    /// vault's outstanding debt. In emergency exit the whole position is
    /// liquidated instead, and anything above the outstanding debt is
    /// reported as profit. Either way the vault is approved for
    /// `profit + debt_payment` before `report` settles, and the allowance is
    /// cleared once it returns.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `caller` - Keeper, strategist or vault governance (must authorize)
    ///
    /// # Errors
    /// - [`StrategyError::NotAuthorized`] if caller holds none of the roles
    ///
    /// # Events
    /// Emits `HarvestedEvent`
    pub fn harvest(env: Env, caller: Address) -> Result<(), StrategyError> {
        caller.require_auth();

        let vault = Self::read_vault(&env)?;
        let vault_client = vault::Client::new(&env, &vault);
        Self::require_role(&env, &vault_client, &caller, true)?;

        let this = env.current_contract_address();
        let debt_outstanding = vault_client.debt_outstanding(&this);

        let (profit, loss, debt_payment) = if Self::read_emergency_exit(&env) {
            let amount_freed = Self::liquidate_all_positions(&env)?;
            let loss = (debt_outstanding - amount_freed).max(0);
            let profit = (amount_freed - debt_outstanding).max(0);
            (profit, loss, debt_outstanding - loss)
        } else {
            Self::prepare_return(&env, &vault_client, debt_outstanding)?
        };

        let to_vault = profit + debt_payment;
        if to_vault > 0 {
            Self::want_client(&env)?.approve(
                &this,
                &vault,
                &to_vault,
                &(env.ledger().sequence() + APPROVAL_LEDGERS),
            );
        }

        let debt_outstanding = vault_client.report(&this, &profit, &loss, &debt_payment);
        if to_vault > 0 {
            // The vault pulls less than approved when it extends credit.
            Self::want_client(&env)?.approve(&this, &vault, &0, &env.ledger().sequence());
        }

        env.events().publish(
            (symbol_short!("harvested"),),
            HarvestedEvent { profit, loss, debt_payment, debt_outstanding },
        );
        Ok(())
    }

    // ==========================================================================
    // CORE LIFECYCLE - WITHDRAW
    // ==========================================================================

    /// Sends up to `amount_needed` want to the vault.
    ///
    /// Only the vault may call this, while serving a user withdrawal.
    ///
    /// # Returns
    /// The part of `amount_needed` that could not be freed, as a loss
    ///
    /// # Events
    /// Emits `WithdrawnEvent`
    pub fn withdraw(env: Env, amount_needed: i128) -> Result<i128, StrategyError> {
        let vault = Self::read_vault(&env)?;
        vault.require_auth();

        if amount_needed <= 0 {
            return Err(StrategyError::InvalidAmount);
        }

        let (amount_freed, loss) = Self::liquidate_position(&env, amount_needed)?;
        if amount_freed > 0 {
            Self::want_client(&env)?.transfer(&env.current_contract_address(), &vault, &amount_freed);
        }

        env.events().publish(
            (symbol_short!("withdrawn"),),
            WithdrawnEvent { amount: amount_freed, loss },
        );
        Ok(loss)
    }

    // ==========================================================================
    // EMERGENCY EXIT
    // ==========================================================================

    /// Puts the strategy into emergency exit and revokes it on the vault.
    ///
    /// The next harvest liquidates the entire position and returns it. There
    /// is no way back out of emergency exit.
    ///
    /// # Arguments
    /// * `env` - The Soroban environment
    /// * `caller` - Strategist or vault governance (must authorize)
    ///
    /// # Errors
    /// - [`StrategyError::NotAuthorized`] if caller is neither role
    /// - [`StrategyError::AlreadyInEmergencyExit`] on a second call
    ///
    /// # Events
    /// Emits `EmergencyExitEvent`
    pub fn set_emergency_exit(env: Env, caller: Address) -> Result<(), StrategyError> {
        caller.require_auth();

        let vault = Self::read_vault(&env)?;
        let vault_client = vault::Client::new(&env, &vault);
        Self::require_role(&env, &vault_client, &caller, false)?;

        if Self::read_emergency_exit(&env) {
            return Err(StrategyError::AlreadyInEmergencyExit);
        }
        env.storage().instance().set(&DataKey::EmergencyExit, &true);

        let this = env.current_contract_address();
        vault_client.revoke_strategy(&this, &this);

        env.events().publish(
            (symbol_short!("em_exit"),),
            EmergencyExitEvent { caller },
        );
        Ok(())
    }

    // ==========================================================================
    // ADMINISTRATIVE - ROLES
    // ==========================================================================

    pub fn set_keeper(env: Env, caller: Address, keeper: Address) -> Result<(), StrategyError> {
        Self::update_role(&env, caller, DataKey::Keeper, symbol_short!("keeper"), keeper)
    }

    pub fn set_strategist(env: Env, caller: Address, strategist: Address) -> Result<(), StrategyError> {
        Self::update_role(&env, caller, DataKey::Strategist, symbol_short!("strategst"), strategist)
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    /// Total want the strategy controls, denominated in want.
    pub fn estimated_total_assets(env: Env) -> Result<i128, StrategyError> {
        Self::want_balance(&env)
    }

    /// True while the vault still targets an allocation here or funds remain.
    pub fn is_active(env: Env) -> Result<bool, StrategyError> {
        let vault = Self::read_vault(&env)?;
        let this = env.current_contract_address();
        let has_ratio = matches!(
            vault::Client::new(&env, &vault).try_strategy(&this),
            Ok(Ok(params)) if params.debt_ratio > 0
        );
        Ok(has_ratio || Self::want_balance(&env)? > 0)
    }

    pub fn emergency_exit(env: Env) -> bool {
        Self::read_emergency_exit(&env)
    }

    pub fn vault(env: Env) -> Result<Address, StrategyError> {
        Self::read_vault(&env)
    }

    pub fn want(env: Env) -> Result<Address, StrategyError> {
        Self::read_address(&env, &DataKey::Want)
    }

    pub fn strategist(env: Env) -> Result<Address, StrategyError> {
        Self::read_address(&env, &DataKey::Strategist)
    }

    pub fn keeper(env: Env) -> Result<Address, StrategyError> {
        Self::read_address(&env, &DataKey::Keeper)
    }

    pub fn version(env: Env) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::Version)
            .unwrap_or(VERSION)
    }

    // ==========================================================================
    // INTERNAL POSITION MANAGEMENT
    // ==========================================================================

    /// Works out what to send the vault this harvest.
    ///
    /// Profit or loss is the difference between the position and the debt
    /// the vault has on record. The strategy then frees `profit +
    /// debt_outstanding`. If less comes free, profit is served first and
    /// the debt payment gets the rest.
    ///
    /// Returns `(profit, loss, debt_payment)`.
    fn prepare_return(
        env: &Env,
        vault_client: &vault::Client,
        debt_outstanding: i128,
    ) -> Result<(i128, i128, i128), StrategyError> {
        let total_assets = Self::want_balance(env)?;
        let total_debt = vault_client
            .strategy(&env.current_contract_address())
            .total_debt;

        let mut profit = (total_assets - total_debt).max(0);
        let loss = (total_debt - total_assets).max(0);

        let (amount_freed, _) = Self::liquidate_position(env, profit + debt_outstanding)?;

        let debt_payment = if amount_freed < profit {
            profit = amount_freed;
            0
        } else {
            (amount_freed - profit).min(debt_outstanding)
        };

        Ok((profit, loss, debt_payment))
    }

    /// Frees up to `amount_needed`. Returns `(amount_freed, shortfall)`.
    ///
    /// Want is held idle, so freeing is bounded only by the balance.
    fn liquidate_position(env: &Env, amount_needed: i128) -> Result<(i128, i128), StrategyError> {
        let balance = Self::want_balance(env)?;
        if amount_needed > balance {
            Ok((balance, amount_needed - balance))
        } else {
            Ok((amount_needed, 0))
        }
    }

    fn liquidate_all_positions(env: &Env) -> Result<i128, StrategyError> {
        Self::want_balance(env)
    }

    // ==========================================================================
    // INTERNAL HELPERS
    // ==========================================================================

    fn update_role(
        env: &Env,
        caller: Address,
        key: DataKey,
        role: Symbol,
        new: Address,
    ) -> Result<(), StrategyError> {
        caller.require_auth();

        let vault = Self::read_vault(env)?;
        Self::require_role(env, &vault::Client::new(env, &vault), &caller, false)?;

        let old = Self::read_address(env, &key)?;
        env.storage().instance().set(&key, &new);

        env.events().publish(
            (symbol_short!("config"),),
            RoleUpdatedEvent { role, old, new },
        );
        Ok(())
    }

    /// Accepts the strategist and vault governance, plus the keeper when
    /// `allow_keeper` is set.
    fn require_role(
        env: &Env,
        vault_client: &vault::Client,
        caller: &Address,
        allow_keeper: bool,
    ) -> Result<(), StrategyError> {
        if *caller == Self::read_address(env, &DataKey::Strategist)? {
            return Ok(());
        }
        if allow_keeper && *caller == Self::read_address(env, &DataKey::Keeper)? {
            return Ok(());
        }
        if *caller == vault_client.governance() {
            return Ok(());
        }
        Err(StrategyError::NotAuthorized)
    }

    fn want_client(env: &Env) -> Result<token::Client<'_>, StrategyError> {
        let want = Self::read_address(env, &DataKey::Want)?;
        Ok(token::Client::new(env, &want))
    }

    fn want_balance(env: &Env) -> Result<i128, StrategyError> {
        Ok(Self::want_client(env)?.balance(&env.current_contract_address()))
    }

    fn read_vault(env: &Env) -> Result<Address, StrategyError> {
        Self::read_address(env, &DataKey::Vault)
    }

    fn read_address(env: &Env, key: &DataKey) -> Result<Address, StrategyError> {
        env.storage()
            .instance()
            .get(key)
            .ok_or(StrategyError::NotInitialized)
    }

    fn read_emergency_exit(env: &Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::EmergencyExit)
            .unwrap_or(false)
    }
}
