//! Account book: per-entity balances plus the platform pool
//!
//! Every amount is an integer, so conservation can be checked exactly.
//! `credit` moves value out of the pool and `debit` moves it back, so neither
//! changes total supply. Only `mint` and `burn` do, and both are journaled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use thiserror::Error;

use crate::config::ResourceAmounts;
use crate::types::{EntityId, ResourceKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient {kind} for {holder}: available {available}, requested {requested}")]
    InsufficientFunds {
        holder: String,
        kind: ResourceKind,
        available: u64,
        requested: u64,
    },

    #[error("Unknown account: {0}")]
    UnknownAccount(EntityId),

    #[error("Account already open: {0}")]
    AccountExists(EntityId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Balance overflow for {kind}")]
    Overflow { kind: ResourceKind },

    #[error("Supply of {kind} not conserved: expected {expected}, found {actual}")]
    ConservationViolated {
        kind: ResourceKind,
        expected: u64,
        actual: u64,
    },
}

/// One balance per resource kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances([u64; 8]);

impl Balances {
    pub fn from_amounts(amounts: &ResourceAmounts) -> Self {
        let mut balances = Self::default();
        for kind in ResourceKind::ALL {
            balances[kind] = amounts.get(kind);
        }
        balances
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, u64)> + '_ {
        ResourceKind::ALL.into_iter().map(move |k| (k, self[k]))
    }

    fn add(&mut self, kind: ResourceKind, amount: u64) -> Result<(), LedgerError> {
        self[kind] = self[kind]
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { kind })?;
        Ok(())
    }
}

impl Index<ResourceKind> for Balances {
    type Output = u64;

    fn index(&self, kind: ResourceKind) -> &u64 {
        &self.0[kind.index()]
    }
}

impl IndexMut<ResourceKind> for Balances {
    fn index_mut(&mut self, kind: ResourceKind) -> &mut u64 {
        &mut self.0[kind.index()]
    }
}

/// Cumulative issuance and burn, per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyJournal {
    pub issued: Balances,
    pub burned: Balances,
}

/// Point-in-time supply plus journal, used to audit a span of operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplySnapshot {
    pub supply: Balances,
    pub journal: SupplyJournal,
}

/// The resource ledger
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    accounts: BTreeMap<EntityId, Balances>,
    pool: Balances,
    journal: SupplyJournal,
    /// Supply at the last inflation check
    pub(crate) inflation_baseline: Option<Balances>,
}

impl Ledger {
    /// Create a ledger whose pool starts with `genesis`
    pub fn new(genesis: &ResourceAmounts) -> Self {
        Self {
            pool: Balances::from_amounts(genesis),
            ..Self::default()
        }
    }

    /// Open an account funded from the pool. All-or-nothing.
    pub fn open_account(&mut self, entity: EntityId, allocation: &ResourceAmounts) -> Result<(), LedgerError> {
        if self.accounts.contains_key(&entity) {
            return Err(LedgerError::AccountExists(entity));
        }
        let funding = Balances::from_amounts(allocation);
        for (kind, amount) in funding.iter() {
            if self.pool[kind] < amount {
                return Err(self.pool_shortfall(kind, amount));
            }
        }
        for (kind, amount) in funding.iter() {
            self.pool[kind] -= amount;
        }
        self.accounts.insert(entity, funding);
        Ok(())
    }

    /// Close an account, returning its balances to the pool
    pub fn close_account(&mut self, entity: EntityId) -> Result<Balances, LedgerError> {
        let balances = self
            .accounts
            .get(&entity)
            .copied()
            .ok_or(LedgerError::UnknownAccount(entity))?;
        for (kind, amount) in balances.iter() {
            self.pool.add(kind, amount)?;
        }
        self.accounts.remove(&entity);
        Ok(balances)
    }

    pub fn has_account(&self, entity: EntityId) -> bool {
        self.accounts.contains_key(&entity)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn accounts(&self) -> impl Iterator<Item = (EntityId, &Balances)> {
        self.accounts.iter().map(|(id, b)| (*id, b))
    }

    pub fn account_ids(&self) -> Vec<EntityId> {
        self.accounts.keys().copied().collect()
    }

    pub fn balance(&self, entity: EntityId, kind: ResourceKind) -> Result<u64, LedgerError> {
        self.accounts
            .get(&entity)
            .map(|b| b[kind])
            .ok_or(LedgerError::UnknownAccount(entity))
    }

    pub fn balances(&self, entity: EntityId) -> Result<Balances, LedgerError> {
        self.accounts
            .get(&entity)
            .copied()
            .ok_or(LedgerError::UnknownAccount(entity))
    }

    pub fn pool(&self, kind: ResourceKind) -> u64 {
        self.pool[kind]
    }

    /// Sum of all account balances of `kind`
    pub fn circulating(&self, kind: ResourceKind) -> u64 {
        self.accounts.values().map(|b| b[kind]).sum()
    }

    /// Accounts plus pool
    pub fn total_supply(&self, kind: ResourceKind) -> u64 {
        self.circulating(kind) + self.pool[kind]
    }

    pub fn supply(&self) -> Balances {
        let mut supply = Balances::default();
        for kind in ResourceKind::ALL {
            supply[kind] = self.total_supply(kind);
        }
        supply
    }

    pub fn journal(&self) -> SupplyJournal {
        self.journal
    }

    pub fn snapshot(&self) -> SupplySnapshot {
        SupplySnapshot {
            supply: self.supply(),
            journal: self.journal,
        }
    }

    /// Check `before + issued − burned = after` for every kind since `before`
    pub fn verify_since(&self, before: &SupplySnapshot) -> Result<(), LedgerError> {
        let now = self.snapshot();
        for kind in ResourceKind::ALL {
            let issued = now.journal.issued[kind] - before.journal.issued[kind];
            let burned = now.journal.burned[kind] - before.journal.burned[kind];
            let expected = (before.supply[kind] + issued).saturating_sub(burned);
            if expected != now.supply[kind] {
                return Err(LedgerError::ConservationViolated {
                    kind,
                    expected,
                    actual: now.supply[kind],
                });
            }
        }
        Ok(())
    }

    /// Move `amount` from the pool to an account
    pub fn credit(&mut self, entity: EntityId, kind: ResourceKind, amount: u64) -> Result<u64, LedgerError> {
        check_amount(amount)?;
        let current = self.balance(entity, kind)?;
        if self.pool[kind] < amount {
            return Err(self.pool_shortfall(kind, amount));
        }
        let next = current
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { kind })?;
        self.pool[kind] -= amount;
        self.set(entity, kind, next);
        Ok(next)
    }

    /// Move `amount` from an account back to the pool. Never goes negative.
    pub fn debit(&mut self, entity: EntityId, kind: ResourceKind, amount: u64) -> Result<u64, LedgerError> {
        check_amount(amount)?;
        let current = self.balance(entity, kind)?;
        if current < amount {
            return Err(insufficient(entity, kind, current, amount));
        }
        self.pool.add(kind, amount)?;
        self.set(entity, kind, current - amount);
        Ok(current - amount)
    }

    /// Move `amount` between two accounts
    pub fn transfer(
        &mut self,
        from: EntityId,
        to: EntityId,
        kind: ResourceKind,
        amount: u64,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if from == to {
            return Err(LedgerError::InvalidAmount(format!(
                "transfer from {} to itself",
                from
            )));
        }
        let available = self.balance(from, kind)?;
        let receiving = self.balance(to, kind)?;
        if available < amount {
            return Err(insufficient(from, kind, available, amount));
        }
        let next = receiving
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { kind })?;
        self.set(from, kind, available - amount);
        self.set(to, kind, next);
        Ok(())
    }

    /// Issue new supply straight into an account
    pub(crate) fn mint(&mut self, entity: EntityId, kind: ResourceKind, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance(entity, kind)?;
        let next = current
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { kind })?;
        self.journal.issued.add(kind, amount)?;
        self.set(entity, kind, next);
        Ok(next)
    }

    /// Destroy supply held by an account
    pub(crate) fn burn(&mut self, entity: EntityId, kind: ResourceKind, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance(entity, kind)?;
        if current < amount {
            return Err(insufficient(entity, kind, current, amount));
        }
        self.journal.burned.add(kind, amount)?;
        self.set(entity, kind, current - amount);
        Ok(current - amount)
    }

    fn set(&mut self, entity: EntityId, kind: ResourceKind, value: u64) {
        if let Some(balances) = self.accounts.get_mut(&entity) {
            balances[kind] = value;
        }
    }

    fn pool_shortfall(&self, kind: ResourceKind, requested: u64) -> LedgerError {
        LedgerError::InsufficientFunds {
            holder: "pool".to_string(),
            kind,
            available: self.pool[kind],
            requested,
        }
    }
}

fn check_amount(amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(())
}

fn insufficient(entity: EntityId, kind: ResourceKind, available: u64, requested: u64) -> LedgerError {
    LedgerError::InsufficientFunds {
        holder: entity.to_string(),
        kind,
        available,
        requested,
    }
}
