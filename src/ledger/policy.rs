// Economy policies
//
// The three scheduled economy rules. UBI and a burning inflation tax are the
// only operations that change total supply; the wealth cap and a
// redistributing tax only move value around.
//
// When inflation tax and wealth cap fall on the same tick, the tax runs
// first. The cap then sees post-tax balances.

use serde::{Deserialize, Serialize};

use super::book::{Balances, Ledger, LedgerError};
use crate::config::{InflationConfig, TaxPolicy, UbiConfig, WealthCapConfig};
use crate::types::{EntityId, ResourceKind};

const BPS: u128 = 10_000;

/// What a policy run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub accounts_affected: usize,
    pub issued: Balances,
    pub burned: Balances,
    pub moved: Balances,
}

fn bps_of(amount: u64, bps: u64) -> u64 {
    ((amount as u128 * bps as u128) / BPS) as u64
}

/// Credit every open account with fresh supply
pub fn issue_ubi(ledger: &mut Ledger, config: &UbiConfig) -> Result<PolicyOutcome, LedgerError> {
    let mut outcome = PolicyOutcome::default();
    if config.amount == 0 {
        return Ok(outcome);
    }

    let kind = config.kind;
    let recipients = ledger.account_ids();
    for id in &recipients {
        let balance = ledger.balance(*id, kind)?;
        if balance.checked_add(config.amount).is_none() {
            return Err(LedgerError::Overflow { kind });
        }
    }

    for id in recipients {
        ledger.mint(id, kind, config.amount)?;
        outcome.issued[kind] += config.amount;
        outcome.accounts_affected += 1;
    }

    tracing::debug!(
        "UBI issued {} {} to {} accounts",
        outcome.issued[kind],
        kind,
        outcome.accounts_affected
    );
    Ok(outcome)
}

/// Tax accounts above the wealthy share when supply grew past the threshold
///
/// The wealthy share is measured against total supply, pool included.
/// The first run only records a baseline. Each later run compares the current
/// supply per kind against the supply recorded at the previous run.
pub fn apply_inflation_tax(ledger: &mut Ledger, config: &InflationConfig) -> Result<PolicyOutcome, LedgerError> {
    let mut outcome = PolicyOutcome::default();
    let current = ledger.supply();

    let Some(baseline) = ledger.inflation_baseline else {
        ledger.inflation_baseline = Some(current);
        return Ok(outcome);
    };

    let mut affected = std::collections::BTreeSet::new();
    for kind in ResourceKind::ALL {
        if !grew_past(baseline[kind], current[kind], config.growth_threshold_bps) {
            continue;
        }

        let total = ledger.total_supply(kind);
        let wealthy: Vec<(EntityId, u64)> = ledger
            .accounts()
            .filter(|(_, b)| is_above_share(b[kind], total, config.wealthy_share_bps))
            .map(|(id, b)| (id, b[kind]))
            .collect();

        for (id, balance) in wealthy {
            let tax = bps_of(balance, config.tax_bps);
            if tax == 0 {
                continue;
            }
            match config.policy {
                TaxPolicy::Burn => {
                    ledger.burn(id, kind, tax)?;
                    outcome.burned[kind] += tax;
                }
                TaxPolicy::Redistribute => {
                    ledger.debit(id, kind, tax)?;
                    outcome.moved[kind] += tax;
                }
            }
            affected.insert(id);
        }

        tracing::info!(
            "Inflation tax on {}: supply {} -> {}, collected {}",
            kind,
            baseline[kind],
            current[kind],
            outcome.burned[kind] + outcome.moved[kind]
        );
    }

    outcome.accounts_affected = affected.len();
    ledger.inflation_baseline = Some(ledger.supply());
    Ok(outcome)
}

/// Redistribute part of every balance above the cap share to the other accounts
///
/// The cap is a share of total supply, pool included. Holdings are judged against the balances at the start of the run. The
/// remainder of an uneven split goes to the pool.
pub fn enforce_wealth_cap(ledger: &mut Ledger, config: &WealthCapConfig) -> Result<PolicyOutcome, LedgerError> {
    let mut outcome = PolicyOutcome::default();
    if ledger.account_count() < 2 {
        return Ok(outcome);
    }

    let ids = ledger.account_ids();
    let mut affected = std::collections::BTreeSet::new();

    for kind in ResourceKind::ALL {
        let cap = bps_of(ledger.total_supply(kind), config.cap_bps);
        let over: Vec<(EntityId, u64)> = ledger
            .accounts()
            .filter(|(_, b)| b[kind] > cap)
            .map(|(id, b)| (id, b[kind] - cap))
            .collect();

        for (rich, excess) in over {
            let moved = bps_of(excess, config.redistribute_bps);
            let others: Vec<EntityId> = ids.iter().copied().filter(|id| *id != rich).collect();
            let share = moved / others.len() as u64;

            if share > 0 {
                for other in &others {
                    ledger.transfer(rich, *other, kind, share)?;
                }
            }
            let remainder = moved - share * others.len() as u64;
            if remainder > 0 {
                ledger.debit(rich, kind, remainder)?;
            }
            if moved > 0 {
                outcome.moved[kind] += moved;
                affected.insert(rich);
            }
        }
    }

    outcome.accounts_affected = affected.len();
    for (kind, moved) in outcome.moved.iter().filter(|(_, moved)| *moved > 0) {
        tracing::info!("Wealth cap redistributed {} {} from capped accounts", moved, kind);
    }
    if outcome.accounts_affected > 0 {
        tracing::debug!("Wealth cap touched {} accounts", outcome.accounts_affected);
    }
    Ok(outcome)
}

fn grew_past(baseline: u64, current: u64, threshold_bps: u64) -> bool {
    if current <= baseline {
        return false;
    }
    if baseline == 0 {
        return true;
    }
    let growth = current - baseline;
    growth as u128 * BPS > baseline as u128 * threshold_bps as u128
}

fn is_above_share(balance: u64, total: u64, share_bps: u64) -> bool {
    total > 0 && balance as u128 * BPS > total as u128 * share_bps as u128
}
