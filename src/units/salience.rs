// Salience dynamics
//
// Salience decays exponentially with a configurable half-life and is boosted
// additively whenever a unit is accessed or cited:
// - Just touched → unchanged
// - One half-life → 0.5x
// - Two half-lives → 0.25x

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::unit::Unit;

/// Decay factor for `elapsed` given `half_life`: `0.5^(elapsed / half_life)`
pub fn decay_factor(elapsed: Duration, half_life: Duration) -> f32 {
    if half_life.is_zero() {
        return 0.0;
    }
    let ratio = elapsed.as_secs_f64() / half_life.as_secs_f64();
    0.5_f64.powf(ratio).clamp(0.0, 1.0) as f32
}

/// Apply decay to a unit up to `now`. Returns the new salience.
///
/// Decay is measured from `salience_updated_at`, so repeated calls compose
/// to the same result as a single call over the whole span.
pub fn apply_decay(unit: &mut Unit, now: DateTime<Utc>, half_life: Duration) -> f32 {
    let elapsed = now
        .signed_duration_since(unit.salience_updated_at)
        .to_std()
        .unwrap_or_default();

    if !elapsed.is_zero() {
        let decayed = unit.salience * decay_factor(elapsed, half_life);
        unit.set_salience(decayed);
        unit.salience_updated_at = now;
    }

    unit.salience
}

/// Boost a unit on access. Returns the new salience.
pub fn boost(unit: &mut Unit, amount: f32, now: DateTime<Utc>) -> f32 {
    unit.set_salience(unit.salience + amount);
    unit.access_count = unit.access_count.saturating_add(1);
    unit.last_touched = now;
    unit.salience_updated_at = now;
    unit.salience
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitPayload;
    use std::collections::BTreeSet;

    fn unit_at(salience: f32, at: DateTime<Utc>) -> Unit {
        Unit::new(UnitPayload::new("c", "s", BTreeSet::new()), None, salience, at)
    }

    #[test]
    fn test_decay_factor_half_life() {
        let hl = Duration::from_secs(3600);
        assert!((decay_factor(Duration::ZERO, hl) - 1.0).abs() < 1e-6);
        assert!((decay_factor(Duration::from_secs(3600), hl) - 0.5).abs() < 1e-6);
        assert!((decay_factor(Duration::from_secs(7200), hl) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_apply_decay_composes() {
        let start = Utc::now();
        let hl = Duration::from_secs(3600);

        let mut stepwise = unit_at(0.8, start);
        apply_decay(&mut stepwise, start + chrono::Duration::minutes(30), hl);
        apply_decay(&mut stepwise, start + chrono::Duration::minutes(60), hl);

        let mut single = unit_at(0.8, start);
        apply_decay(&mut single, start + chrono::Duration::minutes(60), hl);

        assert!((stepwise.salience - single.salience).abs() < 1e-5);
        assert!((single.salience - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_boost_updates_touch_and_caps() {
        let start = Utc::now();
        let mut unit = unit_at(0.95, start);
        let later = start + chrono::Duration::minutes(5);

        let s = boost(&mut unit, 0.2, later);
        assert_eq!(s, 1.0);
        assert_eq!(unit.access_count, 1);
        assert_eq!(unit.last_touched, later);
    }
}
