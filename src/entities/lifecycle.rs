// Entity lifecycle
//
// State machine per entity: Born → Growing ⇄ Reproducing → Dying → Dead.
// - Born: newborn body, species fixed, account opened by the caller
// - Growing: one behavior per awake tick; organs mature and wear, the
//   telomere counts down and fatigue builds; sleep lowers fatigue
// - Reproducing: mature entities between reproductions; two of the same
//   species can produce an offspring
// - Dying → Dead: telomere exhausted, homeostasis collapse or decree
//
// This module owns the pure state transitions. Ledger and unit side effects
// (funding, memorials, reviews) are driven by the world.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::entity::{Behavior, DeathCause, Entity, LifecycleStage, Temperament, Wakefulness};
use crate::config::{LifecycleConfig, SpeciesConfig};
use crate::error::{Result, StrataError};
use crate::types::{EntityId, UnitId};

/// Result of one sleep-cycle step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTransition {
    None,
    FellAsleep,
    WokeUp,
}

/// Permanent record of a dead entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathRecord {
    pub entity: EntityId,
    pub species: String,
    pub cause: DeathCause,
    pub tick: u64,
    pub memorial: Option<UnitId>,
    pub contributions: usize,
}

/// Alive entities in birth order, plus the record of the dead
#[derive(Debug, Default)]
pub struct Population {
    alive: BTreeMap<EntityId, Entity>,
    order: Vec<EntityId>,
    deceased: BTreeMap<EntityId, DeathRecord>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newborn. Dead ids can never come back.
    pub fn insert(&mut self, entity: Entity) -> Result<EntityId> {
        let id = entity.id;
        if self.deceased.contains_key(&id) {
            return Err(StrataError::InvalidOperation(format!(
                "entity {} is dead and cannot re-enter the population",
                id
            )));
        }
        if self.alive.contains_key(&id) {
            return Err(StrataError::InvalidOperation(format!("entity {} already alive", id)));
        }
        self.order.push(id);
        self.alive.insert(id, entity);
        Ok(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.alive.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.alive.get_mut(id)
    }

    /// Alive entity ids, oldest first
    pub fn alive_ids(&self) -> Vec<EntityId> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.alive.get(id))
    }

    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    pub fn is_alive(&self, id: &EntityId) -> bool {
        self.alive.contains_key(id)
    }

    pub fn is_dead(&self, id: &EntityId) -> bool {
        self.deceased.contains_key(id)
    }

    pub fn deceased_count(&self) -> usize {
        self.deceased.len()
    }

    pub fn death_record(&self, id: &EntityId) -> Option<&DeathRecord> {
        self.deceased.get(id)
    }

    /// Remove an entity from the active set and record its death
    pub(crate) fn bury(&mut self, id: &EntityId, record: DeathRecord) -> Option<Entity> {
        let mut entity = self.alive.remove(id)?;
        self.order.retain(|e| e != id);
        entity.stage = LifecycleStage::Dead;
        self.deceased.insert(*id, record);
        Some(entity)
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn species(&self, name: &str) -> Option<&SpeciesConfig> {
        self.config.species.iter().find(|s| s.name == name)
    }

    /// Pick a species uniformly
    pub fn pick_species<R: Rng>(&self, rng: &mut R) -> Option<&SpeciesConfig> {
        if self.config.species.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.config.species.len());
        self.config.species.get(idx)
    }

    /// A newborn of `species`
    pub fn spawn<R: Rng>(&self, species: &SpeciesConfig, rng: &mut R, tick: u64) -> Entity {
        Entity::new(species.name.clone(), species.telomere, Temperament::random(rng), tick)
    }

    /// Offspring of two compatible parents
    pub fn offspring<R: Rng>(&self, a: &Entity, b: &Entity, rng: &mut R, tick: u64) -> Result<Entity> {
        if a.species() != b.species() {
            return Err(StrataError::InvalidOperation(format!(
                "cannot breed {} with {}",
                a.species(),
                b.species()
            )));
        }
        let species = self
            .species(a.species())
            .ok_or_else(|| StrataError::InvalidOperation(format!("unknown species {}", a.species())))?;

        let temperament = Temperament::inherit(&a.temperament, &b.temperament, self.config.mutation, rng);
        let mut child = Entity::new(species.name.clone(), species.telomere, temperament, tick);
        child.generation = a.generation.max(b.generation) + 1;
        child.parents = Some((a.id, b.id));
        Ok(child)
    }

    /// Weighted behavior choice from temperament and fatigue
    pub fn choose_behavior<R: Rng>(&self, entity: &Entity, rng: &mut R) -> Behavior {
        let t = &entity.temperament;
        let weights = [
            t.curiosity,
            t.diligence,
            (t.curiosity + t.diligence) / 2.0,
            t.sociability,
            entity.fatigue * 2.0,
        ];
        match WeightedIndex::new(weights.iter().map(|w| w.max(0.01))) {
            Ok(dist) => Behavior::ALL[dist.sample(rng)],
            Err(_) => Behavior::Rest,
        }
    }

    /// Body, telomere and fatigue effects of one behavior
    pub fn apply_behavior(&self, entity: &mut Entity, behavior: Behavior) {
        if entity.stage == LifecycleStage::Born {
            entity.stage = LifecycleStage::Growing;
        }

        for organ in behavior.organs() {
            entity
                .body
                .exercise(*organ, self.config.growth_per_action, self.config.wear_per_action);
        }
        entity.body.wear_all(self.config.wear_per_action / 4.0);
        entity.telomere = entity.telomere.saturating_sub(self.config.telomere_decrement);

        entity.fatigue = if behavior.is_active() {
            (entity.fatigue + self.config.fatigue_per_tick).clamp(0.0, 1.0)
        } else {
            (entity.fatigue - self.config.recovery_per_tick / 2.0).clamp(0.0, 1.0)
        };
        entity.last_behavior = Some(behavior);
    }

    /// Advance the sleep/wake sub-state
    pub fn sleep_cycle(&self, entity: &mut Entity) -> SleepTransition {
        match entity.wakefulness {
            Wakefulness::Awake if entity.fatigue >= self.config.sleep_threshold => {
                entity.wakefulness = Wakefulness::Asleep;
                SleepTransition::FellAsleep
            }
            Wakefulness::Awake => SleepTransition::None,
            Wakefulness::Asleep => {
                entity.fatigue = (entity.fatigue - self.config.recovery_per_tick).clamp(0.0, 1.0);
                entity.body.repair_all(self.config.repair_per_sleep_tick);
                if entity.fatigue <= self.config.wake_threshold {
                    entity.wakefulness = Wakefulness::Awake;
                    SleepTransition::WokeUp
                } else {
                    SleepTransition::None
                }
            }
        }
    }

    /// Why the entity must die now, if it must
    pub fn check_homeostasis(&self, entity: &Entity) -> Option<DeathCause> {
        if entity.telomere == 0 {
            return Some(DeathCause::TelomereExhausted);
        }
        if entity.body.homeostasis() < self.config.survival_threshold {
            return Some(DeathCause::HomeostasisCollapse);
        }
        None
    }

    /// Move between Growing and Reproducing based on maturity and cooldown
    pub fn update_stage(&self, entity: &mut Entity, tick: u64) {
        let mature = entity.body.mean_maturity() >= self.config.reproduction_maturity;
        let rested = entity
            .last_reproduced_tick
            .map_or(true, |t| tick.saturating_sub(t) >= self.config.reproduction_every);

        entity.stage = match entity.stage {
            LifecycleStage::Growing if mature && rested => LifecycleStage::Reproducing,
            LifecycleStage::Reproducing if !rested => LifecycleStage::Growing,
            stage => stage,
        };
    }
}
