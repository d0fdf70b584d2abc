//! The simulation world
//!
//! Owns every subsystem: the unit store and its archive, the ledger, the
//! population, and the consolidation and forgetting engines. Heartbeat tasks
//! borrow the world mutably one at a time, so no subsystem needs locking.
//! All state changes go through the operations here.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveBackend, FileArchive, InMemoryArchive};
use crate::brain::BrainGateway;
use crate::config::StrataConfig;
use crate::consolidation::{Consolidator, PassReport};
use crate::entities::{
    Behavior, DeathCause, DeathRecord, LifecycleManager, LifecycleStage, Population, SleepTransition,
};
use crate::error::{Result, StrataError};
use crate::forgetting::{ForgettingEngine, ForgettingReport};
use crate::ledger::{self, Ledger, LedgerError, PolicyOutcome};
use crate::types::{EntityId, ResourceKind, UnitId};
use crate::units::{Unit, UnitPayload, UnitStore};

/// A unit payload offered from outside the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub payload: UnitPayload,
    pub owner: Option<EntityId>,
    /// Overrides the configured initial salience
    pub salience: Option<f32>,
    /// Never evicted from a full backlog
    pub pinned: bool,
}

impl IngestRequest {
    pub fn new<I, T>(content: impl Into<String>, summary: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            payload: UnitPayload::new(content, summary, tags.into_iter().map(Into::into).collect()),
            owner: None,
            salience: None,
            pinned: false,
        }
    }

    pub fn with_owner(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_salience(mut self, salience: f32) -> Self {
        self.salience = Some(salience);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Inserted into the store
    Resident,
    /// Held in the backlog until the heap has room
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub id: UnitId,
    pub status: IngestStatus,
}

/// Counters the world keeps across ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldCounters {
    pub ingested: u64,
    pub deferred: u64,
    pub backlog_admitted: u64,
    pub backlog_dropped: u64,
    pub tombstoned: u64,
    pub births: u64,
    pub deaths: u64,
    pub reviews: u64,
}

pub struct World {
    config: StrataConfig,
    units: UnitStore,
    archive: Arc<dyn ArchiveBackend>,
    ledger: Ledger,
    population: Population,
    lifecycle: LifecycleManager,
    consolidator: Consolidator,
    forgetting: ForgettingEngine,
    brain: Arc<BrainGateway>,
    backlog: VecDeque<Deferred>,
    rng: StdRng,
    counters: WorldCounters,
}

/// A unit waiting for heap space
struct Deferred {
    unit: Unit,
    pinned: bool,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("units", &self.units.len())
            .field("in_heap", &self.units.in_heap_count())
            .field("population", &self.population.len())
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

impl World {
    /// Build a world from validated config and explicit boundaries
    pub fn new(config: StrataConfig, archive: Arc<dyn ArchiveBackend>, brain: Arc<BrainGateway>) -> Result<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            units: UnitStore::new(config.units.max_in_heap),
            archive,
            ledger: Ledger::new(&config.ledger.genesis_pool),
            population: Population::new(),
            lifecycle: LifecycleManager::new(config.lifecycle.clone()),
            consolidator: Consolidator::new(config.consolidation.clone()),
            forgetting: ForgettingEngine::new(config.forgetting.clone(), config.units.salience_half_life),
            brain,
            backlog: VecDeque::new(),
            rng,
            counters: WorldCounters::default(),
            config,
        })
    }

    /// Build a world with the archive and brain the config describes
    pub fn from_config(config: StrataConfig) -> Result<Self> {
        let archive: Arc<dyn ArchiveBackend> = match &config.archive.dir {
            Some(dir) => Arc::new(FileArchive::open(dir)?),
            None => Arc::new(InMemoryArchive::new()),
        };
        let brain = BrainGateway::from_config(&config.brain).map_err(|e| StrataError::Other(e.to_string()))?;
        Self::new(config, archive, Arc::new(brain))
    }

    /// In-memory archive, offline brain
    pub fn ephemeral(config: StrataConfig) -> Result<Self> {
        let brain = BrainGateway::offline(&config.brain);
        Self::new(config, Arc::new(InMemoryArchive::new()), Arc::new(brain))
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn units(&self) -> &UnitStore {
        &self.units
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Ledger operations go through the ledger's own checks
    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    /// Queue a consolidation candidate ahead of the next pass
    pub fn enqueue_candidate(&mut self, candidate: crate::consolidation::ClusterCandidate) {
        self.consolidator.enqueue(candidate);
    }

    pub fn forgetting(&self) -> &ForgettingEngine {
        &self.forgetting
    }

    pub fn brain(&self) -> &BrainGateway {
        &self.brain
    }

    pub fn archive(&self) -> &dyn ArchiveBackend {
        self.archive.as_ref()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn counters(&self) -> WorldCounters {
        self.counters
    }

    /// In-heap count at or above the pressure ratio of the ceiling
    pub fn under_pressure(&self) -> bool {
        self.units.under_pressure(self.config.units.pressure_ratio)
    }

    // ---- ingestion ----------------------------------------------------------

    /// Accept a unit. At the heap ceiling it is deferred, never refused.
    pub fn ingest(&mut self, request: IngestRequest, now: DateTime<Utc>) -> Result<IngestReceipt> {
        if let Some(owner) = request.owner {
            if !self.population.is_alive(&owner) {
                return Err(StrataError::EntityNotFound(owner));
            }
        }

        let salience = request.salience.unwrap_or(self.config.units.initial_salience);
        let pinned = request.pinned;
        let unit = Unit::new(request.payload, request.owner, salience, now);
        let id = unit.id;
        self.counters.ingested += 1;

        if self.units.has_capacity() && self.backlog.is_empty() {
            self.units.insert(unit)?;
            return Ok(IngestReceipt {
                id,
                status: IngestStatus::Resident,
            });
        }

        // Pinned units are never dropped; with nothing else to evict the
        // backlog grows past its limit
        if self.backlog.len() >= self.config.units.backlog_limit {
            let oldest = self.backlog.iter().position(|d| !d.pinned);
            if let Some(dropped) = oldest.and_then(|i| self.backlog.remove(i)) {
                warn!("Ingestion backlog full, dropping oldest deferred unit {}", dropped.unit.id);
                self.counters.backlog_dropped += 1;
            }
        }
        self.backlog.push_back(Deferred { unit, pinned });
        self.counters.deferred += 1;
        debug!("Deferred unit {} (backlog {})", id, self.backlog.len());

        Ok(IngestReceipt {
            id,
            status: IngestStatus::Deferred,
        })
    }

    /// Move deferred units into the store while there is room
    pub fn admit_backlog(&mut self) -> usize {
        let mut admitted = 0;
        while self.units.has_capacity() {
            let Some(deferred) = self.backlog.pop_front() else {
                break;
            };
            match self.units.insert(deferred.unit) {
                Ok(_) => admitted += 1,
                Err(e) => warn!("Backlog admission failed: {}", e),
            }
        }
        if admitted > 0 {
            debug!("Admitted {} deferred units", admitted);
            self.counters.backlog_admitted += admitted as u64;
        }
        admitted
    }

    // ---- reads and admin ------------------------------------------------------

    /// Payload of a unit, rehydrated from the archive when needed
    pub fn rehydrate(&self, id: &UnitId) -> Result<UnitPayload> {
        let unit = self.units.get(id).ok_or(StrataError::UnitNotFound(*id))?;
        if let Some(payload) = &unit.payload {
            return Ok(payload.clone());
        }
        match &unit.archive_handle {
            Some(handle) => Ok(self.archive.rehydrate(handle)?),
            None => Err(StrataError::InvalidOperation(format!(
                "unit {} is a tombstone; its payload was discarded",
                id
            ))),
        }
    }

    /// Read a unit, boosting its salience
    pub fn read(&mut self, id: &UnitId, now: DateTime<Utc>) -> Result<UnitPayload> {
        let payload = self.rehydrate(id)?;
        self.units.touch(id, self.config.units.touch_boost, now)?;
        Ok(payload)
    }

    /// Exempt a unit from forgetting
    pub fn protect(&mut self, id: UnitId) -> Result<bool> {
        if !self.units.contains(&id) {
            return Err(StrataError::UnitNotFound(id));
        }
        Ok(self.forgetting.protect(id))
    }

    pub fn unprotect(&mut self, id: &UnitId) -> bool {
        self.forgetting.unprotect(id)
    }

    // ---- passes ---------------------------------------------------------------

    pub fn decay_salience(&mut self, now: DateTime<Utc>) -> usize {
        self.units.decay_all(now, self.config.units.salience_half_life)
    }

    pub async fn run_consolidation(&mut self, now: DateTime<Utc>) -> PassReport {
        self.consolidator
            .run_pass(&mut self.units, self.archive.as_ref(), &self.brain, now)
            .await
    }

    pub fn run_forgetting(&mut self, now: DateTime<Utc>) -> ForgettingReport {
        let pending = self.consolidator.pending_members();
        let placement = self.consolidator.clusterable(&self.units);
        let report = self.forgetting.run(&mut self.units, &pending, &placement, now);
        self.counters.tombstoned += report.tombstoned.len() as u64;
        report
    }

    // ---- economy --------------------------------------------------------------

    pub fn issue_ubi(&mut self) -> Result<PolicyOutcome> {
        Ok(ledger::issue_ubi(&mut self.ledger, &self.config.ledger.ubi)?)
    }

    pub fn apply_inflation_tax(&mut self) -> Result<PolicyOutcome> {
        Ok(ledger::apply_inflation_tax(&mut self.ledger, &self.config.ledger.inflation)?)
    }

    pub fn enforce_wealth_cap(&mut self) -> Result<PolicyOutcome> {
        Ok(ledger::enforce_wealth_cap(&mut self.ledger, &self.config.ledger.wealth_cap)?)
    }

    // ---- population -----------------------------------------------------------

    /// Birth a new entity of `species` (random when None), funded from the pool
    pub fn spawn_entity(&mut self, species: Option<&str>, tick: u64) -> Result<EntityId> {
        let species = match species {
            Some(name) => self.lifecycle.species(name).cloned().ok_or_else(|| {
                StrataError::InvalidOperation(format!("unknown species {}", name))
            })?,
            None => self
                .lifecycle
                .pick_species(&mut self.rng)
                .cloned()
                .ok_or_else(|| StrataError::InvalidOperation("no species configured".to_string()))?,
        };

        let entity = self.lifecycle.spawn(&species, &mut self.rng, tick);
        let id = entity.id;
        self.ledger.open_account(id, &species.starting_allocation)?;
        self.population.insert(entity)?;
        self.counters.births += 1;
        debug!("Born: {} {}", species.name, id);
        Ok(id)
    }

    /// Spawn the configured initial population
    pub fn populate(&mut self, tick: u64) -> Result<usize> {
        let target = self.config.lifecycle.initial_population;
        for _ in 0..target {
            self.spawn_entity(None, tick)?;
        }
        info!("Spawned initial population of {}", target);
        Ok(target)
    }

    /// Births to bring the population back up to the floor
    pub fn enforce_population_floor(&mut self, tick: u64) -> Result<usize> {
        let mut born = 0;
        while self.population.len() < self.config.lifecycle.min_population {
            match self.spawn_entity(None, tick) {
                Ok(_) => born += 1,
                Err(StrataError::Ledger(e)) => {
                    warn!("Population floor birth not funded: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(born)
    }

    /// One behavior for an awake entity. Returns None while it sleeps.
    pub async fn entity_behave(&mut self, id: EntityId, now: DateTime<Utc>) -> Result<Option<Behavior>> {
        let entity = self.population.get(&id).ok_or(StrataError::EntityNotFound(id))?;
        if entity.is_asleep() {
            return Ok(None);
        }

        let mut behavior = self.lifecycle.choose_behavior(entity, &mut self.rng);
        let cost = self.config.lifecycle.behavior_cost;
        if behavior.is_active() && cost > 0 {
            match self.ledger.debit(id, ResourceKind::Energy, cost) {
                Ok(_) => {}
                Err(LedgerError::InsufficientFunds { .. }) => behavior = Behavior::Rest,
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(entity) = self.population.get_mut(&id) {
            self.lifecycle.apply_behavior(entity, behavior);
        }

        match behavior {
            Behavior::Explore => {
                let boost = self.config.units.touch_boost;
                let picked = self
                    .units
                    .iter()
                    .filter(|u| u.is_resident() && !u.is_tombstone())
                    .map(|u| u.id)
                    .choose(&mut self.rng);
                if let Some(unit) = picked {
                    self.units.touch(&unit, boost, now)?;
                }
            }
            Behavior::Study => {
                self.produce(id, behavior, None, now)?;
                self.reward(id, ResourceKind::Data);
            }
            Behavior::Create => {
                let summary = self.imagine(id).await;
                self.produce(id, behavior, summary, now)?;
                self.reward(id, ResourceKind::Innovation);
            }
            Behavior::Socialize => self.reward(id, ResourceKind::SocialCapital),
            Behavior::Rest => {}
        }

        Ok(Some(behavior))
    }

    /// Ask the brain for a creation summary on the entity's own budget
    async fn imagine(&self, id: EntityId) -> Option<String> {
        let entity = self.population.get(&id)?;
        let prompt = format!(
            "You are a {} (generation {}). In one sentence, describe something new you made.",
            entity.species(),
            entity.generation
        );
        self.brain.generate(Some(id), &prompt).await.ok()
    }

    /// Ingest a unit produced by an entity
    fn produce(&mut self, id: EntityId, behavior: Behavior, summary: Option<String>, now: DateTime<Utc>) -> Result<()> {
        let entity = self.population.get(&id).ok_or(StrataError::EntityNotFound(id))?;
        let species = entity.species().to_string();
        let short = entity.short_id();

        let topics: Vec<String> = self
            .lifecycle
            .species(&species)
            .map(|s| s.topics.clone())
            .unwrap_or_default();
        let chosen: Vec<String> = topics.choose_multiple(&mut self.rng, 2).cloned().collect();

        let mut tags: BTreeSet<String> = chosen.iter().cloned().collect();
        tags.insert(species.clone());

        let summary = summary.unwrap_or_else(|| format!("{} notes on {}", behavior, chosen.join(" and ")));
        let content = format!("{} {} {}: {}", species, short, behavior, summary);

        let request = IngestRequest {
            payload: UnitPayload::new(content, summary, tags),
            owner: Some(id),
            salience: None,
            pinned: false,
        };
        let receipt = self.ingest(request, now)?;
        if let Some(entity) = self.population.get_mut(&id) {
            entity.contributions.push(receipt.id);
        }
        Ok(())
    }

    fn reward(&mut self, id: EntityId, kind: ResourceKind) {
        let amount = self.config.lifecycle.production_reward;
        if amount == 0 {
            return;
        }
        if let Err(e) = self.ledger.credit(id, kind, amount) {
            debug!("No {} reward for {}: {}", kind, id, e);
        }
    }

    /// Advance sleep/wake; falling asleep triggers a review of the entity's units
    pub fn entity_sleep_cycle(&mut self, id: EntityId, now: DateTime<Utc>) -> Result<SleepTransition> {
        let entity = self.population.get_mut(&id).ok_or(StrataError::EntityNotFound(id))?;
        let transition = self.lifecycle.sleep_cycle(entity);

        if transition == SleepTransition::FellAsleep {
            let boost = self.config.units.touch_boost;
            let reviewed: Vec<UnitId> = self
                .units
                .owned_by(id)
                .into_iter()
                .filter(|u| !u.lineage.is_consolidated())
                .take(self.config.lifecycle.review_limit)
                .map(|u| u.id)
                .collect();
            for unit in &reviewed {
                self.units.touch(unit, boost, now)?;
            }
            self.counters.reviews += reviewed.len() as u64;
            debug!("Entity {} reviewed {} units before sleep", id, reviewed.len());
        }
        Ok(transition)
    }

    /// Stage update and survival check; dies when homeostasis fails
    pub fn entity_homeostasis(&mut self, id: EntityId, tick: u64, now: DateTime<Utc>) -> Result<Option<DeathCause>> {
        let entity = self.population.get_mut(&id).ok_or(StrataError::EntityNotFound(id))?;
        self.lifecycle.update_stage(entity, tick);

        match self.lifecycle.check_homeostasis(entity) {
            Some(cause) => {
                self.kill(id, cause, tick, now)?;
                Ok(Some(cause))
            }
            None => Ok(None),
        }
    }

    /// External decree of death
    pub fn decree_death(&mut self, id: EntityId, tick: u64, now: DateTime<Utc>) -> Result<DeathRecord> {
        self.kill(id, DeathCause::Decree, tick, now)
    }

    /// Dying → Dead: one memorial unit, account closed, entity removed
    fn kill(&mut self, id: EntityId, cause: DeathCause, tick: u64, now: DateTime<Utc>) -> Result<DeathRecord> {
        if self.population.is_dead(&id) {
            return Err(StrataError::InvalidOperation(format!("entity {} is already dead", id)));
        }
        let entity = self.population.get_mut(&id).ok_or(StrataError::EntityNotFound(id))?;
        entity.stage = LifecycleStage::Dying;

        let species = entity.species().to_string();
        let contributions = entity.contributions.len();
        let age = tick.saturating_sub(entity.born_at_tick);
        let summary = format!(
            "memorial for {} {} ({} contributions over {} ticks)",
            species,
            entity.short_id(),
            contributions,
            age
        );
        let content = format!("{}; cause of death: {:?}; entity id {}", summary, cause, id);

        let memorial = self
            .ingest(
                IngestRequest::new(content, summary, ["memorial".to_string(), species.clone()]).pinned(),
                now,
            )
            .map(|r| r.id);
        let memorial = match memorial {
            Ok(unit) => Some(unit),
            Err(e) => {
                warn!("Memorial for {} not recorded: {}", id, e);
                None
            }
        };

        if let Err(e) = self.ledger.close_account(id) {
            warn!("Closing account of {} failed: {}", id, e);
        }

        let record = DeathRecord {
            entity: id,
            species,
            cause,
            tick,
            memorial,
            contributions,
        };
        self.population.bury(&id, record.clone());
        self.counters.deaths += 1;
        info!("Entity {} died ({:?}) at tick {}", id, cause, tick);
        Ok(record)
    }

    /// Pair same-species entities in the Reproducing stage that can pay
    pub fn reproduce(&mut self, tick: u64) -> Result<usize> {
        let cost = self.config.lifecycle.reproduction_cost;
        let max = self.config.lifecycle.max_population;

        let ready: Vec<(EntityId, String)> = self
            .population
            .iter()
            .filter(|e| e.stage == LifecycleStage::Reproducing && !e.is_asleep())
            .filter(|e| {
                self.ledger
                    .balance(e.id, ResourceKind::Energy)
                    .map_or(false, |b| b >= cost)
            })
            .map(|e| (e.id, e.species().to_string()))
            .collect();

        let mut born = 0;
        let mut used: BTreeSet<EntityId> = BTreeSet::new();
        for (i, (a, species)) in ready.iter().enumerate() {
            if self.population.len() >= max {
                break;
            }
            if used.contains(a) {
                continue;
            }
            let Some((b, _)) = ready
                .iter()
                .skip(i + 1)
                .find(|(b, s)| s == species && !used.contains(b))
            else {
                continue;
            };
            let b = *b;

            let (Some(pa), Some(pb)) = (self.population.get(a), self.population.get(&b)) else {
                continue;
            };
            let child = self.lifecycle.offspring(pa, pb, &mut self.rng, tick)?;
            let child_id = child.id;
            let Some(allocation) = self.lifecycle.species(species).map(|s| s.starting_allocation) else {
                continue;
            };

            if cost > 0 {
                self.ledger.debit(*a, ResourceKind::Energy, cost)?;
                if let Err(e) = self.ledger.debit(b, ResourceKind::Energy, cost) {
                    self.ledger.credit(*a, ResourceKind::Energy, cost)?;
                    return Err(e.into());
                }
            }
            if let Err(e) = self.ledger.open_account(child_id, &allocation) {
                warn!("Offspring of {} and {} not funded: {}", a, b, e);
                if cost > 0 {
                    self.ledger.credit(*a, ResourceKind::Energy, cost)?;
                    self.ledger.credit(b, ResourceKind::Energy, cost)?;
                }
                continue;
            }

            self.population.insert(child)?;
            for parent in [*a, b] {
                if let Some(p) = self.population.get_mut(&parent) {
                    p.last_reproduced_tick = Some(tick);
                    p.stage = LifecycleStage::Growing;
                }
                used.insert(parent);
            }
            born += 1;
            self.counters.births += 1;
            debug!("{} and {} produced {}", a, b, child_id);
        }

        Ok(born)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tier;

    fn world() -> World {
        let mut config = StrataConfig::default();
        config.seed = Some(42);
        World::ephemeral(config).unwrap()
    }

    #[test]
    fn test_ingest_defers_at_ceiling_and_admits_later() {
        let mut config = StrataConfig::default();
        config.units.max_in_heap = 2;
        let mut world = World::ephemeral(config).unwrap();
        let now = Utc::now();

        for _ in 0..2 {
            let r = world.ingest(IngestRequest::new("c", "s", ["t"]), now).unwrap();
            assert_eq!(r.status, IngestStatus::Resident);
        }
        let deferred = world.ingest(IngestRequest::new("c", "s", ["t"]), now).unwrap();
        assert_eq!(deferred.status, IngestStatus::Deferred);
        assert_eq!(world.backlog_len(), 1);
        assert_eq!(world.admit_backlog(), 0);

        let first = world.units().iter().next().map(|u| u.id).unwrap();
        world.units.tombstone(&first).unwrap();

        assert_eq!(world.admit_backlog(), 1);
        assert!(world.units().contains(&deferred.id));
        assert_eq!(world.units().in_heap_count(), 2);
    }

    #[test]
    fn test_memorial_survives_full_backlog() {
        let mut config = StrataConfig::default();
        config.seed = Some(42);
        config.units.max_in_heap = 1;
        config.units.backlog_limit = 1;
        let mut world = World::ephemeral(config).unwrap();
        let now = Utc::now();

        let resident = world.ingest(IngestRequest::new("c", "s", ["t"]), now).unwrap();
        assert_eq!(resident.status, IngestStatus::Resident);
        let id = world.spawn_entity(None, 0).unwrap();
        let memorial = world.decree_death(id, 1, now).unwrap().memorial.unwrap();
        assert_eq!(world.backlog_len(), 1);

        // Only the memorial is waiting: nothing to evict, the backlog stretches
        let first = world.ingest(IngestRequest::new("c", "s", ["t"]), now).unwrap();
        assert_eq!(first.status, IngestStatus::Deferred);
        assert_eq!(world.counters().backlog_dropped, 0);
        assert_eq!(world.backlog_len(), 2);

        // The oldest evictable unit goes, not the memorial
        world.ingest(IngestRequest::new("c", "s", ["t"]), now).unwrap();
        assert_eq!(world.counters().backlog_dropped, 1);
        assert_eq!(world.backlog_len(), 2);

        world.units.tombstone(&resident.id).unwrap();
        assert_eq!(world.admit_backlog(), 1);
        assert!(world.units().contains(&memorial));
        assert!(!world.units().contains(&first.id));
        assert_eq!(
            world.population().death_record(&id).and_then(|r| r.memorial),
            Some(memorial)
        );
    }

    #[test]
    fn test_ingest_rejects_unknown_owner() {
        let mut world = world();
        let ghost = EntityId::new();
        let err = world
            .ingest(IngestRequest::new("c", "s", ["t"]).with_owner(ghost), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StrataError::EntityNotFound(id) if id == ghost));
    }

    #[test]
    fn test_death_creates_one_memorial_and_returns_balances() {
        let mut world = world();
        let id = world.spawn_entity(Some("archivist"), 0).unwrap();
        let supply_before = world.ledger().supply();
        let units_before = world.units().len();

        let record = world.decree_death(id, 5, Utc::now()).unwrap();

        assert_eq!(record.cause, DeathCause::Decree);
        assert_eq!(world.units().len(), units_before + 1);
        let memorial = world.units().get(&record.memorial.unwrap()).unwrap();
        assert_eq!(memorial.tier, Tier::Regular);
        assert!(memorial.tags().any(|t| t == "memorial"));
        assert!(!world.ledger().has_account(id));
        assert_eq!(world.ledger().supply(), supply_before);
        assert!(world.population().is_dead(&id));

        assert!(world.decree_death(id, 6, Utc::now()).is_err());
        assert_eq!(world.units().len(), units_before + 1);
    }

    #[test]
    fn test_rehydrate_tombstone_fails() {
        let mut world = world();
        let r = world.ingest(IngestRequest::new("c", "s", ["t"]), Utc::now()).unwrap();
        world.units.tombstone(&r.id).unwrap();
        assert!(matches!(
            world.rehydrate(&r.id),
            Err(StrataError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_protect_requires_existing_unit() {
        let mut world = world();
        assert!(world.protect(UnitId::new()).is_err());

        let r = world.ingest(IngestRequest::new("c", "s", ["t"]), Utc::now()).unwrap();
        assert!(world.protect(r.id).unwrap());
        assert!(!world.protect(r.id).unwrap());
        assert!(world.unprotect(&r.id));
    }

    #[tokio::test]
    async fn test_behaviors_run_and_cost_energy() {
        let mut world = world();
        let id = world.spawn_entity(Some("archivist"), 0).unwrap();
        let mut active = 0;

        for _ in 0..20 {
            if let Some(behavior) = world.entity_behave(id, Utc::now()).await.unwrap() {
                if behavior.is_active() {
                    active += 1;
                }
            }
            world.entity_sleep_cycle(id, Utc::now()).unwrap();
        }

        let entity = world.population().get(&id).unwrap();
        assert!(entity.telomere < 600);
        assert!(active > 0);
    }

    #[test]
    fn test_population_floor() {
        let mut world = world();
        let born = world.enforce_population_floor(0).unwrap();
        assert_eq!(born, world.config().lifecycle.min_population);
        assert_eq!(world.enforce_population_floor(1).unwrap(), 0);
    }

    #[test]
    fn test_reproduction_pairs_same_species() {
        let mut world = world();
        let a = world.spawn_entity(Some("archivist"), 0).unwrap();
        let b = world.spawn_entity(Some("archivist"), 0).unwrap();
        let c = world.spawn_entity(Some("tinkerer"), 0).unwrap();
        for id in [a, b, c] {
            world.population.get_mut(&id).unwrap().stage = LifecycleStage::Reproducing;
        }
        let energy_before = world.ledger().balance(a, ResourceKind::Energy).unwrap();
        let supply_before = world.ledger().supply();

        let born = world.reproduce(10).unwrap();

        assert_eq!(born, 1);
        assert_eq!(world.population().len(), 4);
        let cost = world.config().lifecycle.reproduction_cost;
        assert_eq!(
            world.ledger().balance(a, ResourceKind::Energy).unwrap(),
            energy_before - cost
        );
        assert_eq!(
            world.population().get(&a).unwrap().stage,
            LifecycleStage::Growing
        );
        assert_eq!(
            world.population().get(&c).unwrap().stage,
            LifecycleStage::Reproducing
        );
        assert_eq!(world.ledger().supply(), supply_before);
    }
}
