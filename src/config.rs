// Strata Configuration
//
// Defines every tunable of the simulation: heartbeat cadence, unit budgets,
// consolidation bands, forgetting thresholds, ledger policies, lifecycle
// parameters and the brain boundary. Loaded from TOML; invalid values are
// fatal at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::types::ResourceKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Seed for the simulation RNG; `None` seeds from entropy
    pub seed: Option<u64>,

    pub heartbeat: HeartbeatConfig,
    pub units: UnitsConfig,
    pub consolidation: ConsolidationConfig,
    pub forgetting: ForgettingConfig,
    pub ledger: LedgerConfig,
    pub lifecycle: LifecycleConfig,
    pub brain: BrainConfig,
    pub archive: ArchiveConfig,
}

/// Tick scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Wall-clock interval between ticks (milliseconds)
    #[serde(with = "serde_duration_millis")]
    pub interval: Duration,

    /// Time slot granted to a single task invocation (milliseconds).
    /// Defaults to the tick interval when absent.
    #[serde(default, with = "serde_opt_duration_millis")]
    pub task_budget: Option<Duration>,

    /// Run the consolidation pass every N ticks
    pub consolidation_every: u64,

    /// Run the forgetting pass every N ticks
    pub forgetting_every: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            task_budget: None,
            consolidation_every: 4,
            forgetting_every: 8,
        }
    }
}

impl HeartbeatConfig {
    /// Effective per-task slot
    pub fn task_slot(&self) -> Duration {
        self.task_budget.unwrap_or(self.interval)
    }
}

/// Unit store budgets and salience dynamics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    /// Ceiling on in-heap units
    pub max_in_heap: usize,

    /// Fraction of the ceiling at which passes run regardless of cadence
    pub pressure_ratio: f32,

    /// Salience assigned at ingestion
    pub initial_salience: f32,

    /// Salience half-life (seconds)
    #[serde(with = "serde_duration_secs")]
    pub salience_half_life: Duration,

    /// Additive salience boost on access
    pub touch_boost: f32,

    /// Maximum units waiting for heap space
    pub backlog_limit: usize,

    /// Run salience decay every N ticks
    pub decay_every: u64,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            max_in_heap: 100_000,
            pressure_ratio: 0.9,
            initial_salience: 0.6,
            salience_half_life: Duration::from_secs(6 * 3600),
            touch_boost: 0.15,
            backlog_limit: 10_000,
            decay_every: 4,
        }
    }
}

/// Inclusive member-count band for one consolidation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub min: usize,
    pub max: usize,
}

impl Band {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

/// Similarity scorer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    /// Jaccard overlap of tag sets
    #[default]
    TagOverlap,

    /// Weighted tags, summary tokens and salience proximity
    Composite,
}

/// Cluster detection and consolidation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Regular units per aggregate
    pub aggregate_band: Band,

    /// Aggregates per meta-aggregate
    pub meta_band: Band,

    /// Minimum salience for a unit to seed a cluster
    pub seed_threshold: f32,

    /// Minimum similarity for a unit to join a seed's cluster
    pub link_threshold: f32,

    /// Maximum units considered per detection run
    pub batch_size: usize,

    /// Candidate pools larger than this are scored on a blocking worker
    pub offload_threshold: usize,

    /// Tags carried onto an aggregate
    pub max_tags: usize,

    pub scorer: ScorerKind,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            aggregate_band: Band::new(5, 20),
            meta_band: Band::new(3, 10),
            seed_threshold: 0.3,
            link_threshold: 0.5,
            batch_size: 2_000,
            offload_threshold: 1_000,
            max_tags: 12,
            scorer: ScorerKind::TagOverlap,
        }
    }
}

/// Forgetting (eviction) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgettingConfig {
    /// Units below this salience are forgetting candidates
    pub threshold: f32,

    /// How long a unit must sit untouched below threshold (seconds)
    #[serde(with = "serde_duration_secs")]
    pub after: Duration,
}

impl Default for ForgettingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            after: Duration::from_secs(3600),
        }
    }
}

/// Per-kind amounts, used for genesis pools and starting allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceAmounts {
    pub compute: u64,
    pub energy: u64,
    pub attention: u64,
    pub social_capital: u64,
    pub data: u64,
    pub innovation: u64,
    pub influence: u64,
    pub memory: u64,
}

impl ResourceAmounts {
    /// Same amount for every kind
    pub const fn uniform(amount: u64) -> Self {
        Self {
            compute: amount,
            energy: amount,
            attention: amount,
            social_capital: amount,
            data: amount,
            innovation: amount,
            influence: amount,
            memory: amount,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Compute => self.compute,
            ResourceKind::Energy => self.energy,
            ResourceKind::Attention => self.attention,
            ResourceKind::SocialCapital => self.social_capital,
            ResourceKind::Data => self.data,
            ResourceKind::Innovation => self.innovation,
            ResourceKind::Influence => self.influence,
            ResourceKind::Memory => self.memory,
        }
    }
}

/// What the inflation tax does with collected amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaxPolicy {
    /// Remove collected amounts from supply
    #[default]
    Burn,

    /// Return collected amounts to the platform pool
    Redistribute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UbiConfig {
    pub every: u64,
    pub kind: ResourceKind,
    pub amount: u64,
}

impl Default for UbiConfig {
    fn default() -> Self {
        Self {
            every: 40,
            kind: ResourceKind::Energy,
            amount: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InflationConfig {
    pub every: u64,
    /// Supply growth since the last check that triggers the tax (basis points)
    pub growth_threshold_bps: u64,
    /// Share of a taxed balance collected (basis points)
    pub tax_bps: u64,
    /// Accounts holding more than this share of total supply (pool included) are taxed (basis points)
    pub wealthy_share_bps: u64,
    pub policy: TaxPolicy,
}

impl Default for InflationConfig {
    fn default() -> Self {
        Self {
            every: 20,
            growth_threshold_bps: 500,
            tax_bps: 200,
            wealthy_share_bps: 1_000,
            policy: TaxPolicy::Burn,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WealthCapConfig {
    pub every: u64,
    /// Maximum share of total supply (pool included) one account may hold (basis points)
    pub cap_bps: u64,
    /// Share of the excess moved to other accounts (basis points)
    pub redistribute_bps: u64,
}

impl Default for WealthCapConfig {
    fn default() -> Self {
        Self {
            every: 20,
            cap_bps: 2_500,
            redistribute_bps: 5_000,
        }
    }
}

/// Resource ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Platform pool at genesis
    pub genesis_pool: ResourceAmounts,
    pub ubi: UbiConfig,
    pub inflation: InflationConfig,
    pub wealth_cap: WealthCapConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            genesis_pool: ResourceAmounts::uniform(1_000_000),
            ubi: UbiConfig::default(),
            inflation: InflationConfig::default(),
            wealth_cap: WealthCapConfig::default(),
        }
    }
}

/// One species definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,

    /// Lifespan in ticks
    pub telomere: u32,

    /// Account funding at birth, drawn from the platform pool
    pub starting_allocation: ResourceAmounts,

    /// Tags this species tends to write about
    pub topics: Vec<String>,
}

/// Entity lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub species: Vec<SpeciesConfig>,
    pub initial_population: usize,
    pub min_population: usize,
    pub max_population: usize,

    /// Telomere lost per behavior tick
    pub telomere_decrement: u32,

    pub fatigue_per_tick: f32,
    pub recovery_per_tick: f32,
    pub sleep_threshold: f32,
    pub wake_threshold: f32,

    /// Maturity gained per exercise, scaled by organ plasticity
    pub growth_per_action: f32,
    pub wear_per_action: f32,
    pub repair_per_sleep_tick: f32,

    /// Homeostasis below this kills the entity
    pub survival_threshold: f32,

    pub reproduction_maturity: f32,
    /// Energy debited from each parent
    pub reproduction_cost: u64,
    pub reproduction_every: u64,
    /// Maximum absolute trait drift in offspring
    pub mutation: f32,

    /// Energy debited per non-rest behavior
    pub behavior_cost: u64,
    /// Reward credited from the pool when a behavior produces a unit
    pub production_reward: u64,

    /// Own units reviewed when falling asleep
    pub review_limit: usize,

    /// Run the population floor task every N ticks
    pub population_every: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            species: vec![
                SpeciesConfig {
                    name: "archivist".to_string(),
                    telomere: 600,
                    starting_allocation: ResourceAmounts::uniform(100),
                    topics: vec![
                        "history".to_string(),
                        "lineage".to_string(),
                        "records".to_string(),
                        "taxonomy".to_string(),
                    ],
                },
                SpeciesConfig {
                    name: "tinkerer".to_string(),
                    telomere: 400,
                    starting_allocation: ResourceAmounts {
                        compute: 150,
                        energy: 150,
                        innovation: 120,
                        ..ResourceAmounts::uniform(60)
                    },
                    topics: vec![
                        "mechanism".to_string(),
                        "prototype".to_string(),
                        "materials".to_string(),
                        "energy".to_string(),
                    ],
                },
            ],
            initial_population: 8,
            min_population: 4,
            max_population: 64,
            telomere_decrement: 1,
            fatigue_per_tick: 0.08,
            recovery_per_tick: 0.2,
            sleep_threshold: 0.8,
            wake_threshold: 0.2,
            growth_per_action: 0.02,
            wear_per_action: 0.004,
            repair_per_sleep_tick: 0.002,
            survival_threshold: 0.2,
            reproduction_maturity: 0.6,
            reproduction_cost: 40,
            reproduction_every: 10,
            mutation: 0.1,
            behavior_cost: 1,
            production_reward: 2,
            review_limit: 5,
            population_every: 10,
        }
    }
}

/// Brain (LLM) boundary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// HTTP endpoint; when absent every synthesis falls back to the default
    pub endpoint: Option<String>,

    #[serde(with = "serde_duration_millis")]
    pub timeout: Duration,

    pub calls_per_hour: usize,
    pub calls_per_entity_per_hour: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_millis(1_500),
            calls_per_hour: 120,
            calls_per_entity_per_hour: 10,
        }
    }
}

/// Durable archive settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory for archived payloads; in-memory archive when absent
    pub dir: Option<PathBuf>,
}

// Durations as whole seconds
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Durations as milliseconds
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod serde_opt_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

impl StrataConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: StrataConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Default search locations, first existing wins
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|c| c.join("strata").join("config.toml")),
            dirs::home_dir().map(|h| h.join(".strata").join("config.toml")),
            Some(PathBuf::from("strata.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_heartbeat()?;
        self.validate_units()?;
        self.validate_consolidation()?;
        self.validate_forgetting()?;
        self.validate_ledger()?;
        self.validate_lifecycle()?;

        if self.brain.timeout.is_zero() {
            return invalid("brain.timeout must be greater than zero");
        }

        Ok(())
    }

    fn validate_heartbeat(&self) -> Result<(), ConfigError> {
        let hb = &self.heartbeat;
        if hb.interval.is_zero() {
            return invalid("heartbeat.interval must be greater than zero");
        }
        if hb.task_budget.is_some_and(|b| b.is_zero()) {
            return invalid("heartbeat.task_budget must be greater than zero");
        }
        check_frequency("heartbeat.consolidation_every", hb.consolidation_every)?;
        check_frequency("heartbeat.forgetting_every", hb.forgetting_every)
    }

    fn validate_units(&self) -> Result<(), ConfigError> {
        let units = &self.units;
        if units.max_in_heap == 0 {
            return invalid("units.max_in_heap must be at least 1");
        }
        if !(units.pressure_ratio > 0.0 && units.pressure_ratio <= 1.0) {
            return invalid("units.pressure_ratio must be in (0, 1]");
        }
        check_unit_interval("units.initial_salience", units.initial_salience)?;
        check_unit_interval("units.touch_boost", units.touch_boost)?;
        if units.salience_half_life.is_zero() {
            return invalid("units.salience_half_life must be greater than zero");
        }
        check_frequency("units.decay_every", units.decay_every)
    }

    fn validate_consolidation(&self) -> Result<(), ConfigError> {
        let c = &self.consolidation;
        check_band("consolidation.aggregate_band", c.aggregate_band)?;
        check_band("consolidation.meta_band", c.meta_band)?;
        check_unit_interval("consolidation.seed_threshold", c.seed_threshold)?;
        check_unit_interval("consolidation.link_threshold", c.link_threshold)?;
        if c.batch_size < c.aggregate_band.min {
            return invalid("consolidation.batch_size must be at least aggregate_band.min");
        }
        if c.max_tags == 0 {
            return invalid("consolidation.max_tags must be at least 1");
        }
        Ok(())
    }

    fn validate_forgetting(&self) -> Result<(), ConfigError> {
        check_unit_interval("forgetting.threshold", self.forgetting.threshold)?;
        if self.forgetting.threshold >= self.consolidation.seed_threshold
            && self.consolidation.seed_threshold > 0.0
        {
            tracing::warn!(
                "forgetting.threshold ({}) is not below consolidation.seed_threshold ({}); \
                 some units will be forgettable before they can seed a cluster",
                self.forgetting.threshold,
                self.consolidation.seed_threshold
            );
        }
        Ok(())
    }

    fn validate_ledger(&self) -> Result<(), ConfigError> {
        let l = &self.ledger;
        check_frequency("ledger.ubi.every", l.ubi.every)?;
        check_frequency("ledger.inflation.every", l.inflation.every)?;
        check_frequency("ledger.wealth_cap.every", l.wealth_cap.every)?;
        check_bps("ledger.inflation.growth_threshold_bps", l.inflation.growth_threshold_bps)?;
        check_bps("ledger.inflation.tax_bps", l.inflation.tax_bps)?;
        check_bps("ledger.inflation.wealthy_share_bps", l.inflation.wealthy_share_bps)?;
        check_bps("ledger.wealth_cap.cap_bps", l.wealth_cap.cap_bps)?;
        check_bps("ledger.wealth_cap.redistribute_bps", l.wealth_cap.redistribute_bps)?;
        if l.wealth_cap.cap_bps == 0 {
            return invalid("ledger.wealth_cap.cap_bps must be greater than zero");
        }
        Ok(())
    }

    fn validate_lifecycle(&self) -> Result<(), ConfigError> {
        let lc = &self.lifecycle;
        if lc.species.is_empty() {
            return invalid("lifecycle.species must define at least one species");
        }
        for species in &lc.species {
            if species.name.trim().is_empty() {
                return invalid("lifecycle.species names must not be empty");
            }
            if species.telomere == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "lifecycle.species.{}: telomere must be at least 1",
                    species.name
                )));
            }
        }
        if lc.min_population > lc.max_population {
            return invalid("lifecycle.min_population must not exceed max_population");
        }
        if lc.initial_population > lc.max_population {
            return invalid("lifecycle.initial_population must not exceed max_population");
        }
        for (name, value) in [
            ("lifecycle.fatigue_per_tick", lc.fatigue_per_tick),
            ("lifecycle.recovery_per_tick", lc.recovery_per_tick),
            ("lifecycle.sleep_threshold", lc.sleep_threshold),
            ("lifecycle.wake_threshold", lc.wake_threshold),
            ("lifecycle.growth_per_action", lc.growth_per_action),
            ("lifecycle.wear_per_action", lc.wear_per_action),
            ("lifecycle.repair_per_sleep_tick", lc.repair_per_sleep_tick),
            ("lifecycle.survival_threshold", lc.survival_threshold),
            ("lifecycle.reproduction_maturity", lc.reproduction_maturity),
            ("lifecycle.mutation", lc.mutation),
        ] {
            check_unit_interval(name, value)?;
        }
        if lc.wake_threshold >= lc.sleep_threshold {
            return invalid("lifecycle.wake_threshold must be below sleep_threshold");
        }
        check_frequency("lifecycle.reproduction_every", lc.reproduction_every)?;
        check_frequency("lifecycle.population_every", lc.population_every)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = self.to_toml()?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Render configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(msg.to_string()))
}

fn check_frequency(name: &str, every: u64) -> Result<(), ConfigError> {
    if every == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}: frequency must be at least 1",
            name
        )));
    }
    Ok(())
}

fn check_unit_interval(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ValidationError(format!(
            "{}: must be between 0 and 1",
            name
        )));
    }
    Ok(())
}

fn check_bps(name: &str, value: u64) -> Result<(), ConfigError> {
    if value > 10_000 {
        return Err(ConfigError::ValidationError(format!(
            "{}: basis points must not exceed 10000",
            name
        )));
    }
    Ok(())
}

fn check_band(name: &str, band: Band) -> Result<(), ConfigError> {
    if band.min < 2 {
        return Err(ConfigError::ValidationError(format!(
            "{}: min must be at least 2",
            name
        )));
    }
    if band.min > band.max {
        return Err(ConfigError::ValidationError(format!(
            "{}: min must not exceed max",
            name
        )));
    }
    Ok(())
}
