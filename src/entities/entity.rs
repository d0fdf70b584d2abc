//! Entity state: body, temperament, lifecycle stage
//!
//! An entity's species is fixed at birth. Organ maturity and wear only move
//! within `[0, 1]`, and the telomere only counts down.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, UnitId};

/// Organ slots in a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganKind {
    Sensory,
    Cortex,
    Memory,
    Voice,
    Motor,
    Heart,
}

impl OrganKind {
    pub const ALL: [OrganKind; 6] = [
        OrganKind::Sensory,
        OrganKind::Cortex,
        OrganKind::Memory,
        OrganKind::Voice,
        OrganKind::Motor,
        OrganKind::Heart,
    ];

    fn index(&self) -> usize {
        match self {
            OrganKind::Sensory => 0,
            OrganKind::Cortex => 1,
            OrganKind::Memory => 2,
            OrganKind::Voice => 3,
            OrganKind::Motor => 4,
            OrganKind::Heart => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Organ {
    pub kind: OrganKind,
    pub maturity: f32,
    pub wear: f32,
    /// How fast the organ matures with use
    pub plasticity: f32,
}

/// Fixed set of organs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    organs: [Organ; 6],
}

impl Body {
    /// Newborn body: every organ at maturity 0 and no wear
    pub fn newborn(plasticity: f32) -> Self {
        let plasticity = plasticity.clamp(0.0, 1.0);
        Self {
            organs: OrganKind::ALL.map(|kind| Organ {
                kind,
                maturity: 0.0,
                wear: 0.0,
                plasticity,
            }),
        }
    }

    pub fn organ(&self, kind: OrganKind) -> &Organ {
        &self.organs[kind.index()]
    }

    pub fn organs(&self) -> &[Organ] {
        &self.organs
    }

    /// Use an organ: maturity grows by `growth × plasticity`, wear by `wear`
    pub fn exercise(&mut self, kind: OrganKind, growth: f32, wear: f32) {
        let organ = &mut self.organs[kind.index()];
        organ.maturity = (organ.maturity + growth * organ.plasticity).clamp(0.0, 1.0);
        organ.wear = (organ.wear + wear).clamp(0.0, 1.0);
    }

    /// Age every organ a little
    pub fn wear_all(&mut self, wear: f32) {
        for organ in &mut self.organs {
            organ.wear = (organ.wear + wear).clamp(0.0, 1.0);
        }
    }

    /// Sleep-time repair
    pub fn repair_all(&mut self, amount: f32) {
        for organ in &mut self.organs {
            organ.wear = (organ.wear - amount).clamp(0.0, 1.0);
        }
    }

    pub fn mean_maturity(&self) -> f32 {
        self.organs.iter().map(|o| o.maturity).sum::<f32>() / self.organs.len() as f32
    }

    /// Mean organ health, `1 − wear`
    pub fn homeostasis(&self) -> f32 {
        self.organs.iter().map(|o| 1.0 - o.wear).sum::<f32>() / self.organs.len() as f32
    }
}

/// Heritable behavior tendencies, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperament {
    pub curiosity: f32,
    pub sociability: f32,
    pub diligence: f32,
    pub resilience: f32,
}

impl Temperament {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self {
            curiosity: rng.gen_range(0.2..=0.9),
            sociability: rng.gen_range(0.2..=0.9),
            diligence: rng.gen_range(0.2..=0.9),
            resilience: rng.gen_range(0.2..=0.9),
        }
    }

    /// Average of two parents plus a mutation in `[-mutation, mutation]`
    pub fn inherit<R: Rng>(a: &Temperament, b: &Temperament, mutation: f32, rng: &mut R) -> Self {
        let mut mix = |x: f32, y: f32| {
            let delta = if mutation > 0.0 {
                rng.gen_range(-mutation..=mutation)
            } else {
                0.0
            };
            ((x + y) / 2.0 + delta).clamp(0.0, 1.0)
        };
        Self {
            curiosity: mix(a.curiosity, b.curiosity),
            sociability: mix(a.sociability, b.sociability),
            diligence: mix(a.diligence, b.diligence),
            resilience: mix(a.resilience, b.resilience),
        }
    }
}

/// What an entity does with a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Explore,
    Study,
    Create,
    Socialize,
    Rest,
}

impl Behavior {
    pub const ALL: [Behavior; 5] = [
        Behavior::Explore,
        Behavior::Study,
        Behavior::Create,
        Behavior::Socialize,
        Behavior::Rest,
    ];

    /// Organs exercised by this behavior
    pub fn organs(&self) -> &'static [OrganKind] {
        match self {
            Behavior::Explore => &[OrganKind::Sensory, OrganKind::Motor],
            Behavior::Study => &[OrganKind::Cortex, OrganKind::Memory],
            Behavior::Create => &[OrganKind::Cortex, OrganKind::Motor],
            Behavior::Socialize => &[OrganKind::Voice, OrganKind::Heart],
            Behavior::Rest => &[],
        }
    }

    /// Whether the behavior costs energy
    pub fn is_active(&self) -> bool {
        !matches!(self, Behavior::Rest)
    }
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Behavior::Explore => "explore",
            Behavior::Study => "study",
            Behavior::Create => "create",
            Behavior::Socialize => "socialize",
            Behavior::Rest => "rest",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Born,
    Growing,
    Reproducing,
    Dying,
    Dead,
}

impl LifecycleStage {
    pub fn is_alive(&self) -> bool {
        !matches!(self, LifecycleStage::Dying | LifecycleStage::Dead)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wakefulness {
    Awake,
    Asleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    TelomereExhausted,
    HomeostasisCollapse,
    Decree,
}

/// A simulated entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    species: String,
    pub generation: u32,
    pub parents: Option<(EntityId, EntityId)>,
    pub born_at_tick: u64,
    pub body: Body,
    pub temperament: Temperament,
    pub telomere: u32,
    pub fatigue: f32,
    pub wakefulness: Wakefulness,
    pub stage: LifecycleStage,
    pub last_behavior: Option<Behavior>,
    pub last_reproduced_tick: Option<u64>,
    /// Units produced over a lifetime
    pub contributions: Vec<UnitId>,
}

impl Entity {
    pub fn new(species: impl Into<String>, telomere: u32, temperament: Temperament, tick: u64) -> Self {
        Self {
            id: EntityId::new(),
            species: species.into(),
            generation: 0,
            parents: None,
            born_at_tick: tick,
            body: Body::newborn(0.5 + temperament.resilience / 2.0),
            temperament,
            telomere,
            fatigue: 0.0,
            wakefulness: Wakefulness::Awake,
            stage: LifecycleStage::Born,
            last_behavior: None,
            last_reproduced_tick: None,
            contributions: Vec::new(),
        }
    }

    /// Species assigned at birth
    pub fn species(&self) -> &str {
        &self.species
    }

    pub fn is_alive(&self) -> bool {
        self.stage.is_alive()
    }

    pub fn is_asleep(&self) -> bool {
        self.wakefulness == Wakefulness::Asleep
    }

    pub fn short_id(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }
}
