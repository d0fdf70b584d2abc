//! Simulated entities
//!
//! Components:
//! - entity: body, organs, temperament, behaviors and lifecycle stage
//! - lifecycle: the population registry and state transitions

pub mod entity;
pub mod lifecycle;

pub use entity::{
    Behavior, Body, DeathCause, Entity, LifecycleStage, Organ, OrganKind, Temperament, Wakefulness,
};
pub use lifecycle::{DeathRecord, LifecycleManager, Population, SleepTransition};
