//! Common test utilities and helpers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mockall::mock;
use std::sync::Arc;
use strata_core::archive::InMemoryArchive;
use strata_core::brain::{Brain, BrainError, BrainGateway};
use strata_core::{IngestRequest, StrataConfig, UnitId, World};

mock! {
    pub Brain {}

    #[async_trait]
    impl Brain for Brain {
        async fn generate(&self, prompt: &str) -> Result<String, BrainError>;
    }
}

/// Deterministic config with no initial population
pub fn test_config() -> StrataConfig {
    let mut config = StrataConfig::default();
    config.seed = Some(7);
    config.lifecycle.initial_population = 0;
    config.lifecycle.min_population = 0;
    config.heartbeat.interval = std::time::Duration::from_millis(10);
    config
}

pub fn test_world(config: StrataConfig) -> World {
    World::ephemeral(config).expect("Failed to build test world")
}

/// World whose consolidation synthesis goes through `brain`
pub fn world_with_brain(config: StrataConfig, brain: impl Brain + 'static) -> World {
    let gateway = BrainGateway::new(Arc::new(brain), &config.brain);
    World::new(config, Arc::new(InMemoryArchive::new()), Arc::new(gateway))
        .expect("Failed to build test world")
}

/// Ingest `count` ownerless units sharing `tags` at time `at`
pub fn seed_units(world: &mut World, count: usize, tags: &[&str], salience: f32, at: DateTime<Utc>) -> Vec<UnitId> {
    (0..count)
        .map(|i| {
            let request = IngestRequest::new(
                format!("note {} on {}", i, tags.join(" ")),
                format!("note {}", i),
                tags.iter().copied(),
            )
            .with_salience(salience);
            world.ingest(request, at).expect("Failed to ingest test unit").id
        })
        .collect()
}

/// A point far enough in the past to be past every default forgetting window
pub fn long_ago() -> DateTime<Utc> {
    Utc::now() - Duration::hours(6)
}
