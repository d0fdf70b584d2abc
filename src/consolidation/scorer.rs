// Similarity scoring
//
// Pluggable pairwise similarity in [0, 1] between unit snapshots:
// - TagOverlapScorer: Jaccard similarity of tag sets
// - CompositeScorer: weighted tags + summary tokens + salience proximity

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::config::ScorerKind;
use crate::types::{Tier, UnitId};
use crate::units::Unit;

/// Owned snapshot of the fields clustering looks at
///
/// Detection works on these rather than on the store, so a pass can move to a
/// worker thread without borrowing live state.
#[derive(Debug, Clone)]
pub struct UnitView {
    pub id: UnitId,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub salience: f32,
    pub tags: BTreeSet<String>,
    pub summary_tokens: BTreeSet<String>,
}

impl UnitView {
    pub fn from_unit(unit: &Unit) -> Self {
        Self {
            id: unit.id,
            tier: unit.tier,
            created_at: unit.created_at,
            salience: unit.salience,
            tags: unit.tags().map(|t| t.to_lowercase()).collect(),
            summary_tokens: unit.summary().map(tokenize).unwrap_or_default(),
        }
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard similarity of two sets; 0 when either is empty
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// Pairwise similarity strategy
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Symmetric similarity in `[0, 1]`
    fn score(&self, a: &UnitView, b: &UnitView) -> f32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TagOverlapScorer;

impl SimilarityScorer for TagOverlapScorer {
    fn name(&self) -> &str {
        "tag_overlap"
    }

    fn score(&self, a: &UnitView, b: &UnitView) -> f32 {
        jaccard(&a.tags, &b.tags)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompositeScorer {
    pub tag_weight: f32,
    pub text_weight: f32,
    pub salience_weight: f32,
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self {
            tag_weight: 0.6,
            text_weight: 0.3,
            salience_weight: 0.1,
        }
    }
}

impl SimilarityScorer for CompositeScorer {
    fn name(&self) -> &str {
        "composite"
    }

    fn score(&self, a: &UnitView, b: &UnitView) -> f32 {
        let total = self.tag_weight + self.text_weight + self.salience_weight;
        if total <= 0.0 {
            return 0.0;
        }
        let tags = jaccard(&a.tags, &b.tags);
        let text = jaccard(&a.summary_tokens, &b.summary_tokens);
        let proximity = 1.0 - (a.salience - b.salience).abs();

        ((self.tag_weight * tags + self.text_weight * text + self.salience_weight * proximity) / total)
            .clamp(0.0, 1.0)
    }
}

/// Build the configured scorer
pub fn scorer_for(kind: ScorerKind) -> Box<dyn SimilarityScorer> {
    match kind {
        ScorerKind::TagOverlap => Box::new(TagOverlapScorer),
        ScorerKind::Composite => Box::new(CompositeScorer::default()),
    }
}
