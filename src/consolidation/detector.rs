// Cluster detector
//
// Greedy seed/member assignment over scored pairs:
// 1. Score every pair in the batch; keep links at or above the link threshold.
//    A link can be used in the direction seed → member only when the seed's
//    salience reaches the seed threshold.
// 2. Walk links by similarity (highest first), then seed creation time, then
//    member creation time (earliest first). Attach the member to the seed's
//    cluster unless either side is already taken or the cluster is full.
// 3. Clusters smaller than the band minimum are dissolved and their seeds
//    barred; repeat until no cluster is dissolved.
//
// Every unit lands in at most one cluster, and every returned cluster is
// within the band for its level.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use super::scorer::{scorer_for, SimilarityScorer, UnitView};
use crate::config::{Band, ConsolidationConfig};
use crate::types::{Tier, UnitId};

/// Which units a detection run looked at, and which of those fit a cluster
///
/// Units outside the examined set say nothing about clusterability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// None when every unit counts as examined
    examined: Option<HashSet<UnitId>>,
    placed: HashSet<UnitId>,
}

impl Placement {
    pub fn new(examined: HashSet<UnitId>, placed: HashSet<UnitId>) -> Self {
        Self {
            examined: Some(examined),
            placed,
        }
    }

    /// Every unit examined, none placed
    pub fn unplaceable() -> Self {
        Self::placed_only(HashSet::new())
    }

    /// Every unit examined, `placed` fit a cluster
    pub fn placed_only(placed: HashSet<UnitId>) -> Self {
        Self { examined: None, placed }
    }

    pub fn was_examined(&self, id: &UnitId) -> bool {
        self.examined.as_ref().map_or(true, |e| e.contains(id))
    }

    pub fn is_placed(&self, id: &UnitId) -> bool {
        self.placed.contains(id)
    }
}

/// A proposed consolidation
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCandidate {
    pub members: BTreeSet<UnitId>,
    pub source_tier: Tier,
    pub proposed_tier: Tier,
    /// Mean seed/member similarity
    pub cohesion: f32,
}

impl ClusterCandidate {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    seed: usize,
    member: usize,
    similarity: f32,
}

#[derive(Clone)]
pub struct ClusterDetector {
    scorer: Arc<dyn SimilarityScorer>,
    config: ConsolidationConfig,
}

impl std::fmt::Debug for ClusterDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDetector")
            .field("scorer", &self.scorer.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ClusterDetector {
    pub fn new(config: ConsolidationConfig) -> Self {
        let scorer: Arc<dyn SimilarityScorer> = Arc::from(scorer_for(config.scorer));
        Self { scorer, config }
    }

    pub fn with_scorer(config: ConsolidationConfig, scorer: Arc<dyn SimilarityScorer>) -> Self {
        Self { scorer, config }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Member-count band for consolidating units of `tier`
    pub fn band_for(&self, tier: Tier) -> Option<Band> {
        match tier {
            Tier::Regular => Some(self.config.aggregate_band),
            Tier::Aggregate => Some(self.config.meta_band),
            Tier::MetaAggregate | Tier::Tombstone => None,
        }
    }

    /// The views of `tier` a detection run considers: at most `batch_size`,
    /// oldest first
    fn batch<'a>(&self, views: &'a [UnitView], tier: Tier) -> Vec<&'a UnitView> {
        let mut pool: Vec<&UnitView> = views.iter().filter(|v| v.tier == tier).collect();
        pool.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pool.truncate(self.config.batch_size);
        pool
    }

    /// Run detection and report which views it examined and placed
    pub fn placement(&self, views: &[UnitView], tier: Tier) -> Placement {
        let examined = self.batch(views, tier).into_iter().map(|v| v.id).collect();
        let placed = self
            .detect(views, tier)
            .into_iter()
            .flat_map(|c| c.members.into_iter())
            .collect();
        Placement::new(examined, placed)
    }

    /// Propose disjoint, in-band clusters among `views` of `tier`
    ///
    /// Views of other tiers are ignored. At most `batch_size` views are
    /// considered, oldest first.
    pub fn detect(&self, views: &[UnitView], tier: Tier) -> Vec<ClusterCandidate> {
        let (Some(band), Some(proposed)) = (self.band_for(tier), tier.next()) else {
            return Vec::new();
        };

        let pool = self.batch(views, tier);

        if pool.len() < band.min {
            return Vec::new();
        }

        let links = self.score_links(&pool);
        let mut barred: HashSet<usize> = HashSet::new();

        let clusters = loop {
            let clusters = assign(&links, &barred, band.max);
            let undersized: Vec<usize> = clusters
                .iter()
                .filter(|(_, members)| members.len() < band.min)
                .map(|(seed, _)| *seed)
                .collect();

            if undersized.is_empty() {
                break clusters;
            }
            barred.extend(undersized);
        };

        let candidates: Vec<ClusterCandidate> = clusters
            .into_iter()
            .map(|(_, members)| {
                let cohesion = if members.len() > 1 {
                    members.iter().skip(1).map(|(_, s)| *s).sum::<f32>() / (members.len() - 1) as f32
                } else {
                    0.0
                };
                ClusterCandidate {
                    members: members.iter().map(|(i, _)| pool[*i].id).collect(),
                    source_tier: tier,
                    proposed_tier: proposed,
                    cohesion,
                }
            })
            .collect();

        tracing::debug!(
            "Detector ({}) proposed {} {} candidates from {} units",
            self.scorer.name(),
            candidates.len(),
            proposed,
            pool.len()
        );
        candidates
    }

    fn score_links(&self, pool: &[&UnitView]) -> Vec<Link> {
        let seed_ok = |v: &UnitView| v.salience >= self.config.seed_threshold;
        let mut links = Vec::new();

        for i in 0..pool.len() {
            for j in (i + 1)..pool.len() {
                let similarity = self.scorer.score(pool[i], pool[j]);
                if similarity < self.config.link_threshold {
                    continue;
                }
                if seed_ok(pool[i]) {
                    links.push(Link {
                        seed: i,
                        member: j,
                        similarity,
                    });
                }
                if seed_ok(pool[j]) {
                    links.push(Link {
                        seed: j,
                        member: i,
                        similarity,
                    });
                }
            }
        }

        // Pool is sorted by creation time, so index order is creation order
        links.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.seed.cmp(&b.seed))
                .then(a.member.cmp(&b.member))
        });
        links
    }
}

/// One greedy assignment round. Returns seed index → [(index, similarity)],
/// seed first with similarity 1.
fn assign(links: &[Link], barred: &HashSet<usize>, max: usize) -> BTreeMap<usize, Vec<(usize, f32)>> {
    let mut clusters: BTreeMap<usize, Vec<(usize, f32)>> = BTreeMap::new();
    let mut taken: HashSet<usize> = HashSet::new();

    for link in links {
        if barred.contains(&link.seed) || taken.contains(&link.member) {
            continue;
        }

        let is_seed = clusters.contains_key(&link.seed);
        if !is_seed && taken.contains(&link.seed) {
            // Seed already absorbed into another cluster
            continue;
        }

        let cluster = clusters
            .entry(link.seed)
            .or_insert_with(|| vec![(link.seed, 1.0)]);
        if cluster.len() >= max {
            continue;
        }
        cluster.push((link.member, link.similarity));
        taken.insert(link.seed);
        taken.insert(link.member);
    }

    clusters
}
