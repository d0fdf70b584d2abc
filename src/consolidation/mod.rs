// Consolidation Module - tiered compression of related units
//
// Components:
// - scorer: pluggable pairwise similarity over unit snapshots
// - detector: band-respecting, disjoint cluster proposals
// - synthesis: aggregate payloads via the brain, with a tag fallback
// - engine: stale check and staged commit of one aggregate
// - pass: the per-pass queue, offloading and commit loop

pub mod detector;
pub mod engine;
pub mod pass;
pub mod scorer;
pub mod synthesis;

pub use detector::{ClusterCandidate, ClusterDetector, Placement};
pub use engine::{Consolidated, ConsolidationEngine, ConsolidationError};
pub use pass::{Consolidator, PassReport};
pub use scorer::{CompositeScorer, SimilarityScorer, TagOverlapScorer, UnitView};
