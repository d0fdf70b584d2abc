// Aggregate synthesis
//
// Builds the payload of a new aggregate from its members. The summary comes
// from the brain when it answers in time; otherwise a deterministic summary
// is built from the most frequent member tags.

use std::collections::{BTreeMap, BTreeSet};

use crate::brain::BrainGateway;
use crate::types::Tier;
use crate::units::UnitPayload;

/// Member summaries quoted in the prompt and kept in the aggregate content
const MAX_QUOTED_SUMMARIES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub payload: UnitPayload,
    pub used_brain: bool,
}

/// Most frequent tags across members, ties broken alphabetically
pub fn top_tags(members: &[&UnitPayload], max: usize) -> BTreeSet<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for payload in members {
        for tag in &payload.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(max)
        .map(|(tag, _)| tag.to_string())
        .collect()
}

/// Summary used when the brain is unavailable
pub fn fallback_summary(tags: &BTreeSet<String>, member_count: usize, tier: Tier) -> String {
    if tags.is_empty() {
        return format!("{} of {} units", tier, member_count);
    }
    let joined: Vec<&str> = tags.iter().map(|t| t.as_str()).collect();
    format!("{} of {} units: {}", tier, member_count, joined.join(", "))
}

fn build_prompt(members: &[&UnitPayload], tags: &BTreeSet<String>, tier: Tier) -> String {
    let quoted: Vec<String> = members
        .iter()
        .take(MAX_QUOTED_SUMMARIES)
        .map(|p| format!("- {}", p.summary))
        .collect();
    let tag_list: Vec<&str> = tags.iter().map(|t| t.as_str()).collect();

    format!(
        "Write one sentence summarizing these {} related notes as a single {}.\n\
         Shared tags: {}\n\
         Notes:\n{}\n",
        members.len(),
        tier,
        tag_list.join(", "),
        quoted.join("\n")
    )
}

fn aggregate_content(members: &[&UnitPayload]) -> String {
    let mut lines: Vec<String> = members
        .iter()
        .take(MAX_QUOTED_SUMMARIES)
        .map(|p| format!("- {}", p.summary))
        .collect();
    if members.len() > MAX_QUOTED_SUMMARIES {
        lines.push(format!("- (+{} more)", members.len() - MAX_QUOTED_SUMMARIES));
    }
    lines.join("\n")
}

/// Synthesize the payload of an aggregate of `tier` from member payloads
pub async fn synthesize(
    gateway: &BrainGateway,
    members: &[&UnitPayload],
    tier: Tier,
    max_tags: usize,
) -> Synthesis {
    let tags = top_tags(members, max_tags);
    let prompt = build_prompt(members, &tags, tier);

    let (summary, used_brain) = match gateway.generate(None, &prompt).await {
        Ok(text) => (text, true),
        Err(e) => {
            tracing::debug!("Falling back to tag summary: {}", e);
            (fallback_summary(&tags, members.len(), tier), false)
        }
    };

    Synthesis {
        payload: UnitPayload::new(aggregate_content(members), summary, tags),
        used_brain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrainConfig;

    fn payload(summary: &str, tags: &[&str]) -> UnitPayload {
        UnitPayload::new("", summary, tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_top_tags_by_frequency() {
        let a = payload("a", &["sea", "tide", "moon"]);
        let b = payload("b", &["sea", "tide"]);
        let c = payload("c", &["sea", "boat"]);

        let tags = top_tags(&[&a, &b, &c], 2);
        let expected: BTreeSet<String> = ["sea", "tide"].iter().map(|t| t.to_string()).collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_fallback_summary_lists_tags() {
        let tags: BTreeSet<String> = ["sea", "tide"].iter().map(|t| t.to_string()).collect();
        assert_eq!(
            fallback_summary(&tags, 5, Tier::Aggregate),
            "aggregate of 5 units: sea, tide"
        );
    }

    #[tokio::test]
    async fn test_synthesize_falls_back_when_offline() {
        let gateway = BrainGateway::offline(&BrainConfig::default());
        let a = payload("first", &["sea"]);
        let b = payload("second", &["sea"]);

        let out = synthesize(&gateway, &[&a, &b], Tier::Aggregate, 4).await;
        assert!(!out.used_brain);
        assert_eq!(out.payload.summary, "aggregate of 2 units: sea");
        assert!(out.payload.content.contains("- first"));
        assert!(out.payload.tags.contains("sea"));
    }
}
