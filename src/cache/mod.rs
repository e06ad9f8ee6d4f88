//! Verification cache: answers a flow from earlier verdicts when it can.
//!
//! Four tiers, consulted in order:
//! 1. `per_group`: a verdict for the same (source, sink) signature.
//! 2. `per_result`: a verdict for any flow of the same alarm.
//! 3. `false_positive_source`: the source context was declared a false positive.
//! 4. `false_positive_sink`: the sink context was declared a false positive.
//!
//! The alarm-level tier trades precision for fewer oracle calls: flows of one
//! alarm may reach the sink through different functions yet share a verdict.

pub mod store;

use crate::domain::{FlowKey, GroupSignature, Outcome, Verdict};
use std::collections::{BTreeMap, HashMap};

pub use crate::domain::CacheTier;

const SOURCE_FP_EXPLANATION: &str =
    "[Caching] Source is marked false positive by an earlier verdict";
const SINK_FP_EXPLANATION: &str = "[Caching] Sink is marked false positive by an earlier verdict";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub tier: CacheTier,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default)]
pub struct VerificationCache {
    per_result: BTreeMap<FlowKey, Outcome>,
    per_group: HashMap<GroupSignature, Outcome>,
    false_positive_source: HashMap<String, bool>,
    false_positive_sink: HashMap<String, bool>,
}

impl VerificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// First tier holding a usable verdict. Failed outcomes never answer.
    pub fn lookup(&self, key: FlowKey, signature: &GroupSignature) -> Option<CacheHit> {
        if let Some(verdict) = self.per_group.get(signature).and_then(Outcome::verdict) {
            return Some(CacheHit { tier: CacheTier::Group, verdict: verdict.clone() });
        }
        if let Some(verdict) = self.alarm_verdict(key.result_id) {
            return Some(CacheHit { tier: CacheTier::Result, verdict: verdict.clone() });
        }
        if self.is_source_false_positive(&signature.source) {
            return Some(CacheHit {
                tier: CacheTier::FalsePositiveSource,
                verdict: Verdict {
                    is_vulnerable: false,
                    source_is_false_positive: Some(true),
                    sink_is_false_positive: self.false_positive_sink.get(&signature.sink).copied(),
                    explanation: SOURCE_FP_EXPLANATION.to_string(),
                },
            });
        }
        if self.is_sink_false_positive(&signature.sink) {
            return Some(CacheHit {
                tier: CacheTier::FalsePositiveSink,
                verdict: Verdict {
                    is_vulnerable: false,
                    source_is_false_positive: self
                        .false_positive_source
                        .get(&signature.source)
                        .copied(),
                    sink_is_false_positive: Some(true),
                    explanation: SINK_FP_EXPLANATION.to_string(),
                },
            });
        }
        None
    }

    /// Write-through after a flow is resolved, from the cache or the oracle.
    ///
    /// A failure is kept for completeness but never replaces a verdict and
    /// never marks an endpoint.
    pub fn record(&mut self, key: FlowKey, signature: &GroupSignature, outcome: &Outcome) {
        store_outcome(self.per_result.entry(key).or_insert_with(|| Outcome::Failed), outcome);
        store_outcome(
            self.per_group.entry(signature.clone()).or_insert_with(|| Outcome::Failed),
            outcome,
        );

        if let Some(verdict) = outcome.verdict() {
            if verdict.declares_source_false_positive() {
                self.false_positive_source.insert(signature.source.clone(), true);
            }
            if verdict.declares_sink_false_positive() {
                self.false_positive_sink.insert(signature.sink.clone(), true);
            }
        }
    }

    fn alarm_verdict(&self, result_id: usize) -> Option<&Verdict> {
        self.per_result
            .range(FlowKey::new(result_id, 0)..=FlowKey::new(result_id, usize::MAX))
            .find_map(|(_, outcome)| outcome.verdict())
    }

    pub fn is_source_false_positive(&self, context: &str) -> bool {
        self.false_positive_source.get(context).copied().unwrap_or(false)
    }

    pub fn is_sink_false_positive(&self, context: &str) -> bool {
        self.false_positive_sink.get(context).copied().unwrap_or(false)
    }

    pub fn result_outcome(&self, key: FlowKey) -> Option<&Outcome> {
        self.per_result.get(&key)
    }

    pub fn group_outcome(&self, signature: &GroupSignature) -> Option<&Outcome> {
        self.per_group.get(signature)
    }

    pub fn per_result(&self) -> impl Iterator<Item = (&FlowKey, &Outcome)> {
        self.per_result.iter()
    }

    pub fn per_group(&self) -> impl Iterator<Item = (&GroupSignature, &Outcome)> {
        self.per_group.iter()
    }

    pub fn false_positive_sources(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.false_positive_source.iter()
    }

    pub fn false_positive_sinks(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.false_positive_sink.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.per_result.is_empty()
            && self.per_group.is_empty()
            && self.false_positive_source.is_empty()
            && self.false_positive_sink.is_empty()
    }

    pub(crate) fn insert_raw(
        &mut self,
        per_result: BTreeMap<FlowKey, Outcome>,
        per_group: HashMap<GroupSignature, Outcome>,
        false_positive_source: HashMap<String, bool>,
        false_positive_sink: HashMap<String, bool>,
    ) {
        self.per_result = per_result;
        self.per_group = per_group;
        self.false_positive_source = false_positive_source;
        self.false_positive_sink = false_positive_sink;
    }
}

fn store_outcome(slot: &mut Outcome, outcome: &Outcome) {
    if outcome.is_failure() && !slot.is_failure() {
        return;
    }
    *slot = outcome.clone();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(source: &str, sink: &str) -> GroupSignature {
        GroupSignature { source: source.to_string(), sink: sink.to_string() }
    }

    fn verdict(vulnerable: bool, source_fp: Option<bool>, sink_fp: Option<bool>) -> Outcome {
        Outcome::Verdict(Verdict {
            is_vulnerable: vulnerable,
            source_is_false_positive: source_fp,
            sink_is_false_positive: sink_fp,
            explanation: "oracle".to_string(),
        })
    }

    #[test]
    fn group_tier_wins() {
        let mut cache = VerificationCache::new();
        cache.record(FlowKey::new(0, 0), &sig("a", "b"), &verdict(true, Some(false), Some(false)));
        let hit = cache.lookup(FlowKey::new(5, 0), &sig("a", "b")).expect("hit");
        assert_eq!(hit.tier, CacheTier::Group);
        assert!(hit.verdict.is_vulnerable);
    }

    #[test]
    fn alarm_tier_covers_sibling_flows() {
        let mut cache = VerificationCache::new();
        cache.record(FlowKey::new(3, 0), &sig("a", "b"), &verdict(true, None, None));
        let hit = cache.lookup(FlowKey::new(3, 4), &sig("c", "d")).expect("hit");
        assert_eq!(hit.tier, CacheTier::Result);
        assert!(cache.lookup(FlowKey::new(4, 0), &sig("c", "d")).is_none());
    }

    #[test]
    fn false_positive_tiers_synthesize_negatives() {
        let mut cache = VerificationCache::new();
        let source_fp = verdict(false, Some(true), Some(false));
        let sink_fp = verdict(false, Some(false), Some(true));
        cache.record(FlowKey::new(0, 0), &sig("src", "sink1"), &source_fp);
        cache.record(FlowKey::new(1, 0), &sig("src2", "sink2"), &sink_fp);

        let hit = cache.lookup(FlowKey::new(9, 0), &sig("src", "sink2")).expect("hit");
        assert_eq!(hit.tier, CacheTier::FalsePositiveSource);
        assert!(!hit.verdict.is_vulnerable);
        assert_eq!(hit.verdict.sink_is_false_positive, Some(true));
        assert!(hit.verdict.explanation.starts_with("[Caching] Source"));

        let hit = cache.lookup(FlowKey::new(9, 0), &sig("fresh", "sink2")).expect("hit");
        assert_eq!(hit.tier, CacheTier::FalsePositiveSink);
        assert_eq!(hit.verdict.source_is_false_positive, None);
    }

    #[test]
    fn false_positive_marks_are_monotone() {
        let mut cache = VerificationCache::new();
        cache.record(FlowKey::new(0, 0), &sig("src", "x"), &verdict(false, Some(true), None));
        cache.record(FlowKey::new(1, 0), &sig("src", "y"), &verdict(true, Some(false), None));
        cache.record(FlowKey::new(2, 0), &sig("src", "z"), &Outcome::Failed);
        assert!(cache.is_source_false_positive("src"));
    }

    #[test]
    fn failures_are_never_reused() {
        let mut cache = VerificationCache::new();
        cache.record(FlowKey::new(0, 0), &sig("a", "b"), &Outcome::Failed);
        assert_eq!(cache.result_outcome(FlowKey::new(0, 0)), Some(&Outcome::Failed));
        assert!(cache.lookup(FlowKey::new(0, 1), &sig("a", "b")).is_none());
        assert!(!cache.is_source_false_positive("a"));
    }

    #[test]
    fn failure_does_not_overwrite_a_verdict() {
        let mut cache = VerificationCache::new();
        cache.record(FlowKey::new(0, 0), &sig("a", "b"), &verdict(true, None, None));
        cache.record(FlowKey::new(0, 1), &sig("a", "b"), &Outcome::Failed);
        assert!(cache.group_outcome(&sig("a", "b")).is_some_and(Outcome::is_vulnerable));
    }
}
