//! Batches oracle calls for flows the cache could not answer.

use crate::cache::VerificationCache;
use crate::domain::{FlowKey, GroupSignature, Outcome};
use crate::oracle::replay::response_file_name;
use crate::oracle::{ChatPrompt, Oracle};
use crate::verdict::{parse_verdict_with_strategy, Strategy};
use std::path::{Path, PathBuf};

pub const PROMPT_PREFIX: &str = "raw_user_prompt_";

pub fn prompt_file_name(id: &str) -> String {
    format!("{PROMPT_PREFIX}{id}.txt")
}

/// A flow waiting for the next batch. `index` is its position in the run.
#[derive(Debug, Clone)]
pub struct PendingFlow {
    pub index: usize,
    pub key: FlowKey,
    pub signature: GroupSignature,
    pub prompt: ChatPrompt,
}

#[derive(Debug, Clone)]
pub struct ResolvedFlow {
    pub index: usize,
    pub key: FlowKey,
    pub signature: GroupSignature,
    pub outcome: Outcome,
    pub strategy: Option<Strategy>,
}

pub struct BatchDispatcher<'o> {
    oracle: &'o dyn Oracle,
    batch_size: usize,
    concurrency: usize,
    log_dir: Option<PathBuf>,
    queue: Vec<PendingFlow>,
    batches_sent: usize,
}

impl<'o> BatchDispatcher<'o> {
    pub fn new(oracle: &'o dyn Oracle, batch_size: usize, concurrency: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            oracle,
            batch_size,
            concurrency: concurrency.max(1),
            log_dir: None,
            queue: Vec::with_capacity(batch_size),
            batches_sent: 0,
        }
    }

    /// Write prompts and raw completions under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn push(&mut self, pending: PendingFlow) {
        self.queue.push(pending);
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn batches_sent(&self) -> usize {
        self.batches_sent
    }

    /// Whether a queued flow will answer this one once the batch returns:
    /// same group signature, or same alarm.
    pub fn covers(&self, key: FlowKey, signature: &GroupSignature) -> bool {
        self.queue.iter().any(|p| p.key.result_id == key.result_id || p.signature == *signature)
    }

    /// Send the queued batch, parse every completion and write the outcomes
    /// through to `cache`. Results come back in queue order.
    pub fn flush(&mut self, cache: &mut VerificationCache) -> Vec<ResolvedFlow> {
        if self.queue.is_empty() {
            return Vec::new();
        }
        let batch = std::mem::take(&mut self.queue);
        self.batches_sent += 1;
        let prompts: Vec<ChatPrompt> = batch.iter().map(|p| p.prompt.clone()).collect();

        if let Some(dir) = &self.log_dir {
            for prompt in &prompts {
                write_log(dir, &prompt_file_name(&prompt.id), &prompt.user);
            }
        }

        tracing::debug!(
            "Batch {}: {} prompts to {}",
            self.batches_sent,
            prompts.len(),
            self.oracle.name()
        );
        let responses = match self.oracle.predict(&prompts, self.concurrency) {
            Ok(responses) if responses.len() == prompts.len() => responses,
            Ok(responses) => {
                tracing::warn!(
                    "Oracle returned {} responses for {} prompts; treating the batch as failed",
                    responses.len(),
                    prompts.len()
                );
                vec![String::new(); prompts.len()]
            }
            Err(err) => {
                tracing::warn!("Oracle batch failed: {err}");
                vec![String::new(); prompts.len()]
            }
        };

        let mut resolved = Vec::with_capacity(batch.len());
        for (pending, response) in batch.into_iter().zip(responses) {
            if let Some(dir) = &self.log_dir {
                write_log(dir, &response_file_name(&pending.prompt.id), &response);
            }
            let (outcome, strategy) = parse_verdict_with_strategy(&response);
            cache.record(pending.key, &pending.signature, &outcome);
            resolved.push(ResolvedFlow {
                index: pending.index,
                key: pending.key,
                signature: pending.signature,
                outcome,
                strategy,
            });
        }
        resolved
    }
}

pub fn write_log(dir: &Path, name: &str, content: &str) {
    if let Err(err) = std::fs::write(dir.join(name), content) {
        tracing::warn!("Could not write {}: {err}", dir.join(name).display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Scripted {
        reply: fn(&ChatPrompt) -> String,
        calls: AtomicUsize,
        fail: bool,
        short: bool,
    }

    impl Scripted {
        fn new(reply: fn(&ChatPrompt) -> String) -> Self {
            Self { reply, calls: AtomicUsize::new(0), fail: false, short: false }
        }
    }

    impl Oracle for Scripted {
        fn predict(
            &self,
            prompts: &[ChatPrompt],
            _concurrency: usize,
        ) -> Result<Vec<String>, OracleError> {
            self.calls.fetch_add(prompts.len(), Ordering::SeqCst);
            if self.fail {
                return Err(OracleError::BatchFailed("down".into()));
            }
            let mut out: Vec<String> = prompts.iter().map(self.reply).collect();
            if self.short {
                out.pop();
            }
            Ok(out)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn pending(index: usize, result_id: usize, source: &str) -> PendingFlow {
        let key = FlowKey::new(result_id, 0);
        PendingFlow {
            index,
            key,
            signature: GroupSignature { source: source.into(), sink: "sink".into() },
            prompt: ChatPrompt {
                id: key.to_string(),
                system: "sys".into(),
                user: format!("prompt {index}"),
            },
        }
    }

    fn vulnerable_if_even(prompt: &ChatPrompt) -> String {
        let index: usize = prompt.user.trim_start_matches("prompt ").parse().unwrap_or(1);
        format!("{{\"is_vulnerable\": {}, \"explanation\": \"e\"}}", index % 2 == 0)
    }

    #[test]
    fn flush_zips_results_by_position_and_writes_through() {
        let tmp = TempDir::new().expect("tmp");
        let oracle = Scripted::new(vulnerable_if_even);
        let mut dispatcher = BatchDispatcher::new(&oracle, 2, 2).with_log_dir(tmp.path());
        let mut cache = VerificationCache::new();

        dispatcher.push(pending(0, 0, "a"));
        assert!(!dispatcher.is_full());
        dispatcher.push(pending(1, 1, "b"));
        assert!(dispatcher.is_full());

        let resolved = dispatcher.flush(&mut cache);
        assert!(dispatcher.is_empty());
        assert_eq!(resolved.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(resolved[0].outcome.is_vulnerable());
        assert!(!resolved[1].outcome.is_vulnerable());
        assert_eq!(resolved[0].strategy, Some(Strategy::StrictJson));
        assert!(cache.result_outcome(FlowKey::new(1, 0)).is_some());

        assert!(tmp.path().join("raw_user_prompt_0_0.txt").is_file());
        let response =
            std::fs::read_to_string(tmp.path().join("raw_llm_response_1_0.txt")).expect("log");
        assert!(response.contains("false"));
        assert_eq!(dispatcher.batches_sent(), 1);
    }

    #[test]
    fn batch_errors_become_failures() {
        let mut oracle = Scripted::new(vulnerable_if_even);
        oracle.fail = true;
        let mut dispatcher = BatchDispatcher::new(&oracle, 3, 1);
        let mut cache = VerificationCache::new();
        dispatcher.push(pending(0, 0, "a"));
        dispatcher.push(pending(1, 1, "b"));
        let resolved = dispatcher.flush(&mut cache);
        assert!(resolved.iter().all(|r| r.outcome.is_failure()));
        let group = GroupSignature { source: "a".into(), sink: "sink".into() };
        assert!(cache.lookup(FlowKey::new(0, 1), &group).is_none());
    }

    #[test]
    fn short_response_lists_fail_the_whole_batch() {
        let mut oracle = Scripted::new(vulnerable_if_even);
        oracle.short = true;
        let mut dispatcher = BatchDispatcher::new(&oracle, 3, 1);
        let mut cache = VerificationCache::new();
        dispatcher.push(pending(0, 0, "a"));
        dispatcher.push(pending(2, 2, "c"));
        let resolved = dispatcher.flush(&mut cache);
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|r| r.outcome.is_failure()));
    }

    #[test]
    fn covers_pending_groups_and_alarms() {
        let oracle = Scripted::new(vulnerable_if_even);
        let mut dispatcher = BatchDispatcher::new(&oracle, 3, 1);
        dispatcher.push(pending(0, 7, "a"));
        let other = GroupSignature { source: "z".into(), sink: "sink".into() };
        assert!(dispatcher.covers(FlowKey::new(7, 3), &other));
        let queued = GroupSignature { source: "a".into(), sink: "sink".into() };
        assert!(dispatcher.covers(FlowKey::new(8, 0), &queued));
        assert!(!dispatcher.covers(FlowKey::new(8, 0), &other));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }
}
