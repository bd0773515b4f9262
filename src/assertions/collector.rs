//! Assertion Collector
//!
//! Append-only buffer of assertion results for one scenario execution,
//! plus the set of in-flight LLM-backed assertion tasks. The runner
//! drains the pending set before a scenario is allowed to complete, so
//! results from fire-and-forget judge calls are never lost.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::types::{AssertionKind, AssertionResult};

#[derive(Clone, Default)]
pub struct AssertionCollector {
    results: Arc<Mutex<Vec<AssertionResult>>>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AssertionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: AssertionResult) {
        self.results.lock().unwrap().push(result);
    }

    /// Track an in-flight async assertion so `drain` can join it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.pending.lock().unwrap().push(handle);
    }

    /// Await every tracked async assertion. Tasks spawned while
    /// draining are picked up too. A task that panicked is recorded as
    /// a failed assertion rather than propagating.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.pending.lock().unwrap());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    self.record(AssertionResult {
                        kind: AssertionKind::Custom,
                        passed: false,
                        expected: None,
                        actual: None,
                        reasoning: None,
                        latency_ms: None,
                        error: Some(format!("assertion task failed: {}", err)),
                    });
                }
            }
        }
    }

    pub fn results(&self) -> Vec<AssertionResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn passed_result() -> AssertionResult {
        AssertionResult {
            kind: AssertionKind::Contains,
            passed: true,
            expected: None,
            actual: None,
            reasoning: None,
            latency_ms: None,
            error: None,
        }
    }

    #[test]
    fn test_record_appends_in_order() {
        let collector = AssertionCollector::new();
        collector.record(passed_result());
        collector.record(AssertionResult { passed: false, ..passed_result() });

        let results = collector.results();
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }

    #[tokio::test]
    async fn test_drain_waits_for_pending_tasks() {
        let collector = AssertionCollector::new();
        let inner = collector.clone();

        collector.track(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            inner.record(passed_result());
        }));

        assert_eq!(collector.len(), 0);
        collector.drain().await;
        assert_eq!(collector.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_records_panicked_task() {
        let collector = AssertionCollector::new();
        collector.track(tokio::spawn(async {
            panic!("judge exploded");
        }));

        collector.drain().await;
        let results = collector.results();
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert!(results[0].error.as_deref().unwrap().contains("assertion task failed"));
    }

    #[tokio::test]
    async fn test_drain_picks_up_tasks_spawned_while_draining() {
        let collector = AssertionCollector::new();
        let outer = collector.clone();

        collector.track(tokio::spawn(async move {
            let inner = outer.clone();
            outer.track(tokio::spawn(async move {
                inner.record(passed_result());
            }));
        }));

        collector.drain().await;
        assert_eq!(collector.len(), 1);
    }
}
