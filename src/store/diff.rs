//! Regression Detector
//!
//! Pure comparison of two stored runs. A pass-to-fail flip is always a
//! regression and a fail-to-pass flip always an improvement; otherwise
//! the score delta against the threshold decides. Summary counts are
//! independent of the input ordering of scenarios.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{RunResult, StoredRun};

pub const DEFAULT_THRESHOLD: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Regression,
    Improvement,
    Unchanged,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDiff {
    pub scenario: String,
    pub status: DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_delta: Option<f64>,
    pub pass_flipped: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub regressions: usize,
    pub improvements: usize,
    pub unchanged: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub baseline_version: String,
    pub candidate_version: String,
    pub threshold: f64,
    pub scenarios: Vec<ScenarioDiff>,
    pub summary: DiffSummary,
    pub has_regressions: bool,
}

/// Scenario names are unique within a run; a BTreeMap gives the diff a
/// deterministic scenario order whatever order the results arrived in.
fn by_scenario(run: &StoredRun) -> BTreeMap<&str, &RunResult> {
    run.results
        .iter()
        .map(|r| (r.scenario.as_str(), r))
        .collect()
}

fn compare(baseline: &RunResult, candidate: &RunResult, threshold: f64) -> ScenarioDiff {
    let delta = candidate.score - baseline.score;
    let pass_flipped = baseline.passed != candidate.passed;

    let status = if baseline.passed && !candidate.passed {
        DiffStatus::Regression
    } else if !baseline.passed && candidate.passed {
        DiffStatus::Improvement
    } else if delta < -threshold {
        DiffStatus::Regression
    } else if delta > threshold {
        DiffStatus::Improvement
    } else {
        DiffStatus::Unchanged
    };

    ScenarioDiff {
        scenario: baseline.scenario.clone(),
        status,
        baseline_score: Some(baseline.score),
        candidate_score: Some(candidate.score),
        score_delta: Some(delta),
        pass_flipped,
    }
}

/// Compare two runs. Pure: identical inputs always produce identical
/// reports.
pub fn diff_runs(baseline: &StoredRun, candidate: &StoredRun, threshold: f64) -> DiffReport {
    let base = by_scenario(baseline);
    let cand = by_scenario(candidate);

    let mut names: Vec<&str> = base.keys().chain(cand.keys()).copied().collect();
    names.sort_unstable();
    names.dedup();

    let scenarios: Vec<ScenarioDiff> = names
        .iter()
        .map(|name| match (base.get(name), cand.get(name)) {
            (Some(b), Some(c)) => compare(b, c, threshold),
            (Some(b), None) => ScenarioDiff {
                scenario: b.scenario.clone(),
                status: DiffStatus::Removed,
                baseline_score: Some(b.score),
                candidate_score: None,
                score_delta: None,
                pass_flipped: false,
            },
            (None, Some(c)) => ScenarioDiff {
                scenario: c.scenario.clone(),
                status: DiffStatus::Added,
                baseline_score: None,
                candidate_score: Some(c.score),
                score_delta: None,
                pass_flipped: false,
            },
            (None, None) => unreachable!("name came from one of the maps"),
        })
        .collect();

    let mut summary = DiffSummary::default();
    for diff in &scenarios {
        match diff.status {
            DiffStatus::Added => summary.added += 1,
            DiffStatus::Removed => summary.removed += 1,
            DiffStatus::Regression => summary.regressions += 1,
            DiffStatus::Improvement => summary.improvements += 1,
            DiffStatus::Unchanged => summary.unchanged += 1,
        }
    }

    DiffReport {
        baseline_version: baseline.meta.version.clone(),
        candidate_version: candidate.meta.version.clone(),
        threshold,
        has_regressions: summary.regressions > 0,
        scenarios,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunMeta;

    fn result(name: &str, passed: bool, score: f64) -> RunResult {
        RunResult {
            scenario: name.to_string(),
            passed,
            score,
            assertions: Vec::new(),
            turns: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }

    fn run(version: &str, results: Vec<RunResult>) -> StoredRun {
        StoredRun {
            meta: RunMeta {
                id: format!("run-{}", version),
                version: version.to_string(),
                created_at: "2025-01-01T00:00:00Z".to_string(),
                total: results.len(),
                passed: 0,
                failed: 0,
                total_duration_ms: 0,
            },
            results,
        }
    }

    #[test]
    fn test_score_drop_beyond_threshold_is_regression() {
        let v1 = run("v1", vec![result("refund flow", true, 0.84)]);
        let v2 = run("v2", vec![result("refund flow", true, 0.74)]);

        let report = diff_runs(&v1, &v2, 0.05);
        let diff = &report.scenarios[0];
        assert_eq!(diff.status, DiffStatus::Regression);
        assert!((diff.score_delta.unwrap() + 0.10).abs() < 1e-9);
        assert!(!diff.pass_flipped);
        assert_eq!(report.summary.regressions, 1);
        assert!(report.has_regressions);
    }

    #[test]
    fn test_small_drop_is_unchanged() {
        let v1 = run("v1", vec![result("a", true, 0.90)]);
        let v2 = run("v2", vec![result("a", true, 0.87)]);

        let report = diff_runs(&v1, &v2, 0.05);
        assert_eq!(report.scenarios[0].status, DiffStatus::Unchanged);
        assert!(!report.has_regressions);
    }

    #[test]
    fn test_pass_flip_beats_score_delta() {
        // Score went up but the pass flag flipped to fail: regression.
        let v1 = run("v1", vec![result("a", true, 0.5)]);
        let v2 = run("v2", vec![result("a", false, 1.0)]);
        let report = diff_runs(&v1, &v2, 0.05);
        assert_eq!(report.scenarios[0].status, DiffStatus::Regression);
        assert!(report.scenarios[0].pass_flipped);

        // And the reverse is an improvement.
        let report = diff_runs(&v2, &v1, 0.05);
        assert_eq!(report.scenarios[0].status, DiffStatus::Improvement);
    }

    #[test]
    fn test_added_and_removed() {
        let v1 = run("v1", vec![result("old", true, 1.0)]);
        let v2 = run("v2", vec![result("new", true, 1.0)]);

        let report = diff_runs(&v1, &v2, 0.05);
        assert_eq!(report.summary.removed, 1);
        assert_eq!(report.summary.added, 1);
        assert_eq!(report.summary.regressions, 0);
    }

    #[test]
    fn test_empty_side_yields_no_regressions() {
        let empty = run("v1", Vec::new());
        let v2 = run("v2", vec![result("a", true, 1.0), result("b", false, 0.0)]);

        let report = diff_runs(&empty, &v2, 0.05);
        assert_eq!(report.summary.added, 2);
        assert!(!report.has_regressions);

        let report = diff_runs(&v2, &empty, 0.05);
        assert_eq!(report.summary.removed, 2);
        assert!(!report.has_regressions);
    }

    #[test]
    fn test_input_order_does_not_change_summary() {
        let v1a = run("v1", vec![result("a", true, 0.9), result("b", true, 0.4)]);
        let v1b = run("v1", vec![result("b", true, 0.4), result("a", true, 0.9)]);
        let v2 = run("v2", vec![result("b", true, 0.9), result("a", true, 0.4)]);

        let first = diff_runs(&v1a, &v2, 0.05);
        let second = diff_runs(&v1b, &v2, 0.05);

        assert_eq!(first.summary, second.summary);
        let names: Vec<&str> = first.scenarios.iter().map(|d| d.scenario.as_str()).collect();
        let names2: Vec<&str> = second.scenarios.iter().map(|d| d.scenario.as_str()).collect();
        assert_eq!(names, names2);
    }

    #[test]
    fn test_diff_is_pure() {
        let v1 = run("v1", vec![result("a", true, 0.8)]);
        let v2 = run("v2", vec![result("a", true, 0.6)]);

        let first = serde_json::to_string(&diff_runs(&v1, &v2, 0.05)).unwrap();
        let second = serde_json::to_string(&diff_runs(&v1, &v2, 0.05)).unwrap();
        assert_eq!(first, second);
    }
}
