//! Pluggable verification gates.
//!
//! Two gates ship by default: lint and test. A gate that cannot run because
//! its tool is missing or crashed is *skipped*, never failed — the agent
//! must only ever see failures it can fix in the target repository.

mod lint;

pub use lint::LintGate;
pub use test::TestGate;

use crate::workspace::Workspace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How many failing items a report quotes verbatim.
const MAX_VERBATIM_ITEMS: usize = 5;

/// One failing item from a gate (a lint finding, a failing test).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateItem {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Structured failure report: first N failing items verbatim, aggregate
/// counts, duration, exit code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: String,
    pub items: Vec<GateItem>,
    pub total_failures: usize,
    pub duration_ms: u64,
    pub exit_code: i32,
}

impl GateReport {
    /// Render for the agent: verbatim head, summarized tail.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "[{}] {} failure(s) (exit {}, {}ms)\n",
            self.gate, self.total_failures, self.exit_code, self.duration_ms
        );
        for item in self.items.iter().take(MAX_VERBATIM_ITEMS) {
            match (&item.file, &item.code) {
                (Some(file), Some(code)) => {
                    out.push_str(&format!("  {file}: [{code}] {}\n", item.message))
                }
                (Some(file), None) => out.push_str(&format!("  {file}: {}\n", item.message)),
                _ => out.push_str(&format!("  {}\n", item.message)),
            }
        }
        if self.total_failures > MAX_VERBATIM_ITEMS {
            out.push_str(&format!(
                "  ... and {} more\n",
                self.total_failures - MAX_VERBATIM_ITEMS
            ));
        }
        out
    }
}

/// Result of running one gate.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Pass,
    Fail(GateReport),
    /// Tool missing or crashed; logged, not surfaced to the agent.
    Skipped(String),
}

impl GateOutcome {
    pub fn is_pass_or_skip(&self) -> bool {
        !matches!(self, GateOutcome::Fail(_))
    }
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the *target's* tool inventory supports this gate. Absent
    /// tools mean skip, not fail.
    fn is_available(&self, workspace: &Workspace) -> bool;

    /// Per-file execution, used inline by the tool surface after writes.
    async fn run_on_file(&self, workspace: &Workspace, path: &Path) -> GateOutcome;

    /// Full-project execution at final verification.
    async fn run_all(&self, workspace: &Workspace) -> GateOutcome;
}

/// The ordered gate list plus shared settings.
#[derive(Clone)]
pub struct GateSet {
    gates: Vec<Arc<dyn Gate>>,
    pub command_timeout: Duration,
}

impl GateSet {
    /// The default pipeline: lint, then tests.
    pub fn standard() -> Self {
        Self {
            gates: vec![Arc::new(LintGate::new()), Arc::new(TestGate::new())],
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run every available gate against the whole project, in order.
    /// Returns per-gate outcomes; skips are recorded but do not fail.
    pub async fn run_all(&self, workspace: &Workspace) -> Vec<(String, GateOutcome)> {
        let mut results = Vec::new();
        for gate in &self.gates {
            if !gate.is_available(workspace) {
                tracing::debug!(gate = gate.name(), "gate unavailable, skipping");
                results.push((
                    gate.name().to_string(),
                    GateOutcome::Skipped("not configured for this workspace".into()),
                ));
                continue;
            }
            let outcome = gate.run_all(workspace).await;
            if let GateOutcome::Skipped(reason) = &outcome {
                tracing::warn!(gate = gate.name(), reason, "gate skipped");
            }
            results.push((gate.name().to_string(), outcome));
        }
        results
    }

    /// Inline per-file pass used by the tool surface after create/edit.
    /// Only the lint gate participates; the feedback is appended to the
    /// tool observation.
    pub async fn run_on_file(&self, workspace: &Workspace, path: &Path) -> Vec<(String, GateOutcome)> {
        let mut results = Vec::new();
        for gate in &self.gates {
            if !gate.is_available(workspace) {
                continue;
            }
            let outcome = gate.run_on_file(workspace, path).await;
            if matches!(outcome, GateOutcome::Skipped(_)) {
                continue;
            }
            results.push((gate.name().to_string(), outcome));
        }
        results
    }
}

/// True when every outcome is Pass or Skipped.
pub fn all_passing(results: &[(String, GateOutcome)]) -> bool {
    results.iter().all(|(_, o)| o.is_pass_or_skip())
}

/// The failing reports, in gate order.
pub fn failing_reports(results: &[(String, GateOutcome)]) -> Vec<&GateReport> {
    results
        .iter()
        .filter_map(|(_, o)| match o {
            GateOutcome::Fail(report) => Some(report),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(failures: usize) -> GateReport {
        GateReport {
            gate: "lint".into(),
            items: (0..failures)
                .map(|i| GateItem {
                    message: format!("finding {i}"),
                    file: Some("src/a.py".into()),
                    code: Some("E501".into()),
                })
                .collect(),
            total_failures: failures,
            duration_ms: 42,
            exit_code: 1,
        }
    }

    #[test]
    fn describe_quotes_head_and_summarizes_tail() {
        let text = report(8).describe();
        assert!(text.contains("8 failure(s)"));
        assert!(text.contains("finding 0"));
        assert!(text.contains("finding 4"));
        assert!(!text.contains("finding 5"));
        assert!(text.contains("and 3 more"));
    }

    #[test]
    fn all_passing_treats_skips_as_passes() {
        let results = vec![
            ("lint".to_string(), GateOutcome::Pass),
            ("test".to_string(), GateOutcome::Skipped("no tests".into())),
        ];
        assert!(all_passing(&results));

        let with_failure = vec![("lint".to_string(), GateOutcome::Fail(report(1)))];
        assert!(!all_passing(&with_failure));
        assert_eq!(failing_reports(&with_failure).len(), 1);
    }
}
