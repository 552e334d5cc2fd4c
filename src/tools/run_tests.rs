//! `run_tests`: structured test outcome through the test gate.

use super::{AgentTool, ToolContext, ToolOutcome};
use crate::errors::ToolError;
use crate::gates::{GateOutcome, TestGate};
use crate::provider::ToolSpec;
use async_trait::async_trait;

pub struct RunTestsTool;

#[async_trait]
impl AgentTool for RunTestsTool {
    fn name(&self) -> &'static str {
        "run_tests"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_tests".into(),
            description: "Run the project's test suite, optionally narrowed to one file or \
                          selector. Returns a structured failure report."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": { "type": "string", "description": "Optional test file or selector" }
                }
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let target = args.get("target").and_then(|v| v.as_str());
        let outcome = TestGate::new().run_target(&ctx.workspace, target).await;
        let text = match outcome {
            GateOutcome::Pass => "All tests passed.".to_string(),
            GateOutcome::Fail(report) => report.describe(),
            GateOutcome::Skipped(reason) => format!("Tests skipped: {reason}"),
        };
        Ok(ToolOutcome::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateSet;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    #[tokio::test]
    async fn unconfigured_workspace_reports_skip() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        let ctx = ToolContext::new(workspace, GateSet::standard());
        let outcome = RunTestsTool.call(serde_json::json!({}), &ctx).await.unwrap();
        assert!(outcome.text.contains("skipped"));
    }
}
