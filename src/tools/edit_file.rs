//! `edit_file`: targeted search/replace through the layered editor. The
//! observation carries a diff summary plus inline lint feedback, never the
//! full file.

use super::{
    AgentTool, ToolContext, ToolOutcome, inline_gate_feedback, relative_to_root, required_str,
    resolve_path,
};
use crate::editor;
use crate::errors::ToolError;
use crate::provider::ToolSpec;
use async_trait::async_trait;

pub struct EditFileTool;

#[async_trait]
impl AgentTool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file".into(),
            description: "Replace one unique occurrence of a search block with a replace block. \
                          The search block must match the current file contents; on mismatch, \
                          re-read the file and resend only this edit."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "search": { "type": "string", "description": "Exact lines to find" },
                    "replace": { "type": "string", "description": "Lines to substitute" }
                },
                "required": ["path", "search", "replace"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let raw_path = required_str(&args, "path", "edit_file")?;
        let search = required_str(&args, "search", "edit_file")?;
        let replace = required_str(&args, "replace", "edit_file")?;
        let path = resolve_path(&ctx.workspace.root, raw_path)?;
        if !path.exists() {
            return Err(ToolError::FileNotFound { path });
        }

        let summary = editor::apply_edit(&path, search, replace)?;

        let rel = relative_to_root(&ctx.workspace.root, &path);
        let feedback = inline_gate_feedback(ctx, &path).await;
        Ok(ToolOutcome {
            text: format!("{}{feedback}", summary.describe()),
            files_modified: vec![rel],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateSet;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    async fn edit(dir: &TempDir, args: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        let workspace = Workspace::init(dir.path()).unwrap();
        let ctx = ToolContext::new(workspace, GateSet::standard());
        EditFileTool.call(args, &ctx).await
    }

    #[tokio::test]
    async fn successful_edit_returns_diff_summary_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "value = 1\nother = 2\n").unwrap();

        let outcome = edit(
            &dir,
            serde_json::json!({"path": "a.py", "search": "value = 1", "replace": "value = 42"}),
        )
        .await
        .unwrap();

        assert!(outcome.text.contains("-1 +1 lines"));
        assert!(!outcome.text.contains("other = 2"));
        assert_eq!(outcome.files_modified, vec!["a.py"]);

        let content = std::fs::read_to_string(dir.path().join("a.py")).unwrap();
        assert!(content.contains("value = 42"));
        assert!(!content.contains("value = 1\n"));
    }

    #[tokio::test]
    async fn mismatch_surfaces_structured_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "actual = 1\n").unwrap();

        let err = edit(
            &dir,
            serde_json::json!({"path": "a.py", "search": "imagined = 9", "replace": "x"}),
        )
        .await
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Re-read the file"));
    }
}
