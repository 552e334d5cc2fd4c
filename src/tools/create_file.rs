//! `create_file`: create a new file, failing if it already exists. Inline
//! autofix + lint feedback is appended to the observation.

use super::{
    AgentTool, ToolContext, ToolOutcome, inline_gate_feedback, relative_to_root, required_str,
    resolve_path,
};
use crate::errors::ToolError;
use crate::provider::ToolSpec;
use async_trait::async_trait;

pub struct CreateFileTool;

#[async_trait]
impl AgentTool for CreateFileTool {
    fn name(&self) -> &'static str {
        "create_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_file".into(),
            description: "Create a new file with the given content. Fails if the file exists; \
                          use edit_file to change existing files."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let raw_path = required_str(&args, "path", "create_file")?;
        let content = required_str(&args, "content", "create_file")?;
        let path = resolve_path(&ctx.workspace.root, raw_path)?;

        if path.exists() {
            return Err(ToolError::FileExists { path });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;

        let rel = relative_to_root(&ctx.workspace.root, &path);
        let feedback = inline_gate_feedback(ctx, &path).await;
        Ok(ToolOutcome {
            text: format!("Created {rel} ({} lines){feedback}", content.lines().count()),
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

    async fn create(dir: &TempDir, args: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        let workspace = Workspace::init(dir.path()).unwrap();
        let ctx = ToolContext::new(workspace, GateSet::standard());
        CreateFileTool.call(args, &ctx).await
    }

    #[tokio::test]
    async fn creates_file_with_parents() {
        let dir = TempDir::new().unwrap();
        let outcome = create(
            &dir,
            serde_json::json!({"path": "src/pkg/new.py", "content": "x = 1\n"}),
        )
        .await
        .unwrap();
        assert!(dir.path().join("src/pkg/new.py").exists());
        assert_eq!(outcome.files_modified, vec!["src/pkg/new.py"]);
        assert!(outcome.text.contains("Created src/pkg/new.py"));
    }

    #[tokio::test]
    async fn existing_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "old\n").unwrap();
        let err = create(&dir, serde_json::json!({"path": "a.py", "content": "new\n"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::FileExists { .. }));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "old\n");
    }
}
